//! Plan generators and their step implementations, one module per concern.
//!
//! Generation inspects the old and new snapshots and registers plan entries;
//! nothing touches the host until the whole plan is aggregated.

mod files;
mod name;
mod resource;
mod runtime;
mod state;
mod structure;
mod traffic;

use crate::context::AgentContext;
use crate::plan::Action;
use crate::update::Update;
use crate::Result;

pub(crate) fn generate(update: &mut Update) -> Result<()> {
    name::generate(update)?;
    state::generate(update)?;
    files::generate(update)?;
    resource::generate(update)?;
    structure::generate(update)?;
    runtime::generate(update)?;
    traffic::generate(update)?;

    Ok(())
}

/// Single dispatch point for every plan action.
pub(crate) async fn perform(action: Action, update: &mut Update, ctx: &AgentContext) -> Result<()> {
    match action {
        Action::ValidateName => name::validate_name(update),
        Action::CheckState => state::check_state(update, ctx),
        Action::CreateDataDirs => files::create_data_dirs(update, ctx),
        Action::RemoveDataDirs => files::remove_data_dirs(update, ctx),
        Action::SetResourceLimits => resource::set_limits(update),
        Action::DetectNetworkDevices => structure::detect_devices(update, ctx),
        Action::AllocateNetworks => structure::allocate_networks(update, ctx),
        Action::ReleaseNetworks(target) => structure::release_networks(update, ctx, target),
        Action::SynthesizeFirewall => traffic::synthesize_firewall(update),
        Action::WriteChuteConfig => structure::write_chute_config(update, ctx),
        Action::RemoveChuteConfig => structure::remove_chute_config(update, ctx),
        Action::ReloadConfig => structure::reload_config(update, ctx).await,
        Action::PrepareImage => runtime::prepare_image(update, ctx).await,
        Action::RemoveImage(target) => runtime::remove_image(update, ctx, target).await,
        Action::CreateContainer => runtime::create_container(update, ctx).await,
        Action::RemoveContainer(target) => runtime::remove_container(update, ctx, target).await,
        Action::StartContainer(target) => runtime::start_container(update, ctx, target).await,
        Action::StopContainer(target) => runtime::stop_container(update, ctx, target).await,
        Action::SetupNetInterfaces(target) => {
            runtime::setup_net_interfaces(update, ctx, target).await
        }
    }
}
