//! Network structure: device inventory, subnet allocation, configuration
//! projection, and the confd reload that makes it real.

use std::path::PathBuf;

use paradrop_confd::writer;

use crate::context::AgentContext;
use crate::network;
use crate::plan::{Action, Target, phase};
use crate::update::{Update, UpdateType};
use crate::Result;

pub(super) fn generate(update: &mut Update) -> Result<()> {
    match update.update_type {
        UpdateType::Create | UpdateType::Update => {
            update
                .plan
                .register(phase::DETECT_DEVICES, Action::DetectNetworkDevices);
            update.plan.register_with_abort(
                phase::ALLOCATE_NETWORK,
                Action::AllocateNetworks,
                Action::ReleaseNetworks(Target::New),
            );
            update.plan.register_with_abort(
                phase::WRITE_CONFIG,
                Action::WriteChuteConfig,
                Action::RemoveChuteConfig,
            );
            update
                .plan
                .register(phase::RELOAD_CONFIG, Action::ReloadConfig);

            if update.update_type == UpdateType::Update {
                update
                    .plan
                    .register(phase::CLEANUP_NETWORK, Action::ReleaseNetworks(Target::Old));
            }
        }
        UpdateType::Delete => {
            update
                .plan
                .register(phase::CLEANUP_CONFIG, Action::RemoveChuteConfig);
            update
                .plan
                .register(phase::CLEANUP_RELOAD, Action::ReloadConfig);
            update
                .plan
                .register(phase::CLEANUP_NETWORK, Action::ReleaseNetworks(Target::Old));
        }
        UpdateType::Start | UpdateType::Stop | UpdateType::Restart => {}
    }

    Ok(())
}

fn chute_config_path(ctx: &AgentContext, name: &str) -> PathBuf {
    ctx.settings.config_dir.join(format!("chute-{name}"))
}

pub(super) fn detect_devices(update: &mut Update, ctx: &AgentContext) -> Result<()> {
    let devices = match network::detect_network_devices(
        &ctx.settings.sys_net_dir,
        &ctx.settings.wan_interface,
    ) {
        Ok(devices) => devices,
        Err(e) => {
            // No sysfs (containers, tests): carry on with an empty
            // inventory; Wi-Fi requests will fail with a clear error.
            tracing::warn!("Could not scan network devices: {e}");
            Default::default()
        }
    };

    tracing::debug!(
        wifi = devices.wifi.len(),
        lan = devices.lan.len(),
        wan = devices.wan.len(),
        "Detected network devices"
    );
    update.chute_mut(Target::New)?.cache.network_devices = Some(devices);

    Ok(())
}

pub(super) fn allocate_networks(update: &mut Update, ctx: &AgentContext) -> Result<()> {
    let chute = update.chute(Target::New)?;

    if chute.net.is_empty() {
        let chute = update.chute_mut(Target::New)?;
        chute.cache.network_interfaces = Some(Vec::new());
        chute.cache.os_network_config = Some(Vec::new());
        return Ok(());
    }

    let devices = chute.cache.network_devices.clone().unwrap_or_default();
    let name = chute.name.clone();
    let net = chute.net.clone();

    let records = {
        let mut pool = ctx.pool.lock();
        network::allocate_interfaces(&name, &net, &devices, &mut pool)?
    };

    for record in &records {
        update.progress(format!(
            "Allocated {} ({}) on {}",
            record.external_intf, record.net_type, record.subnet
        ));
    }

    let chute = update.chute_mut(Target::New)?;
    chute.cache.os_network_config = Some(network::os_network_sections(&records));
    chute.cache.network_interfaces = Some(records);

    Ok(())
}

pub(super) fn release_networks(update: &mut Update, ctx: &AgentContext, target: Target) -> Result<()> {
    let Ok(chute) = update.chute(target) else {
        return Ok(());
    };
    let Some(records) = &chute.cache.network_interfaces else {
        return Ok(());
    };

    let mut pool = ctx.pool.lock();
    for record in records {
        pool.release(record.subnet);
    }

    Ok(())
}

pub(super) fn write_chute_config(update: &mut Update, ctx: &AgentContext) -> Result<()> {
    let chute = update.chute(Target::New)?;

    let mut sections = chute.cache.os_network_config.clone().unwrap_or_default();
    if let Some(records) = &chute.cache.network_interfaces {
        sections.extend(network::wireless_and_dhcp_sections(&chute.name, records));
    }
    sections.extend(chute.cache.virt_network_config.clone().unwrap_or_default());

    let path = chute_config_path(ctx, &update.name);

    if sections.is_empty() {
        return remove_chute_config(update, ctx);
    }

    let content = writer::render_sections(&sections);
    let changed = writer::write_if_changed(&path, &content)?;
    update.config_changed |= changed;

    Ok(())
}

pub(super) fn remove_chute_config(update: &mut Update, ctx: &AgentContext) -> Result<()> {
    let path = chute_config_path(ctx, &update.name);

    match std::fs::remove_file(&path) {
        Ok(()) => update.config_changed = true,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(e.into()),
    }

    Ok(())
}

pub(super) async fn reload_config(update: &mut Update, ctx: &AgentContext) -> Result<()> {
    if !update.config_changed {
        update.progress("Network configuration unchanged; skipping reload".to_owned());
        return Ok(());
    }

    let mut confd = ctx.confd.lock().await;
    confd
        .load_config(&ctx.settings.config_dir, ctx.settings.apply_commands)
        .await?;
    update.progress("Reloaded network configuration".to_owned());

    Ok(())
}
