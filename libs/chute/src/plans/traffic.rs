//! Traffic rules: DNAT redirects synthesized from the chute's port
//! bindings, reconciled through confd alongside the network sections.

use paradrop_confd::writer::SectionSpec;

use crate::plan::{Action, Target, phase};
use crate::update::{Update, UpdateType};
use crate::Result;

pub(super) fn generate(update: &mut Update) -> Result<()> {
    if !matches!(update.update_type, UpdateType::Create | UpdateType::Update) {
        return Ok(());
    }

    let wants_redirects = update.new.as_ref().is_some_and(|chute| {
        !chute.net.is_empty()
            && chute
                .host_config
                .as_ref()
                .is_some_and(|config| !config.port_bindings.is_empty())
    });

    if wants_redirects {
        update
            .plan
            .register(phase::SYNTH_TRAFFIC, Action::SynthesizeFirewall);
    }

    Ok(())
}

pub(super) fn synthesize_firewall(update: &mut Update) -> Result<()> {
    let chute = update.chute(Target::New)?;

    // Redirect to the chute's first interface; without one the ports are
    // only reachable through the engine's own bridge and need no rules.
    let Some(first) = chute
        .cache
        .network_interfaces
        .as_deref()
        .and_then(|records| records.first())
    else {
        return Ok(());
    };
    let dest_ip = first.internal_ipaddr.to_string();

    let Some(config) = &chute.host_config else {
        return Ok(());
    };

    let mut sections = Vec::new();
    for (key, host_port) in &config.port_bindings {
        let (port, proto) = match key.split_once('/') {
            Some((port, proto)) => (port, proto),
            None => (key.as_str(), "tcpudp"),
        };

        sections.push(
            SectionSpec::new("redirect", None)
                .option("src", "wan")
                .option("src_port", host_port.to_string())
                .option("proto", proto)
                .option("dest_ip", &dest_ip)
                .option("dest_port", port)
                .option("target", "DNAT"),
        );
    }

    let count = sections.len();
    update.chute_mut(Target::New)?.cache.virt_network_config = Some(sections);
    update.progress(format!("Synthesized {count} port redirect(s)"));

    Ok(())
}
