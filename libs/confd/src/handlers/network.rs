//! `network.interface` sections: plain devices and bridges, static
//! addressing, default routes.

use crate::collection::ConfigCollection;
use crate::command::{Command, priority};
use crate::section::{ConfigSection, DerivedState};
use crate::{Error, Result};

use super::{ApplyContext, SectionHandler, netmask_prefix};

/// The device name an interface section configures: `br-<name>` for bridges,
/// otherwise the declared ifname.
pub(crate) fn interface_ifname(section: &ConfigSection) -> Result<String> {
    if section.string("type") == Some("bridge") {
        return Ok(format!("br-{}", section.name()));
    }

    section
        .list("ifname")
        .first()
        .cloned()
        .ok_or_else(|| Error::validation(format!("interface {} has no ifname", section.name())))
}

pub(crate) struct InterfaceHandler;

impl SectionHandler for InterfaceHandler {
    fn apply(
        &self,
        section: &ConfigSection,
        _all: &ConfigCollection,
        _ctx: &mut ApplyContext,
    ) -> Result<(Vec<Command>, DerivedState)> {
        let key = section.key();
        let ifname = interface_ifname(section)?;
        let ifname = ifname.as_str();
        let mut commands = Vec::new();

        if section.string("type") == Some("bridge") {
            commands.push(Command::exec(
                priority::CREATE_IFACE,
                key,
                ["ip", "link", "add", "name", ifname, "type", "bridge"],
            ));

            for slave in section.list("ifname") {
                let slave = slave.as_str();
                commands.push(Command::exec(
                    priority::CONFIG_IFACE,
                    key,
                    ["ip", "link", "set", "dev", slave, "up"],
                ));
                commands.push(Command::exec(
                    priority::CONFIG_IFACE,
                    key,
                    ["ip", "link", "set", "dev", slave, "promisc", "on"],
                ));
                commands.push(Command::exec(
                    priority::CONFIG_IFACE,
                    key,
                    ["ip", "link", "set", "dev", slave, "master", ifname],
                ));
            }
        }

        match section.require_string("proto")? {
            "static" => {
                let ipaddr = section.require_string("ipaddr")?;
                let netmask = section.require_string("netmask")?;
                let prefix = netmask_prefix(netmask)?;
                let addr = format!("{ipaddr}/{prefix}");

                commands.push(Command::exec(
                    priority::CONFIG_IFACE,
                    key,
                    ["ip", "addr", "flush", "dev", ifname],
                ));
                commands.push(Command::exec(
                    priority::CONFIG_IFACE,
                    key,
                    ["ip", "addr", "add", addr.as_str(), "dev", ifname],
                ));
                commands.push(Command::exec(
                    priority::CONFIG_IFACE,
                    key,
                    ["ip", "link", "set", "dev", ifname, "up"],
                ));

                if let Some(gateway) = section.string("gateway") {
                    commands.push(Command::exec(
                        priority::ADD_LINK,
                        key,
                        ["ip", "route", "add", "default", "via", gateway, "dev", ifname],
                    ));
                }
            }
            // Externally managed; nothing to configure from here.
            "dhcp" => {}
            other => {
                return Err(Error::validation(format!(
                    "interface {}: unsupported proto '{other}'",
                    section.name()
                )));
            }
        }

        Ok((commands, DerivedState::default()))
    }

    fn revert(
        &self,
        section: &ConfigSection,
        _all: &ConfigCollection,
        _ctx: &mut ApplyContext,
    ) -> Result<Vec<Command>> {
        let key = section.key();
        let ifname = interface_ifname(section)?;
        let ifname = ifname.as_str();
        let mut commands = Vec::new();

        if section.string("proto") == Some("static") {
            if let Some(gateway) = section.string("gateway") {
                commands.push(Command::exec(
                    -priority::ADD_LINK,
                    key,
                    ["ip", "route", "del", "default", "via", gateway, "dev", ifname],
                ));
            }

            commands.push(Command::exec(
                -priority::CONFIG_IFACE,
                key,
                ["ip", "addr", "flush", "dev", ifname],
            ));
        }

        if section.string("type") == Some("bridge") {
            for slave in section.list("ifname") {
                let slave = slave.as_str();
                commands.push(Command::exec(
                    -priority::CONFIG_IFACE,
                    key,
                    ["ip", "link", "set", "dev", slave, "nomaster"],
                ));
                commands.push(Command::exec(
                    -priority::CONFIG_IFACE,
                    key,
                    ["ip", "link", "set", "dev", slave, "promisc", "off"],
                ));
                commands.push(Command::exec(
                    -priority::CONFIG_IFACE,
                    key,
                    ["ip", "link", "set", "dev", slave, "down"],
                ));
            }

            commands.push(Command::exec(
                -priority::CREATE_IFACE,
                key,
                ["ip", "link", "delete", ifname],
            ));
        }

        Ok(commands)
    }
}
