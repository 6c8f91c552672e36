//! `firewall.zone` and `firewall.redirect` sections rendered as iptables
//! rules.

use crate::collection::ConfigCollection;
use crate::command::{Command, priority};
use crate::section::{ConfigSection, DerivedState, Package};
use crate::{Error, Result};

use super::{ApplyContext, SectionHandler, interface_ifname};

pub(crate) struct ZoneHandler;

impl ZoneHandler {
    /// One conntrack accept per zone network, plus a MASQUERADE rule when
    /// masquerading is on. `action` is `-A` or `-D`.
    fn commands(
        &self,
        section: &ConfigSection,
        all: &ConfigCollection,
        action: &str,
        prio: i32,
    ) -> Result<Vec<Command>> {
        let key = section.key();
        let mut commands = Vec::new();

        for network in section.list("network") {
            let interface = all.lookup(Package::Network, "interface", network)?;
            let ifname = interface_ifname(interface)?;
            let ifname = ifname.as_str();

            commands.push(Command::exec(
                prio,
                key,
                [
                    "iptables",
                    "--wait",
                    action,
                    "FORWARD",
                    "-i",
                    ifname,
                    "-m",
                    "conntrack",
                    "--ctstate",
                    "RELATED,ESTABLISHED",
                    "-j",
                    "ACCEPT",
                ],
            ));

            if section.boolean("masq") {
                commands.push(Command::exec(
                    prio,
                    key,
                    [
                        "iptables",
                        "--wait",
                        "-t",
                        "nat",
                        action,
                        "POSTROUTING",
                        "-o",
                        ifname,
                        "-j",
                        "MASQUERADE",
                    ],
                ));
            }
        }

        Ok(commands)
    }
}

impl SectionHandler for ZoneHandler {
    fn apply(
        &self,
        section: &ConfigSection,
        all: &ConfigCollection,
        _ctx: &mut ApplyContext,
    ) -> Result<(Vec<Command>, DerivedState)> {
        let commands = self.commands(section, all, "-A", priority::ADD_LINK)?;

        Ok((commands, DerivedState::default()))
    }

    fn revert(
        &self,
        section: &ConfigSection,
        all: &ConfigCollection,
        _ctx: &mut ApplyContext,
    ) -> Result<Vec<Command>> {
        self.commands(section, all, "-D", -priority::ADD_LINK)
    }
}

pub(crate) struct RedirectHandler;

impl RedirectHandler {
    fn commands(
        &self,
        section: &ConfigSection,
        all: &ConfigCollection,
        action: &str,
        prio: i32,
    ) -> Result<Vec<Command>> {
        let key = section.key();

        if section.string("target") == Some("SNAT") {
            // Declared in the grammar but not supported; skipping is
            // non-fatal so the rest of the firewall still loads.
            tracing::warn!(section = %key, "SNAT redirects are not implemented; skipping");
            return Ok(Vec::new());
        }

        let src = section.string("src").ok_or_else(|| {
            Error::validation(format!("redirect {} has no src zone", section.name()))
        })?;
        let zone = find_zone(all, src)?;
        let network = zone.list("network").first().ok_or_else(|| {
            Error::validation(format!("zone '{src}' has no network to redirect on"))
        })?;
        let interface = all.lookup(Package::Network, "interface", network)?;
        let ifname = interface_ifname(interface)?;

        let dest_ip = section.string("dest_ip").ok_or_else(|| {
            Error::validation(format!("redirect {} has no dest_ip", section.name()))
        })?;
        let destination = match section.string("dest_port") {
            Some(port) => format!("{dest_ip}:{port}"),
            None => dest_ip.to_owned(),
        };

        let protos: Vec<Option<&str>> = match section.string("proto") {
            None | Some("any") => vec![None],
            Some("tcpudp") => vec![Some("tcp"), Some("udp")],
            Some(proto) => vec![Some(proto)],
        };

        let mut commands = Vec::new();
        for proto in protos {
            let mut argv: Vec<String> = [
                "iptables",
                "--wait",
                "-t",
                "nat",
                action,
                "PREROUTING",
                "-i",
                ifname.as_str(),
            ]
            .into_iter()
            .map(str::to_owned)
            .collect();

            if let Some(proto) = proto {
                argv.extend(["-p".to_owned(), proto.to_owned()]);
            }
            if let Some(src_ip) = section.string("src_ip") {
                argv.extend(["-s".to_owned(), src_ip.to_owned()]);
            }
            if let Some(src_port) = section.string("src_port") {
                argv.extend(["--dport".to_owned(), src_port.to_owned()]);
            }

            argv.extend([
                "-j".to_owned(),
                "DNAT".to_owned(),
                "--to-destination".to_owned(),
                destination.clone(),
            ]);

            commands.push(Command::exec(prio, key, argv));
        }

        Ok(commands)
    }
}

impl SectionHandler for RedirectHandler {
    fn apply(
        &self,
        section: &ConfigSection,
        all: &ConfigCollection,
        _ctx: &mut ApplyContext,
    ) -> Result<(Vec<Command>, DerivedState)> {
        let commands = self.commands(section, all, "-A", priority::ADD_LINK)?;

        Ok((commands, DerivedState::default()))
    }

    fn revert(
        &self,
        section: &ConfigSection,
        all: &ConfigCollection,
        _ctx: &mut ApplyContext,
    ) -> Result<Vec<Command>> {
        self.commands(section, all, "-D", -priority::ADD_LINK)
    }
}

/// Zones are usually anonymous; they are referenced through their `name`
/// option rather than their section name.
fn find_zone<'a>(all: &'a ConfigCollection, name: &str) -> Result<&'a ConfigSection> {
    all.sections_of(Package::Firewall, "zone")
        .find(|zone| zone.string("name") == Some(name) || zone.name() == name)
        .ok_or(Error::Lookup {
            package: Package::Firewall,
            type_name: "zone".to_owned(),
            name: name.to_owned(),
        })
}
