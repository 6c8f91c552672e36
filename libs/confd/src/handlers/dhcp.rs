//! `dhcp.dhcp` sections: render a per-interface dnsmasq configuration and
//! manage the daemon. `dhcp.dnsmasq` sections carry resolver settings and
//! are consumed here; a named default exists so the lookup never fails.

use std::fmt::Write as _;
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};

use crate::collection::ConfigCollection;
use crate::command::{Command, priority};
use crate::section::{ConfigSection, DerivedState, Package};
use crate::{Error, Result};

use super::{ApplyContext, SectionHandler, interface_ifname, netmask_prefix};

pub(crate) struct DhcpHandler;

impl DhcpHandler {
    fn pid_file(write_dir: &Path, interface: &str) -> PathBuf {
        write_dir.join(format!("dnsmasq-{interface}.pid"))
    }
}

impl SectionHandler for DhcpHandler {
    fn apply(
        &self,
        section: &ConfigSection,
        all: &ConfigCollection,
        ctx: &mut ApplyContext,
    ) -> Result<(Vec<Command>, DerivedState)> {
        let key = section.key();
        let iface_name = section.require_string("interface")?;

        let interface = all.lookup(Package::Network, "interface", iface_name)?;
        let dnsmasq = all.lookup_or_default(Package::Dhcp, "dnsmasq", iface_name)?;

        let ipaddr: Ipv4Addr = interface.require_string("ipaddr")?.parse().map_err(|_| {
            Error::validation(format!("interface {iface_name} has an invalid ipaddr"))
        })?;
        let prefix = netmask_prefix(interface.require_string("netmask")?)?;

        let start = section.integer("start").unwrap_or(100);
        let limit = section.integer("limit").unwrap_or(150);
        let (first, last) = dhcp_range(ipaddr, prefix, start, limit)?;

        let conf_file = ctx.write_dir.join(format!("dnsmasq-{iface_name}.conf"));
        let lease_file = ctx.write_dir.join(format!("dnsmasq-{iface_name}.leases"));
        let pid_file = Self::pid_file(&ctx.write_dir, iface_name);

        let mut conf = String::new();
        let _ = writeln!(conf, "# dnsmasq configuration generated by paradrop-confd");
        let _ = writeln!(conf, "# Source: {}", section.source().display());
        let _ = writeln!(conf, "# Section: config dhcp {}", section.name());
        let _ = writeln!(conf, "interface={}", interface_ifname(interface)?);
        let _ = writeln!(
            conf,
            "dhcp-range={first},{last},{}",
            section.require_string("leasetime")?
        );
        let _ = writeln!(conf, "dhcp-leasefile={}", lease_file.display());

        for option in section.list("dhcp_option") {
            let _ = writeln!(conf, "dhcp-option={option}");
        }

        if dnsmasq.boolean("noresolv") {
            let _ = writeln!(conf, "no-resolv");
        }
        for server in dnsmasq.list("server") {
            let _ = writeln!(conf, "server={server}");
        }

        // One dnsmasq instance per interface; keep them out of each other's
        // way and off the loopback.
        let _ = writeln!(conf, "except-interface=lo");
        let _ = writeln!(conf, "bind-interfaces");

        std::fs::write(&conf_file, conf)?;

        let command = Command::exec(
            priority::START_DAEMON,
            key,
            [
                "dnsmasq".to_owned(),
                format!("--conf-file={}", conf_file.display()),
                format!("--pid-file={}", pid_file.display()),
            ],
        );

        Ok((vec![command], DerivedState::default()))
    }

    fn revert(
        &self,
        section: &ConfigSection,
        _all: &ConfigCollection,
        ctx: &mut ApplyContext,
    ) -> Result<Vec<Command>> {
        let iface_name = section.require_string("interface")?;
        let pid_file = Self::pid_file(&ctx.write_dir, iface_name);

        Ok(vec![Command::kill(
            -priority::START_DAEMON,
            section.key(),
            pid_file,
        )])
    }
}

/// `first = network_address + start`, `last = first + limit`.
fn dhcp_range(ipaddr: Ipv4Addr, prefix: u8, start: i64, limit: i64) -> Result<(Ipv4Addr, Ipv4Addr)> {
    if start < 0 || limit < 0 {
        return Err(Error::validation(
            "dhcp start and limit must be non-negative",
        ));
    }

    let mask = u32::MAX.checked_shl(u32::from(32 - prefix)).unwrap_or(0);
    let network = u32::from(ipaddr) & mask;

    let first = network
        .checked_add(start as u32)
        .ok_or_else(|| Error::validation("dhcp range start overflows the address space"))?;
    let last = first
        .checked_add(limit as u32)
        .ok_or_else(|| Error::validation("dhcp range limit overflows the address space"))?;

    Ok((Ipv4Addr::from(first), Ipv4Addr::from(last)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn range_is_network_address_plus_start() {
        let (first, last) = dhcp_range("192.168.33.66".parse().unwrap(), 24, 100, 100).unwrap();

        assert_eq!(first, "192.168.33.100".parse::<Ipv4Addr>().unwrap());
        assert_eq!(last, "192.168.33.200".parse::<Ipv4Addr>().unwrap());
    }

    #[test]
    fn range_spans_subnet_boundaries_in_wider_networks() {
        let (first, last) = dhcp_range("10.0.0.1".parse().unwrap(), 16, 300, 300).unwrap();

        assert_eq!(first, "10.0.1.44".parse::<Ipv4Addr>().unwrap());
        assert_eq!(last, "10.0.2.88".parse::<Ipv4Addr>().unwrap());
    }

    #[test]
    fn negative_start_is_rejected() {
        assert!(dhcp_range("10.0.0.1".parse().unwrap(), 24, -1, 10).is_err());
    }
}
