//! Per-type section behaviors.
//!
//! Handlers are looked up by `(package, type)`; each contributes forward
//! commands on apply and symmetric teardown commands on revert. Section
//! types that only carry data for other handlers (wifi-device, dnsmasq)
//! resolve to the null handler.

mod dhcp;
mod firewall;
mod network;
mod wireless;

use std::collections::HashSet;
use std::net::Ipv4Addr;
use std::path::PathBuf;

use crate::collection::ConfigCollection;
use crate::command::Command;
use crate::section::{ConfigSection, DerivedState, Package};
use crate::{Error, Result};

pub(crate) use network::interface_ifname;

/// Scratch state shared by all handlers during one reconciliation.
pub(crate) struct ApplyContext {
    pub write_dir: PathBuf,
    /// Virtual Wi-Fi interface names already created (by surviving sections
    /// or earlier in this load). The first section to reference an unclaimed
    /// name creates the device and owns its teardown.
    pub claimed_vifs: HashSet<String>,
}

impl ApplyContext {
    pub(crate) fn new(write_dir: PathBuf) -> Self {
        ApplyContext {
            write_dir,
            claimed_vifs: HashSet::new(),
        }
    }
}

pub(crate) trait SectionHandler: Sync {
    fn apply(
        &self,
        section: &ConfigSection,
        all: &ConfigCollection,
        ctx: &mut ApplyContext,
    ) -> Result<(Vec<Command>, DerivedState)>;

    fn revert(
        &self,
        section: &ConfigSection,
        all: &ConfigCollection,
        ctx: &mut ApplyContext,
    ) -> Result<Vec<Command>>;

    /// Minimal-change apply for an edited section. `None` means the handler
    /// has no cheaper path and the manager falls back to full revert+apply.
    fn update_apply(
        &self,
        old: &ConfigSection,
        new: &ConfigSection,
        all: &ConfigCollection,
        ctx: &mut ApplyContext,
    ) -> Option<Result<(Vec<Command>, DerivedState)>> {
        let _ = (old, new, all, ctx);
        None
    }

    fn update_revert(
        &self,
        old: &ConfigSection,
        new: &ConfigSection,
        all: &ConfigCollection,
        ctx: &mut ApplyContext,
    ) -> Option<Result<Vec<Command>>> {
        let _ = (old, new, all, ctx);
        None
    }
}

struct NullHandler;

impl SectionHandler for NullHandler {
    fn apply(
        &self,
        _: &ConfigSection,
        _: &ConfigCollection,
        _: &mut ApplyContext,
    ) -> Result<(Vec<Command>, DerivedState)> {
        Ok((Vec::new(), DerivedState::default()))
    }

    fn revert(
        &self,
        _: &ConfigSection,
        _: &ConfigCollection,
        _: &mut ApplyContext,
    ) -> Result<Vec<Command>> {
        Ok(Vec::new())
    }
}

static INTERFACE: network::InterfaceHandler = network::InterfaceHandler;
static ZONE: firewall::ZoneHandler = firewall::ZoneHandler;
static REDIRECT: firewall::RedirectHandler = firewall::RedirectHandler;
static DHCP: dhcp::DhcpHandler = dhcp::DhcpHandler;
static WIFI_IFACE: wireless::WifiIfaceHandler = wireless::WifiIfaceHandler;
static NULL: NullHandler = NullHandler;

pub(crate) fn handler_for(section: &ConfigSection) -> &'static dyn SectionHandler {
    match (section.package(), section.type_name()) {
        (Package::Network, "interface") => &INTERFACE,
        (Package::Firewall, "zone") => &ZONE,
        (Package::Firewall, "redirect") => &REDIRECT,
        (Package::Dhcp, "dhcp") => &DHCP,
        (Package::Wireless, "wifi-iface") => &WIFI_IFACE,
        // wifi-device and dnsmasq are schema-only; consumed by other handlers.
        _ => &NULL,
    }
}

/// Converts a dotted netmask into a prefix length, rejecting non-contiguous
/// masks.
pub(crate) fn netmask_prefix(netmask: &str) -> Result<u8> {
    let addr: Ipv4Addr = netmask
        .parse()
        .map_err(|_| Error::validation(format!("invalid netmask '{netmask}'")))?;

    let bits = u32::from(addr);
    let prefix = bits.leading_ones();
    let expected = u32::MAX
        .checked_shl(32 - prefix)
        .unwrap_or(0);
    if bits != expected {
        return Err(Error::validation(format!(
            "netmask '{netmask}' is not contiguous"
        )));
    }

    Ok(prefix as u8)
}
