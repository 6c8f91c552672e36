//! Declarative host-network configuration for the Paradrop agent.
//!
//! A UCI-style configuration tree (interfaces, bridges, DHCP pools, DNS,
//! firewall zones and redirects, Wi-Fi radios and APs) is parsed into typed
//! sections, diffed against the previously loaded tree, and reduced to an
//! ordered plan of `ip`/`iptables`/`iw`/`dnsmasq`/`hostapd` invocations.
//! Reverts mirror applies with negated priorities so teardown runs in
//! reverse dependency order.

#![cfg_attr(test, allow(clippy::unwrap_used))]

mod collection;
mod command;
mod error;
mod handlers;
mod manager;
mod parser;
mod section;
pub mod writer;

pub use collection::ConfigCollection;
pub use command::{Command, CommandKind, priority};
pub use error::Error;
pub use manager::ConfigManager;
pub use parser::parse_search;
pub use section::{ConfigSection, OptionValue, Package, SectionKey};

pub type Result<T, E = Error> = std::result::Result<T, E>;
