//! Typed section model: schemas are data, sections are uniform records.
//!
//! Every section type is described by a [`SectionSchema`] (option names,
//! value kinds, required flags, defaults). Parsing, validation, equality,
//! and diffing are one implementation regardless of section kind; the
//! type-specific behavior lives in the handlers.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use crate::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Package {
    Network,
    Wireless,
    Firewall,
    Dhcp,
}

impl fmt::Display for Package {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Package::Network => "network",
            Package::Wireless => "wireless",
            Package::Firewall => "firewall",
            Package::Dhcp => "dhcp",
        };
        f.write_str(name)
    }
}

/// Identity of a section: `(package, type, name)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SectionKey {
    pub package: Package,
    pub type_name: String,
    pub name: String,
}

impl fmt::Display for SectionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{} '{}'", self.package, self.type_name, self.name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptionKind {
    String,
    Integer,
    Boolean,
    List,
}

/// A single option a schema declares.
#[derive(Debug, Clone, Copy)]
pub struct OptionSpec {
    pub name: &'static str,
    pub kind: OptionKind,
    pub required: bool,
    pub default: Option<&'static str>,
}

impl OptionSpec {
    pub(crate) const fn new(name: &'static str, kind: OptionKind) -> Self {
        OptionSpec {
            name,
            kind,
            required: false,
            default: None,
        }
    }

    pub(crate) const fn required(name: &'static str, kind: OptionKind) -> Self {
        OptionSpec {
            name,
            kind,
            required: true,
            default: None,
        }
    }

    pub(crate) const fn with_default(
        name: &'static str,
        kind: OptionKind,
        default: &'static str,
    ) -> Self {
        OptionSpec {
            name,
            kind,
            required: false,
            default: Some(default),
        }
    }
}

pub struct SectionSchema {
    pub package: Package,
    pub type_name: &'static str,
    pub options: &'static [OptionSpec],
    /// A named default section exists for this type and is returned by
    /// lookups that opt into it when no name matches.
    pub named_default: bool,
}

use OptionKind::{Boolean, Integer, List, String as Str};

static SCHEMAS: &[SectionSchema] = &[
    SectionSchema {
        package: Package::Network,
        type_name: "interface",
        options: &[
            OptionSpec::new("type", Str),
            OptionSpec::required("proto", Str),
            OptionSpec::new("ifname", List),
            OptionSpec::new("ipaddr", Str),
            OptionSpec::new("netmask", Str),
            OptionSpec::new("gateway", Str),
        ],
        named_default: false,
    },
    SectionSchema {
        package: Package::Firewall,
        type_name: "zone",
        options: &[
            OptionSpec::new("name", Str),
            OptionSpec::new("network", List),
            OptionSpec::with_default("input", Str, "ACCEPT"),
            OptionSpec::with_default("output", Str, "ACCEPT"),
            OptionSpec::with_default("forward", Str, "REJECT"),
            OptionSpec::with_default("masq", Boolean, "0"),
            OptionSpec::with_default("conntrack", Boolean, "0"),
        ],
        named_default: false,
    },
    SectionSchema {
        package: Package::Firewall,
        type_name: "redirect",
        options: &[
            OptionSpec::new("name", Str),
            OptionSpec::new("src", Str),
            OptionSpec::new("src_ip", Str),
            OptionSpec::new("src_dip", Str),
            OptionSpec::new("src_port", Str),
            OptionSpec::with_default("proto", Str, "tcpudp"),
            OptionSpec::new("dest", Str),
            OptionSpec::new("dest_ip", Str),
            OptionSpec::new("dest_port", Str),
            OptionSpec::with_default("target", Str, "DNAT"),
        ],
        named_default: false,
    },
    SectionSchema {
        package: Package::Dhcp,
        type_name: "dnsmasq",
        options: &[
            OptionSpec::new("interface", List),
            OptionSpec::with_default("noresolv", Boolean, "0"),
            OptionSpec::new("server", List),
        ],
        named_default: true,
    },
    SectionSchema {
        package: Package::Dhcp,
        type_name: "dhcp",
        options: &[
            OptionSpec::required("interface", Str),
            OptionSpec::with_default("leasetime", Str, "12h"),
            OptionSpec::with_default("limit", Integer, "150"),
            OptionSpec::with_default("start", Integer, "100"),
            OptionSpec::new("dhcp_option", List),
        ],
        named_default: false,
    },
    SectionSchema {
        package: Package::Wireless,
        type_name: "wifi-device",
        options: &[
            OptionSpec::required("type", Str),
            OptionSpec::required("channel", Integer),
            OptionSpec::new("hwmode", Str),
            OptionSpec::new("txpower", Integer),
            OptionSpec::new("country", Str),
            OptionSpec::new("require_mode", Str),
            OptionSpec::new("htmode", Str),
            OptionSpec::new("beacon_int", Integer),
            OptionSpec::new("frag", Integer),
            OptionSpec::new("rts", Integer),
            // 802.11n capabilities
            OptionSpec::new("short_gi_20", Boolean),
            OptionSpec::new("short_gi_40", Boolean),
            OptionSpec::new("tx_stbc", Integer),
            OptionSpec::new("rx_stbc", Integer),
            OptionSpec::new("dsss_cck_40", Boolean),
            // 802.11ac capabilities
            OptionSpec::new("short_gi_80", Boolean),
            OptionSpec::new("short_gi_160", Boolean),
            OptionSpec::new("tx_stbc_2by1", Boolean),
        ],
        named_default: false,
    },
    SectionSchema {
        package: Package::Wireless,
        type_name: "wifi-iface",
        options: &[
            OptionSpec::required("device", Str),
            OptionSpec::required("mode", Str),
            OptionSpec::required("ssid", Str),
            OptionSpec::with_default("hidden", Boolean, "0"),
            OptionSpec::with_default("wmm", Boolean, "1"),
            OptionSpec::required("network", Str),
            OptionSpec::new("encryption", Str),
            OptionSpec::new("key", Str),
            OptionSpec::new("maxassoc", Integer),
            // Desired name for the virtual interface; not part of the UCI
            // vocabulary but honored when present.
            OptionSpec::new("ifname", Str),
        ],
        named_default: false,
    },
];

pub(crate) fn schema_for(type_name: &str) -> Option<&'static SectionSchema> {
    SCHEMAS.iter().find(|s| s.type_name == type_name)
}

/// A typed option value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OptionValue {
    String(String),
    Integer(i64),
    Boolean(bool),
    List(Vec<String>),
}

impl fmt::Display for OptionValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OptionValue::String(s) => f.write_str(s),
            OptionValue::Integer(i) => write!(f, "{i}"),
            OptionValue::Boolean(b) => f.write_str(if *b { "1" } else { "0" }),
            OptionValue::List(items) => f.write_str(&items.join(" ")),
        }
    }
}

/// Runtime state a handler derives while applying a section.
///
/// Not part of the equality relation; survives reconciliation so reverts can
/// undo exactly what was done.
#[derive(Debug, Clone, Default)]
pub struct DerivedState {
    /// Name of the virtual Wi-Fi interface this section created, if any.
    pub created_vif: Option<String>,
}

/// A single `config <type> <name>` block with its options.
#[derive(Debug, Clone)]
pub struct ConfigSection {
    key: SectionKey,
    anonymous: bool,
    source: PathBuf,
    options: BTreeMap<String, OptionValue>,
    state: DerivedState,
}

impl ConfigSection {
    pub(crate) fn new(key: SectionKey, anonymous: bool, source: PathBuf) -> Self {
        ConfigSection {
            key,
            anonymous,
            source,
            options: BTreeMap::new(),
            state: DerivedState::default(),
        }
    }

    pub fn key(&self) -> &SectionKey {
        &self.key
    }

    pub fn package(&self) -> Package {
        self.key.package
    }

    pub fn type_name(&self) -> &str {
        &self.key.type_name
    }

    pub fn name(&self) -> &str {
        &self.key.name
    }

    pub fn is_anonymous(&self) -> bool {
        self.anonymous
    }

    pub fn source(&self) -> &Path {
        &self.source
    }

    pub fn get(&self, option: &str) -> Option<&OptionValue> {
        self.options.get(option)
    }

    pub(crate) fn set(&mut self, option: impl Into<String>, value: OptionValue) {
        self.options.insert(option.into(), value);
    }

    pub fn string(&self, option: &str) -> Option<&str> {
        match self.options.get(option)? {
            OptionValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn integer(&self, option: &str) -> Option<i64> {
        match self.options.get(option)? {
            OptionValue::Integer(i) => Some(*i),
            _ => None,
        }
    }

    pub fn boolean(&self, option: &str) -> bool {
        matches!(self.options.get(option), Some(OptionValue::Boolean(true)))
    }

    pub fn list(&self, option: &str) -> &[String] {
        match self.options.get(option) {
            Some(OptionValue::List(items)) => items,
            _ => &[],
        }
    }

    /// Like [`ConfigSection::string`] but a missing option is an error.
    pub fn require_string(&self, option: &str) -> Result<&str> {
        self.string(option).ok_or_else(|| {
            Error::validation(format!("section {} is missing option '{option}'", self.key))
        })
    }

    pub(crate) fn state(&self) -> &DerivedState {
        &self.state
    }

    pub(crate) fn set_state(&mut self, state: DerivedState) {
        self.state = state;
    }

    /// True iff the two sections have the same type and identical option
    /// values, ignoring the section name.
    pub fn options_match(&self, other: &ConfigSection) -> bool {
        self.key.package == other.key.package
            && self.key.type_name == other.key.type_name
            && self.options == other.options
    }
}

/// Equality is identity plus option values; provenance and derived runtime
/// state do not participate.
impl PartialEq for ConfigSection {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key && self.options == other.options
    }
}

impl Eq for ConfigSection {}

impl fmt::Display for ConfigSection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn section(type_name: &str, name: &str) -> ConfigSection {
        let schema = schema_for(type_name).unwrap();
        ConfigSection::new(
            SectionKey {
                package: schema.package,
                type_name: type_name.to_owned(),
                name: name.to_owned(),
            },
            false,
            PathBuf::from("test"),
        )
    }

    #[test]
    fn options_match_ignores_name() {
        let mut a = section("wifi-device", "radio0");
        let mut b = section("wifi-device", "radio1");

        a.set("channel", OptionValue::Integer(1));
        b.set("channel", OptionValue::Integer(6));
        assert!(!a.options_match(&b));

        b.set("channel", OptionValue::Integer(1));
        assert!(a.options_match(&b));
        assert!(b.options_match(&a));
        assert!(a.options_match(&a));

        // Different identity, so not equal, even though options match.
        assert_ne!(a, b);
    }

    #[test]
    fn sections_of_different_type_never_match() {
        let device = section("wifi-device", "radio0");
        let iface = section("wifi-iface", "radio0");

        assert!(!device.options_match(&iface));
    }

    #[test]
    fn derived_state_is_not_part_of_equality() {
        let a = section("interface", "lan");
        let mut b = section("interface", "lan");
        b.set_state(DerivedState {
            created_vif: Some("wlan0".to_owned()),
        });

        assert_eq!(a, b);
    }
}
