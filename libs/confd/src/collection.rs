use std::collections::HashMap;
use std::path::PathBuf;

use crate::section::{ConfigSection, OptionValue, Package, SectionKey, schema_for};
use crate::{Error, Result, parser};

/// Insertion-ordered collection of sections keyed by `(package, type, name)`.
#[derive(Debug, Default)]
pub struct ConfigCollection {
    sections: Vec<ConfigSection>,
    index: HashMap<SectionKey, usize>,
}

impl ConfigCollection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.sections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sections.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ConfigSection> {
        self.sections.iter()
    }

    pub fn keys(&self) -> impl Iterator<Item = &SectionKey> {
        self.sections.iter().map(|s| s.key())
    }

    pub fn get(&self, key: &SectionKey) -> Option<&ConfigSection> {
        self.index.get(key).map(|i| &self.sections[*i])
    }

    pub fn get_mut(&mut self, key: &SectionKey) -> Option<&mut ConfigSection> {
        self.index.get(key).map(|i| &mut self.sections[*i])
    }

    pub(crate) fn insert(&mut self, section: ConfigSection) -> Result<()> {
        if self.index.contains_key(section.key()) {
            return Err(Error::Parse {
                file: section.source().to_path_buf(),
                type_name: section.type_name().to_owned(),
                name: section.name().to_owned(),
                reason: "duplicate section".to_owned(),
            });
        }

        self.index.insert(section.key().clone(), self.sections.len());
        self.sections.push(section);

        Ok(())
    }

    /// Sections of one `(package, type)`, in file order.
    pub fn sections_of<'a>(
        &'a self,
        package: Package,
        type_name: &'a str,
    ) -> impl Iterator<Item = &'a ConfigSection> {
        self.sections
            .iter()
            .filter(move |s| s.package() == package && s.type_name() == type_name)
    }

    /// Cross-section lookup by identity.
    pub fn lookup(&self, package: Package, type_name: &str, name: &str) -> Result<&ConfigSection> {
        let key = SectionKey {
            package,
            type_name: type_name.to_owned(),
            name: name.to_owned(),
        };

        self.get(&key).ok_or(Error::Lookup {
            package,
            type_name: type_name.to_owned(),
            name: name.to_owned(),
        })
    }

    /// Like [`ConfigCollection::lookup`] but falls back to the type's default
    /// section when the schema declares one.
    pub fn lookup_or_default(
        &self,
        package: Package,
        type_name: &str,
        name: &str,
    ) -> Result<ConfigSection> {
        if let Ok(section) = self.lookup(package, type_name, name) {
            return Ok(section.clone());
        }

        let schema = schema_for(type_name).filter(|s| s.package == package && s.named_default);
        let Some(schema) = schema else {
            return Err(Error::Lookup {
                package,
                type_name: type_name.to_owned(),
                name: name.to_owned(),
            });
        };

        let mut section = ConfigSection::new(
            SectionKey {
                package,
                type_name: type_name.to_owned(),
                name: "default".to_owned(),
            },
            true,
            PathBuf::from("<default>"),
        );
        for spec in schema.options {
            if let Some(default) = spec.default {
                let value = parser::coerce_value(spec.kind, default)
                    .unwrap_or_else(|_| OptionValue::String(default.to_owned()));
                section.set(spec.name, value);
            }
        }

        Ok(section)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_dnsmasq_resolves_when_unnamed() {
        let collection = ConfigCollection::new();

        let dnsmasq = collection
            .lookup_or_default(Package::Dhcp, "dnsmasq", "lan")
            .unwrap();

        assert!(!dnsmasq.boolean("noresolv"));
        assert!(dnsmasq.list("server").is_empty());
    }

    #[test]
    fn lookup_without_default_fails() {
        let collection = ConfigCollection::new();

        let err = collection
            .lookup_or_default(Package::Network, "interface", "lan")
            .unwrap_err();

        assert!(matches!(err, Error::Lookup { .. }));
    }
}
