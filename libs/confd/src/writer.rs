//! Renders generated UCI configuration files.
//!
//! The chute pipeline synthesizes sections (bridge interfaces, Wi-Fi APs,
//! DHCP pools, firewall redirects) and writes them to the config directory
//! this crate's parser reads back.

use std::io;
use std::path::Path;

use crate::section::OptionValue;

/// One section to render, in declaration order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SectionSpec {
    pub type_name: String,
    pub name: Option<String>,
    pub options: Vec<(String, OptionValue)>,
}

impl SectionSpec {
    pub fn new(type_name: impl Into<String>, name: Option<String>) -> Self {
        SectionSpec {
            type_name: type_name.into(),
            name,
            options: Vec::new(),
        }
    }

    pub fn option(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.options
            .push((key.into(), OptionValue::String(value.into())));
        self
    }

    pub fn value(mut self, key: impl Into<String>, value: OptionValue) -> Self {
        self.options.push((key.into(), value));
        self
    }
}

pub fn render_sections(sections: &[SectionSpec]) -> String {
    let mut out = String::new();

    for section in sections {
        match &section.name {
            Some(name) => {
                out.push_str(&format!("config {} {}\n", section.type_name, name));
            }
            None => out.push_str(&format!("config {}\n", section.type_name)),
        }

        for (key, value) in &section.options {
            match value {
                OptionValue::List(items) => {
                    for item in items {
                        out.push_str(&format!("    list {key} '{item}'\n"));
                    }
                }
                other => out.push_str(&format!("    option {key} '{other}'\n")),
            }
        }

        out.push('\n');
    }

    out
}

/// Writes `content` to `path` and reports whether the file actually changed.
///
/// The caller uses the result to decide whether a reload is needed at all.
pub fn write_if_changed(path: &Path, content: &str) -> io::Result<bool> {
    match std::fs::read_to_string(path) {
        Ok(existing) if existing == content => return Ok(false),
        Ok(_) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(e),
    }

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, content)?;

    Ok(true)
}
