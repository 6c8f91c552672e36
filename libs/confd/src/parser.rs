//! UCI-style config parser.
//!
//! Grammar: a stream of `config <type> [<name>]` blocks, each followed by
//! `option <key> '<value>'` or `list <key> '<value>'` lines. Values may be
//! single-quoted, double-quoted, or bare; `#` starts a comment. Anonymous
//! sections are named `@<type>[<index>]`.

use std::collections::HashMap;
use std::path::Path;

use crate::collection::ConfigCollection;
use crate::section::{ConfigSection, OptionKind, OptionValue, SectionKey, schema_for};
use crate::{Error, Result};

/// Parses a single file or every regular file in a directory.
pub fn parse_search(search: &Path) -> Result<ConfigCollection> {
    let mut collection = ConfigCollection::new();
    let mut anon_counters = HashMap::new();

    if search.is_dir() {
        let mut paths = std::fs::read_dir(search)?
            .collect::<std::io::Result<Vec<_>>>()?
            .into_iter()
            .map(|entry| entry.path())
            .filter(|path| {
                path.is_file()
                    && !path
                        .file_name()
                        .is_some_and(|n| n.to_string_lossy().starts_with('.'))
            })
            .collect::<Vec<_>>();
        paths.sort();

        for path in paths {
            parse_file(&path, &mut collection, &mut anon_counters)?;
        }
    } else {
        parse_file(search, &mut collection, &mut anon_counters)?;
    }

    Ok(collection)
}

fn parse_file(
    path: &Path,
    collection: &mut ConfigCollection,
    anon_counters: &mut HashMap<String, usize>,
) -> Result<()> {
    let content = std::fs::read_to_string(path)?;

    let mut pending: Option<ConfigSection> = None;

    for (lineno, raw) in content.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let tokens = split_tokens(line).map_err(|reason| parse_error(path, &pending, reason))?;
        let Some((keyword, rest)) = tokens.split_first() else {
            continue;
        };

        match keyword.as_str() {
            "config" => {
                finish_section(collection, pending.take())?;
                pending = Some(start_section(path, rest, anon_counters, lineno)?);
            }
            "option" | "list" => {
                let [key, value] = rest else {
                    return Err(parse_error(
                        path,
                        &pending,
                        format!("line {}: '{keyword}' expects a key and a value", lineno + 1),
                    ));
                };

                let Some(section) = pending.as_mut() else {
                    return Err(Error::Parse {
                        file: path.to_path_buf(),
                        type_name: String::new(),
                        name: String::new(),
                        reason: format!("line {}: '{keyword}' outside of a section", lineno + 1),
                    });
                };

                let (type_name, name) = (section.type_name().to_owned(), section.name().to_owned());
                set_option(section, keyword == "list", key, value).map_err(|reason| {
                    Error::Parse {
                        file: path.to_path_buf(),
                        type_name,
                        name,
                        reason,
                    }
                })?;
            }
            other => {
                return Err(parse_error(
                    path,
                    &pending,
                    format!("line {}: unrecognized keyword '{other}'", lineno + 1),
                ));
            }
        }
    }

    finish_section(collection, pending.take())?;

    Ok(())
}

fn start_section(
    path: &Path,
    rest: &[String],
    anon_counters: &mut HashMap<String, usize>,
    lineno: usize,
) -> Result<ConfigSection> {
    let (type_name, name) = match rest {
        [type_name] => {
            let counter = anon_counters.entry(type_name.clone()).or_insert(0);
            let name = format!("@{type_name}[{counter}]");
            *counter += 1;
            (type_name.clone(), name)
        }
        [type_name, name] => (type_name.clone(), name.clone()),
        _ => {
            return Err(Error::Parse {
                file: path.to_path_buf(),
                type_name: String::new(),
                name: String::new(),
                reason: format!("line {}: 'config' expects a type and optional name", lineno + 1),
            });
        }
    };

    let schema = schema_for(&type_name).ok_or_else(|| Error::Parse {
        file: path.to_path_buf(),
        type_name: type_name.clone(),
        name: name.clone(),
        reason: format!("unknown section type '{type_name}'"),
    })?;

    let key = SectionKey {
        package: schema.package,
        type_name,
        name: name.clone(),
    };

    Ok(ConfigSection::new(
        key,
        name.starts_with('@'),
        path.to_path_buf(),
    ))
}

fn set_option(section: &mut ConfigSection, is_list: bool, key: &str, value: &str) -> Result<(), String> {
    let spec = schema_for(section.type_name())
        .into_iter()
        .flat_map(|s| s.options.iter())
        .find(|o| o.name == key);

    match spec {
        Some(spec) if spec.kind == OptionKind::List || is_list => {
            let mut items = match section.get(key) {
                Some(OptionValue::List(items)) => items.clone(),
                _ => Vec::new(),
            };
            items.push(value.to_owned());
            section.set(key, OptionValue::List(items));
        }
        Some(spec) => {
            let coerced = coerce_value(spec.kind, value)
                .map_err(|reason| format!("option '{key}': {reason}"))?;
            section.set(key, coerced);
        }
        // Unknown options are preserved as strings but not acted upon.
        None if is_list => {
            let mut items = match section.get(key) {
                Some(OptionValue::List(items)) => items.clone(),
                _ => Vec::new(),
            };
            items.push(value.to_owned());
            section.set(key, OptionValue::List(items));
        }
        None => section.set(key, OptionValue::String(value.to_owned())),
    }

    Ok(())
}

fn finish_section(collection: &mut ConfigCollection, section: Option<ConfigSection>) -> Result<()> {
    let Some(mut section) = section else {
        return Ok(());
    };

    let Some(schema) = schema_for(section.type_name()) else {
        return Ok(());
    };

    for spec in schema.options {
        if section.get(spec.name).is_none() {
            if let Some(default) = spec.default {
                let value = coerce_value(spec.kind, default).map_err(|reason| Error::Parse {
                    file: section.source().to_path_buf(),
                    type_name: section.type_name().to_owned(),
                    name: section.name().to_owned(),
                    reason: format!("option '{}': {reason}", spec.name),
                })?;
                section.set(spec.name, value);
            } else if spec.required {
                return Err(Error::Parse {
                    file: section.source().to_path_buf(),
                    type_name: section.type_name().to_owned(),
                    name: section.name().to_owned(),
                    reason: format!("missing required option '{}'", spec.name),
                });
            }
        }
    }

    collection.insert(section)
}

pub(crate) fn coerce_value(kind: OptionKind, value: &str) -> Result<OptionValue, String> {
    match kind {
        OptionKind::String => Ok(OptionValue::String(value.to_owned())),
        OptionKind::Integer => value
            .parse()
            .map(OptionValue::Integer)
            .map_err(|_| format!("expected an integer, got '{value}'")),
        OptionKind::Boolean => match value {
            "1" | "on" | "true" | "yes" | "enabled" => Ok(OptionValue::Boolean(true)),
            "0" | "off" | "false" | "no" | "disabled" => Ok(OptionValue::Boolean(false)),
            _ => Err(format!("expected a boolean, got '{value}'")),
        },
        OptionKind::List => Ok(OptionValue::List(vec![value.to_owned()])),
    }
}

/// Splits a line into tokens, honoring single and double quotes.
fn split_tokens(line: &str) -> Result<Vec<String>, String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut quote: Option<char> = None;
    let mut in_token = false;

    for c in line.chars() {
        match quote {
            Some(q) if c == q => quote = None,
            Some(_) => current.push(c),
            None => match c {
                '\'' | '"' => {
                    quote = Some(c);
                    in_token = true;
                }
                c if c.is_whitespace() => {
                    if in_token {
                        tokens.push(std::mem::take(&mut current));
                        in_token = false;
                    }
                }
                '#' if !in_token => break,
                _ => {
                    current.push(c);
                    in_token = true;
                }
            },
        }
    }

    if quote.is_some() {
        return Err("unterminated quote".to_owned());
    }
    if in_token {
        tokens.push(current);
    }

    Ok(tokens)
}

fn parse_error(path: &Path, pending: &Option<ConfigSection>, reason: String) -> Error {
    let (type_name, name) = pending
        .as_ref()
        .map(|s| (s.type_name().to_owned(), s.name().to_owned()))
        .unwrap_or_default();

    Error::Parse {
        file: path.to_path_buf(),
        type_name,
        name,
        reason,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;

    fn parse_str(content: &str) -> Result<ConfigCollection> {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        parse_search(file.path())
    }

    #[test]
    fn parses_sections_with_options_and_lists() {
        let collection = parse_str(
            "
config interface lan
    option proto 'static'
    option ipaddr '192.168.1.1'
    option netmask \"255.255.255.0\"
    list ifname 'eth1'
    list ifname 'eth2'
",
        )
        .unwrap();

        let lan = collection
            .lookup(crate::Package::Network, "interface", "lan")
            .unwrap();
        assert_eq!(lan.string("proto"), Some("static"));
        assert_eq!(lan.list("ifname"), ["eth1", "eth2"]);
    }

    #[test]
    fn anonymous_sections_get_synthesized_names() {
        let collection = parse_str(
            "
config zone
    option name 'wan'
    option proto_ignored 'x'

config zone
    option name 'lan'
",
        )
        .unwrap();

        let names: Vec<_> = collection.keys().map(|k| k.name.clone()).collect();
        assert_eq!(names, ["@zone[0]", "@zone[1]"]);
    }

    #[test]
    fn option_on_list_kind_becomes_single_element_list() {
        let collection = parse_str(
            "
config zone wan
    option network 'wan'
",
        )
        .unwrap();

        let zone = collection
            .lookup(crate::Package::Firewall, "zone", "wan")
            .unwrap();
        assert_eq!(zone.list("network"), ["wan"]);
    }

    #[test]
    fn unknown_type_is_rejected() {
        let err = parse_str("config nonsense foo\n").unwrap_err();

        assert!(matches!(err, Error::Parse { .. }));
        assert!(err.to_string().contains("nonsense"));
    }

    #[test]
    fn missing_required_option_fails_the_whole_parse() {
        let err = parse_str(
            "
config wifi-iface ap
    option device 'radio0'
    option mode 'ap'
    option network 'lan'
",
        )
        .unwrap_err();

        assert!(err.to_string().contains("ssid"));
    }

    #[test]
    fn wrong_scalar_kind_is_a_parse_error() {
        let err = parse_str(
            "
config wifi-device radio0
    option type 'auto'
    option channel 'not-a-number'
",
        )
        .unwrap_err();

        assert!(err.to_string().contains("channel"));
    }

    #[test]
    fn defaults_are_filled_in() {
        let collection = parse_str(
            "
config dhcp lan
    option interface 'lan'
",
        )
        .unwrap();

        let dhcp = collection.lookup(crate::Package::Dhcp, "dhcp", "lan").unwrap();
        assert_eq!(dhcp.integer("start"), Some(100));
        assert_eq!(dhcp.integer("limit"), Some(150));
        assert_eq!(dhcp.string("leasetime"), Some("12h"));
    }
}
