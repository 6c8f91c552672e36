use std::path::PathBuf;

use crate::section::Package;

/// Errors surfaced by parsing, section lookup, and command execution.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Malformed or schema-invalid configuration. The whole parse fails; no
    /// partial acceptance.
    #[error("{file}: invalid section '{type_name} {name}': {reason}")]
    Parse {
        file: PathBuf,
        type_name: String,
        name: String,
        reason: String,
    },

    /// A section referenced another section that does not exist.
    #[error("no section {package}.{type_name} named '{name}'")]
    Lookup {
        package: Package,
        type_name: String,
        name: String,
    },

    /// The configuration is well-formed but describes something we refuse to
    /// act on (unsupported mode, bad netmask, ...).
    #[error("{0}")]
    Validation(String),

    /// A host command exited non-zero, timed out, or could not be spawned.
    #[error("command `{command}` failed: {reason}")]
    Command { command: String, reason: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    pub(crate) fn validation(msg: impl Into<String>) -> Self {
        Error::Validation(msg.into())
    }
}
