/// Errors produced while planning or executing a chute update.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The request or chute definition is invalid (name too long, missing
    /// required field, unsupported option).
    #[error("{0}")]
    Validation(String),

    /// A finite resource ran out (subnet pool, Wi-Fi radios).
    #[error("{0}")]
    ResourceExhausted(String),

    #[error(transparent)]
    Container(#[from] ContainerError),

    /// An external helper (the veth glue tool) failed.
    #[error("command `{command}` failed: {reason}")]
    External { command: String, reason: String },

    #[error(transparent)]
    Confd(#[from] paradrop_confd::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    pub(crate) fn validation(msg: impl Into<String>) -> Self {
        Error::Validation(msg.into())
    }
}

/// Failures reported by the container engine.
#[derive(Debug, thiserror::Error)]
pub enum ContainerError {
    #[error("chute not found: {0}")]
    NotFound(String),

    #[error("chute is not running: {0}")]
    NotRunning(String),

    #[error("image build failed: {0}")]
    Build(String),

    #[error("image pull failed: {0}")]
    Pull(String),

    #[error("container engine error: {0}")]
    Engine(String),
}
