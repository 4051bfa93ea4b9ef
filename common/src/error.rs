use thiserror::Error;

/// Input rejected before anything is sent to the device.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Selecciona un archivo primero")]
    NoFileSelected,
    #[error("{0} no puede estar vacío")]
    EmptyField(&'static str),
    #[error("invalid schedule slot id {0} (expected 1-3)")]
    InvalidSlotId(i64),
    #[error("Selecciona un modo primero.")]
    NoModeSelected,
    #[error("a firmware update is already in progress")]
    UpdateInProgress,
}

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("malformed slot body: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("slot body is missing the `{0}` selector")]
    MissingSelector(&'static str),
    #[error(transparent)]
    Invalid(#[from] ValidationError),
    #[error("unknown slot protocol `{0}`")]
    UnknownProtocol(String),
}
