use thiserror::Error;

#[derive(Error, Debug)]
pub enum OrmError {
    #[error("Schema definition error: {0}")]
    SchemaDefinition(String),

    #[error("Field '{0}' not found in schema '{1}'")]
    FieldNotFound(String, String),

    #[error("Type mismatch: {0}")]
    TypeMismatch(String),

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Table '{0}' is already registered")]
    TableRegistered(String),

    #[error("No connection available for database '{0}'")]
    ConnectorUnavailable(String),

    #[error("Connector error: {0}")]
    Connector(String),

    #[error("Unsupported operation: {0}")]
    UnsupportedOperation(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    IoError(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, OrmError>;

impl From<std::io::Error> for OrmError {
    fn from(err: std::io::Error) -> Self {
        Self::IoError(err.to_string())
    }
}

impl OrmError {
    /// True for the "no pool/connection for this database" failure, which callers
    /// degrade into an empty result instead of surfacing.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::ConnectorUnavailable(_))
    }
}
