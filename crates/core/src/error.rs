use thiserror::Error;

#[derive(Error, Debug)]
pub enum TablaError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialize(String),

    #[error("Table not found: {0}")]
    TableNotFound(String),

    #[error("Record not found: {0}")]
    RecordNotFound(String),

    #[error("Field not found: {0}")]
    FieldNotFound(String),

    #[error("Task has no fields to calculate")]
    EmptyFieldSet,

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("{0}")]
    Other(String),
}

impl From<serde_json::Error> for TablaError {
    fn from(e: serde_json::Error) -> Self {
        TablaError::Serialize(e.to_string())
    }
}
