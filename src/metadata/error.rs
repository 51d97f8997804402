use thiserror::Error;

#[derive(Error, Debug)]
pub enum MetadataError {
    #[error("{0} not found")]
    NotFound(String),

    #[error("Duplicate record: {0}")]
    Duplicate(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Corrupt record: {0}")]
    Corrupt(String),

    #[error("Database error: {0}")]
    Database(String),
}

impl From<sqlx::Error> for MetadataError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                MetadataError::Duplicate(db.message().to_string())
            }
            sqlx::Error::Database(db) if db.is_foreign_key_violation() => {
                MetadataError::InvalidInput(db.message().to_string())
            }
            _ => MetadataError::Database(err.to_string()),
        }
    }
}

impl From<crate::integrity::IntegrityError> for MetadataError {
    fn from(err: crate::integrity::IntegrityError) -> Self {
        MetadataError::Corrupt(err.to_string())
    }
}

pub type MetadataResult<T> = Result<T, MetadataError>;
