use thiserror::Error;

#[derive(Error, Debug)]
pub enum IntegrityError {
    #[error("Invalid checksum encoding: {0}")]
    InvalidChecksum(String),
}

pub type IntegrityResult<T> = Result<T, IntegrityError>;
