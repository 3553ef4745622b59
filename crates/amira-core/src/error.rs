use thiserror::Error;

pub type AmiraResult<T> = Result<T, AmiraError>;

#[derive(Debug, Error)]
pub enum AmiraError {
    #[error("config error: {0}")]
    Config(String),

    #[error("invalid check-in: {0}")]
    InvalidCheckin(String),

    #[error("unknown emotion: {0}")]
    UnknownEmotion(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
