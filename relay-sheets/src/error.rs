use thiserror::Error;

pub type Result<T> = std::result::Result<T, SheetError>;

#[derive(Debug, Error)]
pub enum SheetError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("http error: {0}")]
    Http(String),

    #[error("script endpoint returned status {status}: {body}")]
    Status { status: u16, body: String },

    /// The script answered 2xx but reported `ok: false`.
    #[error("script rejected update: {0}")]
    Rejected(String),
}

impl From<reqwest::Error> for SheetError {
    fn from(e: reqwest::Error) -> Self {
        Self::Http(e.to_string())
    }
}
