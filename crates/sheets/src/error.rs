use thiserror::Error;

#[derive(Debug, Error)]
pub enum SheetsError {
    /// A required identifier or credential is absent.  Raised before any
    /// network call is made.
    #[error("missing configuration: {0}")]
    ConfigurationMissing(String),
    /// The remote store could not be reached.
    #[error("remote store unavailable: {0}")]
    Unavailable(String),
    /// The remote store answered but refused the request (auth, quota, bad range).
    #[error("remote store rejected request ({status}): {body}")]
    Rejected { status: u16, body: String },
    #[error("remote store did not answer within {0}s")]
    Timeout(u64),
    #[error("unexpected response from remote store: {0}")]
    MalformedResponse(String),
}

impl From<reqwest::Error> for SheetsError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            SheetsError::MalformedResponse(err.to_string())
        } else {
            SheetsError::Unavailable(err.to_string())
        }
    }
}
