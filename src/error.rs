use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("authentication error: {0}")]
    Auth(#[from] AuthError),

    #[error("api error: {0}")]
    Api(#[from] ApiError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("http error: {0}")]
    Http(String),

    #[error("stream read error: {0}")]
    Stream(String),

    #[error("request timed out after {0:?}")]
    Timeout(Duration),
}

impl Error {
    /// Returns a user-friendly suggestion for how to resolve this error
    pub fn suggestion(&self) -> Option<&'static str> {
        match self {
            Error::Auth(AuthError::MissingToken) => {
                Some("The status endpoint returned no session token, the client profile may be outdated")
            }
            Error::Auth(AuthError::ProbeFailed(_)) => {
                Some("Check your internet connection and try again")
            }
            Error::Api(ApiError::TransientService { .. }) => {
                Some("The service is throttling this client, wait a minute before retrying")
            }
            Error::Stream(_) => Some("The response was interrupted, send the message again"),
            Error::Timeout(_) => Some("Check your internet connection or raise client.timeout_secs"),
            _ => None,
        }
    }

    /// HTTP status carried by the error, if the failure came from a response.
    pub fn status(&self) -> Option<u16> {
        match self {
            Error::Api(ApiError::TransientService { status, .. }) => Some(*status),
            Error::Api(ApiError::Status { status, .. }) => Some(*status),
            _ => None,
        }
    }
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("status probe failed: {0}")]
    ProbeFailed(String),

    #[error("status probe returned no session token")]
    MissingToken,
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("service rejected the request ({status}) after {retries} retries")]
    TransientService { status: u16, retries: u32 },

    #[error("HTTP {status}: {message}")]
    Status { status: u16, message: String },
}

pub type Result<T> = std::result::Result<T, Error>;
