use tracing::debug;

use super::client::Transport;
use super::request::build_status_headers;
use crate::config::ClientProfile;
use crate::error::{AuthError, Result};

pub const TOKEN_HEADER: &str = "x-vqd-4";

/// Obtains session tokens from the status endpoint.
///
/// Each call is a single probe with no internal retry. The provider holds no
/// state beyond its configuration.
#[derive(Debug, Clone)]
pub struct TokenProvider {
    status_url: String,
    profile: ClientProfile,
}

impl TokenProvider {
    pub fn new(status_url: impl Into<String>, profile: ClientProfile) -> Self {
        Self {
            status_url: status_url.into(),
            profile,
        }
    }

    pub async fn acquire<T: Transport>(&self, transport: &T) -> Result<String> {
        let headers = build_status_headers(&self.profile);
        let response = transport
            .get(&self.status_url, &headers)
            .await
            .map_err(|e| AuthError::ProbeFailed(e.to_string()))?;

        match response.header(TOKEN_HEADER) {
            Some(token) if !token.is_empty() => {
                debug!(status = response.status, "Session token acquired");
                Ok(token.to_string())
            }
            _ if !response.is_success() => {
                Err(AuthError::ProbeFailed(format!("status endpoint returned {}", response.status)).into())
            }
            _ => Err(AuthError::MissingToken.into()),
        }
    }
}
