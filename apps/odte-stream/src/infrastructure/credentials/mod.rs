//! Access Token Provider
//!
//! Reads the venue access token on every call so an external refresher can
//! rotate it without restarting the ingestor. A fixed token can be supplied
//! instead for local runs.
//!
//! The token file holds either the bare token or a JSON object with an
//! `access_token` field.

use std::fmt;
use std::path::PathBuf;

use async_trait::async_trait;
use serde::Deserialize;

use crate::application::ports::{TokenProvider, UpstreamError};

#[derive(Deserialize)]
struct TokenFile {
    access_token: String,
}

/// Token provider backed by a file, with an optional fixed override.
pub struct FileTokenProvider {
    path: Option<PathBuf>,
    fixed: Option<String>,
}

impl fmt::Debug for FileTokenProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileTokenProvider")
            .field("path", &self.path)
            .field("fixed", &self.fixed.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

impl FileTokenProvider {
    /// Provider reading from `path`.
    #[must_use]
    pub fn from_file(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
            fixed: None,
        }
    }

    /// Provider returning a fixed token, falling back to `path` when the
    /// token is empty.
    #[must_use]
    pub fn new(path: Option<PathBuf>, fixed: Option<String>) -> Self {
        Self {
            path,
            fixed: fixed.filter(|t| !t.trim().is_empty()),
        }
    }

    async fn read_file(&self) -> Result<String, UpstreamError> {
        let Some(path) = &self.path else {
            return Err(UpstreamError::CredentialUnavailable(
                "no access token or token file configured".to_string(),
            ));
        };

        let raw = tokio::fs::read_to_string(path).await.map_err(|e| {
            UpstreamError::CredentialUnavailable(format!("{}: {e}", path.display()))
        })?;

        let token = parse_token(&raw);
        if token.is_empty() {
            return Err(UpstreamError::CredentialUnavailable(format!(
                "{} is empty",
                path.display()
            )));
        }
        Ok(token)
    }
}

fn parse_token(raw: &str) -> String {
    let trimmed = raw.trim();
    serde_json::from_str::<TokenFile>(trimmed)
        .map_or_else(|_| trimmed.to_string(), |file| file.access_token.trim().to_string())
}

#[async_trait]
impl TokenProvider for FileTokenProvider {
    async fn bearer_token(&self) -> Result<String, UpstreamError> {
        if let Some(token) = &self.fixed {
            return Ok(token.trim().to_string());
        }
        self.read_file().await
    }
}
