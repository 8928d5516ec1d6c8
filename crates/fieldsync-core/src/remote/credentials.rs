//! Credential providers
//!
//! A missing credential is a normal outcome (`None`), not an error: it is
//! how the engine learns that the user must sign in again.

use std::path::PathBuf;

use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::warn;

/// Supplies the bearer token for remote calls
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    async fn get_token(&self) -> Option<String>;
}

/// A token held in memory
#[derive(Debug, Default)]
pub struct StaticCredentials {
    token: RwLock<Option<String>>,
}

impl StaticCredentials {
    pub fn new(token: Option<String>) -> Self {
        Self {
            token: RwLock::new(token),
        }
    }

    pub fn set(&self, token: Option<String>) {
        *self.token.write() = token;
    }
}

#[async_trait]
impl CredentialProvider for StaticCredentials {
    async fn get_token(&self) -> Option<String> {
        self.token.read().clone()
    }
}

/// A token read from a file on every call, so `fieldsync login` in another
/// process takes effect without a restart
#[derive(Debug, Clone)]
pub struct FileCredentials {
    path: PathBuf,
}

impl FileCredentials {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }
}

#[async_trait]
impl CredentialProvider for FileCredentials {
    async fn get_token(&self) -> Option<String> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => {
                let token = content.trim();
                if token.is_empty() {
                    None
                } else {
                    Some(token.to_string())
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => {
                warn!("Failed to read token file {:?}: {}", self.path, e);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_static_credentials() {
        let creds = StaticCredentials::new(None);
        assert!(creds.get_token().await.is_none());

        creds.set(Some("secret".to_string()));
        assert_eq!(creds.get_token().await.as_deref(), Some("secret"));
    }

    #[tokio::test]
    async fn test_file_credentials() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("token");
        let creds = FileCredentials::new(&path);

        // Missing file means signed out
        assert!(creds.get_token().await.is_none());

        std::fs::write(&path, "  abc123\n").unwrap();
        assert_eq!(creds.get_token().await.as_deref(), Some("abc123"));

        std::fs::write(&path, "\n").unwrap();
        assert!(creds.get_token().await.is_none());
    }
}
