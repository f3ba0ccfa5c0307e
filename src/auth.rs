//! Session token sources.
//!
//! A [`TokenSource`] is asked for a token before every connection attempt.  Tokens are never
//! cached here; a source that wants caching does it itself.

use std::env;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Issues short-lived session tokens.
#[async_trait::async_trait]
pub trait TokenSource: Send + Sync {
    /// Fetch a token for the next connection attempt.
    ///
    /// `Ok(None)` means there is no signed-in session and no connection should be attempted.
    async fn token(&self) -> Result<Option<String>>;
}

fn non_empty(token: &str) -> Option<String> {
    let token = token.trim();
    if token.is_empty() {
        None
    } else {
        Some(token.to_string())
    }
}

/// A fixed token, or none at all.
#[derive(Clone, Debug, Default)]
pub struct StaticToken {
    token: Option<String>,
}

impl StaticToken {
    /// Always return `token`.
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: non_empty(&token.into()),
        }
    }

    /// Never return a token.
    pub fn signed_out() -> Self {
        Self { token: None }
    }
}

#[async_trait::async_trait]
impl TokenSource for StaticToken {
    async fn token(&self) -> Result<Option<String>> {
        Ok(self.token.clone())
    }
}

/// Reads the token from an environment variable on every call.
#[derive(Clone, Debug)]
pub struct EnvToken {
    var: String,
}

impl EnvToken {
    /// Read the token from `var`.
    pub fn new(var: impl Into<String>) -> Self {
        Self { var: var.into() }
    }

    /// The variable this source reads.
    pub fn var(&self) -> &str {
        &self.var
    }
}

#[async_trait::async_trait]
impl TokenSource for EnvToken {
    async fn token(&self) -> Result<Option<String>> {
        match env::var(&self.var) {
            Ok(token) => Ok(non_empty(&token)),
            Err(env::VarError::NotPresent) => Ok(None),
            Err(env::VarError::NotUnicode(_)) => Err(Error::encoding(
                format!("{} is not valid unicode", self.var),
                None,
            )),
        }
    }
}

/// Reads the token from a file on every call, so an external process can rotate it.
///
/// A missing or empty file means signed out.
#[derive(Clone, Debug)]
pub struct FileToken {
    path: PathBuf,
}

impl FileToken {
    /// Read the token from `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// The file this source reads.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait::async_trait]
impl TokenSource for FileToken {
    async fn token(&self) -> Result<Option<String>> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(token) => Ok(non_empty(&token)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Error::io(
                format!("could not read token file {}", self.path.display()),
                e,
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn static_token() {
        assert_eq!(
            StaticToken::new("abc123").token().await.unwrap().as_deref(),
            Some("abc123")
        );
        assert!(StaticToken::new("  ").token().await.unwrap().is_none());
        assert!(StaticToken::signed_out().token().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn env_token_missing_variable_is_signed_out() {
        let source = EnvToken::new("IDEAGEN_TEST_TOKEN_THAT_IS_NEVER_SET");
        assert!(source.token().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn file_token_is_reread() {
        let path = env::temp_dir().join(format!("ideagen-token-{}", std::process::id()));
        let source = FileToken::new(&path);
        assert!(source.token().await.unwrap().is_none());

        std::fs::write(&path, "first\n").unwrap();
        assert_eq!(source.token().await.unwrap().as_deref(), Some("first"));

        std::fs::write(&path, "second").unwrap();
        assert_eq!(source.token().await.unwrap().as_deref(), Some("second"));

        std::fs::write(&path, "").unwrap();
        assert!(source.token().await.unwrap().is_none());
        std::fs::remove_file(&path).unwrap();
    }
}
