use std::path::Path;

use crx_transport::Credentials;
use serde::{Deserialize, Serialize};

use crate::error::{RepositoryError, RepositoryResult};

/// Settings for opening a [`Session`](crate::Session).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub workspace: String,
    pub user_id: String,
    pub password: String,
    /// Create the workspace on login if the backend reports it missing.
    pub auto_create_workspace: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            workspace: "default".to_string(),
            user_id: "admin".to_string(),
            password: "admin".to_string(),
            auto_create_workspace: false,
        }
    }
}

impl SessionConfig {
    /// Parse a TOML document. Missing keys take their default.
    pub fn from_toml_str(s: &str) -> RepositoryResult<Self> {
        toml::from_str(s).map_err(|e| RepositoryError::Config(e.to_string()))
    }

    /// Read and parse a TOML file.
    pub fn load(path: impl AsRef<Path>) -> RepositoryResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| RepositoryError::Config(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&text)
    }

    pub fn credentials(&self) -> Credentials {
        Credentials::new(self.user_id.clone(), self.password.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let c = SessionConfig::default();
        assert_eq!(c.workspace, "default");
        assert_eq!(c.user_id, "admin");
        assert!(!c.auto_create_workspace);
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let c = SessionConfig::from_toml_str("workspace = \"staging\"\nauto_create_workspace = true\n")
            .unwrap();
        assert_eq!(c.workspace, "staging");
        assert!(c.auto_create_workspace);
        assert_eq!(c.user_id, "admin");
    }

    #[test]
    fn malformed_toml_is_config_error() {
        assert!(matches!(
            SessionConfig::from_toml_str("workspace = "),
            Err(RepositoryError::Config(_))
        ));
    }

    #[test]
    fn load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("crx.toml");
        std::fs::write(&path, "user_id = \"alice\"\n").unwrap();
        let c = SessionConfig::load(&path).unwrap();
        assert_eq!(c.user_id, "alice");
        assert_eq!(c.credentials().user_id, "alice");
        assert!(SessionConfig::load(dir.path().join("missing.toml")).is_err());
    }
}
