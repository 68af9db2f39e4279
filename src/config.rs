//! Server configuration (filedeck.toml)

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Config file looked up in the working directory when `--config` is absent.
pub const DEFAULT_CONFIG_FILE: &str = "filedeck.toml";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Config file not found: {0}")]
    NotFound(String),
    #[error("Failed to read config: {0}")]
    ReadError(String),
    #[error("Failed to parse config: {0}")]
    ParseError(String),
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ServerConfig {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub files: FilesSection,
    #[serde(default)]
    pub archive: ArchiveSection,
    #[serde(default)]
    pub terminal: TerminalSection,
    #[serde(default)]
    pub logging: LoggingSection,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSection {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub cors: bool,
    /// Directory with the browser client, served for any unmatched route
    pub static_dir: Option<PathBuf>,
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            cors: false,
            static_dir: None,
            max_upload_bytes: default_max_upload_bytes(),
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    3000
}

fn default_max_upload_bytes() -> usize {
    512 * 1024 * 1024
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilesSection {
    /// Base for relative paths and requests without a path (default: cwd)
    pub root_dir: Option<PathBuf>,
    /// When set, every requested path must resolve under this directory
    pub sandbox_root: Option<PathBuf>,
    #[serde(default = "default_max_read_bytes")]
    pub max_read_bytes: u64,
}

impl Default for FilesSection {
    fn default() -> Self {
        Self {
            root_dir: None,
            sandbox_root: None,
            max_read_bytes: default_max_read_bytes(),
        }
    }
}

fn default_max_read_bytes() -> u64 {
    10 * 1024 * 1024
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchiveSection {
    #[serde(default = "default_ignores")]
    pub default_ignores: Vec<String>,
    #[serde(default = "default_true")]
    pub use_gitignore: bool,
    #[serde(default = "default_branches")]
    pub branches: Vec<String>,
    #[serde(default = "default_fetch_timeout")]
    pub fetch_timeout_secs: u64,
    pub exports_dir: Option<PathBuf>,
}

impl Default for ArchiveSection {
    fn default() -> Self {
        Self {
            default_ignores: default_ignores(),
            use_gitignore: true,
            branches: default_branches(),
            fetch_timeout_secs: default_fetch_timeout(),
            exports_dir: None,
        }
    }
}

fn default_ignores() -> Vec<String> {
    vec!["node_modules".to_string()]
}

fn default_branches() -> Vec<String> {
    vec!["main".to_string(), "master".to_string()]
}

fn default_fetch_timeout() -> u64 {
    120
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TerminalSection {
    /// 0 disables the timeout
    #[serde(default = "default_command_timeout")]
    pub command_timeout_secs: u64,
}

impl Default for TerminalSection {
    fn default() -> Self {
        Self {
            command_timeout_secs: default_command_timeout(),
        }
    }
}

fn default_command_timeout() -> u64 {
    600
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct LoggingSection {
    #[serde(default)]
    pub audit: bool,
    pub audit_dir: Option<PathBuf>,
}

impl ServerConfig {
    /// Load config from an explicit file. A missing file is an error here.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.display().to_string()));
        }

        let content =
            fs::read_to_string(path).map_err(|e| ConfigError::ReadError(e.to_string()))?;

        toml::from_str(&content).map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    /// Load `filedeck.toml` from `dir` if present, defaults otherwise.
    pub fn load_or_default(dir: &Path) -> Result<Self, ConfigError> {
        let path = dir.join(DEFAULT_CONFIG_FILE);
        if path.exists() {
            Self::load(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Apply `FILEDECK_HOST`, `FILEDECK_PORT` and `FILEDECK_ROOT`.
    pub fn apply_env(&mut self) {
        if let Ok(host) = std::env::var("FILEDECK_HOST") {
            if !host.is_empty() {
                self.server.host = host;
            }
        }
        if let Some(port) = std::env::var("FILEDECK_PORT")
            .ok()
            .and_then(|p| p.parse::<u16>().ok())
        {
            self.server.port = port;
        }
        if let Ok(root) = std::env::var("FILEDECK_ROOT") {
            if !root.is_empty() {
                self.files.root_dir = Some(PathBuf::from(root));
            }
        }
    }

    /// Effective root directory for relative paths: `root_dir`, else the
    /// sandbox root, else the working directory.
    pub fn root_dir(&self) -> PathBuf {
        self.files
            .root_dir
            .clone()
            .or_else(|| self.files.sandbox_root.clone())
            .or_else(|| std::env::current_dir().ok())
            .unwrap_or_else(|| PathBuf::from("/"))
    }

    pub fn exports_dir(&self) -> PathBuf {
        self.archive
            .exports_dir
            .clone()
            .unwrap_or_else(|| std::env::temp_dir().join("filedeck-exports"))
    }

    /// Audit log directory, if auditing is enabled.
    pub fn audit_dir(&self) -> Option<PathBuf> {
        match &self.logging.audit_dir {
            Some(dir) => Some(dir.clone()),
            None if self.logging.audit => crate::util::audit_log::AuditLog::default_dir(),
            None => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.server.port, 3000);
        assert_eq!(config.archive.branches, vec!["main", "master"]);
        assert_eq!(config.archive.default_ignores, vec!["node_modules"]);
        assert!(config.archive.use_gitignore);
        assert!(config.files.sandbox_root.is_none());
        assert_eq!(config.terminal.command_timeout_secs, 600);
        assert!(config.audit_dir().is_none());
    }

    #[test]
    fn test_parse_config() {
        let toml_str = r#"
[server]
port = 8080
cors = true

[files]
sandbox_root = "/srv/share"

[archive]
branches = ["trunk"]
default_ignores = ["node_modules", "target"]

[terminal]
command_timeout_secs = 0
"#;
        let config: ServerConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.server.host, "127.0.0.1");
        assert!(config.server.cors);
        assert_eq!(config.files.sandbox_root, Some(PathBuf::from("/srv/share")));
        assert_eq!(config.archive.branches, vec!["trunk"]);
        assert_eq!(config.archive.default_ignores.len(), 2);
        assert_eq!(config.terminal.command_timeout_secs, 0);
    }

    #[test]
    fn test_load_or_default_without_file() {
        let temp = TempDir::new().unwrap();
        let config = ServerConfig::load_or_default(temp.path()).unwrap();
        assert_eq!(config.server.port, 3000);
    }

    #[test]
    fn test_load_reports_parse_errors() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join(DEFAULT_CONFIG_FILE);
        fs::write(&path, "[server]\nport = \"not a number\"\n").unwrap();

        assert!(matches!(
            ServerConfig::load(&path),
            Err(ConfigError::ParseError(_))
        ));
        assert!(matches!(
            ServerConfig::load(&temp.path().join("missing.toml")),
            Err(ConfigError::NotFound(_))
        ));
    }
}
