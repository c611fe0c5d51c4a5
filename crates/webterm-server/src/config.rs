//! Server configuration: TOML file + environment + CLI overrides.

use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};
use webterm_core::{CoreError, CoreResult};

/// Environment variable holding the hex-encoded token secret.
pub const SECRET_ENV: &str = "WEBTERM_SECRET";

/// Top-level config file structure.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub auth: AuthSection,
    #[serde(default)]
    pub terminal: TerminalSection,
}

/// `[server]` section of the config TOML.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerSection {
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default = "default_path")]
    pub path: String,
    #[serde(default = "default_max_frame_bytes")]
    pub max_frame_bytes: usize,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            path: default_path(),
            max_frame_bytes: default_max_frame_bytes(),
        }
    }
}

/// `[auth]` section of the config TOML.
#[derive(Debug, Clone, Deserialize)]
pub struct AuthSection {
    /// Hex-encoded HMAC secret used to sign principal tokens.
    #[serde(default)]
    pub secret: Option<String>,
    #[serde(default = "default_allowed_origins")]
    pub allowed_origins: Vec<String>,
}

impl Default for AuthSection {
    fn default() -> Self {
        Self {
            secret: None,
            allowed_origins: default_allowed_origins(),
        }
    }
}

/// `[terminal]` section of the config TOML.
#[derive(Debug, Clone, Deserialize)]
pub struct TerminalSection {
    #[serde(default)]
    pub shell: Option<String>,
    #[serde(default)]
    pub cwd: Option<String>,
    #[serde(default = "default_keepalive_secs")]
    pub keepalive_secs: u64,
    #[serde(default = "default_kill_grace_ms")]
    pub kill_grace_ms: u64,
}

impl Default for TerminalSection {
    fn default() -> Self {
        Self {
            shell: None,
            cwd: None,
            keepalive_secs: default_keepalive_secs(),
            kill_grace_ms: default_kill_grace_ms(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:8090".to_string()
}
fn default_path() -> String {
    "/ws/terminal".to_string()
}
fn default_max_frame_bytes() -> usize {
    1_048_576
}
fn default_allowed_origins() -> Vec<String> {
    vec!["http://localhost:3000".to_string()]
}
fn default_keepalive_secs() -> u64 {
    30
}
fn default_kill_grace_ms() -> u64 {
    2000
}

/// Values given on the command line; each replaces its file counterpart.
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub bind: Option<String>,
    pub shell: Option<String>,
    pub allow_origins: Vec<String>,
}

/// Resolved server configuration (paths expanded, overrides applied).
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind: SocketAddr,
    /// Request path of the terminal upgrade endpoint.
    pub path: String,
    pub max_frame_bytes: usize,
    pub secret: Vec<u8>,
    pub allowed_origins: Vec<String>,
    pub shell: Option<String>,
    pub cwd: Option<PathBuf>,
    pub keepalive_interval: Duration,
    /// How long teardown waits for the killed shell to be reaped.
    pub kill_grace: Duration,
}

impl ServerConfig {
    /// Load config from a TOML file, then apply environment and CLI overrides.
    pub fn load(config_path: Option<&Path>, cli: &CliOverrides) -> CoreResult<Self> {
        let file_config = match config_path {
            Some(path) => {
                let expanded = expand_tilde(path);
                if expanded.exists() {
                    info!(path = %expanded.display(), "loading config file");
                    let content = std::fs::read_to_string(&expanded)?;
                    toml::from_str::<ConfigFile>(&content)
                        .map_err(|e| CoreError::Config(format!("config parse error: {e}")))?
                } else {
                    info!(path = %expanded.display(), "config file not found, using defaults");
                    ConfigFile::default()
                }
            }
            None => ConfigFile::default(),
        };

        let env_secret = std::env::var(SECRET_ENV).ok();
        Self::resolve(file_config, cli, env_secret.as_deref())
    }

    /// Merge a parsed file with overrides and validate the result.
    pub fn resolve(
        file: ConfigFile,
        cli: &CliOverrides,
        env_secret: Option<&str>,
    ) -> CoreResult<Self> {
        let bind_str = cli.bind.clone().unwrap_or(file.server.bind);
        let bind: SocketAddr = bind_str
            .parse()
            .map_err(|e| CoreError::Config(format!("invalid bind address {bind_str:?}: {e}")))?;

        if !file.server.path.starts_with('/') {
            return Err(CoreError::Config(format!(
                "terminal path must start with '/': {:?}",
                file.server.path
            )));
        }

        let secret = match env_secret.or(file.auth.secret.as_deref()) {
            Some(hex_secret) => {
                let secret = hex::decode(hex_secret.trim())
                    .map_err(|e| CoreError::Config(format!("secret is not valid hex: {e}")))?;
                if secret.is_empty() {
                    return Err(CoreError::Config("secret must not be empty".into()));
                }
                secret
            }
            None => {
                warn!("no token secret configured, generated an ephemeral one; minted tokens will not validate across restarts");
                webterm_core::generate_secret()?
            }
        };

        let allowed_origins = if cli.allow_origins.is_empty() {
            file.auth.allowed_origins
        } else {
            cli.allow_origins.clone()
        };

        if file.terminal.keepalive_secs == 0 {
            return Err(CoreError::Config("keepalive_secs must be > 0".into()));
        }

        Ok(Self {
            bind,
            path: file.server.path,
            max_frame_bytes: file.server.max_frame_bytes,
            secret,
            allowed_origins,
            shell: cli.shell.clone().or(file.terminal.shell),
            cwd: file.terminal.cwd.as_deref().map(expand_tilde_str),
            keepalive_interval: Duration::from_secs(file.terminal.keepalive_secs),
            kill_grace: Duration::from_millis(file.terminal.kill_grace_ms),
        })
    }
}

/// Expand `~` to the user's home directory.
pub fn expand_tilde(path: &Path) -> PathBuf {
    let s = path.to_string_lossy();
    expand_tilde_str(&s)
}

fn expand_tilde_str(s: &str) -> PathBuf {
    if let Some(rest) = s.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(s)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults() {
        let cfg =
            ServerConfig::resolve(ConfigFile::default(), &CliOverrides::default(), Some("abcd"))
                .unwrap();
        assert_eq!(cfg.bind, "127.0.0.1:8090".parse::<SocketAddr>().unwrap());
        assert_eq!(cfg.path, "/ws/terminal");
        assert_eq!(cfg.allowed_origins, vec!["http://localhost:3000"]);
        assert_eq!(cfg.keepalive_interval, Duration::from_secs(30));
        assert_eq!(cfg.kill_grace, Duration::from_millis(2000));
        assert_eq!(cfg.secret, vec![0xab, 0xcd]);
        assert!(cfg.shell.is_none());
    }

    #[test]
    fn parses_file_and_applies_cli() {
        let file: ConfigFile = toml::from_str(
            r#"
            [server]
            bind = "0.0.0.0:9000"

            [auth]
            secret = "00ff"
            allowed_origins = ["https://admin.example.com"]

            [terminal]
            shell = "/bin/zsh"
            keepalive_secs = 10
            "#,
        )
        .unwrap();

        let cli = CliOverrides {
            bind: None,
            shell: Some("/bin/sh".into()),
            allow_origins: vec![],
        };
        let cfg = ServerConfig::resolve(file, &cli, None).unwrap();
        assert_eq!(cfg.bind.port(), 9000);
        assert_eq!(cfg.secret, vec![0x00, 0xff]);
        assert_eq!(cfg.allowed_origins, vec!["https://admin.example.com"]);
        assert_eq!(cfg.shell.as_deref(), Some("/bin/sh"));
        assert_eq!(cfg.keepalive_interval, Duration::from_secs(10));
    }

    #[test]
    fn env_secret_wins_over_file() {
        let mut file = ConfigFile::default();
        file.auth.secret = Some("00".into());
        let cfg = ServerConfig::resolve(file, &CliOverrides::default(), Some("11")).unwrap();
        assert_eq!(cfg.secret, vec![0x11]);
    }

    #[test]
    fn cli_origins_replace_file_list() {
        let cli = CliOverrides {
            allow_origins: vec!["https://a.test".into(), "https://b.test".into()],
            ..Default::default()
        };
        let cfg = ServerConfig::resolve(ConfigFile::default(), &cli, Some("aa")).unwrap();
        assert_eq!(cfg.allowed_origins, vec!["https://a.test", "https://b.test"]);
    }

    #[test]
    fn rejects_bad_values() {
        let cli = CliOverrides {
            bind: Some("not an address".into()),
            ..Default::default()
        };
        assert!(ServerConfig::resolve(ConfigFile::default(), &cli, Some("aa")).is_err());

        assert!(
            ServerConfig::resolve(ConfigFile::default(), &CliOverrides::default(), Some("xyz"))
                .is_err()
        );

        let mut file = ConfigFile::default();
        file.terminal.keepalive_secs = 0;
        assert!(ServerConfig::resolve(file, &CliOverrides::default(), Some("aa")).is_err());
    }

    #[test]
    fn generates_secret_when_missing() {
        let cfg = ServerConfig::resolve(ConfigFile::default(), &CliOverrides::default(), None)
            .unwrap();
        assert_eq!(cfg.secret.len(), 32);
    }

    #[test]
    fn load_reads_file_from_disk() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[server]\npath = \"/terminal\"").unwrap();
        let cfg = ServerConfig::load(Some(file.path()), &CliOverrides::default()).unwrap();
        assert_eq!(cfg.path, "/terminal");
    }

    #[test]
    fn load_missing_file_uses_defaults() {
        let cfg = ServerConfig::load(
            Some(Path::new("/nonexistent/webterm/config.toml")),
            &CliOverrides::default(),
        )
        .unwrap();
        assert_eq!(cfg.path, "/ws/terminal");
    }
}
