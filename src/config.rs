// Configuration loading and parsing (gavelcast.toml).

use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error("failed to read config file {path}: {message}")]
    ReadError { path: PathBuf, message: String },

    #[error("failed to parse config file {path}: {source}")]
    ParseError {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("validation error for field `{field}`: {message}")]
    ValidationError { field: String, message: String },
}

// ---------------------------------------------------------------------------
// Config sections
// ---------------------------------------------------------------------------

/// The complete application configuration. Every section has working
/// defaults so the server can start with no config file at all.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub auction: AuctionRules,
    #[serde(default)]
    pub seed: SeedConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    /// Port the WebSocket listener binds.
    #[serde(default = "default_port")]
    pub port: u16,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DatabaseConfig {
    /// Path to the SQLite database file. When omitted, a platform data
    /// directory is used (e.g. ~/.local/share/gavelcast/gavelcast.db).
    #[serde(default)]
    pub path: Option<String>,
}

/// Tunable auction rules. The roster limit and bid validation live in the
/// engine; these are the only knobs it reads.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AuctionRules {
    /// Maximum players a team may own.
    #[serde(default = "default_roster_limit")]
    pub roster_limit: usize,
    /// Budget assigned to seeded teams that don't specify one.
    #[serde(default = "default_budget")]
    pub default_budget: u64,
}

/// First-run seeding: the admin credential, initial teams, and an optional
/// player import CSV. Seeding only runs against an empty ledger.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SeedConfig {
    #[serde(default = "default_admin_username")]
    pub admin_username: String,
    /// Bearer token for the admin credential. No admin is seeded when this
    /// is absent (credential provisioning is an operator input; password
    /// hashing is out of scope).
    #[serde(default)]
    pub admin_token: Option<String>,
    /// CSV of players to import: columns `name,positions,base_price`,
    /// positions pipe-separated (e.g. "GK" or "ST|LW").
    #[serde(default)]
    pub players_csv: Option<PathBuf>,
    #[serde(default)]
    pub teams: Vec<SeedTeam>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SeedTeam {
    pub name: String,
    /// Username for the team's owner credential.
    pub owner: String,
    /// Bearer token for the owner credential.
    pub token: String,
    /// Starting budget; falls back to `auction.default_budget`.
    #[serde(default)]
    pub budget: Option<u64>,
}

fn default_port() -> u16 {
    9700
}

fn default_roster_limit() -> usize {
    8
}

fn default_budget() -> u64 {
    3_000_000
}

fn default_admin_username() -> String {
    "admin".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            port: default_port(),
        }
    }
}

impl Default for AuctionRules {
    fn default() -> Self {
        AuctionRules {
            roster_limit: default_roster_limit(),
            default_budget: default_budget(),
        }
    }
}

impl Default for SeedConfig {
    fn default() -> Self {
        SeedConfig {
            admin_username: default_admin_username(),
            admin_token: None,
            players_csv: None,
            teams: Vec::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

/// Default config file name, looked up in the current directory.
pub const DEFAULT_CONFIG_FILE: &str = "gavelcast.toml";

impl Config {
    /// Load configuration.
    ///
    /// With an explicit `path` the file must exist. With no path,
    /// `gavelcast.toml` in the current directory is used when present,
    /// otherwise built-in defaults apply.
    pub fn load(path: Option<&Path>) -> Result<Config, ConfigError> {
        match path {
            Some(p) => {
                if !p.exists() {
                    return Err(ConfigError::FileNotFound {
                        path: p.to_path_buf(),
                    });
                }
                Self::load_file(p)
            }
            None => {
                let default = Path::new(DEFAULT_CONFIG_FILE);
                if default.exists() {
                    Self::load_file(default)
                } else {
                    Ok(Config::default())
                }
            }
        }
    }

    fn load_file(path: &Path) -> Result<Config, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        let config: Config =
            toml::from_str(&contents).map_err(|source| ConfigError::ParseError {
                path: path.to_path_buf(),
                source,
            })?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.auction.roster_limit == 0 {
            return Err(ConfigError::ValidationError {
                field: "auction.roster_limit".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        if self.auction.default_budget == 0 {
            return Err(ConfigError::ValidationError {
                field: "auction.default_budget".to_string(),
                message: "must be greater than zero".to_string(),
            });
        }
        Ok(())
    }

    /// Resolve the SQLite database path: the configured path, or
    /// `gavelcast.db` under the platform data directory.
    pub fn db_path(&self) -> PathBuf {
        if let Some(path) = &self.database.path {
            return PathBuf::from(path);
        }
        directories::ProjectDirs::from("", "", "gavelcast")
            .map(|dirs| dirs.data_dir().join("gavelcast.db"))
            .unwrap_or_else(|| PathBuf::from("gavelcast.db"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_when_no_file() {
        let config = Config::default();
        assert_eq!(config.server.port, 9700);
        assert_eq!(config.auction.roster_limit, 8);
        assert_eq!(config.auction.default_budget, 3_000_000);
        assert_eq!(config.seed.admin_username, "admin");
        assert!(config.seed.admin_token.is_none());
        assert!(config.seed.teams.is_empty());
    }

    #[test]
    fn explicit_missing_path_is_an_error() {
        let err = Config::load(Some(Path::new("/nonexistent/gavelcast.toml"))).unwrap_err();
        assert!(matches!(err, ConfigError::FileNotFound { .. }));
    }

    #[test]
    fn parse_full_config() {
        let toml_str = r#"
            [server]
            port = 9800

            [database]
            path = "/tmp/test-auction.db"

            [auction]
            roster_limit = 6
            default_budget = 1000000

            [seed]
            admin_username = "root"
            admin_token = "secret-admin"
            players_csv = "players.csv"

            [[seed.teams]]
            name = "Strikers"
            owner = "strikers_owner"
            token = "tok-strikers"
            budget = 2500000

            [[seed.teams]]
            name = "Rovers"
            owner = "rovers_owner"
            token = "tok-rovers"
        "#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.server.port, 9800);
        assert_eq!(config.database.path.as_deref(), Some("/tmp/test-auction.db"));
        assert_eq!(config.auction.roster_limit, 6);
        assert_eq!(config.seed.admin_token.as_deref(), Some("secret-admin"));
        assert_eq!(config.seed.teams.len(), 2);
        assert_eq!(config.seed.teams[0].budget, Some(2_500_000));
        assert_eq!(config.seed.teams[1].budget, None);
        assert_eq!(config.db_path(), PathBuf::from("/tmp/test-auction.db"));
    }

    #[test]
    fn zero_roster_limit_rejected() {
        let toml_str = r#"
            [auction]
            roster_limit = 0
        "#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ValidationError { .. })
        ));
    }

    #[test]
    fn partial_config_fills_defaults() {
        let config: Config = toml::from_str("[server]\nport = 1234\n").unwrap();
        assert_eq!(config.server.port, 1234);
        assert_eq!(config.auction.roster_limit, 8);
    }
}
