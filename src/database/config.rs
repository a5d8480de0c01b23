//! Load configuration file support
//!
//! Handles parsing of `.data-load.toml` configuration files and
//! environment variable overrides.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::rc::Rc;

use super::{ConnectionProvider, DatabaseError, DatabaseResult, MemoryDatabase};
use crate::iterator::table_load::LoadMode;

/// Default database filename for DuckDB
pub const DEFAULT_DUCKDB_FILENAME: &str = ".data-load.duckdb";

/// Default configuration filename
pub const CONFIG_FILENAME: &str = ".data-load.toml";

/// Default number of rows per statement batch
pub const DEFAULT_BATCH_SIZE: usize = 1000;

/// Environment variable for the fail-fast flag
pub const ENV_FAIL_FAST: &str = "DATA_LOAD_FAIL_FAST";

/// Environment variable for the row error limit
pub const ENV_MAX_ROW_ERRORS: &str = "DATA_LOAD_MAX_ROW_ERRORS";

/// Environment variable for verbose error reporting
pub const ENV_VERBOSE: &str = "DATA_LOAD_VERBOSE";

/// Environment variable for the batch size
pub const ENV_BATCH_SIZE: &str = "DATA_LOAD_BATCH_SIZE";

/// Environment variable for database backend
pub const ENV_DB_BACKEND: &str = "DATA_LOAD_DB_BACKEND";

/// Environment variable for DuckDB path
pub const ENV_DUCKDB_PATH: &str = "DATA_LOAD_DUCKDB_PATH";

/// Database backend type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseBackendType {
    /// In-process tables (default)
    #[default]
    Memory,
    /// DuckDB embedded database
    DuckDB,
}

impl std::str::FromStr for DatabaseBackendType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "memory" => Ok(DatabaseBackendType::Memory),
            "duckdb" => Ok(DatabaseBackendType::DuckDB),
            _ => Err(format!(
                "Unknown database backend: {}. Use 'memory' or 'duckdb'.",
                s
            )),
        }
    }
}

impl std::fmt::Display for DatabaseBackendType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DatabaseBackendType::Memory => write!(f, "memory"),
            DatabaseBackendType::DuckDB => write!(f, "duckdb"),
        }
    }
}

/// Load behaviour section
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadSection {
    /// Stop at the first row with an error
    #[serde(default = "default_true")]
    pub fail_fast: bool,

    /// Row errors tolerated before the run is stopped
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_row_errors: Option<usize>,

    /// Report every failing row of a field, not only the first
    #[serde(default)]
    pub verbose: bool,

    /// Rows per statement batch
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Alternate between two prepared statements when keys are not reselected
    #[serde(default = "default_true")]
    pub dual_statements: bool,

    /// Insert/import/merge/upsert
    #[serde(default)]
    pub mode: LoadMode,

    /// Accepted missing-value indicators
    #[serde(default = "default_indicators")]
    pub missing_value_indicators: Vec<String>,
}

fn default_true() -> bool {
    true
}

fn default_batch_size() -> usize {
    DEFAULT_BATCH_SIZE
}

fn default_indicators() -> Vec<String> {
    vec!["Q".to_string(), "N".to_string()]
}

impl Default for LoadSection {
    fn default() -> Self {
        Self {
            fail_fast: true,
            max_row_errors: None,
            verbose: false,
            batch_size: default_batch_size(),
            dual_statements: true,
            mode: LoadMode::default(),
            missing_value_indicators: default_indicators(),
        }
    }
}

/// Database configuration section
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseSection {
    /// Database backend type
    #[serde(default)]
    pub backend: DatabaseBackendType,

    /// Path to DuckDB database file (relative to workspace)
    #[serde(default = "default_duckdb_path")]
    pub path: String,
}

fn default_duckdb_path() -> String {
    DEFAULT_DUCKDB_FILENAME.to_string()
}

impl Default for DatabaseSection {
    fn default() -> Self {
        Self {
            backend: DatabaseBackendType::default(),
            path: default_duckdb_path(),
        }
    }
}

/// Main configuration structure
///
/// Represents the `.data-load.toml` configuration file format.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct LoadConfig {
    /// Load behaviour
    #[serde(default)]
    pub load: LoadSection,

    /// Database configuration
    #[serde(default)]
    pub database: DatabaseSection,
}

impl LoadConfig {
    /// Create a new default configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Load configuration from a workspace directory
    ///
    /// Looks for `.data-load.toml` in the workspace directory.
    /// Falls back to defaults if not found.
    pub fn load(workspace_path: &Path) -> DatabaseResult<Self> {
        let config_path = workspace_path.join(CONFIG_FILENAME);

        let mut config = if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)
                .map_err(|e| DatabaseError::IoError(format!("Failed to read config: {}", e)))?;

            Self::parse(&content)?
        } else {
            Self::default()
        };

        config.apply_env_overrides();

        Ok(config)
    }

    /// Parse configuration from TOML string
    pub fn parse(content: &str) -> DatabaseResult<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| DatabaseError::ConfigError(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a workspace directory
    pub fn save(&self, workspace_path: &Path) -> DatabaseResult<()> {
        let config_path = workspace_path.join(CONFIG_FILENAME);
        let content = self.to_toml()?;

        std::fs::write(&config_path, content)
            .map_err(|e| DatabaseError::IoError(format!("Failed to write config: {}", e)))?;

        Ok(())
    }

    /// Convert configuration to TOML string
    pub fn to_toml(&self) -> DatabaseResult<String> {
        toml::to_string_pretty(self).map_err(|e| {
            DatabaseError::SerializationError(format!("Failed to serialize config: {}", e))
        })
    }

    /// Reject settings the pipeline cannot run with
    pub fn validate(&self) -> DatabaseResult<()> {
        if self.load.batch_size == 0 {
            return Err(DatabaseError::ConfigError(
                "batch_size must be at least 1".to_string(),
            ));
        }
        if self
            .load
            .missing_value_indicators
            .iter()
            .any(|i| i.trim().is_empty())
        {
            return Err(DatabaseError::ConfigError(
                "missing_value_indicators cannot contain blank entries".to_string(),
            ));
        }
        Ok(())
    }

    /// Apply environment variable overrides
    pub fn apply_env_overrides(&mut self) {
        if let Ok(value) = std::env::var(ENV_FAIL_FAST)
            && let Some(flag) = parse_flag(&value)
        {
            self.load.fail_fast = flag;
        }

        if let Ok(value) = std::env::var(ENV_MAX_ROW_ERRORS)
            && let Ok(max) = value.parse()
        {
            self.load.max_row_errors = Some(max);
        }

        if let Ok(value) = std::env::var(ENV_VERBOSE)
            && let Some(flag) = parse_flag(&value)
        {
            self.load.verbose = flag;
        }

        if let Ok(value) = std::env::var(ENV_BATCH_SIZE)
            && let Ok(size) = value.parse::<usize>()
            && size > 0
        {
            self.load.batch_size = size;
        }

        if let Ok(backend) = std::env::var(ENV_DB_BACKEND)
            && let Ok(backend_type) = backend.parse()
        {
            self.database.backend = backend_type;
        }

        if let Ok(path) = std::env::var(ENV_DUCKDB_PATH) {
            self.database.path = path;
        }
    }

    /// Get the DuckDB database path for a workspace
    pub fn get_duckdb_path(&self, workspace_path: &Path) -> PathBuf {
        if self.database.path.is_empty() {
            workspace_path.join(DEFAULT_DUCKDB_FILENAME)
        } else if Path::new(&self.database.path).is_absolute() {
            PathBuf::from(&self.database.path)
        } else {
            workspace_path.join(&self.database.path)
        }
    }

    /// Open the configured store for a workspace
    pub fn connection_provider(
        &self,
        workspace_path: &Path,
    ) -> DatabaseResult<Rc<dyn ConnectionProvider>> {
        match self.database.backend {
            DatabaseBackendType::Memory => Ok(Rc::new(MemoryDatabase::new())),
            #[cfg(feature = "duckdb-backend")]
            DatabaseBackendType::DuckDB => {
                let path = self.get_duckdb_path(workspace_path);
                tracing::info!("Opening DuckDB store at {}", path.display());
                Ok(Rc::new(super::DuckDbProvider::new(path)?))
            }
            #[cfg(not(feature = "duckdb-backend"))]
            DatabaseBackendType::DuckDB => {
                let _ = workspace_path;
                Err(DatabaseError::ConfigError(
                    "DuckDB backend requires the 'duckdb-backend' feature".to_string(),
                ))
            }
        }
    }

    /// Check if configuration exists in a workspace
    pub fn exists(workspace_path: &Path) -> bool {
        workspace_path.join(CONFIG_FILENAME).exists()
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Generate a sample configuration file content
pub fn sample_config() -> &'static str {
    r#"# Data Load SDK Configuration

[load]
# Stop the whole run at the first row with an error
fail_fast = true

# Row errors tolerated before the run is stopped (defaults to 1, or 1000
# when fail_fast is disabled)
# max_row_errors = 100

# Report every failing row of a field instead of only the first one
verbose = false

# Rows per statement batch (forced to 1 when generated keys are re-read)
batch_size = 1000

# Alternate between two prepared statements when keys are not re-read
dual_statements = true

# Load mode: "insert", "import", "merge" or "upsert"
mode = "import"

# Accepted missing-value indicators
missing_value_indicators = ["Q", "N"]

[database]
# Database backend: "memory" (default) or "duckdb"
backend = "memory"

# Path to DuckDB database file (relative to workspace, or absolute)
path = ".data-load.duckdb"
"#
}
