//! Sync configuration
//!
//! ```yaml
//! deployment: mirror            # sink database, identifies the checkpoint
//! source_database: app          # qualifies change log namespaces
//! prefix: "m_"
//! field_case: snake_case
//! initial_position: earliest
//! tail:
//!   max_retries: 86400
//!   retry_interval_ms: 1000
//! datasets:
//!   users:
//!     _id: VARCHAR(24)
//!     name: VARCHAR(255)
//!     age: INT
//! ```
//!
//! `${VAR}` and `${VAR:-default}` are expanded from the environment before
//! parsing.

use crate::common::{DatasetMap, DefinitionRegistry, FieldCase, TailOptions, DEFAULT_ID_FIELD};
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::LazyLock;
use std::time::Duration;

/// Pre-compiled regex for environment variable expansion
/// Pattern: ${VAR} or ${VAR:-default}
static ENV_VAR_REGEX: LazyLock<regex::Regex> = LazyLock::new(|| {
    regex::Regex::new(r"\$\{([a-zA-Z_][a-zA-Z0-9_]*)(?::-([^}]*))?\}")
        .expect("env var regex pattern is invalid - this is a bug")
});

/// Where to start tailing when the deployment has no stored checkpoint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InitialPosition {
    /// From the beginning of the change log
    #[default]
    Earliest,
    /// From the newest change log entry
    Latest,
}

/// Tail cursor settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TailConfig {
    /// Empty-batch retries before the cursor closes
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Delay between cursor retries, also the wait after a failed open
    #[serde(default = "default_retry_interval_ms")]
    pub retry_interval_ms: u64,
}

fn default_max_retries() -> u32 {
    60 * 60 * 24
}

fn default_retry_interval_ms() -> u64 {
    1000
}

impl Default for TailConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            retry_interval_ms: default_retry_interval_ms(),
        }
    }
}

impl TailConfig {
    pub fn retry_interval(&self) -> Duration {
        Duration::from_millis(self.retry_interval_ms)
    }

    pub fn options(&self) -> TailOptions {
        TailOptions {
            max_retries: self.max_retries,
            retry_interval: self.retry_interval(),
            ..TailOptions::default()
        }
    }
}

fn default_id_field() -> String {
    DEFAULT_ID_FIELD.to_string()
}

/// Default checkpoint table name for SQL sinks.
pub const DEFAULT_CHECKPOINT_TABLE: &str = "docsync_checkpoint";

fn default_checkpoint_table() -> String {
    DEFAULT_CHECKPOINT_TABLE.to_string()
}

/// Root configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Sink database name; identifies the stored checkpoint
    pub deployment: String,
    /// Source database name; namespaces are `source_database.dataset`
    pub source_database: String,
    /// Sink table name prefix
    #[serde(default)]
    pub prefix: String,
    /// Case conversion for sink column names
    #[serde(default)]
    pub field_case: FieldCase,
    /// Identifier field of source documents
    #[serde(default = "default_id_field")]
    pub id_field: String,
    /// Dataset → field → sink column type
    pub datasets: DatasetMap,
    #[serde(default)]
    pub tail: TailConfig,
    #[serde(default)]
    pub initial_position: InitialPosition,
    /// Checkpoint table used by SQL sinks
    #[serde(default = "default_checkpoint_table")]
    pub checkpoint_table: String,
}

impl SyncConfig {
    /// Load configuration from a YAML file
    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::from_yaml_str(&content)
    }

    /// Parse configuration from YAML text
    pub fn from_yaml_str(content: &str) -> anyhow::Result<Self> {
        let expanded = Self::expand_env_vars(content);

        let config: Self = serde_yaml::from_str(&expanded).context("Failed to parse config")?;

        config.validate()?;
        Ok(config)
    }

    /// Expand environment variables in the format ${VAR} or ${VAR:-default}
    fn expand_env_vars(content: &str) -> String {
        ENV_VAR_REGEX
            .replace_all(content, |caps: &regex::Captures| {
                let var_name = &caps[1];
                let default = caps.get(2).map(|m| m.as_str());

                std::env::var(var_name).unwrap_or_else(|_| default.unwrap_or("").to_string())
            })
            .to_string()
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.deployment.is_empty() {
            anyhow::bail!("'deployment' must not be empty");
        }
        if self.source_database.is_empty() {
            anyhow::bail!("'source_database' must not be empty");
        }
        if self.id_field.is_empty() {
            anyhow::bail!("'id_field' must not be empty");
        }
        if self.datasets.is_empty() {
            anyhow::bail!("At least one dataset must be configured");
        }
        if self.tail.retry_interval_ms == 0 {
            anyhow::bail!("'tail.retry_interval_ms' must be greater than zero");
        }
        if self.checkpoint_table.is_empty() {
            anyhow::bail!("'checkpoint_table' must not be empty");
        }

        for (name, fields) in &self.datasets {
            if name.is_empty() {
                anyhow::bail!("Dataset names must not be empty");
            }
            if !fields.contains_key(&self.id_field) {
                anyhow::bail!(
                    "Dataset '{}' must declare the identifier field '{}'",
                    name,
                    self.id_field
                );
            }
            for (field, column_type) in fields {
                if field.is_empty() {
                    anyhow::bail!("Dataset '{}' has an empty field name", name);
                }
                if column_type.trim().is_empty() {
                    anyhow::bail!("Field '{}.{}' must have a column type", name, field);
                }
            }
            if format!("{}{}", self.prefix, name) == self.checkpoint_table {
                anyhow::bail!(
                    "Dataset '{}' maps onto the checkpoint table '{}'",
                    name,
                    self.checkpoint_table
                );
            }
        }

        Ok(())
    }

    /// Definition registry for this configuration.
    pub fn registry(&self) -> DefinitionRegistry {
        DefinitionRegistry::new(&self.source_database, &self.prefix, self.field_case)
            .with_id_field(&self.id_field)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
deployment: mirror
source_database: app
datasets:
  users:
    _id: VARCHAR(24)
    name: VARCHAR(255)
    age: INT
  orders:
    _id: VARCHAR(24)
    total: DECIMAL(10,2)
"#;

    #[test]
    fn test_defaults() {
        let config = SyncConfig::from_yaml_str(MINIMAL).unwrap();
        assert_eq!(config.prefix, "");
        assert_eq!(config.field_case, FieldCase::None);
        assert_eq!(config.id_field, "_id");
        assert_eq!(config.initial_position, InitialPosition::Earliest);
        assert_eq!(config.tail.max_retries, 86_400);
        assert_eq!(config.tail.retry_interval(), Duration::from_secs(1));
        assert_eq!(config.checkpoint_table, "docsync_checkpoint");
    }

    #[test]
    fn test_dataset_order_is_preserved() {
        let config = SyncConfig::from_yaml_str(MINIMAL).unwrap();
        let names: Vec<&str> = config.datasets.keys().map(String::as_str).collect();
        assert_eq!(names, vec!["users", "orders"]);

        let fields: Vec<&str> = config.datasets["users"].keys().map(String::as_str).collect();
        assert_eq!(fields, vec!["_id", "name", "age"]);
    }

    #[test]
    fn test_env_var_expansion() {
        std::env::set_var("DOCSYNC_TEST_DEPLOYMENT", "from_env");
        let yaml = MINIMAL
            .replace("deployment: mirror", "deployment: ${DOCSYNC_TEST_DEPLOYMENT}")
            .replace("source_database: app", "source_database: ${DOCSYNC_TEST_UNSET:-fallback}");

        let config = SyncConfig::from_yaml_str(&yaml).unwrap();
        assert_eq!(config.deployment, "from_env");
        assert_eq!(config.source_database, "fallback");
    }

    #[test]
    fn test_validate_requires_identifier_field() {
        let yaml = r#"
deployment: mirror
source_database: app
datasets:
  users:
    name: VARCHAR(255)
"#;
        let err = SyncConfig::from_yaml_str(yaml).unwrap_err();
        assert!(err.to_string().contains("identifier field '_id'"));
    }

    #[test]
    fn test_validate_rejects_empty_datasets() {
        let yaml = "deployment: mirror\nsource_database: app\ndatasets: {}\n";
        assert!(SyncConfig::from_yaml_str(yaml).is_err());
    }

    #[test]
    fn test_validate_rejects_checkpoint_table_collision() {
        let yaml = r#"
deployment: mirror
source_database: app
checkpoint_table: users
datasets:
  users:
    _id: INT
"#;
        assert!(SyncConfig::from_yaml_str(yaml).is_err());
    }

    #[test]
    fn test_tail_options_and_registry() {
        let yaml = format!(
            "{}tail:\n  retry_interval_ms: 250\nfield_case: snake\nprefix: m_\n",
            MINIMAL.trim_start()
        );
        let config = SyncConfig::from_yaml_str(&yaml).unwrap();
        let options = config.tail.options();
        assert_eq!(options.retry_interval, Duration::from_millis(250));
        assert_eq!(options.max_retries, 86_400);
        assert!(options.tailable);

        let defs = config.registry().definitions(&config.datasets);
        assert_eq!(defs[0].target_name, "m_users");
        assert_eq!(defs[1].namespace, "app.orders");
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("docsync.yaml");
        std::fs::write(&path, MINIMAL).unwrap();

        let config = SyncConfig::from_file(&path).unwrap();
        assert_eq!(config.deployment, "mirror");
        assert!(SyncConfig::from_file(dir.path().join("missing.yaml")).is_err());
    }
}
