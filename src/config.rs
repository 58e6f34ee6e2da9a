//! Configuration for Shopfloor.
//!
//! Settings are read from `.shopfloor/shopfloor.toml` and layered
//! (file → environment → CLI). Every key has a default, so a missing file
//! yields a working configuration.
//!
//! # Configuration File Format
//!
//! ```toml
//! [server]
//! port = 3141
//! db_path = ".shopfloor/shopfloor.db"
//!
//! [database]
//! name = "factory"
//!
//! [access]
//! field = "factory"
//! privileged_roles = ["admin", "masterUser"]
//! empty_restriction = "deny"
//!
//! [analytics]
//! group_by = "factory"
//! date_field = "Date"
//! quantity_field = "processed quantity"
//! defect_field = "total NG"
//! counters = ["scratch", "dent", "burr"]
//!
//! [table]
//! default_sort_field = "start-time"
//!
//! [theme]
//! storage_key = "shopfloor.theme"
//!
//! [tabs.inspections.descriptions]
//! "total NG" = "Sum of all defect counters"
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Name of the per-project state directory.
pub const STATE_DIR: &str = ".shopfloor";

/// Config file name inside [`STATE_DIR`].
pub const CONFIG_FILE: &str = "shopfloor.toml";

/// How a non-privileged role with an empty access list is treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmptyRestriction {
    /// Match nothing (fail closed)
    #[default]
    Deny,
    /// Run the query unrestricted
    Allow,
}

impl std::fmt::Display for EmptyRestriction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EmptyRestriction::Deny => write!(f, "deny"),
            EmptyRestriction::Allow => write!(f, "allow"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSection {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,
}

fn default_port() -> u16 {
    3141
}

fn default_db_path() -> PathBuf {
    PathBuf::from(STATE_DIR).join("shopfloor.db")
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            port: default_port(),
            db_path: default_db_path(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseSection {
    /// Database name used when a request omits `dbName`
    #[serde(default = "default_db_name")]
    pub name: String,
}

fn default_db_name() -> String {
    "factory".to_string()
}

impl Default for DatabaseSection {
    fn default() -> Self {
        Self {
            name: default_db_name(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessSection {
    /// Field the per-user factory access list is matched against
    #[serde(default = "default_access_field")]
    pub field: String,
    /// Roles that ignore the per-user factory access list
    #[serde(default = "default_privileged_roles")]
    pub privileged_roles: Vec<String>,
    #[serde(default)]
    pub empty_restriction: EmptyRestriction,
}

fn default_access_field() -> String {
    "factory".to_string()
}

fn default_privileged_roles() -> Vec<String> {
    vec!["admin".to_string(), "masterUser".to_string()]
}

impl Default for AccessSection {
    fn default() -> Self {
        Self {
            field: default_access_field(),
            privileged_roles: default_privileged_roles(),
            empty_restriction: EmptyRestriction::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyticsSection {
    #[serde(default = "default_group_by")]
    pub group_by: String,
    #[serde(default = "default_date_field")]
    pub date_field: String,
    #[serde(default = "default_quantity_field")]
    pub quantity_field: String,
    #[serde(default = "default_defect_field")]
    pub defect_field: String,
    /// Named defect counters summed per group, in chart order
    #[serde(default = "default_counters")]
    pub counters: Vec<String>,
}

fn default_group_by() -> String {
    "factory".to_string()
}

fn default_date_field() -> String {
    "Date".to_string()
}

fn default_quantity_field() -> String {
    "processed quantity".to_string()
}

fn default_defect_field() -> String {
    "total NG".to_string()
}

pub fn default_counters() -> Vec<String> {
    [
        "scratch",
        "dent",
        "burr",
        "crack",
        "deformation",
        "discoloration",
        "contamination",
        "dimension",
        "porosity",
        "misalignment",
        "missing part",
        "other",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

impl Default for AnalyticsSection {
    fn default() -> Self {
        Self {
            group_by: default_group_by(),
            date_field: default_date_field(),
            quantity_field: default_quantity_field(),
            defect_field: default_defect_field(),
            counters: default_counters(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableSection {
    #[serde(default = "default_sort_field")]
    pub default_sort_field: String,
}

fn default_sort_field() -> String {
    "start-time".to_string()
}

impl Default for TableSection {
    fn default() -> Self {
        Self {
            default_sort_field: default_sort_field(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThemeSection {
    #[serde(default = "default_storage_key")]
    pub storage_key: String,
}

fn default_storage_key() -> String {
    "shopfloor.theme".to_string()
}

impl Default for ThemeSection {
    fn default() -> Self {
        Self {
            storage_key: default_storage_key(),
        }
    }
}

/// Per-tab column metadata.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TabSection {
    /// Field name → column description
    #[serde(default)]
    pub descriptions: HashMap<String, String>,
}

/// Parsed `shopfloor.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ShopfloorToml {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub database: DatabaseSection,
    #[serde(default)]
    pub access: AccessSection,
    #[serde(default)]
    pub analytics: AnalyticsSection,
    #[serde(default)]
    pub table: TableSection,
    #[serde(default)]
    pub theme: ThemeSection,
    #[serde(default)]
    pub tabs: HashMap<String, TabSection>,
}

impl ShopfloorToml {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::parse(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse shopfloor.toml")
    }

    /// Load configuration from `<state_dir>/shopfloor.toml`, or defaults if absent.
    pub fn load_or_default(state_dir: &Path) -> Result<Self> {
        let config_path = state_dir.join(CONFIG_FILE);
        if config_path.exists() {
            Self::load(&config_path)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to a TOML file.
    pub fn save(&self, path: &Path) -> Result<()> {
        let content =
            toml::to_string_pretty(self).context("Failed to serialize shopfloor.toml")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }

    /// Apply `SHOPFLOOR_*` environment overrides.
    pub fn apply_env(&mut self) {
        if let Some(port) = std::env::var("SHOPFLOOR_PORT")
            .ok()
            .and_then(|v| v.parse().ok())
        {
            self.server.port = port;
        }
        if let Ok(path) = std::env::var("SHOPFLOOR_DB_PATH") {
            self.server.db_path = PathBuf::from(path);
        }
        if let Ok(name) = std::env::var("SHOPFLOOR_DB_NAME") {
            self.database.name = name;
        }
    }

    /// Column descriptions configured for a tab.
    pub fn descriptions_for(&self, tab: &str) -> HashMap<String, String> {
        self.tabs
            .get(tab)
            .map(|t| t.descriptions.clone())
            .unwrap_or_default()
    }

    /// Check the configuration and return human-readable warnings.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        if self.access.field.trim().is_empty() {
            warnings.push("access.field is empty; factory access cannot be enforced".to_string());
        }
        if self.access.privileged_roles.is_empty() {
            warnings.push("access.privileged_roles is empty; every role is restricted".to_string());
        }
        if self.access.empty_restriction == EmptyRestriction::Allow {
            warnings.push(
                "access.empty_restriction = \"allow\" lets users without factory access query every factory"
                    .to_string(),
            );
        }
        if self.analytics.counters.is_empty() {
            warnings.push("analytics.counters is empty; the counter chart will have no series".to_string());
        }
        let mut seen = std::collections::HashSet::new();
        for counter in &self.analytics.counters {
            if !seen.insert(counter) {
                warnings.push(format!("analytics.counters lists '{}' more than once", counter));
            }
        }
        if self.analytics.quantity_field == self.analytics.defect_field {
            warnings.push("analytics.quantity_field and analytics.defect_field are the same field".to_string());
        }
        if self.theme.storage_key.trim().is_empty() {
            warnings.push("theme.storage_key is empty".to_string());
        }

        warnings
    }
}

/// Resolved runtime configuration for a project directory.
#[derive(Debug, Clone)]
pub struct Config {
    pub project_dir: PathBuf,
    pub state_dir: PathBuf,
    pub toml: ShopfloorToml,
}

impl Config {
    /// Load `<project_dir>/.shopfloor/shopfloor.toml` and apply environment overrides.
    pub fn load(project_dir: &Path) -> Result<Self> {
        let state_dir = project_dir.join(STATE_DIR);
        let mut toml = ShopfloorToml::load_or_default(&state_dir)?;
        toml.apply_env();
        Ok(Self {
            project_dir: project_dir.to_path_buf(),
            state_dir,
            toml,
        })
    }

    pub fn config_path(&self) -> PathBuf {
        self.state_dir.join(CONFIG_FILE)
    }

    /// Database path; relative paths resolve against the project directory.
    pub fn db_path(&self) -> PathBuf {
        let path = &self.toml.server.db_path;
        if path.is_absolute() {
            path.clone()
        } else {
            self.project_dir.join(path)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults_when_file_missing() {
        let dir = TempDir::new().unwrap();
        let toml = ShopfloorToml::load_or_default(dir.path()).unwrap();
        assert_eq!(toml.server.port, 3141);
        assert_eq!(toml.database.name, "factory");
        assert_eq!(toml.access.field, "factory");
        assert_eq!(toml.access.privileged_roles, vec!["admin", "masterUser"]);
        assert_eq!(toml.access.empty_restriction, EmptyRestriction::Deny);
        assert_eq!(toml.analytics.counters.len(), 12);
        assert_eq!(toml.table.default_sort_field, "start-time");
    }

    #[test]
    fn test_parse_partial_file_keeps_other_defaults() {
        let toml = ShopfloorToml::parse(
            r#"
            [access]
            privileged_roles = ["root"]
            empty_restriction = "allow"

            [tabs.inspections.descriptions]
            "total NG" = "All defects"
            "#,
        )
        .unwrap();
        assert_eq!(toml.access.privileged_roles, vec!["root"]);
        assert_eq!(toml.access.empty_restriction, EmptyRestriction::Allow);
        assert_eq!(toml.analytics.group_by, "factory");
        assert_eq!(
            toml.descriptions_for("inspections").get("total NG").map(String::as_str),
            Some("All defects")
        );
        assert!(toml.descriptions_for("users").is_empty());
    }

    #[test]
    fn test_parse_invalid_restriction_fails() {
        let result = ShopfloorToml::parse("[access]\nempty_restriction = \"maybe\"\n");
        assert!(result.is_err());
    }

    #[test]
    fn test_save_and_reload_roundtrip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        let mut toml = ShopfloorToml::default();
        toml.server.port = 9000;
        toml.save(&path).unwrap();
        let loaded = ShopfloorToml::load(&path).unwrap();
        assert_eq!(loaded.server.port, 9000);
    }

    #[test]
    fn test_validate_defaults_is_clean() {
        assert!(ShopfloorToml::default().validate().is_empty());
    }

    #[test]
    fn test_validate_flags_open_restriction_and_duplicates() {
        let mut toml = ShopfloorToml::default();
        toml.access.empty_restriction = EmptyRestriction::Allow;
        toml.analytics.counters.push("dent".to_string());
        let warnings = toml.validate();
        assert!(warnings.iter().any(|w| w.contains("empty_restriction")));
        assert!(warnings.iter().any(|w| w.contains("'dent'")));
    }

    #[test]
    fn test_validate_flags_empty_access_field() {
        let mut toml = ShopfloorToml::default();
        toml.access.field = " ".to_string();
        assert!(toml.validate().iter().any(|w| w.contains("access.field")));
    }

    #[test]
    fn test_config_db_path_resolves_relative() {
        let dir = TempDir::new().unwrap();
        let config = Config {
            project_dir: dir.path().to_path_buf(),
            state_dir: dir.path().join(STATE_DIR),
            toml: ShopfloorToml::default(),
        };
        assert_eq!(config.db_path(), dir.path().join(".shopfloor/shopfloor.db"));
    }
}
