//! CLI command implementations.
//!
//! Each submodule owns one or more related `Commands` variants:
//!
//! | Module    | Commands handled     |
//! |-----------|----------------------|
//! | `project` | `Init`               |
//! | `serve`   | `Serve`              |
//! | `data`    | `Import`, `Collections`, `Delete`, `Render` |
//! | `theme`   | `Theme`              |
//! | `config`  | `Config`             |

pub mod config;
pub mod data;
pub mod project;
pub mod serve;
pub mod theme;

pub use config::cmd_config;
pub use data::{cmd_collections, cmd_delete, cmd_import, cmd_render};
pub use project::cmd_init;
pub use serve::cmd_serve;
pub use theme::cmd_theme;

use anyhow::{Context, Result};

use shopfloor::config::Config;
use shopfloor::dashboard::db::{DashboardDb, DbHandle};

/// Open (creating if needed) the database configured for the project.
pub(crate) fn open_db(config: &Config) -> Result<DbHandle> {
    let path = config.db_path();
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    let db = DashboardDb::new(&path)
        .with_context(|| format!("Failed to open database at {}", path.display()))?;
    Ok(DbHandle::new(db))
}
