//! Project initialisation: `shopfloor init`.

use anyhow::{Context, Result};
use std::path::Path;

use shopfloor::config::{Config, STATE_DIR, ShopfloorToml};

use super::open_db;

pub fn cmd_init(project_dir: &Path, force: bool) -> Result<()> {
    let state_dir = project_dir.join(STATE_DIR);
    std::fs::create_dir_all(&state_dir)
        .with_context(|| format!("Failed to create {}", state_dir.display()))?;

    let config = Config::load(project_dir)?;
    let config_path = config.config_path();
    if config_path.exists() && !force {
        println!(
            "{} {} (use --force to overwrite)",
            console::style("Keeping existing").dim(),
            config_path.display()
        );
    } else {
        ShopfloorToml::default().save(&config_path)?;
        println!("Wrote {}", config_path.display());
    }

    open_db(&config)?;
    tracing::debug!(db = %config.db_path().display(), "database ready");

    println!(
        "{} in {}",
        console::style("Initialized shopfloor project").green().bold(),
        state_dir.display()
    );
    println!("  database: {}", config.db_path().display());
    println!();
    println!("Next: shopfloor import <collection> <file.json>, then shopfloor serve");
    Ok(())
}
