//! Theme preference command: `shopfloor theme`.

use anyhow::{Result, anyhow};
use std::path::Path;

use shopfloor::config::Config;
use shopfloor::theme::{SettingsStore, Theme, ThemeController, ThemeStatus};

use super::super::ThemeCommands;
use super::open_db;

fn print_status(status: ThemeStatus) {
    let label = match status.theme {
        Theme::Light => console::style(status.theme.as_str()).yellow().bold(),
        Theme::Dark => console::style(status.theme.as_str()).blue().bold(),
    };
    let source = if status.explicit { "saved preference" } else { "default" };
    println!("Theme: {} ({})", label, console::style(source).dim());
}

pub fn cmd_theme(project_dir: &Path, command: Option<ThemeCommands>) -> Result<()> {
    let config = Config::load(project_dir)?;
    let db = open_db(&config)?;
    let store = SettingsStore::new(db, config.toml.theme.storage_key.clone());
    let mut controller = ThemeController::init(store, None)?;

    match command {
        None | Some(ThemeCommands::Show) => {}
        Some(ThemeCommands::Set { theme }) => {
            let theme: Theme = theme.parse().map_err(|e: String| anyhow!(e))?;
            controller.set(theme)?;
        }
        Some(ThemeCommands::Toggle) => {
            controller.toggle()?;
        }
        Some(ThemeCommands::Reset) => {
            controller.reset()?;
        }
    }

    print_status(controller.status());
    controller.teardown();
    Ok(())
}
