//! Configuration view and validation commands: `shopfloor config`.

use anyhow::Result;

use shopfloor::config::Config;

use super::super::ConfigCommands;

pub fn cmd_config(project_dir: &std::path::Path, command: Option<ConfigCommands>) -> Result<()> {
    let config = Config::load(project_dir)?;
    let config_path = config.config_path();

    match command {
        None | Some(ConfigCommands::Show) => {
            println!();
            println!("{}", console::style("Shopfloor Configuration").bold().cyan());
            println!("=======================");
            println!();

            if config_path.exists() {
                println!("Config file: {}", config_path.display());
            } else {
                println!("No shopfloor.toml found at {}", config_path.display());
                println!("Using default configuration. Run 'shopfloor init' to create one.");
            }
            println!();

            let toml = &config.toml;
            println!("[server]");
            println!("  port = {}", toml.server.port);
            println!("  db_path = \"{}\"", config.db_path().display());
            println!();
            println!("[database]");
            println!("  name = \"{}\"", toml.database.name);
            println!();
            println!("[access]");
            println!("  field = \"{}\"", toml.access.field);
            println!("  privileged_roles = {:?}", toml.access.privileged_roles);
            println!("  empty_restriction = \"{}\"", toml.access.empty_restriction);
            println!();
            println!("[analytics]");
            println!("  group_by = \"{}\"", toml.analytics.group_by);
            println!("  date_field = \"{}\"", toml.analytics.date_field);
            println!("  quantity_field = \"{}\"", toml.analytics.quantity_field);
            println!("  defect_field = \"{}\"", toml.analytics.defect_field);
            println!("  counters = {:?}", toml.analytics.counters);
            println!();
            println!("[table]");
            println!("  default_sort_field = \"{}\"", toml.table.default_sort_field);
            println!();
            println!("[theme]");
            println!("  storage_key = \"{}\"", toml.theme.storage_key);
            println!();

            if !toml.tabs.is_empty() {
                let mut tabs: Vec<_> = toml.tabs.iter().collect();
                tabs.sort_by(|a, b| a.0.cmp(b.0));
                for (tab, section) in tabs {
                    println!("[tabs.{}.descriptions]", tab);
                    let mut descriptions: Vec<_> = section.descriptions.iter().collect();
                    descriptions.sort();
                    for (field, text) in descriptions {
                        println!("  \"{}\" = \"{}\"", field, text);
                    }
                    println!();
                }
            }
            println!("(values include SHOPFLOOR_* environment overrides)");
        }
        Some(ConfigCommands::Validate) => {
            println!();
            println!("Validating configuration...");
            println!();

            let warnings = config.toml.validate();
            if warnings.is_empty() {
                println!("{}", console::style("Configuration is valid.").green());
            } else {
                println!("Configuration warnings:");
                for warning in warnings {
                    println!("  {} {}", console::style("⚠").yellow(), warning);
                }
            }
            println!();
        }
    }

    Ok(())
}
