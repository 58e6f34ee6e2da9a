//! Record import and table rendering: `shopfloor import`, `shopfloor render`.

use anyhow::{Context, Result, bail};
use maud::Render;
use serde_json::Value;
use std::path::Path;

use shopfloor::config::Config;
use shopfloor::render::table::is_sortable;
use shopfloor::render::{FieldCatalog, SortDirection, SortState, build_table};
use shopfloor::theme::{SettingsStore, StylePreferenceStore, StyleEnhancer, Theme};

use super::open_db;

/// Accepts a JSON array of objects or a single object.
fn read_records(file: &Path) -> Result<Vec<Value>> {
    let content = std::fs::read_to_string(file)
        .with_context(|| format!("Failed to read {}", file.display()))?;
    let value: Value = serde_json::from_str(&content)
        .with_context(|| format!("{} is not valid JSON", file.display()))?;
    let docs = match value {
        Value::Array(items) => items,
        obj @ Value::Object(_) => vec![obj],
        _ => bail!("{} must contain a JSON object or an array of objects", file.display()),
    };
    if let Some(pos) = docs.iter().position(|d| !d.is_object()) {
        bail!("Element {} of {} is not a JSON object", pos, file.display());
    }
    Ok(docs)
}

pub fn cmd_import(project_dir: &Path, collection: &str, file: &Path, db: Option<&str>) -> Result<()> {
    let config = Config::load(project_dir)?;
    let database = db.unwrap_or(&config.toml.database.name).to_string();
    let docs = read_records(file)?;

    let handle = open_db(&config)?;
    let count = handle
        .lock_sync()?
        .insert_documents(&database, collection, docs)?;

    tracing::info!(database = %database, collection, count, "records imported");
    println!(
        "{} {} records into {}/{}",
        console::style("Imported").green().bold(),
        count,
        database,
        collection
    );
    Ok(())
}

pub fn cmd_collections(project_dir: &Path, db: Option<&str>) -> Result<()> {
    let config = Config::load(project_dir)?;
    let database = db.unwrap_or(&config.toml.database.name).to_string();
    let collections = open_db(&config)?.lock_sync()?.list_collections(&database)?;

    if collections.is_empty() {
        println!("{}", console::style(format!("No collections in {}", database)).dim());
        return Ok(());
    }
    println!("{}", console::style(format!("Collections in {}:", database)).bold());
    for name in collections {
        println!("  {}", name);
    }
    Ok(())
}

pub fn cmd_delete(project_dir: &Path, collection: &str, id: &str, db: Option<&str>) -> Result<()> {
    let config = Config::load(project_dir)?;
    let database = db.unwrap_or(&config.toml.database.name).to_string();
    let removed = open_db(&config)?
        .lock_sync()?
        .delete_document(&database, collection, id)?;
    if !removed {
        bail!("No record '{}' in {}/{}", id, database, collection);
    }

    tracing::info!(database = %database, collection, id, "record deleted");
    println!(
        "{} {} from {}/{}",
        console::style("Deleted").red().bold(),
        id,
        database,
        collection
    );
    Ok(())
}

pub fn cmd_render(
    project_dir: &Path,
    tab: &str,
    db: Option<&str>,
    sort: Option<&str>,
    desc: bool,
    dark: bool,
) -> Result<()> {
    let config = Config::load(project_dir)?;
    let database = db.unwrap_or(&config.toml.database.name).to_string();

    if let Some(column) = sort {
        if !is_sortable(column) {
            bail!("Column '{}' is not sortable", column);
        }
    }
    let direction = if desc { SortDirection::Desc } else { SortDirection::Asc };
    let sort = SortState::new(sort.map(str::to_string), direction);

    let handle = open_db(&config)?;
    let mut records = handle.lock_sync()?.list_documents(&database, tab)?;

    let theme = if dark {
        Theme::Dark
    } else {
        SettingsStore::new(handle.clone(), config.toml.theme.storage_key.clone())
            .load()?
            .unwrap_or_default()
    };

    let mut catalog = FieldCatalog::new();
    catalog.set_descriptions(tab, config.toml.descriptions_for(tab));
    let fields = catalog.fields_for(tab, &records);
    let mut outcome = build_table(
        tab,
        &mut records,
        &fields,
        &sort,
        &config.toml.table.default_sort_field,
    );
    StyleEnhancer::default().enhance(&mut outcome, theme);

    println!("{}", outcome.render().into_string());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_read_records_array_and_object() {
        let dir = TempDir::new().unwrap();
        let array = dir.path().join("a.json");
        std::fs::write(&array, r#"[{"a":1},{"a":2}]"#).unwrap();
        assert_eq!(read_records(&array).unwrap().len(), 2);

        let single = dir.path().join("o.json");
        std::fs::write(&single, r#"{"a":1}"#).unwrap();
        assert_eq!(read_records(&single).unwrap().len(), 1);
    }

    #[test]
    fn test_read_records_rejects_scalars() {
        let dir = TempDir::new().unwrap();
        let bad = dir.path().join("bad.json");
        std::fs::write(&bad, r#"[{"a":1}, 3]"#).unwrap();
        let err = read_records(&bad).unwrap_err();
        assert!(err.to_string().contains("Element 1"));
    }
}
