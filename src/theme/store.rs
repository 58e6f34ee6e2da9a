use anyhow::{Context, Result};

use crate::dashboard::db::DbHandle;

use super::Theme;

/// Persistence for the theme preference, the only cross-session UI state.
pub trait StylePreferenceStore: Send {
    /// The explicitly chosen theme, if the user ever made a choice.
    fn load(&self) -> Result<Option<Theme>>;

    fn save(&self, theme: Theme) -> Result<()>;

    /// Forget any explicit choice.
    fn clear(&self) -> Result<()>;
}

/// Stores the preference in the settings table under a namespaced key.
#[derive(Clone)]
pub struct SettingsStore {
    db: DbHandle,
    key: String,
}

impl SettingsStore {
    pub fn new(db: DbHandle, key: impl Into<String>) -> Self {
        Self {
            db,
            key: key.into(),
        }
    }
}

impl StylePreferenceStore for SettingsStore {
    fn load(&self) -> Result<Option<Theme>> {
        let value = self.db.lock_sync()?.get_setting(&self.key)?;
        match value {
            None => Ok(None),
            // An unreadable value is treated as no choice rather than an error.
            Some(v) => match v.parse::<Theme>() {
                Ok(theme) => Ok(Some(theme)),
                Err(e) => {
                    tracing::warn!(key = %self.key, value = %v, "ignoring stored theme: {}", e);
                    Ok(None)
                }
            },
        }
    }

    fn save(&self, theme: Theme) -> Result<()> {
        self.db
            .lock_sync()?
            .set_setting(&self.key, theme.as_str())
            .context("Failed to persist theme preference")
    }

    fn clear(&self) -> Result<()> {
        self.db.lock_sync()?.delete_setting(&self.key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dashboard::db::DashboardDb;

    fn store() -> SettingsStore {
        SettingsStore::new(
            DbHandle::new(DashboardDb::new_in_memory().unwrap()),
            "shopfloor.theme",
        )
    }

    #[test]
    fn test_load_empty() {
        assert_eq!(store().load().unwrap(), None);
    }

    #[test]
    fn test_save_load_clear() {
        let store = store();
        store.save(Theme::Dark).unwrap();
        assert_eq!(store.load().unwrap(), Some(Theme::Dark));
        store.clear().unwrap();
        assert_eq!(store.load().unwrap(), None);
    }

    #[test]
    fn test_garbage_value_reads_as_no_choice() {
        let store = store();
        store
            .db
            .lock_sync()
            .unwrap()
            .set_setting("shopfloor.theme", "purple")
            .unwrap();
        assert_eq!(store.load().unwrap(), None);
    }
}
