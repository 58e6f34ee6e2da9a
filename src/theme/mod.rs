//! Light/dark theme state and dark-mode styling.
//!
//! `ThemeController` owns the two-state machine and its persistence;
//! `StyleEnhancer` applies the current theme to rendered view-models at the
//! points where they are produced. Neither is a global: both are constructed
//! by the caller and passed to whatever renders.
//!
//! Initial theme: persisted choice > system preference > light.

mod enhancer;
mod store;

pub use enhancer::{ClassList, DEFAULT_MAPPINGS, Enhance, StyleEnhancer};
pub use store::{SettingsStore, StylePreferenceStore};

use std::str::FromStr;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Theme {
    #[default]
    Light,
    Dark,
}

impl Theme {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Light => "light",
            Self::Dark => "dark",
        }
    }

    pub fn toggled(self) -> Self {
        match self {
            Self::Light => Self::Dark,
            Self::Dark => Self::Light,
        }
    }
}

impl std::fmt::Display for Theme {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Theme {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "light" => Ok(Self::Light),
            "dark" => Ok(Self::Dark),
            _ => Err(format!("Invalid theme: {}", s)),
        }
    }
}

/// Snapshot of the controller for API responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ThemeStatus {
    pub theme: Theme,
    pub explicit: bool,
}

/// Two-state theme machine backed by a preference store.
///
/// Every transition is published on a watch channel so renderers can
/// re-apply styling to what they already produced.
pub struct ThemeController<S: StylePreferenceStore> {
    store: S,
    current: Theme,
    explicit: bool,
    /// Last reported OS preference.
    system: Option<Theme>,
    tx: watch::Sender<Theme>,
}

impl<S: StylePreferenceStore> ThemeController<S> {
    /// Resolve the initial theme from the store and the system preference.
    pub fn init(store: S, system: Option<Theme>) -> Result<Self> {
        let persisted = store.load()?;
        let current = persisted.or(system).unwrap_or_default();
        let (tx, _rx) = watch::channel(current);
        tracing::debug!(theme = %current, explicit = persisted.is_some(), "theme initialised");
        Ok(Self {
            store,
            current,
            explicit: persisted.is_some(),
            system,
            tx,
        })
    }

    pub fn current(&self) -> Theme {
        self.current
    }

    pub fn is_explicit(&self) -> bool {
        self.explicit
    }

    pub fn status(&self) -> ThemeStatus {
        ThemeStatus {
            theme: self.current,
            explicit: self.explicit,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<Theme> {
        self.tx.subscribe()
    }

    /// Explicit user choice; persisted.
    pub fn set(&mut self, theme: Theme) -> Result<Theme> {
        self.store.save(theme)?;
        self.explicit = true;
        self.transition(theme);
        Ok(theme)
    }

    /// Flip the theme as an explicit user choice.
    pub fn toggle(&mut self) -> Result<Theme> {
        self.set(self.current.toggled())
    }

    /// Follow the OS preference unless the user ever chose explicitly.
    /// Returns whether the change was honoured.
    pub fn system_preference_changed(&mut self, system: Theme) -> bool {
        self.system = Some(system);
        if self.explicit {
            tracing::debug!(system = %system, "ignoring system theme change; explicit choice persisted");
            return false;
        }
        self.transition(system);
        true
    }

    /// Forget the explicit choice and fall back to the system preference.
    pub fn reset(&mut self) -> Result<Theme> {
        self.store.clear()?;
        self.explicit = false;
        let theme = self.system.unwrap_or_default();
        self.transition(theme);
        Ok(theme)
    }

    fn transition(&mut self, theme: Theme) {
        if self.current != theme {
            tracing::info!(from = %self.current, to = %theme, "theme changed");
        }
        self.current = theme;
        // Publish even when unchanged so late subscribers re-apply styling.
        self.tx.send_replace(theme);
    }

    /// Stop publishing and hand back the store.
    pub fn teardown(self) -> S {
        self.store
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct MemoryStore(Arc<Mutex<Option<Theme>>>);

    impl StylePreferenceStore for MemoryStore {
        fn load(&self) -> Result<Option<Theme>> {
            Ok(*self.0.lock().unwrap())
        }
        fn save(&self, theme: Theme) -> Result<()> {
            *self.0.lock().unwrap() = Some(theme);
            Ok(())
        }
        fn clear(&self) -> Result<()> {
            *self.0.lock().unwrap() = None;
            Ok(())
        }
    }

    #[test]
    fn test_theme_from_str() {
        assert_eq!("dark".parse::<Theme>().unwrap(), Theme::Dark);
        assert_eq!(" Light ".parse::<Theme>().unwrap(), Theme::Light);
        assert!("sepia".parse::<Theme>().is_err());
    }

    #[test]
    fn test_initial_defaults_to_light() {
        let ctl = ThemeController::init(MemoryStore::default(), None).unwrap();
        assert_eq!(ctl.current(), Theme::Light);
        assert!(!ctl.is_explicit());
    }

    #[test]
    fn test_initial_uses_system_preference() {
        let ctl = ThemeController::init(MemoryStore::default(), Some(Theme::Dark)).unwrap();
        assert_eq!(ctl.current(), Theme::Dark);
    }

    #[test]
    fn test_initial_persisted_beats_system() {
        let store = MemoryStore::default();
        store.save(Theme::Light).unwrap();
        let ctl = ThemeController::init(store, Some(Theme::Dark)).unwrap();
        assert_eq!(ctl.current(), Theme::Light);
        assert!(ctl.is_explicit());
    }

    #[test]
    fn test_toggle_persists() {
        let store = MemoryStore::default();
        let mut ctl = ThemeController::init(store.clone(), None).unwrap();
        assert_eq!(ctl.toggle().unwrap(), Theme::Dark);
        assert_eq!(store.load().unwrap(), Some(Theme::Dark));
        assert_eq!(ctl.toggle().unwrap(), Theme::Light);
        assert_eq!(store.load().unwrap(), Some(Theme::Light));
    }

    #[test]
    fn test_system_change_only_without_explicit_choice() {
        let mut ctl = ThemeController::init(MemoryStore::default(), None).unwrap();
        assert!(ctl.system_preference_changed(Theme::Dark));
        assert_eq!(ctl.current(), Theme::Dark);

        ctl.set(Theme::Light).unwrap();
        assert!(!ctl.system_preference_changed(Theme::Dark));
        assert_eq!(ctl.current(), Theme::Light);
    }

    #[test]
    fn test_reset_forgets_choice_and_follows_system_again() {
        let store = MemoryStore::default();
        let mut ctl = ThemeController::init(store.clone(), Some(Theme::Dark)).unwrap();
        ctl.set(Theme::Light).unwrap();
        assert!(!ctl.system_preference_changed(Theme::Dark));

        assert_eq!(ctl.reset().unwrap(), Theme::Dark);
        assert!(!ctl.is_explicit());
        assert_eq!(store.load().unwrap(), None);
        assert!(ctl.system_preference_changed(Theme::Light));
        assert_eq!(ctl.current(), Theme::Light);
    }

    #[test]
    fn test_transitions_are_published() {
        let mut ctl = ThemeController::init(MemoryStore::default(), None).unwrap();
        let rx = ctl.subscribe();
        ctl.toggle().unwrap();
        assert_eq!(*rx.borrow(), Theme::Dark);
        ctl.system_preference_changed(Theme::Light);
        assert_eq!(*rx.borrow(), Theme::Dark);
    }

    #[test]
    fn test_teardown_returns_store() {
        let store = MemoryStore::default();
        let mut ctl = ThemeController::init(store, None).unwrap();
        ctl.set(Theme::Dark).unwrap();
        let store = ctl.teardown();
        assert_eq!(store.load().unwrap(), Some(Theme::Dark));
    }
}
