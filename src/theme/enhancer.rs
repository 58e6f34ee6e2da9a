//! Dark-mode class enhancement over rendered view-models.

use std::fmt;

use serde::{Serialize, Serializer};

use super::Theme;

/// Ordered, duplicate-free list of CSS classes on one element.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClassList(Vec<String>);

impl ClassList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from a whitespace-separated class string.
    pub fn parse(classes: &str) -> Self {
        let mut list = Self::new();
        for class in classes.split_whitespace() {
            list.add(class);
        }
        list
    }

    /// Add `class` unless already present. Returns whether it was added.
    pub fn add(&mut self, class: &str) -> bool {
        if class.is_empty() || self.contains(class) {
            return false;
        }
        self.0.push(class.to_string());
        true
    }

    /// Remove `class` if present. Returns whether it was removed.
    pub fn remove(&mut self, class: &str) -> bool {
        let before = self.0.len();
        self.0.retain(|c| c != class);
        self.0.len() != before
    }

    pub fn contains(&self, class: &str) -> bool {
        self.0.iter().any(|c| c == class)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for ClassList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.join(" "))
    }
}

impl Serialize for ClassList {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl From<&str> for ClassList {
    fn from(classes: &str) -> Self {
        Self::parse(classes)
    }
}

/// A rendered structure whose elements carry class lists.
pub trait Enhance {
    /// Visit every class list in the structure exactly once.
    fn visit_classes(&mut self, visit: &mut dyn FnMut(&mut ClassList));
}

/// Default base → dark companion mapping for the dashboard's markup.
pub const DEFAULT_MAPPINGS: &[(&str, &str)] = &[
    ("bg-white", "dark:bg-gray-900"),
    ("bg-gray-50", "dark:bg-gray-800"),
    ("text-gray-900", "dark:text-gray-100"),
    ("text-gray-600", "dark:text-gray-300"),
    ("border-gray-200", "dark:border-gray-700"),
    ("data-table", "data-table--dark"),
    ("data-table__header", "data-table__header--dark"),
    ("data-table__row", "data-table__row--dark"),
    ("chart-panel", "chart-panel--dark"),
    ("table-state", "table-state--dark"),
];

/// Applies (or strips) dark-mode companion classes.
///
/// Application is idempotent: enhancing an already-enhanced structure leaves
/// every class list unchanged.
#[derive(Debug, Clone)]
pub struct StyleEnhancer {
    mappings: Vec<(String, String)>,
}

impl Default for StyleEnhancer {
    fn default() -> Self {
        Self::new(DEFAULT_MAPPINGS.iter().map(|(b, d)| (b.to_string(), d.to_string())))
    }
}

impl StyleEnhancer {
    pub fn new(mappings: impl IntoIterator<Item = (String, String)>) -> Self {
        Self {
            mappings: mappings.into_iter().collect(),
        }
    }

    /// Bring one class list in line with `theme`. Returns whether it changed.
    pub fn enhance_classes(&self, classes: &mut ClassList, theme: Theme) -> bool {
        let mut changed = false;
        for (base, companion) in &self.mappings {
            changed |= match theme {
                Theme::Dark if classes.contains(base) => classes.add(companion),
                Theme::Dark => false,
                Theme::Light => classes.remove(companion),
            };
        }
        changed
    }

    /// Enhance every element of `target`. Returns the number of class lists changed.
    pub fn enhance<T: Enhance + ?Sized>(&self, target: &mut T, theme: Theme) -> usize {
        let mut changed = 0;
        target.visit_classes(&mut |classes: &mut ClassList| {
            if self.enhance_classes(classes, theme) {
                changed += 1;
            }
        });
        changed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Tree {
        root: ClassList,
        children: Vec<ClassList>,
    }

    impl Enhance for Tree {
        fn visit_classes(&mut self, visit: &mut dyn FnMut(&mut ClassList)) {
            visit(&mut self.root);
            for child in &mut self.children {
                visit(child);
            }
        }
    }

    fn tree() -> Tree {
        Tree {
            root: ClassList::parse("data-table bg-white"),
            children: vec![
                ClassList::parse("data-table__row text-gray-900"),
                ClassList::parse("unrelated"),
            ],
        }
    }

    #[test]
    fn test_class_list_dedups() {
        let mut list = ClassList::parse("a b a  c");
        assert_eq!(list.to_string(), "a b c");
        assert!(!list.add("b"));
        assert!(list.add("d"));
        assert!(list.remove("a"));
        assert!(!list.remove("a"));
        assert_eq!(list.to_string(), "b c d");
    }

    #[test]
    fn test_dark_adds_companions() {
        let enhancer = StyleEnhancer::default();
        let mut t = tree();
        let changed = enhancer.enhance(&mut t, Theme::Dark);
        assert_eq!(changed, 2);
        assert_eq!(
            t.root.to_string(),
            "data-table bg-white dark:bg-gray-900 data-table--dark"
        );
        assert!(t.children[0].contains("data-table__row--dark"));
        assert_eq!(t.children[1].to_string(), "unrelated");
    }

    #[test]
    fn test_enhance_is_idempotent() {
        let enhancer = StyleEnhancer::default();
        let mut once = tree();
        enhancer.enhance(&mut once, Theme::Dark);
        let mut twice = tree();
        enhancer.enhance(&mut twice, Theme::Dark);
        let changed = enhancer.enhance(&mut twice, Theme::Dark);
        assert_eq!(changed, 0);
        assert_eq!(once.root, twice.root);
        assert_eq!(once.children, twice.children);
    }

    #[test]
    fn test_light_strips_companions() {
        let enhancer = StyleEnhancer::default();
        let mut t = tree();
        enhancer.enhance(&mut t, Theme::Dark);
        enhancer.enhance(&mut t, Theme::Light);
        let fresh = tree();
        assert_eq!(t.root, fresh.root);
        assert_eq!(t.children, fresh.children);
        assert_eq!(enhancer.enhance(&mut t, Theme::Light), 0);
    }

    #[test]
    fn test_custom_mapping() {
        let enhancer = StyleEnhancer::new(vec![("card".to_string(), "card-dark".to_string())]);
        let mut list = ClassList::parse("card");
        assert!(enhancer.enhance_classes(&mut list, Theme::Dark));
        assert_eq!(list.to_string(), "card card-dark");
    }
}
