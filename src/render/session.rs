//! Client-side view state for one table container.
//!
//! A `RenderSession` owns the active tab, its sort state, the retained
//! complete record set, and the batch selection. Every fetch is tagged with a
//! `FetchToken`; a result whose token no longer matches the current view
//! generation is discarded, so a slow response for one tab can never
//! overwrite another tab's table.

use std::collections::BTreeSet;

use crate::dashboard::models::Record;
use crate::errors::RenderError;
use crate::theme::{StyleEnhancer, Theme};

use super::fields::FieldCatalog;
use super::sort::SortState;
use super::table::{TableOutcome, build_table, is_sortable};

/// Identifies the view a fetch was started for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchToken {
    generation: u64,
    tab: String,
}

impl FetchToken {
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn tab(&self) -> &str {
        &self.tab
    }
}

/// Record identifiers selected for a batch operation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SelectionSet(BTreeSet<String>);

impl SelectionSet {
    /// Returns whether `id` is selected afterwards.
    pub fn toggle(&mut self, id: &str) -> bool {
        if self.0.remove(id) {
            false
        } else {
            self.0.insert(id.to_string());
            true
        }
    }

    pub fn contains(&self, id: &str) -> bool {
        self.0.contains(id)
    }

    pub fn clear(&mut self) {
        self.0.clear();
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn to_vec(&self) -> Vec<String> {
        self.0.iter().cloned().collect()
    }
}

pub struct RenderSession {
    tab: String,
    generation: u64,
    sort: SortState,
    catalog: FieldCatalog,
    selection: SelectionSet,
    records: Vec<Record>,
    /// Identifiers of the rows currently rendered, the selection universe.
    rendered_ids: Vec<String>,
    default_sort_field: String,
    enhancer: StyleEnhancer,
    theme: Theme,
}

impl RenderSession {
    pub fn new(tab: impl Into<String>, default_sort_field: impl Into<String>) -> Self {
        Self {
            tab: tab.into(),
            generation: 0,
            sort: SortState::default(),
            catalog: FieldCatalog::new(),
            selection: SelectionSet::default(),
            records: Vec::new(),
            rendered_ids: Vec::new(),
            default_sort_field: default_sort_field.into(),
            enhancer: StyleEnhancer::default(),
            theme: Theme::Light,
        }
    }

    pub fn with_catalog(mut self, catalog: FieldCatalog) -> Self {
        self.catalog = catalog;
        self
    }

    pub fn with_theme(mut self, enhancer: StyleEnhancer, theme: Theme) -> Self {
        self.enhancer = enhancer;
        self.theme = theme;
        self
    }

    pub fn tab(&self) -> &str {
        &self.tab
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn sort(&self) -> &SortState {
        &self.sort
    }

    pub fn selection(&self) -> &SelectionSet {
        &self.selection
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }

    /// Activate `tab`: forget the previous tab's sort, selection and data,
    /// and start a fetch for the new view.
    pub fn switch_tab(&mut self, tab: impl Into<String>) -> FetchToken {
        self.tab = tab.into();
        self.sort.reset();
        self.selection.clear();
        self.records.clear();
        self.rendered_ids.clear();
        self.begin_fetch()
    }

    /// Start a fetch for the current view. Any fetch still in flight becomes
    /// stale.
    pub fn begin_fetch(&mut self) -> FetchToken {
        self.generation += 1;
        FetchToken {
            generation: self.generation,
            tab: self.tab.clone(),
        }
    }

    pub fn is_current(&self, token: &FetchToken) -> bool {
        token.generation == self.generation && token.tab == self.tab
    }

    /// Deliver a fetch result. Returns `None` when the result is stale;
    /// otherwise the complete outcome that replaces the container.
    pub fn complete(
        &mut self,
        token: FetchToken,
        result: Result<Vec<Record>, RenderError>,
    ) -> Option<TableOutcome> {
        if token.generation != self.generation {
            tracing::debug!(
                tab = %token.tab,
                token = token.generation,
                current = self.generation,
                "discarding stale fetch result"
            );
            return None;
        }
        if token.tab != self.tab {
            return Some(self.fail(RenderError::TabMismatch {
                expected: self.tab.clone(),
                actual: token.tab,
            }));
        }
        match result {
            Ok(records) => {
                self.records = records;
                Some(self.render())
            }
            Err(err) => Some(self.fail(err)),
        }
    }

    fn fail(&mut self, err: RenderError) -> TableOutcome {
        tracing::warn!(tab = %self.tab, "table fetch failed: {}", err);
        self.records.clear();
        self.rendered_ids.clear();
        self.selection.clear();
        let mut outcome = TableOutcome::from_error(&err);
        self.enhancer.enhance(&mut outcome, self.theme);
        outcome
    }

    /// Rebuild the table from the retained complete record set. Clears the
    /// selection.
    pub fn render(&mut self) -> TableOutcome {
        let fields = self.catalog.fields_for(&self.tab, &self.records);
        let mut outcome = build_table(
            &self.tab,
            &mut self.records,
            &fields,
            &self.sort,
            &self.default_sort_field,
        );
        self.rendered_ids = outcome
            .as_table()
            .map(|view| view.record_ids().map(str::to_string).collect())
            .unwrap_or_default();
        self.selection.clear();
        self.enhancer.enhance(&mut outcome, self.theme);
        outcome
    }

    /// Header click. Non-sortable columns are ignored.
    pub fn click_header(&mut self, column: &str) -> Option<TableOutcome> {
        if !is_sortable(column) {
            return None;
        }
        self.sort.toggle(column);
        Some(self.render())
    }

    /// Toggle one row. Identifiers not in the rendered table are ignored.
    pub fn toggle_row(&mut self, id: &str) -> bool {
        if !self.rendered_ids.iter().any(|r| r == id) {
            return false;
        }
        self.selection.toggle(id)
    }

    /// Header checkbox: select every rendered row, or clear when all are
    /// already selected. Returns the selection size.
    pub fn toggle_all(&mut self) -> usize {
        let all_selected = !self.rendered_ids.is_empty()
            && self.rendered_ids.iter().all(|id| self.selection.contains(id));
        if all_selected {
            self.selection.clear();
        } else {
            for id in &self.rendered_ids {
                if !self.selection.contains(id) {
                    self.selection.toggle(id);
                }
            }
        }
        self.selection.len()
    }

    /// A batch action finished; its selection is spent.
    pub fn finish_batch(&mut self) -> Vec<String> {
        let taken = self.selection.to_vec();
        self.selection.clear();
        taken
    }

    /// Re-apply styling after a theme transition.
    pub fn apply_theme(&mut self, theme: Theme, outcome: &mut TableOutcome) -> usize {
        self.theme = theme;
        self.enhancer.enhance(outcome, theme)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::sort::SortDirection;
    use maud::Render;
    use serde_json::json;

    fn recs(values: Vec<serde_json::Value>) -> Vec<Record> {
        values.into_iter().filter_map(Record::from_value).collect()
    }

    fn ids(outcome: &TableOutcome) -> Vec<String> {
        outcome
            .as_table()
            .unwrap()
            .record_ids()
            .map(str::to_string)
            .collect()
    }

    #[test]
    fn test_stale_fetch_is_discarded() {
        let mut session = RenderSession::new("inspection", "start-time");
        let slow = session.begin_fetch();
        let fast = session.switch_tab("approvals");

        let late = session.complete(slow, Ok(recs(vec![json!({"_id": "old"})])));
        assert!(late.is_none());
        assert!(session.records().is_empty());

        let outcome = session
            .complete(fast, Ok(recs(vec![json!({"_id": "new"})])))
            .unwrap();
        assert_eq!(ids(&outcome), vec!["new"]);
    }

    #[test]
    fn test_catalog_descriptions_reach_headers() {
        let mut catalog = FieldCatalog::new();
        catalog.set_descriptions(
            "inspection",
            [("total NG".to_string(), "Sum of all defects".to_string())].into(),
        );
        let mut session = RenderSession::new("inspection", "start-time").with_catalog(catalog);
        let token = session.begin_fetch();
        let outcome = session
            .complete(token, Ok(recs(vec![json!({"_id": "a", "total NG": 3})])))
            .unwrap();

        let view = outcome.as_table().unwrap();
        let header = view.headers.iter().find(|h| h.name == "total NG").unwrap();
        assert_eq!(header.description.as_deref(), Some("Sum of all defects"));
        assert!(outcome.render().into_string().contains("title=\"Sum of all defects\""));
    }

    #[test]
    fn test_newer_fetch_on_same_tab_supersedes() {
        let mut session = RenderSession::new("inspection", "start-time");
        let first = session.begin_fetch();
        let second = session.begin_fetch();
        assert!(!session.is_current(&first));
        assert!(session.complete(first, Ok(Vec::new())).is_none());
        assert!(session.complete(second, Ok(Vec::new())).is_some());
    }

    #[test]
    fn test_fetch_error_renders_error_state() {
        let mut session = RenderSession::new("inspection", "start-time");
        let token = session.begin_fetch();
        let outcome = session
            .complete(token, Err(RenderError::Fetch("HTTP 500".into())))
            .unwrap();
        assert!(matches!(outcome, TableOutcome::Error(_)));
        assert!(outcome.render().into_string().contains("HTTP 500"));
    }

    #[test]
    fn test_switch_tab_resets_sort_and_selection() {
        let mut session = RenderSession::new("inspection", "start-time");
        let token = session.begin_fetch();
        session.complete(token, Ok(recs(vec![json!({"_id": "a", "factory": "X"})])));
        session.click_header("factory");
        session.toggle_row("a");
        assert!(session.sort().column.is_some());
        assert_eq!(session.selection().len(), 1);

        session.switch_tab("approvals");
        assert_eq!(session.sort(), &SortState::default());
        assert!(session.selection().is_empty());
    }

    #[test]
    fn test_click_header_resorts_full_data_set() {
        let mut session = RenderSession::new("inspection", "start-time");
        let token = session.begin_fetch();
        session.complete(
            token,
            Ok(recs(vec![
                json!({"_id": "b", "factory": "B"}),
                json!({"_id": "a", "factory": "A"}),
                json!({"_id": "c", "factory": "C"}),
            ])),
        );
        let asc = session.click_header("factory").unwrap();
        assert_eq!(ids(&asc), vec!["a", "b", "c"]);
        let desc = session.click_header("factory").unwrap();
        assert_eq!(session.sort().direction, SortDirection::Desc);
        assert_eq!(ids(&desc), vec!["c", "b", "a"]);
        assert!(session.click_header("comment").is_none());
    }

    #[test]
    fn test_select_all_toggles_500_rows() {
        let mut session = RenderSession::new("approvals", "start-time");
        let token = session.begin_fetch();
        let records = (0..500)
            .map(|i| json!({"_id": format!("r{i}"), "factory": "A"}))
            .collect();
        let outcome = session.complete(token, Ok(recs(records))).unwrap();
        assert_eq!(outcome.as_table().unwrap().rows.len(), 500);

        assert_eq!(session.toggle_all(), 500);
        session.toggle_row("r7");
        assert_eq!(session.selection().len(), 499);
        assert_eq!(session.toggle_all(), 500);
        assert_eq!(session.toggle_all(), 0);
    }

    #[test]
    fn test_toggle_row_ignores_unknown_ids() {
        let mut session = RenderSession::new("approvals", "start-time");
        let token = session.begin_fetch();
        session.complete(token, Ok(recs(vec![json!({"_id": "r1"})])));
        assert!(!session.toggle_row("ghost"));
        assert!(session.toggle_row("r1"));
        assert!(!session.toggle_row("r1"));
    }

    #[test]
    fn test_finish_batch_and_rerender_clear_selection() {
        let mut session = RenderSession::new("approvals", "start-time");
        let token = session.begin_fetch();
        session.complete(token, Ok(recs(vec![json!({"_id": "r1"}), json!({"_id": "r2"})])));
        session.toggle_all();
        assert_eq!(session.finish_batch(), vec!["r1", "r2"]);
        assert!(session.selection().is_empty());

        session.toggle_row("r1");
        session.render();
        assert!(session.selection().is_empty());
    }

    #[test]
    fn test_dark_theme_applied_on_render() {
        let mut session = RenderSession::new("approvals", "start-time")
            .with_theme(StyleEnhancer::default(), Theme::Dark);
        let token = session.begin_fetch();
        let mut outcome = session
            .complete(token, Ok(recs(vec![json!({"_id": "r1"})])))
            .unwrap();
        assert!(outcome.render().into_string().contains("data-table--dark"));

        session.apply_theme(Theme::Light, &mut outcome);
        assert!(!outcome.render().into_string().contains("--dark"));
    }
}
