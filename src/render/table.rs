//! Table view-model and its HTML template.
//!
//! Records are turned into a `TableView` (plain data: headers, rows, cells,
//! class lists) which is rendered through one maud template. An empty record
//! set or a failed fetch produces a `StatePanel` instead of a table shell.

use maud::{Markup, Render, html};
use serde::Serialize;
use serde_json::Value;

use crate::dashboard::models::{Record, STATUS_FIELD};
use crate::errors::RenderError;
use crate::theme::{ClassList, Enhance};

use super::fields::FieldDescriptor;
use super::sort::{SortDirection, SortState, sort_records};

/// Exact field names whose headers are sortable.
pub const CLICKABLE_FIELDS: &[&str] = &[
    "Date",
    "start-time",
    "end-time",
    "factory",
    "part-number",
    "model-number",
    "worker name",
    "equipment",
];

/// Any header containing one of these is sortable too.
pub const CLICKABLE_TOKENS: &[&str] = &["processed quantity", "defect", "NG"];

const TABLE_CLASSES: &str = "data-table bg-white text-gray-900";
const HEADER_CLASSES: &str = "data-table__header bg-gray-50 text-gray-600";
const ROW_CLASSES: &str = "data-table__row border-gray-200";
const CELL_CLASSES: &str = "data-table__cell";
const STATE_CLASSES: &str = "table-state bg-white text-gray-600";

pub fn is_sortable(name: &str) -> bool {
    name == STATUS_FIELD
        || CLICKABLE_FIELDS.contains(&name)
        || CLICKABLE_TOKENS.iter().any(|t| name.contains(t))
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnHeader {
    pub name: String,
    pub label: String,
    pub group: Option<String>,
    pub description: Option<String>,
    pub sortable: bool,
    /// Set only on the active sort column.
    pub direction: Option<SortDirection>,
    pub classes: ClassList,
}

impl ColumnHeader {
    fn aria_sort(&self) -> Option<&'static str> {
        self.direction.map(|d| match d {
            SortDirection::Asc => "ascending",
            SortDirection::Desc => "descending",
        })
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Cell {
    pub field: String,
    pub text: String,
    pub classes: ClassList,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TableRow {
    /// Checkbox binding; rows without an identifier cannot be selected.
    pub record_id: Option<String>,
    pub cells: Vec<Cell>,
    pub classes: ClassList,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TableView {
    pub tab: String,
    pub headers: Vec<ColumnHeader>,
    pub rows: Vec<TableRow>,
    pub classes: ClassList,
    pub header_classes: ClassList,
}

impl TableView {
    /// Identifiers bound to row checkboxes, in row order.
    pub fn record_ids(&self) -> impl Iterator<Item = &str> {
        self.rows.iter().filter_map(|r| r.record_id.as_deref())
    }

    /// `(group, span)` runs over the header row; `None` for ungrouped columns.
    pub fn group_spans(&self) -> Vec<(Option<&str>, usize)> {
        let mut spans: Vec<(Option<&str>, usize)> = Vec::new();
        for header in &self.headers {
            let group = header.group.as_deref();
            match spans.last_mut() {
                Some((last, span)) if *last == group => *span += 1,
                _ => spans.push((group, 1)),
            }
        }
        spans
    }

    fn has_groups(&self) -> bool {
        self.headers.iter().any(|h| h.group.is_some())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StateKind {
    Empty,
    Error,
}

/// Replaces the table when there is nothing (or nothing valid) to show.
#[derive(Debug, Clone, Serialize)]
pub struct StatePanel {
    pub kind: StateKind,
    pub title: String,
    pub message: String,
    pub classes: ClassList,
}

impl StatePanel {
    pub fn empty(tab: &str) -> Self {
        Self {
            kind: StateKind::Empty,
            title: "No records".to_string(),
            message: format!("There are no records in '{}' yet.", tab),
            classes: ClassList::parse(STATE_CLASSES),
        }
    }

    pub fn error(err: &RenderError) -> Self {
        let mut classes = ClassList::parse(STATE_CLASSES);
        classes.add("table-state--error");
        Self {
            kind: StateKind::Error,
            title: "Could not load records".to_string(),
            message: err.to_string(),
            classes,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "lowercase")]
pub enum TableOutcome {
    Table(TableView),
    Empty(StatePanel),
    Error(StatePanel),
}

impl TableOutcome {
    pub fn from_error(err: &RenderError) -> Self {
        Self::Error(StatePanel::error(err))
    }

    pub fn as_table(&self) -> Option<&TableView> {
        match self {
            Self::Table(view) => Some(view),
            _ => None,
        }
    }
}

/// Text shown for one value: scalars as-is, null as empty, nested values as
/// compact JSON.
pub fn cell_text(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        Some(Value::Bool(b)) => b.to_string(),
        Some(nested) => nested.to_string(),
    }
}

fn header(
    name: &str,
    label: &str,
    group: Option<String>,
    description: Option<String>,
    sort: &SortState,
) -> ColumnHeader {
    let sortable = is_sortable(name);
    let mut classes = ClassList::parse("data-table__heading");
    if sortable {
        classes.add("data-table__heading--sortable");
    }
    let direction = (sortable && sort.is_active(name)).then_some(sort.direction);
    if direction.is_some() {
        classes.add("data-table__heading--active");
    }
    ColumnHeader {
        name: name.to_string(),
        label: label.to_string(),
        group,
        description,
        sortable,
        direction,
        classes,
    }
}

/// Sort the complete record set and build the table for it.
pub fn build_table(
    tab: &str,
    records: &mut [Record],
    fields: &[FieldDescriptor],
    sort: &SortState,
    default_sort_field: &str,
) -> TableOutcome {
    if records.is_empty() {
        return TableOutcome::Empty(StatePanel::empty(tab));
    }

    sort_records(records, sort, default_sort_field);

    let mut headers = Vec::with_capacity(fields.len() + 1);
    headers.push(header(STATUS_FIELD, STATUS_FIELD, None, None, sort));
    headers.extend(
        fields
            .iter()
            .map(|f| header(&f.name, &f.display_name, f.group.clone(), f.description.clone(), sort)),
    );

    let rows = records
        .iter()
        .map(|record| {
            let cells = headers
                .iter()
                .map(|h| {
                    let mut classes = ClassList::parse(CELL_CLASSES);
                    if h.name == STATUS_FIELD {
                        classes.add("data-table__cell--status");
                    }
                    Cell {
                        field: h.name.clone(),
                        text: cell_text(record.get(&h.name)),
                        classes,
                    }
                })
                .collect();
            TableRow {
                record_id: record.id(),
                cells,
                classes: ClassList::parse(ROW_CLASSES),
            }
        })
        .collect();

    TableOutcome::Table(TableView {
        tab: tab.to_string(),
        headers,
        rows,
        classes: ClassList::parse(TABLE_CLASSES),
        header_classes: ClassList::parse(HEADER_CLASSES),
    })
}

impl Render for TableView {
    fn render(&self) -> Markup {
        html! {
            table class=(self.classes.to_string()) data-tab=(self.tab) {
                thead class=(self.header_classes.to_string()) {
                    @if self.has_groups() {
                        tr class="data-table__groups" {
                            th {}
                            @for (group, span) in self.group_spans() {
                                th colspan=(span) { (group.unwrap_or_default()) }
                            }
                        }
                    }
                    tr {
                        th class="data-table__heading data-table__heading--select" {
                            input type="checkbox" class="select-all" data-role="select-all" aria-label="Select all rows";
                        }
                        @for h in &self.headers {
                            th
                                class=(h.classes.to_string())
                                data-field=(h.name)
                                data-sortable=[h.sortable.then_some("true")]
                                title=[h.description.as_deref()]
                                aria-sort=[h.aria_sort()]
                            {
                                (h.label)
                                @if let Some(direction) = h.direction {
                                    " "
                                    span class="sort-indicator" { (direction.indicator()) }
                                }
                            }
                        }
                    }
                }
                tbody {
                    @for row in &self.rows {
                        tr class=(row.classes.to_string()) data-id=[row.record_id.as_deref()] {
                            td class="data-table__cell data-table__cell--select" {
                                input
                                    type="checkbox"
                                    class="row-select"
                                    name="recordIds"
                                    value=[row.record_id.as_deref()]
                                    disabled[row.record_id.is_none()];
                            }
                            @for cell in &row.cells {
                                td class=(cell.classes.to_string()) data-field=(cell.field) { (cell.text) }
                            }
                        }
                    }
                }
            }
        }
    }
}

impl Render for StatePanel {
    fn render(&self) -> Markup {
        let (state, role) = match self.kind {
            StateKind::Empty => ("empty", "status"),
            StateKind::Error => ("error", "alert"),
        };
        html! {
            div class=(self.classes.to_string()) data-state=(state) role=(role) {
                p class="table-state__title" { (self.title) }
                p class="table-state__message" { (self.message) }
            }
        }
    }
}

impl Render for TableOutcome {
    fn render(&self) -> Markup {
        match self {
            Self::Table(view) => view.render(),
            Self::Empty(panel) | Self::Error(panel) => panel.render(),
        }
    }
}

impl Enhance for TableView {
    fn visit_classes(&mut self, visit: &mut dyn FnMut(&mut ClassList)) {
        visit(&mut self.classes);
        visit(&mut self.header_classes);
        for h in &mut self.headers {
            visit(&mut h.classes);
        }
        for row in &mut self.rows {
            visit(&mut row.classes);
            for cell in &mut row.cells {
                visit(&mut cell.classes);
            }
        }
    }
}

impl Enhance for StatePanel {
    fn visit_classes(&mut self, visit: &mut dyn FnMut(&mut ClassList)) {
        visit(&mut self.classes);
    }
}

impl Enhance for TableOutcome {
    fn visit_classes(&mut self, visit: &mut dyn FnMut(&mut ClassList)) {
        match self {
            Self::Table(view) => view.visit_classes(visit),
            Self::Empty(panel) | Self::Error(panel) => panel.visit_classes(visit),
        }
    }
}
