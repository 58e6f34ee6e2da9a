//! Server-side rendering of record tables and analytics charts.
//!
//! Everything here works on plain view-models (no DOM): `table` turns
//! records into a `TableView`, `chart` turns aggregation rows into ECharts
//! options, and `session` holds the client-side view state that decides
//! which fetch result is allowed to replace a container.

pub mod chart;
pub mod fields;
pub mod session;
pub mod sort;
pub mod table;

pub use fields::{FieldCatalog, FieldDescriptor, discover_fields};
pub use session::{FetchToken, RenderSession, SelectionSet};
pub use sort::{SortDirection, SortState};
pub use table::{TableOutcome, TableView, build_table};
