//! Dashboard back-end: document store, aggregation pipelines and HTTP API.
//!
//! ## Module Map
//!
//! ```text
//! ┌──────────┐   HTTP   ┌──────────────────────────────────────────────────┐
//! │  Client  │ ───────> │  server.rs  (axum Router, ServerConfig)          │
//! │ (browser)│ <─────── │    └─ api.rs  (route handlers, AppState)         │
//! └──────────┘          │         │                                        │
//!                       │         │ AggregationQuery::pipeline()           │
//!                       │         v                                        │
//!                       │  query.rs   (Stage, AccessPolicy, DateRange)     │
//!                       │         │                                        │
//!                       │         │ DbHandle::call(aggregate / find)       │
//!                       │         v                                        │
//!                       │  db.rs      (DashboardDb, settings)              │
//!                       │         │                                        │
//!                       │         v                                        │
//!                       │  engine.rs  (stage evaluation over JSON)         │
//!                       └──────────────────────────────────────────────────┘
//! ```
//!
//! HTML responses (`/api/tables/{tab}`, `/dashboard/analytics`) are produced
//! by [`crate::render`] and styled by [`crate::theme`].

pub mod api;
pub mod db;
pub mod engine;
pub mod models;
pub mod query;
pub mod server;
