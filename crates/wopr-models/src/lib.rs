// [crates/wopr-models/src/lib.rs]
//! =================================================================
//! Shared domain types (DTOs + entities) for the WOPR control plane.
//! See SPEC_FULL.md §3 for the table-by-table data model these types
//! mirror.
//! =================================================================

pub mod auth;
pub mod billing;
pub mod bot;
pub mod fleet;
pub mod gateway;
