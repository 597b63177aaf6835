// [crates/wopr-core/src/lib.rs]
//! =================================================================
//! Shared primitives for the WOPR control plane.
//!
//! Every other crate in the workspace depends on this one for the
//! `Credit` value type and the common error taxonomy (§7 of
//! SPEC_FULL.md). Nothing here touches I/O.
//! =================================================================

pub mod credit;
pub mod error;
pub mod time;

pub use credit::Credit;
pub use error::CoreError;
