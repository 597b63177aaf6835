// [crates/wopr-db/src/lib.rs]
//! Persistence layer. `client` owns the `libsql` connection pool and
//! schema bootstrap; `repositories` holds one module per aggregate,
//! each exposing a trait plus a `Sql*` implementation so callers in
//! `wopr-billing`/`wopr-fleet`/`wopr-gateway` can be tested against an
//! in-memory fake without touching SQL.

pub mod client;
pub mod errors;
pub mod repositories;
pub mod schema;

pub use client::DbClient;
pub use errors::DbError;
