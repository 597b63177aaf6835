// [apps/control-plane/src/handlers/mod.rs]
pub mod admin;
pub mod billing;
pub mod bots;
pub mod gateway;
pub mod nodes;
pub mod recovery;
pub mod tenants;
pub mod webhooks;
