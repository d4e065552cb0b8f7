//! Muster: Directory Service Administration
//!
//! An asynchronous administration library for directory services: node
//! sessions with credential-retaining refresh, typed user/group/preset
//! records, cancellable batch provisioning, and streaming queries, with
//! every notification delivered in order from a single dispatcher task.

pub mod backend;
pub mod config;
pub mod editor;
pub mod error;
pub mod events;
pub mod logging;
pub mod manager;
pub mod query;
pub mod records;
pub mod session;
pub mod store;
pub mod types;
