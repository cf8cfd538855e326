//! Local read-mostly HTTP API for operators and monitoring.

pub mod api;
pub mod models;
