// spool-rs: print job agent library

pub mod agent;
pub mod breaker;
pub mod health;
pub mod job_processor;
pub mod logging;
pub mod observer;
pub mod poller;
pub mod printer;
pub mod scheduler;
pub mod stats;
pub mod telemetry;
pub mod transport;
pub mod update;
pub mod web;
