//! Output device collaborator.

pub mod escpos;
pub mod serial;

use async_trait::async_trait;
use spool_shared::Job;
use std::time::Duration;
use thiserror::Error;

pub use serial::SerialPrinter;

#[derive(Debug, Error)]
pub enum PrinterError {
    #[error("no printer configured")]
    NoDevice,
    #[error("printer '{0}' not found")]
    NotFound(String),
    #[error("device IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("device rejected job: {0}")]
    Rejected(String),
}

#[async_trait]
pub trait Printer: Send + Sync {
    /// Prints every copy of `job` on `device`, sleeping `copy_delay` between
    /// copies.
    async fn print(&self, job: &Job, device: &str, copy_delay: Duration) -> Result<(), PrinterError>;

    fn list_available(&self) -> Vec<String>;

    fn default_printer(&self) -> Option<String>;
}
