use super::{escpos, Printer, PrinterError};
use async_trait::async_trait;
use serial2_tokio::SerialPort;
use spool_shared::config::PrinterDevice;
use spool_shared::Job;
use std::collections::BTreeMap;
use std::time::Duration;

const FALLBACK_BAUD: u32 = 9600;

/// Receipt printers attached over a serial line.
///
/// Named devices come from the settings file. A job may also name a port
/// path directly, which is opened at the fallback baud rate.
pub struct SerialPrinter {
    devices: BTreeMap<String, PrinterDevice>,
    default_printer: Option<String>,
}

impl SerialPrinter {
    pub fn new(devices: BTreeMap<String, PrinterDevice>, default_printer: Option<String>) -> Self {
        Self { devices, default_printer }
    }

    fn resolve(&self, device: &str) -> Result<PrinterDevice, PrinterError> {
        if let Some(found) = self.devices.get(device) {
            return Ok(found.clone());
        }
        if self.system_ports().iter().any(|p| p == device) {
            return Ok(PrinterDevice { port: device.to_string(), baud: FALLBACK_BAUD });
        }
        Err(PrinterError::NotFound(device.to_string()))
    }

    fn system_ports(&self) -> Vec<String> {
        match SerialPort::available_ports() {
            Ok(paths) => paths.iter().map(|p| p.display().to_string()).collect(),
            Err(e) => {
                tracing::debug!("Could not enumerate serial ports: {}", e);
                vec![]
            }
        }
    }
}

#[async_trait]
impl Printer for SerialPrinter {
    async fn print(&self, job: &Job, device: &str, copy_delay: Duration) -> Result<(), PrinterError> {
        let target = self.resolve(device)?;
        let port = SerialPort::open(&target.port, target.baud)?;
        let payload = escpos::render(&job.content, &job.format, job.paper_width_mm());
        let copies = job.effective_copies();

        for copy in 1..=copies {
            if copy > 1 && !copy_delay.is_zero() {
                tokio::time::sleep(copy_delay).await;
            }
            tracing::debug!(job_id = job.id, copy, copies, port = %target.port, "Sending copy");
            port.write_all(&payload).await?;
        }
        Ok(())
    }

    fn list_available(&self) -> Vec<String> {
        let mut names: Vec<String> = self.devices.keys().cloned().collect();
        for port in self.system_ports() {
            if !self.devices.values().any(|d| d.port == port) {
                names.push(port);
            }
        }
        names
    }

    fn default_printer(&self) -> Option<String> {
        self.default_printer
            .clone()
            .or_else(|| self.devices.keys().next().cloned())
    }
}
