//! # Printer Drivers
//!
//! The boundary between the dispatcher and physical printers.
//!
//! ## Driver Stack
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Driver Boundary                                 │
//! │                                                                         │
//! │  PrintJob ──► Renderer::render ──► RenderedDocument                     │
//! │                                        │                                │
//! │                                        ▼                                │
//! │                            PrinterDriver::print                         │
//! │                                        │                                │
//! │       ┌──────────────┬─────────────────┼────────────────┐               │
//! │       ▼              ▼                 ▼                ▼               │
//! │   tcp://host:9100  file:///spool   serial:///dev/    memory://          │
//! │   raw ESC/POS      spool file      rfcomm0 (BT)      dry run            │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! I/O failures are transient; bytes the printer cannot make sense of are
//! content errors.

use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tracing::{debug, warn};
use uuid::Uuid;

use printhub_core::{ContentType, CutMode, PrintError, PrintJob, Printer, PrinterState};

// =============================================================================
// Rendering
// =============================================================================

/// Printer-ready bytes for one job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedDocument {
    pub name: String,
    pub bytes: Vec<u8>,
    pub page_count: u32,
}

/// Turns a job payload into printer-ready bytes.
pub trait Renderer: Send + Sync {
    fn render(&self, job: &PrintJob, receipt_width: u32) -> Result<RenderedDocument, PrintError>;
}

const ESC_INIT: [u8; 2] = [0x1b, 0x40];
const CUT_FULL: [u8; 3] = [0x1d, 0x56, 0x00];
const CUT_PARTIAL: [u8; 3] = [0x1d, 0x56, 0x01];
const FEED_LINES: [u8; 3] = [0x1b, 0x64, 0x04];
const DRAWER_KICK: [u8; 5] = [0x1b, 0x70, 0x00, 0x19, 0xfa];

/// Default renderer: sends ESC/POS and raw payloads as-is, wraps plain text,
/// and adds the cut and drawer commands the job options ask for.
#[derive(Debug, Clone, Copy, Default)]
pub struct EscPosRenderer;

impl EscPosRenderer {
    fn wrap_text(text: &str, columns: usize) -> String {
        let mut out = String::with_capacity(text.len() + text.len() / columns.max(1));
        for line in text.lines() {
            let chars: Vec<char> = line.chars().collect();
            if chars.is_empty() {
                out.push('\n');
                continue;
            }
            for chunk in chars.chunks(columns.max(1)) {
                out.extend(chunk);
                out.push('\n');
            }
        }
        out
    }

    /// Characters per line for a paper width (font A, 12 dots per char).
    fn columns_for(width_mm: u32) -> usize {
        match width_mm {
            0..=60 => 32,
            61..=80 => 48,
            _ => 64,
        }
    }
}

impl Renderer for EscPosRenderer {
    fn render(&self, job: &PrintJob, receipt_width: u32) -> Result<RenderedDocument, PrintError> {
        let copies = job.options.copies.max(1);

        if job.content_type == ContentType::Pdf {
            if !job.content.starts_with(b"%PDF") {
                return Err(PrintError::content("payload is not a PDF document"));
            }
            let mut bytes = Vec::with_capacity(job.content.len() * copies as usize);
            for _ in 0..copies {
                bytes.extend_from_slice(&job.content);
            }
            return Ok(RenderedDocument {
                name: job.file_name.clone(),
                bytes,
                page_count: copies,
            });
        }

        let body: Vec<u8> = match job.content_type {
            ContentType::Text => {
                let text = std::str::from_utf8(&job.content)
                    .map_err(|_| PrintError::content("text payload is not valid UTF-8"))?;
                let width = job.options.paper_width.unwrap_or(receipt_width);
                let mut body = ESC_INIT.to_vec();
                body.extend_from_slice(Self::wrap_text(text, Self::columns_for(width)).as_bytes());
                body
            }
            _ => job.content.clone(),
        };

        let mut bytes = Vec::with_capacity((body.len() + 8) * copies as usize + DRAWER_KICK.len());
        for _ in 0..copies {
            bytes.extend_from_slice(&body);
            match job.options.cut_mode {
                CutMode::Full => {
                    bytes.extend_from_slice(&FEED_LINES);
                    bytes.extend_from_slice(&CUT_FULL);
                }
                CutMode::Partial => {
                    bytes.extend_from_slice(&FEED_LINES);
                    bytes.extend_from_slice(&CUT_PARTIAL);
                }
                CutMode::None => {}
            }
        }
        if job.options.open_drawer {
            bytes.extend_from_slice(&DRAWER_KICK);
        }

        Ok(RenderedDocument {
            name: job.file_name.clone(),
            bytes,
            page_count: copies,
        })
    }
}

// =============================================================================
// Driver Trait
// =============================================================================

/// Result of a successful attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PrintReceipt {
    pub printer: String,
    pub bytes_written: usize,
}

#[async_trait]
pub trait PrinterDriver: Send + Sync {
    /// Sends one document. Must not retry internally.
    async fn print(&self, printer: &Printer, document: &RenderedDocument) -> Result<PrintReceipt, PrintError>;

    /// Cheap liveness check used by the status poller.
    async fn probe(&self, printer: &Printer) -> PrinterState;
}

// =============================================================================
// Connection Driver
// =============================================================================

/// Parsed printer connection descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Connection {
    Tcp(String),
    File(PathBuf),
    Serial(PathBuf),
    Memory,
}

impl Connection {
    pub fn parse(descriptor: &str) -> Result<Self, PrintError> {
        let (scheme, target) = descriptor
            .split_once("://")
            .ok_or_else(|| PrintError::transient(format!("invalid connection '{}'", descriptor)))?;

        match scheme {
            "tcp" => Ok(Connection::Tcp(target.to_string())),
            "file" => Ok(Connection::File(PathBuf::from(target))),
            "serial" => Ok(Connection::Serial(PathBuf::from(target))),
            "memory" => Ok(Connection::Memory),
            other => Err(PrintError::transient(format!(
                "unsupported connection scheme '{}'",
                other
            ))),
        }
    }
}

/// Driver that talks to real devices based on the printer's descriptor.
#[derive(Debug, Clone)]
pub struct ConnectionDriver {
    connect_timeout: Duration,
}

impl Default for ConnectionDriver {
    fn default() -> Self {
        ConnectionDriver {
            connect_timeout: Duration::from_secs(3),
        }
    }
}

impl ConnectionDriver {
    pub fn new(connect_timeout: Duration) -> Self {
        ConnectionDriver { connect_timeout }
    }

    async fn connect(&self, address: &str) -> Result<TcpStream, PrintError> {
        match tokio::time::timeout(self.connect_timeout, TcpStream::connect(address)).await {
            Ok(Ok(stream)) => Ok(stream),
            Ok(Err(e)) => Err(PrintError::transient(format!("connect {}: {}", address, e))),
            Err(_) => Err(PrintError::transient(format!("connect {}: timed out", address))),
        }
    }
}

fn io_error(context: &str, e: std::io::Error) -> PrintError {
    PrintError::transient(format!("{}: {}", context, e))
}

#[async_trait]
impl PrinterDriver for ConnectionDriver {
    async fn print(&self, printer: &Printer, document: &RenderedDocument) -> Result<PrintReceipt, PrintError> {
        let connection = Connection::parse(&printer.connection)?;
        debug!(
            printer = %printer.name,
            bytes = document.bytes.len(),
            "Sending document"
        );

        match connection {
            Connection::Tcp(address) => {
                let mut stream = self.connect(&address).await?;
                stream
                    .write_all(&document.bytes)
                    .await
                    .map_err(|e| io_error("write", e))?;
                stream.flush().await.map_err(|e| io_error("flush", e))?;
                stream.shutdown().await.map_err(|e| io_error("close", e))?;
            }
            Connection::File(dir) => {
                tokio::fs::create_dir_all(&dir)
                    .await
                    .map_err(|e| io_error("spool directory", e))?;
                let path = dir.join(format!("{}-{}", Uuid::new_v4(), document.name));
                tokio::fs::write(&path, &document.bytes)
                    .await
                    .map_err(|e| io_error("spool write", e))?;
            }
            Connection::Serial(device) => {
                let mut port = tokio::fs::OpenOptions::new()
                    .write(true)
                    .open(&device)
                    .await
                    .map_err(|e| io_error("open device", e))?;
                port.write_all(&document.bytes)
                    .await
                    .map_err(|e| io_error("write", e))?;
                port.flush().await.map_err(|e| io_error("flush", e))?;
            }
            Connection::Memory => {}
        }

        Ok(PrintReceipt {
            printer: printer.name.clone(),
            bytes_written: document.bytes.len(),
        })
    }

    async fn probe(&self, printer: &Printer) -> PrinterState {
        let connection = match Connection::parse(&printer.connection) {
            Ok(connection) => connection,
            Err(e) => {
                warn!(printer = %printer.name, error = %e, "Unusable connection descriptor");
                return PrinterState::Error;
            }
        };

        match connection {
            Connection::Tcp(address) => match self.connect(&address).await {
                Ok(_) => PrinterState::Idle,
                Err(_) => PrinterState::Offline,
            },
            Connection::File(dir) => match tokio::fs::create_dir_all(&dir).await {
                Ok(()) => PrinterState::Idle,
                Err(_) => PrinterState::Error,
            },
            Connection::Serial(device) => match tokio::fs::metadata(&device).await {
                Ok(_) => PrinterState::Idle,
                Err(_) => PrinterState::Offline,
            },
            Connection::Memory => PrinterState::Idle,
        }
    }
}

// =============================================================================
// Memory Driver
// =============================================================================

#[derive(Debug, Default)]
struct MemoryState {
    scripts: HashMap<String, VecDeque<Result<(), PrintError>>>,
    states: HashMap<String, PrinterState>,
    calls: Vec<String>,
    printed: Vec<(String, Vec<u8>)>,
}

/// In-process driver with scripted outcomes.
///
/// Each printer has a queue of outcomes; an empty queue means success.
/// Used by `--dry-run` and by tests.
#[derive(Debug, Default)]
pub struct MemoryDriver {
    state: Mutex<MemoryState>,
    delay: Option<Duration>,
}

impl MemoryDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every attempt takes `delay` before it completes.
    pub fn with_delay(delay: Duration) -> Self {
        MemoryDriver {
            state: Mutex::default(),
            delay: Some(delay),
        }
    }

    /// Queues outcomes for the next attempts on `printer`.
    pub async fn script(&self, printer: &str, outcomes: impl IntoIterator<Item = Result<(), PrintError>>) {
        let mut state = self.state.lock().await;
        state
            .scripts
            .entry(printer.to_string())
            .or_default()
            .extend(outcomes);
    }

    /// Makes the next `times` attempts on `printer` fail with `error`.
    pub async fn fail_next(&self, printer: &str, error: PrintError, times: usize) {
        self.script(printer, std::iter::repeat(Err(error)).take(times))
            .await;
    }

    /// State reported by `probe` (default idle).
    pub async fn set_state(&self, printer: &str, state: PrinterState) {
        self.state
            .lock()
            .await
            .states
            .insert(printer.to_string(), state);
    }

    /// Printer names in attempt order.
    pub async fn calls(&self) -> Vec<String> {
        self.state.lock().await.calls.clone()
    }

    /// Documents that printed successfully, with their printer.
    pub async fn printed(&self) -> Vec<(String, Vec<u8>)> {
        self.state.lock().await.printed.clone()
    }
}

#[async_trait]
impl PrinterDriver for MemoryDriver {
    async fn print(&self, printer: &Printer, document: &RenderedDocument) -> Result<PrintReceipt, PrintError> {
        let outcome = {
            let mut state = self.state.lock().await;
            state.calls.push(printer.name.clone());
            state
                .scripts
                .get_mut(&printer.name)
                .and_then(VecDeque::pop_front)
                .unwrap_or(Ok(()))
        };

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        outcome?;
        self.state
            .lock()
            .await
            .printed
            .push((printer.name.clone(), document.bytes.clone()));

        Ok(PrintReceipt {
            printer: printer.name.clone(),
            bytes_written: document.bytes.len(),
        })
    }

    async fn probe(&self, printer: &Printer) -> PrinterState {
        self.state
            .lock()
            .await
            .states
            .get(&printer.name)
            .copied()
            .unwrap_or(PrinterState::Idle)
    }
}
