//! Serial transport for Tiger controllers.
//!
//! [`SerialHub`] is the [`WireAdapter`] used against real hardware. All cards
//! in a Tiger chassis share one serial line, so every device adapter holds a
//! clone of the same hub and the hub's mutex keeps exactly one command
//! outstanding at a time.
//!
//! # Feature Flag
//!
//! Opening a real port needs the `serial` feature:
//!
//! ```toml
//! [dependencies]
//! tiger-core = { path = "../tiger-core", features = ["serial"] }
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use tiger_core::serial::{open_serial_async, wrap_shared, SerialHub};
//!
//! let port = open_serial_async("/dev/ttyUSB0", 115_200, "Tiger").await?;
//! let hub = SerialHub::new(wrap_shared(Box::new(port)));
//! let reply = hub.send_and_verify("2V", ":A").await?;
//! ```

use crate::error::{TigerError, TigerResult};
use crate::limits::{DEFAULT_REPLY_TIMEOUT, LATE_REPLY_GRACE, MAX_DRAIN_BYTES, MAX_REPLY_BYTES};
use crate::wire::{RawResponse, WireAdapter};
use async_trait::async_trait;
use futures::FutureExt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{
    AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader,
};
use tokio::sync::Mutex;
use tracing::{debug, trace};

// =============================================================================
// Serial Port Trait
// =============================================================================

/// Trait alias for async serial port I/O.
///
/// Any type implementing `AsyncRead + AsyncWrite + Unpin + Send` can be used
/// as a serial port: `tokio_serial::SerialStream`, `tokio::io::DuplexStream`
/// or a mock port.
pub trait SerialPortIO: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> SerialPortIO for T {}

// =============================================================================
// Type Aliases
// =============================================================================

/// Type-erased boxed serial port.
pub type DynSerial = Box<dyn SerialPortIO>;

/// Thread-safe shared serial port with buffered reading.
pub type SharedPort = Arc<Mutex<BufReader<DynSerial>>>;

/// Create a [`SharedPort`] from a type-erased serial port.
pub fn wrap_shared(port: DynSerial) -> SharedPort {
    Arc::new(Mutex::new(BufReader::new(port)))
}

/// Open a serial port asynchronously using spawn_blocking, 8N1 with no flow
/// control.
///
/// # Errors
///
/// Returns an error if the port cannot be opened or spawn_blocking fails.
#[cfg(feature = "serial")]
pub async fn open_serial_async(
    port_path: &str,
    baud_rate: u32,
    device_name: &str,
) -> anyhow::Result<tokio_serial::SerialStream> {
    use anyhow::Context;
    use tokio::task::spawn_blocking;
    use tokio_serial::SerialPortBuilderExt;

    let port_path_owned = port_path.to_string();
    let device_name_owned = device_name.to_string();

    spawn_blocking(move || {
        tokio_serial::new(&port_path_owned, baud_rate)
            .data_bits(tokio_serial::DataBits::Eight)
            .parity(tokio_serial::Parity::None)
            .stop_bits(tokio_serial::StopBits::One)
            .flow_control(tokio_serial::FlowControl::None)
            .open_native_async()
            .context(format!(
                "Failed to open {} serial port: {}",
                device_name_owned, port_path_owned
            ))
    })
    .await
    .context("spawn_blocking for serial port opening failed")?
}

/// Discard input that is already buffered or readable right now, without
/// waiting for more.
///
/// Stops after `limit` bytes, at end of file, or as soon as a read would
/// block. Returns the number of bytes discarded.
pub fn drain_pending<R: AsyncRead + Unpin>(port: &mut R, limit: usize) -> usize {
    let mut discard = [0u8; 256];
    let mut total = 0usize;

    while total < limit {
        match port.read(&mut discard).now_or_never() {
            Some(Ok(0)) => break, // EOF
            Some(Ok(n)) => total += n,
            Some(Err(_)) => break,
            None => break, // nothing pending
        }
    }

    total
}

/// Read one `\n`-terminated line of at most [`MAX_REPLY_BYTES`] bytes and
/// strip the trailing `\r\n`.
async fn read_reply<R: AsyncBufRead + Unpin>(port: &mut R, command: &str) -> TigerResult<String> {
    let mut line = Vec::new();
    let read = (&mut *port)
        .take(MAX_REPLY_BYTES as u64 + 1)
        .read_until(b'\n', &mut line)
        .await?;
    if read == 0 {
        return Err(TigerError::Transport(format!(
            "port closed while waiting for reply to '{}'",
            command
        )));
    }
    if line.len() > MAX_REPLY_BYTES {
        return Err(TigerError::Transport(format!(
            "reply to '{}' exceeds {} bytes",
            command, MAX_REPLY_BYTES
        )));
    }
    if line.last() != Some(&b'\n') {
        return Err(TigerError::Transport(format!(
            "port closed in the middle of the reply to '{}'",
            command
        )));
    }

    let text = String::from_utf8_lossy(&line);
    Ok(text.trim_end_matches(['\r', '\n']).to_string())
}

// =============================================================================
// SerialHub
// =============================================================================

/// Request/response adapter over a shared serial line.
///
/// Commands are terminated with `\r`; a reply is one line ending in `\n`
/// with the trailing `\r\n` stripped. Multi-line replies such as the build
/// dump arrive as a single line whose parts are separated by bare `\r`.
///
/// Before every command the hub throws away unsolicited input. After a
/// timeout or an oversized reply the line is marked out of step: the next
/// command first waits up to [`LATE_REPLY_GRACE`] for the rest of the
/// abandoned reply and discards it.
#[derive(Clone)]
pub struct SerialHub {
    port: SharedPort,
    timeout: Duration,
    out_of_step: Arc<AtomicBool>,
}

impl SerialHub {
    /// Hub with the default reply timeout.
    pub fn new(port: SharedPort) -> Self {
        Self::with_timeout(port, DEFAULT_REPLY_TIMEOUT)
    }

    /// Hub with a custom reply timeout.
    pub fn with_timeout(port: SharedPort, timeout: Duration) -> Self {
        Self {
            port,
            timeout,
            out_of_step: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Reply deadline.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn resync(&self, port: &mut BufReader<DynSerial>, command: &str) {
        if self.out_of_step.swap(false, Ordering::SeqCst) {
            match tokio::time::timeout(LATE_REPLY_GRACE, read_reply(port, "late reply")).await {
                Ok(Ok(late)) => debug!(command, late = %late, "discarded late reply"),
                Ok(Err(e)) => debug!(command, error = %e, "late reply unreadable"),
                Err(_) => debug!(command, "no late reply"),
            }
        }
        let dropped = drain_pending(port, MAX_DRAIN_BYTES);
        if dropped > 0 {
            debug!(command, dropped, "discarded unsolicited input");
        }
    }
}

#[async_trait]
impl WireAdapter for SerialHub {
    async fn send(&self, command: &str) -> TigerResult<RawResponse> {
        let mut port = self.port.lock().await;
        self.resync(&mut port, command).await;

        let framed = format!("{}\r", command);
        let writer = port.get_mut();
        writer.write_all(framed.as_bytes()).await?;
        writer.flush().await?;
        trace!(command, "tiger >>");

        let reply = match tokio::time::timeout(self.timeout, read_reply(&mut *port, command)).await {
            Ok(Ok(reply)) => reply,
            Ok(Err(e)) => {
                self.out_of_step.store(true, Ordering::SeqCst);
                return Err(e);
            }
            Err(_) => {
                self.out_of_step.store(true, Ordering::SeqCst);
                return Err(TigerError::Timeout {
                    command: command.to_string(),
                    timeout_ms: self.timeout.as_millis() as u64,
                });
            }
        };

        trace!(command, reply = %reply, "tiger <<");
        Ok(RawResponse::new(reply))
    }
}
