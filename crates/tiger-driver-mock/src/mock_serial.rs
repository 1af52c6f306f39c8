//! Mock serial line for exercising [`SerialHub`](tiger_core::serial::SerialHub).
//!
//! [`MockSerialPort`] implements `AsyncRead + AsyncWrite` and is handed to
//! the code under test; [`ControllerHarness`] stays in the test and plays the
//! controller side of the line: it waits for `\r`-terminated commands and
//! answers with `\r\n`-terminated replies.
//!
//! # Example
//!
//! ```rust,ignore
//! let (port, mut harness) = mock_serial::new();
//! let hub = SerialHub::new(wrap_shared(Box::new(port)));
//!
//! let query = tokio::spawn(async move { hub.send_and_verify("2V", ":A").await });
//! harness.expect_and_reply("2V", ":A v3.30").await?;
//! ```

use anyhow::{anyhow, bail, Result};
use std::collections::VecDeque;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

/// How long the harness waits for the code under test to send a command.
pub const HARNESS_TIMEOUT: Duration = Duration::from_secs(2);

/// Host side of the mock line.
#[derive(Debug)]
pub struct MockSerialPort {
    to_controller: UnboundedSender<Vec<u8>>,
    from_controller: UnboundedReceiver<Vec<u8>>,
    pending: VecDeque<u8>,
}

/// Controller side of the mock line, driven by the test.
#[derive(Debug)]
pub struct ControllerHarness {
    from_host: UnboundedReceiver<Vec<u8>>,
    to_host: UnboundedSender<Vec<u8>>,
    received: Vec<u8>,
}

/// Create a connected port/harness pair.
pub fn new() -> (MockSerialPort, ControllerHarness) {
    let (host_tx, host_rx) = mpsc::unbounded_channel();
    let (controller_tx, controller_rx) = mpsc::unbounded_channel();
    (
        MockSerialPort {
            to_controller: host_tx,
            from_controller: controller_rx,
            pending: VecDeque::new(),
        },
        ControllerHarness {
            from_host: host_rx,
            to_host: controller_tx,
            received: Vec::new(),
        },
    )
}

// =============================================================================
// MockSerialPort
// =============================================================================

impl MockSerialPort {
    fn drain_into(&mut self, buf: &mut ReadBuf<'_>) {
        let n = buf.remaining().min(self.pending.len());
        let chunk: Vec<u8> = self.pending.drain(..n).collect();
        buf.put_slice(&chunk);
    }
}

impl AsyncRead for MockSerialPort {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        if self.pending.is_empty() {
            match self.from_controller.poll_recv(cx) {
                Poll::Ready(Some(bytes)) => self.pending.extend(bytes),
                // Harness dropped: end of file
                Poll::Ready(None) => return Poll::Ready(Ok(())),
                Poll::Pending => return Poll::Pending,
            }
        }
        self.drain_into(buf);
        Poll::Ready(Ok(()))
    }
}

impl AsyncWrite for MockSerialPort {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Poll::Ready(
            self.to_controller
                .send(buf.to_vec())
                .map(|_| buf.len())
                .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "controller harness gone")),
        )
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

// =============================================================================
// ControllerHarness
// =============================================================================

impl ControllerHarness {
    /// Wait for the next `\r`-terminated command and return it without the
    /// terminator.
    pub async fn next_command(&mut self) -> Result<String> {
        loop {
            if let Some(end) = self.received.iter().position(|&b| b == b'\r') {
                let line: Vec<u8> = self.received.drain(..=end).collect();
                return Ok(String::from_utf8_lossy(&line[..end]).into_owned());
            }
            match tokio::time::timeout(HARNESS_TIMEOUT, self.from_host.recv()).await {
                Ok(Some(bytes)) => self.received.extend_from_slice(&bytes),
                Ok(None) => bail!("host port closed while waiting for a command"),
                Err(_) => bail!(
                    "timed out waiting for a command; partial input {:?}",
                    String::from_utf8_lossy(&self.received)
                ),
            }
        }
    }

    /// Send one reply line; `\r\n` is appended.
    pub fn reply(&self, line: &str) -> Result<()> {
        self.to_host
            .send(format!("{}\r\n", line).into_bytes())
            .map_err(|_| anyhow!("host port dropped"))
    }

    /// Send raw bytes without framing.
    pub fn reply_raw(&self, bytes: &[u8]) -> Result<()> {
        self.to_host
            .send(bytes.to_vec())
            .map_err(|_| anyhow!("host port dropped"))
    }

    /// Require the next command to equal `expected`.
    pub async fn expect(&mut self, expected: &str) -> Result<()> {
        let command = self.next_command().await?;
        if command != expected {
            bail!("expected command {:?}, got {:?}", expected, command);
        }
        Ok(())
    }

    /// Require `expected`, then answer with `reply`.
    pub async fn expect_and_reply(&mut self, expected: &str, reply: &str) -> Result<()> {
        self.expect(expected).await?;
        self.reply(reply)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

    #[tokio::test]
    async fn test_command_and_reply_framing() {
        let (port, mut harness) = new();
        let mut port = BufReader::new(port);

        let host = tokio::spawn(async move {
            port.write_all(b"2V\r").await.unwrap();
            let mut line = String::new();
            port.read_line(&mut line).await.unwrap();
            line
        });

        harness.expect_and_reply("2V", ":A v3.30").await.unwrap();
        assert_eq!(host.await.unwrap(), ":A v3.30\r\n");
    }

    #[tokio::test]
    async fn test_split_writes_are_joined() {
        let (mut port, mut harness) = new();
        port.write_all(b"2CC").await.unwrap();
        port.write_all(b"A X=3\r").await.unwrap();
        assert_eq!(harness.next_command().await.unwrap(), "2CCA X=3");
    }

    #[tokio::test]
    async fn test_wrong_command_is_reported() {
        let (mut port, mut harness) = new();
        port.write_all(b"W X\r").await.unwrap();
        assert!(harness.expect("W Y").await.is_err());
    }
}
