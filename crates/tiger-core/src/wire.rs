//! Wire adapter interface and reply field parsing.
//!
//! Tiger commands are single ASCII lines of the form
//! `<address><verb> <axis>=<value>`. The controller answers with a line that
//! starts with `:A` on success or `:N<code>` on error; some older verbs echo
//! the axis first (`X=12 :A`) or put the axis after the colon (`:X=0.04 A`).
//! Device code names the prefix it expects and the marker of the one field it
//! wants, and [`RawResponse::field`] does the extraction.

use crate::capability::{BuildInfo, FirmwareVersion};
use crate::error::{TigerError, TigerResult};
use async_trait::async_trait;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Prefix of every error reply.
pub const ERROR_PREFIX: &str = ":N";

/// Prefix of a plain acknowledgement.
pub const ACK_PREFIX: &str = ":A";

// =============================================================================
// Reply Parsing
// =============================================================================

/// Where in a reply a field starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Marker {
    /// Text after the first `=`
    AfterEquals,
    /// Text from byte offset `n` on
    AfterPosition(usize),
    /// Text after the first `_`
    AfterUnderscore,
    /// CR-delimited line `n` (zero based)
    Line(usize),
}

impl fmt::Display for Marker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Marker::AfterEquals => write!(f, "value after '='"),
            Marker::AfterPosition(n) => write!(f, "value at position {}", n),
            Marker::AfterUnderscore => write!(f, "value after '_'"),
            Marker::Line(n) => write!(f, "line {}", n),
        }
    }
}

/// One reply line (or CR-joined lines) exactly as received, minus the
/// trailing line terminator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawResponse {
    text: String,
}

impl RawResponse {
    /// Wrap reply text.
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }

    /// Reply text.
    pub fn as_str(&self) -> &str {
        &self.text
    }

    /// Whether the reply is a controller error.
    pub fn is_error(&self) -> bool {
        self.text.starts_with(ERROR_PREFIX)
    }

    fn slice(&self, marker: Marker) -> Option<&str> {
        match marker {
            Marker::AfterEquals => self.text.split_once('=').map(|(_, rest)| rest),
            Marker::AfterPosition(n) => self.text.get(n..),
            Marker::AfterUnderscore => self.text.split_once('_').map(|(_, rest)| rest),
            Marker::Line(n) => self.text.split('\r').nth(n),
        }
    }

    /// Parse the first whitespace-delimited token at `marker`.
    pub fn field<T: FromStr>(&self, marker: Marker) -> TigerResult<T> {
        self.slice(marker)
            .and_then(|rest| rest.split_whitespace().next())
            .and_then(|token| token.parse::<T>().ok())
            .ok_or_else(|| TigerError::parse(marker.to_string(), &self.text))
    }

    /// Parse a number at `marker`, accepting either integer or decimal text.
    pub fn number(&self, marker: Marker) -> TigerResult<f64> {
        self.field::<f64>(marker)
    }

    /// Parse an integer at `marker`; decimal text is rounded.
    pub fn integer(&self, marker: Marker) -> TigerResult<i64> {
        self.field::<i64>(marker)
            .or_else(|_| self.number(marker).map(|v| v.round() as i64))
    }

    /// Character at byte offset `n`.
    pub fn char_at(&self, n: usize) -> TigerResult<char> {
        self.text
            .get(n..)
            .and_then(|rest| rest.chars().next())
            .ok_or_else(|| TigerError::parse(format!("character at position {}", n), &self.text))
    }

    /// Full text of CR-delimited line `n`, trimmed.
    pub fn line(&self, n: usize) -> Option<&str> {
        self.text.split('\r').nth(n).map(str::trim)
    }
}

impl fmt::Display for RawResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.text)
    }
}

/// Check `reply` against `expected_prefix`, mapping `:N` replies to
/// [`TigerError::ControllerError`].
pub fn verify_reply(command: &str, expected_prefix: &str, reply: RawResponse) -> TigerResult<RawResponse> {
    if reply.as_str().starts_with(expected_prefix) {
        return Ok(reply);
    }
    if let Some(code) = reply.as_str().strip_prefix(ERROR_PREFIX) {
        return Err(TigerError::ControllerError {
            command: command.to_string(),
            code: code.trim().to_string(),
        });
    }
    Err(TigerError::UnexpectedReply {
        command: command.to_string(),
        expected: expected_prefix.to_string(),
        response: reply.as_str().to_string(),
    })
}

/// Format a number the way the controller expects it: integers without a
/// decimal point, everything else with at most six decimals and no trailing
/// zeros.
pub fn format_number(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        return format!("{}", value as i64);
    }
    let text = format!("{:.6}", value);
    let text = text.trim_end_matches('0').trim_end_matches('.');
    if text == "-0" {
        "0".to_string()
    } else {
        text.to_string()
    }
}

// =============================================================================
// Wire Adapter
// =============================================================================

/// Firmware version and build info of one card.
#[derive(Debug, Clone, PartialEq)]
pub struct CardIdentity {
    /// Firmware version
    pub version: FirmwareVersion,
    /// Build info
    pub build: BuildInfo,
}

/// Line-oriented request/response channel to a Tiger controller.
///
/// Implementations own framing and serialize access so that exactly one
/// command is outstanding at a time. Nothing here retries.
#[async_trait]
pub trait WireAdapter: Send + Sync {
    /// Send one command and return its reply unverified.
    async fn send(&self, command: &str) -> TigerResult<RawResponse>;

    /// Send one command and require the reply to start with `expected_prefix`.
    async fn send_and_verify(&self, command: &str, expected_prefix: &str) -> TigerResult<RawResponse> {
        let reply = self.send(command).await?;
        verify_reply(command, expected_prefix, reply)
    }

    /// Like [`send_and_verify`](WireAdapter::send_and_verify), then wait
    /// `settle` before returning.
    async fn send_and_verify_settled(
        &self,
        command: &str,
        expected_prefix: &str,
        settle: Duration,
    ) -> TigerResult<RawResponse> {
        let reply = self.send_and_verify(command, expected_prefix).await?;
        tokio::time::sleep(settle).await;
        Ok(reply)
    }

    /// Query firmware version (`<addr>V`) and build info (`<addr>BU X`).
    async fn card_identity(&self, address: char) -> TigerResult<CardIdentity> {
        let command = format!("{}V", address);
        let reply = self.send_and_verify(&command, ACK_PREFIX).await?;
        let version = FirmwareVersion::parse_reply(reply.as_str())
            .ok_or_else(|| TigerError::parse("firmware version", reply.as_str()))?;
        let command = format!("{}BU X", address);
        let reply = self.send(&command).await?;
        if let Some(code) = reply.as_str().strip_prefix(ERROR_PREFIX) {
            return Err(TigerError::ControllerError {
                command,
                code: code.trim().to_string(),
            });
        }
        Ok(CardIdentity {
            version,
            build: BuildInfo::parse(reply.as_str()),
        })
    }
}
