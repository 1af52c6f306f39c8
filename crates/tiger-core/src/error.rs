//! Error types for property dispatch and controller communication.
//!
//! Every failure that can escape a property read or write is a [`TigerError`].
//! Callers that only care about the broad category use [`TigerError::kind`],
//! which collapses the variants into the four [`ErrorKind`]s:
//!
//! - **Transport**: the command/reply round trip never completed (I/O error,
//!   timeout, closed port).
//! - **ProtocolMismatch**: a reply arrived but did not carry the expected
//!   prefix, the field could not be parsed, or the controller answered with
//!   its `:N` error prefix.
//! - **InvalidValue**: a write failed allowed-value or limit validation, or a
//!   read produced a wire code that has no label.
//! - **UnsupportedOperation**: the property does not exist for this firmware
//!   or mode, or is read-only.
//!
//! A failing call returns immediately. Nothing is retried and the cached
//! property value is left untouched.

use thiserror::Error;

// =============================================================================
// Error Kinds
// =============================================================================

/// Coarse classification of a [`TigerError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Round trip to the controller could not complete.
    Transport,
    /// Reply did not match the expected grammar.
    ProtocolMismatch,
    /// Value rejected by validation or unmappable wire code.
    InvalidValue,
    /// Property missing for this firmware/mode, or read-only.
    UnsupportedOperation,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            ErrorKind::Transport => "transport",
            ErrorKind::ProtocolMismatch => "protocol_mismatch",
            ErrorKind::InvalidValue => "invalid_value",
            ErrorKind::UnsupportedOperation => "unsupported_operation",
        };
        write!(f, "{}", label)
    }
}

// =============================================================================
// TigerError
// =============================================================================

/// Convenience alias used at every dispatch boundary.
pub type TigerResult<T> = std::result::Result<T, TigerError>;

/// Primary error type for controller communication and property dispatch.
#[derive(Error, Debug)]
pub enum TigerError {
    /// Underlying serial I/O failed while writing a command or reading a reply.
    #[error("Serial I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The transport is unusable (port closed, adapter shut down, injected fault).
    #[error("Transport error: {0}")]
    Transport(String),

    /// No reply line arrived before the configured deadline.
    ///
    /// The command may or may not have been executed by the controller.
    #[error("Timed out after {timeout_ms} ms waiting for reply to '{command}'")]
    Timeout {
        /// Command that was sent
        command: String,
        /// Deadline that elapsed
        timeout_ms: u64,
    },

    /// Reply did not start with the prefix the command expects.
    #[error("Reply '{response}' to '{command}' does not start with '{expected}'")]
    UnexpectedReply {
        /// Command that was sent
        command: String,
        /// Prefix the reply had to start with
        expected: String,
        /// Reply actually received
        response: String,
    },

    /// Controller answered with its `:N<code>` error prefix.
    ///
    /// Common codes: `-1` unknown command, `-2` unrecognized axis,
    /// `-3` missing parameters, `-4` parameter out of range.
    #[error("Controller rejected '{command}' with error code {code}")]
    ControllerError {
        /// Command that was sent
        command: String,
        /// Text following `:N`, usually a negative integer
        code: String,
    },

    /// A field could not be extracted from a reply.
    #[error("Cannot parse {field} from reply '{response}'")]
    Parse {
        /// Human-readable description of the field marker
        field: String,
        /// Reply the field was taken from
        response: String,
    },

    /// Value failed allowed-set or limit validation, or a read produced a
    /// wire code without a label.
    #[error("Invalid value '{value}' for property '{property}': {reason}")]
    InvalidValue {
        /// Property name
        property: String,
        /// Offending value (label, number or wire code)
        value: String,
        /// Why it was rejected
        reason: String,
    },

    /// Write attempted on a read-only property.
    #[error("Property '{0}' is read-only")]
    ReadOnly(String),

    /// Property is not part of this device's registry for the detected
    /// firmware, build and mode.
    #[error("Property '{0}' is not available on this device")]
    UnknownProperty(String),

    /// Operation not supported by this device.
    #[error("Operation not supported: {0}")]
    Unsupported(String),
}

impl TigerError {
    /// Coarse category of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            TigerError::Io(_) | TigerError::Transport(_) | TigerError::Timeout { .. } => {
                ErrorKind::Transport
            }
            TigerError::UnexpectedReply { .. }
            | TigerError::ControllerError { .. }
            | TigerError::Parse { .. } => ErrorKind::ProtocolMismatch,
            TigerError::InvalidValue { .. } => ErrorKind::InvalidValue,
            TigerError::ReadOnly(_) | TigerError::UnknownProperty(_) | TigerError::Unsupported(_) => {
                ErrorKind::UnsupportedOperation
            }
        }
    }

    /// Build an [`TigerError::InvalidValue`].
    pub fn invalid_value(
        property: impl Into<String>,
        value: impl ToString,
        reason: impl Into<String>,
    ) -> Self {
        TigerError::InvalidValue {
            property: property.into(),
            value: value.to_string(),
            reason: reason.into(),
        }
    }

    /// Build a [`TigerError::Parse`].
    pub fn parse(field: impl Into<String>, response: impl Into<String>) -> Self {
        TigerError::Parse {
            field: field.into(),
            response: response.into(),
        }
    }
}
