//! Test doubles for Tiger controllers.
//!
//! - [`mock_wire::MockWire`]: an in-memory controller implementing
//!   [`WireAdapter`](tiger_core::wire::WireAdapter) with scripted replies,
//!   register echo, command recording and fault injection.
//! - [`mock_serial`]: an `AsyncRead + AsyncWrite` port plus a harness that
//!   plays the controller end of a serial line, for testing
//!   [`SerialHub`](tiger_core::serial::SerialHub) framing.

pub mod mock_serial;
pub mod mock_wire;

pub use mock_wire::{MockWire, ReplyStyle};
