//! Shared timing and sizing constants for Tiger communication.
//!
//! This module centralizes:
//! - Serial defaults (baud rate, reply timeout)
//! - Settle delays the controller needs after specific commands
//! - Addressing ranges of the programmable logic card

use std::time::Duration;

// =============================================================================
// Serial Defaults
// =============================================================================

/// Default Tiger baud rate.
pub const DEFAULT_BAUD_RATE: u32 = 115_200;

/// Default deadline for one command/reply exchange (2 seconds).
pub const DEFAULT_REPLY_TIMEOUT: Duration = Duration::from_secs(2);

/// Maximum accepted reply length in bytes. Build dumps are the longest replies.
pub const MAX_REPLY_BYTES: usize = 4096;

/// How long the hub keeps listening for the reply to a command that timed
/// out before it sends the next command. The wait ends as soon as the late
/// line arrives.
pub const LATE_REPLY_GRACE: Duration = Duration::from_millis(500);

/// Upper bound on unsolicited bytes discarded before one command.
pub const MAX_DRAIN_BYTES: usize = 4 * MAX_REPLY_BYTES;

// =============================================================================
// Settle Delays
// =============================================================================

/// Wait after `SS` so the controller finishes writing its NVRAM.
pub const SAVE_SETTINGS_SETTLE: Duration = Duration::from_millis(200);

/// Wait after a PMT overload reset before the next command.
pub const OVERLOAD_RESET_SETTLE: Duration = Duration::from_millis(200);

// =============================================================================
// Programmable Logic Addressing
// =============================================================================

/// Number of addressable PLogic locations.
pub const PLOGIC_ADDRESSES: u32 = 128;

/// Added to an address to select its inverted value.
pub const PLOGIC_INVERT_OFFSET: u32 = 64;

/// Logic cell count when the build name does not say.
pub const PLOGIC_DEFAULT_CELLS: u32 = 16;

/// First front panel BNC address.
pub const PLOGIC_FRONTPANEL_START: u32 = 33;

/// Last front panel BNC address.
pub const PLOGIC_FRONTPANEL_END: u32 = 40;

/// First backplane TTL address.
pub const PLOGIC_BACKPLANE_START: u32 = 41;

/// Last backplane TTL address.
pub const PLOGIC_BACKPLANE_END: u32 = 48;

/// Whether `address` is a physical IO (front panel or backplane).
pub fn is_physical_io(address: u32) -> bool {
    (PLOGIC_FRONTPANEL_START..=PLOGIC_BACKPLANE_END).contains(&address)
}
