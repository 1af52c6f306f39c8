//! # tiger-daq
//!
//! Host application for ASI Tiger controllers. Loads a TOML device list,
//! opens every card on one serial line through the ASI adapters and exposes
//! their properties by name.
//!
//! ## Modules
//!
//! - [`config`]: figment-based configuration
//! - [`logging`]: tracing subscriber setup
//! - [`session`]: device registry and opened devices
//!
//! The dispatch layer lives in `tiger-core`; the device adapters in
//! `tiger-driver-asi`.

pub mod config;
pub mod logging;
pub mod session;

pub use config::{DeviceConfig, DeviceKind, TigerConfig};
pub use session::Session;
