//! ASI Tiger device adapters for tiger-daq.
//!
//! This crate provides drivers for the following Tiger cards:
//! - Programmable logic (PLogic), optionally acting as a shutter
//! - XY stage, with ring buffer and raster scan
//! - Single-axis (Z) stage, with function generator
//! - PMT detector channel
//!
//! # Usage
//!
//! Add to your `Cargo.toml`:
//!
//! ```toml
//! [dependencies]
//! tiger-driver-asi = { path = "../tiger-driver-asi" }
//! ```
//!
//! Register the factories with your driver registry:
//!
//! ```rust,ignore
//! use tiger_core::driver::DriverRegistry;
//!
//! let registry = DriverRegistry::new();
//! tiger_driver_asi::register_all(&registry);
//! let device = registry.build("xy_stage", section, wire).await?;
//! ```

pub mod axis;
pub mod card;
pub mod input;
pub mod labels;
pub mod plogic;
pub mod pmt;
pub mod ring_buffer;
pub mod scan;
pub mod single_axis;
pub mod xy_stage;
pub mod z_stage;

pub use plogic::{PLogic, PLogicConfig, PLogicFactory, PLogicMode};
pub use pmt::{Pmt, PmtConfig, PmtFactory};
pub use xy_stage::{StepLimits, XyStage, XyStageConfig, XyStageFactory, STEP_SIZE_UM};
pub use z_stage::{ZStage, ZStageConfig, ZStageFactory};

use tiger_core::driver::DriverRegistry;

/// Register every ASI factory with `registry`.
pub fn register_all(registry: &DriverRegistry) {
    registry.register(PLogicFactory);
    registry.register(XyStageFactory);
    registry.register(ZStageFactory);
    registry.register(PmtFactory);
}

/// Force the linker to include this crate.
///
/// Call this function from main() to ensure the driver factories are
/// linked into the final binary and not stripped by the linker.
#[inline(never)]
pub fn link() {
    std::hint::black_box(std::any::TypeId::of::<PLogicFactory>());
    std::hint::black_box(std::any::TypeId::of::<XyStageFactory>());
    std::hint::black_box(std::any::TypeId::of::<ZStageFactory>());
    std::hint::black_box(std::any::TypeId::of::<PmtFactory>());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_link_does_not_panic() {
        link();
    }

    #[test]
    fn test_register_all_kinds() {
        let registry = DriverRegistry::new();
        register_all(&registry);
        assert_eq!(registry.kinds(), vec!["plogic", "pmt", "xy_stage", "z_stage"]);
    }
}
