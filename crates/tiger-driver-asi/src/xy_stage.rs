//! ASI Tiger XY stage.
//!
//! Two motor axes on one card. Each axis gets the generic motor properties
//! from [`crate::axis`]; the card adds a shared wait time, the joystick and
//! wheel assignment, and (when the firmware was built with them) the ring
//! buffer and raster scan engines.
//!
//! Servo tuning registers are hidden until `EnableAdvancedProperties` is set
//! to Yes. Servo writes go to both axes at once; reads come from the X axis.
//!
//! Besides properties the stage has a motion API. Positions are in microns
//! or in host steps of [`STEP_SIZE_UM`]; the controller works in its own
//! units, `um * unit multiplier`. A negative multiplier mirrors the axis.
//!
//! | Operation | Wire |
//! |---|---|
//! | position | `W x`, `W y` |
//! | absolute / relative move | `M x= y=`, `R x= y=` |
//! | stop | `<addr>HALT` |
//! | busy | `RS x?` (`RS x` before 2.7) |
//! | origin, home, set home | `H x=0 y=0`, `! x y`, `HM x+ y+` |
//! | constant velocity | `VE x= y=` |
//! | step limits | `SL`, `SU` (mm) |
//!
//! Ring buffer sequences are kept on the host until sent: `<addr>RM X=0`
//! clears the card's buffer, each point is loaded with `LD`, and
//! `<addr>TTL X=1` arms TTL stepping after `<addr>RM Z=0` rewinds the buffer.
//!
//! # Usage
//!
//! ```rust,ignore
//! use tiger_driver_asi::xy_stage::{XyStage, XyStageConfig};
//!
//! let config = XyStageConfig::new("stage", '2', 'X', 'Y');
//! let mut stage = XyStage::initialize(&config, wire).await?;
//! stage.device_mut().set_text("MotorSpeed(mm/s)-X", "1.5").await?;
//! stage.move_to_um(1500.0, -200.0).await?;
//! while stage.busy().await? {
//!     tokio::time::sleep(Duration::from_millis(20)).await;
//! }
//! ```

use crate::axis::{axis_group, measure_speed_range, read_unit_multiplier, speed_truth, AxisUnits, StageExt};
use crate::card::{card_group, check_address, check_axis};
use crate::input::{input_group, InputForm};
use crate::labels::{self, axis_property, NO, YES};
use crate::ring_buffer::{ring_buffer_capacity, ring_buffer_group, ttl_trigger_supported};
use crate::scan::scan_group;
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tiger_core::binding::{Codec, WireBinding};
use tiger_core::capability::{CapabilityContext, PropertyCandidate};
use tiger_core::dispatch::{Device, DeviceCapabilities, PropertyGroup, PropertyHandler, WriteOutcome};
use tiger_core::driver::{DeviceRole, DriverFactory, PropertySurface};
use tiger_core::error::{TigerError, TigerResult};
use tiger_core::property::{PropertyDescriptor, PropertyValue};
use tiger_core::wire::{format_number, Marker, WireAdapter, ACK_PREFIX};
use tracing::{debug, info, instrument};

/// Firmware that added the wheel to the XY stage input group.
const WHEEL_SINCE: f64 = 2.87;

/// Firmware that added `RS <axis>?` and `HM`.
const STATUS_QUERY_SINCE: f64 = 2.7;

/// Host step size, microns (1 nm).
pub const STEP_SIZE_UM: f64 = 0.001;

// =============================================================================
// Device extension
// =============================================================================

/// Host-side state of an XY stage.
#[derive(Debug, Clone)]
pub struct XyStageExt {
    /// Unit multipliers of both axes
    pub units: AxisUnits,
    /// First and second axis letters
    pub axes: (char, char),
    /// Servo properties installed
    pub advanced_enabled: bool,
}

impl StageExt for XyStageExt {
    fn units(&self) -> &AxisUnits {
        &self.units
    }

    fn units_mut(&mut self) -> &mut AxisUnits {
        &mut self.units
    }
}

// =============================================================================
// Property groups
// =============================================================================

/// Card-wide XY properties: wait time and the advanced switch.
fn xy_group(x: char, y: char) -> PropertyGroup<XyStageExt> {
    let mut group = PropertyGroup::new();
    group.add(
        PropertyCandidate::integer(labels::WAIT_TIME, 0).units("ms"),
        WireBinding::query(format!("WT {}?", x), format!(":{}=", x))
            .command(format!("WT {}={{}} {}={{}}", x, y)),
    );
    group.add(
        PropertyCandidate::enumeration(labels::ADVANCED_STAGE_PROPERTIES, NO).yes_no(),
        AdvancedHandler,
    );
    for axis in [x, y] {
        group.add_static(
            PropertyCandidate::float(axis_property(labels::STEP_SIZE, axis), STEP_SIZE_UM)
                .units("um")
                .read_only(),
        );
    }
    group
}

/// Servo tuning, drive strength, auto-zero and extra move repetitions.
fn advanced_group(address: char, x: char, y: char) -> PropertyGroup<XyStageExt> {
    let mut group = PropertyGroup::new();
    let reply = format!(":A {}=", x);
    let both = |verb: &str| {
        WireBinding::query(format!("{} {}?", verb, x), reply.clone())
            .command(format!("{} {}={{}} {}={{}}", verb, x, y))
    };

    group.add(
        PropertyCandidate::float(labels::OVERSHOOT, 0.0).units("um"),
        both("OS").codec(Codec::scaled(1000.0)),
    );
    for (name, verb) in [
        (labels::KI, "KI"),
        (labels::KP, "KP"),
        (labels::KD, "KD"),
        (labels::KV, "KV"),
        (labels::KA, "KA"),
        (labels::DRIVE_STRENGTH, "AA"),
    ] {
        group.add(PropertyCandidate::integer(name, 0), both(verb));
    }
    for axis in [x, y] {
        group.add(
            PropertyCandidate::text(axis_property(labels::AUTO_ZERO, axis), "0"),
            AutoZeroHandler { axis },
        );
    }
    group.add(
        PropertyCandidate::integer(labels::EXTRA_MOVE_REPS, 0).limits(0.0, 3.0),
        WireBinding::query(format!("{}CCA Y?", address), ACK_PREFIX)
            .command(format!("{}CCA Y={{}}", address)),
    );
    group
}

// =============================================================================
// Handlers
// =============================================================================

/// Writing Yes installs the servo properties once and reads them back.
struct AdvancedHandler;

#[async_trait]
impl PropertyHandler<XyStageExt> for AdvancedHandler {
    async fn read(
        &self,
        _device: &mut Device<XyStageExt>,
        _descriptor: &PropertyDescriptor,
    ) -> TigerResult<Option<PropertyValue>> {
        Ok(None)
    }

    async fn write(
        &self,
        device: &mut Device<XyStageExt>,
        _descriptor: &PropertyDescriptor,
        value: &PropertyValue,
    ) -> TigerResult<WriteOutcome> {
        if value.as_str() != Some(YES) || device.ext().advanced_enabled {
            return Ok(WriteOutcome::Applied);
        }
        device.ext_mut().advanced_enabled = true;
        let (x, y) = device.ext().axes;
        let added = device.install(advanced_group(device.address(), x, y));
        let failed = device.prime(&added).await;
        info!(
            device = device.name(),
            added = added.len(),
            failed,
            "advanced stage properties added"
        );
        Ok(WriteOutcome::Applied)
    }
}

/// `AZ <axis>`; the property takes the last line of the reply.
struct AutoZeroHandler {
    axis: char,
}

#[async_trait]
impl PropertyHandler<XyStageExt> for AutoZeroHandler {
    async fn read(
        &self,
        _device: &mut Device<XyStageExt>,
        _descriptor: &PropertyDescriptor,
    ) -> TigerResult<Option<PropertyValue>> {
        Ok(None)
    }

    async fn write(
        &self,
        device: &mut Device<XyStageExt>,
        _descriptor: &PropertyDescriptor,
        _value: &PropertyValue,
    ) -> TigerResult<WriteOutcome> {
        let reply = device
            .wire()
            .send_and_verify(&format!("AZ {}", self.axis), ACK_PREFIX)
            .await?;
        let last = reply
            .as_str()
            .split('\r')
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .last()
            .unwrap_or_default()
            .to_string();
        Ok(WriteOutcome::Resolved(PropertyValue::Text(last)))
    }
}

// =============================================================================
// Device
// =============================================================================

/// Travel range in host steps, from the `SL`/`SU` soft limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StepLimits {
    /// Lower X limit
    pub x_min: i64,
    /// Upper X limit
    pub x_max: i64,
    /// Lower Y limit
    pub y_min: i64,
    /// Upper Y limit
    pub y_max: i64,
}

/// An initialized XY stage.
pub struct XyStage {
    device: Device<XyStageExt>,
    /// Points waiting to be sent to the ring buffer, microns.
    sequence: Vec<(f64, f64)>,
}

impl XyStage {
    /// Read unit multipliers and speed ranges, then build the properties.
    #[instrument(skip(config, wire), fields(device = %config.id, address = %config.address))]
    pub async fn initialize(config: &XyStageConfig, wire: Arc<dyn WireAdapter>) -> TigerResult<Self> {
        let (x, y) = config.axis_pair()?;
        let address = config.address;
        let identity = wire.card_identity(address).await?;
        let context = CapabilityContext::new(identity.version).with_build(identity.build.clone());

        let mut units = AxisUnits::default();
        for axis in [x, y] {
            units.set(axis, read_unit_multiplier(wire.as_ref(), axis).await?);
        }
        // Verbose replies; the card answers without the usual ack.
        wire.send(&format!("{}VB Z=1", address)).await?;
        let range_x = measure_speed_range(wire.as_ref(), x).await?;
        let range_y = measure_speed_range(wire.as_ref(), y).await?;
        let truth = speed_truth(&context);

        let description = format!("ASI XY Stage Xaxis={} Yaxis={} HexAddr={}", x, y, address);
        let mut device = Device::new(
            config.id.clone(),
            DeviceCapabilities::new(address, [x, y]),
            wire,
            context.clone(),
            XyStageExt {
                units,
                axes: (x, y),
                advanced_enabled: false,
            },
        );
        device.install(card_group(&description, &identity, Some((x, y))));
        device.install(axis_group(x, range_x, truth));
        device.install(axis_group(y, range_y, truth));
        device.install(xy_group(x, y));
        device.install(input_group(InputForm::XyStage { x, y }, WHEEL_SINCE));
        device.install(ring_buffer_group(address, &context));
        device.install(scan_group(address));

        let names = device.property_names();
        let failed = device.prime(&names).await;
        device.mark_initialized();

        info!(
            device = device.name(),
            version = identity.version.value(),
            speed_truth = truth,
            failed,
            "XY stage initialized"
        );
        Ok(Self {
            device,
            sequence: Vec::new(),
        })
    }

    /// Axis letters.
    pub fn axes(&self) -> (char, char) {
        self.device.ext().axes
    }

    /// Underlying device.
    pub fn device(&self) -> &Device<XyStageExt> {
        &self.device
    }

    /// Underlying device, mutably.
    pub fn device_mut(&mut self) -> &mut Device<XyStageExt> {
        &mut self.device
    }

    fn unit(&self, axis: char) -> f64 {
        self.device.ext().units.get(axis)
    }

    /// `axis=<um in controller units>`
    fn axis_term(&self, axis: char, um: f64) -> String {
        format!("{}={}", axis, format_number(um * self.unit(axis)))
    }

    async fn ack(&self, command: &str) -> TigerResult<()> {
        self.device.wire().send_and_verify(command, ACK_PREFIX).await?;
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Motion
    // -------------------------------------------------------------------------

    /// Current position, microns.
    pub async fn position_um(&self) -> TigerResult<(f64, f64)> {
        let (x, y) = self.axes();
        let mut position = [0.0; 2];
        for (slot, axis) in position.iter_mut().zip([x, y]) {
            let raw = self
                .device
                .wire()
                .send_and_verify(&format!("W {}", axis), ACK_PREFIX)
                .await?
                .number(Marker::AfterPosition(2))?;
            *slot = raw / self.unit(axis);
        }
        Ok((position[0], position[1]))
    }

    /// Current position, host steps.
    pub async fn position_steps(&self) -> TigerResult<(i64, i64)> {
        let (x, y) = self.position_um().await?;
        Ok((um_to_steps(x), um_to_steps(y)))
    }

    /// Start an absolute move, microns.
    #[instrument(skip(self), fields(device = %self.device.name()), err)]
    pub async fn move_to_um(&self, x_um: f64, y_um: f64) -> TigerResult<()> {
        let (x, y) = self.axes();
        let command = format!("M {} {}", self.axis_term(x, x_um), self.axis_term(y, y_um));
        self.ack(&command).await
    }

    /// Start an absolute move, host steps.
    pub async fn move_to_steps(&self, x: i64, y: i64) -> TigerResult<()> {
        self.move_to_um(steps_to_um(x), steps_to_um(y)).await
    }

    /// Start a relative move, microns. An axis with zero travel is left
    /// out of the command unless both are zero.
    #[instrument(skip(self), fields(device = %self.device.name()), err)]
    pub async fn move_by_um(&self, dx_um: f64, dy_um: f64) -> TigerResult<()> {
        let (x, y) = self.axes();
        let terms = match (dx_um != 0.0, dy_um != 0.0) {
            (true, false) => self.axis_term(x, dx_um),
            (false, true) => self.axis_term(y, dy_um),
            _ => format!("{} {}", self.axis_term(x, dx_um), self.axis_term(y, dy_um)),
        };
        self.ack(&format!("R {}", terms)).await
    }

    /// Start a relative move, host steps.
    pub async fn move_by_steps(&self, dx: i64, dy: i64) -> TigerResult<()> {
        self.move_by_um(steps_to_um(dx), steps_to_um(dy)).await
    }

    /// Halt every axis on the card.
    pub async fn stop(&self) -> TigerResult<()> {
        let command = format!("{}HALT", self.device.address());
        let reply = self.device.wire().send(&command).await?;
        debug!(device = self.device.name(), reply = %reply, "halt");
        Ok(())
    }

    /// Whether either axis is still moving.
    pub async fn busy(&self) -> TigerResult<bool> {
        let (x, y) = self.axes();
        let wire = self.device.wire();
        let modern = self.device.context().at_least(STATUS_QUERY_SINCE);
        for axis in [x, y] {
            let moving = if modern {
                wire.send_and_verify(&format!("RS {}?", axis), ACK_PREFIX)
                    .await?
                    .char_at(3)?
                    == 'B'
            } else {
                let status = wire
                    .send_and_verify(&format!("RS {}", axis), ACK_PREFIX)
                    .await?
                    .integer(Marker::AfterPosition(2))?;
                status & 1 == 1
            };
            if moving {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Make the current position zero on both axes.
    pub async fn set_origin(&self) -> TigerResult<()> {
        let (x, y) = self.axes();
        self.ack(&format!("H {}=0 {}=0", x, y)).await
    }

    /// Make the current X position zero.
    pub async fn set_x_origin(&self) -> TigerResult<()> {
        self.ack(&format!("H {}=0", self.axes().0)).await
    }

    /// Make the current Y position zero.
    pub async fn set_y_origin(&self) -> TigerResult<()> {
        self.ack(&format!("H {}=0", self.axes().1)).await
    }

    /// Move both axes to their home positions.
    pub async fn home(&self) -> TigerResult<()> {
        let (x, y) = self.axes();
        self.ack(&format!("! {} {}", x, y)).await
    }

    /// Store the current position as home.
    pub async fn set_home(&self) -> TigerResult<()> {
        if !self.device.context().at_least(STATUS_QUERY_SINCE) {
            return Err(TigerError::Unsupported(format!(
                "setting home needs firmware {} or later",
                STATUS_QUERY_SINCE
            )));
        }
        let (x, y) = self.axes();
        self.ack(&format!("HM {}+ {}+", x, y)).await
    }

    /// Run both axes at constant velocity, mm/s; zero stops an axis.
    pub async fn move_at_velocity(&self, vx: f64, vy: f64) -> TigerResult<()> {
        let (x, y) = self.axes();
        self.ack(&format!("VE {}={} {}={}", x, format_number(vx), y, format_number(vy)))
            .await
    }

    /// Soft travel limits in host steps. The controller keeps them in mm
    /// regardless of the unit multiplier.
    pub async fn step_limits(&self) -> TigerResult<StepLimits> {
        let (x, y) = self.axes();
        let wire = self.device.wire();
        let mut values = [0i64; 4];
        let queries = [("SL", x), ("SU", x), ("SL", y), ("SU", y)];
        for (slot, (verb, axis)) in values.iter_mut().zip(queries) {
            let mm = wire
                .send_and_verify(&format!("{} {}?", verb, axis), ACK_PREFIX)
                .await?
                .number(Marker::AfterEquals)?;
            *slot = um_to_steps(mm * 1000.0);
        }
        Ok(StepLimits {
            x_min: values[0],
            x_max: values[1],
            y_min: values[2],
            y_max: values[3],
        })
    }

    // -------------------------------------------------------------------------
    // Ring buffer sequence
    // -------------------------------------------------------------------------

    fn require_ttl(&self) -> TigerResult<()> {
        if ttl_trigger_supported(self.device.context()) {
            Ok(())
        } else {
            Err(TigerError::Unsupported(format!(
                "'{}' cannot step a ring buffer sequence on TTL",
                self.device.name()
            )))
        }
    }

    /// Whether the host asked for hardware sequencing (`UseSequence`).
    pub fn is_sequenceable(&self) -> bool {
        self.device.cached_text(labels::USE_SEQUENCE).as_deref() == Some(YES)
    }

    /// Ring buffer capacity, points.
    pub fn sequence_max_length(&self) -> u32 {
        ring_buffer_capacity(&self.device.context().build)
    }

    /// Points queued on the host, microns.
    pub fn sequence(&self) -> &[(f64, f64)] {
        &self.sequence
    }

    /// Queue one point, microns.
    pub fn add_to_sequence(&mut self, x_um: f64, y_um: f64) -> TigerResult<()> {
        self.require_ttl()?;
        self.sequence.push((x_um, y_um));
        Ok(())
    }

    /// Forget the queued points and empty the card's buffer.
    pub async fn clear_sequence(&mut self) -> TigerResult<()> {
        self.require_ttl()?;
        self.sequence.clear();
        self.ack(&format!("{}RM X=0", self.device.address())).await
    }

    /// Replace the card's buffer with the queued points.
    #[instrument(skip(self), fields(device = %self.device.name(), points = self.sequence.len()), err)]
    pub async fn send_sequence(&self) -> TigerResult<()> {
        self.require_ttl()?;
        self.ack(&format!("{}RM X=0", self.device.address())).await?;
        let (x, y) = self.axes();
        for &(x_um, y_um) in &self.sequence {
            let command = format!("LD {} {}", self.axis_term(x, x_um), self.axis_term(y, y_um));
            self.ack(&command).await?;
        }
        Ok(())
    }

    /// Rewind the buffer and let TTL pulses step through it.
    pub async fn start_sequence(&self) -> TigerResult<()> {
        self.require_ttl()?;
        let address = self.device.address();
        self.ack(&format!("{}RM Z=0", address)).await?;
        self.ack(&format!("{}TTL X=1", address)).await
    }

    /// Stop reacting to TTL pulses. A move already under way finishes.
    pub async fn stop_sequence(&self) -> TigerResult<()> {
        self.require_ttl()?;
        self.ack(&format!("{}TTL X=0", self.device.address())).await
    }
}

fn um_to_steps(um: f64) -> i64 {
    (um / STEP_SIZE_UM).round() as i64
}

fn steps_to_um(steps: i64) -> f64 {
    steps as f64 * STEP_SIZE_UM
}

#[async_trait]
impl PropertySurface for XyStage {
    fn device_name(&self) -> &str {
        self.device.name()
    }

    fn descriptors(&self) -> Vec<PropertyDescriptor> {
        self.device.descriptors()
    }

    async fn get_property(&mut self, name: &str) -> TigerResult<PropertyValue> {
        self.device.get(name).await
    }

    async fn set_property(&mut self, name: &str, text: &str) -> TigerResult<()> {
        self.device.set_text(name, text).await
    }
}

// =============================================================================
// Configuration and factory
// =============================================================================

/// Configuration for an XY stage.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct XyStageConfig {
    /// Device name
    pub id: String,
    /// Card address
    pub address: char,
    /// First and second axis letters
    pub axes: Vec<char>,
}

impl XyStageConfig {
    /// Stage at `address` driving axes `x` and `y`.
    pub fn new(id: impl Into<String>, address: char, x: char, y: char) -> Self {
        Self {
            id: id.into(),
            address,
            axes: vec![x, y],
        }
    }

    fn axis_pair(&self) -> TigerResult<(char, char)> {
        match self.axes.as_slice() {
            [x, y] => Ok((*x, *y)),
            _ => Err(TigerError::invalid_value(
                "axes",
                format!("{:?}", self.axes),
                "an XY stage has exactly two axis letters",
            )),
        }
    }
}

/// Factory for [`XyStage`].
pub struct XyStageFactory;

static XY_STAGE_ROLES: &[DeviceRole] = &[DeviceRole::Stage];

impl DriverFactory for XyStageFactory {
    fn driver_type(&self) -> &'static str {
        "xy_stage"
    }

    fn name(&self) -> &'static str {
        "ASI Tiger XY Stage"
    }

    fn roles(&self) -> &'static [DeviceRole] {
        XY_STAGE_ROLES
    }

    fn validate(&self, config: &toml::Value) -> Result<()> {
        let cfg: XyStageConfig = config.clone().try_into()?;
        check_address(cfg.address)?;
        match cfg.axes.as_slice() {
            [x, y] if x == y => Err(anyhow!("XY stage '{}' uses axis '{}' twice", cfg.id, x)),
            [x, y] => {
                check_axis(*x)?;
                check_axis(*y)
            }
            other => Err(anyhow!(
                "XY stage '{}' needs two axis letters, got {}",
                cfg.id,
                other.len()
            )),
        }
    }

    fn build(
        &self,
        config: toml::Value,
        wire: Arc<dyn WireAdapter>,
    ) -> BoxFuture<'static, Result<Box<dyn PropertySurface>>> {
        Box::pin(async move {
            let cfg: XyStageConfig = config.try_into().context("Invalid XY stage config")?;
            let stage = XyStage::initialize(&cfg, wire)
                .await
                .with_context(|| format!("Failed to initialize XY stage '{}'", cfg.id))?;
            Ok(Box::new(stage) as Box<dyn PropertySurface>)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tiger_driver_mock::MockWire;

    const BUILD: &str = "STD_XY\rAxis Props: 7 7\rRING BUFFER 50\rIN0_INT";

    async fn stage(wire: Arc<MockWire>) -> XyStage {
        XyStage::initialize(&XyStageConfig::new("xy", '2', 'X', 'Y'), wire)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_initialize_sequence() {
        let wire = MockWire::new().with_card('2', 3.30, BUILD).shared();
        wire.set_register("UM", 'X', "-10000");
        wire.set_register("S", 'X', "1.36");
        let stage = stage(wire.clone()).await;

        let commands = wire.commands();
        assert_eq!(&commands[..3], &["UM X?", "UM Y?", "2VB Z=1"]);
        assert_eq!(commands[3], "S X?");
        assert!(commands.contains(&"S X=1.36".to_string()));
        assert_eq!(stage.device().ext().units.get('X'), -10.0);
        assert_eq!(
            stage.device().cached_text(labels::DESCRIPTION).as_deref(),
            Some("ASI XY Stage Xaxis=X Yaxis=Y HexAddr=2")
        );
        assert!(stage.device().has_property(labels::RB_MODE));
        assert!(stage.device().has_property(labels::SCAN_STATE));
        assert!(stage.device().has_property(labels::WHEEL_FAST_SPEED));
    }

    #[tokio::test]
    async fn test_no_ring_buffer_or_scan_without_axis_bits() {
        let wire = MockWire::new()
            .with_card('2', 3.30, "STD_XY\rAxis Props: 0 0")
            .shared();
        let stage = stage(wire).await;
        assert!(!stage.device().has_property(labels::RB_MODE));
        assert!(!stage.device().has_property(labels::SCAN_STATE));
        assert!(stage.device().has_property(labels::JOYSTICK_ENABLED));
    }

    #[tokio::test]
    async fn test_wait_time_written_to_both_axes() {
        let wire = MockWire::new().with_card('2', 3.30, BUILD).shared();
        let mut stage = stage(wire.clone()).await;
        stage.set_property(labels::WAIT_TIME, "25").await.unwrap();
        assert_eq!(wire.last_command().as_deref(), Some("WT X=25 Y=25"));
    }

    #[tokio::test]
    async fn test_advanced_properties_installed_once() {
        let wire = MockWire::new().with_card('2', 3.30, BUILD).shared();
        wire.set_register("KP", 'X', "150");
        let mut stage = stage(wire.clone()).await;
        assert!(!stage.device().has_property(labels::KP));

        stage
            .set_property(labels::ADVANCED_STAGE_PROPERTIES, YES)
            .await
            .unwrap();
        assert_eq!(stage.device().cached_text(labels::KP).as_deref(), Some("150"));
        assert!(stage.device().has_property(&axis_property(labels::AUTO_ZERO, 'Y')));

        wire.clear_log();
        stage
            .set_property(labels::ADVANCED_STAGE_PROPERTIES, YES)
            .await
            .unwrap();
        assert_eq!(wire.command_count(), 0);

        stage.set_property(labels::OVERSHOOT, "50").await.unwrap();
        assert_eq!(wire.last_command().as_deref(), Some("OS X=0.05 Y=0.05"));
        stage.set_property(labels::EXTRA_MOVE_REPS, "2").await.unwrap();
        assert_eq!(wire.last_command().as_deref(), Some("2CCA Y=2"));
        assert!(stage.set_property(labels::EXTRA_MOVE_REPS, "4").await.is_err());
    }

    #[tokio::test]
    async fn test_auto_zero_keeps_last_reply_line() {
        let wire = MockWire::new().with_card('2', 3.30, BUILD).shared();
        wire.script("AZ X", ":A\rAZ done X=1234");
        let mut stage = stage(wire.clone()).await;
        stage
            .set_property(labels::ADVANCED_STAGE_PROPERTIES, YES)
            .await
            .unwrap();

        let name = axis_property(labels::AUTO_ZERO, 'X');
        stage.set_property(&name, "1").await.unwrap();
        assert_eq!(
            stage.device().cached_text(&name).as_deref(),
            Some("AZ done X=1234")
        );
    }

    #[tokio::test]
    async fn test_speed_write_rereads_when_truthful() {
        let wire = MockWire::new().with_card('2', 3.30, BUILD).shared();
        let mut stage = stage(wire.clone()).await;
        wire.clear_log();
        stage
            .set_property(&axis_property(labels::MOTOR_SPEED, 'Y'), "2")
            .await
            .unwrap();
        assert_eq!(wire.commands(), vec!["S Y=2", "S Y?"]);
    }

    #[tokio::test]
    async fn test_absolute_move_reads_back_in_steps() {
        let wire = MockWire::new().with_card('2', 3.30, BUILD).shared();
        let stage = stage(wire.clone()).await;
        wire.clear_log();

        stage.move_to_steps(1000, -2000).await.unwrap();
        assert_eq!(wire.last_command().as_deref(), Some("M X=10 Y=-20"));
        assert_eq!(stage.position_steps().await.unwrap(), (1000, -2000));
        assert_eq!(stage.position_um().await.unwrap(), (1.0, -2.0));
        assert_eq!(
            stage.device().cached_text(&axis_property(labels::STEP_SIZE, 'Y')).as_deref(),
            Some("0.001")
        );
    }

    #[tokio::test]
    async fn test_mirrored_axis_moves_in_controller_units() {
        let wire = MockWire::new().with_card('2', 3.30, BUILD).shared();
        wire.set_register("UM", 'X', "-10000");
        let stage = stage(wire.clone()).await;

        stage.move_to_um(2.5, 0.0).await.unwrap();
        assert_eq!(wire.last_command().as_deref(), Some("M X=-25 Y=0"));
        assert_eq!(stage.position_um().await.unwrap(), (2.5, 0.0));
    }

    #[tokio::test]
    async fn test_relative_move_omits_still_axis() {
        let wire = MockWire::new().with_card('2', 3.30, BUILD).shared();
        let stage = stage(wire.clone()).await;
        wire.clear_log();

        stage.move_by_steps(0, 500).await.unwrap();
        stage.move_by_steps(-300, 0).await.unwrap();
        stage.move_by_steps(100, 200).await.unwrap();
        stage.move_by_steps(0, 0).await.unwrap();
        assert_eq!(
            wire.commands(),
            vec!["R Y=5", "R X=-3", "R X=1 Y=2", "R X=0 Y=0"]
        );
    }

    #[tokio::test]
    async fn test_busy_checks_both_axes() {
        let wire = MockWire::new().with_card('2', 3.30, BUILD).shared();
        let stage = stage(wire.clone()).await;

        wire.script("RS X?", ":A N");
        wire.script("RS Y?", ":A B");
        assert!(stage.busy().await.unwrap());

        wire.script("RS Y?", ":A N");
        wire.clear_log();
        assert!(!stage.busy().await.unwrap());
        assert_eq!(wire.commands(), vec!["RS X?", "RS Y?"]);

        wire.fail_on("RS X?");
        let err = stage.busy().await.unwrap_err();
        assert!(matches!(err, TigerError::Transport(_)));
    }

    #[tokio::test]
    async fn test_busy_reads_status_bit_on_old_firmware() {
        let wire = MockWire::new().with_card('2', 2.60, "STD_XY").shared();
        let stage = stage(wire.clone()).await;

        wire.script("RS X", ":A 0");
        wire.script("RS Y", ":A 3");
        assert!(stage.busy().await.unwrap());
        wire.script("RS Y", ":A 2");
        assert!(!stage.busy().await.unwrap());

        let err = stage.set_home().await.unwrap_err();
        assert!(matches!(err, TigerError::Unsupported(_)));
    }

    #[tokio::test]
    async fn test_origin_home_and_velocity_commands() {
        let wire = MockWire::new().with_card('2', 3.30, BUILD).shared();
        let stage = stage(wire.clone()).await;
        wire.clear_log();

        stage.set_origin().await.unwrap();
        stage.set_x_origin().await.unwrap();
        stage.set_y_origin().await.unwrap();
        stage.home().await.unwrap();
        stage.set_home().await.unwrap();
        stage.move_at_velocity(0.5, -1.25).await.unwrap();
        stage.stop().await.unwrap();
        assert_eq!(
            wire.commands(),
            vec![
                "H X=0 Y=0",
                "H X=0",
                "H Y=0",
                "! X Y",
                "HM X+ Y+",
                "VE X=0.5 Y=-1.25",
                "2HALT",
            ]
        );
    }

    #[tokio::test]
    async fn test_rejected_move_is_an_error() {
        let wire = MockWire::new().with_card('2', 3.30, BUILD).shared();
        let stage = stage(wire.clone()).await;
        wire.script("M X=10 Y=0", ":N-5");
        let err = stage.move_to_steps(1000, 0).await.unwrap_err();
        assert!(matches!(err, TigerError::ControllerError { .. }));
    }

    #[tokio::test]
    async fn test_step_limits_from_soft_limits() {
        let wire = MockWire::new().with_card('2', 3.30, BUILD).shared();
        wire.set_register("SL", 'X', "-5");
        wire.set_register("SU", 'X', "5");
        wire.set_register("SL", 'Y', "-2.5");
        wire.set_register("SU", 'Y', "110");
        let stage = stage(wire.clone()).await;

        let limits = stage.step_limits().await.unwrap();
        assert_eq!(
            limits,
            StepLimits {
                x_min: -5_000_000,
                x_max: 5_000_000,
                y_min: -2_500_000,
                y_max: 110_000_000,
            }
        );
    }

    #[tokio::test]
    async fn test_sequence_loads_and_runs_ring_buffer() {
        let wire = MockWire::new().with_card('2', 3.30, BUILD).shared();
        let mut stage = stage(wire.clone()).await;
        assert_eq!(stage.sequence_max_length(), 50);
        assert!(!stage.is_sequenceable());
        stage.set_property(labels::USE_SEQUENCE, YES).await.unwrap();
        assert!(stage.is_sequenceable());

        stage.add_to_sequence(1.0, 2.0).unwrap();
        stage.add_to_sequence(-0.5, 0.0).unwrap();
        wire.clear_log();
        stage.send_sequence().await.unwrap();
        stage.start_sequence().await.unwrap();
        stage.stop_sequence().await.unwrap();
        assert_eq!(
            wire.commands(),
            vec![
                "2RM X=0",
                "LD X=10 Y=20",
                "LD X=-5 Y=0",
                "2RM Z=0",
                "2TTL X=1",
                "2TTL X=0",
            ]
        );

        wire.clear_log();
        stage.clear_sequence().await.unwrap();
        assert!(stage.sequence().is_empty());
        assert_eq!(wire.commands(), vec!["2RM X=0"]);
    }

    #[tokio::test]
    async fn test_sequence_needs_ttl_input() {
        let wire = MockWire::new()
            .with_card('2', 3.30, "STD_XY\rAxis Props: 7 7\rRING BUFFER 50")
            .shared();
        let mut stage = stage(wire.clone()).await;
        wire.clear_log();

        assert!(matches!(
            stage.add_to_sequence(1.0, 1.0),
            Err(TigerError::Unsupported(_))
        ));
        assert!(matches!(
            stage.start_sequence().await,
            Err(TigerError::Unsupported(_))
        ));
        assert!(matches!(
            stage.send_sequence().await,
            Err(TigerError::Unsupported(_))
        ));
        assert_eq!(wire.command_count(), 0);
    }

    #[test]
    fn test_factory_validate_config() {
        let factory = XyStageFactory;
        let ok: toml::Value = toml::from_str("id = \"xy\"\naddress = \"2\"\naxes = [\"X\", \"Y\"]").unwrap();
        assert!(factory.validate(&ok).is_ok());

        let same: toml::Value = toml::from_str("id = \"xy\"\naddress = \"2\"\naxes = [\"X\", \"X\"]").unwrap();
        assert!(factory.validate(&same).is_err());

        let one: toml::Value = toml::from_str("id = \"xy\"\naddress = \"2\"\naxes = [\"X\"]").unwrap();
        assert!(factory.validate(&one).is_err());
    }
}
