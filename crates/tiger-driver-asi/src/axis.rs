//! Per-axis motor properties shared by the XY and Z stages.
//!
//! Every motorized axis answers the same verbs (`S`, `B`, `E`, `PC`, `SL`,
//! `SU`, `AC`, `MA`, `MC`, `VE`). [`axis_group`] builds the properties for
//! one axis letter; stages call it once per axis and suffix the names with
//! the letter.
//!
//! The unit multiplier (`UM`, counts per micron / 1000) is kept on the
//! device so that axis polarity and the function generator can scale
//! values. Devices expose it through [`StageExt`].

use crate::labels::{self, axis_property};
use async_trait::async_trait;
use std::collections::BTreeMap;
use tiger_core::binding::{Codec, WireBinding};
use tiger_core::capability::{CapabilityContext, PropertyCandidate};
use tiger_core::dispatch::{Device, PropertyGroup, PropertyHandler, WriteOutcome};
use tiger_core::error::{TigerError, TigerResult};
use tiger_core::property::{PropertyDescriptor, PropertyValue};
use tiger_core::wire::{format_number, Marker, WireAdapter, ACK_PREFIX};
use tracing::{debug, warn};

/// Unit multiplier assumed when the controller reports none.
pub const DEFAULT_UNIT_MULTIPLIER: f64 = 10.0;

/// Per-axis unit multipliers.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AxisUnits {
    multipliers: BTreeMap<char, f64>,
}

impl AxisUnits {
    /// Multiplier of `axis`, default if never read.
    pub fn get(&self, axis: char) -> f64 {
        self.multipliers
            .get(&axis)
            .copied()
            .unwrap_or(DEFAULT_UNIT_MULTIPLIER)
    }

    /// Replace the multiplier of `axis`.
    pub fn set(&mut self, axis: char, multiplier: f64) {
        self.multipliers.insert(axis, multiplier);
    }
}

/// Extension state of devices that drive motor axes.
pub trait StageExt: Send + Sync + 'static {
    /// Unit multipliers.
    fn units(&self) -> &AxisUnits;

    /// Mutable unit multipliers.
    fn units_mut(&mut self) -> &mut AxisUnits;
}

/// Read `UM <axis>?` and convert to the multiplier used for scaling.
pub async fn read_unit_multiplier(wire: &dyn WireAdapter, axis: char) -> TigerResult<f64> {
    let reply = wire.send_and_verify(&format!("UM {}?", axis), ":").await?;
    let multiplier = reply.number(Marker::AfterEquals)? / 1000.0;
    if multiplier == 0.0 {
        warn!(axis = %axis, "controller reported a zero unit multiplier, using default");
        return Ok(DEFAULT_UNIT_MULTIPLIER);
    }
    Ok(multiplier)
}

/// Slowest and fastest speed an axis accepts, mm/s.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpeedRange {
    /// Lowest accepted speed
    pub min: f64,
    /// Highest accepted speed
    pub max: f64,
}

/// Find the speed range by asking for an absurd speed each way and reading
/// what the controller clamped it to, then restore the original speed.
pub async fn measure_speed_range(wire: &dyn WireAdapter, axis: char) -> TigerResult<SpeedRange> {
    let query = format!("S {}?", axis);
    let original = wire
        .send_and_verify(&query, ACK_PREFIX)
        .await?
        .number(Marker::AfterEquals)?;

    wire.send_and_verify(&format!("S {}=10000", axis), ACK_PREFIX)
        .await?;
    let max = wire
        .send_and_verify(&query, ACK_PREFIX)
        .await?
        .number(Marker::AfterEquals)?;

    wire.send_and_verify(&format!("S {}=0.000001", axis), ACK_PREFIX)
        .await?;
    let min = wire
        .send_and_verify(&query, ACK_PREFIX)
        .await?
        .number(Marker::AfterEquals)?;

    wire.send_and_verify(&format!("S {}={}", axis, format_number(original)), ACK_PREFIX)
        .await?;
    debug!(axis = %axis, min, max, "measured speed range");
    Ok(SpeedRange { min, max })
}

/// Whether speed writes should be followed by a re-read.
///
/// From 3.27 firmware reports its real speed unless built with
/// `SPEED UNTRUTH`; older firmware only with `SPEED TRUTH`.
pub fn speed_truth(ctx: &CapabilityContext) -> bool {
    if ctx.at_least(3.27) {
        !ctx.build.has_define("SPEED UNTRUTH")
    } else {
        ctx.build.has_define("SPEED TRUTH")
    }
}

/// Build the generic properties of one axis.
///
/// With `speed_truth` the controller reports the speed it actually uses, so
/// a speed write is followed by a re-read.
pub fn axis_group<E: StageExt>(axis: char, range: SpeedRange, speed_truth: bool) -> PropertyGroup<E> {
    let name = |base: &str| axis_property(base, axis);
    let reply = format!(":A {}=", axis);
    let colon_reply = format!(":{}=", axis);
    let mut group = PropertyGroup::new();

    group.add_static(PropertyCandidate::float(name(labels::MOTOR_SPEED_MICRONS), 1000.0).read_only());
    group.add_static(
        PropertyCandidate::float(name(labels::MIN_MOTOR_SPEED), range.min * 1000.0).read_only(),
    );
    group.add_static(PropertyCandidate::float(name(labels::MAX_MOTOR_SPEED), range.max).read_only());
    group.add(
        PropertyCandidate::float(name(labels::MOTOR_SPEED), 1.0)
            .limits(range.min, range.max)
            .units("mm/s"),
        SpeedHandler { axis, speed_truth },
    );

    group.add(
        PropertyCandidate::float(name(labels::BACKLASH), 0.0).units("um"),
        WireBinding::query(format!("B {}?", axis), colon_reply.clone())
            .command(format!("B {}={{}}", axis))
            .codec(Codec::scaled(1000.0)),
    );
    group.add(
        PropertyCandidate::float(name(labels::DRIFT_ERROR), 0.0).units("um"),
        WireBinding::query(format!("E {}?", axis), colon_reply.clone())
            .command(format!("E {}={{}}", axis))
            .codec(Codec::scaled(1000.0)),
    );
    group.add(
        PropertyCandidate::float(name(labels::FINISH_ERROR), 0.0).units("um"),
        WireBinding::query(format!("PC {}?", axis), reply.clone())
            .command(format!("PC {}={{}}", axis))
            .codec(Codec::scaled(1000.0)),
    );
    group.add(
        PropertyCandidate::integer(name(labels::ACCELERATION), 0).units("ms"),
        WireBinding::query(format!("AC {}?", axis), colon_reply)
            .command(format!("AC {}={{}}", axis)),
    );
    group.add(
        PropertyCandidate::float(name(labels::LOWER_LIMIT), 0.0).units("mm"),
        WireBinding::query(format!("SL {}?", axis), reply.clone())
            .command(format!("SL {}={{}}", axis))
            .codec(Codec::float()),
    );
    group.add(
        PropertyCandidate::float(name(labels::UPPER_LIMIT), 0.0).units("mm"),
        WireBinding::query(format!("SU {}?", axis), reply.clone())
            .command(format!("SU {}={{}}", axis))
            .codec(Codec::float()),
    );

    let mut maintain = PropertyCandidate::enumeration(name(labels::MAINTAIN_STATE), labels::MAINTAIN_STATES[0].1);
    for (code, label) in labels::MAINTAIN_STATES {
        maintain = maintain.value(*label, *code);
    }
    group.add(
        maintain,
        WireBinding::query(format!("MA {}?", axis), reply.clone())
            .command(format!("MA {}={{}}", axis))
            .codec(Codec::labels()),
    );

    group.add(
        PropertyCandidate::enumeration(name(labels::MOTOR_CONTROL), labels::ON)
            .value(labels::ON, 1)
            .value(labels::OFF, 0),
        MotorControlHandler { axis },
    );

    group.add(
        PropertyCandidate::float(name(labels::VECTOR_MOVE), 0.0)
            .limits(-range.max, range.max)
            .units("mm/s"),
        WireBinding::query(format!("VE {}?", axis), reply)
            .command(format!("VE {}={{}}", axis))
            .codec(Codec::float()),
    );

    group.add(
        PropertyCandidate::enumeration(name(labels::AXIS_POLARITY), labels::POLARITY_NORMAL)
            .value(labels::POLARITY_REVERSED, 1)
            .value(labels::POLARITY_NORMAL, 0),
        PolarityHandler { axis },
    );
    group
}

// =============================================================================
// Handlers
// =============================================================================

/// `S <axis>`; keeps the µm/s mirror in step.
#[derive(Debug, Clone, Copy)]
pub struct SpeedHandler {
    axis: char,
    speed_truth: bool,
}

impl SpeedHandler {
    fn mirror<E: Send + Sync + 'static>(&self, device: &mut Device<E>, speed: f64) {
        device.state_mut().store(
            axis_property(labels::MOTOR_SPEED_MICRONS, self.axis),
            PropertyValue::Float(speed * 1000.0),
        );
    }
}

#[async_trait]
impl<E: Send + Sync + 'static> PropertyHandler<E> for SpeedHandler {
    async fn read(
        &self,
        device: &mut Device<E>,
        _descriptor: &PropertyDescriptor,
    ) -> TigerResult<Option<PropertyValue>> {
        let reply = device
            .wire()
            .send_and_verify(&format!("S {}?", self.axis), &format!(":A {}=", self.axis))
            .await?;
        let speed = reply.number(Marker::AfterEquals)?;
        self.mirror(device, speed);
        Ok(Some(PropertyValue::Float(speed)))
    }

    async fn write(
        &self,
        device: &mut Device<E>,
        descriptor: &PropertyDescriptor,
        value: &PropertyValue,
    ) -> TigerResult<WriteOutcome> {
        let speed = value
            .as_f64()
            .ok_or_else(|| TigerError::invalid_value(&descriptor.name, value, "expected a number"))?;
        device
            .wire()
            .send_and_verify(&format!("S {}={}", self.axis, format_number(speed)), ACK_PREFIX)
            .await?;
        if self.speed_truth {
            let actual = device.reread(&descriptor.name).await?;
            return Ok(WriteOutcome::Resolved(actual));
        }
        self.mirror(device, speed);
        Ok(WriteOutcome::Applied)
    }
}

/// `MC <axis>+` / `MC <axis>-`; the query answers a bare flag.
#[derive(Debug, Clone, Copy)]
pub struct MotorControlHandler {
    axis: char,
}

#[async_trait]
impl<E: Send + Sync + 'static> PropertyHandler<E> for MotorControlHandler {
    async fn read(
        &self,
        device: &mut Device<E>,
        _descriptor: &PropertyDescriptor,
    ) -> TigerResult<Option<PropertyValue>> {
        let reply = device
            .wire()
            .send_and_verify(&format!("MC {}?", self.axis), ":A ")
            .await?;
        let on = reply.integer(Marker::AfterPosition(3))? != 0;
        Ok(Some(if on { labels::ON } else { labels::OFF }.into()))
    }

    async fn write(
        &self,
        device: &mut Device<E>,
        _descriptor: &PropertyDescriptor,
        value: &PropertyValue,
    ) -> TigerResult<WriteOutcome> {
        let sign = if value.as_str() == Some(labels::OFF) { '-' } else { '+' };
        device
            .wire()
            .send_and_verify(&format!("MC {}{}", self.axis, sign), ACK_PREFIX)
            .await?;
        Ok(WriteOutcome::Applied)
    }
}

/// Flips the sign of the axis unit multiplier; nothing is sent.
#[derive(Debug, Clone, Copy)]
pub struct PolarityHandler {
    axis: char,
}

#[async_trait]
impl<E: StageExt> PropertyHandler<E> for PolarityHandler {
    async fn read(
        &self,
        _device: &mut Device<E>,
        _descriptor: &PropertyDescriptor,
    ) -> TigerResult<Option<PropertyValue>> {
        Ok(None)
    }

    async fn write(
        &self,
        device: &mut Device<E>,
        _descriptor: &PropertyDescriptor,
        value: &PropertyValue,
    ) -> TigerResult<WriteOutcome> {
        let magnitude = device.ext().units().get(self.axis).abs();
        let multiplier = if value.as_str() == Some(labels::POLARITY_REVERSED) {
            -magnitude
        } else {
            magnitude
        };
        device.ext_mut().units_mut().set(self.axis, multiplier);
        Ok(WriteOutcome::Applied)
    }
}
