//! Single-axis function generator (`SAA`, `SAO`, `SAF`, `SAM`, `SAP`).
//!
//! `SAP` packs the waveform (bits 0-2) and four switches (bits 4-7) into one
//! byte; each host property owns a bit field and updates it with a
//! read-modify-write so the other fields survive.

use crate::axis::StageExt;
use crate::labels::{self, NO, YES};
use async_trait::async_trait;
use tiger_core::binding::{Codec, WireBinding};
use tiger_core::capability::{Gate, PropertyCandidate};
use tiger_core::dispatch::{Device, PropertyGroup, PropertyHandler, WriteOutcome};
use tiger_core::error::{TigerError, TigerResult};
use tiger_core::property::{PropertyDescriptor, PropertyValue};
use tiger_core::wire::{format_number, Marker, ACK_PREFIX};
use tracing::debug;

/// Build the function generator group for `axis`.
pub fn single_axis_group<E: StageExt>(axis: char) -> PropertyGroup<E> {
    let mut group = PropertyGroup::new();
    group.add(
        PropertyCandidate::float(labels::SA_AMPLITUDE, 0.0).units("um"),
        UnitScaled { verb: "SAA", axis },
    );
    group.add(
        PropertyCandidate::float(labels::SA_OFFSET, 0.0).units("um"),
        UnitScaled { verb: "SAO", axis },
    );
    group.add(
        PropertyCandidate::integer(labels::SA_PERIOD, 1000).units("ms"),
        WireBinding::query(format!("SAF {}?", axis), format!(":A {}=", axis))
            .command(format!("SAF {}={{}}", axis)),
    );

    let mut mode = PropertyCandidate::enumeration(labels::SA_MODE, labels::SA_MODES[0].1);
    for (code, label) in labels::SA_MODES {
        mode = mode.value(*label, *code);
    }
    group.add(
        mode,
        WireBinding::query(format!("SAM {}?", axis), format!(":A {}=", axis))
            .command(format!("SAM {}={{}}", axis))
            .codec(Codec::labels())
            .reread_after_write(),
    );

    let mut pattern = PropertyCandidate::enumeration(labels::SA_PATTERN, labels::SA_PATTERNS[0].1);
    for (code, label, since) in labels::SA_PATTERNS {
        pattern = pattern.value_gated(*label, *code, Gate::since(*since));
    }
    group.add(
        pattern,
        PatternField {
            axis,
            mask: labels::SA_PATTERN_MASK,
            shift: 0,
        },
    );

    group.add(
        PropertyCandidate::enumeration(labels::SA_ADVANCED, NO).yes_no(),
        AdvancedSwitch { axis },
    );
    group
}

/// Bit switches and the raw pattern byte, installed on demand.
fn advanced_group<E: StageExt>(axis: char) -> PropertyGroup<E> {
    let mut group = PropertyGroup::new();
    for (name, bit, clear, set) in labels::SA_PATTERN_BITS {
        group.add(
            PropertyCandidate::enumeration(*name, clear)
                .value(*clear, 0)
                .value(*set, 1),
            PatternField {
                axis,
                mask: 1 << bit,
                shift: *bit,
            },
        );
    }
    group.add(
        PropertyCandidate::integer(labels::SA_PATTERN_BYTE, 0)
            .limits(0.0, 255.0)
            .always_live(),
        WireBinding::query(format!("SAP {}?", axis), format!(":A {}=", axis))
            .command(format!("SAP {}={{}}", axis)),
    );
    group
}

async fn read_pattern_byte<E: Send + Sync + 'static>(device: &Device<E>, axis: char) -> TigerResult<i64> {
    device
        .wire()
        .send_and_verify(&format!("SAP {}?", axis), &format!(":A {}=", axis))
        .await?
        .integer(Marker::AfterEquals)
}

// =============================================================================
// Handlers
// =============================================================================

/// Amplitude/offset: the controller works in encoder units, the host in µm.
#[derive(Debug, Clone, Copy)]
struct UnitScaled {
    verb: &'static str,
    axis: char,
}

#[async_trait]
impl<E: StageExt> PropertyHandler<E> for UnitScaled {
    async fn read(
        &self,
        device: &mut Device<E>,
        _descriptor: &PropertyDescriptor,
    ) -> TigerResult<Option<PropertyValue>> {
        let raw = device
            .wire()
            .send_and_verify(
                &format!("{} {}?", self.verb, self.axis),
                &format!(":A {}=", self.axis),
            )
            .await?
            .number(Marker::AfterEquals)?;
        let multiplier = device.ext().units().get(self.axis);
        Ok(Some(PropertyValue::Float(raw / multiplier)))
    }

    async fn write(
        &self,
        device: &mut Device<E>,
        descriptor: &PropertyDescriptor,
        value: &PropertyValue,
    ) -> TigerResult<WriteOutcome> {
        let microns = value
            .as_f64()
            .ok_or_else(|| TigerError::invalid_value(&descriptor.name, value, "expected a number"))?;
        let raw = microns * device.ext().units().get(self.axis);
        let command = format!("{} {}={}", self.verb, self.axis, format_number(raw));
        device.wire().send_and_verify(&command, ACK_PREFIX).await?;
        Ok(WriteOutcome::Applied)
    }
}

/// One bit field of the `SAP` byte, mapped through the descriptor labels.
#[derive(Debug, Clone, Copy)]
struct PatternField {
    axis: char,
    mask: i64,
    shift: u32,
}

#[async_trait]
impl<E: Send + Sync + 'static> PropertyHandler<E> for PatternField {
    async fn read(
        &self,
        device: &mut Device<E>,
        descriptor: &PropertyDescriptor,
    ) -> TigerResult<Option<PropertyValue>> {
        let byte = read_pattern_byte(device, self.axis).await?;
        let code = (byte & self.mask) >> self.shift;
        Ok(Some(PropertyValue::Text(descriptor.label_of(code)?)))
    }

    async fn write(
        &self,
        device: &mut Device<E>,
        descriptor: &PropertyDescriptor,
        value: &PropertyValue,
    ) -> TigerResult<WriteOutcome> {
        let code = descriptor.code_of(&value.to_string())?;
        let current = read_pattern_byte(device, self.axis).await?;
        let byte = (current & !self.mask) | ((code << self.shift) & self.mask);
        device
            .wire()
            .send_and_verify(&format!("SAP {}={}", self.axis, byte), ACK_PREFIX)
            .await?;
        Ok(WriteOutcome::Applied)
    }
}

/// Writing Yes installs the advanced properties; there is no way back.
#[derive(Debug, Clone, Copy)]
struct AdvancedSwitch {
    axis: char,
}

#[async_trait]
impl<E: StageExt> PropertyHandler<E> for AdvancedSwitch {
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
        if value.as_str() == Some(YES) && !device.has_property(labels::SA_PATTERN_BYTE) {
            let added = device.install(advanced_group(self.axis));
            debug!(device = device.name(), count = added.len(), "function generator advanced properties added");
        }
        Ok(WriteOutcome::Applied)
    }
}
