//! XY stage ring buffer (`RM`, `RT`).
//!
//! Present from firmware 2.81 when bit 1 of the first axis property is set
//! and the `RING BUFFER <n>` define reports a non-zero capacity. The mode
//! register lives on pseudo-axis `F` from 2.89 and on `X` before that; a
//! playing buffer reports its mode plus [`labels::RB_RUNNING_FLAG`].

use crate::card::ActionHandler;
use crate::labels::{self, NO, YES};
use async_trait::async_trait;
use tiger_core::binding::WireBinding;
use tiger_core::capability::{BuildInfo, CapabilityContext, Gate, PropertyCandidate};
use tiger_core::dispatch::{Device, PropertyGroup, PropertyHandler, WriteOutcome};
use tiger_core::error::TigerResult;
use tiger_core::property::{PropertyDescriptor, PropertyValue};
use tiger_core::wire::{Marker, ACK_PREFIX};

/// Positions the buffer holds, from the `RING BUFFER` define.
pub fn ring_buffer_capacity(build: &BuildInfo) -> u32 {
    build
        .define_value("RING BUFFER")
        .and_then(|v| v.parse().ok())
        .unwrap_or(0)
}

/// Gate shared by every ring buffer property.
pub fn ring_buffer_gate(capacity: u32) -> Gate {
    Gate::since(2.81)
        .and_axis_property(0, 1)
        .and(&Gate::when(capacity > 0))
}

/// Whether hardware sequencing can be triggered by TTL on this card.
pub fn ttl_trigger_supported(ctx: &CapabilityContext) -> bool {
    let capacity = ring_buffer_capacity(&ctx.build);
    ring_buffer_gate(capacity).is_open(ctx) && ctx.at_least(3.09) && ctx.build.has_define("IN0_INT")
}

/// Build the ring buffer group for the card at `address`.
pub fn ring_buffer_group<E: Send + Sync + 'static>(address: char, ctx: &CapabilityContext) -> PropertyGroup<E> {
    let capacity = ring_buffer_capacity(&ctx.build);
    let gate = ring_buffer_gate(capacity);
    let slot = if ctx.at_least(2.89) { 'F' } else { 'X' };
    let register = ModeRegister { address, slot };

    let mut group = PropertyGroup::new();
    let mut mode = PropertyCandidate::enumeration(labels::RB_MODE, labels::RB_MODES[0].1);
    for (code, label) in labels::RB_MODES {
        mode = mode.value(*label, *code);
    }
    group.add(mode.gate(gate.clone()), RingBufferMode(register));

    group.add(
        PropertyCandidate::integer(labels::RB_DELAY, 0)
            .units("ms")
            .gate(gate.clone()),
        WireBinding::query(format!("{}RT Z?", address), ":A Z=").command(format!("{}RT Z={{}}", address)),
    );
    group.add(
        ActionHandler::candidate(labels::RB_TRIGGER).gate(gate.clone()),
        ActionHandler::new(format!("{}RM", address)),
    );
    group.add(
        PropertyCandidate::enumeration(labels::RB_AUTOPLAY_RUNNING, NO)
            .yes_no()
            .gate(gate.clone()),
        AutoplayRunning(register),
    );
    group.add_static(
        PropertyCandidate::integer(labels::RB_CAPACITY, capacity.into())
            .read_only()
            .gate(gate.clone()),
    );
    group.add(
        PropertyCandidate::enumeration(labels::USE_SEQUENCE, NO)
            .yes_no()
            .gate(gate),
        UseSequence {
            supported: ttl_trigger_supported(ctx),
        },
    );
    group
}

// =============================================================================
// Handlers
// =============================================================================

#[derive(Debug, Clone, Copy)]
struct ModeRegister {
    address: char,
    slot: char,
}

impl ModeRegister {
    async fn read<E: Send + Sync + 'static>(self, device: &Device<E>) -> TigerResult<i64> {
        device
            .wire()
            .send_and_verify(
                &format!("{}RM {}?", self.address, self.slot),
                &format!(":A {}=", self.slot),
            )
            .await?
            .integer(Marker::AfterEquals)
    }
}

/// `RM F|X`, with the running flag stripped.
struct RingBufferMode(ModeRegister);

#[async_trait]
impl<E: Send + Sync + 'static> PropertyHandler<E> for RingBufferMode {
    async fn read(
        &self,
        device: &mut Device<E>,
        descriptor: &PropertyDescriptor,
    ) -> TigerResult<Option<PropertyValue>> {
        let mut code = self.0.read(device).await?;
        if code >= labels::RB_RUNNING_FLAG {
            code -= labels::RB_RUNNING_FLAG;
        }
        Ok(Some(PropertyValue::Text(descriptor.label_of(code)?)))
    }

    async fn write(
        &self,
        device: &mut Device<E>,
        descriptor: &PropertyDescriptor,
        value: &PropertyValue,
    ) -> TigerResult<WriteOutcome> {
        let code = descriptor.code_of(&value.to_string())?;
        let ModeRegister { address, slot } = self.0;
        device
            .wire()
            .send_and_verify(&format!("{}RM {}={}", address, slot, code), ACK_PREFIX)
            .await?;
        Ok(WriteOutcome::Applied)
    }
}

/// Whether the buffer is playing; a write only re-reads.
struct AutoplayRunning(ModeRegister);

#[async_trait]
impl<E: Send + Sync + 'static> PropertyHandler<E> for AutoplayRunning {
    async fn read(
        &self,
        device: &mut Device<E>,
        _descriptor: &PropertyDescriptor,
    ) -> TigerResult<Option<PropertyValue>> {
        let code = self.0.read(device).await?;
        let running = if code >= labels::RB_RUNNING_FLAG { YES } else { NO };
        Ok(Some(running.into()))
    }

    async fn write(
        &self,
        device: &mut Device<E>,
        descriptor: &PropertyDescriptor,
        _value: &PropertyValue,
    ) -> TigerResult<WriteOutcome> {
        let resolved = device.reread(&descriptor.name).await?;
        Ok(WriteOutcome::Resolved(resolved))
    }
}

/// Host flag; Yes sticks only when the card can take TTL triggers.
struct UseSequence {
    supported: bool,
}

#[async_trait]
impl<E: Send + Sync + 'static> PropertyHandler<E> for UseSequence {
    async fn read(
        &self,
        _device: &mut Device<E>,
        _descriptor: &PropertyDescriptor,
    ) -> TigerResult<Option<PropertyValue>> {
        Ok(None)
    }

    async fn write(
        &self,
        _device: &mut Device<E>,
        _descriptor: &PropertyDescriptor,
        value: &PropertyValue,
    ) -> TigerResult<WriteOutcome> {
        let enabled = self.supported && value.as_str() == Some(YES);
        Ok(WriteOutcome::Resolved(if enabled { YES } else { NO }.into()))
    }
}
