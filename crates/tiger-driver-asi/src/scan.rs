//! XY stage raster scan state machine (`SN`, `NR`, `NV`).
//!
//! Available when bit 2 of the first axis property is set. `SN` registers
//! report single characters, read at position 3 of `:A c`.

use crate::labels;
use async_trait::async_trait;
use tiger_core::binding::{Codec, WireBinding};
use tiger_core::capability::{Gate, PropertyCandidate};
use tiger_core::dispatch::{Device, PropertyGroup, PropertyHandler, WriteOutcome};
use tiger_core::error::{TigerError, TigerResult};
use tiger_core::property::{PropertyDescriptor, PropertyValue};
use tiger_core::wire::ACK_PREFIX;
use tracing::debug;

const SCAN_IDLE: char = 'I';

/// Gate shared by every scan property.
pub fn scan_gate() -> Gate {
    Gate::always().and_axis_property(0, 2)
}

/// Build the scan group for the card at `address`.
pub fn scan_group<E: Send + Sync + 'static>(address: char) -> PropertyGroup<E> {
    let gate = scan_gate();
    let mut group = PropertyGroup::new();

    let mut state = PropertyCandidate::enumeration(labels::SCAN_STATE, labels::SCAN_STATES[0].1);
    for (n, (_, label)) in labels::SCAN_STATES.iter().enumerate() {
        state = state.value(*label, n as i64);
    }
    group.add(state.gate(gate.clone()), ScanState { address });

    for (name, slot, choices) in [
        (labels::SCAN_FAST_AXIS, 'Y', labels::SCAN_FAST_AXES),
        (labels::SCAN_SLOW_AXIS, 'Z', labels::SCAN_SLOW_AXES),
        (labels::SCAN_PATTERN, 'F', labels::SCAN_PATTERNS),
    ] {
        let mut candidate = PropertyCandidate::enumeration(name, choices[0].1);
        for (n, (_, label)) in choices.iter().enumerate() {
            candidate = candidate.value(*label, n as i64);
        }
        group.add(
            candidate.gate(gate.clone()),
            CharCoded {
                address,
                slot,
                choices,
            },
        );
    }

    let register = |verb: &str, slot: char| {
        WireBinding::query(format!("{}{} {}?", address, verb, slot), format!(":A {}=", slot))
            .command(format!("{}{} {}={{}}", address, verb, slot))
    };
    for (name, verb, slot) in [
        (labels::SCAN_FAST_START, "NR", 'X'),
        (labels::SCAN_FAST_STOP, "NR", 'Y'),
        (labels::SCAN_SLOW_START, "NV", 'X'),
        (labels::SCAN_SLOW_STOP, "NV", 'Y'),
    ] {
        group.add(
            PropertyCandidate::float(name, 0.0).units("mm").gate(gate.clone()),
            register(verb, slot).codec(Codec::float()),
        );
    }
    group.add(
        PropertyCandidate::integer(labels::SCAN_NUM_LINES, 1)
            .limits(1.0, 100.0)
            .gate(gate.clone()),
        register("NV", 'Z'),
    );
    group.add(
        PropertyCandidate::float(labels::SCAN_SETTLING_TIME, 0.0)
            .limits(0.0, 5000.0)
            .units("ms")
            .gate(gate.clone()),
        register("NV", 'F').codec(Codec::float()),
    );
    group.add(
        PropertyCandidate::integer(labels::SCAN_OVERSHOOT, 0)
            .units("um")
            .since(3.17)
            .gate(gate.clone()),
        register("NV", 'T').codec(Codec::RoundedInteger { scale: 1000.0 }),
    );
    group.add(
        PropertyCandidate::float(labels::SCAN_RETRACE_SPEED, 67.0)
            .limits(0.01, 100.0)
            .since(3.30)
            .gate(gate),
        register("NR", 'R').codec(Codec::float()),
    );
    group
}

async fn read_char<E: Send + Sync + 'static>(device: &Device<E>, address: char, slot: char) -> TigerResult<char> {
    device
        .wire()
        .send_and_verify(&format!("{}SN {}?", address, slot), ACK_PREFIX)
        .await?
        .char_at(3)
}

// =============================================================================
// Handlers
// =============================================================================

/// `SN X`: idle or running. Writing starts an idle scan or stops a running one.
struct ScanState {
    address: char,
}

#[async_trait]
impl<E: Send + Sync + 'static> PropertyHandler<E> for ScanState {
    async fn read(
        &self,
        device: &mut Device<E>,
        _descriptor: &PropertyDescriptor,
    ) -> TigerResult<Option<PropertyValue>> {
        // Several codes mean running; only 'I' is idle.
        let state = if read_char(device, self.address, 'X').await? == SCAN_IDLE {
            labels::SCAN_STATES[0].1
        } else {
            labels::SCAN_STATES[1].1
        };
        Ok(Some(state.into()))
    }

    async fn write(
        &self,
        device: &mut Device<E>,
        descriptor: &PropertyDescriptor,
        value: &PropertyValue,
    ) -> TigerResult<WriteOutcome> {
        let start = descriptor.code_of(&value.to_string())? != 0;
        let idle = read_char(device, self.address, 'X').await? == SCAN_IDLE;
        let command = match (start, idle) {
            (true, true) => format!("{}SN", self.address),
            (false, false) => format!("{}SN X={}", self.address, u32::from(labels::SCAN_STOP)),
            _ => {
                debug!(device = device.name(), start, "scan already in requested state");
                return Ok(WriteOutcome::Applied);
            }
        };
        device.wire().send_and_verify(&command, ACK_PREFIX).await?;
        Ok(WriteOutcome::Applied)
    }
}

/// `SN Y|Z|F`: one character per choice.
struct CharCoded {
    address: char,
    slot: char,
    choices: &'static [(char, &'static str)],
}

#[async_trait]
impl<E: Send + Sync + 'static> PropertyHandler<E> for CharCoded {
    async fn read(
        &self,
        device: &mut Device<E>,
        descriptor: &PropertyDescriptor,
    ) -> TigerResult<Option<PropertyValue>> {
        let code = read_char(device, self.address, self.slot).await?;
        self.choices
            .iter()
            .find(|(c, _)| *c == code)
            .map(|(_, label)| Some(PropertyValue::from(*label)))
            .ok_or_else(|| TigerError::invalid_value(&descriptor.name, code, "unknown scan code"))
    }

    async fn write(
        &self,
        device: &mut Device<E>,
        descriptor: &PropertyDescriptor,
        value: &PropertyValue,
    ) -> TigerResult<WriteOutcome> {
        let label = value.to_string();
        let code = self
            .choices
            .iter()
            .find(|(_, l)| *l == label)
            .map(|(c, _)| *c)
            .ok_or_else(|| TigerError::invalid_value(&descriptor.name, &label, "not a scan choice"))?;
        device
            .wire()
            .send_and_verify(&format!("{}SN {}={}", self.address, self.slot, code), ACK_PREFIX)
            .await?;
        Ok(WriteOutcome::Applied)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tiger_core::capability::{BuildInfo, CapabilityContext, FirmwareVersion};
    use tiger_core::dispatch::DeviceCapabilities;
    use tiger_driver_mock::MockWire;

    fn device(wire: Arc<MockWire>, version: f64, props: &str) -> Device<()> {
        let ctx = CapabilityContext::new(FirmwareVersion::new(version))
            .with_build(BuildInfo::parse(&format!("STD_XY\rAxis Props: {}", props)));
        let mut device = Device::new("xy", DeviceCapabilities::new('2', ['X', 'Y']), wire, ctx, ());
        device.install(scan_group('2'));
        device.mark_initialized();
        device
    }

    #[tokio::test]
    async fn test_scan_needs_axis_property_bit() {
        let wire = MockWire::new().shared();
        assert!(!device(wire.clone(), 3.30, "3").has_property(labels::SCAN_STATE));
        assert!(device(wire, 3.30, "4").has_property(labels::SCAN_STATE));
    }

    #[tokio::test]
    async fn test_retrace_speed_from_330() {
        let wire = MockWire::new().shared();
        let old = device(wire.clone(), 3.29, "4");
        assert!(!old.has_property(labels::SCAN_RETRACE_SPEED));
        assert!(old.has_property(labels::SCAN_OVERSHOOT));
        let new = device(wire, 3.30, "4");
        assert_eq!(
            new.cached_text(labels::SCAN_RETRACE_SPEED).as_deref(),
            Some("67")
        );
    }

    #[tokio::test]
    async fn test_start_only_when_idle() {
        let wire = MockWire::new().shared();
        wire.script("2SN X?", ":A I");
        let mut device = device(wire.clone(), 3.30, "4");

        device
            .set(labels::SCAN_STATE, labels::SCAN_STATES[1].1.into())
            .await
            .unwrap();
        assert_eq!(wire.commands(), vec!["2SN X?", "2SN"]);

        wire.clear_log();
        device
            .set(labels::SCAN_STATE, labels::SCAN_STATES[0].1.into())
            .await
            .unwrap();
        assert_eq!(wire.commands(), vec!["2SN X?"]);
    }

    #[tokio::test]
    async fn test_stop_sends_stop_code() {
        let wire = MockWire::new().shared();
        wire.script("2SN X?", ":A K");
        let mut device = device(wire.clone(), 3.30, "4");
        device
            .set(labels::SCAN_STATE, labels::SCAN_STATES[0].1.into())
            .await
            .unwrap();
        assert_eq!(wire.last_command().as_deref(), Some("2SN X=80"));
    }

    #[tokio::test]
    async fn test_char_coded_round_trip() {
        let wire = MockWire::new().shared();
        let mut device = device(wire.clone(), 3.30, "4");
        device
            .set(labels::SCAN_SLOW_AXIS, "Null (1D scan)".into())
            .await
            .unwrap();
        assert_eq!(wire.last_command().as_deref(), Some("2SN Z=9"));

        device.state_mut().refresh_enabled = true;
        assert_eq!(
            device.get(labels::SCAN_SLOW_AXIS).await.unwrap(),
            "Null (1D scan)".into()
        );
        wire.script("2SN F?", ":A 7");
        assert!(device.get(labels::SCAN_PATTERN).await.is_err());
    }

    #[tokio::test]
    async fn test_overshoot_is_rounded_microns() {
        let wire = MockWire::new().shared();
        wire.set_register("2NV", 'T', "0.0127");
        let mut device = device(wire.clone(), 3.30, "4");
        device.state_mut().refresh_enabled = true;
        assert_eq!(
            device.get(labels::SCAN_OVERSHOOT).await.unwrap(),
            PropertyValue::Integer(13)
        );
        device
            .set(labels::SCAN_OVERSHOOT, PropertyValue::Integer(25))
            .await
            .unwrap();
        assert_eq!(wire.last_command().as_deref(), Some("2NV T=0.025"));
    }
}
