//! Joystick and wheel properties.
//!
//! The controller mirrors a joystick by storing a negative speed. The host
//! sees a strictly positive speed plus a separate reverse flag, so the speed
//! handlers consult the cached reverse flag on write and the reverse handler
//! rewrites both speeds with the new sign.

use crate::labels::{self, NO, YES};
use async_trait::async_trait;
use tiger_core::binding::{Codec, WireBinding};
use tiger_core::capability::{Gate, PropertyCandidate};
use tiger_core::dispatch::{Device, PropertyGroup, PropertyHandler, WriteOutcome};
use tiger_core::error::{TigerError, TigerResult};
use tiger_core::property::{PropertyDescriptor, PropertyValue};
use tiger_core::wire::{format_number, Marker, ACK_PREFIX};

/// Which joystick assignment properties a device gets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputForm {
    /// Two axes driven together: enable and rotate switches.
    XyStage {
        /// First axis letter
        x: char,
        /// Second axis letter
        y: char,
    },
    /// One axis with a free choice of joystick input.
    SingleAxis(char),
}

/// Joystick speed pair on one `JS` register set.
#[derive(Debug, Clone, Copy)]
struct SpeedPair {
    fast_slot: char,
    slow_slot: char,
    fast_name: &'static str,
    slow_name: &'static str,
    reverse_name: &'static str,
}

const JOYSTICK: SpeedPair = SpeedPair {
    fast_slot: 'X',
    slow_slot: 'Y',
    fast_name: labels::JOYSTICK_FAST_SPEED,
    slow_name: labels::JOYSTICK_SLOW_SPEED,
    reverse_name: labels::JOYSTICK_REVERSE,
};

const WHEEL: SpeedPair = SpeedPair {
    fast_slot: 'F',
    slow_slot: 'T',
    fast_name: labels::WHEEL_FAST_SPEED,
    slow_name: labels::WHEEL_SLOW_SPEED,
    reverse_name: labels::WHEEL_REVERSE,
};

/// Build the input group. Wheel properties appear from `wheel_since` on.
pub fn input_group<E: Send + Sync + 'static>(form: InputForm, wheel_since: f64) -> PropertyGroup<E> {
    let mut group = PropertyGroup::new();
    add_speed_pair(&mut group, JOYSTICK, (100.0, 10.0), Gate::always());

    match form {
        InputForm::XyStage { x, y } => {
            group.add(
                PropertyCandidate::enumeration(labels::JOYSTICK_ENABLED, NO).yes_no(),
                JoystickAssignment {
                    x,
                    y,
                    switch: AssignmentSwitch::Enabled,
                },
            );
            group.add(
                PropertyCandidate::enumeration(labels::JOYSTICK_ROTATE, NO).yes_no(),
                JoystickAssignment {
                    x,
                    y,
                    switch: AssignmentSwitch::Rotate,
                },
            );
        }
        InputForm::SingleAxis(axis) => {
            let mut input = PropertyCandidate::enumeration(labels::JOYSTICK_INPUT, labels::JOYSTICK_INPUTS[0].1);
            for (code, label) in labels::JOYSTICK_INPUTS {
                input = input.value(*label, *code);
            }
            group.add(
                input,
                WireBinding::query(format!("J {}?", axis), format!(":A {}=", axis))
                    .command(format!("J {}={{}}", axis))
                    .codec(Codec::Labels { lenient: true }),
            );
        }
    }

    add_speed_pair(&mut group, WHEEL, (10.0, 5.0), Gate::since(wheel_since));
    group
}

fn add_speed_pair<E: Send + Sync + 'static>(
    group: &mut PropertyGroup<E>,
    pair: SpeedPair,
    defaults: (f64, f64),
    gate: Gate,
) {
    group.add(
        PropertyCandidate::float(pair.fast_name, defaults.0)
            .limits(0.0, 100.0)
            .gate(gate.clone()),
        InputSpeed {
            slot: pair.fast_slot,
            reverse_name: pair.reverse_name,
        },
    );
    group.add(
        PropertyCandidate::float(pair.slow_name, defaults.1)
            .limits(0.0, 100.0)
            .gate(gate.clone()),
        InputSpeed {
            slot: pair.slow_slot,
            reverse_name: pair.reverse_name,
        },
    );
    group.add(
        PropertyCandidate::enumeration(pair.reverse_name, NO)
            .yes_no()
            .gate(gate),
        InputReverse(pair),
    );
}

fn cached_number<E: Send + Sync + 'static>(device: &Device<E>, name: &str) -> f64 {
    device
        .state()
        .cached(name)
        .and_then(PropertyValue::as_f64)
        .or_else(|| device.descriptor(name).and_then(|d| d.default.as_f64()))
        .unwrap_or_default()
}

fn signed(reversed: bool, speed: f64) -> String {
    if reversed {
        format!("-{}", format_number(speed))
    } else {
        format_number(speed)
    }
}

async fn query_speed<E: Send + Sync + 'static>(device: &Device<E>, slot: char) -> TigerResult<f64> {
    let reply = device
        .wire()
        .send_and_verify(
            &format!("{}JS {}?", device.address(), slot),
            &format!(":A {}=", slot),
        )
        .await?;
    reply.number(Marker::AfterEquals)
}

// =============================================================================
// Handlers
// =============================================================================

/// One `JS` speed slot, reported as a magnitude.
#[derive(Debug, Clone, Copy)]
struct InputSpeed {
    slot: char,
    reverse_name: &'static str,
}

#[async_trait]
impl<E: Send + Sync + 'static> PropertyHandler<E> for InputSpeed {
    async fn read(
        &self,
        device: &mut Device<E>,
        _descriptor: &PropertyDescriptor,
    ) -> TigerResult<Option<PropertyValue>> {
        let speed = query_speed(device, self.slot).await?;
        Ok(Some(PropertyValue::Float(speed.abs())))
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
        let reversed = device.cached_text(self.reverse_name).as_deref() == Some(YES);
        let command = format!(
            "{}JS {}={}",
            device.address(),
            self.slot,
            signed(reversed, speed)
        );
        device.wire().send_and_verify(&command, ACK_PREFIX).await?;
        Ok(WriteOutcome::Applied)
    }
}

/// Reverse flag: read from the sign of the fast speed, written by resending
/// both speeds.
#[derive(Debug, Clone, Copy)]
struct InputReverse(SpeedPair);

#[async_trait]
impl<E: Send + Sync + 'static> PropertyHandler<E> for InputReverse {
    async fn read(
        &self,
        device: &mut Device<E>,
        _descriptor: &PropertyDescriptor,
    ) -> TigerResult<Option<PropertyValue>> {
        let fast = query_speed(device, self.0.fast_slot).await?;
        Ok(Some(if fast < 0.0 { YES } else { NO }.into()))
    }

    async fn write(
        &self,
        device: &mut Device<E>,
        _descriptor: &PropertyDescriptor,
        value: &PropertyValue,
    ) -> TigerResult<WriteOutcome> {
        let pair = self.0;
        let reversed = value.as_str() == Some(YES);
        let fast = cached_number(device, pair.fast_name);
        let slow = cached_number(device, pair.slow_name);
        let command = format!(
            "{}JS {}={} {}={}",
            device.address(),
            pair.fast_slot,
            signed(reversed, fast),
            pair.slow_slot,
            signed(reversed, slow)
        );
        device.wire().send_and_verify(&command, ACK_PREFIX).await?;
        Ok(WriteOutcome::Applied)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AssignmentSwitch {
    Enabled,
    Rotate,
}

/// `JoystickEnabled` and `JoystickRotate` both rewrite the `J` assignment
/// of the axis pair from the combined state of the two switches.
#[derive(Debug, Clone, Copy)]
struct JoystickAssignment {
    x: char,
    y: char,
    switch: AssignmentSwitch,
}

#[async_trait]
impl<E: Send + Sync + 'static> PropertyHandler<E> for JoystickAssignment {
    async fn read(
        &self,
        device: &mut Device<E>,
        _descriptor: &PropertyDescriptor,
    ) -> TigerResult<Option<PropertyValue>> {
        let reply = device
            .wire()
            .send_and_verify(&format!("J {}?", self.x), &format!(":A {}=", self.x))
            .await?;
        let code = reply.integer(Marker::AfterEquals)?;
        let on = match self.switch {
            AssignmentSwitch::Enabled => code != 0,
            AssignmentSwitch::Rotate => code == labels::JOYSTICK_CODE_Y,
        };
        Ok(Some(if on { YES } else { NO }.into()))
    }

    async fn write(
        &self,
        device: &mut Device<E>,
        _descriptor: &PropertyDescriptor,
        value: &PropertyValue,
    ) -> TigerResult<WriteOutcome> {
        let on = value.as_str() == Some(YES);
        let (enabled, rotated) = match self.switch {
            AssignmentSwitch::Enabled => (
                on,
                device.cached_text(labels::JOYSTICK_ROTATE).as_deref() == Some(YES),
            ),
            AssignmentSwitch::Rotate => (
                device.cached_text(labels::JOYSTICK_ENABLED).as_deref() == Some(YES),
                on,
            ),
        };
        let (x_code, y_code) = match (enabled, rotated) {
            (false, _) => (0, 0),
            (true, false) => (labels::JOYSTICK_CODE_X, labels::JOYSTICK_CODE_Y),
            (true, true) => (labels::JOYSTICK_CODE_Y, labels::JOYSTICK_CODE_X),
        };
        let command = format!("J {}={} {}={}", self.x, x_code, self.y, y_code);
        device.wire().send_and_verify(&command, ACK_PREFIX).await?;
        Ok(WriteOutcome::Applied)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tiger_core::capability::{CapabilityContext, FirmwareVersion};
    use tiger_core::dispatch::DeviceCapabilities;
    use tiger_driver_mock::MockWire;

    fn device(wire: Arc<MockWire>, form: InputForm, version: f64) -> Device<()> {
        let mut device = Device::new(
            "input",
            DeviceCapabilities::new('1', ['X', 'Y']),
            wire,
            CapabilityContext::new(FirmwareVersion::new(version)),
            (),
        );
        device.install(input_group(form, 3.14));
        device.mark_initialized();
        device
    }

    #[tokio::test]
    async fn reversed_speed_is_sent_negative_and_read_as_magnitude() {
        let wire = MockWire::new().shared();
        let mut device = device(wire.clone(), InputForm::XyStage { x: 'X', y: 'Y' }, 3.30);

        device.set(labels::JOYSTICK_REVERSE, YES.into()).await.unwrap();
        assert_eq!(wire.last_command().as_deref(), Some("1JS X=-100 Y=-10"));

        device
            .set(labels::JOYSTICK_FAST_SPEED, PropertyValue::Float(40.0))
            .await
            .unwrap();
        assert_eq!(wire.last_command().as_deref(), Some("1JS X=-40"));

        device.state_mut().refresh_enabled = true;
        assert_eq!(
            device.get(labels::JOYSTICK_FAST_SPEED).await.unwrap(),
            PropertyValue::Float(40.0)
        );
        assert_eq!(device.get_text(labels::JOYSTICK_REVERSE).await.unwrap(), YES);
    }

    #[tokio::test]
    async fn enable_respects_rotation() {
        let wire = MockWire::new().shared();
        let mut device = device(wire.clone(), InputForm::XyStage { x: 'X', y: 'Y' }, 3.30);

        device.set(labels::JOYSTICK_ENABLED, YES.into()).await.unwrap();
        assert_eq!(wire.last_command().as_deref(), Some("J X=2 Y=3"));

        device.set(labels::JOYSTICK_ROTATE, YES.into()).await.unwrap();
        assert_eq!(wire.last_command().as_deref(), Some("J X=3 Y=2"));

        device.set(labels::JOYSTICK_ENABLED, NO.into()).await.unwrap();
        assert_eq!(wire.last_command().as_deref(), Some("J X=0 Y=0"));

        wire.set_register("J", 'X', "3");
        device.state_mut().refresh_enabled = true;
        assert_eq!(device.get_text(labels::JOYSTICK_ROTATE).await.unwrap(), YES);
        assert_eq!(device.get_text(labels::JOYSTICK_ENABLED).await.unwrap(), YES);
    }

    #[tokio::test]
    async fn single_axis_input_tolerates_unknown_codes() {
        let wire = MockWire::new().shared();
        let mut device = device(wire.clone(), InputForm::SingleAxis('Z'), 3.30);
        assert!(!device.has_property(labels::JOYSTICK_ENABLED));

        device.set_code(labels::JOYSTICK_INPUT, 22).await.unwrap();
        assert_eq!(wire.last_command().as_deref(), Some("J Z=22"));

        wire.set_register("J", 'Z', "1");
        device.state_mut().refresh_enabled = true;
        assert_eq!(
            device.get_text(labels::JOYSTICK_INPUT).await.unwrap(),
            labels::JOYSTICK_INPUTS[3].1
        );
    }

    #[tokio::test]
    async fn wheel_gated_by_firmware() {
        let wire = MockWire::new().shared();
        let old = device(wire.clone(), InputForm::SingleAxis('Z'), 3.13);
        assert!(!old.has_property(labels::WHEEL_FAST_SPEED));
        let new = device(wire, InputForm::SingleAxis('Z'), 3.14);
        assert!(new.has_property(labels::WHEEL_FAST_SPEED));
        assert!(new.has_property(labels::WHEEL_REVERSE));
    }
}
