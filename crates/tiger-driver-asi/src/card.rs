//! Card-level properties every Tiger device carries.
//!
//! - read-only description, firmware version and build name
//! - `RefreshPropertyValues`: host-side switch for the read cache
//! - `SaveCardSettings`: writes the card's settings to NVRAM with `SS`
//!
//! Also home to [`ActionHandler`], the "do it" trigger used for one-shot
//! commands such as clearing logic cell states or resetting a PMT.

use crate::labels::{self, DONE, DO_IT, IDLE, NO, YES};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::time::Duration;
use tiger_core::capability::PropertyCandidate;
use tiger_core::dispatch::{Device, PropertyGroup, PropertyHandler, WriteOutcome};
use tiger_core::error::TigerResult;
use tiger_core::limits::SAVE_SETTINGS_SETTLE;
use tiger_core::property::{PropertyDescriptor, PropertyValue};
use tiger_core::wire::{CardIdentity, Marker, ACK_PREFIX};
use tracing::{debug, info};

/// Build the card-level group.
///
/// `joystick` is the axis pair whose `J` assignments the XY stage parks
/// before saving; when present the `Z + joystick` save option is offered.
pub fn card_group<E: Send + Sync + 'static>(
    description: &str,
    identity: &CardIdentity,
    joystick: Option<(char, char)>,
) -> PropertyGroup<E> {
    let mut group = PropertyGroup::new();
    group.add_static(PropertyCandidate::text(labels::DESCRIPTION, description).read_only());
    group.add_static(
        PropertyCandidate::float(labels::FIRMWARE_VERSION, identity.version.value()).read_only(),
    );
    group.add_static(
        PropertyCandidate::text(labels::FIRMWARE_BUILD, identity.build.name.clone()).read_only(),
    );

    group.add(
        PropertyCandidate::enumeration(labels::REFRESH_PROPERTY_VALUES, NO).yes_no(),
        RefreshHandler,
    );

    let mut save = PropertyCandidate::enumeration(labels::SAVE_CARD_SETTINGS, labels::SAVE_SETTINGS_NONE)
        .value(labels::SAVE_SETTINGS_X, 0)
        .value(labels::SAVE_SETTINGS_Y, 1)
        .value(labels::SAVE_SETTINGS_Z, 2);
    if joystick.is_some() {
        save = save.value(labels::SAVE_SETTINGS_Z_JOYSTICK, 3);
    }
    save = save
        .value(labels::SAVE_SETTINGS_NONE, 4)
        .value(labels::SAVE_SETTINGS_DONE, 5);
    group.add(save, SaveSettingsHandler { joystick });
    group
}

/// Card addresses are `1`-`9` or an upper-case letter.
pub fn check_address(address: char) -> Result<()> {
    if matches!(address, '1'..='9' | 'A'..='Z') {
        Ok(())
    } else {
        Err(anyhow!("card address '{}' must be 1-9 or A-Z", address))
    }
}

/// Axis letters are upper-case.
pub fn check_axis(axis: char) -> Result<()> {
    if axis.is_ascii_uppercase() {
        Ok(())
    } else {
        Err(anyhow!("axis letter '{}' must be A-Z", axis))
    }
}

// =============================================================================
// Handlers
// =============================================================================

/// Sets `refresh_enabled`; never talks to the controller.
#[derive(Debug, Clone, Copy)]
pub struct RefreshHandler;

#[async_trait]
impl<E: Send + Sync + 'static> PropertyHandler<E> for RefreshHandler {
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
        let enabled = value.as_str() == Some(YES);
        device.state_mut().refresh_enabled = enabled;
        debug!(device = device.name(), enabled, "refresh policy changed");
        Ok(WriteOutcome::Applied)
    }
}

/// `<addr>SS X|Z`, then settle.
#[derive(Debug, Clone, Copy)]
pub struct SaveSettingsHandler {
    joystick: Option<(char, char)>,
}

impl SaveSettingsHandler {
    /// Move each joystick assignment out of the way (+100) so the saved
    /// settings do not bind the joystick at power-up.
    async fn park_joystick<E: Send + Sync + 'static>(
        device: &Device<E>,
        axes: (char, char),
    ) -> TigerResult<()> {
        let wire = device.wire();
        for axis in [axes.0, axes.1] {
            let reply = wire
                .send_and_verify(&format!("J {}?", axis), &format!(":A {}=", axis))
                .await?;
            let code = reply.integer(Marker::AfterEquals)? + labels::JOYSTICK_PARK_OFFSET;
            wire.send_and_verify(&format!("J {}={}", axis, code), ACK_PREFIX)
                .await?;
        }
        Ok(())
    }
}

#[async_trait]
impl<E: Send + Sync + 'static> PropertyHandler<E> for SaveSettingsHandler {
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
        let slot = match value.as_str() {
            Some(labels::SAVE_SETTINGS_X) | Some(labels::SAVE_SETTINGS_Y) => 'X',
            Some(labels::SAVE_SETTINGS_Z) => 'Z',
            Some(labels::SAVE_SETTINGS_Z_JOYSTICK) => {
                if let Some(axes) = self.joystick {
                    Self::park_joystick(device, axes).await?;
                }
                'Z'
            }
            _ => return Ok(WriteOutcome::Applied),
        };
        let command = format!("{}SS {}", device.address(), slot);
        device
            .wire()
            .send_and_verify_settled(&command, ACK_PREFIX, SAVE_SETTINGS_SETTLE)
            .await?;
        info!(device = device.name(), slot = %slot, "card settings saved");
        Ok(WriteOutcome::Resolved(labels::SAVE_SETTINGS_DONE.into()))
    }
}

/// One-shot command behind an idle / do it / done enumeration.
///
/// Writing the "do it" label sends `command`, waits `settle` if set, and
/// leaves the property at "done". Other labels are accepted silently.
#[derive(Debug, Clone)]
pub struct ActionHandler {
    command: String,
    prefix: String,
    settle: Option<Duration>,
    trigger: &'static str,
    done: &'static str,
}

impl ActionHandler {
    /// Action sending `command` and expecting `:A`.
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            prefix: ACK_PREFIX.to_string(),
            settle: None,
            trigger: DO_IT,
            done: DONE,
        }
    }

    /// Wait `settle` after the reply.
    pub fn settle(mut self, settle: Duration) -> Self {
        self.settle = Some(settle);
        self
    }

    /// Use different trigger/done labels.
    pub fn labels(mut self, trigger: &'static str, done: &'static str) -> Self {
        self.trigger = trigger;
        self.done = done;
        self
    }

    /// Candidate with the standard action labels.
    pub fn candidate(name: impl Into<String>) -> PropertyCandidate {
        PropertyCandidate::action(name, IDLE, DO_IT, DONE)
    }
}

#[async_trait]
impl<E: Send + Sync + 'static> PropertyHandler<E> for ActionHandler {
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
        if value.as_str() != Some(self.trigger) {
            return Ok(WriteOutcome::Applied);
        }
        let wire = device.wire();
        match self.settle {
            Some(settle) => {
                wire.send_and_verify_settled(&self.command, &self.prefix, settle)
                    .await?
            }
            None => wire.send_and_verify(&self.command, &self.prefix).await?,
        };
        Ok(WriteOutcome::Resolved(self.done.into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tiger_core::capability::{BuildInfo, CapabilityContext, FirmwareVersion};
    use tiger_core::dispatch::DeviceCapabilities;
    use tiger_driver_mock::MockWire;

    fn identity() -> CardIdentity {
        CardIdentity {
            version: FirmwareVersion::new(3.30),
            build: BuildInfo::parse("TIGER_COMM\rAxis Props: 0"),
        }
    }

    fn device(wire: Arc<MockWire>, joystick: Option<(char, char)>) -> Device<()> {
        let mut device = Device::new(
            "card",
            DeviceCapabilities::new('2', ['X', 'Y']),
            wire,
            CapabilityContext::new(FirmwareVersion::new(3.30)),
            (),
        );
        device.install(card_group("Test card", &identity(), joystick));
        let mut actions = PropertyGroup::new();
        actions.add(ActionHandler::candidate("Clear"), ActionHandler::new("! X"));
        device.install(actions);
        device.mark_initialized();
        device
    }

    #[tokio::test(start_paused = true)]
    async fn save_settings_sends_slot_and_settles_on_done() {
        let wire = MockWire::new().shared();
        let mut device = device(wire.clone(), None);

        device
            .set(labels::SAVE_CARD_SETTINGS, labels::SAVE_SETTINGS_Y.into())
            .await
            .unwrap();
        assert_eq!(wire.last_command().as_deref(), Some("2SS X"));
        assert_eq!(
            device.cached_text(labels::SAVE_CARD_SETTINGS).as_deref(),
            Some(labels::SAVE_SETTINGS_DONE)
        );

        wire.clear_log();
        device
            .set(labels::SAVE_CARD_SETTINGS, labels::SAVE_SETTINGS_NONE.into())
            .await
            .unwrap();
        assert_eq!(wire.command_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn save_with_joystick_parks_assignments_first() {
        let wire = MockWire::new().shared();
        wire.set_register("J", 'X', "2");
        wire.set_register("J", 'Y', "3");
        let mut device = device(wire.clone(), Some(('X', 'Y')));

        device
            .set(labels::SAVE_CARD_SETTINGS, labels::SAVE_SETTINGS_Z_JOYSTICK.into())
            .await
            .unwrap();
        assert_eq!(
            wire.commands(),
            vec!["J X?", "J X=102", "J Y?", "J Y=103", "2SS Z"]
        );
    }

    #[tokio::test]
    async fn joystick_option_only_offered_with_axes() {
        let wire = MockWire::new().shared();
        let device = device(wire, None);
        let offered = device
            .descriptor(labels::SAVE_CARD_SETTINGS)
            .unwrap()
            .labels();
        assert!(!offered.iter().any(|l| l == labels::SAVE_SETTINGS_Z_JOYSTICK));
    }

    #[tokio::test]
    async fn refresh_toggle_has_no_wire_traffic() {
        let wire = MockWire::new().shared();
        let mut device = device(wire.clone(), None);
        device
            .set(labels::REFRESH_PROPERTY_VALUES, YES.into())
            .await
            .unwrap();
        assert!(device.state().refresh_enabled);
        assert_eq!(wire.command_count(), 0);
        assert_eq!(
            device.get(labels::FIRMWARE_VERSION).await.unwrap(),
            PropertyValue::Float(3.30)
        );
    }

    #[test]
    fn address_and_axis_checks() {
        assert!(check_address('3').is_ok());
        assert!(check_address('B').is_ok());
        assert!(check_address('0').is_err());
        assert!(check_address('b').is_err());
        assert!(check_axis('E').is_ok());
        assert!(check_axis('1').is_err());
    }

    #[tokio::test]
    async fn action_runs_only_on_trigger() {
        let wire = MockWire::new().shared();
        let mut device = device(wire.clone(), None);

        device.set("Clear", IDLE.into()).await.unwrap();
        assert_eq!(wire.command_count(), 0);

        device.set("Clear", DO_IT.into()).await.unwrap();
        assert_eq!(wire.commands(), vec!["! X"]);
        assert_eq!(device.cached_text("Clear").as_deref(), Some(DONE));
        assert_eq!(device.get("Clear").await.unwrap(), DONE.into());
    }
}
