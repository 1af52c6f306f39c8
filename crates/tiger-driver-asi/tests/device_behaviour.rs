//! Device-level behaviour of the ASI adapters against the in-memory
//! controller.

use std::sync::Arc;
use tiger_core::driver::{DriverRegistry, PropertySurface};
use tiger_core::error::ErrorKind;
use tiger_core::property::PropertyValue;
use tiger_driver_asi::labels;
use tiger_driver_asi::{PLogic, PLogicConfig, PLogicMode, XyStage, XyStageConfig, ZStage, ZStageConfig};
use tiger_driver_mock::MockWire;

const XY_BUILD: &str = "STD_XY\rAxis Props: 7 7\rRING BUFFER 250\rIN0_INT";

fn plogic_wire(version: f64) -> Arc<MockWire> {
    MockWire::new()
        .with_card('1', version, "PLOGIC_24\rAxis Props: 0\r")
        .shared()
}

async fn plogic(wire: Arc<MockWire>) -> PLogic {
    PLogic::initialize(&PLogicConfig::new("logic", '1', 'E'), wire)
        .await
        .unwrap()
}

async fn xy_stage(version: f64, build: &str) -> (Arc<MockWire>, XyStage) {
    let wire = MockWire::new().with_card('2', version, build).shared();
    let stage = XyStage::initialize(&XyStageConfig::new("xy", '2', 'X', 'Y'), wire.clone())
        .await
        .unwrap();
    (wire, stage)
}

#[tokio::test]
async fn version_thresholds_are_monotonic() {
    for (version, expected) in [(2.80, false), (2.81, true), (3.30, true)] {
        let (_wire, stage) = xy_stage(version, XY_BUILD).await;
        assert_eq!(
            stage.device().has_property(labels::RB_MODE),
            expected,
            "ring buffer at {}",
            version
        );
    }

    for (version, expected) in [(3.16, false), (3.17, true), (3.30, true)] {
        let (_wire, stage) = xy_stage(version, XY_BUILD).await;
        assert_eq!(
            stage.device().has_property(labels::SCAN_OVERSHOOT),
            expected,
            "scan overshoot at {}",
            version
        );
    }
}

#[tokio::test]
async fn retrace_speed_appears_at_330() {
    let (_wire, old) = xy_stage(3.29, XY_BUILD).await;
    assert!(!old.device().has_property(labels::SCAN_RETRACE_SPEED));
    let (_wire, new) = xy_stage(3.30, XY_BUILD).await;
    assert!(new.device().has_property(labels::SCAN_RETRACE_SPEED));
}

#[tokio::test]
async fn label_round_trips_through_controller() {
    let wire = plogic_wire(3.30);
    let mut card = plogic(wire.clone()).await;
    let label = labels::TRIGGER_SOURCES[4].1;

    card.set_property(labels::TRIGGER_SOURCE, label).await.unwrap();
    assert_eq!(wire.last_command().as_deref(), Some("PM E=4"));

    card.set_property(labels::REFRESH_PROPERTY_VALUES, labels::YES)
        .await
        .unwrap();
    assert_eq!(
        card.get_property(labels::TRIGGER_SOURCE).await.unwrap(),
        PropertyValue::from(label)
    );
}

#[tokio::test]
async fn repeated_write_sends_repeated_command() {
    let (wire, mut stage) = xy_stage(3.30, XY_BUILD).await;
    let name = labels::axis_property(labels::BACKLASH, 'X');
    wire.clear_log();

    stage.set_property(&name, "12").await.unwrap();
    let first = stage.device().cached_text(&name);
    stage.set_property(&name, "12").await.unwrap();

    assert_eq!(wire.commands(), vec!["B X=0.012", "B X=0.012"]);
    assert_eq!(stage.device().cached_text(&name), first);
}

#[tokio::test]
async fn cell_type_outside_pointer_range_sends_nothing() {
    let wire = plogic_wire(3.30);
    let mut card = plogic(wire.clone()).await;
    card.set_property(labels::POINTER_POSITION, "60").await.unwrap();
    wire.clear_log();

    card.set_property(labels::EDIT_CELL_TYPE, labels::CELL_TYPES[1].1)
        .await
        .unwrap();
    assert_eq!(wire.command_count(), 0);
}

#[tokio::test]
async fn negative_preset_leaves_everything_alone() {
    let wire = plogic_wire(3.30);
    let mut card = plogic(wire.clone()).await;
    let before = card.device().cached_text(labels::OUTPUT_STATE);
    wire.clear_log();

    card.set_property(labels::SET_CARD_PRESET, labels::PRESET_NONE)
        .await
        .unwrap();
    assert_eq!(wire.command_count(), 0);
    assert_eq!(card.device().cached_text(labels::OUTPUT_STATE), before);
}

#[tokio::test]
async fn reads_come_from_cache_once_initialized() {
    let (wire, mut stage) = xy_stage(3.30, XY_BUILD).await;
    wire.set_register("SL", 'X', "-5");
    wire.clear_log();

    let name = labels::axis_property(labels::LOWER_LIMIT, 'X');
    assert_eq!(
        stage.get_property(&name).await.unwrap(),
        PropertyValue::Float(0.0)
    );
    assert_eq!(wire.command_count(), 0);

    stage
        .set_property(labels::REFRESH_PROPERTY_VALUES, labels::YES)
        .await
        .unwrap();
    assert_eq!(
        stage.get_property(&name).await.unwrap(),
        PropertyValue::Float(-5.0)
    );
    assert_eq!(wire.commands(), vec!["SL X?"]);
}

#[tokio::test]
async fn failed_read_keeps_cached_value() {
    let (wire, mut stage) = xy_stage(3.30, XY_BUILD).await;
    let name = labels::axis_property(labels::LOWER_LIMIT, 'X');
    stage.set_property(&name, "-5").await.unwrap();
    let before = stage.device().cached_text(&name);
    stage
        .set_property(labels::REFRESH_PROPERTY_VALUES, labels::YES)
        .await
        .unwrap();

    wire.fail_on("SL X?");
    let err = stage.get_property(&name).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Transport);
    assert_eq!(stage.device().cached_text(&name), before);

    wire.clear_failures();
    for garbage in [":A garbage", ":A X=abc", ":N-2"] {
        wire.script("SL X?", garbage);
        let err = stage.get_property(&name).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ProtocolMismatch, "reply {:?}", garbage);
        assert_eq!(stage.device().cached_text(&name), before);
    }

    wire.script("SL X?", ":A X=-7.5");
    assert_eq!(
        stage.get_property(&name).await.unwrap(),
        PropertyValue::Float(-7.5)
    );
}

#[tokio::test]
async fn failed_write_keeps_cached_value() {
    let (wire, mut stage) = xy_stage(3.30, XY_BUILD).await;
    let backlash = labels::axis_property(labels::BACKLASH, 'X');
    stage.set_property(&backlash, "12").await.unwrap();
    let before = stage.device().cached_text(&backlash);

    wire.fail_on("B X=");
    let err = stage.set_property(&backlash, "40").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Transport);
    assert_eq!(stage.device().cached_text(&backlash), before);
    wire.clear_failures();

    wire.script("B X=0.04", ":N-4");
    let err = stage.set_property(&backlash, "40").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ProtocolMismatch);
    assert_eq!(stage.device().cached_text(&backlash), before);

    let maintain = labels::axis_property(labels::MAINTAIN_STATE, 'X');
    let cached = stage.device().cached_text(&maintain);
    wire.clear_log();
    let err = stage.set_property(&maintain, "4 - not a state").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidValue);
    assert_eq!(wire.command_count(), 0);
    assert_eq!(stage.device().cached_text(&maintain), cached);
}

#[tokio::test]
async fn four_channel_shutter_opens_and_closes() {
    let wire = plogic_wire(3.30);
    let config = PLogicConfig::new("shutter", '1', 'E').with_mode(PLogicMode::FourChannelShutter);
    let mut card = PLogic::initialize(&config, wire.clone()).await.unwrap();
    assert!(!card.is_open());
    assert_eq!(wire.register("1CCA", 'X').as_deref(), Some("36"));

    card.set_open(true).await.unwrap();
    assert!(card.is_open());
    assert_eq!(wire.last_command().as_deref(), Some("1CCA X=11"));

    card.set_open(false).await.unwrap();
    assert_eq!(wire.last_command().as_deref(), Some("1CCA X=10"));
}

#[tokio::test]
async fn z_stage_function_generator_round_trip() {
    let wire = MockWire::new()
        .with_card('3', 3.30, "STD_ZF\rAxis Props: 0")
        .shared();
    let mut stage = ZStage::initialize(&ZStageConfig::new("focus", '3', 'Z'), wire.clone())
        .await
        .unwrap();

    stage
        .set_property(labels::SA_PATTERN, labels::SA_PATTERNS[3].1)
        .await
        .unwrap();
    stage
        .set_property(labels::REFRESH_PROPERTY_VALUES, labels::YES)
        .await
        .unwrap();
    assert_eq!(
        stage.get_property(labels::SA_PATTERN).await.unwrap(),
        PropertyValue::from(labels::SA_PATTERNS[3].1)
    );
}

#[tokio::test]
async fn registry_builds_every_kind() {
    let registry = DriverRegistry::new();
    tiger_driver_asi::register_all(&registry);
    let wire = MockWire::new()
        .with_card('1', 3.30, "PLOGIC_16\rAxis Props: 0")
        .with_card('2', 3.30, XY_BUILD)
        .with_card('3', 3.30, "STD_ZF\rAxis Props: 0")
        .with_card('4', 3.30, "STD_PMT\rAxis Props: 0")
        .shared();

    let sections = [
        (
            "plogic",
            toml::toml! {
                id = "logic"
                address = "1"
                axes = ["E"]
            },
        ),
        (
            "xy_stage",
            toml::toml! {
                id = "xy"
                address = "2"
                axes = ["X", "Y"]
            },
        ),
        (
            "z_stage",
            toml::toml! {
                id = "focus"
                address = "3"
                axes = ["Z"]
            },
        ),
        (
            "pmt",
            toml::toml! {
                id = "pmt"
                address = "4"
                axes = ["P"]
                channel = 2
            },
        ),
    ];
    for (kind, section) in sections {
        let device = registry
            .build(kind, toml::Value::Table(section), wire.clone())
            .await
            .unwrap();
        assert!(!device.descriptors().is_empty(), "{} has no properties", kind);
    }

    let missing = toml::Value::Table(toml::toml! {
        id = "xy"
        address = "9"
        axes = ["X", "Y"]
    });
    assert!(registry.build("xy_stage", missing, wire).await.is_err());
}
