//! Configuration file to opened devices, against the in-memory controller.

use serial_test::serial;
use std::io::Write;
use tiger_daq::config::TigerConfig;
use tiger_daq::session::{validate_devices, Session};
use tiger_driver_mock::MockWire;

const RIG: &str = r#"
[serial]
port = "/dev/ttyUSB0"

[[devices]]
id = "shutter"
kind = "plogic"
address = "1"
axes = ["E"]
mode = "four_channel_shutter"

[[devices]]
id = "stage"
kind = "xy_stage"
address = "2"
axes = ["X", "Y"]

[[devices]]
id = "pmt"
kind = "pmt"
address = "4"
axes = ["P"]
channel = 2
"#;

fn rig_file() -> tempfile::NamedTempFile {
    let mut file = tempfile::Builder::new()
        .suffix(".toml")
        .tempfile()
        .unwrap();
    file.write_all(RIG.as_bytes()).unwrap();
    file
}

fn controller() -> std::sync::Arc<MockWire> {
    MockWire::new()
        .with_card('1', 3.30, "PLOGIC_24\rAxis Props: 0")
        .with_card('2', 3.30, "STD_XY\rAxis Props: 7 7\rRING BUFFER 250\rIN0_INT")
        .with_card('4', 3.30, "STD_PMT\rAxis Props: 0")
        .shared()
}

#[tokio::test]
#[serial]
async fn rig_opens_and_answers_by_name() {
    let file = rig_file();
    let config = TigerConfig::load_from(file.path()).unwrap();
    config.validate().unwrap();
    validate_devices(&config).unwrap();

    let wire = controller();
    let mut session = Session::open(&config, wire.clone()).await.unwrap();
    assert_eq!(session.ids().collect::<Vec<_>>(), vec!["pmt", "shutter", "stage"]);

    assert_eq!(
        session.get("stage", "Description").await.unwrap(),
        "ASI XY Stage Xaxis=X Yaxis=Y HexAddr=2"
    );

    session.set("shutter", "SetCardPreset", "11 - cell 8 high").await.unwrap();
    assert_eq!(wire.last_command().as_deref(), Some("1CCA X=11"));

    session.set("pmt", "PMTGain", "250").await.unwrap();
    assert_eq!(wire.last_command().as_deref(), Some("4WRDAC Y=250"));
}

#[tokio::test]
#[serial]
async fn missing_card_fails_the_session() {
    let file = rig_file();
    let config = TigerConfig::load_from(file.path()).unwrap();
    let wire = MockWire::new()
        .with_card('1', 3.30, "PLOGIC_24\rAxis Props: 0")
        .shared();
    let err = Session::open(&config, wire).await.err().unwrap();
    assert!(format!("{:#}", err).contains("stage"));
}

#[test]
#[serial]
fn environment_overrides_only_the_named_key() {
    let file = rig_file();
    std::env::set_var("TIGER_DAQ_SERIAL__BAUD_RATE", "9600");
    let config = TigerConfig::load_from(file.path());
    std::env::remove_var("TIGER_DAQ_SERIAL__BAUD_RATE");

    let config = config.unwrap();
    assert_eq!(config.serial.baud_rate, 9600);
    assert_eq!(config.serial.port, "/dev/ttyUSB0");
    assert_eq!(config.devices.len(), 3);
}
