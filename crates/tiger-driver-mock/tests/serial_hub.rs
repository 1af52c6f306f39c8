//! SerialHub against the mock serial line.

use std::time::Duration;
use tiger_core::capability::FirmwareVersion;
use tiger_core::error::{ErrorKind, TigerError};
use tiger_core::serial::{wrap_shared, SerialHub};
use tiger_core::wire::WireAdapter;
use tiger_driver_mock::mock_serial;

#[tokio::test]
async fn card_identity_over_serial() {
    let (port, mut harness) = mock_serial::new();
    let hub = SerialHub::new(wrap_shared(Box::new(port)));

    let host = tokio::spawn(async move { hub.card_identity('2').await });

    harness
        .expect_and_reply("2V", ":A Version: USB-9.2p v3.30")
        .await
        .unwrap();
    harness
        .expect_and_reply(
            "2BU X",
            "TIGER_COMM\rMotor Axes: X Y\rAxis Props:   7   7\rRING BUFFER 250\rIN0_INT\rSPEED TRUTH",
        )
        .await
        .unwrap();

    let identity = host.await.unwrap().unwrap();
    assert_eq!(identity.version, FirmwareVersion::new(3.30));
    assert_eq!(identity.build.axis_props, vec![7, 7]);
    assert!(identity.build.has_define("SPEED TRUTH"));
    assert_eq!(identity.build.define_value("RING BUFFER"), Some("250"));
}

#[tokio::test]
async fn commands_are_serialized_on_the_shared_line() {
    let (port, mut harness) = mock_serial::new();
    let hub = SerialHub::new(wrap_shared(Box::new(port)));
    let other = hub.clone();

    let first = tokio::spawn(async move { hub.send_and_verify("W X", ":A").await });
    let command = harness.next_command().await.unwrap();
    let second = tokio::spawn(async move { other.send_and_verify("W Y", ":A").await });

    // Only one command may be on the line until it is answered.
    tokio::time::sleep(Duration::from_millis(20)).await;
    harness.reply(":A 100").unwrap();
    let next = harness.next_command().await.unwrap();
    harness.reply(":A 200").unwrap();

    let mut seen = vec![command, next];
    seen.sort();
    assert_eq!(seen, vec!["W X", "W Y"]);
    assert!(first.await.unwrap().is_ok());
    assert!(second.await.unwrap().is_ok());
}

#[tokio::test]
async fn controller_error_and_timeout() {
    let (port, mut harness) = mock_serial::new();
    let hub = SerialHub::with_timeout(wrap_shared(Box::new(port)), Duration::from_millis(50));

    let rejected = {
        let hub = hub.clone();
        tokio::spawn(async move { hub.send_and_verify("2CCA X=99", ":A").await })
    };
    harness.expect_and_reply("2CCA X=99", ":N-4").await.unwrap();
    let err = rejected.await.unwrap().unwrap_err();
    assert!(matches!(err, TigerError::ControllerError { ref code, .. } if code == "-4"));
    assert_eq!(err.kind(), ErrorKind::ProtocolMismatch);

    let silent = tokio::spawn(async move { hub.send("2RA Z?").await });
    harness.expect("2RA Z?").await.unwrap();
    let err = silent.await.unwrap().unwrap_err();
    assert!(matches!(err, TigerError::Timeout { .. }));
}
