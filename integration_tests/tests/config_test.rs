use assertables::assert_contains;
use integration_tests::sim_adapter::frame_recorder;
use tugboat_canbus::{AnyChannel, Channel, ChannelConfig, ChannelError, SerialChannelError};

#[test]
fn test_load_config_file() {
    let path = std::env::temp_dir().join(format!("tugboat_canbus_{}.toml", std::process::id()));
    std::fs::write(
        &path,
        r#"
        type = "usbcan"
        port_name = "/dev/ttyUSB3"
        bit_rate = 125000
        "#,
    )
    .unwrap();

    let config = ChannelConfig::load_from_file(&path).unwrap();
    std::fs::remove_file(&path).unwrap();
    let ChannelConfig::Usbcan(options) = config else {
        panic!("Expected a USB-CAN configuration");
    };
    assert_eq!("/dev/ttyUSB3", options.port_name);
    assert_eq!(125_000, options.bit_rate);
    assert_eq!(2_000_000, options.serial_baud_rate);
}

#[test]
fn test_load_missing_file() {
    let err = ChannelConfig::load_from_file("/nonexistent/tugboat.toml").unwrap_err();
    assert_contains!(err.to_string(), "/nonexistent/tugboat.toml");
}

#[tokio::test]
async fn test_channel_from_config() {
    let config = ChannelConfig::load_from_str(
        r#"
        type = "usbcan"
        port_name = "/nonexistent/ttyUSB0"
        "#,
    )
    .unwrap();
    let (handler, _frames) = frame_recorder();
    let channel = AnyChannel::from_config(config, handler).unwrap();
    assert!(matches!(channel, AnyChannel::Serial(_)));

    let err = channel.run().await.unwrap_err();
    assert!(matches!(
        err,
        ChannelError::Serial {
            source: SerialChannelError::Open { .. }
        }
    ));
    assert_contains!(err.to_string(), "/nonexistent/ttyUSB0");
}
