use rstest::rstest;
use timeswipe_config::{Backend, load_toml};

#[test]
fn empty_document_uses_defaults_and_validates() {
    let cfg = load_toml("").expect("parse TOML");
    cfg.validate().expect("defaults should pass");
    assert_eq!(cfg.acquisition.sample_rate_hz, 1000);
    assert_eq!(cfg.acquisition.batch_rows, 100);
    assert_eq!(cfg.acquisition.queue_capacity, 8);
    assert_eq!(cfg.hardware.backend, Backend::Sim);
    assert!(cfg.calibration.gains.is_none());
}

#[test]
fn accepts_full_document() {
    let toml = r#"
startup_script = '{"Bridge": 1}'

[acquisition]
sample_rate_hz = 48000
batch_rows = 24000
queue_capacity = 4
settling_ticks = 480
startup_discard_ticks = 1
read_timeout_ms = 2

[button]
poll_ms = 5
debounce_n = 2

[calibration]
bridge = 0
offsets = [0.0, 0.0, 0.0, 0.0]
gains = [1.0, 1.0, 1.0, 1.0]
transmissions = [1.0, 1.0, 1.0, 1.0]

[profiles.NORM]
bridge = 1
offsets = [32768.0, 32768.0, 32768.0, 32768.0]
gains = [0.5, 0.5, 0.5, 0.5]
transmissions = [2.0, 2.0, 2.0, 2.0]

[logging]
rotation = "daily"

[hardware]
backend = "gpio"
"#;
    let cfg = load_toml(toml).expect("parse TOML");
    cfg.validate().expect("valid config should pass");
    assert_eq!(cfg.hardware.backend, Backend::Gpio);
    assert_eq!(cfg.profiles["NORM"].bridge, 1);
}

#[rstest]
#[case("[acquisition]\nsample_rate_hz = 0", "sample_rate_hz must be in")]
#[case("[acquisition]\nsample_rate_hz = 48001", "sample_rate_hz must be in")]
#[case("[acquisition]\nbatch_rows = 0", "batch_rows must be >= 1")]
#[case("[acquisition]\nqueue_capacity = 0", "queue_capacity must be >= 1")]
#[case("[acquisition]\nread_timeout_ms = 0", "read_timeout_ms must be >= 1")]
#[case("[button]\ndebounce_n = 0", "debounce_n must be >= 1")]
#[case("[calibration]\ngains = [1.0, 0.0, 1.0, 1.0]", "calibration.gains[1]")]
#[case(
    "[calibration]\ntransmissions = [1.0, 1.0, 1.0, 0.0]",
    "calibration.transmissions[3]"
)]
#[case("[calibration]\nbridge = 3", "calibration.bridge must be 0 or 1")]
#[case(
    "[profiles.BAD]\nbridge = 0\noffsets = [0.0, 0.0, 0.0, 0.0]\ngains = [0.0, 1.0, 1.0, 1.0]\ntransmissions = [1.0, 1.0, 1.0, 1.0]",
    "profiles.bad.gains[0]"
)]
#[case("startup_script = '[1, 2]'", "startup_script must be a json object")]
#[case("startup_script = '{'", "startup_script is not valid json")]
#[case("[logging]\nrotation = \"weekly\"", "logging.rotation")]
#[case("[hardware.pins]\nclock = 24", "assigned twice")]
fn rejects_invalid_values(#[case] toml: &str, #[case] needle: &str) {
    let cfg = load_toml(toml).expect("parse TOML");
    let err = cfg.validate().expect_err("should be rejected");
    let msg = format!("{err}").to_lowercase();
    assert!(msg.contains(needle), "'{msg}' does not mention '{needle}'");
}

#[test]
fn wrong_channel_count_fails_to_parse() {
    let res = load_toml("[calibration]\ngains = [1.0, 1.0, 1.0]");
    assert!(res.is_err());
}

#[test]
fn profile_selection() {
    let toml = r#"
[calibration]
gains = [2.0, 2.0, 2.0, 2.0]

[profiles.NORM]
bridge = 1
offsets = [1.0, 2.0, 3.0, 4.0]
gains = [1.0, 1.0, 1.0, 1.0]
transmissions = [1.0, 1.0, 1.0, 1.0]
"#;
    let cfg = load_toml(toml).expect("parse TOML");
    let base = cfg.select_calibration(None).unwrap();
    assert_eq!(base.gains, Some([2.0; 4]));
    assert!(base.transmissions.is_none());

    let norm = cfg.select_calibration(Some("NORM")).unwrap();
    assert_eq!(norm.bridge, Some(1));
    assert_eq!(norm.offsets, Some([1.0, 2.0, 3.0, 4.0]));

    let err = cfg.select_calibration(Some("IEPE")).unwrap_err();
    assert!(format!("{err}").contains("known: NORM"));
}
