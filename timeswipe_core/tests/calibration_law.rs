use proptest::prelude::*;
use timeswipe_core::calibration::{calibrate, corrected};
use timeswipe_core::settings::{SettingsStore, StreamParams};
use timeswipe_core::{AcquisitionCfg, DriverError};

fn store() -> SettingsStore {
    SettingsStore::new(StreamParams::from(&AcquisitionCfg::default()))
}

fn factor() -> impl Strategy<Value = f64> {
    prop_oneof![-1.0e3..-1.0e-3, 1.0e-3..1.0e3]
}

proptest! {
    #[test]
    fn every_channel_follows_offset_gain_transmission(
        raw in prop::array::uniform4(-1.0e6..1.0e6f64),
        offsets in prop::array::uniform4(-1.0e4..1.0e4f64),
        gains in prop::array::uniform4(factor()),
        transmissions in prop::array::uniform4(factor()),
    ) {
        let s = store();
        s.set_offsets(offsets).unwrap();
        s.set_gains(gains).unwrap();
        s.set_transmissions(transmissions).unwrap();
        let out = calibrate(&raw, &s.snapshot()).unwrap();
        for ch in 0..4 {
            let expected = (raw[ch] - offsets[ch]) * gains[ch] * transmissions[ch];
            prop_assert_eq!(out[ch], expected);
            prop_assert!(out[ch].is_finite());
        }
    }

    #[test]
    fn identity_calibration_is_a_no_op(raw in prop::array::uniform4(-1.0e9..1.0e9f64)) {
        let s = store();
        s.set_gains([1.0; 4]).unwrap();
        s.set_transmissions([1.0; 4]).unwrap();
        prop_assert_eq!(calibrate(&raw, &s.snapshot()).unwrap(), raw);
    }
}

#[test]
fn zero_factors_are_rejected_and_leave_state_unchanged() {
    let s = store();
    s.set_gains([2.0; 4]).unwrap();
    let err = s.set_gains([1.0, 0.0, 1.0, 1.0]).unwrap_err();
    assert!(matches!(err, DriverError::InvalidArgument(ref m) if m.contains("Gain[1]")));
    assert_eq!(s.snapshot().gains, Some([2.0; 4]));

    assert!(s.set_transmissions([1.0, 1.0, 1.0, -0.0]).is_err());
    assert!(s.set_transmissions([f64::NAN, 1.0, 1.0, 1.0]).is_err());
    assert!(s.set_offsets([f64::INFINITY, 0.0, 0.0, 0.0]).is_err());
    assert!(s.snapshot().transmissions.is_none());
}

#[test]
fn unset_factors_make_rows_incomplete() {
    let s = store();
    s.set_gains([1.0; 4]).unwrap();
    let err = calibrate(&[1.0; 4], &s.snapshot()).unwrap_err();
    assert!(matches!(err, DriverError::ConfigurationIncomplete(_)));
}

#[test]
fn corrected_is_plain_arithmetic() {
    assert_eq!(corrected(5.0, 1.0, 1.0, 1.0), 4.0);
    assert_eq!(corrected(0.0, 2.0, 3.0, -1.0), 6.0);
}
