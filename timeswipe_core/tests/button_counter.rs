use proptest::prelude::*;
use timeswipe_core::button::ButtonTracker;

proptest! {
    #[test]
    fn counter_is_strictly_increasing_and_odd_means_pressed(
        debounce in 1u8..6,
        levels in proptest::collection::vec(any::<bool>(), 0..400),
    ) {
        let mut t = ButtonTracker::new(debounce);
        let mut last = 0u64;
        let mut was_pressed = false;
        for level in levels {
            if let Some(ev) = t.poll(level) {
                prop_assert_eq!(ev.counter, last + 1);
                prop_assert_eq!(ev.pressed, ev.counter % 2 == 1);
                prop_assert_ne!(ev.pressed, was_pressed);
                last = ev.counter;
                was_pressed = ev.pressed;
            }
            prop_assert_eq!(t.counter(), last);
            prop_assert_eq!(t.is_pressed(), was_pressed);
        }
    }

    #[test]
    fn a_level_held_long_enough_is_always_accepted(debounce in 1u8..10, pressed: bool) {
        let mut t = ButtonTracker::new(debounce);
        let mut seen = None;
        for _ in 0..debounce {
            if let Some(ev) = t.poll(pressed) {
                seen = Some(ev);
            }
        }
        prop_assert_eq!(t.is_pressed(), pressed);
        prop_assert_eq!(seen.is_some(), pressed);
    }
}
