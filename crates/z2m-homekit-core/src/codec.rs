// ── Value codec ──
//
// Pure conversions between the zigbee2mqtt bus encoding, the HomeKit
// protocol encoding, and percentages. No state, no I/O.

/// Upper bound of the bus brightness scale.
pub const BUS_BRIGHTNESS_MAX: i32 = 254;

/// Upper bound of the protocol (percent) brightness scale.
pub const PERCENT_MAX: i32 = 100;

/// Protocol-valid color temperature range, in mireds.
pub const COLOR_TEMP_MIN: i32 = 140;
pub const COLOR_TEMP_MAX: i32 = 500;

const POWER_ON: &str = "ON";
const POWER_OFF: &str = "OFF";

/// Bus brightness (0–254) to percent (0–100), truncating.
pub fn bus_brightness_to_percent(value: i32) -> i32 {
    if value <= 0 {
        return 0;
    }
    if value >= BUS_BRIGHTNESS_MAX {
        return PERCENT_MAX;
    }
    value * PERCENT_MAX / BUS_BRIGHTNESS_MAX
}

/// Percent brightness (0–100) to bus scale (0–254), truncating.
///
/// Lossy: `bus_brightness_to_percent(percent_brightness_to_bus(p))`
/// stays within one step of `p`, not equal to it.
pub fn percent_brightness_to_bus(value: i32) -> i32 {
    if value <= 0 {
        return 0;
    }
    if value >= PERCENT_MAX {
        return BUS_BRIGHTNESS_MAX;
    }
    value * BUS_BRIGHTNESS_MAX / PERCENT_MAX
}

/// Saturate a color temperature to the protocol range.
pub fn clamp_color_temperature(mireds: i32) -> i32 {
    mireds.clamp(COLOR_TEMP_MIN, COLOR_TEMP_MAX)
}

pub fn bool_to_power_word(on: bool) -> &'static str {
    if on { POWER_ON } else { POWER_OFF }
}

/// Case-sensitive: only `"ON"` decodes to `true`. Anything else is off.
pub fn power_word_to_bool(word: &str) -> bool {
    word == POWER_ON
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn bus_to_percent_bounds() {
        assert_eq!(bus_brightness_to_percent(-10), 0);
        assert_eq!(bus_brightness_to_percent(0), 0);
        assert_eq!(bus_brightness_to_percent(127), 50);
        assert_eq!(bus_brightness_to_percent(254), 100);
        assert_eq!(bus_brightness_to_percent(255), 100);
        assert_eq!(bus_brightness_to_percent(i32::MAX), 100);

        for v in 0..=254 {
            let p = bus_brightness_to_percent(v);
            assert!((0..=100).contains(&p), "{v} -> {p}");
        }
    }

    #[test]
    fn percent_to_bus_bounds() {
        assert_eq!(percent_brightness_to_bus(-1), 0);
        assert_eq!(percent_brightness_to_bus(0), 0);
        assert_eq!(percent_brightness_to_bus(50), 127);
        assert_eq!(percent_brightness_to_bus(75), 190);
        assert_eq!(percent_brightness_to_bus(100), 254);
        assert_eq!(percent_brightness_to_bus(150), 254);
    }

    #[test]
    fn brightness_round_trip_within_one_step() {
        for p in 0..=100 {
            let back = bus_brightness_to_percent(percent_brightness_to_bus(p));
            assert!((back - p).abs() <= 1, "{p} -> {back}");
        }
    }

    #[test]
    fn color_temperature_clamps() {
        assert_eq!(clamp_color_temperature(i32::MIN), 140);
        assert_eq!(clamp_color_temperature(100), 140);
        assert_eq!(clamp_color_temperature(600), 500);
        assert_eq!(clamp_color_temperature(i32::MAX), 500);
        for v in 140..=500 {
            assert_eq!(clamp_color_temperature(v), v);
        }
    }

    #[test]
    fn power_words() {
        assert_eq!(bool_to_power_word(true), "ON");
        assert_eq!(bool_to_power_word(false), "OFF");
        assert!(power_word_to_bool("ON"));
        assert!(!power_word_to_bool("OFF"));
        assert!(!power_word_to_bool("on"));
        assert!(!power_word_to_bool("TOGGLE"));
        assert!(!power_word_to_bool(""));
    }
}
