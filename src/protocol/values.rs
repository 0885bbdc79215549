//! Unit conversions between controller values and bus values.
//!
//! Controller brightness is 0..=255, device levels are 0..=100 and
//! transitions are carried as a "softdim" byte.

/// Softdim value meaning "switch instantly"
pub const SOFTDIM_INSTANT: u8 = 0xFF;
pub const MAX_DEVICE_LEVEL: u8 = 100;

pub fn to_device_level(controller_level: u8) -> u8 {
    // Integer rounding of x * 100 / 255
    ((controller_level as u32 * 100 + 127) / 255) as u8
}

/// Device level to controller units. Exact halves round to even.
pub fn to_controller_level(device_level: u8) -> u8 {
    let scaled = device_level.min(MAX_DEVICE_LEVEL) as u32 * 255;
    let (q, r) = (scaled / 100, scaled % 100);
    if r > 50 || (r == 50 && q % 2 == 1) {
        (q + 1) as u8
    } else {
        q as u8
    }
}

/// Map a transition time in seconds to a softdim byte.
///
/// One softdim step is taken to be 0.1 s. This scale has not been
/// measured against module timing.
pub fn to_softdim(transition_seconds: Option<f32>) -> u8 {
    match transition_seconds {
        None => SOFTDIM_INSTANT,
        Some(s) => (s * 10.0).round().clamp(0.0, 255.0) as u8,
    }
}
