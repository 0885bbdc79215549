use std::time::Duration;

// 125 kbit/s
pub const BIT_MICROS: u64 = 8;
// Extended identifier, CRC, ack and end of frame, some stuffing
pub const FRAME_OVERHEAD_BITS: u64 = 67;
pub const MAX_FRAME_DATA: usize = 8;
// Time from the end of a request until the module starts answering
pub const REPLY_DELAY: Duration = Duration::from_millis(5);

/// Time to transfer a payload, split into as many bus frames as needed
pub fn frame_duration(payload_len: usize) -> Duration {
    let frames = payload_len.div_ceil(MAX_FRAME_DATA).max(1) as u64;
    Duration::from_micros(BIT_MICROS * (frames * FRAME_OVERHEAD_BITS + 8 * payload_len as u64))
}
