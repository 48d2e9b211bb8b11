use tracing::debug;

/// Number of outstanding request/response cycles per session.
pub const SLOT_COUNT: usize = 2;

/// Modbus-RTU header (slave, function, byte count) plus CRC, in bytes.
const RTU_OVERHEAD: usize = 5;

/// Accumulates notification fragments into one hex slot per outstanding request.
///
/// The active slot advances once per completed write, so slot order follows
/// command order: slot 0 answers the first command, slot 1 the second.
#[derive(Debug, Default, Clone)]
pub struct FrameSlots {
    slots: [String; SLOT_COUNT],
    active: usize,
}

impl FrameSlots {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn active(&self) -> usize {
        self.active
    }

    /// Appends a fragment to the active slot as lowercase hex.
    pub fn append(&mut self, fragment: &[u8]) {
        let encoded = hex::encode(fragment);
        debug!(slot = self.active, fragment = %encoded, "notification fragment");
        self.slots[self.active].push_str(&encoded);
    }

    pub fn advance(&mut self) {
        self.active = (self.active + 1) % SLOT_COUNT;
    }

    pub fn slot(&self, index: usize) -> &str {
        &self.slots[index]
    }

    /// True once the active slot holds as many bytes as its RTU header announces.
    pub fn active_complete(&self) -> bool {
        expected_hex_len(&self.slots[self.active])
            .is_some_and(|expected| self.slots[self.active].len() >= expected)
    }

    /// Returns both slots in command order and resets the aggregator.
    pub fn take(&mut self) -> [String; SLOT_COUNT] {
        self.active = 0;
        std::mem::take(&mut self.slots)
    }

    pub fn clear(&mut self) {
        self.take();
    }
}

fn expected_hex_len(frame: &str) -> Option<usize> {
    let byte_count = frame.get(4..6)?;
    let byte_count = usize::from_str_radix(byte_count, 16).ok()?;
    Some((byte_count + RTU_OVERHEAD) * 2)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expected_length_follows_byte_count() {
        assert_eq!(expected_hex_len("01033a"), Some(126));
        assert_eq!(expected_hex_len("010340"), Some(138));
        assert_eq!(expected_hex_len("0103"), None);
        assert_eq!(expected_hex_len("0103zz"), None);
    }
}
