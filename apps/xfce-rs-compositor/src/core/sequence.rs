use x11rb::connection::SequenceNumber;

/// Initial number of slots in the ignore buffer.
pub const DEFAULT_CAPACITY: usize = 2048;

/// FIFO of request serials whose errors are expected and must be dropped.
///
/// Requests that race a window's destruction (freeing its picture, reading
/// its damage, changing its event mask) are recorded here in the order they
/// are sent. Because the server answers requests in order, an error can only
/// ever match the oldest entry left after every strictly older serial has
/// been discarded.
#[derive(Debug)]
pub struct SequenceGuard {
    slots: Vec<SequenceNumber>,
    head: usize,
    len: usize,
}

impl SequenceGuard {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            slots: vec![0; capacity.max(1)],
            head: 0,
            len: 0,
        }
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.len
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[cfg(test)]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Remember that `serial` may fail without that being a problem.
    pub fn record_expected_failure(&mut self, serial: SequenceNumber) {
        if self.len == self.slots.len() {
            self.grow();
        }
        let tail = (self.head + self.len) % self.slots.len();
        self.slots[tail] = serial;
        self.len += 1;
    }

    /// Drop every recorded serial strictly older than `serial`.
    pub fn discard_older(&mut self, serial: SequenceNumber) {
        while let Some(front) = self.front() {
            if is_newer(serial, front) {
                self.head = (self.head + 1) % self.slots.len();
                self.len -= 1;
            } else {
                break;
            }
        }
    }

    /// True if an error reported for `serial` was expected.
    pub fn is_expected_failure(&mut self, serial: SequenceNumber) -> bool {
        self.discard_older(serial);
        self.front() == Some(serial)
    }

    fn front(&self) -> Option<SequenceNumber> {
        (self.len > 0).then(|| self.slots[self.head])
    }

    // Doubles the buffer. The live entries may wrap past the end of the old
    // buffer, so both spans are copied to the front of the new one in order.
    fn grow(&mut self) {
        let old_capacity = self.slots.len();
        let mut slots = Vec::with_capacity(old_capacity * 2);
        let first_span = (old_capacity - self.head).min(self.len);
        slots.extend_from_slice(&self.slots[self.head..self.head + first_span]);
        slots.extend_from_slice(&self.slots[..self.len - first_span]);
        slots.resize(old_capacity * 2, 0);
        self.slots = slots;
        self.head = 0;
    }
}

impl Default for SequenceGuard {
    fn default() -> Self {
        Self::new()
    }
}

/// Wraparound-safe "a was issued after b".
fn is_newer(a: SequenceNumber, b: SequenceNumber) -> bool {
    (a.wrapping_sub(b) as i64) > 0
}
