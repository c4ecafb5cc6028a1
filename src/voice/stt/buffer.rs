//! FIFO microphone buffer between the socket reader and the STT upstream

use std::collections::VecDeque;

/// Bytes written upstream per frame during a normal flush
pub const FLUSH_INCREMENT: usize = 2048;

/// Microphone bytes waiting to go upstream
///
/// Appends never drop data. Lifetime counters let callers check that
/// `flushed + len == appended` at any point.
#[derive(Debug, Default)]
pub struct MicBuffer {
    queue: VecDeque<u8>,
    appended: u64,
    flushed: u64,
}

impl MicBuffer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, data: &[u8]) {
        self.queue.extend(data);
        self.appended += data.len() as u64;
    }

    /// Take one full increment, if that much is buffered
    pub fn take_increment(&mut self) -> Option<Vec<u8>> {
        if self.queue.len() < FLUSH_INCREMENT {
            return None;
        }
        Some(self.take(FLUSH_INCREMENT))
    }

    /// Take whatever is left, including a partial increment
    pub fn take_remainder(&mut self) -> Option<Vec<u8>> {
        if self.queue.is_empty() {
            return None;
        }
        let n = self.queue.len().min(FLUSH_INCREMENT);
        Some(self.take(n))
    }

    fn take(&mut self, n: usize) -> Vec<u8> {
        let bytes: Vec<u8> = self.queue.drain(..n).collect();
        self.flushed += bytes.len() as u64;
        bytes
    }

    /// Put bytes that failed to send back at the front, preserving order
    pub fn restore(&mut self, bytes: Vec<u8>) {
        self.flushed -= bytes.len() as u64;
        for byte in bytes.into_iter().rev() {
            self.queue.push_front(byte);
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Total bytes ever appended
    #[must_use]
    pub const fn appended(&self) -> u64 {
        self.appended
    }

    /// Total bytes handed to the upstream connection
    #[must_use]
    pub const fn flushed(&self) -> u64 {
        self.flushed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn increments_wait_for_a_full_frame() {
        let mut buf = MicBuffer::new();
        buf.append(&[0; 2000]);
        assert!(buf.take_increment().is_none());

        buf.append(&[0; 100]);
        assert_eq!(buf.take_increment().map(|b| b.len()), Some(FLUSH_INCREMENT));
        assert_eq!(buf.len(), 52);
        assert_eq!(buf.take_remainder().map(|b| b.len()), Some(52));
        assert!(buf.take_remainder().is_none());
    }

    #[test]
    fn restore_keeps_fifo_order() {
        let mut buf = MicBuffer::new();
        buf.append(&[1, 2, 3]);
        buf.append(&[4, 5]);

        let taken = buf.take_remainder().unwrap();
        assert_eq!(taken, vec![1, 2, 3, 4, 5]);
        buf.append(&[6]);
        buf.restore(taken);

        assert_eq!(buf.take_remainder().unwrap(), vec![1, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn counters_account_for_every_byte() {
        let mut buf = MicBuffer::new();
        for _ in 0..7 {
            buf.append(&[0; 700]);
            while buf.take_increment().is_some() {}
        }
        assert_eq!(buf.appended(), 4900);
        assert_eq!(buf.flushed() + buf.len() as u64, buf.appended());

        let tail = buf.take_remainder().unwrap();
        buf.restore(tail);
        assert_eq!(buf.flushed() + buf.len() as u64, buf.appended());
    }
}
