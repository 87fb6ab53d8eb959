//! Sliding PCM window: a ring buffer over interleaved PCM16 with
//! overwrite-on-overflow semantics (spec §2, §5 "capture window overwrites
//! oldest samples when the mixer is slow").

use parking_lot::Mutex;

struct RingBuffer {
    buf: Vec<i16>,
    write_pos: usize,
    len: usize,
}

impl RingBuffer {
    fn new(capacity: usize) -> Self {
        Self { buf: vec![0i16; capacity.max(1)], write_pos: 0, len: 0 }
    }

    fn capacity(&self) -> usize {
        self.buf.len()
    }

    fn push_slice(&mut self, samples: &[i16]) {
        let cap = self.capacity();
        for &s in samples {
            self.buf[self.write_pos] = s;
            self.write_pos = (self.write_pos + 1) % cap;
            if self.len < cap {
                self.len += 1;
            }
        }
    }

    /// Drains up to `count` of the oldest still-buffered samples, oldest
    /// first, and removes them from the window.
    fn drain(&mut self, count: usize) -> Vec<i16> {
        let take = count.min(self.len);
        let cap = self.capacity();
        let start = (self.write_pos + cap - self.len) % cap;
        let mut out = Vec::with_capacity(take);
        for i in 0..take {
            out.push(self.buf[(start + i) % cap]);
        }
        self.len -= take;
        out
    }

    fn available(&self) -> usize {
        self.len
    }
}

/// Thread-safe capture/jitter window. One instance per audio direction per
/// stream; microphone capture and jitter-buffer output both use this shape.
pub struct SlidingPcmWindow {
    inner: Mutex<RingBuffer>,
}

impl SlidingPcmWindow {
    pub fn new(capacity_samples: usize) -> Self {
        Self { inner: Mutex::new(RingBuffer::new(capacity_samples)) }
    }

    pub fn push(&self, samples: &[i16]) {
        self.inner.lock().push_slice(samples);
    }

    pub fn pop(&self, count: usize) -> Vec<i16> {
        self.inner.lock().drain(count)
    }

    pub fn available(&self) -> usize {
        self.inner.lock().available()
    }

    pub fn capacity(&self) -> usize {
        self.inner.lock().capacity()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pop_returns_samples_in_push_order() {
        let window = SlidingPcmWindow::new(16);
        window.push(&[1, 2, 3, 4]);
        assert_eq!(window.pop(4), vec![1, 2, 3, 4]);
    }

    #[test]
    fn overflow_overwrites_oldest_samples() {
        let window = SlidingPcmWindow::new(4);
        window.push(&[1, 2, 3, 4]);
        window.push(&[5, 6]);
        // capacity 4: after pushing 6 samples total, only the newest 4 survive
        assert_eq!(window.pop(4), vec![3, 4, 5, 6]);
    }

    #[test]
    fn partial_pop_leaves_remainder_available() {
        let window = SlidingPcmWindow::new(8);
        window.push(&[1, 2, 3, 4]);
        assert_eq!(window.pop(2), vec![1, 2]);
        assert_eq!(window.available(), 2);
        assert_eq!(window.pop(10), vec![3, 4]);
    }
}
