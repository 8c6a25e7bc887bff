//! Lock-free ring buffer for capture data
//!
//! Single-producer single-consumer: the server's real-time thread writes,
//! the `capture_samples` caller reads. Both sides are wait-free; the
//! real-time thread must never block.

use std::sync::atomic::{AtomicUsize, Ordering};

/// SPSC ring buffer over f32 samples, capacity rounded up to a power of two.
#[repr(align(64))]
pub struct AudioRingBuffer {
    buffer: Box<[f32]>,
    capacity: usize,
    mask: usize,
    /// Only modified by the producer.
    write_pos: AtomicUsize,
    /// Only modified by the consumer.
    read_pos: AtomicUsize,
}

impl AudioRingBuffer {
    pub fn new(min_capacity: usize) -> Self {
        let capacity = min_capacity.next_power_of_two();
        Self {
            buffer: vec![0.0; capacity].into_boxed_slice(),
            capacity,
            mask: capacity - 1,
            write_pos: AtomicUsize::new(0),
            read_pos: AtomicUsize::new(0),
        }
    }

    /// Space left for writing, in samples.
    #[inline]
    pub fn available_write(&self) -> usize {
        let write = self.write_pos.load(Ordering::Relaxed);
        let read = self.read_pos.load(Ordering::Acquire);
        self.capacity - write.wrapping_sub(read)
    }

    /// Samples ready for reading.
    #[inline]
    pub fn available_read(&self) -> usize {
        let write = self.write_pos.load(Ordering::Acquire);
        let read = self.read_pos.load(Ordering::Relaxed);
        write.wrapping_sub(read)
    }

    /// Push samples (producer side). Returns the number actually written.
    #[inline]
    pub fn push(&self, samples: &[f32]) -> usize {
        let available = self.available_write();
        let to_write = samples.len().min(available);
        if to_write == 0 {
            return 0;
        }

        let write = self.write_pos.load(Ordering::Relaxed);
        for (i, &sample) in samples[..to_write].iter().enumerate() {
            let idx = (write + i) & self.mask;
            // SAFETY: single producer; idx is always in bounds.
            unsafe {
                let ptr = self.buffer.as_ptr() as *mut f32;
                ptr.add(idx).write(sample);
            }
        }

        self.write_pos
            .store(write.wrapping_add(to_write), Ordering::Release);
        to_write
    }

    /// Pop samples (consumer side). Returns the number actually read.
    #[inline]
    pub fn pop(&self, output: &mut [f32]) -> usize {
        let available = self.available_read();
        let to_read = output.len().min(available);
        if to_read == 0 {
            return 0;
        }

        let read = self.read_pos.load(Ordering::Relaxed);
        for (i, sample) in output[..to_read].iter_mut().enumerate() {
            let idx = (read + i) & self.mask;
            *sample = self.buffer[idx];
        }

        self.read_pos
            .store(read.wrapping_add(to_read), Ordering::Release);
        to_read
    }

    /// Discard everything buffered (consumer side).
    pub fn clear(&self) {
        let write = self.write_pos.load(Ordering::Relaxed);
        self.read_pos.store(write, Ordering::Release);
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_pop_basic() {
        let buffer = AudioRingBuffer::new(1024);
        assert_eq!(buffer.capacity(), 1024);
        assert_eq!(buffer.available_read(), 0);

        let samples = [1.0, 2.0, 3.0, 4.0];
        assert_eq!(buffer.push(&samples), 4);
        assert_eq!(buffer.available_read(), 4);

        let mut output = [0.0; 4];
        assert_eq!(buffer.pop(&mut output), 4);
        assert_eq!(output, samples);
        assert_eq!(buffer.available_read(), 0);
    }

    #[test]
    fn test_wraparound() {
        let buffer = AudioRingBuffer::new(8);

        let samples: Vec<f32> = (0..8).map(|i| i as f32).collect();
        buffer.push(&samples);

        let mut output = [0.0; 4];
        buffer.pop(&mut output);

        let more = [10.0, 11.0, 12.0, 13.0];
        assert_eq!(buffer.push(&more), 4);

        let mut all = [0.0; 8];
        assert_eq!(buffer.pop(&mut all), 8);
        assert_eq!(&all[..4], &[4.0, 5.0, 6.0, 7.0]);
        assert_eq!(&all[4..], &[10.0, 11.0, 12.0, 13.0]);
    }

    #[test]
    fn test_full_buffer_drops_excess() {
        let buffer = AudioRingBuffer::new(4);
        let samples = [1.0; 6];
        assert_eq!(buffer.push(&samples), 4);
        assert_eq!(buffer.push(&samples), 0);
    }
}
