// Typed access to the circular data area.
// Positions are monotonically increasing logical byte offsets; the physical
// offset is `pos % capacity`. Copies split at the wrap point.

use std::ptr;

/// View over a segment's circular data area.
///
/// Not stored in shared memory; holds a pointer into the mapping.
#[derive(Clone, Copy)]
pub struct RingArea {
    base: *mut u8,
    capacity: u64,
}

unsafe impl Send for RingArea {}
unsafe impl Sync for RingArea {}

impl RingArea {
    /// # Safety
    /// `base` must point to at least `capacity` writable bytes that stay
    /// mapped for the lifetime of this view.
    pub unsafe fn new(base: *mut u8, capacity: u64) -> Self {
        debug_assert!(capacity > 0);
        Self { base, capacity }
    }

    #[inline]
    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    #[inline]
    fn split(&self, pos: u64, len: usize) -> (usize, usize) {
        assert!(len as u64 <= self.capacity, "span larger than ring");
        let offset = (pos % self.capacity) as usize;
        let first = len.min(self.capacity as usize - offset);
        (offset, first)
    }

    /// Copy `src` into the ring starting at logical position `pos`.
    pub fn write(&self, pos: u64, src: &[u8]) {
        let (offset, first) = self.split(pos, src.len());
        unsafe {
            ptr::copy_nonoverlapping(src.as_ptr(), self.base.add(offset), first);
            if first < src.len() {
                ptr::copy_nonoverlapping(src.as_ptr().add(first), self.base, src.len() - first);
            }
        }
    }

    /// Copy bytes starting at logical position `pos` into `dst`.
    pub fn read(&self, pos: u64, dst: &mut [u8]) {
        let (offset, first) = self.split(pos, dst.len());
        let len = dst.len();
        unsafe {
            ptr::copy_nonoverlapping(self.base.add(offset), dst.as_mut_ptr(), first);
            if first < len {
                ptr::copy_nonoverlapping(self.base, dst.as_mut_ptr().add(first), len - first);
            }
        }
    }

    /// Zero `len` bytes starting at logical position `pos`.
    pub fn fill_zero(&self, pos: u64, len: usize) {
        const ZEROS: [u8; 64] = [0u8; 64];
        let mut done = 0;
        while done < len {
            let n = (len - done).min(ZEROS.len()).min(self.capacity as usize);
            self.write(pos + done as u64, &ZEROS[..n]);
            done += n;
        }
    }

    pub fn read_u64(&self, pos: u64) -> u64 {
        let mut buf = [0u8; 8];
        self.read(pos, &mut buf);
        u64::from_le_bytes(buf)
    }

    pub fn read_u32(&self, pos: u64) -> u32 {
        let mut buf = [0u8; 4];
        self.read(pos, &mut buf);
        u32::from_le_bytes(buf)
    }
}

/// Bounds-checked cursor over the span `[pos, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpanCursor {
    pos: u64,
    end: u64,
}

impl SpanCursor {
    pub fn new(start: u64, end: u64) -> Self {
        debug_assert!(start <= end);
        Self { pos: start, end }
    }

    #[inline]
    pub fn position(&self) -> u64 {
        self.pos
    }

    #[inline]
    pub fn end(&self) -> u64 {
        self.end
    }

    #[inline]
    pub fn remaining(&self) -> u64 {
        self.end - self.pos
    }

    /// Claim `len` bytes. Returns the start of the claimed span, or `None`
    /// (leaving the cursor untouched) if the span is exhausted.
    #[inline]
    pub fn advance(&mut self, len: usize) -> Option<u64> {
        let len = len as u64;
        if len > self.remaining() {
            return None;
        }
        let at = self.pos;
        self.pos += len;
        Some(at)
    }

    /// Move the end of the span forward (never backward).
    #[inline]
    pub fn extend_to(&mut self, end: u64) {
        if end > self.end {
            self.end = end;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_read_wraps_at_capacity() {
        let mut backing = vec![0u8; 10];
        let ring = unsafe { RingArea::new(backing.as_mut_ptr(), 10) };

        ring.write(7, &[1, 2, 3, 4, 5]);
        let mut out = [0u8; 5];
        ring.read(7, &mut out);
        assert_eq!(out, [1, 2, 3, 4, 5]);
        assert_eq!(&backing[7..], &[1, 2, 3]);
        assert_eq!(&backing[..2], &[4, 5]);
    }

    #[test]
    fn integers_across_the_wrap() {
        let mut backing = vec![0u8; 12];
        let ring = unsafe { RingArea::new(backing.as_mut_ptr(), 12) };
        ring.write(30, &0xDEAD_BEEF_0BAD_F00Du64.to_le_bytes());
        assert_eq!(ring.read_u64(30), 0xDEAD_BEEF_0BAD_F00D);
        ring.write(11, &7u32.to_le_bytes());
        assert_eq!(ring.read_u32(11), 7);
    }

    #[test]
    fn fill_zero_clears_across_the_wrap() {
        let mut backing = vec![0xAAu8; 100];
        let ring = unsafe { RingArea::new(backing.as_mut_ptr(), 100) };
        ring.fill_zero(90, 80);
        assert!(backing[90..].iter().all(|&b| b == 0));
        assert!(backing[..70].iter().all(|&b| b == 0));
        assert!(backing[70..90].iter().all(|&b| b == 0xAA));
    }

    #[test]
    fn cursor_refuses_overrun() {
        let mut c = SpanCursor::new(100, 108);
        assert_eq!(c.advance(4), Some(100));
        assert_eq!(c.advance(5), None);
        assert_eq!(c.position(), 104);
        c.extend_to(110);
        c.extend_to(90);
        assert_eq!(c.remaining(), 6);
        assert_eq!(c.advance(6), Some(104));
        assert_eq!(c.remaining(), 0);
    }
}
