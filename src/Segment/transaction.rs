// Two-phase write: reserve -> push fields -> finish (publish).

use super::backoff::Spin;
use super::cursor::SpanCursor;
use super::layout::{RECORD_HEADER_SIZE, VAR_LEN_SIZE};
use super::Segment::RingSegment;
use crate::error::TransportError;
use crate::Schema::registry::EventDeclaration;

/// A reserved but not yet published record.
///
/// Fixed fields are written into the span right after the record header
/// (`push_fixed`); variable fields go after the fixed portion, each as a
/// little-endian `u32` length followed by the bytes (`push_variable`).
/// Nothing is visible to the monitor until [`finish`](Self::finish).
/// Dropping an unfinished transaction discards it.
pub struct WriteTransaction<'a> {
    segment: &'a RingSegment,
    reservation_start: u64,
    fixed: SpanCursor,
    var_cursor: u64,
    vars_left: usize,
    limit: u64,
    event_id: u64,
    overflowed: bool,
    done: bool,
}

impl<'a> WriteTransaction<'a> {
    pub(crate) fn new(
        segment: &'a RingSegment,
        event: &EventDeclaration,
        start: u64,
        event_id: u64,
        limit: u64,
    ) -> Self {
        let fixed_start = start + RECORD_HEADER_SIZE as u64;
        let fixed_end = fixed_start + event.computed_size as u64;
        Self {
            segment,
            reservation_start: start,
            fixed: SpanCursor::new(fixed_start, fixed_end),
            var_cursor: fixed_end,
            vars_left: event.signature.variable_count(),
            limit,
            event_id,
            overflowed: false,
            done: false,
        }
    }

    /// Id this record will carry once published.
    #[inline]
    pub fn event_id(&self) -> u64 {
        self.event_id
    }

    #[inline]
    pub fn reservation_start(&self) -> u64 {
        self.reservation_start
    }

    /// Variable fields the signature still expects.
    #[inline]
    pub fn remaining_variable_fields(&self) -> usize {
        self.vars_left
    }

    /// Record length so far: header, fixed portion and pushed variable
    /// fields.
    #[inline]
    pub fn reserved_len(&self) -> u64 {
        self.var_cursor - self.reservation_start
    }

    /// Copy a fixed-size field at the current fixed cursor.
    ///
    /// Space for the declared fixed portion was reserved up front, so this
    /// never waits. Pushing past the declared size writes nothing and makes
    /// `finish` fail with `SignatureMismatch`.
    #[inline]
    pub fn push_fixed(&mut self, bytes: &[u8]) -> &mut Self {
        match self.fixed.advance(bytes.len()) {
            Some(at) => self.segment.ring.write(at, bytes),
            None => self.overflowed = true,
        }
        self
    }

    #[inline]
    pub fn push_u64(&mut self, v: u64) -> &mut Self {
        self.push_fixed(&v.to_le_bytes())
    }

    #[inline]
    pub fn push_i64(&mut self, v: i64) -> &mut Self {
        self.push_fixed(&v.to_le_bytes())
    }

    #[inline]
    pub fn push_i32(&mut self, v: i32) -> &mut Self {
        self.push_fixed(&v.to_le_bytes())
    }

    #[inline]
    pub fn push_f64(&mut self, v: f64) -> &mut Self {
        self.push_fixed(&v.to_le_bytes())
    }

    #[inline]
    pub fn push_ptr(&mut self, v: usize) -> &mut Self {
        self.push_fixed(&v.to_le_bytes())
    }

    /// Append a variable-length field (string, line, match).
    ///
    /// The bytes are framed inside this record, so they belong to record
    /// [`event_id`](Self::event_id) without any out-of-band correlation.
    /// Waits for the monitor to free space if needed, with the same liveness
    /// checks as reservation.
    pub fn push_variable(&mut self, data: &[u8]) -> Result<&mut Self, TransportError> {
        if self.vars_left == 0 {
            return Err(TransportError::SignatureMismatch {
                reason: "more variable fields than declared",
            });
        }

        let capacity = self.segment.ring.capacity();
        // Length words of the remaining variable fields are already part of
        // the reservation; only the payload bytes are new.
        let end = self.var_cursor
            + (VAR_LEN_SIZE + data.len()) as u64
            + (VAR_LEN_SIZE * (self.vars_left - 1)) as u64;
        if data.len() > u32::MAX as usize || end - self.reservation_start > capacity {
            return Err(TransportError::RecordTooLarge {
                len: (end - self.reservation_start) as usize,
                capacity: capacity as usize,
            });
        }

        if end > self.limit {
            self.limit = self.segment.write_limit();
            let mut spin = Spin::new(self.segment);
            while end > self.limit {
                if self.segment.is_destroyed() {
                    return Err(TransportError::MonitorGone);
                }
                spin.pause()?;
                self.limit = self.segment.write_limit();
            }
        }

        let ring = &self.segment.ring;
        ring.write(self.var_cursor, &(data.len() as u32).to_le_bytes());
        ring.write(self.var_cursor + VAR_LEN_SIZE as u64, data);
        self.var_cursor += (VAR_LEN_SIZE + data.len()) as u64;
        self.vars_left -= 1;
        Ok(self)
    }

    #[inline]
    pub fn push_str(&mut self, s: &str) -> Result<&mut Self, TransportError> {
        self.push_variable(s.as_bytes())
    }

    /// Publish the record and return its id.
    ///
    /// Unfilled fixed bytes are zeroed and missing variable fields are
    /// published as empty. If the segment was destroyed meanwhile nothing
    /// is published and `MonitorGone` is returned.
    pub fn finish(mut self) -> Result<u64, TransportError> {
        self.done = true;
        let segment = self.segment;

        if self.overflowed {
            segment.release_writer();
            return Err(TransportError::SignatureMismatch {
                reason: "fixed fields exceed the declared signature",
            });
        }

        let ring = &segment.ring;
        let rest = self.fixed.remaining() as usize;
        if rest > 0 {
            if let Some(at) = self.fixed.advance(rest) {
                ring.fill_zero(at, rest);
            }
        }
        for _ in 0..self.vars_left {
            ring.write(self.var_cursor, &0u32.to_le_bytes());
            self.var_cursor += VAR_LEN_SIZE as u64;
        }

        if segment.is_destroyed() {
            segment.release_writer();
            return Err(TransportError::MonitorGone);
        }

        segment.publish(self.var_cursor, self.event_id);
        segment.release_writer();
        Ok(self.event_id)
    }
}

impl Drop for WriteTransaction<'_> {
    fn drop(&mut self) {
        if !self.done {
            self.segment.release_writer();
        }
    }
}
