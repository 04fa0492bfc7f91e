use super::Segment::RingSegment;
use crate::error::TransportError;

/// Counted busy-wait on one segment.
///
/// Every `check_interval` retries the monitor's liveness is re-checked, so a
/// dead monitor ends the wait instead of spinning forever. Retries are added
/// to the segment's wait counter when the spin is dropped.
pub(crate) struct Spin<'a> {
    segment: &'a RingSegment,
    spins: u64,
    since_check: u32,
}

impl<'a> Spin<'a> {
    pub(crate) fn new(segment: &'a RingSegment) -> Self {
        Self {
            segment,
            spins: 0,
            since_check: 0,
        }
    }

    /// Account one failed attempt. Errors when the monitor is gone or the
    /// retry cap is reached.
    pub(crate) fn pause(&mut self) -> Result<(), TransportError> {
        let policy = self.segment.policy;
        self.spins += 1;
        self.since_check += 1;

        if self.since_check >= policy.check_interval.max(1) {
            self.since_check = 0;
            if self.segment.monitor_gone() {
                tracing::warn!(
                    segment = %self.segment.name(),
                    spins = self.spins,
                    "monitor gone while waiting for buffer space"
                );
                return Err(TransportError::MonitorGone);
            }
        }

        if let Some(max) = policy.max_retries {
            if self.spins >= max {
                return Err(TransportError::RetryLimit(self.spins));
            }
        }

        std::hint::spin_loop();
        Ok(())
    }
}

impl Drop for Spin<'_> {
    fn drop(&mut self) {
        if self.spins > 0 {
            self.segment.record_waits(self.spins);
        }
    }
}
