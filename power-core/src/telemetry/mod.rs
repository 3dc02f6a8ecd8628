//! Bounded history of power transitions shared by firmware and host targets.
//!
//! The sequencer appends one record per externally visible step so the
//! firmware can dump the ring over defmt and the emulator can print it at the
//! end of a run. Events encode into compact numeric codes for transport.

use core::{fmt, time::Duration};

use heapless::{HistoryBuf, OldestOrdered};

use crate::clocks::{ClockError, OperatingPoint};
use crate::sequencer::{SleepEnableMask, WakeReason};

/// Canonical timestamp units for telemetry records (microseconds).
pub type TimestampMicros = u64;

/// Monotonic identifier assigned to each record.
pub type EventId = u32;

/// Total number of telemetry entries retained in memory.
pub const TELEMETRY_RING_CAPACITY: usize = 32;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum TelemetryEventKind {
    /// Clock plan started moving towards an operating point.
    PlanStarted(OperatingPoint),
    /// Clock plan finished and the tree matches the operating point.
    PlanCompleted(OperatingPoint),
    /// Clock plan aborted part-way through.
    PlanFailed(OperatingPoint),
    /// Sleep-enable registers narrowed and the core is about to halt.
    SleepEntered,
    /// Execution resumed after the wait-for-interrupt.
    Woke(WakeReason),
    /// Pre-sleep register snapshot written back.
    SnapshotRestored,
}

impl fmt::Display for TelemetryEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TelemetryEventKind::PlanStarted(point) => write!(f, "plan-started {point}"),
            TelemetryEventKind::PlanCompleted(point) => write!(f, "plan-completed {point}"),
            TelemetryEventKind::PlanFailed(point) => write!(f, "plan-failed {point}"),
            TelemetryEventKind::SleepEntered => f.write_str("sleep-entered"),
            TelemetryEventKind::Woke(reason) => write!(f, "woke {reason}"),
            TelemetryEventKind::SnapshotRestored => f.write_str("snapshot-restored"),
        }
    }
}

impl TelemetryEventKind {
    const PLAN_STARTED_BASE: u16 = 0x0000;
    const PLAN_COMPLETED_BASE: u16 = 0x0002;
    const PLAN_FAILED_BASE: u16 = 0x0004;
    const SLEEP_ENTERED_CODE: u16 = 0x0010;
    const WOKE_BASE: u16 = 0x0011;
    const SNAPSHOT_RESTORED_CODE: u16 = 0x0018;

    /// Encodes the event into a compact transport-friendly discriminant.
    #[must_use]
    pub const fn to_raw(self) -> u16 {
        match self {
            TelemetryEventKind::PlanStarted(point) => Self::PLAN_STARTED_BASE + point_index(point),
            TelemetryEventKind::PlanCompleted(point) => {
                Self::PLAN_COMPLETED_BASE + point_index(point)
            }
            TelemetryEventKind::PlanFailed(point) => Self::PLAN_FAILED_BASE + point_index(point),
            TelemetryEventKind::SleepEntered => Self::SLEEP_ENTERED_CODE,
            TelemetryEventKind::Woke(reason) => Self::WOKE_BASE + wake_index(reason),
            TelemetryEventKind::SnapshotRestored => Self::SNAPSHOT_RESTORED_CODE,
        }
    }
}

const fn point_index(point: OperatingPoint) -> u16 {
    match point {
        OperatingPoint::FullSpeed => 0,
        OperatingPoint::ReducedSpeed => 1,
    }
}

const fn wake_index(reason: WakeReason) -> u16 {
    match reason {
        WakeReason::Edge => 0,
        WakeReason::Interrupt => 1,
        WakeReason::Watchdog => 2,
    }
}

/// Payloads carried alongside telemetry events.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum TelemetryPayload {
    None,
    /// SYSTEM frequency after the plan ran and how long it took.
    Clocks { sys_hz: u32, elapsed: Duration },
    /// Mask written (on entry) or restored (on wake).
    Mask(SleepEnableMask),
    Fault(ClockError),
}

/// Telemetry record stored in the ring buffer.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct TelemetryRecord {
    pub id: EventId,
    pub timestamp_us: TimestampMicros,
    pub event: TelemetryEventKind,
    pub details: TelemetryPayload,
}

impl fmt::Display for TelemetryRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{} @{}us {}", self.id, self.timestamp_us, self.event)?;
        match self.details {
            TelemetryPayload::None => Ok(()),
            TelemetryPayload::Clocks { sys_hz, elapsed } => {
                write!(f, " clk_sys={sys_hz}Hz in {}us", elapsed.as_micros())
            }
            TelemetryPayload::Mask(mask) => write!(f, " {mask}"),
            TelemetryPayload::Fault(error) => write!(f, " ({error})"),
        }
    }
}

/// Telemetry ring buffer type alias.
pub type TelemetryRing<const CAPACITY: usize = TELEMETRY_RING_CAPACITY> =
    HistoryBuf<TelemetryRecord, CAPACITY>;

/// Records telemetry events into a fixed-size ring buffer.
pub struct TelemetryRecorder<const CAPACITY: usize = TELEMETRY_RING_CAPACITY> {
    ring: TelemetryRing<CAPACITY>,
    next_event_id: EventId,
}

impl<const CAPACITY: usize> TelemetryRecorder<CAPACITY> {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            ring: HistoryBuf::new(),
            next_event_id: 0,
        }
    }

    /// Returns an iterator over the recorded telemetry in chronological order.
    #[must_use]
    pub fn oldest_first(&self) -> OldestOrdered<'_, TelemetryRecord> {
        self.ring.oldest_ordered()
    }

    #[must_use]
    pub fn latest(&self) -> Option<&TelemetryRecord> {
        self.ring.recent()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.ring.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }

    /// Records the completion of a clock plan that began at `started_at`.
    pub fn record_plan_completed(
        &mut self,
        point: OperatingPoint,
        sys_hz: u32,
        started_at: TimestampMicros,
        timestamp: TimestampMicros,
    ) -> EventId {
        let elapsed = Duration::from_micros(timestamp.saturating_sub(started_at));
        self.record(
            TelemetryEventKind::PlanCompleted(point),
            TelemetryPayload::Clocks { sys_hz, elapsed },
            timestamp,
        )
    }

    /// Records an arbitrary telemetry event with the supplied payload.
    pub fn record(
        &mut self,
        event: TelemetryEventKind,
        payload: TelemetryPayload,
        timestamp: TimestampMicros,
    ) -> EventId {
        let id = self.next_event_id;
        self.next_event_id = self.next_event_id.wrapping_add(1);

        self.ring.write(TelemetryRecord {
            id,
            timestamp_us: timestamp,
            event,
            details: payload,
        });

        id
    }
}

impl<const CAPACITY: usize> Default for TelemetryRecorder<CAPACITY> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plan_completion_carries_elapsed_time() {
        let mut recorder = TelemetryRecorder::<4>::new();
        recorder.record(
            TelemetryEventKind::PlanStarted(OperatingPoint::ReducedSpeed),
            TelemetryPayload::None,
            100,
        );
        let id = recorder.record_plan_completed(OperatingPoint::ReducedSpeed, 12_000_000, 100, 350);
        assert_eq!(id, 1);

        let record = recorder.latest().copied().unwrap();
        assert_eq!(
            record.event,
            TelemetryEventKind::PlanCompleted(OperatingPoint::ReducedSpeed)
        );
        match record.details {
            TelemetryPayload::Clocks { sys_hz, elapsed } => {
                assert_eq!(sys_hz, 12_000_000);
                assert_eq!(elapsed.as_micros(), 250);
            }
            _ => panic!("expected clock payload"),
        }
    }

    #[test]
    fn ring_keeps_the_newest_records() {
        let mut recorder = TelemetryRecorder::<2>::new();
        for timestamp in 0..5 {
            recorder.record(
                TelemetryEventKind::SleepEntered,
                TelemetryPayload::None,
                timestamp,
            );
        }
        assert_eq!(recorder.len(), 2);
        let ids: heapless::Vec<EventId, 2> =
            recorder.oldest_first().map(|record| record.id).collect();
        assert_eq!(ids.as_slice(), &[3, 4]);
    }

    #[test]
    fn codes_are_distinct() {
        let events = [
            TelemetryEventKind::PlanStarted(OperatingPoint::FullSpeed),
            TelemetryEventKind::PlanStarted(OperatingPoint::ReducedSpeed),
            TelemetryEventKind::PlanCompleted(OperatingPoint::FullSpeed),
            TelemetryEventKind::PlanCompleted(OperatingPoint::ReducedSpeed),
            TelemetryEventKind::PlanFailed(OperatingPoint::FullSpeed),
            TelemetryEventKind::PlanFailed(OperatingPoint::ReducedSpeed),
            TelemetryEventKind::SleepEntered,
            TelemetryEventKind::Woke(WakeReason::Edge),
            TelemetryEventKind::Woke(WakeReason::Interrupt),
            TelemetryEventKind::Woke(WakeReason::Watchdog),
            TelemetryEventKind::SnapshotRestored,
        ];
        for (i, a) in events.iter().enumerate() {
            for b in &events[i + 1..] {
                assert_ne!(a.to_raw(), b.to_raw(), "{a} and {b} collide");
            }
        }
    }
}
