//! defmt mirror of the sequencer's telemetry ring.

use defmt::Display2Format;
use power_core::telemetry::{TelemetryRecord, TelemetryRecorder};
use power_core::wake::WakeStats;

/// Logs a single record, tagged with its numeric event code.
pub fn log_record(record: &TelemetryRecord) {
    defmt::info!(
        "telemetry [{=u16:#06x}] {}",
        record.event.to_raw(),
        Display2Format(record)
    );
}

/// Dumps the whole ring, oldest first.
pub fn dump<const CAPACITY: usize>(recorder: &TelemetryRecorder<CAPACITY>) {
    defmt::info!("telemetry: {=usize} records", recorder.len());
    for record in recorder.oldest_first() {
        log_record(record);
    }
}

pub fn log_wake_stats(stats: &WakeStats) {
    defmt::info!(
        "wake edges: accepted={=u32} dropped={=u32} ignored={=u32} last={=u64}us",
        stats.accepted,
        stats.dropped,
        stats.ignored,
        stats.last_accepted_us
    );
}
