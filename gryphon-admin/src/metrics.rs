// Process metrics recorder installation. The core transaction and GC
// subsystems emit counters/histograms through the `metrics` facade
// (e.g. `metrics::counter!("gryphon_trx_committed_total")`); this module
// owns installing the one recorder that collects them.

use metrics_util::debugging::{DebugValue, DebuggingRecorder, Snapshotter};

/// Installs a `DebuggingRecorder`, the same harness-friendly recorder
/// used in the metrics crate's own test suites, and returns a
/// `Snapshotter` the admin layer can poll for an eventual export
/// endpoint. Production export (Prometheus push, StatsD, …) is out of
/// scope here; this wires up the in-process collection point the rest
/// of the system already calls into.
pub fn install_debug_recorder() -> Snapshotter {
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();
    recorder.install().expect("metrics recorder already installed");
    snapshotter
}

pub fn format_snapshot(snapshotter: &Snapshotter) -> String {
    let snapshot = snapshotter.snapshot();
    let mut out = String::new();
    for (key, _unit, _description, value) in snapshot.into_vec() {
        let rendered = match value {
            DebugValue::Counter(v) => v.to_string(),
            DebugValue::Gauge(v) => v.into_inner().to_string(),
            DebugValue::Histogram(values) => format!("{} samples", values.len()),
        };
        out.push_str(&format!("{} = {}\n", key.key().name(), rendered));
    }
    out
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn snapshot_reflects_recorded_counters() {
        let snapshotter = install_debug_recorder();
        metrics::counter!("gryphon_test_counter").increment(3);
        let text = format_snapshot(&snapshotter);
        assert!(text.contains("gryphon_test_counter"));
    }
}
