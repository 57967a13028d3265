//! Metric capture through a thread-local [`DebuggingRecorder`].

use std::future::Future;

use metrics_util::debugging::{DebugValue, DebuggingRecorder, Snapshot};

/// Run `future` to completion on a fresh current-thread runtime with a
/// local recorder installed, returning its output and the recorded metrics.
///
/// # Panics
///
/// Panics if the runtime cannot be built.
pub fn capture<F: Future>(future: F) -> (F::Output, Snapshot) {
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("build runtime");
    let output = ::metrics::with_local_recorder(&recorder, || runtime.block_on(future));
    (output, snapshotter.snapshot())
}

/// Sum of every counter named `name` carrying `label`, or any labels when
/// `label` is `None`.
#[must_use]
pub fn counter(snapshot: Snapshot, name: &str, label: Option<(&str, &str)>) -> u64 {
    snapshot
        .into_vec()
        .into_iter()
        .filter(|(key, ..)| {
            key.key().name() == name
                && label.is_none_or(|(k, v)| {
                    key.key().labels().any(|l| l.key() == k && l.value() == v)
                })
        })
        .map(|(.., value)| match value {
            DebugValue::Counter(count) => count,
            _ => 0,
        })
        .sum()
}
