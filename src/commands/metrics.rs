use std::sync::{Mutex, OnceLock};
use std::time::Instant;

#[derive(Default)]
struct MetricsState {
    total_commands: u64,
    total_errors: u64,
    total_replies: u64,
}

fn metrics_state() -> &'static Mutex<MetricsState> {
    static METRICS: OnceLock<Mutex<MetricsState>> = OnceLock::new();
    METRICS.get_or_init(|| Mutex::new(MetricsState::default()))
}

fn metrics_start() -> &'static Instant {
    static START: OnceLock<Instant> = OnceLock::new();
    START.get_or_init(Instant::now)
}

pub(crate) fn record_request(success: bool) {
    let mut lock = metrics_state().lock().unwrap();
    lock.total_commands += 1;
    if !success {
        lock.total_errors += 1;
    }
}

pub(crate) fn record_reply() {
    metrics_state().lock().unwrap().total_replies += 1;
}

pub(crate) fn snapshot() -> (u64, u64, u64, u64) {
    let lock = metrics_state().lock().unwrap();
    (
        metrics_start().elapsed().as_secs(),
        lock.total_commands,
        lock.total_errors,
        lock.total_replies,
    )
}
