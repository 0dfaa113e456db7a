//! Utilization metric for the activity.
//!
//! The worker publishes `ActivityActivePercent` (namespace `StatesCustom`,
//! dimension `ActivityArn`): the percentage of each reporting window spent
//! working on a task. Time spent blocked on the poll rate limiter is marked
//! paused and excluded from the window entirely, so an idle worker reports
//! ~0 rather than being diluted by limiter waits.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::coordinator::CoordinatorError;

pub const METRIC_ACTIVITY_ACTIVE_PERCENT: &str = "ActivityActivePercent";
pub const METRIC_NAMESPACE: &str = "StatesCustom";

/// Where utilization data points go.
#[async_trait]
pub trait MetricsSink: Send + Sync {
    async fn put_active_percent(
        &self,
        activity_arn: &str,
        percent: f64,
    ) -> Result<(), CoordinatorError>;
}

struct UtilizationState {
    active: bool,
    paused: bool,
    active_time: Duration,
    paused_time: Duration,
    last_report: Instant,
    last_transition: Instant,
}

impl UtilizationState {
    /// Close the interval since the last transition, attributing it to the
    /// paused or active accumulator. Paused wins: a paused worker is neither
    /// active nor idle.
    fn close_interval(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_transition);
        if self.paused {
            self.paused_time += elapsed;
        } else if self.active {
            self.active_time += elapsed;
        }
        self.last_transition = now;
    }
}

/// Tracks the time-weighted active fraction and flushes it on an interval.
///
/// Shared between the poll loop (state changes) and its own reporting loop;
/// all state sits behind one mutex.
#[derive(Clone)]
pub struct UtilizationReporter {
    sink: Arc<dyn MetricsSink>,
    activity_arn: String,
    state: Arc<Mutex<UtilizationState>>,
}

impl UtilizationReporter {
    pub fn new(sink: Arc<dyn MetricsSink>, activity_arn: String) -> Self {
        let now = Instant::now();
        Self {
            sink,
            activity_arn,
            state: Arc::new(Mutex::new(UtilizationState {
                active: false,
                paused: false,
                active_time: Duration::ZERO,
                paused_time: Duration::ZERO,
                last_report: now,
                last_transition: now,
            })),
        }
    }

    /// Mark the worker as working on a task (or not).
    pub fn set_active(&self, active: bool) {
        let mut state = self.state.lock().expect("utilization state poisoned");
        if state.active == active {
            return;
        }
        state.close_interval(Instant::now());
        state.active = active;
    }

    /// Mark the worker as blocked on the poll rate limiter (or not).
    pub fn set_paused(&self, paused: bool) {
        let mut state = self.state.lock().expect("utilization state poisoned");
        if state.paused == paused {
            return;
        }
        state.close_interval(Instant::now());
        state.paused = paused;
    }

    /// Report on `interval` until `shutdown` fires.
    pub async fn run(self, shutdown: CancellationToken, interval: Duration) {
        let mut ticker = tokio::time::interval(interval);
        // The immediate first tick would report an empty window.
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => return,
                _ = ticker.tick() => self.report(),
            }
        }
    }

    /// Close the current window, enqueue the data point, reset accumulators.
    fn report(&self) {
        let percent = {
            let mut state = self.state.lock().expect("utilization state poisoned");
            let now = Instant::now();
            state.close_interval(now);
            let window = now.saturating_duration_since(state.last_report);
            let counted = window.saturating_sub(state.paused_time);
            let percent = if counted.is_zero() {
                0.0
            } else {
                100.0 * state.active_time.as_secs_f64() / counted.as_secs_f64()
            };
            state.active_time = Duration::ZERO;
            state.paused_time = Duration::ZERO;
            state.last_report = now;
            percent.clamp(0.0, 100.0)
        };

        // Fire and forget the data point.
        let sink = self.sink.clone();
        let arn = self.activity_arn.clone();
        tokio::spawn(async move {
            tracing::trace!(activity_arn = %arn, percent, "put-metric-data");
            if let Err(e) = sink.put_active_percent(&arn, percent).await {
                tracing::error!(error = %e, "put-metric-data failed");
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    struct RecordingSink {
        values: StdMutex<Vec<f64>>,
    }

    #[async_trait]
    impl MetricsSink for RecordingSink {
        async fn put_active_percent(
            &self,
            _activity_arn: &str,
            percent: f64,
        ) -> Result<(), CoordinatorError> {
            self.values.lock().unwrap().push(percent);
            Ok(())
        }
    }

    fn reporter() -> (UtilizationReporter, Arc<RecordingSink>) {
        let sink = Arc::new(RecordingSink {
            values: StdMutex::new(Vec::new()),
        });
        let reporter = UtilizationReporter::new(sink.clone(), "arn:mock".to_string());
        (reporter, sink)
    }

    #[tokio::test(start_paused = true)]
    async fn reports_zero_when_never_active() {
        let (reporter, sink) = reporter();
        tokio::time::advance(Duration::from_secs(60)).await;
        reporter.report();
        tokio::task::yield_now().await;
        assert_eq!(sink.values.lock().unwrap().as_slice(), &[0.0]);
    }

    #[tokio::test(start_paused = true)]
    async fn reports_fifty_percent_for_half_active_window() {
        let (reporter, sink) = reporter();
        tokio::time::advance(Duration::from_secs(30)).await;
        reporter.set_active(true);
        tokio::time::advance(Duration::from_secs(30)).await;
        reporter.report();
        tokio::task::yield_now().await;
        let values = sink.values.lock().unwrap();
        assert_eq!(values.len(), 1);
        assert!((values[0] - 50.0).abs() < 0.01, "got {}", values[0]);
    }

    #[tokio::test(start_paused = true)]
    async fn still_active_interval_counts_at_report_time() {
        let (reporter, sink) = reporter();
        reporter.set_active(true);
        tokio::time::advance(Duration::from_secs(60)).await;
        reporter.report();
        // Second window, still active the whole time.
        tokio::time::advance(Duration::from_secs(60)).await;
        reporter.report();
        tokio::task::yield_now().await;
        let values = sink.values.lock().unwrap();
        assert_eq!(values.len(), 2);
        for v in values.iter() {
            assert!((v - 100.0).abs() < 0.01, "got {v}");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn paused_time_is_excluded_from_the_window() {
        let (reporter, sink) = reporter();
        // 10s active, 40s paused, 10s idle => 10 / (60 - 40) = 50%.
        reporter.set_active(true);
        tokio::time::advance(Duration::from_secs(10)).await;
        reporter.set_active(false);
        reporter.set_paused(true);
        tokio::time::advance(Duration::from_secs(40)).await;
        reporter.set_paused(false);
        tokio::time::advance(Duration::from_secs(10)).await;
        reporter.report();
        tokio::task::yield_now().await;
        let values = sink.values.lock().unwrap();
        assert_eq!(values.len(), 1);
        assert!((values[0] - 50.0).abs() < 0.01, "got {}", values[0]);
    }

    #[tokio::test(start_paused = true)]
    async fn redundant_transitions_are_ignored() {
        let (reporter, sink) = reporter();
        reporter.set_active(true);
        reporter.set_active(true);
        tokio::time::advance(Duration::from_secs(30)).await;
        reporter.set_active(false);
        reporter.set_active(false);
        tokio::time::advance(Duration::from_secs(30)).await;
        reporter.report();
        tokio::task::yield_now().await;
        let values = sink.values.lock().unwrap();
        assert!((values[0] - 50.0).abs() < 0.01, "got {}", values[0]);
    }

    #[tokio::test(start_paused = true)]
    async fn run_loop_reports_on_interval_until_cancelled() {
        let (reporter, sink) = reporter();
        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(
            reporter
                .clone()
                .run(shutdown.clone(), Duration::from_secs(60)),
        );
        reporter.set_active(true);
        tokio::time::advance(Duration::from_secs(121)).await;
        shutdown.cancel();
        handle.await.unwrap();
        tokio::task::yield_now().await;
        let values = sink.values.lock().unwrap();
        assert_eq!(values.len(), 2);
        for v in values.iter() {
            assert!((v - 100.0).abs() < 0.01, "got {v}");
        }
    }
}
