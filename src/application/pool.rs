//! Bounded conversion pool.
//!
//! Each conversion runs on a blocking thread while holding one of `workers`
//! permits, so at most `workers` engine invocations execute at once and the
//! rest wait in the semaphore's FIFO queue. Request handlers only ever await.

use std::{
    num::NonZeroU32,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    time::{Duration, Instant},
};

use metrics::{counter, gauge, histogram};
use tokio::sync::Semaphore;
use tracing::{info, warn};

use crate::domain::{ExportFormat, Notebook};

use super::{
    convert::{ConversionResult, ConvertError, Converter},
    export::RenderConfig,
};

pub const METRIC_CONVERSIONS_TOTAL: &str = "nbconvert_http_conversions_total";
pub const METRIC_CONVERSION_MS: &str = "nbconvert_http_conversion_ms";
pub const METRIC_POOL_IN_FLIGHT: &str = "nbconvert_http_pool_in_flight";

/// Slack on top of the render timeout before the pool stops waiting on an
/// engine that ignores its own deadline.
const ENGINE_GRACE: Duration = Duration::from_millis(500);

pub struct ConversionPool {
    converter: Arc<Converter>,
    permits: Arc<Semaphore>,
    workers: u32,
    in_flight: Arc<AtomicUsize>,
    closed: AtomicBool,
}

impl ConversionPool {
    pub fn new(converter: Converter, workers: NonZeroU32) -> Self {
        let workers = workers.get();
        info!(
            target = "nbconvert_http::pool",
            workers,
            render_timeout_ms = converter.render_timeout().as_millis() as u64,
            "conversion pool started"
        );
        Self {
            converter: Arc::new(converter),
            permits: Arc::new(Semaphore::new(workers as usize)),
            workers,
            in_flight: Arc::new(AtomicUsize::new(0)),
            closed: AtomicBool::new(false),
        }
    }

    pub fn workers(&self) -> u32 {
        self.workers
    }

    /// Conversions currently executing on a worker.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Acquire)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Run one conversion on the pool and wait for its result.
    ///
    /// Dropping the returned future does not stop the worker: the conversion
    /// finishes in the background and its result is discarded.
    pub async fn dispatch(
        &self,
        notebook: Notebook,
        config: RenderConfig,
    ) -> Result<ConversionResult, ConvertError> {
        if self.is_closed() {
            return Err(ConvertError::PoolUnavailable(
                "service is shutting down".to_string(),
            ));
        }

        let format = config.format;
        let permit = Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .map_err(|_| ConvertError::PoolUnavailable("conversion pool is closed".to_string()))?;

        let started_at = Instant::now();
        let converter = Arc::clone(&self.converter);
        let in_flight = InFlightGuard::enter(Arc::clone(&self.in_flight));
        let task = tokio::task::spawn_blocking(move || {
            let _permit = permit;
            let _in_flight = in_flight;
            converter.convert_with(notebook, config)
        });

        let render_timeout = self.converter.render_timeout();
        let limit = render_timeout.saturating_add(ENGINE_GRACE);
        let outcome = match tokio::time::timeout(limit, task).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_err)) => Err(ConvertError::RenderFailed(format!(
                "conversion worker aborted: {join_err}"
            ))),
            Err(_) => {
                warn!(
                    target = "nbconvert_http::pool",
                    format = %format,
                    "engine ignored its deadline; worker left to finish in the background"
                );
                Err(ConvertError::Timeout {
                    limit: render_timeout,
                })
            }
        };

        record_outcome(format, &outcome, started_at.elapsed());
        outcome
    }

    /// Stop accepting work and wait up to `grace` for queued and running
    /// conversions to finish. Calling it again is a no-op.
    pub async fn shutdown(&self, grace: Duration) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        info!(
            target = "nbconvert_http::pool",
            in_flight = self.in_flight(),
            "draining conversion pool"
        );

        match tokio::time::timeout(grace, self.permits.acquire_many(self.workers)).await {
            Ok(Ok(_drained)) => info!(target = "nbconvert_http::pool", "conversion pool drained"),
            Ok(Err(_)) => {}
            Err(_) => warn!(
                target = "nbconvert_http::pool",
                in_flight = self.in_flight(),
                grace_ms = grace.as_millis() as u64,
                "conversion pool did not drain before the grace period ended"
            ),
        }
        self.permits.close();
    }
}

struct InFlightGuard {
    counter: Arc<AtomicUsize>,
}

impl InFlightGuard {
    fn enter(counter: Arc<AtomicUsize>) -> Self {
        let current = counter.fetch_add(1, Ordering::AcqRel) + 1;
        gauge!(METRIC_POOL_IN_FLIGHT).set(current as f64);
        Self { counter }
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        let current = self.counter.fetch_sub(1, Ordering::AcqRel) - 1;
        gauge!(METRIC_POOL_IN_FLIGHT).set(current as f64);
    }
}

fn record_outcome(
    format: ExportFormat,
    outcome: &Result<ConversionResult, ConvertError>,
    elapsed: Duration,
) {
    let label = match outcome {
        Ok(_) => "ok",
        Err(err) => err.kind(),
    };
    counter!(
        METRIC_CONVERSIONS_TOTAL,
        "format" => format.name(),
        "outcome" => label
    )
    .increment(1);
    histogram!(METRIC_CONVERSION_MS).record(elapsed.as_secs_f64() * 1000.0);
}

#[cfg(test)]
mod tests {
    use std::thread;

    use bytes::Bytes;
    use serde_json::Map;

    use super::*;
    use crate::application::{
        engine::{EngineError, EngineOutput, EngineRequest, RenderEngine},
        export::ConversionDefaults,
        templates::TemplateStore,
    };
    use crate::domain::Cell;

    /// Sleeps for as long as the first cell's source says (in milliseconds),
    /// honoring the deadline unless told to ignore it.
    struct SleepyEngine {
        honor_deadline: bool,
    }

    impl RenderEngine for SleepyEngine {
        fn render(&self, request: EngineRequest<'_>) -> Result<EngineOutput, EngineError> {
            let millis: u64 = request
                .notebook
                .cells
                .first()
                .and_then(|cell| cell.source.parse().ok())
                .unwrap_or(0);
            let wanted = Instant::now() + Duration::from_millis(millis);
            if self.honor_deadline && wanted > request.deadline {
                thread::sleep(request.deadline.saturating_duration_since(Instant::now()));
                return Err(EngineError::Timeout {
                    elapsed: Duration::from_millis(millis),
                });
            }
            thread::sleep(Duration::from_millis(millis));
            Ok(EngineOutput {
                body: Bytes::from(format!("slept {millis}")),
                mime_type: Some("text/plain".to_string()),
                resources: Map::new(),
            })
        }
    }

    fn pool(workers: u32, timeout: Duration, honor_deadline: bool) -> Arc<ConversionPool> {
        let converter = Converter::new(
            Arc::new(SleepyEngine { honor_deadline }),
            TemplateStore::default(),
            timeout,
        );
        Arc::new(ConversionPool::new(
            converter,
            NonZeroU32::new(workers).expect("non-zero"),
        ))
    }

    fn job(millis: u64) -> (Notebook, RenderConfig) {
        let notebook = Notebook::new(vec![Cell::new("code", millis.to_string())]);
        let config =
            RenderConfig::build("markdown", None, &ConversionDefaults::none()).expect("config");
        (notebook, config)
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn slow_conversion_times_out_without_affecting_a_faster_one() {
        let pool = pool(2, Duration::from_millis(200), true);

        let slow_pool = Arc::clone(&pool);
        let slow = tokio::spawn(async move {
            let (notebook, config) = job(5_000);
            slow_pool.dispatch(notebook, config).await
        });
        tokio::time::sleep(Duration::from_millis(20)).await;

        let (notebook, config) = job(10);
        let fast = pool.dispatch(notebook, config).await.expect("fast conversion");
        assert_eq!(
            fast.body(),
            &crate::application::convert::RenderedBody::Text("slept 10".to_string())
        );

        let slow = slow.await.expect("join");
        assert!(matches!(slow, Err(ConvertError::Timeout { .. })));

        let (notebook, config) = job(0);
        assert!(pool.dispatch(notebook, config).await.is_ok());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn pool_stops_waiting_on_engines_that_ignore_the_deadline() {
        let pool = pool(1, Duration::from_millis(50), false);
        let (notebook, config) = job(1_500);

        let started = Instant::now();
        let err = pool.dispatch(notebook, config).await.expect_err("timeout");
        assert!(matches!(err, ConvertError::Timeout { limit } if limit == Duration::from_millis(50)));
        assert!(started.elapsed() < Duration::from_millis(1_500));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn requests_beyond_capacity_queue_until_a_worker_frees_up() {
        let pool = pool(1, Duration::from_secs(5), true);

        let first_pool = Arc::clone(&pool);
        let first = tokio::spawn(async move {
            let (notebook, config) = job(150);
            first_pool.dispatch(notebook, config).await
        });
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(pool.in_flight(), 1);

        let (notebook, config) = job(0);
        let started = Instant::now();
        pool.dispatch(notebook, config).await.expect("queued conversion");
        assert!(started.elapsed() >= Duration::from_millis(80));
        assert!(first.await.expect("join").is_ok());
        assert_eq!(pool.in_flight(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn shutdown_drains_in_flight_work_then_rejects() {
        let pool = pool(2, Duration::from_secs(5), true);

        let running_pool = Arc::clone(&pool);
        let running = tokio::spawn(async move {
            let (notebook, config) = job(100);
            running_pool.dispatch(notebook, config).await
        });
        tokio::time::sleep(Duration::from_millis(20)).await;

        pool.shutdown(Duration::from_secs(5)).await;
        assert!(pool.is_closed());
        assert_eq!(pool.in_flight(), 0);
        assert!(running.await.expect("join").is_ok());

        let (notebook, config) = job(0);
        let err = pool.dispatch(notebook, config).await.expect_err("closed");
        assert!(matches!(err, ConvertError::PoolUnavailable(_)));

        pool.shutdown(Duration::from_secs(1)).await;
    }
}
