//! Cross-thread event bridge.
//!
//! Worker threads owned by the protocol engine call
//! [`Bridge::deliver_fire_and_forget`] or [`Bridge::deliver_request`]; the
//! single host thread drains deliveries with [`Bridge::host_pump`] from its own
//! event loop. Request deliveries block their worker until the host replies,
//! the host shuts down, or the optional request timeout expires.

pub mod delivery;
pub mod reply;

pub use delivery::{DeliveryQueue, PendingDelivery};
pub use reply::{Completer, ReplyOutcome, ReplySlot};

use crate::config::BridgeConfig;
use crate::error::{BridgeError, ContractViolation, DeliveryError, ErrorCode, SoftError};
use crate::events::{EventPayload, EventType, Route};
use crate::host::{decode_reply, HostHandler, Reply};
use crate::marshal::copy_payload;
use crate::metrics::{BridgeMetrics, BridgeStats};
use crate::registry::ProxyRegistry;
use crate::report::{ErrorReport, ErrorReporter};
use once_cell::sync::OnceCell;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, trace, warn};

/// Result of one `host_pump` call
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PumpStats {
    /// Deliveries handed to the handler
    pub processed: usize,
    /// Request replies written
    pub replied: usize,
    /// Deliveries whose handler failed
    pub failed: usize,
    /// Error reports forwarded to the handler
    pub reports: usize,
}

struct BridgeInner {
    config: BridgeConfig,
    registry: ProxyRegistry,
    queue: DeliveryQueue,
    reporter: ErrorReporter,
    metrics: BridgeMetrics,
    next_seq: AtomicU64,
    host_thread: OnceCell<ThreadId>,
    shutting_down: AtomicBool,
}

/// Handle to the bridge; cheap to clone and share with worker threads
#[derive(Clone)]
pub struct Bridge {
    inner: Arc<BridgeInner>,
}

impl Bridge {
    /// Create a bridge over `registry`
    pub fn new(config: BridgeConfig, registry: ProxyRegistry) -> Result<Self, BridgeError> {
        config.validate()?;

        info!(
            queue_capacity = config.queue_capacity,
            request_timeout_ms = ?config.request_timeout_ms,
            detect_reentry = config.detect_reentry,
            "Creating UPnP host bridge"
        );

        Ok(Self {
            inner: Arc::new(BridgeInner {
                queue: DeliveryQueue::new(config.queue_capacity),
                reporter: ErrorReporter::new(config.error_report_capacity),
                metrics: BridgeMetrics::new(),
                next_seq: AtomicU64::new(0),
                host_thread: OnceCell::new(),
                shutting_down: AtomicBool::new(false),
                registry,
                config,
            }),
        })
    }

    /// Configuration in use
    pub fn config(&self) -> &BridgeConfig {
        &self.inner.config
    }

    /// The proxy registry
    pub fn registry(&self) -> &ProxyRegistry {
        &self.inner.registry
    }

    /// Push a failure to the out-of-band error channel
    pub fn report(&self, code: ErrorCode, message: impl Into<String>, cookie: Option<usize>) {
        self.inner.metrics.record_error(&code.to_string());
        self.inner.reporter.report(code, message, cookie);
    }

    fn delivery_failed(&self, event_type: EventType, err: &DeliveryError, cookie: Option<usize>) {
        let message = match err {
            DeliveryError::OutOfMemory(message) => message.clone(),
            _ => format!(
                "Error delivering 'event' for {} callback.",
                event_type.payload_name()
            ),
        };
        debug!(kind = %event_type, error = %err, "Delivery failed");
        self.report(err.code(), message, cookie);
    }

    fn copy(
        &self,
        event_type: EventType,
        payload: &EventPayload<'_>,
    ) -> Result<crate::marshal::OwnedPayload, DeliveryError> {
        copy_payload(event_type, payload, self.inner.registry.dom()).map_err(|e| match e {
            BridgeError::Marshal(message) => DeliveryError::OutOfMemory(message),
            other => DeliveryError::OutOfMemory(other.to_string()),
        })
    }

    fn enqueue(
        &self,
        event_type: EventType,
        payload: &EventPayload<'_>,
        cookie: Option<usize>,
        reply: Option<Completer>,
    ) -> Result<u64, DeliveryError> {
        if self.is_shutting_down() {
            return Err(DeliveryError::HostUnavailable);
        }
        let owned = self.copy(event_type, payload)?;
        let seq = self.inner.next_seq.fetch_add(1, Ordering::Relaxed);
        let delivery = PendingDelivery::new(seq, event_type, cookie, owned, reply);
        let depth = self.inner.queue.push(delivery)?;
        self.inner.metrics.record_delivered(depth);
        if self.inner.config.debug {
            debug!(seq, kind = %event_type, depth, "Delivery queued");
        }
        Ok(seq)
    }

    /// Copy `payload` and queue it for the host; never blocks and never fails
    /// back into the engine. Failures go to the error channel.
    pub fn deliver_fire_and_forget(
        &self,
        event_type: EventType,
        payload: &EventPayload<'_>,
        cookie: Option<usize>,
    ) {
        debug_assert_eq!(event_type.route(), Route::FireAndForget);
        if let Err(err) = self.enqueue(event_type, payload, cookie, None) {
            self.inner.metrics.record_dropped();
            self.delivery_failed(event_type, &err, cookie);
        }
    }

    /// Copy `payload`, queue it and block until the host replies.
    ///
    /// Resolves to `HostUnavailable` if the host shuts down first, and to
    /// `TimedOut` if a request timeout is configured and expires. Called from
    /// the host thread itself it fails fast with `Reentrant`.
    pub fn deliver_request(
        &self,
        event_type: EventType,
        payload: &EventPayload<'_>,
        cookie: Option<usize>,
    ) -> Result<Reply, DeliveryError> {
        debug_assert_eq!(event_type.route(), Route::Request);
        if self.inner.config.detect_reentry && self.on_host_thread() {
            let err = DeliveryError::Reentrant;
            warn!(kind = %event_type, "Request raised on the host thread; failing fast");
            self.inner.metrics.record_host_unavailable();
            self.report(err.code(), err.to_string(), cookie);
            return Err(err);
        }

        let (slot, completer) = ReplySlot::pair();
        let seq = match self.enqueue(event_type, payload, cookie, Some(completer)) {
            Ok(seq) => seq,
            Err(err) => {
                self.inner.metrics.record_dropped();
                if matches!(err, DeliveryError::HostUnavailable) {
                    self.inner.metrics.record_host_unavailable();
                }
                self.delivery_failed(event_type, &err, cookie);
                return Err(err);
            }
        };

        let outcome = slot.wait(self.inner.config.request_timeout());
        match &outcome {
            Ok(_) => self.inner.metrics.record_replied(),
            Err(DeliveryError::TimedOut(ms)) => {
                self.inner.metrics.record_timed_out();
                self.report(
                    ErrorCode::HostUnavailable,
                    format!(
                        "Error: a {} was left unanswered for {}ms and was abandoned.",
                        event_type.payload_name(),
                        ms
                    ),
                    cookie,
                );
            }
            Err(DeliveryError::HostUnavailable) => self.inner.metrics.record_host_unavailable(),
            Err(_) => {}
        }
        trace!(seq, kind = %event_type, ok = outcome.is_ok(), "Request resolved");
        outcome
    }

    fn on_host_thread(&self) -> bool {
        self.inner.host_thread.get() == Some(&thread::current().id())
    }

    fn bind_host_thread(&self, operation: &'static str) -> Result<(), ContractViolation> {
        let current = thread::current().id();
        let bound = *self.inner.host_thread.get_or_init(|| {
            debug!(thread = ?current, "Host thread bound");
            current
        });
        if bound == current {
            Ok(())
        } else {
            Err(ContractViolation::WrongThread { operation })
        }
    }

    /// Process queued deliveries on the host thread.
    ///
    /// The first call binds the host thread; calling from any other thread
    /// afterwards is a contract violation. Handler errors and panics fail only
    /// the delivery they happened in.
    pub fn host_pump(&self, handler: &mut dyn HostHandler) -> Result<PumpStats, ContractViolation> {
        self.bind_host_thread("host_pump")?;
        let mut stats = PumpStats::default();

        if !self.is_shutting_down() {
            for delivery in self.inner.queue.pop_batch(self.inner.config.max_pump_batch) {
                self.process(delivery, handler, &mut stats);
            }
        }

        if handler.handles_errors() {
            for report in self.inner.reporter.drain() {
                stats.reports += 1;
                if catch_unwind(AssertUnwindSafe(|| handler.on_error(&report))).is_err() {
                    error!(code = %report.code, "Host error handler panicked");
                }
            }
        }

        if stats.processed > 0 {
            debug!(
                processed = stats.processed,
                replied = stats.replied,
                failed = stats.failed,
                "Host pump finished"
            );
        }
        Ok(stats)
    }

    fn process(&self, delivery: PendingDelivery, handler: &mut dyn HostHandler, stats: &mut PumpStats) {
        let PendingDelivery {
            seq,
            event_type,
            cookie,
            payload,
            reply,
            ..
        } = delivery;

        if reply.as_ref().map(Completer::is_detached).unwrap_or(false) {
            debug!(seq, kind = %event_type, "Requester gave up; skipping delivery");
            self.inner.metrics.record_dropped();
            return;
        }

        let event = payload.into_host_event(event_type, cookie, &self.inner.registry);
        let started = Instant::now();
        let result = catch_unwind(AssertUnwindSafe(|| handler.handle(&event)));
        stats.processed += 1;

        let outcome: Result<Vec<crate::host::HostValue>, SoftError> = match result {
            Ok(Ok(values)) => Ok(values),
            Ok(Err(err)) => {
                let message = format!("Error in {} callback: {:#}", event_type.payload_name(), err);
                self.report(ErrorCode::HandlerFailure, message.clone(), cookie);
                Err(SoftError::new(crate::error::upnp_codes::SOAP_ACTION_FAILED, message))
            }
            Err(cause) => {
                let detail = cause
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| cause.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                let message = format!("Panic in {} callback: {}", event_type.payload_name(), detail);
                self.report(ErrorCode::HandlerFailure, message.clone(), cookie);
                Err(SoftError::new(crate::error::upnp_codes::SOAP_ACTION_FAILED, message))
            }
        };
        if self.inner.config.debug {
            debug!(seq, kind = %event_type, ok = outcome.is_ok(), "Delivery processed");
        }

        let Some(completer) = reply else {
            self.inner.metrics.record_processed(started.elapsed(), outcome.is_ok());
            if outcome.is_err() {
                stats.failed += 1;
            }
            return;
        };

        let reply_outcome = outcome.and_then(|values| {
            decode_reply(event_type, values).map_err(|err| {
                self.report(ErrorCode::ProtocolFailure, err.message.clone(), cookie);
                err
            })
        });
        self.inner
            .metrics
            .record_processed(started.elapsed(), reply_outcome.is_ok());
        if reply_outcome.is_err() {
            stats.failed += 1;
        }

        if completer.complete(reply_outcome.map_err(DeliveryError::HandlerFailed)) {
            stats.replied += 1;
        } else {
            self.inner.metrics.record_late_reply();
            debug!(seq, kind = %event_type, "Reply discarded; requester detached");
        }
        // `event` drops here, releasing proxies the handler did not keep
    }

    /// The final pump: the host is gone.
    ///
    /// Refuses further deliveries, releases every queued payload without
    /// touching host state and resolves queued requests as `HostUnavailable`.
    /// Returns the number of deliveries discarded. Safe to call from any thread
    /// and more than once.
    pub fn shutdown(&self) -> usize {
        if !self.inner.shutting_down.swap(true, Ordering::SeqCst) {
            info!("Shutting down UPnP host bridge");
        }
        let drained = self.inner.queue.close();
        let count = drained.len();
        for delivery in drained {
            self.inner.metrics.record_dropped();
            if delivery.is_request() {
                self.report(
                    ErrorCode::HostUnavailable,
                    format!(
                        "Error: a {} was left unanswered and was garbage collected.",
                        delivery.event_type.payload_name()
                    ),
                    delivery.cookie,
                );
            }
            // dropping frees the copied documents and completes the reply slot
            drop(delivery);
        }
        count
    }

    /// Whether shutdown has begun
    pub fn is_shutting_down(&self) -> bool {
        self.inner.shutting_down.load(Ordering::SeqCst)
    }

    /// Number of queued deliveries
    pub fn pending(&self) -> usize {
        self.inner.queue.len()
    }

    /// Block until deliveries are queued (or shutdown begins), at most `timeout`
    pub fn wait_for_work(&self, timeout: Duration) -> bool {
        self.inner.queue.wait_for_work(timeout)
    }

    /// Resolve once deliveries are queued (or shutdown begins)
    pub async fn work_available(&self) {
        self.inner.queue.work_available().await
    }

    /// Take pending error reports (for hosts that poll instead of using `on_error`)
    pub fn error_reports(&self) -> Vec<ErrorReport> {
        self.inner.reporter.drain()
    }

    /// Metrics collector
    pub fn metrics(&self) -> &BridgeMetrics {
        &self.inner.metrics
    }

    /// Statistics snapshot
    pub fn stats(&self) -> BridgeStats {
        self.inner.metrics.snapshot(self.pending())
    }
}

impl std::fmt::Debug for Bridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bridge")
            .field("pending", &self.pending())
            .field("shutting_down", &self.is_shutting_down())
            .finish()
    }
}
