//! A single trait so every component (pool, cache, dispatcher) can emit
//! ad-hoc diagnostic records without depending on `smbd-core` or on a
//! process-wide static sink. Components hold an `Arc<dyn Diagnostics>`
//! they were handed at construction; routing those records somewhere
//! (logs, a ring buffer, a metrics exporter) is the embedder's choice.

/// A sink for free-form diagnostic messages emitted by the core's
/// components, distinct from `log` in that callers can attach their own
/// sink without reconfiguring process-wide logging.
pub trait Diagnostics: Send + Sync {
    fn record(&self, message: &str);
}
