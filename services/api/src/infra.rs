use gatekeeper::workflows::membership::OutboxTransport;
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) readiness: Arc<AtomicBool>,
    pub(crate) metrics: Arc<PrometheusHandle>,
    /// Set when outbound chat events queue locally instead of going to a webhook.
    pub(crate) outbox: Option<Arc<OutboxTransport>>,
}
