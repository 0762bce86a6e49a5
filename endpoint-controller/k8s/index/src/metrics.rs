use crate::SliceCache;
use prometheus_client::{
    collector::Collector,
    encoding::{DescriptorEncoder, EncodeLabelSet, EncodeMetric},
    metrics::{counter::Counter, family::Family, gauge::ConstGauge, MetricType},
    registry::Registry,
};
use std::sync::Arc;

/// Metrics recorded by the endpoint controller.
#[derive(Clone, Debug, Default)]
pub struct ControllerMetrics {
    endpoint_no_pod: Family<HostnameLabels, Counter>,
    events_skipped: Family<SkipLabels, Counter>,
    eds_updates: Counter,
    proxy_endpoints_not_ready: Counter,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct HostnameLabels {
    hostname: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct SkipLabels {
    reason: String,
}

/// Exposes the size of a slice cache.
#[derive(Debug)]
struct Instrumented(Arc<SliceCache>);

// === impl ControllerMetrics ===

impl ControllerMetrics {
    pub fn register(prom: &mut Registry) -> Self {
        let metrics = Self::default();
        prom.register(
            "endpoint_no_pod",
            "Count of pod-backed endpoint addresses dropped because no pod owns the address",
            metrics.endpoint_no_pod.clone(),
        );
        prom.register(
            "events_skipped",
            "Count of endpoint events skipped before updating the cache",
            metrics.events_skipped.clone(),
        );
        prom.register(
            "eds_updates",
            "Count of merged endpoint views pushed downstream",
            metrics.eds_updates.clone(),
        );
        prom.register(
            "proxy_endpoints_not_ready",
            "Count of not-ready endpoints matched to a proxy's addresses",
            metrics.proxy_endpoints_not_ready.clone(),
        );
        metrics
    }

    pub(crate) fn endpoint_no_pod(&self, hostname: &str) {
        self.endpoint_no_pod
            .get_or_create(&HostnameLabels {
                hostname: hostname.to_string(),
            })
            .inc();
    }

    pub(crate) fn unknown_service(&self) {
        self.events_skipped
            .get_or_create(&SkipLabels {
                reason: "unknown_service".to_string(),
            })
            .inc();
    }

    pub(crate) fn eds_update(&self) {
        self.eds_updates.inc();
    }

    pub(crate) fn proxy_endpoint_not_ready(&self) {
        self.proxy_endpoints_not_ready.inc();
    }

    #[cfg(test)]
    pub(crate) fn endpoint_no_pod_count(&self, hostname: &str) -> u64 {
        self.endpoint_no_pod
            .get_or_create(&HostnameLabels {
                hostname: hostname.to_string(),
            })
            .get()
    }

    #[cfg(test)]
    pub(crate) fn eds_update_count(&self) -> u64 {
        self.eds_updates.get()
    }
}

/// Registers gauges that report the size of the slice cache at scrape time.
pub fn register_cache(prom: &mut Registry, cache: Arc<SliceCache>) {
    prom.register_collector(Box::new(Instrumented(cache)));
}

impl Collector for Instrumented {
    fn encode(&self, mut encoder: DescriptorEncoder<'_>) -> Result<(), std::fmt::Error> {
        let services_encoder = encoder.encode_descriptor(
            "slice_cache_services",
            "The number of services with live slices",
            None,
            MetricType::Gauge,
        )?;
        ConstGauge::new(self.0.len() as i64).encode(services_encoder)?;

        let slices_encoder = encoder.encode_descriptor(
            "slice_cache_slices",
            "The number of live slices",
            None,
            MetricType::Gauge,
        )?;
        ConstGauge::new(self.0.slice_count() as i64).encode(slices_encoder)?;

        let endpoints_encoder = encoder.encode_descriptor(
            "slice_cache_endpoints",
            "The number of endpoints across all live slices",
            None,
            MetricType::Gauge,
        )?;
        ConstGauge::new(self.0.endpoint_count() as i64).encode(endpoints_encoder)?;

        Ok(())
    }
}
