use once_cell::sync::Lazy;
use prometheus::{self, IntGauge, Opts, Registry};
use std::{
    collections::HashMap,
    sync::{Arc, Mutex, RwLock},
};
use tracing::{debug, instrument};

/// Global singleton for the `Metrics` instance.
pub static METRICS: Lazy<Arc<Mutex<Option<Metrics>>>> = Lazy::new(|| Arc::new(Mutex::new(None)));

/// Metrics struct managing a Prometheus registry of playback gauges.
#[derive(Debug, Clone)]
pub struct Metrics {
    registry: Registry,
    common_labels: Arc<RwLock<Vec<(String, String)>>>,
    custom_gauges: Arc<Mutex<HashMap<String, IntGauge>>>,
}

pub struct MetricsBuilder {
    common_labels: Vec<(String, String)>,
    custom_gauges: HashMap<String, Opts>,
}

impl Default for MetricsBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsBuilder {
    /// Create a new `MetricsBuilder`.
    #[instrument(skip_all)]
    pub fn new() -> Self {
        Self {
            common_labels: Vec::new(),
            custom_gauges: HashMap::new(),
        }
    }

    /// Add a common label to be applied to all metrics.
    #[instrument(skip_all)]
    pub fn add_label(mut self, key: &str, value: &str) -> Self {
        self.common_labels.push((key.to_string(), value.to_string()));
        self
    }

    /// Add a gauge by name and description.
    #[instrument(skip_all)]
    pub fn add_gauge(mut self, name: &str, description: &str) -> Self {
        let opts = Self::opts_with_labels(name, description, &self.common_labels);
        self.custom_gauges.insert(name.to_string(), opts);
        self
    }

    /// Build the Metrics struct and register it as the global instance.
    #[instrument(skip_all)]
    pub fn build(self) -> Metrics {
        let registry = Registry::new();

        let mut custom_gauges = HashMap::new();
        for (name, opts) in self.custom_gauges {
            let gauge = IntGauge::with_opts(opts).expect("Failed to create custom gauge");
            registry
                .register(Box::new(gauge.clone()))
                .expect("Failed to register custom gauge");
            custom_gauges.insert(name, gauge);
        }

        debug!("Metrics successfully built");

        let metrics = Metrics {
            registry,
            common_labels: Arc::new(RwLock::new(self.common_labels)),
            custom_gauges: Arc::new(Mutex::new(custom_gauges)),
        };

        let mut metrics_guard = METRICS.lock().unwrap();
        if metrics_guard.is_some() {
            panic!("Metrics instance already initialized.");
        }

        *metrics_guard = Some(metrics);

        (*metrics_guard.as_ref().unwrap()).clone()
    }

    /// Helper to create metric options with labels.
    fn opts_with_labels(name: &str, help: &str, labels: &[(String, String)]) -> Opts {
        let mut opts = Opts::new(name, help);
        for (key, value) in labels {
            opts = opts.const_label(key.clone(), value.clone());
        }
        opts
    }
}

/// Retrieve the global Metrics instance. Panics if it was never built.
#[instrument(skip_all)]
pub fn get_metrics() -> Metrics {
    try_get_metrics().expect("Metrics instance not initialized. Create a MetricsBuilder and call build().")
}

/// Retrieve the global Metrics instance if one was built.
pub fn try_get_metrics() -> Option<Metrics> {
    METRICS.lock().unwrap().clone()
}

impl Metrics {
    /// Add or get a custom gauge by name.
    #[instrument(skip_all)]
    pub fn get_or_create_gauge(&self, name: &str, description: &str) -> Result<IntGauge, String> {
        let mut gauges = self
            .custom_gauges
            .lock()
            .map_err(|_| "Failed to lock custom gauges".to_string())?;
        if let Some(gauge) = gauges.get(name) {
            return Ok(gauge.clone());
        }

        let labels = self
            .common_labels
            .read()
            .map_err(|_| "Failed to lock common labels".to_string())?;
        let opts = MetricsBuilder::opts_with_labels(name, description, &labels);
        let gauge = IntGauge::with_opts(opts).map_err(|e| format!("Failed to create gauge: {}", e))?;
        self.registry
            .register(Box::new(gauge.clone()))
            .map_err(|e| format!("Failed to register gauge: {}", e))?;
        gauges.insert(name.to_string(), gauge.clone());
        Ok(gauge)
    }

    /// Get the Prometheus registry.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}
