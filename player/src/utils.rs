use metrics::MetricsBuilder;
use tokio::time::Instant;

/// Monotonic session clock. All recorded timestamps are seconds since the
/// session started, so download stats and playback events share one origin.
#[derive(Debug, Clone)]
pub struct Clock {
    origin: Instant,
}

impl Default for Clock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock {
    pub fn new() -> Self {
        Self { origin: Instant::now() }
    }

    /// Seconds elapsed since the clock was created.
    pub fn now(&self) -> f64 {
        self.origin.elapsed().as_secs_f64()
    }
}

/// Register the global metrics instance used by the playback gauges.
pub fn create_metrics() -> Result<(), String> {
    MetricsBuilder::new().add_label("app", "abr_player").build();
    Ok(())
}

/// Expose the Prometheus endpoint in the background.
pub fn start_metrics_server(port: u16) {
    tokio::spawn(metrics::start_server(port));
}
