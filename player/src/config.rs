use clap::ValueEnum;

use crate::error::{PlayerError, Result};

/// Which transport serves the manifest and segments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum TransportKind {
    /// HTTP for http(s) inputs, local for filesystem paths.
    Auto,
    Http1,
    Http3,
    Local,
}

/// Which ABR controller selects representations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum AbrPolicy {
    Dash,
    Hybrid,
    Bandwidth,
    Buffer,
    Fixed,
}

/// Which estimator feeds the controllers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum BwEstimatorKind {
    Segment,
    Continuous,
}

/// Typed configuration of a playback session.
#[derive(Debug, Clone)]
pub struct PlayerConfig {
    /// MPD URL or filesystem path. Required.
    pub input: String,
    /// Scheduler high watermark in seconds of buffered media.
    pub buffer_duration: f64,
    /// Upper buffer band of the default ABR (seconds).
    pub safe_buffer_level: f64,
    /// Lower buffer band of the default ABR (seconds).
    pub panic_buffer_level: f64,
    /// Buffered seconds required before the first playback start.
    pub min_start_duration: f64,
    /// Buffered seconds required to resume after a stall.
    pub min_rebuffer_duration: f64,
    /// Wall-time multiplier: 1 plays in real time, 0 fast-forwards all waits.
    pub time_factor: f64,
    /// Adaptation-set id range, e.g. "-", "0", "1-3", "2-".
    pub select_as: String,
    /// Bandwidth estimate before the first measurement (bps).
    pub max_initial_bitrate: f64,
    /// EWMA weight of the previous estimate.
    pub smoothing_factor: f64,
    /// Polling interval of the scheduler and manifest refresh (seconds).
    pub update_interval: f64,
    /// Chunk gaps above this are ignored by the continuous estimator (s).
    pub max_packet_delay: f64,
    /// Window of the continuous estimator (seconds).
    pub cont_bw_window: f64,
    pub transport: TransportKind,
    pub abr: AbrPolicy,
    /// Quality offset of the fixed controller.
    pub abr_quality: u32,
    pub bw_estimator: BwEstimatorKind,
    /// Emulated link rate of the local transport (bits per second).
    pub local_bw: u64,
    /// Packet size of the local transport (bytes).
    pub max_packet_size: usize,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            input: String::new(),
            buffer_duration: 8.0,
            safe_buffer_level: 6.0,
            panic_buffer_level: 2.5,
            min_start_duration: 2.0,
            min_rebuffer_duration: 2.0,
            time_factor: 1.0,
            select_as: "-".to_string(),
            max_initial_bitrate: 1_000_000.0,
            smoothing_factor: 0.5,
            update_interval: 0.05,
            max_packet_delay: 2.0,
            cont_bw_window: 1.0,
            transport: TransportKind::Auto,
            abr: AbrPolicy::Dash,
            abr_quality: 0,
            bw_estimator: BwEstimatorKind::Segment,
            local_bw: 100_000_000_000,
            max_packet_size: 20_000,
        }
    }
}

impl PlayerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.input.is_empty() {
            return Err(PlayerError::Config("a non-empty input is required".into()));
        }
        if self.time_factor < 0.0 {
            return Err(PlayerError::Config("time_factor must not be negative".into()));
        }
        if !(0.0..=1.0).contains(&self.smoothing_factor) {
            return Err(PlayerError::Config("smoothing_factor must be within [0, 1]".into()));
        }
        if self.buffer_duration <= 0.0 {
            return Err(PlayerError::Config("buffer_duration must be positive".into()));
        }
        Ok(())
    }

    /// Resolve the `Auto` transport from the input scheme.
    pub fn resolved_transport(&self) -> TransportKind {
        match self.transport {
            TransportKind::Auto => {
                if self.input.starts_with("http://") || self.input.starts_with("https://") {
                    TransportKind::Http1
                } else {
                    TransportKind::Local
                }
            }
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_input_is_rejected() {
        assert!(PlayerConfig::default().validate().is_err());
        let config = PlayerConfig { input: "movie.mpd".into(), ..Default::default() };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn auto_transport_follows_scheme() {
        let mut config = PlayerConfig { input: "https://cdn/movie.mpd".into(), ..Default::default() };
        assert_eq!(config.resolved_transport(), TransportKind::Http1);
        config.input = "/srv/media/movie.mpd".into();
        assert_eq!(config.resolved_transport(), TransportKind::Local);
        config.transport = TransportKind::Http3;
        assert_eq!(config.resolved_transport(), TransportKind::Http3);
    }
}
