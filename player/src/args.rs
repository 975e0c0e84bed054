// File: args.rs
use clap::{Parser, ValueEnum};
use tracing::level_filters::LevelFilter;

use crate::config::{AbrPolicy, BwEstimatorKind, PlayerConfig, TransportKind};

#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Debug, ValueEnum)]
pub enum LogLevel {
    Trace = 0, // Designates very fine-grained informational events, extremely verbose.
    Debug = 1, // Designates fine-grained informational events.
    Info = 2,  // Designates informational messages.
    Warn = 3,  // Designates hazardous situations.
    Error = 4, // Designates very serious errors.
}

#[derive(Parser, Debug)]
#[command(version, about, long_about = "A headless client that plays MPEG-DASH media and reports playback analytics.")]
pub struct Args {
    /// MPD URL or filesystem path
    #[arg(short, long)]
    pub input: String,
    #[arg(long, default_value = "auto")]
    pub transport: TransportKind,
    #[arg(long, default_value = "dash")]
    pub abr: AbrPolicy,
    /// Quality offset used by the fixed ABR policy
    #[arg(long, default_value_t = 0)]
    pub abr_quality: u32,
    #[arg(long, default_value = "segment")]
    pub bw_estimator: BwEstimatorKind,
    #[arg(long, default_value_t = 8.0)]
    pub buffer_duration: f64,
    #[arg(long, default_value_t = 6.0)]
    pub safe_buffer_level: f64,
    #[arg(long, default_value_t = 2.5)]
    pub panic_buffer_level: f64,
    #[arg(long, default_value_t = 2.0)]
    pub min_start_duration: f64,
    #[arg(long, default_value_t = 2.0)]
    pub min_rebuffer_duration: f64,
    /// 1 = real time, 0 = as fast as possible
    #[arg(long, default_value_t = 1.0)]
    pub time_factor: f64,
    /// Adaptation-set id range ("-", "0", "1-3", "2-")
    #[arg(long, default_value = "-")]
    pub select_as: String,
    #[arg(long, default_value_t = 1_000_000.0)]
    pub max_initial_bitrate: f64,
    /// Emulated link rate of the local transport (bps)
    #[arg(long, default_value_t = 100_000_000_000)]
    pub local_bw: u64,
    /// Print the JSON report after the tables
    #[arg(long, action = clap::ArgAction::SetTrue)]
    pub dump_json: bool,
    #[arg(short, long, default_value = "info")]
    pub log_level: LogLevel,
    /// Port of the Prometheus endpoint
    #[arg(short, long, default_value = "3380")]
    pub port: u16,
}

pub fn parse_args() -> Args {
    Args::parse()
}

pub fn get_log_level_filter(args: &Args) -> LevelFilter {
    // Map the LogLevel enum to the LevelFilter enum
    match args.log_level {
        LogLevel::Trace => LevelFilter::TRACE,
        LogLevel::Debug => LevelFilter::DEBUG,
        LogLevel::Info => LevelFilter::INFO,
        LogLevel::Warn => LevelFilter::WARN,
        LogLevel::Error => LevelFilter::ERROR,
    }
}

impl Args {
    pub fn to_config(&self) -> PlayerConfig {
        PlayerConfig {
            input: self.input.clone(),
            buffer_duration: self.buffer_duration,
            safe_buffer_level: self.safe_buffer_level,
            panic_buffer_level: self.panic_buffer_level,
            min_start_duration: self.min_start_duration,
            min_rebuffer_duration: self.min_rebuffer_duration,
            time_factor: self.time_factor,
            select_as: self.select_as.clone(),
            max_initial_bitrate: self.max_initial_bitrate,
            transport: self.transport,
            abr: self.abr,
            abr_quality: self.abr_quality,
            bw_estimator: self.bw_estimator,
            local_bw: self.local_bw,
            ..Default::default()
        }
    }
}
