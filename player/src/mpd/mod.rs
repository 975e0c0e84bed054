//! DASH manifest data structures (MPD and related types).
//! These represent parsed MPEG-DASH metadata including segment timing,
//! adaptation sets and the representations the ABR controllers choose from.

pub mod parser;
pub mod provider;

use indexmap::IndexMap;
use std::collections::BTreeMap;

pub use provider::MpdProvider;

/// Whether the presentation is VOD ("static") or live ("dynamic").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MpdType {
    Static,
    Dynamic,
}

/// Media kind of an adaptation set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentType {
    Video,
    Audio,
}

/// Top-level metadata parsed from an MPD file.
#[derive(Debug, Clone)]
pub struct Mpd {
    /// The URL the manifest was fetched from.
    pub url: String,
    /// VOD ("static") or live ("dynamic") presentation.
    pub mpd_type: MpdType,
    /// The media presentation duration in seconds.
    pub media_presentation_duration: f64,
    /// The maximum segment duration in seconds.
    pub max_segment_duration: f64,
    /// The recommended minimum buffer time in seconds.
    pub min_buffer_time: f64,
    /// All adaptation sets of the first Period, in document order.
    pub adaptation_sets: IndexMap<u32, AdaptationSet>,
}

/// An adaptation set groups interchangeable representations of one media type.
#[derive(Debug, Clone)]
pub struct AdaptationSet {
    pub id: u32,
    pub content_type: ContentType,
    /// The frame rate string, if announced.
    pub frame_rate: Option<String>,
    pub max_width: u32,
    pub max_height: u32,
    /// Picture aspect ratio, if announced.
    pub par: Option<String>,
    /// All representations of this set, in document order.
    pub representations: IndexMap<u32, Representation>,
}

/// One encoding (bitrate/resolution) of an adaptation set.
#[derive(Debug, Clone)]
pub struct Representation {
    pub id: u32,
    pub mime_type: String,
    pub codecs: String,
    /// Average bitrate of this stream in bits per second.
    pub bandwidth: u64,
    pub width: u32,
    pub height: u32,
    /// Resolved URL of the initialization segment.
    pub initialization: String,
    /// Media segments keyed by segment number. Numbering is identical across
    /// the representations of one adaptation set.
    pub segments: BTreeMap<u64, Segment>,
}

/// A single downloadable media chunk belonging to one representation.
#[derive(Debug, Clone)]
pub struct Segment {
    /// Resolved segment URL.
    pub url: String,
    /// Resolved initialization URL of the owning representation.
    pub init_url: String,
    /// Play duration in seconds.
    pub duration: f64,
    /// Presentation start time in seconds.
    pub start_time: f64,
    /// Owning adaptation set.
    pub as_id: u32,
    /// Owning representation.
    pub repr_id: u32,
}
