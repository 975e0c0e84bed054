//! Adaptive-bitrate policy objects. One controller instance serves a whole
//! playback session; the scheduler asks it for a representation per selected
//! adaptation set before each segment group.

mod bandwidth;
mod buffer;
mod dash;
mod fixed;
mod hybrid;

pub use bandwidth::BandwidthAbr;
pub use buffer::BufferAbr;
pub use dash::DashAbr;
pub use fixed::FixedAbr;
pub use hybrid::HybridAbr;

use indexmap::IndexMap;
use std::collections::HashMap;

use crate::mpd::{AdaptationSet, ContentType, Representation};

/// Share of the estimated bandwidth the controllers may actually commit to.
pub(crate) const ABR_SAFETY_FACTOR: f64 = 0.7;
/// Video/audio split of the committed bandwidth when both kinds are present.
const VIDEO_SHARE: f64 = 0.8;

/// Selects one representation id per adaptation set for the given segment
/// index. Adaptation sets a controller cannot serve are omitted from the
/// returned map.
pub trait AbrController: Send {
    fn update_selection(&mut self, adaptation_sets: &IndexMap<u32, AdaptationSet>, index: u64) -> HashMap<u32, u32>;
}

/// Fallback used after a dropped download: the minimum-bitrate
/// representation of every adaptation set.
pub fn lowest_selections(adaptation_sets: &IndexMap<u32, AdaptationSet>) -> HashMap<u32, u32> {
    adaptation_sets
        .values()
        .filter_map(|set| {
            set.representations
                .values()
                .min_by_key(|r| r.bandwidth)
                .map(|r| (set.id, r.id))
        })
        .collect()
}

/// Split the committed bandwidth into a per-set budget: evenly when only one
/// media kind is present, 80/20 between video and audio sets otherwise.
pub(crate) fn per_set_budget(adaptation_sets: &IndexMap<u32, AdaptationSet>, available: f64) -> HashMap<u32, f64> {
    let num_videos = adaptation_sets
        .values()
        .filter(|s| s.content_type == ContentType::Video)
        .count();
    let num_audios = adaptation_sets.len() - num_videos;

    if num_videos == 0 || num_audios == 0 {
        let total = adaptation_sets.len().max(1);
        let per_set = available / total as f64;
        adaptation_sets.values().map(|s| (s.id, per_set)).collect()
    } else {
        let per_video = available * VIDEO_SHARE / num_videos as f64;
        let per_audio = available * (1.0 - VIDEO_SHARE) / num_audios as f64;
        adaptation_sets
            .values()
            .map(|s| {
                let budget = match s.content_type {
                    ContentType::Video => per_video,
                    ContentType::Audio => per_audio,
                };
                (s.id, budget)
            })
            .collect()
    }
}

/// Highest-bandwidth representation strictly below the budget, or the
/// lowest one when nothing fits.
pub(crate) fn ideal_by_bandwidth(set: &AdaptationSet, budget: f64) -> u32 {
    let mut representations: Vec<&Representation> = set.representations.values().collect();
    representations.sort_by(|a, b| b.bandwidth.cmp(&a.bandwidth));
    for representation in &representations {
        if (representation.bandwidth as f64) < budget {
            return representation.id;
        }
    }
    match representations.last() {
        Some(representation) => representation.id,
        None => 0,
    }
}
