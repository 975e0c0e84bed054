use indexmap::IndexMap;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use crate::abr::{ideal_by_bandwidth, per_set_budget, AbrController, ABR_SAFETY_FACTOR};
use crate::buffer::BufferManager;
use crate::bw_meter::BandwidthMeter;
use crate::mpd::{AdaptationSet, MpdProvider};

/// The default policy. The throughput-ideal selection is tempered by the
/// buffer level: below the panic band the cheaper of last/ideal wins, and
/// above the safe band a higher last selection is kept only if one more
/// segment at that rate still fits into the buffered time.
pub struct DashAbr {
    bandwidth_meter: Arc<dyn BandwidthMeter>,
    buffer: Arc<BufferManager>,
    mpd_provider: Arc<MpdProvider>,
    panic_buffer: f64,
    safe_buffer: f64,
    last_selections: Option<HashMap<u32, u32>>,
}

impl DashAbr {
    pub fn new(
        bandwidth_meter: Arc<dyn BandwidthMeter>,
        buffer: Arc<BufferManager>,
        mpd_provider: Arc<MpdProvider>,
        panic_buffer: f64,
        safe_buffer: f64,
    ) -> Self {
        Self {
            bandwidth_meter,
            buffer,
            mpd_provider,
            panic_buffer,
            safe_buffer,
            last_selections: None,
        }
    }
}

impl AbrController for DashAbr {
    fn update_selection(&mut self, adaptation_sets: &IndexMap<u32, AdaptationSet>, _index: u64) -> HashMap<u32, u32> {
        let available = self.bandwidth_meter.bandwidth() * ABR_SAFETY_FACTOR;
        let budgets = per_set_budget(adaptation_sets, available);
        let ideal: HashMap<u32, u32> = adaptation_sets
            .values()
            .map(|set| (set.id, ideal_by_bandwidth(set, budgets[&set.id])))
            .collect();

        let buffer_level = self.buffer.buffer_level();
        let max_segment_duration = self
            .mpd_provider
            .mpd()
            .map(|mpd| mpd.max_segment_duration)
            .unwrap_or(0.0);

        let selections = match &self.last_selections {
            None => ideal,
            Some(last) => adaptation_sets
                .values()
                .filter_map(|set| {
                    let ideal_repr = set.representations.get(ideal.get(&set.id)?)?;
                    // A representation from the previous manifest may be gone
                    let last_repr = last
                        .get(&set.id)
                        .and_then(|id| set.representations.get(id))
                        .unwrap_or(ideal_repr);

                    let chosen = if buffer_level < self.panic_buffer {
                        debug!(buffer_level, panic_buffer = self.panic_buffer, "panic band");
                        if last_repr.bandwidth < ideal_repr.bandwidth {
                            last_repr.id
                        } else {
                            ideal_repr.id
                        }
                    } else if buffer_level > self.safe_buffer && last_repr.bandwidth > ideal_repr.bandwidth {
                        // Time to fetch one more segment at the joint rate
                        let budget = budgets[&set.id];
                        let next_segment_download_time =
                            (last_repr.bandwidth + ideal_repr.bandwidth) as f64 * max_segment_duration / budget;
                        debug!(buffer_level, next_segment_download_time, "safe band");
                        if next_segment_download_time <= buffer_level {
                            last_repr.id
                        } else {
                            ideal_repr.id
                        }
                    } else {
                        ideal_repr.id
                    };
                    Some((set.id, chosen))
                })
                .collect(),
        };

        self.last_selections = Some(selections.clone());
        selections
    }
}
