use indexmap::IndexMap;
use std::collections::HashMap;
use std::sync::Arc;

use crate::abr::AbrController;
use crate::buffer::BufferManager;
use crate::mpd::AdaptationSet;

/// Buffer occupancy below which the lowest bitrate is always chosen.
const RESERVOIR: f64 = 0.1;
/// Buffer occupancy above which the highest bitrate is always chosen.
const UPPER_RESERVOIR: f64 = 0.9;

/// Buffer-occupancy policy. Bandwidth is ignored; the chosen bitrate is a
/// piecewise-constant function of how full the buffer is, with the
/// intermediate bitrates spread evenly between the two reservoirs.
pub struct BufferAbr {
    buffer: Arc<BufferManager>,
    buffer_duration: f64,
    rate_maps: HashMap<u32, Vec<(f64, u64)>>,
}

impl BufferAbr {
    pub fn new(buffer: Arc<BufferManager>, buffer_duration: f64) -> Self {
        Self { buffer, buffer_duration, rate_maps: HashMap::new() }
    }

    fn choose(&mut self, set: &AdaptationSet) -> Option<u32> {
        let mut bitrates: Vec<u64> = set.representations.values().map(|r| r.bandwidth).collect();
        if bitrates.is_empty() {
            return None;
        }
        bitrates.sort_unstable();

        let occupancy = self.buffer.buffer_level() / self.buffer_duration;
        let next_bitrate = if occupancy <= RESERVOIR {
            bitrates[0]
        } else if occupancy >= UPPER_RESERVOIR {
            bitrates[bitrates.len() - 1]
        } else {
            let rate_map = self
                .rate_maps
                .entry(set.id)
                .or_insert_with(|| rate_map(&bitrates));
            // Bitrate of the smallest marker at or above the occupancy
            let mut next = bitrates[bitrates.len() - 1];
            for (marker, bitrate) in rate_map.iter().rev() {
                if *marker < occupancy {
                    break;
                }
                next = *bitrate;
            }
            next
        };

        set.representations
            .values()
            .find(|r| r.bandwidth == next_bitrate)
            .map(|r| r.id)
    }
}

/// Markers between the reservoirs in `len(intermediate)+1` equal steps, each
/// assigned the next intermediate bitrate in ascending order.
fn rate_map(bitrates: &[u64]) -> Vec<(f64, u64)> {
    let mut map = vec![(RESERVOIR, bitrates[0])];
    let intermediate = if bitrates.len() > 2 { &bitrates[1..bitrates.len() - 1] } else { &bitrates[0..0] };
    let marker_length = (UPPER_RESERVOIR - RESERVOIR) / (intermediate.len() + 1) as f64;
    let mut marker = RESERVOIR + marker_length;
    for bitrate in intermediate {
        map.push((marker, *bitrate));
        marker += marker_length;
    }
    map.push((UPPER_RESERVOIR, bitrates[bitrates.len() - 1]));
    map
}

impl AbrController for BufferAbr {
    fn update_selection(&mut self, adaptation_sets: &IndexMap<u32, AdaptationSet>, _index: u64) -> HashMap<u32, u32> {
        let set_ids: Vec<u32> = adaptation_sets.keys().copied().collect();
        let mut selections = HashMap::new();
        for id in set_ids {
            if let Some(repr_id) = self.choose(&adaptation_sets[&id]) {
                selections.insert(id, repr_id);
            }
        }
        selections
    }
}
