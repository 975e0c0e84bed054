use indexmap::IndexMap;
use std::collections::HashMap;
use std::sync::Arc;

use crate::abr::{ideal_by_bandwidth, per_set_budget, AbrController, ABR_SAFETY_FACTOR};
use crate::buffer::BufferManager;
use crate::bw_meter::BandwidthMeter;
use crate::mpd::AdaptationSet;

/// Like the default policy but without the download-time check: above the
/// safe band a higher last selection is simply kept.
pub struct HybridAbr {
    bandwidth_meter: Arc<dyn BandwidthMeter>,
    buffer: Arc<BufferManager>,
    panic_buffer: f64,
    safe_buffer: f64,
    last_selections: Option<HashMap<u32, u32>>,
}

impl HybridAbr {
    pub fn new(
        bandwidth_meter: Arc<dyn BandwidthMeter>,
        buffer: Arc<BufferManager>,
        panic_buffer: f64,
        safe_buffer: f64,
    ) -> Self {
        Self {
            bandwidth_meter,
            buffer,
            panic_buffer,
            safe_buffer,
            last_selections: None,
        }
    }
}

impl AbrController for HybridAbr {
    fn update_selection(&mut self, adaptation_sets: &IndexMap<u32, AdaptationSet>, _index: u64) -> HashMap<u32, u32> {
        let available = self.bandwidth_meter.bandwidth() * ABR_SAFETY_FACTOR;
        let budgets = per_set_budget(adaptation_sets, available);
        let ideal: HashMap<u32, u32> = adaptation_sets
            .values()
            .map(|set| (set.id, ideal_by_bandwidth(set, budgets[&set.id])))
            .collect();

        let buffer_level = self.buffer.buffer_level();
        let selections = match &self.last_selections {
            None => ideal,
            Some(last) => adaptation_sets
                .values()
                .filter_map(|set| {
                    let ideal_repr = set.representations.get(ideal.get(&set.id)?)?;
                    let last_repr = last
                        .get(&set.id)
                        .and_then(|id| set.representations.get(id))
                        .unwrap_or(ideal_repr);

                    let chosen = if buffer_level < self.panic_buffer {
                        if last_repr.bandwidth < ideal_repr.bandwidth {
                            last_repr.id
                        } else {
                            ideal_repr.id
                        }
                    } else if buffer_level > self.safe_buffer && last_repr.bandwidth > ideal_repr.bandwidth {
                        last_repr.id
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::abr::test_support::*;
    use crate::bw_meter::DownloadStats;
    use crate::events::BandwidthUpdateListener;
    use crate::mpd::{ContentType, Segment};

    struct FixedMeter(f64);

    impl BandwidthMeter for FixedMeter {
        fn bandwidth(&self) -> f64 {
            self.0
        }

        fn stats(&self, _url: &str) -> Option<DownloadStats> {
            None
        }

        fn add_listener(&self, _listener: Arc<dyn BandwidthUpdateListener>) {}
    }

    #[tokio::test]
    async fn safe_band_keeps_higher_last_selection() {
        let sets = sets(vec![adaptation_set(0, ContentType::Video, &[100_000, 400_000], 4)]);
        let buffer = Arc::new(BufferManager::new());

        let mut abr = HybridAbr::new(Arc::new(FixedMeter(1_000_000.0)), buffer.clone(), 2.5, 6.0);
        let first = abr.update_selection(&sets, 1);
        assert_eq!(sets[&0].representations[&first[&0]].bandwidth, 400_000);

        let mut group = std::collections::HashMap::new();
        group.insert(
            0,
            Segment {
                url: "x.m4s".into(),
                init_url: "x-init.mp4".into(),
                duration: 7.0,
                start_time: 0.0,
                as_id: 0,
                repr_id: 0,
            },
        );
        buffer.enqueue_buffer(group).await;

        // Even with the estimate collapsed, 7 s of buffer keeps the last choice
        abr.bandwidth_meter = Arc::new(FixedMeter(200_000.0));
        let second = abr.update_selection(&sets, 2);
        assert_eq!(sets[&0].representations[&second[&0]].bandwidth, 400_000);
    }
}
