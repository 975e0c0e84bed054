use indexmap::IndexMap;
use std::collections::HashMap;
use std::sync::Arc;

use crate::abr::{ideal_by_bandwidth, per_set_budget, AbrController, ABR_SAFETY_FACTOR};
use crate::bw_meter::BandwidthMeter;
use crate::mpd::AdaptationSet;

/// Pure throughput-based policy: per set, the highest representation that
/// fits the per-set bandwidth budget.
pub struct BandwidthAbr {
    bandwidth_meter: Arc<dyn BandwidthMeter>,
}

impl BandwidthAbr {
    pub fn new(bandwidth_meter: Arc<dyn BandwidthMeter>) -> Self {
        Self { bandwidth_meter }
    }
}

impl AbrController for BandwidthAbr {
    fn update_selection(&mut self, adaptation_sets: &IndexMap<u32, AdaptationSet>, _index: u64) -> HashMap<u32, u32> {
        let available = self.bandwidth_meter.bandwidth() * ABR_SAFETY_FACTOR;
        let budgets = per_set_budget(adaptation_sets, available);
        adaptation_sets
            .values()
            .map(|set| (set.id, ideal_by_bandwidth(set, budgets[&set.id])))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::abr::test_support::*;
    use crate::bw_meter::DownloadStats;
    use crate::events::BandwidthUpdateListener;
    use crate::mpd::ContentType;

    pub(crate) struct FixedMeter(pub f64);

    impl BandwidthMeter for FixedMeter {
        fn bandwidth(&self) -> f64 {
            self.0
        }

        fn stats(&self, _url: &str) -> Option<DownloadStats> {
            None
        }

        fn add_listener(&self, _listener: Arc<dyn BandwidthUpdateListener>) {}
    }

    #[test]
    fn chooses_highest_fitting_representation() {
        // 1 Mbit/s estimate, one video set: budget = 700 kbit/s
        let mut abr = BandwidthAbr::new(Arc::new(FixedMeter(1_000_000.0)));
        let sets = sets(vec![adaptation_set(0, ContentType::Video, &[100_000, 500_000, 900_000], 4)]);
        let selection = abr.update_selection(&sets, 1);
        assert_eq!(sets[&0].representations[&selection[&0]].bandwidth, 500_000);
    }

    #[test]
    fn falls_back_to_lowest_when_nothing_fits() {
        let mut abr = BandwidthAbr::new(Arc::new(FixedMeter(100_000.0)));
        let sets = sets(vec![adaptation_set(0, ContentType::Video, &[300_000, 500_000], 4)]);
        let selection = abr.update_selection(&sets, 1);
        assert_eq!(sets[&0].representations[&selection[&0]].bandwidth, 300_000);
    }
}
