use indexmap::IndexMap;
use std::collections::HashMap;

use crate::abr::AbrController;
use crate::mpd::{AdaptationSet, Representation};

/// Pins the quality offset instead of adapting: per set, the representation
/// `min(id with the segment) + quality mod n`. Sets where no representation
/// carries the requested segment are omitted.
pub struct FixedAbr {
    quality: u32,
}

impl FixedAbr {
    pub fn new(quality: u32) -> Self {
        Self { quality }
    }
}

impl AbrController for FixedAbr {
    fn update_selection(&mut self, adaptation_sets: &IndexMap<u32, AdaptationSet>, index: u64) -> HashMap<u32, u32> {
        adaptation_sets
            .values()
            .filter_map(|set| {
                let with_index: Vec<&Representation> = set
                    .representations
                    .values()
                    .filter(|r| r.segments.contains_key(&index))
                    .collect();
                let first_repr_id = with_index.iter().map(|r| r.id).min()?;
                Some((set.id, first_repr_id + (self.quality % with_index.len() as u32)))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::abr::test_support::*;
    use crate::mpd::ContentType;

    #[test]
    fn quality_offset_wraps_around() {
        let sets = sets(vec![adaptation_set(0, ContentType::Video, &[100, 200, 300], 4)]);
        assert_eq!(FixedAbr::new(0).update_selection(&sets, 1)[&0], 0);
        assert_eq!(FixedAbr::new(2).update_selection(&sets, 1)[&0], 2);
        assert_eq!(FixedAbr::new(4).update_selection(&sets, 1)[&0], 1);
    }

    #[test]
    fn sets_without_the_segment_are_omitted() {
        let sets = sets(vec![adaptation_set(0, ContentType::Video, &[100, 200], 4)]);
        let selection = FixedAbr::new(0).update_selection(&sets, 99);
        assert!(selection.is_empty());
    }
}
