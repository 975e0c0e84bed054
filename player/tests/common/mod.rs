use std::fs;
use std::path::{Path, PathBuf};

pub struct FixtureSet {
    pub id: u32,
    pub content_type: &'static str,
    pub bitrates: Vec<u64>,
}

impl FixtureSet {
    pub fn video(id: u32, bitrates: &[u64]) -> Self {
        Self { id, content_type: "video", bitrates: bitrates.to_vec() }
    }

    pub fn audio(id: u32, bitrates: &[u64]) -> Self {
        Self { id, content_type: "audio", bitrates: bitrates.to_vec() }
    }
}

/// Write a static manifest plus init/media files sized to their bitrate.
/// Segment numbering starts at 1; every representation carries the same
/// `num_segments` segments of `segment_duration` seconds.
pub fn write_fixture(dir: &Path, sets: &[FixtureSet], num_segments: u64, segment_duration: u64) -> PathBuf {
    let mut xml = format!(
        concat!(
            "<?xml version=\"1.0\" encoding=\"utf-8\"?>\n",
            "<MPD xmlns=\"urn:mpeg:dash:schema:mpd:2011\" type=\"static\" ",
            "mediaPresentationDuration=\"PT{}S\" maxSegmentDuration=\"PT{}S\" minBufferTime=\"PT2S\">\n",
            "  <Period>\n",
        ),
        num_segments * segment_duration,
        segment_duration
    );

    for set in sets {
        xml.push_str(&format!(
            "    <AdaptationSet id=\"{}\" contentType=\"{}\">\n",
            set.id, set.content_type
        ));
        for (rep_id, bitrate) in set.bitrates.iter().enumerate() {
            xml.push_str(&format!(
                concat!(
                    "      <Representation id=\"{rep_id}\" mimeType=\"video/mp4\" codecs=\"avc1.64001f\" ",
                    "bandwidth=\"{bitrate}\" width=\"1280\" height=\"720\">\n",
                    "        <SegmentTemplate initialization=\"init-a{as_id}-r$RepresentationID$.mp4\" ",
                    "media=\"chunk-a{as_id}-r$RepresentationID$-$Number%05d$.m4s\" ",
                    "timescale=\"1000\" duration=\"{duration_ts}\" startNumber=\"1\"/>\n",
                    "      </Representation>\n",
                ),
                rep_id = rep_id,
                bitrate = bitrate,
                as_id = set.id,
                duration_ts = segment_duration * 1000,
            ));

            fs::write(dir.join(format!("init-a{}-r{}.mp4", set.id, rep_id)), vec![0u8; 120]).unwrap();
            let segment_bytes = (*bitrate as usize * segment_duration as usize) / 8;
            for num in 1..=num_segments {
                fs::write(
                    dir.join(format!("chunk-a{}-r{}-{:05}.m4s", set.id, rep_id, num)),
                    vec![0u8; segment_bytes],
                )
                .unwrap();
            }
        }
        xml.push_str("    </AdaptationSet>\n");
    }

    xml.push_str("  </Period>\n</MPD>\n");
    let mpd_path = dir.join("manifest.mpd");
    fs::write(&mpd_path, xml).unwrap();
    mpd_path
}
