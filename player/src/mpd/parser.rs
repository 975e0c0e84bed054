use indexmap::IndexMap;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use regex::Regex;
use std::collections::{BTreeMap, HashMap};
use tracing::debug;

use crate::error::{PlayerError, Result};
use crate::mpd::{AdaptationSet, ContentType, Mpd, MpdType, Representation, Segment};

/// Parse an MPD document. `url` is the manifest location; segment URLs are
/// resolved against its directory.
pub fn parse_mpd(content: &str, url: &str) -> Result<Mpd> {
    MpdDocParser::new(url).parse(content)
}

struct MpdDocParser {
    url: String,
    base_url: String,
}

/// A SegmentTemplate under construction, possibly still collecting
/// SegmentTimeline entries.
#[derive(Default, Clone)]
struct TemplateBuilder {
    attrs: HashMap<String, String>,
    timeline: Vec<TimelineEntry>,
}

#[derive(Clone, Copy)]
struct TimelineEntry {
    d: u64,
    t: Option<u64>,
    r: u64,
}

#[derive(Default)]
struct RepresentationBuilder {
    attrs: HashMap<String, String>,
    template: Option<TemplateBuilder>,
}

struct AdaptationSetBuilder {
    attrs: HashMap<String, String>,
    index: usize,
    template: Option<TemplateBuilder>,
    representations: IndexMap<u32, Representation>,
}

impl MpdDocParser {
    fn new(url: &str) -> Self {
        // base_url is the directory of the MPD location plus a trailing slash
        let base_url = url
            .rsplit_once('/')
            .map(|(dir, _)| format!("{}/", dir))
            .unwrap_or_default();
        Self { url: url.to_string(), base_url }
    }

    fn parse(&self, content: &str) -> Result<Mpd> {
        let content = strip_default_namespace(content);
        let mut reader = Reader::from_str(&content);
        let mut buf = Vec::new();

        let mut mpd_attrs: Option<HashMap<String, String>> = None;
        let mut in_first_period = false;
        let mut first_period_done = false;
        let mut as_index = 0usize;
        let mut adaptation_sets: IndexMap<u32, AdaptationSet> = IndexMap::new();
        let mut current_as: Option<AdaptationSetBuilder> = None;
        let mut current_rep: Option<RepresentationBuilder> = None;
        let mut open_template: Option<TemplateBuilder> = None;

        loop {
            let event = reader
                .read_event_into(&mut buf)
                .map_err(|e| PlayerError::MpdParse(format!("invalid XML: {e}")))?;

            match event {
                Event::Start(ref e) | Event::Empty(ref e) => {
                    let self_closing = matches!(&event, Event::Empty(_));
                    let name = e.name().to_owned();
                    let tag = std::str::from_utf8(name.as_ref())
                        .map_err(|e| PlayerError::MpdParse(e.to_string()))?;

                    match tag {
                        "MPD" => {
                            mpd_attrs = Some(collect_attrs(e)?);
                        }
                        "Period" if !self_closing => {
                            if !first_period_done {
                                in_first_period = true;
                            }
                        }
                        "AdaptationSet" if in_first_period => {
                            current_as = Some(AdaptationSetBuilder {
                                attrs: collect_attrs(e)?,
                                index: as_index,
                                template: None,
                                representations: IndexMap::new(),
                            });
                            as_index += 1;
                            if self_closing {
                                // An empty adaptation set carries no representations
                                current_as = None;
                            }
                        }
                        "Representation" if current_as.is_some() => {
                            let builder = RepresentationBuilder {
                                attrs: collect_attrs(e)?,
                                template: None,
                            };
                            if self_closing {
                                self.finish_representation(builder, &mut current_as, mpd_attrs.as_ref())?;
                            } else {
                                current_rep = Some(builder);
                            }
                        }
                        "SegmentTemplate" => {
                            let template = TemplateBuilder {
                                attrs: collect_attrs(e)?,
                                timeline: Vec::new(),
                            };
                            if self_closing {
                                self.assign_template(template, &mut current_rep, &mut current_as);
                            } else {
                                open_template = Some(template);
                            }
                        }
                        "S" => {
                            if let Some(template) = open_template.as_mut() {
                                template.timeline.push(parse_timeline_entry(e)?);
                            }
                        }
                        _ => {}
                    }
                }

                Event::End(ref e) => {
                    let name = e.name().to_owned();
                    let tag = std::str::from_utf8(name.as_ref())
                        .map_err(|e| PlayerError::MpdParse(e.to_string()))?;

                    match tag {
                        "Period" => {
                            if in_first_period {
                                in_first_period = false;
                                first_period_done = true;
                            }
                        }
                        "SegmentTemplate" => {
                            if let Some(template) = open_template.take() {
                                self.assign_template(template, &mut current_rep, &mut current_as);
                            }
                        }
                        "Representation" => {
                            if let Some(builder) = current_rep.take() {
                                self.finish_representation(builder, &mut current_as, mpd_attrs.as_ref())?;
                            }
                        }
                        "AdaptationSet" => {
                            if let Some(builder) = current_as.take() {
                                if let Some(set) = finish_adaptation_set(builder)? {
                                    adaptation_sets.insert(set.id, set);
                                }
                            }
                        }
                        _ => {}
                    }
                }

                Event::Eof => break,
                _ => {}
            }

            buf.clear();
        }

        let attrs = mpd_attrs.ok_or_else(|| PlayerError::MpdParse("missing MPD element".into()))?;
        let mpd_type = match attrs.get("type").map(String::as_str) {
            Some("static") => MpdType::Static,
            Some("dynamic") => MpdType::Dynamic,
            Some(other) => {
                return Err(PlayerError::MpdParse(format!("unsupported MPD type {other:?}")));
            }
            None => return Err(PlayerError::MpdParse("MPD element has no type attribute".into())),
        };

        Ok(Mpd {
            url: self.url.clone(),
            mpd_type,
            media_presentation_duration: parse_iso8601_duration(attrs.get("mediaPresentationDuration")),
            max_segment_duration: parse_iso8601_duration(attrs.get("maxSegmentDuration")),
            min_buffer_time: parse_iso8601_duration(attrs.get("minBufferTime")),
            adaptation_sets,
        })
    }

    /// Attach a closed SegmentTemplate to the representation being parsed,
    /// or to the surrounding adaptation set (GPAC puts it there).
    fn assign_template(
        &self,
        template: TemplateBuilder,
        current_rep: &mut Option<RepresentationBuilder>,
        current_as: &mut Option<AdaptationSetBuilder>,
    ) {
        if let Some(rep) = current_rep.as_mut() {
            rep.template = Some(template);
        } else if let Some(set) = current_as.as_mut() {
            set.template = Some(template);
        }
    }

    fn finish_representation(
        &self,
        builder: RepresentationBuilder,
        current_as: &mut Option<AdaptationSetBuilder>,
        mpd_attrs: Option<&HashMap<String, String>>,
    ) -> Result<()> {
        let Some(set_builder) = current_as.as_mut() else {
            return Ok(());
        };
        let media_presentation_duration =
            parse_iso8601_duration(mpd_attrs.and_then(|a| a.get("mediaPresentationDuration")));

        let attrs = &builder.attrs;
        let id_str = attrs
            .get("id")
            .ok_or_else(|| PlayerError::MpdParse("Representation has no id".into()))?
            .clone();
        let id: u32 = id_str
            .parse()
            .map_err(|_| PlayerError::MpdParse(format!("non-numeric Representation id {id_str:?}")))?;
        let bandwidth: u64 = attrs
            .get("bandwidth")
            .and_then(|b| b.parse().ok())
            .ok_or_else(|| PlayerError::MpdParse(format!("Representation {id} has no bandwidth")))?;

        let as_id = adaptation_set_id(set_builder);
        let template = builder
            .template
            .or_else(|| set_builder.template.clone())
            .ok_or_else(|| PlayerError::MpdParse(format!("Representation {id} has no SegmentTemplate")))?;

        let initialization = format!(
            "{}{}",
            self.base_url,
            template
                .attrs
                .get("initialization")
                .cloned()
                .unwrap_or_default()
                .replace("$RepresentationID$", &id_str)
        );
        let media = template
            .attrs
            .get("media")
            .cloned()
            .unwrap_or_default()
            .replace("$RepresentationID$", &id_str);
        let timescale: u64 = template
            .attrs
            .get("timescale")
            .and_then(|t| t.parse().ok())
            .unwrap_or(1);
        let start_number: u64 = template
            .attrs
            .get("startNumber")
            .and_then(|n| n.parse().ok())
            .unwrap_or(1);

        let mut segments: BTreeMap<u64, Segment> = BTreeMap::new();
        let mut num = start_number;
        let mut start_time = 0.0f64;

        if !template.timeline.is_empty() {
            for entry in &template.timeline {
                let duration = entry.d as f64 / timescale as f64;
                if let Some(t) = entry.t {
                    start_time = t as f64 / timescale as f64;
                }
                for _ in 0..=entry.r {
                    let url = format!("{}{}", self.base_url, fill_number(&media, num));
                    segments.insert(
                        num,
                        Segment {
                            url,
                            init_url: initialization.clone(),
                            duration,
                            start_time,
                            as_id,
                            repr_id: id,
                        },
                    );
                    num += 1;
                    start_time += duration;
                }
            }
        } else {
            let duration_val: f64 = template
                .attrs
                .get("duration")
                .and_then(|d| d.parse().ok())
                .ok_or_else(|| {
                    PlayerError::MpdParse(format!("Representation {id} has neither SegmentTimeline nor duration"))
                })?;
            let num_segments = ((media_presentation_duration * timescale as f64) / duration_val).ceil() as u64;
            let duration = duration_val / timescale as f64;
            debug!(num_segments, duration, "flat segment template");
            for _ in 0..num_segments {
                let url = format!("{}{}", self.base_url, fill_number(&media, num));
                segments.insert(
                    num,
                    Segment {
                        url,
                        init_url: initialization.clone(),
                        duration,
                        start_time,
                        as_id,
                        repr_id: id,
                    },
                );
                num += 1;
                start_time += duration;
            }
        }

        set_builder.representations.insert(
            id,
            Representation {
                id,
                mime_type: attrs.get("mimeType").cloned().unwrap_or_default(),
                codecs: attrs.get("codecs").cloned().unwrap_or_default(),
                bandwidth,
                width: attrs.get("width").and_then(|w| w.parse().ok()).unwrap_or(0),
                height: attrs.get("height").and_then(|h| h.parse().ok()).unwrap_or(0),
                initialization,
                segments,
            },
        );
        Ok(())
    }
}

fn adaptation_set_id(builder: &AdaptationSetBuilder) -> u32 {
    builder
        .attrs
        .get("id")
        .and_then(|id| id.parse().ok())
        .unwrap_or(builder.index as u32)
}

fn finish_adaptation_set(builder: AdaptationSetBuilder) -> Result<Option<AdaptationSet>> {
    let id = adaptation_set_id(&builder);

    let content_type = builder
        .attrs
        .get("contentType")
        .cloned()
        .unwrap_or_else(|| infer_content_type(builder.attrs.get("mimeType").map(String::as_str).unwrap_or("")).to_string());
    let content_type = match content_type.to_ascii_lowercase().as_str() {
        "video" => ContentType::Video,
        "audio" => ContentType::Audio,
        other => {
            debug!("skipping adaptation set {id} with content type {other:?}");
            return Ok(None);
        }
    };

    if builder.representations.is_empty() {
        debug!("skipping adaptation set {id} without representations");
        return Ok(None);
    }

    Ok(Some(AdaptationSet {
        id,
        content_type,
        frame_rate: builder.attrs.get("frameRate").cloned(),
        max_width: builder.attrs.get("maxWidth").and_then(|w| w.parse().ok()).unwrap_or(0),
        max_height: builder.attrs.get("maxHeight").and_then(|h| h.parse().ok()).unwrap_or(0),
        par: builder.attrs.get("par").cloned(),
        representations: builder.representations,
    }))
}

fn parse_timeline_entry(e: &BytesStart) -> Result<TimelineEntry> {
    let attrs = collect_attrs(e)?;
    let d = attrs
        .get("d")
        .and_then(|d| d.parse().ok())
        .ok_or_else(|| PlayerError::MpdParse("SegmentTimeline entry has no duration".into()))?;
    Ok(TimelineEntry {
        d,
        t: attrs.get("t").and_then(|t| t.parse().ok()),
        r: attrs.get("r").and_then(|r| r.parse().ok()).unwrap_or(0),
    })
}

fn collect_attrs(e: &BytesStart) -> Result<HashMap<String, String>> {
    let mut map = HashMap::new();
    for attr in e.attributes() {
        let attr = attr.map_err(|e| PlayerError::MpdParse(format!("bad attribute: {e}")))?;
        let key = std::str::from_utf8(attr.key.as_ref())
            .map_err(|e| PlayerError::MpdParse(e.to_string()))?
            .to_string();
        let value = attr
            .unescape_value()
            .map_err(|e| PlayerError::MpdParse(format!("bad attribute value: {e}")))?
            .to_string();
        map.insert(key, value);
    }
    Ok(map)
}

fn infer_content_type(mime_type: &str) -> &'static str {
    if mime_type.contains("audio") {
        "audio"
    } else {
        "video"
    }
}

/// Remove the default namespace declaration so tag names match unqualified.
fn strip_default_namespace(content: &str) -> String {
    let re = Regex::new(r#"xmlns="[^"]+""#).unwrap();
    re.replace(content, "").to_string()
}

/// Substitute `$Number$` / `$Number%05d$` placeholders with the segment number.
fn fill_number(template: &str, segment_number: u64) -> String {
    let re = Regex::new(r"\$Number(?:%0(\d+)d)?\$").unwrap();
    re.replace_all(template, |caps: &regex::Captures| {
        if let Some(width) = caps.get(1) {
            format!("{:0width$}", segment_number, width = width.as_str().parse::<usize>().unwrap_or(1))
        } else {
            segment_number.to_string()
        }
    })
    .to_string()
}

/// Parse the `PT[nH][nM][nS]` subset of ISO 8601 durations to seconds.
fn parse_iso8601_duration(value: Option<&String>) -> f64 {
    match value.map(String::as_str) {
        None | Some("") => 0.0,
        Some(v) => iso8601_duration::Duration::parse(v)
            .ok()
            .and_then(|d| d.to_std())
            .map(|d| d.as_secs_f64())
            .unwrap_or(0.0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MANIFEST: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<MPD xmlns="urn:mpeg:dash:schema:mpd:2011" type="static" mediaPresentationDuration="PT4S" maxSegmentDuration="PT1S" minBufferTime="PT2S">
  <Period>
    <AdaptationSet id="0" contentType="video" maxWidth="1920" maxHeight="1080" frameRate="30">
      <Representation id="0" mimeType="video/mp4" codecs="avc1.64001f" bandwidth="50000" width="640" height="360">
        <SegmentTemplate initialization="init-$RepresentationID$.mp4" media="chunk-$RepresentationID$-$Number%05d$.m4s" timescale="1000" duration="1000" startNumber="1"/>
      </Representation>
      <Representation id="1" mimeType="video/mp4" codecs="avc1.64001f" bandwidth="100000" width="1280" height="720">
        <SegmentTemplate initialization="init-$RepresentationID$.mp4" media="chunk-$RepresentationID$-$Number%05d$.m4s" timescale="1000" duration="1000" startNumber="1"/>
      </Representation>
    </AdaptationSet>
  </Period>
</MPD>"#;

    #[test]
    fn parses_static_manifest() {
        let mpd = parse_mpd(MANIFEST, "/tmp/media/manifest.mpd").unwrap();
        assert_eq!(mpd.mpd_type, MpdType::Static);
        assert_eq!(mpd.media_presentation_duration, 4.0);
        assert_eq!(mpd.max_segment_duration, 1.0);
        assert_eq!(mpd.min_buffer_time, 2.0);
        assert_eq!(mpd.adaptation_sets.len(), 1);

        let set = &mpd.adaptation_sets[&0];
        assert_eq!(set.content_type, ContentType::Video);
        assert_eq!(set.representations.len(), 2);

        let rep = &set.representations[&0];
        assert_eq!(rep.bandwidth, 50_000);
        assert_eq!(rep.segments.len(), 4);
        assert_eq!(rep.initialization, "/tmp/media/init-0.mp4");

        let seg = &rep.segments[&1];
        assert_eq!(seg.url, "/tmp/media/chunk-0-00001.m4s");
        assert_eq!(seg.duration, 1.0);
        assert_eq!(seg.start_time, 0.0);
        assert_eq!(seg.as_id, 0);
        assert_eq!(seg.repr_id, 0);

        // Segment numbering is contiguous and identical across representations
        let numbers: Vec<u64> = rep.segments.keys().copied().collect();
        assert_eq!(numbers, vec![1, 2, 3, 4]);
        let other: Vec<u64> = set.representations[&1].segments.keys().copied().collect();
        assert_eq!(numbers, other);
    }

    #[test]
    fn parses_segment_timeline_with_repeats() {
        let manifest = r#"<MPD type="static" mediaPresentationDuration="PT10S">
  <Period>
    <AdaptationSet id="3" contentType="video">
      <Representation id="7" bandwidth="800000">
        <SegmentTemplate initialization="i-$RepresentationID$.mp4" media="s-$RepresentationID$-$Number$.m4s" timescale="90000" startNumber="1">
          <SegmentTimeline>
            <S t="0" d="180000" r="2"/>
            <S d="90000"/>
          </SegmentTimeline>
        </SegmentTemplate>
      </Representation>
    </AdaptationSet>
  </Period>
</MPD>"#;
        let mpd = parse_mpd(manifest, "http://example.com/live/feed.mpd").unwrap();
        let rep = &mpd.adaptation_sets[&3].representations[&7];
        assert_eq!(rep.segments.len(), 4);
        assert_eq!(rep.segments[&1].duration, 2.0);
        assert_eq!(rep.segments[&3].start_time, 4.0);
        assert_eq!(rep.segments[&4].duration, 1.0);
        assert_eq!(rep.segments[&4].start_time, 6.0);
        assert_eq!(rep.segments[&2].url, "http://example.com/live/s-7-2.m4s");
    }

    #[test]
    fn template_at_adaptation_set_level() {
        let manifest = r#"<MPD type="static" mediaPresentationDuration="PT2S">
  <Period>
    <AdaptationSet id="1" contentType="audio">
      <SegmentTemplate initialization="a-$RepresentationID$-init.mp4" media="a-$RepresentationID$-$Number$.m4s" timescale="1" duration="1" startNumber="1"/>
      <Representation id="4" bandwidth="64000" mimeType="audio/mp4"/>
    </AdaptationSet>
  </Period>
</MPD>"#;
        let mpd = parse_mpd(manifest, "http://example.com/a/b.mpd").unwrap();
        let set = &mpd.adaptation_sets[&1];
        assert_eq!(set.content_type, ContentType::Audio);
        let rep = &set.representations[&4];
        assert_eq!(rep.segments.len(), 2);
        assert_eq!(rep.initialization, "http://example.com/a/a-4-init.mp4");
        assert_eq!(rep.segments[&2].url, "http://example.com/a/a-4-2.m4s");
    }

    #[test]
    fn rejects_manifest_without_type() {
        let manifest = r#"<MPD mediaPresentationDuration="PT2S"><Period/></MPD>"#;
        assert!(parse_mpd(manifest, "x.mpd").is_err());
    }

    #[test]
    fn number_width_formatting() {
        assert_eq!(fill_number("seg-$Number$.m4s", 7), "seg-7.m4s");
        assert_eq!(fill_number("seg-$Number%05d$.m4s", 7), "seg-00007.m4s");
        assert_eq!(fill_number("seg-$Number%05d$.m4s", 123456), "seg-123456.m4s");
    }

    #[test]
    fn iso8601_durations() {
        assert_eq!(parse_iso8601_duration(Some(&"PT1H2M3S".to_string())), 3723.0);
        assert_eq!(parse_iso8601_duration(Some(&"PT0.5S".to_string())), 0.5);
        assert_eq!(parse_iso8601_duration(None), 0.0);
    }
}
