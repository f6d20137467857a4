//! Resolve marker times for the segments of a demo.

use std::path::PathBuf;

use serde::Serialize;
use slidecast_narration_model::{parse_markers, LoadedDemo, ResolvedMarker, Segment};

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SegmentReport {
    slide: String,
    segment: String,
    aligned: bool,
    words: usize,
    markers: Vec<ResolvedMarker>,
    /// Markers present in the text that did not resolve to a time.
    unresolved: Vec<String>,
}

pub fn run(path: PathBuf, only_slide: Option<String>, json: bool) -> anyhow::Result<()> {
    let demo =
        LoadedDemo::load(&path).map_err(|e| anyhow::anyhow!("Failed to load demo: {e}"))?;

    let mut reports = Vec::new();
    for slide in &demo.presentation.slides {
        let key = slide.alignment_key();
        if only_slide.as_deref().is_some_and(|only| only != key) {
            continue;
        }

        for def in &slide.segments {
            let entry = demo.alignment.entry(&key, &def.id);
            let segment = Segment::build(def, entry);
            let unresolved = def
                .text
                .as_deref()
                .map(|text| {
                    parse_markers(text)
                        .markers
                        .into_iter()
                        .filter(|m| segment.marker_time(&m.id).is_none())
                        .map(|m| m.id)
                        .collect()
                })
                .unwrap_or_default();

            reports.push(SegmentReport {
                slide: key.clone(),
                segment: def.id.clone(),
                aligned: entry.is_some(),
                words: segment.words.len(),
                markers: segment.resolved_markers,
                unresolved,
            });
        }
    }

    if let Some(only) = &only_slide {
        if reports.is_empty() {
            anyhow::bail!("No narrated slide {only} in {}", path.display());
        }
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&reports)?);
        return Ok(());
    }

    for report in &reports {
        let status = if report.aligned {
            format!("{} words", report.words)
        } else {
            "not aligned".to_string()
        };
        println!("{}/{} ({status})", report.slide, report.segment);
        for marker in &report.markers {
            println!("  {:>8.3}s  {}", marker.time, marker.id());
        }
        for id in &report.unresolved {
            println!("  {:>9}  {id} (unresolved)", "-");
        }
    }

    Ok(())
}
