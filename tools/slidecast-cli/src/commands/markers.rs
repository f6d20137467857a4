//! Parse inline markers out of narration text.

use std::path::PathBuf;

use serde::Serialize;
use slidecast_narration_model::{parse_markers, Anchor, Marker};

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct MarkerReport<'a> {
    clean_text: &'a str,
    word_count: usize,
    markers: &'a [Marker],
}

pub fn run(text: Option<String>, file: Option<PathBuf>, json: bool) -> anyhow::Result<()> {
    let text = match (text, file) {
        (Some(text), _) => text,
        (None, Some(path)) => std::fs::read_to_string(&path)
            .map_err(|e| anyhow::anyhow!("Failed to read {}: {e}", path.display()))?,
        (None, None) => anyhow::bail!("Pass narration text or --file"),
    };

    let parsed = parse_markers(&text);

    if json {
        let report = MarkerReport {
            clean_text: &parsed.clean_text,
            word_count: parsed.word_count(),
            markers: &parsed.markers,
        };
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("Clean text: {}", parsed.clean_text);
    println!("Words: {}", parsed.word_count());

    if parsed.markers.is_empty() {
        println!("No markers.");
        return Ok(());
    }

    let words: Vec<&str> = parsed.clean_text.split_whitespace().collect();
    println!("\nMarkers:");
    for marker in &parsed.markers {
        let edge = match marker.anchor {
            Anchor::Start => "start of",
            Anchor::End => "end of",
        };
        let word = usize::try_from(marker.word_index)
            .ok()
            .and_then(|i| words.get(i));
        match word {
            Some(word) => println!(
                "  {:<16} {edge} word {} ({word:?})",
                marker.id, marker.word_index
            ),
            None => println!(
                "  {:<16} {edge} word {} (no such word, will not resolve)",
                marker.id, marker.word_index
            ),
        }
    }

    Ok(())
}
