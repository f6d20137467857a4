//! Validate a demo bundle.

use std::path::PathBuf;

use slidecast_narration_model::LoadedDemo;

pub fn run(path: PathBuf) -> anyhow::Result<()> {
    println!("Validating demo at: {}", path.display());

    let demo =
        LoadedDemo::load(&path).map_err(|e| anyhow::anyhow!("Failed to load demo: {e}"))?;
    let p = &demo.presentation;

    let segments: usize = p.slides.iter().map(|s| s.segments.len()).sum();
    let aligned = p
        .slides
        .iter()
        .flat_map(|slide| {
            let key = slide.alignment_key();
            slide
                .segments
                .iter()
                .map(move |seg| (key.clone(), seg.id.clone()))
        })
        .filter(|(key, id)| demo.alignment.entry(key, id).is_some())
        .count();

    println!("  ID: {}", p.id);
    println!("  Title: {}", p.title);
    println!("  Slides: {}", p.slide_count());
    println!("  Segments: {segments} ({aligned} aligned)");
    println!("  Videos: {}", demo.bookmarks.len());

    let mut issues = p.validate(&demo.bookmarks);
    issues.extend(demo.validate_sources());

    if issues.is_empty() {
        println!("  Triggers: All resolvable");
        println!("  Sources: All present");
        println!("\nDemo is valid.");
    } else {
        println!("\nValidation issues:");
        for issue in &issues {
            println!("  - {issue}");
        }
        println!(
            "\n{} issue(s) found. Playback will skip what it cannot resolve.",
            issues.len()
        );
    }

    Ok(())
}
