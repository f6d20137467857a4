//! Show the resolved timing cascade of a demo.

use std::path::PathBuf;

use slidecast_narration_model::LoadedDemo;

pub fn run(path: PathBuf) -> anyhow::Result<()> {
    let demo =
        LoadedDemo::load(&path).map_err(|e| anyhow::anyhow!("Failed to load demo: {e}"))?;
    let p = &demo.presentation;

    let first = p.timing_for(0, None);
    println!("Demo: {} ({})", p.title, p.id);
    println!("  Lead-in: {}ms", first.before_first_slide);
    println!();

    for (slide_index, slide) in p.slides.iter().enumerate() {
        println!(
            "Slide {} [{}]{}",
            slide_index,
            slide.alignment_key(),
            slide
                .title
                .as_deref()
                .map(|t| format!(" {t}"))
                .unwrap_or_default()
        );

        if slide.segments.is_empty() {
            println!("  (no narration, advances after the empty-slide delay)");
        }

        for (segment_index, segment) in slide.segments.iter().enumerate() {
            let timing = p.timing_for(slide_index, Some(segment_index));
            let gap = if segment_index + 1 < slide.segments.len() {
                format!("then {}ms to next segment", timing.between_segments)
            } else if p.is_last_slide(slide_index) {
                format!("then {}ms final hold", timing.after_final_slide)
            } else {
                format!("then {}ms to next slide", timing.between_slides)
            };
            println!("  {:<12} {gap}", segment.id);
            for (name, ms) in &timing.custom {
                println!("  {:<12}   custom {name}: {ms}ms", "");
            }
        }

        println!();
    }

    Ok(())
}
