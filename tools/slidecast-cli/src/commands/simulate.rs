//! Play a demo against simulated audio and video.
//!
//! Segment audio "plays" for its aligned length and every video referenced
//! in the bookmarks gets a simulated player, so a demo's sequencing and
//! clip sync can be checked without a UI.

use std::path::PathBuf;
use std::time::Duration;

use slidecast_common::clock::SessionClock;
use slidecast_common::config::PlaybackDefaults;
use slidecast_narration_model::LoadedDemo;
use slidecast_playback_engine::{
    event_channel, Orchestrator, PlaybackController, PlaybackDriver, PlaybackMode,
    PlaybackSnapshot, PlaybackState, SimulatedMediaBackend, SimulatedVideoPlayer,
};
use tokio::sync::watch;

pub async fn run(
    path: PathBuf,
    defaults: PlaybackDefaults,
    start_at: Option<(usize, usize)>,
    clip_secs: f64,
    json: bool,
) -> anyhow::Result<()> {
    if !(clip_secs.is_finite() && clip_secs >= 0.0) {
        anyhow::bail!("--clip-secs must be a non-negative number");
    }

    let demo =
        LoadedDemo::load(&path).map_err(|e| anyhow::anyhow!("Failed to load demo: {e}"))?;
    let title = demo.presentation.title.clone();
    let video_ids: Vec<String> = demo.bookmarks.video_ids().map(str::to_string).collect();

    let (sink, events) = event_channel();
    let backend = SimulatedMediaBackend::from_demo(&demo, sink.clone());
    let mut orchestrator = Orchestrator::new(demo, Box::new(backend), defaults);
    for video_id in &video_ids {
        let player = SimulatedVideoPlayer::new(sink.clone(), Duration::from_secs_f64(clip_secs));
        orchestrator.register_player(video_id, Box::new(player));
    }
    drop(sink);

    let (driver, controller) = PlaybackDriver::new(orchestrator, events);
    let clock = SessionClock::start();

    if !json {
        println!("Simulating: {title}");
        println!("  Started: {}", clock.epoch_wall());
        println!("  Players: {}", video_ids.len());
        println!();
    }

    let printer = print_changes(controller.subscribe(), clock.clone(), json);

    let manual = start_at.is_some();
    let driver = match start_at {
        None => {
            controller.start()?;
            driver
        }
        Some((slide, segment)) => {
            controller.set_mode(PlaybackMode::Manual)?;
            controller.goto(slide, segment)?;
            driver.keep_alive()
        }
    };

    let run = driver.run();
    tokio::pin!(run);
    let last = tokio::select! {
        last = &mut run => last,
        _ = stop_signal(&controller, manual) => {
            controller.stop()?;
            run.await
        }
    };

    drop(controller);
    printer.await?;

    if !json {
        println!();
        println!(
            "Finished in {:.2}s ({})",
            clock.elapsed_secs(),
            state_label(&last.state)
        );
    }

    Ok(())
}

/// Resolves when the session should be stopped from outside: on Ctrl-C,
/// or for manual sessions once the deck has played through.
async fn stop_signal(controller: &PlaybackController, manual: bool) {
    let interrupt = async {
        if tokio::signal::ctrl_c().await.is_err() {
            std::future::pending::<()>().await;
        }
        tracing::info!("Interrupted");
    };

    if manual {
        tokio::select! {
            _ = controller.wait_for(|s| s.state == PlaybackState::Complete) => {}
            _ = interrupt => {}
        }
    } else {
        interrupt.await;
    }
}

fn print_changes(
    mut rx: watch::Receiver<PlaybackSnapshot>,
    clock: SessionClock,
    json: bool,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut last: Option<PlaybackSnapshot> = None;
        loop {
            let snapshot = rx.borrow_and_update().clone();
            if last.as_ref().map_or(true, |prev| is_notable(prev, &snapshot)) {
                let at = clock.elapsed_secs();
                if json {
                    match serde_json::to_string(&snapshot) {
                        Ok(line) => println!("{{\"at\":{at:.3},\"snapshot\":{line}}}"),
                        Err(e) => tracing::warn!(error = %e, "Failed to encode snapshot"),
                    }
                } else {
                    println!("{at:>8.2}s  {}", describe(&snapshot));
                }
                last = Some(snapshot);
            }
            if rx.changed().await.is_err() {
                break;
            }
        }
    })
}

/// Frame samples publish continuously; only print what a viewer would notice.
fn is_notable(prev: &PlaybackSnapshot, next: &PlaybackSnapshot) -> bool {
    prev.state != next.state
        || prev.mode != next.mode
        || prev.current_marker != next.current_marker
        || prev.narration_paused != next.narration_paused
}

fn describe(s: &PlaybackSnapshot) -> String {
    let mut line = state_label(&s.state);
    if let Some(id) = &s.segment_id {
        if matches!(s.state, PlaybackState::PlayingSegment { .. }) {
            line.push_str(&format!(" [{id}]"));
        }
    }
    if let Some(marker) = &s.current_marker {
        line.push_str(&format!(" marker={marker} ({:.2}s)", s.time));
    }
    if s.narration_paused {
        line.push_str(" (narration paused for video)");
    }
    line
}

fn state_label(state: &PlaybackState) -> String {
    match state {
        PlaybackState::Idle => "idle".to_string(),
        PlaybackState::StartSilence => "lead-in".to_string(),
        PlaybackState::PlayingSegment { slide, segment } => {
            format!("slide {slide} segment {segment}")
        }
        PlaybackState::ShowingSlide { slide } => format!("slide {slide} (no narration)"),
        PlaybackState::InterSegmentDelay { slide, segment } => {
            format!("gap after slide {slide} segment {segment}")
        }
        PlaybackState::InterSlideDelay { slide } => format!("gap after slide {slide}"),
        PlaybackState::FinalDelay => "final hold".to_string(),
        PlaybackState::Complete => "complete".to_string(),
    }
}
