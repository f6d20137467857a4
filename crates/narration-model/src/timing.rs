//! Layered timing configuration.
//!
//! Every delay the player waits on is resolved from an ordered chain of
//! optional overrides (typically demo → slide → segment) on top of fixed
//! global defaults. Later layers win field by field; `custom` delays
//! accumulate across the chain.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default pause between segments of one slide (ms).
pub const DEFAULT_BETWEEN_SEGMENTS_MS: u64 = 500;
/// Default pause between slides (ms).
pub const DEFAULT_BETWEEN_SLIDES_MS: u64 = 1000;
/// Default hold after the final slide before completing (ms).
pub const DEFAULT_AFTER_FINAL_SLIDE_MS: u64 = 2000;
/// Default silence before the first slide appears (ms).
pub const DEFAULT_BEFORE_FIRST_SLIDE_MS: u64 = 1000;

/// One layer of timing overrides. All durations are milliseconds.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimingConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub between_segments: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub between_slides: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub after_final_slide: Option<u64>,

    /// `0` disables the lead-in silence.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub before_first_slide: Option<u64>,

    /// Named delays for callers that need their own knobs.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub custom: BTreeMap<String, u64>,
}

impl TimingConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_between_segments(mut self, ms: u64) -> Self {
        self.between_segments = Some(ms);
        self
    }

    pub fn with_between_slides(mut self, ms: u64) -> Self {
        self.between_slides = Some(ms);
        self
    }

    pub fn with_after_final_slide(mut self, ms: u64) -> Self {
        self.after_final_slide = Some(ms);
        self
    }

    pub fn with_before_first_slide(mut self, ms: u64) -> Self {
        self.before_first_slide = Some(ms);
        self
    }

    pub fn with_custom(mut self, name: impl Into<String>, ms: u64) -> Self {
        self.custom.insert(name.into(), ms);
        self
    }

    /// True when the layer overrides nothing.
    pub fn is_empty(&self) -> bool {
        self.between_segments.is_none()
            && self.between_slides.is_none()
            && self.after_final_slide.is_none()
            && self.before_first_slide.is_none()
            && self.custom.is_empty()
    }
}

/// Fully populated timing configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedTimingConfig {
    pub between_segments: u64,
    pub between_slides: u64,
    pub after_final_slide: u64,
    pub before_first_slide: u64,
    pub custom: BTreeMap<String, u64>,
}

impl Default for ResolvedTimingConfig {
    fn default() -> Self {
        Self {
            between_segments: DEFAULT_BETWEEN_SEGMENTS_MS,
            between_slides: DEFAULT_BETWEEN_SLIDES_MS,
            after_final_slide: DEFAULT_AFTER_FINAL_SLIDE_MS,
            before_first_slide: DEFAULT_BEFORE_FIRST_SLIDE_MS,
            custom: BTreeMap::new(),
        }
    }
}

impl ResolvedTimingConfig {
    /// Overlay one layer: present fields overwrite, custom keys merge.
    fn apply(&mut self, layer: &TimingConfig) {
        if let Some(ms) = layer.between_segments {
            self.between_segments = ms;
        }
        if let Some(ms) = layer.between_slides {
            self.between_slides = ms;
        }
        if let Some(ms) = layer.after_final_slide {
            self.after_final_slide = ms;
        }
        if let Some(ms) = layer.before_first_slide {
            self.before_first_slide = ms;
        }
        self.custom
            .extend(layer.custom.iter().map(|(k, v)| (k.clone(), *v)));
    }

    pub fn segment_gap(&self) -> Duration {
        Duration::from_millis(self.between_segments)
    }

    pub fn slide_gap(&self) -> Duration {
        Duration::from_millis(self.between_slides)
    }

    pub fn final_hold(&self) -> Duration {
        Duration::from_millis(self.after_final_slide)
    }

    pub fn lead_in(&self) -> Duration {
        Duration::from_millis(self.before_first_slide)
    }

    pub fn custom_delay(&self, name: &str) -> Option<Duration> {
        self.custom.get(name).copied().map(Duration::from_millis)
    }
}

/// Merge an ordered chain of optional layers over the global defaults.
///
/// `None` entries are skipped, so callers can pass
/// `[demo.timing.as_ref(), slide.timing.as_ref(), segment.timing.as_ref()]`
/// directly.
pub fn resolve_timing<'a, I>(chain: I) -> ResolvedTimingConfig
where
    I: IntoIterator<Item = Option<&'a TimingConfig>>,
{
    chain
        .into_iter()
        .flatten()
        .fold(ResolvedTimingConfig::default(), |mut acc, layer| {
            acc.apply(layer);
            acc
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_empty_chain_returns_defaults() {
        let resolved = resolve_timing(std::iter::empty::<Option<&TimingConfig>>());
        assert_eq!(resolved.between_segments, 500);
        assert_eq!(resolved.between_slides, 1000);
        assert_eq!(resolved.after_final_slide, 2000);
        assert_eq!(resolved.before_first_slide, 1000);
        assert!(resolved.custom.is_empty());
        assert_eq!(resolved, ResolvedTimingConfig::default());
    }

    #[test]
    fn test_chain_scenario() {
        let base = TimingConfig::new()
            .with_between_segments(500)
            .with_between_slides(1000)
            .with_after_final_slide(2000)
            .with_before_first_slide(1000);
        let slide = TimingConfig::new()
            .with_between_segments(300)
            .with_between_slides(1500);
        let segment = TimingConfig::new().with_between_segments(100);

        let resolved = resolve_timing([Some(&base), Some(&slide), Some(&segment)]);
        assert_eq!(resolved.between_segments, 100);
        assert_eq!(resolved.between_slides, 1500);
        assert_eq!(resolved.after_final_slide, 2000);
        assert_eq!(resolved.before_first_slide, 1000);
    }

    #[test]
    fn test_missing_layers_and_fields_are_no_ops() {
        let slide = TimingConfig::new().with_after_final_slide(0);
        let resolved = resolve_timing([None, Some(&slide), None]);
        assert_eq!(resolved.after_final_slide, 0);
        assert_eq!(resolved.between_segments, DEFAULT_BETWEEN_SEGMENTS_MS);
        assert_eq!(resolved.final_hold(), Duration::ZERO);
    }

    #[test]
    fn test_custom_delays_accumulate() {
        let demo = TimingConfig::new()
            .with_custom("revealStagger", 150)
            .with_custom("videoLead", 200);
        let slide = TimingConfig::new().with_custom("videoLead", 50);
        let segment = TimingConfig::new().with_custom("captionHold", 900);

        let resolved = resolve_timing([Some(&demo), Some(&slide), Some(&segment)]);
        assert_eq!(resolved.custom.len(), 3);
        assert_eq!(
            resolved.custom_delay("revealStagger"),
            Some(Duration::from_millis(150))
        );
        assert_eq!(
            resolved.custom_delay("videoLead"),
            Some(Duration::from_millis(50))
        );
        assert_eq!(resolved.custom_delay("captionHold"), Some(Duration::from_millis(900)));
        assert_eq!(resolved.custom_delay("missing"), None);
    }

    #[test]
    fn test_inputs_are_not_mutated() {
        let demo = TimingConfig::new().with_between_slides(700);
        let before = demo.clone();
        let _ = resolve_timing([Some(&demo), Some(&TimingConfig::new().with_between_slides(5))]);
        assert_eq!(demo, before);
    }

    #[test]
    fn test_json_uses_camel_case_and_omits_absent_fields() {
        let parsed: TimingConfig =
            serde_json::from_str(r#"{"betweenSegments":250,"custom":{"x":10}}"#).unwrap();
        assert_eq!(parsed.between_segments, Some(250));
        assert_eq!(parsed.between_slides, None);
        assert_eq!(parsed.custom.get("x"), Some(&10));

        let json = serde_json::to_string(&TimingConfig::new().with_before_first_slide(0)).unwrap();
        assert_eq!(json, r#"{"beforeFirstSlide":0}"#);
        assert!(TimingConfig::new().is_empty());
    }

    fn layer() -> impl Strategy<Value = Option<TimingConfig>> {
        proptest::option::of(
            (
                proptest::option::of(0u64..5000),
                proptest::option::of(0u64..5000),
                proptest::option::of(0u64..5000),
                proptest::option::of(0u64..5000),
                prop::collection::btree_map("[a-c]", 0u64..1000, 0..3),
            )
                .prop_map(|(seg, slide, fin, first, custom)| TimingConfig {
                    between_segments: seg,
                    between_slides: slide,
                    after_final_slide: fin,
                    before_first_slide: first,
                    custom,
                }),
        )
    }

    proptest! {
        #[test]
        fn prop_last_present_layer_wins(chain in prop::collection::vec(layer(), 0..5)) {
            let resolved = resolve_timing(chain.iter().map(Option::as_ref));

            let expected_segments = chain
                .iter()
                .flatten()
                .filter_map(|c| c.between_segments)
                .last()
                .unwrap_or(DEFAULT_BETWEEN_SEGMENTS_MS);
            prop_assert_eq!(resolved.between_segments, expected_segments);

            for (key, value) in &resolved.custom {
                let expected = chain
                    .iter()
                    .flatten()
                    .filter_map(|c| c.custom.get(key))
                    .last();
                prop_assert_eq!(Some(value), expected);
            }
        }
    }
}
