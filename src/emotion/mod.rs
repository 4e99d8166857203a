//! Emotion engine: a decaying multi-dimensional mood vector.
//!
//! The axis set is fixed at construction (configuration), every axis is always
//! present, and values are clamped to [-1, 1] after any update. The only
//! transitions are [`EmotionEngine::apply_delta`] (event-triggered) and
//! [`EmotionEngine::decay`] (time-triggered), both deterministic given their
//! inputs. What delta a given event produces is configuration
//! ([`EmotionRules`]), not engine logic.

pub mod feelings;
pub mod snapshot;

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::bus::{Event, EventBus, SubscriptionHandle, WILDCARD};
use crate::error::CoreError;
use feelings::FeelingsMap;

/// Inhibition factor applied to the opponent axis of a positive delta,
/// carried over from the original opponent-pair model.
const OPPONENT_INHIBITION: f32 = 0.6;

/// Small calming drift applied when user text matches no lexicon rule.
const NEUTRAL_TEXT_CALM_DELTA: f32 = 0.02;

/// Mapping from a fixed set of emotion axes to values in [-1, 1].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MoodVector {
    values: BTreeMap<String, f32>,
}

impl MoodVector {
    /// All-neutral vector over the given axes.
    pub fn neutral<I, S>(axes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            values: axes.into_iter().map(|a| (a.into(), 0.0)).collect(),
        }
    }

    pub fn get(&self, axis: &str) -> Option<f32> {
        self.values.get(axis).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f32)> {
        self.values.iter().map(|(k, v)| (k.as_str(), *v))
    }

    pub fn axes(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(|k| k.as_str())
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Axis with the largest magnitude; ties resolve to the alphabetically
    /// first axis so the result is deterministic.
    pub fn dominant(&self) -> Option<(&str, f32)> {
        let mut best: Option<(&str, f32)> = None;
        for (axis, value) in self.iter() {
            match best {
                Some((_, b)) if value.abs() <= b.abs() => {}
                _ => best = Some((axis, value)),
            }
        }
        best
    }
}

/// One emotion axis with its decay rate toward baseline 0, in units per second.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AxisSpec {
    pub name: String,
    #[serde(default = "default_decay_per_sec")]
    pub decay_per_sec: f32,
}

fn default_decay_per_sec() -> f32 {
    0.002
}

/// Engine configuration: the axis set and opponent pairs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmotionConfig {
    #[serde(default = "default_axes")]
    pub axes: Vec<AxisSpec>,
    /// Opponent pairs: a positive delta on one side inhibits the other.
    #[serde(default = "default_opponents")]
    pub opponents: Vec<(String, String)>,
}

impl Default for EmotionConfig {
    fn default() -> Self {
        Self {
            axes: default_axes(),
            opponents: default_opponents(),
        }
    }
}

fn default_axes() -> Vec<AxisSpec> {
    ["joy", "sadness", "fear", "anger", "tenderness", "curiosity", "calm"]
        .into_iter()
        .map(|name| AxisSpec {
            name: name.to_string(),
            decay_per_sec: default_decay_per_sec(),
        })
        .collect()
}

fn default_opponents() -> Vec<(String, String)> {
    [
        ("joy", "sadness"),
        ("calm", "fear"),
        ("tenderness", "anger"),
    ]
    .into_iter()
    .map(|(a, b)| (a.to_string(), b.to_string()))
    .collect()
}

/// A single axis delta produced by an event rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeltaSpec {
    pub axis: String,
    pub delta: f32,
}

/// Configurable mapping from event kind to mood deltas. The optional
/// `strength` payload field scales the configured deltas.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EmotionRules {
    rules: HashMap<String, Vec<DeltaSpec>>,
}

impl EmotionRules {
    pub fn new(rules: HashMap<String, Vec<DeltaSpec>>) -> Self {
        Self { rules }
    }

    /// Deltas this event produces, if any rule matches its kind.
    pub fn deltas_for(&self, event: &Event) -> Option<BTreeMap<String, f32>> {
        let specs = self.rules.get(&event.kind)?;
        let strength = event
            .payload
            .get("strength")
            .and_then(|v| v.as_f64())
            .unwrap_or(1.0) as f32;
        let mut out = BTreeMap::new();
        for spec in specs {
            *out.entry(spec.axis.clone()).or_insert(0.0) += spec.delta * strength;
        }
        Some(out)
    }

    /// Default mapping carried over from the original system events.
    pub fn defaults() -> Self {
        let mut rules = HashMap::new();
        let mut add = |kind: &str, deltas: &[(&str, f32)]| {
            rules.insert(
                kind.to_string(),
                deltas
                    .iter()
                    .map(|(axis, delta)| DeltaSpec {
                        axis: axis.to_string(),
                        delta: *delta,
                    })
                    .collect(),
            );
        };
        add("user.greeting", &[("tenderness", 0.08), ("joy", 0.05), ("calm", 0.03)]);
        add("user.praise", &[("joy", 0.10), ("tenderness", 0.06)]);
        add("user.criticism", &[("sadness", 0.06), ("fear", 0.05)]);
        add("user.separation", &[("sadness", 0.10), ("tenderness", 0.04)]);
        add("user.support", &[("tenderness", 0.10), ("calm", 0.06)]);
        add("task.success", &[("joy", 0.12), ("calm", 0.06)]);
        add("task.failure", &[("sadness", 0.10), ("fear", 0.05)]);
        Self { rules }
    }
}

/// The emotion engine. Mutations happen only inside short critical sections;
/// follow-up `emotion.updated` events are published after the lock is
/// released, so handlers that publish never deadlock.
pub struct EmotionEngine {
    config: EmotionConfig,
    state: Mutex<MoodVector>,
}

impl EmotionEngine {
    pub fn new(config: EmotionConfig) -> Self {
        let state = MoodVector::neutral(config.axes.iter().map(|a| a.name.clone()));
        Self {
            config,
            state: Mutex::new(state),
        }
    }

    /// Construct with a previously persisted mood. Axes are still fixed by
    /// the config: unknown axes in the snapshot are dropped with a warning,
    /// missing axes initialize to neutral.
    pub fn resume(config: EmotionConfig, saved: &MoodVector) -> Self {
        let engine = Self::new(config);
        {
            let mut state = engine.lock();
            for (axis, value) in saved.iter() {
                if state.values.contains_key(axis) {
                    state.values.insert(axis.to_string(), value.clamp(-1.0, 1.0));
                } else {
                    warn!(axis = %axis, "Ignoring unknown axis from emotion snapshot");
                }
            }
        }
        engine
    }

    /// Apply deltas to the named axes, clamping each result to [-1, 1]. Axes
    /// absent from `deltas` are unchanged. A delta naming an unknown axis is
    /// rejected with no state change. Returns the updated snapshot.
    pub fn apply_delta(&self, deltas: &BTreeMap<String, f32>) -> Result<MoodVector, CoreError> {
        let mut state = self.lock();
        for axis in deltas.keys() {
            if !state.values.contains_key(axis) {
                return Err(CoreError::Validation(format!("unknown emotion axis '{axis}'")));
            }
        }
        for (axis, delta) in deltas {
            let value = state.values.get_mut(axis).expect("axis checked above");
            *value = (*value + delta).clamp(-1.0, 1.0);
        }
        Ok(state.clone())
    }

    /// Move every axis toward baseline 0 by `decay_per_sec * elapsed`,
    /// never overshooting. `decay(0)` is a no-op.
    pub fn decay(&self, elapsed: Duration) {
        let secs = elapsed.as_secs_f32();
        if secs <= 0.0 {
            return;
        }
        let mut state = self.lock();
        for axis in &self.config.axes {
            if let Some(value) = state.values.get_mut(&axis.name) {
                let step = axis.decay_per_sec * secs;
                if value.abs() <= step {
                    *value = 0.0;
                } else {
                    *value -= step * value.signum();
                }
            }
        }
    }

    /// Immutable copy of the current state. Never blocks beyond the short
    /// internal critical section.
    pub fn snapshot(&self) -> MoodVector {
        self.lock().clone()
    }

    /// Expand a delta map with opponent inhibition: a positive delta on one
    /// side of a configured pair pushes the other side down.
    pub fn expand_opponents(&self, deltas: &BTreeMap<String, f32>) -> BTreeMap<String, f32> {
        let mut out = deltas.clone();
        for (a, b) in &self.config.opponents {
            for (axis, opponent) in [(a, b), (b, a)] {
                if let Some(delta) = deltas.get(axis) {
                    if *delta > 0.0 {
                        *out.entry(opponent.clone()).or_insert(0.0) -=
                            OPPONENT_INHIBITION * delta;
                    }
                }
            }
        }
        out
    }

    /// Update the mood from free text through the feelings lexicon. Matching
    /// scores are normalized and scaled by `weight`; text matching nothing
    /// drifts gently toward calm. Returns the updated snapshot when anything
    /// was applied.
    pub fn imprint_text(
        &self,
        text: &str,
        weight: f32,
        feelings: &FeelingsMap,
    ) -> Result<Option<MoodVector>, CoreError> {
        let scores = feelings.analyze(text);
        let deltas = if scores.is_empty() {
            let mut d = BTreeMap::new();
            if self.snapshot().get("calm").is_some() {
                d.insert("calm".to_string(), NEUTRAL_TEXT_CALM_DELTA * weight);
            }
            d
        } else {
            let total: f32 = scores.values().sum();
            scores
                .into_iter()
                .map(|(axis, s)| (axis, 0.1 * weight * (s / total)))
                .collect()
        };
        if deltas.is_empty() {
            return Ok(None);
        }
        let expanded = self.expand_opponents(&deltas);
        self.apply_delta(&expanded).map(Some)
    }

    /// Subscribe to every event on the bus and react through the rules table.
    /// A non-empty applied delta publishes `emotion.updated` with the new
    /// mood; `emotion.updated` itself never maps to a rule, so there is no
    /// feedback loop.
    pub fn attach(
        self: &Arc<Self>,
        bus: &Arc<EventBus>,
        rules: Arc<EmotionRules>,
    ) -> SubscriptionHandle {
        let engine = Arc::downgrade(self);
        let weak_bus: Weak<EventBus> = Arc::downgrade(bus);
        bus.subscribe(
            WILDCARD,
            Arc::new(move |event: &Event| {
                if event.kind == "emotion.updated" {
                    return Ok(());
                }
                let Some(engine) = engine.upgrade() else {
                    return Ok(());
                };
                let Some(deltas) = rules.deltas_for(event) else {
                    return Ok(());
                };
                if deltas.is_empty() {
                    return Ok(());
                }
                let expanded = engine.expand_opponents(&deltas);
                let mood = engine.apply_delta(&expanded)?;
                debug!(kind = %event.kind, "Applied emotion rule deltas");
                if let Some(bus) = weak_bus.upgrade() {
                    let follow = Event::new(
                        "emotion.updated",
                        serde_json::json!({ "mood": mood, "cause": event.kind }),
                        "emotion",
                    )?;
                    bus.publish(&follow);
                }
                Ok(())
            }),
        )
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MoodVector> {
        self.state.lock().expect("emotion state lock poisoned")
    }
}

/// Coarse label for the current mood, derived from valence/arousal tendencies
/// of the well-known axes (unknown axes contribute nothing).
pub fn mood_label(mood: &MoodVector) -> &'static str {
    let get = |axis: &str| mood.get(axis).unwrap_or(0.0);
    let valence = get("joy") + get("tenderness") + 0.5 * get("calm")
        - get("sadness")
        - get("fear")
        - 0.5 * get("anger");
    let arousal = get("fear") + get("anger") + 0.5 * get("curiosity") - get("calm");
    if valence >= 0.25 && arousal >= 0.25 {
        "bright/energetic"
    } else if valence >= 0.25 {
        "warm/calm"
    } else if valence < 0.0 && arousal >= 0.25 {
        "tense/agitated"
    } else if valence < 0.0 {
        "subdued/sad"
    } else {
        "balanced"
    }
}
