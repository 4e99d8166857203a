//! Intent engine: small autonomous decisions between user messages.
//!
//! On each heartbeat the agent may pick one intent based on its current mood.
//! Deciding is not free: a thought budget regenerates with elapsed time and
//! each decision spends from it, so an idle agent thinks occasionally instead
//! of constantly.

use std::sync::Mutex;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::emotion::MoodVector;

/// Mood level above which an axis counts as strongly active.
const STRONG: f32 = 0.35;
/// Mood level above which an axis counts as mildly active.
const MILD: f32 = 0.15;

/// What the agent decides to do with a spare thought.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    /// Distress is dominant: generate a self-soothing reflection.
    Soothe,
    /// Agitation is high: reduce activity, let decay do its work.
    SlowDown,
    /// Things are good: change nothing, note the good moment.
    HoldSteady,
    /// Capture the current state as an episodic memory.
    SaveMemory,
    /// Produce an inner reflection about recent events.
    Reflect,
    /// Revisit recent memories.
    RecallMemories,
}

impl Intent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Soothe => "soothe",
            Self::SlowDown => "slow_down",
            Self::HoldSteady => "hold_steady",
            Self::SaveMemory => "save_memory",
            Self::Reflect => "reflect",
            Self::RecallMemories => "recall_memories",
        }
    }
}

/// Regenerating budget for autonomous thoughts.
#[derive(Debug, Clone)]
pub struct ThoughtEconomy {
    budget: f32,
    max_budget: f32,
    regen_per_sec: f32,
}

impl ThoughtEconomy {
    pub fn new(max_budget: f32, regen_per_sec: f32) -> Self {
        Self {
            budget: max_budget,
            max_budget,
            regen_per_sec,
        }
    }

    /// Regenerate with elapsed time, capped at the maximum.
    pub fn replenish(&mut self, elapsed: Duration) {
        self.budget =
            (self.budget + self.regen_per_sec * elapsed.as_secs_f32()).min(self.max_budget);
    }

    /// Spend `cost` if affordable.
    pub fn try_spend(&mut self, cost: f32) -> bool {
        if self.budget >= cost {
            self.budget -= cost;
            true
        } else {
            false
        }
    }

    pub fn budget(&self) -> f32 {
        self.budget
    }
}

impl Default for ThoughtEconomy {
    // One free thought up front, then roughly one per half-minute.
    fn default() -> Self {
        Self::new(1.0, 1.0 / 30.0)
    }
}

/// Deterministic mood-to-intent rules behind a thought budget.
pub struct IntentEngine {
    economy: Mutex<ThoughtEconomy>,
}

impl IntentEngine {
    pub fn new(economy: ThoughtEconomy) -> Self {
        Self {
            economy: Mutex::new(economy),
        }
    }

    /// Decide an intent for this tick, or `None` when the thought budget is
    /// exhausted. Same mood and tick count always produce the same intent.
    pub fn decide(&self, mood: &MoodVector, tick_count: u64, elapsed: Duration) -> Option<Intent> {
        {
            let mut economy = self.economy.lock().unwrap_or_else(|e| e.into_inner());
            economy.replenish(elapsed);
            if !economy.try_spend(1.0) {
                return None;
            }
        }

        let get = |axis: &str| mood.get(axis).unwrap_or(0.0);
        let intent = if get("sadness") >= STRONG || get("fear") >= STRONG {
            Intent::Soothe
        } else if get("anger") >= MILD && get("fear") >= MILD {
            Intent::SlowDown
        } else if get("joy") >= MILD && get("calm") >= MILD {
            Intent::HoldSteady
        } else {
            match tick_count % 3 {
                0 => Intent::SaveMemory,
                1 => Intent::Reflect,
                _ => Intent::RecallMemories,
            }
        };
        debug!(intent = intent.as_str(), tick_count, "Intent decided");
        Some(intent)
    }

    pub fn remaining_budget(&self) -> f32 {
        self.economy
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .budget()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn mood(pairs: &[(&str, f32)]) -> MoodVector {
        let engine = crate::emotion::EmotionEngine::new(crate::emotion::EmotionConfig::default());
        let deltas: BTreeMap<String, f32> =
            pairs.iter().map(|(a, v)| (a.to_string(), *v)).collect();
        engine.apply_delta(&deltas).unwrap();
        engine.snapshot()
    }

    #[test]
    fn test_distress_wins() {
        let engine = IntentEngine::new(ThoughtEconomy::new(10.0, 0.0));
        let tick = Duration::from_secs(2);
        assert_eq!(
            engine.decide(&mood(&[("sadness", 0.6)]), 1, tick),
            Some(Intent::Soothe)
        );
        assert_eq!(
            engine.decide(&mood(&[("fear", 0.4), ("joy", 0.5)]), 1, tick),
            Some(Intent::Soothe)
        );
    }

    #[test]
    fn test_agitation_slows_down() {
        let engine = IntentEngine::new(ThoughtEconomy::new(10.0, 0.0));
        assert_eq!(
            engine.decide(&mood(&[("anger", 0.2), ("fear", 0.2)]), 1, Duration::from_secs(2)),
            Some(Intent::SlowDown)
        );
    }

    #[test]
    fn test_contentment_holds_steady() {
        let engine = IntentEngine::new(ThoughtEconomy::new(10.0, 0.0));
        assert_eq!(
            engine.decide(&mood(&[("joy", 0.3), ("calm", 0.3)]), 1, Duration::from_secs(2)),
            Some(Intent::HoldSteady)
        );
    }

    #[test]
    fn test_neutral_mood_rotates() {
        let engine = IntentEngine::new(ThoughtEconomy::new(10.0, 0.0));
        let neutral = mood(&[]);
        let tick = Duration::from_secs(2);
        assert_eq!(engine.decide(&neutral, 3, tick), Some(Intent::SaveMemory));
        assert_eq!(engine.decide(&neutral, 4, tick), Some(Intent::Reflect));
        assert_eq!(engine.decide(&neutral, 5, tick), Some(Intent::RecallMemories));
    }

    #[test]
    fn test_budget_exhaustion_and_regen() {
        let engine = IntentEngine::new(ThoughtEconomy::new(1.0, 0.1));
        let neutral = mood(&[]);
        assert!(engine.decide(&neutral, 1, Duration::ZERO).is_some());
        assert!(engine.decide(&neutral, 2, Duration::ZERO).is_none());
        // 10 seconds at 0.1/s refills one full thought.
        assert!(engine.decide(&neutral, 3, Duration::from_secs(10)).is_some());
    }
}
