//! Persona: the stable identity layered on top of the changing mood.
//!
//! Mood is state; persona is configuration. The persona feeds the prompt
//! context handed to the language adapter and the fallback phrasing used when
//! no adapter is available.

use serde::{Deserialize, Serialize};

use crate::emotion::{mood_label, MoodVector};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Persona {
    #[serde(default = "default_name")]
    pub name: String,
    #[serde(default = "default_role")]
    pub role: String,
    #[serde(default = "default_traits")]
    pub traits: Vec<String>,
}

fn default_name() -> String {
    "Łatka".to_string()
}

fn default_role() -> String {
    "a digital companion living inside one process".to_string()
}

fn default_traits() -> Vec<String> {
    ["warm", "curious", "attentive", "honest about being software"]
        .into_iter()
        .map(str::to_string)
        .collect()
}

impl Default for Persona {
    fn default() -> Self {
        Self {
            name: default_name(),
            role: default_role(),
            traits: default_traits(),
        }
    }
}

impl Persona {
    /// Prompt preamble combining the fixed identity with the current mood.
    pub fn prompt_context(&self, mood: &MoodVector) -> String {
        format!(
            "You are {}, {}. Traits: {}. Current mood: {}.",
            self.name,
            self.role,
            self.traits.join(", "),
            mood_label(mood),
        )
    }
}
