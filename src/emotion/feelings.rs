//! Feelings lexicon: token to emotion-axis scoring for free text.
//!
//! Rules match normalized text (lowercased, Polish diacritics folded) either
//! as a word prefix (`"wkurz"` matches `"wkurzony"`) or as a whole word. The
//! lexicon is configuration: the engine only applies the resulting deltas.

use std::collections::BTreeMap;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// One lexicon rule: a token contributing `weight` to an emotion axis.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeelingsRule {
    pub axis: String,
    pub token: String,
    #[serde(default = "default_weight")]
    pub weight: f32,
    #[serde(default = "default_prefix")]
    pub prefix: bool,
}

fn default_weight() -> f32 {
    1.0
}

fn default_prefix() -> bool {
    true
}

/// Compiled lexicon.
pub struct FeelingsMap {
    compiled: Vec<(Regex, String, f32)>,
}

impl FeelingsMap {
    pub fn new(rules: &[FeelingsRule]) -> Self {
        let mut compiled = Vec::with_capacity(rules.len());
        for rule in rules {
            let token = regex::escape(&normalize(&rule.token));
            let pattern = if rule.prefix {
                format!(r"\b{token}\w*")
            } else {
                format!(r"\b{token}\b")
            };
            match Regex::new(&pattern) {
                Ok(re) => compiled.push((re, rule.axis.clone(), rule.weight)),
                Err(e) => {
                    warn!(token = %rule.token, error = %e, "Skipping uncompilable feelings rule")
                }
            }
        }
        Self { compiled }
    }

    /// Accumulated per-axis scores for the text. Empty map when nothing
    /// matches.
    pub fn analyze(&self, text: &str) -> BTreeMap<String, f32> {
        let normalized = normalize(text);
        let mut scores = BTreeMap::new();
        for (re, axis, weight) in &self.compiled {
            if re.is_match(&normalized) {
                *scores.entry(axis.clone()).or_insert(0.0) += weight;
            }
        }
        scores
    }

    pub fn rule_count(&self) -> usize {
        self.compiled.len()
    }
}

/// Lowercase and fold Polish diacritics so `"spokój"` and `"spokoj"` match
/// the same rules.
fn normalize(text: &str) -> String {
    text.chars()
        .flat_map(|c| c.to_lowercase())
        .map(|c| match c {
            'ą' => 'a',
            'ć' => 'c',
            'ę' => 'e',
            'ł' => 'l',
            'ń' => 'n',
            'ó' => 'o',
            'ś' => 's',
            'ź' | 'ż' => 'z',
            other => other,
        })
        .collect()
}

/// Default lexicon carried over from the original system.
pub fn default_rules() -> Vec<FeelingsRule> {
    let mut rules = Vec::new();
    let mut add = |axis: &str, tokens: &[&str]| {
        for token in tokens {
            rules.push(FeelingsRule {
                axis: axis.to_string(),
                token: token.to_string(),
                weight: 1.0,
                prefix: true,
            });
        }
    };
    add("joy", &["dziękuję", "fajnie", "dobrze", "super", "świetnie", "ciesz", "uśmiech", "haha"]);
    add("tenderness", &["kocham", "miłość", "uwielbiam", "bliskość", "przytul", "czuł"]);
    add("calm", &["cisza", "spokój", "oddech", "równowaga", "harmonia"]);
    add("curiosity", &["ciekaw", "zastanawiam", "poznać", "działa"]);
    add("sadness", &["smutno", "żal", "łzy", "płacz", "przykro", "tęskni", "brakuje"]);
    add("fear", &["boję", "lęk", "strach", "martwię", "niepokój", "stres"]);
    add("anger", &["zły", "zła", "wkurz", "wściekł", "irytacja", "wnerw"]);
    rules
}
