//! Łatka core: a single-process conversational companion.
//!
//! Four subsystems share one process and one event stream:
//!
//! - [`bus::EventBus`]: synchronous in-process publish/subscribe,
//! - [`memory::EpisodicMemoryStore`]: append-only JSONL journal of episodic
//!   memories,
//! - [`emotion::EmotionEngine`]: a decaying mood vector over fixed axes,
//! - [`heartbeat::HeartbeatScheduler`]: the periodic tick driving decay,
//!   consolidation and persistence.
//!
//! [`agent::LatkaAgent`] wires them together and adds persona, intent and the
//! language-adapter boundary. State is deterministic given the event stream
//! plus elapsed time, so the whole loop is testable without a clock.

pub mod agent;
pub mod bus;
pub mod config;
pub mod emotion;
pub mod error;
pub mod health;
pub mod heartbeat;
pub mod identity;
pub mod intent;
pub mod llm;
pub mod memory;

pub use agent::{CoreHandle, LatkaAgent, PluginHandle};
pub use bus::{Event, EventBus, Handler, SubscriptionHandle, WILDCARD};
pub use config::{AgentConfig, ServiceMode};
pub use emotion::{EmotionConfig, EmotionEngine, EmotionRules, MoodVector};
pub use error::{CoreError, SchedulerError};
pub use health::HealthMonitor;
pub use heartbeat::{HeartbeatScheduler, TickContext};
pub use intent::{Intent, IntentEngine};
pub use llm::{LlmAdapter, LlmContext, LlmError};
pub use memory::{EpisodicMemoryStore, MemoryEntry, MemoryPolicy, MemoryQuery};
