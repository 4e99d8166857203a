//! The agent facade: wires bus, emotions, memory, heartbeat and intent into
//! one conversational loop.
//!
//! Construction order matters: subsystems first, then the `Arc` of the agent,
//! then bus wiring through `Weak` references so the bus never keeps the agent
//! (or the engines) alive on its own.

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::{Arc, Once, Weak};
use std::time::Duration;

use serde_json::json;
use tracing::{debug, info, warn};

use crate::bus::{Event, EventBus, SubscriptionHandle};
use crate::config::{AgentConfig, ServiceMode};
use crate::emotion::feelings::FeelingsMap;
use crate::emotion::{mood_label, snapshot, EmotionEngine, MoodVector};
use crate::error::CoreError;
use crate::health::HealthMonitor;
use crate::heartbeat::{HeartbeatScheduler, TickContext, TICK_EVENT};
use crate::identity::Persona;
use crate::intent::{Intent, IntentEngine, ThoughtEconomy};
use crate::llm::{LlmAdapter, LlmContext, LlmError, MockLlm};
use crate::memory::{EpisodicMemoryStore, MemoryQuery};

/// Tag applied to memories the agent writes on its own initiative.
const AUTONOMOUS_TAG: &str = "autonomous";

pub struct LatkaAgent {
    bus: Arc<EventBus>,
    emotions: Arc<EmotionEngine>,
    memory: Arc<EpisodicMemoryStore>,
    heartbeat: Arc<HeartbeatScheduler>,
    health: Arc<HealthMonitor>,
    intent: IntentEngine,
    feelings: FeelingsMap,
    persona: Persona,
    llm: Option<Arc<dyn LlmAdapter>>,
    snapshot_path: PathBuf,
    heartbeat_interval: Duration,
    callbacks_registered: Once,
}

impl LatkaAgent {
    /// Build the agent from configuration, loading any persisted state.
    pub fn init(config: AgentConfig) -> anyhow::Result<Arc<Self>> {
        Self::init_with_adapter(config, None)
    }

    /// Build with an explicit language adapter (ignores the service mode's
    /// default adapter choice).
    pub fn init_with_adapter(
        config: AgentConfig,
        adapter: Option<Arc<dyn LlmAdapter>>,
    ) -> anyhow::Result<Arc<Self>> {
        let bus = Arc::new(EventBus::new());
        let health = Arc::new(HealthMonitor::new());

        let memory = Arc::new(EpisodicMemoryStore::open(
            config.journal_path(),
            config.memory.clone(),
            Arc::clone(&health),
        )?);

        let snapshot_path = config.emotion_snapshot_path();
        let saved = snapshot::load(&snapshot_path);
        let emotions = match &saved {
            Some(s) => Arc::new(EmotionEngine::resume(config.emotion.clone(), &s.mood)),
            None => Arc::new(EmotionEngine::new(config.emotion.clone())),
        };

        let heartbeat = Arc::new(HeartbeatScheduler::new(
            Arc::clone(&bus),
            Arc::clone(&health),
            config.callback_timeout(),
        ));
        if let Some(s) = &saved {
            heartbeat.resume(s.tick_count);
        }

        let llm = adapter.or(match config.service_mode {
            ServiceMode::Mock => Some(Arc::new(MockLlm) as Arc<dyn LlmAdapter>),
            ServiceMode::Offline | ServiceMode::Online => None,
        });
        if config.service_mode == ServiceMode::Online && llm.is_none() {
            warn!("Online mode without an adapter, replies fall back to offline phrasing");
        }

        emotions.attach(&bus, Arc::new(config.rules.clone()));

        let agent = Arc::new(Self {
            bus,
            emotions,
            memory,
            heartbeat,
            health,
            intent: IntentEngine::new(ThoughtEconomy::default()),
            feelings: FeelingsMap::new(&config.feelings),
            persona: config.persona.clone(),
            llm,
            snapshot_path,
            heartbeat_interval: config.heartbeat_interval(),
            callbacks_registered: Once::new(),
        });

        // React to ticks through the bus like any other subscriber.
        let weak: Weak<Self> = Arc::downgrade(&agent);
        agent.bus.subscribe(
            TICK_EVENT,
            Arc::new(move |event: &Event| {
                let Some(agent) = weak.upgrade() else {
                    return Ok(());
                };
                let tick_count = event
                    .payload
                    .get("tick_count")
                    .and_then(|v| v.as_u64())
                    .unwrap_or(0);
                let elapsed_ms = event
                    .payload
                    .get("elapsed_ms")
                    .and_then(|v| v.as_u64())
                    .unwrap_or(0);
                agent.plan_and_act(TickContext {
                    tick_count,
                    elapsed: Duration::from_millis(elapsed_ms),
                });
                Ok(())
            }),
        );

        info!(
            resumed = saved.is_some(),
            memories = agent.memory.len(),
            feelings_rules = agent.feelings.rule_count(),
            "Agent initialized"
        );
        Ok(agent)
    }

    /// Register maintenance callbacks and start the heartbeat. Maintenance
    /// runs in a fixed order: decay, consolidate, flush, snapshot.
    pub fn start(self: &Arc<Self>) -> Result<(), CoreError> {
        self.callbacks_registered.call_once(|| {
            let emotions = Arc::clone(&self.emotions);
            self.heartbeat.register_callback(
                "decay",
                Arc::new(move |ctx: TickContext| {
                    emotions.decay(ctx.elapsed);
                    Ok(())
                }),
            );

            let memory = Arc::clone(&self.memory);
            self.heartbeat.register_callback(
                "consolidate",
                Arc::new(move |ctx: TickContext| {
                    memory.consolidate(ctx.elapsed);
                    Ok(())
                }),
            );

            let memory = Arc::clone(&self.memory);
            self.heartbeat.register_callback(
                "flush",
                Arc::new(move |_| {
                    memory.flush()?;
                    Ok(())
                }),
            );

            let emotions = Arc::clone(&self.emotions);
            let path = self.snapshot_path.clone();
            self.heartbeat.register_callback(
                "snapshot",
                Arc::new(move |ctx: TickContext| {
                    snapshot::store(
                        &path,
                        &snapshot::EmotionSnapshot {
                            mood: emotions.snapshot(),
                            tick_count: ctx.tick_count,
                        },
                    )?;
                    Ok(())
                }),
            );
        });
        self.heartbeat.start(self.heartbeat_interval)?;
        Ok(())
    }

    /// Stop the heartbeat and persist everything once more.
    pub fn shutdown(&self) {
        self.heartbeat.stop();
        if let Err(e) = self.memory.flush() {
            warn!(error = %e, "Final journal flush failed");
        }
        let final_snapshot = snapshot::EmotionSnapshot {
            mood: self.emotions.snapshot(),
            tick_count: self.heartbeat.tick_count(),
        };
        if let Err(e) = snapshot::store(&self.snapshot_path, &final_snapshot) {
            warn!(error = %e, "Final emotion snapshot failed");
        }
        info!(memories = self.memory.len(), "Agent shut down");
    }

    /// Process one user message through the full loop: feel it, remember it,
    /// answer it.
    pub async fn handle_message(&self, text: &str) -> anyhow::Result<String> {
        let text = text.trim();
        if text.is_empty() {
            return Err(CoreError::Validation("message must not be empty".into()).into());
        }

        if let Some(mood) = self.emotions.imprint_text(text, 1.0, &self.feelings)? {
            let update = Event::new(
                "emotion.updated",
                json!({ "mood": mood, "cause": "user.message" }),
                "agent",
            )?;
            self.bus.publish(&update);
        }

        let message = Event::new("user.message", json!({ "text": text }), "user")?;
        self.bus.publish(&message);

        let mood = self.emotions.snapshot();
        let entry = self.memory.record(
            text,
            BTreeSet::from(["user".to_string()]),
            mood.clone(),
            0.5,
        )?;
        let stored = Event::new("memory.stored", json!({ "id": entry.id }), "memory")?;
        self.bus.publish(&stored);

        Ok(self.generate_reply(text, &mood).await)
    }

    async fn generate_reply(&self, prompt: &str, mood: &MoodVector) -> String {
        let Some(llm) = &self.llm else {
            return self.fallback_reply(mood);
        };
        let context = LlmContext {
            persona: self.persona.clone(),
            mood_summary: mood_label(mood).to_string(),
            recent_memories: self.memory.recent(5),
        };
        match llm.generate(prompt, &context).await {
            Ok(reply) => {
                self.health.report_ok("llm.adapter");
                reply
            }
            Err(LlmError::Transient(e)) => {
                warn!(error = %e, "Adapter failed, retrying once");
                match llm.generate(prompt, &context).await {
                    Ok(reply) => {
                        self.health.report_ok("llm.adapter");
                        reply
                    }
                    Err(e) => {
                        self.health.report_degraded("llm.adapter", e.to_string());
                        self.fallback_reply(mood)
                    }
                }
            }
            Err(e @ LlmError::Permanent(_)) => {
                self.health.report_degraded("llm.adapter", e.to_string());
                self.fallback_reply(mood)
            }
        }
    }

    fn fallback_reply(&self, mood: &MoodVector) -> String {
        format!(
            "{} (feeling {}): I'm here, and I'll remember what you said.",
            self.persona.name,
            mood_label(mood)
        )
    }

    /// One autonomous step, driven by the tick event.
    fn plan_and_act(&self, ctx: TickContext) {
        let mood = self.emotions.snapshot();
        let Some(intent) = self.intent.decide(&mood, ctx.tick_count, ctx.elapsed) else {
            return;
        };
        if let Ok(decided) = Event::new(
            "intent.decided",
            json!({ "intent": intent.as_str(), "tick_count": ctx.tick_count }),
            "intent",
        ) {
            self.bus.publish(&decided);
        }

        match intent {
            Intent::Soothe => {
                let calming = [("calm".to_string(), 0.06)].into_iter().collect();
                if let Err(e) = self.emotions.apply_delta(&calming) {
                    debug!(error = %e, "Soothing skipped, no calm axis configured");
                }
            }
            Intent::SlowDown | Intent::HoldSteady => {
                // Deliberate inaction; decay keeps working in the background.
            }
            Intent::SaveMemory => {
                let content = format!("Noted how this moment feels: {}.", mood_label(&mood));
                if let Err(e) = self.memory.record(
                    content,
                    BTreeSet::from([AUTONOMOUS_TAG.to_string()]),
                    mood,
                    0.2,
                ) {
                    warn!(error = %e, "Autonomous memory rejected");
                }
            }
            Intent::Reflect => {
                let dominant = mood
                    .dominant()
                    .map(|(axis, _)| axis.to_string())
                    .unwrap_or_else(|| "nothing in particular".to_string());
                let content = format!("Reflected on what stands out right now: {dominant}.");
                match self.memory.record(
                    content.clone(),
                    BTreeSet::from([AUTONOMOUS_TAG.to_string(), "reflection".to_string()]),
                    mood,
                    0.3,
                ) {
                    Ok(_) => {
                        if let Ok(event) =
                            Event::new("agent.reflection", json!({ "text": content }), "agent")
                        {
                            self.bus.publish(&event);
                        }
                    }
                    Err(e) => warn!(error = %e, "Reflection memory rejected"),
                }
            }
            Intent::RecallMemories => {
                let recalled = self.memory.recent(3);
                if let Ok(event) = Event::new(
                    "memory.recalled",
                    json!({ "count": recalled.len() }),
                    "memory",
                ) {
                    self.bus.publish(&event);
                }
            }
        }
    }

    /// Hand a plugin its capability surface: bus access plus read-only views
    /// of mood and memory.
    pub fn register_plugin(self: &Arc<Self>, name: impl Into<String>) -> PluginHandle {
        let name = name.into();
        info!(plugin = %name, "Plugin registered");
        PluginHandle {
            name,
            bus: Arc::clone(&self.bus),
            core: CoreHandle {
                emotions: Arc::downgrade(&self.emotions),
                memory: Arc::downgrade(&self.memory),
            },
        }
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    pub fn mood(&self) -> MoodVector {
        self.emotions.snapshot()
    }

    pub fn health(&self) -> &Arc<HealthMonitor> {
        &self.health
    }

    pub fn memory(&self) -> &Arc<EpisodicMemoryStore> {
        &self.memory
    }

    pub fn heartbeat(&self) -> &Arc<HeartbeatScheduler> {
        &self.heartbeat
    }
}

/// Read-only view of core state handed to plugins. Holds weak references so a
/// leaked handle cannot keep the core alive.
#[derive(Clone)]
pub struct CoreHandle {
    emotions: Weak<EmotionEngine>,
    memory: Weak<EpisodicMemoryStore>,
}

impl CoreHandle {
    pub fn mood_snapshot(&self) -> Option<MoodVector> {
        self.emotions.upgrade().map(|e| e.snapshot())
    }

    pub fn query_memory(&self, query: &MemoryQuery) -> Vec<crate::memory::MemoryEntry> {
        self.memory
            .upgrade()
            .map(|m| m.query(query))
            .unwrap_or_default()
    }

    pub fn recent_memories(&self, n: usize) -> Vec<crate::memory::MemoryEntry> {
        self.memory
            .upgrade()
            .map(|m| m.recent(n))
            .unwrap_or_default()
    }
}

/// A plugin's capability surface: publish and subscribe under its own name,
/// plus the read-only [`CoreHandle`]. Plugins never get mutable access to
/// emotion or memory state; they influence the agent through events.
pub struct PluginHandle {
    name: String,
    bus: Arc<EventBus>,
    core: CoreHandle,
}

impl PluginHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Publish an event sourced from this plugin.
    pub fn publish(
        &self,
        kind: impl Into<String>,
        payload: serde_json::Value,
    ) -> Result<usize, CoreError> {
        let event = Event::new(kind, payload, self.name.clone())?;
        Ok(self.bus.publish(&event))
    }

    pub fn subscribe(
        &self,
        pattern: impl Into<String>,
        handler: crate::bus::Handler,
    ) -> SubscriptionHandle {
        self.bus.subscribe(pattern, handler)
    }

    pub fn core(&self) -> &CoreHandle {
        &self.core
    }
}
