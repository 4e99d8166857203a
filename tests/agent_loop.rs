// Integration tests for the full cognitive loop
//
// This suite drives the agent the way the binary does:
// 1. Messages come in and leave traces in mood and memory
// 2. Ticks decay mood and persist state to disk
// 3. A restarted agent resumes from the journal and snapshot
// 4. Plugins see read-only state and talk through the bus

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tempfile::TempDir;

use latka_core::{AgentConfig, LatkaAgent, MemoryQuery};

/// Helper to build an agent rooted in its own temporary data directory.
fn agent_in(dir: &TempDir) -> Arc<LatkaAgent> {
    let config = AgentConfig {
        data_dir: dir.path().to_path_buf(),
        ..AgentConfig::default()
    };
    LatkaAgent::init(config).expect("agent init")
}

/// Drive `n` manual ticks of `secs` seconds each through the scheduler.
async fn tick(agent: &Arc<LatkaAgent>, n: usize, secs: u64) {
    for _ in 0..n {
        agent.heartbeat().run_tick(Duration::from_secs(secs)).await;
    }
}

#[tokio::test]
async fn test_conversation_round_trip_survives_restart() {
    let dir = tempfile::tempdir().unwrap();

    {
        let agent = agent_in(&dir);
        agent.start().unwrap();
        agent.heartbeat().stop();

        agent.handle_message("Dziękuję za wczoraj, było super").await.unwrap();
        agent.handle_message("Trochę się martwię o jutro").await.unwrap();
        assert_eq!(agent.memory().len(), 2);
        assert!(agent.mood().get("joy").unwrap() > 0.0);
        assert!(agent.mood().get("fear").unwrap() > 0.0);

        agent.shutdown();
    }

    let restarted = agent_in(&dir);
    assert_eq!(restarted.memory().len(), 2, "journal reloaded");
    assert!(restarted.mood().get("joy").unwrap() > 0.0, "mood resumed");

    let worried = restarted.memory().query(&MemoryQuery {
        text: Some("martwię".into()),
        ..MemoryQuery::default()
    });
    assert_eq!(worried.len(), 1);
    assert!(worried[0].emotional_context.get("fear").unwrap() > 0.0);
}

#[tokio::test]
async fn test_ticks_decay_mood_toward_neutral() {
    let dir = tempfile::tempdir().unwrap();
    let agent = agent_in(&dir);
    agent.start().unwrap();
    agent.heartbeat().stop();

    agent.handle_message("Kocham cię, dziękuję za wszystko").await.unwrap();
    let before = agent.mood();
    assert!(before.get("tenderness").unwrap() > 0.0);

    // Default decay is 0.002/s, so ten minutes of ticks flattens everything.
    tick(&agent, 10, 60).await;
    let after = agent.mood();
    for (axis, value) in after.iter() {
        let was = before.get(axis).unwrap();
        assert!(
            value.abs() <= was.abs(),
            "axis {axis} moved away from neutral"
        );
    }
    assert_eq!(after.get("tenderness").unwrap(), 0.0);
}

#[tokio::test]
async fn test_tick_persists_journal_and_snapshot() {
    let dir = tempfile::tempdir().unwrap();
    let config = AgentConfig {
        data_dir: dir.path().to_path_buf(),
        ..AgentConfig::default()
    };
    let journal = config.journal_path();
    let snapshot = config.emotion_snapshot_path();

    let agent = LatkaAgent::init(config).unwrap();
    agent.start().unwrap();
    agent.heartbeat().stop();

    agent.handle_message("Zapisz ten moment").await.unwrap();
    tick(&agent, 1, 2).await;

    assert!(journal.exists(), "flush callback wrote the journal");
    assert!(snapshot.exists(), "snapshot callback wrote the emotion state");

    let raw = std::fs::read_to_string(&journal).unwrap();
    assert!(raw.lines().any(|l| l.contains("Zapisz ten moment")));
}

#[tokio::test]
async fn test_plugin_observes_and_influences_through_events() {
    let dir = tempfile::tempdir().unwrap();
    let agent = agent_in(&dir);

    let plugin = agent.register_plugin("caretaker");
    let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
    let s = Arc::clone(&seen);
    plugin.subscribe(
        "memory.stored",
        Arc::new(move |event| {
            s.lock().unwrap().push(event.payload["id"].as_u64().unwrap_or(0));
            Ok(())
        }),
    );

    agent.handle_message("Dzisiaj był dobry dzień").await.unwrap();
    assert_eq!(seen.lock().unwrap().len(), 1);

    // Influence goes through events, not through direct state access.
    let joy_before = agent.mood().get("joy").unwrap();
    plugin.publish("task.success", json!({ "strength": 1.0 })).unwrap();
    assert!(agent.mood().get("joy").unwrap() > joy_before);

    // The read view answers even for tag-filtered queries.
    let user_entries = plugin.core().query_memory(&MemoryQuery {
        any_tag: Some(BTreeSet::from(["user".to_string()])),
        ..MemoryQuery::default()
    });
    assert_eq!(user_entries.len(), 1);
}

#[tokio::test]
async fn test_live_heartbeat_ticks_on_its_own() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = AgentConfig {
        data_dir: dir.path().to_path_buf(),
        ..AgentConfig::default()
    };
    config.heartbeat.interval_ms = 20;

    let agent = LatkaAgent::init(config).unwrap();
    agent.start().unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;
    agent.shutdown();

    assert!(agent.heartbeat().tick_count() >= 2, "live ticker fired");
    assert!(agent.health().is_healthy(), "maintenance ran clean");
}
