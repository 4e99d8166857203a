//! Component health tracking.
//!
//! Subsystems report their own state here (persistence sink, scheduler
//! callbacks, adapters). A degraded component never stops the agent; it marks
//! the component so operators and maintenance logic can see what is limping.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use tracing::{info, warn};

/// Component health status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ComponentStatus {
    Ok,
    Degraded,
}

/// Last reported state of one component.
#[derive(Debug, Clone)]
pub struct ComponentHealth {
    pub status: ComponentStatus,
    pub last_change: DateTime<Utc>,
    pub last_error: Option<String>,
    pub degraded_count: u32,
}

/// Aggregates component reports into a single healthy/degraded view.
pub struct HealthMonitor {
    components: Mutex<HashMap<String, ComponentHealth>>,
}

impl HealthMonitor {
    pub fn new() -> Self {
        Self { components: Mutex::new(HashMap::new()) }
    }

    /// Mark a component healthy. Logs only on a degraded-to-ok transition.
    pub fn report_ok(&self, component: &str) {
        let mut components = self.components.lock().unwrap_or_else(|e| e.into_inner());
        let entry = components
            .entry(component.to_string())
            .or_insert_with(|| ComponentHealth {
                status: ComponentStatus::Ok,
                last_change: Utc::now(),
                last_error: None,
                degraded_count: 0,
            });
        if entry.status != ComponentStatus::Ok {
            info!(component = %component, "Component recovered");
            entry.status = ComponentStatus::Ok;
            entry.last_change = Utc::now();
            entry.last_error = None;
        }
    }

    /// Mark a component degraded with a reason.
    pub fn report_degraded(&self, component: &str, reason: impl Into<String>) {
        let reason = reason.into();
        warn!(component = %component, reason = %reason, "Component degraded");
        let mut components = self.components.lock().unwrap_or_else(|e| e.into_inner());
        let entry = components
            .entry(component.to_string())
            .or_insert_with(|| ComponentHealth {
                status: ComponentStatus::Ok,
                last_change: Utc::now(),
                last_error: None,
                degraded_count: 0,
            });
        if entry.status != ComponentStatus::Degraded {
            entry.status = ComponentStatus::Degraded;
            entry.last_change = Utc::now();
        }
        entry.last_error = Some(reason);
        entry.degraded_count += 1;
    }

    /// True when no tracked component is degraded.
    pub fn is_healthy(&self) -> bool {
        let components = self.components.lock().unwrap_or_else(|e| e.into_inner());
        components
            .values()
            .all(|h| h.status == ComponentStatus::Ok)
    }

    /// Snapshot of all tracked components.
    pub fn snapshot(&self) -> HashMap<String, ComponentHealth> {
        self.components
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Fraction of tracked components that are healthy, in `[0, 1]`.
    /// An empty monitor counts as fully healthy.
    pub fn health_score(&self) -> f32 {
        let components = self.components.lock().unwrap_or_else(|e| e.into_inner());
        if components.is_empty() {
            return 1.0;
        }
        let ok = components
            .values()
            .filter(|h| h.status == ComponentStatus::Ok)
            .count() as f32;
        ok / components.len() as f32
    }
}

impl Default for HealthMonitor {
    fn default() -> Self {
        Self::new()
    }
}
