//! Session-context propagation: binds a running plan to the trigger event
//! that launched it, so modules and observers can ask "why am I running".

use std::collections::HashMap;
use std::sync::Mutex;

use super::models::TriggerFireEvent;

pub struct SessionContextPropagator {
    bindings: Mutex<HashMap<String, TriggerFireEvent>>,
}

impl SessionContextPropagator {
    pub fn new() -> Self {
        Self {
            bindings: Mutex::new(HashMap::new()),
        }
    }

    pub fn bind(&self, plan_id: &str, event: TriggerFireEvent) {
        if let Ok(mut bindings) = self.bindings.lock() {
            bindings.insert(plan_id.to_string(), event);
        }
    }

    pub fn get(&self, plan_id: &str) -> Option<TriggerFireEvent> {
        self.bindings.lock().ok()?.get(plan_id).cloned()
    }

    /// Called on plan termination.
    pub fn unbind(&self, plan_id: &str) {
        if let Ok(mut bindings) = self.bindings.lock() {
            bindings.remove(plan_id);
        }
    }
}

impl Default for SessionContextPropagator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::triggers::models::{TriggerCondition, TriggerDefinition};

    #[test]
    fn bind_get_unbind() {
        let propagator = SessionContextPropagator::new();
        let trigger = TriggerDefinition::new(
            "t",
            TriggerCondition::Interval { seconds: 1.0 },
            serde_json::json!({}),
        );
        let event = TriggerFireEvent::new(&trigger, "interval.tick", serde_json::json!({}));
        propagator.bind("plan-1", event);
        assert_eq!(
            propagator.get("plan-1").unwrap().event_type,
            "interval.tick"
        );
        propagator.unbind("plan-1");
        assert!(propagator.get("plan-1").is_none());
    }
}
