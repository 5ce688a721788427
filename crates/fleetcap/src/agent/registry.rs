use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use crate::agent::Agent;
use crate::common::error::FleetError;
use crate::Map;

/// Receives notifications about changes of the agent inventory.
///
/// Listeners are notified after the change has been applied. Errors and panics of a listener are
/// logged and never undo or block the change.
pub trait AgentListener: Send + Sync {
    fn on_created(&self, _agent: &Agent) -> anyhow::Result<()> {
        Ok(())
    }

    fn on_updated(&self, _previous: &Agent, _current: &Agent) -> anyhow::Result<()> {
        Ok(())
    }

    fn on_deleted(&self, _agent: &Agent) -> anyhow::Result<()> {
        Ok(())
    }
}

#[derive(Default)]
struct RegistryInner {
    agents: Mutex<Map<String, Agent>>,
    listeners: RwLock<Vec<Arc<dyn AgentListener>>>,
}

/// Live agent inventory, keyed by agent name.
#[derive(Clone, Default)]
pub struct AgentRegistry {
    inner: Arc<RegistryInner>,
}

impl AgentRegistry {
    pub fn add_listener(&self, listener: Arc<dyn AgentListener>) {
        self.inner
            .listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(listener);
    }

    pub fn add(&self, agent: Agent) -> crate::Result<()> {
        {
            let mut agents = self.lock_agents();
            if agents.contains_key(agent.name()) {
                return Err(FleetError::DuplicateAgent(agent.name().to_string()));
            }
            agents.insert(agent.name().to_string(), agent.clone());
        }
        log::debug!("Agent {} was added", agent.name());
        self.notify("created", |listener| listener.on_created(&agent));
        Ok(())
    }

    /// Replaces the record of an existing agent with the same name.
    pub fn update(&self, agent: Agent) -> crate::Result<()> {
        let previous = {
            let mut agents = self.lock_agents();
            match agents.get_mut(agent.name()) {
                Some(stored) => std::mem::replace(stored, agent.clone()),
                None => return Err(FleetError::AgentNotFound(agent.name().to_string())),
            }
        };
        self.notify("updated", |listener| listener.on_updated(&previous, &agent));
        Ok(())
    }

    /// Removes the agent and notifies listeners.
    ///
    /// The agent is removed before any listener runs, so a failing listener cannot keep it in the
    /// inventory.
    pub fn remove(&self, name: &str) -> crate::Result<Agent> {
        let agent = self
            .lock_agents()
            .remove(name)
            .ok_or_else(|| FleetError::AgentNotFound(name.to_string()))?;
        log::debug!("Agent {name} was removed");
        self.notify("deleted", |listener| listener.on_deleted(&agent));
        Ok(agent)
    }

    pub fn get(&self, name: &str) -> Option<Agent> {
        self.lock_agents().get(name).cloned()
    }

    /// Returns all agents sorted by name.
    pub fn agents(&self) -> Vec<Agent> {
        let mut agents: Vec<Agent> = self.lock_agents().values().cloned().collect();
        agents.sort_by(|a, b| a.name().cmp(b.name()));
        agents
    }

    pub fn len(&self) -> usize {
        self.lock_agents().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock_agents(&self) -> std::sync::MutexGuard<'_, Map<String, Agent>> {
        self.inner
            .agents
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn notify<F>(&self, event: &str, f: F)
    where
        F: Fn(&dyn AgentListener) -> anyhow::Result<()>,
    {
        let listeners = self
            .inner
            .listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for listener in listeners {
            match catch_unwind(AssertUnwindSafe(|| f(listener.as_ref()))) {
                Ok(Ok(())) => {}
                Ok(Err(error)) => {
                    log::warn!("Agent listener failed to handle `{event}` event: {error:?}")
                }
                Err(_) => log::error!("Agent listener panicked while handling `{event}` event"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use super::{AgentListener, AgentRegistry};
    use crate::agent::Agent;
    use crate::common::error::FleetError;

    #[derive(Default)]
    struct CountingListener {
        created: AtomicUsize,
        updated: AtomicUsize,
        deleted: AtomicUsize,
    }

    impl AgentListener for CountingListener {
        fn on_created(&self, _agent: &Agent) -> anyhow::Result<()> {
            self.created.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn on_updated(&self, _previous: &Agent, _current: &Agent) -> anyhow::Result<()> {
            self.updated.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn on_deleted(&self, _agent: &Agent) -> anyhow::Result<()> {
            self.deleted.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct FailingListener;

    impl AgentListener for FailingListener {
        fn on_deleted(&self, agent: &Agent) -> anyhow::Result<()> {
            Err(anyhow::anyhow!("cannot handle {}", agent.name()))
        }
    }

    struct PanickingListener;

    impl AgentListener for PanickingListener {
        fn on_deleted(&self, _agent: &Agent) -> anyhow::Result<()> {
            panic!("listener bug");
        }
    }

    #[test]
    fn add_update_remove_notify_listeners() {
        let registry = AgentRegistry::default();
        let listener = Arc::new(CountingListener::default());
        registry.add_listener(listener.clone());

        registry.add(Agent::new("a", 1)).unwrap();
        registry.update(Agent::new("a", 2)).unwrap();
        assert_eq!(registry.get("a").unwrap().num_executors(), 2);
        registry.remove("a").unwrap();

        assert_eq!(listener.created.load(Ordering::SeqCst), 1);
        assert_eq!(listener.updated.load(Ordering::SeqCst), 1);
        assert_eq!(listener.deleted.load(Ordering::SeqCst), 1);
        assert!(registry.is_empty());
    }

    #[test]
    fn duplicate_agent_is_rejected() {
        let registry = AgentRegistry::default();
        registry.add(Agent::new("a", 1)).unwrap();
        assert!(matches!(
            registry.add(Agent::new("a", 1)),
            Err(FleetError::DuplicateAgent(_))
        ));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn missing_agent() {
        let registry = AgentRegistry::default();
        assert!(matches!(
            registry.remove("a"),
            Err(FleetError::AgentNotFound(_))
        ));
        assert!(matches!(
            registry.update(Agent::new("a", 1)),
            Err(FleetError::AgentNotFound(_))
        ));
    }

    #[test]
    fn removal_succeeds_when_listeners_fail() {
        let registry = AgentRegistry::default();
        let counting = Arc::new(CountingListener::default());
        registry.add_listener(Arc::new(FailingListener));
        registry.add_listener(Arc::new(PanickingListener));
        registry.add_listener(counting.clone());

        registry.add(Agent::new("a", 1)).unwrap();
        let removed = registry.remove("a").unwrap();
        assert_eq!(removed.name(), "a");
        assert!(registry.get("a").is_none());
        assert_eq!(counting.deleted.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn agents_are_sorted() {
        let registry = AgentRegistry::default();
        for name in ["c", "a", "b"] {
            registry.add(Agent::new(name, 1)).unwrap();
        }
        let names: Vec<_> = registry
            .agents()
            .iter()
            .map(|a| a.name().to_string())
            .collect();
        assert_eq!(names, vec!["a", "b", "c"]);
    }
}
