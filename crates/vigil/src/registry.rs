use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Mutex;
use vigil_net::task::AgentId;

/// Thread-safe mapping of registered agents to their datagram addresses.
/// Entries live until server shutdown.
#[derive(Debug, Default)]
pub struct AgentRegistry {
    agents: Mutex<HashMap<AgentId, SocketAddr>>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        AgentRegistry::default()
    }

    /// Returns true when `id` was freshly inserted; false when an agent with
    /// this id is already registered.
    pub fn register(&self, id: AgentId, address: SocketAddr) -> bool {
        let mut agents = self.agents.lock().unwrap();
        if agents.contains_key(&id) {
            return false;
        }
        agents.insert(id, address);
        true
    }

    pub fn address_of(&self, id: &AgentId) -> Option<SocketAddr> {
        self.agents.lock().unwrap().get(id).copied()
    }

    pub fn contains(&self, id: &AgentId) -> bool {
        self.agents.lock().unwrap().contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.agents.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(port: u16) -> SocketAddr {
        format!("127.0.0.1:{}", port).parse().unwrap()
    }

    #[test]
    fn duplicate_registration_is_rejected() {
        let registry = AgentRegistry::new();
        let id = AgentId::new("AG001").unwrap();

        assert!(registry.register(id.clone(), addr(4000)));
        assert!(!registry.register(id.clone(), addr(4001)));

        // The original address wins.
        assert_eq!(registry.address_of(&id), Some(addr(4000)));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn unknown_agents_have_no_address() {
        let registry = AgentRegistry::new();
        let id = AgentId::new("AG009").unwrap();
        assert!(!registry.contains(&id));
        assert_eq!(registry.address_of(&id), None);
    }
}
