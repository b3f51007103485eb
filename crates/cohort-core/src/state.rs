//! Distributed state registry
//!
//! Maps 16-bit state ids to embedder-supplied providers. The link neither
//! interprets state bytes nor imposes a schema; it polls providers when
//! broadcasting and hands them bytes when a transfer arrives.

use crate::types::StateId;
use std::collections::BTreeMap;

// ----------------------------------------------------------------------------
// State Provider
// ----------------------------------------------------------------------------

/// Embedder-supplied serializer for one identified piece of application
/// state
///
/// Providers must not call back into the link except via `claim` and
/// `register_state`, and must tolerate being called while a state transfer
/// is being dispatched.
pub trait StateProvider {
    /// Current serialized state, or `None` when there is nothing to report
    fn get_state(&mut self, id: StateId) -> Option<Vec<u8>>;

    /// Apply state received from the active node
    ///
    /// `will_become_active` is true when the sender named this node as the
    /// active one, so the provider is about to own the state it is given.
    fn set_state(&mut self, id: StateId, will_become_active: bool, data: &[u8]);
}

// ----------------------------------------------------------------------------
// State Registry
// ----------------------------------------------------------------------------

/// Registered state providers, keyed by state id
///
/// Ordered so a broadcast enumerates entries in stable id order.
#[derive(Default)]
pub struct StateRegistry {
    providers: BTreeMap<StateId, Box<dyn StateProvider>>,
}

impl StateRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a provider, replacing any previous one for the same id
    pub fn register(&mut self, id: StateId, provider: Box<dyn StateProvider>) {
        self.providers.insert(id, provider);
    }

    pub fn get_mut(&mut self, id: StateId) -> Option<&mut Box<dyn StateProvider>> {
        self.providers.get_mut(&id)
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (StateId, &mut Box<dyn StateProvider>)> {
        self.providers.iter_mut().map(|(id, p)| (*id, p))
    }
}

impl std::fmt::Debug for StateRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateRegistry")
            .field("ids", &self.providers.keys().collect::<Vec<_>>())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed(Vec<u8>);

    impl StateProvider for Fixed {
        fn get_state(&mut self, _id: StateId) -> Option<Vec<u8>> {
            Some(self.0.clone())
        }

        fn set_state(&mut self, _id: StateId, _will_become_active: bool, data: &[u8]) {
            self.0 = data.to_vec();
        }
    }

    #[test]
    fn test_registry_iterates_in_id_order() {
        let mut reg = StateRegistry::new();
        reg.register(StateId::new(9), Box::new(Fixed(vec![9])));
        reg.register(StateId::new(1), Box::new(Fixed(vec![1])));
        reg.register(StateId::new(5), Box::new(Fixed(vec![5])));

        let order: Vec<u16> = reg.iter_mut().map(|(id, _)| id.raw()).collect();
        assert_eq!(order, vec![1, 5, 9]);
    }

    #[test]
    fn test_register_replaces_existing_provider() {
        let mut reg = StateRegistry::new();
        reg.register(StateId::new(1), Box::new(Fixed(vec![1])));
        reg.register(StateId::new(1), Box::new(Fixed(vec![2])));

        assert_eq!(reg.len(), 1);
        let data = reg
            .get_mut(StateId::new(1))
            .unwrap()
            .get_state(StateId::new(1));
        assert_eq!(data, Some(vec![2]));
    }
}
