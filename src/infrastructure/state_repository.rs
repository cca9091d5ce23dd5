use crate::domain::models::PlannerState;
use crate::infrastructure::error::InfraError;
use crate::infrastructure::storage::KeyValueStore;
use std::sync::Arc;

/// Reads and writes the whole planner snapshot as one JSON document under a fixed key.
pub struct StateRepository<K>
where
    K: KeyValueStore,
{
    storage: Arc<K>,
    key: String,
}

impl<K> StateRepository<K>
where
    K: KeyValueStore,
{
    pub fn new(storage: Arc<K>, key: impl Into<String>) -> Self {
        Self {
            storage,
            key: key.into(),
        }
    }

    /// Hydrates the snapshot; an absent document yields the empty default state.
    pub fn load(&self) -> Result<PlannerState, InfraError> {
        match self.storage.get(&self.key)? {
            Some(raw) => Ok(serde_json::from_str(&raw)?),
            None => Ok(PlannerState::default()),
        }
    }

    pub fn save(&self, state: &PlannerState) -> Result<(), InfraError> {
        let payload = serde_json::to_string(state)?;
        self.storage.put(&self.key, &payload)
    }

    pub fn export_json(&self) -> Result<String, InfraError> {
        Ok(serde_json::to_string_pretty(&self.load()?)?)
    }
}
