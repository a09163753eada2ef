//! Learner state persistence
//!
//! The engine never owns a storage technology. Hosts inject a [`LearnerStore`]
//! (get-by-key and upsert, no delete); [`InMemoryStore`] backs tests and the
//! replay binary.

use std::collections::HashMap;
use std::future::Future;

use parking_lot::RwLock;
use thiserror::Error;

use crate::learner::decision::OrchestratorState;
use crate::learner::memory::Sm2Item;
use crate::learner::types::KnowledgeState;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store backend error: {0}")]
    Backend(String),
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Map key for per-learner records. Ids are kept apart, so `:` inside an
/// IRI-shaped skill id can never collide with another learner's key.
pub type LearnerItemKey = (String, String);

pub fn item_key(learner_id: &str, item_id: &str) -> LearnerItemKey {
    (learner_id.to_string(), item_id.to_string())
}

/// Human-readable label for logs and errors; not used for lookups.
pub fn state_label(learner_id: &str, skill_id: &str) -> String {
    format!("{}:{}", learner_id, skill_id)
}

pub fn review_label(learner_id: &str, item_id: &str) -> String {
    format!("{}:review:{}", learner_id, item_id)
}

pub trait LearnerStore: Send + Sync + 'static {
    fn get_knowledge_state(
        &self,
        learner_id: &str,
        skill_id: &str,
    ) -> impl Future<Output = Result<Option<KnowledgeState>, StoreError>> + Send;

    fn upsert_knowledge_state(
        &self,
        state: &KnowledgeState,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    fn get_sm2_item(
        &self,
        learner_id: &str,
        item_id: &str,
    ) -> impl Future<Output = Result<Option<Sm2Item>, StoreError>> + Send;

    fn upsert_sm2_item(&self, item: &Sm2Item)
        -> impl Future<Output = Result<(), StoreError>> + Send;

    fn get_orchestrator_state(
        &self,
        learner_id: &str,
    ) -> impl Future<Output = Result<Option<OrchestratorState>, StoreError>> + Send;

    fn upsert_orchestrator_state(
        &self,
        state: &OrchestratorState,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;
}

#[derive(Default)]
pub struct InMemoryStore {
    knowledge: RwLock<HashMap<LearnerItemKey, KnowledgeState>>,
    reviews: RwLock<HashMap<LearnerItemKey, Sm2Item>>,
    orchestrator: RwLock<HashMap<String, OrchestratorState>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn knowledge_states_for(&self, learner_id: &str) -> Vec<KnowledgeState> {
        let mut states: Vec<KnowledgeState> = self
            .knowledge
            .read()
            .values()
            .filter(|s| s.learner_id == learner_id)
            .cloned()
            .collect();
        states.sort_by(|a, b| a.skill_id.cmp(&b.skill_id));
        states
    }

    pub fn len(&self) -> usize {
        self.knowledge.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl LearnerStore for InMemoryStore {
    async fn get_knowledge_state(
        &self,
        learner_id: &str,
        skill_id: &str,
    ) -> Result<Option<KnowledgeState>, StoreError> {
        Ok(self
            .knowledge
            .read()
            .get(&item_key(learner_id, skill_id))
            .cloned())
    }

    async fn upsert_knowledge_state(&self, state: &KnowledgeState) -> Result<(), StoreError> {
        self.knowledge
            .write()
            .insert(item_key(&state.learner_id, &state.skill_id), state.clone());
        Ok(())
    }

    async fn get_sm2_item(
        &self,
        learner_id: &str,
        item_id: &str,
    ) -> Result<Option<Sm2Item>, StoreError> {
        Ok(self
            .reviews
            .read()
            .get(&item_key(learner_id, item_id))
            .cloned())
    }

    async fn upsert_sm2_item(&self, item: &Sm2Item) -> Result<(), StoreError> {
        self.reviews
            .write()
            .insert(item_key(&item.learner_id, &item.item_id), item.clone());
        Ok(())
    }

    async fn get_orchestrator_state(
        &self,
        learner_id: &str,
    ) -> Result<Option<OrchestratorState>, StoreError> {
        Ok(self.orchestrator.read().get(learner_id).cloned())
    }

    async fn upsert_orchestrator_state(&self, state: &OrchestratorState) -> Result<(), StoreError> {
        self.orchestrator
            .write()
            .insert(state.learner_id.clone(), state.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::learner::types::{BktParams, SkillDefinition};
    use chrono::Utc;

    #[tokio::test]
    async fn knowledge_state_upsert_supersedes() {
        let store = InMemoryStore::new();
        let skill = SkillDefinition::new("fractions", "Fractions");
        let mut state = KnowledgeState::new("ada", &skill, BktParams::default());

        assert!(store
            .get_knowledge_state("ada", "fractions")
            .await
            .unwrap()
            .is_none());

        store.upsert_knowledge_state(&state).await.unwrap();
        state.total_attempts = 4;
        store.upsert_knowledge_state(&state).await.unwrap();

        let loaded = store
            .get_knowledge_state("ada", "fractions")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(loaded.total_attempts, 4);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn review_items_and_orchestrator_state_are_keyed_separately() {
        let store = InMemoryStore::new();
        let item = Sm2Item::new("fractions", "ada", Utc::now());
        store.upsert_sm2_item(&item).await.unwrap();
        assert!(store.get_sm2_item("ada", "fractions").await.unwrap().is_some());
        assert!(store.get_sm2_item("bob", "fractions").await.unwrap().is_none());

        store
            .upsert_orchestrator_state(&OrchestratorState::new("ada"))
            .await
            .unwrap();
        assert!(store.get_orchestrator_state("ada").await.unwrap().is_some());
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn colon_bearing_ids_do_not_collide() {
        let store = InMemoryStore::new();
        let a = KnowledgeState::new("a", &SkillDefinition::new("b:c", "x"), BktParams::default());
        let mut b =
            KnowledgeState::new("a:b", &SkillDefinition::new("c", "y"), BktParams::default());
        b.total_attempts = 9;
        store.upsert_knowledge_state(&a).await.unwrap();
        store.upsert_knowledge_state(&b).await.unwrap();

        assert_eq!(store.len(), 2);
        let loaded = store.get_knowledge_state("a", "b:c").await.unwrap().unwrap();
        assert_eq!(loaded.total_attempts, 0);
        assert_eq!(store.knowledge_states_for("a").len(), 1);
    }

    #[test]
    fn labels_join_learner_and_item() {
        assert_eq!(state_label("ada", "fractions"), "ada:fractions");
        assert_eq!(review_label("ada", "fractions"), "ada:review:fractions");
        assert_ne!(item_key("a", "b:c"), item_key("a:b", "c"));
    }
}
