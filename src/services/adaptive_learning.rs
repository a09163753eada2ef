//! Adaptive learning facade
//!
//! One attempt flows through BKT (with hesitation), the review queue, the
//! orchestrator and the cognitive-load detector. State is read and written
//! through the injected [`LearnerStore`]; the in-process cache only ever holds
//! values the store has accepted.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use crate::learner::config::LearnerEngineConfig;
use crate::learner::decision::{
    BlendedPrediction, IntelligentProbeSelector, Orchestrator, OrchestratorState, Phase, Probe,
    ProbeSession, TemporalPredictor,
};
use crate::learner::memory::{
    adjust_interval_by_mastery, mastery_to_quality, DecayedState, SkillDecayCalculator, Sm2Item,
    Sm2Scheduler,
};
use crate::learner::modeling::{
    BktInsights, CognitiveLoadAssessment, CognitiveLoadDetector, HesitationMonitor,
    KnowledgeTracer, TelemetryEvent,
};
use crate::learner::persistence::{
    item_key, review_label, state_label, LearnerItemKey, LearnerStore, StoreError,
};
use crate::learner::types::{AttemptRecord, KnowledgeState, SkillDefinition};
use crate::services::xapi::{extract_attempt, XapiError, XapiStatement};

const DEFAULT_SESSION: &str = "default";

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("store operation failed for {key}: {source}")]
    Persistence {
        key: String,
        #[source]
        source: StoreError,
    },
    #[error("invalid xAPI statement: {0}")]
    InvalidStatement(#[from] XapiError),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessedAttempt {
    pub knowledge_state: KnowledgeState,
    pub insights: BktInsights,
    pub cognitive_load: CognitiveLoadAssessment,
    pub review: Sm2Item,
    pub prediction: BlendedPrediction,
}

type KeyLocks<K> = Mutex<HashMap<K, Arc<AsyncMutex<()>>>>;

/// Serialises work on one key; the map entry is dropped with its last holder.
struct KeyGuard<'a, K: Eq + Hash> {
    locks: &'a KeyLocks<K>,
    key: K,
    guard: Option<OwnedMutexGuard<()>>,
}

impl<K: Eq + Hash> Drop for KeyGuard<'_, K> {
    fn drop(&mut self) {
        drop(self.guard.take());
        let mut locks = self.locks.lock();
        if locks
            .get(&self.key)
            .is_some_and(|m| Arc::strong_count(m) == 1)
        {
            locks.remove(&self.key);
        }
    }
}

async fn lock_key<K: Eq + Hash + Clone>(locks: &KeyLocks<K>, key: K) -> KeyGuard<'_, K> {
    let mutex = {
        let mut map = locks.lock();
        map.entry(key.clone()).or_default().clone()
    };
    let guard = mutex.lock_owned().await;
    KeyGuard {
        locks,
        key,
        guard: Some(guard),
    }
}

fn persistence_error(key: String, source: StoreError) -> ServiceError {
    tracing::warn!(key = %key, error = %source, "learner store operation failed");
    ServiceError::Persistence { key, source }
}

fn orchestrator_label(learner_id: &str) -> String {
    format!("{}:orchestrator", learner_id)
}

pub struct AdaptiveLearningService<S: LearnerStore> {
    config: LearnerEngineConfig,
    store: Arc<S>,
    tracer: KnowledgeTracer,
    decay: SkillDecayCalculator,
    scheduler: Sm2Scheduler,
    orchestrator: Orchestrator,
    probes: IntelligentProbeSelector,
    load_detector: CognitiveLoadDetector,
    temporal: Option<Arc<dyn TemporalPredictor>>,
    knowledge_cache: RwLock<HashMap<LearnerItemKey, KnowledgeState>>,
    skill_locks: KeyLocks<LearnerItemKey>,
    learner_locks: KeyLocks<String>,
}

impl<S: LearnerStore> AdaptiveLearningService<S> {
    pub fn new(config: LearnerEngineConfig, store: Arc<S>) -> Self {
        let hesitation = HesitationMonitor::new(config.hesitation.clone());
        Self {
            tracer: KnowledgeTracer::new(config.bkt.clone(), hesitation),
            decay: SkillDecayCalculator::new(config.decay.clone()),
            scheduler: Sm2Scheduler::new(config.sm2.clone()),
            orchestrator: Orchestrator::new(config.orchestrator.clone()),
            probes: IntelligentProbeSelector::new(config.probes.clone()),
            load_detector: CognitiveLoadDetector::new(config.cognitive_load.clone()),
            temporal: None,
            knowledge_cache: RwLock::new(HashMap::new()),
            skill_locks: Mutex::new(HashMap::new()),
            learner_locks: Mutex::new(HashMap::new()),
            config,
            store,
        }
    }

    pub fn with_temporal_predictor(mut self, predictor: Arc<dyn TemporalPredictor>) -> Self {
        self.temporal = Some(predictor);
        self
    }

    pub fn config(&self) -> &LearnerEngineConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn cached_states(&self) -> usize {
        self.knowledge_cache.read().len()
    }

    pub fn cached_state(&self, learner_id: &str, skill_id: &str) -> Option<KnowledgeState> {
        self.knowledge_cache
            .read()
            .get(&item_key(learner_id, skill_id))
            .cloned()
    }

    /// Loads from cache or store; a learner's first touch yields prior defaults
    /// that are not cached until an attempt has been persisted.
    pub async fn get_or_create_knowledge_state(
        &self,
        learner_id: &str,
        skill_id: &str,
        skill: Option<&SkillDefinition>,
    ) -> Result<KnowledgeState, ServiceError> {
        if let Some(state) = self.cached_state(learner_id, skill_id) {
            return Ok(state);
        }
        let _skill_guard = lock_key(&self.skill_locks, item_key(learner_id, skill_id)).await;
        self.load_knowledge_state(learner_id, skill_id, skill).await
    }

    /// Cache fill path. Callers hold the skill lock, so no attempt can land
    /// between the store read and the cache insert.
    async fn load_knowledge_state(
        &self,
        learner_id: &str,
        skill_id: &str,
        skill: Option<&SkillDefinition>,
    ) -> Result<KnowledgeState, ServiceError> {
        let key = item_key(learner_id, skill_id);
        if let Some(state) = self.knowledge_cache.read().get(&key) {
            return Ok(state.clone());
        }

        let stored = self
            .store
            .get_knowledge_state(learner_id, skill_id)
            .await
            .map_err(|e| persistence_error(state_label(learner_id, skill_id), e))?;

        match stored {
            Some(state) => Ok(self
                .knowledge_cache
                .write()
                .entry(key)
                .or_insert(state)
                .clone()),
            None => {
                let fallback;
                let skill = match skill {
                    Some(skill) => skill,
                    None => {
                        fallback = SkillDefinition::new(skill_id, skill_id);
                        &fallback
                    }
                };
                Ok(self.tracer.initial_state(learner_id, skill))
            }
        }
    }

    async fn load_orchestrator_state(
        &self,
        learner_id: &str,
    ) -> Result<OrchestratorState, ServiceError> {
        Ok(self
            .store
            .get_orchestrator_state(learner_id)
            .await
            .map_err(|e| persistence_error(orchestrator_label(learner_id), e))?
            .unwrap_or_else(|| OrchestratorState::new(learner_id)))
    }

    async fn next_review(
        &self,
        learner_id: &str,
        state: &KnowledgeState,
        correct: bool,
        at: DateTime<Utc>,
    ) -> Result<Sm2Item, ServiceError> {
        let item = self
            .store
            .get_sm2_item(learner_id, &state.skill_id)
            .await
            .map_err(|e| persistence_error(review_label(learner_id, &state.skill_id), e))?
            .unwrap_or_else(|| self.scheduler.new_item(&state.skill_id, learner_id, at));

        let quality = mastery_to_quality(state.mastery_probability, correct);
        let mut next = self.scheduler.update(&item, quality, at);
        next.interval = adjust_interval_by_mastery(
            next.interval,
            state.mastery_probability,
            self.scheduler.max_interval(),
        );
        next.next_review = at + Duration::days(next.interval as i64);
        Ok(next)
    }

    pub async fn process_attempt(
        &self,
        learner_id: &str,
        session_id: &str,
        attempt: &AttemptRecord,
        skill: Option<&SkillDefinition>,
    ) -> Result<ProcessedAttempt, ServiceError> {
        let skill_id = attempt.skill_id.as_str();
        let key = item_key(learner_id, skill_id);
        let _skill_guard = lock_key(&self.skill_locks, key.clone()).await;

        let skill_def = match skill {
            Some(s) => s.clone(),
            None => SkillDefinition::new(skill_id, skill_id),
        };
        let state = self
            .load_knowledge_state(learner_id, skill_id, Some(&skill_def))
            .await?;

        // A stale latency average is acceptable; only the counter needs the learner lock.
        let average_ms = self
            .load_orchestrator_state(learner_id)
            .await?
            .average_response_time_ms;
        let context = skill_def.response_context(average_ms);
        let update = self.tracer.update(&state, attempt, &context);
        let mut next_state = update.state;
        let mut insights = update.insights;

        let review = self
            .next_review(learner_id, &next_state, attempt.correct, attempt.timestamp)
            .await?;
        next_state.next_review_due = Some(review.next_review);

        self.store
            .upsert_sm2_item(&review)
            .await
            .map_err(|e| persistence_error(review_label(learner_id, skill_id), e))?;

        let orchestrator_state = {
            let _learner_guard = lock_key(&self.learner_locks, learner_id.to_string()).await;
            let current = self.load_orchestrator_state(learner_id).await?;
            let next = self.orchestrator.record_interaction(
                &current,
                attempt.response_time_ms,
                attempt.timestamp,
            );
            self.store
                .upsert_orchestrator_state(&next)
                .await
                .map_err(|e| persistence_error(orchestrator_label(learner_id), e))?;
            next
        };

        // The knowledge state goes last: once it is stored the attempt counts.
        self.store
            .upsert_knowledge_state(&next_state)
            .await
            .map_err(|e| persistence_error(state_label(learner_id, skill_id), e))?;
        self.knowledge_cache.write().insert(key, next_state.clone());

        let event = TelemetryEvent::from_attempt(attempt, Some(insights.hesitation.expected_ms));
        let cognitive_load = self.load_detector.record_event(learner_id, session_id, event);
        if insights.intervention.is_none() {
            insights.intervention = cognitive_load.intervention;
        }

        let prediction =
            self.orchestrator
                .predict(&orchestrator_state, &next_state, self.temporal.as_deref());

        tracing::debug!(
            learner_id,
            skill_id,
            session_id,
            mastery = next_state.mastery_probability,
            load = cognitive_load.load_level.as_str(),
            interval_days = review.interval,
            "attempt processed"
        );

        Ok(ProcessedAttempt {
            knowledge_state: next_state,
            insights,
            cognitive_load,
            review,
            prediction,
        })
    }

    /// Returns `Ok(None)` for statements that carry no assessment.
    pub async fn process_xapi_statement(
        &self,
        learner_id: &str,
        statement: &XapiStatement,
    ) -> Result<Option<ProcessedAttempt>, ServiceError> {
        let Some(extracted) = extract_attempt(statement)? else {
            tracing::debug!(
                learner_id,
                verb = %statement.verb.id,
                "ignoring non-assessment xAPI statement"
            );
            return Ok(None);
        };
        let session_id = extracted.session_id.as_deref().unwrap_or(DEFAULT_SESSION);
        self.process_attempt(
            learner_id,
            session_id,
            &extracted.attempt,
            Some(&extracted.skill),
        )
        .await
        .map(Some)
    }

    /// `None` when the learner has never practised the skill.
    pub async fn decayed_state(
        &self,
        learner_id: &str,
        skill_id: &str,
        as_of: DateTime<Utc>,
    ) -> Result<Option<DecayedState>, ServiceError> {
        let state = self
            .get_or_create_knowledge_state(learner_id, skill_id, None)
            .await?;
        Ok(state
            .last_practice
            .is_some()
            .then(|| self.decay.apply_decay(&state, as_of)))
    }

    pub async fn predict(
        &self,
        learner_id: &str,
        skill_id: &str,
    ) -> Result<BlendedPrediction, ServiceError> {
        let state = self
            .get_or_create_knowledge_state(learner_id, skill_id, None)
            .await?;
        let orchestrator_state = self.load_orchestrator_state(learner_id).await?;
        Ok(self
            .orchestrator
            .predict(&orchestrator_state, &state, self.temporal.as_deref()))
    }

    pub fn start_probe_session(&self, learner_id: &str, target_probe_count: usize) -> ProbeSession {
        self.probes.start_session(learner_id, target_probe_count)
    }

    /// Picks the most informative probe using whatever the store already knows.
    /// Diagnostic selection only runs while the learner is in cold start.
    pub async fn next_probe(
        &self,
        candidates: &[Probe],
        session: &ProbeSession,
    ) -> Result<Option<Probe>, ServiceError> {
        let phase = self.load_orchestrator_state(&session.learner_id).await?.phase();
        if phase != Phase::ColdStart {
            tracing::debug!(
                learner_id = %session.learner_id,
                phase = phase.as_str(),
                "learner past cold start; no diagnostic item selected"
            );
            return Ok(None);
        }

        let mut states = HashMap::new();
        for probe in candidates {
            if states.contains_key(&probe.skill_id) {
                continue;
            }
            let state = match self.cached_state(&session.learner_id, &probe.skill_id) {
                Some(state) => Some(state),
                None => self
                    .store
                    .get_knowledge_state(&session.learner_id, &probe.skill_id)
                    .await
                    .map_err(|e| {
                        persistence_error(state_label(&session.learner_id, &probe.skill_id), e)
                    })?,
            };
            if let Some(state) = state {
                states.insert(probe.skill_id.clone(), state);
            }
        }
        Ok(self
            .probes
            .select_next_probe(candidates, &states, session)
            .cloned())
    }

    pub fn cognitive_load(
        &self,
        learner_id: &str,
        session_id: &str,
    ) -> Option<CognitiveLoadAssessment> {
        self.load_detector.current_assessment(learner_id, session_id)
    }

    pub fn clear_session(&self, learner_id: &str, session_id: &str) -> bool {
        self.load_detector.clear_session(learner_id, session_id)
    }

    pub fn active_sessions(&self) -> usize {
        self.load_detector.active_sessions()
    }

    pub fn invalidate_cache(&self, learner_id: &str) -> usize {
        let mut cache = self.knowledge_cache.write();
        let before = cache.len();
        cache.retain(|(learner, _), _| learner != learner_id);
        before - cache.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::learner::persistence::InMemoryStore;

    fn service() -> AdaptiveLearningService<InMemoryStore> {
        AdaptiveLearningService::new(LearnerEngineConfig::default(), Arc::new(InMemoryStore::new()))
    }

    #[tokio::test]
    async fn first_touch_is_not_cached() {
        let svc = service();
        let state = svc
            .get_or_create_knowledge_state("ada", "fractions", None)
            .await
            .unwrap();
        assert_eq!(state.total_attempts, 0);
        assert_eq!(svc.cached_states(), 0);
    }

    #[tokio::test]
    async fn key_locks_are_released() {
        let svc = service();
        let attempt = AttemptRecord::new("fractions", true, 4_000.0);
        svc.process_attempt("ada", "s1", &attempt, None).await.unwrap();
        assert!(svc.skill_locks.lock().is_empty());
        assert!(svc.learner_locks.lock().is_empty());
    }

    #[tokio::test]
    async fn invalidate_cache_only_touches_one_learner() {
        let svc = service();
        let attempt = AttemptRecord::new("fractions", true, 4_000.0);
        svc.process_attempt("ada", "s1", &attempt, None).await.unwrap();
        svc.process_attempt("adam", "s1", &attempt, None).await.unwrap();
        assert_eq!(svc.invalidate_cache("ada"), 1);
        assert!(svc.cached_state("adam", "fractions").is_some());

        let reloaded = svc
            .get_or_create_knowledge_state("ada", "fractions", None)
            .await
            .unwrap();
        assert_eq!(reloaded.total_attempts, 1);
    }

    #[tokio::test]
    async fn invalidate_cache_ignores_learners_sharing_a_prefix() {
        let svc = service();
        let attempt = AttemptRecord::new("http://example.com/skill:1", true, 4_000.0);
        svc.process_attempt("a", "s1", &attempt, None).await.unwrap();
        svc.process_attempt("a:b", "s1", &attempt, None).await.unwrap();

        assert_eq!(svc.invalidate_cache("a"), 1);
        assert!(svc.cached_state("a", "http://example.com/skill:1").is_none());
        assert!(svc.cached_state("a:b", "http://example.com/skill:1").is_some());
    }

    #[tokio::test]
    async fn store_read_never_replaces_a_cached_state() {
        let svc = service();
        let attempt = AttemptRecord::new("fractions", true, 4_000.0);
        svc.process_attempt("ada", "s1", &attempt, None).await.unwrap();

        let mut newer = svc.cached_state("ada", "fractions").unwrap();
        newer.total_attempts = 7;
        svc.knowledge_cache
            .write()
            .insert(item_key("ada", "fractions"), newer);

        let loaded = svc
            .load_knowledge_state("ada", "fractions", None)
            .await
            .unwrap();
        assert_eq!(loaded.total_attempts, 7);
    }
}
