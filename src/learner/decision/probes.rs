//! Cold-start diagnostic probing
//!
//! Picks the probe whose skill carries the most information gain: binary
//! entropy of the current mastery estimate averaged with an under-observation
//! bonus. Skills with no state yet are maximally informative.

use std::collections::{BTreeSet, HashMap};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::learner::config::ProbeConfig;
use crate::learner::types::{ContentType, KnowledgeState};

const EPSILON: f64 = 1e-12;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Probe {
    pub probe_id: String,
    pub skill_id: String,
    #[serde(default)]
    pub content_type: ContentType,
    #[serde(default)]
    pub difficulty: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProbeResult {
    pub probe_id: String,
    pub skill_id: String,
    pub correct: bool,
    pub response_time_ms: f64,
    pub completed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProbeSession {
    pub session_id: Uuid,
    pub learner_id: String,
    pub probes_completed: Vec<ProbeResult>,
    pub skills_assessed: BTreeSet<String>,
    pub target_probe_count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProbeSummary {
    pub completed: usize,
    pub remaining: usize,
    pub accuracy: Option<f64>,
    pub correct_skills: Vec<String>,
    pub missed_skills: Vec<String>,
}

impl ProbeSession {
    pub fn new(learner_id: &str, target_probe_count: usize, config: &ProbeConfig) -> Self {
        let min = config.min_probes.max(1);
        let max = config.max_probes.max(min);
        Self {
            session_id: Uuid::new_v4(),
            learner_id: learner_id.to_string(),
            probes_completed: Vec::new(),
            skills_assessed: BTreeSet::new(),
            target_probe_count: target_probe_count.clamp(min, max),
        }
    }

    pub fn is_complete(&self) -> bool {
        self.probes_completed.len() >= self.target_probe_count
    }

    pub fn remaining(&self) -> usize {
        self.target_probe_count
            .saturating_sub(self.probes_completed.len())
    }

    /// Returns false when the session is already complete or the skill was probed.
    pub fn record_result(&mut self, result: ProbeResult) -> bool {
        if self.is_complete() || self.skills_assessed.contains(&result.skill_id) {
            return false;
        }
        self.skills_assessed.insert(result.skill_id.clone());
        self.probes_completed.push(result);
        true
    }

    pub fn summary(&self) -> ProbeSummary {
        let completed = self.probes_completed.len();
        let correct = self.probes_completed.iter().filter(|r| r.correct).count();
        let (correct_skills, missed_skills) = self
            .probes_completed
            .iter()
            .fold((Vec::new(), Vec::new()), |(mut ok, mut miss), r| {
                if r.correct {
                    ok.push(r.skill_id.clone());
                } else {
                    miss.push(r.skill_id.clone());
                }
                (ok, miss)
            });
        ProbeSummary {
            completed,
            remaining: self.remaining(),
            accuracy: (completed > 0).then(|| correct as f64 / completed as f64),
            correct_skills,
            missed_skills,
        }
    }
}

/// Binary Shannon entropy in bits; 1.0 at p = 0.5, 0 at the extremes.
pub fn calculate_entropy(p: f64) -> f64 {
    if !p.is_finite() || p <= EPSILON || p >= 1.0 - EPSILON {
        return 0.0;
    }
    let q = 1.0 - p;
    -(p * p.log2() + q * q.log2())
}

pub fn calculate_information_gain(state: Option<&KnowledgeState>) -> f64 {
    information_gain(state, ProbeConfig::default().saturation_attempts)
}

fn information_gain(state: Option<&KnowledgeState>, saturation_attempts: f64) -> f64 {
    let Some(state) = state else {
        return 1.0;
    };
    let entropy = calculate_entropy(state.mastery_probability);
    let under_observed = if saturation_attempts > 0.0 {
        (1.0 - state.total_attempts as f64 / saturation_attempts).max(0.0)
    } else {
        0.0
    };
    ((entropy + under_observed) / 2.0).clamp(0.0, 1.0)
}

pub struct IntelligentProbeSelector {
    config: ProbeConfig,
}

impl IntelligentProbeSelector {
    pub fn new(config: ProbeConfig) -> Self {
        Self { config }
    }

    pub fn start_session(&self, learner_id: &str, target_probe_count: usize) -> ProbeSession {
        ProbeSession::new(learner_id, target_probe_count, &self.config)
    }

    pub fn information_gain(&self, state: Option<&KnowledgeState>) -> f64 {
        information_gain(state, self.config.saturation_attempts)
    }

    pub fn select_next_probe<'a>(
        &self,
        candidates: &'a [Probe],
        skill_states: &HashMap<String, KnowledgeState>,
        session: &ProbeSession,
    ) -> Option<&'a Probe> {
        if session.is_complete() {
            return None;
        }
        candidates
            .iter()
            .filter(|p| !session.skills_assessed.contains(&p.skill_id))
            .map(|p| (p, self.information_gain(skill_states.get(&p.skill_id))))
            .max_by(|(a, ga), (b, gb)| {
                ga.partial_cmp(gb)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then_with(|| b.probe_id.cmp(&a.probe_id))
            })
            .map(|(p, _)| p)
    }
}

impl Default for IntelligentProbeSelector {
    fn default() -> Self {
        Self::new(ProbeConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::learner::types::{BktParams, SkillDefinition};

    fn probe(id: &str, skill: &str) -> Probe {
        Probe {
            probe_id: id.into(),
            skill_id: skill.into(),
            content_type: ContentType::MultipleChoice,
            difficulty: None,
        }
    }

    fn state(skill: &str, mastery: f64, attempts: u32) -> KnowledgeState {
        let mut s = KnowledgeState::new("l", &SkillDefinition::new(skill, skill), BktParams::default());
        s.mastery_probability = mastery;
        s.total_attempts = attempts;
        s
    }

    fn result(skill: &str, correct: bool) -> ProbeResult {
        ProbeResult {
            probe_id: format!("p-{skill}"),
            skill_id: skill.into(),
            correct,
            response_time_ms: 3_000.0,
            completed_at: Utc::now(),
        }
    }

    #[test]
    fn entropy_shape() {
        assert!((calculate_entropy(0.5) - 1.0).abs() < 1e-12);
        assert!(calculate_entropy(0.001) < 0.02);
        assert!(calculate_entropy(0.999) < 0.02);
        assert_eq!(calculate_entropy(0.0), 0.0);
        assert_eq!(calculate_entropy(1.0), 0.0);
    }

    #[test]
    fn unknown_skill_has_maximum_gain() {
        assert_eq!(calculate_information_gain(None), 1.0);
        let well_known = state("a", 0.98, 30);
        assert!(calculate_information_gain(Some(&well_known)) < 0.1);
    }

    #[test]
    fn target_count_is_clamped() {
        let config = ProbeConfig::default();
        assert_eq!(ProbeSession::new("l", 0, &config).target_probe_count, 3);
        assert_eq!(ProbeSession::new("l", 50, &config).target_probe_count, 12);
        assert_eq!(ProbeSession::new("l", 7, &config).target_probe_count, 7);
    }

    #[test]
    fn selects_most_uncertain_unprobed_skill() {
        let selector = IntelligentProbeSelector::default();
        let mut states = HashMap::new();
        states.insert("known".to_string(), state("known", 0.97, 25));
        states.insert("shaky".to_string(), state("shaky", 0.5, 2));
        let candidates = vec![probe("p1", "known"), probe("p2", "shaky")];
        let session = selector.start_session("l", 3);
        let pick = selector.select_next_probe(&candidates, &states, &session).unwrap();
        assert_eq!(pick.probe_id, "p2");
    }

    #[test]
    fn skips_probed_skills_and_stops_when_complete() {
        let selector = IntelligentProbeSelector::default();
        let states = HashMap::new();
        let candidates = vec![probe("p1", "a"), probe("p2", "b"), probe("p3", "c"), probe("p4", "d")];
        let mut session = selector.start_session("l", 3);

        assert!(session.record_result(result("a", true)));
        assert!(!session.record_result(result("a", false)));
        let pick = selector.select_next_probe(&candidates, &states, &session).unwrap();
        assert_ne!(pick.skill_id, "a");

        assert!(session.record_result(result("b", false)));
        assert!(!session.is_complete());
        assert!(session.record_result(result("c", true)));
        assert!(session.is_complete());
        assert!(selector.select_next_probe(&candidates, &states, &session).is_none());
        assert!(!session.record_result(result("d", true)));
    }

    #[test]
    fn ties_break_on_probe_id() {
        let selector = IntelligentProbeSelector::default();
        let candidates = vec![probe("p9", "x"), probe("p1", "y")];
        let session = selector.start_session("l", 3);
        let pick = selector.select_next_probe(&candidates, &HashMap::new(), &session).unwrap();
        assert_eq!(pick.probe_id, "p1");
    }

    #[test]
    fn summary_reports_accuracy() {
        let mut session = ProbeSession::new("l", 4, &ProbeConfig::default());
        session.record_result(result("a", true));
        session.record_result(result("b", false));
        let s = session.summary();
        assert_eq!(s.completed, 2);
        assert_eq!(s.remaining, 2);
        assert_eq!(s.accuracy, Some(0.5));
        assert_eq!(s.missed_skills, vec!["b".to_string()]);
    }
}
