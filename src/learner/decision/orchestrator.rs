use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::learner::config::OrchestratorConfig;
use crate::learner::modeling::bkt::predict_correct;
use crate::learner::types::{clamp_probability, sanitize_ms, KnowledgeState};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    #[default]
    ColdStart,
    Transition,
    Personalized,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ColdStart => "cold_start",
            Self::Transition => "transition",
            Self::Personalized => "personalized",
        }
    }
}

pub fn next_phase(interactions: u64, config: &OrchestratorConfig) -> Phase {
    if interactions <= config.cold_start_max {
        Phase::ColdStart
    } else if interactions >= config.personalized_min {
        Phase::Personalized
    } else {
        Phase::Transition
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelWeights {
    pub bkt: f64,
    pub temporal: f64,
    pub phase: Phase,
}

impl Default for ModelWeights {
    fn default() -> Self {
        calculate_model_weights(0)
    }
}

pub fn calculate_model_weights(interactions: u64) -> ModelWeights {
    weights_for(interactions, &OrchestratorConfig::default())
}

fn weights_for(interactions: u64, config: &OrchestratorConfig) -> ModelWeights {
    let phase = next_phase(interactions, config);
    let bkt = match phase {
        Phase::ColdStart => config.cold_start_bkt_weight,
        Phase::Personalized => config.personalized_bkt_weight,
        Phase::Transition => {
            let span = config.personalized_min.saturating_sub(config.cold_start_max).max(1) as f64;
            let t = ((interactions - config.cold_start_max) as f64 / span).clamp(0.0, 1.0);
            config.cold_start_bkt_weight
                - (config.cold_start_bkt_weight - config.personalized_bkt_weight) * t
        }
    };
    let bkt = bkt.clamp(0.0, 1.0);
    ModelWeights {
        bkt,
        temporal: 1.0 - bkt,
        phase,
    }
}

/// Without a temporal prediction the BKT value passes through untouched.
pub fn blend_predictions(bkt: f64, temporal: Option<f64>, weights: &ModelWeights) -> f64 {
    match temporal.filter(|t| t.is_finite()) {
        None => bkt,
        Some(t) => clamp_probability(weights.bkt * bkt + weights.temporal * t),
    }
}

/// Learner-specific model consulted once enough interactions exist.
pub trait TemporalPredictor: Send + Sync {
    fn predict(&self, learner_id: &str, skill_id: &str) -> Option<f64>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrchestratorState {
    pub learner_id: String,
    pub total_interactions: u64,
    pub weights: ModelWeights,
    pub last_interaction: Option<DateTime<Utc>>,
    pub average_response_time_ms: Option<f64>,
}

impl OrchestratorState {
    pub fn new(learner_id: &str) -> Self {
        Self {
            learner_id: learner_id.to_string(),
            total_interactions: 0,
            weights: ModelWeights::default(),
            last_interaction: None,
            average_response_time_ms: None,
        }
    }

    pub fn phase(&self) -> Phase {
        self.weights.phase
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlendedPrediction {
    pub bkt_prediction: f64,
    pub temporal_prediction: Option<f64>,
    pub blended: f64,
    pub weights: ModelWeights,
}

pub struct Orchestrator {
    config: OrchestratorConfig,
}

impl Orchestrator {
    pub fn new(config: OrchestratorConfig) -> Self {
        Self { config }
    }

    pub fn calculate_model_weights(&self, interactions: u64) -> ModelWeights {
        weights_for(interactions, &self.config)
    }

    pub fn next_phase(&self, interactions: u64) -> Phase {
        next_phase(interactions, &self.config)
    }

    pub fn record_interaction(
        &self,
        state: &OrchestratorState,
        response_time_ms: f64,
        at: DateTime<Utc>,
    ) -> OrchestratorState {
        let total = state.total_interactions.saturating_add(1);
        let weights = self.calculate_model_weights(total);
        let latency = sanitize_ms(response_time_ms);
        let alpha = self.config.response_time_alpha.clamp(0.0, 1.0);
        let average_response_time_ms = Some(match state.average_response_time_ms {
            Some(avg) if avg.is_finite() => alpha * latency + (1.0 - alpha) * avg,
            _ => latency,
        });

        if weights.phase != state.weights.phase {
            tracing::info!(
                learner_id = %state.learner_id,
                from = state.weights.phase.as_str(),
                to = weights.phase.as_str(),
                interactions = total,
                "learner model phase transition"
            );
        }

        OrchestratorState {
            learner_id: state.learner_id.clone(),
            total_interactions: total,
            weights,
            last_interaction: Some(match state.last_interaction {
                Some(prev) if prev > at => prev,
                _ => at,
            }),
            average_response_time_ms,
        }
    }

    pub fn predict(
        &self,
        state: &OrchestratorState,
        knowledge: &KnowledgeState,
        temporal: Option<&dyn TemporalPredictor>,
    ) -> BlendedPrediction {
        let bkt_prediction = predict_correct(knowledge);
        let temporal_prediction = temporal
            .and_then(|t| t.predict(&knowledge.learner_id, &knowledge.skill_id))
            .filter(|p| p.is_finite())
            .map(clamp_probability);
        let weights = self.calculate_model_weights(state.total_interactions);
        BlendedPrediction {
            bkt_prediction,
            temporal_prediction,
            blended: blend_predictions(bkt_prediction, temporal_prediction, &weights),
            weights,
        }
    }
}

impl Default for Orchestrator {
    fn default() -> Self {
        Self::new(OrchestratorConfig::default())
    }
}

pub fn explain_model_state(state: &OrchestratorState) -> String {
    let n = state.total_interactions;
    let w = &state.weights;
    let stage = match w.phase {
        Phase::ColdStart => "Still getting to know this learner, so predictions lean on typical learner behaviour",
        Phase::Transition => "Shifting from typical learner behaviour towards this learner's own history",
        Phase::Personalized => "Enough history exists to rely mainly on this learner's own patterns",
    };
    format!(
        "{stage} ({n} interaction(s) so far; {:.0}% population model, {:.0}% personal model).",
        w.bkt * 100.0,
        w.temporal * 100.0
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::learner::types::{BktParams, SkillDefinition};

    struct Fixed(f64);

    impl TemporalPredictor for Fixed {
        fn predict(&self, _learner_id: &str, _skill_id: &str) -> Option<f64> {
            Some(self.0)
        }
    }

    #[test]
    fn phase_boundaries() {
        let c = OrchestratorConfig::default();
        assert_eq!(next_phase(0, &c), Phase::ColdStart);
        assert_eq!(next_phase(5, &c), Phase::ColdStart);
        assert_eq!(next_phase(6, &c), Phase::Transition);
        assert_eq!(next_phase(19, &c), Phase::Transition);
        assert_eq!(next_phase(20, &c), Phase::Personalized);
        assert_eq!(Phase::default(), Phase::ColdStart);
        assert_eq!(OrchestratorState::new("l").phase(), Phase::ColdStart);
    }

    #[test]
    fn transition_interpolates_weights() {
        let w = calculate_model_weights(12);
        assert_eq!(w.phase, Phase::Transition);
        assert!((w.bkt - 0.527).abs() < 0.01);
        assert!((w.temporal - 0.473).abs() < 0.01);
    }

    #[test]
    fn weights_at_extremes() {
        let cold = calculate_model_weights(3);
        assert!((cold.bkt - 0.9).abs() < 1e-12 && (cold.temporal - 0.1).abs() < 1e-12);
        let personal = calculate_model_weights(500);
        assert!((personal.bkt - 0.1).abs() < 1e-12 && (personal.temporal - 0.9).abs() < 1e-12);
    }

    #[test]
    fn blend_passes_bkt_through_without_temporal() {
        let w = calculate_model_weights(30);
        assert_eq!(blend_predictions(0.42, None, &w), 0.42);
        let blended = blend_predictions(1.0, Some(1.0), &w);
        assert!(blended <= 0.999);
    }

    #[test]
    fn record_interaction_tracks_ema_and_phase() {
        let orch = Orchestrator::default();
        let mut state = OrchestratorState::new("l");
        let now = Utc::now();
        state = orch.record_interaction(&state, 1_000.0, now);
        assert_eq!(state.average_response_time_ms, Some(1_000.0));
        state = orch.record_interaction(&state, 2_000.0, now);
        assert!((state.average_response_time_ms.unwrap() - 1_100.0).abs() < 1e-9);
        for _ in 0..4 {
            state = orch.record_interaction(&state, 1_000.0, now);
        }
        assert_eq!(state.total_interactions, 6);
        assert_eq!(state.phase(), Phase::Transition);
    }

    #[test]
    fn predict_uses_temporal_model_when_available() {
        let orch = Orchestrator::default();
        let mut state = OrchestratorState::new("l");
        state.total_interactions = 25;
        let knowledge =
            KnowledgeState::new("l", &SkillDefinition::new("s", "S"), BktParams::default());
        let without = orch.predict(&state, &knowledge, None);
        assert_eq!(without.blended, without.bkt_prediction);
        let with = orch.predict(&state, &knowledge, Some(&Fixed(0.9)));
        assert!((with.blended - (0.1 * with.bkt_prediction + 0.9 * 0.9)).abs() < 1e-9);
    }

    #[test]
    fn explanation_names_phase_mix() {
        let mut state = OrchestratorState::new("l");
        state.total_interactions = 12;
        state.weights = calculate_model_weights(12);
        let text = explain_model_state(&state);
        assert!(text.contains("12 interaction"));
        assert!(text.contains("Shifting"));
    }
}
