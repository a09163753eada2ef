use serde::{Deserialize, Serialize};

use crate::learner::types::BktParams;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BktConfig {
    pub default_params: BktParams,
    pub safety_critical_params: BktParams,
    /// Guess detection only applies below this prior mastery.
    pub guess_mastery_ceiling: f64,
    /// Share of the Bayesian evidence kept for a suspected guess.
    pub guess_evidence_weight: f64,
    pub regression_threshold: f64,
    pub failure_streak_threshold: u32,
}

impl Default for BktConfig {
    fn default() -> Self {
        Self {
            default_params: BktParams::default(),
            safety_critical_params: BktParams::safety_critical(),
            guess_mastery_ceiling: 0.5,
            guess_evidence_weight: 0.3,
            regression_threshold: 0.2,
            failure_streak_threshold: 3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HesitationConfig {
    pub high_confidence_ratio: f64,
    pub medium_confidence_ratio: f64,
    pub low_confidence_ratio: f64,
    pub guess_ratio: f64,
    pub guess_multiplier: f64,
    pub high_multiplier: f64,
    pub medium_multiplier: f64,
    pub low_multiplier: f64,
    pub uncertain_multiplier: f64,
    pub min_difficulty_multiplier: f64,
    pub max_difficulty_multiplier: f64,
    pub history_weight: f64,
}

impl Default for HesitationConfig {
    fn default() -> Self {
        Self {
            high_confidence_ratio: 0.5,
            medium_confidence_ratio: 1.0,
            low_confidence_ratio: 1.5,
            guess_ratio: 0.2,
            guess_multiplier: 0.5,
            high_multiplier: 1.2,
            medium_multiplier: 1.0,
            low_multiplier: 0.8,
            uncertain_multiplier: 0.6,
            min_difficulty_multiplier: 0.5,
            max_difficulty_multiplier: 2.0,
            history_weight: 0.5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecayParams {
    /// λ per day for a skill practiced once.
    pub base_rate: f64,
    pub strength_factor: f64,
    pub min_rate_fraction: f64,
    pub mastery_floor: f64,
    pub review_threshold: f64,
}

impl Default for DecayParams {
    fn default() -> Self {
        Self {
            base_rate: 0.1,
            strength_factor: 0.01,
            min_rate_fraction: 0.1,
            mastery_floor: 0.1,
            review_threshold: 0.7,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Sm2Config {
    pub initial_easiness: f64,
    pub min_easiness: f64,
    pub first_interval: u32,
    pub second_interval: u32,
    pub max_interval: u32,
    pub passing_quality: u8,
}

impl Default for Sm2Config {
    fn default() -> Self {
        Self {
            initial_easiness: 2.5,
            min_easiness: 1.3,
            first_interval: 1,
            second_interval: 6,
            max_interval: 730,
            passing_quality: 3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadWeights {
    pub error_rate: f64,
    pub revision_rate: f64,
    pub pace_deviation: f64,
    pub rage_click_rate: f64,
    pub first_action_delay: f64,
}

impl Default for LoadWeights {
    fn default() -> Self {
        Self {
            error_rate: 0.35,
            revision_rate: 0.15,
            pace_deviation: 0.20,
            rage_click_rate: 0.20,
            first_action_delay: 0.10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CognitiveLoadConfig {
    pub window_secs: i64,
    pub max_events: usize,
    pub min_events: usize,
    pub weights: LoadWeights,
    pub moderate_threshold: f64,
    pub high_threshold: f64,
    pub overload_threshold: f64,
    pub revision_saturation: f64,
    pub rage_click_saturation: f64,
    pub first_action_saturation_ms: f64,
}

impl Default for CognitiveLoadConfig {
    fn default() -> Self {
        Self {
            window_secs: 300,
            max_events: 256,
            min_events: 3,
            weights: LoadWeights::default(),
            moderate_threshold: 0.3,
            high_threshold: 0.5,
            overload_threshold: 0.7,
            revision_saturation: 3.0,
            rage_click_saturation: 2.0,
            first_action_saturation_ms: 10_000.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeConfig {
    pub min_probes: usize,
    pub max_probes: usize,
    pub saturation_attempts: f64,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            min_probes: 3,
            max_probes: 12,
            saturation_attempts: 10.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    pub cold_start_max: u64,
    pub personalized_min: u64,
    pub cold_start_bkt_weight: f64,
    pub personalized_bkt_weight: f64,
    pub response_time_alpha: f64,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            cold_start_max: 5,
            personalized_min: 20,
            cold_start_bkt_weight: 0.9,
            personalized_bkt_weight: 0.1,
            response_time_alpha: 0.1,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LearnerEngineConfig {
    pub bkt: BktConfig,
    pub hesitation: HesitationConfig,
    pub decay: DecayParams,
    pub sm2: Sm2Config,
    pub cognitive_load: CognitiveLoadConfig,
    pub probes: ProbeConfig,
    pub orchestrator: OrchestratorConfig,
}

impl LearnerEngineConfig {
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(val) = env_parse::<f64>("LEARNER_GUESS_RATIO") {
            config.hesitation.guess_ratio = val.clamp(0.0, 1.0);
        }
        if let Some(val) = env_parse::<f64>("LEARNER_DECAY_BASE_RATE") {
            if val > 0.0 {
                config.decay.base_rate = val;
            }
        }
        if let Some(val) = env_parse::<f64>("LEARNER_REVIEW_THRESHOLD") {
            config.decay.review_threshold = val.clamp(0.01, 0.99);
        }
        if let Some(val) = env_parse::<i64>("LEARNER_LOAD_WINDOW_SECS") {
            if val > 0 {
                config.cognitive_load.window_secs = val;
            }
        }
        if let Some(val) = env_parse::<usize>("LEARNER_MIN_PROBES") {
            config.probes.min_probes = val.max(1);
        }
        if let Some(val) = env_parse::<usize>("LEARNER_MAX_PROBES") {
            config.probes.max_probes = val.max(config.probes.min_probes);
        }

        config
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}
