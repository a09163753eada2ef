use serde::{Deserialize, Serialize};

use crate::learner::config::HesitationConfig;
use crate::learner::types::{sanitize_ms, ContentType, ResponseContext, MAX_PROBABILITY};

const MIN_EXPECTED_MS: f64 = 1.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfidenceLevel {
    High,
    Medium,
    Low,
    Uncertain,
}

impl ConfidenceLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
            Self::Uncertain => "uncertain",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HesitationSignal {
    pub latency_ms: f64,
    pub expected_ms: f64,
    pub ratio: f64,
    pub confidence: ConfidenceLevel,
    pub possible_guess: bool,
}

pub struct HesitationMonitor {
    config: HesitationConfig,
}

impl HesitationMonitor {
    pub fn new(config: HesitationConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &HesitationConfig {
        &self.config
    }

    pub fn calculate_expected_response_time(&self, context: &ResponseContext) -> f64 {
        let base = context.content_type.base_response_ms();
        let multiplier = match context.difficulty.filter(|d| d.is_finite()) {
            Some(d) => {
                let d = d.clamp(0.0, 1.0);
                self.config.min_difficulty_multiplier
                    + (self.config.max_difficulty_multiplier - self.config.min_difficulty_multiplier)
                        * d
            }
            None => 1.0,
        };
        let content_expected = base * multiplier;

        let expected = match context
            .historical_average_ms
            .filter(|avg| avg.is_finite() && *avg > 0.0)
        {
            Some(avg) => {
                let w = self.config.history_weight.clamp(0.0, 1.0);
                (1.0 - w) * content_expected + w * avg
            }
            None => content_expected,
        };
        expected.max(MIN_EXPECTED_MS)
    }

    pub fn interpret_hesitation(
        &self,
        latency_ms: f64,
        correct: bool,
        context: &ResponseContext,
    ) -> HesitationSignal {
        let expected = self.calculate_expected_response_time(context);
        self.interpret_with_expected(latency_ms, expected, correct, context.content_type)
    }

    pub fn interpret_with_expected(
        &self,
        latency_ms: f64,
        expected_ms: f64,
        correct: bool,
        content_type: ContentType,
    ) -> HesitationSignal {
        let latency_ms = sanitize_ms(latency_ms);
        let expected_ms = sanitize_ms(expected_ms).max(MIN_EXPECTED_MS);
        let ratio = latency_ms / expected_ms;

        let confidence = if ratio < self.config.high_confidence_ratio {
            ConfidenceLevel::High
        } else if ratio < self.config.medium_confidence_ratio {
            ConfidenceLevel::Medium
        } else if ratio < self.config.low_confidence_ratio {
            ConfidenceLevel::Low
        } else {
            ConfidenceLevel::Uncertain
        };

        // Fast completion is expected in simulations, so it never reads as a guess.
        let possible_guess =
            correct && ratio < self.config.guess_ratio && content_type != ContentType::Simulation;

        HesitationSignal {
            latency_ms,
            expected_ms,
            ratio,
            confidence,
            possible_guess,
        }
    }

    /// Scale the learning rate by how confident the response looked.
    /// Must run before the BKT transition step.
    pub fn adjust_bkt_for_hesitation(&self, signal: &HesitationSignal, base_p_learn: f64) -> f64 {
        let multiplier = if signal.possible_guess {
            self.config.guess_multiplier
        } else {
            match signal.confidence {
                ConfidenceLevel::High => self.config.high_multiplier,
                ConfidenceLevel::Medium => self.config.medium_multiplier,
                ConfidenceLevel::Low => self.config.low_multiplier,
                ConfidenceLevel::Uncertain => self.config.uncertain_multiplier,
            }
        };
        if !base_p_learn.is_finite() {
            return 0.0;
        }
        (base_p_learn * multiplier).clamp(0.0, MAX_PROBABILITY)
    }
}

impl Default for HesitationMonitor {
    fn default() -> Self {
        Self::new(HesitationConfig::default())
    }
}

pub fn explain_hesitation(signal: &HesitationSignal) -> String {
    let pace = format!(
        "Answered in {:.1}s against an expected {:.1}s ({:.0}% of expected time)",
        signal.latency_ms / 1000.0,
        signal.expected_ms / 1000.0,
        signal.ratio * 100.0
    );
    if signal.possible_guess {
        return format!(
            "{pace}. The answer was correct but far faster than a considered response, so it may have been a guess and counts for less."
        );
    }
    let reading = match signal.confidence {
        ConfidenceLevel::High => "a quick, confident response",
        ConfidenceLevel::Medium => "a normally paced response",
        ConfidenceLevel::Low => "some hesitation",
        ConfidenceLevel::Uncertain => "substantial hesitation",
    };
    format!("{pace}, which suggests {reading}.")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mc_context() -> ResponseContext {
        ResponseContext {
            content_type: ContentType::MultipleChoice,
            difficulty: None,
            historical_average_ms: None,
        }
    }

    #[test]
    fn expected_time_scales_with_difficulty() {
        let monitor = HesitationMonitor::default();
        let easy = ResponseContext {
            difficulty: Some(0.0),
            ..mc_context()
        };
        let hard = ResponseContext {
            difficulty: Some(1.0),
            ..mc_context()
        };
        assert!((monitor.calculate_expected_response_time(&easy) - 2_500.0).abs() < 1e-9);
        assert!((monitor.calculate_expected_response_time(&hard) - 10_000.0).abs() < 1e-9);
        assert!((monitor.calculate_expected_response_time(&mc_context()) - 5_000.0).abs() < 1e-9);
    }

    #[test]
    fn expected_time_blends_history() {
        let monitor = HesitationMonitor::default();
        let ctx = ResponseContext {
            historical_average_ms: Some(9_000.0),
            ..mc_context()
        };
        assert!((monitor.calculate_expected_response_time(&ctx) - 7_000.0).abs() < 1e-9);
    }

    #[test]
    fn fast_correct_answer_is_possible_guess() {
        let monitor = HesitationMonitor::default();
        let signal = monitor.interpret_with_expected(200.0, 5_000.0, true, ContentType::MultipleChoice);
        assert!((signal.ratio - 0.04).abs() < 1e-12);
        assert!(signal.possible_guess);
        assert_eq!(signal.confidence, ConfidenceLevel::High);
        let p_learn = monitor.adjust_bkt_for_hesitation(&signal, 0.1);
        assert!((p_learn - 0.05).abs() < 1e-12);
    }

    #[test]
    fn simulations_and_incorrect_answers_are_never_guesses() {
        let monitor = HesitationMonitor::default();
        let sim = monitor.interpret_with_expected(100.0, 30_000.0, true, ContentType::Simulation);
        assert!(!sim.possible_guess);
        let wrong = monitor.interpret_with_expected(100.0, 5_000.0, false, ContentType::MultipleChoice);
        assert!(!wrong.possible_guess);
    }

    #[test]
    fn confidence_buckets_follow_ratio() {
        let monitor = HesitationMonitor::default();
        let level = |latency: f64| {
            monitor
                .interpret_with_expected(latency, 1_000.0, false, ContentType::MultipleChoice)
                .confidence
        };
        assert_eq!(level(400.0), ConfidenceLevel::High);
        assert_eq!(level(900.0), ConfidenceLevel::Medium);
        assert_eq!(level(1_400.0), ConfidenceLevel::Low);
        assert_eq!(level(2_000.0), ConfidenceLevel::Uncertain);
    }

    #[test]
    fn multipliers_per_confidence() {
        let monitor = HesitationMonitor::default();
        let p = |latency: f64| {
            let s = monitor.interpret_with_expected(latency, 1_000.0, false, ContentType::MultipleChoice);
            monitor.adjust_bkt_for_hesitation(&s, 0.1)
        };
        assert!((p(400.0) - 0.12).abs() < 1e-12);
        assert!((p(900.0) - 0.10).abs() < 1e-12);
        assert!((p(1_400.0) - 0.08).abs() < 1e-12);
        assert!((p(2_000.0) - 0.06).abs() < 1e-12);
    }

    #[test]
    fn negative_latency_is_clamped() {
        let monitor = HesitationMonitor::default();
        let s = monitor.interpret_hesitation(-500.0, false, &mc_context());
        assert_eq!(s.latency_ms, 0.0);
        assert!(s.ratio >= 0.0);
    }

    #[test]
    fn explanation_mentions_guess() {
        let monitor = HesitationMonitor::default();
        let s = monitor.interpret_with_expected(200.0, 5_000.0, true, ContentType::MultipleChoice);
        assert!(explain_hesitation(&s).contains("guess"));
    }
}
