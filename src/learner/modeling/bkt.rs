//! BKT (Bayesian Knowledge Tracing) with latency-aware learning rate
//!
//! Per attempt:
//! 1. posterior P(L|obs) by Bayes' rule using pSlip / pGuess
//! 2. suspected guesses keep only part of that evidence
//! 3. P(L_next) = P(L|obs) + (1 - P(L|obs)) × pLearn, where pLearn is
//!    pTransit scaled by the hesitation multiplier

use serde::{Deserialize, Serialize};

use crate::learner::config::BktConfig;
use crate::learner::modeling::hesitation::{explain_hesitation, HesitationMonitor, HesitationSignal};
use crate::learner::types::{
    clamp_probability, AttemptRecord, BktParams, Intervention, KnowledgeState, MasteryLevel,
    ResponseContext, SkillDefinition,
};

const EPSILON: f64 = 1e-12;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BktInsights {
    pub previous_mastery: f64,
    pub new_mastery: f64,
    pub previous_level: MasteryLevel,
    pub mastery_level: MasteryLevel,
    pub level_changed: bool,
    pub p_learn: f64,
    pub guess_detected: bool,
    pub hesitation: HesitationSignal,
    pub intervention: Option<Intervention>,
    pub rationale: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BktUpdate {
    pub state: KnowledgeState,
    pub insights: BktInsights,
}

pub struct KnowledgeTracer {
    config: BktConfig,
    hesitation: HesitationMonitor,
}

impl KnowledgeTracer {
    pub fn new(config: BktConfig, hesitation: HesitationMonitor) -> Self {
        Self { config, hesitation }
    }

    pub fn hesitation(&self) -> &HesitationMonitor {
        &self.hesitation
    }

    pub fn params_for(&self, skill: &SkillDefinition) -> BktParams {
        match skill.params {
            Some(params) => params,
            None if skill.is_safety_critical => self.config.safety_critical_params,
            None => self.config.default_params,
        }
    }

    pub fn initial_state(&self, learner_id: &str, skill: &SkillDefinition) -> KnowledgeState {
        KnowledgeState::new(learner_id, skill, self.params_for(skill))
    }

    pub fn update(
        &self,
        state: &KnowledgeState,
        attempt: &AttemptRecord,
        context: &ResponseContext,
    ) -> BktUpdate {
        let attempt = attempt.sanitized();
        let params = state.params.sanitized();
        let prior = clamp_probability(state.mastery_probability);

        let signal =
            self.hesitation
                .interpret_hesitation(attempt.response_time_ms, attempt.correct, context);
        let p_learn = self.hesitation.adjust_bkt_for_hesitation(&signal, params.p_transit);

        let evidence = bayes_posterior(prior, attempt.correct, &params);
        let guess_detected = detect_guessing(attempt.correct, &signal, prior, &self.config);
        let posterior = if guess_detected {
            prior + self.config.guess_evidence_weight.clamp(0.0, 1.0) * (evidence - prior)
        } else {
            evidence
        };
        let new_mastery = clamp_probability(apply_transition(posterior, p_learn));

        let mut next = state.clone();
        next.params = params;
        next.mastery_probability = new_mastery;
        next.total_attempts = next.total_attempts.saturating_add(1);
        if attempt.correct {
            next.streak_correct = next.streak_correct.saturating_add(1);
            next.streak_incorrect = 0;
        } else {
            next.streak_correct = 0;
            next.streak_incorrect = next.streak_incorrect.saturating_add(1);
        }
        next.last_practice = Some(match state.last_practice {
            Some(prev) if prev > attempt.timestamp => prev,
            _ => attempt.timestamp,
        });

        let previous_level = get_mastery_level(prior);
        let mastery_level = get_mastery_level(new_mastery);
        let intervention = self.recommend_intervention(prior, new_mastery, &next);
        if previous_level != mastery_level {
            tracing::debug!(
                learner_id = %next.learner_id,
                skill_id = %next.skill_id,
                from = previous_level.as_str(),
                to = mastery_level.as_str(),
                "mastery level changed"
            );
        }

        let rationale = build_rationale(
            prior,
            new_mastery,
            attempt.correct,
            guess_detected,
            &signal,
            next.is_safety_critical,
        );

        BktUpdate {
            state: next,
            insights: BktInsights {
                previous_mastery: prior,
                new_mastery,
                previous_level,
                mastery_level,
                level_changed: previous_level != mastery_level,
                p_learn,
                guess_detected,
                hesitation: signal,
                intervention,
                rationale,
            },
        }
    }

    fn recommend_intervention(
        &self,
        prior: f64,
        new_mastery: f64,
        state: &KnowledgeState,
    ) -> Option<Intervention> {
        let sharp_drop = prior - new_mastery > self.config.regression_threshold;
        let stuck = state.streak_incorrect >= self.config.failure_streak_threshold
            && new_mastery < MasteryLevel::DEVELOPING;
        if sharp_drop || stuck {
            Some(Intervention::ReviewPrerequisites)
        } else {
            None
        }
    }
}

impl Default for KnowledgeTracer {
    fn default() -> Self {
        Self::new(BktConfig::default(), HesitationMonitor::default())
    }
}

/// P(L | observation) given the prior and slip/guess rates.
pub fn bayes_posterior(prior: f64, correct: bool, params: &BktParams) -> f64 {
    let (known, unknown) = if correct {
        (prior * (1.0 - params.p_slip), (1.0 - prior) * params.p_guess)
    } else {
        (prior * params.p_slip, (1.0 - prior) * (1.0 - params.p_guess))
    };
    let denom = known + unknown;
    if denom < EPSILON {
        return prior;
    }
    known / denom
}

pub fn apply_transition(posterior: f64, p_learn: f64) -> f64 {
    posterior + (1.0 - posterior) * p_learn.clamp(0.0, 1.0)
}

/// Correct, very fast, and at low mastery: likely a lucky guess.
pub fn detect_guessing(
    correct: bool,
    signal: &HesitationSignal,
    prior_mastery: f64,
    config: &BktConfig,
) -> bool {
    correct && signal.possible_guess && prior_mastery < config.guess_mastery_ceiling
}

pub fn get_mastery_level(p: f64) -> MasteryLevel {
    MasteryLevel::from_probability(p)
}

/// P(next response correct) under the current state.
pub fn predict_correct(state: &KnowledgeState) -> f64 {
    let p = clamp_probability(state.mastery_probability);
    let params = state.params.sanitized();
    clamp_probability(p * (1.0 - params.p_slip) + (1.0 - p) * params.p_guess)
}

fn build_rationale(
    prior: f64,
    new_mastery: f64,
    correct: bool,
    guess_detected: bool,
    signal: &HesitationSignal,
    safety_critical: bool,
) -> String {
    let outcome = if correct { "correct" } else { "incorrect" };
    let mut text = format!(
        "A {outcome} answer moved estimated mastery from {:.0}% to {:.0}%.",
        prior * 100.0,
        new_mastery * 100.0
    );
    if guess_detected {
        text.push_str(" It was treated as a likely guess, so only part of it counted.");
    }
    text.push(' ');
    text.push_str(&explain_hesitation(signal));
    if safety_critical {
        text.push_str(" This skill is safety-critical and needs stronger evidence of mastery.");
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::learner::types::ContentType;

    fn state() -> KnowledgeState {
        KnowledgeTracer::default().initial_state("learner-1", &SkillDefinition::new("s1", "Fractions"))
    }

    fn mc() -> ResponseContext {
        ResponseContext {
            content_type: ContentType::MultipleChoice,
            ..Default::default()
        }
    }

    #[test]
    fn correct_answer_raises_mastery() {
        let tracer = KnowledgeTracer::default();
        let s = state();
        let update = tracer.update(&s, &AttemptRecord::new("s1", true, 4_000.0), &mc());
        assert!(update.state.mastery_probability > s.mastery_probability);
        assert_eq!(update.state.total_attempts, 1);
        assert_eq!(update.state.streak_correct, 1);
        assert!(update.state.last_practice.is_some());
    }

    #[test]
    fn incorrect_answer_resets_streak() {
        let tracer = KnowledgeTracer::default();
        let mut s = state();
        s.streak_correct = 4;
        s.mastery_probability = 0.8;
        let update = tracer.update(&s, &AttemptRecord::new("s1", false, 4_000.0), &mc());
        assert_eq!(update.state.streak_correct, 0);
        assert_eq!(update.state.streak_incorrect, 1);
        assert!(update.state.mastery_probability < 0.8);
    }

    #[test]
    fn posterior_matches_hand_computation() {
        let params = BktParams::default();
        let p = bayes_posterior(0.3, true, &params);
        let expected = 0.3 * 0.9 / (0.3 * 0.9 + 0.7 * 0.2);
        assert!((p - expected).abs() < 1e-12);
    }

    #[test]
    fn suspected_guess_halves_learning_rate_and_discounts_evidence() {
        let tracer = KnowledgeTracer::default();
        let s = state();
        let guess = tracer.update(&s, &AttemptRecord::new("s1", true, 200.0), &mc());
        assert!(guess.insights.hesitation.possible_guess);
        assert!(guess.insights.guess_detected);
        assert!((guess.insights.p_learn - 0.5 * s.params.p_transit).abs() < 1e-12);

        let considered = tracer.update(&s, &AttemptRecord::new("s1", true, 4_000.0), &mc());
        assert!(guess.state.mastery_probability < considered.state.mastery_probability);
    }

    #[test]
    fn fast_answer_at_high_mastery_is_not_a_guess() {
        let tracer = KnowledgeTracer::default();
        let mut s = state();
        s.mastery_probability = 0.9;
        let update = tracer.update(&s, &AttemptRecord::new("s1", true, 200.0), &mc());
        assert!(update.insights.hesitation.possible_guess);
        assert!(!update.insights.guess_detected);
    }

    #[test]
    fn mastery_never_reaches_absorbing_bounds() {
        let tracer = KnowledgeTracer::default();
        let mut s = state();
        for _ in 0..200 {
            s = tracer.update(&s, &AttemptRecord::new("s1", true, 3_000.0), &mc()).state;
        }
        assert!(s.mastery_probability < 1.0);
        for _ in 0..200 {
            s = tracer.update(&s, &AttemptRecord::new("s1", false, 3_000.0), &mc()).state;
        }
        assert!(s.mastery_probability > 0.0);
    }

    #[test]
    fn safety_critical_needs_more_evidence() {
        let tracer = KnowledgeTracer::default();
        let normal = tracer.initial_state("l", &SkillDefinition::new("a", "A"));
        let strict = tracer.initial_state("l", &SkillDefinition::new("b", "B").safety_critical());
        assert!(strict.params.p_guess < normal.params.p_guess);
        assert!(strict.params.p_slip < normal.params.p_slip);
        assert!(strict.mastery_probability < normal.mastery_probability);
    }

    #[test]
    fn sharp_regression_recommends_review() {
        let tracer = KnowledgeTracer::default();
        let mut s = state();
        s.mastery_probability = 0.9;
        let update = tracer.update(&s, &AttemptRecord::new("s1", false, 5_000.0), &mc());
        assert!(update.insights.previous_mastery - update.insights.new_mastery > 0.2);
        assert_eq!(update.insights.intervention, Some(Intervention::ReviewPrerequisites));
    }

    #[test]
    fn repeated_failures_at_low_mastery_recommend_review() {
        let tracer = KnowledgeTracer::default();
        let mut s = state();
        let mut last = None;
        for _ in 0..3 {
            let update = tracer.update(&s, &AttemptRecord::new("s1", false, 5_000.0), &mc());
            s = update.state;
            last = update.insights.intervention;
        }
        assert_eq!(last, Some(Intervention::ReviewPrerequisites));
    }

    #[test]
    fn predict_correct_between_guess_and_one_minus_slip() {
        let s = state();
        let p = predict_correct(&s);
        assert!(p > s.params.p_guess && p < 1.0 - s.params.p_slip);
    }
}
