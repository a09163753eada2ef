pub mod orchestrator;
pub mod probes;

pub use orchestrator::{
    blend_predictions, calculate_model_weights, explain_model_state, next_phase,
    BlendedPrediction, ModelWeights, Orchestrator, OrchestratorState, Phase, TemporalPredictor,
};
pub use probes::{
    calculate_entropy, calculate_information_gain, IntelligentProbeSelector, Probe, ProbeResult,
    ProbeSession, ProbeSummary,
};
