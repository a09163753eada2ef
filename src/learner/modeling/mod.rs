//! Per-attempt learner modeling: knowledge tracing, response latency and
//! session-level cognitive load.

pub mod bkt;
pub mod cognitive_load;
pub mod hesitation;

pub use bkt::{detect_guessing, get_mastery_level, BktInsights, BktUpdate, KnowledgeTracer};
pub use cognitive_load::{
    CognitiveLoadAssessment, CognitiveLoadDetector, LoadFeatures, LoadLevel, TelemetryEvent,
    TelemetryWindow,
};
pub use hesitation::{explain_hesitation, ConfidenceLevel, HesitationMonitor, HesitationSignal};
