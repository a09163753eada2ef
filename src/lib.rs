pub mod config;
pub mod learner;
pub mod logging;
pub mod services;

pub use learner::LearnerEngineConfig;
pub use services::adaptive_learning::{AdaptiveLearningService, ProcessedAttempt, ServiceError};
