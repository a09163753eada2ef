pub mod adaptive_learning;
pub mod xapi;
