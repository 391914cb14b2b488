pub mod ai;
pub mod booking;
pub mod calendar;
pub mod context;
pub mod escalation;
pub mod intent;
pub mod messaging;
pub mod orchestrator;
pub mod prompt;
pub mod qualification;
