//! ReAct Controller (C8) — the Think→Act→Observe→Reflect loop that
//! integrates the Hybrid Selector, Parameter Synthesizer, Retry Executor,
//! Quality Validator, and Context Builder (spec.md §4.8).

pub mod controller;
pub mod events;
pub mod prompts;
pub mod state;

pub use controller::ReactController;
pub use events::{StepEvent, StepSender};
pub use state::{ActionRecord, AgentRunState, ObservationRecord, ReflectionRecord, RunStatus};
