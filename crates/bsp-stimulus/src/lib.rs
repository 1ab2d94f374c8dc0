//! BSP-Stimulus: timed prompt broadcasting
//!
//! Turns a generated stimulus sequence into a stream of timestamped prompts
//! that recorders can align with their biosignal data.

pub mod config;
pub mod outlet;
pub mod scheduler;

pub use config::{PromptConfig, PromptMode, StreamSettings};
pub use outlet::{BroadcastChannel, PromptOutlet, PromptSample, StreamInfo};
pub use scheduler::{PromptScheduler, SchedulerHandle, SchedulerState, SchedulerStats};
