//! BSP-Core: Foundation types for stimulus prompting
//!
//! Stimulus labels, groups and activation states, plus the deterministic
//! sequence generator that the prompt scheduler replays.

pub mod stimulus;
pub mod sequence;
pub mod error;

pub use stimulus::*;
pub use sequence::*;
pub use error::{BspError, BspResult};
