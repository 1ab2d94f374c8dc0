//! Configuration management for prompt streaming

use crate::outlet::{BroadcastChannel, PromptOutlet, StreamInfo};
use crate::scheduler::PromptScheduler;
use bsp_core::{
    generate_sequence, hand_custom_sequence, hand_groups, BspError, BspResult, GenerationMode,
    LabelSet, StimulusGroup, StimulusSequence, StimulusState, HAND_LABELS,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// Default seconds between prompts
pub const DEFAULT_INTERVAL_SECS: f64 = 5.0;

/// How the prompt sequence is generated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PromptMode {
    /// Every subset of stimulus groups
    Combinatorial,
    /// The literal `custom_sequence` list
    #[default]
    Custom,
}

/// Stream identity advertised to recorders
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamSettings {
    pub name: String,
    pub content_type: String,
    pub source_id: String,
    /// Samples buffered per lagging recorder
    pub buffer_size: usize,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            name: "finger_prompt".to_string(),
            content_type: "Markers".to_string(),
            source_id: "finger_prompt".to_string(),
            buffer_size: 64,
        }
    }
}

/// Complete prompt session configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PromptConfig {
    /// Seconds between prompts
    pub interval_secs: f64,
    pub mode: PromptMode,
    /// Ordered effector labels; position is the channel index
    pub labels: Vec<String>,
    /// Combinatorial universe, used in combinatorial mode
    pub groups: Vec<StimulusGroup>,
    /// Literal states, used in custom mode
    pub custom_sequence: Vec<StimulusState>,
    pub stream: StreamSettings,
}

impl PromptConfig {
    /// Five-finger session enumerating every group subset
    pub fn combinatorial_hand() -> Self {
        PromptConfig {
            mode: PromptMode::Combinatorial,
            ..Self::custom_hand()
        }
    }

    /// Five-finger session replaying the hand-authored sequence
    pub fn custom_hand() -> Self {
        PromptConfig {
            interval_secs: DEFAULT_INTERVAL_SECS,
            mode: PromptMode::Custom,
            labels: HAND_LABELS.iter().map(|s| s.to_string()).collect(),
            groups: hand_groups(),
            custom_sequence: hand_custom_sequence(),
            stream: StreamSettings::default(),
        }
    }

    pub fn for_mode(mode: PromptMode) -> Self {
        match mode {
            PromptMode::Combinatorial => Self::combinatorial_hand(),
            PromptMode::Custom => Self::custom_hand(),
        }
    }

    /// Validate the entire configuration, including the generated sequence
    pub fn validate(&self) -> BspResult<()> {
        self.interval()?;
        if self.stream.buffer_size == 0 {
            return Err(BspError::config("Buffer size must be greater than 0"));
        }
        if self.build_sequence()?.is_empty() {
            return Err(BspError::config(format!(
                "{} mode produced an empty sequence",
                self.generation_mode().name()
            )));
        }
        self.stream_info()?;
        Ok(())
    }

    pub fn interval(&self) -> BspResult<Duration> {
        if !(self.interval_secs.is_finite() && self.interval_secs > 0.0) {
            return Err(BspError::config(format!(
                "Interval must be positive, got {}s",
                self.interval_secs
            )));
        }
        Duration::try_from_secs_f64(self.interval_secs)
            .map_err(|e| BspError::config(format!("Invalid interval {}s: {}", self.interval_secs, e)))
    }

    pub fn label_set(&self) -> BspResult<LabelSet> {
        LabelSet::new(self.labels.iter().map(String::as_str))
    }

    pub fn generation_mode(&self) -> GenerationMode {
        match self.mode {
            PromptMode::Combinatorial => GenerationMode::Combinatorial {
                groups: self.groups.clone(),
            },
            PromptMode::Custom => GenerationMode::Custom {
                states: self.custom_sequence.clone(),
            },
        }
    }

    pub fn build_sequence(&self) -> BspResult<StimulusSequence> {
        generate_sequence(&self.label_set()?, &self.generation_mode())
    }

    pub fn stream_info(&self) -> BspResult<StreamInfo> {
        StreamInfo::new(
            self.stream.name.clone(),
            self.stream.content_type.clone(),
            &self.label_set()?,
            self.interval()?,
            self.stream.source_id.clone(),
        )
    }

    pub fn build_outlet(&self) -> BspResult<PromptOutlet> {
        PromptOutlet::new(self.stream_info()?, self.stream.buffer_size)
    }

    /// Generate the sequence and wire an idle scheduler to `channel`
    pub fn build_scheduler(&self, channel: Arc<dyn BroadcastChannel>) -> BspResult<PromptScheduler> {
        PromptScheduler::new(self.build_sequence()?, self.interval()?, channel)
    }

    /// Export configuration to JSON
    pub fn to_json(&self) -> BspResult<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| BspError::config(format!("Failed to serialize configuration: {}", e)))
    }

    /// Import configuration from JSON; absent fields keep their defaults
    pub fn from_json(json: &str) -> BspResult<Self> {
        serde_json::from_str(json)
            .map_err(|e| BspError::config(format!("Failed to deserialize configuration: {}", e)))
    }

    pub fn load(path: impl AsRef<Path>) -> BspResult<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|e| {
            BspError::config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        Self::from_json(&json)
    }
}

impl Default for PromptConfig {
    fn default() -> Self {
        Self::custom_hand()
    }
}
