//! Broadcast channel capability and the in-process prompt outlet
//!
//! The scheduler only ever calls [`BroadcastChannel::publish`]. Discovery,
//! reconnection and clock alignment belong to whichever transport sits
//! behind the trait.

use bsp_core::{BspError, BspResult, LabelSet};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::trace;

/// Channel format tag advertised for prompt streams
pub const PROMPT_CHANNEL_FORMAT: &str = "int8";

/// Metadata describing a prompt stream to recorders
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamInfo {
    /// Stream name recorders resolve by
    pub name: String,
    /// Content type tag (e.g. "Markers")
    pub content_type: String,
    /// One channel per stimulus label
    pub channel_count: usize,
    /// Nominal sample rate in Hz, 1 / interval
    pub nominal_srate: f64,
    /// Value format of every channel
    pub channel_format: String,
    /// Stable source identifier
    pub source_id: String,
    /// Per-channel labels in channel order
    pub channel_labels: Vec<String>,
}

impl StreamInfo {
    /// Describe a stream carrying one channel per label, published every `interval`
    pub fn new(
        name: impl Into<String>,
        content_type: impl Into<String>,
        labels: &LabelSet,
        interval: Duration,
        source_id: impl Into<String>,
    ) -> BspResult<Self> {
        if interval.is_zero() {
            return Err(BspError::config("stream interval must be positive"));
        }

        let info = StreamInfo {
            name: name.into(),
            content_type: content_type.into(),
            channel_count: labels.len(),
            nominal_srate: 1.0 / interval.as_secs_f64(),
            channel_format: PROMPT_CHANNEL_FORMAT.to_string(),
            source_id: source_id.into(),
            channel_labels: labels.names(),
        };
        info.validate()?;
        Ok(info)
    }

    pub fn validate(&self) -> BspResult<()> {
        if self.name.trim().is_empty() {
            return Err(BspError::config("stream name must not be empty"));
        }
        if self.channel_count == 0 {
            return Err(BspError::config("stream must carry at least one channel"));
        }
        if self.channel_labels.len() != self.channel_count {
            return Err(BspError::config(format!(
                "stream declares {} channels but {} channel labels",
                self.channel_count,
                self.channel_labels.len()
            )));
        }
        if !(self.nominal_srate.is_finite() && self.nominal_srate > 0.0) {
            return Err(BspError::config(format!(
                "nominal sample rate {} is not positive",
                self.nominal_srate
            )));
        }
        Ok(())
    }
}

/// Publish endpoint the prompt scheduler writes to once per tick
pub trait BroadcastChannel: Send + Sync {
    /// Stream metadata advertised to recorders
    fn info(&self) -> &StreamInfo;

    /// Push one sample of `channel_count` values
    fn publish(&self, values: &[i8]) -> BspResult<()>;
}

/// One timestamped prompt as seen by recorders
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptSample {
    pub stream: String,
    /// Monotonic per-outlet sample counter, starting at 0
    pub sample_index: u64,
    pub values: Vec<i8>,
    pub timestamp: DateTime<Utc>,
}

/// In-process fan-out outlet backed by a tokio broadcast channel.
///
/// Recorders attach with [`PromptOutlet::subscribe`] at any time; samples
/// published while nobody listens are dropped without error.
pub struct PromptOutlet {
    info: StreamInfo,
    sender: broadcast::Sender<PromptSample>,
    samples_published: AtomicU64,
}

impl PromptOutlet {
    /// Create an outlet keeping up to `buffer_size` samples per lagging subscriber
    pub fn new(info: StreamInfo, buffer_size: usize) -> BspResult<Self> {
        info.validate()?;
        if buffer_size == 0 {
            return Err(BspError::config("outlet buffer size must be greater than 0"));
        }
        let (sender, _) = broadcast::channel(buffer_size);

        Ok(PromptOutlet {
            info,
            sender,
            samples_published: AtomicU64::new(0),
        })
    }

    /// Attach a recorder
    pub fn subscribe(&self) -> broadcast::Receiver<PromptSample> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    pub fn samples_published(&self) -> u64 {
        self.samples_published.load(Ordering::Relaxed)
    }
}

impl BroadcastChannel for PromptOutlet {
    fn info(&self) -> &StreamInfo {
        &self.info
    }

    fn publish(&self, values: &[i8]) -> BspResult<()> {
        if values.len() != self.info.channel_count {
            return Err(BspError::channel(format!(
                "stream '{}' expects {} values per sample, got {}",
                self.info.name,
                self.info.channel_count,
                values.len()
            )));
        }

        let sample = PromptSample {
            stream: self.info.name.clone(),
            sample_index: self.samples_published.fetch_add(1, Ordering::Relaxed),
            values: values.to_vec(),
            timestamp: Utc::now(),
        };

        // No receivers is fine: recorders may attach mid-run
        match self.sender.send(sample) {
            Ok(receivers) => trace!(receivers, "Prompt sample fanned out"),
            Err(_) => trace!("Prompt sample dropped, no recorders attached"),
        }
        Ok(())
    }
}
