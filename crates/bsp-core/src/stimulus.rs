//! Stimulus types: labels, groups, activation states and sequences

use crate::error::{BspError, BspResult};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Default effectors cued by the finger prompt experiment, in channel order
pub const HAND_LABELS: [&str; 5] = ["thumb", "index", "middle", "ring", "pinky"];

/// A named effector that can be cued individually
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StimulusLabel(String);

impl StimulusLabel {
    pub fn new(name: impl Into<String>) -> Self {
        StimulusLabel(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StimulusLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for StimulusLabel {
    fn from(name: &str) -> Self {
        StimulusLabel::new(name)
    }
}

impl From<String> for StimulusLabel {
    fn from(name: String) -> Self {
        StimulusLabel(name)
    }
}

/// Ordered, duplicate-free set of stimulus labels.
///
/// A label's position is its channel index on the broadcast stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelSet {
    labels: Vec<StimulusLabel>,
    index: HashMap<StimulusLabel, usize>,
}

impl LabelSet {
    /// Build a label set, rejecting empty, blank or repeated labels
    pub fn new<I, L>(labels: I) -> BspResult<Self>
    where
        I: IntoIterator<Item = L>,
        L: Into<StimulusLabel>,
    {
        let labels: Vec<StimulusLabel> = labels.into_iter().map(Into::into).collect();
        if labels.is_empty() {
            return Err(BspError::config("label set must contain at least one label"));
        }

        let mut index = HashMap::with_capacity(labels.len());
        for (position, label) in labels.iter().enumerate() {
            if label.as_str().trim().is_empty() {
                return Err(BspError::config(format!(
                    "label at position {} is blank",
                    position
                )));
            }
            if index.insert(label.clone(), position).is_some() {
                return Err(BspError::config(format!(
                    "label '{}' is declared more than once",
                    label
                )));
            }
        }

        Ok(LabelSet { labels, index })
    }

    /// The five-digit hand used by the finger prompt experiment
    pub fn hand() -> Self {
        let labels: Vec<StimulusLabel> = HAND_LABELS.iter().map(|&name| name.into()).collect();
        let index = labels
            .iter()
            .enumerate()
            .map(|(position, label)| (label.clone(), position))
            .collect();
        LabelSet { labels, index }
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Channel index of a label, if declared
    pub fn index_of(&self, label: &StimulusLabel) -> Option<usize> {
        self.index.get(label).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = &StimulusLabel> {
        self.labels.iter()
    }

    pub fn names(&self) -> Vec<String> {
        self.labels.iter().map(|l| l.as_str().to_string()).collect()
    }
}

/// One label, or a set of labels that are always cued together
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StimulusGroup {
    Single(StimulusLabel),
    Coupled(Vec<StimulusLabel>),
}

impl StimulusGroup {
    pub fn single(label: impl Into<StimulusLabel>) -> Self {
        StimulusGroup::Single(label.into())
    }

    pub fn coupled<I, L>(labels: I) -> Self
    where
        I: IntoIterator<Item = L>,
        L: Into<StimulusLabel>,
    {
        StimulusGroup::Coupled(labels.into_iter().map(Into::into).collect())
    }

    /// Labels activated when this group is selected
    pub fn labels(&self) -> &[StimulusLabel] {
        match self {
            StimulusGroup::Single(label) => std::slice::from_ref(label),
            StimulusGroup::Coupled(labels) => labels,
        }
    }

    /// Resolve this group's labels to channel indices
    pub fn channel_indices(&self, label_set: &LabelSet) -> BspResult<Vec<usize>> {
        if self.labels().is_empty() {
            return Err(BspError::config("coupled group must name at least one label"));
        }

        self.labels()
            .iter()
            .map(|label| {
                label_set.index_of(label).ok_or_else(|| {
                    BspError::config(format!(
                        "group references undeclared label '{}'",
                        label
                    ))
                })
            })
            .collect()
    }
}

/// The default grouping: thumb, index and middle alone, ring and pinky coupled
pub fn hand_groups() -> Vec<StimulusGroup> {
    vec![
        StimulusGroup::single("thumb"),
        StimulusGroup::single("index"),
        StimulusGroup::single("middle"),
        StimulusGroup::coupled(["ring", "pinky"]),
    ]
}

/// Boolean activation vector over all labels, in label order
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StimulusState(Vec<bool>);

impl StimulusState {
    pub fn new(active: Vec<bool>) -> Self {
        StimulusState(active)
    }

    /// All-false state over `channel_count` labels
    pub fn rest(channel_count: usize) -> Self {
        StimulusState(vec![false; channel_count])
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn is_active(&self, channel: usize) -> bool {
        self.0.get(channel).copied().unwrap_or(false)
    }

    pub fn set(&mut self, channel: usize, active: bool) {
        if let Some(slot) = self.0.get_mut(channel) {
            *slot = active;
        }
    }

    pub fn active_count(&self) -> usize {
        self.0.iter().filter(|&&a| a).count()
    }

    pub fn is_rest(&self) -> bool {
        self.active_count() == 0
    }

    pub fn as_slice(&self) -> &[bool] {
        &self.0
    }

    /// Encode as broadcast channel values: 1 for active, 0 otherwise
    pub fn to_channel_values(&self) -> Vec<i8> {
        self.0.iter().map(|&a| i8::from(a)).collect()
    }
}

impl From<Vec<bool>> for StimulusState {
    fn from(active: Vec<bool>) -> Self {
        StimulusState(active)
    }
}

impl fmt::Display for StimulusState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.to_channel_values())
    }
}

/// Ordered, immutable list of states defining one experimental run.
///
/// Cloning is cheap and shares the underlying states.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StimulusSequence {
    states: Arc<[StimulusState]>,
}

impl StimulusSequence {
    pub fn new(states: Vec<StimulusState>) -> Self {
        StimulusSequence {
            states: states.into(),
        }
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&StimulusState> {
        self.states.get(index)
    }

    pub fn states(&self) -> &[StimulusState] {
        &self.states
    }

    pub fn iter(&self) -> impl Iterator<Item = &StimulusState> {
        self.states.iter()
    }
}

impl Serialize for StimulusSequence {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(self.states.iter())
    }
}

impl<'de> Deserialize<'de> for StimulusSequence {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Vec::<StimulusState>::deserialize(deserializer).map(StimulusSequence::new)
    }
}
