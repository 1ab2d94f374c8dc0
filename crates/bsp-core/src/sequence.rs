//! Deterministic stimulus sequence generation
//!
//! Two modes are supported: an exhaustive enumeration over stimulus groups,
//! and a literal hand-authored list of states. Both are pure functions of
//! their configuration.

use crate::error::{BspError, BspResult};
use crate::stimulus::{LabelSet, StimulusGroup, StimulusSequence, StimulusState};
use serde::{Deserialize, Serialize};

/// Upper bound on groups for combinatorial mode (2^20 states)
pub const MAX_COMBINATORIAL_GROUPS: usize = 20;

/// How the stimulus sequence is produced
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum GenerationMode {
    /// Every subset of groups, by subset size then lexicographic group indices
    Combinatorial { groups: Vec<StimulusGroup> },
    /// A literal list of states, replayed in order
    Custom { states: Vec<StimulusState> },
}

impl GenerationMode {
    pub fn name(&self) -> &'static str {
        match self {
            GenerationMode::Combinatorial { .. } => "combinatorial",
            GenerationMode::Custom { .. } => "custom",
        }
    }
}

/// Generate the stimulus sequence for `labels` under `mode`.
///
/// Custom mode may yield an empty sequence; the scheduler rejects it.
pub fn generate_sequence(labels: &LabelSet, mode: &GenerationMode) -> BspResult<StimulusSequence> {
    let states = match mode {
        GenerationMode::Combinatorial { groups } => combinatorial_states(labels, groups)?,
        GenerationMode::Custom { states } => custom_states(labels, states)?,
    };
    Ok(StimulusSequence::new(states))
}

/// Enumerate all 2^G group subsets as states.
///
/// Subsets are ordered by size ascending (rest state first, all groups last),
/// and within one size by the lexicographic order of their group indices.
pub fn combinatorial_states(
    labels: &LabelSet,
    groups: &[StimulusGroup],
) -> BspResult<Vec<StimulusState>> {
    if groups.len() > MAX_COMBINATORIAL_GROUPS {
        return Err(BspError::config(format!(
            "{} groups exceed the combinatorial limit of {}",
            groups.len(),
            MAX_COMBINATORIAL_GROUPS
        )));
    }

    let channels = groups
        .iter()
        .map(|group| group.channel_indices(labels))
        .collect::<BspResult<Vec<_>>>()?;

    let group_count = channels.len();
    let mut states = Vec::with_capacity(1 << group_count);

    for subset_size in 0..=group_count {
        for combo in Combinations::new(group_count, subset_size) {
            let mut state = StimulusState::rest(labels.len());
            for group_index in combo {
                for &channel in &channels[group_index] {
                    state.set(channel, true);
                }
            }
            states.push(state);
        }
    }

    Ok(states)
}

/// Return the literal states after checking each against the label count
pub fn custom_states(labels: &LabelSet, states: &[StimulusState]) -> BspResult<Vec<StimulusState>> {
    for (position, state) in states.iter().enumerate() {
        if state.len() != labels.len() {
            return Err(BspError::config(format!(
                "custom state {} has {} values, expected {}",
                position,
                state.len(),
                labels.len()
            )));
        }
    }
    Ok(states.to_vec())
}

/// The hand-authored experimental sequence over [`crate::HAND_LABELS`]:
/// rest, each finger alone, selected pairs, then all fingers.
pub fn hand_custom_sequence() -> Vec<StimulusState> {
    const T: bool = true;
    const F: bool = false;
    [
        [F, F, F, F, F],
        [T, F, F, F, F],
        [F, T, F, F, F],
        [F, F, T, F, F],
        [F, F, F, T, F],
        [F, F, F, F, T],
        [T, T, F, F, F],
        [F, T, T, F, F],
        [F, F, T, T, F],
        [F, F, F, T, T],
        [T, F, F, F, T],
        [T, F, T, F, F],
        [F, T, F, F, T],
        [T, T, T, T, T],
    ]
    .iter()
    .map(|row| StimulusState::new(row.to_vec()))
    .collect()
}

/// k-combinations of `0..n` in lexicographic order
#[derive(Debug, Clone)]
pub struct Combinations {
    n: usize,
    indices: Vec<usize>,
    done: bool,
}

impl Combinations {
    pub fn new(n: usize, k: usize) -> Self {
        Combinations {
            n,
            indices: (0..k).collect(),
            done: k > n,
        }
    }
}

impl Iterator for Combinations {
    type Item = Vec<usize>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let current = self.indices.clone();

        // Advance the rightmost index that still has room to move
        let k = self.indices.len();
        match (0..k).rev().find(|&i| self.indices[i] < self.n - k + i) {
            Some(i) => {
                self.indices[i] += 1;
                for j in i + 1..k {
                    self.indices[j] = self.indices[j - 1] + 1;
                }
            }
            None => self.done = true,
        }

        Some(current)
    }
}
