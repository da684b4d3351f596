//! Channel selector parsing.
//!
//! Operators pick recorder channels with a compact selector such as `"1-3,5"`. The
//! selector is parsed once when a station starts and stays fixed for the session.

use crate::error::{AppResult, DaqError};
use std::collections::BTreeSet;
use std::fmt;

/// Highest channel number a selector may name.
pub const MAX_CHANNEL: u32 = 999;

/// Ordered set of distinct, 1-based recorder channel numbers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelSet(Vec<u32>);

impl ChannelSet {
    /// Parse a comma-separated list of channels and inclusive `start-end` ranges.
    ///
    /// # Errors
    /// `DaqError::Config` for empty input, non-numeric tokens, channel 0, a channel
    /// above [`MAX_CHANNEL`] or a reversed range.
    pub fn parse(selector: &str) -> AppResult<Self> {
        if selector.trim().is_empty() {
            return Err(DaqError::Config("Channel selector is empty".to_string()));
        }

        let mut channels = BTreeSet::new();
        for token in selector.split(',').map(str::trim) {
            match token.split_once('-') {
                Some((start, end)) => {
                    let start = parse_channel(start, token)?;
                    let end = parse_channel(end, token)?;
                    if start > end {
                        return Err(DaqError::Config(format!(
                            "Invalid channel range '{}': start exceeds end",
                            token
                        )));
                    }
                    channels.extend(start..=end);
                }
                None => {
                    channels.insert(parse_channel(token, token)?);
                }
            }
        }

        Ok(Self(channels.into_iter().collect()))
    }

    /// Channel numbers in ascending order.
    pub fn as_slice(&self) -> &[u32] {
        &self.0
    }

    /// Number of channels.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Always false for a parsed set.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Channel numbers in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = u32> + '_ {
        self.0.iter().copied()
    }

    /// Highest configured channel number.
    pub fn max_channel(&self) -> Option<u32> {
        self.0.last().copied()
    }

    /// How many configured channels a bank of `bank_len` values can provide.
    pub fn count_within(&self, bank_len: usize) -> usize {
        self.0.iter().filter(|&&ch| ch as usize <= bank_len).count()
    }

    /// Pick the configured channels out of a full device bank.
    ///
    /// Channels beyond the bank are skipped, so the result can be shorter than the set.
    pub fn select<T: Copy>(&self, bank: &[T]) -> Vec<T> {
        self.0
            .iter()
            .filter_map(|&ch| bank.get(ch as usize - 1).copied())
            .collect()
    }
}

impl fmt::Display for ChannelSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let joined = self
            .0
            .iter()
            .map(|ch| ch.to_string())
            .collect::<Vec<_>>()
            .join(",");
        write!(f, "{}", joined)
    }
}

fn parse_channel(text: &str, token: &str) -> AppResult<u32> {
    let value: u32 = text.trim().parse().map_err(|_| {
        DaqError::Config(format!(
            "Invalid channel '{}', use forms like '1-3' or '1,2,3'",
            token
        ))
    })?;
    if value == 0 {
        return Err(DaqError::Config(format!(
            "Channel numbers start at 1, got '{}'",
            token
        )));
    }
    if value > MAX_CHANNEL {
        return Err(DaqError::Config(format!(
            "Channel numbers end at {}, got '{}'",
            MAX_CHANNEL, token
        )));
    }
    Ok(value)
}
