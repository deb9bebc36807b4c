//! Numeric identifier ranges and the aligned blocks they are partitioned into.
//!
//! A [`Range`] covers the inclusive interval `[base, max]` and is carved into
//! equal, aligned [`Block`]s of `block_size` identifiers. Namespaces are
//! handed one block each; the block's canonical `start/size` string is what
//! ends up in namespace annotations.

use std::fmt;
use std::str::FromStr;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors from parsing or constructing ranges and blocks.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RangeError {
    /// The input does not follow the expected textual form.
    #[error("malformed {what} {input:?}: {reason}")]
    Format {
        /// Kind of value being parsed (`"block"` or `"range"`).
        what: &'static str,
        /// The offending fragment.
        input: String,
        /// Why the fragment was rejected.
        reason: String,
    },

    /// A number does not fit in a 32-bit identifier.
    #[error("{input:?} does not fit in a 32-bit identifier")]
    Overflow {
        /// The offending fragment.
        input: String,
    },

    /// The lower bound is above the upper bound.
    #[error("start {start} must be less than or equal to end {end}")]
    Order {
        /// Lower bound.
        start: u32,
        /// Upper bound.
        end: u32,
    },

    /// The values parse but do not describe a usable range.
    #[error("invalid range configuration: {0}")]
    Config(String),
}

/// Parse one numeric fragment as a `u32`, classifying failures.
fn parse_id(what: &'static str, fragment: &str) -> Result<u32, RangeError> {
    let trimmed = fragment.trim();
    let wide: i64 = trimmed.parse().map_err(|_| RangeError::Format {
        what,
        input: fragment.to_owned(),
        reason: "expected an integer".to_owned(),
    })?;
    if wide < 0 {
        return Err(RangeError::Config(format!(
            "negative bound {wide} in {what}"
        )));
    }
    u32::try_from(wide).map_err(|_| RangeError::Overflow {
        input: trimmed.to_owned(),
    })
}

/// Split `"a-b"` on the separating dash, tolerating a leading minus sign so
/// that negative bounds reach [`parse_id`] and are reported as such.
fn split_dash(input: &str) -> Option<(&str, &str)> {
    let skip = usize::from(input.starts_with('-'));
    let rest = input.get(skip..)?;
    let idx = rest.find('-')?;
    let split = idx.checked_add(skip)?;
    Some((input.get(..split)?, input.get(split.checked_add(1)?..)?))
}

// ---------------------------------------------------------------------------
// Block
// ---------------------------------------------------------------------------

/// An inclusive interval of identifiers `[start, end]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Block {
    /// First identifier in the block.
    pub start: u32,
    /// Last identifier in the block (inclusive).
    pub end: u32,
}

impl Block {
    /// Create a block, rejecting `start > end`.
    ///
    /// # Errors
    ///
    /// Returns [`RangeError::Order`] when the bounds are reversed.
    pub fn new(start: u32, end: u32) -> Result<Self, RangeError> {
        if start > end {
            return Err(RangeError::Order { start, end });
        }
        Ok(Self { start, end })
    }

    /// Number of identifiers in the block.
    pub fn size(&self) -> u64 {
        u64::from(self.end)
            .saturating_sub(u64::from(self.start))
            .saturating_add(1)
    }

    /// The `start-end` form of the block.
    pub fn range_string(&self) -> String {
        format!("{}-{}", self.start, self.end)
    }

    /// Parse a block from `start/size` or `start-end`.
    ///
    /// # Errors
    ///
    /// Returns a [`RangeError`] describing the first problem found.
    pub fn parse(input: &str) -> Result<Self, RangeError> {
        let input = input.trim();
        if let Some((start, size)) = input.split_once('/') {
            let start = parse_id("block", start)?;
            let size = parse_id("block", size)?;
            if size == 0 {
                return Err(RangeError::Config(format!(
                    "block {input:?} has zero size"
                )));
            }
            let end = start
                .checked_add(size.saturating_sub(1))
                .ok_or_else(|| RangeError::Overflow {
                    input: input.to_owned(),
                })?;
            return Ok(Self { start, end });
        }
        if let Some((start, end)) = split_dash(input) {
            let start = parse_id("block", start)?;
            let end = parse_id("block", end)?;
            return Self::new(start, end);
        }
        Err(RangeError::Format {
            what: "block",
            input: input.to_owned(),
            reason: "expected start/size or start-end".to_owned(),
        })
    }
}

impl fmt::Display for Block {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.start, self.size())
    }
}

impl FromStr for Block {
    type Err = RangeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

// ---------------------------------------------------------------------------
// Range
// ---------------------------------------------------------------------------

/// The inclusive interval `[base, max]` partitioned into aligned blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Range {
    base: u32,
    max: u32,
    block_size: u32,
}

impl Range {
    /// Create a range of blocks of `block_size` identifiers between `base`
    /// and `max` inclusive.
    ///
    /// # Errors
    ///
    /// Returns [`RangeError::Order`] if `base > max`, and
    /// [`RangeError::Config`] if the block size is zero or larger than the
    /// interval.
    pub fn new(base: u32, max: u32, block_size: u32) -> Result<Self, RangeError> {
        if base > max {
            return Err(RangeError::Order {
                start: base,
                end: max,
            });
        }
        if block_size == 0 {
            return Err(RangeError::Config("block size must be positive".to_owned()));
        }
        let span = u64::from(max)
            .saturating_sub(u64::from(base))
            .saturating_add(1);
        if u64::from(block_size) > span {
            return Err(RangeError::Config(format!(
                "block size {block_size} is larger than the range {base}-{max}"
            )));
        }
        Ok(Self {
            base,
            max,
            block_size,
        })
    }

    /// Parse a range from `base-max/blockSize`.
    ///
    /// # Errors
    ///
    /// Returns a [`RangeError`] describing the first problem found.
    pub fn parse(input: &str) -> Result<Self, RangeError> {
        let input = input.trim();
        let (bounds, size) = input.split_once('/').ok_or_else(|| RangeError::Format {
            what: "range",
            input: input.to_owned(),
            reason: "expected base-max/blockSize".to_owned(),
        })?;
        let (base, max) = split_dash(bounds).ok_or_else(|| RangeError::Format {
            what: "range",
            input: bounds.to_owned(),
            reason: "expected base-max".to_owned(),
        })?;
        let base = parse_id("range", base)?;
        let max = parse_id("range", max)?;
        let block_size = parse_id("range", size)?;
        Self::new(base, max, block_size)
    }

    /// First identifier of the range.
    pub fn base(&self) -> u32 {
        self.base
    }

    /// Last identifier of the range (inclusive).
    pub fn max(&self) -> u32 {
        self.max
    }

    /// Identifiers per block.
    pub fn block_size(&self) -> u32 {
        self.block_size
    }

    /// Number of whole blocks in the range. A full-width range with one-id
    /// blocks holds `2^32` of them.
    pub fn size(&self) -> u64 {
        let span = u64::from(self.max)
            .saturating_sub(u64::from(self.base))
            .saturating_add(1);
        span.checked_div(u64::from(self.block_size))
            .unwrap_or_default()
    }

    /// The block at `index`, or `None` past the last whole block.
    pub fn block_at(&self, index: u64) -> Option<Block> {
        if index >= self.size() {
            return None;
        }
        let start = index
            .checked_mul(u64::from(self.block_size))
            .and_then(|off| off.checked_add(u64::from(self.base)))
            .and_then(|start| u32::try_from(start).ok())?;
        let end = start.checked_add(self.block_size.checked_sub(1)?)?;
        Some(Block { start, end })
    }

    /// Index of `block` within the range.
    ///
    /// Only blocks that start on a block boundary and are exactly one block
    /// long are considered part of the range.
    pub fn offset(&self, block: &Block) -> Option<u64> {
        if block.start < self.base || block.end > self.max {
            return None;
        }
        if block.size() != u64::from(self.block_size) {
            return None;
        }
        let delta = block.start.checked_sub(self.base)?;
        if delta.checked_rem(self.block_size)? != 0 {
            return None;
        }
        let index = u64::from(delta.checked_div(self.block_size)?);
        (index < self.size()).then_some(index)
    }

    /// Whether `block` is one of the range's aligned blocks.
    pub fn contains(&self, block: &Block) -> bool {
        self.offset(block).is_some()
    }
}

impl fmt::Display for Range {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}/{}", self.base, self.max, self.block_size)
    }
}

impl FromStr for Range {
    type Err = RangeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}
