//! Multi-category security labels and their combinatorial numbering.
//!
//! A [`CategoryRange`] describes every way of picking `k` distinct categories
//! out of `n`. Each such pick is a [`Label`], rendered with its categories in
//! descending order (`s0:c3,c1,c0`). Labels are numbered with the
//! combinatorial number system so that offsets and labels map one-to-one.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use num_bigint::BigUint;
use num_traits::{One, Zero};

/// Category count used when a range string omits `n`.
pub const DEFAULT_CATEGORIES: u32 = 1024;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors from parsing or constructing labels and category ranges.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum McsError {
    /// The input does not follow the expected textual form.
    #[error("malformed {what} {input:?}: {reason}")]
    Format {
        /// Kind of value being parsed (`"label"` or `"category range"`).
        what: &'static str,
        /// The offending fragment.
        input: String,
        /// Why the fragment was rejected.
        reason: String,
    },

    /// The values parse but do not describe a usable category range.
    #[error("invalid category range: {0}")]
    Config(String),
}

fn label_format(input: &str, reason: impl Into<String>) -> McsError {
    McsError::Format {
        what: "label",
        input: input.to_owned(),
        reason: reason.into(),
    }
}

// ---------------------------------------------------------------------------
// Label
// ---------------------------------------------------------------------------

/// A prefix plus a set of distinct category indices.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Label {
    prefix: String,
    /// Sorted descending, no duplicates.
    categories: Vec<u32>,
}

impl Label {
    /// Build a label from a prefix and categories in any order.
    ///
    /// # Errors
    ///
    /// Returns [`McsError::Format`] if a category appears twice.
    pub fn new(
        prefix: impl Into<String>,
        categories: impl IntoIterator<Item = u32>,
    ) -> Result<Self, McsError> {
        let prefix = prefix.into();
        let mut seen = BTreeSet::new();
        for category in categories {
            if !seen.insert(category) {
                return Err(label_format(
                    &prefix,
                    format!("category c{category} is listed more than once"),
                ));
            }
        }
        Ok(Self {
            prefix,
            categories: seen.into_iter().rev().collect(),
        })
    }

    /// Parse `prefix:cA,cB,...`. The prefix is everything up to and including
    /// the last `:`.
    ///
    /// # Errors
    ///
    /// Returns [`McsError::Format`] for empty input, categories without a
    /// leading `c`, non-numeric categories, or duplicates.
    pub fn parse(input: &str) -> Result<Self, McsError> {
        let input = input.trim();
        if input.is_empty() {
            return Err(label_format(input, "empty label"));
        }
        let (prefix, segment) = match input.rfind(':') {
            Some(idx) => {
                let split = idx.saturating_add(1);
                (
                    input.get(..split).unwrap_or_default(),
                    input.get(split..).unwrap_or_default(),
                )
            }
            None => ("", input),
        };

        let mut categories = Vec::new();
        if !segment.is_empty() {
            for part in segment.split(',') {
                let part = part.trim();
                let number = part
                    .strip_prefix('c')
                    .ok_or_else(|| label_format(input, format!("category {part:?} must start with 'c'")))?;
                let category: u32 = number
                    .parse()
                    .map_err(|_| label_format(input, format!("category {part:?} is not a number")))?;
                categories.push(category);
            }
        }

        Self::new(prefix, categories).map_err(|_| label_format(input, "duplicate category"))
    }

    /// Label prefix, including its trailing `:` when present.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Categories in descending order.
    pub fn categories(&self) -> &[u32] {
        &self.categories
    }

    /// Rank of the category set in the combinatorial number system.
    #[allow(clippy::arithmetic_side_effects)] // BigUint grows instead of overflowing
    pub fn offset(&self) -> BigUint {
        let mut sum = BigUint::zero();
        let mut cursor = Binomial::new(0, 1);
        for (idx, &category) in self.categories.iter().rev().enumerate() {
            if idx > 0 {
                cursor.inc_both();
            }
            while cursor.n < u64::from(category) {
                cursor.inc_n();
            }
            sum += &cursor.value;
        }
        sum
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.prefix)?;
        for (idx, category) in self.categories.iter().enumerate() {
            if idx > 0 {
                f.write_str(",")?;
            }
            write!(f, "c{category}")?;
        }
        Ok(())
    }
}

impl FromStr for Label {
    type Err = McsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

// ---------------------------------------------------------------------------
// CategoryRange
// ---------------------------------------------------------------------------

/// Every choice of `k` distinct categories out of `n`, under one prefix.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CategoryRange {
    prefix: String,
    n: u32,
    k: u32,
}

impl CategoryRange {
    /// Create a range of `k`-of-`n` labels.
    ///
    /// # Errors
    ///
    /// Returns [`McsError::Config`] when `k` is zero or larger than `n`.
    pub fn new(prefix: impl Into<String>, n: u32, k: u32) -> Result<Self, McsError> {
        if k == 0 {
            return Err(McsError::Config(
                "labels must contain at least one category".to_owned(),
            ));
        }
        if k > n {
            return Err(McsError::Config(format!(
                "cannot pick {k} categories out of {n}"
            )));
        }
        Ok(Self {
            prefix: prefix.into(),
            n,
            k,
        })
    }

    /// Parse `prefix/k` or `prefix/k,n`.
    ///
    /// # Errors
    ///
    /// Returns [`McsError::Format`] for malformed input and
    /// [`McsError::Config`] for unusable values.
    pub fn parse(input: &str) -> Result<Self, McsError> {
        let input = input.trim();
        let format = |reason: &str| McsError::Format {
            what: "category range",
            input: input.to_owned(),
            reason: reason.to_owned(),
        };
        let (prefix, counts) = input
            .rsplit_once('/')
            .ok_or_else(|| format("expected prefix/k[,n]"))?;
        let (k, n) = match counts.split_once(',') {
            Some((k, n)) => (k, Some(n)),
            None => (counts, None),
        };
        let k: u32 = k
            .trim()
            .parse()
            .map_err(|_| format("label size is not a number"))?;
        let n: u32 = match n {
            Some(n) => n
                .trim()
                .parse()
                .map_err(|_| format("category count is not a number"))?,
            None => DEFAULT_CATEGORIES,
        };
        Self::new(prefix, n, k)
    }

    /// Shared label prefix.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Number of categories to choose from.
    pub fn categories(&self) -> u32 {
        self.n
    }

    /// Categories per label.
    pub fn label_size(&self) -> u32 {
        self.k
    }

    /// Number of distinct labels, `C(n, k)`.
    pub fn size(&self) -> BigUint {
        binomial(u64::from(self.n), u64::from(self.k))
    }

    /// Whether `label` belongs to this range.
    pub fn contains(&self, label: &Label) -> bool {
        label.prefix == self.prefix
            && label.categories.len() == usize::try_from(self.k).unwrap_or(usize::MAX)
            && label.categories.iter().all(|&c| c < self.n)
    }

    /// Offset of `label`, or `None` if it is not part of the range.
    pub fn offset(&self, label: &Label) -> Option<BigUint> {
        self.contains(label).then(|| label.offset())
    }

    /// The label at `offset`, or `None` when `offset >= size()`.
    #[allow(clippy::arithmetic_side_effects)] // only subtracts values <= remaining
    pub fn label_at(&self, offset: &BigUint) -> Option<Label> {
        if *offset >= self.size() {
            return None;
        }
        let mut remaining = offset.clone();
        let top = u64::from(self.n).checked_sub(1)?;
        let mut cursor = Binomial::new(top, u64::from(self.k));
        let mut categories = Vec::with_capacity(usize::try_from(self.k).ok()?);

        loop {
            while cursor.value > remaining {
                cursor.dec_n()?;
            }
            categories.push(u32::try_from(cursor.n).ok()?);
            remaining -= &cursor.value;
            if cursor.k == 1 {
                break;
            }
            cursor.dec_both()?;
        }

        Some(Label {
            prefix: self.prefix.clone(),
            categories,
        })
    }
}

impl fmt::Display for CategoryRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.n == DEFAULT_CATEGORIES {
            write!(f, "{}/{}", self.prefix, self.k)
        } else {
            write!(f, "{}/{},{}", self.prefix, self.k, self.n)
        }
    }
}

impl FromStr for CategoryRange {
    type Err = McsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

// ---------------------------------------------------------------------------
// Binomial coefficients
// ---------------------------------------------------------------------------

/// `C(n, k)` computed exactly.
#[allow(clippy::arithmetic_side_effects)] // BigUint grows instead of overflowing
pub fn binomial(n: u64, k: u64) -> BigUint {
    if k > n {
        return BigUint::zero();
    }
    let k = k.min(n - k);
    let mut result = BigUint::one();
    for j in 0..k {
        result *= n - j;
        result /= j + 1;
    }
    result
}

/// A binomial coefficient `C(n, k)` that can be walked one step at a time
/// without recomputing from scratch.
struct Binomial {
    n: u64,
    k: u64,
    value: BigUint,
}

#[allow(clippy::arithmetic_side_effects)] // BigUint grows instead of overflowing
impl Binomial {
    fn new(n: u64, k: u64) -> Self {
        Self {
            n,
            k,
            value: binomial(n, k),
        }
    }

    /// `C(n, k)` to `C(n + 1, k)`.
    fn inc_n(&mut self) {
        let next = self.n + 1;
        self.value = match next.cmp(&self.k) {
            std::cmp::Ordering::Less => BigUint::zero(),
            std::cmp::Ordering::Equal => BigUint::one(),
            std::cmp::Ordering::Greater => &self.value * next / (next - self.k),
        };
        self.n = next;
    }

    /// `C(n, k)` to `C(n + 1, k + 1)`.
    fn inc_both(&mut self) {
        let (n, k) = (self.n + 1, self.k + 1);
        self.value = match n.cmp(&k) {
            std::cmp::Ordering::Less => BigUint::zero(),
            std::cmp::Ordering::Equal => BigUint::one(),
            std::cmp::Ordering::Greater => &self.value * n / k,
        };
        self.n = n;
        self.k = k;
    }

    /// `C(n, k)` to `C(n - 1, k)`; `None` below zero.
    fn dec_n(&mut self) -> Option<()> {
        let prev = self.n.checked_sub(1)?;
        self.value = if prev < self.k {
            BigUint::zero()
        } else {
            &self.value * (self.n - self.k) / self.n
        };
        self.n = prev;
        Some(())
    }

    /// `C(n, k)` to `C(n - 1, k - 1)`; `None` below zero.
    fn dec_both(&mut self) -> Option<()> {
        let n = self.n.checked_sub(1)?;
        let k = self.k.checked_sub(1)?;
        self.value = &self.value * self.k / self.n;
        self.n = n;
        self.k = k;
        Some(())
    }
}
