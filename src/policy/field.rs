//! Field paths and field-level violations.
//!
//! Violations render the way the cluster API renders them, e.g.
//! `spec.containers[0].securityContext.runAsUser: Invalid value: 1: ...`,
//! so callers and tests can match on stable substrings.

use std::fmt;

/// Dotted path to a field of a pod spec.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FieldPath {
    segments: Vec<Segment>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Name(String),
    Index(usize),
    Key(String),
}

impl FieldPath {
    /// A path starting at `name`. An empty name gives the empty path.
    pub fn root(name: &str) -> Self {
        let mut path = Self::default();
        if !name.is_empty() {
            path.segments.push(Segment::Name(name.to_owned()));
        }
        path
    }

    /// The path of field `name` below this one.
    pub fn child(&self, name: &str) -> Self {
        let mut path = self.clone();
        path.segments.push(Segment::Name(name.to_owned()));
        path
    }

    /// The path of element `index` of this list.
    pub fn index(&self, index: usize) -> Self {
        let mut path = self.clone();
        path.segments.push(Segment::Index(index));
        path
    }

    /// The path of entry `key` of this map.
    pub fn key(&self, key: &str) -> Self {
        let mut path = self.clone();
        path.segments.push(Segment::Key(key.to_owned()));
        path
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for segment in &self.segments {
            match segment {
                Segment::Name(name) => {
                    if !first {
                        f.write_str(".")?;
                    }
                    f.write_str(name)?;
                }
                Segment::Index(i) => write!(f, "[{i}]")?,
                Segment::Key(k) => write!(f, "[{k}]")?,
            }
            first = false;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Violations
// ---------------------------------------------------------------------------

/// Category of a field violation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldErrorKind {
    /// A value must be set but is not.
    Required,
    /// The value is set but not acceptable.
    Invalid,
    /// The field may not be used at all.
    Forbidden,
    /// The value is not one of the supported choices.
    NotSupported,
}

impl FieldErrorKind {
    fn as_str(self) -> &'static str {
        match self {
            Self::Required => "Required value",
            Self::Invalid => "Invalid value",
            Self::Forbidden => "Forbidden",
            Self::NotSupported => "Unsupported value",
        }
    }
}

/// One violation of a policy by a field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldError {
    /// Category.
    pub kind: FieldErrorKind,
    /// Offending field.
    pub field: FieldPath,
    /// Rendered offending value, for `Invalid` and `NotSupported`.
    pub value: Option<String>,
    /// Human-readable explanation.
    pub detail: String,
}

impl FieldError {
    /// `field` must be set.
    pub fn required(field: FieldPath, detail: impl Into<String>) -> Self {
        Self {
            kind: FieldErrorKind::Required,
            field,
            value: None,
            detail: detail.into(),
        }
    }

    /// `field` holds the unacceptable `value`.
    pub fn invalid(field: FieldPath, value: impl fmt::Debug, detail: impl Into<String>) -> Self {
        Self {
            kind: FieldErrorKind::Invalid,
            field,
            value: Some(format!("{value:?}")),
            detail: detail.into(),
        }
    }

    /// `field` may not be used.
    pub fn forbidden(field: FieldPath, detail: impl Into<String>) -> Self {
        Self {
            kind: FieldErrorKind::Forbidden,
            field,
            value: None,
            detail: detail.into(),
        }
    }

    /// `value` is not one of `supported`.
    pub fn not_supported(field: FieldPath, value: impl fmt::Debug, supported: &[&str]) -> Self {
        let quoted: Vec<String> = supported.iter().map(|s| format!("{s:?}")).collect();
        Self {
            kind: FieldErrorKind::NotSupported,
            field,
            value: Some(format!("{value:?}")),
            detail: format!("supported values: {}", quoted.join(", ")),
        }
    }
}

impl fmt::Display for FieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.kind.as_str())?;
        if let Some(value) = &self.value {
            write!(f, ": {value}")?;
        }
        if !self.detail.is_empty() {
            write!(f, ": {}", self.detail)?;
        }
        Ok(())
    }
}

impl std::error::Error for FieldError {}

/// Render a list of violations as one message: a single error as is,
/// several as a bracketed, comma-separated list.
pub fn aggregate(errors: &[FieldError]) -> String {
    match errors {
        [] => String::new(),
        [only] => only.to_string(),
        many => {
            let parts: Vec<String> = many.iter().map(ToString::to_string).collect();
            format!("[{}]", parts.join(", "))
        }
    }
}
