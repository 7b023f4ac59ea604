//! Channel naming.
//!
//! A channel name is `{scope}:{partition}`. Each segment is lower-cased and
//! every character outside `[a-z0-9-]` becomes `-`; the result must then
//! start and end with a letter or digit and contain no `--`. The length bound
//! applies to the joined name.

use std::fmt;

use crate::error::QueueError;

/// Inclusive length bounds for a joined channel name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NameBounds {
    pub min: usize,
    pub max: usize,
}

impl NameBounds {
    /// 3 to 63 characters.
    pub const STANDARD: Self = Self { min: 3, max: 63 };
    /// 5 to 256 characters.
    pub const EXTENDED: Self = Self { min: 5, max: 256 };
}

/// A validated pub/sub channel name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChannelName(String);

impl ChannelName {
    /// Build and validate the channel name for `partition` within `scope`.
    pub fn new(scope: &str, partition: &str, bounds: NameBounds) -> Result<Self, QueueError> {
        let scope = sanitize(scope);
        let partition = sanitize(partition);
        validate_segment(&scope)?;
        validate_segment(&partition)?;

        let name = format!("{scope}:{partition}");
        let len = name.len();
        if len < bounds.min || len > bounds.max {
            return Err(QueueError::InvalidChannelName {
                name,
                rule: format!(
                    "length {len} is outside the allowed range {}..={}",
                    bounds.min, bounds.max
                ),
            });
        }
        Ok(Self(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ChannelName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ChannelName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Lower-case `segment` and replace every character outside `[a-z0-9-]`
/// with `-`.
pub fn sanitize(segment: &str) -> String {
    segment
        .chars()
        .map(|c| {
            let c = c.to_ascii_lowercase();
            if c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' {
                c
            } else {
                '-'
            }
        })
        .collect()
}

fn validate_segment(segment: &str) -> Result<(), QueueError> {
    let invalid = |rule: &str| QueueError::InvalidChannelName {
        name: segment.to_owned(),
        rule: rule.to_owned(),
    };

    let (Some(first), Some(last)) = (segment.chars().next(), segment.chars().last()) else {
        return Err(invalid("segment must not be empty"));
    };
    if !first.is_ascii_alphanumeric() {
        return Err(invalid("must start with a letter or digit"));
    }
    if !last.is_ascii_alphanumeric() {
        return Err(invalid("must end with a letter or digit"));
    }
    if segment.contains("--") {
        return Err(invalid("must not contain consecutive dashes"));
    }
    Ok(())
}
