//! Configured devices and the two regular expressions each one carries.
//!
//! Both patterns use *starts-with* semantics: the expression must match at
//! the beginning of the subject but may stop before its end.  A termination
//! pattern such as `.*?\n` therefore completes a scan at the first newline,
//! while `[0-9]{4}` would complete as soon as four digits have arrived even if
//! the scanner is still typing.  Anchor the end (`^...$`) when that matters.

use std::fmt;

use regex::Regex;
use thiserror::Error;

/// A pattern failed to compile.
#[derive(Debug, Error)]
#[error("invalid {kind} pattern `{pattern}`: {source}")]
pub struct PatternError {
    pub kind: &'static str,
    pub pattern: String,
    #[source]
    pub source: regex::Error,
}

/// A regex compiled so that it only matches at the start of the subject.
#[derive(Clone)]
struct StartAnchored {
    source: String,
    regex: Regex,
}

impl StartAnchored {
    fn compile(kind: &'static str, pattern: &str) -> Result<Self, PatternError> {
        let invalid = |source: regex::Error| PatternError {
            kind,
            pattern: pattern.to_string(),
            source,
        };
        // Checked on its own first: an unbalanced `)` would otherwise close the
        // wrapping group below and leave later alternatives unanchored.
        Regex::new(pattern).map_err(invalid)?;
        // `\A` anchors at the start of the text even if the pattern turns on
        // multi-line mode, which would otherwise make `^` match after '\n'.
        let regex = Regex::new(&format!(r"\A(?:{pattern})")).map_err(invalid)?;
        Ok(Self {
            source: pattern.to_string(),
            regex,
        })
    }

    fn matches(&self, subject: &str) -> bool {
        self.regex.is_match(subject)
    }
}

impl fmt::Debug for StartAnchored {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Pattern").field(&self.source).finish()
    }
}

impl PartialEq for StartAnchored {
    fn eq(&self, other: &Self) -> bool {
        self.source == other.source
    }
}

impl Eq for StartAnchored {}

/// Regex matched against a device's hardware-identifier string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HwidPattern(StartAnchored);

impl HwidPattern {
    pub fn new(pattern: &str) -> Result<Self, PatternError> {
        StartAnchored::compile("hardware id", pattern).map(Self)
    }

    /// Builds the pattern for a USB vendor id and optional product id.
    ///
    /// Matches `VID_1234&PID_5678` anywhere in the hardware id.
    pub fn from_vid_pid(vid: u16, pid: Option<u16>) -> Self {
        let pattern = match pid {
            Some(pid) => format!(".*VID_{vid:04X}&PID_{pid:04X}"),
            None => format!(".*VID_{vid:04X}&"),
        };
        // Hex digits and literal text only; compilation cannot fail.
        Self::new(&pattern).unwrap_or_else(|_| unreachable!("generated pattern {pattern}"))
    }

    pub fn matches(&self, hwid: &str) -> bool {
        self.0.matches(hwid)
    }

    pub fn as_str(&self) -> &str {
        &self.0.source
    }
}

impl fmt::Display for HwidPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Regex deciding when the accumulated buffer forms a complete scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TerminationPattern(StartAnchored);

impl TerminationPattern {
    /// The default used when a device configures none: everything up to and
    /// including the first newline.
    pub const DEFAULT: &'static str = ".*?\n";

    pub fn new(pattern: &str) -> Result<Self, PatternError> {
        StartAnchored::compile("termination", pattern).map(Self)
    }

    /// Returns `true` when `buffer`, read from its start, is a complete scan.
    pub fn is_complete(&self, buffer: &str) -> bool {
        self.0.matches(buffer)
    }

    pub fn as_str(&self) -> &str {
        &self.0.source
    }
}

impl Default for TerminationPattern {
    fn default() -> Self {
        Self::new(Self::DEFAULT).unwrap_or_else(|_| unreachable!("default termination pattern"))
    }
}

/// Immutable description of one configured scanner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceSpec {
    pub id: String,
    pub hwid: HwidPattern,
    pub termination: TerminationPattern,
}

impl DeviceSpec {
    /// Compiles both patterns and builds the device.
    ///
    /// # Errors
    ///
    /// Returns [`PatternError`] naming the pattern that failed to compile.
    pub fn new(id: impl Into<String>, hwid: &str, termination: &str) -> Result<Self, PatternError> {
        Ok(Self {
            id: id.into(),
            hwid: HwidPattern::new(hwid)?,
            termination: TerminationPattern::new(termination)?,
        })
    }
}
