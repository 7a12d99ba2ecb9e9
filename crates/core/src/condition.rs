//! Condition ratings and their severity scoring.

use serde::{Deserialize, Serialize};

/// Condition rating of a photo or an aggregated space group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Condition {
    Excellent,
    Good,
    Fair,
    Poor,
    Critical,
    Unrated,
}

impl Condition {
    /// Numeric severity score used for aggregation.
    ///
    /// `excellent = 5 .. poor = 2`; `critical` and `unrated` both score 0.
    pub fn severity_score(&self) -> u8 {
        match self {
            Self::Excellent => 5,
            Self::Good => 4,
            Self::Fair => 3,
            Self::Poor => 2,
            Self::Critical | Self::Unrated => 0,
        }
    }

    /// Nearest named level for a (possibly fractional) score.
    pub fn from_score(score: f64) -> Self {
        match score.round() as i64 {
            s if s >= 5 => Self::Excellent,
            4 => Self::Good,
            3 => Self::Fair,
            2 => Self::Poor,
            _ => Self::Critical,
        }
    }

    /// Average the scores of a set of conditions and round to the nearest
    /// named level. An empty set stays `Unrated`.
    pub fn aggregate<'a, I>(conditions: I) -> Self
    where
        I: IntoIterator<Item = &'a Condition>,
    {
        let mut total = 0u32;
        let mut count = 0u32;
        for c in conditions {
            total += u32::from(c.severity_score());
            count += 1;
        }
        if count == 0 {
            return Self::Unrated;
        }
        Self::from_score(f64::from(total) / f64::from(count))
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Excellent => "excellent",
            Self::Good => "good",
            Self::Fair => "fair",
            Self::Poor => "poor",
            Self::Critical => "critical",
            Self::Unrated => "unrated",
        }
    }
}

impl Default for Condition {
    fn default() -> Self {
        Self::Unrated
    }
}

impl std::fmt::Display for Condition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
