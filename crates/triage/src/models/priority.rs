//! Priority tiers and classification results

use serde::{Deserialize, Serialize};
use std::fmt;

/// Priority tier assigned by the classifier
///
/// Declaration order matches display order: High sorts first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Priority {
    High,
    Medium,
    Low,
    Unknown,
}

impl Priority {
    /// All tiers in display order
    pub const ALL: [Priority; 4] = [
        Priority::High,
        Priority::Medium,
        Priority::Low,
        Priority::Unknown,
    ];

    /// Sort rank (lower sorts first)
    pub fn rank(self) -> u8 {
        match self {
            Priority::High => 0,
            Priority::Medium => 1,
            Priority::Low => 2,
            Priority::Unknown => 3,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Priority::High => "High",
            Priority::Medium => "Medium",
            Priority::Low => "Low",
            Priority::Unknown => "Unknown",
        }
    }

    /// Map a numeric class id from a probabilistic estimator
    pub fn from_class_id(id: i64) -> Self {
        match id {
            0 => Priority::Low,
            1 => Priority::Medium,
            2 => Priority::High,
            _ => Priority::Unknown,
        }
    }

    /// Normalize a label string returned by a backend
    ///
    /// Backends are inconsistent about label typing, so stringified class
    /// ids ("0", "1", "2") are accepted alongside tier names.
    pub fn from_label(label: &str) -> Self {
        let label = label.trim();
        match label {
            "0" => return Priority::Low,
            "1" => return Priority::Medium,
            "2" => return Priority::High,
            _ => {}
        }

        if label.eq_ignore_ascii_case("high") {
            Priority::High
        } else if label.eq_ignore_ascii_case("medium") {
            Priority::Medium
        } else if label.eq_ignore_ascii_case("low") {
            Priority::Low
        } else {
            Priority::Unknown
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of classifying one message
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClassificationResult {
    pub priority: Priority,
    /// Always within [0, 1]
    pub confidence: f64,
}

impl ClassificationResult {
    /// Create a result, clamping confidence into [0, 1]
    pub fn new(priority: Priority, confidence: f64) -> Self {
        let confidence = if confidence.is_nan() {
            0.0
        } else {
            confidence.clamp(0.0, 1.0)
        };
        Self {
            priority,
            confidence,
        }
    }

    /// The degraded result used whenever a backend fails
    pub fn unknown() -> Self {
        Self {
            priority: Priority::Unknown,
            confidence: 0.0,
        }
    }
}
