//! Failure taxonomy for the switcher.
//!
//! Plumbing code returns `anyhow::Result`. Where the control loop has to tell
//! failures apart (a feed that is gone for good vs. a frame that simply did not
//! arrive), the error is raised as a `SwitcherError` and recovered with
//! `downcast_ref`.

use std::fmt;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SwitcherError {
    /// Bad static configuration. Fatal, prevents startup.
    Configuration(String),
    /// The feed's source is permanently invalid. The feed is disabled for the run.
    SourceFatal { feed: String, reason: String },
    /// No frame this tick. Retried on the next tick.
    TransientSample { feed: String, reason: String },
    /// Detector backend unreachable or frame malformed. Treated like a missed frame.
    Detector(String),
    /// The output controller refused or failed a call.
    Actuator(String),
}

impl SwitcherError {
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    pub fn source_fatal(feed: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::SourceFatal {
            feed: feed.into(),
            reason: reason.into(),
        }
    }

    pub fn detector(message: impl Into<String>) -> Self {
        Self::Detector(message.into())
    }

    pub fn actuator(message: impl Into<String>) -> Self {
        Self::Actuator(message.into())
    }

    /// Stable code for log lines and tests.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Configuration(_) => "CONFIGURATION",
            Self::SourceFatal { .. } => "SOURCE_FATAL",
            Self::TransientSample { .. } => "TRANSIENT_SAMPLE",
            Self::Detector(_) => "DETECTOR",
            Self::Actuator(_) => "ACTUATOR",
        }
    }

    /// True for failures that end the feed (or the process) rather than a single tick.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Configuration(_) | Self::SourceFatal { .. })
    }
}

impl fmt::Display for SwitcherError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Configuration(message) => write!(f, "{}: {}", self.code(), message),
            Self::SourceFatal { feed, reason } | Self::TransientSample { feed, reason } => {
                write!(f, "{}: feed '{}': {}", self.code(), feed, reason)
            }
            Self::Detector(message) | Self::Actuator(message) => {
                write!(f, "{}: {}", self.code(), message)
            }
        }
    }
}

impl std::error::Error for SwitcherError {}

/// Find a `SwitcherError` anywhere in an `anyhow` chain.
pub fn classify(err: &anyhow::Error) -> Option<&SwitcherError> {
    err.chain().find_map(|cause| cause.downcast_ref::<SwitcherError>())
}
