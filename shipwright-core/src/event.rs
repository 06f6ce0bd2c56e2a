//! Events emitted while building, tagging and pushing images.
//!
//! The JSON shape mirrors the records of the docker event stream, tagged by
//! an `event` field, so a dump file can be inspected with ordinary JSON tools.

use serde::{Deserialize, Serialize};

/// Detail attached to error and warning records.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorDetail {
    /// Human-readable failure description.
    pub message: String,
}

/// One line of output from the docker client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Record {
    /// A failure.
    Error {
        /// Failure summary.
        error: String,
        /// Failure detail.
        #[serde(rename = "errorDetail")]
        error_detail: ErrorDetail,
    },
    /// A non-fatal warning.
    Warning {
        /// Warning summary.
        warn: String,
        /// Warning detail.
        #[serde(rename = "errorDetail")]
        error_detail: ErrorDetail,
    },
    /// A layer status update, e.g. `0f4a1b2c3d4e: Pushed`.
    Status {
        /// Status text.
        status: String,
        /// Layer or image id the status refers to.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<String>,
    },
    /// Free-form output.
    Stream {
        /// Raw output text.
        stream: String,
    },
}

impl Record {
    /// A free-form output record.
    pub fn stream(text: impl Into<String>) -> Self {
        Self::Stream {
            stream: text.into(),
        }
    }

    /// An error record whose summary and detail carry the same message.
    pub fn error(message: impl Into<String>) -> Self {
        let message = message.into();
        Self::Error {
            error: message.clone(),
            error_detail: ErrorDetail { message },
        }
    }

    /// A warning record.
    pub fn warning(message: impl Into<String>) -> Self {
        let message = message.into();
        Self::Warning {
            warn: message.clone(),
            error_detail: ErrorDetail { message },
        }
    }

    /// Interpret a line printed by `docker push` or `docker pull`.
    ///
    /// Lines of the form `<12 hex id>: <status>` become status records.
    pub fn from_progress_line(line: &str) -> Self {
        if let Some((id, status)) = line.split_once(": ") {
            let is_layer = id.len() == 12 && id.chars().all(|ch| ch.is_ascii_hexdigit());
            if is_layer {
                return Self::Status {
                    status: status.trim().to_string(),
                    id: Some(id.to_string()),
                };
            }
        }
        Self::Status {
            status: line.trim().to_string(),
            id: None,
        }
    }
}

/// Something that happened to an image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Event {
    /// Output of an image build.
    BuildMsg {
        /// Image being built.
        image: String,
        /// Build output.
        #[serde(flatten)]
        record: Record,
    },
    /// Output of an image push.
    Push {
        /// Image being pushed.
        image: String,
        /// Push output.
        #[serde(flatten)]
        record: Record,
    },
    /// An image was tagged through the docker daemon.
    Tag {
        /// Source `name:ref`.
        old_image: String,
        /// Target repository.
        repository: String,
        /// Target tag.
        tag: String,
    },
    /// A tag was created directly in the registry without pulling the image.
    Alias {
        /// Source `name:ref`.
        old_image: String,
        /// Target repository.
        repository: String,
        /// Target tag.
        tag: String,
    },
}

impl Event {
    /// Whether the event reports a failure.
    pub fn is_error(&self) -> bool {
        matches!(
            self,
            Self::BuildMsg {
                record: Record::Error { .. },
                ..
            } | Self::Push {
                record: Record::Error { .. },
                ..
            }
        )
    }

    /// Image the event belongs to, for highlighting.
    pub fn image(&self) -> &str {
        match self {
            Self::BuildMsg { image, .. } | Self::Push { image, .. } => image,
            Self::Tag { repository, .. } | Self::Alias { repository, .. } => repository,
        }
    }
}
