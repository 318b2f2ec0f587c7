// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Error types shared across the pipeline.

use reqwest::StatusCode;

/// Raised while building an extractor. A pipeline never starts with one of these.
#[derive(Debug, thiserror::Error)]
pub enum Creation {
    #[error("invalid pattern: {0}")]
    Pattern(#[from] regex::Error),
    #[error("unknown capture group prefix in \"{0}\", expected \"tag_\" or \"val_\"")]
    UnknownPrefix(String),
    #[error("capture group \"{0}\" has an empty name after its prefix")]
    EmptyName(String),
}

/// A `val_` capture that could not be turned into an f32.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CoercionError {
    #[error("field \"{field}\": \"{raw}\" is not a number")]
    Invalid { field: String, raw: String },
    #[error("field \"{field}\": \"{raw}\" is out of range for a 32-bit float")]
    OutOfRange { field: String, raw: String },
    #[error("field \"{field}\": \"{raw}\" is not a finite number")]
    NonFinite { field: String, raw: String },
}

impl CoercionError {
    #[must_use]
    pub fn field(&self) -> &str {
        match self {
            Self::Invalid { field, .. }
            | Self::OutOfRange { field, .. }
            | Self::NonFinite { field, .. } => field,
        }
    }
}

/// Failure reported by a point sink.
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("failed to prepare payload: {0}")]
    Payload(String),
    #[error("destination rejected write ({0:?}): {1}")]
    Destination(Option<StatusCode>, String),
    #[error("failed to build http client: {0}")]
    Client(String),
}

#[derive(Debug, thiserror::Error)]
pub enum BatcherError {
    #[error("flush failed: {0}")]
    Sink(#[from] SinkError),
    #[error("batcher is stopped")]
    Stopped,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let error = Creation::UnknownPrefix("foo_bar".to_string());
        assert_eq!(
            error.to_string(),
            "unknown capture group prefix in \"foo_bar\", expected \"tag_\" or \"val_\""
        );

        let error = BatcherError::Sink(SinkError::Destination(
            Some(StatusCode::BAD_REQUEST),
            "unable to parse".to_string(),
        ));
        assert!(error.to_string().starts_with("flush failed: destination rejected write"));
    }

    #[test]
    fn test_coercion_error_field() {
        let error = CoercionError::Invalid {
            field: "temp".to_string(),
            raw: "abc".to_string(),
        };
        assert_eq!(error.field(), "temp");
        assert_eq!(error.to_string(), "field \"temp\": \"abc\" is not a number");
    }
}
