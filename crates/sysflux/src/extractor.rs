// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Named-capture extraction of tags and values from a log line.
//!
//! A source is configured with one regular expression. Every named group in it
//! must start with either `tag_` or `val_`:
//!
//! ```text
//! host=(?P<tag_host>\w+) temp=(?P<val_temp>[\d.]+)
//! ```
//!
//! `tag_` groups are copied verbatim into the point's tags, `val_` groups are
//! parsed as 32-bit floats into its values. The prefix is stripped in both cases.
//! Names are validated once, when the extractor is built, so processing a line
//! can never hit an unknown prefix.

use regex::Regex;
use serde::Deserialize;
use tracing::debug;

use crate::constants::{TAG_PREFIX, VALUE_PREFIX};
use crate::errors::{CoercionError, Creation};
use crate::point::{Tags, Values};

/// What to do with a line when one of its `val_` captures is not a number.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CoercionPolicy {
    /// Drop the offending field and keep the rest of the line.
    #[default]
    SkipField,
    /// Reject the whole line.
    RejectLine,
}

/// A validated capture group name.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CaptureGroup {
    Tag(String),
    Value(String),
}

impl CaptureGroup {
    /// Classifies a group name by its prefix.
    pub fn parse(name: &str) -> Result<Self, Creation> {
        let (stripped, group): (&str, fn(String) -> Self) =
            if let Some(stripped) = name.strip_prefix(TAG_PREFIX) {
                (stripped, Self::Tag)
            } else if let Some(stripped) = name.strip_prefix(VALUE_PREFIX) {
                (stripped, Self::Value)
            } else {
                return Err(Creation::UnknownPrefix(name.to_string()));
            };

        if stripped.is_empty() {
            return Err(Creation::EmptyName(name.to_string()));
        }
        Ok(group(stripped.to_string()))
    }
}

/// Why a line produced nothing.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum Rejection {
    #[error("line does not match pattern")]
    NoMatch,
    #[error(transparent)]
    Coercion(#[from] CoercionError),
}

/// Tags and values pulled out of one line.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Extraction {
    pub tags: Tags,
    pub values: Values,
    /// Fields dropped under [`CoercionPolicy::SkipField`].
    pub skipped: Vec<CoercionError>,
}

/// Compiled pattern plus the validated groups it declares.
///
/// Holds no mutable state, so one instance can be shared by every task
/// receiving lines for a source.
#[derive(Debug, Clone)]
pub struct Extractor {
    pattern: Regex,
    groups: Vec<(usize, CaptureGroup)>,
    policy: CoercionPolicy,
}

impl Extractor {
    pub fn new(pattern: &str, policy: CoercionPolicy) -> Result<Self, Creation> {
        let pattern = Regex::new(pattern)?;
        let groups = pattern
            .capture_names()
            .enumerate()
            .filter_map(|(index, name)| name.filter(|n| !n.is_empty()).map(|n| (index, n)))
            .map(|(index, name)| CaptureGroup::parse(name).map(|group| (index, group)))
            .collect::<Result<Vec<_>, _>>()?;

        debug!(
            "Compiled extractor with {} tag and {} value groups",
            groups
                .iter()
                .filter(|(_, g)| matches!(g, CaptureGroup::Tag(_)))
                .count(),
            groups
                .iter()
                .filter(|(_, g)| matches!(g, CaptureGroup::Value(_)))
                .count(),
        );

        Ok(Self {
            pattern,
            groups,
            policy,
        })
    }

    #[must_use]
    pub fn policy(&self) -> CoercionPolicy {
        self.policy
    }

    pub fn tag_names(&self) -> impl Iterator<Item = &str> {
        self.groups.iter().filter_map(|(_, group)| match group {
            CaptureGroup::Tag(name) => Some(name.as_str()),
            CaptureGroup::Value(_) => None,
        })
    }

    pub fn value_names(&self) -> impl Iterator<Item = &str> {
        self.groups.iter().filter_map(|(_, group)| match group {
            CaptureGroup::Value(name) => Some(name.as_str()),
            CaptureGroup::Tag(_) => None,
        })
    }

    /// Matches `line` and collects its tags and values.
    ///
    /// The result may hold no values at all; such a point is vacuous and the
    /// batcher ignores it.
    pub fn process(&self, line: &str) -> Result<Extraction, Rejection> {
        let captures = self.pattern.captures(line).ok_or(Rejection::NoMatch)?;

        let mut extraction = Extraction::default();
        for (index, group) in &self.groups {
            // an optional group left out of the match reads as empty
            let raw = captures.get(*index).map_or("", |m| m.as_str());

            match group {
                CaptureGroup::Tag(name) => {
                    extraction.tags.insert(name.clone(), raw.to_string());
                }
                CaptureGroup::Value(name) => match coerce(name, raw) {
                    Ok(value) => {
                        extraction.values.insert(name.clone(), value);
                    }
                    Err(e) => match self.policy {
                        CoercionPolicy::SkipField => extraction.skipped.push(e),
                        CoercionPolicy::RejectLine => return Err(Rejection::Coercion(e)),
                    },
                },
            }
        }

        Ok(extraction)
    }
}

fn coerce(field: &str, raw: &str) -> Result<f32, CoercionError> {
    let value: f32 = raw.parse().map_err(|_| CoercionError::Invalid {
        field: field.to_string(),
        raw: raw.to_string(),
    })?;

    if value.is_finite() {
        return Ok(value);
    }

    // A finite decimal that overflows f32 is a range problem, not garbage.
    let overflowed = !value.is_nan() && raw.parse::<f64>().is_ok_and(f64::is_finite);
    if overflowed {
        Err(CoercionError::OutOfRange {
            field: field.to_string(),
            raw: raw.to_string(),
        })
    } else {
        Err(CoercionError::NonFinite {
            field: field.to_string(),
            raw: raw.to_string(),
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const HOST_TEMP: &str = r"tag_host=(?P<tag_host>\w+) val_temp=(?P<val_temp>[\d.]+)";

    #[test]
    fn test_extracts_tags_and_values() {
        let extractor = Extractor::new(HOST_TEMP, CoercionPolicy::SkipField).unwrap();
        let extraction = extractor.process("tag_host=srv1 val_temp=42.5").unwrap();

        assert_eq!(extraction.tags.len(), 1);
        assert_eq!(extraction.tags["host"], "srv1");
        assert_eq!(extraction.values.len(), 1);
        assert_eq!(extraction.values["temp"], 42.5);
        assert!(extraction.skipped.is_empty());
    }

    #[test]
    fn test_match_anywhere_in_line() {
        let extractor = Extractor::new(
            r"if=(?P<tag_interface>\S+) rx=(?P<val_rx>\d+) tx=(?P<val_tx>\d+)",
            CoercionPolicy::default(),
        )
        .unwrap();
        let extraction = extractor
            .process("<134>Oct 11 22:14:15 gw01 stats: if=eth0 rx=1024 tx=512")
            .unwrap();

        assert_eq!(extraction.tags["interface"], "eth0");
        assert_eq!(extraction.values["rx"], 1024.0);
        assert_eq!(extraction.values["tx"], 512.0);
    }

    #[test]
    fn test_non_matching_line_is_rejected() {
        let extractor = Extractor::new(HOST_TEMP, CoercionPolicy::SkipField).unwrap();
        assert_eq!(
            extractor.process("something else entirely"),
            Err(Rejection::NoMatch)
        );
    }

    #[test]
    fn test_absent_optional_tag_is_empty() {
        let extractor = Extractor::new(
            r"(?:host=(?P<tag_host>\w+) )?load=(?P<val_load>\d+)",
            CoercionPolicy::SkipField,
        )
        .unwrap();
        let extraction = extractor.process("load=5").unwrap();

        assert_eq!(extraction.tags["host"], "");
        assert_eq!(extraction.values["load"], 5.0);
        assert!(extraction.skipped.is_empty());
    }

    #[test]
    fn test_absent_optional_value_follows_policy() {
        let pattern = r"host=(?P<tag_host>\w+)(?: temp=(?P<val_temp>\d+))?";

        let skipping = Extractor::new(pattern, CoercionPolicy::SkipField).unwrap();
        let extraction = skipping.process("host=srv1").unwrap();
        assert_eq!(extraction.tags["host"], "srv1");
        assert!(extraction.values.is_empty());
        assert_eq!(
            extraction.skipped,
            vec![CoercionError::Invalid {
                field: "temp".to_string(),
                raw: String::new(),
            }]
        );

        let rejecting = Extractor::new(pattern, CoercionPolicy::RejectLine).unwrap();
        assert!(matches!(
            rejecting.process("host=srv1"),
            Err(Rejection::Coercion(CoercionError::Invalid { .. }))
        ));
        assert_eq!(rejecting.process("host=srv1 temp=3").unwrap().values["temp"], 3.0);
    }

    #[test]
    fn test_invalid_value_is_skipped() {
        let extractor = Extractor::new(
            r"host=(?P<tag_host>\w+) x=(?P<val_x>\w+) y=(?P<val_y>\w+)",
            CoercionPolicy::SkipField,
        )
        .unwrap();
        let extraction = extractor.process("host=srv1 x=abc y=7").unwrap();

        assert_eq!(extraction.tags["host"], "srv1");
        assert!(!extraction.values.contains_key("x"));
        assert_eq!(extraction.values["y"], 7.0);
        assert_eq!(extraction.skipped.len(), 1);
        assert_eq!(extraction.skipped[0].field(), "x");
    }

    #[test]
    fn test_invalid_value_can_reject_line() {
        let extractor = Extractor::new(
            r"host=(?P<tag_host>\w+) x=(?P<val_x>\w+) y=(?P<val_y>\w+)",
            CoercionPolicy::RejectLine,
        )
        .unwrap();

        let rejection = extractor.process("host=srv1 x=abc y=7").unwrap_err();
        assert_eq!(
            rejection,
            Rejection::Coercion(CoercionError::Invalid {
                field: "x".to_string(),
                raw: "abc".to_string(),
            })
        );
    }

    #[test]
    fn test_all_values_skipped_leaves_vacuous_extraction() {
        let extractor = Extractor::new(
            r"host=(?P<tag_host>\w+) x=(?P<val_x>\w+)",
            CoercionPolicy::SkipField,
        )
        .unwrap();
        let extraction = extractor.process("host=srv1 x=abc").unwrap();

        assert_eq!(extraction.tags["host"], "srv1");
        assert!(extraction.values.is_empty());
    }

    #[test]
    fn test_unknown_prefix_fails_construction() {
        let err = Extractor::new(r"(?P<foo_bar>\d+)", CoercionPolicy::SkipField).unwrap_err();
        assert!(matches!(err, Creation::UnknownPrefix(name) if name == "foo_bar"));
    }

    #[test]
    fn test_empty_name_fails_construction() {
        let err = Extractor::new(r"(?P<val_>\d+)", CoercionPolicy::SkipField).unwrap_err();
        assert!(matches!(err, Creation::EmptyName(name) if name == "val_"));
    }

    #[test]
    fn test_invalid_pattern_fails_construction() {
        let err = Extractor::new(r"(?P<tag_host>\w+", CoercionPolicy::SkipField).unwrap_err();
        assert!(matches!(err, Creation::Pattern(_)));
    }

    #[test]
    fn test_unnamed_groups_are_ignored() {
        let extractor = Extractor::new(
            r"(GET|POST) (?P<tag_path>\S+) (\d+) (?P<val_ms>\d+)ms",
            CoercionPolicy::SkipField,
        )
        .unwrap();
        let extraction = extractor.process("GET /index 200 12ms").unwrap();

        assert_eq!(extraction.tags.len(), 1);
        assert_eq!(extraction.values.len(), 1);
        assert_eq!(extractor.tag_names().collect::<Vec<_>>(), vec!["path"]);
        assert_eq!(extractor.value_names().collect::<Vec<_>>(), vec!["ms"]);
    }

    #[test]
    fn test_coerce_range_and_non_finite() {
        assert_eq!(coerce("v", "1.5e3"), Ok(1500.0));
        assert!(matches!(
            coerce("v", "1e39"),
            Err(CoercionError::OutOfRange { .. })
        ));
        assert!(matches!(
            coerce("v", "NaN"),
            Err(CoercionError::NonFinite { .. })
        ));
        assert!(matches!(
            coerce("v", "inf"),
            Err(CoercionError::NonFinite { .. })
        ));
        assert!(matches!(
            coerce("v", "12,5"),
            Err(CoercionError::Invalid { .. })
        ));
    }

    #[test]
    fn test_capture_group_parse() {
        assert_eq!(
            CaptureGroup::parse("tag_host").unwrap(),
            CaptureGroup::Tag("host".to_string())
        );
        assert_eq!(
            CaptureGroup::parse("val_tag_x").unwrap(),
            CaptureGroup::Value("tag_x".to_string())
        );
        assert!(CaptureGroup::parse("value").is_err());
    }

    proptest! {
        #[test]
        fn prop_matching_lines_yield_exact_fields(
            host in "[a-z][a-z0-9]{0,12}",
            whole in 0u32..1_000_000,
            frac in 0u32..1000,
        ) {
            let extractor = Extractor::new(HOST_TEMP, CoercionPolicy::SkipField).unwrap();
            let temp = format!("{whole}.{frac}");
            let line = format!("tag_host={host} val_temp={temp}");

            let extraction = extractor.process(&line).unwrap();
            prop_assert_eq!(extraction.tags.len(), 1);
            prop_assert_eq!(&extraction.tags["host"], &host);
            prop_assert_eq!(extraction.values.len(), 1);
            prop_assert_eq!(extraction.values["temp"], temp.parse::<f32>().unwrap());
        }

        #[test]
        fn prop_non_matching_lines_are_rejected(line in "[A-Z ]{0,40}") {
            let extractor = Extractor::new(HOST_TEMP, CoercionPolicy::SkipField).unwrap();
            prop_assert_eq!(extractor.process(&line), Err(Rejection::NoMatch));
        }
    }
}
