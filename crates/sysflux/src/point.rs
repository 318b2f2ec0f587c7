// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::collections::BTreeMap;
use std::fmt;
use std::time::SystemTime;

/// Dimensional attributes of a point, keyed by name.
pub type Tags = BTreeMap<String, String>;

/// Measured quantities of a point, keyed by name.
pub type Values = BTreeMap<String, f32>;

/// Where a batcher writes its points.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Destination {
    pub database: String,
    pub measurement: String,
}

impl Destination {
    #[must_use]
    pub fn new(database: impl Into<String>, measurement: impl Into<String>) -> Self {
        Self {
            database: database.into(),
            measurement: measurement.into(),
        }
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.database, self.measurement)
    }
}

/// A single sample. Measurement and database come from the batcher that holds it.
#[derive(Debug, Clone, PartialEq)]
pub struct DataPoint {
    timestamp: SystemTime,
    tags: Tags,
    values: Values,
}

impl DataPoint {
    /// Builds a point, or `None` when `values` is empty: a point without values
    /// carries nothing worth storing.
    #[must_use]
    pub fn new(timestamp: SystemTime, tags: Tags, values: Values) -> Option<Self> {
        if values.is_empty() {
            return None;
        }
        Some(Self {
            timestamp,
            tags,
            values,
        })
    }

    #[must_use]
    pub fn timestamp(&self) -> SystemTime {
        self.timestamp
    }

    #[must_use]
    pub fn tags(&self) -> &Tags {
        &self.tags
    }

    #[must_use]
    pub fn values(&self) -> &Values {
        &self.values
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vacuous_point_is_not_constructed() {
        let mut tags = Tags::new();
        tags.insert("host".to_string(), "srv1".to_string());
        assert!(DataPoint::new(SystemTime::UNIX_EPOCH, tags, Values::new()).is_none());
    }

    #[test]
    fn test_point_keeps_fields() {
        let mut values = Values::new();
        values.insert("temp".to_string(), 42.5);
        let point = DataPoint::new(SystemTime::UNIX_EPOCH, Tags::new(), values)
            .expect("point with values");
        assert_eq!(point.values().get("temp"), Some(&42.5));
        assert!(point.tags().is_empty());
        assert_eq!(point.timestamp(), SystemTime::UNIX_EPOCH);
    }

    #[test]
    fn test_destination_display() {
        let destination = Destination::new("telegraf", "sensors");
        assert_eq!(destination.to_string(), "telegraf/sensors");
    }
}
