// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! InfluxDB line protocol encoding.
//!
//! ```text
//! measurement,tag=value,tag=value field=1.5,field=2 1465839830100400
//! ```
//!
//! Timestamps are written with microsecond precision, so requests must be sent
//! with `precision=u`.

use std::fmt::Write;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::errors::SinkError;
use crate::point::DataPoint;

/// Encodes `points` as newline separated lines for `measurement`.
pub fn encode(measurement: &str, points: &[DataPoint]) -> Result<String, SinkError> {
    if measurement.is_empty() {
        return Err(SinkError::Payload("measurement name is empty".to_string()));
    }

    let mut body = String::new();
    for point in points {
        encode_point(&mut body, measurement, point)?;
        body.push('\n');
    }
    Ok(body)
}

fn encode_point(out: &mut String, measurement: &str, point: &DataPoint) -> Result<(), SinkError> {
    escape_into(out, measurement, &[',', ' ']);

    for (key, value) in point.tags() {
        let value = value.trim_end_matches('\\');
        // influx refuses empty tag values
        if key.is_empty() || value.is_empty() {
            continue;
        }
        out.push(',');
        escape_into(out, key, &[',', '=', ' ']);
        out.push('=');
        escape_into(out, value, &[',', '=', ' ']);
    }

    let mut separator = ' ';
    for (key, value) in point.values() {
        if !value.is_finite() {
            return Err(SinkError::Payload(format!(
                "field \"{key}\" has non-finite value {value}"
            )));
        }
        out.push(separator);
        escape_into(out, key, &[',', '=', ' ']);
        out.push('=');
        // fmt::Write for String never fails
        let _ = write!(out, "{value}");
        separator = ',';
    }

    let _ = write!(out, " {}", unix_micros(point.timestamp())?);
    Ok(())
}

// A trailing backslash would escape the separator that follows it, so it is dropped.
fn escape_into(out: &mut String, raw: &str, special: &[char]) {
    for ch in raw.trim_end_matches('\\').chars() {
        if special.contains(&ch) {
            out.push('\\');
        }
        out.push(ch);
    }
}

fn unix_micros(timestamp: SystemTime) -> Result<i64, SinkError> {
    match timestamp.duration_since(UNIX_EPOCH) {
        Ok(since) => i64::try_from(since.as_micros())
            .map_err(|_| SinkError::Payload("timestamp out of range".to_string())),
        Err(before) => i64::try_from(before.duration().as_micros())
            .map(|micros| -micros)
            .map_err(|_| SinkError::Payload("timestamp out of range".to_string())),
    }
}
