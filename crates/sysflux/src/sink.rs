// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use async_trait::async_trait;

use crate::errors::SinkError;
use crate::point::{DataPoint, Destination};

/// Storage backend receiving flushed batches.
///
/// A call either stores every point or fails; partial acceptance is not modeled.
#[async_trait]
pub trait PointSink: Send + Sync {
    async fn write(&self, destination: &Destination, points: &[DataPoint])
        -> Result<(), SinkError>;
}
