// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Batching of points for one destination.
//!
//! The pending batch is owned by a single [`BatcherService`] task. Producers hold
//! cloneable [`BatcherHandle`]s and talk to it over a channel, so appending a
//! point, checking the size threshold and flushing happen one command at a time.
//! The deadline timer is another branch of the same loop and can never race an
//! add-triggered flush.
//!
//! ```text
//!   handles ──Add/Flush/Shutdown──> service ──write──> PointSink
//!                                      ^
//!                              deadline timer
//! ```
//!
//! Once the service has shut down, every add carrying values, flush or shutdown
//! is answered with [`BatcherError::Stopped`]. Adds without values are ignored in
//! every state.

use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use tokio::sync::{mpsc, oneshot};
use tokio::time::{sleep, Instant, Sleep};
use tracing::{debug, error, warn};

use crate::errors::BatcherError;
use crate::point::{DataPoint, Destination, Tags, Values};
use crate::sink::PointSink;

// Deadline used when the timeout does not fit in an Instant.
const FAR_FUTURE: Duration = Duration::from_secs(86400 * 365 * 30);

/// Result of a successful add.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddOutcome {
    /// The point had no values and was dropped.
    Ignored,
    /// The point is pending; carries the pending batch length.
    Buffered(usize),
    /// The point filled the batch, which was flushed with this many points.
    Flushed(usize),
}

#[derive(Debug)]
pub enum BatcherCommand {
    Add(DataPoint, oneshot::Sender<Result<AddOutcome, BatcherError>>),
    Flush(oneshot::Sender<Result<usize, BatcherError>>),
    Shutdown(oneshot::Sender<Result<usize, BatcherError>>),
}

#[derive(Clone, Debug)]
pub struct BatcherHandle {
    tx: mpsc::UnboundedSender<BatcherCommand>,
}

impl BatcherHandle {
    /// Queues a point. Returns the flush error if this add filled the batch and
    /// the write failed.
    pub async fn add(
        &self,
        timestamp: SystemTime,
        tags: Tags,
        values: Values,
    ) -> Result<AddOutcome, BatcherError> {
        let Some(point) = DataPoint::new(timestamp, tags, values) else {
            return Ok(AddOutcome::Ignored);
        };
        let (response_tx, response_rx) = oneshot::channel();
        self.tx
            .send(BatcherCommand::Add(point, response_tx))
            .map_err(|_| BatcherError::Stopped)?;
        response_rx.await.map_err(|_| BatcherError::Stopped)?
    }

    /// Flushes whatever is pending. Returns the number of points written.
    pub async fn flush(&self) -> Result<usize, BatcherError> {
        let (response_tx, response_rx) = oneshot::channel();
        self.tx
            .send(BatcherCommand::Flush(response_tx))
            .map_err(|_| BatcherError::Stopped)?;
        response_rx.await.map_err(|_| BatcherError::Stopped)?
    }

    /// Flushes one last time and stops the service.
    pub async fn shutdown(&self) -> Result<usize, BatcherError> {
        let (response_tx, response_rx) = oneshot::channel();
        self.tx
            .send(BatcherCommand::Shutdown(response_tx))
            .map_err(|_| BatcherError::Stopped)?;
        response_rx.await.map_err(|_| BatcherError::Stopped)?
    }
}

pub struct BatcherConfig {
    pub destination: Destination,
    /// Flush as soon as this many points are pending. 0 disables the size trigger.
    pub size: usize,
    /// Maximum lifetime of a pending batch. Zero disables the timer.
    pub timeout: Duration,
}

pub struct BatcherService {
    destination: Destination,
    size: usize,
    timeout: Duration,
    sink: Arc<dyn PointSink>,
    pending: Option<Vec<DataPoint>>,
    rx: mpsc::UnboundedReceiver<BatcherCommand>,
}

impl BatcherService {
    #[must_use]
    pub fn new(config: BatcherConfig, sink: Arc<dyn PointSink>) -> (Self, BatcherHandle) {
        let (tx, rx) = mpsc::unbounded_channel();
        let service = Self {
            destination: config.destination,
            size: config.size,
            timeout: config.timeout,
            sink,
            pending: None,
            rx,
        };
        (service, BatcherHandle { tx })
    }

    pub async fn run(mut self) {
        debug!(
            "Batcher for {} started (size: {}, timeout: {:?})",
            self.destination, self.size, self.timeout
        );

        let timer_enabled = !self.timeout.is_zero();
        let mut deadline: Pin<Box<Sleep>> = Box::pin(sleep(self.timeout));

        loop {
            tokio::select! {
                command = self.rx.recv() => match command {
                    Some(BatcherCommand::Add(point, response_tx)) => {
                        let outcome = self.add(point, deadline.as_mut()).await;
                        if response_tx.send(outcome).is_err() {
                            debug!("Add response dropped - receiver gone");
                        }
                    }
                    Some(BatcherCommand::Flush(response_tx)) => {
                        let result = self.write().await;
                        if response_tx.send(result).is_err() {
                            debug!("Flush response dropped - receiver gone");
                        }
                    }
                    Some(BatcherCommand::Shutdown(response_tx)) => {
                        debug!("Batcher for {} shutting down", self.destination);
                        let result = self.write().await;
                        if response_tx.send(result).is_err() {
                            debug!("Shutdown response dropped - receiver gone");
                        }
                        break;
                    }
                    None => {
                        debug!("All handles for {} dropped, flushing", self.destination);
                        if let Err(e) = self.write().await {
                            error!("Final flush for {} failed: {}", self.destination, e);
                        }
                        break;
                    }
                },
                () = deadline.as_mut(), if timer_enabled => {
                    if let Err(e) = self.write().await {
                        error!("Timed flush for {} failed: {}", self.destination, e);
                    }
                    deadline.as_mut().reset(self.next_deadline());
                }
            }
        }

        debug!("Batcher for {} stopped", self.destination);
    }

    async fn add(
        &mut self,
        point: DataPoint,
        deadline: Pin<&mut Sleep>,
    ) -> Result<AddOutcome, BatcherError> {
        if self.pending.is_none() {
            deadline.reset(self.next_deadline());
        }
        let pending = self.pending.get_or_insert_with(Vec::new);
        pending.push(point);

        let len = pending.len();
        if self.size > 0 && len >= self.size {
            return self.write().await.map(AddOutcome::Flushed);
        }
        Ok(AddOutcome::Buffered(len))
    }

    fn next_deadline(&self) -> Instant {
        let now = Instant::now();
        now.checked_add(self.timeout)
            .unwrap_or_else(|| now + FAR_FUTURE)
    }

    /// Hands the whole pending batch to the sink. The batch is gone afterwards
    /// whatever the outcome: failed points are dropped, never carried over.
    async fn write(&mut self) -> Result<usize, BatcherError> {
        let Some(points) = self.pending.take() else {
            return Ok(0);
        };
        if points.is_empty() {
            return Ok(0);
        }

        match self.sink.write(&self.destination, &points).await {
            Ok(()) => {
                debug!("Flushed {} points to {}", points.len(), self.destination);
                Ok(points.len())
            }
            Err(e) => {
                warn!(
                    "Dropping {} points for {} after failed write",
                    points.len(),
                    self.destination
                );
                Err(e.into())
            }
        }
    }
}
