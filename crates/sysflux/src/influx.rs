// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! InfluxDB 1.x HTTP write client.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use reqwest::StatusCode;
use tracing::{debug, error, warn};

use crate::errors::SinkError;
use crate::line_protocol;
use crate::point::{DataPoint, Destination};
use crate::sink::PointSink;

/// How often and how fast a failed write is retried within one flush.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryStrategy {
    /// Up to `n` attempts back to back.
    Immediate(u64),
    /// Up to `n` attempts, waiting `attempt * delay_ms` between them.
    LinearBackoff(u64, u64),
}

impl RetryStrategy {
    fn attempts(&self) -> u64 {
        match self {
            Self::Immediate(n) | Self::LinearBackoff(n, _) => (*n).max(1),
        }
    }

    async fn wait(&self, attempt: u64) {
        if let Self::LinearBackoff(_, delay_ms) = self {
            tokio::time::sleep(Duration::from_millis(delay_ms * attempt)).await;
        }
    }
}

pub struct InfluxSinkConfig {
    /// Base url of the server, e.g. `http://localhost:8086`.
    pub addr: String,
    pub user: Option<String>,
    pub password: Option<String>,
    pub timeout: Duration,
    pub https_proxy: Option<String>,
    pub retry_strategy: RetryStrategy,
}

#[derive(Debug, Clone)]
pub struct InfluxSink {
    client: reqwest::Client,
    write_url: String,
    user: Option<String>,
    password: Option<String>,
    retry_strategy: RetryStrategy,
}

impl InfluxSink {
    pub fn new(config: InfluxSinkConfig) -> Result<Self, SinkError> {
        let mut builder = reqwest::Client::builder().timeout(config.timeout);
        if let Some(proxy) = &config.https_proxy {
            let proxy = reqwest::Proxy::https(proxy).map_err(|e| SinkError::Client(e.to_string()))?;
            builder = builder.proxy(proxy);
        }
        let client = builder
            .build()
            .map_err(|e| SinkError::Client(e.to_string()))?;

        Ok(Self {
            client,
            write_url: format!("{}/write", config.addr.trim_end_matches('/')),
            user: config.user.filter(|u| !u.is_empty()),
            password: config.password,
            retry_strategy: config.retry_strategy,
        })
    }

    async fn send(&self, database: &str, body: String) -> Result<(), SinkError> {
        let mut request = self
            .client
            .post(&self.write_url)
            .query(&[("db", database), ("precision", "u")])
            .header(CONTENT_TYPE, "text/plain; charset=utf-8")
            .body(body);
        if let Some(user) = &self.user {
            request = request.basic_auth(user, self.password.as_ref());
        }

        let response = request
            .send()
            .await
            .map_err(|e| SinkError::Destination(e.status(), e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let text = response.text().await.unwrap_or_default();
        Err(SinkError::Destination(Some(status), text))
    }
}

/// 4xx means the payload itself was refused and sending it again won't help.
fn is_retryable(error: &SinkError) -> bool {
    match error {
        SinkError::Destination(Some(code), _) => !code.is_client_error(),
        SinkError::Destination(None, _) => true,
        SinkError::Payload(_) | SinkError::Client(_) => false,
    }
}

#[async_trait]
impl PointSink for InfluxSink {
    async fn write(
        &self,
        destination: &Destination,
        points: &[DataPoint],
    ) -> Result<(), SinkError> {
        if points.is_empty() {
            return Ok(());
        }
        let body = line_protocol::encode(&destination.measurement, points)?;
        let attempts = self.retry_strategy.attempts();

        let mut attempt = 1;
        loop {
            match self.send(&destination.database, body.clone()).await {
                Ok(()) => {
                    debug!("Wrote {} points to {}", points.len(), destination);
                    return Ok(());
                }
                Err(e) if attempt < attempts && is_retryable(&e) => {
                    warn!(
                        "Write to {} failed (attempt {}/{}): {}",
                        destination, attempt, attempts, e
                    );
                    self.retry_strategy.wait(attempt).await;
                    attempt += 1;
                }
                Err(e) => {
                    if matches!(e, SinkError::Destination(Some(StatusCode::NOT_FOUND), _)) {
                        error!("Database {} does not exist", destination.database);
                    }
                    return Err(e);
                }
            }
        }
    }
}
