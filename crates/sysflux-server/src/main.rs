// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

use std::{env, path::PathBuf, sync::Arc};
use tokio::{task::JoinHandle, time::Duration};
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use sysflux::{
    batcher_service::{BatcherConfig, BatcherHandle, BatcherService},
    config::{Config, InfluxConfig, SyslogConfig},
    extractor::Extractor,
    influx::{InfluxSink, InfluxSinkConfig, RetryStrategy},
    point::Destination,
    recorder::{Recorder, RecorderConfig},
    sink::PointSink,
};
use tokio_util::sync::CancellationToken;

const RETRY_STRATEGY: RetryStrategy = RetryStrategy::LinearBackoff(3, 1);
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

struct Source {
    name: String,
    recorder: JoinHandle<()>,
    batcher: BatcherHandle,
    service: JoinHandle<()>,
}

#[tokio::main]
pub async fn main() {
    let log_level = env::var("SYSFLUX_LOG_LEVEL")
        .map(|val| val.to_lowercase())
        .unwrap_or("info".to_string());
    let colors = env::var("SYSFLUX_COLORS")
        .map(|val| val.to_lowercase() == "true")
        .unwrap_or(false);

    let env_filter = format!("h2=off,hyper=off,rustls=off,{}", log_level);

    #[allow(clippy::expect_used)]
    let subscriber = tracing_subscriber::fmt::Subscriber::builder()
        .with_env_filter(
            EnvFilter::try_new(env_filter).expect("could not parse log level in configuration"),
        )
        .with_ansi(colors)
        .with_level(true)
        .with_thread_names(false)
        .with_thread_ids(false)
        .with_line_number(false)
        .with_file(false)
        .with_target(true)
        .without_time()
        .finish();

    #[allow(clippy::expect_used)]
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    debug!("Logging subsystem enabled");
    info!("Starting sysflux {}", env!("CARGO_PKG_VERSION"));

    let config_path = env::var("SYSFLUX_CONFIG").ok().map(PathBuf::from);
    let config = match Config::load(config_path.as_deref()) {
        Ok(c) => c,
        Err(e) => {
            error!("Error loading configuration: {e}");
            return;
        }
    };
    if let Err(e) = config.validate() {
        error!("{e}");
        return;
    }
    for warning in config.warnings() {
        warn!("{warning}");
    }

    let cancel_token = CancellationToken::new();
    let mut sources = Vec::with_capacity(config.syslog.len());
    for (i, syslog) in config.syslog.iter().enumerate() {
        match start_source(&config.influx, syslog, cancel_token.clone()).await {
            Ok(source) => sources.push(source),
            Err(e) => error!("syslog({i}): failed to start: {e}"),
        }
    }
    if sources.is_empty() {
        error!("No syslog source could be started, shutting down");
        return;
    }

    wait_for_signal().await;
    info!("Shutting down");
    cancel_token.cancel();

    for source in sources {
        if let Err(e) = source.recorder.await {
            error!("{}: recorder task failed: {e}", source.name);
        }
        let stopped = stop_batcher(&source.name, source.batcher, source.service);
        if tokio::time::timeout(SHUTDOWN_TIMEOUT, stopped).await.is_err() {
            error!("{}: shutdown timed out", source.name);
        }
    }
}

async fn stop_batcher(name: &str, batcher: BatcherHandle, service: JoinHandle<()>) {
    match batcher.shutdown().await {
        Ok(n) => debug!("{name}: wrote {n} points on shutdown"),
        Err(e) => error!("{name}: final flush failed: {e}"),
    }
    drop(batcher);
    if let Err(e) = service.await {
        error!("{name}: batcher task failed: {e}");
    }
}

async fn start_source(
    influx: &InfluxConfig,
    syslog: &SyslogConfig,
    cancel_token: CancellationToken,
) -> Result<Source, String> {
    let destination = Destination::new(syslog.database(influx), &syslog.measurement);

    let sink = InfluxSink::new(InfluxSinkConfig {
        addr: influx.addr.clone(),
        user: influx.user.clone(),
        password: influx.password.clone(),
        timeout: influx.timeout,
        https_proxy: influx.https_proxy.clone(),
        retry_strategy: RETRY_STRATEGY,
    })
    .map_err(|e| e.to_string())?;

    let extractor = Extractor::new(&syslog.regex, syslog.coercion).map_err(|e| e.to_string())?;
    debug!(
        "{destination}: tags {:?}, values {:?}",
        extractor.tag_names().collect::<Vec<_>>(),
        extractor.value_names().collect::<Vec<_>>()
    );

    // 1. Create the batcher service
    let (service, batcher) = BatcherService::new(
        BatcherConfig {
            destination: destination.clone(),
            size: syslog.batch_size,
            timeout: syslog.batch_timeout,
        },
        Arc::new(sink) as Arc<dyn PointSink>,
    );

    // 2. Start it in the background
    let service = tokio::spawn(service.run());

    // 3. Hand a clone of the handle to the recorder
    let recorder = match Recorder::new(
        &RecorderConfig {
            listen: syslog.listen.clone(),
        },
        Arc::new(extractor),
        batcher.clone(),
        cancel_token,
    )
    .await
    {
        Ok(recorder) => recorder,
        Err(e) => {
            let _ = batcher.shutdown().await;
            return Err(format!("unable to listen on {}: {e}", syslog.listen));
        }
    };
    info!("{destination}: listening on {}", syslog.listen);

    Ok(Source {
        name: destination.to_string(),
        recorder: tokio::spawn(recorder.spin()),
        batcher,
        service,
    })
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut terminate = match signal(SignalKind::terminate()) {
        Ok(s) => s,
        Err(e) => {
            warn!("Unable to listen for SIGTERM: {e}");
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = terminate.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    let _ = tokio::signal::ctrl_c().await;
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::time::SystemTime;
    use sysflux::errors::SinkError;
    use sysflux::point::{DataPoint, Tags, Values};
    use tracing::Instrument;
    use tracing_test::traced_test;

    struct PanickingSink;

    #[async_trait]
    impl PointSink for PanickingSink {
        async fn write(&self, _: &Destination, _: &[DataPoint]) -> Result<(), SinkError> {
            panic!("sink exploded");
        }
    }

    #[tokio::test]
    #[traced_test]
    async fn test_stop_batcher_reports_failed_service() {
        let (service, batcher) = BatcherService::new(
            BatcherConfig {
                destination: Destination::new("telegraf", "sensors"),
                size: 0,
                timeout: Duration::ZERO,
            },
            Arc::new(PanickingSink) as Arc<dyn PointSink>,
        );
        let service = tokio::spawn(service.run().in_current_span());

        let mut values = Values::new();
        values.insert("temp".to_string(), 1.0);
        batcher
            .add(SystemTime::now(), Tags::new(), values)
            .await
            .unwrap();

        tokio::time::timeout(
            Duration::from_secs(5),
            stop_batcher("telegraf/sensors", batcher, service),
        )
        .await
        .expect("stop_batcher did not return");

        assert!(logs_contain("telegraf/sensors: final flush failed"));
        assert!(logs_contain("telegraf/sensors: batcher task failed"));
    }
}
