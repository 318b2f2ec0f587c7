// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Syslog receiver feeding lines through an extractor into a batcher.
//!
//! Datagrams are not parsed as syslog frames. Each datagram is split into
//! lines and every line is handed to the extractor as is, so the configured
//! pattern is searched anywhere in the line, header included.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::SystemTime;

use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, trace, warn};

use crate::batcher_service::{AddOutcome, BatcherHandle};
use crate::constants::MAX_DATAGRAM_SIZE;
use crate::extractor::{Extractor, Rejection};

pub struct RecorderConfig {
    /// Address to bind the UDP socket to, e.g. `0.0.0.0:5514`.
    pub listen: String,
}

// LineReader abstracts where datagrams come from.
enum LineReader {
    UdpSocket(UdpSocket),

    /// Replays a fixed buffer, for tests.
    #[allow(dead_code)]
    MirrorTest(Vec<u8>, SocketAddr),
}

impl LineReader {
    async fn read(&self) -> std::io::Result<(Vec<u8>, SocketAddr)> {
        match self {
            LineReader::UdpSocket(socket) => {
                let mut buf = [0; MAX_DATAGRAM_SIZE];
                let (amt, src) = socket.recv_from(&mut buf).await?;
                Ok((buf[..amt].to_owned(), src))
            }
            LineReader::MirrorTest(data, src) => Ok((data.clone(), *src)),
        }
    }
}

pub struct Recorder {
    cancel_token: CancellationToken,
    extractor: Arc<Extractor>,
    batcher: BatcherHandle,
    reader: LineReader,
}

impl Recorder {
    /// Binds the listening socket. Received lines go through `extractor` into `batcher`.
    pub async fn new(
        config: &RecorderConfig,
        extractor: Arc<Extractor>,
        batcher: BatcherHandle,
        cancel_token: CancellationToken,
    ) -> std::io::Result<Recorder> {
        let socket = UdpSocket::bind(&config.listen).await?;
        Ok(Recorder {
            cancel_token,
            extractor,
            batcher,
            reader: LineReader::UdpSocket(socket),
        })
    }

    /// Address the socket is bound to, useful when listening on port 0.
    #[must_use]
    pub fn local_addr(&self) -> Option<SocketAddr> {
        match &self.reader {
            LineReader::UdpSocket(socket) => socket.local_addr().ok(),
            LineReader::MirrorTest(..) => None,
        }
    }

    /// Receives and processes datagrams until the cancel token fires.
    pub async fn spin(self) {
        loop {
            tokio::select! {
                () = self.cancel_token.cancelled() => break,
                received = self.reader.read() => match received {
                    Ok((buf, src)) => self.insert_lines(&buf, src, SystemTime::now()).await,
                    Err(e) => error!("Failed to receive syslog datagram: {}", e),
                },
            }
        }
        debug!("Recorder stopped");
    }

    #[allow(dead_code)]
    async fn consume(&self) -> std::io::Result<()> {
        let (buf, src) = self.reader.read().await?;
        self.insert_lines(&buf, src, SystemTime::now()).await;
        Ok(())
    }

    async fn insert_lines(&self, buf: &[u8], src: SocketAddr, timestamp: SystemTime) {
        let text = String::from_utf8_lossy(buf);
        trace!("Received message: {} from {}", text, src);

        for line in text.split('\n') {
            let line = line.strip_suffix('\r').unwrap_or(line);
            if line.is_empty() {
                continue;
            }

            let extraction = match self.extractor.process(line) {
                Ok(extraction) => extraction,
                Err(Rejection::Coercion(e)) => {
                    warn!("Failed to process message: {}", e);
                    debug!("{}", line);
                    continue;
                }
                Err(e) => {
                    trace!("Ignoring line from {}: {}", src, e);
                    continue;
                }
            };

            for skipped in &extraction.skipped {
                debug!("Skipping field: {}", skipped);
            }

            match self
                .batcher
                .add(timestamp, extraction.tags, extraction.values)
                .await
            {
                Ok(AddOutcome::Ignored) => trace!("Line from {} produced no values", src),
                Ok(_) => {}
                Err(e) => error!("Failed to write datapoint: {}", e),
            }
        }
    }
}
