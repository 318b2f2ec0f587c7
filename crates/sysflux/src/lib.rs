// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Turns free-text syslog lines into InfluxDB points.
//!
//! Each configured source owns an [`extractor::Extractor`] (one named-capture
//! pattern), a [`batcher_service::BatcherService`] (one destination) and a
//! [`recorder::Recorder`] feeding received lines through both.

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

pub mod batcher_service;
pub mod config;
pub mod constants;
pub mod errors;
pub mod extractor;
pub mod influx;
pub mod line_protocol;
pub mod point;
pub mod recorder;
pub mod sink;
