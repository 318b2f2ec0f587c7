// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::time::Duration;

/// Capture groups with this prefix become tags.
pub const TAG_PREFIX: &str = "tag_";
/// Capture groups with this prefix become numeric values.
pub const VALUE_PREFIX: &str = "val_";

/// Largest datagram read from a syslog socket in one go.
pub const MAX_DATAGRAM_SIZE: usize = 8192;

pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_millis(800);
pub const DEFAULT_BATCH_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_BATCH_SIZE: usize = 0;

pub const CONFIG_FILE_NAME: &str = "sysflux.yml";
pub const CONFIG_SEARCH_PATHS: [&str; 2] = [".", "/etc/sysflux/"];
pub const ENV_PREFIX: &str = "SYSFLUX_";
