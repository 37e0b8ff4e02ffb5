// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::time::Duration;

/// Path of the metric receiver, appended to the configured InsightFinder url.
pub const METRIC_DATA_API: &str = "/api/v2/metric-data-receive";

pub const DEFAULT_URL: &str = "https://app.insightfinder.com";

/// Running byte count of metric points after which a chunk is sent.
pub const CHUNK_SIZE: usize = 2 * 1024 * 1024;

/// Largest request body the receiver accepts.
pub const MAX_PACKET_SIZE: usize = 10_000_000;

pub const HTTP_RETRY_TIMES: u64 = 15;
pub const HTTP_RETRY_INTERVAL: Duration = Duration::from_secs(60);
pub const HTTP_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Number of consecutive failed clears tolerated before a round is refused.
pub const MAX_CLEAR_ATTEMPTS: u32 = 3;
