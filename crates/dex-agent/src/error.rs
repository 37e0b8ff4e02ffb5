// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use insightfinder::errors::{ShippingError, StoreError};

/// Errors raised while reading the agent configuration
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Errors that end a collection round
#[derive(Debug, thiserror::Error)]
pub enum RoundError {
    #[error("Round skipped, metric store still holds the previous round: {0}")]
    Skipped(#[source] StoreError),

    #[error("Failed to ship metrics: {0}")]
    Shipping(#[from] ShippingError),
}
