// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! HTTP client for the InsightFinder metric receiver.

use crate::constants::METRIC_DATA_API;
use crate::errors::ShippingError;
use crate::http::build_client;
use crate::util::form_complete_url;
use reqwest::header::CONTENT_TYPE;
use reqwest::{Response, StatusCode};
use std::time::Duration;
use tracing::{debug, error, warn};

/// How many times a request is attempted and how long to wait in between.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryStrategy {
    /// Total attempts, no wait between them.
    Immediate(u64),
    /// Total attempts, with the same wait between every two attempts.
    FixedInterval(u64, Duration),
}

impl RetryStrategy {
    pub fn attempts(&self) -> u64 {
        match self {
            Self::Immediate(attempts) | Self::FixedInterval(attempts, _) => (*attempts).max(1),
        }
    }

    pub fn interval(&self) -> Duration {
        match self {
            Self::Immediate(_) => Duration::ZERO,
            Self::FixedInterval(_, interval) => *interval,
        }
    }
}

#[derive(Debug, Clone)]
pub struct InsightFinderApi {
    client: reqwest::Client,
    endpoint: String,
    retry_strategy: RetryStrategy,
}

impl InsightFinderApi {
    pub fn new(
        base_url: &str,
        https_proxy: Option<&str>,
        timeout: Duration,
        retry_strategy: RetryStrategy,
    ) -> Result<Self, ShippingError> {
        let endpoint = form_complete_url(base_url, METRIC_DATA_API)
            .ok_or_else(|| ShippingError::Client(format!("invalid url {base_url:?}")))?;
        let client =
            build_client(https_proxy, timeout).map_err(|e| ShippingError::Client(e.to_string()))?;
        Ok(Self {
            client,
            endpoint,
            retry_strategy,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Posts one JSON body, retrying transport failures and 5xx/429 answers.
    ///
    /// Any other 4xx answer is final: sending the same body again cannot
    /// succeed.
    pub async fn ship(&self, body: &[u8]) -> Result<Response, ShippingError> {
        let attempts = self.retry_strategy.attempts();
        let mut last_status = None;

        for attempt in 1..=attempts {
            debug!(
                "Sending {} bytes to {} (attempt {attempt}/{attempts})",
                body.len(),
                self.endpoint
            );
            let result = self
                .client
                .post(&self.endpoint)
                .header(CONTENT_TYPE, "application/json")
                .body(body.to_vec())
                .send()
                .await;

            match result {
                Ok(response) if response.status().is_success() => return Ok(response),
                Ok(response) => {
                    let status = response.status();
                    let text = response.text().await.unwrap_or_default();
                    if !is_retryable(status) {
                        error!("{status}: InsightFinder rejected payload: {text:?}");
                        return Err(ShippingError::Destination(
                            Some(status),
                            format!("Request rejected with status {status}"),
                        ));
                    }
                    warn!("{status}: Failed to push to InsightFinder: {text:?}");
                    last_status = Some(status);
                }
                Err(e) => {
                    warn!("Error occurred sending to InsightFinder: {e}");
                    last_status = e.status();
                }
            }

            if attempt < attempts {
                let interval = self.retry_strategy.interval();
                if !interval.is_zero() {
                    debug!("Sleeping {}s before retrying", interval.as_secs_f64());
                    tokio::time::sleep(interval).await;
                }
            }
        }

        error!("HTTP connection failure after {attempts} attempts");
        Err(ShippingError::Destination(
            last_status,
            format!("Failed to send request after {attempts} attempts"),
        ))
    }
}

fn is_retryable(status: StatusCode) -> bool {
    status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS
}
