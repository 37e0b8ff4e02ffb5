// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::api::{InsightFinderApi, RetryStrategy};
use crate::chunker::{Chunk, Chunker};
use crate::errors::ShippingError;
use crate::payload::{MetricDataPoint, MetricDataReceivePayload, MetricPostRequest};
use crate::store::MetricStore;
use std::time::Duration;
use tracing::{debug, error, info};

pub struct FlusherConfig {
    pub url: String,
    pub user_name: String,
    pub license_key: String,
    pub project_name: String,
    pub system_name: Option<String>,
    /// Name published for system-wide metrics, which are stored under `""`.
    pub instance_name: String,
    pub component_name: Option<String>,
    pub sampling_interval: Option<Duration>,
    pub https_proxy: Option<String>,
    pub timeout: Duration,
    pub retry_strategy: RetryStrategy,
    pub chunk_threshold: usize,
    pub max_packet_size: usize,
}

/// Outcome of a successful flush.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FlushReport {
    pub chunks: usize,
    pub points: usize,
    pub bytes: usize,
}

#[derive(Debug)]
pub struct Flusher {
    api: InsightFinderApi,
    user_name: String,
    license_key: String,
    project_name: String,
    system_name: Option<String>,
    instance_name: String,
    component_name: Option<String>,
    sampling_interval: Option<String>,
    chunk_threshold: usize,
    max_packet_size: usize,
}

impl Flusher {
    pub fn new(config: FlusherConfig) -> Result<Self, ShippingError> {
        let api = InsightFinderApi::new(
            &config.url,
            config.https_proxy.as_deref(),
            config.timeout,
            config.retry_strategy,
        )?;
        Ok(Flusher {
            api,
            user_name: config.user_name,
            license_key: config.license_key,
            project_name: config.project_name,
            system_name: config.system_name,
            instance_name: config.instance_name,
            component_name: config.component_name,
            sampling_interval: config
                .sampling_interval
                .map(|interval| interval.as_secs().to_string()),
            chunk_threshold: config.chunk_threshold,
            max_packet_size: config.max_packet_size,
        })
    }

    /// Ships everything currently in the store, stamped with `timestamp_ms`.
    ///
    /// Chunks are sent one after the other as soon as they fill up. The first
    /// chunk that cannot be delivered, or that serializes above the maximum
    /// packet size, ends the flush; chunks already sent stay sent. The store
    /// is left untouched, clearing it is up to the caller.
    pub async fn flush(
        &self,
        store: &MetricStore,
        timestamp_ms: i64,
    ) -> Result<FlushReport, ShippingError> {
        let mut chunker = Chunker::new(
            self.chunk_threshold,
            timestamp_ms,
            self.component_name.clone(),
        );
        let mut report = FlushReport::default();

        for instance in store.list_instances()? {
            let published = self.published_name(&instance);
            for record in store.records_for_instance(&instance)? {
                let point = MetricDataPoint::new(record.metric, record.value);
                if let Some(chunk) = chunker.push(published, point)? {
                    self.send_chunk(chunk, &mut report).await?;
                }
            }
        }
        if let Some(chunk) = chunker.finish() {
            self.send_chunk(chunk, &mut report).await?;
        }

        if report.chunks == 0 {
            debug!("Nothing to flush");
        } else {
            info!(
                "Flushed {} metric points in {} chunks ({} bytes)",
                report.points, report.chunks, report.bytes
            );
        }
        Ok(report)
    }

    async fn send_chunk(
        &self,
        chunk: Chunk,
        report: &mut FlushReport,
    ) -> Result<(), ShippingError> {
        let points = chunk.point_count();
        let body = self.request_body(&chunk)?;
        debug!(
            "Prepare to send out {} bytes ({points} points) to {}",
            body.len(),
            self.api.endpoint()
        );
        if let Err(e) = self.api.ship(&body).await {
            error!("Failed to deliver chunk {}: {e}", report.chunks + 1);
            return Err(e);
        }
        report.chunks += 1;
        report.points += points;
        report.bytes += body.len();
        Ok(())
    }

    /// Serializes a chunk into the full request and enforces the packet ceiling.
    fn request_body(&self, chunk: &Chunk) -> Result<Vec<u8>, ShippingError> {
        let request = MetricPostRequest {
            license_key: &self.license_key,
            user_name: &self.user_name,
            data: MetricDataReceivePayload {
                project_name: &self.project_name,
                user_name: &self.user_name,
                instance_data_map: &chunk.instance_data_map,
                system_name: self.system_name.as_deref(),
                sampling_interval: self.sampling_interval.clone(),
            },
        };
        let body =
            serde_json::to_vec(&request).map_err(|e| ShippingError::Payload(e.to_string()))?;
        if body.len() > self.max_packet_size {
            error!(
                "The packet size is too large: {} > {} bytes",
                body.len(),
                self.max_packet_size
            );
            return Err(ShippingError::PayloadTooLarge {
                size: body.len(),
                max: self.max_packet_size,
            });
        }
        Ok(body)
    }

    fn published_name<'a>(&'a self, instance: &'a str) -> &'a str {
        if instance.is_empty() {
            &self.instance_name
        } else {
            instance
        }
    }
}
