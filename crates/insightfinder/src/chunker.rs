// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Splits one round of metric points into size-bounded chunks.
//!
//! Points are pushed in store order (instance by instance, records in
//! insertion order). The chunker keeps a running count of the serialized size
//! of every point in the open chunk; as soon as that count exceeds the
//! threshold the chunk is handed back to the caller to be sent, and the next
//! chunk picks up where the previous one stopped, possibly in the middle of an
//! instance. A single point is never split.
//!
//! Instance entries are created lazily, so no chunk carries an instance
//! without points.

use crate::errors::ShippingError;
use crate::payload::{InstanceDataMap, MetricDataPoint};

/// A group of points ready to be wrapped into one request.
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    pub instance_data_map: InstanceDataMap,
    /// Sum of the serialized sizes of the points in this chunk.
    pub content_bytes: usize,
}

impl Chunk {
    pub fn point_count(&self) -> usize {
        self.instance_data_map.point_count()
    }
}

#[derive(Debug)]
pub struct Chunker {
    threshold: usize,
    timestamp: i64,
    component_name: Option<String>,
    current: InstanceDataMap,
    current_bytes: usize,
}

impl Chunker {
    pub fn new(threshold: usize, timestamp: i64, component_name: Option<String>) -> Self {
        Self {
            threshold,
            timestamp,
            component_name,
            current: InstanceDataMap::new(),
            current_bytes: 0,
        }
    }

    /// Adds one point. Returns the finished chunk when this point pushed the
    /// running size over the threshold.
    pub fn push(
        &mut self,
        instance_name: &str,
        point: MetricDataPoint,
    ) -> Result<Option<Chunk>, ShippingError> {
        let size = serde_json::to_vec(&point)
            .map_err(|e| ShippingError::Payload(e.to_string()))?
            .len();

        self.current.push_point(
            instance_name,
            self.component_name.as_deref(),
            self.timestamp,
            point,
        );
        self.current_bytes += size;

        if self.current_bytes > self.threshold {
            return Ok(Some(self.take()));
        }
        Ok(None)
    }

    /// Returns whatever is left, unless nothing is.
    pub fn finish(mut self) -> Option<Chunk> {
        if self.current.is_empty() {
            None
        } else {
            Some(self.take())
        }
    }

    fn take(&mut self) -> Chunk {
        let chunk = Chunk {
            instance_data_map: std::mem::take(&mut self.current),
            content_bytes: self.current_bytes,
        };
        self.current_bytes = 0;
        chunk
    }
}
