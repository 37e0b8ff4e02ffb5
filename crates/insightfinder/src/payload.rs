// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Wire types of the InsightFinder metric receiver.
//!
//! The short field names (`in`, `cn`, `dit`, `t`, `m`, `v`, `idm`) are what the
//! receiver expects and must not change.
//!
//! ```json
//! {"licenseKey":"..","userName":"..","data":{"projectName":"..","userName":"..",
//!   "idm":{"host-1":{"in":"host-1","dit":{"1700000000000":{"t":1700000000000,
//!     "metricDataPointSet":[{"m":"CPU Usage %","v":12.5}]}}}}}}
//! ```

use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricDataPoint {
    #[serde(rename = "m")]
    pub metric_name: String,
    #[serde(rename = "v")]
    pub value: f64,
}

impl MetricDataPoint {
    pub fn new(metric_name: impl Into<String>, value: f64) -> Self {
        Self {
            metric_name: metric_name.into(),
            value,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DataInTimestamp {
    #[serde(rename = "t")]
    pub timestamp: i64,
    #[serde(rename = "metricDataPointSet")]
    pub metric_data_points: Vec<MetricDataPoint>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InstanceData {
    #[serde(rename = "in")]
    pub instance_name: String,
    #[serde(rename = "cn", skip_serializing_if = "Option::is_none")]
    pub component_name: Option<String>,
    /// Keyed by epoch millis; serde_json writes integer keys as strings.
    #[serde(rename = "dit")]
    pub data_in_timestamp_map: BTreeMap<i64, DataInTimestamp>,
}

impl InstanceData {
    fn new(instance_name: &str, component_name: Option<&str>) -> Self {
        Self {
            instance_name: instance_name.to_string(),
            component_name: component_name.map(str::to_string),
            data_in_timestamp_map: BTreeMap::new(),
        }
    }

    pub fn point_count(&self) -> usize {
        self.data_in_timestamp_map
            .values()
            .map(|dit| dit.metric_data_points.len())
            .sum()
    }
}

/// Instance name to instance data, serialized as a JSON object in insertion
/// order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InstanceDataMap {
    instances: Vec<InstanceData>,
}

impl InstanceDataMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn get(&self, instance_name: &str) -> Option<&InstanceData> {
        self.instances
            .iter()
            .find(|data| data.instance_name == instance_name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &InstanceData> {
        self.instances.iter()
    }

    pub fn point_count(&self) -> usize {
        self.instances.iter().map(InstanceData::point_count).sum()
    }

    /// Appends a point, creating the instance and timestamp entries on first use.
    pub fn push_point(
        &mut self,
        instance_name: &str,
        component_name: Option<&str>,
        timestamp: i64,
        point: MetricDataPoint,
    ) {
        let index = match self
            .instances
            .iter()
            .rposition(|data| data.instance_name == instance_name)
        {
            Some(index) => index,
            None => {
                self.instances
                    .push(InstanceData::new(instance_name, component_name));
                self.instances.len() - 1
            }
        };
        self.instances[index]
            .data_in_timestamp_map
            .entry(timestamp)
            .or_insert_with(|| DataInTimestamp {
                timestamp,
                metric_data_points: Vec::new(),
            })
            .metric_data_points
            .push(point);
    }
}

impl Serialize for InstanceDataMap {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.instances.len()))?;
        for data in &self.instances {
            map.serialize_entry(&data.instance_name, data)?;
        }
        map.end()
    }
}

#[derive(Debug, Serialize)]
pub struct MetricDataReceivePayload<'a> {
    #[serde(rename = "projectName")]
    pub project_name: &'a str,
    #[serde(rename = "userName")]
    pub user_name: &'a str,
    #[serde(rename = "idm")]
    pub instance_data_map: &'a InstanceDataMap,
    #[serde(rename = "systemName", skip_serializing_if = "Option::is_none")]
    pub system_name: Option<&'a str>,
    /// Sampling interval in seconds.
    #[serde(rename = "si", skip_serializing_if = "Option::is_none")]
    pub sampling_interval: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct MetricPostRequest<'a> {
    #[serde(rename = "licenseKey")]
    pub license_key: &'a str,
    #[serde(rename = "userName")]
    pub user_name: &'a str,
    pub data: MetricDataReceivePayload<'a>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_wire_field_names() {
        let mut idm = InstanceDataMap::new();
        idm.push_point(
            "host-1",
            Some("windows"),
            1_700_000_000_000,
            MetricDataPoint::new("CPU Usage %", 12.5),
        );
        let request = MetricPostRequest {
            license_key: "key",
            user_name: "user",
            data: MetricDataReceivePayload {
                project_name: "project",
                user_name: "user",
                instance_data_map: &idm,
                system_name: None,
                sampling_interval: Some("300".to_string()),
            },
        };

        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(
            value,
            json!({
                "licenseKey": "key",
                "userName": "user",
                "data": {
                    "projectName": "project",
                    "userName": "user",
                    "si": "300",
                    "idm": {
                        "host-1": {
                            "in": "host-1",
                            "cn": "windows",
                            "dit": {
                                "1700000000000": {
                                    "t": 1_700_000_000_000_i64,
                                    "metricDataPointSet": [{"m": "CPU Usage %", "v": 12.5}]
                                }
                            }
                        }
                    }
                }
            })
        );
    }

    #[test]
    fn test_optional_fields_are_omitted() {
        let mut idm = InstanceDataMap::new();
        idm.push_point("sda", None, 1, MetricDataPoint::new("Queue Length", 0.0));
        let text = serde_json::to_string(&idm).unwrap();
        assert!(!text.contains("\"cn\""));

        let payload = MetricDataReceivePayload {
            project_name: "p",
            user_name: "u",
            instance_data_map: &idm,
            system_name: None,
            sampling_interval: None,
        };
        let text = serde_json::to_string(&payload).unwrap();
        assert!(!text.contains("systemName"));
        assert!(!text.contains("\"si\""));
    }

    #[test]
    fn test_instances_keep_insertion_order() {
        let mut idm = InstanceDataMap::new();
        for name in ["zeta", "alpha", "mid"] {
            idm.push_point(name, None, 7, MetricDataPoint::new("m", 1.0));
        }
        let text = serde_json::to_string(&idm).unwrap();
        let zeta = text.find("\"zeta\"").unwrap();
        let alpha = text.find("\"alpha\"").unwrap();
        let mid = text.find("\"mid\"").unwrap();
        assert!(zeta < alpha && alpha < mid);
    }

    #[test]
    fn test_push_point_groups_by_instance_and_timestamp() {
        let mut idm = InstanceDataMap::new();
        idm.push_point("a", None, 10, MetricDataPoint::new("m1", 1.0));
        idm.push_point("b", None, 10, MetricDataPoint::new("m1", 2.0));
        idm.push_point("a", None, 10, MetricDataPoint::new("m2", 3.0));

        assert_eq!(idm.len(), 2);
        assert_eq!(idm.point_count(), 3);
        let a = idm.get("a").unwrap();
        assert_eq!(a.data_in_timestamp_map.len(), 1);
        assert_eq!(
            a.data_in_timestamp_map[&10].metric_data_points,
            vec![MetricDataPoint::new("m1", 1.0), MetricDataPoint::new("m2", 3.0)]
        );
    }
}
