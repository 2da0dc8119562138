//! Wire model of the metrics provider's `/api/all` and `/api/hash` payloads.
//!
//! Any field that is missing, `null` or of the wrong shape decodes to its
//! default, and malformed entries in a list are skipped.

pub mod client;

use crate::sampler::{InterfaceCounters, Snapshot};
use chrono::{DateTime, Utc};
use serde::de::{DeserializeOwned, Deserializer};
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;

pub use client::ApiClient;

/// Combined response of `/api/all`.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct AllResponse {
    #[serde(default, deserialize_with = "lenient")]
    pub cpu: CpuInfo,
    #[serde(default, deserialize_with = "lenient")]
    pub mem: MemInfo,
    #[serde(default, deserialize_with = "lenient")]
    pub disk: DiskInfo,
    #[serde(default, deserialize_with = "lenient")]
    pub net: NetInfo,
    #[serde(default, deserialize_with = "lenient")]
    pub host: HostInfo,
    #[serde(default, deserialize_with = "lenient")]
    pub processes: ProcInfo,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct CpuInfo {
    /// Per-core utilization; non-numeric entries read as 0 so core indexes hold
    #[serde(default, deserialize_with = "lenient_percentages")]
    pub percent: Vec<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct MemInfo {
    #[serde(rename = "virtual", default, deserialize_with = "lenient")]
    pub virtual_memory: Option<VirtualMemory>,
    #[serde(default, deserialize_with = "lenient")]
    pub swap: Option<SwapMemory>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct VirtualMemory {
    #[serde(default, deserialize_with = "lenient_u64")]
    pub total: u64,
    #[serde(default, deserialize_with = "lenient_u64")]
    pub used: u64,
    #[serde(rename = "usedPercent", default, deserialize_with = "lenient_f64")]
    pub used_percent: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct SwapMemory {
    #[serde(default, deserialize_with = "lenient_u64")]
    pub total: u64,
    #[serde(default, deserialize_with = "lenient_u64")]
    pub used: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct DiskInfo {
    #[serde(default, deserialize_with = "lenient_vec")]
    pub partitions: Vec<Partition>,
    /// Usage keyed by mountpoint
    #[serde(default, deserialize_with = "lenient_map")]
    pub usage: HashMap<String, DiskUsage>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Partition {
    #[serde(default, deserialize_with = "lenient")]
    pub device: String,
    #[serde(default, deserialize_with = "lenient")]
    pub mountpoint: String,
    #[serde(default, deserialize_with = "lenient")]
    pub fstype: String,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct DiskUsage {
    #[serde(default, deserialize_with = "lenient_u64")]
    pub total: u64,
    #[serde(default, deserialize_with = "lenient_u64")]
    pub used: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct NetInfo {
    #[serde(default, deserialize_with = "lenient_vec")]
    pub io_counters: Vec<IoCounters>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct IoCounters {
    #[serde(default, deserialize_with = "lenient")]
    pub name: String,
    #[serde(rename = "bytesRecv", default, deserialize_with = "lenient_u64")]
    pub bytes_recv: u64,
    #[serde(rename = "bytesSent", default, deserialize_with = "lenient_u64")]
    pub bytes_sent: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct HostInfo {
    #[serde(default, deserialize_with = "lenient")]
    pub info: Option<HostDetails>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct HostDetails {
    #[serde(default, deserialize_with = "lenient")]
    pub hostname: String,
    #[serde(default, deserialize_with = "lenient")]
    pub os: String,
    #[serde(default, deserialize_with = "lenient")]
    pub platform: String,
    #[serde(rename = "platformVersion", default, deserialize_with = "lenient")]
    pub platform_version: String,
    #[serde(rename = "kernelVersion", default, deserialize_with = "lenient")]
    pub kernel_version: String,
    /// Seconds since boot
    #[serde(default, deserialize_with = "lenient_u64")]
    pub uptime: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ProcInfo {
    #[serde(default, deserialize_with = "lenient_u64")]
    pub count: u64,
    /// Busiest processes by CPU, as ranked by the provider
    #[serde(default, deserialize_with = "lenient_vec")]
    pub top: Vec<ProcBrief>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ProcBrief {
    #[serde(default, deserialize_with = "lenient")]
    pub pid: i64,
    #[serde(default, deserialize_with = "lenient")]
    pub name: String,
    #[serde(default, deserialize_with = "lenient")]
    pub cmdline: String,
    #[serde(default, deserialize_with = "lenient")]
    pub username: String,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub cpu_percent: f64,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub mem_percent: f64,
    #[serde(default, deserialize_with = "lenient")]
    pub status: String,
}

/// Response of `/api/hash`: the provider's current random digest.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct HashResponse {
    #[serde(default, deserialize_with = "lenient")]
    pub randhash: String,
    #[serde(default, deserialize_with = "lenient")]
    pub hashbytes_hex: String,
    #[serde(rename = "updatedAt", default, deserialize_with = "lenient")]
    pub updated_at: Option<DateTime<Utc>>,
    /// Set when the provider could not refresh the digest
    #[serde(default, deserialize_with = "lenient")]
    pub warning: Option<String>,
}

impl HashResponse {
    pub fn from_json(body: &[u8]) -> Result<Self, serde_json::Error> {
        let value: Value = serde_json::from_slice(body)?;
        Ok(match value {
            Value::Object(_) => serde_json::from_value(value).unwrap_or_default(),
            _ => Self::default(),
        })
    }
}

impl AllResponse {
    /// Decode a response body. Only syntactically invalid JSON is an error;
    /// a document of the wrong shape decodes to an empty response.
    pub fn from_json(body: &[u8]) -> Result<Self, serde_json::Error> {
        let value: Value = serde_json::from_slice(body)?;
        Ok(Self::from_value(value))
    }

    pub fn from_value(value: Value) -> Self {
        match value {
            Value::Object(_) => serde_json::from_value(value).unwrap_or_default(),
            _ => Self::default(),
        }
    }

    /// The counters the sampler needs, stamped with the capture instant.
    pub fn snapshot(&self, timestamp: DateTime<Utc>) -> Snapshot {
        Snapshot {
            timestamp,
            cpu_percent_per_core: self.cpu.percent.clone(),
            network_counters: self
                .net
                .io_counters
                .iter()
                .map(|io| InterfaceCounters::new(io.name.clone(), io.bytes_recv, io.bytes_sent))
                .collect(),
        }
    }
}

fn lenient<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned + Default,
{
    let value = Value::deserialize(deserializer)?;
    Ok(serde_json::from_value(value).unwrap_or_default())
}

fn lenient_vec<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let value = Value::deserialize(deserializer)?;
    Ok(match value {
        Value::Array(items) => items
            .into_iter()
            .filter_map(|item| serde_json::from_value(item).ok())
            .collect(),
        _ => Vec::new(),
    })
}

fn lenient_map<'de, D, T>(deserializer: D) -> Result<HashMap<String, T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let value = Value::deserialize(deserializer)?;
    Ok(match value {
        Value::Object(entries) => entries
            .into_iter()
            .filter_map(|(key, item)| serde_json::from_value(item).ok().map(|v| (key, v)))
            .collect(),
        _ => HashMap::new(),
    })
}

fn lenient_percentages<'de, D>(deserializer: D) -> Result<Vec<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(match value {
        Value::Array(items) => items.iter().map(|v| v.as_f64().unwrap_or(0.0)).collect(),
        _ => Vec::new(),
    })
}

fn lenient_u64<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(value
        .as_u64()
        .or_else(|| value.as_f64().filter(|v| *v >= 0.0).map(|v| v as u64))
        .unwrap_or(0))
}

fn lenient_f64<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(value.as_f64().unwrap_or(0.0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn decode(value: Value) -> AllResponse {
        AllResponse::from_json(value.to_string().as_bytes()).unwrap()
    }

    #[test]
    fn decodes_provider_payload() {
        let resp = decode(json!({
            "cpu": { "percent": [12.5, 30.0], "info": [], "times": [] },
            "mem": {
                "virtual": { "total": 8192, "used": 2048, "usedPercent": 25.0 },
                "swap": { "total": 1024, "used": 0 }
            },
            "disk": {
                "partitions": [{ "device": "/dev/sda1", "mountpoint": "/", "fstype": "ext4" }],
                "usage": { "/": { "total": 100, "used": 40, "usedPercent": 40.0 } },
                "io_counters": {}
            },
            "net": {
                "interfaces": [],
                "io_counters": [{ "name": "eth0", "bytesRecv": 1000, "bytesSent": 500, "packetsSent": 3 }]
            },
            "host": { "info": {
                "hostname": "box", "os": "linux", "platform": "debian",
                "platformVersion": "12", "kernelVersion": "6.1.0", "uptime": 3600
            }},
            "processes": { "count": 200, "top": [
                { "pid": 1, "name": "init", "username": "root", "cpu_percent": 0.5, "mem_percent": 0.1, "status": "S" }
            ]}
        }));

        assert_eq!(resp.cpu.percent, vec![12.5, 30.0]);
        assert_eq!(resp.mem.virtual_memory.as_ref().unwrap().used_percent, 25.0);
        assert_eq!(resp.disk.partitions[0].mountpoint, "/");
        assert_eq!(resp.disk.usage["/"].used, 40);
        assert_eq!(resp.net.io_counters[0].bytes_recv, 1000);
        assert_eq!(resp.host.info.as_ref().unwrap().kernel_version, "6.1.0");
        assert_eq!(resp.processes.count, 200);
        assert_eq!(resp.processes.top[0].name, "init");
        assert_eq!(resp.processes.top[0].cmdline, "");
    }

    #[test]
    fn missing_sections_decode_to_defaults() {
        let resp = decode(json!({}));
        assert_eq!(resp, AllResponse::default());

        let resp = decode(json!({ "cpu": null, "net": { "io_counters": null } }));
        assert!(resp.cpu.percent.is_empty());
        assert!(resp.net.io_counters.is_empty());
    }

    #[test]
    fn wrong_shapes_degrade_instead_of_failing() {
        let resp = decode(json!({
            "cpu": { "percent": "busy" },
            "mem": { "virtual": "n/a" },
            "disk": { "partitions": {}, "usage": [] },
            "net": { "io_counters": [
                { "name": "eth0", "bytesRecv": 10, "bytesSent": 20 },
                "garbage",
                { "name": "eth1", "bytesRecv": "lots", "bytesSent": 7.0 }
            ]},
            "host": "unknown",
            "processes": { "count": -3, "top": 5 }
        }));

        assert!(resp.cpu.percent.is_empty());
        assert!(resp.mem.virtual_memory.is_none());
        assert!(resp.disk.partitions.is_empty());
        assert!(resp.disk.usage.is_empty());
        assert_eq!(resp.net.io_counters.len(), 2);
        assert_eq!(resp.net.io_counters[1].bytes_recv, 0);
        assert_eq!(resp.net.io_counters[1].bytes_sent, 7);
        assert!(resp.host.info.is_none());
        assert_eq!(resp.processes.count, 0);
        assert!(resp.processes.top.is_empty());
    }

    #[test]
    fn non_numeric_core_keeps_its_slot() {
        let resp = decode(json!({ "cpu": { "percent": [10.0, null, 30.0] } }));
        assert_eq!(resp.cpu.percent, vec![10.0, 0.0, 30.0]);
    }

    #[test]
    fn hash_payload_decodes_leniently() {
        let hash = HashResponse::from_json(
            json!({
                "randhash": "9f2c",
                "hashbytes_hex": "0a0b",
                "updatedAt": "2024-06-01T12:00:00Z",
                "warning": 7
            })
            .to_string()
            .as_bytes(),
        )
        .unwrap();
        assert_eq!(hash.randhash, "9f2c");
        assert_eq!(hash.hashbytes_hex, "0a0b");
        assert_eq!(hash.updated_at, Some(Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()));
        assert_eq!(hash.warning, None);

        let partial = HashResponse::from_json(br#"{"randhash": null, "updatedAt": "yesterday"}"#).unwrap();
        assert_eq!(partial, HashResponse::default());
        assert_eq!(HashResponse::from_json(b"[]").unwrap(), HashResponse::default());
    }

    #[test]
    fn non_object_document_is_empty() {
        assert_eq!(AllResponse::from_json(b"[1, 2, 3]").unwrap(), AllResponse::default());
        assert!(AllResponse::from_json(b"{not json").is_err());
    }

    #[test]
    fn snapshot_carries_counters() {
        let resp = decode(json!({
            "cpu": { "percent": [50.0] },
            "net": { "io_counters": [{ "name": "eth0", "bytesRecv": 9, "bytesSent": 4 }] }
        }));
        let at = Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap();
        let snapshot = resp.snapshot(at);

        assert_eq!(snapshot.timestamp, at);
        assert_eq!(snapshot.cpu_percent_per_core, vec![50.0]);
        assert_eq!(snapshot.network_counters, vec![InterfaceCounters::new("eth0", 9, 4)]);
    }
}
