//! Node properties.
//!
//! The remote API stores hardware properties as a free-form map. A handful
//! of keys have well-known meaning; they get typed accessors here, the rest
//! stay available through [`NodeProperties::get`].

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Keys with a fixed meaning in the properties map.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WellKnownProperty {
    /// Root device hints (`{"name": "/dev/sda"}`, `{"wwn": ...}`, ...).
    RootDevice,
    CpuArch,
    Cpus,
    MemoryMb,
    LocalGb,
    /// Comma separated `key:value` pairs.
    Capabilities,
}

impl WellKnownProperty {
    pub fn key(&self) -> &'static str {
        match self {
            WellKnownProperty::RootDevice => "root_device",
            WellKnownProperty::CpuArch => "cpu_arch",
            WellKnownProperty::Cpus => "cpus",
            WellKnownProperty::MemoryMb => "memory_mb",
            WellKnownProperty::LocalGb => "local_gb",
            WellKnownProperty::Capabilities => "capabilities",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeProperties(Map<String, Value>);

impl NodeProperties {
    pub fn new(map: Map<String, Value>) -> Self {
        Self(map)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn well_known(&self, property: WellKnownProperty) -> Option<&Value> {
        self.0.get(property.key())
    }

    /// Root device hints, if set and shaped as an object.
    pub fn root_device(&self) -> Option<&Map<String, Value>> {
        self.well_known(WellKnownProperty::RootDevice)
            .and_then(Value::as_object)
    }

    pub fn cpu_arch(&self) -> Option<&str> {
        self.well_known(WellKnownProperty::CpuArch)
            .and_then(Value::as_str)
    }

    pub fn cpus(&self) -> Option<u64> {
        self.well_known(WellKnownProperty::Cpus).and_then(as_u64)
    }

    pub fn memory_mb(&self) -> Option<u64> {
        self.well_known(WellKnownProperty::MemoryMb).and_then(as_u64)
    }

    pub fn local_gb(&self) -> Option<u64> {
        self.well_known(WellKnownProperty::LocalGb).and_then(as_u64)
    }

    /// Capabilities as `(key, value)` pairs.
    pub fn capabilities(&self) -> Vec<(String, String)> {
        let Some(raw) = self
            .well_known(WellKnownProperty::Capabilities)
            .and_then(Value::as_str)
        else {
            return Vec::new();
        };

        raw.split(',')
            .filter_map(|pair| {
                let (k, v) = pair.split_once(':')?;
                Some((k.trim().to_string(), v.trim().to_string()))
            })
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

// Numeric properties are frequently stored as strings.
fn as_u64(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}
