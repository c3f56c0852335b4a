//! Topology model: devices, compute resources, and memory spaces.
//!
//! A topology describes what is *allocable* on an instance. Devices do not
//! own memory on behalf of the user; memory managers draw from the memory
//! spaces a topology reports.
//!
//! The JSON contract keeps the original field names (`"Devices"`,
//! `"Type"`, `"Compute Resources"`, `"Memory Spaces"`, `"Size"`) so
//! descriptions can be exchanged with other instances. Unknown keys are
//! preserved but not interpreted.

use crate::error::{protocol_violation, Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// A single compute resource inside a device (a core, an accelerator
/// queue, and so on). The kind string is opaque to the core.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComputeResource {
    #[serde(rename = "Type")]
    kind: String,
    #[serde(flatten)]
    extra: Map<String, Value>,
}

impl ComputeResource {
    /// Creates a compute resource of the given kind.
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            extra: Map::new(),
        }
    }

    /// The resource kind string.
    #[inline]
    pub fn kind(&self) -> &str {
        &self.kind
    }
}

/// A byte-addressable region with a capacity and usage accounting.
///
/// `usage` tracks outstanding allocations issued against this space and
/// always satisfies `0 <= usage <= size`. It is runtime state: two spaces
/// compare equal regardless of how much of them is currently allocated,
/// and usage is not part of the serialized form.
#[derive(Debug, Serialize, Deserialize)]
pub struct MemorySpace {
    #[serde(rename = "Type")]
    kind: String,
    #[serde(rename = "Size")]
    size: u64,
    #[serde(skip)]
    usage: AtomicU64,
    #[serde(flatten)]
    extra: Map<String, Value>,
}

impl MemorySpace {
    /// Creates a memory space of the given kind and total size in bytes.
    pub fn new(kind: impl Into<String>, size: u64) -> Self {
        Self {
            kind: kind.into(),
            size,
            usage: AtomicU64::new(0),
            extra: Map::new(),
        }
    }

    /// The space kind string.
    #[inline]
    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// Total capacity of the space in bytes.
    #[inline]
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Bytes currently reserved by outstanding allocations.
    #[inline]
    pub fn usage(&self) -> u64 {
        self.usage.load(Ordering::Acquire)
    }

    /// Reserves `bytes` against this space.
    ///
    /// Fails with [`Error::OutOfResource`] when the reservation would push
    /// usage past the space's capacity; usage is unchanged on failure.
    pub fn try_reserve(&self, bytes: u64) -> Result<()> {
        let mut current = self.usage.load(Ordering::Relaxed);
        loop {
            let next = match current.checked_add(bytes) {
                Some(next) if next <= self.size => next,
                _ => {
                    return Err(Error::OutOfResource(format!(
                        "memory space '{}': {} of {} bytes in use, cannot reserve {}",
                        self.kind, current, self.size, bytes
                    )))
                }
            };
            match self
                .usage
                .compare_exchange_weak(current, next, Ordering::AcqRel, Ordering::Relaxed)
            {
                Ok(_) => return Ok(()),
                Err(observed) => current = observed,
            }
        }
    }

    /// Returns a prior reservation of `bytes` to the space.
    pub fn release(&self, bytes: u64) {
        let previous = self.usage.fetch_sub(bytes, Ordering::AcqRel);
        if previous < bytes {
            protocol_violation(&format!(
                "memory space '{}': released {} bytes with only {} in use",
                self.kind, bytes, previous
            ));
        }
    }
}

impl PartialEq for MemorySpace {
    fn eq(&self, other: &Self) -> bool {
        self.kind == other.kind && self.size == other.size && self.extra == other.extra
    }
}

/// A named aggregate of compute resources and memory spaces.
#[derive(Debug, PartialEq, Serialize, Deserialize)]
pub struct Device {
    #[serde(rename = "Type")]
    kind: String,
    #[serde(rename = "Compute Resources")]
    compute_resources: Vec<ComputeResource>,
    #[serde(rename = "Memory Spaces")]
    memory_spaces: Vec<Arc<MemorySpace>>,
    #[serde(flatten)]
    extra: Map<String, Value>,
}

impl Device {
    /// Creates a device of the given kind with its resources and spaces.
    pub fn new(
        kind: impl Into<String>,
        compute_resources: Vec<ComputeResource>,
        memory_spaces: Vec<Arc<MemorySpace>>,
    ) -> Self {
        Self {
            kind: kind.into(),
            compute_resources,
            memory_spaces,
            extra: Map::new(),
        }
    }

    /// The device kind string.
    #[inline]
    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// Compute resources this device exposes.
    #[inline]
    pub fn compute_resources(&self) -> &[ComputeResource] {
        &self.compute_resources
    }

    /// Memory spaces this device exposes.
    #[inline]
    pub fn memory_spaces(&self) -> &[Arc<MemorySpace>] {
        &self.memory_spaces
    }
}

/// A set of devices describing a local instance, or a request for a new
/// one. Supports union-merge and JSON round-trips.
#[derive(Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Topology {
    #[serde(rename = "Devices")]
    devices: Vec<Arc<Device>>,
}

impl Topology {
    /// Creates an empty topology.
    pub fn new() -> Self {
        Self::default()
    }

    /// The devices in this topology.
    #[inline]
    pub fn devices(&self) -> &[Arc<Device>] {
        &self.devices
    }

    /// Adds a device to the topology.
    pub fn add_device(&mut self, device: Arc<Device>) {
        self.devices.push(device);
    }

    /// Merges another topology into this one (device-set union).
    pub fn merge(&mut self, other: Topology) {
        for device in other.devices {
            if !self.devices.iter().any(|d| Arc::ptr_eq(d, &device) || **d == *device) {
                self.devices.push(device);
            }
        }
    }

    /// Serializes the topology to its JSON representation.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self)
            .map_err(|e| Error::InvalidArgument(format!("topology serialization: {e}")))
    }

    /// Reconstructs a topology from its JSON representation.
    pub fn from_json(input: &str) -> Result<Self> {
        serde_json::from_str(input)
            .map_err(|e| Error::InvalidArgument(format!("topology deserialization: {e}")))
    }
}
