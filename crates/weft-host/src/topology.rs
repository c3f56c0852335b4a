//! Host topology discovery.

use std::sync::Arc;
use std::thread;
use weft::{ComputeResource, Device, MemorySpace, Topology};

/// Fallback RAM size reported when the platform query is unavailable.
const DEFAULT_RAM_BYTES: u64 = 1 << 30;

/// Queries the local host: one device exposing a compute resource per
/// available core and a single RAM memory space.
pub fn host_topology() -> Topology {
    let cores = thread::available_parallelism().map_or(1, usize::from);
    let compute = (0..cores).map(|_| ComputeResource::new("core")).collect();

    let ram = Arc::new(MemorySpace::new("host RAM", physical_memory_bytes()));
    let device = Arc::new(Device::new("host", compute, vec![ram]));

    let mut topology = Topology::new();
    topology.add_device(device);
    topology
}

#[cfg(unix)]
fn physical_memory_bytes() -> u64 {
    // Safety: sysconf takes no pointers and only returns a value.
    let pages = unsafe { libc::sysconf(libc::_SC_PHYS_PAGES) };
    let page_size = unsafe { libc::sysconf(libc::_SC_PAGE_SIZE) };
    if pages <= 0 || page_size <= 0 {
        return DEFAULT_RAM_BYTES;
    }
    (pages as u64).saturating_mul(page_size as u64)
}

#[cfg(not(unix))]
fn physical_memory_bytes() -> u64 {
    DEFAULT_RAM_BYTES
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reports_one_host_device() {
        let topology = host_topology();
        assert_eq!(topology.devices().len(), 1);

        let device = &topology.devices()[0];
        assert_eq!(device.kind(), "host");
        assert!(!device.compute_resources().is_empty());

        let spaces = device.memory_spaces();
        assert_eq!(spaces.len(), 1);
        assert_eq!(spaces[0].kind(), "host RAM");
        assert!(spaces[0].size() > 0);
        assert_eq!(spaces[0].usage(), 0);
    }
}
