//! Memory type selection.
//!
//! gpu-allocator owns the actual sub-allocation, but every resource first
//! checks that the device exposes a memory type compatible with both the
//! resource's type filter and the properties its [`MemoryKind`] demands. A
//! miss is reported as [`RhiError::UnsupportedMemoryType`] before anything is
//! allocated.

use ash::vk;
use gpu_allocator::MemoryLocation;

use crate::error::{RhiError, RhiResult};

/// What a resource's backing memory is used for.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MemoryKind {
    /// Short-lived upload source, written once by the host.
    Staging,
    /// Host-written every frame and read by the GPU (uniform buffers).
    HostVisible,
    /// GPU-only final storage, filled through a staging copy.
    DeviceLocal,
}

impl MemoryKind {
    /// Properties a memory type must carry to back this kind.
    pub fn required_properties(self) -> vk::MemoryPropertyFlags {
        match self {
            MemoryKind::Staging | MemoryKind::HostVisible => {
                vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT
            }
            MemoryKind::DeviceLocal => vk::MemoryPropertyFlags::DEVICE_LOCAL,
        }
    }

    /// The gpu-allocator location used for the allocation.
    pub fn location(self) -> MemoryLocation {
        match self {
            MemoryKind::Staging | MemoryKind::HostVisible => MemoryLocation::CpuToGpu,
            MemoryKind::DeviceLocal => MemoryLocation::GpuOnly,
        }
    }

    /// Whether the host can write this memory through a mapped pointer.
    pub fn is_host_visible(self) -> bool {
        !matches!(self, MemoryKind::DeviceLocal)
    }

    /// Returns a human-readable name.
    pub fn name(self) -> &'static str {
        match self {
            MemoryKind::Staging => "staging",
            MemoryKind::HostVisible => "host-visible",
            MemoryKind::DeviceLocal => "device-local",
        }
    }
}

/// Returns the first memory type whose bit is set in `type_filter` and whose
/// property flags are a superset of `required`.
pub fn find_memory_type(
    properties: &vk::PhysicalDeviceMemoryProperties,
    type_filter: u32,
    required: vk::MemoryPropertyFlags,
) -> Option<u32> {
    let count = properties.memory_type_count.min(vk::MAX_MEMORY_TYPES as u32);
    (0..count).find(|&i| {
        type_filter & (1 << i) != 0
            && properties.memory_types[i as usize]
                .property_flags
                .contains(required)
    })
}

/// Like [`find_memory_type`], but reports a miss as an error.
///
/// # Errors
///
/// Returns [`RhiError::UnsupportedMemoryType`] if no memory type matches.
pub fn require_memory_type(
    properties: &vk::PhysicalDeviceMemoryProperties,
    type_filter: u32,
    kind: MemoryKind,
) -> RhiResult<u32> {
    let required = kind.required_properties();
    find_memory_type(properties, type_filter, required).ok_or(
        RhiError::UnsupportedMemoryType {
            type_filter,
            required,
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory_properties(types: &[vk::MemoryPropertyFlags]) -> vk::PhysicalDeviceMemoryProperties {
        let mut properties = vk::PhysicalDeviceMemoryProperties {
            memory_type_count: types.len() as u32,
            ..Default::default()
        };
        for (i, &flags) in types.iter().enumerate() {
            properties.memory_types[i] = vk::MemoryType {
                property_flags: flags,
                heap_index: 0,
            };
        }
        properties
    }

    fn typical_discrete() -> vk::PhysicalDeviceMemoryProperties {
        memory_properties(&[
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
            vk::MemoryPropertyFlags::HOST_VISIBLE
                | vk::MemoryPropertyFlags::HOST_COHERENT
                | vk::MemoryPropertyFlags::HOST_CACHED,
        ])
    }

    #[test]
    fn test_find_first_matching_type() {
        let properties = typical_discrete();
        assert_eq!(
            find_memory_type(&properties, 0b111, vk::MemoryPropertyFlags::DEVICE_LOCAL),
            Some(0)
        );
        assert_eq!(
            find_memory_type(
                &properties,
                0b111,
                MemoryKind::Staging.required_properties()
            ),
            Some(1)
        );
    }

    #[test]
    fn test_filter_excludes_types() {
        let properties = typical_discrete();
        // Type 1 masked out, so the cached host type is next.
        assert_eq!(
            find_memory_type(
                &properties,
                0b101,
                MemoryKind::HostVisible.required_properties()
            ),
            Some(2)
        );
    }

    #[test]
    fn test_superset_of_properties_matches() {
        let properties = memory_properties(&[
            vk::MemoryPropertyFlags::DEVICE_LOCAL | vk::MemoryPropertyFlags::HOST_VISIBLE,
        ]);
        assert_eq!(
            find_memory_type(&properties, 0b1, vk::MemoryPropertyFlags::DEVICE_LOCAL),
            Some(0)
        );
    }

    #[test]
    fn test_no_match_is_unsupported_memory_type() {
        let properties = memory_properties(&[vk::MemoryPropertyFlags::DEVICE_LOCAL]);
        let err = require_memory_type(&properties, 0b1, MemoryKind::Staging).unwrap_err();
        assert!(err.is_resource_allocation());
        match err {
            RhiError::UnsupportedMemoryType {
                type_filter,
                required,
            } => {
                assert_eq!(type_filter, 0b1);
                assert!(required.contains(vk::MemoryPropertyFlags::HOST_VISIBLE));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_empty_filter_never_matches() {
        let properties = typical_discrete();
        assert_eq!(
            find_memory_type(&properties, 0, vk::MemoryPropertyFlags::empty()),
            None
        );
    }

    #[test]
    fn test_memory_kind_locations() {
        assert_eq!(MemoryKind::Staging.location(), MemoryLocation::CpuToGpu);
        assert_eq!(MemoryKind::HostVisible.location(), MemoryLocation::CpuToGpu);
        assert_eq!(MemoryKind::DeviceLocal.location(), MemoryLocation::GpuOnly);
        assert!(MemoryKind::Staging.is_host_visible());
        assert!(!MemoryKind::DeviceLocal.is_host_visible());
    }
}
