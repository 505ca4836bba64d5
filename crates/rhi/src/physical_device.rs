//! Physical device (GPU) selection.
//!
//! # Overview
//!
//! Selection is a viability test, not a ranking. Devices are visited in the
//! order the driver enumerates them and the first one that passes wins:
//!
//! 1. A queue family with `GRAPHICS` and a queue family that can present to
//!    the surface both exist (they may be the same family)
//! 2. Every extension in [`REQUIRED_DEVICE_EXTENSIONS`] is supported
//! 3. The surface reports at least one format and one present mode
//!
//! Device type (discrete, integrated, ...) plays no part in the decision.
//!
//! # Example
//!
//! ```no_run
//! use presto_rhi::instance::Instance;
//! use presto_rhi::physical_device::select_physical_device;
//! use ash::vk;
//!
//! let instance = Instance::new(false, &[]).expect("Failed to create instance");
//! let surface: vk::SurfaceKHR = vk::SurfaceKHR::null(); // placeholder
//! let surface_loader = ash::khr::surface::Instance::new(instance.entry(), instance.handle());
//!
//! let candidate = select_physical_device(instance.handle(), surface, &surface_loader)
//!     .expect("Failed to select physical device");
//! println!("Selected GPU: {}", candidate.device_name());
//! ```

use std::ffi::CStr;

use ash::vk;
use tracing::{debug, info, warn};

use crate::error::{RhiError, RhiResult};
use crate::swapchain::SwapchainSupportDetails;

/// Device extensions every candidate must support.
pub const REQUIRED_DEVICE_EXTENSIONS: &[&CStr] = &[ash::khr::swapchain::NAME];

/// Queue family indices for the two roles the engine needs.
///
/// `None` means the role has not been resolved on this device.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct QueueFamilyIndices {
    /// Index of the queue family that supports graphics operations.
    pub graphics_family: Option<u32>,
    /// Index of the queue family that supports presentation to a surface.
    pub present_family: Option<u32>,
}

impl QueueFamilyIndices {
    /// Returns true once both roles are resolved.
    #[inline]
    pub fn is_complete(&self) -> bool {
        self.graphics_family.is_some() && self.present_family.is_some()
    }

    /// Returns the unique queue family indices, graphics first.
    pub fn unique_families(&self) -> Vec<u32> {
        let mut families = Vec::with_capacity(2);

        if let Some(graphics) = self.graphics_family {
            families.push(graphics);
        }
        if let Some(present) = self.present_family
            && !families.contains(&present)
        {
            families.push(present);
        }

        families
    }

    /// Returns both family indices when images must be shared concurrently
    /// between distinct graphics and present families.
    pub fn concurrent_families(&self) -> Option<[u32; 2]> {
        match (self.graphics_family, self.present_family) {
            (Some(graphics), Some(present)) if graphics != present => Some([graphics, present]),
            _ => None,
        }
    }
}

/// Everything learned about a physical device while judging it.
#[derive(Clone)]
pub struct PhysicalDeviceCandidate {
    /// Vulkan physical device handle.
    pub device: vk::PhysicalDevice,
    /// Device properties (name, limits, API version, etc.).
    pub properties: vk::PhysicalDeviceProperties,
    /// Memory properties, used for memory type selection.
    pub memory_properties: vk::PhysicalDeviceMemoryProperties,
    /// Resolved queue roles.
    pub queue_families: QueueFamilyIndices,
    /// Surface capabilities, formats and present modes at selection time.
    pub swapchain_support: SwapchainSupportDetails,
}

impl PhysicalDeviceCandidate {
    /// Returns the device name as a string.
    pub fn device_name(&self) -> &str {
        self.properties
            .device_name_as_c_str()
            .ok()
            .and_then(|name| name.to_str().ok())
            .unwrap_or("Unknown Device")
    }

    /// Returns a human-readable string for the device type.
    pub fn device_type_name(&self) -> &'static str {
        device_type_name(self.properties.device_type)
    }

    /// Returns the Vulkan API version supported by the device.
    pub fn api_version(&self) -> (u32, u32, u32) {
        let version = self.properties.api_version;
        (
            vk::api_version_major(version),
            vk::api_version_minor(version),
            vk::api_version_patch(version),
        )
    }
}

impl std::fmt::Debug for PhysicalDeviceCandidate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let (major, minor, patch) = self.api_version();
        f.debug_struct("PhysicalDeviceCandidate")
            .field("name", &self.device_name())
            .field("type", &self.device_type_name())
            .field("api_version", &format!("{}.{}.{}", major, minor, patch))
            .field("queue_families", &self.queue_families)
            .finish()
    }
}

/// Selects the first viable physical device in enumeration order.
///
/// # Arguments
///
/// * `instance` - The Vulkan instance
/// * `surface` - The window surface for present support checking
/// * `surface_loader` - The surface extension loader
///
/// # Errors
///
/// Returns [`RhiError::NoCapableDevice`] if enumeration yields no devices or
/// none of them is viable. A device whose capability queries fail counts as
/// not viable. Only a failed enumeration propagates as a Vulkan error.
pub fn select_physical_device(
    instance: &ash::Instance,
    surface: vk::SurfaceKHR,
    surface_loader: &ash::khr::surface::Instance,
) -> RhiResult<PhysicalDeviceCandidate> {
    let devices = unsafe { instance.enumerate_physical_devices()? };

    if devices.is_empty() {
        warn!("No Vulkan-capable GPUs found");
        return Err(RhiError::NoCapableDevice);
    }

    info!("Found {} GPU(s)", devices.len());

    let candidate = first_viable(devices, |device| {
        evaluate_device(instance, device, surface, surface_loader)
    })?;

    let (major, minor, patch) = candidate.api_version();
    info!(
        "Selected GPU: '{}' ({}) - Vulkan {}.{}.{}",
        candidate.device_name(),
        candidate.device_type_name(),
        major,
        minor,
        patch
    );
    Ok(candidate)
}

/// Returns the first device `evaluate` accepts, in iteration order.
///
/// A device whose evaluation fails is logged and skipped, so one device with
/// a broken driver query cannot hide a viable device listed after it.
///
/// # Errors
///
/// Returns [`RhiError::NoCapableDevice`] if no device is accepted.
pub fn first_viable<D, C>(
    devices: impl IntoIterator<Item = D>,
    mut evaluate: impl FnMut(D) -> RhiResult<Option<C>>,
) -> RhiResult<C> {
    for (index, device) in devices.into_iter().enumerate() {
        match evaluate(device) {
            Ok(Some(candidate)) => return Ok(candidate),
            Ok(None) => {}
            Err(e) => warn!("GPU {} skipped: capability query failed: {}", index, e),
        }
    }

    warn!("No GPU satisfies the queue, extension and surface requirements");
    Err(RhiError::NoCapableDevice)
}

/// Returns `Some` if the device is viable for presenting to `surface`.
fn evaluate_device(
    instance: &ash::Instance,
    device: vk::PhysicalDevice,
    surface: vk::SurfaceKHR,
    surface_loader: &ash::khr::surface::Instance,
) -> RhiResult<Option<PhysicalDeviceCandidate>> {
    let properties = unsafe { instance.get_physical_device_properties(device) };
    let device_name = properties
        .device_name_as_c_str()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|_| "Unknown".to_string());

    debug!(
        "Evaluating device '{}': type {}, API {}, driver {}",
        device_name,
        device_type_name(properties.device_type),
        properties.api_version,
        properties.driver_version
    );

    let family_properties = unsafe { instance.get_physical_device_queue_family_properties(device) };
    let queue_families = find_queue_families(&family_properties, |index| unsafe {
        surface_loader
            .get_physical_device_surface_support(device, index, surface)
            .unwrap_or(false)
    });

    if !queue_families.is_complete() {
        debug!(
            "GPU '{}' skipped: missing queue roles (graphics={}, present={})",
            device_name,
            queue_families.graphics_family.is_some(),
            queue_families.present_family.is_some()
        );
        return Ok(None);
    }

    let extensions = unsafe { instance.enumerate_device_extension_properties(device)? };
    if !supports_required_extensions(&extensions) {
        debug!("GPU '{}' skipped: VK_KHR_swapchain not supported", device_name);
        return Ok(None);
    }

    let swapchain_support = SwapchainSupportDetails::query(device, surface, surface_loader)?;
    if !swapchain_support.is_adequate() {
        debug!("GPU '{}' skipped: no surface formats or present modes", device_name);
        return Ok(None);
    }

    let memory_properties = unsafe { instance.get_physical_device_memory_properties(device) };

    Ok(Some(PhysicalDeviceCandidate {
        device,
        properties,
        memory_properties,
        queue_families,
        swapchain_support,
    }))
}

/// Resolves queue roles from a device's queue family list.
///
/// The graphics role goes to the first family with `GRAPHICS` and at least one
/// queue; the present role goes to the first family for which
/// `supports_present` answers true.
pub fn find_queue_families(
    families: &[vk::QueueFamilyProperties],
    mut supports_present: impl FnMut(u32) -> bool,
) -> QueueFamilyIndices {
    let mut indices = QueueFamilyIndices::default();

    for (i, family) in families.iter().enumerate() {
        let i = i as u32;
        if family.queue_count == 0 {
            continue;
        }

        if indices.graphics_family.is_none()
            && family.queue_flags.contains(vk::QueueFlags::GRAPHICS)
        {
            indices.graphics_family = Some(i);
        }

        if indices.present_family.is_none() && supports_present(i) {
            indices.present_family = Some(i);
        }

        if indices.is_complete() {
            break;
        }
    }

    indices
}

/// Returns true if every required device extension appears in `available`.
pub fn supports_required_extensions(available: &[vk::ExtensionProperties]) -> bool {
    REQUIRED_DEVICE_EXTENSIONS.iter().all(|required| {
        available
            .iter()
            .any(|ext| ext.extension_name_as_c_str().is_ok_and(|name| name == *required))
    })
}

fn device_type_name(device_type: vk::PhysicalDeviceType) -> &'static str {
    match device_type {
        vk::PhysicalDeviceType::DISCRETE_GPU => "Discrete GPU",
        vk::PhysicalDeviceType::INTEGRATED_GPU => "Integrated GPU",
        vk::PhysicalDeviceType::VIRTUAL_GPU => "Virtual GPU",
        vk::PhysicalDeviceType::CPU => "CPU",
        _ => "Other",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn family(flags: vk::QueueFlags, count: u32) -> vk::QueueFamilyProperties {
        vk::QueueFamilyProperties {
            queue_flags: flags,
            queue_count: count,
            ..Default::default()
        }
    }

    fn extension(name: &CStr) -> vk::ExtensionProperties {
        let mut props = vk::ExtensionProperties::default();
        for (dst, src) in props.extension_name.iter_mut().zip(name.to_bytes()) {
            *dst = *src as std::ffi::c_char;
        }
        props
    }

    #[test]
    fn test_queue_family_indices_default() {
        let indices = QueueFamilyIndices::default();
        assert!(indices.graphics_family.is_none());
        assert!(indices.present_family.is_none());
        assert!(!indices.is_complete());
    }

    #[test]
    fn test_queue_family_indices_incomplete() {
        let graphics_only = QueueFamilyIndices {
            graphics_family: Some(0),
            present_family: None,
        };
        assert!(!graphics_only.is_complete());

        let present_only = QueueFamilyIndices {
            graphics_family: None,
            present_family: Some(0),
        };
        assert!(!present_only.is_complete());
    }

    #[test]
    fn test_unique_families() {
        let shared = QueueFamilyIndices {
            graphics_family: Some(0),
            present_family: Some(0),
        };
        assert_eq!(shared.unique_families(), vec![0]);
        assert_eq!(shared.concurrent_families(), None);

        let split = QueueFamilyIndices {
            graphics_family: Some(0),
            present_family: Some(2),
        };
        assert_eq!(split.unique_families(), vec![0, 2]);
        assert_eq!(split.concurrent_families(), Some([0, 2]));
    }

    #[test]
    fn test_find_queue_families_same_family() {
        let families = [family(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE, 1)];
        let indices = find_queue_families(&families, |_| true);
        assert_eq!(indices.graphics_family, Some(0));
        assert_eq!(indices.present_family, Some(0));
    }

    #[test]
    fn test_find_queue_families_split_roles() {
        let families = [
            family(vk::QueueFlags::TRANSFER, 1),
            family(vk::QueueFlags::GRAPHICS, 1),
            family(vk::QueueFlags::COMPUTE, 1),
        ];
        let indices = find_queue_families(&families, |i| i == 2);
        assert_eq!(indices.graphics_family, Some(1));
        assert_eq!(indices.present_family, Some(2));
    }

    #[test]
    fn test_find_queue_families_skips_empty_families() {
        let families = [
            family(vk::QueueFlags::GRAPHICS, 0),
            family(vk::QueueFlags::GRAPHICS, 1),
        ];
        let indices = find_queue_families(&families, |_| true);
        assert_eq!(indices.graphics_family, Some(1));
        assert_eq!(indices.present_family, Some(1));
    }

    #[test]
    fn test_find_queue_families_no_present() {
        let families = [family(vk::QueueFlags::GRAPHICS, 4)];
        let indices = find_queue_families(&families, |_| false);
        assert!(!indices.is_complete());
    }

    #[test]
    fn test_required_extensions() {
        assert!(supports_required_extensions(&[
            extension(c"VK_KHR_maintenance1"),
            extension(ash::khr::swapchain::NAME),
        ]));
        assert!(!supports_required_extensions(&[extension(c"VK_KHR_maintenance1")]));
        assert!(!supports_required_extensions(&[]));
    }

    #[test]
    fn test_first_viable_takes_enumeration_order() {
        let picked = first_viable([1, 2, 3], |d| Ok((d >= 2).then_some(d))).unwrap();
        assert_eq!(picked, 2);
    }

    #[test]
    fn test_first_viable_skips_failed_query() {
        let picked = first_viable([1, 2], |d| {
            if d == 1 {
                Err(RhiError::Vulkan(vk::Result::ERROR_SURFACE_LOST_KHR))
            } else {
                Ok(Some(d))
            }
        })
        .unwrap();
        assert_eq!(picked, 2);
    }

    #[test]
    fn test_first_viable_none_viable() {
        let err = first_viable([1, 2], |d| {
            if d == 1 {
                Err(RhiError::Vulkan(vk::Result::ERROR_INITIALIZATION_FAILED))
            } else {
                Ok(None::<i32>)
            }
        })
        .unwrap_err();
        assert!(matches!(err, RhiError::NoCapableDevice));

        let empty: [i32; 0] = [];
        assert!(matches!(
            first_viable(empty, |d| Ok(Some(d))),
            Err(RhiError::NoCapableDevice)
        ));
    }
}
