//! Window management using winit.
//!
//! [`Window`] wraps the winit window together with the signals the frame
//! loop polls: the current framebuffer size, an edge-triggered resize flag
//! and a close flag. Resize events only record state here; the engine reads
//! and clears the resize flag once per frame instead of being called back.

use std::ffi::c_char;
use std::sync::Arc;

use ash::vk;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle, RawDisplayHandle};
use winit::dpi::PhysicalSize;
use winit::event_loop::ActiveEventLoop;
use winit::window::{Window as WinitWindow, WindowAttributes};

use presto_core::{Error, Result};

/// RAII wrapper for a Vulkan surface.
///
/// The Vulkan instance must outlive this surface.
pub struct Surface {
    handle: vk::SurfaceKHR,
    surface_loader: ash::khr::surface::Instance,
}

impl Surface {
    /// Get the raw Vulkan surface handle.
    #[inline]
    pub fn handle(&self) -> vk::SurfaceKHR {
        self.handle
    }

    /// Get a reference to the surface loader.
    #[inline]
    pub fn loader(&self) -> &ash::khr::surface::Instance {
        &self.surface_loader
    }
}

impl Drop for Surface {
    fn drop(&mut self) {
        // SAFETY: The surface was created by ash_window::create_surface with
        // the instance this loader was built from, and is destroyed only here.
        unsafe {
            self.surface_loader.destroy_surface(self.handle, None);
        }
        tracing::debug!("Vulkan surface destroyed");
    }
}

/// Size and lifecycle flags reported by the window system.
///
/// Kept separate from [`Window`] so the bookkeeping can be exercised without
/// a display.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowSignals {
    width: u32,
    height: u32,
    resized: bool,
    close_requested: bool,
}

impl WindowSignals {
    /// Signals for a window of `width` x `height` with no pending events.
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            resized: false,
            close_requested: false,
        }
    }

    /// Records a new framebuffer size and raises the resize flag.
    pub fn on_resize(&mut self, width: u32, height: u32) {
        self.width = width;
        self.height = height;
        self.resized = true;
    }

    /// Returns the resize flag and clears it.
    pub fn take_resized(&mut self) -> bool {
        std::mem::take(&mut self.resized)
    }

    /// Returns true if a resize is pending.
    #[inline]
    pub fn resize_pending(&self) -> bool {
        self.resized
    }

    /// Marks the window as asked to close.
    pub fn request_close(&mut self) {
        self.close_requested = true;
    }

    /// Returns true once a close has been requested.
    #[inline]
    pub fn close_requested(&self) -> bool {
        self.close_requested
    }

    /// Current framebuffer size in pixels.
    #[inline]
    pub fn extent(&self) -> vk::Extent2D {
        vk::Extent2D {
            width: self.width,
            height: self.height,
        }
    }

    /// Returns true if either dimension is zero, e.g. while minimized.
    #[inline]
    pub fn is_zero_area(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

/// A window plus the signals the frame loop polls.
pub struct Window {
    window: Arc<WinitWindow>,
    signals: WindowSignals,
}

impl Window {
    /// Create a resizable window with the given inner size and title.
    pub fn new(event_loop: &ActiveEventLoop, width: u32, height: u32, title: &str) -> Result<Self> {
        let attrs = WindowAttributes::default()
            .with_title(title)
            .with_inner_size(PhysicalSize::new(width, height))
            .with_resizable(true);

        let window = event_loop
            .create_window(attrs)
            .map_err(|e| Error::Window(e.to_string()))?;

        // The platform may not honour the requested size exactly.
        let size = window.inner_size();
        tracing::info!("Window created: {}x{}", size.width, size.height);

        Ok(Self {
            window: Arc::new(window),
            signals: WindowSignals::new(size.width, size.height),
        })
    }

    /// Get a reference to the underlying winit window.
    pub fn inner(&self) -> &WinitWindow {
        &self.window
    }

    /// Records a resize event.
    pub fn on_resize(&mut self, width: u32, height: u32) {
        self.signals.on_resize(width, height);
        tracing::debug!("Window resized: {}x{}", width, height);
    }

    /// Returns the resize flag and clears it.
    pub fn take_resized(&mut self) -> bool {
        self.signals.take_resized()
    }

    /// Marks the window as asked to close.
    pub fn request_close(&mut self) {
        self.signals.request_close();
    }

    /// Returns true once a close has been requested.
    pub fn close_requested(&self) -> bool {
        self.signals.close_requested()
    }

    /// Current framebuffer size in pixels.
    pub fn framebuffer_extent(&self) -> vk::Extent2D {
        self.signals.extent()
    }

    /// Returns true while the framebuffer has no area.
    pub fn is_zero_area(&self) -> bool {
        self.signals.is_zero_area()
    }

    /// Request a redraw of the window.
    pub fn request_redraw(&self) {
        self.window.request_redraw();
    }

    /// Raw display handle, used to pick the instance surface extensions.
    pub fn raw_display_handle(&self) -> Result<RawDisplayHandle> {
        self.window
            .display_handle()
            .map(|handle| handle.as_raw())
            .map_err(|e| Error::Window(format!("Failed to get display handle: {}", e)))
    }

    /// Create a Vulkan surface for this window.
    ///
    /// `instance` must outlive the returned [`Surface`].
    ///
    /// # Errors
    ///
    /// Returns an error if the window handles are unavailable or surface
    /// creation fails.
    pub fn create_surface(&self, entry: &ash::Entry, instance: &ash::Instance) -> Result<Surface> {
        let display_handle = self
            .window
            .display_handle()
            .map_err(|e| Error::Window(format!("Failed to get display handle: {}", e)))?;

        let window_handle = self
            .window
            .window_handle()
            .map_err(|e| Error::Window(format!("Failed to get window handle: {}", e)))?;

        // SAFETY: The entry and instance are valid, the handles come from a
        // live winit window, and the surface is destroyed in Surface::drop.
        let handle = unsafe {
            ash_window::create_surface(
                entry,
                instance,
                display_handle.as_raw(),
                window_handle.as_raw(),
                None,
            )
            .map_err(|e| Error::Surface(format!("Failed to create Vulkan surface: {}", e)))?
        };

        let surface_loader = ash::khr::surface::Instance::new(entry, instance);

        tracing::info!("Vulkan surface created");

        Ok(Surface {
            handle,
            surface_loader,
        })
    }
}

/// Instance extensions needed to create a surface on `display_handle`.
///
/// The returned pointers reference static strings owned by the loader.
///
/// # Errors
///
/// Returns an error if the platform is not supported.
pub fn get_required_extensions(display_handle: RawDisplayHandle) -> Result<Vec<*const c_char>> {
    let extensions = ash_window::enumerate_required_extensions(display_handle)
        .map_err(|e| Error::Surface(format!("Failed to enumerate required extensions: {}", e)))?;

    tracing::debug!(
        "Required Vulkan extensions for surface: {:?}",
        extensions
            .iter()
            // SAFETY: ash_window returns valid, null-terminated static strings.
            .map(|&ext| unsafe { std::ffi::CStr::from_ptr(ext) })
            .collect::<Vec<_>>()
    );

    Ok(extensions.to_vec())
}
