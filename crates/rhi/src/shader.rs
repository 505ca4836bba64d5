//! Shader module management.
//!
//! This module handles SPIR-V loading and VkShaderModule creation.
//!
//! # Overview
//!
//! - [`ShaderStage`] defines which pipeline stage a module feeds
//! - [`Shader`] wraps VkShaderModule with stage and entry point information
//! - [`parse_spirv`] validates a SPIR-V blob before the driver ever sees it
//!
//! Shader modules are only needed while pipelines are built, but they are
//! cheap to keep, so the renderer holds them for the lifetime of the device and
//! reuses them on every swapchain rebuild.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::path::Path;
//! use presto_rhi::device::Device;
//! use presto_rhi::shader::{Shader, ShaderStage};
//!
//! # fn example(device: Arc<Device>) -> Result<(), presto_rhi::RhiError> {
//! let vertex_shader = Shader::from_spirv_file(
//!     device.clone(),
//!     Path::new("shaders/vert.spv"),
//!     ShaderStage::Vertex,
//!     "main",
//! )?;
//!
//! let _vertex_stage_info = vertex_shader.stage_create_info();
//! # Ok(())
//! # }
//! ```

use std::ffi::CString;
use std::path::Path;
use std::sync::Arc;

use ash::vk;
use tracing::{debug, info};

use crate::device::Device;
use crate::error::{RhiError, RhiResult};

/// First word of every SPIR-V module.
pub const SPIRV_MAGIC: u32 = 0x0723_0203;

/// Shader stage type.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ShaderStage {
    /// Vertex shader stage - processes each vertex
    Vertex,
    /// Fragment (pixel) shader stage - processes each fragment
    Fragment,
}

impl ShaderStage {
    /// Converts the shader stage to Vulkan shader stage flags.
    pub fn to_vk_stage(self) -> vk::ShaderStageFlags {
        match self {
            ShaderStage::Vertex => vk::ShaderStageFlags::VERTEX,
            ShaderStage::Fragment => vk::ShaderStageFlags::FRAGMENT,
        }
    }

    /// Returns a human-readable name for the shader stage.
    pub fn name(self) -> &'static str {
        match self {
            ShaderStage::Vertex => "vertex",
            ShaderStage::Fragment => "fragment",
        }
    }
}

impl std::fmt::Display for ShaderStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Decodes a SPIR-V blob into little-endian code words.
///
/// The blob must be non-empty, a whole number of 32-bit words, and start with
/// [`SPIRV_MAGIC`]. `path` is only used to label errors.
///
/// # Errors
///
/// Returns [`RhiError::ShaderLoad`] describing the first check that failed.
pub fn parse_spirv(path: &Path, bytes: &[u8]) -> RhiResult<Vec<u32>> {
    let fail = |reason: String| RhiError::ShaderLoad {
        path: path.to_path_buf(),
        reason,
    };

    if bytes.is_empty() {
        return Err(fail("file is empty".to_string()));
    }

    if !bytes.len().is_multiple_of(4) {
        return Err(fail(format!(
            "length {} is not a multiple of 4",
            bytes.len()
        )));
    }

    let code: Vec<u32> = bytes
        .chunks_exact(4)
        .map(|chunk| u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect();

    match code.first() {
        Some(&SPIRV_MAGIC) => Ok(code),
        Some(&word) => Err(fail(format!("bad magic number {word:#010x}"))),
        None => Err(fail("file is empty".to_string())),
    }
}

/// Vulkan shader module wrapper.
pub struct Shader {
    /// Reference to the logical device.
    device: Arc<Device>,
    /// Vulkan shader module handle.
    module: vk::ShaderModule,
    /// Shader stage type.
    stage: ShaderStage,
    /// Entry point function name.
    entry_point: CString,
}

impl Shader {
    /// Creates a shader module from a SPIR-V file.
    ///
    /// # Errors
    ///
    /// Returns [`RhiError::ShaderLoad`] if the file is missing or unreadable,
    /// if [`parse_spirv`] rejects it, or if the driver refuses the module.
    pub fn from_spirv_file(
        device: Arc<Device>,
        path: &Path,
        stage: ShaderStage,
        entry_point: &str,
    ) -> RhiResult<Self> {
        debug!("Loading {} shader from {:?}", stage, path);

        let bytes = std::fs::read(path).map_err(|e| RhiError::ShaderLoad {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let code = parse_spirv(path, &bytes)?;

        let entry_point_cstring = CString::new(entry_point).map_err(|e| RhiError::ShaderLoad {
            path: path.to_path_buf(),
            reason: format!("invalid entry point name: {e}"),
        })?;

        let create_info = vk::ShaderModuleCreateInfo::default().code(&code);
        let module = unsafe {
            device
                .handle()
                .create_shader_module(&create_info, None)
                .map_err(|e| RhiError::ShaderLoad {
                    path: path.to_path_buf(),
                    reason: format!("vkCreateShaderModule: {e}"),
                })?
        };

        info!(
            "Created {} shader module ({} words) with entry point '{}'",
            stage,
            code.len(),
            entry_point
        );

        Ok(Self {
            device,
            module,
            stage,
            entry_point: entry_point_cstring,
        })
    }

    /// Returns the Vulkan shader module handle.
    #[inline]
    pub fn handle(&self) -> vk::ShaderModule {
        self.module
    }

    /// Returns the shader stage.
    #[inline]
    pub fn stage(&self) -> ShaderStage {
        self.stage
    }

    /// Creates the stage description used during pipeline creation.
    ///
    /// The returned structure borrows the entry point name from this shader.
    pub fn stage_create_info(&self) -> vk::PipelineShaderStageCreateInfo<'_> {
        vk::PipelineShaderStageCreateInfo::default()
            .stage(self.stage.to_vk_stage())
            .module(self.module)
            .name(&self.entry_point)
    }
}

impl Drop for Shader {
    fn drop(&mut self) {
        unsafe {
            self.device
                .handle()
                .destroy_shader_module(self.module, None);
        }
        debug!("Destroyed {} shader module", self.stage);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn words_to_bytes(words: &[u32]) -> Vec<u8> {
        words.iter().flat_map(|w| w.to_le_bytes()).collect()
    }

    fn reason(err: RhiError) -> String {
        match err {
            RhiError::ShaderLoad { reason, .. } => reason,
            other => panic!("expected ShaderLoad, got {:?}", other),
        }
    }

    #[test]
    fn test_shader_stage_to_vk_stage() {
        assert_eq!(
            ShaderStage::Vertex.to_vk_stage(),
            vk::ShaderStageFlags::VERTEX
        );
        assert_eq!(
            ShaderStage::Fragment.to_vk_stage(),
            vk::ShaderStageFlags::FRAGMENT
        );
    }

    #[test]
    fn test_shader_stage_display() {
        assert_eq!(format!("{}", ShaderStage::Vertex), "vertex");
        assert_eq!(format!("{}", ShaderStage::Fragment), "fragment");
    }

    #[test]
    fn test_parse_valid_spirv() {
        let bytes = words_to_bytes(&[SPIRV_MAGIC, 0x0001_0000, 0, 8, 0]);
        let code = parse_spirv(Path::new("ok.spv"), &bytes).unwrap();
        assert_eq!(code.len(), 5);
        assert_eq!(code[0], SPIRV_MAGIC);
    }

    #[test]
    fn test_parse_empty_spirv() {
        let err = parse_spirv(Path::new("empty.spv"), &[]).unwrap_err();
        assert!(reason(err).contains("empty"));
    }

    #[test]
    fn test_parse_misaligned_spirv() {
        let mut bytes = words_to_bytes(&[SPIRV_MAGIC, 0]);
        bytes.push(0);
        let err = parse_spirv(Path::new("odd.spv"), &bytes).unwrap_err();
        assert!(reason(err).contains("multiple of 4"));
    }

    #[test]
    fn test_parse_bad_magic() {
        let bytes = words_to_bytes(&[0xDEAD_BEEF, 0]);
        let err = parse_spirv(Path::new("bad.spv"), &bytes).unwrap_err();
        assert!(reason(err).contains("magic"));
    }

    #[test]
    fn test_parse_error_carries_path() {
        let err = parse_spirv(Path::new("shaders/frag.spv"), &[1, 2, 3]).unwrap_err();
        match err {
            RhiError::ShaderLoad { path, .. } => assert_eq!(path, Path::new("shaders/frag.spv")),
            other => panic!("expected ShaderLoad, got {:?}", other),
        }
    }
}
