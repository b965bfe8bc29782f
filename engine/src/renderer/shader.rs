use ash::vk;
use std::io::Cursor;
use std::path::Path;
use std::sync::Arc;

use super::error::{RendererError, RendererResult};
use super::handles::ShaderModule;

pub const SPIRV_MAGIC: u32 = 0x0723_0203;

/// Reads a compiled SPIR-V module from disk.
pub fn load_spirv(path: impl AsRef<Path>) -> RendererResult<Vec<u32>> {
    let path = path.as_ref();
    let bytes = std::fs::read(path).map_err(|err| {
        RendererError::ShaderModule(format!("failed to read {}: {err}", path.display()))
    })?;
    spirv_words(&bytes)
}

/// Reinterprets raw SPIR-V bytes as words, rejecting anything without a SPIR-V header.
pub fn spirv_words(bytes: &[u8]) -> RendererResult<Vec<u32>> {
    let words = ash::util::read_spv(&mut Cursor::new(bytes))
        .map_err(|err| RendererError::ShaderModule(format!("invalid SPIR-V: {err}")))?;
    check_spirv(&words)?;
    Ok(words)
}

pub fn check_spirv(words: &[u32]) -> RendererResult<()> {
    match words.first() {
        Some(&SPIRV_MAGIC) => Ok(()),
        Some(other) => Err(RendererError::ShaderModule(format!(
            "bad SPIR-V magic number {other:#010x}"
        ))),
        None => Err(RendererError::ShaderModule("empty SPIR-V module".to_owned())),
    }
}

pub fn create_shader_module(device: &Arc<ash::Device>, code: &[u32]) -> RendererResult<ShaderModule> {
    check_spirv(code)?;

    let create_info = vk::ShaderModuleCreateInfo::default().code(code);
    let module = unsafe {
        device
            .create_shader_module(&create_info, None)
            .map_err(|err| RendererError::ShaderModule(format!("vkCreateShaderModule: {err}")))?
    };
    Ok(ShaderModule::from_raw(device, module))
}
