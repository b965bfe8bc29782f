//! GLSL → SPIR-V for the triangle pipeline.

use anyhow::{anyhow, Context, Result};
use std::path::{Path, PathBuf};

use strum::IntoEnumIterator;
use strum_macros::{Display, EnumIter};

use triframe::config::RendererConfig;
use triframe::renderer::{load_spirv, ShaderCode};

#[derive(EnumIter, Display, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShaderId {
    Vertex,
    Fragment,
}

impl ShaderId {
    fn stage(self) -> naga::ShaderStage {
        match self {
            ShaderId::Vertex => naga::ShaderStage::Vertex,
            ShaderId::Fragment => naga::ShaderStage::Fragment,
        }
    }

    /// The configured source path for this stage.
    pub fn path(self, config: &RendererConfig) -> &Path {
        match self {
            ShaderId::Vertex => &config.vertex_shader,
            ShaderId::Fragment => &config.fragment_shader,
        }
    }
}

/// Relative paths are tried against the working directory, then against this crate.
fn resolve(path: &Path) -> PathBuf {
    if path.is_absolute() || path.exists() {
        return path.to_path_buf();
    }
    let bundled = Path::new(env!("CARGO_MANIFEST_DIR")).join(path);
    if bundled.exists() {
        bundled
    } else {
        path.to_path_buf()
    }
}

pub fn compile_glsl(source: &str, shader_id: ShaderId) -> Result<Vec<u32>> {
    let mut frontend = naga::front::glsl::Frontend::default();
    let options = naga::front::glsl::Options::from(shader_id.stage());
    let module = frontend
        .parse(&options, source)
        .map_err(|err| anyhow!("{shader_id} shader failed to parse: {err:?}"))?;

    let info = naga::valid::Validator::new(
        naga::valid::ValidationFlags::all(),
        naga::valid::Capabilities::all(),
    )
    .validate(&module)
    .map_err(|err| anyhow!("{shader_id} shader failed validation: {err:?}"))?;

    // The sources already use Vulkan clip space.
    let mut spv_options = naga::back::spv::Options::default();
    spv_options
        .flags
        .remove(naga::back::spv::WriterFlags::ADJUST_COORDINATE_SPACE);

    naga::back::spv::write_vec(&module, &info, &spv_options, None)
        .with_context(|| format!("{shader_id} shader failed to emit SPIR-V"))
}

/// Loads one stage: `.spv` files as they are, anything else compiled as GLSL.
pub fn load(shader_id: ShaderId, config: &RendererConfig) -> Result<Vec<u32>> {
    let path = resolve(shader_id.path(config));

    let code = if path.extension().is_some_and(|ext| ext == "spv") {
        load_spirv(&path)?
    } else {
        let source = std::fs::read_to_string(&path)
            .with_context(|| format!("reading {shader_id} shader {}", path.display()))?;
        compile_glsl(&source, shader_id)?
    };

    log::info!(
        "Loaded {shader_id} shader {} ({} words)",
        path.display(),
        code.len()
    );
    Ok(code)
}

pub fn load_all(config: &RendererConfig) -> Result<ShaderCode> {
    let mut code = ShaderCode {
        vertex: Vec::new(),
        fragment: Vec::new(),
    };
    for shader_id in ShaderId::iter() {
        let words = load(shader_id, config)?;
        match shader_id {
            ShaderId::Vertex => code.vertex = words,
            ShaderId::Fragment => code.fragment = words,
        }
    }
    Ok(code)
}
