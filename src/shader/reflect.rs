//! WGSL Interface Reflection
//!
//! Programs address uniforms by *name* (`view`, `qrk_pointLights[2].position`,
//! `material.diffuseCount`), so backends need to know where each name lives in
//! the uniform block. The module is parsed with naga's WGSL front end; member
//! offsets and array strides come from naga and the block size from its
//! [`Layouter`](naga::proc::Layouter).
//!
//! Conventions a program follows:
//!
//! - All plain uniforms live in one struct bound at `@group(0) @binding(0)
//!   var<uniform>`. Field names are addressed relative to that struct.
//! - Textures are module-scope globals in `@group(1)`. A texture `NAME` is
//!   sampled through the sampler `NAME_sampler`.
//! - Texture uniform names use the GL spelling (`material.diffuse[0]`) and map
//!   to WGSL identifiers through [`texture_identifier`] (`material_diffuse_0`).
//! - Compute programs write through `texture_storage_2d` globals, also in
//!   `@group(1)`.

use naga::proc::Layouter;
use naga::{AddressSpace, Binding, Handle, ImageClass, ImageDimension, Module, Type, TypeInner};
use rustc_hash::FxHashMap;

use crate::resources::texture::TextureFormat;

/// Bind group holding the uniform block.
pub const UNIFORM_GROUP: u32 = 0;
/// Bind group holding textures and samplers.
pub const TEXTURE_GROUP: u32 = 1;
/// Suffix naming the sampler paired with a texture.
pub const SAMPLER_SUFFIX: &str = "_sampler";

/// Maps a GL-style texture uniform name to the WGSL global identifier.
///
/// `material.diffuse[0]` becomes `material_diffuse_0`.
#[must_use]
pub fn texture_identifier(name: &str) -> String {
    name.chars()
        .filter_map(|c| match c {
            '.' | '[' => Some('_'),
            ']' => None,
            c => Some(c),
        })
        .collect()
}

// ============================================================================
// Reflected interface
// ============================================================================

/// Scalar component type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScalarKind {
    F32,
    I32,
    U32,
}

/// Type of a leaf uniform field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UniformType {
    Scalar(ScalarKind),
    Vector(u8, ScalarKind),
    /// `columns × rows` float matrix.
    Matrix(u8, u8),
}

/// One addressable uniform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UniformField {
    pub offset: u32,
    pub ty: UniformType,
}

/// Layout of the program's uniform block.
#[derive(Debug, Clone, Default)]
pub struct UniformBlockLayout {
    pub size: u32,
    pub fields: FxHashMap<String, UniformField>,
}

/// Texture view dimension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextureShape {
    D2,
    Cube,
}

/// How a texture is sampled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextureSampleKind {
    Float,
    Depth,
}

/// A texture global and its paired sampler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextureBinding {
    pub name: String,
    pub binding: u32,
    pub shape: TextureShape,
    pub sample: TextureSampleKind,
    pub multisampled: bool,
    pub sampler_binding: Option<u32>,
    pub comparison: bool,
}

/// A `texture_storage_2d` global written by a compute program.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageTextureBinding {
    pub name: String,
    pub binding: u32,
    pub format: TextureFormat,
    /// Declared `read_write` rather than `write`.
    pub read_write: bool,
}

/// Everything backends need to know about a program's interface.
#[derive(Debug, Clone, Default)]
pub struct ProgramReflection {
    pub uniforms: Option<UniformBlockLayout>,
    pub textures: Vec<TextureBinding>,
    pub storage_textures: Vec<StorageTextureBinding>,
    /// Names of the module's entry points, in declaration order.
    pub entry_points: Vec<String>,
    /// `@location`s consumed by `vs_main`.
    pub vertex_inputs: Vec<u32>,
    /// `@location`s written by `fs_main`.
    pub fragment_outputs: Vec<u32>,
    /// `@workgroup_size` of `cs_main`.
    pub workgroup_size: Option<[u32; 3]>,
}

impl ProgramReflection {
    #[must_use]
    pub fn has_entry_point(&self, name: &str) -> bool {
        self.entry_points.iter().any(|e| e == name)
    }

    #[must_use]
    pub fn uniform(&self, name: &str) -> Option<UniformField> {
        self.uniforms.as_ref()?.fields.get(name).copied()
    }

    /// The texture a GL-style sampler uniform name refers to.
    #[must_use]
    pub fn texture(&self, name: &str) -> Option<&TextureBinding> {
        let ident = texture_identifier(name);
        self.textures.iter().find(|t| t.name == ident)
    }
}

/// Parses `source` and returns its interface, or a diagnostic.
pub fn reflect(source: &str) -> Result<ProgramReflection, String> {
    let module = naga::front::wgsl::parse_str(source).map_err(|e| e.emit_to_string(source))?;
    let mut layouter = Layouter::default();
    layouter
        .update(module.to_ctx())
        .map_err(|e| format!("type layout failed: {e}"))?;
    Interface {
        module: &module,
        layouter: &layouter,
    }
    .reflect()
}

// ============================================================================
// Module walk
// ============================================================================

struct Interface<'a> {
    module: &'a Module,
    layouter: &'a Layouter,
}

fn round_up(align: u32, value: u32) -> u32 {
    value.div_ceil(align) * align
}

fn scalar_kind(scalar: naga::Scalar) -> Result<ScalarKind, String> {
    match (scalar.kind, scalar.width) {
        (naga::ScalarKind::Float, 4) => Ok(ScalarKind::F32),
        (naga::ScalarKind::Sint, 4) => Ok(ScalarKind::I32),
        (naga::ScalarKind::Uint, 4) => Ok(ScalarKind::U32),
        (naga::ScalarKind::Bool, _) => Err("bool is not host-shareable; use u32".to_string()),
        _ => Err(format!("unsupported scalar type {scalar:?}")),
    }
}

fn storage_format(format: naga::StorageFormat) -> Result<TextureFormat, String> {
    match format {
        naga::StorageFormat::Rgba8Unorm => Ok(TextureFormat::Rgba8),
        naga::StorageFormat::Rgba16Float => Ok(TextureFormat::Rgba16F),
        other => Err(format!("unsupported storage texture format {other:?}")),
    }
}

impl Interface<'_> {
    fn ty(&self, handle: Handle<Type>) -> &TypeInner {
        &self.module.types[handle].inner
    }

    fn leaf(&self, handle: Handle<Type>) -> Result<Option<UniformType>, String> {
        Ok(match *self.ty(handle) {
            TypeInner::Scalar(scalar) => Some(UniformType::Scalar(scalar_kind(scalar)?)),
            TypeInner::Vector { size, scalar } => {
                Some(UniformType::Vector(size as u8, scalar_kind(scalar)?))
            }
            TypeInner::Matrix {
                columns,
                rows,
                scalar,
            } => {
                if scalar_kind(scalar)? != ScalarKind::F32 {
                    return Err(format!("unsupported matrix element {scalar:?}"));
                }
                Some(UniformType::Matrix(columns as u8, rows as u8))
            }
            _ => None,
        })
    }

    fn flatten(
        &self,
        prefix: &str,
        handle: Handle<Type>,
        offset: u32,
        fields: &mut FxHashMap<String, UniformField>,
    ) -> Result<(), String> {
        if let Some(leaf) = self.leaf(handle)? {
            fields.insert(prefix.to_string(), UniformField { offset, ty: leaf });
            return Ok(());
        }
        match self.ty(handle) {
            TypeInner::Array { base, size, stride } => {
                let length = match size {
                    naga::ArraySize::Constant(length) => length.get(),
                    naga::ArraySize::Pending(_) => {
                        return Err(format!("'{prefix}' has an override-sized length"));
                    }
                    naga::ArraySize::Dynamic => {
                        return Err(format!("runtime-sized array '{prefix}' in a uniform block"));
                    }
                };
                if let Some(leaf) = self.leaf(*base)? {
                    fields.insert(prefix.to_string(), UniformField { offset, ty: leaf });
                }
                for i in 0..length {
                    self.flatten(&format!("{prefix}[{i}]"), *base, offset + i * stride, fields)?;
                }
            }
            TypeInner::Struct { members, .. } => {
                for member in members {
                    let name = member.name.as_deref().unwrap_or_default();
                    let path = if prefix.is_empty() {
                        name.to_string()
                    } else {
                        format!("{prefix}.{name}")
                    };
                    self.flatten(&path, member.ty, offset + member.offset, fields)?;
                }
            }
            other => return Err(format!("unsupported uniform type {other:?} for '{prefix}'")),
        }
        Ok(())
    }

    /// `@location`s of an entry-point argument or result.
    fn locations(&self, binding: Option<&Binding>, ty: Handle<Type>) -> Vec<u32> {
        match binding {
            Some(Binding::Location { location, .. }) => vec![*location],
            Some(Binding::BuiltIn(_)) => Vec::new(),
            None => match self.ty(ty) {
                TypeInner::Struct { members, .. } => members
                    .iter()
                    .filter_map(|m| match m.binding {
                        Some(Binding::Location { location, .. }) => Some(location),
                        _ => None,
                    })
                    .collect(),
                _ => Vec::new(),
            },
        }
    }

    fn reflect(&self) -> Result<ProgramReflection, String> {
        let mut reflection = ProgramReflection::default();
        let globals = &self.module.global_variables;
        let binding_of = |var: &naga::GlobalVariable| var.binding.as_ref().map(|b| (b.group, b.binding));

        for (_, var) in globals.iter() {
            let name = var.name.as_deref().unwrap_or_default();
            match var.space {
                AddressSpace::Uniform => {
                    if binding_of(var) != Some((UNIFORM_GROUP, 0)) {
                        return Err(format!(
                            "uniform block '{name}' must be bound at @group({UNIFORM_GROUP}) @binding(0)"
                        ));
                    }
                    let mut fields = FxHashMap::default();
                    self.flatten("", var.ty, 0, &mut fields)?;
                    reflection.uniforms = Some(UniformBlockLayout {
                        size: round_up(16, self.layouter[var.ty].size),
                        fields,
                    });
                }
                AddressSpace::Handle => {
                    let TypeInner::Image { dim, arrayed, class } = *self.ty(var.ty) else {
                        continue;
                    };
                    let binding = match binding_of(var) {
                        Some((TEXTURE_GROUP, binding)) => binding,
                        _ => {
                            return Err(format!(
                                "texture '{name}' must be bound in @group({TEXTURE_GROUP})"
                            ));
                        }
                    };
                    let shape = match (dim, arrayed) {
                        (ImageDimension::D2, false) => TextureShape::D2,
                        (ImageDimension::Cube, false) => TextureShape::Cube,
                        _ => return Err(format!("unsupported texture dimension for '{name}'")),
                    };
                    let (sample, multisampled) = match class {
                        ImageClass::Sampled { multi, .. } => (TextureSampleKind::Float, multi),
                        ImageClass::Depth { multi } => (TextureSampleKind::Depth, multi),
                        ImageClass::Storage { format, access } => {
                            if shape != TextureShape::D2 {
                                return Err(format!("storage texture '{name}' must be 2D"));
                            }
                            reflection.storage_textures.push(StorageTextureBinding {
                                name: name.to_string(),
                                binding,
                                format: storage_format(format)?,
                                read_write: access.contains(naga::StorageAccess::LOAD),
                            });
                            continue;
                        }
                        ImageClass::External => {
                            return Err(format!("external texture '{name}' is not supported"));
                        }
                    };

                    let sampler_name = format!("{name}{SAMPLER_SUFFIX}");
                    let sampler = globals
                        .iter()
                        .map(|(_, v)| v)
                        .find(|v| v.name.as_deref() == Some(sampler_name.as_str()));
                    reflection.textures.push(TextureBinding {
                        name: name.to_string(),
                        binding,
                        shape,
                        sample,
                        multisampled,
                        sampler_binding: sampler.and_then(|s| s.binding.as_ref()).map(|b| b.binding),
                        comparison: sampler.is_some_and(|s| {
                            matches!(self.ty(s.ty), TypeInner::Sampler { comparison: true })
                        }),
                    });
                }
                _ => {}
            }
        }

        for entry in &self.module.entry_points {
            reflection.entry_points.push(entry.name.clone());
            let function = &entry.function;
            match entry.name.as_str() {
                "vs_main" => {
                    reflection.vertex_inputs = function
                        .arguments
                        .iter()
                        .flat_map(|arg| self.locations(arg.binding.as_ref(), arg.ty))
                        .collect();
                }
                "fs_main" => {
                    reflection.fragment_outputs = function
                        .result
                        .as_ref()
                        .map(|result| self.locations(result.binding.as_ref(), result.ty))
                        .unwrap_or_default();
                }
                "cs_main" => reflection.workgroup_size = Some(entry.workgroup_size),
                _ => {}
            }
        }

        Ok(reflection)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SOURCE: &str = r"
        const MAX_LIGHTS: u32 = 4u;

        struct Attenuation { constant: f32, linear: f32, quadratic: f32, }

        struct PointLight {
            position: vec3<f32>,
            diffuse: vec3<f32>,
            @align(16) attenuation: Attenuation,
        }

        struct Uniforms {
            view: mat4x4<f32>,
            normal: mat3x3<f32>,
            count: i32,
            kernel: array<vec3<f32>, 2>,
            lights: array<PointLight, MAX_LIGHTS>,
            tail: f32,
        }

        @group(0) @binding(0) var<uniform> u: Uniforms;
        @group(1) @binding(0) var qrk_screenTexture: texture_2d<f32>;
        @group(1) @binding(1) var qrk_screenTexture_sampler: sampler;
        @group(1) @binding(2) var skybox: texture_cube<f32>;
        @group(1) @binding(3) var shadowMap: texture_depth_2d;
        @group(1) @binding(4) var shadowMap_sampler: sampler_comparison;

        struct VertexInput { @location(0) position: vec3<f32>, @location(2) uv: vec2<f32>, }
        struct GOut { @location(0) a: vec4<f32>, @location(1) b: vec4<f32>, }

        @vertex
        fn vs_main(input: VertexInput, @builtin(instance_index) i: u32) -> @builtin(position) vec4<f32> {
            let x = array<f32, 2>(1.0, 2.0); /* { */
            return u.view * vec4<f32>(input.position, x[0]);
        }

        @fragment
        fn fs_main() -> GOut { var o: GOut; return o; }
    ";

    #[test]
    fn uniform_offsets_follow_wgsl_layout() {
        let reflection = reflect(SOURCE).unwrap();
        let offset = |name: &str| reflection.uniform(name).map(|f| f.offset);

        assert_eq!(offset("view"), Some(0));
        assert_eq!(offset("normal"), Some(64));
        assert_eq!(offset("count"), Some(112));
        assert_eq!(offset("kernel"), Some(128));
        assert_eq!(offset("kernel[1]"), Some(144));
        // PointLight: vec3 @0, vec3 @16, Attenuation @32 (aligned), size 48.
        assert_eq!(offset("lights[0].position"), Some(160));
        assert_eq!(offset("lights[1].diffuse"), Some(160 + 48 + 16));
        assert_eq!(offset("lights[3].attenuation.quadratic"), Some(160 + 3 * 48 + 32 + 8));
        assert_eq!(offset("tail"), Some(160 + 4 * 48));
        assert_eq!(reflection.uniforms.as_ref().map(|u| u.size), Some(368));
        assert_eq!(
            reflection.uniform("normal").map(|f| f.ty),
            Some(UniformType::Matrix(3, 3))
        );
    }

    #[test]
    fn array_lengths_are_const_evaluated() {
        let source = r"
            const KERNEL: u32 = 2u * 32u;
            struct Uniforms { k: array<vec4<f32>, KERNEL>, n: i32, }
            @group(0) @binding(0) var<uniform> u: Uniforms;
        ";
        let reflection = reflect(source).unwrap();
        assert_eq!(reflection.uniform("k[63]").map(|f| f.offset), Some(63 * 16));
        assert_eq!(reflection.uniform("k[64]"), None);
        assert_eq!(reflection.uniform("n").map(|f| f.offset), Some(1024));
        assert_eq!(reflection.uniforms.as_ref().map(|u| u.size), Some(1040));
    }

    #[test]
    fn aliased_types_resolve() {
        let source = r"
            alias Color = vec4<f32>;
            alias Palette = array<Color, 3>;
            struct Uniforms { tint: Color, palette: Palette, }
            @group(0) @binding(0) var<uniform> u: Uniforms;
        ";
        let reflection = reflect(source).unwrap();
        assert_eq!(
            reflection.uniform("tint").map(|f| f.ty),
            Some(UniformType::Vector(4, ScalarKind::F32))
        );
        assert_eq!(reflection.uniform("palette[2]").map(|f| f.offset), Some(48));
    }

    #[test]
    fn textures_pair_with_samplers() {
        let reflection = reflect(SOURCE).unwrap();
        let screen = reflection.texture("qrk_screenTexture").unwrap();
        assert_eq!(screen.binding, 0);
        assert_eq!(screen.sampler_binding, Some(1));
        assert_eq!(screen.shape, TextureShape::D2);
        assert!(!screen.comparison);

        let skybox = reflection.texture("skybox").unwrap();
        assert_eq!(skybox.shape, TextureShape::Cube);
        assert_eq!(skybox.sampler_binding, None);

        let shadow = reflection.texture("shadowMap").unwrap();
        assert_eq!(shadow.sample, TextureSampleKind::Depth);
        assert!(shadow.comparison);
    }

    #[test]
    fn entry_point_interfaces() {
        let reflection = reflect(SOURCE).unwrap();
        assert!(reflection.has_entry_point("vs_main"));
        assert!(reflection.has_entry_point("fs_main"));
        assert_eq!(reflection.vertex_inputs, vec![0, 2]);
        assert_eq!(reflection.fragment_outputs, vec![0, 1]);
        assert_eq!(reflection.workgroup_size, None);
    }

    #[test]
    fn compute_interfaces() {
        let source = r"
            @group(1) @binding(0) var qrk_output: texture_storage_2d<rgba16float, write>;

            @compute @workgroup_size(8, 8, 1)
            fn cs_main(@builtin(global_invocation_id) id: vec3<u32>) {
                textureStore(qrk_output, vec2<i32>(id.xy), vec4<f32>(1.0));
            }
        ";
        let reflection = reflect(source).unwrap();
        assert!(reflection.has_entry_point("cs_main"));
        assert_eq!(reflection.workgroup_size, Some([8, 8, 1]));
        assert_eq!(
            reflection.storage_textures,
            vec![StorageTextureBinding {
                name: "qrk_output".into(),
                binding: 0,
                format: TextureFormat::Rgba16F,
                read_write: false,
            }]
        );
        assert!(reflection.textures.is_empty());
    }

    #[test]
    fn texture_identifiers_flatten_gl_names() {
        assert_eq!(texture_identifier("material.diffuse[0]"), "material_diffuse_0");
        assert_eq!(texture_identifier("shadowMap"), "shadowMap");
    }

    #[test]
    fn misplaced_uniform_block_is_rejected() {
        let source = "struct U { a: f32, } @group(1) @binding(0) var<uniform> u: U;";
        assert!(reflect(source).is_err());
    }

    #[test]
    fn syntax_errors_carry_a_diagnostic() {
        let err = reflect("struct U { a: f32 ").unwrap_err();
        assert!(!err.is_empty());
    }
}
