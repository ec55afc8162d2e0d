//! Descriptors referenced by jobs.
//!
//! Every descriptor is a `#[repr(C)]` plain-old-data structure with the exact byte layout of the
//! hardware record. They are uploaded once into scratch memory and then only read by the GPU.
//!
//! Texture (64 bytes, 64-byte aligned):
//!
//! | offset | field |
//! |---|---|
//! | 0x00 | u16 width − 1, u16 height − 1, u16 depth − 1, u16 array size − 1 |
//! | 0x08 | u32 format code |
//! | 0x0c | u32 shape: dimension [0,2), levels − 1 [2,7), array [8], multisampled [9] |
//! | 0x10 | u32 swizzle, 3 bits per component |
//! | 0x14 | u32 sample count |
//! | 0x18 | u64 surface pointer |
//! | 0x20 | u32 row stride, u32 surface stride |
//!
//! Sampler (32 bytes): u32 filter (magnification [0], minification [1], normalized
//! coordinates [2]), u32 wrap modes (s [0,4), t [4,8), r [8,12)), reserved.
//!
//! Renderer state (64 bytes): u64 shader pointer; u32 properties (work registers [0,7), uniform
//! buffers [7,12), textures [12,17), samplers [17,22), stage [22,24)); u32 preload flags; u32
//! push word count; reserved; u32 blend equation; u32 color mask [0,4) and render target format
//! [8,16).
//!
//! Render target (64 bytes): u64 base; u32 row stride; u32 surface stride; u16 width − 1; u16
//! height − 1; u32 format [0,8), write mask [8,12), log2 samples [12,16), preload [16]; u16 clip
//! min x, min y, max x, max y (inclusive).
use bytemuck::{Pod, Zeroable};
use wgpu::{AddressMode, FilterMode, TextureDimension, TextureFormat};

use crate::encoder::EncodeError;
use crate::format::{hardware_format, BlendParams, FormatError};
use crate::kernel::{KernelMetadata, Stage};
use crate::pool::{GpuAddress, ScratchPool};
use crate::profile::ArchitectureProfile;
use crate::util::{align_up, Bits};

/// One record of the uniform buffer array.
///
/// Bits [0,12) hold the size in 16-byte units minus one, bits [12,64) the address shifted right
/// by four.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
#[repr(transparent)]
pub struct UniformBufferRecord(pub u64);

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
#[repr(C)]
pub struct TextureDescriptor {
    pub width: u16,
    pub height: u16,
    pub depth: u16,
    pub array_size: u16,
    pub format: u32,
    pub shape: u32,
    pub swizzle: u32,
    pub sample_count: u32,
    pub surface: u64,
    pub row_stride: u32,
    pub surface_stride: u32,
    pub reserved: [u32; 6],
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
#[repr(C)]
pub struct SamplerDescriptor {
    pub filter: u32,
    pub wrap: u32,
    pub reserved: [u32; 6],
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
#[repr(C)]
pub struct RendererState {
    pub shader: u64,
    pub properties: u32,
    pub preload: u32,
    pub push_words: u32,
    pub reserved0: u32,
    pub blend_equation: u32,
    pub blend_target: u32,
    pub reserved: [u32; 8],
}

/// Per-stream thread storage, without any stack or shared memory.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
#[repr(C)]
pub struct ThreadStorage {
    pub stack_size: u32,
    pub shared_size: u32,
    pub stack: u64,
    pub reserved: [u32; 4],
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
#[repr(C)]
pub struct RenderTarget {
    pub base: u64,
    pub row_stride: u32,
    pub surface_stride: u32,
    pub width: u16,
    pub height: u16,
    pub format: u32,
    /// Inclusive clip rectangle: min x, min y, max x, max y.
    pub clip: [u16; 4],
    pub reserved: [u32; 8],
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
#[repr(C)]
pub struct Viewport {
    /// Inclusive bounds: min x, min y, max x, max y.
    pub bounds: [u16; 4],
    pub min_depth: f32,
    pub max_depth: f32,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
#[repr(C)]
pub struct AttributeBuffer {
    pub pointer: u64,
    pub stride: u32,
    pub size: u32,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
#[repr(C)]
pub struct Attribute {
    pub buffer_index: u32,
    pub format: u32,
}

/// Where a kernel finds its parameters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct UniformPush {
    /// The uniform buffer record array, or null when the kernel does not need it.
    pub uniform_buffers: GpuAddress,
    /// The push constant blob, or null when nothing is pushed.
    pub push_uniforms: GpuAddress,
}

/// A single level view of an image region, as sampled by a kernel.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ImageView {
    /// Address of the first texel of the viewed level and layer.
    pub base: GpuAddress,
    /// A raw format.
    pub format: TextureFormat,
    pub dimension: TextureDimension,
    pub extent: [u32; 3],
    pub array_layers: u32,
    pub sample_count: u32,
    pub row_stride: u32,
    pub surface_stride: u32,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SampledImageBinding {
    pub textures: GpuAddress,
    pub samplers: GpuAddress,
}

/// The render target of a rasterization job.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RenderTargetDesc {
    pub base: GpuAddress,
    /// A raw format.
    pub format: TextureFormat,
    pub row_stride: u32,
    pub surface_stride: u32,
    pub extent: [u32; 2],
    pub write_mask: u8,
    pub sample_count: u32,
    /// Load the existing contents before the kernel runs.
    pub preload: bool,
    /// The covered rectangle, min inclusive and max exclusive.
    pub rect: [u32; 4],
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct AttributeBinding {
    pub attributes: GpuAddress,
    pub attribute_buffers: GpuAddress,
}

pub const TEXTURE_ALIGNMENT: u64 = 64;
pub const SAMPLER_ALIGNMENT: u64 = 32;
pub const RENDERER_STATE_ALIGNMENT: u64 = 64;
const UNIFORM_ALIGNMENT: u64 = 16;

/// Identity swizzle, components x, y, z, w in order.
const SWIZZLE_IDENTITY: u32 = (1 << 3) | (2 << 6) | (3 << 9);
/// `src * 1 + dst * 0` for color and alpha, i.e. replace.
pub const BLEND_REPLACE: u32 = 0x0122_0122;

const FILTER_MAG: Bits = Bits::new(0, 1);
const FILTER_MIN: Bits = Bits::new(1, 1);
const FILTER_NORMALIZED: Bits = Bits::new(2, 1);
const WRAP: [Bits; 3] = [Bits::new(0, 4), Bits::new(4, 4), Bits::new(8, 4)];

pub(crate) const PROP_WORK_REGISTERS: Bits = Bits::new(0, 7);
pub(crate) const PROP_UNIFORM_BUFFERS: Bits = Bits::new(7, 5);
pub(crate) const PROP_TEXTURES: Bits = Bits::new(12, 5);
pub(crate) const PROP_SAMPLERS: Bits = Bits::new(17, 5);
pub(crate) const PROP_STAGE: Bits = Bits::new(22, 2);

const RT_FORMAT: Bits = Bits::new(0, 8);
const RT_MASK: Bits = Bits::new(8, 4);
const RT_SAMPLES: Bits = Bits::new(12, 4);
const RT_PRELOAD: Bits = Bits::new(16, 1);

const SHAPE_DIMENSION: Bits = Bits::new(0, 2);
const SHAPE_ARRAY: Bits = Bits::new(8, 1);
const SHAPE_MULTISAMPLED: Bits = Bits::new(9, 1);

impl UniformBufferRecord {
    const SIZE: Bits = Bits::new(0, 12);

    /// Describe `size` bytes at the 16-byte aligned `address`.
    pub fn new(address: GpuAddress, size: u64) -> Option<Self> {
        if address.0 % UNIFORM_ALIGNMENT != 0 || size == 0 {
            return None;
        }

        let units = u32::try_from(align_up(size, UNIFORM_ALIGNMENT) / UNIFORM_ALIGNMENT - 1).ok()?;
        let size = Self::SIZE.insert(0, units)?;
        Some(UniformBufferRecord(u64::from(size) | ((address.0 >> 4) << 12)))
    }

    pub fn address(self) -> GpuAddress {
        GpuAddress((self.0 >> 12) << 4)
    }

    pub fn size(self) -> u64 {
        (u64::from(Self::SIZE.extract(self.0 as u32)) + 1) * UNIFORM_ALIGNMENT
    }
}

/// Upload the parameters of one kernel launch.
///
/// The whole parameter blob becomes the uniform buffer whenever the kernel may read it from
/// there. Independently, each push range of the kernel is copied, in order, into one contiguous
/// push constant blob.
pub fn build_uniform_and_push(
    pool: &mut dyn ScratchPool,
    profile: &ArchitectureProfile,
    metadata: &KernelMetadata,
    params: &[u8],
) -> Result<UniformPush, EncodeError> {
    let mut push = vec![];
    for range in &metadata.push_constants {
        let start = range.source_offset as usize;
        let bytes = start
            .checked_add(range.size as usize)
            .and_then(|end| params.get(start..end));

        match bytes {
            Some(bytes) => push.extend_from_slice(bytes),
            None => {
                log::error!(
                    "push range {:?} outside of {} parameter bytes",
                    range,
                    params.len()
                );
                return Err(EncodeError::internal(line!()));
            }
        }
    }

    let mut binding = UniformPush::default();

    let needs_uniform = metadata.uniform_buffer_required || !profile.preloads_push_constants();
    if needs_uniform && !params.is_empty() {
        let mut blob = params.to_vec();
        blob.resize(align_up(params.len() as u64, UNIFORM_ALIGNMENT) as usize, 0);

        let address = pool.upload(&blob, UNIFORM_ALIGNMENT)?;
        let record = UniformBufferRecord::new(address, blob.len() as u64)
            .ok_or(EncodeError::TooLarge {
                what: "uniform buffer",
                value: blob.len() as u64,
            })?;
        binding.uniform_buffers = pool.upload(bytemuck::bytes_of(&record), 8)?;
    }

    if !push.is_empty() {
        let align = profile.push_alignment();
        push.resize(align_up(push.len() as u64, align) as usize, 0);
        binding.push_uniforms = pool.upload(&push, align)?;
    }

    Ok(binding)
}

/// Upload a texture and a texel fetch sampler for one image view.
pub fn build_sampled_image_binding(
    pool: &mut dyn ScratchPool,
    view: &ImageView,
) -> Result<SampledImageBinding, EncodeError> {
    let texture = texture_descriptor(view)?;
    let sampler = sampler_descriptor(FilterMode::Nearest, AddressMode::ClampToEdge, false);

    Ok(SampledImageBinding {
        textures: pool.upload(bytemuck::bytes_of(&texture), TEXTURE_ALIGNMENT)?,
        samplers: pool.upload(bytemuck::bytes_of(&sampler), SAMPLER_ALIGNMENT)?,
    })
}

pub fn texture_descriptor(view: &ImageView) -> Result<TextureDescriptor, EncodeError> {
    let format = hardware_format(view.format).ok_or(FormatError::Unsupported(view.format))?;

    let dimension = match view.dimension {
        TextureDimension::D1 => 1,
        TextureDimension::D2 => 2,
        TextureDimension::D3 => 3,
    };

    let mut shape = SHAPE_DIMENSION.mask() & dimension;
    if view.array_layers > 1 {
        shape |= SHAPE_ARRAY.mask();
    }
    if view.sample_count > 1 {
        shape |= SHAPE_MULTISAMPLED.mask();
    }

    Ok(TextureDescriptor {
        width: minus_one("texture width", view.extent[0])?,
        height: minus_one("texture height", view.extent[1])?,
        depth: minus_one("texture depth", view.extent[2])?,
        array_size: minus_one("texture layers", view.array_layers)?,
        format,
        shape,
        swizzle: SWIZZLE_IDENTITY,
        sample_count: view.sample_count.max(1),
        surface: view.base.0,
        row_stride: view.row_stride,
        surface_stride: view.surface_stride,
        reserved: [0; 6],
    })
}

pub fn sampler_descriptor(
    filter: FilterMode,
    address: AddressMode,
    normalized: bool,
) -> SamplerDescriptor {
    let filter_code = match filter {
        FilterMode::Nearest => 0,
        FilterMode::Linear => 1,
    };

    let wrap_code = match address {
        AddressMode::Repeat => 0,
        AddressMode::ClampToEdge => 1,
        AddressMode::MirrorRepeat => 2,
        AddressMode::ClampToBorder => 3,
    };

    let mut filter_word = (filter_code << FILTER_MAG.shift) | (filter_code << FILTER_MIN.shift);
    if normalized {
        filter_word |= FILTER_NORMALIZED.mask();
    }

    SamplerDescriptor {
        filter: filter_word,
        wrap: WRAP.iter().fold(0, |word, bits| word | (wrap_code << bits.shift)),
        reserved: [0; 6],
    }
}

/// The renderer state of a compiled kernel.
///
/// Built once per kernel when the device is created.
pub fn renderer_state(
    shader: GpuAddress,
    stage: Stage,
    metadata: &KernelMetadata,
    blend: Option<&BlendParams>,
) -> Result<RendererState, FormatError> {
    let uniform_buffers = u32::from(metadata.uniform_buffer_required);
    let stage_code = match stage {
        Stage::Compute => 0,
        Stage::Fragment => 1,
    };

    let properties = [
        (PROP_WORK_REGISTERS, u32::from(metadata.work_register_count)),
        (PROP_UNIFORM_BUFFERS, uniform_buffers),
        (PROP_TEXTURES, u32::from(metadata.texture_count)),
        (PROP_SAMPLERS, u32::from(metadata.sampler_count)),
        (PROP_STAGE, stage_code),
    ]
    .iter()
    .fold(0, |word, &(bits, value)| word | ((value << bits.shift) & bits.mask()));

    let push_bytes: u32 = metadata.push_constants.iter().map(|range| range.size).sum();

    let (blend_equation, blend_target) = match blend {
        None => (0, 0),
        Some(params) => {
            let format = hardware_format(params.target_format)
                .ok_or(FormatError::Unsupported(params.target_format))?;
            (
                BLEND_REPLACE,
                u32::from(params.color_mask & 0xf) | (format << 8),
            )
        }
    };

    Ok(RendererState {
        shader: shader.0,
        properties,
        preload: metadata.preload,
        push_words: push_bytes.div_ceil(4),
        reserved0: 0,
        blend_equation,
        blend_target,
        reserved: [0; 8],
    })
}

pub fn build_thread_storage(pool: &mut dyn ScratchPool) -> Result<GpuAddress, EncodeError> {
    Ok(pool.upload(bytemuck::bytes_of(&ThreadStorage::zeroed()), 64)?)
}

pub fn build_render_target(
    pool: &mut dyn ScratchPool,
    desc: &RenderTargetDesc,
) -> Result<GpuAddress, EncodeError> {
    let format = hardware_format(desc.format).ok_or(FormatError::Unsupported(desc.format))?;
    let samples = desc.sample_count.max(1);
    if !samples.is_power_of_two() {
        return Err(EncodeError::TooLarge {
            what: "sample count",
            value: u64::from(samples),
        });
    }

    let word = [
        (RT_FORMAT, format),
        (RT_MASK, u32::from(desc.write_mask)),
        (RT_SAMPLES, samples.trailing_zeros()),
        (RT_PRELOAD, u32::from(desc.preload)),
    ]
    .iter()
    .try_fold(0, |word, &(bits, value)| bits.insert(word, value))
    .ok_or_else(|| EncodeError::internal(line!()))?;

    let target = RenderTarget {
        base: desc.base.0,
        row_stride: desc.row_stride,
        surface_stride: desc.surface_stride,
        width: minus_one("render target width", desc.extent[0])?,
        height: minus_one("render target height", desc.extent[1])?,
        format: word,
        clip: inclusive_rect(&desc.rect)?,
        reserved: [0; 8],
    };

    Ok(pool.upload(bytemuck::bytes_of(&target), 64)?)
}

/// A viewport covering `rect`, min inclusive and max exclusive, with the full depth range.
pub fn build_viewport(pool: &mut dyn ScratchPool, rect: &[u32; 4]) -> Result<GpuAddress, EncodeError> {
    let viewport = Viewport {
        bounds: inclusive_rect(rect)?,
        min_depth: 0.0,
        max_depth: 1.0,
    };

    Ok(pool.upload(bytemuck::bytes_of(&viewport), 16)?)
}

/// Upload the attribute records and their buffers.
///
/// Profiles that require it get an additional zeroed buffer record terminating the array.
pub fn build_attributes(
    pool: &mut dyn ScratchPool,
    profile: &ArchitectureProfile,
    buffers: &[AttributeBuffer],
    attributes: &[Attribute],
) -> Result<AttributeBinding, EncodeError> {
    let mut binding = AttributeBinding::default();

    let mut buffers = buffers.to_vec();
    if profile.padding_attribute_buffer {
        buffers.push(AttributeBuffer::zeroed());
    }

    if !buffers.is_empty() {
        binding.attribute_buffers = pool.upload(bytemuck::cast_slice(&buffers), 64)?;
    }

    if !attributes.is_empty() {
        binding.attributes = pool.upload(bytemuck::cast_slice(attributes), 64)?;
    }

    Ok(binding)
}

fn minus_one(what: &'static str, value: u32) -> Result<u16, EncodeError> {
    value
        .checked_sub(1)
        .and_then(|value| u16::try_from(value).ok())
        .ok_or(EncodeError::TooLarge {
            what,
            value: u64::from(value),
        })
}

fn inclusive_rect(rect: &[u32; 4]) -> Result<[u16; 4], EncodeError> {
    let [x0, y0, x1, y1] = *rect;
    if x1 <= x0 || y1 <= y0 {
        return Err(EncodeError::RegionOutOfBounds);
    }

    let clamp = |value: u32| {
        u16::try_from(value).map_err(|_| EncodeError::TooLarge {
            what: "rectangle",
            value: u64::from(value),
        })
    };

    Ok([clamp(x0)?, clamp(y0)?, clamp(x1 - 1)?, clamp(y1 - 1)?])
}
