//! The requests an encoder accepts.
//!
//! Requests borrow the resources they operate on, they only live for the duration of one
//! encoding call.
use wgpu::TextureAspect;

use crate::buffer::{BufferResource, ImageResource};
use crate::pool::GpuAddress;

/// Selects layers of one mip level and one aspect of an image.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ImageSubresource {
    pub aspect: TextureAspect,
    pub mip_level: u32,
    pub base_array_layer: u32,
    pub layer_count: u32,
}

/// A region copied between two images.
///
/// For 3D images the third coordinate of offsets and extent selects depth slices, for all
/// others it must be zero and one respectively and layers are selected by the subresources.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ImageCopy {
    pub src_subresource: ImageSubresource,
    pub src_offset: [u32; 3],
    pub dst_subresource: ImageSubresource,
    pub dst_offset: [u32; 3],
    pub extent: [u32; 3],
}

/// A region copied between a buffer and an image.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct BufferImageCopy {
    pub buffer_offset: u64,
    /// Texels per buffer row, zero for tightly packed rows.
    pub buffer_row_length: u32,
    /// Rows per buffer slice, zero for tightly packed slices.
    pub buffer_image_height: u32,
    pub image_subresource: ImageSubresource,
    pub image_offset: [u32; 3],
    pub image_extent: [u32; 3],
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct BufferCopy {
    pub src_offset: u64,
    pub dst_offset: u64,
    pub size: u64,
}

/// One copy operation.
#[derive(Clone, Copy, Debug)]
pub enum CopyRequest<'a> {
    ImageToImage {
        src: &'a ImageResource,
        dst: &'a ImageResource,
        region: ImageCopy,
    },
    BufferToImage {
        src: &'a BufferResource,
        dst: &'a ImageResource,
        region: BufferImageCopy,
    },
    ImageToBuffer {
        src: &'a ImageResource,
        dst: &'a BufferResource,
        region: BufferImageCopy,
    },
    BufferToBuffer {
        src: &'a BufferResource,
        dst: &'a BufferResource,
        region: BufferCopy,
    },
}

/// The byte count of a fill.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FillSize {
    Bytes(u64),
    /// Up to the end of the buffer, rounded down to whole words.
    WholeSize,
}

/// Repeat a 32-bit word over a range of a buffer.
#[derive(Clone, Copy, Debug)]
pub struct FillRequest<'a> {
    pub dst: &'a BufferResource,
    pub offset: u64,
    pub size: FillSize,
    pub value: u32,
}

/// Write host data into a buffer.
#[derive(Clone, Copy, Debug)]
pub struct UpdateRequest<'a> {
    pub dst: &'a BufferResource,
    pub offset: u64,
    pub data: &'a [u8],
}

/// The descriptors a user compute kernel runs with.
///
/// Null pointers are left unbound, except for the thread storage which defaults to the
/// stream's shared descriptor.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DispatchBindings {
    pub renderer_state: GpuAddress,
    pub thread_storage: GpuAddress,
    pub uniform_buffers: GpuAddress,
    pub push_uniforms: GpuAddress,
    pub textures: GpuAddress,
    pub samplers: GpuAddress,
    pub attributes: GpuAddress,
    pub attribute_buffers: GpuAddress,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DispatchRequest {
    pub bindings: DispatchBindings,
    pub local_size: [u32; 3],
    pub workgroups: [u32; 3],
}

/// A dispatch whose workgroup counts are read from GPU memory when the stream executes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct IndirectDispatchRequest {
    pub bindings: DispatchBindings,
    pub local_size: [u32; 3],
    /// Address of three `u32` workgroup counts.
    pub indirect: GpuAddress,
    /// Where the resolved counts are made visible to the kernel, null to skip a dimension.
    pub num_workgroups: [GpuAddress; 3],
}

impl ImageSubresource {
    /// The first `layer_count` layers of a level.
    pub fn layers(aspect: TextureAspect, mip_level: u32, layer_count: u32) -> Self {
        ImageSubresource {
            aspect,
            mip_level,
            base_array_layer: 0,
            layer_count,
        }
    }
}
