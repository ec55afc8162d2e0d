//! Parameter blobs of the transfer kernels.
//!
//! Image data is reached through the bound texture and render target, buffer data through
//! the absolute addresses passed here.
use core::mem::offset_of;

use bytemuck::{Pod, Zeroable};

use super::{KernelParams, ParamField};

/// Image to buffer, one compute invocation per texel.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
#[repr(C)]
pub struct ImageToBufferParams {
    /// Address of the texel at the region origin.
    pub dst: u64,
    pub dst_slice_stride: u64,
    pub dst_row_stride: u32,
    /// Region origin in the sampled texture.
    pub src_offset: [u32; 3],
    /// Invocations outside of the extent do nothing.
    pub extent: [u32; 3],
    pub reserved: u32,
}

/// Buffer to image, one fragment per destination texel.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
#[repr(C)]
pub struct BufferToImageParams {
    /// Address of the buffer texel copied to the region origin of the slice.
    pub src: u64,
    pub src_slice_stride: u64,
    pub src_row_stride: u32,
    /// Region origin in the render target.
    pub dst_offset: [u32; 2],
    pub reserved: u32,
}

/// Image to image, one fragment per destination texel.
///
/// Source coordinates arrive as a vertex attribute.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
#[repr(C)]
pub struct ImageToImageParams {
    /// The depth slice of a 3D source.
    pub src_slice: u32,
    pub sample_count: u32,
    pub reserved: [u32; 2],
}

/// Block copy between buffers, also used for updates from staged data.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
#[repr(C)]
pub struct BufferCopyParams {
    pub src: u64,
    pub dst: u64,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
#[repr(C)]
pub struct FillParams {
    pub dst: u64,
    pub value: u32,
    pub reserved: u32,
}

impl KernelParams for ImageToBufferParams {
    const FIELDS: &'static [ParamField] = &[
        ParamField::new("dst", offset_of!(Self, dst), 8),
        ParamField::new("dst_slice_stride", offset_of!(Self, dst_slice_stride), 8),
        ParamField::new("dst_row_stride", offset_of!(Self, dst_row_stride), 4),
        ParamField::new("src_offset", offset_of!(Self, src_offset), 12),
        ParamField::new("extent", offset_of!(Self, extent), 12),
    ];
}

impl KernelParams for BufferToImageParams {
    const FIELDS: &'static [ParamField] = &[
        ParamField::new("src", offset_of!(Self, src), 8),
        ParamField::new("src_slice_stride", offset_of!(Self, src_slice_stride), 8),
        ParamField::new("src_row_stride", offset_of!(Self, src_row_stride), 4),
        ParamField::new("dst_offset", offset_of!(Self, dst_offset), 8),
    ];
}

impl KernelParams for ImageToImageParams {
    const FIELDS: &'static [ParamField] = &[
        ParamField::new("src_slice", offset_of!(Self, src_slice), 4),
        ParamField::new("sample_count", offset_of!(Self, sample_count), 4),
    ];
}

impl KernelParams for BufferCopyParams {
    const FIELDS: &'static [ParamField] = &[
        ParamField::new("src", offset_of!(Self, src), 8),
        ParamField::new("dst", offset_of!(Self, dst), 8),
    ];
}

impl KernelParams for FillParams {
    const FIELDS: &'static [ParamField] = &[
        ParamField::new("dst", offset_of!(Self, dst), 8),
        ParamField::new("value", offset_of!(Self, value), 4),
    ];
}
