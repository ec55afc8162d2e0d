//! Copies between buffers and images.
//!
//! Image to buffer copies run a compute kernel per layer that samples the image. Copies into an
//! image rasterize a quad per destination layer or depth slice, writing through the render
//! target with the aspect's write mask. Buffer to buffer copies move power-of-two blocks.
use wgpu::TextureDimension;

use super::{EncodeError, Encoder};
use crate::buffer::{BufferResource, ImageResource};
use crate::command::{BufferCopy, BufferImageCopy, CopyRequest, ImageCopy, ImageSubresource};
use crate::descriptor::{
    self, Attribute, AttributeBuffer, ImageView, RenderTargetDesc, SampledImageBinding,
};
use crate::format::{self, FormatKey, OperationKind, RawView};
use crate::job::{DrawDescriptor, DrawMode, JobDescription, JobHandle, Primitive};
use crate::kernel::CompiledKernel;
use crate::pool::GpuAddress;
use crate::shaders::transfer::{
    BufferCopyParams, BufferToImageParams, ImageToBufferParams, ImageToImageParams,
};
use crate::shaders::KernelParams;

const LOCAL_SIZE_1D: [u32; 3] = [64, 1, 1];
const LOCAL_SIZE_2D: [u32; 3] = [16, 16, 1];

/// The widest block of buffer copies is 16 bytes.
const MAX_BLOCK_LOG2: u32 = 4;

/// Vertices of the rasterized quad, as a triangle strip.
const QUAD_VERTICES: u32 = 4;

/// The block size of a buffer copy: the largest power of two, up to 16, that divides both
/// addresses and the size.
pub fn buffer_block_size(src: GpuAddress, dst: GpuAddress, size: u64) -> u64 {
    1 << block_log2(src, dst, size)
}

fn block_log2(src: GpuAddress, dst: GpuAddress, size: u64) -> u32 {
    (src.0 | dst.0 | size).trailing_zeros().min(MAX_BLOCK_LOG2)
}

/// Byte layout of the buffer side of a buffer-image copy.
struct BufferRegion {
    row_stride: u32,
    slice_stride: u64,
}

impl Encoder<'_, '_> {
    /// Encode one copy, returning the jobs in stream order.
    ///
    /// Empty regions produce no jobs.
    pub fn encode_copy(&mut self, request: &CopyRequest<'_>) -> Result<Vec<JobHandle>, EncodeError> {
        match *request {
            CopyRequest::ImageToImage { src, dst, region } => {
                self.copy_image_to_image(src, dst, &region)
            }
            CopyRequest::BufferToImage { src, dst, region } => {
                self.copy_buffer_to_image(src, dst, &region)
            }
            CopyRequest::ImageToBuffer { src, dst, region } => {
                self.copy_image_to_buffer(src, dst, &region)
            }
            CopyRequest::BufferToBuffer { src, dst, region } => {
                self.copy_buffer_to_buffer(src, dst, &region)
            }
        }
    }

    fn copy_image_to_buffer(
        &mut self,
        src: &ImageResource,
        dst: &BufferResource,
        region: &BufferImageCopy,
    ) -> Result<Vec<JobHandle>, EncodeError> {
        let sub = &region.image_subresource;
        let level_extent = check_subresource(src, sub)?;
        if src.is_multisampled() {
            return Err(EncodeError::Multisampled);
        }

        if region.image_extent.contains(&0) {
            return Ok(vec![]);
        }

        check_region(level_extent, region.image_offset, region.image_extent)?;

        let view = format::image_view(src.format, sub.aspect)?;
        let linear = format::buffer_view(src.format, sub.aspect)?;
        let slices = slice_count(src, sub, region.image_extent);
        let layout = buffer_region(dst, region, &linear, slices)?;

        let key = FormatKey {
            src: view.format,
            dst: linear.format,
            write_mask: view.mask,
            dimension: src.dimension,
            is_array: src.is_array(),
            is_multisampled: false,
        };

        let kernel = self.transfer_kernel(OperationKind::ImageToBuffer, &key)?;
        let level = src
            .level(sub.mip_level)
            .ok_or(EncodeError::SubresourceOutOfRange)?;

        let [x, y, z] = region.image_offset;
        let [width, height, depth] = region.image_extent;
        let (local, groups) = match src.dimension {
            TextureDimension::D1 => (LOCAL_SIZE_1D, [width.div_ceil(64), 1, 1]),
            TextureDimension::D2 => (LOCAL_SIZE_2D, [width.div_ceil(16), height.div_ceil(16), 1]),
            TextureDimension::D3 => (
                LOCAL_SIZE_2D,
                [width.div_ceil(16), height.div_ceil(16), depth],
            ),
        };

        // A 3D image is a single job covering all slices of the region.
        let jobs = match src.dimension {
            TextureDimension::D3 => 1,
            _ => sub.layer_count,
        };

        let mut handles = Vec::with_capacity(jobs as usize);
        for i in 0..jobs {
            let layer = sub.base_array_layer + i;
            let surface = src
                .surface(sub.mip_level, layer)
                .ok_or(EncodeError::SubresourceOutOfRange)?;

            let binding = self.sample(&ImageView {
                base: surface,
                format: view.format,
                dimension: src.dimension,
                extent: level_extent,
                array_layers: 1,
                sample_count: 1,
                row_stride: level.row_stride,
                surface_stride: level.slice_stride,
            })?;

            let params = ImageToBufferParams {
                dst: dst
                    .address(region.buffer_offset + u64::from(i) * layout.slice_stride)
                    .0,
                dst_slice_stride: layout.slice_stride,
                dst_row_stride: layout.row_stride,
                src_offset: [x, y, z],
                extent: region.image_extent,
                reserved: 0,
            };

            let draw = DrawDescriptor {
                textures: binding.textures,
                samplers: binding.samplers,
                ..DrawDescriptor::default()
            };

            handles.push(self.transfer_compute(kernel, &params, draw, local, groups)?);
        }

        log::debug!("image to buffer copy: {} jobs", handles.len());
        Ok(handles)
    }

    fn copy_buffer_to_image(
        &mut self,
        src: &BufferResource,
        dst: &ImageResource,
        region: &BufferImageCopy,
    ) -> Result<Vec<JobHandle>, EncodeError> {
        let sub = &region.image_subresource;
        let level_extent = check_subresource(dst, sub)?;
        if dst.is_multisampled() {
            return Err(EncodeError::Multisampled);
        }

        if region.image_extent.contains(&0) {
            return Ok(vec![]);
        }

        check_region(level_extent, region.image_offset, region.image_extent)?;

        let view = format::image_view(dst.format, sub.aspect)?;
        let linear = format::buffer_view(dst.format, sub.aspect)?;
        let slices = slice_count(dst, sub, region.image_extent);
        let layout = buffer_region(src, region, &linear, slices)?;

        let key = FormatKey {
            src: linear.format,
            dst: view.format,
            write_mask: view.mask,
            dimension: dst.dimension,
            is_array: dst.is_array(),
            is_multisampled: false,
        };

        let kernel = self.transfer_kernel(OperationKind::BufferToImage, &key)?;
        let [x, y, z] = region.image_offset;
        let [width, height, _] = region.image_extent;
        let rect = [x, y, x + width, y + height];

        let mut handles = Vec::with_capacity(slices as usize);
        for i in 0..slices {
            let target = render_target(dst, sub, &view, level_extent, i, z, rect)?;
            let params = BufferToImageParams {
                src: src
                    .address(region.buffer_offset + u64::from(i) * layout.slice_stride)
                    .0,
                src_slice_stride: layout.slice_stride,
                src_row_stride: layout.row_stride,
                dst_offset: [x, y],
                reserved: 0,
            };

            let handle = self.transfer_tiler(
                kernel,
                &params,
                &target,
                SampledImageBinding::default(),
                None,
            )?;
            handles.push(handle);
        }

        log::debug!("buffer to image copy: {} jobs", handles.len());
        Ok(handles)
    }

    fn copy_image_to_image(
        &mut self,
        src: &ImageResource,
        dst: &ImageResource,
        region: &ImageCopy,
    ) -> Result<Vec<JobHandle>, EncodeError> {
        let (src_sub, dst_sub) = (&region.src_subresource, &region.dst_subresource);
        let src_extent = check_subresource(src, src_sub)?;
        let dst_extent = check_subresource(dst, dst_sub)?;

        if src.dimension != dst.dimension {
            return Err(EncodeError::DimensionMismatch);
        }

        if src.sample_count != dst.sample_count {
            return Err(EncodeError::SampleCountMismatch {
                src: src.sample_count,
                dst: dst.sample_count,
            });
        }

        if src_sub.layer_count != dst_sub.layer_count {
            return Err(EncodeError::SubresourceOutOfRange);
        }

        if region.extent.contains(&0) {
            return Ok(vec![]);
        }

        check_region(src_extent, region.src_offset, region.extent)?;
        check_region(dst_extent, region.dst_offset, region.extent)?;

        let src_view = format::image_view(src.format, src_sub.aspect)?;
        let dst_view = format::image_view(dst.format, dst_sub.aspect)?;
        if src_view.format != dst_view.format || src_view.mask != dst_view.mask {
            return Err(EncodeError::IncompatibleFormats {
                src: src.format,
                dst: dst.format,
            });
        }

        let key = FormatKey {
            src: src_view.format,
            dst: dst_view.format,
            write_mask: dst_view.mask,
            dimension: dst.dimension,
            is_array: dst.is_array(),
            is_multisampled: dst.is_multisampled(),
        };

        let kernel = self.transfer_kernel(OperationKind::ImageToImage, &key)?;
        let src_level = src
            .level(src_sub.mip_level)
            .ok_or(EncodeError::SubresourceOutOfRange)?;

        let [sx, sy, sz] = region.src_offset;
        let [dx, dy, dz] = region.dst_offset;
        let [width, height, _] = region.extent;
        let rect = [dx, dy, dx + width, dy + height];
        let slices = slice_count(dst, dst_sub, region.extent);

        let mut handles = Vec::with_capacity(slices as usize);
        for i in 0..slices {
            let (src_layer, src_slice) = match src.dimension {
                TextureDimension::D3 => (0, sz + i),
                _ => (src_sub.base_array_layer + i, 0),
            };

            let surface = src
                .surface(src_sub.mip_level, src_layer)
                .ok_or(EncodeError::SubresourceOutOfRange)?;

            let binding = self.sample(&ImageView {
                base: surface,
                format: src_view.format,
                dimension: src.dimension,
                extent: src_extent,
                array_layers: 1,
                sample_count: src.sample_count,
                row_stride: src_level.row_stride,
                surface_stride: src_level.slice_stride,
            })?;

            let params = ImageToImageParams {
                src_slice,
                sample_count: src.sample_count,
                reserved: [0; 2],
            };

            let (x0, y0) = (sx as f32, sy as f32);
            let (x1, y1) = ((sx + width) as f32, (sy + height) as f32);
            let slice = src_slice as f32;
            let coords = [
                [x0, y0, slice, 0.0],
                [x1, y0, slice, 0.0],
                [x0, y1, slice, 0.0],
                [x1, y1, slice, 0.0],
            ];

            let target = render_target(dst, dst_sub, &dst_view, dst_extent, i, dz, rect)?;
            let handle = self.transfer_tiler(kernel, &params, &target, binding, Some(&coords))?;
            handles.push(handle);
        }

        log::debug!("image to image copy: {} jobs", handles.len());
        Ok(handles)
    }

    fn copy_buffer_to_buffer(
        &mut self,
        src: &BufferResource,
        dst: &BufferResource,
        region: &BufferCopy,
    ) -> Result<Vec<JobHandle>, EncodeError> {
        check_buffer(src, region.src_offset, region.size)?;
        check_buffer(dst, region.dst_offset, region.size)?;

        if region.size == 0 {
            return Ok(vec![]);
        }

        let src_address = src.address(region.src_offset);
        let dst_address = dst.address(region.dst_offset);
        let log2 = block_log2(src_address, dst_address, region.size);

        let raw = format::raw_format(1 << log2).ok_or_else(|| EncodeError::internal(line!()))?;
        let kernel = self.transfer_kernel(OperationKind::BufferToBuffer, &FormatKey::linear(raw))?;

        self.linear_jobs(kernel, region.size >> log2, log2, |offset| BufferCopyParams {
            src: src_address.offset(offset).0,
            dst: dst_address.offset(offset).0,
        })
    }

    fn sample(&mut self, view: &ImageView) -> Result<SampledImageBinding, EncodeError> {
        descriptor::build_sampled_image_binding(&mut *self.pool, view)
    }

    /// Append a tiler job drawing one quad over the render target rectangle.
    fn transfer_tiler<P: KernelParams>(
        &mut self,
        kernel: &CompiledKernel,
        params: &P,
        target: &RenderTargetDesc,
        sampled: SampledImageBinding,
        source_coords: Option<&[[f32; 4]; 4]>,
    ) -> Result<JobHandle, EncodeError> {
        let invocation = self.invocation([1, 1, 1], [QUAD_VERTICES, 1, 1])?;
        let uniforms = self.upload_params(kernel, params)?;
        let thread_storage = self.thread_storage()?;

        let pool = &mut *self.pool;
        let framebuffer = descriptor::build_render_target(pool, target)?;
        let viewport = descriptor::build_viewport(pool, &target.rect)?;

        let [x0, y0, x1, y1] = target.rect.map(|v| v as f32);
        let positions = [
            [x0, y0, 0.0, 1.0],
            [x1, y0, 0.0, 1.0],
            [x0, y1, 0.0, 1.0],
            [x1, y1, 0.0, 1.0],
        ];
        let position = pool.upload(bytemuck::cast_slice(&positions), 16)?;

        let vertex_format = format::hardware_format(wgpu::TextureFormat::Rgba32Float)
            .ok_or_else(|| EncodeError::internal(line!()))?;

        let (buffers, attributes) = match source_coords {
            Some(coords) => {
                let bytes: &[u8] = bytemuck::cast_slice(coords);
                let pointer = pool.upload(bytes, 16)?;
                let buffer = AttributeBuffer {
                    pointer: pointer.0,
                    stride: 16,
                    size: bytes.len() as u32,
                };
                let attribute = Attribute {
                    buffer_index: 0,
                    format: vertex_format,
                };
                (vec![buffer], vec![attribute])
            }
            None => (vec![], vec![]),
        };

        let profile = self.device.profile();
        let attributes = descriptor::build_attributes(pool, profile, &buffers, &attributes)?;

        let draw = DrawDescriptor {
            state: kernel.renderer_state(),
            thread_storage,
            uniform_buffers: uniforms.uniform_buffers,
            push_uniforms: uniforms.push_uniforms,
            textures: sampled.textures,
            samplers: sampled.samplers,
            attributes: attributes.attributes,
            attribute_buffers: attributes.attribute_buffers,
            position,
            viewport,
            framebuffer,
            ..DrawDescriptor::default()
        };

        let primitive = Primitive {
            mode: DrawMode::TriangleStrip,
            base_vertex: 0,
            vertex_count: QUAD_VERTICES,
        };

        self.stream.append_job(
            &mut *self.pool,
            JobDescription::tiler(draw, invocation, primitive),
        )
    }
}

/// Validate the image and subresource, returning the extent of the selected level.
fn check_subresource(image: &ImageResource, sub: &ImageSubresource) -> Result<[u32; 3], EncodeError> {
    image.validate()?;

    let layers_end = sub.base_array_layer.checked_add(sub.layer_count);
    let layers_ok = sub.layer_count > 0 && layers_end.is_some_and(|end| end <= image.array_layers);
    if image.level(sub.mip_level).is_none() || !layers_ok {
        return Err(EncodeError::SubresourceOutOfRange);
    }

    Ok(image.level_extent(sub.mip_level))
}

fn check_region(level: [u32; 3], offset: [u32; 3], extent: [u32; 3]) -> Result<(), EncodeError> {
    let inside = (0..3).all(|i| {
        offset[i]
            .checked_add(extent[i])
            .is_some_and(|end| end <= level[i])
    });

    match inside {
        true => Ok(()),
        false => Err(EncodeError::RegionOutOfBounds),
    }
}

fn check_buffer(buffer: &BufferResource, offset: u64, size: u64) -> Result<(), EncodeError> {
    if buffer.contains(offset, size) {
        Ok(())
    } else {
        Err(EncodeError::BufferOutOfBounds {
            offset,
            size,
            buffer_size: buffer.size,
        })
    }
}

/// Depth slices of a 3D region, or layers of any other.
fn slice_count(image: &ImageResource, sub: &ImageSubresource, extent: [u32; 3]) -> u32 {
    match image.dimension {
        TextureDimension::D3 => extent[2],
        _ => sub.layer_count,
    }
}

fn buffer_region(
    buffer: &BufferResource,
    region: &BufferImageCopy,
    linear: &RawView,
    slices: u32,
) -> Result<BufferRegion, EncodeError> {
    let texel = u64::from(linear.texel_size);
    if region.buffer_offset % texel != 0 {
        return Err(EncodeError::Misaligned {
            value: region.buffer_offset,
            align: texel,
        });
    }

    let [width, height, _] = region.image_extent;
    let row_length = match region.buffer_row_length {
        0 => width,
        length => length,
    };

    let image_height = match region.buffer_image_height {
        0 => height,
        rows => rows,
    };

    if row_length < width || image_height < height {
        return Err(EncodeError::RegionOutOfBounds);
    }

    let row_stride = u64::from(row_length) * texel;
    let slice_stride = row_stride * u64::from(image_height);
    let size = u64::from(slices - 1) * slice_stride
        + u64::from(height - 1) * row_stride
        + u64::from(width) * texel;

    check_buffer(buffer, region.buffer_offset, size)?;

    let row_stride = u32::try_from(row_stride).map_err(|_| EncodeError::TooLarge {
        what: "buffer row stride",
        value: row_stride,
    })?;

    Ok(BufferRegion {
        row_stride,
        slice_stride,
    })
}

/// The render target of slice `i` of a region whose first depth slice is `z`.
fn render_target(
    image: &ImageResource,
    sub: &ImageSubresource,
    view: &RawView,
    level_extent: [u32; 3],
    i: u32,
    z: u32,
    rect: [u32; 4],
) -> Result<RenderTargetDesc, EncodeError> {
    let level = image
        .level(sub.mip_level)
        .ok_or(EncodeError::SubresourceOutOfRange)?;

    let (layer, slice) = match image.dimension {
        TextureDimension::D3 => (0, z + i),
        _ => (sub.base_array_layer + i, 0),
    };

    let surface = image
        .surface(sub.mip_level, layer)
        .ok_or(EncodeError::SubresourceOutOfRange)?
        .offset(u64::from(slice) * u64::from(level.slice_stride));

    let [width, height, _] = level_extent;
    let covers_level = rect == [0, 0, width, height];
    let full_mask = view.mask == format::full_mask(view.format);

    Ok(RenderTargetDesc {
        base: surface,
        format: view.format,
        row_stride: level.row_stride,
        surface_stride: level.slice_stride,
        extent: [width, height],
        write_mask: view.mask,
        sample_count: image.sample_count,
        preload: !(covers_level && full_mask),
        rect,
    })
}
