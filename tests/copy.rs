//! Copies that involve images.
#[path = "util.rs"]
mod util;

use tilejob::buffer::{BufferResource, ImageResource};
use tilejob::command::{BufferImageCopy, CopyRequest, ImageCopy, ImageSubresource};
use tilejob::descriptor::{AttributeBuffer, RenderTarget, TextureDescriptor};
use tilejob::format::{FormatError, FormatKey, OperationKind};
use tilejob::job::{DrawField, JobField, JobType};
use tilejob::pool::GpuAddress;
use tilejob::profile::ArchitectureProfile;
use tilejob::shaders::transfer::{BufferToImageParams, ImageToBufferParams};
use tilejob::{Device, EncodeError, Encoder, Pool};
use wgpu::{TextureAspect, TextureDimension, TextureFormat};

fn kernel_state(device: &Device, kind: OperationKind, key: FormatKey) -> GpuAddress {
    let entry = device.formats().lookup(kind, &key).expect("Kernel in table");
    device
        .registry()
        .transfer(entry.kernel)
        .expect("Kernel compiled")
        .renderer_state()
}

fn whole(aspect: TextureAspect) -> ImageSubresource {
    ImageSubresource::layers(aspect, 0, 1)
}

fn region(offset: [u32; 3], extent: [u32; 3]) -> BufferImageCopy {
    BufferImageCopy {
        buffer_offset: 0,
        buffer_row_length: 0,
        buffer_image_height: 0,
        image_subresource: whole(TextureAspect::All),
        image_offset: offset,
        image_extent: extent,
    }
}

fn image(format: TextureFormat, dimension: TextureDimension, extent: [u32; 3], layers: u32) -> ImageResource {
    ImageResource::linear(GpuAddress(0x4000_0000), format, dimension, extent, 1, layers)
        .expect("Format with a raw view")
}

fn err(request: CopyRequest<'_>, encoder: &mut Encoder<'_, '_>) -> EncodeError {
    encoder.encode_copy(&request).unwrap_err()
}

fn render_target(pool: &Pool, address: GpuAddress) -> RenderTarget {
    bytemuck::pod_read_unaligned(&pool.read_bytes(address, 64).unwrap())
}

#[test]
fn small_image_to_buffer() {
    util::init_logging();
    let (device, mut pool) = util::device(ArchitectureProfile::BIFROST);
    let src = util::image_2d(TextureFormat::R8Unorm, 4, 4);
    let dst = util::buffer(&mut pool, 16);

    let mut encoder = device.encoder(&mut pool);
    let jobs = encoder
        .encode_copy(&CopyRequest::ImageToBuffer {
            src: &src,
            dst: &dst,
            region: BufferImageCopy {
                buffer_row_length: 4,
                ..region([0; 3], [4, 4, 1])
            },
        })
        .unwrap();
    encoder.finish().unwrap();

    assert_eq!(jobs.len(), 1);
    let record = util::job(&pool, jobs[0]);
    assert_eq!(record.job_type(), JobType::Compute);
    assert_eq!(record.invocation().unwrap().decode(), ([16, 16, 1], [1, 1, 1]));

    let key = FormatKey {
        src: TextureFormat::R8Uint,
        dst: TextureFormat::R8Uint,
        write_mask: 0x1,
        dimension: TextureDimension::D2,
        is_array: false,
        is_multisampled: false,
    };
    let expected = kernel_state(&device, OperationKind::ImageToBuffer, key);
    assert_eq!(util::draw_pointer(&record, DrawField::State), expected);

    let params: ImageToBufferParams = util::pushed_params(&pool, &record);
    assert_eq!(params.dst, dst.base.0);
    assert_eq!(params.dst_row_stride, 4);
    assert_eq!(params.dst_slice_stride, 16);
    assert_eq!(params.extent, [4, 4, 1]);

    let textures = util::draw_pointer(&record, DrawField::Textures);
    let texture: TextureDescriptor =
        bytemuck::pod_read_unaligned(&pool.read_bytes(textures, 64).unwrap());
    assert_eq!((texture.width, texture.height), (3, 3));
    assert_eq!(texture.surface, src.base.0);
    assert!(!util::draw_pointer(&record, DrawField::Samplers).is_null());
}

#[test]
fn layers_to_buffer() {
    let (device, mut pool) = util::device(ArchitectureProfile::MIDGARD);
    let src = image(TextureFormat::Rgba8Unorm, TextureDimension::D2, [40, 20, 1], 4);
    let dst = util::buffer(&mut pool, 40 * 20 * 4 * 3);

    let mut encoder = device.encoder(&mut pool);
    let jobs = encoder
        .encode_copy(&CopyRequest::ImageToBuffer {
            src: &src,
            dst: &dst,
            region: BufferImageCopy {
                image_subresource: ImageSubresource {
                    aspect: TextureAspect::All,
                    mip_level: 0,
                    base_array_layer: 1,
                    layer_count: 3,
                },
                ..region([0; 3], [40, 20, 1])
            },
        })
        .unwrap();
    encoder.finish().unwrap();

    assert_eq!(jobs.len(), 3);
    for (i, &job) in jobs.iter().enumerate() {
        let record = util::job(&pool, job);
        assert_eq!(record.invocation().unwrap().workgroups(), [3, 2, 1]);

        let textures = util::draw_pointer(&record, DrawField::Textures);
        let texture: TextureDescriptor =
            bytemuck::pod_read_unaligned(&pool.read_bytes(textures, 64).unwrap());
        let layer = src.surface(0, 1 + i as u32).unwrap();
        assert_eq!(texture.surface, layer.0);
    }
}

#[test]
fn volume_to_buffer_is_one_job() {
    let (device, mut pool) = util::device(ArchitectureProfile::BIFROST);
    let src = image(TextureFormat::Rgba8Uint, TextureDimension::D3, [4, 4, 6], 1);
    let dst = util::buffer(&mut pool, 4 * 4 * 4 * 3);

    let mut encoder = device.encoder(&mut pool);
    let jobs = encoder
        .encode_copy(&CopyRequest::ImageToBuffer {
            src: &src,
            dst: &dst,
            region: region([0, 0, 2], [4, 4, 3]),
        })
        .unwrap();
    encoder.finish().unwrap();

    assert_eq!(jobs.len(), 1);
    let record = util::job(&pool, jobs[0]);
    assert_eq!(record.invocation().unwrap().workgroups(), [1, 1, 3]);

    let params: ImageToBufferParams = util::pushed_params(&pool, &record);
    assert_eq!(params.src_offset, [0, 0, 2]);
    assert_eq!(params.dst_slice_stride, 64);
}

#[test]
fn buffer_to_partial_image() {
    let (device, mut pool) = util::device(ArchitectureProfile::BIFROST);
    let src = util::buffer(&mut pool, 64);
    let dst = util::image_2d(TextureFormat::Rgba8Unorm, 8, 8);

    let mut encoder = device.encoder(&mut pool);
    let jobs = encoder
        .encode_copy(&CopyRequest::BufferToImage {
            src: &src,
            dst: &dst,
            region: region([2, 2, 0], [4, 4, 1]),
        })
        .unwrap();
    encoder.finish().unwrap();

    assert_eq!(jobs.len(), 1);
    let record = util::job(&pool, jobs[0]);
    assert_eq!(record.job_type(), JobType::Tiler);
    assert_eq!(record.read(JobField::VertexCount).unwrap(), 4);
    assert_eq!(record.read(JobField::PrimitiveControl).unwrap(), 0xa);

    let target = render_target(&pool, util::draw_pointer(&record, DrawField::Framebuffer));
    assert_eq!(target.base, dst.base.0);
    assert_eq!((target.width, target.height), (7, 7));
    assert_eq!(target.clip, [2, 2, 5, 5]);
    // Raw format, full write mask, single sample, preloaded.
    assert_eq!(target.format, 0x03 | (0xf << 8) | (1 << 16));

    let params: BufferToImageParams = util::pushed_params(&pool, &record);
    assert_eq!(params.src, src.base.0);
    assert_eq!(params.src_row_stride, 16);
    assert_eq!(params.dst_offset, [2, 2]);

    // Only the terminating record on this profile.
    let buffers = util::draw_pointer(&record, DrawField::AttributeBuffers);
    let padding: AttributeBuffer =
        bytemuck::pod_read_unaligned(&pool.read_bytes(buffers, 16).unwrap());
    assert_eq!(padding, AttributeBuffer::default());
    assert!(util::draw_pointer(&record, DrawField::Attributes).is_null());
}

#[test]
fn buffer_to_volume_slices() {
    let (device, mut pool) = util::device(ArchitectureProfile::MIDGARD);
    let src = util::buffer(&mut pool, 4 * 4 * 4 * 3);
    let dst = image(TextureFormat::Rgba8Unorm, TextureDimension::D3, [4, 4, 3], 1);

    let mut encoder = device.encoder(&mut pool);
    let jobs = encoder
        .encode_copy(&CopyRequest::BufferToImage {
            src: &src,
            dst: &dst,
            region: region([0; 3], [4, 4, 3]),
        })
        .unwrap();
    encoder.finish().unwrap();

    assert_eq!(jobs.len(), 3);
    let slice_stride = u64::from(dst.levels[0].slice_stride);
    for (i, &job) in jobs.iter().enumerate() {
        let record = util::job(&pool, job);
        let target = render_target(&pool, util::draw_pointer(&record, DrawField::Framebuffer));
        assert_eq!(target.base, dst.base.0 + i as u64 * slice_stride);
        // The whole slice is written, nothing to preload.
        assert_eq!(target.format >> 16, 0);
    }

    // No padding attribute buffer on this profile.
    let record = util::job(&pool, jobs[0]);
    assert!(util::draw_pointer(&record, DrawField::AttributeBuffers).is_null());
}

#[test]
fn image_layers_to_image() {
    let (device, mut pool) = util::device(ArchitectureProfile::BIFROST);
    let src = image(TextureFormat::R8Unorm, TextureDimension::D2, [8, 8, 1], 3);
    let dst = image(TextureFormat::R8Uint, TextureDimension::D2, [8, 8, 1], 2);

    let copy = ImageCopy {
        src_subresource: ImageSubresource {
            aspect: TextureAspect::All,
            mip_level: 0,
            base_array_layer: 1,
            layer_count: 2,
        },
        src_offset: [1, 2, 0],
        dst_subresource: ImageSubresource::layers(TextureAspect::All, 0, 2),
        dst_offset: [0, 0, 0],
        extent: [3, 3, 1],
    };

    let mut encoder = device.encoder(&mut pool);
    let jobs = encoder
        .encode_copy(&CopyRequest::ImageToImage {
            src: &src,
            dst: &dst,
            region: copy,
        })
        .unwrap();
    encoder.finish().unwrap();

    assert_eq!(jobs.len(), 2);
    let key = FormatKey {
        src: TextureFormat::R8Uint,
        dst: TextureFormat::R8Uint,
        write_mask: 0x1,
        dimension: TextureDimension::D2,
        is_array: true,
        is_multisampled: false,
    };
    let expected = kernel_state(&device, OperationKind::ImageToImage, key);

    for (i, &job) in jobs.iter().enumerate() {
        let record = util::job(&pool, job);
        assert_eq!(record.job_type(), JobType::Tiler);
        assert_eq!(util::draw_pointer(&record, DrawField::State), expected);

        let textures = util::draw_pointer(&record, DrawField::Textures);
        let texture: TextureDescriptor =
            bytemuck::pod_read_unaligned(&pool.read_bytes(textures, 64).unwrap());
        assert_eq!(texture.surface, src.surface(0, 1 + i as u32).unwrap().0);

        let target = render_target(&pool, util::draw_pointer(&record, DrawField::Framebuffer));
        assert_eq!(target.base, dst.surface(0, i as u32).unwrap().0);

        let buffers = util::draw_pointer(&record, DrawField::AttributeBuffers);
        let coords: AttributeBuffer =
            bytemuck::pod_read_unaligned(&pool.read_bytes(buffers, 16).unwrap());
        assert_eq!((coords.stride, coords.size), (16, 64));

        let vertices: Vec<[f32; 4]> =
            bytemuck::pod_collect_to_vec(&pool.read_bytes(GpuAddress(coords.pointer), 64).unwrap());
        assert_eq!(vertices[0], [1.0, 2.0, 0.0, 0.0]);
        assert_eq!(vertices[3], [4.0, 5.0, 0.0, 0.0]);
    }
}

#[test]
fn stencil_to_buffer() {
    let (device, mut pool) = util::device(ArchitectureProfile::BIFROST);
    let src = util::image_2d(TextureFormat::Depth24PlusStencil8, 4, 4);
    let dst = util::buffer(&mut pool, 16);

    let mut encoder = device.encoder(&mut pool);
    let jobs = encoder
        .encode_copy(&CopyRequest::ImageToBuffer {
            src: &src,
            dst: &dst,
            region: BufferImageCopy {
                image_subresource: whole(TextureAspect::StencilOnly),
                ..region([0; 3], [4, 4, 1])
            },
        })
        .unwrap();
    encoder.finish().unwrap();

    let key = FormatKey {
        src: TextureFormat::Rgba8Uint,
        dst: TextureFormat::R8Uint,
        write_mask: 0x8,
        dimension: TextureDimension::D2,
        is_array: false,
        is_multisampled: false,
    };
    let record = util::job(&pool, jobs[0]);
    let expected = kernel_state(&device, OperationKind::ImageToBuffer, key);
    assert_eq!(util::draw_pointer(&record, DrawField::State), expected);

    let params: ImageToBufferParams = util::pushed_params(&pool, &record);
    assert_eq!(params.dst_row_stride, 4);
}

#[test]
fn rejected_requests() {
    let (device, mut pool) = util::device(ArchitectureProfile::BIFROST);
    let r8 = util::image_2d(TextureFormat::R8Unorm, 4, 4);
    let rgba = util::image_2d(TextureFormat::Rgba8Unorm, 4, 4);
    let depth_stencil = util::image_2d(TextureFormat::Depth24PlusStencil8, 4, 4);
    let compressed = util::image_2d(TextureFormat::Bc1RgbaUnorm, 4, 4);
    let mut multisampled = util::image_2d(TextureFormat::Rgba8Unorm, 4, 4);
    multisampled.sample_count = 4;
    let buffer = BufferResource::new(GpuAddress(0x8000_0000), 32);

    let mut encoder = device.encoder(&mut pool);
    let to_buffer = |src, region| CopyRequest::ImageToBuffer {
        src,
        dst: &buffer,
        region,
    };

    let full = region([0; 3], [4, 4, 1]);

    // 64 bytes do not fit.
    assert!(matches!(
        err(to_buffer(&rgba, full), &mut encoder),
        EncodeError::BufferOutOfBounds { .. }
    ));
    assert_eq!(
        err(to_buffer(&r8, region([2, 0, 0], [4, 4, 1])), &mut encoder),
        EncodeError::RegionOutOfBounds
    );
    assert_eq!(
        err(to_buffer(&multisampled, full), &mut encoder),
        EncodeError::Multisampled
    );
    assert_eq!(
        err(to_buffer(&compressed, full), &mut encoder),
        EncodeError::Format(FormatError::Compressed(TextureFormat::Bc1RgbaUnorm))
    );
    assert!(matches!(
        err(to_buffer(&depth_stencil, full), &mut encoder),
        EncodeError::Format(FormatError::Aspect { .. })
    ));

    let misaligned = BufferImageCopy {
        buffer_offset: 2,
        ..region([0; 3], [1, 1, 1])
    };
    assert_eq!(
        err(to_buffer(&rgba, misaligned), &mut encoder),
        EncodeError::Misaligned { value: 2, align: 4 }
    );

    let layers = BufferImageCopy {
        image_subresource: ImageSubresource::layers(TextureAspect::All, 0, 2),
        ..full
    };
    assert_eq!(
        err(to_buffer(&r8, layers), &mut encoder),
        EncodeError::SubresourceOutOfRange
    );

    let copy = ImageCopy {
        src_subresource: whole(TextureAspect::All),
        src_offset: [0; 3],
        dst_subresource: whole(TextureAspect::All),
        dst_offset: [0; 3],
        extent: [4, 4, 1],
    };
    let between = |src, dst| CopyRequest::ImageToImage {
        src,
        dst,
        region: copy,
    };

    assert_eq!(
        err(between(&r8, &rgba), &mut encoder),
        EncodeError::IncompatibleFormats {
            src: TextureFormat::R8Unorm,
            dst: TextureFormat::Rgba8Unorm,
        }
    );
    assert_eq!(
        err(between(&multisampled, &rgba), &mut encoder),
        EncodeError::SampleCountMismatch { src: 4, dst: 1 }
    );

    // Nothing was appended by the failed requests.
    assert!(encoder.stream().is_empty());
}
