// This is almost certainly not all used in all tests.
#![allow(dead_code)]
use tilejob::buffer::{BufferResource, ImageResource};
use tilejob::job::{DrawField, JobField, JobHandle, JobRecord};
use tilejob::kernel::{CompileError, Compiler, KernelMetadata, PushRange};
use tilejob::pool::{GpuAddress, ScratchPool};
use tilejob::profile::ArchitectureProfile;
use tilejob::run::read_record;
use tilejob::shaders::KernelSource;
use tilejob::{Device, Pool};

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Stands in for the real shader compiler.
///
/// On profiles that preload push constants every parameter field is pushed, otherwise all
/// parameters are read from the uniform buffer.
#[derive(Default)]
pub struct MockCompiler {
    pub compiled: usize,
    /// Adjusts the reported metadata of each kernel.
    pub tweak: Option<fn(&KernelSource, &mut KernelMetadata)>,
    /// Fail on the n-th kernel.
    pub fail_at: Option<usize>,
}

impl Compiler for MockCompiler {
    fn compile(
        &mut self,
        source: &KernelSource,
        profile: &ArchitectureProfile,
    ) -> Result<(Vec<u8>, KernelMetadata), CompileError> {
        if self.fail_at == Some(self.compiled) {
            return Err(CompileError {
                kernel: source.key,
                reason: "refused by the mock".into(),
            });
        }

        self.compiled += 1;

        let mut metadata = KernelMetadata {
            work_register_count: 8,
            ..KernelMetadata::default()
        };

        if profile.preloads_push_constants() {
            metadata.push_constants = source
                .params
                .fields
                .iter()
                .map(|field| PushRange {
                    source_offset: field.offset,
                    size: field.size,
                })
                .collect();
        } else {
            metadata.uniform_buffer_required = true;
        }

        if source.samples_texture() {
            metadata.texture_count = 1;
            metadata.sampler_count = 1;
        }

        if let Some(tweak) = self.tweak {
            tweak(source, &mut metadata);
        }

        let binary = format!("{:?}", source.key).into_bytes();
        Ok((binary, metadata))
    }
}

/// A device with the standard table, and the pool holding its kernels.
pub fn device(profile: ArchitectureProfile) -> (Device, Pool) {
    let mut pool = Pool::new();
    let device = Device::new(profile, &mut MockCompiler::default(), &mut pool)
        .expect("Mock compiler accepts every kernel");
    (device, pool)
}

/// A zeroed buffer allocated from the pool.
pub fn buffer(pool: &mut Pool, size: u64) -> BufferResource {
    let base = pool
        .upload(&vec![0; size as usize], 64)
        .expect("Pool to have space for the buffer");
    BufferResource::new(base, size)
}

/// A 2D image that is not backed by memory, for encoding only.
pub fn image_2d(format: wgpu::TextureFormat, width: u32, height: u32) -> ImageResource {
    ImageResource::linear(
        GpuAddress(0x4000_0000),
        format,
        wgpu::TextureDimension::D2,
        [width, height, 1],
        1,
        1,
    )
    .expect("Format with a raw view")
}

/// Read a job back after its stream was closed.
pub fn job(pool: &Pool, handle: JobHandle) -> JobRecord {
    read_record(pool, handle.address()).expect("Job to be uploaded")
}

/// The parameters a job pushes, on profiles that push every parameter field.
pub fn pushed_params<P: bytemuck::Pod>(pool: &Pool, record: &JobRecord) -> P {
    let push = record
        .read(JobField::Draw(DrawField::PushUniforms))
        .expect("Job with a DRAW section");
    let bytes = pool
        .read_bytes(GpuAddress(push), core::mem::size_of::<P>())
        .expect("Push constants to be uploaded");
    bytemuck::pod_read_unaligned(&bytes)
}

/// The address a DRAW pointer of a job refers to.
pub fn draw_pointer(record: &JobRecord, field: DrawField) -> GpuAddress {
    GpuAddress(record.read(JobField::Draw(field)).expect("Job with a DRAW section"))
}
