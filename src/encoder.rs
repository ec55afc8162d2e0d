//! Turns requests into jobs of one stream.
//!
//! Each operation resolves its table entry and kernel, uploads a parameter blob and the
//! descriptors the kernel needs, and appends one or more jobs. All descriptors are written
//! exactly once, the jobs themselves are uploaded when the stream is finished.
use core::fmt;

use wgpu::TextureFormat;

use crate::descriptor::{self, UniformPush};
use crate::device::Device;
use crate::format::{FormatError, FormatKey, OperationKind};
use crate::job::{
    pack_invocation, ClosedStream, DrawDescriptor, Invocation, JobDescription, JobHandle,
    JobStream, LayoutError, PackError,
};
use crate::kernel::CompiledKernel;
use crate::pool::{GpuAddress, PoolError, ScratchPool};
use crate::shaders::KernelParams;

mod copy;
mod dispatch;
mod fill;

pub use self::copy::buffer_block_size;
pub use self::fill::MAX_UPDATE_SIZE;
pub use self::dispatch::IndirectDispatch;

/// Records the jobs of one stream.
///
/// Not shared between threads, create one encoder per stream instead.
pub struct Encoder<'dev, 'pool> {
    device: &'dev Device,
    pool: &'pool mut dyn ScratchPool,
    stream: JobStream,
    /// Shared by all compute jobs of the stream, created on first use.
    thread_storage: Option<GpuAddress>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EncodeError {
    Format(FormatError),
    /// The format table has no entry for a key built from a valid request.
    NoKernel {
        kind: OperationKind,
        key: FormatKey,
    },
    /// The two sides of an image copy do not have the same raw view.
    IncompatibleFormats {
        src: TextureFormat,
        dst: TextureFormat,
    },
    /// Copies between images of different dimensions.
    DimensionMismatch,
    SampleCountMismatch {
        src: u32,
        dst: u32,
    },
    /// The operation does not support multisampled images.
    Multisampled,
    InvalidImage(crate::buffer::ImageError),
    /// Mip level or layers do not exist in the image.
    SubresourceOutOfRange,
    /// The region does not fit into the selected level.
    RegionOutOfBounds,
    BufferOutOfBounds {
        offset: u64,
        size: u64,
        buffer_size: u64,
    },
    Misaligned {
        value: u64,
        align: u64,
    },
    UpdateTooLarge {
        size: usize,
    },
    TooLarge {
        what: &'static str,
        value: u64,
    },
    Invocation(PackError),
    /// The stream was already finished.
    StreamClosed,
    /// Streams hold at most 65535 jobs.
    TooManyJobs,
    /// A dispatch without a renderer state.
    MissingRendererState,
    Pool(PoolError),
    Layout(LayoutError),
    /// An internal inconsistency, at the given source line.
    Internal {
        line: u32,
    },
}

impl<'dev, 'pool> Encoder<'dev, 'pool> {
    pub(crate) fn new(device: &'dev Device, pool: &'pool mut dyn ScratchPool) -> Self {
        Encoder {
            device,
            pool,
            stream: JobStream::new(),
            thread_storage: None,
        }
    }

    pub fn device(&self) -> &'dev Device {
        self.device
    }

    /// The jobs recorded so far.
    pub fn stream(&self) -> &JobStream {
        &self.stream
    }

    /// Link and upload all jobs.
    pub fn finish(mut self) -> Result<ClosedStream, EncodeError> {
        self.stream.close(&mut *self.pool)
    }

    /// The kernel of a table entry.
    fn transfer_kernel(
        &self,
        kind: OperationKind,
        key: &FormatKey,
    ) -> Result<&'dev CompiledKernel, EncodeError> {
        let device = self.device;
        let entry = match device.formats().lookup(kind, key) {
            Some(entry) => entry,
            None => {
                log::error!("no {:?} kernel for {:?}", kind, key);
                return Err(EncodeError::NoKernel { kind, key: *key });
            }
        };

        device
            .registry()
            .transfer(entry.kernel)
            .ok_or_else(|| EncodeError::internal(line!()))
    }

    fn thread_storage(&mut self) -> Result<GpuAddress, EncodeError> {
        if let Some(address) = self.thread_storage {
            return Ok(address);
        }

        let address = descriptor::build_thread_storage(&mut *self.pool)?;
        self.thread_storage = Some(address);
        Ok(address)
    }

    fn upload_params<P: KernelParams>(
        &mut self,
        kernel: &CompiledKernel,
        params: &P,
    ) -> Result<UniformPush, EncodeError> {
        descriptor::build_uniform_and_push(
            &mut *self.pool,
            self.device.profile(),
            kernel.metadata(),
            bytemuck::bytes_of(params),
        )
    }

    fn invocation(&self, local: [u32; 3], groups: [u32; 3]) -> Result<Invocation, EncodeError> {
        Ok(pack_invocation(
            local,
            groups,
            self.device.profile().invocation_field_bits,
        )?)
    }

    /// Append a compute job running a transfer kernel.
    fn transfer_compute<P: KernelParams>(
        &mut self,
        kernel: &CompiledKernel,
        params: &P,
        draw: DrawDescriptor,
        local: [u32; 3],
        groups: [u32; 3],
    ) -> Result<JobHandle, EncodeError> {
        let invocation = self.invocation(local, groups)?;
        let uniforms = self.upload_params(kernel, params)?;

        let draw = DrawDescriptor {
            state: kernel.renderer_state(),
            thread_storage: self.thread_storage()?,
            uniform_buffers: uniforms.uniform_buffers,
            push_uniforms: uniforms.push_uniforms,
            ..draw
        };

        self.stream
            .append_job(&mut *self.pool, JobDescription::compute(draw, invocation))
    }

    /// Append compute jobs processing `blocks` linear blocks of `1 << log2` bytes.
    ///
    /// Each job covers as many blocks as the invocation fields can count, `params` receives the
    /// byte offset of the first block of a job.
    fn linear_jobs<P: KernelParams>(
        &mut self,
        kernel: &CompiledKernel,
        blocks: u64,
        log2: u32,
        params: impl Fn(u64) -> P,
    ) -> Result<Vec<JobHandle>, EncodeError> {
        let per_job = 1u64 << self.device.profile().invocation_field_bits.min(31);

        let mut handles = Vec::with_capacity(blocks.div_ceil(per_job) as usize);
        let mut done = 0;
        while done < blocks {
            let count = (blocks - done).min(per_job);
            let blob = params(done << log2);
            let groups = [count as u32, 1, 1];
            handles.push(self.transfer_compute(
                kernel,
                &blob,
                DrawDescriptor::default(),
                [1, 1, 1],
                groups,
            )?);
            done += count;
        }

        Ok(handles)
    }
}

impl EncodeError {
    pub(crate) fn internal(line: u32) -> Self {
        log::error!("internal encoder error at line {}", line);
        EncodeError::Internal { line }
    }

    /// Whether the error stems from an inconsistency of the encoder itself, rather than from
    /// the request.
    pub fn is_internal(&self) -> bool {
        matches!(
            self,
            EncodeError::Internal { .. } | EncodeError::NoKernel { .. } | EncodeError::Layout(_)
        )
    }
}

impl From<FormatError> for EncodeError {
    fn from(err: FormatError) -> Self {
        EncodeError::Format(err)
    }
}

impl From<PoolError> for EncodeError {
    fn from(err: PoolError) -> Self {
        EncodeError::Pool(err)
    }
}

impl From<LayoutError> for EncodeError {
    fn from(err: LayoutError) -> Self {
        EncodeError::Layout(err)
    }
}

impl From<PackError> for EncodeError {
    fn from(err: PackError) -> Self {
        EncodeError::Invocation(err)
    }
}

impl From<crate::buffer::ImageError> for EncodeError {
    fn from(err: crate::buffer::ImageError) -> Self {
        EncodeError::InvalidImage(err)
    }
}

impl fmt::Display for EncodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EncodeError::Format(err) => err.fmt(f),
            EncodeError::NoKernel { kind, key } => {
                write!(f, "no {:?} kernel for {:?}", kind, key)
            }
            EncodeError::IncompatibleFormats { src, dst } => {
                write!(f, "can not copy between {:?} and {:?}", src, dst)
            }
            EncodeError::DimensionMismatch => f.write_str("images differ in dimension"),
            EncodeError::SampleCountMismatch { src, dst } => {
                write!(f, "sample counts {} and {} differ", src, dst)
            }
            EncodeError::Multisampled => f.write_str("operation requires single sampled images"),
            EncodeError::InvalidImage(err) => write!(f, "invalid image: {:?}", err),
            EncodeError::SubresourceOutOfRange => f.write_str("subresource not in image"),
            EncodeError::RegionOutOfBounds => f.write_str("region not inside image level"),
            EncodeError::BufferOutOfBounds {
                offset,
                size,
                buffer_size,
            } => write!(
                f,
                "{} bytes at {} exceed buffer of {} bytes",
                size, offset, buffer_size
            ),
            EncodeError::Misaligned { value, align } => {
                write!(f, "{:#x} is not aligned to {}", value, align)
            }
            EncodeError::UpdateTooLarge { size } => {
                write!(f, "update of {} bytes exceeds 65536 bytes", size)
            }
            EncodeError::TooLarge { what, value } => write!(f, "{} of {} too large", what, value),
            EncodeError::Invocation(err) => err.fmt(f),
            EncodeError::StreamClosed => f.write_str("job stream already closed"),
            EncodeError::TooManyJobs => f.write_str("job stream is full"),
            EncodeError::MissingRendererState => f.write_str("dispatch has no renderer state"),
            EncodeError::Pool(err) => err.fmt(f),
            EncodeError::Layout(err) => err.fmt(f),
            EncodeError::Internal { line } => write!(f, "internal error at line {}", line),
        }
    }
}

impl std::error::Error for EncodeError {}
