//! The kernel registry.
//!
//! All kernels are compiled once, when the device is created, and never change afterwards. The
//! registry is then shared read-only by every encoder of the device.
use core::fmt;
use std::collections::HashMap;

use crate::descriptor::{self, RENDERER_STATE_ALIGNMENT};
use crate::format::{self, Conversion, FormatError, FormatResolver, TableError};
use crate::job::LayoutError;
use crate::pool::{GpuAddress, PoolError, ScratchPool};
use crate::profile::ArchitectureProfile;
use crate::shaders::{indirect, ir, KernelBody, KernelKey, KernelSource};

/// The pipeline stage a kernel runs in.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Stage {
    Compute,
    Fragment,
}

/// A range of the parameter blob delivered as push constants.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct PushRange {
    pub source_offset: u32,
    pub size: u32,
}

/// The resource usage of a compiled kernel, as reported by the compiler.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct KernelMetadata {
    /// Parameter ranges pushed, in push blob order.
    pub push_constants: Vec<PushRange>,
    /// The kernel reads parameters that were not pushed.
    pub uniform_buffer_required: bool,
    pub texture_count: u8,
    pub sampler_count: u8,
    pub work_register_count: u8,
    /// Per-stage preload flags of the renderer state.
    pub preload: u32,
    /// Per-thread scratch memory in bytes.
    pub scratch_size: u32,
    /// Number of system values the kernel expects to be provided.
    pub sysval_count: u32,
}

/// Turns kernel sources into machine code.
pub trait Compiler {
    fn compile(
        &mut self,
        source: &KernelSource,
        profile: &ArchitectureProfile,
    ) -> Result<(Vec<u8>, KernelMetadata), CompileError>;
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CompileError {
    pub kernel: KernelKey,
    pub reason: String,
}

/// A kernel with its binary and renderer state resident in GPU memory.
#[derive(Clone, Debug)]
pub struct CompiledKernel {
    source: KernelSource,
    binary: Vec<u8>,
    metadata: KernelMetadata,
    binary_address: GpuAddress,
    renderer_state: GpuAddress,
}

/// Every kernel of a device.
#[derive(Debug)]
pub struct KernelRegistry {
    profile: ArchitectureProfile,
    kernels: HashMap<KernelKey, CompiledKernel>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum InitError {
    Table(TableError),
    Compile(CompileError),
    Pool(PoolError),
    Layout(LayoutError),
    Format(FormatError),
    /// A push range lies outside of the kernel's parameter blob.
    PushRange {
        kernel: KernelKey,
        range: PushRange,
        param_size: u32,
    },
    WorkRegisters {
        kernel: KernelKey,
        count: u8,
        max: u8,
    },
    /// The indirect patch kernel needs more than its parameters.
    PatchSideEffects { scratch_size: u32, sysval_count: u32 },
}

/// Binaries are aligned to a cache line of the instruction cache.
const BINARY_ALIGNMENT: u64 = 128;

impl KernelRegistry {
    /// Compile and upload the kernels of all table entries and the indirect patch kernel.
    ///
    /// Fails as a whole if any single kernel fails to compile or validate.
    pub fn build(
        profile: &ArchitectureProfile,
        formats: &dyn FormatResolver,
        compiler: &mut dyn Compiler,
        pool: &mut dyn ScratchPool,
    ) -> Result<Self, InitError> {
        format::check_consistency(formats)?;

        let mut sources = vec![];
        formats.for_each_entry(&mut |kind, key, entry| {
            sources.push(KernelSource::transfer(kind, key, entry));
        });
        sources.push(indirect::source()?);

        let mut kernels = HashMap::with_capacity(sources.len());
        for source in sources {
            let (binary, metadata) = compiler.compile(&source, profile)?;
            validate(profile, &source, &metadata)?;

            let binary_address = pool.upload(&binary, BINARY_ALIGNMENT)?;
            let blend = match &source.body {
                KernelBody::Transfer(transfer) => match &transfer.conversion {
                    Conversion::Blend(params) => Some(*params),
                    Conversion::Store { .. } => None,
                },
                KernelBody::Program(_) => None,
            };

            let state =
                descriptor::renderer_state(binary_address, source.stage, &metadata, blend.as_ref())?;
            let renderer_state =
                pool.upload(bytemuck::bytes_of(&state), RENDERER_STATE_ALIGNMENT)?;

            log::trace!(
                "kernel {:?}: {} bytes at {:#x}",
                source.key,
                binary.len(),
                binary_address.0
            );

            kernels.insert(
                source.key,
                CompiledKernel {
                    source,
                    binary,
                    metadata,
                    binary_address,
                    renderer_state,
                },
            );
        }

        log::debug!("compiled {} kernels for {}", kernels.len(), profile.name);

        Ok(KernelRegistry {
            profile: profile.clone(),
            kernels,
        })
    }

    pub fn profile(&self) -> &ArchitectureProfile {
        &self.profile
    }

    pub fn get(&self, key: KernelKey) -> Option<&CompiledKernel> {
        self.kernels.get(&key)
    }

    pub fn transfer(&self, kernel: format::KernelId) -> Option<&CompiledKernel> {
        self.get(KernelKey::Transfer(kernel))
    }

    pub fn indirect_patch(&self) -> Option<&CompiledKernel> {
        self.get(KernelKey::IndirectPatch)
    }

    /// Find the kernel whose renderer state lives at `address`.
    pub fn by_renderer_state(&self, address: GpuAddress) -> Option<&CompiledKernel> {
        self.kernels
            .values()
            .find(|kernel| kernel.renderer_state == address)
    }

    pub fn len(&self) -> usize {
        self.kernels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.kernels.is_empty()
    }
}

impl CompiledKernel {
    pub fn key(&self) -> KernelKey {
        self.source.key
    }

    pub fn source(&self) -> &KernelSource {
        &self.source
    }

    pub fn program(&self) -> Option<&ir::Program> {
        self.source.program()
    }

    pub fn binary(&self) -> &[u8] {
        &self.binary
    }

    pub fn metadata(&self) -> &KernelMetadata {
        &self.metadata
    }

    pub fn binary_address(&self) -> GpuAddress {
        self.binary_address
    }

    pub fn renderer_state(&self) -> GpuAddress {
        self.renderer_state
    }
}

fn validate(
    profile: &ArchitectureProfile,
    source: &KernelSource,
    metadata: &KernelMetadata,
) -> Result<(), InitError> {
    let param_size = source.params.size;
    for &range in &metadata.push_constants {
        let end = range.source_offset.checked_add(range.size);
        if end.map_or(true, |end| end > param_size) {
            log::error!("kernel {:?} pushes {:?} of {} bytes", source.key, range, param_size);
            return Err(InitError::PushRange {
                kernel: source.key,
                range,
                param_size,
            });
        }
    }

    if metadata.work_register_count > profile.max_work_registers {
        return Err(InitError::WorkRegisters {
            kernel: source.key,
            count: metadata.work_register_count,
            max: profile.max_work_registers,
        });
    }

    if source.key == KernelKey::IndirectPatch
        && (metadata.scratch_size != 0 || metadata.sysval_count != 0)
    {
        log::error!("indirect patch kernel is not free of side tables: {:?}", metadata);
        return Err(InitError::PatchSideEffects {
            scratch_size: metadata.scratch_size,
            sysval_count: metadata.sysval_count,
        });
    }

    Ok(())
}

impl From<TableError> for InitError {
    fn from(err: TableError) -> Self {
        InitError::Table(err)
    }
}

impl From<CompileError> for InitError {
    fn from(err: CompileError) -> Self {
        InitError::Compile(err)
    }
}

impl From<PoolError> for InitError {
    fn from(err: PoolError) -> Self {
        InitError::Pool(err)
    }
}

impl From<LayoutError> for InitError {
    fn from(err: LayoutError) -> Self {
        InitError::Layout(err)
    }
}

impl From<FormatError> for InitError {
    fn from(err: FormatError) -> Self {
        InitError::Format(err)
    }
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "failed to compile {:?}: {}", self.kernel, self.reason)
    }
}

impl std::error::Error for CompileError {}

impl fmt::Display for InitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InitError::Table(err) => write!(f, "inconsistent format table: {}", err),
            InitError::Compile(err) => err.fmt(f),
            InitError::Pool(err) => err.fmt(f),
            InitError::Layout(err) => err.fmt(f),
            InitError::Format(err) => err.fmt(f),
            InitError::PushRange {
                kernel,
                range,
                param_size,
            } => write!(
                f,
                "kernel {:?} pushes {} bytes at {} of a {} byte parameter blob",
                kernel, range.size, range.source_offset, param_size
            ),
            InitError::WorkRegisters { kernel, count, max } => write!(
                f,
                "kernel {:?} needs {} work registers, at most {} are available",
                kernel, count, max
            ),
            InitError::PatchSideEffects {
                scratch_size,
                sysval_count,
            } => write!(
                f,
                "indirect patch kernel requires {} scratch bytes and {} system values",
                scratch_size, sysval_count
            ),
        }
    }
}

impl std::error::Error for InitError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            InitError::Table(err) => Some(err),
            InitError::Compile(err) => Some(err),
            InitError::Pool(err) => Some(err),
            InitError::Layout(err) => Some(err),
            InitError::Format(err) => Some(err),
            _ => None,
        }
    }
}
