//! Binary job records.
//!
//! A job is a fixed 32-byte header followed by a payload that depends on the job type. All
//! accesses go through [`JobField`], which knows at which offset and with which width a field
//! lives in a record of a given type. Offsets are never spelled out anywhere else, in
//! particular not in the indirect dispatch patch kernel, which asks for
//! [`JobField::layout`] of the fields it rewrites.
//!
//! | offset | size | field |
//! |---|---|---|
//! | 0x00 | 4 | exception status |
//! | 0x04 | 4 | first incomplete task |
//! | 0x08 | 8 | fault pointer |
//! | 0x10 | 4 | control: descriptor size (bit 0), type (bits 1..8), barrier (8), last (9), index (16..32) |
//! | 0x14 | 2 | dependency 1 |
//! | 0x16 | 2 | dependency 2 |
//! | 0x18 | 8 | next job |
//! | 0x20 | 16 | INVOCATION |
//! | 0x30 | 16 | PRIMITIVE (tiler jobs) |
//! | 0x40 | 0x70 | DRAW |
use core::fmt;

use crate::pool::GpuAddress;
use crate::util::Bits;

mod invocation;
mod stream;

pub use self::invocation::{pack_invocation, Invocation, PackError};
pub(crate) use self::invocation::{SHIFT_WG_X, SHIFT_WG_Y, SHIFT_WG_Z};
pub use self::stream::{
    ClosedStream, DrawDescriptor, DrawMode, JobDescription, JobHandle, JobSlot, JobStream,
    Primitive, Scoreboard, StreamState,
};

/// The type of a job, as understood by the hardware job manager.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum JobType {
    NotStarted = 0,
    /// A job that completes without doing anything.
    Null = 1,
    WriteValue = 2,
    CacheFlush = 3,
    Compute = 4,
    Vertex = 5,
    Tiler = 7,
    Fragment = 9,
}

/// Jobs of the same class run on the same part of the pipeline and need no ordering between
/// each other unless explicitly requested.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PipelineClass {
    Dispatch,
    Raster,
    Other,
}

/// A field of a job record.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum JobField {
    ExceptionStatus,
    FirstIncompleteTask,
    FaultPointer,
    Control,
    Dependency1,
    Dependency2,
    NextJob,
    /// The packed size-minus-one values of local size and workgroup counts.
    Invocations,
    /// The split of each packed dimension.
    InvocationShifts,
    ThreadGroupSplit,
    PrimitiveControl,
    BaseVertex,
    VertexCount,
    Draw(DrawField),
}

/// The pointers of the DRAW section, in record order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DrawField {
    State,
    ThreadStorage,
    UniformBuffers,
    PushUniforms,
    Textures,
    Samplers,
    Attributes,
    AttributeBuffers,
    Varyings,
    VaryingBuffers,
    Position,
    Viewport,
    Framebuffer,
    Flags,
}

/// Where a field lives in a record.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FieldLayout {
    pub offset: usize,
    pub size: usize,
}

/// A job record under construction, or read back from memory.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct JobRecord {
    ty: JobType,
    bytes: Vec<u8>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LayoutError {
    /// The field is not part of records of this type.
    NoSuchField { ty: JobType, field: JobField },
    /// The value is wider than the field.
    ValueTooWide { field: JobField, value: u64 },
    /// The bytes are not a record of a known type, or too short for it.
    Malformed,
}

/// Alignment of every job record.
pub const JOB_ALIGNMENT: u64 = 64;

const HEADER_SIZE: usize = 0x20;
const INVOCATION_OFFSET: usize = 0x20;
const PRIMITIVE_OFFSET: usize = 0x30;
const DRAW_OFFSET: usize = 0x40;
const DRAW_SIZE: usize = 0x70;
const PAYLOAD_RECORD_SIZE: usize = DRAW_OFFSET + DRAW_SIZE;

pub(crate) const CONTROL_DESCRIPTOR_SIZE: Bits = Bits::new(0, 1);
pub(crate) const CONTROL_TYPE: Bits = Bits::new(1, 7);
pub(crate) const CONTROL_BARRIER: Bits = Bits::new(8, 1);
pub(crate) const CONTROL_LAST: Bits = Bits::new(9, 1);
pub(crate) const CONTROL_INDEX: Bits = Bits::new(16, 16);

impl JobType {
    pub const ALL: [Self; 8] = [
        JobType::NotStarted,
        JobType::Null,
        JobType::WriteValue,
        JobType::CacheFlush,
        JobType::Compute,
        JobType::Vertex,
        JobType::Tiler,
        JobType::Fragment,
    ];

    pub fn code(self) -> u32 {
        self as u32
    }

    pub fn from_code(code: u32) -> Option<Self> {
        Self::ALL.into_iter().find(|ty| ty.code() == code)
    }

    pub fn class(self) -> PipelineClass {
        match self {
            JobType::Compute | JobType::Vertex => PipelineClass::Dispatch,
            JobType::Tiler | JobType::Fragment => PipelineClass::Raster,
            _ => PipelineClass::Other,
        }
    }

    /// Whether jobs of the two types may run without ordering between them.
    pub fn is_compatible(self, other: JobType) -> bool {
        self.class() == other.class()
    }

    /// The size in bytes of a record of this type.
    pub fn record_size(self) -> usize {
        if self.has_draw() {
            PAYLOAD_RECORD_SIZE
        } else {
            HEADER_SIZE
        }
    }

    /// Whether the record carries the INVOCATION and DRAW sections.
    pub fn has_draw(self) -> bool {
        matches!(self, JobType::Compute | JobType::Vertex | JobType::Tiler)
    }

    /// Whether the record carries a PRIMITIVE section.
    pub fn has_primitive(self) -> bool {
        self == JobType::Tiler
    }
}

impl JobField {
    /// Locate the field in a record of type `ty`.
    pub fn layout(self, ty: JobType) -> Result<FieldLayout, LayoutError> {
        let (offset, size) = match self {
            JobField::ExceptionStatus => (0x00, 4),
            JobField::FirstIncompleteTask => (0x04, 4),
            JobField::FaultPointer => (0x08, 8),
            JobField::Control => (0x10, 4),
            JobField::Dependency1 => (0x14, 2),
            JobField::Dependency2 => (0x16, 2),
            JobField::NextJob => (0x18, 8),
            JobField::Invocations if ty.has_draw() => (INVOCATION_OFFSET, 8),
            JobField::InvocationShifts if ty.has_draw() => (INVOCATION_OFFSET + 8, 4),
            JobField::ThreadGroupSplit if ty.has_draw() => (INVOCATION_OFFSET + 12, 4),
            JobField::PrimitiveControl if ty.has_primitive() => (PRIMITIVE_OFFSET, 4),
            JobField::BaseVertex if ty.has_primitive() => (PRIMITIVE_OFFSET + 4, 4),
            JobField::VertexCount if ty.has_primitive() => (PRIMITIVE_OFFSET + 8, 4),
            JobField::Draw(DrawField::Flags) if ty.has_draw() => (DRAW_OFFSET + 0x68, 4),
            JobField::Draw(pointer) if ty.has_draw() => (DRAW_OFFSET + 8 * pointer.index(), 8),
            _ => return Err(LayoutError::NoSuchField { ty, field: self }),
        };

        Ok(FieldLayout { offset, size })
    }

    /// The GPU address of this field within the job stored at `job`.
    pub fn address_in(self, ty: JobType, job: GpuAddress) -> Result<GpuAddress, LayoutError> {
        Ok(job.offset(self.layout(ty)?.offset as u64))
    }
}

impl DrawField {
    pub const POINTERS: [Self; 13] = [
        DrawField::State,
        DrawField::ThreadStorage,
        DrawField::UniformBuffers,
        DrawField::PushUniforms,
        DrawField::Textures,
        DrawField::Samplers,
        DrawField::Attributes,
        DrawField::AttributeBuffers,
        DrawField::Varyings,
        DrawField::VaryingBuffers,
        DrawField::Position,
        DrawField::Viewport,
        DrawField::Framebuffer,
    ];

    fn index(self) -> usize {
        Self::POINTERS
            .iter()
            .position(|&field| field == self)
            .unwrap_or(Self::POINTERS.len())
    }
}

impl JobRecord {
    /// A zero-filled record with only its type and descriptor size set.
    pub fn new(ty: JobType) -> Self {
        let mut record = JobRecord {
            ty,
            bytes: vec![0; ty.record_size()],
        };

        let control = CONTROL_DESCRIPTOR_SIZE.mask() | (ty.code() << CONTROL_TYPE.shift);
        record.put(0x10, 4, u64::from(control));
        record
    }

    /// Interpret bytes as a record, taking the type from its control word.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, LayoutError> {
        let control = bytes
            .get(0x10..0x14)
            .ok_or(LayoutError::Malformed)?;
        let control = u32::from_le_bytes([control[0], control[1], control[2], control[3]]);
        let ty = JobType::from_code(CONTROL_TYPE.extract(control)).ok_or(LayoutError::Malformed)?;

        let bytes = bytes.get(..ty.record_size()).ok_or(LayoutError::Malformed)?;
        Ok(JobRecord {
            ty,
            bytes: bytes.to_vec(),
        })
    }

    pub fn job_type(&self) -> JobType {
        self.ty
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn read(&self, field: JobField) -> Result<u64, LayoutError> {
        let FieldLayout { offset, size } = field.layout(self.ty)?;
        let mut word = [0u8; 8];
        word[..size].copy_from_slice(&self.bytes[offset..][..size]);
        Ok(u64::from_le_bytes(word))
    }

    pub fn write(&mut self, field: JobField, value: u64) -> Result<(), LayoutError> {
        let FieldLayout { offset, size } = field.layout(self.ty)?;

        if size < 8 && value >> (8 * size) != 0 {
            return Err(LayoutError::ValueTooWide { field, value });
        }

        self.put(offset, size, value);
        Ok(())
    }

    pub fn write_address(&mut self, field: JobField, address: GpuAddress) -> Result<(), LayoutError> {
        self.write(field, address.0)
    }

    /// The index of the job within its stream, starting at one.
    pub fn index(&self) -> u16 {
        CONTROL_INDEX.extract(self.control()) as u16
    }

    pub fn dependencies(&self) -> [u16; 2] {
        let dep = |field| self.read(field).unwrap_or_default() as u16;
        [dep(JobField::Dependency1), dep(JobField::Dependency2)]
    }

    pub fn is_last(&self) -> bool {
        CONTROL_LAST.extract(self.control()) != 0
    }

    pub fn has_barrier(&self) -> bool {
        CONTROL_BARRIER.extract(self.control()) != 0
    }

    pub fn next(&self) -> GpuAddress {
        GpuAddress(self.read(JobField::NextJob).unwrap_or_default())
    }

    pub fn invocation(&self) -> Result<Invocation, LayoutError> {
        Ok(Invocation::from_words(
            self.read(JobField::Invocations)?,
            self.read(JobField::InvocationShifts)? as u32,
            self.read(JobField::ThreadGroupSplit)? as u32,
        ))
    }

    pub fn set_invocation(&mut self, invocation: &Invocation) -> Result<(), LayoutError> {
        self.write(JobField::Invocations, invocation.packed)?;
        self.write(JobField::InvocationShifts, u64::from(invocation.shift_word()))?;
        self.write(JobField::ThreadGroupSplit, u64::from(invocation.split))
    }

    pub(crate) fn set_control_bits(&mut self, bits: Bits, value: u32) -> Result<(), LayoutError> {
        let control = bits
            .insert(self.control(), value)
            .ok_or(LayoutError::ValueTooWide {
                field: JobField::Control,
                value: u64::from(value),
            })?;
        self.put(0x10, 4, u64::from(control));
        Ok(())
    }

    fn control(&self) -> u32 {
        self.read(JobField::Control).unwrap_or_default() as u32
    }

    fn put(&mut self, offset: usize, size: usize, value: u64) {
        self.bytes[offset..][..size].copy_from_slice(&value.to_le_bytes()[..size]);
    }
}

impl fmt::Display for LayoutError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LayoutError::NoSuchField { ty, field } => {
                write!(f, "{:?} jobs have no field {:?}", ty, field)
            }
            LayoutError::ValueTooWide { field, value } => {
                write!(f, "value {:#x} does not fit field {:?}", value, field)
            }
            LayoutError::Malformed => f.write_str("bytes do not form a job record"),
        }
    }
}

impl std::error::Error for LayoutError {}
