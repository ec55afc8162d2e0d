use std::collections::HashMap;

use super::{
    DrawField, Invocation, JobField, JobRecord, JobType, CONTROL_BARRIER, CONTROL_INDEX,
    CONTROL_LAST, JOB_ALIGNMENT,
};
use crate::encoder::EncodeError;
use crate::pool::{GpuAddress, ScratchPool};

/// Host side bookkeeping of the last job of each type.
#[derive(Clone, Debug, Default)]
pub struct Scoreboard {
    last: HashMap<JobType, u16>,
}

/// The recording state of a [`JobStream`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StreamState {
    Empty,
    Recording,
    /// Terminal. All records have been linked and uploaded.
    Closed,
}

/// An ordered list of jobs, linked on closing.
///
/// Records are assembled on the host and only uploaded when the stream is closed. The address
/// of a record is fixed earlier, when its slot is reserved, such that other jobs can refer to
/// it before its contents are known.
#[derive(Debug)]
pub struct JobStream {
    state: StreamState,
    jobs: Vec<(JobHandle, JobRecord)>,
    /// Slots reserved but not yet appended.
    pending: usize,
    scoreboard: Scoreboard,
}

/// Memory reserved for exactly one job of a given type.
///
/// Consumed by [`JobStream::append`].
#[derive(Debug, PartialEq, Eq)]
pub struct JobSlot {
    address: GpuAddress,
    ty: JobType,
}

/// Refers to an appended job.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct JobHandle {
    index: u16,
    address: GpuAddress,
    ty: JobType,
}

/// The pointers and flags of a job's DRAW section.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DrawDescriptor {
    pub state: GpuAddress,
    pub thread_storage: GpuAddress,
    pub uniform_buffers: GpuAddress,
    pub push_uniforms: GpuAddress,
    pub textures: GpuAddress,
    pub samplers: GpuAddress,
    pub attributes: GpuAddress,
    pub attribute_buffers: GpuAddress,
    pub varyings: GpuAddress,
    pub varying_buffers: GpuAddress,
    pub position: GpuAddress,
    pub viewport: GpuAddress,
    pub framebuffer: GpuAddress,
    pub flags: u32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum DrawMode {
    Points = 0x1,
    Lines = 0x2,
    Triangles = 0x8,
    TriangleStrip = 0xa,
    TriangleFan = 0xc,
}

/// The PRIMITIVE section of a tiler job. Only non-indexed draws are encoded.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Primitive {
    pub mode: DrawMode,
    pub base_vertex: u32,
    pub vertex_count: u32,
}

/// Everything needed to fill a job record.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct JobDescription {
    pub ty: JobType,
    pub draw: DrawDescriptor,
    pub invocation: Option<Invocation>,
    pub primitive: Option<Primitive>,
    /// Chain to the previous job of the same type.
    pub ordered: bool,
    /// Wait for all previous jobs.
    pub barrier: bool,
}

/// The result of closing a stream.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClosedStream {
    /// The first job to submit, none for a stream without jobs.
    pub head: Option<GpuAddress>,
    pub jobs: Vec<JobHandle>,
}

impl Scoreboard {
    /// The index of the last appended job of a type.
    pub fn last(&self, ty: JobType) -> Option<u16> {
        self.last.get(&ty).copied()
    }

    /// The dependency slots of a new job of type `ty`.
    ///
    /// The first slot waits for the most recent job of an incompatible type, the second for the
    /// most recent job of the same type if ordering was requested. Zero means no dependency.
    pub fn dependencies(&self, ty: JobType, ordered: bool) -> [u16; 2] {
        let incompatible = self
            .last
            .iter()
            .filter(|(other, _)| !other.is_compatible(ty))
            .map(|(_, &index)| index)
            .max()
            .unwrap_or(0);

        let same = match ordered {
            true => self.last(ty).unwrap_or(0),
            false => 0,
        };

        [incompatible, same]
    }

    pub fn record(&mut self, ty: JobType, index: u16) {
        self.last.insert(ty, index);
    }
}

impl JobStream {
    pub fn new() -> Self {
        JobStream {
            state: StreamState::Empty,
            jobs: vec![],
            pending: 0,
            scoreboard: Scoreboard::default(),
        }
    }

    pub fn state(&self) -> StreamState {
        self.state
    }

    pub fn scoreboard(&self) -> &Scoreboard {
        &self.scoreboard
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// Fix the address of a future job.
    pub fn reserve(
        &mut self,
        pool: &mut dyn ScratchPool,
        ty: JobType,
    ) -> Result<JobSlot, EncodeError> {
        self.ensure_open()?;
        let address = pool.allocate(ty.record_size() as u64, JOB_ALIGNMENT)?;
        self.pending += 1;
        self.state = StreamState::Recording;
        Ok(JobSlot { address, ty })
    }

    /// Fill a reserved slot and add it as the next job of the stream.
    ///
    /// The reservation is used up even when the job can not be appended.
    pub fn append(&mut self, slot: JobSlot, job: JobDescription) -> Result<JobHandle, EncodeError> {
        self.ensure_open()?;

        if self.pending == 0 {
            return Err(EncodeError::internal(line!()));
        }

        let appended = self.fill(&slot, job);
        self.unreserve();
        appended
    }

    /// Give up a reserved slot without appending a job to it.
    ///
    /// The memory of the slot stays allocated, nothing is ever written there.
    pub fn release(&mut self, slot: JobSlot) {
        log::trace!("released {:?} slot at {:#x}", slot.ty, slot.address.0);
        self.unreserve();
    }

    fn unreserve(&mut self) {
        self.pending = self.pending.saturating_sub(1);

        if self.state == StreamState::Recording && self.pending == 0 && self.jobs.is_empty() {
            self.state = StreamState::Empty;
        }
    }

    fn fill(&mut self, slot: &JobSlot, job: JobDescription) -> Result<JobHandle, EncodeError> {
        if slot.ty != job.ty {
            return Err(EncodeError::internal(line!()));
        }

        let index = u16::try_from(self.jobs.len() + 1).map_err(|_| EncodeError::TooManyJobs)?;
        let mut record = JobRecord::new(job.ty);
        record.set_control_bits(CONTROL_INDEX, u32::from(index))?;
        if job.barrier {
            record.set_control_bits(CONTROL_BARRIER, 1)?;
        }

        let [dep1, dep2] = self.scoreboard.dependencies(job.ty, job.ordered);
        record.write(JobField::Dependency1, u64::from(dep1))?;
        record.write(JobField::Dependency2, u64::from(dep2))?;

        if job.ty.has_draw() || job.draw != DrawDescriptor::default() {
            job.draw.write_into(&mut record)?;
        }

        if let Some(invocation) = &job.invocation {
            record.set_invocation(invocation)?;
        }

        if let Some(primitive) = &job.primitive {
            primitive.write_into(&mut record)?;
        }

        log::trace!(
            "job {} {:?} at {:#x} depends on {} {}",
            index,
            job.ty,
            slot.address.0,
            dep1,
            dep2
        );

        self.scoreboard.record(job.ty, index);

        let handle = JobHandle {
            index,
            address: slot.address,
            ty: job.ty,
        };

        self.jobs.push((handle, record));
        Ok(handle)
    }

    /// Reserve and append in one go.
    pub fn append_job(
        &mut self,
        pool: &mut dyn ScratchPool,
        job: JobDescription,
    ) -> Result<JobHandle, EncodeError> {
        let slot = self.reserve(pool, job.ty)?;
        self.append(slot, job)
    }

    /// The host copy of an appended job.
    pub fn record(&self, handle: JobHandle) -> Option<&JobRecord> {
        self.jobs
            .iter()
            .find(|(other, _)| *other == handle)
            .map(|(_, record)| record)
    }

    /// Link all jobs in append order, mark the last one and upload every record.
    ///
    /// Every reserved slot must have been appended.
    pub fn close(&mut self, pool: &mut dyn ScratchPool) -> Result<ClosedStream, EncodeError> {
        self.ensure_open()?;

        if self.pending != 0 {
            return Err(EncodeError::internal(line!()));
        }

        let count = self.jobs.len();
        for i in 0..count {
            let next = match self.jobs.get(i + 1) {
                Some((handle, _)) => handle.address,
                None => GpuAddress::NULL,
            };

            let (handle, record) = &mut self.jobs[i];
            record.write_address(JobField::NextJob, next)?;
            if i + 1 == count {
                record.set_control_bits(CONTROL_LAST, 1)?;
            }

            pool.write(handle.address, record.as_bytes())?;
        }

        self.state = StreamState::Closed;
        log::debug!("closed job stream with {} jobs", count);

        Ok(ClosedStream {
            head: self.jobs.first().map(|(handle, _)| handle.address),
            jobs: self.jobs.iter().map(|(handle, _)| *handle).collect(),
        })
    }

    fn ensure_open(&self) -> Result<(), EncodeError> {
        match self.state {
            StreamState::Closed => Err(EncodeError::StreamClosed),
            _ => Ok(()),
        }
    }
}

impl Default for JobStream {
    fn default() -> Self {
        JobStream::new()
    }
}

impl JobSlot {
    pub fn address(&self) -> GpuAddress {
        self.address
    }

    pub fn job_type(&self) -> JobType {
        self.ty
    }

    /// The address of a field of the job that will be stored in this slot.
    pub fn field_address(&self, field: JobField) -> Result<GpuAddress, EncodeError> {
        Ok(field.address_in(self.ty, self.address)?)
    }
}

impl JobHandle {
    /// The index within the stream, starting at one.
    pub fn index(&self) -> u16 {
        self.index
    }

    pub fn address(&self) -> GpuAddress {
        self.address
    }

    pub fn job_type(&self) -> JobType {
        self.ty
    }
}

impl DrawDescriptor {
    fn write_into(&self, record: &mut JobRecord) -> Result<(), EncodeError> {
        let pointers = [
            self.state,
            self.thread_storage,
            self.uniform_buffers,
            self.push_uniforms,
            self.textures,
            self.samplers,
            self.attributes,
            self.attribute_buffers,
            self.varyings,
            self.varying_buffers,
            self.position,
            self.viewport,
            self.framebuffer,
        ];

        for (field, pointer) in DrawField::POINTERS.into_iter().zip(pointers) {
            record.write_address(JobField::Draw(field), pointer)?;
        }

        record.write(JobField::Draw(DrawField::Flags), u64::from(self.flags))?;
        Ok(())
    }
}

impl Primitive {
    fn write_into(&self, record: &mut JobRecord) -> Result<(), EncodeError> {
        // Index type zero, a non-indexed draw.
        record.write(JobField::PrimitiveControl, self.mode as u64)?;
        record.write(JobField::BaseVertex, u64::from(self.base_vertex))?;
        record.write(JobField::VertexCount, u64::from(self.vertex_count))?;
        Ok(())
    }
}

impl JobDescription {
    /// A compute job.
    pub fn compute(draw: DrawDescriptor, invocation: Invocation) -> Self {
        JobDescription {
            ty: JobType::Compute,
            draw,
            invocation: Some(invocation),
            primitive: None,
            ordered: false,
            barrier: false,
        }
    }

    /// A tiler job drawing `primitive` with a single invocation per vertex.
    pub fn tiler(draw: DrawDescriptor, invocation: Invocation, primitive: Primitive) -> Self {
        JobDescription {
            ty: JobType::Tiler,
            draw,
            invocation: Some(invocation),
            primitive: Some(primitive),
            ordered: false,
            barrier: false,
        }
    }

    pub fn null() -> Self {
        JobDescription {
            ty: JobType::Null,
            draw: DrawDescriptor::default(),
            invocation: None,
            primitive: None,
            ordered: false,
            barrier: false,
        }
    }

    #[must_use]
    pub fn ordered(mut self) -> Self {
        self.ordered = true;
        self
    }
}
