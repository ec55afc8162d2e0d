//! Host execution of job streams, for kernels that come with an explicit program.
//!
//! This models what the job manager does with a closed stream: follow the next-job links, skip
//! null jobs, and run each compute job's kernel. Only kernels with a [`Program`] body can run on
//! the host. Jobs of all other kernels are walked but not executed, which is enough to observe
//! the effect of the indirect dispatch patch kernel on the job that follows it.
use core::fmt;

use crate::descriptor::UniformBufferRecord;
use crate::job::{DrawField, Invocation, JobField, JobRecord, JobType, LayoutError, CONTROL_TYPE};
use crate::kernel::{KernelMetadata, KernelRegistry};
use crate::pool::{GpuAddress, GpuMemory, PoolError};
use crate::shaders::ir::{Block, Op, Program, Value, Width};

/// A stream being executed, one job per step.
pub struct Execution<'reg, 'mem> {
    registry: &'reg KernelRegistry,
    memory: &'mem mut dyn GpuMemory,
    /// The next job to execute, null at the end of the stream.
    next: GpuAddress,
    steps: usize,
}

/// What happened to one job.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct JobOutcome {
    pub address: GpuAddress,
    pub index: u16,
    /// The type when the job was reached, after all previous jobs ran.
    pub ty: JobType,
    /// Whether a kernel program ran for this job.
    pub executed: bool,
}

/// Where the parameters of one launch are found.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ParamBinding {
    pub push_uniforms: GpuAddress,
    pub uniform_buffers: GpuAddress,
}

#[derive(Debug)]
pub struct ExecError {
    kind: ExecErrorKind,
    job: GpuAddress,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ExecErrorKind {
    Memory(PoolError),
    Layout(LayoutError),
    /// A parameter read hit neither the push constants nor the uniform buffer.
    MissingParam { offset: u32, size: u32 },
    /// A value was used before it was defined.
    UndefinedValue(Value),
    /// Programs run as a single invocation.
    Invocation(Invocation),
    /// The stream does not terminate.
    TooManyJobs,
}

/// Stream indices are 16 bits, a longer walk must be a cycle.
const MAX_JOBS: usize = 1 << 16;

impl<'reg, 'mem> Execution<'reg, 'mem> {
    pub fn new(
        registry: &'reg KernelRegistry,
        memory: &'mem mut dyn GpuMemory,
        head: GpuAddress,
    ) -> Self {
        Execution {
            registry,
            memory,
            next: head,
            steps: 0,
        }
    }

    pub fn is_running(&self) -> bool {
        !self.next.is_null()
    }

    /// Execute the next job of the stream.
    pub fn step(&mut self) -> Result<Option<JobOutcome>, ExecError> {
        let address = self.next;
        if address.is_null() {
            return Ok(None);
        }

        match self.step_inner(address) {
            Ok(outcome) => Ok(Some(outcome)),
            Err(kind) => Err(ExecError { kind, job: address }),
        }
    }

    /// Execute all remaining jobs.
    pub fn run_to_end(mut self) -> Result<Vec<JobOutcome>, ExecError> {
        let mut outcomes = vec![];
        while let Some(outcome) = self.step()? {
            outcomes.push(outcome);
        }
        Ok(outcomes)
    }

    fn step_inner(&mut self, address: GpuAddress) -> Result<JobOutcome, ExecErrorKind> {
        self.steps += 1;
        if self.steps > MAX_JOBS {
            return Err(ExecErrorKind::TooManyJobs);
        }

        let record = read_record(&*self.memory, address)?;
        let ty = record.job_type();
        self.next = record.next();

        let mut outcome = JobOutcome {
            address,
            index: record.index(),
            ty,
            executed: false,
        };

        if ty != JobType::Compute {
            return Ok(outcome);
        }

        let state = GpuAddress(record.read(JobField::Draw(DrawField::State))?);
        let kernel = match self.registry.by_renderer_state(state) {
            Some(kernel) => kernel,
            None => return Ok(outcome),
        };

        let program = match kernel.program() {
            Some(program) => program,
            None => return Ok(outcome),
        };

        let invocation = record.invocation()?;
        if invocation.decode() != ([1; 3], [1; 3]) {
            return Err(ExecErrorKind::Invocation(invocation));
        }

        let binding = ParamBinding {
            push_uniforms: GpuAddress(record.read(JobField::Draw(DrawField::PushUniforms))?),
            uniform_buffers: GpuAddress(record.read(JobField::Draw(DrawField::UniformBuffers))?),
        };

        log::trace!("executing {:?} for job {}", kernel.key(), record.index());
        execute(program, kernel.metadata(), &binding, &mut *self.memory)
            .map_err(|err| err.kind)?;

        outcome.executed = true;
        Ok(outcome)
    }
}

/// Run a program once against memory.
pub fn execute(
    program: &Program,
    metadata: &KernelMetadata,
    binding: &ParamBinding,
    memory: &mut dyn GpuMemory,
) -> Result<(), ExecError> {
    let mut machine = Machine {
        values: vec![None; program.values as usize],
        metadata,
        binding,
        memory,
    };

    machine
        .run(&program.body)
        .map_err(|kind| ExecError {
            kind,
            job: GpuAddress::NULL,
        })
}

struct Machine<'a> {
    values: Vec<Option<u64>>,
    metadata: &'a KernelMetadata,
    binding: &'a ParamBinding,
    memory: &'a mut dyn GpuMemory,
}

impl Machine<'_> {
    fn run(&mut self, block: &Block) -> Result<(), ExecErrorKind> {
        for inst in &block.instructions {
            let value = match &inst.op {
                &Op::Const(value) => value,
                &Op::LoadParam { offset, width } => self.param(offset, width)?,
                &Op::Load { address, width } => {
                    let address = GpuAddress(self.get(address)?);
                    self.load(address, width)?
                }
                &Op::Store {
                    address,
                    value,
                    width,
                } => {
                    let address = GpuAddress(self.get(address)?);
                    let value = self.get(value)?;
                    let bytes = value.to_le_bytes();
                    self.memory
                        .write(address, &bytes[..width.bytes() as usize])?;
                    0
                }
                &Op::Binary { op, lhs, rhs } => op.apply(self.get(lhs)?, self.get(rhs)?),
                &Op::Clz32(value) => u64::from((self.get(value)? as u32).leading_zeros()),
                Op::If {
                    cond,
                    then,
                    otherwise,
                } => {
                    if self.get(*cond)? != 0 {
                        self.run(then)?;
                    } else {
                        self.run(otherwise)?;
                    }
                    0
                }
            };

            let slot = self
                .values
                .get_mut(inst.dst.0 as usize)
                .ok_or(ExecErrorKind::UndefinedValue(inst.dst))?;
            *slot = Some(value);
        }

        Ok(())
    }

    fn get(&self, value: Value) -> Result<u64, ExecErrorKind> {
        self.values
            .get(value.0 as usize)
            .copied()
            .flatten()
            .ok_or(ExecErrorKind::UndefinedValue(value))
    }

    fn load(&self, address: GpuAddress, width: Width) -> Result<u64, ExecErrorKind> {
        let mut bytes = [0; 8];
        self.memory
            .read(address, &mut bytes[..width.bytes() as usize])?;
        Ok(u64::from_le_bytes(bytes))
    }

    /// Read parameter bytes from the push constants if they were pushed, else from the first
    /// uniform buffer.
    fn param(&self, offset: u32, width: Width) -> Result<u64, ExecErrorKind> {
        let size = width.bytes();
        let missing = ExecErrorKind::MissingParam { offset, size };

        let mut position = 0u64;
        for range in &self.metadata.push_constants {
            let start = range.source_offset;
            if offset >= start && offset + size <= start + range.size {
                let at = self
                    .binding
                    .push_uniforms
                    .offset(position + u64::from(offset - start));
                return self.load(at, width);
            }
            position += u64::from(range.size);
        }

        if self.binding.uniform_buffers.is_null() {
            return Err(missing);
        }

        let record = UniformBufferRecord(self.load(self.binding.uniform_buffers, Width::W64)?);
        if u64::from(offset + size) > record.size() {
            return Err(missing);
        }

        self.load(record.address().offset(u64::from(offset)), width)
    }
}

/// Read a complete job record, sized by the type in its header.
pub fn read_record(memory: &dyn GpuMemory, address: GpuAddress) -> Result<JobRecord, ExecErrorKind> {
    let mut control = [0; 4];
    let control_offset = JobField::Control.layout(JobType::Null)?.offset as u64;
    memory.read(address.offset(control_offset), &mut control)?;

    let code = CONTROL_TYPE.extract(u32::from_le_bytes(control));
    let ty = JobType::from_code(code).ok_or(LayoutError::Malformed)?;

    let mut bytes = vec![0; ty.record_size()];
    memory.read(address, &mut bytes)?;
    Ok(JobRecord::from_bytes(&bytes)?)
}

impl ExecError {
    pub fn kind(&self) -> &ExecErrorKind {
        &self.kind
    }

    /// The job that failed, null for programs executed outside of a stream.
    pub fn job(&self) -> GpuAddress {
        self.job
    }
}

impl From<PoolError> for ExecErrorKind {
    fn from(err: PoolError) -> Self {
        ExecErrorKind::Memory(err)
    }
}

impl From<LayoutError> for ExecErrorKind {
    fn from(err: LayoutError) -> Self {
        ExecErrorKind::Layout(err)
    }
}

impl fmt::Display for ExecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "job at {:#x}: ", self.job.0)?;
        match &self.kind {
            ExecErrorKind::Memory(err) => err.fmt(f),
            ExecErrorKind::Layout(err) => err.fmt(f),
            ExecErrorKind::MissingParam { offset, size } => {
                write!(f, "parameter bytes {}..{} are not bound", offset, offset + size)
            }
            ExecErrorKind::UndefinedValue(value) => write!(f, "value {:?} is undefined", value),
            ExecErrorKind::Invocation(invocation) => {
                write!(f, "can not execute invocation {:?}", invocation.decode())
            }
            ExecErrorKind::TooManyJobs => f.write_str("job stream does not terminate"),
        }
    }
}

impl std::error::Error for ExecError {}
