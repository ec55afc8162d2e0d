//! The indirect dispatch patch kernel.
//!
//! Runs as a single invocation right before the dispatch job it rewrites. It reads the three
//! workgroup counts from the indirect buffer and either turns the dispatch into a null job, for
//! an empty grid, or packs the counts into the job's INVOCATION section exactly like
//! [`pack_invocation`](crate::job::pack_invocation) does on the host. The dispatch job was
//! encoded with a workgroup count of one in every dimension, so all workgroup bits are zero
//! and the shifts of all three dimensions equal the thread group split.
use core::mem::offset_of;

use bytemuck::{Pod, Zeroable};

use super::ir::{BinOp, Builder, Program, Value, Width};
use super::{KernelBody, KernelKey, KernelParams, KernelSource, ParamField};
use crate::job::{JobField, JobType, LayoutError, CONTROL_TYPE};
use crate::job::{SHIFT_WG_X, SHIFT_WG_Y, SHIFT_WG_Z};
use crate::kernel::Stage;

/// The parameters of one patch kernel launch.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
#[repr(C)]
pub struct IndirectDispatchInputs {
    /// Address of the dispatch job to rewrite.
    pub job: u64,
    /// Address of three `u32` workgroup counts.
    pub indirect_dim: u64,
    /// Where to write each resolved count, skipped when null.
    pub num_wg_sysval: [u64; 3],
}

impl KernelParams for IndirectDispatchInputs {
    const FIELDS: &'static [ParamField] = &[
        ParamField::new("job", offset_of!(Self, job), 8),
        ParamField::new("indirect_dim", offset_of!(Self, indirect_dim), 8),
        ParamField::new("num_wg_sysval", offset_of!(Self, num_wg_sysval), 24),
    ];
}

/// The source handed to the compiler.
pub fn source() -> Result<KernelSource, LayoutError> {
    Ok(KernelSource {
        key: KernelKey::IndirectPatch,
        stage: Stage::Compute,
        params: IndirectDispatchInputs::layout(),
        body: KernelBody::Program(program()?),
    })
}

/// Build the patch program for compute dispatch jobs.
///
/// Field offsets are taken from the job layout; this fails only if the layout of a compute job
/// lacks one of the patched fields.
///
/// The packed width is not checked against the invocation field width of the profile. Counts
/// that do not fit set bits above the field instead of failing like `pack_invocation`.
pub fn program() -> Result<Program, LayoutError> {
    let target = JobType::Compute;
    let control_offset = JobField::Control.layout(target)?.offset as u64;
    let invocations_offset = JobField::Invocations.layout(target)?.offset as u64;
    let shifts_offset = JobField::InvocationShifts.layout(target)?.offset as u64;

    let mut b = Builder::new();
    let job = b.load_param(offset_of!(IndirectDispatchInputs, job) as u32, Width::W64);
    let dim = b.load_param(
        offset_of!(IndirectDispatchInputs, indirect_dim) as u32,
        Width::W64,
    );

    let mut counts = [job; 3];
    for (i, count) in counts.iter_mut().enumerate() {
        let address = b.offset(dim, 4 * i as u64);
        *count = b.load(address, Width::W32);
    }

    let zero = b.constant(0);
    let empty = counts
        .iter()
        .map(|&count| b.binary(BinOp::Eq, count, zero))
        .collect::<Vec<_>>();
    let empty_x_y = b.or(empty[0], empty[1]);
    let empty = b.or(empty_x_y, empty[2]);

    b.if_else(
        empty,
        |b| {
            let address = b.offset(job, control_offset);
            let control = b.load(address, Width::W32);
            let keep = b.constant(u64::from(!CONTROL_TYPE.mask()));
            let cleared = b.and(control, keep);
            let null = b.constant(u64::from(JobType::Null.code() << CONTROL_TYPE.shift));
            let control = b.or(cleared, null);
            b.store(address, control, Width::W32);
        },
        |b| {
            let shifts_address = b.offset(job, shifts_offset);
            let shifts = b.load(shifts_address, Width::W32);

            let field_shift = b.constant(u64::from(SHIFT_WG_X.shift));
            let field_mask = b.constant(u64::from(SHIFT_WG_X.mask() >> SHIFT_WG_X.shift));
            let shifted = b.shr(shifts, field_shift);
            let wg_x = b.and(shifted, field_mask);

            let one = b.constant(1);
            let wg_y = bits_after(b, wg_x, counts[0], one);
            let wg_z = bits_after(b, wg_y, counts[1], one);

            let invocations_address = b.offset(job, invocations_offset);
            let mut packed = b.load(invocations_address, Width::W64);
            for (&count, start) in counts.iter().zip([wg_x, wg_y, wg_z]) {
                let minus_one = b.sub(count, one);
                let value = b.shl(minus_one, start);
                packed = b.or(packed, value);
            }
            b.store(invocations_address, packed, Width::W64);

            let keep = b.constant(u64::from(!(SHIFT_WG_Y.mask() | SHIFT_WG_Z.mask())));
            let mut word = b.and(shifts, keep);
            for (start, field) in [(wg_y, SHIFT_WG_Y), (wg_z, SHIFT_WG_Z)] {
                let shift = b.constant(u64::from(field.shift));
                let value = b.shl(start, shift);
                word = b.or(word, value);
            }
            b.store(shifts_address, word, Width::W32);
        },
    );

    let base = offset_of!(IndirectDispatchInputs, num_wg_sysval) as u32;
    for (i, &count) in counts.iter().enumerate() {
        let address = b.load_param(base + 8 * i as u32, Width::W64);
        let wanted = b.binary(BinOp::Ne, address, zero);
        b.if_else(wanted, |b| b.store(address, count, Width::W32), |_| {});
    }

    Ok(b.finish())
}

/// The start of the next packed dimension: `start + 32 - clz(count - 1)`.
fn bits_after(b: &mut Builder, start: Value, count: Value, one: Value) -> Value {
    let minus_one = b.sub(count, one);
    let leading = b.clz32(minus_one);
    let width = b.constant(32);
    let bits = b.sub(width, leading);
    b.add(start, bits)
}
