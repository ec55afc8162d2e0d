use super::{EncodeError, Encoder};
use crate::buffer::BufferResource;
use crate::command::{FillRequest, FillSize, UpdateRequest};
use crate::format::{FormatKey, OperationKind, WORD_FORMAT};
use crate::job::JobHandle;
use crate::shaders::transfer::{BufferCopyParams, FillParams};

/// The largest update, in bytes.
pub const MAX_UPDATE_SIZE: usize = 65536;

const WORD: u64 = 4;
const WORD_LOG2: u32 = 2;

impl Encoder<'_, '_> {
    /// Repeat a word over a range of a buffer.
    ///
    /// Offset and byte count must be multiples of four. A whole-size fill ends at the last
    /// complete word of the buffer.
    pub fn encode_fill(&mut self, request: &FillRequest<'_>) -> Result<Vec<JobHandle>, EncodeError> {
        let dst = request.dst;
        check_word_aligned(request.offset)?;

        let size = match request.size {
            FillSize::Bytes(size) => {
                check_word_aligned(size)?;
                size
            }
            FillSize::WholeSize => {
                dst.size.checked_sub(request.offset).unwrap_or(0) / WORD * WORD
            }
        };

        check_range(dst, request.offset, size)?;
        if size == 0 {
            return Ok(vec![]);
        }

        let kernel =
            self.transfer_kernel(OperationKind::FillBuffer, &FormatKey::linear(WORD_FORMAT))?;
        let base = dst.address(request.offset);
        let value = request.value;

        log::trace!("fill {} bytes at {:?} with {:#010x}", size, base, value);
        self.linear_jobs(kernel, size >> WORD_LOG2, WORD_LOG2, |offset| FillParams {
            dst: base.offset(offset).0,
            value,
            reserved: 0,
        })
    }

    /// Copy host data into a buffer.
    ///
    /// The data is staged in the scratch pool, so it may be dropped as soon as this returns.
    pub fn encode_update(
        &mut self,
        request: &UpdateRequest<'_>,
    ) -> Result<Vec<JobHandle>, EncodeError> {
        let size = request.data.len();
        if size > MAX_UPDATE_SIZE {
            return Err(EncodeError::UpdateTooLarge { size });
        }

        check_word_aligned(request.offset)?;
        check_word_aligned(size as u64)?;
        check_range(request.dst, request.offset, size as u64)?;

        if size == 0 {
            return Ok(vec![]);
        }

        let kernel =
            self.transfer_kernel(OperationKind::UpdateBuffer, &FormatKey::linear(WORD_FORMAT))?;
        let staged = self.pool.upload(request.data, WORD)?;
        let base = request.dst.address(request.offset);

        self.linear_jobs(kernel, size as u64 >> WORD_LOG2, WORD_LOG2, |offset| {
            BufferCopyParams {
                src: staged.offset(offset).0,
                dst: base.offset(offset).0,
            }
        })
    }
}

fn check_word_aligned(value: u64) -> Result<(), EncodeError> {
    match value % WORD {
        0 => Ok(()),
        _ => Err(EncodeError::Misaligned { value, align: WORD }),
    }
}

fn check_range(buffer: &BufferResource, offset: u64, size: u64) -> Result<(), EncodeError> {
    if buffer.contains(offset, size) {
        return Ok(());
    }

    Err(EncodeError::BufferOutOfBounds {
        offset,
        size,
        buffer_size: buffer.size,
    })
}
