use super::{EncodeError, Encoder};
use crate::command::{DispatchBindings, DispatchRequest, IndirectDispatchRequest};
use crate::job::{DrawDescriptor, JobDescription, JobField, JobHandle, JobSlot, JobType};
use crate::kernel::CompiledKernel;
use crate::shaders::indirect::IndirectDispatchInputs;

/// The two jobs of an indirect dispatch.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct IndirectDispatch {
    /// Rewrites the dispatch from the indirect buffer.
    pub patch: JobHandle,
    pub dispatch: JobHandle,
}

impl Encoder<'_, '_> {
    /// Encode a dispatch of a user compute kernel.
    ///
    /// A dispatch with zero workgroups in any dimension does nothing and adds no job.
    pub fn encode_dispatch(
        &mut self,
        request: &DispatchRequest,
    ) -> Result<Option<JobHandle>, EncodeError> {
        if request.workgroups.contains(&0) {
            log::trace!("skipping empty dispatch {:?}", request.workgroups);
            return Ok(None);
        }

        let invocation = self.invocation(request.local_size, request.workgroups)?;
        let draw = self.user_draw(&request.bindings)?;
        let handle = self
            .stream
            .append_job(&mut *self.pool, JobDescription::compute(draw, invocation))?;

        Ok(Some(handle))
    }

    /// Encode a dispatch whose workgroup counts are only known when the stream executes.
    ///
    /// The dispatch is preceded by a patch job. When any count is zero the patch turns the
    /// dispatch into a null job, otherwise it packs the counts into its invocation fields.
    /// Both jobs are ordered after all earlier compute jobs of the stream.
    pub fn encode_indirect_dispatch(
        &mut self,
        request: &IndirectDispatchRequest,
    ) -> Result<IndirectDispatch, EncodeError> {
        let device = self.device;
        let patch = device
            .registry()
            .indirect_patch()
            .ok_or_else(|| EncodeError::internal(line!()))?;

        // Placeholder counts, the patch job overwrites them.
        let invocation = self.invocation(request.local_size, [1, 1, 1])?;
        let draw = self.user_draw(&request.bindings)?;

        let slot = self.stream.reserve(&mut *self.pool, JobType::Compute)?;
        let patch = match self.append_patch(patch, &slot, request) {
            Ok(patch) => patch,
            Err(err) => {
                self.stream.release(slot);
                return Err(err);
            }
        };

        let dispatch = self
            .stream
            .append(slot, JobDescription::compute(draw, invocation).ordered())?;

        log::debug!(
            "indirect dispatch: patch job {} rewrites job {}",
            patch.index(),
            dispatch.index()
        );

        Ok(IndirectDispatch { patch, dispatch })
    }

    /// Append the job patching the dispatch job of `slot`.
    fn append_patch(
        &mut self,
        patch: &CompiledKernel,
        slot: &JobSlot,
        request: &IndirectDispatchRequest,
    ) -> Result<JobHandle, EncodeError> {
        // The patch rewrites these fields of the slot, check that a compute job has them.
        slot.field_address(JobField::Invocations)?;
        slot.field_address(JobField::InvocationShifts)?;

        let inputs = IndirectDispatchInputs {
            job: slot.address().0,
            indirect_dim: request.indirect.0,
            num_wg_sysval: request.num_workgroups.map(|address| address.0),
        };

        let uniforms = self.upload_params(patch, &inputs)?;
        let patch_invocation = self.invocation([1, 1, 1], [1, 1, 1])?;
        let patch_draw = DrawDescriptor {
            state: patch.renderer_state(),
            thread_storage: self.thread_storage()?,
            uniform_buffers: uniforms.uniform_buffers,
            push_uniforms: uniforms.push_uniforms,
            ..DrawDescriptor::default()
        };

        self.stream.append_job(
            &mut *self.pool,
            JobDescription::compute(patch_draw, patch_invocation).ordered(),
        )
    }

    fn user_draw(&mut self, bindings: &DispatchBindings) -> Result<DrawDescriptor, EncodeError> {
        if bindings.renderer_state.is_null() {
            return Err(EncodeError::MissingRendererState);
        }

        let thread_storage = match bindings.thread_storage.is_null() {
            true => self.thread_storage()?,
            false => bindings.thread_storage,
        };

        Ok(DrawDescriptor {
            state: bindings.renderer_state,
            thread_storage,
            uniform_buffers: bindings.uniform_buffers,
            push_uniforms: bindings.push_uniforms,
            textures: bindings.textures,
            samplers: bindings.samplers,
            attributes: bindings.attributes,
            attribute_buffers: bindings.attribute_buffers,
            ..DrawDescriptor::default()
        })
    }
}
