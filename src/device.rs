use std::sync::Arc;

use crate::encoder::Encoder;
use crate::format::{FormatResolver, FormatTable};
use crate::kernel::{Compiler, InitError, KernelRegistry};
use crate::pool::ScratchPool;
use crate::profile::ArchitectureProfile;

/// Everything created once per GPU: its profile, the format table and all compiled kernels.
///
/// Cheap to clone, all clones share the same registry. The device is read-only after creation
/// and can be used to create encoders from any number of threads.
#[derive(Clone)]
pub struct Device {
    profile: ArchitectureProfile,
    formats: Arc<dyn FormatResolver>,
    registry: Arc<KernelRegistry>,
}

impl Device {
    /// Create a device with the standard format table.
    ///
    /// Kernel binaries and renderer states are uploaded into `pool`, which must stay alive
    /// while any stream encoded with this device is executed.
    pub fn new(
        profile: ArchitectureProfile,
        compiler: &mut dyn Compiler,
        pool: &mut dyn ScratchPool,
    ) -> Result<Self, InitError> {
        let table = FormatTable::standard()?;
        Device::with_formats(profile, Arc::new(table), compiler, pool)
    }

    /// Create a device with a custom format table.
    pub fn with_formats(
        profile: ArchitectureProfile,
        formats: Arc<dyn FormatResolver>,
        compiler: &mut dyn Compiler,
        pool: &mut dyn ScratchPool,
    ) -> Result<Self, InitError> {
        let registry = KernelRegistry::build(&profile, &*formats, compiler, pool)?;
        log::debug!("device for {} (arch {}) ready", profile.name, profile.arch);

        Ok(Device {
            profile,
            formats,
            registry: Arc::new(registry),
        })
    }

    pub fn profile(&self) -> &ArchitectureProfile {
        &self.profile
    }

    pub fn formats(&self) -> &dyn FormatResolver {
        &*self.formats
    }

    pub fn registry(&self) -> &KernelRegistry {
        &self.registry
    }

    /// Start recording a new job stream, with descriptors allocated from `pool`.
    pub fn encoder<'dev, 'pool>(&'dev self, pool: &'pool mut dyn ScratchPool) -> Encoder<'dev, 'pool> {
        Encoder::new(self, pool)
    }
}

impl core::fmt::Debug for Device {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Device")
            .field("profile", &self.profile)
            .field("kernels", &self.registry.len())
            .finish()
    }
}
