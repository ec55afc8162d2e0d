//! Capabilities of one GPU generation, as seen by the encoder.

/// How kernels receive their small parameter data.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum UniformModel {
    /// Parameters are fetched through uniform buffer records, and the push blob is an array of
    /// 16-byte immediate vectors which always comes together with a uniform buffer.
    PackedImmediate,
    /// Push constants are preloaded into registers before the kernel starts. The uniform buffer
    /// is only bound when the kernel reads parameters that were not pushed.
    Preload,
}

/// The dynamic execution requirements of a GPU generation.
///
/// One can think of this structure as ISA feature flags. It is created once when the device is
/// opened and then shared, read-only, by every part of the encoder.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ArchitectureProfile {
    /// A human readable name, only used in diagnostics.
    pub name: &'static str,
    /// The architecture major version.
    pub arch: u32,
    pub uniform_model: UniformModel,
    /// Number of bits available for the packed size-minus-one values of a job's invocation.
    pub invocation_field_bits: u32,
    /// The attribute buffer array of rasterization jobs must end in a zeroed record.
    pub padding_attribute_buffer: bool,
    /// The largest work register count a renderer state can declare.
    pub max_work_registers: u8,
}

impl ArchitectureProfile {
    pub const MIDGARD: Self = ArchitectureProfile {
        name: "midgard",
        arch: 5,
        uniform_model: UniformModel::PackedImmediate,
        invocation_field_bits: 32,
        padding_attribute_buffer: false,
        max_work_registers: 16,
    };

    pub const BIFROST: Self = ArchitectureProfile {
        name: "bifrost",
        arch: 7,
        uniform_model: UniformModel::Preload,
        invocation_field_bits: 32,
        padding_attribute_buffer: true,
        max_work_registers: 64,
    };

    /// Whether push constants are delivered as preloaded registers.
    pub fn preloads_push_constants(&self) -> bool {
        self.uniform_model == UniformModel::Preload
    }

    /// The alignment, and padding granularity, of an uploaded push constant blob.
    pub(crate) fn push_alignment(&self) -> u64 {
        match self.uniform_model {
            UniformModel::PackedImmediate => 16,
            UniformModel::Preload => 8,
        }
    }
}
