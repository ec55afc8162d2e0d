//! Kernel sources, as handed to the compiler when the device is created.
use crate::format::{Conversion, FormatKey, KernelId, OperationKind, TableEntry};
use crate::kernel::Stage;

pub mod indirect;
pub mod ir;
pub mod transfer;

/// Identifies a kernel of the registry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum KernelKey {
    /// The kernel of one row of the format table.
    Transfer(KernelId),
    /// The kernel rewriting an indirect dispatch job.
    IndirectPatch,
}

/// A named range of a parameter blob.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ParamField {
    pub name: &'static str,
    pub offset: u32,
    pub size: u32,
}

/// The layout of the parameter blob of a kernel.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ParamLayout {
    pub size: u32,
    pub fields: &'static [ParamField],
}

/// A `#[repr(C)]` parameter blob with a declared layout.
pub trait KernelParams: bytemuck::Pod {
    const FIELDS: &'static [ParamField];

    fn layout() -> ParamLayout {
        ParamLayout {
            size: core::mem::size_of::<Self>() as u32,
            fields: Self::FIELDS,
        }
    }
}

/// What a transfer kernel does, derived from its table entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TransferKernel {
    pub kind: OperationKind,
    pub key: FormatKey,
    pub conversion: Conversion,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum KernelBody {
    /// A fixed-function transfer, lowered by the compiler itself.
    Transfer(TransferKernel),
    /// An explicit program.
    Program(ir::Program),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KernelSource {
    pub key: KernelKey,
    pub stage: Stage,
    pub params: ParamLayout,
    pub body: KernelBody,
}

impl ParamField {
    pub const fn new(name: &'static str, offset: usize, size: u32) -> Self {
        ParamField {
            name,
            offset: offset as u32,
            size,
        }
    }
}

impl KernelSource {
    /// The source of the transfer kernel of a table entry.
    pub fn transfer(kind: OperationKind, key: &FormatKey, entry: &TableEntry) -> Self {
        let stage = if kind.writes_render_target() {
            Stage::Fragment
        } else {
            Stage::Compute
        };

        let params = match kind {
            OperationKind::ImageToImage => transfer::ImageToImageParams::layout(),
            OperationKind::BufferToImage => transfer::BufferToImageParams::layout(),
            OperationKind::ImageToBuffer => transfer::ImageToBufferParams::layout(),
            OperationKind::BufferToBuffer | OperationKind::UpdateBuffer => {
                transfer::BufferCopyParams::layout()
            }
            OperationKind::FillBuffer => transfer::FillParams::layout(),
        };

        KernelSource {
            key: KernelKey::Transfer(entry.kernel),
            stage,
            params,
            body: KernelBody::Transfer(TransferKernel {
                kind,
                key: *key,
                conversion: entry.conversion,
            }),
        }
    }

    pub fn program(&self) -> Option<&ir::Program> {
        match &self.body {
            KernelBody::Program(program) => Some(program),
            KernelBody::Transfer(_) => None,
        }
    }

    /// Whether the kernel samples a texture.
    pub fn samples_texture(&self) -> bool {
        match &self.body {
            KernelBody::Transfer(transfer) => transfer.kind.samples_image(),
            KernelBody::Program(_) => false,
        }
    }
}
