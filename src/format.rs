//! The format capability table.
//!
//! Every transfer kernel operates on *raw* texels: unsigned integer formats that have the same
//! byte size as the texel of the resource they are viewing. An image format together with an
//! aspect is reduced to such a raw view and a component mask, which selects the parts of the
//! raw texel that belong to the aspect. The table then maps the raw source format, raw
//! destination format, mask and shape of the operation to one kernel.
use core::fmt;
use std::collections::{HashMap, HashSet};

use wgpu::{TextureAspect, TextureDimension, TextureFormat};

/// The six kinds of transfer operations with their own kernel families.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum OperationKind {
    ImageToImage,
    BufferToImage,
    ImageToBuffer,
    BufferToBuffer,
    FillBuffer,
    UpdateBuffer,
}

/// The lookup key of the table, within one operation kind.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct FormatKey {
    pub src: TextureFormat,
    pub dst: TextureFormat,
    /// Components of the image-side raw texel that are read or written.
    pub write_mask: u8,
    pub dimension: TextureDimension,
    pub is_array: bool,
    pub is_multisampled: bool,
}

/// Stable index of a kernel: the operation kind and the row of the table for that kind.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct KernelId {
    pub kind: OperationKind,
    pub row: u16,
}

/// Fixed function state of a kernel writing into a render target.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct BlendParams {
    /// The color write mask of the render target.
    pub color_mask: u8,
    pub target_format: TextureFormat,
}

/// How the kernel output reaches its destination.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Conversion {
    /// Through a rasterization job's blend unit.
    Blend(BlendParams),
    /// Through plain stores of the kernel, which applies the mask itself.
    Store { component_mask: u8 },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TableEntry {
    pub kernel: KernelId,
    pub conversion: Conversion,
    /// Bytes per texel on the source side.
    pub src_texel_size: u8,
    /// Bytes per texel on the destination side.
    pub dst_texel_size: u8,
}

/// A raw view of one aspect of a format.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct RawView {
    pub format: TextureFormat,
    pub mask: u8,
    pub texel_size: u8,
}

/// Resolves format keys to table entries.
///
/// The standard implementation is [`FormatTable`], a different table may be swapped in for
/// architectures with their own kernel families.
pub trait FormatResolver: Send + Sync {
    fn lookup(&self, kind: OperationKind, key: &FormatKey) -> Option<&TableEntry>;

    /// Visit all entries, in kernel order.
    fn for_each_entry(&self, visit: &mut dyn FnMut(OperationKind, &FormatKey, &TableEntry));
}

/// The standard table.
#[derive(Clone, Debug, Default)]
pub struct FormatTable {
    entries: HashMap<(OperationKind, FormatKey), TableEntry>,
    /// Kernel order for visiting, since the map itself is unordered.
    order: Vec<(OperationKind, FormatKey)>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FormatError {
    /// Block compressed formats are not handled by any transfer kernel.
    Compressed(TextureFormat),
    /// No raw view of this format exists.
    Unsupported(TextureFormat),
    /// The aspect is not part of the format, or does not name a single aspect of it.
    Aspect {
        format: TextureFormat,
        aspect: TextureAspect,
    },
}

/// An inconsistency between the table's entries.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TableError {
    Duplicate(OperationKind, FormatKey),
    /// The recorded texel sizes do not match the formats of the key.
    TexelSize(OperationKind, FormatKey),
    /// A buffer→image entry without an image→buffer counterpart of equal texel sizes, or the
    /// other way around.
    Unpaired(OperationKind, FormatKey),
    /// Two entries share a kernel.
    SharedKernel(KernelId),
}

/// The raw formats used for plain texel copies, by increasing texel size.
pub const RAW_FORMATS: [TextureFormat; 5] = [
    TextureFormat::R8Uint,
    TextureFormat::Rg8Uint,
    TextureFormat::Rgba8Uint,
    TextureFormat::Rgba16Uint,
    TextureFormat::Rgba32Uint,
];

/// The raw format of buffer fill and update, which operate on 32-bit words.
pub const WORD_FORMAT: TextureFormat = TextureFormat::R32Uint;

/// Image formats that have a raw view, i.e. that can take part in copies.
pub const COPYABLE_FORMATS: &[TextureFormat] = &[
    TextureFormat::R8Unorm,
    TextureFormat::R8Snorm,
    TextureFormat::R8Uint,
    TextureFormat::R8Sint,
    TextureFormat::R16Uint,
    TextureFormat::R16Sint,
    TextureFormat::R16Float,
    TextureFormat::Rg8Unorm,
    TextureFormat::Rg8Snorm,
    TextureFormat::Rg8Uint,
    TextureFormat::Rg8Sint,
    TextureFormat::R32Uint,
    TextureFormat::R32Sint,
    TextureFormat::R32Float,
    TextureFormat::Rg16Uint,
    TextureFormat::Rg16Sint,
    TextureFormat::Rg16Float,
    TextureFormat::Rgba8Unorm,
    TextureFormat::Rgba8UnormSrgb,
    TextureFormat::Rgba8Snorm,
    TextureFormat::Rgba8Uint,
    TextureFormat::Rgba8Sint,
    TextureFormat::Bgra8Unorm,
    TextureFormat::Bgra8UnormSrgb,
    TextureFormat::Rgb10a2Unorm,
    TextureFormat::Rg32Uint,
    TextureFormat::Rg32Sint,
    TextureFormat::Rg32Float,
    TextureFormat::Rgba16Uint,
    TextureFormat::Rgba16Sint,
    TextureFormat::Rgba16Float,
    TextureFormat::Rgba32Uint,
    TextureFormat::Rgba32Sint,
    TextureFormat::Rgba32Float,
    TextureFormat::Stencil8,
    TextureFormat::Depth16Unorm,
    TextureFormat::Depth24Plus,
    TextureFormat::Depth24PlusStencil8,
    TextureFormat::Depth32Float,
];

/// The image-side rows: raw format and component mask.
const IMAGE_ROWS: [(TextureFormat, u8); 7] = [
    (TextureFormat::R8Uint, 0x1),
    (TextureFormat::Rg8Uint, 0x3),
    (TextureFormat::Rgba8Uint, 0xf),
    (TextureFormat::Rgba16Uint, 0xf),
    (TextureFormat::Rgba32Uint, 0xf),
    // The depth and the stencil part of a packed 24/8 texel.
    (TextureFormat::Rgba8Uint, DEPTH24_MASK),
    (TextureFormat::Rgba8Uint, STENCIL8_MASK),
];

const DEPTH24_MASK: u8 = 0x7;
const STENCIL8_MASK: u8 = 0x8;

type Shape = (TextureDimension, bool, bool);

const IMAGE_COPY_SHAPES: [Shape; 7] = [
    (TextureDimension::D1, false, false),
    (TextureDimension::D1, true, false),
    (TextureDimension::D2, false, false),
    (TextureDimension::D2, true, false),
    (TextureDimension::D2, false, true),
    (TextureDimension::D2, true, true),
    (TextureDimension::D3, false, false),
];

const BUFFER_IMAGE_SHAPES: [Shape; 5] = [
    (TextureDimension::D1, false, false),
    (TextureDimension::D1, true, false),
    (TextureDimension::D2, false, false),
    (TextureDimension::D2, true, false),
    (TextureDimension::D3, false, false),
];

const LINEAR_SHAPES: [Shape; 1] = [(TextureDimension::D1, false, false)];

impl OperationKind {
    pub const ALL: [Self; 6] = [
        OperationKind::ImageToImage,
        OperationKind::BufferToImage,
        OperationKind::ImageToBuffer,
        OperationKind::BufferToBuffer,
        OperationKind::FillBuffer,
        OperationKind::UpdateBuffer,
    ];

    /// Whether the kernels of this kind write through a render target.
    pub fn writes_render_target(self) -> bool {
        matches!(self, OperationKind::ImageToImage | OperationKind::BufferToImage)
    }

    /// Whether the kernels of this kind sample an image.
    pub fn samples_image(self) -> bool {
        matches!(self, OperationKind::ImageToImage | OperationKind::ImageToBuffer)
    }
}

impl FormatKey {
    /// A key for an operation on linear memory only.
    pub fn linear(format: TextureFormat) -> Self {
        FormatKey {
            src: format,
            dst: format,
            write_mask: full_mask(format),
            dimension: TextureDimension::D1,
            is_array: false,
            is_multisampled: false,
        }
    }
}

impl FormatTable {
    /// Build the table of all transfer kernels.
    pub fn standard() -> Result<Self, TableError> {
        let mut table = FormatTable::default();

        for &(dimension, is_array, is_multisampled) in &IMAGE_COPY_SHAPES {
            for &(format, mask) in &IMAGE_ROWS {
                table.push(
                    OperationKind::ImageToImage,
                    shaped(format, format, mask, (dimension, is_array, is_multisampled)),
                )?;
            }
        }

        for &shape in &BUFFER_IMAGE_SHAPES {
            for &(format, mask) in &IMAGE_ROWS {
                let buffer = buffer_format_for(format, mask);
                table.push(OperationKind::BufferToImage, shaped(buffer, format, mask, shape))?;
            }
        }

        for &shape in &BUFFER_IMAGE_SHAPES {
            for &(format, mask) in &IMAGE_ROWS {
                let buffer = buffer_format_for(format, mask);
                table.push(OperationKind::ImageToBuffer, shaped(format, buffer, mask, shape))?;
            }
        }

        for &shape in &LINEAR_SHAPES {
            for &format in &RAW_FORMATS {
                let key = shaped(format, format, full_mask(format), shape);
                table.push(OperationKind::BufferToBuffer, key)?;
            }

            let word = shaped(WORD_FORMAT, WORD_FORMAT, full_mask(WORD_FORMAT), shape);
            table.push(OperationKind::FillBuffer, word)?;
            table.push(OperationKind::UpdateBuffer, word)?;
        }

        Ok(table)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    fn push(&mut self, kind: OperationKind, key: FormatKey) -> Result<(), TableError> {
        let row = self
            .order
            .iter()
            .filter(|(other, _)| *other == kind)
            .count();

        let conversion = if kind.writes_render_target() {
            Conversion::Blend(BlendParams {
                color_mask: key.write_mask,
                target_format: key.dst,
            })
        } else {
            Conversion::Store {
                component_mask: key.write_mask,
            }
        };

        let entry = TableEntry {
            kernel: KernelId {
                kind,
                row: row as u16,
            },
            conversion,
            src_texel_size: texel_size(key.src),
            dst_texel_size: texel_size(key.dst),
        };

        if self.entries.insert((kind, key), entry).is_some() {
            return Err(TableError::Duplicate(kind, key));
        }

        self.order.push((kind, key));
        Ok(())
    }
}

impl FormatResolver for FormatTable {
    fn lookup(&self, kind: OperationKind, key: &FormatKey) -> Option<&TableEntry> {
        self.entries.get(&(kind, *key))
    }

    fn for_each_entry(&self, visit: &mut dyn FnMut(OperationKind, &FormatKey, &TableEntry)) {
        for key in &self.order {
            visit(key.0, &key.1, &self.entries[key]);
        }
    }
}

/// Verify the internal consistency of a table.
///
/// Run when a device is created so that a broken table is detected before any request is
/// encoded with it.
pub fn check_consistency(resolver: &dyn FormatResolver) -> Result<(), TableError> {
    let mut kernels = HashSet::new();
    let mut first_error = None;

    resolver.for_each_entry(&mut |kind, key, entry| {
        if first_error.is_some() {
            return;
        }

        if entry.src_texel_size != texel_size(key.src) || entry.dst_texel_size != texel_size(key.dst)
        {
            first_error = Some(TableError::TexelSize(kind, *key));
            return;
        }

        if !kernels.insert(entry.kernel) {
            first_error = Some(TableError::SharedKernel(entry.kernel));
            return;
        }

        let mirror = match kind {
            OperationKind::BufferToImage => OperationKind::ImageToBuffer,
            OperationKind::ImageToBuffer => OperationKind::BufferToImage,
            _ => return,
        };

        let mirrored = FormatKey {
            src: key.dst,
            dst: key.src,
            ..*key
        };

        let paired = resolver.lookup(mirror, &mirrored).is_some_and(|other| {
            other.src_texel_size == entry.dst_texel_size
                && other.dst_texel_size == entry.src_texel_size
        });

        if !paired {
            first_error = Some(TableError::Unpaired(kind, *key));
        }
    });

    match first_error {
        None => Ok(()),
        Some(err) => Err(err),
    }
}

/// The raw view of an image aspect, as sampled or rendered by the kernels.
pub fn image_view(format: TextureFormat, aspect: TextureAspect) -> Result<RawView, FormatError> {
    use TextureAspect as A;
    use TextureFormat as F;

    if format.is_compressed() {
        return Err(FormatError::Compressed(format));
    }

    let bad_aspect = FormatError::Aspect { format, aspect };

    let (raw, mask) = match (format, aspect) {
        (F::Depth24Plus, A::All | A::DepthOnly) => (F::Rgba8Uint, DEPTH24_MASK),
        (F::Depth24PlusStencil8, A::DepthOnly) => (F::Rgba8Uint, DEPTH24_MASK),
        (F::Depth24PlusStencil8, A::StencilOnly) => (F::Rgba8Uint, STENCIL8_MASK),
        // Copies name exactly one aspect of a combined format.
        (F::Depth24PlusStencil8, _) => return Err(bad_aspect),
        (F::Stencil8, A::All | A::StencilOnly) => (F::R8Uint, 0x1),
        (F::Depth16Unorm, A::All | A::DepthOnly) => (F::Rg8Uint, 0x3),
        (F::Depth32Float, A::All | A::DepthOnly) => (F::Rgba8Uint, 0xf),
        (F::Stencil8 | F::Depth16Unorm | F::Depth24Plus | F::Depth32Float, _) => {
            return Err(bad_aspect)
        }
        (F::Depth32FloatStencil8, _) => return Err(FormatError::Unsupported(format)),
        (_, A::All) => {
            let size = format
                .block_copy_size(None)
                .ok_or(FormatError::Unsupported(format))?;
            let raw = raw_format(size).ok_or(FormatError::Unsupported(format))?;
            (raw, full_mask(raw))
        }
        (_, _) => return Err(bad_aspect),
    };

    Ok(RawView {
        format: raw,
        mask,
        texel_size: texel_size(raw),
    })
}

/// The raw view of an image aspect when it is stored tightly in a buffer.
///
/// This only differs from the image view for the stencil of a packed depth-stencil texel, which
/// occupies a single byte in buffers.
pub fn buffer_view(format: TextureFormat, aspect: TextureAspect) -> Result<RawView, FormatError> {
    let image = image_view(format, aspect)?;
    let raw = buffer_format_for(image.format, image.mask);

    Ok(RawView {
        format: raw,
        mask: if raw == image.format { image.mask } else { full_mask(raw) },
        texel_size: texel_size(raw),
    })
}

/// The raw format of a given texel size.
pub fn raw_format(texel_size: u32) -> Option<TextureFormat> {
    RAW_FORMATS
        .iter()
        .copied()
        .find(|format| u32::from(self::texel_size(*format)) == texel_size)
}

/// The mask selecting every component of a raw format.
pub fn full_mask(raw: TextureFormat) -> u8 {
    match raw {
        TextureFormat::R8Uint | TextureFormat::R32Uint => 0x1,
        TextureFormat::Rg8Uint => 0x3,
        _ => 0xf,
    }
}

/// Bytes of one texel of a raw format, zero for formats without a plain texel size.
pub fn texel_size(format: TextureFormat) -> u8 {
    format
        .block_copy_size(None)
        .and_then(|size| u8::try_from(size).ok())
        .unwrap_or(0)
}

/// The hardware pixel format code of the raw formats and of vertex data.
pub fn hardware_format(format: TextureFormat) -> Option<u32> {
    Some(match format {
        TextureFormat::R8Uint => 0x01,
        TextureFormat::Rg8Uint => 0x02,
        TextureFormat::Rgba8Uint => 0x03,
        TextureFormat::Rgba16Uint => 0x04,
        TextureFormat::Rgba32Uint => 0x05,
        TextureFormat::R32Uint => 0x06,
        TextureFormat::Rgba32Float => 0x10,
        _ => return None,
    })
}

fn buffer_format_for(image_raw: TextureFormat, mask: u8) -> TextureFormat {
    if image_raw == TextureFormat::Rgba8Uint && mask == STENCIL8_MASK {
        TextureFormat::R8Uint
    } else {
        image_raw
    }
}

fn shaped(src: TextureFormat, dst: TextureFormat, mask: u8, shape: Shape) -> FormatKey {
    let (dimension, is_array, is_multisampled) = shape;
    FormatKey {
        src,
        dst,
        write_mask: mask,
        dimension,
        is_array,
        is_multisampled,
    }
}

impl fmt::Display for FormatError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FormatError::Compressed(format) => {
                write!(f, "block compressed format {:?} can not be copied", format)
            }
            FormatError::Unsupported(format) => write!(f, "format {:?} has no raw view", format),
            FormatError::Aspect { format, aspect } => {
                write!(f, "aspect {:?} does not select one part of {:?}", aspect, format)
            }
        }
    }
}

impl std::error::Error for FormatError {}

impl fmt::Display for TableError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TableError::Duplicate(kind, key) => write!(f, "duplicate {:?} entry {:?}", kind, key),
            TableError::TexelSize(kind, key) => {
                write!(f, "texel sizes of {:?} entry {:?} disagree with its formats", kind, key)
            }
            TableError::Unpaired(kind, key) => {
                write!(f, "{:?} entry {:?} has no matching reverse entry", kind, key)
            }
            TableError::SharedKernel(id) => write!(f, "kernel {:?} used by two entries", id),
        }
    }
}

impl std::error::Error for TableError {}
