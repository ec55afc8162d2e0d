//! Checks that the format table answers every key the encoder constructs.
#[path = "util.rs"]
mod util;

use tilejob::format::{
    self, check_consistency, FormatError, FormatKey, FormatResolver, FormatTable, KernelId,
    OperationKind, TableEntry, TableError, COPYABLE_FORMATS, RAW_FORMATS, WORD_FORMAT,
};
use wgpu::{TextureAspect, TextureDimension, TextureFormat};

const ASPECTS: [TextureAspect; 3] = [
    TextureAspect::All,
    TextureAspect::DepthOnly,
    TextureAspect::StencilOnly,
];

const SHAPES: [(TextureDimension, bool); 5] = [
    (TextureDimension::D1, false),
    (TextureDimension::D1, true),
    (TextureDimension::D2, false),
    (TextureDimension::D2, true),
    (TextureDimension::D3, false),
];

#[test]
fn standard_is_consistent() {
    util::init_logging();
    let table = FormatTable::standard().expect("Standard table has no duplicates");
    assert!(!table.is_empty());
    check_consistency(&table).expect("Standard table is consistent");
}

#[test]
fn lookup_is_total() {
    let table = FormatTable::standard().unwrap();
    let mut checked = 0;

    for &format in COPYABLE_FORMATS {
        for aspect in ASPECTS {
            let (image, buffer) = match (
                format::image_view(format, aspect),
                format::buffer_view(format, aspect),
            ) {
                (Ok(image), Ok(buffer)) => (image, buffer),
                _ => continue,
            };

            for (dimension, is_array) in SHAPES {
                let to_buffer = FormatKey {
                    src: image.format,
                    dst: buffer.format,
                    write_mask: image.mask,
                    dimension,
                    is_array,
                    is_multisampled: false,
                };

                let to_image = FormatKey {
                    src: buffer.format,
                    dst: image.format,
                    ..to_buffer
                };

                let between = FormatKey {
                    src: image.format,
                    dst: image.format,
                    ..to_buffer
                };

                for (kind, key) in [
                    (OperationKind::ImageToBuffer, to_buffer),
                    (OperationKind::BufferToImage, to_image),
                    (OperationKind::ImageToImage, between),
                ] {
                    assert!(
                        table.lookup(kind, &key).is_some(),
                        "{:?} {:?} of {:?} has no kernel",
                        kind,
                        key,
                        format
                    );
                    checked += 1;
                }

                if dimension == TextureDimension::D2 {
                    let multisampled = FormatKey {
                        is_multisampled: true,
                        ..between
                    };
                    assert!(table
                        .lookup(OperationKind::ImageToImage, &multisampled)
                        .is_some());
                }
            }
        }
    }

    for raw in RAW_FORMATS {
        let key = FormatKey::linear(raw);
        assert!(table.lookup(OperationKind::BufferToBuffer, &key).is_some());
    }

    let word = FormatKey::linear(WORD_FORMAT);
    assert!(table.lookup(OperationKind::FillBuffer, &word).is_some());
    assert!(table.lookup(OperationKind::UpdateBuffer, &word).is_some());

    assert!(checked > 0);
}

#[test]
fn kernels_are_unique() {
    let table = FormatTable::standard().unwrap();
    let mut kernels = std::collections::HashSet::new();
    let mut entries = 0;

    table.for_each_entry(&mut |kind, _, entry| {
        assert_eq!(entry.kernel.kind, kind);
        assert!(kernels.insert(entry.kernel));
        entries += 1;
    });

    assert_eq!(entries, table.len());
}

#[test]
fn raw_views() {
    let r8 = format::image_view(TextureFormat::R8Unorm, TextureAspect::All).unwrap();
    assert_eq!(r8.format, TextureFormat::R8Uint);
    assert_eq!((r8.mask, r8.texel_size), (0x1, 1));

    let float = format::image_view(TextureFormat::Rg32Float, TextureAspect::All).unwrap();
    assert_eq!(float.format, TextureFormat::Rgba16Uint);

    let depth =
        format::image_view(TextureFormat::Depth24PlusStencil8, TextureAspect::DepthOnly).unwrap();
    assert_eq!((depth.format, depth.mask), (TextureFormat::Rgba8Uint, 0x7));

    let stencil = TextureFormat::Depth24PlusStencil8;
    let image = format::image_view(stencil, TextureAspect::StencilOnly).unwrap();
    assert_eq!((image.format, image.mask), (TextureFormat::Rgba8Uint, 0x8));

    // A stencil byte is stored tightly in buffers.
    let buffer = format::buffer_view(stencil, TextureAspect::StencilOnly).unwrap();
    assert_eq!((buffer.format, buffer.texel_size), (TextureFormat::R8Uint, 1));
}

#[test]
fn unsupported_views() {
    assert_eq!(
        format::image_view(TextureFormat::Bc1RgbaUnorm, TextureAspect::All),
        Err(FormatError::Compressed(TextureFormat::Bc1RgbaUnorm))
    );

    // A combined format needs one aspect named.
    assert_eq!(
        format::image_view(TextureFormat::Depth24PlusStencil8, TextureAspect::All),
        Err(FormatError::Aspect {
            format: TextureFormat::Depth24PlusStencil8,
            aspect: TextureAspect::All,
        })
    );

    assert!(format::image_view(TextureFormat::Rgba8Unorm, TextureAspect::StencilOnly).is_err());
}

/// A table with a single buffer to image entry.
struct Lonely {
    key: FormatKey,
    entry: TableEntry,
}

impl FormatResolver for Lonely {
    fn lookup(&self, kind: OperationKind, key: &FormatKey) -> Option<&TableEntry> {
        (kind == OperationKind::BufferToImage && *key == self.key).then_some(&self.entry)
    }

    fn for_each_entry(&self, visit: &mut dyn FnMut(OperationKind, &FormatKey, &TableEntry)) {
        visit(OperationKind::BufferToImage, &self.key, &self.entry)
    }
}

#[test]
fn unpaired_entry_is_detected() {
    let key = FormatKey {
        dimension: TextureDimension::D2,
        ..FormatKey::linear(TextureFormat::R8Uint)
    };

    let entry = TableEntry {
        kernel: KernelId {
            kind: OperationKind::BufferToImage,
            row: 0,
        },
        conversion: format::Conversion::Store { component_mask: 1 },
        src_texel_size: 1,
        dst_texel_size: 1,
    };

    let lonely = Lonely { key, entry };
    assert_eq!(
        check_consistency(&lonely),
        Err(TableError::Unpaired(OperationKind::BufferToImage, key))
    );

    let wrong_size = Lonely {
        key,
        entry: TableEntry {
            src_texel_size: 4,
            ..entry
        },
    };
    assert_eq!(
        check_consistency(&wrong_size),
        Err(TableError::TexelSize(OperationKind::BufferToImage, key))
    );
}
