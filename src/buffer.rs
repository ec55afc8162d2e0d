//! Defines the memory layout of buffers and images as seen by the encoder.
use wgpu::{TextureAspect, TextureDimension, TextureFormat};

use crate::format;
use crate::pool::GpuAddress;

/// A linear range of GPU memory.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct BufferResource {
    pub base: GpuAddress,
    pub size: u64,
}

/// The placement of one mip level, relative to the start of an array layer.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct LevelLayout {
    pub offset: u64,
    pub row_stride: u32,
    /// Bytes between depth slices of 3D images, or between the samples planes of a
    /// multisampled level.
    pub slice_stride: u32,
}

/// A linear image.
///
/// An inner invariant is that all layers share one layout, `layer_stride` bytes apart.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ImageResource {
    pub base: GpuAddress,
    pub format: TextureFormat,
    pub dimension: TextureDimension,
    /// Extent of the first level. The depth is one unless the image is 3D.
    pub extent: [u32; 3],
    pub levels: Vec<LevelLayout>,
    pub array_layers: u32,
    pub layer_stride: u64,
    pub sample_count: u32,
}

/// Why an image resource is unusable.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ImageError {
    NoLevels,
    NoLayers,
    EmptyExtent,
    /// Only 2D images may be multisampled.
    Multisampled,
    /// 3D images have exactly one layer and 1D images are one texel high.
    Shape,
}

impl BufferResource {
    pub fn new(base: GpuAddress, size: u64) -> Self {
        BufferResource { base, size }
    }

    /// Whether `size` bytes at `offset` are inside the buffer and the address space.
    pub fn contains(&self, offset: u64, size: u64) -> bool {
        offset
            .checked_add(size)
            .filter(|&end| end <= self.size)
            .and_then(|end| self.base.0.checked_add(end))
            .is_some()
    }

    pub fn address(&self, offset: u64) -> GpuAddress {
        self.base.offset(offset)
    }
}

impl ImageResource {
    /// A tightly packed single sample image with a full mip chain of `levels`.
    ///
    /// Rows are aligned to 64 bytes. Packed depth formats are stored as their 4-byte raw texel.
    /// Returns `None` for formats without a raw view.
    pub fn linear(
        base: GpuAddress,
        format: TextureFormat,
        dimension: TextureDimension,
        extent: [u32; 3],
        levels: u32,
        array_layers: u32,
    ) -> Option<Self> {
        let texel = match format.block_copy_size(None) {
            Some(size) => size,
            None => {
                let view = format::image_view(format, TextureAspect::DepthOnly).ok()?;
                u32::from(view.texel_size)
            }
        };

        let mut offset = 0;
        let mut layouts = Vec::with_capacity(levels as usize);
        for level in 0..levels {
            let [width, height, depth] = level_extent(dimension, extent, level);
            let row_stride = (width.checked_mul(texel)?).checked_next_multiple_of(64)?;
            let slice_stride = row_stride.checked_mul(height)?;

            layouts.push(LevelLayout {
                offset,
                row_stride,
                slice_stride,
            });

            offset += u64::from(slice_stride) * u64::from(depth);
        }

        Some(ImageResource {
            base,
            format,
            dimension,
            extent,
            levels: layouts,
            array_layers,
            layer_stride: offset.next_multiple_of(64),
            sample_count: 1,
        })
    }

    pub fn validate(&self) -> Result<(), ImageError> {
        if self.levels.is_empty() {
            return Err(ImageError::NoLevels);
        }

        if self.array_layers == 0 {
            return Err(ImageError::NoLayers);
        }

        if self.extent.contains(&0) {
            return Err(ImageError::EmptyExtent);
        }

        if self.sample_count > 1 && self.dimension != TextureDimension::D2 {
            return Err(ImageError::Multisampled);
        }

        let shape_ok = match self.dimension {
            TextureDimension::D1 => self.extent[1] == 1 && self.extent[2] == 1,
            TextureDimension::D2 => self.extent[2] == 1,
            TextureDimension::D3 => self.array_layers == 1,
        };

        if !shape_ok {
            return Err(ImageError::Shape);
        }

        Ok(())
    }

    /// The extent of a mip level.
    pub fn level_extent(&self, level: u32) -> [u32; 3] {
        level_extent(self.dimension, self.extent, level)
    }

    pub fn level(&self, level: u32) -> Option<&LevelLayout> {
        self.levels.get(level as usize)
    }

    pub fn is_array(&self) -> bool {
        self.dimension != TextureDimension::D3 && self.array_layers > 1
    }

    pub fn is_multisampled(&self) -> bool {
        self.sample_count > 1
    }

    /// The address of the first texel of a level within one array layer.
    pub fn surface(&self, level: u32, layer: u32) -> Option<GpuAddress> {
        let layout = self.level(level)?;
        let layer = u64::from(layer).checked_mul(self.layer_stride)?;
        Some(self.base.offset(layer + layout.offset))
    }
}

fn level_extent(dimension: TextureDimension, extent: [u32; 3], level: u32) -> [u32; 3] {
    let minify = |size: u32| size.checked_shr(level).unwrap_or(0).max(1);
    match dimension {
        TextureDimension::D1 => [minify(extent[0]), 1, 1],
        TextureDimension::D2 => [minify(extent[0]), minify(extent[1]), 1],
        TextureDimension::D3 => [minify(extent[0]), minify(extent[1]), minify(extent[2])],
    }
}
