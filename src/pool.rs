use core::fmt;

use slotmap::{DefaultKey, SlotMap};

use crate::util::align_up;

/// An address in the GPU's virtual address space.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[derive(bytemuck::Pod, bytemuck::Zeroable)]
#[repr(transparent)]
pub struct GpuAddress(pub u64);

/// Hands out GPU-visible scratch memory.
///
/// A real driver returns linked CPU/GPU pointer pairs here. The CPU half is modelled by `write`,
/// which addresses the allocation through its GPU address. Every byte range is written once by
/// the encoder and then only read by the GPU.
pub trait ScratchPool {
    /// Reserve `size` bytes aligned to the power-of-two `align`.
    fn allocate(&mut self, size: u64, align: u64) -> Result<GpuAddress, PoolError>;

    /// Write bytes into previously allocated memory.
    fn write(&mut self, at: GpuAddress, bytes: &[u8]) -> Result<(), PoolError>;

    /// Allocate and fill memory in one go.
    fn upload(&mut self, bytes: &[u8], align: u64) -> Result<GpuAddress, PoolError> {
        let at = self.allocate(bytes.len() as u64, align)?;
        self.write(at, bytes)?;
        log::trace!("uploaded {} bytes to {:#x}", bytes.len(), at.0);
        Ok(at)
    }
}

/// Memory as seen from a running kernel.
pub trait GpuMemory {
    fn read(&self, at: GpuAddress, into: &mut [u8]) -> Result<(), PoolError>;
    fn write(&mut self, at: GpuAddress, bytes: &[u8]) -> Result<(), PoolError>;
}

/// A host backed reference pool.
///
/// Memory is handed out from a number of arenas, each covering a disjoint range of the fake GPU
/// address space. Arenas are never freed while the pool lives, matching the write-once and
/// read-until-submitted lifetime of descriptors.
pub struct Pool {
    arenas: SlotMap<DefaultKey, Arena>,
    /// The arena that we currently bump allocate from.
    current: Option<DefaultKey>,
    chunk_size: u64,
    /// Upper bound on the total number of bytes backing all arenas.
    limit: Option<u64>,
    next_base: u64,
    committed: u64,
}

struct Arena {
    base: u64,
    data: Vec<u8>,
    /// Offset of the first unallocated byte.
    top: u64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PoolError {
    /// The pool can not back the requested allocation.
    OutOfMemory { requested: u64 },
    /// The range is not inside any allocation of the pool.
    Unmapped { at: GpuAddress, len: u64 },
}

impl Pool {
    /// The first address handed out, so that null is never a valid allocation.
    const BASE: u64 = 0x1_0000;
    const DEFAULT_CHUNK: u64 = 64 * 1024;

    /// Create an empty pool.
    pub fn new() -> Self {
        Pool::with_chunk_size(Self::DEFAULT_CHUNK)
    }

    /// Create an empty pool growing in steps of `chunk_size` bytes.
    pub fn with_chunk_size(chunk_size: u64) -> Self {
        Pool {
            arenas: SlotMap::new(),
            current: None,
            chunk_size: chunk_size.max(256),
            limit: None,
            next_base: Self::BASE,
            committed: 0,
        }
    }

    /// Fail allocations once the arenas would exceed `limit` bytes in total.
    pub fn with_limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    /// The number of bytes backed by arenas.
    pub fn committed(&self) -> u64 {
        self.committed
    }

    /// Read a little-endian `u32`.
    pub fn read_u32(&self, at: GpuAddress) -> Result<u32, PoolError> {
        let mut bytes = [0; 4];
        GpuMemory::read(self, at, &mut bytes)?;
        Ok(u32::from_le_bytes(bytes))
    }

    /// Read a little-endian `u64`.
    pub fn read_u64(&self, at: GpuAddress) -> Result<u64, PoolError> {
        let mut bytes = [0; 8];
        GpuMemory::read(self, at, &mut bytes)?;
        Ok(u64::from_le_bytes(bytes))
    }

    /// Copy out a byte range.
    pub fn read_bytes(&self, at: GpuAddress, len: usize) -> Result<Vec<u8>, PoolError> {
        let mut bytes = vec![0; len];
        GpuMemory::read(self, at, &mut bytes)?;
        Ok(bytes)
    }

    fn new_arena(&mut self, min_size: u64) -> Result<DefaultKey, PoolError> {
        let size = min_size.max(self.chunk_size);

        if let Some(limit) = self.limit {
            if self.committed + size > limit {
                return Err(PoolError::OutOfMemory { requested: min_size });
            }
        }

        let len = usize::try_from(size).map_err(|_| PoolError::OutOfMemory { requested: size })?;
        let base = self.next_base;
        // Leave a gap so that overruns never land in the neighbouring arena.
        self.next_base = align_up(base + size, Self::BASE) + Self::BASE;
        self.committed += size;

        Ok(self.arenas.insert(Arena {
            base,
            data: vec![0; len],
            top: 0,
        }))
    }

    fn find(&self, at: GpuAddress, len: u64) -> Result<(DefaultKey, usize), PoolError> {
        let unmapped = PoolError::Unmapped { at, len };
        let end = at.0.checked_add(len).ok_or(unmapped)?;

        self.arenas
            .iter()
            .find(|(_, arena)| arena.base <= at.0 && end <= arena.base + arena.top)
            .map(|(key, arena)| (key, (at.0 - arena.base) as usize))
            .ok_or(unmapped)
    }
}

impl ScratchPool for Pool {
    fn allocate(&mut self, size: u64, align: u64) -> Result<GpuAddress, PoolError> {
        let align = align.max(1);
        debug_assert!(align.is_power_of_two());

        let fits = |arena: &Arena| {
            let start = align_up(arena.base + arena.top, align) - arena.base;
            Some(start).filter(|&start| start + size <= arena.data.len() as u64)
        };

        let current = self
            .current
            .and_then(|key| Some((key, fits(&self.arenas[key])?)));

        let (key, start) = match current {
            Some(found) => found,
            None => {
                // Arenas bases are aligned to `BASE`, larger alignments need slack.
                let key = self.new_arena(size + align.saturating_sub(Self::BASE))?;
                self.current = Some(key);
                let start = fits(&self.arenas[key]).ok_or(PoolError::OutOfMemory { requested: size })?;
                (key, start)
            }
        };

        let arena = &mut self.arenas[key];
        arena.top = start + size;
        Ok(GpuAddress(arena.base + start))
    }

    fn write(&mut self, at: GpuAddress, bytes: &[u8]) -> Result<(), PoolError> {
        GpuMemory::write(self, at, bytes)
    }
}

impl GpuMemory for Pool {
    fn read(&self, at: GpuAddress, into: &mut [u8]) -> Result<(), PoolError> {
        let (key, offset) = self.find(at, into.len() as u64)?;
        into.copy_from_slice(&self.arenas[key].data[offset..][..into.len()]);
        Ok(())
    }

    fn write(&mut self, at: GpuAddress, bytes: &[u8]) -> Result<(), PoolError> {
        let (key, offset) = self.find(at, bytes.len() as u64)?;
        self.arenas[key].data[offset..][..bytes.len()].copy_from_slice(bytes);
        Ok(())
    }
}

impl Default for Pool {
    fn default() -> Self {
        Pool::new()
    }
}

impl GpuAddress {
    pub const NULL: Self = GpuAddress(0);

    pub fn is_null(self) -> bool {
        self.0 == 0
    }

    /// The address `bytes` further, wrapping at the end of the address space.
    #[must_use]
    pub fn offset(self, bytes: u64) -> Self {
        GpuAddress(self.0.wrapping_add(bytes))
    }
}

impl From<GpuAddress> for u64 {
    fn from(address: GpuAddress) -> u64 {
        address.0
    }
}

impl fmt::Display for PoolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PoolError::OutOfMemory { requested } => {
                write!(f, "out of scratch memory allocating {} bytes", requested)
            }
            PoolError::Unmapped { at, len } => {
                write!(f, "{} bytes at {:#x} are not mapped", len, at.0)
            }
        }
    }
}

impl std::error::Error for PoolError {}
