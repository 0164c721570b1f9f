//! Collector-side drivers that turn heap state into space reports.

pub mod linear;
pub mod stream;

use gcspy_types::EventId;
use gcspy_types::SpaceDescriptor;
pub use linear::LinearSpaceDriver;
pub use stream::Stream;

use crate::error::SpyError;
use crate::error::SpyResult;
use crate::interpreter::Interpreter;

/// A space the collector wants visualised.
pub trait Driver {
    fn descriptor(&self) -> &SpaceDescriptor;

    /// Forget the statistics gathered since the last transmission.
    fn reset(&mut self);

    /// Report the gathered statistics for `event`.
    ///
    /// Does nothing when `interp` is not connected for `event`.
    fn transmit<I: Interpreter + ?Sized>(&mut self, interp: &mut I, event: EventId) -> SpyResult<()>;
}

/// A contiguous address range cut into tiles of `block_size` bytes.
///
/// The last tile may be shorter than `block_size`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Subspace {
    start: usize,
    end: usize,
    block_size: usize,
    tile_count: usize,
}

impl Subspace {
    pub fn new(start: usize, end: usize, block_size: usize) -> SpyResult<Self> {
        if block_size == 0 || end < start {
            return Err(SpyError::InvalidRange {
                start,
                end,
                block_size,
            });
        }
        Ok(Self {
            start,
            end,
            block_size,
            tile_count: (end - start).div_ceil(block_size),
        })
    }

    pub fn start(&self) -> usize {
        self.start
    }

    pub fn end(&self) -> usize {
        self.end
    }

    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    pub fn tile_count(&self) -> usize {
        self.tile_count
    }

    pub fn contains(&self, addr: usize) -> bool {
        addr >= self.start && addr < self.end
    }

    pub fn index_of(&self, addr: usize) -> Option<usize> {
        self.contains(addr).then(|| (addr - self.start) / self.block_size)
    }

    pub fn tile_start(&self, index: usize) -> usize {
        self.start + index * self.block_size
    }

    /// Exclusive end of tile `index`, clipped to the end of the range.
    pub fn tile_end(&self, index: usize) -> usize {
        self.tile_start(index)
            .saturating_add(self.block_size)
            .min(self.end)
    }

    pub fn tile_label(&self, index: usize) -> String {
        format!("{:#x}-{:#x}", self.tile_start(index), self.tile_end(index))
    }

    pub(crate) fn check_tile(&self, index: usize) -> SpyResult<()> {
        if index < self.tile_count {
            Ok(())
        } else {
            Err(SpyError::TileOutOfRange {
                index,
                tiles: self.tile_count,
            })
        }
    }
}
