use gcspy_types::Presentation;
use gcspy_types::StreamDescriptor;
use gcspy_types::StreamId;
use gcspy_types::StreamKind;

use super::Subspace;
use crate::error::SpyError;
use crate::error::SpyResult;

/// Per-tile values of one stream.
///
/// Values saturate at the range of the stream kind instead of wrapping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stream {
    descriptor: StreamDescriptor,
    values: Vec<i32>,
}

impl Stream {
    pub fn new(descriptor: StreamDescriptor, tiles: usize) -> Self {
        let values = vec![descriptor.default_value; tiles];
        Self { descriptor, values }
    }

    pub fn descriptor(&self) -> &StreamDescriptor {
        &self.descriptor
    }

    pub fn id(&self) -> StreamId {
        self.descriptor.id
    }

    pub fn kind(&self) -> StreamKind {
        self.descriptor.kind
    }

    pub fn values(&self) -> &[i32] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn reset(&mut self) {
        self.values.fill(self.descriptor.default_value);
    }

    /// Change the tile count; every tile is reset.
    pub fn resize(&mut self, tiles: usize) {
        self.values.clear();
        self.values.resize(tiles, self.descriptor.default_value);
    }

    pub fn get(&self, tile: usize) -> SpyResult<i32> {
        self.values.get(tile).copied().ok_or(SpyError::TileOutOfRange {
            index: tile,
            tiles: self.values.len(),
        })
    }

    pub fn set(&mut self, tile: usize, value: i64) -> SpyResult<()> {
        let kind = self.kind();
        *self.slot(tile)? = kind.clamp(value);
        Ok(())
    }

    pub fn increment(&mut self, tile: usize, by: i64) -> SpyResult<()> {
        let kind = self.kind();
        let slot = self.slot(tile)?;
        *slot = kind.clamp(i64::from(*slot).saturating_add(by));
        Ok(())
    }

    /// Add the bytes of the object at `addr..addr + size` to every tile it
    /// overlaps, each tile getting its share of the overlap.
    ///
    /// The part of the object past the end of `subspace` is ignored.
    pub fn distribute(&mut self, subspace: &Subspace, addr: usize, size: usize) -> SpyResult<()> {
        let Some(first) = subspace.index_of(addr) else {
            return Err(SpyError::TileOutOfRange {
                index: addr.saturating_sub(subspace.start()) / subspace.block_size(),
                tiles: self.values.len(),
            });
        };
        let end = addr.saturating_add(size).min(subspace.end());
        let mut tile = first;
        let mut from = addr;
        while from < end {
            let to = subspace.tile_end(tile).min(end);
            self.increment(tile, (to - from) as i64)?;
            from = to;
            tile += 1;
        }
        Ok(())
    }

    /// Summary values: the total, plus the maximum possible total for
    /// percentage streams.
    pub fn summary(&self) -> Vec<i32> {
        let sum: i64 = self.values.iter().map(|v| i64::from(*v)).sum();
        let sum = StreamKind::Int.clamp(sum);
        match self.descriptor.presentation {
            Presentation::Percent => {
                let max = i64::from(self.descriptor.max_value) * self.values.len() as i64;
                vec![sum, StreamKind::Int.clamp(max)]
            }
            _ => vec![sum],
        }
    }

    fn slot(&mut self, tile: usize) -> SpyResult<&mut i32> {
        let tiles = self.values.len();
        self.values
            .get_mut(tile)
            .ok_or(SpyError::TileOutOfRange { index: tile, tiles })
    }
}
