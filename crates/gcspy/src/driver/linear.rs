use gcspy_types::Color;
use gcspy_types::ControlFlags;
use gcspy_types::EventId;
use gcspy_types::Presentation;
use gcspy_types::SpaceDescriptor;
use gcspy_types::SpaceId;
use gcspy_types::StreamDescriptor;
use gcspy_types::StreamId;
use gcspy_types::StreamKind;

use super::Driver;
use super::Stream;
use super::Subspace;
use crate::error::SpyError;
use crate::error::SpyResult;
use crate::interpreter::Interpreter;
use crate::write_control;

pub const USED_STREAM: StreamId = StreamId(0);
pub const OBJECTS_STREAM: StreamId = StreamId(1);
pub const LIVE_STREAM: StreamId = StreamId(2);
pub const DEAD_STREAM: StreamId = StreamId(3);

const DRIVER_NAME: &str = "LinearSpaceDriver";

/// Driver for a contiguous, bump allocated space.
///
/// Objects are fed in with [`scan`](Self::scan) while the collector walks the
/// space; [`transmit`](Driver::transmit) then reports used bytes and object
/// counts per tile.
#[derive(Debug, Clone)]
pub struct LinearSpaceDriver {
    descriptor: SpaceDescriptor,
    subspace: Subspace,
    streams: [Stream; 4],
    control: Vec<ControlFlags>,
    cursor: Option<usize>,
    info: String,
    names_pending: bool,
}

impl LinearSpaceDriver {
    pub fn new(
        id: SpaceId,
        name: impl Into<String>,
        start: usize,
        end: usize,
        block_size: usize,
    ) -> SpyResult<Self> {
        let subspace = Subspace::new(start, end, block_size)?;
        let tiles = subspace.tile_count();
        let streams = [
            Stream::new(
                StreamDescriptor::new(USED_STREAM, "Used Space", StreamKind::Int)
                    .with_range(0, StreamKind::Int.clamp(block_size as i64))
                    .with_labels("Used: ", " bytes")
                    .with_presentation(Presentation::Percent)
                    .with_color(Color::RED),
                tiles,
            ),
            Stream::new(
                StreamDescriptor::new(OBJECTS_STREAM, "Objects", StreamKind::Short)
                    .with_labels("Objects: ", "")
                    .with_color(Color::BLUE),
                tiles,
            ),
            Stream::new(
                StreamDescriptor::new(LIVE_STREAM, "Live Objects", StreamKind::Short)
                    .with_labels("Live: ", "")
                    .with_color(Color::GREEN),
                tiles,
            ),
            Stream::new(
                StreamDescriptor::new(DEAD_STREAM, "Dead Objects", StreamKind::Short)
                    .with_labels("Dead: ", "")
                    .with_color(Color::ORANGE),
                tiles,
            ),
        ];
        let descriptor = SpaceDescriptor {
            id,
            name: name.into(),
            driver_name: DRIVER_NAME.to_string(),
            title: String::new(),
            block_info: format!("Block Size: {block_size} bytes"),
            tile_count: tile_count_u32(&subspace)?,
            unused_label: "Unused".to_string(),
            main_space: false,
            streams: streams.iter().map(|s| s.descriptor().clone()).collect(),
        };
        let mut driver = Self {
            descriptor,
            subspace,
            streams,
            control: vec![ControlFlags::USED; tiles],
            cursor: None,
            info: String::new(),
            names_pending: true,
        };
        driver.descriptor.title = driver.default_title();
        Ok(driver)
    }

    /// Mark this space as the one the consumer shows first.
    pub fn with_main_space(mut self, main_space: bool) -> Self {
        self.descriptor.main_space = main_space;
        self
    }

    pub fn subspace(&self) -> &Subspace {
        &self.subspace
    }

    pub fn stream(&self, id: StreamId) -> Option<&Stream> {
        self.streams.iter().find(|s| s.id() == id)
    }

    pub fn control(&self) -> &[ControlFlags] {
        &self.control
    }

    /// Move the space to `start..end`, keeping the block size.
    ///
    /// All tiles are reset and the tile names are sent again on the next
    /// transmission.
    pub fn resize(&mut self, start: usize, end: usize) -> SpyResult<()> {
        let subspace = Subspace::new(start, end, self.subspace.block_size())?;
        let tile_count = tile_count_u32(&subspace)?;
        let tiles = subspace.tile_count();
        self.subspace = subspace;
        self.descriptor.tile_count = tile_count;
        self.descriptor.title = self.default_title();
        for stream in &mut self.streams {
            stream.resize(tiles);
        }
        self.control.clear();
        self.control.resize(tiles, ControlFlags::USED);
        self.cursor = None;
        self.names_pending = true;
        tracing::debug!("{} resized to {start:#x}..{end:#x} ({tiles} tiles)", self.descriptor.id);
        Ok(())
    }

    /// Account for the object at `addr` of `size` bytes.
    pub fn scan(&mut self, addr: usize, size: usize, live: bool) -> SpyResult<()> {
        let Some(tile) = self.subspace.index_of(addr) else {
            return Err(SpyError::AddressOutOfRange {
                space: self.descriptor.id,
                addr,
            });
        };
        let [used, objects, live_objects, dead_objects] = &mut self.streams;
        used.distribute(&self.subspace, addr, size)?;
        objects.increment(tile, 1)?;
        if live {
            live_objects.increment(tile, 1)
        } else {
            dead_objects.increment(tile, 1)
        }
    }

    /// Tiles starting at or above `addr` have not been allocated into yet.
    pub fn set_allocation_cursor(&mut self, addr: usize) -> SpyResult<()> {
        if addr < self.subspace.start() || addr > self.subspace.end() {
            return Err(SpyError::AddressOutOfRange {
                space: self.descriptor.id,
                addr,
            });
        }
        for (index, flags) in self.control.iter_mut().enumerate() {
            if self.subspace.tile_start(index) >= addr {
                flags.remove(ControlFlags::USED);
                flags.insert(ControlFlags::UNUSED);
            } else {
                flags.remove(ControlFlags::UNUSED);
                flags.insert(ControlFlags::USED);
            }
        }
        self.cursor = Some(addr);
        Ok(())
    }

    pub fn allocation_cursor(&self) -> Option<usize> {
        self.cursor
    }

    /// Draw a separator before `tile`.
    pub fn set_separator(&mut self, tile: usize) -> SpyResult<()> {
        self.subspace.check_tile(tile)?;
        self.control[tile].insert(ControlFlags::SEPARATOR);
        Ok(())
    }

    /// Free form text shown with the space; a range summary is sent when empty.
    pub fn set_space_info(&mut self, info: impl Into<String>) {
        self.info = info.into();
    }

    fn default_title(&self) -> String {
        format!(
            "{}: {:#x}-{:#x}",
            self.descriptor.name,
            self.subspace.start(),
            self.subspace.end()
        )
    }

    fn space_info(&self) -> String {
        if !self.info.is_empty() {
            return self.info.clone();
        }
        let used = self.streams[0].summary()[0];
        format!(
            "Start: {:#x}\nEnd: {:#x}\nUsed: {used} of {} bytes",
            self.subspace.start(),
            self.subspace.end(),
            self.subspace.len()
        )
    }

    fn send<I: Interpreter + ?Sized>(&mut self, interp: &mut I, event: EventId) -> SpyResult<()> {
        let space = self.descriptor.id;
        interp.begin_space(event, space, self.descriptor.tile_count)?;

        if self.names_pending || interp.needs_tile_names(space) {
            let names: Vec<String> = (0..self.subspace.tile_count())
                .map(|i| self.subspace.tile_label(i))
                .collect();
            interp.write_tile_names(space, &names)?;
        }

        for stream in &self.streams {
            interp.write_stream(space, stream.id(), stream.kind(), stream.values())?;
        }

        write_control!(interp, space, self.descriptor.tile_count)?;
        for flags in &self.control {
            interp.put_control(*flags)?;
        }

        for stream in self.streams.iter().filter(|s| s.descriptor().summary) {
            interp.write_summary(space, stream.id(), &stream.summary())?;
        }
        interp.write_space_info(space, &self.space_info())?;
        interp.end_space(space)?;

        self.names_pending = false;
        Ok(())
    }
}

impl Driver for LinearSpaceDriver {
    fn descriptor(&self) -> &SpaceDescriptor {
        &self.descriptor
    }

    /// Clears per-tile statistics and control flags; the space info and the
    /// pending tile names survive.
    fn reset(&mut self) {
        for stream in &mut self.streams {
            stream.reset();
        }
        self.control.fill(ControlFlags::USED);
        self.cursor = None;
    }

    fn transmit<I: Interpreter + ?Sized>(&mut self, interp: &mut I, event: EventId) -> SpyResult<()> {
        if !interp.is_connected(event) {
            return Ok(());
        }
        interp.start_compensation_timer();
        let result = self.send(interp, event);
        interp.stop_compensation_timer();
        result
    }
}

fn tile_count_u32(subspace: &Subspace) -> SpyResult<u32> {
    u32::try_from(subspace.tile_count()).map_err(|_| SpyError::TooManyItems {
        what: "tiles",
        count: subspace.tile_count(),
    })
}
