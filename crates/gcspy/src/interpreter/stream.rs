use std::collections::HashMap;
use std::collections::HashSet;
use std::io::Write;
use std::time::Duration;
use std::time::Instant;

use gcspy_types::ControlFlags;
use gcspy_types::EventId;
use gcspy_types::ServerInfo;
use gcspy_types::SpaceId;
use gcspy_types::StreamId;
use gcspy_types::StreamKind;

use super::Interpreter;
use crate::config::DEFAULT_MAX_FRAME_LEN;
use crate::error::SpyError;
use crate::error::SpyResult;
use crate::protocol::CommandStream;
use crate::protocol::FRAME_HEADER_LEN;

/// Interpreter that encodes every report onto a byte sink.
///
/// Each space report (`begin_space` to `end_space`) and each safepoint is
/// written as one frame. Misuse of the protocol is reported as an error and
/// nothing reaches the sink until the frame is complete.
#[derive(Debug)]
pub struct StreamInterpreter<W: Write> {
    sink: W,
    stream: CommandStream,
    open_space: Option<SpaceId>,
    /// spaces whose tile names reached the sink
    named_spaces: HashSet<SpaceId>,
    names_in_frame: bool,
    max_frame_len: usize,
    event_counts: HashMap<EventId, u32>,
    compensation: Duration,
    timer_started: Option<Instant>,
}

impl<W: Write> StreamInterpreter<W> {
    pub fn new(sink: W) -> Self {
        Self {
            sink,
            stream: CommandStream::new(),
            open_space: None,
            named_spaces: HashSet::new(),
            names_in_frame: false,
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
            event_counts: HashMap::new(),
            compensation: Duration::ZERO,
            timer_started: None,
        }
    }

    /// Create an interpreter and introduce the server to the consumer.
    pub fn with_hello(sink: W, info: &ServerInfo) -> SpyResult<Self> {
        let mut interp = Self::new(sink);
        interp.stream.hello(info)?;
        interp.flush_frame()?;
        Ok(interp)
    }

    /// Refuse frames whose payload exceeds `len` bytes, as the consumer would.
    pub fn with_max_frame_len(mut self, len: usize) -> Self {
        self.max_frame_len = len;
        self
    }

    /// How often `event` has reached a safepoint.
    pub fn event_count(&self, event: EventId) -> u32 {
        self.event_counts.get(&event).copied().unwrap_or(0)
    }

    /// Total time measured by the compensation timer.
    pub fn compensation(&self) -> Duration {
        self.compensation
    }

    /// Account instrumentation time measured elsewhere.
    pub fn add_compensation(&mut self, elapsed: Duration) {
        self.compensation = self.compensation.saturating_add(elapsed);
    }

    pub fn get_ref(&self) -> &W {
        &self.sink
    }

    pub fn into_inner(self) -> W {
        self.sink
    }

    /// Tell the consumer no more reports follow.
    pub fn send_shutdown(&mut self) -> SpyResult<()> {
        self.discard_report();
        self.stream.shutdown()?;
        self.flush_frame()
    }

    /// Throw away a space report that was begun but not ended.
    pub fn discard_report(&mut self) {
        if let Some(space) = self.open_space.take() {
            tracing::warn!("discarding unfinished report for {space}");
        }
        self.names_in_frame = false;
        self.stream.reset();
    }

    fn ensure_open(&self, space: SpaceId) -> SpyResult<()> {
        match self.open_space {
            Some(open) if open == space => Ok(()),
            Some(open) => Err(SpyError::SpaceMismatch { open, got: space }),
            None => Err(SpyError::NoOpenSpace(space)),
        }
    }

    fn flush_frame(&mut self) -> SpyResult<()> {
        let frame = self.stream.finish()?;
        let len = frame.len() - FRAME_HEADER_LEN;
        if len > self.max_frame_len {
            tracing::warn!(
                "dropping a {len} byte frame, consumers accept at most {}",
                self.max_frame_len
            );
            return Err(SpyError::FrameTooLarge {
                len,
                limit: self.max_frame_len,
            });
        }
        self.sink.write_all(&frame)?;
        self.sink.flush()?;
        tracing::trace!(bytes = frame.len(), "frame written");
        Ok(())
    }
}

impl<W: Write> Interpreter for StreamInterpreter<W> {
    fn is_connected(&self, _event: EventId) -> bool {
        true
    }

    fn begin_space(&mut self, event: EventId, space: SpaceId, tile_count: u32) -> SpyResult<()> {
        if let Some(open) = self.open_space {
            return Err(SpyError::SpaceAlreadyOpen {
                open,
                requested: space,
            });
        }
        self.stream.space_begin(space, event, tile_count)?;
        self.open_space = Some(space);
        self.names_in_frame = false;
        Ok(())
    }

    fn needs_tile_names(&self, space: SpaceId) -> bool {
        !self.named_spaces.contains(&space)
    }

    fn write_tile_names(&mut self, space: SpaceId, names: &[String]) -> SpyResult<()> {
        self.ensure_open(space)?;
        self.stream.tile_names(space, names)?;
        self.names_in_frame = true;
        Ok(())
    }

    fn write_stream(
        &mut self,
        space: SpaceId,
        stream: StreamId,
        kind: StreamKind,
        values: &[i32],
    ) -> SpyResult<()> {
        self.ensure_open(space)?;
        self.stream.stream_data(space, stream, kind, values)
    }

    fn write_control(&mut self, space: SpaceId, len: u32) -> SpyResult<()> {
        self.ensure_open(space)?;
        self.stream.control(space, len)
    }

    fn put_control(&mut self, flags: ControlFlags) -> SpyResult<()> {
        self.stream.control_value(flags)
    }

    fn write_summary(&mut self, space: SpaceId, stream: StreamId, values: &[i32]) -> SpyResult<()> {
        self.ensure_open(space)?;
        self.stream.summary(space, stream, values)
    }

    fn write_space_info(&mut self, space: SpaceId, info: &str) -> SpyResult<()> {
        self.ensure_open(space)?;
        self.stream.space_info(space, info)
    }

    fn end_space(&mut self, space: SpaceId) -> SpyResult<()> {
        self.ensure_open(space)?;
        self.stream.space_end(space)?;
        self.open_space = None;
        let named = std::mem::take(&mut self.names_in_frame);
        self.flush_frame()?;
        if named {
            self.named_spaces.insert(space);
        }
        Ok(())
    }

    fn safepoint(&mut self, event: EventId) -> SpyResult<()> {
        if let Some(open) = self.open_space {
            return Err(SpyError::SafepointInsideSpace { event, open });
        }
        let count = self.event_counts.entry(event).or_insert(0);
        *count = count.saturating_add(1);
        let count = *count;
        self.stream.safepoint(event, count, self.compensation)?;
        self.flush_frame()
    }

    fn start_compensation_timer(&mut self) {
        self.timer_started.get_or_insert_with(Instant::now);
    }

    fn stop_compensation_timer(&mut self) {
        if let Some(started) = self.timer_started.take() {
            self.add_compensation(started.elapsed());
        }
    }
}
