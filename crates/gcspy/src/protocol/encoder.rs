//! Command stream encoder.

use std::time::Duration;

use gcspy_types::ControlFlags;
use gcspy_types::EventId;
use gcspy_types::ServerInfo;
use gcspy_types::SpaceDescriptor;
use gcspy_types::SpaceId;
use gcspy_types::StreamDescriptor;
use gcspy_types::StreamId;
use gcspy_types::StreamKind;

use super::opcode;
use super::FRAME_HEADER_LEN;
use super::NO_STREAM;
use super::PROTOCOL_VERSION;
use crate::error::SpyError;
use crate::error::SpyResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct OpenControl {
    space: SpaceId,
    remaining: u32,
}

/// Accumulates commands into a single frame.
///
/// A command that fails validation leaves the frame exactly as it was before
/// the call. A control block opened with [`CommandStream::control`] must be
/// filled with exactly `len` values before any other command is accepted.
#[derive(Debug, Clone)]
pub struct CommandStream {
    buf: Vec<u8>,
    control: Option<OpenControl>,
}

impl Default for CommandStream {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandStream {
    pub fn new() -> Self {
        Self {
            buf: vec![0; FRAME_HEADER_LEN],
            control: None,
        }
    }

    /// True when no command has been added since the last `finish`.
    pub fn is_empty(&self) -> bool {
        self.buf.len() == FRAME_HEADER_LEN
    }

    /// Length of the payload encoded so far.
    pub fn payload_len(&self) -> usize {
        self.buf.len() - FRAME_HEADER_LEN
    }

    /// Drop everything encoded since the last `finish`.
    pub fn reset(&mut self) {
        self.buf.truncate(FRAME_HEADER_LEN);
        self.control = None;
    }

    /// Close the frame and hand out its bytes, length prefix included.
    pub fn finish(&mut self) -> SpyResult<Vec<u8>> {
        self.ensure_no_open_control()?;
        let len = u32::try_from(self.payload_len()).map_err(|_| SpyError::TooManyItems {
            what: "frame bytes",
            count: self.payload_len(),
        })?;
        let mut frame = std::mem::replace(&mut self.buf, vec![0; FRAME_HEADER_LEN]);
        frame[..FRAME_HEADER_LEN].copy_from_slice(&len.to_be_bytes());
        Ok(frame)
    }

    pub fn hello(&mut self, info: &ServerInfo) -> SpyResult<()> {
        self.command(opcode::HELLO, |s| {
            s.put_u8(PROTOCOL_VERSION);
            s.put_str(&info.name)?;
            s.put_str(&info.version)?;
            s.put_str(&info.general_info)?;
            s.put_u16_count("events", info.events.len())?;
            for event in &info.events {
                s.put_str(event)?;
            }
            s.put_u8_count("spaces", info.spaces.len())?;
            for space in &info.spaces {
                s.put_space_def(space)?;
            }
            Ok(())
        })
    }

    pub fn space_def(&mut self, space: &SpaceDescriptor) -> SpyResult<()> {
        self.command(opcode::SPACE_DEF, |s| s.put_space_def(space))
    }

    pub fn space_begin(&mut self, space: SpaceId, event: EventId, tile_count: u32) -> SpyResult<()> {
        self.command(opcode::SPACE_BEGIN, |s| {
            s.put_u8(space.0);
            s.put_u16(event.0);
            s.put_u32(tile_count);
            Ok(())
        })
    }

    pub fn tile_names(&mut self, space: SpaceId, names: &[String]) -> SpyResult<()> {
        self.command(opcode::TILE_NAMES, |s| {
            s.put_u8(space.0);
            s.put_u32_count("tile names", names.len())?;
            for name in names {
                s.put_str(name)?;
            }
            Ok(())
        })
    }

    pub fn stream_data(
        &mut self,
        space: SpaceId,
        stream: StreamId,
        kind: StreamKind,
        values: &[i32],
    ) -> SpyResult<()> {
        self.command(opcode::STREAM_DATA, |s| {
            s.put_u8(space.0);
            s.put_u8(stream.0);
            s.put_u8(kind.code());
            s.put_u32_count("stream values", values.len())?;
            for &value in values {
                s.put_value(kind, value)?;
            }
            Ok(())
        })
    }

    /// Open a control block of `len` entries for `space`.
    pub fn control(&mut self, space: SpaceId, len: u32) -> SpyResult<()> {
        self.command(opcode::CONTROL, |s| {
            s.put_u8(space.0);
            s.put_u32(len);
            Ok(())
        })?;
        if len > 0 {
            self.control = Some(OpenControl {
                space,
                remaining: len,
            });
        }
        Ok(())
    }

    /// Append one entry to the open control block.
    pub fn control_value(&mut self, flags: ControlFlags) -> SpyResult<()> {
        let open = self.control.as_mut().ok_or(SpyError::NoOpenControl)?;
        open.remaining -= 1;
        if open.remaining == 0 {
            self.control = None;
        }
        self.buf.push(flags.bits());
        Ok(())
    }

    pub fn summary(&mut self, space: SpaceId, stream: StreamId, values: &[i32]) -> SpyResult<()> {
        self.command(opcode::SUMMARY, |s| {
            s.put_u8(space.0);
            s.put_u8(stream.0);
            s.put_u32_count("summary values", values.len())?;
            for &value in values {
                s.put_i32(value);
            }
            Ok(())
        })
    }

    pub fn space_info(&mut self, space: SpaceId, info: &str) -> SpyResult<()> {
        self.command(opcode::SPACE_INFO, |s| {
            s.put_u8(space.0);
            s.put_str(info)
        })
    }

    pub fn space_end(&mut self, space: SpaceId) -> SpyResult<()> {
        self.command(opcode::SPACE_END, |s| {
            s.put_u8(space.0);
            Ok(())
        })
    }

    pub fn safepoint(&mut self, event: EventId, count: u32, compensation: Duration) -> SpyResult<()> {
        self.command(opcode::SAFEPOINT, |s| {
            s.put_u16(event.0);
            s.put_u32(count);
            s.put_u64(u64::try_from(compensation.as_micros()).unwrap_or(u64::MAX));
            Ok(())
        })
    }

    pub fn shutdown(&mut self) -> SpyResult<()> {
        self.command(opcode::SHUTDOWN, |_| Ok(()))
    }

    pub fn play(&mut self) -> SpyResult<()> {
        self.command(opcode::PLAY, |_| Ok(()))
    }

    pub fn pause(&mut self) -> SpyResult<()> {
        self.command(opcode::PAUSE, |_| Ok(()))
    }

    pub fn step(&mut self) -> SpyResult<()> {
        self.command(opcode::STEP, |_| Ok(()))
    }

    pub fn enable_event(&mut self, event: EventId, enabled: bool) -> SpyResult<()> {
        self.command(opcode::ENABLE_EVENT, |s| {
            s.put_u16(event.0);
            s.put_u8(u8::from(enabled));
            Ok(())
        })
    }

    pub fn disconnect(&mut self) -> SpyResult<()> {
        self.command(opcode::DISCONNECT, |_| Ok(()))
    }

    fn command<F>(&mut self, op: u8, body: F) -> SpyResult<()>
    where F: FnOnce(&mut Self) -> SpyResult<()> {
        self.ensure_no_open_control()?;
        let mark = self.buf.len();
        self.buf.push(op);
        if let Err(err) = body(self) {
            self.buf.truncate(mark);
            return Err(err);
        }
        Ok(())
    }

    fn ensure_no_open_control(&self) -> SpyResult<()> {
        match self.control {
            Some(open) => Err(SpyError::IncompleteControl {
                space: open.space,
                remaining: open.remaining,
            }),
            None => Ok(()),
        }
    }

    fn put_space_def(&mut self, space: &SpaceDescriptor) -> SpyResult<()> {
        self.put_u8(space.id.0);
        self.put_str(&space.name)?;
        self.put_str(&space.driver_name)?;
        self.put_str(&space.title)?;
        self.put_str(&space.block_info)?;
        self.put_u32(space.tile_count);
        self.put_str(&space.unused_label)?;
        self.put_u8(u8::from(space.main_space));
        self.put_u8_count("streams", space.streams.len())?;
        for stream in &space.streams {
            self.put_stream_def(stream)?;
        }
        Ok(())
    }

    fn put_stream_def(&mut self, stream: &StreamDescriptor) -> SpyResult<()> {
        self.put_u8(stream.id.0);
        self.put_str(&stream.name)?;
        self.put_u8(stream.kind.code());
        self.put_i32(stream.min_value);
        self.put_i32(stream.max_value);
        self.put_i32(stream.zero_value);
        self.put_i32(stream.default_value);
        self.put_str(&stream.prefix)?;
        self.put_str(&stream.suffix)?;
        self.put_u8(stream.presentation.code());
        self.put_u8(stream.paint_style.code());
        self.put_u8(stream.max_stream.map_or(NO_STREAM, |id| id.0));
        self.put_u8(stream.color.r);
        self.put_u8(stream.color.g);
        self.put_u8(stream.color.b);
        self.put_u8(u8::from(stream.summary));
        Ok(())
    }

    fn put_u8(&mut self, value: u8) {
        self.buf.push(value);
    }

    fn put_u16(&mut self, value: u16) {
        self.buf.extend_from_slice(&value.to_be_bytes());
    }

    fn put_u32(&mut self, value: u32) {
        self.buf.extend_from_slice(&value.to_be_bytes());
    }

    fn put_i32(&mut self, value: i32) {
        self.buf.extend_from_slice(&value.to_be_bytes());
    }

    fn put_u64(&mut self, value: u64) {
        self.buf.extend_from_slice(&value.to_be_bytes());
    }

    fn put_str(&mut self, value: &str) -> SpyResult<()> {
        let len = u16::try_from(value.len()).map_err(|_| SpyError::StringTooLong {
            len: value.len(),
        })?;
        self.put_u16(len);
        self.buf.extend_from_slice(value.as_bytes());
        Ok(())
    }

    fn put_value(&mut self, kind: StreamKind, value: i32) -> SpyResult<()> {
        if !kind.can_hold(value) {
            return Err(SpyError::ValueOutOfRange { value, kind });
        }
        // range checked above
        match kind {
            StreamKind::Byte => self.put_u8(value as u8),
            StreamKind::Short => self.buf.extend_from_slice(&(value as i16).to_be_bytes()),
            StreamKind::Int => self.put_i32(value),
        }
        Ok(())
    }

    fn put_u8_count(&mut self, what: &'static str, count: usize) -> SpyResult<()> {
        let count = u8::try_from(count).map_err(|_| SpyError::TooManyItems { what, count })?;
        self.put_u8(count);
        Ok(())
    }

    fn put_u16_count(&mut self, what: &'static str, count: usize) -> SpyResult<()> {
        let count = u16::try_from(count).map_err(|_| SpyError::TooManyItems { what, count })?;
        self.put_u16(count);
        Ok(())
    }

    fn put_u32_count(&mut self, what: &'static str, count: usize) -> SpyResult<()> {
        let count = u32::try_from(count).map_err(|_| SpyError::TooManyItems { what, count })?;
        self.put_u32(count);
        Ok(())
    }
}
