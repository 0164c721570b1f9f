//! Command stream decoder.

use std::io::ErrorKind;
use std::io::Read;
use std::time::Duration;

use gcspy_types::Color;
use gcspy_types::ControlFlags;
use gcspy_types::EventId;
use gcspy_types::PaintStyle;
use gcspy_types::Presentation;
use gcspy_types::ServerInfo;
use gcspy_types::SpaceDescriptor;
use gcspy_types::SpaceId;
use gcspy_types::StreamDescriptor;
use gcspy_types::StreamId;
use gcspy_types::StreamKind;

use super::opcode;
use super::Command;
use super::FRAME_HEADER_LEN;
use super::NO_STREAM;
use super::PROTOCOL_VERSION;
use crate::error::SpyError;
use crate::error::SpyResult;

/// Splits a byte stream into frames and decodes them.
///
/// Bytes may arrive in arbitrary chunks; partial frames stay buffered until
/// the rest shows up.
#[derive(Debug)]
pub struct FrameDecoder {
    buf: Vec<u8>,
    max_frame_len: usize,
}

impl FrameDecoder {
    pub fn new(max_frame_len: usize) -> Self {
        Self {
            buf: Vec::new(),
            max_frame_len,
        }
    }

    pub fn feed(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Number of bytes waiting for the rest of their frame.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    pub fn next_frame(&mut self) -> SpyResult<Option<Vec<Command>>> {
        if self.buf.len() < FRAME_HEADER_LEN {
            return Ok(None);
        }
        let len = frame_len(&self.buf[..FRAME_HEADER_LEN]);
        if len > self.max_frame_len {
            return Err(SpyError::FrameTooLarge {
                len,
                limit: self.max_frame_len,
            });
        }
        if self.buf.len() < FRAME_HEADER_LEN + len {
            return Ok(None);
        }
        let frame: Vec<u8> = self.buf.drain(..FRAME_HEADER_LEN + len).collect();
        decode_frame(&frame[FRAME_HEADER_LEN..]).map(Some)
    }
}

/// Read one frame from a blocking reader.
///
/// Returns `Ok(None)` when the reader is closed exactly at a frame boundary.
pub fn read_frame<R: Read>(reader: &mut R, max_frame_len: usize) -> SpyResult<Option<Vec<Command>>> {
    let mut header = [0u8; FRAME_HEADER_LEN];
    match reader.read_exact(&mut header) {
        Ok(()) => {}
        Err(e) if e.kind() == ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }
    let len = frame_len(&header);
    if len > max_frame_len {
        return Err(SpyError::FrameTooLarge {
            len,
            limit: max_frame_len,
        });
    }
    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload)?;
    decode_frame(&payload).map(Some)
}

/// Decode every command in a frame payload (length prefix excluded).
pub fn decode_frame(payload: &[u8]) -> SpyResult<Vec<Command>> {
    let mut cursor = Cursor::new(payload);
    let mut commands = Vec::new();
    while !cursor.is_empty() {
        commands.push(cursor.command()?);
    }
    Ok(commands)
}

fn frame_len(header: &[u8]) -> usize {
    let mut bytes = [0u8; FRAME_HEADER_LEN];
    bytes.copy_from_slice(header);
    u32::from_be_bytes(bytes) as usize
}

struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn is_empty(&self) -> bool {
        self.pos >= self.data.len()
    }

    fn take(&mut self, n: usize, what: &str) -> SpyResult<&'a [u8]> {
        let end = self.pos.checked_add(n).filter(|&end| end <= self.data.len());
        let Some(end) = end else {
            return Err(SpyError::malformed(format!(
                "truncated {what} at offset {}",
                self.pos
            )));
        };
        let data = self.data;
        let bytes = &data[self.pos..end];
        self.pos = end;
        Ok(bytes)
    }

    fn array<const N: usize>(&mut self, what: &str) -> SpyResult<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N, what)?);
        Ok(out)
    }

    fn u8(&mut self, what: &str) -> SpyResult<u8> {
        Ok(self.array::<1>(what)?[0])
    }

    fn u16(&mut self, what: &str) -> SpyResult<u16> {
        self.array(what).map(u16::from_be_bytes)
    }

    fn u32(&mut self, what: &str) -> SpyResult<u32> {
        self.array(what).map(u32::from_be_bytes)
    }

    fn i32(&mut self, what: &str) -> SpyResult<i32> {
        self.array(what).map(i32::from_be_bytes)
    }

    fn u64(&mut self, what: &str) -> SpyResult<u64> {
        self.array(what).map(u64::from_be_bytes)
    }

    fn bool(&mut self, what: &str) -> SpyResult<bool> {
        match self.u8(what)? {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(SpyError::malformed(format!("{what}: {other} is not a bool"))),
        }
    }

    fn string(&mut self, what: &str) -> SpyResult<String> {
        let len = usize::from(self.u16(what)?);
        let bytes = self.take(len, what)?;
        String::from_utf8(bytes.to_vec())
            .map_err(|e| SpyError::malformed(format!("{what} is not UTF-8: {e}")))
    }

    /// Element count, checked against the bytes left so a bogus count cannot
    /// trigger a huge allocation.
    fn count(&mut self, what: &str, min_elem_len: usize) -> SpyResult<usize> {
        let count = self.u32(what)? as usize;
        let left = self.data.len() - self.pos;
        if count.saturating_mul(min_elem_len) > left {
            return Err(SpyError::malformed(format!(
                "{what}: {count} entries do not fit in {left} bytes"
            )));
        }
        Ok(count)
    }

    fn kind(&mut self) -> SpyResult<StreamKind> {
        let code = self.u8("stream kind")?;
        StreamKind::from_code(code)
            .ok_or_else(|| SpyError::malformed(format!("unknown stream kind {code}")))
    }

    fn value(&mut self, kind: StreamKind) -> SpyResult<i32> {
        Ok(match kind {
            StreamKind::Byte => i32::from(self.u8("byte value")?),
            StreamKind::Short => i32::from(i16::from_be_bytes(self.array("short value")?)),
            StreamKind::Int => self.i32("int value")?,
        })
    }

    fn command(&mut self) -> SpyResult<Command> {
        let op = self.u8("opcode")?;
        let command = match op {
            opcode::HELLO => Command::Hello(self.hello()?),
            opcode::SPACE_DEF => Command::SpaceDef(self.space_def()?),
            opcode::SPACE_BEGIN => Command::SpaceBegin {
                space: SpaceId(self.u8("space id")?),
                event: EventId(self.u16("event id")?),
                tile_count: self.u32("tile count")?,
            },
            opcode::TILE_NAMES => {
                let space = SpaceId(self.u8("space id")?);
                let count = self.count("tile names", 2)?;
                let names = (0..count)
                    .map(|_| self.string("tile name"))
                    .collect::<SpyResult<_>>()?;
                Command::TileNames { space, names }
            }
            opcode::STREAM_DATA => {
                let space = SpaceId(self.u8("space id")?);
                let stream = StreamId(self.u8("stream id")?);
                let kind = self.kind()?;
                let count = self.count("stream values", kind.width())?;
                let values = (0..count)
                    .map(|_| self.value(kind))
                    .collect::<SpyResult<_>>()?;
                Command::StreamData {
                    space,
                    stream,
                    kind,
                    values,
                }
            }
            opcode::CONTROL => {
                let space = SpaceId(self.u8("space id")?);
                let len = self.count("control block", 1)?;
                let flags = self
                    .take(len, "control block")?
                    .iter()
                    .map(|&bits| ControlFlags::from_bits_truncate(bits))
                    .collect();
                Command::Control { space, flags }
            }
            opcode::SUMMARY => {
                let space = SpaceId(self.u8("space id")?);
                let stream = StreamId(self.u8("stream id")?);
                let count = self.count("summary values", 4)?;
                let values = (0..count)
                    .map(|_| self.i32("summary value"))
                    .collect::<SpyResult<_>>()?;
                Command::Summary {
                    space,
                    stream,
                    values,
                }
            }
            opcode::SPACE_INFO => Command::SpaceInfo {
                space: SpaceId(self.u8("space id")?),
                info: self.string("space info")?,
            },
            opcode::SPACE_END => Command::SpaceEnd {
                space: SpaceId(self.u8("space id")?),
            },
            opcode::SAFEPOINT => Command::Safepoint {
                event: EventId(self.u16("event id")?),
                count: self.u32("event count")?,
                compensation: Duration::from_micros(self.u64("compensation")?),
            },
            opcode::SHUTDOWN => Command::Shutdown,
            opcode::PLAY => Command::Play,
            opcode::PAUSE => Command::Pause,
            opcode::STEP => Command::Step,
            opcode::ENABLE_EVENT => Command::EnableEvent {
                event: EventId(self.u16("event id")?),
                enabled: self.bool("enabled flag")?,
            },
            opcode::DISCONNECT => Command::Disconnect,
            other => {
                return Err(SpyError::malformed(format!(
                    "unknown opcode {other:#04x} at offset {}",
                    self.pos - 1
                )))
            }
        };
        Ok(command)
    }

    fn hello(&mut self) -> SpyResult<ServerInfo> {
        let version = self.u8("protocol version")?;
        if version != PROTOCOL_VERSION {
            return Err(SpyError::malformed(format!(
                "protocol version {version}, expected {PROTOCOL_VERSION}"
            )));
        }
        let name = self.string("server name")?;
        let server_version = self.string("server version")?;
        let general_info = self.string("general info")?;
        let event_count = self.u16("event count")?;
        let events = (0..event_count)
            .map(|_| self.string("event name"))
            .collect::<SpyResult<_>>()?;
        let space_count = self.u8("space count")?;
        let spaces = (0..space_count)
            .map(|_| self.space_def())
            .collect::<SpyResult<_>>()?;
        Ok(ServerInfo {
            name,
            version: server_version,
            general_info,
            events,
            spaces,
        })
    }

    fn space_def(&mut self) -> SpyResult<SpaceDescriptor> {
        let id = SpaceId(self.u8("space id")?);
        let name = self.string("space name")?;
        let driver_name = self.string("driver name")?;
        let title = self.string("title")?;
        let block_info = self.string("block info")?;
        let tile_count = self.u32("tile count")?;
        let unused_label = self.string("unused label")?;
        let main_space = self.u8("space flags")? & 1 == 1;
        let stream_count = self.u8("stream count")?;
        let streams = (0..stream_count)
            .map(|_| self.stream_def())
            .collect::<SpyResult<_>>()?;
        Ok(SpaceDescriptor {
            id,
            name,
            driver_name,
            title,
            block_info,
            tile_count,
            unused_label,
            main_space,
            streams,
        })
    }

    fn stream_def(&mut self) -> SpyResult<StreamDescriptor> {
        let id = StreamId(self.u8("stream id")?);
        let name = self.string("stream name")?;
        let kind = self.kind()?;
        let min_value = self.i32("min value")?;
        let max_value = self.i32("max value")?;
        let zero_value = self.i32("zero value")?;
        let default_value = self.i32("default value")?;
        let prefix = self.string("prefix")?;
        let suffix = self.string("suffix")?;
        let presentation = self.u8("presentation")?;
        let presentation = Presentation::from_code(presentation)
            .ok_or_else(|| SpyError::malformed(format!("unknown presentation {presentation}")))?;
        let paint_style = self.u8("paint style")?;
        let paint_style = PaintStyle::from_code(paint_style)
            .ok_or_else(|| SpyError::malformed(format!("unknown paint style {paint_style}")))?;
        let max_stream = match self.u8("max stream")? {
            NO_STREAM => None,
            id => Some(StreamId(id)),
        };
        let [r, g, b] = self.array::<3>("color")?;
        let summary = self.bool("summary flag")?;
        Ok(StreamDescriptor {
            id,
            name,
            kind,
            min_value,
            max_value,
            zero_value,
            default_value,
            prefix,
            suffix,
            presentation,
            paint_style,
            max_stream,
            color: Color::rgb(r, g, b),
            summary,
        })
    }
}
