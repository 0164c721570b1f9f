//! Command stream wire format.
//!
//! Every message is a frame: a big-endian `u32` payload length followed by one
//! or more commands, each introduced by a one byte opcode. Opcodes below
//! `0x80` flow from the instrumented process to the consumer, opcodes from
//! `0x80` up flow back.

use std::time::Duration;

use gcspy_types::ControlFlags;
use gcspy_types::EventId;
use gcspy_types::ServerInfo;
use gcspy_types::SpaceDescriptor;
use gcspy_types::SpaceId;
use gcspy_types::StreamId;
use gcspy_types::StreamKind;
use serde::Serialize;

pub mod decoder;
pub mod encoder;

pub use decoder::decode_frame;
pub use decoder::read_frame;
pub use decoder::FrameDecoder;
pub use encoder::CommandStream;

pub const PROTOCOL_VERSION: u8 = 1;
pub const FRAME_HEADER_LEN: usize = 4;
/// Encodes "no stream" in the max-stream slot of a stream definition.
pub const NO_STREAM: u8 = 0xff;

pub mod opcode {
    pub const HELLO: u8 = 0x01;
    pub const SPACE_DEF: u8 = 0x02;
    pub const SPACE_BEGIN: u8 = 0x03;
    pub const TILE_NAMES: u8 = 0x04;
    pub const STREAM_DATA: u8 = 0x05;
    pub const CONTROL: u8 = 0x06;
    pub const SUMMARY: u8 = 0x07;
    pub const SPACE_INFO: u8 = 0x08;
    pub const SPACE_END: u8 = 0x09;
    pub const SAFEPOINT: u8 = 0x0a;
    pub const SHUTDOWN: u8 = 0x0b;

    pub const PLAY: u8 = 0x81;
    pub const PAUSE: u8 = 0x82;
    pub const STEP: u8 = 0x83;
    pub const ENABLE_EVENT: u8 = 0x84;
    pub const DISCONNECT: u8 = 0x85;
}

/// A decoded command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum Command {
    Hello(ServerInfo),
    SpaceDef(SpaceDescriptor),
    SpaceBegin {
        space: SpaceId,
        event: EventId,
        tile_count: u32,
    },
    TileNames {
        space: SpaceId,
        names: Vec<String>,
    },
    StreamData {
        space: SpaceId,
        stream: StreamId,
        kind: StreamKind,
        values: Vec<i32>,
    },
    Control {
        space: SpaceId,
        flags: Vec<ControlFlags>,
    },
    Summary {
        space: SpaceId,
        stream: StreamId,
        values: Vec<i32>,
    },
    SpaceInfo {
        space: SpaceId,
        info: String,
    },
    SpaceEnd {
        space: SpaceId,
    },
    Safepoint {
        event: EventId,
        count: u32,
        compensation: Duration,
    },
    Shutdown,
    Play,
    Pause,
    Step,
    EnableEvent {
        event: EventId,
        enabled: bool,
    },
    Disconnect,
}

impl Command {
    /// Commands a consumer sends back to the instrumented process.
    pub fn is_client_command(&self) -> bool {
        matches!(
            self,
            Command::Play
                | Command::Pause
                | Command::Step
                | Command::EnableEvent { .. }
                | Command::Disconnect
        )
    }
}
