//! Error types for the GCspy reporting boundary.

use gcspy_types::EventId;
use gcspy_types::SpaceId;
use gcspy_types::StreamKind;
use thiserror::Error;

pub type SpyResult<T> = Result<T, SpyError>;

#[derive(Error, Debug)]
pub enum SpyError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid configuration: {reason}")]
    Config { reason: String },

    #[error("failed to parse configuration file: {0}")]
    ConfigFile(#[from] serde_yaml::Error),

    #[error("failed to serialize snapshot: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0} is already registered")]
    DuplicateSpace(SpaceId),

    #[error("{0} is not a registered event")]
    UnknownEvent(EventId),

    #[error("server already started")]
    AlreadyStarted,

    #[error("server has not been started")]
    NotStarted,

    #[error("cannot begin {requested} while {open} is still open")]
    SpaceAlreadyOpen { open: SpaceId, requested: SpaceId },

    #[error("safepoint for {event} while {open} is still open")]
    SafepointInsideSpace { event: EventId, open: SpaceId },

    #[error("no space is open for {0}")]
    NoOpenSpace(SpaceId),

    #[error("command for {got} while {open} is open")]
    SpaceMismatch { open: SpaceId, got: SpaceId },

    #[error("control block for {space} still expects {remaining} entries")]
    IncompleteControl { space: SpaceId, remaining: u32 },

    #[error("control value written with no open control block")]
    NoOpenControl,

    #[error("string of {len} bytes exceeds the wire limit")]
    StringTooLong { len: usize },

    #[error("value {value} does not fit a {kind} stream")]
    ValueOutOfRange { value: i32, kind: StreamKind },

    #[error("{count} items exceed the wire limit for {what}")]
    TooManyItems { what: &'static str, count: usize },

    #[error("address {addr:#x} is outside {space}")]
    AddressOutOfRange { space: SpaceId, addr: usize },

    #[error("invalid address range {start:#x}..{end:#x} with block size {block_size}")]
    InvalidRange {
        start: usize,
        end: usize,
        block_size: usize,
    },

    #[error("tile {index} is outside a space of {tiles} tiles")]
    TileOutOfRange { index: usize, tiles: usize },

    #[error("malformed command stream: {reason}")]
    Malformed { reason: String },

    #[error("frame of {len} bytes exceeds limit of {limit}")]
    FrameTooLarge { len: usize, limit: usize },
}

impl SpyError {
    pub fn config(reason: impl Into<String>) -> Self {
        Self::Config {
            reason: reason.into(),
        }
    }

    pub fn malformed(reason: impl Into<String>) -> Self {
        Self::Malformed {
            reason: reason.into(),
        }
    }

    /// Errors caused by the transport rather than by misuse of the protocol.
    pub fn is_transport(&self) -> bool {
        matches!(self, SpyError::Io(_))
    }
}
