//! The reporting capability a driver writes to.
//!
//! [`NullInterpreter`] is the stub used when no consumer is attached; every
//! call compiles to nothing. [`StreamInterpreter`] encodes each call onto a
//! byte sink, and [`SpyServer`](crate::server::SpyServer) serves the same
//! stream to a TCP client.

pub mod null;
pub mod stream;

use gcspy_types::ControlFlags;
use gcspy_types::EventId;
use gcspy_types::SpaceDescriptor;
use gcspy_types::SpaceId;
use gcspy_types::StreamId;
use gcspy_types::StreamKind;
pub use null::NullInterpreter;
pub use stream::StreamInterpreter;

use crate::config::SpyConfig;
use crate::error::SpyResult;
use crate::server::SpyServer;

/// Receiver of collector telemetry.
///
/// A space is reported as `begin_space`, any number of stream, control,
/// summary and info writes for that space, then `end_space`. A control block
/// opened by `write_control(space, len)` is filled by exactly `len` calls to
/// `put_control`.
///
/// Nothing an implementation does may feed back into the collector: drivers
/// only read collector state, and implementations only write telemetry.
pub trait Interpreter {
    /// Whether anyone wants reports for `event`; drivers skip all work when not.
    fn is_connected(&self, event: EventId) -> bool;

    fn begin_space(&mut self, event: EventId, space: SpaceId, tile_count: u32) -> SpyResult<()>;

    /// Whether the consumer has yet to receive tile names for `space`.
    fn needs_tile_names(&self, space: SpaceId) -> bool;

    fn write_tile_names(&mut self, space: SpaceId, names: &[String]) -> SpyResult<()>;

    fn write_stream(
        &mut self,
        space: SpaceId,
        stream: StreamId,
        kind: StreamKind,
        values: &[i32],
    ) -> SpyResult<()>;

    /// Open a control block of `len` tiles for `space`.
    fn write_control(&mut self, space: SpaceId, len: u32) -> SpyResult<()>;

    fn put_control(&mut self, flags: ControlFlags) -> SpyResult<()>;

    fn write_summary(&mut self, space: SpaceId, stream: StreamId, values: &[i32]) -> SpyResult<()>;

    fn write_space_info(&mut self, space: SpaceId, info: &str) -> SpyResult<()>;

    fn end_space(&mut self, space: SpaceId) -> SpyResult<()>;

    /// Called once all spaces have been reported for an occurrence of `event`.
    fn safepoint(&mut self, event: EventId) -> SpyResult<()>;

    /// Start timing work done on behalf of instrumentation.
    fn start_compensation_timer(&mut self);

    fn stop_compensation_timer(&mut self);
}

impl<I: Interpreter + ?Sized> Interpreter for &mut I {
    fn is_connected(&self, event: EventId) -> bool {
        (**self).is_connected(event)
    }

    fn begin_space(&mut self, event: EventId, space: SpaceId, tile_count: u32) -> SpyResult<()> {
        (**self).begin_space(event, space, tile_count)
    }

    fn needs_tile_names(&self, space: SpaceId) -> bool {
        (**self).needs_tile_names(space)
    }

    fn write_tile_names(&mut self, space: SpaceId, names: &[String]) -> SpyResult<()> {
        (**self).write_tile_names(space, names)
    }

    fn write_stream(
        &mut self,
        space: SpaceId,
        stream: StreamId,
        kind: StreamKind,
        values: &[i32],
    ) -> SpyResult<()> {
        (**self).write_stream(space, stream, kind, values)
    }

    fn write_control(&mut self, space: SpaceId, len: u32) -> SpyResult<()> {
        (**self).write_control(space, len)
    }

    fn put_control(&mut self, flags: ControlFlags) -> SpyResult<()> {
        (**self).put_control(flags)
    }

    fn write_summary(&mut self, space: SpaceId, stream: StreamId, values: &[i32]) -> SpyResult<()> {
        (**self).write_summary(space, stream, values)
    }

    fn write_space_info(&mut self, space: SpaceId, info: &str) -> SpyResult<()> {
        (**self).write_space_info(space, info)
    }

    fn end_space(&mut self, space: SpaceId) -> SpyResult<()> {
        (**self).end_space(space)
    }

    fn safepoint(&mut self, event: EventId) -> SpyResult<()> {
        (**self).safepoint(event)
    }

    fn start_compensation_timer(&mut self) {
        (**self).start_compensation_timer();
    }

    fn stop_compensation_timer(&mut self) {
        (**self).stop_compensation_timer();
    }
}

impl<I: Interpreter + ?Sized> Interpreter for Box<I> {
    fn is_connected(&self, event: EventId) -> bool {
        (**self).is_connected(event)
    }

    fn begin_space(&mut self, event: EventId, space: SpaceId, tile_count: u32) -> SpyResult<()> {
        (**self).begin_space(event, space, tile_count)
    }

    fn needs_tile_names(&self, space: SpaceId) -> bool {
        (**self).needs_tile_names(space)
    }

    fn write_tile_names(&mut self, space: SpaceId, names: &[String]) -> SpyResult<()> {
        (**self).write_tile_names(space, names)
    }

    fn write_stream(
        &mut self,
        space: SpaceId,
        stream: StreamId,
        kind: StreamKind,
        values: &[i32],
    ) -> SpyResult<()> {
        (**self).write_stream(space, stream, kind, values)
    }

    fn write_control(&mut self, space: SpaceId, len: u32) -> SpyResult<()> {
        (**self).write_control(space, len)
    }

    fn put_control(&mut self, flags: ControlFlags) -> SpyResult<()> {
        (**self).put_control(flags)
    }

    fn write_summary(&mut self, space: SpaceId, stream: StreamId, values: &[i32]) -> SpyResult<()> {
        (**self).write_summary(space, stream, values)
    }

    fn write_space_info(&mut self, space: SpaceId, info: &str) -> SpyResult<()> {
        (**self).write_space_info(space, info)
    }

    fn end_space(&mut self, space: SpaceId) -> SpyResult<()> {
        (**self).end_space(space)
    }

    fn safepoint(&mut self, event: EventId) -> SpyResult<()> {
        (**self).safepoint(event)
    }

    fn start_compensation_timer(&mut self) {
        (**self).start_compensation_timer();
    }

    fn stop_compensation_timer(&mut self) {
        (**self).stop_compensation_timer();
    }
}

/// Build the interpreter `config` asks for.
///
/// A disabled config yields the no-op stub; an enabled one starts a
/// [`SpyServer`] with `events` and `spaces` registered.
pub fn create_interpreter(
    config: &SpyConfig,
    events: &[&str],
    spaces: Vec<SpaceDescriptor>,
) -> SpyResult<Box<dyn Interpreter + Send>> {
    if !config.enabled {
        tracing::debug!("gcspy disabled, reports are discarded");
        return Ok(Box::new(NullInterpreter));
    }
    let mut server = SpyServer::new(config.clone(), events)?;
    for space in spaces {
        server.add_space(space)?;
    }
    let addr = server.start()?;
    tracing::info!("gcspy server {} listening on {addr}", config.server_name);
    Ok(Box::new(server))
}
