use gcspy_types::ControlFlags;
use gcspy_types::EventId;
use gcspy_types::SpaceId;
use gcspy_types::StreamId;
use gcspy_types::StreamKind;

use super::Interpreter;
use crate::error::SpyResult;

/// Interpreter for builds without a consumer: every report is discarded.
///
/// Nothing is validated and nothing can fail, so calls may pass any
/// arguments. Never connected, so drivers skip their reporting work entirely.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NullInterpreter;

impl Interpreter for NullInterpreter {
    #[inline(always)]
    fn is_connected(&self, _event: EventId) -> bool {
        false
    }

    #[inline(always)]
    fn begin_space(&mut self, _event: EventId, _space: SpaceId, _tile_count: u32) -> SpyResult<()> {
        Ok(())
    }

    #[inline(always)]
    fn needs_tile_names(&self, _space: SpaceId) -> bool {
        false
    }

    #[inline(always)]
    fn write_tile_names(&mut self, _space: SpaceId, _names: &[String]) -> SpyResult<()> {
        Ok(())
    }

    #[inline(always)]
    fn write_stream(
        &mut self,
        _space: SpaceId,
        _stream: StreamId,
        _kind: StreamKind,
        _values: &[i32],
    ) -> SpyResult<()> {
        Ok(())
    }

    #[inline(always)]
    fn write_control(&mut self, _space: SpaceId, _len: u32) -> SpyResult<()> {
        Ok(())
    }

    #[inline(always)]
    fn put_control(&mut self, _flags: ControlFlags) -> SpyResult<()> {
        Ok(())
    }

    #[inline(always)]
    fn write_summary(
        &mut self,
        _space: SpaceId,
        _stream: StreamId,
        _values: &[i32],
    ) -> SpyResult<()> {
        Ok(())
    }

    #[inline(always)]
    fn write_space_info(&mut self, _space: SpaceId, _info: &str) -> SpyResult<()> {
        Ok(())
    }

    #[inline(always)]
    fn end_space(&mut self, _space: SpaceId) -> SpyResult<()> {
        Ok(())
    }

    #[inline(always)]
    fn safepoint(&mut self, _event: EventId) -> SpyResult<()> {
        Ok(())
    }

    #[inline(always)]
    fn start_compensation_timer(&mut self) {}

    #[inline(always)]
    fn stop_compensation_timer(&mut self) {}
}
