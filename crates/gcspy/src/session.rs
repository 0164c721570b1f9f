//! Consumer-side state rebuilt from a command stream.
//!
//! A [`Session`] applies decoded commands in order and keeps the latest
//! complete report of every space, so a consumer can render it or dump it as
//! JSON.

use std::collections::BTreeMap;
use std::io::Read;

use gcspy_types::ControlFlags;
use gcspy_types::EventId;
use gcspy_types::ServerInfo;
use gcspy_types::SpaceId;
use gcspy_types::StreamId;
use serde::Serialize;

use crate::error::SpyError;
use crate::error::SpyResult;
use crate::protocol::read_frame;
use crate::protocol::Command;

/// The last complete report of one space.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SpaceSnapshot {
    pub space: SpaceId,
    pub event: EventId,
    pub tile_count: u32,
    pub tile_names: Vec<String>,
    pub streams: BTreeMap<StreamId, Vec<i32>>,
    pub control: Vec<ControlFlags>,
    pub summaries: BTreeMap<StreamId, Vec<i32>>,
    pub info: String,
}

impl SpaceSnapshot {
    fn new(space: SpaceId, event: EventId, tile_count: u32) -> Self {
        Self {
            space,
            event,
            tile_count,
            tile_names: Vec::new(),
            streams: BTreeMap::new(),
            control: Vec::new(),
            summaries: BTreeMap::new(),
            info: String::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SafepointRecord {
    pub event: EventId,
    pub count: u32,
    pub compensation_us: u64,
}

#[derive(Debug, Default, Serialize)]
pub struct Session {
    info: Option<ServerInfo>,
    spaces: BTreeMap<SpaceId, SpaceSnapshot>,
    #[serde(skip)]
    open: Option<SpaceSnapshot>,
    safepoints: Vec<SafepointRecord>,
    shut_down: bool,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn info(&self) -> Option<&ServerInfo> {
        self.info.as_ref()
    }

    pub fn space(&self, space: SpaceId) -> Option<&SpaceSnapshot> {
        self.spaces.get(&space)
    }

    pub fn safepoints(&self) -> &[SafepointRecord] {
        &self.safepoints
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down
    }

    pub fn apply_all(&mut self, commands: impl IntoIterator<Item = Command>) -> SpyResult<()> {
        commands.into_iter().try_for_each(|c| self.apply(c))
    }

    /// Apply frames from `reader` until `Shutdown` or end of stream.
    pub fn follow<R: Read>(&mut self, reader: &mut R, max_frame_len: usize) -> SpyResult<()> {
        while !self.shut_down {
            match read_frame(reader, max_frame_len)? {
                Some(commands) => self.apply_all(commands)?,
                None => break,
            }
        }
        Ok(())
    }

    pub fn apply(&mut self, command: Command) -> SpyResult<()> {
        match command {
            Command::Hello(info) => {
                tracing::debug!("consumer attached to {} {}", info.name, info.version);
                self.info = Some(info);
            }
            Command::SpaceDef(space) => {
                let info = self.info.get_or_insert_with(ServerInfo::default);
                match info.spaces.iter_mut().find(|s| s.id == space.id) {
                    Some(existing) => *existing = space,
                    None => info.spaces.push(space),
                }
            }
            Command::SpaceBegin {
                space,
                event,
                tile_count,
            } => {
                if let Some(open) = &self.open {
                    return Err(SpyError::SpaceAlreadyOpen {
                        open: open.space,
                        requested: space,
                    });
                }
                let mut snapshot = SpaceSnapshot::new(space, event, tile_count);
                // names are only re-sent when the tiling changes
                if let Some(previous) = self.spaces.get(&space) {
                    if previous.tile_count == tile_count {
                        snapshot.tile_names = previous.tile_names.clone();
                    }
                }
                self.open = Some(snapshot);
            }
            Command::TileNames { space, names } => self.open_space(space)?.tile_names = names,
            Command::StreamData {
                space,
                stream,
                values,
                ..
            } => {
                self.open_space(space)?.streams.insert(stream, values);
            }
            Command::Control { space, flags } => self.open_space(space)?.control = flags,
            Command::Summary {
                space,
                stream,
                values,
            } => {
                self.open_space(space)?.summaries.insert(stream, values);
            }
            Command::SpaceInfo { space, info } => self.open_space(space)?.info = info,
            Command::SpaceEnd { space } => {
                self.open_space(space)?;
                if let Some(snapshot) = self.open.take() {
                    self.spaces.insert(space, snapshot);
                }
            }
            Command::Safepoint {
                event,
                count,
                compensation,
            } => self.safepoints.push(SafepointRecord {
                event,
                count,
                compensation_us: u64::try_from(compensation.as_micros()).unwrap_or(u64::MAX),
            }),
            Command::Shutdown => self.shut_down = true,
            other => {
                return Err(SpyError::malformed(format!(
                    "client command {other:?} in a server stream"
                )))
            }
        }
        Ok(())
    }

    pub fn to_json(&self) -> SpyResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    fn open_space(&mut self, space: SpaceId) -> SpyResult<&mut SpaceSnapshot> {
        match self.open.as_mut() {
            Some(open) if open.space == space => Ok(open),
            Some(open) => Err(SpyError::SpaceMismatch {
                open: open.space,
                got: space,
            }),
            None => Err(SpyError::NoOpenSpace(space)),
        }
    }
}

#[cfg(test)]
mod tests {
    use similar_asserts::assert_eq;
    use test_log::test;

    use super::*;
    use crate::interpreter::Interpreter;
    use crate::interpreter::StreamInterpreter;
    use crate::protocol::FrameDecoder;

    fn replay(bytes: &[u8]) -> Session {
        let mut decoder = FrameDecoder::new(1 << 20);
        decoder.feed(bytes);
        let mut session = Session::new();
        while let Some(frame) = decoder.next_frame().expect("decode") {
            session.apply_all(frame).expect("apply");
        }
        session
    }

    fn report(interp: &mut StreamInterpreter<Vec<u8>>, names: bool, used: i32) {
        let space = SpaceId(0);
        interp.begin_space(EventId(0), space, 2).expect("begin");
        if names {
            interp
                .write_tile_names(space, &["a".to_string(), "b".to_string()])
                .expect("names");
        }
        interp
            .write_stream(space, StreamId(0), gcspy_types::StreamKind::Int, &[used, 0])
            .expect("stream");
        interp.write_control(space, 2).expect("control");
        interp.put_control(ControlFlags::USED).expect("c0");
        interp.put_control(ControlFlags::UNUSED).expect("c1");
        interp.end_space(space).expect("end");
    }

    #[test]
    fn keeps_the_latest_report_and_tile_names() {
        let mut interp = StreamInterpreter::new(Vec::new());
        report(&mut interp, true, 10);
        report(&mut interp, false, 20);
        interp.safepoint(EventId(0)).expect("safepoint");
        interp.send_shutdown().expect("shutdown");

        let session = replay(interp.get_ref());
        let space = session.space(SpaceId(0)).expect("space");
        assert_eq!(space.tile_names, vec!["a".to_string(), "b".to_string()]);
        assert_eq!(space.streams.get(&StreamId(0)), Some(&vec![20, 0]));
        assert_eq!(space.control, vec![ControlFlags::USED, ControlFlags::UNUSED]);
        assert_eq!(session.safepoints().len(), 1);
        assert!(session.is_shut_down());
    }

    #[test]
    fn follow_stops_at_shutdown() {
        let mut interp = StreamInterpreter::new(Vec::new());
        report(&mut interp, true, 1);
        interp.send_shutdown().expect("shutdown");
        report(&mut interp, true, 2);

        let bytes = interp.into_inner();
        let mut session = Session::new();
        session.follow(&mut bytes.as_slice(), 1 << 20).expect("follow");
        let space = session.space(SpaceId(0)).expect("space");
        assert_eq!(space.streams.get(&StreamId(0)), Some(&vec![1, 0]));
    }

    #[test]
    fn rejects_data_outside_a_space() {
        let mut session = Session::new();
        assert!(matches!(
            session.apply(Command::SpaceInfo {
                space: SpaceId(1),
                info: String::new()
            }),
            Err(SpyError::NoOpenSpace(SpaceId(1)))
        ));
        assert!(matches!(session.apply(Command::Play), Err(SpyError::Malformed { .. })));
    }

    #[test]
    fn snapshot_serializes_to_json() {
        let mut interp = StreamInterpreter::new(Vec::new());
        report(&mut interp, true, 5);
        let session = replay(interp.get_ref());
        let json: serde_json::Value =
            serde_json::from_str(&session.to_json().expect("json")).expect("parse");
        assert_eq!(json["spaces"]["0"]["tile_count"], serde_json::json!(2));
        assert_eq!(json["spaces"]["0"]["streams"]["0"], serde_json::json!([5, 0]));
        assert_eq!(json["shut_down"], serde_json::json!(false));
    }
}
