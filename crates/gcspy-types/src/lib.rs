//! Shared GCspy type definitions
//!
//! This crate contains the identifiers, per-tile control flags and space/stream
//! descriptors shared by the collector-side driver, the command stream encoder
//! and any consumer decoding the stream.

use std::fmt;

use derive_more::Display;
use serde::Deserialize;
use serde::Serialize;

/// Identifier of a reported heap space.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Display, Serialize, Deserialize,
)]
#[display("space#{_0}")]
pub struct SpaceId(pub u8);

/// Identifier of a stream within a space.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Display, Serialize, Deserialize,
)]
#[display("stream#{_0}")]
pub struct StreamId(pub u8);

/// Identifier of a collector event (e.g. "start of GC", "end of GC").
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Display, Serialize, Deserialize,
)]
#[display("event#{_0}")]
pub struct EventId(pub u16);

impl EventId {
    pub fn index(self) -> usize {
        usize::from(self.0)
    }
}

/// Per-tile control bits sent in a control block.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct ControlFlags(u8);

impl ControlFlags {
    pub const USED: Self = Self(1);
    pub const BACKGROUND: Self = Self(2);
    pub const UNUSED: Self = Self(4);
    pub const SEPARATOR: Self = Self(8);
    pub const LINK: Self = Self(16);

    const ALL_BITS: u8 = 0x1f;

    pub const fn empty() -> Self {
        Self(0)
    }

    /// Builds flags from raw wire bits, dropping unknown bits.
    pub const fn from_bits_truncate(bits: u8) -> Self {
        Self(bits & Self::ALL_BITS)
    }

    pub const fn bits(self) -> u8 {
        self.0
    }

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn insert(&mut self, other: Self) {
        self.0 |= other.0;
    }

    pub fn remove(&mut self, other: Self) {
        self.0 &= !other.0;
    }

    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    /// A tile is drawn as used unless it carries `UNUSED` or `BACKGROUND`.
    pub const fn is_used(self) -> bool {
        self.contains(Self::USED) && !self.contains(Self::UNUSED)
    }
}

impl fmt::Debug for ControlFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names = [
            (Self::USED, "USED"),
            (Self::BACKGROUND, "BACKGROUND"),
            (Self::UNUSED, "UNUSED"),
            (Self::SEPARATOR, "SEPARATOR"),
            (Self::LINK, "LINK"),
        ];
        let set: Vec<&str> = names
            .iter()
            .filter(|(flag, _)| self.contains(*flag))
            .map(|(_, name)| *name)
            .collect();
        if set.is_empty() {
            write!(f, "ControlFlags(empty)")
        } else {
            write!(f, "ControlFlags({})", set.join(" | "))
        }
    }
}

impl std::ops::BitOr for ControlFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        self.union(rhs)
    }
}

/// Width of the values carried by a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, Serialize, Deserialize)]
pub enum StreamKind {
    #[display("byte")]
    Byte,
    #[display("short")]
    Short,
    #[display("int")]
    Int,
}

impl StreamKind {
    pub const fn code(self) -> u8 {
        match self {
            StreamKind::Byte => 0,
            StreamKind::Short => 1,
            StreamKind::Int => 2,
        }
    }

    pub const fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(StreamKind::Byte),
            1 => Some(StreamKind::Short),
            2 => Some(StreamKind::Int),
            _ => None,
        }
    }

    /// Bytes per value on the wire.
    pub const fn width(self) -> usize {
        match self {
            StreamKind::Byte => 1,
            StreamKind::Short => 2,
            StreamKind::Int => 4,
        }
    }

    pub const fn min_value(self) -> i32 {
        match self {
            StreamKind::Byte => 0,
            StreamKind::Short => i16::MIN as i32,
            StreamKind::Int => i32::MIN,
        }
    }

    pub const fn max_value(self) -> i32 {
        match self {
            StreamKind::Byte => u8::MAX as i32,
            StreamKind::Short => i16::MAX as i32,
            StreamKind::Int => i32::MAX,
        }
    }

    pub const fn can_hold(self, value: i32) -> bool {
        value >= self.min_value() && value <= self.max_value()
    }

    pub fn clamp(self, value: i64) -> i32 {
        // the bounds fit in i32, so the narrowing cannot truncate
        value.clamp(i64::from(self.min_value()), i64::from(self.max_value())) as i32
    }
}

/// How a consumer should present stream values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Presentation {
    #[default]
    Plain,
    Plus,
    MaxVar,
    Percent,
    Enum,
}

impl Presentation {
    pub const fn code(self) -> u8 {
        match self {
            Presentation::Plain => 0,
            Presentation::Plus => 1,
            Presentation::MaxVar => 2,
            Presentation::Percent => 3,
            Presentation::Enum => 4,
        }
    }

    pub const fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(Presentation::Plain),
            1 => Some(Presentation::Plus),
            2 => Some(Presentation::MaxVar),
            3 => Some(Presentation::Percent),
            4 => Some(Presentation::Enum),
            _ => None,
        }
    }
}

/// Whether zero values are painted distinctly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum PaintStyle {
    #[default]
    Plain,
    Zero,
}

impl PaintStyle {
    pub const fn code(self) -> u8 {
        match self {
            PaintStyle::Plain => 0,
            PaintStyle::Zero => 1,
        }
    }

    pub const fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(PaintStyle::Plain),
            1 => Some(PaintStyle::Zero),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Color {
    pub const RED: Self = Self::rgb(255, 0, 0);
    pub const GREEN: Self = Self::rgb(0, 200, 0);
    pub const BLUE: Self = Self::rgb(0, 0, 255);
    pub const YELLOW: Self = Self::rgb(255, 255, 0);
    pub const ORANGE: Self = Self::rgb(255, 165, 0);
    pub const GREY: Self = Self::rgb(128, 128, 128);

    pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }
}

impl Default for Color {
    fn default() -> Self {
        Self::RED
    }
}

/// Static description of a stream, sent to the consumer once per connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamDescriptor {
    pub id: StreamId,
    pub name: String,
    pub kind: StreamKind,
    pub min_value: i32,
    pub max_value: i32,
    pub zero_value: i32,
    pub default_value: i32,
    /// Text shown before a value
    pub prefix: String,
    /// Text shown after a value
    pub suffix: String,
    pub presentation: Presentation,
    pub paint_style: PaintStyle,
    /// Stream holding per-tile maxima, for `MaxVar` presentation
    pub max_stream: Option<StreamId>,
    pub color: Color,
    pub summary: bool,
}

impl StreamDescriptor {
    /// Creates a descriptor spanning the whole value range of `kind`.
    pub fn new(id: StreamId, name: impl Into<String>, kind: StreamKind) -> Self {
        Self {
            id,
            name: name.into(),
            kind,
            min_value: 0,
            max_value: kind.max_value(),
            zero_value: 0,
            default_value: 0,
            prefix: String::new(),
            suffix: String::new(),
            presentation: Presentation::Plain,
            paint_style: PaintStyle::Zero,
            max_stream: None,
            color: Color::default(),
            summary: true,
        }
    }

    pub fn with_range(mut self, min_value: i32, max_value: i32) -> Self {
        self.min_value = min_value;
        self.max_value = max_value;
        self
    }

    pub fn with_default(mut self, default_value: i32) -> Self {
        self.default_value = default_value;
        self
    }

    pub fn with_labels(mut self, prefix: impl Into<String>, suffix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self.suffix = suffix.into();
        self
    }

    pub fn with_presentation(mut self, presentation: Presentation) -> Self {
        self.presentation = presentation;
        self
    }

    pub fn with_paint_style(mut self, paint_style: PaintStyle) -> Self {
        self.paint_style = paint_style;
        self
    }

    pub fn with_color(mut self, color: Color) -> Self {
        self.color = color;
        self
    }

    pub fn with_summary(mut self, summary: bool) -> Self {
        self.summary = summary;
        self
    }
}

/// Static description of a space: its tiling and the streams it reports.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpaceDescriptor {
    pub id: SpaceId,
    pub name: String,
    pub driver_name: String,
    pub title: String,
    /// Human readable description of a tile, e.g. "Block Size: 64K"
    pub block_info: String,
    pub tile_count: u32,
    /// Label the consumer shows for unused tiles
    pub unused_label: String,
    pub main_space: bool,
    pub streams: Vec<StreamDescriptor>,
}

impl SpaceDescriptor {
    pub fn stream(&self, id: StreamId) -> Option<&StreamDescriptor> {
        self.streams.iter().find(|s| s.id == id)
    }
}

/// Everything a consumer learns when it attaches.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ServerInfo {
    pub name: String,
    pub version: String,
    pub general_info: String,
    pub events: Vec<String>,
    pub spaces: Vec<SpaceDescriptor>,
}

impl ServerInfo {
    pub fn event_name(&self, event: EventId) -> Option<&str> {
        self.events.get(event.index()).map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn control_flags_combine_and_query() {
        let mut flags = ControlFlags::USED | ControlFlags::SEPARATOR;
        assert!(flags.contains(ControlFlags::USED));
        assert!(flags.contains(ControlFlags::SEPARATOR));
        assert!(!flags.contains(ControlFlags::LINK));
        assert!(flags.is_used());

        flags.insert(ControlFlags::UNUSED);
        assert!(!flags.is_used());

        flags.remove(ControlFlags::USED);
        assert_eq!(flags.bits(), 4 | 8);
    }

    #[test]
    fn control_flags_drop_unknown_bits() {
        assert_eq!(ControlFlags::from_bits_truncate(0xff).bits(), 0x1f);
        assert_eq!(
            format!("{:?}", ControlFlags::from_bits_truncate(1 | 16)),
            "ControlFlags(USED | LINK)"
        );
        assert_eq!(
            format!("{:?}", ControlFlags::empty()),
            "ControlFlags(empty)"
        );
    }

    #[test]
    fn stream_kind_ranges() {
        assert!(StreamKind::Byte.can_hold(255));
        assert!(!StreamKind::Byte.can_hold(256));
        assert!(!StreamKind::Byte.can_hold(-1));
        assert!(StreamKind::Short.can_hold(-32768));
        assert!(!StreamKind::Short.can_hold(40_000));
        assert_eq!(StreamKind::Short.clamp(40_000), 32767);
        assert_eq!(StreamKind::Int.clamp(i64::MAX), i32::MAX);
        assert_eq!(StreamKind::Int.width(), 4);
    }

    #[test]
    fn wire_codes_are_stable() {
        for kind in [StreamKind::Byte, StreamKind::Short, StreamKind::Int] {
            assert_eq!(StreamKind::from_code(kind.code()), Some(kind));
        }
        assert_eq!(Presentation::from_code(3), Some(Presentation::Percent));
        assert_eq!(Presentation::from_code(9), None);
        assert_eq!(PaintStyle::from_code(1), Some(PaintStyle::Zero));
    }

    #[test]
    fn ids_display() {
        assert_eq!(SpaceId(3).to_string(), "space#3");
        assert_eq!(EventId(1).to_string(), "event#1");
        assert_eq!(StreamKind::Short.to_string(), "short");
    }
}
