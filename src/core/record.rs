//! # Wire Records
//!
//! The closed set of typed records exchanged between server and clients, and
//! their big-endian binary layout.
//!
//! ## Envelope
//! Every record starts with the same ten bytes so a reader can dispatch on the
//! type before it knows the full length:
//! ```text
//! [Type(2)] [Id(8)] [Type-specific fields...]
//! ```
//!
//! ## Record kinds
//! - **Headers** (Platform, Beam, Gate): one per object, sent once over TCP,
//!   each embedding an initial data snapshot
//! - **Data** (Platform, Beam, Gate): repeatable position/pointing updates over UDP
//! - **Annotations**: Event (TCP), Generic (UDP), Category (TCP), Scope (UDP)
//! - **Session headers**: Time and Scenario, handed out during negotiation
//!
//! Encoding is pure and allocation-local: [`encode`] and [`decode`] share no state.

use bytes::{BufMut, Bytes, BytesMut};

use crate::core::wire::{
    put_bool, put_name, put_text, text_len, WireReader, NAME_LEN, RANGE_NAME_LEN,
};
use crate::error::{ProtocolError, Result};

/// Size of the `{type: u16, id: u64}` envelope.
pub const ENVELOPE_LEN: usize = 10;

/// Record type tags carried in the envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum RecordType {
    PlatformHeader = 1,
    BeamHeader = 2,
    GateHeader = 3,
    PlatformData = 4,
    BeamData = 5,
    GateData = 6,
    Event = 7,
    GenericData = 8,
    CategoryData = 9,
    ScopeData = 10,
    TimeHeader = 11,
    ScenarioHeader = 12,
}

impl RecordType {
    pub fn from_u16(value: u16) -> Option<Self> {
        match value {
            1 => Some(Self::PlatformHeader),
            2 => Some(Self::BeamHeader),
            3 => Some(Self::GateHeader),
            4 => Some(Self::PlatformData),
            5 => Some(Self::BeamData),
            6 => Some(Self::GateData),
            7 => Some(Self::Event),
            8 => Some(Self::GenericData),
            9 => Some(Self::CategoryData),
            10 => Some(Self::ScopeData),
            11 => Some(Self::TimeHeader),
            12 => Some(Self::ScenarioHeader),
            _ => None,
        }
    }

    pub const fn as_u16(self) -> u16 {
        self as u16
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::PlatformHeader => "PlatformHeader",
            Self::BeamHeader => "BeamHeader",
            Self::GateHeader => "GateHeader",
            Self::PlatformData => "PlatformData",
            Self::BeamData => "BeamData",
            Self::GateData => "GateData",
            Self::Event => "Event",
            Self::GenericData => "GenericData",
            Self::CategoryData => "CategoryData",
            Self::ScopeData => "ScopeData",
            Self::TimeHeader => "TimeHeader",
            Self::ScenarioHeader => "ScenarioHeader",
        }
    }

    /// Whether records of this type are object headers.
    pub fn is_header(self) -> bool {
        matches!(
            self,
            Self::PlatformHeader | Self::BeamHeader | Self::GateHeader
        )
    }
}

/// Single-byte enumerations with checked decoding.
macro_rules! wire_enum {
    (
        $(#[$meta:meta])*
        $name:ident, $field:literal, default = $default:ident {
            $($(#[$vmeta:meta])* $variant:ident = $value:literal),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        #[repr(u8)]
        pub enum $name {
            $($(#[$vmeta])* $variant = $value),+
        }

        impl $name {
            pub const fn as_u8(self) -> u8 {
                self as u8
            }

            pub fn from_u8(value: u8) -> Result<Self> {
                match value {
                    $($value => Ok(Self::$variant),)+
                    _ => Err(ProtocolError::InvalidValue {
                        field: $field,
                        value: u64::from(value),
                    }),
                }
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::$default
            }
        }
    };
}

wire_enum! {
    /// Coordinate system a reference frame is expressed in.
    CoordinateSystem, "coordinate system", default = Lla {
        Lla = 0,
        Ecef = 1,
        Enu = 2,
        Ned = 3,
        Eci = 4,
        XEast = 5,
        Gtp = 6,
    }
}

wire_enum! {
    /// Display/lifecycle state of an object.
    ObjectState, "object state", default = On {
        Off = 0,
        On = 1,
        /// The object has been removed; clients should drop it.
        Expire = 2,
    }
}

wire_enum! {
    /// Track quality reported by the data source.
    TrackStatus, "track status", default = Live {
        Live = 0,
        Dropped = 1,
    }
}

wire_enum! {
    BeamKind, "beam kind", default = Linear {
        Linear = 0,
        Steered = 1,
        BodyRelative = 2,
    }
}

wire_enum! {
    GateKind, "gate kind", default = Range {
        Range = 0,
        Angle = 1,
        Footprint = 2,
    }
}

wire_enum! {
    /// Discriminator for [`EventValue`].
    EventKind, "event kind", default = State {
        State = 0,
        Color = 1,
        Target = 2,
        Classification = 3,
        Callsign = 4,
        Icon = 5,
    }
}

/// Coordinate reference frame description.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ReferenceFrame {
    pub system: CoordinateSystem,
    pub origin_lat: f64,
    pub origin_lon: f64,
    pub origin_alt: f64,
    pub eci_reference_time: f64,
}

impl ReferenceFrame {
    pub const ENCODED_LEN: usize = 1 + 4 * 8;

    fn put(&self, buf: &mut BytesMut) {
        buf.put_u8(self.system.as_u8());
        buf.put_f64(self.origin_lat);
        buf.put_f64(self.origin_lon);
        buf.put_f64(self.origin_alt);
        buf.put_f64(self.eci_reference_time);
    }

    fn take(r: &mut WireReader<'_>) -> Result<Self> {
        Ok(Self {
            system: CoordinateSystem::from_u8(r.u8()?)?,
            origin_lat: r.f64()?,
            origin_lon: r.f64()?,
            origin_alt: r.f64()?,
            eci_reference_time: r.f64()?,
        })
    }
}

/// Common layout contract implemented by every record.
pub trait WireRecord: Sized {
    const TYPE: RecordType;

    fn id(&self) -> u64;

    /// Length of the type-specific part.
    fn body_len(&self) -> usize;

    fn put_body(&self, buf: &mut BytesMut);

    fn take_body(r: &mut WireReader<'_>, id: u64) -> Result<Self>;

    fn encoded_len(&self) -> usize {
        ENVELOPE_LEN + self.body_len()
    }

    fn encode_into(&self, buf: &mut BytesMut) {
        buf.reserve(self.encoded_len());
        buf.put_u16(Self::TYPE.as_u16());
        buf.put_u64(self.id());
        self.put_body(buf);
    }

    /// Decode a record of exactly this type, envelope included.
    fn decode_from(r: &mut WireReader<'_>) -> Result<Self> {
        let tag = r.u16()?;
        if tag != Self::TYPE.as_u16() {
            return Err(match RecordType::from_u16(tag) {
                Some(actual) => ProtocolError::UnexpectedMessage {
                    expected: Self::TYPE.name(),
                    actual: actual.name(),
                },
                None => ProtocolError::UnknownType(tag),
            });
        }
        let id = r.u64()?;
        Self::take_body(r, id)
    }
}

// ---------------------------------------------------------------------------
// Data records
// ---------------------------------------------------------------------------

/// Platform position/orientation update.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PlatformData {
    pub id: u64,
    pub time: f64,
    pub position: [f64; 3],
    pub orientation: [f64; 3],
    pub velocity: [f64; 3],
    pub acceleration: [f64; 3],
}

impl PlatformData {
    pub const BODY_LEN: usize = 8 + 12 * 8;
}

impl WireRecord for PlatformData {
    const TYPE: RecordType = RecordType::PlatformData;

    fn id(&self) -> u64 {
        self.id
    }

    fn body_len(&self) -> usize {
        Self::BODY_LEN
    }

    fn put_body(&self, buf: &mut BytesMut) {
        buf.put_f64(self.time);
        for v in self
            .position
            .iter()
            .chain(&self.orientation)
            .chain(&self.velocity)
            .chain(&self.acceleration)
        {
            buf.put_f64(*v);
        }
    }

    fn take_body(r: &mut WireReader<'_>, id: u64) -> Result<Self> {
        r.ensure(Self::BODY_LEN)?;
        Ok(Self {
            id,
            time: r.f64()?,
            position: r.f64x3()?,
            orientation: r.f64x3()?,
            velocity: r.f64x3()?,
            acceleration: r.f64x3()?,
        })
    }
}

/// Beam pointing update.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct BeamData {
    pub id: u64,
    pub time: f64,
    pub azimuth: f64,
    pub elevation: f64,
    pub length: f64,
}

impl BeamData {
    pub const BODY_LEN: usize = 4 * 8;
}

impl WireRecord for BeamData {
    const TYPE: RecordType = RecordType::BeamData;

    fn id(&self) -> u64 {
        self.id
    }

    fn body_len(&self) -> usize {
        Self::BODY_LEN
    }

    fn put_body(&self, buf: &mut BytesMut) {
        buf.put_f64(self.time);
        buf.put_f64(self.azimuth);
        buf.put_f64(self.elevation);
        buf.put_f64(self.length);
    }

    fn take_body(r: &mut WireReader<'_>, id: u64) -> Result<Self> {
        r.ensure(Self::BODY_LEN)?;
        Ok(Self {
            id,
            time: r.f64()?,
            azimuth: r.f64()?,
            elevation: r.f64()?,
            length: r.f64()?,
        })
    }
}

/// Gate extent update.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct GateData {
    pub id: u64,
    pub time: f64,
    pub azimuth: f64,
    pub elevation: f64,
    pub width: f64,
    pub height: f64,
    pub min_range: f64,
    pub max_range: f64,
    pub centroid: f64,
}

impl GateData {
    pub const BODY_LEN: usize = 8 * 8;
}

impl WireRecord for GateData {
    const TYPE: RecordType = RecordType::GateData;

    fn id(&self) -> u64 {
        self.id
    }

    fn body_len(&self) -> usize {
        Self::BODY_LEN
    }

    fn put_body(&self, buf: &mut BytesMut) {
        buf.put_f64(self.time);
        buf.put_f64(self.azimuth);
        buf.put_f64(self.elevation);
        buf.put_f64(self.width);
        buf.put_f64(self.height);
        buf.put_f64(self.min_range);
        buf.put_f64(self.max_range);
        buf.put_f64(self.centroid);
    }

    fn take_body(r: &mut WireReader<'_>, id: u64) -> Result<Self> {
        r.ensure(Self::BODY_LEN)?;
        Ok(Self {
            id,
            time: r.f64()?,
            azimuth: r.f64()?,
            elevation: r.f64()?,
            width: r.f64()?,
            height: r.f64()?,
            min_range: r.f64()?,
            max_range: r.f64()?,
            centroid: r.f64()?,
        })
    }
}

// ---------------------------------------------------------------------------
// Header records
// ---------------------------------------------------------------------------

/// Identity and initial state of a platform.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PlatformHeader {
    pub id: u64,
    pub callsign: String,
    pub icon: String,
    pub frame: ReferenceFrame,
    pub color: u32,
    pub state: ObjectState,
    pub status: TrackStatus,
    pub interpolate: bool,
    pub data: PlatformData,
}

impl PlatformHeader {
    pub const BODY_LEN: usize = 2 * NAME_LEN
        + ReferenceFrame::ENCODED_LEN
        + 4
        + 3
        + ENVELOPE_LEN
        + PlatformData::BODY_LEN;

    pub fn new(id: u64, callsign: impl Into<String>) -> Self {
        Self {
            id,
            callsign: callsign.into(),
            data: PlatformData {
                id,
                ..PlatformData::default()
            },
            ..Self::default()
        }
    }
}

impl WireRecord for PlatformHeader {
    const TYPE: RecordType = RecordType::PlatformHeader;

    fn id(&self) -> u64 {
        self.id
    }

    fn body_len(&self) -> usize {
        Self::BODY_LEN
    }

    fn put_body(&self, buf: &mut BytesMut) {
        put_name(buf, &self.callsign, NAME_LEN);
        put_name(buf, &self.icon, NAME_LEN);
        self.frame.put(buf);
        buf.put_u32(self.color);
        buf.put_u8(self.state.as_u8());
        buf.put_u8(self.status.as_u8());
        put_bool(buf, self.interpolate);
        self.data.encode_into(buf);
    }

    fn take_body(r: &mut WireReader<'_>, id: u64) -> Result<Self> {
        r.ensure(Self::BODY_LEN)?;
        Ok(Self {
            id,
            callsign: r.name(NAME_LEN)?,
            icon: r.name(NAME_LEN)?,
            frame: ReferenceFrame::take(r)?,
            color: r.u32()?,
            state: ObjectState::from_u8(r.u8()?)?,
            status: TrackStatus::from_u8(r.u8()?)?,
            interpolate: r.bool()?,
            data: PlatformData::decode_from(r)?,
        })
    }
}

/// Identity and initial pointing of a beam hosted by a platform.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct BeamHeader {
    pub id: u64,
    pub host_id: u64,
    pub callsign: String,
    pub kind: BeamKind,
    pub color: u32,
    pub state: ObjectState,
    pub status: TrackStatus,
    pub interpolate: bool,
    pub data: BeamData,
}

impl BeamHeader {
    pub const BODY_LEN: usize = 8 + NAME_LEN + 1 + 4 + 3 + ENVELOPE_LEN + BeamData::BODY_LEN;

    pub fn new(id: u64, host_id: u64, callsign: impl Into<String>) -> Self {
        Self {
            id,
            host_id,
            callsign: callsign.into(),
            data: BeamData {
                id,
                ..BeamData::default()
            },
            ..Self::default()
        }
    }
}

impl WireRecord for BeamHeader {
    const TYPE: RecordType = RecordType::BeamHeader;

    fn id(&self) -> u64 {
        self.id
    }

    fn body_len(&self) -> usize {
        Self::BODY_LEN
    }

    fn put_body(&self, buf: &mut BytesMut) {
        buf.put_u64(self.host_id);
        put_name(buf, &self.callsign, NAME_LEN);
        buf.put_u8(self.kind.as_u8());
        buf.put_u32(self.color);
        buf.put_u8(self.state.as_u8());
        buf.put_u8(self.status.as_u8());
        put_bool(buf, self.interpolate);
        self.data.encode_into(buf);
    }

    fn take_body(r: &mut WireReader<'_>, id: u64) -> Result<Self> {
        r.ensure(Self::BODY_LEN)?;
        Ok(Self {
            id,
            host_id: r.u64()?,
            callsign: r.name(NAME_LEN)?,
            kind: BeamKind::from_u8(r.u8()?)?,
            color: r.u32()?,
            state: ObjectState::from_u8(r.u8()?)?,
            status: TrackStatus::from_u8(r.u8()?)?,
            interpolate: r.bool()?,
            data: BeamData::decode_from(r)?,
        })
    }
}

/// Identity and initial extent of a gate hosted by a beam.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct GateHeader {
    pub id: u64,
    pub host_id: u64,
    pub callsign: String,
    pub kind: GateKind,
    pub color: u32,
    pub state: ObjectState,
    pub status: TrackStatus,
    pub interpolate: bool,
    pub data: GateData,
}

impl GateHeader {
    pub const BODY_LEN: usize = 8 + NAME_LEN + 1 + 4 + 3 + ENVELOPE_LEN + GateData::BODY_LEN;

    pub fn new(id: u64, host_id: u64, callsign: impl Into<String>) -> Self {
        Self {
            id,
            host_id,
            callsign: callsign.into(),
            data: GateData {
                id,
                ..GateData::default()
            },
            ..Self::default()
        }
    }
}

impl WireRecord for GateHeader {
    const TYPE: RecordType = RecordType::GateHeader;

    fn id(&self) -> u64 {
        self.id
    }

    fn body_len(&self) -> usize {
        Self::BODY_LEN
    }

    fn put_body(&self, buf: &mut BytesMut) {
        buf.put_u64(self.host_id);
        put_name(buf, &self.callsign, NAME_LEN);
        buf.put_u8(self.kind.as_u8());
        buf.put_u32(self.color);
        buf.put_u8(self.state.as_u8());
        buf.put_u8(self.status.as_u8());
        put_bool(buf, self.interpolate);
        self.data.encode_into(buf);
    }

    fn take_body(r: &mut WireReader<'_>, id: u64) -> Result<Self> {
        r.ensure(Self::BODY_LEN)?;
        Ok(Self {
            id,
            host_id: r.u64()?,
            callsign: r.name(NAME_LEN)?,
            kind: GateKind::from_u8(r.u8()?)?,
            color: r.u32()?,
            state: ObjectState::from_u8(r.u8()?)?,
            status: TrackStatus::from_u8(r.u8()?)?,
            interpolate: r.bool()?,
            data: GateData::decode_from(r)?,
        })
    }
}

// ---------------------------------------------------------------------------
// Annotation records
// ---------------------------------------------------------------------------

/// Payload of an [`Event`].
#[derive(Debug, Clone, PartialEq)]
pub enum EventValue {
    State(ObjectState),
    Color(u32),
    Target(u64),
    Classification(String),
    Callsign(String),
    Icon(String),
}

impl EventValue {
    pub fn kind(&self) -> EventKind {
        match self {
            EventValue::State(_) => EventKind::State,
            EventValue::Color(_) => EventKind::Color,
            EventValue::Target(_) => EventKind::Target,
            EventValue::Classification(_) => EventKind::Classification,
            EventValue::Callsign(_) => EventKind::Callsign,
            EventValue::Icon(_) => EventKind::Icon,
        }
    }

    fn value_len(&self) -> usize {
        match self {
            EventValue::State(_) => 1,
            EventValue::Color(_) => 4,
            EventValue::Target(_) => 8,
            EventValue::Classification(_) | EventValue::Callsign(_) | EventValue::Icon(_) => {
                NAME_LEN
            }
        }
    }
}

/// Reliable change notification for an object.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    pub id: u64,
    pub time: f64,
    pub value: EventValue,
}

impl Event {
    /// The notification sent when an object is removed or expires.
    pub fn expire(id: u64, time: f64) -> Self {
        Self {
            id,
            time,
            value: EventValue::State(ObjectState::Expire),
        }
    }

    pub fn is_expire(&self) -> bool {
        self.value == EventValue::State(ObjectState::Expire)
    }
}

impl WireRecord for Event {
    const TYPE: RecordType = RecordType::Event;

    fn id(&self) -> u64 {
        self.id
    }

    fn body_len(&self) -> usize {
        8 + 1 + self.value.value_len()
    }

    fn put_body(&self, buf: &mut BytesMut) {
        buf.put_f64(self.time);
        buf.put_u8(self.value.kind().as_u8());
        match &self.value {
            EventValue::State(state) => buf.put_u8(state.as_u8()),
            EventValue::Color(color) => buf.put_u32(*color),
            EventValue::Target(target) => buf.put_u64(*target),
            EventValue::Classification(s) | EventValue::Callsign(s) | EventValue::Icon(s) => {
                put_name(buf, s, NAME_LEN)
            }
        }
    }

    fn take_body(r: &mut WireReader<'_>, id: u64) -> Result<Self> {
        let time = r.f64()?;
        let value = match EventKind::from_u8(r.u8()?)? {
            EventKind::State => EventValue::State(ObjectState::from_u8(r.u8()?)?),
            EventKind::Color => EventValue::Color(r.u32()?),
            EventKind::Target => EventValue::Target(r.u64()?),
            EventKind::Classification => EventValue::Classification(r.name(NAME_LEN)?),
            EventKind::Callsign => EventValue::Callsign(r.name(NAME_LEN)?),
            EventKind::Icon => EventValue::Icon(r.name(NAME_LEN)?),
        };
        Ok(Self { id, time, value })
    }
}

/// Activation window for a generic annotation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimeWindow {
    pub start: f64,
    pub expire: f64,
}

/// Free-form tagged string attached to an object.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct GenericData {
    pub id: u64,
    pub time: f64,
    pub window: Option<TimeWindow>,
    pub tag: String,
    pub value: String,
}

impl WireRecord for GenericData {
    const TYPE: RecordType = RecordType::GenericData;

    fn id(&self) -> u64 {
        self.id
    }

    fn body_len(&self) -> usize {
        8 + 1 + self.window.map_or(0, |_| 16) + text_len(&self.tag) + text_len(&self.value)
    }

    fn put_body(&self, buf: &mut BytesMut) {
        buf.put_f64(self.time);
        put_bool(buf, self.window.is_some());
        if let Some(window) = self.window {
            buf.put_f64(window.start);
            buf.put_f64(window.expire);
        }
        put_text(buf, &self.tag);
        put_text(buf, &self.value);
    }

    fn take_body(r: &mut WireReader<'_>, id: u64) -> Result<Self> {
        let time = r.f64()?;
        let window = if r.bool()? {
            Some(TimeWindow {
                start: r.f64()?,
                expire: r.f64()?,
            })
        } else {
            None
        };
        Ok(Self {
            id,
            time,
            window,
            tag: r.text()?,
            value: r.text()?,
        })
    }
}

/// Name/value pair attached to an object.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CategoryData {
    pub id: u64,
    pub time: f64,
    pub name: String,
    pub value: String,
}

impl WireRecord for CategoryData {
    const TYPE: RecordType = RecordType::CategoryData;

    fn id(&self) -> u64 {
        self.id
    }

    fn body_len(&self) -> usize {
        8 + text_len(&self.name) + text_len(&self.value)
    }

    fn put_body(&self, buf: &mut BytesMut) {
        buf.put_f64(self.time);
        put_text(buf, &self.name);
        put_text(buf, &self.value);
    }

    fn take_body(r: &mut WireReader<'_>, id: u64) -> Result<Self> {
        Ok(Self {
            id,
            time: r.f64()?,
            name: r.text()?,
            value: r.text()?,
        })
    }
}

/// Typed numeric array carried by [`ScopeData`].
#[derive(Debug, Clone, PartialEq)]
pub enum ScopeValues {
    I8(Vec<i8>),
    U8(Vec<u8>),
    I16(Vec<i16>),
    U16(Vec<u16>),
    I32(Vec<i32>),
    U32(Vec<u32>),
    I64(Vec<i64>),
    U64(Vec<u64>),
    F32(Vec<f32>),
    F64(Vec<f64>),
}

impl Default for ScopeValues {
    fn default() -> Self {
        ScopeValues::F64(Vec::new())
    }
}

impl ScopeValues {
    /// Element type code written on the wire.
    pub fn type_code(&self) -> u8 {
        match self {
            ScopeValues::I8(_) => 1,
            ScopeValues::U8(_) => 2,
            ScopeValues::I16(_) => 3,
            ScopeValues::U16(_) => 4,
            ScopeValues::I32(_) => 5,
            ScopeValues::U32(_) => 6,
            ScopeValues::I64(_) => 7,
            ScopeValues::U64(_) => 8,
            ScopeValues::F32(_) => 9,
            ScopeValues::F64(_) => 10,
        }
    }

    /// Width in bytes of one element for a type code.
    pub fn element_width(code: u8) -> Result<usize> {
        match code {
            1 | 2 => Ok(1),
            3 | 4 => Ok(2),
            5 | 6 | 9 => Ok(4),
            7 | 8 | 10 => Ok(8),
            other => Err(ProtocolError::InvalidValue {
                field: "scope element type",
                value: u64::from(other),
            }),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            ScopeValues::I8(v) => v.len(),
            ScopeValues::U8(v) => v.len(),
            ScopeValues::I16(v) => v.len(),
            ScopeValues::U16(v) => v.len(),
            ScopeValues::I32(v) => v.len(),
            ScopeValues::U32(v) => v.len(),
            ScopeValues::I64(v) => v.len(),
            ScopeValues::U64(v) => v.len(),
            ScopeValues::F32(v) => v.len(),
            ScopeValues::F64(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn put(&self, buf: &mut BytesMut) {
        buf.put_u8(self.type_code());
        buf.put_u32(self.len() as u32);
        match self {
            ScopeValues::I8(v) => v.iter().for_each(|x| buf.put_i8(*x)),
            ScopeValues::U8(v) => buf.put_slice(v),
            ScopeValues::I16(v) => v.iter().for_each(|x| buf.put_i16(*x)),
            ScopeValues::U16(v) => v.iter().for_each(|x| buf.put_u16(*x)),
            ScopeValues::I32(v) => v.iter().for_each(|x| buf.put_i32(*x)),
            ScopeValues::U32(v) => v.iter().for_each(|x| buf.put_u32(*x)),
            ScopeValues::I64(v) => v.iter().for_each(|x| buf.put_i64(*x)),
            ScopeValues::U64(v) => v.iter().for_each(|x| buf.put_u64(*x)),
            ScopeValues::F32(v) => v.iter().for_each(|x| buf.put_f32(*x)),
            ScopeValues::F64(v) => v.iter().for_each(|x| buf.put_f64(*x)),
        }
    }

    fn take(r: &mut WireReader<'_>) -> Result<Self> {
        let code = r.u8()?;
        let width = Self::element_width(code)?;
        let count = r.u32()? as usize;
        // Check the whole array up front so a bogus count never drives a large allocation.
        r.ensure(count.saturating_mul(width))?;

        fn collect<T>(
            r: &mut WireReader<'_>,
            count: usize,
            mut read: impl FnMut(&mut WireReader<'_>) -> Result<T>,
        ) -> Result<Vec<T>> {
            (0..count).map(|_| read(r)).collect()
        }

        Ok(match code {
            1 => ScopeValues::I8(collect(r, count, |r| r.i8())?),
            2 => ScopeValues::U8(r.take(count)?.to_vec()),
            3 => ScopeValues::I16(collect(r, count, |r| r.i16())?),
            4 => ScopeValues::U16(collect(r, count, |r| r.u16())?),
            5 => ScopeValues::I32(collect(r, count, |r| r.i32())?),
            6 => ScopeValues::U32(collect(r, count, |r| r.u32())?),
            7 => ScopeValues::I64(collect(r, count, |r| r.i64())?),
            8 => ScopeValues::U64(collect(r, count, |r| r.u64())?),
            9 => ScopeValues::F32(collect(r, count, |r| r.f32())?),
            _ => ScopeValues::F64(collect(r, count, |r| r.f64())?),
        })
    }

    fn encoded_len(&self) -> usize {
        let width = match self {
            ScopeValues::I8(_) | ScopeValues::U8(_) => 1,
            ScopeValues::I16(_) | ScopeValues::U16(_) => 2,
            ScopeValues::I32(_) | ScopeValues::U32(_) | ScopeValues::F32(_) => 4,
            ScopeValues::I64(_) | ScopeValues::U64(_) | ScopeValues::F64(_) => 8,
        };
        1 + 4 + width * self.len()
    }
}

/// Named index range within a scope array.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ScopeRange {
    pub name: String,
    pub start: u32,
    pub end: u32,
}

impl ScopeRange {
    pub const ENCODED_LEN: usize = RANGE_NAME_LEN + 8;
}

/// Auxiliary scalar-plot data.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ScopeData {
    pub id: u64,
    pub time: f64,
    pub values: ScopeValues,
    pub ranges: Vec<ScopeRange>,
}

impl WireRecord for ScopeData {
    const TYPE: RecordType = RecordType::ScopeData;

    fn id(&self) -> u64 {
        self.id
    }

    fn body_len(&self) -> usize {
        8 + self.values.encoded_len() + 4 + self.ranges.len() * ScopeRange::ENCODED_LEN
    }

    fn put_body(&self, buf: &mut BytesMut) {
        buf.put_f64(self.time);
        self.values.put(buf);
        buf.put_u32(self.ranges.len() as u32);
        for range in &self.ranges {
            put_name(buf, &range.name, RANGE_NAME_LEN);
            buf.put_u32(range.start);
            buf.put_u32(range.end);
        }
    }

    fn take_body(r: &mut WireReader<'_>, id: u64) -> Result<Self> {
        let time = r.f64()?;
        let values = ScopeValues::take(r)?;
        let count = r.u32()? as usize;
        r.ensure(count.saturating_mul(ScopeRange::ENCODED_LEN))?;
        let ranges = (0..count)
            .map(|_| {
                Ok(ScopeRange {
                    name: r.name(RANGE_NAME_LEN)?,
                    start: r.u32()?,
                    end: r.u32()?,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            id,
            time,
            values,
            ranges,
        })
    }
}

// ---------------------------------------------------------------------------
// Session headers
// ---------------------------------------------------------------------------

/// Scenario clock description.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimeHeader {
    pub reference_year: u16,
    pub time: f64,
    pub scale: f64,
    pub frozen: bool,
}

impl Default for TimeHeader {
    fn default() -> Self {
        Self {
            reference_year: 1970,
            time: 0.0,
            scale: 1.0,
            frozen: false,
        }
    }
}

impl WireRecord for TimeHeader {
    const TYPE: RecordType = RecordType::TimeHeader;

    fn id(&self) -> u64 {
        0
    }

    fn body_len(&self) -> usize {
        2 + 8 + 8 + 1
    }

    fn put_body(&self, buf: &mut BytesMut) {
        buf.put_u16(self.reference_year);
        buf.put_f64(self.time);
        buf.put_f64(self.scale);
        put_bool(buf, self.frozen);
    }

    fn take_body(r: &mut WireReader<'_>, _id: u64) -> Result<Self> {
        Ok(Self {
            reference_year: r.u16()?,
            time: r.f64()?,
            scale: r.f64()?,
            frozen: r.bool()?,
        })
    }
}

/// Scenario-wide description handed to every client.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ScenarioHeader {
    pub frame: ReferenceFrame,
    pub description: String,
    pub classification: String,
    pub classification_color: u32,
}

impl WireRecord for ScenarioHeader {
    const TYPE: RecordType = RecordType::ScenarioHeader;

    fn id(&self) -> u64 {
        0
    }

    fn body_len(&self) -> usize {
        ReferenceFrame::ENCODED_LEN + 2 * NAME_LEN + 4
    }

    fn put_body(&self, buf: &mut BytesMut) {
        self.frame.put(buf);
        put_name(buf, &self.description, NAME_LEN);
        put_name(buf, &self.classification, NAME_LEN);
        buf.put_u32(self.classification_color);
    }

    fn take_body(r: &mut WireReader<'_>, _id: u64) -> Result<Self> {
        Ok(Self {
            frame: ReferenceFrame::take(r)?,
            description: r.name(NAME_LEN)?,
            classification: r.name(NAME_LEN)?,
            classification_color: r.u32()?,
        })
    }
}

// ---------------------------------------------------------------------------
// Sum types
// ---------------------------------------------------------------------------

/// A Platform, Beam or Gate header.
#[derive(Debug, Clone, PartialEq)]
pub enum Header {
    Platform(PlatformHeader),
    Beam(BeamHeader),
    Gate(GateHeader),
}

/// Encoded length of the largest header kind.
pub const MAX_HEADER_LEN: usize = {
    let p = ENVELOPE_LEN + PlatformHeader::BODY_LEN;
    let b = ENVELOPE_LEN + BeamHeader::BODY_LEN;
    let g = ENVELOPE_LEN + GateHeader::BODY_LEN;
    let m = if p > b { p } else { b };
    if m > g {
        m
    } else {
        g
    }
};

impl Header {
    pub fn id(&self) -> u64 {
        match self {
            Header::Platform(h) => h.id,
            Header::Beam(h) => h.id,
            Header::Gate(h) => h.id,
        }
    }

    pub fn record_type(&self) -> RecordType {
        match self {
            Header::Platform(_) => RecordType::PlatformHeader,
            Header::Beam(_) => RecordType::BeamHeader,
            Header::Gate(_) => RecordType::GateHeader,
        }
    }

    /// Id of the owning object: the platform of a beam, the beam of a gate.
    pub fn host_id(&self) -> Option<u64> {
        match self {
            Header::Platform(_) => None,
            Header::Beam(h) => Some(h.host_id),
            Header::Gate(h) => Some(h.host_id),
        }
    }

    pub fn callsign(&self) -> &str {
        match self {
            Header::Platform(h) => &h.callsign,
            Header::Beam(h) => &h.callsign,
            Header::Gate(h) => &h.callsign,
        }
    }

    pub fn state(&self) -> ObjectState {
        match self {
            Header::Platform(h) => h.state,
            Header::Beam(h) => h.state,
            Header::Gate(h) => h.state,
        }
    }

    pub fn encoded_len(&self) -> usize {
        match self {
            Header::Platform(h) => h.encoded_len(),
            Header::Beam(h) => h.encoded_len(),
            Header::Gate(h) => h.encoded_len(),
        }
    }

    pub fn encode_into(&self, buf: &mut BytesMut) {
        match self {
            Header::Platform(h) => h.encode_into(buf),
            Header::Beam(h) => h.encode_into(buf),
            Header::Gate(h) => h.encode_into(buf),
        }
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.encoded_len());
        self.encode_into(&mut buf);
        buf.freeze()
    }

    /// Decode a buffer that must hold a header record.
    pub fn decode(buf: &[u8]) -> Result<Self> {
        match decode(buf)? {
            Record::PlatformHeader(h) => Ok(Header::Platform(h)),
            Record::BeamHeader(h) => Ok(Header::Beam(h)),
            Record::GateHeader(h) => Ok(Header::Gate(h)),
            other => Err(ProtocolError::UnexpectedMessage {
                expected: "header",
                actual: other.record_type().name(),
            }),
        }
    }

    /// Patch the mutable header fields an event carries.
    ///
    /// Returns false when the event does not touch a header field
    /// (targets and classifications are not stored in headers).
    pub fn apply_event(&mut self, event: &EventValue) -> bool {
        let (callsign, color, state, icon) = match self {
            Header::Platform(h) => (&mut h.callsign, &mut h.color, &mut h.state, Some(&mut h.icon)),
            Header::Beam(h) => (&mut h.callsign, &mut h.color, &mut h.state, None),
            Header::Gate(h) => (&mut h.callsign, &mut h.color, &mut h.state, None),
        };
        match event {
            EventValue::State(s) => *state = *s,
            EventValue::Color(c) => *color = *c,
            EventValue::Callsign(name) => *callsign = name.clone(),
            EventValue::Icon(name) => match icon {
                Some(icon) => *icon = name.clone(),
                None => return false,
            },
            EventValue::Target(_) | EventValue::Classification(_) => return false,
        }
        true
    }
}

impl From<PlatformHeader> for Header {
    fn from(h: PlatformHeader) -> Self {
        Header::Platform(h)
    }
}

impl From<BeamHeader> for Header {
    fn from(h: BeamHeader) -> Self {
        Header::Beam(h)
    }
}

impl From<GateHeader> for Header {
    fn from(h: GateHeader) -> Self {
        Header::Gate(h)
    }
}

/// A Platform, Beam or Gate data update.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DataRecord {
    Platform(PlatformData),
    Beam(BeamData),
    Gate(GateData),
}

impl DataRecord {
    pub fn id(&self) -> u64 {
        match self {
            DataRecord::Platform(d) => d.id,
            DataRecord::Beam(d) => d.id,
            DataRecord::Gate(d) => d.id,
        }
    }

    pub fn time(&self) -> f64 {
        match self {
            DataRecord::Platform(d) => d.time,
            DataRecord::Beam(d) => d.time,
            DataRecord::Gate(d) => d.time,
        }
    }
}

impl From<DataRecord> for Record {
    fn from(d: DataRecord) -> Self {
        match d {
            DataRecord::Platform(d) => Record::PlatformData(d),
            DataRecord::Beam(d) => Record::BeamData(d),
            DataRecord::Gate(d) => Record::GateData(d),
        }
    }
}

impl From<Header> for Record {
    fn from(h: Header) -> Self {
        match h {
            Header::Platform(h) => Record::PlatformHeader(h),
            Header::Beam(h) => Record::BeamHeader(h),
            Header::Gate(h) => Record::GateHeader(h),
        }
    }
}

/// Any record of the closed set.
#[derive(Debug, Clone, PartialEq)]
pub enum Record {
    PlatformHeader(PlatformHeader),
    BeamHeader(BeamHeader),
    GateHeader(GateHeader),
    PlatformData(PlatformData),
    BeamData(BeamData),
    GateData(GateData),
    Event(Event),
    GenericData(GenericData),
    CategoryData(CategoryData),
    ScopeData(ScopeData),
    TimeHeader(TimeHeader),
    ScenarioHeader(ScenarioHeader),
}

/// Apply `$body` to the inner record whatever its variant.
macro_rules! with_record {
    ($record:expr, $inner:ident => $body:expr) => {
        match $record {
            Record::PlatformHeader($inner) => $body,
            Record::BeamHeader($inner) => $body,
            Record::GateHeader($inner) => $body,
            Record::PlatformData($inner) => $body,
            Record::BeamData($inner) => $body,
            Record::GateData($inner) => $body,
            Record::Event($inner) => $body,
            Record::GenericData($inner) => $body,
            Record::CategoryData($inner) => $body,
            Record::ScopeData($inner) => $body,
            Record::TimeHeader($inner) => $body,
            Record::ScenarioHeader($inner) => $body,
        }
    };
}

impl Record {
    pub fn record_type(&self) -> RecordType {
        fn tag<R: WireRecord>(_: &R) -> RecordType {
            R::TYPE
        }
        with_record!(self, r => tag(r))
    }

    pub fn id(&self) -> u64 {
        with_record!(self, r => r.id())
    }

    pub fn encoded_len(&self) -> usize {
        with_record!(self, r => r.encoded_len())
    }

    pub fn encode_into(&self, buf: &mut BytesMut) {
        with_record!(self, r => r.encode_into(buf))
    }

    /// Convert a header record into a [`Header`].
    pub fn into_header(self) -> Option<Header> {
        match self {
            Record::PlatformHeader(h) => Some(Header::Platform(h)),
            Record::BeamHeader(h) => Some(Header::Beam(h)),
            Record::GateHeader(h) => Some(Header::Gate(h)),
            _ => None,
        }
    }
}

/// Encode a record into a fresh buffer.
pub fn encode(record: &Record) -> Bytes {
    let mut buf = BytesMut::with_capacity(record.encoded_len());
    record.encode_into(&mut buf);
    buf.freeze()
}

/// Read the envelope without consuming the record.
pub fn peek_envelope(buf: &[u8]) -> Result<(u16, u64)> {
    let mut r = WireReader::new(buf);
    Ok((r.u16()?, r.u64()?))
}

/// Decode one record from the front of `buf`, returning it with the number of
/// bytes it occupied.
pub fn decode_prefix(buf: &[u8]) -> Result<(Record, usize)> {
    let (tag, id) = peek_envelope(buf)?;
    let kind = RecordType::from_u16(tag).ok_or(ProtocolError::UnknownType(tag))?;
    let mut r = WireReader::new(&buf[ENVELOPE_LEN..]);
    let record = match kind {
        RecordType::PlatformHeader => Record::PlatformHeader(PlatformHeader::take_body(&mut r, id)?),
        RecordType::BeamHeader => Record::BeamHeader(BeamHeader::take_body(&mut r, id)?),
        RecordType::GateHeader => Record::GateHeader(GateHeader::take_body(&mut r, id)?),
        RecordType::PlatformData => Record::PlatformData(PlatformData::take_body(&mut r, id)?),
        RecordType::BeamData => Record::BeamData(BeamData::take_body(&mut r, id)?),
        RecordType::GateData => Record::GateData(GateData::take_body(&mut r, id)?),
        RecordType::Event => Record::Event(Event::take_body(&mut r, id)?),
        RecordType::GenericData => Record::GenericData(GenericData::take_body(&mut r, id)?),
        RecordType::CategoryData => Record::CategoryData(CategoryData::take_body(&mut r, id)?),
        RecordType::ScopeData => Record::ScopeData(ScopeData::take_body(&mut r, id)?),
        RecordType::TimeHeader => Record::TimeHeader(TimeHeader::take_body(&mut r, id)?),
        RecordType::ScenarioHeader => {
            Record::ScenarioHeader(ScenarioHeader::take_body(&mut r, id)?)
        }
    };
    Ok((record, ENVELOPE_LEN + r.position()))
}

/// Decode a single record. Trailing bytes after the record are ignored.
pub fn decode(buf: &[u8]) -> Result<Record> {
    decode_prefix(buf).map(|(record, _)| record)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;

    fn sample_platform() -> PlatformHeader {
        PlatformHeader {
            id: 42,
            callsign: "EAGLE 01".into(),
            icon: "f-15".into(),
            frame: ReferenceFrame {
                system: CoordinateSystem::Enu,
                origin_lat: 0.5,
                origin_lon: -1.2,
                origin_alt: 10.0,
                eci_reference_time: 0.0,
            },
            color: 0xff00_00ff,
            state: ObjectState::On,
            status: TrackStatus::Live,
            interpolate: true,
            data: PlatformData {
                id: 42,
                time: 12.5,
                position: [1.0, 2.0, 3.0],
                orientation: [0.1, 0.2, 0.3],
                velocity: [100.0, 0.0, -1.0],
                acceleration: [0.0; 3],
            },
        }
    }

    #[test]
    fn test_platform_header_layout() {
        let header = sample_platform();
        let bytes = encode(&Record::PlatformHeader(header.clone()));
        assert_eq!(bytes.len(), ENVELOPE_LEN + PlatformHeader::BODY_LEN);
        assert_eq!(&bytes[0..2], &1u16.to_be_bytes());
        assert_eq!(&bytes[2..10], &42u64.to_be_bytes());
        assert_eq!(decode(&bytes).unwrap(), Record::PlatformHeader(header));
    }

    #[test]
    fn test_max_header_len_covers_every_kind() {
        assert!(Header::from(sample_platform()).encoded_len() <= MAX_HEADER_LEN);
        assert!(Header::from(BeamHeader::new(2, 1, "b")).encoded_len() <= MAX_HEADER_LEN);
        assert!(Header::from(GateHeader::new(3, 2, "g")).encoded_len() <= MAX_HEADER_LEN);
    }

    #[test]
    fn test_short_buffer_is_short_read() {
        let bytes = encode(&Record::BeamData(BeamData {
            id: 7,
            time: 1.0,
            azimuth: 0.5,
            elevation: 0.1,
            length: 1000.0,
        }));
        for cut in [0, 1, 9, 10, bytes.len() - 1] {
            assert!(
                matches!(decode(&bytes[..cut]), Err(ProtocolError::ShortRead { .. })),
                "cut at {cut}"
            );
        }
    }

    #[test]
    fn test_unknown_type_tag() {
        let mut buf = BytesMut::new();
        buf.put_u16(999);
        buf.put_u64(5);
        buf.put_slice(&[0; 16]);
        assert!(matches!(decode(&buf), Err(ProtocolError::UnknownType(999))));
    }

    #[test]
    fn test_invalid_enum_byte() {
        let mut bytes = BytesMut::from(&encode(&Record::Event(Event::expire(3, 1.0)))[..]);
        // kind byte sits after envelope + time
        bytes[ENVELOPE_LEN + 8] = 200;
        assert!(matches!(
            decode(&bytes),
            Err(ProtocolError::InvalidValue {
                field: "event kind",
                value: 200
            })
        ));
    }

    #[test]
    fn test_empty_generic_and_scope() {
        let generic = Record::GenericData(GenericData {
            id: 1,
            ..GenericData::default()
        });
        assert_eq!(decode(&encode(&generic)).unwrap(), generic);

        let scope = Record::ScopeData(ScopeData {
            id: 1,
            time: 3.0,
            values: ScopeValues::I16(vec![]),
            ranges: vec![],
        });
        assert_eq!(decode(&encode(&scope)).unwrap(), scope);
    }

    #[test]
    fn test_scope_bogus_count_is_short_read() {
        let mut buf = BytesMut::new();
        buf.put_u16(RecordType::ScopeData.as_u16());
        buf.put_u64(1);
        buf.put_f64(0.0);
        buf.put_u8(10);
        buf.put_u32(u32::MAX);
        assert!(matches!(decode(&buf), Err(ProtocolError::ShortRead { .. })));
    }

    #[test]
    fn test_long_callsign_truncates_silently() {
        let mut header = sample_platform();
        header.callsign = "C".repeat(200);
        let decoded = Header::decode(&Header::from(header).encode()).unwrap();
        assert_eq!(decoded.callsign().len(), NAME_LEN);
    }

    #[test]
    fn test_decode_prefix_reports_consumed_length() {
        let first = Record::Event(Event {
            id: 9,
            time: 2.0,
            value: EventValue::Color(0x00ff_00ff),
        });
        let mut buf = BytesMut::new();
        first.encode_into(&mut buf);
        Record::TimeHeader(TimeHeader::default()).encode_into(&mut buf);

        let (record, used) = decode_prefix(&buf).unwrap();
        assert_eq!(record, first);
        assert_eq!(used, first.encoded_len());
        assert!(matches!(
            decode(&buf[used..]).unwrap(),
            Record::TimeHeader(_)
        ));
    }

    #[test]
    fn test_apply_event_patches_header() {
        let mut header = Header::from(sample_platform());
        assert!(header.apply_event(&EventValue::Color(0x1234_5678)));
        assert!(header.apply_event(&EventValue::Callsign("NEW".into())));
        assert!(header.apply_event(&EventValue::Icon("c-130".into())));
        assert!(!header.apply_event(&EventValue::Target(3)));
        match header {
            Header::Platform(h) => {
                assert_eq!(h.color, 0x1234_5678);
                assert_eq!(h.callsign, "NEW");
                assert_eq!(h.icon, "c-130");
            }
            _ => panic!("kind changed"),
        }

        let mut beam = Header::from(BeamHeader::new(2, 1, "b"));
        assert!(!beam.apply_event(&EventValue::Icon("x".into())));
        assert!(beam.apply_event(&EventValue::State(ObjectState::Off)));
        assert_eq!(beam.state(), ObjectState::Off);
    }

    #[test]
    fn test_header_decode_rejects_non_header() {
        let bytes = encode(&Record::TimeHeader(TimeHeader::default()));
        assert!(matches!(
            Header::decode(&bytes),
            Err(ProtocolError::UnexpectedMessage { .. })
        ));
    }
}
