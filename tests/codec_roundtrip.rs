//! Property-based round-trip tests for the wire codec
//!
//! Every record kind must decode back to exactly what was encoded, for any
//! finite field values, including empty text fields and empty scope arrays.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use proptest::prelude::*;
use trackwire::core::record::{
    decode, decode_prefix, encode, BeamData, BeamHeader, BeamKind, CategoryData,
    CoordinateSystem, Event, EventValue, GateData, GateHeader, GateKind, GenericData,
    ObjectState, PlatformData, PlatformHeader, Record, ReferenceFrame, ScenarioHeader,
    ScopeData, ScopeRange, ScopeValues, TimeHeader, TimeWindow, TrackStatus,
};

fn name() -> impl Strategy<Value = String> {
    "[A-Za-z0-9 _-]{0,40}"
}

fn text() -> impl Strategy<Value = String> {
    "[ -~]{0,300}"
}

fn finite() -> impl Strategy<Value = f64> {
    -1.0e12..1.0e12f64
}

fn vec3() -> impl Strategy<Value = [f64; 3]> {
    [finite(), finite(), finite()]
}

fn state() -> impl Strategy<Value = ObjectState> {
    prop_oneof![
        Just(ObjectState::Off),
        Just(ObjectState::On),
        Just(ObjectState::Expire)
    ]
}

fn status() -> impl Strategy<Value = TrackStatus> {
    prop_oneof![Just(TrackStatus::Live), Just(TrackStatus::Dropped)]
}

fn frame() -> impl Strategy<Value = ReferenceFrame> {
    let system = prop_oneof![
        Just(CoordinateSystem::Lla),
        Just(CoordinateSystem::Ecef),
        Just(CoordinateSystem::Enu),
        Just(CoordinateSystem::Ned),
        Just(CoordinateSystem::Eci),
        Just(CoordinateSystem::XEast),
        Just(CoordinateSystem::Gtp),
    ];
    (system, finite(), finite(), finite(), finite()).prop_map(|(system, lat, lon, alt, eci)| {
        ReferenceFrame {
            system,
            origin_lat: lat,
            origin_lon: lon,
            origin_alt: alt,
            eci_reference_time: eci,
        }
    })
}

fn platform_data(id: u64) -> impl Strategy<Value = PlatformData> {
    (finite(), vec3(), vec3(), vec3(), vec3()).prop_map(move |(time, p, o, v, a)| PlatformData {
        id,
        time,
        position: p,
        orientation: o,
        velocity: v,
        acceleration: a,
    })
}

fn platform_header() -> impl Strategy<Value = Record> {
    any::<u64>().prop_flat_map(|id| {
        (
            name(),
            name(),
            frame(),
            any::<u32>(),
            state(),
            status(),
            any::<bool>(),
            platform_data(id),
        )
            .prop_map(move |(callsign, icon, frame, color, state, status, interpolate, data)| {
                Record::PlatformHeader(PlatformHeader {
                    id,
                    callsign,
                    icon,
                    frame,
                    color,
                    state,
                    status,
                    interpolate,
                    data,
                })
            })
    })
}

fn beam_header() -> impl Strategy<Value = Record> {
    let kind = prop_oneof![
        Just(BeamKind::Linear),
        Just(BeamKind::Steered),
        Just(BeamKind::BodyRelative)
    ];
    (
        any::<u64>(),
        any::<u64>(),
        name(),
        kind,
        any::<u32>(),
        state(),
        status(),
        any::<bool>(),
        [finite(), finite(), finite(), finite()],
    )
        .prop_map(|(id, host_id, callsign, kind, color, state, status, interpolate, d)| {
            Record::BeamHeader(BeamHeader {
                id,
                host_id,
                callsign,
                kind,
                color,
                state,
                status,
                interpolate,
                data: BeamData {
                    id,
                    time: d[0],
                    azimuth: d[1],
                    elevation: d[2],
                    length: d[3],
                },
            })
        })
}

fn gate_data(id: u64) -> impl Strategy<Value = GateData> {
    prop::array::uniform8(finite()).prop_map(move |d| GateData {
        id,
        time: d[0],
        azimuth: d[1],
        elevation: d[2],
        width: d[3],
        height: d[4],
        min_range: d[5],
        max_range: d[6],
        centroid: d[7],
    })
}

fn gate_kind() -> impl Strategy<Value = GateKind> {
    prop_oneof![
        Just(GateKind::Range),
        Just(GateKind::Angle),
        Just(GateKind::Footprint)
    ]
}

fn gate_header() -> impl Strategy<Value = Record> {
    any::<u64>().prop_flat_map(|id| {
        (
            any::<u64>(),
            name(),
            gate_kind(),
            any::<u32>(),
            state(),
            status(),
            any::<bool>(),
            gate_data(id),
        )
            .prop_map(move |(host_id, callsign, kind, color, state, status, interpolate, data)| {
                Record::GateHeader(GateHeader {
                    id,
                    host_id,
                    callsign,
                    kind,
                    color,
                    state,
                    status,
                    interpolate,
                    data,
                })
            })
    })
}

fn event() -> impl Strategy<Value = Record> {
    let value = prop_oneof![
        state().prop_map(EventValue::State),
        any::<u32>().prop_map(EventValue::Color),
        any::<u64>().prop_map(EventValue::Target),
        name().prop_map(EventValue::Classification),
        name().prop_map(EventValue::Callsign),
        name().prop_map(EventValue::Icon),
    ];
    (any::<u64>(), finite(), value).prop_map(|(id, time, value)| Record::Event(Event { id, time, value }))
}

fn generic() -> impl Strategy<Value = Record> {
    let window = prop::option::of((finite(), finite()).prop_map(|(start, expire)| TimeWindow { start, expire }));
    (any::<u64>(), finite(), window, text(), text()).prop_map(|(id, time, window, tag, value)| {
        Record::GenericData(GenericData {
            id,
            time,
            window,
            tag,
            value,
        })
    })
}

fn category() -> impl Strategy<Value = Record> {
    (any::<u64>(), finite(), text(), text())
        .prop_map(|(id, time, name, value)| Record::CategoryData(CategoryData { id, time, name, value }))
}

fn scope_values() -> impl Strategy<Value = ScopeValues> {
    let len = 0..64usize;
    prop_oneof![
        prop::collection::vec(any::<i8>(), len.clone()).prop_map(ScopeValues::I8),
        prop::collection::vec(any::<u8>(), len.clone()).prop_map(ScopeValues::U8),
        prop::collection::vec(any::<i16>(), len.clone()).prop_map(ScopeValues::I16),
        prop::collection::vec(any::<u16>(), len.clone()).prop_map(ScopeValues::U16),
        prop::collection::vec(any::<i32>(), len.clone()).prop_map(ScopeValues::I32),
        prop::collection::vec(any::<u32>(), len.clone()).prop_map(ScopeValues::U32),
        prop::collection::vec(any::<i64>(), len.clone()).prop_map(ScopeValues::I64),
        prop::collection::vec(any::<u64>(), len.clone()).prop_map(ScopeValues::U64),
        prop::collection::vec(-1.0e6..1.0e6f32, len.clone()).prop_map(ScopeValues::F32),
        prop::collection::vec(finite(), len).prop_map(ScopeValues::F64),
    ]
}

fn scope() -> impl Strategy<Value = Record> {
    let range = ("[a-z]{0,20}", any::<u32>(), any::<u32>())
        .prop_map(|(name, start, end)| ScopeRange { name, start, end });
    (any::<u64>(), finite(), scope_values(), prop::collection::vec(range, 0..6)).prop_map(
        |(id, time, values, ranges)| {
            Record::ScopeData(ScopeData {
                id,
                time,
                values,
                ranges,
            })
        },
    )
}

fn time_header() -> impl Strategy<Value = Record> {
    (any::<u16>(), finite(), finite(), any::<bool>()).prop_map(|(reference_year, time, scale, frozen)| {
        Record::TimeHeader(TimeHeader {
            reference_year,
            time,
            scale,
            frozen,
        })
    })
}

fn scenario_header() -> impl Strategy<Value = Record> {
    (frame(), name(), name(), any::<u32>()).prop_map(|(frame, description, classification, color)| {
        Record::ScenarioHeader(ScenarioHeader {
            frame,
            description,
            classification,
            classification_color: color,
        })
    })
}

fn data_record() -> impl Strategy<Value = Record> {
    prop_oneof![
        any::<u64>().prop_flat_map(platform_data).prop_map(Record::PlatformData),
        (any::<u64>(), [finite(), finite(), finite(), finite()]).prop_map(|(id, d)| {
            Record::BeamData(BeamData {
                id,
                time: d[0],
                azimuth: d[1],
                elevation: d[2],
                length: d[3],
            })
        }),
        any::<u64>().prop_flat_map(gate_data).prop_map(Record::GateData),
    ]
}

fn any_record() -> impl Strategy<Value = Record> {
    prop_oneof![
        platform_header(),
        beam_header(),
        gate_header(),
        data_record(),
        event(),
        generic(),
        category(),
        scope(),
        time_header(),
        scenario_header(),
    ]
}

proptest! {
    #[test]
    fn prop_record_roundtrip(record in any_record()) {
        let bytes = encode(&record);
        prop_assert_eq!(bytes.len(), record.encoded_len());
        let decoded = decode(&bytes).expect("decoding an encoded record should not fail");
        prop_assert_eq!(decoded, record);
    }

    #[test]
    fn prop_truncated_record_never_decodes(record in any_record(), cut in any::<prop::sample::Index>()) {
        let bytes = encode(&record);
        let at = cut.index(bytes.len());
        prop_assert!(decode(&bytes[..at]).is_err());
    }

    #[test]
    fn prop_back_to_back_records_split_exactly(a in any_record(), b in any_record()) {
        let mut stream = encode(&a).to_vec();
        stream.extend_from_slice(&encode(&b));

        let (first, used) = decode_prefix(&stream).unwrap();
        prop_assert_eq!(first, a);
        let (second, rest) = decode_prefix(&stream[used..]).unwrap();
        prop_assert_eq!(second, b);
        prop_assert_eq!(used + rest, stream.len());
    }
}

#[test]
fn test_empty_annotations_round_trip() {
    let generic = Record::GenericData(GenericData {
        id: 4,
        time: 0.0,
        window: None,
        tag: String::new(),
        value: String::new(),
    });
    assert_eq!(decode(&encode(&generic)).unwrap(), generic);

    let scope = Record::ScopeData(ScopeData {
        id: 4,
        time: 0.0,
        values: ScopeValues::U64(Vec::new()),
        ranges: Vec::new(),
    });
    assert_eq!(decode(&encode(&scope)).unwrap(), scope);
}

#[test]
fn test_multibyte_callsign_truncates_on_char_boundary() {
    let long = "\u{00e9}".repeat(40); // 80 bytes of two-byte chars
    let header = PlatformHeader::new(1, long.clone());
    let decoded = match decode(&encode(&Record::PlatformHeader(header))).unwrap() {
        Record::PlatformHeader(h) => h,
        other => panic!("unexpected record {other:?}"),
    };
    assert_eq!(decoded.callsign, "\u{00e9}".repeat(32));
    assert!(long.starts_with(&decoded.callsign));
}
