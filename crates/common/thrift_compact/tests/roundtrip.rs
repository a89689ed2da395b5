use proptest::prelude::*;
use thrift_compact::Fields;
use thrift_compact::FieldSpec;
use thrift_compact::Kind;
use thrift_compact::StructSpec;
use thrift_compact::ThriftError;
use thrift_compact::ThriftStruct;
use thrift_compact::ThriftWriter;

#[derive(Debug, Clone, PartialEq, Default)]
struct Peer {
    id: Option<i64>,
    name: Option<String>,
    active: bool,
}

static PEER_SPEC: StructSpec = StructSpec {
    name: "Peer",
    fields: &[
        FieldSpec { id: 1, name: "id", kind: &Kind::I64 },
        FieldSpec { id: 2, name: "name", kind: &Kind::Utf8 },
        FieldSpec { id: 3, name: "active", kind: &Kind::Bool },
    ],
};

impl ThriftStruct for Peer {
    fn spec() -> &'static StructSpec {
        &PEER_SPEC
    }

    fn from_fields(fields: &mut Fields) -> Result<Self, ThriftError> {
        Ok(Peer {
            id: fields.take_i64(1),
            name: fields.take_str(2),
            active: fields.take_bool(3).unwrap_or(false),
        })
    }

    fn write_fields(&self, writer: &mut ThriftWriter) {
        if let Some(id) = self.id {
            writer.field_i64(1, id);
        }
        if let Some(name) = &self.name {
            writer.field_string(2, name);
        }
        writer.field_bool(3, self.active);
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
struct Envelope {
    serial: Option<i32>,
    peers: Option<Vec<Peer>>,
    samples: Option<Vec<f32>>,
    tags: Option<Vec<(String, String)>>,
    blob: Option<Vec<u8>>,
}

static ENVELOPE_SPEC: StructSpec = StructSpec {
    name: "Envelope",
    fields: &[
        FieldSpec { id: 1, name: "serial", kind: &Kind::I32 },
        FieldSpec { id: 2, name: "peers", kind: &Kind::List(&Kind::Struct(Peer::spec)) },
        FieldSpec { id: 4, name: "samples", kind: &Kind::List(&Kind::Float) },
        FieldSpec { id: 5, name: "tags", kind: &Kind::Map(&Kind::Utf8, &Kind::Utf8) },
        FieldSpec { id: 9, name: "blob", kind: &Kind::Bytes },
    ],
};

impl ThriftStruct for Envelope {
    fn spec() -> &'static StructSpec {
        &ENVELOPE_SPEC
    }

    fn from_fields(fields: &mut Fields) -> Result<Self, ThriftError> {
        Ok(Envelope {
            serial: fields.take_i32(1),
            peers: fields.take_struct_list(2)?,
            samples: fields.take_f32_list(4),
            tags: fields.take_str_map(5),
            blob: fields.take_bytes(9),
        })
    }

    fn write_fields(&self, writer: &mut ThriftWriter) {
        if let Some(serial) = self.serial {
            writer.field_i32(1, serial);
        }
        if let Some(peers) = &self.peers {
            writer.field_struct_list(2, peers);
        }
        if let Some(samples) = &self.samples {
            writer.field_f32_list(4, samples);
        }
        if let Some(tags) = &self.tags {
            writer.field_str_map(5, tags);
        }
        if let Some(blob) = &self.blob {
            writer.field_bytes(9, blob);
        }
    }
}

fn peer_strategy() -> impl Strategy<Value = Peer> {
    (
        proptest::option::of(any::<i64>()),
        proptest::option::of("[a-z]{0,12}"),
        any::<bool>(),
    )
        .prop_map(|(id, name, active)| Peer { id, name, active })
}

fn envelope_strategy() -> impl Strategy<Value = Envelope> {
    (
        proptest::option::of(any::<i32>()),
        proptest::option::of(proptest::collection::vec(peer_strategy(), 0..4)),
        proptest::option::of(proptest::collection::vec(any::<f32>(), 0..20)),
        proptest::option::of(proptest::collection::vec(("[a-z]{1,6}", "[a-z]{0,6}"), 0..4)),
        proptest::option::of(proptest::collection::vec(any::<u8>(), 0..64)),
    )
        .prop_map(|(serial, peers, samples, tags, blob)| Envelope {
            serial,
            peers,
            samples,
            tags,
            blob,
        })
}

proptest! {
    #[test]
    fn envelope_roundtrip(envelope in envelope_strategy()) {
        // NaN never round-trips by equality, keep the samples finite.
        prop_assume!(envelope
            .samples
            .as_ref()
            .map(|samples| samples.iter().all(|sample| !sample.is_nan()))
            .unwrap_or(true));
        let encoded = envelope.to_thrift();
        let decoded = Envelope::from_thrift(&encoded).unwrap();
        prop_assert_eq!(envelope, decoded);
    }
}

#[test]
fn unknown_fields_are_skipped_by_type() {
    let envelope = Envelope {
        serial: Some(7),
        peers: Some(vec![Peer { id: Some(1), name: Some("n".into()), active: true }]),
        ..Envelope::default()
    };
    let plain = envelope.to_thrift();

    // The same envelope with unknown fields spliced in: a nested struct at
    // id 3 and a deep list at id 20. Skipping must recurse through both.
    let mut writer = ThriftWriter::new();
    writer.field_i32(1, 7);
    writer.field_struct_list(2, envelope.peers.as_ref().unwrap());
    writer.begin_struct(3);
    writer.field_string(1, "ignored");
    writer.begin_struct(2);
    writer.field_i64(1, 99);
    writer.write_stop();
    writer.write_stop();
    writer.field_i64_list(20, &[1, 2, 3]);
    writer.write_stop();
    let spliced = writer.into_bytes();

    assert_eq!(
        Envelope::from_thrift(&plain).unwrap(),
        Envelope::from_thrift(&spliced).unwrap(),
    );
}

#[test]
fn type_mismatch_reports_dotted_path() {
    // A Peer whose id field carries a string instead of an i64.
    let mut writer = ThriftWriter::new();
    writer.field_string(1, "not an int");
    writer.write_stop();
    let err = Peer::from_thrift(&writer.into_bytes()).unwrap_err();
    match err {
        ThriftError::TypeMismatch { path, .. } => assert_eq!(path, "root.id"),
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn nested_struct_restores_field_delta_baseline() {
    // Outer fields 1 and 2 with a struct in between: the field after the
    // nested struct must still resolve against the outer baseline.
    let envelope = Envelope {
        serial: Some(1),
        peers: Some(vec![Peer { id: Some(5), name: None, active: false }]),
        samples: Some(vec![0.5]),
        ..Envelope::default()
    };
    let decoded = Envelope::from_thrift(&envelope.to_thrift()).unwrap();
    assert_eq!(decoded.samples, Some(vec![0.5]));
}
