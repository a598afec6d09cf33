use byteorder::{BigEndian, WriteBytesExt};
use pretty_assertions::assert_eq;
use std::io::Write;

use bindef::binary::{apply_reader, get_metadata, ApplyError, Meta, Version};
use bindef::{evaluate, lex, parse, ErrorKind, Value, ValueMap};
use bindef_rt::{SeekRead, SliceReader};

fn eval_document(source: &[u8]) -> Value {
    evaluate(&parse(lex(source).unwrap()).unwrap(), None).unwrap()
}

fn ident_map(entries: &[(&str, Value)]) -> ValueMap {
    entries
        .iter()
        .map(|(key, value)| (Value::ident(*key), value.clone()))
        .collect()
}

fn lang_error(error: ApplyError) -> bindef::LangError {
    match error {
        ApplyError::Lang(error) => error,
        ApplyError::Read(error) => panic!("expected a language error, found {:?}", error),
    }
}

#[test]
fn png_magic_and_header() {
    let source = br#"{
        meta: { bdf: "0.1", name: "PNG" },
        binary: [
            { type: magic, match: "\x89PNG\r\n\x1a\n" },
            {
                id: ihdr,
                type: struct,
                endian: "big",
                at: 16,
                fields: [
                    { id: width, type: uint32 },
                    { id: height, type: uint32 },
                    { id: bit_depth, type: uint8 },
                    { id: color_type, type: uint8 },
                ],
            },
        ],
    }"#;

    let mut data = Vec::new();
    data.write_all(b"\x89PNG\r\n\x1a\n").unwrap();
    data.write_u32::<BigEndian>(13).unwrap(); // IHDR chunk length
    data.write_all(b"IHDR").unwrap();
    data.write_u32::<BigEndian>(0x10).unwrap(); // width
    data.write_u32::<BigEndian>(0x20).unwrap(); // height
    data.write_u8(8).unwrap(); // bit depth
    data.write_u8(2).unwrap(); // color type

    let document = eval_document(source);
    let mut reader = SliceReader::new(&data);
    let pairs = apply_reader(&document, &mut reader).unwrap();

    // the anonymous magic field is not recorded
    assert_eq!(pairs.len(), 1);
    assert_eq!(pairs[0].field.id, "ihdr");
    assert_eq!(
        pairs[0].value,
        Value::Map(ident_map(&[
            ("width", Value::int(16)),
            ("height", Value::int(32)),
            ("bit_depth", Value::int(8)),
            ("color_type", Value::int(2)),
        ])),
    );
}

#[test]
fn a_false_if_skips_the_field_without_error() {
    let source = br#"{
        meta: { bdf: "0.1", name: "IfSkip" },
        binary: [
            { id: ver, type: uint8 },
            { id: legacy, type: byte[4], if: ver < 2 },
        ],
    }"#;

    let data = [0x02, 0x41, 0x42, 0x43, 0x44];
    let document = eval_document(source);
    let mut reader = SliceReader::new(&data);
    let pairs = apply_reader(&document, &mut reader).unwrap();

    assert_eq!(pairs.len(), 1);
    assert_eq!(pairs[0].field.id, "ver");
    assert_eq!(pairs[0].value, Value::int(2));

    // the skipped field consumed no bytes
    assert_eq!(reader.position().unwrap(), 1);
}

#[test]
fn a_true_if_processes_the_field() {
    let source = br#"{
        meta: { bdf: "0.1", name: "IfTake" },
        binary: [
            { id: ver, type: uint8 },
            { id: legacy, type: byte[4], if: ver < 2 },
        ],
    }"#;

    let data = [0x01, 0x41, 0x42, 0x43, 0x44];
    let document = eval_document(source);
    let mut reader = SliceReader::new(&data);
    let pairs = apply_reader(&document, &mut reader).unwrap();

    assert_eq!(pairs.len(), 2);
    assert_eq!(pairs[1].field.id, "legacy");
    assert_eq!(pairs[1].value, Value::string(*b"ABCD"));
}

#[test]
fn switch_selects_a_case_body_by_value() {
    let source = br#"{
        meta: { bdf: "0.1", name: "Switch" },
        binary: [
            { id: tag, type: uint8 },
            {
                id: body,
                switch: tag,
                cases: {
                    1: { type: uint16, endian: "little" },
                    2: { type: byte[2] },
                },
            },
        ],
    }"#;

    let data = [0x02, 0x41, 0x42];
    let document = eval_document(source);
    let mut reader = SliceReader::new(&data);
    let pairs = apply_reader(&document, &mut reader).unwrap();

    assert_eq!(pairs.len(), 2);
    assert_eq!(pairs[0].value, Value::int(2));
    assert_eq!(pairs[1].field.id, "body");
    assert_eq!(pairs[1].value, Value::string(*b"AB"));
}

#[test]
fn switch_scans_cases_in_order_and_falls_back_to_default() {
    let source = br#"{
        meta: { bdf: "0.1", name: "SwitchDefault" },
        binary: [
            { id: tag, type: uint8 },
            {
                id: body,
                switch: tag,
                cases: {
                    1: { type: uint16, endian: "little" },
                    default: { type: byte[1] },
                },
            },
        ],
    }"#;

    let data = [0x09, 0x5a];
    let document = eval_document(source);
    let mut reader = SliceReader::new(&data);
    let pairs = apply_reader(&document, &mut reader).unwrap();
    assert_eq!(pairs[1].value, Value::string(*b"Z"));

    let source_without_default = br#"{
        meta: { bdf: "0.1", name: "SwitchMiss" },
        binary: [
            { id: tag, type: uint8 },
            { id: body, switch: tag, cases: { 1: { type: byte[1] } } },
        ],
    }"#;

    let data = [0x09, 0x5a];
    let document = eval_document(source_without_default);
    let mut reader = SliceReader::new(&data);
    let error = lang_error(apply_reader(&document, &mut reader).unwrap_err());
    assert_eq!(error.kind, ErrorKind::Value);
}

#[test]
fn eos_arrays_stop_when_the_while_guard_falsifies() {
    let source = br#"{
        meta: { bdf: "0.1", name: "ArrayWhile" },
        binary: [
            {
                id: items,
                type: array[eos],
                while: file.pos < 4,
                item: { type: uint8 },
            },
        ],
    }"#;

    let data = [0x0a, 0x0b, 0x0c, 0x0d, 0x0e, 0x0f];
    let document = eval_document(source);
    let mut reader = SliceReader::new(&data);
    let pairs = apply_reader(&document, &mut reader).unwrap();

    assert_eq!(
        pairs[0].value,
        Value::List(vec![
            Value::int(10),
            Value::int(11),
            Value::int(12),
            Value::int(13),
        ]),
    );

    // the guard is evaluated before each item, so the reader sits at 4
    assert_eq!(reader.position().unwrap(), 4);
}

#[test]
fn eos_arrays_without_a_guard_read_to_the_end() {
    let source = br#"{
        meta: { bdf: "0.1", name: "ArrayEos" },
        binary: [
            { id: items, type: array[eos], item: { type: uint8 } },
        ],
    }"#;

    let data = [1, 2, 3];
    let document = eval_document(source);
    let mut reader = SliceReader::new(&data);
    let pairs = apply_reader(&document, &mut reader).unwrap();

    assert_eq!(
        pairs[0].value,
        Value::List(vec![Value::int(1), Value::int(2), Value::int(3)]),
    );
}

#[test]
fn fixed_arrays_read_an_exact_count() {
    let source = br#"{
        meta: { bdf: "0.1", name: "ArrayFixed" },
        binary: [
            { id: words, type: array[2], item: { type: uint16, endian: "big" } },
            { id: rest, type: uint8 },
        ],
    }"#;

    let data = [0x12, 0x34, 0x56, 0x78, 0x05];
    let document = eval_document(source);
    let mut reader = SliceReader::new(&data);
    let pairs = apply_reader(&document, &mut reader).unwrap();

    assert_eq!(
        pairs[0].value,
        Value::List(vec![Value::int(0x1234), Value::int(0x5678)]),
    );
    assert_eq!(pairs[1].value, Value::int(5));
}

#[test]
fn enums_match_singles_and_ranges() {
    let source = br#"{
        meta: { bdf: "0.1", name: "Enum" },
        binary: [
            {
                id: kind,
                type: enum[uint8],
                members: [
                    { id: LOW, value: { from: 0, to: 16 } },
                    { id: HI, value: 255 },
                ],
            },
        ],
    }"#;

    let document = eval_document(source);

    let mut reader = SliceReader::new(&[0x0f]);
    let pairs = apply_reader(&document, &mut reader).unwrap();
    assert_eq!(pairs[0].value, Value::int(15));

    let mut reader = SliceReader::new(&[0xff]);
    let pairs = apply_reader(&document, &mut reader).unwrap();
    assert_eq!(pairs[0].value, Value::int(255));

    let mut reader = SliceReader::new(&[0x20]);
    let error = lang_error(apply_reader(&document, &mut reader).unwrap_err());
    assert_eq!(error.kind, ErrorKind::Value);
    assert!(error.message.contains("kind"), "message: {}", error.message);
}

#[test]
fn enum_members_out_of_bounds_are_rejected() {
    let source = br#"{
        meta: { bdf: "0.1", name: "EnumBounds" },
        binary: [
            {
                id: kind,
                type: enum[uint8],
                members: [{ id: BAD, value: 256 }],
            },
        ],
    }"#;

    let document = eval_document(source);
    let mut reader = SliceReader::new(&[0x00]);
    let error = lang_error(apply_reader(&document, &mut reader).unwrap_err());
    assert_eq!(error.kind, ErrorKind::Value);
}

#[test]
fn a_failed_valid_predicate_names_the_field_and_value() {
    let source = br#"{
        meta: { bdf: "0.1", name: "Valid" },
        binary: [
            {
                id: zeroes,
                type: byte[4],
                valid: zeroes == "\x00\x00\x00\x00",
            },
        ],
    }"#;

    let data = [0x00, 0x00, 0x00, 0x01];
    let document = eval_document(source);
    let mut reader = SliceReader::new(&data);
    let error = lang_error(apply_reader(&document, &mut reader).unwrap_err());

    assert_eq!(error.kind, ErrorKind::Value);
    assert!(error.message.contains("zeroes"), "message: {}", error.message);
}

#[test]
fn a_failed_magic_check_reports_its_offset_and_binds_nothing() {
    let source = br#"{
        meta: { bdf: "0.1", name: "Magic" },
        binary: [
            { type: magic, match: "\x89PNG\r\n\x1a\n" },
            { id: after, type: uint8 },
        ],
    }"#;

    let data = b"GIF89a....";
    let document = eval_document(source);
    let mut reader = SliceReader::new(data);
    let error = apply_reader(&document, &mut reader).unwrap_err();

    assert_eq!(error.magic_offset(), Some(0));
    let error = lang_error(error);
    assert_eq!(error.kind, ErrorKind::Magic { offset: 0 });
}

#[test]
fn magic_accepts_any_of_several_tags() {
    let source = br#"{
        meta: { bdf: "0.1", name: "Gif" },
        binary: [
            { id: sig, type: magic, match: ["GIF87a", "GIF89a"] },
        ],
    }"#;

    let document = eval_document(source);
    let mut reader = SliceReader::new(b"GIF89a;");
    let pairs = apply_reader(&document, &mut reader).unwrap();
    assert_eq!(pairs[0].value, Value::string(*b"GIF89a"));
}

#[test]
fn at_seeks_rebase_following_fields() {
    let source = br#"{
        meta: { bdf: "0.1", name: "At" },
        binary: [
            { id: a, type: uint8, at: 4 },
            { id: b, type: uint8 },
        ],
    }"#;

    let data = [0, 1, 2, 3, 4, 5, 6, 7];
    let document = eval_document(source);
    let mut reader = SliceReader::new(&data);
    let pairs = apply_reader(&document, &mut reader).unwrap();

    // `b` carries no `at`, so it begins from the sought position
    assert_eq!(pairs[0].value, Value::int(4));
    assert_eq!(pairs[1].value, Value::int(5));
}

#[test]
fn at_anchors_resolve_against_the_live_position() {
    let source = br#"{
        meta: { bdf: "0.1", name: "AtCurrent" },
        binary: [
            { id: a, type: uint8 },
            { id: b, type: uint8, at: [file.pos + 2, "start"] },
            { id: c, type: uint8, at: [-1, "end"] },
        ],
    }"#;

    let data = [0x10, 0x11, 0x12, 0x13, 0x14, 0x15];
    let document = eval_document(source);
    let mut reader = SliceReader::new(&data);
    let pairs = apply_reader(&document, &mut reader).unwrap();

    assert_eq!(pairs[0].value, Value::int(0x10));
    assert_eq!(pairs[1].value, Value::int(0x13));
    assert_eq!(pairs[2].value, Value::int(0x15));
}

#[test]
fn field_sizes_may_depend_on_earlier_fields() {
    let source = br#"{
        meta: { bdf: "0.1", name: "Sized" },
        binary: [
            { id: count, type: uint8 },
            { id: payload, type: byte[count] },
            { id: doubled, type: var, value: count * 2 },
        ],
    }"#;

    let data = [3, b'a', b'b', b'c'];
    let document = eval_document(source);
    let mut reader = SliceReader::new(&data);
    let pairs = apply_reader(&document, &mut reader).unwrap();

    assert_eq!(pairs[1].value, Value::string(*b"abc"));
    // the var consumed no bytes
    assert_eq!(pairs[2].value, Value::int(6));
    assert_eq!(reader.position().unwrap(), 4);
}

#[test]
fn byte_strip_trims_whitespace_and_nulls() {
    let source = br#"{
        meta: { bdf: "0.1", name: "Strip" },
        binary: [
            { id: name, type: byte[8], strip: true },
        ],
    }"#;

    let data = *b"  ab\x00\x00\t ";
    let document = eval_document(source);
    let mut reader = SliceReader::new(&data);
    let pairs = apply_reader(&document, &mut reader).unwrap();

    assert_eq!(pairs[0].value, Value::string(*b"ab"));
}

#[test]
fn named_types_are_inherited_with_local_overrides() {
    let source = br#"{
        meta: { bdf: "0.1", name: "Types" },
        types: [
            { id: u16le, type: uint16, endian: "little" },
        ],
        binary: [
            { id: x, type: u16le },
            { id: y, type: u16le },
        ],
    }"#;

    let data = [0x34, 0x12, 0x78, 0x56];
    let document = eval_document(source);
    let mut reader = SliceReader::new(&data);
    let pairs = apply_reader(&document, &mut reader).unwrap();

    assert_eq!(pairs[0].field.id, "x");
    assert_eq!(pairs[0].value, Value::int(0x1234));
    assert_eq!(pairs[1].field.id, "y");
    assert_eq!(pairs[1].value, Value::int(0x5678));
}

#[test]
fn named_types_may_carry_their_own_switch() {
    let source = br#"{
        meta: { bdf: "0.1", name: "TypesSwitch" },
        types: [
            {
                id: tagged_body,
                switch: tag,
                cases: {
                    1: { type: uint16, endian: "little" },
                    2: { type: byte[2] },
                },
            },
        ],
        binary: [
            { id: tag, type: uint8 },
            { id: body, name: "Body", type: tagged_body },
        ],
    }"#;

    let document = eval_document(source);

    // the inherited format's switch selects within the inherited body, while
    // the field's own surface attributes override the named type's
    let mut reader = SliceReader::new(&[0x02, 0x41, 0x42]);
    let pairs = apply_reader(&document, &mut reader).unwrap();
    assert_eq!(pairs[1].field.id, "body");
    assert_eq!(pairs[1].field.name, "Body");
    assert_eq!(pairs[1].value, Value::string(*b"AB"));

    let mut reader = SliceReader::new(&[0x01, 0x34, 0x12]);
    let pairs = apply_reader(&document, &mut reader).unwrap();
    assert_eq!(pairs[1].field.id, "body");
    assert_eq!(pairs[1].value, Value::int(0x1234));
}

#[test]
fn structs_scope_their_bindings_and_inherit_endianness() {
    let source = br#"{
        meta: { bdf: "0.1", name: "Scope" },
        binary: [
            {
                id: header,
                type: struct,
                endian: "big",
                fields: [
                    { id: count, type: uint16 },
                    { id: data, type: byte[count] },
                ],
            },
            { id: trailer, type: uint8 },
        ],
    }"#;

    let data = [0x00, 0x02, b'h', b'i', 0x07];
    let document = eval_document(source);
    let mut reader = SliceReader::new(&data);
    let pairs = apply_reader(&document, &mut reader).unwrap();

    assert_eq!(
        pairs[0].value,
        Value::Map(ident_map(&[
            ("count", Value::int(2)),
            ("data", Value::string(*b"hi")),
        ])),
    );
    // `count` stayed inside the struct's scope
    assert_eq!(pairs[1].value, Value::int(7));
}

#[test]
fn wide_integers_and_floats_read_with_declared_endianness() {
    let source = br#"{
        meta: { bdf: "0.1", name: "Numbers" },
        binary: [
            { id: a, type: int24, endian: "big" },
            { id: b, type: uint24, endian: "little" },
            { id: c, type: float32, endian: "big" },
            { id: d, type: int16, endian: "big" },
        ],
    }"#;

    let mut data = Vec::new();
    data.write_all(&[0xff, 0xff, 0xff]).unwrap(); // int24 -1
    data.write_all(&[0x01, 0x02, 0x03]).unwrap(); // uint24 0x030201
    data.write_all(&[0x3f, 0x80, 0x00, 0x00]).unwrap(); // float32 1.0
    data.write_i16::<BigEndian>(-2).unwrap();

    let document = eval_document(source);
    let mut reader = SliceReader::new(&data);
    let pairs = apply_reader(&document, &mut reader).unwrap();

    assert_eq!(pairs[0].value, Value::int(-1));
    assert_eq!(pairs[1].value, Value::int(0x030201));
    assert_eq!(pairs[2].value, Value::Float(1.0));
    assert_eq!(pairs[3].value, Value::int(-2));
}

#[test]
fn file_pos_tracks_the_reader_between_fields() {
    let source = br#"{
        meta: { bdf: "0.1", name: "Pos" },
        binary: [
            { id: a, type: uint16, endian: "big" },
            { id: where_now, type: var, value: file.pos },
        ],
    }"#;

    let data = [0x00, 0x01, 0x02];
    let document = eval_document(source);
    let mut reader = SliceReader::new(&data);
    let pairs = apply_reader(&document, &mut reader).unwrap();

    assert_eq!(pairs[1].value, Value::int(2));
    assert_eq!(reader.position().unwrap(), 2);
}

#[test]
fn metadata_extraction_validates_the_meta_map() {
    let source = br#"{
        meta: {
            bdf: "0.1",
            name: "Tape archive",
            mime: ["application/x-tar"],
            exts: ["tar"],
            doc: "POSIX tar",
        },
        binary: [],
    }"#;

    let meta = get_metadata(&eval_document(source)).unwrap();
    assert_eq!(
        meta,
        Meta {
            version: Version { major: 0, minor: 1 },
            name: "Tape archive".to_owned(),
            mime: vec!["application/x-tar".to_owned()],
            exts: vec!["tar".to_owned()],
            doc: "POSIX tar".to_owned(),
        },
    );

    let missing_name = eval_document(br#"{ meta: { bdf: "0.1" }, binary: [] }"#);
    let error = get_metadata(&missing_name).unwrap_err();
    assert_eq!(error.kind, ErrorKind::Value);

    let bad_version = eval_document(br#"{ meta: { bdf: "one", name: "x" }, binary: [] }"#);
    let error = get_metadata(&bad_version).unwrap_err();
    assert_eq!(error.kind, ErrorKind::Value);
}
