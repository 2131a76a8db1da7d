use std::fs;
use std::path::{Path, PathBuf};

use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use tempfile::TempDir;
use unpickle::{convert, convert_with, ConversionError, ConvertError, ConvertOptions, NonFinite};
use unpickle_pack::constants::{op, MAX_DEPTH};
use unpickle_pack::{to_vec, ArrayData, Dtype, NdArray, PickleError, PickleValue};

// pickle.dumps(..., protocol=4) from CPython with NumPy 2.
const SCENARIO_A: &[u8] = b"\x80\x04\x95$\x00\x00\x00\x00\x00\x00\x00}\x94(\x8c\x05scale\x94G?\xf8\x00\x00\x00\x00\x00\x00\x8c\x04name\x94\x8c\x04run1\x94u.";
const SCENARIO_B: &[u8] = b"\x80\x04\x95\xc7\x00\x00\x00\x00\x00\x00\x00}\x94\x8c\x06frame0\x94\x8c\x16numpy._core.multiarray\x94\x8c\x0c_reconstruct\x94\x93\x94\x8c\x05numpy\x94\x8c\x07ndarray\x94\x93\x94K\x00\x85\x94C\x01b\x94\x87\x94R\x94(K\x01K\x02K\x03\x86\x94h\x05\x8c\x05dtype\x94\x93\x94\x8c\x02i8\x94\x89\x88\x87\x94R\x94(K\x03\x8c\x01<\x94NNNJ\xff\xff\xff\xffJ\xff\xff\xff\xffK\x00t\x94b\x89C0\x01\x00\x00\x00\x00\x00\x00\x00\x02\x00\x00\x00\x00\x00\x00\x00\x03\x00\x00\x00\x00\x00\x00\x00\x04\x00\x00\x00\x00\x00\x00\x00\x05\x00\x00\x00\x00\x00\x00\x00\x06\x00\x00\x00\x00\x00\x00\x00\x94t\x94bs.";
const SCENARIO_C: &[u8] = b"\x80\x04\x95A\x00\x00\x00\x00\x00\x00\x00}\x94\x8c\x05bones\x94]\x94}\x94(\x8c\x04name\x94\x8c\x03hip\x94\x8c\x03rig\x94\x8c\x08__main__\x94\x8c\x08Skeleton\x94\x93\x94)\x81\x94uas.";

struct Workspace {
    dir: TempDir,
}

impl Workspace {
    fn new() -> Self {
        Self {
            dir: tempfile::tempdir().unwrap(),
        }
    }

    fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    fn input(&self, name: &str, bytes: &[u8]) -> PathBuf {
        let path = self.path(name);
        fs::write(&path, bytes).unwrap();
        path
    }

    fn entries(&self) -> usize {
        fs::read_dir(self.dir.path()).unwrap().count()
    }
}

fn read_text(path: &Path) -> String {
    fs::read_to_string(path).unwrap()
}

fn read_json(path: &Path) -> Value {
    serde_json::from_str(&read_text(path)).unwrap()
}

#[test]
fn scenario_mapping_of_scalars() {
    let ws = Workspace::new();
    let input = ws.input("a.pkl", SCENARIO_A);
    let output = ws.path("a.json");
    convert(&input, &output).unwrap();
    assert_eq!(
        read_text(&output),
        "{\n    \"scale\": 1.5,\n    \"name\": \"run1\"\n}"
    );
}

#[test]
fn scenario_numeric_array() {
    let ws = Workspace::new();
    let input = ws.input("b.pkl", SCENARIO_B);
    let output = ws.path("b.json");
    convert(&input, &output).unwrap();
    assert_eq!(read_json(&output), json!({"frame0": [[1, 2, 3], [4, 5, 6]]}));
    assert_eq!(
        read_text(&output),
        "{\n    \"frame0\": [\n        [\n            1,\n            2,\n            3\n        ],\n        [\n            4,\n            5,\n            6\n        ]\n    ]\n}"
    );
}

#[test]
fn scenario_custom_object_fails_without_output() {
    let ws = Workspace::new();
    let input = ws.input("c.pkl", SCENARIO_C);
    let output = ws.path("c.json");
    let err = convert(&input, &output).unwrap_err();
    assert_eq!(err.exit_code(), 5);
    match &err {
        ConvertError::Convert(ConversionError::Unsupported { type_name, path }) => {
            assert_eq!(type_name, "Skeleton");
            assert_eq!(path, "/bones/0/rig");
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(err.to_string().contains("Skeleton"));
    assert!(!output.exists());
    assert_eq!(ws.entries(), 1);
}

#[test]
fn failed_conversion_leaves_existing_output_unchanged() {
    let ws = Workspace::new();
    let input = ws.input("c.pkl", SCENARIO_C);
    let output = ws.input("c.json", b"{\"previous\": true}");
    assert!(convert(&input, &output).is_err());
    assert_eq!(read_text(&output), "{\"previous\": true}");
    assert_eq!(ws.entries(), 2);
}

#[test]
fn conversion_is_idempotent() {
    let ws = Workspace::new();
    let input = ws.input("b.pkl", SCENARIO_B);
    let first = ws.path("first.json");
    let second = ws.path("second.json");
    convert(&input, &first).unwrap();
    convert(&input, &second).unwrap();
    assert_eq!(fs::read(&first).unwrap(), fs::read(&second).unwrap());

    // Converting onto an existing output replaces it with the same bytes.
    convert(&input, &first).unwrap();
    assert_eq!(fs::read(&first).unwrap(), fs::read(&second).unwrap());
}

#[test]
fn plain_trees_survive_a_json_round_trip() {
    let tree = PickleValue::dict([
        ("name", PickleValue::str("barbarian \u{2694}")),
        ("count", PickleValue::Int(-12)),
        ("ratio", PickleValue::Float(0.1)),
        ("flags", PickleValue::List(vec![PickleValue::Bool(true), PickleValue::None])),
        (
            "pair",
            PickleValue::Tuple(vec![PickleValue::Int(1), PickleValue::str("b")]),
        ),
        ("nested", PickleValue::dict([("empty", PickleValue::List(vec![]))])),
    ]);
    let ws = Workspace::new();
    let input = ws.input("tree.pkl", &to_vec(&tree));
    let output = ws.path("tree.json");
    convert(&input, &output).unwrap();
    assert_eq!(
        read_json(&output),
        json!({
            "name": "barbarian \u{2694}",
            "count": -12,
            "ratio": 0.1,
            "flags": [true, null],
            "pair": [1, "b"],
            "nested": {"empty": []}
        })
    );
    // Keys keep insertion order.
    let text = read_text(&output);
    let positions: Vec<usize> = ["\"name\"", "\"count\"", "\"ratio\"", "\"flags\"", "\"pair\""]
        .iter()
        .map(|key| text.find(key).unwrap())
        .collect();
    assert!(positions.windows(2).all(|w| w[0] < w[1]));
}

#[test]
fn array_shapes_are_preserved() {
    let data: Vec<f64> = (0..24).map(f64::from).collect();
    let value = PickleValue::Array(
        NdArray::new(
            Dtype::parse("<f4").unwrap(),
            vec![2, 3, 4],
            ArrayData::Float(data),
        )
        .unwrap(),
    );
    let ws = Workspace::new();
    let input = ws.input("cube.pkl", &to_vec(&value));
    let output = ws.path("cube.json");
    convert(&input, &output).unwrap();

    let json = read_json(&output);
    let outer = json.as_array().unwrap();
    assert_eq!(outer.len(), 2);
    for plane in outer {
        let rows = plane.as_array().unwrap();
        assert_eq!(rows.len(), 3);
        assert!(rows.iter().all(|row| row.as_array().unwrap().len() == 4));
    }
    assert_eq!(json[1][2][3], json!(23.0));
}

#[test]
fn options_change_indent_and_non_finite_handling() {
    let value = PickleValue::dict([("x", PickleValue::Float(f64::NAN))]);
    let ws = Workspace::new();
    let input = ws.input("nan.pkl", &to_vec(&value));
    let output = ws.path("nan.json");

    let err = convert(&input, &output).unwrap_err();
    assert!(matches!(
        err,
        ConvertError::Convert(ConversionError::NonFiniteFloat { .. })
    ));

    let options = ConvertOptions::default()
        .with_indent(2)
        .with_non_finite(NonFinite::Null)
        .with_atomic(false);
    convert_with(&input, &output, &options).unwrap();
    assert_eq!(read_text(&output), "{\n  \"x\": null\n}");
}

#[test]
fn error_kinds_map_to_distinct_exit_codes() {
    let ws = Workspace::new();
    let output = ws.path("out.json");

    let missing = convert(ws.path("missing.pkl"), &output).unwrap_err();
    assert!(matches!(missing, ConvertError::Read { .. }));
    assert_eq!(missing.exit_code(), 3);

    let garbage = ws.input("garbage.pkl", b"not a pickle");
    let invalid = convert(&garbage, &output).unwrap_err();
    assert!(matches!(invalid, ConvertError::Decode { .. }));
    assert_eq!(invalid.exit_code(), 4);

    let good = ws.input("a.pkl", SCENARIO_A);
    let unwritable = convert(&good, ws.path("no-such-dir/out.json")).unwrap_err();
    assert!(matches!(unwritable, ConvertError::Write { .. }));
    assert_eq!(unwritable.exit_code(), 6);

    assert!(!output.exists());
}

#[test]
fn unsupported_builtin_types_are_named() {
    let cases = [
        (PickleValue::Bytes(b"raw".to_vec()), "bytes"),
        (PickleValue::Set(vec![PickleValue::Int(1)]), "set"),
        (PickleValue::ByteArray(vec![]), "bytearray"),
    ];
    let ws = Workspace::new();
    let output = ws.path("out.json");
    for (value, name) in cases {
        let input = ws.input("in.pkl", &to_vec(&PickleValue::List(vec![value])));
        match convert(&input, &output).unwrap_err() {
            ConvertError::Convert(ConversionError::Unsupported { type_name, path }) => {
                assert_eq!(type_name, name);
                assert_eq!(path, "/0");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}

fn nested_lists(levels: usize) -> Vec<u8> {
    let mut data = b"\x80\x02".to_vec();
    data.extend(std::iter::repeat(op::EMPTY_LIST).take(levels));
    data.extend(std::iter::repeat(op::APPEND).take(levels - 1));
    data.push(op::STOP);
    data
}

#[test]
fn nesting_limit_is_enforced_before_conversion() {
    let ws = Workspace::new();
    let output = ws.path("deep.json");

    let at_limit = ws.input("limit.pkl", &nested_lists(MAX_DEPTH));
    convert(&at_limit, &output).unwrap();
    let text = read_text(&output);
    assert_eq!(text.matches('[').count(), MAX_DEPTH);
    assert!(text.starts_with("[\n    [\n        ["));

    fs::remove_file(&output).unwrap();
    let past_limit = ws.input("past.pkl", &nested_lists(MAX_DEPTH + 1));
    let err = convert(&past_limit, &output).unwrap_err();
    assert!(matches!(
        &err,
        ConvertError::Decode {
            source: PickleError::NestingTooDeep(MAX_DEPTH),
            ..
        }
    ));
    assert_eq!(err.exit_code(), 4);
    assert!(!output.exists());
}

#[test]
fn wide_integers_and_unicode_arrays_convert() {
    let ws = Workspace::new();
    let joints = NdArray::new(
        Dtype::parse("<U5").unwrap(),
        vec![2],
        ArrayData::Str(vec!["hip".to_string(), "spine".to_string()]),
    )
    .unwrap();
    let value = PickleValue::dict([
        ("frames", PickleValue::BigInt(1 << 70)),
        ("joints_names", PickleValue::Array(joints)),
    ]);
    let input = ws.input("wide.pkl", &to_vec(&value));
    let output = ws.path("wide.json");
    convert(&input, &output).unwrap();
    assert_eq!(
        read_text(&output),
        "{\n    \"frames\": 1180591620717411303424,\n    \"joints_names\": [\n        \"hip\",\n        \"spine\"\n    ]\n}"
    );
}
