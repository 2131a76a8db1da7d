use unpickle_pack::{
    from_slice, to_vec, ArrayData, Dtype, NdArray, NdScalar, PickleDecoder, PickleEncoder,
    PickleValue, ScalarValue,
};

fn array(descr: &str, shape: &[usize], data: ArrayData) -> PickleValue {
    PickleValue::Array(NdArray::new(Dtype::parse(descr).unwrap(), shape.to_vec(), data).unwrap())
}

fn roundtrip(value: &PickleValue) -> PickleValue {
    let bytes = to_vec(value);
    from_slice(&bytes).unwrap_or_else(|err| panic!("{value:?} failed to decode: {err}"))
}

#[test]
fn builtin_values_roundtrip() {
    let cases = vec![
        PickleValue::None,
        PickleValue::Bool(true),
        PickleValue::Bool(false),
        PickleValue::Int(0),
        PickleValue::Int(255),
        PickleValue::Int(65_536),
        PickleValue::Int(-1),
        PickleValue::Int(i64::MAX),
        PickleValue::Int(i64::MIN),
        PickleValue::BigInt(1 << 100),
        PickleValue::BigInt(-(1 << 90)),
        PickleValue::Float(-0.125),
        PickleValue::str(""),
        PickleValue::str("caf\u{e9} \u{2705}"),
        PickleValue::Bytes(vec![]),
        PickleValue::Bytes(vec![7; 300]),
        PickleValue::ByteArray(b"abc".to_vec()),
        PickleValue::List(vec![]),
        PickleValue::List(vec![PickleValue::Int(1)]),
        PickleValue::Tuple(vec![]),
        PickleValue::Tuple(vec![PickleValue::None; 5]),
        PickleValue::Set(vec![PickleValue::Int(1), PickleValue::Int(2)]),
        PickleValue::FrozenSet(vec![]),
        PickleValue::Global {
            module: "builtins".into(),
            name: "range".into(),
        },
        PickleValue::Object {
            module: "__main__".into(),
            name: "Skeleton".into(),
        },
    ];
    for value in &cases {
        assert_eq!(&roundtrip(value), value);
    }
}

#[test]
fn dict_keys_of_any_type_roundtrip() {
    let value = PickleValue::Dict(vec![
        (PickleValue::str("a"), PickleValue::Int(1)),
        (PickleValue::Int(2), PickleValue::List(vec![])),
        (
            PickleValue::Tuple(vec![PickleValue::Int(1), PickleValue::Int(2)]),
            PickleValue::None,
        ),
    ]);
    assert_eq!(roundtrip(&value), value);
}

#[test]
fn numpy_arrays_roundtrip() {
    let cases = vec![
        array("<f8", &[2, 2], ArrayData::Float(vec![1.0, 2.0, 3.0, 4.0])),
        array(">f4", &[2], ArrayData::Float(vec![1.5, -2.25])),
        array("<i8", &[3], ArrayData::Int(vec![i64::MIN, 0, i64::MAX])),
        array(">i2", &[1, 2], ArrayData::Int(vec![-300, 300])),
        array("|u1", &[4], ArrayData::UInt(vec![0, 1, 128, 255])),
        array("<u8", &[1], ArrayData::UInt(vec![u64::MAX])),
        array("|b1", &[2], ArrayData::Bool(vec![true, false])),
        array("<f8", &[], ArrayData::Float(vec![42.0])),
        array("<f8", &[0, 3], ArrayData::Float(vec![])),
        array(
            "|O",
            &[2],
            ArrayData::Object(vec![PickleValue::str("x"), PickleValue::Int(1)]),
        ),
    ];
    for value in &cases {
        assert_eq!(&roundtrip(value), value);
    }
}

#[test]
fn unicode_arrays_roundtrip() {
    for descr in ["<U5", ">U3"] {
        let names = array(
            descr,
            &[2],
            ArrayData::Str(vec!["hip".to_string(), "né".to_string()]),
        );
        assert_eq!(roundtrip(&names), names);
    }

    let cut = array("<U2", &[1], ArrayData::Str(vec!["spine".to_string()]));
    assert_eq!(
        roundtrip(&cut),
        array("<U2", &[1], ArrayData::Str(vec!["sp".to_string()]))
    );
}

#[test]
fn half_precision_is_widened() {
    let half = array("<f2", &[2], ArrayData::Float(vec![1.0, 0.5]));
    assert_eq!(
        roundtrip(&half),
        array("<f8", &[2], ArrayData::Float(vec![1.0, 0.5]))
    );
}

#[test]
fn numpy_scalars_roundtrip() {
    let cases = [
        ("<f8", ScalarValue::Float(2.5)),
        ("<i4", ScalarValue::Int(-9)),
        ("|u1", ScalarValue::UInt(200)),
        ("|b1", ScalarValue::Bool(true)),
        ("<U4", ScalarValue::Str("arm".to_string())),
    ];
    for (descr, value) in cases {
        let scalar = PickleValue::Scalar(NdScalar {
            dtype: Dtype::parse(descr).unwrap(),
            value,
        });
        assert_eq!(roundtrip(&scalar), scalar);
    }
}

#[test]
fn encoder_is_reusable() {
    let mut encoder = PickleEncoder::new();
    let first = encoder.encode(&PickleValue::Int(1));
    let second = encoder.encode(&PickleValue::Int(1));
    assert_eq!(first, second);
    assert_eq!(first, b"\x80\x03K\x01.");

    let mut decoder = PickleDecoder::new();
    decoder.decode(&first).unwrap();
    assert_eq!(decoder.protocol(), 3);
    assert_eq!(decoder.opcode_count(), 3);
}
