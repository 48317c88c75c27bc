use crate::*;

// ============================================================================
//  ENCODER / DECODER
// ============================================================================

#[test]
fn test_scalars_roundtrip() -> Result<()> {
    let mut enc = Encoder::new();
    enc.bool(true)?;
    enc.s32(-42)?;
    enc.u32(7)?;
    enc.u16(55001)?;
    enc.f64(123.45)?;
    enc.invalid()?;

    let bytes = enc.into_bytes()?;
    let mut dec = Decoder::new(&bytes);

    assert!(dec.bool()?);
    assert_eq!(dec.s32()?, -42);
    assert_eq!(dec.u32()?, 7);
    assert_eq!(dec.u16()?, 55001);
    assert_eq!(dec.f64()?, 123.45);
    dec.invalid()?;
    assert_eq!(dec.remaining(), 0);
    Ok(())
}

#[test]
fn test_integers_are_little_endian() -> Result<()> {
    let mut enc = Encoder::new();
    enc.u32(0x0102_0304)?;
    let bytes = enc.into_bytes()?;
    assert_eq!(bytes, vec![Tag::U32 as u8, 0x04, 0x03, 0x02, 0x01]);
    Ok(())
}

#[test]
fn test_blob_layout() -> Result<()> {
    let mut enc = Encoder::new();
    enc.str("hi")?;
    let bytes = enc.into_bytes()?;
    assert_eq!(bytes, vec![Tag::String as u8, 2, 0, 0, 0, b'h', b'i']);
    Ok(())
}

#[test]
fn test_map_rejects_bare_values() {
    let mut enc = Encoder::new();
    enc.map_begin().expect("map begin");
    let err = enc.s32(1).expect_err("bare value in map must fail");
    assert_eq!(err, Error::InvalidMapEntry);
}

#[test]
fn test_string_list_rejects_non_strings() {
    let mut enc = Encoder::new();
    enc.string_list_begin().expect("begin");
    enc.str("A").expect("string is fine");
    let err = enc.bool(true).expect_err("bool in string list must fail");
    assert_eq!(err, Error::InvalidStringListItem);
}

#[test]
fn test_entry_requires_exactly_one_value() {
    let mut enc = Encoder::new();
    enc.map_begin().expect("map begin");
    enc.entry_begin("k").expect("entry begin");
    assert_eq!(enc.entry_end(), Err(Error::EmptyEntry));

    enc.s32(1).expect("first value");
    assert_eq!(enc.s32(2), Err(Error::TooManyItems(Scope::Entry)));
}

#[test]
fn test_open_scope_blocks_finalize() {
    let mut enc = Encoder::new();
    enc.list_begin().expect("list begin");
    assert!(matches!(enc.into_bytes(), Err(Error::ScopeStillOpen)));
}

#[test]
fn test_scope_mismatch_and_underflow() {
    let mut enc = Encoder::new();
    assert_eq!(enc.list_end(), Err(Error::ScopeUnderflow));
    enc.list_begin().expect("list begin");
    assert_eq!(
        enc.map_end(),
        Err(Error::ScopeMismatch { expected: Scope::Map, actual: Scope::List })
    );
}

#[test]
fn test_truncated_input_is_unexpected_end() -> Result<()> {
    let mut enc = Encoder::new();
    enc.str("Hello World")?;
    let bytes = enc.into_bytes()?;

    let mut dec = Decoder::new(&bytes[..bytes.len() - 3]);
    assert_eq!(dec.str(), Err(Error::UnexpectedEnd));
    Ok(())
}

#[test]
fn test_unknown_tag_is_rejected() {
    let bytes = [0xFFu8, 0, 0];
    let mut dec = Decoder::new(&bytes);
    assert_eq!(dec.peek_tag(), Err(Error::InvalidTag(0xFF)));
    assert_eq!(Value::from_bytes(&bytes), Err(Error::InvalidTag(0xFF)));
}

#[test]
fn test_skip_moves_past_containers() -> Result<()> {
    let mut enc = Encoder::new();
    enc.list_begin()?;
    enc.s32(1)?;
    enc.str("two")?;
    enc.list_end()?;
    enc.date(2024, 2, 29)?;
    enc.bool(false)?;
    let bytes = enc.into_bytes()?;

    let mut dec = Decoder::new(&bytes);
    dec.skip()?;
    dec.skip()?;
    assert!(!dec.bool()?);
    Ok(())
}

// ============================================================================
//  VALUES
// ============================================================================

fn months() -> ValueMap {
    let mut map = ValueMap::new();
    map.insert("January".into(), Value::Int(1));
    map.insert("February".into(), Value::Int(2));
    map.insert("March".into(), Value::Int(3));
    map
}

#[test]
fn test_nested_value_roundtrip() -> Result<()> {
    let mut inner = months();
    inner.insert("names".into(), Value::StringList(vec!["A".into(), "B".into()]));

    let value = Value::List(vec![
        Value::Int(10),
        Value::Bool(true),
        Value::Double(-0.5),
        Value::String("Hello World".into()),
        Value::Bytes(vec![b'A'; 1024]),
        Value::Map(inner),
        Value::List(vec![Value::Invalid, Value::Date { year: 2013, month: 7, day: 1 }]),
    ]);

    let bytes = value.to_bytes()?;
    assert_eq!(Value::from_bytes(&bytes)?, value);
    Ok(())
}

#[test]
fn test_map_decodes_in_key_order() -> Result<()> {
    let bytes = Value::Map(months()).to_bytes()?;
    let decoded = Value::from_bytes(&bytes)?;
    let keys: Vec<&String> = decoded.as_map().expect("map").keys().collect();
    assert_eq!(keys, vec!["February", "January", "March"]);
    Ok(())
}

#[test]
fn test_recursion_limit() {
    let mut value = Value::Int(0);
    for _ in 0..=MAX_RECURSION_DEPTH + 1 {
        value = Value::List(vec![value]);
    }
    assert_eq!(value.to_bytes(), Err(Error::RecursionLimitExceeded));
}

#[test]
fn test_hostile_nesting_is_bounded_on_decode() {
    // Hand-built nested lists deeper than the limit.
    let depth = MAX_RECURSION_DEPTH + 2;
    let mut bytes = vec![Tag::S32 as u8, 1, 0, 0, 0];
    for _ in 0..depth {
        let len = bytes.len() as u32;
        let mut outer = vec![Tag::List as u8];
        outer.extend_from_slice(&len.to_le_bytes());
        outer.extend_from_slice(&bytes);
        bytes = outer;
    }
    assert_eq!(Value::from_bytes(&bytes), Err(Error::RecursionLimitExceeded));
}

// ============================================================================
//  CONVERSIONS
// ============================================================================

#[test]
fn test_numeric_string_converts_to_double() {
    assert_eq!(Value::from("123.45").convert(Kind::Double), Some(Value::Double(123.45)));
    assert_eq!(Value::from(" 20 ").convert(Kind::Int), Some(Value::Int(20)));
    assert_eq!(Value::from("abc").convert(Kind::Double), None);
}

#[test]
fn test_map_does_not_convert_to_list() {
    assert_eq!(Value::Map(months()).convert(Kind::List), None);
    assert_eq!(Value::Map(months()).convert(Kind::Int), None);
}

#[test]
fn test_string_list_and_list_interconvert() {
    let list = Value::List(vec!["A".into(), "B".into()]);
    assert_eq!(
        list.convert(Kind::StringList),
        Some(Value::StringList(vec!["A".into(), "B".into()]))
    );
    let mixed = Value::List(vec!["A".into(), Value::Int(1)]);
    assert_eq!(mixed.convert(Kind::StringList), None);

    let strings = Value::StringList(vec!["C".into()]);
    assert_eq!(strings.convert(Kind::List), Some(Value::List(vec!["C".into()])));
}

#[test]
fn test_bool_conversion_rules() {
    assert_eq!(Value::from("false").to_bool(), Some(false));
    assert_eq!(Value::from("0").to_bool(), Some(false));
    assert_eq!(Value::from("").to_bool(), Some(false));
    assert_eq!(Value::from("yes").to_bool(), Some(true));
    assert_eq!(Value::Int(3).to_bool(), Some(true));
    assert_eq!(Value::Bytes(vec![1]).to_bool(), None);
}

#[test]
fn test_any_accepts_everything() {
    let date = Value::Date { year: 2000, month: 1, day: 1 };
    assert_eq!(date.convert(Kind::Any), Some(date.clone()));
    assert_eq!(date.convert(Kind::String), None);
}

#[test]
fn test_supported_kinds() {
    assert!(Kind::Map.is_supported());
    assert!(Kind::Any.is_supported());
    assert!(!Kind::Date.is_supported());
    assert!(!Kind::Outcome.is_supported());
    assert!(Kind::Outcome.is_supported_return());
    assert!(Kind::Void.is_supported_return());
    assert!(!Kind::Date.is_supported_return());
    assert_eq!(Kind::from_name("StringList"), Some(Kind::StringList));
    assert_eq!(Kind::from_name("QDate"), None);
}
