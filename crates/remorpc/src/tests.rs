use crate::*;
use remopack::Value;
use remopack::ValueMap;

// ============================================================================
//  HELPERS
// ============================================================================

fn call_request(id: u32) -> Message {
    Message::request(id, MessageType::IpcCall)
        .with(keys::OBJECT, "Application.TestService")
        .with(keys::METHOD, "integer")
        .with(keys::ARGUMENTS, Value::List(vec![Value::Int(10)]))
}

fn frame_len(frame: &[u8]) -> usize {
    let mut prefix = [0u8; LEN_PREFIX];
    prefix.copy_from_slice(&frame[..LEN_PREFIX]);
    u32::from_le_bytes(prefix) as usize
}

// ============================================================================
//  MESSAGE CODEC
// ============================================================================

#[test]
fn test_request_roundtrip() -> Result<()> {
    let msg = call_request(7);
    let decoded = decode_message(&encode_message(&msg)?)?;
    assert_eq!(decoded, msg);
    assert!(!decoded.is_response);
    Ok(())
}

#[test]
fn test_response_roundtrip_keeps_degenerate_outcome() -> Result<()> {
    let request = call_request(9);
    let outcome = Outcome::new(true, "W_NOTE", "successful, with a note", Value::Int(10));
    let response = Message::response_to(&request, outcome.clone())
        .with(keys::PROPERTY_NAME, "integer");

    let decoded = decode_message(&encode_message(&response)?)?;
    assert_eq!(decoded.id, 9);
    assert_eq!(decoded.message_type, MessageType::IpcCall);
    assert!(decoded.is_response);
    assert_eq!(decoded.result, outcome);
    assert_eq!(decoded.get_str(keys::PROPERTY_NAME), "integer");
    Ok(())
}

#[test]
fn test_every_type_tag_roundtrips() -> Result<()> {
    for ty in MessageType::ALL {
        let msg = Message::request(1, ty);
        assert_eq!(decode_message(&encode_message(&msg)?)?.message_type, ty);
        assert_eq!(MessageType::from_tag(&ty.tag()), Some(ty));
    }
    Ok(())
}

#[test]
fn test_type_tags_are_distinct() {
    for a in MessageType::ALL {
        for b in MessageType::ALL {
            if a != b {
                assert_ne!(a.tag(), b.tag(), "{} and {} share a tag", a, b);
            }
        }
    }
}

#[test]
fn test_unknown_type_tag_is_rejected() -> Result<()> {
    let mut payload = encode_message(&call_request(3))?;
    // id is [tag][u32]; the type blob follows as [tag][len][16 bytes].
    let tag_start = 1 + 4 + 1 + 4;
    payload[tag_start] ^= 0xFF;
    assert!(matches!(decode_message(&payload), Err(Error::UnknownMessageType(_))));
    Ok(())
}

#[test]
fn test_trailing_bytes_are_rejected() -> Result<()> {
    let mut payload = encode_message(&call_request(3))?;
    payload.push(0);
    assert_eq!(decode_message(&payload), Err(Error::TrailingBytes(1)));
    Ok(())
}

#[test]
fn test_failure_outcome_has_empty_data() {
    let outcome = Outcome::new(false, "E_BAD_FUNC", "Something went wrong here.", "Result is bad!".into());
    let normalized = outcome.normalized();
    assert_eq!(normalized.code, "E_BAD_FUNC");
    assert_eq!(normalized.message, "Something went wrong here.");
    assert_eq!(normalized.data, Value::Invalid);
    assert_eq!(Outcome::failure("x").data, Value::Invalid);
}

// ============================================================================
//  FRAMING
// ============================================================================

#[test]
fn test_frame_prefix_matches_payload() -> Result<()> {
    let frame = encode_frame(&call_request(1))?;
    assert_eq!(frame_len(&frame), frame.len() - LEN_PREFIX);
    Ok(())
}

#[test]
fn test_buffer_waits_for_whole_frame() -> Result<()> {
    let msg = call_request(11);
    let frame = encode_frame(&msg)?;
    let mut buffer = FrameBuffer::new(1 << 20);

    // Prefix split across reads, then the body one byte at a time.
    buffer.extend(&frame[..2]);
    assert_eq!(buffer.next_frame()?, None);
    for byte in &frame[2..frame.len() - 1] {
        buffer.extend(std::slice::from_ref(byte));
        assert_eq!(buffer.next_frame()?, None);
    }
    buffer.extend(&frame[frame.len() - 1..]);

    let payload = buffer.next_frame()?.expect("frame should be complete");
    assert_eq!(decode_message(&payload)?, msg);
    assert_eq!(buffer.buffered(), 0);
    Ok(())
}

#[test]
fn test_buffer_drains_back_to_back_frames() -> Result<()> {
    let mut bytes = Vec::new();
    for id in 1..=3 {
        bytes.extend(encode_frame(&call_request(id))?);
    }
    let mut buffer = FrameBuffer::new(1 << 20);
    buffer.extend(&bytes);

    let mut ids = Vec::new();
    while let Some(payload) = buffer.next_frame()? {
        ids.push(decode_message(&payload)?.id);
    }
    assert_eq!(ids, vec![1, 2, 3]);
    Ok(())
}

#[test]
fn test_buffer_rejects_oversized_frame() {
    let mut buffer = FrameBuffer::new(16);
    buffer.extend(&1024u32.to_le_bytes());
    assert_eq!(buffer.next_frame(), Err(Error::FrameTooLarge { len: 1024, max: 16 }));
}

#[test]
fn test_large_payload_roundtrip() -> Result<()> {
    let mut map = ValueMap::new();
    map.insert("blob".into(), Value::Bytes(vec![b'A'; 1 << 20]));
    let msg = Message::request(5, MessageType::SetPropertyValue)
        .with(keys::PROPERTY_NAME, "byteArray")
        .with(keys::PROPERTY_VALUE, Value::Map(map));

    let frame = encode_frame(&msg)?;
    let mut buffer = FrameBuffer::new(4 << 20);
    for chunk in frame.chunks(4096) {
        buffer.extend(chunk);
    }
    let payload = buffer.next_frame()?.expect("frame should be complete");
    assert_eq!(decode_message(&payload)?, msg);
    Ok(())
}
