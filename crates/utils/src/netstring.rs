//! Netstring framing (`N:<payload>,`), used by the socketmap protocol.
//! Deliberately minimal — the spec calls this codec "trivial" and treats it
//! as ambient plumbing, not a component with its own invariants.

#[derive(Debug, PartialEq, Eq)]
pub enum DecodeError {
    Incomplete,
    MissingColon,
    MissingComma,
    BadLength,
}

/// Attempts to decode one netstring from the front of `buf`. Returns the
/// payload and the number of bytes consumed, or `Incomplete` if more data
/// is needed.
pub fn decode(buf: &[u8]) -> Result<(&[u8], usize), DecodeError> {
    let colon = buf.iter().position(|&b| b == b':').ok_or({
        if buf.len() > 20 {
            DecodeError::MissingColon
        } else {
            DecodeError::Incomplete
        }
    })?;
    let len: usize = std::str::from_utf8(&buf[..colon])
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or(DecodeError::BadLength)?;
    let payload_start = colon + 1;
    let payload_end = payload_start + len;
    if buf.len() < payload_end + 1 {
        return Err(DecodeError::Incomplete);
    }
    if buf[payload_end] != b',' {
        return Err(DecodeError::MissingComma);
    }
    Ok((&buf[payload_start..payload_end], payload_end + 1))
}

pub fn encode(payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(payload.len() + 12);
    out.extend_from_slice(payload.len().to_string().as_bytes());
    out.push(b':');
    out.extend_from_slice(payload);
    out.push(b',');
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips() {
        let encoded = encode(b"lmtp cleo@example.com");
        assert_eq!(encoded, b"22:lmtp cleo@example.com,");
        let (payload, consumed) = decode(&encoded).unwrap();
        assert_eq!(payload, b"lmtp cleo@example.com");
        assert_eq!(consumed, encoded.len());
    }

    #[test]
    fn incomplete_awaits_more_bytes() {
        let encoded = encode(b"hello world");
        assert_eq!(decode(&encoded[..5]), Err(DecodeError::Incomplete));
    }

    #[test]
    fn rejects_missing_comma() {
        let mut encoded = encode(b"hello");
        *encoded.last_mut().unwrap() = b'.';
        assert_eq!(decode(&encoded), Err(DecodeError::MissingComma));
    }
}
