//! Message model (C3): a header map plus a rewindable body buffer. The body
//! is held as `Bytes` rather than a `Vec<u8>` clone-per-use — the same
//! message is classified once and then handed to every receiving list's
//! forwarder in one DATA phase, so cheap, shared re-reads matter more here
//! than in the teacher's single-recipient `SessionData::message: Vec<u8>`.

use bytes::Bytes;

/// Header names whose `Received` hops came from an authenticated submission
/// and would leak the submitter's real IP if forwarded.
const AUTHENTICATED_RECEIVED_MARKERS: &[&str] = ["ESMTPA", "ESMTPSA", "LMTPA", "LMTPSA"].as_slice();

#[derive(Debug, Clone)]
pub struct HeaderField {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, Default)]
pub struct HeaderMap {
    fields: Vec<HeaderField>,
}

impl HeaderMap {
    pub fn new() -> Self {
        HeaderMap::default()
    }

    pub fn push(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.fields.push(HeaderField {
            name: name.into(),
            value: value.into(),
        });
    }

    /// Replaces all occurrences of `name` (case-insensitive) with a single
    /// new value, inserting it if absent.
    pub fn set(&mut self, name: &str, value: impl Into<String>) {
        self.remove(name);
        self.push(name, value);
    }

    pub fn remove(&mut self, name: &str) {
        self.fields.retain(|f| !f.name.eq_ignore_ascii_case(name));
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|f| f.name.eq_ignore_ascii_case(name))
            .map(|f| f.value.as_str())
    }

    pub fn get_all<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> {
        self.fields
            .iter()
            .filter(move |f| f.name.eq_ignore_ascii_case(name))
            .map(|f| f.value.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = &HeaderField> {
        self.fields.iter()
    }

    /// Parses `RFC5322` headers from the front of `input`, stopping at the
    /// first blank line (CRLF CRLF or LF LF). Returns the header map and the
    /// byte offset where the body begins.
    pub fn parse(input: &[u8]) -> Result<(HeaderMap, usize), String> {
        let mut map = HeaderMap::new();
        let mut offset = 0usize;
        loop {
            if offset >= input.len() {
                return Err("message has no body separator".into());
            }
            // Blank line: end of headers.
            if input[offset..].starts_with(b"\r\n") {
                offset += 2;
                break;
            }
            if input[offset..].starts_with(b"\n") {
                offset += 1;
                break;
            }

            let line_end = find_logical_line_end(&input[offset..]).ok_or("unterminated header")?;
            let raw_line = &input[offset..offset + line_end];
            offset += line_end + if input.get(offset + line_end) == Some(&b'\r') { 2 } else { 1 };

            let line = unfold(raw_line);
            let colon = line
                .iter()
                .position(|&b| b == b':')
                .ok_or("header line missing ':'")?;
            let name = String::from_utf8_lossy(&line[..colon]).trim().to_string();
            let value = String::from_utf8_lossy(&line[colon + 1..]).trim().to_string();
            if name.is_empty() {
                return Err("empty header name".into());
            }
            map.push(name, value);
        }
        Ok((map, offset))
    }
}

/// Finds the end of one logical (possibly folded) header line: scans until
/// a newline that is *not* followed by a continuation (space or tab).
fn find_logical_line_end(input: &[u8]) -> Option<usize> {
    let mut i = 0;
    loop {
        let nl = input[i..].iter().position(|&b| b == b'\n')? + i;
        let next = nl + 1;
        if input.get(next).map_or(true, |b| *b != b' ' && *b != b'\t') {
            let mut end = nl;
            if end > 0 && input[end - 1] == b'\r' {
                end -= 1;
            }
            return Some(end);
        }
        i = next;
    }
}

fn unfold(line: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(line.len());
    let mut i = 0;
    while i < line.len() {
        if line[i] == b'\r' && line.get(i + 1) == Some(&b'\n') {
            i += 2;
            out.push(b' ');
            while matches!(line.get(i), Some(b' ') | Some(b'\t')) {
                i += 1;
            }
            continue;
        }
        if line[i] == b'\n' {
            i += 1;
            out.push(b' ');
            while matches!(line.get(i), Some(b' ') | Some(b'\t')) {
                i += 1;
            }
            continue;
        }
        out.push(line[i]);
        i += 1;
    }
    out
}

#[derive(Debug, Clone)]
pub struct Message {
    pub header: HeaderMap,
    pub body: Bytes,
}

impl Message {
    pub fn read(input: &[u8]) -> Result<Self, String> {
        let (header, offset) = HeaderMap::parse(input)?;
        Ok(Message {
            header,
            body: Bytes::copy_from_slice(&input[offset..]),
        })
    }

    /// Serializes header + blank line + body. Keys sorted with `Received`
    /// first; `User-Agent`/`X-Originating-IP` dropped; `Received` lines for
    /// authenticated hops dropped; `Mime-Version` normalized to
    /// `MIME-Version`; lines folded per spec §4.3.
    pub fn serialize(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.body.len() + 512);
        serialize_header(&self.header, &mut out);
        out.extend_from_slice(b"\r\n");
        out.extend_from_slice(&self.body);
        out
    }
}

pub fn serialize_header(header: &HeaderMap, out: &mut Vec<u8>) {
    let mut fields: Vec<&HeaderField> = header
        .iter()
        .filter(|f| should_keep(f))
        .collect();

    fields.sort_by(|a, b| sort_key(a.name.as_str()).cmp(&sort_key(b.name.as_str())));

    for field in fields {
        let name = if field.name.eq_ignore_ascii_case("Mime-Version") {
            "MIME-Version".to_string()
        } else {
            field.name.clone()
        };
        let line = format!("{name}: {}", field.value);
        fold_into(&line, out);
    }
}

fn should_keep(field: &HeaderField) -> bool {
    if field.name.eq_ignore_ascii_case("User-Agent") || field.name.eq_ignore_ascii_case("X-Originating-IP") {
        return false;
    }
    if field.name.eq_ignore_ascii_case("Received") {
        let upper = field.value.to_ascii_uppercase();
        if AUTHENTICATED_RECEIVED_MARKERS
            .iter()
            .any(|marker| upper.contains(&marker.to_ascii_uppercase()))
        {
            return false;
        }
    }
    true
}

fn sort_key(name: &str) -> (u8, String) {
    if name.eq_ignore_ascii_case("Received") {
        (0, String::new())
    } else {
        (1, name.to_ascii_lowercase())
    }
}

/// Folds a single logical header line (`Name: value`) to at most 78 columns
/// where possible, never exceeding 998. The break point search scans
/// outward from column 78 in the order {78,77,...,1,79,80,...,998},
/// preferring the first whitespace it finds; if none exists within 998
/// columns the line is hard-cropped at 998 with a forced fold.
fn fold_into(line: &str, out: &mut Vec<u8>) {
    let bytes = line.as_bytes();
    if bytes.len() <= 78 {
        out.extend_from_slice(bytes);
        out.extend_from_slice(b"\r\n");
        return;
    }

    let mut start = 0usize;
    let mut first_line = true;
    loop {
        let remaining = &bytes[start..];
        if remaining.len() <= 78 {
            if !first_line {
                out.extend_from_slice(b" ");
            }
            out.extend_from_slice(remaining);
            out.extend_from_slice(b"\r\n");
            return;
        }

        let break_at = find_fold_point(remaining).unwrap_or_else(|| remaining.len().min(998));
        let take = break_at.min(remaining.len());
        if !first_line {
            out.extend_from_slice(b" ");
        }
        out.extend_from_slice(&remaining[..take]);
        out.extend_from_slice(b"\r\n");
        start += take;
        // Skip the whitespace we folded on so it isn't duplicated.
        while bytes.get(start) == Some(&b' ') || bytes.get(start) == Some(&b'\t') {
            start += 1;
        }
        first_line = false;
    }
}

/// Scans for a whitespace byte at columns {78,77,...,1,79,80,...,998}.
fn find_fold_point(remaining: &[u8]) -> Option<usize> {
    let max = remaining.len().min(998);
    for col in (1..=78).rev() {
        if col < remaining.len() && is_fold_candidate(remaining, col) {
            return Some(col);
        }
    }
    for col in 79..max {
        if is_fold_candidate(remaining, col) {
            return Some(col);
        }
    }
    None
}

fn is_fold_candidate(remaining: &[u8], col: usize) -> bool {
    col > 0 && col < remaining.len() && (remaining[col] == b' ' || remaining[col] == b'\t')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_header_and_body() {
        let raw = b"From: a@example.com\r\nSubject: hi\r\n\r\nbody here";
        let msg = Message::read(raw).unwrap();
        assert_eq!(msg.header.get("From"), Some("a@example.com"));
        assert_eq!(msg.header.get("Subject"), Some("hi"));
        assert_eq!(&msg.body[..], b"body here");
    }

    #[test]
    fn unfolds_continuation_lines() {
        let raw = b"Subject: hello\r\n world\r\n\r\nbody";
        let msg = Message::read(raw).unwrap();
        assert_eq!(msg.header.get("Subject"), Some("hello world"));
    }

    #[test]
    fn drops_authenticated_received_and_user_agent() {
        let mut header = HeaderMap::new();
        header.push("Received", "from x.example.com by y (Postfix) with ESMTPA id 123");
        header.push("Received", "from a.example.com by b.example.com with ESMTP id 456");
        header.push("User-Agent", "Thunderbird");
        header.push("X-Originating-IP", "1.2.3.4");
        header.push("Subject", "hi");
        header.push("Mime-Version", "1.0");

        let mut out = Vec::new();
        serialize_header(&header, &mut out);
        let text = String::from_utf8(out).unwrap();

        assert!(!text.contains("ESMTPA"));
        assert!(text.contains("with ESMTP id 456"));
        assert!(!text.contains("User-Agent"));
        assert!(!text.contains("X-Originating-IP"));
        assert!(text.contains("MIME-Version: 1.0"));
        assert!(!text.contains("Mime-Version:"));
    }

    #[test]
    fn received_sorts_first() {
        let mut header = HeaderMap::new();
        header.push("Subject", "hi");
        header.push("Received", "from a by b with ESMTP id 1");
        header.push("From", "a@example.com");

        let mut out = Vec::new();
        serialize_header(&header, &mut out);
        let text = String::from_utf8(out).unwrap();
        assert!(text.find("Received:").unwrap() < text.find("From:").unwrap());
        assert!(text.find("From:").unwrap() < text.find("Subject:").unwrap());
    }

    #[test]
    fn folds_long_lines_under_78_columns_where_possible() {
        let long_value = "a".repeat(40) + " " + &"b".repeat(40);
        let mut header = HeaderMap::new();
        header.push("Subject", long_value);
        let mut out = Vec::new();
        serialize_header(&header, &mut out);
        let text = String::from_utf8(out).unwrap();
        for line in text.split("\r\n") {
            assert!(line.len() <= 998);
        }
        assert!(text.contains("\r\n "));
    }

    #[test]
    fn never_exceeds_998_even_with_no_whitespace() {
        let mut header = HeaderMap::new();
        header.push("X-Long", "x".repeat(2000));
        let mut out = Vec::new();
        serialize_header(&header, &mut out);
        let text = String::from_utf8(out).unwrap();
        for line in text.split("\r\n") {
            assert!(line.len() <= 998);
        }
    }
}
