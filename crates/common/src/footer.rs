//! Footer injection (C4). Dispatches on the message's top-level MIME
//! structure and either appends a plain-text separator, splices a new part
//! into an existing `multipart/mixed`, or wraps the whole original body as a
//! single part inside a freshly built `multipart/mixed`.
//!
//! The dispatch decision (is this text/plain? is this already
//! multipart/mixed, and with what boundary?) is read off a real MIME parse
//! via `mail_parser` rather than hand-rolled `Content-Type` splitting. The
//! synthesized footer part is built with `mail_builder`. Existing parts are
//! still re-emitted as raw byte slices of the original body rather than
//! re-parsed and re-serialized — MIME part bodies (base64/quoted-printable
//! payloads, attachments) must survive byte-for-byte, so we only ever slice
//! the boundary delimiters out, never touch what's between them.

use mail_builder::mime::{BodyPart, MimePart};
use mail_parser::{MessageParser, MimeHeaders};
use rand::Rng;

use crate::message::{serialize_header, HeaderMap};

enum Structure {
    TextPlain,
    MultipartMixed { boundary: String },
    Other,
}

/// Parses just enough of a synthetic `Content-Type: <value>\r\n\r\n<body>`
/// buffer to tell the three dispatch branches apart.
fn sniff_structure(content_type: Option<&str>, body: &[u8]) -> Structure {
    let mut synthetic = Vec::with_capacity(body.len() + 64);
    if let Some(ct) = content_type {
        synthetic.extend_from_slice(b"Content-Type: ");
        synthetic.extend_from_slice(ct.as_bytes());
        synthetic.extend_from_slice(b"\r\n");
    }
    synthetic.extend_from_slice(b"\r\n");
    synthetic.extend_from_slice(body);

    let Some(message) = MessageParser::new().parse(&synthetic) else {
        return Structure::Other;
    };
    let Some(ct) = message.content_type() else {
        return Structure::Other;
    };

    if ct.ctype().eq_ignore_ascii_case("text") && ct.subtype().is_some_and(|s| s.eq_ignore_ascii_case("plain")) {
        return Structure::TextPlain;
    }
    if ct.ctype().eq_ignore_ascii_case("multipart") && ct.subtype().is_some_and(|s| s.eq_ignore_ascii_case("mixed")) {
        if let Some(boundary) = ct.attribute("boundary") {
            return Structure::MultipartMixed { boundary: boundary.to_string() };
        }
    }
    Structure::Other
}

fn random_boundary() -> String {
    let mut rng = rand::thread_rng();
    let suffix: String = (0..24)
        .map(|_| {
            let n: u8 = rng.gen_range(0..36);
            std::char::from_digit(n as u32, 36).unwrap()
        })
        .collect();
    format!("----=_Footer_{suffix}")
}

/// Splits a `multipart/*` body into its raw parts using `boundary`. Each
/// returned slice is the exact bytes between two delimiter lines (so it
/// still contains its own part header, blank line, and part body). Returns
/// `None` if no opening delimiter is found at all.
fn split_multipart_raw<'a>(body: &'a [u8], boundary: &str) -> Option<Vec<&'a [u8]>> {
    let open = format!("--{boundary}").into_bytes();
    let mut positions = Vec::new();
    let mut search_from = 0usize;
    while let Some(rel) = find_subslice(&body[search_from..], &open) {
        positions.push(search_from + rel);
        search_from += rel + open.len();
    }
    if positions.is_empty() {
        return None;
    }

    let mut parts = Vec::new();
    for window in positions.windows(2) {
        let start = window[0] + open.len();
        let end = window[1];
        let slice = trim_delimiter_newline(&body[start..end]);
        // The final delimiter is "--boundary--"; anything starting with
        // "--" right after the opening marker means this window's start
        // was actually the closing delimiter, which windows(2) never
        // reaches as a `start` since it's always the last position.
        parts.push(trim_trailing_newline(slice));
    }
    Some(parts)
}

fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}

fn trim_delimiter_newline(slice: &[u8]) -> &[u8] {
    if slice.starts_with(b"\r\n") {
        &slice[2..]
    } else if slice.starts_with(b"\n") {
        &slice[1..]
    } else {
        slice
    }
}

fn trim_trailing_newline(slice: &[u8]) -> &[u8] {
    if slice.ends_with(b"\r\n") {
        &slice[..slice.len() - 2]
    } else if slice.ends_with(b"\n") {
        &slice[..slice.len() - 1]
    } else {
        slice
    }
}

/// Builds one MIME part: header lines (already-formatted `Name: value`
/// pairs, CRLF terminated by the caller) followed by a blank line and the
/// raw body.
fn write_part(out: &mut Vec<u8>, boundary: &str, header: &[(&str, String)], raw_body: &[u8]) {
    out.extend_from_slice(format!("--{boundary}\r\n").as_bytes());
    for (name, value) in header {
        out.extend_from_slice(format!("{name}: {value}\r\n").as_bytes());
    }
    out.extend_from_slice(b"\r\n");
    out.extend_from_slice(raw_body);
    out.extend_from_slice(b"\r\n");
}

fn close_multipart(out: &mut Vec<u8>, boundary: &str) {
    out.extend_from_slice(format!("--{boundary}--\r\n").as_bytes());
}

/// Builds the synthesized footer part via `mail_builder`: a
/// `multipart/alternative` with a `text/plain` and a `text/html` inline
/// subpart, each `charset=us-ascii`. The returned bytes are the complete
/// part — its own `Content-Type` header, boundary delimiters and all — ready
/// to splice in after an outer `--boundary\r\n` delimiter line.
fn build_footer_part(plain: &str, html: &str) -> Vec<u8> {
    let part = MimePart::new(
        "multipart/alternative",
        BodyPart::Multipart(vec![
            MimePart::new("text/plain; charset=\"us-ascii\"", BodyPart::Text(plain.into())).inline(),
            MimePart::new("text/html; charset=\"us-ascii\"", BodyPart::Text(html.into())).inline(),
        ]),
    );
    let mut out = Vec::new();
    part.write_part(&mut out).expect("writing to a Vec never fails");
    out
}

/// Given the message header, body, and the footer's plain/HTML renditions,
/// returns the new body bytes and, if the top-level `Content-Type` needed
/// to change, the header mutations to apply (the caller owns the header and
/// applies them so callers can log/observe the change).
pub fn inject_footer(header: &mut HeaderMap, body: &[u8], plain: &str, html: &str) -> Vec<u8> {
    match sniff_structure(header.get("Content-Type"), body) {
        Structure::TextPlain => {
            let mut out = Vec::with_capacity(body.len() + plain.len() + 16);
            out.extend_from_slice(body);
            out.extend_from_slice(b"\r\n\r\n----\r\n");
            out.extend_from_slice(plain.as_bytes());
            out
        }
        Structure::MultipartMixed { boundary } => match split_multipart_raw(body, &boundary) {
            Some(parts) if !parts.is_empty() => {
                let footer_body = build_footer_part(plain, html);
                let mut out = Vec::with_capacity(body.len() + footer_body.len() + 256);

                out.extend_from_slice(format!("--{boundary}\r\n").as_bytes());
                out.extend_from_slice(parts[0]);
                out.extend_from_slice(b"\r\n");

                out.extend_from_slice(format!("--{boundary}\r\n").as_bytes());
                out.extend_from_slice(&footer_body);
                out.extend_from_slice(b"\r\n");

                for part in &parts[1..] {
                    out.extend_from_slice(format!("--{boundary}\r\n").as_bytes());
                    out.extend_from_slice(part);
                    out.extend_from_slice(b"\r\n");
                }
                close_multipart(&mut out, &boundary);
                out
            }
            _ => wrap_as_mixed(header, body, plain, html),
        },
        Structure::Other => wrap_as_mixed(header, body, plain, html),
    }
}

/// Wraps the whole original body as a single part inside a new
/// `multipart/mixed`, lifting `Content-Disposition`/`Content-Transfer-Encoding`/
/// `Content-Type` from the outer header onto the wrapped part and clearing
/// them on the outer header, then appends the synthesized footer part.
fn wrap_as_mixed(header: &mut HeaderMap, body: &[u8], plain: &str, html: &str) -> Vec<u8> {
    let lifted: Vec<(&str, String)> = ["Content-Disposition", "Content-Transfer-Encoding", "Content-Type"]
        .iter()
        .filter_map(|name| header.get(name).map(|v| (*name, v.to_string())))
        .collect();

    for name in ["Content-Disposition", "Content-Transfer-Encoding", "Content-Type"] {
        header.remove(name);
    }

    let boundary = random_boundary();
    header.set("Content-Type", format!("multipart/mixed; boundary=\"{boundary}\""));

    let footer_body = build_footer_part(plain, html);
    let mut out = Vec::with_capacity(body.len() + footer_body.len() + 256);

    write_part(&mut out, &boundary, &lifted, body);

    out.extend_from_slice(format!("--{boundary}\r\n").as_bytes());
    out.extend_from_slice(&footer_body);
    out.extend_from_slice(b"\r\n");

    close_multipart(&mut out, &boundary);
    out
}

/// Re-serializes the header after `inject_footer` may have mutated it.
pub fn serialize_header_after_injection(header: &HeaderMap) -> Vec<u8> {
    let mut out = Vec::new();
    serialize_header(header, &mut out);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sniffs_multipart_mixed_boundary() {
        match sniff_structure(Some("multipart/mixed; boundary=\"abc123\""), b"--abc123--\r\n") {
            Structure::MultipartMixed { boundary } => assert_eq!(boundary, "abc123"),
            _ => panic!("expected MultipartMixed"),
        }
    }

    #[test]
    fn plain_text_appends_separator_and_footer() {
        let mut header = HeaderMap::new();
        header.push("Content-Type", "text/plain");
        let body = b"hello world";
        let out = inject_footer(&mut header, body, "unsubscribe here", "<b>unsubscribe</b>");
        let text = String::from_utf8(out).unwrap();
        assert!(text.starts_with("hello world\r\n\r\n----\r\n"));
        assert!(text.ends_with("unsubscribe here"));
    }

    #[test]
    fn multipart_mixed_inserts_footer_after_first_part_with_same_boundary() {
        let mut header = HeaderMap::new();
        header.push("Content-Type", "multipart/mixed; boundary=\"BOUND\"");
        let body = b"--BOUND\r\nContent-Type: text/plain\r\n\r\npart one\r\n--BOUND\r\nContent-Type: text/plain\r\n\r\npart two\r\n--BOUND--\r\n";
        let out = inject_footer(&mut header, body, "bye", "<p>bye</p>");
        let text = String::from_utf8(out).unwrap();

        let first_part_pos = text.find("part one").unwrap();
        let footer_pos = text.find("multipart/alternative").unwrap();
        let second_part_pos = text.find("part two").unwrap();
        assert!(first_part_pos < footer_pos);
        assert!(footer_pos < second_part_pos);
        assert!(text.contains("--BOUND--"));
        // Same boundary token reused throughout, not a freshly minted one.
        assert_eq!(text.matches("--BOUND\r\n").count(), 3);
    }

    #[test]
    fn other_content_type_wraps_original_and_clears_outer_headers() {
        let mut header = HeaderMap::new();
        header.push("Content-Type", "image/png");
        header.push("Content-Transfer-Encoding", "base64");
        let body = b"not-really-png-bytes";
        let out = inject_footer(&mut header, body, "txt footer", "<p>html footer</p>");
        let text = String::from_utf8(out).unwrap();

        assert_eq!(header.get("Content-Transfer-Encoding"), None);
        assert!(header.get("Content-Type").unwrap().starts_with("multipart/mixed"));
        assert!(text.contains("Content-Type: image/png"));
        assert!(text.contains("Content-Transfer-Encoding: base64"));
        assert!(text.contains("multipart/alternative"));
    }
}
