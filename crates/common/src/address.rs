//! RFC5322 address model (C1). Equality is local+domain only, case folded;
//! display names never participate in comparison and never round-trip
//! through string form for `Eq` the way the teacher's `SessionAddress`
//! keeps both a display form and an `address_lcase` side by side (see
//! `smtp::core::SessionAddress` in the teacher crate).

use std::fmt;

pub const BOUNCE_SUFFIX: &str = "+bounces";

#[derive(Debug, Clone)]
pub struct Address {
    pub display: Option<String>,
    pub local: String,
    pub domain: String,
}

impl Address {
    pub fn new(display: Option<String>, local: impl Into<String>, domain: impl Into<String>) -> Self {
        Address {
            display,
            local: local.into().to_lowercase(),
            domain: domain.into().to_lowercase(),
        }
    }

    pub fn addr_spec(&self) -> String {
        format!("{}@{}", quote_local_if_needed(&self.local), self.domain)
    }

    /// `local + "+bounces" @ domain`. Quoting follows the same rule as any
    /// other local part.
    pub fn bounce_address(&self) -> Address {
        Address {
            display: None,
            local: format!("{}{}", self.local, BOUNCE_SUFFIX),
            domain: self.domain.clone(),
        }
    }

    pub fn is_bounce_address(&self) -> bool {
        self.local.ends_with(BOUNCE_SUFFIX)
    }

    /// The local part with the bounce suffix removed, if present.
    pub fn strip_bounce_suffix(&self) -> Address {
        Address {
            display: self.display.clone(),
            local: self
                .local
                .strip_suffix(BOUNCE_SUFFIX)
                .unwrap_or(&self.local)
                .to_string(),
            domain: self.domain.clone(),
        }
    }

    /// Name to show the user when no display name is present: the local
    /// part verbatim.
    pub fn display_or_local(&self) -> &str {
        self.display.as_deref().unwrap_or(&self.local)
    }
}

impl PartialEq for Address {
    fn eq(&self, other: &Self) -> bool {
        self.local == other.local && self.domain == other.domain
    }
}
impl Eq for Address {}

impl std::hash::Hash for Address {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.local.hash(state);
        self.domain.hash(state);
    }
}

impl Ord for Address {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        (&self.domain, &self.local).cmp(&(&other.domain, &other.local))
    }
}
impl PartialOrd for Address {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.display {
            Some(display) if !display.is_empty() => {
                write!(f, "{:?} <{}>", display, self.addr_spec())
            }
            _ => write!(f, "{}", self.addr_spec()),
        }
    }
}

fn needs_quoting(local: &str) -> bool {
    !local.chars().all(|c| {
        c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-' | '+' | '!' | '#' | '$' | '%' | '&' | '\'' | '*' | '/' | '=' | '?' | '^' | '`' | '{' | '|' | '}' | '~')
    })
}

fn quote_local_if_needed(local: &str) -> String {
    if needs_quoting(local) {
        let escaped = local.replace('\\', "\\\\").replace('"', "\\\"");
        format!("\"{escaped}\"")
    } else {
        local.to_string()
    }
}

#[derive(Debug, Clone)]
pub struct ParseError {
    pub line: usize,
    pub message: String,
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "line {}: {}", self.line, self.message)
    }
}
impl std::error::Error for ParseError {}

/// Parses a single RFC5322 mailbox/addr-spec/name-addr production. Lenient:
/// a bare `local@domain`, `Display Name <local@domain>`, or a quoted local
/// part are all accepted. Encoded words (`=?charset?B?...?=`) in the display
/// name are decoded; unsupported charsets degrade to the raw encoded bytes
/// rather than failing the parse, per spec.
pub fn parse(input: &str) -> Result<Address, String> {
    let input = input.trim();
    if input.is_empty() {
        return Err("empty address".into());
    }

    if let Some(angle_start) = input.find('<') {
        let angle_end = input
            .rfind('>')
            .ok_or_else(|| "unterminated <...> in address".to_string())?;
        if angle_end < angle_start {
            return Err("malformed angle brackets".into());
        }
        let display_raw = input[..angle_start].trim();
        let inner = input[angle_start + 1..angle_end].trim();
        let display = if display_raw.is_empty() {
            None
        } else {
            Some(decode_mime_words(display_raw.trim_matches('"')))
        };
        let (local, domain) = split_addr_spec(inner)?;
        return Ok(Address::new(display, local, domain));
    }

    let (local, domain) = split_addr_spec(input)?;
    Ok(Address::new(None, local, domain))
}

fn split_addr_spec(input: &str) -> Result<(String, String), String> {
    let input = input.trim();
    let (local, rest) = if input.starts_with('"') {
        let end = input[1..]
            .find('"')
            .map(|i| i + 1)
            .ok_or_else(|| "unterminated quoted local part".to_string())?;
        let local = input[1..end].replace("\\\"", "\"").replace("\\\\", "\\");
        (local, &input[end + 1..])
    } else {
        let at = input.find('@').ok_or_else(|| "missing '@'".to_string())?;
        (input[..at].to_string(), &input[at..])
    };
    let rest = rest.trim_start_matches('@').trim();
    if rest.is_empty() {
        return Err("missing domain".into());
    }
    if local.is_empty() {
        return Err("empty local part".into());
    }
    Ok((local, rest.to_string()))
}

/// Decodes RFC2047 encoded words (`=?charset?B|Q?text?=`). Only UTF-8 and
/// US-ASCII charsets are actually decoded; anything else is passed through
/// as the raw decoded bytes interpreted lossily, matching the "degrade to
/// raw bytes rather than failing" requirement.
pub fn decode_mime_words(input: &str) -> String {
    let mut out = String::new();
    let mut rest = input;
    while let Some(start) = rest.find("=?") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some((decoded, consumed)) = decode_one_word(after) else {
            out.push_str("=?");
            rest = after;
            continue;
        };
        out.push_str(&decoded);
        rest = &after[consumed..];
        // RFC2047 allows whitespace between adjacent encoded words to be
        // elided; swallow a single intervening space/newline run.
        if rest.starts_with(char::is_whitespace) {
            let next_is_encoded = rest.trim_start().starts_with("=?");
            if next_is_encoded {
                rest = rest.trim_start();
            }
        }
    }
    out.push_str(rest);
    out
}

fn decode_one_word(s: &str) -> Option<(String, usize)> {
    let mut parts = s.splitn(3, '?');
    let _charset = parts.next()?;
    let encoding = parts.next()?;
    let remainder = parts.next()?;
    let end = remainder.find("?=")?;
    let text = &remainder[..end];
    let consumed = _charset.len() + 1 + encoding.len() + 1 + end + 2;
    let bytes = match encoding.to_ascii_uppercase().as_str() {
        "B" => base64::Engine::decode(&base64::engine::general_purpose::STANDARD, text).ok()?,
        "Q" => decode_quoted_printable_word(text),
        _ => return None,
    };
    Some((String::from_utf8_lossy(&bytes).into_owned(), consumed))
}

fn decode_quoted_printable_word(s: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(s.len());
    let bytes = s.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'_' => {
                out.push(b' ');
                i += 1;
            }
            b'=' if i + 2 < bytes.len() => {
                if let Ok(byte) = u8::from_str_radix(&s[i + 1..i + 3], 16) {
                    out.push(byte);
                    i += 3;
                } else {
                    out.push(b'=');
                    i += 1;
                }
            }
            b => {
                out.push(b);
                i += 1;
            }
        }
    }
    out
}

/// Encodes a free-text string as a single RFC2047 `=?UTF-8?B?...?=` word if
/// it contains non-ASCII bytes; otherwise returns it unchanged.
pub fn encode_mime_word(input: &str) -> String {
    if input.is_ascii() {
        return input.to_string();
    }
    let encoded = base64::Engine::encode(&base64::engine::general_purpose::STANDARD, input.as_bytes());
    format!("=?UTF-8?B?{encoded}?=")
}

/// Parses one address-list per line, up to `limit` lines, collecting
/// parse errors without aborting the batch.
pub fn parse_list(input: &str, limit: usize) -> (Vec<Address>, Vec<ParseError>) {
    let mut addresses = Vec::new();
    let mut errors = Vec::new();
    for (idx, line) in input.lines().enumerate().take(limit) {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        for entry in split_top_level_commas(line) {
            match parse(entry.trim()) {
                Ok(addr) => addresses.push(addr),
                Err(message) => errors.push(ParseError {
                    line: idx + 1,
                    message,
                }),
            }
        }
    }
    (addresses, errors)
}

fn split_top_level_commas(line: &str) -> Vec<&str> {
    let mut out = Vec::new();
    let mut depth = 0i32;
    let mut start = 0usize;
    for (i, c) in line.char_indices() {
        match c {
            '<' => depth += 1,
            '>' => depth -= 1,
            ',' if depth == 0 => {
                out.push(&line[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    out.push(&line[start..]);
    out
}
