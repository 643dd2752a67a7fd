//! Forwarder (C8): rewrites the inbound header for outbound fan-out —
//! List-* headers, a fresh Message-Id, subject prefixing, From-munging —
//! then inserts the leave-link footer via `common::footer` and hands the
//! result to the configured `mta::Sink`.

use common::{
    address,
    footer::inject_footer,
    message::{serialize_header, HeaderMap},
    Address, Message,
};
use store::List;

use crate::Error;

/// Generates a random opaque `Message-Id` local part. The same inbound
/// message may traverse several lists in one LMTP session, so every
/// outbound copy needs its own id rather than reusing the original.
fn generate_message_id(domain: &str) -> String {
    let token: String = (0..24)
        .map(|_| {
            let n: u8 = rand::random::<u8>() % 36;
            std::char::from_digit(n as u32, 36).unwrap()
        })
        .collect();
    format!("<{token}@{domain}>")
}

/// `[display-or-local] original` unless the subject already starts with
/// that exact bracketed prefix.
fn prefix_subject(display_or_local: &str, original: &str) -> String {
    let prefix = format!("[{display_or_local}]");
    if original.trim_start().starts_with(&prefix) {
        original.to_string()
    } else {
        format!("{prefix} {original}")
    }
}

/// Strips everything from the first `@` onward in a display name, so a
/// From-munged display can't be mistaken for containing a second address
/// (anti-spoofing false positive avoidance).
fn strip_at_and_after(display_or_local: &str) -> &str {
    display_or_local.split('@').next().unwrap_or(display_or_local)
}

pub struct ForwardResult {
    pub envelope_from: String,
    pub envelope_to: Vec<String>,
    pub header: Vec<u8>,
    pub body: Vec<u8>,
}

/// Builds the rewritten header + footer-injected body for one receiving
/// list. Does not itself call the sink — callers decide how to handle
/// send failures (spec: forwarding errors fail the transaction for the
/// affected list only).
pub fn build_forward(list: &List, original_froms: &[Address], message: &Message, web_url: &str, receivers: Vec<String>) -> Result<ForwardResult, Error> {
    let mut header = message.header.clone();

    let list_addr = list.addr_spec();
    header.set("List-Id", format!("\"{}\" <{}>", list.display_or_local(), list_addr));
    header.set("List-Post", format!("<mailto:{list_addr}>"));
    header.set("List-Unsubscribe", format!("<mailto:{list_addr}?subject=leave>"));
    header.set("Message-Id", generate_message_id(&list.domain));
    header.set("Dkim-Signature", "");

    if let Some(subject) = header.get("Subject").map(|s| s.to_string()) {
        let prefixed = prefix_subject(list.display_or_local(), &subject);
        header.set("Subject", address::encode_mime_word(&prefixed));
    }

    header.remove("Sender");

    if list.hide_from {
        header.set("From", format!("\"{}\" <{}>", list.display_or_local(), list_addr));
        header.remove("Reply-To");
    } else {
        let from_mailboxes: Vec<String> = original_froms
            .iter()
            .map(|from| {
                let display = strip_at_and_after(from.display_or_local());
                format!("\"{display} via {}\" <{}>", strip_at_and_after(list.display_or_local()), list_addr)
            })
            .collect();
        header.set("From", from_mailboxes.join(", "));
        let reply_to: Vec<String> = original_froms.iter().map(|f| f.addr_spec()).collect();
        header.set("Reply-To", reply_to.join(", "));
    }

    let leave_url = format!("{web_url}/leave/{}", form_urlencoded_escape(&list_addr));
    let plain = format!("You can leave the mailing list \"{}\" here: {leave_url}", list.display_or_local());
    let html = format!(
        "<p>You can leave the mailing list \"{}\" here: <a href=\"{leave_url}\">{leave_url}</a></p>",
        list.display_or_local()
    );

    let new_body = inject_footer(&mut header, &message.body, &plain, &html);
    let mut header_bytes = Vec::new();
    serialize_header(&header, &mut header_bytes);
    header_bytes.extend_from_slice(b"\r\n");

    Ok(ForwardResult {
        envelope_from: list.bounce_local() + "@" + &list.domain,
        envelope_to: receivers,
        header: header_bytes,
        body: new_body,
    })
}

fn form_urlencoded_escape(s: &str) -> String {
    form_urlencoded::byte_serialize(s.as_bytes()).collect()
}

/// Builds the synthesized header for a bounce forwarded to a list's
/// admins: `From` = list name-addr, `Subject` = list-prefix + bounce
/// notice, empty envelope-from to prevent bounce loops.
pub fn build_bounce_notice(list: &List, original_header: &HeaderMap, body: &[u8]) -> (Vec<u8>, Vec<u8>) {
    let mut header = HeaderMap::new();
    header.push("From", format!("\"{}\" <{}>", list.display_or_local(), list.addr_spec()));
    let original_subject = original_header.get("Subject").unwrap_or("");
    header.push(
        "Subject",
        address::encode_mime_word(&format!("[{}] Bounce notification: {original_subject}", list.display_or_local())),
    );
    if let Some(ct) = original_header.get("Content-Type") {
        header.push("Content-Type", ct.to_string());
    }

    let mut out = Vec::new();
    serialize_header(&header, &mut out);
    out.extend_from_slice(b"\r\n");
    (out, body.to_vec())
}
