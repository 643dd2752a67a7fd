//! LMTP backend (C7): the per-connection state machine that accepts mail
//! over a Unix or TCP stream and dispatches each accepted list through the
//! classifier, forwarder, spool, or checkback sender.

use std::{
    sync::{atomic::{AtomicU32, Ordering}, Arc},
    time::Duration,
};

use common::{address, Address, Message};
use store::{Action, SqliteStore};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

use crate::{
    classify::{classify, StatusLookup, MAX_FROM_ADDRESSES},
    error::{default_smtp_code, Error},
    forward::build_forward,
    spool::Spool,
    templates,
};

pub const READ_WRITE_TIMEOUT: Duration = Duration::from_secs(10);
pub const MAX_MESSAGE_BYTES: usize = 50 * 1024 * 1024;
pub const MAX_RECIPIENTS: usize = 50;
pub const LMTP_DOMAIN: &str = "localhost";

pub struct SessionContext {
    pub store: Arc<SqliteStore>,
    pub sink: Arc<dyn mta::Sink>,
    pub spool: Arc<Spool>,
    pub rate_limiter: Arc<checkback::RateLimiter>,
    pub web_url: String,
}

struct StoreLookup<'a> {
    store: &'a SqliteStore,
    list_id: i64,
}

impl StatusLookup for StoreLookup<'_> {
    fn is_known(&self, addr: &Address) -> Result<bool, store::StoreError> {
        Ok(self.store.knowns(self.list_id)?.iter().any(|a| a.eq_ignore_ascii_case(&addr.addr_spec())))
    }
    fn is_member(&self, addr: &Address) -> Result<bool, store::StoreError> {
        Ok(self.store.get_membership(self.list_id, addr)?.member)
    }
    fn is_moderator(&self, addr: &Address) -> Result<bool, store::StoreError> {
        Ok(self.store.get_membership(self.list_id, addr)?.moderate)
    }
}

/// Process-wide source for `State::log_id`: a fresh id is drawn on every
/// `MAIL FROM`, correlating the classify/forward/spool events one LMTP
/// transaction produces (spec §4.7: "allocate a log id").
static NEXT_LOG_ID: AtomicU32 = AtomicU32::new(1);

#[derive(Default)]
struct State {
    lists: Vec<store::List>,
    is_bounce: bool,
    log_id: u32,
}

impl State {
    fn reset(&mut self) {
        self.lists.clear();
        self.is_bounce = false;
    }

    fn start_transaction(&mut self) {
        self.reset();
        self.log_id = NEXT_LOG_ID.fetch_add(1, Ordering::Relaxed);
    }
}

/// Drives one LMTP connection to completion (until QUIT or EOF).
pub async fn run_session<S>(stream: S, ctx: &SessionContext) -> std::io::Result<()>
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
{
    let (read_half, mut write_half) = tokio::io::split(stream);
    let mut reader = BufReader::new(read_half);
    let mut state = State::default();

    write_half.write_all(format!("220 {LMTP_DOMAIN} ESMTP listmgr ready\r\n").as_bytes()).await?;

    let mut line = String::new();
    loop {
        line.clear();
        let read = tokio::time::timeout(READ_WRITE_TIMEOUT, reader.read_line(&mut line)).await;
        let n = match read {
            Ok(Ok(n)) => n,
            Ok(Err(e)) => return Err(e),
            Err(_) => return Ok(()),
        };
        if n == 0 {
            return Ok(());
        }
        let cmd = line.trim_end();
        let upper = cmd.to_ascii_uppercase();

        if upper.starts_with("LHLO") || upper.starts_with("HELO") {
            write_half.write_all(format!("250 {LMTP_DOMAIN}\r\n").as_bytes()).await?;
        } else if upper == "RSET" {
            state.reset();
            write_half.write_all(b"250 OK\r\n").await?;
        } else if upper.starts_with("MAIL FROM:") {
            let env_from = extract_angle_addr(&cmd[10..]);
            state.start_transaction();
            state.is_bounce = env_from.trim().is_empty();
            write_half.write_all(b"250 OK\r\n").await?;
        } else if upper.starts_with("RCPT TO:") {
            let raw = extract_angle_addr(&cmd[8..]);
            match handle_rcpt(ctx, &mut state, &raw) {
                Ok(()) => write_half.write_all(b"250 OK\r\n").await?,
                Err(err) => {
                    let (code, msg) = default_smtp_code(&err);
                    write_half.write_all(format!("{} {}\r\n", code.0, msg).as_bytes()).await?;
                }
            }
        } else if upper == "DATA" {
            write_half.write_all(b"354 Start mail input; end with <CRLF>.<CRLF>\r\n").await?;
            let data = match read_dot_stuffed(&mut reader).await {
                Ok(data) => data,
                Err(_) => {
                    write_half.write_all(b"442 unable to read message body\r\n").await?;
                    state.reset();
                    continue;
                }
            };
            let response = handle_data(ctx, &state, data).await;
            let (code, msg) = match response {
                Ok(()) => (250u16, "OK".to_string()),
                Err(err) => {
                    let (code, msg) = default_smtp_code(&err);
                    (code.0, msg)
                }
            };
            write_half.write_all(format!("{code} {msg}\r\n").as_bytes()).await?;
            state.reset();
        } else if upper == "QUIT" {
            write_half.write_all(b"221 bye\r\n").await?;
            return Ok(());
        } else if upper == "NOOP" {
            write_half.write_all(b"250 OK\r\n").await?;
        } else {
            write_half.write_all(b"554 unknown command\r\n").await?;
        }
    }
}

fn extract_angle_addr(s: &str) -> String {
    let s = s.trim();
    if let (Some(start), Some(end)) = (s.find('<'), s.rfind('>')) {
        if end > start {
            return s[start + 1..end].to_string();
        }
    }
    s.to_string()
}

fn handle_rcpt(ctx: &SessionContext, state: &mut State, raw_addr: &str) -> Result<(), Error> {
    if state.lists.len() >= MAX_RECIPIENTS {
        return Err(Error::ProtocolViolation("too many recipients".to_string()));
    }
    let addr = address::parse(raw_addr).map_err(|_| smtp_error(510, "bad address syntax"))?;
    let has_bounce_suffix = addr.is_bounce_address();
    if has_bounce_suffix != state.is_bounce {
        return Err(smtp_error(541, "envelope-from/recipient bounce-suffix mismatch"));
    }
    let lookup_addr = if has_bounce_suffix { addr.strip_bounce_suffix() } else { addr };

    let list = ctx
        .store
        .get_list(&lookup_addr)
        .map_err(|e| Error::Transient(e.to_string()))?
        .ok_or_else(|| smtp_error(550, "no such user"))?;

    state.lists.push(list);
    Ok(())
}

fn smtp_error(code: u16, msg: &str) -> Error {
    Error::Coded(code, msg.to_string())
}

async fn read_dot_stuffed<R: tokio::io::AsyncBufRead + Unpin>(reader: &mut R) -> std::io::Result<Vec<u8>> {
    let mut out = Vec::new();
    let mut line = String::new();
    loop {
        line.clear();
        let read = tokio::time::timeout(READ_WRITE_TIMEOUT, reader.read_line(&mut line))
            .await
            .map_err(|_| std::io::Error::new(std::io::ErrorKind::TimedOut, "DATA read timed out"))??;
        if read == 0 {
            return Err(std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "connection closed mid-DATA"));
        }
        if line == ".\r\n" || line == ".\n" {
            return Ok(out);
        }
        let unstuffed = if let Some(rest) = line.strip_prefix('.') { rest } else { line.as_str() };
        out.extend_from_slice(unstuffed.as_bytes());
        if out.len() > MAX_MESSAGE_BYTES {
            return Err(std::io::Error::new(std::io::ErrorKind::InvalidData, "message exceeds size limit"));
        }
    }
}

async fn handle_data(ctx: &SessionContext, state: &State, raw: Vec<u8>) -> Result<(), Error> {
    if state.lists.is_empty() {
        return Err(smtp_error(550, "no valid recipients"));
    }

    let message = Message::read(&raw).map_err(|_| smtp_error(442, "malformed message header"))?;

    if !state.is_bounce {
        for list in &state.lists {
            if !header_contains_address(&message, "To", list) && !header_contains_address(&message, "Cc", list) {
                return Err(smtp_error(541, &format!("list address {} is not in To or Cc", list.addr_spec())));
            }
        }
    }

    for list_id_header in message.header.get_all("List-Id") {
        if let Some(addr) = extract_addr_spec_from_list_id(list_id_header) {
            for list in &state.lists {
                if addr.eq_ignore_ascii_case(&list.addr_spec()) {
                    return Err(smtp_error(554, "email loop detected"));
                }
            }
        }
    }

    let (froms, _errors) = address::parse_list(message.header.get("From").unwrap_or(""), MAX_FROM_ADDRESSES);

    for list in &state.lists {
        process_one_list(ctx, list, &froms, &message, state.is_bounce, state.log_id).await?;
    }
    Ok(())
}

/// True if any address parsed out of the (possibly comma-joined) header
/// values equals `list`'s address. Uses full address parsing rather than
/// substring search so e.g. `notlist_a@example.com` in a To header can
/// never be mistaken for `list_a@example.com`.
fn header_contains_address(message: &Message, header_name: &str, list: &store::List) -> bool {
    message.header.get_all(header_name).any(|value| {
        let (addrs, _errors) = address::parse_list(value, MAX_FROM_ADDRESSES.max(50));
        addrs.iter().any(|a| a.addr_spec().eq_ignore_ascii_case(&list.addr_spec()))
    })
}

/// Extracts the bracketed addr-spec from a `List-Id` value such as
/// `"A" <list_a@example.com>`; returns `None` if there is no `<...>`.
fn extract_addr_spec_from_list_id(value: &str) -> Option<String> {
    let start = value.find('<')?;
    let end = value[start..].find('>')? + start;
    Some(value[start + 1..end].trim().to_string())
}

/// Maps a command Subject to its canonical `"join"`/`"leave"` action.
/// `subscribe`/`unsubscribe` are accepted as case-insensitive synonyms
/// alongside the spec's own `join`/`leave` wording; anything else is not a
/// command subject at all and falls through to normal classification.
fn canonical_command(subject: &str) -> Option<&'static str> {
    match subject {
        "join" | "subscribe" => Some("join"),
        "leave" | "unsubscribe" => Some("leave"),
        _ => None,
    }
}

async fn process_one_list(ctx: &SessionContext, list: &store::List, froms: &[Address], message: &Message, is_bounce: bool, log_id: u32) -> Result<(), Error> {
    if is_bounce {
        return forward_bounce_to_admins(ctx, list, message, log_id);
    }

    if let Some(subject) = message.header.get("Subject") {
        let trimmed = subject.trim().to_ascii_lowercase();
        if let Some(command) = canonical_command(&trimmed) {
            return handle_command(ctx, list, froms, message, command).await;
        }
    }

    process_normal_message(ctx, list, froms, message, log_id)
}

fn forward_bounce_to_admins(ctx: &SessionContext, list: &store::List, message: &Message, log_id: u32) -> Result<(), Error> {
    let admins = ctx.store.admins(list.id)?;
    if admins.is_empty() {
        return Ok(());
    }
    let (header, body) = crate::forward::build_bounce_notice(list, &message.header, &message.body);
    if let Err(e) = ctx.sink.send("", &admins, &header, &body) {
        trc::Event::new(trc::EventType::ForwardFailed)
            .with("list", list.addr_spec())
            .with("log_id", log_id.to_string())
            .at(trc::Level::Warn)
            .send();
        let _ = e;
    }
    Ok(())
}

async fn handle_command(ctx: &SessionContext, list: &store::List, froms: &[Address], message: &Message, command: &str) -> Result<(), Error> {
    if froms.len() != 1 {
        return Err(smtp_error(513, "address mismatched: exactly one From required"));
    }
    let requester = &froms[0];
    if let Some(sender) = message.header.get("Sender") {
        let sender_addr = address::parse(sender).map_err(|_| smtp_error(513, "address mismatched"))?;
        if sender_addr != *requester {
            return Err(smtp_error(513, "address mismatched: Sender does not equal From"));
        }
    }

    // Membership-leak mitigation (spec §4.10/§7): SendJoinCheckback and
    // SendLeaveCheckback must give the same outward response whether or
    // not the requester is already in the target state, so the call site
    // never branches to a different SMTP code on membership alone — that
    // decision is folded into the checkback functions themselves.
    if command == "join" {
        if !list.public_signup {
            return Err(smtp_error(554, "unknown command"));
        }
        send_join_checkback(ctx, list, requester)?;
        return Ok(());
    }

    send_leave_checkback(ctx, list, requester)?;
    Ok(())
}

/// Sends a join checkback unless the requester is already a member.
/// Per spec §4.10/§7 ("membership inference"), the rate-limit table is
/// consulted and updated *before* the already-a-member short-circuit, so
/// that a repeated join request against an existing member costs the same
/// and answers the same (`Ok`) as one against a non-member — timing and
/// response code alike must not disclose current membership.
fn send_join_checkback(ctx: &SessionContext, list: &store::List, requester: &Address) -> Result<(), Error> {
    let addr_spec = requester.addr_spec();
    let list_addr = list.addr_spec();
    let already_member = ctx.store.get_membership(list.id, requester)?.member;

    let limited = ctx.rate_limiter.check(&addr_spec, &list_addr, checkback::Direction::Join);
    ctx.rate_limiter.record(&addr_spec, &list_addr, checkback::Direction::Join);

    if already_member {
        return Ok(());
    }
    if let Err(limited) = limited {
        return Err(smtp_error(451, &templates::rate_limited(&human_duration(limited.retry_after_secs))));
    }

    let (t, digest) = checkback::create_hmac(&list.hmac_key, &list_addr, Some(&addr_spec));
    let url = checkback::checkback_url(&ctx.web_url, checkback::Direction::Join, &list_addr, t, &digest, &addr_spec);
    let (subject, body) = templates::join_checkback(templates::JoinCheckback {
        list_display_or_local: list.display_or_local(),
        url: &url,
    });
    send_system_email(ctx, list, &addr_spec, &subject, &body)
}

/// Mirror of `send_join_checkback` for leaving: short-circuits to `Ok(())`
/// when the requester is not currently a member, after the same
/// consult-then-update rate-limit sequence.
fn send_leave_checkback(ctx: &SessionContext, list: &store::List, requester: &Address) -> Result<(), Error> {
    let addr_spec = requester.addr_spec();
    let list_addr = list.addr_spec();
    let is_member = ctx.store.get_membership(list.id, requester)?.member;

    let limited = ctx.rate_limiter.check(&addr_spec, &list_addr, checkback::Direction::Leave);
    ctx.rate_limiter.record(&addr_spec, &list_addr, checkback::Direction::Leave);

    if !is_member {
        return Ok(());
    }
    if let Err(limited) = limited {
        return Err(smtp_error(451, &templates::rate_limited(&human_duration(limited.retry_after_secs))));
    }

    let (t, digest) = checkback::create_hmac(&list.hmac_key, &list_addr, Some(&addr_spec));
    let url = checkback::checkback_url(&ctx.web_url, checkback::Direction::Leave, &list_addr, t, &digest, &addr_spec);
    let (subject, body) = templates::leave_checkback(templates::LeaveCheckback {
        list_display_or_local: list.display_or_local(),
        url: &url,
    });
    send_system_email(ctx, list, &addr_spec, &subject, &body)
}

fn human_duration(secs: u64) -> String {
    let days = secs / 86_400;
    if days >= 1 {
        format!("{days} day(s)")
    } else {
        format!("{} hour(s)", (secs / 3600).max(1))
    }
}

fn send_system_email(ctx: &SessionContext, list: &store::List, to_addr: &str, subject: &str, body: &str) -> Result<(), Error> {
    let header = format!(
        "From: \"{}\" <{}>\r\nTo: {}\r\nSubject: {}\r\n\r\n",
        list.display_or_local(),
        list.addr_spec(),
        to_addr,
        address::encode_mime_word(subject),
    );
    let envelope_from = format!("{}@{}", list.bounce_local(), list.domain);
    ctx.sink
        .send(&envelope_from, &[to_addr.to_string()], header.as_bytes(), body.as_bytes())
        .map_err(Error::from)
}

fn process_normal_message(ctx: &SessionContext, list: &store::List, froms: &[Address], message: &Message, log_id: u32) -> Result<(), Error> {
    let lookup = StoreLookup { store: &ctx.store, list_id: list.id };
    let spam_header = message.header.get("X-Spam-Status");
    let classification = classify(&lookup, &list.actions, froms, spam_header)?;

    trc::Event::new(trc::EventType::ClassifyResult)
        .with("list", list.addr_spec())
        .with("action", classification.action.as_str())
        .with("reason", classification.reason.clone())
        .with("log_id", log_id.to_string())
        .send();

    match classification.action {
        Action::Reject => Err(smtp_error(550, "no such user")),
        Action::Pass => {
            let receivers = ctx.store.receivers(list.id)?;
            let forward = build_forward(list, froms, message, &ctx.web_url, receivers.clone())?;
            ctx.sink
                .send(&forward.envelope_from, &receivers, &forward.header, &forward.body)
                .map_err(Error::from)?;
            Ok(())
        }
        Action::Moderate => {
            let mut full = Vec::new();
            common::message::serialize_header(&message.header, &mut full);
            full.extend_from_slice(b"\r\n");
            full.extend_from_slice(&message.body);
            ctx.spool.save(list.id, &full)?;

            if let Ok(notifieds) = ctx.store.notifieds(list.id) {
                let (subject, body) = templates::notify_moderators(list.display_or_local());
                for addr in notifieds {
                    if let Err(e) = send_system_email(ctx, list, &addr, &subject, &body) {
                        trc::Event::new(trc::EventType::SpoolNotifyFailed)
                            .with("list", list.addr_spec())
                            .with("log_id", log_id.to_string())
                            .at(trc::Level::Warn)
                            .send();
                        let _ = e;
                    }
                }
            }
            Ok(())
        }
    }
}

