//! Checkback tokens (C10): signed, time-bounded join/leave confirmation
//! links, plus the process-local rate limit that guards sending them. Kept
//! as its own crate the way the teacher keeps DKIM/ARC/SPF (all
//! HMAC/signature-shaped concerns) inside `mail-auth` rather than folding
//! them into `smtp` — this is a distinct signing concern from the LMTP
//! session and forwarder logic in `listmgr`.

use std::time::{SystemTime, UNIX_EPOCH};

use ahash::AHashMap;
use base64::Engine;
use hmac::{Hmac, Mac};
use parking_lot::Mutex;
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

pub const RATE_LIMIT_WINDOW_SECS: u64 = 7 * 86_400;

#[derive(Debug)]
pub struct ErrLink;

impl std::fmt::Display for ErrLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "invalid or expired link")
    }
}
impl std::error::Error for ErrLink {}

/// `HMAC-SHA256(key, list_addr_spec || 0 || [addr_spec || 0] || decimal_t)`.
/// `addr` is omitted (along with its separator byte) when absent.
fn digest(key: &[u8], list_addr_spec: &str, addr_spec: Option<&str>, t: u64) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC accepts any key length");
    mac.update(list_addr_spec.as_bytes());
    mac.update(&[0u8]);
    if let Some(addr) = addr_spec {
        mac.update(addr.as_bytes());
        mac.update(&[0u8]);
    }
    mac.update(t.to_string().as_bytes());
    mac.finalize().into_bytes().to_vec()
}

fn now_unix() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).expect("clock before epoch").as_secs()
}

fn b64url_nopad(bytes: &[u8]) -> String {
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes)
}

/// Generates a fresh `(t, digest)` pair for `list_addr_spec`/`addr_spec`
/// (addr may be absent).
pub fn create_hmac(key: &[u8], list_addr_spec: &str, addr_spec: Option<&str>) -> (u64, String) {
    let t = now_unix();
    let d = digest(key, list_addr_spec, addr_spec, t);
    trc::Event::new(trc::EventType::CheckbackSent)
        .with("list", list_addr_spec.to_string())
        .send();
    (t, b64url_nopad(&d))
}

/// Recomputes the digest and checks it in constant time, then checks the
/// token's age. Any failure collapses to the same opaque `ErrLink` so a
/// client can't distinguish a bad signature from an expired token.
pub fn validate_hmac(
    key: &[u8],
    list_addr_spec: &str,
    addr_spec: Option<&str>,
    t: u64,
    input_digest: &str,
    max_age_days: u64,
) -> Result<(), ErrLink> {
    let mut mac = HmacSha256::new_from_slice(key).map_err(|_| ErrLink)?;
    mac.update(list_addr_spec.as_bytes());
    mac.update(&[0u8]);
    if let Some(addr) = addr_spec {
        mac.update(addr.as_bytes());
        mac.update(&[0u8]);
    }
    mac.update(t.to_string().as_bytes());

    let result = (|| {
        let provided = base64::engine::general_purpose::URL_SAFE_NO_PAD
            .decode(input_digest)
            .map_err(|_| ErrLink)?;
        mac.verify_slice(&provided).map_err(|_| ErrLink)?;

        let now = now_unix();
        let max_age_secs = max_age_days.saturating_mul(86_400);
        if t > now || now.saturating_sub(t) > max_age_secs {
            return Err(ErrLink);
        }
        Ok(())
    })();

    match &result {
        Ok(()) => trc::Event::new(trc::EventType::CheckbackValidated).send(),
        Err(ErrLink) => trc::Event::new(trc::EventType::CheckbackRejected).send(),
    }
    result
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Join,
    Leave,
}

/// Process-local, mutex-guarded (recipient, list, direction) → last-sent
/// unix timestamp map. Loss across restarts only relaxes the rate limit,
/// never violates it, so it is never persisted.
#[derive(Default)]
pub struct RateLimiter {
    last_sent: Mutex<AHashMap<(String, String, Direction), u64>>,
}

pub struct RateLimited {
    pub retry_after_secs: u64,
}

impl RateLimiter {
    pub fn new() -> Self {
        RateLimiter::default()
    }

    /// Checks whether sending is currently rate-limited; does not record
    /// anything. `now - last_sent < window` is the correct predicate — the
    /// reversed form in the original source (`last_sent < now + window`) is
    /// always true and would never rate-limit anything.
    pub fn check(&self, addr_spec: &str, list_addr_spec: &str, direction: Direction) -> Result<(), RateLimited> {
        let now = now_unix();
        let guard = self.last_sent.lock();
        if let Some(&last) = guard.get(&(addr_spec.to_string(), list_addr_spec.to_string(), direction)) {
            let elapsed = now.saturating_sub(last);
            if elapsed < RATE_LIMIT_WINDOW_SECS {
                trc::Event::new(trc::EventType::CheckbackRateLimited)
                    .with("address", addr_spec.to_string())
                    .with("list", list_addr_spec.to_string())
                    .send();
                return Err(RateLimited {
                    retry_after_secs: RATE_LIMIT_WINDOW_SECS - elapsed,
                });
            }
        }
        Ok(())
    }

    pub fn record(&self, addr_spec: &str, list_addr_spec: &str, direction: Direction) {
        let now = now_unix();
        self.last_sent
            .lock()
            .insert((addr_spec.to_string(), list_addr_spec.to_string(), direction), now);
    }
}

/// Builds `<web_url>/{join|leave}/<escaped-list-addr>/<t>/<digest>/<escaped-user-addr>`.
pub fn checkback_url(web_url: &str, direction: Direction, list_addr_spec: &str, t: u64, digest: &str, user_addr_spec: &str) -> String {
    let verb = match direction {
        Direction::Join => "join",
        Direction::Leave => "leave",
    };
    let escaped_list = form_urlencoded::byte_serialize(list_addr_spec.as_bytes()).collect::<String>();
    let escaped_user = form_urlencoded::byte_serialize(user_addr_spec.as_bytes()).collect::<String>();
    format!("{web_url}/{verb}/{escaped_list}/{t}/{digest}/{escaped_user}")
}
