//! Text templates for the mail the system itself sends: checkback
//! confirmations, welcome/goodbye notices, and moderator notifications.
//! Per spec §9 these are meant to be pure functions of a small struct per
//! invocation, compiled once and held as immutable state — there being no
//! actual template *language* here (just `format!`), "compilation" is
//! trivial, but the shape (one function per template, no shared mutable
//! state) is kept so a real template engine could drop in later without
//! touching call sites.

pub struct JoinCheckback<'a> {
    pub list_display_or_local: &'a str,
    pub url: &'a str,
}

pub fn join_checkback(t: JoinCheckback) -> (String, String) {
    let subject = format!("Confirm joining \"{}\"", t.list_display_or_local);
    let body = format!(
        "You (or someone using your address) asked to join the mailing list \"{}\".\r\n\
         If this was you, confirm by visiting:\r\n\r\n{}\r\n\r\n\
         If you didn't request this, ignore this message.\r\n",
        t.list_display_or_local, t.url
    );
    (subject, body)
}

pub struct LeaveCheckback<'a> {
    pub list_display_or_local: &'a str,
    pub url: &'a str,
}

pub fn leave_checkback(t: LeaveCheckback) -> (String, String) {
    let subject = format!("Confirm leaving \"{}\"", t.list_display_or_local);
    let body = format!(
        "You (or someone using your address) asked to leave the mailing list \"{}\".\r\n\
         If this was you, confirm by visiting:\r\n\r\n{}\r\n\r\n\
         If you didn't request this, ignore this message.\r\n",
        t.list_display_or_local, t.url
    );
    (subject, body)
}

pub fn welcome(list_display_or_local: &str) -> (String, String) {
    let subject = format!("Welcome to \"{list_display_or_local}\"");
    let body = format!("You are now a member of the mailing list \"{list_display_or_local}\".\r\n");
    (subject, body)
}

pub fn goodbye(list_display_or_local: &str) -> (String, String) {
    let subject = format!("You have left \"{list_display_or_local}\"");
    let body = format!("You are no longer a member of the mailing list \"{list_display_or_local}\".\r\n");
    (subject, body)
}

pub fn notify_moderators(list_display_or_local: &str) -> (String, String) {
    let subject = format!("[{list_display_or_local}] A message needs moderation");
    let body = format!("A message to \"{list_display_or_local}\" is awaiting moderation.\r\n");
    (subject, body)
}

pub fn rate_limited(duration_human: &str) -> String {
    format!("Please wait {duration_human} before requesting this again.")
}
