pub const DDL: &str = r#"
CREATE TABLE IF NOT EXISTS list (
    id              INTEGER PRIMARY KEY AUTOINCREMENT,
    display         TEXT NOT NULL,
    local           TEXT NOT NULL,
    domain          TEXT NOT NULL,
    hmac_key        BLOB NOT NULL,
    public_signup   INTEGER NOT NULL DEFAULT 0,
    hide_from       INTEGER NOT NULL DEFAULT 0,
    action_mod      TEXT NOT NULL DEFAULT 'pass',
    action_member   TEXT NOT NULL DEFAULT 'pass',
    action_known    TEXT NOT NULL DEFAULT 'moderate',
    action_unknown  TEXT NOT NULL DEFAULT 'reject',
    UNIQUE (local, domain)
);

CREATE TABLE IF NOT EXISTS member (
    list        INTEGER NOT NULL REFERENCES list(id) ON DELETE CASCADE,
    address     TEXT NOT NULL,
    receive     INTEGER NOT NULL DEFAULT 1,
    moderate    INTEGER NOT NULL DEFAULT 0,
    notify      INTEGER NOT NULL DEFAULT 0,
    admin       INTEGER NOT NULL DEFAULT 0,
    UNIQUE (list, address)
);

CREATE TABLE IF NOT EXISTS known (
    list        INTEGER NOT NULL REFERENCES list(id) ON DELETE CASCADE,
    address     TEXT NOT NULL,
    UNIQUE (list, address)
);

CREATE INDEX IF NOT EXISTS member_list_idx ON member(list);
CREATE INDEX IF NOT EXISTS known_list_idx ON known(list);
"#;
