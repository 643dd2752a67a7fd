use std::path::Path;

use common::Address;
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rand::RngCore;
use rusqlite::{params, OptionalExtension};

use crate::{
    model::{Action, Actions, List, Membership, MembershipInfo},
    schema::DDL,
    StoreError, BATCH_LIMIT, HMAC_KEY_LEN,
};

pub struct SqliteStore {
    pool: Pool<SqliteConnectionManager>,
}

impl SqliteStore {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let manager = SqliteConnectionManager::file(path);
        let pool = Pool::new(manager)?;
        pool.get()?.execute_batch(DDL)?;
        Ok(SqliteStore { pool })
    }

    pub fn is_list(&self, addr: &Address) -> Result<bool, StoreError> {
        Ok(self.get_list(addr)?.is_some())
    }

    pub fn get_list(&self, addr: &Address) -> Result<Option<List>, StoreError> {
        let conn = self.pool.get()?;
        conn.query_row(
            "SELECT id, display, local, domain, hmac_key, public_signup, hide_from, \
             action_mod, action_member, action_known, action_unknown \
             FROM list WHERE local = ?1 AND domain = ?2",
            params![addr.local, addr.domain],
            row_to_list,
        )
        .optional()
        .map_err(StoreError::from)
    }

    pub fn get_list_by_id(&self, id: i64) -> Result<Option<List>, StoreError> {
        let conn = self.pool.get()?;
        conn.query_row(
            "SELECT id, display, local, domain, hmac_key, public_signup, hide_from, \
             action_mod, action_member, action_known, action_unknown \
             FROM list WHERE id = ?1",
            params![id],
            row_to_list,
        )
        .optional()
        .map_err(StoreError::from)
    }

    /// Generates a fresh 32-byte HMAC key and inserts a new list row.
    /// Rejects bounce-suffixed local parts.
    pub fn create(&self, addr: &Address, display: &str) -> Result<List, StoreError> {
        if addr.is_bounce_address() {
            return Err(StoreError::BounceSuffixedAddress);
        }
        let mut key = vec![0u8; HMAC_KEY_LEN];
        rand::thread_rng().fill_bytes(&mut key);

        let conn = self.pool.get()?;
        conn.execute(
            "INSERT INTO list (display, local, domain, hmac_key, public_signup, hide_from, \
             action_mod, action_member, action_known, action_unknown) \
             VALUES (?1, ?2, ?3, ?4, 0, 0, 'pass', 'pass', 'moderate', 'reject')",
            params![display, addr.local, addr.domain, key],
        )?;
        let id = conn.last_insert_rowid();
        self.get_list_by_id(id)?.ok_or(StoreError::NotFound)
    }

    pub fn update(&self, list: &List) -> Result<(), StoreError> {
        let conn = self.pool.get()?;
        conn.execute(
            "UPDATE list SET display = ?1, public_signup = ?2, hide_from = ?3, \
             action_mod = ?4, action_member = ?5, action_known = ?6, action_unknown = ?7 \
             WHERE id = ?8",
            params![
                list.display,
                list.public_signup,
                list.hide_from,
                list.actions.moderator.as_str(),
                list.actions.member.as_str(),
                list.actions.known.as_str(),
                list.actions.unknown.as_str(),
                list.id,
            ],
        )?;
        Ok(())
    }

    /// Deletes the list row, its memberships, and its knowns in one
    /// transaction.
    pub fn delete(&self, list_id: i64) -> Result<(), StoreError> {
        let mut conn = self.pool.get()?;
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM member WHERE list = ?1", params![list_id])?;
        tx.execute("DELETE FROM known WHERE list = ?1", params![list_id])?;
        tx.execute("DELETE FROM list WHERE id = ?1", params![list_id])?;
        tx.commit()?;
        Ok(())
    }

    pub fn get_membership(&self, list_id: i64, addr: &Address) -> Result<MembershipInfo, StoreError> {
        let conn = self.pool.get()?;
        let row: Option<(bool, bool, bool)> = conn
            .query_row(
                "SELECT moderate, notify, admin FROM member WHERE list = ?1 AND address = ?2",
                params![list_id, addr.addr_spec()],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()?;
        Ok(match row {
            Some((moderate, notify, admin)) => MembershipInfo {
                member: true,
                moderate,
                notify,
                admin,
            },
            None => MembershipInfo::default(),
        })
    }

    pub fn members(&self, list_id: i64) -> Result<Vec<String>, StoreError> {
        self.addresses_where(list_id, "1")
    }

    pub fn receivers(&self, list_id: i64) -> Result<Vec<String>, StoreError> {
        self.addresses_where(list_id, "receive = 1")
    }

    pub fn notifieds(&self, list_id: i64) -> Result<Vec<String>, StoreError> {
        self.addresses_where(list_id, "notify = 1")
    }

    pub fn admins(&self, list_id: i64) -> Result<Vec<String>, StoreError> {
        self.addresses_where(list_id, "admin = 1")
    }

    fn addresses_where(&self, list_id: i64, predicate: &str) -> Result<Vec<String>, StoreError> {
        let conn = self.pool.get()?;
        let sql = format!("SELECT address FROM member WHERE list = ?1 AND {predicate} ORDER BY address ASC");
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params![list_id], |row| row.get::<_, String>(0))?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    pub fn knowns(&self, list_id: i64) -> Result<Vec<String>, StoreError> {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare("SELECT address FROM known WHERE list = ?1 ORDER BY address ASC")?;
        let rows = stmt.query_map(params![list_id], |row| row.get::<_, String>(0))?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    /// Adds `addresses` as members of `list` with the given flags, skipping
    /// the list's own address (an attempt to subscribe a list to itself is
    /// silently dropped from the batch, with an alert logged, rather than
    /// failing the whole call). Returns the addresses actually inserted.
    pub fn add_members(&self, list: &List, addresses: &[Address], flags: Membership) -> Result<Vec<String>, StoreError> {
        if addresses.len() > BATCH_LIMIT {
            return Err(StoreError::BatchTooLarge {
                got: addresses.len(),
                limit: BATCH_LIMIT,
            });
        }
        let own = list.addr_spec();
        let mut conn = self.pool.get()?;
        let tx = conn.transaction()?;
        let mut affected = Vec::new();
        for addr in addresses {
            let spec = addr.addr_spec();
            if spec.eq_ignore_ascii_case(&own) {
                trc::Event::new(trc::EventType::StoreError)
                    .with("list", own.clone())
                    .with("address", spec.clone())
                    .at(trc::Level::Warn)
                    .send();
                continue;
            }
            let changed = tx.execute(
                "INSERT OR IGNORE INTO member (list, address, receive, moderate, notify, admin) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![list.id, spec, flags.receive, flags.moderate, flags.notify, flags.admin],
            )?;
            if changed > 0 {
                affected.push(spec);
            }
        }
        tx.commit()?;
        Ok(affected)
    }

    pub fn remove_members(&self, list_id: i64, addresses: &[Address]) -> Result<Vec<String>, StoreError> {
        if addresses.len() > BATCH_LIMIT {
            return Err(StoreError::BatchTooLarge {
                got: addresses.len(),
                limit: BATCH_LIMIT,
            });
        }
        let mut conn = self.pool.get()?;
        let tx = conn.transaction()?;
        let mut affected = Vec::new();
        for addr in addresses {
            let spec = addr.addr_spec();
            let changed = tx.execute(
                "DELETE FROM member WHERE list = ?1 AND address = ?2",
                params![list_id, spec],
            )?;
            if changed > 0 {
                affected.push(spec);
            }
        }
        tx.commit()?;
        Ok(affected)
    }

    pub fn add_knowns(&self, list: &List, addresses: &[Address]) -> Result<Vec<String>, StoreError> {
        if addresses.len() > BATCH_LIMIT {
            return Err(StoreError::BatchTooLarge {
                got: addresses.len(),
                limit: BATCH_LIMIT,
            });
        }
        let own = list.addr_spec();
        let mut conn = self.pool.get()?;
        let tx = conn.transaction()?;
        let mut affected = Vec::new();
        for addr in addresses {
            let spec = addr.addr_spec();
            if spec.eq_ignore_ascii_case(&own) {
                continue;
            }
            let changed = tx.execute(
                "INSERT OR IGNORE INTO known (list, address) VALUES (?1, ?2)",
                params![list.id, spec],
            )?;
            if changed > 0 {
                affected.push(spec);
            }
        }
        tx.commit()?;
        Ok(affected)
    }

    pub fn remove_knowns(&self, list_id: i64, addresses: &[Address]) -> Result<Vec<String>, StoreError> {
        if addresses.len() > BATCH_LIMIT {
            return Err(StoreError::BatchTooLarge {
                got: addresses.len(),
                limit: BATCH_LIMIT,
            });
        }
        let mut conn = self.pool.get()?;
        let tx = conn.transaction()?;
        let mut affected = Vec::new();
        for addr in addresses {
            let spec = addr.addr_spec();
            let changed = tx.execute(
                "DELETE FROM known WHERE list = ?1 AND address = ?2",
                params![list_id, spec],
            )?;
            if changed > 0 {
                affected.push(spec);
            }
        }
        tx.commit()?;
        Ok(affected)
    }
}

fn row_to_list(row: &rusqlite::Row<'_>) -> rusqlite::Result<List> {
    Ok(List {
        id: row.get(0)?,
        display: row.get(1)?,
        local: row.get(2)?,
        domain: row.get(3)?,
        hmac_key: row.get(4)?,
        public_signup: row.get(5)?,
        hide_from: row.get(6)?,
        actions: Actions {
            moderator: Action::parse(&row.get::<_, String>(7)?).unwrap_or(Action::Pass),
            member: Action::parse(&row.get::<_, String>(8)?).unwrap_or(Action::Pass),
            known: Action::parse(&row.get::<_, String>(9)?).unwrap_or(Action::Moderate),
            unknown: Action::parse(&row.get::<_, String>(10)?).unwrap_or(Action::Reject),
        },
    })
}
