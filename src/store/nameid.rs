//! Interning names and issuer certificates to numeric ids.
//!
//! Both stores are write-through caches over small tables. Ids are
//! allocated as max-in-cache plus one under the write lock; a unique
//! constraint on the natural key catches the race with another process
//! writing the same name, in which case the existing row wins.

use std::collections::HashMap;
use std::sync::RwLock;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use rusqlite::{params, Connection, OptionalExtension};

use crate::commons::crypto;
use crate::commons::CmpdResult;
use crate::store::records::Issuer;

//------------ NameIdStore ---------------------------------------------------

/// Maps plain names (requestors, users, profiles) to ids in one table.
#[derive(Debug)]
pub struct NameIdStore {
    table: &'static str,
    cache: RwLock<HashMap<String, i64>>,
}

impl NameIdStore {
    /// Loads the full table into the cache.
    pub fn load(table: &'static str, conn: &Connection) -> CmpdResult<Self> {
        let mut cache = HashMap::new();
        let mut stmt = conn.prepare(&format!("SELECT ID, NAME FROM {table}"))?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
        })?;
        for row in rows {
            let (id, name) = row?;
            cache.insert(name, id);
        }
        Ok(NameIdStore {
            table,
            cache: RwLock::new(cache),
        })
    }

    pub fn id_for(&self, name: &str) -> Option<i64> {
        self.cache.read().unwrap().get(name).copied()
    }

    pub fn name_for(&self, id: i64) -> Option<String> {
        self.cache
            .read()
            .unwrap()
            .iter()
            .find(|(_, cached)| **cached == id)
            .map(|(name, _)| name.clone())
    }

    /// Returns the id for `name`, inserting a fresh row if necessary.
    pub fn get_or_insert(&self, conn: &Connection, name: &str) -> CmpdResult<i64> {
        if let Some(id) = self.id_for(name) {
            return Ok(id);
        }
        let mut cache = self.cache.write().unwrap();
        if let Some(id) = cache.get(name) {
            return Ok(*id);
        }

        let id = cache.values().max().copied().unwrap_or(0) + 1;
        let insert =
            format!("INSERT INTO {} (ID, NAME) VALUES (?1, ?2)", self.table);
        match conn.execute(&insert, params![id, name]) {
            Ok(_) => {
                cache.insert(name.to_string(), id);
                Ok(id)
            }
            Err(e) => {
                // Another writer may have claimed the name.
                let select =
                    format!("SELECT ID FROM {} WHERE NAME = ?1", self.table);
                let existing: Option<i64> = conn
                    .query_row(&select, params![name], |row| row.get(0))
                    .optional()?;
                match existing {
                    Some(id) => {
                        cache.insert(name.to_string(), id);
                        Ok(id)
                    }
                    None => Err(e.into()),
                }
            }
        }
    }
}

//------------ CertBasedIdentityStore ----------------------------------------

/// Maps issuer certificates to ids, keyed by certificate fingerprint.
#[derive(Debug)]
pub struct CertBasedIdentityStore {
    table: &'static str,
    cache: RwLock<HashMap<String, i64>>,
}

impl CertBasedIdentityStore {
    pub fn load(table: &'static str, conn: &Connection) -> CmpdResult<Self> {
        let mut cache = HashMap::new();
        let mut stmt =
            conn.prepare(&format!("SELECT ID, CERT_FP FROM {table}"))?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
        })?;
        for row in rows {
            let (id, fingerprint) = row?;
            cache.insert(fingerprint, id);
        }
        Ok(CertBasedIdentityStore {
            table,
            cache: RwLock::new(cache),
        })
    }

    pub fn get_or_insert(
        &self,
        conn: &Connection,
        issuer: &Issuer,
    ) -> CmpdResult<i64> {
        let fingerprint = crypto::sha1_hex(&issuer.encoded)?;
        if let Some(id) = self.cache.read().unwrap().get(&fingerprint) {
            return Ok(*id);
        }
        let mut cache = self.cache.write().unwrap();
        if let Some(id) = cache.get(&fingerprint) {
            return Ok(*id);
        }

        let id = cache.values().max().copied().unwrap_or(0) + 1;
        let insert = format!(
            "INSERT INTO {} (ID, SUBJECT, CERT_FP, CERT) VALUES (?1, ?2, ?3, ?4)",
            self.table
        );
        match conn.execute(
            &insert,
            params![
                id,
                issuer.subject.as_str(),
                fingerprint,
                BASE64.encode(&issuer.encoded)
            ],
        ) {
            Ok(_) => {
                cache.insert(fingerprint, id);
                Ok(id)
            }
            Err(e) => {
                let select = format!(
                    "SELECT ID FROM {} WHERE CERT_FP = ?1",
                    self.table
                );
                let existing: Option<i64> = conn
                    .query_row(&select, params![fingerprint], |row| row.get(0))
                    .optional()?;
                match existing {
                    Some(id) => {
                        cache.insert(fingerprint, id);
                        Ok(id)
                    }
                    None => Err(e.into()),
                }
            }
        }
    }
}

//============ Tests =========================================================
