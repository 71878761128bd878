//! The certificate and CRL table operations.
//!
//! Certificate ids are allocated in process as max-at-startup plus one;
//! a single writer per database is assumed. Every mutating statement on
//! a single certificate must touch exactly one row, anything else is
//! reported as a system failure and, where a transaction is open, rolled
//! back.

use std::sync::atomic::{AtomicI64, Ordering};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use log::debug;
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::commons::api::cert::{
    CertData, CertStatus, CrlReason, Name, RevocationInfo,
};
use crate::commons::crypto;
use crate::commons::error::{Error, ErrorKind};
use crate::commons::CmpdResult;
use crate::store::dialect::Dialect;
use crate::store::nameid::{CertBasedIdentityStore, NameIdStore};
use crate::store::records::{
    CertInfo, CertRecord, CertWithRevocationInfo, CrlInfo, Issuer, RevokedSerial,
};

//------------ Schema --------------------------------------------------------

const SCHEMA: &str = "\
    CREATE TABLE IF NOT EXISTS CA_IDENTITY (\
        ID INTEGER PRIMARY KEY, \
        SUBJECT TEXT NOT NULL, \
        CERT_FP TEXT NOT NULL UNIQUE, \
        CERT TEXT NOT NULL);\n\
    CREATE TABLE IF NOT EXISTS REQUESTOR (\
        ID INTEGER PRIMARY KEY, \
        NAME TEXT NOT NULL UNIQUE);\n\
    CREATE TABLE IF NOT EXISTS CA_USER (\
        ID INTEGER PRIMARY KEY, \
        NAME TEXT NOT NULL UNIQUE);\n\
    CREATE TABLE IF NOT EXISTS CERT_PROFILE (\
        ID INTEGER PRIMARY KEY, \
        NAME TEXT NOT NULL UNIQUE);\n\
    CREATE TABLE IF NOT EXISTS CERT (\
        ID INTEGER PRIMARY KEY, \
        LAST_UPDATE INTEGER NOT NULL, \
        SERIAL INTEGER NOT NULL, \
        SUBJECT TEXT NOT NULL, \
        NOT_BEFORE INTEGER NOT NULL, \
        NOT_AFTER INTEGER NOT NULL, \
        REVOKED INTEGER NOT NULL, \
        REV_REASON INTEGER, \
        REV_TIME INTEGER, \
        REV_INV_TIME INTEGER, \
        PROFILE_ID INTEGER NOT NULL, \
        CA_ID INTEGER NOT NULL, \
        REQUESTOR_ID INTEGER, \
        USER_ID INTEGER, \
        FP_PK TEXT NOT NULL, \
        FP_SUBJECT TEXT NOT NULL, \
        UNIQUE (CA_ID, SERIAL));\n\
    CREATE INDEX IF NOT EXISTS IDX_CERT_FP_SUBJECT \
        ON CERT (CA_ID, FP_SUBJECT);\n\
    CREATE INDEX IF NOT EXISTS IDX_CERT_FP_PK \
        ON CERT (CA_ID, FP_PK);\n\
    CREATE TABLE IF NOT EXISTS RAW_CERT (\
        CERT_ID INTEGER PRIMARY KEY, \
        FP TEXT NOT NULL, \
        CERT TEXT NOT NULL);\n\
    CREATE TABLE IF NOT EXISTS CRL (\
        ID INTEGER PRIMARY KEY AUTOINCREMENT, \
        CA_ID INTEGER NOT NULL, \
        CRL_NUMBER INTEGER, \
        THIS_UPDATE INTEGER NOT NULL, \
        NEXT_UPDATE INTEGER, \
        CRL TEXT NOT NULL);\n";

const CERT_COLUMNS: &str = "C.ID, C.SERIAL, C.SUBJECT, C.NOT_BEFORE, \
    C.NOT_AFTER, C.REVOKED, C.REV_REASON, C.REV_TIME, C.REV_INV_TIME, \
    C.PROFILE_ID, C.REQUESTOR_ID, C.USER_ID, C.FP_PK, C.FP_SUBJECT";

//------------ CertStore -----------------------------------------------------

pub struct CertStore {
    pool: Pool<SqliteConnectionManager>,
    dialect: Dialect,
    next_cert_id: AtomicI64,
    issuers: CertBasedIdentityStore,
    requestors: NameIdStore,
    users: NameIdStore,
    profiles: NameIdStore,
}

/// # Set up
impl CertStore {
    pub fn build(
        pool: Pool<SqliteConnectionManager>,
        dialect: Dialect,
    ) -> CmpdResult<Self> {
        let conn = pool.get()?;
        Self::init_schema(&conn)?;

        let issuers = CertBasedIdentityStore::load("CA_IDENTITY", &conn)?;
        let requestors = NameIdStore::load("REQUESTOR", &conn)?;
        let users = NameIdStore::load("CA_USER", &conn)?;
        let profiles = NameIdStore::load("CERT_PROFILE", &conn)?;

        let max_id: Option<i64> =
            conn.query_row("SELECT MAX(ID) FROM CERT", [], |row| row.get(0))?;
        drop(conn);

        Ok(CertStore {
            pool,
            dialect,
            next_cert_id: AtomicI64::new(max_id.unwrap_or(0) + 1),
            issuers,
            requestors,
            users,
            profiles,
        })
    }

    /// Creates all tables and indexes if they are not there yet.
    pub fn init_schema(conn: &Connection) -> CmpdResult<()> {
        conn.execute_batch(SCHEMA)?;
        Ok(())
    }

    fn conn(&self) -> CmpdResult<PooledConnection<SqliteConnectionManager>> {
        Ok(self.pool.get()?)
    }

    /// True if the database answers a trivial query.
    pub fn is_healthy(&self) -> bool {
        let healthy = self
            .conn()
            .and_then(|conn| {
                conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))
                    .map_err(Error::from)
            })
            .is_ok();
        if !healthy {
            debug!("certificate store health check failed");
        }
        healthy
    }
}

/// # Certificates
impl CertStore {
    /// Stores an issued certificate and returns its row id.
    pub fn add_certificate(
        &self,
        issuer: &Issuer,
        cert: &CertData,
        profile: &str,
        requestor: Option<&str>,
        user: Option<&str>,
    ) -> CmpdResult<i64> {
        let mut conn = self.conn()?;
        let ca_id = self.issuers.get_or_insert(&conn, issuer)?;
        let profile_id = self.profiles.get_or_insert(&conn, profile)?;
        let requestor_id = requestor
            .map(|name| self.requestors.get_or_insert(&conn, name))
            .transpose()?;
        let user_id = user
            .map(|name| self.users.get_or_insert(&conn, name))
            .transpose()?;

        let id = self.next_cert_id.fetch_add(1, Ordering::SeqCst);
        let fp_pk = crypto::sha1_hex(cert.public_key())?;
        let fp_subject = crypto::subject_fingerprint(cert.subject())?;
        let fp_cert = crypto::sha1_hex(cert.encoded())?;

        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO CERT (ID, LAST_UPDATE, SERIAL, SUBJECT, NOT_BEFORE, \
             NOT_AFTER, REVOKED, PROFILE_ID, CA_ID, REQUESTOR_ID, USER_ID, \
             FP_PK, FP_SUBJECT) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                id,
                Utc::now().timestamp(),
                cert.serial() as i64,
                cert.subject().as_str(),
                cert.not_before().timestamp(),
                cert.not_after().timestamp(),
                profile_id,
                ca_id,
                requestor_id,
                user_id,
                fp_pk,
                fp_subject
            ],
        )?;
        tx.execute(
            "INSERT INTO RAW_CERT (CERT_ID, FP, CERT) VALUES (?1, ?2, ?3)",
            params![id, fp_cert, BASE64.encode(cert.encoded())],
        )?;
        tx.commit()?;
        Ok(id)
    }

    pub fn get_cert_with_revocation_info(
        &self,
        issuer: &Issuer,
        serial: u64,
    ) -> CmpdResult<Option<CertWithRevocationInfo>> {
        let conn = self.conn()?;
        let ca_id = self.issuers.get_or_insert(&conn, issuer)?;
        self.cert_by_serial(&conn, ca_id, serial)
    }

    /// Like [`Self::get_cert_with_revocation_info`] but with the profile
    /// name resolved.
    pub fn get_certificate_info(
        &self,
        issuer: &Issuer,
        serial: u64,
    ) -> CmpdResult<Option<CertInfo>> {
        let found = self.get_cert_with_revocation_info(issuer, serial)?;
        match found {
            None => Ok(None),
            Some(cert) => {
                let profile =
                    self.profiles.name_for(cert.record.profile_id).ok_or_else(
                        || {
                            Error::database(format!(
                                "no profile with id {}",
                                cert.record.profile_id
                            ))
                        },
                    )?;
                Ok(Some(CertInfo {
                    record: cert.record,
                    encoded: cert.encoded,
                    profile,
                }))
            }
        }
    }

    /// The status of the newest certificate issued to a subject.
    pub fn cert_status_for_subject(
        &self,
        issuer: &Issuer,
        subject: &Name,
    ) -> CmpdResult<CertStatus> {
        let conn = self.conn()?;
        let ca_id = self.issuers.get_or_insert(&conn, issuer)?;
        let fp = crypto::subject_fingerprint(subject)?;
        let sql = self.dialect.fetch_first(
            "REVOKED FROM CERT WHERE CA_ID = ?1 AND FP_SUBJECT = ?2",
            1,
            Some("ID DESC"),
        );
        let revoked: Option<i64> = conn
            .query_row(&sql, params![ca_id, fp], |row| row.get(0))
            .optional()?;
        Ok(match revoked {
            None => CertStatus::Unknown,
            Some(0) => CertStatus::Good,
            Some(_) => CertStatus::Revoked,
        })
    }

    /// Row ids of all certificates bound to a public key.
    pub fn cert_ids_for_public_key(
        &self,
        issuer: &Issuer,
        spki: &[u8],
    ) -> CmpdResult<Vec<i64>> {
        let conn = self.conn()?;
        let ca_id = self.issuers.get_or_insert(&conn, issuer)?;
        let fp = crypto::sha1_hex(spki)?;
        let mut stmt = conn.prepare(
            "SELECT ID FROM CERT WHERE CA_ID = ?1 AND FP_PK = ?2 ORDER BY ID",
        )?;
        let rows = stmt.query_map(params![ca_id, fp], |row| row.get(0))?;
        let mut ids = Vec::new();
        for row in rows {
            ids.push(row?);
        }
        Ok(ids)
    }

    pub fn max_serial(&self, issuer: &Issuer) -> CmpdResult<Option<u64>> {
        let conn = self.conn()?;
        let ca_id = self.issuers.get_or_insert(&conn, issuer)?;
        let max: Option<i64> = conn.query_row(
            "SELECT MAX(SERIAL) FROM CERT WHERE CA_ID = ?1",
            params![ca_id],
            |row| row.get(0),
        )?;
        Ok(max.map(|serial| serial as u64))
    }

    /// Serial numbers starting at `start`, ascending, at most `limit`.
    /// With `not_expired_at` set, only certificates valid past that time.
    pub fn serial_numbers(
        &self,
        issuer: &Issuer,
        start: u64,
        limit: u32,
        not_expired_at: Option<DateTime<Utc>>,
    ) -> CmpdResult<Vec<u64>> {
        let conn = self.conn()?;
        let ca_id = self.issuers.get_or_insert(&conn, issuer)?;
        let start = start as i64 - 1;

        let mut serials = Vec::new();
        match not_expired_at {
            None => {
                let sql = self.dialect.fetch_first(
                    "SERIAL FROM CERT WHERE CA_ID = ?1 AND SERIAL > ?2",
                    limit,
                    Some("SERIAL"),
                );
                let mut stmt = conn.prepare(&sql)?;
                let rows = stmt
                    .query_map(params![ca_id, start], |row| row.get::<_, i64>(0))?;
                for row in rows {
                    serials.push(row? as u64);
                }
            }
            Some(cutoff) => {
                let sql = self.dialect.fetch_first(
                    "SERIAL FROM CERT WHERE CA_ID = ?1 AND SERIAL > ?2 \
                     AND NOT_AFTER > ?3",
                    limit,
                    Some("SERIAL"),
                );
                let mut stmt = conn.prepare(&sql)?;
                let rows = stmt.query_map(
                    params![ca_id, start, cutoff.timestamp()],
                    |row| row.get::<_, i64>(0),
                )?;
                for row in rows {
                    serials.push(row? as u64);
                }
            }
        }
        Ok(serials)
    }

    /// Revoked certificates for CRL generation, same pagination contract
    /// as [`Self::serial_numbers`].
    pub fn revoked_certs(
        &self,
        issuer: &Issuer,
        start: u64,
        limit: u32,
        not_expired_at: Option<DateTime<Utc>>,
    ) -> CmpdResult<Vec<RevokedSerial>> {
        let conn = self.conn()?;
        let ca_id = self.issuers.get_or_insert(&conn, issuer)?;
        let start = start as i64 - 1;

        let core = match not_expired_at {
            None => {
                "SERIAL, REV_REASON, REV_TIME, REV_INV_TIME FROM CERT \
                 WHERE CA_ID = ?1 AND REVOKED = 1 AND SERIAL > ?2"
            }
            Some(_) => {
                "SERIAL, REV_REASON, REV_TIME, REV_INV_TIME FROM CERT \
                 WHERE CA_ID = ?1 AND REVOKED = 1 AND SERIAL > ?2 \
                 AND NOT_AFTER > ?3"
            }
        };
        let sql = self.dialect.fetch_first(core, limit, Some("SERIAL"));
        let mut stmt = conn.prepare(&sql)?;

        let map_row = |row: &Row| -> rusqlite::Result<(i64, i64, i64, Option<i64>)> {
            Ok((
                row.get(0)?,
                row.get::<_, Option<i64>>(1)?.unwrap_or(0),
                row.get::<_, Option<i64>>(2)?.unwrap_or(0),
                row.get(3)?,
            ))
        };
        let mut raw = Vec::new();
        match not_expired_at {
            None => {
                let rows = stmt.query_map(params![ca_id, start], map_row)?;
                for row in rows {
                    raw.push(row?);
                }
            }
            Some(cutoff) => {
                let rows = stmt.query_map(
                    params![ca_id, start, cutoff.timestamp()],
                    map_row,
                )?;
                for row in rows {
                    raw.push(row?);
                }
            }
        }

        let mut revoked = Vec::new();
        for (serial, reason, rev_time, inv_time) in raw {
            revoked.push(RevokedSerial {
                serial: serial as u64,
                reason: CrlReason::from_code(reason as i32)
                    .unwrap_or(CrlReason::Unspecified),
                revoked_at: timestamp(rev_time)?,
                invalidity_at: inv_time.map(timestamp).transpose()?,
            });
        }
        Ok(revoked)
    }
}

/// # Revocation
impl CertStore {
    /// Marks a certificate revoked.
    ///
    /// A certificate on hold can move to any other reason without force;
    /// its original revocation and invalidity times are kept. Re-asserting
    /// the hold changes nothing. Revoking an already revoked certificate
    /// for any other reason requires `force`.
    pub fn revoke(
        &self,
        issuer: &Issuer,
        serial: u64,
        mut revocation: RevocationInfo,
        force: bool,
    ) -> CmpdResult<CertWithRevocationInfo> {
        let conn = self.conn()?;
        let ca_id = self.issuers.get_or_insert(&conn, issuer)?;
        let mut existing = self
            .cert_by_serial(&conn, ca_id, serial)?
            .ok_or_else(|| no_such_cert(serial))?;

        if let Some(current) = &existing.record.revocation {
            if current.is_hold() {
                if revocation.reason == CrlReason::CertificateHold {
                    return Ok(existing);
                }
                revocation.revoked_at = current.revoked_at;
                revocation.invalidity_at = current.invalidity_at;
            } else if !force {
                return Err(Error::cert_revoked(format!(
                    "certificate with serial {} is already revoked with \
                     reason {}",
                    serial, current.reason
                )));
            }
        }

        let count = conn.execute(
            "UPDATE CERT SET LAST_UPDATE = ?1, REVOKED = 1, REV_REASON = ?2, \
             REV_TIME = ?3, REV_INV_TIME = ?4 \
             WHERE CA_ID = ?5 AND SERIAL = ?6",
            params![
                Utc::now().timestamp(),
                revocation.reason.code(),
                revocation.revoked_at.timestamp(),
                revocation.invalidity_at.map(|t| t.timestamp()),
                ca_id,
                serial as i64
            ],
        )?;
        single_row(count)?;

        existing.record.revocation = Some(revocation);
        Ok(existing)
    }

    /// Clears the revocation of a certificate. Only holds can be lifted
    /// without `force`.
    pub fn unrevoke(
        &self,
        issuer: &Issuer,
        serial: u64,
        force: bool,
    ) -> CmpdResult<CertRecord> {
        let conn = self.conn()?;
        let ca_id = self.issuers.get_or_insert(&conn, issuer)?;
        let mut existing = self
            .cert_by_serial(&conn, ca_id, serial)?
            .ok_or_else(|| no_such_cert(serial))?;

        match &existing.record.revocation {
            None => {
                return Err(Error::new(
                    ErrorKind::CertUnrevoked,
                    format!("certificate with serial {serial} is not revoked"),
                ))
            }
            Some(current) => {
                if !current.is_hold() && !force {
                    return Err(Error::not_permitted(format!(
                        "cannot unrevoke certificate revoked with reason {}",
                        current.reason
                    )));
                }
            }
        }

        let count = conn.execute(
            "UPDATE CERT SET LAST_UPDATE = ?1, REVOKED = 0, REV_REASON = NULL, \
             REV_TIME = NULL, REV_INV_TIME = NULL \
             WHERE CA_ID = ?2 AND SERIAL = ?3",
            params![Utc::now().timestamp(), ca_id, serial as i64],
        )?;
        single_row(count)?;

        existing.record.revocation = None;
        Ok(existing.record)
    }

    /// Deletes a certificate record and its raw encoding.
    pub fn remove(&self, issuer: &Issuer, serial: u64) -> CmpdResult<CertRecord> {
        let mut conn = self.conn()?;
        let ca_id = self.issuers.get_or_insert(&conn, issuer)?;
        let existing = self
            .cert_by_serial(&conn, ca_id, serial)?
            .ok_or_else(|| no_such_cert(serial))?;

        let tx = conn.transaction()?;
        let count = tx.execute(
            "DELETE FROM CERT WHERE CA_ID = ?1 AND SERIAL = ?2",
            params![ca_id, serial as i64],
        )?;
        single_row(count)?;
        tx.execute(
            "DELETE FROM RAW_CERT WHERE CERT_ID = ?1",
            params![existing.record.id],
        )?;
        tx.commit()?;
        Ok(existing.record)
    }
}

/// # CRLs
impl CertStore {
    pub fn add_crl(&self, issuer: &Issuer, crl: &CrlInfo) -> CmpdResult<()> {
        let conn = self.conn()?;
        let ca_id = self.issuers.get_or_insert(&conn, issuer)?;
        conn.execute(
            "INSERT INTO CRL (CA_ID, CRL_NUMBER, THIS_UPDATE, NEXT_UPDATE, CRL) \
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                ca_id,
                crl.number.map(|n| n as i64),
                crl.this_update.timestamp(),
                crl.next_update.map(|t| t.timestamp()),
                BASE64.encode(&crl.encoded)
            ],
        )?;
        Ok(())
    }

    /// The next unused CRL number, starting at one.
    pub fn next_free_crl_number(&self, issuer: &Issuer) -> CmpdResult<u64> {
        let conn = self.conn()?;
        let ca_id = self.issuers.get_or_insert(&conn, issuer)?;
        let max: Option<i64> = conn.query_row(
            "SELECT MAX(CRL_NUMBER) FROM CRL WHERE CA_ID = ?1",
            params![ca_id],
            |row| row.get(0),
        )?;
        Ok(max.unwrap_or(0).max(0) as u64 + 1)
    }

    /// The CRL with the greatest thisUpdate.
    pub fn current_crl(&self, issuer: &Issuer) -> CmpdResult<Option<Bytes>> {
        let conn = self.conn()?;
        let ca_id = self.issuers.get_or_insert(&conn, issuer)?;
        let sql = self.dialect.fetch_first(
            "THIS_UPDATE, CRL FROM CRL WHERE CA_ID = ?1",
            1,
            Some("THIS_UPDATE DESC"),
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params![ca_id], |row| {
            Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
        })?;

        // Keep the true maximum even if the database hands back more
        // than the single requested row.
        let mut best: Option<(i64, String)> = None;
        for row in rows {
            let (this_update, crl) = row?;
            if best
                .as_ref()
                .map_or(true, |(best_update, _)| this_update > *best_update)
            {
                best = Some((this_update, crl));
            }
        }
        best.map(|(_, crl)| decode_stored(&crl)).transpose()
    }

    pub fn crl_by_number(
        &self,
        issuer: &Issuer,
        number: u64,
    ) -> CmpdResult<Option<Bytes>> {
        let conn = self.conn()?;
        let ca_id = self.issuers.get_or_insert(&conn, issuer)?;
        let encoded: Option<String> = conn
            .query_row(
                "SELECT CRL FROM CRL WHERE CA_ID = ?1 AND CRL_NUMBER = ?2",
                params![ca_id, number as i64],
                |row| row.get(0),
            )
            .optional()?;
        encoded.map(|crl| decode_stored(&crl)).transpose()
    }

    /// The thisUpdate time of the current CRL.
    pub fn this_update_of_current_crl(
        &self,
        issuer: &Issuer,
    ) -> CmpdResult<Option<DateTime<Utc>>> {
        let conn = self.conn()?;
        let ca_id = self.issuers.get_or_insert(&conn, issuer)?;
        let max: Option<i64> = conn.query_row(
            "SELECT MAX(THIS_UPDATE) FROM CRL WHERE CA_ID = ?1",
            params![ca_id],
            |row| row.get(0),
        )?;
        max.map(timestamp).transpose()
    }

    /// Deletes all but the newest `keep` CRLs, by CRL number. Returns how
    /// many were deleted.
    pub fn cleanup_crls(&self, issuer: &Issuer, keep: usize) -> CmpdResult<usize> {
        let conn = self.conn()?;
        let ca_id = self.issuers.get_or_insert(&conn, issuer)?;

        let mut stmt =
            conn.prepare("SELECT CRL_NUMBER FROM CRL WHERE CA_ID = ?1")?;
        let rows = stmt.query_map(params![ca_id], |row| {
            Ok(row.get::<_, Option<i64>>(0)?.unwrap_or(0))
        })?;
        let mut numbers = Vec::new();
        for row in rows {
            numbers.push(row?);
        }
        numbers.sort_unstable();

        if numbers.len() <= keep {
            return Ok(0);
        }
        let to_delete = numbers.len() - keep;
        let threshold = numbers[to_delete - 1];
        conn.execute(
            "DELETE FROM CRL WHERE CA_ID = ?1 AND CRL_NUMBER < ?2",
            params![ca_id, threshold + 1],
        )?;
        Ok(to_delete)
    }
}

/// # Internals
impl CertStore {
    fn cert_by_serial(
        &self,
        conn: &Connection,
        ca_id: i64,
        serial: u64,
    ) -> CmpdResult<Option<CertWithRevocationInfo>> {
        let sql = format!(
            "SELECT {CERT_COLUMNS}, R.CERT FROM CERT C \
             JOIN RAW_CERT R ON R.CERT_ID = C.ID \
             WHERE C.CA_ID = ?1 AND C.SERIAL = ?2"
        );
        let raw = conn
            .query_row(&sql, params![ca_id, serial as i64], raw_from_row)
            .optional()?;
        match raw {
            None => Ok(None),
            Some(raw) => Ok(Some(raw.into_cert()?)),
        }
    }
}

//------------ Row conversion ------------------------------------------------

struct RawCertRow {
    id: i64,
    serial: i64,
    subject: String,
    not_before: i64,
    not_after: i64,
    revoked: i64,
    rev_reason: Option<i64>,
    rev_time: Option<i64>,
    rev_inv_time: Option<i64>,
    profile_id: i64,
    requestor_id: Option<i64>,
    user_id: Option<i64>,
    fp_pk: String,
    fp_subject: String,
    encoded: String,
}

fn raw_from_row(row: &Row) -> rusqlite::Result<RawCertRow> {
    Ok(RawCertRow {
        id: row.get(0)?,
        serial: row.get(1)?,
        subject: row.get(2)?,
        not_before: row.get(3)?,
        not_after: row.get(4)?,
        revoked: row.get(5)?,
        rev_reason: row.get(6)?,
        rev_time: row.get(7)?,
        rev_inv_time: row.get(8)?,
        profile_id: row.get(9)?,
        requestor_id: row.get(10)?,
        user_id: row.get(11)?,
        fp_pk: row.get(12)?,
        fp_subject: row.get(13)?,
        encoded: row.get(14)?,
    })
}

impl RawCertRow {
    fn into_cert(self) -> CmpdResult<CertWithRevocationInfo> {
        let revocation = if self.revoked != 0 {
            Some(RevocationInfo {
                reason: CrlReason::from_code(
                    self.rev_reason.unwrap_or(0) as i32
                )
                .unwrap_or(CrlReason::Unspecified),
                revoked_at: timestamp(self.rev_time.unwrap_or(0))?,
                invalidity_at: self.rev_inv_time.map(timestamp).transpose()?,
            })
        } else {
            None
        };
        Ok(CertWithRevocationInfo {
            record: CertRecord {
                id: self.id,
                serial: self.serial as u64,
                subject: Name::new(self.subject),
                not_before: timestamp(self.not_before)?,
                not_after: timestamp(self.not_after)?,
                profile_id: self.profile_id,
                requestor_id: self.requestor_id,
                user_id: self.user_id,
                public_key_fingerprint: self.fp_pk,
                subject_fingerprint: self.fp_subject,
                revocation,
            },
            encoded: decode_stored(&self.encoded)?,
        })
    }
}

//------------ Helpers -------------------------------------------------------

fn timestamp(secs: i64) -> CmpdResult<DateTime<Utc>> {
    DateTime::from_timestamp(secs, 0)
        .ok_or_else(|| Error::database(format!("invalid timestamp {secs}")))
}

fn decode_stored(text: &str) -> CmpdResult<Bytes> {
    BASE64
        .decode(text)
        .map(Bytes::from)
        .map_err(|e| Error::database(format!("corrupt stored encoding: {e}")))
}

fn single_row(count: usize) -> CmpdResult<()> {
    if count == 1 {
        Ok(())
    } else {
        Err(Error::system(format!(
            "expected exactly one row modified, got {count}"
        )))
    }
}

fn no_such_cert(serial: u64) -> Error {
    Error::unknown_cert(format!("no certificate with serial {serial}"))
}

//============ Tests =========================================================
