//! Voter registry: the credential-issuance state machine.
//!
//! Owns the single SQLite store shared with the issuer [`crate::keystore`]:
//! `eligible_voters`, `voters`, and `issuer_keys`. Enforces that a voter
//! moves at most once from eligible to token-issued, and that the blind
//! signature it hands back is never retained after the call returns.

use std::fs;
use std::path::Path;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use rsa::RsaPublicKey;
use sqlx::{Row, SqlitePool};

use crate::crypto;
use crate::keystore::{self, Keystore};

pub use keystore::{decode_private_key_pem, decode_public_key_pem};

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("voter_id must match [A-Za-z0-9_]+")]
    MalformedVoterId,
    #[error("malformed input: {0}")]
    MalformedInput(String),
    #[error("voter is not in the eligible set")]
    NotEligible,
    #[error("a token has already been issued to this voter")]
    AlreadyIssued,
    #[error(transparent)]
    Keystore(#[from] keystore::Error),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}
pub type Result<T> = std::result::Result<T, Error>;

/// Registration status for one voter, as surfaced to the caller.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct StatusRecord {
    pub voter_id: String,
    pub eligible: bool,
    pub registered: bool,
    pub token_issued: bool,
    pub registered_at: Option<String>,
    pub token_issued_at: Option<String>,
}

fn validate_voter_id(voter_id: &str) -> Result<()> {
    if !voter_id.is_empty()
        && voter_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
    {
        Ok(())
    } else {
        Err(Error::MalformedVoterId)
    }
}

pub struct Registry {
    pool: SqlitePool,
    keystore: Keystore,
}

impl Registry {
    /// Open (creating if absent) the registry database at `db_path`, along
    /// with its embedded issuer-keys table.
    pub async fn open(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            fs::create_dir_all(parent)?;
        }
        if !db_path.exists() {
            fs::File::create(db_path)?;
        }

        let db_url = format!("sqlite://{}", db_path.display());
        let pool = SqlitePool::connect(&db_url).await?;

        Self::create_tables(&pool).await?;
        Keystore::create_table(&pool).await?;

        let keystore = Keystore::new(pool.clone());
        Ok(Self { pool, keystore })
    }

    async fn create_tables(pool: &SqlitePool) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS eligible_voters (
                voter_id TEXT PRIMARY KEY
            )
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS voters (
                voter_id        TEXT PRIMARY KEY,
                registered_at   TEXT NOT NULL,
                token_issued    INTEGER NOT NULL DEFAULT 0,
                token_issued_at TEXT
            )
            "#,
        )
        .execute(pool)
        .await?;

        Ok(())
    }

    /// Insert-ignore a batch of eligible voter ids. Idempotent.
    pub async fn seed_eligible<S: AsRef<str>>(&self, voter_ids: &[S]) -> Result<()> {
        for voter_id in voter_ids {
            sqlx::query("INSERT OR IGNORE INTO eligible_voters (voter_id) VALUES (?)")
                .bind(voter_id.as_ref())
                .execute(&self.pool)
                .await?;
        }
        Ok(())
    }

    /// Bootstrap (lazily creating if necessary) the issuer keypair and
    /// return its public key in PEM. Call this once at startup so later
    /// `issuer_public_key` reads never need to mutate state.
    pub async fn bootstrap_keys(&self) -> Result<String> {
        let (_priv_pem, pub_pem) = self.keystore.get_or_create_keys().await?;
        Ok(pub_pem)
    }

    /// Read-only: the issuer's public key in PEM, or `Uninitialized` if
    /// `bootstrap_keys` has never run.
    pub async fn issuer_public_key(&self) -> Result<String> {
        Ok(self.keystore.get_public_key().await?)
    }

    pub async fn issuer_public_key_decoded(&self) -> Result<RsaPublicKey> {
        let pem = self.issuer_public_key().await?;
        Ok(decode_public_key_pem(&pem)?)
    }

    async fn is_eligible(&self, voter_id: &str) -> Result<bool> {
        let row = sqlx::query("SELECT 1 FROM eligible_voters WHERE voter_id = ?")
            .bind(voter_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }

    async fn has_token_issued(&self, voter_id: &str) -> Result<bool> {
        let row = sqlx::query("SELECT token_issued FROM voters WHERE voter_id = ?")
            .bind(voter_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| r.get::<i64, _>("token_issued") != 0).unwrap_or(false))
    }

    /// The atomic one-shot claim: ensure a row exists, then flip
    /// `token_issued` from 0 to 1. Returns `true` iff *this* call won the
    /// race, the authoritative answer to "am I the one who gets to issue".
    async fn try_claim_token(&self, voter_id: &str) -> Result<bool> {
        let now = chrono::Utc::now().to_rfc3339();

        sqlx::query("INSERT OR IGNORE INTO voters (voter_id, registered_at) VALUES (?, ?)")
            .bind(voter_id)
            .bind(&now)
            .execute(&self.pool)
            .await?;

        let result = sqlx::query(
            "UPDATE voters SET token_issued = 1, token_issued_at = ? \
             WHERE voter_id = ? AND token_issued = 0",
        )
        .bind(&now)
        .bind(voter_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Issue a blind signature over `blinded_b64` for `voter_id`, enforcing
    /// eligibility and one-shot issuance. On success, the blinded input and
    /// the signature are not retained past this call returning.
    pub async fn issue_token(&self, voter_id: &str, blinded_b64: &str) -> Result<String> {
        validate_voter_id(voter_id)?;

        if !self.is_eligible(voter_id).await? {
            return Err(Error::NotEligible);
        }
        if self.has_token_issued(voter_id).await? {
            return Err(Error::AlreadyIssued);
        }

        let blinded_bytes = BASE64
            .decode(blinded_b64)
            .map_err(|e| Error::MalformedInput(e.to_string()))?;

        let (priv_pem, _pub_pem) = self.keystore.get_or_create_keys().await?;
        let priv_key = decode_private_key_pem(&priv_pem)?;

        let blind_sig = crypto::blind_sign(&blinded_bytes, &priv_key);
        let blind_sig_b64 = crypto::int_to_b64(&blind_sig);

        if !self.try_claim_token(voter_id).await? {
            // Lost the race to a concurrent call for the same voter_id.
            // The signature we just computed is discarded, never stored
            // or logged (step 7 of the issuance contract).
            return Err(Error::AlreadyIssued);
        }

        log::info!("blind signature issued to voter");
        Ok(blind_sig_b64)
    }

    pub async fn voter_status(&self, voter_id: &str) -> Result<StatusRecord> {
        let eligible = self.is_eligible(voter_id).await?;

        let row = sqlx::query(
            "SELECT registered_at, token_issued, token_issued_at FROM voters WHERE voter_id = ?",
        )
        .bind(voter_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(match row {
            Some(row) => StatusRecord {
                voter_id: voter_id.to_string(),
                eligible,
                registered: true,
                token_issued: row.get::<i64, _>("token_issued") != 0,
                registered_at: row.get("registered_at"),
                token_issued_at: row.get("token_issued_at"),
            },
            None => StatusRecord {
                voter_id: voter_id.to_string(),
                eligible,
                registered: false,
                token_issued: false,
                registered_at: None,
                token_issued_at: None,
            },
        })
    }
}
