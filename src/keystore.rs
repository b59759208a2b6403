//! Issuer keystore: a single persisted RSA keypair.
//!
//! One row, lazily created on first bootstrap, loaded thereafter. Mirrors
//! the single-row `issuer_keys` table convention this codebase already uses
//! for per-election secrets, but keyed to a fixed row id since there is
//! exactly one election instance per deployment.

use rand::rngs::OsRng;
use rsa::pkcs1::{DecodeRsaPrivateKey, DecodeRsaPublicKey, EncodeRsaPrivateKey, EncodeRsaPublicKey, LineEnding};
use rsa::{RsaPrivateKey, RsaPublicKey};
use sqlx::{Row, SqlitePool};
use tokio::sync::Mutex;

use crate::crypto::KEY_SIZE_BITS;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("issuer keys have not been initialized")]
    Uninitialized,
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("RSA key generation failed: {0}")]
    KeyGen(#[from] rsa::Error),
    #[error("RSA key (de)serialization failed: {0}")]
    Encoding(#[from] rsa::pkcs1::Error),
}
pub type Result<T> = std::result::Result<T, Error>;

/// Decode a PKCS#1 PEM-encoded RSA public key.
pub fn decode_public_key_pem(pem: &str) -> Result<RsaPublicKey> {
    Ok(RsaPublicKey::from_pkcs1_pem(pem)?)
}

/// Decode a PKCS#1 PEM-encoded RSA private key.
pub fn decode_private_key_pem(pem: &str) -> Result<RsaPrivateKey> {
    Ok(RsaPrivateKey::from_pkcs1_pem(pem)?)
}

fn generate_keypair() -> Result<(RsaPrivateKey, RsaPublicKey)> {
    let mut rng = OsRng;
    let priv_key = RsaPrivateKey::new(&mut rng, KEY_SIZE_BITS)?;
    let pub_key = RsaPublicKey::from(&priv_key);
    Ok((priv_key, pub_key))
}

fn encode_pem(priv_key: &RsaPrivateKey, pub_key: &RsaPublicKey) -> Result<(String, String)> {
    let priv_pem = priv_key.to_pkcs1_pem(LineEnding::LF)?.to_string();
    let pub_pem = pub_key.to_pkcs1_pem(LineEnding::LF)?;
    Ok((priv_pem, pub_pem))
}

/// Single-row persistent store for the issuer's RSA keypair.
pub struct Keystore {
    pool: SqlitePool,
    /// Guards the generate-then-insert sequence so two concurrent
    /// first-bootstrap callers never generate two competing keypairs.
    init_lock: Mutex<()>,
}

impl Keystore {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            init_lock: Mutex::new(()),
        }
    }

    pub async fn create_table(pool: &SqlitePool) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS issuer_keys (
                id          INTEGER PRIMARY KEY CHECK (id = 1),
                private_key TEXT NOT NULL,
                public_key  TEXT NOT NULL,
                created_at  TEXT NOT NULL
            )
            "#,
        )
        .execute(pool)
        .await?;
        Ok(())
    }

    async fn read_row(&self) -> Result<Option<(String, String)>> {
        let row = sqlx::query("SELECT private_key, public_key FROM issuer_keys WHERE id = 1")
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| (r.get("private_key"), r.get("public_key"))))
    }

    /// Return the existing keypair, or generate, persist and return a fresh
    /// one if none exists yet. Never regenerates once a row is present.
    pub async fn get_or_create_keys(&self) -> Result<(String, String)> {
        if let Some(pair) = self.read_row().await? {
            return Ok(pair);
        }

        let _guard = self.init_lock.lock().await;
        // Re-check: another task may have won the race while we waited.
        if let Some(pair) = self.read_row().await? {
            return Ok(pair);
        }

        log::info!("generating issuer RSA keypair ({KEY_SIZE_BITS}-bit)");
        let (priv_key, pub_key) = generate_keypair()?;
        let (priv_pem, pub_pem) = encode_pem(&priv_key, &pub_key)?;
        let created_at = chrono::Utc::now().to_rfc3339();

        sqlx::query(
            "INSERT INTO issuer_keys (id, private_key, public_key, created_at) \
             VALUES (1, ?, ?, ?) ON CONFLICT(id) DO NOTHING",
        )
        .bind(&priv_pem)
        .bind(&pub_pem)
        .bind(&created_at)
        .execute(&self.pool)
        .await?;

        log::info!("issuer keypair persisted");
        // Re-read rather than trust our own values, in case the insert lost
        // a race against a concurrent process with the same database.
        self.read_row().await?.ok_or(Error::Uninitialized)
    }

    /// Read the public key without ever generating one.
    pub async fn get_public_key(&self) -> Result<String> {
        self.read_row()
            .await?
            .map(|(_, public_key)| public_key)
            .ok_or(Error::Uninitialized)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::NamedTempFile;

    async fn open_pool() -> (SqlitePool, NamedTempFile) {
        let temp_file = NamedTempFile::new().unwrap();
        fs::File::create(temp_file.path()).unwrap();
        let db_url = format!("sqlite://{}", temp_file.path().display());
        let pool = SqlitePool::connect(&db_url).await.unwrap();
        Keystore::create_table(&pool).await.unwrap();
        (pool, temp_file)
    }

    #[tokio::test]
    async fn get_public_key_uninitialized_errors() {
        let (pool, _temp) = open_pool().await;
        let keystore = Keystore::new(pool);
        assert!(matches!(
            keystore.get_public_key().await,
            Err(Error::Uninitialized)
        ));
    }

    #[tokio::test]
    async fn get_or_create_keys_is_lazy_and_idempotent() {
        let (pool, _temp) = open_pool().await;
        let keystore = Keystore::new(pool);

        let (priv_pem_1, pub_pem_1) = keystore.get_or_create_keys().await.unwrap();
        let (priv_pem_2, pub_pem_2) = keystore.get_or_create_keys().await.unwrap();

        assert_eq!(priv_pem_1, priv_pem_2);
        assert_eq!(pub_pem_1, pub_pem_2);
        assert_eq!(keystore.get_public_key().await.unwrap(), pub_pem_1);

        // Round trip through the PEM decoders.
        decode_private_key_pem(&priv_pem_1).unwrap();
        decode_public_key_pem(&pub_pem_1).unwrap();
    }
}
