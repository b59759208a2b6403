//! End-to-end scenarios spanning credential issuance and ballot casting.

use anonvote::crypto;
use anonvote::ledger::Ledger;
use anonvote::registry::Registry;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use rand::rngs::OsRng;
use rsa::{RsaPrivateKey, RsaPublicKey};
use tempfile::tempdir;

struct Harness {
    registry: Registry,
    ledger: Ledger,
    ledger_path: std::path::PathBuf,
    _dir: tempfile::TempDir,
}

async fn harness() -> Harness {
    let dir = tempdir().unwrap();
    let registry = Registry::open(&dir.path().join("registry.db")).await.unwrap();
    let ledger_path = dir.path().join("ledger.json");
    let ledger = Ledger::open(&ledger_path).unwrap();
    Harness {
        registry,
        ledger,
        ledger_path,
        _dir: dir,
    }
}

/// Client-side half of credential issuance: blind a token, ask the
/// registry to sign it, unblind the result into a usable credential.
async fn obtain_credential(
    registry: &Registry,
    voter_id: &str,
    token: &[u8],
    issuer_pub: &RsaPublicKey,
) -> crypto::Credential {
    let (blinded, r) = crypto::blind(token, issuer_pub);
    let blind_sig_b64 = registry
        .issue_token(voter_id, &BASE64.encode(&blinded))
        .await
        .unwrap();
    let blind_sig = crypto::b64_to_int(&blind_sig_b64).unwrap();
    let signature = crypto::unblind(&blind_sig, &r, issuer_pub).unwrap();
    crypto::Credential {
        token: token.to_vec(),
        signature,
    }
}

#[tokio::test]
async fn happy_path_vote_is_recorded_and_tallied() {
    let h = harness().await;
    h.registry.seed_eligible(&["VOTER_00001"]).await.unwrap();
    let issuer_pub = h.registry.issuer_public_key_decoded().await.unwrap();

    let token = b"voter-00001-token".to_vec();
    let credential = obtain_credential(&h.registry, "VOTER_00001", &token, &issuer_pub).await;

    let receipt = h
        .ledger
        .cast_vote(&credential.token, &credential.signature, "alice", &issuer_pub)
        .unwrap();

    assert_eq!(receipt.block_index, 1);
    assert_eq!(h.ledger.get_tallies()["alice"], 1);
    assert!(h.ledger.verify_chain().valid);
}

#[tokio::test]
async fn reusing_a_credential_is_a_double_vote() {
    let h = harness().await;
    h.registry.seed_eligible(&["VOTER_00002"]).await.unwrap();
    let issuer_pub = h.registry.issuer_public_key_decoded().await.unwrap();

    let token = b"voter-00002-token".to_vec();
    let credential = obtain_credential(&h.registry, "VOTER_00002", &token, &issuer_pub).await;

    h.ledger
        .cast_vote(&credential.token, &credential.signature, "alice", &issuer_pub)
        .unwrap();

    let second = h
        .ledger
        .cast_vote(&credential.token, &credential.signature, "bob", &issuer_pub);

    assert!(matches!(
        second,
        Err(anonvote::ledger::Error::DoubleVote)
    ));
    assert_eq!(h.ledger.get_tallies()["bob"], 0);
}

#[tokio::test]
async fn duplicate_issuance_for_the_same_voter_is_rejected() {
    let h = harness().await;
    h.registry.seed_eligible(&["V2"]).await.unwrap();
    let issuer_pub = h.registry.issuer_public_key_decoded().await.unwrap();

    let (blinded_1, _r1) = crypto::blind(b"first-token-attempt", &issuer_pub);
    let (blinded_2, _r2) = crypto::blind(b"second-token-attempt", &issuer_pub);

    let first = h
        .registry
        .issue_token("V2", &BASE64.encode(&blinded_1))
        .await;
    assert!(first.is_ok());

    let second = h
        .registry
        .issue_token("V2", &BASE64.encode(&blinded_2))
        .await;
    assert!(matches!(
        second,
        Err(anonvote::registry::Error::AlreadyIssued)
    ));
}

#[tokio::test]
async fn ineligible_voter_cannot_obtain_a_token() {
    let h = harness().await;
    h.registry.bootstrap_keys().await.unwrap();
    let issuer_pub = h.registry.issuer_public_key_decoded().await.unwrap();
    let (blinded, _r) = crypto::blind(b"ghost-token", &issuer_pub);

    let result = h
        .registry
        .issue_token("GHOST", &BASE64.encode(&blinded))
        .await;
    assert!(matches!(
        result,
        Err(anonvote::registry::Error::NotEligible)
    ));
}

#[tokio::test]
async fn credential_forged_under_a_different_issuer_key_is_rejected() {
    let h = harness().await;
    h.registry.seed_eligible(&["V5"]).await.unwrap();
    let issuer_pub = h.registry.issuer_public_key_decoded().await.unwrap();

    // An attacker with their own keypair signs a token themselves instead
    // of going through the real registry.
    let forger_priv = RsaPrivateKey::new(&mut OsRng, crypto::KEY_SIZE_BITS).unwrap();
    let forger_pub = RsaPublicKey::from(&forger_priv);

    let token = b"forged-ballot-token".to_vec();
    let (blinded, r) = crypto::blind(&token, &forger_pub);
    let blind_sig = crypto::blind_sign(&blinded, &forger_priv);
    let forged_signature = crypto::unblind(&blind_sig, &r, &forger_pub).unwrap();

    // The forged signature verifies fine under the forger's own key...
    assert!(crypto::verify(&token, &forged_signature, &forger_pub));
    // ...but the ledger only trusts the real issuer's public key.
    let result = h
        .ledger
        .cast_vote(&token, &forged_signature, "alice", &issuer_pub);
    assert!(matches!(
        result,
        Err(anonvote::ledger::Error::InvalidCredential)
    ));
    assert!(!h.ledger.is_token_spent(&crypto::nullifier(&token)));
}

#[tokio::test]
async fn mutating_a_cast_vote_breaks_chain_verification() {
    let h = harness().await;
    h.registry.seed_eligible(&["V6", "V7"]).await.unwrap();
    let issuer_pub = h.registry.issuer_public_key_decoded().await.unwrap();

    let credential_a = obtain_credential(&h.registry, "V6", b"token-six", &issuer_pub).await;
    let credential_b = obtain_credential(&h.registry, "V7", b"token-seven", &issuer_pub).await;

    h.ledger
        .cast_vote(&credential_a.token, &credential_a.signature, "alice", &issuer_pub)
        .unwrap();
    h.ledger
        .cast_vote(&credential_b.token, &credential_b.signature, "bob", &issuer_pub)
        .unwrap();
    assert!(h.ledger.verify_chain().valid);
    assert_eq!(h.ledger.get_chain().len(), 3);
    drop(h.ledger);

    // Tamper with the persisted chain in place, the way an attacker with
    // filesystem access to a stopped instance might, then reload it.
    let raw = std::fs::read_to_string(&h.ledger_path).unwrap();
    let tampered = raw.replacen("\"alice\"", "\"carol\"", 1);
    assert_ne!(raw, tampered);
    std::fs::write(&h.ledger_path, tampered).unwrap();

    let reopened = Ledger::open(&h.ledger_path).unwrap();
    // The stored hash no longer matches the mutated fields, so reloading
    // detects the tamper and falls back to a fresh genesis-only chain
    // rather than silently trusting corrupted history.
    assert_eq!(reopened.get_chain().len(), 1);
    assert!(reopened.verify_chain().valid);
}
