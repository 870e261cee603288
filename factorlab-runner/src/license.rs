//! License verification — Ed25519 signature over a canonical JSON payload.
//!
//! A license file is JSON `{"payload": {...}, "signature": "<base64url>"}`.
//! The signature covers the payload rendered as compact JSON with sorted
//! keys, so issuer and verifier agree on the bytes regardless of field
//! order. Key files hold the raw 32-byte Ed25519 keys, base64-encoded.
//!
//! The orchestrator and acquisition layer never see this module; the CLI
//! enforces the gate only when explicitly enabled.

use std::path::{Path, PathBuf};

use base64::engine::general_purpose::{STANDARD as B64, URL_SAFE as B64_URL};
use base64::Engine;
use chrono::NaiveDate;
use ed25519_dalek::{Signature, Signer, SigningKey, VerifyingKey};
use serde_json::Value;
use sha2::{Digest, Sha256};
use thiserror::Error;

pub const LICENSE_PRODUCT: &str = "factorlab";

#[derive(Debug, Error)]
pub enum LicenseError {
    #[error("license file is not valid JSON: {0}")]
    Malformed(String),

    #[error("license key file unreadable: {0}")]
    KeyFile(String),

    #[error("license product mismatch: {0}")]
    ProductMismatch(String),

    #[error("license has no expiry date")]
    MissingExpiry,

    #[error("license expired on {0}")]
    Expired(NaiveDate),

    #[error("license is bound to a different machine")]
    MachineMismatch,

    #[error("license signature verification failed")]
    BadSignature,
}

/// Verified license contents.
#[derive(Debug, Clone)]
pub struct LicenseInfo {
    pub license_id: String,
    pub plan: String,
    pub expires_at: NaiveDate,
    pub machine_code: String,
    pub product: String,
}

/// Stable per-machine identifier: SHA-256 over host identifiers, uppercase
/// hex, first 24 characters. Not a secret — it only binds a license to one
/// installation.
pub fn machine_code() -> String {
    let host = std::env::var("HOSTNAME")
        .or_else(|_| std::env::var("COMPUTERNAME"))
        .unwrap_or_default();
    let user = std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .unwrap_or_default();
    let raw = format!(
        "{}|{}|{host}|{user}",
        std::env::consts::OS,
        std::env::consts::ARCH
    );
    let digest = Sha256::digest(raw.as_bytes());
    let hex: String = digest.iter().map(|b| format!("{b:02X}")).collect();
    hex[..24].to_string()
}

/// Compact JSON with sorted keys — the exact bytes the signature covers.
/// serde_json's default map keeps keys ordered, so serializing a `Value`
/// object is already canonical.
fn canonical_payload(payload: &Value) -> Vec<u8> {
    serde_json::to_vec(payload).unwrap_or_default()
}

fn read_key_bytes<const N: usize>(path: &Path) -> Result<[u8; N], LicenseError> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| LicenseError::KeyFile(format!("{}: {e}", path.display())))?;
    let bytes = B64
        .decode(content.trim())
        .map_err(|e| LicenseError::KeyFile(format!("{}: {e}", path.display())))?;
    bytes
        .try_into()
        .map_err(|_| LicenseError::KeyFile(format!("{}: wrong key length", path.display())))
}

pub fn load_verifying_key(path: &Path) -> Result<VerifyingKey, LicenseError> {
    let bytes: [u8; 32] = read_key_bytes(path)?;
    VerifyingKey::from_bytes(&bytes)
        .map_err(|e| LicenseError::KeyFile(format!("{}: {e}", path.display())))
}

pub fn load_signing_key(path: &Path) -> Result<SigningKey, LicenseError> {
    let bytes: [u8; 32] = read_key_bytes(path)?;
    Ok(SigningKey::from_bytes(&bytes))
}

/// Verify a payload + signature against the public key and this machine.
pub fn verify_license_content(
    payload: &Value,
    signature_b64: &str,
    public_key: &VerifyingKey,
    machine_code: &str,
    today: NaiveDate,
) -> Result<LicenseInfo, LicenseError> {
    let field = |name: &str| -> String {
        payload
            .get(name)
            .and_then(Value::as_str)
            .unwrap_or_default()
            .trim()
            .to_string()
    };

    let product = field("product");
    if product != LICENSE_PRODUCT {
        return Err(LicenseError::ProductMismatch(product));
    }

    let expires_raw = field("expires_at");
    if expires_raw.is_empty() {
        return Err(LicenseError::MissingExpiry);
    }
    let expires_at = NaiveDate::parse_from_str(&expires_raw, "%Y-%m-%d")
        .map_err(|e| LicenseError::Malformed(format!("expires_at: {e}")))?;
    if expires_at < today {
        return Err(LicenseError::Expired(expires_at));
    }

    let licensed_machine = field("machine_code").to_uppercase();
    if !licensed_machine.is_empty() && licensed_machine != machine_code.to_uppercase() {
        return Err(LicenseError::MachineMismatch);
    }

    let signature_bytes = B64_URL
        .decode(signature_b64)
        .map_err(|_| LicenseError::BadSignature)?;
    let signature_bytes: [u8; 64] = signature_bytes
        .try_into()
        .map_err(|_| LicenseError::BadSignature)?;
    let signature = Signature::from_bytes(&signature_bytes);
    public_key
        .verify_strict(&canonical_payload(payload), &signature)
        .map_err(|_| LicenseError::BadSignature)?;

    Ok(LicenseInfo {
        license_id: {
            let id = field("license_id");
            if id.is_empty() { "UNKNOWN".into() } else { id }
        },
        plan: {
            let plan = field("plan");
            if plan.is_empty() { "lite".into() } else { plan }
        },
        expires_at,
        machine_code: if licensed_machine.is_empty() {
            machine_code.to_uppercase()
        } else {
            licensed_machine
        },
        product,
    })
}

/// Verify a license file on disk against a public key file.
pub fn verify_license_file(
    license_path: &Path,
    public_key_path: &Path,
    machine_code: &str,
    today: NaiveDate,
) -> Result<LicenseInfo, LicenseError> {
    let raw = std::fs::read_to_string(license_path)
        .map_err(|e| LicenseError::Malformed(e.to_string()))?;
    let parsed: Value =
        serde_json::from_str(&raw).map_err(|e| LicenseError::Malformed(e.to_string()))?;

    let payload = parsed
        .get("payload")
        .filter(|p| p.is_object())
        .ok_or_else(|| LicenseError::Malformed("missing payload object".into()))?;
    let signature = parsed
        .get("signature")
        .and_then(Value::as_str)
        .ok_or_else(|| LicenseError::Malformed("missing signature string".into()))?;

    let public_key = load_verifying_key(public_key_path)?;
    verify_license_content(payload, signature, &public_key, machine_code, today)
}

/// Sign a payload with the issuer's key; returns the base64url signature.
pub fn sign_payload(payload: &Value, signing_key_path: &Path) -> Result<String, LicenseError> {
    let key = load_signing_key(signing_key_path)?;
    let signature = key.sign(&canonical_payload(payload));
    Ok(B64_URL.encode(signature.to_bytes()))
}

/// Generate an issuer keypair under `dir`; returns (signing, public) paths.
/// Refuses to overwrite an existing signing key.
pub fn generate_keypair(dir: &Path) -> Result<(PathBuf, PathBuf), LicenseError> {
    let signing_path = dir.join("license_signing.key");
    let public_path = dir.join("license_public.key");
    if signing_path.exists() {
        return Err(LicenseError::KeyFile(format!(
            "{} already exists",
            signing_path.display()
        )));
    }

    std::fs::create_dir_all(dir).map_err(|e| LicenseError::KeyFile(e.to_string()))?;
    let signing_key = SigningKey::generate(&mut rand::rngs::OsRng);
    std::fs::write(&signing_path, B64.encode(signing_key.to_bytes()))
        .map_err(|e| LicenseError::KeyFile(e.to_string()))?;
    std::fs::write(
        &public_path,
        B64.encode(signing_key.verifying_key().to_bytes()),
    )
    .map_err(|e| LicenseError::KeyFile(e.to_string()))?;

    Ok((signing_path, public_path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicU64, Ordering};

    static TEST_COUNTER: AtomicU64 = AtomicU64::new(0);

    fn temp_dir() -> PathBuf {
        let id = TEST_COUNTER.fetch_add(1, Ordering::Relaxed);
        let dir =
            std::env::temp_dir().join(format!("factorlab_license_{}_{id}", std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn issue(dir: &Path, payload: &Value) -> (PathBuf, PathBuf) {
        let (signing, public) = generate_keypair(dir).unwrap();
        let signature = sign_payload(payload, &signing).unwrap();
        let license_path = dir.join("license.key");
        std::fs::write(
            &license_path,
            serde_json::to_string_pretty(&json!({
                "payload": payload,
                "signature": signature,
            }))
            .unwrap(),
        )
        .unwrap();
        (license_path, public)
    }

    fn valid_payload(machine: &str) -> Value {
        json!({
            "license_id": "LIC-001",
            "plan": "lite",
            "product": "factorlab",
            "expires_at": "2027-01-01",
            "machine_code": machine,
        })
    }

    #[test]
    fn issued_license_verifies() {
        let dir = temp_dir();
        let (license, public) = issue(&dir, &valid_payload("ABC123"));

        let info =
            verify_license_file(&license, &public, "abc123", day(2026, 8, 6)).unwrap();
        assert_eq!(info.license_id, "LIC-001");
        assert_eq!(info.product, LICENSE_PRODUCT);
        assert_eq!(info.expires_at, day(2027, 1, 1));

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn tampered_payload_fails_signature() {
        let dir = temp_dir();
        let (license, public) = issue(&dir, &valid_payload("ABC123"));

        let mut parsed: Value =
            serde_json::from_str(&std::fs::read_to_string(&license).unwrap()).unwrap();
        parsed["payload"]["expires_at"] = json!("2099-01-01");
        std::fs::write(&license, parsed.to_string()).unwrap();

        assert!(matches!(
            verify_license_file(&license, &public, "ABC123", day(2026, 8, 6)),
            Err(LicenseError::BadSignature)
        ));

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn expired_license_is_rejected() {
        let dir = temp_dir();
        let mut payload = valid_payload("ABC123");
        payload["expires_at"] = json!("2026-01-01");
        let (license, public) = issue(&dir, &payload);

        assert!(matches!(
            verify_license_file(&license, &public, "ABC123", day(2026, 8, 6)),
            Err(LicenseError::Expired(_))
        ));

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn machine_bound_license_rejects_other_machine() {
        let dir = temp_dir();
        let (license, public) = issue(&dir, &valid_payload("ABC123"));

        assert!(matches!(
            verify_license_file(&license, &public, "OTHER", day(2026, 8, 6)),
            Err(LicenseError::MachineMismatch)
        ));

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn unbound_license_accepts_any_machine() {
        let dir = temp_dir();
        let mut payload = valid_payload("");
        payload["machine_code"] = json!("");
        let (license, public) = issue(&dir, &payload);

        let info =
            verify_license_file(&license, &public, "ANYTHING", day(2026, 8, 6)).unwrap();
        assert_eq!(info.machine_code, "ANYTHING");

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn wrong_product_is_rejected() {
        let dir = temp_dir();
        let mut payload = valid_payload("ABC123");
        payload["product"] = json!("other_tool");
        let (license, public) = issue(&dir, &payload);

        assert!(matches!(
            verify_license_file(&license, &public, "ABC123", day(2026, 8, 6)),
            Err(LicenseError::ProductMismatch(_))
        ));

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn machine_code_is_stable_and_short() {
        let a = machine_code();
        let b = machine_code();
        assert_eq!(a, b);
        assert_eq!(a.len(), 24);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
