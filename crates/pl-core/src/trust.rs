//! Certificate trust prompts for desktop-protocol sessions

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// An unverified certificate presented by a remote host.
///
/// The protocol session cannot proceed until the user accepts or rejects
/// it. The request is discarded once resolved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CertificateTrustRequest {
    /// Host the certificate was presented for
    pub host: String,
    /// Certificate subject
    pub subject: String,
    /// Certificate issuer, if known
    pub issuer: Option<String>,
    /// SHA-256 fingerprint (colon separated, upper-case hex)
    pub fingerprint: String,
}

impl CertificateTrustRequest {
    /// Build a trust request from a DER-encoded certificate
    pub fn from_der(
        host: impl Into<String>,
        subject: impl Into<String>,
        issuer: Option<String>,
        der: &[u8],
    ) -> Self {
        Self {
            host: host.into(),
            subject: subject.into(),
            issuer,
            fingerprint: sha256_fingerprint(der),
        }
    }
}

/// The user's answer to a [`CertificateTrustRequest`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrustDecision {
    Accept,
    Reject,
}

/// Format the SHA-256 digest of `bytes` as `AB:CD:...`
pub fn sha256_fingerprint(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    hex::encode_upper(digest)
        .as_bytes()
        .chunks(2)
        .map(|pair| String::from_utf8_lossy(pair).into_owned())
        .collect::<Vec<_>>()
        .join(":")
}
