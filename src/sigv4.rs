//! AWS Signature Version 4 for single-shot JSON POSTs to a DynamoDB-compatible endpoint.

use super::{
    wire::{CONTENT_TYPE, TARGET_PREFIX},
    Error, Result,
};
use chrono::{DateTime, Utc};
use hmac::{digest::FixedOutput, Hmac, Mac};
use sha2::{Digest, Sha256};

pub const ALGORITHM: &str = "AWS4-HMAC-SHA256";
pub const SERVICE: &str = "dynamodb";
pub const SIGNED_HEADERS: &str = "content-type;host;x-amz-date;x-amz-target";

/// HashedPayload = Lowercase(HexEncode(Hash(requestPayload)))
pub(crate) fn sha256_hex(bytes: impl AsRef<[u8]>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize_fixed())
}

fn hmac(key: &[u8], data: &[u8]) -> impl AsRef<[u8]> {
    let mut mac = Hmac::<Sha256>::new_from_slice(key).expect("HMAC can take key of any size");
    mac.update(data);
    mac.finalize_fixed()
}

/// Formats `now` as the `X-Amz-Date` timestamp and the 8-digit credential date.
pub fn timestamp(now: DateTime<Utc>) -> (String, String) {
    (now.format("%Y%m%dT%H%M%SZ").to_string(), now.format("%Y%m%d").to_string())
}

#[derive(Clone)]
pub struct Signer {
    access_key: String,
    secret_key: String,
    region: String,
    host: String,
}

impl std::fmt::Debug for Signer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Signer")
            .field("access_key", &self.access_key)
            .field("region", &self.region)
            .field("host", &self.host)
            .finish_non_exhaustive()
    }
}

impl Signer {
    /// `host` is the value of the Host header the transport will send: the hostname, plus the
    /// port when it isn't the scheme's default.
    pub fn new(access_key: impl Into<String>, secret_key: impl Into<String>, region: impl Into<String>, host: impl Into<String>) -> Self {
        Self {
            access_key: access_key.into(),
            secret_key: secret_key.into(),
            region: region.into(),
            host: host.into(),
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    fn credential_scope(&self, date_stamp: &str) -> String {
        format!("{}/{}/{}/aws4_request", date_stamp, self.region, SERVICE)
    }

    fn signing_key(&self, date_stamp: &str) -> impl AsRef<[u8]> {
        // kSecret = your secret access key
        // kDate = HMAC("AWS4" + kSecret, Date)
        // kRegion = HMAC(kDate, Region)
        // kService = HMAC(kRegion, Service)
        // kSigning = HMAC(kService, "aws4_request")
        let secret = format!("AWS4{}", self.secret_key);
        let tag = hmac(secret.as_bytes(), date_stamp.as_bytes());
        let tag = hmac(tag.as_ref(), self.region.as_bytes());
        let tag = hmac(tag.as_ref(), SERVICE.as_bytes());
        hmac(tag.as_ref(), b"aws4_request")
    }

    /// Produces the headers that authenticate a `POST /` carrying `payload` for `operation`
    /// (e.g. `GetItem`). The result is a pure function of the inputs and the signer's
    /// credentials.
    pub fn sign(&self, operation: &str, payload: &str, amz_date: &str, date_stamp: &str) -> Result<Vec<(String, String)>> {
        let missing: Vec<_> = [("operation", operation), ("payload", payload), ("amz_date", amz_date), ("date_stamp", date_stamp)]
            .iter()
            .filter(|(_, v)| v.is_empty())
            .map(|(name, _)| *name)
            .collect();
        if !missing.is_empty() {
            return Err(Error::validation(format!("cannot sign request, missing {}", missing.join(", "))));
        }

        let target = format!("{}.{}", TARGET_PREFIX, operation);
        let canonical_headers = format!(
            "content-type:{}\nhost:{}\nx-amz-date:{}\nx-amz-target:{}\n",
            CONTENT_TYPE, self.host, amz_date, target
        );
        let canonical_request = ["POST", "/", "", &canonical_headers, SIGNED_HEADERS, &sha256_hex(payload)].join("\n");

        let scope = self.credential_scope(date_stamp);
        let string_to_sign = format!("{}\n{}\n{}\n{}", ALGORITHM, amz_date, scope, sha256_hex(&canonical_request));

        let signing_key = self.signing_key(date_stamp);
        let signature = hex::encode(hmac(signing_key.as_ref(), string_to_sign.as_bytes()));

        Ok(vec![
            ("content-type".to_string(), CONTENT_TYPE.to_string()),
            ("x-amz-date".to_string(), amz_date.to_string()),
            ("x-amz-target".to_string(), target),
            (
                "authorization".to_string(),
                format!(
                    "{} Credential={}/{}, SignedHeaders={}, Signature={}",
                    ALGORITHM, self.access_key, scope, SIGNED_HEADERS, signature
                ),
            ),
        ])
    }
}
