//! VAPID key handling (RFC 8292).
//!
//! The private key is the raw 32-byte P-256 scalar, base64url encoded, which
//! is what `VapidSignatureBuilder::from_base64` consumes. The public key is
//! the 65-byte uncompressed SEC1 point browsers expect as
//! `applicationServerKey`.

use {
    base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD as BASE64URL},
    p256::{ecdsa::SigningKey, elliptic_curve::rand_core::OsRng},
    secrecy::{ExposeSecret, Secret},
};

use crate::{Error, Result};

/// A validated VAPID key pair.
#[derive(Debug, Clone)]
pub struct VapidKeys {
    public_key: String,
    private_key: Secret<String>,
}

impl VapidKeys {
    /// Generate a fresh key pair.
    #[must_use]
    pub fn generate() -> Self {
        let signing_key = SigningKey::random(&mut OsRng);
        Self::from_signing_key(&signing_key)
    }

    /// Load a key pair from configuration, checking both halves and that the
    /// public key belongs to the private one.
    ///
    /// Padded base64 (trailing `=`) is accepted.
    pub fn from_base64url(public_key: &str, private_key: &str) -> Result<Self> {
        let public_key = public_key.trim().trim_end_matches('=');
        let private_key = private_key.trim().trim_end_matches('=');

        let pub_bytes = BASE64URL.decode(public_key)?;
        if pub_bytes.len() != 65 || pub_bytes[0] != 0x04 {
            return Err(Error::invalid_key(format!(
                "public key must be a 65-byte uncompressed P-256 point, got {} bytes",
                pub_bytes.len()
            )));
        }

        let derived = Self::from_private_key(private_key)?;
        if derived.public_key != public_key {
            return Err(Error::invalid_key(
                "public key does not match the private key",
            ));
        }
        Ok(derived)
    }

    /// Rebuild the pair from the private scalar alone.
    pub fn from_private_key(private_key: &str) -> Result<Self> {
        let priv_bytes = BASE64URL.decode(private_key.trim().trim_end_matches('='))?;
        if priv_bytes.len() != 32 {
            return Err(Error::invalid_key(format!(
                "private key must be a 32-byte P-256 scalar, got {} bytes",
                priv_bytes.len()
            )));
        }
        let signing_key = SigningKey::from_slice(&priv_bytes)
            .map_err(|_| Error::invalid_key("private key is not a valid P-256 scalar"))?;
        Ok(Self::from_signing_key(&signing_key))
    }

    fn from_signing_key(signing_key: &SigningKey) -> Self {
        let point = signing_key.verifying_key().to_encoded_point(false);
        Self {
            public_key: BASE64URL.encode(point.as_bytes()),
            private_key: Secret::new(BASE64URL.encode(signing_key.to_bytes().as_slice())),
        }
    }

    /// Base64url public key for `applicationServerKey`.
    pub fn public_key(&self) -> &str {
        &self.public_key
    }

    pub(crate) fn private_key(&self) -> &str {
        self.private_key.expose_secret()
    }

    /// Private key for `keygen` output. Handle with care.
    pub fn export_private_key(&self) -> &Secret<String> {
        &self.private_key
    }
}
