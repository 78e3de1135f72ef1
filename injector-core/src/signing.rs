//! Injector signing identity: an Ed25519 keypair persisted under the repo
//! directory, or loaded from an operator-supplied key file.

use std::path::Path;

use base64::Engine as _;
use ed25519_dalek::{Signature, SigningKey, VerifyingKey};
use rand_core::OsRng;

use crate::AnyResult;

/// The injector's signing identity. Cheap to clone: wraps a 32-byte secret.
#[derive(Clone)]
pub struct InjectorKey {
    signing_key: SigningKey,
}

impl InjectorKey {
    /// Load a persisted key from `path`, or generate and persist a fresh one.
    pub async fn load_or_generate(path: &Path) -> AnyResult<Self> {
        if let Ok(bytes) = crate::util::file_read(path).await {
            return Self::from_bytes(&bytes);
        }
        let key = Self::generate();
        crate::util::file_write_sync(path, &key.signing_key.to_bytes())?;
        Ok(key)
    }

    pub fn generate() -> Self {
        let signing_key = SigningKey::generate(&mut OsRng);
        Self { signing_key }
    }

    pub fn from_bytes(bytes: &[u8]) -> AnyResult<Self> {
        let arr: [u8; 32] = bytes
            .try_into()
            .map_err(|_| anyhow::anyhow!("private key file must contain exactly 32 bytes"))?;
        Ok(Self {
            signing_key: SigningKey::from_bytes(&arr),
        })
    }

    pub fn verifying_key(&self) -> VerifyingKey {
        self.signing_key.verifying_key()
    }

    pub fn sign(&self, message: &[u8]) -> Signature {
        use ed25519_dalek::Signer;
        self.signing_key.sign(message)
    }

    /// `keyId` value used in the `Sig0`/`Sig1` header fields: the raw public
    /// key, URL-safe base64-encoded per the signature format in the
    /// external-interfaces section.
    pub fn key_id(&self) -> String {
        base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(self.verifying_key().to_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_and_verify_roundtrip() {
        use ed25519_dalek::Verifier;
        let key = InjectorKey::generate();
        let sig = key.sign(b"hello");
        assert!(key.verifying_key().verify(b"hello", &sig).is_ok());
    }

    #[test]
    fn from_bytes_rejects_wrong_length() {
        assert!(InjectorKey::from_bytes(&[0u8; 4]).is_err());
    }
}
