use std::fmt;

use der::Encode;
use p256::ecdsa::{SigningKey as P256SigningKey, VerifyingKey as P256VerifyingKey};
use pkcs8::DecodePrivateKey;
use rsa::{RsaPrivateKey, RsaPublicKey};
use x509_cert::spki::{EncodePublicKey, SubjectPublicKeyInfoOwned};

use crate::error::CredentialError;

/// Private keys the CMS signer can work with.
///
/// Keys are only ever built from PKCS#8 DER pulled out of a PKCS#12 container
/// and are zeroized when dropped.
pub enum KeyPair {
    Rsa {
        private: Box<RsaPrivateKey>,
        public: RsaPublicKey,
    },
    EcdsaP256 {
        signing_key: P256SigningKey,
        verifying_key: P256VerifyingKey,
    },
}

/// Key algorithms understood by [`KeyPair`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyAlgorithm {
    Rsa,
    EcdsaP256,
}

impl KeyPair {
    /// Import an RSA private key from PKCS#8 DER.
    pub fn rsa_from_pkcs8_der(der: &[u8]) -> Result<Self, CredentialError> {
        let private = RsaPrivateKey::from_pkcs8_der(der)
            .map_err(|e| CredentialError::Malformed(format!("RSA private key: {e}")))?;
        let public = RsaPublicKey::from(&private);
        Ok(KeyPair::Rsa {
            private: Box::new(private),
            public,
        })
    }

    /// Import a P-256 private key from PKCS#8 DER.
    pub fn p256_from_pkcs8_der(der: &[u8]) -> Result<Self, CredentialError> {
        let signing_key = P256SigningKey::from_pkcs8_der(der)
            .map_err(|e| CredentialError::Malformed(format!("P-256 private key: {e}")))?;
        let verifying_key = *signing_key.verifying_key();
        Ok(KeyPair::EcdsaP256 {
            signing_key,
            verifying_key,
        })
    }

    /// Whether `spki` is the public half of this key. Both sides are compared
    /// as DER.
    pub fn matches(&self, spki: &SubjectPublicKeyInfoOwned) -> Result<bool, CredentialError> {
        let public = match self {
            KeyPair::Rsa { public, .. } => public.to_public_key_der(),
            KeyPair::EcdsaP256 { verifying_key, .. } => verifying_key.to_public_key_der(),
        }
        .map_err(|e| CredentialError::Malformed(format!("public key: {e}")))?;
        let expected = spki
            .to_der()
            .map_err(|e| CredentialError::Malformed(format!("certificate public key: {e}")))?;
        Ok(public.as_bytes() == expected.as_slice())
    }

    pub fn algorithm(&self) -> KeyAlgorithm {
        match self {
            KeyPair::Rsa { .. } => KeyAlgorithm::Rsa,
            KeyPair::EcdsaP256 { .. } => KeyAlgorithm::EcdsaP256,
        }
    }
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair")
            .field("algorithm", &self.algorithm())
            .finish_non_exhaustive()
    }
}
