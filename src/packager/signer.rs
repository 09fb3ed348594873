//! APK signing keys
//!
//! The writer needs two things from a signer: the certificate to embed and
//! a signature over the signature file. [`RsaSigner`] provides both from a
//! PKCS#8 PEM private key and a PEM certificate.

use crate::error::{DroidpackError, DroidpackResult};
use rsa::pkcs8::DecodePrivateKey;
use rsa::{Pkcs1v15Sign, RsaPrivateKey};
use sha2::{Digest, Sha256};
use std::fmt;
use std::path::Path;

/// Produces the signature block of a signed APK
pub trait Signer: Send + Sync {
    /// DER-encoded signer certificate
    fn certificate(&self) -> &[u8];

    /// Extension of the signature block entry (`RSA` for `CERT.RSA`)
    fn block_extension(&self) -> &'static str;

    /// Digest `data` with SHA256 and sign the digest
    fn sign(&self, data: &[u8]) -> DroidpackResult<Vec<u8>>;
}

/// RSA PKCS#1 v1.5 signer
#[derive(Clone)]
pub struct RsaSigner {
    key: RsaPrivateKey,
    certificate: Vec<u8>,
}

impl RsaSigner {
    /// Build a signer from PEM text. `origin` names the source in errors.
    pub fn from_pem(key_pem: &str, cert_pem: &str, origin: &Path) -> DroidpackResult<Self> {
        let key = RsaPrivateKey::from_pkcs8_pem(key_pem).map_err(|e| DroidpackError::SigningKey {
            path: origin.to_path_buf(),
            reason: format!("private key: {}", e),
        })?;

        let cert = pem::parse(cert_pem).map_err(|e| DroidpackError::SigningKey {
            path: origin.to_path_buf(),
            reason: format!("certificate: {}", e),
        })?;
        if cert.tag() != "CERTIFICATE" {
            return Err(DroidpackError::SigningKey {
                path: origin.to_path_buf(),
                reason: format!("expected a CERTIFICATE block, found {}", cert.tag()),
            });
        }

        Ok(Self {
            key,
            certificate: cert.contents().to_vec(),
        })
    }

    /// Load a signer from a private key file and a certificate file
    pub fn from_files(key_path: &Path, cert_path: &Path) -> DroidpackResult<Self> {
        let key_pem = std::fs::read_to_string(key_path)
            .map_err(|e| DroidpackError::io(format!("reading signing key {}", key_path.display()), e))?;
        let cert_pem = std::fs::read_to_string(cert_path).map_err(|e| {
            DroidpackError::io(format!("reading certificate {}", cert_path.display()), e)
        })?;
        Self::from_pem(&key_pem, &cert_pem, key_path)
    }
}

impl Signer for RsaSigner {
    fn certificate(&self) -> &[u8] {
        &self.certificate
    }

    fn block_extension(&self) -> &'static str {
        "RSA"
    }

    fn sign(&self, data: &[u8]) -> DroidpackResult<Vec<u8>> {
        let digest = Sha256::digest(data);
        self.key
            .sign(Pkcs1v15Sign::new::<Sha256>(), &digest)
            .map_err(|e| DroidpackError::Signing(e.to_string()))
    }
}

impl fmt::Debug for RsaSigner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RsaSigner")
            .field("certificate_len", &self.certificate.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use rsa::RsaPublicKey;

    pub(crate) const TEST_KEY: &str = include_str!("../../tests/fixtures/debug-key.pem");
    pub(crate) const TEST_CERT: &str = include_str!("../../tests/fixtures/debug-cert.pem");

    pub(crate) fn test_signer() -> RsaSigner {
        RsaSigner::from_pem(TEST_KEY, TEST_CERT, Path::new("fixtures")).unwrap()
    }

    #[test]
    fn signature_verifies_with_public_key() {
        let signer = test_signer();
        let data = b"Signature-Version: 1.0\r\n";
        let signature = signer.sign(data).unwrap();

        let public = RsaPublicKey::from(&signer.key);
        let digest = Sha256::digest(data);
        public
            .verify(Pkcs1v15Sign::new::<Sha256>(), &digest, &signature)
            .unwrap();
    }

    #[test]
    fn certificate_is_der() {
        let signer = test_signer();
        // DER SEQUENCE tag
        assert_eq!(signer.certificate()[0], 0x30);
        assert_eq!(signer.block_extension(), "RSA");
    }

    #[test]
    fn swapped_inputs_are_rejected() {
        let err = RsaSigner::from_pem(TEST_CERT, TEST_KEY, Path::new("keys.pem")).unwrap_err();
        assert!(matches!(err, DroidpackError::SigningKey { .. }));
        assert!(err.to_string().contains("keys.pem"));
    }

    #[test]
    fn debug_hides_key() {
        let rendered = format!("{:?}", test_signer());
        assert!(rendered.contains("certificate_len"));
        assert!(!rendered.contains("PRIVATE"));
    }
}
