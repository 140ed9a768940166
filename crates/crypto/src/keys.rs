//! PEM helpers for custodian public keys

use x509_cert::der::{pem::LineEnding, DecodePem, EncodePem};
use x509_cert::Certificate;

use crate::helpers::CryptoError;

const CERTIFICATE_MARKER: &str = "CERTIFICATE";

/// Reduce a custodian key string to an SPKI `PUBLIC KEY` PEM
///
/// X.509 certificates are parsed and their subject public key info is
/// re-encoded; any other PEM is returned unchanged.
pub fn extract_pem_from_key_string(key: &str) -> Result<String, CryptoError> {
    if !key.contains(CERTIFICATE_MARKER) {
        return Ok(key.to_string());
    }
    let certificate = Certificate::from_pem(key.trim().as_bytes())
        .map_err(|e| CryptoError::InvalidKey(format!("Failed to parse certificate: {}", e)))?;
    certificate
        .tbs_certificate
        .subject_public_key_info
        .to_pem(LineEnding::LF)
        .map_err(|e| CryptoError::InvalidKey(format!("Failed to encode public key: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    const CERT: &str = include_str!("../tests/fixtures/kas_cert.pem");
    const SPKI: &str = include_str!("../tests/fixtures/kas_cert_spki.pem");

    fn squash(pem: &str) -> String {
        pem.chars().filter(|c| !c.is_whitespace()).collect()
    }

    #[test]
    fn test_certificate_reduced_to_public_key() {
        let pem = extract_pem_from_key_string(CERT).unwrap();
        assert!(pem.starts_with("-----BEGIN PUBLIC KEY-----"));
        assert_eq!(squash(&pem), squash(SPKI));
    }

    #[test]
    fn test_plain_public_key_passes_through() {
        assert_eq!(extract_pem_from_key_string(SPKI).unwrap(), SPKI);
    }

    #[test]
    fn test_broken_certificate_rejected() {
        let broken = "-----BEGIN CERTIFICATE-----\nAAAA\n-----END CERTIFICATE-----\n";
        assert!(matches!(
            extract_pem_from_key_string(broken),
            Err(CryptoError::InvalidKey(_))
        ));
    }
}
