//! Cipher suite registry and negotiation.

use std::fmt;
use std::str::FromStr;

use rustls::SupportedCipherSuite;
use rustls::crypto::ring::cipher_suite as ring_suites;

use crate::error::{DoipError, Result};

/// TLS protocol version a cipher suite belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TlsVersion {
    /// TLS 1.2.
    Tls12,
    /// TLS 1.3.
    Tls13,
}

/// Cipher suites known to both client and server roles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum CipherSuite {
    /// TLS_AES_128_GCM_SHA256.
    Tls13Aes128GcmSha256 = 0x1301,
    /// TLS_AES_256_GCM_SHA384.
    Tls13Aes256GcmSha384 = 0x1302,
    /// TLS_CHACHA20_POLY1305_SHA256.
    Tls13Chacha20Poly1305Sha256 = 0x1303,
    /// TLS_AES_128_CCM_SHA256.
    Tls13Aes128CcmSha256 = 0x1304,
    /// TLS_AES_128_CCM_8_SHA256.
    Tls13Aes128Ccm8Sha256 = 0x1305,
    /// TLS_ECDHE_ECDSA_WITH_AES_128_GCM_SHA256.
    EcdheEcdsaAes128GcmSha256 = 0xC02B,
    /// TLS_ECDHE_ECDSA_WITH_AES_256_GCM_SHA384.
    EcdheEcdsaAes256GcmSha384 = 0xC02C,
    /// TLS_ECDHE_ECDSA_WITH_CHACHA20_POLY1305_SHA256.
    EcdheEcdsaChacha20Poly1305Sha256 = 0xCCA9,
    /// TLS_ECDHE_ECDSA_WITH_AES_128_CBC_SHA256.
    EcdheEcdsaAes128CbcSha256 = 0xC023,
    /// TLS_ECDHE_ECDSA_WITH_AES_256_CBC_SHA384.
    EcdheEcdsaAes256CbcSha384 = 0xC024,
}

/// Every known suite, highest priority first.
pub const REGISTRY: [CipherSuite; 10] = [
    CipherSuite::Tls13Aes128GcmSha256,
    CipherSuite::Tls13Aes256GcmSha384,
    CipherSuite::Tls13Chacha20Poly1305Sha256,
    CipherSuite::Tls13Aes128CcmSha256,
    CipherSuite::Tls13Aes128Ccm8Sha256,
    CipherSuite::EcdheEcdsaAes128GcmSha256,
    CipherSuite::EcdheEcdsaAes256GcmSha384,
    CipherSuite::EcdheEcdsaChacha20Poly1305Sha256,
    CipherSuite::EcdheEcdsaAes128CbcSha256,
    CipherSuite::EcdheEcdsaAes256CbcSha384,
];

impl CipherSuite {
    /// Look up a suite by its IANA id.
    pub fn from_u16(value: u16) -> Option<Self> {
        REGISTRY.into_iter().find(|s| *s as u16 == value)
    }

    /// IANA id.
    pub fn iana_id(&self) -> u16 {
        *self as u16
    }

    /// IANA name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Tls13Aes128GcmSha256 => "TLS_AES_128_GCM_SHA256",
            Self::Tls13Aes256GcmSha384 => "TLS_AES_256_GCM_SHA384",
            Self::Tls13Chacha20Poly1305Sha256 => "TLS_CHACHA20_POLY1305_SHA256",
            Self::Tls13Aes128CcmSha256 => "TLS_AES_128_CCM_SHA256",
            Self::Tls13Aes128Ccm8Sha256 => "TLS_AES_128_CCM_8_SHA256",
            Self::EcdheEcdsaAes128GcmSha256 => "TLS_ECDHE_ECDSA_WITH_AES_128_GCM_SHA256",
            Self::EcdheEcdsaAes256GcmSha384 => "TLS_ECDHE_ECDSA_WITH_AES_256_GCM_SHA384",
            Self::EcdheEcdsaChacha20Poly1305Sha256 => {
                "TLS_ECDHE_ECDSA_WITH_CHACHA20_POLY1305_SHA256"
            }
            Self::EcdheEcdsaAes128CbcSha256 => "TLS_ECDHE_ECDSA_WITH_AES_128_CBC_SHA256",
            Self::EcdheEcdsaAes256CbcSha384 => "TLS_ECDHE_ECDSA_WITH_AES_256_CBC_SHA384",
        }
    }

    /// Protocol version of this suite.
    pub fn version(&self) -> TlsVersion {
        match self {
            Self::Tls13Aes128GcmSha256
            | Self::Tls13Aes256GcmSha384
            | Self::Tls13Chacha20Poly1305Sha256
            | Self::Tls13Aes128CcmSha256
            | Self::Tls13Aes128Ccm8Sha256 => TlsVersion::Tls13,
            _ => TlsVersion::Tls12,
        }
    }

    /// Position in the registry; lower is preferred.
    pub fn priority(&self) -> usize {
        REGISTRY
            .iter()
            .position(|s| s == self)
            .unwrap_or(REGISTRY.len())
    }

    /// Backend implementation of this suite, if the TLS library provides one.
    pub fn rustls_suite(&self) -> Option<SupportedCipherSuite> {
        match self {
            Self::Tls13Aes128GcmSha256 => Some(ring_suites::TLS13_AES_128_GCM_SHA256),
            Self::Tls13Aes256GcmSha384 => Some(ring_suites::TLS13_AES_256_GCM_SHA384),
            Self::Tls13Chacha20Poly1305Sha256 => Some(ring_suites::TLS13_CHACHA20_POLY1305_SHA256),
            Self::EcdheEcdsaAes128GcmSha256 => {
                Some(ring_suites::TLS_ECDHE_ECDSA_WITH_AES_128_GCM_SHA256)
            }
            Self::EcdheEcdsaAes256GcmSha384 => {
                Some(ring_suites::TLS_ECDHE_ECDSA_WITH_AES_256_GCM_SHA384)
            }
            Self::EcdheEcdsaChacha20Poly1305Sha256 => {
                Some(ring_suites::TLS_ECDHE_ECDSA_WITH_CHACHA20_POLY1305_SHA256)
            }
            Self::Tls13Aes128CcmSha256
            | Self::Tls13Aes128Ccm8Sha256
            | Self::EcdheEcdsaAes128CbcSha256
            | Self::EcdheEcdsaAes256CbcSha384 => None,
        }
    }

    /// Check if the TLS library can run this suite.
    pub fn is_supported(&self) -> bool {
        self.rustls_suite().is_some()
    }

    /// Map a suite chosen by the TLS library back into the registry.
    pub fn from_rustls(suite: SupportedCipherSuite) -> Option<Self> {
        REGISTRY
            .into_iter()
            .find(|s| s.rustls_suite().map(|r| r.suite()) == Some(suite.suite()))
    }
}

impl fmt::Display for CipherSuite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for CipherSuite {
    type Err = DoipError;

    fn from_str(s: &str) -> Result<Self> {
        REGISTRY
            .into_iter()
            .find(|suite| suite.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| DoipError::UnsupportedCipherSuite(s.to_string()))
    }
}

/// Pick the suite a server with `server` suites selects for a client offering `client`.
///
/// The client's order decides; the first offered suite the server also
/// supports wins.
pub fn negotiate(client: &[CipherSuite], server: &[CipherSuite]) -> Result<CipherSuite> {
    client
        .iter()
        .copied()
        .find(|suite| server.contains(suite))
        .ok_or_else(|| {
            DoipError::HandshakeFailure(format!(
                "no mutually supported cipher suite (client: {}, server: {})",
                names(client),
                names(server)
            ))
        })
}

fn names(suites: &[CipherSuite]) -> String {
    suites
        .iter()
        .map(CipherSuite::name)
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_iana_ids() {
        assert_eq!(CipherSuite::Tls13Aes128GcmSha256.iana_id(), 4865);
        assert_eq!(CipherSuite::Tls13Aes128Ccm8Sha256.iana_id(), 4869);
        assert_eq!(CipherSuite::EcdheEcdsaAes128GcmSha256.iana_id(), 49195);
        assert_eq!(CipherSuite::EcdheEcdsaChacha20Poly1305Sha256.iana_id(), 52393);
        assert_eq!(CipherSuite::EcdheEcdsaAes256CbcSha384.iana_id(), 49188);
        assert_eq!(
            CipherSuite::from_u16(49196),
            Some(CipherSuite::EcdheEcdsaAes256GcmSha384)
        );
        assert_eq!(CipherSuite::from_u16(0x0035), None);
    }

    #[test]
    fn test_versions() {
        assert_eq!(CipherSuite::Tls13Aes128CcmSha256.version(), TlsVersion::Tls13);
        assert_eq!(CipherSuite::EcdheEcdsaAes128CbcSha256.version(), TlsVersion::Tls12);
    }

    #[test]
    fn test_parse_name() {
        let suite: CipherSuite = "tls_chacha20_poly1305_sha256".parse().unwrap();
        assert_eq!(suite, CipherSuite::Tls13Chacha20Poly1305Sha256);
        assert!(matches!(
            "TLS_RSA_WITH_NULL_MD5".parse::<CipherSuite>(),
            Err(DoipError::UnsupportedCipherSuite(_))
        ));
    }

    #[test]
    fn test_negotiate_no_intersection() {
        let result = negotiate(
            &[CipherSuite::Tls13Aes128GcmSha256],
            &[CipherSuite::Tls13Aes256GcmSha384],
        );
        assert!(matches!(result, Err(DoipError::HandshakeFailure(_))));
    }

    #[test]
    fn test_negotiate_client_priority() {
        let client = [
            CipherSuite::Tls13Chacha20Poly1305Sha256,
            CipherSuite::Tls13Aes256GcmSha384,
            CipherSuite::Tls13Aes128GcmSha256,
        ];
        let server = [
            CipherSuite::Tls13Aes128GcmSha256,
            CipherSuite::Tls13Aes256GcmSha384,
        ];
        assert_eq!(
            negotiate(&client, &server).unwrap(),
            CipherSuite::Tls13Aes256GcmSha384
        );
    }

    #[test]
    fn test_negotiate_empty() {
        assert!(negotiate(&[], &REGISTRY).is_err());
        assert!(negotiate(&REGISTRY, &[]).is_err());
    }

    #[test]
    fn test_backend_support() {
        let supported: Vec<_> = REGISTRY.into_iter().filter(CipherSuite::is_supported).collect();
        assert_eq!(supported.len(), 6);
        assert!(!CipherSuite::Tls13Aes128CcmSha256.is_supported());
        assert!(!CipherSuite::EcdheEcdsaAes128CbcSha256.is_supported());

        for suite in supported {
            let backend = suite.rustls_suite().unwrap();
            assert_eq!(CipherSuite::from_rustls(backend), Some(suite));
        }
    }

    #[test]
    fn test_priority_order() {
        assert_eq!(CipherSuite::Tls13Aes128GcmSha256.priority(), 0);
        assert!(
            CipherSuite::Tls13Aes256GcmSha384.priority()
                < CipherSuite::EcdheEcdsaAes128GcmSha256.priority()
        );
    }
}
