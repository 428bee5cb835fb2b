use rustls::{
    crypto::{aws_lc_rs, CryptoProvider},
    SupportedCipherSuite,
};

use log;

/// Configured cipher lists use OpenSSL names; rustls has its own. Only
/// suites rustls actually supports are mapped, the rest are dropped.
const OPENSSL_TO_RUSTLS: &[(&str, &str)] = &[
    // TLS 1.3 suites
    ("TLS_AES_256_GCM_SHA384", "TLS13_AES_256_GCM_SHA384"),
    ("TLS_AES_128_GCM_SHA256", "TLS13_AES_128_GCM_SHA256"),
    (
        "TLS_CHACHA20_POLY1305_SHA256",
        "TLS13_CHACHA20_POLY1305_SHA256",
    ),
    // TLS 1.2 suites
    (
        "ECDHE-ECDSA-AES256-GCM-SHA384",
        "TLS_ECDHE_ECDSA_WITH_AES_256_GCM_SHA384",
    ),
    (
        "ECDHE-ECDSA-AES128-GCM-SHA256",
        "TLS_ECDHE_ECDSA_WITH_AES_128_GCM_SHA256",
    ),
    (
        "ECDHE-ECDSA-CHACHA20-POLY1305-SHA256",
        "TLS_ECDHE_ECDSA_WITH_CHACHA20_POLY1305_SHA256",
    ),
    (
        "ECDHE-RSA-AES256-GCM-SHA384",
        "TLS_ECDHE_RSA_WITH_AES_256_GCM_SHA384",
    ),
    (
        "ECDHE-RSA-AES128-GCM-SHA256",
        "TLS_ECDHE_RSA_WITH_AES_128_GCM_SHA256",
    ),
    (
        "ECDHE-RSA-CHACHA20-POLY1305-SHA256",
        "TLS_ECDHE_RSA_WITH_CHACHA20_POLY1305_SHA256",
    ),
];

fn lookup_cipher_suite(openssl_name: &str) -> Option<SupportedCipherSuite> {
    let rustls_name = OPENSSL_TO_RUSTLS
        .iter()
        .find(|(openssl, _)| *openssl == openssl_name)
        .map(|(_, rustls)| *rustls)?;

    aws_lc_rs::ALL_CIPHER_SUITES
        .iter()
        .find(|suite| suite.suite().as_str() == Some(rustls_name))
        .copied()
}

fn filter_cipher_suites(ciphers: &str) -> Vec<SupportedCipherSuite> {
    ciphers
        .split(':')
        .map(str::trim)
        .filter_map(lookup_cipher_suite)
        .collect()
}

/// Crypto provider restricted to the configured cipher list. An empty or
/// fully unknown list falls back to the provider defaults.
pub fn provider(list_of_ciphers: &str) -> CryptoProvider {
    let mut ciphers = filter_cipher_suites(list_of_ciphers);
    if ciphers.is_empty() {
        if !list_of_ciphers.is_empty() {
            log::warn!(
                "No valid cipher suites found in {}, using default",
                list_of_ciphers
            );
        }
        ciphers = aws_lc_rs::DEFAULT_CIPHER_SUITES.to_vec();
    }
    log::debug!("cipher_suites: {:?}", ciphers);

    CryptoProvider {
        cipher_suites: ciphers,
        ..aws_lc_rs::default_provider()
    }
}
