use rustls_pki_types::{pem::PemObject, CertificateDer, PrivateKeyDer};
use tracing::debug;
use typed_builder::TypedBuilder;

use crate::{
    common::{
        reference_allowed, CertificateMaterial, ListenerReady, ListenerResolvedRefs, ReferenceGrant, ResolvedListener, ResourceKey, TlsConfig, CORE_GROUP_NAME,
        SECRET_KIND_NAME,
    },
    state::CertificateProvider,
};

pub const TLS_VERSION_AUTO: &str = "TLS_AUTO";
pub const SUPPORTED_TLS_VERSIONS: [&str; 5] = [TLS_VERSION_AUTO, "TLSv1_0", "TLSv1_1", "TLSv1_2", "TLSv1_3"];
pub const SUPPORTED_CIPHER_SUITES: [&str; 14] = [
    "TLS_ECDHE_ECDSA_WITH_AES_128_GCM_SHA256",
    "TLS_ECDHE_ECDSA_WITH_CHACHA20_POLY1305_SHA256",
    "TLS_ECDHE_RSA_WITH_AES_128_GCM_SHA256",
    "TLS_ECDHE_RSA_WITH_CHACHA20_POLY1305_SHA256",
    "TLS_ECDHE_ECDSA_WITH_AES_128_CBC_SHA",
    "TLS_ECDHE_RSA_WITH_AES_128_CBC_SHA",
    "TLS_RSA_WITH_AES_128_GCM_SHA256",
    "TLS_RSA_WITH_AES_128_CBC_SHA",
    "TLS_ECDHE_ECDSA_WITH_AES_256_GCM_SHA384",
    "TLS_ECDHE_RSA_WITH_AES_256_GCM_SHA384",
    "TLS_ECDHE_ECDSA_WITH_AES_256_CBC_SHA",
    "TLS_ECDHE_RSA_WITH_AES_256_CBC_SHA",
    "TLS_RSA_WITH_AES_256_GCM_SHA384",
    "TLS_RSA_WITH_AES_256_CBC_SHA",
];

fn version_rank(version: &str) -> Option<usize> {
    SUPPORTED_TLS_VERSIONS.iter().position(|supported| *supported == version)
}

/// Checks TLS versions and cipher suites. Cipher suites can't be configured when TLS 1.3 is the floor.
pub fn validate_tls_options(tls: &TlsConfig) -> Result<(), String> {
    let min = tls.min_version.as_deref().unwrap_or(TLS_VERSION_AUTO);
    let max = tls.max_version.as_deref().unwrap_or(TLS_VERSION_AUTO);
    let min_rank = version_rank(min).ok_or_else(|| format!("unsupported TLS minimum version {min}"))?;
    let max_rank = version_rank(max).ok_or_else(|| format!("unsupported TLS maximum version {max}"))?;
    if min != TLS_VERSION_AUTO && max != TLS_VERSION_AUTO && min_rank > max_rank {
        return Err(format!("TLS minimum version {min} is above maximum version {max}"));
    }

    if let Some(cipher_suite) = tls.cipher_suites.iter().find(|cipher_suite| !SUPPORTED_CIPHER_SUITES.contains(&cipher_suite.as_str())) {
        return Err(format!("unsupported cipher suite {cipher_suite}"));
    }
    if min == "TLSv1_3" && !tls.cipher_suites.is_empty() {
        return Err("cipher suites can't be configured with TLS 1.3 minimum version".to_owned());
    }
    Ok(())
}

fn validate_material(material: &CertificateMaterial) -> Result<(), String> {
    let valid_cert = CertificateDer::from_pem_slice(&material.certificate);
    let valid_key = PrivateKeyDer::from_pem_slice(&material.private_key);
    match (valid_cert, valid_key) {
        (Ok(_), Ok(_)) => Ok(()),
        (Ok(_), Err(e)) => Err(format!("key is invalid {e}")),
        (Err(e), Ok(_)) => Err(format!("certificate is invalid {e}")),
        (Err(e_cert), Err(e_key)) => Err(format!("key and certificate are invalid {e_cert} {e_key}")),
    }
}

#[derive(TypedBuilder)]
pub struct ListenerTlsConfigValidator<'a> {
    gateway_key: &'a ResourceKey,
    reference_grants: &'a [ReferenceGrant],
    certificate_provider: &'a dyn CertificateProvider,
    log_context: &'a str,
}

impl ListenerTlsConfigValidator<'_> {
    /// Resolves and checks the certificates of a terminating listener, recording the outcome in its conditions.
    pub async fn validate(&self, listener: &mut ResolvedListener) {
        let log_context = self.log_context;
        let name = listener.name().to_owned();
        debug!("{log_context} Validating TLS certs {} {name}", self.gateway_key);

        let Some(tls) = listener.listener.tls.clone() else {
            listener.conditions.resolved_refs = ListenerResolvedRefs::InvalidCertificateRef("listener has no TLS configuration".to_owned());
            return;
        };
        if tls.certificate_refs.is_empty() {
            listener.conditions.resolved_refs = ListenerResolvedRefs::InvalidCertificateRef("listener has no certificate references".to_owned());
            return;
        }

        if let Err(message) = validate_tls_options(&tls) {
            debug!("{log_context} Invalid TLS options {name} {message}");
            listener.conditions.ready = ListenerReady::Invalid(message);
        }

        for certificate_ref in &tls.certificate_refs {
            let group = certificate_ref.group.as_deref().unwrap_or(CORE_GROUP_NAME);
            let kind = certificate_ref.kind.as_deref().unwrap_or(SECRET_KIND_NAME);
            if group != CORE_GROUP_NAME || kind != SECRET_KIND_NAME {
                listener.conditions.resolved_refs = ListenerResolvedRefs::InvalidCertificateRef(format!("unsupported certificate reference kind {group}/{kind}"));
                return;
            }

            let namespace = certificate_ref.namespace.as_deref().unwrap_or(&self.gateway_key.namespace);
            let certificate_key = ResourceKey::namespaced(&certificate_ref.name, namespace).with_kind(CORE_GROUP_NAME, SECRET_KIND_NAME);
            if !reference_allowed(self.reference_grants, self.gateway_key, &certificate_key) {
                listener.conditions.resolved_refs = ListenerResolvedRefs::RefNotPermitted(format!("certificate {certificate_key} is not permitted"));
                return;
            }

            match self.certificate_provider.get_certificate_material(&certificate_key).await {
                Ok(material) => {
                    if let Err(message) = validate_material(&material) {
                        debug!("{log_context} Certificate {certificate_key} {message}");
                        listener.conditions.resolved_refs = ListenerResolvedRefs::InvalidCertificateRef(format!("certificate {certificate_key}: {message}"));
                        return;
                    }
                    debug!("{log_context} Private key and certificate are valid {certificate_key}");
                    listener.certificates.push(material);
                },
                Err(e) => {
                    debug!("{log_context} Can't get certificate {certificate_key} {e}");
                    listener.conditions.resolved_refs = ListenerResolvedRefs::InvalidCertificateRef(e.to_string());
                    return;
                },
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tls_options() {
        assert!(validate_tls_options(&TlsConfig::default()).is_ok());
        let tls = TlsConfig { min_version: Some("TLSv1_2".to_owned()), cipher_suites: vec!["TLS_RSA_WITH_AES_128_CBC_SHA".to_owned()], ..Default::default() };
        assert!(validate_tls_options(&tls).is_ok());
        let tls = TlsConfig { min_version: Some("TLSv1_3".to_owned()), cipher_suites: vec!["TLS_RSA_WITH_AES_128_CBC_SHA".to_owned()], ..Default::default() };
        assert!(validate_tls_options(&tls).is_err());
        let tls = TlsConfig { min_version: Some("SSLv3".to_owned()), ..Default::default() };
        assert!(validate_tls_options(&tls).is_err());
        let tls = TlsConfig { min_version: Some("TLSv1_3".to_owned()), max_version: Some("TLSv1_2".to_owned()), ..Default::default() };
        assert!(validate_tls_options(&tls).is_err());
        let tls = TlsConfig { cipher_suites: vec!["TLS_NULL".to_owned()], ..Default::default() };
        assert!(validate_tls_options(&tls).is_err());
    }

    #[test]
    fn garbage_material_is_rejected() {
        let material = CertificateMaterial {
            key: ResourceKey::namespaced("cert", "default"),
            certificate: b"not a certificate".to_vec(),
            private_key: b"not a key".to_vec(),
        };
        assert!(validate_material(&material).is_err());
    }
}
