//! Truststore handling for log directories served over TLS with a
//! non-public CA.
//!
//! The CA certificate is mounted as a PKCS12 truststore by the secret
//! operator. On container start the system truststore is converted to PKCS12
//! and the mounted certificate is imported into it, then the JVM is pointed
//! at the result via the truststore system properties.

use stackable_operator::commons::tls_verification::{
    CaCert, Tls, TlsClientDetails, TlsServerVerification, TlsVerification,
};

use crate::{
    constants::{
        STACKABLE_MOUNT_PATH_TLS, STACKABLE_TLS_STORE_PASSWORD, STACKABLE_TRUST_STORE,
        SYSTEM_TRUST_STORE, SYSTEM_TRUST_STORE_PASSWORD,
    },
    s3::S3ConnectionSpec,
};

/// Name of the SecretClass holding the CA certificate, if server verification
/// against a custom CA is configured.
pub fn tls_secret_name(connection: &S3ConnectionSpec) -> Option<&str> {
    if let S3ConnectionSpec {
        tls:
            TlsClientDetails {
                tls:
                    Some(Tls {
                        verification:
                            TlsVerification::Server(TlsServerVerification {
                                ca_cert: CaCert::SecretClass(ref secret_name),
                            }),
                    }),
            },
        ..
    } = connection
    {
        return Some(secret_name);
    }

    None
}

pub fn convert_system_trust_store_to_pkcs12() -> Vec<String> {
    vec![format!(
        "keytool -importkeystore -srckeystore {SYSTEM_TRUST_STORE} -srcstoretype jks -srcstorepass {SYSTEM_TRUST_STORE_PASSWORD} -destkeystore {STACKABLE_TRUST_STORE}/truststore.p12 -deststoretype pkcs12 -deststorepass {STACKABLE_TLS_STORE_PASSWORD} -noprompt"
    )]
}

pub fn import_truststore(secret_name: &str) -> Vec<String> {
    let mount_trust_store_path = format!("{STACKABLE_MOUNT_PATH_TLS}/{secret_name}/truststore.p12");
    let trust_store_path = format!("{STACKABLE_TRUST_STORE}/truststore.p12");

    vec![
        format!("echo Importing [{mount_trust_store_path}] to [{trust_store_path}] ..."),
        format!(
            "keytool -importkeystore -srckeystore {mount_trust_store_path} -srcalias 1 -srcstorepass \"\" -destkeystore {trust_store_path} -destalias stackable-{secret_name} -storepass {STACKABLE_TLS_STORE_PASSWORD} -noprompt"
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tls_secret_name() {
        let connection: S3ConnectionSpec = serde_yaml::from_str(
            "host: s3.example.com\ntls:\n  verification:\n    server:\n      caCert:\n        secretClass: minio-ca\n",
        )
        .unwrap();

        assert_eq!(tls_secret_name(&connection), Some("minio-ca"));
    }

    #[test]
    fn test_no_tls_secret_name_without_verification() {
        let connection = S3ConnectionSpec::default();

        assert_eq!(tls_secret_name(&connection), None);
    }
}
