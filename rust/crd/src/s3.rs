//! Value objects describing the connection to an S3 endpoint.
//!
//! The connection can be given inline in the [`SparkHistoryServer`] resource
//! or as a reference to an [`S3Connection`] object that a credential provider
//! maintains in the same namespace. Unknown fields are ignored, missing
//! optional fields stay absent: an absent host means "use the provider
//! default endpoint".
//!
//! [`SparkHistoryServer`]: crate::history::SparkHistoryServer

use serde::{Deserialize, Serialize};
use snafu::{ResultExt, Snafu};
use stackable_operator::{
    client::Client,
    commons::{secret_class::SecretClassVolume, tls_verification::TlsClientDetails},
    kube::CustomResource,
    schemars::{self, JsonSchema},
};
use strum::Display;

#[derive(Snafu, Debug)]
pub enum Error {
    #[snafu(display("failed to retrieve S3 connection [{name}]"))]
    RetrieveS3Connection {
        source: stackable_operator::client::Error,
        name: String,
    },
}

/// An S3 bucket with an inlined or referenced connection specification.
#[derive(Clone, Debug, Deserialize, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct S3BucketSpec {
    /// Name of the bucket the event logs are stored in.
    pub bucket_name: String,

    /// The connection to use for this bucket.
    pub connection: S3ConnectionDef,
}

/// An inlined connection specification or the name of an [`S3Connection`]
/// object to fetch it from.
#[derive(Clone, Debug, Deserialize, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum S3ConnectionDef {
    Inline(S3ConnectionSpec),
    Reference(String),
}

impl S3ConnectionDef {
    /// Returns the [`S3ConnectionSpec`], fetching the referenced object from
    /// the API server if necessary.
    pub async fn resolve(
        &self,
        client: &Client,
        namespace: &str,
    ) -> Result<S3ConnectionSpec, Error> {
        match self {
            S3ConnectionDef::Inline(connection_spec) => Ok(connection_spec.clone()),
            S3ConnectionDef::Reference(connection_ref) => client
                .get::<S3Connection>(connection_ref, namespace)
                .await
                .map(|connection| connection.spec)
                .context(RetrieveS3ConnectionSnafu {
                    name: connection_ref,
                }),
        }
    }
}

/// S3 connection definition, deployable as a standalone object so that a
/// credential provider can manage it independently of the history server.
#[derive(Clone, CustomResource, Debug, Deserialize, JsonSchema, PartialEq, Serialize)]
#[kube(
    group = "spark-history.stackable.tech",
    version = "v1alpha1",
    kind = "S3Connection",
    plural = "s3connections",
    namespaced,
    crates(
        kube_core = "stackable_operator::kube::core",
        k8s_openapi = "stackable_operator::k8s_openapi",
        schemars = "stackable_operator::schemars"
    )
)]
#[serde(rename_all = "camelCase")]
pub struct S3ConnectionSpec {
    /// Hostname of the S3 server without protocol or port.
    /// When absent, the provider default endpoint is used and no endpoint
    /// property is rendered into the workload configuration.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,

    /// Port the S3 server listens on.
    /// When absent, the default port for the protocol is assumed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,

    /// Which access style to use, virtual-hosted-style or path-style.
    #[serde(default)]
    pub access_style: S3AccessStyle,

    /// SecretClass volume providing the `accessKeyId` and `secretAccessKey`
    /// files. When absent the bucket is accessed anonymously.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credentials: Option<SecretClassVolume>,

    #[serde(flatten)]
    pub tls: TlsClientDetails,
}

// `TlsClientDetails` does not implement `Default`, so the derive cannot expand.
// This hand-written impl reproduces exactly what `#[derive(Default)]` would
// generate: every field set to its `Default`, with `tls` at its only natural
// default (`tls: None`).
impl Default for S3ConnectionSpec {
    fn default() -> Self {
        Self {
            host: None,
            port: None,
            access_style: S3AccessStyle::default(),
            credentials: None,
            tls: TlsClientDetails { tls: None },
        }
    }
}

impl S3ConnectionSpec {
    /// Endpoint URL built from host and port, `None` for the provider default
    /// endpoint.
    pub fn endpoint(&self) -> Option<String> {
        let protocol = if self.tls.uses_tls() { "https" } else { "http" };
        self.host.as_ref().map(|host| match self.port {
            Some(port) => format!("{protocol}://{host}:{port}"),
            None => format!("{protocol}://{host}"),
        })
    }

    /// Whether connections to the endpoint are encrypted. The provider
    /// default endpoint is always https.
    pub fn ssl_enabled(&self) -> bool {
        self.host.is_none() || self.tls.uses_tls()
    }
}

#[derive(
    Clone, Debug, Default, Deserialize, Display, Eq, JsonSchema, PartialEq, Serialize,
)]
#[serde(rename_all = "PascalCase")]
pub enum S3AccessStyle {
    /// Use path-style access as described in <https://docs.aws.amazon.com/AmazonS3/latest/userguide/VirtualHosting.html#path-style-access>
    Path,

    /// Use as virtual hosted-style access as described in <https://docs.aws.amazon.com/AmazonS3/latest/userguide/VirtualHosting.html#virtual-hosted-style-access>
    #[default]
    VirtualHosted,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_with_host_and_port() {
        let connection = S3ConnectionSpec {
            host: Some("minio".to_string()),
            port: Some(9000),
            ..S3ConnectionSpec::default()
        };

        assert_eq!(connection.endpoint().as_deref(), Some("http://minio:9000"));
        assert!(!connection.ssl_enabled());
    }

    #[test]
    fn test_endpoint_absent_uses_provider_default() {
        let connection = S3ConnectionSpec::default();

        assert_eq!(connection.endpoint(), None);
        assert!(connection.ssl_enabled());
    }

    #[test]
    fn test_deserialize_reference() {
        let bucket: S3BucketSpec = serde_yaml::from_str(
            "bucketName: spark-logs\nconnection:\n  reference: history-s3-connection\n",
        )
        .unwrap();

        assert_eq!(bucket.bucket_name, "spark-logs");
        assert_eq!(
            bucket.connection,
            S3ConnectionDef::Reference("history-s3-connection".to_string())
        );
    }
}
