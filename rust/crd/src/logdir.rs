//! The resolved log file directory, the single storage backend the history
//! server reads event logs from.
//!
//! [`ResolvedLogDir::resolve`] turns the backend given in the resource into a
//! validated value object. All workload configuration concerning the backend
//! (Spark properties, credential volumes, TLS material) is derived from it and
//! recomputed on every reconciliation, so removing the backend also removes
//! every credential and directory property from the rendered configuration.

use std::collections::BTreeMap;

use snafu::{ResultExt, Snafu};
use stackable_operator::{
    builder::pod::volume::{
        SecretFormat, SecretOperatorVolumeSourceBuilder, SecretOperatorVolumeSourceBuilderError,
        VolumeBuilder,
    },
    client::Client,
    commons::{secret_class::SecretClassVolume, tls_verification::TlsVerification},
    k8s_openapi::api::core::v1::{Volume, VolumeMount},
};
use strum::{EnumDiscriminants, IntoStaticStr};

use crate::{
    constants::*,
    history::{
        AzureConnectionProtocol, AzureLogFileDirectorySpec, LogFileDirectorySpec,
        S3LogFileDirectorySpec,
    },
    s3::{S3AccessStyle, S3ConnectionSpec},
    tlscerts,
};

#[derive(Snafu, Debug, EnumDiscriminants)]
#[strum_discriminants(derive(IntoStaticStr))]
#[allow(clippy::enum_variant_names)]
pub enum Error {
    #[snafu(display("missing bucket name for history logs"))]
    BucketNameMissing,

    #[snafu(display("missing container name for history logs"))]
    ContainerNameMissing,

    #[snafu(display("missing storage account for history logs"))]
    StorageAccountMissing,

    #[snafu(display("tls non-verification not supported"))]
    S3TlsNoVerificationNotSupported,

    #[snafu(display("failed to resolve the S3 connection"))]
    ResolveS3Connection { source: crate::s3::Error },

    #[snafu(display("failed to build TLS certificate SecretClass Volume"))]
    TlsCertSecretClassVolumeBuild {
        source: SecretOperatorVolumeSourceBuilderError,
    },

    #[snafu(display("failed to build credentials Volume"))]
    CredentialsVolumeBuild {
        source: stackable_operator::commons::secret_class::SecretClassVolumeError,
    },
}

pub enum ResolvedLogDir {
    S3(S3LogDir),
    Azure(AzureLogDir),
}

impl ResolvedLogDir {
    pub async fn resolve(
        log_file_dir: &LogFileDirectorySpec,
        namespace: &str,
        client: &Client,
    ) -> Result<ResolvedLogDir, Error> {
        match log_file_dir {
            LogFileDirectorySpec::S3(s3_log_dir) => S3LogDir::resolve(s3_log_dir, namespace, client)
                .await
                .map(ResolvedLogDir::S3),
            LogFileDirectorySpec::Azure(azure_log_dir) => {
                AzureLogDir::new(azure_log_dir).map(ResolvedLogDir::Azure)
            }
        }
    }

    /// The URI the event logs are read from, e.g. `s3a://bucket/prefix` or
    /// `abfss://container@account.dfs.core.windows.net/prefix`.
    pub fn url(&self) -> String {
        match self {
            ResolvedLogDir::S3(s3_log_dir) => s3_log_dir.url(),
            ResolvedLogDir::Azure(azure_log_dir) => azure_log_dir.url(),
        }
    }

    pub fn tls_enabled(&self) -> bool {
        self.tls_secret_name().is_some()
    }

    pub fn tls_secret_name(&self) -> Option<&str> {
        match self {
            ResolvedLogDir::S3(s3_log_dir) => tlscerts::tls_secret_name(&s3_log_dir.connection),
            ResolvedLogDir::Azure(_) => None,
        }
    }

    /// The properties needed for reading event logs from the backend. These
    /// properties are written to the `SPARK_DEFAULTS_FILE_NAME` file.
    ///
    /// Credentials are never part of the result. S3 keys are exported as
    /// environment variables on the container start command, the Azure
    /// account key is appended to the writable configuration copy there.
    pub fn history_server_spark_config(&self) -> BTreeMap<String, String> {
        match self {
            ResolvedLogDir::S3(s3_log_dir) => s3_log_dir.history_server_spark_config(),
            ResolvedLogDir::Azure(azure_log_dir) => azure_log_dir.history_server_spark_config(),
        }
    }

    /// The properties an event log producer (a Spark application) needs to
    /// write into the same backend. Published via the discovery ConfigMap.
    pub fn application_spark_config(&self) -> BTreeMap<String, String> {
        match self {
            ResolvedLogDir::S3(s3_log_dir) => s3_log_dir.application_spark_config(),
            ResolvedLogDir::Azure(azure_log_dir) => azure_log_dir.application_spark_config(),
        }
    }

    pub fn volumes(&self) -> Result<Vec<Volume>, Error> {
        match self {
            ResolvedLogDir::S3(s3_log_dir) => s3_log_dir.volumes(),
            ResolvedLogDir::Azure(azure_log_dir) => {
                Ok(azure_log_dir.credentials_volume()?.into_iter().collect())
            }
        }
    }

    pub fn volume_mounts(&self) -> Vec<VolumeMount> {
        match self {
            ResolvedLogDir::S3(s3_log_dir) => s3_log_dir.volume_mounts(),
            ResolvedLogDir::Azure(azure_log_dir) => {
                azure_log_dir.credentials_volume_mount().into_iter().collect()
            }
        }
    }

    pub fn credentials_mount_path(&self) -> Option<String> {
        match self {
            ResolvedLogDir::S3(s3_log_dir) => s3_log_dir.credentials_mount_path(),
            ResolvedLogDir::Azure(azure_log_dir) => Some(azure_log_dir.credentials_mount_path()),
        }
    }
}

pub struct S3LogDir {
    pub bucket_name: String,
    pub prefix: String,
    pub connection: S3ConnectionSpec,
}

impl S3LogDir {
    pub async fn resolve(
        log_file_dir: &S3LogFileDirectorySpec,
        namespace: &str,
        client: &Client,
    ) -> Result<S3LogDir, Error> {
        if log_file_dir.bucket.bucket_name.is_empty() {
            return BucketNameMissingSnafu.fail();
        }

        let connection = log_file_dir
            .bucket
            .connection
            .resolve(client, namespace)
            .await
            .context(ResolveS3ConnectionSnafu)?;

        if let Some(tls) = &connection.tls.tls {
            if let TlsVerification::None {} = tls.verification {
                return S3TlsNoVerificationNotSupportedSnafu.fail();
            }
        }

        let log_dir = S3LogDir {
            bucket_name: log_file_dir.bucket.bucket_name.clone(),
            prefix: log_file_dir.prefix.clone(),
            connection,
        };
        tracing::debug!(url = %log_dir.url(), "resolved S3 log file directory");

        Ok(log_dir)
    }

    fn url(&self) -> String {
        format!(
            "s3a://{bucket_name}/{prefix}",
            bucket_name = self.bucket_name,
            prefix = self.prefix
        )
    }

    pub fn history_server_spark_config(&self) -> BTreeMap<String, String> {
        let mut config = BTreeMap::from([
            ("spark.history.fs.logDirectory".to_string(), self.url()),
            (
                "spark.hadoop.fs.s3a.path.style.access".to_string(),
                (self.connection.access_style == S3AccessStyle::Path).to_string(),
            ),
            (
                "spark.hadoop.fs.s3a.connection.ssl.enabled".to_string(),
                self.connection.ssl_enabled().to_string(),
            ),
        ]);

        // no endpoint property means the provider default endpoint
        if let Some(endpoint) = self.connection.endpoint() {
            config.insert("spark.hadoop.fs.s3a.endpoint".to_string(), endpoint);
        }

        config
    }

    pub fn application_spark_config(&self) -> BTreeMap<String, String> {
        let mut result = BTreeMap::from([
            ("spark.eventLog.enabled".to_string(), "true".to_string()),
            ("spark.eventLog.dir".to_string(), self.url()),
        ]);

        let bucket_name = &self.bucket_name;
        if let Some(endpoint) = self.connection.endpoint() {
            result.insert(
                format!("spark.hadoop.fs.s3a.bucket.{bucket_name}.endpoint"),
                endpoint,
            );
        }
        result.insert(
            format!("spark.hadoop.fs.s3a.bucket.{bucket_name}.path.style.access"),
            (self.connection.access_style == S3AccessStyle::Path).to_string(),
        );
        if let Some(secret_dir) = self.credentials_mount_path() {
            // The credentials are not used here, they are interpolated by the
            // consumer which has the same SecretClass volume mounted.
            result.insert(
                format!("spark.hadoop.fs.s3a.bucket.{bucket_name}.access.key"),
                format!("\"$(cat {secret_dir}/{ACCESS_KEY_ID})\""),
            );
            result.insert(
                format!("spark.hadoop.fs.s3a.bucket.{bucket_name}.secret.key"),
                format!("\"$(cat {secret_dir}/{SECRET_ACCESS_KEY})\""),
            );
            result.insert(
                format!("spark.hadoop.fs.s3a.bucket.{bucket_name}.aws.credentials.provider"),
                "org.apache.hadoop.fs.s3a.SimpleAWSCredentialsProvider".to_string(),
            );
        } else {
            result.insert(
                format!("spark.hadoop.fs.s3a.bucket.{bucket_name}.aws.credentials.provider"),
                "org.apache.hadoop.fs.s3a.AnonymousAWSCredentialsProvider".to_string(),
            );
        }

        result
    }

    pub fn volumes(&self) -> Result<Vec<Volume>, Error> {
        let mut volumes: Vec<Volume> = self.credentials_volume()?.into_iter().collect();

        if let Some(secret_name) = tlscerts::tls_secret_name(&self.connection) {
            volumes.push(
                VolumeBuilder::new(secret_name)
                    .ephemeral(
                        SecretOperatorVolumeSourceBuilder::new(secret_name)
                            .with_format(SecretFormat::TlsPkcs12)
                            .build()
                            .context(TlsCertSecretClassVolumeBuildSnafu)?,
                    )
                    .build(),
            );
        }
        Ok(volumes)
    }

    pub fn volume_mounts(&self) -> Vec<VolumeMount> {
        let mut volume_mounts: Vec<VolumeMount> =
            self.credentials_volume_mount().into_iter().collect();

        if let Some(secret_name) = tlscerts::tls_secret_name(&self.connection) {
            let secret_dir = format!("{STACKABLE_MOUNT_PATH_TLS}/{secret_name}");

            volume_mounts.push(VolumeMount {
                name: secret_name.to_string(),
                mount_path: secret_dir,
                ..VolumeMount::default()
            });
        }
        volume_mounts
    }

    pub fn credentials_volume(&self) -> Result<Option<Volume>, Error> {
        self.credentials()
            .map(|credentials| {
                credentials
                    .to_volume(credentials.secret_class.as_ref())
                    .context(CredentialsVolumeBuildSnafu)
            })
            .transpose()
    }

    pub fn credentials_volume_mount(&self) -> Option<VolumeMount> {
        self.credentials().map(|secret_class_volume| VolumeMount {
            name: secret_class_volume.secret_class.clone(),
            mount_path: format!(
                "{}/{}",
                SECRETS_MOUNT_DIR, secret_class_volume.secret_class
            ),
            ..VolumeMount::default()
        })
    }

    pub fn credentials(&self) -> Option<SecretClassVolume> {
        self.connection.credentials.clone()
    }

    pub fn credentials_mount_path(&self) -> Option<String> {
        self.credentials().map(|secret_class_volume| {
            format!(
                "{}/{}",
                SECRETS_MOUNT_DIR, secret_class_volume.secret_class
            )
        })
    }
}

pub struct AzureLogDir {
    pub container: String,
    pub storage_account: String,
    pub prefix: String,
    pub protocol: AzureConnectionProtocol,
    pub credentials: SecretClassVolume,
}

impl AzureLogDir {
    pub fn new(log_file_dir: &AzureLogFileDirectorySpec) -> Result<AzureLogDir, Error> {
        if log_file_dir.container.is_empty() {
            return ContainerNameMissingSnafu.fail();
        }
        if log_file_dir.storage_account.is_empty() {
            return StorageAccountMissingSnafu.fail();
        }

        Ok(AzureLogDir {
            container: log_file_dir.container.clone(),
            storage_account: log_file_dir.storage_account.clone(),
            prefix: log_file_dir.prefix.clone(),
            protocol: log_file_dir.connection_protocol.clone(),
            credentials: log_file_dir.credentials.clone(),
        })
    }

    fn url(&self) -> String {
        format!(
            "{protocol}://{container}@{account}.{host_suffix}/{prefix}",
            protocol = self.protocol,
            container = self.container,
            account = self.storage_account,
            host_suffix = self.protocol.host_suffix(),
            prefix = self.prefix
        )
    }

    /// The property carrying the storage account key, e.g.
    /// `spark.hadoop.fs.azure.account.key.acct.dfs.core.windows.net`.
    pub fn account_key_property(&self) -> String {
        format!(
            "spark.hadoop.fs.azure.account.key.{account}.{host_suffix}",
            account = self.storage_account,
            host_suffix = self.protocol.host_suffix()
        )
    }

    pub fn history_server_spark_config(&self) -> BTreeMap<String, String> {
        // The account key is appended to the writable configuration copy on
        // container start and must not land in the ConfigMap.
        BTreeMap::from([("spark.history.fs.logDirectory".to_string(), self.url())])
    }

    pub fn application_spark_config(&self) -> BTreeMap<String, String> {
        BTreeMap::from([
            ("spark.eventLog.enabled".to_string(), "true".to_string()),
            ("spark.eventLog.dir".to_string(), self.url()),
            (
                self.account_key_property(),
                format!(
                    "\"$(cat {secret_dir}/{AZURE_STORAGE_ACCOUNT_KEY})\"",
                    secret_dir = self.credentials_mount_path()
                ),
            ),
        ])
    }

    pub fn credentials_volume(&self) -> Result<Option<Volume>, Error> {
        self.credentials
            .to_volume(self.credentials.secret_class.as_ref())
            .context(CredentialsVolumeBuildSnafu)
            .map(Some)
    }

    pub fn credentials_volume_mount(&self) -> Option<VolumeMount> {
        Some(VolumeMount {
            name: self.credentials.secret_class.clone(),
            mount_path: self.credentials_mount_path(),
            ..VolumeMount::default()
        })
    }

    pub fn credentials_mount_path(&self) -> String {
        format!(
            "{}/{}",
            SECRETS_MOUNT_DIR, self.credentials.secret_class
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn s3_log_dir(host: Option<&str>) -> S3LogDir {
        S3LogDir {
            bucket_name: "data".to_string(),
            prefix: "logs".to_string(),
            connection: S3ConnectionSpec {
                host: host.map(str::to_string),
                port: host.map(|_| 9000),
                access_style: S3AccessStyle::Path,
                ..S3ConnectionSpec::default()
            },
        }
    }

    fn azure_log_dir(protocol: AzureConnectionProtocol) -> AzureLogDir {
        AzureLogDir {
            container: "c".to_string(),
            storage_account: "acct".to_string(),
            prefix: "p".to_string(),
            protocol,
            credentials: SecretClassVolume {
                secret_class: "azure-credentials".to_string(),
                scope: None,
            },
        }
    }

    #[test]
    fn test_s3_url() {
        assert_eq!(s3_log_dir(None).url(), "s3a://data/logs");
    }

    #[test]
    fn test_abfss_url() {
        assert_eq!(
            azure_log_dir(AzureConnectionProtocol::Abfss).url(),
            "abfss://c@acct.dfs.core.windows.net/p"
        );
    }

    #[test]
    fn test_wasbs_url() {
        assert_eq!(
            azure_log_dir(AzureConnectionProtocol::Wasbs).url(),
            "wasbs://c@acct.blob.core.windows.net/p"
        );
    }

    #[test]
    fn test_s3_config_without_endpoint() {
        let config = s3_log_dir(None).history_server_spark_config();

        assert_eq!(
            config.get("spark.history.fs.logDirectory").map(String::as_str),
            Some("s3a://data/logs")
        );
        // absent endpoint means the provider default, no override property
        assert!(!config.contains_key("spark.hadoop.fs.s3a.endpoint"));
        assert_eq!(
            config
                .get("spark.hadoop.fs.s3a.connection.ssl.enabled")
                .map(String::as_str),
            Some("true")
        );
    }

    #[test]
    fn test_s3_config_with_endpoint() {
        let config = s3_log_dir(Some("minio")).history_server_spark_config();

        assert_eq!(
            config.get("spark.hadoop.fs.s3a.endpoint").map(String::as_str),
            Some("http://minio:9000")
        );
        assert_eq!(
            config
                .get("spark.hadoop.fs.s3a.path.style.access")
                .map(String::as_str),
            Some("true")
        );
        assert_eq!(
            config
                .get("spark.hadoop.fs.s3a.connection.ssl.enabled")
                .map(String::as_str),
            Some("false")
        );
    }

    #[test]
    fn test_azure_history_config_carries_no_credentials() {
        let config = azure_log_dir(AzureConnectionProtocol::Abfss).history_server_spark_config();

        assert_eq!(config.len(), 1);
        assert!(config.contains_key("spark.history.fs.logDirectory"));
    }

    #[test]
    fn test_azure_application_config() {
        let log_dir = azure_log_dir(AzureConnectionProtocol::Abfss);
        let config = log_dir.application_spark_config();

        assert_eq!(
            config
                .get("spark.hadoop.fs.azure.account.key.acct.dfs.core.windows.net")
                .map(String::as_str),
            Some("\"$(cat /stackable/secrets/azure-credentials/accessKey)\"")
        );
    }
}
