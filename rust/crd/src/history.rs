use std::collections::{BTreeMap, HashMap};

use product_config::{types::PropertyNameKind, ProductConfigManager};
use serde::{Deserialize, Serialize};
use snafu::{OptionExt, ResultExt, Snafu};
use stackable_operator::{
    commons::{
        affinity::StackableAffinity,
        cluster_operation::ClusterOperation,
        product_image_selection::{ProductImage, ResolvedProductImage},
        resources::{
            CpuLimitsFragment, MemoryLimitsFragment, NoRuntimeLimits, NoRuntimeLimitsFragment,
            Resources, ResourcesFragment,
        },
        secret_class::SecretClassVolume,
    },
    config::{
        fragment::{self, Fragment, ValidationError},
        merge::Merge,
    },
    k8s_openapi::{api::core::v1::EnvVar, apimachinery::pkg::api::resource::Quantity},
    kube::{runtime::reflector::ObjectRef, CustomResource, ResourceExt},
    product_config_utils::{
        transform_all_roles_to_config, validate_all_roles_and_groups_config, Configuration,
        ValidatedRoleConfigByPropertyKind,
    },
    product_logging::{self, spec::Logging},
    role_utils::{Role, RoleGroup, RoleGroupRef},
    schemars::{self, JsonSchema},
    status::condition::{ClusterCondition, HasStatusCondition},
};
use strum::{Display, EnumIter};

use crate::{affinity::history_affinity, constants::*, logdir::ResolvedLogDir, s3::S3BucketSpec};

#[derive(Snafu, Debug)]
pub enum Error {
    #[snafu(display("failed to transform configs"))]
    ProductConfigTransform {
        source: stackable_operator::product_config_utils::Error,
    },

    #[snafu(display("invalid product config"))]
    InvalidProductConfig {
        source: stackable_operator::product_config_utils::Error,
    },

    #[snafu(display("fragment validation failure"))]
    FragmentValidationFailure { source: ValidationError },

    #[snafu(display("the role group {role_group} is not defined"))]
    CannotRetrieveRoleGroup { role_group: String },

    #[snafu(display(
        "the authorization filter only works behind a proxy, an ingress URL must be configured"
    ))]
    AuthorizationWithoutIngress,
}

/// A Spark history server deployment. The operator renders the Spark
/// configuration from the storage backend given here and rolls the server
/// whenever the rendered configuration changes.
#[derive(Clone, CustomResource, Debug, Deserialize, JsonSchema, Serialize)]
#[kube(
    group = "spark-history.stackable.tech",
    version = "v1alpha1",
    kind = "SparkHistoryServer",
    shortname = "shs",
    status = "SparkHistoryServerStatus",
    namespaced,
    crates(
        kube_core = "stackable_operator::kube::core",
        k8s_openapi = "stackable_operator::k8s_openapi",
        schemars = "stackable_operator::schemars"
    )
)]
#[serde(rename_all = "camelCase")]
pub struct SparkHistoryServerSpec {
    pub image: ProductImage,

    /// Global history server configuration that applies to all roles and role groups.
    #[serde(default)]
    pub cluster_config: SparkHistoryServerClusterConfig,

    /// Cluster operations like pause reconciliation or cluster stop.
    #[serde(default)]
    pub cluster_operation: ClusterOperation,

    /// Name of the Vector aggregator discovery ConfigMap.
    /// It must contain the key `ADDRESS` with the address of the Vector aggregator.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vector_aggregator_config_map_name: Option<String>,

    /// The log file directory the event logs are read from. Without a
    /// directory no logs are persisted and the server serves an empty store.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_file_directory: Option<LogFileDirectorySpec>,

    /// A map of key/value strings that will be passed directly to Spark when deploying the history server.
    #[serde(default)]
    pub spark_conf: BTreeMap<String, String>,

    /// A history server node role definition.
    pub nodes: Role<HistoryConfigFragment>,
}

#[derive(Clone, Deserialize, Debug, Default, Eq, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SparkHistoryServerClusterConfig {
    /// This field controls which type of Service the Operator creates for this HistoryServer:
    ///
    /// * cluster-internal: Use a ClusterIP service
    ///
    /// * external-unstable: Use a NodePort service
    ///
    /// * external-stable: Use a LoadBalancer service
    ///
    /// This is a temporary solution with the goal to keep yaml manifests forward compatible.
    /// In the future, this setting will control which ListenerClass <https://docs.stackable.tech/home/stable/listener-operator/listenerclass.html>
    /// will be used to expose the service, and ListenerClass names will stay the same, allowing for a non-breaking change.
    #[serde(default)]
    pub listener_class: CurrentlySupportedListenerClasses,

    /// The URL the history server UI is reachable at when served behind a
    /// reverse proxy or ingress. Drives the `spark.ui.proxyBase` and
    /// `spark.ui.proxyRedirectUri` properties.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ingress: Option<IngressConfig>,

    /// Restrict UI access to a list of users authenticated by an
    /// authorizing proxy in front of the ingress.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authorization: Option<HistoryAuthorizationConfig>,
}

#[derive(Clone, Deserialize, Debug, Eq, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IngressConfig {
    /// Externally reachable URL of the history server UI, e.g.
    /// `https://spark.example.com/history`.
    pub url: String,
}

#[derive(Clone, Deserialize, Debug, Eq, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryAuthorizationConfig {
    /// Fully qualified class name of the servlet filter shipped in the
    /// product image that enforces the user allow-list.
    pub filter_class: String,

    /// Users allowed to access the UI, matched against the user header set
    /// by the authorizing proxy.
    pub authorized_users: Vec<String>,
}

// TODO: Temporary solution until listener-operator is finished
#[derive(Clone, Debug, Default, Display, Deserialize, Eq, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub enum CurrentlySupportedListenerClasses {
    #[default]
    #[serde(rename = "cluster-internal")]
    ClusterInternal,
    #[serde(rename = "external-unstable")]
    ExternalUnstable,
    #[serde(rename = "external-stable")]
    ExternalStable,
}

impl CurrentlySupportedListenerClasses {
    pub fn k8s_service_type(&self) -> String {
        match self {
            CurrentlySupportedListenerClasses::ClusterInternal => "ClusterIP".to_string(),
            CurrentlySupportedListenerClasses::ExternalUnstable => "NodePort".to_string(),
            CurrentlySupportedListenerClasses::ExternalStable => "LoadBalancer".to_string(),
        }
    }
}

#[derive(Clone, Debug, Default, Deserialize, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SparkHistoryServerStatus {
    #[serde(default)]
    pub conditions: Vec<ClusterCondition>,
}

impl HasStatusCondition for SparkHistoryServer {
    fn conditions(&self) -> Vec<ClusterCondition> {
        match &self.status {
            Some(status) => status.conditions.clone(),
            None => vec![],
        }
    }
}

impl SparkHistoryServer {
    /// Returns a reference to the role. Raises an error if the role is not defined.
    pub fn role(&self) -> &Role<HistoryConfigFragment> {
        &self.spec.nodes
    }

    /// Returns a reference to the role group. Raises an error if the role or role group are not defined.
    pub fn rolegroup(
        &self,
        rolegroup_ref: &RoleGroupRef<SparkHistoryServer>,
    ) -> Result<RoleGroup<HistoryConfigFragment>, Error> {
        self.spec
            .nodes
            .role_groups
            .get(&rolegroup_ref.role_group)
            .with_context(|| CannotRetrieveRoleGroupSnafu {
                role_group: rolegroup_ref.role_group.to_owned(),
            })
            .cloned()
    }

    pub fn merged_config(
        &self,
        rolegroup_ref: &RoleGroupRef<SparkHistoryServer>,
    ) -> Result<HistoryConfig, Error> {
        // Initialize the result with all default values as baseline
        let conf_defaults = HistoryConfig::default_config(&self.name_any());

        let role = &self.spec.nodes;

        // Retrieve role resource config
        let mut conf_role = role.config.config.to_owned();

        // Retrieve rolegroup specific resource config
        let mut conf_rolegroup = role
            .role_groups
            .get(&rolegroup_ref.role_group)
            .map(|rg| rg.config.config.clone())
            .unwrap_or_default();

        conf_role.merge(&conf_defaults);
        conf_rolegroup.merge(&conf_role);

        fragment::validate(conf_rolegroup).context(FragmentValidationFailureSnafu)
    }

    pub fn replicas(&self, rolegroup_ref: &RoleGroupRef<Self>) -> Option<i32> {
        self.spec
            .nodes
            .role_groups
            .get(&rolegroup_ref.role_group)
            .and_then(|rg| rg.replicas)
            .map(i32::from)
    }

    pub fn cleaner_rolegroups(&self) -> Vec<RoleGroupRef<SparkHistoryServer>> {
        let mut rgs = vec![];
        for (rg_name, rg_config) in &self.spec.nodes.role_groups {
            if let Some(true) = rg_config.config.config.cleaner {
                rgs.push(RoleGroupRef {
                    cluster: ObjectRef::from_obj(self),
                    role: HISTORY_ROLE_NAME.into(),
                    role_group: rg_name.into(),
                });
            }
        }
        rgs
    }

    pub fn validated_role_config(
        &self,
        resolved_product_image: &ResolvedProductImage,
        product_config: &ProductConfigManager,
    ) -> Result<ValidatedRoleConfigByPropertyKind, Error> {
        let roles_to_validate: HashMap<String, (Vec<PropertyNameKind>, Role<HistoryConfigFragment>)> =
            vec![(
                HISTORY_ROLE_NAME.to_string(),
                (
                    vec![
                        PropertyNameKind::File(SPARK_DEFAULTS_FILE_NAME.to_string()),
                        PropertyNameKind::File(SPARK_ENV_SH_FILE_NAME.to_string()),
                        PropertyNameKind::File(JVM_SECURITY_PROPERTIES_FILE.to_string()),
                    ],
                    self.spec.nodes.clone(),
                ),
            )]
            .into_iter()
            .collect();

        let role_config = transform_all_roles_to_config(self, roles_to_validate);

        validate_all_roles_and_groups_config(
            &resolved_product_image.product_version,
            &role_config.context(ProductConfigTransformSnafu)?,
            product_config,
            false,
            false,
        )
        .context(InvalidProductConfigSnafu)
    }

    pub fn merged_env(
        &self,
        logdir: Option<&ResolvedLogDir>,
        role_group_env_overrides: HashMap<String, String>,
    ) -> Vec<EnvVar> {
        // Maps env var name to env var object. This allows env_overrides to work
        // as expected (i.e. users can override the env var value).
        let mut vars: BTreeMap<String, EnvVar> = BTreeMap::new();
        let role_env_overrides = &self.role().config.env_overrides;

        // This env var prevents the history server from detaching itself from the
        // start script because this leads to the Pod terminating immediately.
        vars.insert(
            "SPARK_NO_DAEMONIZE".to_string(),
            EnvVar {
                name: "SPARK_NO_DAEMONIZE".to_string(),
                value: Some("true".into()),
                value_from: None,
            },
        );
        vars.insert(
            "SPARK_DAEMON_CLASSPATH".to_string(),
            EnvVar {
                name: "SPARK_DAEMON_CLASSPATH".to_string(),
                value: Some("/stackable/spark/extra-jars/*".into()),
                value_from: None,
            },
        );

        let mut history_opts = vec![
            format!("-Dlog4j.configurationFile={VOLUME_MOUNT_PATH_LOG_CONFIG}/{LOG4J2_CONFIG_FILE}"),
            format!(
                "-Djava.security.properties={VOLUME_MOUNT_PATH_CONFIG}/{JVM_SECURITY_PROPERTIES_FILE}"
            ),
            format!("-javaagent:/stackable/jmx/jmx_prometheus_javaagent.jar={METRICS_PORT}:/stackable/jmx/config.yaml"),
        ];

        // if TLS is enabled, the JVM has to consult the operator-built truststore
        if logdir.is_some_and(|logdir| logdir.tls_enabled()) {
            history_opts.extend(vec![
                format!("-Djavax.net.ssl.trustStore={STACKABLE_TRUST_STORE}/truststore.p12"),
                format!("-Djavax.net.ssl.trustStorePassword={STACKABLE_TLS_STORE_PASSWORD}"),
                format!("-Djavax.net.ssl.trustStoreType=pkcs12"),
            ]);
        }

        vars.insert(
            "SPARK_HISTORY_OPTS".to_string(),
            EnvVar {
                name: "SPARK_HISTORY_OPTS".to_string(),
                value: Some(history_opts.join(" ")),
                value_from: None,
            },
        );

        // apply the role overrides
        let mut role_envs = role_env_overrides.iter().map(|(env_name, env_value)| {
            (
                env_name.clone(),
                EnvVar {
                    name: env_name.clone(),
                    value: Some(env_value.to_owned()),
                    value_from: None,
                },
            )
        });

        vars.extend(&mut role_envs);

        // apply the role-group overrides
        let mut role_group_envs =
            role_group_env_overrides
                .into_iter()
                .map(|(env_name, env_value)| {
                    (
                        env_name.clone(),
                        EnvVar {
                            name: env_name.clone(),
                            value: Some(env_value),
                            value_from: None,
                        },
                    )
                });

        vars.extend(&mut role_group_envs);

        // convert to Vec
        vars.into_values().collect()
    }

    /// Spark UI reverse-proxy properties derived from the ingress URL.
    pub fn ui_proxy_config(&self) -> BTreeMap<String, String> {
        let Some(ingress) = &self.spec.cluster_config.ingress else {
            return BTreeMap::new();
        };

        let (redirect_uri, proxy_base) = split_ingress_url(&ingress.url);

        BTreeMap::from([
            ("spark.ui.proxyBase".to_string(), proxy_base),
            ("spark.ui.proxyRedirectUri".to_string(), redirect_uri),
        ])
    }

    /// UI authorization filter properties. The filter only makes sense behind
    /// an authorizing proxy, so an ingress URL is required.
    pub fn authorization_config(&self) -> Result<BTreeMap<String, String>, Error> {
        let Some(authorization) = &self.spec.cluster_config.authorization else {
            return Ok(BTreeMap::new());
        };

        if self.spec.cluster_config.ingress.is_none() {
            return AuthorizationWithoutIngressSnafu.fail();
        }

        let filter_class = &authorization.filter_class;
        Ok(BTreeMap::from([
            ("spark.ui.filters".to_string(), filter_class.clone()),
            (
                format!("spark.{filter_class}.param.authorizedParameter"),
                AUTH_PROXY_USER_HEADER.to_string(),
            ),
            (
                format!("spark.{filter_class}.param.authorizedEntities"),
                authorization.authorized_users.join(","),
            ),
        ]))
    }
}

/// Splits an ingress URL into the proxy redirect URI (scheme and authority
/// with a trailing slash) and the proxy base path.
fn split_ingress_url(url: &str) -> (String, String) {
    let path_start = url
        .find("://")
        .map(|scheme_end| scheme_end + 3)
        .and_then(|authority_start| {
            url[authority_start..]
                .find('/')
                .map(|slash| authority_start + slash)
        });

    match path_start {
        Some(slash) => (url[..slash + 1].to_string(), url[slash..].to_string()),
        None => (format!("{url}/"), "/".to_string()),
    }
}

#[derive(Clone, Debug, Deserialize, JsonSchema, Serialize, Display)]
#[serde(rename_all = "camelCase")]
pub enum LogFileDirectorySpec {
    /// An S3 bucket storing the event logs
    #[strum(serialize = "s3")]
    S3(S3LogFileDirectorySpec),
    /// An Azure blob storage container storing the event logs
    #[strum(serialize = "azure")]
    Azure(AzureLogFileDirectorySpec),
}

#[derive(Clone, Debug, Deserialize, JsonSchema, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct S3LogFileDirectorySpec {
    /// Prefix (path) within the bucket the event logs are stored under.
    pub prefix: String,
    pub bucket: S3BucketSpec,
}

#[derive(Clone, Debug, Deserialize, JsonSchema, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AzureLogFileDirectorySpec {
    /// Prefix (path) within the container the event logs are stored under.
    pub prefix: String,

    /// Name of the blob container storing the event logs.
    pub container: String,

    /// Name of the storage account the container belongs to.
    pub storage_account: String,

    /// Protocol used to address the container.
    #[serde(default)]
    pub connection_protocol: AzureConnectionProtocol,

    /// SecretClass volume providing the `accessKey` file with the storage
    /// account key.
    pub credentials: SecretClassVolume,
}

#[derive(Clone, Debug, Default, Deserialize, Display, Eq, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum AzureConnectionProtocol {
    #[default]
    Abfss,
    Abfs,
    Wasbs,
    Wasb,
}

impl AzureConnectionProtocol {
    /// The storage service host suffix addressed by this protocol.
    pub fn host_suffix(&self) -> &'static str {
        match self {
            AzureConnectionProtocol::Abfss | AzureConnectionProtocol::Abfs => {
                "dfs.core.windows.net"
            }
            AzureConnectionProtocol::Wasbs | AzureConnectionProtocol::Wasb => {
                "blob.core.windows.net"
            }
        }
    }
}

#[allow(clippy::derive_partial_eq_without_eq)]
#[derive(Clone, Debug, Default, JsonSchema, PartialEq, Fragment)]
#[fragment_attrs(
    allow(clippy::derive_partial_eq_without_eq),
    derive(
        Clone,
        Debug,
        Default,
        Deserialize,
        Merge,
        JsonSchema,
        PartialEq,
        Serialize
    ),
    serde(rename_all = "camelCase")
)]
pub struct HistoryStorageConfig {}

#[derive(
    Clone,
    Debug,
    Deserialize,
    Display,
    Eq,
    EnumIter,
    JsonSchema,
    Ord,
    PartialEq,
    PartialOrd,
    Serialize,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum SparkHistoryServerContainer {
    SparkHistory,
    Vector,
}

#[derive(Clone, Debug, Default, JsonSchema, PartialEq, Fragment)]
#[fragment_attrs(
    derive(
        Clone,
        Debug,
        Default,
        Deserialize,
        Merge,
        JsonSchema,
        PartialEq,
        Serialize
    ),
    serde(rename_all = "camelCase")
)]
pub struct HistoryConfig {
    /// Run the file system cleaner in this role group. At most one role group
    /// with at most one replica may enable it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cleaner: Option<bool>,
    #[fragment_attrs(serde(default))]
    pub resources: Resources<HistoryStorageConfig, NoRuntimeLimits>,
    #[fragment_attrs(serde(default))]
    pub logging: Logging<SparkHistoryServerContainer>,
    #[fragment_attrs(serde(default))]
    pub affinity: StackableAffinity,
}

impl HistoryConfig {
    fn default_config(cluster_name: &str) -> HistoryConfigFragment {
        HistoryConfigFragment {
            cleaner: None,
            resources: ResourcesFragment {
                cpu: CpuLimitsFragment {
                    min: Some(Quantity("250m".to_owned())),
                    max: Some(Quantity("1".to_owned())),
                },
                memory: MemoryLimitsFragment {
                    limit: Some(Quantity("512Mi".to_owned())),
                    runtime_limits: NoRuntimeLimitsFragment {},
                },
                storage: HistoryStorageConfigFragment {},
            },
            logging: product_logging::spec::default_logging(),
            affinity: history_affinity(cluster_name),
        }
    }
}

impl Configuration for HistoryConfigFragment {
    type Configurable = SparkHistoryServer;

    fn compute_env(
        &self,
        _resource: &Self::Configurable,
        _role_name: &str,
    ) -> Result<BTreeMap<String, Option<String>>, stackable_operator::product_config_utils::Error>
    {
        Ok(BTreeMap::new())
    }

    fn compute_cli(
        &self,
        _resource: &Self::Configurable,
        _role_name: &str,
    ) -> Result<BTreeMap<String, Option<String>>, stackable_operator::product_config_utils::Error>
    {
        Ok(BTreeMap::new())
    }

    fn compute_files(
        &self,
        _resource: &Self::Configurable,
        _role_name: &str,
        _file: &str,
    ) -> Result<BTreeMap<String, Option<String>>, stackable_operator::product_config_utils::Error>
    {
        Ok(BTreeMap::new())
    }
}

#[cfg(test)]
mod test {
    use indoc::indoc;
    use rstest::rstest;

    use super::*;
    use crate::{logdir::S3LogDir, s3::S3ConnectionSpec};

    fn history_server_from(input: &str) -> SparkHistoryServer {
        let deserializer = serde_yaml::Deserializer::from_str(input);
        serde_yaml::with::singleton_map_recursive::deserialize(deserializer).unwrap()
    }

    #[test]
    pub fn test_env_overrides() {
        let input = indoc! {r#"
        ---
        apiVersion: spark-history.stackable.tech/v1alpha1
        kind: SparkHistoryServer
        metadata:
          name: spark-history
        spec:
          image:
            productVersion: 3.5.2
          logFileDirectory:
            s3:
              prefix: eventlogs/
              bucket:
                bucketName: spark-logs
                connection:
                  reference: my-s3-connection
          nodes:
            envOverrides:
              TEST_SPARK_HIST_VAR: ROLE
            roleGroups:
              default:
                replicas: 1
                config:
                  cleaner: true
                envOverrides:
                  TEST_SPARK_HIST_VAR: ROLEGROUP
        "#};

        let history = history_server_from(input);

        let log_dir = ResolvedLogDir::S3(S3LogDir {
            bucket_name: "my-bucket".to_string(),
            prefix: "prefix".to_string(),
            connection: S3ConnectionSpec {
                host: Some("my-s3".to_string()),
                ..S3ConnectionSpec::default()
            },
        });

        let merged_env = history.merged_env(
            Some(&log_dir),
            history
                .spec
                .nodes
                .role_groups
                .get("default")
                .unwrap()
                .config
                .env_overrides
                .clone(),
        );

        let env_map: BTreeMap<&str, Option<String>> = merged_env
            .iter()
            .map(|env_var| (env_var.name.as_str(), env_var.value.clone()))
            .collect();

        assert_eq!(
            Some(&Some("ROLEGROUP".to_string())),
            env_map.get("TEST_SPARK_HIST_VAR")
        );
        assert_eq!(
            Some(&Some("true".to_string())),
            env_map.get("SPARK_NO_DAEMONIZE")
        );
    }

    #[test]
    fn test_merged_env_tls_adds_truststore_properties() {
        let input = indoc! {r#"
        ---
        apiVersion: spark-history.stackable.tech/v1alpha1
        kind: SparkHistoryServer
        metadata:
          name: spark-history
        spec:
          image:
            productVersion: 3.5.2
          nodes:
            roleGroups:
              default:
                replicas: 1
        "#};

        let history = history_server_from(input);

        let connection: S3ConnectionSpec = serde_yaml::from_str(indoc! {r#"
            host: minio
            tls:
              verification:
                server:
                  caCert:
                    secretClass: minio-ca
        "#})
        .unwrap();
        let log_dir = ResolvedLogDir::S3(S3LogDir {
            bucket_name: "spark-logs".to_string(),
            prefix: "eventlogs/".to_string(),
            connection,
        });

        let merged_env = history.merged_env(Some(&log_dir), HashMap::new());
        let history_opts = merged_env
            .iter()
            .find(|env_var| env_var.name == "SPARK_HISTORY_OPTS")
            .and_then(|env_var| env_var.value.clone())
            .unwrap();

        assert!(history_opts.contains("-Djavax.net.ssl.trustStore=/stackable/truststore/truststore.p12"));
        assert!(history_opts.contains("-Djavax.net.ssl.trustStorePassword="));
    }

    #[rstest]
    #[case(
        "https://spark.example.com/history/sub",
        "https://spark.example.com/",
        "/history/sub"
    )]
    #[case("http://spark.example.com/history", "http://spark.example.com/", "/history")]
    #[case("http://spark.example.com", "http://spark.example.com/", "/")]
    fn test_split_ingress_url(
        #[case] url: &str,
        #[case] expected_redirect_uri: &str,
        #[case] expected_proxy_base: &str,
    ) {
        let (redirect_uri, proxy_base) = split_ingress_url(url);
        assert_eq!(redirect_uri, expected_redirect_uri);
        assert_eq!(proxy_base, expected_proxy_base);
    }

    #[test]
    fn test_authorization_requires_ingress() {
        let input = indoc! {r#"
        ---
        apiVersion: spark-history.stackable.tech/v1alpha1
        kind: SparkHistoryServer
        metadata:
          name: spark-history
        spec:
          image:
            productVersion: 3.5.2
          clusterConfig:
            authorization:
              filterClass: org.example.spark.AuthorizationServletFilter
              authorizedUsers:
                - user@example.com
          nodes:
            roleGroups:
              default:
                replicas: 1
        "#};

        let history = history_server_from(input);

        assert!(history.authorization_config().is_err());
    }

    #[test]
    fn test_authorization_filter_properties() {
        let input = indoc! {r#"
        ---
        apiVersion: spark-history.stackable.tech/v1alpha1
        kind: SparkHistoryServer
        metadata:
          name: spark-history
        spec:
          image:
            productVersion: 3.5.2
          clusterConfig:
            ingress:
              url: https://spark.example.com/history
            authorization:
              filterClass: org.example.spark.AuthorizationServletFilter
              authorizedUsers:
                - user@example.com
                - admin@example.com
          nodes:
            roleGroups:
              default:
                replicas: 1
        "#};

        let history = history_server_from(input);
        let auth = history.authorization_config().unwrap();

        assert_eq!(
            auth.get("spark.ui.filters").map(String::as_str),
            Some("org.example.spark.AuthorizationServletFilter")
        );
        assert_eq!(
            auth.get("spark.org.example.spark.AuthorizationServletFilter.param.authorizedEntities")
                .map(String::as_str),
            Some("user@example.com,admin@example.com")
        );
    }

    #[test]
    fn test_rejects_multiple_storage_backends() {
        let input = indoc! {r#"
        ---
        apiVersion: spark-history.stackable.tech/v1alpha1
        kind: SparkHistoryServer
        metadata:
          name: spark-history
        spec:
          image:
            productVersion: 3.5.2
          logFileDirectory:
            s3:
              prefix: eventlogs/
              bucket:
                bucketName: spark-logs
                connection:
                  reference: my-s3-connection
            azure:
              prefix: eventlogs/
              container: logs
              storageAccount: acct
              credentials:
                secretClass: azure-credentials
          nodes:
            roleGroups:
              default:
                replicas: 1
        "#};

        let deserializer = serde_yaml::Deserializer::from_str(input);
        let result: Result<SparkHistoryServer, _> =
            serde_yaml::with::singleton_map_recursive::deserialize(deserializer);

        assert!(result.is_err());
    }
}
