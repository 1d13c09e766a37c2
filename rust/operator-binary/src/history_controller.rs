//! Reconciles a [`SparkHistoryServer`]: resolves the configured log file
//! directory, renders the Spark configuration and applies the Kubernetes
//! objects running the history server.
//!
//! The rendered configuration is hashed into a pod template annotation, so
//! the server is only restarted when the configuration actually changed.

use std::{
    collections::{BTreeMap, HashMap},
    hash::Hasher,
    sync::Arc,
};

use const_format::concatcp;
use fnv::FnvHasher;
use product_config::{types::PropertyNameKind, writer::to_java_properties_string};
use snafu::{OptionExt, ResultExt, Snafu};
use stackable_operator::{
    builder::{
        self,
        configmap::ConfigMapBuilder,
        meta::ObjectMetaBuilder,
        pod::{
            container::ContainerBuilder, resources::ResourceRequirementsBuilder,
            volume::VolumeBuilder, PodBuilder,
        },
    },
    cluster_resources::{ClusterResourceApplyStrategy, ClusterResources},
    commons::product_image_selection::ResolvedProductImage,
    k8s_openapi::{
        api::{
            apps::v1::{StatefulSet, StatefulSetSpec},
            core::v1::{
                ConfigMap, PodSecurityContext, Service, ServiceAccount, ServicePort, ServiceSpec,
            },
            rbac::v1::{ClusterRole, RoleBinding, RoleRef, Subject},
        },
        apimachinery::pkg::apis::meta::v1::LabelSelector,
        DeepMerge,
    },
    kube::{
        core::{error_boundary, DeserializeGuard},
        runtime::{controller::Action, reflector::ObjectRef},
        Resource, ResourceExt,
    },
    kvp::{Annotation, Label, Labels, ObjectLabels},
    logging::controller::ReconcilerError,
    product_logging::{
        framework::{calculate_log_volume_size_limit, vector_container, LoggingError},
        spec::{
            ConfigMapLogConfig, ContainerLogConfig, ContainerLogConfigChoice,
            CustomContainerLogConfig,
        },
    },
    role_utils::RoleGroupRef,
    status::condition::{
        compute_conditions, operations::ClusterOperationsConditionBuilder,
        statefulset::StatefulSetConditionBuilder, ClusterCondition, ClusterConditionStatus,
        ClusterConditionType,
    },
    time::Duration,
};
use stackable_spark_history_crd::{
    constants::{
        ACCESS_KEY_ID, APP_NAME, AZURE_STORAGE_ACCOUNT_KEY, HISTORY_CONTROLLER_NAME,
        HISTORY_IMAGE_BASE_NAME, HISTORY_ROLE_NAME, HISTORY_UI_PORT, JVM_SECURITY_PROPERTIES_FILE,
        MAX_SPARK_LOG_FILES_SIZE, METRICS_PORT, OPERATOR_NAME, SECRET_ACCESS_KEY,
        SPARK_CLUSTER_ROLE, SPARK_DEFAULTS_FILE_NAME, SPARK_ENV_SH_FILE_NAME, SPARK_UID,
        STACKABLE_TRUST_STORE, VOLUME_MOUNT_NAME_CONFIG, VOLUME_MOUNT_NAME_LOG,
        VOLUME_MOUNT_NAME_LOG_CONFIG, VOLUME_MOUNT_NAME_RW_CONFIG, VOLUME_MOUNT_PATH_CONFIG,
        VOLUME_MOUNT_PATH_LOG, VOLUME_MOUNT_PATH_LOG_CONFIG, VOLUME_MOUNT_PATH_RW_CONFIG,
    },
    history::{
        HistoryConfig, SparkHistoryServer, SparkHistoryServerContainer, SparkHistoryServerStatus,
    },
    logdir::ResolvedLogDir,
    tlscerts, to_spark_env_sh_string,
};
use strum::{EnumDiscriminants, IntoStaticStr};

use crate::{
    discovery,
    operations::pdb::add_pdbs,
    product_logging::{self, resolve_vector_aggregator_address},
    Ctx,
};

pub const HISTORY_FULL_CONTROLLER_NAME: &str =
    concatcp!(HISTORY_CONTROLLER_NAME, '.', OPERATOR_NAME);

#[derive(Snafu, Debug, EnumDiscriminants)]
#[strum_discriminants(derive(IntoStaticStr))]
#[allow(clippy::enum_variant_names)]
pub enum Error {
    #[snafu(display("object has no namespace"))]
    ObjectHasNoNamespace,

    #[snafu(display("invalid config map {name}"))]
    InvalidConfigMap {
        source: stackable_operator::builder::configmap::Error,
        name: String,
    },

    #[snafu(display("invalid history container name"))]
    InvalidContainerName {
        source: stackable_operator::builder::pod::container::Error,
    },

    #[snafu(display("object is missing metadata to build owner reference"))]
    ObjectMissingMetadataForOwnerRef {
        source: stackable_operator::builder::meta::Error,
    },

    #[snafu(display("failed to update the history server stateful set"))]
    ApplyStatefulSet {
        source: stackable_operator::cluster_resources::Error,
    },

    #[snafu(display("failed to update history server config map"))]
    ApplyConfigMap {
        source: stackable_operator::cluster_resources::Error,
    },

    #[snafu(display("failed to update history server service"))]
    ApplyService {
        source: stackable_operator::cluster_resources::Error,
    },

    #[snafu(display("failed to apply role ServiceAccount"))]
    ApplyServiceAccount {
        source: stackable_operator::cluster_resources::Error,
    },

    #[snafu(display("failed to apply global RoleBinding"))]
    ApplyRoleBinding {
        source: stackable_operator::cluster_resources::Error,
    },

    #[snafu(display("failed to build the discovery config map"))]
    BuildDiscoveryConfigMap { source: discovery::Error },

    #[snafu(display("failed to apply the discovery config map"))]
    ApplyDiscoveryConfigMap {
        source: stackable_operator::cluster_resources::Error,
    },

    #[snafu(display("failed to apply the status"))]
    ApplyStatus {
        source: stackable_operator::client::Error,
    },

    #[snafu(display("product config validation failed"))]
    ProductConfigValidation {
        source: stackable_spark_history_crd::history::Error,
    },

    #[snafu(display("failed to resolve and merge config for role and role group"))]
    FailedToResolveConfig {
        source: stackable_spark_history_crd::history::Error,
    },

    #[snafu(display("invalid authorization configuration"))]
    AuthorizationConfig {
        source: stackable_spark_history_crd::history::Error,
    },

    #[snafu(display("number of cleaner rolegroups exceeds 1"))]
    TooManyCleanerRoleGroups,

    #[snafu(display("number of cleaner replicas exceeds 1"))]
    TooManyCleanerReplicas,

    #[snafu(display("failed to resolve the log dir configuration"))]
    LogDir {
        source: stackable_spark_history_crd::logdir::Error,
    },

    #[snafu(display("failed to create cluster resources"))]
    CreateClusterResources {
        source: stackable_operator::cluster_resources::Error,
    },

    #[snafu(display("failed to delete orphaned resources"))]
    DeleteOrphanedResources {
        source: stackable_operator::cluster_resources::Error,
    },

    #[snafu(display("failed to resolve the Vector aggregator address"))]
    ResolveVectorAggregatorAddress { source: product_logging::Error },

    #[snafu(display("failed to add the logging configuration to the ConfigMap [{cm_name}]"))]
    InvalidLoggingConfig {
        source: product_logging::Error,
        cm_name: String,
    },

    #[snafu(display("failed to configure logging"))]
    ConfigureLogging { source: LoggingError },

    #[snafu(display("cannot retrieve role group"))]
    CannotRetrieveRoleGroup {
        source: stackable_spark_history_crd::history::Error,
    },

    #[snafu(display(
        "failed to serialize [{JVM_SECURITY_PROPERTIES_FILE}] for group {rolegroup}"
    ))]
    JvmSecurityProperties {
        source: product_config::writer::PropertiesWriterError,
        rolegroup: String,
    },

    #[snafu(display("failed to create PodDisruptionBudget"))]
    FailedToCreatePdb {
        source: crate::operations::pdb::Error,
    },

    #[snafu(display("failed to build Labels"))]
    LabelBuild {
        source: stackable_operator::kvp::LabelError,
    },

    #[snafu(display("failed to build the config hash annotation"))]
    AnnotationBuild {
        source: stackable_operator::kvp::AnnotationError,
    },

    #[snafu(display("failed to build Metadata"))]
    MetadataBuild {
        source: stackable_operator::builder::meta::Error,
    },

    #[snafu(display("failed to create the log dir volumes specification"))]
    CreateLogDirVolumesSpec {
        source: stackable_spark_history_crd::logdir::Error,
    },

    #[snafu(display("failed to add needed volume"))]
    AddVolume { source: builder::pod::Error },

    #[snafu(display("failed to add needed volumeMount"))]
    AddVolumeMount {
        source: builder::pod::container::Error,
    },

    #[snafu(display("SparkHistoryServer object is invalid"))]
    InvalidSparkHistoryServer {
        source: error_boundary::InvalidObject,
    },
}

type Result<T, E = Error> = std::result::Result<T, E>;

impl ReconcilerError for Error {
    fn category(&self) -> &'static str {
        ErrorDiscriminants::from(self).into()
    }
}

pub async fn reconcile(
    shs: Arc<DeserializeGuard<SparkHistoryServer>>,
    ctx: Arc<Ctx>,
) -> Result<Action> {
    tracing::info!("Starting reconcile history server");

    let shs = shs
        .0
        .as_ref()
        .map_err(error_boundary::InvalidObject::clone)
        .context(InvalidSparkHistoryServerSnafu)?;

    let client = &ctx.client;
    let namespace = shs.namespace().context(ObjectHasNoNamespaceSnafu)?;

    let mut cluster_resources = ClusterResources::new(
        APP_NAME,
        OPERATOR_NAME,
        HISTORY_CONTROLLER_NAME,
        &shs.object_ref(&()),
        ClusterResourceApplyStrategy::from(&shs.spec.cluster_operation),
    )
    .context(CreateClusterResourcesSnafu)?;

    let resolved_product_image = shs
        .spec
        .image
        .resolve(HISTORY_IMAGE_BASE_NAME, crate::built_info::PKG_VERSION);

    // Turn the storage backend given in the resource into a validated value
    // object. Without a backend everything downstream renders "unset".
    let log_dir = match &shs.spec.log_file_directory {
        Some(log_file_directory) => Some(
            ResolvedLogDir::resolve(log_file_directory, &namespace, client)
                .await
                .context(LogDirSnafu)?,
        ),
        None => None,
    };

    let vector_aggregator_address = resolve_vector_aggregator_address(
        client,
        &namespace,
        shs.spec.vector_aggregator_config_map_name.as_deref(),
    )
    .await
    .context(ResolveVectorAggregatorAddressSnafu)?;

    // Use a dedicated service account for history server pods.
    let (serviceaccount, rolebinding) =
        build_history_role_serviceaccount(shs, &resolved_product_image.app_version_label)?;
    let serviceaccount = cluster_resources
        .add(client, serviceaccount)
        .await
        .context(ApplyServiceAccountSnafu)?;
    cluster_resources
        .add(client, rolebinding)
        .await
        .context(ApplyRoleBindingSnafu)?;

    let mut ss_cond_builder = StatefulSetConditionBuilder::default();

    // The role_name is always HISTORY_ROLE_NAME
    for (role_name, role_config) in shs
        .validated_role_config(&resolved_product_image, &ctx.product_config)
        .context(ProductConfigValidationSnafu)?
        .iter()
    {
        let service = build_service(
            shs,
            &resolved_product_image.app_version_label,
            role_name,
            None,
        )?;
        cluster_resources
            .add(client, service)
            .await
            .context(ApplyServiceSnafu)?;

        for (rolegroup_name, rolegroup_config) in role_config.iter() {
            let rgr = RoleGroupRef {
                cluster: ObjectRef::from_obj(shs),
                role: role_name.into(),
                role_group: rolegroup_name.into(),
            };

            let merged_config = shs.merged_config(&rgr).context(FailedToResolveConfigSnafu)?;

            let service = build_service(
                shs,
                &resolved_product_image.app_version_label,
                role_name,
                Some(&rgr),
            )?;
            cluster_resources
                .add(client, service)
                .await
                .context(ApplyServiceSnafu)?;

            let config_map = build_config_map(
                shs,
                rolegroup_config,
                &merged_config,
                &resolved_product_image.app_version_label,
                &rgr,
                log_dir.as_ref(),
                vector_aggregator_address.as_deref(),
            )?;
            let config_hash = config_map_hash(&config_map);
            cluster_resources
                .add(client, config_map)
                .await
                .context(ApplyConfigMapSnafu)?;

            let sts = build_stateful_set(
                shs,
                &resolved_product_image,
                &rgr,
                log_dir.as_ref(),
                &merged_config,
                &serviceaccount,
                &config_hash,
            )?;
            ss_cond_builder.add(
                cluster_resources
                    .add(client, sts)
                    .await
                    .context(ApplyStatefulSetSnafu)?,
            );
        }

        let role_config = &shs.spec.nodes.role_config;
        add_pdbs(
            &role_config.pod_disruption_budget,
            shs,
            client,
            &mut cluster_resources,
        )
        .await
        .context(FailedToCreatePdbSnafu)?;
    }

    // Spark applications writing event logs discover the log location here.
    let discovery_cm = discovery::build_discovery_configmap(
        shs,
        &resolved_product_image.app_version_label,
        log_dir.as_ref(),
    )
    .context(BuildDiscoveryConfigMapSnafu)?;
    cluster_resources
        .add(client, discovery_cm)
        .await
        .context(ApplyDiscoveryConfigMapSnafu)?;

    let cluster_operation_cond_builder =
        ClusterOperationsConditionBuilder::new(&shs.spec.cluster_operation);

    let status = SparkHistoryServerStatus {
        conditions: aggregate_conditions(
            shs,
            &ss_cond_builder,
            &cluster_operation_cond_builder,
            log_dir.as_ref(),
        ),
    };

    cluster_resources
        .delete_orphaned_resources(client)
        .await
        .context(DeleteOrphanedResourcesSnafu)?;

    client
        .apply_patch_status(OPERATOR_NAME, shs, &status)
        .await
        .context(ApplyStatusSnafu)?;

    Ok(Action::await_change())
}

pub fn error_policy(
    _obj: Arc<DeserializeGuard<SparkHistoryServer>>,
    error: &Error,
    _ctx: Arc<Ctx>,
) -> Action {
    match error {
        Error::InvalidSparkHistoryServer { .. } => Action::await_change(),
        _ => Action::requeue(*Duration::from_secs(5)),
    }
}

/// Computes the status conditions for this reconciliation. Without a log file
/// directory the server cannot serve any history, so availability is forced
/// to false with an explanation.
fn aggregate_conditions(
    shs: &SparkHistoryServer,
    ss_cond_builder: &StatefulSetConditionBuilder,
    cluster_operation_cond_builder: &ClusterOperationsConditionBuilder,
    log_dir: Option<&ResolvedLogDir>,
) -> Vec<ClusterCondition> {
    let mut conditions =
        compute_conditions(shs, &[ss_cond_builder, cluster_operation_cond_builder]);

    if log_dir.is_none() {
        for condition in conditions
            .iter_mut()
            .filter(|condition| condition.type_ == ClusterConditionType::Available)
        {
            condition.status = ClusterConditionStatus::False;
            condition.message = Some(
                "No log file directory configured. Event logs are not persisted \
                 and the history server serves an empty store."
                    .to_string(),
            );
        }
    }

    conditions
}

/// Hash over the rendered configuration. Stored as a pod template annotation,
/// so pods restart exactly when the rendered configuration changed.
fn config_map_hash(config_map: &ConfigMap) -> String {
    // FNV instead of the std hashers: stable across Rust releases.
    let mut hasher = FnvHasher::with_key(0);
    for (file_name, content) in config_map.data.iter().flatten() {
        hasher.write(file_name.as_bytes());
        hasher.write(content.as_bytes());
    }
    hasher.finish().to_string()
}

#[allow(clippy::result_large_err)]
fn build_config_map(
    shs: &SparkHistoryServer,
    config: &HashMap<PropertyNameKind, BTreeMap<String, String>>,
    merged_config: &HistoryConfig,
    app_version_label: &str,
    rolegroupref: &RoleGroupRef<SparkHistoryServer>,
    log_dir: Option<&ResolvedLogDir>,
    vector_aggregator_address: Option<&str>,
) -> Result<ConfigMap, Error> {
    let cm_name = rolegroupref.object_name();

    let spark_defaults = spark_defaults(shs, log_dir, rolegroupref)?;

    let jvm_sec_props: BTreeMap<String, Option<String>> = config
        .get(&PropertyNameKind::File(
            JVM_SECURITY_PROPERTIES_FILE.to_string(),
        ))
        .cloned()
        .unwrap_or_default()
        .into_iter()
        .map(|(k, v)| (k, Some(v)))
        .collect();

    let mut cm_builder = ConfigMapBuilder::new();

    cm_builder
        .metadata(
            ObjectMetaBuilder::new()
                .name_and_namespace(shs)
                .name(&cm_name)
                .ownerreference_from_resource(shs, None, Some(true))
                .context(ObjectMissingMetadataForOwnerRefSnafu)?
                .with_recommended_labels(labels(shs, app_version_label, &rolegroupref.role_group))
                .context(MetadataBuildSnafu)?
                .build(),
        )
        .add_data(SPARK_DEFAULTS_FILE_NAME, spark_defaults)
        .add_data(
            SPARK_ENV_SH_FILE_NAME,
            to_spark_env_sh_string(
                config
                    .get(&PropertyNameKind::File(SPARK_ENV_SH_FILE_NAME.to_string()))
                    .cloned()
                    .unwrap_or_default()
                    .iter(),
            ),
        )
        .add_data(
            JVM_SECURITY_PROPERTIES_FILE,
            to_java_properties_string(jvm_sec_props.iter()).with_context(|_| {
                JvmSecurityPropertiesSnafu {
                    rolegroup: rolegroupref.role_group.clone(),
                }
            })?,
        );

    product_logging::extend_config_map(
        rolegroupref,
        vector_aggregator_address,
        &merged_config.logging,
        SparkHistoryServerContainer::SparkHistory,
        SparkHistoryServerContainer::Vector,
        &mut cm_builder,
    )
    .context(InvalidLoggingConfigSnafu { cm_name: &cm_name })?;

    cm_builder
        .build()
        .context(InvalidConfigMapSnafu { name: cm_name })
}

#[allow(clippy::result_large_err)]
fn build_stateful_set(
    shs: &SparkHistoryServer,
    resolved_product_image: &ResolvedProductImage,
    rolegroupref: &RoleGroupRef<SparkHistoryServer>,
    log_dir: Option<&ResolvedLogDir>,
    config: &HistoryConfig,
    serviceaccount: &ServiceAccount,
    config_hash: &str,
) -> Result<StatefulSet, Error> {
    let log_config_map = if let Some(ContainerLogConfig {
        choice:
            Some(ContainerLogConfigChoice::Custom(CustomContainerLogConfig {
                custom: ConfigMapLogConfig { config_map },
            })),
    }) = config
        .logging
        .containers
        .get(&SparkHistoryServerContainer::SparkHistory)
    {
        config_map.into()
    } else {
        rolegroupref.object_name()
    };

    let metadata = ObjectMetaBuilder::new()
        .with_recommended_labels(labels(
            shs,
            &resolved_product_image.app_version_label,
            &rolegroupref.role_group,
        ))
        .context(MetadataBuildSnafu)?
        .with_annotation(
            Annotation::try_from(("config-hash", config_hash)).context(AnnotationBuildSnafu)?,
        )
        .build();

    let log_dir_volumes = match log_dir {
        Some(log_dir) => log_dir.volumes().context(CreateLogDirVolumesSpecSnafu)?,
        None => vec![],
    };
    let log_dir_volume_mounts = log_dir
        .map(ResolvedLogDir::volume_mounts)
        .unwrap_or_default();

    let mut pb = PodBuilder::new();

    pb.service_account_name(serviceaccount.name_unchecked())
        .metadata(metadata)
        .image_pull_secrets_from_product_image(resolved_product_image)
        .add_volume(
            VolumeBuilder::new(VOLUME_MOUNT_NAME_CONFIG)
                .with_config_map(rolegroupref.object_name())
                .build(),
        )
        .context(AddVolumeSnafu)?
        .add_volume(
            VolumeBuilder::new(VOLUME_MOUNT_NAME_RW_CONFIG)
                .with_empty_dir(None::<String>, None)
                .build(),
        )
        .context(AddVolumeSnafu)?
        .add_volume(
            VolumeBuilder::new(VOLUME_MOUNT_NAME_LOG_CONFIG)
                .with_config_map(log_config_map)
                .build(),
        )
        .context(AddVolumeSnafu)?
        .add_volume(
            VolumeBuilder::new(VOLUME_MOUNT_NAME_LOG)
                .with_empty_dir(
                    None::<String>,
                    Some(calculate_log_volume_size_limit(&[MAX_SPARK_LOG_FILES_SIZE])),
                )
                .build(),
        )
        .context(AddVolumeSnafu)?
        .add_volumes(log_dir_volumes)
        .context(AddVolumeSnafu)?
        .security_context(PodSecurityContext {
            run_as_user: Some(SPARK_UID),
            run_as_group: Some(0),
            fs_group: Some(1000),
            ..PodSecurityContext::default()
        });

    let role_group = shs
        .rolegroup(rolegroupref)
        .context(CannotRetrieveRoleGroupSnafu)?;

    let merged_env = shs.merged_env(log_dir, role_group.config.env_overrides);

    let container_name = "spark-history";
    let container = ContainerBuilder::new(container_name)
        .context(InvalidContainerNameSnafu)?
        .image_from_product_image(resolved_product_image)
        .resources(config.resources.clone().into())
        .command(vec!["/bin/bash".to_string()])
        .args(command_args(log_dir))
        .add_container_port("http", HISTORY_UI_PORT.into())
        .add_container_port("metrics", METRICS_PORT.into())
        .add_env_vars(merged_env)
        .add_volume_mounts(log_dir_volume_mounts)
        .context(AddVolumeMountSnafu)?
        .add_volume_mount(VOLUME_MOUNT_NAME_CONFIG, VOLUME_MOUNT_PATH_CONFIG)
        .context(AddVolumeMountSnafu)?
        .add_volume_mount(VOLUME_MOUNT_NAME_RW_CONFIG, VOLUME_MOUNT_PATH_RW_CONFIG)
        .context(AddVolumeMountSnafu)?
        .add_volume_mount(VOLUME_MOUNT_NAME_LOG_CONFIG, VOLUME_MOUNT_PATH_LOG_CONFIG)
        .context(AddVolumeMountSnafu)?
        .add_volume_mount(VOLUME_MOUNT_NAME_LOG, VOLUME_MOUNT_PATH_LOG)
        .context(AddVolumeMountSnafu)?
        .build();
    pb.add_container(container);

    if config.logging.enable_vector_agent {
        pb.add_container(
            vector_container(
                resolved_product_image,
                VOLUME_MOUNT_NAME_CONFIG,
                VOLUME_MOUNT_NAME_LOG,
                config
                    .logging
                    .containers
                    .get(&SparkHistoryServerContainer::Vector),
                ResourceRequirementsBuilder::new()
                    .with_cpu_request("250m")
                    .with_cpu_limit("500m")
                    .with_memory_request("128Mi")
                    .with_memory_limit("128Mi")
                    .build(),
            )
            .context(ConfigureLoggingSnafu)?,
        );
    }

    let mut pod_template = pb.build_template();
    pod_template.merge_from(shs.role().config.pod_overrides.clone());
    pod_template.merge_from(role_group.config.pod_overrides);

    Ok(StatefulSet {
        metadata: ObjectMetaBuilder::new()
            .name_and_namespace(shs)
            .name(rolegroupref.object_name())
            .ownerreference_from_resource(shs, None, Some(true))
            .context(ObjectMissingMetadataForOwnerRefSnafu)?
            .with_recommended_labels(labels(
                shs,
                &resolved_product_image.app_version_label,
                rolegroupref.role_group.as_ref(),
            ))
            .context(MetadataBuildSnafu)?
            .build(),
        spec: Some(StatefulSetSpec {
            template: pod_template,
            replicas: shs.replicas(rolegroupref),
            selector: LabelSelector {
                match_labels: Some(
                    Labels::role_group_selector(
                        shs,
                        APP_NAME,
                        &rolegroupref.role,
                        &rolegroupref.role_group,
                    )
                    .context(LabelBuildSnafu)?
                    .into(),
                ),
                ..LabelSelector::default()
            },
            ..StatefulSetSpec::default()
        }),
        ..StatefulSet::default()
    })
}

#[allow(clippy::result_large_err)]
fn build_service(
    shs: &SparkHistoryServer,
    app_version_label: &str,
    role: &str,
    group: Option<&RoleGroupRef<SparkHistoryServer>>,
) -> Result<Service, Error> {
    let group_name = match group {
        Some(rgr) => rgr.role_group.clone(),
        None => "global".to_owned(),
    };

    let (service_name, service_type, service_cluster_ip) = match group {
        Some(rgr) => (
            rgr.object_name(),
            "ClusterIP".to_string(),
            Some("None".to_string()),
        ),
        None => (
            format!("{}-{}", shs.name_any(), role),
            shs.spec.cluster_config.listener_class.k8s_service_type(),
            None,
        ),
    };

    let selector = match group {
        Some(rgr) => Labels::role_group_selector(shs, APP_NAME, &rgr.role, &rgr.role_group)
            .context(LabelBuildSnafu)?
            .into(),
        None => Labels::role_selector(shs, APP_NAME, role)
            .context(LabelBuildSnafu)?
            .into(),
    };

    Ok(Service {
        metadata: ObjectMetaBuilder::new()
            .name_and_namespace(shs)
            .name(service_name)
            .ownerreference_from_resource(shs, None, Some(true))
            .context(ObjectMissingMetadataForOwnerRefSnafu)?
            .with_recommended_labels(labels(shs, app_version_label, &group_name))
            .context(MetadataBuildSnafu)?
            .with_label(Label::try_from(("prometheus.io/scrape", "true")).context(LabelBuildSnafu)?)
            .build(),
        spec: Some(ServiceSpec {
            type_: Some(service_type),
            cluster_ip: service_cluster_ip,
            ports: Some(vec![
                ServicePort {
                    name: Some(String::from("http")),
                    port: HISTORY_UI_PORT.into(),
                    ..ServicePort::default()
                },
                ServicePort {
                    name: Some(String::from("metrics")),
                    port: METRICS_PORT.into(),
                    ..ServicePort::default()
                },
            ]),
            selector: Some(selector),
            ..ServiceSpec::default()
        }),
        status: None,
    })
}

#[allow(clippy::result_large_err)]
fn build_history_role_serviceaccount(
    shs: &SparkHistoryServer,
    app_version_label: &str,
) -> Result<(ServiceAccount, RoleBinding)> {
    let sa = ServiceAccount {
        metadata: ObjectMetaBuilder::new()
            .name_and_namespace(shs)
            .ownerreference_from_resource(shs, None, Some(true))
            .context(ObjectMissingMetadataForOwnerRefSnafu)?
            .with_recommended_labels(labels(shs, app_version_label, HISTORY_CONTROLLER_NAME))
            .context(MetadataBuildSnafu)?
            .build(),
        ..ServiceAccount::default()
    };
    let binding = RoleBinding {
        metadata: ObjectMetaBuilder::new()
            .name_and_namespace(shs)
            .ownerreference_from_resource(shs, None, Some(true))
            .context(ObjectMissingMetadataForOwnerRefSnafu)?
            .with_recommended_labels(labels(shs, app_version_label, HISTORY_CONTROLLER_NAME))
            .context(MetadataBuildSnafu)?
            .build(),
        role_ref: RoleRef {
            api_group: <ClusterRole as stackable_operator::k8s_openapi::Resource>::GROUP // need to fully qualify because of "Resource" name clash
                .to_string(),
            kind: <ClusterRole as stackable_operator::k8s_openapi::Resource>::KIND.to_string(),
            name: SPARK_CLUSTER_ROLE.to_string(),
        },
        subjects: Some(vec![Subject {
            api_group: Some(
                <ServiceAccount as stackable_operator::k8s_openapi::Resource>::GROUP.to_string(),
            ),
            kind: <ServiceAccount as stackable_operator::k8s_openapi::Resource>::KIND.to_string(),
            name: sa.name_any(),
            namespace: sa.namespace(),
        }]),
    };
    Ok((sa, binding))
}

/// Renders the `spark-defaults.conf` contents for a role group. Backend
/// settings come first, user supplied `sparkConf` entries overwrite
/// everything.
#[allow(clippy::result_large_err)]
fn spark_defaults(
    shs: &SparkHistoryServer,
    log_dir: Option<&ResolvedLogDir>,
    rolegroupref: &RoleGroupRef<SparkHistoryServer>,
) -> Result<String, Error> {
    let mut log_dir_settings = log_dir
        .map(ResolvedLogDir::history_server_spark_config)
        .unwrap_or_default();

    // add cleaner spark settings if requested
    log_dir_settings.extend(cleaner_config(shs, rolegroupref)?);

    // settings derived from the ingress and authorization configuration
    log_dir_settings.extend(shs.ui_proxy_config());
    log_dir_settings.extend(
        shs.authorization_config()
            .context(AuthorizationConfigSnafu)?,
    );

    // add user provided configuration. These can overwrite everything.
    log_dir_settings.extend(shs.spec.spark_conf.clone());

    // stringify the spark configuration for the ConfigMap
    Ok(log_dir_settings
        .iter()
        .map(|(k, v)| format!("{k} {v}"))
        .collect::<Vec<String>>()
        .join("\n"))
}

fn command_args(logdir: Option<&ResolvedLogDir>) -> Vec<String> {
    // The mounted configuration is read-only, copy it so that credentials can
    // be appended before the server starts.
    let mut command = vec![format!(
        "cp -RL {VOLUME_MOUNT_PATH_CONFIG}/* {VOLUME_MOUNT_PATH_RW_CONFIG}/"
    )];

    if let Some(logdir) = logdir {
        if let Some(secret_dir) = logdir.credentials_mount_path() {
            match logdir {
                ResolvedLogDir::S3(_) => {
                    command.extend(vec![
                        format!("export AWS_ACCESS_KEY_ID=\"$(cat {secret_dir}/{ACCESS_KEY_ID})\""),
                        format!(
                            "export AWS_SECRET_ACCESS_KEY=\"$(cat {secret_dir}/{SECRET_ACCESS_KEY})\""
                        ),
                    ]);
                }
                ResolvedLogDir::Azure(azure_log_dir) => {
                    command.push(format!(
                        "echo \"{account_key_property} $(cat {secret_dir}/{AZURE_STORAGE_ACCOUNT_KEY})\" >> {VOLUME_MOUNT_PATH_RW_CONFIG}/{SPARK_DEFAULTS_FILE_NAME}",
                        account_key_property = azure_log_dir.account_key_property(),
                    ));
                }
            }
        }

        if let Some(secret_name) = logdir.tls_secret_name() {
            command.push(format!("mkdir -p {STACKABLE_TRUST_STORE}"));
            command.extend(tlscerts::convert_system_trust_store_to_pkcs12());
            command.extend(tlscerts::import_truststore(secret_name));
        }
    }

    command.push(format!(
        "/stackable/spark/sbin/start-history-server.sh --properties-file {VOLUME_MOUNT_PATH_RW_CONFIG}/{SPARK_DEFAULTS_FILE_NAME}"
    ));

    vec![String::from("-c"), command.join(" && ")]
}

fn labels<'a, T>(
    shs: &'a T,
    app_version_label: &'a str,
    role_group: &'a str,
) -> ObjectLabels<'a, T> {
    ObjectLabels {
        owner: shs,
        app_name: APP_NAME,
        app_version: app_version_label,
        operator_name: OPERATOR_NAME,
        controller_name: HISTORY_CONTROLLER_NAME,
        role: HISTORY_ROLE_NAME,
        role_group,
    }
}

/// Return the Spark properties for the cleaner role group (if any).
/// There should be only one role group with "cleaner=true" and this
/// group should have a replica count of 0 or 1.
#[allow(clippy::result_large_err)]
fn cleaner_config(
    shs: &SparkHistoryServer,
    rolegroup_ref: &RoleGroupRef<SparkHistoryServer>,
) -> Result<BTreeMap<String, String>, Error> {
    let mut result = BTreeMap::new();

    // all role groups with "cleaner=true"
    let cleaner_rolegroups = shs.cleaner_rolegroups();

    // should have max of one
    if cleaner_rolegroups.len() > 1 {
        return TooManyCleanerRoleGroupsSnafu.fail();
    }

    // check if cleaner is set for this rolegroup ref
    if cleaner_rolegroups.len() == 1 && cleaner_rolegroups[0].role_group == rolegroup_ref.role_group
    {
        if let Some(replicas) = shs.replicas(rolegroup_ref) {
            if replicas > 1 {
                return TooManyCleanerReplicasSnafu.fail();
            } else {
                result.insert(
                    "spark.history.fs.cleaner.enabled".to_string(),
                    "true".to_string(),
                );
            }
        }
    }

    Ok(result)
}

#[cfg(test)]
mod tests {
    use indoc::indoc;
    use stackable_operator::commons::secret_class::SecretClassVolume;
    use stackable_spark_history_crd::{
        history::AzureConnectionProtocol,
        logdir::{AzureLogDir, S3LogDir},
        s3::S3ConnectionSpec,
    };

    use super::*;

    fn history_server_from(input: &str) -> SparkHistoryServer {
        let deserializer = serde_yaml::Deserializer::from_str(input);
        serde_yaml::with::singleton_map_recursive::deserialize(deserializer).unwrap()
    }

    fn s3_log_dir() -> ResolvedLogDir {
        ResolvedLogDir::S3(S3LogDir {
            bucket_name: "spark-logs".to_string(),
            prefix: "eventlogs/".to_string(),
            connection: S3ConnectionSpec {
                host: Some("minio".to_string()),
                port: Some(9000),
                credentials: Some(SecretClassVolume {
                    secret_class: "s3-credentials".to_string(),
                    scope: None,
                }),
                ..S3ConnectionSpec::default()
            },
        })
    }

    fn azure_log_dir() -> ResolvedLogDir {
        ResolvedLogDir::Azure(AzureLogDir {
            container: "logs".to_string(),
            storage_account: "acct".to_string(),
            prefix: "eventlogs/".to_string(),
            protocol: AzureConnectionProtocol::Abfss,
            credentials: SecretClassVolume {
                secret_class: "azure-credentials".to_string(),
                scope: None,
            },
        })
    }

    #[test]
    fn test_command_args_without_log_dir() {
        let args = command_args(None);
        let command = &args[1];

        assert!(command.starts_with("cp -RL /stackable/spark/conf/*"));
        assert!(command.ends_with(
            "/stackable/spark/sbin/start-history-server.sh \
             --properties-file /stackable/rwconfig/spark-defaults.conf"
        ));
        assert!(!command.contains("AWS_ACCESS_KEY_ID"));
        assert!(!command.contains("keytool"));
    }

    #[test]
    fn test_command_args_s3_exports_credentials() {
        let args = command_args(Some(&s3_log_dir()));
        let command = &args[1];

        assert!(command.contains(
            "export AWS_ACCESS_KEY_ID=\"$(cat /stackable/secrets/s3-credentials/accessKeyId)\""
        ));
        assert!(command.contains(
            "export AWS_SECRET_ACCESS_KEY=\"$(cat /stackable/secrets/s3-credentials/secretAccessKey)\""
        ));
    }

    #[test]
    fn test_command_args_azure_appends_account_key() {
        let args = command_args(Some(&azure_log_dir()));
        let command = &args[1];

        assert!(command.contains(
            "echo \"spark.hadoop.fs.azure.account.key.acct.dfs.core.windows.net \
             $(cat /stackable/secrets/azure-credentials/accessKey)\" \
             >> /stackable/rwconfig/spark-defaults.conf"
        ));
        assert!(!command.contains("AWS_ACCESS_KEY_ID"));
    }

    #[test]
    fn test_command_args_tls_imports_truststore_once() {
        let log_dir = ResolvedLogDir::S3(S3LogDir {
            bucket_name: "spark-logs".to_string(),
            prefix: "eventlogs/".to_string(),
            connection: serde_yaml::from_str(
                "host: minio\ntls:\n  verification:\n    server:\n      caCert:\n        secretClass: minio-ca\n",
            )
            .unwrap(),
        });

        let args = command_args(Some(&log_dir));
        let command = &args[1];

        assert_eq!(
            command
                .matches("-destkeystore /stackable/truststore/truststore.p12 -destalias stackable-minio-ca")
                .count(),
            1
        );
    }

    #[test]
    fn test_spark_defaults_user_config_overrides() {
        let input = indoc! {r#"
        ---
        apiVersion: spark-history.stackable.tech/v1alpha1
        kind: SparkHistoryServer
        metadata:
          name: spark-history
        spec:
          image:
            productVersion: 3.5.2
          sparkConf:
            spark.hadoop.fs.s3a.connection.ssl.enabled: "true"
          nodes:
            roleGroups:
              default:
                replicas: 1
        "#};
        let shs = history_server_from(input);
        let rgr = RoleGroupRef {
            cluster: ObjectRef::from_obj(&shs),
            role: HISTORY_ROLE_NAME.to_string(),
            role_group: "default".to_string(),
        };

        let rendered = spark_defaults(&shs, Some(&s3_log_dir()), &rgr).unwrap();

        assert!(rendered.contains("spark.history.fs.logDirectory s3a://spark-logs/eventlogs/"));
        // the user override wins over the derived value
        assert!(rendered.contains("spark.hadoop.fs.s3a.connection.ssl.enabled true"));
        assert!(!rendered.contains("spark.hadoop.fs.s3a.connection.ssl.enabled false"));
    }

    #[test]
    fn test_spark_defaults_without_log_dir_has_no_log_directory() {
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
        let shs = history_server_from(input);
        let rgr = RoleGroupRef {
            cluster: ObjectRef::from_obj(&shs),
            role: HISTORY_ROLE_NAME.to_string(),
            role_group: "default".to_string(),
        };

        let rendered = spark_defaults(&shs, None, &rgr).unwrap();

        assert!(!rendered.contains("spark.history.fs.logDirectory"));
        assert!(!rendered.contains("access.key"));
    }

    #[test]
    fn test_config_map_hash_is_deterministic() {
        let mut cm_builder = ConfigMapBuilder::new();
        cm_builder
            .metadata(ObjectMetaBuilder::new().name("test").build())
            .add_data(SPARK_DEFAULTS_FILE_NAME, "spark.eventLog.enabled false");
        let config_map = cm_builder.build().unwrap();

        assert_eq!(config_map_hash(&config_map), config_map_hash(&config_map));
    }

    #[test]
    fn test_config_map_hash_changes_with_content() {
        let mut cm_builder = ConfigMapBuilder::new();
        cm_builder
            .metadata(ObjectMetaBuilder::new().name("test").build())
            .add_data(SPARK_DEFAULTS_FILE_NAME, "spark.eventLog.enabled false");
        let unchanged = cm_builder.build().unwrap();

        let mut cm_builder = ConfigMapBuilder::new();
        cm_builder
            .metadata(ObjectMetaBuilder::new().name("test").build())
            .add_data(SPARK_DEFAULTS_FILE_NAME, "spark.eventLog.enabled true");
        let changed = cm_builder.build().unwrap();

        assert_ne!(config_map_hash(&unchanged), config_map_hash(&changed));
    }

    #[test]
    fn test_cleaner_config_rejects_multiple_replicas() {
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
                replicas: 2
                config:
                  cleaner: true
        "#};
        let shs = history_server_from(input);
        let rgr = RoleGroupRef {
            cluster: ObjectRef::from_obj(&shs),
            role: HISTORY_ROLE_NAME.to_string(),
            role_group: "default".to_string(),
        };

        assert!(matches!(
            cleaner_config(&shs, &rgr),
            Err(Error::TooManyCleanerReplicas)
        ));
    }
}
