//! Discovery ConfigMap for event log producers.
//!
//! Spark applications that should show up in the history server need to write
//! their event logs into the same log directory. The discovery ConfigMap
//! carries the `spark-defaults.conf` snippet with the required properties.

use snafu::{ResultExt, Snafu};
use stackable_operator::{
    builder::{configmap::ConfigMapBuilder, meta::ObjectMetaBuilder},
    k8s_openapi::api::core::v1::ConfigMap,
    kube::ResourceExt,
    kvp::ObjectLabels,
};
use stackable_spark_history_crd::{
    constants::{
        APP_NAME, HISTORY_CONTROLLER_NAME, HISTORY_ROLE_NAME, OPERATOR_NAME,
        SPARK_DEFAULTS_FILE_NAME,
    },
    history::SparkHistoryServer,
    logdir::ResolvedLogDir,
};

#[derive(Snafu, Debug)]
pub enum Error {
    #[snafu(display("object is missing metadata to build owner reference"))]
    ObjectMissingMetadataForOwnerRef {
        source: stackable_operator::builder::meta::Error,
    },

    #[snafu(display("failed to build Metadata"))]
    MetadataBuild {
        source: stackable_operator::builder::meta::Error,
    },

    #[snafu(display("invalid discovery config map"))]
    InvalidConfigMap {
        source: stackable_operator::builder::configmap::Error,
    },
}

/// Builds the discovery ConfigMap named after the cluster. Without a log
/// directory the published configuration disables event logging, so consumers
/// never point at a stale location.
pub fn build_discovery_configmap(
    shs: &SparkHistoryServer,
    app_version_label: &str,
    log_dir: Option<&ResolvedLogDir>,
) -> Result<ConfigMap, Error> {
    let properties = match log_dir {
        Some(log_dir) => log_dir.application_spark_config(),
        None => [("spark.eventLog.enabled".to_string(), "false".to_string())].into(),
    };

    ConfigMapBuilder::new()
        .metadata(
            ObjectMetaBuilder::new()
                .name_and_namespace(shs)
                .name(shs.name_any())
                .ownerreference_from_resource(shs, None, Some(true))
                .context(ObjectMissingMetadataForOwnerRefSnafu)?
                .with_recommended_labels(ObjectLabels {
                    owner: shs,
                    app_name: APP_NAME,
                    app_version: app_version_label,
                    operator_name: OPERATOR_NAME,
                    controller_name: HISTORY_CONTROLLER_NAME,
                    role: HISTORY_ROLE_NAME,
                    role_group: "discovery",
                })
                .context(MetadataBuildSnafu)?
                .build(),
        )
        .add_data(
            SPARK_DEFAULTS_FILE_NAME,
            properties
                .iter()
                .map(|(k, v)| format!("{k} {v}"))
                .collect::<Vec<String>>()
                .join("\n"),
        )
        .build()
        .context(InvalidConfigMapSnafu)
}

#[cfg(test)]
mod tests {
    use stackable_spark_history_crd::logdir::S3LogDir;

    use super::*;

    fn history_server() -> SparkHistoryServer {
        let input = r#"
        apiVersion: spark-history.stackable.tech/v1alpha1
        kind: SparkHistoryServer
        metadata:
          name: spark-history
          namespace: default
        spec:
          image:
            productVersion: 3.5.2
          nodes:
            roleGroups:
              default:
                replicas: 1
        "#;
        let deserializer = serde_yaml::Deserializer::from_str(input);
        serde_yaml::with::singleton_map_recursive::deserialize(deserializer).unwrap()
    }

    #[test]
    fn test_discovery_without_log_dir_disables_event_logging() {
        let config_map = build_discovery_configmap(&history_server(), "3.5.2", None).unwrap();

        let data = config_map.data.unwrap();
        assert_eq!(
            data.get(SPARK_DEFAULTS_FILE_NAME).map(String::as_str),
            Some("spark.eventLog.enabled false")
        );
    }

    #[test]
    fn test_discovery_with_s3_log_dir() {
        let log_dir = ResolvedLogDir::S3(S3LogDir {
            bucket_name: "data".to_string(),
            prefix: "logs".to_string(),
            connection: Default::default(),
        });

        let config_map =
            build_discovery_configmap(&history_server(), "3.5.2", Some(&log_dir)).unwrap();

        let data = config_map.data.unwrap();
        let rendered = data.get(SPARK_DEFAULTS_FILE_NAME).unwrap();
        assert!(rendered.contains("spark.eventLog.enabled true"));
        assert!(rendered.contains("spark.eventLog.dir s3a://data/logs"));
    }
}
