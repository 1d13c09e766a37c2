use stackable_operator::memory::{BinaryMultiple, MemoryQuantity};

pub const APP_NAME: &str = "spark-history";
pub const OPERATOR_NAME: &str = "spark-history.stackable.tech";

pub const HISTORY_CONTROLLER_NAME: &str = "historyserver";
pub const HISTORY_ROLE_NAME: &str = "node";

pub const HISTORY_IMAGE_BASE_NAME: &str = "spark-k8s";

pub const HISTORY_UI_PORT: u16 = 18080;
pub const METRICS_PORT: u16 = 18081;

pub const SPARK_UID: i64 = 1000;
pub const SPARK_CLUSTER_ROLE: &str = "spark-history-clusterrole";

pub const SPARK_DEFAULTS_FILE_NAME: &str = "spark-defaults.conf";
pub const SPARK_ENV_SH_FILE_NAME: &str = "spark-env.sh";
pub const JVM_SECURITY_PROPERTIES_FILE: &str = "security.properties";
pub const LOG4J2_CONFIG_FILE: &str = "log4j2.properties";

pub const VOLUME_MOUNT_NAME_CONFIG: &str = "config";
pub const VOLUME_MOUNT_PATH_CONFIG: &str = "/stackable/spark/conf";

// Mounted ConfigMaps are read-only. The container start command copies the
// configuration here before credentials are appended.
pub const VOLUME_MOUNT_NAME_RW_CONFIG: &str = "rwconfig";
pub const VOLUME_MOUNT_PATH_RW_CONFIG: &str = "/stackable/rwconfig";

pub const VOLUME_MOUNT_NAME_LOG_CONFIG: &str = "log-config";
pub const VOLUME_MOUNT_PATH_LOG_CONFIG: &str = "/stackable/log_config";
pub const VOLUME_MOUNT_NAME_LOG: &str = "log";
pub const VOLUME_MOUNT_PATH_LOG: &str = "/stackable/log";

pub const ACCESS_KEY_ID: &str = "accessKeyId";
pub const SECRET_ACCESS_KEY: &str = "secretAccessKey";
pub const AZURE_STORAGE_ACCOUNT_KEY: &str = "accessKey";
pub const SECRETS_MOUNT_DIR: &str = "/stackable/secrets";

// Header an authorizing proxy in front of the ingress identifies users with.
pub const AUTH_PROXY_USER_HEADER: &str = "X-Email";

pub const STACKABLE_MOUNT_PATH_TLS: &str = "/stackable/mount_tls";
pub const STACKABLE_TRUST_STORE: &str = "/stackable/truststore";
pub const STACKABLE_TLS_STORE_PASSWORD: &str = "changeit";
pub const SYSTEM_TRUST_STORE: &str = "/etc/pki/java/cacerts";
pub const SYSTEM_TRUST_STORE_PASSWORD: &str = "changeit";

pub const MAX_SPARK_LOG_FILES_SIZE: MemoryQuantity = MemoryQuantity {
    value: 10.0,
    unit: BinaryMultiple::Mebi,
};
