//! CRD definitions and domain value objects for the Spark History Server
//! operator.

pub mod affinity;
pub mod constants;
pub mod history;
pub mod logdir;
pub mod s3;
pub mod tlscerts;

/// Renders `key=value` pairs as the export statements of a `spark-env.sh`
/// file.
pub fn to_spark_env_sh_string<'a, T>(env_vars: T) -> String
where
    T: Iterator<Item = (&'a String, &'a String)>,
{
    env_vars
        .map(|(k, v)| format!("export {k}=\"{v}\""))
        .collect::<Vec<String>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;

    #[test]
    fn test_to_spark_env_sh_string() {
        let env_vars = BTreeMap::from([
            ("SPARK_NO_DAEMONIZE".to_string(), "true".to_string()),
            ("USER".to_string(), "spark".to_string()),
        ]);

        assert_eq!(
            to_spark_env_sh_string(env_vars.iter()),
            "export SPARK_NO_DAEMONIZE=\"true\"\nexport USER=\"spark\""
        );
    }
}
