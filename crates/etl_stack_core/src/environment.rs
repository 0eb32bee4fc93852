use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const TABLE_NAME: &str = "TABLE_NAME";
pub const PIPELINE_NAME: &str = "PIPELINE_NAME";
pub const PIPELINE_ROLE_NAME: &str = "PIPELINE_ROLE_NAME";
pub const REGION: &str = "REGION";
pub const ACCOUNT_ID: &str = "ACCOUNT_ID";
pub const NETWORK_POLICY_NAME: &str = "NETWORK_POLICY_NAME";
pub const BUCKET_NAME: &str = "BUCKET_NAME";
pub const BUCKET_ARN: &str = "BUCKET_ARN";
pub const COLLECTION_ARN: &str = "COLLECTION_ARN";
pub const COLLECTION_NAME: &str = "COLLECTION_NAME";
pub const COLLECTION_ENDPOINT: &str = "COLLECTION_ENDPOINT";
pub const LOG_GROUP_NAME: &str = "LOG_GROUP_NAME";
pub const VPC_ID: &str = "VPC_ID";
pub const VPC_ENDPOINT_NAME: &str = "VPC_ENDPOINT_NAME";
pub const SECURITY_GROUP_IDS: &str = "SECURITY_GROUP_IDS";
pub const SUBNET_IDS_ISOLATED: &str = "SUBNET_IDS_ISOLATED";

/// Every key the custom-resource function is configured with.
pub const HANDLER_ENVIRONMENT_KEYS: [&str; 16] = [
    TABLE_NAME,
    PIPELINE_NAME,
    PIPELINE_ROLE_NAME,
    REGION,
    ACCOUNT_ID,
    NETWORK_POLICY_NAME,
    BUCKET_NAME,
    BUCKET_ARN,
    COLLECTION_ARN,
    COLLECTION_NAME,
    COLLECTION_ENDPOINT,
    LOG_GROUP_NAME,
    VPC_ID,
    VPC_ENDPOINT_NAME,
    SECURITY_GROUP_IDS,
    SUBNET_IDS_ISOLATED,
];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct ValidationError {
    message: String,
}

impl ValidationError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Identifiers handed to the custom-resource handler. This is everything the
/// handler knows about the stack; it never discovers resources on its own.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HandlerEnvironment {
    pub table_name: String,
    pub pipeline_name: String,
    pub pipeline_role_name: String,
    pub region: String,
    pub account_id: String,
    pub network_policy_name: String,
    pub bucket_name: String,
    pub bucket_arn: String,
    pub collection_arn: String,
    pub collection_name: String,
    pub collection_endpoint: String,
    pub log_group_name: String,
    pub vpc_id: String,
    pub vpc_endpoint_name: String,
    pub security_group_ids: Vec<String>,
    pub subnet_ids: Vec<String>,
}

impl HandlerEnvironment {
    pub fn from_lookup(
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<HandlerEnvironment, ValidationError> {
        let required = |key: &str| -> Result<String, ValidationError> {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
                .ok_or_else(|| ValidationError::new(format!("{key} must be configured")))
        };

        Ok(HandlerEnvironment {
            table_name: required(TABLE_NAME)?,
            pipeline_name: required(PIPELINE_NAME)?,
            pipeline_role_name: required(PIPELINE_ROLE_NAME)?,
            region: required(REGION)?,
            account_id: required(ACCOUNT_ID)?,
            network_policy_name: required(NETWORK_POLICY_NAME)?,
            bucket_name: required(BUCKET_NAME)?,
            bucket_arn: required(BUCKET_ARN)?,
            collection_arn: required(COLLECTION_ARN)?,
            collection_name: required(COLLECTION_NAME)?,
            collection_endpoint: required(COLLECTION_ENDPOINT)?,
            log_group_name: required(LOG_GROUP_NAME)?,
            vpc_id: required(VPC_ID)?,
            vpc_endpoint_name: required(VPC_ENDPOINT_NAME)?,
            security_group_ids: parse_security_group_ids(&required(SECURITY_GROUP_IDS)?)?,
            subnet_ids: parse_subnet_ids(&required(SUBNET_IDS_ISOLATED)?)?,
        })
    }

    pub fn from_map(values: &BTreeMap<String, String>) -> Result<HandlerEnvironment, ValidationError> {
        Self::from_lookup(|key| values.get(key).cloned())
    }

    pub fn from_process_env() -> Result<HandlerEnvironment, ValidationError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }
}

/// Comma separated; a single id is the common case.
pub fn parse_security_group_ids(raw: &str) -> Result<Vec<String>, ValidationError> {
    let ids: Vec<String> = raw
        .split(',')
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(str::to_string)
        .collect();
    if ids.is_empty() {
        return Err(ValidationError::new(format!(
            "{SECURITY_GROUP_IDS} must list at least one security group"
        )));
    }
    Ok(ids)
}

pub fn parse_subnet_ids(raw: &str) -> Result<Vec<String>, ValidationError> {
    let ids: Vec<String> = serde_json::from_str(raw).map_err(|error| {
        ValidationError::new(format!("{SUBNET_IDS_ISOLATED} must be a JSON array of strings: {error}"))
    })?;

    let mut seen = BTreeSet::new();
    for id in &ids {
        if id.trim().is_empty() {
            return Err(ValidationError::new(format!(
                "{SUBNET_IDS_ISOLATED} contains an empty subnet id"
            )));
        }
        if !seen.insert(id.as_str()) {
            return Err(ValidationError::new(format!(
                "{SUBNET_IDS_ISOLATED} lists subnet '{id}' more than once"
            )));
        }
    }
    if ids.is_empty() {
        return Err(ValidationError::new(format!(
            "{SUBNET_IDS_ISOLATED} must list at least one subnet"
        )));
    }
    Ok(ids)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_values() -> BTreeMap<String, String> {
        HANDLER_ENVIRONMENT_KEYS
            .iter()
            .map(|key| (key.to_string(), format!("value-{}", key.to_lowercase())))
            .chain([
                (SECURITY_GROUP_IDS.to_string(), "sg-1".to_string()),
                (
                    SUBNET_IDS_ISOLATED.to_string(),
                    r#"["subnet-a","subnet-b"]"#.to_string(),
                ),
            ])
            .collect()
    }

    #[test]
    fn parses_complete_environment() {
        let environment = HandlerEnvironment::from_map(&sample_values()).expect("complete");
        assert_eq!(environment.table_name, "value-table_name");
        assert_eq!(environment.security_group_ids, vec!["sg-1"]);
        assert_eq!(environment.subnet_ids, vec!["subnet-a", "subnet-b"]);
    }

    #[test]
    fn missing_key_is_named() {
        let mut values = sample_values();
        values.remove(COLLECTION_ENDPOINT);
        let error = HandlerEnvironment::from_map(&values).expect_err("incomplete");
        assert_eq!(error.message(), "COLLECTION_ENDPOINT must be configured");
        assert_eq!(error.to_string(), error.message());
    }

    #[test]
    fn subnet_ids_reject_duplicates_and_bad_json() {
        assert!(parse_subnet_ids(r#"["a","a"]"#)
            .expect_err("duplicate")
            .message()
            .contains("more than once"));
        assert!(parse_subnet_ids("subnet-a").is_err());
        assert!(parse_subnet_ids("[]").is_err());
    }

    #[test]
    fn security_groups_split_on_commas() {
        assert_eq!(
            parse_security_group_ids("sg-1, sg-2").expect("valid"),
            vec!["sg-1", "sg-2"]
        );
        assert!(parse_security_group_ids(" , ").is_err());
    }
}
