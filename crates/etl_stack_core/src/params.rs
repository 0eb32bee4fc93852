use rand::Rng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::DeclarationError;

pub const DEFAULT_COLLECTION_NAME: &str = "dynamodb-etl-collection";
pub const DEFAULT_TABLE_NAME: &str = "opensearch-etl-table";
pub const DEFAULT_BUCKET_PREFIX: &str = "dynamodb-oss-etl-bucket";
pub const DEFAULT_PIPELINE_NAME: &str = "dynamodb-etl-pipeline";
pub const DEFAULT_LOG_GROUP_NAME: &str =
    "/aws/vendedlogs/OpenSearchIngestion/dynamodb-osis-pipeline/audit-logs";
pub const DEFAULT_VPC_NAME: &str = "dynamodb-opensearch-etl-vpc";
pub const DEFAULT_VPC_ENDPOINT_NAME: &str = "dynamodb-etl-collection-endpoint";

/// Upper bound on the availability zones the network spans.
pub const MAX_AVAILABILITY_ZONES: usize = 3;

/// Fully resolved stack parameters. Built once by [`resolve`] and never
/// mutated afterwards.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StackParameters {
    pub collection_name: String,
    pub table_name: String,
    pub bucket_name: String,
    pub pipeline_name: String,
    pub log_group_name: String,
    pub vpc_name: String,
    pub vpc_endpoint_name: String,
    pub current_user_identity: String,
}

/// Caller-supplied values layered over the defaults. Every field is optional;
/// `current_user_identity` has no default and must come from here.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct StackOverrides {
    pub collection_name: Option<String>,
    pub table_name: Option<String>,
    pub bucket_name: Option<String>,
    pub pipeline_name: Option<String>,
    pub log_group_name: Option<String>,
    pub vpc_name: Option<String>,
    pub vpc_endpoint_name: Option<String>,
    pub current_user_identity: Option<String>,
}

impl StackOverrides {
    /// Layers `other` on top of `self`; values set in `other` win.
    pub fn merge(self, other: StackOverrides) -> StackOverrides {
        StackOverrides {
            collection_name: other.collection_name.or(self.collection_name),
            table_name: other.table_name.or(self.table_name),
            bucket_name: other.bucket_name.or(self.bucket_name),
            pipeline_name: other.pipeline_name.or(self.pipeline_name),
            log_group_name: other.log_group_name.or(self.log_group_name),
            vpc_name: other.vpc_name.or(self.vpc_name),
            vpc_endpoint_name: other.vpc_endpoint_name.or(self.vpc_endpoint_name),
            current_user_identity: other.current_user_identity.or(self.current_user_identity),
        }
    }
}

/// Merges overrides with the defaults. The random bucket suffix is drawn from
/// `rng` only when no bucket name was supplied.
pub fn resolve(
    overrides: StackOverrides,
    rng: &mut impl Rng,
) -> Result<StackParameters, DeclarationError> {
    let current_user_identity = overrides
        .current_user_identity
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .ok_or(DeclarationError::MissingParameter("current_user_identity"))?;

    Ok(StackParameters {
        collection_name: overrides
            .collection_name
            .unwrap_or_else(|| DEFAULT_COLLECTION_NAME.to_string()),
        table_name: overrides
            .table_name
            .unwrap_or_else(|| DEFAULT_TABLE_NAME.to_string()),
        bucket_name: overrides
            .bucket_name
            .unwrap_or_else(|| default_bucket_name(rng)),
        pipeline_name: overrides
            .pipeline_name
            .unwrap_or_else(|| DEFAULT_PIPELINE_NAME.to_string()),
        log_group_name: overrides
            .log_group_name
            .unwrap_or_else(|| DEFAULT_LOG_GROUP_NAME.to_string()),
        vpc_name: overrides
            .vpc_name
            .unwrap_or_else(|| DEFAULT_VPC_NAME.to_string()),
        vpc_endpoint_name: overrides
            .vpc_endpoint_name
            .unwrap_or_else(|| DEFAULT_VPC_ENDPOINT_NAME.to_string()),
        current_user_identity,
    })
}

/// Bucket names live in a global namespace, so the default carries a
/// three-digit suffix in `100..=999`.
pub fn default_bucket_name(rng: &mut impl Rng) -> String {
    let suffix: u16 = rng.gen_range(100..1000);
    format!("{DEFAULT_BUCKET_PREFIX}-{suffix}")
}

impl StackParameters {
    /// SHA-256 over the canonical JSON form. Changes whenever any parameter
    /// changes, which is what turns a parameter edit into an Update event.
    pub fn fingerprint(&self) -> String {
        // Plain string fields only, so serialization cannot fail.
        let canonical =
            serde_json::to_string(self).expect("serialization of stack parameters should not fail");
        let mut hasher = Sha256::new();
        hasher.update(canonical);
        format!("{:x}", hasher.finalize())
    }
}

/// Where the stack is deployed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StackEnvironment {
    pub region: String,
    /// Literal account id; when absent the `AWS::AccountId` pseudo parameter
    /// is used.
    pub account_id: Option<String>,
    pub availability_zones: Vec<String>,
}

impl StackEnvironment {
    pub fn new(region: impl Into<String>) -> Self {
        let region = region.into();
        let availability_zones = ["a", "b", "c"]
            .iter()
            .map(|suffix| format!("{region}{suffix}"))
            .collect();
        Self {
            region,
            account_id: None,
            availability_zones,
        }
    }

    pub fn with_account_id(mut self, account_id: impl Into<String>) -> Self {
        self.account_id = Some(account_id.into());
        self
    }

    pub fn with_availability_zones(mut self, zones: Vec<String>) -> Self {
        self.availability_zones = zones;
        self
    }

    /// Zones the VPC actually spans: at most [`MAX_AVAILABILITY_ZONES`],
    /// duplicates dropped, declaration order kept.
    pub fn effective_availability_zones(&self) -> Vec<String> {
        let mut zones: Vec<String> = Vec::with_capacity(MAX_AVAILABILITY_ZONES);
        for zone in &self.availability_zones {
            let zone = zone.trim();
            if zone.is_empty() || zones.iter().any(|existing| existing == zone) {
                continue;
            }
            zones.push(zone.to_string());
            if zones.len() == MAX_AVAILABILITY_ZONES {
                break;
            }
        }
        zones
    }

    /// Account id as it appears inside `Fn::Sub` strings.
    pub fn account_sub(&self) -> String {
        match &self.account_id {
            Some(account) => account.clone(),
            None => "${AWS::AccountId}".to_string(),
        }
    }
}
