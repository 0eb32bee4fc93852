//! In-memory stand-ins for the cloud adapters, for handler tests.
//!
//! [`InMemoryCloud`] models just enough of each service for the lifecycle
//! handlers: resources move through their transitional states on the next
//! read, identifiers are deterministic, and any operation can be made to
//! fail a given number of times.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use crate::adapters::collection_network::{
    CollectionNetwork, NetworkPolicyUpdate, VpcEndpointRequest, VpcEndpointStatus,
    VpcEndpointSummary,
};
use crate::adapters::object_store::ObjectStore;
use crate::adapters::pipeline_service::{PipelineService, PipelineStatus};
use crate::adapters::policy_store::PolicyStore;
use crate::adapters::table_store::{TableDescription, TableStatus, TableStore};
use crate::error::{CloudError, CloudErrorKind};
use crate::pipeline_config::PipelineDefinition;
use crate::retry::Sleeper;
use crate::seed::{Item, TableDefinition};

pub const TEST_ACCOUNT_ID: &str = "123456789012";
pub const TEST_REGION: &str = "us-east-1";

#[derive(Debug, Clone)]
pub struct FakeTable {
    pub arn: String,
    pub status: TableStatus,
    pub items: Vec<Item>,
    pub point_in_time_recovery: bool,
}

#[derive(Debug, Clone)]
pub struct FakePipeline {
    pub definition: PipelineDefinition,
    pub deleting: bool,
}

#[derive(Debug, Clone, Default)]
pub struct FakeNetworkPolicy {
    pub version: u32,
    pub description: String,
    pub policy: String,
}

#[derive(Debug, Default)]
pub struct CloudState {
    pub tables: BTreeMap<String, FakeTable>,
    pub roles: BTreeMap<String, String>,
    /// Customer-managed policies by ARN.
    pub policies: BTreeMap<String, String>,
    pub attachments: BTreeSet<(String, String)>,
    pub vpc_endpoints: BTreeMap<String, VpcEndpointSummary>,
    pub network_policies: BTreeMap<String, FakeNetworkPolicy>,
    pub pipelines: BTreeMap<String, FakePipeline>,
    pub objects: BTreeMap<String, BTreeSet<String>>,
    /// Operation names in call order.
    pub calls: Vec<String>,
    failures: BTreeMap<String, VecDeque<CloudError>>,
    unprocessed_writes: usize,
    next_endpoint: u32,
}

#[derive(Debug, Default)]
pub struct InMemoryCloud {
    state: Mutex<CloudState>,
}

impl InMemoryCloud {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_role(self, role_name: &str) -> Self {
        self.state().roles.insert(
            role_name.to_string(),
            format!("arn:aws:iam::{TEST_ACCOUNT_ID}:role/{role_name}"),
        );
        self
    }

    pub fn with_network_policy(self, policy_name: &str, policy: &str) -> Self {
        self.state().network_policies.insert(
            policy_name.to_string(),
            FakeNetworkPolicy {
                version: 1,
                description: String::new(),
                policy: policy.to_string(),
            },
        );
        self
    }

    /// A customer-managed policy left behind by an earlier deployment.
    pub fn with_policy(self, policy_name: &str, document: &str) -> Self {
        self.state().policies.insert(
            format!("arn:aws:iam::{TEST_ACCOUNT_ID}:policy/{policy_name}"),
            document.to_string(),
        );
        self
    }

    pub fn with_bucket(self, bucket: &str, keys: &[&str]) -> Self {
        self.state().objects.insert(
            bucket.to_string(),
            keys.iter().map(|key| key.to_string()).collect(),
        );
        self
    }

    /// The next `times` calls to `operation` fail with `kind`.
    pub fn fail(&self, operation: &str, kind: CloudErrorKind, times: usize) {
        let mut state = self.state();
        let queue = state.failures.entry(operation.to_string()).or_default();
        for _ in 0..times {
            queue.push_back(CloudError::new(kind, operation, "injected failure"));
        }
    }

    /// The next BatchWriteItem hands back its last `count` items unprocessed.
    pub fn leave_unprocessed(&self, count: usize) {
        self.state().unprocessed_writes = count;
    }

    pub fn state(&self) -> std::sync::MutexGuard<'_, CloudState> {
        self.state.lock().expect("cloud state mutex poisoned")
    }

    pub fn calls(&self) -> Vec<String> {
        self.state().calls.clone()
    }

    pub fn call_count(&self, operation: &str) -> usize {
        self.state()
            .calls
            .iter()
            .filter(|call| call.as_str() == operation)
            .count()
    }

    /// Handler-managed resources still present: pipelines, policies,
    /// attachments, VPC endpoints and tables.
    pub fn residual_resources(&self) -> Vec<String> {
        let state = self.state();
        let mut residual = Vec::new();
        residual.extend(state.pipelines.keys().map(|name| format!("pipeline/{name}")));
        residual.extend(state.policies.keys().map(|arn| format!("policy/{arn}")));
        residual.extend(
            state
                .attachments
                .iter()
                .map(|(role, arn)| format!("attachment/{role}/{arn}")),
        );
        residual.extend(state.vpc_endpoints.keys().map(|id| format!("vpc-endpoint/{id}")));
        residual.extend(state.tables.keys().map(|name| format!("table/{name}")));
        residual
    }

    fn begin(&self, operation: &str) -> Result<std::sync::MutexGuard<'_, CloudState>, CloudError> {
        let mut state = self.state();
        state.calls.push(operation.to_string());
        if let Some(error) = state
            .failures
            .get_mut(operation)
            .and_then(VecDeque::pop_front)
        {
            return Err(error);
        }
        Ok(state)
    }
}

fn not_found(operation: &str, what: &str) -> CloudError {
    CloudError::not_found(operation, format!("{what} not found"))
}

fn already_exists(operation: &str, what: &str) -> CloudError {
    CloudError::new(
        CloudErrorKind::AlreadyExists,
        operation,
        format!("{what} already exists"),
    )
}

fn table_arn(table_name: &str) -> String {
    format!("arn:aws:dynamodb:{TEST_REGION}:{TEST_ACCOUNT_ID}:table/{table_name}")
}

impl TableStore for InMemoryCloud {
    fn create_table(&self, definition: &TableDefinition) -> Result<TableDescription, CloudError> {
        let mut state = self.begin("CreateTable")?;
        if state.tables.contains_key(&definition.table_name) {
            return Err(already_exists("CreateTable", &definition.table_name));
        }
        let arn = table_arn(&definition.table_name);
        state.tables.insert(
            definition.table_name.clone(),
            FakeTable {
                arn: arn.clone(),
                status: TableStatus::Creating,
                items: Vec::new(),
                point_in_time_recovery: false,
            },
        );
        Ok(TableDescription {
            table_arn: arn,
            status: TableStatus::Creating,
        })
    }

    fn describe_table(&self, table_name: &str) -> Result<TableDescription, CloudError> {
        let mut state = self.begin("DescribeTable")?;
        let table = state
            .tables
            .get_mut(table_name)
            .ok_or_else(|| not_found("DescribeTable", table_name))?;
        let description = TableDescription {
            table_arn: table.arn.clone(),
            status: table.status,
        };
        if table.status == TableStatus::Creating {
            table.status = TableStatus::Active;
        }
        Ok(description)
    }

    fn batch_write(&self, table_name: &str, items: &[Item]) -> Result<Vec<Item>, CloudError> {
        let mut state = self.begin("BatchWriteItem")?;
        let held_back = state.unprocessed_writes.min(items.len());
        state.unprocessed_writes = 0;
        let table = state
            .tables
            .get_mut(table_name)
            .ok_or_else(|| not_found("BatchWriteItem", table_name))?;
        if table.status != TableStatus::Active {
            return Err(not_found("BatchWriteItem", table_name));
        }
        let (written, unprocessed) = items.split_at(items.len() - held_back);
        table.items.extend_from_slice(written);
        Ok(unprocessed.to_vec())
    }

    fn enable_point_in_time_recovery(&self, table_name: &str) -> Result<(), CloudError> {
        let mut state = self.begin("UpdateContinuousBackups")?;
        let table = state
            .tables
            .get_mut(table_name)
            .ok_or_else(|| not_found("UpdateContinuousBackups", table_name))?;
        table.point_in_time_recovery = true;
        Ok(())
    }

    fn delete_table(&self, table_name: &str) -> Result<(), CloudError> {
        let mut state = self.begin("DeleteTable")?;
        state
            .tables
            .remove(table_name)
            .map(|_| ())
            .ok_or_else(|| not_found("DeleteTable", table_name))
    }
}

impl PolicyStore for InMemoryCloud {
    fn role_arn(&self, role_name: &str) -> Result<String, CloudError> {
        let state = self.begin("GetRole")?;
        state
            .roles
            .get(role_name)
            .cloned()
            .ok_or_else(|| not_found("GetRole", role_name))
    }

    fn create_policy(&self, policy_name: &str, document: &str) -> Result<String, CloudError> {
        let mut state = self.begin("CreatePolicy")?;
        let arn = format!("arn:aws:iam::{TEST_ACCOUNT_ID}:policy/{policy_name}");
        if state.policies.contains_key(&arn) {
            return Err(already_exists("CreatePolicy", policy_name));
        }
        state.policies.insert(arn.clone(), document.to_string());
        Ok(arn)
    }

    fn policy_document(&self, policy_arn: &str) -> Result<String, CloudError> {
        let state = self.begin("GetPolicyVersion")?;
        state
            .policies
            .get(policy_arn)
            .cloned()
            .ok_or_else(|| not_found("GetPolicyVersion", policy_arn))
    }

    fn replace_policy_document(&self, policy_arn: &str, document: &str) -> Result<(), CloudError> {
        let mut state = self.begin("CreatePolicyVersion")?;
        let current = state
            .policies
            .get_mut(policy_arn)
            .ok_or_else(|| not_found("CreatePolicyVersion", policy_arn))?;
        *current = document.to_string();
        Ok(())
    }

    fn attach_role_policy(&self, role_name: &str, policy_arn: &str) -> Result<(), CloudError> {
        let mut state = self.begin("AttachRolePolicy")?;
        if !state.roles.contains_key(role_name) {
            return Err(not_found("AttachRolePolicy", role_name));
        }
        if !state.policies.contains_key(policy_arn) {
            return Err(not_found("AttachRolePolicy", policy_arn));
        }
        state
            .attachments
            .insert((role_name.to_string(), policy_arn.to_string()));
        Ok(())
    }

    fn detach_role_policy(&self, role_name: &str, policy_arn: &str) -> Result<(), CloudError> {
        let mut state = self.begin("DetachRolePolicy")?;
        if state
            .attachments
            .remove(&(role_name.to_string(), policy_arn.to_string()))
        {
            Ok(())
        } else {
            Err(not_found("DetachRolePolicy", policy_arn))
        }
    }

    fn delete_policy(&self, policy_arn: &str) -> Result<(), CloudError> {
        let mut state = self.begin("DeletePolicy")?;
        if state.attachments.iter().any(|(_, arn)| arn == policy_arn) {
            return Err(CloudError::new(
                CloudErrorKind::InUse,
                "DeletePolicy",
                "policy is still attached",
            ));
        }
        state
            .policies
            .remove(policy_arn)
            .map(|_| ())
            .ok_or_else(|| not_found("DeletePolicy", policy_arn))
    }
}

impl CollectionNetwork for InMemoryCloud {
    fn find_vpc_endpoint(&self, name: &str) -> Result<Option<VpcEndpointSummary>, CloudError> {
        let state = self.begin("ListVpcEndpoints")?;
        Ok(state
            .vpc_endpoints
            .values()
            .find(|endpoint| endpoint.name == name)
            .cloned())
    }

    fn vpc_endpoint(&self, id: &str) -> Result<Option<VpcEndpointSummary>, CloudError> {
        let mut state = self.begin("BatchGetVpcEndpoint")?;
        let Some(seen) = state.vpc_endpoints.get(id).cloned() else {
            return Ok(None);
        };
        match seen.status {
            VpcEndpointStatus::Pending => {
                if let Some(endpoint) = state.vpc_endpoints.get_mut(id) {
                    endpoint.status = VpcEndpointStatus::Active;
                }
            }
            VpcEndpointStatus::Deleting => {
                state.vpc_endpoints.remove(id);
            }
            VpcEndpointStatus::Active | VpcEndpointStatus::Failed => {}
        }
        Ok(Some(seen))
    }

    fn create_vpc_endpoint(&self, request: &VpcEndpointRequest) -> Result<String, CloudError> {
        let mut state = self.begin("CreateVpcEndpoint")?;
        if state
            .vpc_endpoints
            .values()
            .any(|endpoint| endpoint.name == request.name)
        {
            return Err(CloudError::new(
                CloudErrorKind::Conflict,
                "CreateVpcEndpoint",
                format!("endpoint {} already exists", request.name),
            ));
        }
        if request.subnet_ids.is_empty() || request.security_group_ids.is_empty() {
            return Err(CloudError::new(
                CloudErrorKind::Other,
                "CreateVpcEndpoint",
                "subnets and security groups are required",
            ));
        }
        state.next_endpoint += 1;
        let id = format!("vpce-{:04}", state.next_endpoint);
        state.vpc_endpoints.insert(
            id.clone(),
            VpcEndpointSummary {
                id: id.clone(),
                name: request.name.clone(),
                status: VpcEndpointStatus::Pending,
            },
        );
        Ok(id)
    }

    fn delete_vpc_endpoint(&self, id: &str) -> Result<(), CloudError> {
        let mut state = self.begin("DeleteVpcEndpoint")?;
        let endpoint = state
            .vpc_endpoints
            .get_mut(id)
            .ok_or_else(|| not_found("DeleteVpcEndpoint", id))?;
        endpoint.status = VpcEndpointStatus::Deleting;
        Ok(())
    }

    fn network_policy_version(&self, policy_name: &str) -> Result<String, CloudError> {
        let state = self.begin("GetSecurityPolicy")?;
        state
            .network_policies
            .get(policy_name)
            .map(|policy| format!("v{}", policy.version))
            .ok_or_else(|| not_found("GetSecurityPolicy", policy_name))
    }

    fn update_network_policy(&self, update: &NetworkPolicyUpdate) -> Result<(), CloudError> {
        let mut state = self.begin("UpdateSecurityPolicy")?;
        let policy = state
            .network_policies
            .get_mut(&update.name)
            .ok_or_else(|| not_found("UpdateSecurityPolicy", &update.name))?;
        if update.policy_version != format!("v{}", policy.version) {
            return Err(CloudError::new(
                CloudErrorKind::Conflict,
                "UpdateSecurityPolicy",
                "policy version is stale",
            ));
        }
        policy.version += 1;
        policy.description = update.description.clone();
        policy.policy = update.policy.clone();
        Ok(())
    }
}

impl PipelineService for InMemoryCloud {
    fn create_pipeline(&self, definition: &PipelineDefinition) -> Result<(), CloudError> {
        let mut state = self.begin("CreatePipeline")?;
        if state.pipelines.contains_key(&definition.name) {
            return Err(already_exists("CreatePipeline", &definition.name));
        }
        state.pipelines.insert(
            definition.name.clone(),
            FakePipeline {
                definition: definition.clone(),
                deleting: false,
            },
        );
        Ok(())
    }

    fn pipeline_status(&self, pipeline_name: &str) -> Result<Option<PipelineStatus>, CloudError> {
        let mut state = self.begin("GetPipeline")?;
        match state.pipelines.get(pipeline_name).map(|pipeline| pipeline.deleting) {
            Some(true) => {
                state.pipelines.remove(pipeline_name);
                Ok(Some(PipelineStatus::Deleting))
            }
            Some(false) => Ok(Some(PipelineStatus::Creating)),
            None => Ok(None),
        }
    }

    fn delete_pipeline(&self, pipeline_name: &str) -> Result<(), CloudError> {
        let mut state = self.begin("DeletePipeline")?;
        let pipeline = state
            .pipelines
            .get_mut(pipeline_name)
            .ok_or_else(|| not_found("DeletePipeline", pipeline_name))?;
        pipeline.deleting = true;
        Ok(())
    }
}

impl ObjectStore for InMemoryCloud {
    fn list_object_keys(&self, bucket: &str) -> Result<Vec<String>, CloudError> {
        let state = self.begin("ListObjectsV2")?;
        state
            .objects
            .get(bucket)
            .map(|keys| keys.iter().cloned().collect())
            .ok_or_else(|| not_found("ListObjectsV2", bucket))
    }

    fn delete_object(&self, bucket: &str, key: &str) -> Result<(), CloudError> {
        let mut state = self.begin("DeleteObject")?;
        if let Some(keys) = state.objects.get_mut(bucket) {
            keys.remove(key);
        }
        Ok(())
    }
}

/// Records requested sleeps instead of blocking.
#[derive(Debug, Default)]
pub struct InstantSleeper {
    slept: Mutex<Vec<Duration>>,
}

impl InstantSleeper {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn total(&self) -> Duration {
        self.slept.lock().expect("sleeper mutex poisoned").iter().sum()
    }

    pub fn sleeps(&self) -> Vec<Duration> {
        self.slept.lock().expect("sleeper mutex poisoned").clone()
    }
}

impl Sleeper for InstantSleeper {
    fn sleep(&self, duration: Duration) {
        self.slept
            .lock()
            .expect("sleeper mutex poisoned")
            .push(duration);
    }
}
