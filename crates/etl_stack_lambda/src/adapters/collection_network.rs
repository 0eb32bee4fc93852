//! OpenSearch Serverless VPC endpoints and network security policies.

use crate::error::CloudError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VpcEndpointStatus {
    Pending,
    Active,
    Deleting,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VpcEndpointSummary {
    pub id: String,
    pub name: String,
    pub status: VpcEndpointStatus,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VpcEndpointRequest {
    pub name: String,
    pub vpc_id: String,
    pub subnet_ids: Vec<String>,
    pub security_group_ids: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkPolicyUpdate {
    pub name: String,
    /// Version read just before the update; the service rejects stale ones.
    pub policy_version: String,
    pub description: String,
    pub policy: String,
}

pub trait CollectionNetwork {
    fn find_vpc_endpoint(&self, name: &str) -> Result<Option<VpcEndpointSummary>, CloudError>;
    fn vpc_endpoint(&self, id: &str) -> Result<Option<VpcEndpointSummary>, CloudError>;
    fn create_vpc_endpoint(&self, request: &VpcEndpointRequest) -> Result<String, CloudError>;
    fn delete_vpc_endpoint(&self, id: &str) -> Result<(), CloudError>;
    fn network_policy_version(&self, policy_name: &str) -> Result<String, CloudError>;
    fn update_network_policy(&self, update: &NetworkPolicyUpdate) -> Result<(), CloudError>;
}
