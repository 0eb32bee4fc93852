use aws_sdk_opensearchserverless::types::{
    SecurityPolicyType, VpcEndpointStatus as SdkVpcEndpointStatus,
};

use super::{block_on, missing_field, AwsCloud};
use crate::adapters::collection_network::{
    CollectionNetwork, NetworkPolicyUpdate, VpcEndpointRequest, VpcEndpointStatus,
    VpcEndpointSummary,
};
use crate::error::CloudError;

impl CollectionNetwork for AwsCloud {
    fn find_vpc_endpoint(&self, name: &str) -> Result<Option<VpcEndpointSummary>, CloudError> {
        let mut next_token: Option<String> = None;
        loop {
            let output = block_on(
                self.opensearch
                    .list_vpc_endpoints()
                    .set_next_token(next_token.take())
                    .send(),
            )
            .map_err(|error| CloudError::from_sdk("ListVpcEndpoints", &error))?;

            let found = output.vpc_endpoint_summaries().iter().find_map(|summary| {
                summary_of(summary.id(), summary.name(), summary.status())
                    .filter(|endpoint| endpoint.name == name)
            });
            if found.is_some() {
                return Ok(found);
            }
            match output.next_token() {
                Some(token) => next_token = Some(token.to_string()),
                None => return Ok(None),
            }
        }
    }

    fn vpc_endpoint(&self, id: &str) -> Result<Option<VpcEndpointSummary>, CloudError> {
        let output = block_on(self.opensearch.batch_get_vpc_endpoint().ids(id).send())
            .map_err(|error| CloudError::from_sdk("BatchGetVpcEndpoint", &error))?;
        Ok(output
            .vpc_endpoint_details()
            .iter()
            .find_map(|detail| summary_of(detail.id(), detail.name(), detail.status())))
    }

    fn create_vpc_endpoint(&self, request: &VpcEndpointRequest) -> Result<String, CloudError> {
        const OPERATION: &str = "CreateVpcEndpoint";
        let output = block_on(
            self.opensearch
                .create_vpc_endpoint()
                .name(&request.name)
                .vpc_id(&request.vpc_id)
                .set_subnet_ids(Some(request.subnet_ids.clone()))
                .set_security_group_ids(Some(request.security_group_ids.clone()))
                .send(),
        )
        .map_err(|error| CloudError::from_sdk(OPERATION, &error))?;
        output
            .create_vpc_endpoint_detail()
            .and_then(|detail| detail.id())
            .map(str::to_string)
            .ok_or_else(|| missing_field(OPERATION, "CreateVpcEndpointDetail.Id"))
    }

    fn delete_vpc_endpoint(&self, id: &str) -> Result<(), CloudError> {
        block_on(self.opensearch.delete_vpc_endpoint().id(id).send())
            .map(|_| ())
            .map_err(|error| CloudError::from_sdk("DeleteVpcEndpoint", &error))
    }

    fn network_policy_version(&self, policy_name: &str) -> Result<String, CloudError> {
        const OPERATION: &str = "GetSecurityPolicy";
        let output = block_on(
            self.opensearch
                .get_security_policy()
                .name(policy_name)
                .r#type(SecurityPolicyType::Network)
                .send(),
        )
        .map_err(|error| CloudError::from_sdk(OPERATION, &error))?;
        output
            .security_policy_detail()
            .and_then(|detail| detail.policy_version())
            .map(str::to_string)
            .ok_or_else(|| missing_field(OPERATION, "SecurityPolicyDetail.PolicyVersion"))
    }

    fn update_network_policy(&self, update: &NetworkPolicyUpdate) -> Result<(), CloudError> {
        block_on(
            self.opensearch
                .update_security_policy()
                .name(&update.name)
                .r#type(SecurityPolicyType::Network)
                .policy_version(&update.policy_version)
                .description(&update.description)
                .policy(&update.policy)
                .send(),
        )
        .map(|_| ())
        .map_err(|error| CloudError::from_sdk("UpdateSecurityPolicy", &error))
    }
}

fn summary_of(
    id: Option<&str>,
    name: Option<&str>,
    status: Option<&SdkVpcEndpointStatus>,
) -> Option<VpcEndpointSummary> {
    let status = match status? {
        SdkVpcEndpointStatus::Pending => VpcEndpointStatus::Pending,
        SdkVpcEndpointStatus::Active => VpcEndpointStatus::Active,
        SdkVpcEndpointStatus::Deleting => VpcEndpointStatus::Deleting,
        SdkVpcEndpointStatus::Failed => VpcEndpointStatus::Failed,
        _ => return None,
    };
    Some(VpcEndpointSummary {
        id: id?.to_string(),
        name: name?.to_string(),
        status,
    })
}
