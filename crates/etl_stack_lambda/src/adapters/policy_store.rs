use crate::error::CloudError;

pub trait PolicyStore {
    fn role_arn(&self, role_name: &str) -> Result<String, CloudError>;
    /// Creates a customer-managed policy and returns its ARN.
    fn create_policy(&self, policy_name: &str, document: &str) -> Result<String, CloudError>;
    /// Document of the policy's default version, decoded.
    fn policy_document(&self, policy_arn: &str) -> Result<String, CloudError>;
    /// Makes `document` the policy's default version.
    fn replace_policy_document(&self, policy_arn: &str, document: &str) -> Result<(), CloudError>;
    fn attach_role_policy(&self, role_name: &str, policy_arn: &str) -> Result<(), CloudError>;
    fn detach_role_policy(&self, role_name: &str, policy_arn: &str) -> Result<(), CloudError>;
    /// Deletes the policy together with its non-default versions.
    fn delete_policy(&self, policy_arn: &str) -> Result<(), CloudError>;
}
