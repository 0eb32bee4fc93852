use aws_sdk_iam::types::PolicyVersion;

use super::{block_on, missing_field, AwsCloud};
use crate::adapters::policy_store::PolicyStore;
use crate::error::{CloudError, CloudErrorKind};

/// IAM keeps at most this many versions of a managed policy.
const MAX_POLICY_VERSIONS: usize = 5;

impl PolicyStore for AwsCloud {
    fn role_arn(&self, role_name: &str) -> Result<String, CloudError> {
        const OPERATION: &str = "GetRole";
        let output = block_on(self.iam.get_role().role_name(role_name).send())
            .map_err(|error| CloudError::from_sdk(OPERATION, &error))?;
        output
            .role()
            .map(|role| role.arn().to_string())
            .ok_or_else(|| missing_field(OPERATION, "Role"))
    }

    fn create_policy(&self, policy_name: &str, document: &str) -> Result<String, CloudError> {
        const OPERATION: &str = "CreatePolicy";
        let output = block_on(
            self.iam
                .create_policy()
                .policy_name(policy_name)
                .policy_document(document)
                .send(),
        )
        .map_err(|error| CloudError::from_sdk(OPERATION, &error))?;
        output
            .policy()
            .and_then(|policy| policy.arn())
            .map(str::to_string)
            .ok_or_else(|| missing_field(OPERATION, "Policy.Arn"))
    }

    fn policy_document(&self, policy_arn: &str) -> Result<String, CloudError> {
        let policy = block_on(self.iam.get_policy().policy_arn(policy_arn).send())
            .map_err(|error| CloudError::from_sdk("GetPolicy", &error))?;
        let version_id = policy
            .policy()
            .and_then(|policy| policy.default_version_id())
            .ok_or_else(|| missing_field("GetPolicy", "Policy.DefaultVersionId"))?
            .to_string();

        const OPERATION: &str = "GetPolicyVersion";
        let output = block_on(
            self.iam
                .get_policy_version()
                .policy_arn(policy_arn)
                .version_id(version_id)
                .send(),
        )
        .map_err(|error| CloudError::from_sdk(OPERATION, &error))?;
        let encoded = output
            .policy_version()
            .and_then(|version| version.document())
            .ok_or_else(|| missing_field(OPERATION, "PolicyVersion.Document"))?;
        urlencoding::decode(encoded)
            .map(|document| document.into_owned())
            .map_err(|error| {
                CloudError::new(
                    CloudErrorKind::Other,
                    OPERATION,
                    format!("policy document is not URL-encoded UTF-8: {error}"),
                )
            })
    }

    fn replace_policy_document(&self, policy_arn: &str, document: &str) -> Result<(), CloudError> {
        let versions = self.policy_versions(policy_arn)?;
        if versions.len() >= MAX_POLICY_VERSIONS {
            let oldest = versions
                .iter()
                .filter(|version| !version.is_default_version())
                .filter_map(PolicyVersion::version_id)
                .min_by_key(|id| version_number(id));
            if let Some(version_id) = oldest {
                self.delete_policy_version(policy_arn, version_id)?;
            }
        }

        block_on(
            self.iam
                .create_policy_version()
                .policy_arn(policy_arn)
                .policy_document(document)
                .set_as_default(true)
                .send(),
        )
        .map(|_| ())
        .map_err(|error| CloudError::from_sdk("CreatePolicyVersion", &error))
    }

    fn attach_role_policy(&self, role_name: &str, policy_arn: &str) -> Result<(), CloudError> {
        block_on(
            self.iam
                .attach_role_policy()
                .role_name(role_name)
                .policy_arn(policy_arn)
                .send(),
        )
        .map(|_| ())
        .map_err(|error| CloudError::from_sdk("AttachRolePolicy", &error))
    }

    fn detach_role_policy(&self, role_name: &str, policy_arn: &str) -> Result<(), CloudError> {
        block_on(
            self.iam
                .detach_role_policy()
                .role_name(role_name)
                .policy_arn(policy_arn)
                .send(),
        )
        .map(|_| ())
        .map_err(|error| CloudError::from_sdk("DetachRolePolicy", &error))
    }

    fn delete_policy(&self, policy_arn: &str) -> Result<(), CloudError> {
        for version in self.policy_versions(policy_arn)? {
            if version.is_default_version() {
                continue;
            }
            if let Some(version_id) = version.version_id() {
                self.delete_policy_version(policy_arn, version_id)?;
            }
        }
        block_on(self.iam.delete_policy().policy_arn(policy_arn).send())
            .map(|_| ())
            .map_err(|error| CloudError::from_sdk("DeletePolicy", &error))
    }
}

impl AwsCloud {
    fn policy_versions(&self, policy_arn: &str) -> Result<Vec<PolicyVersion>, CloudError> {
        let output = block_on(self.iam.list_policy_versions().policy_arn(policy_arn).send())
            .map_err(|error| CloudError::from_sdk("ListPolicyVersions", &error))?;
        Ok(output.versions().to_vec())
    }

    fn delete_policy_version(&self, policy_arn: &str, version_id: &str) -> Result<(), CloudError> {
        block_on(
            self.iam
                .delete_policy_version()
                .policy_arn(policy_arn)
                .version_id(version_id)
                .send(),
        )
        .map(|_| ())
        .map_err(|error| CloudError::from_sdk("DeletePolicyVersion", &error))
    }
}

/// `v3` -> 3; unparseable ids sort last.
fn version_number(version_id: &str) -> u32 {
    version_id
        .strip_prefix('v')
        .and_then(|number| number.parse().ok())
        .unwrap_or(u32::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_ids_order_numerically() {
        let mut ids = vec!["v10", "v2", "v1", "draft"];
        ids.sort_by_key(|id| version_number(id));
        assert_eq!(ids, vec!["v1", "v2", "v10", "draft"]);
    }
}
