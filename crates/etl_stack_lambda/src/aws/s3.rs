use super::{block_on, AwsCloud};
use crate::adapters::object_store::ObjectStore;
use crate::error::CloudError;

impl ObjectStore for AwsCloud {
    fn list_object_keys(&self, bucket: &str) -> Result<Vec<String>, CloudError> {
        let mut keys = Vec::new();
        let mut continuation_token: Option<String> = None;
        loop {
            let output = block_on(
                self.s3
                    .list_objects_v2()
                    .bucket(bucket)
                    .set_continuation_token(continuation_token.take())
                    .send(),
            )
            .map_err(|error| CloudError::from_sdk("ListObjectsV2", &error))?;

            keys.extend(
                output
                    .contents()
                    .iter()
                    .filter_map(|object| object.key())
                    .map(str::to_string),
            );
            match output.next_continuation_token() {
                Some(token) if output.is_truncated().unwrap_or(false) => {
                    continuation_token = Some(token.to_string());
                }
                _ => return Ok(keys),
            }
        }
    }

    fn delete_object(&self, bucket: &str, key: &str) -> Result<(), CloudError> {
        block_on(self.s3.delete_object().bucket(bucket).key(key).send())
            .map(|_| ())
            .map_err(|error| CloudError::from_sdk("DeleteObject", &error))
    }
}
