use std::collections::BTreeMap;

use async_trait::async_trait;
use reqwest::{Method, Url};
use serde_json::json;

use super::rest::{send_checked, RestEndpoint};
use super::StorageClient;
use crate::error::TriggerError;

const COLLABORATOR: &str = "storage";

/// Storage class objects are rewritten into by `archive_object`.
pub const ARCHIVE_STORAGE_CLASS: &str = "ARCHIVE";

/// Cloud Storage JSON API client.
#[derive(Debug, Clone)]
pub struct RestStorageClient {
    endpoint: RestEndpoint,
}

impl RestStorageClient {
    #[allow(missing_docs)]
    #[must_use]
    pub const fn new(endpoint: RestEndpoint) -> Self {
        Self { endpoint }
    }

    fn object_url(&self, bucket: &str, object: &str) -> Result<Url, TriggerError> {
        self.endpoint
            .url(COLLABORATOR, &["storage", "v1", "b", bucket, "o", object])
    }

    fn upload_url(&self, bucket: &str, object: &str) -> Result<Url, TriggerError> {
        let mut url = self
            .endpoint
            .url(COLLABORATOR, &["upload", "storage", "v1", "b", bucket, "o"])?;
        url.query_pairs_mut()
            .append_pair("uploadType", "media")
            .append_pair("name", object);
        Ok(url)
    }
}

#[async_trait]
impl StorageClient for RestStorageClient {
    async fn create_object(&self, bucket: &str, object: &str, contents: &[u8]) -> Result<(), TriggerError> {
        let url = self.upload_url(bucket, object)?;
        let request = self
            .endpoint
            .request(Method::POST, url)
            .header(reqwest::header::CONTENT_TYPE, "text/plain")
            .body(contents.to_vec());
        send_checked(COLLABORATOR, request).await?;
        Ok(())
    }

    async fn update_metadata(
        &self,
        bucket: &str,
        object: &str,
        metadata: &BTreeMap<String, String>,
    ) -> Result<(), TriggerError> {
        let url = self.object_url(bucket, object)?;
        let request = self
            .endpoint
            .request(Method::PATCH, url)
            .json(&json!({ "metadata": metadata }));
        send_checked(COLLABORATOR, request).await?;
        Ok(())
    }

    async fn archive_object(&self, bucket: &str, object: &str) -> Result<(), TriggerError> {
        let url = self.endpoint.url(
            COLLABORATOR,
            &["storage", "v1", "b", bucket, "o", object, "rewriteTo", "b", bucket, "o", object],
        )?;
        let request = self
            .endpoint
            .request(Method::POST, url)
            .json(&json!({ "storageClass": ARCHIVE_STORAGE_CLASS }));
        send_checked(COLLABORATOR, request).await?;
        Ok(())
    }

    async fn delete_object(&self, bucket: &str, object: &str) -> Result<(), TriggerError> {
        let url = self.object_url(bucket, object)?;
        send_checked(COLLABORATOR, self.endpoint.request(Method::DELETE, url)).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::rest::DEFAULT_REQUEST_TIMEOUT;

    fn client() -> RestStorageClient {
        RestStorageClient::new(
            RestEndpoint::new("https://storage.example.test", None, DEFAULT_REQUEST_TIMEOUT).unwrap(),
        )
    }

    #[test]
    fn upload_url_carries_name_as_query() {
        let url = client().upload_url("bucket", "probe object").unwrap();
        assert_eq!(url.path(), "/upload/storage/v1/b/bucket/o");
        let pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        assert_eq!(
            pairs,
            vec![
                ("uploadType".to_string(), "media".to_string()),
                ("name".to_string(), "probe object".to_string()),
            ]
        );
    }

    #[test]
    fn object_url_encodes_object_name() {
        let url = client().object_url("bucket", "a/b").unwrap();
        assert_eq!(url.path(), "/storage/v1/b/bucket/o/a%2Fb");
    }
}
