//! MFilesClient: VaultClient implementation over the M-Files REST API.
//!
//! Every request except login carries the session token in the
//! `X-Authentication` header.

use crate::config::normalize_base_url;

use async_trait::async_trait;
use futures_util::StreamExt;
use hubvault_core::ObjectType;
use hubvault_core::property::PropertyValue;
use hubvault_core::vault::{
    FileUpload, ObjVer, PropertyFilter, Result, UploadedFile, VaultClient, VaultError, VaultObject,
};
use reqwest::multipart::{Form, Part};
use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::{debug, info, instrument};

pub const AUTH_HEADER: &str = "X-Authentication";

/// Credentials exchanged for a session token.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct Credentials {
    pub username: String,
    pub password: String,
    pub vault_guid: String,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    #[serde(rename = "Value")]
    value: String,
}

#[derive(Debug, Deserialize)]
struct SearchResults {
    #[serde(rename = "Items", default)]
    items: Vec<VaultObject>,
}

/// The part of an object version response the sync uses.
#[derive(Debug, Deserialize)]
struct ObjectVersion {
    #[serde(rename = "ObjVer")]
    obj_ver: ObjVer,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct ObjectCreationInfo<'a> {
    property_values: &'a [PropertyValue],
    files: &'a [UploadedFile],
}

#[derive(Clone)]
pub struct MFilesClient {
    client: Client,
    base_url: String,
    token: Option<String>,
}

impl MFilesClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| VaultError::Unavailable(format!("building HTTP client: {}", e)))?;
        Ok(Self {
            client,
            base_url: normalize_base_url(base_url),
            token: None,
        })
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path.trim_start_matches('/'))
    }

    /// Exchange credentials for a session token, then check the token is accepted.
    #[instrument(level = "info", skip(self, credentials), fields(username = %credentials.username))]
    pub async fn login(&self, credentials: &Credentials) -> Result<String> {
        let request = self
            .client
            .post(self.url("server/authenticationtokens"))
            .json(credentials);
        let token: TokenResponse = self.send(request).await?;

        let check = self
            .client
            .get(self.url("objects"))
            .header(AUTH_HEADER, &token.value);
        self.execute(check).await?;

        info!("Authenticated against vault {}", credentials.vault_guid);
        Ok(token.value)
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => request.header(AUTH_HEADER, token),
            None => request,
        }
    }

    /// Send a request, failing on transport errors and non-2xx statuses.
    async fn execute(&self, request: RequestBuilder) -> Result<reqwest::Response> {
        let response = self
            .authorized(request)
            .send()
            .await
            .map_err(|e| VaultError::Unavailable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(VaultError::Rejected {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T> {
        let bytes = self
            .execute(request)
            .await?
            .bytes()
            .await
            .map_err(|e| VaultError::Unavailable(e.to_string()))?;
        serde_json::from_slice(&bytes).map_err(|e| VaultError::Malformed(e.to_string()))
    }
}

/// Search query pairs: `p{def}={value}` per filter.
fn search_query(filters: &[PropertyFilter]) -> Vec<(String, String)> {
    filters
        .iter()
        .map(|f| (format!("p{}", f.property_def), f.value.clone()))
        .collect()
}

#[async_trait]
impl VaultClient for MFilesClient {
    #[instrument(level = "debug", skip(self))]
    async fn find_objects(
        &self,
        object_type: ObjectType,
        filters: &[PropertyFilter],
    ) -> Result<Vec<VaultObject>> {
        let request = self
            .client
            .get(self.url(&format!("objects/{}", object_type)))
            .query(&search_query(filters));
        let results: SearchResults = self.send(request).await?;
        debug!("Vault search returned {} item(s)", results.items.len());
        Ok(results.items)
    }

    #[instrument(level = "debug", skip(self, properties, files))]
    async fn create_object(
        &self,
        object_type: ObjectType,
        properties: &[PropertyValue],
        files: &[UploadedFile],
    ) -> Result<ObjVer> {
        let body = ObjectCreationInfo {
            property_values: properties,
            files,
        };
        let request = self
            .client
            .post(self.url(&format!("objects/{}", object_type)))
            .json(&body);
        let version: ObjectVersion = self.send(request).await?;
        Ok(version.obj_ver)
    }

    #[instrument(level = "debug", skip(self, properties))]
    async fn update_properties(
        &self,
        object_type: ObjectType,
        id: i64,
        properties: &[PropertyValue],
    ) -> Result<ObjVer> {
        let request = self
            .client
            .post(self.url(&format!("objects/{}/{}/latest/properties", object_type, id)))
            .json(properties);
        let version: ObjectVersion = self.send(request).await?;
        Ok(version.obj_ver)
    }

    async fn get_properties(
        &self,
        object_type: ObjectType,
        id: i64,
    ) -> Result<Vec<PropertyValue>> {
        let request = self
            .client
            .get(self.url(&format!("objects/{}/{}/latest/properties", object_type, id)));
        self.send(request).await
    }

    async fn get_object(&self, object_type: ObjectType, id: i64) -> Result<VaultObject> {
        let request = self
            .client
            .get(self.url(&format!("objects/{}/{}", object_type, id)));
        self.send(request).await
    }

    #[instrument(level = "debug", skip(self, upload), fields(file = %upload.file_name))]
    async fn upload_file(&self, upload: &FileUpload) -> Result<UploadedFile> {
        let mut part = Part::bytes(upload.bytes.clone()).file_name(upload.file_name.clone());
        if let Some(content_type) = &upload.content_type {
            part = part
                .mime_str(content_type)
                .map_err(|e| VaultError::Malformed(format!("content type {}: {}", content_type, e)))?;
        }
        let request = self
            .client
            .post(self.url("files"))
            .multipart(Form::new().part("file", part));
        self.send(request).await
    }

    #[instrument(level = "debug", skip(self, out))]
    async fn download_file(
        &self,
        document_id: i64,
        file_id: i64,
        out: &mut (dyn AsyncWrite + Send + Unpin),
    ) -> Result<u64> {
        let request = self.client.get(self.url(&format!(
            "objects/{}/{}/files/{}/content",
            ObjectType::Document,
            document_id,
            file_id
        )));
        let response = self.execute(request).await?;

        let mut stream = response.bytes_stream();
        let mut written: u64 = 0;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| VaultError::Unavailable(e.to_string()))?;
            out.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        out.flush().await?;

        debug!("Downloaded {} byte(s)", written);
        Ok(written)
    }

    #[instrument(level = "info", skip(self))]
    async fn destroy_object(&self, object_type: ObjectType, id: i64) -> Result<()> {
        let request = self
            .client
            .delete(self.url(&format!("objects/{}/{}/latest", object_type, id)))
            .query(&[("allVersions", "true")]);
        self.execute(request).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hubvault_core::ids::defs;

    #[test]
    fn test_base_url_is_normalized() {
        let client = MFilesClient::new("http://vault/REST", Duration::from_secs(1)).unwrap();
        assert_eq!(client.url("objects/101"), "http://vault/REST/objects/101");
        let client = MFilesClient::new("http://vault/REST/", Duration::from_secs(1)).unwrap();
        assert_eq!(client.url("/files"), "http://vault/REST/files");
    }

    #[test]
    fn test_search_query_uses_property_ids() {
        let query = search_query(&[
            PropertyFilter::new(defs::EXTERNAL_ID, "42"),
            PropertyFilter::new(defs::EXTERNAL_TYPE, "0-2"),
        ]);
        assert_eq!(
            query,
            vec![
                ("p1030".to_string(), "42".to_string()),
                ("p1039".to_string(), "0-2".to_string()),
            ]
        );
    }

    #[test]
    fn test_creation_body_shape() {
        let properties = [PropertyValue::text(defs::NAME, "Acme")];
        let body = ObjectCreationInfo {
            property_values: &properties,
            files: &[],
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["PropertyValues"][0]["PropertyDef"], 0);
        assert_eq!(json["Files"], serde_json::json!([]));
    }

    #[test]
    fn test_credentials_are_pascal_case() {
        let credentials = Credentials {
            username: "sync".to_string(),
            password: "secret".to_string(),
            vault_guid: "{ABC}".to_string(),
        };
        assert_eq!(
            serde_json::to_value(&credentials).unwrap(),
            serde_json::json!({"Username": "sync", "Password": "secret", "VaultGuid": "{ABC}"})
        );
    }
}
