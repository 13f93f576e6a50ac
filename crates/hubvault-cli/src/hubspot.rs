//! HubSpotClient: CrmClient implementation over the HubSpot v3 REST API.

use async_trait::async_trait;
use hubvault_core::crm::{CrmClient, CrmError, CrmFile, CrmObject, FilePage, Result};
use hubvault_core::mapper;
use hubvault_core::ObjectKind;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, instrument};

/// Page size requested from the file manager search.
const FILE_PAGE_LIMIT: u32 = 100;

#[derive(Debug, Deserialize)]
struct FileSearchResponse {
    #[serde(default)]
    results: Vec<CrmFile>,
    #[serde(default)]
    paging: Option<Paging>,
}

#[derive(Debug, Deserialize)]
struct Paging {
    next: Option<NextPage>,
}

#[derive(Debug, Deserialize)]
struct NextPage {
    after: String,
}

#[derive(Debug, Serialize)]
struct PropertiesInput<'a> {
    properties: BTreeMap<&'a str, &'a str>,
}

#[derive(Clone)]
pub struct HubSpotClient {
    client: Client,
    base_url: String,
    token: String,
}

impl HubSpotClient {
    pub fn new(base_url: &str, token: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| CrmError::Unavailable(format!("building HTTP client: {}", e)))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.into(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder, what: &str) -> Result<T> {
        let response = request
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(|e| CrmError::Unavailable(e.to_string()))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(CrmError::NotFound(what.to_string()));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CrmError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| CrmError::Unavailable(e.to_string()))?;
        serde_json::from_slice(&bytes).map_err(|e| CrmError::Malformed(format!("{}: {}", what, e)))
    }
}

#[async_trait]
impl CrmClient for HubSpotClient {
    #[instrument(level = "debug", skip(self))]
    async fn get_company(
        &self,
        id: &str,
        properties: &[&str],
        associations: &[&str],
    ) -> Result<CrmObject> {
        let mut query = vec![("properties", properties.join(","))];
        if !associations.is_empty() {
            query.push(("associations", associations.join(",")));
        }
        let request = self
            .client
            .get(self.url(&format!("crm/v3/objects/companies/{}", id)))
            .query(&query);
        self.send(request, &format!("company {}", id)).await
    }

    #[instrument(level = "debug", skip(self))]
    async fn get_contact(&self, id: &str) -> Result<CrmObject> {
        let properties = mapper::crm_properties(ObjectKind::Contact).join(",");
        let request = self
            .client
            .get(self.url(&format!("crm/v3/objects/contacts/{}", id)))
            .query(&[("properties", properties)]);
        self.send(request, &format!("contact {}", id)).await
    }

    async fn list_files(&self, after: Option<&str>) -> Result<FilePage> {
        let mut query = vec![("limit", FILE_PAGE_LIMIT.to_string())];
        if let Some(after) = after {
            query.push(("after", after.to_string()));
        }
        let request = self.client.get(self.url("files/v3/files/search")).query(&query);
        let page: FileSearchResponse = self.send(request, "file search").await?;
        debug!("File search page: {} result(s)", page.results.len());

        Ok(FilePage {
            results: page.results,
            next_after: page.paging.and_then(|p| p.next).map(|n| n.after),
        })
    }

    #[instrument(level = "debug", skip(self, value))]
    async fn update_company_property(
        &self,
        id: &str,
        name: &str,
        value: &str,
    ) -> Result<CrmObject> {
        let body = PropertiesInput {
            properties: BTreeMap::from([(name, value)]),
        };
        let request = self
            .client
            .patch(self.url(&format!("crm/v3/objects/companies/{}", id)))
            .json(&body);
        self.send(request, &format!("company {}", id)).await
    }
}
