//! JSON:API client for the contact/campaign platform

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method};
use serde_json::{Value, json};
use tracing::{debug, warn};

use super::{CampaignStore, PlatformError, ScheduleRequest, Segment, SegmentStore};
use crate::config::PlatformConfig;
use crate::domain::catalog::INTERACTION_TYPES;
use crate::domain::{FilterQuery, TenantContext};

const JSON_API: &str = "application/vnd.api+json";
const USER_AGENT: &str = concat!("campaignd/", env!("CARGO_PKG_VERSION"));

/// HTTP client for segments, campaigns and email documents
///
/// Credentials from the connection handshake win over the environment
/// variables named in config.
pub struct PlatformClient {
    http: Client,
    base_url: String,
    api_key: Option<String>,
    bearer_token: Option<String>,
    page_size: u32,
}

/// Resolved request target for one tenant
struct Target {
    base: String,
    location_id: String,
    api_key: String,
    bearer_token: String,
}

impl PlatformClient {
    /// Create a client from configuration
    pub fn from_config(config: &PlatformConfig) -> Result<Self, PlatformError> {
        debug!(base_url = %config.base_url, "PlatformClient::from_config: called");
        let http = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(PlatformError::Network)?;

        Ok(Self {
            http,
            base_url: config.base_url.clone(),
            api_key: std::env::var(&config.api_key_env).ok(),
            bearer_token: std::env::var(&config.bearer_token_env).ok(),
            page_size: config.page_size,
        })
    }

    fn target(&self, tenant: &TenantContext) -> Result<Target, PlatformError> {
        debug!(tenant_id = ?tenant.tenant_id(), "PlatformClient::target: called");
        let location_id = tenant.tenant_id().ok_or(PlatformError::MissingTenant)?.to_string();
        let creds = &tenant.credentials;

        let api_key = non_empty(creds.api_key.as_deref())
            .or(self.api_key.as_deref())
            .ok_or_else(|| PlatformError::MissingCredentials("api key".to_string()))?
            .to_string();
        let bearer_token = non_empty(creds.bearer_token.as_deref())
            .or(self.bearer_token.as_deref())
            .ok_or_else(|| PlatformError::MissingCredentials("bearer token".to_string()))?
            .to_string();
        let base = versioned_base(non_empty(creds.api_url.as_deref()).unwrap_or(&self.base_url));

        Ok(Target {
            base,
            location_id,
            api_key,
            bearer_token,
        })
    }

    /// Send one request and return the decoded JSON body
    async fn send(
        &self,
        target: &Target,
        method: Method,
        path: &str,
        query: &[(&str, String)],
        body: Option<Value>,
    ) -> Result<Value, PlatformError> {
        let url = format!("{}/locations/{}/{}", target.base, target.location_id, path);
        debug!(%method, %url, "PlatformClient::send: called");

        let mut request = self
            .http
            .request(method, &url)
            .header("accept", JSON_API)
            .header("authorization", format!("Bearer {}", target.bearer_token))
            .header("x-api-key", &target.api_key)
            .header("user-agent", USER_AGENT)
            .query(query);
        if let Some(body) = body {
            request = request
                .header("content-type", JSON_API)
                .body(serde_json::to_vec(&body).map_err(|e| PlatformError::Decode(e.to_string()))?);
        }

        let response = request.send().await?;
        let status = response.status().as_u16();
        let text = response.text().await.unwrap_or_default();

        if status == 422 {
            let message = error_detail(&text);
            warn!(%url, %message, "PlatformClient::send: validation rejected");
            return Err(PlatformError::Validation { message });
        }
        if !(200..300).contains(&status) {
            debug!(%status, "PlatformClient::send: API error");
            return Err(PlatformError::Api {
                status,
                message: error_detail(&text),
            });
        }
        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&text).map_err(|e| PlatformError::Decode(e.to_string()))
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.trim().is_empty())
}

/// Append the API version segment unless it is already there
fn versioned_base(base: &str) -> String {
    let base = base.trim_end_matches('/');
    if base.ends_with("/v2") {
        base.to_string()
    } else {
        format!("{}/v2", base)
    }
}

/// Pull a readable message out of a JSON:API error body
fn error_detail(text: &str) -> String {
    let Ok(body) = serde_json::from_str::<Value>(text) else {
        return if text.trim().is_empty() {
            "no response body".to_string()
        } else {
            text.trim().to_string()
        };
    };
    let details: Vec<String> = body
        .get("errors")
        .and_then(Value::as_array)
        .map(|errors| {
            errors
                .iter()
                .filter_map(|e| {
                    e.get("detail")
                        .or_else(|| e.get("title"))
                        .and_then(Value::as_str)
                        .map(str::to_string)
                })
                .collect()
        })
        .unwrap_or_default();
    if details.is_empty() {
        body.get("message")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| text.trim().to_string())
    } else {
        details.join("; ")
    }
}

fn string_field(value: &Value, key: &str) -> String {
    match value.get(key) {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        _ => String::new(),
    }
}

/// Decode one JSON:API contact_list resource
fn segment_from_resource(resource: &Value) -> Segment {
    let attrs = resource.get("attributes").cloned().unwrap_or(Value::Null);
    Segment {
        id: string_field(resource, "id"),
        name: string_field(&attrs, "name"),
        display_name: string_field(&attrs, "display_name"),
        filter_query: attrs.get("filters").cloned().unwrap_or(Value::Null),
    }
}

fn resource_id(body: &Value) -> Result<String, PlatformError> {
    let id = body.get("data").map(|d| string_field(d, "id")).unwrap_or_default();
    if id.is_empty() {
        Err(PlatformError::Decode("response has no data.id".to_string()))
    } else {
        Ok(id)
    }
}

#[async_trait]
impl SegmentStore for PlatformClient {
    async fn fetch_segments(&self, tenant: &TenantContext) -> Result<Vec<Segment>, PlatformError> {
        debug!("PlatformClient::fetch_segments: called");
        let target = self.target(tenant)?;
        let body = self
            .send(
                &target,
                Method::GET,
                "contact_lists",
                &[("page.size", self.page_size.to_string())],
                None,
            )
            .await?;

        let segments: Vec<Segment> = body
            .get("data")
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter(|item| {
                        item.get("attributes")
                            .and_then(|a| a.get("list_type"))
                            .and_then(Value::as_str)
                            == Some("smart")
                    })
                    .map(segment_from_resource)
                    .collect()
            })
            .unwrap_or_default();
        debug!(count = %segments.len(), "PlatformClient::fetch_segments: decoded");
        Ok(segments)
    }

    async fn create_segment(
        &self,
        tenant: &TenantContext,
        display_name: &str,
        query: &FilterQuery,
    ) -> Result<Segment, PlatformError> {
        debug!(%display_name, "PlatformClient::create_segment: called");
        let target = self.target(tenant)?;
        let payload = json!({
            "data": {
                "type": "contact_lists",
                "attributes": {
                    "display_name": display_name,
                    "list_type": "smart",
                    "filters": query,
                }
            },
            "meta": null
        });
        let body = self
            .send(&target, Method::POST, "contact_lists", &[], Some(payload))
            .await?;
        let mut segment = body.get("data").map(segment_from_resource).ok_or_else(|| {
            PlatformError::Decode("create contact_list response has no data".to_string())
        })?;
        if segment.display_name.is_empty() {
            segment.display_name = display_name.to_string();
        }
        Ok(segment)
    }

    async fn update_segment(
        &self,
        tenant: &TenantContext,
        segment_id: &str,
        display_name: &str,
        query: &FilterQuery,
    ) -> Result<Segment, PlatformError> {
        debug!(%segment_id, %display_name, "PlatformClient::update_segment: called");
        let target = self.target(tenant)?;
        let payload = json!({
            "data": {
                "id": segment_id,
                "type": "contact_lists",
                "attributes": {
                    "display_name": display_name,
                    "filters": query,
                }
            }
        });
        let body = self
            .send(
                &target,
                Method::PATCH,
                &format!("contact_lists/{}", segment_id),
                &[],
                Some(payload),
            )
            .await?;
        let mut segment = body.get("data").map(segment_from_resource).unwrap_or(Segment {
            id: segment_id.to_string(),
            name: String::new(),
            display_name: String::new(),
            filter_query: Value::Null,
        });
        if segment.display_name.is_empty() {
            segment.display_name = display_name.to_string();
        }
        Ok(segment)
    }

    async fn fetch_attribute_whitelist(&self, tenant: &TenantContext) -> Result<Vec<String>, PlatformError> {
        debug!("PlatformClient::fetch_attribute_whitelist: called");
        let target = self.target(tenant)?;
        let body = self
            .send(&target, Method::GET, "contact_properties", &[], None)
            .await?;
        let names = body
            .get("data")
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(|item| item.get("attributes"))
                    .map(|attrs| string_field(attrs, "name"))
                    .filter(|name| !name.is_empty())
                    .collect()
            })
            .unwrap_or_default();
        Ok(names)
    }

    async fn fetch_event_type_whitelist(&self, tenant: &TenantContext) -> Result<Vec<String>, PlatformError> {
        // The platform has no listing endpoint; its interaction types are fixed
        debug!(tenant_id = ?tenant.tenant_id(), "PlatformClient::fetch_event_type_whitelist: called");
        Ok(INTERACTION_TYPES.iter().map(|s| s.to_string()).collect())
    }
}

#[async_trait]
impl CampaignStore for PlatformClient {
    async fn create_campaign(
        &self,
        tenant: &TenantContext,
        name: &str,
        subject_line: &str,
    ) -> Result<String, PlatformError> {
        debug!(%name, "PlatformClient::create_campaign: called");
        let target = self.target(tenant)?;
        let payload = json!({
            "data": {
                "type": "campaigns",
                "attributes": {
                    "custom_html_template": true,
                    "name": name,
                    "subject_line": subject_line,
                }
            },
            "meta": null
        });
        let body = self.send(&target, Method::POST, "campaigns", &[], Some(payload)).await?;
        resource_id(&body)
    }

    async fn create_email_document(
        &self,
        tenant: &TenantContext,
        campaign_id: &str,
        html: &str,
    ) -> Result<String, PlatformError> {
        debug!(%campaign_id, html_len = %html.len(), "PlatformClient::create_email_document: called");
        let target = self.target(tenant)?;
        let payload = json!({
            "data": {
                "type": "email_documents",
                "attributes": {
                    "campaign_id": campaign_id,
                    "document": "{}",
                    "html": html,
                }
            },
            "meta": null
        });
        let body = self
            .send(&target, Method::POST, "email_documents", &[], Some(payload))
            .await?;
        resource_id(&body)
    }

    async fn update_email_document(
        &self,
        tenant: &TenantContext,
        document_id: &str,
        html: &str,
    ) -> Result<(), PlatformError> {
        debug!(%document_id, html_len = %html.len(), "PlatformClient::update_email_document: called");
        let target = self.target(tenant)?;
        let payload = json!({
            "data": {
                "id": document_id,
                "type": "email_documents",
                "attributes": {
                    "document": "{}",
                    "html": html,
                }
            }
        });
        self.send(
            &target,
            Method::PATCH,
            &format!("email_documents/{}", document_id),
            &[],
            Some(payload),
        )
        .await?;
        Ok(())
    }

    async fn schedule_campaign(&self, tenant: &TenantContext, request: &ScheduleRequest) -> Result<(), PlatformError> {
        debug!(campaign_id = %request.campaign_id, send_at = %request.send_at, "PlatformClient::schedule_campaign: called");
        let target = self.target(tenant)?;
        let payload = json!({
            "data": {
                "id": request.campaign_id,
                "type": "campaigns",
                "attributes": {
                    "name": request.name,
                    "subject_line": request.subject_line,
                    "send_at": request.send_at,
                    "status": "scheduled",
                    "contact_list_names": request.segment_names,
                }
            }
        });
        self.send(
            &target,
            Method::PATCH,
            &format!("campaigns/{}", request.campaign_id),
            &[],
            Some(payload),
        )
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Credentials, Location};

    fn client() -> PlatformClient {
        PlatformClient {
            http: Client::new(),
            base_url: "https://platform.example.com".to_string(),
            api_key: Some("env-key".to_string()),
            bearer_token: None,
            page_size: 50,
        }
    }

    fn tenant(creds: Credentials) -> TenantContext {
        TenantContext::new(
            Location {
                id: "loc-9".to_string(),
                ..Location::default()
            },
            creds,
        )
    }

    #[test]
    fn test_versioned_base() {
        assert_eq!(versioned_base("https://x.test"), "https://x.test/v2");
        assert_eq!(versioned_base("https://x.test/v2/"), "https://x.test/v2");
    }

    #[test]
    fn test_target_prefers_handshake_credentials() {
        let target = client()
            .target(&tenant(Credentials {
                api_key: Some("conn-key".to_string()),
                bearer_token: Some("conn-token".to_string()),
                api_url: Some("https://tenant.example.com".to_string()),
            }))
            .unwrap();
        assert_eq!(target.api_key, "conn-key");
        assert_eq!(target.bearer_token, "conn-token");
        assert_eq!(target.base, "https://tenant.example.com/v2");
        assert_eq!(target.location_id, "loc-9");
    }

    #[test]
    fn test_target_requires_bearer_token() {
        let err = client().target(&tenant(Credentials::default())).err().unwrap();
        assert!(matches!(err, PlatformError::MissingCredentials(_)));
    }

    #[test]
    fn test_target_requires_location() {
        let err = client().target(&TenantContext::default()).err().unwrap();
        assert!(matches!(err, PlatformError::MissingTenant));
    }

    #[test]
    fn test_error_detail_reads_json_api_errors() {
        let text = r#"{"errors":[{"detail":"filters[0][0].property_name is invalid"},{"title":"Bad operator"}]}"#;
        assert_eq!(
            error_detail(text),
            "filters[0][0].property_name is invalid; Bad operator"
        );
        assert_eq!(error_detail("plain failure"), "plain failure");
        assert_eq!(error_detail(""), "no response body");
    }

    #[test]
    fn test_segment_from_resource() {
        let resource = json!({
            "id": 77,
            "attributes": {"name": "vip", "display_name": "VIP Customers", "filters": [[]], "list_type": "smart"}
        });
        let segment = segment_from_resource(&resource);
        assert_eq!(segment.id, "77");
        assert_eq!(segment.display_name, "VIP Customers");
        assert_eq!(segment.filter_query, json!([[]]));
    }
}
