//! Contact/campaign platform collaborators
//!
//! The workflow only sees the `SegmentStore` and `CampaignStore` traits;
//! `PlatformClient` is the HTTP implementation used by the daemon.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::{FilterQuery, TenantContext};

mod client;
mod error;

pub use client::PlatformClient;
pub use error::PlatformError;

/// A saved audience segment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    pub id: String,
    pub name: String,
    pub display_name: String,
    /// Raw filters as stored by the platform; may predate the current schema
    pub filter_query: Value,
}

/// Everything needed to schedule a campaign
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleRequest {
    pub campaign_id: String,
    pub name: String,
    pub subject_line: String,
    pub send_at: String,
    /// Segment display names; empty targets all customers
    pub segment_names: Vec<String>,
}

/// Segment and whitelist operations
#[async_trait]
pub trait SegmentStore: Send + Sync {
    async fn fetch_segments(&self, tenant: &TenantContext) -> Result<Vec<Segment>, PlatformError>;

    async fn create_segment(
        &self,
        tenant: &TenantContext,
        display_name: &str,
        query: &FilterQuery,
    ) -> Result<Segment, PlatformError>;

    async fn update_segment(
        &self,
        tenant: &TenantContext,
        segment_id: &str,
        display_name: &str,
        query: &FilterQuery,
    ) -> Result<Segment, PlatformError>;

    async fn fetch_attribute_whitelist(&self, tenant: &TenantContext) -> Result<Vec<String>, PlatformError>;

    async fn fetch_event_type_whitelist(&self, tenant: &TenantContext) -> Result<Vec<String>, PlatformError>;
}

/// Campaign and email document operations
#[async_trait]
pub trait CampaignStore: Send + Sync {
    /// Returns the new campaign id
    async fn create_campaign(
        &self,
        tenant: &TenantContext,
        name: &str,
        subject_line: &str,
    ) -> Result<String, PlatformError>;

    /// Returns the new email document id
    async fn create_email_document(
        &self,
        tenant: &TenantContext,
        campaign_id: &str,
        html: &str,
    ) -> Result<String, PlatformError>;

    async fn update_email_document(
        &self,
        tenant: &TenantContext,
        document_id: &str,
        html: &str,
    ) -> Result<(), PlatformError>;

    async fn schedule_campaign(&self, tenant: &TenantContext, request: &ScheduleRequest) -> Result<(), PlatformError>;
}
