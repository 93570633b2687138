//! Tenant (business location) context and platform credentials

use serde::{Deserialize, Serialize};
use tracing::debug;

/// Descriptive information about the business the campaign is for
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Location {
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    pub name: String,
    pub timezone: String,
    pub management_system: Option<String>,
    pub website: Option<String>,
    pub booking_site: Option<String>,
    pub formatted_phone_number: Option<String>,
    pub state: Option<String>,
    pub postal_code: Option<String>,
    pub country: Option<String>,
    pub country_code: Option<String>,
    pub currency: Option<String>,
}

/// Accept ids sent either as JSON strings or numbers
fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::String(s) => Ok(s),
        serde_json::Value::Number(n) => Ok(n.to_string()),
        serde_json::Value::Null => Ok(String::new()),
        other => Err(serde::de::Error::custom(format!("expected string or number id, got {}", other))),
    }
}

/// Per-connection platform credentials; empty fields fall back to config
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Credentials {
    pub api_key: Option<String>,
    pub bearer_token: Option<String>,
    pub api_url: Option<String>,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("bearer_token", &self.bearer_token.as_ref().map(|_| "<redacted>"))
            .field("api_url", &self.api_url)
            .finish()
    }
}

/// Everything a conversation knows about who it is working for
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TenantContext {
    pub location: Location,
    pub credentials: Credentials,
}

impl TenantContext {
    pub fn new(location: Location, credentials: Credentials) -> Self {
        Self { location, credentials }
    }

    /// Tenant id, if the handshake supplied one
    pub fn tenant_id(&self) -> Option<&str> {
        let id = self.location.id.trim();
        if id.is_empty() { None } else { Some(id) }
    }

    /// Timezone name, defaulting to UTC
    pub fn timezone(&self) -> &str {
        if self.location.timezone.trim().is_empty() {
            "UTC"
        } else {
            &self.location.timezone
        }
    }

    /// Bullet list describing the business, embedded in prompts
    pub fn describe(&self) -> String {
        debug!(tenant_id = ?self.tenant_id(), "TenantContext::describe: called");
        let loc = &self.location;
        let mut parts = Vec::new();

        if !loc.name.is_empty() {
            parts.push(format!("Business Name: {}", loc.name));
        }
        if !loc.id.is_empty() {
            parts.push(format!("Location ID: {}", loc.id));
        }
        if !loc.timezone.is_empty() {
            parts.push(format!("Timezone: {}", loc.timezone));
        }
        let optional = [
            ("Management System", &loc.management_system),
            ("Website", &loc.website),
            ("Booking Site", &loc.booking_site),
            ("Phone", &loc.formatted_phone_number),
        ];
        for (label, value) in optional {
            if let Some(v) = value.as_deref().filter(|v| !v.is_empty()) {
                parts.push(format!("{}: {}", label, v));
            }
        }

        let mut address = Vec::new();
        for part in [&loc.state, &loc.postal_code] {
            if let Some(v) = part.as_deref().filter(|v| !v.is_empty()) {
                address.push(v);
            }
        }
        if let Some(country) = loc.country.as_deref().or(loc.country_code.as_deref()).filter(|v| !v.is_empty()) {
            address.push(country);
        }
        if !address.is_empty() {
            parts.push(format!("Location: {}", address.join(", ")));
        }
        if let Some(currency) = loc.currency.as_deref().filter(|v| !v.is_empty()) {
            parts.push(format!("Currency: {}", currency));
        }

        if parts.is_empty() {
            "Location information not available.".to_string()
        } else {
            format!("- {}", parts.join("\n- "))
        }
    }
}
