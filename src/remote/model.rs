//! Request and response shapes for the remote API.

use crate::model::{DeviceScope, OwnerInfo, RemoteEntry, StatusEvent, ViewFilters};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UploadTargetRequest {
    pub appointment_id: String,
    pub content_type: String,
    pub device_id: String,
    pub duration_seconds: Option<f64>,
}

/// Time-limited write location for one artifact.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct UploadTarget {
    pub url: String,
    pub key: String,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct PlaybackTarget {
    pub url: String,
}

/// Filters forwarded to the remote index as query parameters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndexQuery {
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
    pub status: Option<String>,
    pub device_id: Option<String>,
}

impl IndexQuery {
    pub fn from_filters(filters: &ViewFilters, device_id: &str) -> Self {
        Self {
            from: filters.from,
            to: filters.to,
            status: filters.status.clone(),
            device_id: match filters.device {
                DeviceScope::ThisDevice => Some(device_id.to_string()),
                DeviceScope::Any => None,
            },
        }
    }

    pub fn to_query_pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = Vec::new();
        if let Some(from) = self.from {
            pairs.push(("from", from.format("%Y-%m-%d").to_string()));
        }
        if let Some(to) = self.to {
            pairs.push(("to", to.format("%Y-%m-%d").to_string()));
        }
        if let Some(status) = self.status.as_ref().filter(|s| !s.is_empty()) {
            pairs.push(("status", status.clone()));
        }
        if let Some(device) = self.device_id.as_ref() {
            pairs.push(("deviceId", device.clone()));
        }
        pairs
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct IndexResponse {
    #[serde(default)]
    pub items: Vec<IndexItem>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct IndexItem {
    pub key: String,
    pub appointment_id: String,
    pub created_at: DateTime<Utc>,
    pub status: String,
    #[serde(default)]
    pub duration_seconds: Option<f64>,
    #[serde(default)]
    pub device_id: Option<String>,
    #[serde(default)]
    pub owner_email: Option<String>,
}

impl From<IndexItem> for RemoteEntry {
    fn from(item: IndexItem) -> Self {
        Self {
            key: item.key,
            appointment_id: item.appointment_id,
            created_at: item.created_at,
            status: item.status,
            duration_seconds: item.duration_seconds,
            device_id: item.device_id,
            owner_email: item.owner_email,
        }
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct StatusEventsRequest<'a> {
    pub events: Vec<WireEvent<'a>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct WireEvent<'a> {
    pub id: &'a str,
    pub appointment_id: &'a str,
    pub event_type: &'a str,
    pub status_value: &'a str,
    pub occurred_at: DateTime<Utc>,
    pub owner: &'a OwnerInfo,
}

impl<'a> From<&'a StatusEvent> for WireEvent<'a> {
    fn from(e: &'a StatusEvent) -> Self {
        Self {
            id: &e.id,
            appointment_id: &e.appointment_id,
            event_type: &e.event_type,
            status_value: &e.status_value,
            occurred_at: e.occurred_at,
            owner: &e.owner,
        }
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct StatusEventsResponse {
    #[serde(default)]
    pub results: Vec<EventOutcome>,
}

/// Remote verdict on one delivered event, matched back by
/// `(appointment_id, event_type)`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct EventOutcome {
    pub appointment_id: String,
    pub event_type: String,
    pub occurred_at: DateTime<Utc>,
    pub success: bool,
    #[serde(default)]
    pub status_code: Option<u16>,
    #[serde(default)]
    pub error_code: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

impl EventOutcome {
    pub fn key(&self) -> (String, String) {
        (self.appointment_id.clone(), self.event_type.clone())
    }
}
