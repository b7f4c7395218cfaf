//! JSON shapes exchanged with the web client.
//!
//! Field names are part of the client contract and are serialized in
//! camelCase exactly as listed here.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{Decision, GroupId, RequestId, SourceType, UserId};

// ---------------------------------------------------------------------------
// Connections
// ---------------------------------------------------------------------------

/// A connected user as shown in the connections list.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct UserSummary {
    pub id: UserId,
    pub display_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub campus_domain: Option<String>,
}

/// A pending request, incoming or outgoing. `userId` is always the other
/// party: the sender for incoming requests, the recipient for outgoing ones.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RequestSummary {
    pub request_id: RequestId,
    pub user_id: UserId,
    pub display_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub campus_domain: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionsSummary {
    pub connections: Vec<UserSummary>,
    pub incoming_requests: Vec<RequestSummary>,
    pub outgoing_requests: Vec<RequestSummary>,
    /// Direct unread count per connected user.
    pub unread_counts: BTreeMap<UserId, u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendConnectionRequest {
    pub to_user_id: UserId,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionRequestCreated {
    pub request_id: RequestId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RespondToConnection {
    pub request_id: RequestId,
    pub decision: Decision,
}

// ---------------------------------------------------------------------------
// Blocking
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockUserRequest {
    pub user_id: UserId,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct BlockedUser {
    pub user_id: UserId,
    pub display_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
    pub blocked_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Notifications
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NotificationType {
    ConnectionRequest,
    NewMessage,
    NewGroupMessage,
}

impl NotificationType {
    /// Tie-break rank when two items share a timestamp; lower sorts first.
    pub fn priority(&self) -> u8 {
        match self {
            Self::ConnectionRequest => 0,
            Self::NewMessage => 1,
            Self::NewGroupMessage => 2,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct NotificationItem {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: NotificationType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<UserId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_id: Option<GroupId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_name: Option<String>,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    pub is_read: bool,
}

// ---------------------------------------------------------------------------
// Delivery transport
// ---------------------------------------------------------------------------

/// Reported by the message-delivery transport for every accepted inbound
/// message.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryReport {
    pub recipient_id: UserId,
    pub source_type: SourceType,
    pub source_id: u64,
}
