use serde::{Deserialize, Serialize};

/// Account role. Fixed at registration; there is no role-change operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UserRole {
    Elderly,
    Volunteer,
    Admin,
}

impl UserRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Elderly => "ELDERLY",
            Self::Volunteer => "VOLUNTEER",
            Self::Admin => "ADMIN",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "ELDERLY" => Some(Self::Elderly),
            "VOLUNTEER" => Some(Self::Volunteer),
            "ADMIN" => Some(Self::Admin),
            _ => None,
        }
    }
}

/// Lifecycle state of a help request.
///
/// `Open -> Cancelled`, or `Open -> Assigned -> Completed` via the
/// assignment flow. `Completed` and `Cancelled` are terminal: once a
/// request reaches either, its status never changes again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RequestStatus {
    Open,
    Assigned,
    Completed,
    Cancelled,
}

impl RequestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "OPEN",
            Self::Assigned => "ASSIGNED",
            Self::Completed => "COMPLETED",
            Self::Cancelled => "CANCELLED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "OPEN" => Some(Self::Open),
            "ASSIGNED" => Some(Self::Assigned),
            "COMPLETED" => Some(Self::Completed),
            "CANCELLED" => Some(Self::Cancelled),
            _ => None,
        }
    }

    /// Terminal states admit no further transition.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled)
    }
}
