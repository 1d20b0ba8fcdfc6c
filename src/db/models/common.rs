//! Enumerations and helpers shared across models.

use serde::{Deserialize, Serialize};

/// Account roles. Every role except `Delegate` is a staff role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    #[serde(alias = "participant")]
    Delegate,
    Admin,
    DelegateAffairs,
    CommitteeDirector,
    FrontDesk,
    Hospitality,
    ExecutiveBoard,
}

impl Role {
    pub fn is_staff(&self) -> bool {
        !matches!(self, Role::Delegate)
    }

    pub fn is_admin(&self) -> bool {
        matches!(self, Role::Admin)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Delegate => "delegate",
            Role::Admin => "admin",
            Role::DelegateAffairs => "delegate_affairs",
            Role::CommitteeDirector => "committee_director",
            Role::FrontDesk => "front_desk",
            Role::Hospitality => "hospitality",
            Role::ExecutiveBoard => "executive_board",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "delegate" | "participant" => Ok(Role::Delegate),
            "admin" => Ok(Role::Admin),
            "delegate_affairs" => Ok(Role::DelegateAffairs),
            "committee_director" => Ok(Role::CommitteeDirector),
            "front_desk" => Ok(Role::FrontDesk),
            "hospitality" => Ok(Role::Hospitality),
            "executive_board" => Ok(Role::ExecutiveBoard),
            _ => Err(format!("Unknown role: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RegistrationStatus {
    Pending,
    Confirmed,
    Waitlisted,
    Rejected,
    Cancelled,
}

impl RegistrationStatus {
    /// Whether staff may move a registration from `self` to `next`
    /// Rejected and cancelled registrations are closed
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Rejected | Self::Cancelled)
    }

    pub fn can_transition_to(&self, next: RegistrationStatus) -> bool {
        use RegistrationStatus::*;
        if *self == next {
            return true;
        }
        match self {
            Pending => matches!(next, Confirmed | Waitlisted | Rejected | Cancelled),
            Waitlisted => matches!(next, Confirmed | Rejected | Cancelled),
            Confirmed => matches!(next, Cancelled),
            Rejected | Cancelled => false,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Confirmed => "confirmed",
            Self::Waitlisted => "waitlisted",
            Self::Rejected => "rejected",
            Self::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for RegistrationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for RegistrationStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(Self::Pending),
            "confirmed" => Ok(Self::Confirmed),
            "waitlisted" => Ok(Self::Waitlisted),
            "rejected" => Ok(Self::Rejected),
            "cancelled" | "canceled" => Ok(Self::Cancelled),
            _ => Err(format!("Unknown registration status: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Pending,
    Paid,
    Confirmed,
    Refunded,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Paid => "paid",
            Self::Confirmed => "confirmed",
            Self::Refunded => "refunded",
        }
    }
}

impl std::fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for PaymentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(Self::Pending),
            "paid" => Ok(Self::Paid),
            "confirmed" => Ok(Self::Confirmed),
            "refunded" => Ok(Self::Refunded),
            _ => Err(format!("Unknown payment status: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContactStatus {
    Pending,
    Resolved,
}

impl ContactStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Resolved => "resolved",
        }
    }
}

impl std::str::FromStr for ContactStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(Self::Pending),
            "resolved" => Ok(Self::Resolved),
            _ => Err(format!("Unknown contact status: {}", s)),
        }
    }
}

/// Parse a JSON array column, treating NULL or malformed text as empty
pub fn parse_json_list<T: serde::de::DeserializeOwned>(json: Option<&str>) -> Vec<T> {
    json.and_then(|s| serde_json::from_str(s).ok())
        .unwrap_or_default()
}

/// Serialize a list for a JSON array column
pub fn serialize_json_list<T: Serialize>(items: &[T]) -> String {
    serde_json::to_string(items).unwrap_or_else(|_| "[]".to_string())
}

pub fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339()
}
