use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::types::Json;

pub const ADMIN_ROLE: &str = "ADMIN_ROLE";
pub const INSTRUCTOR_ROLE: &str = "INSTRUCTOR_ROLE";

/// Principal roles. The database stores these as a JSON array on the
/// `users` table; instructors have no role column and are always
/// [`Role::Instructor`] by entity kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    #[serde(rename = "ADMIN_ROLE")]
    Admin,
    #[serde(rename = "INSTRUCTOR_ROLE")]
    Instructor,
}

impl Role {
    pub fn from_name(name: &str) -> Option<Role> {
        match name {
            ADMIN_ROLE => Some(Role::Admin),
            INSTRUCTOR_ROLE => Some(Role::Instructor),
            _ => None,
        }
    }

    /// Normalizes the loosely-typed roles column into a proper set, once,
    /// at the deserialization boundary. Accepts a JSON array of names, a
    /// JSON-encoded string of such an array, or a bare role name; anything
    /// unrecognized is dropped.
    pub fn normalize(value: &Value) -> Vec<Role> {
        let mut roles = Vec::new();
        match value {
            Value::Array(items) => {
                for item in items {
                    if let Value::String(name) = item {
                        push_role(&mut roles, name);
                    }
                }
            }
            Value::String(raw) => {
                if let Ok(parsed) = serde_json::from_str::<Value>(raw) {
                    if !matches!(parsed, Value::String(_)) {
                        return Role::normalize(&parsed);
                    }
                }
                push_role(&mut roles, raw);
            }
            _ => {}
        }
        roles
    }
}

fn push_role(roles: &mut Vec<Role>, name: &str) {
    if let Some(role) = Role::from_name(name) {
        if !roles.contains(&role) {
            roles.push(role);
        }
    }
}

/// Polymorphic ticket/message ownership discriminant, stored as two
/// columns (`creator_type`/`sender_type` + id) and resolved with an
/// explicit table dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActorKind {
    User,
    Instructor,
}

impl ActorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActorKind::User => "user",
            ActorKind::Instructor => "instructor",
        }
    }

    pub fn from_name(name: &str) -> Option<ActorKind> {
        match name {
            "user" => Some(ActorKind::User),
            "instructor" => Some(ActorKind::Instructor),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClassType {
    Portfolio,
    External,
    #[serde(rename = "DDS")]
    Dds,
    Others,
}

impl ClassType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClassType::Portfolio => "Portfolio",
            ClassType::External => "External",
            ClassType::Dds => "DDS",
            ClassType::Others => "Others",
        }
    }

    pub fn from_name(name: &str) -> Option<ClassType> {
        match name {
            "Portfolio" => Some(ClassType::Portfolio),
            "External" => Some(ClassType::External),
            "DDS" => Some(ClassType::Dds),
            "Others" => Some(ClassType::Others),
            _ => None,
        }
    }

    pub fn code_prefix(&self) -> &'static str {
        match self {
            ClassType::Dds => "DDS",
            ClassType::External => "EXT",
            ClassType::Others => "OUT",
            ClassType::Portfolio => "",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClassStatus {
    Scheduled,
    Completed,
    Cancelled,
}

impl ClassStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClassStatus::Scheduled => "scheduled",
            ClassStatus::Completed => "completed",
            ClassStatus::Cancelled => "cancelled",
        }
    }

    pub fn from_name(name: &str) -> Option<ClassStatus> {
        match name {
            "scheduled" => Some(ClassStatus::Scheduled),
            "completed" => Some(ClassStatus::Completed),
            "cancelled" => Some(ClassStatus::Cancelled),
            _ => None,
        }
    }
}

pub const TICKET_STATUSES: [&str; 3] = ["open", "in-progress", "closed"];
pub const TICKET_PRIORITIES: [&str; 3] = ["low", "medium", "high"];
pub const TICKET_CATEGORIES: [&str; 4] = ["technical", "doubt", "error", "suggestion"];

/// Join kind for attendance records: registered by the instructor at the
/// session, or self-registered through an invite link.
pub const JOIN_MANUAL: &str = "Manual";
pub const JOIN_INVITE: &str = "Convite";

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct UserRow {
    pub id: i32,
    pub name: String,
    pub email: String,
    pub password: String,
    pub roles: Json<Value>,
    pub position: String,
    pub unit: String,
    pub registration: String,
    pub avatar: Option<String>,
    pub is_active: bool,
    pub terms: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl UserRow {
    /// The normalized role set; an empty or unreadable column falls back
    /// to the admin default the schema also declares.
    pub fn role_set(&self) -> Vec<Role> {
        let roles = Role::normalize(&self.roles.0);
        if roles.is_empty() {
            vec![Role::Admin]
        } else {
            roles
        }
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct InstructorRow {
    pub id: i32,
    pub name: String,
    pub email: String,
    pub registration: String,
    pub unit: String,
    pub position: String,
    pub password: String,
    pub is_active: bool,
    pub terms: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct TrainingRow {
    pub id: i32,
    pub name: String,
    pub code: String,
    pub duration: String,
    pub provider: String,
    pub classification: String,
    pub content: String,
    pub objective: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ClassRow {
    pub id: i32,
    #[sqlx(rename = "type")]
    pub class_type: String,
    pub date_start: DateTime<Utc>,
    pub date_end: Option<DateTime<Utc>>,
    pub presents: i32,
    pub status: String,
    pub unit: String,
    pub name: String,
    pub code: Option<String>,
    pub duration: Option<String>,
    pub provider: Option<String>,
    pub content: Option<String>,
    pub classification: Option<String>,
    pub objective: Option<String>,
    pub instructor_id: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ClassRow {
    pub fn lifecycle(&self) -> ClassStatus {
        ClassStatus::from_name(&self.status).unwrap_or(ClassStatus::Scheduled)
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ParticipantRow {
    pub id: i32,
    pub class_id: i32,
    pub name: String,
    pub registration: String,
    pub unit: String,
    pub position: String,
    pub photo: Option<String>,
    #[sqlx(rename = "type")]
    pub join_type: String,
    pub timestamp: DateTime<Utc>,
    pub early_leave: bool,
    pub early_leave_time: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct InviteRow {
    pub id: i32,
    pub class_id: i32,
    pub token: String,
    pub expires_at: DateTime<Utc>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl InviteRow {
    pub fn is_usable(&self, now: DateTime<Utc>) -> bool {
        self.is_active && self.expires_at > now
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct TicketRow {
    pub id: i32,
    pub title: String,
    pub description: String,
    pub status: String,
    pub priority: String,
    pub category: String,
    pub creator_id: i32,
    pub creator_type: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Attachment {
    pub name: String,
    pub url: String,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct TicketMessageRow {
    pub id: i32,
    pub ticket_id: i32,
    pub message: String,
    pub sender_id: i32,
    pub sender_type: String,
    pub is_support: bool,
    pub attachments: Json<Vec<Attachment>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn normalize_accepts_json_array() {
        let roles = Role::normalize(&json!(["ADMIN_ROLE", "INSTRUCTOR_ROLE"]));
        assert_eq!(roles, vec![Role::Admin, Role::Instructor]);
    }

    #[test]
    fn normalize_accepts_encoded_string() {
        let roles = Role::normalize(&json!("[\"INSTRUCTOR_ROLE\"]"));
        assert_eq!(roles, vec![Role::Instructor]);
    }

    #[test]
    fn normalize_accepts_bare_name() {
        let roles = Role::normalize(&json!("ADMIN_ROLE"));
        assert_eq!(roles, vec![Role::Admin]);
    }

    #[test]
    fn normalize_drops_unknown_and_duplicates() {
        let roles = Role::normalize(&json!(["ADMIN_ROLE", "GHOST_ROLE", "ADMIN_ROLE", null]));
        assert_eq!(roles, vec![Role::Admin]);
    }

    #[test]
    fn empty_roles_column_defaults_to_admin() {
        assert!(Role::normalize(&json!([])).is_empty());
        assert!(Role::normalize(&json!(null)).is_empty());
    }

    #[test]
    fn class_type_prefixes() {
        assert_eq!(ClassType::Dds.code_prefix(), "DDS");
        assert_eq!(ClassType::External.code_prefix(), "EXT");
        assert_eq!(ClassType::Others.code_prefix(), "OUT");
        assert_eq!(ClassType::Portfolio.code_prefix(), "");
    }

    #[test]
    fn class_status_round_trips() {
        for status in [
            ClassStatus::Scheduled,
            ClassStatus::Completed,
            ClassStatus::Cancelled,
        ] {
            assert_eq!(ClassStatus::from_name(status.as_str()), Some(status));
        }
        assert_eq!(ClassStatus::from_name("archived"), None);
    }

    #[test]
    fn invite_usability_window() {
        let now = Utc::now();
        let live = InviteRow {
            id: 1,
            class_id: 1,
            token: "t".to_string(),
            expires_at: now + chrono::Duration::minutes(5),
            is_active: true,
            created_at: now,
            updated_at: now,
        };
        assert!(live.is_usable(now));

        let expired = InviteRow {
            expires_at: now - chrono::Duration::seconds(1),
            ..live.clone()
        };
        assert!(!expired.is_usable(now));

        let revoked = InviteRow {
            is_active: false,
            ..live
        };
        assert!(!revoked.is_usable(now));
    }
}
