use axum::extract::Path;
use axum::{Extension, Json};
use chrono::{DateTime, Duration, Utc};
use rand::{thread_rng, Rng};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use sqlx::PgPool;

use crate::auth::AuthUser;
use crate::classes::{
    cleanup_photo, fetch_class, participant_by_registration, persist_attendee, AttendeePayload,
    AttendeeView,
};
use crate::config::Config;
use crate::models::{ClassStatus, InviteRow, ParticipantRow, Role, JOIN_INVITE};
use crate::{breaks, proceeds, uploads, Error, Payload};

pub const DEFAULT_EXPIRY_MINUTES: i64 = 60;

const CLASS_GONE: &str = "Class not found or already finished";
const TOKEN_BAD: &str = "Invite link invalid or expired";

pub async fn generate_invite(
    auth: AuthUser,
    Path(class_id): Path<i32>,
    body: Option<Json<GenerateInvite>>,
    Extension(pg): Extension<PgPool>,
) -> Payload<InviteCreated> {
    auth.require_role(&[Role::Admin, Role::Instructor])?;

    // only existence is checked here; liveness is enforced at join time
    fetch_class(&pg, class_id).await?;

    let minutes = body
        .and_then(|Json(b)| b.expires_in_minutes)
        .unwrap_or(DEFAULT_EXPIRY_MINUTES);
    if minutes <= 0 {
        return breaks(Error::validation("Expiry must be a positive number of minutes"));
    }

    let token = generate_invite_token();
    let expires_at = Utc::now() + Duration::minutes(minutes);

    sqlx::query(
        "INSERT INTO class_invites (class_id, token, expires_at, is_active) \
         VALUES ($1, $2, $3, TRUE)",
    )
    .bind(class_id)
    .bind(&token)
    .bind(expires_at)
    .execute(&pg)
    .await
    .map_err(Error::from)?;

    proceeds(InviteCreated {
        url: format!("/api/classes/{}/invite/{}", class_id, token),
        token,
        expires_at,
    })
}

pub async fn validate_invite(
    Path((class_id, token)): Path<(i32, String)>,
    Extension(pg): Extension<PgPool>,
) -> Payload<InviteValidation> {
    proceeds(check_invite(&pg, class_id, &token).await?)
}

pub async fn join_by_invite(
    Path((class_id, token)): Path<(i32, String)>,
    Json(body): Json<AttendeePayload>,
    Extension(pg): Extension<PgPool>,
    Extension(config): Extension<Config>,
) -> Payload<AttendeeView> {
    let validation = check_invite(&pg, class_id, &token).await?;
    if !validation.valid {
        let message = validation.message.unwrap_or_else(|| TOKEN_BAD.to_string());
        return breaks(Error::conflict(message));
    }

    let mut attendee = match body.validated() {
        Ok(attendee) => attendee,
        Err(err) => return breaks(err),
    };
    if attendee.position.is_empty() {
        attendee.position = "Not informed".to_string();
    }

    if participant_by_registration(&pg, class_id, &attendee.registration)
        .await?
        .is_some()
    {
        return breaks(Error::conflict("You are already registered for this class"));
    }

    let photo = match &body.photo {
        Some(data) => Some(
            uploads::save_base64_image(
                &config,
                data,
                &format!("class_{}_{}", class_id, attendee.registration),
            )
            .await?,
        ),
        None => None,
    };

    match persist_attendee(&pg, class_id, &attendee, photo.as_deref(), JOIN_INVITE).await {
        Ok(row) => proceeds(AttendeeView::from_row(row, &config)),
        Err(err) => {
            cleanup_photo(&config, photo.as_deref()).await;
            breaks(err)
        }
    }
}

pub async fn check_participant(
    Path((class_id, registration)): Path<(i32, String)>,
    Extension(pg): Extension<PgPool>,
) -> Payload<ParticipantCheck> {
    fetch_class(&pg, class_id).await?;

    let participant = participant_by_registration(&pg, class_id, &registration).await?;
    proceeds(ParticipantCheck {
        is_registered: participant.is_some(),
        participant: participant.map(ParticipantSummary::from_row),
    })
}

async fn check_invite(
    pg: &PgPool,
    class_id: i32,
    token: &str,
) -> Result<InviteValidation, Error> {
    let class = fetch_class(pg, class_id).await;
    let class = match class {
        Ok(class) if class.lifecycle() == ClassStatus::Scheduled => class,
        Ok(_) => return Ok(InviteValidation::rejected(CLASS_GONE)),
        Err(Error::NotFound { .. }) => return Ok(InviteValidation::rejected(CLASS_GONE)),
        Err(err) => return Err(err),
    };

    let invite =
        sqlx::query_as::<_, InviteRow>("SELECT * FROM class_invites WHERE class_id = $1 AND token = $2")
            .bind(class_id)
            .bind(token)
            .fetch_optional(pg)
            .await
            .map_err(Error::from)?;

    // expiry is evaluated here, at validation time; stale rows are never swept
    match invite {
        Some(invite) if invite.is_usable(Utc::now()) => {}
        _ => return Ok(InviteValidation::rejected(TOKEN_BAD)),
    }

    let instructor = sqlx::query_as::<_, (i32, String)>(
        "SELECT id, name FROM instructors WHERE id = $1",
    )
    .bind(class.instructor_id)
    .fetch_optional(pg)
    .await
    .map_err(Error::from)?;

    Ok(InviteValidation {
        valid: true,
        message: None,
        class: Some(InviteClassInfo {
            id: class.id,
            name: class.name,
            unit: class.unit,
            date_start: class.date_start,
            instructor: instructor.map(|(id, name)| InstructorBrief { id, name }),
        }),
    })
}

/// Opaque single-class join token: 32 random bytes digested and
/// hex-encoded, 64 characters on the wire.
pub fn generate_invite_token() -> String {
    let token_bytes: [u8; 32] = thread_rng().gen();
    let mut hasher: Sha256 = Digest::new();
    hasher.update(token_bytes);
    hex::encode(hasher.finalize())
}

#[derive(Debug, Clone, Deserialize)]
pub struct GenerateInvite {
    #[serde(alias = "expiresInMinutes")]
    pub expires_in_minutes: Option<i64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct InviteCreated {
    pub token: String,
    pub url: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct InviteValidation {
    pub valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub class: Option<InviteClassInfo>,
}

impl InviteValidation {
    fn rejected(message: &str) -> Self {
        Self {
            valid: false,
            message: Some(message.to_string()),
            class: None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct InviteClassInfo {
    pub id: i32,
    pub name: String,
    pub unit: String,
    pub date_start: DateTime<Utc>,
    pub instructor: Option<InstructorBrief>,
}

#[derive(Debug, Clone, Serialize)]
pub struct InstructorBrief {
    pub id: i32,
    pub name: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ParticipantCheck {
    pub is_registered: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub participant: Option<ParticipantSummary>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ParticipantSummary {
    pub id: i32,
    pub name: String,
    pub registration: String,
    pub unit: String,
    pub position: String,
    #[serde(rename = "type")]
    pub join_type: String,
    pub timestamp: DateTime<Utc>,
}

impl ParticipantSummary {
    fn from_row(row: ParticipantRow) -> Self {
        Self {
            id: row.id,
            name: row.name,
            registration: row.registration,
            unit: row.unit,
            position: row.position,
            join_type: row.join_type,
            timestamp: row.timestamp,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_is_64_hex_chars() {
        let token = generate_invite_token();
        assert_eq!(token.len(), 64);
        assert!(token.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn tokens_are_unique() {
        assert_ne!(generate_invite_token(), generate_invite_token());
    }

    #[test]
    fn rejection_carries_reason() {
        let rejected = InviteValidation::rejected(TOKEN_BAD);
        assert!(!rejected.valid);
        assert_eq!(rejected.message.as_deref(), Some(TOKEN_BAD));
        assert!(rejected.class.is_none());
    }
}
