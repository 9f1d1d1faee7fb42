use axum::extract::{Path, Query};
use axum::{Extension, Json};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;

use crate::auth::AuthUser;
use crate::models::{Role, TrainingRow};
use crate::{breaks, proceeds, Error, Payload};

pub async fn list_trainings(
    _auth: AuthUser,
    Query(filters): Query<TrainingFilters>,
    Extension(pg): Extension<PgPool>,
) -> Payload<TrainingList> {
    let search = filters
        .search
        .as_deref()
        .filter(|s| !s.is_empty())
        .map(|s| format!("%{}%", s));

    let rows = sqlx::query_as::<_, TrainingRow>(
        "SELECT * FROM trainings \
         WHERE ($1::text IS NULL OR name ILIKE $1 OR code ILIKE $1) \
         ORDER BY name",
    )
    .bind(search)
    .fetch_all(&pg)
    .await
    .map_err(Error::from)?;

    proceeds(TrainingList {
        trainings: rows.into_iter().map(TrainingView::from_row).collect(),
    })
}

pub async fn get_training(
    _auth: AuthUser,
    Path(id): Path<i32>,
    Extension(pg): Extension<PgPool>,
) -> Payload<TrainingView> {
    let row = fetch_training(&pg, id).await?;
    proceeds(TrainingView::from_row(row))
}

pub async fn create_training(
    auth: AuthUser,
    Json(body): Json<TrainingPayload>,
    Extension(pg): Extension<PgPool>,
) -> Payload<TrainingView> {
    auth.require_role(&[Role::Admin])?;

    let data = match body.validated() {
        Ok(data) => data,
        Err(err) => return breaks(err),
    };

    let code_taken: Option<i32> = sqlx::query_scalar("SELECT 1 FROM trainings WHERE code = $1")
        .bind(&data.code)
        .fetch_optional(&pg)
        .await
        .map_err(Error::from)?;
    if code_taken.is_some() {
        return breaks(Error::conflict("A training with this code already exists"));
    }

    let row = sqlx::query_as::<_, TrainingRow>(
        "INSERT INTO trainings (name, code, duration, provider, classification, content, objective) \
         VALUES ($1, $2, $3, $4, $5, $6, $7) \
         RETURNING *",
    )
    .bind(&data.name)
    .bind(&data.code)
    .bind(&data.duration)
    .bind(&data.provider)
    .bind(&data.classification)
    .bind(&data.content)
    .bind(&data.objective)
    .fetch_one(&pg)
    .await
    .map_err(Error::from)?;

    proceeds(TrainingView::from_row(row))
}

pub async fn update_training(
    auth: AuthUser,
    Path(id): Path<i32>,
    Json(body): Json<UpdateTraining>,
    Extension(pg): Extension<PgPool>,
) -> Payload<TrainingView> {
    auth.require_role(&[Role::Admin])?;

    fetch_training(&pg, id).await?;

    if let Some(duration) = body.duration.as_deref() {
        if !is_valid_duration(duration) {
            return breaks(Error::validation("Invalid duration format. Use HH:MM"));
        }
    }

    let row = sqlx::query_as::<_, TrainingRow>(
        "UPDATE trainings SET \
           name = COALESCE($2, name), \
           duration = COALESCE($3, duration), \
           provider = COALESCE($4, provider), \
           classification = COALESCE($5, classification), \
           content = COALESCE($6, content), \
           objective = COALESCE($7, objective), \
           updated_at = NOW() \
         WHERE id = $1 \
         RETURNING *",
    )
    .bind(id)
    .bind(&body.name)
    .bind(&body.duration)
    .bind(&body.provider)
    .bind(&body.classification)
    .bind(&body.content)
    .bind(&body.objective)
    .fetch_one(&pg)
    .await
    .map_err(Error::from)?;

    proceeds(TrainingView::from_row(row))
}

pub async fn delete_training(
    auth: AuthUser,
    Path(id): Path<i32>,
    Extension(pg): Extension<PgPool>,
) -> Payload<Deleted> {
    auth.require_role(&[Role::Admin])?;

    fetch_training(&pg, id).await?;
    sqlx::query("DELETE FROM trainings WHERE id = $1")
        .bind(id)
        .execute(&pg)
        .await
        .map_err(Error::from)?;

    proceeds(Deleted { id })
}

pub(crate) async fn fetch_training(pg: &PgPool, id: i32) -> Result<TrainingRow, Error> {
    sqlx::query_as::<_, TrainingRow>("SELECT * FROM trainings WHERE id = $1")
        .bind(id)
        .fetch_optional(pg)
        .await
        .map_err(Error::from)?
        .ok_or_else(|| Error::not_found("Training not found"))
}

fn is_valid_duration(duration: &str) -> bool {
    let bytes = duration.as_bytes();
    bytes.len() == 5
        && bytes[0].is_ascii_digit()
        && bytes[1].is_ascii_digit()
        && bytes[2] == b':'
        && bytes[3].is_ascii_digit()
        && bytes[4].is_ascii_digit()
}

#[derive(Debug, Clone, Deserialize)]
pub struct TrainingFilters {
    pub search: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TrainingPayload {
    pub name: Option<String>,
    pub code: Option<String>,
    pub duration: Option<String>,
    pub provider: Option<String>,
    pub classification: Option<String>,
    pub content: Option<String>,
    pub objective: Option<String>,
}

impl TrainingPayload {
    pub fn validated(&self) -> Result<NewTraining, Error> {
        let field = |value: &Option<String>, message: &str| -> Result<String, Error> {
            value
                .as_deref()
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .ok_or_else(|| Error::validation(message))
        };
        let duration = field(&self.duration, "Duration is required")?;
        if !is_valid_duration(&duration) {
            return Err(Error::validation("Invalid duration format. Use HH:MM"));
        }
        Ok(NewTraining {
            name: field(&self.name, "Name is required")?,
            code: field(&self.code, "Code is required")?,
            duration,
            provider: field(&self.provider, "Provider is required")?,
            classification: field(&self.classification, "Classification is required")?,
            content: field(&self.content, "Content is required")?,
            objective: field(&self.objective, "Objective is required")?,
        })
    }
}

#[derive(Debug, Clone)]
pub struct NewTraining {
    pub name: String,
    pub code: String,
    pub duration: String,
    pub provider: String,
    pub classification: String,
    pub content: String,
    pub objective: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpdateTraining {
    pub name: Option<String>,
    pub duration: Option<String>,
    pub provider: Option<String>,
    pub classification: Option<String>,
    pub content: Option<String>,
    pub objective: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Deleted {
    pub id: i32,
}

#[derive(Debug, Clone, Serialize)]
pub struct TrainingList {
    pub trainings: Vec<TrainingView>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TrainingView {
    pub id: i32,
    pub name: String,
    pub code: String,
    pub duration: String,
    pub provider: String,
    pub classification: String,
    pub content: String,
    pub objective: String,
    pub created_at: DateTime<Utc>,
}

impl TrainingView {
    fn from_row(row: TrainingRow) -> Self {
        Self {
            id: row.id,
            name: row.name,
            code: row.code,
            duration: row.duration,
            provider: row.provider,
            classification: row.classification,
            content: row.content,
            objective: row.objective,
            created_at: row.created_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duration_must_be_hh_mm() {
        assert!(is_valid_duration("01:30"));
        assert!(is_valid_duration("00:40"));
        assert!(!is_valid_duration("1:30"));
        assert!(!is_valid_duration("01-30"));
        assert!(!is_valid_duration("01:3a"));
        assert!(!is_valid_duration(""));
    }

    #[test]
    fn payload_rejects_bad_duration() {
        let payload = TrainingPayload {
            name: Some("Safety 101".to_string()),
            code: Some("T1".to_string()),
            duration: Some("90min".to_string()),
            provider: Some("Internal".to_string()),
            classification: Some("Mandatory".to_string()),
            content: Some("Basics".to_string()),
            objective: Some("Stay safe".to_string()),
        };
        assert!(payload.validated().is_err());

        let ok = TrainingPayload {
            duration: Some("01:00".to_string()),
            ..payload
        };
        assert!(ok.validated().is_ok());
    }
}
