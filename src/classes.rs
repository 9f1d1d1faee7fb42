use std::collections::HashMap;

use axum::extract::{Path, Query};
use axum::{Extension, Json};
use chrono::{DateTime, Utc};
use rand::{thread_rng, Rng};
use serde::{Deserialize, Serialize};
use sqlx::{PgPool, Postgres, Transaction};

use crate::auth::AuthUser;
use crate::config::Config;
use crate::models::{
    ActorKind, ClassRow, ClassStatus, ClassType, InstructorRow, ParticipantRow, Role, JOIN_MANUAL,
};
use crate::{breaks, proceeds, uploads, Error, Payload};

pub const DDS_DURATION: &str = "00:40";

pub async fn list_classes(
    auth: AuthUser,
    Query(filters): Query<ClassFilters>,
    Extension(pg): Extension<PgPool>,
    Extension(config): Extension<Config>,
) -> Payload<ClassList> {
    // the listing is a view over currently active sessions, not a history
    let instructor_scope = match auth.actor_kind() {
        ActorKind::Instructor => Some(auth.id),
        ActorKind::User => None,
    };
    let search = filters
        .search
        .as_deref()
        .filter(|s| !s.is_empty())
        .map(|s| format!("%{}%", s));
    let types = parse_list_param(filters.types.as_deref());
    let units = parse_list_param(filters.units.as_deref());

    let rows = sqlx::query_as::<_, ClassRow>(
        "SELECT * FROM classes \
         WHERE status = 'scheduled' AND date_end IS NULL \
           AND ($1::int IS NULL OR instructor_id = $1) \
           AND ($2::text IS NULL OR name ILIKE $2 OR code ILIKE $2) \
           AND ($3::text[] IS NULL OR type = ANY($3)) \
           AND ($4::text[] IS NULL OR unit = ANY($4)) \
         ORDER BY date_start DESC",
    )
    .bind(instructor_scope)
    .bind(search)
    .bind(types)
    .bind(units)
    .fetch_all(&pg)
    .await
    .map_err(Error::from)?;

    proceeds(ClassList {
        classes: class_views(&pg, &config, rows).await?,
    })
}

pub async fn get_class(
    _auth: AuthUser,
    Path(id): Path<i32>,
    Extension(pg): Extension<PgPool>,
    Extension(config): Extension<Config>,
) -> Payload<ClassView> {
    let row = fetch_class(&pg, id).await?;
    proceeds(class_view(&pg, &config, row).await?)
}

pub async fn create_class(
    auth: AuthUser,
    Json(body): Json<CreateClass>,
    Extension(pg): Extension<PgPool>,
    Extension(config): Extension<Config>,
) -> Payload<ClassView> {
    auth.require_role(&[Role::Admin, Role::Instructor])?;

    let class_type = match ClassType::from_name(&body.class_type) {
        Some(t) => t,
        None => return breaks(Error::validation("Invalid class type")),
    };
    let date_start = match body.date_start {
        Some(d) => d,
        None => return breaks(Error::validation("Start date is required")),
    };
    let unit = match body.unit.as_deref().filter(|u| !u.is_empty()) {
        Some(u) => u.to_string(),
        None => return breaks(Error::validation("Unit is required")),
    };
    let instructor_id = match body.instructor.as_ref().and_then(|i| i.id) {
        Some(id) => id,
        None => return breaks(Error::validation("Instructor is required")),
    };

    let instructor_exists =
        sqlx::query_scalar::<_, i32>("SELECT id FROM instructors WHERE id = $1")
            .bind(instructor_id)
            .fetch_optional(&pg)
            .await
            .map_err(Error::from)?;
    if instructor_exists.is_none() {
        return breaks(Error::not_found("Instructor not found"));
    }

    let fields = match class_type {
        ClassType::Portfolio => {
            let training = match body.training {
                Some(t) => t,
                None => {
                    return breaks(Error::validation(
                        "Training data is required for Portfolio classes",
                    ))
                }
            };
            resolve_training(&pg, training).await?
        }
        _ => {
            let name = match body.name.as_deref().filter(|n| !n.is_empty()) {
                Some(n) => n.to_string(),
                None => return breaks(Error::validation("Name is required")),
            };
            ClassFields {
                name,
                code: generate_code(class_type, Utc::now()),
                duration: default_duration(class_type, body.duration),
                provider: body.provider.unwrap_or_default(),
                content: body.content.unwrap_or_default(),
                classification: body.classification.unwrap_or_default(),
                objective: body.objective.unwrap_or_default(),
            }
        }
    };

    let row = sqlx::query_as::<_, ClassRow>(
        "INSERT INTO classes \
         (type, date_start, presents, status, unit, name, code, duration, provider, content, classification, objective, instructor_id) \
         VALUES ($1, $2, 0, 'scheduled', $3, $4, $5, $6, $7, $8, $9, $10, $11) \
         RETURNING *",
    )
    .bind(class_type.as_str())
    .bind(date_start)
    .bind(&unit)
    .bind(&fields.name)
    .bind(&fields.code)
    .bind(&fields.duration)
    .bind(&fields.provider)
    .bind(&fields.content)
    .bind(&fields.classification)
    .bind(&fields.objective)
    .bind(instructor_id)
    .fetch_one(&pg)
    .await
    .map_err(Error::from)?;

    proceeds(class_view(&pg, &config, row).await?)
}

pub async fn update_class(
    auth: AuthUser,
    Path(id): Path<i32>,
    Json(body): Json<UpdateClass>,
    Extension(pg): Extension<PgPool>,
    Extension(config): Extension<Config>,
) -> Payload<ClassView> {
    auth.require_role(&[Role::Admin])?;

    let class = fetch_class(&pg, id).await?;
    // cancelled classes stay editable; only completion freezes them
    if class.lifecycle() == ClassStatus::Completed {
        return breaks(Error::conflict("Cannot update a finished class"));
    }

    let row = sqlx::query_as::<_, ClassRow>(
        "UPDATE classes SET \
           name = COALESCE($2, name), \
           date_start = COALESCE($3, date_start), \
           unit = COALESCE($4, unit), \
           duration = COALESCE($5, duration), \
           provider = COALESCE($6, provider), \
           content = COALESCE($7, content), \
           classification = COALESCE($8, classification), \
           objective = COALESCE($9, objective), \
           instructor_id = COALESCE($10, instructor_id), \
           updated_at = NOW() \
         WHERE id = $1 \
         RETURNING *",
    )
    .bind(id)
    .bind(body.name)
    .bind(body.date_start)
    .bind(body.unit)
    .bind(body.duration)
    .bind(body.provider)
    .bind(body.content)
    .bind(body.classification)
    .bind(body.objective)
    .bind(body.instructor.and_then(|i| i.id))
    .fetch_one(&pg)
    .await
    .map_err(Error::from)?;

    proceeds(class_view(&pg, &config, row).await?)
}

pub async fn delete_class(
    auth: AuthUser,
    Path(id): Path<i32>,
    Extension(pg): Extension<PgPool>,
) -> Payload<Deleted> {
    auth.require_role(&[Role::Admin])?;

    let class = fetch_class(&pg, id).await?;
    if class.lifecycle() == ClassStatus::Completed {
        return breaks(Error::conflict("Cannot delete a finished class"));
    }

    sqlx::query("DELETE FROM classes WHERE id = $1")
        .bind(id)
        .execute(&pg)
        .await
        .map_err(Error::from)?;

    proceeds(Deleted { id })
}

pub async fn register_attendance(
    _auth: AuthUser,
    Path(id): Path<i32>,
    Json(body): Json<AttendeePayload>,
    Extension(pg): Extension<PgPool>,
    Extension(config): Extension<Config>,
) -> Payload<AttendeeView> {
    let class = fetch_class(&pg, id).await?;
    if class.lifecycle() != ClassStatus::Scheduled {
        return breaks(Error::conflict(
            "Cannot register attendance in a finished class",
        ));
    }

    let attendee = match body.validated() {
        Ok(attendee) => attendee,
        Err(err) => return breaks(err),
    };

    if participant_by_registration(&pg, id, &attendee.registration)
        .await?
        .is_some()
    {
        return breaks(Error::conflict("Participant already registered in this class"));
    }

    let photo = match &body.photo {
        Some(data) => Some(
            uploads::save_base64_image(
                &config,
                data,
                &format!("class_{}_{}", id, attendee.registration),
            )
            .await?,
        ),
        None => None,
    };

    match persist_attendee(&pg, id, &attendee, photo.as_deref(), JOIN_MANUAL).await {
        Ok(row) => proceeds(AttendeeView::from_row(row, &config)),
        Err(err) => {
            cleanup_photo(&config, photo.as_deref()).await;
            breaks(err)
        }
    }
}

pub async fn register_early_leave(
    _auth: AuthUser,
    Path((class_id, participant_id)): Path<(i32, i32)>,
    Extension(pg): Extension<PgPool>,
    Extension(config): Extension<Config>,
) -> Payload<ClassView> {
    let participant = sqlx::query_as::<_, ParticipantRow>(
        "SELECT * FROM class_participants WHERE class_id = $1 AND id = $2",
    )
    .bind(class_id)
    .bind(participant_id)
    .fetch_optional(&pg)
    .await
    .map_err(Error::from)?;

    let participant = match participant {
        Some(p) => p,
        None => return breaks(Error::not_found("Participant not found in this class")),
    };

    // once set the flag never clears; there is no un-leaving
    if participant.early_leave {
        return breaks(Error::conflict(
            "Early leave already registered for this participant",
        ));
    }

    sqlx::query(
        "UPDATE class_participants \
         SET early_leave = TRUE, early_leave_time = NOW(), updated_at = NOW() \
         WHERE id = $1 AND early_leave = FALSE",
    )
    .bind(participant.id)
    .execute(&pg)
    .await
    .map_err(Error::from)?;

    let row = fetch_class(&pg, class_id).await?;
    proceeds(class_view(&pg, &config, row).await?)
}

pub async fn remove_attendee(
    _auth: AuthUser,
    Path((class_id, participant_id)): Path<(i32, i32)>,
    Extension(pg): Extension<PgPool>,
    Extension(config): Extension<Config>,
) -> Payload<ClassView> {
    let class = fetch_class(&pg, class_id).await?;
    if class.lifecycle() == ClassStatus::Completed {
        return breaks(Error::conflict(
            "Cannot remove attendees from a finished class",
        ));
    }

    let participant = sqlx::query_as::<_, ParticipantRow>(
        "SELECT * FROM class_participants WHERE class_id = $1 AND id = $2",
    )
    .bind(class_id)
    .bind(participant_id)
    .fetch_optional(&pg)
    .await
    .map_err(Error::from)?;

    let participant = match participant {
        Some(p) => p,
        None => return breaks(Error::not_found("Participant not found in this class")),
    };

    if let Some(file) = &participant.photo {
        if let Err(err) = uploads::delete_file(&config, file).await {
            log::warn!("Failed to delete photo {} of removed attendee: {:?}", file, err);
        }
    }

    let mut tx = pg.begin().await.map_err(Error::from)?;
    sqlx::query("DELETE FROM class_participants WHERE id = $1")
        .bind(participant.id)
        .execute(&mut tx)
        .await
        .map_err(Error::from)?;
    recount_presents(&mut tx, class_id).await?;
    tx.commit().await.map_err(Error::from)?;

    let row = fetch_class(&pg, class_id).await?;
    proceeds(class_view(&pg, &config, row).await?)
}

pub async fn finish_class(
    auth: AuthUser,
    Path(id): Path<i32>,
    Extension(pg): Extension<PgPool>,
    Extension(config): Extension<Config>,
) -> Payload<ClassView> {
    auth.require_role(&[Role::Admin, Role::Instructor])?;

    let class = fetch_class(&pg, id).await?;
    match class.lifecycle() {
        ClassStatus::Completed => return breaks(Error::conflict("Class already finished")),
        ClassStatus::Cancelled => {
            return breaks(Error::conflict("Cannot finish a cancelled class"))
        }
        ClassStatus::Scheduled => {}
    }

    let row = sqlx::query_as::<_, ClassRow>(
        "UPDATE classes SET status = $2, date_end = NOW(), updated_at = NOW() \
         WHERE id = $1 AND status = 'scheduled' \
         RETURNING *",
    )
    .bind(id)
    .bind(ClassStatus::Completed.as_str())
    .fetch_optional(&pg)
    .await
    .map_err(Error::from)?;

    match row {
        Some(row) => proceeds(class_view(&pg, &config, row).await?),
        // lost the race against a concurrent finish
        None => breaks(Error::conflict("Class already finished")),
    }
}

pub async fn cancel_class(
    auth: AuthUser,
    Path(id): Path<i32>,
    Extension(pg): Extension<PgPool>,
    Extension(config): Extension<Config>,
) -> Payload<ClassView> {
    auth.require_role(&[Role::Admin, Role::Instructor])?;

    let class = fetch_class(&pg, id).await?;
    match class.lifecycle() {
        ClassStatus::Cancelled => return breaks(Error::conflict("Class already cancelled")),
        ClassStatus::Completed => {
            return breaks(Error::conflict("Cannot cancel a finished class"))
        }
        ClassStatus::Scheduled => {}
    }

    let row = sqlx::query_as::<_, ClassRow>(
        "UPDATE classes SET status = $2, updated_at = NOW() \
         WHERE id = $1 AND status = 'scheduled' \
         RETURNING *",
    )
    .bind(id)
    .bind(ClassStatus::Cancelled.as_str())
    .fetch_optional(&pg)
    .await
    .map_err(Error::from)?;

    match row {
        Some(row) => proceeds(class_view(&pg, &config, row).await?),
        None => breaks(Error::conflict("Class already cancelled")),
    }
}

pub(crate) async fn fetch_class(pg: &PgPool, id: i32) -> Result<ClassRow, Error> {
    sqlx::query_as::<_, ClassRow>("SELECT * FROM classes WHERE id = $1")
        .bind(id)
        .fetch_optional(pg)
        .await
        .map_err(Error::from)?
        .ok_or_else(|| Error::not_found("Class not found"))
}

pub(crate) async fn participant_by_registration(
    pg: &PgPool,
    class_id: i32,
    registration: &str,
) -> Result<Option<ParticipantRow>, Error> {
    sqlx::query_as::<_, ParticipantRow>(
        "SELECT * FROM class_participants WHERE class_id = $1 AND registration = $2",
    )
    .bind(class_id)
    .bind(registration)
    .fetch_optional(pg)
    .await
    .map_err(Error::from)
}

/// Inserts an attendance record and recomputes the denormalized presence
/// counter from the roster, all inside one transaction. Both the manual
/// and the invite paths go through here so the counter can never drift.
pub(crate) async fn persist_attendee(
    pg: &PgPool,
    class_id: i32,
    attendee: &NewAttendee,
    photo: Option<&str>,
    join_type: &str,
) -> Result<ParticipantRow, Error> {
    let mut tx = pg.begin().await.map_err(Error::from)?;
    let row = sqlx::query_as::<_, ParticipantRow>(
        "INSERT INTO class_participants (class_id, name, registration, unit, position, photo, type) \
         VALUES ($1, $2, $3, $4, $5, $6, $7) \
         RETURNING *",
    )
    .bind(class_id)
    .bind(&attendee.name)
    .bind(&attendee.registration)
    .bind(&attendee.unit)
    .bind(&attendee.position)
    .bind(photo)
    .bind(join_type)
    .fetch_one(&mut tx)
    .await
    .map_err(Error::from)?;
    recount_presents(&mut tx, class_id).await?;
    tx.commit().await.map_err(Error::from)?;
    Ok(row)
}

pub(crate) async fn recount_presents(
    tx: &mut Transaction<'_, Postgres>,
    class_id: i32,
) -> Result<i64, Error> {
    let count: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM class_participants WHERE class_id = $1")
            .bind(class_id)
            .fetch_one(&mut *tx)
            .await
            .map_err(Error::from)?;
    sqlx::query("UPDATE classes SET presents = $1, updated_at = NOW() WHERE id = $2")
        .bind(count as i32)
        .bind(class_id)
        .execute(&mut *tx)
        .await
        .map_err(Error::from)?;
    Ok(count)
}

pub(crate) async fn cleanup_photo(config: &Config, photo: Option<&str>) {
    if let Some(file) = photo {
        if let Err(err) = uploads::delete_file(config, file).await {
            log::warn!("Failed to remove photo {} after aborted registration: {:?}", file, err);
        }
    }
}

pub fn generate_code(class_type: ClassType, now: DateTime<Utc>) -> String {
    let random: u16 = thread_rng().gen_range(0..1000);
    format!(
        "{}{}{:03}",
        class_type.code_prefix(),
        now.format("%y%m%d"),
        random
    )
}

fn default_duration(class_type: ClassType, provided: Option<String>) -> String {
    if class_type == ClassType::Dds {
        DDS_DURATION.to_string()
    } else {
        provided.unwrap_or_default()
    }
}

async fn resolve_training(
    pg: &PgPool,
    training: TrainingRef,
) -> Result<ClassFields, Error> {
    if let Some(id) = training.id {
        let row = crate::trainings::fetch_training(pg, id).await?;
        return Ok(ClassFields {
            name: row.name,
            code: row.code,
            duration: row.duration,
            provider: row.provider,
            content: row.content,
            classification: row.classification,
            objective: row.objective,
        });
    }
    let name = training
        .name
        .filter(|n| !n.is_empty())
        .ok_or_else(|| Error::validation("Training data is required for Portfolio classes"))?;
    Ok(ClassFields {
        name,
        code: training.code.unwrap_or_default(),
        duration: training.duration.unwrap_or_default(),
        provider: training.provider.unwrap_or_default(),
        content: training.content.unwrap_or_default(),
        classification: training.classification.unwrap_or_default(),
        objective: training.objective.unwrap_or_default(),
    })
}

/// Accepts either a JSON-encoded array (what the web client sends) or a
/// plain comma-separated list; empty input means no filter.
pub(crate) fn parse_list_param(raw: Option<&str>) -> Option<Vec<String>> {
    let raw = raw?.trim();
    if raw.is_empty() {
        return None;
    }
    let values: Vec<String> = match serde_json::from_str::<Vec<Option<String>>>(raw) {
        Ok(parsed) => parsed.into_iter().flatten().collect(),
        Err(_) => raw
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect(),
    };
    if values.is_empty() {
        None
    } else {
        Some(values)
    }
}

async fn class_view(pg: &PgPool, config: &Config, row: ClassRow) -> Result<ClassView, Error> {
    Ok(class_views(pg, config, vec![row]).await?.remove(0))
}

async fn class_views(
    pg: &PgPool,
    config: &Config,
    rows: Vec<ClassRow>,
) -> Result<Vec<ClassView>, Error> {
    if rows.is_empty() {
        return Ok(Vec::new());
    }

    let class_ids: Vec<i32> = rows.iter().map(|c| c.id).collect();
    let mut instructor_ids: Vec<i32> = rows.iter().map(|c| c.instructor_id).collect();
    instructor_ids.sort_unstable();
    instructor_ids.dedup();

    let participants = sqlx::query_as::<_, ParticipantRow>(
        "SELECT * FROM class_participants WHERE class_id = ANY($1) ORDER BY timestamp",
    )
    .bind(&class_ids)
    .fetch_all(pg)
    .await
    .map_err(Error::from)?;

    let instructors =
        sqlx::query_as::<_, InstructorRow>("SELECT * FROM instructors WHERE id = ANY($1)")
            .bind(&instructor_ids)
            .fetch_all(pg)
            .await
            .map_err(Error::from)?;

    let mut rosters: HashMap<i32, Vec<AttendeeView>> = HashMap::new();
    for participant in participants {
        rosters
            .entry(participant.class_id)
            .or_default()
            .push(AttendeeView::from_row(participant, config));
    }
    let summaries: HashMap<i32, InstructorSummary> = instructors
        .into_iter()
        .map(|i| (i.id, InstructorSummary::from_row(&i)))
        .collect();

    Ok(rows
        .into_iter()
        .map(|row| {
            let attendees = rosters.remove(&row.id).unwrap_or_default();
            let instructor = summaries.get(&row.instructor_id).cloned();
            ClassView::assemble(row, instructor, attendees)
        })
        .collect())
}

#[derive(Debug, Clone, Deserialize)]
pub struct ClassFilters {
    pub search: Option<String>,
    pub types: Option<String>,
    pub units: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InstructorRef {
    pub id: Option<i32>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TrainingRef {
    pub id: Option<i32>,
    pub name: Option<String>,
    pub code: Option<String>,
    pub duration: Option<String>,
    pub provider: Option<String>,
    pub content: Option<String>,
    pub classification: Option<String>,
    pub objective: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateClass {
    #[serde(rename = "type")]
    pub class_type: String,
    pub name: Option<String>,
    pub date_start: Option<DateTime<Utc>>,
    pub unit: Option<String>,
    pub instructor: Option<InstructorRef>,
    pub training: Option<TrainingRef>,
    pub duration: Option<String>,
    pub provider: Option<String>,
    pub content: Option<String>,
    pub classification: Option<String>,
    pub objective: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpdateClass {
    pub name: Option<String>,
    pub date_start: Option<DateTime<Utc>>,
    pub unit: Option<String>,
    pub duration: Option<String>,
    pub provider: Option<String>,
    pub content: Option<String>,
    pub classification: Option<String>,
    pub objective: Option<String>,
    pub instructor: Option<InstructorRef>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AttendeePayload {
    pub name: Option<String>,
    pub registration: Option<String>,
    pub unit: Option<String>,
    pub position: Option<String>,
    pub photo: Option<String>,
}

impl AttendeePayload {
    pub fn validated(&self) -> Result<NewAttendee, Error> {
        let name = self
            .name
            .as_deref()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| Error::validation("Attendee name is required"))?;
        let registration = self
            .registration
            .as_deref()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| Error::validation("Attendee registration is required"))?;
        let unit = self
            .unit
            .as_deref()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| Error::validation("Attendee unit is required"))?;
        Ok(NewAttendee {
            name: name.to_string(),
            registration: registration.to_string(),
            unit: unit.to_string(),
            position: self.position.clone().unwrap_or_default(),
        })
    }
}

#[derive(Debug, Clone)]
pub struct NewAttendee {
    pub name: String,
    pub registration: String,
    pub unit: String,
    pub position: String,
}

struct ClassFields {
    name: String,
    code: String,
    duration: String,
    provider: String,
    content: String,
    classification: String,
    objective: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct Deleted {
    pub id: i32,
}

#[derive(Debug, Clone, Serialize)]
pub struct ClassList {
    pub classes: Vec<ClassView>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ClassView {
    pub id: i32,
    #[serde(rename = "type")]
    pub class_type: String,
    pub date_start: DateTime<Utc>,
    pub date_end: Option<DateTime<Utc>>,
    pub presents: i32,
    pub status: String,
    pub unit: String,
    pub training: TrainingInfo,
    pub instructor: Option<InstructorSummary>,
    pub attendees: Vec<AttendeeView>,
}

impl ClassView {
    fn assemble(
        row: ClassRow,
        instructor: Option<InstructorSummary>,
        attendees: Vec<AttendeeView>,
    ) -> Self {
        Self {
            id: row.id,
            class_type: row.class_type,
            date_start: row.date_start,
            date_end: row.date_end,
            presents: row.presents,
            status: row.status,
            unit: row.unit,
            training: TrainingInfo {
                name: row.name,
                code: row.code,
                duration: row.duration,
                provider: row.provider,
                content: row.content,
                classification: row.classification,
                objective: row.objective,
            },
            instructor,
            attendees,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TrainingInfo {
    pub name: String,
    pub code: Option<String>,
    pub duration: Option<String>,
    pub provider: Option<String>,
    pub content: Option<String>,
    pub classification: Option<String>,
    pub objective: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct InstructorSummary {
    pub id: i32,
    pub name: String,
    pub registration: String,
    pub unit: String,
    pub position: String,
}

impl InstructorSummary {
    pub fn from_row(row: &InstructorRow) -> Self {
        Self {
            id: row.id,
            name: row.name.clone(),
            registration: row.registration.clone(),
            unit: row.unit.clone(),
            position: row.position.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AttendeeView {
    pub id: i32,
    pub name: String,
    pub registration: String,
    pub unit: String,
    pub position: String,
    pub photo: Option<String>,
    #[serde(rename = "type")]
    pub join_type: String,
    pub timestamp: DateTime<Utc>,
    pub early_leave: bool,
    pub early_leave_time: Option<DateTime<Utc>>,
}

impl AttendeeView {
    pub fn from_row(row: ParticipantRow, config: &Config) -> Self {
        Self {
            id: row.id,
            name: row.name,
            registration: row.registration,
            unit: row.unit,
            position: row.position,
            photo: row.photo.as_deref().map(|f| uploads::public_url(config, f)),
            join_type: row.join_type,
            timestamp: row.timestamp,
            early_leave: row.early_leave,
            early_leave_time: row.early_leave_time,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn code_carries_type_prefix_and_date() {
        let now = Utc::now();
        let date_part = now.format("%y%m%d").to_string();

        let code = generate_code(ClassType::Dds, now);
        assert!(code.starts_with(&format!("DDS{}", date_part)));
        assert_eq!(code.len(), 3 + 6 + 3);

        let code = generate_code(ClassType::External, now);
        assert!(code.starts_with(&format!("EXT{}", date_part)));

        let code = generate_code(ClassType::Others, now);
        assert!(code.starts_with(&format!("OUT{}", date_part)));

        let code = generate_code(ClassType::Portfolio, now);
        assert!(code.starts_with(&date_part));
        assert_eq!(code.len(), 6 + 3);
        assert!(code[6..].chars().all(|c| c.is_ascii_digit()));
    }

    #[test]
    fn dds_duration_is_fixed() {
        assert_eq!(
            default_duration(ClassType::Dds, Some("02:00".to_string())),
            DDS_DURATION
        );
        assert_eq!(
            default_duration(ClassType::External, Some("02:00".to_string())),
            "02:00"
        );
        assert_eq!(default_duration(ClassType::Others, None), "");
    }

    #[test]
    fn list_param_accepts_json_and_csv() {
        assert_eq!(
            parse_list_param(Some("[\"DDS\",\"External\"]")),
            Some(vec!["DDS".to_string(), "External".to_string()])
        );
        assert_eq!(
            parse_list_param(Some("[null,\"DDS\",null]")),
            Some(vec!["DDS".to_string()])
        );
        assert_eq!(
            parse_list_param(Some("Plant A, Plant B")),
            Some(vec!["Plant A".to_string(), "Plant B".to_string()])
        );
        assert_eq!(parse_list_param(Some("")), None);
        assert_eq!(parse_list_param(Some("[null]")), None);
        assert_eq!(parse_list_param(None), None);
    }

    #[test]
    fn attendee_payload_requires_identity_fields() {
        let payload = AttendeePayload {
            name: Some("Alice".to_string()),
            registration: Some("R1".to_string()),
            unit: Some("U1".to_string()),
            position: None,
            photo: None,
        };
        let attendee = payload.validated().unwrap();
        assert_eq!(attendee.position, "");

        let missing = AttendeePayload {
            registration: None,
            ..payload
        };
        assert!(missing.validated().is_err());
    }
}
