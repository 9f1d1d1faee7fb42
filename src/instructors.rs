use axum::extract::{Path, Query};
use axum::{Extension, Json};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::types::Json as SqlJson;
use sqlx::PgPool;

use crate::auth::{hash_password, AuthUser};
use crate::classes::parse_list_param;
use crate::models::{InstructorRow, Role};
use crate::{breaks, proceeds, Error, Payload};

pub async fn list_instructors(
    auth: AuthUser,
    Query(filters): Query<InstructorFilters>,
    Extension(pg): Extension<PgPool>,
) -> Payload<InstructorList> {
    auth.require_role(&[Role::Admin])?;

    let search = filters
        .search
        .as_deref()
        .filter(|s| !s.is_empty())
        .map(|s| format!("%{}%", s));
    let units = parse_list_param(filters.units.as_deref());
    let positions = parse_list_param(filters.positions.as_deref());

    let rows = sqlx::query_as::<_, InstructorRow>(
        "SELECT * FROM instructors \
         WHERE ($1::text IS NULL OR name ILIKE $1 OR registration ILIKE $1) \
           AND ($2::text[] IS NULL OR unit = ANY($2)) \
           AND ($3::text[] IS NULL OR position = ANY($3)) \
         ORDER BY name",
    )
    .bind(search)
    .bind(units)
    .bind(positions)
    .fetch_all(&pg)
    .await
    .map_err(Error::from)?;

    proceeds(InstructorList {
        instructors: rows.iter().map(InstructorView::from_row).collect(),
    })
}

/// Typeahead lookup used when scheduling a class; short queries return
/// nothing rather than the whole table.
pub async fn search_instructors(
    auth: AuthUser,
    Query(query): Query<SearchQuery>,
    Extension(pg): Extension<PgPool>,
) -> Payload<InstructorList> {
    auth.require_role(&[Role::Admin, Role::Instructor])?;

    let term = query.q.unwrap_or_default();
    if term.len() < 2 {
        return proceeds(InstructorList {
            instructors: Vec::new(),
        });
    }

    let rows = sqlx::query_as::<_, InstructorRow>(
        "SELECT * FROM instructors \
         WHERE (name ILIKE $1 OR registration ILIKE $1) AND is_active = TRUE \
         ORDER BY name \
         LIMIT 10",
    )
    .bind(format!("%{}%", term))
    .fetch_all(&pg)
    .await
    .map_err(Error::from)?;

    proceeds(InstructorList {
        instructors: rows.iter().map(InstructorView::from_row).collect(),
    })
}

pub async fn get_instructor(
    auth: AuthUser,
    Path(id): Path<i32>,
    Extension(pg): Extension<PgPool>,
) -> Payload<InstructorView> {
    auth.require_role(&[Role::Admin])?;
    let row = fetch_instructor(&pg, id).await?;
    proceeds(InstructorView::from_row(&row))
}

pub async fn create_instructor(
    auth: AuthUser,
    Json(body): Json<CreateInstructor>,
    Extension(pg): Extension<PgPool>,
) -> Payload<InstructorView> {
    auth.require_role(&[Role::Admin])?;

    let data = match body.validated() {
        Ok(data) => data,
        Err(err) => return breaks(err),
    };

    let registration_taken: Option<i32> = sqlx::query_scalar(
        "SELECT 1 FROM instructors WHERE registration = $1 \
         UNION ALL \
         SELECT 1 FROM users WHERE registration = $1 \
         LIMIT 1",
    )
    .bind(&data.registration)
    .fetch_optional(&pg)
    .await
    .map_err(Error::from)?;
    if registration_taken.is_some() {
        return breaks(Error::conflict(
            "An instructor or user with this registration already exists",
        ));
    }

    let email_taken: Option<i32> = sqlx::query_scalar("SELECT 1 FROM users WHERE email = $1")
        .bind(&data.email)
        .fetch_optional(&pg)
        .await
        .map_err(Error::from)?;
    if email_taken.is_some() {
        return breaks(Error::conflict("A user with this email already exists"));
    }

    // initial credential is the registration number
    let password = hash_password(&data.registration)?;

    let mut tx = pg.begin().await.map_err(Error::from)?;
    let row = sqlx::query_as::<_, InstructorRow>(
        "INSERT INTO instructors (name, email, registration, unit, position, password) \
         VALUES ($1, $2, $3, $4, $5, $6) \
         RETURNING *",
    )
    .bind(&data.name)
    .bind(&data.email)
    .bind(&data.registration)
    .bind(&data.unit)
    .bind(&data.position)
    .bind(&password)
    .fetch_one(&mut tx)
    .await
    .map_err(Error::from)?;

    // mirror into the login table so the credential space stays unified
    sqlx::query(
        "INSERT INTO users (name, email, password, roles, position, unit, registration) \
         VALUES ($1, $2, $3, $4, $5, $6, $7)",
    )
    .bind(&data.name)
    .bind(&data.email)
    .bind(&password)
    .bind(SqlJson(vec![Role::Instructor]))
    .bind(&data.position)
    .bind(&data.unit)
    .bind(&data.registration)
    .execute(&mut tx)
    .await
    .map_err(Error::from)?;
    tx.commit().await.map_err(Error::from)?;

    proceeds(InstructorView::from_row(&row))
}

pub async fn update_instructor(
    auth: AuthUser,
    Path(id): Path<i32>,
    Json(body): Json<UpdateInstructor>,
    Extension(pg): Extension<PgPool>,
) -> Payload<InstructorView> {
    auth.require_role(&[Role::Admin])?;

    let instructor = fetch_instructor(&pg, id).await?;

    let mut tx = pg.begin().await.map_err(Error::from)?;
    let row = sqlx::query_as::<_, InstructorRow>(
        "UPDATE instructors SET \
           name = COALESCE($2, name), \
           email = COALESCE($3, email), \
           unit = COALESCE($4, unit), \
           position = COALESCE($5, position), \
           updated_at = NOW() \
         WHERE id = $1 \
         RETURNING *",
    )
    .bind(id)
    .bind(&body.name)
    .bind(&body.email)
    .bind(&body.unit)
    .bind(&body.position)
    .fetch_one(&mut tx)
    .await
    .map_err(Error::from)?;

    sqlx::query(
        "UPDATE users SET \
           name = COALESCE($2, name), \
           email = COALESCE($3, email), \
           unit = COALESCE($4, unit), \
           position = COALESCE($5, position), \
           updated_at = NOW() \
         WHERE registration = $1",
    )
    .bind(&instructor.registration)
    .bind(&body.name)
    .bind(&body.email)
    .bind(&body.unit)
    .bind(&body.position)
    .execute(&mut tx)
    .await
    .map_err(Error::from)?;
    tx.commit().await.map_err(Error::from)?;

    proceeds(InstructorView::from_row(&row))
}

pub async fn delete_instructor(
    auth: AuthUser,
    Path(id): Path<i32>,
    Extension(pg): Extension<PgPool>,
) -> Payload<Deleted> {
    auth.require_role(&[Role::Admin])?;

    let instructor = fetch_instructor(&pg, id).await?;

    let classes: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM classes WHERE instructor_id = $1")
        .bind(id)
        .fetch_one(&pg)
        .await
        .map_err(Error::from)?;
    if classes > 0 {
        return breaks(Error::conflict(format!(
            "Cannot delete the instructor: {} classes reference them. Consider deactivating instead",
            classes
        )));
    }

    let mut tx = pg.begin().await.map_err(Error::from)?;
    sqlx::query("DELETE FROM users WHERE registration = $1")
        .bind(&instructor.registration)
        .execute(&mut tx)
        .await
        .map_err(Error::from)?;
    sqlx::query("DELETE FROM instructors WHERE id = $1")
        .bind(id)
        .execute(&mut tx)
        .await
        .map_err(Error::from)?;
    tx.commit().await.map_err(Error::from)?;

    proceeds(Deleted { id })
}

pub async fn toggle_instructor(
    auth: AuthUser,
    Path(id): Path<i32>,
    Extension(pg): Extension<PgPool>,
) -> Payload<InstructorView> {
    auth.require_role(&[Role::Admin])?;

    let instructor = fetch_instructor(&pg, id).await?;
    let new_status = !instructor.is_active;

    let mut tx = pg.begin().await.map_err(Error::from)?;
    let row = sqlx::query_as::<_, InstructorRow>(
        "UPDATE instructors SET is_active = $2, updated_at = NOW() WHERE id = $1 RETURNING *",
    )
    .bind(id)
    .bind(new_status)
    .fetch_one(&mut tx)
    .await
    .map_err(Error::from)?;

    sqlx::query("UPDATE users SET is_active = $2, updated_at = NOW() WHERE registration = $1")
        .bind(&instructor.registration)
        .bind(new_status)
        .execute(&mut tx)
        .await
        .map_err(Error::from)?;
    tx.commit().await.map_err(Error::from)?;

    proceeds(InstructorView::from_row(&row))
}

/// Resets the credential back to the registration number. Predictable by
/// design of the recovery flow; the account owner is expected to change
/// it on next login.
pub async fn reset_instructor_password(
    auth: AuthUser,
    Path(id): Path<i32>,
    Extension(pg): Extension<PgPool>,
) -> Payload<InstructorView> {
    auth.require_role(&[Role::Admin])?;

    let instructor = fetch_instructor(&pg, id).await?;
    let password = hash_password(&instructor.registration)?;

    let mut tx = pg.begin().await.map_err(Error::from)?;
    let row = sqlx::query_as::<_, InstructorRow>(
        "UPDATE instructors SET password = $2, updated_at = NOW() WHERE id = $1 RETURNING *",
    )
    .bind(id)
    .bind(&password)
    .fetch_one(&mut tx)
    .await
    .map_err(Error::from)?;

    sqlx::query("UPDATE users SET password = $2, updated_at = NOW() WHERE registration = $1")
        .bind(&instructor.registration)
        .bind(&password)
        .execute(&mut tx)
        .await
        .map_err(Error::from)?;
    tx.commit().await.map_err(Error::from)?;

    proceeds(InstructorView::from_row(&row))
}

pub(crate) async fn fetch_instructor(pg: &PgPool, id: i32) -> Result<InstructorRow, Error> {
    sqlx::query_as::<_, InstructorRow>("SELECT * FROM instructors WHERE id = $1")
        .bind(id)
        .fetch_optional(pg)
        .await
        .map_err(Error::from)?
        .ok_or_else(|| Error::not_found("Instructor not found"))
}

#[derive(Debug, Clone, Deserialize)]
pub struct InstructorFilters {
    pub search: Option<String>,
    pub units: Option<String>,
    pub positions: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SearchQuery {
    pub q: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateInstructor {
    pub name: Option<String>,
    pub email: Option<String>,
    pub registration: Option<String>,
    pub unit: Option<String>,
    pub position: Option<String>,
}

impl CreateInstructor {
    pub fn validated(&self) -> Result<NewInstructor, Error> {
        let field = |value: &Option<String>, message: &str| -> Result<String, Error> {
            value
                .as_deref()
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .ok_or_else(|| Error::validation(message))
        };
        Ok(NewInstructor {
            name: field(&self.name, "Name is required")?,
            email: field(&self.email, "Email is required")?,
            registration: field(&self.registration, "Registration is required")?,
            unit: field(&self.unit, "Unit is required")?,
            position: field(&self.position, "Position is required")?,
        })
    }
}

#[derive(Debug, Clone)]
pub struct NewInstructor {
    pub name: String,
    pub email: String,
    pub registration: String,
    pub unit: String,
    pub position: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpdateInstructor {
    pub name: Option<String>,
    pub email: Option<String>,
    pub unit: Option<String>,
    pub position: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Deleted {
    pub id: i32,
}

#[derive(Debug, Clone, Serialize)]
pub struct InstructorList {
    pub instructors: Vec<InstructorView>,
}

#[derive(Debug, Clone, Serialize)]
pub struct InstructorView {
    pub id: i32,
    pub name: String,
    pub email: String,
    pub registration: String,
    pub unit: String,
    pub position: String,
    pub is_active: bool,
    pub terms: i32,
    pub created_at: DateTime<Utc>,
}

impl InstructorView {
    pub fn from_row(row: &InstructorRow) -> Self {
        Self {
            id: row.id,
            name: row.name.clone(),
            email: row.email.clone(),
            registration: row.registration.clone(),
            unit: row.unit.clone(),
            position: row.position.clone(),
            is_active: row.is_active,
            terms: row.terms,
            created_at: row.created_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_requires_every_identity_field() {
        let full = CreateInstructor {
            name: Some("Ana".to_string()),
            email: Some("ana@x.com".to_string()),
            registration: Some("R9".to_string()),
            unit: Some("Plant A".to_string()),
            position: Some("Engineer".to_string()),
        };
        assert!(full.validated().is_ok());

        for missing in ["name", "email", "registration", "unit", "position"] {
            let mut payload = full.clone();
            match missing {
                "name" => payload.name = None,
                "email" => payload.email = Some(String::new()),
                "registration" => payload.registration = None,
                "unit" => payload.unit = None,
                _ => payload.position = None,
            }
            assert!(payload.validated().is_err(), "{} should be required", missing);
        }
    }
}
