use std::collections::{HashMap, HashSet};

use axum::extract::{Path, Query};
use axum::{Extension, Json};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::types::Json as SqlJson;
use sqlx::PgPool;

use crate::auth::AuthUser;
use crate::config::Config;
use crate::models::{
    ActorKind, Attachment, Role, TicketMessageRow, TicketRow, TICKET_CATEGORIES,
    TICKET_PRIORITIES, TICKET_STATUSES,
};
use crate::{breaks, proceeds, uploads, Error, Payload};

pub async fn list_tickets(
    auth: AuthUser,
    Query(filters): Query<TicketFilters>,
    Extension(pg): Extension<PgPool>,
) -> Payload<TicketList> {
    let rows = sqlx::query_as::<_, TicketRow>(
        "SELECT * FROM tickets \
         WHERE ($1::bool OR (creator_id = $2 AND creator_type = $3)) \
           AND ($4::text IS NULL OR status = $4) \
           AND ($5::text IS NULL OR category = $5) \
           AND ($6::text IS NULL OR priority = $6) \
         ORDER BY updated_at DESC",
    )
    .bind(auth.is_admin())
    .bind(auth.id)
    .bind(auth.actor_kind().as_str())
    .bind(filters.status)
    .bind(filters.category)
    .bind(filters.priority)
    .fetch_all(&pg)
    .await
    .map_err(Error::from)?;

    proceeds(TicketList {
        tickets: ticket_views(&pg, rows).await?,
    })
}

pub async fn get_ticket(
    auth: AuthUser,
    Path(id): Path<i32>,
    Extension(pg): Extension<PgPool>,
) -> Payload<TicketView> {
    let row = fetch_ticket(&pg, id).await?;
    require_access(&auth, &row)?;
    proceeds(ticket_view(&pg, row).await?)
}

pub async fn create_ticket(
    auth: AuthUser,
    Json(body): Json<CreateTicket>,
    Extension(pg): Extension<PgPool>,
    Extension(config): Extension<Config>,
) -> Payload<TicketView> {
    let ticket = match body.validated() {
        Ok(ticket) => ticket,
        Err(err) => return breaks(err),
    };

    let row = sqlx::query_as::<_, TicketRow>(
        "INSERT INTO tickets (title, description, status, priority, category, creator_id, creator_type) \
         VALUES ($1, $2, 'open', $3, $4, $5, $6) \
         RETURNING *",
    )
    .bind(&ticket.title)
    .bind(&ticket.description)
    .bind(&ticket.priority)
    .bind(&ticket.category)
    .bind(auth.id)
    .bind(auth.actor_kind().as_str())
    .fetch_one(&pg)
    .await
    .map_err(Error::from)?;

    let attachments = store_attachments(&config, row.id, &body.attachments).await?;

    // the initiating description is mirrored into the thread's first message
    let first = append_message(
        &pg,
        row.id,
        &ticket.description,
        &auth,
        false,
        &attachments,
    )
    .await;
    if let Err(err) = first {
        cleanup_attachments(&config, &attachments).await;
        return breaks(err);
    }

    let row = fetch_ticket(&pg, row.id).await?;
    proceeds(ticket_view(&pg, row).await?)
}

pub async fn add_message(
    auth: AuthUser,
    Path(id): Path<i32>,
    Json(body): Json<NewMessage>,
    Extension(pg): Extension<PgPool>,
    Extension(config): Extension<Config>,
) -> Payload<TicketView> {
    let row = fetch_ticket(&pg, id).await?;
    require_access(&auth, &row)?;

    let message = match body.message.as_deref().filter(|m| !m.is_empty()) {
        Some(m) => m.to_string(),
        None => return breaks(Error::validation("Message is required")),
    };

    let attachments = store_attachments(&config, id, &body.attachments).await?;

    let appended = append_message(&pg, id, &message, &auth, auth.is_admin(), &attachments).await;
    if let Err(err) = appended {
        cleanup_attachments(&config, &attachments).await;
        return breaks(err);
    }

    let row = fetch_ticket(&pg, id).await?;
    proceeds(ticket_view(&pg, row).await?)
}

pub async fn update_status(
    auth: AuthUser,
    Path(id): Path<i32>,
    Json(body): Json<UpdateStatus>,
    Extension(pg): Extension<PgPool>,
) -> Payload<TicketView> {
    auth.require_role(&[Role::Admin])?;

    if !TICKET_STATUSES.contains(&body.status.as_str()) {
        return breaks(Error::validation("Invalid status"));
    }

    let row = fetch_ticket(&pg, id).await?;
    sqlx::query("UPDATE tickets SET status = $1, updated_at = NOW() WHERE id = $2")
        .bind(&body.status)
        .bind(row.id)
        .execute(&pg)
        .await
        .map_err(Error::from)?;

    let row = fetch_ticket(&pg, id).await?;
    proceeds(ticket_view(&pg, row).await?)
}

async fn fetch_ticket(pg: &PgPool, id: i32) -> Result<TicketRow, Error> {
    sqlx::query_as::<_, TicketRow>("SELECT * FROM tickets WHERE id = $1")
        .bind(id)
        .fetch_optional(pg)
        .await
        .map_err(Error::from)?
        .ok_or_else(|| Error::not_found("Ticket not found"))
}

/// Non-admins can only see threads they created.
fn require_access(auth: &AuthUser, ticket: &TicketRow) -> Result<(), Error> {
    if auth.is_admin() {
        return Ok(());
    }
    let is_owner =
        ticket.creator_id == auth.id && ticket.creator_type == auth.actor_kind().as_str();
    if is_owner {
        Ok(())
    } else {
        Err(Error::forbidden("Access denied"))
    }
}

async fn append_message(
    pg: &PgPool,
    ticket_id: i32,
    message: &str,
    sender: &AuthUser,
    is_support: bool,
    attachments: &[Attachment],
) -> Result<(), Error> {
    let mut tx = pg.begin().await.map_err(Error::from)?;
    sqlx::query(
        "INSERT INTO ticket_messages (ticket_id, message, sender_id, sender_type, is_support, attachments) \
         VALUES ($1, $2, $3, $4, $5, $6)",
    )
    .bind(ticket_id)
    .bind(message)
    .bind(sender.id)
    .bind(sender.actor_kind().as_str())
    .bind(is_support)
    .bind(SqlJson(attachments.to_vec()))
    .execute(&mut tx)
    .await
    .map_err(Error::from)?;
    sqlx::query("UPDATE tickets SET updated_at = NOW() WHERE id = $1")
        .bind(ticket_id)
        .execute(&mut tx)
        .await
        .map_err(Error::from)?;
    tx.commit().await.map_err(Error::from)?;
    Ok(())
}

async fn store_attachments(
    config: &Config,
    ticket_id: i32,
    uploads_in: &[AttachmentUpload],
) -> Result<Vec<Attachment>, Error> {
    let mut stored = Vec::with_capacity(uploads_in.len());
    for upload in uploads_in {
        let file = match uploads::save_base64_image(
            config,
            &upload.data,
            &format!("ticket_{}", ticket_id),
        )
        .await
        {
            Ok(file) => file,
            Err(err) => {
                cleanup_attachments(config, &stored).await;
                return Err(err);
            }
        };
        stored.push(Attachment {
            name: upload.name.clone(),
            url: format!("/api/uploads/{}", file),
        });
    }
    Ok(stored)
}

async fn cleanup_attachments(config: &Config, attachments: &[Attachment]) {
    for attachment in attachments {
        let file = attachment.url.rsplit('/').next().unwrap_or_default();
        if let Err(err) = uploads::delete_file(config, file).await {
            log::warn!(
                "Failed to delete attachment {} after aborted write: {:?}",
                file,
                err
            );
        }
    }
}

async fn ticket_view(pg: &PgPool, row: TicketRow) -> Result<TicketView, Error> {
    Ok(ticket_views(pg, vec![row]).await?.remove(0))
}

async fn ticket_views(pg: &PgPool, rows: Vec<TicketRow>) -> Result<Vec<TicketView>, Error> {
    if rows.is_empty() {
        return Ok(Vec::new());
    }

    let ticket_ids: Vec<i32> = rows.iter().map(|t| t.id).collect();
    let messages = sqlx::query_as::<_, TicketMessageRow>(
        "SELECT * FROM ticket_messages WHERE ticket_id = ANY($1) ORDER BY created_at",
    )
    .bind(&ticket_ids)
    .fetch_all(pg)
    .await
    .map_err(Error::from)?;

    // gather every polymorphic reference once, then dispatch per table
    let mut user_ids: HashSet<i32> = HashSet::new();
    let mut instructor_ids: HashSet<i32> = HashSet::new();
    for row in &rows {
        match ActorKind::from_name(&row.creator_type) {
            Some(ActorKind::User) => user_ids.insert(row.creator_id),
            Some(ActorKind::Instructor) => instructor_ids.insert(row.creator_id),
            None => false,
        };
    }
    for message in &messages {
        match ActorKind::from_name(&message.sender_type) {
            Some(ActorKind::User) => user_ids.insert(message.sender_id),
            Some(ActorKind::Instructor) => instructor_ids.insert(message.sender_id),
            None => false,
        };
    }

    let users = fetch_actor_summaries(pg, "users", &user_ids).await?;
    let instructors = fetch_actor_summaries(pg, "instructors", &instructor_ids).await?;
    let resolve = |kind: &str, id: i32| -> Option<ActorView> {
        match ActorKind::from_name(kind)? {
            ActorKind::User => users.get(&id).cloned(),
            ActorKind::Instructor => instructors.get(&id).cloned(),
        }
    };

    let mut threads: HashMap<i32, Vec<MessageView>> = HashMap::new();
    for message in messages {
        let sender = resolve(&message.sender_type, message.sender_id);
        threads
            .entry(message.ticket_id)
            .or_default()
            .push(MessageView::assemble(message, sender));
    }

    Ok(rows
        .into_iter()
        .map(|row| {
            let creator = resolve(&row.creator_type, row.creator_id);
            let messages = threads.remove(&row.id).unwrap_or_default();
            TicketView::assemble(row, creator, messages)
        })
        .collect())
}

async fn fetch_actor_summaries(
    pg: &PgPool,
    table: &str,
    ids: &HashSet<i32>,
) -> Result<HashMap<i32, ActorView>, Error> {
    if ids.is_empty() {
        return Ok(HashMap::new());
    }
    let ids: Vec<i32> = ids.iter().copied().collect();
    let rows = sqlx::query_as::<_, (i32, String, String)>(&format!(
        "SELECT id, name, email FROM {} WHERE id = ANY($1)",
        table
    ))
    .bind(&ids)
    .fetch_all(pg)
    .await
    .map_err(Error::from)?;
    Ok(rows
        .into_iter()
        .map(|(id, name, email)| (id, ActorView { id, name, email }))
        .collect())
}

#[derive(Debug, Clone, Deserialize)]
pub struct TicketFilters {
    pub status: Option<String>,
    pub category: Option<String>,
    pub priority: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AttachmentUpload {
    pub name: String,
    pub data: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateTicket {
    pub title: Option<String>,
    pub description: Option<String>,
    pub priority: Option<String>,
    pub category: Option<String>,
    #[serde(default)]
    pub attachments: Vec<AttachmentUpload>,
}

impl CreateTicket {
    pub fn validated(&self) -> Result<NewTicket, Error> {
        let title = self
            .title
            .as_deref()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| Error::validation("Title is required"))?;
        let description = self
            .description
            .as_deref()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| Error::validation("Description is required"))?;
        let priority = self
            .priority
            .as_deref()
            .filter(|p| TICKET_PRIORITIES.contains(p))
            .ok_or_else(|| Error::validation("Invalid priority"))?;
        let category = self
            .category
            .as_deref()
            .filter(|c| TICKET_CATEGORIES.contains(c))
            .ok_or_else(|| Error::validation("Invalid category"))?;
        Ok(NewTicket {
            title: title.to_string(),
            description: description.to_string(),
            priority: priority.to_string(),
            category: category.to_string(),
        })
    }
}

#[derive(Debug, Clone)]
pub struct NewTicket {
    pub title: String,
    pub description: String,
    pub priority: String,
    pub category: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewMessage {
    pub message: Option<String>,
    #[serde(default)]
    pub attachments: Vec<AttachmentUpload>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpdateStatus {
    pub status: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct TicketList {
    pub tickets: Vec<TicketView>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TicketView {
    pub id: i32,
    pub title: String,
    pub description: String,
    pub status: String,
    pub priority: String,
    pub category: String,
    pub creator_type: String,
    pub creator: Option<ActorView>,
    pub messages: Vec<MessageView>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TicketView {
    fn assemble(row: TicketRow, creator: Option<ActorView>, messages: Vec<MessageView>) -> Self {
        Self {
            id: row.id,
            title: row.title,
            description: row.description,
            status: row.status,
            priority: row.priority,
            category: row.category,
            creator_type: row.creator_type,
            creator,
            messages,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ActorView {
    pub id: i32,
    pub name: String,
    pub email: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct MessageView {
    pub id: i32,
    pub message: String,
    pub is_support: bool,
    pub sender_type: String,
    pub sender: Option<ActorView>,
    pub attachments: Vec<Attachment>,
    pub created_at: DateTime<Utc>,
}

impl MessageView {
    fn assemble(row: TicketMessageRow, sender: Option<ActorView>) -> Self {
        Self {
            id: row.id,
            message: row.message,
            is_support: row.is_support,
            sender_type: row.sender_type,
            sender,
            attachments: row.attachments.0,
            created_at: row.created_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Role;

    fn admin() -> AuthUser {
        AuthUser {
            id: 1,
            email: "a@x.com".to_string(),
            roles: vec![Role::Admin],
            terms: 0,
        }
    }

    fn instructor(id: i32) -> AuthUser {
        AuthUser {
            id,
            email: "i@x.com".to_string(),
            roles: vec![Role::Instructor],
            terms: 0,
        }
    }

    fn ticket(creator_id: i32, creator_type: &str) -> TicketRow {
        let now = Utc::now();
        TicketRow {
            id: 9,
            title: "t".to_string(),
            description: "d".to_string(),
            status: "open".to_string(),
            priority: "low".to_string(),
            category: "doubt".to_string(),
            creator_id,
            creator_type: creator_type.to_string(),
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn create_payload_validates_enums() {
        let valid = CreateTicket {
            title: Some("Broken".to_string()),
            description: Some("It broke".to_string()),
            priority: Some("high".to_string()),
            category: Some("error".to_string()),
            attachments: Vec::new(),
        };
        assert!(valid.validated().is_ok());

        let bad_priority = CreateTicket {
            priority: Some("urgent".to_string()),
            ..valid.clone()
        };
        assert!(bad_priority.validated().is_err());

        let missing_title = CreateTicket {
            title: None,
            ..valid
        };
        assert!(missing_title.validated().is_err());
    }

    #[test]
    fn admins_access_everything() {
        assert!(require_access(&admin(), &ticket(99, "instructor")).is_ok());
    }

    #[test]
    fn owner_access_matches_id_and_kind() {
        assert!(require_access(&instructor(5), &ticket(5, "instructor")).is_ok());
        assert!(require_access(&instructor(5), &ticket(5, "user")).is_err());
        assert!(require_access(&instructor(5), &ticket(6, "instructor")).is_err());
    }
}
