use axum::{Extension, Json};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;

use crate::auth::{hash_password, verify_password, AuthUser, PrincipalView};
use crate::config::Config;
use crate::instructors::fetch_instructor;
use crate::models::{ActorKind, UserRow};
use crate::{breaks, proceeds, uploads, Error, Payload};

pub async fn get_profile(
    auth: AuthUser,
    Extension(pg): Extension<PgPool>,
    Extension(config): Extension<Config>,
) -> Payload<PrincipalView> {
    // the role set decides which principal table holds this identity
    let view = match auth.actor_kind() {
        ActorKind::User => PrincipalView::from_user(&fetch_user(&pg, auth.id).await?, &config),
        ActorKind::Instructor => {
            PrincipalView::from_instructor(&fetch_instructor(&pg, auth.id).await?)
        }
    };
    proceeds(view)
}

pub async fn update_profile(
    auth: AuthUser,
    Json(body): Json<UpdateProfile>,
    Extension(pg): Extension<PgPool>,
    Extension(config): Extension<Config>,
) -> Payload<PrincipalView> {
    // roles, registration and the active flag are never client-updatable
    let password = match body.password.as_deref().filter(|p| !p.is_empty()) {
        Some(plain) => Some(hash_password(plain)?),
        None => None,
    };

    match auth.actor_kind() {
        ActorKind::User => {
            let user = fetch_user(&pg, auth.id).await?;

            if let Some(email) = body.email.as_deref() {
                let taken: Option<i32> =
                    sqlx::query_scalar("SELECT 1 FROM users WHERE email = $1 AND id <> $2")
                        .bind(email)
                        .bind(auth.id)
                        .fetch_optional(&pg)
                        .await
                        .map_err(Error::from)?;
                if taken.is_some() {
                    return breaks(Error::conflict("This email is already in use"));
                }
            }

            let avatar = match body.avatar.as_deref() {
                Some(data) => {
                    if let Some(old) = &user.avatar {
                        if let Err(err) = uploads::delete_file(&config, old).await {
                            log::warn!("Failed to delete previous avatar {}: {:?}", old, err);
                        }
                    }
                    Some(
                        uploads::save_base64_image(
                            &config,
                            data,
                            &format!("profile_{}", auth.id),
                        )
                        .await?,
                    )
                }
                None => None,
            };

            let row = sqlx::query_as::<_, UserRow>(
                "UPDATE users SET \
                   name = COALESCE($2, name), \
                   email = COALESCE($3, email), \
                   position = COALESCE($4, position), \
                   unit = COALESCE($5, unit), \
                   password = COALESCE($6, password), \
                   avatar = COALESCE($7, avatar), \
                   updated_at = NOW() \
                 WHERE id = $1 \
                 RETURNING *",
            )
            .bind(auth.id)
            .bind(&body.name)
            .bind(&body.email)
            .bind(&body.position)
            .bind(&body.unit)
            .bind(&password)
            .bind(&avatar)
            .fetch_one(&pg)
            .await
            .map_err(Error::from)?;

            proceeds(PrincipalView::from_user(&row, &config))
        }
        ActorKind::Instructor => {
            fetch_instructor(&pg, auth.id).await?;

            if let Some(email) = body.email.as_deref() {
                let taken: Option<i32> =
                    sqlx::query_scalar("SELECT 1 FROM instructors WHERE email = $1 AND id <> $2")
                        .bind(email)
                        .bind(auth.id)
                        .fetch_optional(&pg)
                        .await
                        .map_err(Error::from)?;
                if taken.is_some() {
                    return breaks(Error::conflict("This email is already in use"));
                }
            }

            let row = sqlx::query_as::<_, crate::models::InstructorRow>(
                "UPDATE instructors SET \
                   name = COALESCE($2, name), \
                   email = COALESCE($3, email), \
                   position = COALESCE($4, position), \
                   unit = COALESCE($5, unit), \
                   password = COALESCE($6, password), \
                   updated_at = NOW() \
                 WHERE id = $1 \
                 RETURNING *",
            )
            .bind(auth.id)
            .bind(&body.name)
            .bind(&body.email)
            .bind(&body.position)
            .bind(&body.unit)
            .bind(&password)
            .fetch_one(&pg)
            .await
            .map_err(Error::from)?;

            proceeds(PrincipalView::from_instructor(&row))
        }
    }
}

pub async fn change_password(
    auth: AuthUser,
    Json(body): Json<ChangePassword>,
    Extension(pg): Extension<PgPool>,
) -> Payload<PasswordChanged> {
    if body.new_password.is_empty() {
        return breaks(Error::validation("`newPassword` must not be empty"));
    }

    let stored = match auth.actor_kind() {
        ActorKind::User => fetch_user(&pg, auth.id).await?.password,
        ActorKind::Instructor => fetch_instructor(&pg, auth.id).await?.password,
    };
    if !verify_password(&body.current_password, &stored) {
        return breaks(Error::auth("Current password is incorrect"));
    }

    let password = hash_password(&body.new_password)?;
    let query = match auth.actor_kind() {
        ActorKind::User => "UPDATE users SET password = $1, updated_at = NOW() WHERE id = $2",
        ActorKind::Instructor => {
            "UPDATE instructors SET password = $1, updated_at = NOW() WHERE id = $2"
        }
    };
    sqlx::query(query)
        .bind(&password)
        .bind(auth.id)
        .execute(&pg)
        .await
        .map_err(Error::from)?;

    proceeds(PasswordChanged {})
}

pub async fn accept_terms(
    auth: AuthUser,
    Extension(pg): Extension<PgPool>,
) -> Payload<TermsStatus> {
    let query = match auth.actor_kind() {
        ActorKind::User => {
            "UPDATE users SET terms = 1, updated_at = NOW() WHERE id = $1 RETURNING terms"
        }
        ActorKind::Instructor => {
            "UPDATE instructors SET terms = 1, updated_at = NOW() WHERE id = $1 RETURNING terms"
        }
    };
    let terms: Option<i32> = sqlx::query_scalar(query)
        .bind(auth.id)
        .fetch_optional(&pg)
        .await
        .map_err(Error::from)?;

    match terms {
        Some(terms) => proceeds(TermsStatus {
            terms,
            has_accepted: terms == 1,
        }),
        None => breaks(Error::not_found("User not found")),
    }
}

pub async fn terms_status(
    auth: AuthUser,
    Extension(pg): Extension<PgPool>,
) -> Payload<TermsStatus> {
    let terms = match auth.actor_kind() {
        ActorKind::User => fetch_user(&pg, auth.id).await?.terms,
        ActorKind::Instructor => fetch_instructor(&pg, auth.id).await?.terms,
    };
    proceeds(TermsStatus {
        terms,
        has_accepted: terms == 1,
    })
}

async fn fetch_user(pg: &PgPool, id: i32) -> Result<UserRow, Error> {
    sqlx::query_as::<_, UserRow>("SELECT * FROM users WHERE id = $1")
        .bind(id)
        .fetch_optional(pg)
        .await
        .map_err(Error::from)?
        .ok_or_else(|| Error::not_found("User not found"))
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpdateProfile {
    pub name: Option<String>,
    pub email: Option<String>,
    pub position: Option<String>,
    pub unit: Option<String>,
    pub password: Option<String>,
    pub avatar: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangePassword {
    pub current_password: String,
    pub new_password: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct PasswordChanged {}

#[derive(Debug, Clone, Serialize)]
pub struct TermsStatus {
    pub terms: i32,
    pub has_accepted: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terms_status_flags_acceptance() {
        let pending = TermsStatus {
            terms: 0,
            has_accepted: false,
        };
        let json = serde_json::to_value(&pending).unwrap();
        assert_eq!(json["terms"], 0);
        assert_eq!(json["has_accepted"], false);
    }

    #[test]
    fn change_password_payload_uses_camel_case() {
        let body: ChangePassword = serde_json::from_str(
            "{\"currentPassword\":\"old\",\"newPassword\":\"new\"}",
        )
        .unwrap();
        assert_eq!(body.current_password, "old");
        assert_eq!(body.new_password, "new");
    }
}
