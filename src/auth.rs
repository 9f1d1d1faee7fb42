use axum::extract::{FromRequest, RequestParts};
use axum::http::header::AUTHORIZATION;
use axum::{Extension, Json};
use chrono::{Duration, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use pbkdf2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use pbkdf2::Pbkdf2;
use rand_core::OsRng;
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;
use sqlx::PgPool;

use crate::config::Config;
use crate::models::{ActorKind, InstructorRow, Role, UserRow};
use crate::{breaks, proceeds, uploads, Error, Payload};

/// Signed bearer tokens are valid for a fixed window.
pub const TOKEN_TTL_HOURS: i64 = 24;

const INVALID_CREDENTIALS: &str = "Invalid credentials";

pub fn hash_password(plain: &str) -> Result<String, Error> {
    let hash = Pbkdf2
        .hash_password(plain.as_bytes(), &SaltString::generate(&mut OsRng))?
        .to_string();
    Ok(hash)
}

pub fn verify_password(candidate: &str, stored: &str) -> bool {
    let hash = match PasswordHash::new(stored) {
        Ok(hash) => hash,
        Err(_) => return false,
    };
    Pbkdf2
        .verify_password(candidate.as_bytes(), &hash)
        .is_ok()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub id: i32,
    pub email: String,
    pub roles: Vec<Role>,
    pub terms: i32,
    pub exp: i64,
}

pub fn sign_token(
    id: i32,
    email: &str,
    roles: &[Role],
    terms: i32,
    secret: &str,
) -> Result<String, Error> {
    let claims = Claims {
        id,
        email: email.to_string(),
        roles: roles.to_vec(),
        terms,
        exp: (Utc::now() + Duration::hours(TOKEN_TTL_HOURS)).timestamp(),
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|err| Error::InternalError {
        kind: "TokenError",
        message: err.to_string(),
    })
}

/// Expired, tampered and otherwise unreadable tokens are distinct auth
/// failures so clients can tell a stale session from a broken one.
pub fn verify_token(token: &str, secret: &str) -> Result<Claims, Error> {
    decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .map(|data| data.claims)
    .map_err(|err| match err.kind() {
        ErrorKind::ExpiredSignature => Error::auth("Token expired"),
        ErrorKind::InvalidSignature => Error::auth("Invalid token"),
        _ => Error::auth("Malformed token"),
    })
}

pub async fn login(
    Json(body): Json<LoginRequest>,
    Extension(pg): Extension<PgPool>,
    Extension(config): Extension<Config>,
) -> Payload<LoginResponse> {
    if body.password.is_empty() {
        return breaks(Error::validation("`password` must not be empty"));
    }

    // a login can resolve to either principal table; users win ties
    let user = sqlx::query_as::<_, UserRow>("SELECT * FROM users WHERE email = $1 LIMIT 1")
        .bind(&body.email)
        .fetch_optional(&pg)
        .await
        .map_err(Error::from)?;

    if let Some(user) = user {
        if !verify_password(&body.password, &user.password) {
            return breaks(Error::auth(INVALID_CREDENTIALS));
        }
        let roles = user.role_set();
        let token = sign_token(user.id, &user.email, &roles, user.terms, &config.jwt_secret)?;
        return proceeds(LoginResponse {
            user: PrincipalView::from_user(&user, &config),
            token,
        });
    }

    let instructor =
        sqlx::query_as::<_, InstructorRow>("SELECT * FROM instructors WHERE email = $1 LIMIT 1")
            .bind(&body.email)
            .fetch_optional(&pg)
            .await
            .map_err(Error::from)?;

    let instructor = match instructor {
        Some(instructor) => instructor,
        None => return breaks(Error::auth(INVALID_CREDENTIALS)),
    };

    if !verify_password(&body.password, &instructor.password) {
        return breaks(Error::auth(INVALID_CREDENTIALS));
    }

    // instructors carry no role column; the role is implied by the table
    let roles = vec![Role::Instructor];
    let token = sign_token(
        instructor.id,
        &instructor.email,
        &roles,
        instructor.terms,
        &config.jwt_secret,
    )?;
    proceeds(LoginResponse {
        user: PrincipalView::from_instructor(&instructor),
        token,
    })
}

/// The authenticated principal, extracted from the bearer token on every
/// protected route.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub id: i32,
    pub email: String,
    pub roles: Vec<Role>,
    pub terms: i32,
}

impl AuthUser {
    pub fn is_admin(&self) -> bool {
        self.roles.contains(&Role::Admin)
    }

    pub fn is_instructor(&self) -> bool {
        self.roles.contains(&Role::Instructor)
    }

    /// Which principal table this identity lives in.
    pub fn actor_kind(&self) -> ActorKind {
        if self.is_instructor() {
            ActorKind::Instructor
        } else {
            ActorKind::User
        }
    }

    pub fn require_role(&self, allowed: &[Role]) -> Result<(), Error> {
        if self.roles.iter().any(|role| allowed.contains(role)) {
            Ok(())
        } else {
            Err(Error::forbidden("Access denied"))
        }
    }
}

#[axum::async_trait]
impl<B: Send> FromRequest<B> for AuthUser {
    type Rejection = Error;

    async fn from_request(req: &mut RequestParts<B>) -> Result<Self, Self::Rejection> {
        let Extension(config) = Extension::<Config>::from_request(req)
            .await
            .map_err(|_| Error::InternalError {
                kind: "ConfigError",
                message: "Server configuration missing".to_string(),
            })?;

        let header = req
            .headers()
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .ok_or_else(|| Error::auth("Token not provided"))?;

        let parts: Vec<&str> = header.split(' ').collect();
        if parts.len() != 2 || !parts[0].eq_ignore_ascii_case("bearer") {
            return Err(Error::auth("Malformed token"));
        }

        let claims = verify_token(parts[1], &config.jwt_secret)?;
        Ok(AuthUser {
            id: claims.id,
            email: claims.email,
            roles: claims.roles,
            terms: claims.terms,
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct LoginResponse {
    pub user: PrincipalView,
    pub token: String,
}

#[skip_serializing_none]
#[derive(Debug, Clone, Serialize)]
pub struct PrincipalView {
    pub id: i32,
    pub name: String,
    pub email: String,
    pub roles: Vec<Role>,
    pub registration: String,
    pub unit: String,
    pub position: String,
    pub avatar: Option<String>,
    pub is_active: bool,
    pub terms: i32,
}

impl PrincipalView {
    pub fn from_user(user: &UserRow, config: &Config) -> Self {
        Self {
            id: user.id,
            name: user.name.clone(),
            email: user.email.clone(),
            roles: user.role_set(),
            registration: user.registration.clone(),
            unit: user.unit.clone(),
            position: user.position.clone(),
            avatar: user
                .avatar
                .as_deref()
                .map(|file| uploads::public_url(config, file)),
            is_active: user.is_active,
            terms: user.terms,
        }
    }

    pub fn from_instructor(instructor: &InstructorRow) -> Self {
        Self {
            id: instructor.id,
            name: instructor.name.clone(),
            email: instructor.email.clone(),
            roles: vec![Role::Instructor],
            registration: instructor.registration.clone(),
            unit: instructor.unit.clone(),
            position: instructor.position.clone(),
            avatar: None,
            is_active: instructor.is_active,
            terms: instructor.terms,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn token_round_trip_preserves_claims() {
        let token = sign_token(42, "i@x.com", &[Role::Instructor], 1, "secret").unwrap();
        let claims = verify_token(&token, "secret").unwrap();
        assert_eq!(claims.id, 42);
        assert_eq!(claims.email, "i@x.com");
        assert_eq!(claims.roles, vec![Role::Instructor]);
        assert_eq!(claims.terms, 1);
    }

    #[test]
    fn instructor_role_set_serializes_exactly() {
        let value = serde_json::to_value(vec![Role::Instructor]).unwrap();
        assert_eq!(value, json!(["INSTRUCTOR_ROLE"]));
    }

    #[test]
    fn expired_token_is_a_distinct_failure() {
        let claims = Claims {
            id: 1,
            email: "a@x.com".to_string(),
            roles: vec![Role::Admin],
            terms: 0,
            exp: (Utc::now() - Duration::hours(2)).timestamp(),
        };
        let token = encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(b"secret"),
        )
        .unwrap();
        let err = verify_token(&token, "secret").unwrap_err();
        assert!(matches!(err, Error::Auth { ref message } if message == "Token expired"));
    }

    #[test]
    fn tampered_token_is_rejected() {
        let token = sign_token(1, "a@x.com", &[Role::Admin], 0, "secret").unwrap();
        let err = verify_token(&token, "other-secret").unwrap_err();
        assert!(matches!(err, Error::Auth { ref message } if message == "Invalid token"));
    }

    #[test]
    fn garbage_token_is_malformed() {
        let err = verify_token("not-a-token", "secret").unwrap_err();
        assert!(matches!(err, Error::Auth { ref message } if message == "Malformed token"));
    }

    #[test]
    fn password_hash_round_trip() {
        let hash = hash_password("hunter2").unwrap();
        assert_ne!(hash, "hunter2");
        assert!(verify_password("hunter2", &hash));
        assert!(!verify_password("hunter3", &hash));
        assert!(!verify_password("hunter2", "not-a-phc-string"));
    }

    #[test]
    fn role_gate() {
        let admin = AuthUser {
            id: 1,
            email: "a@x.com".to_string(),
            roles: vec![Role::Admin],
            terms: 0,
        };
        assert!(admin.require_role(&[Role::Admin]).is_ok());
        assert!(admin.require_role(&[Role::Instructor]).is_err());
        assert_eq!(admin.actor_kind(), ActorKind::User);

        let instructor = AuthUser {
            roles: vec![Role::Instructor],
            ..admin
        };
        assert_eq!(instructor.actor_kind(), ActorKind::Instructor);
    }
}
