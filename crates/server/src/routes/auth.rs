use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use axum::{extract::State, routing::post, Json, Router};
use chrono::Utc;
use jsonwebtoken::{encode, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    error::{AppError, Result},
    middleware::auth::AuthUser,
    AppState,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/register", post(register))
        .route("/login", post(login))
        .route("/google", post(google_signin))
}

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub name: String,
    pub email: String,
    pub password: String,
    pub confirm_password: String,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

/// Profile handed back by the OAuth callback after the provider exchange.
/// The exchange itself happens outside the core; we only persist its result.
#[derive(Debug, Deserialize)]
pub struct GoogleSigninRequest {
    pub email: String,
    pub name: String,
    pub access_token: String,
}

#[derive(Debug, Serialize)]
pub struct AuthResponse {
    pub token: String,
    pub user: UserResponse,
}

#[derive(Debug, Serialize)]
pub struct UserResponse {
    pub id: String,
    pub email: String,
    pub name: String,
    pub role: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String, // user id
    pub email: String,
    pub name: String,
    pub role: String,
    pub exp: usize,
}

fn hash_password(password: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    let argon2 = Argon2::default();
    argon2
        .hash_password(password.as_bytes(), &salt)
        .map(|h| h.to_string())
        .map_err(|_| AppError::Internal("Failed to hash password".to_string()))
}

fn verify_password(password: &str, hash: &str) -> Result<bool> {
    let parsed_hash = PasswordHash::new(hash)
        .map_err(|_| AppError::Internal("Invalid password hash".to_string()))?;
    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed_hash)
        .is_ok())
}

fn create_token(user_id: &str, email: &str, name: &str, role: &str, secret: &str) -> Result<String> {
    let expiration = Utc::now()
        .checked_add_signed(chrono::Duration::days(7))
        .expect("valid timestamp")
        .timestamp() as usize;

    let claims = Claims {
        sub: user_id.to_string(),
        email: email.to_string(),
        name: name.to_string(),
        role: role.to_string(),
        exp: expiration,
    };

    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|_| AppError::Internal("Failed to create token".to_string()))
}

fn validate_registration(body: &RegisterRequest) -> Result<()> {
    if body.name.trim().is_empty() || body.email.trim().is_empty() || body.password.is_empty() {
        return Err(AppError::Validation("All fields are required".to_string()));
    }
    if !body.email.contains('@') {
        return Err(AppError::Validation("Invalid email address".to_string()));
    }
    if body.password != body.confirm_password {
        return Err(AppError::Validation("Passwords do not match".to_string()));
    }
    if body.password.len() < 6 {
        return Err(AppError::Validation(
            "Password must be at least 6 characters".to_string(),
        ));
    }
    Ok(())
}

async fn register(
    State(state): State<AppState>,
    Json(body): Json<RegisterRequest>,
) -> Result<Json<AuthResponse>> {
    validate_registration(&body)?;

    // Check if user already exists
    let existing = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM users WHERE email = ?")
        .bind(&body.email)
        .fetch_one(&state.db.pool)
        .await?;

    if existing > 0 {
        return Err(AppError::Conflict(
            "A user with this email already exists".to_string(),
        ));
    }

    // Hash password
    let password_hash = hash_password(&body.password)?;

    // Create user
    let user_id = Uuid::new_v4().to_string();
    let now = Utc::now();

    sqlx::query(
        "INSERT INTO users (id, email, name, password_hash, role, created_at, updated_at) VALUES (?, ?, ?, ?, 'user', ?, ?)",
    )
    .bind(&user_id)
    .bind(&body.email)
    .bind(&body.name)
    .bind(&password_hash)
    .bind(now)
    .bind(now)
    .execute(&state.db.pool)
    .await?;

    let token = create_token(&user_id, &body.email, &body.name, "user", &state.config.jwt_secret)?;

    Ok(Json(AuthResponse {
        token,
        user: UserResponse {
            id: user_id,
            email: body.email,
            name: body.name,
            role: "user".to_string(),
        },
    }))
}

async fn login(
    State(state): State<AppState>,
    Json(body): Json<LoginRequest>,
) -> Result<Json<AuthResponse>> {
    if body.email.is_empty() || body.password.is_empty() {
        return Err(AppError::Validation(
            "Email and password are required".to_string(),
        ));
    }

    // Find user by email
    let user = sqlx::query_as::<_, (String, String, String, Option<String>, String)>(
        "SELECT id, email, name, password_hash, role FROM users WHERE email = ?",
    )
    .bind(&body.email)
    .fetch_optional(&state.db.pool)
    .await?
    .ok_or(AppError::Unauthorized)?;

    let (user_id, email, name, password_hash, role) = user;

    // OAuth-only accounts have no password to check against
    let password_hash = password_hash.ok_or(AppError::Unauthorized)?;

    if !verify_password(&body.password, &password_hash)? {
        return Err(AppError::Unauthorized);
    }

    let token = create_token(&user_id, &email, &name, &role, &state.config.jwt_secret)?;

    Ok(Json(AuthResponse {
        token,
        user: UserResponse {
            id: user_id,
            email,
            name,
            role,
        },
    }))
}

async fn google_signin(
    State(state): State<AppState>,
    Json(body): Json<GoogleSigninRequest>,
) -> Result<Json<AuthResponse>> {
    if body.email.trim().is_empty() || body.access_token.is_empty() {
        return Err(AppError::Validation(
            "Email and access token are required".to_string(),
        ));
    }

    let existing = sqlx::query_as::<_, (String, String, String, String)>(
        "SELECT id, email, name, role FROM users WHERE email = ?",
    )
    .bind(&body.email)
    .fetch_optional(&state.db.pool)
    .await?;

    let now = Utc::now();
    let (user_id, email, name, role) = match existing {
        Some(user) => user,
        None => {
            // First OAuth sign-in creates the user without a password
            let user_id = Uuid::new_v4().to_string();
            sqlx::query(
                "INSERT INTO users (id, email, name, password_hash, role, created_at, updated_at) VALUES (?, ?, ?, NULL, 'user', ?, ?)",
            )
            .bind(&user_id)
            .bind(&body.email)
            .bind(&body.name)
            .bind(now)
            .bind(now)
            .execute(&state.db.pool)
            .await?;

            (user_id, body.email.clone(), body.name.clone(), "user".to_string())
        }
    };

    // Remember the access token for calendar sync; refreshed on every sign-in
    sqlx::query(
        r#"
        INSERT INTO accounts (id, user_id, provider, access_token) VALUES (?, ?, 'google', ?)
        ON CONFLICT (user_id, provider) DO UPDATE SET access_token = excluded.access_token
        "#,
    )
    .bind(Uuid::new_v4().to_string())
    .bind(&user_id)
    .bind(&body.access_token)
    .execute(&state.db.pool)
    .await?;

    let token = create_token(&user_id, &email, &name, &role, &state.config.jwt_secret)?;

    Ok(Json(AuthResponse {
        token,
        user: UserResponse {
            id: user_id,
            email,
            name,
            role,
        },
    }))
}

pub async fn me(user: AuthUser) -> Json<UserResponse> {
    Json(UserResponse {
        id: user.id,
        email: user.email,
        name: user.name,
        role: user.role,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(password: &str, confirm: &str) -> RegisterRequest {
        RegisterRequest {
            name: "Anna".to_string(),
            email: "anna@example.com".to_string(),
            password: password.to_string(),
            confirm_password: confirm.to_string(),
        }
    }

    #[test]
    fn rejects_password_shorter_than_six_chars() {
        let err = validate_registration(&request("abc12", "abc12")).unwrap_err();
        match err {
            AppError::Validation(msg) => assert!(msg.contains("6 characters")),
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[test]
    fn accepts_six_char_password() {
        assert!(validate_registration(&request("abcdef", "abcdef")).is_ok());
    }

    #[test]
    fn rejects_mismatched_confirmation() {
        let err = validate_registration(&request("abcdef", "abcdeg")).unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[test]
    fn rejects_missing_fields() {
        let mut body = request("abcdef", "abcdef");
        body.email = String::new();
        assert!(matches!(
            validate_registration(&body),
            Err(AppError::Validation(_))
        ));
    }

    #[test]
    fn password_hash_round_trip() {
        let hash = hash_password("abcdef").unwrap();
        assert!(verify_password("abcdef", &hash).unwrap());
        assert!(!verify_password("abcdeg", &hash).unwrap());
    }
}
