//! REST endpoints for the onboarding flow.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;

use crate::context::Identity;
use crate::error::{Error, SessionError};
use crate::onboarding::model::{ConsentInput, UserRole};
use crate::onboarding::redirect::ReferralSource;
use crate::onboarding::service::OnboardingService;

/// Shared state for onboarding routes.
#[derive(Clone)]
pub struct OnboardingRouteState {
    pub service: Arc<OnboardingService>,
}

fn bad_request(message: impl Into<String>) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(serde_json::json!({"error": message.into()})),
    )
        .into_response()
}

/// Map a service error to a user-safe response. Internals are logged, never
/// returned.
fn error_response(e: Error) -> Response {
    let (status, message) = match &e {
        Error::Consent(_) => (StatusCode::FORBIDDEN, "Consent is required to continue".to_string()),
        Error::Session(SessionError::Unauthenticated(_)) => {
            (StatusCode::UNAUTHORIZED, "Please sign in to continue".to_string())
        }
        Error::Session(SessionError::Missing { .. } | SessionError::NotFound { .. }) => {
            (StatusCode::NOT_FOUND, "No onboarding session found".to_string())
        }
        Error::Transition(_) => (
            StatusCode::CONFLICT,
            "That step is not available right now".to_string(),
        ),
        _ => {
            tracing::error!(error = %e, "Onboarding request failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Something went wrong. Please try again.".to_string(),
            )
        }
    };
    (status, Json(serde_json::json!({"error": message}))).into_response()
}

fn parse_role(role: &str) -> Result<UserRole, Response> {
    role.parse::<UserRole>()
        .map_err(|_| bad_request(format!("Unknown onboarding role: {role}")))
}

fn parse_referral(referral: Option<&str>) -> Result<Option<ReferralSource>, Response> {
    match referral.map(str::trim).filter(|s| !s.is_empty()) {
        Some(s) => s
            .parse::<ReferralSource>()
            .map(Some)
            .map_err(|_| bad_request(format!("Unknown referral source: {s}"))),
        None => Ok(None),
    }
}

// ── Chat ────────────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct ChatRequest {
    message: String,
    user_id: Option<String>,
    anon_id: Option<String>,
}

/// POST /api/onboarding/{role}/chat
async fn chat(
    State(state): State<OnboardingRouteState>,
    Path(role): Path<String>,
    Json(body): Json<ChatRequest>,
) -> Response {
    let role = match parse_role(&role) {
        Ok(role) => role,
        Err(resp) => return resp,
    };
    if body.message.trim().is_empty() {
        return bad_request("Message must not be empty");
    }
    let identity = match (body.user_id, body.anon_id) {
        (Some(user), _) if !user.trim().is_empty() => Identity::User(user),
        (_, Some(anon)) if !anon.trim().is_empty() => Identity::Anonymous(anon),
        _ => return bad_request("Either user_id or anon_id is required"),
    };

    match state.service.handle_message(role, &identity, &body.message).await {
        Ok(reply) => (StatusCode::OK, Json(reply)).into_response(),
        Err(e) => error_response(e),
    }
}

#[derive(Deserialize)]
struct ResumeProfileRequest {
    user_id: String,
}

/// POST /api/onboarding/{role}/resume-profile
async fn resume_profile(
    State(state): State<OnboardingRouteState>,
    Path(role): Path<String>,
    Json(body): Json<ResumeProfileRequest>,
) -> Response {
    let role = match parse_role(&role) {
        Ok(role) => role,
        Err(resp) => return resp,
    };
    match state
        .service
        .trigger_profile_completion(role, &body.user_id)
        .await
    {
        Ok(summary) => (StatusCode::OK, Json(summary)).into_response(),
        Err(e) => error_response(e),
    }
}

// ── Sign-in ─────────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct AuthCompleteRequest {
    user_id: String,
    anon_id: Option<String>,
    referral: Option<String>,
}

/// POST /api/auth/complete
async fn auth_complete(
    State(state): State<OnboardingRouteState>,
    Json(body): Json<AuthCompleteRequest>,
) -> Response {
    if body.user_id.trim().is_empty() {
        return bad_request("user_id is required");
    }
    let referral = match parse_referral(body.referral.as_deref()) {
        Ok(referral) => referral,
        Err(resp) => return resp,
    };
    match state
        .service
        .authenticate(&body.user_id, body.anon_id.as_deref(), referral)
        .await
    {
        Ok(decision) => (StatusCode::OK, Json(decision)).into_response(),
        Err(e) => error_response(e),
    }
}

// ── Consent ─────────────────────────────────────────────────────────────

/// GET /api/consent/{user_id}
async fn get_consent(
    State(state): State<OnboardingRouteState>,
    Path(user_id): Path<String>,
) -> Response {
    match state.service.consent_status(&user_id).await {
        Ok(status) => (StatusCode::OK, Json(status)).into_response(),
        Err(e) => error_response(e),
    }
}

/// POST /api/consent/{user_id}
async fn post_consent(
    State(state): State<OnboardingRouteState>,
    Path(user_id): Path<String>,
    Json(input): Json<ConsentInput>,
) -> Response {
    match state.service.record_consent(&user_id, input).await {
        Ok(outcome) => (StatusCode::OK, Json(outcome)).into_response(),
        Err(e) => error_response(e),
    }
}

// ── Redirect ────────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct RedirectQuery {
    user_id: Option<String>,
    referral: Option<String>,
}

/// GET /api/redirect
async fn redirect(
    State(state): State<OnboardingRouteState>,
    Query(query): Query<RedirectQuery>,
) -> Response {
    let referral = match parse_referral(query.referral.as_deref()) {
        Ok(referral) => referral,
        Err(resp) => return resp,
    };
    let user_id = query.user_id.as_deref().filter(|s| !s.trim().is_empty());
    let decision = state.service.redirect(user_id, referral).await;
    (StatusCode::OK, Json(decision)).into_response()
}

/// Build the onboarding REST routes.
pub fn onboarding_routes(state: OnboardingRouteState) -> Router {
    Router::new()
        .route("/api/onboarding/{role}/chat", post(chat))
        .route("/api/onboarding/{role}/resume-profile", post(resume_profile))
        .route("/api/auth/complete", post(auth_complete))
        .route("/api/consent/{user_id}", get(get_consent).post(post_consent))
        .route("/api/redirect", get(redirect))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    use crate::config::AppConfig;
    use crate::onboarding::test_support::ScriptedLlm;
    use crate::store::{Database, LibSqlBackend};
    use crate::tools::OperationRegistry;

    async fn app() -> Router {
        let db: Arc<dyn Database> = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        let service = Arc::new(OnboardingService::new(
            Arc::new(ScriptedLlm::new(vec![])),
            Arc::new(OperationRegistry::new()),
            db,
            &AppConfig::default(),
        ));
        onboarding_routes(OnboardingRouteState { service })
    }

    #[tokio::test]
    async fn unknown_role_is_bad_request() {
        let req = Request::builder()
            .method("POST")
            .uri("/api/onboarding/admiral/chat")
            .header("content-type", "application/json")
            .body(Body::from(r#"{"message": "hi", "anon_id": "a1"}"#))
            .unwrap();
        let resp = app().await.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn consent_status_for_new_user() {
        let req = Request::builder()
            .uri("/api/consent/u1")
            .body(Body::empty())
            .unwrap();
        let resp = app().await.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[test]
    fn internal_errors_are_not_leaked() {
        let resp = error_response(Error::Database(crate::error::DatabaseError::Query(
            "SELECT secret FROM table".into(),
        )));
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn consent_errors_are_forbidden() {
        let resp = error_response(Error::Consent(crate::error::ConsentError::Incomplete {
            user_id: "u1".into(),
        }));
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    }

    #[test]
    fn referral_parsing() {
        assert_eq!(parse_referral(None).unwrap(), None);
        assert_eq!(parse_referral(Some("  ")).unwrap(), None);
        assert_eq!(
            parse_referral(Some("crew")).unwrap(),
            Some(ReferralSource::Prospect)
        );
        assert!(parse_referral(Some("captain")).is_err());
        assert!(parse_role("admin").is_err());
    }
}
