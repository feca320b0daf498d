//! Axum router configuration with middleware.
//!
//! All routes are under `/api/v1/`.
//! Middleware: CORS, tracing.

use axum::routing::get;
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::http::handlers;
use crate::state::AppState;

/// Build the complete API router with all routes and middleware.
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let api_routes = Router::new()
        .route("/health", get(handlers::health::health))
        .merge(handlers::trigger::trigger_routes())
        .merge(handlers::execution::execution_routes())
        .merge(handlers::approval::approval_routes())
        .merge(handlers::workflow::workflow_routes());

    Router::new()
        .nest("/api/v1", api_routes)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use chrono::Utc;
    use opsflow_core::repository::trigger::TriggerRepository;
    use opsflow_core::service::TokenHasher;
    use opsflow_infra::crypto::Sha256TokenHasher;
    use opsflow_types::trigger::{TriggerKind, TriggerRecord};
    use serde_json::Value;
    use tower::ServiceExt;
    use uuid::Uuid;

    use crate::cli::workflow::publish_yaml;
    use crate::state::tests::test_state;

    const BUNDLE: &str = r#"
name: notify
organizationId: org-1
steps:
  - slug: start
    type: start
"#;

    async fn webhook_fixture(state: &AppState) -> String {
        let definition = publish_yaml(state, BUNDLE).await.unwrap();
        let token = "whk_router_test";
        state
            .store
            .save_trigger(&TriggerRecord {
                id: Uuid::now_v7(),
                organization_id: "org-1".into(),
                workflow_root_id: definition.root_id,
                kind: TriggerKind::Webhook {
                    token_hash: Sha256TokenHasher::new().hash_token(token),
                    signing_secret: None,
                },
                is_active: true,
                last_triggered_at: None,
                created_at: Utc::now(),
            })
            .await
            .unwrap();
        token.to_string()
    }

    async fn body_json(response: axum::response::Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn hook(token: &str, key: Option<&str>) -> Request<Body> {
        let mut builder = Request::post(format!("/api/v1/hooks/{token}"))
            .header("content-type", "application/json");
        if let Some(key) = key {
            builder = builder.header("idempotency-key", key);
        }
        builder.body(Body::from(r#"{"amount": 5}"#)).unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let router = build_router(test_state(None).await);
        let response = router
            .oneshot(Request::get("/api/v1/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["data"]["status"], "ok");
    }

    #[tokio::test]
    async fn test_webhook_accepts_then_dedupes() {
        let state = test_state(None).await;
        let token = webhook_fixture(&state).await;
        let router = build_router(state);

        let first = router.clone().oneshot(hook(&token, Some("evt-42"))).await.unwrap();
        assert_eq!(first.status(), StatusCode::ACCEPTED);
        let first = body_json(first).await;
        assert_eq!(first["data"]["status"], "accepted");

        let second = router.oneshot(hook(&token, Some("evt-42"))).await.unwrap();
        assert_eq!(second.status(), StatusCode::OK);
        let second = body_json(second).await;
        assert_eq!(second["data"]["status"], "duplicate");
        assert_eq!(second["data"]["executionId"], first["data"]["executionId"]);
    }

    #[tokio::test]
    async fn test_webhook_without_key_is_rejected() {
        let state = test_state(None).await;
        let token = webhook_fixture(&state).await;
        let response = build_router(state).oneshot(hook(&token, None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body_json(response).await["data"]["reason"], "missing idempotency key");
    }

    #[tokio::test]
    async fn test_unknown_webhook_token_is_not_found() {
        let router = build_router(test_state(None).await);
        let response = router.oneshot(hook("whk_nope", Some("k"))).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(body_json(response).await["errors"][0]["code"], "TRIGGER_NOT_FOUND");
    }

    #[tokio::test]
    async fn test_admin_routes_require_token() {
        let router = build_router(test_state(Some("admin-secret")).await);

        let anonymous = router
            .clone()
            .oneshot(Request::get("/api/v1/orgs/org-1/executions").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(anonymous.status(), StatusCode::UNAUTHORIZED);

        let authorized = router
            .oneshot(
                Request::get("/api/v1/orgs/org-1/executions")
                    .header("authorization", "Bearer admin-secret")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(authorized.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_manual_start_and_show() {
        let state = test_state(Some("t")).await;
        let definition = publish_yaml(&state, BUNDLE).await.unwrap();
        let router = build_router(state);

        let started = router
            .clone()
            .oneshot(
                Request::post(format!("/api/v1/orgs/org-1/workflows/{}/executions", definition.root_id))
                    .header("authorization", "Bearer t")
                    .body(Body::from(r#"{"note": "hi"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(started.status(), StatusCode::ACCEPTED);
        let started = body_json(started).await;
        let id = started["data"]["id"].as_str().unwrap().to_string();
        assert_eq!(started["data"]["variables"]["note"], "hi");

        let shown = router
            .oneshot(
                Request::get(format!("/api/v1/orgs/org-1/executions/{id}"))
                    .header("x-api-key", "t")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(shown.status(), StatusCode::OK);
        assert_eq!(body_json(shown).await["data"]["id"], id.as_str());
    }

    #[tokio::test]
    async fn test_unknown_approval_is_not_found() {
        let router = build_router(test_state(Some("t")).await);
        let response = router
            .oneshot(
                Request::post(format!("/api/v1/orgs/org-1/approvals/{}/approve", Uuid::now_v7()))
                    .header("authorization", "Bearer t")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(body_json(response).await["errors"][0]["code"], "APPROVAL_NOT_FOUND");
    }
}
