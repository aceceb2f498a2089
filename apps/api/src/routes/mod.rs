pub mod health;

use axum::{
    routing::{get, patch, post},
    Router,
};

use crate::contacts::handlers as contacts;
use crate::custom_fields::handlers as custom_fields;
use crate::state::AppState;
use crate::submissions::handlers as submissions;
use crate::sync::handlers as sync;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health_handler))
        // Contact Store
        .route(
            "/api/v1/contacts",
            get(contacts::handle_list_contacts).post(contacts::handle_create_contact),
        )
        .route(
            "/api/v1/contacts/:id",
            get(contacts::handle_get_contact).patch(contacts::handle_update_contact),
        )
        // Custom Field Registry
        .route(
            "/api/v1/custom-fields",
            get(custom_fields::handle_list_fields).post(custom_fields::handle_create_field),
        )
        .route(
            "/api/v1/custom-fields/:id",
            patch(custom_fields::handle_update_field)
                .delete(custom_fields::handle_delete_field),
        )
        // Submissions
        .route(
            "/api/v1/submissions/client-requests",
            post(submissions::handle_client_request),
        )
        .route(
            "/api/v1/submissions/interpreter-applications",
            post(submissions::handle_interpreter_application),
        )
        .route(
            "/api/v1/submissions/process",
            post(submissions::handle_process_pending),
        )
        .route(
            "/api/v1/submissions/watcher/start",
            post(submissions::handle_watcher_start),
        )
        .route(
            "/api/v1/submissions/watcher/stop",
            post(submissions::handle_watcher_stop),
        )
        // Fish CRM sync
        .route(
            "/api/v1/sync/config",
            get(sync::handle_get_config).put(sync::handle_save_config),
        )
        .route(
            "/api/v1/sync/test-connection",
            post(sync::handle_test_connection),
        )
        .route("/api/v1/sync/contacts/:id", post(sync::handle_sync_contact))
        .route("/api/v1/sync/bulk", post(sync::handle_bulk_sync))
        .route("/api/v1/sync/conflicts", get(sync::handle_get_conflicts))
        .route(
            "/api/v1/sync/conflicts/resolve",
            post(sync::handle_resolve_conflict),
        )
        .route("/api/v1/sync/logs", get(sync::handle_list_logs))
        .route("/api/v1/sync/stats", get(sync::handle_stats))
        .route(
            "/api/v1/sync/realtime/start",
            post(sync::handle_realtime_start),
        )
        .route(
            "/api/v1/sync/realtime/stop",
            post(sync::handle_realtime_stop),
        )
        .route("/api/v1/webhooks/fish", post(sync::handle_fish_webhook))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use axum::body::{to_bytes, Body};
    use axum::http::{header, Request, StatusCode};
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use super::build_router;
    use crate::models::sync::ConflictPolicy;
    use crate::state::testing::{configured_state, state, WEBHOOK_SECRET};
    use crate::sync::webhook::{sign, SIGNATURE_HEADER};

    async fn body_json(response: axum::response::Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn post_json(uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_health_reports_background_tasks() {
        let (state, _crm) = state();
        let response = build_router(state)
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["status"], "ok");
        assert_eq!(body["store"], "memory");
        assert_eq!(body["watcherRunning"], false);
    }

    #[tokio::test]
    async fn test_create_contact_returns_created() {
        let (state, _crm) = state();
        let response = build_router(state)
            .oneshot(post_json(
                "/api/v1/contacts",
                json!({ "type": "client", "name": "Ana Lopez", "email": "ana@example.com" }),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::CREATED);
        let body = body_json(response).await;
        assert_eq!(body["type"], "client");
        assert_eq!(body["version"], 1);
    }

    #[tokio::test]
    async fn test_patch_null_clears_phone() {
        let (state, _crm) = state();
        let mut new = crate::models::contact::NewContact::new(
            crate::models::contact::ContactType::Client,
            "Ana Lopez",
            "ana@example.com",
            crate::models::contact::ContactSource::Manual,
        );
        new.phone = Some("+34 600 000 000".into());
        let contact = state.contacts.create(new).await.unwrap();

        let request = Request::builder()
            .method("PATCH")
            .uri(format!("/api/v1/contacts/{}", contact.id))
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(
                json!({ "phone": null, "expectedVersion": contact.version }).to_string(),
            ))
            .unwrap();
        let response = build_router(state).oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert!(body.get("phone").is_none());
        assert_eq!(body["version"], contact.version + 1);
    }

    #[tokio::test]
    async fn test_unknown_contact_is_404() {
        let (state, _crm) = state();
        let uri = format!("/api/v1/contacts/{}", uuid::Uuid::new_v4());
        let response = build_router(state)
            .oneshot(Request::get(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let body = body_json(response).await;
        assert_eq!(body["error"]["code"], "NOT_FOUND");
    }

    #[tokio::test]
    async fn test_sync_config_is_redacted() {
        let (state, _crm) = configured_state(ConflictPolicy::Manual).await;
        let response = build_router(state)
            .oneshot(Request::get("/api/v1/sync/config").body(Body::empty()).unwrap())
            .await
            .unwrap();

        let body = body_json(response).await;
        assert_eq!(body["configured"], true);
        assert_eq!(body["config"]["apiKey"], "****_key");
    }

    #[tokio::test]
    async fn test_webhook_rejects_bad_signature() {
        let (state, _crm) = configured_state(ConflictPolicy::Manual).await;
        let request = Request::builder()
            .method("POST")
            .uri("/api/v1/webhooks/fish")
            .header(SIGNATURE_HEADER, "sha256=00")
            .body(Body::from(r#"{"event":"contact.deleted","data":{"id":"fish-1"}}"#))
            .unwrap();

        let response = build_router(state).oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_signed_webhook_for_unknown_contact_is_404() {
        let (state, _crm) = configured_state(ConflictPolicy::Manual).await;
        let body = r#"{"event":"contact.deleted","data":{"id":"fish-404"}}"#;
        let request = Request::builder()
            .method("POST")
            .uri("/api/v1/webhooks/fish")
            .header(SIGNATURE_HEADER, sign(WEBHOOK_SECRET, body.as_bytes()))
            .body(Body::from(body))
            .unwrap();

        let response = build_router(state).oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_client_request_submission_is_accepted() {
        let (state, _crm) = state();
        let store = state.store.clone();
        let response = build_router(state)
            .oneshot(post_json(
                "/api/v1/submissions/client-requests",
                json!({ "name": "Ana", "email": "ana@x.com", "serviceType": "Medical" }),
            ))
            .await
            .unwrap();

        assert!(response.status().is_success());
        let pending = store
            .list_unprocessed(crate::models::submission::SubmissionKind::ClientRequest)
            .await
            .unwrap();
        assert_eq!(pending.len(), 1);
    }
}
