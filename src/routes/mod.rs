use axum::http::HeaderValue;
use axum::{
    extract::DefaultBodyLimit,
    middleware,
    routing::{delete, get, patch, post},
    Router,
};
use tower_http::cors::{AllowHeaders, AllowMethods, AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::warn;

use crate::{auth::AuthenticatedUser, state::AppState};

pub mod admin;
pub mod auth;
pub mod document_types;
pub mod documents;
pub mod health;
pub mod versions;

const MAX_UPLOAD_BYTES: usize = 1024 * 1024 * 100;

fn cors_layer(allowed: Option<&String>) -> CorsLayer {
    let allow_origin = match allowed {
        Some(origins) => {
            let headers: Vec<HeaderValue> = origins
                .split(',')
                .map(str::trim)
                .filter(|value| !value.is_empty())
                .filter_map(|value| match value.parse::<HeaderValue>() {
                    Ok(header) => Some(header),
                    Err(_) => {
                        warn!(origin = %value, "ignoring invalid CORS origin");
                        None
                    }
                })
                .collect();
            AllowOrigin::list(headers)
        }
        None => AllowOrigin::mirror_request(),
    };

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods(AllowMethods::mirror_request())
        .allow_headers(AllowHeaders::mirror_request())
        .allow_credentials(true)
}

pub fn create_router(state: AppState) -> Router<()> {
    let cors = cors_layer(state.config.cors_allowed_origin.as_ref());

    let auth_routes = Router::new()
        .route("/login", post(auth::login))
        .route("/me", get(auth::me));

    let document_type_routes = Router::new()
        .route(
            "/",
            get(document_types::list_document_types).post(document_types::create_document_type),
        )
        .route("/:id", patch(document_types::update_document_type));

    let documents_routes = Router::new()
        .route(
            "/",
            get(documents::list_documents).post(documents::create_document),
        )
        .route("/:document_number", get(documents::get_document))
        .route("/:document_number/versions", post(documents::create_version))
        .route("/:document_number/audit", get(documents::get_document_audit));

    let versions_routes = Router::new()
        .route(
            "/:id",
            get(versions::get_version)
                .patch(versions::update_version)
                .delete(versions::delete_version),
        )
        .route("/:id/deletable", get(versions::check_deletable))
        .route("/:id/approvers", post(versions::assign_approvers))
        .route("/:id/approvers/:user_id", delete(versions::remove_approver))
        .route("/:id/submit", post(versions::submit_version))
        .route("/:id/decision", post(versions::record_decision))
        .route("/:id/release", post(versions::release_version))
        .route("/:id/promote", post(versions::promote_version))
        .route(
            "/:id/attachments",
            get(versions::list_attachments).post(versions::upload_attachment),
        )
        .route(
            "/:id/attachments/:attachment_id/download",
            get(versions::download_attachment),
        )
        .route("/:id/audit", get(versions::get_version_audit));

    let admin_routes = Router::new()
        .route("/versions/:id/status", post(admin::force_status))
        .route("/versions/:id/version", post(admin::force_version))
        .route(
            "/versions/:id/document-number",
            post(admin::force_document_number),
        )
        .route("/versions/:id/production", post(admin::force_production));

    let protected_state = state.clone();
    let protected_routes = Router::new()
        .nest("/api/document-types", document_type_routes)
        .nest("/api/documents", documents_routes)
        .nest("/api/versions", versions_routes)
        .nest("/api/admin", admin_routes)
        .layer(middleware::from_extractor_with_state::<AuthenticatedUser, _>(protected_state));

    Router::new()
        .merge(protected_routes)
        .nest("/api/auth", auth_routes)
        .route("/api/health", get(health::health_check))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
}
