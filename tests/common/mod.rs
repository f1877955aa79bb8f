use std::collections::HashMap;
use std::env;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, ensure, Context, Result};
use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use axum::Router;
use diesel::connection::SimpleConnection;
use diesel::prelude::*;
use diesel::PgConnection;
use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};
use doccontrol::auth::jwt::JwtService;
use doccontrol::auth::password::hash_password;
use doccontrol::config::AppConfig;
use doccontrol::db::{self, PgPool};
use doccontrol::models::{AuditEvent, Job, NewTenant, NewUser};
use doccontrol::routes;
use doccontrol::state::AppState;
use doccontrol::storage::ObjectStorage;
use doccontrol::workflow::labels::LabelOverflow;
use doccontrol::workflow::{Actor, Role};
use http_body_util::BodyExt;
use once_cell::sync::Lazy;
use serde::Serialize;
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tower::util::ServiceExt;
use uuid::Uuid;

const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");

static DB_LOCK: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

#[allow(dead_code)]
#[derive(Clone)]
pub struct StoredObject {
    pub key: String,
    pub bytes: Vec<u8>,
    pub content_type: Option<String>,
    pub content_disposition: Option<String>,
}

#[derive(Default)]
pub struct FakeStorage {
    objects: Mutex<HashMap<String, StoredObject>>,
}

#[async_trait]
impl ObjectStorage for FakeStorage {
    async fn put_object(
        &self,
        key: &str,
        bytes: Vec<u8>,
        content_type: Option<String>,
        content_disposition: Option<String>,
    ) -> Result<()> {
        let stored = StoredObject {
            key: key.to_string(),
            bytes,
            content_type,
            content_disposition,
        };
        let mut guard = self.objects.lock().await;
        guard.insert(stored.key.clone(), stored);
        Ok(())
    }

    async fn presign_get_object(&self, key: &str, expires_in: Duration) -> Result<String> {
        let guard = self.objects.lock().await;
        ensure!(guard.contains_key(key), "object {key} missing");
        Ok(format!(
            "https://fake-storage/{key}?expires_in={}",
            expires_in.as_secs()
        ))
    }

    async fn delete_object(&self, key: &str) -> Result<()> {
        let mut guard = self.objects.lock().await;
        guard.remove(key);
        Ok(())
    }
}

impl FakeStorage {
    #[allow(dead_code)]
    pub async fn get(&self, key: &str) -> Option<StoredObject> {
        let guard = self.objects.lock().await;
        guard.get(key).cloned()
    }

    #[allow(dead_code)]
    pub async fn object_count(&self) -> usize {
        let guard = self.objects.lock().await;
        guard.len()
    }
}

/// A logged-in user of the test tenant.
#[allow(dead_code)]
#[derive(Clone)]
pub struct TestUser {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub role: Role,
    pub token: String,
}

impl TestUser {
    #[allow(dead_code)]
    pub fn actor(&self) -> Actor {
        Actor::new(self.id, self.tenant_id, self.role)
    }
}

pub struct TestApp {
    pub state: AppState,
    router: Router,
    storage: Arc<FakeStorage>,
}

pub fn test_config(database_url: String) -> AppConfig {
    AppConfig {
        database_url,
        database_max_pool_size: 8,
        server_host: "127.0.0.1".to_string(),
        server_port: 0,
        jwt_secret: "test-secret".to_string(),
        jwt_issuer: "test-issuer".to_string(),
        jwt_audience: "test-audience".to_string(),
        jwt_expiry_minutes: 60,
        cors_allowed_origin: None,
        aws_endpoint_url: None,
        aws_access_key_id: None,
        aws_secret_access_key: None,
        aws_region: "us-east-1".to_string(),
        s3_bucket: "test-bucket".to_string(),
        attachment_url_expiry_seconds: 120,
        prototype_label_overflow: LabelOverflow::Extend,
        notification_webhook_url: None,
        worker_poll_interval_seconds: 1,
    }
}

impl TestApp {
    pub async fn new() -> Result<Self> {
        let database_url = env::var("TEST_DATABASE_URL")
            .context("TEST_DATABASE_URL must be set for integration tests")?;

        let config = test_config(database_url);
        let pool = db::init_pool_with_size(&config.database_url, config.database_max_pool_size)?;
        prepare_database(&pool).await?;

        let storage = Arc::new(FakeStorage::default());
        let storage_for_state: Arc<dyn ObjectStorage> = storage.clone();
        let jwt = JwtService::from_config(&config)?;
        let state = AppState::new(pool.clone(), config, storage_for_state, jwt);
        let router = routes::create_router(state.clone());

        Ok(Self {
            state,
            router,
            storage,
        })
    }

    pub async fn cleanup(&self) -> Result<()> {
        let pool = self.state.pool.clone();
        tokio::task::spawn_blocking(move || -> Result<()> {
            let mut conn = pool
                .get()
                .map_err(|err| anyhow!("failed to get cleanup connection: {err}"))?;
            truncate_all(&mut conn)?;
            Ok(())
        })
        .await
        .context("cleanup task panicked")?
    }

    #[allow(dead_code)]
    pub fn storage(&self) -> Arc<FakeStorage> {
        self.storage.clone()
    }

    pub async fn insert_tenant(&self, name: &str) -> Result<Uuid> {
        let name = name.to_string();
        self.with_conn(move |conn| {
            let tenant = NewTenant {
                id: Uuid::new_v4(),
                name,
            };
            diesel::insert_into(doccontrol::schema::tenants::table)
                .values(&tenant)
                .execute(conn)
                .context("failed to insert tenant")?;
            Ok(tenant.id)
        })
        .await
    }

    pub async fn insert_user(
        &self,
        tenant_id: Uuid,
        username: &str,
        password: &str,
        role: &str,
    ) -> Result<Uuid> {
        let username = username.to_string();
        let password = password.to_string();
        let role = role.to_string();
        self.with_conn(move |conn| {
            let password_hash = hash_password(&password)?;
            let user = NewUser {
                id: Uuid::new_v4(),
                tenant_id,
                username,
                password_hash,
                role,
            };
            diesel::insert_into(doccontrol::schema::users::table)
                .values(&user)
                .execute(conn)
                .context("failed to insert user")?;
            Ok(user.id)
        })
        .await
    }

    /// Inserts a user and logs them in.
    pub async fn user(&self, tenant_id: Uuid, username: &str, role: &str) -> Result<TestUser> {
        let password = format!("{username}-password");
        let id = self.insert_user(tenant_id, username, &password, role).await?;
        let token = self.login_token(username, &password).await?;
        Ok(TestUser {
            id,
            tenant_id,
            role: Role::parse(role),
            token,
        })
    }

    pub async fn login_token(&self, username: &str, password: &str) -> Result<String> {
        #[derive(Serialize)]
        struct LoginPayload<'a> {
            username: &'a str,
            password: &'a str,
        }

        let response = self
            .post_json(
                "/api/auth/login",
                &LoginPayload { username, password },
                None,
            )
            .await?;

        ensure!(
            response.status() == StatusCode::OK,
            "login failed with status {}",
            response.status()
        );

        let body = body_to_vec(response.into_body()).await?;
        #[derive(serde::Deserialize)]
        struct LoginResponse {
            access_token: String,
        }
        let parsed: LoginResponse = serde_json::from_slice(&body)?;
        Ok(parsed.access_token)
    }

    #[allow(dead_code)]
    pub async fn jobs_by_type(&self, ty: &str) -> Result<Vec<Job>> {
        let ty = ty.to_string();
        self.with_conn(move |conn| {
            use doccontrol::schema::jobs::dsl::{created_at, job_type as job_type_col, jobs};
            let rows = jobs
                .filter(job_type_col.eq(&ty))
                .order(created_at.asc())
                .load::<Job>(conn)
                .context("failed to load jobs")?;
            Ok(rows)
        })
        .await
    }

    #[allow(dead_code)]
    pub async fn audit_events(&self, document_number: &str) -> Result<Vec<AuditEvent>> {
        let document_number = document_number.to_string();
        self.with_conn(move |conn| {
            use doccontrol::schema::audit_events::dsl;
            let rows = dsl::audit_events
                .filter(dsl::document_number.eq(&document_number))
                .order(dsl::created_at.asc())
                .load::<AuditEvent>(conn)
                .context("failed to load audit events")?;
            Ok(rows)
        })
        .await
    }

    pub async fn post_json<T: Serialize + ?Sized>(
        &self,
        path: &str,
        payload: &T,
        token: Option<&str>,
    ) -> Result<hyper::Response<Body>> {
        self.send_json(Method::POST, path, payload, token).await
    }

    #[allow(dead_code)]
    pub async fn patch_json<T: Serialize + ?Sized>(
        &self,
        path: &str,
        payload: &T,
        token: Option<&str>,
    ) -> Result<hyper::Response<Body>> {
        self.send_json(Method::PATCH, path, payload, token).await
    }

    async fn send_json<T: Serialize + ?Sized>(
        &self,
        method: Method,
        path: &str,
        payload: &T,
        token: Option<&str>,
    ) -> Result<hyper::Response<Body>> {
        let body = serde_json::to_vec(payload)?;
        let mut builder = Request::builder()
            .method(method)
            .uri(path)
            .header("content-type", "application/json");
        if let Some(token) = token {
            builder = builder.header("authorization", format!("Bearer {token}"));
        }
        let request = builder.body(Body::from(body))?;
        Ok(self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("infallible response"))
    }

    pub async fn get(&self, path: &str, token: Option<&str>) -> Result<hyper::Response<Body>> {
        let mut builder = Request::builder().method(Method::GET).uri(path);
        if let Some(token) = token {
            builder = builder.header("authorization", format!("Bearer {token}"));
        }
        let request = builder.body(Body::empty())?;
        Ok(self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("infallible response"))
    }

    #[allow(dead_code)]
    pub async fn delete(&self, path: &str, token: Option<&str>) -> Result<hyper::Response<Body>> {
        let builder = Request::builder().method(Method::DELETE).uri(path);
        let builder = if let Some(token) = token {
            builder.header("authorization", format!("Bearer {token}"))
        } else {
            builder
        };
        let request = builder.body(Body::empty())?;
        Ok(self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("infallible response"))
    }

    #[allow(dead_code)]
    pub async fn upload_attachment(
        &self,
        version_id: Uuid,
        filename: &str,
        content_type: &str,
        data: &[u8],
        token: &str,
    ) -> Result<hyper::Response<Body>> {
        let boundary = format!("boundary-{}", Uuid::new_v4());
        let mut body = Vec::new();
        body.extend(format!("--{boundary}\r\n").as_bytes());
        body.extend(
            format!(
                "Content-Disposition: form-data; name=\"file\"; filename=\"{}\"\r\n",
                filename
            )
            .as_bytes(),
        );
        body.extend(format!("Content-Type: {}\r\n\r\n", content_type).as_bytes());
        body.extend(data);
        body.extend(b"\r\n");
        body.extend(format!("--{boundary}--\r\n").as_bytes());

        let request = Request::builder()
            .method(Method::POST)
            .uri(format!("/api/versions/{version_id}/attachments"))
            .header(
                "content-type",
                format!("multipart/form-data; boundary={boundary}"),
            )
            .header("authorization", format!("Bearer {token}"))
            .body(Body::from(body))?;
        Ok(self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("infallible response"))
    }

    /// Admin-only: creates a document type and returns its id.
    #[allow(dead_code)]
    pub async fn create_document_type(&self, admin: &TestUser, prefix: &str) -> Result<Uuid> {
        let response = self
            .post_json(
                "/api/document-types",
                &json!({ "prefix": prefix, "name": format!("{prefix} documents") }),
                Some(&admin.token),
            )
            .await?;
        let (status, body) = read_json(response).await?;
        ensure!(status == StatusCode::CREATED, "create type failed: {body}");
        id_of(&body)
    }

    /// Creates a document and returns its first version.
    #[allow(dead_code)]
    pub async fn create_document(
        &self,
        user: &TestUser,
        document_type_id: Uuid,
        title: &str,
        is_production: bool,
    ) -> Result<Value> {
        let response = self
            .post_json(
                "/api/documents",
                &json!({
                    "document_type_id": document_type_id,
                    "title": title,
                    "is_production": is_production,
                }),
                Some(&user.token),
            )
            .await?;
        let (status, body) = read_json(response).await?;
        ensure!(status == StatusCode::CREATED, "create document failed: {body}");
        Ok(body)
    }

    #[allow(dead_code)]
    pub async fn new_version(&self, user: &TestUser, document_number: &str) -> Result<Value> {
        let response = self
            .post_json(
                &format!("/api/documents/{document_number}/versions"),
                &json!({}),
                Some(&user.token),
            )
            .await?;
        let (status, body) = read_json(response).await?;
        ensure!(status == StatusCode::CREATED, "create version failed: {body}");
        Ok(body)
    }

    #[allow(dead_code)]
    pub async fn release(&self, user: &TestUser, version_id: Uuid) -> Result<(StatusCode, Value)> {
        let response = self
            .post_json(
                &format!("/api/versions/{version_id}/release"),
                &json!({}),
                Some(&user.token),
            )
            .await?;
        read_json(response).await
    }

    #[allow(dead_code)]
    pub async fn submit(
        &self,
        user: &TestUser,
        version_id: Uuid,
        approver_ids: &[Uuid],
    ) -> Result<(StatusCode, Value)> {
        let response = self
            .post_json(
                &format!("/api/versions/{version_id}/submit"),
                &json!({ "approver_ids": approver_ids }),
                Some(&user.token),
            )
            .await?;
        read_json(response).await
    }

    #[allow(dead_code)]
    pub async fn decide(
        &self,
        user: &TestUser,
        version_id: Uuid,
        decision: &str,
        comment: Option<&str>,
    ) -> Result<(StatusCode, Value)> {
        let response = self
            .post_json(
                &format!("/api/versions/{version_id}/decision"),
                &json!({ "decision": decision, "comment": comment }),
                Some(&user.token),
            )
            .await?;
        read_json(response).await
    }

    #[allow(dead_code)]
    pub async fn version(&self, user: &TestUser, version_id: Uuid) -> Result<Value> {
        let response = self
            .get(&format!("/api/versions/{version_id}"), Some(&user.token))
            .await?;
        let (status, body) = read_json(response).await?;
        ensure!(status == StatusCode::OK, "get version failed: {body}");
        Ok(body)
    }

    pub async fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut PgConnection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let pool = self.state.pool.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = pool
                .get()
                .map_err(|err| anyhow!("failed to get database connection: {err}"))?;
            f(&mut conn)
        })
        .await
        .context("connection task panicked")?
    }
}

pub async fn acquire_db_lock() -> tokio::sync::MutexGuard<'static, ()> {
    DB_LOCK.lock().await
}

pub async fn body_to_vec(body: Body) -> Result<Vec<u8>> {
    let collected = body
        .collect()
        .await
        .map_err(|err| anyhow!("failed to read response body: {err}"))?;
    Ok(collected.to_bytes().to_vec())
}

/// Status plus JSON body; empty bodies read as `null`.
pub async fn read_json(response: hyper::Response<Body>) -> Result<(StatusCode, Value)> {
    let status = response.status();
    let bytes = body_to_vec(response.into_body()).await?;
    if bytes.is_empty() {
        return Ok((status, Value::Null));
    }
    let value = serde_json::from_slice(&bytes)
        .with_context(|| format!("invalid JSON body: {}", String::from_utf8_lossy(&bytes)))?;
    Ok((status, value))
}

pub fn id_of(value: &Value) -> Result<Uuid> {
    let raw = value["id"]
        .as_str()
        .ok_or_else(|| anyhow!("missing id in {value}"))?;
    Ok(Uuid::parse_str(raw)?)
}

async fn prepare_database(pool: &PgPool) -> Result<()> {
    let pool = pool.clone();
    tokio::task::spawn_blocking(move || -> Result<()> {
        let mut conn = pool
            .get()
            .map_err(|err| anyhow!("failed to acquire connection: {err}"))?;
        conn.run_pending_migrations(MIGRATIONS)
            .map_err(|err| anyhow!("failed to run migrations: {err}"))?;
        truncate_all(&mut conn)?;
        Ok(())
    })
    .await
    .context("migration task panicked")?
}

fn truncate_all(conn: &mut PgConnection) -> Result<()> {
    conn.batch_execute(
        "TRUNCATE TABLE jobs, audit_events, attachments, approvers, document_versions, document_types, users, tenants RESTART IDENTITY CASCADE;",
    )
    .context("failed to truncate tables")?;
    Ok(())
}
