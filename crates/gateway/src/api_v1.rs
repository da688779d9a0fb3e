//! v1 admin API: users, dashboards, assignments, sweeps, notifications
//! and periodic tasks.
//!
//! Every handler is a thin shell over a lifecycle service. Domain errors map
//! to status codes in one place ([`api_error`]).

use axum::{
    Router,
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
    routing::{delete, get, patch, post},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info};

use dashkeep_core::assignment::{Assignment, AssignmentRequest};
use dashkeep_core::directory::{Dashboard, User, UserId};
use dashkeep_core::error::Error;
use dashkeep_core::notification::{InAppNotification, NotificationRecord, ThresholdClass};
use dashkeep_lifecycle::{
    AssignOutcome, ExpiredGroup, Lifecycle, SweepOutcome, SweepStats, ThresholdRunReport, UserRemoval,
};
use dashkeep_workflow::{PeriodicTask, WorkflowEngine};

/// Shared state for the v1 API.
pub struct ApiState {
    pub lifecycle: Lifecycle,
    /// Absent when the process runs without periodic tasks
    pub workflow: Option<Arc<WorkflowEngine>>,
    /// Accepted bearer tokens; empty leaves the API open
    pub admin_tokens: Vec<String>,
}

pub type SharedApiState = Arc<ApiState>;

/// Build the v1 API router.
pub fn v1_router(state: SharedApiState) -> Router {
    Router::new()
        // Users
        .route("/users", post(create_user_handler))
        .route("/users/{id}", get(get_user_handler).delete(delete_user_handler))
        .route(
            "/users/{id}/assignments",
            get(list_assignments_handler)
                .post(assign_handler)
                .delete(unassign_handler),
        )
        .route("/users/{id}/notifications", get(list_notifications_handler))
        .route("/users/{id}/notification-history", get(notification_history_handler))
        // Dashboards
        .route("/dashboards", get(list_dashboards_handler).post(register_dashboard_handler))
        .route("/dashboards/{id}", delete(delete_dashboard_handler))
        // Cross-user views
        .route("/assignments/expired", get(list_expired_handler))
        // Sweeps
        .route("/sweeps", post(run_sweep_handler))
        .route("/sweeps/stats", get(sweep_stats_handler))
        .route("/sweeps/preview", get(sweep_preview_handler))
        // Notifications
        .route("/notifications/run/{class}", post(run_notifications_handler))
        // Periodic tasks
        .route("/tasks", get(list_tasks_handler))
        .route("/tasks/{id}", patch(update_task_handler))
        .with_state(state)
}

// ── Errors ────────────────────────────────────────────────────────────────

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn error_response(status: StatusCode, message: impl Into<String>) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            error: message.into(),
        }),
    )
}

/// NotFound → 404, Validation → 400, anything else → 500.
fn api_error(err: Error) -> ApiError {
    let status = match &err {
        Error::NotFound { .. } => StatusCode::NOT_FOUND,
        Error::Validation(_) => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    if status.is_server_error() {
        error!(error = %err, "Request failed");
    }
    error_response(status, err.to_string())
}

fn workflow(state: &ApiState) -> Result<&Arc<WorkflowEngine>, ApiError> {
    state
        .workflow
        .as_ref()
        .ok_or_else(|| error_response(StatusCode::SERVICE_UNAVAILABLE, "Workflow engine not available"))
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ActionResponse {
    pub success: bool,
    pub message: String,
}

// ── Users ─────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct CreateUserRequest {
    /// Caller-chosen id; generated when absent
    #[serde(default)]
    id: Option<String>,
    email: String,
    #[serde(default)]
    name: String,
}

async fn create_user_handler(
    State(state): State<SharedApiState>,
    Json(req): Json<CreateUserRequest>,
) -> Result<(StatusCode, Json<User>), ApiError> {
    let user = state
        .lifecycle
        .assignments
        .create_user(req.id.map(UserId::new), &req.email, &req.name)
        .await
        .map_err(api_error)?;
    Ok((StatusCode::CREATED, Json(user)))
}

async fn get_user_handler(
    State(state): State<SharedApiState>,
    Path(id): Path<String>,
) -> Result<Json<User>, ApiError> {
    let user = state
        .lifecycle
        .assignments
        .get_user(&UserId::new(id))
        .await
        .map_err(api_error)?;
    Ok(Json(user))
}

async fn delete_user_handler(
    State(state): State<SharedApiState>,
    Path(id): Path<String>,
) -> Result<Json<UserRemoval>, ApiError> {
    let removal = state
        .lifecycle
        .assignments
        .delete_user(&UserId::new(id))
        .await
        .map_err(api_error)?;
    Ok(Json(removal))
}

// ── Dashboards ────────────────────────────────────────────────────────────

#[derive(Debug, Serialize, Deserialize)]
pub struct DashboardListResponse {
    pub dashboards: Vec<Dashboard>,
    pub count: usize,
}

async fn register_dashboard_handler(
    State(state): State<SharedApiState>,
    Json(dashboard): Json<Dashboard>,
) -> Result<(StatusCode, Json<Dashboard>), ApiError> {
    let dashboard = state
        .lifecycle
        .assignments
        .register_dashboard(dashboard)
        .await
        .map_err(api_error)?;
    Ok((StatusCode::CREATED, Json(dashboard)))
}

async fn list_dashboards_handler(
    State(state): State<SharedApiState>,
) -> Result<Json<DashboardListResponse>, ApiError> {
    let dashboards = state
        .lifecycle
        .assignments
        .list_dashboards()
        .await
        .map_err(api_error)?;
    Ok(Json(DashboardListResponse {
        count: dashboards.len(),
        dashboards,
    }))
}

async fn delete_dashboard_handler(
    State(state): State<SharedApiState>,
    Path(id): Path<String>,
) -> Result<Json<ActionResponse>, ApiError> {
    state
        .lifecycle
        .assignments
        .delete_dashboard(&id)
        .await
        .map_err(api_error)?;
    Ok(Json(ActionResponse {
        success: true,
        message: format!("Dashboard '{id}' removed"),
    }))
}

// ── Assignments ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssignmentStatus {
    #[default]
    Active,
    Expired,
}

#[derive(Debug, Default, Deserialize)]
struct AssignmentQuery {
    #[serde(default)]
    status: AssignmentStatus,
    #[serde(default)]
    as_of: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AssignmentListResponse {
    pub user_id: UserId,
    pub status: AssignmentStatus,
    pub assignments: Vec<Assignment>,
    pub count: usize,
}

#[derive(Debug, Deserialize)]
struct AssignRequest {
    assignments: Vec<AssignmentRequest>,
}

#[derive(Debug, Deserialize)]
struct UnassignRequest {
    resource_refs: Vec<String>,
}

async fn assign_handler(
    State(state): State<SharedApiState>,
    Path(id): Path<String>,
    Json(req): Json<AssignRequest>,
) -> Result<Json<AssignOutcome>, ApiError> {
    let outcome = state
        .lifecycle
        .assignments
        .assign(&UserId::new(id), req.assignments)
        .await
        .map_err(api_error)?;
    Ok(Json(outcome))
}

async fn unassign_handler(
    State(state): State<SharedApiState>,
    Path(id): Path<String>,
    Json(req): Json<UnassignRequest>,
) -> Result<Json<AssignmentListResponse>, ApiError> {
    let user_id = UserId::new(id);
    let assignments = state
        .lifecycle
        .assignments
        .unassign(&user_id, &req.resource_refs)
        .await
        .map_err(api_error)?;
    Ok(Json(AssignmentListResponse {
        user_id,
        status: AssignmentStatus::Active,
        count: assignments.len(),
        assignments,
    }))
}

async fn list_assignments_handler(
    State(state): State<SharedApiState>,
    Path(id): Path<String>,
    Query(query): Query<AssignmentQuery>,
) -> Result<Json<AssignmentListResponse>, ApiError> {
    let user_id = UserId::new(id);
    let service = &state.lifecycle.assignments;
    let assignments = match query.status {
        AssignmentStatus::Active => service.list_active(&user_id, query.as_of).await,
        AssignmentStatus::Expired => service.list_expired_for_user(&user_id, query.as_of).await,
    }
    .map_err(api_error)?;
    Ok(Json(AssignmentListResponse {
        user_id,
        status: query.status,
        count: assignments.len(),
        assignments,
    }))
}

#[derive(Debug, Default, Deserialize)]
struct AsOfQuery {
    #[serde(default)]
    as_of: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
pub struct ExpiredOverviewResponse {
    pub groups: Vec<ExpiredGroup>,
    /// Users with at least one expired assignment
    pub users: usize,
    /// Expired assignments across all users
    pub total: usize,
}

async fn list_expired_handler(
    State(state): State<SharedApiState>,
    Query(query): Query<AsOfQuery>,
) -> Result<Json<ExpiredOverviewResponse>, ApiError> {
    let groups = state
        .lifecycle
        .assignments
        .list_expired(query.as_of)
        .await
        .map_err(api_error)?;
    let total = groups.iter().map(|g| g.assignments.len()).sum();
    Ok(Json(ExpiredOverviewResponse {
        users: groups.len(),
        total,
        groups,
    }))
}

// ── Notifications ─────────────────────────────────────────────────────────

#[derive(Debug, Serialize, Deserialize)]
pub struct NotificationListResponse {
    pub notifications: Vec<InAppNotification>,
    pub count: usize,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct NotificationHistoryResponse {
    pub records: Vec<NotificationRecord>,
    pub count: usize,
}

async fn list_notifications_handler(
    State(state): State<SharedApiState>,
    Path(id): Path<String>,
) -> Result<Json<NotificationListResponse>, ApiError> {
    let notifications = state
        .lifecycle
        .assignments
        .notifications(&UserId::new(id))
        .await
        .map_err(api_error)?;
    Ok(Json(NotificationListResponse {
        count: notifications.len(),
        notifications,
    }))
}

async fn notification_history_handler(
    State(state): State<SharedApiState>,
    Path(id): Path<String>,
) -> Result<Json<NotificationHistoryResponse>, ApiError> {
    let user_id = UserId::new(id);
    state
        .lifecycle
        .assignments
        .get_user(&user_id)
        .await
        .map_err(api_error)?;
    let records = state.lifecycle.gate.history(&user_id).await.map_err(api_error)?;
    Ok(Json(NotificationHistoryResponse {
        count: records.len(),
        records,
    }))
}

async fn run_notifications_handler(
    State(state): State<SharedApiState>,
    Path(class): Path<String>,
) -> Result<Json<ThresholdRunReport>, ApiError> {
    let class: ThresholdClass = class
        .parse()
        .map_err(|e: String| error_response(StatusCode::BAD_REQUEST, e))?;

    info!(class = %class, "Manual threshold run requested");
    let report = state
        .lifecycle
        .scheduler
        .run_class(class)
        .await
        .map_err(api_error)?;
    Ok(Json(report))
}

// ── Sweeps ────────────────────────────────────────────────────────────────

/// Completed → 200, skipped because another sweep is running → 409.
async fn run_sweep_handler(
    State(state): State<SharedApiState>,
) -> Result<(StatusCode, Json<SweepOutcome>), ApiError> {
    info!("Manual sweep requested");
    let outcome = state.lifecycle.sweeper.run().await.map_err(api_error)?;
    let status = match outcome {
        SweepOutcome::Completed(_) => StatusCode::OK,
        SweepOutcome::Skipped => StatusCode::CONFLICT,
    };
    Ok((status, Json(outcome)))
}

async fn sweep_stats_handler(State(state): State<SharedApiState>) -> Json<SweepStats> {
    Json(state.lifecycle.sweeper.stats())
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SweepPreviewResponse {
    /// Assignments the next sweep would remove
    pub expired_count: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub as_of: Option<DateTime<Utc>>,
}

async fn sweep_preview_handler(
    State(state): State<SharedApiState>,
    Query(query): Query<AsOfQuery>,
) -> Result<Json<SweepPreviewResponse>, ApiError> {
    let expired_count = state
        .lifecycle
        .sweeper
        .expired_count(query.as_of)
        .await
        .map_err(api_error)?;
    Ok(Json(SweepPreviewResponse {
        expired_count,
        as_of: query.as_of,
    }))
}

// ── Periodic tasks ────────────────────────────────────────────────────────

#[derive(Debug, Serialize, Deserialize)]
pub struct TaskListResponse {
    pub tasks: Vec<PeriodicTask>,
    pub count: usize,
}

#[derive(Debug, Deserialize)]
struct UpdateTaskRequest {
    enabled: bool,
}

async fn list_tasks_handler(
    State(state): State<SharedApiState>,
) -> Result<Json<TaskListResponse>, ApiError> {
    let tasks = workflow(&state)?.list_tasks().await;
    Ok(Json(TaskListResponse {
        count: tasks.len(),
        tasks,
    }))
}

async fn update_task_handler(
    State(state): State<SharedApiState>,
    Path(id): Path<String>,
    Json(req): Json<UpdateTaskRequest>,
) -> Result<Json<ActionResponse>, ApiError> {
    let engine = workflow(&state)?;
    let found = if req.enabled {
        engine.resume_task(&id).await
    } else {
        engine.pause_task(&id).await
    };

    if !found {
        return Err(error_response(
            StatusCode::NOT_FOUND,
            format!("Task '{id}' not found"),
        ));
    }

    let verb = if req.enabled { "resumed" } else { "paused" };
    info!(task = %id, "Task {verb}");
    Ok(Json(ActionResponse {
        success: true,
        message: format!("Task '{id}' {verb}"),
    }))
}

// ── Tests ─────────────────────────────────────────────────────────────────

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use chrono::{Duration, SecondsFormat, TimeZone};
    use dashkeep_config::AppConfig;
    use dashkeep_core::clock::{Clock, ManualClock};
    use dashkeep_core::event::EventBus;
    use dashkeep_core::notification::TemplateKind;
    use dashkeep_notify::OutboxMailer;
    use dashkeep_store::Stores;
    use http_body_util::BodyExt;
    use serde_json::{Value, json};
    use tower::ServiceExt;

    pub(crate) struct Harness {
        pub state: SharedApiState,
        pub clock: Arc<ManualClock>,
        pub outbox: Arc<OutboxMailer>,
    }

    pub(crate) async fn harness(admin_tokens: Vec<String>) -> Harness {
        let config = AppConfig::default();
        let stores = Stores::in_memory();
        let outbox = Arc::new(OutboxMailer::new());
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2026, 3, 2, 8, 0, 0).unwrap(),
        ));
        let lifecycle = Lifecycle::new(
            &stores,
            outbox.clone(),
            clock.clone(),
            Arc::new(EventBus::default()),
            &config,
        );

        let engine = Arc::new(WorkflowEngine::new(clock.clone()));
        engine
            .load_tasks(dashkeep_workflow::tasks_from_config(&config))
            .await;

        for (id, name) in [("sales", "Sales"), ("ops", "Ops")] {
            lifecycle
                .assignments
                .register_dashboard(Dashboard::new(id, name, format!("/d/{id}")))
                .await
                .unwrap();
        }
        lifecycle
            .assignments
            .create_user(Some(UserId::new("u1")), "ada@example.com", "Ada")
            .await
            .unwrap();

        Harness {
            state: Arc::new(ApiState {
                lifecycle,
                workflow: Some(engine),
                admin_tokens,
            }),
            clock,
            outbox,
        }
    }

    async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let builder = Request::builder().method(method).uri(uri);
        let req = match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = app.clone().oneshot(req).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, json)
    }

    fn rfc3339(dt: DateTime<Utc>) -> String {
        dt.to_rfc3339_opts(SecondsFormat::Secs, true)
    }

    #[tokio::test]
    async fn create_get_and_delete_user() {
        let h = harness(Vec::new()).await;
        let app = v1_router(h.state.clone());

        let (status, json) = send(
            &app,
            "POST",
            "/users",
            Some(json!({"id": "u2", "email": "grace@example.com", "name": "Grace"})),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(json["id"], "u2");

        let (status, json) = send(&app, "GET", "/users/u2", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["email"], "grace@example.com");

        let (status, _) = send(
            &app,
            "POST",
            "/users",
            Some(json!({"id": "u2", "email": "grace@example.com"})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, json) = send(&app, "DELETE", "/users/u2", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["notification_records"], 0);

        let (status, json) = send(&app, "GET", "/users/u2", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(json["error"].as_str().unwrap().contains("u2"));
    }

    #[tokio::test]
    async fn invalid_email_is_bad_request() {
        let h = harness(Vec::new()).await;
        let app = v1_router(h.state);

        let (status, _) = send(&app, "POST", "/users", Some(json!({"email": "nope"}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn dashboard_catalog() {
        let h = harness(Vec::new()).await;
        let app = v1_router(h.state);

        let (status, _) = send(
            &app,
            "POST",
            "/dashboards",
            Some(json!({"id": "hr", "name": "HR", "url": "/d/hr"})),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);

        let (_, json) = send(&app, "GET", "/dashboards", None).await;
        assert_eq!(json["count"], 3);

        let (status, _) = send(&app, "DELETE", "/dashboards/hr", None).await;
        assert_eq!(status, StatusCode::OK);
        let (status, _) = send(&app, "DELETE", "/dashboards/hr", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn assign_list_and_unassign() {
        let h = harness(Vec::new()).await;
        let app = v1_router(h.state.clone());
        let expires = h.clock.now() + Duration::days(3);

        let (status, json) = send(
            &app,
            "POST",
            "/users/u1/assignments",
            Some(json!({"assignments": [
                {"resource_ref": "sales", "expires_at": rfc3339(expires)},
                {"resource_ref": "ops"}
            ]})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["email_sent"], true);
        assert_eq!(json["assignments"].as_array().unwrap().len(), 2);
        assert_eq!(h.outbox.sent_of(TemplateKind::AssignmentGranted).len(), 1);

        let (_, json) = send(&app, "GET", "/users/u1/assignments", None).await;
        assert_eq!(json["status"], "active");
        assert_eq!(json["count"], 2);

        let later = rfc3339(expires + Duration::hours(1));
        let (_, json) = send(
            &app,
            "GET",
            &format!("/users/u1/assignments?status=expired&as_of={later}"),
            None,
        )
        .await;
        assert_eq!(json["count"], 1);
        assert_eq!(json["assignments"][0]["resource_ref"], "sales");

        let (_, json) = send(&app, "GET", &format!("/assignments/expired?as_of={later}"), None).await;
        assert_eq!(json["users"], 1);
        assert_eq!(json["total"], 1);

        let (status, json) = send(
            &app,
            "DELETE",
            "/users/u1/assignments",
            Some(json!({"resource_refs": ["ops"]})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["count"], 1);

        let (_, json) = send(&app, "GET", "/users/u1/notifications", None).await;
        assert_eq!(json["count"], 1);
        assert_eq!(json["notifications"][0]["kind"], "assignment");
    }

    #[tokio::test]
    async fn assign_errors_map_to_status_codes() {
        let h = harness(Vec::new()).await;
        let app = v1_router(h.state.clone());

        let (status, _) = send(
            &app,
            "POST",
            "/users/u1/assignments",
            Some(json!({"assignments": [{"resource_ref": "missing"}]})),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let past = rfc3339(h.clock.now() - Duration::hours(1));
        let (status, _) = send(
            &app,
            "POST",
            "/users/u1/assignments",
            Some(json!({"assignments": [{"resource_ref": "sales", "expires_at": past}]})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = send(
            &app,
            "POST",
            "/users/nobody/assignments",
            Some(json!({"assignments": [{"resource_ref": "sales"}]})),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = send(&app, "GET", "/users/u1/assignments?status=bogus", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn email_failure_still_assigns() {
        let h = harness(Vec::new()).await;
        let app = v1_router(h.state.clone());
        h.outbox.set_failing(true);

        let (status, json) = send(
            &app,
            "POST",
            "/users/u1/assignments",
            Some(json!({"assignments": [{"resource_ref": "sales"}]})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["email_sent"], false);
        assert_eq!(json["granted"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn preview_then_sweep() {
        let h = harness(Vec::new()).await;
        let app = v1_router(h.state.clone());
        let expires = h.clock.now() + Duration::hours(1);
        send(
            &app,
            "POST",
            "/users/u1/assignments",
            Some(json!({"assignments": [
                {"resource_ref": "sales", "expires_at": rfc3339(expires)},
                {"resource_ref": "ops"}
            ]})),
        )
        .await;

        let (_, json) = send(&app, "GET", "/sweeps/preview", None).await;
        assert_eq!(json["expired_count"], 0);

        h.clock.advance(Duration::hours(2));
        let (_, json) = send(&app, "GET", "/sweeps/preview", None).await;
        assert_eq!(json["expired_count"], 1);

        let (status, json) = send(&app, "POST", "/sweeps", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["status"], "completed");
        assert_eq!(json["removed"], 1);
        assert_eq!(json["users_affected"], 1);

        let (_, json) = send(&app, "POST", "/sweeps", None).await;
        assert_eq!(json["removed"], 0);

        let (_, json) = send(&app, "GET", "/sweeps/stats", None).await;
        assert_eq!(json["total_runs"], 2);
        assert_eq!(json["total_removed"], 1);
        assert_eq!(json["is_running"], false);
    }

    #[tokio::test]
    async fn manual_threshold_run_is_deduplicated() {
        let h = harness(Vec::new()).await;
        let app = v1_router(h.state.clone());
        let expires = h.clock.now() + Duration::hours(12);
        send(
            &app,
            "POST",
            "/users/u1/assignments",
            Some(json!({"assignments": [{"resource_ref": "sales", "expires_at": rfc3339(expires)}]})),
        )
        .await;

        let (status, json) = send(&app, "POST", "/notifications/run/urgent-24h", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["class"], "urgent-24h");
        assert_eq!(json["notified"], 1);

        let (_, json) = send(&app, "POST", "/notifications/run/urgent-24h", None).await;
        assert_eq!(json["notified"], 0);
        assert_eq!(json["suppressed"], 1);
        assert_eq!(h.outbox.sent_of(TemplateKind::ExpiryUrgent).len(), 1);

        let (_, json) = send(&app, "GET", "/users/u1/notification-history", None).await;
        assert_eq!(json["count"], 1);
        assert_eq!(json["records"][0]["threshold_class"], "urgent-24h");

        let (status, _) = send(&app, "POST", "/notifications/run/weekly", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn list_and_pause_tasks() {
        let h = harness(Vec::new()).await;
        let app = v1_router(h.state.clone());

        let (status, json) = send(&app, "GET", "/tasks", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["count"], 5);

        let (status, _) = send(&app, "PATCH", "/tasks/sweep", Some(json!({"enabled": false}))).await;
        assert_eq!(status, StatusCode::OK);
        let engine = h.state.workflow.clone().unwrap();
        assert!(!engine.get_task("sweep").await.unwrap().enabled);

        let (status, _) = send(&app, "PATCH", "/tasks/nope", Some(json!({"enabled": true}))).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn tasks_unavailable_without_engine() {
        let h = harness(Vec::new()).await;
        let state = Arc::new(ApiState {
            lifecycle: h.state.lifecycle.clone(),
            workflow: None,
            admin_tokens: Vec::new(),
        });
        let app = v1_router(state);

        let (status, _) = send(&app, "GET", "/tasks", None).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    }
}
