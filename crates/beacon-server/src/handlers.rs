//! HTTP request handlers for the Beacon service.
//!
//! Every handler runs its engine call on the blocking pool, since store
//! access is synchronous.

use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Path, Query, State,
    },
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, patch, post},
    Router as AxumRouter,
};
use beacon_domain::{
    Alert, AlertId, AlertQuery, AlertStatus, CohortTrendPoint, Effectiveness, Intervention,
    InterventionId, InterventionStatus, NewIntervention, OutcomeDelta, RiskFactorSample,
    RiskProfile, Student, StudentId,
};
use beacon_engine::{EngineError, RiskService, SampleInput};
use beacon_trends::{TrendAggregator, TrendError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    /// Student, alert and intervention operations
    pub service: Arc<RiskService>,
    /// Cohort trend rollups
    pub trends: Arc<TrendAggregator>,
}

/// Enrollment request
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnrollRequest {
    /// Registrar identifier
    pub id: String,
    /// Grade level (0-12)
    pub grade_level: u8,
    /// Enrollment time, defaults to now
    #[serde(default)]
    pub enrolled_at: Option<DateTime<Utc>>,
}

/// Response to a recorded factor sample
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SampleResponse {
    /// Sample as stored
    pub sample: RiskFactorSample,
    /// Profile after the write
    pub profile: RiskProfile,
    /// Alerts created or refreshed by the write
    pub alerts: Vec<Alert>,
}

/// Alert transition request
#[derive(Debug, Deserialize)]
pub struct AlertTransitionRequest {
    /// Target status
    pub to: AlertStatus,
    /// Who made the change
    #[serde(default)]
    pub actor: Option<String>,
}

/// Alert assignment request
#[derive(Debug, Deserialize)]
pub struct AssignRequest {
    /// Staff member taking the alert
    pub assignee: String,
}

/// Progress update
#[derive(Debug, Deserialize)]
pub struct ProgressRequest {
    /// Progress percentage (0-100)
    pub progress: f64,
    /// Outcome counts to add
    #[serde(default)]
    pub outcome: OutcomeDelta,
    /// Version the caller last read
    pub version: u64,
}

/// Expense entry
#[derive(Debug, Deserialize)]
pub struct ExpenseRequest {
    /// Amount spent
    pub amount: f64,
    /// Version the caller last read
    pub version: u64,
}

/// Budget increase
#[derive(Debug, Deserialize)]
pub struct BudgetRequest {
    /// New approved budget
    pub budget: f64,
    /// Version the caller last read
    pub version: u64,
}

/// Intervention lifecycle change
#[derive(Debug, Deserialize)]
pub struct InterventionTransitionRequest {
    /// Target status
    pub to: InterventionStatus,
    /// Version the caller last read
    pub version: u64,
}

/// Cohort trend range (inclusive)
#[derive(Debug, Deserialize)]
pub struct TrendRange {
    /// First instant of interest
    pub from: DateTime<Utc>,
    /// Last instant of interest
    pub to: DateTime<Utc>,
}

/// Health check response
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthCheckResponse {
    /// Overall health status
    pub status: String,
    /// Students on record, archived included
    pub student_count: usize,
    /// Alerts currently active
    pub active_alerts: usize,
    /// Interventions on record
    pub intervention_count: usize,
}

/// Error response
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Stable error kind
    pub error: String,
    /// Human-readable detail
    pub message: String,
}

/// Application error type
#[derive(Debug)]
pub enum AppError {
    /// Engine rejected the request
    Engine(EngineError),
    /// Trend rollup failed
    Trend(TrendError),
    /// Request body or query could not be read
    BadRequest(String),
    /// Internal server error
    Internal(String),
}

impl AppError {
    fn parts(&self) -> (StatusCode, &'static str, String) {
        match self {
            AppError::Engine(e) => (engine_status(e), e.kind(), e.to_string()),
            AppError::Trend(TrendError::Engine(e)) => (engine_status(e), e.kind(), e.to_string()),
            AppError::Trend(e @ TrendError::Store(_)) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "StoreError", e.to_string())
            }
            AppError::Trend(e) => (StatusCode::INTERNAL_SERVER_ERROR, "Internal", e.to_string()),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "InvalidValue", msg.clone()),
            AppError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, "Internal", msg.clone()),
        }
    }
}

fn engine_status(e: &EngineError) -> StatusCode {
    match e {
        EngineError::NotFound(_) => StatusCode::NOT_FOUND,
        EngineError::InvalidValue(_) => StatusCode::BAD_REQUEST,
        EngineError::InvalidTransition { .. } | EngineError::ConcurrentModification(_) => {
            StatusCode::CONFLICT
        }
        EngineError::BudgetExceeded { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        EngineError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, kind, message) = self.parts();
        if status.is_server_error() {
            tracing::error!(error = kind, "{}", message);
        }

        let body = Json(ErrorResponse {
            error: kind.to_string(),
            message,
        });
        (status, body).into_response()
    }
}

impl From<EngineError> for AppError {
    fn from(e: EngineError) -> Self {
        AppError::Engine(e)
    }
}

impl From<TrendError> for AppError {
    fn from(e: TrendError) -> Self {
        AppError::Trend(e)
    }
}

impl From<JsonRejection> for AppError {
    fn from(e: JsonRejection) -> Self {
        AppError::BadRequest(e.body_text())
    }
}

impl From<QueryRejection> for AppError {
    fn from(e: QueryRejection) -> Self {
        AppError::BadRequest(e.body_text())
    }
}

/// Run a store-backed call on the blocking pool
async fn blocking<T, F>(f: F) -> Result<T, AppError>
where
    F: FnOnce() -> Result<T, AppError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| AppError::Internal(format!("Handler task failed: {}", e)))?
}

fn student_id(raw: &str) -> Result<StudentId, AppError> {
    StudentId::new(raw).map_err(AppError::BadRequest)
}

fn alert_id(raw: &str) -> Result<AlertId, AppError> {
    AlertId::from_string(raw).map_err(AppError::BadRequest)
}

fn intervention_id(raw: &str) -> Result<InterventionId, AppError> {
    InterventionId::from_string(raw).map_err(AppError::BadRequest)
}

/// POST /students - Enroll a student
async fn enroll_student(
    State(state): State<AppState>,
    body: Result<Json<EnrollRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<Student>), AppError> {
    let Json(request) = body?;
    let id = student_id(&request.id)?;
    let student = blocking(move || {
        Ok(state
            .service
            .enroll_student(id, request.grade_level, request.enrolled_at)?)
    })
    .await?;
    Ok((StatusCode::CREATED, Json(student)))
}

/// GET /students/:id
async fn get_student(
    State(state): State<AppState>,
    Path(raw): Path<String>,
) -> Result<Json<Student>, AppError> {
    let id = student_id(&raw)?;
    let student = blocking(move || Ok(state.service.get_student(&id)?)).await?;
    Ok(Json(student))
}

/// POST /students/:id/archive
async fn archive_student(
    State(state): State<AppState>,
    Path(raw): Path<String>,
) -> Result<Json<Student>, AppError> {
    let id = student_id(&raw)?;
    let student = blocking(move || Ok(state.service.archive_student(&id)?)).await?;
    Ok(Json(student))
}

/// GET /students/:id/risk-profile
async fn risk_profile(
    State(state): State<AppState>,
    Path(raw): Path<String>,
) -> Result<Json<RiskProfile>, AppError> {
    let id = student_id(&raw)?;
    let profile = blocking(move || Ok(state.service.profile(&id)?)).await?;
    Ok(Json(profile))
}

/// POST /students/:id/factor-samples - Record one observation
async fn record_sample(
    State(state): State<AppState>,
    Path(raw): Path<String>,
    body: Result<Json<SampleInput>, JsonRejection>,
) -> Result<(StatusCode, Json<SampleResponse>), AppError> {
    let Json(input) = body?;
    let id = student_id(&raw)?;
    let outcome = blocking(move || Ok(state.service.record_samples(&id, vec![input])?)).await?;

    let sample = outcome
        .samples
        .into_iter()
        .next()
        .ok_or_else(|| AppError::Internal("Recorded sample missing from outcome".to_string()))?;
    Ok((
        StatusCode::CREATED,
        Json(SampleResponse {
            sample,
            profile: outcome.profile,
            alerts: outcome.alerts,
        }),
    ))
}

/// GET /alerts - Filtered alert listing
async fn list_alerts(
    State(state): State<AppState>,
    query: Result<Query<AlertQuery>, QueryRejection>,
) -> Result<Json<Vec<Alert>>, AppError> {
    let Query(query) = query?;
    let alerts = blocking(move || Ok(state.service.query_alerts(&query)?)).await?;
    Ok(Json(alerts))
}

/// GET /alerts/:id
async fn get_alert(
    State(state): State<AppState>,
    Path(raw): Path<String>,
) -> Result<Json<Alert>, AppError> {
    let id = alert_id(&raw)?;
    let alert = blocking(move || Ok(state.service.get_alert(id)?)).await?;
    Ok(Json(alert))
}

/// POST /alerts/:id/transition
async fn transition_alert(
    State(state): State<AppState>,
    Path(raw): Path<String>,
    body: Result<Json<AlertTransitionRequest>, JsonRejection>,
) -> Result<Json<Alert>, AppError> {
    let Json(request) = body?;
    let id = alert_id(&raw)?;
    let alert = blocking(move || {
        Ok(state
            .service
            .transition_alert(id, request.to, request.actor.as_deref())?)
    })
    .await?;
    Ok(Json(alert))
}

/// POST /alerts/:id/assign
async fn assign_alert(
    State(state): State<AppState>,
    Path(raw): Path<String>,
    body: Result<Json<AssignRequest>, JsonRejection>,
) -> Result<Json<Alert>, AppError> {
    let Json(request) = body?;
    let id = alert_id(&raw)?;
    let alert = blocking(move || Ok(state.service.assign_alert(id, &request.assignee)?)).await?;
    Ok(Json(alert))
}

/// POST /interventions - Plan an intervention
async fn create_intervention(
    State(state): State<AppState>,
    body: Result<Json<NewIntervention>, JsonRejection>,
) -> Result<(StatusCode, Json<Intervention>), AppError> {
    let Json(request) = body?;
    let intervention = blocking(move || Ok(state.service.create_intervention(request)?)).await?;
    Ok((StatusCode::CREATED, Json(intervention)))
}

/// GET /interventions/:id
async fn get_intervention(
    State(state): State<AppState>,
    Path(raw): Path<String>,
) -> Result<Json<Intervention>, AppError> {
    let id = intervention_id(&raw)?;
    let intervention = blocking(move || Ok(state.service.get_intervention(id)?)).await?;
    Ok(Json(intervention))
}

/// PATCH /interventions/:id/progress
async fn record_progress(
    State(state): State<AppState>,
    Path(raw): Path<String>,
    body: Result<Json<ProgressRequest>, JsonRejection>,
) -> Result<Json<Intervention>, AppError> {
    let Json(request) = body?;
    let id = intervention_id(&raw)?;
    let intervention = blocking(move || {
        Ok(state.service.record_progress(
            id,
            request.progress,
            request.outcome,
            request.version,
        )?)
    })
    .await?;
    Ok(Json(intervention))
}

/// POST /interventions/:id/expenses
async fn record_expense(
    State(state): State<AppState>,
    Path(raw): Path<String>,
    body: Result<Json<ExpenseRequest>, JsonRejection>,
) -> Result<Json<Intervention>, AppError> {
    let Json(request) = body?;
    let id = intervention_id(&raw)?;
    let intervention = blocking(move || {
        Ok(state
            .service
            .record_expense(id, request.amount, request.version)?)
    })
    .await?;
    Ok(Json(intervention))
}

/// POST /interventions/:id/budget
async fn increase_budget(
    State(state): State<AppState>,
    Path(raw): Path<String>,
    body: Result<Json<BudgetRequest>, JsonRejection>,
) -> Result<Json<Intervention>, AppError> {
    let Json(request) = body?;
    let id = intervention_id(&raw)?;
    let intervention = blocking(move || {
        Ok(state
            .service
            .increase_budget(id, request.budget, request.version)?)
    })
    .await?;
    Ok(Json(intervention))
}

/// POST /interventions/:id/transition
async fn transition_intervention(
    State(state): State<AppState>,
    Path(raw): Path<String>,
    body: Result<Json<InterventionTransitionRequest>, JsonRejection>,
) -> Result<Json<Intervention>, AppError> {
    let Json(request) = body?;
    let id = intervention_id(&raw)?;
    let intervention = blocking(move || {
        Ok(state
            .service
            .transition_intervention(id, request.to, request.version)?)
    })
    .await?;
    Ok(Json(intervention))
}

/// GET /interventions/:id/effectiveness
async fn effectiveness(
    State(state): State<AppState>,
    Path(raw): Path<String>,
) -> Result<Json<Effectiveness>, AppError> {
    let id = intervention_id(&raw)?;
    let effectiveness = blocking(move || Ok(state.service.effectiveness(id)?)).await?;
    Ok(Json(effectiveness))
}

/// GET /cohort/trends - One point per period in range, ascending
async fn cohort_trends(
    State(state): State<AppState>,
    range: Result<Query<TrendRange>, QueryRejection>,
) -> Result<Json<Vec<CohortTrendPoint>>, AppError> {
    let Query(range) = range?;
    if range.from > range.to {
        return Err(AppError::Engine(EngineError::InvalidValue(
            "`from` must not be after `to`".to_string(),
        )));
    }

    let points = blocking(move || {
        Ok(state
            .trends
            .trends(range.from, range.to, &CancellationToken::new())?)
    })
    .await?;
    Ok(Json(points))
}

/// GET /health - Store-backed health check
async fn health_check(State(state): State<AppState>) -> Result<Json<HealthCheckResponse>, AppError> {
    let health = blocking(move || {
        let student_count = state.service.list_students()?.len();
        let active_alerts = state
            .service
            .query_alerts(&AlertQuery {
                status: Some(AlertStatus::Active),
                ..AlertQuery::default()
            })?
            .len();
        let intervention_count = state.service.interventions().list()?.len();

        Ok(HealthCheckResponse {
            status: "healthy".to_string(),
            student_count,
            active_alerts,
            intervention_count,
        })
    })
    .await?;
    Ok(Json(health))
}

/// Create the axum router with all routes
pub fn create_router(state: AppState) -> AxumRouter {
    AxumRouter::new()
        .route("/students", post(enroll_student))
        .route("/students/:id", get(get_student))
        .route("/students/:id/archive", post(archive_student))
        .route("/students/:id/risk-profile", get(risk_profile))
        .route("/students/:id/factor-samples", post(record_sample))
        .route("/alerts", get(list_alerts))
        .route("/alerts/:id", get(get_alert))
        .route("/alerts/:id/transition", post(transition_alert))
        .route("/alerts/:id/assign", post(assign_alert))
        .route("/interventions", post(create_intervention))
        .route("/interventions/:id", get(get_intervention))
        .route("/interventions/:id/progress", patch(record_progress))
        .route("/interventions/:id/expenses", post(record_expense))
        .route("/interventions/:id/budget", post(increase_budget))
        .route("/interventions/:id/transition", post(transition_intervention))
        .route("/interventions/:id/effectiveness", get(effectiveness))
        .route("/cohort/trends", get(cohort_trends))
        .route("/health", get(health_check))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_error_status_mapping() {
        let cases = [
            (EngineError::NotFound("x".into()), StatusCode::NOT_FOUND),
            (EngineError::InvalidValue("x".into()), StatusCode::BAD_REQUEST),
            (
                EngineError::InvalidTransition {
                    from: "resolved".into(),
                    to: "active".into(),
                },
                StatusCode::CONFLICT,
            ),
            (
                EngineError::ConcurrentModification("x".into()),
                StatusCode::CONFLICT,
            ),
            (
                EngineError::BudgetExceeded {
                    budget: 10.0,
                    spent: 8.0,
                    requested: 5.0,
                },
                StatusCode::UNPROCESSABLE_ENTITY,
            ),
            (
                EngineError::Store("disk".into()),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];

        for (error, status) in cases {
            let kind = error.kind();
            let (got_status, got_kind, _) = AppError::Engine(error).parts();
            assert_eq!(got_status, status);
            assert_eq!(got_kind, kind);
        }
    }

    #[test]
    fn test_trend_errors_unwrap_engine_kind() {
        let (status, kind, _) =
            AppError::Trend(TrendError::Engine(EngineError::NotFound("s".into()))).parts();
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(kind, "NotFound");

        let (status, kind, _) = AppError::Trend(TrendError::Cancelled).parts();
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(kind, "Internal");
    }

    #[test]
    fn test_bad_path_ids() {
        assert!(matches!(student_id("  "), Err(AppError::BadRequest(_))));
        assert!(matches!(alert_id("nope"), Err(AppError::BadRequest(_))));
        assert!(matches!(
            intervention_id("nope"),
            Err(AppError::BadRequest(_))
        ));
    }
}
