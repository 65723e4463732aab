//! Axum JSON API + Askama dashboard in front of the TOF engine.

use std::fmt::Display;
use std::str::FromStr;
use std::sync::Arc;

use askama::Template;
use axum::{
    body::Bytes,
    extract::{Path as AxumPath, Query, State},
    http::StatusCode,
    response::{Html, IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tof_core::{
    AffiliateProgram, CrawlHistory, Intent, Opportunity, OpportunityFilter, OpportunityListing,
    OpportunityPatch, OpportunityQuery, OpportunitySortField, Page, PageRequest, RecommendedAction,
    SchedulerMode, SerpResult, SortOrder, SortSpec, Thread, ThreadFilter, ThreadQuery,
    ThreadSortField,
};
use tof_sync::{
    engine_from_config, Engine, ProgramInput, ReportSummary, SchedulerStatus, SyncConfig,
};
use tokio::net::TcpListener;
use tracing::{info, warn};
use uuid::Uuid;

mod error;

pub use error::{ApiError, ErrorBody, ErrorResponse};

pub const CRATE_NAME: &str = "tof-web";

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<Engine>,
}

impl AppState {
    pub fn new(engine: Arc<Engine>) -> Self {
        Self { engine }
    }
}

#[derive(Template)]
#[template(path = "index.html")]
struct IndexTemplate {
    mode: &'static str,
    cadence: String,
    threads: usize,
    opportunities: usize,
    comment: usize,
    watch: usize,
    skip: usize,
    top: Vec<TopRow>,
    last_crawl: String,
}

#[derive(Debug, Clone)]
struct TopRow {
    title: String,
    source: String,
    permalink: String,
    score: String,
    serp_match: bool,
}

#[derive(Debug, Default, Deserialize)]
struct ThreadParams {
    source: Option<String>,
    intent: Option<String>,
    search: Option<String>,
    sort: Option<String>,
    order: Option<String>,
    limit: Option<String>,
    offset: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct OpportunityParams {
    source: Option<String>,
    intent: Option<String>,
    search: Option<String>,
    score: Option<String>,
    score_min: Option<String>,
    score_max: Option<String>,
    serp_match: Option<String>,
    action: Option<String>,
    thread_id: Option<String>,
    sort: Option<String>,
    order: Option<String>,
    limit: Option<String>,
    offset: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct HistoryParams {
    limit: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct RunCrawlerRequest {
    #[serde(default)]
    sources: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
struct SerpCheckRequest {
    thread_id: Uuid,
    #[serde(default)]
    query: Option<String>,
}

#[derive(Debug, Serialize)]
struct SchedulerTransition {
    changed: bool,
    status: SchedulerStatus,
}

#[derive(Debug, Serialize)]
struct RefreshResponse {
    refreshed: usize,
}

pub fn app(engine: Arc<Engine>) -> Router {
    Router::new()
        .route("/", get(index_handler))
        .route("/healthz", get(healthz_handler))
        .route("/api/scheduler/status", get(scheduler_status_handler))
        .route("/api/scheduler/start", post(scheduler_start_handler))
        .route("/api/scheduler/stop", post(scheduler_stop_handler))
        .route("/api/crawler/run", post(run_crawler_handler))
        .route("/api/opportunities", get(list_opportunities_handler))
        .route("/api/opportunities/refresh", post(refresh_opportunities_handler))
        .route(
            "/api/opportunities/{id}",
            get(get_opportunity_handler)
                .patch(update_opportunity_handler)
                .delete(delete_opportunity_handler),
        )
        .route("/api/threads", get(list_threads_handler))
        .route("/api/threads/{id}", get(get_thread_handler))
        .route("/api/threads/{id}/serp", get(thread_serp_handler))
        .route("/api/serp/check", post(serp_check_handler))
        .route(
            "/api/programs",
            get(list_programs_handler).post(create_program_handler),
        )
        .route(
            "/api/programs/{id}",
            get(get_program_handler)
                .put(update_program_handler)
                .delete(delete_program_handler),
        )
        .route("/api/crawl-history", get(list_crawl_history_handler))
        .route("/api/crawl-history/{id}", get(get_crawl_history_handler))
        .route("/api/reports", post(export_report_handler))
        .with_state(AppState::new(engine))
}

/// Serve until ctrl-c, then stop the scheduler.
pub async fn serve(engine: Arc<Engine>, port: u16) -> anyhow::Result<()> {
    let listener = TcpListener::bind(("0.0.0.0", port)).await?;
    info!(port, "tof-web listening");
    axum::serve(listener, app(engine.clone()))
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    engine.shutdown().await;
    Ok(())
}

pub async fn serve_from_env() -> anyhow::Result<()> {
    let config = SyncConfig::from_env();
    let engine = Arc::new(engine_from_config(&config).await?);
    serve(engine, config.web_port).await
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(error = %err, "could not listen for ctrl-c; shutting down");
    }
}

async fn index_handler(State(state): State<AppState>) -> Result<Response, ApiError> {
    let summary = state.engine.dashboard().await?;
    let top = summary
        .top
        .into_iter()
        .map(|listing| TopRow {
            title: listing.thread.title,
            source: listing.thread.source,
            permalink: listing.thread.permalink,
            score: format!("{:.2}", listing.opportunity.score),
            serp_match: listing.opportunity.serp_match,
        })
        .collect();
    let last_crawl = summary
        .last_crawl
        .map(|h| {
            format!(
                "{} at {} ({} ok / {} failed, {} threads)",
                h.status.as_str(),
                h.started_at.format("%Y-%m-%d %H:%M UTC"),
                h.success_count,
                h.failure_count,
                h.thread_count
            )
        })
        .unwrap_or_else(|| "never".into());

    render_html(IndexTemplate {
        mode: mode_label(summary.scheduler.mode),
        cadence: summary.scheduler.cadence,
        threads: summary.threads,
        opportunities: summary.opportunities,
        comment: summary.comment,
        watch: summary.watch,
        skip: summary.skip,
        top,
        last_crawl,
    })
}

async fn healthz_handler() -> &'static str {
    "ok"
}

async fn scheduler_status_handler(State(state): State<AppState>) -> Json<SchedulerStatus> {
    Json(state.engine.scheduler_status())
}

async fn scheduler_start_handler(
    State(state): State<AppState>,
) -> Result<Json<SchedulerTransition>, ApiError> {
    let changed = state.engine.start_scheduler().await?;
    Ok(Json(SchedulerTransition {
        changed,
        status: state.engine.scheduler_status(),
    }))
}

async fn scheduler_stop_handler(State(state): State<AppState>) -> Json<SchedulerTransition> {
    let changed = state.engine.stop_scheduler().await;
    Json(SchedulerTransition {
        changed,
        status: state.engine.scheduler_status(),
    })
}

async fn run_crawler_handler(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<CrawlHistory>, ApiError> {
    let request = if body.iter().all(u8::is_ascii_whitespace) {
        RunCrawlerRequest::default()
    } else {
        json_body::<RunCrawlerRequest>(&body)?
    };
    Ok(Json(state.engine.run_crawler_now(request.sources).await?))
}

async fn refresh_opportunities_handler(
    State(state): State<AppState>,
) -> Result<Json<RefreshResponse>, ApiError> {
    let refreshed = state.engine.refresh_opportunities().await?;
    Ok(Json(RefreshResponse { refreshed }))
}

async fn list_opportunities_handler(
    State(state): State<AppState>,
    Query(params): Query<OpportunityParams>,
) -> Result<Json<Page<OpportunityListing>>, ApiError> {
    let query = OpportunityQuery {
        filter: OpportunityFilter {
            source: non_blank(params.source),
            intent: parse_param::<Intent>("intent", params.intent.as_deref())?,
            score: parse_score("score", params.score.as_deref())?,
            score_min: parse_score("score_min", params.score_min.as_deref())?,
            score_max: parse_score("score_max", params.score_max.as_deref())?,
            serp_match: parse_param::<bool>("serp_match", params.serp_match.as_deref())?,
            action: parse_param::<RecommendedAction>("action", params.action.as_deref())?,
            search: non_blank(params.search),
            thread_id: parse_param::<Uuid>("thread_id", params.thread_id.as_deref())?,
        },
        sort: SortSpec {
            field: parse_param::<OpportunitySortField>("sort", params.sort.as_deref())?
                .unwrap_or_default(),
            order: parse_param::<SortOrder>("order", params.order.as_deref())?.unwrap_or_default(),
        },
        page: page_request(params.limit.as_deref(), params.offset.as_deref())?,
    };
    Ok(Json(state.engine.list_opportunities(&query).await?))
}

async fn get_opportunity_handler(
    State(state): State<AppState>,
    AxumPath(id): AxumPath<String>,
) -> Result<Json<OpportunityListing>, ApiError> {
    Ok(Json(state.engine.get_opportunity(parse_id(&id)?).await?))
}

async fn update_opportunity_handler(
    State(state): State<AppState>,
    AxumPath(id): AxumPath<String>,
    body: Bytes,
) -> Result<Json<Opportunity>, ApiError> {
    let id = parse_id(&id)?;
    let patch = json_body::<OpportunityPatch>(&body)?;
    Ok(Json(state.engine.update_opportunity(id, patch).await?))
}

async fn delete_opportunity_handler(
    State(state): State<AppState>,
    AxumPath(id): AxumPath<String>,
) -> Result<StatusCode, ApiError> {
    state.engine.delete_opportunity(parse_id(&id)?).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn list_threads_handler(
    State(state): State<AppState>,
    Query(params): Query<ThreadParams>,
) -> Result<Json<Page<Thread>>, ApiError> {
    let query = ThreadQuery {
        filter: ThreadFilter {
            source: non_blank(params.source),
            intent: parse_param::<Intent>("intent", params.intent.as_deref())?,
            search: non_blank(params.search),
            thread_id: None,
        },
        sort: SortSpec {
            field: parse_param::<ThreadSortField>("sort", params.sort.as_deref())?
                .unwrap_or_default(),
            order: parse_param::<SortOrder>("order", params.order.as_deref())?.unwrap_or_default(),
        },
        page: page_request(params.limit.as_deref(), params.offset.as_deref())?,
    };
    Ok(Json(state.engine.list_threads(&query).await?))
}

async fn get_thread_handler(
    State(state): State<AppState>,
    AxumPath(id): AxumPath<String>,
) -> Result<Json<Thread>, ApiError> {
    Ok(Json(state.engine.get_thread(parse_id(&id)?).await?))
}

async fn thread_serp_handler(
    State(state): State<AppState>,
    AxumPath(id): AxumPath<String>,
) -> Result<Json<Vec<SerpResult>>, ApiError> {
    Ok(Json(state.engine.thread_serp_results(parse_id(&id)?).await?))
}

async fn serp_check_handler(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<SerpResult>, ApiError> {
    let request = json_body::<SerpCheckRequest>(&body)?;
    let result = state
        .engine
        .check_serp_position(request.thread_id, request.query.as_deref())
        .await?;
    Ok(Json(result))
}

async fn list_programs_handler(
    State(state): State<AppState>,
) -> Result<Json<Vec<AffiliateProgram>>, ApiError> {
    Ok(Json(state.engine.list_programs().await?))
}

async fn get_program_handler(
    State(state): State<AppState>,
    AxumPath(id): AxumPath<String>,
) -> Result<Json<AffiliateProgram>, ApiError> {
    Ok(Json(state.engine.get_program(parse_id(&id)?).await?))
}

async fn create_program_handler(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<(StatusCode, Json<AffiliateProgram>), ApiError> {
    let input = json_body::<ProgramInput>(&body)?;
    let program = state.engine.create_program(input).await?;
    Ok((StatusCode::CREATED, Json(program)))
}

async fn update_program_handler(
    State(state): State<AppState>,
    AxumPath(id): AxumPath<String>,
    body: Bytes,
) -> Result<Json<AffiliateProgram>, ApiError> {
    let id = parse_id(&id)?;
    let input = json_body::<ProgramInput>(&body)?;
    Ok(Json(state.engine.update_program(id, input).await?))
}

async fn delete_program_handler(
    State(state): State<AppState>,
    AxumPath(id): AxumPath<String>,
) -> Result<StatusCode, ApiError> {
    state.engine.delete_program(parse_id(&id)?).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn list_crawl_history_handler(
    State(state): State<AppState>,
    Query(params): Query<HistoryParams>,
) -> Result<Json<Vec<CrawlHistory>>, ApiError> {
    let limit = parse_param::<usize>("limit", params.limit.as_deref())?.unwrap_or(20);
    Ok(Json(state.engine.list_crawl_history(limit).await?))
}

async fn get_crawl_history_handler(
    State(state): State<AppState>,
    AxumPath(id): AxumPath<String>,
) -> Result<Json<CrawlHistory>, ApiError> {
    Ok(Json(state.engine.get_crawl_history(parse_id(&id)?).await?))
}

async fn export_report_handler(
    State(state): State<AppState>,
) -> Result<(StatusCode, Json<ReportSummary>), ApiError> {
    let summary = state.engine.export_report().await?;
    Ok((StatusCode::CREATED, Json(summary)))
}

fn mode_label(mode: SchedulerMode) -> &'static str {
    match mode {
        SchedulerMode::Stopped => "STOPPED",
        SchedulerMode::Scheduled => "SCHEDULED",
        SchedulerMode::Running => "RUNNING",
    }
}

fn render_html<T: Template>(tpl: T) -> Result<Response, ApiError> {
    let html = tpl
        .render()
        .map_err(|err| ApiError::Internal(anyhow::anyhow!(err.to_string())))?;
    Ok(Html(html).into_response())
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

/// Blank values count as absent.
fn parse_param<T>(name: &str, value: Option<&str>) -> Result<Option<T>, ApiError>
where
    T: FromStr,
    T::Err: Display,
{
    match value.map(str::trim).filter(|v| !v.is_empty()) {
        None => Ok(None),
        Some(raw) => raw
            .parse()
            .map(Some)
            .map_err(|err| ApiError::bad_request(format!("{name}: {err}"))),
    }
}

fn parse_score(name: &str, value: Option<&str>) -> Result<Option<f64>, ApiError> {
    match parse_param::<f64>(name, value)? {
        Some(score) if !score.is_finite() => {
            Err(ApiError::bad_request(format!("{name}: must be a finite number")))
        }
        score => Ok(score),
    }
}

fn page_request(limit: Option<&str>, offset: Option<&str>) -> Result<PageRequest, ApiError> {
    Ok(PageRequest::new(
        parse_param("limit", limit)?,
        parse_param("offset", offset)?,
    ))
}

fn parse_id(raw: &str) -> Result<Uuid, ApiError> {
    Uuid::parse_str(raw.trim()).map_err(|err| ApiError::bad_request(format!("id {raw:?}: {err}")))
}

fn json_body<T: DeserializeOwned>(body: &Bytes) -> Result<T, ApiError> {
    serde_json::from_slice(body)
        .map_err(|err| ApiError::bad_request(format!("malformed JSON body: {err}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    use axum::body::Body;
    use axum::http::{header, Request};
    use http_body_util::BodyExt;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    fn workspace_root() -> PathBuf {
        PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../..")
    }

    async fn fixture_app() -> (Router, tempfile::TempDir) {
        let artifacts = tempfile::tempdir().unwrap();
        let config = SyncConfig {
            workspace_root: workspace_root(),
            artifacts_dir: artifacts.path().to_path_buf(),
            ..SyncConfig::default()
        };
        let engine = engine_from_config(&config).await.unwrap();
        (app(Arc::new(engine)), artifacts)
    }

    async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let builder = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };
        let resp = app.clone().oneshot(request).await.unwrap();
        let status = resp.status();
        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    async fn crawl_homelab(app: &Router) {
        let (status, _) = send(app, "POST", "/api/crawler/run", Some(json!({"sources": ["homelab"]}))).await;
        assert_eq!(status, StatusCode::OK);
        let (status, _) = send(app, "POST", "/api/opportunities/refresh", None).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn handler_smoke_get_index() {
        let (app, _artifacts) = fixture_app().await;
        let resp = app
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = resp.into_body().collect().await.unwrap().to_bytes();
        let text = String::from_utf8(body.to_vec()).unwrap();
        assert!(text.contains("TOF Dashboard"));
        assert!(text.contains("STOPPED"));
    }

    #[tokio::test]
    async fn healthz_is_plain_ok() {
        let (app, _artifacts) = fixture_app().await;
        let resp = app
            .oneshot(Request::builder().uri("/healthz").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = resp.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&body[..], b"ok");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn scheduler_start_and_stop_report_transitions() {
        let (app, _artifacts) = fixture_app().await;

        let (_, status) = send(&app, "GET", "/api/scheduler/status", None).await;
        assert_eq!(status["running"], json!(false));

        let (code, started) = send(&app, "POST", "/api/scheduler/start", None).await;
        assert_eq!(code, StatusCode::OK);
        assert_eq!(started["changed"], json!(true));
        assert_eq!(started["status"]["running"], json!(true));
        assert_eq!(started["status"]["mode"], json!("SCHEDULED"));

        let (_, again) = send(&app, "POST", "/api/scheduler/start", None).await;
        assert_eq!(again["changed"], json!(false));

        let (_, stopped) = send(&app, "POST", "/api/scheduler/stop", None).await;
        assert_eq!(stopped["changed"], json!(true));
        assert_eq!(stopped["status"]["running"], json!(false));
        let (_, again) = send(&app, "POST", "/api/scheduler/stop", None).await;
        assert_eq!(again["changed"], json!(false));
    }

    #[tokio::test]
    async fn crawl_refresh_and_filter_over_http() {
        let (app, _artifacts) = fixture_app().await;

        let (code, history) = send(
            &app,
            "POST",
            "/api/crawler/run",
            Some(json!({"sources": ["homelab", "nowhere"]})),
        )
        .await;
        assert_eq!(code, StatusCode::OK);
        assert_eq!(history["status"], json!("PARTIAL"));
        assert_eq!(history["thread_count"], json!(3));

        let (_, refreshed) = send(&app, "POST", "/api/opportunities/refresh", None).await;
        assert_eq!(refreshed["refreshed"], json!(3));

        let (_, watch) = send(&app, "GET", "/api/opportunities?action=watch", None).await;
        assert_eq!(watch["total"], json!(2));
        assert_eq!(watch["items"][0]["thread"]["external_id"], json!("h1a001"));

        let (_, scored) = send(&app, "GET", "/api/opportunities?score_min=40&limit=5", None).await;
        assert_eq!(scored["total"], json!(1));
        assert_eq!(scored["limit"], json!(5));

        let (_, threads) = send(&app, "GET", "/api/threads?source=homelab&sort=upvotes&order=desc", None).await;
        assert_eq!(threads["items"][0]["external_id"], json!("h1a002"));

        let (_, history_list) = send(&app, "GET", "/api/crawl-history", None).await;
        let id = history_list[0]["id"].as_str().unwrap().to_string();
        let (code, _) = send(&app, "GET", &format!("/api/crawl-history/{id}"), None).await;
        assert_eq!(code, StatusCode::OK);
    }

    #[tokio::test]
    async fn serp_check_records_position() {
        let (app, _artifacts) = fixture_app().await;
        crawl_homelab(&app).await;
        let thread_id = Thread::natural_id("homelab", "h1a001");

        let (code, result) = send(&app, "POST", "/api/serp/check", Some(json!({"thread_id": thread_id}))).await;
        assert_eq!(code, StatusCode::OK);
        assert_eq!(result["position"], json!(3));
        assert_eq!(result["ranked"], json!(true));

        let (_, stored) = send(&app, "GET", &format!("/api/threads/{thread_id}/serp"), None).await;
        assert_eq!(stored.as_array().map(Vec::len), Some(1));
    }

    #[tokio::test]
    async fn malformed_requests_are_validation_errors() {
        let (app, _artifacts) = fixture_app().await;

        for uri in [
            "/api/opportunities?sort=bogus",
            "/api/opportunities?limit=abc",
            "/api/opportunities?action=MAYBE",
            "/api/opportunities?score_min=NaN",
            "/api/opportunities?score_max=inf",
            "/api/opportunities?score=-infinity",
            "/api/threads?intent=rant",
            "/api/threads/not-a-uuid",
        ] {
            let (code, body) = send(&app, "GET", uri, None).await;
            assert_eq!(code, StatusCode::BAD_REQUEST, "{uri}");
            assert_eq!(body["error"]["code"], json!("validation_error"), "{uri}");
        }

        let (code, _) = send(&app, "POST", "/api/crawler/run", Some(json!({"sources": []}))).await;
        assert_eq!(code, StatusCode::BAD_REQUEST);
        let (code, _) = send(&app, "POST", "/api/serp/check", Some(json!({"thread": 1}))).await;
        assert_eq!(code, StatusCode::BAD_REQUEST);

        let (code, body) = send(&app, "GET", &format!("/api/threads/{}", Uuid::nil()), None).await;
        assert_eq!(code, StatusCode::NOT_FOUND);
        assert_eq!(body["error"]["code"], json!("not_found"));
    }

    #[tokio::test]
    async fn program_crud_round_trip() {
        let (app, _artifacts) = fixture_app().await;

        let (_, seeded) = send(&app, "GET", "/api/programs", None).await;
        assert_eq!(seeded.as_array().map(Vec::len), Some(4));

        let (code, _) = send(
            &app,
            "POST",
            "/api/programs",
            Some(json!({"name": " ", "link": "https://example.com", "keywords": ["nas"]})),
        )
        .await;
        assert_eq!(code, StatusCode::BAD_REQUEST);

        let (code, created) = send(
            &app,
            "POST",
            "/api/programs",
            Some(json!({"name": "Ubiquiti", "link": "https://ui.com/?ref=tof", "keywords": ["unifi"]})),
        )
        .await;
        assert_eq!(code, StatusCode::CREATED);
        let id = created["id"].as_str().unwrap().to_string();

        let (code, updated) = send(
            &app,
            "PUT",
            &format!("/api/programs/{id}"),
            Some(json!({"name": "Ubiquiti", "link": "https://ui.com/?ref=tof", "promo_code": "UNIFI5", "keywords": ["unifi", "dream machine"]})),
        )
        .await;
        assert_eq!(code, StatusCode::OK);
        assert_eq!(updated["promo_code"], json!("UNIFI5"));

        let (code, _) = send(&app, "DELETE", &format!("/api/programs/{id}"), None).await;
        assert_eq!(code, StatusCode::NO_CONTENT);
        let (code, _) = send(&app, "DELETE", &format!("/api/programs/{id}"), None).await;
        assert_eq!(code, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn opportunity_patch_and_delete() {
        let (app, _artifacts) = fixture_app().await;
        crawl_homelab(&app).await;
        let id = Opportunity::natural_id(Thread::natural_id("homelab", "h1a002"));

        let (code, patched) = send(
            &app,
            "PATCH",
            &format!("/api/opportunities/{id}"),
            Some(json!({"action": "COMMENT"})),
        )
        .await;
        assert_eq!(code, StatusCode::OK);
        assert_eq!(patched["action"], json!("COMMENT"));
        assert_eq!(patched["manual_override"], json!(true));

        let (code, _) = send(&app, "PATCH", &format!("/api/opportunities/{id}"), Some(json!({}))).await;
        assert_eq!(code, StatusCode::BAD_REQUEST);

        let (code, _) = send(&app, "DELETE", &format!("/api/opportunities/{id}"), None).await;
        assert_eq!(code, StatusCode::NO_CONTENT);
        let (code, _) = send(&app, "GET", &format!("/api/opportunities/{id}"), None).await;
        assert_eq!(code, StatusCode::NOT_FOUND);
    }
}
