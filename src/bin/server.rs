//! HTTP + WebSocket entry point: wires `SchedulerService`, `AgentTaskManager`,
//! `ConversationManager`, `ConversationStateManager`, and `WebSocketNotifier`
//! behind an `actix-web` server. Grounded in the teacher's
//! `realtime_sync::server` actor/`ServerState` split, generalized from a
//! random-connection-id registry to the `userId`-keyed one in
//! `websocket_notifier`.

use actix::{Actor, ActorContext, AsyncContext, StreamHandler};
use actix_web::{web, App, HttpRequest, HttpResponse, HttpServer};
use actix_web_actors::ws;
use pulse_scheduler_core::config::ConfigLoader;
use pulse_scheduler_core::models::{FeedbackRequest, Task};
use pulse_scheduler_core::repository::SqliteStore;
use pulse_scheduler_core::scheduler_service::{ScheduleOptions, SchedulerService};
use pulse_scheduler_core::semantic_verifier::{SemanticVerifier, VerificationMode};
use pulse_scheduler_core::telemetry::Telemetry;
use pulse_scheduler_core::websocket_notifier::{ActixRecipientChannel, OutboundEvent, WebSocketNotifier};
use serde::Deserialize;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

struct AppState {
    scheduler: SchedulerService<SqliteStore>,
    verifier: SemanticVerifier,
    notifier: Arc<WebSocketNotifier>,
    telemetry: Telemetry,
}

#[derive(Deserialize)]
struct ScheduleRequest {
    #[serde(rename = "userId")]
    user_id: String,
    #[serde(default = "default_horizon")]
    #[serde(rename = "horizonDays")]
    horizon_days: u32,
    #[serde(default)]
    #[serde(rename = "dryRun")]
    dry_run: bool,
    #[serde(default = "default_lock_existing")]
    #[serde(rename = "lockExisting")]
    lock_existing: bool,
    #[serde(rename = "jobId")]
    job_id: Option<String>,
}

fn default_horizon() -> u32 {
    7
}
fn default_lock_existing() -> bool {
    true
}

fn tasks_by_id(tasks: &[Task]) -> HashMap<&str, &Task> {
    tasks.iter().map(|t| (t.id.as_str(), t)).collect()
}

/// Builds the §6 `ScheduleResponse` wire envelope from the internal
/// `ScheduleSolution`, then runs it through `SemanticVerifier` before it
/// leaves the process.
fn build_response(
    state: &AppState,
    job_id: Option<&str>,
    solution: &pulse_scheduler_core::models::ScheduleSolution,
    tasks: &[Task],
    solve_start: Instant,
) -> serde_json::Value {
    let by_id = tasks_by_id(tasks);
    let blocks: Vec<serde_json::Value> = solution
        .blocks
        .iter()
        .map(|b| {
            let task = by_id.get(b.task_id.as_str());
            json!({
                "taskId": b.task_id,
                "title": task.map(|t| t.title.clone()).unwrap_or_default(),
                "start": b.start.to_rfc3339(),
                "end": b.end.to_rfc3339(),
                "provider": "pulse",
                "metadata": {
                    "utility_score": b.utility_score,
                    "completion_probability": b.estimated_completion_probability,
                    "duration_minutes": b.duration_minutes(),
                    "task_kind": task.map(|t| format!("{:?}", t.kind)),
                    "course_id": task.and_then(|t| t.course_id.clone()),
                }
            })
        })
        .collect();

    let total_minutes: i64 = solution.blocks.iter().map(|b| b.duration_minutes()).sum();
    let mut response = json!({
        "jobId": job_id,
        "feasible": solution.feasible,
        "blocks": blocks,
        "metrics": {
            "totalBlocks": solution.blocks.len(),
            "totalScheduledMinutes": total_minutes,
            "feasible": solution.feasible,
            "solveTimeMs": solve_start.elapsed().as_millis() as u64,
        },
        "explanations": {
            "summary": if solution.feasible {
                format!("Scheduled {} block(s) across the requested horizon.", solution.blocks.len())
            } else {
                "Could not produce a feasible schedule for the requested horizon.".to_string()
            }
        },
    });

    let outcome = state.verifier.verify(&mut response);
    state.telemetry.incr("schedule.verification.findings", outcome.findings.len() as u64);
    response
}

async fn run_schedule(state: web::Data<AppState>, body: web::Json<ScheduleRequest>) -> HttpResponse {
    let start = Instant::now();
    let options = ScheduleOptions { dry_run: body.dry_run, lock_existing: body.lock_existing, extra: HashMap::new() };
    match state.scheduler.schedule(&body.user_id, body.horizon_days, &options) {
        Ok(solution) => {
            let tasks = match state.scheduler_tasks(&body.user_id) {
                Ok(t) => t,
                Err(_) => Vec::new(),
            };
            state.telemetry.incr("schedule.requests", 1);
            HttpResponse::Ok().json(build_response(&state, body.job_id.as_deref(), &solution, &tasks, start))
        }
        Err(e) => error_response(&e),
    }
}

async fn preview_schedule(state: web::Data<AppState>, body: web::Json<ScheduleRequest>) -> HttpResponse {
    let start = Instant::now();
    let options = ScheduleOptions { dry_run: true, lock_existing: body.lock_existing, extra: HashMap::new() };
    match state.scheduler.schedule_preview(&body.user_id, body.horizon_days, &options) {
        Ok(solution) => {
            let tasks = state.scheduler_tasks(&body.user_id).unwrap_or_default();
            HttpResponse::Ok().json(build_response(&state, body.job_id.as_deref(), &solution, &tasks, start))
        }
        Err(e) => error_response(&e),
    }
}

#[derive(Deserialize)]
struct RescheduleQuery {
    user_id: String,
    #[serde(default = "default_reschedule_horizon")]
    horizon_days: u32,
}

fn default_reschedule_horizon() -> u32 {
    3
}

async fn reschedule(state: web::Data<AppState>, query: web::Query<RescheduleQuery>) -> HttpResponse {
    let start = Instant::now();
    match state.scheduler.reschedule_missed(&query.user_id, query.horizon_days) {
        Ok(solution) => {
            let tasks = state.scheduler_tasks(&query.user_id).unwrap_or_default();
            HttpResponse::Ok().json(build_response(&state, None, &solution, &tasks, start))
        }
        Err(e) => error_response(&e),
    }
}

async fn feedback(state: web::Data<AppState>, body: web::Json<FeedbackRequest>) -> HttpResponse {
    state.scheduler.update_learning(&body.weights_used, body.reward);
    HttpResponse::Ok().json(json!({ "status": "ok" }))
}

async fn health() -> HttpResponse {
    HttpResponse::Ok().json(json!({
        "status": "ok",
        "components": { "scheduler": "ok", "websocket_notifier": "ok" }
    }))
}

fn error_response(err: &pulse_scheduler_core::Error) -> HttpResponse {
    HttpResponse::Ok().json(json!({
        "feasible": false,
        "blocks": [],
        "metrics": { "error_type": err.kind() },
        "explanations": { "error": err.to_string() }
    }))
}

/// WebSocket session actor, registered into the shared notifier by user id
/// instead of a random connection id (§4.16).
struct WsSession {
    user_id: String,
    notifier: Arc<WebSocketNotifier>,
    hb: Instant,
}

impl Actor for WsSession {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        ctx.run_interval(Duration::from_secs(5), |act, ctx| {
            if Instant::now().duration_since(act.hb) > Duration::from_secs(30) {
                ctx.stop();
                return;
            }
            ctx.ping(b"");
        });
        self.notifier.register(&self.user_id, Box::new(ActixRecipientChannel(ctx.address().recipient())));
    }

    fn stopped(&mut self, _ctx: &mut Self::Context) {
        self.notifier.unregister(&self.user_id);
    }
}

impl actix::Handler<OutboundEvent> for WsSession {
    type Result = ();
    fn handle(&mut self, msg: OutboundEvent, ctx: &mut Self::Context) {
        ctx.text(msg.payload.to_string());
    }
}

impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for WsSession {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        match msg {
            Ok(ws::Message::Ping(bytes)) => {
                self.hb = Instant::now();
                ctx.pong(&bytes);
            }
            Ok(ws::Message::Pong(_)) => self.hb = Instant::now(),
            Ok(ws::Message::Close(reason)) => {
                ctx.close(reason);
                ctx.stop();
            }
            Ok(ws::Message::Text(_)) | Ok(ws::Message::Binary(_)) => {}
            _ => {}
        }
    }
}

async fn ws_route(req: HttpRequest, stream: web::Payload, path: web::Path<String>, state: web::Data<AppState>) -> Result<HttpResponse, actix_web::Error> {
    let user_id = path.into_inner();
    ws::start(WsSession { user_id, notifier: state.notifier.clone(), hb: Instant::now() }, &req, stream)
}

fn scheduler_tasks_helper(repo: &SqliteStore, user_id: &str) -> pulse_scheduler_core::Result<Vec<Task>> {
    use pulse_scheduler_core::repository::TaskRepository;
    repo.list_tasks(user_id)
}

impl AppState {
    fn scheduler_tasks(&self, user_id: &str) -> pulse_scheduler_core::Result<Vec<Task>> {
        scheduler_tasks_helper(self.scheduler.repo(), user_id)
    }
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    tracing_subscriber::fmt().with_env_filter(tracing_subscriber::EnvFilter::from_default_env()).init();

    let config = ConfigLoader::new().load().expect("invalid configuration");
    let store = SqliteStore::open(&config.database.path).expect("failed to open database");

    let telemetry = Telemetry::new(&config.telemetry);
    let verifier = SemanticVerifier::new(VerificationMode::Basic, true);
    let notifier = Arc::new(WebSocketNotifier::new());
    let scheduler = SchedulerService::new(store, config.clone());

    let app_state = web::Data::new(AppState { scheduler, verifier, notifier, telemetry });

    tracing::info!(environment = ?config.environment, "starting pulse-scheduler-core server");

    HttpServer::new(move || {
        App::new()
            .app_data(app_state.clone())
            .route("/schedule/run", web::post().to(run_schedule))
            .route("/schedule/preview", web::post().to(preview_schedule))
            .route("/schedule/reschedule", web::post().to(reschedule))
            .route("/schedule/feedback", web::post().to(feedback))
            .route("/schedule/health", web::get().to(health))
            .route("/ws/{user_id}", web::get().to(ws_route))
    })
    .bind(("0.0.0.0", 8080))?
    .run()
    .await
}
