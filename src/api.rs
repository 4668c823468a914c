//! HTTP request routing: bearer-token auth, role checks, JSON bodies in
//! the camelCase shape clients expect, and engine error mapping.

use std::sync::Arc;
use std::time::Instant;

use chrono::NaiveDate;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tokio::io::{BufReader, BufWriter};
use tokio::net::TcpStream;
use ulid::Ulid;

use crate::auth::SessionStore;
use crate::engine::{CapacityReport, Engine, EngineError};
use crate::http::{self, HttpError, Request};
use crate::model::*;
use crate::observability;
use crate::policy::{self, Caller};

use crate::engine::mutations::{
    AssignmentPatch, NewAssignment, NewProject, NewUser, ProjectPatch,
};

pub struct AppContext {
    pub engine: Arc<Engine>,
    pub sessions: Arc<SessionStore>,
}

type Reply = (u16, Value);

/// Serve one client connection: keep-alive request loop until EOF, a
/// framing error, or an explicit `Connection: close`.
pub async fn serve_connection(stream: TcpStream, ctx: Arc<AppContext>) {
    let (read_half, write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);
    let mut writer = BufWriter::new(write_half);

    loop {
        let req = match http::read_request(&mut reader).await {
            Ok(Some(req)) => req,
            Ok(None) => return,
            Err(HttpError::Io(_)) => return,
            Err(e @ HttpError::Malformed(_)) => {
                let _ = http::write_response(&mut writer, 400, &message(&e.to_string()), true)
                    .await;
                return;
            }
            Err(e @ HttpError::TooLarge(_)) => {
                let _ = http::write_response(&mut writer, 413, &message(&e.to_string()), true)
                    .await;
                return;
            }
        };
        let close = req.wants_close();

        let started = Instant::now();
        let (route, (status, body)) = dispatch(&ctx, &req).await;
        metrics::counter!(
            observability::REQUESTS_TOTAL,
            "route" => route,
            "status" => status.to_string(),
        )
        .increment(1);
        metrics::histogram!(observability::REQUEST_DURATION_SECONDS, "route" => route)
            .record(started.elapsed().as_secs_f64());

        if http::write_response(&mut writer, status, &body, close)
            .await
            .is_err()
        {
            return;
        }
        if close {
            return;
        }
    }
}

async fn dispatch(ctx: &AppContext, req: &Request) -> (&'static str, Reply) {
    let segments: Vec<&str> = req.path.split('/').filter(|s| !s.is_empty()).collect();
    match (req.method.as_str(), segments.as_slice()) {
        ("GET", ["api", "health"]) => ("GET /api/health", (200, json!({"status": "OK"}))),

        ("POST", ["api", "auth", "register"]) => {
            ("POST /api/auth/register", register(ctx, req).await)
        }
        ("POST", ["api", "auth", "login"]) => ("POST /api/auth/login", login(ctx, req).await),
        ("GET", ["api", "auth", "profile"]) => ("GET /api/auth/profile", profile(ctx, req).await),

        ("GET", ["api", "engineers"]) => ("GET /api/engineers", list_engineers(ctx, req).await),
        ("GET", ["api", "engineers", id, "capacity"]) => (
            "GET /api/engineers/:id/capacity",
            engineer_capacity(ctx, req, id).await,
        ),
        ("PUT", ["api", "engineers", id]) => {
            ("PUT /api/engineers/:id", update_engineer(ctx, req, id).await)
        }

        ("GET", ["api", "projects"]) => ("GET /api/projects", list_projects(ctx, req).await),
        ("POST", ["api", "projects"]) => ("POST /api/projects", create_project(ctx, req).await),
        ("GET", ["api", "projects", id, "suitable-engineers"]) => (
            "GET /api/projects/:id/suitable-engineers",
            suitable_engineers(ctx, req, id).await,
        ),
        ("GET", ["api", "projects", id]) => {
            ("GET /api/projects/:id", get_project(ctx, req, id).await)
        }
        ("PUT", ["api", "projects", id]) => {
            ("PUT /api/projects/:id", update_project(ctx, req, id).await)
        }

        ("GET", ["api", "assignments"]) => {
            ("GET /api/assignments", list_assignments(ctx, req).await)
        }
        ("POST", ["api", "assignments"]) => {
            ("POST /api/assignments", create_assignment(ctx, req).await)
        }
        ("GET", ["api", "assignments", id]) => (
            "GET /api/assignments/:id",
            get_assignment(ctx, req, id).await,
        ),
        ("PUT", ["api", "assignments", id]) => (
            "PUT /api/assignments/:id",
            update_assignment(ctx, req, id).await,
        ),
        ("DELETE", ["api", "assignments", id]) => (
            "DELETE /api/assignments/:id",
            delete_assignment(ctx, req, id).await,
        ),

        _ => ("unmatched", (404, message("not found"))),
    }
}

// ── Auth plumbing ────────────────────────────────────────

async fn authenticate(ctx: &AppContext, req: &Request) -> Result<Caller, Reply> {
    let token = req
        .header("authorization")
        .and_then(|v| v.strip_prefix("Bearer "))
        .ok_or_else(|| {
            metrics::counter!(observability::AUTH_FAILURES_TOTAL).increment(1);
            (401, message("missing bearer token"))
        })?;
    let user_id = ctx.sessions.resolve(token).ok_or_else(|| {
        metrics::counter!(observability::AUTH_FAILURES_TOTAL).increment(1);
        (401, message("invalid or expired token"))
    })?;
    let state = ctx
        .engine
        .user_state(&user_id)
        .ok_or((401, message("invalid or expired token")))?;
    let role = state.read().await.user.role;
    Ok(Caller { user_id, role })
}

fn parse_body<T: DeserializeOwned>(req: &Request) -> Result<T, Reply> {
    serde_json::from_slice(&req.body).map_err(|e| (400, message(&format!("invalid body: {e}"))))
}

fn parse_id(raw: &str) -> Result<Ulid, Reply> {
    Ulid::from_string(raw).map_err(|_| (400, message("invalid id")))
}

fn message(text: &str) -> Value {
    json!({ "message": text })
}

fn forbidden() -> Reply {
    (403, message("forbidden"))
}

fn engine_error(e: EngineError) -> Reply {
    match e {
        EngineError::NotFound(_) => (404, message("not found")),
        EngineError::CapacityExceeded { available } => {
            metrics::counter!(observability::CAPACITY_REJECTIONS_TOTAL).increment(1);
            (
                400,
                json!({ "message": e.to_string(), "availableCapacity": available }),
            )
        }
        EngineError::InvalidCredentials => {
            metrics::counter!(observability::AUTH_FAILURES_TOTAL).increment(1);
            (400, message("invalid credentials"))
        }
        EngineError::WalError(ref detail) => {
            tracing::error!(%detail, "write-ahead log failure");
            (500, message("internal error"))
        }
        EngineError::NotAnEngineer(_)
        | EngineError::EmailTaken(_)
        | EngineError::Validation(_)
        | EngineError::LimitExceeded(_) => (400, message(&e.to_string())),
    }
}

// ── JSON views ───────────────────────────────────────────

fn user_view(u: &User) -> Value {
    json!({
        "id": u.id,
        "email": u.email,
        "name": u.name,
        "role": u.role,
        "skills": u.skills,
        "seniority": u.seniority,
        "maxCapacity": u.max_capacity,
        "department": u.department,
    })
}

fn session_user_view(u: &User) -> Value {
    json!({ "id": u.id, "email": u.email, "name": u.name, "role": u.role })
}

async fn project_view(ctx: &AppContext, p: &Project) -> Value {
    let manager = ctx.engine.get_user(&p.manager_id).await;
    json!({
        "id": p.id,
        "name": p.name,
        "description": p.description,
        "startDate": p.window.start,
        "endDate": p.window.end,
        "requiredSkills": p.required_skills,
        "teamSize": p.team_size,
        "status": p.status,
        "managerId": p.manager_id,
        "manager": manager.map(|m| json!({ "name": m.name, "email": m.email })),
    })
}

fn assignment_core(a: &Assignment) -> Value {
    json!({
        "id": a.id,
        "engineerId": a.engineer_id,
        "projectId": a.project_id,
        "allocationPercentage": a.allocation,
        "startDate": a.window.start,
        "endDate": a.window.end,
        "role": a.role,
    })
}

async fn assignment_view(ctx: &AppContext, a: &Assignment) -> Value {
    let mut view = assignment_core(a);
    let engineer = ctx.engine.get_user(&a.engineer_id).await;
    let project = ctx.engine.get_project(&a.project_id);
    view["engineer"] = engineer
        .map(|e| json!({ "name": e.name, "email": e.email, "skills": e.skills }))
        .unwrap_or(Value::Null);
    view["project"] = project
        .map(|p| json!({ "name": p.name, "description": p.description, "status": p.status }))
        .unwrap_or(Value::Null);
    view
}

fn capacity_view(report: &CapacityReport) -> Value {
    json!({
        "engineerId": report.engineer_id,
        "engineerName": report.engineer_name,
        "maxCapacity": report.max_capacity,
        "totalAllocated": report.total_allocated,
        "availableCapacity": report.available_capacity,
        "activeAssignments": report.active.iter().map(assignment_core).collect::<Vec<_>>(),
    })
}

// ── Auth endpoints ───────────────────────────────────────

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RegisterBody {
    email: String,
    password: String,
    name: String,
    role: Role,
    #[serde(default)]
    skills: Vec<String>,
    seniority: Option<Seniority>,
    max_capacity: Option<u32>,
    department: Option<String>,
}

async fn register(ctx: &AppContext, req: &Request) -> Reply {
    let body: RegisterBody = match parse_body(req) {
        Ok(b) => b,
        Err(reply) => return reply,
    };
    let new = NewUser {
        email: body.email,
        password: body.password,
        name: body.name,
        role: body.role,
        skills: body.skills,
        seniority: body.seniority.unwrap_or(Seniority::Junior),
        max_capacity: body.max_capacity.unwrap_or(100),
        department: body.department.unwrap_or_else(|| "Engineering".into()),
    };
    match ctx.engine.register_user(new).await {
        Ok(user) => {
            let token = ctx.sessions.issue(user.id);
            metrics::gauge!(observability::SESSIONS_ACTIVE).set(ctx.sessions.len() as f64);
            (201, json!({ "token": token, "user": session_user_view(&user) }))
        }
        Err(e) => engine_error(e),
    }
}

#[derive(Deserialize)]
struct LoginBody {
    email: String,
    password: String,
}

async fn login(ctx: &AppContext, req: &Request) -> Reply {
    let body: LoginBody = match parse_body(req) {
        Ok(b) => b,
        Err(reply) => return reply,
    };
    match ctx.engine.login(&body.email, &body.password).await {
        Ok(user) => {
            let token = ctx.sessions.issue(user.id);
            metrics::gauge!(observability::SESSIONS_ACTIVE).set(ctx.sessions.len() as f64);
            (200, json!({ "token": token, "user": session_user_view(&user) }))
        }
        Err(e) => engine_error(e),
    }
}

async fn profile(ctx: &AppContext, req: &Request) -> Reply {
    let caller = match authenticate(ctx, req).await {
        Ok(c) => c,
        Err(reply) => return reply,
    };
    match ctx.engine.get_user(&caller.user_id).await {
        Some(user) => (200, user_view(&user)),
        None => (404, message("not found")),
    }
}

// ── Engineer endpoints ───────────────────────────────────

async fn list_engineers(ctx: &AppContext, req: &Request) -> Reply {
    if let Err(reply) = authenticate(ctx, req).await {
        return reply;
    }
    let engineers = ctx.engine.list_engineers().await;
    (
        200,
        Value::Array(engineers.iter().map(user_view).collect()),
    )
}

async fn engineer_capacity(ctx: &AppContext, req: &Request, raw_id: &str) -> Reply {
    if let Err(reply) = authenticate(ctx, req).await {
        return reply;
    }
    let id = match parse_id(raw_id) {
        Ok(id) => id,
        Err(reply) => return reply,
    };
    let as_of = match req.query.get("date") {
        Some(raw) => match NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
            Ok(d) => d,
            Err(_) => return (400, message("invalid date (expected YYYY-MM-DD)")),
        },
        None => chrono::Utc::now().date_naive(),
    };
    match ctx.engine.capacity_report(id, as_of).await {
        Ok(report) => (200, capacity_view(&report)),
        // On this read path an id resolving to a non-engineer is just a
        // missing engineer.
        Err(EngineError::NotAnEngineer(_)) => (404, message("engineer not found")),
        Err(e) => engine_error(e),
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct EngineerPatchBody {
    skills: Option<Vec<String>>,
    seniority: Option<Seniority>,
    max_capacity: Option<u32>,
}

async fn update_engineer(ctx: &AppContext, req: &Request, raw_id: &str) -> Reply {
    let caller = match authenticate(ctx, req).await {
        Ok(c) => c,
        Err(reply) => return reply,
    };
    let id = match parse_id(raw_id) {
        Ok(id) => id,
        Err(reply) => return reply,
    };
    if !policy::can_update_engineer(&caller, id) {
        return forbidden();
    }
    let body: EngineerPatchBody = match parse_body(req) {
        Ok(b) => b,
        Err(reply) => return reply,
    };
    match ctx
        .engine
        .update_engineer(id, body.skills, body.seniority, body.max_capacity)
        .await
    {
        Ok(user) => (200, user_view(&user)),
        Err(e) => engine_error(e),
    }
}

// ── Project endpoints ────────────────────────────────────

async fn list_projects(ctx: &AppContext, req: &Request) -> Reply {
    if let Err(reply) = authenticate(ctx, req).await {
        return reply;
    }
    let status = match req.query.get("status") {
        Some(raw) => match serde_json::from_value(Value::String(raw.clone())) {
            Ok(s) => Some(s),
            Err(_) => return (400, message("invalid status filter")),
        },
        None => None,
    };
    let skills: Option<Vec<String>> = req.query.get("skills").map(|raw| {
        raw.split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect()
    });
    let projects = ctx.engine.list_projects(status, skills.as_deref());
    let mut views = Vec::with_capacity(projects.len());
    for p in &projects {
        views.push(project_view(ctx, p).await);
    }
    (200, Value::Array(views))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProjectBody {
    name: String,
    description: String,
    start_date: NaiveDate,
    end_date: NaiveDate,
    #[serde(default)]
    required_skills: Vec<String>,
    team_size: u32,
    status: Option<ProjectStatus>,
}

async fn create_project(ctx: &AppContext, req: &Request) -> Reply {
    let caller = match authenticate(ctx, req).await {
        Ok(c) => c,
        Err(reply) => return reply,
    };
    if !policy::can_write_projects(&caller) {
        return forbidden();
    }
    let body: ProjectBody = match parse_body(req) {
        Ok(b) => b,
        Err(reply) => return reply,
    };
    let new = NewProject {
        name: body.name,
        description: body.description,
        window: DateRange {
            start: body.start_date,
            end: body.end_date,
        },
        required_skills: body.required_skills,
        team_size: body.team_size,
        status: body.status.unwrap_or(ProjectStatus::Planning),
        manager_id: caller.user_id,
    };
    match ctx.engine.create_project(new).await {
        Ok(project) => (201, project_view(ctx, &project).await),
        Err(e) => engine_error(e),
    }
}

async fn get_project(ctx: &AppContext, req: &Request, raw_id: &str) -> Reply {
    if let Err(reply) = authenticate(ctx, req).await {
        return reply;
    }
    let id = match parse_id(raw_id) {
        Ok(id) => id,
        Err(reply) => return reply,
    };
    match ctx.engine.get_project(&id) {
        Some(project) => (200, project_view(ctx, &project).await),
        None => (404, message("not found")),
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProjectPatchBody {
    name: Option<String>,
    description: Option<String>,
    start_date: Option<NaiveDate>,
    end_date: Option<NaiveDate>,
    required_skills: Option<Vec<String>>,
    team_size: Option<u32>,
    status: Option<ProjectStatus>,
}

async fn update_project(ctx: &AppContext, req: &Request, raw_id: &str) -> Reply {
    let caller = match authenticate(ctx, req).await {
        Ok(c) => c,
        Err(reply) => return reply,
    };
    if !policy::can_write_projects(&caller) {
        return forbidden();
    }
    let id = match parse_id(raw_id) {
        Ok(id) => id,
        Err(reply) => return reply,
    };
    let body: ProjectPatchBody = match parse_body(req) {
        Ok(b) => b,
        Err(reply) => return reply,
    };
    // One-sided date patches merge against the stored window.
    let window = match (body.start_date, body.end_date) {
        (None, None) => None,
        (start, end) => {
            let Some(current) = ctx.engine.get_project(&id) else {
                return (404, message("not found"));
            };
            Some(DateRange {
                start: start.unwrap_or(current.window.start),
                end: end.unwrap_or(current.window.end),
            })
        }
    };
    let patch = ProjectPatch {
        name: body.name,
        description: body.description,
        window,
        required_skills: body.required_skills,
        team_size: body.team_size,
        status: body.status,
    };
    match ctx.engine.update_project(id, patch).await {
        Ok(project) => (200, project_view(ctx, &project).await),
        Err(e) => engine_error(e),
    }
}

async fn suitable_engineers(ctx: &AppContext, req: &Request, raw_id: &str) -> Reply {
    let caller = match authenticate(ctx, req).await {
        Ok(c) => c,
        Err(reply) => return reply,
    };
    if !policy::can_query_suitable_engineers(&caller) {
        return forbidden();
    }
    let id = match parse_id(raw_id) {
        Ok(id) => id,
        Err(reply) => return reply,
    };
    match ctx.engine.suitable_engineers(id).await {
        Ok(engineers) => (
            200,
            Value::Array(engineers.iter().map(user_view).collect()),
        ),
        Err(e) => engine_error(e),
    }
}

// ── Assignment endpoints ─────────────────────────────────

async fn list_assignments(ctx: &AppContext, req: &Request) -> Reply {
    let caller = match authenticate(ctx, req).await {
        Ok(c) => c,
        Err(reply) => return reply,
    };
    let requested = match req.query.get("engineerId") {
        Some(raw) => match parse_id(raw) {
            Ok(id) => Some(id),
            Err(reply) => return reply,
        },
        None => None,
    };
    let project_filter = match req.query.get("projectId") {
        Some(raw) => match parse_id(raw) {
            Ok(id) => Some(id),
            Err(reply) => return reply,
        },
        None => None,
    };
    let engineer_filter = policy::assignment_scope(&caller, requested);
    let assignments = ctx.engine.list_assignments(engineer_filter, project_filter).await;
    let mut views = Vec::with_capacity(assignments.len());
    for a in &assignments {
        views.push(assignment_view(ctx, a).await);
    }
    (200, Value::Array(views))
}

async fn get_assignment(ctx: &AppContext, req: &Request, raw_id: &str) -> Reply {
    let caller = match authenticate(ctx, req).await {
        Ok(c) => c,
        Err(reply) => return reply,
    };
    let id = match parse_id(raw_id) {
        Ok(id) => id,
        Err(reply) => return reply,
    };
    match ctx.engine.get_assignment(&id).await {
        // Engineers see only their own assignments; anything else reads
        // as absent rather than forbidden.
        Some(a) if policy::assignment_scope(&caller, None).is_none_or(|own| a.engineer_id == own) => {
            (200, assignment_view(ctx, &a).await)
        }
        _ => (404, message("not found")),
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AssignmentBody {
    engineer_id: Ulid,
    project_id: Ulid,
    allocation_percentage: u32,
    start_date: NaiveDate,
    end_date: NaiveDate,
    role: String,
}

async fn create_assignment(ctx: &AppContext, req: &Request) -> Reply {
    let caller = match authenticate(ctx, req).await {
        Ok(c) => c,
        Err(reply) => return reply,
    };
    if !policy::can_write_assignments(&caller) {
        return forbidden();
    }
    let body: AssignmentBody = match parse_body(req) {
        Ok(b) => b,
        Err(reply) => return reply,
    };
    let new = NewAssignment {
        engineer_id: body.engineer_id,
        project_id: body.project_id,
        allocation: body.allocation_percentage,
        window: DateRange {
            start: body.start_date,
            end: body.end_date,
        },
        role: body.role,
    };
    match ctx.engine.create_assignment(new).await {
        Ok(assignment) => (201, assignment_view(ctx, &assignment).await),
        Err(e) => engine_error(e),
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AssignmentPatchBody {
    project_id: Option<Ulid>,
    allocation_percentage: Option<u32>,
    start_date: Option<NaiveDate>,
    end_date: Option<NaiveDate>,
    role: Option<String>,
}

async fn update_assignment(ctx: &AppContext, req: &Request, raw_id: &str) -> Reply {
    let caller = match authenticate(ctx, req).await {
        Ok(c) => c,
        Err(reply) => return reply,
    };
    if !policy::can_write_assignments(&caller) {
        return forbidden();
    }
    let id = match parse_id(raw_id) {
        Ok(id) => id,
        Err(reply) => return reply,
    };
    let body: AssignmentPatchBody = match parse_body(req) {
        Ok(b) => b,
        Err(reply) => return reply,
    };
    let window = match (body.start_date, body.end_date) {
        (None, None) => None,
        (start, end) => {
            let Some(current) = ctx.engine.get_assignment(&id).await else {
                return (404, message("not found"));
            };
            Some(DateRange {
                start: start.unwrap_or(current.window.start),
                end: end.unwrap_or(current.window.end),
            })
        }
    };
    let patch = AssignmentPatch {
        project_id: body.project_id,
        allocation: body.allocation_percentage,
        window,
        role: body.role,
    };
    match ctx.engine.update_assignment(id, patch).await {
        Ok(assignment) => (200, assignment_view(ctx, &assignment).await),
        Err(e) => engine_error(e),
    }
}

async fn delete_assignment(ctx: &AppContext, req: &Request, raw_id: &str) -> Reply {
    let caller = match authenticate(ctx, req).await {
        Ok(c) => c,
        Err(reply) => return reply,
    };
    if !policy::can_write_assignments(&caller) {
        return forbidden();
    }
    let id = match parse_id(raw_id) {
        Ok(id) => id,
        Err(reply) => return reply,
    };
    match ctx.engine.delete_assignment(id).await {
        Ok(()) => (200, message("assignment deleted")),
        Err(e) => engine_error(e),
    }
}
