//! Demo fixture loader: populates the WAL with a manager, four
//! engineers, four projects, and a handful of assignments so a fresh
//! checkout has something to browse.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::NaiveDate;
use tracing::info;
use ulid::Ulid;

use rosterd::engine::Engine;
use rosterd::engine::mutations::{NewAssignment, NewProject, NewUser};
use rosterd::model::*;

fn date(raw: &str) -> NaiveDate {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d").expect("fixture date")
}

fn range(start: &str, end: &str) -> DateRange {
    DateRange::new(date(start), date(end))
}

async fn engineer(
    engine: &Engine,
    email: &str,
    name: &str,
    skills: &[&str],
    seniority: Seniority,
    max_capacity: u32,
) -> Ulid {
    let user = engine
        .register_user(NewUser {
            email: email.into(),
            password: "changeme".into(),
            name: name.into(),
            role: Role::Engineer,
            skills: skills.iter().map(|s| s.to_string()).collect(),
            seniority,
            max_capacity,
            department: "Engineering".into(),
        })
        .await
        .expect("seed engineer");
    user.id
}

async fn project(
    engine: &Engine,
    manager_id: Ulid,
    name: &str,
    description: &str,
    window: DateRange,
    skills: &[&str],
    team_size: u32,
) -> Ulid {
    let project = engine
        .create_project(NewProject {
            name: name.into(),
            description: description.into(),
            window,
            required_skills: skills.iter().map(|s| s.to_string()).collect(),
            team_size,
            status: ProjectStatus::Active,
            manager_id,
        })
        .await
        .expect("seed project");
    project.id
}

async fn assign(
    engine: &Engine,
    engineer_id: Ulid,
    project_id: Ulid,
    allocation: u32,
    window: DateRange,
    role: &str,
) {
    engine
        .create_assignment(NewAssignment {
            engineer_id,
            project_id,
            allocation,
            window,
            role: role.into(),
        })
        .await
        .expect("seed assignment");
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let data_dir = std::env::var("ROSTERD_DATA_DIR").unwrap_or_else(|_| "./data".into());
    std::fs::create_dir_all(&data_dir)?;
    let wal_path = PathBuf::from(&data_dir).join("rosterd.wal");
    let engine = Arc::new(Engine::new(wal_path)?);

    let manager = engine
        .register_user(NewUser {
            email: "manager@example.com".into(),
            password: "changeme".into(),
            name: "Morgan Vale".into(),
            role: Role::Manager,
            skills: vec![],
            seniority: Seniority::Senior,
            max_capacity: 100,
            department: "Engineering".into(),
        })
        .await?
        .id;

    let react_dev = engineer(
        &engine,
        "react.dev@example.com",
        "Ari Holt",
        &["React", "Node.js", "TypeScript", "MySQL"],
        Seniority::Senior,
        100,
    )
    .await;
    let python_dev = engineer(
        &engine,
        "python.dev@example.com",
        "Blake Iver",
        &["Python", "Django", "PostgreSQL"],
        Seniority::Mid,
        100,
    )
    .await;
    let frontend_dev = engineer(
        &engine,
        "frontend.dev@example.com",
        "Casey Juno",
        &["React", "Vue.js", "CSS"],
        Seniority::Junior,
        50,
    )
    .await;
    let node_dev = engineer(
        &engine,
        "node.dev@example.com",
        "Devon Kerr",
        &["Node.js", "MongoDB", "Express"],
        Seniority::Senior,
        100,
    )
    .await;

    let hrms = project(
        &engine,
        manager,
        "HRMS",
        "Human resource management system with a React frontend",
        range("2025-06-01", "2025-06-22"),
        &["React", "Node.js", "TypeScript"],
        3,
    )
    .await;
    let analytics = project(
        &engine,
        manager,
        "Data Analytics Dashboard",
        "Python analytics dashboard for business intelligence",
        range("2025-02-01", "2025-05-31"),
        &["Python", "Django", "PostgreSQL"],
        2,
    )
    .await;
    let shop = project(
        &engine,
        manager,
        "E-Commerce Web App",
        "Vue.js frontend with Node.js backend for a shopping platform",
        range("2025-04-01", "2025-07-01"),
        &["Vue.js", "Node.js", "MongoDB"],
        4,
    )
    .await;
    let devops = project(
        &engine,
        manager,
        "Internal DevOps Tool",
        "Internal tooling for automated deployments and monitoring",
        range("2025-03-15", "2025-06-30"),
        &["Node.js", "Express", "MySQL"],
        2,
    )
    .await;

    assign(&engine, react_dev, hrms, 80, range("2025-06-01", "2025-06-22"), "Tech Lead").await;
    assign(&engine, python_dev, analytics, 100, range("2025-04-01", "2025-05-31"), "Backend Developer").await;
    assign(&engine, frontend_dev, shop, 50, range("2025-04-01", "2025-06-30"), "Frontend Intern").await;
    assign(&engine, node_dev, shop, 100, range("2025-04-01", "2025-06-30"), "Backend Developer").await;
    assign(&engine, react_dev, devops, 60, range("2025-03-20", "2025-05-31"), "DevOps Engineer").await;
    assign(&engine, python_dev, devops, 40, range("2025-06-01", "2025-06-30"), "Database Admin").await;

    info!("seed data written to {data_dir}");
    info!("login: manager@example.com / changeme (manager)");
    info!("login: react.dev@example.com / changeme (engineer)");
    Ok(())
}
