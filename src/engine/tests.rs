use std::path::PathBuf;

use chrono::NaiveDate;
use ulid::Ulid;

use super::*;
use crate::engine::mutations::{AssignmentPatch, NewAssignment, NewProject, NewUser, ProjectPatch};

fn test_wal_path(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join("rosterd_test_engine");
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join(name);
    let _ = std::fs::remove_file(&path);
    path
}

fn d(y: i32, m: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, day).unwrap()
}

fn range(s: NaiveDate, e: NaiveDate) -> DateRange {
    DateRange::new(s, e)
}

fn new_user(email: &str, role: Role, skills: &[&str], max_capacity: u32) -> NewUser {
    NewUser {
        email: email.into(),
        password: "hunter22".into(),
        name: email.split('@').next().unwrap().into(),
        role,
        skills: skills.iter().map(|s| s.to_string()).collect(),
        seniority: Seniority::Mid,
        max_capacity,
        department: "Engineering".into(),
    }
}

async fn seed_manager(engine: &Engine) -> User {
    engine
        .register_user(new_user("boss@example.com", Role::Manager, &[], 100))
        .await
        .unwrap()
}

async fn seed_engineer(engine: &Engine, email: &str, skills: &[&str], max_capacity: u32) -> User {
    engine
        .register_user(new_user(email, Role::Engineer, skills, max_capacity))
        .await
        .unwrap()
}

async fn seed_project(engine: &Engine, manager_id: Ulid, skills: &[&str]) -> Project {
    engine
        .create_project(NewProject {
            name: "Platform".into(),
            description: "Platform rebuild".into(),
            window: range(d(2025, 1, 1), d(2025, 12, 31)),
            required_skills: skills.iter().map(|s| s.to_string()).collect(),
            team_size: 3,
            status: ProjectStatus::Planning,
            manager_id,
        })
        .await
        .unwrap()
}

fn new_assignment(
    engineer_id: Ulid,
    project_id: Ulid,
    allocation: u32,
    window: DateRange,
) -> NewAssignment {
    NewAssignment {
        engineer_id,
        project_id,
        allocation,
        window,
        role: "Developer".into(),
    }
}

// ── Registration and login ───────────────────────────────

#[tokio::test]
async fn register_and_login() {
    let engine = Engine::new(test_wal_path("register_login.wal")).unwrap();
    let user = seed_engineer(&engine, "ada@example.com", &["React"], 100).await;

    let logged_in = engine.login("ada@example.com", "hunter22").await.unwrap();
    assert_eq!(logged_in.id, user.id);

    // Email lookup is case-insensitive.
    assert!(engine.login("ADA@example.com", "hunter22").await.is_ok());
}

#[tokio::test]
async fn duplicate_email_rejected() {
    let engine = Engine::new(test_wal_path("dup_email.wal")).unwrap();
    seed_engineer(&engine, "ada@example.com", &[], 100).await;

    let result = engine
        .register_user(new_user("Ada@Example.com", Role::Engineer, &[], 100))
        .await;
    assert!(matches!(result, Err(EngineError::EmailTaken(_))));
}

#[tokio::test]
async fn concurrent_registrations_single_winner() {
    let engine = std::sync::Arc::new(Engine::new(test_wal_path("concurrent_reg.wal")).unwrap());

    // Two registrations racing on one address: exactly one lands, and the
    // index points at the surviving account.
    let e1 = engine.clone();
    let e2 = engine.clone();
    let (r1, r2) = tokio::join!(
        tokio::spawn(async move {
            e1.register_user(new_user("ada@example.com", Role::Engineer, &[], 100))
                .await
        }),
        tokio::spawn(async move {
            e2.register_user(new_user("Ada@Example.com", Role::Engineer, &[], 100))
                .await
        }),
    );
    let results = [r1.unwrap(), r2.unwrap()];
    let registered = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(registered, 1);
    assert!(
        results
            .iter()
            .any(|r| matches!(r, Err(EngineError::EmailTaken(_))))
    );

    let winner = results.iter().find_map(|r| r.as_ref().ok()).unwrap();
    let logged_in = engine.login("ada@example.com", "hunter22").await.unwrap();
    assert_eq!(logged_in.id, winner.id);
    assert_eq!(engine.list_engineers().await.len(), 1);
}

#[tokio::test]
async fn login_failures_are_uniform() {
    let engine = Engine::new(test_wal_path("login_fail.wal")).unwrap();
    seed_engineer(&engine, "ada@example.com", &[], 100).await;

    let wrong_pw = engine.login("ada@example.com", "nope12").await;
    let no_user = engine.login("ghost@example.com", "hunter22").await;
    assert_eq!(wrong_pw, Err(EngineError::InvalidCredentials));
    assert_eq!(no_user, Err(EngineError::InvalidCredentials));
}

#[tokio::test]
async fn register_validates_fields() {
    let engine = Engine::new(test_wal_path("register_validate.wal")).unwrap();

    let bad_email = engine
        .register_user(new_user("not-an-email", Role::Engineer, &[], 100))
        .await;
    assert!(matches!(bad_email, Err(EngineError::Validation(_))));

    let mut short_pw = new_user("ok@example.com", Role::Engineer, &[], 100);
    short_pw.password = "12345".into();
    assert!(matches!(
        engine.register_user(short_pw).await,
        Err(EngineError::Validation(_))
    ));
}

// ── Engineer profile ─────────────────────────────────────

#[tokio::test]
async fn update_engineer_profile() {
    let engine = Engine::new(test_wal_path("update_engineer.wal")).unwrap();
    let eng = seed_engineer(&engine, "ada@example.com", &["React"], 100).await;

    let updated = engine
        .update_engineer(
            eng.id,
            Some(vec!["React".into(), "Rust".into()]),
            Some(Seniority::Senior),
            Some(80),
        )
        .await
        .unwrap();
    assert_eq!(updated.skills, vec!["React".to_string(), "Rust".to_string()]);
    assert_eq!(updated.seniority, Seniority::Senior);
    assert_eq!(updated.max_capacity, 80);

    // Partial update keeps omitted fields.
    let partial = engine
        .update_engineer(eng.id, None, None, Some(60))
        .await
        .unwrap();
    assert_eq!(partial.skills.len(), 2);
    assert_eq!(partial.max_capacity, 60);
}

#[tokio::test]
async fn update_engineer_rejects_managers_and_ghosts() {
    let engine = Engine::new(test_wal_path("update_engineer_bad.wal")).unwrap();
    let mgr = seed_manager(&engine).await;

    assert!(matches!(
        engine.update_engineer(mgr.id, None, None, Some(50)).await,
        Err(EngineError::NotAnEngineer(_))
    ));
    assert!(matches!(
        engine.update_engineer(Ulid::new(), None, None, None).await,
        Err(EngineError::NotFound(_))
    ));
}

// ── Projects ─────────────────────────────────────────────

#[tokio::test]
async fn create_project_requires_manager_owner() {
    let engine = Engine::new(test_wal_path("project_owner.wal")).unwrap();
    let eng = seed_engineer(&engine, "ada@example.com", &[], 100).await;

    let result = engine
        .create_project(NewProject {
            name: "P".into(),
            description: "D".into(),
            window: range(d(2025, 1, 1), d(2025, 6, 30)),
            required_skills: vec![],
            team_size: 1,
            status: ProjectStatus::Planning,
            manager_id: eng.id,
        })
        .await;
    assert!(matches!(result, Err(EngineError::Validation(_))));
}

#[tokio::test]
async fn update_project_revalidates_merged_record() {
    let engine = Engine::new(test_wal_path("project_update.wal")).unwrap();
    let mgr = seed_manager(&engine).await;
    let project = seed_project(&engine, mgr.id, &["React"]).await;

    let updated = engine
        .update_project(
            project.id,
            ProjectPatch {
                status: Some(ProjectStatus::Active),
                team_size: Some(5),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(updated.status, ProjectStatus::Active);
    assert_eq!(updated.team_size, 5);
    assert_eq!(updated.name, project.name);

    // Out-of-range patches are rejected, not silently stored.
    assert!(matches!(
        engine
            .update_project(
                project.id,
                ProjectPatch {
                    team_size: Some(0),
                    ..Default::default()
                },
            )
            .await,
        Err(EngineError::Validation(_))
    ));
    assert!(matches!(
        engine
            .update_project(
                project.id,
                ProjectPatch {
                    window: Some(DateRange {
                        start: d(2025, 6, 2),
                        end: d(2025, 6, 1),
                    }),
                    ..Default::default()
                },
            )
            .await,
        Err(EngineError::Validation(_))
    ));
}

#[tokio::test]
async fn project_filters() {
    let engine = Engine::new(test_wal_path("project_filters.wal")).unwrap();
    let mgr = seed_manager(&engine).await;
    let react = seed_project(&engine, mgr.id, &["React", "Node.js"]).await;
    let python = seed_project(&engine, mgr.id, &["Python"]).await;
    engine
        .update_project(
            python.id,
            ProjectPatch {
                status: Some(ProjectStatus::Active),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    assert_eq!(engine.list_projects(None, None).len(), 2);
    let active = engine.list_projects(Some(ProjectStatus::Active), None);
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].id, python.id);

    let react_filter = vec!["React".to_string()];
    let hits = engine.list_projects(None, Some(&react_filter));
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].id, react.id);
}

// ── Assignment admission ─────────────────────────────────

#[tokio::test]
async fn admission_scenarios() {
    let engine = Engine::new(test_wal_path("admission.wal")).unwrap();
    let mgr = seed_manager(&engine).await;
    let eng = seed_engineer(&engine, "ada@example.com", &["React"], 100).await;
    let project = seed_project(&engine, mgr.id, &["React"]).await;

    // Scenario 1: empty schedule, 80% admitted.
    engine
        .create_assignment(new_assignment(
            eng.id,
            project.id,
            80,
            range(d(2025, 6, 1), d(2025, 6, 22)),
        ))
        .await
        .unwrap();

    // Scenario 2: overlapping 30% rejected, 20% spare reported.
    let rejected = engine
        .create_assignment(new_assignment(
            eng.id,
            project.id,
            30,
            range(d(2025, 6, 10), d(2025, 6, 30)),
        ))
        .await;
    assert_eq!(rejected, Err(EngineError::CapacityExceeded { available: 20 }));

    // Scenario 3: disjoint 90% admitted.
    engine
        .create_assignment(new_assignment(
            eng.id,
            project.id,
            90,
            range(d(2025, 7, 1), d(2025, 7, 10)),
        ))
        .await
        .unwrap();

    // Exactly filling the remaining 20% during June is admissible.
    engine
        .create_assignment(new_assignment(
            eng.id,
            project.id,
            20,
            range(d(2025, 6, 5), d(2025, 6, 15)),
        ))
        .await
        .unwrap();
}

#[tokio::test]
async fn admission_checks_references() {
    let engine = Engine::new(test_wal_path("admission_refs.wal")).unwrap();
    let mgr = seed_manager(&engine).await;
    let eng = seed_engineer(&engine, "ada@example.com", &[], 100).await;
    let project = seed_project(&engine, mgr.id, &[]).await;
    let window = range(d(2025, 6, 1), d(2025, 6, 22));

    assert!(matches!(
        engine
            .create_assignment(new_assignment(Ulid::new(), project.id, 50, window))
            .await,
        Err(EngineError::NotFound(_))
    ));
    assert!(matches!(
        engine
            .create_assignment(new_assignment(eng.id, Ulid::new(), 50, window))
            .await,
        Err(EngineError::NotFound(_))
    ));
    // Managers cannot carry assignments.
    assert!(matches!(
        engine
            .create_assignment(new_assignment(mgr.id, project.id, 50, window))
            .await,
        Err(EngineError::NotAnEngineer(_))
    ));
    // Allocation bounds enforced on create.
    assert!(matches!(
        engine
            .create_assignment(new_assignment(eng.id, project.id, 0, window))
            .await,
        Err(EngineError::Validation(_))
    ));
    assert!(matches!(
        engine
            .create_assignment(new_assignment(eng.id, project.id, 101, window))
            .await,
        Err(EngineError::Validation(_))
    ));
}

#[tokio::test]
async fn update_excludes_own_contribution() {
    let engine = Engine::new(test_wal_path("update_excl_self.wal")).unwrap();
    let mgr = seed_manager(&engine).await;
    let eng = seed_engineer(&engine, "ada@example.com", &[], 100).await;
    let project = seed_project(&engine, mgr.id, &[]).await;

    let a = engine
        .create_assignment(new_assignment(
            eng.id,
            project.id,
            80,
            range(d(2025, 6, 1), d(2025, 6, 22)),
        ))
        .await
        .unwrap();

    // Raising 80 → 100 on the same window must pass: the assignment's
    // own allocation does not count against itself.
    let updated = engine
        .update_assignment(
            a.id,
            AssignmentPatch {
                allocation: Some(100),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(updated.allocation, 100);
}

#[tokio::test]
async fn update_revalidates_and_rechecks() {
    let engine = Engine::new(test_wal_path("update_recheck.wal")).unwrap();
    let mgr = seed_manager(&engine).await;
    let eng = seed_engineer(&engine, "ada@example.com", &[], 100).await;
    let project = seed_project(&engine, mgr.id, &[]).await;

    let june = engine
        .create_assignment(new_assignment(
            eng.id,
            project.id,
            80,
            range(d(2025, 6, 1), d(2025, 6, 22)),
        ))
        .await
        .unwrap();
    let july = engine
        .create_assignment(new_assignment(
            eng.id,
            project.id,
            90,
            range(d(2025, 7, 1), d(2025, 7, 10)),
        ))
        .await
        .unwrap();

    // Sliding July into June would stack 90 on 80.
    let slid = engine
        .update_assignment(
            july.id,
            AssignmentPatch {
                window: Some(range(d(2025, 6, 15), d(2025, 6, 25))),
                ..Default::default()
            },
        )
        .await;
    assert_eq!(slid, Err(EngineError::CapacityExceeded { available: 20 }));

    // The update path enforces the same bounds as create.
    assert!(matches!(
        engine
            .update_assignment(
                june.id,
                AssignmentPatch {
                    allocation: Some(0),
                    ..Default::default()
                },
            )
            .await,
        Err(EngineError::Validation(_))
    ));
    assert!(matches!(
        engine
            .update_assignment(
                june.id,
                AssignmentPatch {
                    window: Some(DateRange {
                        start: d(2025, 6, 22),
                        end: d(2025, 6, 1),
                    }),
                    ..Default::default()
                },
            )
            .await,
        Err(EngineError::Validation(_))
    ));
}

#[tokio::test]
async fn delete_frees_capacity() {
    let engine = Engine::new(test_wal_path("delete_frees.wal")).unwrap();
    let mgr = seed_manager(&engine).await;
    let eng = seed_engineer(&engine, "ada@example.com", &[], 100).await;
    let project = seed_project(&engine, mgr.id, &[]).await;
    let window = range(d(2025, 6, 1), d(2025, 6, 22));

    let a = engine
        .create_assignment(new_assignment(eng.id, project.id, 80, window))
        .await
        .unwrap();
    assert!(
        engine
            .create_assignment(new_assignment(eng.id, project.id, 80, window))
            .await
            .is_err()
    );

    engine.delete_assignment(a.id).await.unwrap();
    assert!(engine.get_assignment(&a.id).await.is_none());
    engine
        .create_assignment(new_assignment(eng.id, project.id, 80, window))
        .await
        .unwrap();

    assert!(matches!(
        engine.delete_assignment(a.id).await,
        Err(EngineError::NotFound(_))
    ));
}

#[tokio::test]
async fn concurrent_admissions_never_jointly_exceed() {
    let engine = std::sync::Arc::new(Engine::new(test_wal_path("concurrent.wal")).unwrap());
    let mgr = seed_manager(&engine).await;
    let eng = seed_engineer(&engine, "ada@example.com", &[], 100).await;
    let project = seed_project(&engine, mgr.id, &[]).await;
    let window = range(d(2025, 6, 1), d(2025, 6, 22));

    // Two 60% candidates racing on a 100% engineer: exactly one admits.
    let e1 = engine.clone();
    let e2 = engine.clone();
    let (pid1, pid2) = (project.id, project.id);
    let (r1, r2) = tokio::join!(
        tokio::spawn(async move {
            e1.create_assignment(new_assignment(eng.id, pid1, 60, window))
                .await
        }),
        tokio::spawn(async move {
            e2.create_assignment(new_assignment(eng.id, pid2, 60, window))
                .await
        }),
    );
    let results = [r1.unwrap(), r2.unwrap()];
    let admitted = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(admitted, 1);
    assert!(
        results
            .iter()
            .any(|r| matches!(r, Err(EngineError::CapacityExceeded { .. })))
    );
}

// ── Queries ──────────────────────────────────────────────

#[tokio::test]
async fn capacity_report_point_in_time() {
    let engine = Engine::new(test_wal_path("capacity_report.wal")).unwrap();
    let mgr = seed_manager(&engine).await;
    let eng = seed_engineer(&engine, "ada@example.com", &[], 100).await;
    let project = seed_project(&engine, mgr.id, &[]).await;

    engine
        .create_assignment(new_assignment(
            eng.id,
            project.id,
            80,
            range(d(2025, 6, 1), d(2025, 6, 22)),
        ))
        .await
        .unwrap();

    let mid_june = engine.capacity_report(eng.id, d(2025, 6, 15)).await.unwrap();
    assert_eq!(mid_june.total_allocated, 80);
    assert_eq!(mid_june.available_capacity, 20);
    assert_eq!(mid_june.active.len(), 1);

    let july = engine.capacity_report(eng.id, d(2025, 7, 15)).await.unwrap();
    assert_eq!(july.total_allocated, 0);
    assert!(july.active.is_empty());

    assert!(matches!(
        engine.capacity_report(mgr.id, d(2025, 6, 15)).await,
        Err(EngineError::NotAnEngineer(_))
    ));
}

#[tokio::test]
async fn suitable_engineers_by_skill_intersection() {
    let engine = Engine::new(test_wal_path("suitable.wal")).unwrap();
    let mgr = seed_manager(&engine).await;
    let react = seed_engineer(&engine, "react@example.com", &["React", "CSS"], 100).await;
    let node = seed_engineer(&engine, "node@example.com", &["Node.js"], 100).await;
    let _python = seed_engineer(&engine, "py@example.com", &["Python"], 100).await;
    let project = seed_project(&engine, mgr.id, &["React", "Node.js"]).await;

    let suitable = engine.suitable_engineers(project.id).await.unwrap();
    let ids: Vec<Ulid> = suitable.iter().map(|u| u.id).collect();
    assert!(ids.contains(&react.id));
    assert!(ids.contains(&node.id));
    assert_eq!(suitable.len(), 2);
}

#[tokio::test]
async fn list_assignments_filters() {
    let engine = Engine::new(test_wal_path("list_assignments.wal")).unwrap();
    let mgr = seed_manager(&engine).await;
    let a = seed_engineer(&engine, "a@example.com", &[], 100).await;
    let b = seed_engineer(&engine, "b@example.com", &[], 100).await;
    let p1 = seed_project(&engine, mgr.id, &[]).await;
    let p2 = seed_project(&engine, mgr.id, &[]).await;

    engine
        .create_assignment(new_assignment(a.id, p1.id, 50, range(d(2025, 6, 1), d(2025, 6, 30))))
        .await
        .unwrap();
    engine
        .create_assignment(new_assignment(a.id, p2.id, 50, range(d(2025, 7, 1), d(2025, 7, 31))))
        .await
        .unwrap();
    engine
        .create_assignment(new_assignment(b.id, p1.id, 50, range(d(2025, 6, 1), d(2025, 6, 30))))
        .await
        .unwrap();

    assert_eq!(engine.list_assignments(None, None).await.len(), 3);
    assert_eq!(engine.list_assignments(Some(a.id), None).await.len(), 2);
    assert_eq!(engine.list_assignments(None, Some(p1.id)).await.len(), 2);
    assert_eq!(engine.list_assignments(Some(a.id), Some(p2.id)).await.len(), 1);
    assert!(engine.list_assignments(Some(Ulid::new()), None).await.is_empty());
}

#[tokio::test]
async fn list_engineers_excludes_managers() {
    let engine = Engine::new(test_wal_path("list_engineers.wal")).unwrap();
    seed_manager(&engine).await;
    seed_engineer(&engine, "a@example.com", &[], 100).await;
    seed_engineer(&engine, "b@example.com", &[], 100).await;

    let engineers = engine.list_engineers().await;
    assert_eq!(engineers.len(), 2);
    assert!(engineers.iter().all(|u| u.role == Role::Engineer));
}

// ── Durability ───────────────────────────────────────────

#[tokio::test]
async fn state_survives_restart() {
    let path = test_wal_path("restart.wal");

    let (eng_id, project_id, assignment_id);
    {
        let engine = Engine::new(path.clone()).unwrap();
        let mgr = seed_manager(&engine).await;
        let eng = seed_engineer(&engine, "ada@example.com", &["React"], 100).await;
        let project = seed_project(&engine, mgr.id, &["React"]).await;
        let a = engine
            .create_assignment(new_assignment(
                eng.id,
                project.id,
                80,
                range(d(2025, 6, 1), d(2025, 6, 22)),
            ))
            .await
            .unwrap();
        eng_id = eng.id;
        project_id = project.id;
        assignment_id = a.id;
    }

    let reopened = Engine::new(path).unwrap();
    let user = reopened.get_user(&eng_id).await.unwrap();
    assert_eq!(user.email, "ada@example.com");
    assert!(reopened.get_project(&project_id).is_some());
    let a = reopened.get_assignment(&assignment_id).await.unwrap();
    assert_eq!(a.allocation, 80);

    // Capacity state carried over: the June window is still full.
    let rejected = reopened
        .create_assignment(new_assignment(
            eng_id,
            project_id,
            30,
            range(d(2025, 6, 10), d(2025, 6, 30)),
        ))
        .await;
    assert_eq!(rejected, Err(EngineError::CapacityExceeded { available: 20 }));

    // Login still works from the persisted hash.
    assert!(reopened.login("ada@example.com", "hunter22").await.is_ok());
}

#[tokio::test]
async fn compaction_preserves_state() {
    let path = test_wal_path("compaction.wal");

    let engine = Engine::new(path.clone()).unwrap();
    let mgr = seed_manager(&engine).await;
    let eng = seed_engineer(&engine, "ada@example.com", &[], 100).await;
    let project = seed_project(&engine, mgr.id, &[]).await;
    // Churn: create and delete, leaving one live assignment.
    for _ in 0..5 {
        let a = engine
            .create_assignment(new_assignment(
                eng.id,
                project.id,
                50,
                range(d(2025, 6, 1), d(2025, 6, 30)),
            ))
            .await
            .unwrap();
        engine.delete_assignment(a.id).await.unwrap();
    }
    let keep = engine
        .create_assignment(new_assignment(
            eng.id,
            project.id,
            60,
            range(d(2025, 6, 1), d(2025, 6, 30)),
        ))
        .await
        .unwrap();

    engine.compact_wal().await.unwrap();
    assert_eq!(engine.wal_appends_since_compact().await, 0);
    drop(engine);

    let reopened = Engine::new(path).unwrap();
    assert_eq!(reopened.list_assignments(None, None).await.len(), 1);
    let a = reopened.get_assignment(&keep.id).await.unwrap();
    assert_eq!(a.allocation, 60);
    assert!(reopened.get_project(&project.id).is_some());
    assert_eq!(reopened.list_engineers().await.len(), 1);
}
