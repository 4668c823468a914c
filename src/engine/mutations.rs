use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use tokio::sync::{RwLock, oneshot};
use ulid::Ulid;

use crate::auth;
use crate::limits::*;
use crate::model::*;

use super::capacity::check_capacity;
use super::validate::*;
use super::{Engine, EngineError, WalCommand};

pub struct NewUser {
    pub email: String,
    pub password: String,
    pub name: String,
    pub role: Role,
    pub skills: Vec<String>,
    pub seniority: Seniority,
    pub max_capacity: u32,
    pub department: String,
}

pub struct NewProject {
    pub name: String,
    pub description: String,
    pub window: DateRange,
    pub required_skills: Vec<String>,
    pub team_size: u32,
    pub status: ProjectStatus,
    pub manager_id: Ulid,
}

/// Partial project update. `None` keeps the existing value; the merged
/// record is re-validated in full before it is committed.
#[derive(Default)]
pub struct ProjectPatch {
    pub name: Option<String>,
    pub description: Option<String>,
    pub window: Option<DateRange>,
    pub required_skills: Option<Vec<String>>,
    pub team_size: Option<u32>,
    pub status: Option<ProjectStatus>,
}

pub struct NewAssignment {
    pub engineer_id: Ulid,
    pub project_id: Ulid,
    pub allocation: u32,
    pub window: DateRange,
    pub role: String,
}

/// Partial assignment update. The engineer reference is fixed for the
/// lifetime of an assignment; moving work to another engineer is a
/// delete + create.
#[derive(Default)]
pub struct AssignmentPatch {
    pub project_id: Option<Ulid>,
    pub allocation: Option<u32>,
    pub window: Option<DateRange>,
    pub role: Option<String>,
}

impl Engine {
    pub async fn register_user(&self, new: NewUser) -> Result<User, EngineError> {
        validate_email(&new.email)?;
        validate_password(&new.password)?;
        validate_name(&new.name)?;
        validate_skills(&new.skills)?;
        validate_max_capacity(new.max_capacity)?;
        validate_department(&new.department)?;
        if self.users.len() >= MAX_USERS {
            return Err(EngineError::LimitExceeded("too many users"));
        }

        let user = User {
            id: Ulid::new(),
            email: new.email,
            name: new.name,
            password_hash: auth::hash_password(&new.password),
            role: new.role,
            skills: new.skills,
            seniority: new.seniority,
            max_capacity: new.max_capacity,
            department: new.department,
        };

        // Reserve the email before the WAL append suspends: the vacant-entry
        // insert is the uniqueness decision, so two concurrent registrations
        // for the same address cannot both pass. The guard is released
        // before the await; on append failure the reservation is rolled back.
        let email_key = user.email.to_lowercase();
        match self.email_index.entry(email_key.clone()) {
            Entry::Occupied(_) => return Err(EngineError::EmailTaken(user.email)),
            Entry::Vacant(slot) => {
                slot.insert(user.id);
            }
        }

        let event = Event::UserRegistered { user: user.clone() };
        if let Err(e) = self.wal_append(&event).await {
            self.email_index.remove(&email_key);
            return Err(e);
        }
        self.users
            .insert(user.id, Arc::new(RwLock::new(UserState::new(user.clone()))));
        Ok(user)
    }

    /// Verify credentials, returning the user on success. Unknown email
    /// and wrong password are indistinguishable to the caller.
    pub async fn login(&self, email: &str, password: &str) -> Result<User, EngineError> {
        let user_id = self
            .email_index
            .get(&email.to_lowercase())
            .map(|e| *e.value())
            .ok_or(EngineError::InvalidCredentials)?;
        let us = self
            .user_state(&user_id)
            .ok_or(EngineError::InvalidCredentials)?;
        let guard = us.read().await;
        if !auth::verify_password(password, &guard.user.password_hash) {
            return Err(EngineError::InvalidCredentials);
        }
        Ok(guard.user.clone())
    }

    /// Update an engineer's mutable profile fields. Lowering max capacity
    /// below current load is allowed — the invariant is enforced at
    /// assignment admission, not retroactively.
    pub async fn update_engineer(
        &self,
        id: Ulid,
        skills: Option<Vec<String>>,
        seniority: Option<Seniority>,
        max_capacity: Option<u32>,
    ) -> Result<User, EngineError> {
        let us = self.user_state(&id).ok_or(EngineError::NotFound(id))?;
        let mut guard = us.write().await;
        if guard.user.role != Role::Engineer {
            return Err(EngineError::NotAnEngineer(id));
        }

        let skills = skills.unwrap_or_else(|| guard.user.skills.clone());
        let seniority = seniority.unwrap_or(guard.user.seniority);
        let max_capacity = max_capacity.unwrap_or(guard.user.max_capacity);
        validate_skills(&skills)?;
        validate_max_capacity(max_capacity)?;

        let event = Event::EngineerUpdated {
            id,
            skills,
            seniority,
            max_capacity,
        };
        self.persist_and_apply(&mut guard, &event).await?;
        Ok(guard.user.clone())
    }

    pub async fn create_project(&self, new: NewProject) -> Result<Project, EngineError> {
        validate_name(&new.name)?;
        validate_description(&new.description)?;
        validate_window(&new.window)?;
        validate_skills(&new.required_skills)?;
        validate_team_size(new.team_size)?;
        if self.projects.len() >= MAX_PROJECTS {
            return Err(EngineError::LimitExceeded("too many projects"));
        }

        let manager = self
            .user_state(&new.manager_id)
            .ok_or(EngineError::NotFound(new.manager_id))?;
        if manager.read().await.user.role != Role::Manager {
            return Err(EngineError::Validation("project owner must be a manager"));
        }

        let project = Project {
            id: Ulid::new(),
            name: new.name,
            description: new.description,
            window: new.window,
            required_skills: new.required_skills,
            team_size: new.team_size,
            status: new.status,
            manager_id: new.manager_id,
        };

        let event = Event::ProjectCreated {
            project: project.clone(),
        };
        self.wal_append(&event).await?;
        self.projects.insert(project.id, project.clone());
        Ok(project)
    }

    /// Merge the patch into the stored project and re-validate the merged
    /// record in full before committing. Status transitions stay
    /// unconstrained. Last-writer-wins between concurrent updates.
    pub async fn update_project(
        &self,
        id: Ulid,
        patch: ProjectPatch,
    ) -> Result<Project, EngineError> {
        let mut project = self
            .projects
            .get(&id)
            .map(|e| e.value().clone())
            .ok_or(EngineError::NotFound(id))?;

        if let Some(name) = patch.name {
            project.name = name;
        }
        if let Some(description) = patch.description {
            project.description = description;
        }
        if let Some(window) = patch.window {
            project.window = window;
        }
        if let Some(required_skills) = patch.required_skills {
            project.required_skills = required_skills;
        }
        if let Some(team_size) = patch.team_size {
            project.team_size = team_size;
        }
        if let Some(status) = patch.status {
            project.status = status;
        }

        validate_name(&project.name)?;
        validate_description(&project.description)?;
        validate_window(&project.window)?;
        validate_skills(&project.required_skills)?;
        validate_team_size(project.team_size)?;

        let event = Event::ProjectUpdated {
            project: project.clone(),
        };
        self.wal_append(&event).await?;
        self.projects.insert(id, project.clone());
        Ok(project)
    }

    /// Admit a new assignment. The engineer's write lock is held across
    /// read-check-WAL-apply, so two concurrent admissions can never both
    /// pass against the same snapshot.
    pub async fn create_assignment(&self, new: NewAssignment) -> Result<Assignment, EngineError> {
        validate_allocation(new.allocation)?;
        validate_window(&new.window)?;
        validate_role_label(&new.role)?;
        if !self.projects.contains_key(&new.project_id) {
            return Err(EngineError::NotFound(new.project_id));
        }

        let us = self
            .user_state(&new.engineer_id)
            .ok_or(EngineError::NotFound(new.engineer_id))?;
        let mut guard = us.write().await;
        if guard.user.role != Role::Engineer {
            return Err(EngineError::NotAnEngineer(new.engineer_id));
        }
        if guard.assignments.len() >= MAX_ASSIGNMENTS_PER_ENGINEER {
            return Err(EngineError::LimitExceeded("too many assignments on engineer"));
        }

        let decision = check_capacity(
            guard.user.max_capacity,
            &new.window,
            new.allocation,
            &guard.assignments,
        );
        if !decision.admissible {
            return Err(EngineError::CapacityExceeded {
                available: decision.available_capacity,
            });
        }

        let assignment = Assignment {
            id: Ulid::new(),
            engineer_id: new.engineer_id,
            project_id: new.project_id,
            allocation: new.allocation,
            window: new.window,
            role: new.role,
        };
        let event = Event::AssignmentCreated {
            assignment: assignment.clone(),
        };
        self.persist_and_apply(&mut guard, &event).await?;
        Ok(assignment)
    }

    /// Update an assignment, re-running the full validation and the
    /// capacity check with the assignment's own contribution excluded.
    pub async fn update_assignment(
        &self,
        id: Ulid,
        patch: AssignmentPatch,
    ) -> Result<Assignment, EngineError> {
        let (_, mut guard) = self.resolve_assignment_write(&id).await?;
        let mut assignment = guard
            .assignments
            .iter()
            .find(|a| a.id == id)
            .cloned()
            .ok_or(EngineError::NotFound(id))?;

        if let Some(project_id) = patch.project_id {
            if !self.projects.contains_key(&project_id) {
                return Err(EngineError::NotFound(project_id));
            }
            assignment.project_id = project_id;
        }
        if let Some(allocation) = patch.allocation {
            assignment.allocation = allocation;
        }
        if let Some(window) = patch.window {
            assignment.window = window;
        }
        if let Some(role) = patch.role {
            assignment.role = role;
        }

        validate_allocation(assignment.allocation)?;
        validate_window(&assignment.window)?;
        validate_role_label(&assignment.role)?;

        let others: Vec<Assignment> = guard
            .assignments
            .iter()
            .filter(|a| a.id != id)
            .cloned()
            .collect();
        let decision = check_capacity(
            guard.user.max_capacity,
            &assignment.window,
            assignment.allocation,
            &others,
        );
        if !decision.admissible {
            return Err(EngineError::CapacityExceeded {
                available: decision.available_capacity,
            });
        }

        let event = Event::AssignmentUpdated {
            assignment: assignment.clone(),
        };
        self.persist_and_apply(&mut guard, &event).await?;
        Ok(assignment)
    }

    pub async fn delete_assignment(&self, id: Ulid) -> Result<(), EngineError> {
        let (engineer_id, mut guard) = self.resolve_assignment_write(&id).await?;
        let event = Event::AssignmentDeleted { id, engineer_id };
        self.persist_and_apply(&mut guard, &event).await
    }

    /// Rewrite the WAL with only the events needed to recreate the
    /// current state: one create per live user, project, and assignment.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let mut events = Vec::new();

        // Collect the Arcs before awaiting; holding a shard guard across
        // an await point can deadlock against writers.
        let states: Vec<Arc<RwLock<UserState>>> =
            self.users.iter().map(|e| e.value().clone()).collect();

        let mut assignment_events = Vec::new();
        for us in &states {
            let guard = us.read().await;
            events.push(Event::UserRegistered {
                user: guard.user.clone(),
            });
            for assignment in &guard.assignments {
                assignment_events.push(Event::AssignmentCreated {
                    assignment: assignment.clone(),
                });
            }
        }
        for entry in self.projects.iter() {
            events.push(Event::ProjectCreated {
                project: entry.value().clone(),
            });
        }
        // Assignment events last so replay always finds the engineer and
        // the project.
        events.extend(assignment_events);

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact {
                events,
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}
