use chrono::NaiveDate;
use ulid::Ulid;

use crate::model::*;

use super::capacity::current_load;
use super::{Engine, EngineError, SharedUserState};

/// Result of the capacity endpoint: point-in-time load with the active
/// assignments inlined.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapacityReport {
    pub engineer_id: Ulid,
    pub engineer_name: String,
    pub max_capacity: u32,
    pub total_allocated: u32,
    pub available_capacity: i64,
    pub active: Vec<Assignment>,
}

impl Engine {
    fn user_states(&self) -> Vec<SharedUserState> {
        // Collect before awaiting — never hold a DashMap shard guard
        // across an await point.
        self.users.iter().map(|e| e.value().clone()).collect()
    }

    pub async fn get_user(&self, id: &Ulid) -> Option<User> {
        let us = self.user_state(id)?;
        let guard = us.read().await;
        Some(guard.user.clone())
    }

    pub async fn list_engineers(&self) -> Vec<User> {
        let mut engineers = Vec::new();
        for us in self.user_states() {
            let guard = us.read().await;
            if guard.user.role == Role::Engineer {
                engineers.push(guard.user.clone());
            }
        }
        engineers.sort_by_key(|u| u.id);
        engineers
    }

    /// Point-in-time load for one engineer.
    pub async fn capacity_report(
        &self,
        engineer_id: Ulid,
        as_of: NaiveDate,
    ) -> Result<CapacityReport, EngineError> {
        let us = self
            .user_state(&engineer_id)
            .ok_or(EngineError::NotFound(engineer_id))?;
        let guard = us.read().await;
        if guard.user.role != Role::Engineer {
            return Err(EngineError::NotAnEngineer(engineer_id));
        }
        let load = current_load(guard.user.max_capacity, as_of, &guard.assignments);
        Ok(CapacityReport {
            engineer_id,
            engineer_name: guard.user.name.clone(),
            max_capacity: guard.user.max_capacity,
            total_allocated: load.total_allocated,
            available_capacity: load.available_capacity,
            active: load.active,
        })
    }

    pub fn get_project(&self, id: &Ulid) -> Option<Project> {
        self.projects.get(id).map(|e| e.value().clone())
    }

    /// List projects, optionally filtered by status and by skill-set
    /// intersection with a requested skill list.
    pub fn list_projects(
        &self,
        status: Option<ProjectStatus>,
        skills: Option<&[String]>,
    ) -> Vec<Project> {
        let mut projects: Vec<Project> = self
            .projects
            .iter()
            .map(|e| e.value().clone())
            .filter(|p| status.is_none_or(|s| p.status == s))
            .filter(|p| skills.is_none_or(|s| skills_intersect(&p.required_skills, s)))
            .collect();
        projects.sort_by_key(|p| p.id);
        projects
    }

    /// Engineers whose skill set intersects the project's required skills.
    /// A project requiring no skills matches nobody (empty intersection).
    pub async fn suitable_engineers(&self, project_id: Ulid) -> Result<Vec<User>, EngineError> {
        let project = self
            .get_project(&project_id)
            .ok_or(EngineError::NotFound(project_id))?;
        let mut suitable = Vec::new();
        for us in self.user_states() {
            let guard = us.read().await;
            if guard.user.role == Role::Engineer
                && skills_intersect(&guard.user.skills, &project.required_skills)
            {
                suitable.push(guard.user.clone());
            }
        }
        suitable.sort_by_key(|u| u.id);
        Ok(suitable)
    }

    /// List assignments with optional engineer/project filters. Callers
    /// apply the access policy before this point (an engineer caller's
    /// forced scope arrives as `engineer_filter`).
    pub async fn list_assignments(
        &self,
        engineer_filter: Option<Ulid>,
        project_filter: Option<Ulid>,
    ) -> Vec<Assignment> {
        let states = match engineer_filter {
            Some(id) => self.user_state(&id).into_iter().collect(),
            None => self.user_states(),
        };
        let mut assignments = Vec::new();
        for us in states {
            let guard = us.read().await;
            for a in &guard.assignments {
                if project_filter.is_none_or(|p| a.project_id == p) {
                    assignments.push(a.clone());
                }
            }
        }
        assignments.sort_by_key(|a| a.id);
        assignments
    }

    pub async fn get_assignment(&self, id: &Ulid) -> Option<Assignment> {
        let engineer_id = self.engineer_for_assignment(id)?;
        let us = self.user_state(&engineer_id)?;
        let guard = us.read().await;
        guard.assignments.iter().find(|a| a.id == *id).cloned()
    }
}
