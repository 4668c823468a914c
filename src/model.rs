use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Closed interval `[start, end]` at day granularity.
///
/// Overlap is inclusive on both bounds: two ranges that touch at exactly
/// one boundary day count as overlapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        debug_assert!(start <= end, "DateRange start must not be after end");
        Self { start, end }
    }

    pub fn overlaps(&self, other: &DateRange) -> bool {
        self.start <= other.end && other.start <= self.end
    }

    pub fn contains_day(&self, day: NaiveDate) -> bool {
        self.start <= day && day <= self.end
    }

    pub fn duration_days(&self) -> i64 {
        (self.end - self.start).num_days() + 1
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Engineer,
    Manager,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Seniority {
    Junior,
    Mid,
    Senior,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProjectStatus {
    Planning,
    Active,
    Completed,
}

/// One account — engineers and managers share the record shape, split by
/// `role`. `password_hash` is persisted in the WAL but never leaves the
/// API layer (responses build explicit JSON objects without it).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: Ulid,
    pub email: String,
    pub name: String,
    pub password_hash: String,
    pub role: Role,
    pub skills: Vec<String>,
    pub seniority: Seniority,
    pub max_capacity: u32,
    pub department: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Project {
    pub id: Ulid,
    pub name: String,
    pub description: String,
    pub window: DateRange,
    pub required_skills: Vec<String>,
    pub team_size: u32,
    pub status: ProjectStatus,
    pub manager_id: Ulid,
}

/// Association record between one engineer and one project. Owns neither.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Assignment {
    pub id: Ulid,
    pub engineer_id: Ulid,
    pub project_id: Ulid,
    /// Fraction of the engineer's capacity this assignment consumes, 1–100.
    pub allocation: u32,
    pub window: DateRange,
    /// Free-text role label, e.g. "Developer" or "Tech Lead".
    pub role: String,
}

/// A user record plus the assignments referencing it, sorted by
/// `window.start`. Managers carry an empty assignment list.
///
/// Holding this behind one `RwLock` is what makes the capacity admission
/// check race-free: create/update/delete take the write lock around
/// read-check-write.
#[derive(Debug, Clone)]
pub struct UserState {
    pub user: User,
    pub assignments: Vec<Assignment>,
}

impl UserState {
    pub fn new(user: User) -> Self {
        Self {
            user,
            assignments: Vec::new(),
        }
    }

    /// Insert keeping sort order by window.start.
    pub fn insert_assignment(&mut self, assignment: Assignment) {
        let pos = self
            .assignments
            .binary_search_by_key(&assignment.window.start, |a| a.window.start)
            .unwrap_or_else(|e| e);
        self.assignments.insert(pos, assignment);
    }

    pub fn remove_assignment(&mut self, id: Ulid) -> Option<Assignment> {
        if let Some(pos) = self.assignments.iter().position(|a| a.id == id) {
            Some(self.assignments.remove(pos))
        } else {
            None
        }
    }

    /// Assignments whose range overlaps the query window (inclusive bounds).
    /// Binary search skips everything starting after `query.end`.
    pub fn overlapping(&self, query: &DateRange) -> impl Iterator<Item = &Assignment> {
        let right_bound = self
            .assignments
            .partition_point(|a| a.window.start <= query.end);
        self.assignments[..right_bound]
            .iter()
            .filter(move |a| a.window.end >= query.start)
    }
}

/// True if the two skill sets share at least one entry. Exact string
/// match, no normalization.
pub fn skills_intersect(a: &[String], b: &[String]) -> bool {
    a.iter().any(|s| b.contains(s))
}

/// WAL record format — flat, no nesting. Replay rebuilds the full state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    UserRegistered {
        user: User,
    },
    EngineerUpdated {
        id: Ulid,
        skills: Vec<String>,
        seniority: Seniority,
        max_capacity: u32,
    },
    ProjectCreated {
        project: Project,
    },
    ProjectUpdated {
        project: Project,
    },
    AssignmentCreated {
        assignment: Assignment,
    },
    AssignmentUpdated {
        assignment: Assignment,
    },
    AssignmentDeleted {
        id: Ulid,
        engineer_id: Ulid,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn range(s: NaiveDate, e: NaiveDate) -> DateRange {
        DateRange::new(s, e)
    }

    fn assignment(start: NaiveDate, end: NaiveDate, allocation: u32) -> Assignment {
        Assignment {
            id: Ulid::new(),
            engineer_id: Ulid::new(),
            project_id: Ulid::new(),
            allocation,
            window: DateRange::new(start, end),
            role: "Developer".into(),
        }
    }

    fn engineer_state() -> UserState {
        UserState::new(User {
            id: Ulid::new(),
            email: "e@example.com".into(),
            name: "E".into(),
            password_hash: String::new(),
            role: Role::Engineer,
            skills: vec![],
            seniority: Seniority::Mid,
            max_capacity: 100,
            department: "Engineering".into(),
        })
    }

    #[test]
    fn range_basics() {
        let r = range(d(2025, 6, 1), d(2025, 6, 22));
        assert_eq!(r.duration_days(), 22);
        assert!(r.contains_day(d(2025, 6, 1)));
        assert!(r.contains_day(d(2025, 6, 22))); // closed interval
        assert!(!r.contains_day(d(2025, 6, 23)));
    }

    #[test]
    fn range_overlap_inclusive_at_boundary() {
        // [d1, d2] and [d2, d3] overlap at d2
        let a = range(d(2025, 6, 1), d(2025, 6, 10));
        let b = range(d(2025, 6, 10), d(2025, 6, 20));
        assert!(a.overlaps(&b));
        assert!(b.overlaps(&a)); // symmetric
    }

    #[test]
    fn range_disjoint() {
        let a = range(d(2025, 6, 1), d(2025, 6, 10));
        let b = range(d(2025, 6, 11), d(2025, 6, 20));
        assert!(!a.overlaps(&b));
        assert!(!b.overlaps(&a));
    }

    #[test]
    fn assignment_ordering() {
        let mut us = engineer_state();
        us.insert_assignment(assignment(d(2025, 3, 1), d(2025, 3, 31), 50));
        us.insert_assignment(assignment(d(2025, 1, 1), d(2025, 1, 31), 50));
        us.insert_assignment(assignment(d(2025, 2, 1), d(2025, 2, 28), 50));
        assert_eq!(us.assignments[0].window.start, d(2025, 1, 1));
        assert_eq!(us.assignments[1].window.start, d(2025, 2, 1));
        assert_eq!(us.assignments[2].window.start, d(2025, 3, 1));
    }

    #[test]
    fn assignment_remove() {
        let mut us = engineer_state();
        let a = assignment(d(2025, 1, 1), d(2025, 1, 31), 50);
        let id = a.id;
        us.insert_assignment(a);
        assert!(us.remove_assignment(id).is_some());
        assert!(us.assignments.is_empty());
        assert!(us.remove_assignment(id).is_none());
    }

    #[test]
    fn overlapping_scan_skips_disjoint() {
        let mut us = engineer_state();
        us.insert_assignment(assignment(d(2025, 1, 1), d(2025, 1, 31), 50)); // past
        us.insert_assignment(assignment(d(2025, 6, 1), d(2025, 6, 22), 80)); // hit
        us.insert_assignment(assignment(d(2025, 9, 1), d(2025, 9, 30), 50)); // future
        let query = range(d(2025, 6, 10), d(2025, 6, 30));
        let hits: Vec<_> = us.overlapping(&query).collect();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].allocation, 80);
    }

    #[test]
    fn overlapping_scan_boundary_day_counts() {
        let mut us = engineer_state();
        us.insert_assignment(assignment(d(2025, 6, 1), d(2025, 6, 10), 40));
        let query = range(d(2025, 6, 10), d(2025, 6, 30));
        assert_eq!(us.overlapping(&query).count(), 1);
    }

    #[test]
    fn overlapping_scan_empty() {
        let us = engineer_state();
        let query = range(d(2025, 1, 1), d(2025, 12, 31));
        assert_eq!(us.overlapping(&query).count(), 0);
    }

    #[test]
    fn skills_intersection() {
        let react_node = vec!["React".to_string(), "Node.js".to_string()];
        let python = vec!["Python".to_string(), "Django".to_string()];
        let react = vec!["React".to_string()];
        assert!(skills_intersect(&react_node, &react));
        assert!(!skills_intersect(&react_node, &python));
        assert!(!skills_intersect(&react_node, &[]));
    }

    #[test]
    fn event_serialization_roundtrip() {
        let event = Event::AssignmentCreated {
            assignment: assignment(d(2025, 6, 1), d(2025, 6, 22), 80),
        };
        let bytes = bincode::serialize(&event).unwrap();
        let decoded: Event = bincode::deserialize(&bytes).unwrap();
        assert_eq!(event, decoded);
    }

    #[test]
    fn date_range_json_format() {
        let r = range(d(2025, 6, 1), d(2025, 6, 22));
        let json = serde_json::to_value(r).unwrap();
        assert_eq!(json["start"], "2025-06-01");
        assert_eq!(json["end"], "2025-06-22");
    }
}
