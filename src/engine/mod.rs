mod capacity;
mod error;
pub mod mutations;
mod queries;
mod validate;
#[cfg(test)]
mod tests;

pub use capacity::{CapacityDecision, LoadReport, check_capacity, current_load};
pub use error::EngineError;
pub use queries::CapacityReport;

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{RwLock, mpsc, oneshot};
use ulid::Ulid;

use crate::model::*;
use crate::wal::Wal;

pub type SharedUserState = Arc<RwLock<UserState>>;

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

/// Background task that owns the WAL and batches appends for group commit:
/// block on the first append, drain everything immediately available, then
/// one flush + fsync for the whole batch.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WalCommand::Append { event, response } => {
                let mut batch = vec![(event, response)];

                loop {
                    match rx.try_recv() {
                        Ok(WalCommand::Append { event, response }) => {
                            batch.push((event, response));
                        }
                        Ok(other) => {
                            flush_and_respond(&mut wal, &mut batch);
                            handle_non_append(&mut wal, other);
                            break;
                        }
                        Err(_) => break, // channel empty
                    }
                }

                if !batch.is_empty() {
                    flush_and_respond(&mut wal, &mut batch);
                }
            }
            other => handle_non_append(&mut wal, other),
        }
    }
}

fn flush_and_respond(wal: &mut Wal, batch: &mut Vec<(Event, oneshot::Sender<io::Result<()>>)>) {
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let flush_start = std::time::Instant::now();
    let result = flush_batch(wal, batch);
    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(flush_start.elapsed().as_secs_f64());
    for (_, tx) in batch.drain(..) {
        let r = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn flush_batch(wal: &mut Wal, batch: &[(Event, oneshot::Sender<io::Result<()>>)]) -> io::Result<()> {
    let mut append_err: Option<io::Error> = None;
    for (event, _) in batch {
        if let Err(e) = wal.append_buffered(event) {
            append_err = Some(e);
            break;
        }
    }
    // Always flush so partially buffered bytes don't leak into the next
    // batch (callers were told this batch failed).
    let flush_err = wal.flush_sync().err();
    if let Some(e) = append_err {
        return Err(e);
    }
    if let Some(e) = flush_err {
        return Err(e);
    }
    Ok(())
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { .. } => unreachable!(),
    }
}

/// The record store plus its invariant enforcement. All state is
/// in-memory, rebuilt from the WAL on open.
pub struct Engine {
    /// All accounts (engineers and managers), each behind its own lock.
    pub(super) users: DashMap<Ulid, SharedUserState>,
    /// Projects have no cross-record invariant: plain records,
    /// last-writer-wins.
    pub(super) projects: DashMap<Ulid, Project>,
    /// Lowercased email → user id, the uniqueness index.
    pub(super) email_index: DashMap<String, Ulid>,
    /// Assignment id → engineer id reverse lookup.
    pub(super) assignment_index: DashMap<Ulid, Ulid>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
}

/// Apply an event to one user's state. Caller holds the write lock.
fn apply_to_user(us: &mut UserState, event: &Event, index: &DashMap<Ulid, Ulid>) {
    match event {
        Event::EngineerUpdated {
            skills,
            seniority,
            max_capacity,
            ..
        } => {
            us.user.skills = skills.clone();
            us.user.seniority = *seniority;
            us.user.max_capacity = *max_capacity;
        }
        Event::AssignmentCreated { assignment } => {
            us.insert_assignment(assignment.clone());
            index.insert(assignment.id, assignment.engineer_id);
        }
        Event::AssignmentUpdated { assignment } => {
            us.remove_assignment(assignment.id);
            us.insert_assignment(assignment.clone());
            index.insert(assignment.id, assignment.engineer_id);
        }
        Event::AssignmentDeleted { id, .. } => {
            us.remove_assignment(*id);
            index.remove(id);
        }
        // Map-level events are handled by the caller.
        Event::UserRegistered { .. }
        | Event::ProjectCreated { .. }
        | Event::ProjectUpdated { .. } => {}
    }
}

impl Engine {
    pub fn new(wal_path: PathBuf) -> io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            users: DashMap::new(),
            projects: DashMap::new(),
            email_index: DashMap::new(),
            assignment_index: DashMap::new(),
            wal_tx,
        };

        // Replay — sole owner of every Arc here, so try_write always
        // succeeds. Never block: this may run inside an async context.
        for event in &events {
            match event {
                Event::UserRegistered { user } => {
                    // Uniqueness was decided at append time, so a plain
                    // insert is enough here.
                    engine.email_index.insert(user.email.to_lowercase(), user.id);
                    engine
                        .users
                        .insert(user.id, Arc::new(RwLock::new(UserState::new(user.clone()))));
                }
                Event::ProjectCreated { project } | Event::ProjectUpdated { project } => {
                    engine.projects.insert(project.id, project.clone());
                }
                other => {
                    let engineer_id = event_engineer_id(other);
                    if let Some(engineer_id) = engineer_id
                        && let Some(entry) = engine.users.get(&engineer_id)
                    {
                        let us_arc = entry.clone();
                        let mut guard = us_arc.try_write().expect("replay: uncontended write");
                        apply_to_user(&mut guard, other, &engine.assignment_index);
                    }
                }
            }
        }

        Ok(engine)
    }

    /// Write event to the WAL via the background group-commit writer.
    pub(super) async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    pub fn user_state(&self, id: &Ulid) -> Option<SharedUserState> {
        self.users.get(id).map(|e| e.value().clone())
    }

    pub fn engineer_for_assignment(&self, assignment_id: &Ulid) -> Option<Ulid> {
        self.assignment_index.get(assignment_id).map(|e| *e.value())
    }

    /// WAL-append + apply under the caller's write lock.
    pub(super) async fn persist_and_apply(
        &self,
        us: &mut UserState,
        event: &Event,
    ) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        apply_to_user(us, event, &self.assignment_index);
        Ok(())
    }

    /// Resolve assignment → engineer and take the engineer's write lock.
    pub(super) async fn resolve_assignment_write(
        &self,
        assignment_id: &Ulid,
    ) -> Result<(Ulid, tokio::sync::OwnedRwLockWriteGuard<UserState>), EngineError> {
        let engineer_id = self
            .engineer_for_assignment(assignment_id)
            .ok_or(EngineError::NotFound(*assignment_id))?;
        let us = self
            .user_state(&engineer_id)
            .ok_or(EngineError::NotFound(engineer_id))?;
        let guard = us.write_owned().await;
        Ok((engineer_id, guard))
    }
}

/// Engineer whose state an event mutates (None for map-level events).
fn event_engineer_id(event: &Event) -> Option<Ulid> {
    match event {
        Event::EngineerUpdated { id, .. } => Some(*id),
        Event::AssignmentCreated { assignment } | Event::AssignmentUpdated { assignment } => {
            Some(assignment.engineer_id)
        }
        Event::AssignmentDeleted { engineer_id, .. } => Some(*engineer_id),
        Event::UserRegistered { .. }
        | Event::ProjectCreated { .. }
        | Event::ProjectUpdated { .. } => None,
    }
}
