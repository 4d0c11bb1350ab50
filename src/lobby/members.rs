//! Membership polling
//!
//! A cached, auto-refreshing read of a lobby's member list. The owner calls
//! [`MembersQuery::poll`] from its event loop; a fetch is started whenever
//! the refetch interval has elapsed and none is in flight.

use super::{LobbyApi, LobbyError, Member};
use crate::tasks::{CancelToken, Task, TaskPoll};
use std::time::{Duration, Instant};
use tracing::{debug, warn};
use uuid::Uuid;

/// Interval between member list refetches
pub const REFETCH_INTERVAL: Duration = Duration::from_millis(2000);

/// Extra attempts after a failed read
const READ_RETRIES: u32 = 1;

/// Auto-refreshing member list for one lobby.
pub struct MembersQuery {
    api: LobbyApi,
    lobby_id: Option<Uuid>,
    members: Vec<Member>,
    last_error: Option<LobbyError>,
    fetched_at: Option<Instant>,
    next_fetch: Option<Instant>,
    in_flight: Option<Task<Result<Vec<Member>, LobbyError>>>,
    cancel: CancelToken,
}

impl MembersQuery {
    /// Create a query. Without a lobby id the query is disabled.
    pub fn new(api: LobbyApi, lobby_id: Option<Uuid>) -> Self {
        Self {
            api,
            lobby_id,
            members: Vec::new(),
            last_error: None,
            fetched_at: None,
            next_fetch: None,
            in_flight: None,
            cancel: CancelToken::new(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.lobby_id.is_some()
    }

    /// Latest member list; empty until the first successful fetch.
    pub fn members(&self) -> &[Member] {
        &self.members
    }

    /// Error from the most recent fetch, cleared by the next success.
    pub fn last_error(&self) -> Option<&LobbyError> {
        self.last_error.as_ref()
    }

    /// When the member list was last refreshed.
    pub fn fetched_at(&self) -> Option<Instant> {
        self.fetched_at
    }

    pub fn is_fetching(&self) -> bool {
        self.in_flight.is_some()
    }

    /// Collect a finished fetch and start the next one when due.
    ///
    /// Returns true when the member list changed.
    pub fn poll(&mut self, now: Instant) -> bool {
        let Some(lobby_id) = self.lobby_id else {
            return false;
        };

        let mut changed = false;
        if let Some(task) = &mut self.in_flight {
            match task.poll() {
                TaskPoll::Pending => return false,
                TaskPoll::Ready(Ok(members)) => {
                    changed = members != self.members;
                    self.members = members;
                    self.last_error = None;
                    self.fetched_at = Some(now);
                    self.in_flight = None;
                }
                TaskPoll::Ready(Err(e)) => {
                    warn!(lobby = %lobby_id, error = %e, "member refetch failed");
                    self.last_error = Some(e);
                    self.in_flight = None;
                }
                TaskPoll::Gone => self.in_flight = None,
            }
        }

        let due = self.next_fetch.map_or(true, |at| now >= at);
        if due && self.in_flight.is_none() && !self.cancel.is_cancelled() {
            self.start_fetch(lobby_id);
            self.next_fetch = Some(now + REFETCH_INTERVAL);
        }
        changed
    }

    /// Start a fetch right away (next `poll` picks up the result).
    pub fn refetch(&mut self) {
        if let (Some(lobby_id), None) = (self.lobby_id, &self.in_flight) {
            self.start_fetch(lobby_id);
        }
    }

    fn start_fetch(&mut self, lobby_id: Uuid) {
        let api = self.api.clone();
        debug!(lobby = %lobby_id, "fetching members");
        self.in_flight = Some(Task::spawn(&self.cancel, move || {
            let mut attempt = 0;
            loop {
                match api.fetch_lobby_members(lobby_id) {
                    Ok(members) => return Ok(members),
                    Err(e) if attempt < READ_RETRIES => {
                        debug!(error = %e, "retrying member fetch");
                        attempt += 1;
                    }
                    Err(e) => return Err(e),
                }
            }
        }));
    }

    /// Stop polling and discard anything in flight.
    pub fn cancel(&mut self) {
        self.cancel.cancel();
        self.in_flight = None;
    }
}

impl Drop for MembersQuery {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
