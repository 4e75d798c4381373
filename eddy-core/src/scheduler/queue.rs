//! Download queue and slot arbitration.
//!
//! The scheduler is a plain state machine: callers feed it lifecycle
//! notifications and execute the [`SchedulerAction`]s it returns. All
//! mutation happens on the client actor, which gives the slot bookkeeping a
//! single serialization point.

use std::collections::{HashMap, HashSet, VecDeque};
use std::path::PathBuf;

use chrono::Utc;

use super::SchedulerError;
use super::download::{
    Download, DownloadFailure, DownloadId, DownloadRequest, DownloadStatus, DownloadTicket,
};

/// Work the scheduler asks its owner to carry out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchedulerAction {
    /// Ask the hub to set up a connection to `nick` and arm the handshake timeout
    Connect { nick: String },
    /// Start `ticket` on the live session to `nick`
    Begin { nick: String, ticket: DownloadTicket },
}

/// Per-peer FIFO queues bounded by a global download slot limit.
#[derive(Debug)]
pub struct DownloadScheduler {
    slots: usize,
    next_id: u64,
    downloads: HashMap<DownloadId, Download>,
    /// Nicks in first-enqueued order
    order: Vec<String>,
    queues: HashMap<String, VecDeque<DownloadId>>,
    /// `None` while connecting, `Some` while a transfer runs
    active: HashMap<String, Option<DownloadId>>,
    /// Peers with a live connection on which we are the downloader
    sessions: HashSet<String>,
    /// Peers whose connection settled with us uploading
    deferred: HashSet<String>,
    timed_out: HashSet<String>,
    finished: Vec<DownloadId>,
    failed: Vec<DownloadId>,
}

impl DownloadScheduler {
    pub fn new(slots: usize) -> Self {
        Self {
            slots,
            next_id: 0,
            downloads: HashMap::new(),
            order: Vec::new(),
            queues: HashMap::new(),
            active: HashMap::new(),
            sessions: HashSet::new(),
            deferred: HashSet::new(),
            timed_out: HashSet::new(),
            finished: Vec::new(),
            failed: Vec::new(),
        }
    }

    /// Queues a download and returns its record.
    ///
    /// Re-enqueueing a file that is already queued or active for the same
    /// nick returns the existing record. A nick marked as timed out gets a
    /// record that is immediately in the `Timeout` state.
    pub fn enqueue(&mut self, request: DownloadRequest) -> Download {
        if let Some(existing) = self.find_pending(&request.nick, &request.file) {
            return existing.clone();
        }

        self.next_id += 1;
        let id = DownloadId(self.next_id);
        let nick = request.nick.clone();
        let mut download = Download::new(id, request);

        if self.timed_out.contains(&nick) {
            download.status = DownloadStatus::Timeout;
            download.error = Some(DownloadFailure::Timeout);
            download.completed_at = Some(Utc::now());
            self.failed.push(id);
        } else {
            self.queues.entry(nick.clone()).or_default().push_back(id);
            if !self.order.contains(&nick) {
                self.order.push(nick);
            }
        }

        self.downloads.insert(id, download.clone());
        download
    }

    /// Assigns free slots to waiting peers.
    pub fn tick(&mut self) -> Vec<SchedulerAction> {
        let mut actions = Vec::new();

        while self.active.len() < self.slots {
            let Some(nick) = self.next_waiting_nick() else {
                break;
            };

            if self.sessions.contains(&nick) {
                match self.begin_next(&nick) {
                    Some(action) => actions.push(action),
                    None => break,
                }
            } else {
                tracing::debug!("Requesting connection to {}", nick);
                self.active.insert(nick.clone(), None);
                actions.push(SchedulerAction::Connect { nick });
            }
        }

        let queues = &self.queues;
        let active = &self.active;
        self.order
            .retain(|nick| active.contains_key(nick) || queues.get(nick).is_some_and(|q| !q.is_empty()));

        actions
    }

    /// A connection to `nick` finished its handshake with us downloading.
    pub fn session_ready(&mut self, nick: &str) -> Vec<SchedulerAction> {
        self.sessions.insert(nick.to_string());
        self.deferred.remove(nick);

        let mut actions = Vec::new();
        if matches!(self.active.get(nick), Some(None)) {
            actions.extend(self.begin_next(nick));
        }
        actions.extend(self.tick());
        actions
    }

    /// A connection to `nick` finished its handshake with us uploading.
    ///
    /// A pending connect for that nick gives up its slot until the peer is
    /// released again.
    pub fn session_deferred(&mut self, nick: &str) -> Vec<SchedulerAction> {
        if matches!(self.active.get(nick), Some(None)) {
            self.active.remove(nick);
            self.deferred.insert(nick.to_string());
        }
        self.tick()
    }

    /// Lets a deferred nick compete for slots again.
    pub fn release_deferred(&mut self, nick: &str) -> Vec<SchedulerAction> {
        self.deferred.remove(nick);
        self.tick()
    }

    /// Forgets the live session to `nick`.
    ///
    /// Returns the download that was in flight on it, which the caller must
    /// fail.
    pub fn session_closed(&mut self, nick: &str) -> Option<DownloadId> {
        self.sessions.remove(nick);
        self.deferred.remove(nick);
        match self.active.get(nick) {
            Some(Some(id)) => Some(*id),
            _ => None,
        }
    }

    /// Puts a download whose `Begin` never reached the peer back at the
    /// head of its nick's queue and frees its slot.
    pub fn requeue_front(&mut self, id: DownloadId) -> Option<Download> {
        let download = self.downloads.get_mut(&id)?;
        if download.is_terminal() {
            return None;
        }
        download.status = DownloadStatus::Idle;
        download.percent = 0.0;
        let download = download.clone();

        self.release(&download.nick, id);
        self.queues
            .entry(download.nick.clone())
            .or_default()
            .push_front(id);
        if !self.order.contains(&download.nick) {
            self.order.push(download.nick.clone());
        }
        Some(download)
    }

    pub fn on_started(&mut self, id: DownloadId, size: u64) {
        if let Some(download) = self.downloads.get_mut(&id) {
            download.size = Some(size);
            download.status = DownloadStatus::Downloading;
        }
    }

    pub fn on_progress(&mut self, id: DownloadId, percent: f64) {
        if let Some(download) = self.downloads.get_mut(&id) {
            download.percent = percent;
        }
    }

    /// Marks a download finished and frees its slot.
    ///
    /// Returns `None` if the download is unknown or already terminal.
    pub fn on_finished(&mut self, id: DownloadId, path: PathBuf) -> Option<Download> {
        let download = self.downloads.get_mut(&id)?;
        if download.is_terminal() {
            return None;
        }
        download.status = DownloadStatus::Finished;
        download.percent = 100.0;
        download.local_path = Some(path);
        download.completed_at = Some(Utc::now());
        let download = download.clone();

        self.release(&download.nick, id);
        self.finished.push(id);
        Some(download)
    }

    /// Marks a download failed and frees its slot.
    ///
    /// Returns `None` if the download is unknown or already terminal.
    pub fn on_failed(&mut self, id: DownloadId, reason: DownloadFailure) -> Option<Download> {
        let download = self.downloads.get_mut(&id)?;
        if download.is_terminal() {
            return None;
        }
        download.status = DownloadStatus::Failed;
        download.error = Some(reason);
        download.completed_at = Some(Utc::now());
        let download = download.clone();

        if let Some(queue) = self.queues.get_mut(&download.nick) {
            queue.retain(|queued| *queued != id);
        }
        self.release(&download.nick, id);
        self.failed.push(id);
        Some(download)
    }

    /// Handshake timer for `nick` expired.
    ///
    /// If the nick is still connecting, every queued download for it fails
    /// with a timeout and the nick is marked timed out.
    pub fn on_timeout(&mut self, nick: &str) -> Vec<Download> {
        if !matches!(self.active.get(nick), Some(None)) {
            return Vec::new();
        }
        self.active.remove(nick);
        self.timed_out.insert(nick.to_string());

        let ids = self.queues.remove(nick).unwrap_or_default();
        let now = Utc::now();
        let mut expired = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(download) = self.downloads.get_mut(&id) {
                download.status = DownloadStatus::Timeout;
                download.error = Some(DownloadFailure::Timeout);
                download.completed_at = Some(now);
                expired.push(download.clone());
                self.failed.push(id);
            }
        }
        tracing::info!("Connection to {} timed out, {} downloads failed", nick, expired.len());
        expired
    }

    /// Re-queues a failed download.
    ///
    /// # Errors
    ///
    /// - `SchedulerError::UnknownDownload` - No record with this id
    /// - `SchedulerError::NotFailed` - The download has not failed
    /// - `SchedulerError::PeerTimedOut` - The peer is still marked timed out
    pub fn retry(&mut self, id: DownloadId) -> Result<Download, SchedulerError> {
        let download = self
            .downloads
            .get(&id)
            .ok_or(SchedulerError::UnknownDownload { id })?;
        if !matches!(download.status, DownloadStatus::Failed | DownloadStatus::Timeout) {
            return Err(SchedulerError::NotFailed { id });
        }
        if self.timed_out.contains(&download.nick) {
            return Err(SchedulerError::PeerTimedOut {
                nick: download.nick.clone(),
            });
        }

        self.requeue(id).ok_or(SchedulerError::UnknownDownload { id })
    }

    /// Drops a queued (not yet started) download.
    pub fn remove(&mut self, nick: &str, file: &str) -> Option<Download> {
        let queue = self.queues.get_mut(nick)?;
        let position = queue
            .iter()
            .position(|id| self.downloads.get(id).is_some_and(|d| d.file == file))?;
        let id = queue.remove(position)?;
        self.downloads.remove(&id)
    }

    /// Clears a timed-out mark and re-queues every failed download for `nick`.
    pub fn try_again(&mut self, nick: &str) -> Vec<Download> {
        self.timed_out.remove(nick);
        let ids: Vec<DownloadId> = self
            .failed
            .iter()
            .copied()
            .filter(|id| self.downloads.get(id).is_some_and(|d| d.nick == nick))
            .collect();
        ids.into_iter().filter_map(|id| self.requeue(id)).collect()
    }

    /// Whether a download for `nick` is queued or running.
    pub fn has_download_for(&self, nick: &str) -> bool {
        self.queues.get(nick).is_some_and(|q| !q.is_empty())
            || matches!(self.active.get(nick), Some(Some(_)))
    }

    pub fn download(&self, id: DownloadId) -> Option<&Download> {
        self.downloads.get(&id)
    }

    /// Every known record, oldest first.
    pub fn downloads(&self) -> Vec<Download> {
        let mut all: Vec<Download> = self.downloads.values().cloned().collect();
        all.sort_by_key(|d| d.id);
        all
    }

    pub fn queued(&self, nick: &str) -> Vec<&Download> {
        self.queues
            .get(nick)
            .map(|queue| queue.iter().filter_map(|id| self.downloads.get(id)).collect())
            .unwrap_or_default()
    }

    pub fn finished(&self) -> impl Iterator<Item = &Download> {
        self.finished.iter().filter_map(|id| self.downloads.get(id))
    }

    pub fn failed(&self) -> impl Iterator<Item = &Download> {
        self.failed.iter().filter_map(|id| self.downloads.get(id))
    }

    /// Nicks currently connecting or transferring.
    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    pub fn active_download(&self, nick: &str) -> Option<DownloadId> {
        self.active.get(nick).copied().flatten()
    }

    pub fn is_connecting(&self, nick: &str) -> bool {
        matches!(self.active.get(nick), Some(None))
    }

    pub fn is_timed_out(&self, nick: &str) -> bool {
        self.timed_out.contains(nick)
    }

    pub fn open_slots(&self) -> usize {
        self.slots.saturating_sub(self.active.len())
    }

    pub fn slot_limit(&self) -> usize {
        self.slots
    }

    fn find_pending(&self, nick: &str, file: &str) -> Option<&Download> {
        let matches = |id: &DownloadId| {
            self.downloads
                .get(id)
                .filter(|d| d.file == file && !d.is_terminal())
        };
        self.queues
            .get(nick)
            .and_then(|queue| queue.iter().find_map(matches))
            .or_else(|| self.active_download(nick).as_ref().and_then(matches))
    }

    fn next_waiting_nick(&self) -> Option<String> {
        self.order
            .iter()
            .find(|nick| {
                !self.active.contains_key(*nick)
                    && !self.deferred.contains(*nick)
                    && self.queues.get(*nick).is_some_and(|q| !q.is_empty())
            })
            .cloned()
    }

    fn begin_next(&mut self, nick: &str) -> Option<SchedulerAction> {
        let next = self.queues.get_mut(nick).and_then(VecDeque::pop_front);
        let Some(id) = next else {
            self.active.remove(nick);
            return None;
        };
        let download = self.downloads.get_mut(&id)?;
        download.status = DownloadStatus::Downloading;
        let ticket = download.ticket();

        self.active.insert(nick.to_string(), Some(id));
        Some(SchedulerAction::Begin {
            nick: nick.to_string(),
            ticket,
        })
    }

    fn release(&mut self, nick: &str, id: DownloadId) {
        if self.active.get(nick) == Some(&Some(id)) {
            self.active.remove(nick);
        }
    }

    fn requeue(&mut self, id: DownloadId) -> Option<Download> {
        self.failed.retain(|failed| *failed != id);
        self.finished.retain(|finished| *finished != id);

        let download = self.downloads.get_mut(&id)?;
        download.status = DownloadStatus::Idle;
        download.error = None;
        download.percent = 0.0;
        download.completed_at = None;
        download.local_path = None;
        let download = download.clone();

        self.queues
            .entry(download.nick.clone())
            .or_default()
            .push_back(id);
        if !self.order.contains(&download.nick) {
            self.order.push(download.nick.clone());
        }
        Some(download)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn request(nick: &str, file: &str) -> DownloadRequest {
        DownloadRequest::new(nick, file).with_size(10)
    }

    fn connects(actions: &[SchedulerAction]) -> Vec<&str> {
        actions
            .iter()
            .filter_map(|action| match action {
                SchedulerAction::Connect { nick } => Some(nick.as_str()),
                SchedulerAction::Begin { .. } => None,
            })
            .collect()
    }

    fn begun(actions: &[SchedulerAction]) -> Vec<DownloadId> {
        actions
            .iter()
            .filter_map(|action| match action {
                SchedulerAction::Begin { ticket, .. } => Some(ticket.id),
                SchedulerAction::Connect { .. } => None,
            })
            .collect()
    }

    #[test]
    fn test_enqueue_then_tick_connects() {
        let mut scheduler = DownloadScheduler::new(2);
        let download = scheduler.enqueue(request("alice", "a.txt"));
        assert_eq!(download.status, DownloadStatus::Idle);
        assert!(scheduler.has_download_for("alice"));

        let actions = scheduler.tick();
        assert_eq!(connects(&actions), vec!["alice"]);
        assert!(scheduler.is_connecting("alice"));
        assert!(scheduler.tick().is_empty());
    }

    #[test]
    fn test_enqueue_is_idempotent() {
        let mut scheduler = DownloadScheduler::new(1);
        let first = scheduler.enqueue(request("alice", "a.txt"));
        let second = scheduler.enqueue(request("alice", "a.txt"));
        assert_eq!(first.id, second.id);
        assert_eq!(scheduler.queued("alice").len(), 1);
    }

    #[test]
    fn test_slot_limit_bounds_connections() {
        let mut scheduler = DownloadScheduler::new(2);
        for nick in ["a", "b", "c"] {
            scheduler.enqueue(request(nick, "f"));
        }

        let actions = scheduler.tick();
        assert_eq!(connects(&actions), vec!["a", "b"]);
        assert_eq!(scheduler.open_slots(), 0);
    }

    #[test]
    fn test_session_ready_begins_fifo() {
        let mut scheduler = DownloadScheduler::new(1);
        let first = scheduler.enqueue(request("alice", "1"));
        let second = scheduler.enqueue(request("alice", "2"));
        scheduler.tick();

        let actions = scheduler.session_ready("alice");
        assert_eq!(begun(&actions), vec![first.id]);
        assert_eq!(scheduler.active_download("alice"), Some(first.id));

        let finished = scheduler.on_finished(first.id, PathBuf::from("/tmp/1"));
        assert!(finished.is_some());

        let actions = scheduler.tick();
        assert_eq!(begun(&actions), vec![second.id]);
    }

    #[test]
    fn test_undelivered_begin_goes_back_to_queue_head() {
        let mut scheduler = DownloadScheduler::new(1);
        let first = scheduler.enqueue(request("alice", "1"));
        let second = scheduler.enqueue(request("alice", "2"));
        scheduler.tick();
        scheduler.session_ready("alice");

        assert_eq!(scheduler.session_closed("alice"), Some(first.id));
        let requeued = scheduler.requeue_front(first.id).unwrap();
        assert_eq!(requeued.status, DownloadStatus::Idle);
        assert_eq!(scheduler.active_download("alice"), None);
        let queued: Vec<_> = scheduler.queued("alice").iter().map(|d| d.id).collect();
        assert_eq!(queued, vec![first.id, second.id]);

        let actions = scheduler.tick();
        assert_eq!(connects(&actions), vec!["alice"]);

        scheduler.on_failed(second.id, DownloadFailure::Removed);
        assert!(scheduler.requeue_front(second.id).is_none());
    }

    #[test]
    fn test_terminal_transition_happens_once() {
        let mut scheduler = DownloadScheduler::new(1);
        let download = scheduler.enqueue(request("alice", "1"));
        scheduler.tick();
        scheduler.session_ready("alice");

        assert!(scheduler.on_failed(download.id, DownloadFailure::NoSlots).is_some());
        assert!(scheduler.on_failed(download.id, DownloadFailure::NoSlots).is_none());
        assert!(scheduler.on_finished(download.id, PathBuf::from("x")).is_none());
        assert_eq!(scheduler.failed().count(), 1);
    }

    #[test]
    fn test_timeout_fails_every_queued_download_for_nick() {
        let mut scheduler = DownloadScheduler::new(2);
        scheduler.enqueue(request("alice", "1"));
        scheduler.enqueue(request("alice", "2"));
        scheduler.enqueue(request("bob", "3"));
        scheduler.tick();

        let expired = scheduler.on_timeout("alice");
        assert_eq!(expired.len(), 2);
        assert!(expired.iter().all(|d| d.status == DownloadStatus::Timeout));
        assert!(scheduler.is_timed_out("alice"));
        assert!(!scheduler.has_download_for("alice"));
        assert!(scheduler.is_connecting("bob"));

        let late = scheduler.enqueue(request("alice", "4"));
        assert_eq!(late.status, DownloadStatus::Timeout);
    }

    #[test]
    fn test_timeout_after_handshake_is_ignored() {
        let mut scheduler = DownloadScheduler::new(1);
        scheduler.enqueue(request("alice", "1"));
        scheduler.tick();
        scheduler.session_ready("alice");

        assert!(scheduler.on_timeout("alice").is_empty());
        assert!(!scheduler.is_timed_out("alice"));
    }

    #[test]
    fn test_try_again_requeues_timed_out_downloads() {
        let mut scheduler = DownloadScheduler::new(1);
        scheduler.enqueue(request("alice", "1"));
        scheduler.enqueue(request("alice", "2"));
        scheduler.tick();
        scheduler.on_timeout("alice");

        let requeued = scheduler.try_again("alice");
        assert_eq!(requeued.len(), 2);
        assert!(!scheduler.is_timed_out("alice"));
        assert_eq!(scheduler.queued("alice").len(), 2);
        assert_eq!(scheduler.failed().count(), 0);
        assert_eq!(connects(&scheduler.tick()), vec!["alice"]);
    }

    #[test]
    fn test_retry_rules() {
        let mut scheduler = DownloadScheduler::new(1);
        let download = scheduler.enqueue(request("alice", "1"));
        assert_eq!(
            scheduler.retry(download.id),
            Err(SchedulerError::NotFailed { id: download.id })
        );

        scheduler.tick();
        scheduler.session_ready("alice");
        scheduler.on_failed(download.id, DownloadFailure::NoSlots);

        let retried = scheduler.retry(download.id).unwrap();
        assert_eq!(retried.status, DownloadStatus::Idle);
        assert_eq!(retried.error, None);
        assert_eq!(scheduler.queued("alice").len(), 1);

        assert_eq!(
            scheduler.retry(DownloadId(99)),
            Err(SchedulerError::UnknownDownload { id: DownloadId(99) })
        );
    }

    #[test]
    fn test_remove_queued_download() {
        let mut scheduler = DownloadScheduler::new(1);
        scheduler.enqueue(request("alice", "1"));
        let removed = scheduler.remove("alice", "1");
        assert!(removed.is_some());
        assert!(!scheduler.has_download_for("alice"));
        assert!(scheduler.remove("alice", "1").is_none());
    }

    #[test]
    fn test_deferred_peer_frees_slot_until_released() {
        let mut scheduler = DownloadScheduler::new(1);
        scheduler.enqueue(request("alice", "1"));
        scheduler.enqueue(request("bob", "2"));
        assert_eq!(connects(&scheduler.tick()), vec!["alice"]);

        let actions = scheduler.session_deferred("alice");
        assert_eq!(connects(&actions), vec!["bob"]);
        assert!(scheduler.has_download_for("alice"));

        scheduler.session_ready("bob");
        let bob = scheduler.active_download("bob").unwrap();
        scheduler.on_finished(bob, PathBuf::from("2"));

        assert!(scheduler.tick().is_empty());
        assert_eq!(connects(&scheduler.release_deferred("alice")), vec!["alice"]);
    }

    #[test]
    fn test_session_closed_reports_in_flight_download() {
        let mut scheduler = DownloadScheduler::new(1);
        let download = scheduler.enqueue(request("alice", "1"));
        scheduler.tick();
        scheduler.session_ready("alice");

        assert_eq!(scheduler.session_closed("alice"), Some(download.id));
        scheduler.on_failed(
            download.id,
            DownloadFailure::Disconnected {
                reason: "reset".to_string(),
            },
        );
        assert_eq!(scheduler.active_count(), 0);
    }

    #[test]
    fn test_reused_session_begins_directly() {
        let mut scheduler = DownloadScheduler::new(1);
        let first = scheduler.enqueue(request("alice", "1"));
        scheduler.tick();
        scheduler.session_ready("alice");
        scheduler.on_finished(first.id, PathBuf::from("1"));

        let second = scheduler.enqueue(request("alice", "2"));
        let actions = scheduler.tick();
        assert_eq!(begun(&actions), vec![second.id]);
        assert!(connects(&actions).is_empty());
    }

    #[derive(Debug, Clone)]
    enum Op {
        Enqueue(usize, u8),
        Tick,
        Ready(usize),
        Defer(usize),
        Finish(usize),
        Fail(usize),
        Timeout(usize),
        Close(usize),
        TryAgain(usize),
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            (0usize..5, any::<u8>()).prop_map(|(n, f)| Op::Enqueue(n, f % 4)),
            Just(Op::Tick),
            (0usize..5).prop_map(Op::Ready),
            (0usize..5).prop_map(Op::Defer),
            (0usize..5).prop_map(Op::Finish),
            (0usize..5).prop_map(Op::Fail),
            (0usize..5).prop_map(Op::Timeout),
            (0usize..5).prop_map(Op::Close),
            (0usize..5).prop_map(Op::TryAgain),
        ]
    }

    proptest! {
        #[test]
        fn prop_active_peers_never_exceed_slots(slots in 1usize..4, ops in proptest::collection::vec(op(), 1..64)) {
            let nicks = ["a", "b", "c", "d", "e"];
            let mut scheduler = DownloadScheduler::new(slots);

            for op in ops {
                match op {
                    Op::Enqueue(n, f) => {
                        scheduler.enqueue(request(nicks[n], &f.to_string()));
                    }
                    Op::Tick => {
                        scheduler.tick();
                    }
                    Op::Ready(n) => {
                        scheduler.session_ready(nicks[n]);
                    }
                    Op::Defer(n) => {
                        scheduler.session_deferred(nicks[n]);
                    }
                    Op::Finish(n) => {
                        if let Some(id) = scheduler.active_download(nicks[n]) {
                            scheduler.on_finished(id, PathBuf::from("f"));
                        }
                    }
                    Op::Fail(n) => {
                        if let Some(id) = scheduler.active_download(nicks[n]) {
                            scheduler.on_failed(id, DownloadFailure::NoSlots);
                        }
                    }
                    Op::Timeout(n) => {
                        scheduler.on_timeout(nicks[n]);
                    }
                    Op::Close(n) => {
                        if let Some(id) = scheduler.session_closed(nicks[n]) {
                            scheduler.on_failed(id, DownloadFailure::Disconnected { reason: "closed".to_string() });
                        }
                    }
                    Op::TryAgain(n) => {
                        scheduler.try_again(nicks[n]);
                    }
                }

                prop_assert!(scheduler.active_count() <= slots);
                for nick in nicks {
                    if let Some(id) = scheduler.active_download(nick) {
                        let download = scheduler.download(id).unwrap();
                        prop_assert_eq!(download.nick.as_str(), nick);
                        prop_assert_eq!(download.status, DownloadStatus::Downloading);
                    }
                }
            }
        }
    }
}
