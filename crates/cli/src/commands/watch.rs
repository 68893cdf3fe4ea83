//! Polling view of the parts-issue board.
//!
//! Every `interval` the poller fetches the full list, re-runs the projector
//! and hands the snapshot to the caller. A tick is skipped while the view is
//! hidden or a mutation is in flight; regaining visibility polls at once.
//! Fetch failures are logged and swallowed. Consecutive failures double the
//! delay up to `max_backoff`, and the next success restores the interval.
//!
//! While watching, stdin takes console commands: `hide`, `show`, and
//! `<action> <id> <version>` for `sc-approve`, `resend` or `complete`. One
//! action runs at a time and polling waits for it.

use std::collections::{HashMap, HashSet};
use std::fmt::Write as _;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use partsflow_core::{
    BucketCounts, PartsIssueId, PartsIssueRequest, ServiceCenterId, StaffRole, StatusProjection,
    project, summarize,
};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Errors raised while fetching a snapshot.
#[derive(Debug, Error)]
pub enum WatchError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("server responded with status {0}")]
    Status(u16),
}

/// Source of the full request list.
pub trait SnapshotSource {
    /// Fetch every visible request.
    fn fetch(&self) -> impl Future<Output = Result<Vec<PartsIssueRequest>, WatchError>> + Send;
}

/// One projected request of a snapshot.
#[derive(Debug, Clone)]
pub struct BoardRow {
    pub request: PartsIssueRequest,
    pub projection: StatusProjection,
}

/// Result of one successful poll.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub counts: BucketCounts,
    pub rows: Vec<BoardRow>,
}

impl Snapshot {
    fn from_requests(requests: Vec<PartsIssueRequest>) -> Self {
        let counts = summarize(&requests);
        let rows = requests
            .into_iter()
            .map(|request| {
                let projection = project(&request);
                BoardRow {
                    request,
                    projection,
                }
            })
            .collect();
        Self { counts, rows }
    }
}

/// Timing of the polling loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollerConfig {
    pub interval: Duration,
    pub max_backoff: Duration,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            max_backoff: Duration::from_secs(60),
        }
    }
}

impl PollerConfig {
    /// Delay before the next poll after `failures` consecutive failures.
    #[must_use]
    pub fn delay_after(&self, failures: u32) -> Duration {
        if failures == 0 {
            return self.interval;
        }
        let factor = 2_u32.saturating_pow(failures.min(16));
        self.interval
            .checked_mul(factor)
            .unwrap_or(self.max_backoff)
            .min(self.max_backoff)
            .max(self.interval)
    }
}

/// Marks a mutation in flight; polling resumes when it is dropped.
pub struct MutationGuard(Arc<AtomicBool>);

impl Drop for MutationGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Handle the view uses to steer a running poller.
#[derive(Clone)]
pub struct PollerHandle {
    visible: Arc<watch::Sender<bool>>,
    in_flight: Arc<AtomicBool>,
}

impl PollerHandle {
    /// Report whether the view is on screen.
    pub fn set_visible(&self, visible: bool) {
        self.visible.send_replace(visible);
    }

    /// Suppress polling until the returned guard is dropped.
    ///
    /// Returns `None` while another mutation is in flight, so a second
    /// submission of the same action can be refused.
    #[must_use]
    pub fn begin_mutation(&self) -> Option<MutationGuard> {
        self.in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| MutationGuard(Arc::clone(&self.in_flight)))
    }
}

/// The polling loop.
pub struct Poller<S> {
    source: S,
    config: PollerConfig,
    visible: watch::Receiver<bool>,
    in_flight: Arc<AtomicBool>,
}

impl<S: SnapshotSource> Poller<S> {
    /// Create a poller and the handle that controls it.
    pub fn new(source: S, config: PollerConfig, visible: bool) -> (Self, PollerHandle) {
        let (tx, rx) = watch::channel(visible);
        let in_flight = Arc::new(AtomicBool::new(false));
        let poller = Self {
            source,
            config,
            visible: rx,
            in_flight: Arc::clone(&in_flight),
        };
        let handle = PollerHandle {
            visible: Arc::new(tx),
            in_flight,
        };
        (poller, handle)
    }

    /// Poll until `shutdown` resolves, passing each snapshot to `on_snapshot`.
    pub async fn run<F>(mut self, mut on_snapshot: F, shutdown: impl Future<Output = ()>)
    where
        F: FnMut(Snapshot),
    {
        tokio::pin!(shutdown);
        let mut failures = 0_u32;
        let mut next_poll = Instant::now();
        let mut visibility_open = true;

        loop {
            tokio::select! {
                () = &mut shutdown => break,
                () = tokio::time::sleep_until(next_poll) => {}
                changed = self.visible.changed(), if visibility_open => {
                    if changed.is_err() {
                        // Handle dropped; the last reported visibility stands.
                        visibility_open = false;
                        continue;
                    }
                    if !*self.visible.borrow_and_update() {
                        continue;
                    }
                    debug!("View visible again, polling now");
                }
            }

            if !*self.visible.borrow() || self.in_flight.load(Ordering::Acquire) {
                next_poll = Instant::now() + self.config.interval;
                continue;
            }

            match self.source.fetch().await {
                Ok(requests) => {
                    failures = 0;
                    on_snapshot(Snapshot::from_requests(requests));
                }
                Err(e) => {
                    failures = failures.saturating_add(1);
                    warn!(error = %e, failures, "Poll failed");
                }
            }
            next_poll = Instant::now() + self.config.delay_after(failures);
        }
    }
}

// =============================================================================
// HTTP Source
// =============================================================================

/// Read pages of `page_size` from offset 0 until a short page comes back.
///
/// A row pushed across a page boundary by a concurrent insert is kept once.
async fn collect_pages<F, Fut>(
    page_size: usize,
    mut fetch_page: F,
) -> Result<Vec<PartsIssueRequest>, WatchError>
where
    F: FnMut(usize) -> Fut,
    Fut: Future<Output = Result<Vec<PartsIssueRequest>, WatchError>>,
{
    let mut seen = HashSet::new();
    let mut requests = Vec::new();
    let mut offset = 0;
    loop {
        let page = fetch_page(offset).await?;
        let len = page.len();
        requests.extend(page.into_iter().filter(|request| seen.insert(request.id)));
        if len < page_size {
            return Ok(requests);
        }
        offset += len;
    }
}

/// Talks to a running server.
#[derive(Clone)]
pub struct HttpSource {
    client: reqwest::Client,
    base_url: String,
    list_url: String,
    actor: String,
    role: StaffRole,
}

#[derive(Serialize)]
struct VersionBody {
    version: i32,
}

impl HttpSource {
    /// Rows asked for per page; the server's largest page.
    const PAGE_SIZE: usize = 500;

    #[must_use]
    pub fn new(
        base_url: &str,
        actor: &str,
        role: StaffRole,
        service_center: Option<ServiceCenterId>,
    ) -> Self {
        let base_url = base_url.trim_end_matches('/').to_string();
        let mut list_url = format!("{base_url}/parts-issues?limit={}", Self::PAGE_SIZE);
        if let Some(id) = service_center {
            let _ = write!(list_url, "&serviceCenterId={id}");
        }
        Self {
            client: reqwest::Client::new(),
            base_url,
            list_url,
            actor: actor.to_string(),
            role,
        }
    }

    fn authorized(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        request
            .header("X-Actor-Id", &self.actor)
            .header("X-Actor-Role", self.role.to_string())
            .timeout(Duration::from_secs(10))
    }

    async fn fetch_page(&self, offset: usize) -> Result<Vec<PartsIssueRequest>, WatchError> {
        let url = format!("{}&offset={offset}", self.list_url);
        let response = self.authorized(self.client.get(url)).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(WatchError::Status(status.as_u16()));
        }
        Ok(response.json().await?)
    }

    /// Submit a version-only action. Failures are returned, never retried.
    ///
    /// # Errors
    ///
    /// Returns `WatchError` on a transport failure or a non-success status.
    pub async fn submit(
        &self,
        action: BoardAction,
        id: PartsIssueId,
        version: i32,
    ) -> Result<(), WatchError> {
        let url = format!("{}/parts-issues/{id}/{}", self.base_url, action.as_str());
        let response = self
            .authorized(self.client.patch(url))
            .json(&VersionBody { version })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(WatchError::Status(status.as_u16()));
        }
        Ok(())
    }
}

impl SnapshotSource for HttpSource {
    async fn fetch(&self) -> Result<Vec<PartsIssueRequest>, WatchError> {
        collect_pages(Self::PAGE_SIZE, |offset| self.fetch_page(offset)).await
    }
}

// =============================================================================
// Console
// =============================================================================

/// Actions the console can submit; each needs only the version read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoardAction {
    ScApprove,
    Resend,
    Complete,
}

impl BoardAction {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ScApprove => "sc-approve",
            Self::Resend => "resend",
            Self::Complete => "complete",
        }
    }
}

/// A line typed while watching.
#[derive(Debug, Clone, PartialEq, Eq)]
enum ConsoleCommand {
    Show,
    Hide,
    Act {
        action: BoardAction,
        id: PartsIssueId,
        version: i32,
    },
}

impl std::str::FromStr for ConsoleCommand {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let words: Vec<&str> = s.split_whitespace().collect();
        let action = match words.as_slice() {
            ["show"] => return Ok(Self::Show),
            ["hide"] => return Ok(Self::Hide),
            ["sc-approve", ..] => BoardAction::ScApprove,
            ["resend", ..] => BoardAction::Resend,
            ["complete", ..] => BoardAction::Complete,
            _ => return Err(format!("unknown command: {}", s.trim())),
        };
        let [_, id, version] = words.as_slice() else {
            return Err(format!("usage: {} <id> <version>", action.as_str()));
        };
        let id = id.parse().map_err(|_| format!("invalid id: {id}"))?;
        let version = version
            .parse()
            .map_err(|_| format!("invalid version: {version}"))?;
        Ok(Self::Act {
            action,
            id: PartsIssueId::new(id),
            version,
        })
    }
}

/// Forward stdin lines from a plain thread, so a pending read never holds up
/// runtime shutdown.
fn stdin_lines() -> mpsc::Receiver<String> {
    let (tx, rx) = mpsc::channel(16);
    std::thread::spawn(move || {
        for line in std::io::stdin().lines() {
            let Ok(line) = line else { break };
            if tx.blocking_send(line).is_err() {
                break;
            }
        }
    });
    rx
}

/// Apply console lines to the poller until `lines` closes.
async fn console(mut lines: mpsc::Receiver<String>, source: HttpSource, handle: PollerHandle) {
    while let Some(line) = lines.recv().await {
        if line.trim().is_empty() {
            continue;
        }
        match line.parse::<ConsoleCommand>() {
            Ok(ConsoleCommand::Show) => handle.set_visible(true),
            Ok(ConsoleCommand::Hide) => {
                handle.set_visible(false);
                info!("Polling paused");
            }
            Ok(ConsoleCommand::Act {
                action,
                id,
                version,
            }) => {
                let Some(guard) = handle.begin_mutation() else {
                    warn!(action = action.as_str(), %id, "Another action is in flight");
                    continue;
                };
                let source = source.clone();
                tokio::spawn(async move {
                    let _guard = guard;
                    match source.submit(action, id, version).await {
                        Ok(()) => info!(action = action.as_str(), %id, "Action accepted"),
                        Err(e) => warn!(action = action.as_str(), %id, error = %e, "Action failed"),
                    }
                });
            }
            Err(e) => warn!("{e}"),
        }
    }
}

// =============================================================================
// Command
// =============================================================================

/// Options of the `watch` command.
#[derive(Debug, Clone)]
pub struct WatchOptions {
    pub base_url: String,
    pub interval: Duration,
    pub actor: String,
    pub role: StaffRole,
    pub service_center: Option<ServiceCenterId>,
}

/// Watch the board until Ctrl+C, logging bucket counts and changed requests.
pub async fn run(options: WatchOptions) {
    let source = HttpSource::new(
        &options.base_url,
        &options.actor,
        options.role,
        options.service_center,
    );
    let config = PollerConfig {
        interval: options.interval,
        ..PollerConfig::default()
    };
    let (poller, handle) = Poller::new(source.clone(), config, true);
    let console_task = tokio::spawn(console(stdin_lines(), source, handle));

    info!(url = %options.base_url, interval_secs = options.interval.as_secs(), "Watching parts issues");

    let mut seen: HashMap<PartsIssueId, i32> = HashMap::new();
    let on_snapshot = move |snapshot: Snapshot| {
        let counts = snapshot.counts;
        info!(
            pending = counts.pending,
            approved = counts.approved,
            rejected = counts.rejected,
            issued = counts.issued,
            total = counts.total,
            "Board"
        );
        for row in &snapshot.rows {
            let request = &row.request;
            if seen.insert(request.id, request.version) != Some(request.version) {
                info!(
                    issue_number = %request.issue_number,
                    status = %request.status,
                    bucket = %row.projection.bucket,
                    badges = ?row.projection.badges,
                    version = request.version,
                    "Changed"
                );
            }
        }
    };

    let shutdown = async {
        let _ = tokio::signal::ctrl_c().await;
    };
    poller.run(on_snapshot, shutdown).await;
    console_task.abort();
    info!("Stopped watching");
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use partsflow_core::{JobCardId, OpenRequest};
    use tokio::sync::oneshot;

    use super::*;

    fn request(id: i32) -> PartsIssueRequest {
        let (request, _) = PartsIssueRequest::open(
            OpenRequest {
                id: PartsIssueId::new(id),
                issue_number: format!("PI-SC001-2025-03-{id:04}"),
                job_card_id: JobCardId::new(1),
                service_center_id: ServiceCenterId::new(1),
                service_center_code: "SC001".to_string(),
                service_center_name: "Central Workshop".to_string(),
                purchase_order_id: None,
                notes: None,
                requested_by: "tech-1".to_string(),
                at: Default::default(),
            },
            Vec::new(),
        );
        request
    }

    /// Serve `pages` in order, recording the offsets asked for.
    async fn paged(page_size: usize, pages: &[&[i32]]) -> (Vec<i32>, Vec<usize>) {
        let mut pages: VecDeque<Vec<PartsIssueRequest>> = pages
            .iter()
            .map(|ids| ids.iter().copied().map(request).collect())
            .collect();
        let mut offsets = Vec::new();
        let requests = collect_pages(page_size, |offset| {
            offsets.push(offset);
            let page = pages.pop_front().unwrap_or_default();
            async move { Ok(page) }
        })
        .await
        .unwrap();
        let ids = requests.iter().map(|r| r.id.as_i32()).collect();
        (ids, offsets)
    }

    /// Returns scripted results, then successes; records when it was called.
    #[derive(Clone)]
    struct Scripted {
        script: Arc<Mutex<VecDeque<bool>>>,
        calls: Arc<Mutex<Vec<Instant>>>,
    }

    impl Scripted {
        fn new(script: &[bool]) -> Self {
            Self {
                script: Arc::new(Mutex::new(script.iter().copied().collect())),
                calls: Arc::new(Mutex::new(Vec::new())),
            }
        }

        fn offsets(&self, start: Instant) -> Vec<u64> {
            self.calls
                .lock()
                .unwrap()
                .iter()
                .map(|at| (*at - start).as_secs())
                .collect()
        }
    }

    impl SnapshotSource for Scripted {
        async fn fetch(&self) -> Result<Vec<PartsIssueRequest>, WatchError> {
            self.calls.lock().unwrap().push(Instant::now());
            let ok = self.script.lock().unwrap().pop_front().unwrap_or(true);
            if ok {
                Ok(Vec::new())
            } else {
                Err(WatchError::Status(503))
            }
        }
    }

    fn config() -> PollerConfig {
        PollerConfig {
            interval: Duration::from_secs(5),
            max_backoff: Duration::from_secs(40),
        }
    }

    /// Run a poller for `secs` of virtual time, steering it with `steer`.
    async fn run_for<F, Fut>(source: Scripted, visible: bool, secs: u64, steer: F) -> (Vec<u64>, usize)
    where
        F: FnOnce(PollerHandle) -> Fut,
        Fut: Future<Output = ()>,
    {
        let start = Instant::now();
        let (poller, handle) = Poller::new(source.clone(), config(), visible);
        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        let snapshots = Arc::new(Mutex::new(0_usize));
        let counter = Arc::clone(&snapshots);

        let task = tokio::spawn(poller.run(
            move |_| *counter.lock().unwrap() += 1,
            async move {
                let _ = stop_rx.await;
            },
        ));

        let deadline = start + Duration::from_secs(secs);
        steer(handle).await;
        tokio::time::sleep_until(deadline).await;
        stop_tx.send(()).unwrap();
        task.await.unwrap();

        let count = *snapshots.lock().unwrap();
        (source.offsets(start), count)
    }

    #[test]
    fn test_delay_after_doubles_and_caps() {
        let config = config();
        assert_eq!(config.delay_after(0), Duration::from_secs(5));
        assert_eq!(config.delay_after(1), Duration::from_secs(10));
        assert_eq!(config.delay_after(2), Duration::from_secs(20));
        assert_eq!(config.delay_after(3), Duration::from_secs(40));
        assert_eq!(config.delay_after(10), Duration::from_secs(40));
        assert_eq!(config.delay_after(u32::MAX), Duration::from_secs(40));
    }

    #[tokio::test(start_paused = true)]
    async fn test_polls_every_interval() {
        let (calls, snapshots) = run_for(Scripted::new(&[]), true, 12, |_| async {}).await;
        assert_eq!(calls, vec![0, 5, 10]);
        assert_eq!(snapshots, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failures_back_off_and_success_resets() {
        let source = Scripted::new(&[false, false, true]);
        let (calls, snapshots) = run_for(source, true, 37, |_| async {}).await;
        // fail at 0 (+10), fail at 10 (+20), ok at 30 (+5), ok at 35
        assert_eq!(calls, vec![0, 10, 30, 35]);
        assert_eq!(snapshots, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hidden_view_is_not_polled_until_visible() {
        let (calls, _) = run_for(Scripted::new(&[]), false, 13, |handle| async move {
            tokio::time::sleep(Duration::from_secs(12)).await;
            handle.set_visible(true);
        })
        .await;
        assert_eq!(calls, vec![12]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_mutation_in_flight_suppresses_polling() {
        let (calls, _) = run_for(Scripted::new(&[]), true, 11, |handle| async move {
            // Let the initial poll at t=0 happen first.
            tokio::time::sleep(Duration::from_secs(1)).await;
            let guard = handle.begin_mutation().unwrap();
            assert!(handle.begin_mutation().is_none());
            tokio::time::sleep(Duration::from_secs(6)).await;
            drop(guard);
        })
        .await;
        // The tick at 5 is skipped; polling resumes on the tick at 10.
        assert_eq!(calls, vec![0, 10]);
    }

    #[tokio::test]
    async fn test_fetch_reads_every_page() {
        let (ids, offsets) = paged(3, &[&[1, 2, 3], &[4, 5, 6], &[7]]).await;
        assert_eq!(ids, vec![1, 2, 3, 4, 5, 6, 7]);
        assert_eq!(offsets, vec![0, 3, 6]);

        // A full last page needs one more, empty, read.
        let (ids, offsets) = paged(2, &[&[1, 2], &[3, 4], &[]]).await;
        assert_eq!(ids, vec![1, 2, 3, 4]);
        assert_eq!(offsets, vec![0, 2, 4]);
    }

    #[tokio::test]
    async fn test_fetch_keeps_shifted_rows_once() {
        // A new request between reads pushes 3 onto the second page.
        let (ids, _) = paged(3, &[&[1, 2, 3], &[3, 4, 5], &[6]]).await;
        assert_eq!(ids, vec![1, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn test_console_commands_parse() {
        assert_eq!("show".parse::<ConsoleCommand>(), Ok(ConsoleCommand::Show));
        assert_eq!(" hide ".parse::<ConsoleCommand>(), Ok(ConsoleCommand::Hide));
        assert_eq!(
            "complete 42 7".parse::<ConsoleCommand>(),
            Ok(ConsoleCommand::Act {
                action: BoardAction::Complete,
                id: PartsIssueId::new(42),
                version: 7,
            })
        );
        assert!("sc-approve 42".parse::<ConsoleCommand>().is_err());
        assert!("resend x 1".parse::<ConsoleCommand>().is_err());
        assert!("dispatch 1 1".parse::<ConsoleCommand>().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_console_hide_stops_polling() {
        let (tx, rx) = mpsc::channel(4);
        let (calls, _) = run_for(Scripted::new(&[]), true, 12, |handle| async move {
            let source = HttpSource::new("http://127.0.0.1:9", "wh-1", StaffRole::Warehouse, None);
            tokio::spawn(console(rx, source, handle));
            tokio::time::sleep(Duration::from_secs(1)).await;
            tx.send("hide".to_string()).await.unwrap();
        })
        .await;
        assert_eq!(calls, vec![0]);
    }
}
