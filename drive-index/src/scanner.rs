//! Concurrent walk of remote subtrees.
//!
//! Every reachable node is recorded at most once per scan. Work is handed out as units over
//! a multi-consumer channel; a pending-unit counter that starts at one (the seeding unit)
//! decides when the walk is finished.

use std::collections::HashSet;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::interchange::{InterchangeError, JsonArrayWriter};
use crate::model::{Node, NodeKind};
use crate::remote::ResilientRemote;

pub const DEFAULT_MAX_WORKERS: usize = 5;
pub const DEFAULT_FLUSH_EVERY: usize = 500;
pub const DEFAULT_MAX_DEPTH: u32 = 999;
pub const DEFAULT_MAX_PARENT_ASCENT: u32 = 64;

#[derive(Debug, Error)]
pub enum ScanError {
    #[error("no seed ids to scan")]
    NoSeeds,
    #[error("scan cancelled")]
    Cancelled,
    #[error("failed to write scan output: {0}")]
    Output(#[from] InterchangeError),
    #[error("none of the {0} seed ids could be read")]
    NoReachableSeeds(usize),
    #[error("scan output could not be written completely")]
    IncompleteOutput,
    #[error("scan worker failed: {0}")]
    Worker(#[from] tokio::task::JoinError),
}

#[derive(Debug, Clone, Copy)]
pub struct ScanOptions {
    pub max_workers: usize,
    pub search_parent: bool,
    pub flush_every: usize,
    pub max_depth: u32,
    pub max_parent_ascent: u32,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            max_workers: DEFAULT_MAX_WORKERS,
            search_parent: false,
            flush_every: DEFAULT_FLUSH_EVERY,
            max_depth: DEFAULT_MAX_DEPTH,
            max_parent_ascent: DEFAULT_MAX_PARENT_ASCENT,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanReport {
    pub visited: usize,
    pub written: usize,
    pub flushes: usize,
}

#[derive(Debug)]
enum Unit {
    /// Fetch a node by id first (seeds and parents).
    Fetch { id: String, depth: u32, ascent: u32 },
    /// A node already returned by a listing.
    Process { node: Node, depth: u32 },
}

struct SaveBuffer {
    records: Vec<Node>,
    countdown: usize,
}

/// Shared state of one scan. Each field has its own lock and no lock is held across an
/// await.
struct ScanState {
    visited: Mutex<HashSet<String>>,
    buffer: Mutex<SaveBuffer>,
    pending: Mutex<usize>,
    done: watch::Sender<bool>,
    writer: tokio::sync::Mutex<JsonArrayWriter>,
    flush_every: usize,
    write_failed: AtomicBool,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl ScanState {
    fn new(flush_every: usize, writer: JsonArrayWriter, done: watch::Sender<bool>) -> Self {
        let flush_every = flush_every.max(1);
        Self {
            visited: Mutex::new(HashSet::new()),
            buffer: Mutex::new(SaveBuffer {
                records: Vec::new(),
                countdown: flush_every,
            }),
            pending: Mutex::new(1),
            done,
            writer: tokio::sync::Mutex::new(writer),
            flush_every,
            write_failed: AtomicBool::new(false),
        }
    }

    /// Returns `false` when the id was already claimed by another unit.
    fn mark_visited(&self, id: &str) -> bool {
        lock(&self.visited).insert(id.to_string())
    }

    fn is_visited(&self, id: &str) -> bool {
        lock(&self.visited).contains(id)
    }

    fn visited_count(&self) -> usize {
        lock(&self.visited).len()
    }

    /// Buffers a record; hands back the whole buffer when the flush counter hits zero.
    fn buffer_record(&self, node: Node) -> Option<Vec<Node>> {
        let mut buffer = lock(&self.buffer);
        buffer.records.push(node);
        buffer.countdown -= 1;
        if buffer.countdown == 0 {
            buffer.countdown = self.flush_every;
            Some(std::mem::take(&mut buffer.records))
        } else {
            None
        }
    }

    fn take_buffer(&self) -> Vec<Node> {
        std::mem::take(&mut lock(&self.buffer).records)
    }

    fn restore(&self, mut batch: Vec<Node>) {
        let mut buffer = lock(&self.buffer);
        batch.append(&mut buffer.records);
        buffer.records = batch;
    }

    fn begin_unit(&self) {
        *lock(&self.pending) += 1;
    }

    fn end_unit(&self) {
        let mut pending = lock(&self.pending);
        *pending = pending.saturating_sub(1);
        if *pending == 0 {
            self.done.send_replace(true);
        }
    }
}

struct Walker {
    remote: ResilientRemote,
    options: ScanOptions,
    state: ScanState,
    queue: async_channel::Sender<Unit>,
    cancel: CancellationToken,
}

impl Walker {
    fn submit(&self, unit: Unit) {
        self.state.begin_unit();
        if let Err(err) = self.queue.try_send(unit) {
            error!(unit = ?err.into_inner(), "worker pool is closed, dropping unit");
            self.state.end_unit();
        }
    }

    async fn run_unit(&self, unit: Unit) {
        if !self.cancel.is_cancelled() {
            self.process(unit).await;
        }
        self.state.end_unit();
    }

    async fn process(&self, unit: Unit) {
        let (mut node, depth, ascent) = match unit {
            Unit::Fetch { id, depth, ascent } => match self.remote.get(&id).await {
                Some(node) => (node, depth, ascent),
                None => {
                    warn!(id = %id, "could not fetch node, skipping");
                    return;
                }
            },
            Unit::Process { node, depth } => (node, depth, 0),
        };

        // Shortcuts continue with their target inside the same unit.
        loop {
            if !self.state.mark_visited(&node.id) {
                debug!(id = %node.id, "already visited");
                return;
            }
            if let Some(batch) = self.state.buffer_record(node.clone()) {
                self.flush(batch).await;
            }
            self.chase_parent(&node, depth, ascent);

            match node.kind() {
                NodeKind::Folder => {
                    if depth >= self.options.max_depth {
                        warn!(id = %node.id, depth, "maximum depth reached, not descending");
                    } else {
                        self.enqueue_children(&node.id, depth + 1).await;
                    }
                    return;
                }
                NodeKind::Shortcut => {
                    let Some(target_id) = node.shortcut_target_id.clone() else {
                        warn!(id = %node.id, "shortcut without target");
                        return;
                    };
                    if self.state.is_visited(&target_id) {
                        return;
                    }
                    match self.remote.get(&target_id).await {
                        Some(target) => node = target,
                        None => {
                            warn!(id = %node.id, target = %target_id, "shortcut target unavailable");
                            return;
                        }
                    }
                }
                NodeKind::Regular => return,
            }
        }
    }

    fn chase_parent(&self, node: &Node, depth: u32, ascent: u32) {
        if !self.options.search_parent {
            return;
        }
        let Some(parent_id) = node.parent_id.as_deref() else {
            return;
        };
        if self.state.is_visited(parent_id) {
            return;
        }
        if ascent >= self.options.max_parent_ascent {
            debug!(id = %node.id, ascent, "parent ascent limit reached");
            return;
        }
        self.submit(Unit::Fetch {
            id: parent_id.to_string(),
            depth,
            ascent: ascent + 1,
        });
    }

    async fn enqueue_children(&self, folder_id: &str, depth: u32) {
        let mut page_token: Option<String> = None;
        loop {
            if self.cancel.is_cancelled() {
                return;
            }
            let Some(page) = self
                .remote
                .list_children(folder_id, page_token.as_deref())
                .await
            else {
                warn!(folder = %folder_id, "could not list folder, children skipped");
                return;
            };
            for node in page.nodes {
                self.submit(Unit::Process { node, depth });
            }
            match page.next_page_token {
                Some(next) => page_token = Some(next),
                None => return,
            }
        }
    }

    async fn flush(&self, batch: Vec<Node>) {
        let count = batch.len();
        let mut writer = self.state.writer.lock().await;
        match writer.append(&batch).await {
            Ok(()) => info!(count, total = writer.written(), "saved scan batch"),
            Err(err) => {
                error!(error = %err, count, "failed to save scan batch, keeping it buffered");
                drop(writer);
                self.state.write_failed.store(true, Ordering::SeqCst);
                self.state.restore(batch);
            }
        }
    }
}

pub struct Scanner {
    remote: ResilientRemote,
    options: ScanOptions,
    cancel: CancellationToken,
}

impl Scanner {
    pub fn new(remote: ResilientRemote, options: ScanOptions) -> Self {
        Self {
            remote,
            options,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Walks every subtree below `seeds` and writes the visited nodes to `output` as a JSON
    /// array. Buffered records are written before returning, whatever the outcome.
    pub async fn scan(&self, seeds: &[String], output: &Path) -> Result<ScanReport, ScanError> {
        if seeds.is_empty() {
            warn!("no seed ids to scan");
            return Err(ScanError::NoSeeds);
        }
        info!(
            seeds = seeds.len(),
            workers = self.options.max_workers,
            search_parent = self.options.search_parent,
            output = %output.display(),
            "starting scan"
        );

        let (done_tx, mut done_rx) = watch::channel(false);
        let (queue_tx, queue_rx) = async_channel::unbounded::<Unit>();
        let walker = Arc::new(Walker {
            remote: self.remote.clone(),
            options: self.options,
            state: ScanState::new(self.options.flush_every, JsonArrayWriter::new(output), done_tx),
            queue: queue_tx.clone(),
            cancel: self.cancel.clone(),
        });

        let mut workers = JoinSet::new();
        for _ in 0..self.options.max_workers.max(1) {
            let walker = Arc::clone(&walker);
            let queue = queue_rx.clone();
            workers.spawn(async move {
                while let Ok(unit) = queue.recv().await {
                    walker.run_unit(unit).await;
                }
            });
        }
        drop(queue_rx);

        for seed in seeds {
            walker.submit(Unit::Fetch {
                id: seed.clone(),
                depth: 0,
                ascent: 0,
            });
        }
        walker.state.end_unit();

        let outcome = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(ScanError::Cancelled),
            _ = done_rx.wait_for(|done| *done) => Ok(()),
        };

        // Queued units still drain, but they see the cancellation and end immediately.
        queue_tx.close();
        let mut joined = Ok(());
        while let Some(result) = workers.join_next().await {
            if let Err(err) = result {
                error!(error = %err, "scan worker failed");
                joined = Err(ScanError::Worker(err));
            }
        }

        let remaining = walker.state.take_buffer();
        let mut writer = walker.state.writer.lock().await;
        writer.append(&remaining).await?;
        writer.finish().await?;

        let report = ScanReport {
            visited: walker.state.visited_count(),
            written: writer.written(),
            flushes: writer.flushes(),
        };
        if walker.state.write_failed.load(Ordering::SeqCst) {
            warn!(
                written = report.written,
                "earlier batch writes failed, their records went out with the final flush"
            );
        }
        outcome?;
        joined?;
        if report.visited == 0 {
            return Err(ScanError::NoReachableSeeds(seeds.len()));
        }
        if report.written < report.visited {
            return Err(ScanError::IncompleteOutput);
        }
        info!(
            visited = report.visited,
            written = report.written,
            flushes = report.flushes,
            "scan finished"
        );
        Ok(report)
    }
}

#[cfg(test)]
#[path = "scanner_tests.rs"]
mod tests;
