use std::io;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot, Mutex};

use crate::model::Event;
use crate::wal::Wal;

/// Durable, ordered event log: the engine's only storage handle.
///
/// `append` returns once the event is durable. Events appended while a slot
/// guard is held land in the log in guard order.
#[async_trait]
pub trait Journal: Send + Sync {
    async fn append(&self, event: &Event) -> io::Result<()>;

    /// Replace the whole log with `events`.
    async fn compact(&self, events: Vec<Event>) -> io::Result<()>;

    async fn appends_since_compact(&self) -> u64;
}

// ── Group-commit WAL channel ─────────────────────────────

enum WalCommand {
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

type Pending = (Event, oneshot::Sender<io::Result<()>>);

/// WAL-backed journal. A background task owns the file and batches appends
/// for group commit.
pub struct WalJournal {
    tx: mpsc::Sender<WalCommand>,
}

impl WalJournal {
    /// Recover the log at `path` and start the writer task.
    /// Returns the journal plus the events to replay.
    pub fn open(path: &Path) -> io::Result<(Self, Vec<Event>)> {
        let (wal, events) = Wal::recover(path)?;
        let (tx, rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, rx));
        Ok((Self { tx }, events))
    }

    async fn request<T>(
        &self,
        cmd: WalCommand,
        rx: oneshot::Receiver<T>,
    ) -> io::Result<T> {
        self.tx
            .send(cmd)
            .await
            .map_err(|_| io::Error::other("WAL writer shut down"))?;
        rx.await
            .map_err(|_| io::Error::other("WAL writer dropped response"))
    }
}

#[async_trait]
impl Journal for WalJournal {
    async fn append(&self, event: &Event) -> io::Result<()> {
        let (tx, rx) = oneshot::channel();
        let cmd = WalCommand::Append {
            event: event.clone(),
            response: tx,
        };
        self.request(cmd, rx).await?
    }

    async fn compact(&self, events: Vec<Event>) -> io::Result<()> {
        let (tx, rx) = oneshot::channel();
        self.request(WalCommand::Compact { events, response: tx }, rx).await?
    }

    async fn appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        self.request(WalCommand::AppendsSinceCompact { response: tx }, rx)
            .await
            .unwrap_or(0)
    }
}

/// 1. Block until the first Append arrives.
/// 2. Drain every Append already queued (the batch window).
/// 3. One flush_sync for the whole batch, then answer every sender.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        let WalCommand::Append { event, response } = cmd else {
            handle_non_append(&mut wal, cmd);
            continue;
        };
        let mut batch = vec![(event, response)];
        let mut deferred = None;
        loop {
            match rx.try_recv() {
                Ok(WalCommand::Append { event, response }) => batch.push((event, response)),
                Ok(other) => {
                    deferred = Some(other);
                    break;
                }
                Err(_) => break,
            }
        }

        metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
        let flush_start = std::time::Instant::now();
        let result = flush_batch(&mut wal, &batch);
        metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
            .record(flush_start.elapsed().as_secs_f64());
        respond_batch(batch, &result);

        // Compaction must see every append acknowledged before it.
        if let Some(cmd) = deferred {
            handle_non_append(&mut wal, cmd);
        }
    }
}

fn flush_batch(wal: &mut Wal, batch: &[Pending]) -> io::Result<()> {
    let mut append_err = None;
    for (event, _) in batch {
        if let Err(e) = wal.append_buffered(event) {
            append_err = Some(e);
            break;
        }
    }
    // Flush even after an append error so buffered bytes don't leak into the next batch.
    let flush_err = wal.flush_sync().err();
    match (append_err, flush_err) {
        (Some(e), _) | (None, Some(e)) => Err(e),
        (None, None) => Ok(()),
    }
}

fn respond_batch(batch: Vec<Pending>, result: &io::Result<()>) {
    for (_, tx) in batch {
        let r = match result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
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
        WalCommand::Append { .. } => unreachable!("appends are batched by the writer loop"),
    }
}

/// In-memory journal for tests and embedded use. Can be told to fail.
#[derive(Default)]
pub struct MemoryJournal {
    events: Mutex<Vec<Event>>,
    appends_since_compact: Mutex<u64>,
    fail: AtomicBool,
}

impl MemoryJournal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every following append fail (or succeed again).
    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub async fn events(&self) -> Vec<Event> {
        self.events.lock().await.clone()
    }
}

#[async_trait]
impl Journal for MemoryJournal {
    async fn append(&self, event: &Event) -> io::Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(io::Error::other("journal unavailable"));
        }
        self.events.lock().await.push(event.clone());
        *self.appends_since_compact.lock().await += 1;
        Ok(())
    }

    async fn compact(&self, events: Vec<Event>) -> io::Result<()> {
        *self.events.lock().await = events;
        *self.appends_since_compact.lock().await = 0;
        Ok(())
    }

    async fn appends_since_compact(&self) -> u64 {
        *self.appends_since_compact.lock().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{SlotLedger, Span};
    use ulid::Ulid;

    fn event() -> Event {
        Event::SlotCreated {
            id: Ulid::new(),
            service_id: Ulid::new(),
            span: Span::new(0, 10),
            ledger: SlotLedger::new(1),
        }
    }

    #[tokio::test]
    async fn wal_journal_persists_and_replays() {
        let dir = std::env::temp_dir().join("tally_test_journal");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("persist.wal");
        let _ = std::fs::remove_file(&path);

        let e1 = event();
        let e2 = event();
        {
            let (journal, replayed) = WalJournal::open(&path).unwrap();
            assert!(replayed.is_empty());
            journal.append(&e1).await.unwrap();
            journal.append(&e2).await.unwrap();
            assert_eq!(journal.appends_since_compact().await, 2);
        }
        let (_journal, replayed) = WalJournal::open(&path).unwrap();
        assert_eq!(replayed, vec![e1, e2]);
    }

    #[tokio::test]
    async fn wal_journal_concurrent_appends_all_land() {
        let dir = std::env::temp_dir().join("tally_test_journal");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("concurrent.wal");
        let _ = std::fs::remove_file(&path);

        let (journal, _) = WalJournal::open(&path).unwrap();
        let journal = std::sync::Arc::new(journal);
        let mut handles = Vec::new();
        for _ in 0..32 {
            let j = journal.clone();
            handles.push(tokio::spawn(async move { j.append(&event()).await }));
        }
        for h in handles {
            h.await.unwrap().unwrap();
        }
        assert_eq!(journal.appends_since_compact().await, 32);
        assert_eq!(Wal::replay(&path).unwrap().events.len(), 32);
    }

    #[tokio::test]
    async fn wal_journal_compact_resets_counter() {
        let dir = std::env::temp_dir().join("tally_test_journal");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("compact.wal");
        let _ = std::fs::remove_file(&path);

        let (journal, _) = WalJournal::open(&path).unwrap();
        for _ in 0..4 {
            journal.append(&event()).await.unwrap();
        }
        let keep = event();
        journal.compact(vec![keep.clone()]).await.unwrap();
        assert_eq!(journal.appends_since_compact().await, 0);
        assert_eq!(Wal::replay(&path).unwrap().events, vec![keep]);
    }

    #[tokio::test]
    async fn memory_journal_failure_mode() {
        let journal = MemoryJournal::new();
        journal.append(&event()).await.unwrap();
        journal.set_failing(true);
        assert!(journal.append(&event()).await.is_err());
        journal.set_failing(false);
        assert_eq!(journal.events().await.len(), 1);
    }
}
