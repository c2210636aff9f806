use std::sync::Arc;
use std::time::Duration;

use base64::Engine;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;

use super::detect::{self, FileFormat};
use super::grid::{self, ParseError, SourceKind};
use super::header;
use super::idgen::IdGenerator;
use super::normalizer::Normalizer;
use super::registration;
use crate::recon::{self, CancelLink};
use crate::service::classify::{apply_enrichment, Classify};
use crate::service::extract::{Extract, ExtractionRequest};
use crate::storage::Storage;
use crate::transaction::Transaction;

/// Raw rows sent to the extraction service per request.
pub const CHUNK_SIZE: usize = 30;

/// In-flight extraction requests per wave.
pub const WAVE_CONCURRENCY: usize = 2;

/// Command channel depth; control messages are tiny and infrequent.
const COMMAND_BUFFER: usize = 64;

/// Cooperative yield before each file begins.
const FILE_YIELD: Duration = Duration::from_millis(25);

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),
    #[error("Storage error: {0}")]
    Storage(#[from] crate::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    Idle,
    Processing,
    Paused,
    Completed,
    Error,
}

/// Observable pipeline snapshot, published on every state change.
#[derive(Debug, Clone)]
pub struct Progress {
    pub state: PipelineState,
    pub files_total: usize,
    pub files_done: usize,
    pub files_failed: usize,
    pub current_file: Option<String>,
    pub transactions: usize,
    pub registrations: usize,
}

impl Progress {
    fn idle() -> Self {
        Self {
            state: PipelineState::Idle,
            files_total: 0,
            files_done: 0,
            files_failed: 0,
            current_file: None,
            transactions: 0,
            registrations: 0,
        }
    }
}

/// One pending input file: name, optional declared MIME type, raw bytes.
#[derive(Debug, Clone)]
pub struct InputFile {
    pub name: String,
    pub mime: Option<String>,
    pub bytes: Vec<u8>,
}

impl InputFile {
    #[must_use]
    pub fn new(name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            mime: None,
            bytes,
        }
    }

    #[must_use]
    pub fn with_mime(mut self, mime: impl Into<String>) -> Self {
        self.mime = Some(mime.into());
        self
    }
}

enum Command {
    AddFiles(Vec<InputFile>),
    Pause,
    Resume,
    Cancel,
    Snapshot(oneshot::Sender<Vec<Transaction>>),
    Shutdown,
}

/// Handle to the pipeline worker task: command channel in, progress out.
pub struct PipelineHandle {
    commands: mpsc::Sender<Command>,
    progress: watch::Receiver<Progress>,
    worker: JoinHandle<()>,
}

impl PipelineHandle {
    pub async fn add_files(&self, files: Vec<InputFile>) {
        let _ = self.commands.send(Command::AddFiles(files)).await;
    }

    pub async fn pause(&self) {
        let _ = self.commands.send(Command::Pause).await;
    }

    pub async fn resume(&self) {
        let _ = self.commands.send(Command::Resume).await;
    }

    pub async fn cancel(&self) {
        let _ = self.commands.send(Command::Cancel).await;
    }

    /// Current accumulated result set.
    pub async fn results(&self) -> Vec<Transaction> {
        let (tx, rx) = oneshot::channel();
        if self.commands.send(Command::Snapshot(tx)).await.is_err() {
            return Vec::new();
        }
        rx.await.unwrap_or_default()
    }

    #[must_use]
    pub fn progress(&self) -> watch::Receiver<Progress> {
        self.progress.clone()
    }

    /// Wait until the published progress satisfies `predicate`.
    pub async fn wait_for<F>(&self, predicate: F) -> Progress
    where
        F: Fn(&Progress) -> bool,
    {
        let mut rx = self.progress.clone();
        loop {
            {
                let snapshot = rx.borrow().clone();
                if predicate(&snapshot) {
                    return snapshot;
                }
            }
            if rx.changed().await.is_err() {
                return rx.borrow().clone();
            }
        }
    }

    pub async fn shutdown(self) {
        let _ = self.commands.send(Command::Shutdown).await;
        let _ = self.worker.await;
    }
}

/// Builds and spawns the pipeline worker.
pub struct PipelineBuilder {
    extractor: Arc<dyn Extract>,
    classifier: Arc<dyn Classify>,
    storage: Arc<Storage>,
    normalizer: Normalizer,
    company_id: String,
    chunk_size: usize,
    wave_concurrency: usize,
}

impl PipelineBuilder {
    #[must_use]
    pub fn new(
        extractor: Arc<dyn Extract>,
        classifier: Arc<dyn Classify>,
        storage: Arc<Storage>,
    ) -> Self {
        Self {
            extractor,
            classifier,
            storage,
            normalizer: Normalizer::default(),
            company_id: "default".to_string(),
            chunk_size: CHUNK_SIZE,
            wave_concurrency: WAVE_CONCURRENCY,
        }
    }

    #[must_use]
    pub fn with_company_id(mut self, company_id: impl Into<String>) -> Self {
        self.company_id = company_id.into();
        self
    }

    #[must_use]
    pub fn with_normalizer(mut self, normalizer: Normalizer) -> Self {
        self.normalizer = normalizer;
        self
    }

    #[must_use]
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    #[must_use]
    pub fn with_wave_concurrency(mut self, wave: usize) -> Self {
        self.wave_concurrency = wave.max(1);
        self
    }

    #[must_use]
    pub fn spawn(self) -> PipelineHandle {
        let (command_tx, command_rx) = mpsc::channel(COMMAND_BUFFER);
        let (progress_tx, progress_rx) = watch::channel(Progress::idle());

        let worker = Worker {
            extractor: self.extractor,
            classifier: self.classifier,
            storage: self.storage,
            normalizer: self.normalizer,
            company_id: self.company_id,
            chunk_size: self.chunk_size,
            wave_concurrency: self.wave_concurrency,
            queue: Vec::new(),
            next_index: 0,
            results: Vec::new(),
            pending_links: Vec::new(),
            pending_queue: Vec::new(),
            ids: IdGenerator::new(),
            state: PipelineState::Idle,
            running: false,
            paused: false,
            cancelled: false,
            stopping: false,
            files_done: 0,
            files_failed: 0,
            registrations: 0,
            current_file: None,
            progress: progress_tx,
        };

        let handle = tokio::spawn(worker.run(command_rx));

        PipelineHandle {
            commands: command_tx,
            progress: progress_rx,
            worker: handle,
        }
    }
}

enum FileOutcome {
    Done,
    Interrupted,
}

/// Owns all session state. Everything is mutated from this single task;
/// the only concurrency is the bounded in-flight requests inside a wave.
struct Worker {
    extractor: Arc<dyn Extract>,
    classifier: Arc<dyn Classify>,
    storage: Arc<Storage>,
    normalizer: Normalizer,
    company_id: String,
    chunk_size: usize,
    wave_concurrency: usize,

    queue: Vec<InputFile>,
    next_index: usize,
    results: Vec<Transaction>,
    pending_links: Vec<CancelLink>,
    pending_queue: Vec<Transaction>,
    ids: IdGenerator,

    state: PipelineState,
    running: bool,
    paused: bool,
    cancelled: bool,
    stopping: bool,

    files_done: usize,
    files_failed: usize,
    registrations: usize,
    current_file: Option<String>,

    progress: watch::Sender<Progress>,
}

impl Worker {
    async fn run(mut self, mut commands: mpsc::Receiver<Command>) {
        while let Some(command) = commands.recv().await {
            match command {
                Command::AddFiles(files) => {
                    self.queue.extend(files);
                    self.publish();
                    // Auto-start unless a run is live or explicitly paused.
                    if matches!(
                        self.state,
                        PipelineState::Idle | PipelineState::Completed | PipelineState::Error
                    ) && self.next_index < self.queue.len()
                    {
                        self.process(&mut commands).await;
                    }
                }
                Command::Pause => {
                    // Only meaningful mid-run; observed at yield points.
                    if self.state == PipelineState::Processing {
                        self.paused = true;
                    }
                }
                Command::Resume => {
                    if self.state == PipelineState::Paused {
                        self.paused = false;
                        self.process(&mut commands).await;
                    }
                }
                Command::Cancel => self.reset(),
                Command::Snapshot(reply) => {
                    let _ = reply.send(self.results.clone());
                }
                Command::Shutdown => break,
            }
            if self.stopping {
                break;
            }
        }
    }

    /// Drive the queue from the last uncommitted file index.
    async fn process(&mut self, commands: &mut mpsc::Receiver<Command>) {
        if self.running {
            return;
        }
        self.running = true;
        self.set_state(PipelineState::Processing);

        while self.next_index < self.queue.len() {
            self.drain_control(commands);
            if self.cancelled || self.stopping {
                self.reset();
                self.running = false;
                return;
            }
            if self.paused {
                self.current_file = None;
                self.set_state(PipelineState::Paused);
                self.running = false;
                return;
            }

            let file_name = self.queue[self.next_index].name.clone();
            self.current_file = Some(file_name.clone());
            self.publish();
            tokio::time::sleep(FILE_YIELD).await;

            match self.process_file(commands).await {
                Ok(FileOutcome::Done) => {
                    self.next_index += 1;
                    self.files_done += 1;
                }
                Ok(FileOutcome::Interrupted) => {
                    // Not committed: the file restarts from scratch on resume.
                }
                Err(err) => {
                    // A single bad file never aborts the run.
                    tracing::warn!(file = %file_name, "file skipped: {err}");
                    self.next_index += 1;
                    self.files_failed += 1;
                }
            }
            self.publish();
        }

        self.current_file = None;
        // A run where nothing succeeded is an error, not a completion.
        let state = if self.files_done == 0 && self.files_failed > 0 {
            PipelineState::Error
        } else {
            PipelineState::Completed
        };
        self.set_state(state);
        self.running = false;
    }

    async fn process_file(
        &mut self,
        commands: &mut mpsc::Receiver<Command>,
    ) -> Result<FileOutcome, PipelineError> {
        let file = self.queue[self.next_index].clone();
        let kind = SourceKind::detect(&file.name, file.mime.as_deref())?;

        match kind {
            SourceKind::Spreadsheet | SourceKind::Csv => {
                self.process_grid_file(commands, &file, kind).await
            }
            SourceKind::Image | SourceKind::Pdf => self.process_binary_file(&file, kind).await,
        }
    }

    async fn process_grid_file(
        &mut self,
        commands: &mut mpsc::Receiver<Command>,
        file: &InputFile,
        kind: SourceKind,
    ) -> Result<FileOutcome, PipelineError> {
        let rows = grid::parse_grid(&file.name, kind, &file.bytes)?;
        let header_idx = header::locate_header(&rows);
        let header_row = rows[header_idx].clone();
        let format = detect::detect_format(&header_row);

        let body: Vec<Vec<String>> = rows[header_idx + 1..]
            .iter()
            .filter(|row| !grid::is_blank_row(row))
            .cloned()
            .collect();

        tracing::debug!(
            file = %file.name,
            format = %format,
            header = header_idx,
            rows = body.len(),
            "grid file detected"
        );

        if format == FileFormat::CardRegistration {
            let imported = registration::import_rows(&header_row, &body, &self.storage).await?;
            self.registrations += imported;
            return Ok(FileOutcome::Done);
        }

        let file_start = self.results.len();
        let chunks: Vec<Vec<Vec<String>>> = body
            .chunks(self.chunk_size)
            .map(<[Vec<String>]>::to_vec)
            .collect();

        for wave in chunks.chunks(self.wave_concurrency) {
            self.drain_control(commands);
            if self.paused || self.cancelled || self.stopping {
                self.rollback_file(file_start);
                return Ok(FileOutcome::Interrupted);
            }

            let extractor = Arc::clone(&self.extractor);
            let requests = wave.iter().map(|chunk| {
                let request = ExtractionRequest {
                    data: chunk_payload(&header_row, chunk),
                    mime_type: kind.mime_type().to_string(),
                    file_type: Some(format),
                };
                let extractor = Arc::clone(&extractor);
                async move { extractor.extract(request).await }
            });

            // The wave is awaited fully; its two requests may complete in
            // either order, which is safe because classification correlates
            // by position within each chunk.
            let wave_records = futures::future::join_all(requests).await;

            for records in wave_records {
                let mut chunk_txns: Vec<Transaction> = records
                    .iter()
                    .map(|raw| self.normalizer.normalize(raw, &mut self.ids))
                    .collect();
                if chunk_txns.is_empty() {
                    continue;
                }
                self.classify_chunk(&mut chunk_txns).await;
                self.merge_chunk(chunk_txns);
            }
        }

        self.commit_file(file_start).await?;
        Ok(FileOutcome::Done)
    }

    async fn process_binary_file(
        &mut self,
        file: &InputFile,
        kind: SourceKind,
    ) -> Result<FileOutcome, PipelineError> {
        let mime_type = file
            .mime
            .clone()
            .unwrap_or_else(|| kind.mime_type().to_string());

        let request = ExtractionRequest {
            data: base64::engine::general_purpose::STANDARD.encode(&file.bytes),
            mime_type,
            file_type: None,
        };

        let file_start = self.results.len();
        let records = self.extractor.extract(request).await;

        let mut chunk_txns: Vec<Transaction> = records
            .iter()
            .map(|raw| self.normalizer.normalize(raw, &mut self.ids))
            .collect();
        if !chunk_txns.is_empty() {
            self.classify_chunk(&mut chunk_txns).await;
            self.merge_chunk(chunk_txns);
        }

        self.commit_file(file_start).await?;
        Ok(FileOutcome::Done)
    }

    async fn classify_chunk(&mut self, chunk: &mut [Transaction]) {
        match self.classifier.classify(chunk, &self.company_id).await {
            Some(enriched) => apply_enrichment(chunk, &enriched),
            None => {
                // Skipped batch: default category stays; the rows are parked
                // in memory and hit the queue only when the file commits, so
                // a rollback leaves no orphan payloads behind.
                self.pending_queue.extend(chunk.iter().cloned());
            }
        }
    }

    /// Merge a freshly classified chunk: intra-chunk reconciliation, append,
    /// then a cross-batch pass over the whole accumulated set.
    fn merge_chunk(&mut self, mut chunk: Vec<Transaction>) {
        let links = recon::reconcile_batch(&mut chunk);
        self.pending_links.extend(links);
        self.results.extend(chunk);

        let cross = recon::reconcile_all(&mut self.results);
        self.pending_links.extend(cross);
        self.publish();
    }

    /// Persist the file's rows, then write back any cancel links the file's
    /// reconciliation passes created (both sides are persisted by now).
    async fn commit_file(&mut self, file_start: usize) -> Result<(), PipelineError> {
        let file_txns = &self.results[file_start..];
        if !file_txns.is_empty() {
            self.storage
                .insert_transactions(&self.company_id, file_txns)
                .await?;
        }

        for link in std::mem::take(&mut self.pending_links) {
            for id in [link.original_id, link.cancellation_id] {
                if let Some(txn) = self.results.iter().find(|t| t.id == id) {
                    if let Err(err) = self.storage.update_reconciled(txn).await {
                        tracing::warn!(id, "cancel link not persisted: {err}");
                    }
                }
            }
        }

        for txn in std::mem::take(&mut self.pending_queue) {
            if let Err(err) = self
                .storage
                .enqueue_classification(&self.company_id, &txn)
                .await
            {
                tracing::warn!(id = txn.id, "could not queue for classification: {err}");
            }
        }

        Ok(())
    }

    /// Discard a partially processed file: drop its rows and unhook any
    /// cancel pairs that pointed into them.
    fn rollback_file(&mut self, file_start: usize) {
        let removed: Vec<i64> = self.results[file_start..].iter().map(|t| t.id).collect();
        self.results.truncate(file_start);
        for txn in &mut self.results {
            if txn
                .cancel_pair_id
                .is_some_and(|pair| removed.contains(&pair))
            {
                txn.cancel_pair_id = None;
            }
        }
        self.pending_links
            .retain(|l| !removed.contains(&l.original_id) && !removed.contains(&l.cancellation_id));
        // Parked rows always belong to the current file; committed files
        // already drained them.
        self.pending_queue.clear();
    }

    /// Observe control commands at a cooperative yield point.
    fn drain_control(&mut self, commands: &mut mpsc::Receiver<Command>) {
        while let Ok(command) = commands.try_recv() {
            match command {
                Command::AddFiles(files) => {
                    self.queue.extend(files);
                }
                Command::Pause => self.paused = true,
                Command::Resume => self.paused = false,
                Command::Cancel => self.cancelled = true,
                Command::Snapshot(reply) => {
                    let _ = reply.send(self.results.clone());
                }
                Command::Shutdown => self.stopping = true,
            }
        }
    }

    /// Cancel: clear the queue, reset progress, discard session results.
    /// In-flight requests are not aborted; their output is dropped with the
    /// session state.
    fn reset(&mut self) {
        self.queue.clear();
        self.next_index = 0;
        self.results.clear();
        self.pending_links.clear();
        self.pending_queue.clear();
        self.files_done = 0;
        self.files_failed = 0;
        self.registrations = 0;
        self.current_file = None;
        self.paused = false;
        self.cancelled = false;
        self.set_state(PipelineState::Idle);
    }

    fn set_state(&mut self, state: PipelineState) {
        self.state = state;
        self.publish();
    }

    fn publish(&self) {
        let _ = self.progress.send(Progress {
            state: self.state,
            files_total: self.queue.len(),
            files_done: self.files_done,
            files_failed: self.files_failed,
            current_file: self.current_file.clone(),
            transactions: self.results.len(),
            registrations: self.registrations,
        });
    }
}

/// Serialize a chunk for the extraction service: header first, one line per
/// row, cells tab-joined (commas appear inside cells too often).
fn chunk_payload(header: &[String], rows: &[Vec<String>]) -> String {
    let mut lines = Vec::with_capacity(rows.len() + 1);
    lines.push(header.join("\t"));
    for row in rows {
        lines.push(row.join("\t"));
    }
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::classify::EnrichedRecord;
    use crate::service::extract::RawRecord;
    use crate::transaction::{PaymentMethod, TxnKind, UNCLASSIFIED};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use tokio::sync::Semaphore;

    /// Parses the tab-separated chunk payload the way the real service reads
    /// uploaded grids. A semaphore gates request completion so tests can
    /// position pause/cancel commands deterministically.
    struct FakeExtractor {
        gate: Option<Semaphore>,
        requests: AtomicUsize,
        seen_file_types: Mutex<Vec<Option<FileFormat>>>,
    }

    impl FakeExtractor {
        fn new() -> Self {
            Self {
                gate: None,
                requests: AtomicUsize::new(0),
                seen_file_types: Mutex::new(Vec::new()),
            }
        }

        fn gated() -> Self {
            Self {
                gate: Some(Semaphore::new(0)),
                ..Self::new()
            }
        }

        fn release(&self, permits: usize) {
            if let Some(gate) = &self.gate {
                gate.add_permits(permits);
            }
        }
    }

    #[async_trait]
    impl Extract for FakeExtractor {
        async fn extract(&self, request: ExtractionRequest) -> Vec<RawRecord> {
            self.requests.fetch_add(1, Ordering::SeqCst);
            self.seen_file_types
                .lock()
                .unwrap()
                .push(request.file_type);
            if let Some(gate) = &self.gate {
                gate.acquire().await.unwrap().forget();
            }

            let mut lines = request.data.lines();
            let header: Vec<String> = lines
                .next()
                .unwrap_or_default()
                .split('\t')
                .map(|c| c.trim().to_lowercase())
                .collect();
            let col = |name: &str| header.iter().position(|h| h.contains(name));
            let (date_c, memo_c, wd_c, dep_c) =
                (col("date"), col("memo"), col("withdrawal"), col("deposit"));

            let mut records = Vec::new();
            for line in lines {
                let cells: Vec<&str> = line.split('\t').collect();
                let get = |c: Option<usize>| {
                    c.and_then(|i| cells.get(i))
                        .map(|v| (*v).trim().to_string())
                        .filter(|v| !v.is_empty())
                };
                let withdrawal = get(wd_c);
                let deposit = get(dep_c);
                let (amount, kind) = match (withdrawal, deposit) {
                    (Some(w), _) => (Some(w), Some("withdrawal".to_string())),
                    (None, Some(d)) => (Some(d), Some("deposit".to_string())),
                    (None, None) => (None, None),
                };
                records.push(RawRecord {
                    date: get(date_c),
                    counterparty: get(memo_c),
                    description: get(memo_c).unwrap_or_default().into(),
                    amount,
                    kind,
                    payment_method: match request.file_type {
                        Some(FileFormat::BankStatement) => Some("bank".to_string()),
                        Some(_) => Some("card".to_string()),
                        None => None,
                    },
                    ..RawRecord::default()
                });
            }
            records
        }
    }

    struct FakeClassifier {
        category: Option<String>,
    }

    #[async_trait]
    impl Classify for FakeClassifier {
        async fn classify(
            &self,
            batch: &[Transaction],
            _company_id: &str,
        ) -> Option<Vec<EnrichedRecord>> {
            self.category.as_ref().map(|category| {
                batch
                    .iter()
                    .map(|_| EnrichedRecord {
                        category: Some(category.clone()),
                        ..Default::default()
                    })
                    .collect()
            })
        }

        async fn restore_queue(
            &self,
            _company_id: &str,
            _status: &str,
            _limit: u32,
        ) -> Vec<Transaction> {
            Vec::new()
        }
    }

    fn bank_csv(rows: &[(&str, &str, &str, &str)]) -> Vec<u8> {
        let mut out = String::from("date,memo,withdrawal,deposit\n");
        for (date, memo, withdrawal, deposit) in rows {
            out.push_str(&format!("{date},{memo},{withdrawal},{deposit}\n"));
        }
        out.into_bytes()
    }

    async fn spawn_pipeline(
        extractor: Arc<FakeExtractor>,
        classifier: FakeClassifier,
    ) -> (PipelineHandle, Arc<Storage>) {
        let storage = Arc::new(Storage::open_memory().await.unwrap());
        let handle = PipelineBuilder::new(extractor, Arc::new(classifier), Arc::clone(&storage))
            .with_company_id("acme")
            .spawn();
        (handle, storage)
    }

    fn settled(p: &Progress) -> bool {
        p.state == PipelineState::Completed
    }

    /// Wait until `n` extraction requests are in flight or finished, so
    /// control commands land at a known yield point.
    async fn wait_requests(extractor: &FakeExtractor, n: usize) {
        while extractor.requests.load(Ordering::SeqCst) < n {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    #[tokio::test]
    async fn end_to_end_bank_statement() {
        let extractor = Arc::new(FakeExtractor::new());
        let (handle, storage) = spawn_pipeline(
            Arc::clone(&extractor),
            FakeClassifier { category: None },
        )
        .await;

        let file = InputFile::new(
            "jan.csv",
            bank_csv(&[("2026-01-05", "Coffee Shop", "4500", "")]),
        );
        handle.add_files(vec![file]).await;
        handle.wait_for(settled).await;

        let results = handle.results().await;
        assert_eq!(results.len(), 1);
        let txn = &results[0];
        assert_eq!(txn.amount, 4500.0);
        assert_eq!(txn.kind, TxnKind::Expense);
        assert_eq!(txn.payment_method, PaymentMethod::Bank);
        assert_eq!(txn.counterparty, "Coffee Shop");
        assert_eq!(txn.category, UNCLASSIFIED);

        // The header row was detected at index 0 and the file classified as
        // a bank statement.
        assert_eq!(
            extractor.seen_file_types.lock().unwrap().as_slice(),
            &[Some(FileFormat::BankStatement)]
        );

        // Committed rows made it to storage.
        assert_eq!(storage.count_transactions("acme").await.unwrap(), 1);
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn chunks_and_waves_cover_all_rows() {
        let extractor = Arc::new(FakeExtractor::new());
        let (handle, _storage) = spawn_pipeline(
            Arc::clone(&extractor),
            FakeClassifier { category: None },
        )
        .await;

        let rows: Vec<(String, String, String, String)> = (0..10)
            .map(|i| {
                (
                    "2026-01-05".to_string(),
                    format!("Shop {i}"),
                    "1000".to_string(),
                    String::new(),
                )
            })
            .collect();
        let borrowed: Vec<(&str, &str, &str, &str)> = rows
            .iter()
            .map(|(a, b, c, d)| (a.as_str(), b.as_str(), c.as_str(), d.as_str()))
            .collect();

        let handle2 = PipelineBuilder::new(
            Arc::clone(&extractor) as Arc<dyn Extract>,
            Arc::new(FakeClassifier { category: None }),
            Arc::new(Storage::open_memory().await.unwrap()),
        )
        .with_chunk_size(3)
        .with_wave_concurrency(2)
        .spawn();

        handle2
            .add_files(vec![InputFile::new("feed.csv", bank_csv(&borrowed))])
            .await;
        handle2.wait_for(settled).await;

        // 10 rows in chunks of 3 -> 4 requests.
        assert_eq!(extractor.requests.load(Ordering::SeqCst), 4);
        assert_eq!(handle2.results().await.len(), 10);

        handle.shutdown().await;
        handle2.shutdown().await;
    }

    #[tokio::test]
    async fn classification_enriches_in_place() {
        let extractor = Arc::new(FakeExtractor::new());
        let (handle, _storage) = spawn_pipeline(
            Arc::clone(&extractor),
            FakeClassifier {
                category: Some("Meals".to_string()),
            },
        )
        .await;

        handle
            .add_files(vec![InputFile::new(
                "jan.csv",
                bank_csv(&[("2026-01-05", "Coffee Shop", "4500", "")]),
            )])
            .await;
        handle.wait_for(settled).await;

        assert_eq!(handle.results().await[0].category, "Meals");
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn skipped_classification_parks_rows_in_queue() {
        let extractor = Arc::new(FakeExtractor::new());
        let (handle, storage) = spawn_pipeline(
            Arc::clone(&extractor),
            FakeClassifier { category: None },
        )
        .await;

        handle
            .add_files(vec![InputFile::new(
                "jan.csv",
                bank_csv(&[("2026-01-05", "Coffee Shop", "4500", "")]),
            )])
            .await;
        handle.wait_for(settled).await;

        let queued = storage
            .pending_classifications("acme", "pending", 10)
            .await
            .unwrap();
        assert_eq!(queued.len(), 1);
        assert_eq!(queued[0].category, UNCLASSIFIED);
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn rolled_back_file_leaves_no_queue_entries() {
        let extractor = Arc::new(FakeExtractor::gated());
        let storage = Arc::new(Storage::open_memory().await.unwrap());
        let handle = PipelineBuilder::new(
            Arc::clone(&extractor) as Arc<dyn Extract>,
            Arc::new(FakeClassifier { category: None }),
            Arc::clone(&storage),
        )
        .with_company_id("acme")
        .with_chunk_size(1)
        .with_wave_concurrency(1)
        .spawn();

        handle
            .add_files(vec![InputFile::new(
                "jan.csv",
                bank_csv(&[
                    ("2026-01-05", "Coffee Shop", "4500", ""),
                    ("2026-01-06", "Book Store", "12000", ""),
                ]),
            )])
            .await;

        // Pause lands between the file's two waves: the first chunk was
        // already parked for later classification when the file rolls back.
        wait_requests(&extractor, 1).await;
        handle.pause().await;
        extractor.release(1);

        let paused = handle.wait_for(|p| p.state == PipelineState::Paused).await;
        assert_eq!(paused.transactions, 0);
        assert!(
            storage
                .pending_classifications("acme", "pending", 10)
                .await
                .unwrap()
                .is_empty(),
            "rollback must not leave parked rows behind"
        );

        handle.resume().await;
        extractor.release(2);
        handle.wait_for(settled).await;

        // The reprocessed file parks each row exactly once.
        let queued = storage
            .pending_classifications("acme", "pending", 10)
            .await
            .unwrap();
        assert_eq!(queued.len(), 2);
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn bad_file_does_not_abort_the_run() {
        let extractor = Arc::new(FakeExtractor::new());
        let (handle, _storage) = spawn_pipeline(
            Arc::clone(&extractor),
            FakeClassifier { category: None },
        )
        .await;

        handle
            .add_files(vec![
                InputFile::new("broken.xyz", b"not a grid".to_vec()),
                InputFile::new(
                    "jan.csv",
                    bank_csv(&[("2026-01-05", "Coffee Shop", "4500", "")]),
                ),
            ])
            .await;
        let progress = handle.wait_for(settled).await;

        assert_eq!(progress.files_failed, 1);
        assert_eq!(progress.files_done, 1);
        assert_eq!(handle.results().await.len(), 1);
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn run_with_no_successes_ends_in_error() {
        let extractor = Arc::new(FakeExtractor::new());
        let (handle, _storage) = spawn_pipeline(
            Arc::clone(&extractor),
            FakeClassifier { category: None },
        )
        .await;

        handle
            .add_files(vec![InputFile::new("broken.xyz", b"not a grid".to_vec())])
            .await;
        let progress = handle
            .wait_for(|p| p.state == PipelineState::Error)
            .await;

        assert_eq!(progress.files_failed, 1);
        assert_eq!(progress.files_done, 0);
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn pause_between_files_resumes_without_duplicates() {
        let extractor = Arc::new(FakeExtractor::gated());
        let (handle, _storage) = spawn_pipeline(
            Arc::clone(&extractor),
            FakeClassifier { category: None },
        )
        .await;

        handle
            .add_files(vec![
                InputFile::new(
                    "one.csv",
                    bank_csv(&[("2026-01-05", "Coffee Shop", "4500", "")]),
                ),
                InputFile::new(
                    "two.csv",
                    bank_csv(&[("2026-01-06", "Book Store", "12000", "")]),
                ),
            ])
            .await;

        // File one's request is in flight; the pause command is observed at
        // the next yield point, after file one commits.
        wait_requests(&extractor, 1).await;
        handle.pause().await;
        extractor.release(1);

        let paused = handle.wait_for(|p| p.state == PipelineState::Paused).await;
        assert_eq!(paused.files_done, 1);
        assert_eq!(paused.transactions, 1);

        handle.resume().await;
        extractor.release(1);
        let done = handle.wait_for(settled).await;

        assert_eq!(done.files_done, 2);
        let results = handle.results().await;
        assert_eq!(results.len(), 2);
        let coffee = results
            .iter()
            .filter(|t| t.counterparty == "Coffee Shop")
            .count();
        assert_eq!(coffee, 1, "file one must not be reprocessed");
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn cancel_discards_results_and_clears_queue() {
        let extractor = Arc::new(FakeExtractor::gated());
        let (handle, _storage) = spawn_pipeline(
            Arc::clone(&extractor),
            FakeClassifier { category: None },
        )
        .await;

        handle
            .add_files(vec![
                InputFile::new(
                    "one.csv",
                    bank_csv(&[("2026-01-05", "Coffee Shop", "4500", "")]),
                ),
                InputFile::new(
                    "two.csv",
                    bank_csv(&[("2026-01-06", "Book Store", "12000", "")]),
                ),
            ])
            .await;

        wait_requests(&extractor, 1).await;
        handle.cancel().await;
        // The in-flight wave completes; its results are discarded with the
        // session state.
        extractor.release(2);

        let idle = handle.wait_for(|p| p.state == PipelineState::Idle).await;
        assert_eq!(idle.files_total, 0);
        assert_eq!(idle.transactions, 0);
        assert!(handle.results().await.is_empty());
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn cancellations_link_across_files() {
        struct PairExtractor;

        #[async_trait]
        impl Extract for PairExtractor {
            async fn extract(&self, request: ExtractionRequest) -> Vec<RawRecord> {
                // One record per body line; the memo column carries the
                // description and the last column an approval number.
                request
                    .data
                    .lines()
                    .skip(1)
                    .map(|line| {
                        let cells: Vec<&str> = line.split('\t').collect();
                        RawRecord {
                            date: Some("2026-01-05".into()),
                            counterparty: cells.first().map(|s| (*s).to_string()),
                            description: cells.first().map(|s| (*s).to_string()),
                            amount: Some("9000".into()),
                            approval_number: cells.get(1).map(|s| (*s).to_string()),
                            ..RawRecord::default()
                        }
                    })
                    .collect()
            }
        }

        let storage = Arc::new(Storage::open_memory().await.unwrap());
        let handle = PipelineBuilder::new(
            Arc::new(PairExtractor),
            Arc::new(FakeClassifier {
                category: Some("Fuel".to_string()),
            }),
            Arc::clone(&storage),
        )
        .with_company_id("acme")
        .spawn();

        let original = "memo,approval\nFuel purchase,Z9999\n";
        let cancellation = "memo,approval\nFuel purchase cancel,Z9999\n";
        handle
            .add_files(vec![
                InputFile::new("one.csv", original.as_bytes().to_vec()),
                InputFile::new("two.csv", cancellation.as_bytes().to_vec()),
            ])
            .await;
        handle.wait_for(settled).await;

        let results = handle.results().await;
        assert_eq!(results.len(), 2);
        let original = results.iter().find(|t| !t.is_cancelled).unwrap();
        let cancelled = results.iter().find(|t| t.is_cancelled).unwrap();
        assert_eq!(original.cancel_pair_id, Some(cancelled.id));
        assert_eq!(cancelled.cancel_pair_id, Some(original.id));
        assert_eq!(cancelled.category, "Fuel");

        // The persisted originals were updated in place.
        let stored = storage.list_transactions("acme").await.unwrap();
        let stored_original = stored.iter().find(|t| t.id == original.id).unwrap();
        assert_eq!(stored_original.cancel_pair_id, Some(cancelled.id));
        handle.shutdown().await;
    }
}
