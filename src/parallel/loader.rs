use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use crossbeam::channel::{bounded, unbounded};
use serde::Serialize;
use tracing::{debug, error, info, warn};
use uuid::Uuid;
use crate::core::config::Config;
use crate::core::error::{Error, ErrorKind, Result};
use crate::parallel::merger::ShardMerger;
use crate::parallel::parser::{read_lines, ParallelParser};
use crate::storage::codec;
use crate::storage::file_lock::FileLock;
use crate::storage::hash_index::HashIndex;
use crate::storage::layout::StorageLayout;
use crate::storage::rebuild::rebuild_index;
use crate::storage::record_store::RecordStore;

/// What one worker produced
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ShardReport {
    pub rank: usize,
    pub files: usize,
    pub files_skipped: usize,
    pub records: u64,
    pub malformed_lines: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct LoadReport {
    pub job: Uuid,
    pub workers: usize,
    pub files: usize,
    pub files_skipped: usize,
    /// Records appended by this run
    pub records: u64,
    pub malformed_lines: usize,
    /// Records linked by the rebuild pass, including any that were already stored
    pub store_records: u64,
    pub shards: Vec<ShardReport>,
}

type WorkerOutcome = (usize, Result<ShardReport>);

/// Two-phase bulk ingestion.
///
/// Phase one: the coordinator broadcasts the sorted input list to every worker;
/// worker `rank` takes files `i` with `i % workers == rank`, parses them on its
/// own rayon pool and writes a shard of unlinked records. The coordinator waits
/// for every worker to report back before phase two, where it alone appends the
/// shards in rank order and relinks the whole store from offset 0.
///
/// Unreadable input files are skipped. A worker that cannot write its shard,
/// or a coordinator that cannot open the store or index, aborts the whole job.
pub struct BulkLoader {
    config: Config,
    layout: StorageLayout,
    job: Option<Uuid>,
}

impl BulkLoader {
    pub fn new(config: &Config) -> Result<Self> {
        config.validate()?;
        Ok(BulkLoader {
            layout: StorageLayout::new(config)?,
            config: config.clone(),
            job: None,
        })
    }

    /// Run under a fixed job id instead of a fresh one; the work dir is
    /// `load-<job>` either way.
    pub fn with_job_id(mut self, job: Uuid) -> Self {
        self.job = Some(job);
        self
    }

    /// Load every file in `input_dir` with the configured extension.
    pub fn run(&self, input_dir: &Path) -> Result<LoadReport> {
        let files = self.input_files(input_dir)?;
        self.run_files(files)
    }

    /// Load `files`; their order decides rank assignment and merge order.
    pub fn run_files(&self, files: Vec<PathBuf>) -> Result<LoadReport> {
        let _lock = FileLock::acquire_if(&self.layout, self.config.use_file_lock)?;

        let job = self.job.unwrap_or_else(Uuid::new_v4);
        let work_dir = self.layout.load_dir(&job);
        fs::create_dir_all(&work_dir)
            .map_err(|e| abort(format!("cannot create work dir {:?}: {}", work_dir, e)))?;

        let workers = self.config.loader_workers;
        info!(%job, files = files.len(), workers, "bulk load started");

        let file_count = files.len();
        let outcome = self
            .scatter(&work_dir, Arc::new(files))
            .and_then(|shards| self.reduce(&work_dir, &shards).map(|linked| (shards, linked)));

        if let Err(e) = fs::remove_dir_all(&work_dir) {
            warn!(dir = %work_dir.display(), "cannot remove work dir: {}", e);
        }
        let (shards, store_records) = outcome?;

        let report = LoadReport {
            job,
            workers,
            files: file_count,
            files_skipped: shards.iter().map(|s| s.files_skipped).sum(),
            records: shards.iter().map(|s| s.records).sum(),
            malformed_lines: shards.iter().map(|s| s.malformed_lines).sum(),
            store_records,
            shards,
        };

        info!(
            %job,
            records = report.records,
            malformed = report.malformed_lines,
            store_records = report.store_records,
            "bulk load finished"
        );
        Ok(report)
    }

    fn input_files(&self, input_dir: &Path) -> Result<Vec<PathBuf>> {
        let entries = fs::read_dir(input_dir).map_err(|e| {
            Error::new(
                ErrorKind::InvalidArgument,
                format!("input dir {:?}: {}", input_dir, e),
            )
        })?;

        let mut files = Vec::new();
        for entry in entries {
            let path = entry?.path();
            let matches = path
                .extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| ext.eq_ignore_ascii_case(&self.config.input_extension));
            if path.is_file() && matches {
                files.push(path);
            }
        }
        files.sort();
        Ok(files)
    }

    /// Phase one. Returns one report per rank, in rank order.
    fn scatter(&self, work_dir: &Path, files: Arc<Vec<PathBuf>>) -> Result<Vec<ShardReport>> {
        let workers = self.config.loader_workers;
        let threads = self.config.parser_threads();

        thread::scope(|scope| {
            let (result_tx, result_rx) = unbounded::<WorkerOutcome>();
            let mut assignments = Vec::with_capacity(workers);

            for rank in 0..workers {
                let (assign_tx, assign_rx) = bounded::<Arc<Vec<PathBuf>>>(1);
                assignments.push(assign_tx);

                let results = result_tx.clone();
                let shard = StorageLayout::shard_path(work_dir, rank);
                scope.spawn(move || {
                    let outcome = match assign_rx.recv() {
                        Ok(files) => run_worker(rank, workers, &files, &shard, threads),
                        Err(_) => Err(abort(format!("rank {} never got its assignment", rank))),
                    };
                    let _ = results.send((rank, outcome));
                });
            }
            drop(result_tx);

            for assign in &assignments {
                let _ = assign.send(Arc::clone(&files));
            }

            // Barrier: every worker reports exactly once
            let mut reports: Vec<Option<ShardReport>> = vec![None; workers];
            let mut failure: Option<Error> = None;
            for (rank, outcome) in result_rx.iter() {
                match outcome {
                    Ok(report) => reports[rank] = Some(report),
                    Err(e) => {
                        error!(rank, "worker failed: {}", e);
                        if failure.is_none() {
                            failure = Some(abort(format!("rank {}: {}", rank, e.context)));
                        }
                    }
                }
            }

            if let Some(e) = failure {
                return Err(e);
            }
            reports
                .into_iter()
                .enumerate()
                .map(|(rank, report)| {
                    report.ok_or_else(|| abort(format!("rank {} exited without reporting", rank)))
                })
                .collect()
        })
    }

    /// Phase two. Returns the number of records linked.
    fn reduce(&self, work_dir: &Path, shards: &[ShardReport]) -> Result<u64> {
        let index_path = &self.layout.index_path;
        let index = if index_path.exists() {
            HashIndex::open(index_path, self.config.table_size)
        } else {
            HashIndex::create(index_path, self.config.table_size)
        };
        let mut index = index.map_err(|e| abort(format!("index {:?}: {}", index_path, e)))?;

        let store_path = &self.layout.store_path;
        let mut store = RecordStore::open(store_path)
            .map_err(|e| abort(format!("store {:?}: {}", store_path, e)))?;

        let shard_paths = shards
            .iter()
            .map(|s| StorageLayout::shard_path(work_dir, s.rank))
            .collect();
        ShardMerger::new(shard_paths).merge_into(&mut store)?;

        let linked = rebuild_index(&mut store, &mut index)?;
        store.sync()?;
        Ok(linked)
    }
}

fn run_worker(
    rank: usize,
    workers: usize,
    files: &[PathBuf],
    shard: &Path,
    threads: usize,
) -> Result<ShardReport> {
    let parser = ParallelParser::new(threads)?;
    let file = File::create(shard)
        .map_err(|e| abort(format!("cannot create shard {:?}: {}", shard, e)))?;
    let mut out = BufWriter::new(file);

    let mut report = ShardReport { rank, ..Default::default() };
    for path in files.iter().skip(rank).step_by(workers) {
        let lines = match read_lines(path) {
            Ok(lines) => lines,
            Err(e) => {
                warn!(rank, file = %path.display(), "skipping unreadable input: {}", e);
                report.files_skipped += 1;
                continue;
            }
        };

        let batch = parser.parse_batch(&lines);
        for record in &batch.records {
            out.write_all(&codec::encode(record)?)?;
        }

        if batch.malformed > 0 {
            warn!(rank, file = %path.display(), malformed = batch.malformed, "malformed lines skipped");
        }
        debug!(rank, file = %path.display(), records = batch.records.len(), "input parsed");
        report.files += 1;
        report.records += batch.records.len() as u64;
        report.malformed_lines += batch.malformed;
    }

    out.flush()?;
    info!(rank, lines = parser.get_progress(), records = report.records, "shard written");
    Ok(report)
}

fn abort(context: String) -> Error {
    Error::new(ErrorKind::DistributedAbort, context)
}
