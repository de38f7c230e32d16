//! The main exploration loop.
//!
//! One iteration: pop the most promising input, materialise it, run
//! the tracer to collect the path condition, split the trace into
//! per-branch solver queries, synthesise a child input from every
//! satisfiable inversion, score each child by fresh basic-block
//! coverage under the checker, and push the children back onto the
//! frontier.  Surplus inputs migrate to the distribution server
//! between iterations.
//!
//! A single failing child process never aborts the loop; only SIGINT
//! (and an unusable configuration) ends the run.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use log::{debug, error, info, warn};
use thiserror::Error;

use crate::buffer::{BufferError, FileBuffer};
use crate::config::EngineConfig;
use crate::coordinator::Coordinator;
use crate::coverage::{read_block_log, CoverageSet};
use crate::crash::{parse_memcheck_log, CrashReport};
use crate::exec::{run_child, RunStatus};
use crate::frontier::{Frontier, FrontierKey};
use crate::input::{derive_child, Input, InputId, InputStore};
use crate::monitor::Monitor;
use crate::pool::WorkerPool;
use crate::report::{CrashGroupSummary, RunReport};
use crate::seed::SeedSource;
use crate::tools::{checker_argv, name_modifier, solver_argv, tracer_argv};

/// Errors that abort the run.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("configuration error: {0}")]
    Config(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Buffer(#[from] BufferError),
    #[error(transparent)]
    Coordinator(#[from] crate::coordinator::CoordinatorError),
}

/// Input arena plus frontier, guarded by one lock: every insertion —
/// main thread or solver worker — goes through it.
pub struct SearchState {
    pub store: InputStore,
    pub frontier: Frontier,
}

impl SearchState {
    pub fn new() -> Self {
        Self {
            store: InputStore::new(),
            frontier: Frontier::new(),
        }
    }
}

impl Default for SearchState {
    fn default() -> Self {
        Self::new()
    }
}

/// Everything a solver-query job needs, shared with worker threads.
struct QueryCtx {
    cfg: Arc<EngineConfig>,
    coverage: Arc<CoverageSet>,
    crashes: Arc<Mutex<CrashReport>>,
    search: Arc<Mutex<SearchState>>,
    monitor: Arc<Monitor>,
    /// Zero solver threads: commit coverage immediately so later
    /// queries of the same iteration see earlier queries' blocks.
    sequential: bool,
}

/// One per-branch solver job.
struct QueryJob {
    parent_id: InputId,
    parent: Arc<Input>,
    actual: Arc<Vec<bool>>,
    /// Frontier depth of the popped input (the key's depth, not its
    /// start depth).
    first_depth: u32,
    index: u32,
    danger: bool,
}

enum IterationOutcome {
    Continue,
    Stop,
}

#[derive(Debug, PartialEq, Eq)]
enum DivergenceAction {
    NotDiverged,
    Noted,
    Pruned,
}

/// The exploration engine.
pub struct Engine {
    ctx: Arc<QueryCtx>,
    pool: Option<WorkerPool>,
    coordinator: Option<Coordinator>,
    seed: Box<dyn SeedSource>,
    agent_mode: bool,
    initial: Option<InputId>,
    runs: u32,
    started: Instant,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine").finish_non_exhaustive()
    }
}

impl Engine {
    /// Validate the configuration, install signal handling, connect
    /// to the distribution server, and spawn the solver pool.
    pub fn new(cfg: EngineConfig, seed: Box<dyn SeedSource>) -> Result<Self, EngineError> {
        if cfg.prog_and_args.is_empty() {
            return Err(EngineError::Config("no target program given".into()));
        }
        if !cfg.using_network() && cfg.files.is_empty() {
            return Err(EngineError::Config(
                "file targets need at least one input file".into(),
            ));
        }
        if cfg.sockets && cfg.datagrams {
            return Err(EngineError::Config(
                "sockets and datagrams are mutually exclusive".into(),
            ));
        }
        std::fs::create_dir_all(&cfg.workdir)?;

        let monitor = Monitor::new(cfg.solver_threads as usize);
        monitor.install_signal_handlers()?;

        let coordinator = if cfg.distributed {
            Some(Coordinator::connect(&cfg.dist_host, cfg.dist_port)?)
        } else {
            None
        };
        let pool = (cfg.solver_threads > 0).then(|| WorkerPool::new(cfg.solver_threads as usize));
        let sequential = pool.is_none();
        let agent_mode = cfg.agent;

        Ok(Self {
            ctx: Arc::new(QueryCtx {
                cfg: Arc::new(cfg),
                coverage: Arc::new(CoverageSet::new()),
                crashes: Arc::new(Mutex::new(CrashReport::new())),
                search: Arc::new(Mutex::new(SearchState::new())),
                monitor,
                sequential,
            }),
            pool,
            coordinator,
            seed,
            agent_mode,
            initial: None,
            runs: 0,
            started: Instant::now(),
        })
    }

    /// Run the exploration to completion (frontier exhausted,
    /// iteration limit reached, or interrupt).
    pub fn run(&mut self) -> Result<RunReport, EngineError> {
        let cfg = Arc::clone(&self.ctx.cfg);
        info!("starting exploration of {:?}", cfg.prog_and_args);

        let initial = if cfg.using_network() {
            let mut input = Input::root(Vec::new(), cfg.start_depth);
            if cfg.agent {
                // A freshly dispatched agent finds its seed input in
                // the replace sidecar left by the parent.
                let path = cfg.workdir.join("replace_data");
                if let Ok(chunks) = read_replace_data(&path) {
                    refresh_blobs(&mut input, &chunks);
                }
            }
            input
        } else {
            let blobs = cfg
                .files
                .iter()
                .map(FileBuffer::load)
                .collect::<Result<Vec<_>, _>>()?;
            Input::root(blobs, cfg.start_depth)
        };

        let score = self.ctx.check_and_score(&initial, false, 0);
        self.ctx.coverage.merge_delta();
        info!("initial input score={score}");

        let initial_id = {
            let mut search = self.ctx.search.lock().unwrap();
            let id = search.store.insert(initial);
            search.frontier.insert(FrontierKey { score, depth: 0 }, id);
            id
        };
        self.initial = Some(initial_id);

        loop {
            if self.ctx.monitor.interrupted() {
                info!("interrupt received, shutting down");
                break;
            }
            if cfg.max_iterations > 0 && self.runs >= cfg.max_iterations {
                info!("iteration limit reached");
                break;
            }
            let Some((key, fi_id, fresh_depth)) = self.select_input()? else {
                info!("frontier exhausted");
                break;
            };
            match self.iterate(key, fi_id, fresh_depth)? {
                IterationOutcome::Continue => {}
                IterationOutcome::Stop => break,
            }
        }

        Ok(self.finish())
    }

    /// Pick the next input.  A zero-score best entry makes an agent
    /// ask its parent for a fresh start depth first: a positive reply
    /// is used for this iteration and the entry stays enqueued; an
    /// empty reply permanently downgrades agent mode.
    fn select_input(&mut self) -> Result<Option<(FrontierKey, InputId, Option<u32>)>, EngineError> {
        let popped = {
            let mut search = self.ctx.search.lock().unwrap();
            search.frontier.pop_best()
        };
        let Some((key, id)) = popped else {
            return Ok(None);
        };
        info!("selected next input with score {}", key.score);

        if key.score == 0 && self.agent_mode {
            info!("all inputs have zero score: requesting new input");
            match self.seed.request_seed() {
                Ok(Some(depth)) => {
                    // Keep the entry; this iteration runs from the
                    // fresh depth instead.
                    let mut search = self.ctx.search.lock().unwrap();
                    search.frontier.insert(key, id);
                    return Ok(Some((key, id, Some(depth))));
                }
                Ok(None) => {
                    info!("no seed available, continuing standalone");
                    self.agent_mode = false;
                }
                Err(e) => {
                    warn!("seed request failed: {e}");
                    self.agent_mode = false;
                }
            }
        }
        Ok(Some((key, id, None)))
    }

    /// One iteration over the popped input.
    fn iterate(
        &mut self,
        key: FrontierKey,
        fi_id: InputId,
        fresh_depth: Option<u32>,
    ) -> Result<IterationOutcome, EngineError> {
        let cfg = Arc::clone(&self.ctx.cfg);
        info!("starting iteration {}", self.runs);
        self.ctx.coverage.clear_delta();

        let check_prediction = self.runs > 0 && fresh_depth.is_none();
        let fi = {
            let search = self.ctx.search.lock().unwrap();
            search.store.get(fi_id).clone()
        };
        if let Err(e) = self.ctx.materialize(&fi, "", check_prediction) {
            error!("failed to materialise input: {e}");
            self.runs += 1;
            return Ok(IterationOutcome::Continue);
        }

        let start_depth = fresh_depth.unwrap_or(fi.start_depth);
        let argv = tracer_argv(&cfg, start_depth, check_prediction);
        let timeout =
            (cfg.tracegrind_alarm > 0).then(|| Duration::from_secs(cfg.tracegrind_alarm.into()));
        match run_child(&self.ctx.monitor, &argv, &cfg.workdir, timeout, 0) {
            Ok((RunStatus::TimedOut, _)) => {
                info!("tracer timed out, processing the partial trace")
            }
            Ok((RunStatus::Crashed(sig), _)) => info!("failure in tracer (signal {sig})"),
            Ok((RunStatus::Exited(code), _)) if code != 0 => {
                info!("failure in tracer (exit code {code})")
            }
            Ok(_) => {}
            Err(e) => error!("failed to launch tracer: {e}"),
        }

        // The tracer may have captured more network traffic than the
        // input carried; fold it back in before deriving children.
        if cfg.using_network() {
            self.refresh_input(fi_id);
        }

        if check_prediction {
            match self.check_divergence(fi_id, key.score)? {
                DivergenceAction::Pruned => {
                    self.runs += 1;
                    return Ok(IterationOutcome::Continue);
                }
                DivergenceAction::Noted | DivergenceAction::NotDiverged => {}
            }
        }

        if cfg.dump_calls {
            info!("tainted-call dump written to calldump.log");
            return Ok(IterationOutcome::Stop);
        }

        let fi = {
            let search = self.ctx.search.lock().unwrap();
            Arc::new(search.store.get(fi_id).clone())
        };
        let actual = Arc::new(read_branch_vector(
            &cfg.workdir.join("actual.log"),
            cfg.depth,
            fi.start_depth,
        ));

        let depth = if self.pool.is_some() {
            if cfg.check_danger {
                self.process_trace_pooled(fi_id, &fi, &actual, key.depth, true)?;
            }
            self.process_trace_pooled(fi_id, &fi, &actual, key.depth, false)?
        } else {
            if cfg.check_danger {
                self.process_trace_sequential(fi_id, &fi, &actual, key.depth, true)?;
            }
            self.process_trace_sequential(fi_id, &fi, &actual, key.depth, false)?
        };
        if depth == 0 {
            info!("no solver queries found");
        }

        self.runs += 1;
        self.ctx.coverage.merge_delta();
        self.talk_to_server();
        Ok(IterationOutcome::Continue)
    }

    /// Split the trace and solve each query on the main thread.
    fn process_trace_sequential(
        &self,
        parent_id: InputId,
        parent: &Arc<Input>,
        actual: &Arc<Vec<bool>>,
        first_depth: u32,
        danger: bool,
    ) -> Result<usize, EngineError> {
        let cfg = &self.ctx.cfg;
        let (trace_name, query_name) = trace_file_names(danger);
        let Ok(mut trace) = FileBuffer::load(cfg.workdir.join(trace_name)) else {
            return Ok(0);
        };
        let query_path = cfg.workdir.join(format!("{query_name}.log"));
        let mut count = 0u32;
        while trace.cut_query_and_dump(&query_path, true)? {
            let job = QueryJob {
                parent_id,
                parent: Arc::clone(parent),
                actual: Arc::clone(actual),
                first_depth,
                index: count,
                danger,
            };
            self.ctx.process_query(&job, 0);
            count += 1;
        }
        Ok(count as usize)
    }

    /// Split the trace and fan the queries out over the pool.  The
    /// query file for a worker is written by this thread while the
    /// worker is still free, so no worker ever reads a file being
    /// rewritten.
    fn process_trace_pooled(
        &self,
        parent_id: InputId,
        parent: &Arc<Input>,
        actual: &Arc<Vec<bool>>,
        first_depth: u32,
        danger: bool,
    ) -> Result<usize, EngineError> {
        let cfg = &self.ctx.cfg;
        let pool = self.pool.as_ref().expect("pooled processing without pool");
        let (trace_name, query_name) = trace_file_names(danger);
        let Ok(mut trace) = FileBuffer::load(cfg.workdir.join(trace_name)) else {
            return Ok(0);
        };
        let mut count = 0u32;
        loop {
            let worker = pool.acquire_free();
            let query_path = cfg.workdir.join(format!("{query_name}_{}.log", worker + 1));
            if !trace.cut_query_and_dump(&query_path, true)? {
                break;
            }
            let ctx = Arc::clone(&self.ctx);
            let job = QueryJob {
                parent_id,
                parent: Arc::clone(parent),
                actual: Arc::clone(actual),
                first_depth,
                index: count,
                danger,
            };
            pool.submit(worker, move |thread| ctx.process_query(&job, thread));
            count += 1;
        }
        pool.wait_all();
        Ok(count as usize)
    }

    /// Fold tracer-captured network bytes back into the input.
    fn refresh_input(&self, id: InputId) {
        let path = self.ctx.cfg.workdir.join("replace_data");
        match read_replace_data(&path) {
            Ok(chunks) => {
                let mut search = self.ctx.search.lock().unwrap();
                refresh_blobs(search.store.get_mut(id), &chunks);
            }
            Err(e) => warn!("could not re-read {}: {e}", path.display()),
        }
    }

    /// Handle a recorded divergence: dump the parent input that the
    /// prediction came from, and prune the subtree when the popped
    /// score was zero.
    fn check_divergence(
        &mut self,
        fi_id: InputId,
        score: u32,
    ) -> Result<DivergenceAction, EngineError> {
        let cfg = Arc::clone(&self.ctx.cfg);
        let path = cfg.workdir.join("divergence.log");
        let Ok(raw) = std::fs::read(&path) else {
            return Ok(DivergenceAction::NotDiverged);
        };
        // One stale divergence record must not outlive its iteration.
        let _ = std::fs::remove_file(&path);
        if raw.first().copied().unwrap_or(0) == 0 {
            return Ok(DivergenceAction::NotDiverged);
        }
        if let Some(bytes) = raw.get(1..5) {
            let depth = i32::from_ne_bytes(bytes.try_into().unwrap());
            debug!("divergence at depth {depth}");
        }

        let parent = {
            let search = self.ctx.search.lock().unwrap();
            search
                .store
                .get(fi_id)
                .parent
                .map(|p| search.store.get(p).clone())
        };
        {
            let mut crashes = self.ctx.crashes.lock().unwrap();
            let n = crashes.divergences;
            if let Some(parent) = parent {
                if cfg.using_network() {
                    let out = self.ctx.output_path(&format!("divergence_{n}"));
                    info!("dumping divergent input to {}", out.display());
                    if let Err(e) = write_replace_data(&out, &parent.blobs) {
                        warn!("could not dump divergent input: {e}");
                    }
                } else {
                    for (i, blob) in parent.blobs.iter().enumerate() {
                        let out = self.ctx.output_path(&format!("divergence_{n}_{i}"));
                        info!("dumping divergent input to {}", out.display());
                        if let Err(e) = blob.dump(&out) {
                            warn!("could not dump divergent input: {e}");
                        }
                    }
                }
            } else {
                warn!("divergence recorded on the root input, nothing to dump");
            }
            crashes.divergences += 1;
        }

        if score == 0 {
            self.talk_to_server();
            return Ok(DivergenceAction::Pruned);
        }
        Ok(DivergenceAction::Noted)
    }

    /// Post-iteration server dialogue; any failure downgrades to
    /// local-only mode.
    fn talk_to_server(&mut self) {
        let Some(coordinator) = self.coordinator.as_mut() else {
            return;
        };
        if let Err(e) = coordinator.talk(&self.ctx.search, &self.ctx.cfg) {
            warn!("connection with server lost: {e}");
            info!("continuing work in local mode");
            self.coordinator = None;
        }
    }

    /// Final dump and report assembly.
    fn finish(&mut self) -> RunReport {
        let cfg = Arc::clone(&self.ctx.cfg);
        if self.ctx.monitor.interrupted() {
            self.ctx.monitor.kill_all_children();
            if let Some(pool) = &self.pool {
                pool.wait_all();
            }
        }
        // Restore the original input files (iterations overwrite them
        // with whatever was materialised last).
        if let Some(initial_id) = self.initial {
            if !cfg.using_network() {
                let search = self.ctx.search.lock().unwrap();
                for blob in &search.store.get(initial_id).blobs {
                    if let Err(e) = blob.dump(blob.name()) {
                        warn!("could not restore {}: {e}", blob.name());
                    }
                }
            }
        }
        if let Some(coordinator) = self.coordinator.take() {
            coordinator.finish();
        }

        let crashes = self.ctx.crashes.lock().unwrap();
        let crash_groups = crashes
            .groups()
            .iter()
            .enumerate()
            .map(|(i, group)| CrashGroupSummary {
                stack_trace_file: group
                    .trace
                    .as_ref()
                    .map(|_| format!("{}stacktrace_{i}.log", cfg.prefix)),
                occurrences: group.occurrences.clone(),
            })
            .collect();
        RunReport {
            iterations: self.runs,
            exploits: crashes.exploits,
            memchecks: crashes.memchecks,
            divergences: crashes.divergences,
            coverage_blocks: self.ctx.coverage.global_len(),
            frontier_size: self.ctx.search.lock().unwrap().frontier.len(),
            elapsed_secs: self.started.elapsed().as_secs(),
            crash_groups,
        }
    }
}

impl QueryCtx {
    /// Artefact path under the configured prefix.
    fn output_path(&self, name: &str) -> PathBuf {
        self.cfg.workdir.join(format!("{}{name}", self.cfg.prefix))
    }

    /// Write the input where the target will read it: the configured
    /// file paths (with a per-thread suffix) for file targets, the
    /// replace sidecar for network targets.
    fn materialize(
        &self,
        input: &Input,
        modifier: &str,
        predict: bool,
    ) -> Result<(), EngineError> {
        if self.cfg.using_network() {
            let path = self.cfg.workdir.join(format!("replace_data{modifier}"));
            write_replace_data(&path, &input.blobs)?;
        } else {
            for blob in &input.blobs {
                blob.dump(format!("{}{modifier}", blob.name()))?;
            }
        }
        if predict {
            let bytes: Vec<u8> = input.prediction.iter().map(|&b| b as u8).collect();
            std::fs::write(self.cfg.workdir.join("prediction.log"), bytes)?;
        }
        Ok(())
    }

    /// Solve one query and, if a model comes back, derive, check,
    /// score and enqueue the child input.
    fn process_query(&self, job: &QueryJob, thread: usize) {
        let modifier = name_modifier(thread);
        let (_, query_name) = trace_file_names(job.danger);
        let query_file = format!("{query_name}{modifier}.log");

        let argv = solver_argv(&self.cfg, &query_file);
        let (status, artifacts) =
            match run_child(&self.monitor, &argv, &self.cfg.workdir, None, thread) {
                Ok(result) => result,
                Err(e) => {
                    error!("failed to launch the solver: {e}");
                    return;
                }
            };
        if !status.success() {
            if status != RunStatus::TimedOut {
                error!("solver failed on {query_file}: {status:?}");
                if let Ok(query) = std::fs::read_to_string(self.cfg.workdir.join(&query_file)) {
                    debug!("{query_file}:\n{query}");
                }
            }
            return;
        }
        let model = match artifacts.stdout_text() {
            Ok(model) => model,
            Err(e) => {
                error!("could not read solver output: {e}");
                return;
            }
        };
        debug!("thread {thread}: solver model:\n{model}");

        let Some(child) = derive_child(job.parent_id, &job.parent, &model, job.index, &job.actual)
        else {
            return;
        };

        let score = self.check_and_score(&child, job.danger, thread);
        if job.danger {
            return;
        }
        let key = FrontierKey {
            score,
            depth: job.first_depth + job.index + 1,
        };
        let mut search = self.search.lock().unwrap();
        let id = search.store.insert(child);
        search.frontier.insert(key, id);
        info!("thread {thread}: score={score}");
    }

    /// Run the checker over an input and score it.  Crashes and
    /// memory errors are triaged here; a failing checker run scores
    /// zero and the loop goes on.
    fn check_and_score(&self, input: &Input, no_coverage: bool, thread: usize) -> u32 {
        let modifier = name_modifier(thread);
        if let Err(e) = self.materialize(input, &modifier, false) {
            error!("failed to materialise input for the checker: {e}");
            return 0;
        }
        let argv = checker_argv(&self.cfg, &modifier, no_coverage);
        // File-mode checker runs time out through the checker's own
        // --alarm; network runs need the watchdog.
        let timeout = (self.cfg.using_network() && self.cfg.alarm > 0)
            .then(|| Duration::from_secs(self.cfg.alarm.into()));
        let status = match run_child(&self.monitor, &argv, &self.cfg.workdir, timeout, thread) {
            Ok((status, _)) => status,
            Err(e) => {
                error!("failed to launch the checker: {e}");
                return 0;
            }
        };

        match status {
            RunStatus::Crashed(signal) => self.handle_crash(input, &modifier, signal),
            status => {
                if self.cfg.memcheck && !no_coverage {
                    self.check_memcheck(input, &modifier, status == RunStatus::TimedOut);
                }
            }
        }

        if no_coverage {
            return 0;
        }
        let block_log = self.cfg.workdir.join(format!("basic_blocks{modifier}.log"));
        match read_block_log(&block_log) {
            Ok(blocks) => self.coverage.score_blocks(&blocks, self.sequential),
            Err(e) => {
                error!("error opening {}: {e}", block_log.display());
                0
            }
        }
    }

    /// Triage a checker crash: fingerprint, deduplicate, dump.
    fn handle_crash(&self, input: &Input, modifier: &str, signal: i32) {
        let exec_log = self.cfg.workdir.join(format!("execution{modifier}.log"));
        let mut output = FileBuffer::load(&exec_log)
            .unwrap_or_else(|_| FileBuffer::new("execution.log", Vec::new()));
        let info_available = output.filter_checker_output();
        let file_count = (!self.cfg.using_network()).then(|| input.blobs.len() as u32);

        let mut crashes = self.crashes.lock().unwrap();
        let n = crashes.exploits;
        let trace = info_available.then(|| output.data().to_vec());
        let (group, is_new) = crashes.record_crash(trace.as_deref(), n, file_count);

        warn!("crash detected (signal {signal})");
        if info_available {
            let trace_path = self.output_path(&format!("stacktrace_{group}.log"));
            if is_new {
                info!("dumping stack trace to {}", trace_path.display());
                if let Err(e) = output.dump(&trace_path) {
                    warn!("could not dump stack trace: {e}");
                }
            } else {
                info!(
                    "bug was detected previously, stack trace is in {}",
                    trace_path.display()
                );
            }
        } else {
            info!("no stack trace available");
        }

        if self.cfg.using_network() {
            let out = self.output_path(&format!("exploit_{n}"));
            info!("dumping an exploit to {}", out.display());
            if let Err(e) = write_replace_data(&out, &input.blobs) {
                warn!("could not dump exploit: {e}");
            }
        } else {
            for (i, blob) in input.blobs.iter().enumerate() {
                let out = self.output_path(&format!("exploit_{n}_{i}"));
                info!("dumping an exploit to {}", out.display());
                if let Err(e) = blob.dump(&out) {
                    warn!("could not dump exploit: {e}");
                }
            }
        }
        crashes.exploits += 1;
    }

    /// Scan a memory-checker log for errors and leaks; dump the
    /// offending input on a finding.
    fn check_memcheck(&self, input: &Input, modifier: &str, timed_out: bool) {
        let exec_log = self.cfg.workdir.join(format!("execution{modifier}.log"));
        let Ok(text) = std::fs::read_to_string(&exec_log) else {
            return;
        };
        let findings = parse_memcheck_log(&text, self.cfg.leaks);
        if !findings.is_finding(timed_out) {
            return;
        }

        let mut crashes = self.crashes.lock().unwrap();
        let n = crashes.memchecks;
        warn!("memory error detected");
        if self.cfg.using_network() {
            let out = self.output_path(&format!("memcheck_{n}"));
            info!("dumping input for memcheck error to {}", out.display());
            if let Err(e) = write_replace_data(&out, &input.blobs) {
                warn!("could not dump memcheck input: {e}");
            }
        } else {
            for (i, blob) in input.blobs.iter().enumerate() {
                let out = self.output_path(&format!("memcheck_{n}_{i}"));
                info!("dumping input for memcheck error to {}", out.display());
                if let Err(e) = blob.dump(&out) {
                    warn!("could not dump memcheck input: {e}");
                }
            }
        }
        crashes.memchecks += 1;
    }
}

fn trace_file_names(danger: bool) -> (&'static str, &'static str) {
    if danger {
        ("dangertrace.log", "curdtrace")
    } else {
        ("trace.log", "curtrace")
    }
}

/// Read the observed branch vector.  With an unlimited invert depth
/// the tracer prefixes the vector with its i32 length; otherwise the
/// length is `start_depth - 1 + depth`.  A short file yields a short
/// vector (the affected queries are dropped later).
fn read_branch_vector(path: &Path, configured_depth: u32, start_depth: u32) -> Vec<bool> {
    let Ok(raw) = std::fs::read(path) else {
        warn!("no branch vector at {}", path.display());
        return Vec::new();
    };
    if configured_depth == 0 {
        if raw.len() < 4 {
            return Vec::new();
        }
        let len = i32::from_ne_bytes(raw[0..4].try_into().unwrap()).max(0) as usize;
        raw[4..].iter().take(len).map(|&b| b != 0).collect()
    } else {
        let len = (start_depth.saturating_sub(1) + configured_depth) as usize;
        raw.iter().take(len).map(|&b| b != 0).collect()
    }
}

/// Write the network-replace sidecar: i32 chunk count, then per chunk
/// an i32 size and the bytes.
fn write_replace_data(path: &Path, blobs: &[FileBuffer]) -> std::io::Result<()> {
    let mut out = Vec::new();
    out.extend((blobs.len() as i32).to_ne_bytes());
    for blob in blobs {
        out.extend((blob.len() as i32).to_ne_bytes());
        out.extend_from_slice(blob.data());
    }
    std::fs::write(path, out)
}

/// Read the replace sidecar back.  Truncated trailing chunks are
/// dropped.
fn read_replace_data(path: &Path) -> std::io::Result<Vec<Vec<u8>>> {
    let raw = std::fs::read(path)?;
    let mut chunks = Vec::new();
    let mut at = 0usize;
    let count = match raw.get(0..4) {
        Some(bytes) => i32::from_ne_bytes(bytes.try_into().unwrap()).max(0) as usize,
        None => return Ok(chunks),
    };
    at += 4;
    for _ in 0..count {
        let Some(bytes) = raw.get(at..at + 4) else {
            break;
        };
        let size = i32::from_ne_bytes(bytes.try_into().unwrap()).max(0) as usize;
        at += 4;
        let Some(data) = raw.get(at..at + size) else {
            break;
        };
        chunks.push(data.to_vec());
        at += size;
    }
    Ok(chunks)
}

/// Grow and overwrite an input's blobs from captured network chunks.
fn refresh_blobs(input: &mut Input, chunks: &[Vec<u8>]) {
    for (i, chunk) in chunks.iter().enumerate() {
        if i >= input.blobs.len() {
            input.blobs.push(FileBuffer::socket(i, chunk.len()));
        }
        input.blobs[i].overwrite(chunk);
    }
}
