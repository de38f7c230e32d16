//! Engine configuration: the effective option set for one run.

use std::path::PathBuf;

/// Configuration for an exploration run.
///
/// This is the complete option set; in distributed mode the whole
/// thing crosses the wire with every migrated input so a peer agent
/// can reproduce the run environment.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Target program and its arguments.
    pub prog_and_args: Vec<String>,
    /// Input files for file targets (absolute paths).  Empty in
    /// network modes.
    pub files: Vec<String>,
    /// Treat TCP reads as tainted input.
    pub sockets: bool,
    /// Treat UDP reads as tainted input.
    pub datagrams: bool,
    /// Target endpoint for TCP mode.
    pub host: String,
    pub port: u16,
    /// Branch-collection depth per tracer run; 0 means unlimited.
    pub depth: u32,
    /// Start depth of the root input.
    pub start_depth: u32,
    /// Checker timeout in seconds.
    pub alarm: u32,
    /// Tracer timeout in seconds; 0 suppresses the watchdog.
    pub tracegrind_alarm: u32,
    /// Solver worker threads; 0 runs purely sequential.
    pub solver_threads: u32,
    pub solver_threads_auto: bool,
    /// Use the memory checker instead of the coverage tool.
    pub memcheck: bool,
    /// Also report leaked memory (memcheck only).
    pub leaks: bool,
    pub trace_children: bool,
    /// Emit and process memory-safety queries first.
    pub check_danger: bool,
    /// One tracer run dumping the tainted-call list, then stop.
    pub dump_calls: bool,
    pub suppress_subcalls: bool,
    pub debug: bool,
    pub verbose: bool,
    /// Functions for separate-function analysis (repeatable).
    pub func_names: Vec<String>,
    pub func_filter_file: Option<String>,
    /// Input mask file.
    pub mask_file: Option<String>,
    /// Distribution server.
    pub distributed: bool,
    pub dist_host: String,
    pub dist_port: u16,
    /// Keep `5 × agents` inputs local before migrating any.
    pub protect_main_agent: bool,
    /// Run as a remote agent (seed requests go to the parent process).
    pub agent: bool,
    /// Stop after this many iterations; 0 means run until the
    /// frontier is exhausted.
    pub max_iterations: u32,
    /// Prefix for dumped artefacts (exploits, stack traces, ...).
    pub prefix: String,
    /// Write the final report to this file instead of the log.
    pub report_log: Option<String>,
    /// Valgrind binary hosting the tracer/checker tools.
    pub valgrind: String,
    /// External solver binary.
    pub solver: String,
    /// Directory for run artefacts (trace logs, query files, ...).
    pub workdir: PathBuf,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            prog_and_args: Vec::new(),
            files: Vec::new(),
            sockets: false,
            datagrams: false,
            host: String::new(),
            port: 0,
            depth: 100,
            start_depth: 1,
            alarm: 300,
            tracegrind_alarm: 0,
            solver_threads: 0,
            solver_threads_auto: false,
            memcheck: false,
            leaks: false,
            trace_children: false,
            check_danger: false,
            dump_calls: false,
            suppress_subcalls: false,
            debug: false,
            verbose: false,
            func_names: Vec::new(),
            func_filter_file: None,
            mask_file: None,
            distributed: false,
            dist_host: "127.0.0.1".to_string(),
            dist_port: 12200,
            protect_main_agent: false,
            agent: false,
            max_iterations: 0,
            prefix: String::new(),
            report_log: None,
            valgrind: "valgrind".to_string(),
            solver: "stp".to_string(),
            workdir: PathBuf::from("."),
        }
    }
}

impl EngineConfig {
    /// Whether input arrives over the network rather than from files.
    pub fn using_network(&self) -> bool {
        self.sockets || self.datagrams
    }

    /// Name of the checker valgrind tool.
    pub fn checker_tool(&self) -> &'static str {
        if self.memcheck {
            "memcheck"
        } else {
            "covgrind"
        }
    }
}
