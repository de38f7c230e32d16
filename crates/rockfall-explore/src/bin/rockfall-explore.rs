//! CLI for the rockfall exploration engine.
//!
//! ```bash
//! # Explore a file-reading target
//! rockfall-explore --filename seed.bin -- ./target seed.bin
//!
//! # Memory-error hunting with four solver threads
//! rockfall-explore --filename seed.bin --use-memcheck --leaks \
//!     --stp-threads 4 -- ./target seed.bin
//!
//! # TCP server target
//! rockfall-explore --sockets --host 127.0.0.1 --port 8080 -- ./server
//! ```

use std::path::PathBuf;

use clap::Parser;
use log::error;

use rockfall_explore::engine::Engine;
use rockfall_explore::report::format_report;
use rockfall_explore::seed::{QueueSeedSource, SeedSource, SignalSeedSource};
use rockfall_explore::EngineConfig;

#[derive(Parser)]
#[command(name = "rockfall-explore")]
#[command(about = "Concolic exploration driver: invert branches with a solver, score by coverage")]
#[command(version)]
struct Cli {
    /// Input file for the target (repeatable).
    #[arg(long = "filename", value_name = "FILE")]
    filenames: Vec<PathBuf>,

    /// Mark data read from TCP sockets as tainted.
    #[arg(long)]
    sockets: bool,

    /// Mark data read from UDP sockets as tainted.
    #[arg(long)]
    datagrams: bool,

    /// IP address of the target connection (TCP mode).
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Port of the target connection (TCP mode).
    #[arg(long, default_value = "0")]
    port: u16,

    /// Conditions collected per tracer run; 0 collects everything.
    #[arg(long, default_value = "100")]
    depth: u32,

    /// Start depth of the initial input.
    #[arg(long, default_value = "1")]
    startdepth: u32,

    /// Checker timeout in seconds.
    #[arg(long, default_value = "300")]
    alarm: u32,

    /// Tracer timeout in seconds; 0 disables it.
    #[arg(long, default_value = "0")]
    tracegrind_alarm: u32,

    /// Solver queries handled simultaneously ("auto" = CPU count).
    #[arg(long = "stp-threads", value_name = "N|auto")]
    stp_threads: Option<String>,

    /// Use the memory checker instead of the coverage tool.
    #[arg(long = "use-memcheck")]
    use_memcheck: bool,

    /// Check for memory leaks (with --use-memcheck).
    #[arg(long)]
    leaks: bool,

    /// Run the valgrind tools with --trace-children=yes.
    #[arg(long = "trace-children")]
    trace_children: bool,

    /// Emit constraints for dangerous memory operations.
    #[arg(long = "check-danger")]
    check_danger: bool,

    /// Dump the tainted-call list to calldump.log and stop.
    #[arg(long = "dump-calls")]
    dump_calls: bool,

    /// Function for separate analysis (repeatable).
    #[arg(long = "func-name", value_name = "NAME")]
    func_names: Vec<String>,

    /// File listing functions for separate analysis.
    #[arg(long = "func-filter-file", value_name = "FILE")]
    func_filter_file: Option<String>,

    /// Input mask file.
    #[arg(long, value_name = "FILE")]
    mask: Option<String>,

    /// Ignore conditions in nested calls during separate analysis.
    #[arg(long = "suppress-subcalls")]
    suppress_subcalls: bool,

    /// Connect to a distribution server.
    #[arg(long)]
    distributed: bool,

    /// Distribution server address.
    #[arg(long = "dist-host", default_value = "127.0.0.1")]
    dist_host: String,

    /// Distribution server port.
    #[arg(long = "dist-port", default_value = "12200")]
    dist_port: u16,

    /// Never migrate below 5 × agents local inputs.
    #[arg(long = "protect-main-agent")]
    protect_main_agent: bool,

    /// Run as a remote agent (seed requests go to the parent).
    #[arg(long)]
    agent: bool,

    /// Stop after this many iterations (0 = until exhaustion).
    #[arg(long = "max-iterations", default_value = "0")]
    max_iterations: u32,

    /// Prefix for dumped artefacts.
    #[arg(long, default_value = "")]
    prefix: String,

    /// Write the final report to a file.
    #[arg(long = "report-log", value_name = "FILE")]
    report_log: Option<PathBuf>,

    /// Write a JSON run summary to a file.
    #[arg(long = "json-summary", value_name = "FILE")]
    json_summary: Option<PathBuf>,

    /// Directory for run artefacts.
    #[arg(long, default_value = ".")]
    workdir: PathBuf,

    /// Valgrind binary hosting the tracer/checker tools.
    #[arg(long, default_value = "valgrind")]
    valgrind: String,

    /// External solver binary.
    #[arg(long, default_value = "stp")]
    solver: String,

    /// Save divergent inputs and other debugging artefacts.
    #[arg(long)]
    debug: bool,

    /// More detailed output.
    #[arg(long)]
    verbose: bool,

    /// Target program and its arguments.
    #[arg(last = true, required = true)]
    prog_and_args: Vec<String>,
}

fn main() {
    let cli = Cli::parse();
    env_logger::Builder::new()
        .filter_level(if cli.verbose {
            log::LevelFilter::Debug
        } else {
            log::LevelFilter::Info
        })
        .parse_default_env()
        .init();

    let (solver_threads, solver_threads_auto) = match cli.stp_threads.as_deref() {
        None => (0, false),
        Some("auto") => {
            let n = std::thread::available_parallelism()
                .map(|n| n.get() as u32)
                .unwrap_or(1);
            (n, true)
        }
        Some(n) => match n.parse() {
            Ok(n) => (n, false),
            Err(_) => {
                eprintln!("error: --stp-threads takes a number or \"auto\"");
                std::process::exit(1);
            }
        },
    };

    let mut files = Vec::new();
    for path in &cli.filenames {
        match path.canonicalize() {
            Ok(path) => files.push(path.to_string_lossy().into_owned()),
            Err(e) => {
                eprintln!("error: input file {} not usable: {e}", path.display());
                std::process::exit(1);
            }
        }
    }

    let config = EngineConfig {
        prog_and_args: cli.prog_and_args,
        files,
        sockets: cli.sockets,
        datagrams: cli.datagrams,
        host: cli.host,
        port: cli.port,
        depth: cli.depth,
        start_depth: cli.startdepth,
        alarm: cli.alarm,
        tracegrind_alarm: cli.tracegrind_alarm,
        solver_threads,
        solver_threads_auto,
        memcheck: cli.use_memcheck,
        leaks: cli.leaks,
        trace_children: cli.trace_children,
        check_danger: cli.check_danger,
        dump_calls: cli.dump_calls,
        suppress_subcalls: cli.suppress_subcalls,
        debug: cli.debug,
        verbose: cli.verbose,
        func_names: cli.func_names,
        func_filter_file: cli.func_filter_file,
        mask_file: cli.mask,
        distributed: cli.distributed,
        dist_host: cli.dist_host,
        dist_port: cli.dist_port,
        protect_main_agent: cli.protect_main_agent,
        agent: cli.agent,
        max_iterations: cli.max_iterations,
        prefix: cli.prefix,
        report_log: cli
            .report_log
            .as_ref()
            .map(|p| p.to_string_lossy().into_owned()),
        valgrind: cli.valgrind,
        solver: cli.solver,
        workdir: cli.workdir,
    };

    let seed: Box<dyn SeedSource> = if config.agent {
        Box::new(SignalSeedSource::new(config.workdir.clone()))
    } else {
        Box::new(QueueSeedSource::default())
    };

    let mut engine = match Engine::new(config, seed) {
        Ok(engine) => engine,
        Err(e) => {
            eprintln!("error: {e}");
            std::process::exit(1);
        }
    };

    let report = match engine.run() {
        Ok(report) => report,
        Err(e) => {
            eprintln!("error: {e}");
            std::process::exit(1);
        }
    };

    let formatted = format_report(&report);
    match &cli.report_log {
        Some(path) => {
            if let Err(e) = std::fs::write(path, &formatted) {
                error!("failed to write report to {}: {e}", path.display());
                println!("{formatted}");
            }
        }
        None => println!("{formatted}"),
    }

    if let Some(path) = &cli.json_summary {
        match serde_json::to_string_pretty(&report) {
            Ok(json) => {
                if let Err(e) = std::fs::write(path, json) {
                    error!("failed to write summary to {}: {e}", path.display());
                }
            }
            Err(e) => error!("failed to serialise summary: {e}"),
        }
    }
}
