//! Argv builders for the three external tools.
//!
//! The tracer and checker are valgrind plugins; the solver is a
//! standalone binary fed one query file.  Everything here is pure
//! string assembly — execution lives in [`crate::exec`].

use crate::config::EngineConfig;

/// Per-thread artefact suffix: empty on the main thread, `_<k>` on
/// worker `k`.
pub fn name_modifier(thread: usize) -> String {
    if thread == 0 {
        String::new()
    } else {
        format!("_{thread}")
    }
}

/// Argv for a tracer run at the given start depth.
pub fn tracer_argv(cfg: &EngineConfig, start_depth: u32, check_prediction: bool) -> Vec<String> {
    let mut argv = vec![cfg.valgrind.clone(), "--tool=tracegrind".to_string()];
    if cfg.trace_children {
        argv.push("--trace-children=yes".to_string());
    }
    argv.push(format!("--startdepth={start_depth}"));
    argv.push(format!("--invertdepth={}", cfg.depth));

    if cfg.dump_calls {
        argv.push("--dump-file=calldump.log".to_string());
    } else {
        argv.push("--dump-prediction=yes".to_string());
    }
    argv.push(if cfg.check_danger {
        "--check-danger=yes".to_string()
    } else {
        "--check-danger=no".to_string()
    });

    for func in &cfg.func_names {
        argv.push(format!("--func-name={func}"));
    }
    if let Some(filter) = &cfg.func_filter_file {
        argv.push(format!("--func-filter-file={filter}"));
    }
    if let Some(mask) = &cfg.mask_file {
        argv.push(format!("--mask={mask}"));
    }
    if cfg.suppress_subcalls {
        argv.push("--suppress-subcalls=yes".to_string());
    }

    if cfg.sockets {
        argv.push(format!("--host={}", cfg.host));
        argv.push(format!("--port={}", cfg.port));
        argv.push("--replace=yes".to_string());
        argv.push("--sockets=yes".to_string());
    } else if cfg.datagrams {
        argv.push("--replace=yes".to_string());
        argv.push("--datagrams=yes".to_string());
    } else {
        for file in &cfg.files {
            argv.push(format!("--file={file}"));
        }
    }

    if check_prediction {
        argv.push("--check-prediction=yes".to_string());
    }

    argv.extend(cfg.prog_and_args.iter().cloned());
    argv
}

/// Argv for a checker run.  `modifier` is the per-thread artefact
/// suffix; `no_coverage` disables block collection on danger-only
/// runs.
pub fn checker_argv(cfg: &EngineConfig, modifier: &str, no_coverage: bool) -> Vec<String> {
    let mut argv = vec![
        cfg.valgrind.clone(),
        format!("--tool={}", cfg.checker_tool()),
    ];
    if cfg.trace_children {
        argv.push("--trace-children=yes".to_string());
    }

    if cfg.sockets {
        argv.push(format!("--host={}", cfg.host));
        argv.push(format!("--port={}", cfg.port));
        argv.push(format!("--replace=replace_data{modifier}"));
        argv.push("--sockets=yes".to_string());
    } else if cfg.datagrams {
        argv.push(format!("--replace=replace_data{modifier}"));
        argv.push("--datagrams=yes".to_string());
    } else {
        argv.push(format!("--alarm={}", cfg.alarm));
    }

    argv.push(format!("--log-file=execution{modifier}.log"));
    if no_coverage {
        argv.push("--no-coverage=yes".to_string());
    }
    if !modifier.is_empty() {
        argv.push(format!("--filename=basic_blocks{modifier}.log"));
    }
    if cfg.memcheck && cfg.leaks {
        argv.push("--leak-check=full".to_string());
    }

    // Worker threads materialise input files under suffixed names;
    // the target argv must point at the same names.
    for arg in &cfg.prog_and_args {
        if !modifier.is_empty() && !cfg.using_network() && cfg.files.iter().any(|f| f == arg) {
            argv.push(format!("{arg}{modifier}"));
        } else {
            argv.push(arg.clone());
        }
    }
    argv
}

/// Argv for one solver invocation over a query file.
pub fn solver_argv(cfg: &EngineConfig, query_file: &str) -> Vec<String> {
    vec![cfg.solver.clone(), "-p".to_string(), query_file.to_string()]
}
