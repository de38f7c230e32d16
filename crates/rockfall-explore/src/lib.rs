//! Concolic exploration engine for rockfall.
//!
//! Rockfall drives a target program through a best-first search over
//! its branch tree:
//!
//! ```text
//! 1. Run the target under the tracing plugin → path condition
//!    (a sequence of QUERY(FALSE); records) + observed branch vector
//! 2. For each conjunct, ask the external solver for an assignment
//!    that flips that branch
//! 3. Materialise each satisfying model as a new concrete input
//! 4. Re-run the target under the coverage/error checker on every
//!    new input; score it by freshly covered basic blocks and triage
//!    crashes and memory errors
//! 5. Push the children onto the frontier keyed by (score, depth);
//!    pop the highest-scoring entry and repeat
//! ```
//!
//! In distributed mode surplus frontier inputs migrate over TCP to a
//! coordinator that re-dispatches them to peer agents (wire format in
//! the `rockfall-protocol` crate).
//!
//! # Module Structure
//!
//! - [`buffer`] — named byte blobs, model application, trace splitting
//! - [`config`] — the effective option set of one run
//! - [`exec`] — child processes with capture and watchdog timeouts
//! - [`tools`] — argv assembly for the tracer, checker and solver
//! - [`coverage`] — global + per-iteration basic-block sets
//! - [`crash`] — crash groups keyed by filtered stack traces
//! - [`frontier`] — the `(score, depth)` priority multimap
//! - [`input`] — the input arena and solver-model derivation
//! - [`pool`] — fixed pool of solver workers
//! - [`monitor`] — child pids, killed flags, signal handling
//! - [`seed`] — agent ↔ parent seed requests
//! - [`engine`] — the exploration loop
//! - [`coordinator`] — the distribution-server client
//! - [`report`] — end-of-run reports
//!
//! # Determinism
//!
//! Selection is strictly by the `(score, depth)` key and derived
//! start depths depend only on each query's index, so the frontier
//! contents do not depend on the order in which the worker pool
//! finishes its queries.

pub mod buffer;
pub mod config;
pub mod coordinator;
pub mod coverage;
pub mod crash;
pub mod engine;
pub mod exec;
pub mod frontier;
pub mod input;
pub mod monitor;
pub mod pool;
pub mod report;
pub mod seed;
pub mod tools;

pub use buffer::FileBuffer;
pub use config::EngineConfig;
pub use coordinator::{Coordinator, CoordinatorError};
pub use coverage::CoverageSet;
pub use crash::CrashReport;
pub use engine::{Engine, EngineError, SearchState};
pub use frontier::{Frontier, FrontierKey};
pub use input::{Input, InputId, InputStore};
pub use monitor::Monitor;
pub use pool::WorkerPool;
pub use report::{format_report, RunReport};
pub use seed::{QueueSeedSource, SeedSource, SignalSeedSource};
