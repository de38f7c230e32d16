//! Seed requests from a remote agent to its parent process.
//!
//! When every frontier entry has score zero, an agent can ask the
//! process that spawned it for a better starting point: it signals
//! SIGUSR1, waits for SIGUSR2, and reads the fresh start depth from
//! `startdepth.log`.  The dialogue is wrapped behind [`SeedSource`]
//! so the engine can be tested without signals.

use std::collections::VecDeque;
use std::io::{self, Read};
use std::path::PathBuf;

use log::{debug, info};
use nix::sys::signal::{kill, Signal};
use nix::unistd::getppid;
use signal_hook::consts::SIGUSR2;
use signal_hook::iterator::Signals;

/// A source of fresh start depths.  `Ok(None)` means "no seed
/// available" — the engine permanently downgrades out of agent mode.
pub trait SeedSource: Send {
    fn request_seed(&mut self) -> io::Result<Option<u32>>;
}

/// The production dialogue: SIGUSR1 to the parent, wait for SIGUSR2,
/// read `startdepth.log`.
pub struct SignalSeedSource {
    workdir: PathBuf,
}

impl SignalSeedSource {
    pub fn new(workdir: impl Into<PathBuf>) -> Self {
        Self {
            workdir: workdir.into(),
        }
    }
}

impl SeedSource for SignalSeedSource {
    fn request_seed(&mut self) -> io::Result<Option<u32>> {
        // Register before signalling, or the reply can beat us.
        let mut signals = Signals::new([SIGUSR2])?;
        let parent = getppid();
        info!("requesting a fresh seed from parent {parent}");
        kill(parent, Signal::SIGUSR1).map_err(io::Error::from)?;
        signals.forever().next();
        debug!("seed reply received");

        let mut file = std::fs::File::open(self.workdir.join("startdepth.log"))?;
        let mut buf = [0u8; 4];
        file.read_exact(&mut buf)?;
        let depth = i32::from_ne_bytes(buf);
        Ok((depth > 0).then_some(depth as u32))
    }
}

/// Deterministic source handing out a fixed sequence.  Used by tests
/// and by non-agent runs (which never ask).
#[derive(Default)]
pub struct QueueSeedSource {
    seeds: VecDeque<Option<u32>>,
}

impl QueueSeedSource {
    pub fn new(seeds: impl IntoIterator<Item = Option<u32>>) -> Self {
        Self {
            seeds: seeds.into_iter().collect(),
        }
    }
}

impl SeedSource for QueueSeedSource {
    fn request_seed(&mut self) -> io::Result<Option<u32>> {
        Ok(self.seeds.pop_front().flatten())
    }
}
