//! Client side of the input-distribution dialogue.
//!
//! The main agent holds one TCP connection to the distribution
//! server.  After each iteration it polls the socket with zero
//! timeout and serves whatever the server asked for: `'a'` migrates
//! surplus inputs together with the full effective option set, `'g'`
//! migrates bare inputs.  The client never drops below its floor of
//! local inputs, and any socket failure downgrades the whole run to
//! local-only mode.

use std::io::{Read, Write};
use std::net::TcpStream;
use std::sync::Mutex;

use log::{debug, info};
use thiserror::Error;

use rockfall_protocol as wire;

use crate::config::EngineConfig;
use crate::engine::SearchState;
use crate::input::Input;

/// Inputs kept local per peer agent when the main agent is protected.
const MAIN_AGENT_FLOOR: u32 = 5;

/// Errors in the server dialogue.  All of them mean "coordinator
/// lost" to the engine.
#[derive(Debug, Error)]
pub enum CoordinatorError {
    #[error("I/O error talking to the distribution server: {0}")]
    Io(#[from] std::io::Error),
    #[error("server closed the connection")]
    Disconnected,
}

/// One live connection to the distribution server.
pub struct Coordinator {
    stream: TcpStream,
    agents: u32,
}

impl Coordinator {
    /// Connect, identify as the main agent, and learn the peer count.
    pub fn connect(host: &str, port: u16) -> Result<Self, CoordinatorError> {
        let mut stream = TcpStream::connect((host, port))?;
        stream.write_all(&[wire::HELLO_MAIN])?;
        let agents = wire::read_u32(&mut stream)?;
        info!("connected to distribution server at {host}:{port}, {agents} agents");
        Ok(Self { stream, agents })
    }

    pub fn agents(&self) -> u32 {
        self.agents
    }

    fn floor(&self, cfg: &EngineConfig) -> usize {
        if cfg.protect_main_agent {
            (MAIN_AGENT_FLOOR * self.agents) as usize
        } else {
            1
        }
    }

    /// Post-iteration dialogue: drain pending server commands.
    pub fn talk(
        &mut self,
        search: &Mutex<SearchState>,
        cfg: &EngineConfig,
    ) -> Result<(), CoordinatorError> {
        while let Some(command) = self.poll_command()? {
            match command {
                wire::CMD_ANNOUNCE => {
                    debug!("server asked for inputs with options");
                    self.serve(search, cfg, true)?;
                }
                wire::CMD_GIVE_INPUT => {
                    debug!("server asked for bare inputs");
                    self.serve(search, cfg, false)?;
                }
                other => {
                    debug!("unknown server command {other:#04x}");
                    wire::write_u32(&mut self.stream, 0)?;
                }
            }
        }
        Ok(())
    }

    /// Read one command byte if the socket is readable right now.
    fn poll_command(&mut self) -> Result<Option<u8>, CoordinatorError> {
        self.stream.set_nonblocking(true)?;
        let mut byte = [0u8; 1];
        let result = self.stream.read(&mut byte);
        self.stream.set_nonblocking(false)?;
        match result {
            Ok(0) => Err(CoordinatorError::Disconnected),
            Ok(_) => Ok(Some(byte[0])),
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Answer one `'a'`/`'g'` request: up to `size` records, popping
    /// the second-highest input each time so the best stays local.
    /// Slots we refuse to fill (frontier at the floor) are sent as
    /// empty records.
    fn serve(
        &mut self,
        search: &Mutex<SearchState>,
        cfg: &EngineConfig,
        with_options: bool,
    ) -> Result<(), CoordinatorError> {
        self.stream.write_all(&[wire::RESP_READY])?;
        let mut remaining = wire::read_u32(&mut self.stream)?;
        let floor = self.floor(cfg);
        debug!("server requested {remaining} inputs, floor is {floor}");

        while remaining > 0 {
            let input = {
                let mut search = search.lock().unwrap();
                if search.frontier.len() <= floor {
                    None
                } else {
                    // The popped frontier entry is gone but the arena
                    // record stays, keeping parent references valid.
                    search
                        .frontier
                        .pop_second_best()
                        .map(|(_, id)| search.store.get(id).clone())
                }
            };
            let Some(input) = input else {
                break;
            };
            let blobs = to_wire_blobs(&input, cfg);
            if with_options {
                wire::write_full_record(
                    &mut self.stream,
                    &blobs,
                    input.start_depth,
                    &wire_options(cfg),
                )?;
            } else {
                wire::write_bare_record(&mut self.stream, &blobs, input.start_depth)?;
            }
            info!("migrated one input to the distribution server");
            remaining -= 1;
        }
        while remaining > 0 {
            wire::write_empty_record(&mut self.stream)?;
            remaining -= 1;
        }
        Ok(())
    }

    /// Say goodbye and close.  The `'q'` byte tells the server this
    /// is a normal shutdown, not a death.
    pub fn finish(self) {
        let mut stream = self.stream;
        let _ = stream.write_all(&[wire::BYE]);
        let _ = stream.shutdown(std::net::Shutdown::Both);
        info!("closed connection to the distribution server");
    }
}

fn to_wire_blobs(input: &Input, cfg: &EngineConfig) -> Vec<wire::WireBlob> {
    input
        .blobs
        .iter()
        .enumerate()
        .map(|(i, blob)| wire::WireBlob {
            name: (!cfg.using_network()).then(|| {
                cfg.files
                    .get(i)
                    .cloned()
                    .unwrap_or_else(|| blob.name().to_string())
            }),
            data: blob.data().to_vec(),
        })
        .collect()
}

/// Snapshot the effective option set for the wire.  File-backed
/// options (mask, function filter) travel by content.
pub fn wire_options(cfg: &EngineConfig) -> wire::WireOptions {
    wire::WireOptions {
        sockets: cfg.sockets,
        datagrams: cfg.datagrams,
        depth: cfg.depth,
        alarm: cfg.alarm,
        tracegrind_alarm: cfg.tracegrind_alarm,
        solver_threads: cfg.solver_threads,
        memcheck: cfg.memcheck,
        leaks: cfg.leaks,
        trace_children: cfg.trace_children,
        check_danger: cfg.check_danger,
        debug: cfg.debug,
        verbose: cfg.verbose,
        suppress_subcalls: cfg.suppress_subcalls,
        solver_threads_auto: cfg.solver_threads_auto,
        endpoint: cfg
            .sockets
            .then(|| (cfg.host.clone(), u32::from(cfg.port))),
        mask: cfg
            .mask_file
            .as_ref()
            .and_then(|path| std::fs::read(path).ok()),
        func_names: cfg.func_names.clone(),
        func_filter_file: cfg
            .func_filter_file
            .as_ref()
            .and_then(|path| std::fs::read(path).ok()),
        prog_and_args: cfg.prog_and_args.clone(),
    }
}
