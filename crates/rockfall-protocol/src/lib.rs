//! Wire protocol between a rockfall agent and the distribution server.
//!
//! This crate defines the byte layout used to migrate frontier inputs
//! from the main agent to the distribution server, which re-dispatches
//! them to peer agents.  It has zero dependencies; both sides of the
//! connection encode and decode through the helpers here.
//!
//! # Transport
//!
//! A single TCP connection.  All integers are 4 bytes in **host byte
//! order** (the server and its agents run on the same architecture);
//! booleans are 1 byte; byte strings are length-prefixed.
//!
//! # Dialogue
//!
//! 1. The client identifies itself: [`HELLO_MAIN`] (`'m'`)
//! 2. The server answers with a u32 peer-agent count
//! 3. After each exploration iteration the client polls the socket and
//!    dispatches one-byte server commands:
//!    - [`CMD_ANNOUNCE`] (`'a'`) — client responds [`RESP_READY`]
//!      (`'r'`), reads a u32 request count, and sends that many *full*
//!      records (input bytes plus the complete effective option set)
//!    - [`CMD_GIVE_INPUT`] (`'g'`) — like `'a'` but each record
//!      carries only the input bytes and the start depth
//!    - anything else — client sends a single u32 `0`
//! 4. On shutdown the client sends [`BYE`] (`'q'`)
//!
//! A slot the client cannot fill (frontier at its floor) is encoded as
//! a u32 `0` where the file count would be.
//!
//! # Full record layout (`'a'`)
//!
//! ```text
//! u32   file_count            0 = empty slot, nothing follows
//! bool  sockets
//! bool  datagrams
//! per file:
//!   [u32 name_len, name]      only when neither sockets nor datagrams
//!   u32  size
//!   size bytes
//! u32   start_depth
//! u32   depth                 configured branch-collection depth
//! u32   alarm
//! u32   tracegrind_alarm
//! u32   solver_threads
//! u32   prog_argc
//! 8 × bool                    memcheck, leaks, trace_children,
//!                             check_danger, debug, verbose,
//!                             suppress_subcalls, solver_threads_auto
//! [u32 host_len, host, u32 port]   only when sockets
//! u32   mask_len [+ bytes]    0 = no input mask
//! u32   func_count, then per function: u32 len + bytes
//! u32   filter_len [+ bytes]  0 = no function-filter file
//! prog_argc × (u32 len + bytes)
//! ```
//!
//! # Bare record layout (`'g'`)
//!
//! ```text
//! per file: u32 size + bytes  (count implied by receiver's options)
//! u32 start_depth
//! ```

use std::io::{self, Read, Write};

// ═══════════════════════════════════════════════════════════════════════
//  Command bytes
// ═══════════════════════════════════════════════════════════════════════

/// Client handshake byte: "I am the main agent".
pub const HELLO_MAIN: u8 = b'm';

/// Server command: send full records (inputs + options).
pub const CMD_ANNOUNCE: u8 = b'a';

/// Server command: send bare input records.
pub const CMD_GIVE_INPUT: u8 = b'g';

/// Client response prefix before record data.  Distinct from [`BYE`]
/// so the server can tell a live client from one that is quitting.
pub const RESP_READY: u8 = b'r';

/// Client shutdown byte.
pub const BYE: u8 = b'q';

// ═══════════════════════════════════════════════════════════════════════
//  Primitive encoding
// ═══════════════════════════════════════════════════════════════════════

/// Write a u32 in host byte order.
pub fn write_u32<W: Write>(w: &mut W, v: u32) -> io::Result<()> {
    w.write_all(&v.to_ne_bytes())
}

/// Read a u32 in host byte order.
pub fn read_u32<R: Read>(r: &mut R) -> io::Result<u32> {
    let mut buf = [0u8; 4];
    r.read_exact(&mut buf)?;
    Ok(u32::from_ne_bytes(buf))
}

/// Write a bool as a single byte.
pub fn write_bool<W: Write>(w: &mut W, v: bool) -> io::Result<()> {
    w.write_all(&[v as u8])
}

/// Read a single-byte bool.  Any non-zero byte is `true`.
pub fn read_bool<R: Read>(r: &mut R) -> io::Result<bool> {
    let mut buf = [0u8; 1];
    r.read_exact(&mut buf)?;
    Ok(buf[0] != 0)
}

/// Write a length-prefixed byte string.
pub fn write_bytes<W: Write>(w: &mut W, v: &[u8]) -> io::Result<()> {
    write_u32(w, v.len() as u32)?;
    w.write_all(v)
}

/// Read a length-prefixed byte string.
pub fn read_blob<R: Read>(r: &mut R) -> io::Result<Vec<u8>> {
    let len = read_u32(r)? as usize;
    let mut buf = vec![0u8; len];
    r.read_exact(&mut buf)?;
    Ok(buf)
}

/// Read a length-prefixed string (lossy UTF-8).
pub fn read_string<R: Read>(r: &mut R) -> io::Result<String> {
    Ok(String::from_utf8_lossy(&read_blob(r)?).into_owned())
}

// ═══════════════════════════════════════════════════════════════════════
//  Records
// ═══════════════════════════════════════════════════════════════════════

/// One input blob as transferred on the wire.  `name` is present only
/// for file targets; network chunks are identified by position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WireBlob {
    pub name: Option<String>,
    pub data: Vec<u8>,
}

/// The effective option set accompanying a full (`'a'`) record, in
/// exactly the order it crosses the wire.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct WireOptions {
    pub sockets: bool,
    pub datagrams: bool,
    pub depth: u32,
    pub alarm: u32,
    pub tracegrind_alarm: u32,
    pub solver_threads: u32,
    pub memcheck: bool,
    pub leaks: bool,
    pub trace_children: bool,
    pub check_danger: bool,
    pub debug: bool,
    pub verbose: bool,
    pub suppress_subcalls: bool,
    pub solver_threads_auto: bool,
    /// Present only when `sockets`.
    pub endpoint: Option<(String, u32)>,
    /// Input mask file contents, when configured.
    pub mask: Option<Vec<u8>>,
    pub func_names: Vec<String>,
    /// Function-filter file contents, when configured.
    pub func_filter_file: Option<Vec<u8>>,
    /// Target program and its arguments.
    pub prog_and_args: Vec<String>,
}

/// Write an empty slot: a u32 `0` where the file count would go.
pub fn write_empty_record<W: Write>(w: &mut W) -> io::Result<()> {
    write_u32(w, 0)
}

/// Write a full `'a'` record: blobs plus the complete option set.
pub fn write_full_record<W: Write>(
    w: &mut W,
    blobs: &[WireBlob],
    start_depth: u32,
    opts: &WireOptions,
) -> io::Result<()> {
    write_u32(w, blobs.len() as u32)?;
    write_bool(w, opts.sockets)?;
    write_bool(w, opts.datagrams)?;
    let named = !opts.sockets && !opts.datagrams;
    for blob in blobs {
        if named {
            write_bytes(w, blob.name.as_deref().unwrap_or("").as_bytes())?;
        }
        write_bytes(w, &blob.data)?;
    }
    write_u32(w, start_depth)?;
    write_u32(w, opts.depth)?;
    write_u32(w, opts.alarm)?;
    write_u32(w, opts.tracegrind_alarm)?;
    write_u32(w, opts.solver_threads)?;
    write_u32(w, opts.prog_and_args.len() as u32)?;

    write_bool(w, opts.memcheck)?;
    write_bool(w, opts.leaks)?;
    write_bool(w, opts.trace_children)?;
    write_bool(w, opts.check_danger)?;
    write_bool(w, opts.debug)?;
    write_bool(w, opts.verbose)?;
    write_bool(w, opts.suppress_subcalls)?;
    write_bool(w, opts.solver_threads_auto)?;

    if opts.sockets {
        let (host, port) = opts.endpoint.clone().unwrap_or_default();
        write_bytes(w, host.as_bytes())?;
        write_u32(w, port)?;
    }

    match &opts.mask {
        Some(mask) => write_bytes(w, mask)?,
        None => write_u32(w, 0)?,
    }

    write_u32(w, opts.func_names.len() as u32)?;
    for name in &opts.func_names {
        write_bytes(w, name.as_bytes())?;
    }

    match &opts.func_filter_file {
        Some(filter) => write_bytes(w, filter)?,
        None => write_u32(w, 0)?,
    }

    for arg in &opts.prog_and_args {
        write_bytes(w, arg.as_bytes())?;
    }
    Ok(())
}

/// Read a full `'a'` record.  Returns `None` for an empty slot.
pub fn read_full_record<R: Read>(
    r: &mut R,
) -> io::Result<Option<(Vec<WireBlob>, u32, WireOptions)>> {
    let file_count = read_u32(r)?;
    if file_count == 0 {
        return Ok(None);
    }
    let mut opts = WireOptions::default();
    opts.sockets = read_bool(r)?;
    opts.datagrams = read_bool(r)?;
    let named = !opts.sockets && !opts.datagrams;
    let mut blobs = Vec::with_capacity(file_count as usize);
    for _ in 0..file_count {
        let name = if named { Some(read_string(r)?) } else { None };
        let data = read_blob(r)?;
        blobs.push(WireBlob { name, data });
    }
    let start_depth = read_u32(r)?;
    opts.depth = read_u32(r)?;
    opts.alarm = read_u32(r)?;
    opts.tracegrind_alarm = read_u32(r)?;
    opts.solver_threads = read_u32(r)?;
    let prog_argc = read_u32(r)?;

    opts.memcheck = read_bool(r)?;
    opts.leaks = read_bool(r)?;
    opts.trace_children = read_bool(r)?;
    opts.check_danger = read_bool(r)?;
    opts.debug = read_bool(r)?;
    opts.verbose = read_bool(r)?;
    opts.suppress_subcalls = read_bool(r)?;
    opts.solver_threads_auto = read_bool(r)?;

    if opts.sockets {
        let host = read_string(r)?;
        let port = read_u32(r)?;
        opts.endpoint = Some((host, port));
    }

    let mask = read_blob(r)?;
    opts.mask = (!mask.is_empty()).then_some(mask);

    let func_count = read_u32(r)?;
    for _ in 0..func_count {
        opts.func_names.push(read_string(r)?);
    }

    let filter = read_blob(r)?;
    opts.func_filter_file = (!filter.is_empty()).then_some(filter);

    for _ in 0..prog_argc {
        opts.prog_and_args.push(read_string(r)?);
    }
    Ok(Some((blobs, start_depth, opts)))
}

/// Write a bare `'g'` record: per-blob size + bytes, then start depth.
/// The receiver knows the blob count from its own option set.
pub fn write_bare_record<W: Write>(
    w: &mut W,
    blobs: &[WireBlob],
    start_depth: u32,
) -> io::Result<()> {
    for blob in blobs {
        write_bytes(w, &blob.data)?;
    }
    write_u32(w, start_depth)
}

/// Read a bare `'g'` record of `file_count` blobs.
pub fn read_bare_record<R: Read>(
    r: &mut R,
    file_count: u32,
) -> io::Result<(Vec<Vec<u8>>, u32)> {
    let mut blobs = Vec::with_capacity(file_count as usize);
    for _ in 0..file_count {
        blobs.push(read_blob(r)?);
    }
    let start_depth = read_u32(r)?;
    Ok((blobs, start_depth))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn file_blob(name: &str, data: &[u8]) -> WireBlob {
        WireBlob {
            name: Some(name.to_string()),
            data: data.to_vec(),
        }
    }

    fn sample_options() -> WireOptions {
        WireOptions {
            depth: 100,
            alarm: 300,
            tracegrind_alarm: 0,
            solver_threads: 4,
            memcheck: true,
            leaks: true,
            check_danger: true,
            prog_and_args: vec!["./target".into(), "input.bin".into()],
            ..Default::default()
        }
    }

    #[test]
    fn u32_roundtrip() {
        let mut buf = Vec::new();
        write_u32(&mut buf, 0xDEAD_BEEF).unwrap();
        assert_eq!(buf.len(), 4);
        assert_eq!(read_u32(&mut Cursor::new(buf)).unwrap(), 0xDEAD_BEEF);
    }

    #[test]
    fn bool_is_one_byte() {
        let mut buf = Vec::new();
        write_bool(&mut buf, true).unwrap();
        write_bool(&mut buf, false).unwrap();
        assert_eq!(buf, vec![1, 0]);
    }

    #[test]
    fn blob_roundtrip() {
        let mut buf = Vec::new();
        write_bytes(&mut buf, b"hello").unwrap();
        assert_eq!(read_blob(&mut Cursor::new(buf)).unwrap(), b"hello");
    }

    #[test]
    fn empty_record_is_single_zero() {
        let mut buf = Vec::new();
        write_empty_record(&mut buf).unwrap();
        assert_eq!(buf, 0u32.to_ne_bytes());
        let rec = read_full_record(&mut Cursor::new(buf)).unwrap();
        assert!(rec.is_none());
    }

    #[test]
    fn full_record_roundtrip_file_mode() {
        let blobs = vec![file_blob("input.bin", b"hello"), file_blob("b", b"\x00\x01")];
        let opts = sample_options();

        let mut buf = Vec::new();
        write_full_record(&mut buf, &blobs, 7, &opts).unwrap();

        let (got_blobs, start_depth, got_opts) =
            read_full_record(&mut Cursor::new(buf)).unwrap().unwrap();
        assert_eq!(got_blobs, blobs);
        assert_eq!(start_depth, 7);
        assert_eq!(got_opts, opts);
    }

    #[test]
    fn full_record_roundtrip_socket_mode() {
        let blobs = vec![WireBlob {
            name: None,
            data: b"GET /".to_vec(),
        }];
        let opts = WireOptions {
            sockets: true,
            endpoint: Some(("127.0.0.1".into(), 8080)),
            depth: 50,
            prog_and_args: vec!["server".into()],
            ..Default::default()
        };

        let mut buf = Vec::new();
        write_full_record(&mut buf, &blobs, 3, &opts).unwrap();

        let (got_blobs, start_depth, got_opts) =
            read_full_record(&mut Cursor::new(buf)).unwrap().unwrap();
        assert_eq!(got_blobs, blobs);
        assert_eq!(start_depth, 3);
        assert_eq!(got_opts.endpoint, Some(("127.0.0.1".into(), 8080)));
        assert_eq!(got_opts, opts);
    }

    #[test]
    fn full_record_carries_mask_and_filters() {
        let blobs = vec![file_blob("a", b"x")];
        let opts = WireOptions {
            mask: Some(b"0-4\n".to_vec()),
            func_names: vec!["parse".into(), "decode".into()],
            func_filter_file: Some(b"main\n".to_vec()),
            prog_and_args: vec!["prog".into()],
            ..Default::default()
        };

        let mut buf = Vec::new();
        write_full_record(&mut buf, &blobs, 0, &opts).unwrap();

        let (_, _, got) = read_full_record(&mut Cursor::new(buf)).unwrap().unwrap();
        assert_eq!(got.mask.as_deref(), Some(b"0-4\n".as_slice()));
        assert_eq!(got.func_names, vec!["parse", "decode"]);
        assert_eq!(got.func_filter_file.as_deref(), Some(b"main\n".as_slice()));
    }

    #[test]
    fn full_record_header_layout() {
        // The first bytes on the wire must be: file count, sockets,
        // datagrams — the receiver branches on these before anything
        // else.
        let blobs = vec![WireBlob {
            name: None,
            data: vec![0xAB],
        }];
        let opts = WireOptions {
            datagrams: true,
            prog_and_args: vec!["p".into()],
            ..Default::default()
        };
        let mut buf = Vec::new();
        write_full_record(&mut buf, &blobs, 1, &opts).unwrap();

        assert_eq!(buf[0..4], 1u32.to_ne_bytes());
        assert_eq!(buf[4], 0); // sockets
        assert_eq!(buf[5], 1); // datagrams
        // Datagram blobs are unnamed: size comes immediately after.
        assert_eq!(buf[6..10], 1u32.to_ne_bytes());
        assert_eq!(buf[10], 0xAB);
    }

    #[test]
    fn eight_bools_follow_prog_argc() {
        let blobs = vec![file_blob("f", b"z")];
        let mut opts = sample_options();
        opts.solver_threads_auto = true;

        let mut buf = Vec::new();
        write_full_record(&mut buf, &blobs, 0, &opts).unwrap();

        // header: count(4) + 2 bools + name(4+1) + data(4+1) +
        // startdepth(4) + depth(4) + alarm(4) + tgalarm(4) +
        // threads(4) + argc(4) = 40
        let bools = &buf[40..48];
        assert_eq!(
            bools,
            &[1, 1, 0, 1, 0, 0, 0, 1],
            "memcheck, leaks, trace_children, check_danger, debug, \
             verbose, suppress_subcalls, solver_threads_auto"
        );
    }

    #[test]
    fn bare_record_roundtrip() {
        let blobs = vec![
            WireBlob {
                name: None,
                data: b"one".to_vec(),
            },
            WireBlob {
                name: None,
                data: b"two!".to_vec(),
            },
        ];
        let mut buf = Vec::new();
        write_bare_record(&mut buf, &blobs, 9).unwrap();

        let (got, start_depth) = read_bare_record(&mut Cursor::new(buf), 2).unwrap();
        assert_eq!(got, vec![b"one".to_vec(), b"two!".to_vec()]);
        assert_eq!(start_depth, 9);
    }

    #[test]
    fn truncated_record_is_an_error() {
        let blobs = vec![file_blob("f", b"data")];
        let mut buf = Vec::new();
        write_full_record(&mut buf, &blobs, 0, &sample_options()).unwrap();
        buf.truncate(buf.len() - 3);
        assert!(read_full_record(&mut Cursor::new(buf)).is_err());
    }

    #[test]
    fn command_bytes_are_distinct() {
        let all = [HELLO_MAIN, CMD_ANNOUNCE, CMD_GIVE_INPUT, RESP_READY, BYE];
        for (i, a) in all.iter().enumerate() {
            for b in &all[i + 1..] {
                assert_ne!(a, b);
            }
        }
    }
}
