//! Crash triage: group findings by filtered stack trace.
//!
//! Every checker crash contributes one occurrence to a crash group;
//! two crashes share a group iff their filtered checker outputs are
//! byte-equal.  A crash with no extractable stack trace always opens
//! a fresh, trace-less group.  The report also owns the run-wide
//! exploit / memcheck / divergence counters so numbered artefact
//! names are allocated under one lock.

use serde::Serialize;

/// One contributing crash: which exploit dump it produced and how
/// many input files that dump spans (`None` for the single-file
/// network dumps).
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct CrashOccurrence {
    pub exploit_index: u32,
    pub input_file_count: Option<u32>,
}

/// A group of crashes with identical filtered stack traces.
#[derive(Debug, Clone)]
pub struct CrashGroup {
    /// Filtered stack-trace bytes; `None` when the checker output
    /// yielded no frames.
    pub trace: Option<Vec<u8>>,
    pub occurrences: Vec<CrashOccurrence>,
}

/// Deduplicating crash table plus artefact counters.
#[derive(Default)]
pub struct CrashReport {
    groups: Vec<CrashGroup>,
    pub exploits: u32,
    pub memchecks: u32,
    pub divergences: u32,
}

impl CrashReport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one crash.  Returns the group index and whether the
    /// group is new (a new group's stack trace still needs dumping).
    pub fn record_crash(
        &mut self,
        trace: Option<&[u8]>,
        exploit_index: u32,
        input_file_count: Option<u32>,
    ) -> (usize, bool) {
        let occurrence = CrashOccurrence {
            exploit_index,
            input_file_count,
        };
        if let Some(trace) = trace {
            for (i, group) in self.groups.iter_mut().enumerate() {
                if group.trace.as_deref() == Some(trace) {
                    group.occurrences.push(occurrence);
                    return (i, false);
                }
            }
        }
        self.groups.push(CrashGroup {
            trace: trace.map(<[u8]>::to_vec),
            occurrences: vec![occurrence],
        });
        (self.groups.len() - 1, true)
    }

    pub fn groups(&self) -> &[CrashGroup] {
        &self.groups
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }
}

/// Counters extracted from a memory-checker execution log.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemcheckFindings {
    pub errors: Option<i64>,
    pub definitely_lost: Option<i64>,
    pub possibly_lost: Option<i64>,
}

impl MemcheckFindings {
    /// Whether this log constitutes a finding worth dumping.  Leak
    /// counters are only trusted when the run was not cut short by
    /// the watchdog.
    pub fn is_finding(&self, timed_out: bool) -> bool {
        self.errors.is_some_and(|e| e > 0)
            || (!timed_out && (self.definitely_lost.is_some() || self.possibly_lost.is_some()))
    }
}

/// Parse `ERROR SUMMARY: K` and the leak counters out of a memcheck
/// log.  Leak counters are only extracted when `check_leaks` is set.
pub fn parse_memcheck_log(text: &str, check_leaks: bool) -> MemcheckFindings {
    let mut findings = MemcheckFindings {
        errors: leading_number_after(text, "ERROR SUMMARY: "),
        ..Default::default()
    };
    if check_leaks {
        findings.definitely_lost = leading_number_after(text, "definitely lost: ");
        findings.possibly_lost = leading_number_after(text, "possibly lost: ");
    }
    findings
}

/// Find `marker` in `text` and parse the decimal number that follows
/// (thousands separators allowed, as memcheck prints them).
fn leading_number_after(text: &str, marker: &str) -> Option<i64> {
    let at = text.find(marker)? + marker.len();
    let digits: String = text[at..]
        .chars()
        .take_while(|c| c.is_ascii_digit() || *c == ',')
        .filter(|c| c.is_ascii_digit())
        .collect();
    digits.parse().ok()
}
