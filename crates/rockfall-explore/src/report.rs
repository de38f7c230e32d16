//! End-of-run reporting.

use serde::Serialize;

use crate::crash::CrashOccurrence;

/// Summary of one crash group for the final report.
#[derive(Debug, Clone, Serialize)]
pub struct CrashGroupSummary {
    /// Where the group's stack trace was dumped; `None` for
    /// trace-less groups.
    pub stack_trace_file: Option<String>,
    pub occurrences: Vec<CrashOccurrence>,
}

/// Everything a finished run has to say for itself.  Serialisable
/// for the machine-readable summary.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub iterations: u32,
    pub exploits: u32,
    pub memchecks: u32,
    pub divergences: u32,
    pub coverage_blocks: usize,
    pub frontier_size: usize,
    pub elapsed_secs: u64,
    pub crash_groups: Vec<CrashGroupSummary>,
}

/// Format a run report for human consumption.
pub fn format_report(report: &RunReport) -> String {
    let mut out = String::new();

    out.push_str("═══════════════════════════════════════════════════════════════════════\n");
    out.push_str("  Rockfall Exploration Report\n");
    out.push_str("═══════════════════════════════════════════════════════════════════════\n\n");

    out.push_str(&format!("Iterations:            {}\n", report.iterations));
    out.push_str(&format!(
        "Basic blocks covered:  {}\n",
        report.coverage_blocks
    ));
    out.push_str(&format!("Frontier left:         {}\n", report.frontier_size));
    out.push_str(&format!("Exploits:              {}\n", report.exploits));
    out.push_str(&format!("Memcheck findings:     {}\n", report.memchecks));
    out.push_str(&format!("Divergences:           {}\n", report.divergences));
    out.push_str(&format!("Elapsed:               {}s\n", report.elapsed_secs));
    out.push('\n');

    if report.crash_groups.is_empty() {
        out.push_str("─── No Crashes Found ──────────────────────────────────────────────────\n");
    } else {
        out.push_str("─── Crash Groups ──────────────────────────────────────────────────────\n");
        for (i, group) in report.crash_groups.iter().enumerate() {
            out.push_str(&format!("\n{}. Group #{i}\n", i + 1));
            match &group.stack_trace_file {
                Some(file) => out.push_str(&format!("   Stack trace:  {file}\n")),
                None => out.push_str("   Stack trace:  not available\n"),
            }
            let indices: Vec<String> = group
                .occurrences
                .iter()
                .map(|o| o.exploit_index.to_string())
                .collect();
            out.push_str(&format!("   Exploits:     {}\n", indices.join(", ")));
        }
        out.push('\n');
    }

    out.push_str("═══════════════════════════════════════════════════════════════════════\n");
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_report(groups: Vec<CrashGroupSummary>) -> RunReport {
        RunReport {
            iterations: 12,
            exploits: groups.iter().map(|g| g.occurrences.len() as u32).sum(),
            memchecks: 1,
            divergences: 2,
            coverage_blocks: 345,
            frontier_size: 7,
            elapsed_secs: 60,
            crash_groups: groups,
        }
    }

    #[test]
    fn clean_run_report() {
        let formatted = format_report(&sample_report(Vec::new()));
        assert!(formatted.contains("Iterations:            12"));
        assert!(formatted.contains("Basic blocks covered:  345"));
        assert!(formatted.contains("No Crashes Found"));
    }

    #[test]
    fn crash_groups_are_listed_with_indices() {
        let groups = vec![
            CrashGroupSummary {
                stack_trace_file: Some("stacktrace_0.log".into()),
                occurrences: vec![
                    CrashOccurrence {
                        exploit_index: 0,
                        input_file_count: Some(1),
                    },
                    CrashOccurrence {
                        exploit_index: 3,
                        input_file_count: Some(1),
                    },
                ],
            },
            CrashGroupSummary {
                stack_trace_file: None,
                occurrences: vec![CrashOccurrence {
                    exploit_index: 1,
                    input_file_count: None,
                }],
            },
        ];
        let formatted = format_report(&sample_report(groups));
        assert!(formatted.contains("Group #0"));
        assert!(formatted.contains("stacktrace_0.log"));
        assert!(formatted.contains("Exploits:     0, 3"));
        assert!(formatted.contains("Stack trace:  not available"));
    }

    #[test]
    fn report_serialises_to_json() {
        let report = sample_report(Vec::new());
        let json = serde_json::to_string_pretty(&report).unwrap();
        assert!(json.contains("\"iterations\": 12"));
        assert!(json.contains("\"coverage_blocks\": 345"));
    }
}
