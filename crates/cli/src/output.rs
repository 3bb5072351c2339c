//! Rendering of wharf's reports for the terminal.
//!
//! Every report is first turned into a list of [`Line`]s, which is what the
//! tests check. [`emit`] then picks the stream and colors for each line.

use std::time::Duration;

use anyhow::Context;
use owo_colors::{OwoColorize, Stream};
use wharf_lib::actions::{BuildReport, DoctorReport, InstallReport};
use wharf_lib::scheduler::{ClusterReport, Job};

/// One line of command output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Line {
  /// Completed step, on stdout.
  Done(String),
  /// Error headline, on stderr.
  Failed(String),
  /// Problem that does not stop the command, on stderr.
  Warning(String),
  Note(String),
  /// `label: value`, indented under the previous headline.
  Stat(&'static str, String),
  /// Job or entry listed under a headline.
  Item(String),
  /// Lockfile key missing under a stale-lockfile warning.
  Missing(String),
  /// Verbatim text such as a job log, on stderr.
  Detail(String),
}

/// Print `lines`, coloring them when the stream supports it.
pub fn emit(lines: &[Line]) {
  for line in lines {
    match line {
      Line::Done(text) => println!("{} {}", "✓".if_supports_color(Stream::Stdout, |s| s.green()), text),
      Line::Failed(text) => eprintln!(
        "{} {}",
        "✗".if_supports_color(Stream::Stderr, |s| s.red()),
        text.if_supports_color(Stream::Stderr, |s| s.red())
      ),
      Line::Warning(text) => eprintln!(
        "{} {}",
        "⚠".if_supports_color(Stream::Stderr, |s| s.yellow()),
        text.if_supports_color(Stream::Stderr, |s| s.yellow())
      ),
      Line::Note(text) => println!("{} {}", "•".if_supports_color(Stream::Stdout, |s| s.blue()), text),
      Line::Stat(label, value) => println!("  {}: {}", label.if_supports_color(Stream::Stdout, |s| s.dimmed()), value),
      Line::Item(text) => println!("  → {}", text),
      Line::Missing(key) => println!("  - {}", key),
      Line::Detail(text) => eprintln!("{}", text.trim_end()),
    }
  }
}

pub fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
  let json = serde_json::to_string_pretty(value).context("Failed to serialize to JSON")?;
  println!("{}", json);
  Ok(())
}

/// Summary of an install, dedupe or manifest edit. Fetch and link counts
/// only appear when packages were linked.
pub fn install_lines(headline: &str, report: &InstallReport) -> Vec<Line> {
  let mut lines = vec![
    Line::Done(headline.to_string()),
    Line::Stat("Projects", report.projects.len().to_string()),
    Line::Stat("Files updated", report.written.len().to_string()),
  ];
  if !report.links.is_empty() {
    lines.extend([
      Line::Stat("Packages fetched", report.download.fetched.to_string()),
      Line::Stat("Packages cached", report.download.cached.to_string()),
      Line::Stat("Links updated", report.linked().to_string()),
    ]);
  }
  lines
}

pub fn build_lines(report: &BuildReport) -> Vec<Line> {
  vec![
    Line::Done("Build complete".to_string()),
    Line::Stat("Built", report.built.len().to_string()),
    Line::Stat("Up to date", report.skipped.len().to_string()),
  ]
}

/// Every failed job with its log, or the totals when all jobs passed.
pub fn cluster_lines(report: &ClusterReport, elapsed: Duration) -> Vec<Line> {
  if !report.is_success() {
    return report
      .failed
      .iter()
      .flat_map(|failure| {
        [
          Line::Failed(format!("{} failed", failure.job)),
          Line::Detail(failure.detail.clone()),
        ]
      })
      .collect();
  }
  vec![
    Line::Done("All jobs passed".to_string()),
    Line::Stat("Jobs", report.total().to_string()),
    Line::Stat("Time", format_elapsed(elapsed)),
  ]
}

pub fn doctor_lines(report: &DoctorReport) -> Vec<Line> {
  if report.is_healthy() {
    return vec![Line::Done("No problems found".to_string())];
  }
  let mut lines = Vec::new();
  lines.extend(report.cycles.iter().map(|c| Line::Warning(format!("Dependency cycle: {}", c))));
  lines.extend(report.policy.iter().map(|v| Line::Warning(format!("Version policy: {}", v))));
  for stale in &report.stale {
    lines.push(Line::Warning(format!("Stale lockfile in {}", stale.project)));
    lines.extend(stale.missing.iter().cloned().map(Line::Missing));
  }
  if !report.stale.is_empty() {
    lines.push(Line::Note("Run 'wharf install' to refresh stale lockfiles".to_string()));
  }
  lines
}

/// One headline per CI node followed by its jobs.
pub fn plan_lines(nodes: &[Vec<Job>]) -> Vec<Line> {
  let mut lines = Vec::new();
  for (index, node) in nodes.iter().enumerate() {
    lines.push(Line::Note(format!("Node {} ({} jobs)", index, node.len())));
    lines.extend(node.iter().map(|job| Line::Item(job.to_string())));
  }
  lines
}

/// `1m 5s`, `1.50s` or `50ms`.
fn format_elapsed(elapsed: Duration) -> String {
  let secs = elapsed.as_secs();
  let millis = elapsed.subsec_millis();
  match secs {
    60.. => format!("{}m {}s", secs / 60, secs % 60),
    1.. => format!("{}.{:02}s", secs, millis / 10),
    0 => format!("{}ms", millis),
  }
}
