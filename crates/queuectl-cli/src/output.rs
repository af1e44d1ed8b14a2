//! Human-readable and JSON rendering of command results.

use anyhow::Result;
use serde::Serialize;

use queuectl_core::app::StatusReport;
use queuectl_core::domain::{JobRecord, JobState, timestamp};

const COMMAND_WIDTH: usize = 40;

pub fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

pub fn print_jobs(jobs: &[JobRecord], empty_message: &str) {
    if jobs.is_empty() {
        println!("{empty_message}");
        return;
    }

    let rows: Vec<[String; 7]> = jobs.iter().map(job_row).collect();
    let headers = [
        "ID",
        "STATE",
        "ATTEMPTS",
        "MAX_RETRIES",
        "AVAILABLE_AT",
        "UPDATED_AT",
        "COMMAND",
    ];
    let mut widths = headers.map(str::len);
    for row in &rows {
        for (width, cell) in widths.iter_mut().zip(row) {
            *width = (*width).max(cell.chars().count());
        }
    }

    print_row(&headers.map(String::from), &widths);
    for row in &rows {
        print_row(row, &widths);
    }
}

pub fn print_status(report: &StatusReport) {
    for state in JobState::ALL {
        println!("{:<12}{}", state.as_str(), report.jobs.get(state));
    }
    println!("{:<12}{}", "total", report.total);
    println!("{:<12}{}", "workers", report.workers);
}

fn job_row(job: &JobRecord) -> [String; 7] {
    [
        job.id.to_string(),
        job.state.to_string(),
        job.attempts.to_string(),
        job.max_retries.to_string(),
        job.available_at
            .map(timestamp::format)
            .unwrap_or_else(|| "-".to_string()),
        timestamp::format(job.updated_at),
        truncate(&job.command, COMMAND_WIDTH),
    ]
}

fn print_row(cells: &[String; 7], widths: &[usize; 7]) {
    let line = cells
        .iter()
        .zip(widths)
        .map(|(cell, width)| format!("{cell:<width$}"))
        .collect::<Vec<_>>()
        .join("  ");
    println!("{}", line.trim_end());
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut cut: String = text.chars().take(max_chars.saturating_sub(3)).collect();
    cut.push_str("...");
    cut
}
