//! Report writers: timestamped JSON and CSV, plus the `latest_scan.json`
//! mirror that dashboards watch for changes.

use std::fs::File;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Utc;

use crate::findings::Finding;

/// Column order of the CSV report.
pub const CSV_HEADER: [&str; 9] = [
    "url",
    "type",
    "param",
    "technique",
    "risk",
    "score",
    "payload",
    "evidence",
    "fix_snippet",
];

/// Paths produced by one export.
#[derive(Debug, Clone)]
pub struct ExportPaths {
    pub json: PathBuf,
    pub csv: PathBuf,
    pub latest: PathBuf,
}

/// Writes `scan_<unix_ts>.json` and `scan_<unix_ts>.csv` into `dir`, then
/// refreshes `latest_scan.json`. A JSON or CSV failure aborts the export;
/// a failed mirror refresh is only logged.
pub fn write_reports(findings: &[Finding], dir: &Path) -> Result<ExportPaths> {
    let stamp = Utc::now().timestamp();
    let json_path = dir.join(format!("scan_{stamp}.json"));
    let csv_path = dir.join(format!("scan_{stamp}.csv"));
    let latest_path = dir.join("latest_scan.json");

    let json_file = File::create(&json_path)
        .with_context(|| format!("creating {}", json_path.display()))?;
    serde_json::to_writer_pretty(json_file, findings).context("writing findings as JSON")?;

    let mut writer =
        csv::Writer::from_path(&csv_path).with_context(|| format!("creating {}", csv_path.display()))?;
    writer.write_record(CSV_HEADER).context("writing CSV header")?;
    for finding in findings {
        writer
            .write_record([
                finding.url.as_str(),
                finding.method.as_str(),
                finding.param.as_str(),
                finding.technique.as_str(),
                finding.risk.as_str(),
                &finding.score.to_string(),
                finding.payload.as_str(),
                finding.evidence.as_str(),
                finding.fix_snippet.as_str(),
            ])
            .context("writing CSV row")?;
    }
    writer.flush().context("flushing CSV")?;

    match File::create(&latest_path) {
        Ok(file) => {
            if let Err(error) = serde_json::to_writer_pretty(file, findings) {
                tracing::warn!("Could not refresh {}: {error}.", latest_path.display());
            }
        }
        Err(error) => tracing::warn!("Could not refresh {}: {error}.", latest_path.display()),
    }

    tracing::info!(
        "Exported {} findings to {} and {} (PDF rendering not built in).",
        findings.len(),
        json_path.display(),
        csv_path.display()
    );
    Ok(ExportPaths {
        json: json_path,
        csv: csv_path,
        latest: latest_path,
    })
}
