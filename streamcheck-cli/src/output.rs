use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use serde::Serialize;
use streamcheck_engine::{Outcome, Playlist, ProbeResult, ProbeVerdict, ProgressCallback, RunStatsSnapshot};

use crate::error::Result;

/// Writes the playlist to `path`, or to stdout when no path is given.
pub fn write_playlist(playlist: &Playlist, path: Option<&Path>) -> Result<()> {
    let text = playlist.to_m3u();
    match path {
        Some(path) => std::fs::write(path, text)?,
        None => {
            let mut stdout = std::io::stdout().lock();
            stdout.write_all(text.as_bytes())?;
            stdout.flush()?;
        }
    }
    Ok(())
}

#[derive(Debug, Serialize)]
struct ReportEntry<'a> {
    seq: usize,
    title: &'a str,
    url: &'a str,
    kept: bool,
    #[serde(flatten)]
    verdict: &'a ProbeVerdict,
}

#[derive(Debug, Serialize)]
struct Report<'a> {
    generated_at: DateTime<Utc>,
    kept: usize,
    summary: RunStatsSnapshot,
    results: Vec<ReportEntry<'a>>,
}

/// Writes a JSON report of every verdict, in input order.
pub fn write_report(
    path: &Path,
    results: &[ProbeResult],
    playlist: &Playlist,
    summary: RunStatsSnapshot,
) -> Result<()> {
    let kept_urls: std::collections::HashSet<&str> = playlist
        .entries()
        .map(|e| e.candidate.url.as_str())
        .collect();

    let mut entries: Vec<ReportEntry<'_>> = results
        .iter()
        .map(|r| ReportEntry {
            seq: r.candidate.seq,
            title: &r.candidate.title,
            url: &r.candidate.url,
            kept: false,
            verdict: &r.verdict,
        })
        .collect();
    entries.sort_by_key(|e| e.seq);
    // A duplicated URL counts as kept only at its first occurrence.
    let mut claimed = std::collections::HashSet::new();
    for entry in &mut entries {
        entry.kept = kept_urls.contains(entry.url) && claimed.insert(entry.url);
    }

    let report = Report {
        generated_at: Utc::now(),
        kept: playlist.len(),
        summary,
        results: entries,
    };
    let file = std::fs::File::create(path)?;
    serde_json::to_writer_pretty(std::io::BufWriter::new(file), &report)?;
    Ok(())
}

/// Progress bar on stderr fed by the dispatcher callback
pub fn progress_bar(total: usize, enabled: bool) -> (ProgressBar, Option<ProgressCallback>) {
    if !enabled {
        return (ProgressBar::hidden(), None);
    }

    let bar = ProgressBar::with_draw_target(Some(total as u64), ProgressDrawTarget::stderr());
    let style = ProgressStyle::with_template(
        "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}",
    )
    .unwrap_or_else(|_| ProgressStyle::default_bar())
    .progress_chars("#>-");
    bar.set_style(style);

    let live = Arc::new(AtomicU64::new(0));
    let callback: ProgressCallback = {
        let bar = bar.clone();
        Arc::new(move |result: &ProbeResult| {
            if result.verdict.outcome == Outcome::Live {
                live.fetch_add(1, Ordering::Relaxed);
            }
            bar.set_message(format!("{} live", live.load(Ordering::Relaxed)));
            bar.inc(1);
        })
    };
    (bar, Some(callback))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use streamcheck_engine::{Candidate, Classifier, ClassifierConfig, FailureKind};

    fn result(seq: usize, url: &str, verdict: ProbeVerdict) -> ProbeResult {
        let mut candidate = Candidate::new(format!("Channel {seq}"), url);
        candidate.seq = seq;
        ProbeResult { candidate, verdict }
    }

    #[test]
    fn report_lists_every_verdict_in_input_order() {
        let results = vec![
            result(2, "http://c/1.ts", ProbeVerdict::dead(FailureKind::HttpStatus(404))),
            result(0, "http://a/1.ts", ProbeVerdict::live(Duration::from_millis(40), 3000.0)),
            result(1, "http://a/1.ts", ProbeVerdict::live(Duration::from_millis(45), 2900.0)),
        ];
        let playlist = Classifier::new(ClassifierConfig::default()).classify(results.clone());

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report.json");
        write_report(&path, &results, &playlist, RunStatsSnapshot::default()).unwrap();

        let value: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(value["kept"], 1);
        let entries = value["results"].as_array().unwrap();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0]["seq"], 0);
        assert_eq!(entries[0]["kept"], true);
        assert_eq!(entries[1]["kept"], false);
        assert_eq!(entries[2]["outcome"], "dead");
        assert_eq!(entries[2]["failure"], "http_404");
    }

    #[test]
    fn playlist_is_written_to_file() {
        let playlist = Classifier::new(ClassifierConfig::default()).classify(vec![result(
            0,
            "http://a/1.ts",
            ProbeVerdict::live(Duration::from_millis(40), 3000.0),
        )]);
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.m3u");
        write_playlist(&playlist, Some(&path)).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.starts_with("#EXTM3U\n#EXTINF:-1 group-title=\"Live\",Channel 0\n"));
    }
}
