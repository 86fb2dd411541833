use regex::Regex;
use std::sync::LazyLock;
use tracing::{debug, trace};

use super::{Candidate, PlaylistDocument, PlaylistHeader, VlcOption, header_for_option};
use crate::ProbeError;

// Quoted values first; unquoted values run to the next whitespace.
static ATTRIBUTE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"([A-Za-z0-9_\-:]+)\s*=\s*(?:"([^"]*)"|([^\s",]+))"#).unwrap()
});

/// Parses extended M3U text into candidates, skipping anything malformed.
///
/// Never fails: a record without a URI line, a stray option or an unknown
/// directive outside a record is dropped and parsing continues.
pub fn parse(text: &str) -> Vec<Candidate> {
    scan(text, 0).1
}

/// Parses a whole playlist, rejecting input that is not a playlist at all.
pub fn parse_document(text: &str) -> Result<PlaylistDocument, ProbeError> {
    parse_document_at(text, 0)
}

/// Like [`parse_document`], numbering candidates from `first_seq` so several
/// inputs can be merged into one run.
pub fn parse_document_at(text: &str, first_seq: usize) -> Result<PlaylistDocument, ProbeError> {
    if text.trim().is_empty() {
        return Err(ProbeError::invalid_playlist("input is empty"));
    }

    let (header, candidates) = scan(text, first_seq);
    if header.is_none() && candidates.is_empty() {
        return Err(ProbeError::invalid_playlist(
            "no #EXTM3U header and no playable entries",
        ));
    }

    debug!(
        candidates = candidates.len(),
        has_header = header.is_some(),
        "Parsed playlist"
    );

    Ok(PlaylistDocument {
        header: header.unwrap_or_default(),
        candidates,
    })
}

#[derive(Debug)]
struct PendingRecord {
    duration: String,
    attributes: Vec<(String, String)>,
    title: String,
    options: Vec<VlcOption>,
    directives: Vec<String>,
    line: usize,
}

impl PendingRecord {
    fn from_extinf(body: &str, line: usize) -> Self {
        let (meta, title) = match split_outside_quotes(body, ',') {
            Some((meta, title)) => (meta, title.trim()),
            None => (body, ""),
        };

        let meta = meta.trim();
        let (duration, rest) = match meta.split_once(char::is_whitespace) {
            Some((first, rest)) if !first.contains('=') => (first, rest),
            None if !meta.is_empty() && !meta.contains('=') => (meta, ""),
            _ => ("-1", meta),
        };

        Self {
            duration: duration.to_owned(),
            attributes: parse_attributes(rest),
            title: title.to_owned(),
            options: Vec::new(),
            directives: Vec::new(),
            line,
        }
    }

    fn push_option(&mut self, body: &str) {
        match body.split_once('=') {
            Some((key, value)) => self.options.push(VlcOption {
                key: key.trim().to_owned(),
                value: value.trim().to_owned(),
            }),
            None => trace!(line = self.line, option = body, "Ignoring option without value"),
        }
    }

    fn finish(self, uri_line: &str, seq: usize) -> Candidate {
        let (url, suffix) = match uri_line.split_once('|') {
            Some((url, suffix)) => (url.trim(), Some(suffix.trim())),
            None => (uri_line, None),
        };

        let mut candidate = Candidate::new(self.title, url);
        candidate.seq = seq;
        candidate.duration = self.duration;
        candidate.attributes = self.attributes;
        candidate.directives = self.directives;

        for option in &self.options {
            if let Some(header) = header_for_option(&option.key)
                && !option.value.is_empty()
            {
                candidate.headers.insert(header.to_owned(), option.value.clone());
            }
        }
        candidate.options = self.options;

        // Inline options win over the #EXTVLCOPT lines above them.
        if let Some(suffix) = suffix.filter(|s| !s.is_empty()) {
            for pair in suffix.split(['|', '&']) {
                let Some((key, value)) = pair.split_once('=') else {
                    continue;
                };
                if let Some(header) = header_for_option(key) {
                    let value = urlencoding::decode(value.trim())
                        .map(|v| v.into_owned())
                        .unwrap_or_else(|_| value.trim().to_owned());
                    if !value.is_empty() {
                        candidate.headers.insert(header.to_owned(), value);
                    }
                }
            }
            candidate.url_suffix = Some(suffix.to_owned());
        }

        candidate
    }
}

fn scan(text: &str, first_seq: usize) -> (Option<PlaylistHeader>, Vec<Candidate>) {
    let text = text.strip_prefix('\u{feff}').unwrap_or(text);

    let mut header = None;
    let mut candidates = Vec::new();
    let mut pending: Option<PendingRecord> = None;
    let mut seq = first_seq;

    for (index, raw) in text.lines().enumerate() {
        let line = raw.trim();
        let line_no = index + 1;
        if line.is_empty() {
            continue;
        }

        if let Some(rest) = line.strip_prefix("#EXTM3U") {
            if header.is_none() && candidates.is_empty() && pending.is_none() {
                header = Some(PlaylistHeader {
                    attributes: parse_attributes(rest),
                });
            }
            continue;
        }

        if let Some(rest) = line.strip_prefix("#EXTINF:") {
            if let Some(dropped) = pending.take() {
                debug!(
                    line = dropped.line,
                    title = %dropped.title,
                    "Dropping #EXTINF record without a URI"
                );
            }
            pending = Some(PendingRecord::from_extinf(rest, line_no));
            continue;
        }

        if let Some(rest) = line.strip_prefix("#EXTVLCOPT:") {
            match pending.as_mut() {
                Some(record) => record.push_option(rest),
                None => trace!(line = line_no, "Ignoring #EXTVLCOPT outside a record"),
            }
            continue;
        }

        if line.starts_with('#') {
            match pending.as_mut() {
                Some(record) => record.directives.push(line.to_owned()),
                None => trace!(line = line_no, directive = line, "Ignoring directive outside a record"),
            }
            continue;
        }

        let record = match pending.take() {
            Some(record) => record,
            // A bare line only counts when it looks like a URL.
            None if line.contains("://") => PendingRecord::from_extinf("-1,", line_no),
            None => {
                trace!(line = line_no, "Ignoring text outside a record");
                continue;
            }
        };
        candidates.push(record.finish(line, seq));
        seq += 1;
    }

    if let Some(dropped) = pending {
        debug!(
            line = dropped.line,
            title = %dropped.title,
            "Dropping trailing #EXTINF record without a URI"
        );
    }

    (header, candidates)
}

fn parse_attributes(text: &str) -> Vec<(String, String)> {
    ATTRIBUTE_RE
        .captures_iter(text)
        .filter_map(|caps| {
            let key = caps.get(1)?.as_str().to_owned();
            let value = caps.get(2).or_else(|| caps.get(3))?.as_str().to_owned();
            Some((key, value))
        })
        .collect()
}

/// Splits at the first `sep` that is not inside double quotes.
fn split_outside_quotes(text: &str, sep: char) -> Option<(&str, &str)> {
    let mut in_quotes = false;
    for (idx, ch) in text.char_indices() {
        match ch {
            '"' => in_quotes = !in_quotes,
            c if c == sep && !in_quotes => {
                return Some((&text[..idx], &text[idx + sep.len_utf8()..]));
            }
            _ => {}
        }
    }
    None
}
