// Extended M3U model: the candidate records read from and written back to playlist text.

mod parser;
mod writer;

use serde::Serialize;
use std::collections::BTreeMap;
use url::Url;

pub use parser::{parse, parse_document, parse_document_at};
pub use writer::{write_candidate, write_header};

/// One `#EXTVLCOPT:key=value` line, kept verbatim for output
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VlcOption {
    pub key: String,
    pub value: String,
}

/// One playlist entry awaiting verification
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Candidate {
    /// Position in the input, across all inputs of a run
    pub seq: usize,
    pub title: String,
    /// Raw `#EXTINF` duration token, usually `-1`
    pub duration: String,
    /// `#EXTINF` attributes in their original order
    pub attributes: Vec<(String, String)>,
    /// Outbound request headers derived from the recognised options
    pub headers: BTreeMap<String, String>,
    pub options: Vec<VlcOption>,
    /// Other `#` lines that appeared inside the record
    pub directives: Vec<String>,
    pub url: String,
    /// Inline `|key=value` options that followed the URL
    pub url_suffix: Option<String>,
}

impl Candidate {
    pub fn new(title: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            seq: 0,
            title: title.into(),
            duration: "-1".to_owned(),
            attributes: Vec::new(),
            headers: BTreeMap::new(),
            options: Vec::new(),
            directives: Vec::new(),
            url: url.into(),
            url_suffix: None,
        }
    }

    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_str())
    }

    /// Replaces the attribute in place, or appends it when absent.
    pub fn set_attribute(&mut self, key: &str, value: impl Into<String>) {
        let value = value.into();
        match self
            .attributes
            .iter_mut()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
        {
            Some((_, existing)) => *existing = value,
            None => self.attributes.push((key.to_owned(), value)),
        }
    }

    /// Host gate key: lowercase host plus port, `None` for unusable URLs.
    pub fn host_key(&self) -> Option<String> {
        let url = Url::parse(&self.url).ok()?;
        let host = url.host_str()?.to_ascii_lowercase();
        Some(match url.port_or_known_default() {
            Some(port) => format!("{host}:{port}"),
            None => host,
        })
    }
}

/// Attributes of the leading `#EXTM3U` line
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PlaylistHeader {
    pub attributes: Vec<(String, String)>,
}

/// A parsed playlist: header plus candidates in file order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlaylistDocument {
    pub header: PlaylistHeader,
    pub candidates: Vec<Candidate>,
}

/// Maps an option key onto the outbound header it controls.
///
/// Covers both the `#EXTVLCOPT:http-*` spelling and the bare keys used after
/// a `|` on the URL line.
pub(crate) fn header_for_option(key: &str) -> Option<&'static str> {
    match key.trim().to_ascii_lowercase().as_str() {
        "http-referrer" | "http-referer" | "referrer" | "referer" => Some("Referer"),
        "http-origin" | "origin" => Some("Origin"),
        "http-user-agent" | "user-agent" => Some("User-Agent"),
        _ => None,
    }
}
