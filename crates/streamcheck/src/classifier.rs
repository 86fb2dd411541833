//! Filters probe results down to the entries worth keeping, then groups and
//! orders them into the output playlist.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashSet};
use std::sync::LazyLock;

use regex::Regex;
use tracing::debug;

use crate::config::{ClassifierConfig, SortOrder};
use crate::playlist::{PlaylistHeader, write_candidate, write_header};
use crate::probe::{Outcome, ProbeResult};

const GROUP_ATTRIBUTE: &str = "group-title";
const CHANNEL_NUMBER_ATTRIBUTE: &str = "tvg-chno";

static QUALITY_PREFIX_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^\s*[\[(]?\s*(?:8k|4k|uhd|fhd|hd|sd|\d{3,4}[pi])\b\s*[\])]?\s*[:|\-]*\s*").unwrap()
});
static QUALITY_TAG_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^(?:8k|4k|uhd|fhd|hd|sd|\d{3,4}[pi])$").unwrap());
static BRACKET_LABEL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*\[([^\]]+)\]").unwrap());
static WHITESPACE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());

/// A named group of output entries, already ordered
#[derive(Debug, Clone, PartialEq)]
pub struct Group {
    pub name: String,
    pub members: Vec<ProbeResult>,
}

/// The classified output
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Playlist {
    pub header: PlaylistHeader,
    /// Groups in lexicographic order of name
    pub groups: Vec<Group>,
}

impl Playlist {
    pub fn len(&self) -> usize {
        self.groups.iter().map(|g| g.members.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.iter().all(|g| g.members.is_empty())
    }

    /// Entries in output order
    pub fn entries(&self) -> impl Iterator<Item = &ProbeResult> {
        self.groups.iter().flat_map(|g| g.members.iter())
    }

    /// Renders the playlist as extended M3U text.
    pub fn to_m3u(&self) -> String {
        let mut out = String::new();
        write_header(&mut out, &self.header);
        for entry in self.entries() {
            write_candidate(&mut out, &entry.candidate);
        }
        out
    }
}

pub struct Classifier {
    config: ClassifierConfig,
}

impl Classifier {
    pub fn new(config: ClassifierConfig) -> Self {
        Self { config }
    }

    /// Builds the output playlist from probe results in any order.
    ///
    /// The result depends only on the set of results, never on the order
    /// they finished in.
    pub fn classify(&self, mut results: Vec<ProbeResult>) -> Playlist {
        results.sort_by_key(|r| r.candidate.seq);
        let total = results.len();

        let mut seen = HashSet::new();
        let mut groups: BTreeMap<String, Vec<ProbeResult>> = BTreeMap::new();
        for mut result in results {
            if !self.keeps(result.verdict.outcome) {
                continue;
            }
            if !seen.insert(result.candidate.url.clone()) {
                debug!(url = %result.candidate.url, seq = result.candidate.seq, "Dropping duplicate URL");
                continue;
            }

            let group = self.group_for(&result);
            result.candidate.set_attribute(GROUP_ATTRIBUTE, group.as_str());
            groups.entry(group).or_default().push(result);
        }

        let mut groups: Vec<Group> = groups
            .into_iter()
            .map(|(name, mut members)| {
                members.sort_by(|a, b| self.compare(a, b));
                Group { name, members }
            })
            .collect();

        if let Some(start) = self.config.number_channels {
            let numbers = (start..).map(|n| n.to_string());
            let members = groups.iter_mut().flat_map(|g| g.members.iter_mut());
            for (member, number) in members.zip(numbers) {
                member.candidate.set_attribute(CHANNEL_NUMBER_ATTRIBUTE, number);
            }
        }

        let playlist = Playlist {
            header: PlaylistHeader::default(),
            groups,
        };
        debug!(
            results = total,
            kept = playlist.len(),
            groups = playlist.groups.len(),
            "Classified probe results"
        );
        playlist
    }

    fn keeps(&self, outcome: Outcome) -> bool {
        match outcome {
            Outcome::Live => true,
            Outcome::TooSlow => self.config.keep_too_slow,
            Outcome::Unknown => self.config.keep_unknown,
            Outcome::Dead => false,
        }
    }

    /// Keyword table, then a leading `[Label]`, then the entry's own group,
    /// then the default.
    fn group_for(&self, result: &ProbeResult) -> String {
        let title = result.candidate.title.as_str();
        let lowered = title.to_lowercase();

        if let Some(rule) = self
            .config
            .group_keywords
            .iter()
            .find(|rule| !rule.keyword.is_empty() && lowered.contains(&rule.keyword.to_lowercase()))
        {
            return rule.group.clone();
        }

        if self.config.bracket_groups
            && let Some(caps) = BRACKET_LABEL_RE.captures(title)
        {
            let label = caps[1].trim();
            if !label.is_empty() && !QUALITY_TAG_RE.is_match(label) {
                return label.to_owned();
            }
        }

        match result.candidate.attribute(GROUP_ATTRIBUTE).map(str::trim) {
            Some(existing) if !existing.is_empty() => existing.to_owned(),
            _ => self.config.default_group.clone(),
        }
    }

    fn compare(&self, a: &ProbeResult, b: &ProbeResult) -> Ordering {
        let by_title = || {
            normalize_title(&a.candidate.title)
                .cmp(&normalize_title(&b.candidate.title))
                .then_with(|| a.candidate.url.cmp(&b.candidate.url))
        };
        match self.config.sort_order {
            SortOrder::Title => by_title(),
            SortOrder::Latency => match (a.verdict.ttfb, b.verdict.ttfb) {
                (Some(x), Some(y)) => x.cmp(&y),
                (Some(_), None) => Ordering::Less,
                (None, Some(_)) => Ordering::Greater,
                (None, None) => Ordering::Equal,
            }
            .then_with(by_title),
            SortOrder::Throughput => match (a.verdict.throughput_kbps, b.verdict.throughput_kbps) {
                (Some(x), Some(y)) => y.total_cmp(&x),
                (Some(_), None) => Ordering::Less,
                (None, Some(_)) => Ordering::Greater,
                (None, None) => Ordering::Equal,
            }
            .then_with(by_title),
        }
    }
}

/// Sort key for titles: quality prefix removed, case and spacing folded.
pub fn normalize_title(title: &str) -> String {
    let stripped = QUALITY_PREFIX_RE.replace(title, "");
    WHITESPACE_RE
        .replace_all(stripped.trim(), " ")
        .to_lowercase()
}
