use std::fmt::Write as _;

use super::{Candidate, PlaylistHeader};

/// Appends the `#EXTM3U` line with its attributes.
pub fn write_header(out: &mut String, header: &PlaylistHeader) {
    out.push_str("#EXTM3U");
    write_attributes(out, &header.attributes);
    out.push('\n');
}

/// Appends one entry: `#EXTINF`, its options and directives, then the URL line.
pub fn write_candidate(out: &mut String, candidate: &Candidate) {
    let _ = write!(out, "#EXTINF:{}", candidate.duration);
    write_attributes(out, &candidate.attributes);
    let _ = writeln!(out, ",{}", candidate.title);

    for option in &candidate.options {
        let _ = writeln!(out, "#EXTVLCOPT:{}={}", option.key, option.value);
    }
    for directive in &candidate.directives {
        out.push_str(directive);
        out.push('\n');
    }

    out.push_str(&candidate.url);
    if let Some(suffix) = &candidate.url_suffix {
        out.push('|');
        out.push_str(suffix);
    }
    out.push('\n');
}

fn write_attributes(out: &mut String, attributes: &[(String, String)]) {
    for (key, value) in attributes {
        // Values are always written quoted; an embedded quote would end the value early.
        let _ = write!(out, " {}=\"{}\"", key, value.replace('"', "'"));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::playlist::{VlcOption, parse_document};
    use proptest::prelude::*;

    #[test]
    fn writes_entry_with_options_and_suffix() {
        let mut candidate = Candidate::new("News", "http://a.example.com/n.ts");
        candidate.attributes = vec![("tvg-id".to_string(), "n1".to_string())];
        candidate.options = vec![VlcOption {
            key: "http-referrer".to_string(),
            value: "https://portal/".to_string(),
        }];
        candidate.url_suffix = Some("user-agent=Kodi".to_string());

        let mut out = String::new();
        write_candidate(&mut out, &candidate);
        assert_eq!(
            out,
            "#EXTINF:-1 tvg-id=\"n1\",News\n#EXTVLCOPT:http-referrer=https://portal/\nhttp://a.example.com/n.ts|user-agent=Kodi\n"
        );
    }

    #[test]
    fn written_entries_parse_back_to_the_same_record() {
        let text = "#EXTM3U x-tvg-url=\"http://epg/\"\n\
#EXTINF:-1 tvg-id=abc group-title=\"Sports\",Match, Live\n\
#EXTVLCOPT:http-origin=https://origin.example.com\n\
#KODIPROP:inputstream=adaptive\n\
http://s.example.com/live.m3u8\n";
        let doc = parse_document(text).unwrap();

        let mut out = String::new();
        write_header(&mut out, &doc.header);
        for candidate in &doc.candidates {
            write_candidate(&mut out, candidate);
        }

        let reparsed = parse_document(&out).unwrap();
        assert_eq!(reparsed, doc);
        assert!(out.contains("tvg-id=\"abc\""));
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn prop_written_entries_reparse_identically(
            entries in prop::collection::vec(
                (
                    "[A-Za-z0-9]([A-Za-z0-9 ,]{0,18}[A-Za-z0-9])?",
                    "[a-z][a-z-]{0,8}",
                    "[A-Za-z0-9 ./:,-]{0,16}",
                ),
                1..8,
            )
        ) {
            let candidates: Vec<Candidate> = entries
                .into_iter()
                .enumerate()
                .map(|(seq, (title, key, value))| {
                    let mut candidate = Candidate::new(title, format!("http://h{seq}.example.com/s.ts"));
                    candidate.seq = seq;
                    candidate.attributes = vec![(key, value)];
                    candidate
                })
                .collect();

            let mut out = String::new();
            write_header(&mut out, &PlaylistHeader::default());
            for candidate in &candidates {
                write_candidate(&mut out, candidate);
            }

            let reparsed = parse_document(&out).unwrap();
            prop_assert_eq!(reparsed.candidates, candidates);
        }
    }
}
