use serde::{Deserialize, Serialize};

use crate::wikitext::{normalize_title, scan_links};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candidate {
    pub title: String,
    pub description: String,
}

/// Candidate targets listed on a disambiguation page: the first body link of
/// each bulleted entry, in page order, without duplicates.
pub fn candidates_from_dab_page(page_title: &str, markup: &str) -> Vec<Candidate> {
    let page_title = normalize_title(page_title);
    let mut out: Vec<Candidate> = Vec::new();

    for line in markup.lines() {
        let Some(entry) = line.trim_start().strip_prefix('*') else {
            continue;
        };
        let entry = entry.trim_start_matches('*').trim();
        let Some(first) = scan_links(entry).into_iter().next() else {
            continue;
        };
        let title = first.target_title.clone();
        if title == page_title
            || title.ends_with(" (disambiguation)")
            || out.iter().any(|candidate| candidate.title == title)
        {
            continue;
        }
        out.push(Candidate {
            title,
            description: plain_text(entry),
        });
    }

    out
}

fn plain_text(entry: &str) -> String {
    let mut output = String::with_capacity(entry.len());
    let mut cursor = 0usize;
    for link in scan_links(entry) {
        output.push_str(&entry[cursor..link.span.start]);
        output.push_str(link.surface_text());
        cursor = link.span.end;
    }
    output.push_str(&entry[cursor..]);
    output.replace("'''", "").replace("''", "").trim().to_string()
}
