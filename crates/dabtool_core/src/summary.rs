use crate::edits::Resolution;

/// MediaWiki rejects edit summaries longer than 500 characters.
pub const DEFAULT_SUMMARY_MAX_CHARS: usize = 500;
/// Room for the shortest summary, `Disambiguated 1 link`.
pub const MIN_SUMMARY_MAX_CHARS: usize = 20;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SummaryOptions {
    pub max_chars: usize,
    pub suffix: Option<String>,
}

impl Default for SummaryOptions {
    fn default() -> Self {
        Self {
            max_chars: DEFAULT_SUMMARY_MAX_CHARS,
            suffix: None,
        }
    }
}

struct Entry<'a> {
    from: &'a str,
    to: &'a str,
    count: usize,
}

/// Single-line summary of `(original_target, resolution)` pairs, listed in
/// the order given. Returns `None` when there is nothing to describe. Bounds
/// below `MIN_SUMMARY_MAX_CHARS` are raised to it.
pub fn summarize<'a, I>(items: I, options: &SummaryOptions) -> Option<String>
where
    I: IntoIterator<Item = (&'a str, &'a Resolution)>,
{
    let max_chars = options.max_chars.max(MIN_SUMMARY_MAX_CHARS);
    let mut total = 0usize;
    let mut entries: Vec<Entry<'a>> = Vec::new();
    for (from, resolution) in items {
        total += 1;
        let to = match resolution {
            Resolution::ReplaceWith(title) => title.as_str(),
            Resolution::Unlink => "unlinked",
        };
        match entries
            .iter_mut()
            .find(|entry| entry.from == from && entry.to == to)
        {
            Some(entry) => entry.count += 1,
            None => entries.push(Entry { from, to, count: 1 }),
        }
    }
    if total == 0 {
        return None;
    }

    let noun = if total == 1 { "link" } else { "links" };
    let suffix = options.suffix.as_deref().unwrap_or("");
    let rendered = entries.iter().map(render_entry).collect::<Vec<_>>();

    for shown in (1..=rendered.len()).rev() {
        let mut line = format!(
            "Disambiguated {total} {noun}: {}",
            rendered[..shown].join(", ")
        );
        let hidden = rendered.len() - shown;
        if hidden > 0 {
            line.push_str(&format!(", and {hidden} more"));
        }
        line.push_str(suffix);
        if line.chars().count() <= max_chars {
            return Some(line);
        }
    }

    let bare = format!("Disambiguated {total} {noun}{suffix}");
    Some(bare.chars().take(max_chars).collect())
}

fn render_entry(entry: &Entry<'_>) -> String {
    if entry.count > 1 {
        format!("{} → {} (×{})", entry.from, entry.to, entry.count)
    } else {
        format!("{} → {}", entry.from, entry.to)
    }
}

#[cfg(test)]
mod tests {
    use super::{SummaryOptions, summarize};
    use crate::edits::Resolution;

    fn replace(title: &str) -> Resolution {
        Resolution::ReplaceWith(title.to_string())
    }

    #[test]
    fn empty_input_has_no_summary() {
        let items = Vec::<(&str, &Resolution)>::new();
        assert_eq!(summarize(items, &SummaryOptions::default()), None);
    }

    #[test]
    fn lists_pairs_in_given_order() {
        let first = replace("Mercury (mythology)");
        let second = Resolution::Unlink;
        let summary = summarize(
            [("Mercury", &first), ("Java", &second)],
            &SummaryOptions::default(),
        );
        assert_eq!(
            summary.as_deref(),
            Some("Disambiguated 2 links: Mercury → Mercury (mythology), Java → unlinked")
        );
    }

    #[test]
    fn single_link_uses_singular_and_suffix() {
        let unlink = Resolution::Unlink;
        let summary = summarize(
            [("Java", &unlink)],
            &SummaryOptions {
                suffix: Some(" (using dabtool)".to_string()),
                ..SummaryOptions::default()
            },
        );
        assert_eq!(
            summary.as_deref(),
            Some("Disambiguated 1 link: Java → unlinked (using dabtool)")
        );
    }

    #[test]
    fn repeated_pairs_are_grouped_but_counted() {
        let island = replace("Java (island)");
        let language = replace("Java (programming language)");
        let summary = summarize(
            [("Java", &island), ("Java", &language), ("Java", &island)],
            &SummaryOptions::default(),
        );
        assert_eq!(
            summary.as_deref(),
            Some(
                "Disambiguated 3 links: Java → Java (island) (×2), Java → Java (programming language)"
            )
        );
    }

    #[test]
    fn long_lists_are_truncated_with_remainder_count() {
        let targets = (0..40)
            .map(|index| replace(&format!("Target number {index}")))
            .collect::<Vec<_>>();
        let sources = (0..40)
            .map(|index| format!("Source {index}"))
            .collect::<Vec<_>>();
        let options = SummaryOptions {
            max_chars: 120,
            suffix: None,
        };
        let summary = summarize(
            sources.iter().map(String::as_str).zip(targets.iter()),
            &options,
        )
        .expect("summary");

        assert!(summary.chars().count() <= 120, "{summary}");
        assert!(summary.starts_with("Disambiguated 40 links: Source 0 → Target number 0"));
        assert!(summary.contains(" more"), "{summary}");
    }

    #[test]
    fn tiny_bound_falls_back_to_count_only() {
        let unlink = Resolution::Unlink;
        let summary = summarize(
            [("A very long title indeed", &unlink)],
            &SummaryOptions {
                max_chars: 25,
                suffix: None,
            },
        )
        .expect("summary");
        assert_eq!(summary, "Disambiguated 1 link");
    }

    #[test]
    fn zero_bound_still_yields_a_summary() {
        let unlink = Resolution::Unlink;
        let summary = summarize(
            [("Java", &unlink)],
            &SummaryOptions {
                max_chars: 0,
                suffix: Some(" (using dabtool)".to_string()),
            },
        )
        .expect("summary");
        assert_eq!(summary, "Disambiguated 1 link");
    }
}
