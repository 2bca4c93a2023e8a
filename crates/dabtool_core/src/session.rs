//! One article view: the registry extracted at load, the pending edit set,
//! and the save step that turns them into a submission.

use std::collections::BTreeSet;

use anyhow::{Result, bail};
use serde::Serialize;
use tracing::{debug, info};

use crate::batch::EditBatch;
use crate::candidates::candidates_from_dab_page;
use crate::config::DabtoolConfig;
use crate::edits::{Decision, EditSet};
use crate::error::CoreResult;
use crate::mediawiki::{EditOutcome, PageEdit, WikiReadApi, WikiWriteApi};
use crate::patch::{DisplayTextPolicy, DroppedEdit, PatchOutcome, patch_markup};
use crate::registry::{OccurrenceId, OccurrenceRegistry};
use crate::summary::{SummaryOptions, summarize};
use crate::wikitext::normalize_title;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionOptions {
    pub display_text: DisplayTextPolicy,
    pub summary: SummaryOptions,
    pub fetch_candidates: bool,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            display_text: DisplayTextPolicy::default(),
            summary: SummaryOptions::default(),
            fetch_candidates: true,
        }
    }
}

impl SessionOptions {
    pub fn from_config(config: &DabtoolConfig) -> Self {
        Self {
            display_text: config.display_text_policy(),
            summary: config.summary_options(),
            fetch_candidates: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BaseRevision {
    pub revision_id: i64,
    pub timestamp: String,
}

/// Patched markup and summary for the current edit set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Preview {
    pub patch: PatchOutcome,
    pub summary: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Submission {
    pub title: String,
    pub markup: String,
    pub summary: String,
    pub base_timestamp: Option<String>,
    pub dropped: Vec<DroppedEdit>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SaveReport {
    NothingToSave,
    Saved {
        outcome: EditOutcome,
        summary: String,
        dropped: Vec<DroppedEdit>,
    },
}

#[derive(Debug, Clone)]
pub struct DabSession {
    article: String,
    dab_titles: BTreeSet<String>,
    base: Option<BaseRevision>,
    markup: String,
    registry: OccurrenceRegistry,
    edits: EditSet,
    options: SessionOptions,
}

impl DabSession {
    /// Fetch `title`, extract its disambiguation links and, when enabled,
    /// attach candidates read from each disambiguation page.
    pub fn load<A>(api: &mut A, title: &str, options: SessionOptions) -> Result<Self>
    where
        A: WikiReadApi + ?Sized,
    {
        let article = api.fetch_article(title)?;
        let dab_titles = api.disambiguation_links(&article.title)?;
        debug!(
            title = %article.title,
            revision = article.revision_id,
            dab_links = dab_titles.len(),
            "loaded article"
        );

        let mut session = Self::from_markup(&article.title, article.content, &dab_titles, options);
        session.base = Some(BaseRevision {
            revision_id: article.revision_id,
            timestamp: article.timestamp,
        });

        if session.options.fetch_candidates && !session.registry.is_empty() {
            let titles = session.registry.dab_titles();
            let batch = api.fetch_pages(&titles)?;
            for page in &batch.pages {
                let candidates = candidates_from_dab_page(&page.title, &page.content);
                let title = normalize_title(&page.title);
                // occurrences may name the page through any redirect to it
                let mut updated = session.registry.set_candidates(&title, &candidates);
                for source in batch.redirects_to(&title) {
                    updated += session.registry.set_candidates(source, &candidates);
                }
                debug!(
                    page = %page.title,
                    candidates = candidates.len(),
                    occurrences = updated,
                    "attached candidates"
                );
            }
        }
        Ok(session)
    }

    /// Session over local markup with no wiki revision behind it.
    pub fn from_markup(
        article: &str,
        markup: String,
        dab_titles: &BTreeSet<String>,
        options: SessionOptions,
    ) -> Self {
        let registry = OccurrenceRegistry::build(&markup, |title| dab_titles.contains(title));
        let edits = EditSet::for_registry(&registry);
        Self {
            article: normalize_title(article),
            dab_titles: dab_titles.clone(),
            base: None,
            markup,
            registry,
            edits,
            options,
        }
    }

    pub fn article(&self) -> &str {
        &self.article
    }

    pub fn base_revision(&self) -> Option<&BaseRevision> {
        self.base.as_ref()
    }

    pub fn markup(&self) -> &str {
        &self.markup
    }

    pub fn registry(&self) -> &OccurrenceRegistry {
        &self.registry
    }

    pub fn edits(&self) -> &EditSet {
        &self.edits
    }

    pub fn set(&mut self, id: OccurrenceId, decision: Decision) -> CoreResult<()> {
        self.edits.set(&self.registry, id, decision)
    }

    pub fn cancel(&mut self, id: OccurrenceId) {
        self.edits.cancel(id);
    }

    /// Replace the pending edits with the contents of `batch`. The current
    /// edits survive when the batch is rejected.
    pub fn apply_batch(&mut self, batch: &EditBatch) -> Result<()> {
        if normalize_title(&batch.article) != self.article {
            bail!(
                "batch is for {:?} but the session holds {:?}",
                batch.article,
                self.article
            );
        }
        self.edits = batch.to_edit_set(&self.registry)?;
        Ok(())
    }

    pub fn to_batch(&self) -> CoreResult<EditBatch> {
        EditBatch::from_edit_set(&self.article, &self.registry, &self.edits)
    }

    pub fn preview(&self) -> CoreResult<Preview> {
        let resolved = self.edits.resolved(&self.registry)?;
        let patch = patch_markup(&self.markup, &resolved, self.options.display_text);
        let summary = summarize(
            patch
                .changed_edits()
                .map(|edit| (edit.original_target.as_str(), &edit.resolution)),
            &self.options.summary,
        );
        Ok(Preview { patch, summary })
    }

    /// `None` when the edit set would not change a single byte.
    pub fn prepare_submission(&self) -> CoreResult<Option<Submission>> {
        let Preview { patch, summary } = self.preview()?;
        let Some(summary) = summary else {
            return Ok(None);
        };
        if !patch.has_changes() {
            return Ok(None);
        }
        Ok(Some(Submission {
            title: self.article.clone(),
            markup: patch.markup,
            summary,
            base_timestamp: self.base.as_ref().map(|base| base.timestamp.clone()),
            dropped: patch.dropped,
        }))
    }

    /// Submit the patched article. Errors from `api` are returned as-is and
    /// leave the session untouched.
    ///
    /// A successful save moves the session onto the saved revision: the
    /// submitted markup becomes the session's markup and occurrences are
    /// extracted again, so ids and batches from before the save are stale.
    pub fn save<A>(&mut self, api: &mut A) -> Result<SaveReport>
    where
        A: WikiWriteApi + ?Sized,
    {
        let Some(submission) = self.prepare_submission()? else {
            info!(title = %self.article, "no effective edits, nothing to save");
            return Ok(SaveReport::NothingToSave);
        };

        let outcome = api.edit_page(&PageEdit {
            title: &submission.title,
            content: &submission.markup,
            summary: &submission.summary,
            base_timestamp: submission.base_timestamp.as_deref(),
        })?;
        info!(
            title = %outcome.title,
            revision = ?outcome.new_revision_id,
            no_change = outcome.no_change,
            "saved article"
        );

        let base = match (outcome.new_revision_id, outcome.new_timestamp.clone()) {
            (Some(revision_id), Some(timestamp)) => Some(BaseRevision {
                revision_id,
                timestamp,
            }),
            _ => self.base.take(),
        };
        self.rebase(submission.markup, base);
        Ok(SaveReport::Saved {
            outcome,
            summary: submission.summary,
            dropped: submission.dropped,
        })
    }
}

impl DabSession {
    fn rebase(&mut self, markup: String, base: Option<BaseRevision>) {
        let mut registry =
            OccurrenceRegistry::build(&markup, |title| self.dab_titles.contains(title));
        for title in registry.dab_titles() {
            if let Some(previous) = self
                .registry
                .ordered()
                .iter()
                .find(|occurrence| occurrence.target_title == title)
            {
                registry.set_candidates(&title, &previous.candidates);
            }
        }
        debug!(
            title = %self.article,
            occurrences = registry.len(),
            "rebased session on saved markup"
        );
        self.edits = EditSet::for_registry(&registry);
        self.registry = registry;
        self.markup = markup;
        self.base = base;
    }
}

#[cfg(test)]
mod tests {
    use std::collections::{BTreeMap, BTreeSet};

    use anyhow::{Result, bail};

    use super::{DabSession, SaveReport, SessionOptions};
    use crate::batch::{BatchChoice, BatchEntry, EditBatch};
    use crate::edits::Decision;
    use crate::error::CoreError;
    use crate::mediawiki::{
        ArticleRevision, EditOutcome, PageBatch, PageEdit, WikiReadApi, WikiWriteApi,
    };

    const ARTICLE: &str = "Roman gods and planets. See [[Mercury (planet)|Mercury]] and [[Mercury]].\n\
                           The island of [[Java]] is not [[java|the language]].";

    #[derive(Debug, Clone, PartialEq, Eq)]
    struct SavedEdit {
        title: String,
        content: String,
        summary: String,
        base_timestamp: Option<String>,
    }

    #[derive(Default)]
    struct MockApi {
        pages: BTreeMap<String, String>,
        redirects: BTreeMap<String, String>,
        dab_titles: BTreeSet<String>,
        saved: Vec<SavedEdit>,
        fail_edits: bool,
        requests: usize,
    }

    impl MockApi {
        fn with_article() -> Self {
            let mut api = Self::default();
            api.pages.insert("Planets".to_string(), ARTICLE.to_string());
            api.pages.insert(
                "Mercury".to_string(),
                "'''Mercury''' may refer to:\n* [[Mercury (planet)]], a planet\n* [[Mercury (mythology)]], a Roman god\n{{disambiguation}}".to_string(),
            );
            api.pages.insert(
                "Java".to_string(),
                "* [[Java (island)]]\n* [[Java (programming language)]]".to_string(),
            );
            api.dab_titles = BTreeSet::from(["Mercury".to_string(), "Java".to_string()]);
            api
        }

        fn revision(&self, title: &str) -> Option<ArticleRevision> {
            self.pages.get(title).map(|content| ArticleRevision {
                title: title.to_string(),
                revision_id: 100,
                timestamp: "2026-10-01T12:00:00Z".to_string(),
                content: content.clone(),
            })
        }
    }

    impl WikiReadApi for MockApi {
        fn fetch_article(&mut self, title: &str) -> Result<ArticleRevision> {
            self.requests += 1;
            match self.revision(title) {
                Some(revision) => Ok(revision),
                None => bail!("article not found on wiki: {title}"),
            }
        }

        fn fetch_pages(&mut self, titles: &[String]) -> Result<PageBatch> {
            self.requests += 1;
            let mut batch = PageBatch::default();
            for title in titles {
                let resolved = match self.redirects.get(title) {
                    Some(target) => {
                        batch.redirects.insert(title.clone(), target.clone());
                        target.clone()
                    }
                    None => title.clone(),
                };
                if batch.pages.iter().any(|page| page.title == resolved) {
                    continue;
                }
                if let Some(revision) = self.revision(&resolved) {
                    batch.pages.push(revision);
                }
            }
            Ok(batch)
        }

        fn disambiguation_links(&mut self, _title: &str) -> Result<BTreeSet<String>> {
            self.requests += 1;
            Ok(self.dab_titles.clone())
        }

        fn request_count(&self) -> usize {
            self.requests
        }
    }

    impl WikiWriteApi for MockApi {
        fn login(&mut self, _username: &str, _password: &str) -> Result<()> {
            Ok(())
        }

        fn edit_page(&mut self, edit: &PageEdit<'_>) -> Result<EditOutcome> {
            self.requests += 1;
            if self.fail_edits {
                bail!("MediaWiki API error [editconflict]: Edit conflict detected.");
            }
            let revision = 101 + self.saved.len() as i64;
            self.saved.push(SavedEdit {
                title: edit.title.to_string(),
                content: edit.content.to_string(),
                summary: edit.summary.to_string(),
                base_timestamp: edit.base_timestamp.map(ToString::to_string),
            });
            self.pages.insert(edit.title.to_string(), edit.content.to_string());
            Ok(EditOutcome {
                title: edit.title.to_string(),
                new_revision_id: Some(revision),
                new_timestamp: Some(format!("2026-10-01T12:{:02}:00Z", self.saved.len())),
                no_change: false,
            })
        }
    }

    fn offline(markup: &str, dab: &[&str]) -> DabSession {
        let dab_titles: BTreeSet<String> = dab.iter().map(|title| (*title).to_string()).collect();
        DabSession::from_markup(
            "Planets",
            markup.to_string(),
            &dab_titles,
            SessionOptions::default(),
        )
    }

    #[test]
    fn load_extracts_occurrences_and_attaches_candidates() {
        let mut api = MockApi::with_article();
        let session =
            DabSession::load(&mut api, "Planets", SessionOptions::default()).expect("load");

        let occurrences = session.registry().ordered();
        assert_eq!(occurrences.len(), 3);
        assert_eq!(occurrences[0].target_title, "Mercury");
        assert_eq!(occurrences[1].target_title, "Java");
        assert_eq!(occurrences[2].surface_text, "the language");
        assert_eq!(
            occurrences[0]
                .candidates
                .iter()
                .map(|candidate| candidate.title.as_str())
                .collect::<Vec<_>>(),
            vec!["Mercury (planet)", "Mercury (mythology)"]
        );
        assert_eq!(occurrences[2].candidates.len(), 2);
        assert_eq!(
            session.base_revision().map(|base| base.revision_id),
            Some(100)
        );
    }

    #[test]
    fn load_without_candidates_skips_page_fetch() {
        let mut api = MockApi::with_article();
        let options = SessionOptions {
            fetch_candidates: false,
            ..SessionOptions::default()
        };
        let session = DabSession::load(&mut api, "Planets", options).expect("load");
        assert_eq!(api.request_count(), 2);
        assert!(
            session
                .registry()
                .ordered()
                .iter()
                .all(|occurrence| occurrence.candidates.is_empty())
        );
    }

    #[test]
    fn missing_article_fails_to_load() {
        let mut api = MockApi::with_article();
        assert!(DabSession::load(&mut api, "Nowhere", SessionOptions::default()).is_err());
    }

    #[test]
    fn empty_edit_set_never_reaches_the_wiki() {
        let mut api = MockApi::with_article();
        let mut session =
            DabSession::load(&mut api, "Planets", SessionOptions::default()).expect("load");
        let before = api.request_count();

        let report = session.save(&mut api).expect("save");
        assert_eq!(report, SaveReport::NothingToSave);
        assert_eq!(api.request_count(), before);
        assert!(api.saved.is_empty());
    }

    #[test]
    fn retarget_to_same_title_is_not_submitted() {
        let mut api = MockApi::with_article();
        let mut session =
            DabSession::load(&mut api, "Planets", SessionOptions::default()).expect("load");
        session
            .set(1, Decision::ReplaceWith("Java".to_string()))
            .expect("set");

        assert_eq!(session.save(&mut api).expect("save"), SaveReport::NothingToSave);
        assert!(api.saved.is_empty());
    }

    #[test]
    fn successful_save_submits_patch_and_clears_edits() {
        let mut api = MockApi::with_article();
        let mut session =
            DabSession::load(&mut api, "Planets", SessionOptions::default()).expect("load");
        session.set(1, Decision::Unlink).expect("set");
        session
            .set(0, Decision::ReplaceWith("Mercury (mythology)".to_string()))
            .expect("set");

        let report = session.save(&mut api).expect("save");
        let SaveReport::Saved { summary, dropped, .. } = report else {
            panic!("expected a save");
        };
        assert!(dropped.is_empty());
        assert_eq!(
            summary,
            "Disambiguated 2 links: Mercury → Mercury (mythology), Java → unlinked"
        );
        assert_eq!(api.saved.len(), 1);
        assert_eq!(
            api.saved[0].content,
            "Roman gods and planets. See [[Mercury (planet)|Mercury]] and [[Mercury (mythology)|Mercury]].\n\
             The island of Java is not [[java|the language]]."
        );
        assert_eq!(
            api.saved[0].base_timestamp.as_deref(),
            Some("2026-10-01T12:00:00Z")
        );
        assert!(session.edits().is_empty());
    }

    #[test]
    fn failed_save_keeps_edits() {
        let mut api = MockApi::with_article();
        let mut session =
            DabSession::load(&mut api, "Planets", SessionOptions::default()).expect("load");
        session.set(2, Decision::Unlink).expect("set");
        api.fail_edits = true;

        let error = session.save(&mut api).expect_err("must fail");
        assert!(error.to_string().contains("editconflict"));
        assert_eq!(session.edits().len(), 1);
        assert_eq!(session.edits().decision(2), Decision::Unlink);
    }

    #[test]
    fn batch_replaces_pending_edits() {
        let mut session = offline("[[Mercury]] and [[Java]]", &["Mercury", "Java"]);
        session.set(0, Decision::Unlink).expect("set");

        let mut batch = EditBatch::empty("Planets", session.registry());
        batch.edits.push(BatchEntry {
            occurrence: 1,
            original_target: "Java".to_string(),
            choice: BatchChoice::ReplaceWith("Java (island)".to_string()),
        });
        session.apply_batch(&batch).expect("apply");

        assert_eq!(session.edits().decision(0), Decision::Unset);
        let preview = session.preview().expect("preview");
        assert_eq!(preview.patch.markup, "[[Mercury]] and [[Java (island)|Java]]");
        assert_eq!(
            session.to_batch().expect("batch").edits,
            batch.edits
        );
    }

    #[test]
    fn rejected_batch_leaves_edits_alone() {
        let mut session = offline("[[Mercury]] and [[Java]]", &["Mercury", "Java"]);
        session.set(0, Decision::Unlink).expect("set");

        let mut stale = EditBatch::empty("Planets", session.registry());
        stale.load_id = "f".repeat(64);
        let error = session.apply_batch(&stale).expect_err("stale");
        assert!(matches!(
            error.downcast_ref::<CoreError>(),
            Some(CoreError::StaleEditSet { .. })
        ));

        let other_article = EditBatch::empty("Moons", session.registry());
        assert!(session.apply_batch(&other_article).is_err());
        assert_eq!(session.edits().decision(0), Decision::Unlink);
    }

    #[test]
    fn set_then_cancel_is_the_same_as_never_set() {
        let mut session = offline("[[Mercury]]", &["Mercury"]);
        let untouched = session.preview().expect("preview");
        session.set(0, Decision::Unlink).expect("set");
        session.cancel(0);
        assert_eq!(session.preview().expect("preview"), untouched);
        assert_eq!(untouched.summary, None);
    }

    #[test]
    fn summary_follows_document_order_not_decision_order() {
        let mut session = offline("[[Java]] [[Mercury]]", &["Mercury", "Java"]);
        session.set(1, Decision::Unlink).expect("set");
        session.set(0, Decision::Unlink).expect("set");
        let summary = session.preview().expect("preview").summary.expect("summary");
        assert_eq!(
            summary,
            "Disambiguated 2 links: Java → unlinked, Mercury → unlinked"
        );
    }

    #[test]
    fn second_save_builds_on_the_first() {
        let mut api = MockApi::default();
        let mut session = offline("[[Java]] [[Mercury]]", &["Mercury", "Java"]);
        let first_load = session.registry().load_id().to_string();

        session.set(0, Decision::Unlink).expect("set");
        assert!(matches!(
            session.save(&mut api).expect("first save"),
            SaveReport::Saved { .. }
        ));
        assert_eq!(session.markup(), "Java [[Mercury]]");
        assert_ne!(session.registry().load_id(), first_load);
        assert_eq!(session.registry().len(), 1);
        assert_eq!(session.registry().ordered()[0].target_title, "Mercury");
        assert!(matches!(
            session.set(1, Decision::Unlink),
            Err(CoreError::InvalidReference { id: 1, .. })
        ));

        session.set(0, Decision::Unlink).expect("set");
        session.save(&mut api).expect("second save");
        assert_eq!(
            api.saved
                .iter()
                .map(|edit| edit.content.as_str())
                .collect::<Vec<_>>(),
            vec!["Java [[Mercury]]", "Java Mercury"]
        );
    }

    #[test]
    fn batch_from_before_a_save_is_stale() {
        let mut api = MockApi::default();
        let mut session = offline("[[Java]] [[Mercury]]", &["Mercury", "Java"]);
        let mut old_batch = EditBatch::empty("Planets", session.registry());
        old_batch.edits.push(BatchEntry {
            occurrence: 1,
            original_target: "Mercury".to_string(),
            choice: BatchChoice::Unlink,
        });

        session.set(0, Decision::Unlink).expect("set");
        session.save(&mut api).expect("save");
        let error = session.apply_batch(&old_batch).expect_err("stale");
        assert!(matches!(
            error.downcast_ref::<CoreError>(),
            Some(CoreError::StaleEditSet { .. })
        ));
    }

    #[test]
    fn save_moves_base_revision_forward() {
        let mut api = MockApi::with_article();
        let mut session =
            DabSession::load(&mut api, "Planets", SessionOptions::default()).expect("load");
        session.set(0, Decision::Unlink).expect("set");
        session.save(&mut api).expect("first save");

        let base = session.base_revision().expect("base");
        assert_eq!(base.revision_id, 101);
        assert_eq!(base.timestamp, "2026-10-01T12:01:00Z");
        assert_eq!(
            session.registry().ordered()[0].candidates.len(),
            2,
            "candidates survive the save"
        );

        session.set(0, Decision::Unlink).expect("set");
        session.save(&mut api).expect("second save");
        assert_eq!(
            api.saved[1].base_timestamp.as_deref(),
            Some("2026-10-01T12:01:00Z")
        );
        assert!(!api.saved[1].content.contains("[[Java]]"));
        assert!(!api.saved[1].content.contains("[[Mercury]]"));
    }

    #[test]
    fn redirected_links_get_candidates_of_their_target() {
        let mut api = MockApi::with_article();
        api.pages.insert(
            "Planets".to_string(),
            "[[Quicksilver]] is liquid, [[Mercury]] is a god.".to_string(),
        );
        api.redirects
            .insert("Quicksilver".to_string(), "Mercury".to_string());
        api.dab_titles.insert("Quicksilver".to_string());

        let session =
            DabSession::load(&mut api, "Planets", SessionOptions::default()).expect("load");
        let occurrences = session.registry().ordered();
        assert_eq!(occurrences.len(), 2);
        assert_eq!(occurrences[0].target_title, "Quicksilver");
        assert_eq!(occurrences[0].candidates, occurrences[1].candidates);
        assert_eq!(occurrences[0].candidates.len(), 2);
    }
}
