use std::collections::BTreeSet;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{Args, CommandFactory, Parser, Subcommand};
use dabtool_core::batch::EditBatch;
use dabtool_core::config::{ConfigLocation, DabtoolConfig, load_config, resolve_config_path};
use dabtool_core::mediawiki::{
    MediaWikiClient, MediaWikiClientConfig, WikiReadApi, WikiWriteApi, credentials_from_env,
};
use dabtool_core::patch::DroppedEdit;
use dabtool_core::registry::Occurrence;
use dabtool_core::session::{DabSession, Preview, SaveReport, SessionOptions};
use dabtool_core::wikitext::normalize_title;
use serde::Serialize;
use similar::TextDiff;
use tracing::debug;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(
    name = "dabtool",
    version,
    about = "Find and fix links to disambiguation pages"
)]
struct Cli {
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,
    #[arg(long, global = true, help = "Log at debug level unless DABTOOL_LOG is set")]
    verbose: bool,
    #[arg(long, global = true, help = "Print resolved runtime diagnostics")]
    diagnostics: bool,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Clone)]
struct RuntimeOptions {
    config: Option<PathBuf>,
    diagnostics: bool,
}

impl RuntimeOptions {
    fn from_cli(cli: &Cli) -> Self {
        Self {
            config: cli.config.clone(),
            diagnostics: cli.diagnostics,
        }
    }
}

#[derive(Debug, Subcommand)]
enum Commands {
    #[command(about = "List the disambiguation links of an article")]
    Links(LinksArgs),
    #[command(about = "Apply a batch of decisions to an article and save it")]
    Fix(FixArgs),
    #[command(about = "Run extraction and patching on local files")]
    Offline(OfflineArgs),
}

#[derive(Debug, Args)]
struct LinksArgs {
    title: String,
    #[arg(long, help = "Print occurrences and an empty batch as JSON")]
    json: bool,
    #[arg(long, help = "Skip fetching candidates from disambiguation pages")]
    no_candidates: bool,
}

#[derive(Debug, Args)]
struct FixArgs {
    title: String,
    #[arg(long, value_name = "FILE", help = "JSON edit batch")]
    batch: PathBuf,
    #[arg(long, help = "Show summary and diff without saving")]
    dry_run: bool,
}

#[derive(Debug, Args)]
struct OfflineArgs {
    #[command(subcommand)]
    command: OfflineSubcommand,
}

#[derive(Debug, Subcommand)]
enum OfflineSubcommand {
    Extract {
        #[command(flatten)]
        source: OfflineSource,
        #[arg(long, help = "Print occurrences and an empty batch as JSON")]
        json: bool,
    },
    Patch {
        #[command(flatten)]
        source: OfflineSource,
        #[arg(long, value_name = "FILE", help = "JSON edit batch")]
        batch: PathBuf,
        #[arg(long, value_name = "FILE", help = "Write patched markup here")]
        output: Option<PathBuf>,
    },
}

#[derive(Debug, Args)]
struct OfflineSource {
    #[arg(long, value_name = "FILE")]
    markup: PathBuf,
    #[arg(long, value_name = "FILE", help = "Disambiguation titles, one per line")]
    dab_titles: PathBuf,
    #[arg(long, help = "Article title (defaults to the markup file stem)")]
    title: Option<String>,
}

struct Runtime {
    location: ConfigLocation,
    config: DabtoolConfig,
    diagnostics: bool,
}

impl Runtime {
    fn resolve(options: &RuntimeOptions) -> Result<Self> {
        let cwd = env::current_dir().context("failed to resolve current directory")?;
        let location = resolve_config_path(&cwd, options.config.as_deref());
        let config = load_config(&location.path)?;
        debug!(path = %location.path.display(), source = location.source.as_str(), "loaded config");
        Ok(Self {
            location,
            config,
            diagnostics: options.diagnostics,
        })
    }

    fn client(&self) -> Result<MediaWikiClient> {
        MediaWikiClient::new(MediaWikiClientConfig::from_config(&self.config))
    }

    fn session_options(&self) -> SessionOptions {
        SessionOptions::from_config(&self.config)
    }

    fn print_diagnostics(&self) {
        if !self.diagnostics {
            return;
        }
        let summary = self.config.summary_options();
        println!("\n[diagnostics]");
        println!("config_path: {}", normalize_path(&self.location.path));
        println!("config_source: {}", self.location.source.as_str());
        println!("config_exists: {}", format_flag(self.location.path.exists()));
        println!("api_url: {}", self.config.api_url());
        println!("user_agent: {}", self.config.user_agent());
        println!(
            "display_text: {}",
            self.config.display_text_policy().as_str()
        );
        println!("summary_max_chars: {}", summary.max_chars);
        println!(
            "summary_suffix: {}",
            summary.suffix.as_deref().unwrap_or("<none>")
        );
        println!(
            "templates: {}",
            self.config.disambiguation_templates().len()
        );
    }
}

fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    let runtime = RuntimeOptions::from_cli(&cli);

    match cli.command {
        Some(Commands::Links(args)) => run_links(&runtime, args),
        Some(Commands::Fix(args)) => run_fix(&runtime, args),
        Some(Commands::Offline(OfflineArgs { command })) => match command {
            OfflineSubcommand::Extract { source, json } => {
                run_offline_extract(&runtime, &source, json)
            }
            OfflineSubcommand::Patch {
                source,
                batch,
                output,
            } => run_offline_patch(&runtime, &source, &batch, output.as_deref()),
        },
        None => {
            let mut command = Cli::command();
            command.print_help()?;
            println!();
            Ok(())
        }
    }
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_env("DABTOOL_LOG")
        .unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn run_links(options: &RuntimeOptions, args: LinksArgs) -> Result<()> {
    let runtime = Runtime::resolve(options)?;
    let mut client = runtime.client()?;
    let session_options = SessionOptions {
        fetch_candidates: !args.no_candidates,
        ..runtime.session_options()
    };
    let session = DabSession::load(&mut client, &args.title, session_options)?;

    if args.json {
        print_session_json(&session)?;
    } else {
        println!("links");
        println!("article: {}", session.article());
        if let Some(base) = session.base_revision() {
            println!("revision: {}", base.revision_id);
            println!("timestamp: {}", base.timestamp);
        }
        print_occurrences(&session);
        println!("requests: {}", client.request_count());
    }
    runtime.print_diagnostics();
    Ok(())
}

fn run_fix(options: &RuntimeOptions, args: FixArgs) -> Result<()> {
    let runtime = Runtime::resolve(options)?;
    let batch = read_batch(&args.batch)?;
    let mut client = runtime.client()?;
    let session_options = SessionOptions {
        fetch_candidates: false,
        ..runtime.session_options()
    };
    let mut session = DabSession::load(&mut client, &args.title, session_options)?;
    session.apply_batch(&batch)?;

    let preview = session.preview()?;
    println!("fix");
    println!("article: {}", session.article());
    println!("dry_run: {}", args.dry_run);
    print_preview(&session, &preview);

    if !args.dry_run {
        if session.prepare_submission()?.is_none() {
            println!("save: nothing to save");
        } else {
            let (username, password) = credentials_from_env()?;
            client.login(&username, &password)?;
            match session.save(&mut client)? {
                SaveReport::NothingToSave => println!("save: nothing to save"),
                SaveReport::Saved { outcome, .. } => {
                    println!("save: ok");
                    println!("saved_title: {}", outcome.title);
                    match outcome.new_revision_id {
                        Some(revision) => println!("new_revision: {revision}"),
                        None => println!("new_revision: <none>"),
                    }
                    println!("no_change: {}", format_flag(outcome.no_change));
                }
            }
        }
    }
    println!("requests: {}", client.request_count());
    runtime.print_diagnostics();
    Ok(())
}

fn run_offline_extract(options: &RuntimeOptions, source: &OfflineSource, json: bool) -> Result<()> {
    let runtime = Runtime::resolve(options)?;
    let session = offline_session(&runtime, source)?;
    if json {
        print_session_json(&session)?;
    } else {
        println!("offline extract");
        println!("article: {}", session.article());
        println!("markup: {}", normalize_path(&source.markup));
        print_occurrences(&session);
    }
    runtime.print_diagnostics();
    Ok(())
}

fn run_offline_patch(
    options: &RuntimeOptions,
    source: &OfflineSource,
    batch_path: &Path,
    output: Option<&Path>,
) -> Result<()> {
    let runtime = Runtime::resolve(options)?;
    let mut session = offline_session(&runtime, source)?;
    let batch = read_batch(batch_path)?;
    session.apply_batch(&batch)?;

    let preview = session.preview()?;
    println!("offline patch");
    println!("article: {}", session.article());
    print_preview(&session, &preview);
    if let Some(path) = output {
        fs::write(path, &preview.patch.markup)
            .with_context(|| format!("failed to write {}", path.display()))?;
        println!("output: {}", normalize_path(path));
    }
    runtime.print_diagnostics();
    Ok(())
}

fn offline_session(runtime: &Runtime, source: &OfflineSource) -> Result<DabSession> {
    let markup = fs::read_to_string(&source.markup)
        .with_context(|| format!("failed to read {}", source.markup.display()))?;
    let titles = fs::read_to_string(&source.dab_titles)
        .with_context(|| format!("failed to read {}", source.dab_titles.display()))?;
    let article = match &source.title {
        Some(title) => title.clone(),
        None => source
            .markup
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .filter(|stem| !stem.trim().is_empty())
            .ok_or_else(|| anyhow::anyhow!("pass --title when the markup path has no file name"))?,
    };
    Ok(DabSession::from_markup(
        &article,
        markup,
        &parse_dab_titles(&titles),
        runtime.session_options(),
    ))
}

fn read_batch(path: &Path) -> Result<EditBatch> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let batch: EditBatch = serde_json::from_str(&content)
        .with_context(|| format!("failed to parse edit batch {}", path.display()))?;
    if batch.article.trim().is_empty() {
        bail!("edit batch {} does not name an article", path.display());
    }
    Ok(batch)
}

/// One title per line; blank lines and `#` comments are ignored.
fn parse_dab_titles(content: &str) -> BTreeSet<String> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(normalize_title)
        .filter(|title| !title.is_empty())
        .collect()
}

#[derive(Serialize)]
struct SessionReport<'a> {
    article: &'a str,
    load_id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    revision_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    timestamp: Option<&'a str>,
    occurrences: &'a [Occurrence],
    batch: EditBatch,
}

fn print_session_json(session: &DabSession) -> Result<()> {
    let base = session.base_revision();
    let report = SessionReport {
        article: session.article(),
        load_id: session.registry().load_id(),
        revision_id: base.map(|base| base.revision_id),
        timestamp: base.map(|base| base.timestamp.as_str()),
        occurrences: session.registry().ordered(),
        batch: EditBatch::empty(session.article(), session.registry()),
    };
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn print_occurrences(session: &DabSession) {
    let registry = session.registry();
    println!("load_id: {}", registry.load_id());
    println!("occurrences.count: {}", registry.len());
    if registry.is_empty() {
        println!("occurrences: <none>");
        return;
    }
    for occurrence in registry.ordered() {
        println!(
            "occurrence.{}: {} (text: {}, bytes {}..{})",
            occurrence.id,
            occurrence.target_title,
            occurrence.surface_text,
            occurrence.span.start,
            occurrence.span.end
        );
        for candidate in &occurrence.candidates {
            if candidate.description.is_empty() {
                println!("  - {}", candidate.title);
            } else {
                println!("  - {}: {}", candidate.title, candidate.description);
            }
        }
    }
}

fn print_preview(session: &DabSession, preview: &Preview) {
    println!("decisions: {}", session.edits().len());
    println!("changed: {}", preview.patch.changed_edits().count());
    println!(
        "summary: {}",
        preview.summary.as_deref().unwrap_or("<nothing to save>")
    );
    print_dropped(&preview.patch.dropped);
    if preview.patch.has_changes() {
        println!("diff:");
        print!(
            "{}",
            render_diff(session.article(), session.markup(), &preview.patch.markup)
        );
    }
}

fn print_dropped(dropped: &[DroppedEdit]) {
    println!("dropped.count: {}", dropped.len());
    for edit in dropped {
        println!(
            "dropped.{}: {} ({})",
            edit.id, edit.original_target, edit.reason
        );
    }
}

fn render_diff(title: &str, before: &str, after: &str) -> String {
    TextDiff::from_lines(before, after)
        .unified_diff()
        .context_radius(2)
        .header(&format!("a/{title}"), &format!("b/{title}"))
        .to_string()
}

fn normalize_path(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

fn format_flag(value: bool) -> &'static str {
    if value { "yes" } else { "no" }
}
