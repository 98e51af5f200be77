use std::collections::{BTreeMap, BTreeSet};
use std::env;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{Args, CommandFactory, Parser, Subcommand};
use serde::Serialize;
use sitefix_core::ai::{AiSuggester, AnthropicClient};
use sitefix_core::apply::{
    ApplyFlow, ApplyItem, ApplyOptions, ApplyReport, apply_alt_text_fixes, apply_link_fixes,
    apply_redirect_chain_fixes,
};
use sitefix_core::config::{
    ConfigPatch, SiteConfig, load_config, patch_config, resolve_config_path,
};
use sitefix_core::crawl::{CrawlReport, ingest_file};
use sitefix_core::csv::{CsvTable, cell};
use sitefix_core::export::{
    alt_text_table, apply_results_table, fix_plan_table, read_alt_texts, read_decisions,
    redirect_chain_table,
};
use sitefix_core::seo::{
    DEFAULT_REDIRECT_TYPE, MetaUpdate, RedirectRequest, RobotsDirectives, SeoService,
};
use sitefix_core::session::{SessionContext, UnmatchedSummary};
use sitefix_core::transport::{BlockingTransport, TransportConfig};
use sitefix_core::wordpress::{PostLookup, RewriteOutcome, WordPressClient};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(
    name = "sitefix",
    version,
    about = "Fix broken links, redirect chains and image alt text on WordPress sites"
)]
struct Cli {
    #[arg(long, global = true, value_name = "PATH")]
    project_root: Option<PathBuf>,
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,
    #[arg(long, global = true, help = "Print machine-readable JSON")]
    json: bool,
    #[arg(short, long, global = true, help = "Enable debug logging")]
    verbose: bool,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Clone)]
struct RuntimeOptions {
    project_root: Option<PathBuf>,
    config: Option<PathBuf>,
    json: bool,
}

impl RuntimeOptions {
    fn from_cli(cli: &Cli) -> Self {
        Self {
            project_root: cli.project_root.clone(),
            config: cli.config.clone(),
            json: cli.json,
        }
    }

    fn config_path(&self) -> Result<PathBuf> {
        if let Some(path) = &self.config {
            return Ok(path.clone());
        }
        let root = match &self.project_root {
            Some(root) => root.clone(),
            None => env::current_dir().context("failed to resolve current directory")?,
        };
        Ok(resolve_config_path(&root))
    }

    fn load(&self) -> Result<SiteConfig> {
        load_config(&self.config_path()?)
    }
}

#[derive(Debug, Subcommand)]
enum Commands {
    #[command(about = "Test the WordPress connection")]
    Connect(ConnectArgs),
    #[command(about = "Detect SEO plugins and their capabilities")]
    Plugins,
    #[command(about = "Group a crawl export and write an editable plan")]
    Group(GroupArgs),
    #[command(about = "Ask the AI for fixes and write them into a plan")]
    Suggest(SuggestArgs),
    #[command(about = "Apply a plan to every affected page (dry run unless --execute)")]
    Apply(ApplyArgs),
    #[command(about = "Create a redirect through the detected SEO plugin")]
    Redirect(RedirectArgs),
    #[command(about = "List redirects from the detected SEO plugin")]
    Redirects(RedirectsArgs),
    #[command(about = "Read or update SEO meta for a post")]
    Meta(MetaArgs),
    #[command(name = "remove-link", about = "Remove links to a URL from one post")]
    RemoveLink(RemoveLinkArgs),
    #[command(name = "replace-link", about = "Replace a URL inside one post")]
    ReplaceLink(ReplaceLinkArgs),
    #[command(name = "set-alt", about = "Set alt text on an image inside one post")]
    SetAlt(SetAltArgs),
    #[command(name = "find-post", about = "Resolve public URLs to post ids")]
    FindPost(FindPostArgs),
}

#[derive(Debug, Args)]
struct ConnectArgs {
    #[arg(long, value_name = "URL")]
    site_url: Option<String>,
    #[arg(long)]
    username: Option<String>,
    #[arg(long, help = "Write site_url/username into the config file")]
    save: bool,
}

#[derive(Debug, Args)]
struct GroupArgs {
    report: PathBuf,
    #[arg(long, value_name = "PATH", help = "Post-id export used to match source pages")]
    post_ids: Option<PathBuf>,
    #[arg(long, value_name = "PATH", help = "Write the plan CSV here")]
    out: Option<PathBuf>,
}

#[derive(Debug, Args)]
struct SuggestArgs {
    report: PathBuf,
    #[arg(long, value_name = "PATH")]
    out: PathBuf,
    #[arg(long, help = "Only analyze the first N records")]
    limit: Option<usize>,
    #[arg(long, help = "One request per URL instead of batches")]
    single: bool,
    #[arg(long, help = "Domain named in prompts (defaults to the crawl's domain)")]
    domain: Option<String>,
}

#[derive(Debug, Args)]
struct ApplyArgs {
    report: PathBuf,
    #[arg(long, value_name = "PATH", help = "Edited plan CSV (not needed for redirect chains)")]
    plan: Option<PathBuf>,
    #[arg(long, value_name = "PATH")]
    post_ids: Option<PathBuf>,
    #[arg(long, help = "Write changes (default is a dry run)")]
    execute: bool,
    #[arg(long, help = "Drop anchor text along with removed links")]
    drop_anchor_text: bool,
    #[arg(long = "page", value_name = "URL", help = "Restrict to these source pages")]
    pages: Vec<String>,
    #[arg(long, value_name = "PATH", help = "Write per-page results CSV")]
    results: Option<PathBuf>,
    #[arg(long, help = "Stop after this many failures")]
    max_failures: Option<usize>,
}

#[derive(Debug, Args)]
struct RedirectArgs {
    source: Option<String>,
    target: Option<String>,
    #[arg(long = "type", default_value_t = DEFAULT_REDIRECT_TYPE)]
    redirect_type: u16,
    #[arg(long, value_name = "PATH", help = "CSV with source,target[,redirect_type] rows")]
    from: Option<PathBuf>,
}

#[derive(Debug, Args)]
struct RedirectsArgs {
    #[arg(long, default_value_t = 1)]
    page: u32,
    #[arg(long, default_value_t = 50)]
    per_page: u32,
}

#[derive(Debug, Args)]
struct MetaArgs {
    post_id: u64,
    #[arg(long)]
    title: Option<String>,
    #[arg(long)]
    description: Option<String>,
    #[arg(long)]
    focus_keyword: Option<String>,
    #[arg(long)]
    canonical: Option<String>,
    #[arg(long)]
    og_title: Option<String>,
    #[arg(long)]
    og_description: Option<String>,
    #[arg(long)]
    twitter_title: Option<String>,
    #[arg(long)]
    twitter_description: Option<String>,
    #[arg(long)]
    noindex: bool,
    #[arg(long)]
    nofollow: bool,
}

impl MetaArgs {
    fn update(&self) -> Option<MetaUpdate> {
        let robots = (self.noindex || self.nofollow).then_some(RobotsDirectives {
            noindex: self.noindex,
            nofollow: self.nofollow,
        });
        let update = MetaUpdate {
            title: self.title.clone(),
            description: self.description.clone(),
            focus_keyword: self.focus_keyword.clone(),
            canonical: self.canonical.clone(),
            og_title: self.og_title.clone(),
            og_description: self.og_description.clone(),
            twitter_title: self.twitter_title.clone(),
            twitter_description: self.twitter_description.clone(),
            robots,
        };
        (update != MetaUpdate::default()).then_some(update)
    }
}

#[derive(Debug, Args)]
struct RemoveLinkArgs {
    post_id: u64,
    url: String,
    #[arg(long)]
    drop_anchor_text: bool,
    #[arg(long)]
    execute: bool,
}

#[derive(Debug, Args)]
struct ReplaceLinkArgs {
    post_id: u64,
    old_url: String,
    new_url: String,
    #[arg(long)]
    execute: bool,
}

#[derive(Debug, Args)]
struct SetAltArgs {
    post_id: u64,
    image_url: String,
    alt_text: String,
    #[arg(long)]
    execute: bool,
}

#[derive(Debug, Args)]
struct FindPostArgs {
    #[arg(required = true)]
    urls: Vec<String>,
}

fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    let runtime = RuntimeOptions::from_cli(&cli);

    match cli.command {
        Some(Commands::Connect(args)) => run_connect(&runtime, args),
        Some(Commands::Plugins) => run_plugins(&runtime),
        Some(Commands::Group(args)) => run_group(&runtime, args),
        Some(Commands::Suggest(args)) => run_suggest(&runtime, args),
        Some(Commands::Apply(args)) => run_apply(&runtime, args),
        Some(Commands::Redirect(args)) => run_redirect(&runtime, args),
        Some(Commands::Redirects(args)) => run_redirects(&runtime, args),
        Some(Commands::Meta(args)) => run_meta(&runtime, args),
        Some(Commands::RemoveLink(args)) => {
            let mut client = connect(&runtime.load()?)?;
            let outcome = client.remove_link(
                args.post_id,
                &args.url,
                !args.drop_anchor_text,
                !args.execute,
            );
            print_rewrite(&runtime, "remove-link", &outcome)
        }
        Some(Commands::ReplaceLink(args)) => {
            let mut client = connect(&runtime.load()?)?;
            let outcome =
                client.replace_link(args.post_id, &args.old_url, &args.new_url, !args.execute);
            print_rewrite(&runtime, "replace-link", &outcome)
        }
        Some(Commands::SetAlt(args)) => {
            let mut client = connect(&runtime.load()?)?;
            let outcome =
                client.update_alt_text(args.post_id, &args.image_url, &args.alt_text, !args.execute);
            print_rewrite(&runtime, "set-alt", &outcome)
        }
        Some(Commands::FindPost(args)) => run_find_post(&runtime, args),
        None => {
            let mut command = Cli::command();
            command.print_help()?;
            println!();
            Ok(())
        }
    }
}

fn init_tracing(verbose: bool) {
    let fallback = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn connect_with(
    config: &SiteConfig,
    site_url: Option<String>,
    username: Option<String>,
) -> Result<WordPressClient<BlockingTransport>> {
    let Some(site_url) = site_url.or_else(|| config.site_url()) else {
        bail!("no site URL configured (set WP_SITE_URL or [wordpress].site_url)");
    };
    let mut transport_config = TransportConfig::from_config(config);
    if username.is_some() {
        transport_config.username = username;
    }
    if transport_config.username.is_none() || transport_config.password.is_none() {
        bail!("WordPress credentials missing (set WP_USERNAME and WP_APP_PASSWORD)");
    }
    let transport = BlockingTransport::new(transport_config)?;
    Ok(WordPressClient::new(transport, &site_url))
}

fn connect(config: &SiteConfig) -> Result<WordPressClient<BlockingTransport>> {
    connect_with(config, None, None)
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn run_connect(runtime: &RuntimeOptions, args: ConnectArgs) -> Result<()> {
    let config = runtime.load()?;
    let mut client = connect_with(&config, args.site_url.clone(), args.username.clone())?;
    let status = client.test_connection();

    if runtime.json {
        print_json(&status)?;
    } else {
        println!("connect");
        println!("site_url: {}", client.site_url());
        println!("site_url_source: {}", config.site_url_source().as_str());
        println!("connected: {}", status.connected);
        println!("user: {}", status.user.as_deref().unwrap_or("<none>"));
        println!("message: {}", status.message);
    }

    if args.save && status.connected {
        let path = runtime.config_path()?;
        let changed = patch_config(
            &path,
            &ConfigPatch {
                set_site_url: args.site_url,
                set_username: args.username,
            },
        )?;
        if !runtime.json {
            println!("config_path: {}", normalize_path(&path));
            println!("config_updated: {changed}");
        }
    }
    if !status.connected {
        bail!("{}", status.message);
    }
    Ok(())
}

fn run_plugins(runtime: &RuntimeOptions) -> Result<()> {
    let config = runtime.load()?;
    let mut client = connect(&config)?;
    let mut session = SessionContext::new();
    let mut service = SeoService::new(&mut client, &mut session.plugins);
    let capabilities = service.capability_status();
    let summary = session.plugins.summary(&mut client);

    if runtime.json {
        #[derive(Serialize)]
        struct PluginsOutput<'a> {
            summary: &'a sitefix_core::plugins::PluginSummary,
            capabilities: &'a [sitefix_core::seo::CapabilityStatus],
        }
        return print_json(&PluginsOutput {
            summary: &summary,
            capabilities: &capabilities,
        });
    }

    println!("plugins");
    println!("plugins.count: {}", summary.plugins.len());
    for plugin in &summary.plugins {
        let capabilities: Vec<&str> = plugin
            .capabilities
            .iter()
            .map(|capability| capability.label())
            .collect();
        println!(
            "plugin: {} (premium: {}, capabilities: {})",
            plugin.name,
            plugin.is_premium,
            capabilities.join(", ")
        );
    }
    for status in &capabilities {
        println!("{}: {}", status.capability.label(), status.status_text);
    }
    if let Some(message) = summary.missing_capabilities_message() {
        println!("recommendation: {message}");
    }
    Ok(())
}

fn load_session(post_ids: Option<&Path>) -> Result<SessionContext> {
    let mut session = SessionContext::new();
    if let Some(path) = post_ids {
        let loaded = session.post_ids.load_csv(path)?;
        tracing::info!(loaded, path = %path.display(), "loaded post ids");
    }
    Ok(session)
}

fn run_group(runtime: &RuntimeOptions, args: GroupArgs) -> Result<()> {
    let report = ingest_file(&args.report)?;
    let session = load_session(args.post_ids.as_deref())?;
    if runtime.json {
        print_json(&report)?;
    } else {
        println!("group");
        println!("report: {}", normalize_path(&args.report));
        println!("kind: {}", report.kind().as_str());
    }

    let plan = match &report {
        CrawlReport::BrokenLinks {
            domain,
            records,
            non_content_filtered,
        } => {
            if !runtime.json {
                println!("domain: {}", domain.as_deref().unwrap_or("<unknown>"));
                println!("broken_urls: {}", records.len());
                println!(
                    "occurrences: {}",
                    records.iter().map(|record| record.occurrence_count).sum::<usize>()
                );
                println!("non_content_filtered: {non_content_filtered}");
                let sources: BTreeSet<&str> = records
                    .iter()
                    .flat_map(|record| record.source_pages.iter().map(String::as_str))
                    .collect();
                print_match_summary(&session, &sources);
            }
            Some(fix_plan_table(records, &session.decisions))
        }
        CrawlReport::RedirectChains { domain, groups } => {
            if !runtime.json {
                println!("domain: {}", domain.as_deref().unwrap_or("<unknown>"));
                println!("redirects: {}", groups.redirects.len());
                println!("sitewide: {}", groups.sitewide.len());
                println!("loops: {}", groups.loops.len());
                for link in &groups.sitewide {
                    println!(
                        "sitewide.link: {} -> {} ({}, {} pages)",
                        link.address, link.final_address, link.position, link.count
                    );
                }
            }
            Some(redirect_chain_table(&groups.redirects, &session.decisions))
        }
        CrawlReport::ImageAltText {
            groups,
            non_content_filtered,
            ..
        } => {
            if !runtime.json {
                println!("images: {}", groups.images.len());
                println!("excluded: {}", groups.excluded);
                println!("non_content_filtered: {non_content_filtered}");
            }
            Some(alt_text_table(&groups.images, &BTreeMap::new()))
        }
        CrawlReport::PostIds { post_ids } => {
            if !runtime.json {
                println!("post_ids: {}", post_ids.len());
            }
            None
        }
    };

    if let (Some(plan), Some(out)) = (plan, &args.out) {
        plan.write(out)?;
        if !runtime.json {
            println!("plan_path: {}", normalize_path(out));
            println!("plan_rows: {}", plan.rows.len());
        }
    }
    Ok(())
}

fn print_match_summary(session: &SessionContext, sources: &BTreeSet<&str>) {
    if session.post_ids.is_empty() {
        return;
    }
    let (matched, unmatched) = session.post_ids.match_post_ids(sources.iter().copied());
    let summary = UnmatchedSummary::from_unmatched(&unmatched);
    println!("post_ids.matched: {matched}");
    println!("post_ids.unmatched: {}", summary.total);
    println!("post_ids.unmatched_archive: {}", summary.archive);
    println!("post_ids.unmatched_other: {}", summary.other);
}

fn run_suggest(runtime: &RuntimeOptions, args: SuggestArgs) -> Result<()> {
    let config = runtime.load()?;
    let Some(api) = AnthropicClient::from_config(&config)? else {
        bail!("no AI key configured (set ANTHROPIC_API_KEY)");
    };
    let mut suggester = AiSuggester::from_config(api, &config);
    let report = ingest_file(&args.report)?;
    let fallback_domain = config.site_url().unwrap_or_else(|| "the site".to_string());
    let limit = args.limit.unwrap_or(usize::MAX);

    match report {
        CrawlReport::BrokenLinks { domain, records, .. } => {
            let domain = args.domain.or(domain).unwrap_or(fallback_domain);
            let selected = &records[..records.len().min(limit)];
            let mut session = SessionContext::new();
            let mut rate_limited = false;
            let suggestions = if args.single {
                selected
                    .iter()
                    .map(|record| suggester.suggest_link_fix(record, &domain))
                    .collect::<Vec<_>>()
            } else {
                let bulk = suggester.suggest_link_fixes(selected, &domain);
                rate_limited = bulk.rate_limited;
                bulk.suggestions
            };
            for suggestion in &suggestions {
                session
                    .decisions
                    .record(&suggestion.url, suggestion.to_decision())?;
            }
            let plan = fix_plan_table(&records, &session.decisions);
            plan.write(&args.out)?;
            if runtime.json {
                return print_json(&suggestions);
            }
            println!("suggest");
            println!("domain: {domain}");
            println!("analyzed: {}", suggestions.len());
            println!("rate_limited: {rate_limited}");
            for suggestion in &suggestions {
                println!(
                    "suggestion: {} -> {} {} ({})",
                    suggestion.url,
                    suggestion.action.as_str(),
                    suggestion.replacement_url.as_deref().unwrap_or(""),
                    suggestion.notes
                );
            }
            println!("plan_path: {}", normalize_path(&args.out));
        }
        CrawlReport::ImageAltText { domain, groups, .. } => {
            let domain = args.domain.or(domain).unwrap_or(fallback_domain);
            let mut alt_texts = BTreeMap::new();
            let mut suggestions = Vec::new();
            for image in groups.images.iter().take(limit) {
                let suggestion = suggester.suggest_alt_text(image, &domain);
                if !suggestion.alt_text.is_empty() {
                    alt_texts.insert(image.image_url.clone(), suggestion.alt_text.clone());
                }
                suggestions.push(suggestion);
            }
            alt_text_table(&groups.images, &alt_texts).write(&args.out)?;
            if runtime.json {
                return print_json(&suggestions);
            }
            println!("suggest");
            println!("domain: {domain}");
            println!("analyzed: {}", suggestions.len());
            println!("with_alt_text: {}", alt_texts.len());
            for suggestion in &suggestions {
                println!(
                    "alt: {} -> {:?} ({})",
                    suggestion.image_url, suggestion.alt_text, suggestion.notes
                );
            }
            println!("plan_path: {}", normalize_path(&args.out));
        }
        other => bail!(
            "suggestions are only available for broken link and image alt text exports (got {})",
            other.kind().as_str()
        ),
    }
    Ok(())
}

fn run_apply(runtime: &RuntimeOptions, args: ApplyArgs) -> Result<()> {
    let config = runtime.load()?;
    let report = ingest_file(&args.report)?;
    let mut session = load_session(args.post_ids.as_deref())?;
    let options = ApplyOptions {
        dry_run: !args.execute,
        keep_anchor_text: !args.drop_anchor_text,
        only_pages: (!args.pages.is_empty()).then(|| args.pages.iter().cloned().collect()),
    };
    let plan = match &args.plan {
        Some(path) => Some(CsvTable::read(path)?),
        None => None,
    };

    let mut client = connect(&config)?;
    let max_failures = args.max_failures.unwrap_or(usize::MAX);
    let mut failures = 0usize;
    let mut on_item = |item: &ApplyItem| {
        if !runtime.json {
            println!(
                "item: [{}] {} {} on {}: {}",
                item.status.as_str(),
                item.action.as_str(),
                item.target_url,
                item.source_url,
                item.message
            );
        }
        if item.status == sitefix_core::apply::ApplyStatus::Failed {
            failures += 1;
        }
        if failures >= max_failures {
            ApplyFlow::Stop
        } else {
            ApplyFlow::Continue
        }
    };

    let outcome: ApplyReport = match &report {
        CrawlReport::BrokenLinks { records, .. } => {
            let Some(plan) = &plan else {
                bail!("broken link fixes need --plan (see `sitefix group --out`)");
            };
            session.decisions = read_decisions(plan)?;
            apply_link_fixes(&mut client, &mut session, records, &options, &mut on_item)
        }
        CrawlReport::RedirectChains { groups, .. } => apply_redirect_chain_fixes(
            &mut client,
            &mut session,
            &groups.redirects,
            &options,
            &mut on_item,
        ),
        CrawlReport::ImageAltText { groups, .. } => {
            let Some(plan) = &plan else {
                bail!("alt text fixes need --plan with a new_alt column");
            };
            let alt_texts = read_alt_texts(plan)?;
            apply_alt_text_fixes(
                &mut client,
                &mut session,
                &groups.images,
                &alt_texts,
                &options,
                &mut on_item,
            )
        }
        CrawlReport::PostIds { .. } => bail!("a post-id export has nothing to apply"),
    };

    if let Some(path) = &args.results {
        apply_results_table(&outcome).write(path)?;
    }
    if runtime.json {
        return print_json(&outcome);
    }
    println!("apply");
    println!("mode: {}", if outcome.dry_run { "dry-run" } else { "execute" });
    println!("items: {}", outcome.items.len());
    println!("success: {}", outcome.success);
    println!("skipped: {}", outcome.skipped);
    println!("failed: {}", outcome.failed);
    println!("matches: {}", outcome.total_matches);
    println!("interrupted: {}", outcome.interrupted);
    if let Some(path) = &args.results {
        println!("results_path: {}", normalize_path(path));
    }
    Ok(())
}

fn read_redirect_requests(path: &Path) -> Result<Vec<RedirectRequest>> {
    let table = CsvTable::read(path)?;
    let source = table.column("source");
    let target = table.column("target");
    if source.is_none() || target.is_none() {
        bail!("{} needs source and target columns", normalize_path(path));
    }
    let redirect_type = table.column("redirect_type").or_else(|| table.column("type"));
    Ok(table
        .rows
        .iter()
        .map(|row| RedirectRequest {
            source: cell(row, source).to_string(),
            target: cell(row, target).to_string(),
            redirect_type: cell(row, redirect_type)
                .parse()
                .unwrap_or(DEFAULT_REDIRECT_TYPE),
        })
        .collect())
}

fn run_redirect(runtime: &RuntimeOptions, args: RedirectArgs) -> Result<()> {
    let config = runtime.load()?;
    let mut client = connect(&config)?;
    let mut session = SessionContext::new();
    let mut service = SeoService::new(&mut client, &mut session.plugins);

    if let Some(path) = &args.from {
        let requests = read_redirect_requests(path)?;
        let report = service.bulk_create_redirects(&requests)?;
        if runtime.json {
            return print_json(&report);
        }
        println!("redirect bulk");
        println!("handler: {}", report.handler.as_deref().unwrap_or("<none>"));
        println!("created: {}", report.created);
        println!("failed: {}", report.failed);
        for error in &report.errors {
            println!("error: {error}");
        }
        return Ok(());
    }

    let (Some(source), Some(target)) = (&args.source, &args.target) else {
        bail!("redirect needs SOURCE and TARGET, or --from CSV");
    };
    let outcome = service.create_redirect(source, target, args.redirect_type)?;
    if runtime.json {
        return print_json(&outcome);
    }
    println!("redirect");
    println!("handler: {}", outcome.handler.as_deref().unwrap_or("<none>"));
    println!("success: {}", outcome.success);
    println!("message: {}", outcome.message);
    if let Some(id) = outcome.redirect_id {
        println!("redirect_id: {id}");
    }
    if !outcome.success {
        bail!("{}", outcome.message);
    }
    Ok(())
}

fn run_redirects(runtime: &RuntimeOptions, args: RedirectsArgs) -> Result<()> {
    let config = runtime.load()?;
    let mut client = connect(&config)?;
    let mut session = SessionContext::new();
    let mut service = SeoService::new(&mut client, &mut session.plugins);
    let listing = match service.list_redirects(args.page, args.per_page)? {
        Ok(listing) => listing,
        Err(message) => bail!("failed to list redirects: {message}"),
    };
    if runtime.json {
        return print_json(&listing);
    }
    println!("redirects");
    println!("total: {}", listing.total);
    for redirect in &listing.redirects {
        println!(
            "redirect: {} -> {} ({})",
            redirect.source,
            redirect.target,
            redirect
                .redirect_type
                .map(|code| code.to_string())
                .unwrap_or_else(|| "?".to_string())
        );
    }
    Ok(())
}

fn run_meta(runtime: &RuntimeOptions, args: MetaArgs) -> Result<()> {
    let config = runtime.load()?;
    let mut client = connect(&config)?;
    let mut session = SessionContext::new();
    let mut service = SeoService::new(&mut client, &mut session.plugins);

    if let Some(update) = args.update() {
        let outcome = service.update_meta(args.post_id, &update)?;
        if runtime.json {
            return print_json(&outcome);
        }
        println!("meta update");
        println!("handler: {}", outcome.handler.as_deref().unwrap_or("<none>"));
        println!("success: {}", outcome.success);
        println!("message: {}", outcome.message);
        if !outcome.success {
            bail!("{}", outcome.message);
        }
        return Ok(());
    }

    let meta = match service.get_meta(args.post_id)? {
        Ok(meta) => meta,
        Err(message) => bail!("{message}"),
    };
    if runtime.json {
        return print_json(&meta);
    }
    println!("meta");
    println!("post_id: {}", args.post_id);
    for (field, value) in &meta {
        println!("{field}: {}", if value.is_empty() { "<empty>" } else { value });
    }
    Ok(())
}

fn print_rewrite(runtime: &RuntimeOptions, label: &str, outcome: &RewriteOutcome) -> Result<()> {
    if runtime.json {
        print_json(outcome)?;
    } else {
        println!("{label}");
        println!("mode: {}", if outcome.dry_run { "dry-run" } else { "execute" });
        println!("success: {}", outcome.success);
        println!("matches: {}", outcome.matches);
        println!("message: {}", outcome.message);
        if let Some(preview) = &outcome.preview {
            println!("\n{preview}");
        }
    }
    if !outcome.success {
        bail!("{}", outcome.message);
    }
    Ok(())
}

fn run_find_post(runtime: &RuntimeOptions, args: FindPostArgs) -> Result<()> {
    let config = runtime.load()?;
    let mut client = connect(&config)?;
    let lookups = client.batch_find_post_ids(&args.urls);

    if runtime.json {
        let ids: BTreeMap<&String, Option<u64>> = lookups
            .iter()
            .map(|(url, lookup)| (url, lookup.post_id()))
            .collect();
        return print_json(&ids);
    }
    println!("find-post");
    for (url, lookup) in &lookups {
        match lookup {
            PostLookup::Found { post_id, strategy } => {
                println!("{url}: {post_id} (via {})", strategy.as_str())
            }
            PostLookup::NotFound => println!("{url}: <not found>"),
            PostLookup::Failed(message) => println!("{url}: <error> {message}"),
        }
    }
    Ok(())
}

fn normalize_path(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}
