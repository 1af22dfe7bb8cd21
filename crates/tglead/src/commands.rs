//! Command handlers: wire config and adapters into the pipeline stages.

use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::{bail, Context};
use chrono::Utc;
use tracing::warn;

use tglead_core::{
    artifacts::{
        artifact_path, latest_message_export, latest_validated_export, MESSAGES_PREFIX,
        VALIDATED_PREFIX,
    },
    classifier::ClassifierClient,
    config::Config,
    domain::Group,
    export::RecordExporter,
    pacing::{PacedClassifier, PacedProfileSource},
    pipeline::{
        export_leads, process_export, Period, ProcessSettings, ScrapeMode, ScrapeSettings, Scraper,
        TimeWindow,
    },
    ports::MessageSource,
};
use tglead_openai::OpenRouterClassifier;
use tglead_telegram::{BotProfileSource, ExportMessageSource};

const SHOW_CELL_MAX: usize = 60;

pub struct ScrapeArgs {
    pub export: Vec<PathBuf>,
    pub group: String,
    pub period: Period,
    pub quantity: u32,
    pub mode: ScrapeMode,
}

pub async fn groups(exports: &[PathBuf]) -> anyhow::Result<()> {
    let source = open_exports(exports).await?;
    let groups = source.list_groups().await?;
    if groups.is_empty() {
        println!("No groups or channels in the given export(s)");
        return Ok(());
    }
    for (i, g) in groups.iter().enumerate() {
        println!("{:>3}. {} (id {})", i + 1, g.title, g.id.0);
    }
    Ok(())
}

pub async fn scrape(cfg: &Config, args: ScrapeArgs) -> anyhow::Result<()> {
    // Credentials and window are checked before any file is touched.
    let profiles = match args.mode {
        ScrapeMode::Fast => None,
        ScrapeMode::Detailed => {
            let token = cfg.require_bot_token()?;
            Some(PacedProfileSource::new(
                Arc::new(BotProfileSource::new(token)),
                cfg.api_delay,
            ))
        }
    };
    let window = TimeWindow::last(args.period, args.quantity, Utc::now())?;

    let source = open_exports(&args.export).await?;
    let groups = source.list_groups().await?;
    let group = select_group(&groups, &args.group)?;

    cfg.ensure_data_folder()?;
    let path = artifact_path(&cfg.data_folder, MESSAGES_PREFIX, &group.title, "csv");
    let mut out = RecordExporter::create(&path, cfg.csv_delimiter)
        .with_context(|| format!("create {}", path.display()))?;

    let matcher = cfg.keyword_matcher();
    let settings = ScrapeSettings {
        page_size: cfg.page_size,
        progress_every: cfg.progress_update_frequency,
        max_common_groups: cfg.max_common_groups,
        profile_cache_size: cfg.profile_cache_size,
        page_retry: cfg.retry_policy(),
        profile_retry: cfg.retry_policy(),
    };
    let mut scraper = Scraper::new(&source, &matcher, settings)
        .with_known_groups(groups.iter().map(|g| g.title.clone()).collect());
    if let Some(p) = &profiles {
        scraper = scraper.with_profiles(p);
    }

    let outcome = scraper.run(group, &window, &mut out).await?;

    println!(
        "Saved {} messages from {:?} ({} {}) to {}",
        outcome.rows,
        group.title,
        args.quantity,
        args.period,
        path.display()
    );
    println!("Cached {} unique users", outcome.cached_profiles);
    println!("{}", outcome.summary);
    Ok(())
}

pub async fn process(cfg: &Config, input: Option<PathBuf>, skip_classify: bool) -> anyhow::Result<()> {
    let client = if skip_classify {
        None
    } else {
        let key = cfg
            .require_classifier()
            .context("set OPENROUTER_API_KEY or pass --skip-classify")?;
        let endpoint = OpenRouterClassifier::new(
            key,
            cfg.ai_model.clone(),
            &cfg.openrouter_base_url,
            cfg.classifier_timeout,
        )?;
        let paced = PacedClassifier::new(Arc::new(endpoint), cfg.classify_delay);
        Some(
            ClassifierClient::new(Arc::new(paced))
                .with_instructions(cfg.ai_validation_prompt.clone())
                .with_max_messages(cfg.classifier_max_messages)
                .with_retry(cfg.retry_policy()),
        )
    };

    let input = match input {
        Some(p) => p,
        None => match latest_message_export(&cfg.data_folder)? {
            Some(p) => p,
            None => bail!(
                "no {MESSAGES_PREFIX}-*.csv found in {}; run `tglead scrape` first",
                cfg.data_folder.display()
            ),
        },
    };

    cfg.ensure_data_folder()?;
    let settings = process_settings(cfg);
    let outcome = process_export(&input, client.as_ref(), &settings)
        .await
        .with_context(|| format!("process {}", input.display()))?;

    println!(
        "Users: {} -> {}",
        outcome.total_users,
        outcome.users_path.display()
    );
    println!("{}", outcome.records);
    match &outcome.filtered_path {
        Some(p) => println!(
            "Users with keyword matches: {} -> {}",
            outcome.filtered_users,
            p.display()
        ),
        None => println!("No users matched any keyword"),
    }
    if let (Some(validated), Some(leads)) = (&outcome.validated_path, &outcome.leads_path) {
        println!("Classified users -> {}", validated.display());
        println!("Leads: {} -> {}", outcome.leads, leads.display());
        println!("{}", outcome.classification);
    }
    Ok(())
}

pub fn leads(cfg: &Config, input: Option<PathBuf>) -> anyhow::Result<()> {
    let input = match input {
        Some(p) => p,
        None => match latest_validated_export(&cfg.data_folder)? {
            Some(p) => p,
            None => bail!(
                "no {VALIDATED_PREFIX}-*.json found in {}; run `tglead process` first",
                cfg.data_folder.display()
            ),
        },
    };

    cfg.ensure_data_folder()?;
    let (path, leads) = export_leads(&input, &process_settings(cfg))
        .with_context(|| format!("export leads from {}", input.display()))?;
    println!("Leads: {leads} -> {}", path.display());
    Ok(())
}

pub fn show(cfg: &Config, path: &Path, rows: usize) -> anyhow::Result<()> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(cfg.csv_delimiter)
        .flexible(true)
        .from_path(path)
        .with_context(|| format!("open {}", path.display()))?;

    let headers = reader.headers()?.clone();
    println!("{}", headers.iter().collect::<Vec<_>>().join(" | "));

    let mut total = 0usize;
    for row in reader.records() {
        let row = row?;
        if total < rows {
            let cells: Vec<String> = row.iter().map(|c| clip(c, SHOW_CELL_MAX)).collect();
            println!("{}", cells.join(" | "));
        }
        total += 1;
    }
    if total > rows {
        println!("... {} more rows ({total} total)", total - rows);
    }
    Ok(())
}

fn process_settings(cfg: &Config) -> ProcessSettings {
    ProcessSettings {
        data_folder: cfg.data_folder.clone(),
        delimiter: cfg.csv_delimiter,
    }
}

async fn open_exports(paths: &[PathBuf]) -> anyhow::Result<ExportMessageSource> {
    ExportMessageSource::open_all(paths)
        .await
        .context("read telegram export")
}

/// 1-based index as printed by `groups`, else a case-insensitive title match.
fn select_group<'a>(groups: &'a [Group], wanted: &str) -> anyhow::Result<&'a Group> {
    if let Ok(n) = wanted.trim().parse::<usize>() {
        if let Some(g) = n.checked_sub(1).and_then(|i| groups.get(i)) {
            return Ok(g);
        }
        warn!(index = n, groups = groups.len(), "group index out of range, trying title");
    }
    let wanted_lower = wanted.trim().to_lowercase();
    groups
        .iter()
        .find(|g| g.title.to_lowercase() == wanted_lower)
        .with_context(|| format!("group {wanted:?} not found; run `tglead groups` to list them"))
}

fn clip(cell: &str, max: usize) -> String {
    let cell = cell.replace(['\n', '\r'], " ");
    if cell.chars().count() <= max {
        return cell;
    }
    let mut s: String = cell.chars().take(max.saturating_sub(3)).collect();
    s.push_str("...");
    s
}
