use sourcegate::app::App;
use sourcegate::cli::{Cli, Commands, ConfigAction, Rating, UserAction};
use sourcegate::config::Config;
use sourcegate::error::{Result, SourcegateError};
use sourcegate::ingest::parser;
use sourcegate::metadata::{MetadataStore, NewUser};
use sourcegate::retrieval::{open_document, NO_SOURCES_ANSWER};
use std::path::{Path, PathBuf};

fn main() -> Result<()> {
    let cli = Cli::parse_args();

    init_logging(cli.verbose);

    match cli.command {
        Commands::Ingest {
            file,
            tenant,
            source,
            title,
            url,
        } => {
            let app = open_app(cli.config, cli.profile)?;
            cmd_ingest(&app, &file, &tenant, &source, title, url)?;
        }
        Commands::IngestFolder { dir, tenant } => {
            let app = open_app(cli.config, cli.profile)?;
            cmd_ingest_folder(&app, &dir, &tenant)?;
        }
        Commands::User { action } => {
            let app = open_app(cli.config, cli.profile)?;
            cmd_user(&app, action)?;
        }
        Commands::Search {
            query,
            user,
            top_k,
            json,
        } => {
            let app = open_app(cli.config, cli.profile)?;
            cmd_search(&app, &query, &user, top_k, json)?;
        }
        Commands::Ask {
            question,
            user,
            offline,
            json,
        } => {
            let app = open_app(cli.config, cli.profile)?;
            cmd_ask(&app, &question, &user, offline, json)?;
        }
        Commands::Show { doc_id, user } => {
            let app = open_app(cli.config, cli.profile)?;
            cmd_show(&app, &doc_id, &user)?;
        }
        Commands::Feedback {
            log_id,
            user,
            rating,
            comment,
        } => {
            let app = open_app(cli.config, cli.profile)?;
            cmd_feedback(&app, &log_id, &user, rating, comment)?;
        }
        Commands::Stats => {
            let app = open_app(cli.config, cli.profile)?;
            cmd_stats(&app)?;
        }
        Commands::Config { action } => {
            cmd_config(cli.config, cli.profile, action)?;
        }
    }

    Ok(())
}

fn init_logging(verbose: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let default = if verbose {
        "sourcegate=debug"
    } else {
        "sourcegate=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    fmt().with_env_filter(filter).with_target(false).init();
}

fn runtime() -> Result<tokio::runtime::Runtime> {
    tokio::runtime::Runtime::new().map_err(|e| SourcegateError::Io {
        source: e,
        context: "Failed to create tokio runtime".to_string(),
    })
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<String> {
    serde_json::to_string_pretty(value).map_err(|e| SourcegateError::Json {
        source: e,
        context: "Failed to serialize output".to_string(),
    })
}

fn cmd_ingest(
    app: &App,
    file: &Path,
    tenant: &str,
    source: &str,
    title: Option<String>,
    url: Option<String>,
) -> Result<()> {
    let parsed = parser::parse_file(file)?;
    let title = title.unwrap_or(parsed.title);

    let ingestor = app.ingestor(app.load_embedder()?)?;
    let outcome = ingestor.ingest_document(tenant, source, &title, &parsed.text, url.as_deref())?;

    match outcome.doc_id {
        Some(doc_id) => println!(
            "✓ Ingested [{}] {} ({} chunks, document {})",
            source, title, outcome.chunk_count, doc_id
        ),
        None => println!("Skipped [{}] {} (no content)", source, title),
    }
    Ok(())
}

fn cmd_ingest_folder(app: &App, dir: &Path, tenant: &str) -> Result<()> {
    let ingestor = app.ingestor(app.load_embedder()?)?;
    let report = ingestor.ingest_folder(dir, tenant)?;

    println!("✓ Ingestion complete");
    println!("  Documents: {}", report.documents);
    println!("  Chunks:    {}", report.chunks);
    println!("  Skipped:   {}", report.skipped);
    println!("  Failed:    {}", report.failed);
    println!(
        "  Indexes:   {}/<tenant>/<source>.index",
        app.store().root().display()
    );
    Ok(())
}

fn cmd_user(app: &App, action: UserAction) -> Result<()> {
    match action {
        UserAction::Add {
            tenant,
            email,
            role,
            sources,
        } => {
            let id = app.metadata().create_user(NewUser {
                tenant_id: tenant,
                email: email.clone(),
                role,
                allowed_sources: sources,
            })?;
            println!("✓ User {} ({})", email, id);
        }
        UserAction::List { tenant } => {
            let users = app.metadata().list_users(&tenant)?;
            if users.is_empty() {
                println!("No users in tenant {}", tenant);
            }
            for user in users {
                println!(
                    "{}  {:<30} {:<8} [{}]",
                    user.id,
                    user.email,
                    user.role,
                    user.allowed_sources.join(", ")
                );
            }
        }
    }
    Ok(())
}

fn cmd_search(
    app: &App,
    query: &str,
    user: &str,
    top_k: Option<usize>,
    json: bool,
) -> Result<()> {
    let auth = app.resolve_user(user)?;
    let pipeline = app.pipeline(app.load_embedder()?);
    let top_k = top_k.unwrap_or_else(|| pipeline.top_k_per_source());

    let retrieval = runtime()?.block_on(pipeline.retrieve(&auth, query, top_k))?;
    if retrieval.is_no_sources() {
        println!("{}", NO_SOURCES_ANSWER);
        return Ok(());
    }
    let passages = pipeline.hydrate(&auth, retrieval.hits())?;

    if json {
        println!("{}", to_json(&passages)?);
        return Ok(());
    }

    if passages.is_empty() {
        println!("No results");
    }
    for (rank, passage) in passages.iter().enumerate() {
        println!(
            "{:>2}. [{}] {} (score {:.3}, chunk {})",
            rank + 1,
            passage.source_key,
            passage.doc_title,
            passage.score,
            passage.chunk_index
        );
        println!("    {}", passage.snippet);
    }
    Ok(())
}

fn cmd_ask(app: &App, question: &str, user: &str, offline: bool, json: bool) -> Result<()> {
    let auth = app.resolve_user(user)?;
    let service = app.chat_service(app.load_embedder()?, offline)?;

    let response = runtime()?.block_on(service.ask(&auth, question))?;

    if json {
        println!("{}", to_json(&response)?);
        return Ok(());
    }

    println!("{}", response.answer);
    if !response.retrieved.is_empty() {
        println!();
        println!("Sources:");
        for passage in &response.retrieved {
            println!(
                "  [{}] {} (score {:.3})",
                passage.source_key, passage.doc_title, passage.score
            );
        }
    }
    println!();
    println!("Log ID: {}", response.log_id);
    Ok(())
}

fn cmd_show(app: &App, doc_id: &str, user: &str) -> Result<()> {
    let auth = app.resolve_user(user)?;
    let document = open_document(app.metadata().as_ref(), &auth, doc_id)?;

    println!("{} [{}]", document.title, document.source_key);
    if let Some(url) = &document.source_url {
        println!("{}", url);
    }
    println!();
    println!("{}", document.raw_text);
    Ok(())
}

fn cmd_feedback(
    app: &App,
    log_id: &str,
    user: &str,
    rating: Rating,
    comment: Option<String>,
) -> Result<()> {
    let id = app
        .metadata()
        .add_feedback(log_id, user, rating.helpful, comment)?;
    println!("✓ Feedback recorded ({})", id);
    Ok(())
}

fn cmd_stats(app: &App) -> Result<()> {
    let metadata = app.metadata().stats()?;
    let index = app.store().stats();

    println!("Metadata:");
    println!("  Documents:  {}", metadata.document_count);
    println!("  Chunks:     {}", metadata.chunk_count);
    println!("  Users:      {}", metadata.user_count);
    println!("  Query logs: {}", metadata.query_log_count);
    println!("  Feedback:   {}", metadata.feedback_count);
    println!("Index store ({}):", app.store().root().display());
    println!("  Cached partitions: {}", index.cached_partitions);
    println!("  Evictions:         {}", index.evictions);
    println!("  Dropped hits:      {}", index.dropped_hits);
    Ok(())
}

fn cmd_config(
    config_path: Option<PathBuf>,
    profile: Option<String>,
    action: ConfigAction,
) -> Result<()> {
    match action {
        ConfigAction::Show => {
            let config = load_config(config_path, profile)?;
            println!("{}", to_json(&config)?);
        }
        ConfigAction::Validate { file } => {
            let path = match file.or(config_path) {
                Some(path) => path,
                None => Config::default_path()?,
            };
            let config = Config::load(&path)?;
            println!("✓ Configuration is valid");
            println!("  Schema version: {}", config.meta.schema_version);
        }
        ConfigAction::Init { force } => {
            let path = match config_path {
                Some(path) => path,
                None => Config::default_path()?,
            };

            if path.exists() && !force {
                println!("Configuration file already exists at: {}", path.display());
                println!("Use --force to overwrite");
                return Ok(());
            }

            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent).map_err(|e| SourcegateError::Io {
                    source: e,
                    context: format!("Failed to create config directory: {:?}", parent),
                })?;
            }

            Config::default().save(&path)?;
            println!("✓ Configuration initialized at: {}", path.display());
        }
    }

    Ok(())
}

fn load_config(config_path: Option<PathBuf>, profile: Option<String>) -> Result<Config> {
    let path = match config_path {
        Some(path) => path,
        None => Config::default_path()?,
    };

    if !path.exists() {
        tracing::warn!(
            "Config file not found, using defaults. Run 'sourcegate config init' to create one."
        );
        let mut config = Config::default();
        config.apply_env_overrides();
        if let Some(profile) = profile {
            config.apply_profile(&profile)?;
        }
        return Ok(config);
    }

    if let Some(profile) = profile {
        Config::load_with_profile(&path, &profile)
    } else {
        Config::load(&path)
    }
}

fn open_app(config_path: Option<PathBuf>, profile: Option<String>) -> Result<App> {
    App::open(load_config(config_path, profile)?)
}
