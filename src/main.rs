use mmrag::cli::{Cli, Commands, ConfigAction};
use mmrag::config::Config;
use mmrag::error::{RagError, Result};
use mmrag::RagSession;
use std::path::PathBuf;

fn main() -> Result<()> {
    // Parse CLI arguments
    let cli = Cli::parse_args();

    // Initialize logging
    init_logging(cli.verbose);

    // Handle commands
    match cli.command {
        Commands::Ingest { files } => {
            let config = load_config(cli.config, cli.profile)?;
            block_on(cmd_ingest(&config, files))?;
        }
        Commands::Query {
            question,
            max_images,
            json,
        } => {
            let config = load_config(cli.config, cli.profile)?;
            block_on(cmd_query(&config, &question, max_images, json))?;
        }
        Commands::Search { query, k } => {
            let config = load_config(cli.config, cli.profile)?;
            block_on(cmd_search(&config, &query, k))?;
        }
        Commands::Clear => {
            let config = load_config(cli.config, cli.profile)?;
            block_on(cmd_clear(&config))?;
        }
        Commands::Config { action } => {
            cmd_config(cli.config, cli.profile, action)?;
        }
    }

    Ok(())
}

fn init_logging(verbose: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let default = if verbose { "mmrag=debug" } else { "mmrag=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    fmt().with_env_filter(filter).with_target(false).init();
}

fn block_on<F: std::future::Future<Output = Result<()>>>(future: F) -> Result<()> {
    let runtime = tokio::runtime::Runtime::new().map_err(|e| RagError::Io {
        source: e,
        context: "Failed to start async runtime".to_string(),
    })?;
    runtime.block_on(future)
}

async fn cmd_ingest(config: &Config, files: Vec<PathBuf>) -> Result<()> {
    let session = RagSession::from_config(config)?;

    let mut succeeded = 0usize;
    let mut failed = 0usize;

    for path in &files {
        match session.process_file(path).await {
            Ok(report) => {
                succeeded += 1;
                println!("✓ {}", report.source_file);
                println!("  Text chunks: {}", report.text_chunks);
                println!("  Images: {}", report.images);
                if report.skipped_images > 0 {
                    println!("  Skipped images: {}", report.skipped_images);
                }
                if !report.persisted {
                    println!("  Warning: snapshot not saved, retried on exit");
                }
            }
            Err(e) => {
                failed += 1;
                tracing::error!("Failed to ingest {}: {}", path.display(), e);
                println!("✗ {}: {}", path.display(), e);
            }
        }
    }

    println!();
    println!("Processed {} documents ({} failed)", succeeded, failed);
    println!("  Indexed text units: {}", session.text_count().await);

    session.teardown().await
}

async fn cmd_query(
    config: &Config,
    question: &str,
    max_images: Option<usize>,
    json: bool,
) -> Result<()> {
    let session = RagSession::from_config(config)?;
    if session.text_count().await == 0 {
        tracing::warn!("Index is empty; answering without document context");
    }

    let max_images = max_images.unwrap_or(config.retrieval.max_images);
    let answer = session.query_with_images(question, max_images).await?;

    if json {
        let out = serde_json::to_string_pretty(&answer).map_err(|e| RagError::Json {
            source: e,
            context: "Failed to serialize answer".to_string(),
        })?;
        println!("{}", out);
        return Ok(());
    }

    println!("{}", answer.answer);
    println!();
    println!("Text context ({} chunks):", answer.text_context.len());
    for (i, text) in answer.text_context.iter().enumerate() {
        println!("  [{}] {}", i + 1, preview(text, 120));
    }
    println!("Images sent: {}", answer.image_context.len());

    Ok(())
}

async fn cmd_search(config: &Config, query: &str, k: usize) -> Result<()> {
    let session = RagSession::from_config(config)?;
    let hits = session.search_scored(query, k).await?;

    if hits.is_empty() {
        println!("No results");
        return Ok(());
    }

    for (rank, (unit, distance)) in hits.iter().enumerate() {
        println!(
            "{}. {} page {} chunk {} (distance {:.4})",
            rank + 1,
            unit.source.source_file,
            unit.source.page,
            unit.source.sequence_index,
            distance
        );
        println!("   {}", preview(&unit.body, 160));
    }

    Ok(())
}

async fn cmd_clear(config: &Config) -> Result<()> {
    let session = RagSession::from_config(config)?;
    session.clear_all().await?;
    println!("✓ Cleared index, images, and snapshot");
    Ok(())
}

fn cmd_config(config_path: Option<PathBuf>, profile: Option<String>, action: ConfigAction) -> Result<()> {
    match action {
        ConfigAction::Show { section } => {
            let config = load_config(config_path, profile)?;
            let value = serde_json::to_value(&config).map_err(|e| RagError::Json {
                source: e,
                context: "Failed to serialize config".to_string(),
            })?;

            let value = match section {
                Some(section) => value
                    .get(&section)
                    .cloned()
                    .ok_or_else(|| RagError::Config(format!("Unknown config section: {}", section)))?,
                None => value,
            };

            let json = serde_json::to_string_pretty(&value).map_err(|e| RagError::Json {
                source: e,
                context: "Failed to serialize config".to_string(),
            })?;
            println!("{}", json);
        }
        ConfigAction::Validate { file } => {
            let path = match file {
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

            // Create parent directory
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent).map_err(|e| RagError::Io {
                    source: e,
                    context: format!("Failed to create config directory: {:?}", parent),
                })?;
            }

            let config = Config::default();
            config.save(&path)?;

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
            "Config file not found, using defaults. Run 'mmrag config init' to create one."
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

fn preview(text: &str, max_chars: usize) -> String {
    let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= max_chars {
        flat
    } else {
        let cut: String = flat.chars().take(max_chars).collect();
        format!("{}...", cut)
    }
}
