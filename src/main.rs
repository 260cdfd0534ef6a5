//! codesift CLI - incremental semantic code search

use anyhow::{bail, Result};
use clap::{Args, Parser, Subcommand};
use codesift::{
    format_results, format_results_json, Config, EmbeddingModel, IndexContext, IndexManager,
    IndexWatcher, ProjectRegistry, ProviderKind, ReconcileOutcome, ReconcileReport,
    SearchOptions,
};
use colored::*;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "codesift")]
#[command(author, version, about = "Incremental semantic code search", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Search query (when no subcommand is provided)
    #[arg(trailing_var_arg = true)]
    query: Vec<String>,

    /// Project root to search in
    #[arg(short = 'p', long, default_value = ".")]
    path: PathBuf,

    #[command(flatten)]
    search: SearchArgs,

    #[command(flatten)]
    global: GlobalArgs,
}

#[derive(Args, Debug, Clone)]
struct GlobalArgs {
    /// Directory for the project registry and index snapshots
    #[arg(long, global = true, env = "CODESIFT_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Embedding provider: local or openai
    #[arg(long, global = true, env = "CODESIFT_PROVIDER")]
    provider: Option<String>,

    /// Local embedding model: minilm, bge, nomic, multilingual
    #[arg(long, global = true, env = "CODESIFT_MODEL")]
    model: Option<String>,

    /// Enable verbose logging
    #[arg(short = 'v', long, global = true)]
    verbose: bool,
}

#[derive(Args, Debug, Clone)]
struct SearchArgs {
    /// Maximum number of results
    #[arg(short = 'm', long, default_value = "10", env = "CODESIFT_MAX_COUNT")]
    max_count: usize,

    /// Minimum similarity score
    #[arg(short = 't', long, default_value = "0.5", env = "CODESIFT_THRESHOLD")]
    threshold: f32,

    /// Keep similarity order instead of asking the chat model
    #[arg(long)]
    no_rerank: bool,

    /// Show content of results
    #[arg(short = 'c', long, env = "CODESIFT_CONTENT")]
    content: bool,

    /// Output as JSON
    #[arg(long, env = "CODESIFT_JSON")]
    json: bool,

    /// Reconcile the index before searching
    #[arg(short = 's', long, env = "CODESIFT_SYNC")]
    sync: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Bring the index of a project up to date
    Index {
        /// Project root
        #[arg(default_value = ".")]
        path: PathBuf,

        /// Store --provider/--model in config.json as the new defaults
        #[arg(long)]
        save_defaults: bool,
    },

    /// Watch for file changes and update index automatically
    Watch {
        /// Project root
        #[arg(default_value = ".")]
        path: PathBuf,
    },

    /// Search the index
    Search {
        /// Search query
        query: String,

        /// Project root
        #[arg(default_value = ".")]
        path: PathBuf,

        #[command(flatten)]
        search: SearchArgs,
    },

    /// Show index statistics
    Stats {
        /// Project root
        #[arg(default_value = ".")]
        path: PathBuf,
    },

    /// List known projects, most recent first
    Projects,

    /// List available local embedding models
    Models,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.global.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let global = cli.global.clone();
    match cli.command {
        Some(Commands::Index {
            path,
            save_defaults,
        }) => cmd_index(&global, path, save_defaults).await,
        Some(Commands::Watch { path }) => cmd_watch(&global, path).await,
        Some(Commands::Search {
            query,
            path,
            search,
        }) => cmd_search(&global, query, path, &search).await,
        Some(Commands::Stats { path }) => cmd_stats(&global, path).await,
        Some(Commands::Projects) => cmd_projects(&global),
        Some(Commands::Models) => cmd_models(),
        None => {
            // Default: search if query provided, otherwise show help
            if cli.query.is_empty() {
                println!("{}", "codesift - Incremental semantic code search".cyan().bold());
                println!("\nUsage:");
                println!("  {} \"your search query\"", "codesift".green());
                println!(
                    "  {} \"query\" -c              # show content",
                    "codesift".green()
                );
                println!(
                    "  {} index .                  # build index first",
                    "codesift".green()
                );
                println!(
                    "  {} watch .                  # watch for changes",
                    "codesift".green()
                );
                println!("\nRun {} for more options.", "codesift --help".yellow());
                return Ok(());
            }

            let query = cli.query.join(" ");
            cmd_search(&global, query, cli.path, &cli.search).await
        }
    }
}

/// Stored config with command-line overrides applied. The overrides are
/// written back only when `persist` is set.
fn load_config(global: &GlobalArgs, persist: bool) -> Result<Config> {
    let data_dir = global
        .data_dir
        .clone()
        .unwrap_or_else(codesift::config::default_data_dir);
    let mut config = Config::load(&data_dir)?;

    if let Some(provider) = &global.provider {
        config = config.with_provider(provider.parse::<ProviderKind>()?);
    }
    if let Some(model) = &global.model {
        config = config.with_model(model.parse::<EmbeddingModel>()?);
    }
    config.validate()?;
    if persist {
        config.save()?;
    }
    Ok(config)
}

fn open_manager(global: &GlobalArgs, path: PathBuf, persist: bool) -> Result<IndexManager> {
    let config = load_config(global, persist)?;
    let ctx = IndexContext::from_config(config)?;
    let manager = IndexManager::open(ctx, &path)?;
    if !manager.is_enabled() {
        eprintln!(
            "{} No embedding provider available; set {} or use the local provider.",
            "Warning:".yellow().bold(),
            codesift::embedder::API_KEY_ENV.yellow()
        );
    }
    Ok(manager)
}

/// Run a pass with a progress bar fed from the reconcile progress channel
async fn reconcile_with_progress(manager: Arc<IndexManager>) -> Result<ReconcileReport> {
    let handle = manager.spawn_reconcile();
    let mut progress = handle.progress();

    let pb = ProgressBar::new(0);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} files embedded {msg}")?
            .progress_chars("=>-"),
    );

    while progress.changed().await.is_ok() {
        let current = *progress.borrow_and_update();
        pb.set_length(current.total as u64);
        pb.set_position(current.done as u64);
        if current.failed > 0 {
            pb.set_message(format!("({} failed)", current.failed));
        }
    }
    pb.finish_and_clear();

    Ok(handle.join().await?)
}

fn print_report(report: &ReconcileReport) {
    if let Some(warning) = &report.cap_warning {
        eprint!("{} {}", "Warning:".yellow().bold(), warning);
    }
    if report.persist_failed {
        eprintln!(
            "{} Index could not be saved; the next run will re-check every file.",
            "Warning:".yellow().bold()
        );
    }
    match report.outcome {
        ReconcileOutcome::Disabled => println!("{} Indexing disabled", "!".yellow()),
        ReconcileOutcome::Unchanged => {
            println!("{} Index up to date ({} files)", "✓".green(), report.unchanged)
        }
        ReconcileOutcome::Updated => println!("{} {}", "✓".green(), report),
        ReconcileOutcome::Cancelled => println!("{} Cancelled: {}", "!".yellow(), report),
    }
}

async fn cmd_index(global: &GlobalArgs, path: PathBuf, save_defaults: bool) -> Result<()> {
    let manager = Arc::new(open_manager(global, path, save_defaults)?);
    let project = manager.project().await;
    println!("{} {} ({:?})", "Indexing".cyan().bold(), project.name, project.path);

    let report = reconcile_with_progress(Arc::clone(&manager)).await?;
    print_report(&report);

    let index = manager.index().await;
    println!(
        "  {} files, {} chunks",
        index.file_count().to_string().green(),
        index.chunk_count().to_string().green()
    );
    Ok(())
}

async fn cmd_watch(global: &GlobalArgs, path: PathBuf) -> Result<()> {
    let manager = Arc::new(open_manager(global, path, false)?);
    let project = manager.project().await;
    println!("{} {:?}", "Watching".cyan().bold(), project.path);
    println!("  Press Ctrl+C to stop.\n");

    let watcher = IndexWatcher::new(Arc::clone(&manager));
    tokio::select! {
        result = watcher.watch(|report| {
            if report.outcome != ReconcileOutcome::Unchanged {
                print_report(report);
            }
        }) => result?,
        _ = tokio::signal::ctrl_c() => println!("\nStopped."),
    }
    Ok(())
}

async fn cmd_search(
    global: &GlobalArgs,
    query: String,
    path: PathBuf,
    args: &SearchArgs,
) -> Result<()> {
    let options = SearchOptions::new(args.max_count, args.threshold, !args.no_rerank)?;
    let manager = Arc::new(open_manager(global, path, false)?);

    if args.sync {
        let report = reconcile_with_progress(Arc::clone(&manager)).await?;
        if report.outcome == ReconcileOutcome::Updated {
            eprintln!("Synced: {}", report);
        }
    } else if manager.index().await.chunk_count() == 0 && manager.is_enabled() {
        eprintln!(
            "{} No index found. Run {} first.",
            "Error:".red().bold(),
            "codesift index".yellow()
        );
        bail!("project is not indexed");
    }

    let searcher = manager.searcher().await;
    let results = searcher.search(&query, &options).await?;

    if results.is_empty() {
        println!("No results found for: {}", query.yellow());
        return Ok(());
    }

    // Output results
    if args.json {
        println!("{}", format_results_json(&results)?);
    } else {
        println!(
            "\n{} results for \"{}\":\n",
            results.len().to_string().green().bold(),
            query.cyan()
        );
        print!("{}", format_results(&results, args.content));
    }

    Ok(())
}

async fn cmd_stats(global: &GlobalArgs, path: PathBuf) -> Result<()> {
    let manager = open_manager(global, path, false)?;
    let project = manager.project().await;
    let stats = manager.searcher().await.stats().await;

    println!("{}", "Index Statistics".cyan().bold());
    println!("  Project: {}", project.name.green());
    println!("  Files:   {}", stats.files.to_string().green());
    println!("  Chunks:  {}", stats.chunks.to_string().green());
    println!("  Model:   {} ({} dims)", stats.model.yellow(), stats.dimension);

    Ok(())
}

fn cmd_projects(global: &GlobalArgs) -> Result<()> {
    let config = load_config(global, false)?;
    let store = Arc::new(codesift::FileStore::new(config.data_dir.clone()));
    let projects = ProjectRegistry::new(store).list()?;

    if projects.is_empty() {
        println!("No projects yet. Run {} in a project.", "codesift index".yellow());
        return Ok(());
    }

    println!("{}", "Projects".cyan().bold());
    for project in projects {
        let status = if project.files_hash.is_empty() {
            "not indexed".red()
        } else {
            "indexed".green()
        };
        println!(
            "  {} {:?} ({}, opened {})",
            project.name.bold(),
            project.path,
            status,
            project.last_opened.format("%Y-%m-%d %H:%M")
        );
    }
    Ok(())
}

fn cmd_models() -> Result<()> {
    println!("{}", "Available Local Embedding Models".cyan().bold());
    println!();
    for (alias, model, note) in [
        ("minilm", EmbeddingModel::AllMiniLmL6V2, "fast, lightweight (default)"),
        ("bge", EmbeddingModel::BgeSmallEnV15, "higher quality retrieval"),
        ("nomic", EmbeddingModel::NomicEmbedTextV15, "tuned for code and docs"),
        ("multilingual", EmbeddingModel::MultilingualE5Small, "100+ languages"),
    ] {
        println!("  {}", alias.green().bold());
        println!("    {} ({} dims), {}", model.model_name(), model.dimension(), note);
    }
    println!();
    println!("Usage: {} --model nomic", "codesift index".yellow());
    println!(
        "Remote: {} with {} set",
        "--provider openai".yellow(),
        codesift::embedder::API_KEY_ENV
    );

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn global(data_dir: PathBuf, provider: Option<&str>) -> GlobalArgs {
        GlobalArgs {
            data_dir: Some(data_dir),
            provider: provider.map(String::from),
            model: Some("bge".into()),
            verbose: false,
        }
    }

    #[test]
    fn test_overrides_apply_without_touching_stored_config() {
        let dir = tempdir().unwrap();
        let args = global(dir.path().to_path_buf(), Some("openai"));

        let config = load_config(&args, false).unwrap();
        assert_eq!(config.provider, ProviderKind::OpenAi);
        assert_eq!(config.model, EmbeddingModel::BgeSmallEnV15);
        assert!(!config.config_path().exists());

        let stored = Config::load(dir.path()).unwrap();
        assert_eq!(stored.provider, ProviderKind::Local);
        assert_eq!(stored.model, EmbeddingModel::AllMiniLmL6V2);
    }

    #[test]
    fn test_overrides_are_saved_on_request() {
        let dir = tempdir().unwrap();
        let args = global(dir.path().to_path_buf(), Some("openai"));

        load_config(&args, true).unwrap();

        let stored = Config::load(dir.path()).unwrap();
        assert_eq!(stored.provider, ProviderKind::OpenAi);
        assert_eq!(stored.model, EmbeddingModel::BgeSmallEnV15);

        // A later one-off flag does not replace the saved defaults
        let once = global(dir.path().to_path_buf(), Some("local"));
        assert_eq!(load_config(&once, false).unwrap().provider, ProviderKind::Local);
        assert_eq!(Config::load(dir.path()).unwrap().provider, ProviderKind::OpenAi);
    }
}
