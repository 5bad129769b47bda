use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use revu_core::prompt::{Section, TokenBudget};
use revu_core::review::derive_query;
use revu_core::{Config, FileDiff, PromptComposer, PromptInput};
use revu_index::{
    CodeIndexer, CodeRetriever, EmbeddingCache, IndexReport, Provenance, RetrievalQuery,
    RetrievalResult, VectorInsightIndex, chunk_file,
};
use revu_llm::HashingEmbedder;
use revu_memory::{InMemoryVectorStore, QdrantVectorStore, VectorStore};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Parser)]
#[command(
    name = "revu",
    version,
    about = "Inspect chunking, retrieval and prompt budgets over a local tree"
)]
struct Cli {
    /// Configuration file. Falls back to `REVU_CONFIG`, then `config/default.toml`.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Print the chunks produced for one file.
    Chunk { path: PathBuf },

    /// Print the per-section token allocation.
    Budget {
        /// Override the configured total budget.
        #[arg(long)]
        tokens: Option<usize>,
    },

    /// Index a tree into the configured store, optionally querying it.
    Index {
        #[arg(default_value = ".")]
        root: PathBuf,
        #[arg(long)]
        query: Option<String>,
        #[arg(long)]
        top_k: Option<usize>,
        /// Commit recorded on every indexed chunk.
        #[arg(long)]
        commit: Option<String>,
    },

    /// Index a tree and compose the review prompt for a diff file.
    Prompt {
        /// Unified diff of the change under review.
        diff: PathBuf,
        #[arg(long, default_value = ".")]
        root: PathBuf,
        #[arg(long)]
        query: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = Config::load(&resolve_config_path(cli.config))?;
    init_subscriber(&config.logging.level);

    match cli.command {
        Command::Chunk { path } => chunk(&config, &path),
        Command::Budget { tokens } => budget(&config, tokens),
        Command::Index {
            root,
            query,
            top_k,
            commit,
        } => {
            let provenance = Provenance {
                commit,
                ..Provenance::default()
            };
            let (store, embedder, report) = index(&config, &root, &provenance).await?;
            print_report(&report);
            if let Some(query) = query {
                let retriever = retriever(&config, store, embedder);
                let mut request = RetrievalQuery::text(query);
                request.top_k = top_k;
                print_hits(&retriever.retrieve(request).await?);
            }
            Ok(())
        }
        Command::Prompt { diff, root, query } => prompt(&config, &diff, &root, query).await,
    }
}

fn resolve_config_path(flag: Option<PathBuf>) -> PathBuf {
    if let Some(path) = flag {
        return path;
    }
    if let Ok(path) = std::env::var("REVU_CONFIG") {
        return PathBuf::from(path);
    }
    PathBuf::from("config/default.toml")
}

fn init_subscriber(level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn retriever(
    config: &Config,
    store: Arc<dyn VectorStore>,
    embedder: Arc<HashingEmbedder>,
) -> CodeRetriever<HashingEmbedder> {
    let insights =
        VectorInsightIndex::new(Arc::clone(&store), &config.retrieval.insights_collection);
    CodeRetriever::new(store, embedder, config.retriever_config())
        .with_insights(Arc::new(insights))
}

/// Qdrant when `[store] qdrant_url` is set, otherwise a store that lives as
/// long as the command.
fn vector_store(config: &Config) -> anyhow::Result<Arc<dyn VectorStore>> {
    let Some(url) = config.store.qdrant_url.as_deref() else {
        return Ok(Arc::new(InMemoryVectorStore::new()));
    };
    let store = QdrantVectorStore::new(url)
        .with_context(|| format!("failed to create qdrant client for {url}"))?;
    tracing::info!(url, "using qdrant vector store");
    Ok(Arc::new(store))
}

fn embedder(config: &Config) -> anyhow::Result<HashingEmbedder> {
    match config.store.vector_size {
        Some(size) => Ok(HashingEmbedder::new(
            usize::try_from(size).context("vector_size does not fit in memory")?,
        )),
        None => Ok(HashingEmbedder::default()),
    }
}

fn chunk(config: &Config, path: &Path) -> anyhow::Result<()> {
    let source = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let result = chunk_file(&source, &path.to_string_lossy(), &config.chunker_config())?;
    println!(
        "{}: {} chunks, language {}, strategy {:?}{}",
        path.display(),
        result.chunks.len(),
        result.language,
        result.strategy,
        if result.used_fallback { " (fallback)" } else { "" }
    );
    for c in &result.chunks {
        println!(
            "  {:>5}-{:<5} {:<10} complexity {:<3} {}",
            c.start_line,
            c.end_line,
            c.chunk_type.as_str(),
            c.complexity_score,
            c.name.as_deref().unwrap_or("-")
        );
    }
    Ok(())
}

fn budget(config: &Config, tokens: Option<usize>) -> anyhow::Result<()> {
    let mut options = config.prompt_options();
    if let Some(tokens) = tokens {
        options.token_budget = tokens;
    }
    let budget = TokenBudget::allocate(&options)?;
    println!("total {}", budget.total);
    for section in Section::ALL {
        println!("  {:<12} {}", section.as_str(), budget.allocation(section));
    }
    println!("  {:<12} {}", "remaining", budget.remaining);
    Ok(())
}

async fn index(
    config: &Config,
    root: &Path,
    provenance: &Provenance,
) -> anyhow::Result<(Arc<dyn VectorStore>, Arc<HashingEmbedder>, IndexReport)> {
    if !root.is_dir() {
        bail!("{} is not a directory", root.display());
    }
    let store = vector_store(config)?;
    let embedder = Arc::new(embedder(config)?);
    let cache = Arc::new(EmbeddingCache::open(config.cache_config())?);

    let cancel = CancellationToken::new();
    let sweeper = cache.spawn_sweeper(cancel.child_token());
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("failed to listen for ctrl-c: {e:#}");
            return;
        }
        tracing::info!("received shutdown signal");
        on_signal.cancel();
    });

    let indexer = CodeIndexer::new(
        Arc::clone(&store),
        Arc::clone(&embedder),
        config.indexer_config(),
    )
    .with_cache(Arc::clone(&cache));
    let report = indexer.index_project(root, provenance, &cancel).await;

    cancel.cancel();
    if let Err(e) = sweeper.await {
        tracing::warn!("embedding cache sweeper failed: {e:#}");
    }
    if let Err(e) = cache.save() {
        tracing::warn!("failed to persist embedding cache: {e:#}");
    }
    let stats = cache.stats();
    tracing::info!(
        entries = stats.entries,
        hits = stats.hits,
        misses = stats.misses,
        "embedding cache"
    );

    Ok((store, embedder, report?))
}

async fn prompt(
    config: &Config,
    diff: &Path,
    root: &Path,
    query: Option<String>,
) -> anyhow::Result<()> {
    let patch = std::fs::read_to_string(diff)
        .with_context(|| format!("failed to read {}", diff.display()))?;
    let diffs = split_diff(&patch);
    let Some(query) = query.or_else(|| derive_query(&diffs)) else {
        bail!("nothing to search for in {}", diff.display());
    };

    let (store, embedder, report) = index(config, root, &Provenance::default()).await?;
    tracing::info!(files = report.files_indexed, chunks = report.chunks_created, "tree indexed");

    let retrieval = retriever(config, store, embedder)
        .retrieve(RetrievalQuery::text(query))
        .await?;
    let composer = PromptComposer::new(config.prompt_options())?;
    let prompt = composer.compose(&PromptInput {
        chunks: &retrieval.chunks,
        diffs: &diffs,
        ..PromptInput::default()
    })?;

    println!("{}", prompt.text);
    eprintln!(
        "tokens {}/{}, chunks {}, truncated {}",
        prompt.token_count,
        prompt.budget.total,
        prompt.metadata.chunks_included,
        prompt.metadata.truncated
    );
    Ok(())
}

/// Split a multi-file unified diff on its `diff --git` headers, or on the
/// `+++` target line when there are none.
fn split_diff(patch: &str) -> Vec<FileDiff> {
    let mut diffs: Vec<FileDiff> = Vec::new();
    let mut current: Option<FileDiff> = None;
    for line in patch.lines() {
        let header = line
            .strip_prefix("diff --git ")
            .and_then(|rest| rest.split_whitespace().last())
            .map(|b| b.trim_start_matches("b/"));
        let target = line
            .strip_prefix("+++ ")
            .map(|t| t.trim().trim_start_matches("b/"));

        if let Some(path) = header {
            diffs.extend(current.take());
            current = Some(FileDiff::new(path, ""));
        } else if let Some(path) = target
            && current.as_ref().is_none_or(|c| c.patch.contains("+++ "))
        {
            diffs.extend(current.take());
            current = Some(FileDiff::new(path, ""));
        }

        if let Some(c) = current.as_mut() {
            c.patch.push_str(line);
            c.patch.push('\n');
        }
    }
    diffs.extend(current);
    diffs
}

fn print_report(report: &IndexReport) {
    println!(
        "scanned {} files, indexed {}, {} chunks ({} from cache), {} removed in {} ms",
        report.files_scanned,
        report.files_indexed,
        report.chunks_created,
        report.chunks_cached,
        report.chunks_removed,
        report.duration_ms
    );
    for error in &report.errors {
        println!("  error: {error}");
    }
}

fn print_hits(result: &RetrievalResult) {
    println!(
        "{} of {} candidates ({} rejected)",
        result.chunks.len(),
        result.total_candidates,
        result.rejected_hits
    );
    for hit in &result.chunks {
        println!(
            "  {:.3} {}:{}-{} {} {}",
            hit.score,
            hit.chunk.file_path,
            hit.chunk.start_line,
            hit.chunk.end_line,
            hit.chunk.chunk_type,
            hit.chunk.name.as_deref().unwrap_or("-")
        );
    }
    for warning in &result.warnings {
        println!("  warning: {warning}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_diff_on_git_headers() {
        let patch = "\
diff --git a/src/a.rs b/src/a.rs
--- a/src/a.rs
+++ b/src/a.rs
@@ -1 +1 @@
-old
+new
diff --git a/src/b.rs b/src/b.rs
--- a/src/b.rs
+++ b/src/b.rs
@@ -1 +1 @@
-x
+y
";
        let diffs = split_diff(patch);
        assert_eq!(diffs.len(), 2);
        assert_eq!(diffs[0].path, "src/a.rs");
        assert!(diffs[0].patch.contains("+new"));
        assert_eq!(diffs[1].path, "src/b.rs");
        assert!(!diffs[1].patch.contains("+new"));
    }

    #[test]
    fn split_diff_without_git_headers() {
        let patch = "--- a/x.py\n+++ b/x.py\n@@ -1 +1 @@\n-a\n+b\n--- a/y.py\n+++ b/y.py\n-c\n+d\n";
        let diffs = split_diff(patch);
        let paths: Vec<&str> = diffs.iter().map(|d| d.path.as_str()).collect();
        assert_eq!(paths, vec!["x.py", "y.py"]);
    }

    #[tokio::test]
    async fn store_follows_qdrant_url() {
        let mut config = Config::default();
        let store = vector_store(&config).unwrap();
        assert!(!store.collection_exists("revu_code_chunks").await.unwrap());

        config.store.qdrant_url = Some("http://localhost:6334".into());
        assert!(vector_store(&config).is_ok());
    }

    #[test]
    fn embedder_uses_configured_vector_size() {
        let mut config = Config::default();
        config.store.vector_size = Some(64);
        assert_eq!(embedder(&config).unwrap().dimensions(), 64);
    }

    #[test]
    fn config_flag_wins() {
        let path = resolve_config_path(Some(PathBuf::from("custom.toml")));
        assert_eq!(path, PathBuf::from("custom.toml"));
    }

    #[test]
    fn cli_parses_subcommands() {
        let cli = Cli::try_parse_from(["revu", "budget", "--tokens", "1000"]).unwrap();
        assert!(matches!(cli.command, Command::Budget { tokens: Some(1000) }));

        let cli = Cli::try_parse_from(["revu", "index", "src", "--query", "load config"]).unwrap();
        assert!(matches!(cli.command, Command::Index { query: Some(_), .. }));
    }
}
