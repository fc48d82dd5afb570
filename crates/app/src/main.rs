use chrono::Utc;
use clap::{Parser, Subcommand};
use feishu_kb_core::{
    chunk_documents, load_knowledge_base, unique_document_tokens, CharacterNgramEmbedder,
    ChunkingConfig, EmbeddingIndex, FeishuClient, HttpReranker, Reranker, RetrievalPipeline,
    SyncOrchestrator, SyncStateStore, DEFAULT_API_BASE, DEFAULT_TOP_K_COARSE, DEFAULT_TOP_N_FINAL,
};
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "feishu-kb", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Feishu open-platform API base URL
    #[arg(long, default_value = DEFAULT_API_BASE)]
    api_base: String,

    /// Feishu app id
    #[arg(long, env = "FEISHU_APP_ID", default_value = "")]
    app_id: String,

    /// Feishu app secret
    #[arg(long, env = "FEISHU_APP_SECRET", default_value = "", hide_env_values = true)]
    app_secret: String,

    /// Local knowledge-base directory of synced markdown files
    #[arg(long, default_value = "knowledge_base")]
    kb_dir: PathBuf,

    /// Sync state file
    #[arg(long, default_value = ".sync_state.json")]
    state_file: PathBuf,

    /// Directory holding the persisted vector index
    #[arg(long, default_value = "vector_index")]
    index_dir: PathBuf,
}

#[derive(Subcommand)]
enum Command {
    /// Sync remote documents into the local knowledge base.
    Sync {
        /// Remote folder token to sync recursively.
        #[arg(long)]
        folder: Option<String>,
        /// Document tokens or share URLs to sync.
        #[arg(long = "doc")]
        docs: Vec<String>,
        /// File listing document tokens or share URLs, one per line.
        #[arg(long)]
        docs_list: Option<PathBuf>,
        /// Re-render even when the remote revision has not advanced.
        #[arg(long, default_value_t = false)]
        force: bool,
    },
    /// Chunk the knowledge base and update the vector index.
    Index {
        /// Maximum chunk size in characters.
        #[arg(long, default_value = "800")]
        max_chars: usize,
        /// Overlap carried between consecutive chunks.
        #[arg(long, default_value = "100")]
        overlap_chars: usize,
    },
    /// Query the index with coarse vector search plus optional rerank.
    Ask {
        /// Question text
        query: String,
        /// Candidates kept by the coarse stage.
        #[arg(long, default_value_t = DEFAULT_TOP_K_COARSE)]
        top_k: usize,
        /// Results returned after reranking.
        #[arg(long, default_value_t = DEFAULT_TOP_N_FINAL)]
        top_n: usize,
        /// Cross-encoder rerank endpoint; omitted means coarse-only.
        #[arg(long, env = "RERANK_ENDPOINT")]
        rerank_endpoint: Option<String>,
        /// API key for the rerank endpoint.
        #[arg(long, env = "RERANK_API_KEY", hide_env_values = true)]
        rerank_api_key: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(fmt::layer())
        .init();

    let cli = Cli::parse();
    info!(
        version = env!("CARGO_PKG_VERSION"),
        started_at = %Utc::now().to_rfc3339(),
        "feishu-kb boot"
    );

    match cli.command {
        Command::Sync {
            folder,
            docs,
            docs_list,
            force,
        } => {
            if cli.app_id.is_empty() || cli.app_secret.is_empty() {
                anyhow::bail!("sync requires --app-id and --app-secret (or FEISHU_APP_ID / FEISHU_APP_SECRET)");
            }

            let client = FeishuClient::new(&cli.api_base, &cli.app_id, &cli.app_secret)?;
            let state = SyncStateStore::load(&cli.state_file);
            let mut sync = SyncOrchestrator::new(&client, &cli.kb_dir, state);

            let mut tokens: Vec<String> = docs
                .iter()
                .flat_map(|line| unique_document_tokens(line))
                .collect();
            if let Some(list_path) = docs_list {
                let listed = std::fs::read_to_string(&list_path)?;
                tokens.extend(unique_document_tokens(&listed));
            }
            tokens.dedup();

            let mut report = sync.sync_batch(&tokens, force).await?;

            if let Some(folder_token) = folder {
                let folder_report = sync.sync_folder(&folder_token, force).await?;
                report.updated.extend(folder_report.updated);
                report.unchanged.extend(folder_report.unchanged);
                report.failed.extend(folder_report.failed);
            }

            for title in &report.updated {
                println!("updated    {title}");
            }
            for title in &report.unchanged {
                println!("unchanged  {title}");
            }
            for failed in &report.failed {
                println!("failed     {} ({})", failed.document_id, failed.reason);
            }
            println!(
                "{} documents: {} updated, {} unchanged, {} failed",
                report.total(),
                report.updated.len(),
                report.unchanged.len(),
                report.failed.len()
            );
        }
        Command::Index {
            max_chars,
            overlap_chars,
        } => {
            let report = load_knowledge_base(&cli.kb_dir)?;
            for skipped in &report.skipped_files {
                warn!(path = %skipped.path.display(), reason = %skipped.reason, "skipped file");
            }

            let config = ChunkingConfig {
                max_chars,
                overlap_chars,
                ..ChunkingConfig::default()
            };
            let chunks = chunk_documents(&report.documents, config)?;

            let mut index = EmbeddingIndex::open(&cli.index_dir, CharacterNgramEmbedder::default())?;
            let stats = index.upsert(&chunks)?;

            println!(
                "{} documents, {} chunks: {} embedded, {} reused, {} removed",
                report.documents.len(),
                chunks.len(),
                stats.embedded,
                stats.reused,
                stats.removed
            );
        }
        Command::Ask {
            query,
            top_k,
            top_n,
            rerank_endpoint,
            rerank_api_key,
        } => {
            let index = EmbeddingIndex::open(&cli.index_dir, CharacterNgramEmbedder::default())?;
            if index.is_empty() {
                println!("index is empty, run `feishu-kb index` first");
                return Ok(());
            }

            let reranker = rerank_endpoint
                .map(|endpoint| HttpReranker::new(endpoint, rerank_api_key));
            let pipeline =
                RetrievalPipeline::new(&index, reranker.as_ref().map(|r| r as &dyn Reranker));

            let outcome = pipeline.retrieve(&query, top_k, top_n).await?;
            println!(
                "query: {} ({})",
                outcome.query,
                if outcome.reranked { "reranked" } else { "coarse order" }
            );
            for hit in outcome.hits {
                match hit.rerank_score {
                    Some(rerank) => println!(
                        "[{:.4} | coarse {:.4}] {}",
                        rerank,
                        hit.coarse_score,
                        hit.chunk.provenance()
                    ),
                    None => println!("[{:.4}] {}", hit.coarse_score, hit.chunk.provenance()),
                }
                println!("{}\n", hit.chunk.text.trim_end());
            }
        }
    }

    Ok(())
}
