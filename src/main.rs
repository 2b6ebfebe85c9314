//! RAG Grader CLI
//!
//! Grades student PDF submissions against an assignment prompt.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use rag_grader::{
    batch::{Manifest, Outcome, run_batch},
    config::Config,
    embedding::create_embedder,
    evaluate::Evaluator,
    index::VectorIndex,
    llm::LlmClient,
    persistence::{IndexStore, index_exists, index_size},
};
use std::path::PathBuf;
use std::time::Instant;
use tracing::{Level, level_filters::LevelFilter};
use tracing_subscriber::{fmt, prelude::*, util::SubscriberInitExt};

/// RAG Grader - retrieval-augmented grading of PDF submissions
#[derive(Parser)]
#[command(name = "grader")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Log pipeline stages at debug level
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Grade one submission and print the evaluation as JSON
    Evaluate {
        /// Submission PDF files, concatenated in order
        #[arg(required = true)]
        pdfs: Vec<PathBuf>,

        /// Assignment prompt
        #[arg(short, long, conflicts_with = "prompt_file")]
        prompt: Option<String>,

        /// File containing the assignment prompt
        #[arg(long)]
        prompt_file: Option<PathBuf>,

        /// Key scoping the persisted index (defaults to the first file's stem)
        #[arg(long)]
        key: Option<String>,
    },

    /// Build and persist the vector index for a submission
    Index {
        /// Submission PDF files
        #[arg(required = true)]
        pdfs: Vec<PathBuf>,

        /// Key scoping the persisted index
        #[arg(long)]
        key: String,
    },

    /// Query a persisted index
    Query {
        /// Query text
        text: String,

        /// Key of the persisted index
        #[arg(long)]
        key: String,

        /// Number of excerpts to return
        #[arg(short = 'k', long)]
        top_k: Option<usize>,
    },

    /// Grade every submission listed in a manifest or found in a directory
    Batch {
        /// JSON manifest of the assignment and its submissions
        #[arg(long, conflicts_with = "dir")]
        manifest: Option<PathBuf>,

        /// Directory of PDFs, one submission per file
        #[arg(long, requires = "prompt")]
        dir: Option<PathBuf>,

        /// Assignment prompt (with --dir)
        #[arg(long)]
        prompt: Option<String>,

        /// Assignment id (with --dir)
        #[arg(long, default_value = "assignment")]
        assignment_id: String,

        /// Where to write the JSON report
        #[arg(short, long, default_value = "data/report.json")]
        output: PathBuf,
    },

    /// Test LLM connection
    Test,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    let level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    let fmt = fmt::layer()
        .without_time()
        .with_target(false)
        .with_writer(std::io::stderr);
    tracing_subscriber::registry()
        .with(fmt)
        .with(LevelFilter::from_level(level))
        .init();

    match cli.command {
        Commands::Evaluate {
            pdfs,
            prompt,
            prompt_file,
            key,
        } => cmd_evaluate(pdfs, prompt, prompt_file, key).await,
        Commands::Index { pdfs, key } => cmd_index(pdfs, key),
        Commands::Query { text, key, top_k } => cmd_query(text, key, top_k),
        Commands::Batch {
            manifest,
            dir,
            prompt,
            assignment_id,
            output,
        } => cmd_batch(manifest, dir, prompt, assignment_id, output).await,
        Commands::Test => cmd_test().await,
    }
}

fn load_config() -> Result<Config> {
    Config::load().context("Failed to load configuration")
}

async fn cmd_evaluate(
    pdfs: Vec<PathBuf>,
    prompt: Option<String>,
    prompt_file: Option<PathBuf>,
    key: Option<String>,
) -> Result<()> {
    let prompt = match (prompt, prompt_file) {
        (Some(p), _) => p,
        (None, Some(path)) => std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read prompt file '{}'", path.display()))?,
        (None, None) => anyhow::bail!("either --prompt or --prompt-file is required"),
    };
    let key = match key {
        Some(k) => k,
        None => pdfs
            .first()
            .and_then(|p| p.file_stem())
            .map(|s| s.to_string_lossy().into_owned())
            .context("Cannot derive a key from the submission path; pass --key")?,
    };

    let config = load_config()?;
    config.validate().context("Invalid configuration")?;
    let embedder = create_embedder(&config.embedding).context("Failed to load embedding model")?;
    let evaluator = Evaluator::from_config(&config, embedder)?;

    let start = Instant::now();
    let result = evaluator
        .evaluate(&key, &prompt, &pdfs)
        .await
        .context("Evaluation failed")?;
    tracing::info!("Evaluated '{}' in {:.2?}", key, start.elapsed());

    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}

fn cmd_index(pdfs: Vec<PathBuf>, key: String) -> Result<()> {
    let config = load_config()?;
    let embedder = create_embedder(&config.embedding).context("Failed to load embedding model")?;
    let client = LlmClient::new(config.llm.clone())?;
    let evaluator = Evaluator::new(&config, embedder, client)?;

    let start = Instant::now();
    let location = evaluator
        .build_index(&key, &pdfs)
        .context("Failed to build index")?;

    println!("Index saved to: {}", location.display());
    println!("  Build time: {:.2?}", start.elapsed());
    println!("  Size:       {:.1} KB", index_size(&location)? as f64 / 1024.0);
    Ok(())
}

fn cmd_query(text: String, key: String, top_k: Option<usize>) -> Result<()> {
    let config = load_config()?;
    let location = IndexStore::new(config.index.root_dir.clone()).location(&key)?;
    if !index_exists(&location) {
        anyhow::bail!(
            "Index not found at '{}'. Run 'index' command first.",
            location.display()
        );
    }

    let embedder = create_embedder(&config.embedding).context("Failed to load embedding model")?;
    let index = VectorIndex::load(&location, embedder.as_ref()).context("Failed to load index")?;
    let k = top_k.unwrap_or(config.retrieval.top_k);
    let results = index.query(&text, embedder.as_ref(), k)?;

    if results.is_empty() {
        println!("No results.");
        return Ok(());
    }

    println!("Results:");
    println!("{}", "─".repeat(60));
    for (i, scored) in results.iter().enumerate() {
        println!("{:>2}. similarity {:.3}", i + 1, scored.similarity());
        let preview: String = scored.document.content.chars().take(200).collect();
        for line in preview.lines().take(3) {
            println!("      {}", line);
        }
        if scored.document.char_len() > 200 {
            println!("      ...");
        }
        println!();
    }
    println!("{}", "─".repeat(60));
    Ok(())
}

async fn cmd_batch(
    manifest: Option<PathBuf>,
    dir: Option<PathBuf>,
    prompt: Option<String>,
    assignment_id: String,
    output: PathBuf,
) -> Result<()> {
    let manifest = match (manifest, dir, prompt) {
        (Some(path), _, _) => Manifest::load(&path)
            .with_context(|| format!("Failed to load manifest '{}'", path.display()))?,
        (None, Some(dir), Some(prompt)) => Manifest::from_directory(&dir, &assignment_id, &prompt)?,
        _ => anyhow::bail!("either --manifest or --dir with --prompt is required"),
    };

    let config = load_config()?;
    config.validate().context("Invalid configuration")?;
    let embedder = create_embedder(&config.embedding).context("Failed to load embedding model")?;
    let evaluator = Evaluator::from_config(&config, embedder)?;

    let start = Instant::now();
    let report = run_batch(&evaluator, &manifest).await;

    println!("Batch: {} ({})", report.title, report.assignment_id);
    println!("{}", "─".repeat(60));
    for row in &report.outcomes {
        match &row.outcome {
            Outcome::Graded { result } => {
                println!("  {:<20} {:>3}  {}", row.student_id, result.grade, result.remarks)
            }
            Outcome::Failed { stage, error } => {
                println!("  {:<20} failed at {}: {}", row.student_id, stage, error)
            }
            Outcome::Skipped { reason } => println!("  {:<20} skipped: {}", row.student_id, reason),
        }
    }
    println!("{}", "─".repeat(60));
    println!(
        "Graded {}, failed {}, skipped {} in {:.2?}",
        report.graded(),
        report.failed(),
        report.skipped(),
        start.elapsed()
    );

    report.save(&output).context("Failed to save report")?;
    println!("Report saved to: {}", output.display());

    if let Some(reason) = &report.aborted {
        anyhow::bail!("Batch aborted: {}", reason);
    }
    Ok(())
}

async fn cmd_test() -> Result<()> {
    println!("Testing LLM connection...\n");

    let config = load_config()?;

    println!("Configuration:");
    println!("  API Base:  {}", config.llm.api_base);
    println!("  Model:     {}", config.llm.model);
    println!(
        "  API Key:   {}...",
        config.llm.api_key.chars().take(8).collect::<String>()
    );
    println!();

    if let Err(e) = config.validate() {
        println!("Configuration error: {}", e);
        return Ok(());
    }

    let client = LlmClient::new(config.llm)?;

    println!("Sending test request...");
    match client.test_connection().await {
        Ok(()) => println!("Connection successful!"),
        Err(e) => println!("Connection failed: {}", e),
    }

    Ok(())
}
