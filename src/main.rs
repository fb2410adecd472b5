use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use studyflow_gen::ai::{AiChatClient, OpenRouterClient};
use studyflow_gen::overview::OverviewGenerator;
use studyflow_gen::questions::QuestionGenerator;
use studyflow_gen::{config, db, extract};

#[derive(Debug, Parser)]
#[command(author, version, about)]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Create a studyflow and print its id
    Create {
        #[arg(long)]
        title: String,
    },
    /// Store a study material file under a studyflow
    Upload {
        #[arg(long)]
        studyflow: Uuid,
        #[arg(long)]
        file: PathBuf,
        /// Mime type; guessed from the extension when omitted
        #[arg(long)]
        mime: Option<String>,
        /// Make this file the studyflow's indicator resource
        #[arg(long)]
        indicator: bool,
    },
    /// Register an indicator tag
    Tag {
        #[arg(long)]
        studyflow: Uuid,
        #[arg(long)]
        tag: String,
    },
    /// Generate quiz questions and print them as JSON
    Questions {
        #[arg(long)]
        studyflow: Uuid,
    },
    /// Write the studyflow overview (generated on first use)
    Overview {
        #[arg(long)]
        studyflow: Uuid,
        #[arg(long)]
        out: PathBuf,
        /// Write the HTML document instead of the PDF
        #[arg(long)]
        html: bool,
    },
    /// Print stored questions as JSON
    ListQuestions {
        #[arg(long)]
        studyflow: Uuid,
    },
    /// Submit an answer to a question
    Answer {
        #[arg(long)]
        question: Uuid,
        #[arg(long)]
        answer: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();
    let cfg = config::load(Some(&args.config))
        .with_context(|| format!("failed to load config {}", args.config.display()))?;
    cfg.ensure_dirs()?;

    let database_url = std::env::var("DATABASE_URL").unwrap_or_else(|_| cfg.database_url());
    let pool = db::init_pool(&database_url).await?;
    db::run_migrations(&pool).await?;

    let client: Arc<dyn AiChatClient> = Arc::new(OpenRouterClient::from_config(&cfg)?);

    match args.command {
        Command::Create { title } => {
            let id = db::create_studyflow(&pool, &title).await?;
            info!(%id, "studyflow created");
            println!("{}", id);
        }
        Command::Upload {
            studyflow,
            file,
            mime,
            indicator,
        } => {
            let data = tokio::fs::read(&file)
                .await
                .with_context(|| format!("failed to read {}", file.display()))?;
            let Some(filename) = file.file_name().and_then(|n| n.to_str()) else {
                bail!("{} has no usable file name", file.display());
            };
            let mime = mime.unwrap_or_else(|| extract::guess_mime(filename).to_string());
            let id = db::insert_resource(&pool, studyflow, filename, &mime, &data, indicator).await?;
            info!(%id, %mime, bytes = data.len(), indicator, "resource stored");
            println!("{}", id);
        }
        Command::Tag { studyflow, tag } => {
            if tag.trim().is_empty() {
                bail!("tag must be non-empty");
            }
            db::register_indicator_tag(&pool, studyflow, &tag).await?;
        }
        Command::Questions { studyflow } => {
            let generator = QuestionGenerator::new(pool, client, cfg.ai.question_model.clone());
            let questions = generator.generate_questions(studyflow).await?;
            println!("{}", serde_json::to_string_pretty(&questions)?);
        }
        Command::Overview {
            studyflow,
            out,
            html,
        } => {
            let generator = OverviewGenerator::new(pool, client, cfg.ai.overview_model.clone());
            let bytes = if html {
                generator.overview_html(studyflow).await?.into_bytes()
            } else {
                generator.overview_pdf(studyflow).await?
            };
            tokio::fs::write(&out, &bytes)
                .await
                .with_context(|| format!("failed to write {}", out.display()))?;
            info!(path = %out.display(), bytes = bytes.len(), "overview written");
        }
        Command::ListQuestions { studyflow } => {
            let questions = db::list_questions(&pool, studyflow).await?;
            println!("{}", serde_json::to_string_pretty(&questions)?);
        }
        Command::Answer { question, answer } => {
            let updated = db::submit_answer(&pool, question, &answer).await?;
            println!("{}", serde_json::to_string_pretty(&updated)?);
        }
    }

    Ok(())
}
