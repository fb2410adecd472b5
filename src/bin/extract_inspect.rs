use std::fs;
use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use studyflow_gen::config::Config;
use studyflow_gen::{db, extract};
use uuid::Uuid;

/// Print the text the pipeline would send for a studyflow, without calling
/// the provider. Reads only `app.data_dir`, so no API key is needed.
#[derive(Parser, Debug)]
struct Args {
    /// Path to YAML config
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    /// Studyflow to inspect
    #[arg(long)]
    studyflow: Uuid,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let raw = fs::read_to_string(&args.config)?;
    let cfg: Config = serde_yaml::from_str(&raw)?;
    let database_url = std::env::var("DATABASE_URL").unwrap_or_else(|_| cfg.database_url());
    let pool = db::init_pool(&database_url).await?;

    for block in extract::extract_all(&pool, args.studyflow).await? {
        print!("{}", block);
    }
    match extract::extract_indicator(&pool, args.studyflow).await? {
        Some(indicator) => print!("Indicator:\n{}", indicator),
        None => println!("Indicator: none"),
    }
    match extract::extract_indicator_tags(&pool, args.studyflow).await {
        Ok(tags) => println!("Tags: {}", tags.join(", ")),
        Err(err) => println!("Tags: {}", err),
    }
    Ok(())
}
