//! Developer CLI: run the generation pipeline against a text file and print
//! the outbound NDJSON frames to stdout.

use anyhow::{bail, Context, Result};
use bytes::Bytes;
use clap::Parser;
use futures_util::StreamExt;
use mcq_pipeline::clients::{GeminiClient, MockClient};
use mcq_pipeline::config::Limits;
use mcq_pipeline::core::ModelClient;
use mcq_pipeline::orchestrate::{GenerateRequest, Orchestrator, StaticIdentity};
use mcq_pipeline::quota::InMemoryUsageStore;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

const DEV_TOKEN: &str = "dev-token";

#[derive(Parser, Debug)]
#[command(name = "quizgen", about = "Generate MCQs from a study-material file")]
struct Args {
    /// Text file to generate questions from
    input: PathBuf,

    /// Number of questions to request
    #[arg(long, default_value_t = 20)]
    count: u32,

    /// Use a canned offline backend instead of the Gemini API
    #[arg(long)]
    mock: bool,

    /// Include raw upstream error detail in error frames
    #[arg(long)]
    dev: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let material = std::fs::read_to_string(&args.input)
        .with_context(|| format!("reading {}", args.input.display()))?;

    let client: Arc<dyn ModelClient> = if args.mock {
        Arc::new(canned_client())
    } else {
        match GeminiClient::from_env() {
            Some(client) => Arc::new(client),
            None => bail!("GEMINI_API_KEY is not set; pass --mock for an offline run"),
        }
    };

    let identity = Arc::new(StaticIdentity::new().with_token(DEV_TOKEN, "dev-user"));
    let store = Arc::new(InMemoryUsageStore::new());
    let orchestrator = Orchestrator::new(client, identity, store, Limits::default(), args.dev);

    let request = GenerateRequest {
        text_content: Some(material),
        target_count: Some(args.count),
        ..GenerateRequest::default()
    };

    let mut frames = orchestrator.generate(DEV_TOKEN, request);
    while let Some(frame) = frames.next().await {
        println!("{}", serde_json::to_string(&frame)?);
    }
    Ok(())
}

/// Two canned questions in the vendor stream envelope, for offline runs.
fn canned_client() -> MockClient {
    let lines = concat!(
        r#"{"q":"What does photosynthesis produce?","o":["Glucose and oxygen","Carbon dioxide","Nitrogen","Water only"],"a":0}"#,
        "\n",
        r#"{"q":"Where does photosynthesis occur?","o":["Mitochondria","Chloroplasts","Nucleus","Ribosomes"],"a":1}"#,
        "\n",
    );
    let envelope = serde_json::json!({
        "candidates": [{ "content": { "parts": [{ "text": lines }] } }]
    });
    MockClient::streaming(vec![Bytes::from(format!("data: {envelope}\n\n"))])
}
