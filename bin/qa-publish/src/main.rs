//! Publish a question to the relay's input queue.
//!
//! Prints the generated question id on success. With both `--thread-id` and
//! `--user-id` the answer is posted into that conversation; otherwise it is
//! published to the response queue.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Parser;
use qa_common::telemetry::init_tracing;
use qa_config::AppConfig;
use qa_queue::Producer;

#[derive(Parser, Debug)]
#[command(name = "qa-publish")]
#[command(about = "Publish a question for asynchronous answering")]
struct Args {
    /// The question text
    question: String,

    /// Conversation the answer is posted into
    #[arg(long, requires = "user_id")]
    thread_id: Option<String>,

    /// User who asked the question
    #[arg(long, requires = "thread_id")]
    user_id: Option<String>,

    /// TOML configuration file
    #[arg(long, env = "QA_CONFIG_FILE")]
    config: Option<PathBuf>,

    /// Override the input queue name
    #[arg(long)]
    queue: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let args = Args::parse();
    if args.question.trim().is_empty() {
        bail!("question must not be empty");
    }

    let config = AppConfig::load(args.config.as_deref()).context("Failed to load configuration")?;
    let queue = args.queue.unwrap_or(config.queues.input);
    let producer = Producer::new(config.broker, queue);

    let question_id = match (&args.thread_id, &args.user_id) {
        (Some(thread_id), Some(user_id)) => {
            producer
                .publish_addressed(&args.question, thread_id, user_id)
                .await
        }
        _ => producer.publish(&args.question).await,
    }
    .with_context(|| format!("Failed to publish to {}", producer.queue()))?;

    println!("{}", question_id);
    Ok(())
}
