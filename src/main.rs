use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::Parser;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use docflow::cli::{Cli, Command};
use docflow::config::{BROKER_URL_ENV, DocflowConfig};
use docflow::report::{ItemOutcome, Summary};
use docflow::ui::{BatchBar, JobSpinner};
use docflow::{ConversionService, DocflowError, HttpBroker, Outcome, WorkItem};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config = match &cli.config {
        Some(path) => DocflowConfig::load_from(path)?
            .with_broker_url(std::env::var(BROKER_URL_ENV).ok()),
        None => DocflowConfig::load()?,
    }
    .with_broker_url(cli.broker_url.clone());

    let poll = config.poll.to_poll_config()?;
    let mode = cli.command.mode_override().unwrap_or(config.batch.mode);
    let broker = Arc::new(HttpBroker::new(&config.broker)?);
    let service = ConversionService::new(broker, &config.broker, poll, mode);

    run(cli.command, &service).await
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "docflow=debug" } else { "docflow=info" };
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| default.into()))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

// A single document must be readable; batches carry unreadable items instead.
async fn read_item(path: &Path) -> Result<WorkItem, DocflowError> {
    let item = WorkItem::from_path(path).await;
    item.validate()?;
    Ok(item)
}

fn report_single(outcome: ItemOutcome, spinner: &JobSpinner) -> Result<()> {
    let summary = Summary::single(outcome);
    spinner.complete(&summary);
    match summary.items.first().map(|i| &i.outcome) {
        Some(Outcome::Succeeded(_)) => Ok(()),
        Some(other) => bail!(
            "job finished as {} ({})",
            other.state(),
            other.reason().unwrap_or("no detail")
        ),
        None => bail!("no outcome reported"),
    }
}

async fn run(command: Command, service: &ConversionService<HttpBroker>) -> Result<()> {
    match command {
        Command::Ping => {
            service.ping().await.context("broker did not answer")?;
            println!("broker is up");
        }
        Command::Submit { file } => {
            let item = read_item(&file).await?;
            let job = service.submit_one(&item.filename, item.payload).await?;
            println!("{}", job.id);
        }
        Command::Poll { job_id } => {
            let reply = service.poll_one(&job_id).await?;
            println!("{}", serde_json::to_string_pretty(&reply)?);
        }
        Command::Wait { job_id, max_wait } => {
            let max_wait = max_wait
                .map(Duration::from_secs)
                .unwrap_or(service.poll_config().max_wait);
            let spinner = JobSpinner::start(&job_id);
            let outcome = service.await_one(&job_id, max_wait).await;
            report_single(ItemOutcome::new(job_id.clone(), Some(job_id), outcome), &spinner)?;
        }
        Command::Convert { file, max_wait } => {
            let item = read_item(&file).await?;
            let spinner = JobSpinner::start(&item.filename);
            let outcome = match max_wait {
                Some(secs) => {
                    let job = service.submit_one(&item.filename, item.payload).await?;
                    let outcome = service.await_one(&job.id, Duration::from_secs(secs)).await;
                    ItemOutcome::new(job.filename, Some(job.id), outcome)
                }
                None => {
                    let job = service.convert(&item.filename, item.payload).await?;
                    ItemOutcome::from_job(job).context("job returned without an outcome")?
                }
            };
            report_single(outcome, &spinner)?;
        }
        Command::Batch { files, .. } => {
            let mut items = Vec::with_capacity(files.len());
            for file in &files {
                items.push(WorkItem::from_path(file).await);
            }
            let ticket = service.submit_batch(items).await?;
            tracing::info!(
                batch_id = %ticket.batch_id,
                total = ticket.total,
                mode = %service.batch_mode(),
                "tracking batch"
            );

            let bar = BatchBar::start(&ticket.batch_id, ticket.total);
            let report = service
                .await_batch(&ticket.batch_id, |progress| bar.update(progress))
                .await?;
            bar.finish(&report);
            if report.failed() > 0 {
                bail!("{} of {} documents failed", report.failed(), report.total());
            }
        }
    }
    Ok(())
}
