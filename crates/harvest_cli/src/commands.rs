use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use harvest_core::{RunOutcome, RunReport};
use harvest_engine::{
    DirectoryUploader, FetchSettings, HarvestPipeline, HubUploader, PipelineError, RetryPolicy,
    RetryingFetcher, SruRecordSource, StateStore, Uploader,
};
use harvest_logging::{harvest_error, harvest_info, harvest_warn};
use tokio_util::sync::CancellationToken;

use crate::config::{RunSettings, Target};

pub const EXIT_OK: u8 = 0;
pub const EXIT_FAILED: u8 = 1;
/// Same status a shell reports for SIGINT.
pub const EXIT_INTERRUPTED: u8 = 130;

pub async fn run(settings: RunSettings, cancel: CancellationToken) -> anyhow::Result<u8> {
    let fetcher = RetryingFetcher::new(&settings.fetch, settings.retry)?;
    let source = SruRecordSource::new(settings.sru.clone(), fetcher.clone())?;
    let uploader = uploader(&settings.target, fetcher);
    harvest_info!(
        "Harvesting {} ({}) into {}",
        settings.sru.source,
        settings.sru.query,
        describe(&settings.target)
    );

    let pipeline = HarvestPipeline::new(
        Arc::new(source),
        uploader,
        StateStore::new(&settings.state_dir),
        settings.harvest.clone(),
    )
    .with_politeness(settings.politeness)
    .with_cancellation(cancel);

    match pipeline.run().await {
        Ok(report) => {
            print_report(&report);
            Ok(exit_status(&report.outcome))
        }
        Err(PipelineError::Aborted { cause, report }) => {
            harvest_error!("Run aborted: {cause}");
            print_report(&report);
            Ok(EXIT_FAILED)
        }
        Err(err) => Err(err).context("run could not start"),
    }
}

pub async fn status(
    state_dir: &Path,
    target: &Target,
    fetch: &FetchSettings,
    retry: RetryPolicy,
) -> anyhow::Result<()> {
    let fetcher = RetryingFetcher::new(fetch, retry)?;
    let uploader = uploader(target, fetcher);
    let report = harvest_engine::status(&StateStore::new(state_dir), uploader.as_ref()).await?;

    println!("state directory:   {}", state_dir.display());
    println!("target:            {}", describe(target));
    println!("next position:     {}", report.next_position);
    println!("seen keys:         {}", report.seen_keys);
    println!("buffered records:  {}", report.buffered);
    println!("delivered (local): {}", report.local_delivered);
    println!(
        "delivered (remote): {} in {} objects",
        report.remote_delivered, report.remote_objects
    );
    println!("next shard starts: {}", report.next_shard_start);
    Ok(())
}

pub fn reset(state_dir: &Path) -> anyhow::Result<()> {
    let removed = StateStore::new(state_dir)
        .reset()
        .with_context(|| format!("cannot reset {}", state_dir.display()))?;
    if removed.is_empty() {
        println!("No state files in {}", state_dir.display());
    }
    for path in removed {
        harvest_warn!("Removed {}", path.display());
        println!("Removed {}", path.display());
    }
    Ok(())
}

pub fn exit_status(outcome: &RunOutcome) -> u8 {
    match outcome {
        RunOutcome::Exhausted | RunOutcome::QuotaReached => EXIT_OK,
        RunOutcome::Interrupted => EXIT_INTERRUPTED,
        RunOutcome::Aborted { .. } => EXIT_FAILED,
    }
}

fn uploader(target: &Target, fetcher: RetryingFetcher) -> Arc<dyn Uploader> {
    match target {
        Target::Directory(dir) => Arc::new(DirectoryUploader::new(dir)),
        Target::Hub(settings) => Arc::new(HubUploader::new(settings.clone(), fetcher)),
    }
}

fn describe(target: &Target) -> String {
    match target {
        Target::Directory(dir) => dir.display().to_string(),
        Target::Hub(settings) => format!("{}/{}", settings.repo_id, settings.path_prefix),
    }
}

fn print_report(report: &RunReport) {
    let stats = &report.stats;
    println!("outcome:          {}", report.outcome);
    println!("pages:            {}", stats.pages);
    println!("accepted:         {}", stats.accepted);
    println!("duplicates:       {}", stats.duplicates);
    println!("dropped:          {}", stats.dropped);
    println!("empty content:    {}", stats.empty_content);
    println!(
        "shards shipped:   {} ({} records)",
        stats.shards_shipped, stats.records_shipped
    );
    println!("delivered index:  {}", report.delivered_index);
    println!("next position:    {}", report.next_position);
}
