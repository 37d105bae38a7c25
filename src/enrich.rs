use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use indicatif::{ProgressBar, ProgressStyle};
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::dataset::Dataset;
use crate::extract;
use crate::model::ShopDetail;
use crate::renderer::{RenderError, Renderer, RendererFactory};
use crate::rules::ExtractRules;

const REASON_LIMIT: usize = 120;

pub struct EnrichOptions {
    pub concurrency: usize,
    /// Commit the dataset every N merged results; 0 leaves only the final
    /// commit after the pool drains.
    pub checkpoint_every: usize,
    pub out: PathBuf,
}

pub struct EnrichFailure {
    pub id: String,
    pub reason: String,
}

#[derive(Default)]
pub struct EnrichReport {
    pub total: usize,
    pub ok: usize,
    pub failures: Vec<EnrichFailure>,
}

impl EnrichReport {
    /// Targets never attempted, e.g. after a stop request.
    pub fn skipped(&self) -> usize {
        self.total - self.ok - self.failures.len()
    }
}

struct Outcome {
    id: String,
    result: Result<ShopDetail, String>,
}

/// Render and extract every target's detail page with a fixed pool of
/// workers, merging results into the dataset as they arrive. One slow or
/// broken page never blocks or poisons the batch; completion order is
/// arbitrary and only this task writes to the dataset.
pub async fn run_enrichment(
    factory: Arc<dyn RendererFactory>,
    rules: Arc<ExtractRules>,
    targets: Vec<(String, String)>,
    opts: &EnrichOptions,
    cancel: CancellationToken,
    dataset: &mut Dataset,
) -> Result<EnrichReport> {
    let mut report = EnrichReport {
        total: targets.len(),
        ..EnrichReport::default()
    };
    if targets.is_empty() {
        return Ok(report);
    }

    let queue = Arc::new(Mutex::new(VecDeque::from(targets)));
    let (tx, mut rx) = mpsc::channel::<Outcome>(opts.concurrency * 2);

    for worker in 0..opts.concurrency {
        tokio::spawn(worker_loop(
            worker,
            Arc::clone(&factory),
            Arc::clone(&rules),
            Arc::clone(&queue),
            tx.clone(),
            cancel.clone(),
        ));
    }
    // Drop our copy of tx so rx closes once every worker exits.
    drop(tx);

    let pb = ProgressBar::new(report.total as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {bar:40} {pos}/{len} ({per_sec}, eta {eta})")?
            .progress_chars("=> "),
    );

    let mut since_checkpoint = 0usize;
    while let Some(outcome) = rx.recv().await {
        match outcome.result {
            Ok(detail) => {
                report.ok += 1;
                if dataset.apply(&outcome.id, &detail) {
                    since_checkpoint += 1;
                } else {
                    warn!(id = %outcome.id, "enrichment result for unknown entity");
                }
            }
            Err(reason) => {
                warn!(id = %outcome.id, %reason, "detail page failed");
                report.failures.push(EnrichFailure {
                    id: outcome.id,
                    reason,
                });
            }
        }
        pb.inc(1);

        if opts.checkpoint_every > 0 && since_checkpoint >= opts.checkpoint_every {
            dataset.commit(&opts.out)?;
            since_checkpoint = 0;
        }
    }
    pb.finish_and_clear();

    info!(
        ok = report.ok,
        failed = report.failures.len(),
        skipped = report.skipped(),
        "enrichment drained"
    );
    Ok(report)
}

/// One worker: a private session, pulling targets until the queue is empty
/// or a stop is requested. Per-entity failures are reported and the worker
/// moves on; a lost session is replaced so later targets are not poisoned.
async fn worker_loop(
    worker: usize,
    factory: Arc<dyn RendererFactory>,
    rules: Arc<ExtractRules>,
    queue: Arc<Mutex<VecDeque<(String, String)>>>,
    tx: mpsc::Sender<Outcome>,
    cancel: CancellationToken,
) {
    let mut session = match factory.open_session().await {
        Ok(session) => session,
        Err(e) => {
            warn!(worker, error = %e, "could not open renderer session");
            return;
        }
    };

    loop {
        if cancel.is_cancelled() {
            debug!(worker, "stop requested, draining");
            break;
        }
        let next = queue.lock().await.pop_front();
        let Some((id, link)) = next else { break };

        let outcome = match fetch_detail(session.as_ref(), &rules, &link).await {
            Ok(detail) => Outcome {
                id,
                result: Ok(detail),
            },
            Err(err) => {
                let reason = truncate_reason(&err.to_string());
                if matches!(err, RenderError::Session(_)) {
                    match factory.open_session().await {
                        Ok(fresh) => session = fresh,
                        Err(e) => {
                            warn!(worker, error = %e, "session lost and could not reopen");
                            let _ = tx.send(Outcome { id, result: Err(reason) }).await;
                            return;
                        }
                    }
                }
                Outcome {
                    id,
                    result: Err(reason),
                }
            }
        };

        if tx.send(outcome).await.is_err() {
            break;
        }
    }
}

async fn fetch_detail(
    session: &dyn Renderer,
    rules: &ExtractRules,
    link: &str,
) -> Result<ShopDetail, RenderError> {
    let html = session.render(link).await?;
    Ok(extract::extract(&html, rules))
}

fn truncate_reason(reason: &str) -> String {
    if reason.chars().count() <= REASON_LIMIT {
        return reason.to_string();
    }
    let cut: String = reason.chars().take(REASON_LIMIT).collect();
    format!("{cut}...")
}

// ── Tests ──
