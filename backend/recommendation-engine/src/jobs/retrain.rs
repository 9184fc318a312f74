// ============================================
// Retrain Orchestrator
// ============================================
//
// State machine per target: idle -> running -> {completed, error}.
// The job table is a DashMap; `request` uses its entry API as the
// compare-and-set, so two concurrent requests for the same target
// yield one running job and one RetrainConflict.

use crate::config::Config;
use crate::error::{EngineError, Result};
use crate::models::{RetrainJob, RetrainStatus, RetrainTarget, StrategyFailure, StrategyKind};
use crate::services::evaluation::{leave_k_out, Evaluator, ModelMetrics};
use crate::services::registry::ModelRegistry;
use crate::services::strategies::{StrategyTrainer, TrainedModel, TrainingSet};
use crate::store::{InteractionStore, RatingSnapshot};
use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::runtime::Handle;
use tracing::{error, info, warn};
use uuid::Uuid;

const PROGRESS_SNAPSHOT: u8 = 5;
const PROGRESS_SPLIT: u8 = 10;
const PROGRESS_TRAIN_SPAN: usize = 80;
const PROGRESS_ACTIVATE: u8 = 95;
const PROGRESS_DONE: u8 = 100;

/// Outcome of fitting one strategy inside a run
struct StrategyOutcome {
    strategy: StrategyKind,
    result: Result<FittedStrategy>,
}

struct FittedStrategy {
    model: TrainedModel,
    metrics: ModelMetrics,
    training_ratings: usize,
}

#[derive(Clone)]
pub struct RetrainOrchestrator {
    config: Arc<Config>,
    store: Arc<dyn InteractionStore>,
    registry: Arc<ModelRegistry>,
    jobs: Arc<DashMap<RetrainTarget, RetrainJob>>,
    /// Terminal records replaced by a newer request
    archive: Arc<Mutex<Vec<RetrainJob>>>,
    latest: Arc<RwLock<Option<RetrainTarget>>>,
}

impl RetrainOrchestrator {
    pub fn new(
        config: Arc<Config>,
        store: Arc<dyn InteractionStore>,
        registry: Arc<ModelRegistry>,
    ) -> Self {
        Self {
            config,
            store,
            registry,
            jobs: Arc::new(DashMap::new()),
            archive: Arc::new(Mutex::new(Vec::new())),
            latest: Arc::new(RwLock::new(None)),
        }
    }

    pub fn registry(&self) -> &Arc<ModelRegistry> {
        &self.registry
    }

    /// Start a background retrain of `target`.
    ///
    /// Returns the new running job, or `RetrainConflict` when a job for the
    /// same target is still running. Outside a Tokio runtime the request is
    /// refused with `TrainingFailure` and the job table is left untouched.
    pub fn request(&self, target: RetrainTarget) -> Result<RetrainJob> {
        let runtime = Handle::try_current().map_err(|e| {
            EngineError::TrainingFailure(format!("no runtime to run retrain on: {}", e))
        })?;
        let job = RetrainJob::start(target);

        match self.jobs.entry(target) {
            Entry::Occupied(mut existing) => {
                if existing.get().is_running() {
                    warn!(
                        target = %target,
                        running_job = %existing.get().job_id,
                        "Retrain rejected, job already running"
                    );
                    return Err(EngineError::RetrainConflict(target));
                }
                let finished = existing.insert(job.clone());
                self.archive.lock().push(finished);
            }
            Entry::Vacant(slot) => {
                slot.insert(job.clone());
            }
        }
        *self.latest.write() = Some(target);

        info!(target = %target, job_id = %job.job_id, "Retrain job accepted");

        let worker = self.clone();
        let job_id = job.job_id;
        runtime.spawn(async move { worker.run(job_id, target).await });

        Ok(job)
    }

    /// Most recently started job, or an idle record before any request
    pub fn get_retrain_status(&self) -> RetrainJob {
        match *self.latest.read() {
            Some(target) => self.get_retrain_status_for(target),
            None => RetrainJob::idle(RetrainTarget::All),
        }
    }

    pub fn get_retrain_status_for(&self, target: RetrainTarget) -> RetrainJob {
        self.jobs
            .get(&target)
            .map(|job| job.value().clone())
            .unwrap_or_else(|| RetrainJob::idle(target))
    }

    /// Every job seen so far, oldest first
    pub fn job_history(&self) -> Vec<RetrainJob> {
        let mut history = self.archive.lock().clone();
        history.extend(self.jobs.iter().map(|job| job.value().clone()));
        history.sort_by_key(|job| job.started_at);
        history
    }

    /// Poll until the current job for `target` is terminal
    pub async fn wait_for(&self, target: RetrainTarget, poll_interval: Duration) -> RetrainJob {
        loop {
            let job = self.get_retrain_status_for(target);
            if !job.is_running() {
                return job;
            }
            tokio::time::sleep(poll_interval).await;
        }
    }

    async fn run(self, job_id: Uuid, target: RetrainTarget) {
        let started = Instant::now();
        let limit = self.config.retrain.timeout();

        match tokio::time::timeout(limit, self.execute(job_id, target)).await {
            Ok(Ok(outcomes)) => self.finish(job_id, target, outcomes, started),
            Ok(Err(e)) => {
                error!(target = %target, job_id = %job_id, error = %e, "Retrain failed");
                self.transition(job_id, target, |job| {
                    job.status = RetrainStatus::Error;
                    job.message = e.to_string();
                });
            }
            Err(_) => {
                error!(
                    target = %target,
                    job_id = %job_id,
                    timeout_secs = limit.as_secs(),
                    "Retrain timed out, results discarded"
                );
                self.transition(job_id, target, |job| {
                    job.status = RetrainStatus::Error;
                    job.message = format!("Retrain exceeded {}s and was abandoned", limit.as_secs());
                });
            }
        }
    }

    async fn execute(&self, job_id: Uuid, target: RetrainTarget) -> Result<Vec<(StrategyKind, Result<u64>)>> {
        let reporter = ProgressReporter {
            jobs: self.jobs.clone(),
            target,
            job_id,
        };

        reporter.update(PROGRESS_SNAPSHOT, "Loading rating snapshot");
        let snapshot = RatingSnapshot::capture(self.store.as_ref()).await?;
        info!(
            target = %target,
            job_id = %job_id,
            taken_at = %snapshot.taken_at(),
            ratings = snapshot.ratings().len(),
            "Retrain snapshot captured"
        );

        let config = self.config.clone();
        let strategies = target.strategies();
        let blocking_reporter = reporter.clone();
        let outcomes = tokio::task::spawn_blocking(move || {
            train_and_evaluate(&config, snapshot, &strategies, &blocking_reporter)
        })
        .await?;

        // register + activate: no await points, so a timeout cannot
        // interrupt between the two
        reporter.update(PROGRESS_ACTIVATE, "Activating new models");
        let mut activated = Vec::with_capacity(outcomes.len());
        for outcome in outcomes {
            let result = outcome.result.and_then(|fitted| {
                let artifact =
                    self.registry
                        .register(fitted.model, fitted.metrics, fitted.training_ratings);
                self.registry
                    .activate(artifact.strategy, artifact.version)
                    .map(|a| a.version)
            });
            activated.push((outcome.strategy, result));
        }
        Ok(activated)
    }

    fn finish(
        &self,
        job_id: Uuid,
        target: RetrainTarget,
        outcomes: Vec<(StrategyKind, Result<u64>)>,
        started: Instant,
    ) {
        let mut succeeded = Vec::new();
        let mut failed = Vec::new();
        for (strategy, result) in outcomes {
            match result {
                Ok(version) => succeeded.push((strategy, version)),
                Err(e) => failed.push(StrategyFailure {
                    strategy,
                    reason: e.to_string(),
                }),
            }
        }

        let message = if failed.is_empty() {
            format!("Retrained {}", describe_versions(&succeeded))
        } else {
            let failures: Vec<String> = failed
                .iter()
                .map(|f| format!("{} ({})", f.strategy, f.reason))
                .collect();
            let ok = if succeeded.is_empty() {
                "none".to_string()
            } else {
                describe_versions(&succeeded)
            };
            format!("Failed: {}; succeeded: {}", failures.join(", "), ok)
        };

        info!(
            target = %target,
            job_id = %job_id,
            succeeded = succeeded.len(),
            failed = failed.len(),
            duration_ms = started.elapsed().as_millis() as u64,
            "Retrain finished"
        );

        self.transition(job_id, target, move |job| {
            job.status = if failed.is_empty() {
                RetrainStatus::Completed
            } else {
                RetrainStatus::Error
            };
            job.progress = PROGRESS_DONE;
            job.message = message;
            job.succeeded = succeeded.into_iter().map(|(s, _)| s).collect();
            job.failed = failed;
        });
    }

    /// Move a running job to a terminal state; stale job ids are ignored
    fn transition(&self, job_id: Uuid, target: RetrainTarget, apply: impl FnOnce(&mut RetrainJob)) {
        if let Some(mut job) = self.jobs.get_mut(&target) {
            if job.job_id == job_id && job.is_running() {
                apply(job.value_mut());
                job.finished_at = Some(Utc::now());
            }
        }
    }
}

fn describe_versions(versions: &[(StrategyKind, u64)]) -> String {
    versions
        .iter()
        .map(|(s, v)| format!("{} v{}", s, v))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Progress writes visible to pollers; ignored once the job left `running`
#[derive(Clone)]
struct ProgressReporter {
    jobs: Arc<DashMap<RetrainTarget, RetrainJob>>,
    target: RetrainTarget,
    job_id: Uuid,
}

impl ProgressReporter {
    fn update(&self, progress: u8, message: impl Into<String>) {
        if let Some(mut job) = self.jobs.get_mut(&self.target) {
            if job.job_id == self.job_id && job.is_running() {
                job.progress = progress.min(PROGRESS_DONE).max(job.progress);
                job.message = message.into();
            }
        }
    }
}

/// CPU-bound part of a run. Metrics come from models fitted on the train
/// partition; the returned serving models are refit on the whole snapshot.
fn train_and_evaluate(
    config: &Config,
    snapshot: RatingSnapshot,
    strategies: &[StrategyKind],
    reporter: &ProgressReporter,
) -> Vec<StrategyOutcome> {
    reporter.update(PROGRESS_SPLIT, "Splitting ratings into train and test");
    let split = leave_k_out(
        snapshot.ratings(),
        config.evaluation.test_ratio,
        config.evaluation.seed,
    );
    let train_set = TrainingSet::new(snapshot.with_ratings(split.train.clone()));
    let training_ratings = snapshot.ratings().len();
    let full_set = TrainingSet::new(snapshot);

    let evaluator = Evaluator::new(&config.evaluation, &split, full_set.snapshot.items());
    let mut eval_trainer = StrategyTrainer::new(config, &train_set);
    let mut serve_trainer = StrategyTrainer::new(config, &full_set);

    info!(
        train = split.train.len(),
        test = split.test.len(),
        test_users = split.test_users(),
        evaluated_users = evaluator.evaluated_users(),
        strategies = strategies.len(),
        "Training run prepared"
    );

    let total = strategies.len().max(1);
    let mut outcomes = Vec::with_capacity(strategies.len());
    for (index, strategy) in strategies.iter().copied().enumerate() {
        let progress = PROGRESS_SPLIT as usize + PROGRESS_TRAIN_SPAN * index / total;
        reporter.update(
            progress as u8,
            format!("Training {} ({}/{})", strategy, index + 1, total),
        );

        let metrics = match eval_trainer.train(strategy) {
            Ok(model) => evaluator.evaluate(model.strategy()),
            Err(e) => {
                warn!(strategy = %strategy, error = %e, "Evaluation model could not be fitted");
                ModelMetrics {
                    k: config.evaluation.k,
                    ..Default::default()
                }
            }
        };

        let result = serve_trainer.train(strategy).map(|model| FittedStrategy {
            model,
            metrics,
            training_ratings,
        });
        if let Err(e) = &result {
            warn!(strategy = %strategy, error = %e, "Strategy training failed");
        }
        outcomes.push(StrategyOutcome { strategy, result });
    }

    outcomes
}
