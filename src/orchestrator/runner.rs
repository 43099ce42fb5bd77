//! Pipeline Runner
//!
//! Drives one simulation: configure, pre-compute anchors, fan the
//! respondent x sample tasks out in batches, aggregate.

use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::aggregation::{aggregate_pmfs, bootstrap_confidence, ConfidenceInterval, DEFAULT_BOOTSTRAP_SAMPLES, DEFAULT_CONFIDENCE_LEVEL};
use super::budget::{apply_dry_run_limits, estimate_cost, CostStats, CostTracker};
use crate::backend::{Backend, CacheManager, CachedBackend, GovernedBackend};
use crate::config::{Method, PipelineConfig, PipelineOverrides};
use crate::domain::{Persona, PricePoint, ProductConcept};
use crate::error::{BackendError, ConfigError, GuardrailError, PipelineError};
use crate::safety::{PipelineThrottler, StageSemaphore};
use crate::ssr::{anchor_sets, LikertPmf, PmfMetrics};
use crate::strategy::{compute_anchor_embeddings, SampleOutcome, Strategy};

/// Snapshot handed to the progress callback after every settled task.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Progress {
    pub completed: usize,
    pub total: usize,
    pub stage: String,
    pub credits_used: u64,
}

/// Observational only; must not block.
pub type ProgressCallback = Arc<dyn Fn(Progress) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Configuring,
    Preparing,
    Executing,
    Aggregating,
    Done,
    Aborted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct TaskKey {
    pub respondent_id: usize,
    pub sample_idx: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskFailure {
    pub respondent_id: usize,
    pub sample_idx: usize,
    pub reason: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TaskSummary {
    pub total: usize,
    pub completed: usize,
    pub failed: usize,
    /// Samples whose rating stage fell back to neutral.
    pub fallbacks: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RespondentResult {
    pub respondent_id: usize,
    pub sample_pmfs: Vec<LikertPmf>,
    pub average_pmf: LikertPmf,
    pub rationales: Option<Vec<String>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SimulationResult {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub concept_id: String,
    pub method: Method,
    pub config: PipelineConfig,
    pub respondents: Vec<RespondentResult>,
    pub aggregated_pmf: LikertPmf,
    pub metrics: PmfMetrics,
    pub top2_box_ci: ConfidenceInterval,
    pub credits_used: u64,
    pub duration_ms: u64,
    pub tasks: TaskSummary,
    pub failures: Vec<TaskFailure>,
    /// Some tasks failed and were left out of the aggregate.
    pub degraded: bool,
    pub cost: CostStats,
}

struct TaskRecord {
    key: TaskKey,
    outcome: Result<SampleOutcome, BackendError>,
}

/// Everything a single task borrows from the run.
struct TaskContext<'a> {
    strategy: &'a Strategy,
    backend: &'a dyn Backend,
    pool: &'a StageSemaphore,
    tracker: &'a CostTracker,
    persona: &'a Persona,
    concept: &'a ProductConcept,
    price: &'a PricePoint,
    progress: Option<&'a ProgressCallback>,
    settled: AtomicUsize,
    total: usize,
    samples_per_respondent: usize,
}

impl TaskContext<'_> {
    /// `None` when the cost cap tripped before the task started.
    async fn run(&self, key: TaskKey) -> Option<Result<SampleOutcome, BackendError>> {
        if self.tracker.should_stop() {
            return None;
        }

        let outcome = {
            let _permit = self.pool.acquire().await;
            self.strategy
                .execute(self.backend, self.persona, self.concept, self.price)
                .await
        };

        if let Err(ref e) = outcome {
            warn!(
                "Task respondent={} sample={} failed: {}",
                key.respondent_id, key.sample_idx, e
            );
        }

        let done = self.settled.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(cb) = self.progress {
            let per_credit = (100 * self.samples_per_respondent) as u64;
            cb(Progress {
                completed: done,
                total: self.total,
                stage: self.strategy.method().to_string(),
                credits_used: (done as u64).div_ceil(per_credit),
            });
        }

        Some(outcome)
    }
}

fn transition(run_id: &Uuid, state: RunState) {
    info!("Run {}: {:?}", run_id, state);
}

pub struct PipelineRunner {
    backend: Arc<dyn Backend>,
    cache: Option<Arc<CacheManager>>,
    seed: Option<u64>,
    bootstrap_samples: usize,
}

impl PipelineRunner {
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self {
            backend,
            cache: None,
            seed: None,
            bootstrap_samples: DEFAULT_BOOTSTRAP_SAMPLES,
        }
    }

    /// Shares `cache` with every run of this runner.
    pub fn with_cache(mut self, cache: Arc<CacheManager>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Makes the bootstrap interval reproducible.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn with_bootstrap_samples(mut self, n: usize) -> Self {
        self.bootstrap_samples = n;
        self
    }

    pub fn cache(&self) -> Option<&Arc<CacheManager>> {
        self.cache.as_ref()
    }

    /// Merges overrides onto defaults, validates, then applies dry-run clamps.
    pub fn configure(overrides: PipelineOverrides) -> Result<PipelineConfig, ConfigError> {
        let config = PipelineConfig::from_overrides(overrides)?;
        Ok(if config.dry_run { apply_dry_run_limits(config) } else { config })
    }

    pub async fn run(
        &self,
        persona: &Persona,
        concept: &ProductConcept,
        price: &PricePoint,
        overrides: PipelineOverrides,
        progress: Option<ProgressCallback>,
    ) -> Result<SimulationResult, PipelineError> {
        let config = Self::configure(overrides)?;
        self.run_with_config(config, persona, concept, price, progress).await
    }

    /// Per-run backend stack: cache (if enabled) over throttling and cost
    /// accounting over the caller's backend.
    fn backend_stack(
        &self,
        config: &PipelineConfig,
        throttler: Arc<PipelineThrottler>,
        tracker: CostTracker,
    ) -> Result<Arc<dyn Backend>, ConfigError> {
        let governed: Arc<dyn Backend> = Arc::new(GovernedBackend::new(
            self.backend.clone(),
            throttler,
            tracker,
            config.method.estimated_tokens(),
        )?);

        Ok(match (&self.cache, config.use_cache) {
            (Some(cache), true) => Arc::new(CachedBackend::new(governed, cache.clone())),
            _ => governed,
        })
    }

    pub async fn run_with_config(
        &self,
        config: PipelineConfig,
        persona: &Persona,
        concept: &ProductConcept,
        price: &PricePoint,
        progress: Option<ProgressCallback>,
    ) -> Result<SimulationResult, PipelineError> {
        let started = std::time::Instant::now();
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();

        transition(&run_id, RunState::Configuring);
        let config = if config.dry_run { apply_dry_run_limits(config) } else { config };
        config.validate()?;
        let throttler = Arc::new(PipelineThrottler::from_config(&config));
        let tracker = CostTracker::new(config.cost_cap_usd);
        let estimate = estimate_cost(
            config.n_respondents as u64,
            config.n_samples_per_respondent as u64,
            config.method,
        );
        if let Some(ref warning) = estimate.warning {
            warn!("{}", warning);
        }
        let backend = self.backend_stack(&config, throttler.clone(), tracker.clone())?;

        transition(&run_id, RunState::Preparing);
        let anchors = match config.method {
            Method::Ssr => {
                if !backend.supports_embeddings() {
                    return Err(ConfigError::EmbeddingsUnavailable.into());
                }
                let sets = anchor_sets(config.ssr.anchor_sets);
                Some(Arc::new(compute_anchor_embeddings(backend.as_ref(), sets).await?))
            }
            Method::Dlr | Method::Flr => None,
        };
        let strategy = Strategy::from_config(&config, anchors)?;
        let pool = throttler.stage(config.method.stage())?;

        transition(&run_id, RunState::Executing);
        let ctx = TaskContext {
            strategy: &strategy,
            backend: backend.as_ref(),
            pool: pool.as_ref(),
            tracker: &tracker,
            persona,
            concept,
            price,
            progress: progress.as_ref(),
            settled: AtomicUsize::new(0),
            total: config.total_tasks(),
            samples_per_respondent: config.n_samples_per_respondent,
        };
        let records = match execute_batches(&config, &ctx).await {
            Ok(records) => records,
            Err(e) => {
                transition(&run_id, RunState::Aborted);
                return Err(e);
            }
        };

        transition(&run_id, RunState::Aggregating);
        let mut rng = match self.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let aggregate = aggregate_records(records, self.bootstrap_samples, &mut rng);

        if aggregate.summary.completed == 0 {
            transition(&run_id, RunState::Aborted);
            let first = aggregate
                .failures
                .first()
                .map(|f| f.reason.clone())
                .unwrap_or_default();
            return Err(PipelineError::AllTasksFailed {
                total: aggregate.summary.total,
                first,
            });
        }

        tracker.record_credits(estimate.credits_needed);
        transition(&run_id, RunState::Done);
        info!(
            "Run {} finished: {}/{} tasks, top2box {:.3}",
            run_id, aggregate.summary.completed, aggregate.summary.total, aggregate.metrics.top2_box
        );

        Ok(SimulationResult {
            run_id,
            started_at,
            concept_id: concept.concept_id().to_string(),
            method: config.method,
            config,
            respondents: aggregate.respondents,
            aggregated_pmf: aggregate.pmf,
            metrics: aggregate.metrics,
            top2_box_ci: aggregate.ci,
            credits_used: estimate.credits_needed,
            duration_ms: started.elapsed().as_millis() as u64,
            degraded: aggregate.summary.failed > 0,
            tasks: aggregate.summary,
            failures: aggregate.failures,
            cost: tracker.stats(),
        })
    }
}

/// Runs the respondent x sample grid in batches of the method's
/// concurrency. Each batch settles fully before the next starts; the cost
/// cap is checked before every batch and every task.
async fn execute_batches(config: &PipelineConfig, ctx: &TaskContext<'_>) -> Result<Vec<TaskRecord>, PipelineError> {
    let tasks: Vec<TaskKey> = (0..config.n_respondents)
        .flat_map(|r| {
            (0..config.n_samples_per_respondent).map(move |s| TaskKey {
                respondent_id: r,
                sample_idx: s,
            })
        })
        .collect();
    let total = tasks.len();
    let batch_size = config.concurrency.for_method(config.method).max(1);
    let mut records: Vec<TaskRecord> = Vec::with_capacity(total);

    for (i, batch) in tasks.chunks(batch_size).enumerate() {
        if ctx.tracker.should_stop() {
            warn!("Cost cap reached before batch {}; not launching further tasks", i);
            break;
        }
        debug!("Batch {} ({} tasks)", i, batch.len());

        let results = join_all(batch.iter().map(|key| ctx.run(*key))).await;
        for (key, result) in batch.iter().zip(results) {
            if let Some(outcome) = result {
                records.push(TaskRecord { key: *key, outcome });
            }
        }

        let fatal = records
            .iter()
            .filter_map(|r| r.outcome.as_ref().err())
            .find(|e| e.is_fatal());
        if let Some(e) = fatal {
            return Err(e.clone().into());
        }
    }

    if records.len() < total {
        let completed = records.iter().filter(|r| r.outcome.is_ok()).count();
        let cause = ctx.tracker.violation().unwrap_or(GuardrailError::CostCapExceeded {
            projected_usd: ctx.tracker.projected_cost_usd(),
            cap_usd: config.cost_cap_usd.unwrap_or_default(),
        });
        return Err(PipelineError::Aborted { completed, total, cause });
    }

    Ok(records)
}

struct Aggregate {
    respondents: Vec<RespondentResult>,
    pmf: LikertPmf,
    metrics: PmfMetrics,
    ci: ConfidenceInterval,
    summary: TaskSummary,
    failures: Vec<TaskFailure>,
}

/// Groups samples per respondent (ordered by sample index, so completion
/// order does not matter) and averages twice: samples within a respondent,
/// then respondents. Failed tasks are reported, not averaged.
fn aggregate_records(records: Vec<TaskRecord>, bootstrap_samples: usize, rng: &mut StdRng) -> Aggregate {
    let mut summary = TaskSummary {
        total: records.len(),
        ..Default::default()
    };
    let mut failures = Vec::new();
    let mut by_respondent: BTreeMap<usize, Vec<(usize, SampleOutcome)>> = BTreeMap::new();

    for record in records {
        match record.outcome {
            Ok(sample) => {
                summary.completed += 1;
                if sample.fell_back {
                    summary.fallbacks += 1;
                }
                by_respondent
                    .entry(record.key.respondent_id)
                    .or_default()
                    .push((record.key.sample_idx, sample));
            }
            Err(e) => {
                summary.failed += 1;
                failures.push(TaskFailure {
                    respondent_id: record.key.respondent_id,
                    sample_idx: record.key.sample_idx,
                    reason: e.to_string(),
                });
            }
        }
    }
    failures.sort_by_key(|f| (f.respondent_id, f.sample_idx));

    let respondents: Vec<RespondentResult> = by_respondent
        .into_iter()
        .map(|(respondent_id, mut samples)| {
            samples.sort_by_key(|(idx, _)| *idx);
            let sample_pmfs: Vec<LikertPmf> = samples.iter().map(|(_, s)| s.pmf).collect();
            let rationales: Vec<String> = samples.into_iter().filter_map(|(_, s)| s.rationale).collect();
            RespondentResult {
                respondent_id,
                average_pmf: aggregate_pmfs(&sample_pmfs),
                sample_pmfs,
                rationales: (!rationales.is_empty()).then_some(rationales),
            }
        })
        .collect();

    let averages: Vec<LikertPmf> = respondents.iter().map(|r| r.average_pmf).collect();
    let pmf = aggregate_pmfs(&averages);
    let ci = bootstrap_confidence(&averages, DEFAULT_CONFIDENCE_LEVEL, bootstrap_samples, rng);

    Aggregate {
        respondents,
        metrics: PmfMetrics::from(&pmf),
        pmf,
        ci,
        summary,
        failures,
    }
}

/// Single-call entry point. A fresh cache is created for the run when the
/// configuration asks for one.
pub async fn run_pipeline(
    backend: Arc<dyn Backend>,
    persona: &Persona,
    concept: &ProductConcept,
    price: &PricePoint,
    overrides: PipelineOverrides,
    progress: Option<ProgressCallback>,
) -> Result<SimulationResult, PipelineError> {
    let runner = PipelineRunner::new(backend).with_cache(Arc::new(CacheManager::new()));
    runner.run(persona, concept, price, overrides, progress).await
}
