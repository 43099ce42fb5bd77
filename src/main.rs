//! Purchase-intent simulator
//!
//! Reads a YAML job file, runs the price-curve study against an
//! OpenAI-compatible backend and prints the result as JSON.
//!
//! Usage: `purchase_intent <job.yaml>`

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::sync::Arc;
use tracing::info;

use purchase_intent::orchestrator::{simulate_price_curve, CreditBalance, Progress, ProgressCallback};
use purchase_intent::utils::init_telemetry;
use purchase_intent::{
    Backend, CacheManager, OpenAIBackend, Persona, PipelineOverrides, PipelineRunner, PricePoint, ProductConcept,
};

// ──────────────────────────────────────────────────────────────────────────────
// JOB FILE
// ──────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum PersonaSpec {
    Preset { preset: String },
    Inline(Persona),
}

impl PersonaSpec {
    fn resolve(self) -> Result<Persona> {
        match self {
            PersonaSpec::Inline(p) => Ok(p),
            PersonaSpec::Preset { preset } => Persona::preset(&preset).with_context(|| {
                format!(
                    "unknown persona preset '{}' (available: {})",
                    preset,
                    Persona::preset_names().join(", ")
                )
            }),
        }
    }
}

#[derive(Debug, Deserialize)]
struct Job {
    persona: PersonaSpec,
    concept: ProductConcept,
    price_points: Vec<PricePoint>,
    #[serde(default)]
    overrides: PipelineOverrides,
    #[serde(default)]
    credits_available: Option<u64>,
    #[serde(default)]
    allow_overage: bool,
}

// ──────────────────────────────────────────────────────────────────────────────
// MAIN ENTRY POINT
// ──────────────────────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();

    let otlp = std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT").is_ok();
    let _guard = init_telemetry("purchase_intent", otlp).map_err(|e| anyhow::anyhow!("telemetry: {}", e))?;

    let Some(path) = std::env::args().nth(1) else {
        bail!("usage: purchase_intent <job.yaml>");
    };
    let raw = tokio::fs::read_to_string(&path)
        .await
        .with_context(|| format!("reading job file {}", path))?;
    let job: Job = serde_yaml::from_str(&raw).with_context(|| format!("parsing job file {}", path))?;
    let persona = job.persona.resolve()?;

    eprintln!("\n{}", "═".repeat(60));
    eprintln!("🛒 Purchase Intent Simulator v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("{}", "═".repeat(60));
    eprintln!("Concept: {} | Price points: {}", job.concept.name, job.price_points.len());
    eprintln!("{}\n", "═".repeat(60));

    let backend: Arc<dyn Backend> = Arc::new(OpenAIBackend::from_env()?);
    info!("Backend model: {} (embeddings: {})", backend.model(), backend.embedding_model());

    let runner = PipelineRunner::new(backend).with_cache(Arc::new(CacheManager::new()));
    let progress: ProgressCallback = Arc::new(|p: Progress| {
        if p.completed == p.total || p.completed % 25 == 0 {
            info!("[{}] {}/{} tasks, {} credit(s)", p.stage, p.completed, p.total, p.credits_used);
        }
    });
    let credits = job.credits_available.map(|available| CreditBalance {
        available,
        overage_enabled: job.allow_overage,
    });

    let curve = simulate_price_curve(
        &runner,
        &persona,
        &job.concept,
        &job.price_points,
        job.overrides,
        credits,
        Some(progress),
    )
    .await?;

    if let Some(cache) = runner.cache() {
        let stats = cache.stats().await;
        info!("Cache: {} hits, {} misses ({:.1}%)", stats.hits, stats.misses, stats.hit_rate * 100.0);
    }
    for cliff in &curve.cliffs {
        eprintln!(
            "⚠️  Price cliff ${} → ${}: top-2-box −{:.1} pts ({:.0}%)",
            cliff.from_price,
            cliff.to_price,
            cliff.drop * 100.0,
            cliff.percent_drop * 100.0
        );
    }

    println!("{}", serde_json::to_string_pretty(&curve)?);
    Ok(())
}
