//! Backend Response Cache
//!
//! Content-addressed in-memory cache for generations and embeddings. Keys
//! are SHA-256 digests of the serialized request parameters, so they are
//! stable across processes.

use async_trait::async_trait;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

use super::{Backend, EmbeddingOutput, GenerateRequest, Generation};
use crate::error::BackendError;

pub const DEFAULT_TTL: Duration = Duration::from_secs(3600);
pub const GENERATION_CAPACITY: usize = 5000;
pub const EMBEDDING_CAPACITY: usize = 10_000;

struct CacheEntry<T> {
    value: T,
    inserted_at: Instant,
    seq: u64,
}

struct Slots<T> {
    entries: HashMap<String, CacheEntry<T>>,
    /// Insertion order; the first key is evicted first.
    order: BTreeMap<u64, String>,
    next_seq: u64,
}

impl<T> Slots<T> {
    fn remove(&mut self, key: &str) -> Option<CacheEntry<T>> {
        let entry = self.entries.remove(key)?;
        self.order.remove(&entry.seq);
        Some(entry)
    }

    fn push(&mut self, key: String, value: T, inserted_at: Instant) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.order.insert(seq, key.clone());
        self.entries.insert(key, CacheEntry { value, inserted_at, seq });
    }
}

/// Bounded map with FIFO eviction and a per-entry time-to-live. Reads move
/// an entry to the back of the queue.
pub struct MemoryCache<T> {
    slots: Mutex<Slots<T>>,
    max_size: usize,
    ttl: Duration,
}

impl<T: Clone> MemoryCache<T> {
    pub fn new(max_size: usize, ttl: Duration) -> Self {
        Self {
            slots: Mutex::new(Slots {
                entries: HashMap::new(),
                order: BTreeMap::new(),
                next_seq: 0,
            }),
            max_size: max_size.max(1),
            ttl,
        }
    }

    pub async fn get(&self, key: &str) -> Option<T> {
        let mut slots = self.slots.lock().await;
        let entry = slots.remove(key)?;
        if entry.inserted_at.elapsed() > self.ttl {
            return None;
        }
        let value = entry.value.clone();
        slots.push(key.to_string(), entry.value, entry.inserted_at);
        Some(value)
    }

    pub async fn set(&self, key: String, value: T) {
        let mut slots = self.slots.lock().await;
        slots.remove(&key);
        while slots.entries.len() >= self.max_size {
            let oldest = match slots.order.values().next() {
                Some(k) => k.clone(),
                None => break,
            };
            slots.remove(&oldest);
        }
        slots.push(key, value, Instant::now());
    }

    pub async fn clear(&self) {
        let mut slots = self.slots.lock().await;
        slots.entries.clear();
        slots.order.clear();
    }

    /// Drops every expired entry.
    pub async fn sweep(&self) -> usize {
        let mut slots = self.slots.lock().await;
        let expired: Vec<String> = slots
            .entries
            .iter()
            .filter(|(_, e)| e.inserted_at.elapsed() > self.ttl)
            .map(|(k, _)| k.clone())
            .collect();
        for key in &expired {
            slots.remove(key);
        }
        expired.len()
    }

    pub async fn len(&self) -> usize {
        self.slots.lock().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[derive(Serialize)]
struct GenerationKey<'a> {
    model: &'a str,
    system: &'a str,
    user: &'a str,
    temperature: Option<f32>,
    max_tokens: Option<u32>,
}

#[derive(Serialize)]
struct EmbeddingKey<'a> {
    model: &'a str,
    text: &'a str,
}

fn digest<K: Serialize>(key: &K) -> String {
    let mut hasher = Sha256::new();
    hasher.update(serde_json::to_string(key).unwrap_or_default().as_bytes());
    hex::encode(hasher.finalize())
}

pub fn generation_key(model: &str, request: &GenerateRequest) -> String {
    digest(&GenerationKey {
        model,
        system: &request.system,
        user: &request.user,
        temperature: request.temperature,
        max_tokens: request.max_tokens,
    })
}

pub fn embedding_key(model: &str, text: &str) -> String {
    digest(&EmbeddingKey { model, text })
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub hit_rate: f64,
    pub generation_entries: usize,
    pub embedding_entries: usize,
}

/// Explicitly constructed cache shared by every run that holds it.
pub struct CacheManager {
    generations: MemoryCache<Generation>,
    embeddings: MemoryCache<EmbeddingOutput>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl CacheManager {
    pub fn new() -> Self {
        Self::with_limits(GENERATION_CAPACITY, EMBEDDING_CAPACITY, DEFAULT_TTL)
    }

    pub fn with_limits(generation_capacity: usize, embedding_capacity: usize, ttl: Duration) -> Self {
        Self {
            generations: MemoryCache::new(generation_capacity, ttl),
            embeddings: MemoryCache::new(embedding_capacity, ttl),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    fn count<T>(&self, found: Option<T>) -> Option<T> {
        let counter = if found.is_some() { &self.hits } else { &self.misses };
        counter.fetch_add(1, Ordering::Relaxed);
        found
    }

    pub async fn get_generation(&self, key: &str) -> Option<Generation> {
        let found = self.generations.get(key).await;
        self.count(found)
    }

    pub async fn set_generation(&self, key: String, value: Generation) {
        self.generations.set(key, value).await;
    }

    pub async fn get_embedding(&self, key: &str) -> Option<EmbeddingOutput> {
        let found = self.embeddings.get(key).await;
        self.count(found)
    }

    pub async fn set_embedding(&self, key: String, value: EmbeddingOutput) {
        self.embeddings.set(key, value).await;
    }

    pub async fn clear(&self) {
        self.generations.clear().await;
        self.embeddings.clear().await;
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
    }

    pub async fn sweep(&self) -> usize {
        self.generations.sweep().await + self.embeddings.sweep().await
    }

    pub async fn stats(&self) -> CacheStats {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        CacheStats {
            hits,
            misses,
            hit_rate: if total > 0 { hits as f64 / total as f64 } else { 0.0 },
            generation_entries: self.generations.len().await,
            embedding_entries: self.embeddings.len().await,
        }
    }
}

impl Default for CacheManager {
    fn default() -> Self {
        Self::new()
    }
}

/// Backend that answers repeated requests from a [`CacheManager`].
///
/// Sampled generations (temperature > 0) always reach the inner backend so
/// independent samples stay independent.
pub struct CachedBackend {
    inner: Arc<dyn Backend>,
    cache: Arc<CacheManager>,
}

impl CachedBackend {
    pub fn new(inner: Arc<dyn Backend>, cache: Arc<CacheManager>) -> Self {
        Self { inner, cache }
    }
}

#[async_trait]
impl Backend for CachedBackend {
    fn model(&self) -> &str {
        self.inner.model()
    }

    fn embedding_model(&self) -> &str {
        self.inner.embedding_model()
    }

    fn supports_embeddings(&self) -> bool {
        self.inner.supports_embeddings()
    }

    async fn generate_text(&self, request: &GenerateRequest) -> Result<Generation, BackendError> {
        if !request.is_deterministic() {
            return self.inner.generate_text(request).await;
        }

        let key = generation_key(self.inner.model(), request);
        if let Some(cached) = self.cache.get_generation(&key).await {
            debug!("Generation cache hit for model {}", self.inner.model());
            return Ok(cached);
        }

        let generation = self.inner.generate_text(request).await?;
        self.cache.set_generation(key, generation.clone()).await;
        Ok(generation)
    }

    async fn embed_text(&self, text: &str) -> Result<EmbeddingOutput, BackendError> {
        let key = embedding_key(self.inner.embedding_model(), text);
        if let Some(cached) = self.cache.get_embedding(&key).await {
            debug!("Embedding cache hit for model {}", self.inner.embedding_model());
            return Ok(cached);
        }

        let output = self.inner.embed_text(text).await?;
        self.cache.set_embedding(key, output.clone()).await;
        Ok(output)
    }

    async fn embed_texts(&self, texts: &[String]) -> Result<Vec<EmbeddingOutput>, BackendError> {
        let model = self.inner.embedding_model();
        let mut results: Vec<Option<EmbeddingOutput>> = Vec::with_capacity(texts.len());
        let mut missing = Vec::new();

        for (i, text) in texts.iter().enumerate() {
            let cached = self.cache.get_embedding(&embedding_key(model, text)).await;
            if cached.is_none() {
                missing.push(i);
            }
            results.push(cached);
        }

        if !missing.is_empty() {
            let batch: Vec<String> = missing.iter().map(|&i| texts[i].clone()).collect();
            let fetched = self.inner.embed_texts(&batch).await?;
            if fetched.len() != batch.len() {
                return Err(BackendError::MalformedResponse(format!(
                    "expected {} embeddings, got {}",
                    batch.len(),
                    fetched.len()
                )));
            }
            for (&i, output) in missing.iter().zip(fetched) {
                self.cache.set_embedding(embedding_key(model, &texts[i]), output.clone()).await;
                results[i] = Some(output);
            }
        } else {
            debug!("All {} embeddings served from cache", texts.len());
        }

        results
            .into_iter()
            .map(|r| r.ok_or_else(|| BackendError::MalformedResponse("missing embedding".to_string())))
            .collect()
    }
}
