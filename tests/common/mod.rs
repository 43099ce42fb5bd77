#![allow(dead_code)]

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use purchase_intent::backend::{Backend, EmbeddingOutput, GenerateRequest, Generation, Usage};
use purchase_intent::ssr::{Embedding, ANCHOR_SETS};
use purchase_intent::{BackendError, Persona, PricePoint, ProductConcept};

pub const EMBEDDING_DIM: usize = 8;

type ReplyFn = dyn Fn(usize, &GenerateRequest) -> Result<String, BackendError> + Send + Sync;

/// In-process backend. Replies come from a closure that sees the call index
/// and the request; embeddings are derived from the anchor statements so SSR
/// scores are predictable.
pub struct MockBackend {
    reply: Box<ReplyFn>,
    usage: Option<Usage>,
    embeddings: bool,
    pub generate_calls: AtomicUsize,
    pub embed_calls: AtomicUsize,
    pub anchor_embed_calls: AtomicUsize,
}

impl MockBackend {
    pub fn new(reply: impl Fn(usize, &GenerateRequest) -> Result<String, BackendError> + Send + Sync + 'static) -> Self {
        Self {
            reply: Box::new(reply),
            usage: None,
            embeddings: true,
            generate_calls: AtomicUsize::new(0),
            embed_calls: AtomicUsize::new(0),
            anchor_embed_calls: AtomicUsize::new(0),
        }
    }

    pub fn replying(text: &'static str) -> Self {
        Self::new(move |_, _| Ok(text.to_string()))
    }

    pub fn with_usage(mut self, input_tokens: u64, output_tokens: u64) -> Self {
        self.usage = Some(Usage {
            input_tokens,
            output_tokens,
        });
        self
    }

    pub fn without_embeddings(mut self) -> Self {
        self.embeddings = false;
        self
    }

    pub fn into_arc(self) -> Arc<Self> {
        Arc::new(self)
    }

    pub fn generations(&self) -> usize {
        self.generate_calls.load(Ordering::SeqCst)
    }

    pub fn anchor_embeddings(&self) -> usize {
        self.anchor_embed_calls.load(Ordering::SeqCst)
    }
}

/// Anchor `level` (0-based) of set `set`: a unit vector on the level axis
/// plus a small set-specific offset.
pub fn anchor_vector(set: usize, level: usize) -> Embedding {
    let mut v = vec![0.0; EMBEDDING_DIM];
    v[level] = 1.0;
    v[5 + set % 3] = 0.1;
    v
}

fn locate_anchor(text: &str) -> Option<(usize, usize)> {
    ANCHOR_SETS.iter().enumerate().find_map(|(s, set)| {
        set.iter().position(|a| *a == text).map(|level| (s, level))
    })
}

/// Enthusiastic answers match the top anchor of the first set exactly;
/// anything else sits on the neutral axis.
pub fn response_vector(text: &str) -> Embedding {
    if text.to_lowercase().contains("love") {
        anchor_vector(0, 4)
    } else {
        anchor_vector(0, 2)
    }
}

#[async_trait]
impl Backend for MockBackend {
    fn model(&self) -> &str {
        "mock-model"
    }

    fn embedding_model(&self) -> &str {
        "mock-embedding"
    }

    fn supports_embeddings(&self) -> bool {
        self.embeddings
    }

    async fn generate_text(&self, request: &GenerateRequest) -> Result<Generation, BackendError> {
        let index = self.generate_calls.fetch_add(1, Ordering::SeqCst);
        let text = (self.reply)(index, request)?;
        Ok(Generation {
            text,
            usage: self.usage,
        })
    }

    async fn embed_text(&self, text: &str) -> Result<EmbeddingOutput, BackendError> {
        if !self.embeddings {
            return Err(BackendError::EmbeddingsUnsupported);
        }
        self.embed_calls.fetch_add(1, Ordering::SeqCst);
        let embedding = match locate_anchor(text) {
            Some((set, level)) => {
                self.anchor_embed_calls.fetch_add(1, Ordering::SeqCst);
                anchor_vector(set, level)
            }
            None => response_vector(text),
        };
        Ok(EmbeddingOutput {
            embedding,
            tokens: Some(8),
        })
    }
}

pub fn persona() -> Persona {
    Persona::preset("clean-beauty").unwrap()
}

pub fn concept() -> ProductConcept {
    ProductConcept {
        id: Some("serum-01".into()),
        name: "Barrier Repair Serum".into(),
        category: "Skincare".into(),
        description: "Fragrance-free ceramide serum for sensitive skin.".into(),
        features: vec!["Ceramides".into(), "Refillable bottle".into()],
        claims: vec!["Dermatologist tested".into()],
        positioning: None,
    }
}

pub fn price(p: f64) -> PricePoint {
    PricePoint::one_time(p)
}
