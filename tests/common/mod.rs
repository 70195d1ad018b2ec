//! Shared mock ports for integration tests.
#![allow(dead_code)]

use async_trait::async_trait;
use folio::error::FolioError;
use folio::ports::{EmbeddingPort, GenerateRequest, LanguageModelPort};
use folio::Result;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

/// Deterministic bag-of-words embedding over 8 hash buckets, unit-normalized.
/// Texts sharing words land close together, which is all the scorer needs.
pub fn vectorize(text: &str) -> Vec<f32> {
    let mut v = [0f32; 8];
    for word in text.split_whitespace() {
        let bucket: usize = word.bytes().map(|b| b as usize).sum();
        v[bucket % 8] += 1.0;
    }
    let mag = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if mag == 0.0 {
        v[0] = 1.0;
        return v.to_vec();
    }
    v.iter().map(|x| x / mag).collect()
}

pub struct MockEmbedder {
    calls: AtomicUsize,
    fail_after: AtomicUsize,
}

impl MockEmbedder {
    pub fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
            fail_after: AtomicUsize::new(usize::MAX),
        }
    }

    /// Make every embed call starting at the `n`-th (0-based) fail.
    pub fn fail_from(&self, n: usize) {
        self.fail_after.store(n, Ordering::SeqCst);
    }

    pub fn recover(&self) {
        self.fail_after.store(usize::MAX, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EmbeddingPort for MockEmbedder {
    async fn embed(&self, text: &str, prefix: &str) -> Result<Vec<f32>> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        if n >= self.fail_after.load(Ordering::SeqCst) {
            return Err(FolioError::Embedding("simulated outage".to_string()));
        }
        Ok(vectorize(&format!("{prefix}{text}")))
    }

    fn dimension(&self) -> usize {
        8
    }
}

/// Language-model stub that recognizes each prompt family by its fixed
/// markers and answers in the exact format the caller parses, while counting
/// calls per family.
#[derive(Default)]
pub struct ScriptedLlm {
    pub ocr_calls: AtomicUsize,
    pub summary_calls: AtomicUsize,
    pub relevance_calls: AtomicUsize,
    pub answer_calls: AtomicUsize,
    pub fusion_calls: AtomicUsize,
    pub augment_calls: AtomicUsize,
    /// When set, fusion prompts fail while every other family still answers.
    pub fail_fusion: AtomicBool,
    /// Sampling parameters seen by every call, in call order.
    pub sampling: Mutex<Vec<(f32, u32)>>,
}

impl ScriptedLlm {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn total_calls(&self) -> usize {
        self.ocr_calls.load(Ordering::SeqCst)
            + self.summary_calls.load(Ordering::SeqCst)
            + self.relevance_calls.load(Ordering::SeqCst)
            + self.answer_calls.load(Ordering::SeqCst)
            + self.fusion_calls.load(Ordering::SeqCst)
            + self.augment_calls.load(Ordering::SeqCst)
    }
}

fn between<'a>(text: &'a str, start: &str, end: &str) -> Option<&'a str> {
    let from = text.find(start)? + start.len();
    let to = text[from..].find(end)? + from;
    Some(&text[from..to])
}

#[async_trait]
impl LanguageModelPort for ScriptedLlm {
    async fn generate(&self, request: GenerateRequest) -> Result<String> {
        let prompt = &request.prompt;
        self.sampling
            .lock()
            .unwrap()
            .push((request.temperature, request.max_tokens));

        if prompt.contains("Texte à corriger:") {
            self.ocr_calls.fetch_add(1, Ordering::SeqCst);
            let corrected = between(prompt, "Texte à corriger:\n", "\n\nInstructions")
                .unwrap_or("")
                .to_string();
            return Ok(corrected);
        }

        if prompt.contains("FORMAT DE RÉPONSE REQUIS") {
            self.relevance_calls.fetch_add(1, Ordering::SeqCst);
            let passages = prompt.matches("(Page ").count();
            let verdicts: Vec<String> = (1..=passages)
                .map(|i| format!("PASSAGE {i}: OUI"))
                .collect();
            return Ok(verdicts.join("\n"));
        }

        if prompt.contains("RÉPONSES PARTIELLES") {
            self.fusion_calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_fusion.load(Ordering::SeqCst) {
                return Err(FolioError::Model("fusion indisponible".to_string()));
            }
            return Ok("Réponse fusionnée [Document: livre, Page 1].".to_string());
        }

        if prompt.contains("RÉPONSE À ENRICHIR") {
            self.augment_calls.fetch_add(1, Ordering::SeqCst);
            let merged = between(prompt, "RÉPONSE À ENRICHIR:\n", "\n\nInstructions")
                .unwrap_or("")
                .to_string();
            return Ok(format!(
                "{merged}\n\n# Limites de l'analyse\nPortée restreinte aux passages consultés.\n\n\
                 # Autres recherches associées\n- Question complémentaire."
            ));
        }

        if prompt.contains("DOCUMENTATION:") {
            self.answer_calls.fetch_add(1, Ordering::SeqCst);
            return Ok("Réponse partielle [Document: livre, Page 1].".to_string());
        }

        if prompt.contains("TEXTES À RÉSUMER") {
            self.summary_calls.fetch_add(1, Ordering::SeqCst);
            return Ok("Résumé combiné des passages précédents.".to_string());
        }

        Err(FolioError::Model(format!(
            "unexpected prompt: {}",
            &prompt[..prompt.len().min(80)]
        )))
    }
}
