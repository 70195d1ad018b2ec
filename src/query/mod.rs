//! Query pipeline: from a natural-language question to a cited answer
//!
//! Stages run in a fixed order: keyword extraction, query embedding, cache
//! lookup, scoring of every tree node behind the keyword gate, top-N
//! selection, LLM relevance filtering, token-bounded batch planning, one
//! generation call per batch, then recursive merge and augmentation. Stage
//! boundaries are strict: each stage consumes the previous stage's full
//! output, and per-item failures degrade the result instead of aborting it.

mod filter;
mod merger;
mod planner;
mod scorer;

pub use filter::{FilterPolicy, RelevanceFilter};
pub use merger::ResponseMerger;
pub use planner::{build_documentation, plan_batches, Batch};
pub use scorer::{score_trees, select_top_matches, Match, ScoredMatches};

use crate::cache::{QueryCache, VectorCache};
use crate::config::Config;
use crate::error::Result;
use crate::ports::{EmbeddingPort, GenerateRequest, LanguageModelPort};
use crate::text::extract_keywords;
use crate::tree::{DocumentTree, TreeStore};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

/// Receiver for human-readable progress messages emitted while a query runs.
pub trait ProgressSink: Send + Sync {
    fn report(&self, message: &str);
}

/// Sink that discards every message.
pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn report(&self, _message: &str) {}
}

#[derive(Debug, Clone)]
pub struct QueryRequest {
    pub query: String,
    /// Document keys to search, as registered in the tree store.
    pub files: Vec<String>,
    /// Bypass the response cache and force a full pipeline run.
    pub force_new: bool,
    /// Free-form instructions forwarded to generation and augmentation.
    pub additional_instructions: String,
}

impl QueryRequest {
    pub fn new(query: impl Into<String>, files: Vec<String>) -> Self {
        Self {
            query: query.into(),
            files,
            force_new: false,
            additional_instructions: String::new(),
        }
    }
}

/// Terminal state of a query run. Infrastructure failures surface as the
/// `Error` variant rather than a `Result`, so callers always get a
/// displayable outcome.
#[derive(Debug, Clone)]
pub enum QueryOutcome {
    Answer {
        response: String,
        matches: Vec<Match>,
        from_cache: bool,
    },
    /// Scoring or filtering left nothing to answer from.
    NoRelevantPassages,
    Error {
        message: String,
    },
}

pub struct QueryPipeline {
    llm: Arc<dyn LanguageModelPort>,
    embedder: Arc<dyn EmbeddingPort>,
    store: Arc<TreeStore>,
    vector_cache: Arc<VectorCache>,
    query_cache: Arc<QueryCache>,
    config: Arc<Config>,
}

impl QueryPipeline {
    pub fn new(
        llm: Arc<dyn LanguageModelPort>,
        embedder: Arc<dyn EmbeddingPort>,
        store: Arc<TreeStore>,
        vector_cache: Arc<VectorCache>,
        query_cache: Arc<QueryCache>,
        config: Arc<Config>,
    ) -> Self {
        Self {
            llm,
            embedder,
            store,
            vector_cache,
            query_cache,
            config,
        }
    }

    /// Run the full pipeline for one request.
    pub async fn process(
        &self,
        request: QueryRequest,
        progress: Arc<dyn ProgressSink>,
    ) -> QueryOutcome {
        match self.run(request, progress).await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::error!("Query pipeline failed: {}", e);
                QueryOutcome::Error {
                    message: e.to_string(),
                }
            }
        }
    }

    async fn run(
        &self,
        request: QueryRequest,
        progress: Arc<dyn ProgressSink>,
    ) -> Result<QueryOutcome> {
        let start = std::time::Instant::now();
        tracing::info!(
            "Query over {} document(s): {}",
            request.files.len(),
            request.query
        );

        let keywords = extract_keywords(&request.query);
        tracing::debug!("Keywords: {:?}", keywords);

        progress.report("Vectorisation de la question...");
        let query_vector = self.embed_query(&request.query).await?;

        if !request.force_new {
            if let Some(entry) = self.query_cache.search_similar(
                &query_vector,
                &keywords,
                self.config.query.cache_similarity_threshold,
            ) {
                tracing::info!("Answer served from the query cache");
                return Ok(QueryOutcome::Answer {
                    response: entry.response,
                    matches: Vec::new(),
                    from_cache: true,
                });
            }
        }

        progress.report("Chargement des documents...");
        let trees = self.load_trees(&request.files);
        if trees.is_empty() {
            return Ok(QueryOutcome::Error {
                message: "Aucun des documents demandés n'est disponible.".to_string(),
            });
        }

        progress.report("Recherche des passages pertinents...");
        let scored = score_trees(&trees, &query_vector, &keywords);
        let candidates = select_top_matches(scored, self.config.query.max_matches);
        if candidates.is_empty() {
            tracing::info!("No candidate passed the keyword gate");
            return Ok(QueryOutcome::NoRelevantPassages);
        }

        let policy = if self.config.query.filter_fail_open {
            FilterPolicy::KeepAll
        } else {
            FilterPolicy::DropBatch
        };
        let relevance_filter =
            RelevanceFilter::new(Arc::clone(&self.llm), Arc::clone(&self.config), policy);
        let confirmed = relevance_filter
            .filter(candidates, &request.query, Arc::clone(&progress))
            .await;
        if confirmed.is_empty() {
            return Ok(QueryOutcome::NoRelevantPassages);
        }

        let mut batches = plan_batches(
            &request.query,
            &confirmed,
            &trees,
            self.config.query.batch_token_budget,
        );
        for batch in &mut batches {
            batch.additional_instructions = request.additional_instructions.clone();
        }

        progress.report(&format!(
            "Génération de {} réponse(s) partielle(s)...",
            batches.len()
        ));
        let partials = self.generate_partials(&batches, Arc::clone(&progress)).await;
        if partials.is_empty() {
            return Ok(QueryOutcome::Error {
                message: "La génération a échoué pour tous les lots de passages.".to_string(),
            });
        }

        let merger = ResponseMerger::new(Arc::clone(&self.llm), Arc::clone(&self.config));
        let response = merger
            .merge(
                partials,
                &request.query,
                &request.additional_instructions,
                Arc::clone(&progress),
            )
            .await?;

        if let Err(e) =
            self.query_cache
                .save(&request.query, &keywords, query_vector, &response)
        {
            tracing::warn!("Failed to persist the query cache: {}", e);
        }

        tracing::info!(
            "Query answered in {:.2}s from {} confirmed passage(s)",
            start.elapsed().as_secs_f64(),
            confirmed.len()
        );
        Ok(QueryOutcome::Answer {
            response,
            matches: confirmed,
            from_cache: false,
        })
    }

    async fn embed_query(&self, query: &str) -> Result<Vec<f32>> {
        let prefix = &self.config.embedding.query_prefix;
        if let Some(cached) = self.vector_cache.get(query, prefix) {
            return Ok(cached);
        }
        let embedding = self.embedder.embed(query, prefix).await?;
        self.vector_cache.put(query, prefix, embedding.clone());
        Ok(embedding)
    }

    /// Load every requested tree; a missing or unreadable document is logged
    /// and skipped so the query still runs over the rest.
    fn load_trees(&self, files: &[String]) -> HashMap<String, Arc<DocumentTree>> {
        let mut trees = HashMap::new();
        for file in files {
            match self.store.load(file) {
                Ok(tree) => {
                    trees.insert(file.clone(), tree);
                }
                Err(e) => {
                    tracing::warn!("Skipping document '{}': {}", file, e);
                }
            }
        }
        trees
    }

    /// One generation call per batch, concurrent under a bounded semaphore.
    /// Failed batches are dropped; partials come back in batch order.
    async fn generate_partials(
        &self,
        batches: &[Batch],
        progress: Arc<dyn ProgressSink>,
    ) -> Vec<String> {
        let total = batches.len();
        let semaphore = Arc::new(Semaphore::new(self.config.query.filter_concurrency));
        let mut set: JoinSet<(usize, Option<String>)> = JoinSet::new();

        for (idx, batch) in batches.iter().enumerate() {
            let llm = Arc::clone(&self.llm);
            let semaphore = Arc::clone(&semaphore);
            let request = GenerateRequest::new(answer_prompt(batch))
                .with_sampling(self.config.llm.temperature, self.config.llm.max_tokens);

            set.spawn(async move {
                let _permit = match semaphore.acquire().await {
                    Ok(permit) => permit,
                    Err(_) => return (idx, None),
                };
                match llm.generate(request).await {
                    Ok(response) => (idx, Some(response)),
                    Err(e) => {
                        tracing::error!("Generation failed for batch {}: {}", idx + 1, e);
                        (idx, None)
                    }
                }
            });
        }

        let mut partials: Vec<Option<String>> = vec![None; total];
        let mut done = 0usize;
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((idx, partial)) => {
                    done += 1;
                    progress.report(&format!("Réponses partielles: {done}/{total}..."));
                    partials[idx] = partial;
                }
                Err(e) => {
                    tracing::error!("Generation task panicked: {}", e);
                }
            }
        }

        partials.into_iter().flatten().collect()
    }
}

fn answer_prompt(batch: &Batch) -> String {
    let instructions = if batch.additional_instructions.is_empty() {
        String::new()
    } else {
        format!(
            "INSTRUCTIONS SUPPLÉMENTAIRES:\n{}\n\n",
            batch.additional_instructions
        )
    };

    format!(
        "Vous êtes un expert en analyse documentaire. Répondez à la question en vous appuyant \
         exclusivement sur la documentation fournie.\n\n\
         QUESTION:\n{}\n\n\
         {}\
         DOCUMENTATION:\n{}\n\n\
         Instructions:\n\
         - Rédiger la réponse en Markdown, structurée en sections.\n\
         - Citer chaque information avec son origine au format [Document: nom, Page N].\n\
         - Ne rien affirmer qui ne figure pas dans la documentation.\n\
         - Signaler explicitement lorsque la documentation ne permet pas de répondre.\n\n\
         RÉPONSE:",
        batch.query, instructions, batch.documentation
    )
}
