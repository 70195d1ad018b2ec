//! Hierarchical document encoder
//!
//! Turns a paginated document into a multi-level tree of summaries with
//! embeddings. Pages are OCR-corrected and become level-0 leaves; adjacent
//! nodes are then reduced pairwise into combined summaries until a single root
//! remains, whose text becomes the document's overall description.
//!
//! Construction is resumable at level granularity: partial state is persisted
//! after every completed level and on any mid-reduction failure, and a later
//! invocation for the same document key picks up where the previous one
//! stopped instead of reprocessing from page 0.

use crate::cache::VectorCache;
use crate::config::Config;
use crate::error::Result;
use crate::ports::{EmbeddingPort, GenerateRequest, LanguageModelPort, VisionPort};
use crate::text::format_page_range;
use crate::tree::{DocumentTree, Node, Page, TreeStore};
use std::sync::Arc;

/// One source page handed to the encoder: its 1-based number, the raw
/// (typically OCR-extracted) text, and paths of any embedded illustrations.
#[derive(Debug, Clone)]
pub struct PageInput {
    pub number: u32,
    pub raw_text: String,
    pub images: Vec<String>,
}

impl PageInput {
    pub fn new(number: u32, raw_text: impl Into<String>) -> Self {
        Self {
            number,
            raw_text: raw_text.into(),
            images: Vec::new(),
        }
    }
}

pub struct HierarchicalEncoder {
    llm: Arc<dyn LanguageModelPort>,
    embedder: Arc<dyn EmbeddingPort>,
    vision: Option<Arc<dyn VisionPort>>,
    store: Arc<TreeStore>,
    vector_cache: Arc<VectorCache>,
    config: Arc<Config>,
}

impl HierarchicalEncoder {
    pub fn new(
        llm: Arc<dyn LanguageModelPort>,
        embedder: Arc<dyn EmbeddingPort>,
        vision: Option<Arc<dyn VisionPort>>,
        store: Arc<TreeStore>,
        vector_cache: Arc<VectorCache>,
        config: Arc<Config>,
    ) -> Self {
        Self {
            llm,
            embedder,
            vision,
            store,
            vector_cache,
            config,
        }
    }

    /// Encode a document into its summary tree and persist it under `key`.
    ///
    /// If a partial file exists for `key`, construction resumes at the last
    /// completed level. Embedding and summary-generation failures persist the
    /// current progress before propagating; a retry of the same call continues
    /// from that state.
    pub async fn encode(&self, key: &str, pages: &[PageInput]) -> Result<Arc<DocumentTree>> {
        let start = std::time::Instant::now();
        tracing::info!("Encoding '{}' ({} pages)", key, pages.len());

        let mut tree = self
            .store
            .load_partial(key)
            .unwrap_or_else(|| DocumentTree::new(key));

        if tree.levels.is_empty() {
            self.correct_pages(key, &mut tree, pages).await?;
            self.build_leaves(key, &mut tree).await?;
        } else {
            tracing::info!(
                "Resuming '{}' at level {} ({} nodes)",
                key,
                tree.levels.len() - 1,
                tree.levels.last().map_or(0, |l| l.len())
            );
        }

        self.reduce(key, &mut tree).await?;
        self.finalize(&mut tree);

        tree.validate()?;
        self.store.save(key, &tree)?;
        self.store.remove_partial(key)?;

        tracing::info!(
            "Encoded '{}' in {:.2}s: {} levels",
            key,
            start.elapsed().as_secs_f64(),
            tree.levels.len()
        );
        self.store.load(key)
    }

    /// OCR-correct every page not already present in the partial state,
    /// optionally appending vision descriptions of embedded illustrations.
    async fn correct_pages(
        &self,
        key: &str,
        tree: &mut DocumentTree,
        pages: &[PageInput],
    ) -> Result<()> {
        for page in pages {
            if tree.pages.iter().any(|p| p.page_number == page.number) {
                continue;
            }

            tracing::info!("Correcting OCR text of page {}", page.number);
            let request = GenerateRequest::new(ocr_correction_prompt(&page.raw_text))
                .with_sampling(self.config.llm.temperature, self.config.llm.max_tokens);
            let mut text = match self.llm.generate(request).await {
                Ok(corrected) => corrected,
                Err(e) => {
                    tracing::warn!(
                        "OCR correction failed for page {}, keeping raw text: {}",
                        page.number,
                        e
                    );
                    page.raw_text.clone()
                }
            };

            if self.config.encoder.illustration {
                if let Some(vision) = &self.vision {
                    for image in &page.images {
                        match vision.describe(image, &text).await {
                            Ok(description) => {
                                text.push_str("\n\n### Description des illustrations\n");
                                text.push_str(&description);
                            }
                            Err(e) => {
                                tracing::error!(
                                    "Image description failed for '{}' on page {}: {}",
                                    image,
                                    page.number,
                                    e
                                );
                            }
                        }
                    }
                }
            }

            tree.pages.push(Page {
                page_number: page.number,
                text,
            });
            self.store.save_partial(key, tree)?;
        }
        Ok(())
    }

    /// Build level 0: one node per corrected page, each embedded with the
    /// passage prefix.
    async fn build_leaves(&self, key: &str, tree: &mut DocumentTree) -> Result<()> {
        tracing::info!("Building {} leaf nodes", tree.pages.len());
        let mut nodes = Vec::with_capacity(tree.pages.len());
        let mut vectors = Vec::with_capacity(tree.pages.len());

        let pages = tree.pages.clone();
        for page in &pages {
            let embedding = match self.embed_passage(&page.text).await {
                Ok(embedding) => embedding,
                Err(e) => {
                    self.store.save_partial(key, tree)?;
                    return Err(e);
                }
            };
            nodes.push(Node {
                text: page.text.clone(),
                page_range: format!("Page {}", page.page_number),
                start_page: page.page_number,
                end_page: page.page_number,
            });
            vectors.push(embedding);
        }

        tree.levels.push(nodes);
        tree.vectors.push(vectors);
        self.store.save_partial(key, tree)?;
        tracing::info!("Leaf level saved");
        Ok(())
    }

    /// Pairwise reduction: halve the node count per level until one remains.
    async fn reduce(&self, key: &str, tree: &mut DocumentTree) -> Result<()> {
        while tree.levels.last().is_some_and(|level| level.len() > 1) {
            let current = tree.levels.last().expect("non-empty levels").clone();
            tracing::info!("Reducing level of {} nodes", current.len());

            let mut next_nodes: Vec<Node> = Vec::new();
            let mut next_vectors: Vec<Vec<f32>> = Vec::new();

            for pair in current.chunks(2) {
                let first = &pair[0];
                let second = pair.get(1);
                let start_page = first.start_page;
                let end_page = second.map_or(first.end_page, |n| n.end_page);
                let previous_summary = next_nodes.last().map(|n| n.text.as_str());

                let prompt = summary_prompt(
                    &first.text,
                    second.map(|n| n.text.as_str()),
                    previous_summary,
                    self.config.encoder.summary_max_words,
                );

                let request = GenerateRequest::new(prompt)
                    .with_sampling(self.config.llm.temperature, self.config.llm.max_tokens);
                let result = async {
                    let summary = self.llm.generate(request).await?;
                    let embedding = self.embed_passage(&summary).await?;
                    Ok::<_, crate::FolioError>((summary, embedding))
                }
                .await;

                match result {
                    Ok((summary, embedding)) => {
                        next_nodes.push(Node {
                            text: summary,
                            page_range: format_page_range(start_page, end_page),
                            start_page,
                            end_page,
                        });
                        next_vectors.push(embedding);
                    }
                    Err(e) => {
                        // Completed levels are already on disk; persist again
                        // so the caller can retry the whole encode call.
                        tracing::error!("Summary generation failed: {}", e);
                        self.store.save_partial(key, tree)?;
                        return Err(e);
                    }
                }
            }

            tree.levels.push(next_nodes);
            tree.vectors.push(next_vectors);
            self.store.save_partial(key, tree)?;
            tracing::info!("Level {} saved", tree.levels.len() - 1);
        }
        Ok(())
    }

    /// Rewrite the root node's range label and lift its text into
    /// `root_summary`.
    fn finalize(&self, tree: &mut DocumentTree) {
        if let Some(root) = tree.levels.last_mut().and_then(|level| level.first_mut()) {
            root.page_range = format!(
                "Résumé général du livre de la page {} à la page {}",
                root.start_page, root.end_page
            );
            tree.root_summary = Some(root.text.clone());
        }
    }

    async fn embed_passage(&self, text: &str) -> Result<Vec<f32>> {
        let prefix = &self.config.embedding.passage_prefix;
        if let Some(cached) = self.vector_cache.get(text, prefix) {
            return Ok(cached);
        }
        let embedding = self.embedder.embed(text, prefix).await?;
        self.vector_cache.put(text, prefix, embedding.clone());
        Ok(embedding)
    }
}

fn ocr_correction_prompt(page_text: &str) -> String {
    format!(
        "En tant qu'expert en correction de textes OCR, corrigez les erreurs potentielles dans \
         le texte suivant tout en préservant son sens et sa structure. Retournez uniquement le \
         texte corrigé, sans commentaires ni explications.\n\n\
         Texte à corriger:\n{page_text}\n\n\
         Instructions:\n\
         - Corrigez les erreurs d'OCR courantes (caractères mal reconnus, mots fusionnés ou séparés incorrectement)\n\
         - Préservez la mise en page et la structure du texte\n\
         - Conservez la ponctuation d'origine sauf si manifestement erronée\n\
         - Ne modifiez pas le contenu sémantique\n\
         - Ne rajoutez pas de contenu\n"
    )
}

fn summary_prompt(
    text1: &str,
    text2: Option<&str>,
    previous_summary: Option<&str>,
    max_words: usize,
) -> String {
    let passage2 = match text2 {
        Some(text) => format!("[Passage 2]\n{text}"),
        None => String::new(),
    };

    match previous_summary {
        Some(previous) => format!(
            "Vous êtes un expert en synthèse documentaire. Votre tâche est de rédiger un résumé \
             cohérent qui poursuit le résumé précédent en intégrant les nouvelles informations.\n\n\
             CONTEXTE PRÉCÉDENT :\n{previous}\n\n\
             TEXTES À RÉSUMER :\n[Passage 1]\n{text1}\n\n{passage2}\n\n\
             Instructions :\n\
             - Maintenir la continuité avec le résumé précédent.\n\
             - Inclure les idées principales et les concepts clés.\n\
             - Assurer une structure logique et fluide.\n\
             - Limiter le résumé à maximum {max_words} mots.\n\
             - Utiliser un style clair et objectif.\n\n\
             RÉSUMÉ :"
        ),
        None => format!(
            "Vous êtes un expert en synthèse documentaire. Votre tâche est de rédiger un résumé \
             cohérent et structuré des passages suivants.\n\n\
             TEXTES À RÉSUMER :\n[Passage 1]\n{text1}\n\n{passage2}\n\n\
             Instructions :\n\
             - Identifier les thèmes principaux et les informations essentielles.\n\
             - Organiser les idées de manière logique.\n\
             - Limiter le résumé à maximum {max_words} mots.\n\
             - Utiliser un style clair et objectif.\n\n\
             RÉSUMÉ :"
        ),
    }
}
