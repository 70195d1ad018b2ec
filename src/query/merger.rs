//! Response merger: recursive fusion of partial answers plus final augmentation
//!
//! Partial responses are fused in token-bounded sub-batches, recursively,
//! until a single text remains. That text then goes through one augmentation
//! pass which appends an analysis-limits section and related-searches
//! suggestions. Augmentation never loses the merged answer: if the call fails,
//! a fixed fallback block is appended instead.

use crate::config::Config;
use crate::error::{FolioError, Result};
use crate::ports::{GenerateRequest, LanguageModelPort};
use crate::query::ProgressSink;
use crate::text::estimate_tokens;
use std::sync::Arc;

const FUSION_SEPARATOR: &str = "\n\n---\n\n";

pub struct ResponseMerger {
    llm: Arc<dyn LanguageModelPort>,
    config: Arc<Config>,
}

impl ResponseMerger {
    pub fn new(llm: Arc<dyn LanguageModelPort>, config: Arc<Config>) -> Self {
        Self { llm, config }
    }

    /// Fuse partial responses into one final augmented answer.
    ///
    /// A single partial skips fusion entirely and goes straight to
    /// augmentation. With several partials, each fusion round groups them into
    /// sub-batches whose combined text stays under the token budget, runs one
    /// fusion call per sub-batch, and feeds the outputs back in until a single
    /// response remains. A sub-batch whose call fails is dropped from the
    /// round; when every sub-batch of a round fails the merge itself fails,
    /// so a broken answer is never produced or cached.
    pub async fn merge(
        &self,
        partials: Vec<String>,
        query: &str,
        additional_instructions: &str,
        progress: Arc<dyn ProgressSink>,
    ) -> Result<String> {
        let mut responses = partials;

        while responses.len() > 1 {
            progress.report(&format!(
                "Fusion de {} réponses partielles...",
                responses.len()
            ));

            let budget = self.config.query.merge_token_budget;
            let mut sub_batches = group_under_budget(&responses, budget);
            if sub_batches.iter().all(|b| b.len() == 1) {
                // Every response alone exceeds the budget; fuse them in one
                // oversized call rather than spin without ever shrinking.
                tracing::warn!(
                    "All {} partial responses exceed the merge budget individually",
                    responses.len()
                );
                sub_batches = vec![responses.clone()];
            }
            let mut fused = Vec::with_capacity(sub_batches.len());

            for sub_batch in sub_batches {
                if sub_batch.len() == 1 {
                    // Nothing to fuse, carry it into the next round as-is
                    fused.push(sub_batch.into_iter().next().unwrap_or_default());
                    continue;
                }

                let joined = sub_batch.join(FUSION_SEPARATOR);
                match self
                    .llm
                    .generate(self.request(fusion_prompt(&joined, query)))
                    .await
                {
                    Ok(response) => fused.push(response),
                    Err(e) => {
                        tracing::error!("Fusion call failed, dropping sub-batch: {}", e);
                    }
                }
            }

            if fused.is_empty() {
                tracing::error!("Every fusion sub-batch failed");
                return Err(FolioError::Model(
                    "toutes les fusions de réponses partielles ont échoué".to_string(),
                ));
            }
            responses = fused;
        }

        let merged = responses.into_iter().next().unwrap_or_default();
        progress.report("Enrichissement de la réponse finale...");
        Ok(self.augment(merged, query, additional_instructions).await)
    }

    /// Final pass: append analysis limits and related-search suggestions.
    /// Falls back to a fixed block so the merged answer is never lost.
    async fn augment(&self, merged: String, query: &str, additional_instructions: &str) -> String {
        match self
            .llm
            .generate(self.request(augmentation_prompt(
                &merged,
                query,
                additional_instructions,
            )))
            .await
        {
            Ok(augmented) => augmented,
            Err(e) => {
                tracing::error!("Augmentation failed, appending fallback sections: {}", e);
                format!(
                    "{merged}\n\n# Limites de l'analyse\n\
                     Les sections ci-dessus constituent la réponse fusionnée; l'étape \
                     d'enrichissement n'a pas pu être réalisée.\n\n\
                     # Autres recherches associées\n\
                     - Reformuler la question avec d'autres mots-clés.\n\
                     - Interroger un sous-ensemble différent de documents."
                )
            }
        }
    }

    fn request(&self, prompt: String) -> GenerateRequest {
        GenerateRequest::new(prompt)
            .with_sampling(self.config.llm.temperature, self.config.llm.max_tokens)
    }
}

/// Greedy grouping of responses into sub-batches whose combined estimated
/// token count stays under `token_budget`. A response alone over the budget
/// still gets its own sub-batch.
fn group_under_budget(responses: &[String], token_budget: f64) -> Vec<Vec<String>> {
    let mut sub_batches: Vec<Vec<String>> = Vec::new();
    let mut current: Vec<String> = Vec::new();
    let mut current_tokens = 0.0;

    for response in responses {
        let tokens = estimate_tokens(response);
        if !current.is_empty() && current_tokens + tokens > token_budget {
            sub_batches.push(std::mem::take(&mut current));
            current_tokens = 0.0;
        }
        current.push(response.clone());
        current_tokens += tokens;
    }
    if !current.is_empty() {
        sub_batches.push(current);
    }
    sub_batches
}

fn fusion_prompt(joined: &str, query: &str) -> String {
    format!(
        "Vous êtes un expert en synthèse documentaire. Les réponses partielles suivantes ont été \
         produites indépendamment à partir de passages différents des mêmes documents, pour la \
         même question. Fusionnez-les en une réponse unique, cohérente et sans redondance.\n\n\
         QUESTION:\n{query}\n\n\
         RÉPONSES PARTIELLES:\n{joined}\n\n\
         Instructions:\n\
         - Conserver toutes les informations factuelles et toutes les citations de pages.\n\
         - Éliminer les répétitions entre réponses partielles.\n\
         - Organiser la réponse en Markdown avec des sections claires.\n\n\
         RÉPONSE FUSIONNÉE:"
    )
}

fn augmentation_prompt(merged: &str, query: &str, additional_instructions: &str) -> String {
    let instructions = if additional_instructions.is_empty() {
        String::new()
    } else {
        format!("INSTRUCTIONS SUPPLÉMENTAIRES:\n{additional_instructions}\n\n")
    };

    format!(
        "Vous êtes un expert en analyse documentaire. Enrichissez la réponse suivante sans en \
         modifier le contenu factuel ni les citations de pages.\n\n\
         QUESTION:\n{query}\n\n\
         {instructions}\
         RÉPONSE À ENRICHIR:\n{merged}\n\n\
         Instructions:\n\
         - Reprendre la réponse intégralement, en Markdown.\n\
         - Ajouter une section '# Limites de l'analyse' décrivant ce que les passages consultés \
           ne permettent pas d'affirmer.\n\
         - Ajouter une section '# Autres recherches associées' proposant des questions \
           complémentaires pertinentes.\n\n\
         RÉPONSE ENRICHIE:"
    )
}
