//! LLM relevance filter: batch confirmation of candidate matches
//!
//! Candidates are judged in fixed-size batches, one model call per batch, with
//! a strict line-per-passage answer format. Anything that prevents a strict
//! parse, including the call itself failing, resolves through an explicit
//! policy instead of an exception path; the default keeps the whole batch.

use crate::config::Config;
use crate::ports::{GenerateRequest, LanguageModelPort};
use crate::query::scorer::Match;
use crate::query::ProgressSink;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

/// What to do with a batch whose verdict could not be obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterPolicy {
    /// Treat every passage of the batch as relevant. Maximizes recall: the
    /// pipeline never loses a batch to a parser or network fault.
    KeepAll,
    /// Reject the batch.
    DropBatch,
}

impl FilterPolicy {
    fn verdicts(self, len: usize) -> Vec<bool> {
        match self {
            FilterPolicy::KeepAll => vec![true; len],
            FilterPolicy::DropBatch => vec![false; len],
        }
    }
}

pub struct RelevanceFilter {
    llm: Arc<dyn LanguageModelPort>,
    config: Arc<Config>,
    policy: FilterPolicy,
}

impl RelevanceFilter {
    pub fn new(llm: Arc<dyn LanguageModelPort>, config: Arc<Config>, policy: FilterPolicy) -> Self {
        Self {
            llm,
            config,
            policy,
        }
    }

    /// Confirm or reject candidates, returning the confirmed subsequence
    /// re-sorted ascending by page number for narrative order.
    ///
    /// Batches run concurrently under a bounded semaphore; the call returns
    /// only once every batch has been judged.
    pub async fn filter(
        &self,
        candidates: Vec<Match>,
        query: &str,
        progress: Arc<dyn ProgressSink>,
    ) -> Vec<Match> {
        if candidates.is_empty() {
            return Vec::new();
        }

        progress.report("Filtrage par LLM des passages retenus...");
        let total = candidates.len();
        let batches: Vec<Vec<Match>> = candidates
            .chunks(self.config.query.filter_batch_size)
            .map(|c| c.to_vec())
            .collect();

        let semaphore = Arc::new(Semaphore::new(self.config.query.filter_concurrency));
        let mut set: JoinSet<(usize, Vec<bool>)> = JoinSet::new();

        for (idx, batch) in batches.iter().enumerate() {
            let llm = Arc::clone(&self.llm);
            let semaphore = Arc::clone(&semaphore);
            let request = GenerateRequest::new(relevance_prompt(batch, query))
                .with_sampling(self.config.llm.temperature, self.config.llm.max_tokens);
            let policy = self.policy;
            let len = batch.len();

            set.spawn(async move {
                let _permit = semaphore.acquire().await.expect("semaphore closed");
                let verdicts = match llm.generate(request).await {
                    Ok(response) => match parse_verdicts(&response, len) {
                        Some(verdicts) => verdicts,
                        None => {
                            tracing::warn!(
                                "Relevance verdict count mismatch for a batch of {}, applying {:?}",
                                len,
                                policy
                            );
                            policy.verdicts(len)
                        }
                    },
                    Err(e) => {
                        tracing::error!("Relevance call failed: {}, applying {:?}", e, policy);
                        policy.verdicts(len)
                    }
                };
                (idx, verdicts)
            });
        }

        let mut all_verdicts: Vec<Option<Vec<bool>>> = vec![None; batches.len()];
        let mut processed = 0usize;
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((idx, verdicts)) => {
                    processed += verdicts.len();
                    progress.report(&format!(
                        "Filtrage LLM: {:.1}% complété...",
                        processed as f64 / total as f64 * 100.0
                    ));
                    all_verdicts[idx] = Some(verdicts);
                }
                Err(e) => {
                    tracing::error!("Relevance task panicked: {}", e);
                }
            }
        }

        let mut kept = Vec::new();
        for (batch, verdicts) in batches.into_iter().zip(all_verdicts) {
            let len = batch.len();
            let verdicts = verdicts.unwrap_or_else(|| self.policy.verdicts(len));
            for (m, relevant) in batch.into_iter().zip(verdicts) {
                if relevant {
                    tracing::info!("Page {} conservée (score: {:.3})", m.page_number, m.score);
                    kept.push(m);
                } else {
                    tracing::info!("Page {} retirée (score: {:.3})", m.page_number, m.score);
                }
            }
        }

        kept.sort_by_key(|m| m.page_number);
        tracing::info!("Filtrage LLM terminé: {}/{} passages retenus", kept.len(), total);
        kept
    }
}

fn relevance_prompt(batch: &[Match], query: &str) -> String {
    let passages = batch
        .iter()
        .enumerate()
        .map(|(i, m)| format!("PASSAGE {} (Page {}):\n{}", i + 1, m.page_number, m.text))
        .collect::<Vec<_>>()
        .join("\n\n");

    format!(
        "En tant qu'expert en analyse de pertinence, évaluez si les passages suivants répondent \
         ou apportent du contexte pertinent à la question posée. Pour chaque passage, répondez \
         uniquement par OUI ou NON.\n\n\
         QUESTION:\n{query}\n\n\
         {passages}\n\n\
         FORMAT DE RÉPONSE REQUIS:\n\
         Répondez exactement dans ce format, un résultat par ligne:\n\
         PASSAGE 1: OUI/NON\n\
         PASSAGE 2: OUI/NON\n\
         etc.\n\n\
         RÉPONSES:"
    )
}

/// Parse one `PASSAGE i: OUI/NON` line per passage. Returns `None` unless
/// exactly `expected` verdicts are found.
fn parse_verdicts(response: &str, expected: usize) -> Option<Vec<bool>> {
    let verdicts: Vec<bool> = response
        .lines()
        .filter_map(|line| {
            let (_, value) = line.split_once(':')?;
            Some(value.trim().to_uppercase().starts_with("OUI"))
        })
        .collect();

    if verdicts.len() == expected {
        Some(verdicts)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_verdicts_exact() {
        let response = "PASSAGE 1: OUI\nPASSAGE 2: NON\nPASSAGE 3: oui";
        assert_eq!(
            parse_verdicts(response, 3),
            Some(vec![true, false, true])
        );
    }

    #[test]
    fn test_parse_verdicts_count_mismatch() {
        let response = "PASSAGE 1: OUI\nPASSAGE 2: NON";
        assert_eq!(parse_verdicts(response, 5), None);
    }

    #[test]
    fn test_parse_verdicts_ignores_prose_lines() {
        let response = "Voici mes réponses\nPASSAGE 1: OUI\nPASSAGE 2: NON";
        assert_eq!(parse_verdicts(response, 2), Some(vec![true, false]));
    }

    #[test]
    fn test_policy_verdicts() {
        assert_eq!(FilterPolicy::KeepAll.verdicts(3), vec![true, true, true]);
        assert_eq!(FilterPolicy::DropBatch.verdicts(2), vec![false, false]);
    }

    #[test]
    fn test_relevance_prompt_labels() {
        let batch = vec![
            Match {
                text: "premier".to_string(),
                score: 0.9,
                page_range: "Page 4".to_string(),
                page_number: 4,
                source_file: "livre".to_string(),
            },
            Match {
                text: "second".to_string(),
                score: 0.8,
                page_range: "Page 9".to_string(),
                page_number: 9,
                source_file: "livre".to_string(),
            },
        ];
        let prompt = relevance_prompt(&batch, "Question ?");
        assert!(prompt.contains("PASSAGE 1 (Page 4):\npremier"));
        assert!(prompt.contains("PASSAGE 2 (Page 9):\nsecond"));
    }
}
