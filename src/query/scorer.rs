//! Match scorer: cosine similarity over every node of every tree, behind a
//! hard keyword gate

use crate::ports::cosine_similarity;
use crate::text::{contains_all_keywords, parse_page_number};
use crate::tree::DocumentTree;
use std::collections::HashMap;
use std::sync::Arc;

/// One scored hierarchy node, ephemeral to a single query.
#[derive(Debug, Clone)]
pub struct Match {
    pub text: String,
    pub score: f32,
    pub page_range: String,
    pub page_number: u32,
    pub source_file: String,
}

impl Match {
    fn new(text: &str, score: f32, page_range: &str, source_file: &str) -> Self {
        Self {
            text: text.to_string(),
            score,
            page_range: page_range.to_string(),
            page_number: parse_page_number(page_range),
            source_file: source_file.to_string(),
        }
    }
}

/// Leaf-level and summary-level matches, tracked separately: a level-0 node is
/// already a fine-grained passage while upper nodes are coarse summaries.
#[derive(Debug, Default)]
pub struct ScoredMatches {
    pub leaf_matches: Vec<Match>,
    pub tree_matches: Vec<Match>,
}

/// Score every node of every tree against the query vector.
///
/// When the keyword set is non-empty, a node whose normalized text does not
/// contain ALL keywords is skipped before any vector math runs. The gate is a
/// hard AND, not a soft boost.
pub fn score_trees(
    trees: &HashMap<String, Arc<DocumentTree>>,
    query_vector: &[f32],
    keywords: &[String],
) -> ScoredMatches {
    let mut scored = ScoredMatches::default();

    for (file, tree) in trees {
        for (level_idx, (level, vectors)) in tree.levels.iter().zip(tree.vectors.iter()).enumerate()
        {
            let mut kept = 0usize;
            for (node, vector) in level.iter().zip(vectors.iter()) {
                if !contains_all_keywords(&node.text, keywords) {
                    continue;
                }

                let score = cosine_similarity(vector, query_vector);
                let m = Match::new(&node.text, score, &node.page_range, file);
                if level_idx == 0 {
                    scored.leaf_matches.push(m);
                } else {
                    scored.tree_matches.push(m);
                }
                kept += 1;
            }
            tracing::debug!(
                "File '{}' level {}: {}/{} nodes passed the keyword gate",
                file,
                level_idx,
                kept,
                level.len()
            );
        }
    }

    tracing::info!(
        "Scoring done: {} leaf matches, {} tree matches",
        scored.leaf_matches.len(),
        scored.tree_matches.len()
    );
    scored
}

/// Merge leaf and tree matches, order by descending score with ascending page
/// number as the tie-break, and keep the top `max_matches` candidates.
pub fn select_top_matches(scored: ScoredMatches, max_matches: usize) -> Vec<Match> {
    let mut all: Vec<Match> = scored
        .leaf_matches
        .into_iter()
        .chain(scored.tree_matches)
        .collect();

    all.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.page_number.cmp(&b.page_number))
    });
    all.truncate(max_matches);
    all
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::Node;

    fn tree_with_leaves(file: &str, leaves: &[(&str, u32, Vec<f32>)]) -> Arc<DocumentTree> {
        let mut tree = DocumentTree::new(file);
        let mut nodes = Vec::new();
        let mut vectors = Vec::new();
        for (text, page, vector) in leaves {
            nodes.push(Node {
                text: text.to_string(),
                page_range: format!("Page {page}"),
                start_page: *page,
                end_page: *page,
            });
            vectors.push(vector.clone());
        }
        tree.levels = vec![nodes];
        tree.vectors = vec![vectors];
        Arc::new(tree)
    }

    #[test]
    fn test_keyword_gate_is_hard_and() {
        let mut trees = HashMap::new();
        trees.insert(
            "livre".to_string(),
            tree_with_leaves(
                "livre",
                &[
                    ("Paris est la capitale", 1, vec![1.0, 0.0]),
                    ("Lyon est une ville", 2, vec![1.0, 0.0]),
                    ("Marseille est un port", 3, vec![1.0, 0.0]),
                ],
            ),
        );

        let scored = score_trees(&trees, &[1.0, 0.0], &["Paris".to_string()]);
        assert_eq!(scored.leaf_matches.len(), 1);
        assert!(scored.tree_matches.is_empty());
        assert!(scored.leaf_matches[0].text.contains("Paris"));
    }

    #[test]
    fn test_empty_keywords_scores_everything() {
        let mut trees = HashMap::new();
        trees.insert(
            "livre".to_string(),
            tree_with_leaves(
                "livre",
                &[("un", 1, vec![1.0, 0.0]), ("deux", 2, vec![0.0, 1.0])],
            ),
        );

        let scored = score_trees(&trees, &[1.0, 0.0], &[]);
        assert_eq!(scored.leaf_matches.len(), 2);
    }

    #[test]
    fn test_leaf_and_tree_matches_separated() {
        let mut tree = DocumentTree::new("livre");
        tree.levels = vec![
            vec![
                Node {
                    text: "page une".to_string(),
                    page_range: "Page 1".to_string(),
                    start_page: 1,
                    end_page: 1,
                },
                Node {
                    text: "page deux".to_string(),
                    page_range: "Page 2".to_string(),
                    start_page: 2,
                    end_page: 2,
                },
            ],
            vec![Node {
                text: "résumé des pages".to_string(),
                page_range: "Pages 1 à 2".to_string(),
                start_page: 1,
                end_page: 2,
            }],
        ];
        tree.vectors = vec![vec![vec![1.0, 0.0], vec![0.0, 1.0]], vec![vec![0.5, 0.5]]];

        let mut trees = HashMap::new();
        trees.insert("livre".to_string(), Arc::new(tree));

        let scored = score_trees(&trees, &[1.0, 0.0], &[]);
        assert_eq!(scored.leaf_matches.len(), 2);
        assert_eq!(scored.tree_matches.len(), 1);
    }

    #[test]
    fn test_select_top_orders_by_score_then_page() {
        let scored = ScoredMatches {
            leaf_matches: vec![
                Match::new("a", 0.5, "Page 7", "livre"),
                Match::new("b", 0.9, "Page 3", "livre"),
                Match::new("c", 0.9, "Page 1", "livre"),
            ],
            tree_matches: vec![Match::new("d", 0.7, "???", "livre")],
        };

        let top = select_top_matches(scored, 10);
        assert_eq!(top[0].page_number, 1);
        assert_eq!(top[1].page_number, 3);
        assert_eq!(top[2].score, 0.7);
        // unparseable page range sorts via the 9999 sentinel
        assert_eq!(top[2].page_number, crate::text::UNPARSEABLE_PAGE);
        assert_eq!(top[3].page_number, 7);
    }

    #[test]
    fn test_select_top_truncates() {
        let scored = ScoredMatches {
            leaf_matches: (0..10)
                .map(|i| Match::new("x", 0.1 * i as f32, &format!("Page {i}"), "livre"))
                .collect(),
            tree_matches: vec![],
        };
        assert_eq!(select_top_matches(scored, 3).len(), 3);
    }
}
