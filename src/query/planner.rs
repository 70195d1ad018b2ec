//! Batch planner: greedy token-bounded bin packing of confirmed matches
//!
//! Each emitted batch carries an XML-like documentation payload grouping its
//! matches by source file, with every file's root summary included once as
//! context. Packing is by estimated token cost, not by match count, and no
//! match is ever dropped: a match that overflows the budget is pushed back
//! onto the pending queue and retried in the next batch.

use crate::query::scorer::Match;
use crate::text::estimate_tokens;
use crate::tree::DocumentTree;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

/// One token-bounded documentation payload, consumed by a single generation
/// call to produce one partial response.
#[derive(Debug, Clone)]
pub struct Batch {
    pub query: String,
    pub documentation: String,
    pub additional_instructions: String,
}

/// Pack matches into batches whose documentation stays under `token_budget`
/// estimated tokens.
///
/// Single pass over an immutable input: the just-added match is ejected when
/// the rebuilt documentation overflows, the batch is closed without it, and
/// the ejected match starts the next batch. The final partial batch is
/// flushed unconditionally.
pub fn plan_batches(
    query: &str,
    matches: &[Match],
    trees: &HashMap<String, Arc<DocumentTree>>,
    token_budget: f64,
) -> Vec<Batch> {
    let mut pending: VecDeque<Match> = matches.to_vec().into();
    let mut current: Vec<Match> = Vec::new();
    let mut batches: Vec<Batch> = Vec::new();

    let close = |matches: &[Match], batches: &mut Vec<Batch>| {
        batches.push(Batch {
            query: query.to_string(),
            documentation: build_documentation(matches, trees),
            additional_instructions: String::new(),
        });
    };

    while let Some(candidate) = pending.pop_front() {
        current.push(candidate);
        let documentation = build_documentation(&current, trees);

        if estimate_tokens(&documentation) > token_budget {
            let Some(ejected) = current.pop() else {
                continue;
            };

            if current.is_empty() {
                // A single match larger than the whole budget cannot be
                // split; emit it alone rather than loop on it forever.
                tracing::warn!(
                    "Match on page {} alone exceeds the token budget, emitting as its own batch",
                    ejected.page_number
                );
                close(&[ejected], &mut batches);
            } else {
                close(&current, &mut batches);
                current.clear();
                pending.push_front(ejected);
            }
        }
    }

    if !current.is_empty() {
        close(&current, &mut batches);
    }

    tracing::info!(
        "Planned {} batch(es) for {} matches",
        batches.len(),
        matches.len()
    );
    batches
}

/// Build the combined documentation payload: per-file `<document_matches>`
/// blocks with page-sorted `<match>` entries, followed by a `<documents>`
/// metadata section carrying each file's root summary.
pub fn build_documentation(
    matches: &[Match],
    trees: &HashMap<String, Arc<DocumentTree>>,
) -> String {
    // Group by source file, preserving first-seen order
    let mut order: Vec<&str> = Vec::new();
    let mut by_file: HashMap<&str, Vec<&Match>> = HashMap::new();
    for m in matches {
        let entry = by_file.entry(m.source_file.as_str()).or_default();
        if entry.is_empty() {
            order.push(m.source_file.as_str());
        }
        entry.push(m);
    }

    let mut documentation = String::from(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<documentation>\n  <query_context>\n",
    );

    for file in &order {
        let mut file_matches = by_file[file].clone();
        file_matches.sort_by_key(|m| m.page_number);

        documentation.push_str(&format!("    <document_matches filename='{file}'>\n"));
        for m in file_matches {
            documentation.push_str(&format!(
                "      <match>\n        <score>{:.4}</score>\n        <page_range>{}</page_range>\n        <content>{}</content>\n      </match>\n",
                m.score, m.page_range, m.text
            ));
        }
        documentation.push_str("    </document_matches>\n");
    }

    documentation.push_str("  </query_context>\n  <documents>\n");
    for file in &order {
        let description = trees
            .get(*file)
            .and_then(|tree| tree.root_summary.clone())
            .unwrap_or_default();
        documentation.push_str(&format!(
            "    <document>\n      <metadata>\n        <filename>{file}</filename>\n        <description>{description}</description>\n      </metadata>\n    </document>\n"
        ));
    }
    documentation.push_str("  </documents>\n</documentation>");

    documentation
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_match(file: &str, page: u32, words: usize) -> Match {
        Match {
            text: vec!["mot"; words].join(" "),
            score: 0.5,
            page_range: format!("Page {page}"),
            page_number: page,
            source_file: file.to_string(),
        }
    }

    fn tree_with_summary(file: &str) -> Arc<DocumentTree> {
        let mut tree = DocumentTree::new(file);
        tree.root_summary = Some(format!("Résumé de {file}"));
        Arc::new(tree)
    }

    fn trees_for(files: &[&str]) -> HashMap<String, Arc<DocumentTree>> {
        files
            .iter()
            .map(|f| (f.to_string(), tree_with_summary(f)))
            .collect()
    }

    #[test]
    fn test_all_batches_under_budget_and_no_loss() {
        let trees = trees_for(&["livre"]);
        // 30 matches of ~600 estimated tokens each: ~18k total vs a 14k cap
        let matches: Vec<Match> = (1..=30)
            .map(|page| make_match("livre", page, (600.0_f64 / 1.3) as usize))
            .collect();

        let batches = plan_batches("question", &matches, &trees, 14000.0);

        assert!(batches.len() >= 2);
        for batch in &batches {
            assert!(estimate_tokens(&batch.documentation) <= 14000.0);
        }

        // Union of batches covers all 30 pages, no duplicates
        let mut pages: Vec<u32> = batches
            .iter()
            .flat_map(|b| {
                b.documentation
                    .lines()
                    .filter(|l| l.contains("<page_range>"))
                    .map(|l| {
                        l.trim()
                            .trim_start_matches("<page_range>Page ")
                            .trim_end_matches("</page_range>")
                            .parse::<u32>()
                            .unwrap()
                    })
                    .collect::<Vec<_>>()
            })
            .collect();
        pages.sort_unstable();
        assert_eq!(pages, (1..=30).collect::<Vec<u32>>());
    }

    #[test]
    fn test_single_small_set_yields_one_batch() {
        let trees = trees_for(&["livre"]);
        let matches = vec![make_match("livre", 1, 10), make_match("livre", 2, 10)];

        let batches = plan_batches("question", &matches, &trees, 14000.0);
        assert_eq!(batches.len(), 1);
    }

    #[test]
    fn test_oversized_match_emitted_alone() {
        let trees = trees_for(&["livre"]);
        let matches = vec![make_match("livre", 1, 2000), make_match("livre", 2, 10)];

        // Budget far below the first match's cost
        let batches = plan_batches("question", &matches, &trees, 100.0);
        assert_eq!(batches.len(), 2);
        assert!(batches[0].documentation.contains("Page 1"));
        assert!(batches[1].documentation.contains("Page 2"));
    }

    #[test]
    fn test_documentation_structure() {
        let trees = trees_for(&["alpha", "beta"]);
        let matches = vec![
            make_match("alpha", 7, 3),
            make_match("beta", 2, 3),
            make_match("alpha", 1, 3),
        ];

        let doc = build_documentation(&matches, &trees);

        assert!(doc.starts_with("<?xml"));
        assert!(doc.contains("<document_matches filename='alpha'>"));
        assert!(doc.contains("<document_matches filename='beta'>"));
        assert!(doc.contains("<description>Résumé de alpha</description>"));

        // alpha's matches are sorted by page within the file block
        let p1 = doc.find("<page_range>Page 1<").unwrap();
        let p7 = doc.find("<page_range>Page 7<").unwrap();
        assert!(p1 < p7);
    }
}
