use std::collections::BTreeMap;

/// Average Precision over a ranked document list: at each rank holding a
/// relevant document (relevance > 0), precision-at-that-rank is
/// accumulated, then averaged over the total number of relevant documents
/// known for the query. A query with zero known relevant documents scores
/// 0, it is not skipped.
pub fn average_precision(ranked: &[(String, f64)], judgments: &BTreeMap<String, i32>) -> f64 {
    let relevant_total = judgments.values().filter(|&&grade| grade > 0).count();
    if relevant_total == 0 {
        return 0.0;
    }

    let mut relevant_seen = 0usize;
    let mut precision_sum = 0.0f64;
    for (index, (doc_id, _score)) in ranked.iter().enumerate() {
        if judgments.get(doc_id).copied().unwrap_or(0) > 0 {
            relevant_seen += 1;
            precision_sum += relevant_seen as f64 / (index + 1) as f64;
        }
    }

    precision_sum / relevant_total as f64
}

/// Precision@10 with a fixed denominator of 10: a result list shorter than
/// ten counts the missing slots as non-relevant.
pub fn precision_at_10(ranked: &[(String, f64)], judgments: &BTreeMap<String, i32>) -> f64 {
    let relevant_in_top = ranked
        .iter()
        .take(10)
        .filter(|(doc_id, _score)| judgments.get(doc_id).copied().unwrap_or(0) > 0)
        .count();

    relevant_in_top as f64 / 10.0
}

pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}
