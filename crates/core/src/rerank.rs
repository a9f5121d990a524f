//! Maximal Marginal Relevance selection.

/// Cosine similarity; zero when either vector has no magnitude or the
/// lengths differ.
pub fn cosine_similarity(left: &[f32], right: &[f32]) -> f32 {
    if left.len() != right.len() || left.is_empty() {
        return 0.0;
    }

    let (dot, left_norm, right_norm) = left.iter().zip(right).fold(
        (0f32, 0f32, 0f32),
        |(dot, left_norm, right_norm), (l, r)| (dot + l * r, left_norm + l * l, right_norm + r * r),
    );

    let denominator = left_norm.sqrt() * right_norm.sqrt();
    if denominator > 0.0 {
        dot / denominator
    } else {
        0.0
    }
}

/// Greedily picks up to `k` candidate indices maximizing
/// `lambda * sim(query, i) - (1 - lambda) * max_selected sim(i, j)`.
///
/// Candidates are expected in raw-similarity order; equal scores keep the
/// earlier candidate.
pub fn mmr_select<V: AsRef<[f32]>>(
    query: &[f32],
    candidates: &[V],
    k: usize,
    lambda: f32,
) -> Vec<usize> {
    let lambda = lambda.clamp(0.0, 1.0);
    let relevance: Vec<f32> = candidates
        .iter()
        .map(|candidate| cosine_similarity(query, candidate.as_ref()))
        .collect();

    let mut selected: Vec<usize> = Vec::with_capacity(k.min(candidates.len()));
    // Highest similarity of each candidate to anything already selected.
    let mut redundancy = vec![f32::NEG_INFINITY; candidates.len()];

    while selected.len() < k.min(candidates.len()) {
        let mut best: Option<(usize, f32)> = None;

        for (index, relevance) in relevance.iter().enumerate() {
            if selected.contains(&index) {
                continue;
            }

            let penalty = if selected.is_empty() {
                0.0
            } else {
                redundancy[index]
            };
            let score = lambda * relevance - (1.0 - lambda) * penalty;

            match best {
                Some((_, best_score)) if score <= best_score => {}
                _ => best = Some((index, score)),
            }
        }

        let Some((chosen, _)) = best else {
            break;
        };
        selected.push(chosen);

        for (index, candidate) in candidates.iter().enumerate() {
            let similarity = cosine_similarity(candidates[chosen].as_ref(), candidate.as_ref());
            if similarity > redundancy[index] {
                redundancy[index] = similarity;
            }
        }
    }

    selected
}

#[cfg(test)]
mod tests {
    use super::*;

    fn normalized(values: &[f32]) -> Vec<f32> {
        let norm = values.iter().map(|value| value * value).sum::<f32>().sqrt();
        values.iter().map(|value| value / norm).collect()
    }

    #[test]
    fn cosine_of_identical_and_orthogonal_vectors() {
        assert!((cosine_similarity(&[1.0, 2.0], &[1.0, 2.0]) - 1.0).abs() < 1e-6);
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 0.0]), 0.0);
    }

    #[test]
    fn first_pick_is_most_relevant() {
        let query: Vec<f32> = vec![1.0, 0.0];
        let candidates: Vec<Vec<f32>> = vec![vec![0.5, 0.5], vec![1.0, 0.0], vec![0.0, 1.0]];
        assert_eq!(mmr_select(&query, &candidates, 1, 0.5)[0], 1);
    }

    #[test]
    fn skips_near_duplicates_from_a_tight_cluster() {
        let query: Vec<f32> = vec![1.0, 0.0, 0.0];
        // Cluster A: nearly identical, close to the query.
        let a1 = normalized(&[0.9, 0.436, 0.0]);
        let a2 = normalized(&[0.9, 0.44, 0.0]);
        let a3 = normalized(&[0.9, 0.43, 0.01]);
        // Cluster B: less relevant, spread apart.
        let b1 = normalized(&[0.8, -0.6, 0.0]);
        let b2 = normalized(&[0.7, 0.0, 0.714]);
        let candidates = vec![a1, a2, a3, b1, b2];

        let picks = mmr_select(&query, &candidates, 2, 0.5);
        assert_eq!(picks.len(), 2);
        assert!(picks[0] < 3, "first pick {picks:?} should be the most relevant");
        assert!(picks[1] >= 3, "second pick {picks:?} came from the tight cluster");
    }

    #[test]
    fn lambda_one_is_plain_relevance_order() {
        let query: Vec<f32> = vec![1.0, 0.0];
        let candidates: Vec<Vec<f32>> = vec![vec![0.9, 0.1], vec![1.0, 0.0], vec![0.9, 0.1]];
        assert_eq!(mmr_select(&query, &candidates, 3, 1.0), vec![1, 0, 2]);
    }

    #[test]
    fn ties_prefer_lowest_original_rank() {
        let query: Vec<f32> = vec![1.0, 0.0];
        let candidates: Vec<Vec<f32>> = vec![vec![1.0, 0.0], vec![1.0, 0.0], vec![1.0, 0.0]];
        assert_eq!(mmr_select(&query, &candidates, 2, 0.5), vec![0, 1]);
    }

    #[test]
    fn stops_when_candidates_run_out() {
        let query: Vec<f32> = vec![1.0, 0.0];
        let candidates: Vec<Vec<f32>> = vec![vec![1.0, 0.0]];
        assert_eq!(mmr_select(&query, &candidates, 5, 0.5), vec![0]);
        assert!(mmr_select::<Vec<f32>>(&query, &[], 5, 0.5).is_empty());
        assert!(mmr_select(&query, &candidates, 0, 0.5).is_empty());
    }
}
