use corral_core::Assignment;

/// Fraction of `candidate`'s replicas that differ from `baseline`, in [0.0, 1.0].
///
/// Only resources and partitions present in both assignments are compared:
/// every candidate replica of such a partition counts toward the total, and it
/// matches when the baseline has the same participant in the same state.
/// Whatever exists only in the baseline is ignored, so the score measures how
/// stable the candidate is relative to the baseline and is not symmetric.
///
/// With nothing to compare the result is 1.0.
pub fn measure_divergence(baseline: &Assignment, candidate: &Assignment) -> f64 {
    let mut matched = 0usize;
    let mut total = 0usize;

    for (resource, partitions) in candidate.resources() {
        let Some(baseline_partitions) = baseline.resource(resource) else {
            continue;
        };

        for (partition, replicas) in partitions {
            let Some(baseline_replicas) = baseline_partitions.get(partition) else {
                continue;
            };

            matched += replicas
                .iter()
                .filter(|(participant, state)| baseline_replicas.get(*participant) == Some(*state))
                .count();
            total += replicas.len();
        }
    }

    if total == 0 {
        return 1.0;
    }
    1.0 - matched as f64 / total as f64
}
