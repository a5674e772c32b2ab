use crate::config::PlacementStrategy;

/// Load of one candidate participant at the time a slot is being filled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParticipantLoad {
    pub participant: String,
    /// Aggregated weight on the rebalancer's capacity key
    pub weight: i64,
    pub replicas: usize,
}

// Least used: aggregated weight, then replica count, then name.
pub fn rankings_least_used(loads: &[ParticipantLoad]) -> Vec<String> {
    let mut ranked: Vec<&ParticipantLoad> = loads.iter().collect();
    ranked.sort_by(|a, b| {
        a.weight
            .cmp(&b.weight)
            .then(a.replicas.cmp(&b.replicas))
            .then_with(|| a.participant.cmp(&b.participant))
    });
    ranked.into_iter().map(|l| l.participant.clone()).collect()
}

// Fair distribution: the replica count only, name breaks ties.
pub fn rankings_fair(loads: &[ParticipantLoad]) -> Vec<String> {
    let mut ranked: Vec<&ParticipantLoad> = loads.iter().collect();
    ranked.sort_by(|a, b| {
        a.replicas
            .cmp(&b.replicas)
            .then_with(|| a.participant.cmp(&b.participant))
    });
    ranked.into_iter().map(|l| l.participant.clone()).collect()
}

pub fn rank(strategy: PlacementStrategy, loads: &[ParticipantLoad]) -> Vec<String> {
    match strategy {
        PlacementStrategy::LeastUsed => rankings_least_used(loads),
        PlacementStrategy::Fair => rankings_fair(loads),
    }
}
