//! ---
//! havoc_section: "02-chaos-engine"
//! havoc_subsection: "module"
//! havoc_type: "source"
//! havoc_scope: "code"
//! havoc_description: "Randomised selection of a failure that is currently safe to invoke."
//! havoc_version: "v0.1.0"
//! havoc_owner: "tbd"
//! ---
use std::fmt;
use std::sync::Arc;

use rand::seq::SliceRandom;
use rand::Rng;
use tracing::{debug, info};

use crate::error::NoSafeFailures;
use crate::failure::{Failure, FailureType};

/// The set of failure types a run may draw from.
#[derive(Clone, Default)]
pub struct FailureCatalog {
    types: Vec<Arc<dyn FailureType>>,
}

impl FailureCatalog {
    pub fn new(types: Vec<Arc<dyn FailureType>>) -> Self {
        Self { types }
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    /// Try every type once, in a freshly shuffled order, and return the first
    /// instance handed out.
    pub async fn select_safe<R>(&self, rng: &mut R) -> Result<Box<dyn Failure>, NoSafeFailures>
    where
        R: Rng + ?Sized,
    {
        let mut order: Vec<usize> = (0..self.types.len()).collect();
        order.shuffle(rng);

        for index in order {
            let candidate = &self.types[index];
            match candidate.get().await {
                Ok(failure) => {
                    info!(failure_type = %candidate, failure = %failure, "selected failure");
                    return Ok(failure);
                }
                Err(NoSafeFailures) => {
                    debug!(failure_type = %candidate, "failure type not safe right now");
                }
            }
        }
        Err(NoSafeFailures)
    }
}

impl fmt::Debug for FailureCatalog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<String> = self.types.iter().map(ToString::to_string).collect();
        f.debug_struct("FailureCatalog")
            .field("types", &names)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{Journal, ScriptedFailureType};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn catalog(kinds: Vec<ScriptedFailureType>) -> FailureCatalog {
        FailureCatalog::new(
            kinds
                .into_iter()
                .map(|kind| Arc::new(kind) as Arc<dyn FailureType>)
                .collect(),
        )
    }

    #[tokio::test]
    async fn empty_catalog_has_nothing_safe() {
        let mut rng = StdRng::seed_from_u64(1);
        let empty = FailureCatalog::default();
        assert!(empty.is_empty());
        let err = empty.select_safe(&mut rng).await;
        assert!(matches!(err, Err(NoSafeFailures)));
    }

    #[tokio::test]
    async fn all_unsafe_candidates_yield_no_safe_failures() {
        let journal = Journal::default();
        let catalog = catalog(vec![
            ScriptedFailureType::new("a", journal.clone()).unsafe_now(),
            ScriptedFailureType::new("b", journal.clone()).unsafe_now(),
            ScriptedFailureType::new("c", journal.clone()).unsafe_now(),
        ]);
        let mut rng = StdRng::seed_from_u64(7);
        assert!(catalog.select_safe(&mut rng).await.is_err());
        assert_eq!(journal.count("get:"), 3);
        assert_eq!(journal.count("invoke:"), 0);
    }

    #[tokio::test]
    async fn succeeds_whenever_one_candidate_is_safe() {
        for seed in 0..32 {
            for safe_index in 0..4 {
                let journal = Journal::default();
                let kinds = (0..4)
                    .map(|i| {
                        let kind = ScriptedFailureType::new(format!("t{i}"), journal.clone());
                        if i == safe_index {
                            kind
                        } else {
                            kind.unsafe_now()
                        }
                    })
                    .collect();
                let mut rng = StdRng::seed_from_u64(seed);
                let failure = catalog(kinds).select_safe(&mut rng).await.unwrap();
                assert_eq!(failure.to_string(), format!("t{safe_index}-1"));
            }
        }
    }

    #[tokio::test]
    async fn every_candidate_can_be_tried_first() {
        let mut first_seen = std::collections::HashSet::new();
        for seed in 0..64 {
            let journal = Journal::default();
            let catalog = catalog(vec![
                ScriptedFailureType::new("a", journal.clone()),
                ScriptedFailureType::new("b", journal.clone()),
                ScriptedFailureType::new("c", journal.clone()),
            ]);
            let mut rng = StdRng::seed_from_u64(seed);
            catalog.select_safe(&mut rng).await.unwrap();
            let tried = journal.entries_with_prefix("get:");
            assert_eq!(tried.len(), 1);
            first_seen.insert(tried[0].clone());
        }
        assert_eq!(first_seen.len(), 3);
    }
}
