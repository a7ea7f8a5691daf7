//! Rank directory and target resolution
//!
//! Resolves the logical targets `all` and `others` and numeric rank strings
//! into the concrete, ascending set of ranks a command fans out to.

use crate::transport::{Rank, Transport};
use std::str::FromStr;

pub const TARGET_ALL: &str = "all";
pub const TARGET_OTHERS: &str = "others";

/// A parsed, not yet range-checked, command target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    /// Every rank, self included.
    All,
    /// Every rank except self.
    Others,
    /// A single numeric rank.
    Rank(i64),
}

impl FromStr for Target {
    type Err = TargetError;

    fn from_str(token: &str) -> Result<Self, Self::Err> {
        match token {
            TARGET_ALL => Ok(Target::All),
            TARGET_OTHERS => Ok(Target::Others),
            other => other
                .trim()
                .parse::<i64>()
                .map(Target::Rank)
                .map_err(|_| TargetError::Unparseable(token.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TargetError {
    #[error("Invalid rank {rank}: group size is {size}")]
    OutOfRange { rank: i64, size: usize },
    #[error("Expected a rank, \"all\" or \"others\" but got \"{0}\"")]
    Unparseable(String),
}

/// "Who am I" and "how many of us" for one rank.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RankDirectory {
    /// This process's rank.
    rank: Rank,
    /// Number of ranks in the group.
    size: usize,
}

impl RankDirectory {
    pub fn new(rank: Rank, size: usize) -> Self {
        Self { rank, size }
    }

    pub fn from_transport<T: Transport + ?Sized>(transport: &T) -> Self {
        Self::new(transport.rank(), transport.size())
    }

    pub fn my_rank(&self) -> Rank {
        self.rank
    }

    pub fn group_size(&self) -> usize {
        self.size
    }

    /// The coordinator runs the interactive front end and the notifier.
    pub fn is_coordinator(&self) -> bool {
        self.rank == 0
    }

    /// Resolve a target token into ascending concrete ranks.
    pub fn resolve_target(&self, token: &str) -> Result<Vec<Rank>, TargetError> {
        self.resolve(token.parse()?)
    }

    pub fn resolve(&self, target: Target) -> Result<Vec<Rank>, TargetError> {
        match target {
            Target::All => Ok((0..self.size).collect()),
            Target::Others => Ok((0..self.size).filter(|&r| r != self.rank).collect()),
            Target::Rank(rank) => {
                if rank >= 0 && (rank as u64) < self.size as u64 {
                    Ok(vec![rank as Rank])
                } else {
                    Err(TargetError::OutOfRange {
                        rank,
                        size: self.size,
                    })
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    #[test]
    fn test_numeric_targets_in_range() {
        let directory = RankDirectory::new(1, 4);
        for r in 0..4 {
            assert_eq!(directory.resolve_target(&r.to_string()).unwrap(), vec![r]);
        }
    }

    #[test]
    fn test_numeric_targets_out_of_range() {
        let directory = RankDirectory::new(0, 3);
        assert_eq!(
            directory.resolve_target("3"),
            Err(TargetError::OutOfRange { rank: 3, size: 3 })
        );
        assert_eq!(
            directory.resolve_target("-1"),
            Err(TargetError::OutOfRange { rank: -1, size: 3 })
        );
    }

    #[test]
    fn test_unparseable_target() {
        let directory = RankDirectory::new(0, 3);
        assert_eq!(
            directory.resolve_target("everyone"),
            Err(TargetError::Unparseable("everyone".to_string()))
        );
        assert!(directory.resolve_target("").is_err());
        assert!(directory.resolve_target("1.5").is_err());
    }

    #[test]
    fn test_all_and_others_partition_the_group() {
        for size in 1..6 {
            for me in 0..size {
                let directory = RankDirectory::new(me, size);
                let all: BTreeSet<_> = directory.resolve_target("all").unwrap().into_iter().collect();
                let others: BTreeSet<_> =
                    directory.resolve_target("others").unwrap().into_iter().collect();

                let me_only: BTreeSet<_> = [me].into_iter().collect();

                assert!(all.contains(&me));
                assert!(!others.contains(&me));
                assert_eq!(all.len(), size);
                let joined: BTreeSet<_> = others.union(&me_only).copied().collect();
                assert_eq!(joined, all);
                assert!(others.is_disjoint(&me_only));
            }
        }
    }

    #[test]
    fn test_fan_out_is_ascending() {
        let directory = RankDirectory::new(2, 5);
        assert_eq!(directory.resolve_target("all").unwrap(), vec![0, 1, 2, 3, 4]);
        assert_eq!(directory.resolve_target("others").unwrap(), vec![0, 1, 3, 4]);
    }

    #[test]
    fn test_coordinator_is_rank_zero() {
        assert!(RankDirectory::new(0, 2).is_coordinator());
        assert!(!RankDirectory::new(1, 2).is_coordinator());
    }
}
