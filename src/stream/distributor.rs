use super::{DataDistributor, StreamError};
use crate::transport::{recv_matching, Rank, Source, Tag, Transport};
use std::collections::BTreeSet;

/// Hands each produced block to whichever consumer asks first and runs the
/// known consumers down at end of stream.
///
/// Rundown only waits for ranks that have pulled at least once, or that were
/// declared up front with [`RankDistributor::with_expected_consumers`]. A
/// consumer whose first pull arrives after rundown finished is never
/// answered, so callers must either declare every consumer or make sure each
/// has pulled before signalling end of stream.
pub struct RankDistributor<T: Transport> {
    /// Endpoint requests arrive on and replies go out from.
    transport: T,
    /// Ranks served at least once and not yet sent a terminator.
    consumers: BTreeSet<Rank>,
}

impl<T: Transport> RankDistributor<T> {
    /// A distributor with an empty consumer set; consumers are learned from
    /// their pulls.
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            consumers: BTreeSet::new(),
        }
    }

    /// Declare consumers ahead of time so rundown waits for them even if they
    /// never received a block.
    pub fn with_expected_consumers<I>(transport: T, ranks: I) -> Self
    where
        I: IntoIterator<Item = Rank>,
    {
        let me = transport.rank();
        let consumers = ranks.into_iter().filter(|&r| r != me).collect();
        Self {
            transport,
            consumers,
        }
    }

    /// Ranks currently owed an answer at end of stream.
    pub fn consumers(&self) -> &BTreeSet<Rank> {
        &self.consumers
    }

    /// Wait for the next pull request from any rank.
    fn next_request(&self) -> Result<Rank, StreamError> {
        let request = recv_matching(&self.transport, Source::Any, Some(Tag::BinaryData))?;
        if !request.is_empty() {
            return Err(StreamError::UnexpectedPayload {
                source_rank: request.source,
                len: request.len(),
            });
        }
        Ok(request.source)
    }

    fn run_down_consumers(&mut self) -> Result<(), StreamError> {
        log::debug!("Running down {} consumers", self.consumers.len());
        while !self.consumers.is_empty() {
            let rank = self.next_request()?;
            self.transport.send(rank, Tag::BinaryData, &[])?;
            self.consumers.remove(&rank);
            log::trace!("Sent end of stream to rank {}", rank);
        }
        Ok(())
    }
}

impl<T: Transport> DataDistributor for RankDistributor<T> {
    fn handle_data(&mut self, block: &[u8]) -> Result<(), StreamError> {
        if block.is_empty() {
            return self.run_down_consumers();
        }

        let rank = self.next_request()?;
        self.transport.send(rank, Tag::BinaryData, block)?;
        self.consumers.insert(rank);
        log::trace!("Sent {} bytes to rank {}", block.len(), rank);
        Ok(())
    }
}

impl<T: Transport> Drop for RankDistributor<T> {
    fn drop(&mut self) {
        if !self.consumers.is_empty() {
            log::warn!(
                "Distributor dropped with {} consumers not run down: {:?}",
                self.consumers.len(),
                self.consumers
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::{DataGetter, RankGetter};
    use crate::transport::LocalGroup;
    use std::thread;

    #[test]
    fn test_single_consumer_round_trip() {
        let (_group, endpoints) = LocalGroup::new(2);
        let blocks: Vec<Vec<u8>> = vec![b"b1".to_vec(), b"block two".to_vec(), vec![0u8; 4096]];

        let consumer_endpoint = endpoints[1].clone();
        let consumer = thread::spawn(move || {
            let mut getter = RankGetter::new(consumer_endpoint, 0).unwrap();
            let mut received = Vec::new();
            loop {
                let block = getter.read().unwrap();
                let done = block.is_empty();
                received.push(block);
                if done {
                    break;
                }
            }
            received
        });

        let mut distributor = RankDistributor::new(endpoints[0].clone());
        for block in &blocks {
            distributor.handle_data(block).unwrap();
        }
        distributor.handle_data(&[]).unwrap();
        assert!(distributor.consumers().is_empty());

        let received = consumer.join().unwrap();
        let mut expected = blocks.clone();
        expected.push(Vec::new());
        assert_eq!(received, expected);
    }

    #[test]
    fn test_rundown_answers_every_outstanding_pull() {
        let (_group, endpoints) = LocalGroup::new(4);

        let consumers: Vec<_> = (1..4)
            .map(|rank| {
                let endpoint = endpoints[rank].clone();
                thread::spawn(move || {
                    let mut getter = RankGetter::new(endpoint, 0).unwrap();
                    getter.read().unwrap()
                })
            })
            .collect();

        let mut distributor =
            RankDistributor::with_expected_consumers(endpoints[0].clone(), 0..4);
        assert_eq!(distributor.consumers().len(), 3);
        distributor.handle_data(&[]).unwrap();
        assert!(distributor.consumers().is_empty());

        for consumer in consumers {
            assert!(consumer.join().unwrap().is_empty());
        }
        assert_eq!(endpoints[0].pending(), 0);
    }

    #[test]
    fn test_rundown_terminates_exactly_the_learned_consumers() {
        let (_group, endpoints) = LocalGroup::new(5);
        let mut distributor = RankDistributor::new(endpoints[0].clone());
        assert!(distributor.consumers().is_empty());

        // Ranks 1..=3 each pull once and are served one block; rank 4 never pulls.
        for rank in 1..4 {
            endpoints[rank].send(0, Tag::BinaryData, &[]).unwrap();
            distributor.handle_data(&[rank as u8; 3]).unwrap();
        }
        assert_eq!(distributor.consumers().iter().copied().collect::<Vec<_>>(), vec![1, 2, 3]);

        for rank in 1..4 {
            endpoints[rank].send(0, Tag::BinaryData, &[]).unwrap();
        }
        distributor.handle_data(&[]).unwrap();
        assert!(distributor.consumers().is_empty());
        assert_eq!(endpoints[0].pending(), 0);

        for rank in 1..4 {
            assert_eq!(endpoints[rank].pending(), 2);
            assert_eq!(endpoints[rank].receive(0, Tag::BinaryData).unwrap(), vec![rank as u8; 3]);
            assert!(endpoints[rank].receive(0, Tag::BinaryData).unwrap().is_empty());
            assert_eq!(endpoints[rank].pending(), 0);
        }
        assert_eq!(endpoints[4].pending(), 0);
    }

    #[test]
    fn test_non_empty_request_is_rejected() {
        let (_group, endpoints) = LocalGroup::new(2);
        endpoints[1].send(0, Tag::BinaryData, b"oops").unwrap();

        let mut distributor = RankDistributor::new(endpoints[0].clone());
        let err = distributor.handle_data(b"block").unwrap_err();
        assert!(matches!(
            err,
            StreamError::UnexpectedPayload { source_rank: 1, len: 4 }
        ));
    }

    #[test]
    fn test_requester_is_remembered_until_terminated() {
        let (_group, endpoints) = LocalGroup::new(2);
        endpoints[1].send(0, Tag::BinaryData, &[]).unwrap();

        let mut distributor = RankDistributor::new(endpoints[0].clone());
        distributor.handle_data(b"one").unwrap();
        assert!(distributor.consumers().contains(&1));

        endpoints[1].send(0, Tag::BinaryData, &[]).unwrap();
        distributor.handle_data(&[]).unwrap();
        assert!(distributor.consumers().is_empty());

        assert_eq!(endpoints[1].receive(0, Tag::BinaryData).unwrap(), b"one");
        assert!(endpoints[1].receive(0, Tag::BinaryData).unwrap().is_empty());
    }
}
