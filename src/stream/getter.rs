use super::{DataGetter, StreamError};
use crate::transport::{Rank, Source, Tag, Transport};

/// Pulls blocks from a fixed producer rank.
pub struct RankGetter<T: Transport> {
    /// Endpoint the pull requests go out on.
    transport: T,
    /// Rank every pull request is addressed to.
    producer: Rank,
    /// Set once the zero-length terminator has been read.
    finished: bool,
}

impl<T: Transport> RankGetter<T> {
    pub fn new(transport: T, producer: Rank) -> Result<Self, StreamError> {
        let me = transport.rank();
        let size = transport.size();
        if producer >= size || producer == me {
            return Err(StreamError::InvalidProducer {
                rank: producer,
                me,
                size,
            });
        }
        Ok(Self {
            transport,
            producer,
            finished: false,
        })
    }

    pub fn producer(&self) -> Rank {
        self.producer
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }
}

impl<T: Transport> DataGetter for RankGetter<T> {
    /// Request the next block and wait for it.
    ///
    /// After the zero-length terminator has been returned every further call
    /// fails with [`StreamError::Finished`]; the producer would never answer.
    fn read(&mut self) -> Result<Vec<u8>, StreamError> {
        if self.finished {
            return Err(StreamError::Finished);
        }

        self.transport.send(self.producer, Tag::BinaryData, &[])?;
        let status = self
            .transport
            .probe(Source::Rank(self.producer), Some(Tag::BinaryData))?;
        let block = self.transport.receive(status.source, Tag::BinaryData)?;

        if block.is_empty() {
            log::debug!(
                "Rank {} reached end of stream from rank {}",
                self.transport.rank(),
                self.producer
            );
            self.finished = true;
        } else {
            log::trace!("Pulled {} bytes from rank {}", block.len(), self.producer);
        }
        Ok(block)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::LocalGroup;

    #[test]
    fn test_producer_must_be_another_rank_in_the_group() {
        let (_group, endpoints) = LocalGroup::new(2);
        assert!(matches!(
            RankGetter::new(endpoints[1].clone(), 1),
            Err(StreamError::InvalidProducer { rank: 1, me: 1, size: 2 })
        ));
        assert!(matches!(
            RankGetter::new(endpoints[1].clone(), 2),
            Err(StreamError::InvalidProducer { .. })
        ));
        assert!(RankGetter::new(endpoints[1].clone(), 0).is_ok());
    }

    #[test]
    fn test_read_sends_pull_request_and_returns_reply() {
        let (_group, endpoints) = LocalGroup::new(2);
        let producer = endpoints[0].clone();

        // Pre-load the reply; the pull request is checked afterwards.
        producer.send(1, Tag::BinaryData, b"block").unwrap();
        let mut getter = RankGetter::new(endpoints[1].clone(), 0).unwrap();
        assert_eq!(getter.read().unwrap(), b"block");

        let request = producer.probe(Source::Rank(1), Some(Tag::BinaryData)).unwrap();
        assert_eq!(request.len, 0);
        assert!(!getter.is_finished());
    }

    #[test]
    fn test_read_after_terminator_fails() {
        let (_group, endpoints) = LocalGroup::new(2);
        endpoints[0].send(1, Tag::BinaryData, &[]).unwrap();

        let mut getter = RankGetter::new(endpoints[1].clone(), 0).unwrap();
        assert!(getter.read().unwrap().is_empty());
        assert!(getter.is_finished());
        assert!(matches!(getter.read(), Err(StreamError::Finished)));
    }
}
