use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Position in the source change feed.
pub type Seq = i64;

/// Resumable position of a replicated stream.
///
/// Stored as one row per stream and only ever written in the same storage transaction as the
/// data it covers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub stream_name: String,
    pub seq: Seq,
    /// Commit time of the last successful flush, `None` until the first one.
    pub last_transaction_at: Option<DateTime<Utc>>,
}

impl Checkpoint {
    /// Returns the checkpoint of a stream that has never been flushed.
    pub fn initial(stream_name: impl Into<String>) -> Self {
        Self {
            stream_name: stream_name.into(),
            seq: 0,
            last_transaction_at: None,
        }
    }

    /// Returns the checkpoint following a flush committed at `committed_at`.
    ///
    /// The seq never moves backwards: a smaller `seq` keeps the current one.
    pub fn advance(&self, seq: Option<Seq>, committed_at: DateTime<Utc>) -> Self {
        Self {
            stream_name: self.stream_name.clone(),
            seq: seq.map_or(self.seq, |seq| seq.max(self.seq)),
            last_transaction_at: Some(committed_at),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn initial_checkpoint_starts_at_zero() {
        let checkpoint = Checkpoint::initial("items");

        assert_eq!(checkpoint.seq, 0);
        assert_eq!(checkpoint.last_transaction_at, None);
    }

    #[test]
    fn advance_never_decreases_seq() {
        let now = Utc::now();
        let checkpoint = Checkpoint::initial("items").advance(Some(10), now);

        assert_eq!(checkpoint.seq, 10);
        assert_eq!(checkpoint.advance(Some(7), now).seq, 10);
        assert_eq!(checkpoint.advance(None, now).seq, 10);
        assert_eq!(checkpoint.advance(Some(11), now).seq, 11);
        assert_eq!(checkpoint.last_transaction_at, Some(now));
    }
}
