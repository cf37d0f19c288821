use serde_with::{DeserializeFromStr, SerializeDisplay};
use std::{fmt, str::FromStr};

pub type ChainId = u64;

/// Position of a log inside a single chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EventPosition {
    pub block_number: u64,
    pub log_index: u64,
}

impl EventPosition {
    pub fn new(block_number: u64, log_index: u64) -> Self {
        Self {
            block_number,
            log_index,
        }
    }

    /// The greatest position inside `block_number`. Everything strictly after
    /// it belongs to later blocks.
    pub fn end_of_block(block_number: u64) -> Self {
        Self::new(block_number, u64::MAX)
    }
}

/// Globally unique identity of an indexed log.
///
/// Rendered as `{chain_id}_{block_number}_{log_index}`. The derived ordering
/// compares chain first, so ids of the same chain sort by their position.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, SerializeDisplay, DeserializeFromStr,
)]
pub struct EventId {
    pub chain_id: ChainId,
    pub block_number: u64,
    pub log_index: u64,
}

impl EventId {
    pub fn new(chain_id: ChainId, block_number: u64, log_index: u64) -> Self {
        Self {
            chain_id,
            block_number,
            log_index,
        }
    }

    pub fn position(&self) -> EventPosition {
        EventPosition::new(self.block_number, self.log_index)
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}_{}", self.chain_id, self.block_number, self.log_index)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid event id `{0}`")]
pub struct ParseEventIdError(String);

impl FromStr for EventId {
    type Err = ParseEventIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || ParseEventIdError(s.to_string());
        let mut parts = s.split('_');
        let mut next = || -> Result<u64, ParseEventIdError> {
            parts.next().ok_or_else(err)?.parse().map_err(|_| err())
        };
        let id = Self::new(next()?, next()?, next()?);
        if parts.next().is_some() {
            return Err(err());
        }
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    #[test]
    fn renders_identity() {
        assert_eq!(EventId::new(1, 100, 5).to_string(), "1_100_5");
    }

    #[rstest]
    #[case::simple("1_100_5", Some(EventId::new(1, 100, 5)))]
    #[case::large("8453_28000000_311", Some(EventId::new(8453, 28_000_000, 311)))]
    #[case::missing_part("1_100", None)]
    #[case::extra_part("1_100_5_7", None)]
    #[case::not_a_number("1_abc_5", None)]
    #[case::negative("1_-100_5", None)]
    #[case::empty("", None)]
    fn parses_identity(#[case] input: &str, #[case] expected: Option<EventId>) {
        assert_eq!(input.parse::<EventId>().ok(), expected);
    }

    #[test]
    fn orders_by_block_then_log_index() {
        let mut ids = vec![
            EventId::new(1, 101, 0),
            EventId::new(1, 100, 7),
            EventId::new(1, 100, 2),
        ];
        ids.sort();
        assert_eq!(
            ids,
            vec![
                EventId::new(1, 100, 2),
                EventId::new(1, 100, 7),
                EventId::new(1, 101, 0),
            ]
        );
    }

    #[test]
    fn end_of_block_covers_every_log_of_the_block() {
        let boundary = EventPosition::end_of_block(10);
        assert!(EventPosition::new(10, 9_999) <= boundary);
        assert!(EventPosition::new(11, 0) > boundary);
    }

    #[test]
    fn serializes_as_string() {
        let id = EventId::new(137, 42, 3);
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"137_42_3\"");
        assert_eq!(serde_json::from_str::<EventId>(&json).unwrap(), id);
    }
}
