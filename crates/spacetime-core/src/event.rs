//! Per-type lifecycle event attached to an object change.

use crate::error::DeltaError;
use serde::{Deserialize, Serialize};

/// What happened to an object, from the point of view of one of its types.
///
/// The integer tags travel on the wire and must match across peers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum Event {
    New = 0,
    Modification = 1,
    Delete = 2,
}

impl From<Event> for u8 {
    fn from(event: Event) -> u8 {
        event as u8
    }
}

impl TryFrom<u8> for Event {
    type Error = DeltaError;

    fn try_from(tag: u8) -> Result<Self, Self::Error> {
        match tag {
            0 => Ok(Event::New),
            1 => Ok(Event::Modification),
            2 => Ok(Event::Delete),
            other => Err(DeltaError::UnknownEvent(other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_tags() {
        assert_eq!(serde_json::to_string(&Event::New).unwrap(), "0");
        assert_eq!(serde_json::to_string(&Event::Modification).unwrap(), "1");
        assert_eq!(serde_json::to_string(&Event::Delete).unwrap(), "2");
    }

    #[test]
    fn test_unknown_tag_rejected() {
        assert!(serde_json::from_str::<Event>("7").is_err());
        assert_eq!(Event::try_from(7u8), Err(DeltaError::UnknownEvent(7)));
        assert_eq!(serde_json::from_str::<Event>("2").unwrap(), Event::Delete);
    }
}
