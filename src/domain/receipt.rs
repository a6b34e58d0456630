use serde::{Deserialize, Serialize};

/// Delivery state of a message. Ordered so that a merge can only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub enum DeliveryStatus {
    /// Only ever held client-side, before the server acknowledges the send.
    Sending,
    #[default]
    Sent,
    Delivered,
    Read,
}

impl DeliveryStatus {
    /// Monotonic merge: the result is never behind either input.
    #[must_use]
    pub fn merge(self, incoming: Self) -> Self {
        self.max(incoming)
    }

    #[must_use]
    pub const fn as_i16(self) -> i16 {
        match self {
            Self::Sending => 0,
            Self::Sent => 1,
            Self::Delivered => 2,
            Self::Read => 3,
        }
    }

    #[must_use]
    pub const fn from_i16(value: i16) -> Self {
        match value {
            i16::MIN..=0 => Self::Sending,
            1 => Self::Sent,
            2 => Self::Delivered,
            _ => Self::Read,
        }
    }
}
