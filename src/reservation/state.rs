//! Reservation lifecycle states.
//!
//! Closed five-variant FSM, `#[repr(i16)]` so the numeric id is both the
//! wire/storage representation and the `Ord` used for event ordering,
//! mirroring the transfer coordinator's own state enum.

use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(i16)]
pub enum ReservationState {
    Reserved = 0,
    Allocated = 10,
    Fulfilled = 40,
    Cancelled = -10,
    Expired = -20,
}

impl ReservationState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ReservationState::Fulfilled | ReservationState::Cancelled | ReservationState::Expired
        )
    }

    pub fn id(&self) -> i16 {
        *self as i16
    }

    pub fn from_id(id: i16) -> Option<Self> {
        match id {
            0 => Some(ReservationState::Reserved),
            10 => Some(ReservationState::Allocated),
            40 => Some(ReservationState::Fulfilled),
            -10 => Some(ReservationState::Cancelled),
            -20 => Some(ReservationState::Expired),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ReservationState::Reserved => "RESERVED",
            ReservationState::Allocated => "ALLOCATED",
            ReservationState::Fulfilled => "FULFILLED",
            ReservationState::Cancelled => "CANCELLED",
            ReservationState::Expired => "EXPIRED",
        }
    }
}

impl fmt::Display for ReservationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl TryFrom<i16> for ReservationState {
    type Error = String;

    fn try_from(id: i16) -> Result<Self, Self::Error> {
        ReservationState::from_id(id).ok_or_else(|| format!("invalid reservation state id: {id}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_states() {
        assert!(!ReservationState::Reserved.is_terminal());
        assert!(!ReservationState::Allocated.is_terminal());
        assert!(ReservationState::Fulfilled.is_terminal());
        assert!(ReservationState::Cancelled.is_terminal());
        assert!(ReservationState::Expired.is_terminal());
    }

    #[test]
    fn state_id_roundtrip() {
        for s in [
            ReservationState::Reserved,
            ReservationState::Allocated,
            ReservationState::Fulfilled,
            ReservationState::Cancelled,
            ReservationState::Expired,
        ] {
            assert_eq!(ReservationState::from_id(s.id()), Some(s));
        }
    }

    #[test]
    fn invalid_state_id() {
        assert_eq!(ReservationState::from_id(99), None);
        assert!(ReservationState::try_from(99i16).is_err());
    }

    #[test]
    fn display() {
        assert_eq!(ReservationState::Reserved.to_string(), "RESERVED");
        assert_eq!(ReservationState::Fulfilled.to_string(), "FULFILLED");
    }
}
