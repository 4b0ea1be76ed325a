use serde::{Deserialize, Serialize};
use std::fmt;
use std::num::ParseIntError;
use std::str::FromStr;

/// Идентификатор пира, выданный сигнальным сервером.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub struct PeerId(pub i32);

impl PeerId {
    pub fn new(id: i32) -> Self {
        Self(id)
    }
}

impl From<i32> for PeerId {
    fn from(id: i32) -> Self {
        Self(id)
    }
}

impl FromStr for PeerId {
    type Err = ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse::<i32>().map(Self)
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
