//! Release channels.
//!
//! A channel is a moving pointer inside a group. The set of channels is
//! fixed; ordering goes from least to most stable.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::TrdlError;

/// Release channel, ordered from least to most stable.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "kebab-case")]
pub enum Channel {
    Alpha,
    Beta,
    Ea,
    #[default]
    Stable,
    RockSolid,
}

impl Channel {
    pub const ALL: [Channel; 5] = [
        Channel::Alpha,
        Channel::Beta,
        Channel::Ea,
        Channel::Stable,
        Channel::RockSolid,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Alpha => "alpha",
            Channel::Beta => "beta",
            Channel::Ea => "ea",
            Channel::Stable => "stable",
            Channel::RockSolid => "rock-solid",
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Channel {
    type Err = TrdlError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Channel::ALL
            .iter()
            .find(|c| c.as_str() == s)
            .copied()
            .ok_or_else(|| {
                let expected = Channel::ALL
                    .iter()
                    .map(|c| format!("{:?}", c.as_str()))
                    .collect::<Vec<_>>()
                    .join(", ");
                TrdlError::InvalidArgument(format!(
                    "unsupported channel {s:?} specified, use one of the following: {expected}"
                ))
            })
    }
}
