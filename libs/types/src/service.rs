//! Service types and delivery modes
//!
//! A process in the cluster belongs to exactly one [`ServiceType`]. The set is
//! closed: adding a new kind of process means adding a variant here so every
//! routing table, channel name and stub role mapping sees it at compile time.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::TypeError;

/// Kind of server process participating in the cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceType {
    Client,
    Gate,
    Game,
    Db,
}

impl ServiceType {
    /// Every service type, in declaration order.
    pub const ALL: [ServiceType; 4] = [
        ServiceType::Client,
        ServiceType::Gate,
        ServiceType::Game,
        ServiceType::Db,
    ];

    /// Lowercase name used in store keys and channel names.
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceType::Client => "client",
            ServiceType::Gate => "gate",
            ServiceType::Game => "game",
            ServiceType::Db => "db",
        }
    }
}

impl fmt::Display for ServiceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ServiceType {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ServiceType::ALL
            .iter()
            .copied()
            .find(|ty| ty.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| TypeError::UnknownServiceType {
                name: s.to_string(),
            })
    }
}

/// How an envelope fans out once it reaches a service type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum SendMode {
    /// Exactly one destination instance.
    #[default]
    Point,
    /// Every instance of the destination actor on every member.
    Broadcast,
    /// Same fan-out as broadcast; used for role announcements.
    Topic,
}

impl SendMode {
    pub fn is_point(&self) -> bool {
        matches!(self, SendMode::Point)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_service_type_parse_is_case_insensitive() {
        assert_eq!("Game".parse::<ServiceType>().unwrap(), ServiceType::Game);
        assert_eq!(" db ".parse::<ServiceType>().unwrap(), ServiceType::Db);
        assert!("lobby".parse::<ServiceType>().is_err());
    }

    #[test]
    fn test_service_type_display_matches_serde() {
        for ty in ServiceType::ALL {
            let json = serde_json::to_string(&ty).unwrap();
            assert_eq!(json, format!("\"{}\"", ty));
        }
    }

    #[test]
    fn test_default_send_mode_is_point() {
        assert!(SendMode::default().is_point());
        assert!(!SendMode::Broadcast.is_point());
    }
}
