//! The fixed analytical panel

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum Role {
    #[serde(rename = "Planner")]
    Planner,
    #[serde(rename = "Market Analyst")]
    MarketAnalyst,
    #[serde(rename = "Risk Officer")]
    RiskOfficer,
}

impl Role {
    /// Speaking order in every round
    pub const ALL: [Role; 3] = [Role::Planner, Role::MarketAnalyst, Role::RiskOfficer];

    pub fn name(&self) -> &'static str {
        match self {
            Role::Planner => "Planner",
            Role::MarketAnalyst => "Market Analyst",
            Role::RiskOfficer => "Risk Officer",
        }
    }

    /// Display tag used in logs and UIs
    pub fn tag(&self) -> &'static str {
        match self {
            Role::Planner => "📊",
            Role::MarketAnalyst => "📉",
            Role::RiskOfficer => "🛡️",
        }
    }

    pub fn framing(&self) -> &'static str {
        match self {
            Role::Planner => {
                "You think in scenarios and sequencing. Weigh what the data implies for \
                 buyers planning a purchase over the next 6-12 months."
            }
            Role::MarketAnalyst => {
                "You focus on the numbers: rate levels against their trailing average, \
                 momentum, and how home prices are responding."
            }
            Role::RiskOfficer => {
                "You look for what could go wrong: affordability stress, rate shocks, \
                 and the cost of being wrong in either direction."
            }
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_serializes_as_display_name() {
        let json = serde_json::to_string(&Role::RiskOfficer).unwrap();
        assert_eq!(json, "\"Risk Officer\"");
    }
}
