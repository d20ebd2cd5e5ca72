use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    GenerateResponse,
    FindReferral,
    DispatchEmergency,
}

impl Capability {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::GenerateResponse => "generate_response",
            Self::FindReferral => "find_referral",
            Self::DispatchEmergency => "dispatch_emergency",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "generate_response" => Some(Self::GenerateResponse),
            "find_referral" => Some(Self::FindReferral),
            "dispatch_emergency" => Some(Self::DispatchEmergency),
            _ => None,
        }
    }
}

/// Strongest self-harm cue found in a message.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RiskSignal {
    pub score: f32,
    pub matched: String,
}

/// One routing outcome per turn, resolved exhaustively by every consumer.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum RoutingDecision {
    Respond,
    Refer { location: String },
    Escalate { signal: RiskSignal },
}

impl RoutingDecision {
    pub fn capability(&self) -> Capability {
        match self {
            Self::Respond => Capability::GenerateResponse,
            Self::Refer { .. } => Capability::FindReferral,
            Self::Escalate { .. } => Capability::DispatchEmergency,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferralEntry {
    pub name: String,
    pub specialty: String,
    pub contact: String,
    pub location: String,
}

#[cfg(test)]
mod tests {
    use super::{Capability, RiskSignal, RoutingDecision};

    #[test]
    fn capability_round_trips_from_storage_encoding() {
        let cases = [
            Capability::GenerateResponse,
            Capability::FindReferral,
            Capability::DispatchEmergency,
        ];

        for capability in cases {
            assert_eq!(Capability::parse(capability.as_str()), Some(capability));
        }
    }

    #[test]
    fn decisions_map_to_their_capability() {
        assert_eq!(RoutingDecision::Respond.capability(), Capability::GenerateResponse);
        assert_eq!(
            RoutingDecision::Refer { location: "Berlin".to_string() }.capability(),
            Capability::FindReferral
        );
        assert_eq!(
            RoutingDecision::Escalate {
                signal: RiskSignal { score: 1.0, matched: "end my life".to_string() }
            }
            .capability(),
            Capability::DispatchEmergency
        );
    }
}
