use std::fmt;

/// Flow above this rate proves the pump is running, whatever the switch says.
pub const FLOW_EVIDENCE_L_PER_MIN: f64 = 1.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PumpDisplayState {
    Off,
    OnViaSwitch,
    OnViaFlow,
}

impl fmt::Display for PumpDisplayState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PumpDisplayState::Off => write!(f, "OFF"),
            PumpDisplayState::OnViaSwitch => write!(f, "ON (switch)"),
            PumpDisplayState::OnViaFlow => write!(f, "ON (flow)"),
        }
    }
}

/// Flow is trusted over the reported switch bit: a manual switch can read off
/// while flow is still active, and the other way round.
pub fn infer_pump_state(flow_rate_l_per_min: f64, switch_on: bool) -> PumpDisplayState {
    if flow_rate_l_per_min > FLOW_EVIDENCE_L_PER_MIN {
        PumpDisplayState::OnViaFlow
    } else if switch_on {
        PumpDisplayState::OnViaSwitch
    } else {
        PumpDisplayState::Off
    }
}
