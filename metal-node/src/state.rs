//! Provisioning and power state vocabulary of the lifecycle API.
//!
//! Remote states are exchanged as strings (`"clean wait"`, `"power on"`).
//! Unknown strings are preserved in `Other` so they can be reported back
//! verbatim.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Remote provisioning state of a node.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ProvisionState {
    // Stable
    Enroll,
    Manageable,
    Available,
    Active,
    /// Not present in the inventory. Never reported by the remote API.
    Absent,

    // Transient
    Verifying,
    Inspecting,
    InspectWait,
    Adopting,
    Cleaning,
    CleanWait,
    Deploying,
    WaitCallBack,
    Deleting,
    Deleted,

    // Failure
    CleanFailed,
    InspectFailed,
    DeployFailed,
    AdoptFailed,
    Error,

    Other(String),
}

impl ProvisionState {
    pub fn as_str(&self) -> &str {
        match self {
            ProvisionState::Enroll => "enroll",
            ProvisionState::Manageable => "manageable",
            ProvisionState::Available => "available",
            ProvisionState::Active => "active",
            ProvisionState::Absent => "absent",
            ProvisionState::Verifying => "verifying",
            ProvisionState::Inspecting => "inspecting",
            ProvisionState::InspectWait => "inspect wait",
            ProvisionState::Adopting => "adopting",
            ProvisionState::Cleaning => "cleaning",
            ProvisionState::CleanWait => "clean wait",
            ProvisionState::Deploying => "deploying",
            ProvisionState::WaitCallBack => "wait call-back",
            ProvisionState::Deleting => "deleting",
            ProvisionState::Deleted => "deleted",
            ProvisionState::CleanFailed => "clean failed",
            ProvisionState::InspectFailed => "inspect failed",
            ProvisionState::DeployFailed => "deploy failed",
            ProvisionState::AdoptFailed => "adopt failed",
            ProvisionState::Error => "error",
            ProvisionState::Other(s) => s,
        }
    }

    /// The last request ended in failure. The remote keeps the target of
    /// that request set until a new one is accepted.
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            ProvisionState::CleanFailed
                | ProvisionState::InspectFailed
                | ProvisionState::DeployFailed
                | ProvisionState::AdoptFailed
                | ProvisionState::Error
        )
    }

    /// Every named state, for exhaustive table tests.
    pub fn known() -> &'static [ProvisionState] {
        &[
            ProvisionState::Enroll,
            ProvisionState::Manageable,
            ProvisionState::Available,
            ProvisionState::Active,
            ProvisionState::Absent,
            ProvisionState::Verifying,
            ProvisionState::Inspecting,
            ProvisionState::InspectWait,
            ProvisionState::Adopting,
            ProvisionState::Cleaning,
            ProvisionState::CleanWait,
            ProvisionState::Deploying,
            ProvisionState::WaitCallBack,
            ProvisionState::Deleting,
            ProvisionState::Deleted,
            ProvisionState::CleanFailed,
            ProvisionState::InspectFailed,
            ProvisionState::DeployFailed,
            ProvisionState::AdoptFailed,
            ProvisionState::Error,
        ]
    }
}

impl From<String> for ProvisionState {
    fn from(s: String) -> Self {
        match s.as_str() {
            "enroll" => ProvisionState::Enroll,
            "manageable" => ProvisionState::Manageable,
            "available" => ProvisionState::Available,
            "active" => ProvisionState::Active,
            "absent" => ProvisionState::Absent,
            "verifying" => ProvisionState::Verifying,
            "inspecting" => ProvisionState::Inspecting,
            "inspect wait" => ProvisionState::InspectWait,
            "adopting" => ProvisionState::Adopting,
            "cleaning" => ProvisionState::Cleaning,
            "clean wait" => ProvisionState::CleanWait,
            "deploying" => ProvisionState::Deploying,
            "wait call-back" => ProvisionState::WaitCallBack,
            "deleting" => ProvisionState::Deleting,
            "deleted" => ProvisionState::Deleted,
            "clean failed" => ProvisionState::CleanFailed,
            "inspect failed" => ProvisionState::InspectFailed,
            "deploy failed" => ProvisionState::DeployFailed,
            "adopt failed" => ProvisionState::AdoptFailed,
            "error" => ProvisionState::Error,
            _ => ProvisionState::Other(s),
        }
    }
}

impl From<ProvisionState> for String {
    fn from(state: ProvisionState) -> Self {
        match state {
            ProvisionState::Other(s) => s,
            other => other.as_str().to_string(),
        }
    }
}

impl fmt::Display for ProvisionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Operator-declared provisioning intent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetProvisionState {
    Manage,
    Provide,
    Active,
    Deleted,
}

impl TargetProvisionState {
    pub const ALL: [TargetProvisionState; 4] = [
        TargetProvisionState::Manage,
        TargetProvisionState::Provide,
        TargetProvisionState::Active,
        TargetProvisionState::Deleted,
    ];

    /// Verb sent to the provisioning endpoint.
    pub fn as_str(&self) -> &'static str {
        match self {
            TargetProvisionState::Manage => "manage",
            TargetProvisionState::Provide => "provide",
            TargetProvisionState::Active => "active",
            TargetProvisionState::Deleted => "deleted",
        }
    }

    /// The stable state this target converges to.
    pub fn destination(&self) -> ProvisionState {
        match self {
            TargetProvisionState::Manage => ProvisionState::Manageable,
            TargetProvisionState::Provide => ProvisionState::Available,
            TargetProvisionState::Active => ProvisionState::Active,
            TargetProvisionState::Deleted => ProvisionState::Absent,
        }
    }
}

impl fmt::Display for TargetProvisionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TargetProvisionState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "manage" | "manageable" => Ok(TargetProvisionState::Manage),
            "provide" | "available" => Ok(TargetProvisionState::Provide),
            "active" | "deploy" => Ok(TargetProvisionState::Active),
            "deleted" | "delete" => Ok(TargetProvisionState::Deleted),
            other => Err(format!(
                "unknown target provision state '{}' (expected manage, provide, active or deleted)",
                other
            )),
        }
    }
}

/// Power state, used both for the reported state and for power targets.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum PowerState {
    PowerOn,
    PowerOff,
    Rebooting,
    SoftPowerOff,
    SoftRebooting,
    Error,
    Other(String),
}

impl PowerState {
    pub fn as_str(&self) -> &str {
        match self {
            PowerState::PowerOn => "power on",
            PowerState::PowerOff => "power off",
            PowerState::Rebooting => "rebooting",
            PowerState::SoftPowerOff => "soft power off",
            PowerState::SoftRebooting => "soft rebooting",
            PowerState::Error => "error",
            PowerState::Other(s) => s,
        }
    }

    /// Whether this value may be requested as a power target.
    pub fn is_settable(&self) -> bool {
        matches!(
            self,
            PowerState::PowerOn
                | PowerState::PowerOff
                | PowerState::Rebooting
                | PowerState::SoftPowerOff
                | PowerState::SoftRebooting
        )
    }

    /// The state the node settles in once the remote clears its target
    /// marker. Reboots are transient and end powered on.
    pub fn settled(&self) -> Option<PowerState> {
        match self {
            PowerState::PowerOn | PowerState::Rebooting | PowerState::SoftRebooting => {
                Some(PowerState::PowerOn)
            }
            PowerState::PowerOff | PowerState::SoftPowerOff => Some(PowerState::PowerOff),
            _ => None,
        }
    }

    /// Reboots always act, even when the node already reports `power on`.
    pub fn is_reboot(&self) -> bool {
        matches!(self, PowerState::Rebooting | PowerState::SoftRebooting)
    }
}

impl From<String> for PowerState {
    fn from(s: String) -> Self {
        match s.as_str() {
            "power on" => PowerState::PowerOn,
            "power off" => PowerState::PowerOff,
            "rebooting" => PowerState::Rebooting,
            "soft power off" => PowerState::SoftPowerOff,
            "soft rebooting" => PowerState::SoftRebooting,
            "error" => PowerState::Error,
            _ => PowerState::Other(s),
        }
    }
}

impl From<PowerState> for String {
    fn from(state: PowerState) -> Self {
        match state {
            PowerState::Other(s) => s,
            other => other.as_str().to_string(),
        }
    }
}

impl fmt::Display for PowerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PowerState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let state = PowerState::from(s.to_string());
        if state.is_settable() {
            Ok(state)
        } else {
            Err(format!(
                "unknown target power state '{}' (expected 'power on', 'power off', 'rebooting', 'soft power off' or 'soft rebooting')",
                s
            ))
        }
    }
}
