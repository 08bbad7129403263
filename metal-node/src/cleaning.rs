//! Manual cleaning steps.
//!
//! Builds the clean steps for a manual `clean` action out of a RAID
//! configuration and a list of BIOS settings, both given as JSON text.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::error::{Error, Result};

/// RAID interface value that disables RAID support on a node.
pub const NO_RAID_INTERFACE: &str = "no-raid";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CleanStep {
    pub interface: String,
    pub step: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub args: Option<Map<String, Value>>,
}

impl CleanStep {
    fn new(interface: &str, step: &str) -> Self {
        Self {
            interface: interface.to_string(),
            step: step.to_string(),
            args: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BiosSetting {
    pub name: String,
    pub value: String,
}

/// Steps for one manual clean, plus the RAID layout that must be set as
/// the node's target before `create_configuration` runs.
#[derive(Debug, Clone, PartialEq)]
pub struct CleaningPlan {
    pub steps: Vec<CleanStep>,
    pub target_raid_config: Option<Value>,
}

/// Build manual clean steps. Returns `None` when there is nothing to clean.
pub fn build_manual_cleaning_steps(
    raid_interface: &str,
    raid_config: &str,
    bios_settings: &str,
) -> Result<Option<CleaningPlan>> {
    let mut steps = Vec::new();
    let mut target_raid_config = None;

    if !raid_config.trim().is_empty() {
        if raid_interface == NO_RAID_INTERFACE {
            return Err(Error::Validation(format!(
                "raid configuration given but raid interface is '{}'",
                NO_RAID_INTERFACE
            )));
        }
        let config: Value = serde_json::from_str(raid_config)
            .map_err(|e| Error::Validation(format!("invalid raid configuration: {}", e)))?;
        if !config.is_object() {
            return Err(Error::Validation(
                "raid configuration must be a JSON object".to_string(),
            ));
        }
        steps.push(CleanStep::new("raid", "delete_configuration"));
        steps.push(CleanStep::new("raid", "create_configuration"));
        target_raid_config = Some(config);
    }

    if !bios_settings.trim().is_empty() {
        let settings: Vec<BiosSetting> = serde_json::from_str(bios_settings)
            .map_err(|e| Error::Validation(format!("invalid bios settings: {}", e)))?;
        let mut args = Map::new();
        args.insert("settings".to_string(), json!(settings));
        steps.push(CleanStep {
            interface: "bios".to_string(),
            step: "apply_configuration".to_string(),
            args: Some(args),
        });
    }

    if steps.is_empty() {
        return Ok(None);
    }

    Ok(Some(CleaningPlan {
        steps,
        target_raid_config,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    const RAID: &str =
        r#"{"hardwareRAIDVolumes":[{"level":"0","name":"raid0"}],"softwareRAIDVolumes":null}"#;
    const BIOS: &str = r#"[{"name":"cpu_vt_enabled","value":"False"},{"name":"hyper_threading_enabled","value":"True"}]"#;

    fn bios_step() -> CleanStep {
        let mut args = Map::new();
        args.insert(
            "settings".to_string(),
            json!([
                {"name": "cpu_vt_enabled", "value": "False"},
                {"name": "hyper_threading_enabled", "value": "True"}
            ]),
        );
        CleanStep {
            interface: "bios".to_string(),
            step: "apply_configuration".to_string(),
            args: Some(args),
        }
    }

    fn raid_steps() -> Vec<CleanStep> {
        vec![
            CleanStep::new("raid", "delete_configuration"),
            CleanStep::new("raid", "create_configuration"),
        ]
    }

    #[test]
    fn test_no_raid_and_no_bios() {
        assert_eq!(build_manual_cleaning_steps("no-raid", "", "").unwrap(), None);
    }

    #[test]
    fn test_just_raid() {
        let plan = build_manual_cleaning_steps("irmc", RAID, "").unwrap().unwrap();
        assert_eq!(plan.steps, raid_steps());
        assert_eq!(
            plan.target_raid_config.unwrap()["hardwareRAIDVolumes"][0]["name"],
            "raid0"
        );
    }

    #[test]
    fn test_just_bios() {
        let plan = build_manual_cleaning_steps("irmc", "", BIOS).unwrap().unwrap();
        assert_eq!(plan.steps, vec![bios_step()]);
        assert!(plan.target_raid_config.is_none());
    }

    #[test]
    fn test_raid_and_bios() {
        let plan = build_manual_cleaning_steps("irmc", RAID, BIOS).unwrap().unwrap();
        let mut expected = raid_steps();
        expected.push(bios_step());
        assert_eq!(plan.steps, expected);
    }

    #[test]
    fn test_invalid_input() {
        assert!(matches!(
            build_manual_cleaning_steps("no-raid", RAID, ""),
            Err(Error::Validation(_))
        ));
        assert!(matches!(
            build_manual_cleaning_steps("irmc", "[1, 2]", ""),
            Err(Error::Validation(_))
        ));
        assert!(matches!(
            build_manual_cleaning_steps("irmc", "", "{\"name\": 1}"),
            Err(Error::Validation(_))
        ));
    }

    #[test]
    fn test_step_serialization() {
        let body = serde_json::to_value(CleanStep::new("raid", "delete_configuration")).unwrap();
        assert_eq!(
            body,
            json!({"interface": "raid", "step": "delete_configuration"})
        );
    }
}
