//! Built-in incubator protocols.

use super::{AlarmSeeds, EnvironmentProtocol, ProtocolStage};
use crate::environment::Readings;

/// A named protocol shipped with the firmware.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct ProtocolTemplate {
    /// Short lookup key used on the command line.
    pub key: &'static str,
    pub name: &'static str,
    pub stages: &'static [ProtocolStage],
    pub seeds: AlarmSeeds,
}

impl ProtocolTemplate {
    #[must_use]
    pub fn instantiate(&self) -> EnvironmentProtocol {
        EnvironmentProtocol::new(self.name, self.stages, self.seeds)
    }
}

const MAMMALIAN_STAGES: [ProtocolStage; 2] = [
    ProtocolStage::ramped("Pre-heat", Readings::new(37.0, 95.0, 5.0), 1_800, 1_800),
    ProtocolStage::hold("Culture", Readings::new(37.0, 95.0, 5.0), 0),
];

const BACTERIAL_STAGES: [ProtocolStage; 2] = [
    ProtocolStage::ramped("Warm-up", Readings::new(37.0, 60.0, 5.0), 900, 900),
    ProtocolStage::hold("Growth", Readings::new(37.0, 60.0, 5.0), 0),
];

const YEAST_STAGES: [ProtocolStage; 2] = [
    ProtocolStage::ramped("Pre-heat", Readings::new(30.0, 70.0, 0.04), 600, 600),
    ProtocolStage::hold("Culture", Readings::new(30.0, 70.0, 0.04), 0),
];

const DECONTAMINATION_STAGES: [ProtocolStage; 3] = [
    ProtocolStage::ramped("Heat-up", Readings::new(65.0, 50.0, 0.04), 1_800, 1_800),
    ProtocolStage::hold("Decontamination", Readings::new(65.0, 50.0, 0.04), 7_200),
    ProtocolStage::ramped("Cool-down", Readings::new(25.0, 50.0, 0.04), 3_600, 3_600),
];

const EXPRESSION_STAGES: [ProtocolStage; 3] = [
    ProtocolStage::ramped("Initial Growth", Readings::new(30.0, 70.0, 5.0), 86_400, 900),
    ProtocolStage::ramped("Expression Phase", Readings::new(37.0, 70.0, 5.0), 172_800, 1_800),
    ProtocolStage::ramped("Maintenance", Readings::new(25.0, 60.0, 0.04), 0, 1_800),
];

const TEMPLATES: [ProtocolTemplate; 5] = [
    ProtocolTemplate {
        key: "mammalian",
        name: "Mammalian Cell Culture",
        stages: &MAMMALIAN_STAGES,
        seeds: AlarmSeeds::new(38.0, 36.0, 90.0, 5.5, 4.5),
    },
    ProtocolTemplate {
        key: "bacterial",
        name: "Bacterial Growth (E. coli)",
        stages: &BACTERIAL_STAGES,
        seeds: AlarmSeeds::new(39.0, 35.0, 50.0, 6.0, 4.0),
    },
    ProtocolTemplate {
        key: "yeast",
        name: "Yeast Culture",
        stages: &YEAST_STAGES,
        seeds: AlarmSeeds::new(32.0, 28.0, 60.0, 1.0, 0.0),
    },
    ProtocolTemplate {
        key: "decontamination",
        name: "Decontamination Cycle",
        stages: &DECONTAMINATION_STAGES,
        seeds: AlarmSeeds::new(70.0, 20.0, 30.0, 1.0, 0.0),
    },
    ProtocolTemplate {
        key: "expression",
        name: "Multi-Temperature Expression",
        stages: &EXPRESSION_STAGES,
        seeds: AlarmSeeds::new(40.0, 23.0, 55.0, 6.0, 4.0),
    },
];

/// All built-in templates.
#[must_use]
pub const fn templates() -> &'static [ProtocolTemplate] {
    &TEMPLATES
}

/// Finds a template by key or full name (case insensitive).
#[must_use]
pub fn find(name: &str) -> Option<&'static ProtocolTemplate> {
    TEMPLATES.iter().find(|template| {
        template.key.eq_ignore_ascii_case(name) || template.name.eq_ignore_ascii_case(name)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::time::Duration;

    #[test]
    fn lookup_is_case_insensitive() {
        let template = find("Yeast").expect("yeast template");
        assert_eq!(template.name, "Yeast Culture");
        assert!(find("decontamination cycle").is_some());
        assert!(find("plasma").is_none());
    }

    #[test]
    fn decontamination_runs_a_finite_schedule() {
        let protocol = find("decontamination").expect("template").instantiate();
        assert_eq!(protocol.stages.len(), 3);
        assert_eq!(protocol.scheduled_duration(), Duration::from_secs(12_600));
        assert!(protocol.stages.iter().all(|stage| !stage.is_indefinite()));
    }

    #[test]
    fn every_template_ends_or_holds() {
        for template in templates() {
            let protocol = template.instantiate();
            assert!(!protocol.stages.is_empty(), "{} has stages", template.key);
            assert!(template.seeds.temp_high > template.seeds.temp_low);
        }
    }
}
