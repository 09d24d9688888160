//! PCR program definition and host-side validation.

use core::fmt;
use core::time::Duration;

use heapless::Vec;

/// Lowest and highest block temperatures the instrument will accept.
pub const SAFE_TEMPERATURE_RANGE: (f32, f32) = (4.0, 105.0);

/// Allowed cycle counts.
pub const CYCLE_RANGE: (u16, u16) = (1, 100);

/// Allowed gradient block positions.
pub const GRADIENT_POSITION_RANGE: (u8, u8) = (2, 12);

/// Temperature held for a fixed time.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct PhaseStep {
    pub temperature: f32,
    pub duration: Duration,
}

impl PhaseStep {
    #[must_use]
    pub const fn new(temperature: f32, secs: u64) -> Self {
        Self {
            temperature,
            duration: Duration::from_secs(secs),
        }
    }
}

/// Enzyme activation hold ahead of the initial denature.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct HotStart {
    pub enabled: bool,
    pub activation: PhaseStep,
}

/// Combined anneal/extend step replacing the separate phases.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct TwoStep {
    pub enabled: bool,
    pub anneal_extend: PhaseStep,
}

/// Per-cycle decreasing anneal schedule.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Touchdown {
    pub enabled: bool,
    pub start_temp: f32,
    pub end_temp: f32,
    pub step_size: f32,
    pub touchdown_cycles: u16,
}

/// Spatial anneal spread across the block.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Gradient {
    pub enabled: bool,
    pub temp_low: f32,
    pub temp_high: f32,
    pub positions: u8,
}

/// Program family chosen by the operator, echoed back in status.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ProgramType {
    #[default]
    Standard,
    Gradient,
    Touchdown,
    TwoStep,
}

impl ProgramType {
    const ALL: [ProgramType; 4] = [
        ProgramType::Standard,
        ProgramType::Gradient,
        ProgramType::Touchdown,
        ProgramType::TwoStep,
    ];

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            ProgramType::Standard => "standard",
            ProgramType::Gradient => "gradient",
            ProgramType::Touchdown => "touchdown",
            ProgramType::TwoStep => "twostep",
        }
    }

    /// Case-insensitive lookup by [`ProgramType::name`].
    #[must_use]
    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.name().eq_ignore_ascii_case(name))
    }
}

impl fmt::Display for ProgramType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Complete description of one PCR run. Copied into the cycler at start.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct ThermalProgram {
    pub program_type: ProgramType,
    pub cycles: u16,
    pub initial_denature: PhaseStep,
    pub denature: PhaseStep,
    pub anneal: PhaseStep,
    pub extend: PhaseStep,
    pub final_extend: PhaseStep,
    pub hold_temperature: f32,
    /// Keep holding until stopped instead of completing after the hold is reached.
    pub hold_indefinitely: bool,
    pub hot_start: HotStart,
    pub two_step: TwoStep,
    pub touchdown: Touchdown,
    pub gradient: Gradient,
}

impl Default for ThermalProgram {
    fn default() -> Self {
        Self {
            program_type: ProgramType::Standard,
            cycles: 35,
            initial_denature: PhaseStep::new(95.0, 180),
            denature: PhaseStep::new(95.0, 30),
            anneal: PhaseStep::new(60.0, 30),
            extend: PhaseStep::new(72.0, 60),
            final_extend: PhaseStep::new(72.0, 300),
            hold_temperature: 4.0,
            hold_indefinitely: false,
            hot_start: HotStart {
                enabled: false,
                activation: PhaseStep::new(95.0, 120),
            },
            two_step: TwoStep {
                enabled: false,
                anneal_extend: PhaseStep::new(68.0, 60),
            },
            touchdown: Touchdown {
                enabled: false,
                start_temp: 72.0,
                end_temp: 60.0,
                step_size: 1.0,
                touchdown_cycles: 12,
            },
            gradient: Gradient {
                enabled: false,
                temp_low: 55.0,
                temp_high: 65.0,
                positions: 12,
            },
        }
    }
}

/// Programs that must not be started.
#[derive(Copy, Clone, Debug, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ProgramError {
    CyclesOutOfRange(u16),
    TouchdownNotDescending { start: f32, end: f32 },
    GradientNotAscending { low: f32, high: f32 },
    GradientPositionsOutOfRange(u8),
    TemperatureOutOfRange { step: &'static str, value: f32 },
}

impl fmt::Display for ProgramError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProgramError::CyclesOutOfRange(cycles) => write!(
                f,
                "cycles must be {}-{} (got {cycles})",
                CYCLE_RANGE.0, CYCLE_RANGE.1
            ),
            ProgramError::TouchdownNotDescending { start, end } => write!(
                f,
                "touchdown start {start:.1} must be above end {end:.1}"
            ),
            ProgramError::GradientNotAscending { low, high } => {
                write!(f, "gradient low {low:.1} must be below high {high:.1}")
            }
            ProgramError::GradientPositionsOutOfRange(positions) => write!(
                f,
                "gradient positions must be {}-{} (got {positions})",
                GRADIENT_POSITION_RANGE.0, GRADIENT_POSITION_RANGE.1
            ),
            ProgramError::TemperatureOutOfRange { step, value } => write!(
                f,
                "{step} temperature {value:.1} outside {:.0}-{:.0}",
                SAFE_TEMPERATURE_RANGE.0, SAFE_TEMPERATURE_RANGE.1
            ),
        }
    }
}

/// Unusual but runnable settings.
#[derive(Copy, Clone, Debug, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ProgramWarning {
    DenatureUnusual(f32),
    AnnealUnusual(f32),
    ExtendUnusual(f32),
}

impl fmt::Display for ProgramWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProgramWarning::DenatureUnusual(temp) => {
                write!(f, "denature {temp:.1}C outside typical 90-100C")
            }
            ProgramWarning::AnnealUnusual(temp) => {
                write!(f, "anneal {temp:.1}C outside typical 45-75C")
            }
            ProgramWarning::ExtendUnusual(temp) => {
                write!(f, "extend {temp:.1}C outside typical 68-76C")
            }
        }
    }
}

pub type ProgramWarnings = Vec<ProgramWarning, 3>;

fn outside(value: f32, low: f32, high: f32) -> bool {
    value < low || value > high
}

impl ThermalProgram {
    /// Checks the program against instrument limits.
    ///
    /// Hard errors reject the run; warnings are returned for logging.
    pub fn validate(&self) -> Result<ProgramWarnings, ProgramError> {
        if self.cycles < CYCLE_RANGE.0 || self.cycles > CYCLE_RANGE.1 {
            return Err(ProgramError::CyclesOutOfRange(self.cycles));
        }

        if self.touchdown.enabled && self.touchdown.start_temp <= self.touchdown.end_temp {
            return Err(ProgramError::TouchdownNotDescending {
                start: self.touchdown.start_temp,
                end: self.touchdown.end_temp,
            });
        }

        if self.gradient.enabled {
            if self.gradient.temp_low >= self.gradient.temp_high {
                return Err(ProgramError::GradientNotAscending {
                    low: self.gradient.temp_low,
                    high: self.gradient.temp_high,
                });
            }
            let (min, max) = GRADIENT_POSITION_RANGE;
            if self.gradient.positions < min || self.gradient.positions > max {
                return Err(ProgramError::GradientPositionsOutOfRange(
                    self.gradient.positions,
                ));
            }
        }

        let (low, high) = SAFE_TEMPERATURE_RANGE;
        for (step, value) in self.temperatures() {
            if outside(value, low, high) {
                return Err(ProgramError::TemperatureOutOfRange { step, value });
            }
        }

        let mut warnings = ProgramWarnings::new();
        if outside(self.denature.temperature, 90.0, 100.0) {
            let _ = warnings.push(ProgramWarning::DenatureUnusual(self.denature.temperature));
        }
        if outside(self.anneal.temperature, 45.0, 75.0) {
            let _ = warnings.push(ProgramWarning::AnnealUnusual(self.anneal.temperature));
        }
        if outside(self.extend.temperature, 68.0, 76.0) {
            let _ = warnings.push(ProgramWarning::ExtendUnusual(self.extend.temperature));
        }
        Ok(warnings)
    }

    fn temperatures(&self) -> impl Iterator<Item = (&'static str, f32)> {
        let hot_start = self
            .hot_start
            .enabled
            .then_some(("hot start", self.hot_start.activation.temperature));
        let two_step = self
            .two_step
            .enabled
            .then_some(("anneal/extend", self.two_step.anneal_extend.temperature));
        let touchdown = self.touchdown.enabled.then_some([
            ("touchdown start", self.touchdown.start_temp),
            ("touchdown end", self.touchdown.end_temp),
        ]);
        let gradient = self.gradient.enabled.then_some([
            ("gradient low", self.gradient.temp_low),
            ("gradient high", self.gradient.temp_high),
        ]);

        [
            ("initial denature", self.initial_denature.temperature),
            ("denature", self.denature.temperature),
            ("anneal", self.anneal.temperature),
            ("extend", self.extend.temperature),
            ("final extend", self.final_extend.temperature),
            ("hold", self.hold_temperature),
        ]
        .into_iter()
        .chain(hot_start)
        .chain(two_step)
        .chain(touchdown.into_iter().flatten())
        .chain(gradient.into_iter().flatten())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate_cleanly() {
        let warnings = ThermalProgram::default()
            .validate()
            .expect("default program is valid");
        assert!(warnings.is_empty());
    }

    #[test]
    fn rejects_cycle_counts_outside_range() {
        for cycles in [0, 101] {
            let program = ThermalProgram {
                cycles,
                ..ThermalProgram::default()
            };
            assert_eq!(
                program.validate(),
                Err(ProgramError::CyclesOutOfRange(cycles))
            );
        }
    }

    #[test]
    fn rejects_inverted_touchdown_and_gradient() {
        let mut program = ThermalProgram::default();
        program.touchdown.enabled = true;
        program.touchdown.start_temp = 58.0;
        assert!(matches!(
            program.validate(),
            Err(ProgramError::TouchdownNotDescending { .. })
        ));

        let mut program = ThermalProgram::default();
        program.gradient.enabled = true;
        program.gradient.positions = 1;
        assert_eq!(
            program.validate(),
            Err(ProgramError::GradientPositionsOutOfRange(1))
        );
        program.gradient.positions = 8;
        program.gradient.temp_low = 70.0;
        assert!(matches!(
            program.validate(),
            Err(ProgramError::GradientNotAscending { .. })
        ));
    }

    #[test]
    fn disabled_variants_are_not_checked() {
        let mut program = ThermalProgram::default();
        program.gradient.temp_low = 90.0;
        program.touchdown.end_temp = 99.0;
        assert!(program.validate().is_ok());
    }

    #[test]
    fn rejects_unsafe_temperatures() {
        let program = ThermalProgram {
            hold_temperature: 2.0,
            ..ThermalProgram::default()
        };
        assert!(matches!(
            program.validate(),
            Err(ProgramError::TemperatureOutOfRange { step: "hold", .. })
        ));
    }

    #[test]
    fn warns_about_unusual_temperatures() {
        let mut program = ThermalProgram::default();
        program.denature.temperature = 88.0;
        program.extend.temperature = 80.0;
        let warnings = program.validate().expect("warnings only");
        assert_eq!(
            warnings.as_slice(),
            &[
                ProgramWarning::DenatureUnusual(88.0),
                ProgramWarning::ExtendUnusual(80.0)
            ]
        );
    }
}
