use core::time::Duration;

use instrument_core::environment::{NoopPlant, Readings};
use instrument_core::protocol::{
    AlarmSeeds, EnvironmentProtocol, ProtocolSequencer, ProtocolStage, SequencerEvent,
    SequencerState,
};
use instrument_core::ramp::ParameterRamp;
use instrument_core::timing::Millis;

const CULTURE: Readings = Readings::new(37.0, 95.0, 5.0);
const STORAGE: Readings = Readings::new(4.0, 50.0, 0.04);

fn protocol(stages: &[ProtocolStage]) -> EnvironmentProtocol {
    EnvironmentProtocol::new("integration", stages, AlarmSeeds::default())
}

#[test]
fn indefinite_first_stage_waits_for_next_stage() {
    let mut plant = NoopPlant::new();
    let mut sequencer = ProtocolSequencer::new();
    sequencer
        .start(
            protocol(&[
                ProtocolStage::hold("Culture", CULTURE, 0),
                ProtocolStage::hold("Storage", STORAGE, 60),
            ]),
            Millis::ZERO,
            &mut plant,
        )
        .expect("protocol starts");

    for hours in [1, 24, 24 * 30] {
        let now = Millis::from_secs(hours * 3_600);
        assert!(sequencer.update(now, &mut plant).is_empty());
        assert_eq!(sequencer.current_stage_index(), 0);
        assert_eq!(sequencer.stage_time_remaining(now), None);
    }
    assert!(sequencer.progress(Millis::from_secs(3_600)).abs() < f32::EPSILON);

    let later = Millis::from_secs(24 * 30 * 3_600 + 1);
    match sequencer.next_stage(later, &mut plant) {
        Some(SequencerEvent::StageEntered { index: 1, name, .. }) => assert_eq!(name, "Storage"),
        other => panic!("expected stage 2, got {other:?}"),
    }
    assert_eq!(plant.commanded(0), Some(4.0));
    assert!((sequencer.progress(later) - 50.0).abs() < 1e-3);
}

#[test]
fn progress_counts_completed_stages_and_current_fraction() {
    let mut plant = NoopPlant::new();
    let mut sequencer = ProtocolSequencer::new();
    sequencer
        .start(
            protocol(&[
                ProtocolStage::hold("A", CULTURE, 100),
                ProtocolStage::hold("B", CULTURE, 100),
                ProtocolStage::hold("C", CULTURE, 100),
                ProtocolStage::hold("D", CULTURE, 100),
            ]),
            Millis::ZERO,
            &mut plant,
        )
        .expect("protocol starts");

    assert!((sequencer.progress(Millis::from_secs(50)) - 12.5).abs() < 1e-3);
    sequencer.update(Millis::from_secs(100), &mut plant);
    assert_eq!(sequencer.current_stage_index(), 1);
    assert!((sequencer.progress(Millis::from_secs(150)) - 37.5).abs() < 1e-3);
}

#[test]
fn last_stage_completes_the_protocol() {
    let mut plant = NoopPlant::new();
    let mut sequencer = ProtocolSequencer::new();
    sequencer
        .start(
            protocol(&[ProtocolStage::hold("Only", CULTURE, 10)]),
            Millis::ZERO,
            &mut plant,
        )
        .expect("protocol starts");

    let events = sequencer.update(Millis::from_secs(10), &mut plant);
    assert_eq!(events.as_slice(), &[SequencerEvent::ProtocolComplete]);
    assert_eq!(sequencer.state(), SequencerState::Complete);
    assert!((sequencer.progress(Millis::from_secs(10)) - 100.0).abs() < f32::EPSILON);
    assert!(sequencer.next_stage(Millis::from_secs(11), &mut plant).is_none());
}

#[test]
fn pause_holds_stage_time_until_resume() {
    let mut plant = NoopPlant::new();
    let mut sequencer = ProtocolSequencer::new();
    sequencer
        .start(
            protocol(&[
                ProtocolStage::hold("A", CULTURE, 60),
                ProtocolStage::hold("B", STORAGE, 60),
            ]),
            Millis::ZERO,
            &mut plant,
        )
        .expect("protocol starts");

    assert!(sequencer.pause(Millis::from_secs(30)));
    assert!(sequencer.update(Millis::from_secs(120), &mut plant).is_empty());
    assert!(sequencer.resume(Millis::from_secs(130)));
    assert!(!sequencer.resume(Millis::from_secs(131)));

    assert!(sequencer.update(Millis::from_secs(159), &mut plant).is_empty());
    let events = sequencer.update(Millis::from_secs(160), &mut plant);
    assert!(matches!(
        events.first(),
        Some(SequencerEvent::StageEntered { index: 1, .. })
    ));
}

#[test]
fn ramp_always_lands_exactly_on_target() {
    let cases = [
        (20.0_f32, 37.0_f32, 1_u64),
        (37.0, 4.0, 999),
        (0.04, 5.0, 1_800_000),
        (95.0, 50.0, 7),
        (-3.3, 101.7, 123_457),
    ];
    for (start, target, duration_ms) in cases {
        let mut ramp = ParameterRamp::new();
        let started = Millis(5_000);
        ramp.start(start, target, Duration::from_millis(duration_ms), started);

        let landed = Millis(started.0 + duration_ms);
        assert!(ramp.is_complete(landed));
        assert_eq!(ramp.current_target(landed).to_bits(), target.to_bits());
        assert_eq!(
            ramp.current_target(Millis(landed.0 + 10_000)).to_bits(),
            target.to_bits()
        );

        let midway = ramp.current_target(Millis(started.0 + duration_ms / 2));
        let (low, high) = if start < target {
            (start, target)
        } else {
            (target, start)
        };
        assert!(midway >= low && midway <= high, "ramp overshot: {midway}");
    }
}

#[test]
fn stopped_ramp_reports_its_target() {
    let mut ramp = ParameterRamp::new();
    ramp.start(10.0, 20.0, Duration::from_secs(100), Millis::ZERO);
    assert!((ramp.current_target(Millis::from_secs(50)) - 15.0).abs() < 1e-4);
    ramp.stop();
    assert!(!ramp.is_active());
    assert_eq!(ramp.current_target(Millis::from_secs(50)).to_bits(), 20.0_f32.to_bits());
}
