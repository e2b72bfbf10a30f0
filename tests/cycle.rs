mod common;

use std::fs;
use std::path::Path;
use std::time::Duration;

use common::{encoded_marker, init_tracing, Fault, ManualClock, Op, ScriptedCore, StubSurfaces};
use tempfile::TempDir;
use visicam::capture::FrameGeometry;
use visicam::component::{ports, ComponentKind, RenderTarget};
use visicam::homography::{HomographyMatrix, ReloadOutcome};
use visicam::output::OutputKind;
use visicam::pipeline::buffer::{request_empty, request_fill};
use visicam::pipeline::{
    CyclePaths, FrameCycleController, PipelineGraphBuilder, PipelineSession, SurfaceSource,
};
use visicam::{Config, PipelineError};

const HD: FrameGeometry = FrameGeometry {
    width: 1280,
    height: 720,
};

struct Rig {
    core: ScriptedCore,
    session: PipelineSession,
    clock: ManualClock,
    controller: FrameCycleController<ManualClock, StubSurfaces>,
    dir: TempDir,
}

impl Rig {
    fn new(refresh: Duration) -> Self {
        init_tracing();
        let core = ScriptedCore::new();
        let config = Config::default();
        let session = PipelineGraphBuilder::new(&core, &config, HD)
            .build(RenderTarget(1))
            .unwrap();
        let dir = tempfile::tempdir().unwrap();
        let paths = CyclePaths {
            homography: dir.path().join("homography.txt"),
            processed: dir.path().join("processed.jpg"),
            captured: dir.path().join("captured.jpg"),
        };
        let clock = ManualClock::new();
        let controller =
            FrameCycleController::new(refresh, paths, clock.clone(), StubSurfaces::default())
                .with_cycle_rate(0);
        Self {
            core,
            session,
            clock,
            controller,
            dir,
        }
    }

    fn path(&self, name: &str) -> std::path::PathBuf {
        self.dir.path().join(name)
    }

    fn write_homography(&self, lines: &[&str]) {
        let mut text = lines.join("\n");
        text.push('\n');
        fs::write(self.path("homography.txt"), text).unwrap();
    }
}

fn read(path: &Path) -> Option<Vec<u8>> {
    fs::read(path).ok()
}

#[test]
fn refresh_cadence_alternates_output_paths() {
    let mut rig = Rig::new(Duration::from_secs(5));

    // t = 0: the first cycle always refreshes.
    let first = rig.controller.cycle(&mut rig.session).unwrap();
    assert!(first.refreshed);
    assert_eq!(first.source, SurfaceSource::Unmodified);
    assert_eq!(first.persisted, Some(OutputKind::Captured));
    assert_eq!(read(&rig.path("captured.jpg")), Some(encoded_marker(0)));
    assert_eq!(read(&rig.path("processed.jpg")), None);

    // t = 4 s
    rig.clock.advance(Duration::from_secs(4));
    let second = rig.controller.cycle(&mut rig.session).unwrap();
    assert!(!second.refreshed);
    assert_eq!(second.source, SurfaceSource::Corrected);
    assert_eq!(second.persisted, Some(OutputKind::Processed));
    assert_eq!(read(&rig.path("processed.jpg")), Some(encoded_marker(1)));
    assert_eq!(read(&rig.path("captured.jpg")), Some(encoded_marker(0)));

    // t = 5.2 s
    rig.clock.advance(Duration::from_millis(1_200));
    let third = rig.controller.cycle(&mut rig.session).unwrap();
    assert!(third.refreshed);
    assert_eq!(third.persisted, Some(OutputKind::Captured));
    assert_eq!(read(&rig.path("captured.jpg")), Some(encoded_marker(2)));
    assert_eq!(read(&rig.path("processed.jpg")), Some(encoded_marker(1)));

    let surfaces = rig.controller.surfaces();
    assert_eq!(
        surfaces.reads,
        vec![
            SurfaceSource::Unmodified,
            SurfaceSource::Corrected,
            SurfaceSource::Unmodified
        ]
    );
    assert_eq!(surfaces.composites.len(), 3);
    assert_eq!(rig.controller.cycles(), 3);
}

#[test]
fn encoder_fill_precedes_empty_every_cycle() {
    let mut rig = Rig::new(Duration::from_secs(5));
    let built = rig.core.calls().len();
    for _ in 0..3 {
        rig.controller.cycle(&mut rig.session).unwrap();
    }

    let cycle_ops: Vec<(ComponentKind, Op)> = rig.core.calls()[built..]
        .iter()
        .map(|c| (c.component, c.op.clone()))
        .collect();
    let one_cycle = [
        (ComponentKind::Compositor, Op::Fill(ports::COMPOSITOR_OUTPUT)),
        (ComponentKind::Encoder, Op::Fill(ports::ENCODER_OUTPUT)),
        (ComponentKind::Encoder, Op::Empty(ports::ENCODER_INPUT)),
    ];
    let expected: Vec<_> = one_cycle.iter().cloned().cycle().take(9).collect();
    assert_eq!(cycle_ops, expected);

    // Buffers are back with the control thread between cycles.
    assert!(!rig.session.buffers.encoder_input.lock().in_flight());
    assert!(!rig.session.buffers.encoder_output.lock().in_flight());
    assert!(!rig.session.buffers.compositor_output.lock().in_flight());
}

#[test]
fn encoder_input_holds_the_readback_at_full_length() {
    let mut rig = Rig::new(Duration::from_secs(5));
    rig.controller.cycle(&mut rig.session).unwrap();
    rig.clock.advance(Duration::from_secs(1));
    rig.controller.cycle(&mut rig.session).unwrap();

    let input = rig.session.buffers.encoder_input.lock();
    assert_eq!(input.filled_len(), input.capacity());
    assert!(input.valid_bytes().iter().all(|&b| b == 0xC0));
}

#[test]
fn identity_file_resets_previous_homography() {
    let mut rig = Rig::new(Duration::from_secs(5));
    rig.write_homography(&["2", "0", "10", "0", "2", "20", "0", "0", "1"]);
    let report = rig.controller.cycle(&mut rig.session).unwrap();
    assert_eq!(report.reload, Some(ReloadOutcome::Replaced));
    let scaled = HomographyMatrix::new([2.0, 0.0, 10.0, 0.0, 2.0, 20.0, 0.0, 0.0, 1.0]).unwrap();
    assert_eq!(rig.controller.homography().matrix(), scaled);
    assert_eq!(rig.controller.surfaces().composites[0], scaled.to_transform());

    rig.write_homography(&["1", "0", "0", "0", "1", "0", "0", "0", "1"]);
    rig.clock.advance(Duration::from_secs(5));
    let report = rig.controller.cycle(&mut rig.session).unwrap();
    assert_eq!(report.reload, Some(ReloadOutcome::Replaced));
    assert_eq!(rig.controller.homography().matrix(), HomographyMatrix::IDENTITY);
    assert_eq!(
        rig.controller.surfaces().composites[1],
        HomographyMatrix::IDENTITY.to_transform()
    );
}

#[test]
fn short_homography_file_keeps_previous_matrix() {
    let mut rig = Rig::new(Duration::from_secs(5));
    rig.write_homography(&["1", "0.1", "3", "0", "1", "4", "0", "0.001", "1"]);
    rig.controller.cycle(&mut rig.session).unwrap();
    let loaded = rig.controller.homography().matrix();
    assert_ne!(loaded, HomographyMatrix::IDENTITY);

    rig.write_homography(&["1", "0", "0", "0", "1", "0", "0"]);
    rig.clock.advance(Duration::from_secs(5));
    let report = rig.controller.cycle(&mut rig.session).unwrap();
    assert_eq!(report.reload, Some(ReloadOutcome::WrongLineCount(7)));
    assert_eq!(rig.controller.homography().matrix(), loaded);
}

#[test]
fn reload_happens_only_on_refresh_cycles() {
    let mut rig = Rig::new(Duration::from_secs(5));
    rig.controller.cycle(&mut rig.session).unwrap();

    rig.write_homography(&["1", "0", "5", "0", "1", "0", "0", "0", "1"]);
    rig.clock.advance(Duration::from_secs(2));
    let report = rig.controller.cycle(&mut rig.session).unwrap();
    assert_eq!(report.reload, None);
    assert_eq!(rig.controller.homography().matrix(), HomographyMatrix::IDENTITY);

    rig.clock.advance(Duration::from_secs(3));
    let report = rig.controller.cycle(&mut rig.session).unwrap();
    assert_eq!(report.reload, Some(ReloadOutcome::Replaced));
}

#[test]
fn missing_homography_file_is_not_an_error() {
    let mut rig = Rig::new(Duration::from_secs(1));
    let report = rig.controller.cycle(&mut rig.session).unwrap();
    assert_eq!(report.reload, Some(ReloadOutcome::Missing));
    assert_eq!(rig.controller.homography().matrix(), HomographyMatrix::IDENTITY);
}

#[test]
fn unwritable_output_is_skipped() {
    let mut rig = Rig::new(Duration::from_secs(5));
    // A directory in place of the captured file makes the write fail.
    fs::create_dir(rig.path("captured.jpg")).unwrap();
    let report = rig.controller.cycle(&mut rig.session).unwrap();
    assert_eq!(report.persisted, None);
    assert_eq!(report.encoded_len, encoded_marker(0).len());

    rig.clock.advance(Duration::from_secs(1));
    let report = rig.controller.cycle(&mut rig.session).unwrap();
    assert_eq!(report.persisted, Some(OutputKind::Processed));
}

#[test]
fn encoder_error_stops_the_run() {
    let mut rig = Rig::new(Duration::from_secs(5));
    rig.core.inject(Fault::Fill(ComponentKind::Encoder, 2));

    let err = rig
        .controller
        .run(&mut rig.session, Some(10))
        .unwrap_err();
    assert!(matches!(
        err,
        PipelineError::ErrorEvent {
            component: ComponentKind::Encoder,
            ..
        }
    ));
    assert_eq!(rig.controller.cycles(), 2);
    assert_eq!(read(&rig.path("captured.jpg")), Some(encoded_marker(0)));
    assert_eq!(read(&rig.path("processed.jpg")), Some(encoded_marker(1)));
}

#[test]
fn compositor_error_stops_the_run() {
    let mut rig = Rig::new(Duration::from_secs(5));
    rig.core.inject(Fault::Fill(ComponentKind::Compositor, 1));
    let built = rig.core.calls().len();

    let err = rig
        .controller
        .run(&mut rig.session, Some(10))
        .unwrap_err();
    assert!(matches!(
        err,
        PipelineError::ErrorEvent {
            component: ComponentKind::Compositor,
            ..
        }
    ));
    assert_eq!(rig.controller.cycles(), 1);
    assert_eq!(read(&rig.path("captured.jpg")), Some(encoded_marker(0)));
    assert_eq!(read(&rig.path("processed.jpg")), None);

    // Nothing reached the encoder after the failed fill.
    let after: Vec<Op> = rig.core.calls()[built..]
        .iter()
        .skip(3)
        .map(|c| c.op.clone())
        .collect();
    assert_eq!(after, vec![Op::Fill(ports::COMPOSITOR_OUTPUT)]);
}

#[test]
fn encoder_empty_error_stops_the_run() {
    let mut rig = Rig::new(Duration::from_secs(5));
    rig.core.inject(Fault::Empty(ComponentKind::Encoder, 1));

    let err = rig
        .controller
        .run(&mut rig.session, Some(10))
        .unwrap_err();
    assert!(matches!(
        err,
        PipelineError::ErrorEvent {
            component: ComponentKind::Encoder,
            ..
        }
    ));
    assert_eq!(rig.controller.cycles(), 1);
    assert_eq!(read(&rig.path("captured.jpg")), Some(encoded_marker(0)));
    assert_eq!(read(&rig.path("processed.jpg")), None);
}

#[test]
fn empty_encode_keeps_unmodified_capture_pending() {
    let mut rig = Rig::new(Duration::from_secs(5));
    rig.core.blank_encode(0);

    let first = rig.controller.cycle(&mut rig.session).unwrap();
    assert!(first.refreshed);
    assert_eq!(first.encoded_len, 0);
    assert_eq!(first.persisted, None);

    // Not a refresh cycle, but the unmodified frame is still owed.
    rig.clock.advance(Duration::from_secs(1));
    let second = rig.controller.cycle(&mut rig.session).unwrap();
    assert!(!second.refreshed);
    assert_eq!(second.source, SurfaceSource::Unmodified);
    assert_eq!(second.persisted, Some(OutputKind::Captured));
    assert_eq!(read(&rig.path("captured.jpg")), Some(encoded_marker(1)));
    assert_eq!(read(&rig.path("processed.jpg")), None);

    rig.clock.advance(Duration::from_secs(1));
    let third = rig.controller.cycle(&mut rig.session).unwrap();
    assert_eq!(third.source, SurfaceSource::Corrected);
    assert_eq!(third.persisted, Some(OutputKind::Processed));
}

#[test]
fn second_request_on_in_flight_buffer_is_rejected() {
    let mut rig = Rig::new(Duration::from_secs(5));
    let output = rig.session.buffers.encoder_output.clone();

    // The scripted encoder holds its output until an input arrives.
    request_fill(&mut rig.session.encoder, &output).unwrap();
    assert!(output.lock().in_flight());

    let err = request_fill(&mut rig.session.encoder, &output).unwrap_err();
    assert!(matches!(
        err,
        PipelineError::BufferInFlight {
            port: ports::ENCODER_OUTPUT,
            ..
        }
    ));
    let err = request_empty(&mut rig.session.encoder, &output, 0).unwrap_err();
    assert!(matches!(err, PipelineError::BufferInFlight { .. }));

    let submitted = rig
        .core
        .calls_for(ComponentKind::Encoder)
        .into_iter()
        .filter(|c| matches!(c.op, Op::Fill(_) | Op::Empty(_)))
        .count();
    assert_eq!(submitted, 1);
    assert!(output.lock().in_flight());
}

#[test]
fn oversized_empty_is_rejected_before_submission() {
    let mut rig = Rig::new(Duration::from_secs(5));
    let input = rig.session.buffers.encoder_input.clone();
    let capacity = input.lock().capacity();

    let err = request_empty(&mut rig.session.encoder, &input, capacity + 1).unwrap_err();
    assert!(matches!(
        err,
        PipelineError::BufferOverrun { length, .. } if length == capacity + 1
    ));
    assert!(!input.lock().in_flight());
    assert!(rig
        .core
        .calls_for(ComponentKind::Encoder)
        .iter()
        .all(|c| !matches!(c.op, Op::Empty(_))));
}

#[test]
fn run_stops_after_max_cycles() {
    let mut rig = Rig::new(Duration::from_secs(5));
    let completed = rig.controller.run(&mut rig.session, Some(4)).unwrap();
    assert_eq!(completed, 4);
    assert_eq!(rig.controller.cycles(), 4);
    assert_eq!(read(&rig.path("processed.jpg")), Some(encoded_marker(3)));
}
