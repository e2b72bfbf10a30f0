//! Steady-state frame cycle: refresh check, next frame, readback, encode, persist, composite

use std::path::PathBuf;
use std::time::{Duration, Instant};

use tracing::{debug, info, instrument, trace, warn};

use crate::homography::{HomographyStore, ReloadOutcome};
use crate::output::{self, OutputKind};
use crate::pipeline::buffer::{await_empty, await_fill, request_empty, request_fill};
use crate::pipeline::graph::PipelineSession;
use crate::pipeline::surface::{RenderSurfaces, SurfaceSource};
use crate::PipelineError;

/// Monotonic time source for the refresh cadence.
pub trait Clock: Send {
    fn now(&self) -> Instant;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Due when it never fired or a full interval has elapsed since it last did.
#[derive(Debug, Clone)]
pub struct RefreshTimer {
    interval: Duration,
    last: Option<Instant>,
}

impl RefreshTimer {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last: None,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn last_refresh(&self) -> Option<Instant> {
        self.last
    }

    pub fn is_due(&self, now: Instant) -> bool {
        match self.last {
            None => true,
            Some(last) => now.saturating_duration_since(last) >= self.interval,
        }
    }

    /// Fire if due, restarting the interval at `now`.
    pub fn poll(&mut self, now: Instant) -> bool {
        if !self.is_due(now) {
            return false;
        }
        self.last = Some(now);
        true
    }
}

/// Files the controller reads and writes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CyclePaths {
    pub homography: PathBuf,
    pub processed: PathBuf,
    pub captured: PathBuf,
}

/// What a single cycle did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleReport {
    pub sequence: u64,
    pub refreshed: bool,
    /// Outcome of the homography reload on refresh cycles; `None` when the
    /// reload failed or the cycle did not refresh.
    pub reload: Option<ReloadOutcome>,
    pub source: SurfaceSource,
    pub encoded_len: usize,
    pub persisted: Option<OutputKind>,
}

/// Runs the per-frame protocol against a built [`PipelineSession`].
pub struct FrameCycleController<C: Clock, S: RenderSurfaces> {
    timer: RefreshTimer,
    homography: HomographyStore,
    paths: CyclePaths,
    clock: C,
    surfaces: S,
    emit_unmodified: bool,
    period: Option<Duration>,
    cycles: u64,
}

impl<C: Clock, S: RenderSurfaces> FrameCycleController<C, S> {
    pub fn new(refresh: Duration, paths: CyclePaths, clock: C, surfaces: S) -> Self {
        Self {
            timer: RefreshTimer::new(refresh),
            homography: HomographyStore::default(),
            paths,
            clock,
            surfaces,
            emit_unmodified: false,
            period: None,
            cycles: 0,
        }
    }

    /// Pace [`run`](Self::run) to at most `rate` cycles per second; 0 disables pacing.
    pub fn with_cycle_rate(mut self, rate: u32) -> Self {
        self.period = (rate > 0).then(|| Duration::from_secs(1) / rate);
        self
    }

    pub fn homography(&self) -> &HomographyStore {
        &self.homography
    }

    pub fn surfaces(&self) -> &S {
        &self.surfaces
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    pub fn timer(&self) -> &RefreshTimer {
        &self.timer
    }

    pub fn cycles(&self) -> u64 {
        self.cycles
    }

    /// One pass of the frame protocol.
    ///
    /// The corrected surface read here was composited at the end of the
    /// previous cycle, so processed output lags the sensor by one cycle.
    #[instrument(skip_all, fields(cycle = self.cycles))]
    pub fn cycle(&mut self, session: &mut PipelineSession) -> Result<CycleReport, PipelineError> {
        let started = Instant::now();

        // Timer check
        let now = self.clock.now();
        let refreshed = self.timer.poll(now);
        let mut reload = None;
        if refreshed {
            self.emit_unmodified = true;
            reload = self.reload_homography();
        }

        // Next frame into the compositor's texture
        request_fill(&mut session.compositor, &session.buffers.compositor_output)?;
        await_fill(&session.compositor)?;

        // Readback
        let source = if self.emit_unmodified {
            SurfaceSource::Unmodified
        } else {
            SurfaceSource::Corrected
        };
        self.read_back(session, source)?;

        // Encode
        let encode_started = Instant::now();
        let capacity = session.buffers.encoder_input.lock().capacity();
        request_fill(&mut session.encoder, &session.buffers.encoder_output)?;
        request_empty(&mut session.encoder, &session.buffers.encoder_input, capacity)?;
        await_empty(&session.encoder)?;
        await_fill(&session.encoder)?;
        metrics::histogram!("encode_time_us").record(encode_started.elapsed().as_micros() as f64);

        // Persist
        let kind = if self.emit_unmodified {
            OutputKind::Captured
        } else {
            OutputKind::Processed
        };
        let (encoded_len, persisted) = {
            let output = session.buffers.encoder_output.lock();
            let bytes = output.valid_bytes();
            if bytes.is_empty() {
                // A pending unmodified capture carries over to the next cycle.
                debug!("encoder produced no output");
                (0, None)
            } else {
                self.emit_unmodified = false;
                let persisted = output::persist(self.path_for(kind), kind, bytes).then(|| {
                    metrics::counter!("frames_persisted", "kind" => kind.label()).increment(1);
                    kind
                });
                (bytes.len(), persisted)
            }
        };

        // Composite for the next cycle's corrected readback
        let transform = self.homography.transform();
        self.surfaces.composite(&transform)?;

        let report = CycleReport {
            sequence: self.cycles,
            refreshed,
            reload,
            source,
            encoded_len,
            persisted,
        };
        self.cycles += 1;
        metrics::histogram!("cycle_time_us").record(started.elapsed().as_micros() as f64);
        trace!(?report, "cycle done");
        Ok(report)
    }

    /// Cycle until `max_cycles` have run or a fatal error occurs.
    ///
    /// Returns the number of cycles completed by this call.
    pub fn run(
        &mut self,
        session: &mut PipelineSession,
        max_cycles: Option<u64>,
    ) -> Result<u64, PipelineError> {
        info!(refresh = ?self.timer.interval(), ?max_cycles, "Entering frame cycle");
        let mut completed = 0;
        while max_cycles.map_or(true, |max| completed < max) {
            let started = Instant::now();
            let report = self.cycle(session)?;
            completed += 1;
            if report.refreshed {
                info!(cycle = report.sequence, persisted = ?report.persisted, "Refresh cycle");
            }
            if let Some(period) = self.period {
                if let Some(rest) = period.checked_sub(started.elapsed()) {
                    std::thread::sleep(rest);
                }
            }
        }
        Ok(completed)
    }

    fn path_for(&self, kind: OutputKind) -> &std::path::Path {
        match kind {
            OutputKind::Captured => &self.paths.captured,
            OutputKind::Processed => &self.paths.processed,
        }
    }

    fn reload_homography(&self) -> Option<ReloadOutcome> {
        match self.homography.try_reload(&self.paths.homography) {
            Ok(outcome) => {
                metrics::counter!("homography_reloads", "outcome" => outcome.label()).increment(1);
                match outcome {
                    ReloadOutcome::Replaced => info!("Homography updated"),
                    ReloadOutcome::WrongLineCount(lines) => {
                        warn!(lines, "homography file ignored, expected 9 lines")
                    }
                    ReloadOutcome::Missing => trace!("no homography file"),
                }
                Some(outcome)
            }
            Err(err) => {
                metrics::counter!("homography_reloads", "outcome" => "failed").increment(1);
                warn!("homography file ignored: {err}");
                None
            }
        }
    }

    fn read_back(
        &mut self,
        session: &PipelineSession,
        source: SurfaceSource,
    ) -> Result<(), PipelineError> {
        let len = session.geometry.rgba_len();
        let mut input = session.buffers.encoder_input.lock();
        let pixels = input
            .data_mut()
            .and_then(|data| data.get_mut(..len))
            .ok_or_else(|| PipelineError::Readback(format!("encoder input cannot hold {len} bytes")))?;
        self.surfaces.read_pixels(source, pixels)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timer_fires_first_then_once_per_interval() {
        let start = Instant::now();
        let mut timer = RefreshTimer::new(Duration::from_secs(5));

        assert!(timer.poll(start));
        assert!(!timer.poll(start + Duration::from_secs(4)));
        assert!(timer.poll(start + Duration::from_millis(5_200)));
        assert!(!timer.poll(start + Duration::from_millis(10_100)));
        assert!(timer.poll(start + Duration::from_millis(10_200)));
    }

    #[test]
    fn timer_fires_exactly_at_interval() {
        let start = Instant::now();
        let mut timer = RefreshTimer::new(Duration::from_secs(2));
        timer.poll(start);
        assert!(timer.is_due(start + Duration::from_secs(2)));
        assert_eq!(timer.last_refresh(), Some(start));
    }

    #[test]
    fn timer_tolerates_clock_behind_last_refresh() {
        let start = Instant::now() + Duration::from_secs(10);
        let mut timer = RefreshTimer::new(Duration::from_secs(1));
        timer.poll(start);
        assert!(!timer.poll(start - Duration::from_secs(3)));
    }
}
