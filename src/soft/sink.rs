use std::time::{Duration, Instant};

use tracing::trace;

use super::worker::{Stage, StageContext};
use crate::component::{DriverError, LifecycleState};

const DRAIN_INTERVAL: Duration = Duration::from_millis(5);

/// Consumes and drops whatever arrives on its tunnelled inputs.
#[derive(Debug, Default)]
pub(crate) struct DiscardStage {
    discarded: u64,
}

impl Stage for DiscardStage {
    fn wake_at(&self, state: LifecycleState) -> Option<Instant> {
        (state == LifecycleState::Executing).then(|| Instant::now() + DRAIN_INTERVAL)
    }

    fn wake(&mut self, ctx: &mut StageContext<'_>) -> Result<(), DriverError> {
        let drained: usize = ctx
            .ports
            .iter()
            .filter(|slot| slot.enabled)
            .filter_map(|slot| slot.tunnel_in.as_ref())
            .map(|tunnel| tunnel.try_iter().count())
            .sum();
        if drained > 0 {
            self.discarded += drained as u64;
            trace!(drained, total = self.discarded, "frames discarded");
        }
        Ok(())
    }
}
