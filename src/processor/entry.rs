//! The routine every isolated worker runs, thread or process.

use crate::processor::events::{Flags, UnitEvents};
use crate::processor::{
    all_finished, close_units, group_factory, setup_units, start_units, stop_units, PlacedNode,
    RunContext,
};
use crate::pipeline::placement::Level;
use std::sync::Arc;
use std::time::Duration;

/// How often a running worker checks whether its sub-units finished.
const FINISH_POLL: Duration = Duration::from_millis(10);

/// Worker side of the unit/worker handshake.
pub trait ControlLink {
    /// Flags raised by the parent (`start`, `stop`, `close`).
    fn events(&self) -> &UnitEvents;

    fn ready(&self);

    fn setup_failed(&self, reason: String);

    /// The stop request has been carried out.
    fn stopped(&self);
}

/// Link of a thread worker: parent and worker share the same events.
pub struct SharedLink(pub Arc<UnitEvents>);

impl ControlLink for SharedLink {
    fn events(&self) -> &UnitEvents {
        &self.0
    }

    fn ready(&self) {
        self.0.update(|f| f.ready = true);
    }

    fn setup_failed(&self, reason: String) {
        self.0.update(|f| f.failure = Some(reason));
    }

    fn stopped(&self) {
        self.0.update(|f| f.stopped = true);
    }
}

fn wants_stop(flags: &Flags) -> bool {
    flags.stop || flags.close
}

/// Build the next level for `items`, set it up, signal ready, then follow the
/// parent's control signals until the sub-units are closed.
pub fn child_entrypoint(
    level: Level,
    label: &str,
    items: Vec<PlacedNode>,
    ctx: &Arc<RunContext>,
    link: &dyn ControlLink,
) {
    let config = &ctx.config;
    let mut units = group_factory(level, label, items, ctx);

    if let Err(e) = setup_units(&mut units, config.setup_failure, config.close_timeout()) {
        close_units(&mut units, config.close_timeout());
        link.setup_failed(e.to_string());
        return;
    }
    tracing::debug!("{} ready with {} sub-unit(s)", label, units.len());
    link.ready();

    let flags = link.events().wait(|f| f.start || wants_stop(f));
    let mut stop_requested = wants_stop(&flags);

    if !stop_requested {
        if let Err(e) = start_units(&mut units) {
            tracing::error!("{}: failed to start sub-units: {}", label, e);
        }
        loop {
            let flags = link.events().wait_until(FINISH_POLL, wants_stop);
            if wants_stop(&flags) {
                stop_requested = !all_finished(&units);
                break;
            }
            if all_finished(&units) {
                tracing::debug!("{} finished naturally", label);
                break;
            }
        }
    }

    if stop_requested {
        stop_units(&mut units, config.stop_timeout());
        link.stopped();
        link.events().wait(|f| f.close);
    }
    close_units(&mut units, config.close_timeout());
}
