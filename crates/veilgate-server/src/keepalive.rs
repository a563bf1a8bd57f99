//! Keepalive Sweeper (C6): a periodic timer task that pings every live
//! session and prunes stale URL Registry identity entries.
//!
//! Generalized from the teacher's `tick()`/`ServerEvent::Tick` handling in
//! `driver.rs`: there, a tick event is folded into the same
//! `process_event` dispatch as everything else; here the timer task simply
//! forwards a [`crate::core::CoreCommand::Sweep`] into the core's event
//! channel so the actual mutation still happens on the single owning task.

use std::time::Duration;

use veilgate_core::Environment;

use crate::core::CoreHandle;

/// Interval between keepalive sweeps (§4.6).
const SWEEP_INTERVAL: Duration = Duration::from_secs(10);

/// Run the keepalive sweep loop until the process exits. Never returns.
pub async fn run<E: Environment>(core: CoreHandle, env: E) {
    loop {
        env.sleep(SWEEP_INTERVAL).await;
        core.sweep(env.wall_clock_secs());
    }
}
