use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

use crate::common::{Envelope, Lot};
use crate::error::AuctionResult;

use super::server::ServerContext;
use super::state::ServerState;

/// Periodically closes lots whose time has run out and announces each one.
pub(crate) async fn run(
    context: ServerContext,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = shutdown.wait_for(|stop| *stop) => break,
            _ = ticker.tick() => {}
        }
        let Some(started_at) = context.state.clock.started_at() else {
            continue;
        };

        let state = context.state.clone();
        let closed =
            match tokio::task::spawn_blocking(move || expire_lots(&state, started_at, Utc::now()))
                .await
            {
                Ok(Ok(closed)) => closed,
                Ok(Err(err)) => {
                    log::error!("Expiry scan failed: {err}");
                    continue;
                }
                Err(err) => {
                    log::error!("Expiry scan panicked: {err}");
                    continue;
                }
            };

        for lot in closed {
            let notice = Envelope::auction_ended(lot);
            log::info!("{}", notice.info.as_deref().unwrap_or_default());
            context.broadcast(&notice).await;
        }
    }
    log::debug!("Expiry monitor stopped");
}

/// Closes every open lot whose duration has fully elapsed at `now`.
///
/// Only lots this call actually flipped are returned, so a lot is announced
/// once even if scans overlap.
pub fn expire_lots(
    state: &ServerState,
    started_at: DateTime<Utc>,
    now: DateTime<Utc>,
) -> AuctionResult<Vec<Lot>> {
    let elapsed_ms = (now - started_at).num_milliseconds();
    let mut closed = Vec::new();
    for lot in state.store.available_lots()? {
        if elapsed_ms <= i64::from(lot.duration_secs) * 1000 {
            continue;
        }
        match state.store.close_lot(&lot.lot_id) {
            Ok(Some(lot)) => closed.push(lot),
            Ok(None) => {}
            Err(err) => log::error!("Failed to close lot {}: {err}", lot.lot_id),
        }
    }
    Ok(closed)
}
