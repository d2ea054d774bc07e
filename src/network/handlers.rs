use std::net::SocketAddr;

use crate::common::{Body, Envelope, Lot, MessageKind};
use crate::error::{AuctionError, AuctionResult};

use super::auth::{hash_password, verify_peer};
use super::state::ServerState;

/// What handling one request produced: the reply for the sender and the
/// notifications to fan out to every registered peer.
#[derive(Debug)]
pub struct Outcome {
    pub response: Envelope,
    pub broadcasts: Vec<Envelope>,
}

/// A handler fills the result fields into the request envelope in place and
/// returns the broadcasts the request triggers.
type Handler = fn(&ServerState, &mut Envelope, SocketAddr) -> AuctionResult<Vec<Envelope>>;

fn handler_for(kind: MessageKind) -> Handler {
    match kind {
        MessageKind::Register => register,
        MessageKind::Connect => connect,
        MessageKind::ListLots => list_lots,
        MessageKind::AddLot => add_lot,
        MessageKind::StartAuction => start_auction,
        MessageKind::PlaceBid => place_bid,
        MessageKind::Reclaim => reclaim,
        MessageKind::History => history,
        MessageKind::LotUpdate | MessageKind::AuctionEnded => server_only,
    }
}

/// Runs the handler for the envelope's kind. Never fails: errors become a
/// response with `success = false`, the reason in `info` and the error
/// category in `error`.
pub fn dispatch(state: &ServerState, mut envelope: Envelope, sender: SocketAddr) -> Outcome {
    let kind = envelope.kind();
    match handler_for(kind)(state, &mut envelope, sender) {
        Ok(broadcasts) => {
            envelope.succeed();
            Outcome {
                response: envelope,
                broadcasts,
            }
        }
        Err(err) => {
            log::debug!("{kind} from {sender} rejected: {err}");
            envelope.fail(&err);
            Outcome {
                response: envelope,
                broadcasts: Vec::new(),
            }
        }
    }
}

fn mismatched(envelope: &Envelope) -> AuctionError {
    AuctionError::Validation(format!("unexpected {} payload", envelope.kind()))
}

fn register(state: &ServerState, envelope: &mut Envelope, _: SocketAddr) -> AuctionResult<Vec<Envelope>> {
    let author = envelope
        .author
        .as_ref()
        .ok_or_else(|| AuctionError::Validation("request carries no author".to_string()))?;
    if author.username.trim().is_empty() || author.password.is_empty() {
        return Err(AuctionError::Validation(
            "username and password are required".to_string(),
        ));
    }
    let stored = state
        .store
        .register_user(&author.username, &hash_password(&author.password))?;
    log::info!("Registered {stored}");
    if let Some(author) = envelope.author.as_mut() {
        author.id = stored.id;
    }
    Ok(Vec::new())
}

fn connect(state: &ServerState, envelope: &mut Envelope, sender: SocketAddr) -> AuctionResult<Vec<Envelope>> {
    let user = verify_peer(state.store.as_ref(), envelope.author.as_ref())?;
    state.peers.register(sender);
    log::info!("{} connected from {sender}", user.username);
    envelope.body = Body::Connect {
        auction_started_at: state.clock.started_at(),
    };
    Ok(Vec::new())
}

fn list_lots(state: &ServerState, envelope: &mut Envelope, _: SocketAddr) -> AuctionResult<Vec<Envelope>> {
    let lots = state.store.available_lots()?;
    envelope.body = Body::ListLots { lots };
    Ok(Vec::new())
}

fn add_lot(state: &ServerState, envelope: &mut Envelope, _: SocketAddr) -> AuctionResult<Vec<Envelope>> {
    let Body::AddLot { lot } = &envelope.body else {
        return Err(mismatched(envelope));
    };
    if state.clock.is_started() {
        return Err(AuctionError::AuctionAlreadyStarted);
    }
    let seller = verify_peer(state.store.as_ref(), envelope.author.as_ref())?;
    if lot.lot_id.trim().is_empty() {
        return Err(AuctionError::Validation("lot id is required".to_string()));
    }
    if !lot.starting_price.is_finite() || lot.starting_price <= 0.0 {
        return Err(AuctionError::Validation(format!(
            "invalid starting price {}",
            lot.starting_price
        )));
    }
    if lot.duration_secs == 0 {
        return Err(AuctionError::Validation(
            "duration must be at least one second".to_string(),
        ));
    }
    // A new lot always opens at its starting price with nobody winning.
    let lot = Lot {
        current_price: lot.starting_price,
        available: true,
        top_bidder: None,
        seller: if lot.seller.is_empty() {
            seller.username.clone()
        } else {
            lot.seller.clone()
        },
        ..lot.clone()
    };
    state.store.add_lot(&lot)?;
    log::info!("{} listed {lot}", seller.username);
    envelope.body = Body::AddLot { lot: lot.clone() };
    Ok(vec![Envelope::lot_update(lot, "New lot added to the auction")])
}

fn start_auction(state: &ServerState, envelope: &mut Envelope, _: SocketAddr) -> AuctionResult<Vec<Envelope>> {
    let user = verify_peer(state.store.as_ref(), envelope.author.as_ref())?;
    let started_at = state.clock.start()?;
    log::info!("Auction started by {} at {started_at}", user.username);
    envelope.body = Body::StartAuction {
        started_at: Some(started_at),
    };
    Ok(vec![Envelope::notification(
        envelope.body.clone(),
        "The auction has started",
    )])
}

fn place_bid(state: &ServerState, envelope: &mut Envelope, _: SocketAddr) -> AuctionResult<Vec<Envelope>> {
    let Body::PlaceBid { lot } = &envelope.body else {
        return Err(mismatched(envelope));
    };
    if !state.clock.is_started() {
        return Err(AuctionError::AuctionNotStarted);
    }
    let bidder = verify_peer(state.store.as_ref(), envelope.author.as_ref())?;
    let updated = state
        .store
        .place_bid(&lot.lot_id, &bidder.username, lot.current_price)?;
    let info = format!(
        "New bid of {:.2} on lot {} by {}",
        updated.current_price, updated.lot_id, bidder.username
    );
    log::info!("{info}");
    envelope.body = Body::PlaceBid {
        lot: updated.clone(),
    };
    Ok(vec![Envelope::lot_update(updated, info)])
}

fn reclaim(state: &ServerState, envelope: &mut Envelope, _: SocketAddr) -> AuctionResult<Vec<Envelope>> {
    let Body::Reclaim { lot_id, .. } = &envelope.body else {
        return Err(mismatched(envelope));
    };
    let lot_id = lot_id.clone();
    let user = verify_peer(state.store.as_ref(), envelope.author.as_ref())?;
    if state.store.get_lot(&lot_id)?.is_none() {
        return Err(AuctionError::UnknownLot(lot_id));
    }
    let details = state.store.reclamation(&user.username, &lot_id)?;
    envelope.body = Body::Reclaim {
        lot_id,
        details: Some(details),
    };
    Ok(Vec::new())
}

fn history(state: &ServerState, envelope: &mut Envelope, _: SocketAddr) -> AuctionResult<Vec<Envelope>> {
    let user = verify_peer(state.store.as_ref(), envelope.author.as_ref())?;
    let entries = state.store.history_for(&user.username)?;
    if entries.is_empty() {
        return Err(AuctionError::EmptyHistory(user.username));
    }
    envelope.body = Body::History { entries };
    Ok(Vec::new())
}

fn server_only(_: &ServerState, envelope: &mut Envelope, sender: SocketAddr) -> AuctionResult<Vec<Envelope>> {
    log::warn!("{sender} sent a {} envelope", envelope.kind());
    Err(AuctionError::Validation(format!(
        "{} is emitted by the server only",
        envelope.kind()
    )))
}
