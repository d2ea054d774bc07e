use sha2::{Digest, Sha256};

use crate::common::User;
use crate::error::{AuctionError, AuctionResult};
use crate::storage::AuctionStore;

/// Hex-encoded SHA-256 of the password, the form kept in the store.
pub fn hash_password(password: &str) -> String {
    hex::encode(Sha256::digest(password.as_bytes()))
}

/// Re-resolves the claimed identity against the store.
///
/// There is no session: every request presents credentials again, and this
/// is the only authorization gate the server has.
pub fn verify_peer(store: &dyn AuctionStore, claimed: Option<&User>) -> AuctionResult<User> {
    let claimed = claimed
        .ok_or_else(|| AuctionError::Validation("request carries no author".to_string()))?;
    let stored = store
        .find_user(&claimed.username)?
        .ok_or_else(|| AuctionError::InvalidUser(claimed.username.clone()))?;
    if hash_password(&claimed.password) != stored.password {
        return Err(AuctionError::BadCredential(claimed.username.clone()));
    }
    Ok(stored)
}
