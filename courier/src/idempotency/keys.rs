//! Key builders and lifetimes for the call sites that use the lock.

use sha2::{Digest, Sha256};
use std::time::Duration;

/// How long an unresolved checkout claim blocks duplicates.
pub const CHECKOUT_PENDING_TTL: Duration = Duration::from_secs(2 * 60);

/// How long a resolved checkout claim replays its result.
pub const CHECKOUT_RESOLVED_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// How long a processed webhook delivery is remembered.
pub const WEBHOOK_DEDUP_TTL: Duration = Duration::from_secs(7 * 24 * 60 * 60);

const CHECKOUT_PREFIX: &str = "payment:invoice:idempotency";
const WEBHOOK_PREFIX: &str = "payment:webhook:xendit:invoice";
const RESET_COOLDOWN_PREFIX: &str = "auth:password_reset:cooldown";

/// Key for an invoice checkout, qualified by the external ID when there is one.
#[must_use]
pub fn checkout(token: &str, external_id: &str) -> String {
    let token = token.trim();
    match external_id.trim() {
        "" => format!("{CHECKOUT_PREFIX}:{token}"),
        external_id => format!("{CHECKOUT_PREFIX}:{token}:{external_id}"),
    }
}

/// Key for one webhook delivery. Missing invoice ID or status segments are omitted;
/// the status is upper-cased.
#[must_use]
pub fn webhook(invoice_id: &str, status: &str, payload_hash: &str) -> String {
    let mut key = String::from(WEBHOOK_PREFIX);
    let invoice_id = invoice_id.trim();
    if !invoice_id.is_empty() {
        key.push(':');
        key.push_str(invoice_id);
    }
    let status = status.trim().to_uppercase();
    if !status.is_empty() {
        key.push_str(":status:");
        key.push_str(&status);
    }
    key.push_str(":hash:");
    key.push_str(payload_hash.trim());
    key
}

/// Key for the password-reset cooldown of one user.
#[must_use]
pub fn password_reset_cooldown(user_id: &str) -> String {
    format!("{RESET_COOLDOWN_PREFIX}:{}", user_id.trim())
}

/// Lowercase hex SHA-256 of a request body.
#[must_use]
pub fn payload_digest(body: &[u8]) -> String {
    hex::encode(Sha256::digest(body))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checkout_key() {
        assert_eq!(checkout(" tok ", ""), "payment:invoice:idempotency:tok");
        assert_eq!(
            checkout("tok", " inv-1 "),
            "payment:invoice:idempotency:tok:inv-1"
        );
    }

    #[test]
    fn test_webhook_key_variants() {
        assert_eq!(
            webhook("inv", "paid", "h"),
            "payment:webhook:xendit:invoice:inv:status:PAID:hash:h"
        );
        assert_eq!(
            webhook("inv", "", "h"),
            "payment:webhook:xendit:invoice:inv:hash:h"
        );
        assert_eq!(
            webhook("", "Expired", "h"),
            "payment:webhook:xendit:invoice:status:EXPIRED:hash:h"
        );
        assert_eq!(webhook(" ", " ", "h"), "payment:webhook:xendit:invoice:hash:h");
    }

    #[test]
    fn test_password_reset_key() {
        assert_eq!(
            password_reset_cooldown("42"),
            "auth:password_reset:cooldown:42"
        );
    }

    #[test]
    fn test_payload_digest() {
        assert_eq!(
            payload_digest(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_ttls() {
        assert_eq!(CHECKOUT_PENDING_TTL.as_secs(), 120);
        assert_eq!(CHECKOUT_RESOLVED_TTL.as_secs(), 86_400);
        assert_eq!(WEBHOOK_DEDUP_TTL.as_secs(), 604_800);
    }
}
