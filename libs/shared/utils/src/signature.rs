use base64::{engine::general_purpose::STANDARD, Engine};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use tracing::debug;

type HmacSha256 = Hmac<Sha256>;

/// Header carrying the provider's HMAC-SHA256 signature of the raw body.
pub const SIGNATURE_HEADER: &str = "x-signature";

/// Hex-encoded HMAC-SHA256 of `body` under `secret`.
pub fn compute_signature(body: &[u8], secret: &str) -> Result<String, String> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|_| "Failed to create HMAC".to_string())?;
    mac.update(body);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Verify a signature header value against the raw request body.
///
/// Accepts lowercase/uppercase hex, optionally prefixed with `sha256=`, or
/// standard base64. The comparison is constant time.
pub fn verify_signature(body: &[u8], provided: &str, secret: &str) -> Result<(), String> {
    if secret.is_empty() {
        return Err("Webhook secret is not set".to_string());
    }

    let provided = provided.trim();
    let provided = provided.strip_prefix("sha256=").unwrap_or(provided);
    if provided.is_empty() {
        return Err("Empty signature".to_string());
    }

    let signature = match hex::decode(provided) {
        Ok(bytes) => bytes,
        Err(_) => match STANDARD.decode(provided) {
            Ok(bytes) => bytes,
            Err(e) => {
                debug!("Failed to decode signature: {}", e);
                return Err("Invalid signature encoding".to_string());
            }
        },
    };

    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|_| "Failed to create HMAC".to_string())?;
    mac.update(body);

    if mac.verify_slice(&signature).is_err() {
        debug!("Webhook signature verification failed");
        return Err("Invalid webhook signature".to_string());
    }

    Ok(())
}
