use core_model::MAX_EVIDENCE_BYTES;

use crate::error::{StoreError, StoreResult};

/// Strips unsafe markup from evidence and enforces the size ceiling on the
/// cleaned value. Oversized input is rejected, never truncated.
pub fn sanitize_evidence(raw: &str) -> StoreResult<String> {
    let clean = ammonia::clean(raw);
    if clean.len() > MAX_EVIDENCE_BYTES {
        return Err(StoreError::PayloadTooLarge {
            size: clean.len(),
            limit: MAX_EVIDENCE_BYTES,
        });
    }
    Ok(clean)
}
