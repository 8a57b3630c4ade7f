use tokio::sync::OwnedRwLockWriteGuard;

use crate::limits::*;
use crate::model::*;

use super::{EngineError, Shard};

pub(crate) fn now_ms() -> Ms {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as Ms)
        .unwrap_or(0)
}

pub(crate) fn validate_instant(at: Ms) -> Result<(), EngineError> {
    if !(MIN_VALID_TIMESTAMP_MS..MAX_VALID_TIMESTAMP_MS).contains(&at) {
        return Err(EngineError::LimitExceeded("timestamp out of range"));
    }
    Ok(())
}

pub(crate) fn validate_duration(minutes: u32) -> Result<(), EngineError> {
    if minutes == 0 {
        return Err(EngineError::validation("duration must be positive"));
    }
    if minutes > MAX_DURATION_MINUTES {
        return Err(EngineError::LimitExceeded("duration too long"));
    }
    Ok(())
}

pub(crate) fn validate_customer(customer: &Customer) -> Result<(), EngineError> {
    if customer.name.trim().is_empty() {
        return Err(EngineError::validation("customer name must not be empty"));
    }
    let fields = [Some(&customer.name), customer.phone.as_ref(), customer.email.as_ref()];
    if fields.into_iter().flatten().any(|f| f.len() > MAX_CUSTOMER_FIELD_LEN) {
        return Err(EngineError::LimitExceeded("customer field too long"));
    }
    Ok(())
}

/// Commit-time exclusion check: the caller holds the write lock of every
/// day shard `span` touches, so no other writer can claim the interval
/// between this check and the append.
pub(crate) fn check_no_conflict(
    shards: &[OwnedRwLockWriteGuard<Shard>],
    span: &Span,
) -> Result<(), EngineError> {
    for shard in shards {
        if let Some(taken) = shard.occupied.iter().find(|o| o.span.overlaps(span)) {
            return Err(EngineError::Conflict(taken.id));
        }
    }
    Ok(())
}
