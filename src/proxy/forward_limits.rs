use super::forward_error::ProxyError;

/// Enforces the maximum size of the request head forwarded to the origin.
pub struct HeaderBudget {
    limit: usize,
    used: usize,
}

impl HeaderBudget {
    pub fn new(limit: usize) -> Self {
        Self { limit, used: 0 }
    }

    pub fn record(&mut self, bytes: usize) -> Result<(), ProxyError> {
        self.used = self.used.saturating_add(bytes);
        if self.used > self.limit {
            return Err(ProxyError::HeaderTooLarge { limit: self.limit });
        }
        Ok(())
    }
}

/// Rejects declared request bodies larger than the configured limit before any byte is
/// forwarded.
pub fn check_body_length(length: u64, limit: usize) -> Result<(), ProxyError> {
    if length > limit as u64 {
        return Err(ProxyError::BodyTooLarge { length, limit });
    }
    Ok(())
}
