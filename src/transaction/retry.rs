use crate::connection::config::BridgeConfig;
use crate::core::BridgeError;

/// Decides whether a failed connect-and-begin is worth one more attempt
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    enabled: bool,
    codes: Vec<i32>,
}

impl RetryPolicy {
    pub fn from_config(config: &BridgeConfig) -> Self {
        Self {
            enabled: config.retry_on_disconnect,
            codes: config.retryable_codes.clone(),
        }
    }

    pub fn disabled() -> Self {
        Self {
            enabled: false,
            codes: Vec::new(),
        }
    }

    /// Retries allowed per acquire call
    pub fn max_retries(&self) -> u32 {
        if self.enabled { 1 } else { 0 }
    }

    /// Whether `err` means the remote session is gone
    pub fn is_retryable(&self, err: &BridgeError) -> bool {
        self.enabled
            && err
                .native_code()
                .map(|code| self.codes.contains(&code))
                .unwrap_or(false)
    }

    /// Error reported when the retry failed as well
    pub fn exhausted(&self, endpoint: &str, last: BridgeError) -> BridgeError {
        let detail = last.detail().cloned();
        BridgeError::connection(
            format!(
                "connection to foreign server \"{}\" lost and could not be re-established: {}",
                endpoint, last
            ),
            detail,
        )
    }
}
