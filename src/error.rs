//! Error types for admission control and call execution
use std::fmt;
use std::time::Duration;

/// Unified error carried by a [`CallHandle`](crate::CallHandle).
///
/// Callers can always tell a throttled call ([`is_rejected`](Self::is_rejected))
/// apart from one that ran and failed downstream ([`is_inner`](Self::is_inner)).
#[derive(Debug, Clone)]
pub enum LimiterError<E> {
    /// The quota for the current window is used up.
    RateLimitExceeded {
        /// Calls allowed per window.
        limit: u32,
        /// Configured refresh period.
        window: Duration,
        /// Time until the current window refreshes.
        retry_after: Duration,
    },
    /// The executor queue is full.
    QueueFull { queued: usize, max: usize },
    /// The executor has been shut down.
    Shutdown,
    /// The operation exceeded the per-call timeout.
    Timeout { elapsed: Duration, timeout: Duration },
    /// The operation panicked; the payload message is kept when it is a string.
    Panicked(String),
    /// The worker went away without reporting an outcome.
    Cancelled,
    /// The underlying operation failed
    Inner(E),
}

impl<E: fmt::Display> fmt::Display for LimiterError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RateLimitExceeded { limit, window, retry_after } => write!(
                f,
                "rate limit of {} calls per {:?} exceeded (window refreshes in {:?})",
                limit, window, retry_after
            ),
            Self::QueueFull { queued, max } => {
                write!(f, "executor queue full ({} queued, max {})", queued, max)
            }
            Self::Shutdown => write!(f, "executor is shut down"),
            Self::Timeout { elapsed, timeout } => {
                write!(f, "operation timed out after {:?} (limit: {:?})", elapsed, timeout)
            }
            Self::Panicked(msg) => write!(f, "operation panicked: {}", msg),
            Self::Cancelled => write!(f, "operation cancelled before completing"),
            Self::Inner(e) => write!(f, "{}", e),
        }
    }
}

impl<E: std::error::Error + 'static> std::error::Error for LimiterError<E> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Inner(e) => Some(e),
            _ => None,
        }
    }
}

impl<E> LimiterError<E> {
    /// True when the call was turned away and never ran.
    pub fn is_rejected(&self) -> bool {
        matches!(self, Self::RateLimitExceeded { .. } | Self::QueueFull { .. } | Self::Shutdown)
    }
    /// Check if this error is a quota rejection
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Self::RateLimitExceeded { .. })
    }
    pub fn is_queue_full(&self) -> bool {
        matches!(self, Self::QueueFull { .. })
    }
    pub fn is_shutdown(&self) -> bool {
        matches!(self, Self::Shutdown)
    }
    /// Check if this error is due to timeout
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
    pub fn is_panic(&self) -> bool {
        matches!(self, Self::Panicked(_))
    }
    /// Check if this error wraps an inner error.
    pub fn is_inner(&self) -> bool {
        matches!(self, Self::Inner(_))
    }
    /// Get the inner error if this is an Inner variant
    pub fn into_inner(self) -> Option<E> {
        match self {
            Self::Inner(e) => Some(e),
            _ => None,
        }
    }
    /// Borrow the inner error if present.
    pub fn as_inner(&self) -> Option<&E> {
        match self {
            Self::Inner(e) => Some(e),
            _ => None,
        }
    }
    /// How long until the quota refreshes, for rate-limit rejections.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimitExceeded { retry_after, .. } => Some(*retry_after),
            _ => None,
        }
    }
    /// Access timeout details as (elapsed, timeout).
    pub fn timeout_details(&self) -> Option<(Duration, Duration)> {
        match self {
            Self::Timeout { elapsed, timeout } => Some((*elapsed, *timeout)),
            _ => None,
        }
    }
    /// Map the inner error, keeping every other variant.
    pub fn map_inner<F, T>(self, f: F) -> LimiterError<T>
    where
        F: FnOnce(E) -> T,
    {
        match self {
            Self::RateLimitExceeded { limit, window, retry_after } => {
                LimiterError::RateLimitExceeded { limit, window, retry_after }
            }
            Self::QueueFull { queued, max } => LimiterError::QueueFull { queued, max },
            Self::Shutdown => LimiterError::Shutdown,
            Self::Timeout { elapsed, timeout } => LimiterError::Timeout { elapsed, timeout },
            Self::Panicked(msg) => LimiterError::Panicked(msg),
            Self::Cancelled => LimiterError::Cancelled,
            Self::Inner(e) => LimiterError::Inner(f(e)),
        }
    }
}
