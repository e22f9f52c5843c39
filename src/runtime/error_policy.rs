//! # Error Policy
//!
//! Classification of node watch stream errors. The watcher retries on its own
//! backoff; classification only decides how loudly and with which hints the
//! failure is reported.

use crate::observability::metrics;
use tracing::{error, warn};

/// Broad category of a watch stream failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchErrorKind {
    /// 401, RBAC revoked or token expired
    Unauthorized,
    /// 410, resource version too old; the watcher relists
    Expired,
    /// 429 or API server storage reinitializing
    Throttled,
    /// 404
    NotFound,
    Other,
}

impl WatchErrorKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unauthorized => "unauthorized",
            Self::Expired => "expired",
            Self::Throttled => "throttled",
            Self::NotFound => "not_found",
            Self::Other => "other",
        }
    }
}

/// Classify a watch error from its rendered message
///
/// 404 is checked before 401: a plain text 404 body surfaces as a decode
/// error whose chain mentions the watch failure.
#[must_use]
pub fn classify_watch_error(error_string: &str) -> WatchErrorKind {
    let is_not_found = error_string.contains("ObjectNotFound")
        || error_string.contains("404")
        || error_string.contains("not found");
    if is_not_found {
        return WatchErrorKind::NotFound;
    }
    if error_string.contains("401") || error_string.contains("Unauthorized") {
        return WatchErrorKind::Unauthorized;
    }
    if error_string.contains("410")
        || error_string.contains("too old resource version")
        || error_string.contains("Expired")
        || error_string.contains("Gone")
    {
        return WatchErrorKind::Expired;
    }
    if error_string.contains("429")
        || error_string.contains("storage is (re)initializing")
        || error_string.contains("TooManyRequests")
    {
        return WatchErrorKind::Throttled;
    }
    WatchErrorKind::Other
}

/// Report a node watch stream error
pub fn handle_watch_stream_error(error_string: &str) {
    let kind = classify_watch_error(error_string);
    metrics::increment_watch_errors(kind.as_str());

    match kind {
        WatchErrorKind::Unauthorized => {
            error!(
                error = %error_string,
                "Node watch authentication failed (401) - check the controller ClusterRole grants list/watch on nodes"
            );
        }
        WatchErrorKind::Expired => {
            warn!(error_type = "410", "Node watch resource version expired, relisting");
        }
        WatchErrorKind::Throttled => {
            warn!(error = %error_string, "API server throttling node watch (429), backing off");
        }
        WatchErrorKind::NotFound => {
            warn!(error = %error_string, "Node watch returned 404");
        }
        WatchErrorKind::Other => {
            error!(error = %error_string, "Node watch stream error");
        }
    }
}
