//! Request path routing
//!
//! Routes are a fixed table evaluated top to bottom; the first pattern whose
//! prefix and suffix both match wins. Anything that matches no pattern is
//! not found.
//!
//! | Path                          | Endpoint                 |
//! |-------------------------------|--------------------------|
//! | `/apps/{app_id}/recentlogs`   | replay of recent logs    |
//! | `/apps/{app_id}/stream`       | live application stream  |
//! | `/firehose`                   | default firehose pool    |
//! | `/firehose/{subscription_id}` | named firehose pool      |

use thiserror::Error;

use crate::registry::FIREHOSE_SUBSCRIPTION;

/// Endpoint selected for a connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    /// Send the buffered recent logs of an application, then close
    RecentLogs { app_id: String },
    /// Stream every log of one application
    Stream { app_id: String },
    /// Share the full stream with the other members of a subscription
    Firehose { subscription_id: String },
}

impl Route {
    /// Resolve a request path against the routing table
    pub fn resolve(path: &str) -> Result<Self, RouteError> {
        for pattern in ROUTES {
            if let Some(route) = pattern.matches(path)? {
                return Ok(route);
            }
        }
        Err(RouteError::NotFound(path.to_string()))
    }

    /// Short endpoint name for logging
    pub fn endpoint(&self) -> &'static str {
        match self {
            Route::RecentLogs { .. } => "recentlogs",
            Route::Stream { .. } => "stream",
            Route::Firehose { .. } => "firehose",
        }
    }
}

/// Client-visible routing failure
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RouteError {
    /// No pattern matched the path
    #[error("Resource Not Found. {0}")]
    NotFound(String),

    /// Application id segment is empty
    #[error("App ID missing. Make request to /apps/APP_ID/{endpoint}")]
    MissingAppId { endpoint: &'static str },

    /// Subscription id segment is empty
    #[error("Subscription ID missing. Make request to /firehose/SUBSCRIPTION_ID")]
    MissingSubscriptionId,
}

impl RouteError {
    /// HTTP status code reported to the client
    pub fn status_code(&self) -> u16 {
        match self {
            RouteError::NotFound(_) => 404,
            RouteError::MissingAppId { .. } | RouteError::MissingSubscriptionId => 400,
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Kind {
    RecentLogs,
    Stream,
    Firehose,
}

#[derive(Debug, Clone, Copy)]
enum Identifier {
    /// Path must match the prefix exactly
    None,
    /// Everything between prefix and suffix, must be non-empty
    Required,
}

struct RoutePattern {
    prefix: &'static str,
    suffix: &'static str,
    identifier: Identifier,
    kind: Kind,
}

const ROUTES: &[RoutePattern] = &[
    RoutePattern {
        prefix: "/apps/",
        suffix: "/recentlogs",
        identifier: Identifier::Required,
        kind: Kind::RecentLogs,
    },
    RoutePattern {
        prefix: "/apps/",
        suffix: "/stream",
        identifier: Identifier::Required,
        kind: Kind::Stream,
    },
    RoutePattern {
        prefix: "/firehose",
        suffix: "",
        identifier: Identifier::None,
        kind: Kind::Firehose,
    },
    RoutePattern {
        prefix: "/firehose/",
        suffix: "",
        identifier: Identifier::Required,
        kind: Kind::Firehose,
    },
];

impl RoutePattern {
    fn matches(&self, path: &str) -> Result<Option<Route>, RouteError> {
        let Some(rest) = path.strip_prefix(self.prefix) else {
            return Ok(None);
        };
        let Some(id) = rest.strip_suffix(self.suffix) else {
            return Ok(None);
        };

        let id = match self.identifier {
            Identifier::None if id.is_empty() => None,
            Identifier::None => return Ok(None),
            Identifier::Required => Some(id),
        };

        let route = match (self.kind, id) {
            (Kind::Firehose, None) => Route::Firehose {
                subscription_id: FIREHOSE_SUBSCRIPTION.to_string(),
            },
            (Kind::Firehose, Some("")) => return Err(RouteError::MissingSubscriptionId),
            (Kind::Firehose, Some(id)) => Route::Firehose {
                subscription_id: id.to_string(),
            },
            (Kind::RecentLogs, id) => Route::RecentLogs {
                app_id: required_app_id(id, "recentlogs")?,
            },
            (Kind::Stream, id) => Route::Stream {
                app_id: required_app_id(id, "stream")?,
            },
        };
        Ok(Some(route))
    }
}

fn required_app_id(id: Option<&str>, endpoint: &'static str) -> Result<String, RouteError> {
    match id {
        Some(id) if !id.is_empty() => Ok(id.to_string()),
        _ => Err(RouteError::MissingAppId { endpoint }),
    }
}
