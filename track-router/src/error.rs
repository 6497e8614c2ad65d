use std::fmt;

use thiserror::Error;

/// Why a route couldn't be calculated. The `Display` text is the English message for the user;
/// hosts showing localized toasts should match on `reason()` instead.
#[derive(Debug, Error)]
pub enum RoutingError {
    #[error("the start point is not reachable from the road network")]
    EndpointUnmappedFrom,
    #[error("a via point is not reachable from the road network")]
    EndpointUnmappedVia,
    #[error("the end point is not reachable from the road network")]
    EndpointUnmappedTo,
    #[error("the routing request timed out")]
    Timeout,
    /// Anything the routing service said that we don't recognize, shown verbatim
    #[error("{0}")]
    Service(String),
    #[error("elevation lookup failed: {0}")]
    Elevation(#[source] anyhow::Error),
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Reason {
    EndpointUnmappedFrom,
    EndpointUnmappedVia,
    EndpointUnmappedTo,
    Timeout,
    Unknown,
}

impl RoutingError {
    /// Classifies the error text returned by BRouter.
    pub fn classify(message: &str) -> RoutingError {
        if message.contains("from-position not mapped in existing datafile") {
            RoutingError::EndpointUnmappedFrom
        } else if message.contains("via1-position not mapped in existing datafile") {
            RoutingError::EndpointUnmappedVia
        } else if message.contains("to-position not mapped in existing datafile") {
            RoutingError::EndpointUnmappedTo
        } else if message.contains("Time-out") {
            RoutingError::Timeout
        } else {
            RoutingError::Service(message.trim().to_string())
        }
    }

    pub fn reason(&self) -> Reason {
        match self {
            RoutingError::EndpointUnmappedFrom => Reason::EndpointUnmappedFrom,
            RoutingError::EndpointUnmappedVia => Reason::EndpointUnmappedVia,
            RoutingError::EndpointUnmappedTo => Reason::EndpointUnmappedTo,
            RoutingError::Timeout => Reason::Timeout,
            RoutingError::Service(_) | RoutingError::Elevation(_) => Reason::Unknown,
        }
    }
}

impl From<reqwest::Error> for RoutingError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            RoutingError::Timeout
        } else {
            RoutingError::Service(err.to_string())
        }
    }
}

impl Reason {
    pub fn as_str(self) -> &'static str {
        match self {
            Reason::EndpointUnmappedFrom => "endpoint-unmapped-from",
            Reason::EndpointUnmappedVia => "endpoint-unmapped-via",
            Reason::EndpointUnmappedTo => "endpoint-unmapped-to",
            Reason::Timeout => "timeout",
            Reason::Unknown => "unknown",
        }
    }
}

impl fmt::Display for Reason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
