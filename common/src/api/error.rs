// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Error handling facilities for the virtual router control plane

use crate::typed_uuid::ApplianceUuid;
use crate::typed_uuid::HostUuid;
use crate::typed_uuid::NetworkUuid;
use serde::Deserialize;
use serde::Serialize;
use std::fmt::Display;
use uuid::Uuid;

/// An error that can be generated within the control plane
///
/// These may be generated while serving an operator request or as part of
/// background reconciliation.  The set is closed: callers match on the
/// variant to decide whether to retry, alert, or give up.
#[derive(Clone, Debug, Deserialize, thiserror::Error, PartialEq, Serialize)]
pub enum Error {
    /// Another operation holds the allocation token for this network.  The
    /// caller should retry later.
    #[error("Concurrent operation: {message}")]
    ConcurrentOperation { message: String },
    /// No hypervisor in the target scope could host the appliance.
    #[error("Insufficient capacity: {message}")]
    InsufficientCapacity { message: String },
    /// The network's redundant priority space is exhausted.
    #[error("Insufficient virtual network capacity for network {network_id}: {message}")]
    InsufficientVirtualNetworkCapacity { network_id: NetworkUuid, message: String },
    /// The agent on the appliance's host could not be reached (or the
    /// appliance has no host at all).
    #[error("Agent unavailable: {internal_message}")]
    AgentUnavailable { host_id: Option<HostUuid>, internal_message: String },
    /// The appliance reports a version older than the configured minimum.
    #[error(
        "Appliance {instance_id} requires upgrade: version {found:?} \
         does not satisfy minimum {minimum}"
    )]
    VersionMismatch {
        instance_id: ApplianceUuid,
        found: Option<String>,
        minimum: String,
    },
    /// A downstream operation failed; the message carries the reason.
    #[error("Resource unavailable: {internal_message}")]
    ResourceUnavailable { internal_message: String },

    /// An object needed as part of this operation was not found.
    #[error("Object (of type {type_name}) not found: {lookup_type:?}")]
    ObjectNotFound { type_name: ResourceType, lookup_type: LookupType },
    /// The request was well-formed, but the operation cannot be completed
    /// given the current state of the system.
    #[error("Invalid Request: {message}")]
    InvalidRequest { message: String },
    /// The system encountered an unhandled operational error.
    #[error("Internal Error: {internal_message}")]
    InternalError { internal_message: String },
}

/// Identifies a type of control plane object
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq, Serialize)]
pub enum ResourceType {
    Appliance,
    Cluster,
    GuestNetwork,
    Host,
    RouterTemplate,
}

impl Display for ResourceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            ResourceType::Appliance => "appliance",
            ResourceType::Cluster => "cluster",
            ResourceType::GuestNetwork => "guest network",
            ResourceType::Host => "host",
            ResourceType::RouterTemplate => "router template",
        })
    }
}

/// Indicates how an object was looked up (for an `ObjectNotFound` error)
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub enum LookupType {
    /// a specific name was requested
    ByName(String),
    /// a specific id was requested
    ById(Uuid),
}

impl LookupType {
    /// Returns an ObjectNotFound error appropriate for the case where this
    /// lookup failed
    pub fn into_not_found(self, type_name: ResourceType) -> Error {
        Error::ObjectNotFound { type_name, lookup_type: self }
    }
}

impl Error {
    /// Returns whether the error is likely transient and could reasonably be
    /// retried
    pub fn retryable(&self) -> bool {
        match self {
            Error::ConcurrentOperation { .. }
            | Error::AgentUnavailable { .. } => true,

            Error::InsufficientCapacity { .. }
            | Error::InsufficientVirtualNetworkCapacity { .. }
            | Error::VersionMismatch { .. }
            | Error::ResourceUnavailable { .. }
            | Error::ObjectNotFound { .. }
            | Error::InvalidRequest { .. }
            | Error::InternalError { .. } => false,
        }
    }

    /// Generates an [`Error::ObjectNotFound`] error for a lookup by object id.
    pub fn not_found_by_id(type_name: ResourceType, id: &Uuid) -> Error {
        LookupType::ById(*id).into_not_found(type_name)
    }

    /// Generates an [`Error::ObjectNotFound`] error for a lookup by name.
    pub fn not_found_by_name(type_name: ResourceType, name: &str) -> Error {
        LookupType::ByName(name.to_owned()).into_not_found(type_name)
    }

    /// Generates an [`Error::InternalError`] error with the specific message
    ///
    /// InternalError should be used for operational conditions that should not
    /// happen but that we cannot reasonably handle at runtime (e.g., a
    /// non-redundant appliance attached to a redundant network).
    pub fn internal_error(internal_message: &str) -> Error {
        Error::InternalError { internal_message: internal_message.to_owned() }
    }

    /// Generates an [`Error::InvalidRequest`] error with the specific message
    pub fn invalid_request(message: &str) -> Error {
        Error::InvalidRequest { message: message.to_owned() }
    }

    /// Generates an [`Error::ResourceUnavailable`] error with the specific
    /// message
    pub fn unavail(message: &str) -> Error {
        Error::ResourceUnavailable { internal_message: message.to_owned() }
    }

    pub fn concurrent_operation(message: &str) -> Error {
        Error::ConcurrentOperation { message: message.to_owned() }
    }

    pub fn insufficient_capacity(message: &str) -> Error {
        Error::InsufficientCapacity { message: message.to_owned() }
    }

    pub fn agent_unavailable(host_id: Option<HostUuid>, message: &str) -> Error {
        Error::AgentUnavailable {
            host_id,
            internal_message: message.to_owned(),
        }
    }

    /// Given an [`Error`] with an internal message, return the same error with
    /// `context` prepended to it to provide more context
    ///
    /// If the error has no internal message, then it is returned unchanged.
    pub fn internal_context<C>(self, context: C) -> Error
    where
        C: Display + Send + Sync + 'static,
    {
        match self {
            Error::ConcurrentOperation { .. }
            | Error::InsufficientCapacity { .. }
            | Error::InsufficientVirtualNetworkCapacity { .. }
            | Error::VersionMismatch { .. }
            | Error::ObjectNotFound { .. }
            | Error::InvalidRequest { .. } => self,
            Error::AgentUnavailable { host_id, internal_message } => {
                Error::AgentUnavailable {
                    host_id,
                    internal_message: format!(
                        "{}: {}",
                        context, internal_message
                    ),
                }
            }
            Error::ResourceUnavailable { internal_message } => {
                Error::ResourceUnavailable {
                    internal_message: format!(
                        "{}: {}",
                        context, internal_message
                    ),
                }
            }
            Error::InternalError { internal_message } => Error::InternalError {
                internal_message: format!("{}: {}", context, internal_message),
            },
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::internal_error(&e.to_string())
    }
}

/// Implements a pattern similar to `anyhow::Context` for providing extra
/// context for internal error messages
///
/// Unlike `anyhow::Context`, this does not add a new Error to the cause chain.
/// It replaces the given Error with one that has the modified
/// `internal_message`.
///
/// ## Example
///
/// ```
/// use vrouter_common::api::Error;
/// use vrouter_common::api::InternalContext;
///
/// let error: Result<(), Error> = Err(Error::internal_error("boom"));
/// assert_eq!(
///     error.internal_context("uh-oh").unwrap_err().to_string(),
///     "Internal Error: uh-oh: boom"
/// );
/// ```
pub trait InternalContext<T> {
    fn internal_context<C>(self, s: C) -> Result<T, Error>
    where
        C: Display + Send + Sync + 'static;

    fn with_internal_context<C, F>(self, f: F) -> Result<T, Error>
    where
        C: Display + Send + Sync + 'static,
        F: FnOnce() -> C;
}

impl<T> InternalContext<T> for Result<T, Error> {
    fn internal_context<C>(self, context: C) -> Result<T, Error>
    where
        C: Display + Send + Sync + 'static,
    {
        self.map_err(|error| error.internal_context(context))
    }

    fn with_internal_context<C, F>(self, make_context: F) -> Result<T, Error>
    where
        C: Display + Send + Sync + 'static,
        F: FnOnce() -> C,
    {
        self.map_err(|error| error.internal_context(make_context()))
    }
}

#[cfg(test)]
mod test {
    use super::Error;
    use super::InternalContext;
    use super::ResourceType;
    use crate::typed_uuid::HostUuid;
    use assert_matches::assert_matches;
    use uuid::Uuid;

    #[test]
    fn test_context() {
        let error: Result<(), Error> = Err(Error::internal_error("boom"));
        match error.internal_context("uh-oh") {
            Err(Error::InternalError { internal_message }) => {
                assert_eq!(internal_message, "uh-oh: boom");
            }
            _ => panic!("returned wrong type"),
        };

        let host_id = HostUuid::new_v4();
        let error: Result<(), Error> =
            Err(Error::agent_unavailable(Some(host_id), "timed out"));
        assert_matches!(
            error.with_internal_context(|| format!("polling {}", "r-1")),
            Err(Error::AgentUnavailable { host_id: Some(h), internal_message })
                if h == host_id && internal_message == "polling r-1: timed out"
        );

        // Variants without an internal message pass through untouched.
        let error = Error::concurrent_operation("busy");
        assert_eq!(error.clone().internal_context("ignored"), error);
    }

    #[test]
    fn test_retryable() {
        assert!(Error::concurrent_operation("busy").retryable());
        assert!(Error::agent_unavailable(None, "no host").retryable());
        assert!(!Error::insufficient_capacity("full").retryable());
        assert!(!Error::unavail("stop failed").retryable());
        assert!(
            !Error::not_found_by_id(ResourceType::Appliance, &Uuid::nil())
                .retryable()
        );
    }

    #[test]
    fn test_display() {
        let error =
            Error::not_found_by_id(ResourceType::GuestNetwork, &Uuid::nil());
        assert_eq!(
            error.to_string(),
            "Object (of type guest network) not found: \
             ById(00000000-0000-0000-0000-000000000000)"
        );
    }
}
