// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Identifiers for the objects the control plane juggles
//!
//! Appliances, networks, hosts and the placement scopes around them are all
//! named by UUIDs.  Wrapping each one in a marker-typed [`TypedUuid`] keeps a
//! host id from being handed to something that wants a network id.

use derive_where::derive_where;
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};
use thiserror::Error;
use uuid::Uuid;

/// A UUID with type-level information about what it identifies.
///
/// Ordering is the ordering of the underlying UUID.  Reconciliation relies on
/// it to pick a deterministic owner out of a redundant pair.
#[derive_where(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[derive(Serialize, Deserialize)]
#[serde(transparent)]
pub struct TypedUuid<T: TypedUuidKind> {
    uuid: Uuid,
    _phantom: std::marker::PhantomData<T>,
}

impl<T: TypedUuidKind> TypedUuid<T> {
    /// Creates a new random UUID of this type.
    #[inline]
    pub fn new_v4() -> Self {
        Self { uuid: Uuid::new_v4(), _phantom: std::marker::PhantomData }
    }

    /// Create a new `TypedUuid` from an untyped [`Uuid`].
    ///
    /// It is the caller's responsibility to ensure that the UUID is of the
    /// correct type.
    #[inline]
    pub fn from_untyped(uuid: Uuid) -> Self {
        Self { uuid, _phantom: std::marker::PhantomData }
    }

    #[inline]
    pub fn as_untyped_uuid(&self) -> &Uuid {
        &self.uuid
    }

    #[inline]
    pub fn into_untyped_uuid(self) -> Uuid {
        self.uuid
    }
}

impl<T: TypedUuidKind> fmt::Debug for TypedUuid<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.uuid.fmt(f)?;
        write!(f, " ({})", T::tag())
    }
}

impl<T: TypedUuidKind> fmt::Display for TypedUuid<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.uuid.fmt(f)
    }
}

impl<T: TypedUuidKind> FromStr for TypedUuid<T> {
    type Err = TypedUuidParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let uuid = Uuid::from_str(s)
            .map_err(|error| TypedUuidParseError { error, tag: T::tag() })?;
        Ok(Self::from_untyped(uuid))
    }
}

/// Marker types usable as the type parameter of [`TypedUuid`].
pub trait TypedUuidKind: Send + Sync + 'static {
    fn tag() -> TypedUuidTag;
}

/// Runtime equivalent of [`TypedUuidKind`].
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TypedUuidTag {
    Appliance,
    Cluster,
    GuestNetwork,
    Host,
    ManagementNode,
    Owner,
    Pod,
    StoragePool,
    Zone,
}

impl TypedUuidTag {
    pub fn as_str(&self) -> &'static str {
        match self {
            TypedUuidTag::Appliance => "appliance",
            TypedUuidTag::Cluster => "cluster",
            TypedUuidTag::GuestNetwork => "guest_network",
            TypedUuidTag::Host => "host",
            TypedUuidTag::ManagementNode => "management_node",
            TypedUuidTag::Owner => "owner",
            TypedUuidTag::Pod => "pod",
            TypedUuidTag::StoragePool => "storage_pool",
            TypedUuidTag::Zone => "zone",
        }
    }
}

impl fmt::Display for TypedUuidTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

macro_rules! impl_typed_uuid_kind {
    ($($kind:ident => $tag:ident => $alias:ident),* $(,)?) => {
        $(
            pub enum $kind {}

            impl TypedUuidKind for $kind {
                #[inline]
                fn tag() -> TypedUuidTag {
                    TypedUuidTag::$tag
                }
            }

            pub type $alias = TypedUuid<$kind>;
        )*
    };
}

impl_typed_uuid_kind! {
    ApplianceKind => Appliance => ApplianceUuid,
    ClusterKind => Cluster => ClusterUuid,
    GuestNetworkKind => GuestNetwork => NetworkUuid,
    HostKind => Host => HostUuid,
    ManagementNodeKind => ManagementNode => NodeUuid,
    OwnerKind => Owner => OwnerUuid,
    PodKind => Pod => PodUuid,
    StoragePoolKind => StoragePool => StoragePoolUuid,
    ZoneKind => Zone => ZoneUuid,
}

#[derive(Error, Debug)]
#[error("error parsing uuid for {tag}")]
pub struct TypedUuidParseError {
    #[source]
    pub(crate) error: uuid::Error,
    pub(crate) tag: TypedUuidTag,
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_parse_and_display() {
        let raw = "9a5c3fd0-6d6a-4c6e-8f3b-0d1a2b3c4d5e";
        let id: HostUuid = raw.parse().unwrap();
        assert_eq!(id.to_string(), raw);
        assert_eq!(format!("{:?}", id), format!("{} (host)", raw));

        let error = "not-a-uuid".parse::<NetworkUuid>().unwrap_err();
        assert_eq!(error.to_string(), "error parsing uuid for guest_network");
    }

    #[test]
    fn test_ordering_follows_uuid() {
        let low = ApplianceUuid::from_untyped(Uuid::from_u128(1));
        let high = ApplianceUuid::from_untyped(Uuid::from_u128(2));
        assert!(low < high);
        assert_eq!(std::cmp::max(low, high), high);
    }

    #[test]
    fn test_serde_is_transparent() {
        let id = ZoneUuid::from_untyped(Uuid::from_u128(7));
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{}\"", id.as_untyped_uuid()));
        let back: ZoneUuid = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }
}
