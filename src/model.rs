// Copyright 2025 Google LLC
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     https://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Model types for upload requests: object metadata and access control.

use crate::options::USER_META_PREFIX;
use std::collections::HashMap;

/// The metadata attached to an uploaded object.
///
/// Standard fields map to well-known HTTP headers. User-defined metadata is
/// an open-ended string map; only entries whose key starts with
/// [`x-kss-meta-`][crate::options::USER_META_PREFIX] are transmitted.
///
/// # Example
/// ```
/// use ks3_client::model::ObjectMetadata;
/// let metadata = ObjectMetadata::new()
///     .set_content_type("text/plain")
///     .set_cache_control("max-age=3600")
///     .set_user_metadata("x-kss-meta-owner", "team-storage");
/// assert_eq!(metadata.content_type(), Some("text/plain"));
/// ```
#[derive(Clone, Debug, Default)]
pub struct ObjectMetadata {
    content_type: Option<String>,
    cache_control: Option<String>,
    content_disposition: Option<String>,
    content_encoding: Option<String>,
    content_length: Option<u64>,
    expires: Option<chrono::DateTime<chrono::Utc>>,
    content_md5: Option<String>,
    user_metadata: HashMap<String, String>,
}

impl ObjectMetadata {
    /// Creates empty metadata.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the `Content-Type` of the object.
    pub fn set_content_type<T: Into<String>>(mut self, v: T) -> Self {
        self.content_type = Some(v.into());
        self
    }

    /// Sets the `Cache-Control` directive served with the object.
    pub fn set_cache_control<T: Into<String>>(mut self, v: T) -> Self {
        self.cache_control = Some(v.into());
        self
    }

    /// Sets the `Content-Disposition` served with the object.
    pub fn set_content_disposition<T: Into<String>>(mut self, v: T) -> Self {
        self.content_disposition = Some(v.into());
        self
    }

    /// Sets the `Content-Encoding` of the uploaded data.
    pub fn set_content_encoding<T: Into<String>>(mut self, v: T) -> Self {
        self.content_encoding = Some(v.into());
        self
    }

    /// Declares the number of bytes in the upload.
    ///
    /// Strongly recommended for stream-sourced uploads: without it the size
    /// ceiling cannot be validated up front and the service must accept a
    /// length-unknown body.
    pub fn set_content_length(mut self, v: u64) -> Self {
        self.content_length = Some(v);
        self
    }

    /// Sets the `Expires` timestamp served with the object.
    pub fn set_expires(mut self, v: chrono::DateTime<chrono::Utc>) -> Self {
        self.expires = Some(v);
        self
    }

    /// Sets a precomputed `Content-MD5` value, base64-encoded.
    ///
    /// When set, the client does not compute a digest of its own and sends
    /// this value verbatim.
    pub fn set_content_md5<T: Into<String>>(mut self, v: T) -> Self {
        self.content_md5 = Some(v.into());
        self
    }

    /// Adds a user-defined metadata entry.
    pub fn set_user_metadata<K, V>(mut self, key: K, value: V) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.user_metadata.insert(key.into(), value.into());
        self
    }

    /// The content type, if set.
    pub fn content_type(&self) -> Option<&str> {
        self.content_type.as_deref()
    }

    /// The cache control directive, if set.
    pub fn cache_control(&self) -> Option<&str> {
        self.cache_control.as_deref()
    }

    /// The content disposition, if set.
    pub fn content_disposition(&self) -> Option<&str> {
        self.content_disposition.as_deref()
    }

    /// The content encoding, if set.
    pub fn content_encoding(&self) -> Option<&str> {
        self.content_encoding.as_deref()
    }

    /// The declared content length, if set.
    pub fn content_length(&self) -> Option<u64> {
        self.content_length
    }

    /// The expiry timestamp, if set.
    pub fn expires(&self) -> Option<chrono::DateTime<chrono::Utc>> {
        self.expires
    }

    /// The base64-encoded content MD5, if set.
    pub fn content_md5(&self) -> Option<&str> {
        self.content_md5.as_deref()
    }

    /// All user-defined metadata entries, transmitted or not.
    pub fn user_metadata(&self) -> &HashMap<String, String> {
        &self.user_metadata
    }

    /// The user-metadata entries eligible for transmission, in a
    /// deterministic order.
    pub(crate) fn transmitted_user_metadata(&self) -> Vec<(&str, &str)> {
        let mut entries: Vec<_> = self
            .user_metadata
            .iter()
            .filter(|(k, _)| k.starts_with(USER_META_PREFIX))
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();
        entries.sort_unstable_by_key(|(k, _)| *k);
        entries
    }
}

/// A named, predefined access preset recognized by the service.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub enum CannedAcl {
    /// Only the owner has access.
    Private,
    /// Anyone can read, only the owner can write.
    PublicRead,
    /// Anyone can read and write.
    PublicReadWrite,
}

impl CannedAcl {
    /// The wire value sent in the `x-kss-acl` header.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Private => "private",
            Self::PublicRead => "public-read",
            Self::PublicReadWrite => "public-read-write",
        }
    }
}

impl std::fmt::Display for CannedAcl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The permission level conferred by a [Grant].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub enum Permission {
    /// Read the object data.
    Read,
    /// Overwrite the object.
    Write,
    /// Read the object ACL.
    ReadAcp,
    /// Modify the object ACL.
    WriteAcp,
    /// All of the above.
    FullControl,
}

impl Permission {
    /// All permission levels, in the fixed order used for header emission.
    pub const ALL: [Permission; 5] = [
        Permission::Read,
        Permission::Write,
        Permission::ReadAcp,
        Permission::WriteAcp,
        Permission::FullControl,
    ];

    /// The header carrying grants at this permission level.
    pub fn header_name(&self) -> &'static str {
        match self {
            Self::Read => "x-kss-grant-read",
            Self::Write => "x-kss-grant-write",
            Self::ReadAcp => "x-kss-grant-read-acp",
            Self::WriteAcp => "x-kss-grant-write-acp",
            Self::FullControl => "x-kss-grant-full-control",
        }
    }
}

/// The identity receiving a [Grant].
#[derive(Clone, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub enum Grantee {
    /// A user, identified by account id.
    Id(String),
    /// A predefined group, identified by URI.
    Uri(String),
}

impl Grantee {
    /// Convenience constructor for user grants.
    pub fn id<T: Into<String>>(v: T) -> Self {
        Self::Id(v.into())
    }

    /// Convenience constructor for group grants.
    pub fn uri<T: Into<String>>(v: T) -> Self {
        Self::Uri(v.into())
    }

    pub(crate) fn header_value(&self) -> String {
        match self {
            Self::Id(id) => format!("id=\"{id}\""),
            Self::Uri(uri) => format!("uri=\"{uri}\""),
        }
    }
}

/// An explicit access rule: one grantee at one permission level.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Grant {
    /// The identity receiving access.
    pub grantee: Grantee,
    /// The level of access granted.
    pub permission: Permission,
}

impl Grant {
    /// Creates a grant.
    pub fn new(grantee: Grantee, permission: Permission) -> Self {
        Self {
            grantee,
            permission,
        }
    }
}

/// An explicit list of access grants, independent of any canned policy.
///
/// A request may carry both a canned policy and an explicit grant list; the
/// two are independent header groups and both are emitted. How the service
/// reconciles the overlap is outside this client's knowledge.
///
/// # Example
/// ```
/// use ks3_client::model::{AccessControlList, Grant, Grantee, Permission};
/// let acl = AccessControlList::new()
///     .add_grant(Grant::new(Grantee::id("1234"), Permission::Read))
///     .add_grant(Grant::new(Grantee::id("5678"), Permission::Read));
/// let headers = acl.to_headers();
/// assert_eq!(
///     headers,
///     vec![("x-kss-grant-read".to_string(), r#"id="1234", id="5678""#.to_string())]
/// );
/// ```
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AccessControlList {
    grants: Vec<Grant>,
}

impl AccessControlList {
    /// Creates an empty grant list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a grant, preserving insertion order.
    pub fn add_grant(mut self, grant: Grant) -> Self {
        self.grants.push(grant);
        self
    }

    /// The grants in insertion order.
    pub fn grants(&self) -> &[Grant] {
        &self.grants
    }

    /// True if no grants are present.
    pub fn is_empty(&self) -> bool {
        self.grants.is_empty()
    }

    /// Translates the grants into one header per permission level.
    ///
    /// Permission levels appear in the fixed [Permission::ALL] order, and
    /// grantees within a level keep their insertion order, so the result is
    /// deterministic for a given list.
    pub fn to_headers(&self) -> Vec<(String, String)> {
        Permission::ALL
            .iter()
            .filter_map(|permission| {
                let grantees: Vec<_> = self
                    .grants
                    .iter()
                    .filter(|g| g.permission == *permission)
                    .map(|g| g.grantee.header_value())
                    .collect();
                if grantees.is_empty() {
                    return None;
                }
                Some((permission.header_name().to_string(), grantees.join(", ")))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metadata_accessors() {
        let expires = chrono::Utc::now();
        let metadata = ObjectMetadata::new()
            .set_content_type("text/plain")
            .set_cache_control("max-age=3600")
            .set_content_disposition("attachment")
            .set_content_encoding("gzip")
            .set_content_length(42)
            .set_expires(expires)
            .set_content_md5("1B2M2Y8AsgTpgAmY7PhCfg==")
            .set_user_metadata("x-kss-meta-owner", "team-storage");
        assert_eq!(metadata.content_type(), Some("text/plain"));
        assert_eq!(metadata.cache_control(), Some("max-age=3600"));
        assert_eq!(metadata.content_disposition(), Some("attachment"));
        assert_eq!(metadata.content_encoding(), Some("gzip"));
        assert_eq!(metadata.content_length(), Some(42));
        assert_eq!(metadata.expires(), Some(expires));
        assert_eq!(metadata.content_md5(), Some("1B2M2Y8AsgTpgAmY7PhCfg=="));
        assert_eq!(metadata.user_metadata().len(), 1);
    }

    #[test]
    fn user_metadata_prefix_filter() {
        let metadata = ObjectMetadata::new()
            .set_user_metadata("x-kss-meta-b", "2")
            .set_user_metadata("x-kss-meta-a", "1")
            .set_user_metadata("unprefixed", "dropped");
        let got = metadata.transmitted_user_metadata();
        assert_eq!(got, vec![("x-kss-meta-a", "1"), ("x-kss-meta-b", "2")]);
        // The unprefixed entry is skipped for transmission but not removed.
        assert_eq!(metadata.user_metadata().len(), 3);
    }

    #[test]
    fn canned_acl_wire_values() {
        assert_eq!(CannedAcl::Private.to_string(), "private");
        assert_eq!(CannedAcl::PublicRead.to_string(), "public-read");
        assert_eq!(CannedAcl::PublicReadWrite.to_string(), "public-read-write");
    }

    #[test]
    fn grants_group_by_permission() {
        let acl = AccessControlList::new()
            .add_grant(Grant::new(Grantee::id("5678"), Permission::FullControl))
            .add_grant(Grant::new(Grantee::id("1234"), Permission::Read))
            .add_grant(Grant::new(
                Grantee::uri("http://acs.ksyun.com/groups/global/AllUsers"),
                Permission::Read,
            ));
        let headers = acl.to_headers();
        assert_eq!(
            headers,
            vec![
                (
                    "x-kss-grant-read".to_string(),
                    r#"id="1234", uri="http://acs.ksyun.com/groups/global/AllUsers""#.to_string()
                ),
                (
                    "x-kss-grant-full-control".to_string(),
                    r#"id="5678""#.to_string()
                ),
            ]
        );
    }

    #[test]
    fn empty_acl_emits_nothing() {
        let acl = AccessControlList::new();
        assert!(acl.is_empty());
        assert!(acl.to_headers().is_empty());
    }
}
