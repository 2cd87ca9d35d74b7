//! Read-only views of the branch and member directories.
//!
//! The real directories live outside this crate; everything here talks to them
//! through [`BranchDirectory`] and [`MemberDirectory`]. A returned error means
//! the directory could not be reached, not that the lookup came up empty.

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};

use branchpass_config::{BranchEntry, EndpointEntry, MemberEntry};
use branchpass_token::{BranchRef, MemberAttributes};
use subtle::ConstantTimeEq;
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DirectoryError {
    #[error("directory unavailable: {0}")]
    Unavailable(String),
}

/// A published `(ip, port)` pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Endpoint {
    pub ip: IpAddr,
    pub port: u16,
}

impl Endpoint {
    pub fn new(ip: IpAddr, port: u16) -> Self {
        Self { ip, port }
    }

    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.ip, self.port)
    }
}

impl From<EndpointEntry> for Endpoint {
    fn from(entry: EndpointEntry) -> Self {
        Self::new(entry.ip, entry.port)
    }
}

/// Which published endpoint pair to use for outbound redirects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointKind {
    Internal,
    /// NAT / public address.
    Public,
}

impl EndpointKind {
    pub fn select(use_public: bool) -> Self {
        if use_public {
            EndpointKind::Public
        } else {
            EndpointKind::Internal
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Branch {
    pub id: i64,
    pub name: String,
    pub headquarters: bool,
    pub internal: Option<Endpoint>,
    pub public: Option<Endpoint>,
}

impl Branch {
    pub fn branch_ref(&self) -> BranchRef {
        BranchRef::new(self.id, self.name.clone())
    }

    pub fn endpoint(&self, kind: EndpointKind) -> Option<Endpoint> {
        match kind {
            EndpointKind::Internal => self.internal,
            EndpointKind::Public => self.public,
        }
    }

    /// True if either published endpoint is `(ip, port)`.
    pub fn publishes(&self, ip: IpAddr, port: u16) -> bool {
        let wanted = Endpoint::new(ip, port);
        self.internal == Some(wanted) || self.public == Some(wanted)
    }
}

impl From<&BranchEntry> for Branch {
    fn from(entry: &BranchEntry) -> Self {
        Self {
            id: entry.id,
            name: entry.name.clone(),
            headquarters: entry.headquarters,
            internal: entry.internal.map(Endpoint::from),
            public: entry.public.map(Endpoint::from),
        }
    }
}

pub trait BranchDirectory: Send + Sync {
    fn branch(&self, id: i64) -> Result<Option<Branch>, DirectoryError>;

    /// The branch publishing `(ip, port)` as its internal or public endpoint.
    fn branch_for_endpoint(&self, ip: IpAddr, port: u16) -> Result<Option<Branch>, DirectoryError>;

    /// The headquarters branch, if one is configured.
    fn headquarters(&self) -> Result<Option<Branch>, DirectoryError>;

    fn is_headquarters(&self, id: i64) -> Result<bool, DirectoryError> {
        Ok(self.branch(id)?.is_some_and(|branch| branch.headquarters))
    }
}

pub trait MemberDirectory: Send + Sync {
    /// Checks `secret` for `user_id` and returns the member's current
    /// attributes. `Ok(None)` means unknown user or wrong secret.
    fn authenticate(
        &self,
        user_id: &str,
        secret: &str,
    ) -> Result<Option<MemberAttributes>, DirectoryError>;

    /// Current attributes for `user_id`, fetched fresh.
    fn attributes(&self, user_id: &str) -> Result<Option<MemberAttributes>, DirectoryError>;
}

/// Branch table held in memory, built from configuration.
#[derive(Debug, Clone, Default)]
pub struct StaticBranchDirectory {
    branches: Vec<Branch>,
}

impl StaticBranchDirectory {
    pub fn new(branches: Vec<Branch>) -> Self {
        Self { branches }
    }

    pub fn from_config(entries: &[BranchEntry]) -> Self {
        Self::new(entries.iter().map(Branch::from).collect())
    }

    fn find(&self, id: i64) -> Option<&Branch> {
        self.branches.iter().find(|branch| branch.id == id)
    }
}

impl BranchDirectory for StaticBranchDirectory {
    fn branch(&self, id: i64) -> Result<Option<Branch>, DirectoryError> {
        Ok(self.find(id).cloned())
    }

    fn branch_for_endpoint(&self, ip: IpAddr, port: u16) -> Result<Option<Branch>, DirectoryError> {
        Ok(self
            .branches
            .iter()
            .find(|branch| branch.publishes(ip, port))
            .cloned())
    }

    fn headquarters(&self) -> Result<Option<Branch>, DirectoryError> {
        Ok(self
            .branches
            .iter()
            .find(|branch| branch.headquarters)
            .cloned())
    }
}

struct MemberRecord {
    secret: String,
    attributes: MemberAttributes,
}

/// Member table held in memory, built from configuration.
///
/// Secrets are compared as stored; hashing policy belongs to whichever
/// directory backs a real deployment.
#[derive(Default)]
pub struct StaticMemberDirectory {
    members: HashMap<String, MemberRecord>,
}

impl StaticMemberDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, secret: impl Into<String>, attributes: MemberAttributes) {
        self.members.insert(
            attributes.user_id.clone(),
            MemberRecord {
                secret: secret.into(),
                attributes,
            },
        );
    }

    /// Builds the member table, taking home branch names from `branches`.
    /// Members whose home branch is missing keep an empty branch name.
    pub fn from_config(entries: &[MemberEntry], branches: &StaticBranchDirectory) -> Self {
        let mut directory = Self::new();
        for entry in entries {
            let home_name = branches
                .find(entry.home_branch_id)
                .map(|branch| branch.name.clone())
                .unwrap_or_default();
            directory.insert(
                entry.secret.clone(),
                MemberAttributes {
                    user_id: entry.user_id.clone(),
                    member_id: entry.member_id,
                    home_branch: BranchRef::new(entry.home_branch_id, home_name),
                    role_level: entry.role_level,
                    role_seq: entry.role_seq,
                    extension: entry.extension.clone(),
                    employment_id: entry.employment_id.clone(),
                    masking: entry.masking,
                    must_change_password: entry.must_change_password,
                },
            );
        }
        directory
    }
}

impl MemberDirectory for StaticMemberDirectory {
    fn authenticate(
        &self,
        user_id: &str,
        secret: &str,
    ) -> Result<Option<MemberAttributes>, DirectoryError> {
        Ok(self
            .members
            .get(user_id)
            .filter(|record| secrets_match(&record.secret, secret))
            .map(|record| record.attributes.clone()))
    }

    fn attributes(&self, user_id: &str) -> Result<Option<MemberAttributes>, DirectoryError> {
        Ok(self
            .members
            .get(user_id)
            .map(|record| record.attributes.clone()))
    }
}

fn secrets_match(stored: &str, presented: &str) -> bool {
    stored.as_bytes().ct_eq(presented.as_bytes()).into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing;

    #[test]
    fn test_branch_for_either_endpoint() {
        let directory = testing::branches();

        let internal = directory
            .branch_for_endpoint("10.0.7.1".parse().unwrap(), 8080)
            .unwrap()
            .unwrap();
        assert_eq!(internal.id, 7);

        let public = directory
            .branch_for_endpoint("203.0.113.7".parse().unwrap(), 443)
            .unwrap()
            .unwrap();
        assert_eq!(public.id, 7);

        assert!(directory
            .branch_for_endpoint("10.0.7.1".parse().unwrap(), 9090)
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_headquarters_lookup() {
        let directory = testing::branches();
        assert!(directory.is_headquarters(0).unwrap());
        assert!(!directory.is_headquarters(5).unwrap());
        assert!(!directory.is_headquarters(99).unwrap());
        assert_eq!(directory.headquarters().unwrap().unwrap().id, 0);
    }

    #[test]
    fn test_authenticate() {
        let members = testing::members();

        let alice = members.authenticate("alice", "alice-pw").unwrap().unwrap();
        assert_eq!(alice.home_branch, BranchRef::new(5, "Busan"));

        assert!(members.authenticate("alice", "wrong").unwrap().is_none());
        assert!(members.authenticate("alice", "alice-p").unwrap().is_none());
        assert!(members.authenticate("nobody", "alice-pw").unwrap().is_none());
    }

    #[test]
    fn test_secrets_match_requires_equal_length() {
        assert!(secrets_match("alice-pw", "alice-pw"));
        assert!(!secrets_match("alice-pw", "alice-pw-and-more"));
        assert!(!secrets_match("alice-pw", ""));
        assert!(!secrets_match("", "x"));
        assert!(secrets_match("", ""));
    }

    #[test]
    fn test_from_config_fills_home_branch_name() {
        let incheon = BranchEntry {
            id: 3,
            name: "Incheon".to_string(),
            headquarters: false,
            internal: None,
            public: None,
        };
        let bob = MemberEntry {
            user_id: "bob".to_string(),
            secret: "pw".to_string(),
            member_id: 9,
            home_branch_id: 3,
            role_level: 4,
            role_seq: 2,
            extension: Some("301".to_string()),
            employment_id: None,
            masking: true,
            must_change_password: false,
        };
        let branches = StaticBranchDirectory::from_config(&[incheon]);
        let members = StaticMemberDirectory::from_config(&[bob], &branches);

        let bob = members.attributes("bob").unwrap().unwrap();
        assert_eq!(bob.home_branch, BranchRef::new(3, "Incheon"));
        assert_eq!(bob.extension.as_deref(), Some("301"));
        assert!(bob.masking);
    }
}
