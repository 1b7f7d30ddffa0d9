//! Worker node aggregate root and its value types.

use super::{FleetDomainError, NodeId, Resources};
use chrono::{DateTime, Duration, Utc};
use mockable::Clock;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Hostname label limit.
const MAX_NODE_NAME_LENGTH: usize = 63;

/// Number of random bytes in a freshly issued node token.
const TOKEN_BYTES: usize = 32;

/// Validated node name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeName(String);

impl NodeName {
    /// Creates a validated node name.
    ///
    /// The input is trimmed and lowercased. Only characters in `[a-z0-9-]`
    /// are accepted.
    ///
    /// # Errors
    ///
    /// Returns [`FleetDomainError`] when validation fails.
    pub fn new(value: impl Into<String>) -> Result<Self, FleetDomainError> {
        let normalized = value.into().trim().to_ascii_lowercase();

        if normalized.is_empty() {
            return Err(FleetDomainError::EmptyNodeName);
        }

        let is_valid = normalized.chars().all(|character| {
            character.is_ascii_lowercase() || character.is_ascii_digit() || character == '-'
        });
        if !is_valid {
            return Err(FleetDomainError::InvalidNodeName(normalized));
        }

        if normalized.len() > MAX_NODE_NAME_LENGTH {
            return Err(FleetDomainError::NodeNameTooLong(normalized));
        }

        Ok(Self(normalized))
    }

    /// Returns the node name as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeName {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.as_str())
    }
}

/// Network address of a node, reachable from the bastion.
///
/// Accepts `host`, `host:port`, and `[v6]:port`. The port, when present, is
/// the node's SSH port.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct NodeAddress {
    host: String,
    ssh_port: Option<u16>,
}

impl NodeAddress {
    /// Parses a node address.
    ///
    /// # Errors
    ///
    /// Returns [`FleetDomainError::EmptyNodeAddress`] for blank input and
    /// [`FleetDomainError::InvalidNodeAddress`] when the host or port is
    /// malformed.
    pub fn parse(value: &str) -> Result<Self, FleetDomainError> {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return Err(FleetDomainError::EmptyNodeAddress);
        }
        let invalid = || FleetDomainError::InvalidNodeAddress(trimmed.to_owned());

        let (host, port) = if let Some(rest) = trimmed.strip_prefix('[') {
            let (host, tail) = rest.split_once(']').ok_or_else(invalid)?;
            match tail.strip_prefix(':') {
                Some(port) => (host, Some(port)),
                None if tail.is_empty() => (host, None),
                None => return Err(invalid()),
            }
        } else {
            match trimmed.split_once(':') {
                Some((host, port)) if !port.contains(':') => (host, Some(port)),
                Some(_) => return Err(invalid()),
                None => (trimmed, None),
            }
        };

        if host.is_empty() || host.chars().any(char::is_whitespace) {
            return Err(invalid());
        }
        let ssh_port = port
            .map(|raw| raw.parse::<u16>().ok().filter(|port| *port != 0))
            .map(|parsed| parsed.ok_or_else(invalid))
            .transpose()?;

        Ok(Self {
            host: host.to_owned(),
            ssh_port,
        })
    }

    /// Returns the host part.
    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Returns the explicit SSH port, if one was given.
    #[must_use]
    pub const fn ssh_port(&self) -> Option<u16> {
        self.ssh_port
    }

    /// Returns the SSH port, falling back to `default_port`.
    #[must_use]
    pub fn ssh_port_or(&self, default_port: u16) -> u16 {
        self.ssh_port.unwrap_or(default_port)
    }
}

impl fmt::Display for NodeAddress {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        let bracketed = self.host.contains(':');
        match (bracketed, self.ssh_port) {
            (true, Some(port)) => write!(formatter, "[{}]:{port}", self.host),
            (false, Some(port)) => write!(formatter, "{}:{port}", self.host),
            (_, None) => formatter.write_str(&self.host),
        }
    }
}

impl TryFrom<String> for NodeAddress {
    type Error = FleetDomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<NodeAddress> for String {
    fn from(value: NodeAddress) -> Self {
        value.to_string()
    }
}

/// Plaintext bearer token presented by a node agent.
///
/// Only issued once; the registry keeps its [`NodeTokenDigest`].
#[derive(Clone, PartialEq, Eq)]
pub struct NodeToken(String);

impl NodeToken {
    /// Issues a fresh random token.
    #[must_use]
    pub fn generate() -> Self {
        let mut bytes = [0_u8; TOKEN_BYTES];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(hex::encode(bytes))
    }

    /// Wraps a token received from a caller.
    #[must_use]
    pub fn from_bearer(value: impl Into<String>) -> Self {
        Self(value.into().trim().to_owned())
    }

    /// Returns the token text.
    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }

    /// Returns the storage digest of this token.
    #[must_use]
    pub fn digest(&self) -> NodeTokenDigest {
        NodeTokenDigest(hex::encode(Sha256::digest(self.0.as_bytes())))
    }
}

impl fmt::Debug for NodeToken {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str("NodeToken(<redacted>)")
    }
}

/// SHA-256 digest of a node token, hex encoded.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeTokenDigest(String);

impl NodeTokenDigest {
    /// Returns the digest as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Whether a heartbeat arrived in order relative to earlier reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportOrdering {
    /// The report is the newest seen from this node.
    Fresh,
    /// An equal or newer report was already accepted.
    Stale,
}

/// Worker node aggregate root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    id: NodeId,
    name: NodeName,
    address: NodeAddress,
    token_digest: NodeTokenDigest,
    capacity: Resources,
    online: bool,
    last_seen: Option<DateTime<Utc>>,
    last_report_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    #[serde(default)]
    revision: u64,
}

/// Parameter object for reconstructing persisted node state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersistedNodeData {
    /// Persisted node identifier.
    pub id: NodeId,
    /// Persisted node name.
    pub name: NodeName,
    /// Persisted network address.
    pub address: NodeAddress,
    /// Persisted token digest.
    pub token_digest: NodeTokenDigest,
    /// Persisted capacity.
    pub capacity: Resources,
    /// Persisted liveness flag.
    pub online: bool,
    /// Persisted last heartbeat receipt time.
    pub last_seen: Option<DateTime<Utc>>,
    /// Persisted timestamp of the newest accepted report.
    pub last_report_at: Option<DateTime<Utc>>,
    /// Persisted creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Persisted update timestamp.
    pub updated_at: DateTime<Utc>,
    /// Persisted write revision.
    pub revision: u64,
}

impl Node {
    /// Provisions a new node record and issues its token.
    ///
    /// The node starts offline; it comes online on its first registration
    /// or heartbeat.
    #[must_use]
    pub fn provision(
        name: NodeName,
        address: NodeAddress,
        capacity: Resources,
        clock: &impl Clock,
    ) -> (Self, NodeToken) {
        let token = NodeToken::generate();
        let timestamp = clock.utc();
        let node = Self {
            id: NodeId::new(),
            name,
            address,
            token_digest: token.digest(),
            capacity,
            online: false,
            last_seen: None,
            last_report_at: None,
            created_at: timestamp,
            updated_at: timestamp,
            revision: 0,
        };
        (node, token)
    }

    /// Reconstructs a node from persistence.
    #[must_use]
    pub fn from_persisted(data: PersistedNodeData) -> Self {
        Self {
            id: data.id,
            name: data.name,
            address: data.address,
            token_digest: data.token_digest,
            capacity: data.capacity,
            online: data.online,
            last_seen: data.last_seen,
            last_report_at: data.last_report_at,
            created_at: data.created_at,
            updated_at: data.updated_at,
            revision: data.revision,
        }
    }

    /// Returns the node identifier.
    #[must_use]
    pub const fn id(&self) -> NodeId {
        self.id
    }

    /// Returns the node name.
    #[must_use]
    pub const fn name(&self) -> &NodeName {
        &self.name
    }

    /// Returns the node address.
    #[must_use]
    pub const fn address(&self) -> &NodeAddress {
        &self.address
    }

    /// Returns the stored token digest.
    #[must_use]
    pub const fn token_digest(&self) -> &NodeTokenDigest {
        &self.token_digest
    }

    /// Returns the node capacity.
    #[must_use]
    pub const fn capacity(&self) -> Resources {
        self.capacity
    }

    /// Returns whether the node is currently considered online.
    #[must_use]
    pub const fn is_online(&self) -> bool {
        self.online
    }

    /// Returns the last time the registry heard from the node.
    #[must_use]
    pub const fn last_seen(&self) -> Option<DateTime<Utc>> {
        self.last_seen
    }

    /// Returns the creation timestamp.
    #[must_use]
    pub const fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Returns the latest update timestamp.
    #[must_use]
    pub const fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    /// Returns the write revision this copy was read at.
    ///
    /// Repositories reject an update whose revision no longer matches the
    /// stored one.
    #[must_use]
    pub const fn revision(&self) -> u64 {
        self.revision
    }

    /// Moves the copy to the next revision once it has been stored.
    pub const fn advance_revision(&mut self) {
        self.revision = self.revision.wrapping_add(1);
    }

    /// Records a registration call, refreshing capacity and liveness.
    pub fn record_registration(&mut self, capacity: Resources, clock: &impl Clock) {
        self.capacity = capacity;
        self.mark_seen(clock);
    }

    /// Records a heartbeat stamped `reported_at` by the node.
    ///
    /// Liveness always follows the registry clock. The node's own timestamp
    /// only orders reports: an older or equal timestamp is [`ReportOrdering::Stale`].
    pub fn record_heartbeat(
        &mut self,
        reported_at: DateTime<Utc>,
        clock: &impl Clock,
    ) -> ReportOrdering {
        self.mark_seen(clock);
        match self.last_report_at {
            Some(previous) if reported_at <= previous => ReportOrdering::Stale,
            _ => {
                self.last_report_at = Some(reported_at);
                ReportOrdering::Fresh
            }
        }
    }

    /// Returns whether the node has been silent for longer than `timeout`.
    #[must_use]
    pub fn is_silent_for(&self, now: DateTime<Utc>, timeout: Duration) -> bool {
        self.last_seen
            .is_none_or(|last_seen| now.signed_duration_since(last_seen) > timeout)
    }

    /// Marks the node offline when it has been silent beyond `timeout`.
    ///
    /// Returns `true` when the flag flipped.
    pub fn sweep(&mut self, timeout: Duration, clock: &impl Clock) -> bool {
        let now = clock.utc();
        if !self.online || !self.is_silent_for(now, timeout) {
            return false;
        }
        self.online = false;
        self.updated_at = now;
        true
    }

    fn mark_seen(&mut self, clock: &impl Clock) {
        let now = clock.utc();
        self.online = true;
        self.last_seen = Some(now);
        self.updated_at = now;
    }
}
