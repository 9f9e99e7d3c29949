//! Peer identifier parsing.
//!
//! Agents are addressed as
//! `projects/<project>/locations/<region>/(agents|apps)/<id>`, optionally
//! followed by `/deployments/<deployment>` for apps. An externally hosted
//! runtime is addressed by its `ws://` or `wss://` URI instead.

use once_cell::sync::Lazy;
use regex::Regex;
use std::fmt;

use crate::error::ConstructionError;

static PEER_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"projects/(?P<project>[^/]+)/locations/(?P<location>[^/]+)/(?P<namespace>agents|apps)/(?P<agent>[^/\s]+)",
    )
    .expect("peer pattern is valid")
});

static DEPLOYMENT_SUFFIX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"projects/[^/]+/locations/[^/]+/apps/[^/]+/deployments/[^/\s]+$")
        .expect("deployment pattern is valid")
});

static APP_SUFFIX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"projects/[^/]+/locations/[^/]+/apps/[^/\s]+$").expect("app pattern is valid")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Namespace {
    Agents,
    Apps,
}

impl Namespace {
    pub fn as_str(&self) -> &'static str {
        match self {
            Namespace::Agents => "agents",
            Namespace::Apps => "apps",
        }
    }
}

/// A parsed cloud agent path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentPath {
    pub project: String,
    pub location: String,
    pub namespace: Namespace,
    pub agent: String,
    /// The identifier exactly as supplied, trimmed.
    pub raw: String,
}

impl AgentPath {
    /// `projects/<p>/locations/<l>/<namespace>/<id>` without any suffix.
    pub fn base_path(&self) -> String {
        format!(
            "projects/{}/locations/{}/{}/{}",
            self.project,
            self.location,
            self.namespace.as_str(),
            self.agent
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerId {
    Agent(AgentPath),
    /// Externally hosted runtime reachable only over a raw socket.
    External(String),
}

impl PeerId {
    pub fn parse(raw: &str) -> Result<Self, ConstructionError> {
        let trimmed = raw.trim();
        if let Some(caps) = PEER_PATTERN.captures(trimmed) {
            let namespace = match &caps["namespace"] {
                "agents" => Namespace::Agents,
                _ => Namespace::Apps,
            };
            return Ok(PeerId::Agent(AgentPath {
                project: caps["project"].to_string(),
                location: caps["location"].to_string(),
                namespace,
                agent: caps["agent"].to_string(),
                raw: trimmed.to_string(),
            }));
        }
        if is_socket_uri(trimmed) {
            return Ok(PeerId::External(trimmed.to_string()));
        }
        Err(ConstructionError::InvalidPeerId(trimmed.to_string()))
    }

    /// Parse, rejecting the external form.
    pub fn parse_agent(raw: &str) -> Result<AgentPath, ConstructionError> {
        match Self::parse(raw)? {
            PeerId::Agent(path) => Ok(path),
            PeerId::External(uri) => Err(ConstructionError::InvalidPeerId(uri)),
        }
    }

    pub fn namespace(&self) -> Option<Namespace> {
        match self {
            PeerId::Agent(path) => Some(path.namespace),
            PeerId::External(_) => None,
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            PeerId::Agent(path) => &path.raw,
            PeerId::External(uri) => uri,
        }
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub fn is_socket_uri(value: &str) -> bool {
    value.starts_with("ws://") || value.starts_with("wss://")
}

/// Resolve a deployment id against the peer identifier.
///
/// Returns the normalized `(peer, deployment)` pair: a fully qualified
/// deployment path replaces the peer, a bare id is appended to an apps peer.
pub fn resolve_deployment(
    peer: &str,
    deployment: &str,
) -> Result<(String, String), ConstructionError> {
    if let Some(m) = DEPLOYMENT_SUFFIX.find(deployment) {
        let full = m.as_str().to_string();
        return Ok((full.clone(), full));
    }
    if !deployment.contains('/') {
        if let Some(m) = APP_SUFFIX.find(peer.trim()) {
            let full = format!("{}/deployments/{}", m.as_str(), deployment);
            return Ok((full.clone(), full));
        }
    }
    Err(ConstructionError::InvalidDeploymentId(deployment.to_string()))
}
