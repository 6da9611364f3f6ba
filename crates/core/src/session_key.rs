// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Stable per-conversation routing identifier.
//!
//! A SessionKey names one logical conversation regardless of how many agent
//! sessions it cycles through. Canonical serialized form:
//! `agent:{agent}:{platform}:{peerKind}:{peerId}`.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Whether the conversation peer is a single user or a shared channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PeerKind {
    User,
    Channel,
}

impl PeerKind {
    fn as_str(&self) -> &'static str {
        match self {
            PeerKind::User => "user",
            PeerKind::Channel => "channel",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "user" => Some(PeerKind::User),
            "channel" => Some(PeerKind::Channel),
            _ => None,
        }
    }
}

impl fmt::Display for PeerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Errors from parsing or building session keys
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SessionKeyError {
    #[error("session key must start with 'agent:': {0}")]
    MissingPrefix(String),
    #[error("session key must have 5 segments, got {0}")]
    SegmentCount(usize),
    #[error("session key segment '{0}' is empty")]
    EmptySegment(&'static str),
    #[error("unknown peer kind: {0}")]
    UnknownPeerKind(String),
}

/// Stable routing identifier for one conversation.
///
/// Keys are the primary lookup for session-lifecycle state and must
/// round-trip through their serialized form: `parse(build(k)) == k`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionKey {
    pub agent: String,
    pub platform: String,
    pub peer_kind: PeerKind,
    pub peer_id: String,
}

impl SessionKey {
    /// Build a key, rejecting empty segments.
    pub fn new(
        agent: impl Into<String>,
        platform: impl Into<String>,
        peer_kind: PeerKind,
        peer_id: impl Into<String>,
    ) -> Result<Self, SessionKeyError> {
        let key = Self {
            agent: agent.into(),
            platform: platform.into(),
            peer_kind,
            peer_id: peer_id.into(),
        };
        key.validate()?;
        Ok(key)
    }

    fn validate(&self) -> Result<(), SessionKeyError> {
        if self.agent.is_empty() {
            return Err(SessionKeyError::EmptySegment("agent"));
        }
        if self.platform.is_empty() {
            return Err(SessionKeyError::EmptySegment("platform"));
        }
        if self.peer_id.is_empty() {
            return Err(SessionKeyError::EmptySegment("peerId"));
        }
        Ok(())
    }

    /// Canonical serialized form: `agent:{agent}:{platform}:{peerKind}:{peerId}`.
    pub fn build(&self) -> String {
        format!(
            "agent:{}:{}:{}:{}",
            self.agent, self.platform, self.peer_kind, self.peer_id
        )
    }

    /// Parse the canonical form back into a key.
    ///
    /// The peer id is the final segment and may itself contain colons
    /// (platform ids sometimes do), so splitting is bounded at 5 parts.
    pub fn parse(s: &str) -> Result<Self, SessionKeyError> {
        let mut parts = s.splitn(5, ':');
        let prefix = parts.next().unwrap_or_default();
        if prefix != "agent" {
            return Err(SessionKeyError::MissingPrefix(s.to_string()));
        }

        let segments: Vec<&str> = parts.collect();
        if segments.len() != 4 {
            return Err(SessionKeyError::SegmentCount(segments.len() + 1));
        }

        let peer_kind = PeerKind::parse(segments[2])
            .ok_or_else(|| SessionKeyError::UnknownPeerKind(segments[2].to_string()))?;

        Self::new(segments[0], segments[1], peer_kind, segments[3])
    }

    /// Filesystem-safe rendering for log lines and debug output.
    pub fn file_slug(&self) -> String {
        self.build()
            .chars()
            .map(|c| match c {
                'a'..='z' | 'A'..='Z' | '0'..='9' | '-' | '_' => c,
                _ => '-',
            })
            .collect()
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.build())
    }
}

#[cfg(test)]
#[path = "session_key_tests.rs"]
mod tests;
