//! Configuration for the attestation engine.

use std::path::PathBuf;
use std::time::Duration;

use crate::claims::DEFAULT_CLAIM_TTL_SECS;
use crate::envelope::{DisclosureLevel, DEFAULT_ENVELOPE_TTL_SECS};
use crate::error::AttestError;

/// Configuration for the attestation engine.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    /// Agent name stamped on claims and envelopes.
    pub agent_id: String,
    /// Agent version stamped on claims and envelopes.
    pub agent_version: String,
    /// Directory holding `signing_key.pem` and `signing_key.pub.pem`.
    pub key_dir: PathBuf,
    /// JSONL evidence log. `None` keeps evidence in memory only.
    pub evidence_log: Option<PathBuf>,
    /// Claim lifetime used when a request does not set one.
    pub claim_ttl: Duration,
    /// Envelope lifetime.
    pub envelope_ttl: Duration,
    /// Disclosure level used when a caller does not pick one.
    pub default_disclosure: DisclosureLevel,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            agent_id: "meridian-agent".into(),
            agent_version: env!("CARGO_PKG_VERSION").into(),
            key_dir: PathBuf::from(".otvp/keys"),
            evidence_log: None,
            claim_ttl: Duration::from_secs(DEFAULT_CLAIM_TTL_SECS), // 24 hours
            envelope_ttl: Duration::from_secs(DEFAULT_ENVELOPE_TTL_SECS), // 24 hours
            default_disclosure: DisclosureLevel::Full,
        }
    }
}

impl EngineConfig {
    /// Defaults overlaid with `OTVP_*` environment variables:
    ///
    /// | Variable | Field |
    /// |----------|-------|
    /// | `OTVP_AGENT_ID` | `agent_id` |
    /// | `OTVP_KEY_DIR` | `key_dir` |
    /// | `OTVP_EVIDENCE_LOG` | `evidence_log` |
    /// | `OTVP_CLAIM_TTL_SECS` | `claim_ttl` |
    /// | `OTVP_ENVELOPE_TTL_SECS` | `envelope_ttl` |
    /// | `OTVP_DISCLOSURE` | `default_disclosure` |
    pub fn from_env() -> Result<Self, AttestError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) with a custom variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, AttestError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(agent_id) = lookup("OTVP_AGENT_ID").filter(|v| !v.trim().is_empty()) {
            config.agent_id = agent_id;
        }
        if let Some(dir) = lookup("OTVP_KEY_DIR").filter(|v| !v.trim().is_empty()) {
            config.key_dir = PathBuf::from(dir);
        }
        if let Some(log) = lookup("OTVP_EVIDENCE_LOG").filter(|v| !v.trim().is_empty()) {
            config.evidence_log = Some(PathBuf::from(log));
        }
        if let Some(secs) = lookup("OTVP_CLAIM_TTL_SECS") {
            config.claim_ttl = parse_ttl("OTVP_CLAIM_TTL_SECS", &secs)?;
        }
        if let Some(secs) = lookup("OTVP_ENVELOPE_TTL_SECS") {
            config.envelope_ttl = parse_ttl("OTVP_ENVELOPE_TTL_SECS", &secs)?;
        }
        if let Some(level) = lookup("OTVP_DISCLOSURE") {
            config.default_disclosure = level.parse()?;
        }

        Ok(config)
    }
}

fn parse_ttl(key: &str, value: &str) -> Result<Duration, AttestError> {
    match value.trim().parse::<u64>() {
        Ok(0) => Err(AttestError::InvalidTtl {
            reason: format!("{key} must be greater than zero"),
        }),
        Ok(secs) => Ok(Duration::from_secs(secs)),
        Err(e) => Err(AttestError::InvalidConfig {
            message: format!("{key}={value:?}: {e}"),
        }),
    }
}
