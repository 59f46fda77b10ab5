//! Client identity for rate limiting
//!
//! Counters are keyed by a SHA-256 digest of stable identity factors. An
//! authenticated user or API key is the identity when present; transport
//! factors only identify anonymous callers. A raw address alone is never a
//! key: callers behind one NAT would share a budget.

use super::context::{Credential, RequestContext, Transport};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct ClientId(String);

impl ClientId {
    /// Derive the id for `ctx`.
    ///
    /// A principal wins, then an API key id. Only anonymous callers are
    /// keyed on transport factors. `trust_client_id_header` mixes the
    /// client-supplied id header into the digest; leave it off unless a
    /// proxy strips that header.
    pub fn derive(ctx: &RequestContext, trust_client_id_header: bool) -> Self {
        let mut factors: Vec<String> = Vec::new();

        if let Some(principal) = &ctx.principal {
            factors.push(format!("principal:{}", principal.id));
        } else if let Some(key_id) = api_key_id(ctx) {
            factors.push(format!("key:{}", key_id));
        } else {
            match &ctx.transport {
                Transport::Http {
                    remote_addr,
                    user_agent,
                    accept_language,
                    client_id_header,
                    trusted_client_id,
                } => {
                    factors.push(format!("ip:{}", remote_addr.as_deref().unwrap_or("unknown")));
                    if let Some(id) = trusted_client_id {
                        factors.push(format!("client:{}", id));
                    } else if trust_client_id_header && let Some(id) = client_id_header {
                        factors.push(format!("client:{}", id));
                    }
                    factors.push(format!("ua:{}", user_agent.as_deref().unwrap_or("")));
                    factors.push(format!("lang:{}", accept_language.as_deref().unwrap_or("")));
                }
                Transport::Cli { pid, ppid, user } => {
                    factors.push("cli".to_string());
                    factors.push(format!("pid:{}", pid));
                    factors.push(format!("ppid:{}", ppid.unwrap_or(0)));
                    factors.push(format!("user:{}", user.as_deref().unwrap_or("")));
                }
                Transport::Unknown => {
                    factors.push("unknown".to_string());
                }
            }
        }

        let digest = Sha256::digest(factors.join("|").as_bytes());
        Self(hex::encode(digest))
    }

    /// Wrap an id that was already derived (e.g. from an operator request)
    pub fn from_raw(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Derived ids are 64 lowercase hex characters
    pub fn is_well_formed(id: &str) -> bool {
        (1..=64).contains(&id.len()) && id.bytes().all(|b| b.is_ascii_hexdigit())
    }

    /// Truncated form for logs: the first 12 characters and `...`
    pub fn short(&self) -> String {
        if self.0.chars().count() > 12 {
            let head: String = self.0.chars().take(12).collect();
            format!("{}...", head)
        } else {
            self.0.clone()
        }
    }
}

fn api_key_id(ctx: &RequestContext) -> Option<&str> {
    ctx.credentials.iter().find_map(|credential| match credential {
        Credential::ApiKey { key_id, .. } => Some(key_id.as_str()),
        _ => None,
    })
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.short())
    }
}
