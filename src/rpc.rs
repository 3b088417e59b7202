//! JSON-RPC client for gateway and relay nodes
//!
//! Speaks the Bitcoin-style HTTP JSON-RPC dialect: a POST with basic auth,
//! a `{method, params}` body, and a `{result, error}` envelope back. One
//! shared client carries the connection pool and the per-request timeout.

use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

use crate::config::{GatewayEndpoint, RelayEndpoint};
use crate::types::{NetworkInfo, RawPeerInfo};

/// Why a gateway could not be read this cycle
#[derive(Debug, Error)]
pub enum RpcError {
    /// Connection refused, timeout, DNS failure, non-2xx status
    #[error("transport failure: {0}")]
    Transport(#[from] reqwest::Error),

    /// The response decoded but did not have the shape we asked for
    #[error("malformed RPC response: {0}")]
    Malformed(String),

    /// The node answered with an RPC-level error object
    #[error("rpc error from node: {0}")]
    Node(String),
}

#[derive(Debug, Deserialize)]
struct RpcEnvelope {
    #[serde(default)]
    result: Value,
    #[serde(default)]
    error: Value,
}

fn request_body(method: &str) -> Value {
    serde_json::json!({ "method": method, "params": [] })
}

/// HTTP JSON-RPC client shared by every fetch task in a cycle
#[derive(Debug, Clone)]
pub struct GatewayClient {
    http: reqwest::Client,
}

impl GatewayClient {
    /// Build a client whose requests all time out after `timeout`.
    pub fn new(timeout: Duration) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { http })
    }

    async fn call(
        &self,
        addr: &str,
        username: &str,
        password: &str,
        method: &str,
    ) -> Result<Value, RpcError> {
        let response = self
            .http
            .post(format!("http://{addr}"))
            .basic_auth(username, Some(password))
            .json(&request_body(method))
            .send()
            .await?
            .error_for_status()?;

        let envelope: RpcEnvelope = response.json().await?;
        if !envelope.error.is_null() {
            return Err(RpcError::Node(envelope.error.to_string()));
        }
        Ok(envelope.result)
    }

    /// Fetch the peer table a gateway currently sees.
    ///
    /// Entries without a usable address are dropped here; every other field
    /// decodes leniently and is judged later by the admission checks.
    pub async fn fetch_observed_peers(
        &self,
        gateway: &GatewayEndpoint,
    ) -> Result<Vec<RawPeerInfo>, RpcError> {
        let result = self
            .call(&gateway.addr, &gateway.username, &gateway.password, "getpeerinfo")
            .await?;
        parse_peer_table(&gateway.addr, &result)
    }

    /// Ask a relay for its own protocol version and user agent.
    ///
    /// Failures collapse to `None`; the relay can still count as reachable
    /// without a version answer.
    pub async fn fetch_relay_version(&self, relay: &RelayEndpoint) -> Option<(i64, String)> {
        let result = self
            .call(&relay.addr, &relay.username, &relay.password, "getnetworkinfo")
            .await
            .ok()?;
        let info: NetworkInfo = serde_json::from_value(result).ok()?;
        Some((info.protocolversion, info.subversion))
    }

    /// Probe whether a relay's RPC interface answers at all.
    ///
    /// Reachable means the request completed and the body parsed as JSON.
    /// A node answering with an RPC error object is still alive, so the
    /// envelope content is deliberately not inspected.
    pub async fn probe_relay(&self, relay: &RelayEndpoint) -> bool {
        let sent = self
            .http
            .post(format!("http://{}", relay.addr))
            .basic_auth(&relay.username, Some(&relay.password))
            .json(&request_body("getpeerinfo"))
            .send()
            .await;

        match sent {
            Ok(response) => response.json::<Value>().await.is_ok(),
            Err(_) => false,
        }
    }
}

fn parse_peer_table(gateway: &str, result: &Value) -> Result<Vec<RawPeerInfo>, RpcError> {
    let entries = result
        .as_array()
        .ok_or_else(|| RpcError::Malformed("getpeerinfo result is not an array".to_string()))?;

    let mut peers = Vec::with_capacity(entries.len());
    let mut dropped = 0usize;
    for entry in entries {
        match serde_json::from_value::<RawPeerInfo>(entry.clone()) {
            Ok(peer) => peers.push(peer),
            // no address means nothing to key a registry row on
            Err(_) => dropped += 1,
        }
    }

    if dropped > 0 {
        debug!(
            "gateway {} returned {} peer entries without a usable address",
            gateway, dropped
        );
    }
    Ok(peers)
}
