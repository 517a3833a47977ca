//! Warden Relay Client
//!
//! Wardens submit prepared transactions on behalf of the user. The protocol is
//! JSON-RPC 2.0 over HTTPS POST. Failures carry the chain's error text, from
//! which a program error code is pulled out on a best-effort basis.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use log::{debug, warn};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use solana_sdk::signature::Signature;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crate::error::{ElusivError, Result};

/// Program error raised when the price account is not the expected oracle
pub const INVALID_PRICE_ACCOUNT: u32 = 0x1b;
/// Program error raised when the oracle price is stale or too uncertain
pub const UNUSABLE_PRICE: u32 = 0x1c;

#[derive(Serialize)]
struct RpcRequest<'a, P> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    params: P,
}

#[derive(Deserialize)]
struct RpcResponse<R> {
    result: Option<R>,
    error: Option<RpcErrorBody>,
}

#[derive(Deserialize)]
struct RpcErrorBody {
    code: i64,
    message: String,
}

pub struct WardenClient {
    http: reqwest::Client,
    url: String,
    next_id: AtomicU64,
}

impl WardenClient {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            url: url.into(),
            next_id: AtomicU64::new(1),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// One JSON-RPC call
    pub async fn call<P: Serialize, R: DeserializeOwned>(&self, method: &str, params: P) -> Result<R> {
        let request = RpcRequest {
            jsonrpc: "2.0",
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            method,
            params,
        };
        debug!("Warden call {} (id {})", method, request.id);

        let body = self
            .http
            .post(&self.url)
            .json(&request)
            .send()
            .await?
            .text()
            .await?;

        parse_response(&body).inspect_err(|e| warn!("Warden call {} failed: {}", method, e))
    }

    /// Relay a signed top up transaction, returns its signature
    pub async fn relay_topup(&self, transaction: &[u8]) -> Result<Signature> {
        self.relay("relayTopup", transaction).await
    }

    /// Relay a send (proof and both legs are handled by the warden)
    pub async fn relay_send(&self, transaction: &[u8]) -> Result<Signature> {
        self.relay("relaySend", transaction).await
    }

    async fn relay(&self, method: &str, transaction: &[u8]) -> Result<Signature> {
        let signature: String = self.call(method, [BASE64.encode(transaction)]).await?;
        Signature::from_str(&signature)
            .map_err(|e| ElusivError::Http(format!("warden returned bad signature {signature}: {e}")))
    }
}

/// Decode a response envelope into its result or a relay error
pub fn parse_response<R: DeserializeOwned>(body: &str) -> Result<R> {
    let response: RpcResponse<R> = serde_json::from_str(body)
        .map_err(|e| ElusivError::Http(format!("malformed warden response: {e}")))?;

    if let Some(error) = response.error {
        let program_error = program_error_code(&error.message);
        return Err(ElusivError::Relay {
            code: error.code,
            program_error,
            message: error.message,
            note: program_error.and_then(oracle_note).map(str::to_owned),
        });
    }
    response
        .result
        .ok_or_else(|| ElusivError::Http("warden response has neither result nor error".into()))
}

/// Program error code embedded in chain error text.
///
/// Simulation failures read `custom program error: 0x1b`, on-chain failures
/// read `InstructionError(0, Custom(27))`.
pub fn program_error_code(message: &str) -> Option<u32> {
    const SIMULATION: &str = "custom program error: 0x";
    const ON_CHAIN: &str = "Custom(";

    if let Some(start) = message.find(SIMULATION) {
        let digits = leading(&message[start + SIMULATION.len()..], |c| c.is_ascii_hexdigit());
        return u32::from_str_radix(digits, 16).ok();
    }
    if let Some(start) = message.find("InstructionError") {
        let rest = &message[start..];
        let custom = rest.find(ON_CHAIN)?;
        let digits = leading(&rest[custom + ON_CHAIN.len()..], |c| c.is_ascii_digit());
        return digits.parse().ok();
    }
    None
}

fn leading(s: &str, accept: impl Fn(char) -> bool) -> &str {
    let end = s.find(|c| !accept(c)).unwrap_or(s.len());
    &s[..end]
}

fn oracle_note(code: u32) -> Option<&'static str> {
    match code {
        INVALID_PRICE_ACCOUNT => Some("the price account passed to the program is not the token's oracle"),
        UNUSABLE_PRICE => Some("the oracle price is stale or too uncertain, try again shortly"),
        _ => None,
    }
}
