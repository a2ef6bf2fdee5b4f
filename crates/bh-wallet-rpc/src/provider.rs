use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::broadcast;

use crate::error::RpcError;

/// Events pushed by the wallet outside of any request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WalletEvent {
    AccountsChanged(Vec<String>),
    ChainChanged(u64),
}

impl WalletEvent {
    /// Builds an event from the raw `accountsChanged` / `chainChanged`
    /// payload a wallet emits.
    pub fn from_raw(name: &str, payload: &Value) -> Result<Self, RpcError> {
        match name {
            "accountsChanged" => {
                let accounts = payload
                    .as_array()
                    .ok_or_else(|| RpcError::invalid_response(name, "expected an array"))?
                    .iter()
                    .filter_map(|value| value.as_str().map(ToOwned::to_owned))
                    .collect();
                Ok(Self::AccountsChanged(accounts))
            }
            "chainChanged" => Ok(Self::ChainChanged(parse_chain_id(name, payload)?)),
            other => Err(RpcError::InvalidArgument(format!("unknown wallet event {other}"))),
        }
    }
}

/// Chain ids arrive as `0xa869`, `"43113"` or a bare number depending on the
/// wallet.
pub fn parse_chain_id(method: &str, value: &Value) -> Result<u64, RpcError> {
    if let Some(number) = value.as_u64() {
        return Ok(number);
    }

    let raw = value
        .as_str()
        .ok_or_else(|| RpcError::invalid_response(method, format!("chain id {value} is not a string or number")))?
        .trim();

    let parsed = match raw.strip_prefix("0x").or_else(|| raw.strip_prefix("0X")) {
        Some(hex_digits) => u64::from_str_radix(hex_digits, 16),
        None => raw.parse::<u64>(),
    };
    parsed.map_err(|_| RpcError::invalid_response(method, format!("chain id {raw} is not numeric")))
}

/// The wallet's injected EIP-1193 surface.
///
/// `request` is the only way to talk to the wallet; `subscribe` hands out a
/// fresh receiver of wallet-originated events. Dropping the receiver is how a
/// listener unregisters.
#[async_trait]
pub trait WalletProvider: Send + Sync {
    async fn request(&self, method: &str, params: Value) -> Result<Value, RpcError>;
    fn subscribe(&self) -> broadcast::Receiver<WalletEvent>;
}

#[cfg(any(test, feature = "testing"))]
pub use scripted::ScriptedProvider;

#[cfg(any(test, feature = "testing"))]
mod scripted {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// In-process wallet with canned responses per method.
    pub struct ScriptedProvider {
        responses: Mutex<HashMap<String, Result<Value, RpcError>>>,
        calls: Mutex<Vec<(String, Value)>>,
        events: broadcast::Sender<WalletEvent>,
    }

    impl Default for ScriptedProvider {
        fn default() -> Self {
            let (events, _) = broadcast::channel(32);
            Self {
                responses: Mutex::new(HashMap::new()),
                calls: Mutex::new(Vec::new()),
                events,
            }
        }
    }

    impl ScriptedProvider {
        pub fn respond(&self, method: &str, value: Value) -> &Self {
            self.responses
                .lock()
                .expect("responses lock")
                .insert(method.to_owned(), Ok(value));
            self
        }

        pub fn fail(&self, method: &str, code: i64, message: &str) -> &Self {
            self.responses
                .lock()
                .expect("responses lock")
                .insert(method.to_owned(), Err(RpcError::rejected(method, code, message)));
            self
        }

        pub fn calls(&self) -> Vec<(String, Value)> {
            self.calls.lock().expect("calls lock").clone()
        }

        pub fn call_count(&self, method: &str) -> usize {
            self.calls
                .lock()
                .expect("calls lock")
                .iter()
                .filter(|(name, _)| name == method)
                .count()
        }

        pub fn emit(&self, event: WalletEvent) -> usize {
            self.events.send(event).unwrap_or(0)
        }

        pub fn listener_count(&self) -> usize {
            self.events.receiver_count()
        }
    }

    #[async_trait]
    impl WalletProvider for ScriptedProvider {
        async fn request(&self, method: &str, params: Value) -> Result<Value, RpcError> {
            self.calls
                .lock()
                .expect("calls lock")
                .push((method.to_owned(), params));
            self.responses
                .lock()
                .expect("responses lock")
                .get(method)
                .cloned()
                .unwrap_or_else(|| Err(RpcError::rejected(method, -32601, "method not scripted")))
        }

        fn subscribe(&self) -> broadcast::Receiver<WalletEvent> {
            self.events.subscribe()
        }
    }
}
