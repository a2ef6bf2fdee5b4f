//! Typed access to an injected Avalanche wallet (Core or any EIP-1193
//! provider): raw RPC wrappers, the bound [`WalletClient`] facade, and the
//! event stream the wallet pushes.

mod client;
mod error;
pub mod methods;
mod provider;

pub use client::{TransactionRequest, WalletClient};
pub use error::{RpcError, UNRECOGNIZED_CHAIN, USER_REJECTED};
pub use methods::{AccountPubKey, ChainDefinition, EthereumChainInfo, PChainTxKind, UnsignedPChainTx};
pub use provider::{WalletEvent, WalletProvider, parse_chain_id};

#[cfg(any(test, feature = "testing"))]
pub use provider::ScriptedProvider;
