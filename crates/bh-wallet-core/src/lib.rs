//! Client-side wallet and network state for the Builder Hub.

mod add_chain;
mod bootstrap;
mod networks;
mod state;

pub use add_chain::{AddChainRejected, AddChainRequest, AddChainRequests, PendingAddChain};
pub use bootstrap::{MountedBootstrap, WalletEventBootstrap};
pub use networks::NetworkListStore;
pub use state::{ConnectionStatus, WalletAction, WalletState, WalletStore};
