//! Elusiv Client SDK
//!
//! Rebuilds a wallet's private state from public chain data: which
//! transactions belong to the seed, what the private balance is, which
//! commitments are spendable and where they sit in the commitment tree.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                     CommitmentLifecycle                      │
//! │        active set, merge check, activated commitments        │
//! └───────────────┬──────────────────────────────┬───────────────┘
//!                 │                              │
//!                 ▼                              ▼
//! ┌───────────────────────────────┐  ┌───────────────────────────┐
//! │ HistoryManager                │  │ TreeManager               │
//! │  nonce batches, statuses,     │  │  lookups, openings,       │
//! │  balance (fast / replay)      │──▶  insertion polling        │
//! └───────┬───────────────┬───────┘  └─────────────┬─────────────┘
//!         │               │                        │
//!         ▼               ▼                        ▼
//! ┌───────────────┐ ┌───────────────────┐ ┌───────────────────────┐
//! │ Transaction   │ │ IdentifierFetcher │ │ StorageReader         │
//! │ Cache         │ │  init/finalize    │ │  + ChunkReader        │
//! └───────────────┘ └─────────┬─────────┘ └───────────┬───────────┘
//!                             │                       │
//!                             ▼                       ▼
//!                  ┌──────────────────────────────────────────┐
//!                  │               ChainReader                │
//!                  └──────────────────────────────────────────┘
//! ```
//!
//! Fees are quoted by [`FeeCalculator`] independently of the above; wardens
//! are reached through [`WardenClient`].

pub mod cache;
pub mod chain;
pub mod error;
pub mod fee;
pub mod fetcher;
pub mod history;
pub mod instruction;
pub mod lifecycle;
pub mod price;
pub mod relay;
pub mod token;
pub mod transaction;
pub mod tree;


pub use cache::{NonceSlot, TransactionCache};
pub use chain::{ChainReader, RpcChainReader};
pub use error::{ElusivError, Result};
pub use fee::{Fee, FeeCalculator, ProgramFee, SendInputs};
pub use fetcher::IdentifierFetcher;
pub use history::HistoryManager;
pub use lifecycle::{CommitmentLifecycle, SEND_ARITY, needs_merge};
pub use price::{FixedPriceSource, PriceSource, fetch_price_with_retry};
pub use relay::WardenClient;
pub use token::{TokenInfo, TokenRegistry};
pub use transaction::{ElusivTransaction, TransactionKind, TransactionStatus};
pub use tree::{PollConfig, TreeGeometry, TreeManager};
