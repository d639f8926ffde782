use std::{fmt, sync::Arc};

use async_trait::async_trait;
use shared::domain::TransactionId;

use crate::error::WalletError;

/// Contract entrypoints the client invokes through the wallet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContractMethod {
    MintGenerative,
    Mint,
    UpdateGenerative,
}

impl ContractMethod {
    pub fn entrypoint(self) -> &'static str {
        match self {
            ContractMethod::MintGenerative => "mint_issuer",
            ContractMethod::Mint => "mint",
            ContractMethod::UpdateGenerative => "update_issuer",
        }
    }
}

impl fmt::Display for ContractMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.entrypoint())
    }
}

/// Lets a wallet report that the operation was signed and broadcast while
/// the call is still waiting for inclusion.
#[derive(Clone)]
pub struct WalletProgress {
    on_submitted: Arc<dyn Fn(&TransactionId) + Send + Sync>,
}

impl WalletProgress {
    pub fn new(on_submitted: impl Fn(&TransactionId) + Send + Sync + 'static) -> Self {
        Self {
            on_submitted: Arc::new(on_submitted),
        }
    }

    pub fn ignore() -> Self {
        Self::new(|_| {})
    }

    pub fn submitted(&self, transaction: &TransactionId) {
        (self.on_submitted)(transaction);
    }
}

impl fmt::Debug for WalletProgress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WalletProgress").finish_non_exhaustive()
    }
}

#[async_trait]
pub trait Wallet: Send + Sync {
    /// Prompts the user, signs and broadcasts one contract call. Resolves once
    /// the operation is confirmed, or fails with whatever the wallet reports.
    async fn call(
        &self,
        method: ContractMethod,
        arguments: serde_json::Value,
        progress: WalletProgress,
    ) -> Result<TransactionId, WalletError>;
}

/// Stand-in used until a wallet is connected.
pub struct MissingWallet;

#[async_trait]
impl Wallet for MissingWallet {
    async fn call(
        &self,
        method: ContractMethod,
        _arguments: serde_json::Value,
        _progress: WalletProgress,
    ) -> Result<TransactionId, WalletError> {
        Err(WalletError::with_code(
            "NOT_GRANTED_ERROR",
            format!("no wallet connected to call {method}"),
        ))
    }
}
