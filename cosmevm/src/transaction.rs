use std::cmp::min;

use alloy::{
    consensus::{SignableTransaction, TxEip1559, TxEip2930, TxLegacy},
    primitives::{Address, B256, Bytes, PrimitiveSignature, TxKind, U256, keccak256},
};
use k256::ecdsa::{RecoveryId, Signature, SigningKey, VerifyingKey};

use crate::error::EvmError;

/// Type URL of the extension option which marks a chain transaction as carrying an EVM message.
pub const EXTENSION_OPTIONS_ETHEREUM_TX: &str = "/cosmos.evm.vm.v1.ExtensionOptionsEthereumTx";
/// Type URL of [MsgEthereumTx].
pub const MSG_ETHEREUM_TX: &str = "/cosmos.evm.vm.v1.MsgEthereumTx";

/// A secp256k1 signature in its `(r, s, y_parity)` form.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TxSignature {
    pub r: U256,
    pub s: U256,
    pub y_parity: bool,
}

impl TxSignature {
    fn to_alloy(self) -> PrimitiveSignature {
        PrimitiveSignature::new(self.r, self.s, self.y_parity)
    }
}

/// The unsigned core of an EVM transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transaction {
    Legacy(TxLegacy),
    Eip2930(TxEip2930),
    Eip1559(TxEip1559),
}

impl From<TxLegacy> for Transaction {
    fn from(tx: TxLegacy) -> Self {
        Transaction::Legacy(tx)
    }
}

impl From<TxEip2930> for Transaction {
    fn from(tx: TxEip2930) -> Self {
        Transaction::Eip2930(tx)
    }
}

impl From<TxEip1559> for Transaction {
    fn from(tx: TxEip1559) -> Self {
        Transaction::Eip1559(tx)
    }
}

impl Transaction {
    /// The hash which is signed.
    pub fn signature_hash(&self) -> B256 {
        match self {
            Transaction::Legacy(tx) => tx.signature_hash(),
            Transaction::Eip2930(tx) => tx.signature_hash(),
            Transaction::Eip1559(tx) => tx.signature_hash(),
        }
    }

    /// Signs the transaction with `key`. The signature is normalized to a low `s`.
    pub fn sign(self, key: &SigningKey) -> Result<SignedTransaction, EvmError> {
        let (sig, recovery_id) = key
            .sign_prehash_recoverable(self.signature_hash().as_slice())
            .map_err(|e| EvmError::InvalidSigner(e.to_string()))?;
        let (sig, recovery_id) = match sig.normalize_s() {
            Some(normalized) => (
                normalized,
                RecoveryId::new(!recovery_id.is_y_odd(), recovery_id.is_x_reduced()),
            ),
            None => (sig, recovery_id),
        };
        let (r, s) = sig.split_bytes();
        let sig = TxSignature {
            r: U256::from_be_slice(&r),
            s: U256::from_be_slice(&s),
            y_parity: recovery_id.is_y_odd(),
        };
        Ok(match self {
            Transaction::Legacy(tx) => SignedTransaction::Legacy { tx, sig },
            Transaction::Eip2930(tx) => SignedTransaction::Eip2930 { tx, sig },
            Transaction::Eip1559(tx) => SignedTransaction::Eip1559 { tx, sig },
        })
    }
}

/// A [Transaction] plus its signature. The signer is recovered by [SignedTransaction::verify].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignedTransaction {
    Legacy { tx: TxLegacy, sig: TxSignature },
    Eip2930 { tx: TxEip2930, sig: TxSignature },
    Eip1559 { tx: TxEip1559, sig: TxSignature },
}

impl SignedTransaction {
    pub fn signature(&self) -> TxSignature {
        match self {
            SignedTransaction::Legacy { sig, .. }
            | SignedTransaction::Eip2930 { sig, .. }
            | SignedTransaction::Eip1559 { sig, .. } => *sig,
        }
    }

    pub fn transaction(&self) -> Transaction {
        match self {
            SignedTransaction::Legacy { tx, .. } => tx.clone().into(),
            SignedTransaction::Eip2930 { tx, .. } => tx.clone().into(),
            SignedTransaction::Eip1559 { tx, .. } => tx.clone().into(),
        }
    }

    /// The EIP-2718 type byte.
    pub fn tx_type(&self) -> u8 {
        match self {
            SignedTransaction::Legacy { .. } => 0,
            SignedTransaction::Eip2930 { .. } => 1,
            SignedTransaction::Eip1559 { .. } => 2,
        }
    }

    /// The EIP-155 chain id. `None` for legacy transactions without replay protection.
    pub fn chain_id(&self) -> Option<u64> {
        match self {
            SignedTransaction::Legacy { tx, .. } => tx.chain_id,
            SignedTransaction::Eip2930 { tx, .. } => Some(tx.chain_id),
            SignedTransaction::Eip1559 { tx, .. } => Some(tx.chain_id),
        }
    }

    pub fn is_protected(&self) -> bool {
        self.chain_id().is_some()
    }

    pub fn nonce(&self) -> u64 {
        match self {
            SignedTransaction::Legacy { tx, .. } => tx.nonce,
            SignedTransaction::Eip2930 { tx, .. } => tx.nonce,
            SignedTransaction::Eip1559 { tx, .. } => tx.nonce,
        }
    }

    pub fn gas_limit(&self) -> u64 {
        match self {
            SignedTransaction::Legacy { tx, .. } => tx.gas_limit,
            SignedTransaction::Eip2930 { tx, .. } => tx.gas_limit,
            SignedTransaction::Eip1559 { tx, .. } => tx.gas_limit,
        }
    }

    /// The recipient, or `None` for contract creation.
    pub fn to(&self) -> Option<Address> {
        let kind = match self {
            SignedTransaction::Legacy { tx, .. } => tx.to,
            SignedTransaction::Eip2930 { tx, .. } => tx.to,
            SignedTransaction::Eip1559 { tx, .. } => tx.to,
        };
        match kind {
            TxKind::Call(to) => Some(to),
            TxKind::Create => None,
        }
    }

    pub fn value(&self) -> U256 {
        match self {
            SignedTransaction::Legacy { tx, .. } => tx.value,
            SignedTransaction::Eip2930 { tx, .. } => tx.value,
            SignedTransaction::Eip1559 { tx, .. } => tx.value,
        }
    }

    pub fn input(&self) -> &Bytes {
        match self {
            SignedTransaction::Legacy { tx, .. } => &tx.input,
            SignedTransaction::Eip2930 { tx, .. } => &tx.input,
            SignedTransaction::Eip1559 { tx, .. } => &tx.input,
        }
    }

    pub fn is_dynamic_fee(&self) -> bool {
        matches!(self, SignedTransaction::Eip1559 { .. })
    }

    /// The most this transaction pays per gas: the gas price, or the fee cap of a dynamic-fee transaction.
    pub fn max_fee_per_gas(&self) -> U256 {
        match self {
            SignedTransaction::Legacy { tx, .. } => U256::from(tx.gas_price),
            SignedTransaction::Eip2930 { tx, .. } => U256::from(tx.gas_price),
            SignedTransaction::Eip1559 { tx, .. } => U256::from(tx.max_fee_per_gas),
        }
    }

    pub fn max_priority_fee_per_gas(&self) -> Option<U256> {
        match self {
            SignedTransaction::Eip1559 { tx, .. } => Some(U256::from(tx.max_priority_fee_per_gas)),
            _ => None,
        }
    }

    /// The price paid per gas at `base_fee`. A dynamic-fee transaction pays `min(max_fee, base_fee + tip_cap)`; the
    /// others pay their gas price.
    pub fn effective_gas_price(&self, base_fee: Option<U256>) -> U256 {
        match (self.max_priority_fee_per_gas(), base_fee) {
            (Some(tip_cap), Some(base_fee)) => {
                min(self.max_fee_per_gas(), base_fee.saturating_add(tip_cap))
            }
            _ => self.max_fee_per_gas(),
        }
    }

    /// `gas_limit × effective_gas_price`, in wei.
    pub fn fee(&self, base_fee: Option<U256>) -> Option<U256> {
        self.effective_gas_price(base_fee)
            .checked_mul(U256::from(self.gas_limit()))
    }

    /// `gas_limit × max_fee + value`, in wei: the most the sender can spend.
    pub fn cost(&self) -> Option<U256> {
        self.max_fee_per_gas()
            .checked_mul(U256::from(self.gas_limit()))?
            .checked_add(self.value())
    }

    /// keccak256 of the EIP-2718 envelope.
    pub fn hash(&self) -> B256 {
        match self {
            SignedTransaction::Legacy { tx, sig } => *tx.clone().into_signed(sig.to_alloy()).hash(),
            SignedTransaction::Eip2930 { tx, sig } => *tx.clone().into_signed(sig.to_alloy()).hash(),
            SignedTransaction::Eip1559 { tx, sig } => *tx.clone().into_signed(sig.to_alloy()).hash(),
        }
    }

    /// Recovers the signer. Signatures with a high `s` are rejected.
    pub fn recover_signer(&self) -> Result<Address, EvmError> {
        let TxSignature { r, s, y_parity } = self.signature();
        let sig = Signature::from_scalars(r.to_be_bytes::<32>(), s.to_be_bytes::<32>())
            .map_err(|e| EvmError::InvalidSigner(format!("malformed signature: {e}")))?;
        if sig.normalize_s().is_some() {
            return Err(EvmError::InvalidSigner(
                "signature s value is too high".to_owned(),
            ));
        }
        let recovery_id = RecoveryId::new(y_parity, false);
        let key = VerifyingKey::recover_from_prehash(
            self.transaction().signature_hash().as_slice(),
            &sig,
            recovery_id,
        )
        .map_err(|e| EvmError::InvalidSigner(format!("cannot recover signer: {e}")))?;
        Ok(public_key_to_address(&key))
    }

    pub fn verify(self) -> Result<VerifiedTransaction, EvmError> {
        let signer = self.recover_signer()?;
        let hash = self.hash();
        Ok(VerifiedTransaction {
            tx: self,
            signer,
            hash,
        })
    }
}

/// The address of the account controlled by `key`.
pub fn public_key_to_address(key: &VerifyingKey) -> Address {
    let point = key.to_encoded_point(false);
    let hash = keccak256(&point.as_bytes()[1..]);
    Address::from_slice(&hash[12..])
}

/// A [SignedTransaction] whose signer has been recovered and whose hash is cached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedTransaction {
    pub tx: SignedTransaction,
    pub signer: Address,
    pub hash: B256,
}

/// The chain message which wraps an EVM transaction. `from` is the sender the submitter declares; it must match the
/// recovered signer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MsgEthereumTx {
    pub tx: SignedTransaction,
    pub from: Address,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Msg {
    Ethereum(MsgEthereumTx),
    /// A message of another module, identified by its type URL.
    Other(String),
}

impl Msg {
    pub fn type_url(&self) -> &str {
        match self {
            Msg::Ethereum(_) => MSG_ETHEREUM_TX,
            Msg::Other(type_url) => type_url,
        }
    }
}

/// A chain transaction as delivered by consensus.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CosmosTx {
    pub msgs: Vec<Msg>,
    pub memo: String,
    pub timeout_height: u64,
    /// Type URLs of the extension options.
    pub extension_options: Vec<String>,
    pub non_critical_extension_options: Vec<String>,
}

impl CosmosTx {
    /// Wraps a single EVM transaction the way EVM clients submit them.
    pub fn ethereum(tx: SignedTransaction, from: Address) -> CosmosTx {
        CosmosTx {
            msgs: vec![Msg::Ethereum(MsgEthereumTx { tx, from })],
            extension_options: vec![EXTENSION_OPTIONS_ETHEREUM_TX.to_owned()],
            ..CosmosTx::default()
        }
    }
}
