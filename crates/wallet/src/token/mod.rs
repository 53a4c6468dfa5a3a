//! SLP token bookkeeping: the token type registry, per transaction token info with its
//! validity, and token outputs held by wallet addresses.

pub mod slp;
pub mod validator;

use std::collections::{BTreeMap, HashMap, HashSet};

use serde::{Deserialize, Serialize};
use slpwallet_consensus::{hash256_from_hex, hash256_to_hex, Hash256};
use slpwallet_log::log_debug;
use slpwallet_primitives::{Address, OutPoint, Transaction};

use crate::error::WalletError;
use slp::{SlpBody, SlpMessage, SlpParseError};

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(from = "u16", into = "u16")]
pub enum TokenClass {
    Slp1,
    Slp65,
    Slp129,
    Other(u16),
}

impl TokenClass {
    pub fn token_type(self) -> u16 {
        u16::from(self)
    }

    /// Classes the DAG validator knows how to judge.
    pub fn is_validatable(self) -> bool {
        !matches!(self, TokenClass::Other(_))
    }
}

impl From<u16> for TokenClass {
    fn from(token_type: u16) -> Self {
        match token_type {
            slp::TOKEN_TYPE_FUNGIBLE => TokenClass::Slp1,
            slp::TOKEN_TYPE_NFT1_CHILD => TokenClass::Slp65,
            slp::TOKEN_TYPE_NFT1_GROUP => TokenClass::Slp129,
            other => TokenClass::Other(other),
        }
    }
}

impl From<TokenClass> for u16 {
    fn from(class: TokenClass) -> Self {
        match class {
            TokenClass::Slp1 => slp::TOKEN_TYPE_FUNGIBLE,
            TokenClass::Slp65 => slp::TOKEN_TYPE_NFT1_CHILD,
            TokenClass::Slp129 => slp::TOKEN_TYPE_NFT1_GROUP,
            TokenClass::Other(other) => other,
        }
    }
}

impl std::fmt::Display for TokenClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SLP{}", self.token_type())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MessageType {
    Genesis,
    Mint,
    Send,
    Commit,
}

/// Outcome of DAG validation. The numeric codes are the ones validators report.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum Validity {
    #[default]
    Unknown,
    Valid,
    InvalidMessage,
    InvalidInsufficientInputs,
    InvalidTypeChange,
}

impl Validity {
    pub fn code(self) -> u8 {
        match self {
            Validity::Unknown => 0,
            Validity::Valid => 1,
            Validity::InvalidMessage => 2,
            Validity::InvalidInsufficientInputs => 3,
            Validity::InvalidTypeChange => 4,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(Validity::Unknown),
            1 => Some(Validity::Valid),
            2 => Some(Validity::InvalidMessage),
            3 => Some(Validity::InvalidInsufficientInputs),
            4 => Some(Validity::InvalidTypeChange),
            _ => None,
        }
    }

    pub fn is_invalid(self) -> bool {
        !matches!(self, Validity::Unknown | Validity::Valid)
    }
}

impl TryFrom<u8> for Validity {
    type Error = String;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        Validity::from_code(code).ok_or_else(|| format!("unknown validity code {code}"))
    }
}

impl From<Validity> for u8 {
    fn from(validity: Validity) -> Self {
        validity.code()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Option<u8>", into = "Option<u8>")]
pub enum Decimals {
    Known(u8),
    /// Placeholder until the GENESIS transaction is seen.
    Unknown,
}

impl Decimals {
    pub fn known(self) -> Option<u8> {
        match self {
            Decimals::Known(decimals) => Some(decimals),
            Decimals::Unknown => None,
        }
    }
}

impl From<Option<u8>> for Decimals {
    fn from(value: Option<u8>) -> Self {
        value.map_or(Decimals::Unknown, Decimals::Known)
    }
}

impl From<Decimals> for Option<u8> {
    fn from(value: Decimals) -> Self {
        value.known()
    }
}

/// NFT1 group of a child token; `Pending` until it is looked up.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum GroupId {
    Pending,
    Known(Hash256),
}

impl TryFrom<String> for GroupId {
    type Error = String;

    fn try_from(raw: String) -> Result<Self, Self::Error> {
        if raw == "?" {
            return Ok(GroupId::Pending);
        }
        hash256_from_hex(&raw)
            .map(GroupId::Known)
            .map_err(|err| format!("invalid group id '{raw}': {err}"))
    }
}

impl From<GroupId> for String {
    fn from(group: GroupId) -> Self {
        match group {
            GroupId::Pending => "?".to_string(),
            GroupId::Known(id) => hash256_to_hex(&id),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenTypeRecord {
    pub class: TokenClass,
    pub name: String,
    pub decimals: Decimals,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_id: Option<GroupId>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenTxInfo {
    pub class: TokenClass,
    pub message_type: MessageType,
    #[serde(with = "hex_id")]
    pub token_id: Hash256,
    pub validity: Validity,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TokenQuantity {
    Amount(u64),
    MintBaton,
    /// Output of an unsupported token type.
    Unknown,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenOutput {
    pub class: TokenClass,
    #[serde(with = "hex_id_opt")]
    pub token_id: Option<Hash256>,
    pub quantity: TokenQuantity,
}

impl TokenOutput {
    pub fn is_baton(&self) -> bool {
        self.quantity == TokenQuantity::MintBaton
    }

    pub fn amount(&self) -> u64 {
        match self.quantity {
            TokenQuantity::Amount(amount) => amount,
            TokenQuantity::MintBaton | TokenQuantity::Unknown => 0,
        }
    }
}

/// What the classifier made of a transaction.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Classified {
    /// No token message, or one that failed to parse.
    Plain,
    Unsupported(u16),
    /// COMMIT messages carry no tokens.
    Ignored,
    Token {
        token_id: Hash256,
        message_type: MessageType,
    },
}

/// A transaction ready for DAG validation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ValidationJob {
    pub txid: Hash256,
    pub class: TokenClass,
    pub token_id: Hash256,
}

#[derive(Clone, Debug, Default)]
pub struct TokenState {
    pub(crate) types: BTreeMap<Hash256, TokenTypeRecord>,
    pub(crate) tx_info: HashMap<Hash256, TokenTxInfo>,
    pub(crate) outputs: BTreeMap<Address, BTreeMap<OutPoint, TokenOutput>>,
    pending: HashSet<Hash256>,
    queued: Vec<ValidationJob>,
    enabled: bool,
}

impl TokenState {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            ..Self::default()
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn token_type(&self, token_id: &Hash256) -> Option<&TokenTypeRecord> {
        self.types.get(token_id)
    }

    pub fn token_types(&self) -> impl Iterator<Item = (&Hash256, &TokenTypeRecord)> {
        self.types.iter()
    }

    pub fn tx_info(&self, txid: &Hash256) -> Option<&TokenTxInfo> {
        self.tx_info.get(txid)
    }

    pub fn validity(&self, txid: &Hash256) -> Option<Validity> {
        self.tx_info.get(txid).map(|info| info.validity)
    }

    pub fn output(&self, address: &Address, outpoint: &OutPoint) -> Option<&TokenOutput> {
        self.outputs.get(address)?.get(outpoint)
    }

    pub fn outputs(&self) -> impl Iterator<Item = (&Address, &OutPoint, &TokenOutput)> {
        self.outputs.iter().flat_map(|(address, by_outpoint)| {
            by_outpoint
                .iter()
                .map(move |(outpoint, output)| (address, outpoint, output))
        })
    }

    pub fn is_pending(&self, txid: &Hash256) -> bool {
        self.pending.contains(txid)
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Jobs queued by the last mutations, in the order they were decided.
    pub fn drain_jobs(&mut self) -> Vec<ValidationJob> {
        std::mem::take(&mut self.queued)
    }

    /// Indexes the token outputs of `tx` owned by the wallet and records its token info.
    pub fn classify(
        &mut self,
        txid: Hash256,
        tx: &Transaction,
        is_mine: impl Fn(&Address) -> bool,
    ) -> Classified {
        self.remove_outputs_of(&txid);
        let Some(op_return) = tx.vout.first() else {
            return Classified::Plain;
        };
        let message = match slp::parse(&op_return.script_pubkey) {
            Ok(message) => message,
            Err(SlpParseError::NotSlp) => return Classified::Plain,
            Err(SlpParseError::UnsupportedTokenType(token_type)) => {
                for (index, output) in tx.vout.iter().enumerate() {
                    let Some(address) = Address::from_script_pubkey(&output.script_pubkey) else {
                        continue;
                    };
                    if is_mine(&address) {
                        self.put_output(
                            address,
                            OutPoint::new(txid, index as u32),
                            TokenOutput {
                                class: TokenClass::Other(token_type),
                                token_id: None,
                                quantity: TokenQuantity::Unknown,
                            },
                        );
                    }
                }
                return Classified::Unsupported(token_type);
            }
            Err(SlpParseError::Invalid(reason)) => {
                log_debug!(
                    "tx {} carries an invalid token message: {reason}",
                    hash256_to_hex(&txid)
                );
                return Classified::Plain;
            }
        };

        let class = TokenClass::from(message.token_type);
        let address_at = |index: usize| {
            tx.vout
                .get(index)
                .and_then(|output| Address::from_script_pubkey(&output.script_pubkey))
        };
        let (token_id, message_type) = match &message.body {
            SlpBody::Commit { .. } => return Classified::Ignored,
            SlpBody::Send { token_id, amounts } => {
                for (index, amount) in amounts.iter().enumerate().take(tx.vout.len()) {
                    let index = index + 1;
                    let Some(address) = address_at(index) else {
                        continue;
                    };
                    if *amount > 0 && is_mine(&address) {
                        self.put_output(
                            address,
                            OutPoint::new(txid, index as u32),
                            TokenOutput {
                                class,
                                token_id: Some(*token_id),
                                quantity: TokenQuantity::Amount(*amount),
                            },
                        );
                    }
                }
                (*token_id, MessageType::Send)
            }
            SlpBody::Genesis(genesis) => {
                self.index_mint(
                    txid,
                    class,
                    txid,
                    genesis.initial_quantity,
                    genesis.mint_baton_vout,
                    &address_at,
                    &is_mine,
                );
                (txid, MessageType::Genesis)
            }
            SlpBody::Mint {
                token_id,
                mint_baton_vout,
                additional_quantity,
            } => {
                self.index_mint(
                    txid,
                    class,
                    *token_id,
                    *additional_quantity,
                    *mint_baton_vout,
                    &address_at,
                    &is_mine,
                );
                (*token_id, MessageType::Mint)
            }
        };

        let genesis_filled = self.register_token(token_id, class, &message);
        let validity = match self.tx_info.get(&txid) {
            Some(previous)
                if previous.token_id == token_id
                    && previous.message_type == message_type
                    && previous.class == class =>
            {
                previous.validity
            }
            _ => Validity::Unknown,
        };
        self.tx_info.insert(
            txid,
            TokenTxInfo {
                class,
                message_type,
                token_id,
                validity,
            },
        );
        if genesis_filled {
            self.check_token(&token_id);
        } else {
            self.check_validation(&txid);
        }
        Classified::Token {
            token_id,
            message_type,
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn index_mint(
        &mut self,
        txid: Hash256,
        class: TokenClass,
        token_id: Hash256,
        quantity: u64,
        mint_baton_vout: Option<u8>,
        address_at: &impl Fn(usize) -> Option<Address>,
        is_mine: &impl Fn(&Address) -> bool,
    ) {
        let Some(receiver) = address_at(1) else {
            return;
        };
        if quantity > 0 && is_mine(&receiver) {
            self.put_output(
                receiver,
                OutPoint::new(txid, 1),
                TokenOutput {
                    class,
                    token_id: Some(token_id),
                    quantity: TokenQuantity::Amount(quantity),
                },
            );
        }
        let Some(vout) = mint_baton_vout else {
            return;
        };
        if let Some(holder) = address_at(usize::from(vout)).filter(|address| is_mine(address)) {
            self.put_output(
                holder,
                OutPoint::new(txid, u32::from(vout)),
                TokenOutput {
                    class,
                    token_id: Some(token_id),
                    quantity: TokenQuantity::MintBaton,
                },
            );
        }
    }

    /// Adds a placeholder type for unseen ids and fills placeholders from GENESIS data.
    /// Returns true when a placeholder learned its decimals.
    fn register_token(&mut self, token_id: Hash256, class: TokenClass, message: &SlpMessage) -> bool {
        let record = self.types.entry(token_id).or_insert_with(|| TokenTypeRecord {
            class,
            name: format!("unknown-{}", &hash256_to_hex(&token_id)[..6]),
            decimals: Decimals::Unknown,
            group_id: (class == TokenClass::Slp65).then_some(GroupId::Pending),
        });
        let SlpBody::Genesis(genesis) = &message.body else {
            return false;
        };
        if record.decimals != Decimals::Unknown {
            return false;
        }
        record.decimals = Decimals::Known(genesis.decimals);
        let name = genesis_name(&genesis.ticker, &genesis.name);
        if !name.is_empty() {
            record.name = name;
        }
        true
    }

    fn put_output(&mut self, address: Address, outpoint: OutPoint, output: TokenOutput) {
        self.outputs.entry(address).or_default().insert(outpoint, output);
    }

    fn remove_outputs_of(&mut self, txid: &Hash256) {
        for by_outpoint in self.outputs.values_mut() {
            by_outpoint.retain(|outpoint, _| outpoint.hash != *txid);
        }
        self.outputs.retain(|_, by_outpoint| !by_outpoint.is_empty());
    }

    /// Queues `txid` for validation when it is unresolved, not already in flight, and its
    /// token type is fully known.
    pub fn check_validation(&mut self, txid: &Hash256) -> bool {
        if !self.enabled || self.pending.contains(txid) {
            return false;
        }
        let Some(info) = self.tx_info.get(txid) else {
            return false;
        };
        if info.validity != Validity::Unknown || !info.class.is_validatable() {
            return false;
        }
        let known = self
            .types
            .get(&info.token_id)
            .is_some_and(|record| record.decimals != Decimals::Unknown);
        if !known {
            return false;
        }
        self.pending.insert(*txid);
        self.queued.push(ValidationJob {
            txid: *txid,
            class: info.class,
            token_id: info.token_id,
        });
        true
    }

    fn check_token(&mut self, token_id: &Hash256) {
        for txid in self.txids_for_token(token_id) {
            self.check_validation(&txid);
        }
    }

    pub fn txids_for_token(&self, token_id: &Hash256) -> Vec<Hash256> {
        let mut txids: Vec<Hash256> = self
            .tx_info
            .iter()
            .filter(|(_, info)| info.token_id == *token_id)
            .map(|(txid, _)| *txid)
            .collect();
        txids.sort();
        txids
    }

    /// Transactions whose validity is still unknown.
    pub fn unresolved(&self) -> Vec<Hash256> {
        let mut txids: Vec<Hash256> = self
            .tx_info
            .iter()
            .filter(|(_, info)| info.validity == Validity::Unknown)
            .map(|(txid, _)| *txid)
            .collect();
        txids.sort();
        txids
    }

    /// Releases an in-flight marker without a result, e.g. after a failed submission.
    pub fn forget_pending(&mut self, txid: &Hash256) {
        self.pending.remove(txid);
    }

    /// Forgets every in-flight marker and re-queues all unresolved transactions.
    pub fn reactivate(&mut self) -> usize {
        self.pending.clear();
        let unresolved = self.unresolved();
        unresolved
            .iter()
            .filter(|txid| self.check_validation(txid))
            .count()
    }

    /// Records a validator verdict. Only unresolved transactions change; returns the
    /// updated info when the verdict was applied.
    pub fn apply_validity(&mut self, txid: &Hash256, validity: Validity) -> Option<TokenTxInfo> {
        self.pending.remove(txid);
        let info = self.tx_info.get_mut(txid)?;
        if info.validity != Validity::Unknown || validity == Validity::Unknown {
            return None;
        }
        info.validity = validity;
        Some(*info)
    }

    /// Replaces the registry entry for `token_id` and re-checks its transactions.
    pub fn add_token_type(&mut self, token_id: Hash256, record: TokenTypeRecord) {
        self.types.insert(token_id, record);
        self.check_token(&token_id);
    }

    /// Validated registry insertion. `token_id_hex` is the display hex of the GENESIS
    /// txid; a clashing name gets the first three hex digits of the id appended.
    pub fn add_token_safe(
        &mut self,
        class: TokenClass,
        token_id_hex: &str,
        name: &str,
        decimals: u8,
        allow_overwrite: bool,
    ) -> Result<Hash256, WalletError> {
        let token_id_hex = token_id_hex.trim().to_ascii_lowercase();
        let token_id = hash256_from_hex(&token_id_hex)
            .map_err(|_| WalletError::InvalidTokenId(token_id_hex.clone()))?;
        let existing_group = self.types.get(&token_id).and_then(|record| record.group_id);
        if self.types.contains_key(&token_id) && !allow_overwrite {
            return Err(WalletError::TokenAlreadyExists(token_id_hex));
        }
        let mut name = name.trim().to_string();
        let clash = self
            .types
            .iter()
            .any(|(id, record)| record.name == name && *id != token_id);
        if clash {
            name = format!("{name}-{}", &token_id_hex[..3]);
        }
        let group_id = (class == TokenClass::Slp65)
            .then(|| existing_group.unwrap_or(GroupId::Pending));
        self.add_token_type(
            token_id,
            TokenTypeRecord {
                class,
                name,
                decimals: Decimals::Known(decimals),
                group_id,
            },
        );
        Ok(token_id)
    }

    /// Registers the token created by a GENESIS transaction.
    pub fn add_token_from_genesis_tx(
        &mut self,
        tx: &Transaction,
        allow_overwrite: bool,
    ) -> Result<SlpMessage, WalletError> {
        let script = tx
            .vout
            .first()
            .map(|output| output.script_pubkey.as_slice())
            .unwrap_or_default();
        let message = slp::parse(script).map_err(|err| match err {
            SlpParseError::UnsupportedTokenType(token_type) => {
                WalletError::UnsupportedTokenType(token_type)
            }
            SlpParseError::NotSlp => WalletError::InvalidTokenMessage("not an SLP message"),
            SlpParseError::Invalid(reason) => WalletError::InvalidTokenMessage(reason),
        })?;
        let SlpBody::Genesis(genesis) = &message.body else {
            return Err(WalletError::NotTokenGenesis);
        };
        self.add_token_safe(
            TokenClass::from(message.token_type),
            &hash256_to_hex(&tx.txid()),
            &genesis_name(&genesis.ticker, &genesis.name),
            genesis.decimals,
            allow_overwrite,
        )?;
        Ok(message)
    }

    /// Drops the token info and outputs of a transaction leaving the wallet.
    pub fn remove_transaction(&mut self, txid: &Hash256) {
        self.tx_info.remove(txid);
        self.pending.remove(txid);
        self.remove_outputs_of(txid);
    }

    /// Clears everything derived from transactions; the registry survives.
    pub fn clear_derived(&mut self) {
        self.tx_info.clear();
        self.outputs.clear();
        self.pending.clear();
        self.queued.clear();
    }
}

fn genesis_name(ticker: &[u8], name: &[u8]) -> String {
    let ticker = String::from_utf8_lossy(ticker);
    if ticker.is_empty() {
        String::from_utf8_lossy(name).into_owned()
    } else {
        ticker.into_owned()
    }
}

mod hex_id {
    use serde::{Deserialize, Deserializer, Serializer};
    use slpwallet_consensus::{hash256_from_hex, hash256_to_hex, Hash256};

    pub fn serialize<S: Serializer>(id: &Hash256, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hash256_to_hex(id))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Hash256, D::Error> {
        let raw = String::deserialize(deserializer)?;
        hash256_from_hex(&raw).map_err(serde::de::Error::custom)
    }
}

mod hex_id_opt {
    use serde::{Deserialize, Deserializer, Serializer};
    use slpwallet_consensus::{hash256_from_hex, hash256_to_hex, Hash256};

    pub fn serialize<S: Serializer>(
        id: &Option<Hash256>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match id {
            Some(id) => serializer.serialize_some(&hash256_to_hex(id)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Hash256>, D::Error> {
        Option::<String>::deserialize(deserializer)?
            .map(|raw| hash256_from_hex(&raw).map_err(serde::de::Error::custom))
            .transpose()
    }
}
