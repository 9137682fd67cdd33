//! Receipt meta parsing
//!
//! Pure decoders, one per transaction kind, turning a receipt's logs
//! into a typed domain action. No chain access, no side effects.
//!
//! `contract_call_failed` captures the case where the chain accepted and
//! mined the transaction but the contract's own logic did not take
//! effect: the expected event topic is absent from the receipt's logs.
//! Chain-level reverts are a different path (adapter-level failure) and
//! never reach these parsers with a missing-topic-but-successful
//! receipt.

use crate::bridge::proof::{bytes8_to_chain_tag, BurnReceipt};
use crate::error::{WalletError, WalletResult};
use crate::tx::lifecycle::{ReceiptLog, TxReceipt};

use ethers::abi::{decode, ParamType, Token};
use ethers::types::{Address, H256, U256};
use serde::Serialize;
use ethers::utils::keccak256;

/// Transaction kinds with distinct receipt decodings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetaKind {
    Transfer,
    Export,
    ImportRequest,
}

/// Event topic signatures (keccak256 of the event signature string)
pub mod topics {
    use super::*;
    use lazy_static::lazy_static;

    lazy_static! {
        /// ERC20 `Transfer(address,address,uint256)`
        pub static ref TRANSFER: H256 =
            H256::from(keccak256("Transfer(address,address,uint256)"));

        /// Export receipt logged by the token porter. The recipient is
        /// indexed; everything else lives in the data segment.
        pub static ref EXPORT_RECEIPT: H256 = H256::from(keccak256(
            "LogExportReceipt(bytes8,address,uint256,uint256,bytes32,bytes32,uint256,uint256,uint256,uint256)"
        ));

        /// Import request logged by the destination token porter.
        pub static ref IMPORT_REQUEST: H256 = H256::from(keccak256(
            "LogImportRequest(bytes8,bytes32,address,uint256,uint256)"
        ));
    }
}

/// Decoded semantic effect of a transaction. The `Transfer` variant
/// covers both plain value transfers (no token, no expected topic) and
/// token transfers.
#[derive(Debug, Clone, Serialize)]
pub enum MetaAction {
    Transfer {
        /// Token contract when this is a token transfer; `None` for a
        /// plain coin transfer, which produces no logs to check
        token: Option<Address>,
        from: Address,
        to: Address,
        value: U256,
        contract_call_failed: bool,
    },
    Export {
        destination_chain: String,
        destination_recipient: Address,
        amount_to_burn: U256,
        fee: U256,
        /// Present once the receipt's export log has been decoded
        burn: Option<BurnReceipt>,
        contract_call_failed: bool,
    },
    ImportRequest {
        origin_chain: String,
        current_burn_hash: H256,
        destination_recipient: Address,
        value: U256,
        fee: U256,
        contract_call_failed: bool,
    },
}

impl MetaAction {
    pub fn kind(&self) -> MetaKind {
        match self {
            MetaAction::Transfer { .. } => MetaKind::Transfer,
            MetaAction::Export { .. } => MetaKind::Export,
            MetaAction::ImportRequest { .. } => MetaKind::ImportRequest,
        }
    }

    pub fn contract_call_failed(&self) -> bool {
        match self {
            MetaAction::Transfer {
                contract_call_failed,
                ..
            }
            | MetaAction::Export {
                contract_call_failed,
                ..
            }
            | MetaAction::ImportRequest {
                contract_call_failed,
                ..
            } => *contract_call_failed,
        }
    }
}

/// Dispatch to the parser matching the pending action's kind.
pub fn parse(template: &MetaAction, receipt: &TxReceipt) -> WalletResult<MetaAction> {
    match template {
        MetaAction::Transfer { .. } => parse_transfer(template, receipt),
        MetaAction::Export { .. } => parse_export(template, receipt),
        MetaAction::ImportRequest { .. } => parse_import_request(template, receipt),
    }
}

fn find_log<'r>(receipt: &'r TxReceipt, topic: &H256) -> Option<&'r ReceiptLog> {
    receipt
        .logs
        .iter()
        .find(|log| log.topics.first() == Some(topic))
}

/// Left-pad an address into the 32-byte topic form used for indexed
/// event parameters.
pub fn address_topic(addr: Address) -> H256 {
    let mut topic = H256::zero();
    topic.0[12..].copy_from_slice(addr.as_bytes());
    topic
}

fn indexed_address(log: &ReceiptLog, index: usize) -> Address {
    log.topics
        .get(index)
        .map(|t| Address::from_slice(&t.as_bytes()[12..]))
        .unwrap_or_default()
}

fn parse_transfer(template: &MetaAction, receipt: &TxReceipt) -> WalletResult<MetaAction> {
    let MetaAction::Transfer {
        token, from, to, value, ..
    } = template
    else {
        return Err(WalletError::Internal("transfer template expected".into()));
    };

    // Plain coin transfer: nothing to decode, nothing that can silently fail
    let Some(token) = token else {
        return Ok(MetaAction::Transfer {
            token: None,
            from: *from,
            to: *to,
            value: *value,
            contract_call_failed: false,
        });
    };

    match find_log(receipt, &topics::TRANSFER) {
        Some(log) => {
            let decoded = decode(&[ParamType::Uint(256)], &log.data)
                .map_err(|e| WalletError::EventDecoding(e.to_string()))?;
            let logged_value = as_uint(&decoded[0])?;
            Ok(MetaAction::Transfer {
                token: Some(*token),
                from: indexed_address(log, 1),
                to: indexed_address(log, 2),
                value: logged_value,
                contract_call_failed: false,
            })
        }
        None => Ok(MetaAction::Transfer {
            token: Some(*token),
            from: *from,
            to: *to,
            value: *value,
            contract_call_failed: true,
        }),
    }
}

fn parse_export(template: &MetaAction, receipt: &TxReceipt) -> WalletResult<MetaAction> {
    let MetaAction::Export {
        destination_chain,
        destination_recipient,
        amount_to_burn,
        fee,
        ..
    } = template
    else {
        return Err(WalletError::Internal("export template expected".into()));
    };

    let Some(log) = find_log(receipt, &topics::EXPORT_RECEIPT) else {
        return Ok(MetaAction::Export {
            destination_chain: destination_chain.clone(),
            destination_recipient: *destination_recipient,
            amount_to_burn: *amount_to_burn,
            fee: *fee,
            burn: None,
            contract_call_failed: true,
        });
    };

    let decoded = decode(
        &[
            ParamType::FixedBytes(8),   // destinationChain
            ParamType::Uint(256),       // amountToBurn
            ParamType::Uint(256),       // fee
            ParamType::FixedBytes(32),  // currentBurnHash
            ParamType::FixedBytes(32),  // previousBurnHash
            ParamType::Uint(256),       // burnSequence
            ParamType::Uint(256),       // supplyOnAllChains
            ParamType::Uint(256),       // dailyMintable
            ParamType::Uint(256),       // blockTimestamp
        ],
        &log.data,
    )
    .map_err(|e| WalletError::EventDecoding(e.to_string()))?;

    let amount = as_uint(&decoded[1])?;
    let logged_fee = as_uint(&decoded[2])?;
    let burn = BurnReceipt {
        current_burn_hash: as_h256(&decoded[3])?,
        previous_burn_hash: as_h256(&decoded[4])?,
        burn_sequence: as_uint(&decoded[5])?,
        amount_burnt: amount,
        fee: logged_fee,
        supply_on_all_chains: as_uint(&decoded[6])?,
        daily_mintable: as_uint(&decoded[7])?,
        block_timestamp: as_uint(&decoded[8])?.as_u64(),
    };

    Ok(MetaAction::Export {
        destination_chain: as_chain_tag(&decoded[0])?,
        destination_recipient: indexed_address(log, 1),
        amount_to_burn: amount,
        fee: logged_fee,
        burn: Some(burn),
        contract_call_failed: false,
    })
}

fn parse_import_request(template: &MetaAction, receipt: &TxReceipt) -> WalletResult<MetaAction> {
    let MetaAction::ImportRequest {
        origin_chain,
        current_burn_hash,
        destination_recipient,
        value,
        fee,
        ..
    } = template
    else {
        return Err(WalletError::Internal(
            "import-request template expected".into(),
        ));
    };

    let Some(log) = find_log(receipt, &topics::IMPORT_REQUEST) else {
        return Ok(MetaAction::ImportRequest {
            origin_chain: origin_chain.clone(),
            current_burn_hash: *current_burn_hash,
            destination_recipient: *destination_recipient,
            value: *value,
            fee: *fee,
            contract_call_failed: true,
        });
    };

    let decoded = decode(
        &[
            ParamType::FixedBytes(8),  // originChain
            ParamType::FixedBytes(32), // currentBurnHash
            ParamType::Uint(256),      // amountToImport
            ParamType::Uint(256),      // fee
        ],
        &log.data,
    )
    .map_err(|e| WalletError::EventDecoding(e.to_string()))?;

    Ok(MetaAction::ImportRequest {
        origin_chain: as_chain_tag(&decoded[0])?,
        current_burn_hash: as_h256(&decoded[1])?,
        destination_recipient: indexed_address(log, 1),
        value: as_uint(&decoded[2])?,
        fee: as_uint(&decoded[3])?,
        contract_call_failed: false,
    })
}

fn as_uint(token: &Token) -> WalletResult<U256> {
    token
        .clone()
        .into_uint()
        .ok_or_else(|| WalletError::EventDecoding(format!("expected uint, got {:?}", token)))
}

fn as_h256(token: &Token) -> WalletResult<H256> {
    match token {
        Token::FixedBytes(raw) if raw.len() == 32 => Ok(H256::from_slice(raw)),
        other => Err(WalletError::EventDecoding(format!(
            "expected bytes32, got {:?}",
            other
        ))),
    }
}

fn as_chain_tag(token: &Token) -> WalletResult<String> {
    match token {
        Token::FixedBytes(raw) if raw.len() == 8 => Ok(bytes8_to_chain_tag(raw)),
        other => Err(WalletError::EventDecoding(format!(
            "expected bytes8, got {:?}",
            other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::proof::chain_tag_to_bytes8;
    use ethers::abi::encode;
    use ethers::types::Bytes;

    fn receipt_with_logs(logs: Vec<ReceiptLog>) -> TxReceipt {
        TxReceipt {
            transaction_hash: "0xfeed".into(),
            block_hash: "0xb10c".into(),
            block_number: 42,
            block_timestamp: 1_700_000_123,
            success: true,
            logs,
        }
    }

    fn export_template() -> MetaAction {
        MetaAction::Export {
            destination_chain: "ETC".into(),
            destination_recipient: Address::repeat_byte(0x22),
            amount_to_burn: U256::from(1_000u64),
            fee: U256::from(30u64),
            burn: None,
            contract_call_failed: false,
        }
    }

    fn export_log(seq: u64, prev: H256) -> ReceiptLog {
        let current = BurnReceipt::compute_burn_hash(
            &prev,
            U256::from(seq),
            U256::from(1_000u64),
            U256::from(30u64),
        );
        let data = encode(&[
            Token::FixedBytes(chain_tag_to_bytes8("ETC").unwrap().to_vec()),
            Token::Uint(U256::from(1_000u64)),
            Token::Uint(U256::from(30u64)),
            Token::FixedBytes(current.as_bytes().to_vec()),
            Token::FixedBytes(prev.as_bytes().to_vec()),
            Token::Uint(U256::from(seq)),
            Token::Uint(U256::from(10_000_000u64)),
            Token::Uint(U256::from(2880u64)),
            Token::Uint(U256::from(1_700_000_123u64)),
        ]);
        ReceiptLog {
            address: Address::repeat_byte(0x99),
            topics: vec![
                *topics::EXPORT_RECEIPT,
                address_topic(Address::repeat_byte(0x22)),
            ],
            data: Bytes::from(data),
        }
    }

    #[test]
    fn export_receipt_with_log_decodes_burn() {
        let receipt = receipt_with_logs(vec![export_log(5, H256::repeat_byte(0x01))]);
        let meta = parse(&export_template(), &receipt).unwrap();

        let MetaAction::Export {
            burn,
            contract_call_failed,
            destination_chain,
            amount_to_burn,
            ..
        } = meta
        else {
            panic!("expected export meta");
        };

        assert!(!contract_call_failed);
        assert_eq!(destination_chain, "ETC");
        assert_eq!(amount_to_burn, U256::from(1_000u64));
        let burn = burn.unwrap();
        assert_eq!(burn.burn_sequence, U256::from(5u64));
        assert_eq!(burn.previous_burn_hash, H256::repeat_byte(0x01));
        assert_ne!(burn.current_burn_hash, burn.previous_burn_hash);
    }

    #[test]
    fn contract_call_failed_iff_expected_topic_absent() {
        // Successful receipt, expected topic missing
        let empty = receipt_with_logs(vec![]);
        let meta = parse(&export_template(), &empty).unwrap();
        assert!(meta.contract_call_failed());

        // Same receipt with the topic present
        let with_log = receipt_with_logs(vec![export_log(1, H256::zero())]);
        let meta = parse(&export_template(), &with_log).unwrap();
        assert!(!meta.contract_call_failed());
    }

    #[test]
    fn unrelated_topics_do_not_satisfy_the_export_parser() {
        let mut log = export_log(1, H256::zero());
        log.topics[0] = *topics::TRANSFER;
        let receipt = receipt_with_logs(vec![log]);
        let meta = parse(&export_template(), &receipt).unwrap();
        assert!(meta.contract_call_failed());
    }

    #[test]
    fn plain_coin_transfer_never_reports_contract_failure() {
        let template = MetaAction::Transfer {
            token: None,
            from: Address::repeat_byte(0x01),
            to: Address::repeat_byte(0x02),
            value: U256::from(7u64),
            contract_call_failed: false,
        };
        let meta = parse(&template, &receipt_with_logs(vec![])).unwrap();
        assert!(!meta.contract_call_failed());
    }

    #[test]
    fn token_transfer_decodes_value_from_log() {
        let data = encode(&[Token::Uint(U256::from(555u64))]);
        let log = ReceiptLog {
            address: Address::repeat_byte(0x99),
            topics: vec![
                *topics::TRANSFER,
                address_topic(Address::repeat_byte(0x01)),
                address_topic(Address::repeat_byte(0x02)),
            ],
            data: Bytes::from(data),
        };
        let template = MetaAction::Transfer {
            token: Some(Address::repeat_byte(0x99)),
            from: Address::zero(),
            to: Address::zero(),
            value: U256::zero(),
            contract_call_failed: false,
        };
        let meta = parse(&template, &receipt_with_logs(vec![log])).unwrap();
        let MetaAction::Transfer {
            value,
            from,
            to,
            contract_call_failed,
            ..
        } = meta
        else {
            panic!("expected transfer meta");
        };
        assert_eq!(value, U256::from(555u64));
        assert_eq!(from, Address::repeat_byte(0x01));
        assert_eq!(to, Address::repeat_byte(0x02));
        assert!(!contract_call_failed);
    }

    #[test]
    fn import_request_decodes_burn_hash() {
        let burn_hash = H256::repeat_byte(0x77);
        let data = encode(&[
            Token::FixedBytes(chain_tag_to_bytes8("ETH").unwrap().to_vec()),
            Token::FixedBytes(burn_hash.as_bytes().to_vec()),
            Token::Uint(U256::from(970u64)),
            Token::Uint(U256::from(30u64)),
        ]);
        let log = ReceiptLog {
            address: Address::repeat_byte(0x88),
            topics: vec![
                *topics::IMPORT_REQUEST,
                address_topic(Address::repeat_byte(0x22)),
            ],
            data: Bytes::from(data),
        };
        let template = MetaAction::ImportRequest {
            origin_chain: "ETH".into(),
            current_burn_hash: H256::zero(),
            destination_recipient: Address::zero(),
            value: U256::zero(),
            fee: U256::zero(),
            contract_call_failed: false,
        };
        let meta = parse(&template, &receipt_with_logs(vec![log])).unwrap();
        let MetaAction::ImportRequest {
            origin_chain,
            current_burn_hash,
            value,
            contract_call_failed,
            ..
        } = meta
        else {
            panic!("expected import-request meta");
        };
        assert_eq!(origin_chain, "ETH");
        assert_eq!(current_burn_hash, burn_hash);
        assert_eq!(value, U256::from(970u64));
        assert!(!contract_call_failed);
    }
}
