//! Burn receipts and import proofs
//!
//! An export burns supply on the source chain and leaves behind a
//! [`BurnReceipt`] whose hash chains over the previous burn. The paired
//! import presents an [`ImportProof`] assembled from that receipt plus
//! destination-chain auction context. Proof fields are deterministic
//! functions of the export receipt, so a retried import reproduces the
//! same payload.

use crate::error::{WalletError, WalletResult};

use ethers::abi::Token;
use ethers::types::{Address, Bytes, H256, U256};
use serde::Serialize;
use sha3::{Digest, Keccak256};

/// Encode a chain tag (e.g. "ETH") as the fixed 8-byte identifier used
/// in bridge payloads. Right-padded with zeros.
pub fn chain_tag_to_bytes8(tag: &str) -> WalletResult<[u8; 8]> {
    let raw = tag.as_bytes();
    if raw.is_empty() || raw.len() > 8 {
        return Err(WalletError::InvalidInput(format!(
            "chain tag must be 1-8 bytes, got {:?}",
            tag
        )));
    }
    let mut out = [0u8; 8];
    out[..raw.len()].copy_from_slice(raw);
    Ok(out)
}

/// Decode an 8-byte chain identifier back into its tag string.
pub fn bytes8_to_chain_tag(raw: &[u8]) -> String {
    let end = raw.iter().position(|b| *b == 0).unwrap_or(raw.len().min(8));
    String::from_utf8_lossy(&raw[..end]).into_owned()
}

/// The result of a successful export on the source chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BurnReceipt {
    /// Strictly increasing per source-chain token instance
    pub burn_sequence: U256,
    pub current_burn_hash: H256,
    pub previous_burn_hash: H256,
    pub amount_burnt: U256,
    pub fee: U256,
    /// Token supply across all chains at burn time
    pub supply_on_all_chains: U256,
    /// Mintable amount in the destination auction window at burn time
    pub daily_mintable: U256,
    /// Timestamp of the block containing the burn
    pub block_timestamp: u64,
}

impl BurnReceipt {
    /// Recompute the burn hash from its preimage fields:
    /// `H(previousBurnHash || burnSequence || amount || fee)`.
    pub fn compute_burn_hash(
        previous_burn_hash: &H256,
        burn_sequence: U256,
        amount: U256,
        fee: U256,
    ) -> H256 {
        let mut hasher = Keccak256::new();
        hasher.update(previous_burn_hash.as_bytes());
        let mut buf = [0u8; 32];
        burn_sequence.to_big_endian(&mut buf);
        hasher.update(buf);
        amount.to_big_endian(&mut buf);
        hasher.update(buf);
        fee.to_big_endian(&mut buf);
        hasher.update(buf);
        H256::from_slice(&hasher.finalize())
    }

    /// Check the chaining invariants against the preceding burn: the
    /// sequence advances by exactly one and the hash links.
    pub fn chains_from(&self, previous: &BurnReceipt) -> bool {
        self.burn_sequence == previous.burn_sequence + U256::one()
            && self.previous_burn_hash == previous.current_burn_hash
            && self.current_burn_hash != self.previous_burn_hash
    }
}

/// Destination-chain auction state read immediately before signing an
/// import. The import call's validity depends on the current tick, so
/// this context must be fresh.
#[derive(Debug, Clone, Copy)]
pub struct AuctionContext {
    pub genesis_time: u64,
    pub daily_auction_start_time: u64,
}

impl AuctionContext {
    /// Auction tick at `now`, one tick per `tick_secs` since genesis.
    pub fn current_tick(&self, now: u64, tick_secs: u64) -> u64 {
        now.saturating_sub(self.genesis_time) / tick_secs
    }
}

/// The payload the destination chain requires to mint. All fields derive
/// from the exact [`BurnReceipt`] being imported plus fetched auction
/// context; nothing here is guessed.
#[derive(Debug, Clone)]
pub struct ImportProof {
    pub origin_chain: String,
    pub destination_chain: String,
    pub destination_met_address: Address,
    pub from: Address,
    pub extra_data: Bytes,
    pub previous_burn_hash: H256,
    pub current_burn_hash: H256,
    pub supply: U256,
    pub block_timestamp: u64,
    pub value: U256,
    pub fee: U256,
    pub current_tick: u64,
    pub genesis_time: u64,
    pub daily_mintable: U256,
    pub burn_sequence: U256,
    pub daily_auction_start_time: u64,
    pub merkle_root: H256,
}

impl ImportProof {
    /// Assemble a proof from a burn receipt and fetched auction context.
    pub fn assemble(
        origin_chain: &str,
        destination_chain: &str,
        destination_met_address: Address,
        from: Address,
        extra_data: Bytes,
        burn: &BurnReceipt,
        context: AuctionContext,
        now: u64,
        tick_secs: u64,
        merkle_root: H256,
    ) -> Self {
        Self {
            origin_chain: origin_chain.to_string(),
            destination_chain: destination_chain.to_string(),
            destination_met_address,
            from,
            extra_data,
            previous_burn_hash: burn.previous_burn_hash,
            current_burn_hash: burn.current_burn_hash,
            supply: burn.supply_on_all_chains,
            block_timestamp: burn.block_timestamp,
            value: burn.amount_burnt,
            fee: burn.fee,
            current_tick: context.current_tick(now, tick_secs),
            genesis_time: context.genesis_time,
            daily_mintable: burn.daily_mintable,
            burn_sequence: burn.burn_sequence,
            daily_auction_start_time: context.daily_auction_start_time,
            merkle_root,
        }
    }

    /// ABI tokens for the import call, in the contract's parameter
    /// order. The signed call and the read-only gas estimate both encode
    /// through this single function, so the two can never diverge.
    pub fn to_call_tokens(&self) -> WalletResult<Vec<Token>> {
        Ok(vec![
            Token::FixedBytes(chain_tag_to_bytes8(&self.origin_chain)?.to_vec()),
            Token::FixedBytes(chain_tag_to_bytes8(&self.destination_chain)?.to_vec()),
            Token::Array(vec![
                Token::Address(self.destination_met_address),
                Token::Address(self.from),
            ]),
            Token::Bytes(self.extra_data.to_vec()),
            Token::Array(vec![
                Token::FixedBytes(self.previous_burn_hash.as_bytes().to_vec()),
                Token::FixedBytes(self.current_burn_hash.as_bytes().to_vec()),
            ]),
            Token::Uint(self.supply),
            Token::Array(vec![
                Token::Uint(U256::from(self.block_timestamp)),
                Token::Uint(self.value),
                Token::Uint(self.fee),
                Token::Uint(U256::from(self.current_tick)),
                Token::Uint(U256::from(self.genesis_time)),
                Token::Uint(self.daily_mintable),
                Token::Uint(self.burn_sequence),
                Token::Uint(U256::from(self.daily_auction_start_time)),
            ]),
            Token::FixedBytes(self.merkle_root.as_bytes().to_vec()),
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn burn(seq: u64, prev: H256) -> BurnReceipt {
        let amount = U256::from(1_000u64);
        let fee = U256::from(30u64);
        BurnReceipt {
            burn_sequence: U256::from(seq),
            current_burn_hash: BurnReceipt::compute_burn_hash(
                &prev,
                U256::from(seq),
                amount,
                fee,
            ),
            previous_burn_hash: prev,
            amount_burnt: amount,
            fee,
            supply_on_all_chains: U256::from(10_000_000u64),
            daily_mintable: U256::from(2880u64),
            block_timestamp: 1_700_000_000,
        }
    }

    #[test]
    fn chain_tags_round_trip_through_bytes8() {
        let raw = chain_tag_to_bytes8("ETH").unwrap();
        assert_eq!(raw, [b'E', b'T', b'H', 0, 0, 0, 0, 0]);
        assert_eq!(bytes8_to_chain_tag(&raw), "ETH");
        assert!(chain_tag_to_bytes8("TOOLONGTAG").is_err());
        assert!(chain_tag_to_bytes8("").is_err());
    }

    #[test]
    fn burn_hashes_chain() {
        let genesis = H256::zero();
        let first = burn(1, genesis);
        let second = burn(2, first.current_burn_hash);

        assert!(second.chains_from(&first));
        assert_ne!(second.current_burn_hash, second.previous_burn_hash);

        // A skipped sequence number breaks the chain
        let skipped = burn(4, second.current_burn_hash);
        assert!(!skipped.chains_from(&second));

        // A hash that does not link breaks the chain
        let forged = burn(3, H256::repeat_byte(0xAB));
        assert!(!forged.chains_from(&second));
    }

    #[test]
    fn current_tick_counts_whole_ticks_since_genesis() {
        let context = AuctionContext {
            genesis_time: 1_000,
            daily_auction_start_time: 500,
        };
        assert_eq!(context.current_tick(1_000, 60), 0);
        assert_eq!(context.current_tick(1_059, 60), 0);
        assert_eq!(context.current_tick(1_060, 60), 1);
        assert_eq!(context.current_tick(7_000, 60), 100);
        // Clock before genesis clamps to tick zero
        assert_eq!(context.current_tick(500, 60), 0);
    }

    #[test]
    fn proof_fields_come_from_the_exact_burn_receipt() {
        let first = burn(1, H256::zero());
        let context = AuctionContext {
            genesis_time: 1_699_990_000,
            daily_auction_start_time: 1_699_995_000,
        };
        let proof = ImportProof::assemble(
            "ETH",
            "ETC",
            Address::repeat_byte(0x11),
            Address::repeat_byte(0x22),
            Bytes::default(),
            &first,
            context,
            1_700_002_000,
            60,
            H256::repeat_byte(0x33),
        );

        assert_eq!(proof.value, first.amount_burnt);
        assert_eq!(proof.fee, first.fee);
        assert_eq!(proof.burn_sequence, first.burn_sequence);
        assert_eq!(proof.current_burn_hash, first.current_burn_hash);
        assert_eq!(proof.supply, first.supply_on_all_chains);
        assert_eq!(proof.block_timestamp, first.block_timestamp);
        assert_eq!(proof.current_tick, 200);
    }

    #[test]
    fn call_tokens_preserve_parameter_order() {
        let first = burn(1, H256::zero());
        let context = AuctionContext {
            genesis_time: 1_000,
            daily_auction_start_time: 2_000,
        };
        let proof = ImportProof::assemble(
            "ETH",
            "ETC",
            Address::repeat_byte(0x11),
            Address::repeat_byte(0x22),
            Bytes::from(vec![0xDE, 0xAD]),
            &first,
            context,
            4_000,
            60,
            H256::repeat_byte(0x33),
        );

        let tokens = proof.to_call_tokens().unwrap();
        assert_eq!(tokens.len(), 8);
        assert!(matches!(&tokens[0], Token::FixedBytes(b) if b[..3] == *b"ETH"));
        assert!(matches!(&tokens[1], Token::FixedBytes(b) if b[..3] == *b"ETC"));
        // address pair, burn-hash pair, numeric window in fixed order
        assert!(matches!(&tokens[2], Token::Array(a) if a.len() == 2));
        assert!(matches!(&tokens[4], Token::Array(h) if h.len() == 2));
        match &tokens[6] {
            Token::Array(window) => {
                assert_eq!(window.len(), 8);
                assert_eq!(window[1], Token::Uint(first.amount_burnt));
                assert_eq!(window[6], Token::Uint(first.burn_sequence));
            }
            other => panic!("expected numeric window array, got {:?}", other),
        }
        assert!(matches!(&tokens[7], Token::FixedBytes(b) if b.len() == 32));
    }
}
