//! Ledger operation encoding.
//!
//! Builds legacy-format transactions holding a single token
//! `TransferChecked` instruction, signed by the service key.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;

use crate::error::SagaError;
use crate::services::ledger::BlockReference;
use crate::services::signer::ServiceSigner;

/// Instruction index of `TransferChecked` in the token program.
const TRANSFER_CHECKED: u8 = 12;

pub type Address = [u8; 32];

/// Decodes a base58 ledger address.
pub fn decode_address(encoded: &str) -> Result<Address, SagaError> {
    let bytes = bs58::decode(encoded.trim())
        .into_vec()
        .map_err(|_| SagaError::InvalidAddress(encoded.to_string()))?;
    bytes
        .try_into()
        .map_err(|_| SagaError::InvalidAddress(encoded.to_string()))
}

/// Appends `value` in the ledger's compact-u16 form.
pub fn write_compact_u16(out: &mut Vec<u8>, mut value: u16) {
    loop {
        let mut byte = (value & 0x7f) as u8;
        value >>= 7;
        if value == 0 {
            out.push(byte);
            return;
        }
        byte |= 0x80;
        out.push(byte);
    }
}

/// Token transfer with mint and decimals checked by the program.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferChecked {
    pub program: Address,
    pub source: Address,
    pub mint: Address,
    pub destination: Address,
    /// Owner or delegate of `source`; also the fee payer.
    pub authority: Address,
    pub amount: u64,
    pub decimals: u8,
}

impl TransferChecked {
    /// Serializes the unsigned message anchored at `recent_block`.
    ///
    /// Account table: authority (signer, writable), source, destination
    /// (writable), mint, program (read-only).
    pub fn message(&self, recent_block: &BlockReference) -> Vec<u8> {
        let keys = [
            &self.authority,
            &self.source,
            &self.destination,
            &self.mint,
            &self.program,
        ];

        let mut data = Vec::with_capacity(10);
        data.push(TRANSFER_CHECKED);
        data.extend_from_slice(&self.amount.to_le_bytes());
        data.push(self.decimals);

        let mut message = Vec::with_capacity(3 + 1 + keys.len() * 32 + 32 + 1 + 1 + 1 + 4 + 1 + 10);
        // required signatures, read-only signed, read-only unsigned
        message.extend_from_slice(&[1, 0, 2]);
        write_compact_u16(&mut message, keys.len() as u16);
        for key in keys {
            message.extend_from_slice(key);
        }
        message.extend_from_slice(recent_block);

        write_compact_u16(&mut message, 1);
        message.push(4);
        // source, mint, destination, authority
        let accounts = [1u8, 3, 2, 0];
        write_compact_u16(&mut message, accounts.len() as u16);
        message.extend_from_slice(&accounts);
        write_compact_u16(&mut message, data.len() as u16);
        message.extend_from_slice(&data);
        message
    }

    /// Signs the message and returns the base64 wire transaction.
    pub fn sign(&self, recent_block: &BlockReference, signer: &dyn ServiceSigner) -> String {
        let message = self.message(recent_block);
        let signature = signer.sign(&message);

        let mut tx = Vec::with_capacity(1 + signature.len() + message.len());
        write_compact_u16(&mut tx, 1);
        tx.extend_from_slice(&signature);
        tx.extend_from_slice(&message);
        STANDARD.encode(tx)
    }
}
