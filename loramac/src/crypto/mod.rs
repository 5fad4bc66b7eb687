//! LoRaWAN cryptographic operations
//!
//! This module provides cryptographic functions for LoRaWAN 1.0.x security:
//! - Message Integrity Code (MIC) computation for data frames and join messages
//! - FRMPayload encryption/decryption
//! - Join accept decryption
//! - Session key derivation

use aes::cipher::generic_array::GenericArray;
use aes::cipher::{BlockEncrypt, KeyInit};
use aes::Aes128;
use cmac::{Cmac, Mac};

use crate::config::device::{AESKey, DevAddr};

/// MIC size in bytes
pub const MIC_SIZE: usize = 4;

/// Block size for AES-128
const BLOCK_SIZE: usize = 16;

/// Direction identifiers for cryptographic operations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Direction {
    /// Uplink (device to network)
    Up = 0,
    /// Downlink (network to device)
    Down = 1,
}

fn cipher(key: &AESKey) -> Aes128 {
    Aes128::new(GenericArray::from_slice(key.as_bytes()))
}

fn cmac(key: &AESKey, parts: &[&[u8]]) -> [u8; BLOCK_SIZE] {
    let mut mac = <Cmac<Aes128> as Mac>::new(GenericArray::from_slice(key.as_bytes()));
    for part in parts {
        mac.update(part);
    }
    let mut out = [0u8; BLOCK_SIZE];
    out.copy_from_slice(&mac.finalize().into_bytes());
    out
}

/// Build the B0/Ai block shared by MIC computation and payload encryption
fn frame_block(tag: u8, dev_addr: DevAddr, fcnt: u32, dir: Direction, last: u8) -> [u8; BLOCK_SIZE] {
    let mut block = [0u8; BLOCK_SIZE];
    block[0] = tag;
    block[5] = dir as u8;
    block[6..10].copy_from_slice(&dev_addr.to_le_bytes());
    block[10..14].copy_from_slice(&fcnt.to_le_bytes());
    block[15] = last;
    block
}

/// Compute Message Integrity Code (MIC) for a data frame
///
/// # Arguments
/// * `key` - Network session key
/// * `data` - MHDR through the end of FRMPayload
/// * `dev_addr` - Device address
/// * `fcnt` - Full 32-bit frame counter
/// * `dir` - Message direction
pub fn compute_mic(
    key: &AESKey,
    data: &[u8],
    dev_addr: DevAddr,
    fcnt: u32,
    dir: Direction,
) -> [u8; MIC_SIZE] {
    let b0 = frame_block(0x49, dev_addr, fcnt, dir, data.len() as u8);
    let full = cmac(key, &[&b0, data]);
    let mut mic = [0u8; MIC_SIZE];
    mic.copy_from_slice(&full[..MIC_SIZE]);
    mic
}

/// Encrypt or decrypt a FRMPayload in place
///
/// The keystream is AES(key, A_i) for i = 1.., so the same call reverses itself.
pub fn encrypt_payload(
    key: &AESKey,
    dev_addr: DevAddr,
    fcnt: u32,
    dir: Direction,
    data: &mut [u8],
) {
    let cipher = cipher(key);
    for (i, chunk) in data.chunks_mut(BLOCK_SIZE).enumerate() {
        let mut a = frame_block(0x01, dev_addr, fcnt, dir, (i + 1) as u8);
        cipher.encrypt_block(GenericArray::from_mut_slice(&mut a));
        for (byte, key_byte) in chunk.iter_mut().zip(a.iter()) {
            *byte ^= key_byte;
        }
    }
}

/// Compute the MIC of a join request or a decrypted join accept
///
/// `data` covers the MHDR up to (not including) the MIC.
pub fn compute_join_mic(key: &AESKey, data: &[u8]) -> [u8; MIC_SIZE] {
    let full = cmac(key, &[data]);
    let mut mic = [0u8; MIC_SIZE];
    mic.copy_from_slice(&full[..MIC_SIZE]);
    mic
}

/// Decrypt a join accept in place
///
/// The network encrypts with AES decrypt, so the device runs AES encrypt over
/// every 16-byte block following the MHDR. `data` length must be a multiple of 16.
pub fn decrypt_join_accept(key: &AESKey, data: &mut [u8]) {
    let cipher = cipher(key);
    for block in data.chunks_exact_mut(BLOCK_SIZE) {
        cipher.encrypt_block(GenericArray::from_mut_slice(block));
    }
}

/// Derive the network and application session keys after a join accept
///
/// Returns `(nwk_skey, app_skey)`.
pub fn derive_session_keys(
    app_key: &AESKey,
    app_nonce: &[u8; 3],
    net_id: &[u8; 3],
    dev_nonce: u16,
) -> (AESKey, AESKey) {
    let cipher = cipher(app_key);
    let derive = |prefix: u8| {
        let mut block = [0u8; BLOCK_SIZE];
        block[0] = prefix;
        block[1..4].copy_from_slice(app_nonce);
        block[4..7].copy_from_slice(net_id);
        block[7..9].copy_from_slice(&dev_nonce.to_le_bytes());
        cipher.encrypt_block(GenericArray::from_mut_slice(&mut block));
        AESKey::new(block)
    };

    (derive(0x01), derive(0x02))
}
