// Copyright 2016 Pierre-Étienne Meunier
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
// http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//

//! The classic RFC 4253 ciphers: AES in CTR and CBC mode and 3DES-CBC,
//! paired with an HMAC. The whole packet, length field included, is
//! encrypted; the MAC covers the sequence number and the plaintext
//! packet and travels unencrypted after the ciphertext.

use crate::mac::MacKey;
use crate::Error;
use cryptovec::CryptoVec;
use openssl::symm::{self, Crypter, Mode};
use rand::RngCore;

pub struct OpeningKey {
    crypter: Crypter,
    block_len: usize,
    mac: MacKey,
    first_block: CryptoVec,
    scratch: CryptoVec,
}

pub struct SealingKey {
    crypter: Crypter,
    block_len: usize,
    mac: MacKey,
    scratch: CryptoVec,
}

macro_rules! block_cipher {
    ($open:ident, $seal:ident, $cipher:expr, $block:expr) => {
        fn $open(key: &[u8], iv: &[u8], mac: Option<MacKey>) -> Result<super::OpeningCipher, Error> {
            let mac = mac.ok_or(Error::Inconsistent)?;
            let mut crypter = Crypter::new($cipher, Mode::Decrypt, key, Some(iv))?;
            crypter.pad(false);
            Ok(super::OpeningCipher::Block(OpeningKey {
                crypter,
                block_len: $block,
                mac,
                first_block: CryptoVec::new(),
                scratch: CryptoVec::new(),
            }))
        }

        fn $seal(key: &[u8], iv: &[u8], mac: Option<MacKey>) -> Result<super::SealingCipher, Error> {
            let mac = mac.ok_or(Error::Inconsistent)?;
            let mut crypter = Crypter::new($cipher, Mode::Encrypt, key, Some(iv))?;
            crypter.pad(false);
            Ok(super::SealingCipher::Block(SealingKey {
                crypter,
                block_len: $block,
                mac,
                scratch: CryptoVec::new(),
            }))
        }
    };
}

block_cipher!(open_aes128_ctr, seal_aes128_ctr, symm::Cipher::aes_128_ctr(), 16);
block_cipher!(open_aes192_ctr, seal_aes192_ctr, symm::Cipher::aes_192_ctr(), 16);
block_cipher!(open_aes256_ctr, seal_aes256_ctr, symm::Cipher::aes_256_ctr(), 16);
block_cipher!(open_aes128_cbc, seal_aes128_cbc, symm::Cipher::aes_128_cbc(), 16);
block_cipher!(open_aes192_cbc, seal_aes192_cbc, symm::Cipher::aes_192_cbc(), 16);
block_cipher!(open_aes256_cbc, seal_aes256_cbc, symm::Cipher::aes_256_cbc(), 16);
block_cipher!(open_3des_cbc, seal_3des_cbc, symm::Cipher::des_ede3_cbc(), 8);

pub const NAME_AES_128_CTR: super::Name = super::Name("aes128-ctr");
pub const NAME_AES_192_CTR: super::Name = super::Name("aes192-ctr");
pub const NAME_AES_256_CTR: super::Name = super::Name("aes256-ctr");
pub const NAME_AES_128_CBC: super::Name = super::Name("aes128-cbc");
pub const NAME_AES_192_CBC: super::Name = super::Name("aes192-cbc");
pub const NAME_AES_256_CBC: super::Name = super::Name("aes256-cbc");
pub const NAME_3DES_CBC: super::Name = super::Name("3des-cbc");

macro_rules! cipher {
    ($name:ident, $string:expr, $key:expr, $iv:expr, $block:expr, $open:ident, $seal:ident) => {
        pub static $name: super::Cipher = super::Cipher {
            name: $string,
            key_len: $key,
            nonce_len: $iv,
            block_len: $block,
            needs_mac: true,
            make_opening_cipher: $open,
            make_sealing_cipher: $seal,
        };
    };
}

cipher!(AES_128_CTR, NAME_AES_128_CTR, 16, 16, 16, open_aes128_ctr, seal_aes128_ctr);
cipher!(AES_192_CTR, NAME_AES_192_CTR, 24, 16, 16, open_aes192_ctr, seal_aes192_ctr);
cipher!(AES_256_CTR, NAME_AES_256_CTR, 32, 16, 16, open_aes256_ctr, seal_aes256_ctr);
cipher!(AES_128_CBC, NAME_AES_128_CBC, 16, 16, 16, open_aes128_cbc, seal_aes128_cbc);
cipher!(AES_192_CBC, NAME_AES_192_CBC, 24, 16, 16, open_aes192_cbc, seal_aes192_cbc);
cipher!(AES_256_CBC, NAME_AES_256_CBC, 32, 16, 16, open_aes256_cbc, seal_aes256_cbc);
cipher!(TRIPLE_DES_CBC, NAME_3DES_CBC, 24, 8, 8, open_3des_cbc, seal_3des_cbc);

impl super::OpeningKey for OpeningKey {
    fn initial_read_len(&self) -> usize {
        // The length field is inside the first encrypted block.
        self.block_len
    }

    fn decrypt_packet_length(&mut self, _seqn: u32, encrypted: &[u8]) -> Result<[u8; 4], Error> {
        self.first_block.clear();
        self.first_block.resize(encrypted.len() + self.block_len);
        let n = self.crypter.update(encrypted, &mut self.first_block[..])?;
        if n < 4 {
            return Err(Error::DecryptionError);
        }
        self.first_block.resize(n);
        let mut len = [0; 4];
        len.copy_from_slice(&self.first_block[..4]);
        Ok(len)
    }

    fn tag_len(&self) -> usize {
        self.mac.mac_len()
    }

    fn open<'a>(
        &mut self,
        seqn: u32,
        ciphertext_in_plaintext_out: &'a mut [u8],
        tag: &[u8],
    ) -> Result<&'a [u8], Error> {
        let head = self.first_block.len();
        {
            let rest = &ciphertext_in_plaintext_out[head..];
            self.scratch.clear();
            self.scratch.resize(rest.len() + self.block_len);
            let n = self.crypter.update(rest, &mut self.scratch[..])?;
            if n != rest.len() {
                return Err(Error::DecryptionError);
            }
            self.scratch.resize(n);
        }
        ciphertext_in_plaintext_out[..head].copy_from_slice(&self.first_block);
        ciphertext_in_plaintext_out[head..].copy_from_slice(&self.scratch);

        // MAC-then-encrypt: the MAC covers the plaintext packet.
        if !self.mac.verify(seqn, ciphertext_in_plaintext_out, tag)? {
            return Err(Error::PacketAuth);
        }
        Ok(&ciphertext_in_plaintext_out[super::PACKET_LENGTH_LEN..])
    }
}

impl super::SealingKey for SealingKey {
    fn padding_length(&self, payload: &[u8]) -> usize {
        super::padding_length_with_length_field(payload, self.block_len.max(8))
    }

    // CBC needs unpredictable padding.
    fn fill_padding(&self, padding_out: &mut [u8]) {
        rand::thread_rng().fill_bytes(padding_out);
    }

    fn tag_len(&self) -> usize {
        self.mac.mac_len()
    }

    fn seal(
        &mut self,
        seqn: u32,
        plaintext_in_ciphertext_out: &mut [u8],
        tag_out: &mut [u8],
    ) -> Result<(), Error> {
        self.mac.compute(seqn, plaintext_in_ciphertext_out, tag_out)?;
        self.scratch.clear();
        self.scratch
            .resize(plaintext_in_ciphertext_out.len() + self.block_len);
        let n = self
            .crypter
            .update(plaintext_in_ciphertext_out, &mut self.scratch[..])?;
        if n != plaintext_in_ciphertext_out.len() {
            return Err(Error::DecryptionError);
        }
        plaintext_in_ciphertext_out.copy_from_slice(&self.scratch[..n]);
        Ok(())
    }
}
