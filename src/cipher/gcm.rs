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

//! AES-GCM in the `@openssh.com` flavor, RFC 5647 with the OpenSSH
//! amendments: the packet length is not encrypted but is authenticated
//! as associated data, and the 12-byte nonce is a fixed prefix plus an
//! invocation counter incremented once per packet.

use crate::mac::MacKey;
use crate::Error;
use byteorder::{BigEndian, ByteOrder};
use cryptovec::CryptoVec;
use openssl::symm;

const TAG_LEN: usize = 16;
const NONCE_LEN: usize = 12;

pub struct OpeningKey {
    cipher: symm::Cipher,
    key: CryptoVec,
    nonce: [u8; NONCE_LEN],
}

pub struct SealingKey {
    cipher: symm::Cipher,
    key: CryptoVec,
    nonce: [u8; NONCE_LEN],
}

pub static AES_128_GCM: super::Cipher = super::Cipher {
    name: NAME_128,
    key_len: 16,
    nonce_len: NONCE_LEN,
    block_len: 16,
    needs_mac: false,
    make_opening_cipher: make_opening_128,
    make_sealing_cipher: make_sealing_128,
};

pub static AES_256_GCM: super::Cipher = super::Cipher {
    name: NAME_256,
    key_len: 32,
    nonce_len: NONCE_LEN,
    block_len: 16,
    needs_mac: false,
    make_opening_cipher: make_opening_256,
    make_sealing_cipher: make_sealing_256,
};

pub const NAME_128: super::Name = super::Name("aes128-gcm@openssh.com");
pub const NAME_256: super::Name = super::Name("aes256-gcm@openssh.com");

fn make_opening(
    cipher: symm::Cipher,
    k: &[u8],
    n: &[u8],
) -> Result<super::OpeningCipher, Error> {
    let mut key = CryptoVec::new();
    key.extend(k);
    let mut nonce = [0; NONCE_LEN];
    nonce.copy_from_slice(n);
    Ok(super::OpeningCipher::Gcm(OpeningKey { cipher, key, nonce }))
}

fn make_sealing(
    cipher: symm::Cipher,
    k: &[u8],
    n: &[u8],
) -> Result<super::SealingCipher, Error> {
    let mut key = CryptoVec::new();
    key.extend(k);
    let mut nonce = [0; NONCE_LEN];
    nonce.copy_from_slice(n);
    Ok(super::SealingCipher::Gcm(SealingKey { cipher, key, nonce }))
}

fn make_opening_128(k: &[u8], n: &[u8], _: Option<MacKey>) -> Result<super::OpeningCipher, Error> {
    make_opening(symm::Cipher::aes_128_gcm(), k, n)
}

fn make_sealing_128(k: &[u8], n: &[u8], _: Option<MacKey>) -> Result<super::SealingCipher, Error> {
    make_sealing(symm::Cipher::aes_128_gcm(), k, n)
}

fn make_opening_256(k: &[u8], n: &[u8], _: Option<MacKey>) -> Result<super::OpeningCipher, Error> {
    make_opening(symm::Cipher::aes_256_gcm(), k, n)
}

fn make_sealing_256(k: &[u8], n: &[u8], _: Option<MacKey>) -> Result<super::SealingCipher, Error> {
    make_sealing(symm::Cipher::aes_256_gcm(), k, n)
}

fn advance_nonce(nonce: &mut [u8; NONCE_LEN]) {
    let i0 = NONCE_LEN - 8;
    let ctr = BigEndian::read_u64(&nonce[i0..]);
    BigEndian::write_u64(&mut nonce[i0..], ctr.wrapping_add(1));
}

impl super::OpeningKey for OpeningKey {
    fn decrypt_packet_length(
        &mut self,
        _sequence_number: u32,
        encrypted_packet_length: &[u8],
    ) -> Result<[u8; 4], Error> {
        // The length field travels in clear, only authenticated.
        let mut len = [0; 4];
        len.copy_from_slice(encrypted_packet_length);
        Ok(len)
    }

    fn tag_len(&self) -> usize {
        TAG_LEN
    }

    fn open<'a>(
        &mut self,
        _sequence_number: u32,
        ciphertext_in_plaintext_out: &'a mut [u8],
        tag: &[u8],
    ) -> Result<&'a [u8], Error> {
        let (length_field, ciphertext) =
            ciphertext_in_plaintext_out.split_at_mut(super::PACKET_LENGTH_LEN);
        let plaintext =
            symm::decrypt_aead(self.cipher, &self.key, Some(&self.nonce), length_field, ciphertext, tag)
                .map_err(|_| Error::PacketAuth)?;
        ciphertext.copy_from_slice(&plaintext);
        advance_nonce(&mut self.nonce);
        Ok(&ciphertext_in_plaintext_out[super::PACKET_LENGTH_LEN..])
    }
}

impl super::SealingKey for SealingKey {
    fn padding_length(&self, payload: &[u8]) -> usize {
        super::padding_length_without_length_field(payload, 16)
    }

    fn fill_padding(&self, padding_out: &mut [u8]) {
        for padding_byte in padding_out {
            *padding_byte = 0;
        }
    }

    fn tag_len(&self) -> usize {
        TAG_LEN
    }

    fn seal(
        &mut self,
        _sequence_number: u32,
        plaintext_in_ciphertext_out: &mut [u8],
        tag_out: &mut [u8],
    ) -> Result<(), Error> {
        let (length_field, plaintext) =
            plaintext_in_ciphertext_out.split_at_mut(super::PACKET_LENGTH_LEN);
        let ciphertext = symm::encrypt_aead(
            self.cipher,
            &self.key,
            Some(&self.nonce),
            length_field,
            plaintext,
            tag_out,
        )?;
        plaintext.copy_from_slice(&ciphertext);
        advance_nonce(&mut self.nonce);
        Ok(())
    }
}
