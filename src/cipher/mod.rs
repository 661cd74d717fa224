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
use crate::mac::MacKey;
use crate::sshbuffer::SSHBuffer;
use crate::Error;
use byteorder::{BigEndian, ByteOrder};
use std::num::Wrapping;
use tokio::io::{AsyncRead, AsyncReadExt};

pub mod block;
pub mod chacha20poly1305;
pub mod clear;
pub mod gcm;

/// Hard cap on `packet_length`, checked before any allocation.
/// https://tools.ietf.org/html/rfc4253#section-6.1
pub const MAX_PACKET_LEN: usize = 35000;

/// Hard cap on the (uncompressed) payload of one packet.
pub const MAX_PAYLOAD_LEN: usize = 32768;

pub struct Cipher {
    pub name: Name,
    pub key_len: usize,
    pub nonce_len: usize,
    pub block_len: usize,
    pub needs_mac: bool,
    pub make_opening_cipher:
        fn(key: &[u8], nonce: &[u8], mac: Option<MacKey>) -> Result<OpeningCipher, Error>,
    pub make_sealing_cipher:
        fn(key: &[u8], nonce: &[u8], mac: Option<MacKey>) -> Result<SealingCipher, Error>,
}

#[derive(Debug, PartialEq, Eq, Copy, Clone)]
pub struct Name(pub(crate) &'static str);
impl AsRef<str> for Name {
    fn as_ref(&self) -> &str {
        self.0
    }
}

pub fn by_name(name: &str) -> Option<&'static Cipher> {
    match name {
        "chacha20-poly1305@openssh.com" => Some(&chacha20poly1305::CIPHER),
        "aes128-gcm@openssh.com" => Some(&gcm::AES_128_GCM),
        "aes256-gcm@openssh.com" => Some(&gcm::AES_256_GCM),
        "aes128-ctr" => Some(&block::AES_128_CTR),
        "aes192-ctr" => Some(&block::AES_192_CTR),
        "aes256-ctr" => Some(&block::AES_256_CTR),
        "aes128-cbc" => Some(&block::AES_128_CBC),
        "aes192-cbc" => Some(&block::AES_192_CBC),
        "aes256-cbc" => Some(&block::AES_256_CBC),
        "3des-cbc" => Some(&block::TRIPLE_DES_CBC),
        _ => None,
    }
}

pub enum OpeningCipher {
    Clear(clear::Key),
    Chacha20Poly1305(chacha20poly1305::OpeningKey),
    Gcm(gcm::OpeningKey),
    Block(block::OpeningKey),
}

impl OpeningCipher {
    fn as_opening_key(&mut self) -> &mut (dyn OpeningKey + Send) {
        match *self {
            OpeningCipher::Clear(ref mut key) => key,
            OpeningCipher::Chacha20Poly1305(ref mut key) => key,
            OpeningCipher::Gcm(ref mut key) => key,
            OpeningCipher::Block(ref mut key) => key,
        }
    }
}

pub enum SealingCipher {
    Clear(clear::Key),
    Chacha20Poly1305(chacha20poly1305::SealingKey),
    Gcm(gcm::SealingKey),
    Block(block::SealingKey),
}

impl SealingCipher {
    fn as_sealing_key(&mut self) -> &mut (dyn SealingKey + Send) {
        match *self {
            SealingCipher::Clear(ref mut key) => key,
            SealingCipher::Chacha20Poly1305(ref mut key) => key,
            SealingCipher::Gcm(ref mut key) => key,
            SealingCipher::Block(ref mut key) => key,
        }
    }

    /// Does the current outbound direction encrypt traffic?
    pub fn protects_confidentiality(&self) -> bool {
        !matches!(self, SealingCipher::Clear(_))
    }

    /// Does the current outbound direction authenticate traffic, either
    /// through an AEAD tag or a separate MAC?
    pub fn protects_integrity(&self) -> bool {
        match self {
            SealingCipher::Clear(_) => false,
            SealingCipher::Chacha20Poly1305(_) | SealingCipher::Gcm(_) => true,
            SealingCipher::Block(_) => true,
        }
    }
}

pub struct CipherPair {
    pub local_to_remote: SealingCipher,
    pub remote_to_local: OpeningCipher,
}

impl std::fmt::Debug for CipherPair {
    fn fmt(&self, _: &mut std::fmt::Formatter) -> Result<(), std::fmt::Error> {
        Ok(())
    }
}

pub const fn clear_pair() -> CipherPair {
    CipherPair {
        local_to_remote: SealingCipher::Clear(clear::Key),
        remote_to_local: OpeningCipher::Clear(clear::Key),
    }
}

pub trait OpeningKey {
    /// How many bytes must be read from the wire before the packet
    /// length is known. 4 unless the length field is inside an
    /// encrypted cipher block.
    fn initial_read_len(&self) -> usize {
        PACKET_LENGTH_LEN
    }

    fn decrypt_packet_length(&mut self, seqn: u32, encrypted: &[u8]) -> Result<[u8; 4], Error>;

    fn tag_len(&self) -> usize;

    fn open<'a>(
        &mut self,
        seqn: u32,
        ciphertext_in_plaintext_out: &'a mut [u8],
        tag: &[u8],
    ) -> Result<&'a [u8], Error>;
}

pub trait SealingKey {
    fn padding_length(&self, plaintext: &[u8]) -> usize;

    fn fill_padding(&self, padding_out: &mut [u8]);

    fn tag_len(&self) -> usize;

    fn seal(
        &mut self,
        seqn: u32,
        plaintext_in_ciphertext_out: &mut [u8],
        tag_out: &mut [u8],
    ) -> Result<(), Error>;
}

pub async fn read<'a, R: AsyncRead + Unpin>(
    stream: &'a mut R,
    buffer: &'a mut SSHBuffer,
    cipher: &'a mut OpeningCipher,
) -> Result<usize, Error> {
    if buffer.seqn.0 == std::u32::MAX {
        // The counter may only wrap through a rekey.
        return Err(Error::SequenceNumberOverflow);
    }
    let key = cipher.as_opening_key();
    let seqn = buffer.seqn.0;

    let head = key.initial_read_len();
    buffer.buffer.clear();
    buffer.buffer.resize(head);
    stream.read_exact(&mut buffer.buffer[..]).await?;
    debug!("reading, seqn = {:?}", seqn);

    let len = {
        let four = key.decrypt_packet_length(seqn, &buffer.buffer[..head])?;
        BigEndian::read_u32(&four) as usize
    };
    debug!("reading, clear len = {:?}", len);
    if len < PADDING_LENGTH_LEN + 4 || len > MAX_PACKET_LEN {
        return Err(Error::PacketSize(len));
    }
    buffer.len = len + key.tag_len();

    buffer.buffer.resize(buffer.len + PACKET_LENGTH_LEN);
    stream.read_exact(&mut buffer.buffer[head..]).await?;

    let ciphertext_len = buffer.buffer.len() - key.tag_len();
    let (ciphertext, tag) = buffer.buffer.split_at_mut(ciphertext_len);
    let plaintext = key.open(seqn, ciphertext, tag)?;

    let padding_length = plaintext[0] as usize;
    debug!("reading, padding_length {:?}", padding_length);
    if padding_length < 4 || padding_length + PADDING_LENGTH_LEN > len {
        return Err(Error::InvalidPadding);
    }
    let plaintext_end = plaintext
        .len()
        .checked_sub(padding_length)
        .ok_or(Error::IndexOutOfBounds)?;
    if plaintext_end > PADDING_LENGTH_LEN + MAX_PAYLOAD_LEN {
        return Err(Error::PacketSize(plaintext_end));
    }

    buffer.seqn += Wrapping(1);
    buffer.len = 0;

    // Remove the padding.
    buffer.buffer.resize(plaintext_end + PACKET_LENGTH_LEN);

    Ok(plaintext_end + PACKET_LENGTH_LEN)
}

impl SealingCipher {
    pub fn write(&mut self, payload: &[u8], buffer: &mut SSHBuffer) -> Result<(), Error> {
        // https://tools.ietf.org/html/rfc4253#section-6
        //
        // The variables `payload`, `packet_length` and `padding_length`
        // refer to the protocol fields of the same names.
        if buffer.seqn.0 == std::u32::MAX {
            return Err(Error::SequenceNumberOverflow);
        }
        debug!("writing, seqn = {:?}", buffer.seqn.0);
        let key = self.as_sealing_key();

        let padding_length = key.padding_length(payload);
        debug!("padding length {:?}", padding_length);
        let packet_length = PADDING_LENGTH_LEN + payload.len() + padding_length;
        debug!("packet_length {:?}", packet_length);
        let offset = buffer.buffer.len();

        assert!(packet_length <= MAX_PACKET_LEN);
        buffer.buffer.push_u32_be(packet_length as u32);

        assert!(padding_length <= std::u8::MAX as usize);
        buffer.buffer.push(padding_length as u8);
        buffer.buffer.extend(payload);
        key.fill_padding(buffer.buffer.resize_mut(padding_length));
        buffer.buffer.resize_mut(key.tag_len());

        let (plaintext, tag) =
            buffer.buffer[offset..].split_at_mut(PACKET_LENGTH_LEN + packet_length);

        key.seal(buffer.seqn.0, plaintext, tag)?;

        buffer.bytes += payload.len();
        buffer.seqn += Wrapping(1);
        Ok(())
    }
}

pub const PACKET_LENGTH_LEN: usize = 4;

const MINIMUM_PACKET_LEN: usize = 16;

const PADDING_LENGTH_LEN: usize = 1;

/// Padding for a cipher whose length field is not covered by the
/// cipher's own framing: the whole packet, length included, must come
/// out a multiple of the block size.
fn padding_length_with_length_field(payload: &[u8], block_size: usize) -> usize {
    let extra_len = PACKET_LENGTH_LEN + PADDING_LENGTH_LEN;
    let padding_len = if payload.len() + extra_len <= MINIMUM_PACKET_LEN {
        MINIMUM_PACKET_LEN - payload.len() - PADDING_LENGTH_LEN - PACKET_LENGTH_LEN
    } else {
        block_size - ((PACKET_LENGTH_LEN + PADDING_LENGTH_LEN + payload.len()) % block_size)
    };
    if padding_len < 4 {
        padding_len + block_size
    } else {
        padding_len
    }
}

/// Padding for AEAD-style ciphers where the length field stands outside
/// the encrypted region: only `padding_length || payload || padding` is
/// aligned.
fn padding_length_without_length_field(payload: &[u8], block_size: usize) -> usize {
    let extra_len = PACKET_LENGTH_LEN + PADDING_LENGTH_LEN;
    let padding_len = if payload.len() + extra_len <= MINIMUM_PACKET_LEN {
        MINIMUM_PACKET_LEN - payload.len() - PADDING_LENGTH_LEN
    } else {
        block_size - ((PADDING_LENGTH_LEN + payload.len()) % block_size)
    };
    if padding_len < PACKET_LENGTH_LEN {
        padding_len + block_size
    } else {
        padding_len
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::mac;

    const ALL_CIPHERS: &[&str] = &[
        "chacha20-poly1305@openssh.com",
        "aes128-gcm@openssh.com",
        "aes256-gcm@openssh.com",
        "aes128-ctr",
        "aes192-ctr",
        "aes256-ctr",
        "aes128-cbc",
        "aes192-cbc",
        "aes256-cbc",
        "3des-cbc",
    ];

    fn make_pair(name: &str) -> (SealingCipher, OpeningCipher) {
        let c = by_name(name).unwrap();
        let key = vec![0x42; c.key_len];
        let iv = vec![0x24; c.nonce_len];
        let mac_for = || {
            if c.needs_mac {
                Some(mac::by_name("hmac-sha2-256").unwrap().make_key(&[7; 64]))
            } else {
                None
            }
        };
        let seal = (c.make_sealing_cipher)(&key, &iv, mac_for()).unwrap();
        let open = (c.make_opening_cipher)(&key, &iv, mac_for()).unwrap();
        (seal, open)
    }

    #[tokio::test]
    async fn framer_round_trip_all_ciphers() {
        let max_payload = vec![0x5a; MAX_PAYLOAD_LEN];
        for name in ALL_CIPHERS {
            let (mut seal, mut open) = make_pair(name);
            for payload in &[&b""[..], &b"A"[..], &b"some payload bytes"[..], &max_payload[..]] {
                let mut wbuf = SSHBuffer::new();
                let seqn_before = wbuf.seqn.0;
                seal.write(payload, &mut wbuf).unwrap();
                assert_eq!(wbuf.seqn.0, seqn_before + 1);

                let mut rbuf = SSHBuffer::new();
                rbuf.seqn = std::num::Wrapping(seqn_before);
                let mut wire: &[u8] = &wbuf.buffer;
                let n = read(&mut wire, &mut rbuf, &mut open).await.unwrap();
                assert_eq!(&rbuf.buffer[5..n], *payload, "cipher {}", name);
            }
        }
    }

    #[tokio::test]
    async fn corrupted_packets_are_rejected() {
        for name in ALL_CIPHERS {
            let (mut seal, mut open) = make_pair(name);
            let mut wbuf = SSHBuffer::new();
            seal.write(b"an important message", &mut wbuf).unwrap();
            // Flip one bit somewhere past the length field.
            let k = wbuf.buffer.len() - 3;
            wbuf.buffer[k] ^= 1;
            let mut rbuf = SSHBuffer::new();
            let mut wire: &[u8] = &wbuf.buffer;
            assert!(
                read(&mut wire, &mut rbuf, &mut open).await.is_err(),
                "cipher {}",
                name
            );
        }
    }

    #[tokio::test]
    async fn out_of_range_lengths_are_rejected() {
        for &len in &[0u32, 35001, 0xFFFF_FFFF] {
            let mut wire_bytes = [0; 4];
            BigEndian::write_u32(&mut wire_bytes, len);
            let mut rbuf = SSHBuffer::new();
            let mut cipher = clear_pair().remote_to_local;
            let mut wire: &[u8] = &wire_bytes;
            match read(&mut wire, &mut rbuf, &mut cipher).await {
                Err(Error::PacketSize(_)) => {}
                other => panic!("{:?}", other.map(|_| ())),
            }
        }
    }

    #[tokio::test]
    async fn invalid_padding_is_rejected() {
        // A well-formed clear packet, except padding_length < 4.
        let mut wire_bytes = Vec::new();
        wire_bytes.extend_from_slice(&[0, 0, 0, 12]); // packet_length
        wire_bytes.push(2); // padding_length
        wire_bytes.extend_from_slice(&[21; 9]); // payload
        wire_bytes.extend_from_slice(&[0; 2]); // padding
        let mut rbuf = SSHBuffer::new();
        let mut cipher = clear_pair().remote_to_local;
        let mut wire: &[u8] = &wire_bytes;
        match read(&mut wire, &mut rbuf, &mut cipher).await {
            Err(Error::InvalidPadding) => {}
            other => panic!("{:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn sequence_numbers_may_not_wrap() {
        let mut seal = clear_pair().local_to_remote;
        let mut wbuf = SSHBuffer::new();
        wbuf.seqn = std::num::Wrapping(std::u32::MAX);
        match seal.write(b"x", &mut wbuf) {
            Err(Error::SequenceNumberOverflow) => {}
            other => panic!("{:?}", other),
        }
        // The rekey threshold trips well before the wrap.
        let mut b = SSHBuffer::new();
        b.seqn = std::num::Wrapping(0xF000_0001);
        assert!(b.needs_rekey_for_seqn());
        b.seqn = std::num::Wrapping(0xF000_0000);
        assert!(!b.needs_rekey_for_seqn());
    }
}
