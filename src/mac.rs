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

//! HMAC integrity algorithms for the non-AEAD ciphers, RFC 4253 §6.4.
//! The MAC is computed over the sequence number followed by the
//! unencrypted packet.

use crate::Error;
use byteorder::{BigEndian, ByteOrder};
use cryptovec::CryptoVec;
use openssl::hash::MessageDigest;
use openssl::memcmp;
use openssl::pkey::PKey;
use openssl::sign::Signer;

#[derive(Debug, PartialEq, Eq, Copy, Clone)]
pub struct Name(&'static str);
impl AsRef<str> for Name {
    fn as_ref(&self) -> &str {
        self.0
    }
}

pub const HMAC_SHA2_512: Name = Name("hmac-sha2-512");
pub const HMAC_SHA2_256: Name = Name("hmac-sha2-256");
pub const HMAC_SHA1: Name = Name("hmac-sha1");
pub const HMAC_SHA1_96: Name = Name("hmac-sha1-96");
pub const HMAC_MD5: Name = Name("hmac-md5");

pub struct Mac {
    pub name: Name,
    pub key_len: usize,
    pub mac_len: usize,
    digest: fn() -> MessageDigest,
}

pub static MACS: &[&Mac] = &[
    &Mac {
        name: HMAC_SHA2_512,
        key_len: 64,
        mac_len: 64,
        digest: MessageDigest::sha512,
    },
    &Mac {
        name: HMAC_SHA2_256,
        key_len: 32,
        mac_len: 32,
        digest: MessageDigest::sha256,
    },
    &Mac {
        name: HMAC_SHA1,
        key_len: 20,
        mac_len: 20,
        digest: MessageDigest::sha1,
    },
    &Mac {
        name: HMAC_SHA1_96,
        key_len: 20,
        mac_len: 12,
        digest: MessageDigest::sha1,
    },
    &Mac {
        name: HMAC_MD5,
        key_len: 16,
        mac_len: 16,
        digest: MessageDigest::md5,
    },
];

pub fn by_name(name: &str) -> Option<&'static Mac> {
    MACS.iter().find(|m| m.name.as_ref() == name).copied()
}

impl Mac {
    pub fn make_key(&'static self, key: &[u8]) -> MacKey {
        let mut k = CryptoVec::new();
        k.extend(&key[..self.key_len]);
        MacKey { mac: self, key: k }
    }
}

/// A keyed MAC for one direction of the transport.
pub struct MacKey {
    mac: &'static Mac,
    key: CryptoVec,
}

impl MacKey {
    pub fn mac_len(&self) -> usize {
        self.mac.mac_len
    }

    /// Compute the MAC over `seqn || packet` into `out`.
    pub fn compute(&self, seqn: u32, packet: &[u8], out: &mut [u8]) -> Result<(), Error> {
        let mut seqn_be = [0; 4];
        BigEndian::write_u32(&mut seqn_be, seqn);
        let pkey = PKey::hmac(&self.key)?;
        let mut signer = Signer::new((self.mac.digest)(), &pkey)?;
        signer.update(&seqn_be)?;
        signer.update(packet)?;
        let full = signer.sign_to_vec()?;
        out.copy_from_slice(&full[..self.mac.mac_len]);
        Ok(())
    }

    /// Verify a received MAC. The comparison runs in constant time.
    pub fn verify(&self, seqn: u32, packet: &[u8], tag: &[u8]) -> Result<bool, Error> {
        if tag.len() != self.mac.mac_len {
            return Ok(false);
        }
        let mut computed = [0; 64];
        let computed = &mut computed[..self.mac.mac_len];
        self.compute(seqn, packet, computed)?;
        Ok(memcmp::eq(computed, tag))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn compute_verify() {
        let mac = by_name("hmac-sha2-256").unwrap();
        let key = mac.make_key(&[7; 64]);
        let mut tag = vec![0; key.mac_len()];
        key.compute(3, b"some packet", &mut tag).unwrap();
        assert!(key.verify(3, b"some packet", &tag).unwrap());
        assert!(!key.verify(4, b"some packet", &tag).unwrap());
        assert!(!key.verify(3, b"some packet!", &tag).unwrap());
    }

    #[test]
    fn sha1_96_truncates() {
        let mac = by_name("hmac-sha1-96").unwrap();
        let key = mac.make_key(&[1; 20]);
        assert_eq!(key.mac_len(), 12);
        let mut tag = vec![0; 12];
        key.compute(0, b"x", &mut tag).unwrap();
        assert!(key.verify(0, b"x", &tag).unwrap());
        // A tag of the wrong length never verifies.
        assert!(!key.verify(0, b"x", &tag[..8]).unwrap());
    }

    #[test]
    fn known_algorithms() {
        for name in &[
            "hmac-sha2-512",
            "hmac-sha2-256",
            "hmac-sha1",
            "hmac-sha1-96",
            "hmac-md5",
        ] {
            assert!(by_name(name).is_some());
        }
        assert!(by_name("none").is_none());
    }
}
