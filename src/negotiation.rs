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
use crate::compression::Compression;
use crate::encoding::{Encoding, Reader};
use crate::{cipher, kex, key, mac, msg, Error};
use cryptovec::CryptoVec;
use rand::RngCore;
use std::str::from_utf8;

/// The outcome of algorithm negotiation: one algorithm per slot, per
/// direction where the protocol distinguishes directions.
pub struct Names {
    pub kex: kex::Name,
    pub key: key::Name,
    pub cipher_c2s: &'static cipher::Cipher,
    pub cipher_s2c: &'static cipher::Cipher,
    pub mac_c2s: &'static mac::Mac,
    pub mac_s2c: &'static mac::Mac,
    pub client_compression: Compression,
    pub server_compression: Compression,
    pub ignore_guessed: bool,
}

impl std::fmt::Debug for Names {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("Names")
            .field("kex", &self.kex)
            .field("key", &self.key)
            .field("cipher_c2s", &self.cipher_c2s.name)
            .field("cipher_s2c", &self.cipher_s2c.name)
            .field("mac_c2s", &self.mac_c2s.name)
            .field("mac_s2c", &self.mac_s2c.name)
            .field("client_compression", &self.client_compression)
            .field("server_compression", &self.server_compression)
            .field("ignore_guessed", &self.ignore_guessed)
            .finish()
    }
}

/// Lists of preferred algorithms, emitted in KEXINIT in preference
/// order.
#[derive(Debug)]
pub struct Preferred {
    /// Preferred key exchange algorithms.
    pub kex: &'static [kex::Name],
    /// Preferred host key algorithms.
    pub key: &'static [key::Name],
    /// Preferred symmetric ciphers.
    pub cipher: &'static [cipher::Name],
    /// Preferred MAC algorithms.
    pub mac: &'static [mac::Name],
    /// Preferred compression algorithms.
    pub compression: &'static [&'static str],
}

impl Preferred {
    pub const DEFAULT: Preferred = Preferred {
        kex: &[
            kex::CURVE25519,
            kex::ECDH_SHA2_NISTP521,
            kex::ECDH_SHA2_NISTP384,
            kex::ECDH_SHA2_NISTP256,
            kex::DH_GROUP16_SHA512,
            kex::DH_GROUP14_SHA256,
            kex::DH_GROUP14_SHA1,
            kex::DH_GROUP1_SHA1,
            kex::DH_GEX_SHA256,
            kex::DH_GEX_SHA1,
        ],
        key: &[
            key::ED25519,
            key::ECDSA_SHA2_NISTP256,
            key::ECDSA_SHA2_NISTP384,
            key::ECDSA_SHA2_NISTP521,
            key::RSA_SHA2_512,
            key::RSA_SHA2_256,
            key::SSH_RSA,
        ],
        cipher: &[
            cipher::chacha20poly1305::NAME,
            cipher::block::NAME_AES_128_CTR,
            cipher::block::NAME_AES_192_CTR,
            cipher::block::NAME_AES_256_CTR,
            cipher::gcm::NAME_128,
            cipher::gcm::NAME_256,
            cipher::block::NAME_AES_128_CBC,
            cipher::block::NAME_AES_192_CBC,
            cipher::block::NAME_AES_256_CBC,
            cipher::block::NAME_3DES_CBC,
        ],
        mac: &[
            mac::HMAC_SHA2_512,
            mac::HMAC_SHA2_256,
            mac::HMAC_SHA1,
            mac::HMAC_SHA1_96,
            mac::HMAC_MD5,
        ],
        compression: &["none", "zlib@openssh.com", "zlib"],
    };

    pub const COMPRESSED: Preferred = Preferred {
        kex: Preferred::DEFAULT.kex,
        key: Preferred::DEFAULT.key,
        cipher: Preferred::DEFAULT.cipher,
        mac: Preferred::DEFAULT.mac,
        compression: &["zlib@openssh.com", "zlib", "none"],
    };
}

impl Default for Preferred {
    fn default() -> Preferred {
        Preferred::DEFAULT
    }
}

/// Named algorithms.
pub trait Named {
    /// The name of this algorithm.
    fn name(&self) -> &'static str;
}

impl Named for () {
    fn name(&self) -> &'static str {
        ""
    }
}

impl Named for thrussh_keys::key::PublicKey {
    fn name(&self) -> &'static str {
        match self {
            &thrussh_keys::key::PublicKey::Ed25519(_) => key::ED25519.0,
            &thrussh_keys::key::PublicKey::RSA { .. } => key::SSH_RSA.0,
        }
    }
}

impl Named for thrussh_keys::key::KeyPair {
    fn name(&self) -> &'static str {
        match self {
            &thrussh_keys::key::KeyPair::Ed25519 { .. } => key::ED25519.0,
            &thrussh_keys::key::KeyPair::RSA { ref hash, .. } => hash.name().0,
        }
    }
}

pub trait Select {
    fn select<S: AsRef<str> + Copy>(a: &[S], b: &[u8]) -> Option<(bool, S)>;

    fn read_kex(buffer: &[u8], pref: &Preferred) -> Result<Names, Error> {
        let mut r = buffer.reader(17);
        let kex_string = r.read_name_list()?;
        let (kex_both_first, kex_algorithm) = if let Some(x) = Self::select(pref.kex, kex_string) {
            x
        } else {
            debug!(
                "Could not find common kex algorithm, other side only supports {:?}, we only support {:?}",
                from_utf8(kex_string),
                pref.kex
            );
            return Err(Error::NoCommonKexAlgo);
        };

        let key_string = r.read_name_list()?;
        let (key_both_first, key_algorithm) = if let Some(x) = Self::select(pref.key, key_string) {
            x
        } else {
            debug!(
                "Could not find common key algorithm, other side only supports {:?}, we only support {:?}",
                from_utf8(key_string),
                pref.key
            );
            return Err(Error::NoCommonKeyAlgo);
        };

        let mut pick_cipher = |r: &mut crate::encoding::Position| -> Result<&'static cipher::Cipher, Error> {
            let cipher_string = r.read_name_list()?;
            if let Some((_, name)) = Self::select(pref.cipher, cipher_string) {
                cipher::by_name(name.as_ref()).ok_or(Error::Inconsistent)
            } else {
                debug!(
                    "Could not find common cipher, other side only supports {:?}, we only support {:?}",
                    from_utf8(cipher_string),
                    pref.cipher
                );
                Err(Error::NoCommonCipher)
            }
        };
        let cipher_c2s = pick_cipher(&mut r)?;
        let cipher_s2c = pick_cipher(&mut r)?;

        let mut pick_mac = |r: &mut crate::encoding::Position| -> Result<&'static mac::Mac, Error> {
            let mac_string = r.read_name_list()?;
            if let Some((_, name)) = Self::select(pref.mac, mac_string) {
                mac::by_name(name.as_ref()).ok_or(Error::Inconsistent)
            } else {
                debug!(
                    "Could not find common MAC, other side only supports {:?}, we only support {:?}",
                    from_utf8(mac_string),
                    pref.mac
                );
                Err(Error::NoCommonMac)
            }
        };
        let mac_c2s = pick_mac(&mut r)?;
        let mac_s2c = pick_mac(&mut r)?;

        // Client-to-server compression.
        let client_compression =
            if let Some((_, c)) = Self::select(pref.compression, r.read_name_list()?) {
                Compression::from_string(c)
            } else {
                return Err(Error::NoCommonCompression);
            };
        // Server-to-client compression.
        let server_compression =
            if let Some((_, c)) = Self::select(pref.compression, r.read_name_list()?) {
                Compression::from_string(c)
            } else {
                return Err(Error::NoCommonCompression);
            };
        debug!("client_compression = {:?}", client_compression);
        r.read_string()?; // languages client-to-server
        r.read_string()?; // languages server-to-client

        let follows = r.read_byte()? != 0;
        Ok(Names {
            kex: kex_algorithm,
            key: key_algorithm,
            cipher_c2s,
            cipher_s2c,
            mac_c2s,
            mac_s2c,
            client_compression,
            server_compression,
            // Ignore the next packet if (1) it follows and (2) it's not the correct guess.
            ignore_guessed: follows && !(kex_both_first && key_both_first),
        })
    }
}

pub struct Client;

impl Select for Client {
    fn select<S: AsRef<str> + Copy>(client_list: &[S], server_list: &[u8]) -> Option<(bool, S)> {
        let mut both_first_choice = true;
        for &c in client_list {
            for s in server_list.split(|&x| x == b',') {
                if s == c.as_ref().as_bytes() {
                    return Some((both_first_choice, c));
                }
                both_first_choice = false
            }
        }
        None
    }
}

pub fn write_kex(prefs: &Preferred, buf: &mut CryptoVec) -> Result<(), Error> {
    buf.push(msg::KEXINIT);

    let mut cookie = [0; 16];
    rand::thread_rng().fill_bytes(&mut cookie);

    buf.extend(&cookie); // cookie
    buf.extend_list(prefs.kex.iter()); // kex algo

    buf.extend_list(prefs.key.iter());

    buf.extend_list(prefs.cipher.iter()); // cipher client to server
    buf.extend_list(prefs.cipher.iter()); // cipher server to client

    buf.extend_list(prefs.mac.iter()); // mac client to server
    buf.extend_list(prefs.mac.iter()); // mac server to client
    buf.extend_list(prefs.compression.iter()); // compress client to server
    buf.extend_list(prefs.compression.iter()); // compress server to client

    buf.write_empty_list(); // languages client to server
    buf.write_empty_list(); // languages server to client

    buf.push(0); // doesn't follow
    buf.extend(&[0, 0, 0, 0]); // reserved
    Ok(())
}

#[cfg(test)]
pub(crate) fn test_names() -> Names {
    Names {
        kex: kex::CURVE25519,
        key: key::ED25519,
        cipher_c2s: &cipher::chacha20poly1305::CIPHER,
        cipher_s2c: &cipher::chacha20poly1305::CIPHER,
        mac_c2s: mac::by_name("hmac-sha2-256").unwrap(),
        mac_s2c: mac::by_name("hmac-sha2-256").unwrap(),
        client_compression: Compression::None,
        server_compression: Compression::None,
        ignore_guessed: false,
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn server_kexinit(
        kex: &str,
        key: &str,
        cipher: &str,
        mac: &str,
        compression: &str,
    ) -> CryptoVec {
        let mut buf = CryptoVec::new();
        buf.push(msg::KEXINIT);
        buf.extend(&[7; 16]);
        buf.extend_ssh_string(kex.as_bytes());
        buf.extend_ssh_string(key.as_bytes());
        buf.extend_ssh_string(cipher.as_bytes());
        buf.extend_ssh_string(cipher.as_bytes());
        buf.extend_ssh_string(mac.as_bytes());
        buf.extend_ssh_string(mac.as_bytes());
        buf.extend_ssh_string(compression.as_bytes());
        buf.extend_ssh_string(compression.as_bytes());
        buf.write_empty_list();
        buf.write_empty_list();
        buf.push(0);
        buf.extend(&[0, 0, 0, 0]);
        buf
    }

    #[test]
    fn client_preference_wins() {
        // The server prefers the client's second choices; the client's
        // first supported algorithm must still win.
        let buf = server_kexinit(
            "diffie-hellman-group14-sha256,curve25519-sha256@libssh.org",
            "rsa-sha2-512,ssh-ed25519",
            "aes256-ctr,chacha20-poly1305@openssh.com",
            "hmac-sha1,hmac-sha2-512",
            "none",
        );
        let names = Client::read_kex(&buf, &Preferred::DEFAULT).unwrap();
        assert_eq!(names.kex, kex::CURVE25519);
        assert_eq!(names.key, key::ED25519);
        assert_eq!(names.cipher_c2s.name.as_ref(), "chacha20-poly1305@openssh.com");
        assert_eq!(names.mac_c2s.name.as_ref(), "hmac-sha2-512");
        assert!(!names.ignore_guessed);
    }

    #[test]
    fn no_common_kex() {
        let buf = server_kexinit(
            "some-other-kex",
            "ssh-ed25519",
            "aes128-ctr",
            "hmac-sha1",
            "none",
        );
        match Client::read_kex(&buf, &Preferred::DEFAULT) {
            Err(Error::NoCommonKexAlgo) => {}
            other => panic!("{:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn malformed_name_list_rejected() {
        let buf = server_kexinit(
            "curve25519-sha256@libssh.org,,bad",
            "ssh-ed25519",
            "aes128-ctr",
            "hmac-sha1",
            "none",
        );
        assert!(Client::read_kex(&buf, &Preferred::DEFAULT).is_err());
    }

    #[test]
    fn write_kex_round_trips_through_read() {
        let mut buf = CryptoVec::new();
        write_kex(&Preferred::DEFAULT, &mut buf).unwrap();
        let names = Client::read_kex(&buf, &Preferred::DEFAULT).unwrap();
        assert_eq!(names.kex, kex::CURVE25519);
        assert_eq!(names.cipher_c2s.name.as_ref(), "chacha20-poly1305@openssh.com");
    }
}
