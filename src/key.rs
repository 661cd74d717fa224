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

//! Server host keys (wire-blob parsing and KEX signature verification)
//! and the blob encoding of client public keys.

use crate::encoding::{Encoding, Reader};
use crate::Error;
use cryptovec::CryptoVec;
use openssl::bn::BigNum;
use openssl::ec::{EcGroup, EcKey, EcPoint};
use openssl::ecdsa::EcdsaSig;
use openssl::hash::MessageDigest;
use openssl::nid::Nid;
use openssl::pkey::{PKey, Public};
use openssl::sign::Verifier;
use thrussh_keys::key::{KeyPair, PublicKey};

/// Host-key algorithm names as negotiated in KEXINIT.
#[derive(Debug, PartialEq, Eq, Copy, Clone)]
pub struct Name(pub &'static str);
impl AsRef<str> for Name {
    fn as_ref(&self) -> &str {
        self.0
    }
}

pub const ED25519: Name = Name("ssh-ed25519");
pub const ECDSA_SHA2_NISTP256: Name = Name("ecdsa-sha2-nistp256");
pub const ECDSA_SHA2_NISTP384: Name = Name("ecdsa-sha2-nistp384");
pub const ECDSA_SHA2_NISTP521: Name = Name("ecdsa-sha2-nistp521");
pub const RSA_SHA2_512: Name = Name("rsa-sha2-512");
pub const RSA_SHA2_256: Name = Name("rsa-sha2-256");
pub const SSH_RSA: Name = Name("ssh-rsa");

impl Name {
    /// The key-blob type behind a signature-algorithm name: the
    /// `rsa-sha2-*` flavors all sign with an `ssh-rsa` key.
    pub fn key_blob_type(&self) -> &'static str {
        match self.0 {
            "rsa-sha2-512" | "rsa-sha2-256" => "ssh-rsa",
            other => other,
        }
    }
}

#[doc(hidden)]
pub trait PubKey {
    fn push_to(&self, buffer: &mut CryptoVec);
}

impl PubKey for PublicKey {
    fn push_to(&self, buffer: &mut CryptoVec) {
        match self {
            &PublicKey::Ed25519(ref public) => {
                buffer.push_u32_be((ED25519.0.len() + public.key.len() + 8) as u32);
                buffer.extend_ssh_string(ED25519.0.as_bytes());
                buffer.extend_ssh_string(&public.key);
            }
            &PublicKey::RSA { ref key, .. } => {
                let rsa = key.0.rsa().unwrap();
                let e = rsa.e().to_vec();
                let n = rsa.n().to_vec();
                buffer.push_u32_be(
                    (4 + SSH_RSA.0.len() + crate::encoding::mpint_len(&n) + crate::encoding::mpint_len(&e))
                        as u32,
                );
                buffer.extend_ssh_string(SSH_RSA.0.as_bytes());
                buffer.extend_ssh_mpint(&e);
                buffer.extend_ssh_mpint(&n);
            }
        }
    }
}

impl PubKey for KeyPair {
    fn push_to(&self, buffer: &mut CryptoVec) {
        match self {
            &KeyPair::Ed25519(ref key) => {
                let public = &key.key[32..];
                buffer.push_u32_be((ED25519.0.len() + public.len() + 8) as u32);
                buffer.extend_ssh_string(ED25519.0.as_bytes());
                buffer.extend_ssh_string(public);
            }
            &KeyPair::RSA { ref key, .. } => {
                let e = key.e().to_vec();
                let n = key.n().to_vec();
                buffer.push_u32_be(
                    (4 + SSH_RSA.0.len() + crate::encoding::mpint_len(&n) + crate::encoding::mpint_len(&e))
                        as u32,
                );
                buffer.extend_ssh_string(SSH_RSA.0.as_bytes());
                buffer.extend_ssh_mpint(&e);
                buffer.extend_ssh_mpint(&n);
            }
        }
    }
}

/// A host key received on the wire, parsed enough to verify the
/// exchange-hash signature and to show the embedder a fingerprint.
pub struct ServerPublicKey {
    blob: CryptoVec,
    inner: Parsed,
}

enum Parsed {
    Ed25519(sodium::ed25519::PublicKey),
    Rsa(openssl::rsa::Rsa<Public>),
    Ecdsa { key: EcKey<Public>, curve: Curve },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Curve {
    Nistp256,
    Nistp384,
    Nistp521,
}

impl Curve {
    fn from_name(name: &[u8]) -> Option<Curve> {
        match name {
            b"nistp256" => Some(Curve::Nistp256),
            b"nistp384" => Some(Curve::Nistp384),
            b"nistp521" => Some(Curve::Nistp521),
            _ => None,
        }
    }

    fn nid(self) -> Nid {
        match self {
            Curve::Nistp256 => Nid::X9_62_PRIME256V1,
            Curve::Nistp384 => Nid::SECP384R1,
            Curve::Nistp521 => Nid::SECP521R1,
        }
    }

    fn digest(self) -> MessageDigest {
        match self {
            Curve::Nistp256 => MessageDigest::sha256(),
            Curve::Nistp384 => MessageDigest::sha384(),
            Curve::Nistp521 => MessageDigest::sha512(),
        }
    }

    fn key_algorithm(self) -> &'static str {
        match self {
            Curve::Nistp256 => "ecdsa-sha2-nistp256",
            Curve::Nistp384 => "ecdsa-sha2-nistp384",
            Curve::Nistp521 => "ecdsa-sha2-nistp521",
        }
    }
}

impl std::fmt::Debug for ServerPublicKey {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "ServerPublicKey({})", self.algorithm())
    }
}

impl ServerPublicKey {
    /// Parse a `string`-framed public key blob, as sent in
    /// `KEX*_REPLY` messages.
    pub fn parse(blob: &[u8]) -> Result<ServerPublicKey, Error> {
        let mut r = blob.reader(0);
        let algo = r.read_string()?;
        let inner = match algo {
            b"ssh-ed25519" => {
                let key = r.read_string()?;
                if key.len() != sodium::ed25519::PUBLICKEY_BYTES {
                    return Err(Error::CouldNotReadKey);
                }
                let mut public = sodium::ed25519::PublicKey::new_zeroed();
                public.key.clone_from_slice(key);
                Parsed::Ed25519(public)
            }
            b"ssh-rsa" => {
                let e = r.read_mpint()?;
                let n = r.read_mpint()?;
                Parsed::Rsa(openssl::rsa::Rsa::from_public_components(
                    BigNum::from_slice(n)?,
                    BigNum::from_slice(e)?,
                )?)
            }
            b"ecdsa-sha2-nistp256" | b"ecdsa-sha2-nistp384" | b"ecdsa-sha2-nistp521" => {
                let curve_name = r.read_string()?;
                let curve = Curve::from_name(curve_name).ok_or(Error::CouldNotReadKey)?;
                if &algo[11..] != curve_name {
                    return Err(Error::CouldNotReadKey);
                }
                let point = r.read_string()?;
                let group = EcGroup::from_curve_name(curve.nid())?;
                let mut ctx = openssl::bn::BigNumContext::new()?;
                let point = EcPoint::from_bytes(&group, point, &mut ctx)?;
                let key = EcKey::from_public_key(&group, &point)?;
                Parsed::Ecdsa { key, curve }
            }
            _ => return Err(Error::CouldNotReadKey),
        };
        let mut b = CryptoVec::new();
        b.extend(blob);
        Ok(ServerPublicKey { blob: b, inner })
    }

    /// The algorithm name of the key itself (not of any particular
    /// signature flavor).
    pub fn algorithm(&self) -> &'static str {
        match self.inner {
            Parsed::Ed25519(_) => "ssh-ed25519",
            Parsed::Rsa(_) => "ssh-rsa",
            Parsed::Ecdsa { curve, .. } => curve.key_algorithm(),
        }
    }

    /// The raw wire blob of this key.
    pub fn blob(&self) -> &[u8] {
        &self.blob
    }

    /// SHA-256 over the key blob; the usual way of presenting a host
    /// key to the user for confirmation.
    pub fn fingerprint(&self) -> [u8; 32] {
        use sha2::{Digest, Sha256};
        let mut hasher = Sha256::new();
        hasher.update(&self.blob[..]);
        let mut out = [0; 32];
        out.copy_from_slice(hasher.finalize().as_ref());
        out
    }

    /// Verify the server's signature over the exchange hash. The
    /// signature blob is `string algorithm, string signature`.
    pub fn verify_kex_signature(&self, hash: &[u8], sig_blob: &[u8]) -> Result<bool, Error> {
        let mut r = sig_blob.reader(0);
        let sig_algo = r.read_string()?;
        let sig = r.read_string()?;
        match self.inner {
            Parsed::Ed25519(ref public) => {
                if sig_algo != b"ssh-ed25519" {
                    return Ok(false);
                }
                Ok(sodium::ed25519::verify_detached(sig, hash, public))
            }
            Parsed::Rsa(ref rsa) => {
                let digest = match sig_algo {
                    b"rsa-sha2-512" => MessageDigest::sha512(),
                    b"rsa-sha2-256" => MessageDigest::sha256(),
                    b"ssh-rsa" => MessageDigest::sha1(),
                    _ => return Ok(false),
                };
                let pkey = PKey::from_rsa(rsa.clone())?;
                let mut verifier = Verifier::new(digest, &pkey)?;
                verifier.update(hash)?;
                Ok(verifier.verify(sig)?)
            }
            Parsed::Ecdsa { ref key, curve } => {
                if sig_algo != curve.key_algorithm().as_bytes() {
                    return Ok(false);
                }
                // The wire signature is two SSH mpints r and s.
                let mut sr = sig.reader(0);
                let rr = sr.read_mpint()?;
                let ss = sr.read_mpint()?;
                let ecdsa_sig =
                    EcdsaSig::from_private_components(BigNum::from_slice(rr)?, BigNum::from_slice(ss)?)?;
                let digest = openssl::hash::hash(curve.digest(), hash)?;
                Ok(ecdsa_sig.verify(&digest, key)?)
            }
        }
    }
}

impl PubKey for ServerPublicKey {
    fn push_to(&self, buffer: &mut CryptoVec) {
        buffer.extend_ssh_string(&self.blob);
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn ed25519_blob() -> (CryptoVec, sodium::ed25519::SecretKey) {
        let (public, secret) = sodium::ed25519::keypair();
        let mut blob = CryptoVec::new();
        blob.extend_ssh_string(b"ssh-ed25519");
        blob.extend_ssh_string(&public.key);
        (blob, secret)
    }

    #[test]
    fn parse_and_verify_ed25519() {
        let (blob, secret) = ed25519_blob();
        let key = ServerPublicKey::parse(&blob).unwrap();
        assert_eq!(key.algorithm(), "ssh-ed25519");

        let hash = b"exchange hash bytes";
        let sig = sodium::ed25519::sign_detached(hash, &secret);
        let mut sig_blob = CryptoVec::new();
        sig_blob.extend_ssh_string(b"ssh-ed25519");
        sig_blob.extend_ssh_string(&sig.0);
        assert!(key.verify_kex_signature(hash, &sig_blob).unwrap());
        assert!(!key.verify_kex_signature(b"other hash", &sig_blob).unwrap());
    }

    #[test]
    fn unknown_algorithm_rejected() {
        let mut blob = CryptoVec::new();
        blob.extend_ssh_string(b"ssh-dss");
        blob.extend_ssh_string(b"whatever");
        assert!(ServerPublicKey::parse(&blob).is_err());
    }
}
