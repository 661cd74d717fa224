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
use crate::encoding::{Encoding, Reader};
use crate::key::PubKey;
use crate::session::Exchange;
use crate::{cipher, msg, negotiation};
use cryptovec::CryptoVec;
use openssl::bn::{BigNum, BigNumContext, MsbOption};
use openssl::derive::Deriver;
use openssl::ec::{EcGroup, EcKey, EcPoint, PointConversionForm};
use openssl::nid::Nid;
use openssl::pkey::{PKey, Private};
use rand::RngCore;
use std::cell::RefCell;

#[derive(Debug, PartialEq, Eq, Copy, Clone)]
pub struct Name(&'static str);
impl AsRef<str> for Name {
    fn as_ref(&self) -> &str {
        self.0
    }
}

pub const CURVE25519: Name = Name("curve25519-sha256@libssh.org");
pub const ECDH_SHA2_NISTP256: Name = Name("ecdh-sha2-nistp256");
pub const ECDH_SHA2_NISTP384: Name = Name("ecdh-sha2-nistp384");
pub const ECDH_SHA2_NISTP521: Name = Name("ecdh-sha2-nistp521");
pub const DH_GROUP16_SHA512: Name = Name("diffie-hellman-group16-sha512");
pub const DH_GROUP14_SHA256: Name = Name("diffie-hellman-group14-sha256");
pub const DH_GROUP14_SHA1: Name = Name("diffie-hellman-group14-sha1");
pub const DH_GROUP1_SHA1: Name = Name("diffie-hellman-group1-sha1");
pub const DH_GEX_SHA256: Name = Name("diffie-hellman-group-exchange-sha256");
pub const DH_GEX_SHA1: Name = Name("diffie-hellman-group-exchange-sha1");

/// The hash used both for the exchange hash H and for key derivation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Hash {
    Sha1,
    Sha256,
    Sha384,
    Sha512,
}

impl Hash {
    pub fn hash(&self, data: &[u8]) -> Result<CryptoVec, crate::Error> {
        use sha2::Digest;
        let mut out = CryptoVec::new();
        match self {
            Hash::Sha1 => {
                let digest = openssl::hash::hash(openssl::hash::MessageDigest::sha1(), data)?;
                out.extend(&digest);
            }
            Hash::Sha256 => out.extend(sha2::Sha256::digest(data).as_ref()),
            Hash::Sha384 => out.extend(sha2::Sha384::digest(data).as_ref()),
            Hash::Sha512 => out.extend(sha2::Sha512::digest(data).as_ref()),
        }
        Ok(out)
    }

    fn bits(&self) -> i32 {
        match self {
            Hash::Sha1 => 160,
            Hash::Sha256 => 256,
            Hash::Sha384 => 384,
            Hash::Sha512 => 512,
        }
    }
}

// RFC 2409 §6.2 (Oakley group 2) and RFC 3526 §3/§5.
const DH_GROUP1_P: &str = "FFFFFFFFFFFFFFFFC90FDAA22168C234C4C6628B80DC1CD129024E088A67CC74\
                           020BBEA63B139B22514A08798E3404DDEF9519B3CD3A431B302B0A6DF25F1437\
                           4FE1356D6D51C245E485B576625E7EC6F44C42E9A637ED6B0BFF5CB6F406B7ED\
                           EE386BFB5A899FA5AE9F24117C4B1FE649286651ECE65381FFFFFFFFFFFFFFFF";

const DH_GROUP14_P: &str = "FFFFFFFFFFFFFFFFC90FDAA22168C234C4C6628B80DC1CD129024E088A67CC74\
                            020BBEA63B139B22514A08798E3404DDEF9519B3CD3A431B302B0A6DF25F1437\
                            4FE1356D6D51C245E485B576625E7EC6F44C42E9A637ED6B0BFF5CB6F406B7ED\
                            EE386BFB5A899FA5AE9F24117C4B1FE649286651ECE45B3DC2007CB8A163BF05\
                            98DA48361C55D39A69163FA8FD24CF5F83655D23DCA3AD961C62F356208552BB\
                            9ED529077096966D670C354E4ABC9804F1746C08CA18217C32905E462E36CE3B\
                            E39E772C180E86039B2783A2EC07A28FB5C55DF06F4C52C9DE2BCBF695581718\
                            3995497CEA956AE515D2261898FA051015728E5A8AACAA68FFFFFFFFFFFFFFFF";

const DH_GROUP16_P: &str = "FFFFFFFFFFFFFFFFC90FDAA22168C234C4C6628B80DC1CD129024E088A67CC74\
                            020BBEA63B139B22514A08798E3404DDEF9519B3CD3A431B302B0A6DF25F1437\
                            4FE1356D6D51C245E485B576625E7EC6F44C42E9A637ED6B0BFF5CB6F406B7ED\
                            EE386BFB5A899FA5AE9F24117C4B1FE649286651ECE45B3DC2007CB8A163BF05\
                            98DA48361C55D39A69163FA8FD24CF5F83655D23DCA3AD961C62F356208552BB\
                            9ED529077096966D670C354E4ABC9804F1746C08CA18217C32905E462E36CE3B\
                            E39E772C180E86039B2783A2EC07A28FB5C55DF06F4C52C9DE2BCBF695581718\
                            3995497CEA956AE515D2261898FA051015728E5A8AAAC42DAD33170D04507A33\
                            A85521ABDF1CBA64ECFB850458DBEF0A8AEA71575D060C7DB3970F85A6E1E4C7\
                            ABF5AE8CDB0933D71E8C94E04A25619DCEE3D2261AD2EE6BF12FFA06D98A0864\
                            D87602733EC86A64521F2B18177B200CBBE117577A615D6C770988C0BAD946E2\
                            08E24FA074E5AB3143DB5BFCE0FD108E4B82D120A92108011A723C12A787E6D7\
                            88719A10BDBA5B2699C327186AF4E23C1A946834B6150BDA2583E9CA2AD44CE8\
                            DBBBC2DB04DE8EF92E8EFC141FBECAA6287C59474E6BC05D99B2964FA090C3A2\
                            233BA186515BE7ED1F612970CEE2D7AFB81BDD762170481CD0069127D5B05AA9\
                            93B4EA988D8FDDC186FFB7DC90A6C08F4DF435C934063199FFFFFFFFFFFFFFFF";

// What this client asks for in a group exchange, RFC 4419 §3.
const GEX_MINIMUM_SIZE: u32 = 1024;
const GEX_PREFERRED_SIZE: u32 = 3072;
const GEX_MAXIMUM_SIZE: u32 = 8192;

pub struct Algorithm {
    name: Name,
    hash: Hash,
    state: State,
}

enum State {
    Curve25519 {
        local_secret: Option<sodium::scalarmult::Scalar>,
        shared_secret: Option<sodium::scalarmult::GroupElement>,
    },
    Ecdh {
        nid: Nid,
        local_key: Option<EcKey<Private>>,
        shared_secret: Option<CryptoVec>,
    },
    Dh(DhState),
    DhGroupExchange(DhState),
}

struct DhState {
    p: Option<BigNum>,
    g: Option<BigNum>,
    local_secret: Option<BigNum>,
    shared_secret: Option<CryptoVec>,
}

impl std::fmt::Debug for Algorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "Algorithm {{ name: {:?}, .. }}", self.name)
    }
}

thread_local! {
    static KEY_BUF: RefCell<CryptoVec> = RefCell::new(CryptoVec::new());
    static NONCE_BUF: RefCell<CryptoVec> = RefCell::new(CryptoVec::new());
    static MAC_BUF: RefCell<CryptoVec> = RefCell::new(CryptoVec::new());
    static BUFFER: RefCell<CryptoVec> = RefCell::new(CryptoVec::new());
}

fn group_prime(name: Name) -> Result<Option<(BigNum, BigNum)>, crate::Error> {
    let p = match name {
        DH_GROUP1_SHA1 => DH_GROUP1_P,
        DH_GROUP14_SHA1 | DH_GROUP14_SHA256 => DH_GROUP14_P,
        DH_GROUP16_SHA512 => DH_GROUP16_P,
        _ => return Ok(None),
    };
    Ok(Some((BigNum::from_hex_str(p)?, BigNum::from_u32(2)?)))
}

fn hash_of(name: Name) -> Hash {
    match name {
        CURVE25519 | ECDH_SHA2_NISTP256 | DH_GROUP14_SHA256 | DH_GEX_SHA256 => Hash::Sha256,
        ECDH_SHA2_NISTP384 => Hash::Sha384,
        ECDH_SHA2_NISTP521 | DH_GROUP16_SHA512 => Hash::Sha512,
        _ => Hash::Sha1,
    }
}

impl DhState {
    fn generate_keypair(&mut self, hash: Hash) -> Result<BigNum, crate::Error> {
        let p = self.p.as_ref().ok_or(crate::Error::KexInit)?;
        let g = self.g.as_ref().ok_or(crate::Error::KexInit)?;
        let bits = std::cmp::min(p.num_bits() - 2, 2 * hash.bits());
        let mut x = BigNum::new()?;
        x.rand(bits, MsbOption::MAYBE_ZERO, false)?;
        let mut e = BigNum::new()?;
        let mut ctx = BigNumContext::new()?;
        e.mod_exp(g, &x, p, &mut ctx)?;
        self.local_secret = Some(x);
        Ok(e)
    }

    fn compute_shared(&mut self, remote: &[u8]) -> Result<(), crate::Error> {
        let p = self.p.as_ref().ok_or(crate::Error::Kex)?;
        let x = self.local_secret.take().ok_or(crate::Error::Kex)?;
        let f = BigNum::from_slice(remote)?;
        // 1 < f < p - 1, RFC 4253 §8.
        let one = BigNum::from_u32(1)?;
        let mut p_minus_one = BigNum::new()?;
        p_minus_one.checked_sub(p, &one)?;
        if f <= one || f >= p_minus_one {
            return Err(crate::Error::Kex);
        }
        let mut k = BigNum::new()?;
        let mut ctx = BigNumContext::new()?;
        k.mod_exp(&f, &x, p, &mut ctx)?;
        let mut shared = CryptoVec::new();
        shared.extend(&k.to_vec());
        self.shared_secret = Some(shared);
        Ok(())
    }
}

impl Algorithm {
    pub fn hash(&self) -> Hash {
        self.hash
    }

    pub fn is_group_exchange(&self) -> bool {
        matches!(self.state, State::DhGroupExchange(_))
    }

    /// Start the client side of the exchange: generate an ephemeral and
    /// write the first key-exchange packet into `buf`. For the
    /// group-exchange methods the first packet is the group request and
    /// the ephemeral is only generated once the group arrives.
    pub fn client_dh(
        name: Name,
        client_ephemeral: &mut CryptoVec,
        buf: &mut CryptoVec,
    ) -> Result<Algorithm, crate::Error> {
        let hash = hash_of(name);
        client_ephemeral.clear();
        let state = match name {
            CURVE25519 => {
                use sodium::scalarmult::*;
                let mut client_secret = Scalar([0; 32]);
                rand::thread_rng().fill_bytes(&mut client_secret.0);
                let client_pubkey = scalarmult_base(&client_secret);

                client_ephemeral.extend(&client_pubkey.0);
                buf.push(msg::KEX_ECDH_INIT);
                buf.extend_ssh_string(&client_pubkey.0);

                State::Curve25519 {
                    local_secret: Some(client_secret),
                    shared_secret: None,
                }
            }
            ECDH_SHA2_NISTP256 | ECDH_SHA2_NISTP384 | ECDH_SHA2_NISTP521 => {
                let nid = match name {
                    ECDH_SHA2_NISTP256 => Nid::X9_62_PRIME256V1,
                    ECDH_SHA2_NISTP384 => Nid::SECP384R1,
                    _ => Nid::SECP521R1,
                };
                let group = EcGroup::from_curve_name(nid)?;
                let local_key = EcKey::generate(&group)?;
                let mut ctx = BigNumContext::new()?;
                let point =
                    local_key
                        .public_key()
                        .to_bytes(&group, PointConversionForm::UNCOMPRESSED, &mut ctx)?;

                client_ephemeral.extend(&point);
                buf.push(msg::KEX_ECDH_INIT);
                buf.extend_ssh_string(&point);

                State::Ecdh {
                    nid,
                    local_key: Some(local_key),
                    shared_secret: None,
                }
            }
            DH_GEX_SHA1 | DH_GEX_SHA256 => {
                buf.push(msg::KEX_DH_GEX_REQUEST);
                buf.push_u32_be(GEX_MINIMUM_SIZE);
                buf.push_u32_be(GEX_PREFERRED_SIZE);
                buf.push_u32_be(GEX_MAXIMUM_SIZE);

                State::DhGroupExchange(DhState {
                    p: None,
                    g: None,
                    local_secret: None,
                    shared_secret: None,
                })
            }
            _ => {
                let (p, g) = group_prime(name)?.ok_or(crate::Error::NoCommonKexAlgo)?;
                let mut dh = DhState {
                    p: Some(p),
                    g: Some(g),
                    local_secret: None,
                    shared_secret: None,
                };
                let e = dh.generate_keypair(hash)?;

                client_ephemeral.extend(&e.to_vec());
                buf.push(msg::KEX_DH_INIT);
                buf.extend_ssh_mpint(&e.to_vec());

                State::Dh(dh)
            }
        };
        Ok(Algorithm { name, hash, state })
    }

    /// Handle `KEX_DH_GEX_GROUP`: adopt the server's group, generate
    /// the ephemeral and write `KEX_DH_GEX_INIT` into `buf`.
    pub fn client_gex_group(
        &mut self,
        payload: &[u8],
        client_ephemeral: &mut CryptoVec,
        buf: &mut CryptoVec,
    ) -> Result<(), crate::Error> {
        let hash = self.hash;
        match self.state {
            State::DhGroupExchange(ref mut dh) => {
                let mut r = payload.reader(1);
                let p = BigNum::from_slice(r.read_mpint()?)?;
                let g = BigNum::from_slice(r.read_mpint()?)?;
                let bits = p.num_bits() as u32;
                if bits < GEX_MINIMUM_SIZE || bits > GEX_MAXIMUM_SIZE {
                    return Err(crate::Error::Kex);
                }
                dh.p = Some(p);
                dh.g = Some(g);
                let e = dh.generate_keypair(hash)?;

                client_ephemeral.clear();
                client_ephemeral.extend(&e.to_vec());
                buf.push(msg::KEX_DH_GEX_INIT);
                buf.extend_ssh_mpint(&e.to_vec());
                Ok(())
            }
            _ => Err(crate::Error::Inconsistent),
        }
    }

    pub fn compute_shared_secret(&mut self, remote_pubkey: &[u8]) -> Result<(), crate::Error> {
        match self.state {
            State::Curve25519 {
                ref mut local_secret,
                ref mut shared_secret,
            } => {
                use sodium::scalarmult::*;
                let local_secret = local_secret.take().ok_or(crate::Error::Kex)?;
                if remote_pubkey.len() != 32 {
                    return Err(crate::Error::Kex);
                }
                let mut remote = GroupElement([0; 32]);
                remote.0.clone_from_slice(remote_pubkey);
                *shared_secret = Some(scalarmult(&local_secret, &remote));
            }
            State::Ecdh {
                nid,
                ref mut local_key,
                ref mut shared_secret,
            } => {
                let local_key = local_key.take().ok_or(crate::Error::Kex)?;
                let group = EcGroup::from_curve_name(nid)?;
                let mut ctx = BigNumContext::new()?;
                let point = EcPoint::from_bytes(&group, remote_pubkey, &mut ctx)?;
                let peer = PKey::from_ec_key(EcKey::from_public_key(&group, &point)?)?;
                let local = PKey::from_ec_key(local_key)?;
                let mut deriver = Deriver::new(&local)?;
                deriver.set_peer(&peer)?;
                let secret = deriver.derive_to_vec()?;
                let mut shared = CryptoVec::new();
                shared.extend(&secret);
                *shared_secret = Some(shared);
            }
            State::Dh(ref mut dh) | State::DhGroupExchange(ref mut dh) => {
                dh.compute_shared(remote_pubkey)?
            }
        }
        Ok(())
    }

    fn extend_shared_mpint(&self, buffer: &mut CryptoVec) {
        match self.state {
            State::Curve25519 { ref shared_secret, .. } => {
                if let Some(ref shared) = *shared_secret {
                    buffer.extend_ssh_mpint(&shared.0);
                }
            }
            State::Ecdh { ref shared_secret, .. } => {
                if let Some(ref shared) = *shared_secret {
                    buffer.extend_ssh_mpint(shared);
                }
            }
            State::Dh(ref dh) | State::DhGroupExchange(ref dh) => {
                if let Some(ref shared) = dh.shared_secret {
                    buffer.extend_ssh_mpint(shared);
                }
            }
        }
    }

    pub fn compute_exchange_hash<K: PubKey>(
        &self,
        key: &K,
        exchange: &Exchange,
        buffer: &mut CryptoVec,
    ) -> Result<CryptoVec, crate::Error> {
        // The transcript of RFC 4253 §8 / RFC 5656 §4 / RFC 4419 §3,
        // in the canonical per-algorithm order.
        buffer.clear();
        buffer.extend_ssh_string(&exchange.client_id);
        buffer.extend_ssh_string(&exchange.server_id);
        buffer.extend_ssh_string(&exchange.client_kex_init);
        buffer.extend_ssh_string(&exchange.server_kex_init);

        key.push_to(buffer);
        match self.state {
            State::Curve25519 { .. } | State::Ecdh { .. } => {
                buffer.extend_ssh_string(&exchange.client_ephemeral);
                buffer.extend_ssh_string(&exchange.server_ephemeral);
            }
            State::Dh(_) => {
                buffer.extend_ssh_mpint(&exchange.client_ephemeral);
                buffer.extend_ssh_mpint(&exchange.server_ephemeral);
            }
            State::DhGroupExchange(ref dh) => {
                buffer.push_u32_be(GEX_MINIMUM_SIZE);
                buffer.push_u32_be(GEX_PREFERRED_SIZE);
                buffer.push_u32_be(GEX_MAXIMUM_SIZE);
                let p = dh.p.as_ref().ok_or(crate::Error::Kex)?;
                let g = dh.g.as_ref().ok_or(crate::Error::Kex)?;
                buffer.extend_ssh_mpint(&p.to_vec());
                buffer.extend_ssh_mpint(&g.to_vec());
                buffer.extend_ssh_mpint(&exchange.client_ephemeral);
                buffer.extend_ssh_mpint(&exchange.server_ephemeral);
            }
        }
        self.extend_shared_mpint(buffer);
        self.hash.hash(buffer)
    }

    pub fn compute_keys(
        &self,
        session_id: &CryptoVec,
        exchange_hash: &CryptoVec,
        names: &negotiation::Names,
    ) -> Result<cipher::CipherPair, crate::Error> {
        // https://tools.ietf.org/html/rfc4253#section-7.2
        BUFFER.with(|buffer| {
            KEY_BUF.with(|key| {
                NONCE_BUF.with(|nonce| {
                    MAC_BUF.with(|mac_key| {
                        let compute_key =
                            |c: u8, key: &mut CryptoVec, len: usize| -> Result<(), crate::Error> {
                                let mut buffer = buffer.borrow_mut();
                                buffer.clear();
                                key.clear();

                                self.extend_shared_mpint(&mut buffer);
                                buffer.extend(exchange_hash);
                                buffer.push(c);
                                buffer.extend(session_id);
                                key.extend(&self.hash.hash(&buffer)?);

                                while key.len() < len {
                                    // Extend.
                                    buffer.clear();
                                    self.extend_shared_mpint(&mut buffer);
                                    buffer.extend(exchange_hash);
                                    buffer.extend(key);
                                    key.extend(&self.hash.hash(&buffer)?);
                                }

                                key.resize(len);
                                Ok(())
                            };

                        let mut key = key.borrow_mut();
                        let mut nonce = nonce.borrow_mut();
                        let mut mac_key = mac_key.borrow_mut();

                        // Client to server: IV 'A', key 'C', MAC 'E'.
                        let c = names.cipher_c2s;
                        compute_key(b'A', &mut nonce, c.nonce_len)?;
                        compute_key(b'C', &mut key, c.key_len)?;
                        let mac = if c.needs_mac {
                            compute_key(b'E', &mut mac_key, names.mac_c2s.key_len)?;
                            Some(names.mac_c2s.make_key(&mac_key))
                        } else {
                            None
                        };
                        let local_to_remote = (c.make_sealing_cipher)(&key, &nonce, mac)?;

                        // Server to client: IV 'B', key 'D', MAC 'F'.
                        let c = names.cipher_s2c;
                        compute_key(b'B', &mut nonce, c.nonce_len)?;
                        compute_key(b'D', &mut key, c.key_len)?;
                        let mac = if c.needs_mac {
                            compute_key(b'F', &mut mac_key, names.mac_s2c.key_len)?;
                            Some(names.mac_s2c.make_key(&mac_key))
                        } else {
                            None
                        };
                        let remote_to_local = (c.make_opening_cipher)(&key, &nonce, mac)?;

                        Ok(cipher::CipherPair {
                            local_to_remote,
                            remote_to_local,
                        })
                    })
                })
            })
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn compute_keys_builds_the_negotiated_pair() {
        let mut ephemeral = CryptoVec::new();
        let mut buf = CryptoVec::new();
        let mut client = Algorithm::client_dh(CURVE25519, &mut ephemeral, &mut buf).unwrap();

        // Play the server with a second ephemeral.
        use sodium::scalarmult::*;
        let mut server_secret = Scalar([0; 32]);
        rand::thread_rng().fill_bytes(&mut server_secret.0);
        let server_pubkey = scalarmult_base(&server_secret);
        client.compute_shared_secret(&server_pubkey.0).unwrap();

        let mut session_id = CryptoVec::new();
        session_id.extend(&[1; 32]);
        let hash = client.hash().hash(b"transcript").unwrap();

        let names = negotiation::test_names();
        let pair = client.compute_keys(&session_id, &hash, &names).unwrap();
        // Both halves exist and the pair is AEAD (no separate MAC).
        match pair.local_to_remote {
            cipher::SealingCipher::Chacha20Poly1305(_) => {}
            _ => panic!("unexpected cipher"),
        }
    }

    #[test]
    fn dh_group14_round_trip() {
        let mut e_buf = CryptoVec::new();
        let mut buf = CryptoVec::new();
        let mut client = Algorithm::client_dh(DH_GROUP14_SHA256, &mut e_buf, &mut buf).unwrap();
        assert_eq!(buf[0], msg::KEX_DH_INIT);

        // Server side of the same exchange, by hand.
        let p = BigNum::from_hex_str(DH_GROUP14_P).unwrap();
        let g = BigNum::from_u32(2).unwrap();
        let mut y = BigNum::new().unwrap();
        y.rand(256, MsbOption::MAYBE_ZERO, false).unwrap();
        let mut ctx = BigNumContext::new().unwrap();
        let mut f = BigNum::new().unwrap();
        f.mod_exp(&g, &y, &p, &mut ctx).unwrap();

        client.compute_shared_secret(&f.to_vec()).unwrap();

        // K = e^y mod p must match what the client derived.
        let e = BigNum::from_slice(&e_buf).unwrap();
        let mut k = BigNum::new().unwrap();
        k.mod_exp(&e, &y, &p, &mut ctx).unwrap();
        let mut transcript = CryptoVec::new();
        client.extend_shared_mpint(&mut transcript);
        let mut expected = CryptoVec::new();
        expected.extend_ssh_mpint(&k.to_vec());
        assert_eq!(&transcript[..], &expected[..]);
    }

    #[test]
    fn dh_rejects_trivial_server_public() {
        let mut e_buf = CryptoVec::new();
        let mut buf = CryptoVec::new();
        let mut client = Algorithm::client_dh(DH_GROUP14_SHA1, &mut e_buf, &mut buf).unwrap();
        assert!(client.compute_shared_secret(&[1]).is_err());
    }

    #[test]
    fn gex_flow_emits_request_then_init() {
        let mut e_buf = CryptoVec::new();
        let mut buf = CryptoVec::new();
        let mut client = Algorithm::client_dh(DH_GEX_SHA256, &mut e_buf, &mut buf).unwrap();
        assert!(client.is_group_exchange());
        assert_eq!(buf[0], msg::KEX_DH_GEX_REQUEST);
        assert!(e_buf.is_empty());

        let mut group = CryptoVec::new();
        group.push(msg::KEX_DH_GEX_GROUP);
        let p = BigNum::from_hex_str(DH_GROUP14_P).unwrap();
        group.extend_ssh_mpint(&p.to_vec());
        group.extend_ssh_mpint(&[2]);

        let mut init = CryptoVec::new();
        client.client_gex_group(&group, &mut e_buf, &mut init).unwrap();
        assert_eq!(init[0], msg::KEX_DH_GEX_INIT);
        assert!(!e_buf.is_empty());
    }
}
