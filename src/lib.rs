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

//! An asynchronous SSH-2 client library, based on tokio/futures.
//!
//! The normal way to use this library is to create a *handler*, i.e. a
//! type implementing [`client::Handler`], then call
//! [`client::connect`]. The handler answers the questions the protocol
//! engine cannot decide alone (most importantly whether the server's
//! host key is trusted), and receives unsolicited events such as
//! banners or server-initiated channels. Everything else happens
//! through the returned [`client::Handle`]: authentication, opening
//! channels, requesting remote forwards, and sending data.
//!
//! ```no_run
//! use std::sync::Arc;
//! use hawser::*;
//!
//! struct Client {}
//!
//! impl client::Handler for Client {
//!     type Error = hawser::Error;
//!     type FutureUnit = futures::future::Ready<Result<(Self, client::Session), Self::Error>>;
//!     type FutureBool = futures::future::Ready<Result<(Self, bool), Self::Error>>;
//!     type FuturePassword = futures::future::Ready<Result<(Self, Option<String>), Self::Error>>;
//!     type FutureResponses =
//!         futures::future::Ready<Result<(Self, Option<Vec<String>>), Self::Error>>;
//!
//!     fn finished_bool(self, b: bool) -> Self::FutureBool {
//!         futures::future::ready(Ok((self, b)))
//!     }
//!     fn finished(self, session: client::Session) -> Self::FutureUnit {
//!         futures::future::ready(Ok((self, session)))
//!     }
//!     fn finished_password(self, password: Option<String>) -> Self::FuturePassword {
//!         futures::future::ready(Ok((self, password)))
//!     }
//!     fn finished_responses(self, responses: Option<Vec<String>>) -> Self::FutureResponses {
//!         futures::future::ready(Ok((self, responses)))
//!     }
//!     fn check_server_key(self, key: &key::ServerPublicKey) -> Self::FutureBool {
//!         println!("host key fingerprint: {:?}", key.fingerprint());
//!         self.finished_bool(true)
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), anyhow::Error> {
//!     let config = Arc::new(client::Config::default());
//!     let mut session = client::connect(config, "localhost:22", Client {}).await?;
//!     let authenticated = session
//!         .authenticate_password("alice", "correct horse battery staple")
//!         .await?;
//!     assert!(authenticated);
//!     let mut channel = session.channel_open_session().await?;
//!     channel.exec(true, "echo hi").await?;
//!     while let Some(msg) = channel.wait().await {
//!         if let ChannelMsg::Data { data } = msg {
//!             print!("{}", String::from_utf8_lossy(&data));
//!         }
//!     }
//!     Ok(())
//! }
//! ```
//!
//! # The protocol stack
//!
//! Three layers run over one socket: the *transport* (version
//! exchange, key exchange, packet encryption and integrity, rekeying),
//! *user authentication* (a queue of methods tried in policy order
//! until the server accepts one), and the *connection* layer
//! (channels, multiplexed and individually flow-controlled, plus
//! global requests for port forwarding and keepalives).
//!
//! The event loop owning all protocol state runs in a single spawned
//! task; [`client::Handle`] and [`client::Channel`] communicate with
//! it through bounded queues. Keying material is owned by the
//! transport and never leaves it.

#[macro_use]
extern crate bitflags;
#[macro_use]
extern crate log;
extern crate thrussh_libsodium as sodium;
#[macro_use]
extern crate thiserror;

use std::fmt::{Display, Formatter};

pub use cryptovec::CryptoVec;
pub mod auth;
mod cipher;
mod compression;
pub mod encoding;
mod flow;
mod kex;
pub mod key;
mod mac;
mod msg;
mod negotiation;
mod ssh_read;
mod sshbuffer;

pub use negotiation::{Named, Preferred};
mod pty;
pub use pty::Pty;

macro_rules! push_packet {
    ( $buffer:expr, $x:expr ) => {{
        use byteorder::{BigEndian, ByteOrder};
        let i0 = $buffer.len();
        $buffer.extend(b"\0\0\0\0");
        let x = $x;
        let i1 = $buffer.len();
        use std::ops::DerefMut;
        let buf = $buffer.deref_mut();
        BigEndian::write_u32(&mut buf[i0..], (i1 - i0 - 4) as u32);
        x
    }};
}

mod session;

/// Client side of this library.
pub mod client;

#[derive(Debug, Error)]
pub enum Error {
    /// The key blob could not be parsed.
    #[error("Could not read key")]
    CouldNotReadKey,

    /// Unspecified problem with the beginning of key exchange.
    #[error("Key exchange init failed")]
    KexInit,

    /// No common key exchange algorithm.
    #[error("No common key exchange algorithm")]
    NoCommonKexAlgo,

    /// No common host key algorithm.
    #[error("No common key algorithm")]
    NoCommonKeyAlgo,

    /// No common cipher.
    #[error("No common key cipher")]
    NoCommonCipher,

    /// No common MAC algorithm.
    #[error("No common MAC algorithm")]
    NoCommonMac,

    /// No common compression algorithm.
    #[error("No common compression algorithm")]
    NoCommonCompression,

    /// Invalid SSH version string.
    #[error("invalid SSH version string")]
    Version,

    /// Error during key exchange.
    #[error("Key exchange failed")]
    Kex,

    /// Invalid packet authentication code.
    #[error("Wrong packet authentication code")]
    PacketAuth,

    /// The protocol is in an inconsistent state.
    #[error("Inconsistent state of the protocol")]
    Inconsistent,

    /// The client is not yet authenticated.
    #[error("Not yet authenticated")]
    NotAuthenticated,

    /// Index out of bounds.
    #[error("Index out of bounds")]
    IndexOutOfBounds,

    /// A name-list contained an invalid name.
    #[error("Invalid name-list")]
    InvalidNameList,

    /// The host key was rejected by the verification callback.
    #[error("Unknown server key")]
    UnknownKey,

    /// The server provided a wrong signature.
    #[error("Wrong server signature")]
    WrongServerSig,

    /// Message received/sent on unopened channel.
    #[error("Channel not open")]
    WrongChannel,

    /// Disconnected.
    #[error("Disconnected")]
    Disconnect,

    /// The remote side sent a disconnect message.
    #[error("Disconnected by the remote side: {} (reason {})", description, reason)]
    RemoteDisconnect { reason: u32, description: String },

    /// Connection closed by the remote side.
    #[error("Connection closed by the remote side")]
    HUP,

    /// Connection timeout.
    #[error("Connection timeout")]
    ConnectionTimeout,

    /// The server did not answer our keepalive probes.
    #[error("Keepalive timeout")]
    KeepaliveTimeout,

    /// Missing authentication method.
    #[error("No authentication method")]
    NoAuthMethod,

    /// Too many authentication attempts were made.
    #[error("Maximum number of authentication attempts exceeded")]
    AuthAttemptsExceeded,

    /// Authentication did not finish in time.
    #[error("Authentication timeout")]
    AuthTimeout,

    /// The server answered a global request with `REQUEST_FAILURE`.
    #[error("Global request failed")]
    RequestFailure,

    #[error("Channel send error")]
    SendError,

    #[error("Pending buffer limit reached")]
    Pending,

    #[error("Failed to decrypt a packet")]
    DecryptionError,

    /// Invalid packet length field.
    #[error("Bad packet size: {0}")]
    PacketSize(usize),

    /// Invalid padding length.
    #[error("Invalid padding")]
    InvalidPadding,

    /// The packet sequence number would wrap without a rekey.
    #[error("Packet sequence number would wrap")]
    SequenceNumberOverflow,

    #[error(transparent)]
    Keys(#[from] thrussh_keys::Error),

    #[error(transparent)]
    IO(#[from] std::io::Error),

    #[error(transparent)]
    Utf8(#[from] std::str::Utf8Error),

    #[error(transparent)]
    #[cfg(feature = "flate2")]
    Compress(#[from] flate2::CompressError),

    #[error(transparent)]
    #[cfg(feature = "flate2")]
    Decompress(#[from] flate2::DecompressError),

    #[error(transparent)]
    Join(#[from] tokio::task::JoinError),

    #[error(transparent)]
    Openssl(#[from] openssl::error::ErrorStack),

    #[error(transparent)]
    Elapsed(#[from] tokio::time::error::Elapsed),
}

#[derive(Debug, Error)]
#[error("Could not reach the event loop")]
pub struct SendError {}

/// The number of bytes read/written, and the number of seconds before a key
/// re-exchange is requested.
#[derive(Debug, Clone)]
pub struct Limits {
    pub rekey_write_limit: usize,
    pub rekey_read_limit: usize,
    pub rekey_time_limit: std::time::Duration,
}

impl Limits {
    /// Create a new `Limits`, checking that the given bounds cannot lead to
    /// nonce reuse.
    pub fn new(write_limit: usize, read_limit: usize, time_limit: std::time::Duration) -> Limits {
        assert!(write_limit <= 1 << 30 && read_limit <= 1 << 30);
        Limits {
            rekey_write_limit: write_limit,
            rekey_read_limit: read_limit,
            rekey_time_limit: time_limit,
        }
    }
}

impl Default for Limits {
    fn default() -> Self {
        // Following the recommendations of
        // https://tools.ietf.org/html/rfc4253#section-9
        Limits {
            rekey_write_limit: 1 << 30, // 1 GiB
            rekey_read_limit: 1 << 30,
            rekey_time_limit: std::time::Duration::from_secs(3600),
        }
    }
}

pub use auth::{AgentAuthError, MethodSet, Signer};

/// A reason for disconnection.
#[allow(missing_docs)] // This should be relatively self-explanatory.
#[derive(Debug, Clone, Copy)]
pub enum Disconnect {
    HostNotAllowedToConnect = 1,
    ProtocolError = 2,
    KeyExchangeFailed = 3,
    #[doc(hidden)]
    Reserved = 4,
    MACError = 5,
    CompressionError = 6,
    ServiceNotAvailable = 7,
    ProtocolVersionNotSupported = 8,
    HostKeyNotVerifiable = 9,
    ConnectionLost = 10,
    ByApplication = 11,
    TooManyConnections = 12,
    AuthCancelledByUser = 13,
    NoMoreAuthMethodsAvailable = 14,
    IllegalUserName = 15,
}

/// The type of signals that can be sent to a remote process. If you
/// plan to use custom signals, read [the
/// RFC](https://tools.ietf.org/html/rfc4254#section-6.10) to
/// understand the encoding.
#[allow(missing_docs)]
// This should be relatively self-explanatory.
#[derive(Debug, Clone)]
pub enum Sig {
    ABRT,
    ALRM,
    FPE,
    HUP,
    ILL,
    INT,
    KILL,
    PIPE,
    QUIT,
    SEGV,
    TERM,
    USR1,
    Custom(String),
}

impl Sig {
    fn name(&self) -> &str {
        match *self {
            Sig::ABRT => "ABRT",
            Sig::ALRM => "ALRM",
            Sig::FPE => "FPE",
            Sig::HUP => "HUP",
            Sig::ILL => "ILL",
            Sig::INT => "INT",
            Sig::KILL => "KILL",
            Sig::PIPE => "PIPE",
            Sig::QUIT => "QUIT",
            Sig::SEGV => "SEGV",
            Sig::TERM => "TERM",
            Sig::USR1 => "USR1",
            Sig::Custom(ref c) => c,
        }
    }
    fn from_name(name: &[u8]) -> Result<Sig, Error> {
        match name {
            b"ABRT" => Ok(Sig::ABRT),
            b"ALRM" => Ok(Sig::ALRM),
            b"FPE" => Ok(Sig::FPE),
            b"HUP" => Ok(Sig::HUP),
            b"ILL" => Ok(Sig::ILL),
            b"INT" => Ok(Sig::INT),
            b"KILL" => Ok(Sig::KILL),
            b"PIPE" => Ok(Sig::PIPE),
            b"QUIT" => Ok(Sig::QUIT),
            b"SEGV" => Ok(Sig::SEGV),
            b"TERM" => Ok(Sig::TERM),
            b"USR1" => Ok(Sig::USR1),
            x => Ok(Sig::Custom(std::str::from_utf8(x)?.to_string())),
        }
    }
}

/// Reason for not being able to open a channel.
#[derive(Debug, Copy, Clone, PartialEq)]
#[allow(missing_docs)]
pub enum ChannelOpenFailure {
    AdministrativelyProhibited = 1,
    ConnectFailed = 2,
    UnknownChannelType = 3,
    ResourceShortage = 4,
}

impl ChannelOpenFailure {
    fn from_u32(x: u32) -> Option<ChannelOpenFailure> {
        match x {
            1 => Some(ChannelOpenFailure::AdministrativelyProhibited),
            2 => Some(ChannelOpenFailure::ConnectFailed),
            3 => Some(ChannelOpenFailure::UnknownChannelType),
            4 => Some(ChannelOpenFailure::ResourceShortage),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
/// The identifier of a channel.
pub struct ChannelId(pub(crate) u32);

impl Display for ChannelId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What a channel carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelType {
    Session,
    DirectTcpip,
    ForwardedTcpip,
    X11,
    AuthAgent,
}

impl ChannelType {
    pub(crate) fn wire_name(&self) -> &'static str {
        match self {
            ChannelType::Session => "session",
            ChannelType::DirectTcpip => "direct-tcpip",
            ChannelType::ForwardedTcpip => "forwarded-tcpip",
            ChannelType::X11 => "x11",
            ChannelType::AuthAgent => "auth-agent@openssh.com",
        }
    }
}

/// The parameters of a channel.
#[derive(Debug)]
pub(crate) struct Channel {
    pub kind: ChannelType,
    pub recipient_channel: u32,
    pub recipient_window_size: u32,
    pub recipient_maximum_packet_size: u32,
    pub sender_maximum_packet_size: u32,
    /// Receive-window sizing for this channel.
    pub flow: crate::flow::WindowController,
    /// Has the other side confirmed the channel?
    pub confirmed: bool,
    pub sent_eof: bool,
    pub received_eof: bool,
    pub sent_close: bool,
    pub received_close: bool,
    pub pending_data: std::collections::VecDeque<(CryptoVec, Option<u32>, usize)>,
    /// Names of our channel requests still awaiting a
    /// `CHANNEL_SUCCESS`/`CHANNEL_FAILURE`, in send order.
    pub pending_requests: std::collections::VecDeque<String>,
}

#[derive(Debug)]
pub enum ChannelMsg {
    Data {
        data: CryptoVec,
    },
    ExtendedData {
        data: CryptoVec,
        ext: u32,
    },
    Eof,
    Close,
    XonXoff {
        client_can_do: bool,
    },
    ExitStatus {
        exit_status: u32,
    },
    ExitSignal {
        signal_name: Sig,
        core_dumped: bool,
        error_message: String,
        lang_tag: String,
    },
    WindowAdjusted {
        new_size: u32,
    },
    /// The reply to a channel request with `want_reply`.
    Success,
    /// The failure reply to a channel request with `want_reply`.
    Failure,
}

#[cfg(test)]
mod test_client {
    use super::client;
    use super::*;
    use crate::encoding::{Encoding, Reader};
    use crate::sshbuffer::SSHBuffer;
    use crate::{cipher, kex, msg, negotiation};
    use rand::RngCore;
    use std::sync::Arc;
    use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};

    struct Client {}

    impl client::Handler for Client {
        type Error = super::Error;
        type FutureUnit = futures::future::Ready<Result<(Self, client::Session), Self::Error>>;
        type FutureBool = futures::future::Ready<Result<(Self, bool), Self::Error>>;
        type FuturePassword = futures::future::Ready<Result<(Self, Option<String>), Self::Error>>;
        type FutureResponses =
            futures::future::Ready<Result<(Self, Option<Vec<String>>), Self::Error>>;

        fn finished_bool(self, b: bool) -> Self::FutureBool {
            futures::future::ready(Ok((self, b)))
        }
        fn finished(self, session: client::Session) -> Self::FutureUnit {
            futures::future::ready(Ok((self, session)))
        }
        fn finished_password(self, password: Option<String>) -> Self::FuturePassword {
            futures::future::ready(Ok((self, password)))
        }
        fn finished_responses(self, responses: Option<Vec<String>>) -> Self::FutureResponses {
            futures::future::ready(Ok((self, responses)))
        }
        fn check_server_key(
            self,
            server_public_key: &crate::key::ServerPublicKey,
        ) -> Self::FutureBool {
            debug!("check_server_key: {:?}", server_public_key);
            self.finished_bool(true)
        }
    }

    /// The server half of the wire, scripted by hand.
    struct Peer {
        stream: DuplexStream,
        read_buffer: SSHBuffer,
        write_buffer: SSHBuffer,
        opening: cipher::OpeningCipher,
        sealing: cipher::SealingCipher,
    }

    const SERVER_ID: &[u8] = b"SSH-2.0-OpenSSH_9.0";

    impl Peer {
        fn new(stream: DuplexStream) -> Self {
            let pair = cipher::clear_pair();
            Peer {
                stream,
                read_buffer: SSHBuffer::new(),
                write_buffer: SSHBuffer::new(),
                opening: pair.remote_to_local,
                sealing: cipher::clear_pair().local_to_remote,
            }
        }

        async fn exchange_versions(&mut self) -> Vec<u8> {
            let mut id = Vec::new();
            let mut byte = [0u8; 1];
            loop {
                self.stream.read_exact(&mut byte).await.unwrap();
                if byte[0] == b'\n' {
                    break;
                }
                if byte[0] != b'\r' {
                    id.push(byte[0]);
                }
            }
            self.stream.write_all(SERVER_ID).await.unwrap();
            self.stream.write_all(b"\r\n").await.unwrap();
            id
        }

        async fn send(&mut self, payload: &[u8]) {
            self.write_buffer.buffer.clear();
            self.sealing.write(payload, &mut self.write_buffer).unwrap();
            self.stream
                .write_all(&self.write_buffer.buffer)
                .await
                .unwrap();
        }

        async fn recv(&mut self) -> CryptoVec {
            let n = cipher::read(&mut self.stream, &mut self.read_buffer, &mut self.opening)
                .await
                .unwrap();
            CryptoVec::from_slice(&self.read_buffer.buffer[5..n])
        }

        /// Run the server side of a curve25519/ed25519 key exchange and
        /// switch to chacha20-poly1305 keying.
        async fn key_exchange(&mut self, client_id: &[u8]) -> CryptoVec {
            use sodium::{ed25519, scalarmult};

            let client_kexinit = self.recv().await;
            assert_eq!(client_kexinit[0], msg::KEXINIT);
            let mut server_kexinit = CryptoVec::new();
            negotiation::write_kex(&negotiation::Preferred::DEFAULT, &mut server_kexinit).unwrap();
            self.send(&server_kexinit).await;

            let ecdh_init = self.recv().await;
            assert_eq!(ecdh_init[0], msg::KEX_ECDH_INIT);
            let mut r = ecdh_init.reader(1);
            let client_ephemeral = r.read_string().unwrap().to_vec();

            let mut server_secret = scalarmult::Scalar([0; 32]);
            rand::thread_rng().fill_bytes(&mut server_secret.0);
            let server_ephemeral = scalarmult::scalarmult_base(&server_secret);
            let mut client_pub = scalarmult::GroupElement([0; 32]);
            client_pub.0.clone_from_slice(&client_ephemeral);
            let shared = scalarmult::scalarmult(&server_secret, &client_pub);

            let (host_pub, host_secret) = ed25519::keypair();
            let mut host_blob = CryptoVec::new();
            host_blob.extend_ssh_string(b"ssh-ed25519");
            host_blob.extend_ssh_string(&host_pub.key);

            let mut h_buf = CryptoVec::new();
            h_buf.extend_ssh_string(client_id);
            h_buf.extend_ssh_string(SERVER_ID);
            h_buf.extend_ssh_string(&client_kexinit);
            h_buf.extend_ssh_string(&server_kexinit);
            h_buf.extend_ssh_string(&host_blob);
            h_buf.extend_ssh_string(&client_ephemeral);
            h_buf.extend_ssh_string(&server_ephemeral.0);
            h_buf.extend_ssh_mpint(&shared.0);
            let h = kex::Hash::Sha256.hash(&h_buf).unwrap();

            let sig = ed25519::sign_detached(&h, &host_secret);
            let mut sig_blob = CryptoVec::new();
            sig_blob.extend_ssh_string(b"ssh-ed25519");
            sig_blob.extend_ssh_string(&sig.0);

            let mut reply = CryptoVec::new();
            reply.push(msg::KEX_ECDH_REPLY);
            reply.extend_ssh_string(&host_blob);
            reply.extend_ssh_string(&server_ephemeral.0);
            reply.extend_ssh_string(&sig_blob);
            self.send(&reply).await;
            self.send(&[msg::NEWKEYS]).await;

            let newkeys = self.recv().await;
            assert_eq!(newkeys[0], msg::NEWKEYS);

            // RFC 4253 §7.2, from the server's side of the table.
            let derive = |label: u8, len: usize| -> CryptoVec {
                let mut out = CryptoVec::new();
                let mut buf = CryptoVec::new();
                buf.extend_ssh_mpint(&shared.0);
                buf.extend(&h);
                buf.push(label);
                buf.extend(&h);
                out.extend(&kex::Hash::Sha256.hash(&buf).unwrap());
                while out.len() < len {
                    buf.clear();
                    buf.extend_ssh_mpint(&shared.0);
                    buf.extend(&h);
                    buf.extend(&out);
                    out.extend(&kex::Hash::Sha256.hash(&buf).unwrap());
                }
                out.resize(len);
                out
            };
            let chacha = cipher::by_name("chacha20-poly1305@openssh.com").unwrap();
            let key_c2s = derive(b'C', chacha.key_len);
            let key_s2c = derive(b'D', chacha.key_len);
            self.opening = (chacha.make_opening_cipher)(&key_c2s, &[], None).unwrap();
            self.sealing = (chacha.make_sealing_cipher)(&key_s2c, &[], None).unwrap();
            h
        }

        async fn accept_userauth_service(&mut self) {
            let req = self.recv().await;
            assert_eq!(req[0], msg::SERVICE_REQUEST);
            let mut r = req.reader(1);
            assert_eq!(r.read_string().unwrap(), b"ssh-userauth");
            let mut accept = CryptoVec::new();
            accept.push(msg::SERVICE_ACCEPT);
            accept.extend_ssh_string(b"ssh-userauth");
            self.send(&accept).await;
        }

        async fn fail_auth(&mut self, methods_left: &str) {
            let mut failure = CryptoVec::new();
            failure.push(msg::USERAUTH_FAILURE);
            failure.extend_ssh_string(methods_left.as_bytes());
            failure.push(0);
            self.send(&failure).await;
        }
    }

    /// Version exchange, curve25519 KEX, method discovery with `none`,
    /// then two-step publickey authentication, then `exec` on a
    /// session channel with buffered stdout and an exit status.
    #[tokio::test]
    async fn exec_over_session_channel() {
        env_logger::try_init().unwrap_or(());
        let (client_stream, server_stream) = tokio::io::duplex(65536);

        let server = tokio::spawn(async move {
            let mut peer = Peer::new(server_stream);
            let client_id = peer.exchange_versions().await;
            peer.key_exchange(&client_id).await;
            peer.accept_userauth_service().await;

            // The engine discovers methods with a `none` probe.
            let probe = peer.recv().await;
            assert_eq!(probe[0], msg::USERAUTH_REQUEST);
            {
                let mut r = probe.reader(1);
                assert_eq!(r.read_string().unwrap(), b"alice");
                assert_eq!(r.read_string().unwrap(), b"ssh-connection");
                assert_eq!(r.read_string().unwrap(), b"none");
            }
            peer.fail_auth("publickey,password").await;

            // Next must be the publickey probe.
            let probe = peer.recv().await;
            let (algo, blob) = {
                let mut r = probe.reader(1);
                assert_eq!(r.read_string().unwrap(), b"alice");
                assert_eq!(r.read_string().unwrap(), b"ssh-connection");
                assert_eq!(r.read_string().unwrap(), b"publickey");
                assert_eq!(r.read_byte().unwrap(), 0);
                (
                    r.read_string().unwrap().to_vec(),
                    r.read_string().unwrap().to_vec(),
                )
            };
            assert_eq!(&algo, b"ssh-ed25519");
            let mut pk_ok = CryptoVec::new();
            pk_ok.push(msg::USERAUTH_PK_OK);
            pk_ok.extend_ssh_string(&algo);
            pk_ok.extend_ssh_string(&blob);
            peer.send(&pk_ok).await;

            // The signed request.
            let signed = peer.recv().await;
            {
                let mut r = signed.reader(1);
                assert_eq!(r.read_string().unwrap(), b"alice");
                assert_eq!(r.read_string().unwrap(), b"ssh-connection");
                assert_eq!(r.read_string().unwrap(), b"publickey");
                assert_eq!(r.read_byte().unwrap(), 1);
            }
            peer.send(&[msg::USERAUTH_SUCCESS]).await;

            // Session channel.
            let open = peer.recv().await;
            assert_eq!(open[0], msg::CHANNEL_OPEN);
            let client_channel = {
                let mut r = open.reader(1);
                assert_eq!(r.read_string().unwrap(), b"session");
                let sender = r.read_u32().unwrap();
                assert_eq!(r.read_u32().unwrap(), 2 * 1024 * 1024);
                assert_eq!(r.read_u32().unwrap(), 32768);
                sender
            };
            let mut confirm = CryptoVec::new();
            confirm.push(msg::CHANNEL_OPEN_CONFIRMATION);
            confirm.push_u32_be(client_channel);
            confirm.push_u32_be(1); // our id
            confirm.push_u32_be(131072);
            confirm.push_u32_be(32768);
            peer.send(&confirm).await;

            let req = peer.recv().await;
            assert_eq!(req[0], msg::CHANNEL_REQUEST);
            {
                let mut r = req.reader(1);
                assert_eq!(r.read_u32().unwrap(), 1);
                assert_eq!(r.read_string().unwrap(), b"exec");
                assert_eq!(r.read_byte().unwrap(), 1);
                assert_eq!(r.read_string().unwrap(), b"echo hi");
            }
            let mut success = CryptoVec::new();
            success.push(msg::CHANNEL_SUCCESS);
            success.push_u32_be(client_channel);
            peer.send(&success).await;

            let mut data = CryptoVec::new();
            data.push(msg::CHANNEL_DATA);
            data.push_u32_be(client_channel);
            data.extend_ssh_string(b"hi\n");
            peer.send(&data).await;

            let mut exit = CryptoVec::new();
            exit.push(msg::CHANNEL_REQUEST);
            exit.push_u32_be(client_channel);
            exit.extend_ssh_string(b"exit-status");
            exit.push(0);
            exit.push_u32_be(0);
            peer.send(&exit).await;

            let mut eof = CryptoVec::new();
            eof.push(msg::CHANNEL_EOF);
            eof.push_u32_be(client_channel);
            peer.send(&eof).await;

            let mut close = CryptoVec::new();
            close.push(msg::CHANNEL_CLOSE);
            close.push_u32_be(client_channel);
            peer.send(&close).await;

            // The client answers the close.
            let answer = peer.recv().await;
            assert_eq!(answer[0], msg::CHANNEL_CLOSE);
        });

        let config = Arc::new(client::Config::default());
        let key = Arc::new(thrussh_keys::key::KeyPair::generate_ed25519().unwrap());
        let mut session = client::connect_stream(config, client_stream, Client {})
            .await
            .unwrap();
        let authenticated = session.authenticate_publickey("alice", key).await.unwrap();
        assert!(authenticated);

        let mut channel = session.channel_open_session().await.unwrap();
        channel.exec(true, "echo hi").await.unwrap();

        let mut stdout = Vec::new();
        let mut exit_status = None;
        let mut saw_eof = false;
        let mut saw_close = false;
        while let Some(msg) = channel.wait().await {
            match msg {
                ChannelMsg::Success => {}
                ChannelMsg::Data { data } => stdout.extend_from_slice(&data),
                ChannelMsg::ExitStatus { exit_status: e } => exit_status = Some(e),
                ChannelMsg::Eof => saw_eof = true,
                ChannelMsg::Close => {
                    saw_close = true;
                    break;
                }
                msg => panic!("unexpected message {:?}", msg),
            }
        }
        assert_eq!(stdout, b"hi\n");
        assert_eq!(exit_status, Some(0));
        assert!(saw_eof);
        assert!(saw_close);

        server.await.unwrap();
    }

    /// Password authentication, then a remote forward with a
    /// server-assigned port and an inbound `forwarded-tcpip` channel
    /// flowing bytes back to the forward's stream.
    #[tokio::test]
    async fn remote_forward_flow() {
        env_logger::try_init().unwrap_or(());
        let (client_stream, server_stream) = tokio::io::duplex(65536);

        let server = tokio::spawn(async move {
            let mut peer = Peer::new(server_stream);
            let client_id = peer.exchange_versions().await;
            peer.key_exchange(&client_id).await;
            peer.accept_userauth_service().await;

            let probe = peer.recv().await;
            assert_eq!(probe[0], msg::USERAUTH_REQUEST);
            peer.fail_auth("password").await;

            let req = peer.recv().await;
            {
                let mut r = req.reader(1);
                assert_eq!(r.read_string().unwrap(), b"bob");
                assert_eq!(r.read_string().unwrap(), b"ssh-connection");
                assert_eq!(r.read_string().unwrap(), b"password");
                assert_eq!(r.read_byte().unwrap(), 0);
                assert_eq!(r.read_string().unwrap(), b"wordpass");
            }
            peer.send(&[msg::USERAUTH_SUCCESS]).await;

            // tcpip-forward with port 0: we assign one.
            let fwd = peer.recv().await;
            assert_eq!(fwd[0], msg::GLOBAL_REQUEST);
            {
                let mut r = fwd.reader(1);
                assert_eq!(r.read_string().unwrap(), b"tcpip-forward");
                assert_eq!(r.read_byte().unwrap(), 1);
                assert_eq!(r.read_string().unwrap(), b"");
                assert_eq!(r.read_u32().unwrap(), 0);
            }
            let mut ok = CryptoVec::new();
            ok.push(msg::REQUEST_SUCCESS);
            ok.push_u32_be(34567);
            peer.send(&ok).await;

            // A connection arrives on the forwarded port.
            let mut open = CryptoVec::new();
            open.push(msg::CHANNEL_OPEN);
            open.extend_ssh_string(b"forwarded-tcpip");
            open.push_u32_be(7); // server's channel id
            open.push_u32_be(100000);
            open.push_u32_be(16384);
            open.extend_ssh_string(b"");
            open.push_u32_be(34567);
            open.extend_ssh_string(b"198.51.100.4");
            open.push_u32_be(50000);
            peer.send(&open).await;

            let confirm = peer.recv().await;
            assert_eq!(confirm[0], msg::CHANNEL_OPEN_CONFIRMATION);
            let client_channel = {
                let mut r = confirm.reader(1);
                assert_eq!(r.read_u32().unwrap(), 7);
                r.read_u32().unwrap()
            };

            let mut data = CryptoVec::new();
            data.push(msg::CHANNEL_DATA);
            data.push_u32_be(client_channel);
            data.extend_ssh_string(b"tunnelled bytes");
            peer.send(&data).await;
        });

        let config = Arc::new(client::Config::default());
        let mut session = client::connect_stream(config, client_stream, Client {})
            .await
            .unwrap();
        let authenticated = session
            .authenticate_password("bob", "wordpass")
            .await
            .unwrap();
        assert!(authenticated);

        let filter: client::ForwardFilter = Arc::new(|_host: &str, _port: u32| true);
        let mut forward = session.tcpip_forward("", 0, Some(filter)).await.unwrap();
        assert_eq!(forward.port, 34567);

        let mut channel = forward.incoming.recv().await.expect("incoming channel");
        match channel.wait().await {
            Some(ChannelMsg::Data { data }) => assert_eq!(&data[..], b"tunnelled bytes"),
            msg => panic!("unexpected message {:?}", msg),
        }

        server.await.unwrap();
    }
}
