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

use cryptovec::CryptoVec;
use std::sync::Arc;
use thrussh_keys::key;
use tokio::io::{AsyncRead, AsyncWrite};

bitflags! {
    /// Set of methods, represented by bit flags.
    pub struct MethodSet: u32 {
        /// The SSH `none` method (no authentication).
        const NONE = 1;
        /// The SSH `password` method (plaintext passwords).
        const PASSWORD = 2;
        /// The SSH `publickey` method (sign a challenge sent by the
        /// server).
        const PUBLICKEY = 4;
        /// The SSH `hostbased` method (certain hostnames are allowed
        /// by the server).
        const HOSTBASED = 8;
        /// The SSH `keyboard-interactive` method (answer to a
        /// challenge, where the "challenge" can be a password prompt,
        /// a bytestring to sign with a smartcard, or something else).
        const KEYBOARD_INTERACTIVE = 16;
    }
}

macro_rules! iter {
    ( $y:expr, $x:expr ) => {{
        if $y.contains($x) {
            $y.remove($x);
            return Some($x);
        }
    }};
}

impl Iterator for MethodSet {
    type Item = MethodSet;
    fn next(&mut self) -> Option<MethodSet> {
        iter!(self, MethodSet::NONE);
        iter!(self, MethodSet::PASSWORD);
        iter!(self, MethodSet::PUBLICKEY);
        iter!(self, MethodSet::HOSTBASED);
        iter!(self, MethodSet::KEYBOARD_INTERACTIVE);
        None
    }
}

pub trait Signer: Sized {
    type Error: From<crate::SendError>;
    type Future: futures::Future<Output = (Self, Result<CryptoVec, Self::Error>)> + Send;

    fn auth_publickey_sign(self, key: &key::PublicKey, to_sign: CryptoVec) -> Self::Future;
}

#[derive(Debug, Error)]
pub enum AgentAuthError {
    #[error(transparent)]
    Send(#[from] crate::SendError),
    #[error(transparent)]
    Key(#[from] thrussh_keys::Error),
}

impl<R: AsyncRead + AsyncWrite + Unpin + Send + 'static> Signer
    for thrussh_keys::agent::client::AgentClient<R>
{
    type Error = AgentAuthError;
    type Future = std::pin::Pin<
        Box<dyn futures::Future<Output = (Self, Result<CryptoVec, Self::Error>)> + Send>,
    >;
    fn auth_publickey_sign(self, key: &key::PublicKey, to_sign: CryptoVec) -> Self::Future {
        let fut = self.sign_request(key, to_sign);
        futures::FutureExt::boxed(async move {
            let (a, b) = fut.await;
            (a, b.map_err(AgentAuthError::Key))
        })
    }
}

#[derive(Debug)]
pub enum Method {
    /// The probe method, also used to learn which methods the server
    /// accepts.
    None,
    Password {
        password: String,
    },
    PublicKey {
        key: Arc<key::KeyPair>,
    },
    /// Public key whose signature is produced outside the engine, e.g.
    /// by an SSH agent.
    FuturePublicKey {
        key: key::PublicKey,
    },
    KeyboardInteractive {
        submethods: String,
    },
    HostBased {
        key: Arc<key::KeyPair>,
        client_hostname: String,
        client_username: String,
    },
}

impl Method {
    pub fn method_set(&self) -> MethodSet {
        match self {
            Method::None => MethodSet::NONE,
            Method::Password { .. } => MethodSet::PASSWORD,
            Method::PublicKey { .. } | Method::FuturePublicKey { .. } => MethodSet::PUBLICKEY,
            Method::KeyboardInteractive { .. } => MethodSet::KEYBOARD_INTERACTIVE,
            Method::HostBased { .. } => MethodSet::HOSTBASED,
        }
    }

    /// Default policy priority: public keys first, passwords last of
    /// the real methods, `none` only as a probe.
    pub fn priority(&self) -> u8 {
        match self {
            Method::PublicKey { .. } | Method::FuturePublicKey { .. } => 0,
            Method::HostBased { .. } => 1,
            Method::KeyboardInteractive { .. } => 2,
            Method::Password { .. } => 3,
            Method::None => 4,
        }
    }
}

impl crate::encoding::Bytes for MethodSet {
    fn bytes(&self) -> &[u8] {
        match *self {
            MethodSet::NONE => b"none",
            MethodSet::PASSWORD => b"password",
            MethodSet::PUBLICKEY => b"publickey",
            MethodSet::HOSTBASED => b"hostbased",
            MethodSet::KEYBOARD_INTERACTIVE => b"keyboard-interactive",
            _ => b"",
        }
    }
}

impl MethodSet {
    pub(crate) fn from_bytes(b: &[u8]) -> Option<MethodSet> {
        match b {
            b"none" => Some(MethodSet::NONE),
            b"password" => Some(MethodSet::PASSWORD),
            b"publickey" => Some(MethodSet::PUBLICKEY),
            b"hostbased" => Some(MethodSet::HOSTBASED),
            b"keyboard-interactive" => Some(MethodSet::KEYBOARD_INTERACTIVE),
            _ => None,
        }
    }
}

#[doc(hidden)]
#[derive(Debug)]
pub struct AuthRequest {
    pub methods: MethodSet,
    pub partial_success: bool,
    pub current: Option<CurrentRequest>,
    pub rejection_count: usize,
}

#[doc(hidden)]
#[derive(Debug)]
pub enum CurrentRequest {
    PublicKey {
        key: CryptoVec,
        algo: CryptoVec,
        sent_pk_ok: bool,
    },
    KeyboardInteractive {
        submethods: String,
    },
}

/// How many characters a single banner line may keep.
const BANNER_LINE_LIMIT: usize = 1024;
/// How many characters the whole banner may keep.
const BANNER_TOTAL_LIMIT: usize = 8192;

/// Make a server-sent banner safe to show to a user: keep tabs,
/// newlines and printable text (ASCII and multi-byte UTF-8), escape the
/// remaining control characters as `\xHH`, and cap both line and total
/// lengths. Invalid UTF-8 decodes lossily. The result is only ever
/// displayed; banner content never steers protocol decisions.
pub fn sanitize_banner(banner: &[u8]) -> String {
    let text = String::from_utf8_lossy(banner);
    let mut out = String::new();
    let mut total = 0usize;
    let mut line = 0usize;
    for c in text.chars() {
        if total >= BANNER_TOTAL_LIMIT {
            break;
        }
        match c {
            '\n' => {
                out.push('\n');
                total += 1;
                line = 0;
            }
            '\t' | '\r' => {
                if line < BANNER_LINE_LIMIT {
                    out.push(c);
                    total += 1;
                    line += 1;
                }
            }
            c if (c as u32) < 32 || c as u32 == 127 => {
                if line + 4 <= BANNER_LINE_LIMIT {
                    out.push_str(&format!("\\x{:02X}", c as u32));
                    total += 4;
                    line += 4;
                }
            }
            c => {
                if line < BANNER_LINE_LIMIT {
                    out.push(c);
                    total += 1;
                    line += 1;
                }
            }
        }
    }
    out
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn banner_keeps_text_and_escapes_controls() {
        let s = sanitize_banner(b"Welcome!\r\n\x07beep\x1b[31mred");
        assert_eq!(s, "Welcome!\r\n\\x07beep\\x1B[31mred");
    }

    #[test]
    fn banner_sanitize_is_idempotent() {
        for input in &[
            &b"hello\nworld"[..],
            b"\x00\x01\x02",
            b"caf\xc3\xa9 au lait",
            b"bad \xff utf8",
        ] {
            let once = sanitize_banner(input);
            let twice = sanitize_banner(once.as_bytes());
            assert_eq!(once, twice);
        }
    }

    #[test]
    fn banner_line_and_total_caps() {
        let long_line = vec![b'a'; 3000];
        let s = sanitize_banner(&long_line);
        assert_eq!(s.chars().count(), 1024);

        let mut many_lines = Vec::new();
        for _ in 0..20 {
            many_lines.extend_from_slice(&vec![b'b'; 600]);
            many_lines.push(b'\n');
        }
        let s = sanitize_banner(&many_lines);
        assert!(s.chars().count() <= 8192);
    }

    #[test]
    fn method_pruning_by_server_set() {
        let methods = vec![
            Method::Password {
                password: "hunter2".into(),
            },
            Method::KeyboardInteractive {
                submethods: String::new(),
            },
        ];
        let server = MethodSet::PUBLICKEY | MethodSet::KEYBOARD_INTERACTIVE;
        let left: Vec<_> = methods
            .into_iter()
            .filter(|m| server.contains(m.method_set()))
            .collect();
        assert_eq!(left.len(), 1);
        assert!(matches!(left[0], Method::KeyboardInteractive { .. }));
    }
}
