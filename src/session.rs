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

use crate::encoding::Encoding;
use crate::flow;
use crate::sshbuffer::SSHBuffer;
use crate::{auth, cipher, kex, msg, negotiation};
use crate::{Channel, ChannelId, ChannelType, Disconnect, Error, Limits};
use byteorder::{BigEndian, ByteOrder};
use cryptovec::CryptoVec;
use std::collections::{HashMap, VecDeque};
use std::num::Wrapping;

#[derive(Debug)]
pub(crate) struct Encrypted {
    pub state: EncryptedState,

    // It's always Some, except when we std::mem::replace it temporarily.
    pub exchange: Option<Exchange>,
    pub kex: kex::Algorithm,
    pub negotiated: negotiation::Names,
    pub session_id: CryptoVec,
    pub rekey: Option<Kex>,
    pub channels: HashMap<ChannelId, Channel>,
    pub last_channel_id: Wrapping<u32>,
    pub write: CryptoVec,
    pub write_cursor: usize,
    pub last_rekey: std::time::Instant,
    pub server_compression: crate::compression::Compression,
    pub client_compression: crate::compression::Compression,
    pub compress: crate::compression::Compress,
    pub decompress: crate::compression::Decompress,
    pub compress_buffer: CryptoVec,
}

pub(crate) struct CommonSession<Config> {
    pub auth_user: String,
    pub config: Config,
    pub encrypted: Option<Encrypted>,
    pub auth_method: Option<auth::Method>,
    pub auth_methods: VecDeque<auth::Method>,
    pub auth_attempts: usize,
    pub write_buffer: SSHBuffer,
    pub kex: Option<Kex>,
    pub cipher: cipher::SealingCipher,
    /// After NEWKEYS, the read half of the new keying waits here until
    /// the reading task picks it up.
    pub pending_opening_cipher: Option<cipher::OpeningCipher>,
    pub disconnected: bool,
    pub buffer: CryptoVec,
}

impl<C> CommonSession<C> {
    pub fn newkeys(&mut self, newkeys: NewKeys) {
        if let Some(ref mut enc) = self.encrypted {
            enc.exchange = Some(newkeys.exchange);
            enc.kex = newkeys.kex;
            enc.negotiated = newkeys.names;
            self.cipher = newkeys.cipher.local_to_remote;
            self.pending_opening_cipher = Some(newkeys.cipher.remote_to_local);
        }
    }

    pub fn encrypted(&mut self, state: EncryptedState, newkeys: NewKeys) {
        let server_compression = newkeys.names.server_compression;
        let client_compression = newkeys.names.client_compression;
        self.encrypted = Some(Encrypted {
            exchange: Some(newkeys.exchange),
            kex: newkeys.kex,
            negotiated: newkeys.names,
            session_id: newkeys.session_id,
            state,
            rekey: None,
            channels: HashMap::new(),
            last_channel_id: Wrapping(1),
            write: CryptoVec::new(),
            write_cursor: 0,
            last_rekey: std::time::Instant::now(),
            server_compression,
            client_compression,
            compress: crate::compression::Compress::None,
            compress_buffer: CryptoVec::new(),
            decompress: crate::compression::Decompress::None,
        });
        self.cipher = newkeys.cipher.local_to_remote;
        self.pending_opening_cipher = Some(newkeys.cipher.remote_to_local);
    }

    /// Send a disconnect message.
    pub fn disconnect(
        &mut self,
        reason: Disconnect,
        description: &str,
        language_tag: &str,
    ) -> Result<(), Error> {
        if self.disconnected {
            return Ok(());
        }
        self.disconnected = true;
        if let Some(ref mut enc) = self.encrypted {
            push_packet!(enc.write, {
                enc.write.push(msg::DISCONNECT);
                enc.write.push_u32_be(reason as u32);
                enc.write.extend_ssh_string(description.as_bytes());
                enc.write.extend_ssh_string(language_tag.as_bytes());
            });
            Ok(())
        } else {
            let mut payload = CryptoVec::new();
            payload.push(msg::DISCONNECT);
            payload.push_u32_be(reason as u32);
            payload.extend_ssh_string(description.as_bytes());
            payload.extend_ssh_string(language_tag.as_bytes());
            self.cipher.write(&payload, &mut self.write_buffer)
        }
    }
}

impl Encrypted {
    pub(crate) fn byte(&mut self, channel: ChannelId, msg: u8) {
        if let Some(channel) = self.channels.get(&channel) {
            push_packet!(self.write, {
                self.write.push(msg);
                self.write.push_u32_be(channel.recipient_channel);
            });
        }
    }

    /// Signal that we will send no more data on this channel. Sent at
    /// most once.
    pub fn eof(&mut self, channel: ChannelId) {
        if let Some(chan) = self.channels.get_mut(&channel) {
            if chan.sent_eof || chan.sent_close {
                return;
            }
            chan.sent_eof = true;
        } else {
            return;
        }
        self.byte(channel, msg::CHANNEL_EOF);
    }

    /// Send our half of the close handshake. Sent at most once; the
    /// channel is only retired when both sides have closed.
    pub fn close(&mut self, channel: ChannelId) {
        if let Some(chan) = self.channels.get_mut(&channel) {
            if chan.sent_close {
                return;
            }
            chan.sent_close = true;
        } else {
            return;
        }
        self.byte(channel, msg::CHANNEL_CLOSE);
    }

    /// The other side has closed; answer if we had not closed yet and
    /// retire the channel now that both closes have been seen.
    pub fn received_close(&mut self, channel: ChannelId) -> bool {
        let answer = if let Some(chan) = self.channels.get_mut(&channel) {
            debug!("retiring {:?} channel {:?}", chan.kind, channel);
            chan.received_close = true;
            if !chan.sent_close {
                chan.sent_close = true;
                Some(chan.recipient_channel)
            } else {
                None
            }
        } else {
            return false;
        };
        if let Some(recipient) = answer {
            push_packet!(self.write, {
                self.write.push(msg::CHANNEL_CLOSE);
                self.write.push_u32_be(recipient);
            });
        }
        self.channels.remove(&channel);
        true
    }

    pub fn sender_window_size(&self, channel: ChannelId) -> usize {
        if let Some(ref channel) = self.channels.get(&channel) {
            channel.flow.window().max(0) as usize
        } else {
            0
        }
    }

    /// Run the flow controller for `data` arriving on `channel`; emit a
    /// window adjustment when one is due.
    pub fn adjust_window_size(&mut self, channel: ChannelId, data: &[u8]) -> bool {
        if let Some(ref mut channel) = self.channels.get_mut(&channel) {
            if data.len() > channel.sender_maximum_packet_size as usize {
                debug!("peer sent more than the advertised maximum packet size");
            }
            if let Some(adjust) = channel
                .flow
                .data_received(data.len() as u32, std::time::Instant::now())
            {
                push_packet!(self.write, {
                    self.write.push(msg::CHANNEL_WINDOW_ADJUST);
                    self.write.push_u32_be(channel.recipient_channel);
                    self.write.push_u32_be(adjust);
                });
                return true;
            }
        }
        false
    }

    pub fn flush_pending(&mut self, channel: ChannelId) -> usize {
        let mut pending_size = 0;
        if let Some(channel) = self.channels.get_mut(&channel) {
            while let Some((buf, a, from)) = channel.pending_data.pop_front() {
                let size = Self::data_noqueue(&mut self.write, channel, &buf, from);
                pending_size += size;
                if from + size < buf.len() {
                    channel.pending_data.push_front((buf, a, from + size));
                    break;
                }
            }
        }
        pending_size
    }

    pub fn flush_all_pending(&mut self) {
        for (_, channel) in self.channels.iter_mut() {
            while let Some((buf, a, from)) = channel.pending_data.pop_front() {
                let size = Self::data_noqueue(&mut self.write, channel, &buf, from);
                if from + size < buf.len() {
                    channel.pending_data.push_front((buf, a, from + size));
                    break;
                }
            }
        }
    }

    pub fn has_pending_data(&self, channel: ChannelId) -> bool {
        if let Some(channel) = self.channels.get(&channel) {
            !channel.pending_data.is_empty()
        } else {
            false
        }
    }

    /// Push the largest amount of `&buf0[from..]` that can fit into
    /// the window, dividing it into packets if it is too large, and
    /// return the length that was written.
    fn data_noqueue(
        write: &mut CryptoVec,
        channel: &mut Channel,
        buf0: &[u8],
        from: usize,
    ) -> usize {
        let mut buf = if buf0.len() as u32 > from as u32 + channel.recipient_window_size {
            &buf0[from..from + channel.recipient_window_size as usize]
        } else {
            &buf0[from..]
        };
        let buf_len = buf.len();

        // Stay under both the negotiated maximum packet size and our
        // own transport payload cap.
        let max_chunk =
            (channel.recipient_maximum_packet_size as usize).min(cipher::MAX_PAYLOAD_LEN - 64);
        while !buf.is_empty() {
            // Compute the length we're allowed to send.
            let off = std::cmp::min(buf.len(), max_chunk);
            push_packet!(write, {
                write.push(msg::CHANNEL_DATA);
                write.push_u32_be(channel.recipient_channel);
                write.extend_ssh_string(&buf[..off]);
            });
            channel.recipient_window_size -= off as u32;
            buf = &buf[off..]
        }
        buf_len
    }

    pub fn data(&mut self, channel: ChannelId, buf0: CryptoVec) {
        if let Some(channel) = self.channels.get_mut(&channel) {
            assert!(channel.confirmed);
            if channel.sent_eof || channel.sent_close {
                debug!("data on closed channel");
                return;
            }
            if !channel.pending_data.is_empty() || self.rekey.is_some() {
                channel.pending_data.push_back((buf0, None, 0));
                return;
            }
            let buf_len = Self::data_noqueue(&mut self.write, channel, &buf0, 0);
            if buf_len < buf0.len() {
                channel.pending_data.push_back((buf0, None, buf_len))
            }
        }
    }

    pub fn extended_data(&mut self, channel: ChannelId, ext: u32, buf0: CryptoVec) {
        if let Some(channel) = self.channels.get_mut(&channel) {
            assert!(channel.confirmed);
            if channel.sent_eof || channel.sent_close {
                debug!("extended data on closed channel");
                return;
            }
            if !channel.pending_data.is_empty() || self.rekey.is_some() {
                channel.pending_data.push_back((buf0, Some(ext), 0));
                return;
            }
            let mut buf = if buf0.len() as u32 > channel.recipient_window_size {
                &buf0[0..channel.recipient_window_size as usize]
            } else {
                &buf0
            };
            let buf_len = buf.len();

            let max_chunk = (channel.recipient_maximum_packet_size as usize)
                .min(cipher::MAX_PAYLOAD_LEN - 64);
            while !buf.is_empty() {
                // Compute the length we're allowed to send.
                let off = std::cmp::min(buf.len(), max_chunk);
                push_packet!(self.write, {
                    self.write.push(msg::CHANNEL_EXTENDED_DATA);
                    self.write.push_u32_be(channel.recipient_channel);
                    self.write.push_u32_be(ext);
                    self.write.extend_ssh_string(&buf[..off]);
                });
                channel.recipient_window_size -= off as u32;
                buf = &buf[off..]
            }
            if buf_len < buf0.len() {
                channel.pending_data.push_back((buf0, Some(ext), buf_len))
            }
        }
    }

    /// Move queued plaintext packets through compression and the
    /// cipher into the wire buffer, and report whether a rekey is due.
    pub fn flush(
        &mut self,
        limits: &Limits,
        cipher: &mut cipher::SealingCipher,
        write_buffer: &mut SSHBuffer,
    ) -> Result<bool, Error> {
        // If there are pending packets (and we've not started to rekey), flush them.
        while self.write_cursor < self.write.len() {
            // Read a single packet, encrypt and send it.
            let len = BigEndian::read_u32(&self.write[self.write_cursor..]) as usize;
            let packet = self.compress.compress(
                &self.write[(self.write_cursor + 4)..(self.write_cursor + 4 + len)],
                &mut self.compress_buffer,
            )?;
            cipher.write(packet, write_buffer)?;
            self.write_cursor += 4 + len
        }
        if self.write_cursor >= self.write.len() {
            // If all packets have been written, clear.
            self.write_cursor = 0;
            self.write.clear();
        }
        let now = std::time::Instant::now();
        let dur = now.duration_since(self.last_rekey);
        Ok(write_buffer.bytes >= limits.rekey_write_limit
            || dur >= limits.rekey_time_limit
            || write_buffer.needs_rekey_for_seqn())
    }

    pub fn new_channel(
        &mut self,
        kind: ChannelType,
        window_size: u32,
        maxpacket: u32,
    ) -> ChannelId {
        loop {
            self.last_channel_id += Wrapping(1);
            if let std::collections::hash_map::Entry::Vacant(vacant_entry) =
                self.channels.entry(ChannelId(self.last_channel_id.0))
            {
                vacant_entry.insert(Channel {
                    kind,
                    recipient_channel: 0,
                    recipient_window_size: 0,
                    recipient_maximum_packet_size: 0,
                    sender_maximum_packet_size: maxpacket,
                    flow: flow::WindowController::new(window_size),
                    confirmed: false,
                    sent_eof: false,
                    received_eof: false,
                    sent_close: false,
                    received_close: false,
                    pending_data: VecDeque::new(),
                    pending_requests: VecDeque::new(),
                });
                return ChannelId(self.last_channel_id.0);
            }
        }
    }
}

#[derive(Debug)]
pub enum EncryptedState {
    WaitingServiceRequest { sent: bool, accepted: bool },
    WaitingAuthRequest(auth::AuthRequest),
    InitCompression,
    Authenticated,
}

#[derive(Debug)]
pub struct Exchange {
    pub client_id: CryptoVec,
    pub server_id: CryptoVec,
    pub client_kex_init: CryptoVec,
    pub server_kex_init: CryptoVec,
    pub client_ephemeral: CryptoVec,
    pub server_ephemeral: CryptoVec,
}

impl Exchange {
    pub fn new() -> Self {
        Exchange {
            client_id: CryptoVec::new(),
            server_id: CryptoVec::new(),
            client_kex_init: CryptoVec::new(),
            server_kex_init: CryptoVec::new(),
            client_ephemeral: CryptoVec::new(),
            server_ephemeral: CryptoVec::new(),
        }
    }
}

#[derive(Debug)]
pub enum Kex {
    /// Version number sent. `algo` and `sent` tell wether kexinit has
    /// been received, and sent, respectively.
    KexInit(KexInit),

    /// The kex has run.
    KexDhDone(KexDhDone),

    /// The DH is over, we've sent the NEWKEYS packet, and are waiting
    /// the NEWKEYS from the other side.
    NewKeys(NewKeys),
}

#[derive(Debug)]
pub struct KexInit {
    pub algo: Option<negotiation::Names>,
    pub exchange: Exchange,
    pub session_id: Option<CryptoVec>,
    pub sent: bool,
}

impl KexInit {
    pub fn received_rekey(ex: Exchange, algo: negotiation::Names, session_id: &CryptoVec) -> Self {
        let mut kexinit = KexInit {
            exchange: ex,
            algo: Some(algo),
            sent: false,
            session_id: Some(CryptoVec::from_slice(session_id)),
        };
        kexinit.exchange.client_kex_init.clear();
        kexinit.exchange.server_kex_init.clear();
        kexinit.exchange.client_ephemeral.clear();
        kexinit.exchange.server_ephemeral.clear();
        kexinit
    }

    pub fn initiate_rekey(ex: Exchange, session_id: &CryptoVec) -> Self {
        let mut kexinit = KexInit {
            exchange: ex,
            algo: None,
            sent: true,
            session_id: Some(CryptoVec::from_slice(session_id)),
        };
        kexinit.exchange.client_kex_init.clear();
        kexinit.exchange.server_kex_init.clear();
        kexinit.exchange.client_ephemeral.clear();
        kexinit.exchange.server_ephemeral.clear();
        kexinit
    }
}

#[derive(Debug)]
pub struct KexDhDone {
    pub exchange: Exchange,
    pub kex: kex::Algorithm,
    pub session_id: Option<CryptoVec>,
    pub names: negotiation::Names,
}

impl KexDhDone {
    pub fn compute_keys(self, hash: CryptoVec) -> Result<NewKeys, Error> {
        let session_id = if let Some(session_id) = self.session_id {
            session_id
        } else {
            CryptoVec::from_slice(&hash)
        };
        // Now computing keys.
        let c = self.kex.compute_keys(&session_id, &hash, &self.names)?;
        Ok(NewKeys {
            exchange: self.exchange,
            names: self.names,
            kex: self.kex,
            cipher: c,
            session_id,
            received: false,
            sent: false,
        })
    }
}

#[derive(Debug)]
pub struct NewKeys {
    pub exchange: Exchange,
    pub names: negotiation::Names,
    pub kex: kex::Algorithm,
    pub cipher: cipher::CipherPair,
    pub session_id: CryptoVec,
    pub received: bool,
    pub sent: bool,
}
