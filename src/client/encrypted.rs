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
use super::{Msg, PendingGlobalRequest, Reply};
use crate::auth;
use crate::cipher;
use crate::encoding::{Encoding, Reader};
use crate::key;
use crate::key::PubKey;
use crate::msg;
use crate::negotiation;
use crate::negotiation::Named;
use crate::negotiation::Select;
use crate::session::*;
use crate::{ChannelId, ChannelOpenFailure, ChannelType, Error, Sig};
use cryptovec::CryptoVec;
use std::collections::VecDeque;
use tokio::sync::mpsc::unbounded_channel;

/// Pop the next method the transport can carry right now. The
/// `password` method needs the outbound direction to be both encrypted
/// and integrity-protected; when it is not, the method is skipped.
fn next_method(
    methods: &mut VecDeque<auth::Method>,
    cipher: &cipher::SealingCipher,
) -> Option<auth::Method> {
    while let Some(m) = methods.pop_front() {
        if let auth::Method::Password { .. } = m {
            if !(cipher.protects_confidentiality() && cipher.protects_integrity()) {
                debug!("skipping password authentication: the transport is not confidential");
                continue;
            }
        }
        return Some(m);
    }
    None
}

#[allow(clippy::too_many_arguments)]
fn advance_auth(
    enc: &mut Encrypted,
    auth_methods: &mut VecDeque<auth::Method>,
    cipher: &cipher::SealingCipher,
    auth_user: &str,
    auth_method: &mut Option<auth::Method>,
    attempts: &mut usize,
    max_attempts: usize,
    buffer: &mut CryptoVec,
    sender: &tokio::sync::mpsc::UnboundedSender<Reply>,
) -> Result<bool, Error> {
    if *attempts >= max_attempts {
        return Err(Error::AuthAttemptsExceeded);
    }
    if let Some(meth) = next_method(auth_methods, cipher) {
        if enc.write_auth_request(auth_user, &meth, buffer)? {
            *auth_method = Some(meth);
            *attempts += 1;
        }
        Ok(true)
    } else {
        *auth_method = None;
        sender.send(Reply::AuthFailure).map_err(|_| Error::SendError)?;
        Ok(false)
    }
}

impl super::Session {
    pub(crate) async fn client_read_encrypted<C: super::Handler>(
        mut self,
        client: &mut Option<C>,
        buf: &[u8],
    ) -> Result<Self, C::Error> {
        debug!(
            "client_read_encrypted, buf = {:?}",
            &buf[..buf.len().min(20)]
        );
        // Either this packet is a KEXINIT, in which case we start a key re-exchange.
        if buf[0] == msg::KEXINIT {
            // Now, if we're encrypted:
            if let Some(ref mut enc) = self.common.encrypted {
                // If we're not currently rekeying, but buf is a rekey request
                if let Some(Kex::KexInit(kexinit)) = enc.rekey.take() {
                    enc.rekey = Some(Kex::KexDhDone(kexinit.client_parse(
                        self.common.config.as_ref(),
                        &mut self.common.cipher,
                        buf,
                        &mut self.common.write_buffer,
                    )?));
                } else if let Some(exchange) = enc.exchange.take() {
                    let kexinit = KexInit::received_rekey(
                        exchange,
                        negotiation::Client::read_kex(buf, &self.common.config.as_ref().preferred)?,
                        &enc.session_id,
                    );
                    enc.rekey = Some(Kex::KexDhDone(kexinit.client_parse(
                        self.common.config.as_ref(),
                        &mut self.common.cipher,
                        buf,
                        &mut self.common.write_buffer,
                    )?));
                }
            } else {
                unreachable!()
            }
            self.flush().map_err(crate::Error::from)?;
            return Ok(self);
        }

        if let Some(ref mut enc) = self.common.encrypted {
            match enc.rekey.take() {
                Some(Kex::KexDhDone(mut kexdhdone)) => {
                    if kexdhdone.names.ignore_guessed {
                        kexdhdone.names.ignore_guessed = false;
                        enc.rekey = Some(Kex::KexDhDone(kexdhdone));
                        return Ok(self);
                    } else if kexdhdone.kex.is_group_exchange()
                        && buf[0] == msg::KEX_DH_GEX_GROUP
                    {
                        self.common.buffer.clear();
                        kexdhdone
                            .kex
                            .client_gex_group(
                                buf,
                                &mut kexdhdone.exchange.client_ephemeral,
                                &mut self.common.buffer,
                            )
                            .map_err(crate::Error::from)?;
                        enc.rekey = Some(Kex::KexDhDone(kexdhdone));
                        self.common
                            .cipher
                            .write(&self.common.buffer, &mut self.common.write_buffer)
                            .map_err(crate::Error::from)?;
                        return Ok(self);
                    } else if buf[0]
                        == if kexdhdone.kex.is_group_exchange() {
                            msg::KEX_DH_GEX_REPLY
                        } else {
                            msg::KEX_ECDH_REPLY
                        }
                    {
                        // We've sent our ephemeral, waiting for the reply.
                        enc.rekey = Some(kexdhdone.server_key_check(true, client, buf).await?);
                        self.common
                            .cipher
                            .write(&[msg::NEWKEYS], &mut self.common.write_buffer)
                            .map_err(crate::Error::from)?;
                        self.flush().map_err(crate::Error::from)?;
                        return Ok(self);
                    } else {
                        error!("Wrong packet received");
                        return Err(crate::Error::Inconsistent.into());
                    }
                }
                Some(Kex::NewKeys(newkeys)) => {
                    if buf[0] != msg::NEWKEYS {
                        return Err(crate::Error::Kex.into());
                    }
                    self.common.write_buffer.bytes = 0;
                    enc.last_rekey = std::time::Instant::now();

                    // Ok, NEWKEYS received, now encrypted.
                    enc.flush_all_pending();
                    let mut pending = std::mem::replace(&mut self.pending_reads, Vec::new());
                    for p in pending.drain(..) {
                        self = self.process_packet(client, &p).await?
                    }
                    self.pending_reads = pending;
                    self.pending_len = 0;
                    self.common.newkeys(newkeys);
                    self.flush().map_err(crate::Error::from)?;
                    return Ok(self);
                }
                Some(Kex::KexInit(k)) => {
                    enc.rekey = Some(Kex::KexInit(k));
                    self.pending_len += buf.len() as u32;
                    if self.pending_len > 2 * self.common.config.window_size {
                        return Err(crate::Error::Pending.into());
                    }
                    self.pending_reads.push(CryptoVec::from_slice(buf));
                    return Ok(self);
                }
                rek => enc.rekey = rek,
            }
        }
        self.process_packet(client, buf).await
    }

    async fn process_packet<H: super::Handler>(
        mut self,
        client: &mut Option<H>,
        buf: &[u8],
    ) -> Result<Self, H::Error> {
        // If we've successfully read a packet.
        debug!("buf = {:?} bytes", buf.len());
        let mut is_authenticated = false;
        if let Some(ref mut enc) = self.common.encrypted {
            match enc.state {
                EncryptedState::WaitingServiceRequest {
                    ref mut accepted, ..
                } => {
                    debug!(
                        "waiting service request, {:?} {:?}",
                        buf[0],
                        msg::SERVICE_ACCEPT
                    );
                    if buf[0] == msg::SERVICE_ACCEPT {
                        let mut r = buf.reader(1);
                        if r.read_string().map_err(crate::Error::from)? == b"ssh-userauth" {
                            *accepted = true;
                            let auth_request = auth::AuthRequest {
                                methods: auth::MethodSet::all(),
                                partial_success: false,
                                current: None,
                                rejection_count: 0,
                            };
                            if advance_auth(
                                enc,
                                &mut self.common.auth_methods,
                                &self.common.cipher,
                                &self.common.auth_user,
                                &mut self.common.auth_method,
                                &mut self.common.auth_attempts,
                                self.common.config.maximum_auth_attempts,
                                &mut self.common.buffer,
                                &self.sender,
                            )
                            .map_err(crate::Error::from)?
                            {
                                enc.state = EncryptedState::WaitingAuthRequest(auth_request)
                            }
                        }
                    } else {
                        debug!("unknown message: {:?}", buf);
                        return Err(crate::Error::Inconsistent.into());
                    }
                }
                EncryptedState::WaitingAuthRequest(ref mut auth_request) => {
                    if buf[0] == msg::USERAUTH_SUCCESS {
                        debug!("userauth_success");
                        self.sender
                            .send(Reply::AuthSuccess)
                            .map_err(|_| crate::Error::SendError)?;
                        enc.state = EncryptedState::InitCompression;
                        enc.server_compression.init_decompress(&mut enc.decompress);
                        self.common.auth_methods.clear();
                        return Ok(self);
                    } else if buf[0] == msg::USERAUTH_BANNER {
                        let mut r = buf.reader(1);
                        let banner = auth::sanitize_banner(r.read_string().map_err(crate::Error::from)?);
                        let c = client.take().unwrap();
                        let (c, s) = c.auth_banner(&banner, self).await?;
                        *client = Some(c);
                        return Ok(s);
                    } else if buf[0] == msg::USERAUTH_FAILURE {
                        debug!("userauth_failure");

                        let mut r = buf.reader(1);
                        let remaining_methods = r.read_name_list().map_err(crate::Error::from)?;
                        let partial_success = r.read_bool().map_err(crate::Error::from)?;
                        debug!(
                            "remaining methods {:?}, partial success {:?}",
                            std::str::from_utf8(remaining_methods),
                            partial_success
                        );
                        auth_request.methods = auth::MethodSet::empty();
                        for method in remaining_methods.split(|&c| c == b',') {
                            if let Some(m) = auth::MethodSet::from_bytes(method) {
                                auth_request.methods |= m
                            }
                        }
                        auth_request.partial_success = partial_success;
                        auth_request.rejection_count += 1;

                        // Keep only methods the server is still willing
                        // to accept.
                        let server_methods = auth_request.methods;
                        self.common
                            .auth_methods
                            .retain(|m| server_methods.contains(m.method_set()));

                        let advanced = advance_auth(
                            enc,
                            &mut self.common.auth_methods,
                            &self.common.cipher,
                            &self.common.auth_user,
                            &mut self.common.auth_method,
                            &mut self.common.auth_attempts,
                            self.common.config.maximum_auth_attempts,
                            &mut self.common.buffer,
                            &self.sender,
                        )
                        .map_err(crate::Error::from)?;
                        if !advanced && server_methods.is_empty() {
                            // The server aborted authentication.
                            return Err(crate::Error::NoAuthMethod.into());
                        }
                    } else if buf[0] == msg::USERAUTH_PK_OK {
                        // Method-specific message: its meaning depends
                        // on the method currently being tried.
                        return self.auth_method_msg(client, buf).await;
                    } else {
                        debug!("unknown message: {:?}", buf);
                        return Err(crate::Error::Inconsistent.into());
                    }
                }
                EncryptedState::InitCompression => unreachable!(),
                EncryptedState::Authenticated => is_authenticated = true,
            }
        }
        if is_authenticated {
            self.client_read_authenticated(client, buf).await
        } else {
            Ok(self)
        }
    }

    /// Dispatch a message with id 60, overloaded between
    /// `USERAUTH_PK_OK`, `USERAUTH_PASSWD_CHANGEREQ` and
    /// `USERAUTH_INFO_REQUEST` depending on the current method.
    async fn auth_method_msg<H: super::Handler>(
        mut self,
        client: &mut Option<H>,
        buf: &[u8],
    ) -> Result<Self, H::Error> {
        let enc = if let Some(ref mut enc) = self.common.encrypted {
            enc
        } else {
            return Err(crate::Error::Inconsistent.into());
        };
        match self.common.auth_method.take() {
            Some(auth_method @ auth::Method::PublicKey { .. }) => {
                debug!("userauth_pk_ok");
                if let EncryptedState::WaitingAuthRequest(ref mut auth_request) = enc.state {
                    if let Some(auth::CurrentRequest::PublicKey {
                        ref mut sent_pk_ok, ..
                    }) = auth_request.current
                    {
                        *sent_pk_ok = true;
                    }
                }
                self.common.buffer.clear();
                enc.client_send_signature(
                    &self.common.auth_user,
                    &auth_method,
                    &mut self.common.buffer,
                )
                .map_err(crate::Error::from)?;
                self.common.auth_method = Some(auth_method);
                Ok(self)
            }
            Some(auth::Method::FuturePublicKey { key }) => {
                debug!("userauth_pk_ok, external signer");
                self.common.buffer.clear();
                let i = enc.client_make_to_sign(
                    &self.common.auth_user,
                    &key,
                    &mut self.common.buffer,
                );
                let len = self.common.buffer.len();
                let to_sign = std::mem::replace(&mut self.common.buffer, CryptoVec::new());

                self.sender
                    .send(Reply::SignRequest {
                        key,
                        data: to_sign,
                    })
                    .map_err(|_| crate::Error::SendError)?;
                self.common.buffer = loop {
                    match self.receiver.recv().await {
                        Some(Msg::Signed { data }) => break data,
                        None => return Err(crate::Error::SendError.into()),
                        _ => {}
                    }
                };
                if self.common.buffer.len() != len {
                    // The signer appended a signature.
                    if let Some(ref mut enc) = self.common.encrypted {
                        push_packet!(enc.write, {
                            enc.write.extend(&self.common.buffer[i..]);
                        })
                    }
                }
                Ok(self)
            }
            Some(auth::Method::Password { password }) => {
                // USERAUTH_PASSWD_CHANGEREQ, RFC 4252 §8. Only ever
                // acted upon over a protected transport.
                debug!("userauth_passwd_changereq");
                let (prompt, lang) = {
                    let mut r = buf.reader(1);
                    (
                        String::from_utf8_lossy(r.read_string().map_err(crate::Error::from)?)
                            .into_owned(),
                        String::from_utf8_lossy(r.read_string().map_err(crate::Error::from)?)
                            .into_owned(),
                    )
                };
                let c = client.take().unwrap();
                let (c, new_password) = c.auth_change_password(&prompt, &lang).await?;
                *client = Some(c);
                if let Some(new_password) = new_password {
                    enc.write_password_change(&self.common.auth_user, &password, &new_password);
                    self.common.auth_attempts += 1;
                    self.common.auth_method = Some(auth::Method::Password {
                        password: new_password,
                    });
                } else {
                    advance_auth(
                        enc,
                        &mut self.common.auth_methods,
                        &self.common.cipher,
                        &self.common.auth_user,
                        &mut self.common.auth_method,
                        &mut self.common.auth_attempts,
                        self.common.config.maximum_auth_attempts,
                        &mut self.common.buffer,
                        &self.sender,
                    )
                    .map_err(crate::Error::from)?;
                }
                Ok(self)
            }
            Some(auth::Method::KeyboardInteractive { submethods }) => {
                // USERAUTH_INFO_REQUEST, RFC 4256 §3.2.
                debug!("userauth_info_request");
                let (name, instruction, prompts) = {
                    let mut r = buf.reader(1);
                    let name = String::from_utf8_lossy(r.read_string().map_err(crate::Error::from)?)
                        .into_owned();
                    let instruction =
                        String::from_utf8_lossy(r.read_string().map_err(crate::Error::from)?)
                            .into_owned();
                    let _lang = r.read_string().map_err(crate::Error::from)?;
                    let n = r.read_u32().map_err(crate::Error::from)? as usize;
                    let mut prompts = Vec::with_capacity(n.min(64));
                    for _ in 0..n {
                        let text =
                            String::from_utf8_lossy(r.read_string().map_err(crate::Error::from)?)
                                .into_owned();
                        let echo = r.read_bool().map_err(crate::Error::from)?;
                        prompts.push((text, echo));
                    }
                    (name, instruction, prompts)
                };
                let num_prompts = prompts.len();
                let c = client.take().unwrap();
                let (c, responses) = c
                    .auth_keyboard_interactive(&name, &instruction, prompts)
                    .await?;
                *client = Some(c);
                match responses {
                    Some(responses) => {
                        if responses.len() != num_prompts {
                            // Answering with the wrong number of
                            // responses is our bug, not the server's.
                            return Err(crate::Error::Inconsistent.into());
                        }
                        enc.write_info_response(&responses);
                        self.common.auth_method =
                            Some(auth::Method::KeyboardInteractive { submethods });
                    }
                    None => {
                        advance_auth(
                            enc,
                            &mut self.common.auth_methods,
                            &self.common.cipher,
                            &self.common.auth_user,
                            &mut self.common.auth_method,
                            &mut self.common.auth_attempts,
                            self.common.config.maximum_auth_attempts,
                            &mut self.common.buffer,
                            &self.sender,
                        )
                        .map_err(crate::Error::from)?;
                    }
                }
                Ok(self)
            }
            _ => {
                // A method-specific message without a method in
                // flight.
                debug!("method-specific message without a current method");
                Err(crate::Error::Inconsistent.into())
            }
        }
    }

    async fn client_read_authenticated<C: super::Handler>(
        mut self,
        client: &mut Option<C>,
        buf: &[u8],
    ) -> Result<Self, C::Error> {
        match buf[0] {
            msg::CHANNEL_OPEN_CONFIRMATION => {
                debug!("channel_open_confirmation");
                let mut reader = buf.reader(1);
                let id_send = ChannelId(reader.read_u32().map_err(crate::Error::from)?);
                let id_recv = reader.read_u32().map_err(crate::Error::from)?;
                let window = reader.read_u32().map_err(crate::Error::from)?;
                let max_packet = reader.read_u32().map_err(crate::Error::from)?;

                if let Some(ref mut enc) = self.common.encrypted {
                    if let Some(parameters) = enc.channels.get_mut(&id_send) {
                        parameters.recipient_channel = id_recv;
                        parameters.recipient_window_size = window;
                        parameters.recipient_maximum_packet_size = max_packet;
                        parameters.confirmed = true;
                    } else {
                        // We've not requested this channel, close connection.
                        return Err(crate::Error::Inconsistent.into());
                    }
                } else {
                    return Err(crate::Error::Inconsistent.into());
                };
                let c = client.take().unwrap();
                let (c, s) = c
                    .channel_open_confirmation(id_send, max_packet, window, self)
                    .await?;
                *client = Some(c);
                Ok(s)
            }
            msg::CHANNEL_OPEN => self.server_channel_open(client, buf).await,
            msg::CHANNEL_CLOSE => {
                debug!("channel_close");
                let mut r = buf.reader(1);
                let channel_num = ChannelId(r.read_u32().map_err(crate::Error::from)?);
                if let Some(ref mut enc) = self.common.encrypted {
                    enc.received_close(channel_num);
                }
                let c = client.take().unwrap();
                let (c, s) = c.channel_close(channel_num, self).await?;
                *client = Some(c);
                Ok(s)
            }
            msg::CHANNEL_EOF => {
                debug!("channel_eof");
                let mut r = buf.reader(1);
                let channel_num = ChannelId(r.read_u32().map_err(crate::Error::from)?);
                if let Some(ref mut enc) = self.common.encrypted {
                    if let Some(chan) = enc.channels.get_mut(&channel_num) {
                        chan.received_eof = true;
                    }
                }
                let c = client.take().unwrap();
                let (c, s) = c.channel_eof(channel_num, self).await?;
                *client = Some(c);
                Ok(s)
            }
            msg::CHANNEL_OPEN_FAILURE => {
                debug!("channel_open_failure");
                let mut r = buf.reader(1);
                let channel_num = ChannelId(r.read_u32().map_err(crate::Error::from)?);
                let reason_code =
                    ChannelOpenFailure::from_u32(r.read_u32().map_err(crate::Error::from)?)
                        .unwrap_or(ChannelOpenFailure::ConnectFailed);
                let descr = std::str::from_utf8(r.read_string().map_err(crate::Error::from)?)
                    .map_err(crate::Error::from)?;
                let language = std::str::from_utf8(r.read_string().map_err(crate::Error::from)?)
                    .map_err(crate::Error::from)?;
                if let Some(ref mut enc) = self.common.encrypted {
                    enc.channels.remove(&channel_num);
                }
                let c = client.take().unwrap();
                let (c, s) = c
                    .channel_open_failure(channel_num, reason_code, descr, language, self)
                    .await?;
                *client = Some(c);
                Ok(s)
            }
            msg::CHANNEL_DATA => {
                debug!("channel_data");
                let mut r = buf.reader(1);
                let channel_num = ChannelId(r.read_u32().map_err(crate::Error::from)?);
                let data = r.read_string().map_err(crate::Error::from)?;
                if let Some(ref mut enc) = self.common.encrypted {
                    enc.adjust_window_size(channel_num, data);
                }
                let c = client.take().unwrap();
                let (c, s) = c.data(channel_num, data, self).await?;
                *client = Some(c);
                Ok(s)
            }
            msg::CHANNEL_EXTENDED_DATA => {
                debug!("channel_extended_data");
                let mut r = buf.reader(1);
                let channel_num = ChannelId(r.read_u32().map_err(crate::Error::from)?);
                let extended_code = r.read_u32().map_err(crate::Error::from)?;
                let data = r.read_string().map_err(crate::Error::from)?;
                if let Some(ref mut enc) = self.common.encrypted {
                    enc.adjust_window_size(channel_num, data);
                }
                let c = client.take().unwrap();
                let (c, s) = c
                    .extended_data(channel_num, extended_code, data, self)
                    .await?;
                *client = Some(c);
                Ok(s)
            }
            msg::CHANNEL_REQUEST => {
                let mut r = buf.reader(1);
                let channel_num = ChannelId(r.read_u32().map_err(crate::Error::from)?);
                let req = r.read_string().map_err(crate::Error::from)?;
                let want_reply = r.read_bool().map_err(crate::Error::from)?;
                debug!(
                    "channel_request: {:?} {:?}",
                    channel_num,
                    std::str::from_utf8(req)
                );
                let cl = client.take().unwrap();
                let (c, s) = match req {
                    b"xon-xoff" => {
                        let client_can_do = r.read_bool().map_err(crate::Error::from)?;
                        cl.xon_xoff(channel_num, client_can_do, self).await?
                    }
                    b"exit-status" => {
                        let exit_status = r.read_u32().map_err(crate::Error::from)?;
                        cl.exit_status(channel_num, exit_status, self).await?
                    }
                    b"exit-signal" => {
                        let signal_name =
                            Sig::from_name(r.read_string().map_err(crate::Error::from)?)?;
                        let core_dumped = r.read_bool().map_err(crate::Error::from)?;
                        let error_message =
                            std::str::from_utf8(r.read_string().map_err(crate::Error::from)?)
                                .map_err(crate::Error::from)?;
                        let lang_tag =
                            std::str::from_utf8(r.read_string().map_err(crate::Error::from)?)
                                .map_err(crate::Error::from)?;
                        cl.exit_signal(
                            channel_num,
                            signal_name,
                            core_dumped,
                            error_message,
                            lang_tag,
                            self,
                        )
                        .await?
                    }
                    _ => {
                        info!("Unknown channel request {:?}", std::str::from_utf8(req));
                        if want_reply {
                            if let Some(ref mut enc) = self.common.encrypted {
                                enc.byte(channel_num, msg::CHANNEL_FAILURE);
                            }
                        }
                        (cl, self)
                    }
                };
                *client = Some(c);
                Ok(s)
            }
            msg::CHANNEL_WINDOW_ADJUST => {
                debug!("channel_window_adjust");
                let mut r = buf.reader(1);
                let channel_num = ChannelId(r.read_u32().map_err(crate::Error::from)?);
                let amount = r.read_u32().map_err(crate::Error::from)?;
                let mut new_value = 0;
                debug!("amount: {:?}", amount);
                if let Some(ref mut enc) = self.common.encrypted {
                    if let Some(ref mut channel) = enc.channels.get_mut(&channel_num) {
                        channel.recipient_window_size =
                            channel.recipient_window_size.wrapping_add(amount);
                        new_value = channel.recipient_window_size;
                    } else {
                        return Err(crate::Error::WrongChannel.into());
                    }
                }
                let c = client.take().unwrap();
                let (c, s) = c.window_adjusted(channel_num, new_value, self).await?;
                *client = Some(c);
                Ok(s)
            }
            msg::CHANNEL_SUCCESS => {
                let mut r = buf.reader(1);
                let channel_num = ChannelId(r.read_u32().map_err(crate::Error::from)?);
                self.pop_channel_request(channel_num)
                    .map_err(crate::Error::from)?;
                let c = client.take().unwrap();
                let (c, s) = c.channel_success(channel_num, self).await?;
                *client = Some(c);
                Ok(s)
            }
            msg::CHANNEL_FAILURE => {
                let mut r = buf.reader(1);
                let channel_num = ChannelId(r.read_u32().map_err(crate::Error::from)?);
                self.pop_channel_request(channel_num)
                    .map_err(crate::Error::from)?;
                let c = client.take().unwrap();
                let (c, s) = c.channel_failure(channel_num, self).await?;
                *client = Some(c);
                Ok(s)
            }
            msg::GLOBAL_REQUEST => {
                let mut r = buf.reader(1);
                let req = r.read_string().map_err(crate::Error::from)?;
                let want_reply = r.read_bool().map_err(crate::Error::from)?;
                match req {
                    b"hostkeys-00@openssh.com" => {
                        let mut keys = Vec::new();
                        while !r.remaining().is_empty() {
                            let blob = r.read_string().map_err(crate::Error::from)?;
                            match key::ServerPublicKey::parse(blob) {
                                Ok(k) => keys.push(k),
                                Err(e) => debug!("unparsable announced host key: {:?}", e),
                            }
                        }
                        if want_reply {
                            // Not expected for this extension.
                            self.reply_global_request_failure();
                        }
                        let c = client.take().unwrap();
                        let (c, s) = c.host_keys(keys, self).await?;
                        *client = Some(c);
                        Ok(s)
                    }
                    _ => {
                        info!("Unhandled global request: {:?}", std::str::from_utf8(req));
                        if want_reply {
                            self.reply_global_request_failure();
                        }
                        Ok(self)
                    }
                }
            }
            msg::REQUEST_SUCCESS => {
                match self.pending_global_requests.pop_front() {
                    Some(PendingGlobalRequest::KeepAlive { reply }) => {
                        self.outstanding_keepalives = 0;
                        if let Some(reply) = reply {
                            reply.send(()).unwrap_or(());
                        }
                    }
                    Some(PendingGlobalRequest::TcpIpForward {
                        address,
                        port,
                        filter,
                        channels,
                        reply,
                    }) => {
                        let mut r = buf.reader(1);
                        let bound_port = if port == 0 {
                            r.read_u32().unwrap_or(0)
                        } else {
                            port
                        };
                        debug!("remote forward bound to port {:?}", bound_port);
                        self.remote_forwards.insert(
                            (address, bound_port),
                            super::RemoteForwardRecord {
                                filter,
                                incoming: channels,
                            },
                        );
                        reply.send(Ok(bound_port)).unwrap_or(());
                    }
                    Some(PendingGlobalRequest::CancelTcpIpForward {
                        address,
                        port,
                        reply,
                    }) => {
                        self.remote_forwards.remove(&(address, port));
                        reply.send(Ok(())).unwrap_or(());
                    }
                    // A reply nothing is waiting for.
                    None => return Err(crate::Error::Inconsistent.into()),
                }
                Ok(self)
            }
            msg::REQUEST_FAILURE => {
                match self.pending_global_requests.pop_front() {
                    Some(PendingGlobalRequest::KeepAlive { reply }) => {
                        // Any answer proves the peer alive.
                        self.outstanding_keepalives = 0;
                        if let Some(reply) = reply {
                            reply.send(()).unwrap_or(());
                        }
                    }
                    Some(PendingGlobalRequest::TcpIpForward { reply, .. }) => {
                        reply.send(Err(crate::Error::RequestFailure)).unwrap_or(());
                    }
                    Some(PendingGlobalRequest::CancelTcpIpForward { reply, .. }) => {
                        reply.send(Err(crate::Error::RequestFailure)).unwrap_or(());
                    }
                    None => return Err(crate::Error::Inconsistent.into()),
                }
                Ok(self)
            }
            msg::USERAUTH_BANNER => {
                let mut r = buf.reader(1);
                let banner = auth::sanitize_banner(r.read_string().map_err(crate::Error::from)?);
                let c = client.take().unwrap();
                let (c, s) = c.auth_banner(&banner, self).await?;
                *client = Some(c);
                Ok(s)
            }
            50..=79 => {
                // Leftover authentication traffic after success is
                // ignored.
                debug!("ignoring authentication message {:?}", buf[0]);
                Ok(self)
            }
            _ => {
                info!("Unhandled packet: {:?}", buf[0]);
                Ok(self)
            }
        }
    }

    fn pop_channel_request(&mut self, channel: ChannelId) -> Result<(), Error> {
        if let Some(ref mut enc) = self.common.encrypted {
            if let Some(chan) = enc.channels.get_mut(&channel) {
                if chan.pending_requests.pop_front().is_none() {
                    // A reply no request is waiting for.
                    return Err(Error::Inconsistent);
                }
            }
        }
        Ok(())
    }

    fn reply_global_request_failure(&mut self) {
        if let Some(ref mut enc) = self.common.encrypted {
            push_packet!(enc.write, {
                enc.write.push(msg::REQUEST_FAILURE);
            });
        }
    }

    /// A `CHANNEL_OPEN` initiated by the server: `forwarded-tcpip` for
    /// a registered remote forward, `x11`, or an agent channel.
    async fn server_channel_open<C: super::Handler>(
        mut self,
        client: &mut Option<C>,
        buf: &[u8],
    ) -> Result<Self, C::Error> {
        let mut r = buf.reader(1);
        let typ = r.read_string().map_err(crate::Error::from)?;
        let server_id = r.read_u32().map_err(crate::Error::from)?;
        let window = r.read_u32().map_err(crate::Error::from)?;
        let maxpacket = r.read_u32().map_err(crate::Error::from)?;
        debug!(
            "server channel open: {:?} {:?}",
            std::str::from_utf8(typ),
            server_id
        );
        match typ {
            b"forwarded-tcpip" => {
                let connected_address =
                    std::str::from_utf8(r.read_string().map_err(crate::Error::from)?)
                        .map_err(crate::Error::from)?
                        .to_string();
                let connected_port = r.read_u32().map_err(crate::Error::from)?;
                let originator_address =
                    std::str::from_utf8(r.read_string().map_err(crate::Error::from)?)
                        .map_err(crate::Error::from)?
                        .to_string();
                let originator_port = r.read_u32().map_err(crate::Error::from)?;

                let forward_key = (connected_address.clone(), connected_port);
                let (known, accept) = match self.remote_forwards.get(&forward_key) {
                    None => (false, false),
                    Some(fwd) => (
                        true,
                        fwd.filter
                            .as_ref()
                            .map_or(true, |f| f(&originator_address, originator_port)),
                    ),
                };
                if !known {
                    self.reject_channel_open(
                        server_id,
                        ChannelOpenFailure::UnknownChannelType,
                        "unknown channel type",
                    );
                    return Ok(self);
                }
                if !accept {
                    self.reject_channel_open(
                        server_id,
                        ChannelOpenFailure::AdministrativelyProhibited,
                        "administratively prohibited",
                    );
                    return Ok(self);
                }

                let id = self.accept_server_channel(
                    ChannelType::ForwardedTcpip,
                    server_id,
                    window,
                    maxpacket,
                );
                let (sender, receiver) = unbounded_channel();
                self.channels.insert(id, sender);
                let channel = super::Channel {
                    sender: super::ChannelSender {
                        sender: self.handle_sender.clone(),
                        id,
                    },
                    receiver,
                    max_packet_size: maxpacket,
                    window_size: window,
                };
                if let Some(fwd) = self.remote_forwards.get(&forward_key) {
                    fwd.incoming.send(channel).unwrap_or(());
                }

                let c = client.take().unwrap();
                let (c, s) = c
                    .channel_open_forwarded_tcpip(
                        id,
                        &connected_address,
                        connected_port,
                        &originator_address,
                        originator_port,
                        self,
                    )
                    .await?;
                *client = Some(c);
                Ok(s)
            }
            b"x11" => {
                let originator_address =
                    std::str::from_utf8(r.read_string().map_err(crate::Error::from)?)
                        .map_err(crate::Error::from)?
                        .to_string();
                let originator_port = r.read_u32().map_err(crate::Error::from)?;
                let c = client.take().unwrap();
                let (c, accept) = c
                    .server_channel_open_x11(&originator_address, originator_port)
                    .await?;
                *client = Some(c);
                if accept {
                    self.accept_server_channel(ChannelType::X11, server_id, window, maxpacket);
                } else {
                    self.reject_channel_open(
                        server_id,
                        ChannelOpenFailure::AdministrativelyProhibited,
                        "administratively prohibited",
                    );
                }
                Ok(self)
            }
            b"auth-agent@openssh.com" => {
                let c = client.take().unwrap();
                let (c, accept) = c.server_channel_open_agent().await?;
                *client = Some(c);
                if accept {
                    self.accept_server_channel(
                        ChannelType::AuthAgent,
                        server_id,
                        window,
                        maxpacket,
                    );
                } else {
                    self.reject_channel_open(
                        server_id,
                        ChannelOpenFailure::AdministrativelyProhibited,
                        "administratively prohibited",
                    );
                }
                Ok(self)
            }
            t => {
                debug!("unknown channel type: {:?}", std::str::from_utf8(t));
                self.reject_channel_open(
                    server_id,
                    ChannelOpenFailure::UnknownChannelType,
                    "unknown channel type",
                );
                Ok(self)
            }
        }
    }

    fn accept_server_channel(
        &mut self,
        kind: ChannelType,
        server_id: u32,
        window: u32,
        maxpacket: u32,
    ) -> ChannelId {
        if let Some(ref mut enc) = self.common.encrypted {
            let id = enc.new_channel(
                kind,
                self.common.config.window_size,
                self.common.config.maximum_packet_size,
            );
            if let Some(channel) = enc.channels.get_mut(&id) {
                channel.recipient_channel = server_id;
                channel.recipient_window_size = window;
                channel.recipient_maximum_packet_size = maxpacket;
                channel.confirmed = true;
            }
            push_packet!(enc.write, {
                enc.write.push(msg::CHANNEL_OPEN_CONFIRMATION);
                enc.write.push_u32_be(server_id);
                enc.write.push_u32_be(id.0);
                enc.write.push_u32_be(self.common.config.window_size);
                enc.write.push_u32_be(self.common.config.maximum_packet_size);
            });
            id
        } else {
            unreachable!()
        }
    }

    fn reject_channel_open(&mut self, server_id: u32, reason: ChannelOpenFailure, msg_text: &str) {
        if let Some(ref mut enc) = self.common.encrypted {
            push_packet!(enc.write, {
                enc.write.push(msg::CHANNEL_OPEN_FAILURE);
                enc.write.push_u32_be(server_id);
                enc.write.push_u32_be(reason as u32);
                enc.write.extend_ssh_string(msg_text.as_bytes());
                enc.write.extend_ssh_string(b"");
            });
        }
    }

    pub(crate) fn write_auth_request_if_needed(
        &mut self,
        user: &str,
        methods: Vec<auth::Method>,
    ) -> Result<bool, Error> {
        self.common.auth_user.clear();
        self.common.auth_user.push_str(user);
        let mut methods = methods;
        methods.sort_by_key(|m| m.priority());
        self.common.auth_methods = methods.into();
        // Lead with a `none` probe: its failure tells us which methods
        // the server accepts, so the queue can be pruned before the
        // first real attempt.
        if !matches!(self.common.auth_methods.front(), Some(auth::Method::None)) {
            self.common.auth_methods.push_front(auth::Method::None);
        }

        let mut is_waiting = false;
        if let Some(ref mut enc) = self.common.encrypted {
            is_waiting = match enc.state {
                EncryptedState::WaitingAuthRequest(_) => true,
                EncryptedState::WaitingServiceRequest {
                    accepted,
                    ref mut sent,
                } => {
                    debug!("sending ssh-userauth service request");
                    if !*sent {
                        let p = b"\x05\0\0\0\x0Cssh-userauth";
                        self.common.cipher.write(p, &mut self.common.write_buffer)?;
                        *sent = true
                    }
                    accepted
                }
                EncryptedState::InitCompression | EncryptedState::Authenticated => false,
            };
            debug!(
                "write_auth_request_if_needed: is_waiting = {:?}",
                is_waiting
            );
            if is_waiting {
                let auth_request = auth::AuthRequest {
                    methods: auth::MethodSet::all(),
                    partial_success: false,
                    current: None,
                    rejection_count: 0,
                };
                if advance_auth(
                    enc,
                    &mut self.common.auth_methods,
                    &self.common.cipher,
                    &self.common.auth_user,
                    &mut self.common.auth_method,
                    &mut self.common.auth_attempts,
                    self.common.config.maximum_auth_attempts,
                    &mut self.common.buffer,
                    &self.sender,
                )? {
                    enc.state = EncryptedState::WaitingAuthRequest(auth_request);
                }
            }
        }
        Ok(is_waiting)
    }
}

impl Encrypted {
    pub(crate) fn write_auth_request(
        &mut self,
        user: &str,
        auth_method: &auth::Method,
        buffer: &mut CryptoVec,
    ) -> Result<bool, Error> {
        // hostbased carries a signature over the whole request, so it
        // is built in a scratch buffer first.
        if let auth::Method::HostBased {
            ref key,
            ref client_hostname,
            ref client_username,
        } = *auth_method
        {
            buffer.clear();
            buffer.extend_ssh_string(&self.session_id);
            let i0 = buffer.len();
            buffer.push(msg::USERAUTH_REQUEST);
            buffer.extend_ssh_string(user.as_bytes());
            buffer.extend_ssh_string(b"ssh-connection");
            buffer.extend_ssh_string(b"hostbased");
            buffer.extend_ssh_string(key.name().as_bytes());
            key.push_to(buffer);
            buffer.extend_ssh_string(client_hostname.as_bytes());
            buffer.extend_ssh_string(client_username.as_bytes());
            key.add_self_signature(buffer)?;
            push_packet!(self.write, {
                self.write.extend(&buffer[i0..]);
            });
            return Ok(true);
        }
        // The server is waiting for our USERAUTH_REQUEST.
        let sent = push_packet!(self.write, {
            self.write.push(msg::USERAUTH_REQUEST);

            match *auth_method {
                auth::Method::None => {
                    self.write.extend_ssh_string(user.as_bytes());
                    self.write.extend_ssh_string(b"ssh-connection");
                    self.write.extend_ssh_string(b"none");
                    true
                }
                auth::Method::Password { ref password } => {
                    self.write.extend_ssh_string(user.as_bytes());
                    self.write.extend_ssh_string(b"ssh-connection");
                    self.write.extend_ssh_string(b"password");
                    self.write.push(0);
                    self.write.extend_ssh_string(password.as_bytes());
                    true
                }
                auth::Method::PublicKey { ref key } => {
                    self.write.extend_ssh_string(user.as_bytes());
                    self.write.extend_ssh_string(b"ssh-connection");
                    self.write.extend_ssh_string(b"publickey");
                    self.write.push(0); // This is a probe

                    debug!("write_auth_request: {:?}", key.name());
                    self.write.extend_ssh_string(key.name().as_bytes());
                    key.push_to(&mut self.write);
                    true
                }
                auth::Method::FuturePublicKey { ref key, .. } => {
                    self.write.extend_ssh_string(user.as_bytes());
                    self.write.extend_ssh_string(b"ssh-connection");
                    self.write.extend_ssh_string(b"publickey");
                    self.write.push(0); // This is a probe

                    self.write.extend_ssh_string(key.name().as_bytes());
                    key.push_to(&mut self.write);
                    true
                }
                auth::Method::KeyboardInteractive { ref submethods } => {
                    self.write.extend_ssh_string(user.as_bytes());
                    self.write.extend_ssh_string(b"ssh-connection");
                    self.write.extend_ssh_string(b"keyboard-interactive");
                    self.write.extend_ssh_string(b""); // language tag, deprecated
                    self.write.extend_ssh_string(submethods.as_bytes());
                    true
                }
                auth::Method::HostBased { .. } => unreachable!(),
            }
        });
        Ok(sent)
    }

    pub(crate) fn write_password_change(&mut self, user: &str, old: &str, new: &str) {
        push_packet!(self.write, {
            self.write.push(msg::USERAUTH_REQUEST);
            self.write.extend_ssh_string(user.as_bytes());
            self.write.extend_ssh_string(b"ssh-connection");
            self.write.extend_ssh_string(b"password");
            self.write.push(1);
            self.write.extend_ssh_string(old.as_bytes());
            self.write.extend_ssh_string(new.as_bytes());
        });
    }

    pub(crate) fn write_info_response(&mut self, responses: &[String]) {
        push_packet!(self.write, {
            self.write.push(msg::USERAUTH_INFO_RESPONSE);
            self.write.push_u32_be(responses.len() as u32);
            for response in responses {
                self.write.extend_ssh_string(response.as_bytes());
            }
        });
    }

    fn client_make_to_sign<Key: Named + PubKey>(
        &mut self,
        user: &str,
        key: &Key,
        buffer: &mut CryptoVec,
    ) -> usize {
        buffer.clear();
        buffer.extend_ssh_string(&self.session_id);

        let i0 = buffer.len();
        buffer.push(msg::USERAUTH_REQUEST);
        buffer.extend_ssh_string(user.as_bytes());
        buffer.extend_ssh_string(b"ssh-connection");
        buffer.extend_ssh_string(b"publickey");
        buffer.push(1);
        buffer.extend_ssh_string(key.name().as_bytes());
        key.push_to(buffer);
        i0
    }

    fn client_send_signature(
        &mut self,
        user: &str,
        method: &auth::Method,
        buffer: &mut CryptoVec,
    ) -> Result<(), Error> {
        match method {
            &auth::Method::PublicKey { ref key } => {
                let i0 = self.client_make_to_sign(user, key.as_ref(), buffer);
                // Extend with self-signature.
                key.add_self_signature(buffer)?;
                push_packet!(self.write, {
                    self.write.extend(&buffer[i0..]);
                })
            }
            _ => {}
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn password_needs_a_protected_transport() {
        let mut methods = VecDeque::new();
        methods.push_back(auth::Method::Password {
            password: "hunter2".into(),
        });
        methods.push_back(auth::Method::KeyboardInteractive {
            submethods: String::new(),
        });
        // Before the first key exchange the transport is clear, so the
        // password method must be skipped.
        let clear = cipher::clear_pair().local_to_remote;
        let m = next_method(&mut methods, &clear).unwrap();
        assert!(matches!(m, auth::Method::KeyboardInteractive { .. }));
        assert!(methods.is_empty());
    }
}
