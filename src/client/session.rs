use super::*;
use crate::encoding::Encoding;

impl Session {
    pub(crate) fn channel_open_generic<F>(
        &mut self,
        kind: ChannelType,
        write_extra: F,
    ) -> Result<ChannelId, Error>
    where
        F: FnOnce(&mut CryptoVec),
    {
        let result = if let Some(ref mut enc) = self.common.encrypted {
            match enc.state {
                EncryptedState::Authenticated => {
                    let sender_channel = enc.new_channel(
                        kind,
                        self.common.config.window_size,
                        self.common.config.maximum_packet_size,
                    );
                    push_packet!(enc.write, {
                        enc.write.push(msg::CHANNEL_OPEN);
                        enc.write.extend_ssh_string(kind.wire_name().as_bytes());

                        // sender channel id.
                        enc.write.push_u32_be(sender_channel.0);

                        // window.
                        enc.write
                            .push_u32_be(self.common.config.as_ref().window_size);

                        // max packet size.
                        enc.write
                            .push_u32_be(self.common.config.as_ref().maximum_packet_size);

                        write_extra(&mut enc.write)
                    });
                    sender_channel
                }
                _ => return Err(Error::NotAuthenticated),
            }
        } else {
            return Err(Error::Inconsistent);
        };
        Ok(result)
    }

    pub fn channel_open_session(&mut self) -> Result<ChannelId, Error> {
        self.channel_open_generic(ChannelType::Session, |_| ())
    }

    pub fn channel_open_x11(
        &mut self,
        originator_address: &str,
        originator_port: u32,
    ) -> Result<ChannelId, Error> {
        self.channel_open_generic(ChannelType::X11, |write| {
            write.extend_ssh_string(originator_address.as_bytes());
            write.push_u32_be(originator_port);
        })
    }

    pub fn channel_open_direct_tcpip(
        &mut self,
        host_to_connect: &str,
        port_to_connect: u32,
        originator_address: &str,
        originator_port: u32,
    ) -> Result<ChannelId, Error> {
        self.channel_open_generic(ChannelType::DirectTcpip, |write| {
            write.extend_ssh_string(host_to_connect.as_bytes());
            write.push_u32_be(port_to_connect);
            write.extend_ssh_string(originator_address.as_bytes());
            write.push_u32_be(originator_port);
        })
    }

    fn channel_request<F>(&mut self, channel: ChannelId, name: &str, want_reply: bool, fields: F)
    where
        F: FnOnce(&mut CryptoVec),
    {
        if let Some(ref mut enc) = self.common.encrypted {
            if let Some(channel) = enc.channels.get_mut(&channel) {
                push_packet!(enc.write, {
                    enc.write.push(msg::CHANNEL_REQUEST);

                    enc.write.push_u32_be(channel.recipient_channel);
                    enc.write.extend_ssh_string(name.as_bytes());
                    enc.write.push(if want_reply { 1 } else { 0 });
                    fields(&mut enc.write)
                });
                if want_reply {
                    channel.pending_requests.push_back(name.to_string());
                }
            }
        }
    }

    pub fn request_pty(
        &mut self,
        channel: ChannelId,
        want_reply: bool,
        term: &str,
        col_width: u32,
        row_height: u32,
        pix_width: u32,
        pix_height: u32,
        terminal_modes: &[(Pty, u32)],
    ) {
        self.channel_request(channel, "pty-req", want_reply, |write| {
            write.extend_ssh_string(term.as_bytes());
            write.push_u32_be(col_width);
            write.push_u32_be(row_height);
            write.push_u32_be(pix_width);
            write.push_u32_be(pix_height);

            write.push_u32_be((1 + 5 * terminal_modes.len()) as u32);
            for &(code, value) in terminal_modes {
                write.push(code as u8);
                write.push_u32_be(value)
            }
            // 0 code (to terminate the list)
            write.push(0);
        })
    }

    pub fn request_x11(
        &mut self,
        channel: ChannelId,
        want_reply: bool,
        single_connection: bool,
        x11_authentication_protocol: &str,
        x11_authentication_cookie: &str,
        x11_screen_number: u32,
    ) {
        self.channel_request(channel, "x11-req", want_reply, |write| {
            write.push(if single_connection { 1 } else { 0 });
            write.extend_ssh_string(x11_authentication_protocol.as_bytes());
            write.extend_ssh_string(x11_authentication_cookie.as_bytes());
            write.push_u32_be(x11_screen_number);
        })
    }

    pub fn set_env(
        &mut self,
        channel: ChannelId,
        want_reply: bool,
        variable_name: &str,
        variable_value: &str,
    ) {
        self.channel_request(channel, "env", want_reply, |write| {
            write.extend_ssh_string(variable_name.as_bytes());
            write.extend_ssh_string(variable_value.as_bytes());
        })
    }

    pub fn request_shell(&mut self, want_reply: bool, channel: ChannelId) {
        self.channel_request(channel, "shell", want_reply, |_| ())
    }

    pub fn exec(&mut self, channel: ChannelId, want_reply: bool, command: &str) {
        self.channel_request(channel, "exec", want_reply, |write| {
            write.extend_ssh_string(command.as_bytes());
        })
    }

    pub fn signal(&mut self, channel: ChannelId, signal: Sig) {
        self.channel_request(channel, "signal", false, |write| {
            write.extend_ssh_string(signal.name().as_bytes());
        })
    }

    pub fn request_subsystem(&mut self, want_reply: bool, channel: ChannelId, name: &str) {
        self.channel_request(channel, "subsystem", want_reply, |write| {
            write.extend_ssh_string(name.as_bytes());
        })
    }

    pub fn request_agent_forward(&mut self, channel: ChannelId, want_reply: bool) {
        self.channel_request(channel, "auth-agent-req@openssh.com", want_reply, |_| ())
    }

    pub fn window_change(
        &mut self,
        channel: ChannelId,
        col_width: u32,
        row_height: u32,
        pix_width: u32,
        pix_height: u32,
    ) {
        // This packet never wants a reply.
        self.channel_request(channel, "window-change", false, |write| {
            write.push_u32_be(col_width);
            write.push_u32_be(row_height);
            write.push_u32_be(pix_width);
            write.push_u32_be(pix_height);
        })
    }

    pub(crate) fn tcpip_forward(
        &mut self,
        address: &str,
        port: u32,
        filter: Option<ForwardFilter>,
        channels: UnboundedSender<Channel>,
        reply: oneshot::Sender<Result<u32, Error>>,
    ) {
        if let Some(ref mut enc) = self.common.encrypted {
            push_packet!(enc.write, {
                enc.write.push(msg::GLOBAL_REQUEST);
                enc.write.extend_ssh_string(b"tcpip-forward");
                enc.write.push(1);
                enc.write.extend_ssh_string(address.as_bytes());
                enc.write.push_u32_be(port);
            });
            self.pending_global_requests
                .push_back(PendingGlobalRequest::TcpIpForward {
                    address: address.to_string(),
                    port,
                    filter,
                    channels,
                    reply,
                });
        } else {
            reply.send(Err(Error::Inconsistent)).unwrap_or(());
        }
    }

    pub(crate) fn cancel_tcpip_forward(
        &mut self,
        address: &str,
        port: u32,
        reply: oneshot::Sender<Result<(), Error>>,
    ) {
        if let Some(ref mut enc) = self.common.encrypted {
            push_packet!(enc.write, {
                enc.write.push(msg::GLOBAL_REQUEST);
                enc.write.extend_ssh_string(b"cancel-tcpip-forward");
                enc.write.push(1);
                enc.write.extend_ssh_string(address.as_bytes());
                enc.write.push_u32_be(port);
            });
            self.pending_global_requests
                .push_back(PendingGlobalRequest::CancelTcpIpForward {
                    address: address.to_string(),
                    port,
                    reply,
                });
        } else {
            reply.send(Err(Error::Inconsistent)).unwrap_or(());
        }
    }

    /// Send a `keepalive@openssh.com` probe. The server answers with
    /// either reply type; what matters is that it answers at all.
    pub(crate) fn keepalive(&mut self, reply: Option<oneshot::Sender<()>>) -> Result<(), Error> {
        if let Some(ref mut enc) = self.common.encrypted {
            push_packet!(enc.write, {
                enc.write.push(msg::GLOBAL_REQUEST);
                enc.write.extend_ssh_string(b"keepalive@openssh.com");
                enc.write.push(1);
            });
            self.pending_global_requests
                .push_back(PendingGlobalRequest::KeepAlive { reply });
            self.outstanding_keepalives += 1;
            Ok(())
        } else {
            Err(Error::Inconsistent)
        }
    }

    pub fn data(&mut self, channel: ChannelId, data: CryptoVec) {
        if let Some(ref mut enc) = self.common.encrypted {
            enc.data(channel, data)
        } else {
            unreachable!()
        }
    }

    pub fn eof(&mut self, channel: ChannelId) {
        if let Some(ref mut enc) = self.common.encrypted {
            enc.eof(channel)
        } else {
            unreachable!()
        }
    }

    pub fn close(&mut self, channel: ChannelId) {
        if let Some(ref mut enc) = self.common.encrypted {
            enc.close(channel)
        } else {
            unreachable!()
        }
    }

    pub fn extended_data(&mut self, channel: ChannelId, ext: u32, data: CryptoVec) {
        if let Some(ref mut enc) = self.common.encrypted {
            enc.extended_data(channel, ext, data)
        } else {
            unreachable!()
        }
    }

    pub fn disconnect(
        &mut self,
        reason: Disconnect,
        description: &str,
        language_tag: &str,
    ) -> Result<(), Error> {
        self.common.disconnect(reason, description, language_tag)
    }

    pub fn has_pending_data(&self, channel: ChannelId) -> bool {
        if let Some(ref enc) = self.common.encrypted {
            enc.has_pending_data(channel)
        } else {
            false
        }
    }

    pub fn sender_window_size(&self, channel: ChannelId) -> usize {
        if let Some(ref enc) = self.common.encrypted {
            enc.sender_window_size(channel)
        } else {
            0
        }
    }
}
