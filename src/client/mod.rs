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

use crate::auth;
use crate::cipher;
use crate::key;
use crate::negotiation;
use crate::pty::Pty;
use crate::session::*;
use crate::ssh_read::SshRead;
use crate::sshbuffer::*;
use crate::{msg, Error};
use crate::{ChannelId, ChannelMsg, ChannelOpenFailure, ChannelType, Disconnect, Limits, Sig};
use cryptovec::CryptoVec;
use futures::task::{Context, Poll};
use futures::Future;
use std::collections::{HashMap, VecDeque};
use std::pin::Pin;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::pin;
use tokio::sync::mpsc::*;
use tokio::sync::oneshot;

mod encrypted;
mod kex;
mod session;

/// A predicate deciding whether a server-initiated `forwarded-tcpip`
/// channel for `(originator_address, originator_port)` is let through.
pub type ForwardFilter = Arc<dyn Fn(&str, u32) -> bool + Send + Sync>;

pub struct Session {
    common: CommonSession<Arc<Config>>,
    receiver: Receiver<Msg>,
    sender: UnboundedSender<Reply>,
    /// A copy of the `Handle` side's sender, used to build `Channel`
    /// handles for server-initiated channels.
    handle_sender: Sender<Msg>,
    channels: HashMap<ChannelId, UnboundedSender<OpenChannelMsg>>,
    pending_reads: Vec<CryptoVec>,
    pending_len: u32,
    /// Client-initiated global requests with `want_reply`, in send
    /// order. SSH carries no request ids, so replies are matched
    /// strictly first-in first-out.
    pending_global_requests: VecDeque<PendingGlobalRequest>,
    /// Remote forwards we have registered, keyed by the bound address
    /// and port the server reported.
    remote_forwards: HashMap<(String, u32), RemoteForwardRecord>,
    auth_deadline: Option<tokio::time::Instant>,
    outstanding_keepalives: usize,
}

impl Drop for Session {
    fn drop(&mut self) {
        debug!("drop session")
    }
}

#[derive(Debug)]
enum Reply {
    AuthSuccess,
    AuthFailure,
    ChannelOpenFailure,
    SignRequest {
        key: thrussh_keys::key::PublicKey,
        data: CryptoVec,
    },
}

enum PendingGlobalRequest {
    KeepAlive {
        reply: Option<oneshot::Sender<()>>,
    },
    TcpIpForward {
        address: String,
        port: u32,
        filter: Option<ForwardFilter>,
        channels: UnboundedSender<Channel>,
        reply: oneshot::Sender<Result<u32, Error>>,
    },
    CancelTcpIpForward {
        address: String,
        port: u32,
        reply: oneshot::Sender<Result<(), Error>>,
    },
}

struct RemoteForwardRecord {
    filter: Option<ForwardFilter>,
    incoming: UnboundedSender<Channel>,
}

enum Msg {
    Authenticate {
        user: String,
        methods: Vec<auth::Method>,
    },
    Signed {
        data: CryptoVec,
    },
    ChannelOpenSession {
        sender: UnboundedSender<OpenChannelMsg>,
    },
    ChannelOpenX11 {
        originator_address: String,
        originator_port: u32,
        sender: UnboundedSender<OpenChannelMsg>,
    },
    ChannelOpenDirectTcpIp {
        host_to_connect: String,
        port_to_connect: u32,
        originator_address: String,
        originator_port: u32,
        sender: UnboundedSender<OpenChannelMsg>,
    },
    TcpIpForward {
        address: String,
        port: u32,
        filter: Option<ForwardFilter>,
        channels: UnboundedSender<Channel>,
        reply: oneshot::Sender<Result<u32, Error>>,
    },
    CancelTcpIpForward {
        address: String,
        port: u32,
        reply: oneshot::Sender<Result<(), Error>>,
    },
    Ping {
        reply: oneshot::Sender<()>,
    },
    Disconnect {
        reason: Disconnect,
        description: String,
        language_tag: String,
    },
    Data {
        id: ChannelId,
        data: CryptoVec,
    },
    ExtendedData {
        id: ChannelId,
        data: CryptoVec,
        ext: u32,
    },
    Eof {
        id: ChannelId,
    },
    Close {
        id: ChannelId,
    },
    RequestPty {
        id: ChannelId,
        want_reply: bool,
        term: String,
        col_width: u32,
        row_height: u32,
        pix_width: u32,
        pix_height: u32,
        terminal_modes: Vec<(Pty, u32)>,
    },
    RequestShell {
        id: ChannelId,
        want_reply: bool,
    },
    Exec {
        id: ChannelId,
        want_reply: bool,
        command: String,
    },
    Signal {
        id: ChannelId,
        signal: Sig,
    },
    RequestSubsystem {
        id: ChannelId,
        want_reply: bool,
        name: String,
    },
    RequestX11 {
        id: ChannelId,
        want_reply: bool,
        single_connection: bool,
        x11_authentication_protocol: String,
        x11_authentication_cookie: String,
        x11_screen_number: u32,
    },
    RequestAgentForward {
        id: ChannelId,
        want_reply: bool,
    },
    SetEnv {
        id: ChannelId,
        want_reply: bool,
        variable_name: String,
        variable_value: String,
    },
    WindowChange {
        id: ChannelId,
        col_width: u32,
        row_height: u32,
        pix_width: u32,
        pix_height: u32,
    },
}

#[derive(Debug)]
enum OpenChannelMsg {
    Open {
        id: ChannelId,
        max_packet_size: u32,
        window_size: u32,
    },
    Msg(ChannelMsg),
}

/// Handle to a session, used to send messages to a client outside of
/// the request/response cycle.
pub struct Handle<H: Handler> {
    sender: Sender<Msg>,
    receiver: UnboundedReceiver<Reply>,
    join: tokio::task::JoinHandle<Result<(), H::Error>>,
}

impl<H: Handler> Drop for Handle<H> {
    fn drop(&mut self) {
        debug!("drop handle")
    }
}

#[derive(Clone)]
pub struct ChannelSender {
    sender: Sender<Msg>,
    id: ChannelId,
}

pub struct Channel {
    sender: ChannelSender,
    receiver: UnboundedReceiver<OpenChannelMsg>,
    max_packet_size: u32,
    window_size: u32,
}

/// An active remote forward: the server listens for us and opens a
/// `forwarded-tcpip` channel per incoming connection.
pub struct RemoteForward {
    /// The address the forward was requested for.
    pub address: String,
    /// The port the server actually bound (equal to the requested port
    /// unless 0 was requested).
    pub port: u32,
    /// One `Channel` per connection accepted by the server.
    pub incoming: UnboundedReceiver<Channel>,
}

impl<H: Handler> Handle<H> {
    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }

    /// Authenticate with a queue of methods, tried in policy order
    /// (public keys before keyboard-interactive before passwords)
    /// until the server accepts one or the queue runs dry. Returns
    /// whether authentication succeeded.
    pub async fn authenticate<U: Into<String>>(
        &mut self,
        user: U,
        methods: Vec<auth::Method>,
    ) -> Result<bool, Error> {
        let user = user.into();
        self.sender
            .send(Msg::Authenticate { user, methods })
            .await
            .map_err(|_| Error::SendError)?;
        loop {
            match self.receiver.recv().await {
                Some(Reply::AuthSuccess) => return Ok(true),
                Some(Reply::AuthFailure) => return Ok(false),
                None => return Ok(false),
                _ => {}
            }
        }
    }

    pub async fn authenticate_none<U: Into<String>>(&mut self, user: U) -> Result<bool, Error> {
        self.authenticate(user, vec![auth::Method::None]).await
    }

    pub async fn authenticate_password<U: Into<String>, P: Into<String>>(
        &mut self,
        user: U,
        password: P,
    ) -> Result<bool, Error> {
        self.authenticate(
            user,
            vec![auth::Method::Password {
                password: password.into(),
            }],
        )
        .await
    }

    pub async fn authenticate_publickey<U: Into<String>>(
        &mut self,
        user: U,
        key: Arc<thrussh_keys::key::KeyPair>,
    ) -> Result<bool, Error> {
        self.authenticate(user, vec![auth::Method::PublicKey { key }])
            .await
    }

    pub async fn authenticate_keyboard_interactive<U: Into<String>, S: Into<String>>(
        &mut self,
        user: U,
        submethods: S,
    ) -> Result<bool, Error> {
        self.authenticate(
            user,
            vec![auth::Method::KeyboardInteractive {
                submethods: submethods.into(),
            }],
        )
        .await
    }

    /// Authenticate with a public key whose signatures are produced
    /// outside this library, for instance by an SSH agent.
    pub async fn authenticate_future<U: Into<String>, S: auth::Signer>(
        &mut self,
        user: U,
        key: thrussh_keys::key::PublicKey,
        mut future: S,
    ) -> (S, Result<bool, S::Error>) {
        let user = user.into();
        if self
            .sender
            .send(Msg::Authenticate {
                user,
                methods: vec![auth::Method::FuturePublicKey { key }],
            })
            .await
            .is_err()
        {
            return (future, Err((crate::SendError {}).into()));
        }
        loop {
            let reply = self.receiver.recv().await;
            match reply {
                Some(Reply::AuthSuccess) => return (future, Ok(true)),
                Some(Reply::AuthFailure) => return (future, Ok(false)),
                Some(Reply::SignRequest { key, data }) => {
                    let (f, data) = future.auth_publickey_sign(&key, data).await;
                    future = f;
                    let data = match data {
                        Ok(data) => data,
                        Err(e) => return (future, Err(e)),
                    };
                    if self.sender.send(Msg::Signed { data }).await.is_err() {
                        return (future, Err((crate::SendError {}).into()));
                    }
                }
                None => return (future, Ok(false)),
                _ => {}
            }
        }
    }

    async fn wait_channel_confirmation(
        &self,
        mut receiver: UnboundedReceiver<OpenChannelMsg>,
    ) -> Result<Channel, Error> {
        loop {
            match receiver.recv().await {
                Some(OpenChannelMsg::Open {
                    id,
                    max_packet_size,
                    window_size,
                }) => {
                    return Ok(Channel {
                        sender: ChannelSender {
                            sender: self.sender.clone(),
                            id,
                        },
                        receiver,
                        max_packet_size,
                        window_size,
                    });
                }
                None => {
                    return Err(Error::Disconnect);
                }
                msg => {
                    debug!("msg = {:?}", msg);
                }
            }
        }
    }

    /// Request a session channel (the most basic type of
    /// channel). This function returns `Some(..)` immediately if the
    /// connection is authenticated, but the channel only becomes
    /// usable when it's confirmed by the server, as indicated by the
    /// `confirmed` field of the corresponding `Channel`.
    pub async fn channel_open_session(&mut self) -> Result<Channel, Error> {
        let (sender, receiver) = unbounded_channel();
        self.sender
            .send(Msg::ChannelOpenSession { sender })
            .await
            .map_err(|_| Error::SendError)?;
        self.wait_channel_confirmation(receiver).await
    }

    /// Open a session channel and start the `sftp` subsystem on it.
    /// The SFTP protocol itself is the caller's business; the returned
    /// channel carries its bytes.
    pub async fn sftp(&mut self) -> Result<Channel, Error> {
        let mut channel = self.channel_open_session().await?;
        channel.request_subsystem(true, "sftp").await?;
        Ok(channel)
    }

    /// Request an X11 channel, on which the X11 protocol may be tunneled.
    pub async fn channel_open_x11<A: Into<String>>(
        &mut self,
        originator_address: A,
        originator_port: u32,
    ) -> Result<Channel, Error> {
        let (sender, receiver) = unbounded_channel();
        self.sender
            .send(Msg::ChannelOpenX11 {
                originator_address: originator_address.into(),
                originator_port,
                sender,
            })
            .await
            .map_err(|_| Error::SendError)?;
        self.wait_channel_confirmation(receiver).await
    }

    /// Open a TCP/IP forwarding channel. This is usually done when a
    /// connection comes to a locally forwarded TCP/IP port. See
    /// [RFC4254](https://tools.ietf.org/html/rfc4254#section-7). The
    /// TCP/IP packets can then be tunneled through the channel using
    /// `.data()`.
    pub async fn channel_open_direct_tcpip<A: Into<String>, B: Into<String>>(
        &mut self,
        host_to_connect: A,
        port_to_connect: u32,
        originator_address: B,
        originator_port: u32,
    ) -> Result<Channel, Error> {
        let (sender, receiver) = unbounded_channel();
        self.sender
            .send(Msg::ChannelOpenDirectTcpIp {
                host_to_connect: host_to_connect.into(),
                port_to_connect,
                originator_address: originator_address.into(),
                originator_port,
                sender,
            })
            .await
            .map_err(|_| Error::SendError)?;
        self.wait_channel_confirmation(receiver).await
    }

    /// Ask the server to listen on `address:port` and forward
    /// connections back to us. With `port == 0` the server picks a
    /// port and the returned [`RemoteForward`] carries it. The filter,
    /// if any, is consulted with each connection's originator before
    /// the channel is accepted.
    pub async fn tcpip_forward<A: Into<String>>(
        &mut self,
        address: A,
        port: u32,
        filter: Option<ForwardFilter>,
    ) -> Result<RemoteForward, Error> {
        let address = address.into();
        let (channels_send, channels_recv) = unbounded_channel();
        let (reply_send, reply_recv) = oneshot::channel();
        self.sender
            .send(Msg::TcpIpForward {
                address: address.clone(),
                port,
                filter,
                channels: channels_send,
                reply: reply_send,
            })
            .await
            .map_err(|_| Error::SendError)?;
        let port = reply_recv.await.map_err(|_| Error::Disconnect)??;
        Ok(RemoteForward {
            address,
            port,
            incoming: channels_recv,
        })
    }

    /// Cancel a previous forwarding request.
    pub async fn cancel_tcpip_forward<A: Into<String>>(
        &mut self,
        address: A,
        port: u32,
    ) -> Result<(), Error> {
        let (reply_send, reply_recv) = oneshot::channel();
        self.sender
            .send(Msg::CancelTcpIpForward {
                address: address.into(),
                port,
                reply: reply_send,
            })
            .await
            .map_err(|_| Error::SendError)?;
        reply_recv.await.map_err(|_| Error::Disconnect)?
    }

    /// Send a `keepalive@openssh.com` probe and wait until the server
    /// answers it.
    pub async fn ping(&mut self) -> Result<(), Error> {
        let (reply_send, reply_recv) = oneshot::channel();
        self.sender
            .send(Msg::Ping { reply: reply_send })
            .await
            .map_err(|_| Error::SendError)?;
        reply_recv.await.map_err(|_| Error::Disconnect)
    }

    /// Sends a disconnect message.
    pub async fn disconnect(
        &mut self,
        reason: Disconnect,
        description: &str,
        language_tag: &str,
    ) -> Result<(), Error> {
        self.sender
            .send(Msg::Disconnect {
                reason,
                description: description.into(),
                language_tag: language_tag.into(),
            })
            .await
            .map_err(|_| Error::SendError)?;
        Ok(())
    }
}

impl Channel {
    pub fn id(&self) -> ChannelId {
        self.sender.id
    }

    /// Returns the min between the maximum packet size and the
    /// remaining window size in the channel.
    pub fn writable_packet_size(&self) -> usize {
        self.max_packet_size.min(self.window_size) as usize
    }

    /// Request a pseudo-terminal with the given characteristics.
    pub async fn request_pty(
        &mut self,
        want_reply: bool,
        term: &str,
        col_width: u32,
        row_height: u32,
        pix_width: u32,
        pix_height: u32,
        terminal_modes: &[(Pty, u32)],
    ) -> Result<(), Error> {
        self.sender
            .sender
            .send(Msg::RequestPty {
                id: self.sender.id,
                want_reply,
                term: term.to_string(),
                col_width,
                row_height,
                pix_width,
                pix_height,
                terminal_modes: terminal_modes.to_vec(),
            })
            .await
            .map_err(|_| Error::SendError)?;
        Ok(())
    }

    /// Request a remote shell.
    pub async fn request_shell(&mut self, want_reply: bool) -> Result<(), Error> {
        self.sender
            .sender
            .send(Msg::RequestShell {
                id: self.sender.id,
                want_reply,
            })
            .await
            .map_err(|_| Error::SendError)?;
        Ok(())
    }

    /// Execute a remote program (will be passed to a shell). This can
    /// be used to implement scp (by calling a remote scp and
    /// tunneling to its standard input).
    pub async fn exec<A: Into<String>>(
        &mut self,
        want_reply: bool,
        command: A,
    ) -> Result<(), Error> {
        self.sender
            .sender
            .send(Msg::Exec {
                id: self.sender.id,
                want_reply,
                command: command.into(),
            })
            .await
            .map_err(|e| {
                debug!("e = {:?}", e);
                Error::SendError
            })?;
        Ok(())
    }

    /// Signal a remote process.
    pub async fn signal(&mut self, signal: Sig) -> Result<(), Error> {
        self.sender
            .sender
            .send(Msg::Signal {
                id: self.sender.id,
                signal,
            })
            .await
            .map_err(|_| Error::SendError)?;
        Ok(())
    }

    /// Request the start of a subsystem with the given name.
    pub async fn request_subsystem<A: Into<String>>(
        &mut self,
        want_reply: bool,
        name: A,
    ) -> Result<(), Error> {
        self.sender
            .sender
            .send(Msg::RequestSubsystem {
                id: self.sender.id,
                want_reply,
                name: name.into(),
            })
            .await
            .map_err(|_| Error::SendError)?;
        Ok(())
    }

    /// Request X11 forwarding through an already opened X11
    /// channel. See
    /// [RFC4254](https://tools.ietf.org/html/rfc4254#section-6.3.1)
    /// for security issues related to cookies.
    pub async fn request_x11<A: Into<String>, B: Into<String>>(
        &mut self,
        want_reply: bool,
        single_connection: bool,
        x11_authentication_protocol: A,
        x11_authentication_cookie: B,
        x11_screen_number: u32,
    ) -> Result<(), Error> {
        self.sender
            .sender
            .send(Msg::RequestX11 {
                id: self.sender.id,
                want_reply,
                single_connection,
                x11_authentication_protocol: x11_authentication_protocol.into(),
                x11_authentication_cookie: x11_authentication_cookie.into(),
                x11_screen_number,
            })
            .await
            .map_err(|_| Error::SendError)?;
        Ok(())
    }

    /// Ask the server to forward connections to our authentication
    /// agent over this session.
    pub async fn request_agent_forward(&mut self, want_reply: bool) -> Result<(), Error> {
        self.sender
            .sender
            .send(Msg::RequestAgentForward {
                id: self.sender.id,
                want_reply,
            })
            .await
            .map_err(|_| Error::SendError)?;
        Ok(())
    }

    /// Set a remote environment variable.
    pub async fn set_env<A: Into<String>, B: Into<String>>(
        &mut self,
        want_reply: bool,
        variable_name: A,
        variable_value: B,
    ) -> Result<(), Error> {
        self.sender
            .sender
            .send(Msg::SetEnv {
                id: self.sender.id,
                want_reply,
                variable_name: variable_name.into(),
                variable_value: variable_value.into(),
            })
            .await
            .map_err(|_| Error::SendError)?;
        Ok(())
    }

    /// Inform the server that our window size has changed.
    pub async fn window_change(
        &mut self,
        col_width: u32,
        row_height: u32,
        pix_width: u32,
        pix_height: u32,
    ) -> Result<(), Error> {
        self.sender
            .sender
            .send(Msg::WindowChange {
                id: self.sender.id,
                col_width,
                row_height,
                pix_width,
                pix_height,
            })
            .await
            .map_err(|_| Error::SendError)?;
        Ok(())
    }

    /// Send data to a channel.
    pub async fn data<R: tokio::io::AsyncReadExt + std::marker::Unpin>(
        &mut self,
        data: R,
    ) -> Result<(), Error> {
        self.send_data(None, data).await
    }

    /// Send data to a channel on the given extended stream.
    pub async fn extended_data<R: tokio::io::AsyncReadExt + std::marker::Unpin>(
        &mut self,
        ext: u32,
        data: R,
    ) -> Result<(), Error> {
        self.send_data(Some(ext), data).await
    }

    async fn send_data<R: tokio::io::AsyncReadExt + std::marker::Unpin>(
        &mut self,
        ext: Option<u32>,
        mut data: R,
    ) -> Result<(), Error> {
        let mut total = 0;
        loop {
            // Wait for the window to be restored.
            while self.window_size == 0 {
                match self.receiver.recv().await {
                    Some(OpenChannelMsg::Msg(ChannelMsg::WindowAdjusted { new_size })) => {
                        debug!("window adjusted: {:?}", new_size);
                        self.window_size = new_size;
                        break;
                    }
                    Some(OpenChannelMsg::Msg(msg)) => {
                        debug!("unexpected channel msg: {:?}", msg);
                    }
                    Some(_) => debug!("unexpected channel msg"),
                    None => break,
                }
            }
            debug!(
                "sending data, self.window_size = {:?}, self.max_packet_size = {:?}, total = {:?}",
                self.window_size, self.max_packet_size, total
            );
            let sendable = self.window_size.min(self.max_packet_size) as usize;
            let mut c = CryptoVec::new_zeroed(sendable);
            let n = data.read(&mut c[..]).await?;
            total += n;
            c.resize(n);
            self.window_size -= n as u32;
            self.send_data_packet(ext, c).await?;
            if n == 0 {
                break;
            } else if self.window_size > 0 {
                continue;
            }
        }
        Ok(())
    }

    async fn send_data_packet(&mut self, ext: Option<u32>, data: CryptoVec) -> Result<(), Error> {
        self.sender
            .sender
            .send(if let Some(ext) = ext {
                Msg::ExtendedData {
                    id: self.sender.id,
                    ext,
                    data,
                }
            } else {
                Msg::Data {
                    id: self.sender.id,
                    data,
                }
            })
            .await
            .map_err(|e| {
                error!("{:?}", e);
                Error::SendError
            })?;
        Ok(())
    }

    /// Signal that we will send no more data on this channel. The
    /// server may still send data until it closes.
    pub async fn eof(&mut self) -> Result<(), Error> {
        self.sender
            .sender
            .send(Msg::Eof { id: self.sender.id })
            .await
            .map_err(|_| Error::SendError)?;
        Ok(())
    }

    /// Start closing the channel. The channel is only retired once the
    /// server has answered with its own close.
    pub async fn close(&mut self) -> Result<(), Error> {
        self.sender
            .sender
            .send(Msg::Close { id: self.sender.id })
            .await
            .map_err(|_| Error::SendError)?;
        Ok(())
    }

    /// Wait for data to come.
    pub async fn wait(&mut self) -> Option<ChannelMsg> {
        loop {
            match self.receiver.recv().await {
                Some(OpenChannelMsg::Msg(ChannelMsg::WindowAdjusted { new_size })) => {
                    self.window_size += new_size;
                    return Some(ChannelMsg::WindowAdjusted { new_size });
                }
                Some(OpenChannelMsg::Msg(msg)) => return Some(msg),
                None => return None,
                _ => {}
            }
        }
    }
}

impl<H: Handler> Future for Handle<H> {
    type Output = Result<(), H::Error>;
    fn poll(mut self: Pin<&mut Self>, cx: &mut Context) -> Poll<Self::Output> {
        match Future::poll(Pin::new(&mut self.join), cx) {
            Poll::Ready(r) => Poll::Ready(match r {
                Ok(Ok(x)) => Ok(x),
                Err(e) => Err(crate::Error::from(e).into()),
                Ok(Err(e)) => Err(e),
            }),
            Poll::Pending => Poll::Pending,
        }
    }
}

use std::net::ToSocketAddrs;
pub async fn connect<H: Handler + Send + 'static, T: ToSocketAddrs>(
    config: Arc<Config>,
    addr: T,
    handler: H,
) -> Result<Handle<H>, H::Error> {
    let addr = addr
        .to_socket_addrs()
        .map_err(crate::Error::from)?
        .next()
        .ok_or_else(|| crate::Error::from(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "no address",
        )))?;
    let socket = TcpStream::connect(addr).await.map_err(crate::Error::from)?;
    connect_stream(config, socket, handler).await
}

pub async fn connect_stream<H, R>(
    config: Arc<Config>,
    mut stream: R,
    handler: H,
) -> Result<Handle<H>, H::Error>
where
    H: Handler + Send + 'static,
    R: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    // Writing SSH id.
    let mut write_buffer = SSHBuffer::new();
    write_buffer.send_ssh_id(config.as_ref().client_id.as_bytes());
    stream
        .write_all(&write_buffer.buffer)
        .await
        .map_err(crate::Error::from)?;

    // Reading SSH id and allocating a session if correct.
    let mut stream = SshRead::new(stream);
    let read_id = async {
        if let Some(t) = config.connection_timeout {
            tokio::time::timeout(t, stream.read_ssh_id())
                .await
                .map_err(crate::Error::from)?
        } else {
            stream.read_ssh_id().await
        }
    };
    let sshid = read_id.await?;
    let (sender, receiver) = channel(10);
    let (sender2, receiver2) = unbounded_channel();
    if config.maximum_packet_size > 65535 {
        error!(
            "Maximum packet size ({:?}) should not larger than a TCP packet (65535)",
            config.maximum_packet_size
        );
    }
    let mut session = Session {
        common: CommonSession {
            write_buffer,
            kex: None,
            auth_user: String::new(),
            auth_method: None,
            auth_methods: VecDeque::new(),
            auth_attempts: 0,
            cipher: cipher::clear_pair().local_to_remote,
            pending_opening_cipher: None,
            encrypted: None,
            config,
            disconnected: false,
            buffer: CryptoVec::new(),
        },
        receiver,
        sender: sender2,
        handle_sender: sender.clone(),
        channels: HashMap::new(),
        pending_reads: Vec::new(),
        pending_len: 0,
        pending_global_requests: VecDeque::new(),
        remote_forwards: HashMap::new(),
        auth_deadline: None,
        outstanding_keepalives: 0,
    };
    session.read_ssh_id(sshid)?;
    let (encrypted_signal, encrypted_recv) = tokio::sync::oneshot::channel();
    let join = tokio::spawn(session.run(stream, handler, Some(encrypted_signal)));
    encrypted_recv.await.unwrap_or(());
    Ok(Handle {
        sender,
        receiver: receiver2,
        join,
    })
}

async fn start_reading<R: AsyncRead + Unpin>(
    mut stream_read: R,
    mut buffer: SSHBuffer,
    mut cipher: cipher::OpeningCipher,
) -> Result<(usize, R, SSHBuffer, cipher::OpeningCipher), Error> {
    let n = cipher::read(&mut stream_read, &mut buffer, &mut cipher).await?;
    Ok((n, stream_read, buffer, cipher))
}

impl Session {
    async fn run<H: Handler + Send, R: AsyncRead + AsyncWrite + Unpin + Send>(
        mut self,
        mut stream: SshRead<R>,
        handler: H,
        mut encrypted_signal: Option<tokio::sync::oneshot::Sender<()>>,
    ) -> Result<(), H::Error> {
        self.flush().map_err(crate::Error::from)?;
        if !self.common.write_buffer.buffer.is_empty() {
            debug!("writing {:?} bytes", self.common.write_buffer.buffer.len());
            stream
                .write_all(&self.common.write_buffer.buffer)
                .await
                .map_err(crate::Error::from)?;
            stream.flush().await.map_err(crate::Error::from)?;
        }
        self.common.write_buffer.buffer.clear();
        let mut decomp = CryptoVec::new();
        let mut handler = Some(handler);

        let (stream_read, mut stream_write) = stream.split();
        let buffer = SSHBuffer::new();
        let mut keepalive: Option<tokio::time::Interval> = None;
        let reading = start_reading(stream_read, buffer, cipher::clear_pair().remote_to_local);
        pin!(reading);

        while !self.common.disconnected {
            let auth_deadline = self
                .auth_deadline
                .unwrap_or_else(|| tokio::time::Instant::now() + FAR_AWAY);
            let awaiting_auth = self.auth_deadline.is_some();
            let keepalive_running = keepalive.is_some();
            tokio::select! {
                r = &mut reading => {
                    let (stream_read, buffer, mut opening_cipher) = match r {
                        Ok((_, stream_read, buffer, cipher)) => (stream_read, buffer, cipher),
                        Err(e) => return Err(e.into())
                    };
                    if buffer.buffer.len() < 5 {
                        break
                    }
                    {
                        let buf = if let Some(ref mut enc) = self.common.encrypted {
                            if let Ok(buf) = enc.decompress.decompress(
                                &buffer.buffer[5..],
                                &mut decomp,
                            ) {
                                buf
                            } else {
                                break
                            }
                        } else {
                            &buffer.buffer[5..]
                        };
                        if !buf.is_empty() {
                            if buf[0] == crate::msg::DISCONNECT {
                                match self.handle_disconnect(buf) {
                                    Ok(()) => break,
                                    Err(e) => return Err(e.into()),
                                }
                            } else if buf[0] == crate::msg::IGNORE || buf[0] == crate::msg::DEBUG
                                || buf[0] == crate::msg::UNIMPLEMENTED {
                                debug!("transport message {:?} ignored", buf[0]);
                            } else if !is_known_msg(buf[0]) {
                                // Answer unknown packets, RFC 4253 §11.4.
                                let seqn = buffer.seqn.0.wrapping_sub(1);
                                self.send_unimplemented(seqn).map_err(crate::Error::from)?;
                            } else {
                                self = reply(self, &mut handler, &mut encrypted_signal, &buf[..]).await?;
                            }
                        }
                    }
                    if buffer.needs_rekey_for_seqn() {
                        self.initiate_rekey().map_err(crate::Error::from)?;
                    }
                    if let Some(c) = self.common.pending_opening_cipher.take() {
                        opening_cipher = c
                    }
                    reading.set(start_reading(stream_read, buffer, opening_cipher));
                }
                msg = self.receiver.recv(), if !self.is_rekeying() => {
                    match msg {
                        Some(Msg::Authenticate { user, methods }) => {
                            if self.auth_deadline.is_none() {
                                let timeout = self.common.config.auth_timeout;
                                self.auth_deadline = Some(tokio::time::Instant::now() + timeout);
                            }
                            self.write_auth_request_if_needed(&user, methods)
                                .map_err(crate::Error::from)?;
                        }
                        Some(Msg::Signed { .. }) => {},
                        Some(Msg::ChannelOpenSession { sender }) => {
                            let id = self.channel_open_session()?;
                            self.channels.insert(id, sender);
                        }
                        Some(Msg::ChannelOpenX11 { originator_address, originator_port, sender }) => {
                            let id = self.channel_open_x11(&originator_address, originator_port)?;
                            self.channels.insert(id, sender);
                        }
                        Some(Msg::ChannelOpenDirectTcpIp { host_to_connect, port_to_connect, originator_address, originator_port, sender }) => {
                            let id = self.channel_open_direct_tcpip(&host_to_connect, port_to_connect, &originator_address, originator_port)?;
                            self.channels.insert(id, sender);
                        }
                        Some(Msg::TcpIpForward { address, port, filter, channels, reply }) => {
                            self.tcpip_forward(&address, port, filter, channels, reply)
                        },
                        Some(Msg::CancelTcpIpForward { address, port, reply }) => {
                            self.cancel_tcpip_forward(&address, port, reply)
                        },
                        Some(Msg::Ping { reply }) => {
                            self.keepalive(Some(reply)).map_err(crate::Error::from)?;
                        },
                        Some(Msg::Disconnect { reason, description, language_tag }) => {
                            self.disconnect(reason, &description, &language_tag)
                                .map_err(crate::Error::from)?
                        },
                        Some(Msg::Data { data, id }) => { self.data(id, data) },
                        Some(Msg::Eof { id }) => { self.eof(id); },
                        Some(Msg::Close { id }) => { self.close(id); },
                        Some(Msg::ExtendedData { data, ext, id }) => { self.extended_data(id, ext, data); },
                        Some(Msg::RequestPty { id, want_reply, term, col_width, row_height, pix_width, pix_height, terminal_modes }) => {
                            self.request_pty(id, want_reply, &term, col_width, row_height, pix_width, pix_height, &terminal_modes)
                        },
                        Some(Msg::WindowChange { id, col_width, row_height, pix_width, pix_height }) => {
                            self.window_change(id, col_width, row_height, pix_width, pix_height)
                        },
                        Some(Msg::RequestX11 { id, want_reply, single_connection, x11_authentication_protocol, x11_authentication_cookie, x11_screen_number }) => {
                            self.request_x11(id, want_reply, single_connection, &x11_authentication_protocol, &x11_authentication_cookie, x11_screen_number)
                        },
                        Some(Msg::RequestAgentForward { id, want_reply }) => {
                            self.request_agent_forward(id, want_reply)
                        },
                        Some(Msg::SetEnv { id, want_reply, variable_name, variable_value }) => {
                            self.set_env(id, want_reply, &variable_name, &variable_value)
                        },
                        Some(Msg::RequestShell { id, want_reply }) => {
                            self.request_shell(want_reply, id)
                        },
                        Some(Msg::Exec { id, want_reply, command }) => {
                            self.exec(id, want_reply, &command)
                        },
                        Some(Msg::Signal { id, signal }) => {
                            self.signal(id, signal)
                        },
                        Some(Msg::RequestSubsystem { id, want_reply, name }) => {
                            self.request_subsystem(want_reply, id, &name)
                        },
                        None => {
                            self.common.disconnected = true;
                            break
                        }
                    }
                }
                _ = tokio::time::sleep_until(auth_deadline), if awaiting_auth => {
                    debug!("authentication timeout");
                    self.common.disconnect(
                        Disconnect::ByApplication,
                        "authentication timeout",
                        "",
                    ).map_err(crate::Error::from)?;
                    return Err(crate::Error::AuthTimeout.into());
                }
                _ = async { keepalive.as_mut().unwrap().tick().await }, if keepalive_running && !self.is_rekeying() => {
                    if self.outstanding_keepalives > 0 {
                        debug!("keepalive not answered");
                        return Err(crate::Error::KeepaliveTimeout.into());
                    }
                    self.keepalive(None).map_err(crate::Error::from)?;
                }
            }
            self.flush().map_err(crate::Error::from)?;
            if !self.common.write_buffer.buffer.is_empty() {
                debug!(
                    "writing to stream: {:?} bytes",
                    self.common.write_buffer.buffer.len()
                );
                stream_write
                    .write_all(&self.common.write_buffer.buffer)
                    .await
                    .map_err(crate::Error::from)?;
                stream_write.flush().await.map_err(crate::Error::from)?;
            }
            self.common.write_buffer.buffer.clear();
            if let Some(ref mut enc) = self.common.encrypted {
                if let EncryptedState::InitCompression = enc.state {
                    enc.client_compression.init_compress(&mut enc.compress);
                    enc.state = EncryptedState::Authenticated;
                    self.auth_deadline = None;
                    if keepalive.is_none() {
                        if let Some(d) = self.common.config.keepalive_interval {
                            keepalive = Some(tokio::time::interval_at(
                                tokio::time::Instant::now() + d,
                                d,
                            ));
                        }
                    }
                }
            }
        }
        debug!("disconnected");
        if self.common.disconnected {
            stream_write.shutdown().await.map_err(crate::Error::from)?;
        }
        Ok(())
    }

    fn handle_disconnect(&mut self, buf: &[u8]) -> Result<(), Error> {
        use crate::encoding::Reader;
        let mut r = buf.reader(1);
        let reason = r.read_u32()?;
        let description = String::from_utf8_lossy(r.read_string()?).into_owned();
        debug!("disconnect received: {:?} {:?}", reason, description);
        self.common.disconnected = true;
        if reason == Disconnect::ByApplication as u32 {
            Ok(())
        } else {
            Err(Error::RemoteDisconnect {
                reason,
                description,
            })
        }
    }

    fn is_rekeying(&self) -> bool {
        if let Some(ref enc) = self.common.encrypted {
            enc.rekey.is_some()
        } else {
            true
        }
    }

    fn read_ssh_id(&mut self, sshid: &[u8]) -> Result<(), Error> {
        let mut exchange = Exchange::new();
        exchange.server_id.extend(sshid);
        // Preparing the response
        exchange
            .client_id
            .extend(self.common.config.as_ref().client_id.as_bytes());
        let mut kexinit = KexInit {
            exchange,
            algo: None,
            sent: false,
            session_id: None,
        };
        self.common.write_buffer.buffer.clear();
        kexinit.client_write(
            self.common.config.as_ref(),
            &mut self.common.cipher,
            &mut self.common.write_buffer,
        )?;
        self.common.kex = Some(Kex::KexInit(kexinit));
        Ok(())
    }

    /// Flush the temporary cleartext buffer into the encryption
    /// buffer. This does *not* flush to the socket.
    fn flush(&mut self) -> Result<(), Error> {
        if let Some(ref mut enc) = self.common.encrypted {
            if enc.flush(
                &self.common.config.as_ref().limits,
                &mut self.common.cipher,
                &mut self.common.write_buffer,
            )? {
                info!("Re-exchanging keys");
                if enc.rekey.is_none() {
                    if let Some(exchange) = enc.exchange.take() {
                        let mut kexinit = KexInit::initiate_rekey(exchange, &enc.session_id);
                        kexinit.client_write(
                            self.common.config.as_ref(),
                            &mut self.common.cipher,
                            &mut self.common.write_buffer,
                        )?;
                        enc.rekey = Some(Kex::KexInit(kexinit))
                    }
                }
            }
        }
        Ok(())
    }

    /// Start a key re-exchange if one is not already running. Called
    /// when the inbound sequence number approaches its wrap.
    fn initiate_rekey(&mut self) -> Result<(), Error> {
        if let Some(ref mut enc) = self.common.encrypted {
            if enc.rekey.is_none() {
                if let Some(exchange) = enc.exchange.take() {
                    info!("Re-exchanging keys (sequence number threshold)");
                    let mut kexinit = KexInit::initiate_rekey(exchange, &enc.session_id);
                    kexinit.client_write(
                        self.common.config.as_ref(),
                        &mut self.common.cipher,
                        &mut self.common.write_buffer,
                    )?;
                    enc.rekey = Some(Kex::KexInit(kexinit))
                }
            }
        }
        Ok(())
    }

    fn send_unimplemented(&mut self, seqn: u32) -> Result<(), Error> {
        if let Some(ref mut enc) = self.common.encrypted {
            push_packet!(enc.write, {
                enc.write.push(msg::UNIMPLEMENTED);
                enc.write.push_u32_be(seqn);
            });
        }
        Ok(())
    }

    /// Send a `ChannelMsg` from the background handler to the client.
    pub fn send_channel_msg(&self, channel: ChannelId, msg: ChannelMsg) -> bool {
        if let Some(chan) = self.channels.get(&channel) {
            chan.send(OpenChannelMsg::Msg(msg)).unwrap_or(());
            true
        } else {
            false
        }
    }
}

const FAR_AWAY: std::time::Duration = std::time::Duration::from_secs(86400 * 365);

fn is_known_msg(id: u8) -> bool {
    matches!(
        id,
        msg::DISCONNECT..=msg::SERVICE_ACCEPT
            | msg::KEXINIT
            | msg::NEWKEYS
            | msg::KEX_ECDH_INIT..=msg::KEX_DH_GEX_REQUEST
            | msg::USERAUTH_REQUEST..=msg::USERAUTH_BANNER
            | msg::USERAUTH_PK_OK
            | msg::USERAUTH_INFO_RESPONSE
            | msg::GLOBAL_REQUEST..=msg::REQUEST_FAILURE
            | msg::CHANNEL_OPEN..=msg::CHANNEL_FAILURE
    )
}

thread_local! {
    static HASH_BUFFER: std::cell::RefCell<CryptoVec> = std::cell::RefCell::new(CryptoVec::new());
}

impl KexDhDone {
    async fn server_key_check<H: Handler>(
        mut self,
        rekey: bool,
        handler: &mut Option<H>,
        buf: &[u8],
    ) -> Result<Kex, H::Error> {
        use crate::encoding::Reader;
        let mut reader = buf.reader(1);
        let pubkey = reader.read_string().map_err(crate::Error::from)?; // server public key.
        let pubkey = key::ServerPublicKey::parse(pubkey).map_err(crate::Error::from)?;
        debug!("server public key: {:?}", pubkey);
        if pubkey.algorithm() != self.names.key.key_blob_type() {
            debug!(
                "host key type {:?} does not match negotiated {:?}",
                pubkey.algorithm(),
                self.names.key
            );
            return Err(crate::Error::Kex.into());
        }
        if !rekey {
            let h = handler.take().unwrap();
            let (h, check) = h.check_server_key(&pubkey).await?;
            *handler = Some(h);
            if !check {
                return Err(crate::Error::UnknownKey.into());
            }
        }
        HASH_BUFFER.with(|buffer| {
            let mut buffer = buffer.borrow_mut();
            buffer.clear();
            let hash = {
                let server_ephemeral = reader.read_string().map_err(crate::Error::from)?;
                self.exchange.server_ephemeral.extend(server_ephemeral);
                let signature = reader.read_string().map_err(crate::Error::from)?;

                self.kex
                    .compute_shared_secret(&self.exchange.server_ephemeral)
                    .map_err(crate::Error::from)?;
                let hash = self
                    .kex
                    .compute_exchange_hash(&pubkey, &self.exchange, &mut buffer)
                    .map_err(crate::Error::from)?;
                debug!("exchange hash: {:?}", hash);
                if !pubkey
                    .verify_kex_signature(&hash, signature)
                    .map_err(crate::Error::from)?
                {
                    debug!("wrong server sig");
                    return Err(crate::Error::WrongServerSig.into());
                }
                hash
            };
            let mut newkeys = self.compute_keys(hash).map_err(crate::Error::from)?;
            newkeys.sent = true;
            Ok(Kex::NewKeys(newkeys))
        })
    }
}

async fn reply<H: Handler>(
    mut session: Session,
    handler: &mut Option<H>,
    sender: &mut Option<tokio::sync::oneshot::Sender<()>>,
    buf: &[u8],
) -> Result<Session, H::Error> {
    match session.common.kex.take() {
        Some(Kex::KexInit(kexinit)) => {
            if kexinit.algo.is_some()
                || buf[0] == msg::KEXINIT
                || session.common.encrypted.is_none()
            {
                session.common.kex = Some(Kex::KexDhDone(kexinit.client_parse(
                    session.common.config.as_ref(),
                    &mut session.common.cipher,
                    buf,
                    &mut session.common.write_buffer,
                )?));
                session.flush().map_err(crate::Error::from)?;
            }
            Ok(session)
        }
        Some(Kex::KexDhDone(mut kexdhdone)) => {
            if kexdhdone.names.ignore_guessed {
                kexdhdone.names.ignore_guessed = false;
                session.common.kex = Some(Kex::KexDhDone(kexdhdone));
                Ok(session)
            } else if kexdhdone.kex.is_group_exchange() && buf[0] == msg::KEX_DH_GEX_GROUP {
                // The server chose a group; send our ephemeral.
                session.common.buffer.clear();
                let buffer = &mut session.common.buffer;
                kexdhdone
                    .kex
                    .client_gex_group(buf, &mut kexdhdone.exchange.client_ephemeral, buffer)
                    .map_err(crate::Error::from)?;
                session
                    .common
                    .cipher
                    .write(buffer, &mut session.common.write_buffer)
                    .map_err(crate::Error::from)?;
                session.common.kex = Some(Kex::KexDhDone(kexdhdone));
                Ok(session)
            } else if buf[0]
                == if kexdhdone.kex.is_group_exchange() {
                    msg::KEX_DH_GEX_REPLY
                } else {
                    msg::KEX_ECDH_REPLY
                }
            {
                // We've sent our ephemeral, this is the server's answer.
                session.common.kex = Some(kexdhdone.server_key_check(false, handler, buf).await?);
                session
                    .common
                    .cipher
                    .write(&[msg::NEWKEYS], &mut session.common.write_buffer)
                    .map_err(crate::Error::from)?;
                session.flush().map_err(crate::Error::from)?;
                Ok(session)
            } else {
                error!("Wrong packet received");
                Err(crate::Error::Inconsistent.into())
            }
        }
        Some(Kex::NewKeys(newkeys)) => {
            debug!("newkeys received");
            if buf[0] != msg::NEWKEYS {
                return Err(crate::Error::Kex.into());
            }
            if let Some(sender) = sender.take() {
                sender.send(()).unwrap_or(());
            }
            session.common.encrypted(
                EncryptedState::WaitingServiceRequest {
                    accepted: false,
                    sent: false,
                },
                newkeys,
            );
            // Ok, NEWKEYS received, now encrypted.
            Ok(session)
        }
        None => session.client_read_encrypted(handler, buf).await,
    }
}

/// The configuration of clients.
#[derive(Debug)]
pub struct Config {
    /// The client ID string sent at the beginning of the protocol.
    pub client_id: String,
    /// The bytes and time limits before key re-exchange.
    pub limits: Limits,
    /// The initial size of a channel (used for flow control).
    pub window_size: u32,
    /// The maximal size of a single packet.
    pub maximum_packet_size: u32,
    /// Lists of preferred algorithms.
    pub preferred: negotiation::Preferred,
    /// Time after which the connection attempt is abandoned.
    pub connection_timeout: Option<std::time::Duration>,
    /// Time the whole authentication phase may take before the
    /// transport is closed.
    pub auth_timeout: std::time::Duration,
    /// How many `USERAUTH_REQUEST`s may be sent before giving up.
    pub maximum_auth_attempts: usize,
    /// If set, send `keepalive@openssh.com` probes at this interval
    /// once authenticated; an unanswered probe ends the connection.
    pub keepalive_interval: Option<std::time::Duration>,
}

impl Default for Config {
    fn default() -> Config {
        Config {
            client_id: format!(
                "SSH-2.0-{}_{}",
                env!("CARGO_PKG_NAME"),
                env!("CARGO_PKG_VERSION")
            ),
            limits: Limits::default(),
            window_size: 2097152,
            maximum_packet_size: 32768,
            preferred: Default::default(),
            connection_timeout: None,
            auth_timeout: std::time::Duration::from_secs(600),
            maximum_auth_attempts: 20,
            keepalive_interval: None,
        }
    }
}

/// A client handler. Note that messages can be received from the
/// server at any time during a session.
pub trait Handler: Sized {
    type Error: From<crate::Error> + Send;
    /// A future ultimately resolving into a boolean, which can be
    /// returned by some parts of this handler.
    type FutureBool: Future<Output = Result<(Self, bool), Self::Error>> + Send;

    /// A future ultimately resolving into unit, which can be
    /// returned by some parts of this handler.
    type FutureUnit: Future<Output = Result<(Self, Session), Self::Error>> + Send;

    /// A future resolving into an optional replacement password, used
    /// when the server demands a password change.
    type FuturePassword: Future<Output = Result<(Self, Option<String>), Self::Error>> + Send;

    /// A future resolving into the user's answers to a
    /// keyboard-interactive info request, or `None` to give up on the
    /// method.
    type FutureResponses: Future<Output = Result<(Self, Option<Vec<String>>), Self::Error>> + Send;

    /// Convert a `bool` to `Self::FutureBool`. This is used to
    /// produce the default handlers.
    fn finished_bool(self, b: bool) -> Self::FutureBool;

    /// Produce a `Self::FutureUnit`. This is used to produce the
    /// default handlers.
    fn finished(self, session: Session) -> Self::FutureUnit;

    /// Produce a `Self::FuturePassword`, for the default handlers.
    fn finished_password(self, password: Option<String>) -> Self::FuturePassword;

    /// Produce a `Self::FutureResponses`, for the default handlers.
    fn finished_responses(self, responses: Option<Vec<String>>) -> Self::FutureResponses;

    /// Called when the server sends us an authentication banner. This
    /// is usually meant to be shown to the user, see
    /// [RFC4252](https://tools.ietf.org/html/rfc4252#section-5.4) for
    /// more details. The text is sanitized before this is called:
    /// control characters are escaped and the length is capped.
    #[allow(unused_variables)]
    fn auth_banner(self, banner: &str, session: Session) -> Self::FutureUnit {
        self.finished(session)
    }

    /// Called to check the server's public key. This is a very important
    /// step to help prevent man-in-the-middle attacks. The default
    /// implementation rejects all keys.
    #[allow(unused_variables)]
    fn check_server_key(self, server_public_key: &key::ServerPublicKey) -> Self::FutureBool {
        self.finished_bool(false)
    }

    /// The server requires the password to be changed before letting
    /// the user in. Return the new password, or `None` to give up on
    /// password authentication.
    #[allow(unused_variables)]
    fn auth_change_password(self, prompt: &str, lang: &str) -> Self::FuturePassword {
        self.finished_password(None)
    }

    /// A keyboard-interactive challenge: answer every prompt in order,
    /// or return `None` to skip to the next authentication method.
    /// Each prompt pairs its text with whether the answer may be
    /// echoed.
    #[allow(unused_variables)]
    fn auth_keyboard_interactive(
        self,
        name: &str,
        instruction: &str,
        prompts: Vec<(String, bool)>,
    ) -> Self::FutureResponses {
        self.finished_responses(None)
    }

    /// Called when the server announces new host keys through the
    /// `hostkeys-00@openssh.com` extension. Storage is the embedder's
    /// responsibility.
    #[allow(unused_variables)]
    fn host_keys(self, keys: Vec<key::ServerPublicKey>, session: Session) -> Self::FutureUnit {
        self.finished(session)
    }

    /// Called when the server confirmed our request to open a
    /// channel. A channel can only be written to after receiving this
    /// message (this library panics otherwise).
    #[allow(unused_variables)]
    fn channel_open_confirmation(
        self,
        id: ChannelId,
        max_packet_size: u32,
        window_size: u32,
        session: Session,
    ) -> Self::FutureUnit {
        if let Some(channel) = session.channels.get(&id) {
            channel
                .send(OpenChannelMsg::Open {
                    id,
                    max_packet_size,
                    window_size,
                })
                .unwrap_or(());
        } else {
            error!("no channel for id {:?}", id);
        }
        self.finished(session)
    }

    /// Called when the server signals success on a channel request.
    #[allow(unused_variables)]
    fn channel_success(self, channel: ChannelId, session: Session) -> Self::FutureUnit {
        if let Some(chan) = session.channels.get(&channel) {
            chan.send(OpenChannelMsg::Msg(ChannelMsg::Success))
                .unwrap_or(())
        }
        self.finished(session)
    }

    /// Called when the server signals failure on a channel request.
    #[allow(unused_variables)]
    fn channel_failure(self, channel: ChannelId, session: Session) -> Self::FutureUnit {
        if let Some(chan) = session.channels.get(&channel) {
            chan.send(OpenChannelMsg::Msg(ChannelMsg::Failure))
                .unwrap_or(())
        }
        self.finished(session)
    }

    /// Called when the server closes a channel.
    #[allow(unused_variables)]
    fn channel_close(self, channel: ChannelId, mut session: Session) -> Self::FutureUnit {
        if let Some(chan) = session.channels.remove(&channel) {
            chan.send(OpenChannelMsg::Msg(ChannelMsg::Close)).unwrap_or(())
        }
        self.finished(session)
    }

    /// Called when the server sends EOF to a channel.
    #[allow(unused_variables)]
    fn channel_eof(self, channel: ChannelId, session: Session) -> Self::FutureUnit {
        if let Some(chan) = session.channels.get(&channel) {
            chan.send(OpenChannelMsg::Msg(ChannelMsg::Eof))
                .unwrap_or(())
        }
        self.finished(session)
    }

    /// Called when the server rejected our request to open a channel.
    #[allow(unused_variables)]
    fn channel_open_failure(
        self,
        channel: ChannelId,
        reason: ChannelOpenFailure,
        description: &str,
        language: &str,
        mut session: Session,
    ) -> Self::FutureUnit {
        session.channels.remove(&channel);
        session.sender.send(Reply::ChannelOpenFailure).unwrap_or(());
        self.finished(session)
    }

    /// Called when the server opens a `forwarded-tcpip` channel that
    /// was accepted by a registered forward. The channel handle has
    /// already been delivered on the forward's `incoming` stream.
    #[allow(unused_variables)]
    fn channel_open_forwarded_tcpip(
        self,
        channel: ChannelId,
        connected_address: &str,
        connected_port: u32,
        originator_address: &str,
        originator_port: u32,
        session: Session,
    ) -> Self::FutureUnit {
        self.finished(session)
    }

    /// Called when the server opens an `x11` channel. Return `true` to
    /// accept it; data then arrives through [`Handler::data`]. The
    /// default rejects the channel.
    #[allow(unused_variables)]
    fn server_channel_open_x11(
        self,
        originator_address: &str,
        originator_port: u32,
    ) -> Self::FutureBool {
        self.finished_bool(false)
    }

    /// Called when the server opens an `auth-agent@openssh.com`
    /// channel. Return `true` to accept it. The default rejects the
    /// channel.
    fn server_channel_open_agent(self) -> Self::FutureBool {
        self.finished_bool(false)
    }

    /// Called when the server sends us data. The `extended_code`
    /// parameter is a stream identifier, `None` is usually the
    /// standard output, and `Some(1)` is the standard error. See
    /// [RFC4254](https://tools.ietf.org/html/rfc4254#section-5.2).
    #[allow(unused_variables)]
    fn data(self, channel: ChannelId, data: &[u8], session: Session) -> Self::FutureUnit {
        if let Some(chan) = session.channels.get(&channel) {
            chan.send(OpenChannelMsg::Msg(ChannelMsg::Data {
                data: CryptoVec::from_slice(data),
            }))
            .unwrap_or(())
        }
        self.finished(session)
    }

    /// Called when the server sends us data on an extended stream.
    #[allow(unused_variables)]
    fn extended_data(
        self,
        channel: ChannelId,
        ext: u32,
        data: &[u8],
        session: Session,
    ) -> Self::FutureUnit {
        if let Some(chan) = session.channels.get(&channel) {
            chan.send(OpenChannelMsg::Msg(ChannelMsg::ExtendedData {
                ext,
                data: CryptoVec::from_slice(data),
            }))
            .unwrap_or(())
        }
        self.finished(session)
    }

    /// The server informs this client of whether the client may
    /// perform control-S/control-Q flow control. See
    /// [RFC4254](https://tools.ietf.org/html/rfc4254#section-6.8).
    #[allow(unused_variables)]
    fn xon_xoff(
        self,
        channel: ChannelId,
        client_can_do: bool,
        session: Session,
    ) -> Self::FutureUnit {
        if let Some(chan) = session.channels.get(&channel) {
            chan.send(OpenChannelMsg::Msg(ChannelMsg::XonXoff { client_can_do }))
                .unwrap_or(())
        }
        self.finished(session)
    }

    /// The remote process has exited, with the given exit status.
    #[allow(unused_variables)]
    fn exit_status(
        self,
        channel: ChannelId,
        exit_status: u32,
        session: Session,
    ) -> Self::FutureUnit {
        if let Some(chan) = session.channels.get(&channel) {
            chan.send(OpenChannelMsg::Msg(ChannelMsg::ExitStatus { exit_status }))
                .unwrap_or(())
        }
        self.finished(session)
    }

    /// The remote process exited upon receiving a signal.
    #[allow(unused_variables)]
    fn exit_signal(
        self,
        channel: ChannelId,
        signal_name: Sig,
        core_dumped: bool,
        error_message: &str,
        lang_tag: &str,
        session: Session,
    ) -> Self::FutureUnit {
        if let Some(chan) = session.channels.get(&channel) {
            chan.send(OpenChannelMsg::Msg(ChannelMsg::ExitSignal {
                signal_name,
                core_dumped,
                error_message: error_message.to_string(),
                lang_tag: lang_tag.to_string(),
            }))
            .unwrap_or(())
        }
        self.finished(session)
    }

    /// Called when the network window is adjusted, meaning that we
    /// can send more bytes. This is useful if this client wants to
    /// send huge amounts of data, for instance if we have called
    /// `Session::data` before, and it returned less than the
    /// full amount of data.
    #[allow(unused_variables)]
    fn window_adjusted(
        self,
        channel: ChannelId,
        mut new_size: u32,
        mut session: Session,
    ) -> Self::FutureUnit {
        if let Some(ref mut enc) = session.common.encrypted {
            new_size -= enc.flush_pending(channel) as u32;
        }
        if let Some(chan) = session.channels.get(&channel) {
            chan.send(OpenChannelMsg::Msg(ChannelMsg::WindowAdjusted { new_size }))
                .unwrap_or(())
        }
        self.finished(session)
    }
}
