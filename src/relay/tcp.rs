//! TCP Relay Session
//!
//! Drives one accepted client through SOCKS5 negotiation and then relays
//! its stream to the remote server, encrypting uplink and decrypting
//! downlink.

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::broadcast;
use tracing::{debug, info, trace};
use anyhow::Context;

use crate::config::Config;
use crate::crypto::{CipherSpec, Encryptor};
use crate::error::RelayError;
use crate::protocol::codec::{pack_response, parse_header};
use crate::protocol::constants::*;
use crate::protocol::types::{Socks5Reply, TargetAddr};
use crate::Result;

use super::udp::UdpRelayMapper;
use super::ActivityTracker;

/// Where a session is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    WaitAuth,
    AuthOk,
    AuthFail,
    WaitCmd,
    CmdConnect,
    CmdBind,
    CmdUdpAssoc,
    TcpRelay,
    UdpRelay,
}

/// One client connection from accept to teardown.
pub struct TcpRelaySession {
    id: u64,
    stream: TcpStream,
    peer_addr: SocketAddr,
    server_addr: SocketAddr,
    spec: &'static CipherSpec,
    password: String,
    one_time_auth: bool,
    buffer_size: usize,
    timeout: Duration,
    sweep_interval: Duration,
    activity: Arc<ActivityTracker>,
    stage: Stage,
}

impl TcpRelaySession {
    pub fn new(
        id: u64,
        stream: TcpStream,
        peer_addr: SocketAddr,
        server_addr: SocketAddr,
        spec: &'static CipherSpec,
        config: &Config,
        activity: Arc<ActivityTracker>,
    ) -> Self {
        Self {
            id,
            stream,
            peer_addr,
            server_addr,
            spec,
            password: config.profile.password.clone(),
            one_time_auth: config.profile.one_time_auth,
            buffer_size: config.relay.buffer_size,
            timeout: config.profile.timeout,
            sweep_interval: config.relay.sweep_interval,
            activity,
            stage: Stage::WaitAuth,
        }
    }

    fn advance(&mut self, next: Stage) {
        trace!(session_id = self.id, from = ?self.stage, to = ?next, "Stage transition");
        self.stage = next;
    }

    /// Run the session to completion.
    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) -> Result<()> {
        let mut buf = vec![0u8; self.buffer_size];

        // Method negotiation: one greeting segment, one reply.
        let n = self.stream.read(&mut buf).await?;
        if n == 0 {
            return Ok(());
        }
        self.handle_auth(&buf[..n]).await?;
        self.activity.touch();

        // Command request. Anything piggybacked after the header travels
        // onward with it.
        let n = self.stream.read(&mut buf).await?;
        if n == 0 {
            return Ok(());
        }
        let request = match parse_header(&buf[..n]) {
            Some((request, _)) => request,
            None => {
                let reply = pack_response(&Socks5Reply::error(SOCKS5_REPLY_GENERAL_FAILURE));
                self.stream.write_all(&reply).await?;
                return Err(RelayError::Protocol(
                    "malformed SOCKS5 command header".to_string(),
                )
                .into());
            }
        };
        self.activity.touch();

        match request.command {
            SOCKS5_CMD_CONNECT => {
                debug!(
                    session_id = self.id,
                    target = %request.addr,
                    port = request.port,
                    "CONNECT request"
                );
                self.handle_connect(&buf[..n], &mut shutdown).await
            }
            SOCKS5_CMD_UDP_ASSOCIATE => {
                debug!(session_id = self.id, "UDP ASSOCIATE request");
                self.handle_udp_associate(&mut shutdown).await
            }
            command => {
                if command == SOCKS5_CMD_BIND {
                    self.advance(Stage::CmdBind);
                }
                let reply =
                    pack_response(&Socks5Reply::error(SOCKS5_REPLY_COMMAND_NOT_SUPPORTED));
                self.stream.write_all(&reply).await?;
                Err(RelayError::Protocol(format!(
                    "unsupported SOCKS5 command 0x{:02x}",
                    command
                ))
                .into())
            }
        }
    }

    /// Answer the method-selection greeting. Only "no authentication" is
    /// offered to clients.
    async fn handle_auth(&mut self, greeting: &[u8]) -> Result<()> {
        if greeting.len() >= 2
            && greeting[0] == SOCKS5_VERSION
            && acceptable_methods(greeting)
        {
            self.stream
                .write_all(&[SOCKS5_VERSION, SOCKS5_AUTH_NONE])
                .await?;
            self.advance(Stage::AuthOk);
            self.advance(Stage::WaitCmd);
            Ok(())
        } else {
            self.advance(Stage::AuthFail);
            self.stream
                .write_all(&[SOCKS5_VERSION, SOCKS5_AUTH_NO_ACCEPTABLE])
                .await?;
            Err(RelayError::Protocol(
                "no acceptable authentication method".to_string(),
            )
            .into())
        }
    }

    /// CONNECT: open the tunnel to the remote server and relay both
    /// directions until either side closes.
    async fn handle_connect(
        mut self,
        segment: &[u8],
        shutdown: &mut broadcast::Receiver<()>,
    ) -> Result<()> {
        self.advance(Stage::CmdConnect);

        let mut remote = TcpStream::connect(self.server_addr)
            .await
            .with_context(|| format!("Failed to connect to server {}", self.server_addr))?;

        let mut encryptor = Encryptor::new(&self.password, self.spec, self.one_time_auth);

        // Version, command and reserved bytes stay local; the address
        // header and any payload after it go to the server encrypted.
        let sealed = encryptor.encrypt(&segment[3..])?;
        write_fully(&mut remote, &sealed).await?;

        let reply = pack_response(&Socks5Reply::success(
            TargetAddr::Ipv4(Ipv4Addr::UNSPECIFIED),
            0,
        ));
        self.stream.write_all(&reply).await?;
        self.advance(Stage::TcpRelay);

        let (mut client_read, mut client_write) = self.stream.split();
        let (mut remote_read, mut remote_write) = remote.split();
        let mut up_buf = vec![0u8; self.buffer_size];
        let mut down_buf = vec![0u8; self.buffer_size];

        loop {
            tokio::select! {
                read = client_read.read(&mut up_buf) => {
                    let n = read?;
                    if n == 0 {
                        debug!(session_id = self.id, "Client closed connection");
                        break;
                    }
                    let sealed = encryptor.encrypt(&up_buf[..n])?;
                    write_fully(&mut remote_write, &sealed).await?;
                    self.activity.touch();
                }
                read = remote_read.read(&mut down_buf) => {
                    let n = read?;
                    if n == 0 {
                        debug!(session_id = self.id, "Server closed connection");
                        break;
                    }
                    let plain = encryptor.decrypt(&down_buf[..n])?;
                    write_fully(&mut client_write, &plain).await?;
                    self.activity.touch();
                }
                _ = shutdown.recv() => {
                    debug!(session_id = self.id, "Session stopped by shutdown");
                    break;
                }
            }
        }

        Ok(())
    }

    /// UDP ASSOCIATE: stand up a datagram mapper and advertise its bound
    /// address. The TCP control channel stays open for the lifetime of the
    /// association.
    async fn handle_udp_associate(
        mut self,
        shutdown: &mut broadcast::Receiver<()>,
    ) -> Result<()> {
        self.advance(Stage::CmdUdpAssoc);

        let mut mapper = UdpRelayMapper::new(
            self.server_addr,
            self.spec,
            self.password.clone(),
            self.timeout,
            self.sweep_interval,
            self.buffer_size,
            self.activity.clone(),
        )
        .await?;

        let relay_addr = mapper.local_addr();
        info!(
            session_id = self.id,
            peer_addr = %self.peer_addr,
            %relay_addr,
            "UDP association established"
        );
        let reply = pack_response(&Socks5Reply::success(
            TargetAddr::from_socket_addr(&relay_addr),
            relay_addr.port(),
        ));
        self.stream.write_all(&reply).await?;
        self.advance(Stage::UdpRelay);

        let mapper_fut = mapper.run();
        tokio::pin!(mapper_fut);
        let mut ctl_buf = vec![0u8; 256];

        loop {
            tokio::select! {
                result = &mut mapper_fut => {
                    result?;
                    break;
                }
                read = self.stream.read(&mut ctl_buf) => {
                    if read? == 0 {
                        debug!(session_id = self.id, "UDP association control channel closed");
                        break;
                    }
                    self.activity.touch();
                }
                _ = shutdown.recv() => {
                    debug!(session_id = self.id, "UDP association stopped by shutdown");
                    break;
                }
            }
        }

        Ok(())
    }
}

/// Does the greeting offer the no-authentication method? Everything
/// after the count byte is scanned, whatever the count claims.
fn acceptable_methods(greeting: &[u8]) -> bool {
    greeting[2..].contains(&SOCKS5_AUTH_NONE)
}

/// Write the whole buffer, resubmitting the tail after a short write.
async fn write_fully<W>(writer: &mut W, data: &[u8]) -> std::io::Result<()>
where
    W: AsyncWriteExt + Unpin,
{
    let mut written = 0;
    while written < data.len() {
        let n = writer.write(&data[written..]).await?;
        if n == 0 {
            return Err(std::io::Error::new(
                std::io::ErrorKind::WriteZero,
                "peer stopped accepting data",
            ));
        }
        written += n;
        if written < data.len() {
            trace!(
                remaining = data.len() - written,
                "Short write, resubmitting tail"
            );
        }
    }
    Ok(())
}
