//! UDP Relay Mapper
//!
//! NAT-style table behind a UDP association: each client source address
//! gets its own upstream socket, and a sweeper reclaims entries that go
//! idle. Every datagram is sealed or opened as an independent unit.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use crate::crypto::{CipherSpec, Encryptor};
use crate::error::RelayError;

use super::ActivityTracker;

/// One client's upstream leg: its socket, clock, and downlink reader.
struct Mapping {
    socket: Arc<UdpSocket>,
    activity: Arc<ActivityTracker>,
    reader: JoinHandle<()>,
}

impl Drop for Mapping {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

/// Relays SOCKS5 UDP datagrams between local clients and the remote
/// server, one mapping per client source address.
pub struct UdpRelayMapper {
    socket: Arc<UdpSocket>,
    server_addr: SocketAddr,
    spec: &'static CipherSpec,
    password: String,
    timeout: Duration,
    sweep_interval: Duration,
    buffer_size: usize,
    mappings: HashMap<SocketAddr, Mapping>,
    session_activity: Arc<ActivityTracker>,
}

impl UdpRelayMapper {
    /// Bind the client-facing socket on an ephemeral loopback port.
    #[allow(clippy::too_many_arguments)]
    pub async fn new(
        server_addr: SocketAddr,
        spec: &'static CipherSpec,
        password: String,
        timeout: Duration,
        sweep_interval: Duration,
        buffer_size: usize,
        session_activity: Arc<ActivityTracker>,
    ) -> Result<Self, RelayError> {
        let socket = UdpSocket::bind("127.0.0.1:0").await?;
        Ok(Self {
            socket: Arc::new(socket),
            server_addr,
            spec,
            password,
            timeout,
            sweep_interval,
            buffer_size,
            mappings: HashMap::new(),
            session_activity,
        })
    }

    /// Address clients should send their datagrams to.
    pub fn local_addr(&self) -> SocketAddr {
        // Bound in `new`, so the address is always readable.
        self.socket
            .local_addr()
            .unwrap_or_else(|_| SocketAddr::from(([127, 0, 0, 1], 0)))
    }

    pub(crate) fn mapping_count(&self) -> usize {
        self.mappings.len()
    }

    /// Receive loop. Runs until the owning session tears it down.
    pub async fn run(&mut self) -> Result<(), RelayError> {
        let socket = self.socket.clone();
        let mut buf = vec![0u8; self.buffer_size];
        let mut sweep_tick = tokio::time::interval(self.sweep_interval);
        sweep_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                received = socket.recv_from(&mut buf) => {
                    let (n, client_addr) = received?;
                    if let Err(e) = self.handle_client_datagram(&buf[..n], client_addr).await {
                        warn!(%client_addr, "Failed to relay datagram: {}", e);
                    }
                }
                _ = sweep_tick.tick() => {
                    self.sweep();
                }
            }
        }
    }

    /// Forward one client datagram upstream, opening a mapping for the
    /// source address if none exists yet.
    pub(crate) async fn handle_client_datagram(
        &mut self,
        datagram: &[u8],
        client_addr: SocketAddr,
    ) -> Result<(), RelayError> {
        // [RSV, RSV, FRAG] prefix; fragmented datagrams are not relayed.
        if datagram.len() < 3 || datagram[2] != 0 {
            trace!(%client_addr, "Ignoring malformed or fragmented datagram");
            return Ok(());
        }

        let sealed = Encryptor::encrypt_once(&self.password, self.spec, &datagram[3..])?;

        if !self.mappings.contains_key(&client_addr) {
            let mapping = self.open_mapping(client_addr).await?;
            self.mappings.insert(client_addr, mapping);
            info!(
                %client_addr,
                total = self.mappings.len(),
                "Opened UDP mapping"
            );
        }

        if let Some(mapping) = self.mappings.get(&client_addr) {
            // A connected UDP socket can surface an ICMP unreachable as a
            // send error; the association outlives that.
            if let Err(e) = mapping.socket.send(&sealed).await {
                warn!(%client_addr, "Upstream send failed: {}", e);
            }
            mapping.activity.touch();
        }
        self.session_activity.touch();
        Ok(())
    }

    /// Bind an upstream socket for one client and start its downlink
    /// reader.
    async fn open_mapping(&self, client_addr: SocketAddr) -> Result<Mapping, RelayError> {
        let remote = UdpSocket::bind("127.0.0.1:0").await?;
        remote.connect(self.server_addr).await?;
        let remote = Arc::new(remote);

        let activity = Arc::new(ActivityTracker::new());
        activity.touch();

        let reader = self.spawn_reader(remote.clone(), client_addr, activity.clone());
        Ok(Mapping {
            socket: remote,
            activity,
            reader,
        })
    }

    /// Downlink reader for one mapping: open each server datagram and
    /// hand it back to the client with a fresh [0, 0, 0] prefix.
    fn spawn_reader(
        &self,
        remote: Arc<UdpSocket>,
        client_addr: SocketAddr,
        activity: Arc<ActivityTracker>,
    ) -> JoinHandle<()> {
        let client_socket = self.socket.clone();
        let session_activity = self.session_activity.clone();
        let password = self.password.clone();
        let spec = self.spec;
        let buffer_size = self.buffer_size;

        tokio::spawn(async move {
            let mut buf = vec![0u8; buffer_size];
            loop {
                let n = match remote.recv(&mut buf).await {
                    Ok(n) => n,
                    Err(e) => {
                        warn!(%client_addr, "Upstream receive failed: {}", e);
                        break;
                    }
                };

                let plain = match Encryptor::decrypt_once(&password, spec, &buf[..n]) {
                    Ok(plain) => plain,
                    Err(e) => {
                        warn!(%client_addr, "Dropping undecryptable datagram: {}", e);
                        continue;
                    }
                };

                let mut reply = Vec::with_capacity(3 + plain.len());
                reply.extend_from_slice(&[0, 0, 0]);
                reply.extend_from_slice(&plain);
                if let Err(e) = client_socket.send_to(&reply, client_addr).await {
                    warn!(%client_addr, "Failed to deliver datagram to client: {}", e);
                    break;
                }
                activity.touch();
                session_activity.touch();
            }
        })
    }

    /// Drop mappings whose clients have gone quiet.
    fn sweep(&mut self) {
        let timeout = self.timeout;
        self.mappings.retain(|client_addr, mapping| {
            let idle = mapping.activity.idle_for();
            if idle > timeout {
                info!(
                    %client_addr,
                    "Closing UDP mapping: {}",
                    RelayError::IdleTimeout(idle)
                );
                return false;
            }
            true
        });
        debug!(total = self.mappings.len(), "UDP mapping sweep complete");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::lookup_cipher;

    async fn test_mapper(timeout: Duration) -> UdpRelayMapper {
        let spec = lookup_cipher("aes-128-ctr").unwrap();
        UdpRelayMapper::new(
            "127.0.0.1:9".parse().unwrap(),
            spec,
            "pw".to_string(),
            timeout,
            Duration::from_millis(10),
            4096,
            Arc::new(ActivityTracker::new()),
        )
        .await
        .unwrap()
    }

    fn client(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    #[tokio::test]
    async fn test_malformed_datagrams_ignored() {
        let mut mapper = test_mapper(Duration::from_secs(60)).await;

        // Shorter than the three-byte prefix.
        mapper
            .handle_client_datagram(&[0, 0], client(40001))
            .await
            .unwrap();
        // Fragment field set.
        mapper
            .handle_client_datagram(&[0, 0, 1, 0x01, 0x7f], client(40001))
            .await
            .unwrap();

        assert_eq!(mapper.mapping_count(), 0);
    }

    #[tokio::test]
    async fn test_mapping_keyed_by_client_address() {
        let mut mapper = test_mapper(Duration::from_secs(60)).await;
        let datagram = [0u8, 0, 0, 0x01, 127, 0, 0, 1, 0x00, 0x35, 0xaa];

        mapper
            .handle_client_datagram(&datagram, client(40002))
            .await
            .unwrap();
        mapper
            .handle_client_datagram(&datagram, client(40002))
            .await
            .unwrap();
        assert_eq!(mapper.mapping_count(), 1);

        mapper
            .handle_client_datagram(&datagram, client(40003))
            .await
            .unwrap();
        assert_eq!(mapper.mapping_count(), 2);
    }

    #[tokio::test]
    async fn test_sweep_reclaims_idle_mappings() {
        let mut mapper = test_mapper(Duration::from_millis(5)).await;
        let datagram = [0u8, 0, 0, 0x01, 10, 0, 0, 1, 0x1f, 0x90, 0x01];

        mapper
            .handle_client_datagram(&datagram, client(40004))
            .await
            .unwrap();
        assert_eq!(mapper.mapping_count(), 1);

        tokio::time::sleep(Duration::from_millis(25)).await;
        mapper.sweep();
        assert_eq!(mapper.mapping_count(), 0);
    }
}
