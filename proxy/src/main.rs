// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// DNSCrypt Proxy — local DNS forwarder
//
// Accepts plain DNS queries on UDP and TCP, encrypts them for a DNSCrypt v2
// resolver, and returns the verified responses. Key material (client magic,
// shared key, client public key) comes from certificate discovery done
// elsewhere and is passed on the command line.
//
// UDP towards the resolver pads queries to the estimated minimum question
// size; a truncated answer grows the estimate and is retried over TCP with
// a fresh nonce.

use std::fs;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use base64::Engine;
use clap::Parser;
use dnscrypt_common::cipher::SharedKey;
use dnscrypt_common::crypto::{CLIENT_MAGIC_LEN, PUBLIC_KEY_SIZE, RESPONSE_OVERHEAD};
use dnscrypt_common::protocol::{self, has_tc_flag, MAX_DNS_PACKET_SIZE, MIN_DNS_PACKET_SIZE};
use dnscrypt_common::{
    AdaptiveSizeEstimator, ClientIdentity, QueryCipher, QuestionSizeEstimator, ServerKeyBundle,
    Transport, TransportHint,
};
use hickory_proto::op::Message;
use hickory_proto::serialize::binary::BinDecodable;
use rand::rngs::OsRng;
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tracing::{debug, error, info, warn};

#[derive(Parser)]
#[command(name = "dnscrypt-proxy", about = "Local DNS forwarder for a DNSCrypt v2 resolver")]
struct Args {
    /// Listen address for plain DNS (UDP and TCP)
    #[arg(long, default_value = "127.0.0.1:5353")]
    listen: String,

    /// DNSCrypt resolver address
    #[arg(long)]
    resolver: String,

    /// Client magic from the resolver certificate (base64, 8 bytes decoded)
    #[arg(long)]
    magic_query: String,

    /// Shared key for the resolver (base64, 32 bytes decoded)
    #[arg(long, conflicts_with = "shared_key_file")]
    shared_key: Option<String>,

    /// Path to file containing the shared key (raw bytes)
    #[arg(long, conflicts_with = "shared_key")]
    shared_key_file: Option<String>,

    /// Client public key (base64, 32 bytes decoded)
    #[arg(long)]
    client_public_key: String,

    /// Resolver exchange timeout (e.g. "5s", "2m")
    #[arg(long, default_value = "5s", value_parser = parse_duration)]
    timeout: Duration,

    /// Transport towards the resolver for UDP clients (udp or tcp)
    #[arg(long, default_value = "udp")]
    proto: Transport,
}

fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    if let Some(hours) = s.strip_suffix('h') {
        let h: u64 = hours.parse().map_err(|e| format!("invalid hours: {e}"))?;
        Ok(Duration::from_secs(h * 3600))
    } else if let Some(mins) = s.strip_suffix('m') {
        let m: u64 = mins.parse().map_err(|e| format!("invalid minutes: {e}"))?;
        Ok(Duration::from_secs(m * 60))
    } else if let Some(secs) = s.strip_suffix('s') {
        let s: u64 = secs.parse().map_err(|e| format!("invalid seconds: {e}"))?;
        Ok(Duration::from_secs(s))
    } else {
        let s: u64 = s.parse().map_err(|e| format!("invalid duration: {e}"))?;
        Ok(Duration::from_secs(s))
    }
}

/// One byte past the largest accepted query, so oversized datagrams are
/// seen whole and rejected instead of being cut down to size.
const UDP_RECV_BUFFER_SIZE: usize = MAX_DNS_PACKET_SIZE + 1;

/// Per-resolver session state shared by every client task.
struct Proxy {
    cipher: QueryCipher,
    server: ServerKeyBundle,
    client: ClientIdentity,
    estimator: AdaptiveSizeEstimator,
    resolver: String,
    proto: Transport,
    timeout: Duration,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let args = Args::parse();

    let server = ServerKeyBundle::new(
        decode_fixed::<CLIENT_MAGIC_LEN>("--magic-query", &args.magic_query)?,
        load_shared_key(&args)?,
    );
    let client = ClientIdentity::new(decode_fixed::<PUBLIC_KEY_SIZE>(
        "--client-public-key",
        &args.client_public_key,
    )?);
    info!("loaded resolver key material");

    let udp = Arc::new(UdpSocket::bind(&args.listen).await?);
    let tcp = TcpListener::bind(&args.listen).await?;
    info!(
        listen = %args.listen,
        resolver = %args.resolver,
        proto = %args.proto,
        timeout = ?args.timeout,
        "DNSCrypt proxy started"
    );

    let proxy = Arc::new(Proxy {
        cipher: QueryCipher::default(),
        server,
        client,
        estimator: AdaptiveSizeEstimator::new(),
        resolver: args.resolver,
        proto: args.proto,
        timeout: args.timeout,
    });

    tokio::spawn(tcp_accept_loop(tcp, Arc::clone(&proxy)));
    udp_loop(udp, proxy).await
}

async fn udp_loop(socket: Arc<UdpSocket>, proxy: Arc<Proxy>) -> anyhow::Result<()> {
    let mut buf = vec![0u8; UDP_RECV_BUFFER_SIZE];
    loop {
        let (len, peer) = match socket.recv_from(&mut buf).await {
            Ok(v) => v,
            Err(e) => {
                warn!(error = %e, "UDP receive failed");
                continue;
            }
        };

        let query = buf[..len].to_vec();
        let socket = Arc::clone(&socket);
        let proxy = Arc::clone(&proxy);

        tokio::spawn(async move {
            if let Err(e) = handle_datagram(&socket, &proxy, &query, peer).await {
                error!(error = %e, "UDP query failed");
            }
        });
    }
}

async fn handle_datagram(
    socket: &UdpSocket,
    proxy: &Proxy,
    query: &[u8],
    peer: SocketAddr,
) -> anyhow::Result<()> {
    let response = proxy.resolve(query, proxy.proto).await?;
    socket.send_to(&response, peer).await?;
    Ok(())
}

async fn tcp_accept_loop(listener: TcpListener, proxy: Arc<Proxy>) {
    loop {
        let (stream, _peer) = match listener.accept().await {
            Ok(v) => v,
            Err(e) => {
                warn!(error = %e, "accept failed");
                continue;
            }
        };

        let proxy = Arc::clone(&proxy);
        tokio::spawn(async move {
            if let Err(e) = handle_connection(stream, &proxy).await {
                error!(error = %e, "connection handler failed");
            }
        });
    }
}

async fn handle_connection(mut stream: TcpStream, proxy: &Proxy) -> anyhow::Result<()> {
    loop {
        let query = match protocol::read_framed(&mut stream).await {
            Ok(q) => q,
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(()),
            Err(e) => return Err(e.into()),
        };
        let response = proxy.resolve(&query, Transport::Tcp).await?;
        protocol::write_framed(&mut stream, &response).await?;
    }
}

impl Proxy {
    /// Resolve one plain DNS query through the DNSCrypt resolver.
    async fn resolve(&self, query: &[u8], proto: Transport) -> anyhow::Result<Vec<u8>> {
        if !(MIN_DNS_PACKET_SIZE..=MAX_DNS_PACKET_SIZE).contains(&query.len()) {
            anyhow::bail!("query size out of range: {} bytes", query.len());
        }
        log_query(query);

        if proto == Transport::Tcp {
            return self.exchange_tcp(query).await;
        }

        let (response, frame_len) = self.exchange_udp(query).await?;
        if has_tc_flag(&response) {
            self.estimator.blind_adjust();
            debug!(
                min_question_size = self.estimator.min_question_size(),
                "truncated response, retrying over TCP"
            );
            return self.exchange_tcp(query).await;
        }
        self.estimator.adjust(frame_len);
        Ok(response)
    }

    async fn exchange_udp(&self, query: &[u8]) -> anyhow::Result<(Vec<u8>, usize)> {
        let encrypted = self.cipher.encrypt(
            &mut OsRng,
            &self.server,
            &self.client,
            TransportHint::Udp(&self.estimator),
            query,
        )?;

        let resolver = tokio::net::lookup_host(&self.resolver)
            .await?
            .next()
            .with_context(|| format!("cannot resolve {}", self.resolver))?;
        let bind = if resolver.is_ipv4() { "0.0.0.0:0" } else { "[::]:0" };
        let socket = UdpSocket::bind(bind).await?;
        socket.connect(resolver).await?;
        socket.send(&encrypted.frame).await?;

        let mut buf = vec![0u8; RESPONSE_OVERHEAD + MAX_DNS_PACKET_SIZE + 1];
        let len = match tokio::time::timeout(self.timeout, socket.recv(&mut buf)).await {
            Ok(received) => received?,
            Err(_) => {
                self.estimator.blind_adjust();
                anyhow::bail!("resolver timeout (UDP)");
            }
        };
        buf.truncate(len);

        let response = self
            .cipher
            .decrypt(&self.server, &buf, &encrypted.client_nonce)?;
        Ok((response, len))
    }

    async fn exchange_tcp(&self, query: &[u8]) -> anyhow::Result<Vec<u8>> {
        let encrypted = self.cipher.encrypt(
            &mut OsRng,
            &self.server,
            &self.client,
            TransportHint::Tcp,
            query,
        )?;

        let frame = tokio::time::timeout(self.timeout, async {
            let mut stream = TcpStream::connect(&self.resolver).await?;
            protocol::write_framed(&mut stream, &encrypted.frame).await?;
            protocol::read_framed(&mut stream).await
        })
        .await
        .map_err(|_| anyhow::anyhow!("resolver timeout (TCP)"))??;

        Ok(self
            .cipher
            .decrypt(&self.server, &frame, &encrypted.client_nonce)?)
    }
}

fn log_query(query: &[u8]) {
    if let Ok(msg) = Message::from_bytes(query) {
        for q in msg.queries() {
            debug!(name = %q.name(), qtype = ?q.query_type(), "query");
        }
    }
}

fn decode_fixed<const N: usize>(flag: &str, b64: &str) -> anyhow::Result<[u8; N]> {
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(b64.trim())
        .with_context(|| format!("{flag} is not valid base64"))?;
    <[u8; N]>::try_from(bytes.as_slice())
        .map_err(|_| anyhow::anyhow!("{flag} must decode to {N} bytes, got {}", bytes.len()))
}

fn load_shared_key(args: &Args) -> anyhow::Result<SharedKey> {
    let bytes = if let Some(ref b64) = args.shared_key {
        base64::engine::general_purpose::STANDARD.decode(b64.trim())?
    } else if let Some(ref path) = args.shared_key_file {
        fs::read(path)?
    } else {
        anyhow::bail!("provide --shared-key (base64) or --shared-key-file (raw bytes)");
    };

    SharedKey::from_slice(&bytes)
        .ok_or_else(|| anyhow::anyhow!("shared key must be 32 bytes, got {}", bytes.len()))
}
