//! Minimal SeedLink v3 client: HELLO handshake, multi-station negotiation,
//! and 520-byte frame collection over a plain TCP stream.

use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader, BufWriter};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// miniSEED payload carried by every v3 data frame.
pub const RECORD_LEN: usize = 512;
/// "SL" signature plus a six-character sequence number.
const HEADER_LEN: usize = 8;

/// How long `collect` waits for traffic before reporting no packet.
const POLL: Duration = Duration::from_millis(500);

#[derive(Debug, Error)]
pub enum SeedLinkError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    #[error("unexpected response: {0:?}")]
    UnexpectedResponse(String),
    #[error("malformed frame header {0:?}")]
    BadFrame([u8; HEADER_LEN]),
    #[error("not connected")]
    NotConnected,
}

/// One frame off the wire.
#[derive(Debug, Clone)]
pub struct Packet {
    header: [u8; HEADER_LEN],
    payload: Vec<u8>,
}

impl Packet {
    /// Data frames carry miniSEED; INFO replies (keepalive responses) do not.
    pub fn is_data(&self) -> bool {
        !self.header.starts_with(b"SLINFO")
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }
}

/// Outcome of one collect call.
#[derive(Debug)]
pub enum Collect {
    Packet(Packet),
    /// Nothing arrived inside the poll window.
    NoPacket,
    /// The server closed the stream.
    Terminate,
}

#[derive(Debug, Clone)]
struct StreamEntry {
    network: String,
    station: String,
    selectors: Vec<String>,
}

pub struct SeedLink {
    addr: String,
    netdly: Duration,
    netto: Duration,
    keepalive: Duration,
    streams: Vec<StreamEntry>,
    reader: Option<BufReader<OwnedReadHalf>>,
    writer: Option<BufWriter<OwnedWriteHalf>>,
    last_receive: Instant,
    last_keepalive: Instant,
}

impl SeedLink {
    pub fn new(addr: &str) -> Self {
        Self {
            addr: addr.to_string(),
            netdly: Duration::ZERO,
            netto: Duration::from_secs(300),
            keepalive: Duration::ZERO,
            streams: Vec::new(),
            reader: None,
            writer: None,
            last_receive: Instant::now(),
            last_keepalive: Instant::now(),
        }
    }

    /// Delay applied before dialling the server.
    pub fn set_network_delay(&mut self, secs: u64) {
        self.netdly = Duration::from_secs(secs);
    }

    /// Idle window after which the connection is considered dead.
    pub fn set_network_timeout(&mut self, secs: u64) {
        self.netto = Duration::from_secs(secs);
    }

    /// Idle window after which an INFO probe is sent; 0 disables keepalives.
    pub fn set_keepalive(&mut self, secs: u64) {
        self.keepalive = Duration::from_secs(secs);
    }

    /// Parse a stream list such as `"NZ_WEL:HHZ HHN,IU_ANMO"` with
    /// `default_selectors` applying to entries that carry none. Wildcards are
    /// passed to the server untouched.
    pub fn parse_stream_list(
        &mut self,
        streams: &str,
        default_selectors: &str,
    ) -> Result<usize, SeedLinkError> {
        self.streams.clear();
        for entry in streams.split(',') {
            let entry = entry.trim();
            if entry.is_empty() {
                continue;
            }
            let (name, selectors) = match entry.split_once(':') {
                Some((name, list)) => (name, list),
                None => (entry, default_selectors),
            };
            let (network, station) = name.split_once('_').ok_or_else(|| {
                SeedLinkError::UnexpectedResponse(format!("bad stream entry {:?}", entry))
            })?;
            self.streams.push(StreamEntry {
                network: network.to_string(),
                station: station.to_string(),
                selectors: selectors.split_whitespace().map(str::to_string).collect(),
            });
        }
        if self.streams.is_empty() {
            return Err(SeedLinkError::UnexpectedResponse(format!(
                "no streams in {:?}",
                streams
            )));
        }
        Ok(self.streams.len())
    }

    /// Dial the server and perform the HELLO handshake.
    pub async fn connect(&mut self) -> Result<(), SeedLinkError> {
        if !self.netdly.is_zero() {
            tokio::time::sleep(self.netdly).await;
        }

        debug!(addr = %self.addr, "connecting");
        let deadline = self.read_timeout();
        let stream = timeout(deadline, TcpStream::connect(&self.addr))
            .await
            .map_err(|_| SeedLinkError::Timeout(deadline))??;
        stream.set_nodelay(true).ok();

        let (read_half, write_half) = stream.into_split();
        self.reader = Some(BufReader::new(read_half));
        self.writer = Some(BufWriter::new(write_half));
        self.last_receive = Instant::now();
        self.last_keepalive = Instant::now();

        self.command("HELLO").await?;
        let software = self.read_line().await?;
        let organization = self.read_line().await?;
        info!(
            software = software.trim(),
            organization = organization.trim(),
            "connected"
        );

        Ok(())
    }

    /// Negotiate every configured stream and switch the server to streaming.
    pub async fn start(&mut self) -> Result<(), SeedLinkError> {
        let streams = self.streams.clone();
        for entry in &streams {
            self.command(&format!("STATION {} {}", entry.station, entry.network))
                .await?;
            self.expect_ok().await?;
            for selector in &entry.selectors {
                self.command(&format!("SELECT {}", selector)).await?;
                self.expect_ok().await?;
            }
            self.command("DATA").await?;
            self.expect_ok().await?;
        }
        self.command("END").await?;
        Ok(())
    }

    /// Wait for the next frame. Returns NoPacket when the poll window lapses
    /// (sending a keepalive INFO probe if one is due), Terminate on a clean
    /// server close, and an error on malformed framing or a dead connection.
    pub async fn collect(&mut self) -> Result<Collect, SeedLinkError> {
        enum Probe {
            Idle,
            Eof,
            Ready,
        }

        let probe = {
            let reader = self.reader.as_mut().ok_or(SeedLinkError::NotConnected)?;
            match timeout(POLL, reader.fill_buf()).await {
                Err(_) => Probe::Idle,
                Ok(Ok(buffered)) if buffered.is_empty() => Probe::Eof,
                Ok(Ok(_)) => Probe::Ready,
                Ok(Err(e)) => return Err(e.into()),
            }
        };

        match probe {
            Probe::Idle => {
                if !self.netto.is_zero() && self.last_receive.elapsed() > self.netto {
                    return Err(SeedLinkError::Timeout(self.netto));
                }
                if !self.keepalive.is_zero() && self.last_keepalive.elapsed() > self.keepalive {
                    self.command("INFO ID").await?;
                    self.last_keepalive = Instant::now();
                }
                return Ok(Collect::NoPacket);
            }
            Probe::Eof => return Ok(Collect::Terminate),
            Probe::Ready => {}
        }

        let deadline = self.read_timeout();
        let reader = self.reader.as_mut().ok_or(SeedLinkError::NotConnected)?;

        let mut header = [0u8; HEADER_LEN];
        timeout(deadline, reader.read_exact(&mut header))
            .await
            .map_err(|_| SeedLinkError::Timeout(deadline))??;

        if &header[..2] != b"SL" {
            return Err(SeedLinkError::BadFrame(header));
        }

        let mut payload = vec![0u8; RECORD_LEN];
        timeout(deadline, reader.read_exact(&mut payload))
            .await
            .map_err(|_| SeedLinkError::Timeout(deadline))??;

        self.last_receive = Instant::now();
        Ok(Collect::Packet(Packet { header, payload }))
    }

    /// netto bounds every blocking read; 0 falls back to a generous default.
    fn read_timeout(&self) -> Duration {
        if self.netto.is_zero() {
            Duration::from_secs(300)
        } else {
            self.netto
        }
    }

    /// Say goodbye and drop the connection.
    pub async fn disconnect(&mut self) {
        if self.writer.is_some() {
            if let Err(e) = self.command("BYE").await {
                debug!(error = %e, "bye failed");
            }
        }
        if let Some(mut writer) = self.writer.take() {
            if let Err(e) = writer.shutdown().await {
                debug!(error = %e, "shutdown failed");
            }
        }
        self.reader = None;
    }

    async fn command(&mut self, cmd: &str) -> Result<(), SeedLinkError> {
        let writer = self.writer.as_mut().ok_or(SeedLinkError::NotConnected)?;
        debug!(%cmd, "sending");
        writer.write_all(cmd.as_bytes()).await?;
        writer.write_all(b"\r\n").await?;
        writer.flush().await?;
        Ok(())
    }

    async fn read_line(&mut self) -> Result<String, SeedLinkError> {
        let deadline = self.read_timeout();
        let reader = self.reader.as_mut().ok_or(SeedLinkError::NotConnected)?;
        let mut line = String::new();
        let n = timeout(deadline, reader.read_line(&mut line))
            .await
            .map_err(|_| SeedLinkError::Timeout(deadline))??;
        if n == 0 {
            return Err(SeedLinkError::UnexpectedResponse("connection closed".to_string()));
        }
        Ok(line)
    }

    async fn expect_ok(&mut self) -> Result<(), SeedLinkError> {
        let line = self.read_line().await?;
        match line.trim() {
            "OK" => Ok(()),
            other => {
                warn!(response = other, "negotiation refused");
                Err(SeedLinkError::UnexpectedResponse(other.to_string()))
            }
        }
    }
}
