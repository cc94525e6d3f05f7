/// Pooled admin connections.
///
/// Destinations are `(host, port, protocol)` triples; the protocol tag
/// keeps control-plane traffic off data-plane connections to the same
/// address. One bb8 pool is kept per destination, created lazily. A
/// connection that saw an I/O failure is marked bad and the pool discards
/// it at check-in instead of reusing it.
use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, error};
use parking_lot::Mutex;
use prost::Message;
use tokio::io::{AsyncWriteExt, BufReader, BufWriter};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::time::timeout;

use crate::config::AdminConfig;
use crate::errors::Error;
use crate::messages;

/// Wire protocol spoken on a pooled connection. Tags with different values
/// never share sockets, even to the same address.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum WireProtocol {
    AdminProtoBuf,
    ClientProtoBuf,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Destination {
    pub host: String,
    pub port: u16,
    pub protocol: WireProtocol,
}

impl Destination {
    pub fn admin(host: &str, port: u16) -> Destination {
        Destination {
            host: host.to_string(),
            port,
            protocol: WireProtocol::AdminProtoBuf,
        }
    }
}

/// Snapshot of one destination's pool.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PoolStatus {
    pub connections: u32,
    pub idle: u32,
}

/// One admin socket with buffered halves. Any failed or timed-out I/O marks
/// the connection bad; the pool then closes it instead of reusing it.
pub struct Connection {
    read: BufReader<OwnedReadHalf>,
    write: BufWriter<OwnedWriteHalf>,
    socket_timeout: Duration,
    bad: bool,
}

impl Connection {
    /// Write one varint-framed message into the send buffer. Does not flush.
    pub async fn send<M>(&mut self, message: &M) -> Result<(), Error>
    where
        M: Message,
    {
        match timeout(
            self.socket_timeout,
            messages::write_message(&mut self.write, message),
        )
        .await
        {
            Ok(Ok(())) => Ok(()),
            Ok(Err(err)) => {
                self.bad = true;
                Err(err)
            }
            Err(_) => {
                self.bad = true;
                Err(Error::SocketTimeout)
            }
        }
    }

    /// Write the end-of-stream sentinel into the send buffer.
    pub async fn send_end_of_stream(&mut self) -> Result<(), Error> {
        match timeout(
            self.socket_timeout,
            messages::write_end_of_stream(&mut self.write),
        )
        .await
        {
            Ok(Ok(())) => Ok(()),
            Ok(Err(err)) => {
                self.bad = true;
                Err(err)
            }
            Err(_) => {
                self.bad = true;
                Err(Error::SocketTimeout)
            }
        }
    }

    pub async fn flush(&mut self) -> Result<(), Error> {
        match timeout(self.socket_timeout, self.write.flush()).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(err)) => {
                self.bad = true;
                Err(Error::Socket(err.to_string()))
            }
            Err(_) => {
                self.bad = true;
                Err(Error::SocketTimeout)
            }
        }
    }

    /// Read one varint-framed message.
    pub async fn receive<M>(&mut self) -> Result<M, Error>
    where
        M: Message + Default,
    {
        match timeout(self.socket_timeout, messages::read_message(&mut self.read)).await {
            Ok(Ok(message)) => Ok(message),
            Ok(Err(err)) => {
                self.bad = true;
                Err(err)
            }
            Err(_) => {
                self.bad = true;
                Err(Error::SocketTimeout)
            }
        }
    }

    /// Read one i32-framed download record, `None` at the sentinel.
    pub async fn read_stream_frame<M>(&mut self) -> Result<Option<M>, Error>
    where
        M: Message + Default,
    {
        match timeout(
            self.socket_timeout,
            messages::read_stream_frame(&mut self.read),
        )
        .await
        {
            Ok(Ok(frame)) => Ok(frame),
            Ok(Err(err)) => {
                self.bad = true;
                Err(err)
            }
            Err(_) => {
                self.bad = true;
                Err(Error::SocketTimeout)
            }
        }
    }

    /// Condemn the socket; the pool closes it at check-in.
    pub fn mark_bad(&mut self) {
        self.bad = true;
    }

    pub fn is_bad(&self) -> bool {
        self.bad
    }
}

pub struct SocketManager {
    destination: Destination,
    config: AdminConfig,
}

#[async_trait]
impl bb8::ManageConnection for SocketManager {
    type Connection = Connection;
    type Error = Error;

    async fn connect(&self) -> Result<Connection, Error> {
        let address = format!("{}:{}", self.destination.host, self.destination.port);
        let connect_timeout = Duration::from_millis(self.config.connection_timeout_ms);

        let stream = match timeout(connect_timeout, TcpStream::connect(&address)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(err)) => {
                error!("Could not connect to {}: {}", address, err);
                return Err(Error::Socket(err.to_string()));
            }
            Err(_) => {
                error!("Connect to {} timed out", address);
                return Err(Error::ConnectTimeout);
            }
        };

        configure_socket(&stream, &self.config)?;

        debug!("Opened admin connection to {}", address);

        let (read_half, write_half) = stream.into_split();

        Ok(Connection {
            read: BufReader::with_capacity(self.config.socket_buffer_size, read_half),
            write: BufWriter::with_capacity(self.config.socket_buffer_size, write_half),
            socket_timeout: Duration::from_millis(self.config.socket_timeout_ms),
            bad: false,
        })
    }

    async fn is_valid(&self, conn: &mut Connection) -> Result<(), Error> {
        if conn.is_bad() {
            return Err(Error::Socket("connection is condemned".to_string()));
        }

        Ok(())
    }

    fn has_broken(&self, conn: &mut Connection) -> bool {
        conn.is_bad()
    }
}

fn configure_socket(stream: &TcpStream, config: &AdminConfig) -> Result<(), Error> {
    if let Err(err) = stream.set_nodelay(true) {
        return Err(Error::Socket(err.to_string()));
    }

    let sock = socket2::SockRef::from(stream);

    if let Err(err) = sock.set_keepalive(config.socket_keepalive) {
        return Err(Error::Socket(err.to_string()));
    }

    if let Err(err) = sock.set_recv_buffer_size(config.socket_buffer_size) {
        return Err(Error::Socket(err.to_string()));
    }

    if let Err(err) = sock.set_send_buffer_size(config.socket_buffer_size) {
        return Err(Error::Socket(err.to_string()));
    }

    Ok(())
}

/// Checked-out connection. Dropping it is the check-in.
pub type PooledSocket = bb8::PooledConnection<'static, SocketManager>;

pub struct SocketPool {
    config: AdminConfig,
    pools: Mutex<HashMap<Destination, bb8::Pool<SocketManager>>>,
}

impl SocketPool {
    pub fn new(config: AdminConfig) -> SocketPool {
        SocketPool {
            config,
            pools: Mutex::new(HashMap::new()),
        }
    }

    /// Borrow a connection to a destination, waiting at most the configured
    /// connection timeout for a free slot.
    pub async fn checkout(&self, destination: &Destination) -> Result<PooledSocket, Error> {
        let pool = self.pool_for(destination);

        match pool.get_owned().await {
            Ok(conn) => Ok(conn),
            Err(bb8::RunError::User(err)) => Err(err),
            Err(bb8::RunError::TimedOut) => Err(Error::CheckoutTimeout),
        }
    }

    pub fn status(&self, destination: &Destination) -> PoolStatus {
        let pools = self.pools.lock();

        match pools.get(destination) {
            Some(pool) => {
                let state = pool.state();

                PoolStatus {
                    connections: state.connections,
                    idle: state.idle_connections,
                }
            }
            None => PoolStatus {
                connections: 0,
                idle: 0,
            },
        }
    }

    /// Drop every per-destination pool and with them all idle sockets.
    /// Outstanding checkouts close when their guards drop.
    pub fn close(&self) {
        self.pools.lock().clear();
    }

    fn pool_for(&self, destination: &Destination) -> bb8::Pool<SocketManager> {
        let mut pools = self.pools.lock();

        pools
            .entry(destination.clone())
            .or_insert_with(|| {
                bb8::Pool::builder()
                    .max_size(self.config.max_connections_per_node)
                    .connection_timeout(Duration::from_millis(self.config.connection_timeout_ms))
                    .build_unchecked(SocketManager {
                        destination: destination.clone(),
                        config: self.config.clone(),
                    })
            })
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    async fn silent_listener() -> (TcpListener, u16) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        (listener, port)
    }

    #[tokio::test]
    async fn checkout_and_checkin_balance() {
        let (listener, port) = silent_listener().await;
        tokio::spawn(async move {
            loop {
                let _ = listener.accept().await;
            }
        });

        let pool = SocketPool::new(AdminConfig::default());
        let destination = Destination::admin("127.0.0.1", port);

        let conn = pool.checkout(&destination).await.unwrap();
        assert_eq!(pool.status(&destination).connections, 1);
        assert_eq!(pool.status(&destination).idle, 0);

        drop(conn);
        assert_eq!(pool.status(&destination).idle, 1);
    }

    #[tokio::test]
    async fn bad_connection_is_discarded_at_checkin() {
        let (listener, port) = silent_listener().await;
        tokio::spawn(async move {
            loop {
                let _ = listener.accept().await;
            }
        });

        let pool = SocketPool::new(AdminConfig::default());
        let destination = Destination::admin("127.0.0.1", port);

        let mut conn = pool.checkout(&destination).await.unwrap();
        conn.mark_bad();
        drop(conn);

        let status = pool.status(&destination);
        assert_eq!(status.idle, 0);
    }

    #[tokio::test]
    async fn connect_failure_surfaces_as_transport_error() {
        let (listener, port) = silent_listener().await;
        drop(listener);

        let mut config = AdminConfig::default();
        config.connection_timeout_ms = 500;

        let pool = SocketPool::new(config);
        let destination = Destination::admin("127.0.0.1", port);

        let result = pool.checkout(&destination).await;
        assert!(result.is_err());
    }

    #[test]
    fn protocol_tag_separates_destinations() {
        let admin = Destination::admin("h", 1);
        let client = Destination {
            host: "h".to_string(),
            port: 1,
            protocol: WireProtocol::ClientProtoBuf,
        };

        assert_ne!(admin, client);
    }
}
