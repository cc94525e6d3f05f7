/// The admin client.
///
/// One instance serves a whole cluster. Every operation is synchronous from
/// the caller's point of view: build a typed request, borrow a connection
/// to the target node's admin port, ship one frame, interpret the reply.
/// Concurrent callers are served by distinct pool entries up to the
/// per-node cap; no lock is held across I/O.
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use log::{debug, info, warn};
use once_cell::sync::Lazy;
use regex::Regex;
use tokio::time::{sleep, Instant};

use crate::cluster::Cluster;
use crate::config::AdminConfig;
use crate::errors::Error;
use crate::filter::{encode_filter, StreamFilter};
use crate::metadata::{self, ServerState, StoreDefinition};
use crate::pool::{Connection, Destination, PooledSocket, PoolStatus, SocketPool};
use crate::proto::{self, AdminRequest, AdminRequestType, AdminResponse};
use crate::stream::{FetchEntriesStream, FetchKeysStream};
use crate::versioning::{VectorClock, Versioned};

const INITIAL_POLL_DELAY: Duration = Duration::from_millis(250);
const MAX_POLL_DELAY: Duration = Duration::from_millis(60_000);

static BOOTSTRAP_URL: Lazy<Regex> = Lazy::new(|| Regex::new(r"^tcp://([^:/]+):(\d+)/?$").unwrap());

/// Where a server-side background operation stands.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AsyncStatus {
    pub request_id: i32,
    pub description: String,
    pub status: String,
    pub complete: bool,
}

pub struct AdminClient {
    cluster: ArcSwap<Cluster>,
    pool: SocketPool,
    config: AdminConfig,
}

impl AdminClient {
    /// Client over a caller-supplied cluster descriptor.
    pub fn with_cluster(cluster: Cluster, config: AdminConfig) -> AdminClient {
        info!(
            "Admin client over cluster {:?} ({} nodes)",
            cluster.name(),
            cluster.nodes().len()
        );

        AdminClient {
            cluster: ArcSwap::from_pointee(cluster),
            pool: SocketPool::new(config.clone()),
            config,
        }
    }

    /// Client bootstrapped from `config.bootstrap_urls`: the cluster
    /// descriptor is fetched over a transient connection which is gone by
    /// the time this returns.
    pub async fn from_bootstrap(config: AdminConfig) -> Result<AdminClient, Error> {
        let cluster = bootstrap_cluster(&config).await?;

        Ok(AdminClient::with_cluster(cluster, config))
    }

    /// Current cluster snapshot.
    pub fn cluster(&self) -> Arc<Cluster> {
        self.cluster.load_full()
    }

    /// Swap in a new cluster snapshot. Concurrent readers observe the old
    /// or the new descriptor, never a torn one.
    pub fn set_cluster(&self, cluster: Cluster) {
        self.cluster.store(Arc::new(cluster));
    }

    pub fn config(&self) -> &AdminConfig {
        &self.config
    }

    /// Pool counters for a node's admin destination.
    pub fn pool_status(&self, node_id: i32) -> Result<PoolStatus, Error> {
        let destination = self.admin_destination(node_id)?;

        Ok(self.pool.status(&destination))
    }

    /// Shut the client down. In-flight streams must be drained or closed
    /// first; their sockets are closed when their handles drop.
    pub fn close(&self) {
        info!("Shutting down admin client");
        self.pool.close();
    }

    /// Stream entries into a store on one node. The filter, if any, rides
    /// in the first frame only and applies to the whole stream. Entries
    /// reach the server in producer order.
    pub async fn update_entries<I>(
        &self,
        node_id: i32,
        store: &str,
        entries: I,
        filter: Option<&dyn StreamFilter>,
    ) -> Result<(), Error>
    where
        I: IntoIterator<Item = (Vec<u8>, Versioned<Vec<u8>>)>,
    {
        // Encode up front so an unencodable filter never costs a socket.
        let filter = match filter {
            Some(filter) => Some(encode_filter(filter)?),
            None => None,
        };

        let destination = self.admin_destination(node_id)?;
        let mut conn = self.pool.checkout(&destination).await?;

        let mut entries = entries.into_iter();
        let first = entries.next();
        let mut sent: u64 = first.is_some() as u64;

        let envelope = AdminRequest {
            update_partition_entries: Some(proto::UpdatePartitionEntriesRequest {
                store: store.to_string(),
                partition_entry: first.map(into_proto_entry),
                filter,
            }),
            ..AdminRequest::of_type(AdminRequestType::UpdatePartitionEntries)
        };

        conn.send(&envelope).await?;
        conn.flush().await?;

        // Bare records ride the send buffer; only the terminator flushes.
        for entry in entries {
            let record = proto::UpdatePartitionEntriesRequest {
                store: store.to_string(),
                partition_entry: Some(into_proto_entry(entry)),
                filter: None,
            };

            conn.send(&record).await?;
            sent += 1;
        }

        conn.send_end_of_stream().await?;
        conn.flush().await?;

        let response: proto::UpdatePartitionEntriesResponse = conn.receive().await?;

        if let Some(err) = response.error {
            return Err(Error::from_server(err.error_code, &err.error_message));
        }

        debug!(
            "Streamed {} entries into {:?} on node {}",
            sent, store, node_id
        );

        Ok(())
    }

    /// Stream `(key, versioned value)` pairs out of the given partitions.
    /// The returned stream is single-shot and owns a pooled connection; see
    /// `FetchEntriesStream` for the drain/close discipline.
    pub async fn fetch_entries(
        &self,
        node_id: i32,
        store: &str,
        partitions: &[i32],
        filter: Option<&dyn StreamFilter>,
    ) -> Result<FetchEntriesStream, Error> {
        let conn = self
            .start_fetch(node_id, store, partitions, filter, true)
            .await?;

        Ok(FetchEntriesStream::new(conn))
    }

    /// Like `fetch_entries`, but the server sends keys only.
    pub async fn fetch_keys(
        &self,
        node_id: i32,
        store: &str,
        partitions: &[i32],
        filter: Option<&dyn StreamFilter>,
    ) -> Result<FetchKeysStream, Error> {
        let conn = self
            .start_fetch(node_id, store, partitions, filter, false)
            .await?;

        Ok(FetchKeysStream::new(conn))
    }

    /// Delete everything in the given partitions of a store. Returns the
    /// number of entries the server dropped.
    pub async fn delete_partitions(
        &self,
        node_id: i32,
        store: &str,
        partitions: &[i32],
        filter: Option<&dyn StreamFilter>,
    ) -> Result<u64, Error> {
        let filter = match filter {
            Some(filter) => Some(encode_filter(filter)?),
            None => None,
        };

        let request = AdminRequest {
            delete_partition_entries: Some(proto::DeletePartitionEntriesRequest {
                store: store.to_string(),
                partitions: partitions.to_vec(),
                filter,
            }),
            ..AdminRequest::of_type(AdminRequestType::DeletePartitionEntries)
        };

        let response: proto::DeletePartitionEntriesResponse =
            self.send_and_receive(node_id, &request).await?;

        Ok(response.count.unwrap_or(0).max(0) as u64)
    }

    /// Ask the stealer node to pull partitions from the donor in the
    /// background. Only the stealer is contacted; the returned request id
    /// tracks the operation there.
    pub async fn migrate_partitions(
        &self,
        donor_id: i32,
        stealer_id: i32,
        store: &str,
        partitions: &[i32],
        filter: Option<&dyn StreamFilter>,
    ) -> Result<i32, Error> {
        let filter = match filter {
            Some(filter) => Some(encode_filter(filter)?),
            None => None,
        };

        let request = AdminRequest {
            initiate_fetch_and_update: Some(proto::InitiateFetchAndUpdateRequest {
                node_id: donor_id,
                partitions: partitions.to_vec(),
                store: store.to_string(),
                filter,
            }),
            ..AdminRequest::of_type(AdminRequestType::InitiateFetchAndUpdate)
        };

        let response: proto::AsyncOperationStatusResponse =
            self.send_and_receive(stealer_id, &request).await?;

        let request_id = response
            .request_id
            .ok_or_else(|| Error::Protocol("migration reply carries no request id".to_string()))?;

        info!(
            "Migrating partitions {:?} of {:?} from node {} to node {} as request {}",
            partitions, store, donor_id, stealer_id, request_id
        );

        Ok(request_id)
    }

    /// One status poll. The server reaps a completed operation when it
    /// answers this, so a repeat query for the same id may come back as a
    /// not-found server error.
    pub async fn async_request_status(
        &self,
        node_id: i32,
        request_id: i32,
    ) -> Result<AsyncStatus, Error> {
        let request = AdminRequest {
            async_operation_status: Some(proto::AsyncOperationStatusRequest { request_id }),
            ..AdminRequest::of_type(AdminRequestType::AsyncOperationStatus)
        };

        let response: proto::AsyncOperationStatusResponse =
            self.send_and_receive(node_id, &request).await?;

        Ok(AsyncStatus {
            request_id: response.request_id.unwrap_or(request_id),
            description: response.description.unwrap_or_default(),
            status: response.status.unwrap_or_default(),
            complete: response.complete.unwrap_or(false),
        })
    }

    /// Poll an operation until it completes or `max_wait` elapses. The
    /// delay starts at 250 ms and quadruples after every poll up to the
    /// 60 s cap; the deliberate factor of four reaches deep backoff after
    /// three polls and keeps poll storms off busy nodes.
    pub async fn wait_for_completion(
        &self,
        node_id: i32,
        request_id: i32,
        max_wait: Duration,
    ) -> Result<AsyncStatus, Error> {
        let wait_until = Instant::now() + max_wait;
        let mut delay = INITIAL_POLL_DELAY;

        while Instant::now() < wait_until {
            let status = self.async_request_status(node_id, request_id).await?;

            debug!(
                "Operation {} on node {}: {:?} (complete: {})",
                request_id, node_id, status.status, status.complete
            );

            if status.complete {
                return Ok(status);
            }

            sleep(delay).await;
            delay = next_poll_delay(delay);
        }

        Err(Error::AsyncWaitTimeout {
            request_id,
            max_wait_ms: max_wait.as_millis() as u64,
        })
    }

    /// Raw metadata read: the node's current versioned value for a key.
    pub async fn get_remote_metadata(
        &self,
        node_id: i32,
        key: &str,
    ) -> Result<Versioned<Vec<u8>>, Error> {
        let destination = self.admin_destination(node_id)?;
        let mut conn = self.pool.checkout(&destination).await?;

        fetch_metadata(&mut conn, key).await
    }

    /// Raw metadata write under a caller-supplied clock. The clock must be
    /// strictly after the one last observed from this node for this key;
    /// the typed wrappers take care of that.
    pub async fn update_remote_metadata(
        &self,
        node_id: i32,
        key: &str,
        versioned: &Versioned<Vec<u8>>,
    ) -> Result<(), Error> {
        let request = AdminRequest {
            update_metadata: Some(proto::UpdateMetadataRequest {
                key: key.as_bytes().to_vec(),
                versioned: Some(versioned.to_proto()),
            }),
            ..AdminRequest::of_type(AdminRequestType::UpdateMetadata)
        };

        let _: proto::UpdateMetadataResponse = self.send_and_receive(node_id, &request).await?;

        Ok(())
    }

    pub async fn get_remote_cluster(&self, node_id: i32) -> Result<Versioned<Cluster>, Error> {
        let versioned = self
            .get_remote_metadata(node_id, metadata::CLUSTER_KEY)
            .await?
            .into_utf8()?;

        Ok(Versioned::new(
            Cluster::from_xml(&versioned.value)?,
            versioned.version,
        ))
    }

    /// Replace one node's cluster descriptor. Read-modify-write: the
    /// node's current clock is fetched, its own slot bumped by one, and
    /// the new descriptor written under the bumped clock. Returns the
    /// clock written. Last-writer-wins against concurrent admin callers.
    pub async fn update_remote_cluster(
        &self,
        node_id: i32,
        cluster: &Cluster,
    ) -> Result<VectorClock, Error> {
        self.update_metadata_rmw(node_id, metadata::CLUSTER_KEY, cluster.to_xml().into_bytes())
            .await
    }

    pub async fn get_remote_store_defs(
        &self,
        node_id: i32,
    ) -> Result<Versioned<Vec<StoreDefinition>>, Error> {
        let versioned = self
            .get_remote_metadata(node_id, metadata::STORES_KEY)
            .await?
            .into_utf8()?;

        Ok(Versioned::new(
            metadata::stores_from_xml(&versioned.value)?,
            versioned.version,
        ))
    }

    /// Replace one node's store-definition list; same read-modify-write
    /// protocol as `update_remote_cluster`.
    pub async fn update_remote_store_defs(
        &self,
        node_id: i32,
        stores: &[StoreDefinition],
    ) -> Result<VectorClock, Error> {
        self.update_metadata_rmw(
            node_id,
            metadata::STORES_KEY,
            metadata::stores_to_xml(stores).into_bytes(),
        )
        .await
    }

    pub async fn get_remote_server_state(
        &self,
        node_id: i32,
    ) -> Result<Versioned<ServerState>, Error> {
        let versioned = self
            .get_remote_metadata(node_id, metadata::SERVER_STATE_KEY)
            .await?
            .into_utf8()?;

        Ok(Versioned::new(
            versioned.value.parse::<ServerState>()?,
            versioned.version,
        ))
    }

    /// Move one node between server states; same read-modify-write
    /// protocol as `update_remote_cluster`.
    pub async fn update_remote_server_state(
        &self,
        node_id: i32,
        state: ServerState,
    ) -> Result<VectorClock, Error> {
        self.update_metadata_rmw(
            node_id,
            metadata::SERVER_STATE_KEY,
            state.to_string().into_bytes(),
        )
        .await
    }

    async fn update_metadata_rmw(
        &self,
        node_id: i32,
        key: &str,
        value: Vec<u8>,
    ) -> Result<VectorClock, Error> {
        let current = self.get_remote_metadata(node_id, key).await?;
        let clock = current.version.incremented(node_id);

        self.update_remote_metadata(node_id, key, &Versioned::new(value, clock.clone()))
            .await?;

        Ok(clock)
    }

    async fn send_and_receive<R>(&self, node_id: i32, request: &AdminRequest) -> Result<R, Error>
    where
        R: AdminResponse,
    {
        let destination = self.admin_destination(node_id)?;
        let mut conn = self.pool.checkout(&destination).await?;

        exchange(&mut conn, request).await
    }

    async fn start_fetch(
        &self,
        node_id: i32,
        store: &str,
        partitions: &[i32],
        filter: Option<&dyn StreamFilter>,
        fetch_values: bool,
    ) -> Result<PooledSocket, Error> {
        let filter = match filter {
            Some(filter) => Some(encode_filter(filter)?),
            None => None,
        };

        let destination = self.admin_destination(node_id)?;
        let mut conn = self.pool.checkout(&destination).await?;

        let request = AdminRequest {
            fetch_partition_entries: Some(proto::FetchPartitionEntriesRequest {
                partitions: partitions.to_vec(),
                store: store.to_string(),
                filter,
                fetch_values: Some(fetch_values),
            }),
            ..AdminRequest::of_type(AdminRequestType::FetchPartitionEntries)
        };

        conn.send(&request).await?;
        conn.flush().await?;

        Ok(conn)
    }

    fn admin_destination(&self, node_id: i32) -> Result<Destination, Error> {
        let cluster = self.cluster.load();
        let node = cluster.node(node_id)?;

        Ok(Destination::admin(&node.host, node.admin_port))
    }
}

/// One framed request, one framed response, mapped error. A transport
/// failure condemns the connection; a server-reported error does not, the
/// frame boundary is intact.
async fn exchange<R>(conn: &mut Connection, request: &AdminRequest) -> Result<R, Error>
where
    R: AdminResponse,
{
    conn.send(request).await?;
    conn.flush().await?;

    let response: R = conn.receive().await?;

    if let Some(err) = response.error() {
        return Err(Error::from_server(err.error_code, &err.error_message));
    }

    Ok(response)
}

async fn fetch_metadata(conn: &mut Connection, key: &str) -> Result<Versioned<Vec<u8>>, Error> {
    let request = AdminRequest {
        get_metadata: Some(proto::GetMetadataRequest {
            key: key.as_bytes().to_vec(),
        }),
        ..AdminRequest::of_type(AdminRequestType::GetMetadata)
    };

    let response: proto::GetMetadataResponse = exchange(conn, &request).await?;

    let versioned = response
        .version
        .ok_or_else(|| Error::Protocol("metadata response carries no value".to_string()))?;

    Ok(Versioned::from_proto(versioned))
}

async fn bootstrap_cluster(config: &AdminConfig) -> Result<Cluster, Error> {
    if config.bootstrap_urls.is_empty() {
        return Err(Error::Bootstrap("no bootstrap urls configured".to_string()));
    }

    // Transient pool; gone as soon as a descriptor is in hand.
    let pool = SocketPool::new(config.clone());

    for url in &config.bootstrap_urls {
        let destination = match parse_bootstrap_url(url) {
            Ok(destination) => destination,
            Err(err) => return Err(err),
        };

        let mut conn = match pool.checkout(&destination).await {
            Ok(conn) => conn,
            Err(err) => {
                warn!("Bootstrap via {} failed: {}", url, err);
                continue;
            }
        };

        match fetch_metadata(&mut conn, metadata::CLUSTER_KEY).await {
            Ok(versioned) => {
                drop(conn);
                pool.close();

                let xml = String::from_utf8(versioned.value)
                    .map_err(|_| Error::InvalidMetadata("cluster.xml is not UTF-8".to_string()))?;
                let cluster = Cluster::from_xml(&xml)?;

                info!("Bootstrapped cluster {:?} via {}", cluster.name(), url);

                return Ok(cluster);
            }
            Err(err) => {
                warn!("Bootstrap via {} failed: {}", url, err);
            }
        }
    }

    Err(Error::Bootstrap(
        "no bootstrap url returned a cluster descriptor".to_string(),
    ))
}

fn parse_bootstrap_url(url: &str) -> Result<Destination, Error> {
    let captures = BOOTSTRAP_URL
        .captures(url)
        .ok_or_else(|| Error::Bootstrap(format!("malformed bootstrap url {:?}", url)))?;

    let port = captures[2]
        .parse::<u16>()
        .map_err(|_| Error::Bootstrap(format!("bad port in bootstrap url {:?}", url)))?;

    Ok(Destination::admin(&captures[1], port))
}

fn into_proto_entry((key, versioned): (Vec<u8>, Versioned<Vec<u8>>)) -> proto::PartitionEntry {
    proto::PartitionEntry {
        key,
        versioned: Some(versioned.to_proto()),
    }
}

fn next_poll_delay(delay: Duration) -> Duration {
    if delay < MAX_POLL_DELAY {
        MAX_POLL_DELAY.min(delay * 4)
    } else {
        delay
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::WireProtocol;

    #[test]
    fn poll_delay_quadruples_up_to_the_cap() {
        let mut delay = INITIAL_POLL_DELAY;
        let mut schedule = vec![delay.as_millis() as u64];

        for _ in 0..6 {
            delay = next_poll_delay(delay);
            schedule.push(delay.as_millis() as u64);
        }

        assert_eq!(schedule, vec![250, 1000, 4000, 16_000, 60_000, 60_000, 60_000]);
    }

    #[test]
    fn bootstrap_urls_parse_to_admin_destinations() {
        let destination = parse_bootstrap_url("tcp://admin.example:6667").unwrap();

        assert_eq!(destination.host, "admin.example");
        assert_eq!(destination.port, 6667);
        assert_eq!(destination.protocol, WireProtocol::AdminProtoBuf);

        assert!(parse_bootstrap_url("http://admin.example:6667").is_err());
        assert!(parse_bootstrap_url("tcp://admin.example").is_err());
        assert!(parse_bootstrap_url("tcp://admin.example:99999").is_err());
    }
}
