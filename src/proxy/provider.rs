//! Routing provider: how the proxy learns cluster topology.
//!
//! The discovery mechanism is abstracted behind [`RoutingProvider`] so the
//! monitor and routing cache never care where tables come from. The
//! production implementation, [`BoltRoutingProvider`], speaks Bolt to the
//! backend itself: handshake, HELLO with the proxy's own credentials, then
//! ROUTE queries whose SUCCESS metadata carries the routing table.

use std::collections::HashMap;
use std::time::Duration;

use bytes::{BufMut, BytesMut};
use futures::future::BoxFuture;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::debug;

use crate::bolt::message::{frame_structure, BoltFrame, BoltTag};
use crate::bolt::packstream::{message_map, PackStreamValue};
use crate::bolt::{BoltVersion, HANDSHAKE_RESPONSE_SIZE};

use super::config::BackendUri;
use super::error::{ProxyError, ProxyResult};
use super::routing::{ClusterInfo, RoutingTable};
use super::transport::{read_frame, BackendConnector, BoxedIo};

/// The system database, whose routing table spans the whole cluster.
pub const SYSTEM_DB: &str = "system";

/// Fallback default database name when the backend does not report one.
pub const FALLBACK_DEFAULT_DB: &str = "zeta4g";

/// Fallback TTL when the backend omits one.
pub const FALLBACK_TTL: Duration = Duration::from_secs(300);

/// User agent the provider announces in its HELLO.
pub const PROVIDER_USER_AGENT: &str = concat!("zeta4g-proxy/", env!("CARGO_PKG_VERSION"));

/// Version ladder proposed when first contacting the backend.
pub const PROPOSED_VERSIONS: [(u8, u8); 4] = [(5, 0), (4, 4), (4, 3), (4, 0)];

/// Source of routing tables and cluster membership.
///
/// Object-safe so the monitor and cache can share one boxed provider.
pub trait RoutingProvider: Send + Sync {
    /// Read the cluster overview: default database plus the union of hosts
    /// appearing in any role of the system database's routing table.
    fn cluster_info(&self) -> BoxFuture<'_, ProxyResult<ClusterInfo>>;

    /// Read the routing table for one database.
    fn routing_table<'a>(&'a self, database: &'a str) -> BoxFuture<'a, ProxyResult<RoutingTable>>;

    /// The protocol version the backend negotiated with this provider.
    fn version(&self) -> BoltVersion;
}

// ============================================================================
// BoltRoutingProvider
// ============================================================================

/// Routing provider driving the backend over its own Bolt sessions.
///
/// Stateless between calls: every query opens a fresh session (connect,
/// handshake, HELLO, ROUTE, GOODBYE). Refreshes are far apart, so one
/// session per tick is cheaper than keeping a connection healthy.
pub struct BoltRoutingProvider {
    backend: BackendUri,
    connector: BackendConnector,
    user: String,
    password: String,
    version: BoltVersion,
}

impl BoltRoutingProvider {
    /// Connect once to learn the backend's protocol version.
    ///
    /// Failure here is a startup error: the process should exit nonzero.
    pub async fn connect(
        backend: BackendUri,
        user: impl Into<String>,
        password: impl Into<String>,
    ) -> ProxyResult<Self> {
        let connector = BackendConnector::for_mode(backend.tls)?;
        let user = user.into();
        let password = password.into();

        let mut io = connector.connect(&backend.host, &backend.address()).await?;
        let version = Self::negotiate(&mut io).await?;
        Self::hello(&mut io, &user, &password).await?;
        Self::goodbye(&mut io).await;

        debug!(backend = %backend.address(), %version, "provider session established");

        Ok(Self { backend, connector, user, password, version })
    }

    /// Open an authenticated session for one round of queries.
    async fn session(&self) -> ProxyResult<BoxedIo> {
        let mut io = self
            .connector
            .connect(&self.backend.host, &self.backend.address())
            .await?;
        let version = Self::negotiate(&mut io).await?;
        if version != self.version {
            return Err(ProxyError::protocol(format!(
                "backend version changed: {} -> {}",
                self.version, version
            )));
        }
        Self::hello(&mut io, &self.user, &self.password).await?;
        Ok(io)
    }

    /// Propose the version ladder and read the backend's pick.
    async fn negotiate(io: &mut BoxedIo) -> ProxyResult<BoltVersion> {
        let mut buf = BytesMut::with_capacity(20);
        buf.put_slice(&crate::bolt::BOLT_MAGIC);
        for (major, minor) in PROPOSED_VERSIONS {
            buf.put_slice(&BoltVersion::new(major, minor).to_wire());
        }
        io.write_all(&buf).await?;
        io.flush().await?;

        let mut reply = [0u8; HANDSHAKE_RESPONSE_SIZE];
        io.read_exact(&mut reply).await?;
        BoltVersion::from_wire(reply).ok_or_else(|| {
            ProxyError::protocol("backend accepted none of the proposed versions")
        })
    }

    /// Authenticate the provider session.
    async fn hello(io: &mut BoxedIo, user: &str, password: &str) -> ProxyResult<()> {
        let mut extra = HashMap::new();
        extra.insert(
            "user_agent".to_string(),
            PackStreamValue::String(PROVIDER_USER_AGENT.to_string()),
        );
        extra.insert(
            "scheme".to_string(),
            PackStreamValue::String("basic".to_string()),
        );
        extra.insert(
            "principal".to_string(),
            PackStreamValue::String(user.to_string()),
        );
        extra.insert(
            "credentials".to_string(),
            PackStreamValue::String(password.to_string()),
        );

        let frame = frame_structure(0x01, &[PackStreamValue::Map(extra)]);
        io.write_all(&frame.data).await?;
        io.flush().await?;

        let reply = read_frame(io).await?;
        match reply.tag {
            BoltTag::Success => Ok(()),
            BoltTag::Failure => {
                let message = failure_message(&reply);
                Err(ProxyError::authentication(message))
            }
            other => Err(ProxyError::protocol(format!(
                "unexpected reply to provider HELLO: {other}"
            ))),
        }
    }

    /// Best-effort polite close.
    async fn goodbye(io: &mut BoxedIo) {
        let _ = io.write_all(&crate::bolt::message::goodbye().data).await;
        let _ = io.flush().await;
        let _ = io.shutdown().await;
    }

    /// Issue a ROUTE (Bolt 4.3 form) and parse the table out of SUCCESS.
    async fn route(&self, io: &mut BoxedIo, database: Option<&str>) -> ProxyResult<RouteReply> {
        let db_field = match database {
            Some(db) => PackStreamValue::String(db.to_string()),
            None => PackStreamValue::Null,
        };
        let frame = frame_structure(
            0x66,
            &[
                PackStreamValue::Map(HashMap::new()),
                PackStreamValue::List(Vec::new()),
                db_field,
            ],
        );
        io.write_all(&frame.data).await?;
        io.flush().await?;

        let reply = read_frame(io).await?;
        match reply.tag {
            BoltTag::Success => RouteReply::from_frame(&reply).ok_or_else(|| {
                ProxyError::routing(format!(
                    "malformed ROUTE response for {}",
                    database.unwrap_or("<default>")
                ))
            }),
            BoltTag::Failure => Err(ProxyError::routing(failure_message(&reply))),
            other => Err(ProxyError::protocol(format!(
                "unexpected reply to ROUTE: {other}"
            ))),
        }
    }
}

impl RoutingProvider for BoltRoutingProvider {
    fn cluster_info(&self) -> BoxFuture<'_, ProxyResult<ClusterInfo>> {
        Box::pin(async move {
            let mut io = self.session().await?;

            // The system table names every host in the cluster; the
            // default-db query only contributes the database name.
            let system = self.route(&mut io, Some(SYSTEM_DB)).await?;
            let default = self.route(&mut io, None).await?;
            Self::goodbye(&mut io).await;

            let default_db = default
                .database
                .unwrap_or_else(|| FALLBACK_DEFAULT_DB.to_string());
            let ttl = system.ttl;
            Ok(ClusterInfo::new(default_db, system.all_hosts(), ttl))
        })
    }

    fn routing_table<'a>(&'a self, database: &'a str) -> BoxFuture<'a, ProxyResult<RoutingTable>> {
        Box::pin(async move {
            let mut io = self.session().await?;
            let reply = self.route(&mut io, Some(database)).await?;
            Self::goodbye(&mut io).await;

            Ok(RoutingTable::new(
                database,
                reply.readers,
                reply.writers,
                reply.routers,
                reply.ttl,
            ))
        })
    }

    fn version(&self) -> BoltVersion {
        self.version
    }
}

// ============================================================================
// ROUTE reply parsing
// ============================================================================

/// Parsed `rt` metadata of a ROUTE SUCCESS.
#[derive(Debug, Clone, Default)]
struct RouteReply {
    database: Option<String>,
    ttl: Duration,
    readers: Vec<String>,
    writers: Vec<String>,
    routers: Vec<String>,
}

impl RouteReply {
    /// Parse `{rt: {ttl, db?, servers: [{role, addresses}]}}`.
    fn from_frame(frame: &BoltFrame) -> Option<Self> {
        let meta = message_map(&frame.data)?;
        let rt = meta.get("rt")?.as_map()?;

        let ttl = rt
            .get("ttl")
            .and_then(|v| v.as_int())
            .map(|secs| Duration::from_secs(secs.max(0) as u64))
            .unwrap_or(FALLBACK_TTL);
        let database = rt.get("db").and_then(|v| v.as_str()).map(str::to_string);

        let mut reply = RouteReply { database, ttl, ..Default::default() };

        for server in rt.get("servers")?.as_list()? {
            let server = server.as_map()?;
            let role = server.get("role").and_then(|v| v.as_str()).unwrap_or("");
            let addresses: Vec<String> = server
                .get("addresses")
                .and_then(|v| v.as_list())
                .map(|list| {
                    list.iter()
                        .filter_map(|a| a.as_str().map(str::to_string))
                        .collect()
                })
                .unwrap_or_default();

            match role {
                "READ" => reply.readers.extend(addresses),
                "WRITE" => reply.writers.extend(addresses),
                "ROUTE" => reply.routers.extend(addresses),
                _ => {}
            }
        }

        Some(reply)
    }

    /// Union of hosts in any role, order-preserving.
    fn all_hosts(&self) -> Vec<String> {
        let mut hosts = Vec::new();
        for host in self
            .routers
            .iter()
            .chain(self.writers.iter())
            .chain(self.readers.iter())
        {
            if !hosts.contains(host) {
                hosts.push(host.clone());
            }
        }
        hosts
    }
}

/// Extract the `message` field of a FAILURE, with a readable fallback.
pub fn failure_message(frame: &BoltFrame) -> String {
    message_map(&frame.data)
        .and_then(|map| map.get("message").and_then(|v| v.as_str()).map(str::to_string))
        .unwrap_or_else(|| "unparseable failure from backend".to_string())
}
