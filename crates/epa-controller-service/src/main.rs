// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! EPA controller: newline-delimited JSON over a Unix socket.
//!
//! Agent announcements go to the hardware importer, control-plane
//! notifications to the notification consumer, queries to the topology
//! reader. Both consumers run on their own task and apply events in
//! arrival order.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use epa_app_core::config::ConfigService;
use epa_app_core::settings::{ControllerSettings, CONTROLLER_KEY};
use epa_config_fs::FsConfigStore;
use epa_core::facility::{GRAPH_URL_KEY, NAME_KEY, ODL_NAME_KEY, ODL_PASSWORD_KEY, ODL_URL_KEY};
use epa_core::{
    AgentConsumer, AgentEvent, DispatchTable, EpaError, EventHandlers, FacilityRegistry,
    GraphWriter, HardwareImporter, HttpTopologyFetcher, Notification, NotificationConsumer,
    ResourceKind, ResourceStore, StaticInventory, TopologyReader, VirtualSync,
};
use epa_graph::{now_epoch, GraphConnector, MemoryConnector, Properties};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

const SDN_TIMEOUT: Duration = Duration::from_secs(10);
const MAX_LINE: usize = 4 * 1024 * 1024;

#[derive(Parser, Debug)]
#[command(author, version, about = "EPA topology controller")]
struct Args {
    /// Unix socket for event intake (overrides the stored setting)
    #[arg(long)]
    socket: Option<String>,
    /// Directory hardware agents upload into
    #[arg(long)]
    agents_data_path: Option<String>,
    /// Inventory snapshot (JSON) used for the startup import
    #[arg(long)]
    inventory: Option<String>,
    /// Skip the startup full import
    #[arg(long)]
    no_initial_import: bool,
}

impl Args {
    fn apply(self, mut settings: ControllerSettings) -> ControllerSettings {
        if let Some(socket) = self.socket {
            settings.socket_path = socket;
        }
        if let Some(path) = self.agents_data_path {
            settings.agents_data_path = path;
        }
        if self.inventory.is_some() {
            settings.inventory_path = self.inventory;
        }
        if self.no_initial_import {
            settings.initial_import = false;
        }
        settings
    }
}

/// Read request, answered on the connection it arrived on.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "query", rename_all = "snake_case")]
enum Query {
    Resource {
        pop: String,
        kind: ResourceKind,
        id: String,
    },
    Ids {
        pop: String,
        kind: ResourceKind,
        #[serde(default)]
        filters: Vec<(String, String)>,
    },
    Link {
        pop: String,
        kind: ResourceKind,
        link_id: String,
    },
    Listing {
        pop: String,
        kinds: Vec<ResourceKind>,
    },
}

#[derive(Debug, PartialEq)]
enum Inbound {
    Agent(AgentEvent),
    Notification(Notification),
    Query(Query),
}

/// Classify one intake line. Agent events without a `data_path` use
/// `agents_data_path`.
fn parse_line(line: &str, agents_data_path: &Path) -> Result<Inbound> {
    let mut value: Value = serde_json::from_str(line).context("intake line is not JSON")?;
    if value.get("query").is_some() {
        return Ok(Inbound::Query(serde_json::from_value(value)?));
    }
    let is_agent = value
        .get("event_type")
        .and_then(Value::as_str)
        .is_some_and(|t| t.starts_with("agents."));
    if is_agent {
        if let Some(obj) = value.as_object_mut() {
            obj.entry("data_path")
                .or_insert_with(|| Value::from(agents_data_path.display().to_string()));
        }
        return Ok(Inbound::Agent(serde_json::from_value(value)?));
    }
    Ok(Inbound::Notification(serde_json::from_value(value)?))
}

#[derive(Serialize)]
struct Failure {
    error: String,
    not_found: bool,
    unavailable: bool,
}

fn reply<T: Serialize>(result: Result<T, EpaError>) -> Value {
    match result {
        Ok(body) => json!({ "ok": body }),
        Err(err) => serde_json::to_value(Failure {
            error: err.to_string(),
            not_found: err.is_not_found(),
            unavailable: err.is_unavailable(),
        })
        .unwrap_or(Value::Null),
    }
}

async fn answer(reader: &TopologyReader, query: Query) -> Value {
    match query {
        Query::Resource { pop, kind, id } => reply(reader.resource(&pop, kind, &id).await),
        Query::Ids { pop, kind, filters } => {
            reply(reader.resource_ids(&pop, kind, &filters).await)
        }
        Query::Link { pop, kind, link_id } => reply(reader.link(&pop, kind, &link_id).await),
        Query::Listing { pop, kinds } => reply(reader.listing(&pop, &kinds).await),
    }
}

struct Intake {
    notifications: mpsc::Sender<Notification>,
    agents: mpsc::Sender<AgentEvent>,
    reader: TopologyReader,
    agents_data_path: PathBuf,
}

impl Intake {
    /// Route one line. Returns the reply to write back, if any.
    async fn dispatch(&self, line: &str) -> Result<Option<Value>> {
        match parse_line(line, &self.agents_data_path)? {
            Inbound::Agent(event) => {
                self.agents.send(event).await.context("agent consumer gone")?;
                Ok(None)
            }
            Inbound::Notification(notification) => {
                self.notifications
                    .send(notification)
                    .await
                    .context("notification consumer gone")?;
                Ok(None)
            }
            Inbound::Query(query) => Ok(Some(answer(&self.reader, query).await)),
        }
    }
}

/// One read from a client connection.
#[derive(Debug, PartialEq, Eq)]
enum Frame {
    /// A line, newline stripped.
    Line(Vec<u8>),
    /// A line longer than the limit, skipped; carries its length.
    Oversized(usize),
    /// The client closed the connection.
    Eof,
}

/// Read one line of at most `max` bytes. Longer lines are drained to their
/// newline without being buffered.
async fn next_frame<R>(reader: &mut R, max: usize) -> std::io::Result<Frame>
where
    R: AsyncBufRead + Unpin,
{
    let mut buf = Vec::new();
    let limit = u64::try_from(max).unwrap_or(u64::MAX).saturating_add(1);
    let n = (&mut *reader).take(limit).read_until(b'\n', &mut buf).await?;
    if n == 0 {
        return Ok(Frame::Eof);
    }
    if buf.last() == Some(&b'\n') {
        buf.pop();
        return Ok(Frame::Line(buf));
    }
    if buf.len() <= max {
        return Ok(Frame::Line(buf));
    }
    let mut skipped = buf.len();
    loop {
        let chunk = reader.fill_buf().await?;
        if chunk.is_empty() {
            break;
        }
        if let Some(end) = chunk.iter().position(|b| *b == b'\n') {
            reader.consume(end + 1);
            skipped += end;
            break;
        }
        let len = chunk.len();
        reader.consume(len);
        skipped += len;
    }
    Ok(Frame::Oversized(skipped))
}

async fn handle_client(stream: UnixStream, intake: Arc<Intake>) -> Result<()> {
    let (read, mut write) = stream.into_split();
    let mut reader = BufReader::new(read);
    loop {
        let bytes = match next_frame(&mut reader, MAX_LINE).await? {
            Frame::Eof => break,
            Frame::Oversized(len) => {
                warn!(len, "dropping oversized line");
                continue;
            }
            Frame::Line(bytes) => bytes,
        };
        let Ok(line) = String::from_utf8(bytes) else {
            warn!("dropping line that is not UTF-8");
            continue;
        };
        if line.trim().is_empty() {
            continue;
        }
        match intake.dispatch(&line).await {
            Ok(Some(answer)) => {
                let mut out = serde_json::to_vec(&answer)?;
                out.push(b'\n');
                write.write_all(&out).await?;
            }
            Ok(None) => debug!("event queued"),
            Err(err) => warn!(?err, "rejected intake line"),
        }
    }
    Ok(())
}

/// Facility node properties for this instance.
fn facility_properties(settings: &ControllerSettings) -> Properties {
    let mut props = Properties::new();
    props.insert(NAME_KEY.into(), Value::from(settings.pop.name.as_str()));
    props.insert(
        GRAPH_URL_KEY.into(),
        Value::from(settings.pop.graph_url.as_str()),
    );
    if let Some(sdn) = &settings.sdn {
        props.insert(ODL_URL_KEY.into(), Value::from(sdn.url.as_str()));
        props.insert(ODL_NAME_KEY.into(), Value::from(sdn.username.as_str()));
        props.insert(ODL_PASSWORD_KEY.into(), Value::from(sdn.password.as_str()));
    }
    props
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new("info"))?)
        .init();

    let config = ConfigService::new(FsConfigStore::new()?);
    let settings = args.apply(config.load_or_init::<ControllerSettings>(CONTROLLER_KEY)?);

    let connector = Arc::new(MemoryConnector::new());
    let registry = FacilityRegistry::new(connector.connect(&settings.pop_graph_url)?);
    registry
        .create_pop(&settings.pop.id, facility_properties(&settings), now_epoch())
        .await
        .context("register facility")?;

    // the store and the importer share one write lock
    let writer = GraphWriter::new(connector.connect(&settings.pop.graph_url)?);
    let store = ResourceStore::new(writer.clone(), settings.pop.name.as_str());
    let importer = HardwareImporter::new(writer, settings.pop.name.as_str());

    let source = match &settings.inventory_path {
        Some(path) => StaticInventory::load(Path::new(path))
            .await
            .with_context(|| format!("load inventory {path}"))?,
        None => StaticInventory::default(),
    };
    let sync = VirtualSync::new(store, Arc::new(source));
    if settings.initial_import {
        let report = sync.full_import().await.context("initial import")?;
        info!(stored = report.total(), "initial import finished");
    }

    let (notify_tx, notify_rx) = mpsc::channel(256);
    let (agent_tx, agent_rx) = mpsc::channel(64);
    tokio::spawn(
        NotificationConsumer::new(DispatchTable::standard(), EventHandlers::new(sync))
            .run(notify_rx),
    );
    tokio::spawn(AgentConsumer::new(importer).run(agent_rx));

    let fetcher = Arc::new(HttpTopologyFetcher::new(SDN_TIMEOUT)?);
    let intake = Arc::new(Intake {
        notifications: notify_tx,
        agents: agent_tx,
        reader: TopologyReader::new(registry, connector, fetcher),
        agents_data_path: PathBuf::from(&settings.agents_data_path),
    });

    // Remove stale socket if present
    let _ = std::fs::remove_file(&settings.socket_path);
    let listener = UnixListener::bind(&settings.socket_path)
        .with_context(|| format!("bind {}", settings.socket_path))?;
    info!(
        socket = %settings.socket_path,
        pop = %settings.pop.id,
        "controller listening"
    );

    loop {
        let (stream, _) = listener.accept().await?;
        let intake = Arc::clone(&intake);
        tokio::spawn(async move {
            if let Err(err) = handle_client(stream, intake).await {
                warn!(?err, "client handler error");
            }
        });
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use epa_app_core::settings::SdnSettings;
    use epa_dry_tests::{InMemoryConfigStore, ScriptedTopology};

    fn data_dir() -> PathBuf {
        PathBuf::from("/var/lib/epa/agents")
    }

    #[tokio::test]
    async fn oversized_lines_are_skipped_without_losing_the_next() {
        let input: &[u8] = b"{\"a\":1}\n0123456789abcdef\n\nlast";
        let mut reader = BufReader::with_capacity(4, input);
        let mut frames = Vec::new();
        loop {
            let frame = next_frame(&mut reader, 8).await.unwrap();
            if frame == Frame::Eof {
                break;
            }
            frames.push(frame);
        }
        assert_eq!(
            frames,
            vec![
                Frame::Line(b"{\"a\":1}".to_vec()),
                Frame::Oversized(16),
                Frame::Line(Vec::new()),
                Frame::Line(b"last".to_vec()),
            ]
        );
    }

    #[test]
    fn agent_lines_default_their_data_path() {
        let inbound = parse_line(
            r#"{"event_type": "agents.new", "hostname": "compute-1"}"#,
            &data_dir(),
        )
        .unwrap();
        assert_eq!(
            inbound,
            Inbound::Agent(AgentEvent {
                event_type: "agents.new".into(),
                hostname: "compute-1".into(),
                data_path: data_dir(),
            })
        );
    }

    #[test]
    fn other_event_types_are_notifications() {
        let inbound = parse_line(
            r#"{"event_type": "port.create.end", "payload": {"port_id": "p1"}}"#,
            &data_dir(),
        )
        .unwrap();
        let Inbound::Notification(n) = inbound else {
            unreachable!("expected a notification");
        };
        assert_eq!(n.event_type, "port.create.end");
        assert_eq!(n.payload["port_id"], "p1");
    }

    #[test]
    fn queries_are_tagged() {
        let inbound = parse_line(
            r#"{"query": "ids", "pop": "pop-1", "kind": "port", "filters": [["device_id", "vm-1"]]}"#,
            &data_dir(),
        )
        .unwrap();
        assert_eq!(
            inbound,
            Inbound::Query(Query::Ids {
                pop: "pop-1".into(),
                kind: ResourceKind::Port,
                filters: vec![("device_id".into(), "vm-1".into())],
            })
        );
        assert!(parse_line("not json", &data_dir()).is_err());
        assert!(parse_line(r#"{"query": "drop-tables"}"#, &data_dir()).is_err());
    }

    #[test]
    fn flags_override_stored_settings() {
        let store = InMemoryConfigStore::new();
        let stored: ControllerSettings = ConfigService::new(store)
            .load_or_init(CONTROLLER_KEY)
            .unwrap();
        let args = Args::parse_from([
            "epa-controller",
            "--socket",
            "/run/epa.sock",
            "--inventory",
            "/etc/epa/inventory.json",
            "--no-initial-import",
        ]);
        let settings = args.apply(stored.clone());
        assert_eq!(settings.socket_path, "/run/epa.sock");
        assert_eq!(
            settings.inventory_path.as_deref(),
            Some("/etc/epa/inventory.json")
        );
        assert!(!settings.initial_import);
        assert_eq!(settings.agents_data_path, stored.agents_data_path);
    }

    #[test]
    fn facility_carries_sdn_only_when_configured() {
        let mut settings = ControllerSettings::default();
        assert!(!facility_properties(&settings).contains_key(ODL_URL_KEY));
        settings.sdn = Some(SdnSettings {
            url: "http://odl:8181/restconf/operational".into(),
            username: "admin".into(),
            password: "secret".into(),
        });
        let props = facility_properties(&settings);
        assert_eq!(props[ODL_NAME_KEY], "admin");
        assert_eq!(props[NAME_KEY], "default");
    }

    #[tokio::test]
    async fn dispatch_queues_events_and_answers_queries() {
        let connector = Arc::new(MemoryConnector::new());
        let registry = FacilityRegistry::new(connector.graph("memory://pops"));
        let settings = ControllerSettings::default();
        registry
            .create_pop(&settings.pop.id, facility_properties(&settings), 1.0)
            .await
            .unwrap();

        let (notify_tx, mut notify_rx) = mpsc::channel(4);
        let (agent_tx, _agent_rx) = mpsc::channel(4);
        let intake = Intake {
            notifications: notify_tx,
            agents: agent_tx,
            reader: TopologyReader::new(registry, connector, Arc::new(ScriptedTopology::new())),
            agents_data_path: data_dir(),
        };

        let queued = intake
            .dispatch(r#"{"event_type": "network.delete.end", "payload": {"network_id": "n1"}}"#)
            .await
            .unwrap();
        assert!(queued.is_none());
        assert_eq!(
            notify_rx.recv().await.unwrap().event_type,
            "network.delete.end"
        );

        let answer = intake
            .dispatch(r#"{"query": "resource", "pop": "pop-1", "kind": "vm", "id": "ghost"}"#)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(answer["not_found"], true);
        assert_eq!(answer["unavailable"], false);

        let answer = intake
            .dispatch(r#"{"query": "ids", "pop": "pop-1", "kind": "pop"}"#)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(answer["ok"], json!(["pop-1"]));
    }
}
