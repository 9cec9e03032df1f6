//! Shared virtual IP held by the elected node.
//!
//! Nodes campaign on a key in the cluster consensus store. The winner runs
//! the [`VipHandler`] acquire hook and publishes the shared address; it
//! keeps it until the session expires, another leader shows up or any of
//! the services the election depends on goes away.

use std::future::Future;
use std::net::IpAddr;
use std::pin::Pin;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use ipnet::IpNet;
use serde::Deserialize;
use tokio_stream::{Stream, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{Error, Notifier, Operator, Result, lock};
use crate::spec::{AddressFlags, AddressSpec, ConfigLayer, Family, Scope};

/// Wait before retrying a failed round.
const CAMPAIGN_RETRY_INTERVAL: Duration = Duration::from_secs(1);

/// Release and resign run on their own deadline, even after cancellation.
const RELEASE_TIMEOUT: Duration = Duration::from_secs(10);

/// Static pod ids of the local API server.
const API_SERVER_POD_PREFIX: &str = "kube-system/kube-apiserver-";

pub type LeaderStream = Pin<Box<dyn Stream<Item = String> + Send>>;
pub type EventStream = Pin<Box<dyn Stream<Item = ClusterEvent> + Send>>;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VipConfig {
    pub shared_ip: IpAddr,
    /// Announce the address with gratuitous ARP (IPv4 only).
    #[serde(default)]
    pub gratuitous_arp: bool,
    /// Campaign value; the election is refused without one.
    #[serde(default)]
    pub node_name: String,
}

/// Current holder of an election key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Leader {
    pub key: String,
    pub value: String,
    pub revision: i64,
}

/// Client of the local consensus store.
#[async_trait]
pub trait Consensus: Send + Sync {
    async fn open_session(&self) -> Result<Box<dyn Session>>;
}

/// A lease-backed session. Elections made through it end with it.
#[async_trait]
pub trait Session: Send + Sync {
    fn election(&self, key: &str) -> Box<dyn Election>;

    /// Resolves once the session lease is lost.
    async fn done(&self);

    async fn close(&self) -> Result<()>;
}

#[async_trait]
pub trait Election: Send + Sync {
    async fn leader(&self) -> Result<Option<Leader>>;

    /// Resign a leadership left over from an earlier session of this node.
    async fn resign_stale(&self, leader: &Leader) -> Result<()>;

    /// Resolves once `value` is the leader.
    async fn campaign(&self, value: &str) -> Result<()>;

    async fn resign(&self) -> Result<()>;

    /// Leader values, starting with the current one.
    fn observe(&self) -> LeaderStream;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClusterEvent {
    /// The local consensus service was removed.
    ConsensusDestroyed,
    /// A static pod went away.
    PodDestroyed { id: String },
    /// The node lifecycle entered teardown.
    NodeTearingDown,
}

/// Node-local service state the election depends on.
#[async_trait]
pub trait ClusterWatch: Send + Sync {
    /// Resolves once the consensus service is running and healthy.
    async fn wait_consensus_ready(&self) -> Result<()>;

    /// Events from now on. The stream ending ends the current round.
    async fn events(&self) -> Result<EventStream>;
}

/// Hooks run when leadership is gained or lost.
#[async_trait]
pub trait VipHandler: Send + Sync {
    async fn acquire(&self) -> Result<()>;
    async fn release(&self) -> Result<()>;
}

/// Handler for plain layer 2 setups where publishing the address is enough.
#[derive(Debug, Clone, Copy, Default)]
pub struct NopHandler;

#[async_trait]
impl VipHandler for NopHandler {
    async fn acquire(&self) -> Result<()> {
        Ok(())
    }

    async fn release(&self) -> Result<()> {
        Ok(())
    }
}

async fn cancellable<T>(
    token: &CancellationToken,
    fut: impl Future<Output = Result<T>>,
) -> Result<T> {
    tokio::select! {
        biased;
        _ = token.cancelled() => Err(Error::Cancelled),
        result = fut => result,
    }
}

/// Campaigns for a shared IP on one link.
pub struct Vip<C, W, H = NopHandler> {
    link_name: String,
    config: VipConfig,
    consensus: C,
    cluster: W,
    handler: H,
    leader: Mutex<bool>,
}

impl<C: Consensus, W: ClusterWatch, H: VipHandler> Vip<C, W, H> {
    pub fn new(
        link_name: impl Into<String>,
        config: VipConfig,
        consensus: C,
        cluster: W,
        handler: H,
    ) -> Self {
        Self {
            link_name: link_name.into(),
            config,
            consensus,
            cluster,
            handler,
            leader: Mutex::new(false),
        }
    }

    pub fn election_key(&self) -> String {
        format!("vip-election:{}", self.config.shared_ip)
    }

    pub fn is_leader(&self) -> bool {
        *lock(&self.leader)
    }

    fn set_leader(&self, leader: bool, notifier: &Notifier) {
        *lock(&self.leader) = leader;
        notifier.notify();
    }

    /// One election round: wait, campaign, hold, give up.
    async fn round(&self, token: &CancellationToken, notifier: &Notifier) -> Result<()> {
        cancellable(token, self.cluster.wait_consensus_ready()).await?;

        if self.config.node_name.is_empty() {
            return Err(Error::Precondition(
                "refusing to join election without a hostname".into(),
            ));
        }

        let session = cancellable(token, self.consensus.open_session()).await?;
        let result = self.elect(token, notifier, session.as_ref()).await;

        if let Err(e) = session.close().await {
            debug!(link = %self.link_name, error = %e, "failed closing consensus session");
        }
        result
    }

    async fn elect(
        &self,
        token: &CancellationToken,
        notifier: &Notifier,
        session: &dyn Session,
    ) -> Result<()> {
        let hostname = self.config.node_name.as_str();
        let election = session.election(&self.election_key());

        if let Some(leader) = cancellable(token, election.leader()).await?
            && leader.value == hostname
        {
            info!(link = %self.link_name, "resigning from previous election");
            cancellable(token, election.resign_stale(&leader)).await?;
        }

        let mut events = cancellable(token, self.cluster.events()).await?;

        let done = session.done();
        tokio::pin!(done);

        {
            let campaign = election.campaign(hostname);
            tokio::pin!(campaign);

            loop {
                tokio::select! {
                    result = &mut campaign => {
                        result?;
                        break;
                    }
                    _ = &mut done => {
                        info!(link = %self.link_name, "consensus session closed");
                        return Ok(());
                    }
                    _ = token.cancelled() => return Ok(()),
                    event = events.next() => match event {
                        Some(ClusterEvent::ConsensusDestroyed | ClusterEvent::NodeTearingDown)
                        | None => return Ok(()),
                        Some(ClusterEvent::PodDestroyed { .. }) => {}
                    },
                }
            }
        }

        match cancellable(token, self.handler.acquire()).await {
            Ok(()) => {}
            Err(Error::Cancelled) => {
                self.step_down(election.as_ref(), notifier).await;
                return Ok(());
            }
            Err(e) => {
                warn!(
                    link = %self.link_name,
                    ip = %self.config.shared_ip,
                    error = %e,
                    "failed enabling shared IP"
                );
                // Not a leader without the address: leave the election now.
                self.step_down(election.as_ref(), notifier).await;
                return Err(e);
            }
        }
        self.set_leader(true, notifier);
        info!(link = %self.link_name, ip = %self.config.shared_ip, "enabled shared IP");

        let mut observe = election.observe();

        loop {
            tokio::select! {
                _ = &mut done => {
                    info!(link = %self.link_name, "consensus session closed");
                    break;
                }
                _ = token.cancelled() => break,
                value = observe.next() => match value {
                    None => break,
                    Some(value) if value != hostname => {
                        info!(link = %self.link_name, leader = %value, "detected new leader");
                        break;
                    }
                    Some(_) => {}
                },
                event = events.next() => match event {
                    Some(ClusterEvent::ConsensusDestroyed | ClusterEvent::NodeTearingDown)
                    | None => break,
                    Some(ClusterEvent::PodDestroyed { id }) if id.starts_with(API_SERVER_POD_PREFIX) => {
                        break;
                    }
                    Some(ClusterEvent::PodDestroyed { .. }) => {}
                },
            }
        }

        self.step_down(election.as_ref(), notifier).await;
        Ok(())
    }

    /// Release the address and resign, each on its own deadline.
    async fn step_down(&self, election: &dyn Election, notifier: &Notifier) {
        match tokio::time::timeout(RELEASE_TIMEOUT, self.handler.release()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => info!(
                link = %self.link_name,
                ip = %self.config.shared_ip,
                error = %e,
                "failed disabling shared IP"
            ),
            Err(_) => info!(link = %self.link_name, "timed out disabling shared IP"),
        }
        self.set_leader(false, notifier);
        info!(link = %self.link_name, ip = %self.config.shared_ip, "removing shared IP");

        match tokio::time::timeout(RELEASE_TIMEOUT, election.resign()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => debug!(link = %self.link_name, error = %e, "failed resigning"),
            Err(_) => debug!(link = %self.link_name, "timed out resigning"),
        }
    }
}

#[async_trait]
impl<C: Consensus, W: ClusterWatch, H: VipHandler> Operator for Vip<C, W, H> {
    fn prefix(&self) -> String {
        format!("vip/{}", self.link_name)
    }

    async fn run(&self, token: CancellationToken, notifier: Notifier) {
        loop {
            match self.round(&token, &notifier).await {
                Ok(()) | Err(Error::Cancelled) => {}
                Err(e) => {
                    warn!(
                        link = %self.link_name,
                        ip = %self.config.shared_ip,
                        error = %e,
                        "campaign failure"
                    );

                    tokio::select! {
                        _ = token.cancelled() => return,
                        _ = tokio::time::sleep(CAMPAIGN_RETRY_INTERVAL) => {}
                    }
                }
            }

            if token.is_cancelled() {
                return;
            }
        }
    }

    fn address_specs(&self) -> Vec<AddressSpec> {
        if !self.is_leader() {
            return Vec::new();
        }

        let ip = self.config.shared_ip;
        vec![AddressSpec {
            address: IpNet::from(ip),
            link_name: self.link_name.clone(),
            family: Family::of(ip),
            scope: Scope::Global,
            flags: AddressFlags::PERMANENT,
            announce_with_arp: ip.is_ipv4() && self.config.gratuitous_arp,
            config_layer: ConfigLayer::Operator,
        }]
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tokio::sync::mpsc;
    use tokio_stream::wrappers::ReceiverStream;

    use super::*;

    const NODE: &str = "node-a";

    /// Shared script and call log behind every fake.
    #[derive(Default)]
    struct World {
        log: Mutex<Vec<String>>,
        stale_leader: Mutex<Option<Leader>>,
        observe: Mutex<Option<mpsc::Receiver<String>>>,
        events: Mutex<Option<mpsc::Receiver<ClusterEvent>>>,
        session_lost: tokio::sync::Notify,
        campaigns: Mutex<u32>,
        fail_acquire: bool,
        /// `events()` calls that fail before one succeeds.
        events_failures: Mutex<u32>,
    }

    impl World {
        fn record(&self, call: impl Into<String>) {
            self.log.lock().unwrap().push(call.into());
        }

        fn log(&self) -> Vec<String> {
            self.log.lock().unwrap().clone()
        }
    }

    struct FakeConsensus(Arc<World>);
    struct FakeSession(Arc<World>);
    struct FakeElection(Arc<World>);
    struct FakeCluster(Arc<World>);
    struct FakeHandler(Arc<World>);

    #[async_trait]
    impl Consensus for FakeConsensus {
        async fn open_session(&self) -> Result<Box<dyn Session>> {
            self.0.record("open");
            Ok(Box::new(FakeSession(self.0.clone())))
        }
    }

    #[async_trait]
    impl Session for FakeSession {
        fn election(&self, key: &str) -> Box<dyn Election> {
            assert_eq!(key, "vip-election:10.5.0.1");
            Box::new(FakeElection(self.0.clone()))
        }

        async fn done(&self) {
            self.0.session_lost.notified().await;
        }

        async fn close(&self) -> Result<()> {
            self.0.record("close");
            Ok(())
        }
    }

    #[async_trait]
    impl Election for FakeElection {
        async fn leader(&self) -> Result<Option<Leader>> {
            Ok(self.0.stale_leader.lock().unwrap().clone())
        }

        async fn resign_stale(&self, leader: &Leader) -> Result<()> {
            self.0.record(format!("resign_stale:{}", leader.revision));
            Ok(())
        }

        async fn campaign(&self, value: &str) -> Result<()> {
            assert_eq!(value, NODE);
            let round = {
                let mut campaigns = self.0.campaigns.lock().unwrap();
                *campaigns += 1;
                *campaigns
            };
            self.0.record("campaign");
            // Only the first round is won.
            if round > 1 {
                std::future::pending::<()>().await;
            }
            Ok(())
        }

        async fn resign(&self) -> Result<()> {
            self.0.record("resign");
            Ok(())
        }

        fn observe(&self) -> LeaderStream {
            match self.0.observe.lock().unwrap().take() {
                Some(rx) => Box::pin(ReceiverStream::new(rx)),
                None => Box::pin(tokio_stream::pending()),
            }
        }
    }

    #[async_trait]
    impl ClusterWatch for FakeCluster {
        async fn wait_consensus_ready(&self) -> Result<()> {
            self.0.record("ready");
            Ok(())
        }

        async fn events(&self) -> Result<EventStream> {
            {
                let mut failures = self.0.events_failures.lock().unwrap();
                if *failures > 0 {
                    *failures -= 1;
                    return Err(Error::Transport("state watch unavailable".into()));
                }
            }
            Ok(match self.0.events.lock().unwrap().take() {
                Some(rx) => Box::pin(ReceiverStream::new(rx)),
                None => Box::pin(tokio_stream::pending()),
            })
        }
    }

    #[async_trait]
    impl VipHandler for FakeHandler {
        async fn acquire(&self) -> Result<()> {
            self.0.record("acquire");
            if self.0.fail_acquire {
                return Err(Error::Transport("cloud API unavailable".into()));
            }
            Ok(())
        }

        async fn release(&self) -> Result<()> {
            self.0.record("release");
            Ok(())
        }
    }

    type TestVip = Vip<FakeConsensus, FakeCluster, FakeHandler>;

    struct Harness {
        world: Arc<World>,
        vip: Arc<TestVip>,
        leaders: mpsc::Sender<String>,
        events: mpsc::Sender<ClusterEvent>,
        notified: mpsc::Receiver<()>,
        token: CancellationToken,
        task: tokio::task::JoinHandle<()>,
    }

    fn config(ip: &str, node_name: &str) -> VipConfig {
        VipConfig {
            shared_ip: ip.parse().unwrap(),
            gratuitous_arp: true,
            node_name: node_name.into(),
        }
    }

    fn start(mut world: World, config: VipConfig) -> Harness {
        let (leaders, observe_rx) = mpsc::channel(8);
        let (events, events_rx) = mpsc::channel(8);
        world.observe = Mutex::new(Some(observe_rx));
        world.events = Mutex::new(Some(events_rx));
        let world = Arc::new(world);

        let vip = Arc::new(Vip::new(
            "eth0",
            config,
            FakeConsensus(world.clone()),
            FakeCluster(world.clone()),
            FakeHandler(world.clone()),
        ));
        let (notifier, notified) = Notifier::channel();
        let token = CancellationToken::new();

        let task = tokio::spawn({
            let vip = vip.clone();
            let token = token.clone();
            async move { vip.run(token, notifier).await }
        });

        Harness {
            world,
            vip,
            leaders,
            events,
            notified,
            token,
            task,
        }
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_leader_churn_releases() {
        let mut h = start(World::default(), config("10.5.0.1", NODE));

        h.notified.recv().await.unwrap();
        assert!(h.vip.is_leader());
        let specs = h.vip.address_specs();
        assert_eq!(specs.len(), 1);
        assert_eq!(specs[0].address, "10.5.0.1/32".parse::<IpNet>().unwrap());
        assert_eq!(specs[0].family, Family::Inet4);
        assert!(specs[0].announce_with_arp);
        assert_eq!(specs[0].link_name, "eth0");

        h.leaders.send(NODE.into()).await.unwrap();
        settle().await;
        assert!(h.vip.is_leader());

        h.leaders.send("node-b".into()).await.unwrap();
        h.notified.recv().await.unwrap();
        assert!(!h.vip.is_leader());
        assert!(h.vip.address_specs().is_empty());

        settle().await;
        let log = h.world.log();
        assert_eq!(
            &log[..7],
            ["ready", "open", "campaign", "acquire", "release", "resign", "close"]
        );
        // Next round is already campaigning.
        assert_eq!(&log[7..], ["ready", "open", "campaign"]);

        h.token.cancel();
        h.task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_resigns_stale_leadership() {
        let world = World {
            stale_leader: Mutex::new(Some(Leader {
                key: "vip-election:10.5.0.1/694d".into(),
                value: NODE.into(),
                revision: 42,
            })),
            ..Default::default()
        };
        let mut h = start(world, config("10.5.0.1", NODE));

        h.notified.recv().await.unwrap();
        assert_eq!(h.world.log()[..4], ["ready", "open", "resign_stale:42", "campaign"]);

        h.token.cancel();
        h.task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_releases_and_resigns() {
        let mut h = start(World::default(), config("10.5.0.1", NODE));
        h.notified.recv().await.unwrap();

        h.token.cancel();
        h.task.await.unwrap();

        assert!(!h.vip.is_leader());
        assert_eq!(
            h.world.log(),
            ["ready", "open", "campaign", "acquire", "release", "resign", "close"]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_failure_resigns_and_retries() {
        let world = World {
            fail_acquire: true,
            ..Default::default()
        };
        let mut h = start(world, config("10.5.0.1", NODE));

        h.notified.recv().await.unwrap();
        assert!(!h.vip.is_leader());
        assert!(h.vip.address_specs().is_empty());

        settle().await;
        assert_eq!(
            h.world.log(),
            ["ready", "open", "campaign", "acquire", "release", "resign", "close"]
        );

        tokio::time::sleep(CAMPAIGN_RETRY_INTERVAL).await;
        assert_eq!(&h.world.log()[7..], ["ready", "open", "campaign"]);

        h.token.cancel();
        h.task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_event_stream_failure_retries() {
        let world = World {
            events_failures: Mutex::new(1),
            ..Default::default()
        };
        let started = tokio::time::Instant::now();
        let mut h = start(world, config("10.5.0.1", NODE));

        h.notified.recv().await.unwrap();
        assert!(h.vip.is_leader());
        assert!(started.elapsed() >= CAMPAIGN_RETRY_INTERVAL);
        assert_eq!(
            h.world.log(),
            ["ready", "open", "close", "ready", "open", "campaign", "acquire"]
        );

        h.token.cancel();
        h.task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_api_server_pod_destroyed() {
        let mut h = start(World::default(), config("10.5.0.1", NODE));
        h.notified.recv().await.unwrap();

        h.events
            .send(ClusterEvent::PodDestroyed {
                id: "kube-system/coredns-abc".into(),
            })
            .await
            .unwrap();
        settle().await;
        assert!(h.vip.is_leader());

        h.events
            .send(ClusterEvent::PodDestroyed {
                id: "kube-system/kube-apiserver-node-a".into(),
            })
            .await
            .unwrap();
        h.notified.recv().await.unwrap();
        assert!(!h.vip.is_leader());

        h.token.cancel();
        h.task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_session_lost() {
        let mut h = start(World::default(), config("10.5.0.1", NODE));
        h.notified.recv().await.unwrap();

        h.world.session_lost.notify_one();
        h.notified.recv().await.unwrap();
        assert!(!h.vip.is_leader());

        h.token.cancel();
        h.task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_node_name_retries() {
        let h = start(World::default(), config("10.5.0.1", ""));

        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert_eq!(h.world.log(), ["ready", "ready"]);

        h.token.cancel();
        h.task.await.unwrap();
    }

    #[test]
    fn test_ipv6_address_spec() {
        let world = Arc::new(World::default());
        let vip = Vip::new(
            "eth0",
            config("2001:db8::5", NODE),
            FakeConsensus(world.clone()),
            FakeCluster(world.clone()),
            FakeHandler(world),
        );
        assert!(vip.address_specs().is_empty());
        assert_eq!(vip.prefix(), "vip/eth0");

        *lock(&vip.leader) = true;
        let specs = vip.address_specs();
        assert_eq!(specs[0].address, "2001:db8::5/128".parse::<IpNet>().unwrap());
        assert_eq!(specs[0].family, Family::Inet6);
        assert!(!specs[0].announce_with_arp);
    }

    #[test]
    fn test_config_json() {
        let config: VipConfig =
            serde_json::from_str(r#"{"sharedIp": "10.5.0.1", "nodeName": "node-a"}"#).unwrap();
        assert!(!config.gratuitous_arp);
        assert_eq!(config.node_name, "node-a");
    }
}
