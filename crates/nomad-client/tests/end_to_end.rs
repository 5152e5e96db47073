//! Client runs against in-memory reference servers.

use std::sync::Arc;

use chrono::Utc;
use nomad_client::{
    Consistency, ForcedOutcome, NomadClient, NomadEndpoint, NomadEvent, RecordingReceiver,
};
use nomad_server::{NomadServerImpl, SettingsApplicator};
use nomad_types::{
    ChangeUuid, CommitMessage, HostPort, MutativeMessageCount, NomadServer, PrepareMessage,
    SimpleChange, Version,
};

type Server = NomadServerImpl<SimpleChange, SettingsApplicator>;

struct Cluster {
    servers: Vec<Arc<Server>>,
    client: NomadClient<SimpleChange>,
}

impl Cluster {
    fn new(size: u16) -> Self {
        Self::with_applicators((0..size).map(|_| SettingsApplicator::new()).collect())
    }

    fn with_applicators(applicators: Vec<SettingsApplicator>) -> Self {
        let servers: Vec<Arc<Server>> = applicators
            .into_iter()
            .map(|applicator| Arc::new(NomadServerImpl::new(applicator)))
            .collect();
        let endpoints = servers
            .iter()
            .zip(9410u16..)
            .map(|(server, port)| {
                let server: Arc<dyn NomadServer<SimpleChange>> = Arc::clone(server) as _;
                NomadEndpoint::new(HostPort::new("localhost", port), server)
            })
            .collect();
        let client = NomadClient::new(endpoints, "ops-box", "alice").unwrap();
        Self { servers, client }
    }

    async fn apply(&self, setting: &str) -> (Consistency, RecordingReceiver<SimpleChange>) {
        let results = RecordingReceiver::new();
        let consistency = self
            .client
            .try_apply_change(&results, setting_change(setting))
            .await
            .unwrap();
        (consistency, results)
    }

    async fn setting(&self, index: usize, key: &str) -> Option<String> {
        self.servers[index]
            .current_committed_config()
            .await
            .unwrap()
            .and_then(|config| config.get(key).cloned())
    }
}

fn setting_change(setting: &str) -> SimpleChange {
    SimpleChange::new(setting, format!("set {setting}"))
}

/// Prepares a change on one server the way an interrupted client would.
async fn prepare_behind_clients_back(server: &Server, change_uuid: ChangeUuid, setting: &str) {
    let discovered = server.discover().await.unwrap();
    let response = server
        .prepare(PrepareMessage {
            expected_mutative_message_count: discovered.mutative_message_count,
            mutation_host: "crashed-box".into(),
            mutation_user: "mallory".into(),
            mutation_timestamp: Utc::now(),
            change_uuid,
            version: discovered.highest_version.next(),
            change: setting_change(setting),
        })
        .await
        .unwrap();
    assert!(response.is_accepted());
}

async fn commit_behind_clients_back(server: &Server, change_uuid: ChangeUuid) {
    let discovered = server.discover().await.unwrap();
    let response = server
        .commit(CommitMessage {
            expected_mutative_message_count: discovered.mutative_message_count,
            mutation_host: "crashed-box".into(),
            mutation_user: "mallory".into(),
            mutation_timestamp: Utc::now(),
            change_uuid,
        })
        .await
        .unwrap();
    assert!(response.is_accepted());
}

#[tokio::test]
async fn change_is_committed_on_every_server() {
    let cluster = Cluster::new(3);

    let (consistency, results) = cluster.apply("log.level=debug").await;

    assert_eq!(consistency, Consistency::Consistent);
    assert_eq!(results.consistency(), Some(Consistency::Consistent));
    for (index, server) in cluster.servers.iter().enumerate() {
        assert_eq!(cluster.setting(index, "log.level").await.as_deref(), Some("debug"));
        assert!(!server.has_incomplete_change().await);
        assert_eq!(server.applicator().applied(), vec![setting_change("log.level=debug")]);

        // One prepare and one commit.
        let snapshot = server.snapshot().await;
        assert_eq!(snapshot.mutative_message_count(), MutativeMessageCount::new(2));
        assert_eq!(snapshot.current_version(), Version::new(1));
    }
}

#[tokio::test]
async fn successive_changes_build_on_each_other() {
    let cluster = Cluster::new(2);

    assert_eq!(cluster.apply("region=eu").await.0, Consistency::Consistent);
    assert_eq!(cluster.apply("log.level=warn").await.0, Consistency::Consistent);
    assert_eq!(cluster.apply("log.level=").await.0, Consistency::Consistent);

    for index in 0..2 {
        assert_eq!(cluster.setting(index, "region").await.as_deref(), Some("eu"));
        assert_eq!(cluster.setting(index, "log.level").await, None);
        let snapshot = cluster.servers[index].snapshot().await;
        assert_eq!(snapshot.current_version(), Version::new(3));
        assert_eq!(snapshot.mutative_message_count(), MutativeMessageCount::new(6));
    }

    let results = RecordingReceiver::new();
    let consistency = cluster.client.try_discovery(&results).await.unwrap();
    assert_eq!(consistency, Consistency::Consistent);
}

#[tokio::test]
async fn malformed_change_is_refused_everywhere() {
    let cluster = Cluster::new(2);

    let (consistency, results) = cluster.apply("no-equals-sign").await;

    assert_eq!(consistency, Consistency::Consistent);
    let trail = results.trail();
    assert!(trail.contains(&"start_rollback".to_string()));
    assert!(!trail.iter().any(|event| event.starts_with("rolled_back")));
    assert_eq!(cluster.setting(0, "no-equals-sign").await, None);
    assert!(cluster.servers[0].applicator().applied().is_empty());
}

#[tokio::test]
async fn change_refused_by_one_server_is_rolled_back_on_the_others() {
    let cluster = Cluster::with_applicators(vec![
        SettingsApplicator::new(),
        SettingsApplicator::new(),
        SettingsApplicator::new().with_read_only_key("region"),
    ]);
    assert_eq!(cluster.apply("region=eu").await.0, Consistency::Consistent);

    let (consistency, results) = cluster.apply("region=us").await;

    assert_eq!(consistency, Consistency::Consistent);
    let refused = "prepare_change_unacceptable(localhost:9412, setting 'region' is read-only)";
    assert!(results.trail().contains(&refused.to_string()));
    for (index, server) in cluster.servers.iter().enumerate() {
        assert_eq!(cluster.setting(index, "region").await.as_deref(), Some("eu"));
        assert!(!server.has_incomplete_change().await);
    }
}

#[tokio::test]
async fn abandoned_prepare_blocks_changes_until_recovered() {
    let cluster = Cluster::new(3);
    let abandoned = ChangeUuid::random();
    prepare_behind_clients_back(&cluster.servers[0], abandoned, "region=ap").await;

    let (consistency, results) = cluster.apply("region=eu").await;
    assert_eq!(consistency, Consistency::UnknownButNoChange);
    let blocked = "discover_already_prepared(localhost:9410, crashed-box, mallory)";
    assert!(results.trail().contains(&blocked.to_string()));

    let discovery = RecordingReceiver::new();
    assert_eq!(
        cluster.client.try_discovery(&discovery).await.unwrap(),
        Consistency::MayNeedRecovery
    );

    let recovery = RecordingReceiver::new();
    let consistency = cluster.client.try_recovery(&recovery, 3, None).await.unwrap();
    assert_eq!(consistency, Consistency::Consistent);
    assert!(recovery.trail().contains(&"rolled_back(localhost:9410)".to_string()));
    assert!(!cluster.servers[0].has_incomplete_change().await);

    let (consistency, _) = cluster.apply("region=eu").await;
    assert_eq!(consistency, Consistency::Consistent);
    for index in 0..3 {
        assert_eq!(cluster.setting(index, "region").await.as_deref(), Some("eu"));
    }
}

#[tokio::test]
async fn recovery_finishes_a_partially_committed_change() {
    let cluster = Cluster::new(3);
    let change_uuid = ChangeUuid::random();
    for server in &cluster.servers {
        prepare_behind_clients_back(server, change_uuid, "region=eu").await;
    }
    commit_behind_clients_back(&cluster.servers[0], change_uuid).await;

    let results = RecordingReceiver::new();
    let consistency = cluster.client.try_recovery(&results, 3, None).await.unwrap();

    assert_eq!(consistency, Consistency::Consistent);
    let committed: Vec<_> = results
        .events()
        .into_iter()
        .filter_map(|event| match event {
            NomadEvent::Committed { server } => Some(server),
            _ => None,
        })
        .collect();
    assert_eq!(
        committed,
        vec![HostPort::new("localhost", 9411), HostPort::new("localhost", 9412)]
    );
    for index in 0..3 {
        assert_eq!(cluster.setting(index, "region").await.as_deref(), Some("eu"));
    }
}

#[tokio::test]
async fn recovery_with_unreached_nodes_needs_an_operator() {
    let cluster = Cluster::new(2);
    let change_uuid = ChangeUuid::random();
    prepare_behind_clients_back(&cluster.servers[1], change_uuid, "region=eu").await;

    let results = RecordingReceiver::new();
    let consistency = cluster.client.try_recovery(&results, 3, None).await.unwrap();
    assert_eq!(consistency, Consistency::MayNeedRecovery);
    assert!(cluster.servers[1].has_incomplete_change().await);

    let results = RecordingReceiver::new();
    let consistency = cluster
        .client
        .try_recovery(&results, 3, Some(ForcedOutcome::Commit))
        .await
        .unwrap();
    assert_eq!(consistency, Consistency::Consistent);
    assert_eq!(cluster.setting(1, "region").await.as_deref(), Some("eu"));
    assert!(!cluster.servers[1].has_incomplete_change().await);
}

#[tokio::test]
async fn forced_rollback_clears_different_abandoned_changes() {
    let cluster = Cluster::new(2);
    prepare_behind_clients_back(&cluster.servers[0], ChangeUuid::random(), "region=eu").await;
    prepare_behind_clients_back(&cluster.servers[1], ChangeUuid::random(), "region=us").await;

    let results = RecordingReceiver::new();
    let consistency = cluster.client.try_recovery(&results, 2, None).await.unwrap();
    assert_eq!(consistency, Consistency::MayNeedRecovery);

    let results = RecordingReceiver::new();
    let consistency = cluster
        .client
        .try_recovery(&results, 2, Some(ForcedOutcome::Rollback))
        .await
        .unwrap();
    assert_eq!(consistency, Consistency::Consistent);
    for (index, server) in cluster.servers.iter().enumerate() {
        assert!(!server.has_incomplete_change().await);
        assert_eq!(cluster.setting(index, "region").await, None);
    }
}
