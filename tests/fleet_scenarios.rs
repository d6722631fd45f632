//! End-to-end rotation and provisioning against recording collaborators

use std::collections::{BTreeMap, VecDeque};
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tempfile::TempDir;
use tokio_test::{assert_err, assert_ok};

use proxyfleet::fleet::{Collaborators, FleetController};
use proxyfleet::hooks::{Notifier, PostProcessor};
use proxyfleet::lb::LoadBalancerReloader;
use proxyfleet::models::{InstanceInfo, RegionId};
use proxyfleet::provider::{InstanceProvisioner, NewInstance};
use proxyfleet::repository::InventoryLock;
use proxyfleet::rotation::RotationPolicy;
use proxyfleet::{Config, FleetError, Result};

#[derive(Default)]
struct RecordingProvisioner {
    calls: Mutex<Vec<String>>,
    pending: Mutex<VecDeque<NewInstance>>,
    live: Mutex<BTreeMap<String, (Ipv4Addr, RegionId)>>,
    fail_create: bool,
    /// Inventory path turned into a directory once `create` succeeds
    break_inventory: Mutex<Option<PathBuf>>,
}

impl RecordingProvisioner {
    fn with_next(addresses: &[(&str, &str)]) -> Self {
        let provisioner = Self::default();
        provisioner.pending.lock().extend(addresses.iter().map(|(addr, id)| NewInstance {
            address: addr.parse().unwrap(),
            instance_id: id.to_string(),
        }));
        provisioner
    }

    fn failing() -> Self {
        Self {
            fail_create: true,
            ..Self::default()
        }
    }

    fn seed(&self, instance_id: &str, address: &str, region: RegionId) {
        self.live
            .lock()
            .insert(instance_id.to_string(), (address.parse().unwrap(), region));
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    fn count(&self, prefix: &str) -> usize {
        self.calls().iter().filter(|c| c.starts_with(prefix)).count()
    }
}

#[async_trait]
impl InstanceProvisioner for RecordingProvisioner {
    async fn create(&self, region: RegionId) -> Result<NewInstance> {
        self.calls.lock().push(format!("create {}", region));
        if self.fail_create {
            return Err(FleetError::Provision("quota exceeded".into()));
        }
        let instance = self
            .pending
            .lock()
            .pop_front()
            .ok_or_else(|| FleetError::Provision("no more addresses".into()))?;
        self.live
            .lock()
            .insert(instance.instance_id.clone(), (instance.address, region));
        if let Some(path) = self.break_inventory.lock().take() {
            std::fs::remove_file(&path).unwrap();
            std::fs::create_dir(&path).unwrap();
            std::fs::write(path.join("occupied"), "").unwrap();
        }
        Ok(instance)
    }

    async fn delete(&self, instance_id: &str) -> Result<()> {
        self.calls.lock().push(format!("delete {}", instance_id));
        self.live.lock().remove(instance_id);
        Ok(())
    }

    async fn list(&self) -> Result<Vec<InstanceInfo>> {
        self.calls.lock().push("list".to_string());
        Ok(self
            .live
            .lock()
            .iter()
            .map(|(id, (address, region))| InstanceInfo {
                address: *address,
                region: *region,
                instance_id: id.clone(),
            })
            .collect())
    }

    async fn get_label(&self, instance_id: &str) -> Result<String> {
        self.calls.lock().push(format!("get_label {}", instance_id));
        Ok(format!("proxy-{}", instance_id))
    }

    async fn set_label(&self, instance_id: &str, label: &str, _group: &str) -> Result<()> {
        self.calls
            .lock()
            .push(format!("set_label {} {}", instance_id, label));
        Ok(())
    }

    fn name(&self) -> &'static str {
        "recording"
    }
}

struct Reloader {
    fail: bool,
    applied: Mutex<Vec<PathBuf>>,
}

impl Reloader {
    fn new(fail: bool) -> Self {
        Self {
            fail,
            applied: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl LoadBalancerReloader for Reloader {
    async fn apply(&self, config_path: &Path) -> Result<()> {
        self.applied.lock().push(config_path.to_path_buf());
        if self.fail {
            return Err(FleetError::LbReload("haproxy refused config".into()));
        }
        Ok(())
    }
}

#[derive(Default)]
struct Recorder {
    bootstrapped: Mutex<Vec<Ipv4Addr>>,
    notified: Mutex<Vec<String>>,
}

#[async_trait]
impl PostProcessor for Recorder {
    async fn bootstrap(&self, address: Ipv4Addr) -> Result<()> {
        self.bootstrapped.lock().push(address);
        Ok(())
    }
}

#[async_trait]
impl Notifier for Recorder {
    async fn send(&self, _subject: &str, body: &str) -> Result<()> {
        self.notified.lock().push(body.to_string());
        Ok(())
    }
}

struct Fixture {
    dir: TempDir,
    provisioner: Arc<RecordingProvisioner>,
    reloader: Arc<Reloader>,
    recorder: Arc<Recorder>,
    config: Arc<Config>,
}

impl Fixture {
    fn new(
        inventory: &str,
        regions: Vec<RegionId>,
        policy: RotationPolicy,
        provisioner: RecordingProvisioner,
        reloader: Reloader,
    ) -> Self {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("proxies.list"), inventory).unwrap();
        std::fs::write(
            dir.path().join("haproxy.cfg.template"),
            "backend proxies\n%(squid_config)s\n",
        )
        .unwrap();

        let mut config = Config::default();
        config.inventory.path = dir.path().join("proxies.list");
        config.load_balancer.template = dir.path().join("haproxy.cfg.template");
        config.load_balancer.config_path = dir.path().join("haproxy.cfg");
        config.rotation.region_ids = regions;
        config.rotation.policy = policy;
        config.rotation.settle_delay_secs = 0;

        Self {
            dir,
            provisioner: Arc::new(provisioner),
            reloader: Arc::new(reloader),
            recorder: Arc::new(Recorder::default()),
            config: Arc::new(config),
        }
    }

    async fn controller(&self) -> FleetController {
        let collaborators = Collaborators {
            provisioner: self.provisioner.clone(),
            reloader: self.reloader.clone(),
            post_processor: self.recorder.clone(),
            notifier: self.recorder.clone(),
        };
        FleetController::open(self.config.clone(), collaborators)
            .await
            .unwrap()
    }

    fn inventory(&self) -> String {
        std::fs::read_to_string(self.dir.path().join("proxies.list")).unwrap()
    }

    fn lb_config(&self) -> String {
        std::fs::read_to_string(self.dir.path().join("haproxy.cfg")).unwrap()
    }
}

const TWO_REGIONS: &str = "10.0.0.1,1,101,1000,1000\n10.0.0.2,2,102,2000,2000\n";

fn addr(s: &str) -> Ipv4Addr {
    s.parse().unwrap()
}

#[tokio::test]
async fn lru_new_region_retires_oldest_outside_target() {
    let fixture = Fixture::new(
        TWO_REGIONS,
        vec![1, 2],
        RotationPolicy::LruNewRegion,
        RecordingProvisioner::with_next(&[("10.0.0.3", "103")]),
        Reloader::new(false),
    );
    let mut controller = fixture.controller().await;

    let report = controller.rotate(Some(1)).await.unwrap();

    assert_eq!(report.new_proxy, addr("10.0.0.3"));
    assert_eq!(report.retiree.as_ref().unwrap().address, addr("10.0.0.2"));
    assert!(report.lb_applied);
    assert!(report.retiree_deleted);
    assert!(report.relabelled);

    let active: Vec<Ipv4Addr> = controller.state().active().iter().map(|r| r.address).collect();
    assert_eq!(active, vec![addr("10.0.0.1"), addr("10.0.0.3")]);

    let inventory = fixture.inventory();
    assert_eq!(inventory.lines().count(), 2);
    assert!(inventory.contains("10.0.0.1,1,101,"));
    assert!(inventory.contains("10.0.0.3,1,103,"));
    assert!(!inventory.contains("10.0.0.2"));

    let lb = fixture.lb_config();
    assert!(lb.contains("10.0.0.1:8321"));
    assert!(lb.contains("10.0.0.3:8321"));
    assert!(!lb.contains("10.0.0.2"));

    assert_eq!(
        fixture.provisioner.calls(),
        vec![
            "create 1",
            "get_label 102",
            "delete 102",
            "set_label 103 proxy-102",
        ]
    );
    assert_eq!(*fixture.recorder.bootstrapped.lock(), vec![addr("10.0.0.3")]);
    assert_eq!(fixture.recorder.notified.lock().len(), 1);
}

#[tokio::test]
async fn provision_from_empty_inventory() {
    let fixture = Fixture::new(
        "",
        vec![3, 7],
        RotationPolicy::LruNewRegion,
        RecordingProvisioner::with_next(&[("10.1.0.1", "201"), ("10.1.0.2", "202")]),
        Reloader::new(false),
    );
    let mut controller = fixture.controller().await;

    let report = controller.provision(2, false).await.unwrap();

    assert_eq!(report.created, 2);
    assert_eq!(report.dropped, 0);
    assert_eq!(report.active, 2);
    assert_eq!(fixture.provisioner.count("create"), 2);
    assert_eq!(fixture.provisioner.count("set_label"), 2);
    assert_eq!(fixture.provisioner.count("delete"), 0);

    let calls = fixture.provisioner.calls();
    assert!(calls.contains(&"create 3".to_string()));
    assert!(calls.contains(&"create 7".to_string()));
    assert!(calls.contains(&"set_label 201 proxy1".to_string()));
    assert!(calls.contains(&"set_label 202 proxy2".to_string()));

    assert_eq!(controller.state().active_count(), 2);
    assert_eq!(fixture.inventory().lines().count(), 2);
}

#[tokio::test]
async fn add_continues_label_numbering() {
    let fixture = Fixture::new(
        TWO_REGIONS,
        vec![1, 2, 3],
        RotationPolicy::Lru,
        RecordingProvisioner::with_next(&[("10.0.0.3", "103")]),
        Reloader::new(false),
    );
    fixture.provisioner.seed("101", "10.0.0.1", 1);
    fixture.provisioner.seed("102", "10.0.0.2", 2);
    let mut controller = fixture.controller().await;

    let report = controller.provision(1, true).await.unwrap();

    assert_eq!(report.created, 1);
    assert_eq!(report.active, 3);
    assert_eq!(fixture.provisioner.count("delete"), 0);
    assert!(fixture
        .provisioner
        .calls()
        .contains(&"set_label 103 proxy3".to_string()));
    assert!(fixture.provisioner.calls().contains(&"create 3".to_string()));
}

#[tokio::test]
async fn provisioning_failure_leaves_inventory_untouched() {
    let fixture = Fixture::new(
        TWO_REGIONS,
        vec![1, 2],
        RotationPolicy::LruNewRegion,
        RecordingProvisioner::failing(),
        Reloader::new(false),
    );
    let mut controller = fixture.controller().await;

    let err = assert_err!(controller.rotate(None).await);

    assert!(matches!(err, FleetError::Provision(_)));
    assert_eq!(fixture.inventory(), TWO_REGIONS);
    assert_eq!(fixture.provisioner.count("delete"), 0);
    assert!(fixture.reloader.applied.lock().is_empty());
    assert_eq!(controller.state().active_count(), 2);
}

#[tokio::test]
async fn unwritable_inventory_rolls_back_new_proxy() {
    let fixture = Fixture::new(
        TWO_REGIONS,
        vec![1, 2],
        RotationPolicy::Lru,
        RecordingProvisioner::with_next(&[("10.0.0.3", "103")]),
        Reloader::new(false),
    );
    fixture.provisioner.seed("101", "10.0.0.1", 1);
    fixture.provisioner.seed("102", "10.0.0.2", 2);
    *fixture.provisioner.break_inventory.lock() = Some(fixture.dir.path().join("proxies.list"));
    let mut controller = fixture.controller().await;

    assert_err!(controller.rotate(Some(1)).await);

    assert_eq!(fixture.provisioner.calls(), vec!["create 1", "delete 103"]);
    assert!(!fixture.provisioner.live.lock().contains_key("103"));
    assert!(fixture.reloader.applied.lock().is_empty());
    assert!(fixture.recorder.bootstrapped.lock().is_empty());

    let state = controller.state();
    assert_eq!(state.active_count(), 2);
    assert!(state.get(&addr("10.0.0.1")).unwrap().active);
    assert!(state.get(&addr("10.0.0.2")).unwrap().active);
    assert!(state.get(&addr("10.0.0.3")).is_none());
}

#[tokio::test]
async fn one_shot_fails_fast_when_inventory_locked() {
    let fixture = Fixture::new(
        TWO_REGIONS,
        vec![1, 2],
        RotationPolicy::Lru,
        RecordingProvisioner::with_next(&[("10.0.0.3", "103")]),
        Reloader::new(false),
    );
    let mut controller = fixture.controller().await.fail_when_locked();
    let held = assert_ok!(InventoryLock::try_acquire(&fixture.config.inventory.path));

    let err = assert_err!(controller.rotate(None).await);
    assert!(matches!(err, FleetError::InventoryLocked(_)));
    assert_eq!(err.exit_code(), 75);
    assert!(fixture.provisioner.calls().is_empty());

    drop(held);
    assert_ok!(controller.rotate(Some(1)).await);
}

#[tokio::test]
async fn lb_failure_skips_retirement() {
    let fixture = Fixture::new(
        TWO_REGIONS,
        vec![1, 2],
        RotationPolicy::Lru,
        RecordingProvisioner::with_next(&[("10.0.0.3", "103")]),
        Reloader::new(true),
    );
    let mut controller = fixture.controller().await;

    let report = controller.rotate(Some(2)).await.unwrap();

    assert!(!report.lb_applied);
    assert!(!report.retiree_deleted);
    assert_eq!(fixture.provisioner.count("delete"), 0);
    assert_eq!(fixture.reloader.applied.lock().len(), 1);

    // the new proxy is recorded even though the balancer never picked it up
    assert!(fixture.inventory().contains("10.0.0.3,2,103,"));
    assert_eq!(*fixture.recorder.bootstrapped.lock(), vec![addr("10.0.0.3")]);
}

#[tokio::test]
async fn new_region_without_candidate_grows_fleet() {
    let fixture = Fixture::new(
        "10.0.0.1,4,101,1000,1000\n",
        vec![4],
        RotationPolicy::NewRegion,
        RecordingProvisioner::with_next(&[("10.0.0.5", "105")]),
        Reloader::new(false),
    );
    let mut controller = fixture.controller().await;

    let report = controller.rotate(None).await.unwrap();

    assert_eq!(report.region, 4);
    assert!(report.retiree.is_none());
    assert_eq!(controller.state().active_count(), 2);
    assert_eq!(fixture.inventory().lines().count(), 2);
    assert_eq!(fixture.provisioner.count("delete"), 0);
}

#[tokio::test]
async fn placeholder_instance_is_never_deleted() {
    let fixture = Fixture::new(
        "10.0.0.1,1,0,1000,1000\n10.0.0.2,1,102,2000,2000\n",
        vec![1, 2],
        RotationPolicy::Lru,
        RecordingProvisioner::with_next(&[("10.0.0.3", "103")]),
        Reloader::new(false),
    );
    let mut controller = fixture.controller().await;

    let report = controller.rotate(Some(2)).await.unwrap();

    assert_eq!(report.retiree.unwrap().address, addr("10.0.0.1"));
    assert!(!report.retiree_deleted);
    assert_eq!(fixture.provisioner.count("delete"), 0);
    assert!(!fixture.inventory().contains("10.0.0.1"));
}

#[tokio::test]
async fn drop_deletes_everything_but_keeps_inventory() {
    let fixture = Fixture::new(
        TWO_REGIONS,
        vec![1, 2],
        RotationPolicy::Lru,
        RecordingProvisioner::default(),
        Reloader::new(false),
    );
    fixture.provisioner.seed("101", "10.0.0.1", 1);
    fixture.provisioner.seed("102", "10.0.0.2", 2);
    let mut controller = fixture.controller().await;

    let dropped = assert_ok!(controller.drop_all().await);
    assert_eq!(dropped, 2);
    assert_eq!(fixture.provisioner.count("delete"), 2);
    assert_eq!(fixture.inventory(), TWO_REGIONS);
}

#[test]
fn write_lb_config_renders_inventory() {
    let fixture = Fixture::new(
        TWO_REGIONS,
        vec![1, 2],
        RotationPolicy::Lru,
        RecordingProvisioner::default(),
        Reloader::new(false),
    );

    tokio_test::block_on(async {
        let mut controller = fixture.controller().await;
        assert_ok!(controller.write_lb_config().await);
    });

    let lb = fixture.lb_config();
    assert!(lb.starts_with("backend proxies\n"));
    assert_eq!(lb.matches("check inter 10000 rise 2 fall 5").count(), 2);
    assert_eq!(fixture.reloader.applied.lock().len(), 1);
}

#[tokio::test]
async fn missing_inventory_is_fatal() {
    let fixture = Fixture::new(
        "",
        vec![1],
        RotationPolicy::Lru,
        RecordingProvisioner::default(),
        Reloader::new(false),
    );
    std::fs::remove_file(fixture.dir.path().join("proxies.list")).unwrap();

    let collaborators = Collaborators {
        provisioner: fixture.provisioner.clone(),
        reloader: fixture.reloader.clone(),
        post_processor: fixture.recorder.clone(),
        notifier: fixture.recorder.clone(),
    };
    let err = FleetController::open(fixture.config.clone(), collaborators)
        .await
        .err()
        .unwrap();
    assert!(err.is_fatal());
}
