// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Test-only fake collaborators (not added to core)
//!
//! Scripted stand-ins for the container engine, image cache, dependency
//! cache, and reader. They only use the public delegate traits, so the
//! tests exercise exactly the seams production drivers plug into.

#![allow(dead_code)]

use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::Mutex;

use worklib::core::{
    BundleInfo, ContainerHandle, ContainerRuntime, ContainerSpec, ContainerStats, DependencyKey,
    DependencyManager, DependencyStatus, DependencySpec, ImageManager, ImageStatus, Reader,
    ReplyFn, ReplyHeaders, Result, RunManager, RunManagerBuilder, RunManagerConfig, RunResources,
    RunState, WorkerError, WorkerRun,
};

// =============================================================================
// Fake container runtime
// =============================================================================

pub struct FakeContainer {
    pub spec: ContainerSpec,
    pub started: bool,
    pub running: bool,
    pub exitcode: Option<i64>,
    pub memory_bytes: u64,
    /// Whether `stop` actually terminates this container.
    pub honors_stop: bool,
}

#[derive(Default)]
struct FakeRuntimeState {
    next_id: u64,
    containers: HashMap<String, FakeContainer>,
    networks: HashMap<String, bool>,
    removed: Vec<String>,
    stop_calls: Vec<String>,
}

/// In-memory container engine with scriptable exits.
pub struct FakeContainerRuntime {
    state: Mutex<FakeRuntimeState>,
    pub container_ip: IpAddr,
}

impl FakeContainerRuntime {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(FakeRuntimeState::default()),
            container_ip: IpAddr::V4(Ipv4Addr::LOCALHOST),
        })
    }

    /// Container id of the run with this UUID, when one was created.
    pub fn container_id_for(&self, uuid: &str) -> Option<String> {
        let state = self.state.lock();
        state
            .containers
            .iter()
            .find(|(_, c)| c.spec.name.contains(uuid))
            .map(|(id, _)| id.clone())
    }

    pub fn container_count(&self) -> usize {
        self.state.lock().containers.len()
    }

    pub fn spec_for(&self, uuid: &str) -> Option<ContainerSpec> {
        let state = self.state.lock();
        state
            .containers
            .values()
            .find(|c| c.spec.name.contains(uuid))
            .map(|c| c.spec.clone())
    }

    /// Terminate the container of the given run with an exit code.
    pub fn finish(&self, uuid: &str, exitcode: i64) {
        let mut state = self.state.lock();
        for container in state.containers.values_mut() {
            if container.spec.name.contains(uuid) {
                container.running = false;
                container.exitcode = Some(exitcode);
            }
        }
    }

    /// Make the run's container ignore stop requests (a hung process).
    pub fn set_ignores_stop(&self, uuid: &str) {
        let mut state = self.state.lock();
        for container in state.containers.values_mut() {
            if container.spec.name.contains(uuid) {
                container.honors_stop = false;
            }
        }
    }

    /// Remove the container behind the manager's back.
    pub fn remove_externally(&self, id: &str) {
        let mut state = self.state.lock();
        state.containers.remove(id);
    }

    pub fn was_removed(&self, id: &str) -> bool {
        self.state.lock().removed.iter().any(|r| r == id)
    }

    pub fn stop_calls(&self) -> usize {
        self.state.lock().stop_calls.len()
    }

    pub fn network_names(&self) -> Vec<String> {
        let state = self.state.lock();
        let mut names: Vec<String> = state.networks.keys().cloned().collect();
        names.sort();
        names
    }

    /// Pre-create a network, as a concurrent worker on the same host would.
    pub fn preexisting_network(&self, name: &str, internal: bool) {
        self.state.lock().networks.insert(name.to_string(), internal);
    }
}

impl ContainerRuntime for FakeContainerRuntime {
    fn create_container(&self, spec: &ContainerSpec) -> Result<String> {
        let mut state = self.state.lock();
        state.next_id += 1;
        let id = format!("cid-{}", state.next_id);
        state.containers.insert(
            id.clone(),
            FakeContainer {
                spec: spec.clone(),
                started: false,
                running: false,
                exitcode: None,
                memory_bytes: 0,
                honors_stop: true,
            },
        );
        Ok(id)
    }

    fn start(&self, id: &str) -> Result<()> {
        let mut state = self.state.lock();
        let container = state
            .containers
            .get_mut(id)
            .ok_or_else(|| WorkerError::ContainerNotFound(id.to_string()))?;
        container.started = true;
        container.running = true;
        Ok(())
    }

    fn stop(&self, id: &str, _grace: Duration) -> Result<Option<i64>> {
        let mut state = self.state.lock();
        state.stop_calls.push(id.to_string());
        let container = state
            .containers
            .get_mut(id)
            .ok_or_else(|| WorkerError::ContainerNotFound(id.to_string()))?;
        if container.honors_stop && container.running {
            container.running = false;
            container.exitcode = Some(137);
        }
        Ok(container.exitcode)
    }

    fn inspect(&self, id: &str) -> Result<ContainerStats> {
        let state = self.state.lock();
        let container = state
            .containers
            .get(id)
            .ok_or_else(|| WorkerError::ContainerNotFound(id.to_string()))?;
        Ok(ContainerStats {
            running: container.running,
            exitcode: container.exitcode,
            cpu_total: Duration::from_millis(30),
            cpu_user: Duration::from_millis(20),
            cpu_system: Duration::from_millis(10),
            memory_max_bytes: container.memory_bytes,
        })
    }

    fn ip_on_network(&self, _network: &str, id: &str) -> Result<IpAddr> {
        let state = self.state.lock();
        if !state.containers.contains_key(id) {
            return Err(WorkerError::ContainerNotFound(id.to_string()));
        }
        Ok(self.container_ip)
    }

    fn remove(&self, id: &str, _force: bool) -> Result<()> {
        let mut state = self.state.lock();
        if state.containers.remove(id).is_none() {
            return Err(WorkerError::ContainerNotFound(id.to_string()));
        }
        state.removed.push(id.to_string());
        Ok(())
    }

    fn lookup(&self, id: &str) -> Result<Option<ContainerHandle>> {
        let state = self.state.lock();
        Ok(state
            .containers
            .contains_key(id)
            .then(|| ContainerHandle::new(id)))
    }

    fn network_create(&self, name: &str, internal: bool) -> Result<String> {
        let mut state = self.state.lock();
        if state.networks.contains_key(name) {
            return Err(WorkerError::Runtime(format!(
                "network {} already exists",
                name
            )));
        }
        state.networks.insert(name.to_string(), internal);
        Ok(name.to_string())
    }

    fn network_lookup(&self, name: &str) -> Result<Option<String>> {
        let state = self.state.lock();
        Ok(state.networks.contains_key(name).then(|| name.to_string()))
    }

    fn network_remove(&self, name: &str) -> Result<()> {
        let mut state = self.state.lock();
        if state.networks.remove(name).is_none() {
            return Err(WorkerError::NetworkNotFound(name.to_string()));
        }
        Ok(())
    }
}

// =============================================================================
// Fake image manager
// =============================================================================

/// Image cache whose pulls resolve according to the test script.
pub struct FakeImageManager {
    statuses: Mutex<HashMap<String, ImageStatus>>,
    resolve_on_request: bool,
}

impl FakeImageManager {
    /// Every requested image becomes ready immediately.
    pub fn instant() -> Arc<Self> {
        Arc::new(Self {
            statuses: Mutex::new(HashMap::new()),
            resolve_on_request: true,
        })
    }

    /// Requested images stay pending until the test resolves them.
    pub fn manual() -> Arc<Self> {
        Arc::new(Self {
            statuses: Mutex::new(HashMap::new()),
            resolve_on_request: false,
        })
    }

    pub fn resolve(&self, image_ref: &str) {
        self.statuses.lock().insert(
            image_ref.to_string(),
            ImageStatus::Ready {
                digest: format!("sha256:{}", image_ref),
            },
        );
    }

    pub fn fail(&self, image_ref: &str, message: &str) {
        self.statuses.lock().insert(
            image_ref.to_string(),
            ImageStatus::Failed {
                message: message.to_string(),
            },
        );
    }
}

impl ImageManager for FakeImageManager {
    fn start(&self) {}
    fn stop(&self) {}

    fn request(&self, image_ref: &str) {
        let mut statuses = self.statuses.lock();
        statuses.entry(image_ref.to_string()).or_insert_with(|| {
            if self.resolve_on_request {
                ImageStatus::Ready {
                    digest: format!("sha256:{}", image_ref),
                }
            } else {
                ImageStatus::Pending
            }
        });
    }

    fn status(&self, image_ref: &str) -> ImageStatus {
        self.statuses
            .lock()
            .get(image_ref)
            .cloned()
            .unwrap_or(ImageStatus::Pending)
    }
}

// =============================================================================
// Fake dependency manager
// =============================================================================

#[derive(Default)]
struct FakeDependencyState {
    statuses: HashMap<DependencyKey, DependencyStatus>,
    requests: HashMap<DependencyKey, usize>,
    releases: HashMap<DependencyKey, usize>,
}

/// Dependency cache that materializes everything instantly under a fake
/// cache root and counts request/release pairs.
pub struct FakeDependencyManager {
    state: Mutex<FakeDependencyState>,
    cache_root: PathBuf,
}

impl FakeDependencyManager {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(FakeDependencyState::default()),
            cache_root: PathBuf::from("/fake-cache"),
        })
    }

    pub fn request_count(&self, key: &DependencyKey) -> usize {
        self.state.lock().requests.get(key).copied().unwrap_or(0)
    }

    pub fn release_count(&self, key: &DependencyKey) -> usize {
        self.state.lock().releases.get(key).copied().unwrap_or(0)
    }
}

impl DependencyManager for FakeDependencyManager {
    fn start(&self) {}
    fn stop(&self) {}

    fn request(&self, parent_uuid: &str, parent_path: &str) -> DependencyKey {
        let key = DependencyKey {
            parent_uuid: parent_uuid.to_string(),
            parent_path: parent_path.to_string(),
        };
        let mut state = self.state.lock();
        *state.requests.entry(key.clone()).or_insert(0) += 1;
        let local_path = self.cache_root.join(parent_uuid);
        state
            .statuses
            .entry(key.clone())
            .or_insert(DependencyStatus::Ready { local_path });
        key
    }

    fn status(&self, key: &DependencyKey) -> DependencyStatus {
        self.state
            .lock()
            .statuses
            .get(key)
            .cloned()
            .unwrap_or(DependencyStatus::Pending)
    }

    fn release(&self, key: &DependencyKey) {
        let mut state = self.state.lock();
        *state.releases.entry(key.clone()).or_insert(0) += 1;
    }

    fn all_dependencies(&self) -> Vec<DependencyKey> {
        self.state.lock().statuses.keys().cloned().collect()
    }
}

// =============================================================================
// Fake reader
// =============================================================================

/// Reader that serves file contents straight off the bundle path.
pub struct FakeReader;

impl Reader for FakeReader {
    fn read(
        &self,
        run_state: &RunState,
        path: &str,
        _args: &HashMap<String, String>,
        reply: ReplyFn,
    ) {
        match std::fs::read(run_state.bundle_path.join(path)) {
            Ok(body) => reply(None, ReplyHeaders::new(), body),
            Err(e) => reply(Some(e.into()), ReplyHeaders::new(), Vec::new()),
        }
    }
}

// =============================================================================
// Harness
// =============================================================================

pub struct TestHarness {
    pub manager: Arc<RunManager>,
    pub runtime: Arc<FakeContainerRuntime>,
    pub images: Arc<FakeImageManager>,
    pub dependencies: Arc<FakeDependencyManager>,
    pub uploads: Arc<AtomicUsize>,
    pub work_dir: tempfile::TempDir,
    pub config: RunManagerConfig,
}

impl TestHarness {
    pub fn report_for(&self, uuid: &str) -> Option<WorkerRun> {
        self.manager.all_runs().into_iter().find(|r| r.uuid == uuid)
    }

    /// Tick until `pred` holds, failing the test after `max_ticks`.
    pub fn tick_until(&self, max_ticks: usize, pred: impl Fn(&Self) -> bool) {
        for _ in 0..max_ticks {
            if pred(self) {
                return;
            }
            self.manager.process_runs();
        }
        assert!(pred(self), "condition not reached within {} ticks", max_ticks);
    }
}

/// Route `RUST_LOG`-filtered tracing output through the test harness once.
fn init_tracing() {
    static INIT: std::sync::Once = std::sync::Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

pub fn build_harness(
    images: Arc<FakeImageManager>,
    configure: impl FnOnce(RunManagerConfig) -> RunManagerConfig,
) -> TestHarness {
    init_tracing();
    let work_dir = tempfile::tempdir().expect("tempdir");
    let runtime = FakeContainerRuntime::new();
    let dependencies = FakeDependencyManager::new();
    let uploads = Arc::new(AtomicUsize::new(0));

    let config = configure(RunManagerConfig::new(
        "test-worker",
        work_dir.path(),
        work_dir.path().join("state.json"),
    ));

    let upload_counter = Arc::clone(&uploads);
    let manager = RunManagerBuilder::new(config.clone())
        .with_runtime(runtime.clone() as Arc<dyn ContainerRuntime>)
        .with_image_manager(images.clone() as Arc<dyn ImageManager>)
        .with_dependency_manager(dependencies.clone() as Arc<dyn DependencyManager>)
        .with_reader(Arc::new(FakeReader))
        .with_upload_bundle_contents(move |_uuid| {
            upload_counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .build()
        .expect("build manager");

    TestHarness {
        manager: Arc::new(manager),
        runtime,
        images,
        dependencies,
        uploads,
        work_dir,
        config,
    }
}

/// Build a second manager over the same fakes, snapshot file, and config,
/// as a worker restart after a crash would.
pub fn rebuild_manager(h: &TestHarness) -> Arc<RunManager> {
    let upload_counter = Arc::clone(&h.uploads);
    let manager = RunManagerBuilder::new(h.config.clone())
        .with_runtime(h.runtime.clone() as Arc<dyn ContainerRuntime>)
        .with_image_manager(h.images.clone() as Arc<dyn ImageManager>)
        .with_dependency_manager(h.dependencies.clone() as Arc<dyn DependencyManager>)
        .with_reader(Arc::new(FakeReader))
        .with_upload_bundle_contents(move |_uuid| {
            upload_counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .build()
        .expect("rebuild manager");
    Arc::new(manager)
}

pub fn bundle(uuid: &str) -> BundleInfo {
    BundleInfo {
        uuid: uuid.to_string(),
        location: None,
        dependencies: vec![],
    }
}

pub fn bundle_with_dependency(uuid: &str, parent_uuid: &str, child_path: &str) -> BundleInfo {
    BundleInfo {
        uuid: uuid.to_string(),
        location: None,
        dependencies: vec![DependencySpec {
            parent_uuid: parent_uuid.to_string(),
            parent_path: String::new(),
            child_path: child_path.to_string(),
        }],
    }
}

pub fn resources(cpus: usize, gpus: usize, image: &str) -> RunResources {
    RunResources {
        cpus,
        gpus,
        memory_bytes: 1 << 30,
        disk_bytes: 0,
        network: false,
        docker_image: image.to_string(),
        command: "echo hi".to_string(),
    }
}
