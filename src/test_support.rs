use crate::coordination::memory::{MemoryClient, MemoryService, SessionId};
use crate::coordination::{
    AclEntry, CoordResult, Coordinator, ListenerId, NodeWatcher, SessionListener, path,
};
use crate::error::Result;
use crate::locks::QueueLock;
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

pub(crate) const BASE: &str = "/locks/shared";

/// Upper bound for anything a test waits on.
pub(crate) const PATIENCE: Duration = Duration::from_secs(10);

/// Poll `condition` until it holds or `timeout` passes.
pub(crate) fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(2));
    }
    condition()
}

/// One competing process: its own session and a lock handle on `BASE`.
pub(crate) struct Contender {
    pub(crate) lock: Arc<QueueLock>,
    pub(crate) session: SessionId,
}

impl Contender {
    pub(crate) fn new(service: &MemoryService) -> Self {
        let client = service.connect();
        let session = client.session_id();
        let lock = QueueLock::new(Arc::new(client), BASE, AclEntry::open_unsafe()).unwrap();
        Self {
            lock: Arc::new(lock),
            session,
        }
    }

    /// Full path of this contender's candidate node.
    pub(crate) fn node_path(&self) -> String {
        path::join(BASE, &self.lock.candidate_id().unwrap())
    }

    /// Call `lock()` on a background thread.
    pub(crate) fn spawn_lock(&self) -> JoinHandle<Result<()>> {
        let lock = Arc::clone(&self.lock);
        thread::spawn(move || lock.lock())
    }

    /// Wait until this contender is queued behind `predecessor`.
    pub(crate) fn wait_watching(&self, predecessor: &Contender) -> bool {
        let expected = predecessor.lock.candidate_id();
        wait_until(PATIENCE, || {
            expected.is_some() && self.lock.watched_sibling_id() == expected
        })
    }
}

type Hook = Box<dyn FnOnce(&MemoryService, &str) + Send>;

/// Coordinator wrapper that lets a test reshape individual replies.
pub(crate) struct HookedClient {
    inner: MemoryClient,
    before_watch: Mutex<Option<Hook>>,
    hide_children: bool,
}

impl HookedClient {
    pub(crate) fn new(inner: MemoryClient) -> Self {
        Self {
            inner,
            before_watch: Mutex::new(None),
            hide_children: false,
        }
    }

    /// Run `hook` (once) just before the next watch is armed.
    pub(crate) fn before_next_watch(self, hook: Hook) -> Self {
        *self.before_watch.lock().unwrap() = Some(hook);
        self
    }

    /// Report every parent as childless.
    pub(crate) fn hiding_children(mut self) -> Self {
        self.hide_children = true;
        self
    }
}

impl Coordinator for HookedClient {
    fn create_sequential_ephemeral(
        &self,
        parent: &str,
        name_prefix: &str,
        acl: &[AclEntry],
    ) -> CoordResult<String> {
        self.inner.create_sequential_ephemeral(parent, name_prefix, acl)
    }

    fn create_persistent(&self, node_path: &str, acl: &[AclEntry]) -> CoordResult<()> {
        self.inner.create_persistent(node_path, acl)
    }

    fn exists(&self, node_path: &str) -> CoordResult<bool> {
        self.inner.exists(node_path)
    }

    fn delete(&self, node_path: &str) -> CoordResult<()> {
        self.inner.delete(node_path)
    }

    fn list_children(&self, parent: &str) -> CoordResult<Vec<String>> {
        if self.hide_children {
            return Ok(Vec::new());
        }
        self.inner.list_children(parent)
    }

    fn watch_deletion(&self, node_path: &str, watcher: NodeWatcher) -> CoordResult<bool> {
        let hook = self.before_watch.lock().unwrap().take();
        if let Some(hook) = hook {
            hook(self.inner.service(), node_path);
        }
        self.inner.watch_deletion(node_path, watcher)
    }

    fn add_session_listener(&self, listener: SessionListener) -> ListenerId {
        self.inner.add_session_listener(listener)
    }

    fn remove_session_listener(&self, id: ListenerId) {
        self.inner.remove_session_listener(id)
    }
}
