//! In-process coordination service.
//!
//! `MemoryService` keeps a hierarchical namespace behind a single mutex and
//! hands out one [`MemoryClient`] per session. It implements the parts of
//! ZooKeeper semantics the lock protocol depends on:
//!
//! - ephemeral nodes are removed when their session closes or expires
//! - sequential names use a per-parent counter that never goes backwards
//! - deletion watches fire exactly once, on the thread doing the deletion,
//!   after the namespace mutex has been released
//! - ACLs on the parent gate creation and deletion of children
//!
//! Tests drive failure scenarios through [`MemoryService::expire_session`],
//! [`MemoryService::force_delete`], [`MemoryService::fail_next`] and
//! [`MemoryService::create_on_next_exists`].

use super::path;
use super::{
    AclEntry, CoordResult, CoordinationError, Coordinator, ListenerId, NodeWatcher, Permissions,
    SessionListener, WatchedEvent,
};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;

/// Identifier of a client session.
pub type SessionId = u64;

/// Client operations that can be targeted by fault injection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Create,
    Exists,
    Delete,
    ListChildren,
    Watch,
}

struct Node {
    acl: Vec<AclEntry>,
    ephemeral_owner: Option<SessionId>,
    next_sequence: u64,
}

impl Node {
    fn new(acl: Vec<AclEntry>, ephemeral_owner: Option<SessionId>) -> Self {
        Self {
            acl,
            ephemeral_owner,
            next_sequence: 0,
        }
    }
}

struct ArmedWatch {
    session: SessionId,
    watcher: NodeWatcher,
}

struct Session {
    auth: Vec<(String, String)>,
    listeners: Vec<(ListenerId, SessionListener)>,
    alive: bool,
}

/// Callbacks collected under the namespace mutex, run after it is released.
#[derive(Default)]
struct Deliveries {
    watches: Vec<(NodeWatcher, WatchedEvent)>,
    listeners: Vec<(SessionListener, WatchedEvent)>,
}

impl Deliveries {
    fn run(self) {
        for (watcher, event) in self.watches {
            watcher(event);
        }
        for (listener, event) in self.listeners {
            listener(event);
        }
    }
}

struct Namespace {
    nodes: BTreeMap<String, Node>,
    watches: HashMap<String, Vec<ArmedWatch>>,
    sessions: HashMap<SessionId, Session>,
    next_session: SessionId,
    next_listener: ListenerId,
    faults: Vec<(Operation, CoordinationError)>,
    create_behind: HashSet<String>,
}

impl Namespace {
    fn new() -> Self {
        let mut nodes = BTreeMap::new();
        nodes.insert(
            path::ROOT.to_string(),
            Node::new(AclEntry::open_unsafe(), None),
        );
        Self {
            nodes,
            watches: HashMap::new(),
            sessions: HashMap::new(),
            next_session: 1,
            next_listener: 1,
            faults: Vec::new(),
            create_behind: HashSet::new(),
        }
    }

    fn children(&self, parent: &str) -> Vec<String> {
        let prefix = if parent == path::ROOT {
            path::ROOT.to_string()
        } else {
            format!("{}{}", parent, path::SEPARATOR)
        };
        self.nodes
            .range(prefix.clone()..)
            .map(|(key, _)| key)
            .take_while(|key| key.starts_with(&prefix))
            .filter_map(|key| {
                let rest = &key[prefix.len()..];
                (!rest.is_empty() && !rest.contains(path::SEPARATOR)).then(|| rest.to_string())
            })
            .collect()
    }

    fn check_alive(&self, session: SessionId) -> CoordResult<()> {
        match self.sessions.get(&session) {
            Some(s) if s.alive => Ok(()),
            _ => Err(CoordinationError::SessionExpired),
        }
    }

    fn take_fault(&mut self, op: Operation) -> CoordResult<()> {
        match self.faults.iter().position(|(target, _)| *target == op) {
            Some(idx) => Err(self.faults.remove(idx).1),
            None => Ok(()),
        }
    }

    fn permitted(&self, session: SessionId, node_path: &str, perm: Permissions) -> bool {
        let auth = self
            .sessions
            .get(&session)
            .map(|s| s.auth.as_slice())
            .unwrap_or(&[]);
        self.nodes.get(node_path).is_some_and(|node| {
            node.acl
                .iter()
                .any(|entry| entry.perms.contains(perm) && entry.matches(auth))
        })
    }

    /// Validate that a child may be created under `parent` by `session`.
    fn check_parent_for_create(&self, session: SessionId, parent: &str) -> CoordResult<()> {
        let node = self
            .nodes
            .get(parent)
            .ok_or_else(|| CoordinationError::NoNode(parent.to_string()))?;
        if node.ephemeral_owner.is_some() {
            return Err(CoordinationError::NoChildrenForEphemerals(
                parent.to_string(),
            ));
        }
        if !self.permitted(session, parent, Permissions::CREATE) {
            return Err(CoordinationError::PermissionDenied(format!(
                "create under {}",
                parent
            )));
        }
        Ok(())
    }

    /// Remove a node and collect the watches armed on it.
    fn remove_node(&mut self, node_path: &str, deliveries: &mut Deliveries) {
        if self.nodes.remove(node_path).is_none() {
            return;
        }
        if let Some(armed) = self.watches.remove(node_path) {
            for watch in armed {
                deliveries.watches.push((
                    watch.watcher,
                    WatchedEvent::NodeDeleted {
                        path: node_path.to_string(),
                    },
                ));
            }
        }
    }

    /// End a session: drop its ephemerals and watches, optionally notify it.
    fn end_session(&mut self, session: SessionId, expired: bool, deliveries: &mut Deliveries) {
        let owned: Vec<String> = self
            .nodes
            .iter()
            .filter(|(_, node)| node.ephemeral_owner == Some(session))
            .map(|(key, _)| key.clone())
            .collect();

        for watches in self.watches.values_mut() {
            watches.retain(|watch| watch.session != session);
        }
        for node_path in &owned {
            self.remove_node(node_path, deliveries);
        }

        if let Some(entry) = self.sessions.get_mut(&session) {
            if !entry.alive {
                return;
            }
            entry.alive = false;
            if expired {
                for (_, listener) in entry.listeners.drain(..) {
                    deliveries
                        .listeners
                        .push((listener, WatchedEvent::SessionExpired));
                }
            } else {
                entry.listeners.clear();
            }
        }
        debug!(session, expired, removed = owned.len(), "session ended");
    }
}

/// Shared in-process namespace. Cheap to clone.
#[derive(Clone)]
pub struct MemoryService {
    inner: Arc<Mutex<Namespace>>,
}

impl Default for MemoryService {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryService {
    /// Create an empty namespace containing only the root.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Namespace::new())),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Namespace> {
        self.inner.lock().unwrap_or_else(|poison| poison.into_inner())
    }

    /// Open an unauthenticated session.
    pub fn connect(&self) -> MemoryClient {
        self.open_session(Vec::new())
    }

    /// Open a session authenticated as `scheme:id`.
    pub fn connect_with_auth(&self, scheme: &str, id: &str) -> MemoryClient {
        self.open_session(vec![(scheme.to_string(), id.to_string())])
    }

    fn open_session(&self, auth: Vec<(String, String)>) -> MemoryClient {
        let mut ns = self.lock();
        let session = ns.next_session;
        ns.next_session += 1;
        ns.sessions.insert(
            session,
            Session {
                auth,
                listeners: Vec::new(),
                alive: true,
            },
        );
        debug!(session, "session opened");
        MemoryClient {
            service: self.clone(),
            session,
        }
    }

    /// Expire a session, as the service does when a client stops heartbeating.
    pub fn expire_session(&self, session: SessionId) {
        let mut deliveries = Deliveries::default();
        self.lock().end_session(session, true, &mut deliveries);
        deliveries.run();
    }

    /// Tell a session's listeners that its connection was re-established.
    pub fn reconnect_session(&self, session: SessionId) {
        let listeners: Vec<SessionListener> = {
            let ns = self.lock();
            match ns.sessions.get(&session) {
                Some(s) if s.alive => s.listeners.iter().map(|(_, l)| Arc::clone(l)).collect(),
                _ => Vec::new(),
            }
        };
        for listener in listeners {
            listener(WatchedEvent::SessionReconnected);
        }
    }

    /// Delete a node bypassing ACLs, simulating the reaping of a crashed holder.
    pub fn force_delete(&self, node_path: &str) -> CoordResult<()> {
        let mut deliveries = Deliveries::default();
        {
            let mut ns = self.lock();
            if !ns.nodes.contains_key(node_path) {
                return Err(CoordinationError::NoNode(node_path.to_string()));
            }
            if !ns.children(node_path).is_empty() {
                return Err(CoordinationError::NotEmpty(node_path.to_string()));
            }
            ns.remove_node(node_path, &mut deliveries);
        }
        deliveries.run();
        Ok(())
    }

    /// Make the next call of `op` (from any session) fail with `error`.
    pub fn fail_next(&self, op: Operation, error: CoordinationError) {
        self.lock().faults.push((op, error));
    }

    /// Make the next `exists(path)` report absence while the node is created
    /// behind the caller's back, as a concurrent creator would.
    pub fn create_on_next_exists(&self, node_path: &str) {
        self.lock().create_behind.insert(node_path.to_string());
    }

    /// Sorted names of the children of `parent`.
    pub fn children(&self, parent: &str) -> Vec<String> {
        let mut children = self.lock().children(parent);
        children.sort();
        children
    }

    /// Whether a node exists, without going through a session.
    pub fn node_exists(&self, node_path: &str) -> bool {
        self.lock().nodes.contains_key(node_path)
    }

    /// ACL stored on a node.
    pub fn acl_of(&self, node_path: &str) -> Option<Vec<AclEntry>> {
        self.lock().nodes.get(node_path).map(|node| node.acl.clone())
    }

    /// Whether a node is ephemeral.
    pub fn is_ephemeral(&self, node_path: &str) -> bool {
        self.lock()
            .nodes
            .get(node_path)
            .is_some_and(|node| node.ephemeral_owner.is_some())
    }

    /// Number of deletion watches currently armed on a node.
    pub fn watch_count(&self, node_path: &str) -> usize {
        self.lock().watches.get(node_path).map_or(0, Vec::len)
    }

    /// Number of listeners registered on a live session.
    pub fn listener_count(&self, session: SessionId) -> usize {
        self.lock()
            .sessions
            .get(&session)
            .map_or(0, |s| s.listeners.len())
    }
}

/// One session against a [`MemoryService`].
///
/// Dropping the client closes the session, which removes its ephemeral nodes.
pub struct MemoryClient {
    service: MemoryService,
    session: SessionId,
}

impl std::fmt::Debug for MemoryClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryClient")
            .field("session", &self.session)
            .finish()
    }
}

impl MemoryClient {
    /// This client's session id.
    pub fn session_id(&self) -> SessionId {
        self.session
    }

    /// The service this client is connected to.
    pub fn service(&self) -> &MemoryService {
        &self.service
    }

    /// Close the session. Ephemeral nodes are removed without notifying this
    /// session's listeners.
    pub fn close(&self) {
        let mut deliveries = Deliveries::default();
        self.service
            .lock()
            .end_session(self.session, false, &mut deliveries);
        deliveries.run();
    }

    fn begin(&self, op: Operation) -> CoordResult<MutexGuard<'_, Namespace>> {
        let mut ns = self.service.lock();
        ns.check_alive(self.session)?;
        ns.take_fault(op)?;
        Ok(ns)
    }
}

impl Drop for MemoryClient {
    fn drop(&mut self) {
        self.close();
    }
}

impl Coordinator for MemoryClient {
    fn create_sequential_ephemeral(
        &self,
        parent: &str,
        name_prefix: &str,
        acl: &[AclEntry],
    ) -> CoordResult<String> {
        path::validate(parent)?;
        if name_prefix.contains(path::SEPARATOR) {
            return Err(CoordinationError::BadArguments(format!(
                "name prefix must not contain '{}': {}",
                path::SEPARATOR,
                name_prefix
            )));
        }
        if acl.is_empty() {
            return Err(CoordinationError::BadArguments("empty ACL".to_string()));
        }

        let mut ns = self.begin(Operation::Create)?;
        ns.check_parent_for_create(self.session, parent)?;

        let parent_node = ns
            .nodes
            .get_mut(parent)
            .ok_or_else(|| CoordinationError::NoNode(parent.to_string()))?;
        let name = path::sequential_name(name_prefix, parent_node.next_sequence);
        parent_node.next_sequence += 1;

        ns.nodes.insert(
            path::join(parent, &name),
            Node::new(acl.to_vec(), Some(self.session)),
        );
        Ok(name)
    }

    fn create_persistent(&self, node_path: &str, acl: &[AclEntry]) -> CoordResult<()> {
        path::validate(node_path)?;
        if acl.is_empty() {
            return Err(CoordinationError::BadArguments("empty ACL".to_string()));
        }

        let mut ns = self.begin(Operation::Create)?;
        if ns.nodes.contains_key(node_path) {
            return Err(CoordinationError::NodeExists(node_path.to_string()));
        }
        let parent = path::parent(node_path)
            .ok_or_else(|| CoordinationError::NodeExists(node_path.to_string()))?;
        ns.check_parent_for_create(self.session, parent)?;

        ns.nodes
            .insert(node_path.to_string(), Node::new(acl.to_vec(), None));
        Ok(())
    }

    fn exists(&self, node_path: &str) -> CoordResult<bool> {
        path::validate(node_path)?;

        let mut ns = self.begin(Operation::Exists)?;
        if ns.create_behind.remove(node_path) && !ns.nodes.contains_key(node_path) {
            let parent_exists = path::parent(node_path).is_some_and(|p| ns.nodes.contains_key(p));
            if parent_exists {
                ns.nodes.insert(
                    node_path.to_string(),
                    Node::new(AclEntry::open_unsafe(), None),
                );
            }
            return Ok(false);
        }
        Ok(ns.nodes.contains_key(node_path))
    }

    fn delete(&self, node_path: &str) -> CoordResult<()> {
        path::validate(node_path)?;

        let mut deliveries = Deliveries::default();
        {
            let mut ns = self.begin(Operation::Delete)?;
            if !ns.nodes.contains_key(node_path) {
                return Err(CoordinationError::NoNode(node_path.to_string()));
            }
            if !ns.children(node_path).is_empty() {
                return Err(CoordinationError::NotEmpty(node_path.to_string()));
            }
            let parent = path::parent(node_path).ok_or_else(|| {
                CoordinationError::BadArguments("cannot delete the root".to_string())
            })?;
            if !ns.permitted(self.session, parent, Permissions::DELETE) {
                return Err(CoordinationError::PermissionDenied(format!(
                    "delete under {}",
                    parent
                )));
            }
            ns.remove_node(node_path, &mut deliveries);
        }
        deliveries.run();
        Ok(())
    }

    fn list_children(&self, parent: &str) -> CoordResult<Vec<String>> {
        path::validate(parent)?;

        let ns = self.begin(Operation::ListChildren)?;
        if !ns.nodes.contains_key(parent) {
            return Err(CoordinationError::NoNode(parent.to_string()));
        }
        Ok(ns.children(parent))
    }

    fn watch_deletion(&self, node_path: &str, watcher: NodeWatcher) -> CoordResult<bool> {
        path::validate(node_path)?;

        let mut ns = self.begin(Operation::Watch)?;
        if !ns.nodes.contains_key(node_path) {
            return Ok(false);
        }
        ns.watches
            .entry(node_path.to_string())
            .or_default()
            .push(ArmedWatch {
                session: self.session,
                watcher,
            });
        Ok(true)
    }

    fn add_session_listener(&self, listener: SessionListener) -> ListenerId {
        let mut ns = self.service.lock();
        let id = ns.next_listener;
        ns.next_listener += 1;
        if let Some(session) = ns.sessions.get_mut(&self.session)
            && session.alive
        {
            session.listeners.push((id, listener));
        }
        id
    }

    fn remove_session_listener(&self, id: ListenerId) {
        let mut ns = self.service.lock();
        if let Some(session) = ns.sessions.get_mut(&self.session) {
            session.listeners.retain(|(registered, _)| *registered != id);
        }
    }
}
