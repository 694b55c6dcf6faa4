//! Change tracking for documents.
//!
//! A tracked value owns a [`TrackingNode`] holding its dirty and deserializing flags
//! and a weak link to the node of the value that owns it. Marking a node dirty marks
//! its owners dirty too, so a change anywhere in a document graph dirties the root.
//! Ownership flows from the root down; the upward links are only used for this
//! propagation and are cut when a member is replaced or an item is removed, so the
//! detached value can no longer dirty its former owner.
//!
//! [`Tracked<T>`] wraps a document or sub-document whose type derives
//! [`Trackable`](n1ql_linq_macros::Trackable); [`TrackedList<T>`] wraps a collection
//! member. Both serialize transparently as the wrapped value.
//!
//! ```ignore
//! let mut beer = Tracked::try_new(Beer { name: "Pliny".into(), tags: TrackedList::new() })?;
//! assert!(!beer.is_dirty());
//!
//! beer.set(|b| &mut b.name, "Pliny the Elder".into());
//! assert!(beer.is_dirty());
//! ```

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use std::{
    any::TypeId,
    collections::HashMap,
    fmt,
    ops::{Deref, DerefMut},
    sync::{
        Arc, Mutex, OnceLock, PoisonError, RwLock, Weak,
        atomic::{AtomicBool, Ordering},
    },
};

use crate::{
    error::{N1qlError, N1qlResult},
    types::{Model, TypeRef},
};

/// The tracking state of one value.
#[derive(Debug, Default)]
pub struct TrackingNode {
    dirty: AtomicBool,
    deserializing: AtomicBool,
    owner: Mutex<Weak<TrackingNode>>,
    children: Mutex<Vec<Weak<TrackingNode>>>,
}

impl TrackingNode {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Acquire)
    }

    pub fn is_deserializing(&self) -> bool {
        self.deserializing.load(Ordering::Acquire)
    }

    pub fn set_deserializing(&self, value: bool) {
        self.deserializing.store(value, Ordering::Release);
    }

    /// Marks this node and its owners dirty. Ignored while deserializing.
    pub fn mark_dirty(&self) {
        if self.is_deserializing() {
            return;
        }
        self.dirty.store(true, Ordering::Release);

        if let Some(owner) = self.owner() {
            owner.mark_dirty();
        }
    }

    /// Marks this node and every node it still owns clean.
    pub fn clear_status(&self) {
        self.dirty.store(false, Ordering::Release);

        let children: Vec<_> = self
            .children
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter_map(Weak::upgrade)
            .collect();
        for child in children {
            child.clear_status();
        }
    }

    fn owner(&self) -> Option<Arc<TrackingNode>> {
        self.owner.lock().unwrap_or_else(PoisonError::into_inner).upgrade()
    }

    fn adopt(self: &Arc<Self>, child: &Arc<TrackingNode>) {
        if child.is_owned_by(self) {
            return;
        }
        if let Some(previous) = child.owner() {
            previous.forget(child);
        }
        *child.owner.lock().unwrap_or_else(PoisonError::into_inner) = Arc::downgrade(self);

        let mut children = self.children.lock().unwrap_or_else(PoisonError::into_inner);
        children.retain(|node| node.strong_count() > 0);
        children.push(Arc::downgrade(child));
    }

    fn disown(child: &TrackingNode) {
        if let Some(owner) = child.owner() {
            owner.forget(child);
        }
        *child.owner.lock().unwrap_or_else(PoisonError::into_inner) = Weak::new();
    }

    fn forget(&self, child: &TrackingNode) {
        self.children
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|node| !std::ptr::eq(node.as_ptr(), child));
    }

    /// Returns true if `owner` is this node's owner.
    pub fn is_owned_by(&self, owner: &Arc<TrackingNode>) -> bool {
        self.owner().is_some_and(|current| Arc::ptr_eq(&current, owner))
    }
}

/// Capabilities of a change-tracking wrapper.
pub trait TrackedObject {
    fn is_dirty(&self) -> bool;

    /// Marks this value clean, along with every tracked value it still owns.
    fn clear_status(&self);

    fn set_deserializing(&self, value: bool);

    fn mark_dirty(&self);

    fn tracking_node(&self) -> &Arc<TrackingNode>;
}

/// Static description of a trackable type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyDescriptor {
    pub type_name: String,
    /// Every member a setter may write.
    pub members: Vec<&'static str>,
    /// Members holding tracked sub-documents or collections.
    pub tracked_members: Vec<&'static str>,
}

/// A type whose values can be wrapped in [`Tracked`].
///
/// Implemented by `#[derive(Trackable)]` for structs with named fields. The derive
/// rejects enums and tuple structs at compile time.
pub trait Trackable: 'static {
    fn describe() -> ProxyDescriptor;

    /// Visits the tracked members currently owned by this value.
    fn for_each_tracked(&self, f: &mut dyn FnMut(&dyn TrackedObject));
}

/// A collection item; tracked items are linked to the collection that holds them.
pub trait TrackedItem {
    fn tracked(&self) -> Option<&dyn TrackedObject>;
}

macro_rules! untracked_item {
    ($($ty:ty),*) => {
        $(
            impl TrackedItem for $ty {
                fn tracked(&self) -> Option<&dyn TrackedObject> {
                    None
                }
            }
        )*
    };
}

untracked_item!(
    String, bool, i32, i64, u32, u64, f32, f64, serde_json::Value,
    chrono::DateTime<chrono::Utc>, chrono::DateTime<chrono::FixedOffset>, chrono::NaiveDateTime
);

impl<T: Trackable> TrackedItem for Tracked<T> {
    fn tracked(&self) -> Option<&dyn TrackedObject> {
        Some(self)
    }
}

impl<T: TrackedItem> TrackedItem for TrackedList<T> {
    fn tracked(&self) -> Option<&dyn TrackedObject> {
        Some(self)
    }
}

/// Returns the cached descriptor for `T`, creating it on first use.
pub fn proxy_descriptor<T: Trackable>() -> Arc<ProxyDescriptor> {
    static CACHE: OnceLock<RwLock<HashMap<TypeId, Arc<ProxyDescriptor>>>> = OnceLock::new();
    let cache = CACHE.get_or_init(RwLock::default);
    let id = TypeId::of::<T>();

    if let Some(descriptor) = cache.read().unwrap_or_else(PoisonError::into_inner).get(&id) {
        return descriptor.clone();
    }

    cache
        .write()
        .unwrap_or_else(PoisonError::into_inner)
        .entry(id)
        .or_insert_with(|| Arc::new(T::describe()))
        .clone()
}

/// Wraps `value` for change tracking.
///
/// # Errors
///
/// Returns [`N1qlError::ProxyCreationUnsupported`] if `T` has no members to track.
pub fn create_proxy<T: Trackable>(value: T) -> N1qlResult<Tracked<T>> {
    let descriptor = proxy_descriptor::<T>();
    if descriptor.members.is_empty() {
        return Err(N1qlError::ProxyCreationUnsupported(
            descriptor.type_name.clone(),
            "type has no settable members".to_string(),
        ));
    }

    let tracked = Tracked { value, node: TrackingNode::new(), link: None };
    tracked.adopt_members();
    Ok(tracked)
}

/// A change-tracked document or sub-document.
///
/// Reads go through [`Deref`]; writes go through [`set`](Self::set),
/// [`modify`](Self::modify) or [`modify_member`](Self::modify_member), which mark the
/// value dirty unless it is being deserialized.
pub struct Tracked<T> {
    value: T,
    node: Arc<TrackingNode>,
    link: Option<SnapshotLink<T>>,
}

/// The latest serialized state of a tracked document, kept for the unit of work that
/// loaded it so dirty documents can be written without a handle to the value.
#[derive(Debug, Default)]
pub struct DocumentSnapshot {
    latest: Mutex<Option<Result<Value, String>>>,
}

impl DocumentSnapshot {
    /// The state after the most recent change, or `None` if nothing was recorded.
    pub fn latest(&self) -> Option<N1qlResult<Value>> {
        self.latest
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .map(|latest| latest.map_err(N1qlError::Serialization))
    }

    fn record(&self, state: serde_json::Result<Value>) {
        *self.latest.lock().unwrap_or_else(PoisonError::into_inner) =
            Some(state.map_err(|err| err.to_string()));
    }
}

struct SnapshotLink<T> {
    snapshot: Arc<DocumentSnapshot>,
    serialize: fn(&T) -> serde_json::Result<Value>,
}

impl<T: Trackable> Tracked<T> {
    pub fn try_new(value: T) -> N1qlResult<Self> {
        create_proxy(value)
    }

    pub fn get(&self) -> &T {
        &self.value
    }

    /// Unwraps the value; its tracked members keep their links to it.
    pub fn into_inner(self) -> T {
        self.value
    }

    /// Writes one member.
    pub fn set<V>(&mut self, member: impl FnOnce(&mut T) -> &mut V, value: V) {
        self.modify(|target| *member(target) = value);
    }

    /// Applies an arbitrary mutation and marks the value dirty.
    pub fn modify<R>(&mut self, f: impl FnOnce(&mut T) -> R) -> R {
        let before = self.member_nodes();
        let result = f(&mut self.value);

        self.node.mark_dirty();
        self.sync_members(&before);
        self.publish();
        result
    }

    /// Mutates a tracked member in place.
    ///
    /// The value itself only becomes dirty if the member reports a change or is
    /// replaced.
    pub fn modify_member<M: TrackedObject, R>(
        &mut self,
        member: impl FnOnce(&mut T) -> &mut M,
        f: impl FnOnce(&mut M) -> R,
    ) -> R {
        let before = self.member_nodes();
        let result = f(member(&mut self.value));

        if self.sync_members(&before) {
            self.node.mark_dirty();
        }
        self.publish();
        result
    }

    /// Records the current state in the attached snapshot, if any.
    fn publish(&self) {
        if let Some(link) = &self.link {
            if self.node.is_dirty() {
                link.snapshot.record((link.serialize)(&self.value));
            }
        }
    }

    fn member_nodes(&self) -> Vec<Arc<TrackingNode>> {
        let mut nodes = Vec::new();
        self.value.for_each_tracked(&mut |member| nodes.push(member.tracking_node().clone()));
        nodes
    }

    fn adopt_members(&self) {
        for node in self.member_nodes() {
            self.node.adopt(&node);
        }
    }

    /// Disowns replaced members and adopts new ones; returns true if any changed.
    fn sync_members(&self, before: &[Arc<TrackingNode>]) -> bool {
        let after = self.member_nodes();
        let mut changed = false;

        for old in before {
            if !after.iter().any(|node| Arc::ptr_eq(node, old)) {
                TrackingNode::disown(old);
                changed = true;
            }
        }
        for new in &after {
            if !before.iter().any(|node| Arc::ptr_eq(node, new)) {
                changed = true;
            }
            self.node.adopt(new);
        }
        changed
    }
}

impl<T: Trackable + Serialize> Tracked<T> {
    /// Shares this document's state with a [`DocumentSnapshot`] refreshed after every
    /// change made through this wrapper.
    pub fn attach_snapshot(&mut self) -> Arc<DocumentSnapshot> {
        if let Some(link) = &self.link {
            return link.snapshot.clone();
        }

        let snapshot = Arc::new(DocumentSnapshot::default());
        self.link = Some(SnapshotLink {
            snapshot: snapshot.clone(),
            serialize: |value| serde_json::to_value(value),
        });
        self.publish();
        snapshot
    }
}

impl<T: Trackable> TrackedObject for Tracked<T> {
    fn is_dirty(&self) -> bool {
        self.node.is_dirty()
    }

    fn clear_status(&self) {
        self.node.clear_status();
    }

    fn set_deserializing(&self, value: bool) {
        self.node.set_deserializing(value);
    }

    fn mark_dirty(&self) {
        self.node.mark_dirty();
    }

    fn tracking_node(&self) -> &Arc<TrackingNode> {
        &self.node
    }
}

impl<T: Model> Model for Tracked<T> {
    fn type_ref() -> TypeRef {
        T::type_ref()
    }
}

impl<T: Model> Model for TrackedList<T> {
    fn type_ref() -> TypeRef {
        TypeRef::collection_of(T::type_ref())
    }
}

impl<T> Deref for Tracked<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.value
    }
}

impl<T: fmt::Debug> fmt::Debug for Tracked<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tracked")
            .field("value", &self.value)
            .field("dirty", &self.node.is_dirty())
            .finish()
    }
}

impl<T: PartialEq> PartialEq for Tracked<T> {
    fn eq(&self, other: &Self) -> bool {
        self.value == other.value
    }
}

impl<T: Serialize> Serialize for Tracked<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.value.serialize(serializer)
    }
}

impl<'de, T: Trackable + Deserialize<'de>> Deserialize<'de> for Tracked<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = T::deserialize(deserializer)?;
        let tracked = create_proxy(value).map_err(serde::de::Error::custom)?;

        tracked.set_deserializing(true);
        tracked.adopt_members();
        tracked.set_deserializing(false);
        Ok(tracked)
    }
}

/// A change-tracked collection.
///
/// Structural mutations (push, insert, remove, set, clear) mark the collection dirty.
/// Removed or replaced items are disowned.
pub struct TrackedList<T> {
    items: Vec<T>,
    node: Arc<TrackingNode>,
}

impl<T: TrackedItem> TrackedList<T> {
    pub fn new() -> Self {
        Self::from_vec(Vec::new())
    }

    pub fn from_vec(items: Vec<T>) -> Self {
        let list = Self { items, node: TrackingNode::new() };
        for item in &list.items {
            list.adopt(item);
        }
        list
    }

    fn adopt(&self, item: &T) {
        if let Some(tracked) = item.tracked() {
            self.node.adopt(tracked.tracking_node());
        }
    }

    fn disown(item: &T) {
        if let Some(tracked) = item.tracked() {
            TrackingNode::disown(tracked.tracking_node());
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&T> {
        self.items.get(index)
    }

    /// Mutable access to an item.
    ///
    /// Changes made inside a tracked item reach the collection through the item's own
    /// tracking. When the guard is dropped, an item that was replaced is disowned and
    /// its replacement adopted, and an untracked item counts as changed.
    pub fn get_mut(&mut self, index: usize) -> Option<ItemMut<'_, T>> {
        let item = self.items.get_mut(index)?;
        let before = item.tracked().map(|tracked| tracked.tracking_node().clone());

        Some(ItemMut { item, owner: &self.node, before })
    }

    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        self.items.iter()
    }

    pub fn push(&mut self, item: T) {
        self.adopt(&item);
        self.items.push(item);
        self.node.mark_dirty();
    }

    pub fn insert(&mut self, index: usize, item: T) -> N1qlResult<()> {
        if index > self.items.len() {
            return Err(N1qlError::InvalidShape(format!(
                "insertion index {index} out of bounds for length {}",
                self.items.len()
            )));
        }
        self.adopt(&item);
        self.items.insert(index, item);
        self.node.mark_dirty();
        Ok(())
    }

    /// Removes and returns the item at `index`, disowning it.
    pub fn remove(&mut self, index: usize) -> Option<T> {
        if index >= self.items.len() {
            return None;
        }
        let item = self.items.remove(index);
        Self::disown(&item);
        self.node.mark_dirty();
        Some(item)
    }

    /// Replaces the item at `index`, returning the disowned previous item.
    pub fn set(&mut self, index: usize, item: T) -> Option<T> {
        let slot = self.items.get_mut(index)?;
        let previous = std::mem::replace(slot, item);

        Self::disown(&previous);
        self.adopt(&self.items[index]);
        self.node.mark_dirty();
        Some(previous)
    }

    pub fn clear(&mut self) {
        for item in self.items.drain(..) {
            Self::disown(&item);
        }
        self.node.mark_dirty();
    }

    pub fn into_vec(self) -> Vec<T> {
        self.items
    }
}

/// Mutable access to one item of a [`TrackedList`]; see [`TrackedList::get_mut`].
pub struct ItemMut<'a, T: TrackedItem> {
    item: &'a mut T,
    owner: &'a Arc<TrackingNode>,
    before: Option<Arc<TrackingNode>>,
}

impl<T: TrackedItem> Deref for ItemMut<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        self.item
    }
}

impl<T: TrackedItem> DerefMut for ItemMut<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        self.item
    }
}

impl<T: TrackedItem> Drop for ItemMut<'_, T> {
    fn drop(&mut self) {
        let after = self.item.tracked().map(|tracked| tracked.tracking_node().clone());

        match (&self.before, &after) {
            (Some(before), Some(after)) if Arc::ptr_eq(before, after) => {}
            (before, after) => {
                if let Some(before) = before {
                    TrackingNode::disown(before);
                }
                if let Some(after) = after {
                    self.owner.adopt(after);
                }
                self.owner.mark_dirty();
            }
        }
    }
}

impl<T: TrackedItem> Default for TrackedList<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: TrackedItem> TrackedObject for TrackedList<T> {
    fn is_dirty(&self) -> bool {
        self.node.is_dirty()
    }

    fn clear_status(&self) {
        self.node.clear_status();
    }

    fn set_deserializing(&self, value: bool) {
        self.node.set_deserializing(value);
    }

    fn mark_dirty(&self) {
        self.node.mark_dirty();
    }

    fn tracking_node(&self) -> &Arc<TrackingNode> {
        &self.node
    }
}

impl<'a, T> IntoIterator for &'a TrackedList<T> {
    type Item = &'a T;
    type IntoIter = std::slice::Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.iter()
    }
}

impl<T> Deref for TrackedList<T> {
    type Target = [T];

    fn deref(&self) -> &[T] {
        &self.items
    }
}

impl<T: fmt::Debug> fmt::Debug for TrackedList<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrackedList")
            .field("items", &self.items)
            .field("dirty", &self.node.is_dirty())
            .finish()
    }
}

impl<T: PartialEq> PartialEq for TrackedList<T> {
    fn eq(&self, other: &Self) -> bool {
        self.items == other.items
    }
}

impl<T: Serialize> Serialize for TrackedList<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.items.serialize(serializer)
    }
}

impl<'de, T: TrackedItem + Deserialize<'de>> Deserialize<'de> for TrackedList<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let items = Vec::<T>::deserialize(deserializer)?;
        Ok(Self::from_vec(items))
    }
}
