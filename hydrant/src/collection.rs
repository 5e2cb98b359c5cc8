use crate::entity::{EntityRef, WeakEntityRef};
use crate::error::OrmError;
use crate::metadata::{PropertyMeta, ReferenceKind};
use crate::value::FieldValue;
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;
use std::sync::Arc;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CollectionState {
    /// Not loaded, items are unknown.
    Unloaded,
    /// Loaded and equal to the last snapshot.
    Clean,
    /// Loaded and modified since the last snapshot.
    Dirty,
}

struct CollectionData {
    owner: WeakEntityRef,
    property: Arc<PropertyMeta>,
    items: Vec<EntityRef>,
    snapshot: Option<Vec<EntityRef>>,
    state: CollectionState,
}

/// Ordered container backing a to-many relation.
#[derive(Clone)]
pub struct Collection(Rc<RefCell<CollectionData>>);

impl Collection {
    fn with_state(owner: &EntityRef, property: Arc<PropertyMeta>, state: CollectionState) -> Self {
        Collection(Rc::new(RefCell::new(CollectionData {
            owner: owner.downgrade(),
            property,
            items: Vec::new(),
            snapshot: None,
            state,
        })))
    }

    pub fn lazy(owner: &EntityRef, property: Arc<PropertyMeta>) -> Self {
        Collection::with_state(owner, property, CollectionState::Unloaded)
    }

    /// Empty loaded collection, as created for a brand-new owner.
    pub fn empty(owner: &EntityRef, property: Arc<PropertyMeta>) -> Self {
        Collection::with_state(owner, property, CollectionState::Dirty)
    }

    /// Replaces the items with freshly loaded ones.
    ///
    /// For a new owner the collection stays dirty so it gets written, otherwise the
    /// loaded items become the clean baseline. 1:M items without an owner get
    /// their back-reference pointed at this collection's owner.
    pub fn hydrate(&self, items: Vec<EntityRef>, new_entity: bool) {
        let (owner, property) = {
            let data = self.0.borrow();
            (data.owner.upgrade(), data.property.clone())
        };
        if let (Some(owner), ReferenceKind::OneToMany, Some(mapped_by)) = (&owner, property.kind, property.mapped_by.as_deref()) {
            for item in &items {
                if !item.is_set(mapped_by) {
                    item.set(mapped_by, FieldValue::Entity(owner.clone()));
                }
            }
        }
        let mut data = self.0.borrow_mut();
        data.items = items;
        if new_entity {
            data.state = CollectionState::Dirty;
            data.snapshot = None;
        } else {
            data.snapshot = Some(data.items.clone());
            data.state = CollectionState::Clean;
        }
    }

    pub fn state(&self) -> CollectionState {
        self.0.borrow().state
    }

    pub fn is_initialized(&self) -> bool {
        self.state() != CollectionState::Unloaded
    }

    pub fn is_dirty(&self) -> bool {
        self.state() == CollectionState::Dirty
    }

    pub fn set_dirty(&self, dirty: bool) {
        let mut data = self.0.borrow_mut();
        if data.state != CollectionState::Unloaded {
            data.state = if dirty { CollectionState::Dirty } else { CollectionState::Clean };
        }
    }

    /// Makes the current items the clean baseline.
    pub fn take_snapshot(&self) {
        let mut data = self.0.borrow_mut();
        if data.state == CollectionState::Unloaded {
            return;
        }
        data.snapshot = Some(data.items.clone());
        data.state = CollectionState::Clean;
    }

    pub fn snapshot(&self) -> Option<Vec<EntityRef>> {
        self.0.borrow().snapshot.clone()
    }

    pub fn owner(&self) -> Option<EntityRef> {
        self.0.borrow().owner.upgrade()
    }

    pub fn property(&self) -> Arc<PropertyMeta> {
        self.0.borrow().property.clone()
    }

    pub fn ptr_eq(&self, other: &Collection) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    fn not_initialized(&self) -> OrmError {
        let data = self.0.borrow();
        OrmError::CollectionNotInitialized {
            entity: data.owner.upgrade().map(|o| o.entity_name()).unwrap_or_default(),
            target: data.property.target_name().unwrap_or_default().to_string(),
        }
    }

    pub fn items(&self) -> Result<Vec<EntityRef>, OrmError> {
        if !self.is_initialized() {
            return Err(self.not_initialized());
        }
        Ok(self.0.borrow().items.clone())
    }

    pub fn len(&self) -> Result<usize, OrmError> {
        if !self.is_initialized() {
            return Err(self.not_initialized());
        }
        Ok(self.0.borrow().items.len())
    }

    pub fn is_empty(&self) -> Result<bool, OrmError> {
        self.len().map(|len| len == 0)
    }

    pub fn contains(&self, item: &EntityRef) -> bool {
        self.0.borrow().items.iter().any(|i| i.ptr_eq(item))
    }

    /// Collection on `item` holding the other side of this M:N relation.
    fn other_side(&self, item: &EntityRef) -> Option<Collection> {
        let property = self.property();
        let inverse = property.inverse()?;
        item.get(inverse).and_then(|v| v.as_collection().cloned())
    }

    fn check_inverse_side(&self, item: &EntityRef) -> Result<(), OrmError> {
        let property = self.property();
        if property.kind != ReferenceKind::ManyToMany {
            return Ok(());
        }
        let Some(mapped_by) = property.mapped_by.as_deref() else {
            return Ok(());
        };
        let owning_loaded = self.other_side(item).map(|c| c.is_initialized()).unwrap_or(false);
        if owning_loaded {
            return Ok(());
        }
        Err(OrmError::CannotModifyInverseCollection {
            entity: self.owner().map(|o| o.entity_name()).unwrap_or_default(),
            property: property.name.clone(),
            owner: format!("{}.{}", property.target_name().unwrap_or_default(), mapped_by),
        })
    }

    fn push_raw(&self, item: &EntityRef) -> bool {
        if self.contains(item) {
            return false;
        }
        let mut data = self.0.borrow_mut();
        data.items.push(item.clone());
        data.state = CollectionState::Dirty;
        true
    }

    fn remove_raw(&self, item: &EntityRef) -> bool {
        let mut data = self.0.borrow_mut();
        let before = data.items.len();
        data.items.retain(|i| !i.ptr_eq(item));
        let removed = data.items.len() != before;
        if removed {
            data.state = CollectionState::Dirty;
        }
        removed
    }

    /// Adds items and keeps the other side of the relation in sync.
    pub fn add(&self, items: &[EntityRef]) -> Result<(), OrmError> {
        if !self.is_initialized() {
            return Err(self.not_initialized());
        }
        for item in items {
            self.check_inverse_side(item)?;
        }
        let property = self.property();
        let owner = self.owner();
        for item in items {
            if !self.push_raw(item) {
                continue;
            }
            let Some(owner) = &owner else { continue };
            match property.kind {
                ReferenceKind::OneToMany => {
                    if let Some(mapped_by) = property.mapped_by.as_deref() {
                        item.set(mapped_by, FieldValue::Entity(owner.clone()));
                    }
                }
                ReferenceKind::ManyToMany => {
                    if let Some(other) = self.other_side(item).filter(|c| c.is_initialized()) {
                        other.push_raw(owner);
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }

    pub fn remove(&self, items: &[EntityRef]) -> Result<(), OrmError> {
        if !self.is_initialized() {
            return Err(self.not_initialized());
        }
        for item in items {
            self.check_inverse_side(item)?;
        }
        let property = self.property();
        let owner = self.owner();
        for item in items {
            if !self.remove_raw(item) {
                continue;
            }
            let Some(owner) = &owner else { continue };
            match property.kind {
                ReferenceKind::OneToMany => {
                    if let Some(mapped_by) = property.mapped_by.as_deref() {
                        let points_here = item.get(mapped_by).and_then(|v| v.as_entity().map(|e| e.ptr_eq(owner))).unwrap_or(false);
                        if points_here {
                            item.set(mapped_by, FieldValue::Null);
                        }
                    }
                }
                ReferenceKind::ManyToMany => {
                    if let Some(other) = self.other_side(item).filter(|c| c.is_initialized()) {
                        other.remove_raw(owner);
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }
}

impl fmt::Debug for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let data = self.0.borrow();
        f.debug_struct("Collection")
            .field("property", &data.property.name)
            .field("state", &data.state)
            .field("items", &data.items)
            .finish()
    }
}
