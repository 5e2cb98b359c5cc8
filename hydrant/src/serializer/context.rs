use crate::entity::EntityRef;
use crate::error::OrmError;
use crate::metadata::ReferenceKind;
use crate::value::FieldValue;
use std::cell::RefCell;
use std::collections::HashSet;
use std::rc::Rc;

/// Mutable state of one root serialization call, shared by every entity it reaches.
///
/// `path` holds the `(type, property)` edges currently being serialized; re-entering
/// an edge already on the path is a cycle unless the populate hints ask for it.
pub struct SerializationContext {
    populate: Vec<String>,
    path: Vec<(String, String)>,
    visited: HashSet<usize>,
    markers: HashSet<(String, String)>,
    entities: Vec<EntityRef>,
    depth: usize,
    max_depth: usize,
}

impl SerializationContext {
    pub fn new(populate: Vec<String>) -> Self {
        SerializationContext {
            populate,
            path: Vec::new(),
            visited: HashSet::new(),
            markers: HashSet::new(),
            entities: Vec::new(),
            depth: 0,
            max_depth: 0,
        }
    }

    /// Pushes the edge and returns false, or returns true when it closes a cycle.
    pub fn visit(&mut self, entity: &str, prop: &str) -> bool {
        let on_path = self.path.iter().any(|(e, p)| e == entity && p == prop);
        if on_path && !self.is_marked_as_populated(entity, prop) {
            return true;
        }
        self.path.push((entity.to_string(), prop.to_string()));
        false
    }

    pub fn leave(&mut self, entity: &str, prop: &str) -> Result<(), OrmError> {
        match self.path.pop() {
            Some((e, p)) if e == entity && p == prop => Ok(()),
            last => Err(OrmError::SerializationPath {
                entity: entity.to_string(),
                property: prop.to_string(),
                expected: last.map(|(e, p)| format!("{e}.{p}")).unwrap_or_default(),
            }),
        }
    }

    /// Whether the populate hints, followed along the current path, explicitly name `prop`.
    pub fn is_marked_as_populated(&self, _entity: &str, prop: &str) -> bool {
        let mut hints: Vec<String> = self.populate.clone();
        for (_, segment) in &self.path {
            if hints.is_empty() {
                return false;
            }
            if hints.iter().any(|h| h == "*") {
                continue;
            }
            let prefix = format!("{segment}.");
            let exists = hints.iter().any(|h| h == segment || h.starts_with(&prefix));
            if !exists {
                return false;
            }
            hints = hints.iter().filter_map(|h| h.strip_prefix(&prefix).map(str::to_string)).collect();
        }
        hints.iter().any(|h| h == prop || h.starts_with(&format!("{prop}.")))
    }

    /// Records the entity as entered; returns whether it had been entered before.
    pub fn enter_entity(&mut self, entity: &EntityRef) -> bool {
        self.depth += 1;
        self.max_depth = self.max_depth.max(self.depth);
        !self.visited.insert(entity.identity())
    }

    pub fn exit_entity(&mut self) {
        self.depth = self.depth.saturating_sub(1);
    }

    pub fn mark(&mut self, entity: &str, prop: &str) {
        self.markers.insert((entity.to_string(), prop.to_string()));
    }

    pub fn is_marked(&self, entity: &str, prop: &str) -> bool {
        self.markers.contains(&(entity.to_string(), prop.to_string()))
    }

    pub fn visited_count(&self) -> usize {
        self.visited.len()
    }

    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    fn register(&mut self, entity: &EntityRef) {
        self.entities.push(entity.clone());
    }

    /// Attaches `ctx` to `root` and every entity reachable through relations that has none yet.
    pub fn propagate(ctx: &Rc<RefCell<SerializationContext>>, root: &EntityRef) {
        let mut stack = vec![root.clone()];
        while let Some(entity) = stack.pop() {
            if entity.has_serialization_context() {
                continue;
            }
            entity.attach_context(ctx.clone());
            let meta = entity.meta();
            let mut ctx_ref = ctx.borrow_mut();
            ctx_ref.register(&entity);
            for prop in entity.populated_properties() {
                ctx_ref.mark(&meta.name, &prop);
            }
            drop(ctx_ref);
            for prop in meta.properties.iter().filter(|p| p.kind != ReferenceKind::Scalar) {
                match entity.get(&prop.name) {
                    Some(FieldValue::Entity(target)) => stack.push(target),
                    Some(FieldValue::Collection(collection)) => {
                        if let Ok(items) = collection.items() {
                            stack.extend(items);
                        }
                    }
                    _ => {}
                }
            }
        }
    }

    /// Detaches this context from every entity it was attached to.
    pub fn close(&mut self) {
        for entity in self.entities.drain(..) {
            entity.detach_context();
        }
        self.path.clear();
    }
}
