//! Surface bookkeeping: id allocation, lookup, and the replay order used
//! when a reconnecting client needs the whole window population rebuilt.

use std::collections::HashMap;

use crate::model::{Surface, SurfaceId};

pub const ROOT_ID: SurfaceId = 0;
pub const ROOT_WIDTH: i32 = 1024;
pub const ROOT_HEIGHT: i32 = 768;

pub struct SurfaceRegistry {
    surfaces: HashMap<SurfaceId, Surface>,
    /// Non-root surfaces in creation order.
    order: Vec<SurfaceId>,
    next_id: SurfaceId,
}

impl SurfaceRegistry {
    pub fn new() -> Self {
        let mut surfaces = HashMap::new();
        let mut root = Surface::new(ROOT_ID, 0, 0, ROOT_WIDTH, ROOT_HEIGHT, false);
        root.visible = true;
        surfaces.insert(ROOT_ID, root);
        Self {
            surfaces,
            order: Vec::new(),
            next_id: ROOT_ID + 1,
        }
    }

    pub fn allocate(&mut self, x: i32, y: i32, width: i32, height: i32, is_temp: bool) -> SurfaceId {
        let id = self.next_id;
        self.next_id += 1;
        self.surfaces
            .insert(id, Surface::new(id, x, y, width, height, is_temp));
        self.order.push(id);
        id
    }

    pub fn get(&self, id: SurfaceId) -> Option<&Surface> {
        self.surfaces.get(&id)
    }

    pub fn get_mut(&mut self, id: SurfaceId) -> Option<&mut Surface> {
        self.surfaces.get_mut(&id)
    }

    /// Removes a surface. The root surface is permanent and cannot be
    /// removed.
    pub fn remove(&mut self, id: SurfaceId) -> Option<Surface> {
        if id == ROOT_ID {
            return None;
        }
        self.order.retain(|&other| other != id);
        self.surfaces.remove(&id)
    }

    /// Ids of all non-root surfaces, oldest first.
    pub fn ordered_ids(&self) -> Vec<SurfaceId> {
        self.order.clone()
    }

    pub fn len(&self) -> usize {
        self.surfaces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.surfaces.is_empty()
    }
}

impl Default for SurfaceRegistry {
    fn default() -> Self {
        Self::new()
    }
}
