//! Deterministic connection-port allocation.
//!
//! Every edge endpoint occupies exactly one named port on its node. Given
//! the two nodes of a prospective connection, the allocator guesses which
//! side of each node faces the other, then takes the first free index on
//! that side, rotating through the remaining sides in a fixed preference
//! order when the guess is saturated. Satellites are special-cased: their
//! feeds always leave to the right and arrive on the target's left.

use std::collections::HashSet;

use crate::{
    config::PortCapacity,
    model::{DiagramNode, HandleId, HandleKind, HandleSide, NodeKind, Position},
};

pub struct HandleAllocator {
    capacity: PortCapacity,
}

impl HandleAllocator {
    pub fn new(capacity: PortCapacity) -> Self {
        Self {
            capacity,
        }
    }

    /// Side of the source node that faces the target.
    pub fn guess_source_side(
        source: &Position,
        target: &Position,
    ) -> HandleSide {
        let dx = target.x - source.x;
        let dy = target.y - source.y;

        if dx.abs() >= dy.abs() {
            if dx >= 0.0 { HandleSide::Right } else { HandleSide::Left }
        } else if dy >= 0.0 {
            HandleSide::Bottom
        } else {
            HandleSide::Top
        }
    }

    /// Side of the target node that faces back toward the source.
    pub fn guess_target_side(
        source: &Position,
        target: &Position,
    ) -> HandleSide {
        let dx = target.x - source.x;
        let dy = target.y - source.y;

        if dx.abs() >= dy.abs() {
            if dx >= 0.0 { HandleSide::Left } else { HandleSide::Right }
        } else if dy >= 0.0 {
            HandleSide::Top
        } else {
            HandleSide::Bottom
        }
    }

    /// First free port of `kind`, scanning `primary` then the remaining
    /// sides in the fixed preference order. `None` when every side is
    /// saturated.
    pub fn allocate(
        &self,
        primary: HandleSide,
        kind: HandleKind,
        used: &HashSet<HandleId>,
    ) -> Option<HandleId> {
        let mut sides = vec![primary];
        sides.extend(HandleSide::PREFERENCE.iter().copied().filter(|s| *s != primary));

        for side in sides {
            for index in 1..=self.capacity.for_side(side) {
                let candidate = HandleId::new(kind, side, index);
                if !used.contains(&candidate) {
                    return Some(candidate);
                }
            }
        }
        None
    }

    /// Resolve both endpoints of a prospective connection.
    ///
    /// `used_source`/`used_target` are the occupancy sets of the two nodes;
    /// on reconnection the caller excludes the moving edge from them first.
    pub fn resolve(
        &self,
        source: &DiagramNode,
        target: &DiagramNode,
        used_source: &HashSet<HandleId>,
        used_target: &HashSet<HandleId>,
    ) -> Option<(HandleId, HandleId)> {
        let (source_side, target_side) = if source.kind == NodeKind::Satellite {
            (HandleSide::Right, HandleSide::Left)
        } else {
            (
                Self::guess_source_side(&source.position, &target.position),
                Self::guess_target_side(&source.position, &target.position),
            )
        };

        let source_handle = self.allocate(source_side, HandleKind::Out, used_source)?;
        let target_handle = self.allocate(target_side, HandleKind::In, used_target)?;

        Some((source_handle, target_handle))
    }
}
