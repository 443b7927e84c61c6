//! Lifetime tickets - pins that keep a cube resident.
//!
//! A [`TicketSet`] lives on each cube. Handing out a [`Ticket`] bumps a shared
//! reference count; dropping (or [`Ticket::release`]-ing) it lowers the count.
//! The cache only inspects the count during a sweep; releasing never touches
//! the cache.

use std::fmt;
use std::sync::Arc;

use crate::world::CubeCoord;

struct TicketTag {
    coord: CubeCoord,
}

/// Per-cube ticket bookkeeping
pub struct TicketSet {
    tag: Arc<TicketTag>,
}

impl TicketSet {
    pub fn new(coord: CubeCoord) -> Self {
        Self {
            tag: Arc::new(TicketTag { coord }),
        }
    }

    /// Issue a new ticket pinning this cube
    pub fn acquire(&self) -> Ticket {
        Ticket {
            tag: Arc::clone(&self.tag),
        }
    }

    /// Number of live tickets
    pub fn count(&self) -> usize {
        Arc::strong_count(&self.tag) - 1
    }

    /// Cube may be unloaded when nothing holds a ticket
    pub fn can_unload(&self) -> bool {
        self.count() == 0
    }
}

impl fmt::Debug for TicketSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TicketSet")
            .field("coord", &self.tag.coord)
            .field("count", &self.count())
            .finish()
    }
}

/// Pin on a single cube. Not `Clone`: each ticket is released exactly once.
#[must_use = "dropping a ticket releases it immediately"]
pub struct Ticket {
    tag: Arc<TicketTag>,
}

impl Ticket {
    /// Cube this ticket pins
    pub fn coord(&self) -> CubeCoord {
        self.tag.coord
    }

    /// Explicit release; equivalent to dropping
    pub fn release(self) {}
}

impl fmt::Debug for Ticket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Ticket").field(&self.tag.coord).finish()
    }
}
