//! Fixed-capacity pool of event cells
//!
//! Cells are linked by 16-bit indices into one backing slice, allocated once
//! when the arena is built. Allocation and release are O(1) pushes and pops on
//! an intrusive free list; nothing grows, nothing blocks.

use crate::metric_time::{MetricDuration, NoteDuration};
use crate::midi::MidiEvent;

/// Cells in the default arena
pub const ARENA_CAPACITY: usize = 2000;

const NIL: u16 = 0xFFFF;

/// Index of a cell in the arena
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CellId(u16);

/// One stored event
#[derive(Debug, Clone, Copy)]
pub(crate) struct Cell {
    pub event: MidiEvent,
    /// Meaningful for note-ons only
    pub duration: NoteDuration,
    /// Time from this cell to the next one in its chain
    pub next_time: MetricDuration,
    next: u16,
}

impl Cell {
    const BLANK: Cell = Cell {
        event: MidiEvent::new(0, 0, 0),
        duration: NoteDuration::ZERO,
        next_time: MetricDuration::ZERO,
        next: NIL,
    };
}

/// Pool of cells with an intrusive free list
///
/// A cell belongs to exactly one chain at a time: a layer, the pending
/// note-off chain, or the free list. Freeing a cell that is still linked
/// elsewhere corrupts both lists; ids never leave this crate so only the
/// looper's own code holds them.
pub struct CellArena {
    cells: Box<[Cell]>,
    free_head: u16,
    in_use: usize,
}

impl CellArena {
    /// Build an arena of `capacity` cells (at most 65535)
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.min(NIL as usize);
        let mut cells = vec![Cell::BLANK; capacity].into_boxed_slice();

        let mut free_head = NIL;
        for (i, cell) in cells.iter_mut().enumerate() {
            cell.next = free_head;
            free_head = i as u16;
        }

        Self {
            cells,
            free_head,
            in_use: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.cells.len()
    }

    pub fn in_use(&self) -> usize {
        self.in_use
    }

    /// Count cells on the free list by walking it
    pub fn free_count(&self) -> usize {
        let mut n = 0;
        let mut i = self.free_head;
        while i != NIL {
            n += 1;
            i = self.cells[i as usize].next;
        }
        n
    }

    pub(crate) fn allocate(&mut self) -> Option<CellId> {
        if self.free_head == NIL {
            return None;
        }

        let id = self.free_head;
        let cell = &mut self.cells[id as usize];
        self.free_head = cell.next;
        *cell = Cell::BLANK;
        self.in_use += 1;
        Some(CellId(id))
    }

    /// Return a cell to the pool; it must not be linked from any live chain
    pub(crate) fn free(&mut self, id: CellId) {
        self.cells[id.0 as usize].next = self.free_head;
        self.free_head = id.0;
        self.in_use -= 1;
    }

    pub(crate) fn get(&self, id: CellId) -> &Cell {
        &self.cells[id.0 as usize]
    }

    pub(crate) fn get_mut(&mut self, id: CellId) -> &mut Cell {
        &mut self.cells[id.0 as usize]
    }

    pub(crate) fn next(&self, id: CellId) -> Option<CellId> {
        match self.cells[id.0 as usize].next {
            NIL => None,
            n => Some(CellId(n)),
        }
    }

    pub(crate) fn link(&mut self, id: CellId, next: Option<CellId>) {
        self.cells[id.0 as usize].next = next.map_or(NIL, |n| n.0);
    }
}

impl Default for CellArena {
    fn default() -> Self {
        Self::new(ARENA_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conserved(arena: &CellArena, live: usize) -> bool {
        arena.free_count() + live == arena.capacity() && arena.in_use() == live
    }

    #[test]
    fn test_allocate_until_exhausted() {
        let mut arena = CellArena::new(3);
        let a = arena.allocate();
        let b = arena.allocate();
        let c = arena.allocate();
        assert!(a.is_some() && b.is_some() && c.is_some());
        assert_eq!(arena.allocate(), None);
        assert!(conserved(&arena, 3));

        arena.free(b.unwrap());
        assert_eq!(arena.allocate(), b);
    }

    #[test]
    fn test_conservation_over_mixed_sequence() {
        let mut arena = CellArena::new(16);
        let mut live = Vec::new();

        for round in 0..40 {
            if round % 3 == 2 {
                if let Some(id) = live.pop() {
                    arena.free(id);
                }
            } else if let Some(id) = arena.allocate() {
                live.push(id);
            }
            assert!(conserved(&arena, live.len()));
        }

        for id in live.drain(..) {
            arena.free(id);
        }
        assert!(conserved(&arena, 0));
    }

    #[test]
    fn test_links() {
        let mut arena = CellArena::new(4);
        let a = arena.allocate().unwrap();
        let b = arena.allocate().unwrap();
        assert_eq!(arena.next(a), None);

        arena.link(a, Some(b));
        arena.link(b, Some(a));
        assert_eq!(arena.next(a), Some(b));
        assert_eq!(arena.next(b), Some(a));

        arena.get_mut(a).next_time = MetricDuration::from_spokes(70);
        assert_eq!(arena.get(a).next_time.spokes(), 70);
    }

    #[test]
    fn test_allocated_cell_is_blank() {
        let mut arena = CellArena::new(1);
        let a = arena.allocate().unwrap();
        arena.get_mut(a).event = MidiEvent::note_on(0, 60, 90);
        arena.get_mut(a).duration = NoteDuration::from_spokes(10);
        arena.free(a);

        let a = arena.allocate().unwrap();
        assert_eq!(arena.get(a).event, MidiEvent::default());
        assert!(arena.get(a).duration.is_zero());
        assert_eq!(arena.next(a), None);
    }
}
