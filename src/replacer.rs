use log::{debug, trace};

use crate::{
    common::{FrameId, PageRef},
    frame_table::FrameTable,
};

/// Second-chance (clock) victim selection over the frame table.
///
/// The clock hand survives across calls. A sweep clears reference bits,
/// frees clean unreferenced frames until `want_free` frames are free and
/// remembers the first dirty unreferenced frame as a fallback victim.
/// Locked and reserved frames are skipped untouched.
#[derive(Debug, Clone)]
pub struct ClockReplacer {
    hand: usize,
    want_free: usize,
    last_visits: usize,
}

impl ClockReplacer {
    pub fn new(want_free: usize) -> Self {
        Self {
            hand: 0,
            want_free: want_free.max(1),
            last_visits: 0,
        }
    }

    pub fn hand(&self) -> usize {
        self.hand
    }

    pub fn want_free(&self) -> usize {
        self.want_free
    }

    /// Frames visited by the most recent sweep.
    pub fn last_visits(&self) -> usize {
        self.last_visits
    }

    fn advance(&mut self, frame_count: usize) {
        self.hand = (self.hand + 1) % frame_count;
    }

    /// Runs at most two sweeps of the table. `evict` is called with each page
    /// whose frame was freed so the caller can invalidate it.
    ///
    /// Returns a free frame if the goal was reached, otherwise the first
    /// dirty victim seen (still occupied, the caller swaps it out), otherwise
    /// `None`.
    pub fn select_victim(
        &mut self,
        frames: &mut FrameTable,
        mut evict: impl FnMut(PageRef),
    ) -> Option<FrameId> {
        let frame_count = frames.len();
        self.last_visits = 0;
        if frame_count == 0 {
            return None;
        }
        self.hand %= frame_count;

        let mut free = frames.free_count();
        let mut dirty_victim = None;

        for _ in 0..2 * frame_count {
            if free >= self.want_free {
                break;
            }
            let id = self.hand;
            self.advance(frame_count);
            self.last_visits += 1;

            let Some(frame) = frames.get_mut(id) else {
                continue;
            };
            if !frame.is_evictable() {
                trace!("Clock skips frame {} (locked or reserved)", id);
                continue;
            }
            let Some(occupant) = frame.occupant else {
                continue;
            };
            if frame.referenced {
                frame.referenced = false;
                trace!("Clock gives frame {} a second chance", id);
                continue;
            }
            if !frame.dirty {
                frame.clear();
                evict(occupant);
                free += 1;
                debug!("Clock freed frame {} (was {})", id, occupant);
                continue;
            }
            if dirty_victim.is_none() {
                dirty_victim = Some(id);
            }
        }

        debug!(
            "Clock sweep visited {} frame(s), {} free, dirty fallback {:?}",
            self.last_visits, free, dirty_victim
        );
        if free >= self.want_free {
            frames.find_free()
        } else {
            dirty_victim
        }
    }
}
