//! Swap chain slot bookkeeping
//!
//! Each slot moves `Free → Rendering → InFlight → OnScreen → Free`, except
//! the very first frame which is set synchronously and goes straight from
//! `Rendering` to `OnScreen`. A slot leaves `OnScreen` only when its
//! successor's flip has completed, so the hardware never scans out a
//! buffer that is being rewritten.

use crate::error::PresentError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    Free,
    Rendering,
    InFlight,
    OnScreen,
}

#[derive(Debug)]
pub struct Slot<B, F> {
    pub buffer: B,
    /// Kernel framebuffer object, registered on first submission.
    pub framebuffer: Option<F>,
    pub state: SlotState,
}

#[derive(Debug)]
pub struct SwapChain<B, F> {
    slots: Vec<Slot<B, F>>,
}

impl<B, F: Copy> SwapChain<B, F> {
    pub fn new(buffers: Vec<B>) -> Self {
        Self {
            slots: buffers
                .into_iter()
                .map(|buffer| Slot {
                    buffer,
                    framebuffer: None,
                    state: SlotState::Free,
                })
                .collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn slot(&self, index: usize) -> &Slot<B, F> {
        &self.slots[index]
    }

    pub fn slot_mut(&mut self, index: usize) -> &mut Slot<B, F> {
        &mut self.slots[index]
    }

    pub fn state(&self, index: usize) -> SlotState {
        self.slots[index].state
    }

    fn find(&self, state: SlotState) -> Option<usize> {
        self.slots.iter().position(|s| s.state == state)
    }

    pub fn on_screen(&self) -> Option<usize> {
        self.find(SlotState::OnScreen)
    }

    pub fn in_flight(&self) -> Option<usize> {
        self.find(SlotState::InFlight)
    }

    /// Claim a free slot for rendering.
    pub fn acquire(&mut self) -> Result<usize, PresentError> {
        let index = self.find(SlotState::Free).ok_or(PresentError::NoFreeBuffer)?;
        self.slots[index].state = SlotState::Rendering;
        Ok(index)
    }

    /// Give a slot back after a failed submission.
    pub fn abandon(&mut self, index: usize) {
        if self.slots[index].state == SlotState::Rendering {
            self.slots[index].state = SlotState::Free;
        }
    }

    /// First frame: the slot was set synchronously and is now scanned out.
    pub fn mark_scanned_out(&mut self, index: usize) {
        debug_assert_eq!(self.slots[index].state, SlotState::Rendering);
        self.slots[index].state = SlotState::OnScreen;
    }

    /// A flip was queued for this slot.
    pub fn mark_in_flight(&mut self, index: usize) -> Result<(), PresentError> {
        if self.in_flight().is_some() {
            return Err(PresentError::FlipPending);
        }
        self.slots[index].state = SlotState::InFlight;
        Ok(())
    }

    /// The pending flip completed: the in-flight slot is now on screen and
    /// its predecessor returns to the free pool. Returns the freed slot.
    pub fn complete_flip(&mut self) -> Option<usize> {
        let incoming = self.in_flight()?;
        let outgoing = self.on_screen();
        if let Some(old) = outgoing {
            self.slots[old].state = SlotState::Free;
        }
        self.slots[incoming].state = SlotState::OnScreen;
        outgoing
    }

    /// Take every slot out of the chain, for teardown.
    pub fn drain(&mut self) -> Vec<Slot<B, F>> {
        std::mem::take(&mut self.slots)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn chain(n: usize) -> SwapChain<usize, u32> {
        SwapChain::new((0..n).collect())
    }

    #[test]
    fn first_frame_goes_straight_on_screen() {
        let mut sc = chain(2);
        let a = sc.acquire().unwrap();
        sc.mark_scanned_out(a);
        assert_eq!(sc.on_screen(), Some(a));
        assert_eq!(sc.in_flight(), None);
    }

    #[test]
    fn predecessor_is_freed_only_on_completion() {
        let mut sc = chain(2);
        let a = sc.acquire().unwrap();
        sc.mark_scanned_out(a);

        let b = sc.acquire().unwrap();
        sc.mark_in_flight(b).unwrap();
        assert_eq!(sc.state(a), SlotState::OnScreen);
        assert!(matches!(sc.acquire(), Err(PresentError::NoFreeBuffer)));

        assert_eq!(sc.complete_flip(), Some(a));
        assert_eq!(sc.state(a), SlotState::Free);
        assert_eq!(sc.state(b), SlotState::OnScreen);
    }

    #[test]
    fn only_one_flip_in_flight() {
        let mut sc = chain(3);
        let a = sc.acquire().unwrap();
        sc.mark_scanned_out(a);
        let b = sc.acquire().unwrap();
        sc.mark_in_flight(b).unwrap();
        let c = sc.acquire().unwrap();
        assert!(matches!(sc.mark_in_flight(c), Err(PresentError::FlipPending)));
        sc.abandon(c);
        assert_eq!(sc.state(c), SlotState::Free);
    }

    #[derive(Debug, Clone)]
    enum Op {
        Submit,
        Complete,
    }

    proptest! {
        /// Across any interleaving, at most one slot is on screen, at most one
        /// is in flight, and a slot only leaves the screen on completion.
        #[test]
        fn slot_states_stay_consistent(
            n in 2usize..5,
            ops in prop::collection::vec(prop_oneof![Just(Op::Submit), Just(Op::Complete)], 1..50),
        ) {
            let mut sc = chain(n);
            for op in ops {
                let before_on_screen = sc.on_screen();
                match op {
                    Op::Submit => {
                        if sc.in_flight().is_some() {
                            continue;
                        }
                        let Ok(slot) = sc.acquire() else { continue };
                        if sc.on_screen().is_none() {
                            sc.mark_scanned_out(slot);
                        } else {
                            sc.mark_in_flight(slot).unwrap();
                        }
                        if before_on_screen.is_some() {
                            prop_assert_eq!(sc.on_screen(), before_on_screen);
                        }
                    }
                    Op::Complete => {
                        let had_flip = sc.in_flight().is_some();
                        let freed = sc.complete_flip();
                        if had_flip {
                            prop_assert_eq!(freed, before_on_screen);
                        } else {
                            prop_assert_eq!(freed, None);
                            prop_assert_eq!(sc.on_screen(), before_on_screen);
                        }
                    }
                }
                let on = (0..n).filter(|&i| sc.state(i) == SlotState::OnScreen).count();
                let flying = (0..n).filter(|&i| sc.state(i) == SlotState::InFlight).count();
                prop_assert!(on <= 1);
                prop_assert!(flying <= 1);
            }
        }
    }
}
