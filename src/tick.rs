//! The tick-component capability set (§4.2, §9 Design Notes): a trait rather
//! than the original's deep `MIDITickComponent` inheritance hierarchy.
//! [`crate::manager::Manager`] drives every registered component once per clock
//! tick, most-urgent [`Priority`] first.

/// Dispatch order within a tick. Lower variants run first. Matches the
/// original's fixed ordering (pre-sequencer components see the clock before the
/// sequencer advances; post-sequencer components, like thru or a metronome that
/// wants to react to what the sequencer just emitted, see it after).
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum Priority {
    First,
    PreSequencer,
    Sequencer,
    PostSequencer,
    Last,
}

/// Anything the `Manager` can drive once per clock tick.
///
/// Implementors are not required to be reentrant-safe on their own — the
/// `Manager` serializes tick dispatch under its coarse lock (§5) — but `stop()`
/// may be invoked from inside a `tick()` call (e.g. a `Sequencer` reaching its
/// end stopping itself), so any internal locking a component does on top of
/// the `Manager`'s must itself tolerate reentry (§9).
pub trait TickComponent: Send {
    fn priority(&self) -> Priority;

    /// Starts the component. Returns `false` if it was already running.
    fn start(&mut self) -> bool;

    /// Stops the component. Returns `false` if it was already stopped.
    fn stop(&mut self) -> bool;

    fn is_running(&self) -> bool;

    /// Advances the component by one tick. `sys_time_ms` is the `Manager`'s
    /// clock time in milliseconds at this tick, already adjusted by whatever
    /// offset the component needs (§5's system/device time offsets).
    fn tick(&mut self, sys_time_ms: u32);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn priority_orders_pre_before_post() {
        assert!(Priority::PreSequencer < Priority::PostSequencer);
        assert!(Priority::First < Priority::Last);
    }
}
