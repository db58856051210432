//! Shared-medium channel: live transmissions, live sensing operations,
//! busy/idle queries and collision detection.
//!
//! The channel is the only resource shared across node processes. It owns the
//! registries outright: nodes interact through add/remove/query operations
//! and never hold references into each other's transmissions. Membership
//! changes happen atomically between suspension points, so no process can
//! observe a half-updated registry.

use std::{
    cell::RefCell,
    collections::HashMap,
    rc::Rc,
    time::Duration,
};

use crate::{
    SimResult, WeakSimWorld,
    sleep::SenseOutcome,
};

/// Which family of radio nodes owns a transmission or sensing operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Family {
    /// Cellular unlicensed-band base station.
    Gnb,
    /// WiFi access point.
    Ap,
}

impl std::fmt::Display for Family {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Family::Gnb => write!(f, "gnb"),
            Family::Ap => write!(f, "ap"),
        }
    }
}

/// A single occupation of the medium.
///
/// Two distinct transmissions collide iff their `[start, end)` intervals
/// overlap, regardless of family; both sides are flagged.
#[derive(Debug, Clone)]
pub struct Transmission {
    /// Owning family.
    pub family: Family,
    /// Instant the medium was seized.
    pub start: Duration,
    /// Reservation-signal time preceding the data portion (zero for WiFi).
    pub reservation: Duration,
    /// Data airtime.
    pub airtime: Duration,
    /// `start + reservation + airtime`.
    pub end: Duration,
    /// Set when any other live transmission overlapped this one.
    pub collided: bool,
    /// Retransmission count of the pending frame this attempt carries.
    pub retransmissions: u32,
}

impl Transmission {
    /// Builds a transmission record beginning at `start`.
    pub fn begin(
        family: Family,
        start: Duration,
        reservation: Duration,
        airtime: Duration,
        retransmissions: u32,
    ) -> Self {
        Self {
            family,
            start,
            reservation,
            airtime,
            end: start + reservation + airtime,
            collided: false,
            retransmissions,
        }
    }

    fn overlaps(&self, other: &Transmission) -> bool {
        other.end > self.start && other.start < self.end
    }
}

#[derive(Debug, Default)]
struct ChannelInner {
    next_id: u64,
    gnb_transmissions: HashMap<u64, Transmission>,
    ap_transmissions: HashMap<u64, Transmission>,
    // Sensing registries keep insertion order so interruption delivery is
    // deterministic.
    gnb_senses: Vec<u64>,
    ap_senses: Vec<u64>,
    bytes_sent: u64,
}

/// Handle to the process-wide shared medium.
#[derive(Debug, Clone)]
pub struct Channel {
    sim: WeakSimWorld,
    inner: Rc<RefCell<ChannelInner>>,
}

impl Channel {
    /// Creates an idle channel bound to a simulation world.
    pub fn new(sim: WeakSimWorld) -> Self {
        Self {
            sim,
            inner: Rc::new(RefCell::new(ChannelInner::default())),
        }
    }

    /// Time until the medium becomes unoccupied; zero means idle now.
    pub fn time_until_idle(&self) -> SimResult<Duration> {
        let now = self.sim.now()?;
        let inner = self.inner.borrow();
        let left = inner
            .gnb_transmissions
            .values()
            .chain(inner.ap_transmissions.values())
            .map(|t| t.end.saturating_sub(now))
            .max()
            .unwrap_or(Duration::ZERO);
        Ok(left)
    }

    /// Adds a transmission to its family's registry, returning its handle.
    pub fn register_transmission(&self, t: Transmission) -> u64 {
        let mut inner = self.inner.borrow_mut();
        let id = inner.next_id;
        inner.next_id += 1;
        match t.family {
            Family::Gnb => inner.gnb_transmissions.insert(id, t),
            Family::Ap => inner.ap_transmissions.insert(id, t),
        };
        id
    }

    /// Removes a transmission, returning its final record.
    pub fn unregister_transmission(&self, id: u64) -> Option<Transmission> {
        let mut inner = self.inner.borrow_mut();
        inner
            .gnb_transmissions
            .remove(&id)
            .or_else(|| inner.ap_transmissions.remove(&id))
    }

    /// Flags `id` and every live transmission overlapping it as collided.
    ///
    /// Returns whether `id` collided. Called exactly once per data
    /// transmission, immediately before unregistering it, so that
    /// concurrently-starting transmissions of the other family are still
    /// visible.
    pub fn check_collision(&self, id: u64) -> bool {
        let mut inner = self.inner.borrow_mut();
        let inner = &mut *inner;
        let Some(subject) = inner
            .gnb_transmissions
            .get(&id)
            .or_else(|| inner.ap_transmissions.get(&id))
            .cloned()
        else {
            return false;
        };

        let mut collided = subject.collided;
        for (other_id, other) in inner
            .gnb_transmissions
            .iter_mut()
            .chain(inner.ap_transmissions.iter_mut())
        {
            if *other_id != id && subject.overlaps(other) {
                other.collided = true;
                collided = true;
            }
        }

        if let Some(subject) = inner
            .gnb_transmissions
            .get_mut(&id)
            .or_else(|| inner.ap_transmissions.get_mut(&id))
        {
            subject.collided = collided;
        }
        collided
    }

    /// Registers a sensing operation as interruptible by medium activity.
    pub fn begin_sense(&self, family: Family, sense_id: u64) {
        let mut inner = self.inner.borrow_mut();
        match family {
            Family::Gnb => inner.gnb_senses.push(sense_id),
            Family::Ap => inner.ap_senses.push(sense_id),
        }
    }

    /// Removes a sensing operation from its registry.
    pub fn end_sense(&self, family: Family, sense_id: u64) {
        let mut inner = self.inner.borrow_mut();
        let senses = match family {
            Family::Gnb => &mut inner.gnb_senses,
            Family::Ap => &mut inner.ap_senses,
        };
        senses.retain(|&id| id != sense_id);
    }

    /// Interrupts every live sensing operation of both families.
    ///
    /// Invoked at the instant any transmission or reservation signal starts:
    /// a now-busy medium immediately stops in-progress clear-channel
    /// assessment. Interruption order follows registration order.
    pub fn interrupt_all_sensing(&self) -> SimResult<()> {
        let sim = self.sim.upgrade()?;
        let ids: Vec<u64> = {
            let inner = self.inner.borrow();
            inner
                .gnb_senses
                .iter()
                .chain(inner.ap_senses.iter())
                .copied()
                .collect()
        };
        for id in ids {
            sim.interrupt(id);
        }
        Ok(())
    }

    /// Bytes delivered by successful AP data transmissions.
    pub fn bytes_sent(&self) -> u64 {
        self.inner.borrow().bytes_sent
    }

    /// Credits a successful AP data transmission.
    pub fn add_bytes_sent(&self, bytes: u64) {
        self.inner.borrow_mut().bytes_sent += bytes;
    }

    /// Number of live transmissions across both families.
    pub fn live_transmissions(&self) -> usize {
        let inner = self.inner.borrow();
        inner.gnb_transmissions.len() + inner.ap_transmissions.len()
    }

    // ---- contention-cycle operations shared by both node families ----

    /// Suspends until the medium is observed idle.
    pub async fn wait_until_idle(&self) -> SimResult<()> {
        loop {
            let waiting = self.time_until_idle()?;
            if waiting.is_zero() {
                return Ok(());
            }
            tracing::trace!(?waiting, "medium busy, waiting for idle");
            self.sim.upgrade()?.sleep(waiting).await?;
        }
    }

    /// Counts down `slots` observation slots as an interruptible sensing
    /// operation registered for `family`.
    pub async fn sense_slots(
        &self,
        family: Family,
        slots: u32,
        slot_duration: Duration,
    ) -> SimResult<SenseOutcome> {
        let sim = self.sim.upgrade()?;
        let sense = sim.sense(slots, slot_duration);
        let id = sense.id();
        self.begin_sense(family, id);
        let outcome = sense.await;
        self.end_sense(family, id);
        outcome
    }

    /// Senses the medium for a fixed interval; `true` iff it stayed clear.
    ///
    /// Returns `false` without suspending when the medium is already busy.
    pub async fn sense_clear(&self, family: Family, duration: Duration) -> SimResult<bool> {
        if !self.time_until_idle()?.is_zero() {
            return Ok(false);
        }
        let outcome = self.sense_slots(family, 1, duration).await?;
        Ok(outcome == SenseOutcome::Elapsed)
    }

    /// Performs one full medium occupation: register, interrupt all sensing,
    /// hold for reservation + airtime, collision-check, unregister.
    ///
    /// Returns the final transmission record with its `collided` verdict.
    pub async fn occupy(
        &self,
        family: Family,
        reservation: Duration,
        airtime: Duration,
        retransmissions: u32,
    ) -> SimResult<Transmission> {
        let sim = self.sim.upgrade()?;
        let mut record =
            Transmission::begin(family, sim.now(), reservation, airtime, retransmissions);
        let id = self.register_transmission(record.clone());
        self.interrupt_all_sensing()?;

        sim.sleep(reservation).await?;
        sim.sleep(airtime).await?;

        record.collided = self.check_collision(id);
        let _ = self.unregister_transmission(id);
        Ok(record)
    }

    /// Occupies the medium with a reservation signal carrying no data.
    ///
    /// The signal interrupts all sensing and collides like any transmission,
    /// but its record is discarded and never collision-checked itself.
    pub async fn hold_reservation(&self, family: Family, duration: Duration) -> SimResult<()> {
        let sim = self.sim.upgrade()?;
        let record = Transmission::begin(family, sim.now(), Duration::ZERO, duration, 0);
        let id = self.register_transmission(record);
        self.interrupt_all_sensing()?;
        sim.sleep(duration).await?;
        let _ = self.unregister_transmission(id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SimWorld;

    fn micros(us: u64) -> Duration {
        Duration::from_micros(us)
    }

    fn tx(family: Family, start: u64, airtime: u64) -> Transmission {
        Transmission::begin(family, micros(start), Duration::ZERO, micros(airtime), 0)
    }

    #[test]
    fn overlapping_transmissions_both_flagged() {
        let sim = SimWorld::new();
        let channel = Channel::new(sim.downgrade());

        let a = channel.register_transmission(tx(Family::Gnb, 0, 100));
        let b = channel.register_transmission(tx(Family::Ap, 50, 100));

        assert!(channel.check_collision(a));
        let a = channel.unregister_transmission(a).unwrap();
        let b = channel.unregister_transmission(b).unwrap();
        assert!(a.collided);
        assert!(b.collided);
    }

    #[test]
    fn non_overlapping_transmissions_not_flagged() {
        let sim = SimWorld::new();
        let channel = Channel::new(sim.downgrade());

        let a = channel.register_transmission(tx(Family::Gnb, 0, 100));
        let b = channel.register_transmission(tx(Family::Ap, 100, 100));

        assert!(!channel.check_collision(a));
        assert!(!channel.check_collision(b));
        assert!(!channel.unregister_transmission(a).unwrap().collided);
        assert!(!channel.unregister_transmission(b).unwrap().collided);
    }

    #[test]
    fn same_family_transmissions_collide_too() {
        let sim = SimWorld::new();
        let channel = Channel::new(sim.downgrade());

        let a = channel.register_transmission(tx(Family::Ap, 10, 50));
        let b = channel.register_transmission(tx(Family::Ap, 30, 50));

        assert!(channel.check_collision(a));
        assert!(channel.unregister_transmission(b).unwrap().collided);
    }

    #[test]
    fn collision_check_after_unregister_does_not_reflag() {
        let sim = SimWorld::new();
        let channel = Channel::new(sim.downgrade());

        let a = channel.register_transmission(tx(Family::Gnb, 0, 100));
        let b = channel.register_transmission(tx(Family::Ap, 200, 100));

        assert!(!channel.check_collision(a));
        let _ = channel.unregister_transmission(a);
        // `a` is gone; re-checking its handle is safe and changes nothing.
        assert!(!channel.check_collision(a));
        assert!(!channel.unregister_transmission(b).unwrap().collided);
    }

    #[test]
    fn time_until_idle_tracks_latest_end() {
        let mut sim = SimWorld::new();
        let channel = Channel::new(sim.downgrade());

        assert_eq!(channel.time_until_idle().unwrap(), Duration::ZERO);

        let short = channel.register_transmission(tx(Family::Ap, 0, 60));
        let _long = channel.register_transmission(tx(Family::Gnb, 0, 150));
        assert_eq!(channel.time_until_idle().unwrap(), micros(150));

        // Advance virtual time to 100 us; only the long one still occupies.
        let _ = sim.sleep(micros(100));
        sim.step();
        let _ = channel.unregister_transmission(short);
        assert_eq!(channel.time_until_idle().unwrap(), micros(50));
    }

    #[test]
    fn sense_registry_add_remove() {
        let sim = SimWorld::new();
        let channel = Channel::new(sim.downgrade());

        channel.begin_sense(Family::Gnb, 1);
        channel.begin_sense(Family::Ap, 2);
        channel.end_sense(Family::Gnb, 1);
        channel.end_sense(Family::Ap, 2);
        // Interrupting with empty registries is a no-op.
        channel.interrupt_all_sensing().unwrap();
    }
}
