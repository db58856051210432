//! Interruptible sensing: slot countdown, interruption remainders and
//! no-op interrupts.

use std::cell::Cell;
use std::rc::Rc;
use std::time::Duration;

use coexsim::{SenseOutcome, SimWorld};

const SLOT: Duration = Duration::from_micros(9);

async fn settle(sim: &SimWorld) {
    loop {
        let before = sim.progress_token();
        tokio::task::yield_now().await;
        if sim.progress_token() == before {
            break;
        }
    }
}

fn local_runtime() -> (tokio::runtime::Runtime, tokio::task::LocalSet) {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .build()
        .expect("failed to build local runtime");
    (runtime, tokio::task::LocalSet::new())
}

#[test]
fn full_countdown_elapses() {
    let (runtime, local) = local_runtime();
    local.block_on(&runtime, async {
        let mut sim = SimWorld::new_with_seed(1);
        let outcome: Rc<Cell<Option<SenseOutcome>>> = Rc::new(Cell::new(None));

        let sense = sim.sense(4, SLOT);
        let result = Rc::clone(&outcome);
        tokio::task::spawn_local(async move {
            result.set(Some(sense.await.unwrap()));
        });

        loop {
            settle(&sim).await;
            if !sim.has_pending_events() {
                break;
            }
            sim.step();
        }
        assert_eq!(outcome.get(), Some(SenseOutcome::Elapsed));
        assert_eq!(sim.now(), Duration::from_micros(36));
    });
}

#[test]
fn interruption_returns_unconsumed_slots() {
    let (runtime, local) = local_runtime();
    local.block_on(&runtime, async {
        let mut sim = SimWorld::new_with_seed(1);
        let outcome: Rc<Cell<Option<SenseOutcome>>> = Rc::new(Cell::new(None));

        // 5 slots drawn; interrupt after exactly 2 have elapsed.
        let sense = sim.sense(5, SLOT);
        let id = sense.id();
        let result = Rc::clone(&outcome);
        tokio::task::spawn_local(async move {
            result.set(Some(sense.await.unwrap()));
        });

        for _ in 0..2 {
            settle(&sim).await;
            sim.step();
        }
        settle(&sim).await;
        assert_eq!(sim.now(), Duration::from_micros(18));

        sim.interrupt(id);
        settle(&sim).await;
        assert_eq!(
            outcome.get(),
            Some(SenseOutcome::Interrupted { remaining: 3 })
        );
    });
}

#[test]
fn partially_elapsed_slot_counts_as_unconsumed() {
    let (runtime, local) = local_runtime();
    local.block_on(&runtime, async {
        let mut sim = SimWorld::new_with_seed(1);
        let outcome: Rc<Cell<Option<SenseOutcome>>> = Rc::new(Cell::new(None));

        let sense = sim.sense(5, SLOT);
        let id = sense.id();
        let result = Rc::clone(&outcome);
        tokio::task::spawn_local(async move {
            result.set(Some(sense.await.unwrap()));
        });

        // One full slot elapses, then time advances 4 us into the second.
        let _ = sim.sleep(Duration::from_micros(13));
        settle(&sim).await;
        sim.step();
        settle(&sim).await;
        sim.step();
        settle(&sim).await;
        assert_eq!(sim.now(), Duration::from_micros(13));

        sim.interrupt(id);
        settle(&sim).await;
        assert_eq!(
            outcome.get(),
            Some(SenseOutcome::Interrupted { remaining: 4 })
        );
    });
}

#[test]
fn zero_slot_countdown_completes_without_events() {
    let (runtime, local) = local_runtime();
    local.block_on(&runtime, async {
        let sim = SimWorld::new_with_seed(1);
        let outcome: Rc<Cell<Option<SenseOutcome>>> = Rc::new(Cell::new(None));

        let sense = sim.sense(0, SLOT);
        let result = Rc::clone(&outcome);
        tokio::task::spawn_local(async move {
            result.set(Some(sense.await.unwrap()));
        });

        settle(&sim).await;
        assert_eq!(outcome.get(), Some(SenseOutcome::Elapsed));
        assert_eq!(sim.now(), Duration::ZERO);
    });
}

#[test]
fn interrupt_is_idempotent_and_noop_after_completion() {
    let (runtime, local) = local_runtime();
    local.block_on(&runtime, async {
        let mut sim = SimWorld::new_with_seed(1);
        let outcome: Rc<Cell<Option<SenseOutcome>>> = Rc::new(Cell::new(None));

        let sense = sim.sense(2, SLOT);
        let id = sense.id();
        let result = Rc::clone(&outcome);
        tokio::task::spawn_local(async move {
            result.set(Some(sense.await.unwrap()));
        });

        loop {
            settle(&sim).await;
            if !sim.has_pending_events() {
                break;
            }
            sim.step();
        }
        assert_eq!(outcome.get(), Some(SenseOutcome::Elapsed));

        // Interrupting a completed wait, twice, changes nothing.
        sim.interrupt(id);
        sim.interrupt(id);
        settle(&sim).await;
        assert_eq!(outcome.get(), Some(SenseOutcome::Elapsed));
    });
}

#[test]
fn double_interrupt_delivers_once() {
    let (runtime, local) = local_runtime();
    local.block_on(&runtime, async {
        let sim = SimWorld::new_with_seed(1);
        let outcome: Rc<Cell<Option<SenseOutcome>>> = Rc::new(Cell::new(None));

        let sense = sim.sense(3, SLOT);
        let id = sense.id();
        let result = Rc::clone(&outcome);
        tokio::task::spawn_local(async move {
            result.set(Some(sense.await.unwrap()));
        });

        settle(&sim).await;
        sim.interrupt(id);
        sim.interrupt(id);
        settle(&sim).await;
        assert_eq!(
            outcome.get(),
            Some(SenseOutcome::Interrupted { remaining: 3 })
        );
    });
}
