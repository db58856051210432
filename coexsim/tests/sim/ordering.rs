//! Same-instant resumption follows scheduling order, keeping runs
//! deterministic.

use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

use coexsim::SimWorld;

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
fn same_time_sleepers_resume_in_spawn_order() {
    let (runtime, local) = local_runtime();
    local.block_on(&runtime, async {
        let mut sim = SimWorld::new_with_seed(1);
        let order: Rc<RefCell<Vec<u32>>> = Rc::new(RefCell::new(Vec::new()));

        for id in 0..4u32 {
            let weak = sim.downgrade();
            let log = Rc::clone(&order);
            tokio::task::spawn_local(async move {
                let world = weak.upgrade().unwrap();
                world.sleep(Duration::from_micros(100)).await.unwrap();
                log.borrow_mut().push(id);
            });
        }

        loop {
            settle(&sim).await;
            if !sim.has_pending_events() {
                break;
            }
            sim.step();
        }
        assert_eq!(*order.borrow(), vec![0, 1, 2, 3]);
    });
}

#[test]
fn later_scheduled_same_time_wake_fires_last() {
    let (runtime, local) = local_runtime();
    local.block_on(&runtime, async {
        let mut sim = SimWorld::new_with_seed(1);
        let order: Rc<RefCell<Vec<&'static str>>> = Rc::new(RefCell::new(Vec::new()));

        // Task "slow" schedules 100 us first; "fast" sleeps 50 then 50,
        // landing on the same instant but with a later-scheduled wake.
        let weak = sim.downgrade();
        let log = Rc::clone(&order);
        tokio::task::spawn_local(async move {
            let world = weak.upgrade().unwrap();
            world.sleep(Duration::from_micros(100)).await.unwrap();
            log.borrow_mut().push("slow");
        });

        let weak = sim.downgrade();
        let log = Rc::clone(&order);
        tokio::task::spawn_local(async move {
            let world = weak.upgrade().unwrap();
            world.sleep(Duration::from_micros(50)).await.unwrap();
            world.sleep(Duration::from_micros(50)).await.unwrap();
            log.borrow_mut().push("fast");
        });

        loop {
            settle(&sim).await;
            if !sim.has_pending_events() {
                break;
            }
            sim.step();
        }
        assert_eq!(*order.borrow(), vec!["slow", "fast"]);
    });
}
