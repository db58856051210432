//! Sleep behavior: exact resumption times under the cooperative driver.

use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::time::Duration;

use coexsim::SimWorld;

/// Yields until no task makes further progress.
async fn settle(sim: &SimWorld) {
    loop {
        let before = sim.progress_token();
        tokio::task::yield_now().await;
        if sim.progress_token() == before {
            break;
        }
    }
}

/// Settles, then alternates single steps with settling until the queue runs
/// dry.
async fn run_all(sim: &mut SimWorld) {
    loop {
        settle(sim).await;
        if !sim.has_pending_events() {
            break;
        }
        sim.step();
    }
}

fn local_runtime() -> (tokio::runtime::Runtime, tokio::task::LocalSet) {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .build()
        .expect("failed to build local runtime");
    (runtime, tokio::task::LocalSet::new())
}

#[test]
fn sleep_resumes_at_exact_virtual_time() {
    let (runtime, local) = local_runtime();
    local.block_on(&runtime, async {
        let mut sim = SimWorld::new_with_seed(1);
        let weak = sim.downgrade();
        let woke_at: Rc<Cell<Option<Duration>>> = Rc::new(Cell::new(None));

        let result = Rc::clone(&woke_at);
        tokio::task::spawn_local(async move {
            let world = weak.upgrade().unwrap();
            world.sleep(Duration::from_micros(120)).await.unwrap();
            result.set(Some(weak.now().unwrap()));
        });

        run_all(&mut sim).await;
        assert_eq!(woke_at.get(), Some(Duration::from_micros(120)));
        assert_eq!(sim.now(), Duration::from_micros(120));
    });
}

#[test]
fn nested_sleeps_accumulate() {
    let (runtime, local) = local_runtime();
    local.block_on(&runtime, async {
        let mut sim = SimWorld::new_with_seed(1);
        let weak = sim.downgrade();
        let times: Rc<RefCell<Vec<Duration>>> = Rc::new(RefCell::new(Vec::new()));

        let log = Rc::clone(&times);
        tokio::task::spawn_local(async move {
            let world = weak.upgrade().unwrap();
            for delay in [10u64, 20, 30] {
                world.sleep(Duration::from_micros(delay)).await.unwrap();
                log.borrow_mut().push(weak.now().unwrap());
            }
        });

        run_all(&mut sim).await;
        assert_eq!(
            *times.borrow(),
            vec![
                Duration::from_micros(10),
                Duration::from_micros(30),
                Duration::from_micros(60),
            ]
        );
    });
}

#[test]
fn zero_duration_sleep_completes() {
    let (runtime, local) = local_runtime();
    local.block_on(&runtime, async {
        let mut sim = SimWorld::new_with_seed(1);
        let weak = sim.downgrade();
        let done = Rc::new(Cell::new(false));

        let flag = Rc::clone(&done);
        tokio::task::spawn_local(async move {
            let world = weak.upgrade().unwrap();
            world.sleep(Duration::ZERO).await.unwrap();
            flag.set(true);
        });

        run_all(&mut sim).await;
        assert!(done.get());
        assert_eq!(sim.now(), Duration::ZERO);
    });
}
