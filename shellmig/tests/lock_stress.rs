//! Competing drivers on one target never overlap inside lock/unlock.

use std::rc::Rc;
use std::cell::Cell;
use std::time::Duration;

use shellmig::{Driver, DriverConfig, MemoryDriver};
use tokio::task::{JoinSet, LocalSet};

const COMPETITORS: usize = 8;
const ROUNDS: usize = 10;

#[derive(Default)]
struct Occupancy {
    inside: Cell<usize>,
    max_inside: Cell<usize>,
    entries: Cell<usize>,
}

#[tokio::test]
async fn competitors_are_mutually_exclusive() {
    let occupancy = Rc::new(Occupancy::default());
    let local = LocalSet::new();

    local
        .run_until(async {
            let mut tasks = JoinSet::new();
            for _ in 0..COMPETITORS {
                let occupancy = Rc::clone(&occupancy);
                tasks.spawn_local(async move {
                    let config = DriverConfig::default().with_database_name("stress");
                    let mut driver = MemoryDriver::connect(config).await.expect("memory driver");

                    for _ in 0..ROUNDS {
                        driver.lock().await.expect("lock");
                        let now = occupancy.inside.get() + 1;
                        occupancy.inside.set(now);
                        occupancy.max_inside.set(occupancy.max_inside.get().max(now));
                        occupancy.entries.set(occupancy.entries.get() + 1);

                        tokio::time::sleep(Duration::from_millis(1)).await;

                        occupancy.inside.set(occupancy.inside.get() - 1);
                        driver.unlock().await.expect("unlock");
                    }
                    driver.close().await.expect("close");
                });
            }
            while let Some(joined) = tasks.join_next().await {
                joined.expect("competitor panicked");
            }
        })
        .await;

    assert_eq!(occupancy.max_inside.get(), 1);
    assert_eq!(occupancy.entries.get(), COMPETITORS * ROUNDS);
    assert_eq!(occupancy.inside.get(), 0);
}
