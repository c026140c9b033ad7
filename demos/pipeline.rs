//! Walkthrough of the timing API.
//!
//! Run with: RUST_LOG=warn cargo run --example pipeline

use std::thread;
use std::time::Duration;

fn compute_sum(n: u64) -> u64 {
    let mut total = 0u64;
    for i in 0..n {
        total = total.wrapping_add(std::hint::black_box(i));
    }
    total
}

fn timed_compute_sum() -> Result<u64, timetap::Error> {
    timetap::timed("compute-sum", || compute_sum(1_000_000))
}

fn worker() -> Result<(), timetap::Error> {
    let _a = timetap::scope("Function A")?;
    {
        let _b = timetap::scope("Function B")?;
        thread::sleep(Duration::from_millis(100));
    }
    thread::sleep(Duration::from_millis(100));
    Ok(())
}

fn main() -> Result<(), timetap::Error> {
    env_logger::init();

    {
        let _session = timetap::scope("session")?;
        timed_compute_sum()?;
        thread::sleep(Duration::from_millis(100));
        timed_compute_sum()?;
    }
    timetap::print_table();
    timetap::reset();

    {
        let _session = timetap::scope("session-2")?;
        timed_compute_sum()?;

        // Sections ending while disabled are not recorded.
        timetap::disable();
        thread::sleep(Duration::from_millis(100));
        timed_compute_sum()?;

        timetap::enable();
        thread::sleep(Duration::from_millis(100));
        timed_compute_sum()?;
    }
    timetap::print_table();
    timetap::reset();

    {
        let _pipeline = timetap::scope("pipeline")?;
        {
            let _s1 = timetap::scope("stage-1")?;
            {
                let _s2 = timetap::scope("stage-2")?;
                timetap::timed("stage-3", || thread::sleep(Duration::from_millis(100)))?;
                thread::sleep(Duration::from_millis(100));
            }
            thread::sleep(Duration::from_millis(50));
        }
        // Without an installed device synchronizer this times the host only
        // and logs a warning once.
        let device = timetap::SectionOptions::new()
            .with_device(true)
            .with_verbose(true);
        timetap::timed_with("forward-pass", device, || {
            thread::sleep(Duration::from_millis(20))
        })?;
    }
    timetap::print_table();
    timetap::reset();

    let handles: Vec<_> = (0..5).map(|_| thread::spawn(worker)).collect();
    for handle in handles {
        handle.join().expect("worker panicked")?;
    }
    timetap::print_table();
    println!("{}", timetap::to_json()?);
    Ok(())
}
