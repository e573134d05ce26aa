use std::time::Duration;

use uring_core::{RequestId, Ring};

fn main() -> uring_core::Result<()> {
    let mut ring = Ring::setup(8)?;

    println!("uring_core example - Hello, io_uring!");
    println!("Submission queue space: {}", ring.sq_space_left());
    println!("Completion queue entries: {}", ring.cq_capacity());

    for n in 0..4u32 {
        if !ring.nop(RequestId::from(n)) {
            println!("Submission queue full at {n}");
            break;
        }
    }
    println!("Prepared {} NOP operations", ring.in_flight());

    let submitted = ring.submit()?;
    println!("Submitted {submitted} operations");

    while ring.in_flight() > 0 {
        match ring.wait_timeout(Duration::from_secs(1))? {
            Some(c) => println!("Completed {}: {}", c.id(), c.result()),
            None => println!("Still waiting"),
        }
    }

    ring.teardown()?;
    println!("Example completed successfully!");
    Ok(())
}
