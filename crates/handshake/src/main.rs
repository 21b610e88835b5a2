use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use handshake::mock::MockHost;
use handshake::HandshakeEngine;

fn main() {
    env_logger::init();

    let host = MockHost::new();
    let engine = HandshakeEngine::new(host);
    engine.register_worker(1);

    let counter = Arc::new(AtomicUsize::new(0));
    let c = counter.clone();

    let future = engine
        .run_thread_local(
            &[1],
            move |worker| {
                c.fetch_add(1, Ordering::SeqCst);
                println!("worker {worker} ran the handshake action");
                Ok(())
            },
            || println!("handshake done"),
            true,
            false,
        )
        .unwrap();

    engine.poll(1).unwrap();
    future.get();

    println!("end! ({} run)", counter.load(Ordering::SeqCst));
}
