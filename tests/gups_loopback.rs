//! GUPS-style end-to-end test di atas loopback fabric.
//!
//! Empat core dalam satu proses: core 0 memiliki array counter, core
//! lain menembakkan increment acak lewat shape-1 message. Memeriksa
//! total update, urutan per-sender, dan state allocator setelah free.
//!
//! Usage:
//!   cargo test --release --test gups_loopback

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;

use atlas::{
    loopback_fabric, Core, CoreConfig, CoreId, GlobalAddress, HandlerRegistry, Result,
};

fn bump(_: &(), cell: *mut i64) {
    // SAFETY: cell points into the dispatching core's own region.
    unsafe { *cell += 1 };
}

fn add(amount: &i64, cell: *mut i64) {
    // SAFETY: as above.
    unsafe { *cell += *amount };
}

static ARRIVALS: Mutex<Vec<u32>> = Mutex::new(Vec::new());
fn observe(seq: &u32) {
    ARRIVALS.lock().unwrap().push(*seq);
}

static PAYLOAD_SUM: AtomicU64 = AtomicU64::new(0);
fn accumulate(_: &(), p: *const u64, n: usize) {
    for i in 0..n {
        // SAFETY: p/n delimit the payload block of this record.
        let v = unsafe { std::ptr::read_unaligned(p.add(i)) };
        PAYLOAD_SUM.fetch_add(v, Ordering::Relaxed);
    }
}

/// Deterministic PCG-style mixer, enough for scatter addresses.
fn next(seed: &mut u64) -> u64 {
    *seed = seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
    *seed >> 16
}

#[test]
fn test_gups_multithreaded() -> Result<()> {
    const CORES: usize = 4;
    const UPDATES_PER_SENDER: usize = 200_000;
    const ARRAY_CELLS: u64 = 1 << 16;

    let mut registry = HandlerRegistry::new();
    let handler = registry.register_addressed(bump)?;
    let registry = Arc::new(registry);

    let config = CoreConfig {
        heap_bytes: 1 << 20,
        ..CoreConfig::default()
    };

    let mut endpoints = loopback_fabric(CORES);
    let mut home = Core::new(endpoints.remove(0), registry.clone(), config)?;
    let array: GlobalAddress<i64> = home.global_alloc(ARRAY_CELLS as usize)?;
    let heap_after_alloc = home.heap_stats();

    // Senders: one thread per remaining core.
    let mut senders = Vec::new();
    for (i, ep) in endpoints.into_iter().enumerate() {
        let registry = registry.clone();
        senders.push(thread::spawn(move || -> Result<()> {
            let mut core = Core::new(ep, registry, config)?;
            let mut seed = 0x2545f4914f6cdd1du64 ^ (i as u64);
            for _ in 0..UPDATES_PER_SENDER {
                let cell = array + next(&mut seed) % ARRAY_CELLS;
                core.send_addressed(cell, handler, &())?;
            }
            core.flush()?;
            Ok(())
        }));
    }

    // Home core drains until every update has landed.
    let expected = (CORES - 1) * UPDATES_PER_SENDER;
    let mut landed = 0;
    while landed < expected {
        landed += home.poll()?;
        if landed < expected {
            thread::yield_now();
        }
    }

    for sender in senders {
        sender.join().expect("sender thread panicked")?;
    }

    let mut sum = 0i64;
    for i in 0..ARRAY_CELLS {
        sum += home.get(array + i)?;
    }
    assert_eq!(sum as usize, expected);

    // Nothing stays behind: stats match the post-alloc state, and the
    // free returns the allocator to where construction left it.
    assert_eq!(home.heap_stats(), heap_after_alloc);
    home.global_free(array)?;
    assert_eq!(home.heap_stats().bytes_in_use, 0);
    Ok(())
}

#[test]
fn test_submission_order_preserved() -> Result<()> {
    const MESSAGES: u32 = 10_000;

    let mut registry = HandlerRegistry::new();
    let observe_h = registry.register_simple(observe)?;
    let accumulate_h = registry.register_payload(accumulate)?;
    let registry = Arc::new(registry);

    let config = CoreConfig {
        heap_bytes: 4096,
        ..CoreConfig::default()
    };
    let mut fabric = loopback_fabric(2);
    let sender_ep = fabric.remove(1);
    let mut receiver = Core::new(fabric.remove(0), registry.clone(), config)?;
    let mut sender = Core::new(sender_ep, registry, config)?;

    ARRIVALS.lock().unwrap().clear();
    PAYLOAD_SUM.store(0, Ordering::Relaxed);

    // Interleave two shapes; per-sender order must survive combining
    // and multiple flush boundaries.
    let mut payload_total = 0u64;
    for seq in 0..MESSAGES {
        sender.send_simple(CoreId(0), observe_h, &seq)?;
        if seq % 7 == 0 {
            let payload = [seq as u64, 2 * seq as u64];
            payload_total += payload[0] + payload[1];
            sender.send_payload(CoreId(0), accumulate_h, &(), &payload)?;
        }
        if seq % 997 == 0 {
            sender.flush()?;
            receiver.poll()?;
        }
    }
    sender.flush()?;
    receiver.poll()?;

    let arrivals = ARRIVALS.lock().unwrap();
    assert_eq!(arrivals.len(), MESSAGES as usize);
    assert!(
        arrivals.windows(2).all(|w| w[0] + 1 == w[1]),
        "arrivals out of submission order"
    );
    assert_eq!(PAYLOAD_SUM.load(Ordering::Relaxed), payload_total);
    Ok(())
}

#[test]
fn test_descending_scatter() -> Result<()> {
    const CHUNKS: u64 = 64;

    let mut registry = HandlerRegistry::new();
    let add_h = registry.register_addressed(add)?;
    let registry = Arc::new(registry);

    let config = CoreConfig {
        heap_bytes: 1 << 16,
        ..CoreConfig::default()
    };
    let mut fabric = loopback_fabric(2);
    let sender_ep = fabric.remove(1);
    let mut home = Core::new(fabric.remove(0), registry.clone(), config)?;
    let mut sender = Core::new(sender_ep, registry, config)?;

    let table: GlobalAddress<i64> = home.global_alloc(CHUNKS as usize)?;

    // Descending-address sweep exercises negative stride combining on
    // the wire while still landing every delta on the right cell.
    for i in (0..CHUNKS).rev() {
        sender.send_addressed(table + i, add_h, &(i as i64 + 1))?;
    }
    sender.flush()?;
    let landed = home.poll()?;
    assert_eq!(landed, CHUNKS as usize);

    for i in 0..CHUNKS {
        assert_eq!(home.get(table + i)?, i as i64 + 1);
    }

    home.global_free(table)?;
    Ok(())
}
