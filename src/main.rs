//! Atlas - PGAS Runtime Core demo
//!
//! Walkthrough:
//! - Buddy allocator: malloc/free churn di global heap
//! - Aggregation: combining throughput ke sink transport
//! - GUPS: random remote increments lewat loopback fabric
//!
//! To run: cargo run --release

use std::sync::Arc;
use std::time::Instant;

use atlas::{
    loopback_fabric, Aggregator, BuddyAllocator, Core, CoreConfig, CoreId, GlobalAddress,
    HandlerRegistry, SinkTransport,
};

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    println!("🌐 Atlas PGAS Runtime Core - demo v0.2");
    println!("======================================\n");

    benchmark_allocator();
    benchmark_aggregation();
    benchmark_gups();

    println!("\n✅ All benchmarks complete!");
}

fn benchmark_allocator() {
    println!("📊 Buddy Allocator Benchmark");
    println!("----------------------------");

    const ITERATIONS: usize = 100_000;
    let mut allocator = BuddyAllocator::new(1 << 24);
    let mut live: Vec<u64> = Vec::with_capacity(ITERATIONS);

    let start = Instant::now();
    let mut seed = 0x9e3779b97f4a7c15u64;
    for _ in 0..ITERATIONS {
        seed = seed.wrapping_mul(6364136223846793005).wrapping_add(1);
        if seed % 2 == 0 || live.is_empty() {
            let bytes = 8 + (seed % 4096) as usize;
            if let Ok(off) = allocator.malloc(bytes) {
                live.push(off);
            }
        } else {
            let at = (seed >> 32) as usize % live.len();
            let off = live.swap_remove(at);
            allocator.free(off).expect("free of live allocation");
        }
    }
    let duration = start.elapsed();

    for off in live.drain(..) {
        allocator.free(off).expect("free of live allocation");
    }

    let stats = allocator.stats();
    let ns = duration.as_nanos() as f64 / ITERATIONS as f64;
    println!("  Operations: {}", ITERATIONS);
    println!("  Latency:    {:.1} ns/op", ns);
    println!(
        "  Throughput: {:.2} M ops/sec",
        ITERATIONS as f64 / duration.as_secs_f64() / 1_000_000.0
    );
    println!(
        "  Final state: {} chunks, {} bytes free\n",
        stats.chunks, stats.bytes_free
    );
}

fn bump(_: &(), cell: *mut i64) {
    // SAFETY: cell points into the local region of the dispatching core.
    unsafe { *cell += 1 };
}

fn benchmark_aggregation() {
    println!("📊 Aggregation Benchmark (stride combining)");
    println!("-------------------------------------------");

    const MESSAGES: usize = 1_000_000;

    let mut registry = HandlerRegistry::new();
    let handler = registry.register_addressed(bump).expect("registry init");

    let mut aggregator = Aggregator::default();
    let mut sink = SinkTransport::new(CoreId(0));
    let array: GlobalAddress<i64> = GlobalAddress::new(CoreId(7), 0);

    let start = Instant::now();
    for i in 0..MESSAGES {
        // Pointer-bump pattern: consecutive cells, zero-size records.
        aggregator
            .send_addressed(array + (i % 1021) as u64, handler, &(), &mut sink)
            .expect("send");
    }
    aggregator.flush(CoreId(7), &mut sink).expect("flush");
    let duration = start.elapsed();

    let ns = duration.as_nanos() as f64 / MESSAGES as f64;
    println!("  Messages:   {}", MESSAGES);
    println!("  Latency:    {:.1} ns/msg", ns);
    println!(
        "  Throughput: {:.2} M msgs/sec",
        MESSAGES as f64 / duration.as_secs_f64() / 1_000_000.0
    );
    println!(
        "  Wire bytes: {} ({:.3} bytes/msg)\n",
        sink.bytes_sent,
        sink.bytes_sent as f64 / MESSAGES as f64
    );
}

fn benchmark_gups() {
    println!("📊 GUPS Benchmark (loopback, 4 cores)");
    println!("-------------------------------------");

    const CORES: usize = 4;
    const LOG_ARRAY_SIZE: u32 = 18;
    const LOG_ITERATIONS: u32 = 18;
    let array_size = 1u64 << LOG_ARRAY_SIZE;
    let iterations = 1usize << LOG_ITERATIONS;

    let mut registry = HandlerRegistry::new();
    let handler = registry.register_addressed(bump).expect("registry init");
    let registry = Arc::new(registry);

    let config = CoreConfig::default();
    let mut cores: Vec<Core<_>> = loopback_fabric(CORES)
        .into_iter()
        .map(|ep| Core::new(ep, registry.clone(), config).expect("core init"))
        .collect();

    // Array of counters lives on core 0.
    let array: GlobalAddress<i64> = cores[0].global_alloc(array_size as usize).expect("alloc");

    let start = Instant::now();
    let mut seed = 0x853c49e6748fea9bu64;
    for _ in 0..iterations {
        for sender in 1..CORES {
            seed = seed.wrapping_mul(6364136223846793005).wrapping_add(1);
            let cell = array + (seed >> 20) % array_size;
            cores[sender].send_addressed(cell, handler, &()).expect("send");
        }
        // Cooperative schedule: the home core drains its inbox inline.
        if seed % 1024 == 0 {
            cores[0].poll().expect("poll");
        }
    }
    for sender in 1..CORES {
        cores[sender].flush().expect("flush");
    }
    let delivered = cores[0].poll().expect("poll");
    let duration = start.elapsed();

    let total_updates = (iterations * (CORES - 1)) as i64;
    let mut sum = 0i64;
    for i in 0..array_size {
        sum += cores[0].get(array + i).expect("local read");
    }
    assert_eq!(sum, total_updates, "every update must land exactly once");

    println!("  Array size: 2^{} cells", LOG_ARRAY_SIZE);
    println!("  Updates:    {} (last drain {})", total_updates, delivered);
    println!(
        "  Throughput: {:.2} M updates/sec",
        total_updates as f64 / duration.as_secs_f64() / 1_000_000.0
    );

    cores[0].global_free(array).expect("free");
}
