//! Demonstration driver for the halde memory engine.
//!
//! Walks the public API scenario by scenario: plain allocation, split
//! and coalesce behavior, the three placement strategies, the defensive
//! checks, pool buckets and the collector. Diagnostics go through
//! `env_logger`; run with `RUST_LOG=debug` to watch every operation.

use std::ptr::NonNull;

use clap::{Parser, ValueEnum};
use halde::{BucketConfig, DEFAULT_BUCKETS, Engine, EngineConfig, Heap, PoolSet, Strategy};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum StrategyArg {
    First,
    Best,
    Worst,
}

impl From<StrategyArg> for Strategy {
    fn from(arg: StrategyArg) -> Strategy {
        match arg {
            StrategyArg::First => Strategy::FirstFit,
            StrategyArg::Best => Strategy::BestFit,
            StrategyArg::Worst => Strategy::WorstFit,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Scenario {
    Basic,
    SplitCoalesce,
    Strategies,
    DoubleFree,
    InvalidPointer,
    Oom,
    Spray,
    Collector,
    Pool,
    Routing,
}

const ALL_SCENARIOS: [Scenario; 10] = [
    Scenario::Basic,
    Scenario::SplitCoalesce,
    Scenario::Strategies,
    Scenario::DoubleFree,
    Scenario::InvalidPointer,
    Scenario::Oom,
    Scenario::Spray,
    Scenario::Collector,
    Scenario::Pool,
    Scenario::Routing,
];

#[derive(Parser)]
#[command(name = "halde", about = "Exercise the halde memory engine")]
struct Args {
    /// Heap region size in bytes.
    #[arg(long, default_value_t = 8 * 1024)]
    heap_size: usize,

    /// Placement strategy the heap starts with.
    #[arg(long, value_enum, default_value_t = StrategyArg::First)]
    strategy: StrategyArg,

    /// Run one scenario instead of the whole walk.
    #[arg(long, value_enum)]
    scenario: Option<Scenario>,
}

fn main() {
    env_logger::init();
    let args = Args::parse();
    log::debug!(
        "starting with a {} byte heap, {:?} strategy",
        args.heap_size,
        args.strategy
    );

    println!("=== halde memory engine ===");
    let scenarios = match args.scenario {
        Some(single) => vec![single],
        None => ALL_SCENARIOS.to_vec(),
    };

    for scenario in scenarios {
        match scenario {
            Scenario::Basic => with_heap(&args, "basic allocation", basic),
            Scenario::SplitCoalesce => with_heap(&args, "split & coalesce", split_coalesce),
            Scenario::Strategies => with_heap(&args, "placement strategies", strategies),
            Scenario::DoubleFree => with_heap(&args, "double free", double_free),
            Scenario::InvalidPointer => with_heap(&args, "invalid pointer", invalid_pointer),
            Scenario::Oom => with_heap(&args, "out of memory", out_of_memory),
            Scenario::Spray => with_heap(&args, "spray pattern", spray),
            Scenario::Collector => with_heap(&args, "collector", collector),
            Scenario::Pool => pool_walk(),
            Scenario::Routing => routing(&args),
        }
    }

    println!("\n=== all scenarios completed ===");
}

fn with_heap(args: &Args, title: &str, run: fn(&mut Heap)) {
    println!("\n[{title}]");
    let mut heap = match Heap::new(args.heap_size) {
        Ok(heap) => heap,
        Err(err) => {
            eprintln!("heap init failed: {err}");
            std::process::exit(1);
        }
    };
    heap.set_strategy(args.strategy.into());
    run(&mut heap);
}

fn print_blocks(heap: &Heap) {
    for block in heap.blocks() {
        println!(
            "  block 0x{:x} | size {:>6} | {}",
            block.addr,
            block.size,
            if block.free { "free" } else { "used" }
        );
    }
}

fn basic(heap: &mut Heap) {
    let a = heap.allocate(64).expect("allocate 64");
    let b = heap.allocate(128).expect("allocate 128");
    print_blocks(heap);

    heap.release(a).expect("release a");
    heap.release(b).expect("release b");
    println!("  after release:");
    print_blocks(heap);
}

fn split_coalesce(heap: &mut Heap) {
    let a = heap.allocate(200).expect("allocate a");
    let b = heap.allocate(200).expect("allocate b");
    print_blocks(heap);

    heap.release(a).expect("release a");
    println!("  after releasing a:");
    print_blocks(heap);

    heap.release(b).expect("release b");
    println!("  after releasing b (coalesced):");
    print_blocks(heap);
}

fn strategies(heap: &mut Heap) {
    for strategy in [Strategy::FirstFit, Strategy::BestFit, Strategy::WorstFit] {
        heap.set_strategy(strategy);
        println!("  strategy: {strategy}");

        let a = heap.allocate(120).expect("allocate a");
        let b = heap.allocate(60).expect("allocate b");
        heap.release(a).expect("release a");

        let c = heap.allocate(50).expect("allocate c");
        print_blocks(heap);

        heap.release(b).expect("release b");
        heap.release(c).expect("release c");
    }
}

fn double_free(heap: &mut Heap) {
    let a = heap.allocate(64).expect("allocate");
    heap.release(a).expect("first release");

    match heap.release(a) {
        Err(err) => println!("  detected: {err}"),
        Ok(()) => println!("  MISSED a double free!"),
    }
}

fn invalid_pointer(heap: &mut Heap) {
    let mut local = 0u32;
    let bogus = NonNull::from(&mut local).cast::<u8>();

    match heap.release(bogus) {
        Err(err) => println!("  detected: {err}"),
        Ok(()) => println!("  MISSED an invalid pointer!"),
    }
}

fn out_of_memory(heap: &mut Heap) {
    match heap.allocate(heap.total_size() * 10) {
        Err(err) => println!("  detected: {err}"),
        Ok(_) => println!("  MISSED an impossible allocation!"),
    }
}

fn spray(heap: &mut Heap) {
    let mut blocks = Vec::new();
    for _ in 0..64 {
        blocks.push(heap.allocate(32).expect("spray allocation"));
    }
    let stats = heap.stats();
    println!(
        "  64 blocks live: {} used bytes across {} blocks",
        stats.used_bytes, stats.block_count
    );

    for ptr in blocks {
        heap.release(ptr).expect("release");
    }
    let stats = heap.stats();
    println!(
        "  after release: {} block(s), largest free span {}",
        stats.block_count, stats.largest_free
    );
}

fn collector(heap: &mut Heap) {
    let a = heap.allocate(64).expect("a");
    let b = heap.allocate(128).expect("b, which becomes garbage");
    let c = heap.allocate(256).expect("c");
    println!("  before collection:");
    print_blocks(heap);

    // Only a and c are still reachable from the caller's point of view.
    let stats = heap.collect(&[a, c]);
    println!(
        "  collected: {} live, {} reclaimed ({} bytes)",
        stats.live_blocks, stats.reclaimed_blocks, stats.reclaimed_bytes
    );
    print_blocks(heap);

    heap.release(a).expect("release a");
    heap.release(c).expect("release c");
    let _ = b;
}

fn pool_walk() {
    println!("\n[pool buckets]");
    let mut pools = PoolSet::new(&DEFAULT_BUCKETS);

    let small = pools.allocate(16).expect("16 bytes fits the 32s");
    let middle = pools.allocate(64).expect("64 bytes fits the 64s");
    let large = pools.allocate(100).expect("100 bytes fits the 128s");

    for bucket in pools.buckets() {
        println!(
            "  bucket {:>3}B | free {:>3} of {:>3}",
            bucket.block_size, bucket.free_slots, bucket.capacity
        );
    }

    for ptr in [small, middle, large] {
        assert!(pools.release(ptr).expect("release"), "pool owns the slot");
    }
    println!("  oversized request handled by pool: {}", pools.allocate(4096).is_some());
}

fn routing(args: &Args) {
    println!("\n[pool/heap routing]");
    let mut engine = Engine::new(EngineConfig {
        heap_size: args.heap_size,
        strategy: args.strategy.into(),
        buckets: vec![BucketConfig {
            block_size: 32,
            capacity: 1,
        }],
    })
    .expect("engine init");

    let pooled = engine.allocate(32).expect("first 32B request");
    let spilled = engine.allocate(32).expect("second 32B request");
    println!(
        "  first request in heap region: {}",
        engine.heap().contains(pooled)
    );
    println!(
        "  second request in heap region: {} (bucket exhausted)",
        engine.heap().contains(spilled)
    );

    engine.release(pooled).expect("release pooled");
    engine.release(spilled).expect("release spilled");
    engine.dump();
}
