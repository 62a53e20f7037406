//! Installs [`GlobalHeap`] as the process allocator with the heap checker
//! turned on, then shows what the boundary tags buy: `Vec` growth that stays
//! in place and freed neighbours that merge into one reusable block.
//!
//! No logger is installed, see the `global` module docs.

use tagheap::{GlobalHeap, HeapConfig, HeapStats};

#[global_allocator]
static ALLOCATOR: GlobalHeap =
    GlobalHeap::with_config(HeapConfig::new().max_heap(1 << 22).check_invariants(true));

fn print_stats(label: &str) {
    let Some(stats) = ALLOCATOR.stats() else {
        println!("[{label}] heap unavailable");
        return;
    };

    let HeapStats {
        heap_size,
        allocated_blocks,
        free_blocks,
        largest_free,
        ..
    } = stats;

    println!(
        "[{label}] {heap_size} bytes, {allocated_blocks} allocated, \
         {free_blocks} free, largest free {largest_free}"
    );
}

fn main() {
    print_stats("start");

    // Every realloc first tries to absorb the free block right after the
    // vector, so the buffer only moves when its successor is taken.
    let mut numbers: Vec<u64> = Vec::with_capacity(4);
    let mut last = numbers.as_ptr();
    let mut moves = 0;

    for i in 0..256 {
        numbers.push(i);
        if numbers.as_ptr() != last {
            moves += 1;
            last = numbers.as_ptr();
        }
    }

    println!(
        "vec grew to capacity {} at {:p}, moved {moves} times",
        numbers.capacity(),
        numbers.as_ptr()
    );

    // Shrinking splits the tail off in place.
    let before = numbers.as_ptr();
    numbers.truncate(16);
    numbers.shrink_to_fit();
    println!("shrink_to_fit kept the address: {}", before == numbers.as_ptr());
    print_stats("after vec");

    // Two neighbours freed one after the other merge, so a request for
    // their combined payload lands where the first one was.
    let a = Box::new([1u8; 96]);
    let b = Box::new([2u8; 96]);
    let guard = Box::new([3u8; 16]);
    let addr_a = a.as_ptr();

    drop(a);
    drop(b);
    print_stats("after dropping a and b");

    let merged = Box::new([4u8; 96 + 96 + 16]);
    if merged.as_ptr() == addr_a {
        println!("merged block reused at {:p}", merged.as_ptr());
    } else {
        println!("not reused: a was at {:p}, merged is at {:p}", addr_a, merged.as_ptr());
    }

    drop(merged);
    drop(guard);
    drop(numbers);
    print_stats("end");
}
