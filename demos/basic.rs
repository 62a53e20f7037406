//! Walks through the main operations of the heap and prints the block layout
//! after each one. Run with `RUST_LOG=trace` to see the allocator's decisions.

use std::ptr::NonNull;

use tagheap::{Heap, HeapConfig};

fn log_alloc(addr: NonNull<u8>, size: usize) {
    println!("Requested {size} bytes of memory");
    println!("Received this address: {addr:?}");
}

fn print_heap(heap: &Heap, label: &str) {
    println!("\n[{label}] heap size = {} bytes", heap.heap_size());

    for block in heap.blocks() {
        let state = if block.allocated { "alloc" } else { "free " };
        println!("  {state} {:?} {:>6} bytes", block.addr, block.size);
    }
}

fn main() {
    env_logger::init();

    let mut heap = Heap::new(HeapConfig::default()).expect("heap initialization failed");
    print_heap(&heap, "init");

    let a = heap.allocate(100).expect("out of memory");
    log_alloc(a, 100);
    let b = heap.allocate(16).expect("out of memory");
    log_alloc(b, 16);
    let c = heap.allocate(1024).expect("out of memory");
    log_alloc(c, 1024);
    print_heap(&heap, "three allocations");

    unsafe {
        heap.deallocate(b);
        print_heap(&heap, "free b");

        // Grows in place, b's old block sits right after a.
        let a = heap.resize(a, 120).expect("out of memory");
        print_heap(&heap, "resize a to 120");

        // Does not fit anywhere, so the heap grows.
        let d = heap.allocate(8000).expect("out of memory");
        log_alloc(d, 8000);
        print_heap(&heap, "large allocation");

        heap.deallocate(a);
        heap.deallocate(c);
        heap.deallocate(d);
    }

    print_heap(&heap, "everything freed");
    println!("\n{:#?}", heap.stats());

    heap.check().expect("heap is corrupted");
}
