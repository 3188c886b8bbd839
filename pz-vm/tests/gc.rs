use pz_vm::heap::{Heap, HeapOptions, HeapRoot, NoGcScope, ScopedRoots};

fn heap() -> Heap {
    Heap::new(HeapOptions::default()).expect("mapping chunks")
}

#[test]
fn collection_reclaims_half_and_counts_once() {
    let mut heap = heap();
    let root = HeapRoot;
    let roots = ScopedRoots::new(&root);

    // Allocate N cells, keep roots to every other one.
    let mut kept: Vec<usize> = Vec::with_capacity(8);
    for index in 0..16 {
        let cell = heap.alloc(4, &roots).expect("allocating").as_ptr() as usize;
        if index % 2 == 0 {
            kept.push(cell);
        }
    }

    for slot in &kept {
        roots.add_root(slot);
    }

    let before = heap.usage_words();
    heap.collect(&roots);

    assert_eq!(heap.collections(), 1);
    assert!(heap.usage_words() < before);
    assert_eq!(heap.usage_words(), kept.len() * 4);
    heap.check_bits().expect("bitmap consistency after sweep");

    for slot in kept.iter().rev() {
        roots.remove_root(slot);
    }
}

#[test]
fn allocation_recovers_after_collection() {
    let mut heap = heap();
    let root = HeapRoot;
    let roots = ScopedRoots::new(&root);

    for _ in 0..64 {
        heap.alloc(8, &roots).expect("allocating garbage");
    }
    let high_water = heap.usage_words();

    // Nothing is rooted: a collection frees everything and reuse follows.
    heap.collect(&roots);
    assert!(heap.is_empty());

    for _ in 0..64 {
        heap.alloc(8, &roots).expect("allocating after the sweep");
    }
    assert_eq!(heap.usage_words(), high_water);
    heap.check_bits().expect("bitmap consistency after reuse");
}

#[test]
fn no_gc_scope_holds_the_collection_counter_still() {
    let mut heap = Heap::new(HeapOptions { zealous: true }).expect("mapping chunks");
    let root = HeapRoot;
    let roots = ScopedRoots::new(&root);

    // Seed the heap so a zealous allocation would otherwise collect.
    let seeded: usize = heap.alloc(2, &roots).unwrap().as_ptr() as usize;
    let slot = &seeded as *const usize;
    roots.add_root(slot);

    {
        let scope = NoGcScope::new(&roots);
        for _ in 0..32 {
            heap.alloc(2, &scope).expect("allocation without collection");
        }
        assert_eq!(heap.collections(), 0);
        assert!(!scope.is_oom());
    }

    // Outside the scope the zealous heap collects again.
    heap.alloc(2, &roots).expect("allocating with roots");
    assert!(heap.collections() > 0);

    roots.remove_root(slot);
}

#[test]
fn mixed_cell_sizes_keep_their_bitmaps_consistent() {
    let mut heap = heap();
    let root = HeapRoot;
    let roots = ScopedRoots::new(&root);

    let keep_a: usize = heap.alloc(2, &roots).unwrap().as_ptr() as usize;
    let keep_b: usize = heap.alloc(32, &roots).unwrap().as_ptr() as usize;
    for _ in 0..10 {
        heap.alloc(2, &roots).unwrap();
        heap.alloc(16, &roots).unwrap();
        heap.alloc(100, &roots).unwrap();
    }

    let slot_a = &keep_a as *const usize;
    let slot_b = &keep_b as *const usize;
    roots.add_root(slot_a);
    roots.add_root(slot_b);
    heap.collect(&roots);
    roots.remove_root(slot_b);
    roots.remove_root(slot_a);

    assert_eq!(heap.usage_words(), 2 + 32);
    heap.check_bits().expect("bitmap consistency across size classes");

    // The survivors keep their contents addressable.
    unsafe {
        std::ptr::write(keep_a as *mut usize, 0x1234);
        assert_eq!(std::ptr::read(keep_a as *const usize), 0x1234);
    }
}
