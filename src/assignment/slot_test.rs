use crate::assignment::slot::WorkSlotPool;

#[test]
fn test_acquire_up_to_capacity() {
    let pool = WorkSlotPool::new(2);
    let first = pool.try_acquire(1);
    let second = pool.try_acquire(1);
    let third = pool.try_acquire(1);
    assert!(first.is_some(), "first slot must be granted");
    assert!(second.is_some(), "second slot must be granted");
    assert!(third.is_none(), "pool must refuse slots beyond capacity");
    assert_eq!(pool.in_use(), 2, "got {} expected {}", pool.in_use(), 2);
}

#[test]
fn test_dropping_a_reservation_releases_its_slots() {
    let pool = WorkSlotPool::new(1);
    let reservation = pool.try_acquire(1).expect("slot must be granted");
    assert!(pool.try_acquire(1).is_none(), "pool must be exhausted while the reservation is held");
    drop(reservation);
    assert_eq!(pool.in_use(), 0, "got {} expected {}", pool.in_use(), 0);
    assert!(pool.try_acquire(1).is_some(), "slot must be grantable again after release");
}

#[test]
fn test_multi_slot_reservations_never_overcommit() {
    let pool = WorkSlotPool::new(4);
    let big = pool.try_acquire(3).expect("3 of 4 slots must be granted");
    assert!(pool.try_acquire(2).is_none(), "2 more slots would overcommit the pool");
    let small = pool.try_acquire(1).expect("the final slot must be granted");
    assert_eq!(pool.in_use(), 4, "got {} expected {}", pool.in_use(), 4);
    drop(big);
    drop(small);
    assert_eq!(pool.in_use(), 0, "got {} expected {}", pool.in_use(), 0);
}

#[test]
fn test_load_factor_reflects_usage() {
    let pool = WorkSlotPool::new(4);
    assert_eq!(pool.load_factor(), 0.0, "an empty pool must report zero load");
    let _held = pool.try_acquire(2).expect("2 slots must be granted");
    assert_eq!(pool.load_factor(), 0.5, "got {} expected {}", pool.load_factor(), 0.5);
    assert_eq!(pool.capacity(), 4, "got {} expected {}", pool.capacity(), 4);
}

#[test]
fn test_concurrent_acquires_respect_capacity() {
    let pool = WorkSlotPool::new(8);
    let mut handles = Vec::new();
    for _ in 0..16 {
        let pool = pool.clone();
        handles.push(std::thread::spawn(move || pool.try_acquire(1)));
    }
    let reservations: Vec<_> = handles
        .into_iter()
        .filter_map(|handle| handle.join().expect("acquiring thread panicked"))
        .collect();
    assert_eq!(reservations.len(), 8, "got {} granted slots expected {}", reservations.len(), 8);
    assert_eq!(pool.in_use(), 8, "got {} expected {}", pool.in_use(), 8);
}
