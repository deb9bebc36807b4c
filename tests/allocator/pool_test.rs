//! Tests for the allocation pools and the block-to-label mapping.

use straylight::allocator::{
    default_mcs_allocation, AllocationBitmap, AllocationError, McsAllocator, UidAllocator,
};
use straylight::mcs::{CategoryRange, Label};
use straylight::uid::{Block, Range};

fn small_range() -> Range {
    match Range::new(10, 20, 2) {
        Ok(range) => range,
        Err(err) => panic!("range should build: {err}"),
    }
}

fn category_range(prefix: &str, n: u32, k: u32) -> CategoryRange {
    match CategoryRange::new(prefix, n, k) {
        Ok(range) => range,
        Err(err) => panic!("category range should build: {err}"),
    }
}

#[test]
fn bitmap_allocates_lowest_free_offset() {
    let mut pool = AllocationBitmap::new("test", 3);
    assert_eq!(pool.allocate_next(), Ok(0));
    assert_eq!(pool.allocate(2), Ok(()));
    assert_eq!(pool.allocate_next(), Ok(1));
    assert_eq!(pool.allocate_next(), Err(AllocationError::Full));
    assert_eq!(pool.count(), 3);
    assert_eq!(pool.free(), 0);

    pool.release(1);
    pool.release(1);
    assert_eq!(pool.count(), 2);
    assert_eq!(pool.allocated().collect::<Vec<_>>(), vec![0, 2]);
}

#[test]
fn bitmap_rejects_out_of_range_and_duplicates() {
    let mut pool = AllocationBitmap::new("test", 3);
    assert!(matches!(pool.allocate(3), Err(AllocationError::NotInRange { .. })));
    assert_eq!(pool.allocate(1), Ok(()));
    assert_eq!(pool.allocate(1), Err(AllocationError::AlreadyAllocated { offset: 1 }));
    assert!(!pool.has(3));
}

#[test]
fn snapshot_is_minimal_big_endian() {
    let mut pool = AllocationBitmap::new("test", 100);
    assert_eq!(pool.snapshot(), ("test".to_owned(), Vec::new()));

    assert_eq!(pool.allocate(0), Ok(()));
    assert_eq!(pool.allocate(2), Ok(()));
    assert_eq!(pool.snapshot().1, vec![0b101]);

    assert_eq!(pool.allocate(8), Ok(()));
    assert_eq!(pool.snapshot().1, vec![0x01, 0b101]);

    assert_eq!(pool.allocate(64), Ok(()));
    let (_, bytes) = pool.snapshot();
    assert_eq!(bytes.len(), 9);
    assert_eq!(bytes.first(), Some(&0x01));
}

#[test]
fn restore_round_trips_and_checks_descriptor() {
    let mut pool = AllocationBitmap::new("a", 100);
    for offset in [0, 7, 63, 64, 99] {
        assert_eq!(pool.allocate(offset), Ok(()));
    }
    let (descriptor, data) = pool.snapshot();

    let mut copy = AllocationBitmap::new("a", 100);
    assert_eq!(copy.restore(&descriptor, &data), Ok(()));
    assert_eq!(copy, pool);

    let mut other = AllocationBitmap::new("b", 100);
    assert!(matches!(
        other.restore(&descriptor, &data),
        Err(AllocationError::MismatchedRange { .. })
    ));
    assert_eq!(other.count(), 0);
}

#[test]
fn restore_discards_bits_beyond_capacity() {
    let mut pool = AllocationBitmap::new("small", 5);
    assert_eq!(pool.restore("small", &[0xFF]), Ok(()));
    assert_eq!(pool.count(), 5);
    assert!(!pool.has(5));
    assert_eq!(pool.allocate_next(), Err(AllocationError::Full));
}

#[test]
fn uid_allocator_hands_out_blocks_in_order() {
    let mut pool = UidAllocator::new(small_range());
    assert_eq!(pool.allocate_next(), Ok(Block { start: 10, end: 11 }));
    assert_eq!(pool.allocate(&Block { start: 14, end: 15 }), Ok(()));
    assert_eq!(pool.allocate_next(), Ok(Block { start: 12, end: 13 }));
    assert!(pool.has(&Block { start: 14, end: 15 }));
    assert_eq!(pool.free(), 2);

    assert!(matches!(
        pool.allocate(&Block { start: 11, end: 12 }),
        Err(AllocationError::NotInDomain { .. })
    ));

    pool.release(&Block { start: 10, end: 11 });
    assert_eq!(pool.allocate_next(), Ok(Block { start: 10, end: 11 }));
}

#[test]
fn uid_allocator_reports_full() {
    let mut pool = UidAllocator::new(small_range());
    for _ in 0..5 {
        assert!(pool.allocate_next().is_ok());
    }
    assert_eq!(pool.allocate_next(), Err(AllocationError::Full));
}

#[test]
fn mcs_allocator_hands_out_labels_in_order() {
    let mut pool = McsAllocator::new(category_range("s0:", 3, 2));
    let first = pool.allocate_next().map(|l| l.to_string());
    assert_eq!(first.as_deref(), Ok("s0:c1,c0"));

    let taken = match Label::parse("s0:c2,c1") {
        Ok(label) => label,
        Err(err) => panic!("label should parse: {err}"),
    };
    assert_eq!(pool.allocate(&taken), Ok(()));
    assert!(pool.has(&taken));

    let second = pool.allocate_next().map(|l| l.to_string());
    assert_eq!(second.as_deref(), Ok("s0:c2,c0"));
    assert!(pool.allocate_next().is_err());
    assert_eq!(pool.count(), 3);
}

#[test]
fn block_to_label_mapping_spreads_namespaces() {
    let mcs = default_mcs_allocation(small_range(), category_range("s0:", 10, 2), 5);
    let label_for = |start: u32| mcs(&Block { start, end: start.saturating_add(1) }).map(|l| l.to_string());

    assert_eq!(label_for(10).as_deref(), Some("s0:c1,c0"));
    // Offset 1 * 5 = 5: c3,c2.
    assert_eq!(label_for(12).as_deref(), Some("s0:c3,c2"));
    // Unaligned blocks get nothing.
    assert_eq!(label_for(11), None);
}

#[test]
fn block_to_label_mapping_stops_past_the_label_space() {
    // 3 labels, multiplier 2: offsets 0 and 2 fit, 4 does not.
    let mcs = default_mcs_allocation(small_range(), category_range("s0:", 3, 2), 2);
    assert!(mcs(&Block { start: 10, end: 11 }).is_some());
    assert!(mcs(&Block { start: 12, end: 13 }).is_some());
    assert!(mcs(&Block { start: 14, end: 15 }).is_none());
}
