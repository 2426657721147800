use self::format::{RecordingLayer, SimpleFormatter};

use super::*;
use crate::error::Corruption;
use crate::header::{is_stamped, NEXT_OFFSET, SIZE_OFFSET};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing_subscriber::fmt::Layer;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{EnvFilter, Registry};


/// Creates a freshly stamped heap whose single free block holds `capacity` bytes.
fn heap_with_capacity(capacity: u32, options: HeapOptions) -> RawHeap<Vec<u8>> {
    let len = FIRST_BLOCK_ADDR as usize + HEADER_LEN + capacity as usize;
    let heap = RawHeap::init_with(vec![0_u8; len], options).unwrap();
    assert_eq!(heap.capacity(), capacity);
    heap
}

fn fresh(capacity: u32) -> RawHeap<Vec<u8>> {
    heap_with_capacity(capacity, HeapOptions::default())
}

fn chain<M: Memory>(heap: &RawHeap<M>) -> Vec<(Addr, bool, u32, Addr)> {
    heap.blocks()
        .map(|b| b.unwrap())
        .map(|b| (b.addr, b.is_used(), b.size(), b.next()))
        .collect()
}

/// Checks that the chain tiles the buffer and returns the stats.
fn assert_tiled<M: Memory>(heap: &RawHeap<M>) -> HeapStats {
    let stats = heap.check().unwrap();
    assert_eq!(
        stats.header_bytes() + stats.used_bytes + stats.free_bytes,
        (heap.bytes().len() - FIRST_BLOCK_ADDR as usize) as u64
    );
    stats
}

#[test]
fn test_init_stamps_single_free_block() {
    let heap = fresh(100);
    assert_eq!(heap.break_cell(), FIRST_BLOCK_ADDR as u8);
    assert_eq!(chain(&heap), vec![(FIRST_BLOCK_ADDR, false, 100, NULL)]);
    assert_eq!(heap.bytes()[0], 0);

    let stats = assert_tiled(&heap);
    assert_eq!(stats.blocks, 1);
    assert_eq!(stats.largest_free, 100);
}

#[test]
fn test_init_is_idempotent() {
    let mut heap = fresh(100);
    assert_eq!(heap.allocate(10).unwrap(), 11);

    let buf = heap.into_inner();
    assert!(is_stamped(&buf));
    let snapshot = buf.clone();

    let mut heap = RawHeap::init(buf).unwrap();
    assert_eq!(heap.bytes(), &snapshot[..]);
    assert_eq!(
        chain(&heap),
        vec![(2, true, 10, 21), (21, false, 81, NULL)]
    );
    assert_eq!(heap.allocate(10).unwrap(), 30);
}

#[test]
fn test_init_rejects_small_buffer() {
    let err = RawHeap::init(vec![0_u8; MIN_BUFFER_LEN - 1]).unwrap_err();
    assert_eq!(
        err,
        HeapError::BufferTooSmall {
            len: MIN_BUFFER_LEN - 1,
            min: MIN_BUFFER_LEN
        }
    );
    assert!(RawHeap::init(vec![0_u8; MIN_BUFFER_LEN]).is_ok());
}

#[test]
fn test_borrowed_buffer() {
    let mut buf = [0_u8; 64];
    {
        let mut heap = RawHeap::init(&mut buf).unwrap();
        let p = heap.allocate(8).unwrap();
        heap.region_mut(p).unwrap().copy_from_slice(b"flatheap");
    }
    assert!(is_stamped(&buf));
    assert_eq!(&buf[11..19], b"flatheap");

    let heap = RawHeap::init(&mut buf[..]).unwrap();
    assert_eq!(heap.region(11).unwrap(), b"flatheap");
}

#[test]
fn test_allocate_zero_is_null() {
    let mut heap = fresh(100);
    let before = heap.bytes().to_vec();
    assert_eq!(heap.allocate(0).unwrap(), NULL);
    assert_eq!(heap.bytes(), &before[..]);
}

#[test]
fn test_exhaustion() {
    for size in [1, 10, 75, 76, 90, 99, 100] {
        let mut heap = fresh(100);
        let p = heap.allocate(size).unwrap();
        assert_ne!(p, NULL, "size {size} should fit");
        assert!((p as usize) < heap.bytes().len());
        assert!(heap.region(p).unwrap().len() >= size as usize);
        assert_tiled(&heap);
    }

    let mut heap = fresh(100);
    assert_eq!(heap.allocate(101).unwrap(), NULL);
    assert_eq!(heap.allocate(u32::MAX).unwrap(), NULL);
}

#[test]
fn test_exact_fit_reuse() {
    let mut heap = fresh(200);
    let p1 = heap.allocate(24).unwrap();
    let _p2 = heap.allocate(40).unwrap();
    heap.release(p1).unwrap();
    assert_eq!(heap.allocate(24).unwrap(), p1);
}

#[test]
fn test_split_correctness() {
    let mut heap = fresh(100);
    let before = assert_tiled(&heap);

    let p = heap.allocate(30).unwrap();
    assert_eq!(p, FIRST_BLOCK_ADDR + HEADER_SIZE);
    assert_eq!(heap.region(p).unwrap().len(), 30);
    assert_eq!(
        chain(&heap),
        vec![(2, true, 30, 41), (41, false, 100 - 30 - HEADER_SIZE, NULL)]
    );

    let after = assert_tiled(&heap);
    assert_eq!(
        before.header_bytes() + before.free_bytes,
        after.header_bytes() + after.free_bytes + after.used_bytes
    );
}

#[test]
fn test_split_threshold() {
    // 10 + 9 + 16 bytes is the smallest block that gets split for a 10 byte request.
    let mut heap = fresh(10 + HEADER_SIZE + BLOCK_CONTENT_MIN_SIZE);
    heap.allocate(10).unwrap();
    assert_eq!(chain(&heap).len(), 2);
    assert_eq!(chain(&heap)[1].2, BLOCK_CONTENT_MIN_SIZE);

    let mut heap = fresh(10 + HEADER_SIZE + BLOCK_CONTENT_MIN_SIZE - 1);
    heap.allocate(10).unwrap();
    assert_eq!(chain(&heap), vec![(2, true, 34, NULL)]);
}

#[test]
fn test_whole_block_consumption() {
    let mut heap = fresh(100);
    let p = heap.allocate(80).unwrap();
    assert_eq!(p, 11);
    assert_eq!(chain(&heap), vec![(2, true, 100, NULL)]);
    assert_eq!(heap.allocate(1).unwrap(), NULL);

    heap.release(p).unwrap();
    assert_eq!(heap.allocate(100).unwrap(), p);
}

#[test]
fn test_fragmentation_scenario() {
    let mut heap = fresh(100);
    let p1 = heap.allocate(10).unwrap();
    let p2 = heap.allocate(20).unwrap();
    assert_eq!((p1, p2), (11, 30));

    heap.release(p1).unwrap();
    assert_eq!(heap.allocate(10).unwrap(), p1);
    assert_eq!(
        chain(&heap),
        vec![(2, true, 10, 21), (21, true, 20, 50), (50, false, 52, NULL)]
    );
}

#[test]
fn test_first_fit_order() {
    let mut heap = fresh(400);
    let p1 = heap.allocate(60).unwrap();
    let _p2 = heap.allocate(10).unwrap();
    let p3 = heap.allocate(60).unwrap();
    let _p4 = heap.allocate(10).unwrap();
    heap.release(p3).unwrap();
    heap.release(p1).unwrap();

    // Both freed blocks fit, the earlier one in chain order wins and gets split.
    assert_eq!(heap.allocate(20).unwrap(), p1);
    assert_eq!(heap.allocate(20).unwrap(), p1 + 20 + HEADER_SIZE);
    assert_eq!(heap.allocate(60).unwrap(), p3);
    assert_tiled(&heap);
}

#[test]
fn test_release_null_is_noop() {
    let mut heap = fresh(100);
    let before = heap.bytes().to_vec();
    heap.release(NULL).unwrap();
    assert_eq!(heap.bytes(), &before[..]);
    assert_eq!(heap.allocate(10).unwrap(), 11);
}

#[test]
fn test_release_only_clears_used_bit() {
    let mut heap = fresh(100);
    let p = heap.allocate(10).unwrap();
    let start = (p - HEADER_SIZE) as usize;
    heap.memory[start] |= 0b1000_0000;
    let before = heap.bytes().to_vec();

    heap.release(p).unwrap();
    assert_eq!(heap.bytes()[start], 0b1000_0000);
    assert_eq!(heap.bytes()[start + 1..], before[start + 1..]);

    // Reserved bits also survive a reuse of the block.
    assert_eq!(heap.allocate(10).unwrap(), p);
    assert_eq!(heap.bytes()[start], 0b1000_0001);
}

#[test]
fn test_release_out_of_bounds() {
    let mut heap = fresh(100);
    let len = heap.bytes().len();
    assert_eq!(
        heap.release(5),
        Err(HeapError::OutOfBounds { addr: 5, len })
    );
    assert_eq!(
        heap.release(10),
        Err(HeapError::OutOfBounds { addr: 10, len })
    );
    for addr in [len as Addr, len as Addr + 2, len as Addr + HEADER_SIZE + 1] {
        assert_eq!(
            heap.release(addr),
            Err(HeapError::OutOfBounds { addr, len })
        );
    }
}

#[test]
fn test_release_past_end_leaves_data_alone() {
    let mut heap = fresh(100);
    let len = heap.bytes().len();
    heap.memory[len - 7] = 0xff;

    // The header of this address would start inside the last block's data.
    let addr = len as Addr + 2;
    assert_eq!(
        heap.release(addr),
        Err(HeapError::OutOfBounds { addr, len })
    );
    assert_eq!(heap.memory[len - 7], 0xff);
    assert_tiled(&heap);
}

#[test]
fn test_retain_keeps_freed_blocks_apart() {
    let mut heap = fresh(200);
    let a = heap.allocate(20).unwrap();
    let b = heap.allocate(20).unwrap();
    let _c = heap.allocate(20).unwrap();
    heap.release(a).unwrap();
    heap.release(b).unwrap();

    assert_eq!(assert_tiled(&heap).blocks, 4);
    // 49 bytes would fit into a and b merged, the tail is used instead.
    assert_eq!(heap.allocate(49).unwrap(), 98);
    assert_eq!(assert_tiled(&heap).free_blocks, 3);
}

#[test]
fn test_coalesce_on_scan() {
    let options = HeapOptions::new().with_release(ReleasePolicy::Coalesce);
    let mut heap = heap_with_capacity(200, options);
    let a = heap.allocate(20).unwrap();
    let b = heap.allocate(20).unwrap();
    let _c = heap.allocate(20).unwrap();
    heap.release(a).unwrap();
    heap.release(b).unwrap();

    // a was freed first so the merge happens while scanning.
    assert_eq!(assert_tiled(&heap).blocks, 4);
    assert_eq!(heap.allocate(49).unwrap(), a);
    assert_eq!(chain(&heap)[0], (2, true, 49, 60));
    assert_tiled(&heap);
}

#[test]
fn test_coalesce_on_release() {
    let options = HeapOptions::new().with_release(ReleasePolicy::Coalesce);
    let mut heap = heap_with_capacity(200, options);
    let _a = heap.allocate(20).unwrap();
    let b = heap.allocate(20).unwrap();
    let c = heap.allocate(20).unwrap();

    heap.release(c).unwrap();
    assert_eq!(chain(&heap)[2], (60, false, 20 + HEADER_SIZE + 113, NULL));

    heap.release(b).unwrap();
    assert_eq!(
        chain(&heap),
        vec![(2, true, 20, 31), (31, false, 200 - 20 - HEADER_SIZE, NULL)]
    );
    assert_tiled(&heap);
}

#[test]
fn test_corrupt_next_is_reported() {
    let mut heap = fresh(100);
    heap.allocate(10).unwrap();
    let next = FIRST_BLOCK_ADDR as usize + NEXT_OFFSET;
    heap.memory[next..next + 4].copy_from_slice(&500_u32.to_be_bytes());

    let expected = HeapError::CorruptHeap {
        addr: FIRST_BLOCK_ADDR,
        reason: Corruption::Gap,
    };
    assert_eq!(heap.allocate(20), Err(expected));
    assert_eq!(heap.check(), Err(expected));
    assert!(heap.dump().is_err());
}

#[test]
fn test_corrupt_size_is_reported() {
    let mut heap = fresh(100);
    let size = FIRST_BLOCK_ADDR as usize + SIZE_OFFSET;
    heap.memory[size..size + 4].copy_from_slice(&1000_u32.to_be_bytes());
    assert_eq!(
        heap.allocate(20),
        Err(HeapError::CorruptHeap {
            addr: FIRST_BLOCK_ADDR,
            reason: Corruption::ExtentOverrun
        })
    );

    let mut heap = fresh(100);
    heap.memory[size..size + 4].copy_from_slice(&50_u32.to_be_bytes());
    assert_eq!(
        heap.check(),
        Err(HeapError::CorruptHeap {
            addr: FIRST_BLOCK_ADDR,
            reason: Corruption::ShortChain
        })
    );
}

#[test]
fn test_block_at() {
    let mut heap = fresh(100);
    heap.allocate(10).unwrap();
    assert_eq!(heap.block_at(NULL).unwrap(), None);
    assert_eq!(heap.block_at(500).unwrap(), None);

    let first = heap.block_at(FIRST_BLOCK_ADDR).unwrap().unwrap();
    assert!(first.is_used());
    assert_eq!(first.region(), 11);
    let second = heap.block_at(first.next()).unwrap().unwrap();
    assert_eq!((second.size(), second.next()), (81, NULL));
    assert_eq!(heap.block_at(second.next()).unwrap(), None);
}

#[test]
fn test_dump() {
    let mut heap = fresh(100);
    heap.allocate(10).unwrap();
    assert_eq!(
        heap.dump().unwrap(),
        "0x00000002     used         10 0x00000015 0x0000000b\n\
         0x00000015 not used         81 0x00000000 0x0000001e\n"
    );
}

#[test]
fn test_dump_reports_corruption() {
    let mut heap = fresh(100);
    heap.allocate(10).unwrap();
    heap.memory[FIRST_BLOCK_ADDR as usize + NEXT_OFFSET + 3] = 0x16;
    assert_eq!(
        heap.dump(),
        Err(HeapError::CorruptHeap {
            addr: FIRST_BLOCK_ADDR,
            reason: Corruption::Gap
        })
    );
}

#[test]
fn test_default_options() {
    assert_eq!(HeapOptions::default(), HeapOptions::new());
    assert_eq!(HeapOptions::default().release, ReleasePolicy::Retain);
    assert_eq!(fresh(100).options(), HeapOptions::new());
}

#[test]
fn test_regions_do_not_overlap() {
    let mut heap = fresh(1024);
    let mut live = vec![];
    for (i, size) in [1_u32, 7, 16, 33, 64, 5, 120].into_iter().enumerate() {
        let p = heap.allocate(size).unwrap();
        assert_ne!(p, NULL);
        heap.region_mut(p).unwrap().fill(i as u8 + 1);
        live.push((p, i as u8 + 1));
    }
    for (p, byte) in live {
        assert!(heap.region(p).unwrap().iter().all(|&b| b == byte));
    }
}

#[test]
fn test_random_workload_keeps_invariants() {
    for policy in [ReleasePolicy::Retain, ReleasePolicy::Coalesce] {
        let mut rng = StdRng::seed_from_u64(123_456_789);
        let mut heap = heap_with_capacity(4096, HeapOptions::new().with_release(policy));
        let mut live: Vec<Addr> = vec![];

        for _ in 0..2000 {
            if rng.gen_bool(0.5) {
                let p = heap.allocate(rng.gen_range(1..=256)).unwrap();
                if p != NULL {
                    live.push(p);
                }
            } else if !live.is_empty() {
                let p = live.swap_remove(rng.gen_range(0..live.len()));
                heap.release(p).unwrap();
            }

            let stats = assert_tiled(&heap);
            assert_eq!(stats.used_blocks, live.len());

            let mut ranges: Vec<_> = live
                .iter()
                .map(|&p| (p, p + heap.region(p).unwrap().len() as Addr))
                .collect();
            ranges.sort_unstable();
            assert!(ranges.windows(2).all(|w| w[0].1 <= w[1].0));
        }
    }
}

#[test]
fn test_logged_session() {
    let recorder = RecordingLayer::default();
    let subscriber = Registry::default()
        .with(EnvFilter::new("flat_malloc=debug"))
        .with(recorder.clone())
        .with(Layer::new().event_format(SimpleFormatter).with_test_writer());

    tracing::subscriber::with_default(subscriber, || {
        let options = HeapOptions::new().with_release(ReleasePolicy::Coalesce);
        let mut heap = heap_with_capacity(100, options);
        let p1 = heap.allocate(10).unwrap();
        let p2 = heap.allocate(10).unwrap();
        heap.release(p2).unwrap();
        heap.release(p1).unwrap();
        assert_eq!(heap.allocate(200).unwrap(), NULL);
    });

    let messages = recorder.messages();
    for expected in [
        "Stamped a fresh heap.",
        "Split block.",
        "Merging with successive free block.",
        "No free block can hold the request.",
    ] {
        assert!(
            messages.iter().any(|m| m == expected),
            "missing {expected:?} in {messages:?}"
        );
    }
}
