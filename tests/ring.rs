//! Ring buffer invariants across cursor alignments and wraparound.

use kwait::KernelError;
use kwait::ring::RingBuffer;

const CAP: usize = 8;

/// A buffer whose cursors have been advanced `shift` slots, so every test
/// runs at every possible alignment relative to the wraparound boundary.
fn shifted(shift: usize) -> RingBuffer {
    let mut ring = RingBuffer::new(CAP).unwrap();
    let junk = vec![0xAA; shift];
    assert_eq!(ring.write(&junk), shift);
    let mut sink = vec![0; shift];
    assert_eq!(ring.read(&mut sink), shift);
    ring
}

#[test]
fn rejects_useless_capacities() {
    assert_eq!(RingBuffer::new(0).err(), Some(KernelError::InvalidArgument));
    assert_eq!(RingBuffer::new(1).err(), Some(KernelError::InvalidArgument));
}

#[test]
fn quiescent_invariant_holds_at_every_alignment_and_fill() {
    for shift in 0..CAP {
        for fill in 0..CAP {
            let mut ring = shifted(shift);
            let data = vec![0x55; fill];
            let written = ring.write(&data);
            assert_eq!(written, fill.min(CAP - 1));
            assert_eq!(
                ring.readable_size() + ring.writable_size(),
                CAP - 1,
                "shift {shift}, fill {fill}"
            );
            assert_eq!(ring.readable_size(), written);
        }
    }
}

#[test]
fn round_trip_preserves_bytes_across_wraparound() {
    let payload: Vec<u8> = (0..CAP as u8 - 1).collect();
    for shift in 0..CAP {
        let mut ring = shifted(shift);
        assert_eq!(ring.write(&payload), payload.len());
        assert!(ring.is_full());

        let mut out = vec![0; payload.len()];
        assert_eq!(ring.read(&mut out), payload.len());
        assert_eq!(out, payload, "shift {shift}");
        assert!(ring.is_empty());
    }
}

#[test]
fn full_buffer_accepts_nothing_more() {
    let mut ring = RingBuffer::new(CAP).unwrap();
    assert_eq!(ring.write(&[1; CAP + 3]), CAP - 1);
    assert_eq!(ring.write(&[2; 4]), 0);
    assert_eq!(ring.writable_size(), 0);
}

#[test]
fn peek_does_not_consume() {
    for shift in 0..CAP {
        let mut ring = shifted(shift);
        ring.write(b"abcde");

        let mut first = [0; 5];
        let mut second = [0; 5];
        assert_eq!(ring.peek(&mut first), 5);
        assert_eq!(ring.peek(&mut second), 5);
        assert_eq!(&first, b"abcde");
        assert_eq!(first, second);
        assert_eq!(ring.readable_size(), 5);

        let mut out = [0; 5];
        assert_eq!(ring.read(&mut out), 5);
        assert_eq!(&out, b"abcde");
        assert_eq!(ring.peek(&mut out), 0);
    }
}

#[test]
fn contiguous_runs_cover_the_split_copy() {
    // Park the cursors right before the boundary so a 5-byte write wraps.
    let mut ring = shifted(CAP - 2);
    ring.write(b"vwxyz");

    let first = ring.contiguous_readable_size();
    assert!(first < 5);
    assert_eq!(ring.contiguous_readable(), &b"vwxyz"[..first]);

    ring.advance_read(first);
    let rest = ring.contiguous_readable_size();
    assert_eq!(first + rest, 5);
    assert_eq!(ring.contiguous_readable(), &b"vwxyz"[first..]);
    ring.advance_read(rest);
    assert!(ring.is_empty());
}

#[test]
fn contiguous_write_then_commit_matches_copying_write() {
    let mut ring = shifted(3);
    let payload = b"0123456";

    let mut offset = 0;
    while offset < payload.len() {
        let run = ring.contiguous_writable();
        assert!(!run.is_empty());
        let n = run.len().min(payload.len() - offset);
        run[..n].copy_from_slice(&payload[offset..offset + n]);
        ring.advance_write(n);
        offset += n;
    }

    let mut out = vec![0; payload.len()];
    assert_eq!(ring.read(&mut out), payload.len());
    assert_eq!(&out[..], &payload[..]);
}

#[test]
#[should_panic]
fn overcommitting_the_read_cursor_panics() {
    let mut ring = RingBuffer::new(CAP).unwrap();
    ring.write(b"ab");
    ring.advance_read(3);
}
