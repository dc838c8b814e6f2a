use super::*;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

#[test]
fn test_new_rejects_non_power_of_two() {
    assert!(matches!(
        RingByteChannel::new(6),
        Err(Error::Config { key: Some(ref k), .. }) if k == "ring_capacity"
    ));
    assert!(RingByteChannel::new(0).is_err());
    assert_eq!(RingByteChannel::new(64).unwrap().capacity(), 64);
}

#[test]
fn test_from_config_uses_ring_capacity() {
    let config = BridgeConfig::default().with_ring_capacity(16);
    let channel = RingByteChannel::from_config(&config).unwrap();
    assert_eq!(channel.capacity(), 16);
}

#[test]
fn test_push_copies_only_contiguous_run_before_wrap() {
    let channel = RingByteChannel::new(4).unwrap();
    assert_eq!(channel.push(&[1, 2, 3]).unwrap(), 3);

    let mut buf = [0u8; 2];
    assert_eq!(channel.pull(&mut buf).unwrap(), Some(2));
    assert_eq!(buf, [1, 2]);

    // read_pos = 2, count = 1: the write cursor sits at the last slot
    assert_eq!(channel.push(&[4, 5, 6]).unwrap(), 1);
    assert_eq!(channel.push(&[5, 6]).unwrap(), 2);
    assert_eq!(channel.len(), 4);
}

#[test]
fn test_pull_copies_only_contiguous_run_before_wrap() {
    let channel = RingByteChannel::new(4).unwrap();
    channel.push_all(&[1, 2, 3]).unwrap();
    let mut two = [0u8; 2];
    channel.pull(&mut two).unwrap();
    channel.push_all(&[4, 5, 6]).unwrap();

    let mut buf = [0u8; 4];
    assert_eq!(channel.pull(&mut buf).unwrap(), Some(2));
    assert_eq!(&buf[..2], &[3, 4]);
    assert_eq!(channel.pull(&mut buf).unwrap(), Some(2));
    assert_eq!(&buf[..2], &[5, 6]);
}

#[test]
fn test_zero_length_push_is_noop_even_after_abort() {
    let channel = RingByteChannel::new(4).unwrap();
    assert_eq!(channel.push(&[]).unwrap(), 0);
    channel.abort();
    assert_eq!(channel.push(&[]).unwrap(), 0);
    assert!(channel.is_empty());
}

#[test]
fn test_zero_length_pull_returns_immediately() {
    // Nothing buffered and no end: a real pull would block forever
    let channel = RingByteChannel::new(4).unwrap();
    let mut empty: [u8; 0] = [];
    assert_eq!(channel.pull(&mut empty).unwrap(), Some(0));
}

#[test]
fn test_end_is_reported_only_after_drain() {
    let channel = RingByteChannel::new(8).unwrap();
    channel.push_all(b"abc").unwrap();
    channel.signal_end();

    let mut buf = [0u8; 2];
    assert_eq!(channel.pull(&mut buf).unwrap(), Some(2));
    assert_eq!(channel.pull(&mut buf).unwrap(), Some(1));
    assert_eq!(buf[0], b'c');
    assert_eq!(channel.pull(&mut buf).unwrap(), None);
    assert_eq!(channel.pull(&mut buf).unwrap(), None);
}

#[test]
fn test_failure_delivered_after_buffered_bytes() {
    let channel = RingByteChannel::new(8).unwrap();
    channel.push_all(&[9, 8, 7]).unwrap();
    channel.signal_failure(io::Error::new(io::ErrorKind::ConnectionReset, "peer reset"));

    let mut buf = [0u8; 8];
    assert_eq!(channel.pull(&mut buf).unwrap(), Some(3));
    assert_eq!(&buf[..3], &[9, 8, 7]);

    let err = channel.pull(&mut buf).unwrap_err();
    assert_eq!(err.kind(), io::ErrorKind::ConnectionReset);
    assert_eq!(err.to_string(), "peer reset");

    // Delivered once; afterwards the stream is simply over
    assert_eq!(channel.pull(&mut buf).unwrap(), None);
}

#[test]
fn test_failure_after_end_is_ignored() {
    let channel = RingByteChannel::new(8).unwrap();
    channel.signal_end();
    channel.signal_failure(io::Error::other("late"));
    let mut buf = [0u8; 1];
    assert_eq!(channel.pull(&mut buf).unwrap(), None);
}

#[test]
fn test_failure_after_abort_is_ignored() {
    let (mut sink, mut source) = RingByteChannel::pair(8).unwrap();
    sink.push_all(b"ab").unwrap();
    source.channel.abort();
    drop(sink);

    let mut out = Vec::new();
    source.read_to_end(&mut out).unwrap();
    assert_eq!(out, b"ab");
}

#[test]
fn test_push_after_end_is_rejected() {
    let channel = RingByteChannel::new(8).unwrap();
    channel.signal_end();
    assert!(matches!(channel.push(b"x"), Err(Error::AlreadyEnded)));
}

#[test]
fn test_abort_is_idempotent_and_noop_after_end() {
    let channel = RingByteChannel::new(8).unwrap();
    channel.abort();
    channel.abort();
    assert!(channel.is_aborted());
    assert!(matches!(channel.push(b"x"), Err(Error::Abandoned)));

    let ended = RingByteChannel::new(8).unwrap();
    ended.signal_end();
    ended.abort();
    assert!(!ended.is_aborted());
}

#[test]
fn test_abort_wakes_producer_blocked_on_full_ring() {
    let channel = Arc::new(RingByteChannel::new(2).unwrap());
    channel.push_all(&[1, 2]).unwrap();

    let producer = {
        let channel = Arc::clone(&channel);
        thread::spawn(move || channel.push(&[3]))
    };

    thread::sleep(Duration::from_millis(50));
    assert!(!producer.is_finished(), "producer should block on a full ring");

    channel.abort();
    let result = producer.join().unwrap();
    assert!(matches!(result, Err(Error::Abandoned)));
}

#[test]
fn test_end_wakes_blocked_consumer() {
    let channel = Arc::new(RingByteChannel::new(4).unwrap());
    let consumer = {
        let channel = Arc::clone(&channel);
        thread::spawn(move || {
            let mut buf = [0u8; 4];
            channel.pull(&mut buf)
        })
    };

    thread::sleep(Duration::from_millis(50));
    channel.signal_end();
    assert_eq!(consumer.join().unwrap().unwrap(), None);
}

#[test]
fn test_four_byte_ring_blocks_producer_until_consumer_pulls() {
    let (mut sink, mut source) = RingByteChannel::pair(4).unwrap();
    let pushed = Arc::new(AtomicUsize::new(0));

    let producer = {
        let pushed = Arc::clone(&pushed);
        thread::spawn(move || {
            for chunk in [[1u8, 2, 3], [4, 5, 6]] {
                let mut rest: &[u8] = &chunk;
                while !rest.is_empty() {
                    let n = sink.push(rest).unwrap();
                    pushed.fetch_add(n, Ordering::SeqCst);
                    rest = &rest[n..];
                }
            }
            sink.finish();
        })
    };

    thread::sleep(Duration::from_millis(50));
    assert_eq!(pushed.load(Ordering::SeqCst), 4, "producer must stop at capacity");
    assert_eq!(source.available(), 4);

    let mut out = Vec::new();
    let mut buf = [0u8; 2];
    while let Some(n) = source.pull(&mut buf).unwrap() {
        out.extend_from_slice(&buf[..n]);
    }
    producer.join().unwrap();
    assert_eq!(out, vec![1, 2, 3, 4, 5, 6]);
}

#[test]
fn test_fifo_across_many_wraparounds() {
    let data = pattern(10_000);
    let (mut sink, mut source) = RingByteChannel::pair(16).unwrap();

    let producer = {
        let data = data.clone();
        thread::spawn(move || {
            // Odd chunk sizes so pushes straddle the wrap point
            let mut offset = 0;
            let mut size = 1;
            while offset < data.len() {
                let end = (offset + size).min(data.len());
                sink.push_all(&data[offset..end]).unwrap();
                offset = end;
                size = size % 13 + 1;
            }
            sink.finish();
        })
    };

    let mut out = Vec::new();
    source.read_to_end(&mut out).unwrap();
    producer.join().unwrap();
    assert_eq!(out, data);
}

#[test]
fn test_dropped_sink_surfaces_unexpected_eof() {
    let (mut sink, mut source) = RingByteChannel::pair(8).unwrap();
    sink.push_all(b"partial").unwrap();
    drop(sink);

    let mut out = Vec::new();
    let err = source.read_to_end(&mut out).unwrap_err();
    assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    assert_eq!(out, b"partial");
}

#[test]
fn test_failed_sink_surfaces_its_error() {
    let (mut sink, mut source) = RingByteChannel::pair(8).unwrap();
    sink.push_all(b"ok").unwrap();
    sink.fail(io::Error::new(io::ErrorKind::TimedOut, "read timed out"));

    let mut out = Vec::new();
    let err = source.read_to_end(&mut out).unwrap_err();
    assert_eq!(err.kind(), io::ErrorKind::TimedOut);
}

#[test]
fn test_dropped_source_abandons_producer() {
    let (mut sink, source) = RingByteChannel::pair(4).unwrap();
    sink.push_all(&[1, 2, 3, 4]).unwrap();

    let producer = thread::spawn(move || sink.push_all(&[5, 6, 7, 8]));
    thread::sleep(Duration::from_millis(20));
    source.close();

    assert!(matches!(producer.join().unwrap(), Err(Error::Abandoned)));
}

#[test]
fn test_fill_from_copies_reader_until_eof() {
    let data = pattern(5_000);
    let (mut sink, mut source) = RingByteChannel::pair(64).unwrap();

    let producer = {
        let data = data.clone();
        thread::spawn(move || {
            let mut reader = io::Cursor::new(data);
            let copied = sink.fill_from(&mut reader).unwrap();
            sink.finish();
            copied
        })
    };

    let mut out = Vec::new();
    source.read_to_end(&mut out).unwrap();
    assert_eq!(producer.join().unwrap(), 5_000);
    assert_eq!(out, data);
}

#[test]
fn test_fill_from_stops_when_consumer_aborts() {
    // An endless reader: only the abort can stop the pump
    struct Endless;
    impl Read for Endless {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            buf.fill(7);
            Ok(buf.len())
        }
    }

    let (mut sink, mut source) = RingByteChannel::pair(32).unwrap();
    let producer = thread::spawn(move || sink.fill_from(&mut Endless));

    let mut buf = [0u8; 16];
    assert!(source.pull(&mut buf).unwrap().unwrap() > 0);
    drop(source);

    assert!(matches!(producer.join().unwrap(), Err(Error::Abandoned)));
}

#[test]
fn test_fill_from_reports_read_error_without_ending_channel() {
    struct Broken;
    impl Read for Broken {
        fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::ConnectionAborted, "socket closed"))
        }
    }

    let (mut sink, _source) = RingByteChannel::pair(8).unwrap();
    let err = sink.fill_from(&mut Broken).unwrap_err();
    assert!(matches!(err, Error::Io(ref e) if e.kind() == io::ErrorKind::ConnectionAborted));
    assert!(!sink.is_aborted());
    sink.finish();
}

#[test]
fn test_abort_handle_aborts_channel() {
    let (sink, source) = RingByteChannel::pair(8).unwrap();
    let handle = sink.abort_handle();
    handle.abort();
    assert!(sink.is_aborted());
    drop(source);
    sink.finish();
}

#[test]
fn test_debug_shows_counts() {
    let channel = RingByteChannel::new(8).unwrap();
    channel.push_all(b"xy").unwrap();
    let rendered = format!("{channel:?}");
    assert!(rendered.contains("capacity: 8"));
    assert!(rendered.contains("count: 2"));
}
