//! Variable-size channels: wrap-boundary payload handling, capacity
//! edges, and MPSC delivery.

mod common;

use common::{coordination_buffer, harness, read_bytes, spin_until, write_bytes};
use std::sync::Arc;
use weft::{CommunicationManager, MemoryManager};
use weft_channels::variable::{mpsc, spsc};
use weft_channels::{ControlRecord, CONTROL_RECORD_SIZE};

const TAG: u64 = 0;
const CONTROL_BUFFER_KEY: u64 = 0;
const PAYLOAD_BUFFER_KEY: u64 = 1;
const CONSUMER_CONTROL_COORDINATION_KEY: u64 = 2;
const CONSUMER_PAYLOAD_COORDINATION_KEY: u64 = 3;
const PRODUCER_CONTROL_COORDINATION_KEY: u64 = 4;
const PRODUCER_PAYLOAD_COORDINATION_KEY: u64 = 5;

/// Wires both endpoints of one variable-size SPSC channel inside a
/// single participant.
fn wire(
    message_capacity: usize,
    payload_capacity: usize,
) -> (
    spsc::Producer<weft_host::HostCommunicationManager>,
    spsc::Consumer<weft_host::HostCommunicationManager>,
    weft_host::HostMemoryManager,
    Arc<weft::MemorySpace>,
) {
    let (memory, space, comm) = harness(1);

    let control_buffer = memory
        .allocate_local_memory_slot(&space, message_capacity * CONTROL_RECORD_SIZE)
        .unwrap();
    let payload_buffer = memory
        .allocate_local_memory_slot(&space, payload_capacity)
        .unwrap();
    let consumer_control_coordination = coordination_buffer(&memory, &space);
    let consumer_payload_coordination = coordination_buffer(&memory, &space);
    let producer_control_coordination = coordination_buffer(&memory, &space);
    let producer_payload_coordination = coordination_buffer(&memory, &space);

    comm.exchange_global_memory_slots(
        TAG,
        &[
            (CONTROL_BUFFER_KEY, Arc::clone(&control_buffer)),
            (PAYLOAD_BUFFER_KEY, Arc::clone(&payload_buffer)),
            (
                CONSUMER_CONTROL_COORDINATION_KEY,
                Arc::clone(&consumer_control_coordination),
            ),
            (
                CONSUMER_PAYLOAD_COORDINATION_KEY,
                Arc::clone(&consumer_payload_coordination),
            ),
            (
                PRODUCER_CONTROL_COORDINATION_KEY,
                Arc::clone(&producer_control_coordination),
            ),
            (
                PRODUCER_PAYLOAD_COORDINATION_KEY,
                Arc::clone(&producer_payload_coordination),
            ),
        ],
    )
    .unwrap();
    comm.fence(TAG).unwrap();

    let staging = memory
        .allocate_local_memory_slot(&space, CONTROL_RECORD_SIZE)
        .unwrap();
    let producer = spsc::Producer::new(
        comm.clone(),
        comm.get_global_memory_slot(TAG, CONTROL_BUFFER_KEY).unwrap(),
        comm.get_global_memory_slot(TAG, PAYLOAD_BUFFER_KEY).unwrap(),
        producer_control_coordination,
        producer_payload_coordination,
        comm.get_global_memory_slot(TAG, CONSUMER_CONTROL_COORDINATION_KEY)
            .unwrap(),
        comm.get_global_memory_slot(TAG, CONSUMER_PAYLOAD_COORDINATION_KEY)
            .unwrap(),
        staging,
        message_capacity,
        payload_capacity,
    )
    .unwrap();
    let consumer = spsc::Consumer::new(
        comm.clone(),
        control_buffer,
        payload_buffer,
        consumer_control_coordination,
        consumer_payload_coordination,
        comm.get_global_memory_slot(TAG, PRODUCER_CONTROL_COORDINATION_KEY)
            .unwrap(),
        comm.get_global_memory_slot(TAG, PRODUCER_PAYLOAD_COORDINATION_KEY)
            .unwrap(),
        message_capacity,
        payload_capacity,
    )
    .unwrap();

    (producer, consumer, memory, space)
}

/// Reads a whole message back through its record, reassembling across
/// the wrap when needed.
fn read_message(
    consumer: &spsc::Consumer<weft_host::HostCommunicationManager>,
    record: ControlRecord,
) -> Vec<u8> {
    let (first, wrapped) = consumer.payload_ranges(record);
    let mut bytes = read_bytes(consumer.payload_buffer(), first);
    if let Some(wrapped) = wrapped {
        bytes.extend(read_bytes(consumer.payload_buffer(), wrapped));
    }
    bytes
}

#[test]
fn third_message_wraps_the_payload_buffer() {
    let (mut producer, mut consumer, memory, space) = wire(8, 16);
    let source = memory.allocate_local_memory_slot(&space, 6).unwrap();

    write_bytes(&source, &[1, 2, 3, 4, 5, 6]);
    assert!(producer.push(&source, 6).unwrap());
    write_bytes(&source, &[11, 12, 13, 14, 15, 16]);
    assert!(producer.push(&source, 6).unwrap());

    // 12 of 16 payload bytes in flight; free the first message so the
    // third fits, starting at offset 12 and wrapping after 4 bytes.
    let first = consumer.peek(0).unwrap().expect("message available");
    assert_eq!(
        first,
        ControlRecord {
            payload_offset: 0,
            payload_size: 6
        }
    );
    assert_eq!(read_message(&consumer, first), vec![1, 2, 3, 4, 5, 6]);
    assert!(consumer.pop(1).unwrap());

    write_bytes(&source, &[21, 22, 23, 24, 25, 26]);
    assert!(producer.push(&source, 6).unwrap());

    let second = consumer.peek(0).unwrap().expect("message available");
    assert_eq!(read_message(&consumer, second), vec![11, 12, 13, 14, 15, 16]);

    let third = consumer.peek(1).unwrap().expect("message available");
    assert_eq!(
        third,
        ControlRecord {
            payload_offset: 12,
            payload_size: 6
        }
    );
    let (head_range, tail_range) = consumer.payload_ranges(third);
    assert_eq!(head_range, 12..16);
    assert_eq!(tail_range, Some(0..2));
    assert_eq!(read_message(&consumer, third), vec![21, 22, 23, 24, 25, 26]);

    assert!(consumer.pop(2).unwrap());
    assert!(consumer.is_empty());
    assert_eq!(consumer.payload_depth(), 0);
}

#[test]
fn message_filling_the_whole_payload_buffer() {
    let (mut producer, mut consumer, memory, space) = wire(4, 16);
    let source = memory.allocate_local_memory_slot(&space, 16).unwrap();

    let content: Vec<u8> = (1..=16).collect();
    write_bytes(&source, &content);
    assert!(producer.push(&source, 16).unwrap());

    // Payload is saturated: even a one-byte message must wait.
    assert!(!producer.push(&source, 1).unwrap());

    let record = consumer.peek(0).unwrap().expect("message available");
    assert_eq!(
        record,
        ControlRecord {
            payload_offset: 0,
            payload_size: 16
        }
    );
    assert_eq!(read_message(&consumer, record), content);
    assert!(consumer.pop(1).unwrap());

    producer.update_depth().unwrap();
    assert_eq!(producer.payload_depth(), 0);
}

#[test]
fn message_ending_exactly_at_the_boundary_does_not_split() {
    let (mut producer, mut consumer, memory, space) = wire(4, 16);
    let source = memory.allocate_local_memory_slot(&space, 8).unwrap();

    write_bytes(&source, &[1; 8]);
    assert!(producer.push(&source, 8).unwrap());
    write_bytes(&source, &[2; 8]);
    assert!(producer.push(&source, 8).unwrap());

    let second = consumer.peek(1).unwrap().expect("message available");
    assert_eq!(second.payload_offset, 8);
    // Ends exactly at byte 16: contiguous, no wrapped remainder.
    let (head_range, tail_range) = consumer.payload_ranges(second);
    assert_eq!(head_range, 8..16);
    assert_eq!(tail_range, None);

    assert!(consumer.pop(2).unwrap());

    // The next message starts back at offset zero.
    write_bytes(&source, &[3; 4]);
    assert!(producer.push(&source, 4).unwrap());
    let third = consumer.peek(0).unwrap().expect("message available");
    assert_eq!(third.payload_offset, 0);
    assert_eq!(read_message(&consumer, third), vec![3; 4]);
}

#[test]
fn control_and_payload_capacity_govern_acceptance() {
    let (mut producer, mut consumer, memory, space) = wire(2, 64);
    let source = memory.allocate_local_memory_slot(&space, 64).unwrap();
    write_bytes(&source, &[7; 64]);

    // Control side full with tiny messages.
    assert!(producer.push(&source, 1).unwrap());
    assert!(producer.push(&source, 1).unwrap());
    assert!(!producer.push(&source, 1).unwrap());
    assert!(consumer.pop(2).unwrap());

    // Payload side full while the control side has room.
    assert!(producer.push(&source, 40).unwrap());
    assert!(!producer.push(&source, 30).unwrap());

    // Invalid messages are errors, not retry signals.
    assert!(producer.push(&source, 0).is_err());
    assert!(producer.push(&source, 65).is_err());
}

#[test]
fn pop_batches_release_summed_payload_bytes() {
    let (mut producer, mut consumer, memory, space) = wire(8, 32);
    let source = memory.allocate_local_memory_slot(&space, 8).unwrap();

    for size in [3usize, 5, 7] {
        write_bytes(&source, &vec![size as u8; size]);
        assert!(producer.push(&source, size).unwrap());
    }
    assert_eq!(consumer.peek(0).unwrap().unwrap().payload_size, 3);
    assert_eq!(consumer.peek(2).unwrap().unwrap().payload_size, 7);
    assert!(consumer.peek(3).unwrap().is_none());

    assert!(consumer.pop(3).unwrap());
    assert_eq!(consumer.payload_depth(), 0);

    producer.update_depth().unwrap();
    assert_eq!(producer.depth(), 0);
    assert_eq!(producer.payload_depth(), 0);
}

// =============================================================================
// MPSC variants
// =============================================================================

#[test]
fn locking_producers_deliver_every_message_once() {
    use std::thread;

    const PRODUCERS: usize = 2;
    const PER_PRODUCER: usize = 20;
    const MESSAGE_CAPACITY: usize = 4;
    const PAYLOAD_CAPACITY: usize = 32;

    let (memory, space, comm) = harness(PRODUCERS + 1);

    let mut producer_threads = vec![];
    for producer_id in 0..PRODUCERS {
        let (memory, space, comm) = (memory.clone(), Arc::clone(&space), comm.clone());
        producer_threads.push(thread::spawn(move || {
            comm.exchange_global_memory_slots(TAG, &[]).unwrap();
            comm.fence(TAG).unwrap();

            let staging = memory
                .allocate_local_memory_slot(&space, CONTROL_RECORD_SIZE)
                .unwrap();
            let mut producer = mpsc::locking::Producer::new(
                comm.clone(),
                comm.get_global_memory_slot(TAG, CONTROL_BUFFER_KEY).unwrap(),
                comm.get_global_memory_slot(TAG, PAYLOAD_BUFFER_KEY).unwrap(),
                coordination_buffer(&memory, &space),
                coordination_buffer(&memory, &space),
                comm.get_global_memory_slot(TAG, CONSUMER_CONTROL_COORDINATION_KEY)
                    .unwrap(),
                comm.get_global_memory_slot(TAG, CONSUMER_PAYLOAD_COORDINATION_KEY)
                    .unwrap(),
                staging,
                MESSAGE_CAPACITY,
                PAYLOAD_CAPACITY,
            )
            .unwrap();

            let source = memory.allocate_local_memory_slot(&space, 4).unwrap();
            for i in 0..PER_PRODUCER {
                // Sizes cycle 1..=4; every byte carries the message id.
                let size = 1 + (i % 4);
                let value = (producer_id * 100 + i) as u8;
                write_bytes(&source, &vec![value; size]);
                spin_until(|| producer.push(&source, size).unwrap().then_some(()));
            }
        }));
    }

    let consumer_thread = {
        let (memory, space, comm) = (memory.clone(), Arc::clone(&space), comm.clone());
        thread::spawn(move || {
            let control_buffer = memory
                .allocate_local_memory_slot(&space, MESSAGE_CAPACITY * CONTROL_RECORD_SIZE)
                .unwrap();
            let payload_buffer = memory
                .allocate_local_memory_slot(&space, PAYLOAD_CAPACITY)
                .unwrap();
            let control_coordination = coordination_buffer(&memory, &space);
            let payload_coordination = coordination_buffer(&memory, &space);
            comm.exchange_global_memory_slots(
                TAG,
                &[
                    (CONTROL_BUFFER_KEY, Arc::clone(&control_buffer)),
                    (PAYLOAD_BUFFER_KEY, Arc::clone(&payload_buffer)),
                    (
                        CONSUMER_CONTROL_COORDINATION_KEY,
                        Arc::clone(&control_coordination),
                    ),
                    (
                        CONSUMER_PAYLOAD_COORDINATION_KEY,
                        Arc::clone(&payload_coordination),
                    ),
                ],
            )
            .unwrap();
            comm.fence(TAG).unwrap();

            let mut consumer = mpsc::locking::Consumer::new(
                comm.clone(),
                control_buffer,
                payload_buffer,
                control_coordination,
                payload_coordination,
                MESSAGE_CAPACITY,
                PAYLOAD_CAPACITY,
            )
            .unwrap();

            let mut received = vec![];
            while received.len() < PRODUCERS * PER_PRODUCER {
                let record = spin_until(|| consumer.peek(0).unwrap());
                let (head_range, tail_range) = consumer.payload_ranges(record);
                let mut bytes = read_bytes(consumer.payload_buffer(), head_range);
                if let Some(tail_range) = tail_range {
                    bytes.extend(read_bytes(consumer.payload_buffer(), tail_range));
                }
                assert_eq!(bytes.len(), record.payload_size as usize);
                assert!(bytes.windows(2).all(|pair| pair[0] == pair[1]));
                received.push((bytes.len(), bytes[0]));
                assert!(consumer.pop(1).unwrap());
            }
            received
        })
    };

    for handle in producer_threads {
        handle.join().unwrap();
    }
    let mut received = consumer_thread.join().unwrap();
    received.sort_unstable();

    let mut expected: Vec<(usize, u8)> = (0..PRODUCERS)
        .flat_map(|p| (0..PER_PRODUCER).map(move |i| (1 + (i % 4), (p * 100 + i) as u8)))
        .collect();
    expected.sort_unstable();
    assert_eq!(received, expected);
}

#[test]
fn nonlocking_shards_rotate_and_keep_records_apart() {
    const SHARDS: usize = 2;
    let (memory, space, comm) = harness(1);

    // Per shard: control/payload buffers and two coordination pairs,
    // keyed in blocks of six.
    let mut producers = vec![];
    let mut shard_consumers = vec![];
    let mut locals = vec![];
    for shard in 0..SHARDS as u64 {
        let base_key = 6 * shard;
        let control_buffer = memory
            .allocate_local_memory_slot(&space, 4 * CONTROL_RECORD_SIZE)
            .unwrap();
        let payload_buffer = memory.allocate_local_memory_slot(&space, 16).unwrap();
        let consumer_control = coordination_buffer(&memory, &space);
        let consumer_payload = coordination_buffer(&memory, &space);
        let producer_control = coordination_buffer(&memory, &space);
        let producer_payload = coordination_buffer(&memory, &space);
        comm.exchange_global_memory_slots(
            TAG,
            &[
                (base_key, Arc::clone(&control_buffer)),
                (base_key + 1, Arc::clone(&payload_buffer)),
                (base_key + 2, Arc::clone(&consumer_control)),
                (base_key + 3, Arc::clone(&consumer_payload)),
                (base_key + 4, Arc::clone(&producer_control)),
                (base_key + 5, Arc::clone(&producer_payload)),
            ],
        )
        .unwrap();
        locals.push((
            control_buffer,
            payload_buffer,
            consumer_control,
            consumer_payload,
            producer_control,
            producer_payload,
        ));
    }
    comm.fence(TAG).unwrap();

    for (shard, local) in locals.into_iter().enumerate() {
        let base_key = 6 * shard as u64;
        let (control_buffer, payload_buffer, consumer_control, consumer_payload, producer_control, producer_payload) =
            local;
        let staging = memory
            .allocate_local_memory_slot(&space, CONTROL_RECORD_SIZE)
            .unwrap();
        producers.push(
            spsc::Producer::new(
                comm.clone(),
                comm.get_global_memory_slot(TAG, base_key).unwrap(),
                comm.get_global_memory_slot(TAG, base_key + 1).unwrap(),
                producer_control,
                producer_payload,
                comm.get_global_memory_slot(TAG, base_key + 2).unwrap(),
                comm.get_global_memory_slot(TAG, base_key + 3).unwrap(),
                staging,
                4,
                16,
            )
            .unwrap(),
        );
        shard_consumers.push(
            spsc::Consumer::new(
                comm.clone(),
                control_buffer,
                payload_buffer,
                consumer_control,
                consumer_payload,
                comm.get_global_memory_slot(TAG, base_key + 4).unwrap(),
                comm.get_global_memory_slot(TAG, base_key + 5).unwrap(),
                4,
                16,
            )
            .unwrap(),
        );
    }
    let mut consumer = mpsc::nonlocking::Consumer::new(shard_consumers).unwrap();

    let source = memory.allocate_local_memory_slot(&space, 4).unwrap();
    for (shard, producer) in producers.iter_mut().enumerate() {
        for i in 0..2u8 {
            let size = 2 + i as usize;
            write_bytes(&source, &vec![shard as u8 * 10 + i; size]);
            assert!(producer.push(&source, size).unwrap());
        }
    }
    assert_eq!(consumer.depth(), 4);

    // Rotation across shards, per-shard FIFO within.
    let mut served = vec![];
    for _ in 0..4 {
        let (shard, record) = consumer.peek().unwrap().expect("message available");
        let (head_range, _) = consumer.shard(shard).unwrap().payload_ranges(record);
        let bytes = read_bytes(consumer.payload_buffer(shard).unwrap(), head_range);
        served.push((shard, record.payload_size, bytes[0]));
        assert!(consumer.pop(shard).unwrap());
    }
    assert_eq!(
        served,
        vec![(0, 2, 0), (1, 2, 10), (0, 3, 1), (1, 3, 11)]
    );
    assert!(consumer.peek().unwrap().is_none());
}
