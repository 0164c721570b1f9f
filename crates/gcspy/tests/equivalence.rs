//! A toy mark-compact collector instrumented through `Interpreter` must
//! behave the same whether reports are discarded or encoded.

use std::collections::BTreeMap;

use gcspy::create_interpreter;
use gcspy::protocol::FrameDecoder;
use gcspy::types::EventId;
use gcspy::types::SpaceId;
use gcspy::write_control;
use gcspy::Driver;
use gcspy::Interpreter;
use gcspy::LinearSpaceDriver;
use gcspy::NullInterpreter;
use gcspy::Session;
use gcspy::SpyConfig;
use gcspy::SpyResult;
use gcspy::StreamInterpreter;
use similar_asserts::assert_eq;
use test_log::test;

const HEAP_START: usize = 0x4000;
const HEAP_SIZE: usize = 4096;
const BLOCK_SIZE: usize = 512;
const GC: EventId = EventId(0);

#[derive(Debug, Clone)]
struct Object {
    addr: usize,
    size: usize,
    refs: Vec<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct CycleStats {
    live_objects: usize,
    live_bytes: usize,
    freed_objects: usize,
    cursor: usize,
}

struct ToyHeap {
    objects: BTreeMap<u32, Object>,
    roots: Vec<u32>,
    cursor: usize,
    next_id: u32,
    driver: LinearSpaceDriver,
}

impl ToyHeap {
    fn new() -> Self {
        Self {
            objects: BTreeMap::new(),
            roots: Vec::new(),
            cursor: HEAP_START,
            next_id: 0,
            driver: LinearSpaceDriver::new(
                SpaceId(0),
                "toy heap",
                HEAP_START,
                HEAP_START + HEAP_SIZE,
                BLOCK_SIZE,
            )
            .expect("driver"),
        }
    }

    fn alloc(&mut self, size: usize, refs: Vec<u32>) -> Option<u32> {
        if self.cursor + size > HEAP_START + HEAP_SIZE {
            return None;
        }
        let id = self.next_id;
        self.next_id += 1;
        self.objects.insert(
            id,
            Object {
                addr: self.cursor,
                size,
                refs,
            },
        );
        self.cursor += size;
        Some(id)
    }

    fn mark(&self) -> Vec<u32> {
        let mut marked = Vec::new();
        let mut work = self.roots.clone();
        while let Some(id) = work.pop() {
            if marked.contains(&id) {
                continue;
            }
            if let Some(object) = self.objects.get(&id) {
                marked.push(id);
                work.extend(object.refs.iter().copied());
            }
        }
        marked
    }

    /// Mark, report the heap, then slide survivors down.
    fn collect<I: Interpreter + ?Sized>(&mut self, interp: &mut I) -> SpyResult<CycleStats> {
        let marked = self.mark();

        self.driver.reset();
        for (id, object) in &self.objects {
            self.driver
                .scan(object.addr, object.size, marked.contains(id))?;
        }
        self.driver.set_allocation_cursor(self.cursor)?;
        self.driver.transmit(interp, GC)?;
        interp.safepoint(GC)?;

        let before = self.objects.len();
        self.objects.retain(|id, _| marked.contains(id));
        let mut cursor = HEAP_START;
        for object in self.objects.values_mut() {
            object.addr = cursor;
            cursor += object.size;
        }
        self.cursor = cursor;

        Ok(CycleStats {
            live_objects: self.objects.len(),
            live_bytes: self.objects.values().map(|o| o.size).sum(),
            freed_objects: before - self.objects.len(),
            cursor,
        })
    }
}

/// Deterministic mutator: a linked list with a sliding window of roots.
fn run<I: Interpreter + ?Sized>(interp: &mut I, steps: usize) -> SpyResult<Vec<CycleStats>> {
    let mut heap = ToyHeap::new();
    let mut cycles = Vec::new();
    let mut previous = None;
    for i in 0..steps {
        let size = 16 + (i * 37) % 96;
        let refs = match previous {
            Some(prev) if i % 3 != 0 => vec![prev],
            _ => Vec::new(),
        };
        let id = match heap.alloc(size, refs.clone()) {
            Some(id) => id,
            None => {
                cycles.push(heap.collect(interp)?);
                match heap.alloc(size, refs) {
                    Some(id) => id,
                    None => break,
                }
            }
        };
        if i % 5 == 0 {
            heap.roots.push(id);
            if heap.roots.len() > 4 {
                heap.roots.remove(0);
            }
        }
        previous = Some(id);
    }
    cycles.push(heap.collect(interp)?);
    Ok(cycles)
}

#[test]
fn collector_results_do_not_depend_on_the_interpreter() {
    let without = run(&mut NullInterpreter, 400).expect("null run");

    let mut encoded = StreamInterpreter::new(Vec::new());
    let with = run(&mut encoded, 400).expect("stream run");

    assert_eq!(without, with);
    assert!(without.len() > 1, "the mutator should trigger several collections");

    let mut decoder = FrameDecoder::new(1 << 20);
    decoder.feed(encoded.get_ref());
    let mut session = Session::new();
    while let Some(frame) = decoder.next_frame().expect("decode") {
        session.apply_all(frame).expect("apply");
    }
    assert_eq!(session.safepoints().len(), with.len());
    assert_eq!(encoded.event_count(GC) as usize, with.len());
    let space = session.space(SpaceId(0)).expect("space");
    assert_eq!(space.tile_count as usize, HEAP_SIZE / BLOCK_SIZE);
}

#[test]
fn configured_stub_matches_direct_stub() {
    let mut boxed = create_interpreter(&SpyConfig::default(), &["gc"], Vec::new()).expect("stub");
    let via_config = run(&mut boxed, 250).expect("boxed run");
    let direct = run(&mut NullInterpreter, 250).expect("direct run");
    assert_eq!(via_config, direct);
}

#[test]
fn write_control_in_a_hot_loop() {
    let mut main_stream = NullInterpreter;
    let mut counter = 0usize;
    for _ in 0..1000 {
        counter += 1;
        write_control!(main_stream, SpaceId(42), 1024).expect("stub");
        counter += 1;
    }
    assert_eq!(counter, 2000);
}
