use std::collections::HashMap;

use osp_memory::{
    scheduler::ThreadStatus,
    swap::{BackingStore, DiskStore, MemoryStore},
    Access, MemoryConfig, MemoryManager, TaskId, ThreadId,
};
use rand::{rngs::StdRng, seq::SliceRandom, Rng, SeedableRng};
use serial_test::serial;

const PAGE_SIZE: usize = 256;

fn config(frame_count: usize) -> MemoryConfig {
    MemoryConfig {
        virtual_address_bits: 12,
        page_address_bits: 4,
        frame_count,
        want_free: 1,
    }
}

fn runnable<S: BackingStore>(m: &MemoryManager<S>, thread: ThreadId) -> bool {
    matches!(
        m.scheduler().status(thread),
        Some(ThreadStatus::Ready | ThreadStatus::Running)
    )
}

/// Drives random reads and writes from several tasks against a memory
/// model, completing I/O in random order while killing threads and
/// replacing whole tasks, and checks every byte that is read back.
fn random_workload<S: BackingStore>(mut m: MemoryManager<S>, seed: u64, steps: usize) {
    let _ = env_logger::builder().is_test(true).try_init();
    let mut rng = StdRng::seed_from_u64(seed);
    let mut threads: Vec<(TaskId, ThreadId)> = Vec::new();
    for _ in 0..3 {
        let task = m.create_task();
        for _ in 0..2 {
            threads.push((task, m.spawn_thread(task).unwrap()));
        }
    }
    let mut model: HashMap<(TaskId, u64), u8> = HashMap::new();
    let span = (PAGE_SIZE * 6) as u64;

    for _ in 0..steps {
        if rng.gen_ratio(1, 3) {
            let pending: Vec<_> = m.pending_io().map(|request| request.id).collect();
            if let Some(id) = pending.choose(&mut rng) {
                m.complete_io(*id).unwrap();
            }
            m.check_consistency().unwrap();
            continue;
        }

        if rng.gen_ratio(1, 100) {
            // prefer a thread with a transfer in flight, then replace it
            let in_flight: Vec<ThreadId> = m
                .pending_io()
                .map(|request| request.thread)
                .filter(|thread| !m.scheduler().is_killed(*thread))
                .collect();
            let thread = match in_flight.choose(&mut rng) {
                Some(thread) => *thread,
                None => threads.choose(&mut rng).unwrap().1,
            };
            if !m.scheduler().is_killed(thread) {
                let task = m.scheduler().task_of(thread).unwrap();
                m.kill_thread(thread).unwrap();
                threads.push((task, m.spawn_thread(task).unwrap()));
            }
            m.check_consistency().unwrap();
            continue;
        }

        if rng.gen_ratio(1, 250) {
            let mid_fault: Vec<TaskId> = m
                .pending_io()
                .map(|request| request.page.task)
                .filter(|task| m.page_table(*task).is_some())
                .collect();
            let task = match mid_fault.choose(&mut rng) {
                Some(task) => *task,
                None => threads.choose(&mut rng).unwrap().0,
            };
            m.exit_task(task).unwrap();
            threads.retain(|(t, _)| *t != task);
            model.retain(|(t, _), _| *t != task);
            let task = m.create_task();
            for _ in 0..2 {
                threads.push((task, m.spawn_thread(task).unwrap()));
            }
            m.check_consistency().unwrap();
            continue;
        }

        let &(task, thread) = threads.choose(&mut rng).unwrap();
        if !runnable(&m, thread) {
            continue;
        }
        let address = rng.gen_range(0..span);
        if rng.gen_bool(0.4) {
            let value: u8 = rng.gen();
            if let Access::Done(()) = m.write_byte(address, value, thread).unwrap() {
                model.insert((task, address), value);
            }
        } else if let Access::Done(value) = m.read_byte(address, thread).unwrap() {
            let expected = model.get(&(task, address)).copied().unwrap_or(0);
            assert_eq!(value, expected, "{} read {:#x}", thread, address);
        }
        m.check_consistency().unwrap();
    }

    m.complete_all_io().unwrap();
    m.check_consistency().unwrap();
    assert_eq!(m.faults_in_flight(), 0);
    for frame in m.frames().iter() {
        assert!(!frame.is_reserved());
    }

    // every byte written is still readable by a live thread of its task
    for (&(task, address), &value) in model.iter() {
        let thread = threads
            .iter()
            .find(|(t, thread)| *t == task && runnable(&m, *thread))
            .map(|(_, thread)| *thread)
            .unwrap();
        let read = loop {
            match m.read_byte(address, thread).unwrap() {
                Access::Done(read) => break read,
                Access::Blocked(_) => {
                    m.complete_all_io().unwrap();
                }
            }
        };
        assert_eq!(read, value);
    }
}

#[test]
fn random_references_keep_memory_consistent() {
    for seed in 0..8 {
        let m = MemoryManager::init(config(4), MemoryStore::new()).unwrap();
        random_workload(m, seed, 3000);
    }
}

#[test]
fn random_references_with_a_single_frame() {
    let m = MemoryManager::init(config(1), MemoryStore::new()).unwrap();
    random_workload(m, 42, 2000);
}

#[test]
#[serial]
fn random_references_through_swap_files() {
    let store = DiskStore::<PAGE_SIZE, { PAGE_SIZE * 16 }>::new("integration");
    let m = MemoryManager::init(config(3), store).unwrap();
    random_workload(m, 7, 2000);
}

#[test]
#[serial]
fn exited_task_leaves_no_swap_file() {
    let store = DiskStore::<PAGE_SIZE, { PAGE_SIZE * 16 }>::new("integration-exit");
    let mut m = MemoryManager::init(config(1), store).unwrap();
    let task = m.create_task();
    let thread = m.spawn_thread(task).unwrap();

    // dirty page 0, then force it out through page 1
    while !m.write_byte(3, 9, thread).unwrap().is_done() {
        m.complete_all_io().unwrap();
    }
    while !m.read_byte(PAGE_SIZE as u64, thread).unwrap().is_done() {
        m.complete_all_io().unwrap();
    }
    let name = disk::swap_file_name(&m.store().swap_name(task));
    assert!(std::path::Path::new(&name).exists());

    m.exit_task(task).unwrap();
    assert!(!std::path::Path::new(&name).exists());
    assert_eq!(m.free_frame_count(), 1);
}
