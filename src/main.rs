use log::{info, warn};
use osp_memory::{
    scheduler::ThreadStatus, swap::DiskStore, MemoryConfig, MemoryManager, Resolution, TaskId,
    ThreadId, VmError,
};
use rand::{rngs::StdRng, seq::SliceRandom, Rng, SeedableRng};

const PAGE_SIZE: usize = 256;
const SWAP_CAPACITY: usize = PAGE_SIZE * 64;
const TASKS: usize = 3;
const THREADS_PER_TASK: usize = 2;
const STEPS: usize = 2000;

fn main() -> Result<(), VmError> {
    env_logger::init();

    let config = MemoryConfig {
        virtual_address_bits: 14,
        page_address_bits: 6,
        frame_count: 12,
        want_free: 2,
    };
    let store = DiskStore::<PAGE_SIZE, SWAP_CAPACITY>::new("osp-sim");
    let mut manager = MemoryManager::init(config, store)?;
    let mut rng = StdRng::seed_from_u64(0x05b);

    let mut threads: Vec<(TaskId, ThreadId)> = Vec::new();
    for _ in 0..TASKS {
        let task = manager.create_task();
        for _ in 0..THREADS_PER_TASK {
            threads.push((task, manager.spawn_thread(task)?));
        }
    }

    let address_space = 1u64 << config.virtual_address_bits;
    let (mut hits, mut blocked, mut kills) = (0usize, 0usize, 0usize);
    for step in 0..STEPS {
        let Some(&(task, thread)) = threads.choose(&mut rng) else {
            break;
        };
        let runnable = matches!(
            manager.scheduler().status(thread),
            Some(ThreadStatus::Ready | ThreadStatus::Running)
        );
        if !runnable || manager.page_table(task).is_none() {
            continue;
        }
        let address = rng.gen_range(0..address_space);
        let access = if rng.gen_bool(0.3) {
            manager.write_byte(address, step as u8, thread)?.is_done()
        } else {
            manager.read_byte(address, thread)?.is_done()
        };
        if access {
            hits += 1;
        } else {
            blocked += 1;
        }

        if rng.gen_bool(0.6) {
            let pending: Vec<_> = manager.pending_io().map(|r| r.id).collect();
            if let Some(id) = pending.choose(&mut rng) {
                manager.complete_io(*id)?;
            }
        }
        if rng.gen_ratio(1, 500) {
            manager.kill_thread(thread)?;
            kills += 1;
        }
        for resolution in manager.take_resolutions() {
            if let Resolution::Fault { outcome, page, .. } = resolution {
                info!("{}: {:?}", page, outcome);
            }
        }
    }
    manager.complete_all_io()?;
    manager.take_resolutions();
    if let Err(e) = manager.check_consistency() {
        warn!("Inconsistent tables after run: {}", e);
    }

    for task in 0..TASKS as u32 {
        if let Some(table) = manager.page_table(TaskId(task)) {
            info!("task {}: {} resident page(s)", task, table.resident_pages());
        }
        manager.exit_task(TaskId(task))?;
    }
    info!(
        "{} hits, {} blocked references, {} kills, {} dispatches, {} free frames at exit",
        hits,
        blocked,
        kills,
        manager.scheduler().dispatch_count(),
        manager.free_frame_count()
    );
    Ok(())
}
