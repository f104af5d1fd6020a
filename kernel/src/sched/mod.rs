//! Preemptive, priority-as-quantum scheduling (`spec.md` §4.3).

pub mod queue;
pub mod scheduler;
pub mod task;

pub fn init() {
    scheduler::init();
    log::info!("sched: idle task and run queue ready");
}
