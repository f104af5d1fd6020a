//! Synchronization primitives: counting semaphores, a recursive mutex built
//! on top of one, and the keyboard ring's SPSC sleep/wake discipline
//! (`spec.md` §4.3, §4.7).

pub mod global_state;
pub mod io_ring;
pub mod mutex;
pub mod semaphore;

pub use global_state::GlobalState;
pub use mutex::RecursiveMutex;
pub use semaphore::Semaphore;
