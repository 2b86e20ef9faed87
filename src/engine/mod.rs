//! Join engine: per-worker loops, pacing, and the supervisor that runs them.

pub mod join_loop;
pub mod pacer;
pub mod supervisor;

pub use join_loop::{JoinLoop, JoinSettings};
pub use pacer::{Pacer, TokioPacer};
pub use supervisor::{JoinSupervisor, RunReport, WorkerFailure};
