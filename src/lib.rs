//! Dynamic scheduler core for single-core 32-bit microcontrollers.
//!
//! A plugin-based real-time scheduler: round-robin and static-priority
//! policies behind one uniform interface, live switching between them with
//! rollback, priority inheritance, and aging. Board bring-up, the interrupt
//! controller, and the timer are external collaborators - this crate only
//! calls through the contracts in [`hal`].
//!
//! # Modules
//! - `tcb`: task control block and the O(1) priority bitmap (C1)
//! - `pool`: fixed-capacity node pools and intrusive queues (C2)
//! - `preempt`: nested preemption-disable gate (C3)
//! - `policy`: the round-robin and priority policies behind one trait (C4/C5/C6)
//! - `switch`: live policy switching with phases and rollback (C7)
//! - `migration`: task migration strategies used during a switch (C8)
//! - `metrics`: decision latency, switch, and starvation counters (C9)
//! - `kernel`: top-level record wiring the above behind one surface
#![cfg_attr(not(test), no_std)]

pub mod config;
pub mod debug;
pub mod error;
pub mod hal;
pub mod kernel;
pub mod metrics;
pub mod migration;
pub mod policy;
pub mod pool;
pub mod preempt;
pub mod switch;
pub mod tcb;
