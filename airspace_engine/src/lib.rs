// airspace_engine: the propagation engine behind the simulation server.
//
// The server treats the engine as an opaque, synchronous, single-writer black
// box: it advances simulated time, hands out entity snapshots, accepts full
// snapshot write-backs, tracks which user each entity is assigned to, and
// writes trajectory result files. All authorization happens in the server
// before any call reaches the engine.
//
// Module overview:
// - `engine.rs`:     The `Engine` trait (the seam the server programs
//                    against), `PropagationPlan`, and `EngineError`.
// - `kinematic.rs`:  `KinematicEngine`, a dead-reckoning reference engine.
//                    It moves entities along their course at their current
//                    speed and climb rate. It is not a flight model; it exists
//                    so the server can run end-to-end and be tested.
// - `scenario.rs`:   JSON scenario files (initial aircraft / ground vehicle
//                    tables).
// - `trajectory.rs`: Recorded track rows and CSV output, including the
//                    ground-vehicle sibling file naming rule.

pub mod engine;
pub mod kinematic;
pub mod scenario;
pub mod trajectory;

pub use engine::{Engine, EngineError, PropagationPlan};
pub use kinematic::KinematicEngine;
pub use scenario::Scenario;
pub use trajectory::{TrajectoryFiles, ground_vehicle_sibling};
