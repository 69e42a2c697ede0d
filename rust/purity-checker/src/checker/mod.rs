pub mod error_codes;
pub mod graph;
pub mod lattice;
pub mod model;
pub mod resolver;
pub mod scc;
pub mod scheduler;
