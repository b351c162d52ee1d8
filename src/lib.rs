//! FPGA build orchestration and timing closure.
//!
//! Re-exports the workspace crates under one name:
//! [`toolchain`] runs external tools, [`pipeline`] caches build stages and
//! reads timing reports, [`explorer`] searches for the best achievable value
//! and [`closure`] ties them into sweeps.

pub use fpgaforge_closure as closure;
pub use fpgaforge_explorer as explorer;
pub use fpgaforge_pipeline as pipeline;
pub use fpgaforge_toolchain as toolchain;
