use mimalloc::MiMalloc;

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

pub mod codec;
pub mod common;
pub mod editor;
pub mod orchestrator;
pub mod reader;
pub mod slicer;
pub mod store;
