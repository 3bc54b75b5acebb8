//! Backend module - Generation backend trait, process group and WebUI client

pub mod process;
pub mod stable_diffusion;
pub mod traits;

pub use process::ProcessGroup;
pub use stable_diffusion::StableDiffusionService;
pub use traits::{GenerationBackend, ProcessSupervisor, ServiceState};
