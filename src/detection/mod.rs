mod orchestrator;
mod remote;

pub use orchestrator::DetectionOrchestrator;
pub use remote::{HttpRemoteAnalyzer, RemoteAnalyzer};
