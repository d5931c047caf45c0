pub mod config;
pub mod dryrun;
pub mod gateway;
pub mod gemini;
pub mod recorder;
pub mod restorer;

pub use config::{GatewayConfig, ResolvedModels};
pub use gateway::{build_gateway, error_chain_text, RestorationGateway, GATEWAY_PROVIDERS};
pub use recorder::{RecorderLayout, RunRecorder, SUMMARY_FILE};
pub use restorer::{Restorer, RunObserver, PLANNING_MESSAGE};
