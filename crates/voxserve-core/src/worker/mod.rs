//! Model loading through the Hugging Face Hub and a Python inference worker.

mod bridge;
mod hub;
mod loader;
mod protocol;

pub use bridge::WorkerBridge;
pub use hub::HubFetcher;
pub use loader::{WorkerLoader, WorkerModel};
pub use protocol::{read_frame, write_frame, GenerateCommand, WorkerCommand, WorkerReply};
