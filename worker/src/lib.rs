pub mod device;
pub mod error;
pub mod replica;
pub mod worker;

pub use device::DeviceWorker;
pub use error::WorkerErr;
pub use replica::Replica;
pub use worker::Worker;
