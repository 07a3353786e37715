pub mod io;
pub mod buggify;
pub mod observability;
pub mod write;

#[cfg(test)]
mod stateright;

pub use write::{
    ClientKey, ClientRegistry, ProtoRows, ProtoSchema, RetrySettings, WriteClient,
    WriteStreamConfig, WriteStreamError, WriteStreamSession,
};
