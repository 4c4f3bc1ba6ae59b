//! Process identity lookup seam

/// Name reported when the owning process cannot be determined
pub const UNKNOWN_PROCESS: &str = "Unknown";

/// Maps a client connection to the name of the process that opened it
///
/// Lookups are best-effort: implementations return [`UNKNOWN_PROCESS`]
/// instead of failing.
#[async_trait::async_trait]
pub trait ProcessResolver: Send + Sync {
    /// Name of the process owning the local TCP endpoint on `port`
    async fn name_by_local_port(&self, port: u16) -> String;
}

/// Resolver that knows nothing
#[derive(Debug, Default, Clone, Copy)]
pub struct UnknownProcess;

#[async_trait::async_trait]
impl ProcessResolver for UnknownProcess {
    async fn name_by_local_port(&self, _port: u16) -> String {
        UNKNOWN_PROCESS.to_string()
    }
}
