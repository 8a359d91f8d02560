/// Compute capability probed once at process start and passed explicitly to
/// the compositor. Read-only after startup.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DeviceInfo {
    threads: usize,
}

impl DeviceInfo {
    pub fn detect() -> Self {
        let threads = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        Self { threads }
    }

    /// Backend identifier reported by the health endpoint. Only the CPU
    /// renderer exists today; an accelerated backend would report its own
    /// name here.
    pub fn backend(&self) -> &'static str {
        "cpu"
    }

    pub fn threads(&self) -> usize {
        self.threads
    }
}

impl std::fmt::Display for DeviceInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.backend())
    }
}
