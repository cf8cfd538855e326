/// Terminal state of a job after the local retry loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobState {
    Completed,
    /// Carries the reason reported to the server.
    Failed(String),
}
