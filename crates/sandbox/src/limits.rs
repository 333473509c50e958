use rlimit::{setrlimit, Resource};
use toolforge_core::ExecLimits;

const FILE_SIZE_LIMIT: u64 = 8 * 1024 * 1024; // 8MB scratch files
const NPROC_LIMIT: u64 = 8; // candidate cannot fork further workers
const NOFILE_LIMIT: u64 = 32;

/// Applied in the child between fork and exec. RLIMIT_CPU only has
/// whole-second granularity, so sub-second budgets round up to one second;
/// the wall-clock timeout is the tight bound.
pub(crate) fn apply_rlimits(limits: &ExecLimits) -> std::io::Result<()> {
    let cpu_secs = ((limits.cpu_millis + 999) / 1000).max(1);

    setrlimit(Resource::AS, limits.memory_bytes, limits.memory_bytes)?;
    setrlimit(Resource::CPU, cpu_secs, cpu_secs)?;
    setrlimit(Resource::FSIZE, FILE_SIZE_LIMIT, FILE_SIZE_LIMIT)?;
    setrlimit(Resource::NPROC, NPROC_LIMIT, NPROC_LIMIT)?;
    setrlimit(Resource::NOFILE, NOFILE_LIMIT, NOFILE_LIMIT)?;

    Ok(())
}
