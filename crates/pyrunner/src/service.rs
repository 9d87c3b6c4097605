//! Service descriptor for health probes.

use serde::Serialize;

use crate::policy;
use crate::request::{MAX_MEMORY_MIB, MAX_TIMEOUT_SECS};

pub const SERVICE_NAME: &str = "pyrunner";

/// Fixed capabilities of this runner, for transport-level health endpoints.
#[derive(Debug, Clone, Serialize)]
pub struct ServiceInfo {
    pub service: &'static str,
    pub version: &'static str,
    pub max_timeout: u64,
    pub max_memory_mib: u64,
    pub permitted_imports: &'static [&'static str],
}

pub fn service_info() -> ServiceInfo {
    ServiceInfo {
        service: SERVICE_NAME,
        version: env!("CARGO_PKG_VERSION"),
        max_timeout: MAX_TIMEOUT_SECS,
        max_memory_mib: MAX_MEMORY_MIB,
        permitted_imports: policy::PERMITTED_IMPORTS,
    }
}
