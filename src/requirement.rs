use serde::{Deserialize, Serialize};

use crate::config::Resources;
use crate::error::FarmError;

/// Executable image every provider runs the render pipeline in.
pub const IMAGE_HASH: &str = "b5e19a68e0268c0e72309048b5e6a29512e3ecbabd355c6ac590f75d";

/// Capability tag a provider must advertise to be matched.
pub const GPU_CAPABILITY: &str = "cuda";

/// Resource and capability profile a provider must satisfy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComputeRequirement {
    pub image_hash: String,
    pub min_mem_gib: u32,
    pub min_storage_gib: u32,
    pub min_cpu_threads: u32,
    pub capabilities: Vec<String>,
}

impl ComputeRequirement {
    pub fn new(memory_gib: u32, storage_gib: u32, threads: u32) -> Result<Self, FarmError> {
        for (name, value) in [
            ("memory", memory_gib),
            ("storage", storage_gib),
            ("threads", threads),
        ] {
            if value == 0 {
                return Err(FarmError::Configuration(format!(
                    "{name} requirement must be positive"
                )));
            }
        }
        Ok(Self {
            image_hash: IMAGE_HASH.to_string(),
            min_mem_gib: memory_gib,
            min_storage_gib: storage_gib,
            min_cpu_threads: threads,
            capabilities: vec![GPU_CAPABILITY.to_string()],
        })
    }

    pub fn from_resources(resources: &Resources) -> Result<Self, FarmError> {
        Self::new(resources.memory_gib, resources.storage_gib, resources.threads)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_fixed_image_and_gpu_tag() {
        let req = ComputeRequirement::new(16, 32, 12).unwrap();
        assert_eq!(req.image_hash, IMAGE_HASH);
        assert_eq!(req.capabilities, vec!["cuda".to_string()]);
        assert_eq!(req.min_mem_gib, 16);
        assert_eq!(req.min_storage_gib, 32);
        assert_eq!(req.min_cpu_threads, 12);
    }

    #[test]
    fn deterministic() {
        assert_eq!(
            ComputeRequirement::new(8, 8, 8).unwrap(),
            ComputeRequirement::from_resources(&Resources::default()).unwrap()
        );
    }

    #[test]
    fn zero_bound_is_rejected() {
        let err = ComputeRequirement::new(8, 0, 8).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Configuration error: storage requirement must be positive"
        );
    }
}
