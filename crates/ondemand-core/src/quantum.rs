//! Resource quantization onto the orchestrator's supported cpu/memory pairs.
//!
//! Fargate-style orchestrators only accept a fixed set of (cpu, memory)
//! combinations. A request is rounded up to the first supported pair that is
//! at least as large in *both* dimensions. Picking cpu and memory
//! independently is wrong: `256x3000` would become `256x3072`, which cpu=256
//! does not support; the covering pair is `512x3072`.

use serde::{Deserialize, Serialize};

/// Default cpu units when a job does not ask for any.
pub const DEFAULT_CPU: u32 = 256;
/// Default memory (MiB) when a job does not ask for any.
pub const DEFAULT_MEMORY: u32 = 512;

const MEMORY_STEP: u32 = 1024;

/// Supported cpu values, ascending.
pub const CPU_VALUES: [u32; 5] = [256, 512, 1024, 2048, 4096];

/// A supported (cpu, memory) pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResourceQuantum {
    /// CPU units (1024 = one vCPU).
    pub cpu: u32,
    /// Memory in MiB.
    pub memory: u32,
}

impl ResourceQuantum {
    /// Largest supported pair; requests beyond it are clamped here.
    pub const MAX: ResourceQuantum = ResourceQuantum {
        cpu: 4096,
        memory: 30720,
    };

    pub fn new(cpu: u32, memory: u32) -> Self {
        Self { cpu, memory }
    }

    /// Whether this pair is part of the supported lattice.
    pub fn is_supported(&self) -> bool {
        memory_for_cpu(self.cpu).contains(&self.memory)
    }

    fn dominates(&self, cpu: u32, memory: u32) -> bool {
        self.cpu >= cpu && self.memory >= memory
    }
}

impl Default for ResourceQuantum {
    fn default() -> Self {
        Self::new(DEFAULT_CPU, DEFAULT_MEMORY)
    }
}

impl std::fmt::Display for ResourceQuantum {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.cpu, self.memory)
    }
}

/// Supported memory values for a cpu value, ascending. Empty for unsupported cpu.
pub fn memory_for_cpu(cpu: u32) -> Vec<u32> {
    let stepped = |from: u32, to: u32| -> Vec<u32> {
        (from..=to).step_by(MEMORY_STEP as usize).collect()
    };
    match cpu {
        256 => vec![512, 1024, 2048],
        512 => stepped(1024, 4096),
        1024 => stepped(2048, 8192),
        2048 => stepped(4096, 16384),
        4096 => stepped(8192, 30720),
        _ => Vec::new(),
    }
}

/// Every supported pair in ascending (cpu, memory) order.
pub fn lattice() -> impl Iterator<Item = ResourceQuantum> {
    CPU_VALUES.into_iter().flat_map(|cpu| {
        memory_for_cpu(cpu)
            .into_iter()
            .map(move |memory| ResourceQuantum::new(cpu, memory))
    })
}

/// Round a request up to the first supported pair covering both dimensions,
/// or [`ResourceQuantum::MAX`] when nothing covers it.
pub fn quantize(cpu: u32, memory: u32) -> ResourceQuantum {
    lattice()
        .find(|q| q.dominates(cpu, memory))
        .unwrap_or(ResourceQuantum::MAX)
}
