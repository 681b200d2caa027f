use anyhow::{anyhow, Result};
use candle_core::{DType, Device};
use tracing::info;

/// `auto` walks CUDA, then Metal, then CPU. Explicit choices fail loudly.
pub fn select_device(preference: &str) -> Result<Device> {
    match preference {
        "cpu" => Ok(Device::Cpu),
        "cuda" => Device::new_cuda(0).map_err(|e| anyhow!("CUDA device unavailable: {}", e)),
        "metal" => Device::new_metal(0).map_err(|e| anyhow!("Metal device unavailable: {}", e)),
        _ => Ok(auto_device()),
    }
}

fn auto_device() -> Device {
    #[cfg(feature = "cuda")]
    {
        if let Ok(dev) = Device::new_cuda(0) { info!(device = "cuda", "device selected"); return dev; }
    }
    #[cfg(feature = "metal")]
    {
        if let Ok(dev) = Device::new_metal(0) { info!(device = "metal", "device selected"); return dev; }
    }
    info!(device = "cpu", "device selected");
    Device::Cpu
}

/// Half precision only where the backend runs it fast; CPU always gets f32.
pub fn select_dtype(name: &str, device: &Device) -> DType {
    if device.is_cpu() {
        return DType::F32;
    }
    match name {
        "f32" => DType::F32,
        "f16" => DType::F16,
        _ => DType::BF16,
    }
}
