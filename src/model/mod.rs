//! Classifier model capability and the concrete LoRA decoder.
//!
//! The training loop only talks to [`ClassifierModel`]; the backbone behind it
//! (GGUF decoder, adapter placement, pooling) can be replaced without touching
//! data, loss or evaluation code.

pub mod decoder;
pub mod gguf;
pub mod lora;

use std::path::Path;

use candle_core::{DType, Device, Tensor, Var};

use crate::error::Result;

pub use decoder::{AdapterMetadata, LoraDecoderClassifier, ADAPTER_CONFIG_FILE, ADAPTER_WEIGHTS_FILE};
pub use gguf::{resolve_backbone, BackboneWeights, DecoderConfig};
pub use lora::{LoraConfig, Quantization};

/// Capability interface the trainer needs from a model.
pub trait ClassifierModel: Send {
    /// Raw logits of shape `(batch, num_labels)`.
    ///
    /// `train` enables stochastic layers such as adapter dropout.
    fn forward(
        &self,
        input_ids: &Tensor,
        attention_mask: &Tensor,
        train: bool,
    ) -> candle_core::Result<Tensor>;

    fn device(&self) -> &Device;

    fn num_labels(&self) -> usize;

    fn pad_token_id(&self) -> Option<u32>;

    fn set_pad_token_id(&mut self, pad_token_id: u32);

    /// Variables the optimizer is allowed to update. Frozen base weights are
    /// never included.
    fn trainable_vars(&self) -> Vec<Var>;

    /// Write the trainable weights and adapter metadata into `dir`.
    fn save_adapter(&self, dir: &Path) -> Result<()>;

    /// Restore trainable weights previously written by [`Self::save_adapter`].
    fn load_adapter(&mut self, dir: &Path) -> Result<()>;
}

/// Select the best available compute device.
///
/// Tries Metal (macOS) or CUDA (Linux/Windows) if the corresponding feature
/// is enabled and `prefer_gpu` is set. Runs a small matmul first and falls
/// back to CPU if the GPU backend cannot run it.
pub fn select_device(prefer_gpu: bool) -> Device {
    if prefer_gpu {
        #[cfg(target_os = "macos")]
        {
            if let Ok(device) = Device::new_metal(0) {
                if matmul_works(&device) {
                    tracing::info!("Using Metal GPU for training");
                    return device;
                }
                tracing::warn!("Metal GPU available but a test matmul failed, falling back to CPU");
            }
        }
        #[cfg(feature = "cuda")]
        {
            if let Ok(device) = Device::new_cuda(0) {
                if matmul_works(&device) {
                    tracing::info!("Using CUDA GPU for training");
                    return device;
                }
                tracing::warn!("CUDA GPU available but a test matmul failed, falling back to CPU");
            }
        }
    }
    tracing::info!("Using CPU for training");
    Device::Cpu
}

/// Whether a device can run the ops the classifier relies on.
#[allow(dead_code)]
fn matmul_works(device: &Device) -> bool {
    (|| -> candle_core::Result<()> {
        let a = Tensor::ones((2, 4), DType::F32, device)?;
        let b = Tensor::ones((4, 3), DType::F32, device)?;
        let _ = a.matmul(&b)?.tanh()?.exp()?;
        Ok(())
    })()
    .is_ok()
}
