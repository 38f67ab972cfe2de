//! Network definition: convolutional feature extractor plus classification head.
//!
//! The feature extractor is a stack of strided convolution blocks. Freezing
//! works per block: the forward pass detaches activations after the last
//! frozen block, so no gradient reaches its parameters.

use burn::config::Config;
use burn::module::Module;
use burn::nn::conv::{Conv2d, Conv2dConfig};
use burn::nn::pool::{AdaptiveAvgPool2d, AdaptiveAvgPool2dConfig};
use burn::nn::{
    Dropout, DropoutConfig, LayerNorm, LayerNormConfig, Linear, LinearConfig, PaddingConfig2d,
    Relu,
};
use burn::tensor::Tensor;
use burn::tensor::activation::softmax;
use burn::tensor::backend::Backend;

pub const DEFAULT_BACKBONE_CHANNELS: [usize; 4] = [32, 64, 128, 256];

#[derive(Config, Debug)]
pub struct NetworkConfig {
    pub num_classes: usize,
    /// Output channels of each feature block
    #[config(default = "DEFAULT_BACKBONE_CHANNELS.to_vec()")]
    pub backbone_channels: Vec<usize>,
    #[config(default = 256)]
    pub hidden: usize,
    #[config(default = 128)]
    pub hidden_small: usize,
    #[config(default = 0.5)]
    pub dropout: f64,
    #[config(default = 0.3)]
    pub dropout_small: f64,
}

impl NetworkConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> Network<B> {
        Network {
            backbone: self.init_backbone(device),
            head: self.init_head(device),
        }
    }

    pub fn init_backbone<B: Backend>(&self, device: &B::Device) -> Backbone<B> {
        let mut blocks = Vec::with_capacity(self.backbone_channels.len());
        let mut in_channels = vista_core::preprocess::CHANNELS;
        for &out_channels in &self.backbone_channels {
            blocks.push(ConvBlock {
                conv: Conv2dConfig::new([in_channels, out_channels], [3, 3])
                    .with_stride([2, 2])
                    .with_padding(PaddingConfig2d::Explicit(1, 1))
                    .init(device),
                activation: Relu::new(),
            });
            in_channels = out_channels;
        }
        Backbone { blocks }
    }

    fn init_head<B: Backend>(&self, device: &B::Device) -> ClassifierHead<B> {
        let features = self
            .backbone_channels
            .last()
            .copied()
            .unwrap_or(vista_core::preprocess::CHANNELS);
        ClassifierHead {
            pool: AdaptiveAvgPool2dConfig::new([1, 1]).init(),
            norm: LayerNormConfig::new(features).init(device),
            dense: LinearConfig::new(features, self.hidden).init(device),
            dropout: DropoutConfig::new(self.dropout).init(),
            dense_small: LinearConfig::new(self.hidden, self.hidden_small).init(device),
            dropout_small: DropoutConfig::new(self.dropout_small).init(),
            output: LinearConfig::new(self.hidden_small, self.num_classes).init(device),
            activation: Relu::new(),
        }
    }
}

#[derive(Module, Debug)]
pub struct ConvBlock<B: Backend> {
    conv: Conv2d<B>,
    activation: Relu,
}

impl<B: Backend> ConvBlock<B> {
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        self.activation.forward(self.conv.forward(x))
    }
}

/// Feature extractor. Expects `[batch, 3, h, w]` with values in `[0, 1]`.
#[derive(Module, Debug)]
pub struct Backbone<B: Backend> {
    blocks: Vec<ConvBlock<B>>,
}

impl<B: Backend> Backbone<B> {
    pub fn num_blocks(&self) -> usize {
        self.blocks.len()
    }

    /// Features `[batch, channels, h', w']`; the first `frozen_blocks` blocks get no gradient.
    pub fn forward(&self, images: Tensor<B, 4>, frozen_blocks: usize) -> Tensor<B, 4> {
        // Rescale to [-1, 1]
        let mut x = images.mul_scalar(2.0).sub_scalar(1.0);
        if frozen_blocks > 0 {
            x = x.detach();
        }
        for (i, block) in self.blocks.iter().enumerate() {
            x = block.forward(x);
            if i + 1 == frozen_blocks {
                x = x.detach();
            }
        }
        x
    }
}

#[derive(Module, Debug)]
pub struct ClassifierHead<B: Backend> {
    pool: AdaptiveAvgPool2d,
    norm: LayerNorm<B>,
    dense: Linear<B>,
    dropout: Dropout,
    dense_small: Linear<B>,
    dropout_small: Dropout,
    output: Linear<B>,
    activation: Relu,
}

impl<B: Backend> ClassifierHead<B> {
    /// Logits `[batch, num_classes]`
    pub fn forward(&self, features: Tensor<B, 4>) -> Tensor<B, 2> {
        let [batch, channels, _, _] = features.dims();
        let x = self.pool.forward(features).reshape([batch, channels]);
        let x = self.norm.forward(x);
        let x = self.dropout.forward(self.activation.forward(self.dense.forward(x)));
        let x = self
            .dropout_small
            .forward(self.activation.forward(self.dense_small.forward(x)));
        self.output.forward(x)
    }
}

#[derive(Module, Debug)]
pub struct Network<B: Backend> {
    pub backbone: Backbone<B>,
    pub head: ClassifierHead<B>,
}

impl<B: Backend> Network<B> {
    pub fn forward(&self, images: Tensor<B, 4>, frozen_blocks: usize) -> Tensor<B, 2> {
        self.head.forward(self.backbone.forward(images, frozen_blocks))
    }

    /// Class probabilities `[batch, num_classes]`
    pub fn probabilities(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        softmax(self.forward(images, 0), 1)
    }

    pub fn num_blocks(&self) -> usize {
        self.backbone.num_blocks()
    }

    /// One line per layer group: name, trainable state and parameter count.
    pub fn summary(&self, frozen_blocks: usize) -> String {
        let mut lines = Vec::new();
        let mut frozen_params = 0;
        for (i, block) in self.backbone.blocks.iter().enumerate() {
            let params = block.num_params();
            let trainable = i >= frozen_blocks;
            if !trainable {
                frozen_params += params;
            }
            lines.push(format!(
                "backbone.block{i:<2} conv3x3/2   params {params:>10}  {}",
                if trainable { "trainable" } else { "frozen" }
            ));
        }
        lines.push(format!(
            "head               pool+norm+mlp params {:>10}  trainable",
            self.head.num_params()
        ));

        let total = self.num_params();
        lines.push(format!("Total params: {total}"));
        lines.push(format!("Trainable params: {}", total - frozen_params));
        lines.push(format!("Non-trainable params: {frozen_params}"));
        lines.join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{ServeBackend, default_device};

    fn tiny() -> NetworkConfig {
        NetworkConfig::new(3)
            .with_backbone_channels(vec![4, 8])
            .with_hidden(8)
            .with_hidden_small(4)
    }

    #[test]
    fn test_output_shape() {
        let device = default_device();
        let net = tiny().init::<ServeBackend>(&device);
        let images = Tensor::<ServeBackend, 4>::zeros([2, 3, 16, 16], &device);

        assert_eq!(net.forward(images.clone(), 0).dims(), [2, 3]);
        assert_eq!(net.num_blocks(), 2);

        let probs = net.probabilities(images).into_data().to_vec::<f32>().unwrap();
        for row in probs.chunks(3) {
            assert!((row.iter().sum::<f32>() - 1.0).abs() < 1e-5);
        }
    }

    #[test]
    fn test_summary_counts() {
        let device = default_device();
        let net = tiny().init::<ServeBackend>(&device);
        let summary = net.summary(1);
        assert!(summary.contains("frozen"));
        assert!(summary.contains(&format!("Total params: {}", net.num_params())));
    }
}
