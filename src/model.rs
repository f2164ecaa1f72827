use burn::{
    nn::{loss::CrossEntropyLossConfig, Dropout, DropoutConfig, Linear, LinearConfig, Relu},
    prelude::*,
    train::ClassificationOutput,
};

/// Feed-forward classifier: flatten, dense + relu, dropout, dense.
#[derive(Module, Debug)]
pub struct Model<B: Backend> {
    linear1: Linear<B>,
    activation: Relu,
    dropout: Dropout,
    linear2: Linear<B>,
}

#[derive(Config, Debug)]
pub struct ModelConfig {
    #[config(default = 784)]
    pub input_size: usize,
    #[config(default = 256)]
    pub hidden_size: usize,
    #[config(default = 10)]
    pub num_classes: usize,
    #[config(default = 0.2)]
    pub dropout: f64,
}

impl ModelConfig {
    /// Returns the initialized model.
    pub fn init<B: Backend>(&self, device: &B::Device) -> Model<B> {
        Model {
            linear1: LinearConfig::new(self.input_size, self.hidden_size).init(device),
            activation: Relu::new(),
            dropout: DropoutConfig::new(self.dropout).init(),
            linear2: LinearConfig::new(self.hidden_size, self.num_classes).init(device),
        }
    }
}

impl<B: Backend> Model<B> {
    /// # Shapes
    ///   - Images `[batch_size, height, width]`
    ///   - Output `[batch_size, num_classes]`, unnormalized logits
    pub fn forward(&self, images: Tensor<B, 3>) -> Tensor<B, 2> {
        let [batch_size, height, width] = images.dims();

        let x = images.reshape([batch_size, height * width]);
        let x = self.linear1.forward(x);
        let x = self.activation.forward(x);
        let x = self.dropout.forward(x);

        self.linear2.forward(x)
    }

    pub fn forward_classification(
        &self,
        images: Tensor<B, 3>,
        targets: Tensor<B, 1, Int>,
    ) -> ClassificationOutput<B> {
        let output = self.forward(images);
        let loss = CrossEntropyLossConfig::new()
            .init(&output.device())
            .forward(output.clone(), targets.clone());

        ClassificationOutput::new(loss, output, targets)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::TestBackend;
    use burn::tensor::ElementConversion;

    #[test]
    fn default_config_matches_reference_topology() {
        let config = ModelConfig::new();

        assert_eq!(config.input_size, 784);
        assert_eq!(config.hidden_size, 256);
        assert_eq!(config.num_classes, 10);
        assert_eq!(config.dropout, 0.2);
    }

    #[test]
    fn forward_flattens_images_into_logits() {
        let device = Default::default();
        let model: Model<TestBackend> = ModelConfig::new().init(&device);
        let images = Tensor::<TestBackend, 3>::zeros([4, 28, 28], &device);

        let logits = model.forward(images);

        assert_eq!(logits.dims(), [4, 10]);
    }

    #[test]
    fn parameter_count_matches_two_dense_layers() {
        let device = Default::default();
        let model: Model<TestBackend> = ModelConfig::new().init(&device);

        assert_eq!(model.num_params(), 784 * 256 + 256 + 256 * 10 + 10);
    }

    #[test]
    fn forward_classification_reports_positive_loss() {
        let device = Default::default();
        let model: Model<TestBackend> = ModelConfig::new().init(&device);
        let images = Tensor::<TestBackend, 3>::ones([2, 28, 28], &device);
        let targets = Tensor::<TestBackend, 1, Int>::from_data([3, 8], &device);

        let output = model.forward_classification(images, targets);

        assert_eq!(output.output.dims(), [2, 10]);
        assert!(output.loss.into_scalar().elem::<f32>() > 0.0);
    }
}
